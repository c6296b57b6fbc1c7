//! MJPEG byte stream splitter
//!
//! ffmpeg's `image2pipe`/`mjpeg` output is a plain concatenation of JPEG
//! images. Frames are cut on the SOI (FF D8) and EOI (FF D9) markers.

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Upper bound for buffered bytes without a complete frame (32 MiB)
const MAX_BUFFERED_BYTES: usize = 32 * 1024 * 1024;

/// Incremental JPEG frame extractor
#[derive(Debug, Default)]
pub struct JpegSplitter {
    buf: Vec<u8>,
    /// Offset from which to resume the EOI search
    scan_from: usize,
}

impl JpegSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes read from the pipe
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
        if self.buf.len() > MAX_BUFFERED_BYTES {
            tracing::warn!(
                buffered = self.buf.len(),
                "MJPEG buffer overflow without frame boundary, discarding"
            );
            self.buf.clear();
            self.scan_from = 0;
        }
    }

    /// Pop the next complete JPEG, if any
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        // Drop garbage before the first SOI
        match find(&self.buf, &SOI, 0) {
            Some(0) => {}
            Some(start) => {
                self.buf.drain(..start);
                self.scan_from = 0;
            }
            None => {
                // keep a trailing 0xFF, it may be the first half of an SOI
                let keep = usize::from(self.buf.last() == Some(&0xFF));
                let cut = self.buf.len() - keep;
                self.buf.drain(..cut);
                self.scan_from = 0;
                return None;
            }
        }

        let from = self.scan_from.max(SOI.len());
        match find(&self.buf, &EOI, from) {
            Some(end) => {
                let frame: Vec<u8> = self.buf.drain(..end + EOI.len()).collect();
                self.scan_from = 0;
                Some(frame)
            }
            None => {
                // resume where this scan stopped, minus one byte for a split marker
                self.scan_from = self.buf.len().saturating_sub(1).max(SOI.len());
                None
            }
        }
    }
}

fn find(haystack: &[u8], needle: &[u8; 2], from: usize) -> Option<usize> {
    if haystack.len() < needle.len() || from > haystack.len() - needle.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|pos| pos + from)
}
