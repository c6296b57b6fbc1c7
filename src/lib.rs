//! Attendance Camserver Library
//!
//! Camera worker orchestration and recognition dedup pipeline
//!
//! ## Architecture (7 Components)
//!
//! 1. CameraRegistry - Desired camera set (SQLite or JSON file)
//! 2. Capture - ffmpeg frame streams with per-source leases
//! 3. FaceMatcher - Recognition capability adapter
//! 4. DedupService - Per-camera and cross-camera cooldowns
//! 5. AttendanceReporter - Delivery to the attendance sink
//! 6. CameraWorker - Per-camera capture/process state machine
//! 7. Reconciler - Starts and stops workers to match the registry
//!
//! ## Design Principles
//!
//! - The reconciler owns every worker handle
//! - The deduper holds the only state shared between workers
//! - No camera failure stops another camera or the reconciler

pub mod attendance_reporter;
pub mod camera_registry;
pub mod camera_worker;
pub mod capture;
pub mod config;
pub mod dedup_service;
pub mod error;
pub mod face_matcher;
pub mod models;
pub mod reconciler;

pub use error::{Error, Result};
