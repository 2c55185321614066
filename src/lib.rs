//! camlapse - CCTV frame capture and timelapse summarizer
//!
//! ## Architecture
//!
//! 1. CaptureScheduler - one periodic capture tick per camera
//! 2. FrameStore - filesystem frame ledger with lexically sortable names
//! 3. MotionAnalyzer - pure keep/discard decisions over frame pairs
//! 4. VideoAssembler - SELECT -> ENCODE -> PUBLISH per camera, mutually
//!    exclusive per camera via try-leases
//! 5. ManifestPublisher - atomic per-camera "latest video" pointer
//! 6. RetentionManager - frame horizon sweep + daily video sweep
//! 7. Diagnostics - read-only motion replay over stored frames
//!
//! ## Design principles
//!
//! - Configuration is loaded once and passed explicitly; no ambient state
//! - Cameras communicate only through the filesystem, so per-camera
//!   isolation is structural, not a discipline
//! - Capture and encode are narrow traits; the pipeline tests with fakes

pub mod assembler;
pub mod camera_status;
pub mod capture;
pub mod config;
pub mod diagnostics;
pub mod encoder;
pub mod error;
pub mod frame_store;
pub mod manifest;
pub mod motion;
pub mod retention;
pub mod scheduler;

pub use error::{Error, Result};
