//! Data models for embody-scan

mod pipeline_result;
mod scan_session;

pub use pipeline_result::{PipelineResult, AVATAR_VERSION};
pub use scan_session::{
    BiometricProfile, CapturedPhoto, DeclaredSex, PhotoView, ScanRecord, ScanRequest, ScanStatus,
};
