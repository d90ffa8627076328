//! HTTP API handlers for embody-scan

pub mod health;
pub mod scan;
pub mod sse;

pub use health::health_routes;
pub use scan::scan_routes;
pub use sse::scan_event_stream;
