//! Per-stream encoder management.
//!
//! - **registry**: stream identifier to output directory
//! - **encoder**: encoder command template and launcher seam
//! - **fifo**: named pipes feeding each encoder
//! - **supervisor**: one live encoder per stream, push and teardown

pub mod encoder;
pub mod fifo;
pub mod registry;
pub mod supervisor;

pub use encoder::{EncoderLauncher, FfmpegLauncher, LaunchSpec};
pub use registry::StreamRegistry;
pub use supervisor::Supervisor;
