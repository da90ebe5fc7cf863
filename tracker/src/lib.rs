//! Deployment status tracker
//!
//! Follows a server-side build-and-deploy job through two redundant status
//! channels and drives it to a single terminal state.

pub mod app;
pub mod channels;
pub mod errors;
pub mod filesys;
pub mod http;
pub mod logs;
pub mod models;
pub mod storage;
pub mod track;
pub mod utils;

pub use channels::{PollSource, PushSource};
pub use errors::TrackerError;
pub use track::controller::{Session, TeardownReason, Tracker, TrackerSettings, TrackerView};
pub use track::fsm::{LifecycleState, LogRecord, LogRecords, StatusSnapshot};
