//! Debug request replay
//!
//! Replays a user-described HTTP request tagged with a correlation id and
//! tracks whether spans for it reach storage.

pub mod error;
pub mod service;
pub mod status;

pub use error::DebugError;
pub use service::{
    CreateDebugRequest, DebugHistories, DebugHistory, DebugService, DebugStatusInfo,
};
pub use status::DebugStatus;
