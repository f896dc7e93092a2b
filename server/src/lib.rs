//! Tracehouse server
//!
//! Consumes span records from message bus topics into one or more span
//! backends, reconstructs traces on query and replays debug requests.

pub mod api;
mod app;
pub mod core;
pub mod data;
pub mod domain;
pub mod utils;
