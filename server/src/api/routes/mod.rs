//! API route handlers

pub mod debug;
pub mod health;
pub mod ingest;
pub mod metrics;
pub mod traces;
