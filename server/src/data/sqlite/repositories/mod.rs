//! SQLite repositories

pub mod trace_request_history;

pub use trace_request_history::{
    TraceRequestHistoryRow, count_histories, get_history, insert_history, list_histories,
    update_response, update_status,
};
