//! HTTP API module.
//!
//! Upload handoff: clients register an already-uploaded object and poll its
//! import for the outcome.

pub mod server;
pub mod types;

pub use server::{router, start_server};
pub use types::*;
