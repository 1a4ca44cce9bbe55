//! Import orchestration: dispatch queue, worker pool and the retry protocol.
//!
//! ```text
//!  POST /api/imports ──▶ DispatchQueue ──▶ WorkerPool ──▶ Orchestrator::handle
//!                            ▲                                  │
//!                            │        probe failed              │ probe ok
//!                            └──── publish_delayed(attempt+1) ◀─┤
//!                                                               ▼
//!                                    fetch ▶ parse ▶ accumulate ▶ store
//! ```

pub mod local;
pub mod orchestrator;
pub mod queue;
pub mod worker;

pub use local::{parse_file, process_file, LocalRun};
pub use orchestrator::{Orchestrator, RunSummary};
pub use queue::{DispatchMessage, DispatchQueue, LocalQueue};
pub use worker::{ImportGuard, ImportLocks, WorkerPool};
