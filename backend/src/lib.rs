//! # Clinicload - bulk health-registry imports
//!
//! Clinicload turns uploaded spreadsheets, XML documents and pipe-delimited
//! clinical messages into typed registry entities (states, municipalities,
//! patients, doctors, hospitals).
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌────────────┐   ┌──────────────┐   ┌─────────────┐   ┌──────────┐
//! │  Dispatch  │──▶│   Probe /  │──▶│    Format    │──▶│    Line     │──▶│  Import  │
//! │   queue    │   │   fetch    │   │    parser    │   │ accumulator │   │  store   │
//! └────────────┘   └────────────┘   └──────────────┘   └─────────────┘   └──────────┘
//!       ▲                │ not ready      FieldRecord      Entity / LineError
//!       └── delayed ─────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use clinicload::materialize::{HandlerRegistry, LineAccumulator};
//! use clinicload::models::{DataType, FileFormat};
//! use clinicload::parser::{FormatParser, MessageParser};
//!
//! let message = b"PID|1||12345678909||Silva^Ana||19800212|F";
//! let registry = HandlerRegistry::with_defaults();
//! let mut accumulator =
//!     LineAccumulator::new(1, DataType::ClinicalCode, FileFormat::Hl7, &registry).unwrap();
//!
//! let mut outcomes = Vec::new();
//! for record in MessageParser.parse(1, message).unwrap() {
//!     outcomes.extend(accumulator.materialize(&record.unwrap()));
//! }
//! outcomes.extend(accumulator.finish());
//! assert_eq!(outcomes.len(), 1);
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Hierarchical error types
//! - [`models`] - Imports, Field Records, Line Errors and entities
//! - [`parser`] - Format parsers and the reader provider registry
//! - [`materialize`] - Line accumulator and entity handlers
//! - [`pipeline`] - Dispatch queue, worker pool and retry protocol
//! - [`source`] - Object storage access
//! - [`store`] - Persistence boundary
//! - [`config`] - Environment settings
//! - [`logging`] - Tracing setup
//! - [`api`] - HTTP API server

// Core modules
pub mod error;
pub mod models;

// Parsing and materialization
pub mod materialize;
pub mod parser;

// Orchestration
pub mod pipeline;
pub mod source;
pub mod store;

// Runtime
pub mod config;
pub mod logging;

// HTTP API
pub mod api;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{
    ConfigError, ImportError, MaterializeError, ParseError, QueueError, ServerError, SourceError,
    StoreError,
};

// =============================================================================
// Re-exports - Models
// =============================================================================

pub use models::{
    DataType, Entity, FieldRecord, FileFormat, Import, ImportId, ImportStatus, LineError, LineKey,
    NewImport, StoredEntity,
};

// =============================================================================
// Re-exports - Parsing and materialization
// =============================================================================

pub use materialize::{EntityHandler, HandlerRegistry, LineAccumulator, Outcome};
pub use parser::{column_index, column_label, FormatParser, ReaderRegistry, XmlLineMode};

// =============================================================================
// Re-exports - Orchestration
// =============================================================================

pub use config::Settings;
pub use pipeline::{DispatchMessage, DispatchQueue, LocalQueue, Orchestrator, WorkerPool};
pub use source::{HttpObjectSource, ObjectSource};
pub use store::{ImportStore, MemoryStore};

// Server
pub mod server {
    pub use crate::api::server::start_server;
}
