//! Entity factory: turns Field Records into typed entities.
//!
//! ```text
//! FieldRecord ──▶ LineAccumulator ──(line complete)──▶ EntityHandler::build ──▶ Entity
//!                      │                                     │
//!                      └──── invalid / missing field ────────┴──▶ LineError
//! ```
//!
//! Handlers are looked up by data type in a [`HandlerRegistry`]; each one
//! declares a [`FieldSpec`] table saying where its fields live in every
//! file format and how they are validated.

pub mod accumulator;
pub mod fields;
pub mod handlers;
pub mod registry;

pub use accumulator::{LineAccumulator, Outcome};
pub use fields::{parse_date, FieldSpec, LineDraft, Rule};
pub use handlers::{DoctorHandler, HospitalHandler, LocationHandler, PatientHandler};
pub use registry::{BuildFailure, EntityHandler, HandlerRegistry};
