//! Entity handler capability and the data type -> handler registry.

use std::collections::HashMap;
use std::sync::Arc;

use super::fields::{FieldSpec, LineDraft};
use super::handlers::{DoctorHandler, HospitalHandler, LocationHandler, PatientHandler};
use crate::error::MaterializeError;
use crate::models::{DataType, Entity};

/// A failure while building an entity from a complete draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildFailure {
    /// Draft key of the offending field.
    pub key: &'static str,
    pub message: String,
}

impl BuildFailure {
    pub fn new(key: &'static str, message: impl Into<String>) -> Self {
        Self {
            key,
            message: message.into(),
        }
    }
}

/// Accumulates fields of one line and builds its entity.
pub trait EntityHandler: Send + Sync {
    /// Data type this handler materializes.
    fn data_type(&self) -> DataType;

    /// Fields the handler recognizes.
    fn fields(&self) -> &'static [FieldSpec];

    /// Validate one field into the draft.
    ///
    /// On failure the field is marked rejected and the message returned; the
    /// other fields of the draft are kept.
    fn accumulate(&self, draft: &mut LineDraft, spec: &FieldSpec, raw: &str) -> Result<(), String> {
        match spec.rule.normalize(raw) {
            Ok(value) => {
                draft.insert(spec.key, value);
                Ok(())
            }
            Err(message) => {
                draft.reject(spec.key);
                Err(message)
            }
        }
    }

    /// Build the entity once every required field is present.
    fn build(&self, draft: &LineDraft) -> Result<Entity, BuildFailure>;
}

/// Maps data types to handlers; new data types are added by registering.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<DataType, Arc<dyn EntityHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in handlers for every data type.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(LocationHandler);
        registry.register(PatientHandler::tabular());
        registry.register(PatientHandler::clinical());
        registry.register(DoctorHandler);
        registry.register(HospitalHandler);
        registry
    }

    pub fn register<H: EntityHandler + 'static>(&mut self, handler: H) {
        let data_type = handler.data_type();
        tracing::debug!(%data_type, "registered entity handler");
        self.handlers.insert(data_type, Arc::new(handler));
    }

    /// Handler for a data type; an unregistered type is a configuration error.
    pub fn get(&self, data_type: DataType) -> Result<Arc<dyn EntityHandler>, MaterializeError> {
        self.handlers
            .get(&data_type)
            .cloned()
            .ok_or(MaterializeError::UnsupportedDataType(data_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_every_data_type() {
        let registry = HandlerRegistry::with_defaults();
        for data_type in DataType::ALL {
            let handler = registry.get(data_type).unwrap();
            assert_eq!(handler.data_type(), data_type);
        }
    }

    #[test]
    fn test_unregistered_type_is_an_error() {
        let mut registry = HandlerRegistry::new();
        registry.register(HospitalHandler);
        let err = registry.get(DataType::Doctor).err().unwrap();
        assert!(matches!(err, MaterializeError::UnsupportedDataType(DataType::Doctor)));
    }
}
