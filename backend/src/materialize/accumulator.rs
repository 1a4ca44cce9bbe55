//! Line accumulator: buffers Field Records by line and finalizes entities.

use std::collections::HashSet;
use std::sync::Arc;

use super::fields::{resolve, LineDraft};
use super::registry::{EntityHandler, HandlerRegistry};
use crate::error::MaterializeError;
use crate::models::{DataType, Entity, FieldRecord, FileFormat, ImportId, LineError, LineKey};

/// Result of feeding records into the accumulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Entity { key: LineKey, entity: Entity },
    Error(LineError),
}

impl Outcome {
    pub fn key(&self) -> LineKey {
        match self {
            Outcome::Entity { key, .. } => *key,
            Outcome::Error(err) => err.key,
        }
    }
}

/// Stateful per-import accumulator.
///
/// One line is open at a time; a record with a different line key finalizes
/// it. Finalized keys are remembered so replaying records never yields a
/// second entity or repeated errors for the same line.
pub struct LineAccumulator {
    import_id: ImportId,
    format: FileFormat,
    handler: Arc<dyn EntityHandler>,
    open: Option<(LineKey, LineDraft)>,
    finalized: HashSet<LineKey>,
}

impl LineAccumulator {
    pub fn new(
        import_id: ImportId,
        data_type: DataType,
        format: FileFormat,
        registry: &HandlerRegistry,
    ) -> Result<Self, MaterializeError> {
        Ok(Self {
            import_id,
            format,
            handler: registry.get(data_type)?,
            open: None,
            finalized: HashSet::new(),
        })
    }

    pub fn data_type(&self) -> DataType {
        self.handler.data_type()
    }

    /// Feed one record. An empty vector means nothing is complete yet.
    pub fn materialize(&mut self, record: &FieldRecord) -> Vec<Outcome> {
        if record.import_id != self.import_id {
            tracing::warn!(
                import_id = self.import_id,
                record_import = record.import_id,
                "ignoring record of another import"
            );
            return Vec::new();
        }
        if self.finalized.contains(&record.key) {
            tracing::debug!(line = record.key.line, sheet = record.key.sheet, "line already finalized");
            return Vec::new();
        }

        let mut outcomes = Vec::new();
        if self.open.as_ref().is_some_and(|(key, _)| *key != record.key) {
            outcomes.extend(self.finalize_open());
        }

        let (key, draft) = self
            .open
            .get_or_insert_with(|| (record.key, LineDraft::default()));

        let Some(spec) = resolve(self.handler.fields(), self.format, &record.field) else {
            tracing::debug!(field = %record.field, line = key.line, "ignoring unknown field");
            return outcomes;
        };
        if draft.contains(spec.key) || draft.was_rejected(spec.key) {
            tracing::debug!(field = %record.field, line = key.line, "ignoring repeated field");
            return outcomes;
        }

        if let Err(message) = self.handler.accumulate(draft, spec, &record.value) {
            let error = LineError::new(self.import_id, *key, spec.source_name(self.format), message)
                .with_value(record.value.clone());
            tracing::warn!(
                line = key.line,
                sheet = key.sheet,
                field = %error.field,
                "{}",
                error.message
            );
            outcomes.push(Outcome::Error(error));
        }
        outcomes
    }

    /// Flush the open line at end of stream.
    pub fn finish(&mut self) -> Vec<Outcome> {
        self.finalize_open()
    }

    /// Drop the open line without finalizing it.
    pub fn abandon(&mut self) -> Option<LineKey> {
        self.open.take().map(|(key, _)| key)
    }

    fn finalize_open(&mut self) -> Vec<Outcome> {
        let Some((key, draft)) = self.open.take() else {
            return Vec::new();
        };
        self.finalized.insert(key);
        if draft.is_empty() {
            return Vec::new();
        }

        let fields = self.handler.fields();
        let mut outcomes = Vec::new();
        let mut complete = true;
        for spec in fields.iter().filter(|s| s.required && !draft.contains(s.key)) {
            complete = false;
            if !draft.was_rejected(spec.key) {
                let error = LineError::new(
                    self.import_id,
                    key,
                    spec.source_name(self.format),
                    "missing required field",
                );
                tracing::warn!(line = key.line, sheet = key.sheet, field = %error.field, "missing required field");
                outcomes.push(Outcome::Error(error));
            }
        }
        if !complete {
            return outcomes;
        }

        match self.handler.build(&draft) {
            Ok(entity) => outcomes.push(Outcome::Entity { key, entity }),
            Err(failure) => {
                let field = fields
                    .iter()
                    .find(|s| s.key == failure.key)
                    .map(|s| s.source_name(self.format))
                    .unwrap_or_else(|| failure.key.to_string());
                let mut error = LineError::new(self.import_id, key, field, failure.message);
                if let Some(value) = draft.get(failure.key) {
                    error = error.with_value(value);
                }
                tracing::warn!(line = key.line, sheet = key.sheet, field = %error.field, "{}", error.message);
                outcomes.push(Outcome::Error(error));
            }
        }
        outcomes
    }
}
