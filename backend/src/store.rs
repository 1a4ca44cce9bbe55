//! Persistence boundary for imports, entities and line errors.
//!
//! [`MemoryStore`] is the in-process implementation used by the server and
//! the tests. Entities are upserted on `(import, line key)`, so re-running an
//! import never duplicates them.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use crate::error::{ImportError, StoreError, StoreResult};
use crate::models::{
    Entity, Import, ImportId, ImportStatus, LineError, LineKey, NewImport, StoredEntity,
};

/// A status transition plus the bookkeeping that goes with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportUpdate {
    pub status: ImportStatus,
    /// New attempt count; unchanged when `None`.
    pub attempts: Option<u32>,
    /// `(kind, message)` for failed imports.
    pub failure: Option<(String, String)>,
}

impl ImportUpdate {
    pub fn status(status: ImportStatus) -> Self {
        Self {
            status,
            attempts: None,
            failure: None,
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    pub fn failed(err: &ImportError) -> Self {
        Self {
            status: ImportStatus::Failed,
            attempts: None,
            failure: Some((err.kind().to_string(), err.to_string())),
        }
    }
}

#[async_trait]
pub trait ImportStore: Send + Sync {
    async fn create_import(&self, request: NewImport) -> StoreResult<Import>;

    async fn get_import(&self, id: ImportId) -> StoreResult<Import>;

    async fn list_imports(&self) -> StoreResult<Vec<Import>>;

    async fn update_import(&self, id: ImportId, update: ImportUpdate) -> StoreResult<Import>;

    /// Insert or replace the entity materialized from one line.
    async fn upsert_entity(
        &self,
        import_id: ImportId,
        line: LineKey,
        entity: Entity,
    ) -> StoreResult<StoredEntity>;

    async fn entities(&self, import_id: ImportId) -> StoreResult<Vec<StoredEntity>>;

    async fn count_entities(&self, import_id: ImportId) -> StoreResult<usize>;

    /// Replace every line error of an import.
    async fn replace_line_errors(&self, import_id: ImportId, errors: Vec<LineError>) -> StoreResult<()>;

    async fn add_line_error(&self, error: LineError) -> StoreResult<()>;

    async fn line_errors(&self, import_id: ImportId) -> StoreResult<Vec<LineError>>;
}

// =============================================================================
// In-memory store
// =============================================================================

#[derive(Default)]
struct Tables {
    next_import: ImportId,
    next_entity: u64,
    imports: BTreeMap<ImportId, Import>,
    history: HashMap<ImportId, Vec<ImportStatus>>,
    entities: BTreeMap<(ImportId, LineKey), StoredEntity>,
    errors: HashMap<ImportId, Vec<LineError>>,
}

/// Store backed by in-process maps.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every status an import went through, oldest first.
    pub async fn status_history(&self, id: ImportId) -> Vec<ImportStatus> {
        self.tables
            .read()
            .await
            .history
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl ImportStore for MemoryStore {
    async fn create_import(&self, request: NewImport) -> StoreResult<Import> {
        if request.source_location.trim().is_empty() {
            return Err(StoreError::Rejected("source location is empty".into()));
        }
        let mut tables = self.tables.write().await;
        tables.next_import += 1;
        let import = Import::new(tables.next_import, request);
        tables.history.insert(import.id, vec![import.status]);
        tables.imports.insert(import.id, import.clone());
        Ok(import)
    }

    async fn get_import(&self, id: ImportId) -> StoreResult<Import> {
        self.tables
            .read()
            .await
            .imports
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn list_imports(&self) -> StoreResult<Vec<Import>> {
        Ok(self.tables.read().await.imports.values().cloned().collect())
    }

    async fn update_import(&self, id: ImportId, update: ImportUpdate) -> StoreResult<Import> {
        let mut guard = self.tables.write().await;
        let tables = &mut *guard;
        let import = tables.imports.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        import.status = update.status;
        if let Some(attempts) = update.attempts {
            import.attempts = attempts;
        }
        match update.failure {
            Some((kind, message)) => {
                import.failure_kind = Some(kind);
                import.failure = Some(message);
            }
            None => {
                import.failure_kind = None;
                import.failure = None;
            }
        }
        import.updated_at = Utc::now();
        let import = import.clone();

        tables.history.entry(id).or_default().push(update.status);
        Ok(import)
    }

    async fn upsert_entity(
        &self,
        import_id: ImportId,
        line: LineKey,
        entity: Entity,
    ) -> StoreResult<StoredEntity> {
        let mut tables = self.tables.write().await;
        if !tables.imports.contains_key(&import_id) {
            return Err(StoreError::NotFound(import_id));
        }

        let existing = tables.entities.get(&(import_id, line)).map(|e| e.id);
        let id = match existing {
            Some(id) => id,
            None => {
                tables.next_entity += 1;
                tables.next_entity
            }
        };
        let stored = StoredEntity {
            id,
            import_id,
            line,
            entity,
        };
        tables.entities.insert((import_id, line), stored.clone());
        Ok(stored)
    }

    async fn entities(&self, import_id: ImportId) -> StoreResult<Vec<StoredEntity>> {
        Ok(self
            .tables
            .read()
            .await
            .entities
            .range((import_id, LineKey::new(0, 0))..=(import_id, LineKey::new(u32::MAX, u32::MAX)))
            .map(|(_, e)| e.clone())
            .collect())
    }

    async fn count_entities(&self, import_id: ImportId) -> StoreResult<usize> {
        Ok(self
            .tables
            .read()
            .await
            .entities
            .keys()
            .filter(|(id, _)| *id == import_id)
            .count())
    }

    async fn replace_line_errors(&self, import_id: ImportId, errors: Vec<LineError>) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if !tables.imports.contains_key(&import_id) {
            return Err(StoreError::NotFound(import_id));
        }
        tables.errors.insert(import_id, errors);
        Ok(())
    }

    async fn add_line_error(&self, error: LineError) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if !tables.imports.contains_key(&error.import_id) {
            return Err(StoreError::NotFound(error.import_id));
        }
        tables.errors.entry(error.import_id).or_default().push(error);
        Ok(())
    }

    async fn line_errors(&self, import_id: ImportId) -> StoreResult<Vec<LineError>> {
        Ok(self
            .tables
            .read()
            .await
            .errors
            .get(&import_id)
            .cloned()
            .unwrap_or_default())
    }
}
