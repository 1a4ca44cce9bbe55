//! Probe / delay / process protocol for one dispatch.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task;
use tokio::time::timeout;
use tracing::Instrument;
use uuid::Uuid;

use super::{DispatchMessage, DispatchQueue, ImportLocks};
use crate::config::Settings;
use crate::error::{ImportError, ImportResult, SourceError};
use crate::materialize::{HandlerRegistry, LineAccumulator, Outcome};
use crate::models::{Import, ImportId, ImportStatus};
use crate::parser::{FormatParser, ReaderRegistry};
use crate::source::ObjectSource;
use crate::store::{ImportStore, ImportUpdate};

/// Outcomes buffered between the parser thread and persistence.
const OUTCOME_BUFFER: usize = 256;

/// Counters of one processing run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub entities: usize,
    pub line_errors: usize,
}

impl RunSummary {
    pub fn status(&self) -> ImportStatus {
        if self.line_errors == 0 {
            ImportStatus::Succeeded
        } else {
            ImportStatus::PartialSuccess
        }
    }
}

/// Drives imports through `Probing -> (Delayed | Processing) -> terminal`.
///
/// Delivery is at-least-once and nothing here deduplicates: a re-delivered
/// message runs the whole protocol again, and the store's upsert on
/// `(import, line)` keeps the outcome identical.
pub struct Orchestrator {
    store: Arc<dyn ImportStore>,
    source: Arc<dyn ObjectSource>,
    queue: Arc<dyn DispatchQueue>,
    readers: ReaderRegistry,
    handlers: HandlerRegistry,
    settings: Settings,
    locks: ImportLocks,
    shutdown: watch::Sender<bool>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn ImportStore>,
        source: Arc<dyn ObjectSource>,
        queue: Arc<dyn DispatchQueue>,
        settings: Settings,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            store,
            source,
            queue,
            readers: ReaderRegistry::with_defaults(settings.xml_lines),
            handlers: HandlerRegistry::with_defaults(),
            settings,
            locks: ImportLocks::new(),
            shutdown,
        }
    }

    /// Replace the reader provider registry.
    pub fn with_readers(mut self, readers: ReaderRegistry) -> Self {
        self.readers = readers;
        self
    }

    /// Replace the entity handler registry.
    pub fn with_handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Ask running imports to stop at the next record.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Handle one dispatch message and return the status it left the import in.
    ///
    /// On error the import has already been marked `Failed` with the error's kind.
    pub async fn handle(&self, message: DispatchMessage) -> ImportResult<ImportStatus> {
        let span = tracing::info_span!(
            "import",
            import_id = message.import_id,
            format = %message.file_format,
            attempt = message.attempt,
            run = %Uuid::new_v4(),
        );
        self.run(message).instrument(span).await
    }

    async fn run(&self, message: DispatchMessage) -> ImportResult<ImportStatus> {
        let _guard = self.locks.acquire(message.import_id).await;
        let import = self.store.get_import(message.import_id).await?;

        match self.dispatch(&import, &message).await {
            Ok(status) => Ok(status),
            Err(err) => {
                tracing::error!(kind = err.kind(), "import failed: {}", err);
                if let Err(store_err) = self
                    .store
                    .update_import(import.id, ImportUpdate::failed(&err))
                    .await
                {
                    tracing::error!("cannot record failure: {}", store_err);
                }
                Err(err)
            }
        }
    }

    async fn dispatch(&self, import: &Import, message: &DispatchMessage) -> ImportResult<ImportStatus> {
        let attempts = message.attempt + 1;
        self.store
            .update_import(
                import.id,
                ImportUpdate::status(ImportStatus::Probing).with_attempts(attempts),
            )
            .await?;

        if !self.probe(&message.source_location).await {
            if self.settings.max_attempts.is_some_and(|max| attempts >= max) {
                return Err(ImportError::TransientSourceUnavailable {
                    location: message.source_location.clone(),
                    attempts,
                });
            }
            self.store
                .update_import(import.id, ImportUpdate::status(ImportStatus::Delayed))
                .await?;
            tracing::info!(
                delay_secs = self.settings.retry_delay.as_secs(),
                "object not reachable yet, dispatch delayed"
            );
            self.queue
                .publish_delayed(message.next_attempt(), self.settings.retry_delay)
                .await?;
            return Ok(ImportStatus::Delayed);
        }

        self.store
            .update_import(import.id, ImportUpdate::status(ImportStatus::Processing))
            .await?;
        let summary = self.process(import, message).await?;
        let status = summary.status();
        self.store
            .update_import(import.id, ImportUpdate::status(status))
            .await?;
        tracing::info!(
            entities = summary.entities,
            line_errors = summary.line_errors,
            %status,
            "import finished"
        );
        Ok(status)
    }

    async fn probe(&self, location: &str) -> bool {
        match timeout(self.settings.probe_timeout, self.source.probe(location)).await {
            Ok(Ok(ready)) => ready,
            Ok(Err(err)) => {
                tracing::warn!("probe failed: {}", err);
                false
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.settings.probe_timeout.as_secs(),
                    "probe timed out"
                );
                false
            }
        }
    }

    async fn fetch(&self, location: &str) -> ImportResult<Vec<u8>> {
        let limit: Duration = self.settings.fetch_timeout;
        match timeout(limit, self.source.fetch(location)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(SourceError::Timeout(limit.as_secs()).into()),
        }
    }

    /// Fetch, parse and materialize every line of the object.
    ///
    /// Parsing runs on the blocking pool; outcomes come back over a bounded
    /// channel and are persisted here in line order.
    async fn process(&self, import: &Import, message: &DispatchMessage) -> ImportResult<RunSummary> {
        let format = message.file_format;
        let parser = self
            .readers
            .get(format)
            .ok_or(ImportError::UnsupportedFormat(format))?;
        let accumulator = LineAccumulator::new(import.id, import.data_type, format, &self.handlers)?;

        let bytes = self.fetch(&message.source_location).await?;
        tracing::debug!(bytes = bytes.len(), "object fetched");
        self.store.replace_line_errors(import.id, Vec::new()).await?;

        let lines = LineReader {
            import_id: import.id,
            header_rows: if format.is_spreadsheet() {
                self.settings.header_rows
            } else {
                0
            },
            cancel: self.shutdown.subscribe(),
        };
        let (sender, mut outcomes) = mpsc::channel(OUTCOME_BUFFER);
        let span = tracing::Span::current();
        let reader = task::spawn_blocking(move || {
            let _entered = span.enter();
            lines.run(parser.as_ref(), &bytes, accumulator, &sender)
        });

        let mut summary = RunSummary::default();
        let mut failure = None;
        while let Some(outcome) = outcomes.recv().await {
            if let Err(err) = self.persist(import, outcome, &mut summary).await {
                failure = Some(err);
                break;
            }
        }
        // a closed channel stops the reader at its next send
        drop(outcomes);
        let read = reader.await;

        if let Some(err) = failure {
            return Err(err);
        }
        match read {
            Ok(result) => result.map(|()| summary),
            Err(err) => Err(ImportError::SourceReadFailure(format!("reader task failed: {}", err))),
        }
    }

    async fn persist(
        &self,
        import: &Import,
        outcome: Outcome,
        summary: &mut RunSummary,
    ) -> ImportResult<()> {
        match outcome {
            Outcome::Entity { key, entity } => {
                self.store.upsert_entity(import.id, key, entity).await?;
                summary.entities += 1;
            }
            Outcome::Error(error) => {
                self.store.add_line_error(error).await?;
                summary.line_errors += 1;
            }
        }
        Ok(())
    }
}

/// Blocking half of a processing run: parse, skip headers, accumulate.
struct LineReader {
    import_id: ImportId,
    header_rows: u32,
    cancel: watch::Receiver<bool>,
}

impl LineReader {
    /// Stream outcomes into `sender`; stops early when the receiver is gone.
    fn run(
        &self,
        parser: &dyn FormatParser,
        bytes: &[u8],
        mut accumulator: LineAccumulator,
        sender: &mpsc::Sender<Outcome>,
    ) -> ImportResult<()> {
        let send = |outcomes: Vec<Outcome>| outcomes.into_iter().all(|o| sender.blocking_send(o).is_ok());

        for record in parser.parse(self.import_id, bytes)? {
            if *self.cancel.borrow() {
                if let Some(key) = accumulator.abandon() {
                    tracing::info!(line = key.line, sheet = key.sheet, "open line dropped");
                }
                return Err(ImportError::Cancelled);
            }
            let record = record?;
            if record.key.line <= self.header_rows {
                continue;
            }
            if !send(accumulator.materialize(&record)) {
                return Ok(());
            }
        }
        send(accumulator.finish());
        Ok(())
    }
}
