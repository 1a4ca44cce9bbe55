//! Worker pool consuming dispatch messages, and per-import sequencing.

use futures::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as TableMutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::{DispatchMessage, Orchestrator};
use crate::models::ImportId;

type LockTable = HashMap<ImportId, Arc<Mutex<()>>>;

/// One async mutex per import: at most one run per import at a time,
/// unrelated imports proceed in parallel.
///
/// An entry lives only while some run holds or waits for it.
#[derive(Clone, Default)]
pub struct ImportLocks {
    locks: Arc<TableMutex<LockTable>>,
}

/// Exclusive access to one import, released on drop.
pub struct ImportGuard {
    import_id: ImportId,
    table: Arc<TableMutex<LockTable>>,
    _guard: OwnedMutexGuard<()>,
}

fn lock_table(table: &TableMutex<LockTable>) -> MutexGuard<'_, LockTable> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ImportLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `import_id`.
    pub async fn acquire(&self, import_id: ImportId) -> ImportGuard {
        let lock = Arc::clone(lock_table(&self.locks).entry(import_id).or_default());
        let guard = lock.lock_owned().await;
        ImportGuard {
            import_id,
            table: Arc::clone(&self.locks),
            _guard: guard,
        }
    }

    /// Number of imports currently held or awaited.
    pub fn len(&self) -> usize {
        lock_table(&self.locks).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for ImportGuard {
    fn drop(&mut self) {
        let mut table = lock_table(&self.table);
        // table entry + this guard; waiters clone under the table lock
        let idle = table
            .get(&self.import_id)
            .is_some_and(|lock| Arc::strong_count(lock) <= 2);
        if idle {
            table.remove(&self.import_id);
        }
    }
}

/// Runs dispatch messages through the orchestrator, each on its own task,
/// with at most `concurrency` in flight.
pub struct WorkerPool {
    orchestrator: Arc<Orchestrator>,
    concurrency: usize,
}

impl WorkerPool {
    pub fn new(orchestrator: Arc<Orchestrator>, concurrency: usize) -> Self {
        Self {
            orchestrator,
            concurrency: concurrency.max(1),
        }
    }

    /// Consume messages until the orchestrator is shut down or the queue closes,
    /// then wait for the runs in flight.
    pub async fn run(self, receiver: mpsc::UnboundedReceiver<DispatchMessage>) {
        let mut shutdown = self.orchestrator.shutdown_signal();
        let stop = async move {
            // a closed channel means the orchestrator is gone
            let _ = shutdown.wait_for(|stopped| *stopped).await;
        };

        tracing::info!(concurrency = self.concurrency, "worker pool started");
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut running = JoinSet::new();
        let mut messages = std::pin::pin!(UnboundedReceiverStream::new(receiver).take_until(stop));

        while let Some(message) = messages.next().await {
            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                break;
            };
            let orchestrator = Arc::clone(&self.orchestrator);
            running.spawn(async move {
                let _permit = permit;
                if let Err(err) = orchestrator.handle(message).await {
                    tracing::debug!(kind = err.kind(), "dispatch ended with error");
                }
            });
            while let Some(finished) = running.try_join_next() {
                if let Err(err) = finished {
                    tracing::error!("dispatch task panicked: {}", err);
                }
            }
        }

        while let Some(finished) = running.join_next().await {
            if let Err(err) = finished {
                tracing::error!("dispatch task panicked: {}", err);
            }
        }
        tracing::info!("worker pool stopped");
    }

    pub fn spawn(self, receiver: mpsc::UnboundedReceiver<DispatchMessage>) -> JoinHandle<()> {
        tokio::spawn(self.run(receiver))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_import_is_serialized() {
        let locks = ImportLocks::new();
        let guard = locks.acquire(1).await;

        let other = locks.clone();
        let waiter = tokio::spawn(async move {
            let _guard = other.acquire(1).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_different_imports_run_in_parallel() {
        let locks = ImportLocks::new();
        let _first = locks.acquire(1).await;
        let second = tokio::time::timeout(Duration::from_millis(100), locks.acquire(2)).await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn test_released_locks_are_evicted() {
        let locks = ImportLocks::new();
        let first = locks.acquire(1).await;
        let second = locks.acquire(2).await;
        assert_eq!(locks.len(), 2);

        drop(first);
        assert_eq!(locks.len(), 1);
        drop(second);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_entry_survives_while_a_run_waits() {
        let locks = ImportLocks::new();
        let guard = locks.acquire(7).await;

        let other = locks.clone();
        let waiter = tokio::spawn(async move { other.acquire(7).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        drop(guard);
        assert_eq!(locks.len(), 1);
        let second = waiter.await.unwrap();
        drop(second);
        assert!(locks.is_empty());
    }
}
