mod error;
mod lifecycle;
mod locks;
mod merge;
mod queries;
mod store;

pub use error::EngineError;
pub use merge::{MergePlan, SplitPlan};
pub use store::{verify_consistency, CellStore, InMemoryStore, InvariantViolation};

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, RwLock};

use crate::archive::Archive;
use crate::model::*;
use crate::registry::TableRegistry;
use crate::wal::Wal;

/// Locked tables, keyed by table id.
pub type LockTable = HashMap<TableId, LockInfo>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type Batch = Vec<(Event, oneshot::Sender<io::Result<()>>)>;

/// Owns the WAL. Appends that arrive while one is pending join the same
/// batch and share one fsync; control commands commit the open batch first.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    let mut batch: Batch = Vec::new();
    while let Some(first) = rx.recv().await {
        let mut next = Some(first);
        while let Some(cmd) = next.take() {
            match cmd {
                WalCommand::Append { event, response } => {
                    batch.push((event, response));
                    next = rx.try_recv().ok();
                }
                WalCommand::Compact { events, response } => {
                    commit_batch(&mut wal, &mut batch);
                    let result = Wal::write_compact_file(wal.path(), &events)
                        .and_then(|()| wal.swap_compact_file());
                    let _ = response.send(result);
                }
                WalCommand::AppendsSinceCompact { response } => {
                    commit_batch(&mut wal, &mut batch);
                    let _ = response.send(wal.appends_since_compact());
                }
            }
        }
        commit_batch(&mut wal, &mut batch);
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Batch) {
    if batch.is_empty() {
        return;
    }
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();
    let appended = batch.iter().try_for_each(|(event, _)| wal.append_buffered(event));
    // Flushed even after a failed append: the whole batch is reported failed
    // and no partial frame may stay buffered for the next one.
    let flushed = wal.flush_sync();
    let result = appended.and(flushed);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, response) in batch.drain(..) {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = response.send(reply);
    }
}

/// Journal positions of terminal events later cancelled by `ArchiveFailed`.
fn reverted_terminals(events: &[Event]) -> HashSet<usize> {
    let mut last_terminal: HashMap<BookingId, usize> = HashMap::new();
    let mut reverted = HashSet::new();
    for (i, event) in events.iter().enumerate() {
        match event {
            Event::BookingClosed { record } | Event::BookingCancelled { record } => {
                last_terminal.insert(record.booking_id, i);
            }
            Event::ArchiveFailed { booking_id } => {
                if let Some(at) = last_terminal.remove(booking_id) {
                    reverted.insert(at);
                }
            }
            _ => {}
        }
    }
    reverted
}

/// The floor engine: booking cells, table locks, and the archive obligation.
///
/// Every mutating operation takes the cell-store write lock for its whole
/// duration (validate, journal, apply), so no reader ever sees half of a
/// multi-table write. The lock table has its own lock and is only read while
/// cells are being changed; lock order is always cells, then locks.
pub struct Engine<S, A> {
    registry: Arc<TableRegistry>,
    pub(super) cells: RwLock<S>,
    pub(super) locks: RwLock<LockTable>,
    pub(super) archive: Arc<A>,
    /// `None` runs purely in memory.
    wal_tx: Option<mpsc::Sender<WalCommand>>,
}

/// Apply an event to the cell store (no locking; caller holds the lock).
/// Replay-safe: an event naming a booking that is no longer live is a no-op.
pub(super) fn apply_to_store<S: CellStore + ?Sized>(store: &mut S, event: &Event) {
    match event {
        Event::BookingOpened { key, cell } => {
            store.set(key.clone(), Some(cell.clone()));
        }
        Event::CheckedIn { booking_id, at } => {
            for key in store.keys_of(booking_id) {
                if let Some(mut cell) = store.get(&key) {
                    cell.status = Status::Seated;
                    cell.arrived_at = Some(*at);
                    store.set(key, Some(cell));
                }
            }
        }
        Event::TablesMerged {
            booking_id,
            target,
            tables,
        } => {
            let keys = store.keys_of(booking_id);
            let Some(template) = keys.first().and_then(|k| store.get(k)) else {
                return;
            };
            for key in keys {
                if let Some(mut cell) = store.get(&key) {
                    cell.tables = tables.clone();
                    store.set(key, Some(cell));
                }
            }
            store.set(
                target.clone(),
                Some(BookingCell {
                    tables: tables.clone(),
                    ..template
                }),
            );
        }
        Event::TableSplit {
            booking_id,
            key,
            tables,
        } => {
            store.set(key.clone(), None);
            for remaining in store.keys_of(booking_id) {
                if let Some(mut cell) = store.get(&remaining) {
                    cell.tables = tables.clone();
                    store.set(remaining, Some(cell));
                }
            }
        }
        Event::BookingClosed { record } | Event::BookingCancelled { record } => {
            for key in store.keys_of(&record.booking_id) {
                store.set(key, None);
            }
        }
        // Lock events live in the lock table, not here
        Event::TableLocked { .. } | Event::TableUnlocked { .. } | Event::ArchiveFailed { .. } => {}
    }
}

pub(super) fn apply_to_locks(locks: &mut LockTable, event: &Event) {
    match event {
        Event::TableLocked { table, by, at } => {
            locks.insert(
                table.clone(),
                LockInfo {
                    locked_by: by.clone(),
                    locked_at: *at,
                },
            );
        }
        Event::TableUnlocked { table } => {
            locks.remove(table);
        }
        _ => {}
    }
}

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

impl<A: Archive> Engine<InMemoryStore, A> {
    /// Purely in-memory floor with no journal.
    pub fn in_memory(registry: Arc<TableRegistry>, archive: A) -> Self {
        Self::new(registry, InMemoryStore::new(), archive)
    }
}

impl<S: CellStore, A: Archive> Engine<S, A> {
    /// Engine over an existing store, without a journal.
    pub fn new(registry: Arc<TableRegistry>, store: S, archive: A) -> Self {
        Self {
            registry,
            cells: RwLock::new(store),
            locks: RwLock::new(LockTable::new()),
            archive: Arc::new(archive),
            wal_tx: None,
        }
    }

    /// Replay the journal at `wal_path` into `store`, then keep journaling
    /// every mutation there through the group-commit writer task.
    ///
    /// Every journaled close or cancel is offered to the archive again; the
    /// archive skips ids it already holds, so a crash between journal and
    /// archive still yields exactly one record. Must be called inside a tokio
    /// runtime.
    pub fn open(
        wal_path: PathBuf,
        registry: Arc<TableRegistry>,
        mut store: S,
        archive: A,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let reverted = reverted_terminals(&events);

        // We own the store and lock table outright here, so replay applies
        // directly without going through the async locks.
        let mut locks = LockTable::new();
        for (i, event) in events.iter().enumerate() {
            if reverted.contains(&i) {
                continue;
            }
            if let Event::BookingClosed { record } | Event::BookingCancelled { record } = event {
                archive
                    .append(record)
                    .map_err(|e| io::Error::other(e.to_string()))?;
            }
            apply_to_store(&mut store, event);
            apply_to_locks(&mut locks, event);
        }

        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        Ok(Self {
            registry,
            cells: RwLock::new(store),
            locks: RwLock::new(locks),
            archive: Arc::new(archive),
            wal_tx: Some(wal_tx),
        })
    }

    pub fn registry(&self) -> &TableRegistry {
        &self.registry
    }

    pub fn archive(&self) -> &A {
        &self.archive
    }

    /// Send one command to the writer task and wait for its reply.
    /// `Ok(None)` when the engine runs without a journal.
    async fn wal_request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> WalCommand,
    ) -> Result<Option<T>, EngineError> {
        let Some(wal_tx) = &self.wal_tx else {
            return Ok(None);
        };
        let (tx, rx) = oneshot::channel();
        wal_tx
            .send(command(tx))
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map(Some)
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))
    }

    /// Durably journal one event through the group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let event = event.clone();
        match self.wal_request(|response| WalCommand::Append { event, response }).await? {
            Some(result) => result.map_err(|e| EngineError::WalError(e.to_string())),
            None => Ok(()),
        }
    }

    /// WAL-append + apply in one call. The caller holds the cell write lock
    /// and has already validated every precondition.
    pub(super) async fn persist_and_apply(&self, store: &mut S, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_store(store, event);
        debug_assert_eq!(verify_consistency(store), Ok(()), "after {}", event.label());
        Ok(())
    }

    /// Resolve a table id to its store key through the registry.
    pub(super) fn resolve_key(&self, table: &str) -> Result<TableKey, EngineError> {
        self.registry
            .key_of(table)
            .ok_or_else(|| EngineError::UnknownTable(table.to_string()))
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate
    /// the current floor. Holds both read locks until the rewrite is done so
    /// no mutation can land between the snapshot and the swap.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        if self.wal_tx.is_none() {
            return Ok(());
        }
        let cells = self.cells.read().await;
        let locks = self.locks.read().await;

        let mut events: Vec<Event> = cells
            .cells()
            .into_iter()
            .map(|(key, cell)| Event::BookingOpened { key, cell })
            .collect();
        let mut locked: Vec<_> = locks.iter().collect();
        locked.sort_by(|a, b| a.0.cmp(b.0));
        for (table, info) in locked {
            events.push(Event::TableLocked {
                table: table.clone(),
                by: info.locked_by.clone(),
                at: info.locked_at,
            });
        }

        match self.wal_request(|response| WalCommand::Compact { events, response }).await? {
            Some(result) => result.map_err(|e| EngineError::WalError(e.to_string())),
            None => Ok(()),
        }
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        self.wal_request(|response| WalCommand::AppendsSinceCompact { response })
            .await
            .ok()
            .flatten()
            .unwrap_or(0)
    }
}
