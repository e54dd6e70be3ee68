use crate::archive::Archive;
use crate::model::*;

use super::lifecycle::check_actor;
use super::{apply_to_locks, now_ms, CellStore, Engine, EngineError};

impl<S: CellStore, A: Archive> Engine<S, A> {
    /// Lock a table against new bookings. Returns `false` if it was already
    /// locked. Occupancy is irrelevant: a seated table may be locked.
    pub async fn lock_table(&self, table: &str, actor: &Actor) -> Result<bool, EngineError> {
        if !actor.can_manage_locks() {
            return Err(EngineError::Forbidden {
                role: actor.role,
                action: "lock tables",
            });
        }
        check_actor(actor)?;
        let key = self.resolve_key(table)?;

        let mut locks = self.locks.write().await;
        if locks.contains_key(&key.table) {
            return Ok(false);
        }
        let event = Event::TableLocked {
            table: key.table,
            by: actor.id.clone(),
            at: now_ms(),
        };
        self.wal_append(&event).await?;
        apply_to_locks(&mut locks, &event);
        Ok(true)
    }

    /// Returns `false` if the table was not locked.
    pub async fn unlock_table(&self, table: &str, actor: &Actor) -> Result<bool, EngineError> {
        if !actor.can_manage_locks() {
            return Err(EngineError::Forbidden {
                role: actor.role,
                action: "unlock tables",
            });
        }
        let key = self.resolve_key(table)?;

        let mut locks = self.locks.write().await;
        if !locks.contains_key(&key.table) {
            return Ok(false);
        }
        let event = Event::TableUnlocked { table: key.table };
        self.wal_append(&event).await?;
        apply_to_locks(&mut locks, &event);
        Ok(true)
    }

    pub async fn is_locked(&self, table: &str) -> bool {
        self.locks.read().await.contains_key(table)
    }

    /// Locked tables with who locked them, sorted by table id.
    pub async fn locked_tables(&self) -> Vec<(TableId, LockInfo)> {
        let locks = self.locks.read().await;
        let mut all: Vec<_> = locks.iter().map(|(t, i)| (t.clone(), i.clone())).collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }
}
