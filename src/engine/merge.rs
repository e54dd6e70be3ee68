use crate::archive::Archive;
use crate::limits::MAX_TABLES_PER_BOOKING;
use crate::model::*;

use super::lifecycle::{check_actor, check_table_free};
use super::{CellStore, Engine, EngineError, LockTable};

/// A merge validated against a snapshot of the floor. Committing re-checks
/// every precondition, so a plan may go stale but never applies stale data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePlan {
    pub booking_id: BookingId,
    pub source: TableKey,
    pub target: TableKey,
    /// Table-set the booking had when the plan was made, plus the target.
    pub tables: Vec<TableId>,
    actor: Actor,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitPlan {
    pub booking_id: BookingId,
    pub key: TableKey,
    /// Table-set left after `key` is released.
    pub tables: Vec<TableId>,
}

/// The cell at `key`, if it carries `booking_id`.
fn booking_at<S: CellStore>(cells: &S, key: &TableKey, booking_id: BookingId) -> Result<BookingCell, EngineError> {
    cells
        .get(key)
        .filter(|cell| cell.booking_id == booking_id)
        .ok_or(EngineError::BookingNotFound(booking_id))
}

/// Compute the merge write-set from current state. Touches nothing.
fn plan_merge<S: CellStore>(
    cells: &S,
    locks: &LockTable,
    source: &TableKey,
    target: &TableKey,
    booking_id: BookingId,
    actor: &Actor,
) -> Result<Event, EngineError> {
    check_actor(actor)?;
    let cell = booking_at(cells, source, booking_id)?;
    check_table_free(cells, locks, target, actor)?;
    if cell.tables.len() >= MAX_TABLES_PER_BOOKING {
        return Err(EngineError::LimitExceeded("too many tables in one booking"));
    }

    let mut tables = cell.tables;
    tables.push(target.table.clone());
    Ok(Event::TablesMerged {
        booking_id,
        target: target.clone(),
        tables,
    })
}

fn plan_split<S: CellStore>(cells: &S, key: &TableKey, booking_id: BookingId) -> Result<Event, EngineError> {
    let cell = booking_at(cells, key, booking_id)?;
    if cell.tables.len() <= 1 {
        return Err(EngineError::CannotSplitLastTable(key.table.clone()));
    }
    let tables = cell.tables.into_iter().filter(|t| *t != key.table).collect();
    Ok(Event::TableSplit {
        booking_id,
        key: key.clone(),
        tables,
    })
}

fn event_tables(event: &Event) -> Vec<TableId> {
    match event {
        Event::TablesMerged { tables, .. } | Event::TableSplit { tables, .. } => tables.clone(),
        _ => Vec::new(),
    }
}

impl<S: CellStore, A: Archive> Engine<S, A> {
    /// Extend the booking held at `source` onto the EMPTY table `target`.
    /// Returns the new table-set.
    pub async fn merge(
        &self,
        source: &str,
        target: &str,
        booking_id: BookingId,
        actor: &Actor,
    ) -> Result<Vec<TableId>, EngineError> {
        let source = self.resolve_key(source)?;
        let target = self.resolve_key(target)?;

        let mut cells = self.cells.write().await;
        let locks = self.locks.read().await;
        let event = plan_merge(&*cells, &locks, &source, &target, booking_id, actor)?;
        drop(locks);

        self.persist_and_apply(&mut cells, &event).await?;
        Ok(event_tables(&event))
    }

    /// Release `table` from a multi-table booking. Returns the remaining set.
    pub async fn split(&self, table: &str, booking_id: BookingId, _actor: &Actor) -> Result<Vec<TableId>, EngineError> {
        let key = self.resolve_key(table)?;

        let mut cells = self.cells.write().await;
        let event = plan_split(&*cells, &key, booking_id)?;
        self.persist_and_apply(&mut cells, &event).await?;
        Ok(event_tables(&event))
    }

    /// Validate a merge under read locks without changing anything.
    pub async fn prepare_merge(
        &self,
        source: &str,
        target: &str,
        booking_id: BookingId,
        actor: &Actor,
    ) -> Result<MergePlan, EngineError> {
        let source = self.resolve_key(source)?;
        let target = self.resolve_key(target)?;

        let cells = self.cells.read().await;
        let locks = self.locks.read().await;
        let event = plan_merge(&*cells, &locks, &source, &target, booking_id, actor)?;
        Ok(MergePlan {
            booking_id,
            source,
            target,
            tables: event_tables(&event),
            actor: actor.clone(),
        })
    }

    /// Apply a prepared merge. Preconditions are checked again against the
    /// floor as it is now; on failure the store is unchanged.
    pub async fn commit_merge(&self, plan: MergePlan) -> Result<Vec<TableId>, EngineError> {
        let mut cells = self.cells.write().await;
        let locks = self.locks.read().await;
        let event = plan_merge(&*cells, &locks, &plan.source, &plan.target, plan.booking_id, &plan.actor)?;
        drop(locks);

        self.persist_and_apply(&mut cells, &event).await?;
        Ok(event_tables(&event))
    }

    pub async fn prepare_split(&self, table: &str, booking_id: BookingId) -> Result<SplitPlan, EngineError> {
        let key = self.resolve_key(table)?;
        let cells = self.cells.read().await;
        let event = plan_split(&*cells, &key, booking_id)?;
        Ok(SplitPlan {
            booking_id,
            key,
            tables: event_tables(&event),
        })
    }

    pub async fn commit_split(&self, plan: SplitPlan) -> Result<Vec<TableId>, EngineError> {
        let mut cells = self.cells.write().await;
        let event = plan_split(&*cells, &plan.key, plan.booking_id)?;
        self.persist_and_apply(&mut cells, &event).await?;
        Ok(event_tables(&event))
    }
}
