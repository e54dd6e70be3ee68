use std::sync::Arc;

use tracing::error;
use ulid::Ulid;

use crate::archive::{Archive, ArchiveError};
use crate::limits::*;
use crate::model::*;

use super::{apply_to_store, now_ms, verify_consistency, CellStore, Engine, EngineError, LockTable};

fn check_len(value: &str, max: usize, what: &'static str) -> Result<(), EngineError> {
    if value.len() > max {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

/// Staff ids end up in the journal and the archive.
pub(super) fn check_actor(actor: &Actor) -> Result<(), EngineError> {
    check_len(&actor.id, MAX_STAFF_ID_LEN, "staff id too long")
}

fn validate_party(party_size: u32) -> Result<(), EngineError> {
    if party_size == 0 {
        return Err(EngineError::InvalidInput("party size must be at least 1"));
    }
    if party_size > MAX_PARTY_SIZE {
        return Err(EngineError::LimitExceeded("party too large"));
    }
    Ok(())
}

/// A table accepts a new booking when it is EMPTY and either unlocked or the
/// actor may override locks. Also used for merge targets.
pub(super) fn check_table_free<S: CellStore>(
    cells: &S,
    locks: &LockTable,
    key: &TableKey,
    actor: &Actor,
) -> Result<(), EngineError> {
    if !cells.is_empty_at(key) {
        return Err(EngineError::TableOccupied(key.table.clone()));
    }
    if locks.contains_key(&key.table) && !actor.can_override_locks() {
        return Err(EngineError::TableLocked(key.table.clone()));
    }
    Ok(())
}

/// Load one cell of a live booking together with every key holding it.
pub(super) fn load_booking<S: CellStore>(
    cells: &S,
    booking_id: BookingId,
) -> Result<(BookingCell, Vec<TableKey>), EngineError> {
    let keys = cells.keys_of(&booking_id);
    let cell = keys
        .first()
        .and_then(|k| cells.get(k))
        .ok_or(EngineError::BookingNotFound(booking_id))?;
    Ok((cell, keys))
}

impl<S: CellStore, A: Archive> Engine<S, A> {
    /// Reserve an EMPTY table. The booking starts in HOLD.
    pub async fn create(
        &self,
        table: &str,
        booking: NewBooking,
        actor: &Actor,
    ) -> Result<BookingCell, EngineError> {
        check_len(&booking.customer_name, MAX_NAME_LEN, "customer name too long")?;
        if let Some(ref phone) = booking.customer_phone {
            check_len(phone, MAX_PHONE_LEN, "phone number too long")?;
        }
        check_len(&booking.note, MAX_NOTE_LEN, "note too long")?;
        check_actor(actor)?;
        validate_party(booking.party_size)?;
        let time = booking.time_of_day.as_deref().unwrap_or(DEFAULT_TIME_OF_DAY);
        let reserved_for = parse_time_of_day(time)
            .ok_or(EngineError::InvalidInput("time of day must be HH:MM"))?;
        let key = self.resolve_key(table)?;

        let mut cells = self.cells.write().await;
        let locks = self.locks.read().await;
        check_table_free(&*cells, &locks, &key, actor)?;
        drop(locks);

        let name = booking.customer_name.trim().to_string();
        let phone = booking
            .customer_phone
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());
        let customer = if name.is_empty() && phone.is_none() {
            None
        } else {
            Some(Customer { name, phone })
        };

        let cell = BookingCell {
            booking_id: Ulid::new(),
            status: Status::Hold,
            created_at: now_ms(),
            reserved_for: Some(reserved_for),
            arrived_at: None,
            party_size: booking.party_size,
            staff: actor.id.clone(),
            note: booking.note,
            customer,
            tables: vec![key.table.clone()],
        };
        let event = Event::BookingOpened { key, cell: cell.clone() };
        self.persist_and_apply(&mut cells, &event).await?;
        Ok(cell)
    }

    /// Seat a guest without a reservation. Walk-ins are arrived on creation.
    pub async fn walk_in(
        &self,
        table: &str,
        party_size: u32,
        note: String,
        actor: &Actor,
    ) -> Result<BookingCell, EngineError> {
        check_len(&note, MAX_NOTE_LEN, "note too long")?;
        check_actor(actor)?;
        validate_party(party_size)?;
        let key = self.resolve_key(table)?;

        let mut cells = self.cells.write().await;
        let locks = self.locks.read().await;
        check_table_free(&*cells, &locks, &key, actor)?;
        drop(locks);

        let now = now_ms();
        let cell = BookingCell {
            booking_id: Ulid::new(),
            status: Status::WalkIn,
            created_at: now,
            reserved_for: None,
            arrived_at: Some(now),
            party_size,
            staff: actor.id.clone(),
            note,
            customer: None,
            tables: vec![key.table.clone()],
        };
        let event = Event::BookingOpened { key, cell: cell.clone() };
        self.persist_and_apply(&mut cells, &event).await?;
        Ok(cell)
    }

    /// HOLD → SEATED on every table of the booking, with one shared arrival time.
    pub async fn check_in(&self, booking_id: BookingId, actor: &Actor) -> Result<BookingCell, EngineError> {
        check_actor(actor)?;
        let mut cells = self.cells.write().await;
        let (cell, _) = load_booking(&*cells, booking_id)?;
        if !cell.status.can_transition_to(Status::Seated) {
            return Err(EngineError::InvalidTransition {
                booking_id,
                status: cell.status,
                action: "check in",
            });
        }

        let at = now_ms();
        let event = Event::CheckedIn { booking_id, at };
        self.persist_and_apply(&mut cells, &event).await?;
        Ok(BookingCell {
            status: Status::Seated,
            arrived_at: Some(at),
            ..cell
        })
    }

    /// SEATED/WALKIN → CLOSED. Archives one snapshot, then frees every table.
    pub async fn close(
        &self,
        booking_id: BookingId,
        confirm: bool,
        actor: &Actor,
    ) -> Result<ArchivedBooking, EngineError> {
        check_actor(actor)?;
        let mut cells = self.cells.write().await;
        let (cell, _) = load_booking(&*cells, booking_id)?;
        if !cell.status.can_transition_to(Status::Closed) {
            return Err(EngineError::InvalidTransition {
                booking_id,
                status: cell.status,
                action: "close",
            });
        }
        if !confirm {
            return Err(EngineError::ConfirmationRequired);
        }

        let record = ArchivedBooking::from_cell(
            &cell,
            Status::Closed,
            now_ms(),
            self.table_keys(&cell),
            None,
            &actor.id,
        );
        self.finish(&mut cells, record).await
    }

    /// Cancel with a reason. Staff may only cancel bookings still on HOLD.
    pub async fn cancel(
        &self,
        booking_id: BookingId,
        reason: &str,
        actor: &Actor,
    ) -> Result<ArchivedBooking, EngineError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(EngineError::ReasonRequired);
        }
        check_len(reason, MAX_REASON_LEN, "reason too long")?;
        check_actor(actor)?;

        let mut cells = self.cells.write().await;
        let (cell, _) = load_booking(&*cells, booking_id)?;
        if !cell.status.can_transition_to(Status::Cancelled) {
            return Err(EngineError::InvalidTransition {
                booking_id,
                status: cell.status,
                action: "cancel",
            });
        }
        if !actor.can_cancel(cell.status) {
            return Err(EngineError::Forbidden {
                role: actor.role,
                action: "cancel an arrived booking",
            });
        }

        let record = ArchivedBooking::from_cell(
            &cell,
            Status::Cancelled,
            now_ms(),
            self.table_keys(&cell),
            Some(reason.to_string()),
            &actor.id,
        );
        self.finish(&mut cells, record).await
    }

    /// Keys of the booking's table-set, in the order the tables joined.
    fn table_keys(&self, cell: &BookingCell) -> Vec<TableKey> {
        cell.tables
            .iter()
            .filter_map(|t| self.registry().key_of(t))
            .collect()
    }

    /// Terminal transition: journal the record, hand it to the archive, then
    /// clear every table. The cells change only once both have accepted it.
    /// An archive rejection is journaled as `ArchiveFailed` so replay does
    /// not finish the booking either.
    async fn finish(&self, cells: &mut S, record: ArchivedBooking) -> Result<ArchivedBooking, EngineError> {
        let event = match record.status {
            Status::Cancelled => Event::BookingCancelled { record: record.clone() },
            _ => Event::BookingClosed { record: record.clone() },
        };
        self.wal_append(&event).await?;

        let archive = Arc::clone(&self.archive);
        let pending = record.clone();
        let archived = match tokio::task::spawn_blocking(move || archive.append(&pending)).await {
            Ok(result) => result.map_err(EngineError::from),
            Err(e) => Err(EngineError::from(ArchiveError(e.to_string()))),
        };
        if let Err(e) = archived {
            let revert = Event::ArchiveFailed {
                booking_id: record.booking_id,
            };
            if let Err(wal_err) = self.wal_append(&revert).await {
                error!(booking_id = %record.booking_id, "could not journal archive failure: {wal_err}");
            }
            return Err(e);
        }

        apply_to_store(cells, &event);
        debug_assert_eq!(verify_consistency(cells), Ok(()), "after {}", event.label());
        Ok(record)
    }
}
