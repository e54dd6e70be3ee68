use std::collections::{BTreeSet, HashMap};

use crate::model::*;

/// Key-value view of the floor: one optional booking cell per table.
///
/// A missing cell is an EMPTY table; that is the only representation of
/// EMPTY anywhere in the engine. Backends need no transactions of their own:
/// the engine holds its write lock across every `set` of one operation.
pub trait CellStore: Send + Sync {
    fn get(&self, key: &TableKey) -> Option<BookingCell>;

    /// `None` clears the cell.
    fn set(&mut self, key: TableKey, cell: Option<BookingCell>);

    /// Every key currently holding `booking_id`, sorted.
    fn keys_of(&self, booking_id: &BookingId) -> Vec<TableKey>;

    /// Every occupied cell, sorted by key.
    fn cells(&self) -> Vec<(TableKey, BookingCell)>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_empty_at(&self, key: &TableKey) -> bool {
        self.get(key).is_none()
    }
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryStore {
    cells: HashMap<TableKey, BookingCell>,
    /// Reverse lookup: booking id → keys carrying it.
    by_booking: HashMap<BookingId, BTreeSet<TableKey>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn unindex(&mut self, booking_id: &BookingId, key: &TableKey) {
        if let Some(keys) = self.by_booking.get_mut(booking_id) {
            keys.remove(key);
            if keys.is_empty() {
                self.by_booking.remove(booking_id);
            }
        }
    }
}

impl CellStore for InMemoryStore {
    fn get(&self, key: &TableKey) -> Option<BookingCell> {
        self.cells.get(key).cloned()
    }

    fn set(&mut self, key: TableKey, cell: Option<BookingCell>) {
        match cell {
            Some(cell) => {
                let booking_id = cell.booking_id;
                if let Some(prev) = self.cells.insert(key.clone(), cell)
                    && prev.booking_id != booking_id
                {
                    self.unindex(&prev.booking_id, &key);
                }
                self.by_booking.entry(booking_id).or_default().insert(key);
            }
            None => {
                if let Some(prev) = self.cells.remove(&key) {
                    self.unindex(&prev.booking_id, &key);
                }
            }
        }
    }

    fn keys_of(&self, booking_id: &BookingId) -> Vec<TableKey> {
        self.by_booking
            .get(booking_id)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn cells(&self) -> Vec<(TableKey, BookingCell)> {
        let mut all: Vec<_> = self
            .cells
            .iter()
            .map(|(k, c)| (k.clone(), c.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    fn len(&self) -> usize {
        self.cells.len()
    }
}

/// A broken table-set or occupancy invariant, as found by [`verify_consistency`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// A cell's table-set differs from the tables actually holding the booking.
    TableSetMismatch {
        booking_id: BookingId,
        key: TableKey,
        listed: Vec<TableId>,
        holding: Vec<TableId>,
    },
    /// A table-set lists the same table twice.
    DuplicateTable { booking_id: BookingId, table: TableId },
    /// One table is claimed by two bookings.
    SharedTable {
        table: TableId,
        first: BookingId,
        second: BookingId,
    },
    /// A terminal booking is still on the floor.
    TerminalCell { booking_id: BookingId, key: TableKey },
}

impl std::fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvariantViolation::TableSetMismatch {
                booking_id,
                key,
                listed,
                holding,
            } => write!(
                f,
                "booking {booking_id} at {key} lists {listed:?} but is held by {holding:?}"
            ),
            InvariantViolation::DuplicateTable { booking_id, table } => {
                write!(f, "booking {booking_id} lists table {table} twice")
            }
            InvariantViolation::SharedTable {
                table,
                first,
                second,
            } => write!(f, "table {table} belongs to both {first} and {second}"),
            InvariantViolation::TerminalCell { booking_id, key } => {
                write!(f, "terminal booking {booking_id} still occupies {key}")
            }
        }
    }
}

impl std::error::Error for InvariantViolation {}

/// Scan the whole store for table-set consistency (every cell of a booking
/// lists exactly the tables holding it), single occupancy, and the absence
/// of terminal cells.
pub fn verify_consistency<S: CellStore + ?Sized>(store: &S) -> Result<(), InvariantViolation> {
    let mut owner: HashMap<TableId, BookingId> = HashMap::new();

    for (key, cell) in store.cells() {
        if cell.status.is_terminal() {
            return Err(InvariantViolation::TerminalCell {
                booking_id: cell.booking_id,
                key,
            });
        }

        let mut listed: BTreeSet<&str> = BTreeSet::new();
        for table in &cell.tables {
            if !listed.insert(table.as_str()) {
                return Err(InvariantViolation::DuplicateTable {
                    booking_id: cell.booking_id,
                    table: table.clone(),
                });
            }
            match owner.get(table) {
                Some(other) if *other != cell.booking_id => {
                    return Err(InvariantViolation::SharedTable {
                        table: table.clone(),
                        first: *other,
                        second: cell.booking_id,
                    });
                }
                Some(_) => {}
                None => {
                    owner.insert(table.clone(), cell.booking_id);
                }
            }
        }

        let holding: BTreeSet<String> = store
            .keys_of(&cell.booking_id)
            .into_iter()
            .map(|k| k.table)
            .collect();
        let listed_owned: BTreeSet<String> = listed.iter().map(|t| t.to_string()).collect();
        if holding != listed_owned {
            return Err(InvariantViolation::TableSetMismatch {
                booking_id: cell.booking_id,
                key,
                listed: cell.tables.clone(),
                holding: holding.into_iter().collect(),
            });
        }
    }
    Ok(())
}
