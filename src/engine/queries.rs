use std::collections::HashSet;

use crate::archive::Archive;
use crate::limits::MAX_SEARCH_RESULTS;
use crate::model::*;

use super::lifecycle::load_booking;
use super::{verify_consistency, CellStore, Engine, EngineError, InvariantViolation};

impl<S: CellStore, A: Archive> Engine<S, A> {
    /// The booking at a table, or `None` when it is EMPTY.
    pub async fn cell(&self, table: &str) -> Result<Option<BookingCell>, EngineError> {
        let key = self.resolve_key(table)?;
        Ok(self.cells.read().await.get(&key))
    }

    /// Any one cell of a live booking; every cell carries the same data.
    pub async fn booking(&self, booking_id: BookingId) -> Result<BookingCell, EngineError> {
        let cells = self.cells.read().await;
        load_booking(&*cells, booking_id).map(|(cell, _)| cell)
    }

    /// The whole floor: areas in display order, each table with its cell and
    /// lock flag. Read under both locks, so it is one consistent picture.
    pub async fn floor(&self) -> Vec<AreaView> {
        let cells = self.cells.read().await;
        let locks = self.locks.read().await;
        let registry = self.registry();

        registry
            .areas()
            .iter()
            .map(|area| AreaView {
                area: area.clone(),
                tables: registry
                    .tables_in(&area.id)
                    .map(|table| TableView {
                        table: table.clone(),
                        cell: cells.get(&TableKey::new(area.id.clone(), table.id.clone())),
                        locked: locks.contains_key(&table.id),
                    })
                    .collect(),
            })
            .collect()
    }

    /// Dashboard counters. Counts tables, not bookings: a booking merged
    /// across three tables contributes three to its status.
    pub async fn summary(&self) -> FloorSummary {
        let cells = self.cells.read().await;
        let locks = self.locks.read().await;

        let mut summary = FloorSummary {
            tables: self.registry().len(),
            locked: locks.len(),
            ..FloorSummary::default()
        };
        for (_, cell) in cells.cells() {
            match cell.status {
                Status::Hold => summary.hold += 1,
                Status::Seated => summary.seated += 1,
                Status::WalkIn => summary.walk_in += 1,
                Status::Closed | Status::Cancelled => {}
            }
        }
        summary.empty = summary.tables.saturating_sub(cells.len());
        summary
    }

    /// Live bookings whose customer name or phone contains `query`,
    /// case-insensitive, one hit per booking.
    pub async fn search(&self, query: &str) -> Vec<BookingCell> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }

        let cells = self.cells.read().await;
        let mut seen = HashSet::new();
        let mut hits = Vec::new();
        for (_, cell) in cells.cells() {
            let Some(customer) = &cell.customer else {
                continue;
            };
            let matches = customer.name.to_lowercase().contains(&needle)
                || customer
                    .phone
                    .as_deref()
                    .is_some_and(|p| p.to_lowercase().contains(&needle));
            if matches && seen.insert(cell.booking_id) {
                hits.push(cell);
                if hits.len() == MAX_SEARCH_RESULTS {
                    break;
                }
            }
        }
        hits
    }

    /// Total seats across the booking's table-set.
    pub async fn seating_capacity(&self, booking_id: BookingId) -> Result<u32, EngineError> {
        let cell = self.booking(booking_id).await?;
        Ok(cell
            .tables
            .iter()
            .filter_map(|t| self.registry().capacity_of(t))
            .sum())
    }

    pub async fn check_invariants(&self) -> Result<(), InvariantViolation> {
        verify_consistency(&*self.cells.read().await)
    }

    /// Every occupied cell, sorted by key.
    pub async fn snapshot(&self) -> Vec<(TableKey, BookingCell)> {
        self.cells.read().await.cells()
    }
}
