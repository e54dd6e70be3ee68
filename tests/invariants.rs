//! Randomized checks of the floor invariants: after any sequence of
//! operations every booking's table-set matches the tables holding it, no
//! table belongs to two bookings, and a rejected operation changes nothing.

use std::collections::HashSet;
use std::sync::Arc;

use proptest::prelude::*;
use tokio_test::block_on;

use floorbook::archive::MemoryArchive;
use floorbook::engine::{Engine, EngineError, InMemoryStore};
use floorbook::model::*;
use floorbook::registry::TableRegistry;

const TABLES: &[&str] = &["A01", "A02", "A03", "A04", "B01", "B02", "Z99", "VC1"];

#[derive(Debug, Clone)]
enum Op {
    Create { table: usize, party: u32 },
    WalkIn { table: usize },
    CheckIn { booking: usize },
    Close { booking: usize, confirm: bool },
    Cancel { booking: usize, reason: bool, manager: bool },
    Merge { source: usize, target: usize, booking: usize },
    Split { table: usize, booking: usize },
    Lock { table: usize, manager: bool },
    Unlock { table: usize },
}

fn arb_table() -> impl Strategy<Value = usize> {
    0..TABLES.len()
}

fn arb_booking() -> impl Strategy<Value = usize> {
    0usize..8
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (arb_table(), 0u32..12).prop_map(|(table, party)| Op::Create { table, party }),
        2 => arb_table().prop_map(|table| Op::WalkIn { table }),
        2 => arb_booking().prop_map(|booking| Op::CheckIn { booking }),
        2 => (arb_booking(), any::<bool>()).prop_map(|(booking, confirm)| Op::Close { booking, confirm }),
        1 => (arb_booking(), any::<bool>(), any::<bool>())
            .prop_map(|(booking, reason, manager)| Op::Cancel { booking, reason, manager }),
        4 => (arb_table(), arb_table(), arb_booking())
            .prop_map(|(source, target, booking)| Op::Merge { source, target, booking }),
        3 => (arb_table(), arb_booking()).prop_map(|(table, booking)| Op::Split { table, booking }),
        1 => (arb_table(), any::<bool>()).prop_map(|(table, manager)| Op::Lock { table, manager }),
        1 => arb_table().prop_map(|table| Op::Unlock { table }),
    ]
}

fn actor(manager: bool) -> Actor {
    if manager {
        Actor::manager("m1")
    } else {
        Actor::staff("s1")
    }
}

/// Pick a known booking id, or a fresh one when none exist yet.
fn pick(ids: &[BookingId], i: usize) -> BookingId {
    if ids.is_empty() {
        ulid::Ulid::new()
    } else {
        ids[i % ids.len()]
    }
}

type TestEngine = Engine<InMemoryStore, Arc<MemoryArchive>>;

async fn apply(engine: &TestEngine, ids: &mut Vec<BookingId>, op: &Op) -> Result<(), EngineError> {
    match *op {
        Op::Create { table, party } => {
            let booking = NewBooking {
                customer_name: "Guest".into(),
                party_size: party,
                ..NewBooking::default()
            };
            let cell = engine.create(TABLES[table], booking, &actor(false)).await?;
            ids.push(cell.booking_id);
        }
        Op::WalkIn { table } => {
            let cell = engine.walk_in(TABLES[table], 2, String::new(), &actor(false)).await?;
            ids.push(cell.booking_id);
        }
        Op::CheckIn { booking } => {
            engine.check_in(pick(ids, booking), &actor(false)).await?;
        }
        Op::Close { booking, confirm } => {
            engine.close(pick(ids, booking), confirm, &actor(false)).await?;
        }
        Op::Cancel { booking, reason, manager } => {
            let reason = if reason { "guest request" } else { "" };
            engine.cancel(pick(ids, booking), reason, &actor(manager)).await?;
        }
        Op::Merge { source, target, booking } => {
            engine
                .merge(TABLES[source], TABLES[target], pick(ids, booking), &actor(false))
                .await?;
        }
        Op::Split { table, booking } => {
            engine.split(TABLES[table], pick(ids, booking), &actor(false)).await?;
        }
        Op::Lock { table, manager } => {
            engine.lock_table(TABLES[table], &actor(manager)).await?;
        }
        Op::Unlock { table } => {
            engine.unlock_table(TABLES[table], &actor(true)).await?;
        }
    }
    Ok(())
}

fn new_engine() -> (TestEngine, Arc<MemoryArchive>) {
    let archive = Arc::new(MemoryArchive::new());
    let engine = Engine::in_memory(Arc::new(TableRegistry::default_floor()), archive.clone());
    (engine, archive)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn random_operations_keep_floor_consistent(ops in prop::collection::vec(arb_op(), 1..60)) {
        let (engine, archive) = new_engine();
        let mut ids = Vec::new();

        block_on(async {
            for op in &ops {
                let before = engine.snapshot().await;
                let locks_before = engine.locked_tables().await;
                let archived_before = archive.len();

                let result = apply(&engine, &mut ids, op).await;

                if let Err(violation) = engine.check_invariants().await {
                    panic!("{violation} after {op:?}");
                }
                if let Err(e) = result {
                    assert_eq!(engine.snapshot().await, before, "{op:?} failed with {e} but changed the floor");
                    assert_eq!(engine.locked_tables().await, locks_before);
                    assert_eq!(archive.len(), archived_before);
                }
            }

            // Archived bookings never come back.
            let archived: HashSet<BookingId> = archive.records().iter().map(|r| r.booking_id).collect();
            assert_eq!(archived.len(), archive.len());
            for (_, cell) in engine.snapshot().await {
                assert!(!archived.contains(&cell.booking_id));
            }
        });
    }

    #[test]
    fn merge_split_sequence_tracks_table_set(steps in prop::collection::vec((any::<bool>(), 0usize..6), 1..40)) {
        let (engine, _) = new_engine();
        let pool = ["D01", "D02", "D03", "D04", "D05", "D06"];

        block_on(async {
            let id = engine
                .walk_in(pool[0], 20, String::new(), &actor(false))
                .await
                .unwrap()
                .booking_id;
            let mut expected = vec![pool[0].to_string()];

            for &(grow, i) in &steps {
                let table = pool[i];
                if grow {
                    let source = expected[0].clone();
                    let result = engine.merge(&source, table, id, &actor(false)).await;
                    if expected.iter().any(|t| t == table) {
                        assert!(matches!(result, Err(EngineError::TableOccupied(_))));
                    } else {
                        expected.push(table.to_string());
                        assert_eq!(result.unwrap(), expected);
                    }
                } else {
                    let result = engine.split(table, id, &actor(false)).await;
                    if !expected.iter().any(|t| t == table) {
                        assert!(matches!(result, Err(EngineError::BookingNotFound(_))));
                    } else if expected.len() == 1 {
                        assert!(matches!(result, Err(EngineError::CannotSplitLastTable(_))));
                    } else {
                        expected.retain(|t| t != table);
                        assert_eq!(result.unwrap(), expected);
                    }
                }

                for t in &expected {
                    let cell = engine.cell(t).await.unwrap().unwrap();
                    assert_eq!(cell.booking_id, id);
                    assert_eq!(&cell.tables, &expected);
                }
                engine.check_invariants().await.unwrap();
            }
        });
    }
}
