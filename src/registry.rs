use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::model::*;

#[derive(Debug)]
pub enum RegistryError {
    DuplicateArea(AreaId),
    DuplicateTable(TableId),
    UnknownArea { table: TableId, area: AreaId },
    ZeroCapacity(TableId),
    Io(std::io::Error),
    Parse(String),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::DuplicateArea(id) => write!(f, "duplicate area: {id}"),
            RegistryError::DuplicateTable(id) => write!(f, "duplicate table: {id}"),
            RegistryError::UnknownArea { table, area } => {
                write!(f, "table {table} references unknown area {area}")
            }
            RegistryError::ZeroCapacity(id) => write!(f, "table {id} has zero capacity"),
            RegistryError::Io(e) => write!(f, "floor plan I/O error: {e}"),
            RegistryError::Parse(e) => write!(f, "floor plan parse error: {e}"),
        }
    }
}

impl std::error::Error for RegistryError {}

/// On-disk floor plan (JSON).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FloorPlan {
    pub areas: Vec<Area>,
    pub tables: Vec<Table>,
}

/// Static catalog of areas and tables. The engine only reads it.
#[derive(Debug, Clone)]
pub struct TableRegistry {
    /// Sorted by `position`.
    areas: Vec<Area>,
    tables: Vec<Table>,
    by_id: HashMap<TableId, usize>,
}

impl TableRegistry {
    pub fn new(mut areas: Vec<Area>, tables: Vec<Table>) -> Result<Self, RegistryError> {
        let mut area_ids = HashSet::new();
        for area in &areas {
            if !area_ids.insert(area.id.clone()) {
                return Err(RegistryError::DuplicateArea(area.id.clone()));
            }
        }
        let mut by_id = HashMap::with_capacity(tables.len());
        for (i, table) in tables.iter().enumerate() {
            if !area_ids.contains(&table.area) {
                return Err(RegistryError::UnknownArea {
                    table: table.id.clone(),
                    area: table.area.clone(),
                });
            }
            if table.capacity == 0 {
                return Err(RegistryError::ZeroCapacity(table.id.clone()));
            }
            if by_id.insert(table.id.clone(), i).is_some() {
                return Err(RegistryError::DuplicateTable(table.id.clone()));
            }
        }
        areas.sort_by_key(|a| a.position);
        Ok(Self { areas, tables, by_id })
    }

    pub fn from_plan(plan: FloorPlan) -> Result<Self, RegistryError> {
        Self::new(plan.areas, plan.tables)
    }

    /// Load a JSON floor plan from disk.
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let bytes = std::fs::read(path).map_err(RegistryError::Io)?;
        let plan: FloorPlan =
            serde_json::from_slice(&bytes).map_err(|e| RegistryError::Parse(e.to_string()))?;
        Self::from_plan(plan)
    }

    pub fn table(&self, id: &str) -> Option<&Table> {
        self.by_id.get(id).map(|&i| &self.tables[i])
    }

    pub fn area_of(&self, table: &str) -> Option<&AreaId> {
        self.table(table).map(|t| &t.area)
    }

    pub fn capacity_of(&self, table: &str) -> Option<u32> {
        self.table(table).map(|t| t.capacity)
    }

    pub fn key_of(&self, table: &str) -> Option<TableKey> {
        self.table(table)
            .map(|t| TableKey::new(t.area.clone(), t.id.clone()))
    }

    pub fn areas(&self) -> &[Area] {
        &self.areas
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    /// Tables of one area, in catalog order.
    pub fn tables_in<'a>(&'a self, area: &'a str) -> impl Iterator<Item = &'a Table> + 'a {
        self.tables.iter().filter(move |t| t.area == area)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// The venue's standard floor.
    pub fn default_floor() -> Self {
        let areas = vec![
            area("A", "Area A", 1),
            area("B", "Area B", 2),
            area("C", "Area C", 3),
            area("C_SOFA", "Area C - Sofa", 4),
            area("D", "Area D", 5),
            area("D_SOFA", "Area D - Sofa", 6),
            area("E", "Area E", 7),
            area("E_SOFA", "Area E - Sofa", 8),
            area("VIP_E", "VIP Upstairs E", 9),
        ];

        let mut tables = Vec::new();
        numbered(&mut tables, "A", "A", 6, 4, true);
        numbered(&mut tables, "B", "B", 18, 6, true);
        numbered(&mut tables, "C", "C", 15, 4, true);
        numbered(&mut tables, "C_SOFA", "VC", 5, 6, false);
        numbered(&mut tables, "D", "D", 14, 4, true);
        numbered(&mut tables, "D_SOFA", "DVip", 4, 8, false);
        numbered(&mut tables, "E", "E", 11, 4, true);
        numbered(&mut tables, "E_SOFA", "EVip", 6, 8, false);
        numbered(&mut tables, "VIP_E", "SF", 4, 10, false);

        Self::new(areas, tables).unwrap_or_else(|e| panic!("built-in floor is invalid: {e}"))
    }
}

fn area(id: &str, name: &str, position: u32) -> Area {
    Area {
        id: id.into(),
        name: name.into(),
        position,
    }
}

/// Push `count` tables named `{prefix}01..` (zero-padded) or `{prefix}1..`.
fn numbered(out: &mut Vec<Table>, area: &str, prefix: &str, count: u32, capacity: u32, padded: bool) {
    for i in 1..=count {
        let id = if padded {
            format!("{prefix}{i:02}")
        } else {
            format!("{prefix}{i}")
        };
        out.push(Table {
            id: id.clone(),
            name: id,
            area: area.into(),
            capacity,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_floor_layout() {
        let reg = TableRegistry::default_floor();
        assert_eq!(reg.areas().len(), 9);
        assert_eq!(reg.tables_in("A").count(), 6);
        assert_eq!(reg.tables_in("B").count(), 18);
        assert_eq!(reg.tables_in("C").count(), 15);
        assert_eq!(reg.tables_in("C_SOFA").count(), 5);
        assert_eq!(reg.tables_in("D").count(), 14);
        assert_eq!(reg.tables_in("D_SOFA").count(), 4);
        assert_eq!(reg.tables_in("E").count(), 11);
        assert_eq!(reg.tables_in("E_SOFA").count(), 6);
        assert_eq!(reg.tables_in("VIP_E").count(), 4);
        assert_eq!(reg.len(), 83);

        assert_eq!(reg.area_of("A01").map(String::as_str), Some("A"));
        assert_eq!(reg.area_of("DVip3").map(String::as_str), Some("D_SOFA"));
        assert_eq!(reg.capacity_of("SF1"), Some(10));
        assert_eq!(reg.area_of("Z99"), None);
        assert_eq!(reg.key_of("VC2"), Some(TableKey::new("C_SOFA", "VC2")));
    }

    #[test]
    fn areas_sorted_by_position() {
        let reg = TableRegistry::new(
            vec![area("B", "B", 2), area("A", "A", 1)],
            vec![],
        )
        .unwrap();
        let ids: Vec<_> = reg.areas().iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, ["A", "B"]);
    }

    #[test]
    fn rejects_duplicate_table() {
        let t = Table {
            id: "T1".into(),
            name: "T1".into(),
            area: "A".into(),
            capacity: 2,
        };
        let result = TableRegistry::new(vec![area("A", "A", 1)], vec![t.clone(), t]);
        assert!(matches!(result, Err(RegistryError::DuplicateTable(id)) if id == "T1"));
    }

    #[test]
    fn rejects_unknown_area_and_zero_capacity() {
        let orphan = Table {
            id: "T1".into(),
            name: "T1".into(),
            area: "NOPE".into(),
            capacity: 2,
        };
        let result = TableRegistry::new(vec![area("A", "A", 1)], vec![orphan]);
        assert!(matches!(result, Err(RegistryError::UnknownArea { .. })));

        let empty = Table {
            id: "T2".into(),
            name: "T2".into(),
            area: "A".into(),
            capacity: 0,
        };
        let result = TableRegistry::new(vec![area("A", "A", 1)], vec![empty]);
        assert!(matches!(result, Err(RegistryError::ZeroCapacity(_))));
    }

    #[test]
    fn load_plan_from_json() {
        let dir = std::env::temp_dir().join("floorbook_test_registry");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("plan.json");
        std::fs::write(
            &path,
            r#"{
                "areas": [{"id": "P", "name": "Patio", "position": 1}],
                "tables": [
                    {"id": "P1", "name": "Patio 1", "area": "P", "capacity": 2},
                    {"id": "P2", "name": "Patio 2", "area": "P", "capacity": 4}
                ]
            }"#,
        )
        .unwrap();

        let reg = TableRegistry::load(&path).unwrap();
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.capacity_of("P2"), Some(4));

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(TableRegistry::load(&path), Err(RegistryError::Parse(_))));
        let _ = std::fs::remove_file(&path);
    }
}
