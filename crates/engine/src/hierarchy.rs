use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::RakeError;
use crate::model::{EntityId, EntityTable, LinkedRow, LinkedTable};

/// One row of the location hierarchy.
#[derive(Debug, Clone, PartialEq)]
pub struct HierarchyRecord {
    pub location_id: EntityId,
    pub parent_id: EntityId,
    pub level: i64,
    /// Descriptive columns (names, paths) carried through the join.
    pub metadata: BTreeMap<String, String>,
}

impl HierarchyRecord {
    pub fn new(location_id: EntityId, parent_id: EntityId, level: i64) -> Self {
        Self {
            location_id,
            parent_id,
            level,
            metadata: BTreeMap::new(),
        }
    }
}

/// Immutable fine id → parent id mapping at one hierarchy depth.
#[derive(Debug, Clone, Default)]
pub struct HierarchyIndex {
    level: i64,
    records: BTreeMap<EntityId, Arc<HierarchyRecord>>,
}

impl HierarchyIndex {
    /// Keep the records at `level`. A location listed twice at that level is rejected.
    pub fn from_records<I>(level: i64, records: I) -> Result<Self, RakeError>
    where
        I: IntoIterator<Item = HierarchyRecord>,
    {
        let mut index = BTreeMap::new();
        let mut skipped = 0usize;
        for record in records {
            if record.level != level {
                skipped += 1;
                continue;
            }
            let id = record.location_id;
            if index.insert(id, Arc::new(record)).is_some() {
                return Err(RakeError::DuplicateKey {
                    input: "hierarchy".into(),
                    key: format!("location_id={id}"),
                });
            }
        }
        debug!(level, kept = index.len(), skipped, "hierarchy index built");
        Ok(Self {
            level,
            records: index,
        })
    }

    pub fn level(&self) -> i64 {
        self.level
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, location_id: EntityId) -> bool {
        self.records.contains_key(&location_id)
    }

    pub fn parent_of(&self, location_id: EntityId) -> Option<EntityId> {
        self.records.get(&location_id).map(|r| r.parent_id)
    }

    pub fn record(&self, location_id: EntityId) -> Option<&HierarchyRecord> {
        self.records.get(&location_id).map(|r| r.as_ref())
    }

    /// Location ids at this level, ascending.
    pub fn location_ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.records.keys().copied()
    }

    /// Join hierarchy records onto a table. Rows without a record are dropped.
    pub fn attach(&self, table: EntityTable) -> LinkedTable {
        let dims = table.dims().to_vec();
        let mut linked = LinkedTable::new(dims);
        for row in table.into_rows() {
            if let Some(record) = self.records.get(&row.location_id) {
                linked.rows.push(LinkedRow {
                    location_id: row.location_id,
                    parent_id: record.parent_id,
                    strata: row.strata,
                    value: row.value,
                    record: Arc::clone(record),
                });
            }
        }
        linked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Row;

    fn hierarchy() -> HierarchyIndex {
        HierarchyIndex::from_records(
            5,
            vec![
                HierarchyRecord::new(100, 10, 4),
                HierarchyRecord::new(501, 100, 5),
                HierarchyRecord::new(502, 100, 5),
                HierarchyRecord::new(503, 200, 5),
            ],
        )
        .unwrap()
    }

    #[test]
    fn filters_to_target_level() {
        let h = hierarchy();
        assert_eq!(h.level(), 5);
        assert_eq!(h.len(), 3);
        assert!(!h.contains(100));
        assert_eq!(h.parent_of(501), Some(100));
        assert_eq!(h.parent_of(503), Some(200));
        assert_eq!(h.parent_of(999), None);
        assert_eq!(h.location_ids().collect::<Vec<_>>(), vec![501, 502, 503]);
    }

    #[test]
    fn duplicate_location_at_level_is_rejected() {
        let err = HierarchyIndex::from_records(
            5,
            vec![HierarchyRecord::new(501, 100, 5), HierarchyRecord::new(501, 101, 5)],
        )
        .unwrap_err();
        assert!(err.to_string().contains("location_id=501"));
    }

    #[test]
    fn attach_carries_parent_and_metadata() {
        let mut record = HierarchyRecord::new(501, 100, 5);
        record.metadata.insert("location_name".into(), "Kano North".into());
        let h = HierarchyIndex::from_records(5, vec![record]).unwrap();

        let table = EntityTable::from_rows(
            vec!["sex_id".into()],
            vec![Row::new(501, vec![1], 3.0), Row::new(777, vec![1], 9.0)],
        )
        .unwrap();
        let linked = h.attach(table);
        assert_eq!(linked.len(), 1);
        assert_eq!(linked.rows[0].parent_id, 100);
        assert_eq!(linked.rows[0].record.metadata["location_name"], "Kano North");
    }
}
