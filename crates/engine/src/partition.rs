use std::collections::BTreeSet;

use tracing::debug;

use crate::model::{EntityId, EntityTable, LinkedTable};

/// Fine rows split by whether their parent has a coarse value.
#[derive(Debug, Clone, Default)]
pub struct FinePartition {
    pub with_parent: LinkedTable,
    pub without_parent: LinkedTable,
}

/// Coarse rows split by whether any fine row names them as parent.
#[derive(Debug, Clone, Default)]
pub struct CoarsePartition {
    pub with_children: EntityTable,
    pub childless: EntityTable,
}

/// `{fine parent ids} ∩ {coarse ids}`.
pub fn shared_parents(fine: &LinkedTable, coarse: &EntityTable) -> BTreeSet<EntityId> {
    let coarse_ids = coarse.location_ids();
    fine.parent_ids()
        .into_iter()
        .filter(|id| coarse_ids.contains(id))
        .collect()
}

/// Row mask over `parent_id`; every other column is left untouched.
pub fn split_fine(fine: LinkedTable, coarse: &EntityTable) -> FinePartition {
    let shared = shared_parents(&fine, coarse);
    let mut with_parent = LinkedTable::new(fine.dims.clone());
    let mut without_parent = LinkedTable::new(fine.dims);
    for row in fine.rows {
        if shared.contains(&row.parent_id) {
            with_parent.rows.push(row);
        } else {
            without_parent.rows.push(row);
        }
    }
    debug!(
        with_parent = with_parent.len(),
        without_parent = without_parent.len(),
        shared_parents = shared.len(),
        "split fine rows"
    );
    FinePartition {
        with_parent,
        without_parent,
    }
}

/// Restrict the coarse table to ids that appear as a parent in `fine`.
pub fn split_coarse(fine: &LinkedTable, coarse: EntityTable) -> CoarsePartition {
    let shared = shared_parents(fine, &coarse);
    let dims = coarse.dims().to_vec();
    let mut with_children = EntityTable::new(dims.clone());
    let mut childless = EntityTable::new(dims);
    for row in coarse.into_rows() {
        if shared.contains(&row.location_id) {
            with_children.rows_mut().push(row);
        } else {
            childless.rows_mut().push(row);
        }
    }
    CoarsePartition {
        with_children,
        childless,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::{HierarchyIndex, HierarchyRecord};
    use crate::model::Row;

    fn fixture() -> (LinkedTable, EntityTable) {
        let h = HierarchyIndex::from_records(
            5,
            vec![
                HierarchyRecord::new(1, 100, 5),
                HierarchyRecord::new(2, 100, 5),
                HierarchyRecord::new(3, 999, 5),
            ],
        )
        .unwrap();
        let fine = EntityTable::from_rows(
            vec!["sex_id".into()],
            vec![
                Row::new(1, vec![1], 30.0),
                Row::new(2, vec![1], 20.0),
                Row::new(3, vec![1], 5.0),
            ],
        )
        .unwrap();
        let coarse = EntityTable::from_rows(
            vec!["sex_id".into()],
            vec![Row::new(100, vec![1], 100.0), Row::new(200, vec![1], 7.0)],
        )
        .unwrap();
        (h.attach(fine), coarse)
    }

    #[test]
    fn fine_split_by_parent_presence() {
        let (fine, coarse) = fixture();
        let parts = split_fine(fine, &coarse);
        assert_eq!(parts.with_parent.location_ids().into_iter().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(parts.without_parent.location_ids().into_iter().collect::<Vec<_>>(), vec![3]);
        assert_eq!(parts.without_parent.rows[0].value, 5.0);
    }

    #[test]
    fn coarse_split_drops_childless_parents() {
        let (fine, coarse) = fixture();
        let parts = split_coarse(&fine, coarse);
        assert_eq!(parts.with_children.location_ids().into_iter().collect::<Vec<_>>(), vec![100]);
        assert_eq!(parts.childless.location_ids().into_iter().collect::<Vec<_>>(), vec![200]);
    }

    #[test]
    fn empty_inputs_split_to_empty_partitions() {
        let fine = LinkedTable::new(vec!["sex_id".into()]);
        let coarse = EntityTable::new(vec!["sex_id".into()]);
        let parts = split_fine(fine.clone(), &coarse);
        assert!(parts.with_parent.is_empty());
        assert!(parts.without_parent.is_empty());
        assert!(split_coarse(&fine, coarse).with_children.is_empty());
    }
}
