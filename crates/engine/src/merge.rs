use tracing::debug;

use crate::error::RakeError;
use crate::model::{EntityTable, LinkedTable};

/// Concatenate the raked and untouched partitions along the entity axis.
pub fn merge_partitions(raked: LinkedTable, untouched: LinkedTable) -> Result<LinkedTable, RakeError> {
    if raked.dims != untouched.dims {
        return Err(RakeError::Merge(format!(
            "partitions disagree on dimensions: {:?} vs {:?}",
            raked.dims, untouched.dims
        )));
    }
    let raked_ids = raked.location_ids();
    if let Some(id) = untouched.location_ids().into_iter().find(|id| raked_ids.contains(id)) {
        return Err(RakeError::Merge(format!(
            "location {id} appears in both partitions"
        )));
    }

    let mut merged = raked;
    merged.rows.extend(untouched.rows);
    debug!(rows = merged.len(), "merged partitions");
    Ok(merged)
}

/// Keep only location, strata and value, ordered by (location, strata).
pub fn project_values(merged: LinkedTable) -> EntityTable {
    let mut table = merged.project();
    table.sort();
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::{HierarchyIndex, HierarchyRecord};
    use crate::model::Row;

    fn linked(rows: Vec<Row>) -> LinkedTable {
        let h = HierarchyIndex::from_records(
            5,
            vec![
                HierarchyRecord::new(1, 100, 5),
                HierarchyRecord::new(2, 100, 5),
                HierarchyRecord::new(3, 999, 5),
            ],
        )
        .unwrap();
        h.attach(EntityTable::from_rows(vec!["sex_id".into()], rows).unwrap())
    }

    #[test]
    fn merge_then_project() {
        let raked = linked(vec![Row::new(2, vec![1], 40.0), Row::new(1, vec![1], 60.0)]);
        let untouched = linked(vec![Row::new(3, vec![1], 5.0)]);
        let merged = merge_partitions(raked, untouched).unwrap();
        let table = project_values(merged);
        let ids: Vec<_> = table.rows().iter().map(|r| r.location_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(table.total(), 105.0);
    }

    #[test]
    fn overlapping_partitions_are_rejected() {
        let raked = linked(vec![Row::new(1, vec![1], 1.0)]);
        let untouched = linked(vec![Row::new(1, vec![2], 1.0)]);
        let err = merge_partitions(raked, untouched).unwrap_err();
        assert!(err.to_string().contains("location 1"));
    }

    #[test]
    fn empty_partitions_merge_to_empty() {
        let merged = merge_partitions(
            LinkedTable::new(vec!["sex_id".into()]),
            LinkedTable::new(vec!["sex_id".into()]),
        )
        .unwrap();
        assert!(project_values(merged).is_empty());
    }
}
