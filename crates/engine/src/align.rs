use std::collections::{BTreeSet, HashSet};

use tracing::debug;

use crate::error::RakeError;
use crate::hierarchy::HierarchyIndex;
use crate::model::{EntityId, EntityTable, RunKey, DRAW_DIM, SCENARIO_DIM};

/// Give the fine table the coarse table's dimension layout.
///
/// The run's draw and scenario are added as constant dimensions when the coarse
/// table carries them and the fine table does not, then the fine dimensions are
/// reordered to the coarse order.
pub fn conform_dims(
    fine: EntityTable,
    coarse: &EntityTable,
    run: &RunKey,
) -> Result<EntityTable, RakeError> {
    let mut fine = fine;
    for (dim, coord) in [(DRAW_DIM, run.draw), (SCENARIO_DIM, run.scenario)] {
        if coarse.dim_index(dim).is_some() && fine.dim_index(dim).is_none() {
            fine = fine.with_constant_dim(dim, coord);
        }
    }
    fine.reorder_dims(coarse.dims())
}

/// Restrict the coarse table to coordinates that also occur in the fine table,
/// dimension by dimension.
pub fn align_dims(coarse: EntityTable, fine: &EntityTable) -> Result<EntityTable, RakeError> {
    if coarse.dims() != fine.dims() {
        return Err(RakeError::DimensionMismatch {
            fine: fine.dims().to_vec(),
            coarse: coarse.dims().to_vec(),
        });
    }

    let allowed: Vec<HashSet<i64>> = (0..fine.dims().len())
        .map(|d| fine.coords(d).into_iter().collect())
        .collect();

    let before = coarse.len();
    let mut coarse = coarse;
    coarse.retain(|row| {
        row.strata
            .0
            .iter()
            .zip(&allowed)
            .all(|(coord, keep)| keep.contains(coord))
    });
    debug!(before, after = coarse.len(), "aligned coarse coordinates to fine");
    Ok(coarse)
}

/// Restrict a table to the ids it shares with the hierarchy, ordered by id.
pub fn align_ids(hierarchy: &HierarchyIndex, table: EntityTable) -> EntityTable {
    let table_ids = table.location_ids();
    let common: BTreeSet<EntityId> = hierarchy
        .location_ids()
        .filter(|id| table_ids.contains(id))
        .collect();

    let before = table_ids.len();
    let mut table = table;
    table.retain(|row| common.contains(&row.location_id));
    table.sort();
    debug!(before, after = common.len(), "aligned fine ids to hierarchy");
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::HierarchyRecord;
    use crate::model::{Row, Strata};

    fn dims(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn conform_adds_run_dims_and_reorders() {
        let coarse = EntityTable::new(dims(&["age_group_id", "sex_id", "draw", "scenario"]));
        let fine = EntityTable::from_rows(
            dims(&["sex_id", "age_group_id"]),
            vec![Row::new(501, vec![1, 22], 3.0)],
        )
        .unwrap();
        let run = RunKey::new("malaria", 75, "death", 4);

        let fine = conform_dims(fine, &coarse, &run).unwrap();
        assert_eq!(fine.dims(), coarse.dims());
        assert_eq!(fine.rows()[0].strata, Strata(vec![22, 1, 4, 75]));
    }

    #[test]
    fn conform_skips_run_dims_the_coarse_table_lacks() {
        let coarse = EntityTable::new(dims(&["sex_id"]));
        let fine = EntityTable::new(dims(&["sex_id"]));
        let run = RunKey::new("dengue", 0, "yll", 0);
        let fine = conform_dims(fine, &coarse, &run).unwrap();
        assert_eq!(fine.dims(), &dims(&["sex_id"])[..]);
    }

    #[test]
    fn conform_rejects_extra_fine_dims() {
        let coarse = EntityTable::new(dims(&["sex_id"]));
        let fine = EntityTable::new(dims(&["sex_id", "year_id"]));
        let run = RunKey::new("dengue", 0, "yll", 0);
        assert!(matches!(
            conform_dims(fine, &coarse, &run),
            Err(RakeError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn align_dims_intersects_each_dimension() {
        let coarse = EntityTable::from_rows(
            dims(&["age_group_id", "sex_id"]),
            vec![
                Row::new(10, vec![22, 1], 1.0),
                Row::new(10, vec![22, 3], 1.0),
                Row::new(10, vec![27, 1], 1.0),
            ],
        )
        .unwrap();
        let fine = EntityTable::from_rows(
            dims(&["age_group_id", "sex_id"]),
            vec![Row::new(501, vec![22, 1], 1.0), Row::new(501, vec![22, 2], 1.0)],
        )
        .unwrap();

        let coarse = align_dims(coarse, &fine).unwrap();
        assert_eq!(coarse.len(), 1);
        assert_eq!(coarse.rows()[0].strata, Strata(vec![22, 1]));
    }

    #[test]
    fn align_ids_keeps_the_sorted_intersection() {
        let h = HierarchyIndex::from_records(
            5,
            vec![
                HierarchyRecord::new(503, 10, 5),
                HierarchyRecord::new(501, 10, 5),
                HierarchyRecord::new(600, 11, 5),
            ],
        )
        .unwrap();
        let table = EntityTable::from_rows(
            dims(&["sex_id"]),
            vec![
                Row::new(503, vec![1], 1.0),
                Row::new(999, vec![1], 1.0),
                Row::new(501, vec![1], 1.0),
            ],
        )
        .unwrap();

        let out = align_ids(&h, table);
        let ids: Vec<_> = out.rows().iter().map(|r| r.location_id).collect();
        assert_eq!(ids, vec![501, 503]);
    }

    #[test]
    fn align_ids_with_no_overlap_is_empty() {
        let h = HierarchyIndex::from_records(5, vec![HierarchyRecord::new(1, 0, 5)]).unwrap();
        let table =
            EntityTable::from_rows(dims(&["sex_id"]), vec![Row::new(2, vec![1], 1.0)]).unwrap();
        assert!(align_ids(&h, table).is_empty());
    }
}
