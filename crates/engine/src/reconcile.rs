use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::RakeError;
use crate::model::{CellKey, EntityId, EntityTable, Row};

/// Fixed rewrite map from retired location ids to their canonical successors.
///
/// The map is non-recursive: no successor may itself be a retired id, so a
/// single pass reaches the canonical form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, EntityId>", into = "BTreeMap<String, EntityId>")]
pub struct ImputeMap(BTreeMap<EntityId, EntityId>);

impl ImputeMap {
    pub fn new<I: IntoIterator<Item = (EntityId, EntityId)>>(pairs: I) -> Result<Self, RakeError> {
        let map = Self(pairs.into_iter().collect());
        map.validate()?;
        Ok(map)
    }

    pub fn validate(&self) -> Result<(), RakeError> {
        for (old, new) in &self.0 {
            if self.0.contains_key(new) {
                return Err(RakeError::ConfigValidation(format!(
                    "impute map is recursive: {old} -> {new}, but {new} is itself remapped"
                )));
            }
        }
        Ok(())
    }

    pub fn get(&self, old: EntityId) -> Option<EntityId> {
        self.0.get(&old).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityId, EntityId)> + '_ {
        self.0.iter().map(|(k, v)| (*k, *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl TryFrom<BTreeMap<String, EntityId>> for ImputeMap {
    type Error = RakeError;

    fn try_from(raw: BTreeMap<String, EntityId>) -> Result<Self, Self::Error> {
        let mut pairs = Vec::with_capacity(raw.len());
        for (old, new) in raw {
            let old: EntityId = old.trim().parse().map_err(|_| {
                RakeError::ConfigValidation(format!("impute key '{old}' is not a location id"))
            })?;
            pairs.push((old, new));
        }
        Self::new(pairs)
    }
}

impl From<ImputeMap> for BTreeMap<String, EntityId> {
    fn from(map: ImputeMap) -> Self {
        map.0.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }
}

/// Fold retired ids into their successors.
///
/// Rows of a retired id are added cell-by-cell into the successor's rows; cells
/// the successor lacks are carried over under the successor's id. Retired rows
/// are then gone, so a second pass is a no-op.
pub fn reconcile_ids(table: EntityTable, map: &ImputeMap) -> (EntityTable, usize) {
    if map.is_empty() {
        return (table, 0);
    }
    let retired_present: Vec<EntityId> = table
        .location_ids()
        .into_iter()
        .filter(|id| map.get(*id).is_some())
        .collect();
    if retired_present.is_empty() {
        return (table, 0);
    }

    let dims = table.dims().to_vec();
    let mut kept: Vec<Row> = Vec::with_capacity(table.len());
    let mut retired: Vec<Row> = Vec::new();
    for row in table.into_rows() {
        if map.get(row.location_id).is_some() {
            retired.push(row);
        } else {
            kept.push(row);
        }
    }

    // Index successor cells so retired values can be summed in place.
    let successors: HashSet<EntityId> = map.iter().map(|(_, new)| new).collect();
    let mut slots: HashMap<CellKey, usize> = HashMap::new();
    for (i, row) in kept.iter().enumerate() {
        if successors.contains(&row.location_id) {
            slots.insert(row.key(), i);
        }
    }

    let mut merged = 0usize;
    let mut relabeled = 0usize;
    for row in retired {
        let Some(new_id) = map.get(row.location_id) else {
            continue;
        };
        let key = (new_id, row.strata.clone());
        match slots.get(&key) {
            Some(&i) => {
                kept[i].value += row.value;
                merged += 1;
            }
            None => {
                slots.insert(key, kept.len());
                kept.push(Row {
                    location_id: new_id,
                    strata: row.strata,
                    value: row.value,
                });
                relabeled += 1;
            }
        }
    }

    debug!(
        retired = ?retired_present,
        merged,
        relabeled,
        "folded retired location ids"
    );

    let mut out = EntityTable::from_parts(dims, kept);
    out.sort();
    (out, retired_present.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Strata;

    fn default_map() -> ImputeMap {
        ImputeMap::new([(60908, 44858), (95069, 44858), (94364, 44858)]).unwrap()
    }

    fn table(rows: Vec<Row>) -> EntityTable {
        EntityTable::from_rows(vec!["sex_id".into()], rows).unwrap()
    }

    #[test]
    fn sums_into_existing_successor() {
        let t = table(vec![
            Row::new(44858, vec![1], 10.0),
            Row::new(44858, vec![2], 20.0),
            Row::new(60908, vec![1], 1.5),
            Row::new(60908, vec![2], 2.5),
            Row::new(7, vec![1], 99.0),
        ]);
        let (out, folded) = reconcile_ids(t, &default_map());
        assert_eq!(folded, 1);
        assert_eq!(out.value(44858, &Strata(vec![1])), Some(11.5));
        assert_eq!(out.value(44858, &Strata(vec![2])), Some(22.5));
        assert_eq!(out.value(7, &Strata(vec![1])), Some(99.0));
        assert!(!out.location_ids().contains(&60908));
    }

    #[test]
    fn relabels_when_successor_absent() {
        let t = table(vec![Row::new(95069, vec![1], 4.0)]);
        let (out, _) = reconcile_ids(t, &default_map());
        assert_eq!(out.location_ids().into_iter().collect::<Vec<_>>(), vec![44858]);
        assert_eq!(out.value(44858, &Strata(vec![1])), Some(4.0));
    }

    #[test]
    fn two_retired_ids_into_one_successor() {
        let t = table(vec![Row::new(95069, vec![1], 4.0), Row::new(94364, vec![1], 6.0)]);
        let (out, folded) = reconcile_ids(t, &default_map());
        assert_eq!(folded, 2);
        assert_eq!(out.len(), 1);
        assert_eq!(out.value(44858, &Strata(vec![1])), Some(10.0));
    }

    #[test]
    fn second_pass_is_a_no_op() {
        let t = table(vec![
            Row::new(44858, vec![1], 1.0),
            Row::new(60908, vec![1], 2.0),
            Row::new(94364, vec![2], 3.0),
        ]);
        let (once, _) = reconcile_ids(t, &default_map());
        let (twice, folded) = reconcile_ids(once.clone(), &default_map());
        assert_eq!(folded, 0);
        assert_eq!(once, twice);
    }

    #[test]
    fn recursive_map_is_rejected() {
        let err = ImputeMap::new([(1, 2), (2, 3)]).unwrap_err();
        assert!(err.to_string().contains("recursive"));
    }

    #[test]
    fn parses_from_string_keys() {
        let raw = BTreeMap::from([("60908".to_string(), 44858)]);
        let map = ImputeMap::try_from(raw).unwrap();
        assert_eq!(map.get(60908), Some(44858));

        let bad = BTreeMap::from([("abc".to_string(), 1)]);
        assert!(ImputeMap::try_from(bad).is_err());
    }
}
