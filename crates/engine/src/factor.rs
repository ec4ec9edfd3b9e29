use std::collections::HashMap;

use tracing::debug;

use crate::model::{CellKey, EntityId, EntityTable, LinkedTable, Strata};

/// True when the factor is pinned to 1.0.
pub fn is_degenerate(authoritative: f64, children_sum: f64) -> bool {
    authoritative == 0.0 || children_sum == 0.0
}

/// Parent value over children sum; 1.0 when either side is zero.
pub fn raking_factor(authoritative: f64, children_sum: f64) -> f64 {
    if is_degenerate(authoritative, children_sum) {
        1.0
    } else {
        authoritative / children_sum
    }
}

/// Sum fine values by (parent_id, stratum).
pub fn child_sums(fine: &LinkedTable) -> HashMap<CellKey, f64> {
    let mut sums: HashMap<CellKey, f64> = HashMap::new();
    for row in &fine.rows {
        *sums.entry((row.parent_id, row.strata.clone())).or_insert(0.0) += row.value;
    }
    sums
}

/// One factor per (coarse id, stratum).
#[derive(Debug, Clone, Default)]
pub struct RakingFactors {
    factors: HashMap<CellKey, f64>,
    /// Factors forced to 1.0 by a zero parent value or zero children sum.
    pub degenerate: usize,
    /// Coarse cells whose stratum has no children at all.
    pub missing_children: usize,
}

impl RakingFactors {
    pub fn get(&self, parent_id: EntityId, strata: &Strata) -> Option<f64> {
        self.factors.get(&(parent_id, strata.clone())).copied()
    }

    pub fn len(&self) -> usize {
        self.factors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }

    /// Factors ordered by (parent, stratum).
    pub fn sorted(&self) -> Vec<(CellKey, f64)> {
        let mut out: Vec<_> = self.factors.iter().map(|(k, v)| (k.clone(), *v)).collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

/// Compute factors for every coarse cell, reindexed to the coarse id set.
pub fn compute_factors(fine_with_parent: &LinkedTable, coarse: &EntityTable) -> RakingFactors {
    let sums = child_sums(fine_with_parent);
    let mut out = RakingFactors::default();

    for row in coarse.rows() {
        let key = row.key();
        let Some(&sum) = sums.get(&key) else {
            out.missing_children += 1;
            continue;
        };
        if is_degenerate(row.value, sum) {
            out.degenerate += 1;
        }
        out.factors.insert(key, raking_factor(row.value, sum));
    }

    debug!(
        factors = out.factors.len(),
        degenerate = out.degenerate,
        missing_children = out.missing_children,
        "computed raking factors"
    );
    out
}

/// Largest |sum(children) - parent| over coarse cells with a non-degenerate factor.
pub fn conservation_residual(
    raked: &LinkedTable,
    coarse: &EntityTable,
    before: &HashMap<CellKey, f64>,
) -> f64 {
    let after = child_sums(raked);
    let mut worst = 0.0f64;
    for row in coarse.rows() {
        let key = row.key();
        let (Some(&pre), Some(&post)) = (before.get(&key), after.get(&key)) else {
            continue;
        };
        if is_degenerate(row.value, pre) {
            continue;
        }
        worst = worst.max((post - row.value).abs());
    }
    worst
}
