use tracing::debug;

use crate::factor::RakingFactors;
use crate::model::LinkedTable;

#[derive(Debug, Clone, Default)]
pub struct ApplyOutcome {
    pub raked: LinkedTable,
    /// Rows with no factor for their (parent, stratum); values left as they were.
    pub unmatched_rows: usize,
}

/// Multiply every child by its parent's factor for the same stratum.
pub fn apply_factors(fine_with_parent: LinkedTable, factors: &RakingFactors) -> ApplyOutcome {
    let mut raked = fine_with_parent;
    let mut unmatched_rows = 0usize;
    for row in &mut raked.rows {
        match factors.get(row.parent_id, &row.strata) {
            Some(factor) => row.value *= factor,
            None => unmatched_rows += 1,
        }
    }
    if unmatched_rows > 0 {
        debug!(unmatched_rows, "fine rows without a coarse value for their stratum");
    }
    ApplyOutcome {
        raked,
        unmatched_rows,
    }
}
