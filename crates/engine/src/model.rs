use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::RakeError;
use crate::hierarchy::HierarchyRecord;

/// Integer identifier of a geographic unit.
pub type EntityId = i64;

/// Name of the entity axis in every table.
pub const LOCATION_DIM: &str = "location_id";
/// Realization index; added to fine tables when the coarse table carries it.
pub const DRAW_DIM: &str = "draw";
/// Scenario index; added to fine tables when the coarse table carries it.
pub const SCENARIO_DIM: &str = "scenario";

// ---------------------------------------------------------------------------
// Run identity
// ---------------------------------------------------------------------------

/// One unit of parallel work.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunKey {
    pub cause: String,
    pub scenario: i64,
    pub measure: String,
    pub draw: i64,
}

impl RunKey {
    pub fn new(cause: impl Into<String>, scenario: i64, measure: impl Into<String>, draw: i64) -> Self {
        Self {
            cause: cause.into(),
            scenario,
            measure: measure.into(),
            draw,
        }
    }
}

impl fmt::Display for RunKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}/{}", self.cause, self.scenario, self.measure, self.draw)
    }
}

// ---------------------------------------------------------------------------
// Entity table
// ---------------------------------------------------------------------------

/// Coordinates along a table's stratifying dimensions, in the table's dimension order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Strata(pub Vec<i64>);

impl Strata {
    pub fn get(&self, idx: usize) -> Option<i64> {
        self.0.get(idx).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<i64>> for Strata {
    fn from(coords: Vec<i64>) -> Self {
        Self(coords)
    }
}

impl fmt::Display for Strata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, c) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{c}")?;
        }
        write!(f, ")")
    }
}

/// Key of one cell: entity plus stratum.
pub type CellKey = (EntityId, Strata);

#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub location_id: EntityId,
    pub strata: Strata,
    pub value: f64,
}

impl Row {
    pub fn new(location_id: EntityId, strata: impl Into<Strata>, value: f64) -> Self {
        Self {
            location_id,
            strata: strata.into(),
            value,
        }
    }

    pub fn key(&self) -> CellKey {
        (self.location_id, self.strata.clone())
    }
}

/// Sparse table keyed by (location_id, strata). A missing key means "not estimated".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityTable {
    dims: Vec<String>,
    rows: Vec<Row>,
}

impl EntityTable {
    pub fn new(dims: Vec<String>) -> Self {
        Self {
            dims,
            rows: Vec::new(),
        }
    }

    pub fn from_rows(dims: Vec<String>, rows: Vec<Row>) -> Result<Self, RakeError> {
        if let Some(bad) = rows.iter().find(|r| r.strata.len() != dims.len()) {
            return Err(RakeError::Arity {
                expected: dims.len(),
                found: bad.strata.len(),
            });
        }
        Ok(Self { dims, rows })
    }

    /// Rows already known to match `dims` (rebuilt from another table's rows).
    pub(crate) fn from_parts(dims: Vec<String>, rows: Vec<Row>) -> Self {
        Self { dims, rows }
    }

    /// Stratifying dimensions, excluding the entity axis.
    pub fn dims(&self) -> &[String] {
        &self.dims
    }

    pub fn dim_index(&self, name: &str) -> Option<usize> {
        self.dims.iter().position(|d| d == name)
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn rows_mut(&mut self) -> &mut Vec<Row> {
        &mut self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn location_ids(&self) -> BTreeSet<EntityId> {
        self.rows.iter().map(|r| r.location_id).collect()
    }

    /// Distinct coordinate values along one stratifying dimension.
    pub fn coords(&self, dim: usize) -> BTreeSet<i64> {
        self.rows.iter().filter_map(|r| r.strata.get(dim)).collect()
    }

    pub fn total(&self) -> f64 {
        self.rows.iter().map(|r| r.value).sum()
    }

    pub fn retain<F: FnMut(&Row) -> bool>(&mut self, f: F) {
        self.rows.retain(f);
    }

    /// Stable sort by (location_id, strata).
    pub fn sort(&mut self) {
        self.rows
            .sort_by(|a, b| (a.location_id, &a.strata).cmp(&(b.location_id, &b.strata)));
    }

    pub fn lookup(&self) -> HashMap<CellKey, f64> {
        self.rows.iter().map(|r| (r.key(), r.value)).collect()
    }

    pub fn value(&self, location_id: EntityId, strata: &Strata) -> Option<f64> {
        self.rows
            .iter()
            .find(|r| r.location_id == location_id && &r.strata == strata)
            .map(|r| r.value)
    }

    /// Append a dimension with the same coordinate on every row.
    pub fn with_constant_dim(mut self, name: &str, coord: i64) -> Self {
        self.dims.push(name.to_string());
        for row in &mut self.rows {
            row.strata.0.push(coord);
        }
        self
    }

    /// Permute the stratifying dimensions into `order`, which must name the same set.
    pub fn reorder_dims(mut self, order: &[String]) -> Result<Self, RakeError> {
        if self.dims == order {
            return Ok(self);
        }
        let mismatch = || RakeError::DimensionMismatch {
            fine: self.dims.clone(),
            coarse: order.to_vec(),
        };
        if order.len() != self.dims.len() {
            return Err(mismatch());
        }
        let mut perm = Vec::with_capacity(order.len());
        for name in order {
            match self.dim_index(name) {
                Some(idx) => perm.push(idx),
                None => return Err(mismatch()),
            }
        }
        for row in &mut self.rows {
            let coords: Vec<i64> = perm.iter().map(|&i| row.strata.0[i]).collect();
            row.strata = Strata(coords);
        }
        self.dims = order.to_vec();
        Ok(self)
    }
}

// ---------------------------------------------------------------------------
// Hierarchy-linked table
// ---------------------------------------------------------------------------

/// A fine-level row joined with its hierarchy record.
#[derive(Debug, Clone)]
pub struct LinkedRow {
    pub location_id: EntityId,
    pub parent_id: EntityId,
    pub strata: Strata,
    pub value: f64,
    pub record: Arc<HierarchyRecord>,
}

#[derive(Debug, Clone, Default)]
pub struct LinkedTable {
    pub dims: Vec<String>,
    pub rows: Vec<LinkedRow>,
}

impl LinkedTable {
    pub fn new(dims: Vec<String>) -> Self {
        Self {
            dims,
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn location_ids(&self) -> BTreeSet<EntityId> {
        self.rows.iter().map(|r| r.location_id).collect()
    }

    pub fn parent_ids(&self) -> BTreeSet<EntityId> {
        self.rows.iter().map(|r| r.parent_id).collect()
    }

    /// Drop hierarchy metadata, keeping only the keyed value.
    pub fn project(self) -> EntityTable {
        let rows = self
            .rows
            .into_iter()
            .map(|r| Row {
                location_id: r.location_id,
                strata: r.strata,
                value: r.value,
            })
            .collect();
        EntityTable {
            dims: self.dims,
            rows,
        }
    }
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
pub struct RakeSummary {
    /// Distinct fine ids as loaded, before id canonicalization.
    pub fine_entities_loaded: usize,
    /// Retired ids folded into their successors.
    pub retired_ids_folded: usize,
    /// Distinct fine ids that matched the hierarchy (the pre-partition id set).
    pub fine_entities_aligned: usize,
    pub fine_entities_out: usize,
    pub fine_rows_out: usize,
    pub with_parent_entities: usize,
    pub without_parent_entities: usize,
    pub coarse_parents_raked: usize,
    pub coarse_parents_childless: usize,
    pub factors: usize,
    /// Factors forced to 1.0 because the parent value or the children sum was zero.
    pub degenerate_factors: usize,
    /// Coarse cells with no children sum for their stratum.
    pub missing_children_sums: usize,
    /// Fine rows whose (parent, stratum) had no coarse value; left unchanged.
    pub unmatched_fine_rows: usize,
    /// Largest |sum(children) - parent| over non-degenerate groups after raking.
    pub max_conservation_residual: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RakeMeta {
    pub run: RunKey,
    pub engine_version: String,
    pub run_at: String,
}

#[derive(Debug, Clone)]
pub struct RakeResult {
    pub meta: RakeMeta,
    pub summary: RakeSummary,
    pub table: EntityTable,
}
