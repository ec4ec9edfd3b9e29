//! Two-phase execution: declare the stage list over named table handles,
//! check it, then run it once.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::Serialize;
use tracing::{debug, debug_span};

use crate::align::{align_dims, align_ids, conform_dims};
use crate::apply::apply_factors;
use crate::error::RakeError;
use crate::factor::{child_sums, compute_factors, conservation_residual, RakingFactors};
use crate::hierarchy::HierarchyIndex;
use crate::merge::{merge_partitions, project_values};
use crate::model::{CellKey, EntityTable, LinkedTable, RakeSummary, RunKey};
use crate::partition::{split_coarse, split_fine};
use crate::reconcile::{reconcile_ids, ImputeMap};

// ---------------------------------------------------------------------------
// Handles + stages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Handle {
    Fine,
    Coarse,
    Hierarchy,
    Linked,
    FineWithParent,
    FineWithoutParent,
    CoarseRestricted,
    Factors,
    Raked,
    Merged,
    Output,
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Fine => "fine",
            Self::Coarse => "coarse",
            Self::Hierarchy => "hierarchy",
            Self::Linked => "linked",
            Self::FineWithParent => "fine_with_parent",
            Self::FineWithoutParent => "fine_without_parent",
            Self::CoarseRestricted => "coarse_restricted",
            Self::Factors => "factors",
            Self::Raked => "raked",
            Self::Merged => "merged",
            Self::Output => "output",
        };
        write!(f, "{name}")
    }
}

/// Handles available before the first stage runs.
pub const SOURCES: [Handle; 3] = [Handle::Fine, Handle::Coarse, Handle::Hierarchy];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    ReconcileIds,
    ConformDims,
    AlignDims,
    AlignIds,
    AttachHierarchy,
    SplitFine,
    SplitCoarse,
    ComputeFactors,
    ApplyFactors,
    CheckConservation,
    Merge,
    Project,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Self::ReconcileIds => "reconcile_ids",
            Self::ConformDims => "conform_dims",
            Self::AlignDims => "align_dims",
            Self::AlignIds => "align_ids",
            Self::AttachHierarchy => "attach_hierarchy",
            Self::SplitFine => "split_fine",
            Self::SplitCoarse => "split_coarse",
            Self::ComputeFactors => "compute_factors",
            Self::ApplyFactors => "apply_factors",
            Self::CheckConservation => "check_conservation",
            Self::Merge => "merge",
            Self::Project => "project",
        }
    }

    /// Handles the stage reads.
    pub fn inputs(self) -> &'static [Handle] {
        use Handle::*;
        match self {
            Self::ReconcileIds => &[Fine],
            Self::ConformDims => &[Fine, Coarse],
            Self::AlignDims => &[Coarse, Fine],
            Self::AlignIds => &[Hierarchy, Fine],
            Self::AttachHierarchy => &[Hierarchy, Fine],
            Self::SplitFine => &[Linked, Coarse],
            Self::SplitCoarse => &[FineWithParent, Coarse],
            Self::ComputeFactors => &[FineWithParent, CoarseRestricted],
            Self::ApplyFactors => &[FineWithParent, Factors],
            Self::CheckConservation => &[Raked, CoarseRestricted],
            Self::Merge => &[Raked, FineWithoutParent],
            Self::Project => &[Merged],
        }
    }

    /// Inputs the stage takes by value; they are gone afterwards.
    pub fn consumes(self) -> &'static [Handle] {
        use Handle::*;
        match self {
            Self::ReconcileIds | Self::ConformDims | Self::AlignIds => &[Fine],
            Self::AlignDims => &[Coarse],
            Self::AttachHierarchy => &[Fine],
            Self::SplitFine => &[Linked],
            Self::SplitCoarse => &[Coarse],
            Self::ComputeFactors | Self::CheckConservation => &[],
            Self::ApplyFactors => &[FineWithParent],
            Self::Merge => &[Raked, FineWithoutParent],
            Self::Project => &[Merged],
        }
    }

    pub fn outputs(self) -> &'static [Handle] {
        use Handle::*;
        match self {
            Self::ReconcileIds | Self::ConformDims | Self::AlignIds => &[Fine],
            Self::AlignDims => &[Coarse],
            Self::AttachHierarchy => &[Linked],
            Self::SplitFine => &[FineWithParent, FineWithoutParent],
            Self::SplitCoarse => &[CoarseRestricted],
            Self::ComputeFactors => &[Factors],
            Self::ApplyFactors => &[Raked],
            Self::CheckConservation => &[],
            Self::Merge => &[Merged],
            Self::Project => &[Output],
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |hs: &[Handle]| {
            hs.iter()
                .map(|h| h.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        };
        write!(
            f,
            "{}({}) -> [{}]",
            self.name(),
            join(self.inputs()),
            join(self.outputs())
        )
    }
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// Everything one run consumes.
#[derive(Debug, Clone)]
pub struct RakeInput {
    pub run: RunKey,
    pub coarse: EntityTable,
    pub fine: EntityTable,
    pub hierarchy: HierarchyIndex,
    pub impute: ImputeMap,
}

#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    stages: Vec<Stage>,
}

impl Plan {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self { stages }
    }

    /// The full raking pipeline.
    pub fn standard() -> Self {
        Self::new(vec![
            Stage::ReconcileIds,
            Stage::ConformDims,
            Stage::AlignDims,
            Stage::AlignIds,
            Stage::AttachHierarchy,
            Stage::SplitFine,
            Stage::SplitCoarse,
            Stage::ComputeFactors,
            Stage::ApplyFactors,
            Stage::CheckConservation,
            Stage::Merge,
            Stage::Project,
        ])
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Every stage must read only handles produced earlier, and the plan must end
    /// with the output handle materialized.
    pub fn validate(&self) -> Result<(), RakeError> {
        let mut live: BTreeSet<Handle> = SOURCES.into_iter().collect();
        for (i, stage) in self.stages.iter().enumerate() {
            if let Some(missing) = stage.inputs().iter().find(|h| !live.contains(*h)) {
                return Err(RakeError::Plan(format!(
                    "stage {} ({}) reads '{missing}' which is not available",
                    i + 1,
                    stage.name()
                )));
            }
            for h in stage.consumes() {
                live.remove(h);
            }
            live.extend(stage.outputs().iter().copied());
        }
        if !live.contains(&Handle::Output) {
            return Err(RakeError::Plan("plan never produces 'output'".into()));
        }
        Ok(())
    }

    pub fn describe(&self) -> Vec<String> {
        self.stages
            .iter()
            .enumerate()
            .map(|(i, s)| format!("{:>2}. {s}", i + 1))
            .collect()
    }

    /// Run every stage once. Returns the projected table and the run summary.
    pub fn execute(&self, input: RakeInput) -> Result<(EntityTable, RakeSummary), RakeError> {
        self.validate()?;

        let RakeInput {
            run,
            coarse,
            fine,
            hierarchy,
            impute,
        } = input;

        let mut summary = RakeSummary {
            fine_entities_loaded: fine.location_ids().len(),
            ..RakeSummary::default()
        };
        let mut slots = Slots {
            fine: Some(fine),
            coarse: Some(coarse),
            ..Slots::default()
        };

        for stage in &self.stages {
            let _span = debug_span!("stage", stage = stage.name()).entered();
            self.run_stage(*stage, &mut slots, &hierarchy, &impute, &run, &mut summary)?;
        }

        let output = take(&mut slots.output, Handle::Output)?;
        summary.fine_entities_out = output.location_ids().len();
        summary.fine_rows_out = output.len();
        Ok((output, summary))
    }

    fn run_stage(
        &self,
        stage: Stage,
        slots: &mut Slots,
        hierarchy: &HierarchyIndex,
        impute: &ImputeMap,
        run: &RunKey,
        summary: &mut RakeSummary,
    ) -> Result<(), RakeError> {
        match stage {
            Stage::ReconcileIds => {
                let fine = take(&mut slots.fine, Handle::Fine)?;
                let (fine, folded) = reconcile_ids(fine, impute);
                summary.retired_ids_folded = folded;
                slots.fine = Some(fine);
            }
            Stage::ConformDims => {
                let fine = take(&mut slots.fine, Handle::Fine)?;
                let coarse = get(&slots.coarse, Handle::Coarse)?;
                slots.fine = Some(conform_dims(fine, coarse, run)?);
            }
            Stage::AlignDims => {
                let coarse = take(&mut slots.coarse, Handle::Coarse)?;
                let fine = get(&slots.fine, Handle::Fine)?;
                slots.coarse = Some(align_dims(coarse, fine)?);
            }
            Stage::AlignIds => {
                let fine = take(&mut slots.fine, Handle::Fine)?;
                slots.fine = Some(align_ids(hierarchy, fine));
            }
            Stage::AttachHierarchy => {
                let fine = take(&mut slots.fine, Handle::Fine)?;
                let linked = hierarchy.attach(fine);
                summary.fine_entities_aligned = linked.location_ids().len();
                slots.linked = Some(linked);
            }
            Stage::SplitFine => {
                let linked = take(&mut slots.linked, Handle::Linked)?;
                let coarse = get(&slots.coarse, Handle::Coarse)?;
                let parts = split_fine(linked, coarse);
                summary.with_parent_entities = parts.with_parent.location_ids().len();
                summary.without_parent_entities = parts.without_parent.location_ids().len();
                slots.with_parent = Some(parts.with_parent);
                slots.without_parent = Some(parts.without_parent);
            }
            Stage::SplitCoarse => {
                let coarse = take(&mut slots.coarse, Handle::Coarse)?;
                let with_parent = get(&slots.with_parent, Handle::FineWithParent)?;
                let parts = split_coarse(with_parent, coarse);
                summary.coarse_parents_raked = parts.with_children.location_ids().len();
                summary.coarse_parents_childless = parts.childless.location_ids().len();
                slots.coarse_restricted = Some(parts.with_children);
            }
            Stage::ComputeFactors => {
                let with_parent = get(&slots.with_parent, Handle::FineWithParent)?;
                let coarse = get(&slots.coarse_restricted, Handle::CoarseRestricted)?;
                slots.pre_rake_sums = Some(child_sums(with_parent));
                let factors = compute_factors(with_parent, coarse);
                summary.factors = factors.len();
                summary.degenerate_factors = factors.degenerate;
                summary.missing_children_sums = factors.missing_children;
                slots.factors = Some(factors);
            }
            Stage::ApplyFactors => {
                let with_parent = take(&mut slots.with_parent, Handle::FineWithParent)?;
                let factors = get(&slots.factors, Handle::Factors)?;
                let outcome = apply_factors(with_parent, factors);
                summary.unmatched_fine_rows = outcome.unmatched_rows;
                slots.raked = Some(outcome.raked);
            }
            Stage::CheckConservation => {
                let raked = get(&slots.raked, Handle::Raked)?;
                let coarse = get(&slots.coarse_restricted, Handle::CoarseRestricted)?;
                let residual = match &slots.pre_rake_sums {
                    Some(before) => conservation_residual(raked, coarse, before),
                    None => conservation_residual(raked, coarse, &HashMap::new()),
                };
                debug!(residual, "conservation check");
                summary.max_conservation_residual = residual;
            }
            Stage::Merge => {
                let raked = take(&mut slots.raked, Handle::Raked)?;
                let untouched = take(&mut slots.without_parent, Handle::FineWithoutParent)?;
                slots.merged = Some(merge_partitions(raked, untouched)?);
            }
            Stage::Project => {
                let merged = take(&mut slots.merged, Handle::Merged)?;
                slots.output = Some(project_values(merged));
            }
        }
        Ok(())
    }
}

/// Materialized handles during execution.
#[derive(Default)]
struct Slots {
    fine: Option<EntityTable>,
    coarse: Option<EntityTable>,
    linked: Option<LinkedTable>,
    with_parent: Option<LinkedTable>,
    without_parent: Option<LinkedTable>,
    coarse_restricted: Option<EntityTable>,
    factors: Option<RakingFactors>,
    pre_rake_sums: Option<HashMap<CellKey, f64>>,
    raked: Option<LinkedTable>,
    merged: Option<LinkedTable>,
    output: Option<EntityTable>,
}

fn take<T>(slot: &mut Option<T>, handle: Handle) -> Result<T, RakeError> {
    slot.take()
        .ok_or_else(|| RakeError::Plan(format!("handle '{handle}' is not materialized")))
}

fn get<T>(slot: &Option<T>, handle: Handle) -> Result<&T, RakeError> {
    slot.as_ref()
        .ok_or_else(|| RakeError::Plan(format!("handle '{handle}' is not materialized")))
}
