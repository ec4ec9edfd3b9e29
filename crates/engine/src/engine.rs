use tracing::info;

use crate::error::RakeError;
use crate::model::{RakeMeta, RakeResult};
use crate::plan::{Plan, RakeInput};

/// Rake one run with the standard plan.
pub fn run(input: RakeInput) -> Result<RakeResult, RakeError> {
    run_plan(&Plan::standard(), input)
}

/// Rake one run with an explicit plan. The plan is validated before any stage runs.
pub fn run_plan(plan: &Plan, input: RakeInput) -> Result<RakeResult, RakeError> {
    let run = input.run.clone();
    let (table, summary) = plan.execute(input)?;

    info!(
        run = %run,
        entities = summary.fine_entities_out,
        raked = summary.with_parent_entities,
        passthrough = summary.without_parent_entities,
        factors = summary.factors,
        degenerate = summary.degenerate_factors,
        residual = summary.max_conservation_residual,
        "raked"
    );

    Ok(RakeResult {
        meta: RakeMeta {
            run,
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            run_at: chrono::Utc::now().to_rfc3339(),
        },
        summary,
        table,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::{HierarchyIndex, HierarchyRecord};
    use crate::model::{EntityTable, Row, RunKey, Strata};
    use crate::reconcile::ImputeMap;

    const P1: i64 = 100;
    const P99: i64 = 999;

    fn scenario_input() -> RakeInput {
        let dims = vec!["age_group_id".to_string(), "sex_id".to_string()];
        let coarse = EntityTable::from_rows(dims.clone(), vec![Row::new(P1, vec![22, 1], 100.0)]).unwrap();
        let fine = EntityTable::from_rows(
            dims,
            vec![
                Row::new(1, vec![22, 1], 30.0),
                Row::new(2, vec![22, 1], 20.0),
                Row::new(3, vec![22, 1], 5.0),
            ],
        )
        .unwrap();
        let hierarchy = HierarchyIndex::from_records(
            5,
            vec![
                HierarchyRecord::new(1, P1, 5),
                HierarchyRecord::new(2, P1, 5),
                HierarchyRecord::new(3, P99, 5),
            ],
        )
        .unwrap();
        RakeInput {
            run: RunKey::new("malaria", 0, "death", 0),
            coarse,
            fine,
            hierarchy,
            impute: ImputeMap::default(),
        }
    }

    #[test]
    fn parent_with_two_children_and_an_orphan() {
        let result = run(scenario_input()).unwrap();
        let s = Strata(vec![22, 1]);

        assert_eq!(result.table.value(1, &s), Some(60.0));
        assert_eq!(result.table.value(2, &s), Some(40.0));
        assert_eq!(result.table.value(3, &s), Some(5.0));
        assert_eq!(
            result.table.location_ids().into_iter().collect::<Vec<_>>(),
            vec![1, 2, 3]
        );

        assert_eq!(result.summary.factors, 1);
        assert_eq!(result.summary.with_parent_entities, 2);
        assert_eq!(result.summary.without_parent_entities, 1);
        assert_eq!(result.summary.max_conservation_residual, 0.0);
        assert_eq!(result.meta.run.cause, "malaria");
        assert_eq!(result.meta.engine_version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn invalid_plan_fails_before_running() {
        let plan = Plan::new(vec![crate::plan::Stage::Project]);
        let err = run_plan(&plan, scenario_input()).unwrap_err();
        assert!(matches!(err, RakeError::Plan(_)));
    }
}
