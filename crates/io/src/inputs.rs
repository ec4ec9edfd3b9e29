// Load the three inputs of one run

use std::path::Path;

use hrake_engine::config::{RakeConfig, RunPaths};
use hrake_engine::model::RunKey;
use hrake_engine::plan::RakeInput;
use hrake_engine::RakeError;
use tracing::info;

use crate::csv::{read_entity_table, read_hierarchy, TableSpec};

/// Resolved paths plus the loaded tables.
#[derive(Debug, Clone)]
pub struct RunInputs {
    pub paths: RunPaths,
    pub input: RakeInput,
}

/// Every required input must exist. Checked before anything is read.
pub fn check_inputs(paths: &RunPaths) -> Result<(), RakeError> {
    let required: [&Path; 4] = [&paths.coarse, &paths.fine_dir, &paths.fine, &paths.hierarchy];
    for path in required {
        if !path.exists() {
            return Err(RakeError::MissingInput {
                path: path.to_path_buf(),
            });
        }
    }
    Ok(())
}

/// Resolve, check and load the coarse, fine and hierarchy tables of `run`.
///
/// Unknown identifiers fail before any filesystem access; a missing input
/// fails before any table is parsed.
pub fn load_run_inputs(config: &RakeConfig, run: &RunKey) -> Result<RunInputs, RakeError> {
    let paths = config.resolve(run)?;
    check_inputs(&paths)?;

    let coarse = read_entity_table(
        &paths.coarse,
        &TableSpec {
            label: "coarse",
            value_columns: &config.input.coarse_value_columns,
            draw: Some(run.draw),
        },
    )?;

    let fine_columns = [config.input.fine_value_column.clone()];
    let fine = read_entity_table(
        &paths.fine,
        &TableSpec {
            label: "fine",
            value_columns: &fine_columns,
            draw: Some(run.draw),
        },
    )?;

    let hierarchy = read_hierarchy(&paths.hierarchy, config.hierarchy_level)?;

    info!(
        run = %run,
        coarse_rows = coarse.len(),
        fine_rows = fine.len(),
        hierarchy = hierarchy.len(),
        "inputs loaded"
    );

    Ok(RunInputs {
        paths,
        input: RakeInput {
            run: run.clone(),
            coarse,
            fine,
            hierarchy,
            impute: config.impute.clone(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn config_at(root: &Path) -> RakeConfig {
        let mut config = RakeConfig::default();
        config.paths.forecast_root = root.join("forecast");
        config.paths.predicted_root = root.join("predicted");
        config.paths.hierarchy_file = root.join("hierarchy.csv");
        config.paths.output_root = root.join("output");
        config
    }

    fn write(path: &PathBuf, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn unknown_cause_fails_without_touching_disk() {
        let config = config_at(Path::new("/definitely/not/here"));
        let err = load_run_inputs(&config, &RunKey::new("cholera", 0, "death", 0)).unwrap_err();
        assert!(matches!(err, RakeError::UnknownCause(_)));
    }

    #[test]
    fn missing_fine_directory_is_named() {
        let dir = tempdir().unwrap();
        let config = config_at(dir.path());
        let run = RunKey::new("dengue", 0, "death", 0);
        let paths = config.resolve(&run).unwrap();
        write(&paths.coarse, "location_id,sex_id,draw,value\n1,1,0,1\n");

        let err = load_run_inputs(&config, &run).unwrap_err();
        match err {
            RakeError::MissingInput { path } => assert_eq!(path, paths.fine_dir),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_coarse_file_is_named() {
        let dir = tempdir().unwrap();
        let config = config_at(dir.path());
        let run = RunKey::new("malaria", 76, "incidence", 1);
        let paths = config.resolve(&run).unwrap();
        write(&paths.fine, "location_id,sex_id,val\n100,1,3\n");
        write(&paths.hierarchy, "location_id,parent_id,level\n100,10,5\n");

        match load_run_inputs(&config, &run).unwrap_err() {
            RakeError::MissingInput { path } => assert_eq!(path, paths.coarse),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_hierarchy_file_is_named() {
        let dir = tempdir().unwrap();
        let config = config_at(dir.path());
        let run = RunKey::new("dengue", 0, "yld", 4);
        let paths = config.resolve(&run).unwrap();
        write(&paths.coarse, "location_id,sex_id,draw,value\n10,1,4,1\n");
        write(&paths.fine, "location_id,sex_id,val\n100,1,3\n");

        let err = check_inputs(&paths).unwrap_err();
        assert!(err.to_string().contains("hierarchy.csv"), "{err}");
        match load_run_inputs(&config, &run).unwrap_err() {
            RakeError::MissingInput { path } => assert_eq!(path, paths.hierarchy),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn loads_all_three_inputs() {
        let dir = tempdir().unwrap();
        let config = config_at(dir.path());
        let run = RunKey::new("dengue", 75, "yll", 2);
        let paths = config.resolve(&run).unwrap();

        write(
            &paths.coarse,
            "location_id,sex_id,draw,draws\n10,1,1,5\n10,1,2,8\n",
        );
        write(&paths.fine, "location_id,sex_id,val\n100,1,3\n101,1,1\n");
        write(
            &paths.hierarchy,
            "location_id,parent_id,level\n10,1,4\n100,10,5\n101,10,5\n",
        );

        let loaded = load_run_inputs(&config, &run).unwrap();
        assert_eq!(loaded.input.coarse.len(), 1);
        assert_eq!(loaded.input.coarse.total(), 8.0);
        assert_eq!(loaded.input.fine.len(), 2);
        assert_eq!(loaded.input.hierarchy.len(), 2);
        assert_eq!(loaded.input.impute.len(), 3);
        assert_eq!(loaded.paths, paths);
    }
}
