use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::RakeError;
use crate::model::RunKey;
use crate::reconcile::ImputeMap;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Run configuration. Every section falls back to the built-in defaults when
/// omitted, so a config file only needs the parts it changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RakeConfig {
    /// Hierarchy depth of the fine level.
    pub hierarchy_level: i64,
    pub paths: PathsConfig,
    pub input: InputConfig,
    pub output: OutputConfig,
    pub draws: DrawRange,
    pub causes: BTreeMap<String, CauseConfig>,
    pub measures: BTreeMap<String, MeasureConfig>,
    pub scenarios: Vec<ScenarioConfig>,
    pub datasets: Vec<DatasetConfig>,
    pub impute: ImputeMap,
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Coarse forecasts: `{forecast_root}/{measure}/{dataset}/{cause_file}`.
    pub forecast_root: PathBuf,
    /// Fine predictions: `{predicted_root}/{run dir}/draw_{n}.csv`.
    pub predicted_root: PathBuf,
    pub hierarchy_file: PathBuf,
    pub output_root: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        let deliverables =
            PathBuf::from("/mnt/team/rapidresponse/pub/malaria-denv/deliverables/2025_08_26_admin_2_counts");
        Self {
            forecast_root: PathBuf::from("/mnt/share/forecasting/data/9/future"),
            predicted_root: deliverables.join("input"),
            hierarchy_file: deliverables.join("full_hierarchy_2023_lsae_1209.csv"),
            output_root: deliverables.join("output"),
        }
    }
}

impl PathsConfig {
    /// Resolve relative paths against `base` (the config file's directory).
    pub fn rebase(&mut self, base: &Path) {
        for path in [
            &mut self.forecast_root,
            &mut self.predicted_root,
            &mut self.hierarchy_file,
            &mut self.output_root,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }
}

/// Column naming of the input tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Candidate value columns of the coarse table; the first one present wins.
    pub coarse_value_columns: Vec<String>,
    /// Value column of the fine table (renamed to `value` on load).
    pub fine_value_column: String,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            coarse_value_columns: vec!["value".into(), "draws".into()],
            fine_value_column: "val".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Rows per column chunk in the output archive.
    pub chunk_rows: usize,
    /// Deflate level, 0 (store) to 9.
    pub compression_level: i64,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            chunk_rows: 65_536,
            compression_level: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrawRange {
    pub start: i64,
    pub count: i64,
}

impl Default for DrawRange {
    fn default() -> Self {
        Self { start: 0, count: 100 }
    }
}

impl DrawRange {
    pub fn iter(&self) -> impl Iterator<Item = i64> {
        self.start..self.start + self.count
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CauseConfig {
    /// File name of this cause inside a coarse dataset directory.
    pub forecast_file: String,
    /// Appended to the fine and output directory names.
    #[serde(default)]
    pub dir_suffix: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasureConfig {
    /// Measure name used in the fine prediction directory.
    pub predicted: String,
    /// Measure name used in the output directory.
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub id: i64,
    /// SSP label used in directory names.
    pub ssp: String,
}

/// One documented (scenario, measure) → coarse dataset entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub scenario: i64,
    pub measure: String,
    pub name: String,
}

impl Default for RakeConfig {
    fn default() -> Self {
        let causes = BTreeMap::from([
            (
                "malaria".to_string(),
                CauseConfig {
                    forecast_file: "malaria.csv".into(),
                    dir_suffix: "_dah_scenario_Baseline".into(),
                },
            ),
            (
                "dengue".to_string(),
                CauseConfig {
                    forecast_file: "ntd_dengue.csv".into(),
                    dir_suffix: String::new(),
                },
            ),
        ]);

        let measure = |predicted: &str, output: &str| MeasureConfig {
            predicted: predicted.into(),
            output: output.into(),
        };
        let measures = BTreeMap::from([
            ("death".to_string(), measure("mortality", "mortality")),
            ("incidence".to_string(), measure("incidence", "incidence")),
            ("yll".to_string(), measure("mortality", "yll")),
            ("yld".to_string(), measure("incidence", "yld")),
        ]);

        let scenarios = vec![
            ScenarioConfig { id: 0, ssp: "ssp245".into() },
            ScenarioConfig { id: 75, ssp: "ssp126".into() },
            ScenarioConfig { id: 76, ssp: "ssp585".into() },
        ];

        let dataset = |scenario: i64, measure: &str, name: &str| DatasetConfig {
            scenario,
            measure: measure.into(),
            name: name.into(),
        };
        let datasets = vec![
            dataset(0, "death", "20250709_first_sub_rcp45_climate_ref_100d_hiv_shocks_covid_all_s8_num"),
            dataset(0, "incidence", "20250719_rcp45_first_sub_climate_ref_scen0_agg_num"),
            dataset(0, "yll", "20250709_rcp45_first_sub_climate_ref_agg_num_restored_draws"),
            dataset(0, "yld", "20250719_rcp45_first_sub_climate_ref_scen0_agg_num"),
            dataset(
                75,
                "death",
                "20250709_first_sub_rcp26_first_sub_climate_vector_borne_diseases_100d_hiv_shocks_covid_all_s8_num",
            ),
            dataset(75, "incidence", "20250719_rcp26_first_sub_climate_vector_borne_diseases_scen75_agg_num"),
            dataset(75, "yll", "20250709_rcp26_first_sub_climate_vector_borne_diseases_agg_num_restored_draws"),
            dataset(75, "yld", "20250719_rcp26_first_sub_climate_vector_borne_diseases_scen75_agg_num"),
            dataset(
                76,
                "death",
                "20250709_first_sub_rcp85_first_sub_climate_vector_borne_diseases_100d_hiv_shocks_covid_all_s8_num",
            ),
            dataset(76, "incidence", "20250719_rcp85_first_sub_climate_vector_borne_diseases_scen76_agg_num"),
            dataset(76, "yll", "20250709_rcp85_first_sub_climate_vector_borne_diseases_agg_num_restored_draws"),
            dataset(76, "yld", "20250719_rcp85_first_sub_climate_vector_borne_diseases_scen76_agg_num"),
        ];

        let impute = ImputeMap::new([(60908, 44858), (95069, 44858), (94364, 44858)])
            .unwrap_or_default();

        Self {
            hierarchy_level: 5,
            paths: PathsConfig::default(),
            input: InputConfig::default(),
            output: OutputConfig::default(),
            draws: DrawRange::default(),
            causes,
            measures,
            scenarios,
            datasets,
            impute,
        }
    }
}

// ---------------------------------------------------------------------------
// Resolved paths
// ---------------------------------------------------------------------------

/// Every path one run touches.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunPaths {
    pub coarse: PathBuf,
    pub fine_dir: PathBuf,
    pub fine: PathBuf,
    pub hierarchy: PathBuf,
    pub output_dir: PathBuf,
    pub output: PathBuf,
}

/// Extension of the persisted columnar archive.
pub const OUTPUT_EXTENSION: &str = "cols.zip";

// ---------------------------------------------------------------------------
// Parse + Validate + Lookup
// ---------------------------------------------------------------------------

impl RakeConfig {
    pub fn from_toml(input: &str) -> Result<Self, RakeError> {
        let config: RakeConfig =
            toml::from_str(input).map_err(|e| RakeError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, RakeError> {
        toml::to_string_pretty(self).map_err(|e| RakeError::ConfigParse(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), RakeError> {
        self.impute.validate()?;

        if self.output.chunk_rows == 0 {
            return Err(RakeError::ConfigValidation("output.chunk_rows must be positive".into()));
        }
        if !(0..=9).contains(&self.output.compression_level) {
            return Err(RakeError::ConfigValidation(format!(
                "output.compression_level must be 0..=9, got {}",
                self.output.compression_level
            )));
        }
        if self.draws.count < 0 {
            return Err(RakeError::ConfigValidation(format!(
                "draws.count must not be negative, got {}",
                self.draws.count
            )));
        }
        if self.input.coarse_value_columns.is_empty() {
            return Err(RakeError::ConfigValidation(
                "input.coarse_value_columns must name at least one column".into(),
            ));
        }

        let mut scenario_ids = BTreeSet::new();
        for s in &self.scenarios {
            if !scenario_ids.insert(s.id) {
                return Err(RakeError::ConfigValidation(format!("scenario {} listed twice", s.id)));
            }
        }

        let mut seen = BTreeSet::new();
        for d in &self.datasets {
            if !scenario_ids.contains(&d.scenario) {
                return Err(RakeError::ConfigValidation(format!(
                    "dataset '{}': scenario {} is not configured",
                    d.name, d.scenario
                )));
            }
            if !self.measures.contains_key(&d.measure) {
                return Err(RakeError::ConfigValidation(format!(
                    "dataset '{}': measure '{}' is not configured",
                    d.name, d.measure
                )));
            }
            if !seen.insert((d.scenario, d.measure.as_str())) {
                return Err(RakeError::ConfigValidation(format!(
                    "dataset for ({}, {}) listed twice",
                    d.scenario, d.measure
                )));
            }
        }

        Ok(())
    }

    pub fn cause(&self, name: &str) -> Result<&CauseConfig, RakeError> {
        self.causes
            .get(name)
            .ok_or_else(|| RakeError::UnknownCause(name.to_string()))
    }

    pub fn measure(&self, name: &str) -> Result<&MeasureConfig, RakeError> {
        self.measures
            .get(name)
            .ok_or_else(|| RakeError::UnknownMeasure(name.to_string()))
    }

    pub fn ssp(&self, scenario: i64) -> Result<&str, RakeError> {
        self.scenarios
            .iter()
            .find(|s| s.id == scenario)
            .map(|s| s.ssp.as_str())
            .ok_or(RakeError::UnknownScenario(scenario))
    }

    /// Coarse dataset name for a (scenario, measure) pair.
    pub fn dataset(&self, scenario: i64, measure: &str) -> Result<&str, RakeError> {
        self.datasets
            .iter()
            .find(|d| d.scenario == scenario && d.measure == measure)
            .map(|d| d.name.as_str())
            .ok_or_else(|| RakeError::InvalidCombination {
                scenario,
                measure: measure.to_string(),
            })
    }

    /// Resolve every path of a run. Fails on unknown identifiers before any I/O.
    pub fn resolve(&self, run: &RunKey) -> Result<RunPaths, RakeError> {
        let cause = self.cause(&run.cause)?;
        let measure = self.measure(&run.measure)?;
        let ssp = self.ssp(run.scenario)?;
        let dataset = self.dataset(run.scenario, &run.measure)?;

        let coarse = self
            .paths
            .forecast_root
            .join(&run.measure)
            .join(dataset)
            .join(&cause.forecast_file);

        let fine_dir = self.paths.predicted_root.join(format!(
            "as_cause_{}_measure_{}_metric_count_ssp_scenario_{ssp}{}",
            run.cause, measure.predicted, cause.dir_suffix
        ));
        let fine = fine_dir.join(format!("draw_{}.csv", run.draw));

        let output_dir = self.paths.output_root.join(format!(
            "as_cause_{}_measure_{}_metric_count_ssp_scenario_{ssp}{}_raked",
            run.cause, measure.output, cause.dir_suffix
        ));
        let output = output_dir.join(format!("draw_{}.{OUTPUT_EXTENSION}", run.draw));

        Ok(RunPaths {
            coarse,
            fine_dir,
            fine,
            hierarchy: self.paths.hierarchy_file.clone(),
            output_dir,
            output,
        })
    }

    /// Every configured (cause, scenario, measure, draw) combination that has
    /// a coarse dataset.
    pub fn run_keys(&self) -> Vec<RunKey> {
        let mut keys = Vec::new();
        for cause in self.causes.keys() {
            for scenario in &self.scenarios {
                for measure in self.measures.keys() {
                    if self.dataset(scenario.id, measure).is_err() {
                        continue;
                    }
                    for draw in self.draws.iter() {
                        keys.push(RunKey::new(cause.clone(), scenario.id, measure.clone(), draw));
                    }
                }
            }
        }
        keys
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = RakeConfig::default();
        config.validate().unwrap();
        assert_eq!(config.hierarchy_level, 5);
        assert_eq!(config.datasets.len(), 12);
        assert_eq!(config.impute.len(), 3);
        assert_eq!(config.run_keys().len(), 2 * 3 * 4 * 100);
    }

    #[test]
    fn dataset_lookup_rejects_undocumented_combination() {
        let config = RakeConfig::default();
        assert_eq!(
            config.dataset(0, "incidence").unwrap(),
            "20250719_rcp45_first_sub_climate_ref_scen0_agg_num"
        );
        let err = config.dataset(1, "death").unwrap_err();
        assert!(matches!(err, RakeError::InvalidCombination { scenario: 1, .. }));
    }

    #[test]
    fn resolve_malaria_paths() {
        let mut config = RakeConfig::default();
        config.paths.forecast_root = "/f".into();
        config.paths.predicted_root = "/p".into();
        config.paths.output_root = "/o".into();

        let paths = config.resolve(&RunKey::new("malaria", 75, "death", 7)).unwrap();
        assert_eq!(
            paths.coarse,
            PathBuf::from(
                "/f/death/20250709_first_sub_rcp26_first_sub_climate_vector_borne_diseases_100d_hiv_shocks_covid_all_s8_num/malaria.csv"
            )
        );
        assert_eq!(
            paths.fine,
            PathBuf::from(
                "/p/as_cause_malaria_measure_mortality_metric_count_ssp_scenario_ssp126_dah_scenario_Baseline/draw_7.csv"
            )
        );
        assert_eq!(
            paths.output,
            PathBuf::from(
                "/o/as_cause_malaria_measure_mortality_metric_count_ssp_scenario_ssp126_dah_scenario_Baseline_raked/draw_7.cols.zip"
            )
        );
    }

    #[test]
    fn resolve_dengue_yll_paths() {
        let mut config = RakeConfig::default();
        config.paths.predicted_root = "/p".into();
        config.paths.output_root = "/o".into();

        let paths = config.resolve(&RunKey::new("dengue", 76, "yll", 0)).unwrap();
        assert_eq!(
            paths.fine_dir,
            PathBuf::from("/p/as_cause_dengue_measure_mortality_metric_count_ssp_scenario_ssp585")
        );
        assert_eq!(
            paths.output,
            PathBuf::from("/o/as_cause_dengue_measure_yll_metric_count_ssp_scenario_ssp585_raked/draw_0.cols.zip")
        );
    }

    #[test]
    fn resolve_fails_fast_on_unknown_identifiers() {
        let config = RakeConfig::default();
        assert!(matches!(
            config.resolve(&RunKey::new("cholera", 0, "death", 0)),
            Err(RakeError::UnknownCause(_))
        ));
        assert!(matches!(
            config.resolve(&RunKey::new("malaria", 0, "prevalence", 0)),
            Err(RakeError::UnknownMeasure(_))
        ));
        assert!(matches!(
            config.resolve(&RunKey::new("malaria", 12, "death", 0)),
            Err(RakeError::UnknownScenario(12))
        ));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = RakeConfig::from_toml(
            r#"
hierarchy_level = 4

[paths]
output_root = "/scratch/raked"

[impute]
"123" = 456
"#,
        )
        .unwrap();
        assert_eq!(config.hierarchy_level, 4);
        assert_eq!(config.paths.output_root, PathBuf::from("/scratch/raked"));
        assert_eq!(config.paths.forecast_root, PathBuf::from("/mnt/share/forecasting/data/9/future"));
        assert_eq!(config.impute.get(123), Some(456));
        assert_eq!(config.impute.len(), 1);
        assert_eq!(config.datasets.len(), 12);
    }

    #[test]
    fn relative_paths_rebase_onto_config_dir() {
        let mut paths = PathsConfig {
            forecast_root: "forecast".into(),
            predicted_root: "/abs/predicted".into(),
            hierarchy_file: "meta/hierarchy.csv".into(),
            output_root: "out".into(),
        };
        paths.rebase(Path::new("/etc/hrake"));
        assert_eq!(paths.forecast_root, PathBuf::from("/etc/hrake/forecast"));
        assert_eq!(paths.predicted_root, PathBuf::from("/abs/predicted"));
        assert_eq!(paths.hierarchy_file, PathBuf::from("/etc/hrake/meta/hierarchy.csv"));
        assert_eq!(paths.output_root, PathBuf::from("/etc/hrake/out"));
    }

    #[test]
    fn reject_dataset_with_unknown_measure() {
        let input = r#"
[[datasets]]
scenario = 0
measure = "prevalence"
name = "x"
"#;
        let err = RakeConfig::from_toml(input).unwrap_err();
        assert!(err.to_string().contains("measure 'prevalence'"));
    }

    #[test]
    fn reject_recursive_impute_map() {
        let input = r#"
[impute]
"1" = 2
"2" = 3
"#;
        let err = RakeConfig::from_toml(input).unwrap_err();
        assert!(err.to_string().contains("recursive"), "{err}");
    }

    #[test]
    fn reject_bad_compression_level() {
        let input = r#"
[output]
compression_level = 12
"#;
        let err = RakeConfig::from_toml(input).unwrap_err();
        assert!(err.to_string().contains("compression_level"));
    }

    #[test]
    fn toml_round_trip_of_defaults() {
        let text = RakeConfig::default().to_toml().unwrap();
        let back = RakeConfig::from_toml(&text).unwrap();
        assert_eq!(back.datasets, RakeConfig::default().datasets);
        assert_eq!(back.impute, RakeConfig::default().impute);
    }
}
