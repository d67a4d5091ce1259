use crate::utils::{check_num, parse_action_name};
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs, path::Path};

/// Ideal value of every clinical variable, keyed by variable name.
pub type ClinicalValues = BTreeMap<String, f64>;

/// Health system parameters.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Number of pathways.
    pub n_pathways: usize,
    /// Number of actions.
    pub n_actions: usize,

    /// Number of patients each action can serve per weekday step.
    pub base_capacity: usize,
    /// Fraction of the base capacity available on weekend steps.
    pub weekend_capacity: f64,

    /// Probability of disease onset per inactive pathway and step.
    pub prob_disease: f64,
    /// Relative drift of clinical variables per step while ill.
    pub decay_rate: f64,

    /// Entry actions of every pathway.
    pub input_actions: Vec<String>,
    /// Exit action of every pathway.
    pub output_action: String,

    /// Ideal clinical values.
    pub ideal_clinical: ClinicalValues,
}

/// Population parameters.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct InitConfig {
    /// Number of patients.
    pub n_patients: usize,
    /// Seed of the random number generator (drawn from the OS if absent).
    pub seed: Option<u64>,
}

/// Run length parameters.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Number of steps per major episode.
    pub n_steps: usize,
}

/// Simulation configuration parameters.
///
/// Loaded from a TOML file and validated before use.
/// See [`Config::from_file`] for loading.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Config {
    pub model: ModelConfig,
    pub init: InitConfig,
    pub output: OutputConfig,
}

impl Config {
    /// Load a [`Config`] from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, deserialized,
    /// or if the configuration values are invalid.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let contents =
            fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;
        Self::from_toml(&contents)
    }

    /// Parse and validate a [`Config`] from a TOML string.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let cfg: Config = toml::from_str(contents).context("failed to deserialize config")?;
        cfg.validate().context("failed to validate config")?;
        Ok(cfg)
    }

    /// Indices of the entry actions.
    pub fn input_idxs(&self) -> Result<Vec<usize>> {
        self.model
            .input_actions
            .iter()
            .map(|name| parse_action_name(name, self.model.n_actions))
            .collect()
    }

    /// Index of the exit action.
    pub fn output_idx(&self) -> Result<usize> {
        parse_action_name(&self.model.output_action, self.model.n_actions)
    }

    pub fn validate(&self) -> Result<()> {
        let model = &self.model;
        check_num(model.n_pathways, 1..100).context("invalid number of pathways")?;
        check_num(model.n_actions, 2..100).context("invalid number of actions")?;
        check_num(model.base_capacity, 0..10_000).context("invalid base capacity")?;
        check_num(model.weekend_capacity, 0.0..=1.0).context("invalid weekend capacity")?;
        check_num(model.prob_disease, 0.0..=1.0).context("invalid disease probability")?;
        check_num(model.decay_rate, 0.0..1.0).context("invalid decay rate")?;

        if model.input_actions.is_empty() {
            bail!("at least one input action is required");
        }
        let input_idxs = self.input_idxs().context("invalid input actions")?;
        let output_idx = self.output_idx().context("invalid output action")?;
        let mut sorted = input_idxs.clone();
        sorted.sort_unstable();
        sorted.dedup();
        if sorted.len() != input_idxs.len() {
            bail!("input actions must be unique");
        }
        if input_idxs.contains(&output_idx) {
            bail!("output action must not be an input action");
        }

        if model.ideal_clinical.is_empty() {
            bail!("at least one clinical variable is required");
        }
        for (name, &val) in &model.ideal_clinical {
            check_num(val, f64::MIN_POSITIVE..1e6)
                .with_context(|| format!("invalid ideal value of {name:?}"))?;
        }

        check_num(self.init.n_patients, 1..100_000).context("invalid number of patients")?;
        check_num(self.output.n_steps, 1..100_000).context("invalid number of steps")?;

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Default configuration used across the unit tests.
    pub(crate) fn sample_config() -> Config {
        let ideal_clinical = [
            ("bp", 120.0),
            ("glucose", 90.0),
            ("bmi", 22.0),
            ("oxygen", 98.0),
            ("mental_health", 80.0),
        ]
        .into_iter()
        .map(|(name, val)| (name.to_string(), val))
        .collect();
        Config {
            model: ModelConfig {
                n_pathways: 10,
                n_actions: 10,
                base_capacity: 10,
                weekend_capacity: 0.5,
                prob_disease: 0.15,
                decay_rate: 0.01,
                input_actions: vec!["a0".to_string(), "a1".to_string()],
                output_action: "a9".to_string(),
                ideal_clinical,
            },
            init: InitConfig {
                n_patients: 10,
                seed: Some(7),
            },
            output: OutputConfig { n_steps: 30 },
        }
    }

    #[test]
    fn parses_sectioned_toml() {
        let cfg = Config::from_toml(
            r#"
[model]
n_pathways = 3
n_actions = 4
base_capacity = 2
weekend_capacity = 0.5
prob_disease = 0.2
decay_rate = 0.01
input_actions = ["a0"]
output_action = "a3"

[model.ideal_clinical]
bp = 120.0
glucose = 90.0

[init]
n_patients = 5

[output]
n_steps = 14
"#,
        )
        .unwrap();
        assert_eq!(cfg.model.n_actions, 4);
        assert_eq!(cfg.init.seed, None);
        assert_eq!(cfg.input_idxs().unwrap(), vec![0]);
        assert_eq!(cfg.output_idx().unwrap(), 3);
    }

    #[test]
    fn sample_config_is_valid() {
        sample_config().validate().unwrap();
    }

    #[test]
    fn rejects_output_among_inputs() {
        let mut cfg = sample_config();
        cfg.model.output_action = "a1".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_unknown_actions_and_bad_probabilities() {
        let mut cfg = sample_config();
        cfg.model.input_actions = vec!["a42".to_string()];
        assert!(cfg.validate().is_err());

        let mut cfg = sample_config();
        cfg.model.prob_disease = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = sample_config();
        cfg.model.input_actions.push("a0".to_string());
        assert!(cfg.validate().is_err());
    }
}
