use crate::stats::Accumulator;
use crate::types::{Episode, RunOutput};
use anyhow::{Context, Result, bail};
use serde_json::json;

pub trait Obs {
    fn update(&mut self, output: &RunOutput) -> Result<()>;
    fn report(&self) -> serde_json::Value;
}

/// Total system cost of every episode.
pub struct SystemCost {
    totals: Vec<f64>,
}

impl SystemCost {
    pub fn new() -> Self {
        Self { totals: Vec::new() }
    }
}

impl Obs for SystemCost {
    fn update(&mut self, output: &RunOutput) -> Result<()> {
        self.totals = output
            .episodes
            .iter()
            .map(|episode| episode.system_cost.last().copied().unwrap_or(0.0))
            .collect();
        Ok(())
    }

    fn report(&self) -> serde_json::Value {
        let change = match (self.totals.first(), self.totals.last()) {
            (Some(first), Some(last)) => last - first,
            _ => f64::NAN,
        };
        json!({ "system_cost": { "totals": self.totals, "change": change } })
    }
}

/// Patients served by every action, first episode against last.
pub struct ActionUsage {
    reports: Vec<serde_json::Value>,
}

impl ActionUsage {
    pub fn new() -> Self {
        Self {
            reports: Vec::new(),
        }
    }
}

impl Obs for ActionUsage {
    fn update(&mut self, output: &RunOutput) -> Result<()> {
        let (Some(first), Some(last)) = (output.first_episode(), output.last_episode()) else {
            bail!("run has no episodes");
        };
        if first.actions.len() != last.actions.len() {
            bail!("episodes disagree on the number of actions");
        }

        self.reports = first
            .actions
            .iter()
            .zip(&last.actions)
            .map(|(act_first, act_last)| {
                json!({
                    "name": act_last.name,
                    "cost": act_last.cost,
                    "base_capacity": act_last.base_capacity,
                    "served_first": act_first.schedule.iter().sum::<usize>(),
                    "served_last": act_last.schedule.iter().sum::<usize>(),
                    "queued_last": act_last.queue.len(),
                })
            })
            .collect();
        Ok(())
    }

    fn report(&self) -> serde_json::Value {
        json!({ "action_usage": self.reports })
    }
}

/// Penalty, waiting and clinical statistics over the final population.
pub struct PatientOutcomes {
    queue_penalty: Accumulator,
    clinical_penalty: Accumulator,
    wait_per_step: Accumulator,
    sickness: Accumulator,
    visits: Accumulator,
    deviation: Vec<(String, Accumulator)>,
}

impl PatientOutcomes {
    pub fn new() -> Self {
        Self {
            queue_penalty: Accumulator::new(),
            clinical_penalty: Accumulator::new(),
            wait_per_step: Accumulator::new(),
            sickness: Accumulator::new(),
            visits: Accumulator::new(),
            deviation: Vec::new(),
        }
    }
}

impl Obs for PatientOutcomes {
    fn update(&mut self, output: &RunOutput) -> Result<()> {
        let n_steps = output.n_steps.max(1) as f64;
        for patient in &output.patients {
            self.queue_penalty.add(patient.outcomes().queue_penalty);
            self.clinical_penalty.add(patient.outcomes().clinical_penalty);
            self.wait_per_step.add(patient.queue_time() / n_steps);
            self.sickness.add(patient.sickness());
            self.visits.add(patient.history().len() as f64);
        }

        self.deviation = output
            .ideal_clinical
            .iter()
            .map(|(name, &ideal)| {
                let acc: Accumulator = output
                    .patients
                    .iter()
                    .filter_map(|patient| patient.clinical().get(name))
                    .map(|&val| val - ideal)
                    .collect();
                (name.clone(), acc)
            })
            .collect();
        Ok(())
    }

    fn report(&self) -> serde_json::Value {
        let deviation: serde_json::Map<_, _> = self
            .deviation
            .iter()
            .map(|(name, acc)| (name.clone(), json!(acc.report())))
            .collect();
        json!({
            "patient_outcomes": {
                "queue_penalty": self.queue_penalty.report(),
                "clinical_penalty": self.clinical_penalty.report(),
                "wait_per_step": self.wait_per_step.report(),
                "sickness": self.sickness.report(),
                "visits": self.visits.report(),
                "clinical_deviation": deviation,
            }
        })
    }
}

/// Reward-like signal and congestion of every episode.
pub struct RewardSignal {
    reports: Vec<serde_json::Value>,
}

impl RewardSignal {
    pub fn new() -> Self {
        Self {
            reports: Vec::new(),
        }
    }

    fn summarize(episode: &Episode) -> serde_json::Value {
        let rewards: Accumulator = episode.rewards.iter().copied().collect();
        let queue_length: Accumulator = episode.mean_queue_length.iter().copied().collect();
        json!({
            "episode": episode.index,
            "decisions": episode.activity_log.len(),
            "completed": episode.pathways.iter().map(|pw| pw.completed).sum::<usize>(),
            "reward": rewards.report(),
            "mean_queue_length": queue_length.report(),
            "final_mean_clinical_penalty": episode.mean_clinical_penalty.last(),
        })
    }
}

impl Obs for RewardSignal {
    fn update(&mut self, output: &RunOutput) -> Result<()> {
        self.reports = output.episodes.iter().map(Self::summarize).collect();
        Ok(())
    }

    fn report(&self) -> serde_json::Value {
        json!({ "episodes": self.reports })
    }
}

pub struct Analyzer {
    obs_ptr_vec: Vec<Box<dyn Obs>>,
}

impl Analyzer {
    pub fn new() -> Self {
        let obs_ptr_vec: Vec<Box<dyn Obs>> = vec![
            Box::new(SystemCost::new()),
            Box::new(ActionUsage::new()),
            Box::new(PatientOutcomes::new()),
            Box::new(RewardSignal::new()),
        ];
        Self { obs_ptr_vec }
    }

    pub fn add_run(&mut self, output: &RunOutput) -> Result<()> {
        for obs in &mut self.obs_ptr_vec {
            obs.update(output).context("failed to update observable")?;
        }
        Ok(())
    }

    pub fn report(&self) -> serde_json::Value {
        let reports: Vec<_> = self.obs_ptr_vec.iter().map(|obs| obs.report()).collect();
        serde_json::Value::Array(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::sample_config;
    use crate::engine::{Engine, MAJOR_EPISODES};

    fn sample_output() -> RunOutput {
        Engine::generate_initial_condition(sample_config())
            .unwrap()
            .run()
    }

    #[test]
    fn report_covers_every_observable() {
        let output = sample_output();
        let mut analyzer = Analyzer::new();
        analyzer.add_run(&output).unwrap();
        let report = analyzer.report();

        let reports = report.as_array().unwrap();
        assert_eq!(reports.len(), 4);
        let totals = reports[0]["system_cost"]["totals"].as_array().unwrap();
        assert_eq!(totals.len(), MAJOR_EPISODES);
        assert_eq!(reports[1]["action_usage"].as_array().unwrap().len(), 10);
        assert_eq!(
            reports[2]["patient_outcomes"]["queue_penalty"]["n_vals"],
            json!(10)
        );
        assert!(reports[2]["patient_outcomes"]["clinical_deviation"]["bp"].is_object());

        let visits: usize = output.patients.iter().map(|p| p.history().len()).sum();
        let mean_visits = reports[2]["patient_outcomes"]["visits"]["mean"].as_f64().unwrap();
        assert!((mean_visits - visits as f64 / 10.0).abs() < 1e-9);
        assert_eq!(reports[3]["episodes"].as_array().unwrap().len(), MAJOR_EPISODES);
    }

    #[test]
    fn usage_matches_schedules() {
        let output = sample_output();
        let mut usage = ActionUsage::new();
        usage.update(&output).unwrap();
        let report = usage.report();

        let last = output.last_episode().unwrap();
        for (entry, snapshot) in report["action_usage"]
            .as_array()
            .unwrap()
            .iter()
            .zip(&last.actions)
        {
            let served: usize = snapshot.schedule.iter().sum();
            assert_eq!(entry["served_last"], json!(served));
            assert_eq!(entry["name"], json!(snapshot.name));
        }
    }

    #[test]
    fn usage_requires_episodes() {
        let mut output = sample_output();
        output.episodes.clear();
        assert!(ActionUsage::new().update(&output).is_err());
    }
}
