use crate::action::Action;
use crate::config::Config;
use crate::pathway::{Pathway, ThresholdMatrix, TransitionGraph};
use crate::patient::Patient;
use crate::stats::Accumulator;
use crate::types::{Episode, RunOutput};
use crate::utils::action_name;
use anyhow::{Context, Result};
use rand::prelude::*;
use rand_chacha::ChaCha12Rng;
use rand_distr::Bernoulli;
use std::{sync::Arc, time::Instant};

/// Number of major episodes per run.
pub const MAJOR_EPISODES: usize = 2;

// Weights of the reward-like signal recorded for every routing decision.
const REWARD_COST_WEIGHT: f64 = 0.25;
const REWARD_CLINICAL_WEIGHT: f64 = 0.5;
const REWARD_CLINICAL_SCALE: f64 = 50.0;
const REWARD_QUEUE_WEIGHT: f64 = 0.0001;
const REWARD_SYSTEM_WEIGHT: f64 = 0.5;

/// Simulation engine.
///
/// Holds the configuration, the health system, the population, and the
/// random number generator every stochastic decision is drawn from.
pub struct Engine {
    cfg: Config,
    input_idxs: Vec<usize>,
    output_idx: usize,
    onset_dist: Bernoulli,

    transitions: Arc<TransitionGraph>,
    actions: Vec<Action>,
    pathways: Vec<Pathway>,
    patients: Vec<Patient>,

    rng: ChaCha12Rng,
}

impl Engine {
    /// Create a new `Engine` with a random health system and population.
    ///
    /// The generator is seeded from the configuration, or from the OS when no
    /// seed is given.
    pub fn generate_initial_condition(cfg: Config) -> Result<Self> {
        let rng = match cfg.init.seed {
            Some(seed) => ChaCha12Rng::seed_from_u64(seed),
            None => ChaCha12Rng::try_from_os_rng().context("failed to seed rng from the OS")?,
        };
        Self::build(cfg, None, rng)
    }

    /// Create a new `Engine` routing over the given transition graph.
    #[cfg(test)]
    pub fn with_transitions(
        cfg: Config,
        transitions: TransitionGraph,
        rng: ChaCha12Rng,
    ) -> Result<Self> {
        Self::build(cfg, Some(transitions), rng)
    }

    fn build(
        cfg: Config,
        transitions: Option<TransitionGraph>,
        mut rng: ChaCha12Rng,
    ) -> Result<Self> {
        let model = &cfg.model;
        let input_idxs = cfg.input_idxs().context("failed to resolve input actions")?;
        let output_idx = cfg.output_idx().context("failed to resolve output action")?;
        let onset_dist =
            Bernoulli::new(model.prob_disease).context("failed to build onset distribution")?;

        let mut actions = Vec::with_capacity(model.n_actions);
        for idx in 0..model.n_actions {
            let action = Action::generate(
                idx,
                model.base_capacity,
                model.weekend_capacity,
                &model.ideal_clinical,
                &mut rng,
            )
            .with_context(|| format!("failed to generate action {idx}"))?;
            actions.push(action);
        }

        let thresholds = ThresholdMatrix::generate(
            model.n_pathways,
            model.n_actions,
            &model.ideal_clinical,
            &mut rng,
        )
        .context("failed to generate thresholds")?;

        let transitions = match transitions {
            Some(transitions) => transitions,
            None => TransitionGraph::generate(
                model.n_pathways,
                model.n_actions,
                &input_idxs,
                output_idx,
                &mut rng,
            ),
        };

        let transitions = Arc::new(transitions);
        let thresholds = Arc::new(thresholds);
        let pathways = (0..model.n_pathways)
            .map(|idx| Pathway::new(idx, Arc::clone(&transitions), Arc::clone(&thresholds)))
            .collect();

        let mut patients = Vec::with_capacity(cfg.init.n_patients);
        for id in 0..cfg.init.n_patients {
            let patient =
                Patient::generate(id, model.n_pathways, &model.ideal_clinical, &mut rng)
                    .with_context(|| format!("failed to generate patient {id}"))?;
            patients.push(patient);
        }

        log::info!(
            "built {} actions, {} pathways and {} patients",
            model.n_actions,
            model.n_pathways,
            cfg.init.n_patients
        );

        Ok(Self {
            cfg,
            input_idxs,
            output_idx,
            onset_dist,
            transitions,
            actions,
            pathways,
            patients,
            rng,
        })
    }

    pub fn transitions(&self) -> &TransitionGraph {
        &self.transitions
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn pathways(&self) -> &[Pathway] {
        &self.pathways
    }

    pub fn patients(&self) -> &[Patient] {
        &self.patients
    }

    /// Run every major episode and hand over the records and the population.
    pub fn run(mut self) -> RunOutput {
        let start = Instant::now();

        let mut episodes = Vec::with_capacity(MAJOR_EPISODES);
        for index in 0..MAJOR_EPISODES {
            let episode = self.run_episode(index);

            let progress = 100.0 * (index + 1) as f64 / MAJOR_EPISODES as f64;
            log::info!(
                "completed {progress:06.2}% (episode cost {:.2})",
                episode.system_cost.last().copied().unwrap_or(0.0)
            );
            episodes.push(episode);
        }

        log::info!("run completed in {:.2?}", start.elapsed());

        RunOutput {
            n_steps: self.cfg.output.n_steps,
            ideal_clinical: self.cfg.model.ideal_clinical,
            episodes,
            patients: self.patients,
        }
    }

    fn run_episode(&mut self, index: usize) -> Episode {
        let mut episode = self.begin_episode(index);
        for step in 0..self.cfg.output.n_steps {
            self.perform_step(step, &mut episode);
        }
        self.end_episode(episode)
    }

    fn begin_episode(&mut self, index: usize) -> Episode {
        for patient in &mut self.patients {
            patient.clear_diseases();
        }

        let n_steps = self.cfg.output.n_steps;
        Episode {
            index,
            actions: Vec::new(),
            pathways: Vec::new(),
            system_cost: Vec::with_capacity(n_steps),
            activity_log: Vec::new(),
            rewards: Vec::new(),
            mean_clinical_penalty: Vec::with_capacity(n_steps),
            mean_queue_length: Vec::with_capacity(n_steps),
        }
    }

    /// Snapshot the health system into `episode` and clear it for the next one.
    fn end_episode(&mut self, mut episode: Episode) -> Episode {
        episode.actions = self.actions.iter().map(Action::snapshot).collect();
        episode.pathways = self.pathways.iter().map(Pathway::snapshot).collect();

        for action in &mut self.actions {
            action.reset();
        }
        for pathway in &mut self.pathways {
            pathway.reset();
        }

        episode
    }

    fn perform_step(&mut self, step: usize, episode: &mut Episode) {
        // Refresh capacities before any assignment.
        for action in &mut self.actions {
            action.update_capacity(step);
        }

        // Onset, decay and routing, in patient then pathway order.
        let model = &self.cfg.model;
        for patient in &mut self.patients {
            for pathway in &mut self.pathways {
                let pw = pathway.idx();
                if !patient.is_active(pw) {
                    let entry = patient.progress_diseases(
                        pw,
                        &self.input_idxs,
                        &self.onset_dist,
                        &mut self.rng,
                    );
                    // Seeded patients wait at their entry action.
                    if let Some(idx) = entry {
                        if let Some(action) = self.actions.get_mut(idx) {
                            action.assign(patient.id());
                        }
                    }
                    continue;
                }

                patient.clinical_decay(&model.ideal_clinical, model.decay_rate);

                let system_queue: usize = self.actions.iter().map(Action::queue_len).sum();

                let next = pathway.next_action(
                    patient,
                    &mut self.actions,
                    step,
                    &mut episode.activity_log,
                    &mut self.rng,
                );
                if next == Some(self.output_idx) {
                    patient.deactivate(pw);
                    pathway.record_completion();
                    log::debug!(
                        "patient {} left {} from {:?}",
                        patient.id(),
                        pathway.name(),
                        pathway.last_action(patient).map(action_name)
                    );
                }

                let action_cost = next
                    .and_then(|idx| self.actions.get(idx))
                    .map_or(0.0, Action::cost);
                episode
                    .rewards
                    .push(compute_reward(action_cost, patient, system_queue));
            }
        }

        // Serve queues; whoever is left waits one more step.
        let mut step_cost = 0.0;
        for action in &mut self.actions {
            let (n_served, cost) = action.execute(&mut self.patients, &model.ideal_clinical);
            step_cost += cost;
            log::trace!(
                "step {step}: {} served {n_served} of {}",
                action.name(),
                action.capacity()
            );

            // A patient queued several times still waits a single step.
            let queue_len = action.queue_len();
            let mut waiting: Vec<usize> = action.queue().collect();
            waiting.sort_unstable();
            waiting.dedup();
            for patient_id in waiting {
                if let Some(patient) = self.patients.get_mut(patient_id) {
                    patient.wait(queue_len);
                }
            }
        }

        let cum_cost = episode.system_cost.last().copied().unwrap_or(0.0) + step_cost;
        episode.system_cost.push(cum_cost);
        episode
            .mean_clinical_penalty
            .push(mean(self.patients.iter().map(|p| p.outcomes().clinical_penalty)));
        episode
            .mean_queue_length
            .push(mean(self.actions.iter().map(|a| a.queue_len() as f64)));

        log::debug!("step {step}: cost {step_cost:.2}, cumulative {cum_cost:.2}");
    }
}

/// Reward-like signal of one routing decision. Recorded, never fed back.
fn compute_reward(action_cost: f64, patient: &Patient, system_queue: usize) -> f64 {
    let clinical = (patient.outcomes().clinical_penalty / REWARD_CLINICAL_SCALE).exp();
    let queue = patient.queue_time().powi(2);
    -REWARD_COST_WEIGHT * action_cost
        - REWARD_CLINICAL_WEIGHT * clinical
        - REWARD_QUEUE_WEIGHT * queue
        - REWARD_SYSTEM_WEIGHT * system_queue as f64
}

fn mean<I: Iterator<Item = f64>>(vals: I) -> f64 {
    let report = vals.collect::<Accumulator>().report();
    if report.n_vals == 0 { 0.0 } else { report.mean }
}
