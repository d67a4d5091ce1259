use crate::action::Action;
use crate::config::ClinicalValues;
use crate::patient::Patient;
use crate::types::{ActivityLogEntry, PathwaySnapshot};
use crate::utils::{action_name, pathway_name};
use anyhow::{Context, Result};
use rand::prelude::*;
use rand_distr::Normal;
use serde::Serialize;
use std::sync::Arc;

/// Spread of the expected clinical values around the ideal ones.
const THRESHOLD_STD_DEV: f64 = 5.0;

/// Successors of every action of every pathway.
///
/// Built once per run and shared read-only by all pathways.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionGraph {
    successors: Vec<Vec<Vec<usize>>>,
}

impl TransitionGraph {
    /// Build a graph from explicit successor lists (`[pathway][action]`).
    #[cfg(test)]
    pub fn from_successors(successors: Vec<Vec<Vec<usize>>>) -> Self {
        Self { successors }
    }

    /// Generate a random graph.
    ///
    /// The output action is terminal. Input actions fan out to a random
    /// subset of all actions. Every other action fans out to a random subset
    /// of the non-input actions. Subsets are never empty.
    pub fn generate<R: Rng>(
        n_pathways: usize,
        n_actions: usize,
        input_idxs: &[usize],
        output_idx: usize,
        rng: &mut R,
    ) -> Self {
        let all: Vec<usize> = (0..n_actions).collect();
        let non_input: Vec<usize> = all
            .iter()
            .copied()
            .filter(|idx| !input_idxs.contains(idx))
            .collect();

        let mut successors = Vec::with_capacity(n_pathways);
        for _ in 0..n_pathways {
            let mut row = Vec::with_capacity(n_actions);
            for idx in 0..n_actions {
                let pool = if idx == output_idx {
                    &[][..]
                } else if input_idxs.contains(&idx) {
                    &all[..]
                } else {
                    &non_input[..]
                };
                if pool.is_empty() {
                    row.push(Vec::new());
                    continue;
                }
                let amount = rng.random_range(1..=pool.len());
                row.push(pool.choose_multiple(rng, amount).copied().collect());
            }
            successors.push(row);
        }

        Self { successors }
    }

    /// Successors of `action` on `pathway`; empty if either is unknown.
    pub fn next_actions(&self, pathway: usize, action: usize) -> &[usize] {
        self.successors
            .get(pathway)
            .and_then(|actions| actions.get(action))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Number of actions of `pathway`.
    pub fn n_actions(&self, pathway: usize) -> usize {
        self.successors.get(pathway).map_or(0, Vec::len)
    }

    pub fn n_pathways(&self) -> usize {
        self.successors.len()
    }
}

/// Expected patient profile at one action of one pathway.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Threshold {
    pub clinical: ClinicalValues,
    pub age: u32,
    pub rand_factor: f64,
}

/// Thresholds of every action of every pathway (`[pathway][action]`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdMatrix {
    thresholds: Vec<Vec<Threshold>>,
}

impl ThresholdMatrix {
    pub fn generate<R: Rng>(
        n_pathways: usize,
        n_actions: usize,
        ideal: &ClinicalValues,
        rng: &mut R,
    ) -> Result<Self> {
        let mut thresholds = Vec::with_capacity(n_pathways);
        for _ in 0..n_pathways {
            let mut row = Vec::with_capacity(n_actions);
            for _ in 0..n_actions {
                let mut clinical = ClinicalValues::new();
                for (name, &val) in ideal {
                    let dist = Normal::new(val, THRESHOLD_STD_DEV)
                        .with_context(|| format!("failed to build threshold of {name:?}"))?;
                    clinical.insert(name.clone(), dist.sample(rng));
                }
                row.push(Threshold {
                    clinical,
                    age: rng.random_range(18..65),
                    rand_factor: rng.random_range(0.2..0.8),
                });
            }
            thresholds.push(row);
        }
        Ok(Self { thresholds })
    }

    pub fn get(&self, pathway: usize, action: usize) -> Option<&Threshold> {
        self.thresholds.get(pathway)?.get(action)
    }
}

/// Routing policy of one pathway.
#[derive(Debug, Clone)]
pub struct Pathway {
    idx: usize,
    name: String,
    transitions: Arc<TransitionGraph>,
    thresholds: Arc<ThresholdMatrix>,

    routed: usize,
    completed: usize,
}

impl Pathway {
    pub fn new(
        idx: usize,
        transitions: Arc<TransitionGraph>,
        thresholds: Arc<ThresholdMatrix>,
    ) -> Self {
        Self {
            idx,
            name: pathway_name(idx),
            transitions,
            thresholds,
            routed: 0,
            completed: 0,
        }
    }

    pub fn idx(&self) -> usize {
        self.idx
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Threshold profile of `action` on this pathway.
    pub fn threshold(&self, action: usize) -> Option<&Threshold> {
        self.thresholds.get(self.idx, action)
    }

    /// Most recent action of `patient` on this pathway.
    pub fn current_action(&self, patient: &Patient) -> Option<usize> {
        patient.current_action_on(self.idx)
    }

    /// Action of `patient` on this pathway before the current one.
    pub fn last_action(&self, patient: &Patient) -> Option<usize> {
        patient.last_action_on(self.idx)
    }

    /// Route `patient` one step forward on this pathway.
    ///
    /// The next action is drawn uniformly among the successors of the
    /// patient's current action. The patient is queued there, the decision is
    /// logged and appended to the patient's history. Returns `None` when the
    /// patient is inactive, has no position, is stalled on an action without
    /// successors, or the chosen action does not exist.
    pub fn next_action<R: Rng>(
        &mut self,
        patient: &mut Patient,
        actions: &mut [Action],
        step: usize,
        activity_log: &mut Vec<ActivityLogEntry>,
        rng: &mut R,
    ) -> Option<usize> {
        if !patient.is_active(self.idx) {
            return None;
        }
        let current = self.current_action(patient)?;
        let &next = self
            .transitions
            .next_actions(self.idx, current)
            .choose(rng)?;
        let action = actions.get_mut(next)?;

        action.assign(patient.id());
        action.update_log(patient, &self.name, current, step, activity_log);
        patient.record_visit(next, self.idx);
        self.routed += 1;
        Some(next)
    }

    /// Count a routing decision that reached the exit action.
    pub fn record_completion(&mut self) {
        self.completed += 1;
    }

    /// Clear the per-episode counters. The shared graph and thresholds are
    /// left untouched so the pathway can route again in the next episode.
    pub fn reset(&mut self) {
        self.routed = 0;
        self.completed = 0;
    }

    pub fn snapshot(&self) -> PathwaySnapshot {
        let transitions = (0..self.transitions.n_actions(self.idx))
            .map(|action| {
                self.transitions
                    .next_actions(self.idx, action)
                    .iter()
                    .map(|&next| action_name(next))
                    .collect()
            })
            .collect();
        PathwaySnapshot {
            name: self.name.clone(),
            transitions,
            routed: self.routed,
            completed: self.completed,
        }
    }
}
