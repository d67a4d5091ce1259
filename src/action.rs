use crate::config::ClinicalValues;
use crate::patient::Patient;
use crate::types::{ActionSnapshot, ActivityLogEntry};
use crate::utils::action_name;
use anyhow::{Context, Result};
use rand::prelude::*;
use rand_distr::Normal;
use std::collections::VecDeque;

/// Mean and standard deviation of the effect of an action on its target variable.
const EFFECT_MEAN: f64 = 2.0;
const EFFECT_STD_DEV: f64 = 0.05;

/// Steps per week; the last two steps of every week are the weekend.
const WEEK_LEN: usize = 7;
const WEEKDAYS: usize = 5;

#[derive(Debug, Clone)]
pub struct Action {
    name: String,

    base_capacity: usize,
    weekend_capacity: f64,
    capacity: usize,

    effect: ClinicalValues,
    cost: f64,
    duration: usize,

    /// Ids of the assigned patients, earliest first.
    queue: VecDeque<usize>,
    /// Number of patients served at every executed step.
    schedule: Vec<usize>,
    total_cost: f64,
}

impl Action {
    pub fn new(
        idx: usize,
        base_capacity: usize,
        weekend_capacity: f64,
        effect: ClinicalValues,
        cost: f64,
        duration: usize,
    ) -> Self {
        Self {
            name: action_name(idx),
            base_capacity,
            weekend_capacity,
            capacity: base_capacity,
            effect,
            cost,
            duration,
            queue: VecDeque::new(),
            schedule: Vec::new(),
            total_cost: 0.0,
        }
    }

    /// Create action `idx` with a random cost, duration and an effect on a
    /// single clinical variable (chosen by cycling through the variables).
    pub fn generate<R: Rng>(
        idx: usize,
        base_capacity: usize,
        weekend_capacity: f64,
        ideal: &ClinicalValues,
        rng: &mut R,
    ) -> Result<Self> {
        let effect_dist = Normal::new(EFFECT_MEAN, EFFECT_STD_DEV)
            .context("failed to build effect distribution")?;
        let target = idx % ideal.len().max(1);
        let effect = ideal
            .keys()
            .enumerate()
            .map(|(i_var, name)| {
                let delta = if i_var == target {
                    effect_dist.sample(rng)
                } else {
                    0.0
                };
                (name.clone(), delta)
            })
            .collect();
        let cost = rng.random_range(20..100) as f64;
        let duration = rng.random_range(1..3);
        Ok(Self::new(
            idx,
            base_capacity,
            weekend_capacity,
            effect,
            cost,
            duration,
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn cost(&self) -> f64 {
        self.cost
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Ids of the queued patients, earliest first.
    pub fn queue(&self) -> impl Iterator<Item = usize> + '_ {
        self.queue.iter().copied()
    }

    #[cfg(test)]
    pub fn schedule(&self) -> &[usize] {
        &self.schedule
    }

    /// Capacity available at `step`: reduced on weekends.
    pub fn capacity_at(&self, step: usize) -> usize {
        if step % WEEK_LEN < WEEKDAYS {
            self.base_capacity
        } else {
            (self.base_capacity as f64 * self.weekend_capacity).floor() as usize
        }
    }

    pub fn update_capacity(&mut self, step: usize) {
        self.capacity = self.capacity_at(step);
    }

    /// Queue a patient. Congestion is only resolved at execution time.
    pub fn assign(&mut self, patient_id: usize) {
        self.queue.push_back(patient_id);
    }

    /// Record that `patient` was routed from `current_action` to this action.
    pub fn update_log(
        &self,
        patient: &Patient,
        pathway_code: &str,
        current_action: usize,
        step: usize,
        activity_log: &mut Vec<ActivityLogEntry>,
    ) {
        activity_log.push(ActivityLogEntry {
            patient_id: patient.id(),
            pathway_code: pathway_code.to_string(),
            action: action_name(current_action),
            simulation_time: step,
            next_action: self.name.clone(),
        });
    }

    /// Serve up to `capacity` queued patients in arrival order.
    ///
    /// Returns the number of patients served and the cost charged, which is
    /// the action's cost whenever at least one patient is served.
    pub fn execute(&mut self, patients: &mut [Patient], ideal: &ClinicalValues) -> (usize, f64) {
        let n_served = self.capacity.min(self.queue.len());
        for patient_id in self.queue.drain(..n_served) {
            if let Some(patient) = patients.get_mut(patient_id) {
                patient.apply_effect(&self.effect, ideal);
            }
        }
        self.schedule.push(n_served);

        let cost = if n_served > 0 { self.cost } else { 0.0 };
        self.total_cost += cost;
        (n_served, cost)
    }

    /// Clear the per-episode state, keeping the service parameters.
    pub fn reset(&mut self) {
        self.queue.clear();
        self.schedule.clear();
        self.total_cost = 0.0;
    }

    pub fn snapshot(&self) -> ActionSnapshot {
        ActionSnapshot {
            name: self.name.clone(),
            base_capacity: self.base_capacity,
            capacity: self.capacity,
            effect: self.effect.clone(),
            cost: self.cost,
            duration: self.duration,
            schedule: self.schedule.clone(),
            queue: self.queue.iter().copied().collect(),
            total_cost: self.total_cost,
        }
    }
}
