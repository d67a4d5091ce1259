//! Simulation output types.

use crate::config::ClinicalValues;
use crate::patient::Patient;
use serde::Serialize;

/// One routing decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityLogEntry {
    pub patient_id: usize,
    pub pathway_code: String,
    /// Action the patient was routed from.
    pub action: String,
    pub simulation_time: usize,
    pub next_action: String,
}

/// State of an action at the end of a major episode.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionSnapshot {
    pub name: String,
    pub base_capacity: usize,
    pub capacity: usize,
    pub effect: ClinicalValues,
    pub cost: f64,
    pub duration: usize,

    /// Number of patients served at every step.
    pub schedule: Vec<usize>,
    /// Ids of the patients still queued.
    pub queue: Vec<usize>,
    /// Cost charged over the episode.
    pub total_cost: f64,
}

/// State of a pathway at the end of a major episode.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathwaySnapshot {
    pub name: String,
    /// Successor names of every action, indexed by action.
    pub transitions: Vec<Vec<String>>,
    /// Routing decisions taken over the episode.
    pub routed: usize,
    /// Routing decisions that reached the exit action.
    pub completed: usize,
}

/// Record of one major episode.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Episode {
    pub index: usize,
    pub actions: Vec<ActionSnapshot>,
    pub pathways: Vec<PathwaySnapshot>,

    /// Cumulative system cost at the end of every step.
    pub system_cost: Vec<f64>,
    pub activity_log: Vec<ActivityLogEntry>,

    /// Reward-like signal of every routing decision (observability only).
    pub rewards: Vec<f64>,
    /// Mean clinical penalty over patients at the end of every step.
    pub mean_clinical_penalty: Vec<f64>,
    /// Mean queue length over actions at the end of every step.
    pub mean_queue_length: Vec<f64>,
}

/// Everything a finished run hands over to reporting.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutput {
    pub n_steps: usize,
    pub ideal_clinical: ClinicalValues,
    pub episodes: Vec<Episode>,
    pub patients: Vec<Patient>,
}

impl RunOutput {
    pub fn first_episode(&self) -> Option<&Episode> {
        self.episodes.first()
    }

    pub fn last_episode(&self) -> Option<&Episode> {
        self.episodes.last()
    }
}
