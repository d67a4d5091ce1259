use crate::config::ClinicalValues;
use anyhow::{Context, Result};
use rand::prelude::*;
use rand_distr::{Bernoulli, Normal};
use serde::{Deserialize, Serialize};

/// Probability of each comorbidity being present at construction.
const PROB_COMORBIDITY: f64 = 0.1;

/// Relative spread of the initial clinical values around the ideal ones.
const REL_STD_DEV_CLINICAL: f64 = 0.05;

/// Extra decay contributed by each comorbidity.
const COMORBIDITY_DECAY_FACTOR: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sex {
    Female,
    Male,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgeGroup {
    #[serde(rename = "18-34")]
    Young,
    #[serde(rename = "35-49")]
    Middle,
    #[serde(rename = "50-64")]
    Senior,
}

impl AgeGroup {
    pub fn from_age(age: u32) -> Self {
        match age {
            0..35 => AgeGroup::Young,
            35..50 => AgeGroup::Middle,
            _ => AgeGroup::Senior,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comorbidity {
    Hypertension,
    Diabetes,
    Obesity,
    Copd,
    Depression,
}

const COMORBIDITIES: [Comorbidity; 5] = [
    Comorbidity::Hypertension,
    Comorbidity::Diabetes,
    Comorbidity::Obesity,
    Comorbidity::Copd,
    Comorbidity::Depression,
];

/// Penalties accumulated by a patient over the whole run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Outcomes {
    pub queue_penalty: f64,
    pub clinical_penalty: f64,
}

/// Single entry of a patient's history: an action reached on a pathway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Visit {
    pub action: usize,
    pub pathway: usize,
}

/// Most recent and second most recent action of a patient on one pathway.
#[derive(Debug, Clone, Copy, Default)]
struct Position {
    current: Option<usize>,
    last: Option<usize>,
}

/// Simulated individual.
#[derive(Debug, Clone, Serialize)]
pub struct Patient {
    id: usize,
    age: u32,
    age_group: AgeGroup,
    sex: Sex,

    /// Active flag of every pathway.
    diseases: Vec<bool>,
    comorbidities: Vec<Comorbidity>,

    clinical: ClinicalValues,
    outcomes: Outcomes,
    sickness: f64,

    /// Append-only audit trail of every action reached.
    history: Vec<Visit>,
    /// Position index of every pathway, kept in sync with `history`.
    #[serde(skip)]
    positions: Vec<Position>,

    queue_time: f64,
}

impl Patient {
    /// Create a patient with random demographics and clinical values scattered
    /// around the ideal ones.
    pub fn generate<R: Rng>(
        id: usize,
        n_pathways: usize,
        ideal: &ClinicalValues,
        rng: &mut R,
    ) -> Result<Self> {
        let age = rng.random_range(18..65);
        let sex = if rng.random_bool(0.5) {
            Sex::Female
        } else {
            Sex::Male
        };

        let comorbidity_dist = Bernoulli::new(PROB_COMORBIDITY)
            .context("failed to build comorbidity distribution")?;
        let comorbidities = COMORBIDITIES
            .into_iter()
            .filter(|_| comorbidity_dist.sample(rng))
            .collect();

        let noise_dist = Normal::new(0.0, REL_STD_DEV_CLINICAL)
            .context("failed to build clinical noise distribution")?;
        let clinical = ideal
            .iter()
            .map(|(name, &val)| (name.clone(), val * (1.0 + noise_dist.sample(rng))))
            .collect();

        let mut patient = Self {
            id,
            age,
            age_group: AgeGroup::from_age(age),
            sex,
            diseases: vec![false; n_pathways],
            comorbidities,
            clinical,
            outcomes: Outcomes::default(),
            sickness: 0.0,
            history: Vec::new(),
            positions: vec![Position::default(); n_pathways],
            queue_time: 0.0,
        };
        patient.update_sickness(ideal);
        Ok(patient)
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn age(&self) -> u32 {
        self.age
    }

    pub fn age_group(&self) -> AgeGroup {
        self.age_group
    }

    pub fn comorbidities(&self) -> &[Comorbidity] {
        &self.comorbidities
    }

    pub fn clinical(&self) -> &ClinicalValues {
        &self.clinical
    }

    pub fn outcomes(&self) -> &Outcomes {
        &self.outcomes
    }

    pub fn sickness(&self) -> f64 {
        self.sickness
    }

    pub fn history(&self) -> &[Visit] {
        &self.history
    }

    pub fn queue_time(&self) -> f64 {
        self.queue_time
    }

    /// Whether the patient is currently progressing through `pathway`.
    pub fn is_active(&self, pathway: usize) -> bool {
        self.diseases.get(pathway).copied().unwrap_or(false)
    }

    pub fn deactivate(&mut self, pathway: usize) {
        if let Some(flag) = self.diseases.get_mut(pathway) {
            *flag = false;
        }
    }

    /// Clear every disease flag, leaving history and clinical state untouched.
    pub fn clear_diseases(&mut self) {
        self.diseases.iter_mut().for_each(|flag| *flag = false);
    }

    /// Append a visit to the history and move the pathway position forward.
    pub fn record_visit(&mut self, action: usize, pathway: usize) {
        self.history.push(Visit { action, pathway });
        if let Some(pos) = self.positions.get_mut(pathway) {
            pos.last = pos.current;
            pos.current = Some(action);
        }
    }

    /// Most recent action reached on `pathway`, if any.
    pub fn current_action_on(&self, pathway: usize) -> Option<usize> {
        self.positions.get(pathway)?.current
    }

    /// Second most recent action reached on `pathway`, if any.
    pub fn last_action_on(&self, pathway: usize) -> Option<usize> {
        self.positions.get(pathway)?.last
    }

    /// Attempt disease onset on `pathway`.
    ///
    /// Draws exactly one sample from `onset_dist`. On success, if the patient
    /// was inactive, the pathway becomes active and the patient is seeded onto
    /// a random entry action, which is returned so it can be queued.
    pub fn progress_diseases<R: Rng>(
        &mut self,
        pathway: usize,
        input_idxs: &[usize],
        onset_dist: &Bernoulli,
        rng: &mut R,
    ) -> Option<usize> {
        let onset = onset_dist.sample(rng);
        if !onset || self.is_active(pathway) || pathway >= self.diseases.len() {
            return None;
        }
        let &entry = input_idxs.choose(rng)?;
        self.diseases[pathway] = true;
        self.record_visit(entry, pathway);
        Some(entry)
    }

    /// Drift every clinical variable away from its ideal value and charge the
    /// resulting deviation to the clinical penalty.
    ///
    /// Does nothing unless the patient is active on some pathway.
    pub fn clinical_decay(&mut self, ideal: &ClinicalValues, decay_rate: f64) {
        if !self.diseases.iter().any(|&flag| flag) {
            return;
        }

        let factor = 1.0 + COMORBIDITY_DECAY_FACTOR * self.comorbidities.len() as f64;
        for (name, val) in self.clinical.iter_mut() {
            let Some(&ideal_val) = ideal.get(name) else {
                continue;
            };
            let dir = if *val >= ideal_val { 1.0 } else { -1.0 };
            *val += dir * decay_rate * ideal_val * factor;
        }

        self.outcomes.clinical_penalty += relative_deviations(&self.clinical, ideal).sum::<f64>();
        self.update_sickness(ideal);
    }

    /// Add the effect of an action to the clinical values.
    pub fn apply_effect(&mut self, effect: &ClinicalValues, ideal: &ClinicalValues) {
        for (name, delta) in effect {
            if let Some(val) = self.clinical.get_mut(name) {
                *val += delta;
            }
        }
        self.update_sickness(ideal);
    }

    /// Account for one more step spent waiting in a queue of length `queue_len`.
    pub fn wait(&mut self, queue_len: usize) {
        self.queue_time += 1.0;
        self.outcomes.queue_penalty += queue_len as f64;
    }

    fn update_sickness(&mut self, ideal: &ClinicalValues) {
        let n_vars = self.clinical.len();
        self.sickness = if n_vars == 0 {
            0.0
        } else {
            relative_deviations(&self.clinical, ideal).sum::<f64>() / n_vars as f64
        };
    }
}

fn relative_deviations<'a>(
    clinical: &'a ClinicalValues,
    ideal: &'a ClinicalValues,
) -> impl Iterator<Item = f64> + 'a {
    clinical.iter().filter_map(|(name, &val)| {
        let &ideal_val = ideal.get(name)?;
        Some((val - ideal_val).abs() / ideal_val)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_chacha::ChaCha12Rng;

    fn ideal() -> ClinicalValues {
        [("bp".to_string(), 120.0), ("glucose".to_string(), 90.0)]
            .into_iter()
            .collect()
    }

    fn patient(n_pathways: usize) -> Patient {
        let mut rng = ChaCha12Rng::seed_from_u64(1);
        Patient::generate(0, n_pathways, &ideal(), &mut rng).unwrap()
    }

    fn scan_history(patient: &Patient, pathway: usize, nth: usize) -> Option<usize> {
        patient
            .history()
            .iter()
            .rev()
            .filter(|visit| visit.pathway == pathway)
            .nth(nth)
            .map(|visit| visit.action)
    }

    #[test]
    fn generated_patient_is_plausible() {
        let mut rng = ChaCha12Rng::seed_from_u64(3);
        for id in 0..50 {
            let p = Patient::generate(id, 4, &ideal(), &mut rng).unwrap();
            assert!((18..65).contains(&p.age()));
            assert_eq!(p.age_group(), AgeGroup::from_age(p.age()));
            assert_eq!(p.clinical().len(), 2);
            assert!((0..4).all(|pw| !p.is_active(pw)));
            assert!(p.history().is_empty());
            assert!(p.sickness() >= 0.0);
        }
    }

    #[test]
    fn certain_onset_seeds_an_entry_action() {
        let mut p = patient(2);
        let mut rng = ChaCha12Rng::seed_from_u64(5);
        let always = Bernoulli::new(1.0).unwrap();

        let entry = p.progress_diseases(1, &[0, 3], &always, &mut rng).unwrap();
        assert!(entry == 0 || entry == 3);
        assert!(p.is_active(1));
        assert!(!p.is_active(0));
        assert_eq!(p.current_action_on(1), Some(entry));
        assert_eq!(
            p.history(),
            &[Visit {
                action: entry,
                pathway: 1
            }]
        );

        // Already active: no second seeding.
        assert_eq!(p.progress_diseases(1, &[0, 3], &always, &mut rng), None);
        assert_eq!(p.history().len(), 1);
    }

    #[test]
    fn impossible_onset_is_a_no_op() {
        let mut p = patient(1);
        let mut rng = ChaCha12Rng::seed_from_u64(5);
        let never = Bernoulli::new(0.0).unwrap();
        for _ in 0..20 {
            assert_eq!(p.progress_diseases(0, &[0], &never, &mut rng), None);
        }
        assert!(!p.is_active(0));
        assert!(p.history().is_empty());
    }

    #[test]
    fn position_index_matches_backward_scan() {
        let mut p = patient(3);
        let visits = [(0, 0), (2, 1), (4, 0), (1, 2), (5, 0), (3, 1)];
        for &(action, pathway) in &visits {
            p.record_visit(action, pathway);
            for pw in 0..3 {
                assert_eq!(p.current_action_on(pw), scan_history(&p, pw, 0));
                assert_eq!(p.last_action_on(pw), scan_history(&p, pw, 1));
            }
        }
        assert_eq!(p.current_action_on(0), Some(5));
        assert_eq!(p.last_action_on(0), Some(4));
        assert_eq!(p.last_action_on(2), None);
        assert_eq!(p.current_action_on(7), None);
        assert_eq!(p.history().len(), visits.len());
    }

    #[test]
    fn decay_pushes_values_away_from_ideal() {
        let mut p = patient(1);
        let before = p.clinical().clone();

        // Inactive patients do not deteriorate.
        p.clinical_decay(&ideal(), 0.01);
        assert_eq!(p.clinical(), &before);
        assert_eq!(p.outcomes().clinical_penalty, 0.0);

        p.diseases[0] = true;
        let sickness_before = p.sickness();
        p.clinical_decay(&ideal(), 0.01);
        for (name, &val) in p.clinical() {
            let ideal_val = ideal()[name];
            assert!((val - ideal_val).abs() > (before[name] - ideal_val).abs());
        }
        assert!(p.outcomes().clinical_penalty > 0.0);
        assert!(p.sickness() > sickness_before);
    }

    #[test]
    fn decay_scales_with_comorbidities() {
        let decayed = |comorbidities: Vec<Comorbidity>| {
            let mut p = patient(1);
            p.clinical = [("bp".to_string(), 110.0), ("glucose".to_string(), 90.0)]
                .into_iter()
                .collect();
            p.comorbidities = comorbidities;
            p.diseases[0] = true;
            p.clinical_decay(&ideal(), 0.01);
            p
        };

        // Below ideal moves down, exactly ideal moves up.
        let p = decayed(Vec::new());
        assert!((p.clinical()["bp"] - 108.8).abs() < 1e-9);
        assert!((p.clinical()["glucose"] - 90.9).abs() < 1e-9);
        let penalty = 11.2 / 120.0 + 0.9 / 90.0;
        assert!((p.outcomes().clinical_penalty - penalty).abs() < 1e-9);
        assert!((p.sickness() - penalty / 2.0).abs() < 1e-9);

        let p = decayed(vec![Comorbidity::Diabetes, Comorbidity::Copd]);
        assert!((p.clinical()["bp"] - 107.6).abs() < 1e-9);
        assert!((p.clinical()["glucose"] - 91.8).abs() < 1e-9);
        let penalty = 12.4 / 120.0 + 1.8 / 90.0;
        assert!((p.outcomes().clinical_penalty - penalty).abs() < 1e-9);
    }

    #[test]
    fn effects_and_waiting_accumulate() {
        let mut p = patient(1);
        let bp = p.clinical()["bp"];
        let effect: ClinicalValues = [("bp".to_string(), 2.0), ("unknown".to_string(), 9.0)]
            .into_iter()
            .collect();
        p.apply_effect(&effect, &ideal());
        assert_eq!(p.clinical()["bp"], bp + 2.0);
        assert!(!p.clinical().contains_key("unknown"));

        p.wait(3);
        p.wait(1);
        assert_eq!(p.queue_time(), 2.0);
        assert_eq!(p.outcomes().queue_penalty, 4.0);
    }

    #[test]
    fn clearing_diseases_keeps_history() {
        let mut p = patient(2);
        let mut rng = ChaCha12Rng::seed_from_u64(9);
        let always = Bernoulli::new(1.0).unwrap();
        p.progress_diseases(0, &[0], &always, &mut rng);
        p.progress_diseases(1, &[0], &always, &mut rng);
        p.deactivate(0);
        assert!(!p.is_active(0));
        assert!(p.is_active(1));
        p.clear_diseases();
        assert!(!p.is_active(1));
        assert_eq!(p.history().len(), 2);
    }
}
