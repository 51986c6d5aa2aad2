//! Vision Model (C4)
//!
//! At each fortnightly tick, the vision delta is drawn from a Normal
//! distribution parameterized by (disease state x treated), scaled by the
//! patient's response multiplier, with a small chance of an additional
//! hemorrhage shock when the state is HIGHLY_ACTIVE. Cumulative vision is
//! clamped to [0, 100] after every delta.

use rand::Rng;
use rand_chacha::ChaCha12Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::disease::DiseaseState;

/// Response-type heterogeneity, drawn once per patient at enrollment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResponseType {
    Good,
    Average,
    Poor,
}

/// One (mean, std) pair for a given (disease state, treated) scenario.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VisionScenario {
    pub mean: f64,
    pub std: f64,
}

/// All eight (disease_state x treated) scenarios the specification
/// requires.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VisionChangeModel {
    pub naive_untreated: VisionScenario,
    pub naive_treated: VisionScenario,
    pub stable_untreated: VisionScenario,
    pub stable_treated: VisionScenario,
    pub active_untreated: VisionScenario,
    pub active_treated: VisionScenario,
    pub highly_active_untreated: VisionScenario,
    pub highly_active_treated: VisionScenario,
}

impl VisionChangeModel {
    pub fn scenario(&self, state: DiseaseState, treated: bool) -> VisionScenario {
        match (state, treated) {
            (DiseaseState::Naive, false) => self.naive_untreated,
            (DiseaseState::Naive, true) => self.naive_treated,
            (DiseaseState::Stable, false) => self.stable_untreated,
            (DiseaseState::Stable, true) => self.stable_treated,
            (DiseaseState::Active, false) => self.active_untreated,
            (DiseaseState::Active, true) => self.active_treated,
            (DiseaseState::HighlyActive, false) => self.highly_active_untreated,
            (DiseaseState::HighlyActive, true) => self.highly_active_treated,
        }
    }
}

/// Probability and magnitude of a hemorrhage event, evaluated per tick and
/// conditional on HIGHLY_ACTIVE disease state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HemorrhageModel {
    pub probability: f64,
    pub mean_loss: f64,
}

/// One fortnightly tick's vision update.
///
/// `response_multiplier` is the patient's good/average/poor multiplier,
/// drawn once at enrollment. `loading_bonus` is added to the tick's mean
/// only during the loading phase. `vision_rng` and `hemorrhage_rng` are
/// drawn from the `vision_noise` and `hemorrhage` substreams respectively.
#[allow(clippy::too_many_arguments)]
pub fn advance_one_tick(
    current_vision: u8,
    state: DiseaseState,
    treated: bool,
    response_multiplier: f64,
    loading_bonus: f64,
    model: &VisionChangeModel,
    hemorrhage: &HemorrhageModel,
    vision_rng: &mut ChaCha12Rng,
    hemorrhage_rng: &mut ChaCha12Rng,
) -> u8 {
    let scenario = model.scenario(state, treated);
    let normal = Normal::new(scenario.mean + loading_bonus, scenario.std.max(1e-9))
        .expect("configured std must be non-negative");
    let mut delta = normal.sample(vision_rng) * response_multiplier;

    if state == DiseaseState::HighlyActive && hemorrhage_rng.gen_range(0.0..1.0) < hemorrhage.probability {
        let shock = Normal::new(-hemorrhage.mean_loss.abs(), hemorrhage.mean_loss.abs() * 0.25 + 1e-9)
            .expect("hemorrhage mean_loss must be finite");
        delta += shock.sample(hemorrhage_rng);
    }

    clamp_vision(current_vision as f64 + delta.round())
}

/// Rounds and clamps a raw vision value into the valid [0, 100] range.
/// All model deltas pass through this; vision is never stored otherwise.
pub fn clamp_vision(raw: f64) -> u8 {
    raw.round().clamp(0.0, 100.0) as u8
}

impl ResponseType {
    pub fn label(self) -> &'static str {
        match self {
            ResponseType::Good => "good",
            ResponseType::Average => "average",
            ResponseType::Poor => "poor",
        }
    }
}
