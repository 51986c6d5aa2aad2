//! Disease Model (C3)
//!
//! Disease state updates on a fortnightly tick (14 simulated days),
//! independent of visit timing. Each tick samples the next state from the
//! current-state row of the transition matrix; if the patient was injected
//! within the treatment-effect window, the row is multiplied componentwise
//! by the treatment-effect multipliers for the current state, then
//! renormalized.

use rand::Rng;
use rand_chacha::ChaCha12Rng;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorContext, NamdError, Result};

/// A fortnightly tick is 14 simulated days.
pub const TICK_DAYS: i64 = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiseaseState {
    Naive,
    Stable,
    Active,
    HighlyActive,
}

impl DiseaseState {
    pub const ALL: [DiseaseState; 4] = [
        DiseaseState::Naive,
        DiseaseState::Stable,
        DiseaseState::Active,
        DiseaseState::HighlyActive,
    ];

    pub fn index(self) -> usize {
        match self {
            DiseaseState::Naive => 0,
            DiseaseState::Stable => 1,
            DiseaseState::Active => 2,
            DiseaseState::HighlyActive => 3,
        }
    }

    pub fn from_index(idx: usize) -> Self {
        Self::ALL[idx]
    }
}

/// 4x4 row-stochastic matrix, `matrix[from.index()][to.index()]`.
pub type TransitionMatrix = [[f64; 4]; 4];

/// Validates that every row sums to 1 within the tolerance the
/// specification requires (1e-9), as measured *before* any
/// treatment-effect adjustment — the raw configured matrix must already be
/// a valid stochastic matrix.
pub fn validate_transition_matrix(matrix: &TransitionMatrix) -> Result<()> {
    const TOLERANCE: f64 = 1e-9;
    for (i, row) in matrix.iter().enumerate() {
        let sum: f64 = row.iter().sum();
        if (sum - 1.0).abs() > TOLERANCE {
            return Err(NamdError::misconfigured(format!(
                "disease_transitions row {} ({:?}) sums to {} (expected 1.0 +/- {})",
                i,
                DiseaseState::from_index(i),
                sum,
                TOLERANCE
            )));
        }
    }
    Ok(())
}

/// Applies the treatment-effect multiplier to one row and renormalizes.
/// Returns `MisconfiguredProtocol` if the row sums to zero after
/// multiplication (the one documented failure mode of this component).
fn treated_row(
    base_row: &[f64; 4],
    multiplier_row: &[f64; 4],
    state: DiseaseState,
) -> Result<[f64; 4]> {
    let mut adjusted = [0.0; 4];
    for i in 0..4 {
        adjusted[i] = base_row[i] * multiplier_row[i];
    }
    let sum: f64 = adjusted.iter().sum();
    if sum <= 0.0 {
        return Err(NamdError::misconfigured(format!(
            "treatment-effect multiplier row for {:?} sums to zero after adjustment",
            state
        )));
    }
    for v in adjusted.iter_mut() {
        *v /= sum;
    }
    Ok(adjusted)
}

/// Samples the next disease state for one fortnightly tick.
///
/// `treated` indicates whether the patient received an injection within
/// `treatment_effect_window_days` of this tick's date.
pub fn advance_one_tick(
    current: DiseaseState,
    transitions: &TransitionMatrix,
    treatment_multipliers: &TransitionMatrix,
    treated: bool,
    rng: &mut ChaCha12Rng,
) -> Result<DiseaseState> {
    let base_row = transitions[current.index()];
    let row = if treated {
        treated_row(&base_row, &treatment_multipliers[current.index()], current)?
    } else {
        base_row
    };

    let draw: f64 = rng.gen_range(0.0..1.0);
    let mut cumulative = 0.0;
    for (idx, p) in row.iter().enumerate() {
        cumulative += p;
        if draw < cumulative {
            return Ok(DiseaseState::from_index(idx));
        }
    }
    // Floating-point rounding can leave `draw` fractionally above the
    // cumulative sum; fall back to the last state in the row rather than
    // treating this as an error.
    Ok(DiseaseState::from_index(3))
}

/// Number of whole fortnightly ticks between two dates `from`..=`to`
/// (exclusive of `from`, inclusive of `to`), used by the executor to catch
/// a patient's disease/vision state up to the current visit date.
pub fn ticks_between(from_days: i64, to_days: i64) -> i64 {
    if to_days <= from_days {
        return 0;
    }
    (to_days - from_days) / TICK_DAYS
}
