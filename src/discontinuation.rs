//! Discontinuation Manager (C6)
//!
//! At each decision visit the manager evaluates five of the six
//! categories in strict priority order (poor response, system
//! discontinuation, reauthorization failure, premature, stable-at-max);
//! the first category that fires creates the `DiscontinuationRecord`.
//! Mortality, the remaining category, is a per-tick Bernoulli independent
//! of visit cadence and is evaluated by the Visit Executor during disease
//! tick advancement rather than here — see DESIGN.md for why the two
//! cadences are split this way.
//!
//! Categories with a configured monitoring schedule leave the patient in
//! a `monitoring` sub-state: at each monitoring visit retreatment criteria
//! are tested, and either the record clears (patient resumes at the
//! protocol's minimum interval) or monitoring continues until the
//! schedule is exhausted, at which point the patient remains
//! discontinued terminally.

use chrono::NaiveDate;
use rand::Rng;
use rand_chacha::ChaCha12Rng;
use serde::{Deserialize, Serialize};

use crate::clock::add_days;
use crate::patient::Patient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscontinuationCategory {
    StableMaxInterval,
    SystemDiscontinuation,
    ReauthorizationFailure,
    Premature,
    PoorResponse,
    Mortality,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscontinuationRecord {
    pub category: DiscontinuationCategory,
    pub date: NaiveDate,
    pub monitoring_schedule: Vec<NaiveDate>,
    /// Vision at the moment of discontinuation, the baseline against which
    /// retreatment vision-loss is measured.
    pub vision_at_discontinuation: u8,
}

/// Per-category parameters from the protocol's `discontinuation_profile`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiscontinuationProfile {
    pub mortality_annual_probability: f64,
    pub poor_response_vision_threshold: u8,
    pub poor_response_consecutive_visits: u32,
    pub poor_response_monitoring_weeks: Vec<u32>,
    pub system_discontinuation_annual_probability: f64,
    pub system_discontinuation_monitoring_weeks: Vec<u32>,
    pub reauthorization_failure_annual_probability: f64,
    pub reauthorization_failure_monitoring_weeks: Vec<u32>,
    pub premature_per_visit_probability: f64,
    pub premature_monitoring_weeks: Vec<u32>,
    pub stable_max_interval_consecutive_threshold: u32,
    pub stable_max_interval_monitoring_weeks: Vec<u32>,
    /// Open question #2 in the specification: exposed, no default.
    pub retreatment_vision_loss_threshold: u8,
    /// Open question #1: annual-review tolerance, exposed, no default.
    pub annual_review_window_days: u32,
}

/// Converts an annual hazard into the probability of the event occurring
/// within one period of `period_days`, assuming a constant hazard rate.
pub fn annual_to_period_probability(annual_probability: f64, period_days: i64) -> f64 {
    if annual_probability <= 0.0 {
        return 0.0;
    }
    if annual_probability >= 1.0 {
        return 1.0;
    }
    1.0 - (1.0 - annual_probability).powf(period_days as f64 / 365.0)
}

fn monitoring_dates(from: NaiveDate, weeks: &[u32]) -> Vec<NaiveDate> {
    weeks.iter().map(|w| add_days(from, *w as i64 * 7)).collect()
}

/// Result of a single category evaluator.
struct Decision {
    category: DiscontinuationCategory,
    monitoring_weeks: Vec<u32>,
}

type Evaluator = fn(&Patient, NaiveDate, i64, &DiscontinuationProfile, &mut ChaCha12Rng) -> Option<Decision>;

fn eval_poor_response(
    patient: &Patient,
    _date: NaiveDate,
    _period_days: i64,
    profile: &DiscontinuationProfile,
    _rng: &mut ChaCha12Rng,
) -> Option<Decision> {
    if patient.vision_below_threshold_streak() >= profile.poor_response_consecutive_visits {
        Some(Decision {
            category: DiscontinuationCategory::PoorResponse,
            monitoring_weeks: profile.poor_response_monitoring_weeks.clone(),
        })
    } else {
        None
    }
}

fn eval_system_discontinuation(
    _patient: &Patient,
    _date: NaiveDate,
    period_days: i64,
    profile: &DiscontinuationProfile,
    rng: &mut ChaCha12Rng,
) -> Option<Decision> {
    let p = annual_to_period_probability(profile.system_discontinuation_annual_probability, period_days);
    if rng.gen_range(0.0..1.0) < p {
        Some(Decision {
            category: DiscontinuationCategory::SystemDiscontinuation,
            monitoring_weeks: profile.system_discontinuation_monitoring_weeks.clone(),
        })
    } else {
        None
    }
}

fn eval_reauthorization_failure(
    patient: &Patient,
    date: NaiveDate,
    _period_days: i64,
    profile: &DiscontinuationProfile,
    rng: &mut ChaCha12Rng,
) -> Option<Decision> {
    if !is_within_annual_window(patient.enrollment_date(), date, profile.annual_review_window_days) {
        return None;
    }
    if rng.gen_range(0.0..1.0) < profile.reauthorization_failure_annual_probability {
        Some(Decision {
            category: DiscontinuationCategory::ReauthorizationFailure,
            monitoring_weeks: profile.reauthorization_failure_monitoring_weeks.clone(),
        })
    } else {
        None
    }
}

fn eval_premature(
    _patient: &Patient,
    _date: NaiveDate,
    _period_days: i64,
    profile: &DiscontinuationProfile,
    rng: &mut ChaCha12Rng,
) -> Option<Decision> {
    if rng.gen_range(0.0..1.0) < profile.premature_per_visit_probability {
        Some(Decision {
            category: DiscontinuationCategory::Premature,
            monitoring_weeks: profile.premature_monitoring_weeks.clone(),
        })
    } else {
        None
    }
}

fn eval_stable_max_interval(
    patient: &Patient,
    _date: NaiveDate,
    _period_days: i64,
    profile: &DiscontinuationProfile,
    _rng: &mut ChaCha12Rng,
) -> Option<Decision> {
    if patient.consecutive_stable_at_max() >= profile.stable_max_interval_consecutive_threshold {
        Some(Decision {
            category: DiscontinuationCategory::StableMaxInterval,
            monitoring_weeks: profile.stable_max_interval_monitoring_weeks.clone(),
        })
    } else {
        None
    }
}

/// Ordered evaluators, highest priority first. A fixed list, not a runtime
/// plugin registry (per the design note against dynamic dispatch here).
const EVALUATORS: &[Evaluator] = &[
    eval_poor_response,
    eval_system_discontinuation,
    eval_reauthorization_failure,
    eval_premature,
    eval_stable_max_interval,
];

fn is_within_annual_window(enrollment: NaiveDate, date: NaiveDate, window_days: u32) -> bool {
    let days_since_enrollment = (date - enrollment).num_days();
    if days_since_enrollment <= 0 {
        return false;
    }
    let remainder = days_since_enrollment % 365;
    let distance_to_anniversary = remainder.min(365 - remainder);
    distance_to_anniversary <= window_days as i64
}

/// Evaluates the five visit-cadence categories in priority order at a
/// decision visit. Returns `Some` for the first category that fires.
pub fn evaluate_decision(
    patient: &Patient,
    date: NaiveDate,
    period_days: i64,
    profile: &DiscontinuationProfile,
    rng: &mut ChaCha12Rng,
) -> Option<DiscontinuationRecord> {
    for evaluator in EVALUATORS {
        if let Some(decision) = evaluator(patient, date, period_days, profile, rng) {
            return Some(DiscontinuationRecord {
                category: decision.category,
                date,
                monitoring_schedule: monitoring_dates(date, &decision.monitoring_weeks),
                vision_at_discontinuation: patient.current_vision(),
            });
        }
    }
    None
}

/// Per-tick mortality Bernoulli. Evaluated by the executor on every
/// fortnightly tick regardless of whether a visit occurs that day.
pub fn evaluate_mortality(
    profile: &DiscontinuationProfile,
    rng: &mut ChaCha12Rng,
) -> bool {
    let p = annual_to_period_probability(profile.mortality_annual_probability, crate::disease::TICK_DAYS);
    rng.gen_range(0.0..1.0) < p
}

/// Tests the configured retreatment criteria at a monitoring visit.
/// Retreatment fires when vision has dropped by at least the configured
/// threshold since discontinuation (a proxy for fluid recurrence in the
/// absence of OCT-derived signal in this model).
pub fn should_retreat(
    record: &DiscontinuationRecord,
    current_vision: u8,
    profile: &DiscontinuationProfile,
) -> bool {
    let loss = record.vision_at_discontinuation as i16 - current_vision as i16;
    loss >= profile.retreatment_vision_loss_threshold as i16
}
