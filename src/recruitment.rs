//! Recruitment Controller (C7)
//!
//! Generates the enrollment date, baseline vision, response type, and
//! response multiplier for every patient in the cohort before the Runner
//! starts scheduling visits. Two modes: a fixed total enrolled over a
//! window under a configurable temporal shape, or a constant rate applied
//! for the duration of the window.

use chrono::NaiveDate;
use rand::Rng;
use rand_chacha::ChaCha12Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::clock::{add_days, next_working_day};
use crate::patient::PatientId;
use crate::rng::{RandomSource, Substream};
use crate::vision::{clamp_vision, ResponseType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentShape {
    Uniform,
    FrontLoaded,
    Gradual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case", deny_unknown_fields)]
pub enum RecruitmentMode {
    FixedTotal { total: u32, shape: EnrollmentShape },
    ConstantRate { patients_per_period: f64, period_days: i64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResponseTypeWeights {
    pub good: f64,
    pub average: f64,
    pub poor: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecruitmentSpec {
    pub start_date: NaiveDate,
    pub run_duration_years: f64,
    pub mode: RecruitmentMode,
    pub window_days: i64,
    pub baseline_vision_mean: f64,
    pub baseline_vision_std: f64,
    pub response_type_weights: ResponseTypeWeights,
    pub response_multiplier_good: f64,
    pub response_multiplier_average: f64,
    pub response_multiplier_poor: f64,
}

/// One patient's enrollment-time draws.
#[derive(Debug, Clone, Copy)]
pub struct EnrollmentDraw {
    pub date: NaiveDate,
    pub baseline_vision: u8,
    pub response_type: ResponseType,
    pub response_multiplier: f64,
}

/// Maps a uniform draw in `[0, 1)` to a fraction of the enrollment window
/// under the configured temporal shape.
fn shape_quantile(shape: EnrollmentShape, u: f64) -> f64 {
    match shape {
        EnrollmentShape::Uniform => u,
        // Density concentrated early in the window: inverse CDF of
        // `f(x) = 2(1 - x)` over [0, 1].
        EnrollmentShape::FrontLoaded => 1.0 - (1.0 - u).sqrt(),
        // Density concentrated late in the window: inverse CDF of
        // `f(x) = 2x` over [0, 1].
        EnrollmentShape::Gradual => u.sqrt(),
    }
}

fn fixed_total_dates(
    total: u32,
    shape: EnrollmentShape,
    window_days: i64,
    calendar_start: NaiveDate,
    rng: &mut ChaCha12Rng,
) -> Vec<NaiveDate> {
    let mut dates: Vec<NaiveDate> = (0..total)
        .map(|_| {
            let u: f64 = rng.gen_range(0.0..1.0);
            let offset = (shape_quantile(shape, u) * window_days as f64).round() as i64;
            next_working_day(add_days(calendar_start, offset))
        })
        .collect();
    dates.sort();
    dates
}

/// One enrollment date every `period_days / patients_per_period`, spread
/// evenly within each period, until the window closes. The rate is a
/// configured constant, not a distribution, so no RNG draw is needed here.
fn constant_rate_dates(patients_per_period: f64, period_days: i64, window_days: i64) -> Vec<i64> {
    let mut offsets = Vec::new();
    let count_per_period = patients_per_period.max(0.0).round() as i64;
    if count_per_period == 0 || period_days <= 0 {
        return offsets;
    }
    let mut period_start = 0i64;
    while period_start < window_days {
        let spacing = period_days / count_per_period;
        for i in 0..count_per_period {
            let offset = period_start + spacing * i;
            if offset < window_days {
                offsets.push(offset);
            }
        }
        period_start += period_days;
    }
    offsets
}

fn generate_enrollment_dates(
    mode: &RecruitmentMode,
    window_days: i64,
    calendar_start: NaiveDate,
    rng: &mut ChaCha12Rng,
) -> Vec<NaiveDate> {
    match mode {
        RecruitmentMode::FixedTotal { total, shape } => {
            fixed_total_dates(*total, *shape, window_days, calendar_start, rng)
        }
        RecruitmentMode::ConstantRate { patients_per_period, period_days } => {
            constant_rate_dates(*patients_per_period, *period_days, window_days)
                .into_iter()
                .map(|offset| next_working_day(add_days(calendar_start, offset)))
                .collect()
        }
    }
}

fn draw_response_type(weights: &ResponseTypeWeights, rng: &mut ChaCha12Rng) -> ResponseType {
    let total = (weights.good + weights.average + weights.poor).max(1e-9);
    let u = rng.gen_range(0.0..1.0) * total;
    if u < weights.good {
        ResponseType::Good
    } else if u < weights.good + weights.average {
        ResponseType::Average
    } else {
        ResponseType::Poor
    }
}

fn response_multiplier_for(spec: &RecruitmentSpec, response_type: ResponseType) -> f64 {
    match response_type {
        ResponseType::Good => spec.response_multiplier_good,
        ResponseType::Average => spec.response_multiplier_average,
        ResponseType::Poor => spec.response_multiplier_poor,
    }
}

fn draw_baseline_vision(spec: &RecruitmentSpec, rng: &mut ChaCha12Rng) -> u8 {
    let normal = Normal::new(spec.baseline_vision_mean, spec.baseline_vision_std.max(1e-9))
        .expect("configured baseline_vision_std must be non-negative");
    clamp_vision(normal.sample(rng))
}

/// Generates the full cohort: enrollment dates from the `recruitment_timing`
/// global substream, then a patient-scoped `response_type_draw` substream
/// per assigned patient ID for the baseline vision and response draws. The
/// per-patient draw depends only on `(seed, patient id)`, never on dispatch
/// order, so this is safe to call once up front regardless of whether the
/// Runner later schedules patients sequentially or in parallel.
pub fn enroll_cohort(
    spec: &RecruitmentSpec,
    calendar_start: NaiveDate,
    random_source: &RandomSource,
) -> Vec<(PatientId, EnrollmentDraw)> {
    let mut timing_rng = random_source.global_stream(Substream::RecruitmentTiming);
    let dates = generate_enrollment_dates(&spec.mode, spec.window_days, calendar_start, &mut timing_rng);

    dates
        .into_iter()
        .enumerate()
        .map(|(i, date)| {
            let patient_id = PatientId::new(i as u64 + 1);
            let mut draw_rng = random_source.patient_stream(Substream::ResponseTypeDraw, patient_id);
            let response_type = draw_response_type(&spec.response_type_weights, &mut draw_rng);
            let response_multiplier = response_multiplier_for(spec, response_type);
            let baseline_vision = draw_baseline_vision(spec, &mut draw_rng);
            (
                patient_id,
                EnrollmentDraw { date, baseline_vision, response_type, response_multiplier },
            )
        })
        .collect()
}
