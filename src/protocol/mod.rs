//! Protocol Engine (C5)
//!
//! A tagged variant over the two supported protocols — Treat-and-Extend
//! and Fixed-Interval/Treat-and-Treat — sharing one capability:
//! `decide_next_visit`. This is a flat enum dispatch, not an inheritance
//! hierarchy or runtime plugin registry, per the design note in §9 of the
//! specification.
//!
//! Loading-phase scheduling (three injection-only visits followed by one
//! decision_only_post_loading visit) is identical for both variants and
//! lives here as shared logic; each variant only supplies the maintenance
//! policy that begins once loading completes.

mod fixed_interval;
mod treat_and_extend;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::clock::add_days_working;
use crate::patient::Patient;
use crate::visit::{Phase, VisitType};

pub use fixed_interval::FixedInterval;
pub use treat_and_extend::TreatAndExtend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolType {
    TreatAndExtend,
    FixedInterval,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProtocolConfig {
    pub protocol_type: ProtocolType,
    pub loading_doses: u32,
    pub loading_interval_days: i64,
    pub min_interval_days: i64,
    pub max_interval_days: i64,
    pub extension_days: i64,
    pub shortening_days: i64,
    pub maintenance_interval_days: i64,
    /// Open question #1 in the specification: tolerance window (days,
    /// either side) for the Fixed-Interval protocol's annual review
    /// visits. Required, no default.
    pub annual_review_window_days: i64,
}

/// What the protocol decided the next visit should be.
///
/// `consecutive_stable_at_max` and `anniversaries_reviewed` carry the
/// updated scheduler counters the executor must write back onto the
/// patient after applying `schedule_next` — each is meaningful only to
/// the variant that uses it and is left unchanged (read back from the
/// patient) by the other.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NextVisit {
    pub date: NaiveDate,
    pub visit_type: VisitType,
    pub phase: Phase,
    pub interval_days: i64,
    pub consecutive_stable_at_max: u32,
    pub anniversaries_reviewed: u32,
}

/// The shared capability set from §9: "decide_next_visit,
/// classify_visit_type" collapses here to a single entry point, since the
/// type of the visit that just happened is read from the patient's
/// scheduler state (set by the previous call to this same method) rather
/// than reclassified after the fact.
pub trait ProtocolBehavior {
    /// Given the patient immediately after executing the visit on
    /// `current_date`, decide the next visit's date, type, phase, and the
    /// interval that produced it.
    fn decide_maintenance_visit(&self, patient: &Patient, current_date: NaiveDate) -> NextVisit;
}

#[derive(Debug, Clone)]
pub enum Protocol {
    TreatAndExtend(TreatAndExtend),
    FixedInterval(FixedInterval),
}

impl Protocol {
    pub fn new(config: ProtocolConfig) -> Self {
        match config.protocol_type {
            ProtocolType::TreatAndExtend => Protocol::TreatAndExtend(TreatAndExtend::new(config)),
            ProtocolType::FixedInterval => Protocol::FixedInterval(FixedInterval::new(config)),
        }
    }

    pub fn config(&self) -> &ProtocolConfig {
        match self {
            Protocol::TreatAndExtend(p) => p.config(),
            Protocol::FixedInterval(p) => p.config(),
        }
    }

    /// Full decision entry point used by the Visit Executor: handles the
    /// shared loading phase, then defers to the active variant once
    /// loading has completed.
    pub fn decide_next_visit(&self, patient: &Patient, current_date: NaiveDate) -> NextVisit {
        let config = self.config();
        match patient.next_visit_type() {
            VisitType::InitialAssessment => NextVisit {
                date: add_days_working(current_date, config.loading_interval_days),
                visit_type: VisitType::LoadingInjection,
                phase: Phase::Loading,
                interval_days: config.loading_interval_days,
                consecutive_stable_at_max: patient.consecutive_stable_at_max(),
                anniversaries_reviewed: patient.anniversaries_reviewed(),
            },
            VisitType::LoadingInjection => {
                let completed = patient.loading_visit_index() + 1;
                let next_date = add_days_working(current_date, config.loading_interval_days);
                if completed < config.loading_doses {
                    NextVisit {
                        date: next_date,
                        visit_type: VisitType::LoadingInjection,
                        phase: Phase::Loading,
                        interval_days: config.loading_interval_days,
                        consecutive_stable_at_max: patient.consecutive_stable_at_max(),
                        anniversaries_reviewed: patient.anniversaries_reviewed(),
                    }
                } else {
                    NextVisit {
                        date: next_date,
                        visit_type: VisitType::DecisionOnlyPostLoading,
                        phase: Phase::Loading,
                        interval_days: config.loading_interval_days,
                        consecutive_stable_at_max: patient.consecutive_stable_at_max(),
                        anniversaries_reviewed: patient.anniversaries_reviewed(),
                    }
                }
            }
            _ => match self {
                Protocol::TreatAndExtend(p) => p.decide_maintenance_visit(patient, current_date),
                Protocol::FixedInterval(p) => p.decide_maintenance_visit(patient, current_date),
            },
        }
    }

    /// The number of loading injections completed so far, used by the
    /// executor to advance `Patient::loading_visit_index` after each
    /// loading-phase visit.
    pub fn loading_doses(&self) -> u32 {
        self.config().loading_doses
    }
}
