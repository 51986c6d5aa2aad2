//! Patient Entity (C8)
//!
//! All fields are private. The Visit Executor and Discontinuation Manager
//! mutate a patient only through `record_visit`, `schedule_next`,
//! `apply_discontinuation`, and `clear_discontinuation` (plus a handful of
//! `pub(crate)` tick-level setters used exclusively by the executor while
//! it advances this patient's own visit) — never by writing fields from
//! outside this module.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::discontinuation::DiscontinuationRecord;
use crate::disease::DiseaseState;
use crate::error::{ErrorContext, NamdError, Result};
use crate::visit::{Phase, Visit, VisitType};
use crate::vision::ResponseType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PatientId(u64);

impl PatientId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PatientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{:06}", self.0)
    }
}

/// Per-patient scheduler state, owned entirely by the patient, driven by
/// the Protocol Engine at each visit.
#[derive(Debug, Clone)]
struct SchedulerState {
    next_visit_date: NaiveDate,
    next_visit_type: VisitType,
    next_phase: Phase,
    interval_days: i64,
    consecutive_stable_at_max: u32,
    loading_visit_index: u32,
    anniversaries_reviewed: u32,
    terminated: bool,
}

#[derive(Debug, Clone)]
pub struct Patient {
    id: PatientId,
    baseline_vision: u8,
    current_vision: u8,
    disease_state: DiseaseState,
    enrollment_date: NaiveDate,
    response_type: ResponseType,
    response_multiplier: f64,
    visits: Vec<Visit>,
    discontinuation: Option<DiscontinuationRecord>,
    scheduler: SchedulerState,
    last_tick_date: NaiveDate,
    last_injection_date: Option<NaiveDate>,
    vision_below_threshold_streak: u32,
}

impl Patient {
    pub fn new(
        id: PatientId,
        baseline_vision: u8,
        enrollment_date: NaiveDate,
        response_type: ResponseType,
        response_multiplier: f64,
    ) -> Self {
        Self {
            id,
            baseline_vision,
            current_vision: baseline_vision,
            disease_state: DiseaseState::Naive,
            enrollment_date,
            response_type,
            response_multiplier,
            visits: Vec::new(),
            discontinuation: None,
            scheduler: SchedulerState {
                next_visit_date: enrollment_date,
                next_visit_type: VisitType::InitialAssessment,
                next_phase: Phase::Loading,
                interval_days: 0,
                consecutive_stable_at_max: 0,
                loading_visit_index: 0,
                anniversaries_reviewed: 0,
                terminated: false,
            },
            last_tick_date: enrollment_date,
            last_injection_date: None,
            vision_below_threshold_streak: 0,
        }
    }

    // -- read-only accessors -------------------------------------------

    pub fn id(&self) -> PatientId {
        self.id
    }

    pub fn baseline_vision(&self) -> u8 {
        self.baseline_vision
    }

    pub fn current_vision(&self) -> u8 {
        self.current_vision
    }

    pub fn disease_state(&self) -> DiseaseState {
        self.disease_state
    }

    pub fn enrollment_date(&self) -> NaiveDate {
        self.enrollment_date
    }

    pub fn response_type(&self) -> ResponseType {
        self.response_type
    }

    pub fn response_multiplier(&self) -> f64 {
        self.response_multiplier
    }

    pub fn visits(&self) -> &[Visit] {
        &self.visits
    }

    pub fn discontinuation(&self) -> Option<&DiscontinuationRecord> {
        self.discontinuation.as_ref()
    }

    pub fn is_discontinued(&self) -> bool {
        self.discontinuation.is_some()
    }

    pub fn is_terminated(&self) -> bool {
        self.scheduler.terminated
    }

    pub fn next_visit_date(&self) -> NaiveDate {
        self.scheduler.next_visit_date
    }

    pub fn next_visit_type(&self) -> VisitType {
        self.scheduler.next_visit_type
    }

    pub fn next_phase(&self) -> Phase {
        self.scheduler.next_phase
    }

    pub fn interval_days(&self) -> i64 {
        self.scheduler.interval_days
    }

    pub fn consecutive_stable_at_max(&self) -> u32 {
        self.scheduler.consecutive_stable_at_max
    }

    pub fn loading_visit_index(&self) -> u32 {
        self.scheduler.loading_visit_index
    }

    /// Number of Fixed-Interval annual review anniversaries already
    /// visited; used only by that protocol to avoid injecting the same
    /// anniversary's review visit twice.
    pub fn anniversaries_reviewed(&self) -> u32 {
        self.scheduler.anniversaries_reviewed
    }

    pub fn last_tick_date(&self) -> NaiveDate {
        self.last_tick_date
    }

    pub fn last_injection_date(&self) -> Option<NaiveDate> {
        self.last_injection_date
    }

    pub fn vision_below_threshold_streak(&self) -> u32 {
        self.vision_below_threshold_streak
    }

    pub fn total_injections(&self) -> u32 {
        self.visits.iter().filter(|v| v.injection_given).count() as u32
    }

    pub fn total_cost(&self) -> f64 {
        self.visits.iter().map(|v| v.cost_total).sum()
    }

    // -- the four public mutation methods (§4.8) ------------------------

    /// Appends a visit. Append-only; dates must be strictly increasing.
    pub fn record_visit(&mut self, visit: Visit) -> Result<()> {
        if let Some(last) = self.visits.last() {
            if visit.date <= last.date {
                return Err(NamdError::invariant(
                    format!(
                        "visit date {} is not strictly after previous visit date {}",
                        visit.date, last.date
                    ),
                    ErrorContext::new()
                        .with_patient(self.id)
                        .with_date(visit.date)
                        .with_visit_type(visit.visit_type),
                ));
            }
        }
        self.current_vision = visit.vision_after;
        self.disease_state = visit.disease_state_after;
        if visit.injection_given {
            self.last_injection_date = Some(visit.date);
        }
        self.visits.push(visit);
        Ok(())
    }

    /// Schedules the next visit, or marks the patient terminated if
    /// `next` is `None` (mortality, or monitoring exhausted without
    /// retreatment).
    pub fn schedule_next(
        &mut self,
        next: Option<(NaiveDate, VisitType, Phase, i64)>,
    ) {
        match next {
            Some((date, visit_type, phase, interval_days)) => {
                self.scheduler.next_visit_date = date;
                self.scheduler.next_visit_type = visit_type;
                self.scheduler.next_phase = phase;
                self.scheduler.interval_days = interval_days;
            }
            None => {
                self.scheduler.terminated = true;
            }
        }
    }

    /// Creates a new `DiscontinuationRecord`. Fails if one is already
    /// active; the previous record must be cleared by retreatment first.
    pub fn apply_discontinuation(&mut self, record: DiscontinuationRecord) -> Result<()> {
        if self.discontinuation.is_some() {
            return Err(NamdError::invariant(
                "attempted to create a second active discontinuation record",
                ErrorContext::new().with_patient(self.id).with_date(record.date),
            ));
        }
        self.discontinuation = Some(record);
        Ok(())
    }

    /// Clears the active discontinuation record on retreatment and resets
    /// scheduler state so the patient resumes at the protocol's minimum
    /// interval.
    pub fn clear_discontinuation(&mut self) {
        self.discontinuation = None;
        self.scheduler.consecutive_stable_at_max = 0;
        self.vision_below_threshold_streak = 0;
    }

    // -- crate-internal tick/scheduling setters --------------------------
    // Used only by the Visit Executor and Protocol Engine while advancing
    // this patient's own visit; never reachable from outside the crate.

    pub(crate) fn set_disease_state(&mut self, state: DiseaseState) {
        self.disease_state = state;
    }

    pub(crate) fn set_current_vision(&mut self, vision: u8) {
        self.current_vision = vision;
    }

    pub(crate) fn set_last_tick_date(&mut self, date: NaiveDate) {
        self.last_tick_date = date;
    }

    pub(crate) fn set_consecutive_stable_at_max(&mut self, count: u32) {
        self.scheduler.consecutive_stable_at_max = count;
    }

    pub(crate) fn set_loading_visit_index(&mut self, index: u32) {
        self.scheduler.loading_visit_index = index;
    }

    pub(crate) fn set_anniversaries_reviewed(&mut self, count: u32) {
        self.scheduler.anniversaries_reviewed = count;
    }

    /// Recomputes the sustained-poor-vision streak against the configured
    /// threshold. Called by the executor at each decision visit, since the
    /// threshold lives in protocol configuration, not on the patient.
    pub(crate) fn refresh_poor_response_streak(&mut self, threshold: u8) {
        if self.current_vision < threshold {
            self.vision_below_threshold_streak += 1;
        } else {
            self.vision_below_threshold_streak = 0;
        }
    }
}
