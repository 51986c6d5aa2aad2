//! Crate-wide error taxonomy.
//!
//! Mirrors the error categories in the specification: a misconfigured
//! protocol is fatal at load, an unmapped visit type or invariant violation
//! is fatal mid-run, an I/O failure at finalize is fatal, and cancellation
//! is the one non-fatal condition (it surfaces through `RunOutcome`, not
//! through `Err`).

use chrono::NaiveDate;
use thiserror::Error;

use crate::patient::PatientId;
use crate::visit::VisitType;

/// Structured context attached to errors that occur mid-run, so the caller
/// always knows which patient and date an error pertains to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorContext {
    pub patient_id: Option<PatientId>,
    pub date: Option<NaiveDate>,
    pub visit_type: Option<VisitType>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_patient(mut self, patient_id: PatientId) -> Self {
        self.patient_id = Some(patient_id);
        self
    }

    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    pub fn with_visit_type(mut self, visit_type: VisitType) -> Self {
        self.visit_type = Some(visit_type);
        self
    }
}

#[derive(Debug, Error)]
pub enum NamdError {
    /// Missing required keys, malformed matrices, or a transition row that
    /// sums to zero after treatment-multiplier renormalization. Fatal at
    /// load; no run begins.
    #[error("misconfigured protocol: {message}")]
    MisconfiguredProtocol { message: String },

    /// A visit type produced by the protocol has no entry in the resource
    /// or cost tables. Fatal at first occurrence.
    #[error("unmapped visit type {context:?}: {message}")]
    UnmappedVisitType {
        message: String,
        context: ErrorContext,
    },

    /// Vision out of range before clamp, a negative interval, or
    /// non-monotonic visit dates. Fatal; abort run.
    #[error("invariant violation: {message} ({context:?})")]
    InvariantViolation {
        message: String,
        context: ErrorContext,
    },

    /// The result writer could not finalize its output. Staging files are
    /// removed before this propagates.
    #[error("result writer I/O failure: {0}")]
    IoFailure(#[from] std::io::Error),

    /// Configuration could not be parsed or deserialized.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

pub type Result<T> = std::result::Result<T, NamdError>;

impl NamdError {
    pub fn misconfigured(message: impl Into<String>) -> Self {
        NamdError::MisconfiguredProtocol {
            message: message.into(),
        }
    }

    pub fn unmapped_visit_type(message: impl Into<String>, context: ErrorContext) -> Self {
        NamdError::UnmappedVisitType {
            message: message.into(),
            context,
        }
    }

    pub fn invariant(message: impl Into<String>, context: ErrorContext) -> Self {
        NamdError::InvariantViolation {
            message: message.into(),
            context,
        }
    }
}
