//! Deterministic simulation engine for anti-VEGF treatment of
//! neovascular age-related macular degeneration (nAMD) under
//! Treat-and-Extend and Fixed-Interval dosing protocols.
//!
//! A single seed drives the entire run: cohort enrollment, disease
//! progression, vision response, and discontinuation are all reproducible
//! given the same seed and configuration, whether the cohort is simulated
//! sequentially or (with the `parallel` feature) across a worker pool.

pub mod clock;
pub mod config;
pub mod discontinuation;
pub mod disease;
pub mod error;
pub mod executor;
pub mod logging;
pub mod patient;
pub mod protocol;
pub mod recruitment;
pub mod resources;
pub mod rng;
pub mod runner;
pub mod visit;
pub mod vision;
pub mod writer;

pub use config::{load_cost_spec, load_protocol_spec, load_recruitment_spec, ProtocolSpec};
pub use error::{ErrorContext, NamdError, Result};
pub use patient::{Patient, PatientId};
pub use recruitment::RecruitmentSpec;
pub use resources::CostSpec;
pub use rng::RandomSource;
pub use runner::{run, CancellationToken, RunOutcome, RunStatus};
pub use writer::Progress;

#[cfg(feature = "parallel")]
pub use runner::parallel::run_parallel;
