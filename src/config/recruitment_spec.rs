//! Recruitment specification (§6): cohort size/timing and per-patient
//! baseline draws, loaded from a single TOML document.

use std::path::Path;

use crate::recruitment::RecruitmentSpec;

use super::{read_and_parse, ConfigError};

pub fn load_recruitment_spec(path: &Path) -> std::result::Result<RecruitmentSpec, ConfigError> {
    read_and_parse(path)
}
