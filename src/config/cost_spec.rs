//! Cost/resource specification (§6): staffing and cost tables keyed by
//! visit type, loaded from a single TOML document.

use std::path::Path;

use crate::resources::CostSpec;

use super::{read_and_parse, ConfigError};

pub fn load_cost_spec(path: &Path) -> std::result::Result<CostSpec, ConfigError> {
    read_and_parse(path)
}
