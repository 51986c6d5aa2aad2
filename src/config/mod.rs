//! Configuration loading (§6)
//!
//! Protocol, cost/resource, and recruitment specifications are TOML
//! documents. Loading always goes through `toml::from_str`, which rejects
//! unknown keys itself via `#[serde(deny_unknown_fields)]` on every
//! config-facing struct, then runs the cross-reference validation spec.md
//! §6 requires before any patient is simulated.

mod cost_spec;
mod protocol_spec;
mod recruitment_spec;

pub use cost_spec::load_cost_spec;
pub use protocol_spec::{load_protocol_spec, ProtocolSpec};
pub use recruitment_spec::load_recruitment_spec;

use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: Box<toml::de::Error>,
    },
}

fn read_and_parse<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source: Box::new(source),
    })
}
