//! Validation for `looprunner validate`: config plus feature store structure.

use std::io;
use std::path::Path;

use anyhow::Result;

use crate::exit_codes;
use crate::io::config::{ConfigError, LoopConfig, load_effective};
use crate::io::feature_store::{FeatureStore, ValidationReport};

/// High-level validation outcome.
#[derive(Debug, Clone)]
pub struct ValidateOutcome {
    pub config: LoopConfig,
    pub report: ValidationReport,
}

impl ValidateOutcome {
    pub fn exit_code(&self) -> i32 {
        if self.report.is_ok() {
            exit_codes::OK
        } else {
            exit_codes::VALIDATION_ERROR
        }
    }
}

/// Validate `<metadata>/config.toml` and every feature record.
///
/// A broken config is an error ([`ConfigError`]); record problems are
/// collected in the report and never repaired.
pub fn validate_metadata(metadata_dir: &Path) -> Result<ValidateOutcome> {
    if !metadata_dir.is_dir() {
        let missing = io::Error::new(
            io::ErrorKind::NotFound,
            format!("metadata directory {} not found", metadata_dir.display()),
        );
        return Err(missing.into());
    }
    let config = load_effective(metadata_dir)
        .and_then(|config| config.validate().map(|()| config))
        .map_err(ConfigError::wrap)?;
    let report = FeatureStore::new(metadata_dir).validate_store()?;
    Ok(ValidateOutcome { config, report })
}
