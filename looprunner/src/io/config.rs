//! Loop configuration stored at `<metadata>/config.toml`.
//!
//! Precedence: built-in defaults, then the TOML file, then `LOOPRUNNER_*`
//! environment variables, then CLI flags (applied by the caller).

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::classifier::ClassifierPatterns;
use crate::io::agent::AdapterKind;

pub const CONFIG_FILE: &str = "config.toml";

const DEFAULT_NUDGE: &str = "You have been silent for a while. If you are finished, summarize \
what you changed and exit. Otherwise continue with the next concrete step.";

/// Configuration that failed to load or validate. Maps to exit 2.
#[derive(Debug)]
pub struct ConfigError {
    pub reason: String,
}

impl ConfigError {
    pub fn wrap(err: anyhow::Error) -> Self {
        Self {
            reason: format!("{err:#}"),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid configuration: {}", self.reason)
    }
}

impl std::error::Error for ConfigError {}

/// Loop configuration (TOML).
///
/// Human-edited; missing fields fall back to defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoopConfig {
    /// Total silent wait before the agent is killed.
    pub idle_timeout_secs: u64,
    /// Silence before the single nudge is sent. Must be below `idle_timeout_secs`.
    pub idle_nudge_timeout_secs: u64,
    /// Overall wall-clock bound per iteration. 0 disables it.
    pub timeout_secs: u64,
    /// Consecutive failures before the loop gives up. 0 never gives up.
    pub quit_on_abort_threshold: u32,
    pub continue_on_timeout: bool,
    pub rate_limit_buffer_secs: u64,
    /// Sleep used when a rate-limit message carries no reset time.
    pub rate_limit_fallback_secs: u64,
    /// 0 = unbounded.
    pub max_iterations: u32,
    /// Prompt directory, relative to the metadata directory unless absolute.
    pub prompts_dir: PathBuf,
    pub nudge_message: String,
    pub agent: AgentConfig,
    pub classifier: ClassifierPatterns,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    pub adapter: AdapterKind,
    /// Program and arguments for the `command` adapter.
    pub command: Vec<String>,
    /// Extra arguments passed through to the agent CLI.
    pub model_args: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            adapter: AdapterKind::Claude,
            command: Vec::new(),
            model_args: Vec::new(),
        }
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 15 * 60,
            idle_nudge_timeout_secs: 10 * 60,
            timeout_secs: 0,
            quit_on_abort_threshold: 3,
            continue_on_timeout: false,
            rate_limit_buffer_secs: 60,
            rate_limit_fallback_secs: 5 * 60,
            max_iterations: 0,
            prompts_dir: PathBuf::from("prompts"),
            nudge_message: DEFAULT_NUDGE.to_string(),
            agent: AgentConfig::default(),
            classifier: ClassifierPatterns::default(),
        }
    }
}

impl LoopConfig {
    pub fn validate(&self) -> Result<()> {
        if self.idle_timeout_secs == 0 {
            return Err(anyhow!("idle_timeout_secs must be > 0"));
        }
        if self.idle_nudge_timeout_secs >= self.idle_timeout_secs {
            return Err(anyhow!(
                "idle_nudge_timeout_secs ({}) must be < idle_timeout_secs ({})",
                self.idle_nudge_timeout_secs,
                self.idle_timeout_secs
            ));
        }
        if self.agent.adapter == AdapterKind::Command
            && self
                .agent
                .command
                .first()
                .is_none_or(|program| program.trim().is_empty())
        {
            return Err(anyhow!("agent.command must be a non-empty array for the command adapter"));
        }
        if self.nudge_message.trim().is_empty() {
            return Err(anyhow!("nudge_message must not be empty"));
        }
        Ok(())
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn idle_nudge_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_nudge_timeout_secs)
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    pub fn rate_limit_buffer(&self) -> Duration {
        Duration::from_secs(self.rate_limit_buffer_secs)
    }

    pub fn rate_limit_fallback(&self) -> Duration {
        Duration::from_secs(self.rate_limit_fallback_secs)
    }

    pub fn prompts_dir(&self, metadata_dir: &Path) -> PathBuf {
        if self.prompts_dir.is_absolute() {
            self.prompts_dir.clone()
        } else {
            metadata_dir.join(&self.prompts_dir)
        }
    }

    /// Apply `LOOPRUNNER_*` overrides through `lookup` (usually `std::env::var`).
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        override_parsed(&lookup, "LOOPRUNNER_IDLE_TIMEOUT_SECS", &mut self.idle_timeout_secs)?;
        override_parsed(
            &lookup,
            "LOOPRUNNER_IDLE_NUDGE_TIMEOUT_SECS",
            &mut self.idle_nudge_timeout_secs,
        )?;
        override_parsed(&lookup, "LOOPRUNNER_TIMEOUT_SECS", &mut self.timeout_secs)?;
        override_parsed(
            &lookup,
            "LOOPRUNNER_QUIT_ON_ABORT_THRESHOLD",
            &mut self.quit_on_abort_threshold,
        )?;
        override_parsed(
            &lookup,
            "LOOPRUNNER_CONTINUE_ON_TIMEOUT",
            &mut self.continue_on_timeout,
        )?;
        override_parsed(
            &lookup,
            "LOOPRUNNER_RATE_LIMIT_BUFFER_SECS",
            &mut self.rate_limit_buffer_secs,
        )?;
        override_parsed(
            &lookup,
            "LOOPRUNNER_RATE_LIMIT_FALLBACK_SECS",
            &mut self.rate_limit_fallback_secs,
        )?;
        override_parsed(&lookup, "LOOPRUNNER_MAX_ITERATIONS", &mut self.max_iterations)?;
        if let Some(raw) = lookup("LOOPRUNNER_ADAPTER") {
            self.agent.adapter = AdapterKind::parse(&raw)?;
        }
        Ok(())
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, slot: &mut T) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return Ok(());
    };
    *slot = raw
        .trim()
        .parse()
        .map_err(|err| anyhow!("{key}={raw}: {err}"))?;
    debug!(key, value = %raw.trim(), "config override from environment");
    Ok(())
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `LoopConfig::default()`. Not validated:
/// callers validate after applying overrides.
pub fn load_config(path: &Path) -> Result<LoopConfig> {
    if !path.exists() {
        return Ok(LoopConfig::default());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: LoopConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    Ok(cfg)
}

/// Load `<metadata>/config.toml` and apply process environment overrides.
pub fn load_effective(metadata_dir: &Path) -> Result<LoopConfig> {
    let mut cfg = load_config(&metadata_dir.join(CONFIG_FILE))?;
    cfg.apply_env_overrides(|key| std::env::var(key).ok())?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, LoopConfig::default());
        cfg.validate().expect("default is valid");
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            "idle_timeout_secs = 30\nidle_nudge_timeout_secs = 10\n[classifier]\nrate_limit = [\"slow down\"]\n",
        )
        .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.idle_timeout_secs, 30);
        assert_eq!(cfg.quit_on_abort_threshold, 3);
        assert_eq!(cfg.classifier.rate_limit, vec!["slow down"]);
        assert_eq!(cfg.classifier.no_assistant, vec!["No messages returned"]);
    }

    #[test]
    fn nudge_must_precede_idle_timeout() {
        let cfg = LoopConfig {
            idle_timeout_secs: 60,
            idle_nudge_timeout_secs: 60,
            ..LoopConfig::default()
        };
        let err = cfg.validate().expect_err("invalid");
        assert!(err.to_string().contains("idle_nudge_timeout_secs"));
    }

    #[test]
    fn command_adapter_requires_command() {
        let mut cfg = LoopConfig::default();
        cfg.agent.adapter = AdapterKind::Command;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn env_overrides_apply_and_reject_garbage() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("LOOPRUNNER_IDLE_TIMEOUT_SECS", "120"),
            ("LOOPRUNNER_CONTINUE_ON_TIMEOUT", "true"),
            ("LOOPRUNNER_ADAPTER", "codex"),
        ]);
        let mut cfg = LoopConfig::default();
        cfg.apply_env_overrides(|key| env.get(key).map(|v| v.to_string()))
            .expect("apply");
        assert_eq!(cfg.idle_timeout_secs, 120);
        assert!(cfg.continue_on_timeout);
        assert_eq!(cfg.agent.adapter, AdapterKind::Codex);

        let mut cfg = LoopConfig::default();
        let err = cfg
            .apply_env_overrides(|key| {
                (key == "LOOPRUNNER_MAX_ITERATIONS").then(|| "many".to_string())
            })
            .expect_err("garbage");
        assert!(err.to_string().contains("LOOPRUNNER_MAX_ITERATIONS"));
    }

    #[test]
    fn zero_timeout_disables_overall_bound() {
        assert_eq!(LoopConfig::default().timeout(), None);
        let cfg = LoopConfig {
            timeout_secs: 90,
            ..LoopConfig::default()
        };
        assert_eq!(cfg.timeout(), Some(Duration::from_secs(90)));
    }
}
