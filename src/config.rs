use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::namespace::{DEFAULT_MAX_REPEAT, Namespace};

/// Runtime knobs read from a TOML file; every field has a default.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    pub naming: NamingConfig,
    pub scheduler: SchedulerConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NamingConfig {
    /// Repeats of one key folded into a single path node.
    pub max_repeat: u32,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            max_repeat: DEFAULT_MAX_REPEAT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Retry the most recently active threads between full passes.
    pub probe_passes: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { probe_passes: true }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// `tracing_subscriber::EnvFilter` directive used when `CINDER_LOG` is unset.
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "warn".to_string(),
        }
    }
}

impl RuntimeConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("invalid runtime configuration")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("in {}", path.display()))
    }

    /// Root namespace honoring the configured repeat bound.
    pub fn root_namespace(&self) -> Namespace {
        Namespace::root_with_max_repeat(self.naming.max_repeat)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn empty_file_uses_defaults() -> Result<()> {
        let config = RuntimeConfig::from_toml("")?;
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.naming.max_repeat, 1000);
        assert!(config.scheduler.probe_passes);
        assert_eq!(config.log.filter, "warn");
        Ok(())
    }

    #[test]
    fn load_reads_sections() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(
            file,
            "[naming]\nmax_repeat = 16\n\n[scheduler]\nprobe_passes = false\n\n[log]\nfilter = \"cinder=debug\""
        )?;
        let config = RuntimeConfig::load(file.path())?;
        assert_eq!(config.naming.max_repeat, 16);
        assert!(!config.scheduler.probe_passes);
        assert_eq!(config.log.filter, "cinder=debug");
        assert_eq!(config.root_namespace().max_repeat(), 16);
        Ok(())
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(RuntimeConfig::from_toml("[naming]\nmax_repeats = 3").is_err());
        assert!(RuntimeConfig::from_toml("[extra]").is_err());
    }

    #[test]
    fn missing_file_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let err = RuntimeConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("absent.toml"));
    }
}
