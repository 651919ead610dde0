use crate::binding::RootBinding;
use crate::retry::RetryPolicy;
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LogLevel {
    #[serde(alias = "debug", alias = "DEBUG")]
    Debug,
    #[default]
    #[serde(alias = "info", alias = "INFO")]
    Info,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`.
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
        }
    }
}

/// One source → destination mirror.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Synchronization {
    pub src_path: PathBuf,
    pub dest_path: PathBuf,
    /// Overrides the global patterns when present, even if empty.
    #[serde(default)]
    pub filter_patterns: Option<Vec<String>>,
}

/// Timing knobs of the event processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorConfig {
    /// Minimum age of an event before it is applied
    #[serde(default = "ProcessorConfig::default_debounce_ms")]
    pub debounce_ms: u64,
    /// Attempts per event (and per entry during a full sync)
    #[serde(default = "ProcessorConfig::default_retry_max")]
    pub retry_max: u32,
    /// Pause between failed attempts
    #[serde(default = "ProcessorConfig::default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Pause before reporting the idle status
    #[serde(default = "ProcessorConfig::default_status_hold_ms")]
    pub status_hold_ms: u64,
}

impl ProcessorConfig {
    fn default_debounce_ms() -> u64 { 1000 }
    fn default_retry_max() -> u32 { 10 }
    fn default_retry_backoff_ms() -> u64 { 500 }
    fn default_status_hold_ms() -> u64 { 300 }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn status_hold(&self) -> Duration {
        Duration::from_millis(self.status_hold_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_max, Duration::from_millis(self.retry_backoff_ms))
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            debounce_ms: Self::default_debounce_ms(),
            retry_max: Self::default_retry_max(),
            retry_backoff_ms: Self::default_retry_backoff_ms(),
            status_hold_ms: Self::default_status_hold_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    #[serde(default)]
    pub log_level: Option<LogLevel>,
    pub synchronizations: Vec<Synchronization>,
    /// Patterns for synchronizations that do not list their own
    #[serde(default)]
    pub global_filter_patterns: Vec<String>,
    #[serde(default)]
    pub processor: ProcessorConfig,
}

impl Configuration {
    /// Load and validate a configuration file. The format is picked from the
    /// extension: `.json` is JSON, anything else is YAML.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("read config {} failed: {e}", path.display()))?;
        let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("");
        let config = Self::parse(&text, ext)
            .with_context(|| format!("parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn parse(text: &str, ext: &str) -> Result<Self> {
        let config = match ext {
            "json" => serde_json::from_str(text)?,
            _ => serde_yaml::from_str(text)?,
        };
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.synchronizations.is_empty() {
            bail!("no synchronizations defined in config");
        }
        for (i, sync) in self.synchronizations.iter().enumerate() {
            if sync.src_path.as_os_str().is_empty() {
                bail!("synchronization #{i}: srcPath is empty, set a valid path");
            }
            if sync.dest_path.as_os_str().is_empty() {
                bail!("synchronization #{i}: destPath is empty, set a valid path");
            }
        }
        Ok(())
    }

    /// Build one binding per synchronization, in configuration order.
    pub fn bindings(&self) -> Result<Vec<RootBinding>> {
        self.synchronizations
            .iter()
            .map(|sync| {
                let patterns = sync
                    .filter_patterns
                    .as_deref()
                    .unwrap_or(&self.global_filter_patterns);
                RootBinding::new(&sync.src_path, &sync.dest_path, patterns)
                    .with_context(|| format!("filter of {}", sync.src_path.display()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JSON: &str = r#"{
        "logLevel": "Debug",
        "synchronizations": [
            { "srcPath": "/src0", "destPath": "/dest0", "filterPatterns": ["specific"] },
            { "srcPath": "/src1", "destPath": "/dest1" }
        ],
        "globalFilterPatterns": ["*.tmp"],
        "processor": { "debounceMs": 250 }
    }"#;

    #[test]
    fn global_patterns_apply_only_without_own_list() {
        let config = Configuration::parse(JSON, "json").unwrap();
        config.validate().unwrap();
        assert_eq!(config.log_level, Some(LogLevel::Debug));

        let bindings = config.bindings().unwrap();
        assert_eq!(bindings.len(), 2);
        assert!(bindings[0].filter().is_excluded("/src0/specific"));
        assert!(!bindings[0].filter().is_excluded("/src0/a.tmp"));
        assert!(bindings[1].filter().is_excluded("/src1/a.tmp"));
        assert!(!bindings[1].filter().is_excluded("/src1/specific"));
    }

    #[test]
    fn processor_defaults_fill_missing_fields() {
        let config = Configuration::parse(JSON, "json").unwrap();
        assert_eq!(config.processor.debounce(), Duration::from_millis(250));
        assert_eq!(config.processor.retry_policy(), RetryPolicy::default());
        assert_eq!(config.processor.status_hold_ms, 300);
    }

    #[test]
    fn yaml_is_the_default_format() {
        let yaml = "
logLevel: info
synchronizations:
  - srcPath: /a
    destPath: /b
    filterPatterns: []
globalFilterPatterns: ['*.bak']
";
        let config = Configuration::parse(yaml, "yml").unwrap();
        assert_eq!(config.log_level, Some(LogLevel::Info));
        assert_eq!(config.processor, ProcessorConfig::default());
        let bindings = config.bindings().unwrap();
        assert!(!bindings[0].filter().is_excluded("/a/x.bak"));
    }

    #[test]
    fn empty_paths_are_rejected() {
        let config = Configuration::parse(
            r#"{ "synchronizations": [{ "srcPath": "", "destPath": "/d" }] }"#,
            "json",
        )
        .unwrap();
        assert!(config.validate().is_err());

        let none = Configuration::parse(r#"{ "synchronizations": [] }"#, "json").unwrap();
        assert!(none.validate().is_err());
    }

    #[test]
    fn from_path_reads_and_validates() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("configuration.json");
        std::fs::write(&path, JSON).unwrap();
        let config = Configuration::from_path(&path).unwrap();
        assert_eq!(config.synchronizations.len(), 2);

        assert!(Configuration::from_path(dir.path().join("missing.json")).is_err());
    }
}
