//! Configuration management for midimap
//!
//! Handles loading, validating and defaulting the YAML configuration file.
//! The binding table itself lives in a separate mapping document (see
//! `bindings::persistence`) which is hot-reloaded by `watcher`.

pub mod watcher;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::engine::{EngineOptions, NoiseGateOverride, NoiseGateSettings};

pub use watcher::MappingWatcher;

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Binding document (JSON or YAML); relative paths resolve against the
    /// config file's directory
    #[serde(default = "default_mappings")]
    pub mappings: PathBuf,
    /// Case-insensitive substrings selecting input ports; empty = all
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub decoder: DecoderConfig,
    #[serde(default)]
    pub learn: LearnConfig,
    #[serde(default)]
    pub noise_filter: NoiseFilterConfig,
    /// Consumer tick period
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Port hot-plug rescan period
    #[serde(default = "default_rescan_ms")]
    pub rescan_ms: u64,
}

/// Raw input queue configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct BridgeConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_max_packets_per_tick")]
    pub max_packets_per_tick: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct DecoderConfig {
    #[serde(default = "default_max_sysex_len")]
    pub max_sysex_len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct LearnConfig {
    /// Swallow the release that follows a captured press
    #[serde(default = "default_true")]
    pub suppress_release: bool,
}

/// Hysteresis filter for jittery faders
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NoiseFilterConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_enter_threshold")]
    pub enter_threshold: f64,
    #[serde(default = "default_active_threshold")]
    pub active_threshold: f64,
    #[serde(default = "default_idle_ms")]
    pub idle_ms: u64,
    /// Per-device overrides, matched by port name substring
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub devices: Vec<NoiseGateOverride>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mappings: default_mappings(),
            inputs: Vec::new(),
            bridge: BridgeConfig::default(),
            decoder: DecoderConfig::default(),
            learn: LearnConfig::default(),
            noise_filter: NoiseFilterConfig::default(),
            tick_ms: default_tick_ms(),
            rescan_ms: default_rescan_ms(),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            max_packets_per_tick: default_max_packets_per_tick(),
        }
    }
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            max_sysex_len: default_max_sysex_len(),
        }
    }
}

impl Default for LearnConfig {
    fn default() -> Self {
        Self {
            suppress_release: default_true(),
        }
    }
}

impl Default for NoiseFilterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            enter_threshold: default_enter_threshold(),
            active_threshold: default_active_threshold(),
            idle_ms: default_idle_ms(),
            devices: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from file with validation
    ///
    /// A relative `mappings` path is made relative to the config file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config = Self::from_yaml(&contents)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        if config.mappings.is_relative() {
            if let Some(dir) = path.parent() {
                config.mappings = dir.join(&config.mappings);
            }
        }
        Ok(config)
    }

    /// Parse and validate YAML text
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: EngineConfig =
            serde_yaml::from_str(contents).context("Failed to parse YAML config")?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let yaml = serde_yaml::to_string(self).context("Failed to serialize config to YAML")?;

        fs::write(path, yaml)
            .await
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> Result<()> {
        if self.mappings.as_os_str().is_empty() {
            anyhow::bail!("mappings path cannot be empty");
        }
        if self.inputs.iter().any(|p| p.trim().is_empty()) {
            anyhow::bail!("inputs patterns cannot be empty strings");
        }
        if self.bridge.queue_capacity == 0 {
            anyhow::bail!("bridge.queue_capacity must be greater than 0");
        }
        if self.bridge.max_packets_per_tick == 0 {
            anyhow::bail!("bridge.max_packets_per_tick must be greater than 0");
        }
        if self.decoder.max_sysex_len == 0 {
            anyhow::bail!("decoder.max_sysex_len must be greater than 0");
        }
        if self.tick_ms == 0 {
            anyhow::bail!("tick_ms must be greater than 0");
        }
        if self.rescan_ms == 0 {
            anyhow::bail!("rescan_ms must be greater than 0");
        }

        let base = self.noise_settings();
        validate_noise("noise_filter", &base)?;
        for (index, device) in self.noise_filter.devices.iter().enumerate() {
            if device.device.trim().is_empty() {
                anyhow::bail!("noise_filter.devices[{}].device cannot be empty", index);
            }
            validate_noise(&format!("noise_filter.devices[{}]", index), &device.apply(base))?;
        }

        Ok(())
    }

    fn noise_settings(&self) -> NoiseGateSettings {
        NoiseGateSettings {
            enabled: self.noise_filter.enabled,
            enter_threshold: self.noise_filter.enter_threshold,
            active_threshold: self.noise_filter.active_threshold,
            idle_ms: self.noise_filter.idle_ms,
        }
    }

    /// Engine tunables derived from this configuration
    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            max_packets_per_tick: self.bridge.max_packets_per_tick,
            max_sysex_len: self.decoder.max_sysex_len,
            suppress_release: self.learn.suppress_release,
            noise: self.noise_settings(),
            noise_overrides: self.noise_filter.devices.clone(),
        }
    }

    /// Whether an input port name is selected by `inputs`
    pub fn selects_input(&self, port_name: &str) -> bool {
        if self.inputs.is_empty() {
            return true;
        }
        let name = port_name.to_lowercase();
        self.inputs
            .iter()
            .any(|pattern| name.contains(&pattern.trim().to_lowercase()))
    }
}

fn validate_noise(section: &str, noise: &NoiseGateSettings) -> Result<()> {
    for (name, value) in [
        ("enter_threshold", noise.enter_threshold),
        ("active_threshold", noise.active_threshold),
    ] {
        if !(value > 0.0 && value <= 1.0) {
            anyhow::bail!("{}.{} {} must be within (0, 1]", section, name, value);
        }
    }
    if noise.active_threshold > noise.enter_threshold {
        anyhow::bail!(
            "{}.active_threshold {} cannot exceed enter_threshold {}",
            section,
            noise.active_threshold,
            noise.enter_threshold
        );
    }
    Ok(())
}

// Default value functions
fn default_mappings() -> PathBuf { PathBuf::from("mappings.json") }
fn default_true() -> bool { true }
fn default_queue_capacity() -> usize { crate::bridge::DEFAULT_QUEUE_CAPACITY }
fn default_max_packets_per_tick() -> usize { 256 }
fn default_max_sysex_len() -> usize { crate::decoder::DEFAULT_MAX_SYSEX_LEN }
fn default_enter_threshold() -> f64 { 0.02 }
fn default_active_threshold() -> f64 { 0.004 }
fn default_idle_ms() -> u64 { 120 }
fn default_tick_ms() -> u64 { 1 }
fn default_rescan_ms() -> u64 { 1000 }

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = EngineConfig::from_yaml("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.bridge.queue_capacity, 1024);
        assert_eq!(config.decoder.max_sysex_len, 4096);
        assert!(config.learn.suppress_release);
        assert!(!config.noise_filter.enabled);
    }

    #[test]
    fn test_full_document() {
        let yaml = r#"
mappings: maps/live.yaml
inputs: ["nanoKONTROL", "Launch"]
bridge: {queue_capacity: 64, max_packets_per_tick: 8}
decoder: {max_sysex_len: 512}
learn: {suppress_release: false}
noise_filter: {enabled: true, enter_threshold: 0.05, active_threshold: 0.01, idle_ms: 200}
tick_ms: 2
rescan_ms: 500
"#;
        let config = EngineConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.mappings, PathBuf::from("maps/live.yaml"));
        assert_eq!(config.inputs.len(), 2);

        let options = config.engine_options();
        assert_eq!(options.max_packets_per_tick, 8);
        assert_eq!(options.max_sysex_len, 512);
        assert!(!options.suppress_release);
        assert!(options.noise.enabled);
        assert_eq!(options.noise.idle_ms, 200);
    }

    #[test]
    fn test_validation_errors() {
        let cases = [
            "bridge: {queue_capacity: 0}",
            "bridge: {max_packets_per_tick: 0}",
            "decoder: {max_sysex_len: 0}",
            "noise_filter: {enter_threshold: 1.5}",
            "noise_filter: {active_threshold: 0.0}",
            "noise_filter: {enter_threshold: 0.01, active_threshold: 0.02}",
            "tick_ms: 0",
            "inputs: ['']",
            "noise_filter: {devices: [{device: nano, enter_threshold: 0.001}]}",
            "noise_filter: {devices: [{device: '', idle_ms: 10}]}",
        ];
        for yaml in cases {
            assert!(EngineConfig::from_yaml(yaml).is_err(), "accepted: {}", yaml);
        }
    }

    #[test]
    fn test_noise_device_overrides() {
        let yaml = r#"
noise_filter:
  enabled: true
  devices:
    - {device: nanoKONTROL, enter_threshold: 0.08}
    - {device: Launch, enabled: false}
"#;
        let config = EngineConfig::from_yaml(yaml).unwrap();
        let options = config.engine_options();
        assert_eq!(options.noise_overrides.len(), 2);
        assert_eq!(options.noise_overrides[0].enter_threshold, Some(0.08));
        assert_eq!(options.noise_overrides[1].enabled, Some(false));

        let resolved = options.noise_overrides[0].apply(options.noise);
        assert!(resolved.enabled);
        assert_eq!(resolved.active_threshold, 0.004);
    }

    #[test]
    fn test_input_selection() {
        let mut config = EngineConfig::default();
        assert!(config.selects_input("Anything"));

        config.inputs = vec!["nanokontrol".to_string()];
        assert!(config.selects_input("nanoKONTROL2 SLIDER/KNOB"));
        assert!(!config.selects_input("Midi Through Port-0"));
    }

    #[tokio::test]
    async fn test_load_resolves_mappings_next_to_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "mappings: live.json\n").unwrap();

        let config = EngineConfig::load(&path).await.unwrap();
        assert_eq!(config.mappings, dir.path().join("live.json"));
    }

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        let mut config = EngineConfig::default();
        config.mappings = dir.path().join("m.yaml");
        config.tick_ms = 5;

        config.save(&path).await.unwrap();
        let loaded = EngineConfig::load(&path).await.unwrap();
        assert_eq!(loaded, config);
    }

    #[tokio::test]
    async fn test_load_missing_file_has_context() {
        let err = EngineConfig::load("/nonexistent/midimap.yaml").await.unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
