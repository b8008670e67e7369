//! Where midimap keeps its config file.
//!
//! - **Dev** (debug builds only): `config.yaml` in the working directory,
//!   so `cargo run` uses the checkout's config.
//! - **Portable**: a `.portable` marker next to the executable keeps
//!   everything beside it.
//! - **Installed** (default): the platform config directory
//!   (`%APPDATA%\midimap`, `~/.config/midimap`, ...).
//!
//! The mapping document path comes from the config itself and resolves
//! relative to the config's directory.

use anyhow::Context;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::EngineConfig;

const APP_DIR: &str = "midimap";
const CONFIG_FILE: &str = "config.yaml";
const PORTABLE_MARKER: &str = ".portable";

/// How the config location was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathMode {
    Dev,
    Portable,
    Installed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    pub config: PathBuf,
    pub mode: PathMode,
}

impl AppPaths {
    /// Pick the config location for this process
    ///
    /// Runs before logging is set up, so diagnostics go to stderr.
    pub fn detect() -> Self {
        if let Some(cwd_config) = dev_config() {
            eprintln!("[paths] DEV mode: {}", cwd_config.display());
            return Self {
                config: cwd_config,
                mode: PathMode::Dev,
            };
        }

        let exe_dir = executable_dir();
        if exe_dir.join(PORTABLE_MARKER).exists() {
            return Self::in_dir(&exe_dir, PathMode::Portable);
        }

        match dirs::config_dir() {
            Some(base) => Self::in_dir(&base.join(APP_DIR), PathMode::Installed),
            None => {
                eprintln!("[paths] no platform config dir, using {}", exe_dir.display());
                Self::in_dir(&exe_dir, PathMode::Portable)
            }
        }
    }

    /// `config.yaml` inside `dir`
    pub fn in_dir(dir: &Path, mode: PathMode) -> Self {
        Self {
            config: dir.join(CONFIG_FILE),
            mode,
        }
    }

    /// Directory holding the config file
    pub fn base_dir(&self) -> &Path {
        self.config.parent().unwrap_or(Path::new("."))
    }

    /// Create the config directory and a default config if missing
    pub fn ensure_directories(&self) -> anyhow::Result<()> {
        let base = self.base_dir();
        if !base.as_os_str().is_empty() && !base.exists() {
            debug!("Creating config directory: {}", base.display());
            std::fs::create_dir_all(base)
                .with_context(|| format!("Failed to create {}", base.display()))?;
        }

        if !self.config.exists() {
            let yaml = serde_yaml::to_string(&EngineConfig::default())
                .context("Failed to serialize default config")?;
            std::fs::write(&self.config, yaml)
                .with_context(|| format!("Failed to write {}", self.config.display()))?;
            info!("📝 Wrote default config to {}", self.config.display());
        }

        Ok(())
    }
}

#[cfg(debug_assertions)]
fn dev_config() -> Option<PathBuf> {
    let candidate = std::env::current_dir().ok()?.join(CONFIG_FILE);
    candidate.exists().then_some(candidate)
}

#[cfg(not(debug_assertions))]
fn dev_config() -> Option<PathBuf> {
    None
}

fn executable_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}
