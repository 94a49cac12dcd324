//! Optional config file (`~/.kubesweep/config.toml`)
//!
//! Every key may be omitted; command-line flags take precedence.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use kubesweep_core::{RetentionThreshold, RunConfig};
use kubesweep_k8s::KubeconfigFactory;

#[derive(Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    /// Kubeconfig to read instead of `$KUBECONFIG` / `~/.kube/config`
    pub kubeconfig: Option<PathBuf>,
    pub delete_before_hours: Option<u32>,
    pub concurrency: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub relist_after_delete: Option<bool>,
}

impl FileConfig {
    pub fn default_path() -> Option<PathBuf> {
        let home = dirs::home_dir()?;
        Some(home.join(".kubesweep").join("config.toml"))
    }

    /// Load `explicit`, or the default file if it exists
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::read(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::read(&path),
            _ => Ok(Self::default()),
        }
    }

    fn read(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn client_factory(&self) -> KubeconfigFactory {
        match &self.kubeconfig {
            Some(path) => KubeconfigFactory::with_path(path),
            None => KubeconfigFactory::new(),
        }
    }

    /// Freeze file values and command-line values into one run configuration
    pub fn run_config(
        &self,
        namespace: Option<String>,
        delete_before_hours: Option<u32>,
        dry_run: bool,
    ) -> RunConfig {
        let hours = delete_before_hours
            .or(self.delete_before_hours)
            .unwrap_or(RetentionThreshold::DEFAULT_HOURS);

        let mut config = RunConfig::new(namespace, RetentionThreshold::from_hours(hours), dry_run);
        if let Some(concurrency) = self.concurrency {
            config = config.with_concurrency(concurrency);
        }
        if let Some(relist) = self.relist_after_delete {
            config = config.with_relist(relist);
        }
        config
    }

    pub fn timeout(&self, cli_secs: Option<u64>) -> Option<Duration> {
        cli_secs.or(self.timeout_secs).map(Duration::from_secs)
    }
}
