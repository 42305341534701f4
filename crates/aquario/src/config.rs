//! Configuration file parsing for aquario.toml.

use crate::workloads::Workload;
use aquario_gc::GcConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Collector settings
    #[serde(default)]
    pub gc: GcConfig,

    /// Workload settings
    #[serde(default)]
    pub run: RunConfig,
}

/// Workload configuration.
#[derive(Debug, Deserialize)]
pub struct RunConfig {
    /// Workload to run
    #[serde(default)]
    pub workload: Workload,

    /// Steps of the workload
    #[serde(default = "default_iterations")]
    pub iterations: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            workload: Workload::default(),
            iterations: default_iterations(),
        }
    }
}

fn default_iterations() -> usize {
    10_000
}

/// Load configuration from a file or search for a default config file.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    if let Some(path) = path
        && !path.exists()
    {
        anyhow::bail!("config file {} not found", path.display());
    }
    let config_path = path.map(PathBuf::from).or_else(find_config_file);

    match config_path {
        Some(path) => {
            let content = std::fs::read_to_string(&path)?;
            let config: Config = toml::from_str(&content)
                .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))?;
            tracing::debug!(path = %path.display(), "loaded config");
            Ok(config)
        }
        None => Ok(Config::default()),
    }
}

/// Search for a configuration file in the current directory and its parents.
fn find_config_file() -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;

    const CONFIG_NAMES: &[&str] = &["aquario.toml", ".aquariorc.toml"];

    let mut dir = Some(cwd.as_path());
    while let Some(current) = dir {
        for name in CONFIG_NAMES {
            let path = current.join(name);
            if path.exists() {
                return Some(path);
            }
        }
        dir = current.parent();
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use aquario_gc::{FitPolicy, StrategyKind};

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aquario.toml");
        std::fs::write(
            &path,
            r#"
            [gc]
            strategy = "zct"
            heap_size = 65536
            zct_capacity = 64
            fit = "best-fit"

            [run]
            workload = "tree"
            "#,
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.gc.strategy, StrategyKind::RefCountZct);
        assert_eq!(config.gc.heap_size, 65536);
        assert_eq!(config.gc.zct_capacity, 64);
        assert_eq!(config.gc.fit, FitPolicy::BestFit);
        assert_eq!(config.run.workload, Workload::Tree);
        assert_eq!(config.run.iterations, 10_000);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(Some(&dir.path().join("nope.toml"))).is_err());
    }

    #[test]
    fn test_parse_error_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[gc]\nheap = 1\n").unwrap();
        let err = load_config(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("bad.toml"));
    }
}
