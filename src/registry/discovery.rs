//! Tool configuration discovery.
//!
//! Locations are scanned highest precedence first. A location is either a
//! directory of `*.json` documents (read in filename order) or a single
//! document; missing locations are skipped. Documents are validated before
//! they take part in precedence, so a broken override never hides a working
//! lower-precedence config.

use crate::tools::config::ToolConfig;
use crate::tools::schema::parse_document;
use crate::types::{DiscoveryConfig, Error, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Ordered discovery locations, highest precedence first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryPaths {
    locations: Vec<PathBuf>,
}

impl DiscoveryPaths {
    pub fn new(locations: Vec<PathBuf>) -> Self {
        Self { locations }
    }

    /// Override env var (if set and non-empty), then project dir, then user dir.
    pub fn from_config(config: &DiscoveryConfig) -> Self {
        let mut locations = Vec::new();
        if let Some(path) = std::env::var_os(&config.override_env) {
            if !path.is_empty() {
                locations.push(PathBuf::from(path));
            }
        }
        locations.push(config.project_dir.clone());
        if let Some(user) = &config.user_dir {
            locations.push(user.clone());
        }
        Self { locations }
    }

    pub fn locations(&self) -> &[PathBuf] {
        &self.locations
    }
}

/// A document that failed to load.
#[derive(Debug)]
pub struct DiscoveryIssue {
    pub path: PathBuf,
    pub error: Error,
}

/// Outcome of one discovery pass.
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    /// Names admitted, in discovery order.
    pub loaded: Vec<String>,
    /// Lower-precedence documents shadowed by an earlier location.
    pub overridden: Vec<(String, PathBuf)>,
    pub errors: Vec<DiscoveryIssue>,
}

impl DiscoveryReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// A validated config and the file it came from.
#[derive(Debug, Clone)]
pub struct DiscoveredTool {
    pub config: ToolConfig,
    pub source: PathBuf,
}

/// Load every location, resolving precedence. Never fails as a whole.
pub fn load(paths: &DiscoveryPaths) -> (Vec<DiscoveredTool>, DiscoveryReport) {
    let mut report = DiscoveryReport::default();
    let mut admitted: Vec<DiscoveredTool> = Vec::new();
    // key → (index into admitted, location index)
    let mut seen: HashMap<String, (usize, usize)> = HashMap::new();

    for (location_idx, location) in paths.locations.iter().enumerate() {
        let files = match list_documents(location) {
            Ok(files) => files,
            Err(e) => {
                report.errors.push(DiscoveryIssue {
                    path: location.clone(),
                    error: e,
                });
                continue;
            }
        };

        for file in files {
            let config = match load_document(&file) {
                Ok(config) => config,
                Err(error) => {
                    tracing::warn!(path = %file.display(), "rejected tool config: {}", error);
                    report.errors.push(DiscoveryIssue { path: file, error });
                    continue;
                }
            };

            let key = config.key();
            match seen.get(&key) {
                Some(&(_, idx)) if idx == location_idx => {
                    report.errors.push(DiscoveryIssue {
                        path: file,
                        error: Error::DuplicateTool { name: config.name },
                    });
                }
                Some(&(winner, _)) => {
                    tracing::info!(
                        tool = %config.name,
                        shadowed = %file.display(),
                        winner = %admitted[winner].source.display(),
                        "tool config overridden by higher-precedence location"
                    );
                    report.overridden.push((config.name, file));
                }
                None => {
                    seen.insert(key, (admitted.len(), location_idx));
                    report.loaded.push(config.name.clone());
                    admitted.push(DiscoveredTool {
                        config,
                        source: file,
                    });
                }
            }
        }
    }

    for tool in &mut admitted {
        let missing = tool.config.expand_env(|var| std::env::var(var).ok());
        if !missing.is_empty() {
            tracing::warn!(
                tool = %tool.config.name,
                missing = ?missing,
                "unset variables in env expanded to empty strings"
            );
        }
    }

    (admitted, report)
}

fn list_documents(location: &Path) -> Result<Vec<PathBuf>> {
    if !location.exists() {
        tracing::debug!(path = %location.display(), "discovery location missing, skipped");
        return Ok(Vec::new());
    }
    if location.is_file() {
        return Ok(vec![location.to_path_buf()]);
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(location)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn load_document(path: &Path) -> Result<ToolConfig> {
    let raw = std::fs::read_to_string(path)?;
    let doc: Value = serde_json::from_str(&raw)?;
    Ok(parse_document(&doc)?)
}
