use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::filter::DashboardFilters;
use crate::term::Term;

pub const PREFS_ENV: &str = "ASSESSMENT_DASHBOARD_PREFS";
const DEFAULT_PREFS_FILE: &str = ".assessment-dashboard.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub selected_term: Option<Term>,
    pub filters: DashboardFilters,
}

pub fn prefs_path() -> PathBuf {
    std::env::var_os(PREFS_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_PREFS_FILE))
}

impl Preferences {
    /// Missing files give defaults; unreadable ones are logged and ignored.
    pub fn load(path: &Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "ignoring unreadable preferences");
                return Self::default();
            }
        };

        match serde_json::from_str(&raw) {
            Ok(prefs) => prefs,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "ignoring corrupt preferences");
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let body = serde_json::to_string_pretty(self)?;
        std::fs::write(path, body)
            .with_context(|| format!("failed to write preferences to {}", path.display()))?;
        tracing::debug!(path = %path.display(), "preferences saved");
        Ok(())
    }
}
