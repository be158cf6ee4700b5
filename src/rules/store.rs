//! Rule storage boundary.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::Rule;
use crate::error::{HeraldError, Result};
use crate::persist::write_json_atomic;

/// Read access to the user's rules. Editing is owned by an external collaborator.
pub trait RuleStore: Send + Sync {
    /// All rules in evaluation order.
    fn list(&self) -> Result<Vec<Rule>>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RuleFile {
    #[serde(default = "default_version")]
    version: u8,
    #[serde(default)]
    rules: Vec<Rule>,
}

fn default_version() -> u8 {
    1
}

/// JSON-file-backed rule store.
#[derive(Debug, Clone)]
pub struct JsonRuleStore {
    path: PathBuf,
}

impl JsonRuleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the stored rules.
    pub fn save(&self, rules: &[Rule]) -> Result<()> {
        let file = RuleFile {
            version: default_version(),
            rules: rules.to_vec(),
        };
        write_json_atomic(&self.path, &file)
    }

    /// Insert or replace a rule by ID.
    ///
    /// # Errors
    ///
    /// Refuses to touch a rule file that does not parse.
    pub fn upsert(&self, rule: Rule) -> Result<()> {
        let mut rules = self.load_for_edit()?;
        if let Some(existing) = rules.iter_mut().find(|r| r.id == rule.id) {
            *existing = rule;
        } else {
            rules.push(rule);
        }
        self.save(&rules)
    }

    /// Remove a rule by ID. Returns `true` when found.
    ///
    /// # Errors
    ///
    /// Refuses to touch a rule file that does not parse.
    pub fn remove(&self, rule_id: &str) -> Result<bool> {
        let mut rules = self.load_for_edit()?;
        let before = rules.len();
        rules.retain(|r| r.id != rule_id);
        if rules.len() == before {
            return Ok(false);
        }
        self.save(&rules)?;
        Ok(true)
    }

    fn read_bytes(&self) -> Result<Option<Vec<u8>>> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(HeraldError::Rules(format!(
                "failed to read rules from {}: {e}",
                self.path.display()
            ))),
        }
    }

    /// Strict read: a file that exists but does not parse is an error, so an
    /// edit never replaces rules it could not see.
    fn load_for_edit(&self) -> Result<Vec<Rule>> {
        let Some(bytes) = self.read_bytes()? else {
            return Ok(Vec::new());
        };
        serde_json::from_slice::<RuleFile>(&bytes)
            .map(|file| file.rules)
            .map_err(|e| {
                HeraldError::Rules(format!(
                    "refusing to edit malformed rule file {}: {e}",
                    self.path.display()
                ))
            })
    }
}

impl RuleStore for JsonRuleStore {
    fn list(&self) -> Result<Vec<Rule>> {
        let Some(bytes) = self.read_bytes()? else {
            return Ok(Vec::new());
        };
        match serde_json::from_slice::<RuleFile>(&bytes) {
            Ok(file) => Ok(file.rules),
            Err(e) => {
                warn!("ignoring malformed rule file at {}: {e}", self.path.display());
                Ok(Vec::new())
            }
        }
    }
}
