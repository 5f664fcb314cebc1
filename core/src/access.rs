//! Hostmask based access control
//!
//! Each entry pairs a regular expression with a numeric level. The level of
//! a hostmask is the highest level among all entries whose pattern matches
//! the complete `nick!user@host` string, or 0 if nothing matches.
//!
//! Entries are identified by their pattern *string*: granting the same
//! pattern twice replaces the level, and revoking requires the exact
//! pattern that was granted.

use crate::Result;
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Level granted to hostmasks that match no entry
pub const NO_ACCESS: u32 = 0;

/// A single access grant
#[derive(Debug, Clone)]
pub struct AccessEntry {
    pattern: String,
    regex: Regex,
    level: u32,
}

impl AccessEntry {
    /// Compile a new entry. The pattern must match the whole hostmask.
    pub fn new(pattern: &str, level: u32) -> Result<Self> {
        let regex = Regex::new(&format!("^(?:{})$", pattern))?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
            level,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn matches(&self, hostmask: &str) -> bool {
        self.regex.is_match(hostmask)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct AccessFile {
    #[serde(default, rename = "entry")]
    entries: Vec<AccessRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct AccessRecord {
    pattern: String,
    level: u32,
}

/// Thread-safe set of access entries
#[derive(Debug, Default)]
pub struct AccessList {
    entries: RwLock<Vec<AccessEntry>>,
}

impl AccessList {
    /// Create an empty access list
    pub fn new() -> Self {
        Self::default()
    }

    /// Load entries from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse entries from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let file: AccessFile = toml::from_str(content)?;
        let list = Self::new();
        for record in file.entries {
            list.grant(&record.pattern, record.level)?;
        }
        Ok(list)
    }

    /// Save entries to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    /// Render entries as TOML text
    pub fn to_toml(&self) -> Result<String> {
        let file = AccessFile {
            entries: self
                .entries
                .read()
                .iter()
                .map(|e| AccessRecord {
                    pattern: e.pattern.clone(),
                    level: e.level,
                })
                .collect(),
        };
        Ok(toml::to_string_pretty(&file)?)
    }

    /// Highest level among matching entries, [`NO_ACCESS`] if none match
    pub fn level_for(&self, hostmask: &str) -> u32 {
        self.entries
            .read()
            .iter()
            .filter(|e| e.matches(hostmask))
            .map(|e| e.level)
            .max()
            .unwrap_or(NO_ACCESS)
    }

    /// Grant `level` to `pattern`, replacing an entry with the identical
    /// pattern string. Fails without touching the list if the pattern does
    /// not compile.
    pub fn grant(&self, pattern: &str, level: u32) -> Result<()> {
        let entry = AccessEntry::new(pattern, level)?;
        let mut entries = self.entries.write();
        match entries.iter_mut().find(|e| e.pattern == pattern) {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
        tracing::debug!(pattern, level, "Granted access level");
        Ok(())
    }

    /// Remove the entry whose pattern string is identical to `pattern`.
    /// Returns whether an entry was removed.
    pub fn revoke(&self, pattern: &str) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| e.pattern != pattern);
        let removed = entries.len() != before;
        if removed {
            tracing::debug!(pattern, "Revoked access level");
        }
        removed
    }

    /// Snapshot of all entries as (pattern, level) pairs
    pub fn entries(&self) -> Vec<(String, u32)> {
        self.entries
            .read()
            .iter()
            .map(|e| (e.pattern.clone(), e.level))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
