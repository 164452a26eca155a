//! Per-target lock file.
//!
//! `pod-lock.json` records what has already been installed or performed on a
//! target: the manifest version of the last deployment, one entry per
//! satisfied ensure, and the identifiers of `once` actions already run. The
//! file is rewritten in full on every state transition and only ever through
//! the strategy's `upload_content` primitive, so it never exists
//! half-written on the remote side. A missing or unparseable file is an
//! empty lock.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::deploy::strategy::Strategy;
use crate::errors::DeployError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnsureEntry {
    pub version: String,
    pub config: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LockFile {
    #[serde(default)]
    pub deployment_version: String,
    #[serde(default)]
    pub ensures: BTreeMap<String, EnsureEntry>,
    #[serde(default)]
    pub once_actions: Vec<String>,
}

impl LockFile {
    /// Read the lock through the strategy. Missing and unparseable files
    /// both load as the empty lock.
    pub fn load(strategy: &mut dyn Strategy, path: &str) -> LockFile {
        match strategy.read_json(path) {
            Some(value) => serde_json::from_value(value).unwrap_or_default(),
            None => LockFile::default(),
        }
    }

    /// Persist the lock in full through the strategy's write primitive.
    pub fn save(&self, strategy: &mut dyn Strategy, path: &str) -> Result<(), DeployError> {
        let bytes = serde_json::to_vec_pretty(self)
            .map_err(|e| DeployError::Transport(format!("cannot serialize lock: {}", e)))?;
        strategy.upload_content(path, &bytes)
    }

    pub fn has_once_action(&self, id: &str) -> bool {
        self.once_actions.iter().any(|existing| existing == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_tolerate_missing_fields() {
        let lock: LockFile = serde_json::from_str("{}").unwrap();
        assert_eq!(lock.deployment_version, "");
        assert!(lock.ensures.is_empty());
        assert!(lock.once_actions.is_empty());
    }

    #[test]
    fn test_layout_round_trip() {
        let mut lock = LockFile::default();
        lock.deployment_version = "1.0.0".to_string();
        lock.ensures.insert(
            "swap".to_string(),
            EnsureEntry {
                version: "2G".to_string(),
                config: serde_json::json!({ "size": "2G" }),
            },
        );
        lock.once_actions.push("action_migrate".to_string());

        let json = serde_json::to_value(&lock).unwrap();
        assert_eq!(json["deployment_version"], "1.0.0");
        assert_eq!(json["ensures"]["swap"]["version"], "2G");
        assert_eq!(json["once_actions"][0], "action_migrate");

        let back: LockFile = serde_json::from_value(json).unwrap();
        assert!(back.has_once_action("action_migrate"));
    }
}
