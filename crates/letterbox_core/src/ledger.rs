/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::client_kv::ClientKv;
use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::sync::Mutex;
use tracing::warn;

const LEDGER_KEY: &str = "liked_letters";

/// This viewer's liked/unliked state per letter. A cache of the server's
/// liker sets: loaded once, written back after each confirmed toggle.
pub struct LikeLedger {
    kv: ClientKv,
    liked: Mutex<BTreeSet<String>>,
}

impl LikeLedger {
    pub fn load(kv: ClientKv) -> Result<Self> {
        let liked = match kv.get(LEDGER_KEY)? {
            Some(raw) => match serde_json::from_str::<Vec<String>>(&raw) {
                Ok(ids) => ids.into_iter().collect(),
                Err(e) => {
                    warn!("discarding unreadable like ledger: {e}");
                    BTreeSet::new()
                }
            },
            None => BTreeSet::new(),
        };
        Ok(Self {
            kv,
            liked: Mutex::new(liked),
        })
    }

    pub fn is_liked(&self, letter_id: &str) -> bool {
        self.liked
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(letter_id)
    }

    /// Updates the in-memory entry only; `persist` writes it out.
    pub fn set_liked(&self, letter_id: &str, liked: bool) {
        let mut set = self.liked.lock().unwrap_or_else(|e| e.into_inner());
        if liked {
            set.insert(letter_id.to_string());
        } else {
            set.remove(letter_id);
        }
    }

    pub fn liked_ids(&self) -> Vec<String> {
        self.liked
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn persist(&self) -> Result<()> {
        let ids = self.liked_ids();
        let raw = serde_json::to_string(&ids).context("serialize like ledger")?;
        self.kv.set(LEDGER_KEY, &raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn persisted_entries_are_reloaded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("client.db");
        let ledger = LikeLedger::load(ClientKv::open(&path).unwrap()).unwrap();
        assert!(!ledger.is_liked("a"));
        ledger.set_liked("a", true);
        ledger.set_liked("b", true);
        ledger.set_liked("b", false);
        ledger.persist().unwrap();

        let reloaded = LikeLedger::load(ClientKv::open(&path).unwrap()).unwrap();
        assert!(reloaded.is_liked("a"));
        assert!(!reloaded.is_liked("b"));
        assert_eq!(reloaded.liked_ids(), vec!["a".to_string()]);
    }

    #[test]
    fn unpersisted_changes_are_not_durable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("client.db");
        let ledger = LikeLedger::load(ClientKv::open(&path).unwrap()).unwrap();
        ledger.set_liked("a", true);
        let reloaded = LikeLedger::load(ClientKv::open(&path).unwrap()).unwrap();
        assert!(!reloaded.is_liked("a"));
    }

    #[test]
    fn corrupt_ledger_starts_empty() {
        let dir = TempDir::new().unwrap();
        let kv = ClientKv::open(dir.path().join("client.db")).unwrap();
        kv.set(LEDGER_KEY, "{not json").unwrap();
        let ledger = LikeLedger::load(kv).unwrap();
        assert!(ledger.liked_ids().is_empty());
    }
}
