/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::client_kv::ClientKv;
use anyhow::Result;
use rand::{rngs::OsRng, RngCore};
use std::sync::Mutex;
use tracing::info;

const VIEWER_ID_KEY: &str = "viewer_id";

/// Owns the one opaque viewer identifier of this installation.
pub struct ViewerIdentityStore {
    kv: ClientKv,
    cached: Mutex<Option<String>>,
}

impl ViewerIdentityStore {
    pub fn new(kv: ClientKv) -> Self {
        Self {
            kv,
            cached: Mutex::new(None),
        }
    }

    /// Returns the persisted identifier, creating it on first use. Callers
    /// racing here all observe the same value.
    pub fn get_or_create(&self) -> Result<String> {
        let mut cached = self.cached.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(id) = cached.as_ref() {
            return Ok(id.clone());
        }
        let id = match self.kv.get(VIEWER_ID_KEY)?.filter(|v| !v.trim().is_empty()) {
            Some(existing) => existing,
            None => {
                let fresh = new_viewer_id();
                self.kv.set(VIEWER_ID_KEY, &fresh)?;
                info!(viewer_id = %fresh, "created viewer identity");
                fresh
            }
        };
        *cached = Some(id.clone());
        Ok(id)
    }
}

fn new_viewer_id() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn created_lazily_and_kept() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("client.db");
        let kv = ClientKv::open(&path).unwrap();
        let store = ViewerIdentityStore::new(kv.clone());
        assert_eq!(kv.get(VIEWER_ID_KEY).unwrap(), None);

        let id = store.get_or_create().unwrap();
        assert_eq!(id.len(), 32);
        assert_eq!(store.get_or_create().unwrap(), id);
        assert_eq!(kv.get(VIEWER_ID_KEY).unwrap().as_deref(), Some(id.as_str()));

        let reopened = ViewerIdentityStore::new(ClientKv::open(&path).unwrap());
        assert_eq!(reopened.get_or_create().unwrap(), id);
    }

    #[test]
    fn concurrent_callers_share_one_identity() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(ViewerIdentityStore::new(
            ClientKv::open(dir.path().join("client.db")).unwrap(),
        ));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let s = store.clone();
                std::thread::spawn(move || s.get_or_create().unwrap())
            })
            .collect();
        let ids: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
    }
}
