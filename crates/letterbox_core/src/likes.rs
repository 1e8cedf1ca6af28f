/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::error::{FeedError, FeedResult};
use crate::identity::ViewerIdentityStore;
use crate::ledger::LikeLedger;
use crate::store::DocumentStore;
use letterbox_protocol::{LikeAction, LikeReceipt};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Somewhere a like count is displayed and can be corrected in place.
pub trait LikeCountView: Send + Sync {
    fn adjust_like_count(&self, letter_id: &str, delta: i64);
    fn set_like_count(&self, letter_id: &str, likes: u64);
}

/// A toggle the store confirmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LikeOutcome {
    pub receipt: LikeReceipt,
    /// False when the ledger could not be written back; the entry then only
    /// lives in memory until a later toggle persists it.
    pub ledger_persisted: bool,
}

pub struct LikeCoordinator {
    store: Arc<dyn DocumentStore>,
    identity: Arc<ViewerIdentityStore>,
    ledger: Arc<LikeLedger>,
    views: Vec<Arc<dyn LikeCountView>>,
    pending: Arc<Mutex<HashSet<String>>>,
}

impl LikeCoordinator {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        identity: Arc<ViewerIdentityStore>,
        ledger: Arc<LikeLedger>,
    ) -> Self {
        Self {
            store,
            identity,
            ledger,
            views: Vec::new(),
            pending: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn with_view(mut self, view: Arc<dyn LikeCountView>) -> Self {
        self.views.push(view);
        self
    }

    /// Seed for a letter's liked/unliked display state.
    pub fn is_liked(&self, letter_id: &str) -> bool {
        self.ledger.is_liked(letter_id)
    }

    pub fn is_pending(&self, letter_id: &str) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(letter_id)
    }

    /// Flips this viewer's like on `letter_id`: optimistic ledger and count
    /// update first, then one atomic store mutation, then reconciliation with
    /// the store's answer. On failure the ledger entry is reverted and the
    /// displayed count is reset to the store's current value.
    pub async fn toggle_like(&self, letter_id: &str) -> FeedResult<LikeOutcome> {
        let _pending = PendingToggle::begin(&self.pending, letter_id)?;

        let identity = self.identity.clone();
        let viewer_id = blocking(move || identity.get_or_create())
            .await
            .map_err(|e| FeedError::Mutation {
                letter_id: letter_id.to_string(),
                cause: e,
            })?;

        let was_liked = self.ledger.is_liked(letter_id);
        let action = LikeAction::for_toggle(was_liked);
        self.ledger.set_liked(letter_id, !was_liked);
        for view in &self.views {
            view.adjust_like_count(letter_id, action.delta());
        }

        match self.store.apply_like(letter_id, &viewer_id, action).await {
            Ok(Some(receipt)) => {
                self.ledger.set_liked(letter_id, receipt.liked);
                for view in &self.views {
                    view.set_like_count(letter_id, receipt.likes);
                }
                let ledger = self.ledger.clone();
                let ledger_persisted = match blocking(move || ledger.persist()).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(letter_id, "persist like ledger failed: {e:#}");
                        false
                    }
                };
                info!(
                    letter_id,
                    ?action,
                    likes = receipt.likes,
                    changed = receipt.changed,
                    ledger_persisted,
                    "like toggled"
                );
                Ok(LikeOutcome {
                    receipt,
                    ledger_persisted,
                })
            }
            Ok(None) => {
                self.roll_back(letter_id, was_liked, action).await;
                Err(FeedError::NotFound(letter_id.to_string()))
            }
            Err(e) => {
                warn!(letter_id, ?action, "like mutation failed: {e:#}");
                self.roll_back(letter_id, was_liked, action).await;
                Err(FeedError::Mutation {
                    letter_id: letter_id.to_string(),
                    cause: e,
                })
            }
        }
    }

    /// Snapshots may have moved the displayed count while the mutation was
    /// in flight, so the count is re-read from the store instead of undoing
    /// the optimistic delta. The delta is undone only when that read fails.
    async fn roll_back(&self, letter_id: &str, was_liked: bool, action: LikeAction) {
        self.ledger.set_liked(letter_id, was_liked);
        if self.views.is_empty() {
            return;
        }
        match self.store.get_letter(letter_id).await {
            Ok(Some(letter)) => {
                for view in &self.views {
                    view.set_like_count(letter_id, letter.likes);
                }
            }
            fetched => {
                if let Err(e) = fetched {
                    warn!(letter_id, "re-read after failed like failed: {e:#}");
                }
                for view in &self.views {
                    view.adjust_like_count(letter_id, -action.delta());
                }
            }
        }
    }
}

async fn blocking<T, F>(f: F) -> anyhow::Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

/// Marks a letter as having a toggle in flight for as long as it lives.
struct PendingToggle {
    pending: Arc<Mutex<HashSet<String>>>,
    letter_id: String,
}

impl PendingToggle {
    fn begin(pending: &Arc<Mutex<HashSet<String>>>, letter_id: &str) -> FeedResult<Self> {
        let mut set = pending.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(letter_id.to_string()) {
            return Err(FeedError::LikeInFlight(letter_id.to_string()));
        }
        Ok(Self {
            pending: pending.clone(),
            letter_id: letter_id.to_string(),
        })
    }
}

impl Drop for PendingToggle {
    fn drop(&mut self) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.letter_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client_kv::ClientKv;
    use crate::config::DEFAULT_MEMBERS;
    use crate::events::{FeedEvent, WINDOW_REPLACED};
    use crate::feed::{FeedCoordinator, FeedPhase};
    use crate::letter_db::{CollectionPage, LetterDb};
    use crate::query::{Cursor, QuerySpec};
    use crate::store::{LiveSubscription, LocalDocStore};
    use anyhow::Result;
    use async_trait::async_trait;
    use letterbox_protocol::{Filter, Letter, NewLetter, SortOrder};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::{broadcast, Notify};

    /// Records counts the way a rendered list would.
    #[derive(Default)]
    struct Counts(Mutex<HashMap<String, u64>>);

    impl Counts {
        fn get(&self, id: &str) -> u64 {
            self.0.lock().unwrap().get(id).copied().unwrap_or(0)
        }
        fn put(&self, id: &str, v: u64) {
            self.0.lock().unwrap().insert(id.to_string(), v);
        }
    }

    impl LikeCountView for Counts {
        fn adjust_like_count(&self, letter_id: &str, delta: i64) {
            let mut map = self.0.lock().unwrap();
            let entry = map.entry(letter_id.to_string()).or_insert(0);
            *entry = (*entry as i64 + delta).max(0) as u64;
        }
        fn set_like_count(&self, letter_id: &str, likes: u64) {
            self.put(letter_id, likes);
        }
    }

    struct Rig {
        _dir: TempDir,
        store: Arc<LocalDocStore>,
        client_path: std::path::PathBuf,
    }

    fn rig() -> Rig {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(LetterDb::open(dir.path().join("letters.db")).unwrap());
        let store = Arc::new(LocalDocStore::new(
            db,
            DEFAULT_MEMBERS.iter().map(|m| m.to_string()).collect(),
            64,
        ));
        let client_path = dir.path().join("client.db");
        Rig {
            _dir: dir,
            store,
            client_path,
        }
    }

    fn bare_coordinator(
        store: Arc<dyn DocumentStore>,
        client_path: &std::path::Path,
    ) -> LikeCoordinator {
        let kv = ClientKv::open(client_path).unwrap();
        let identity = Arc::new(ViewerIdentityStore::new(kv.clone()));
        let ledger = Arc::new(LikeLedger::load(kv).unwrap());
        LikeCoordinator::new(store, identity, ledger)
    }

    fn coordinator(
        store: Arc<dyn DocumentStore>,
        client_path: &std::path::Path,
        view: Arc<Counts>,
    ) -> LikeCoordinator {
        bare_coordinator(store, client_path).with_view(view)
    }

    async fn wait_for(rx: &mut broadcast::Receiver<FeedEvent>, kind: &str) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match rx.recv().await {
                    Ok(ev) if ev.kind == kind => return,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => panic!("feed events closed"),
                }
            }
        })
        .await
        .expect("feed event in time")
    }

    fn likes_in(feed: &FeedCoordinator, id: &str) -> u64 {
        feed.view()
            .items
            .iter()
            .find(|l| l.id == id)
            .map(|l| l.likes)
            .expect("letter in window")
    }

    async fn add(store: &LocalDocStore) -> Letter {
        store
            .add_letter(NewLetter {
                name: "army".into(),
                member: "Jin".into(),
                message: "happy birthday".into(),
                track: None,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn like_is_optimistic_then_persisted() {
        let rig = rig();
        let letter = add(&rig.store).await;
        for v in ["a", "b", "c"] {
            rig.store.apply_like(&letter.id, v, LikeAction::Like).await.unwrap();
        }
        let counts = Arc::new(Counts::default());
        counts.put(&letter.id, 3);
        let likes = coordinator(rig.store.clone(), &rig.client_path, counts.clone());
        assert!(!likes.is_liked(&letter.id));

        let outcome = likes.toggle_like(&letter.id).await.unwrap();
        assert!(outcome.ledger_persisted);
        let receipt = outcome.receipt;
        assert!(receipt.liked);
        assert_eq!(receipt.likes, 4);
        assert_eq!(counts.get(&letter.id), 4);
        assert!(likes.is_liked(&letter.id));

        // The ledger survives a restart.
        let reopened = LikeLedger::load(ClientKv::open(&rig.client_path).unwrap()).unwrap();
        assert!(reopened.is_liked(&letter.id));
    }

    #[tokio::test]
    async fn toggling_twice_restores_count_and_ledger() {
        let rig = rig();
        let letter = add(&rig.store).await;
        let counts = Arc::new(Counts::default());
        let likes = coordinator(rig.store.clone(), &rig.client_path, counts.clone());

        likes.toggle_like(&letter.id).await.unwrap();
        assert_eq!(counts.get(&letter.id), 1);
        let receipt = likes.toggle_like(&letter.id).await.unwrap().receipt;
        assert!(!receipt.liked);
        assert_eq!(counts.get(&letter.id), 0);
        assert!(!likes.is_liked(&letter.id));
        assert_eq!(rig.store.get_letter(&letter.id).await.unwrap().unwrap().likes, 0);
    }

    #[tokio::test]
    async fn two_viewers_both_register() {
        let rig = rig();
        let letter = add(&rig.store).await;
        let dir_b = TempDir::new().unwrap();
        let a = coordinator(rig.store.clone(), &rig.client_path, Arc::new(Counts::default()));
        let b_path = dir_b.path().join("client.db");
        let b = coordinator(rig.store.clone(), &b_path, Arc::new(Counts::default()));

        let (ra, rb) = tokio::join!(a.toggle_like(&letter.id), b.toggle_like(&letter.id));
        ra.unwrap();
        rb.unwrap();
        assert_eq!(rig.store.get_letter(&letter.id).await.unwrap().unwrap().likes, 2);
        assert_eq!(rig.store.db().count_likers(&letter.id).unwrap(), 2);
    }

    #[tokio::test]
    async fn stale_ledger_is_reconciled_with_server() {
        let rig = rig();
        let letter = add(&rig.store).await;
        let counts = Arc::new(Counts::default());
        let likes = coordinator(rig.store.clone(), &rig.client_path, counts.clone());
        let viewer = likes.identity.get_or_create().unwrap();
        // Server already has this viewer; the local ledger forgot.
        rig.store.apply_like(&letter.id, &viewer, LikeAction::Like).await.unwrap();
        counts.put(&letter.id, 1);

        let receipt = likes.toggle_like(&letter.id).await.unwrap().receipt;
        assert!(!receipt.changed);
        assert_eq!(counts.get(&letter.id), 1);
        assert!(likes.is_liked(&letter.id));
    }

    /// Fails or parks like mutations on demand.
    struct ControlledStore {
        inner: Arc<LocalDocStore>,
        fail: AtomicBool,
        gate: Option<Notify>,
    }

    #[async_trait]
    impl DocumentStore for ControlledStore {
        async fn fetch_page(
            &self,
            spec: &QuerySpec,
            after: Option<&Cursor>,
            limit: u32,
        ) -> Result<CollectionPage<Letter>> {
            self.inner.fetch_page(spec, after, limit).await
        }
        async fn subscribe(&self, spec: &QuerySpec, limit: u32) -> Result<LiveSubscription> {
            self.inner.subscribe(spec, limit).await
        }
        async fn apply_like(
            &self,
            id: &str,
            viewer: &str,
            action: LikeAction,
        ) -> Result<Option<LikeReceipt>> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("deadline exceeded");
            }
            self.inner.apply_like(id, viewer, action).await
        }
        async fn get_letter(&self, id: &str) -> Result<Option<Letter>> {
            self.inner.get_letter(id).await
        }
        async fn add_letter(&self, new: NewLetter) -> Result<Letter> {
            self.inner.add_letter(new).await
        }
    }

    #[tokio::test]
    async fn failed_mutation_rolls_back() {
        let rig = rig();
        let letter = add(&rig.store).await;
        for v in ["a", "b", "c"] {
            rig.store.apply_like(&letter.id, v, LikeAction::Like).await.unwrap();
        }
        let store = Arc::new(ControlledStore {
            inner: rig.store.clone(),
            fail: AtomicBool::new(true),
            gate: None,
        });
        let counts = Arc::new(Counts::default());
        counts.put(&letter.id, 3);
        let likes = coordinator(store, &rig.client_path, counts.clone());

        let err = likes.toggle_like(&letter.id).await.unwrap_err();
        assert!(matches!(err, FeedError::Mutation { .. }));
        assert_eq!(counts.get(&letter.id), 3);
        assert!(!likes.is_liked(&letter.id));
        assert!(!likes.is_pending(&letter.id));
        let reopened = LikeLedger::load(ClientKv::open(&rig.client_path).unwrap()).unwrap();
        assert!(!reopened.is_liked(&letter.id));
    }

    #[tokio::test]
    async fn unknown_letter_rolls_back() {
        let rig = rig();
        let counts = Arc::new(Counts::default());
        let likes = coordinator(rig.store.clone(), &rig.client_path, counts.clone());
        let err = likes.toggle_like("missing").await.unwrap_err();
        assert!(matches!(err, FeedError::NotFound(_)));
        assert_eq!(counts.get("missing"), 0);
        assert!(!likes.is_liked("missing"));
    }

    #[tokio::test]
    async fn second_toggle_while_pending_is_rejected() {
        let rig = rig();
        let letter = add(&rig.store).await;
        let other = add(&rig.store).await;
        let store = Arc::new(ControlledStore {
            inner: rig.store.clone(),
            fail: AtomicBool::new(false),
            gate: Some(Notify::new()),
        });
        let counts = Arc::new(Counts::default());
        let likes = Arc::new(coordinator(store.clone(), &rig.client_path, counts.clone()));

        let first = tokio::spawn({
            let likes = likes.clone();
            let id = letter.id.clone();
            async move { likes.toggle_like(&id).await }
        });
        while counts.get(&letter.id) != 1 {
            tokio::task::yield_now().await;
        }
        assert!(likes.is_pending(&letter.id));
        assert!(matches!(
            likes.toggle_like(&letter.id).await,
            Err(FeedError::LikeInFlight(_))
        ));
        assert_eq!(counts.get(&letter.id), 1);

        if let Some(gate) = &store.gate {
            gate.notify_one();
        }
        assert!(first.await.unwrap().unwrap().receipt.liked);
        assert!(!likes.is_pending(&letter.id));

        // Other letters are unaffected by the rejected toggle.
        if let Some(gate) = &store.gate {
            gate.notify_one();
        }
        assert!(likes.toggle_like(&other.id).await.unwrap().receipt.liked);
    }

    #[tokio::test]
    async fn failed_like_after_a_snapshot_shows_the_server_count() {
        let rig = rig();
        let target = add(&rig.store).await;
        let bystander = add(&rig.store).await;
        rig.store.apply_like(&bystander.id, "z", LikeAction::Like).await.unwrap();
        let store = Arc::new(ControlledStore {
            inner: rig.store.clone(),
            fail: AtomicBool::new(false),
            gate: Some(Notify::new()),
        });
        let feed = Arc::new(FeedCoordinator::new(store.clone(), 12, 64));
        let mut rx = feed.events();
        feed.set_spec(Filter::All, SortOrder::Newest).await.unwrap();
        wait_for(&mut rx, WINDOW_REPLACED).await;
        let likes = Arc::new(
            bare_coordinator(store.clone(), &rig.client_path).with_view(feed.clone()),
        );

        let toggle = tokio::spawn({
            let likes = likes.clone();
            let id = target.id.clone();
            async move { likes.toggle_like(&id).await }
        });
        while likes_in(&feed, &target.id) != 1 {
            tokio::task::yield_now().await;
        }

        // Another viewer's like lands while ours is parked; the snapshot
        // carries the server count without our optimistic +1.
        rig.store.apply_like(&target.id, "someone-else", LikeAction::Like).await.unwrap();
        wait_for(&mut rx, WINDOW_REPLACED).await;
        assert_eq!(likes_in(&feed, &target.id), 1);

        store.fail.store(true, Ordering::SeqCst);
        if let Some(gate) = &store.gate {
            gate.notify_one();
        }
        assert!(matches!(
            toggle.await.unwrap(),
            Err(FeedError::Mutation { .. })
        ));

        let server = rig.store.get_letter(&target.id).await.unwrap().unwrap().likes;
        assert_eq!(server, 1);
        assert_eq!(likes_in(&feed, &target.id), server);
        assert!(!likes.is_liked(&target.id));

        // The rest of the window is untouched by the failure.
        let view = feed.view();
        assert_eq!(view.phase, FeedPhase::Live);
        assert_eq!(view.items.len(), 2);
        assert_eq!(likes_in(&feed, &bystander.id), 1);
        assert!(view.last_error.is_none());
    }

    #[tokio::test]
    async fn ledger_write_failure_is_reported() {
        let rig = rig();
        let letter = add(&rig.store).await;
        let client_dir = TempDir::new().unwrap();
        let sub = client_dir.path().join("profile");
        let client_path = sub.join("client.db");
        let likes = coordinator(rig.store.clone(), &client_path, Arc::new(Counts::default()));
        likes.identity.get_or_create().unwrap();
        std::fs::remove_dir_all(&sub).unwrap();

        let outcome = likes.toggle_like(&letter.id).await.unwrap();
        assert!(outcome.receipt.liked);
        assert!(!outcome.ledger_persisted);
        assert!(likes.is_liked(&letter.id));
        assert_eq!(rig.store.get_letter(&letter.id).await.unwrap().unwrap().likes, 1);
    }
}
