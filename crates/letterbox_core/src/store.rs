/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::error::{FeedError, FeedResult};
use crate::events::{now_ms, ChangeKind, StoreChange};
use crate::letter_db::{CollectionPage, LetterDb};
use crate::letters::{materialize, validate_new_letter, InvalidLetter};
use crate::query::{Cursor, QuerySpec};
use anyhow::Result;
use async_trait::async_trait;
use letterbox_protocol::{Letter, LikeAction, LikeReceipt, NewLetter, SortOrder};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The three primitives the feed needs from a document store: ordered range
/// reads, live bounded subscriptions and an atomic counter+set mutation.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn fetch_page(
        &self,
        spec: &QuerySpec,
        after: Option<&Cursor>,
        limit: u32,
    ) -> Result<CollectionPage<Letter>>;

    /// Pushes a full snapshot of the first `limit` matching letters now and
    /// after every change that alters it.
    async fn subscribe(&self, spec: &QuerySpec, limit: u32) -> Result<LiveSubscription>;

    /// `None` when the letter does not exist.
    async fn apply_like(
        &self,
        letter_id: &str,
        viewer_id: &str,
        action: LikeAction,
    ) -> Result<Option<LikeReceipt>>;

    async fn get_letter(&self, id: &str) -> Result<Option<Letter>>;

    async fn add_letter(&self, new: NewLetter) -> Result<Letter>;
}

/// Receiving end of a live query. Dropping it stops the producer.
pub struct LiveSubscription {
    rx: mpsc::Receiver<Result<Vec<Letter>>>,
    cancel: CancellationToken,
}

impl LiveSubscription {
    pub fn new(rx: mpsc::Receiver<Result<Vec<Letter>>>, cancel: CancellationToken) -> Self {
        Self { rx, cancel }
    }

    /// Next snapshot; `None` once the producer is gone.
    pub async fn next(&mut self) -> Option<Result<Vec<Letter>>> {
        self.rx.recv().await
    }
}

impl Drop for LiveSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// `DocumentStore` over a local `LetterDb`, with change fan-out through a
/// broadcast channel.
#[derive(Clone)]
pub struct LocalDocStore {
    db: Arc<LetterDb>,
    members: Arc<Vec<String>>,
    changes: broadcast::Sender<StoreChange>,
}

impl LocalDocStore {
    pub fn new(db: Arc<LetterDb>, members: Vec<String>, capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(capacity.max(16));
        Self {
            db,
            members: Arc::new(members),
            changes,
        }
    }

    pub fn db(&self) -> &Arc<LetterDb> {
        &self.db
    }

    fn notify(&self, kind: ChangeKind, letter_id: &str, member: Option<&str>) {
        // No receivers simply means nobody is watching.
        let _ = self.changes.send(StoreChange {
            kind,
            letter_id: letter_id.to_string(),
            member: member.map(str::to_string),
        });
    }
}

/// Whether `change` can alter the first page of `spec`, given the last
/// snapshot sent.
fn change_affects(spec: &QuerySpec, last: Option<&[Letter]>, change: &StoreChange) -> bool {
    match change.kind {
        ChangeKind::Added => match (spec.member_eq(), change.member.as_deref()) {
            (Some(want), Some(got)) => want == got,
            _ => true,
        },
        // A like can pull any letter into a likes-ordered page; otherwise only
        // letters already shown change.
        ChangeKind::LikesChanged => {
            spec.sort == SortOrder::MostLoved
                || last.map_or(true, |items| items.iter().any(|l| l.id == change.letter_id))
        }
    }
}

async fn first_page(db: &Arc<LetterDb>, spec: &QuerySpec, limit: u32) -> Result<Vec<Letter>> {
    let page = tokio::task::spawn_blocking({
        let db = db.clone();
        let spec = spec.clone();
        move || db.list_letters(&spec, None, limit)
    })
    .await??;
    Ok(page.items)
}

#[async_trait]
impl DocumentStore for LocalDocStore {
    async fn fetch_page(
        &self,
        spec: &QuerySpec,
        after: Option<&Cursor>,
        limit: u32,
    ) -> Result<CollectionPage<Letter>> {
        let db = self.db.clone();
        let spec = spec.clone();
        let after = after.cloned();
        tokio::task::spawn_blocking(move || db.list_letters(&spec, after.as_ref(), limit)).await?
    }

    async fn subscribe(&self, spec: &QuerySpec, limit: u32) -> Result<LiveSubscription> {
        // Subscribe before the first read so no commit falls in between.
        let mut changes = self.changes.subscribe();
        let initial = first_page(&self.db, spec, limit).await?;

        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let db = self.db.clone();
        let spec = spec.clone();
        debug!(spec = %spec.key(), limit, "live subscription opened");

        tokio::spawn(async move {
            let mut pending = Some(initial);
            let mut last: Option<Vec<Letter>> = None;
            loop {
                if let Some(items) = pending.take() {
                    if last.as_ref() != Some(&items) {
                        last = Some(items.clone());
                        tokio::select! {
                            biased;
                            _ = token.cancelled() => break,
                            sent = tx.send(Ok(items)) => {
                                if sent.is_err() { break; }
                            }
                        }
                    }
                }

                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    msg = changes.recv() => match msg {
                        Ok(change) => {
                            if !change_affects(&spec, last.as_deref(), &change) {
                                debug!(
                                    spec = %spec.key(),
                                    letter_id = %change.letter_id,
                                    "change skipped"
                                );
                                continue;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => {}
                        Err(broadcast::error::RecvError::Closed) => {
                            let _ = tx.send(Err(anyhow::anyhow!("letter store closed"))).await;
                            break;
                        }
                    }
                }

                match first_page(&db, &spec, limit).await {
                    Ok(items) => pending = Some(items),
                    Err(e) => {
                        warn!(spec = %spec.key(), "live query failed: {e:#}");
                        let _ = tx.send(Err(e)).await;
                        break;
                    }
                }
            }
            debug!(spec = %spec.key(), "live subscription closed");
        });

        Ok(LiveSubscription::new(rx, cancel))
    }

    async fn apply_like(
        &self,
        letter_id: &str,
        viewer_id: &str,
        action: LikeAction,
    ) -> Result<Option<LikeReceipt>> {
        let receipt = tokio::task::spawn_blocking({
            let db = self.db.clone();
            let letter_id = letter_id.to_string();
            let viewer_id = viewer_id.to_string();
            move || db.apply_like(&letter_id, &viewer_id, action)
        })
        .await??;
        if let Some(r) = receipt.as_ref() {
            debug!(letter_id, ?action, likes = r.likes, changed = r.changed, "like applied");
            if r.changed {
                self.notify(ChangeKind::LikesChanged, letter_id, None);
            }
        }
        Ok(receipt)
    }

    async fn get_letter(&self, id: &str) -> Result<Option<Letter>> {
        let db = self.db.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || db.get_letter(&id)).await?
    }

    async fn add_letter(&self, new: NewLetter) -> Result<Letter> {
        let new = validate_new_letter(&self.members, &new)?;
        let letter = materialize(new, now_ms());
        tokio::task::spawn_blocking({
            let db = self.db.clone();
            let letter = letter.clone();
            move || db.insert_letter(&letter)
        })
        .await??;
        info!(letter_id = %letter.id, member = %letter.member, "letter added");
        self.notify(ChangeKind::Added, &letter.id, Some(&letter.member));
        Ok(letter)
    }
}

/// Composes a letter through any store, with validation failures kept apart
/// from storage failures.
pub async fn compose_letter(store: &dyn DocumentStore, new: NewLetter) -> FeedResult<Letter> {
    store.add_letter(new).await.map_err(|e| match e.downcast::<InvalidLetter>() {
        Ok(invalid) => FeedError::InvalidLetter(invalid.0),
        Err(e) => FeedError::Storage(e),
    })
}

/// Letter detail lookup.
pub async fn open_letter(store: &dyn DocumentStore, id: &str) -> FeedResult<Letter> {
    store
        .get_letter(id)
        .await
        .map_err(FeedError::Storage)?
        .ok_or_else(|| FeedError::NotFound(id.to_string()))
}
