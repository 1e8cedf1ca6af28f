/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Live feed window over one (filter, sort) spec at a time.
//!
//! The window has two tiers: the first page is owned by the live
//! subscription and replaced wholesale on every snapshot, later pages are
//! appended by `load_more` and never touched by snapshots. Changing filter or sort
//! cancels the subscription token under the state lock, so once `set_spec`
//! or `close` has taken the lock no stale snapshot or page can land.

use crate::error::{FeedError, FeedResult};
use crate::events::{
    FeedEvent, LIKE_ADJUSTED, LOAD_FAILED, PAGE_APPENDED, PAGE_FAILED, WINDOW_REPLACED,
    WINDOW_RESET,
};
use crate::likes::LikeCountView;
use crate::query::{build_query, Cursor, QuerySpec};
use crate::store::{DocumentStore, LiveSubscription};
use letterbox_protocol::{Filter, Letter, SortOrder};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FeedPhase {
    Idle,
    Subscribing,
    Live,
}

/// What a renderer needs: the composed window and the pager flags.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedView {
    pub phase: FeedPhase,
    pub filter: Option<Filter>,
    pub sort: Option<SortOrder>,
    pub items: Vec<Letter>,
    pub has_more: bool,
    pub loading_more: bool,
    pub last_error: Option<String>,
}

struct FeedState {
    phase: FeedPhase,
    spec: Option<QuerySpec>,
    live: Vec<Letter>,
    paged: Vec<Letter>,
    cursor: Option<Cursor>,
    has_more: bool,
    loading_more: bool,
    cancel: Option<CancellationToken>,
    last_error: Option<String>,
}

impl FeedState {
    fn new() -> Self {
        Self {
            phase: FeedPhase::Idle,
            spec: None,
            live: Vec::new(),
            paged: Vec::new(),
            cursor: None,
            has_more: false,
            loading_more: false,
            cancel: None,
            last_error: None,
        }
    }

    /// Tears down the active subscription and empties the window.
    fn reset(&mut self) {
        if let Some(token) = self.cancel.take() {
            token.cancel();
        }
        self.phase = FeedPhase::Idle;
        self.spec = None;
        self.live.clear();
        self.paged.clear();
        self.cursor = None;
        self.has_more = false;
        self.loading_more = false;
        self.last_error = None;
    }

    /// Live first page followed by paged letters not already in it.
    fn window(&self) -> Vec<Letter> {
        let live_ids: HashSet<&str> = self.live.iter().map(|l| l.id.as_str()).collect();
        self.live
            .iter()
            .chain(self.paged.iter().filter(|l| !live_ids.contains(l.id.as_str())))
            .cloned()
            .collect()
    }
}

fn lock_state(state: &Mutex<FeedState>) -> MutexGuard<'_, FeedState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

fn emit(
    events: &broadcast::Sender<FeedEvent>,
    kind: &str,
    letter_id: Option<String>,
    detail: Option<String>,
) {
    let _ = events.send(FeedEvent::new(kind, letter_id, detail));
}

pub struct FeedCoordinator {
    store: Arc<dyn DocumentStore>,
    page_size: u32,
    state: Arc<Mutex<FeedState>>,
    events: broadcast::Sender<FeedEvent>,
}

impl FeedCoordinator {
    pub fn new(store: Arc<dyn DocumentStore>, page_size: u32, event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(16));
        Self {
            store,
            page_size: page_size.clamp(1, 200),
            state: Arc::new(Mutex::new(FeedState::new())),
            events,
        }
    }

    pub fn events(&self) -> broadcast::Receiver<FeedEvent> {
        self.events.subscribe()
    }

    pub fn view(&self) -> FeedView {
        let st = lock_state(&self.state);
        FeedView {
            phase: st.phase,
            filter: st.spec.as_ref().map(|s| s.filter.clone()),
            sort: st.spec.as_ref().map(|s| s.sort),
            items: st.window(),
            has_more: st.has_more,
            loading_more: st.loading_more,
            last_error: st.last_error.clone(),
        }
    }

    /// Switches the window to a new (filter, sort) spec: the old
    /// subscription, window and cursor are dropped first, then a bounded live
    /// subscription is opened. Snapshots arrive in the background.
    pub async fn set_spec(&self, filter: Filter, sort: SortOrder) -> FeedResult<()> {
        let spec = build_query(&filter, sort);
        let token = CancellationToken::new();
        {
            let mut st = lock_state(&self.state);
            st.reset();
            st.phase = FeedPhase::Subscribing;
            st.spec = Some(spec.clone());
            st.cancel = Some(token.clone());
        }
        emit(&self.events, WINDOW_RESET, None, Some(spec.key()));
        info!(spec = %spec.key(), page_size = self.page_size, "opening live feed");

        let sub = match self.store.subscribe(&spec, self.page_size).await {
            Ok(sub) => sub,
            Err(e) => {
                if token.is_cancelled() {
                    return Ok(());
                }
                fail_subscription(&self.state, &self.events, &token, format!("{e:#}"));
                return Err(FeedError::Subscription(e));
            }
        };
        if token.is_cancelled() {
            debug!(spec = %spec.key(), "spec superseded while subscribing");
            return Ok(());
        }

        tokio::spawn(pump(
            sub,
            token,
            self.state.clone(),
            self.events.clone(),
            self.page_size,
        ));
        Ok(())
    }

    /// Fetches the next page after the cursor and appends it. Returns the
    /// number of letters appended; calls that find the pager busy, exhausted
    /// or not live are no-ops returning 0.
    pub async fn load_more(&self) -> FeedResult<usize> {
        let (spec, cursor, token) = {
            let mut st = lock_state(&self.state);
            if st.phase != FeedPhase::Live || !st.has_more || st.loading_more {
                return Ok(0);
            }
            let (Some(spec), Some(cursor), Some(token)) =
                (st.spec.clone(), st.cursor.clone(), st.cancel.clone())
            else {
                return Ok(0);
            };
            st.loading_more = true;
            (spec, cursor, token)
        };
        let mut guard = InFlightGuard {
            state: self.state.clone(),
            token: token.clone(),
            armed: true,
        };

        let fetched = self.store.fetch_page(&spec, Some(&cursor), self.page_size).await;

        guard.armed = false;
        let mut st = lock_state(&self.state);
        if token.is_cancelled() {
            debug!(spec = %spec.key(), "discarding page for superseded spec");
            return Ok(0);
        }
        st.loading_more = false;

        let page = match fetched {
            Ok(page) => page,
            Err(e) => {
                st.last_error = Some(format!("{e:#}"));
                drop(st);
                warn!(spec = %spec.key(), "load more failed: {e:#}");
                emit(&self.events, PAGE_FAILED, None, Some(format!("{e:#}")));
                return Err(FeedError::PageFetch(e));
            }
        };

        if page.items.is_empty() {
            st.has_more = false;
            drop(st);
            emit(&self.events, PAGE_APPENDED, None, Some("0".to_string()));
            return Ok(0);
        }

        st.has_more = page.items.len() as u32 == self.page_size;
        st.cursor = page.items.last().map(|l| spec.cursor_for(l));
        let known: HashSet<String> = st
            .live
            .iter()
            .chain(st.paged.iter())
            .map(|l| l.id.clone())
            .collect();
        // Only letters of this spec that sort after the old cursor can extend the window.
        let fresh: Vec<Letter> = page
            .items
            .into_iter()
            .filter(|l| spec.matches(l) && cursor.precedes(&spec, l) && !known.contains(&l.id))
            .collect();
        let appended = fresh.len();
        st.paged.extend(fresh);
        st.last_error = None;
        let has_more = st.has_more;
        drop(st);

        debug!(spec = %spec.key(), appended, has_more, "page appended");
        emit(&self.events, PAGE_APPENDED, None, Some(appended.to_string()));
        Ok(appended)
    }

    /// Unmount: cancels the subscription and empties the window.
    pub fn close(&self) {
        lock_state(&self.state).reset();
        emit(&self.events, WINDOW_RESET, None, None);
    }
}

impl Drop for FeedCoordinator {
    fn drop(&mut self) {
        lock_state(&self.state).reset();
    }
}

impl LikeCountView for FeedCoordinator {
    fn adjust_like_count(&self, letter_id: &str, delta: i64) {
        let mut guard = lock_state(&self.state);
        let st = &mut *guard;
        let mut hit = false;
        for letter in st.live.iter_mut().chain(st.paged.iter_mut()) {
            if letter.id == letter_id {
                letter.likes = (letter.likes as i64).saturating_add(delta).max(0) as u64;
                hit = true;
            }
        }
        drop(guard);
        if hit {
            emit(&self.events, LIKE_ADJUSTED, Some(letter_id.to_string()), Some(delta.to_string()));
        }
    }

    fn set_like_count(&self, letter_id: &str, likes: u64) {
        let mut guard = lock_state(&self.state);
        let st = &mut *guard;
        let mut hit = false;
        for letter in st.live.iter_mut().chain(st.paged.iter_mut()) {
            if letter.id == letter_id && letter.likes != likes {
                letter.likes = likes;
                hit = true;
            }
        }
        drop(guard);
        if hit {
            emit(&self.events, LIKE_ADJUSTED, Some(letter_id.to_string()), None);
        }
    }
}

/// Clears `loading_more` if a `load_more` future is dropped mid-fetch.
struct InFlightGuard {
    state: Arc<Mutex<FeedState>>,
    token: CancellationToken,
    armed: bool,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut st = lock_state(&self.state);
        if !self.token.is_cancelled() {
            st.loading_more = false;
        }
    }
}

async fn pump(
    mut sub: LiveSubscription,
    token: CancellationToken,
    state: Arc<Mutex<FeedState>>,
    events: broadcast::Sender<FeedEvent>,
    page_size: u32,
) {
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            next = sub.next() => match next {
                Some(Ok(items)) => apply_snapshot(&state, &events, &token, items, page_size),
                Some(Err(e)) => {
                    fail_subscription(&state, &events, &token, format!("{e:#}"));
                    break;
                }
                None => {
                    let message = "live subscription terminated by the store".to_string();
                    fail_subscription(&state, &events, &token, message);
                    break;
                }
            }
        }
    }
    debug!("feed pump stopped");
}

fn apply_snapshot(
    state: &Mutex<FeedState>,
    events: &broadcast::Sender<FeedEvent>,
    token: &CancellationToken,
    mut items: Vec<Letter>,
    page_size: u32,
) {
    let mut st = lock_state(state);
    if token.is_cancelled() {
        return;
    }
    let Some(spec) = st.spec.clone() else { return };
    let first = st.phase == FeedPhase::Subscribing;
    // Cursor and has_more follow the live page until the pager took over.
    if st.paged.is_empty() {
        st.cursor = items.last().map(|l| spec.cursor_for(l));
        st.has_more = items.len() as u32 == page_size;
    }
    items.retain(|l| spec.matches(l));
    st.live = items;
    st.phase = FeedPhase::Live;
    st.last_error = None;
    let count = st.live.len();
    drop(st);

    if first {
        info!(spec = %spec.key(), count, "live feed ready");
    } else {
        debug!(spec = %spec.key(), count, "live snapshot applied");
    }
    emit(events, WINDOW_REPLACED, None, Some(count.to_string()));
}

fn fail_subscription(
    state: &Mutex<FeedState>,
    events: &broadcast::Sender<FeedEvent>,
    token: &CancellationToken,
    message: String,
) {
    let mut st = lock_state(state);
    if token.is_cancelled() {
        return;
    }
    st.reset();
    st.last_error = Some(message.clone());
    drop(st);
    warn!("live feed failed: {message}");
    emit(events, LOAD_FAILED, None, Some(message));
}
