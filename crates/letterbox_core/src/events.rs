/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use serde::Serialize;

pub const WINDOW_RESET: &str = "window_reset";
pub const WINDOW_REPLACED: &str = "window_replaced";
pub const PAGE_APPENDED: &str = "page_appended";
pub const PAGE_FAILED: &str = "page_failed";
pub const LOAD_FAILED: &str = "load_failed";
pub const LIKE_ADJUSTED: &str = "like_adjusted";

pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Progress of the feed window, published for whoever renders it.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedEvent {
    pub kind: String,
    pub ts_ms: i64,
    pub letter_id: Option<String>,
    pub detail: Option<String>,
}

impl FeedEvent {
    pub fn new(kind: &str, letter_id: Option<String>, detail: Option<String>) -> Self {
        Self {
            kind: kind.to_string(),
            ts_ms: now_ms(),
            letter_id,
            detail,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    LikesChanged,
}

/// Committed write in the letter store; wakes live subscriptions.
#[derive(Clone, Debug)]
pub struct StoreChange {
    pub kind: ChangeKind,
    pub letter_id: String,
    /// Member of an added letter.
    pub member: Option<String>,
}
