/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use thiserror::Error;

/// Failures surfaced by the feed and like coordinators. None of them is fatal:
/// each one leaves unrelated feed state untouched.
#[derive(Error, Debug)]
pub enum FeedError {
    /// Live stream failed to open or was terminated by the store.
    #[error("live subscription failed: {0:#}")]
    Subscription(anyhow::Error),

    /// A `load_more` fetch failed; the window is unchanged.
    #[error("page fetch failed: {0:#}")]
    PageFetch(anyhow::Error),

    /// A like toggle failed remotely; the optimistic state was reverted.
    #[error("like mutation failed for {letter_id}: {cause:#}")]
    Mutation {
        letter_id: String,
        cause: anyhow::Error,
    },

    #[error("a like toggle is already pending for {0}")]
    LikeInFlight(String),

    #[error("invalid letter: {0}")]
    InvalidLetter(String),

    #[error("letter not found: {0}")]
    NotFound(String),

    #[error("storage error: {0:#}")]
    Storage(anyhow::Error),
}

pub type FeedResult<T> = std::result::Result<T, FeedError>;
