/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use serde::{Deserialize, Serialize};
use std::fmt;

/// Track picked by the author when composing a letter. Opaque to the feed.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TrackRef {
    pub id: String,
    pub name: String,
    pub artist: String,
    pub album_cover: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Letter {
    pub id: String,
    pub name: String,
    pub member: String,
    pub message: String,
    pub created_at_ms: i64,
    pub color_class: String,
    #[serde(default)]
    pub likes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track: Option<TrackRef>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewLetter {
    pub name: String,
    pub member: String,
    pub message: String,
    #[serde(default)]
    pub track: Option<TrackRef>,
}

/// `all` (or empty) selects every member, anything else one member.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Filter {
    #[default]
    All,
    Member(String),
}

impl Filter {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() || raw.eq_ignore_ascii_case("all") {
            Filter::All
        } else {
            Filter::Member(raw.to_string())
        }
    }

    pub fn member(&self) -> Option<&str> {
        match self {
            Filter::All => None,
            Filter::Member(m) => Some(m),
        }
    }
}

impl From<String> for Filter {
    fn from(value: String) -> Self {
        Filter::parse(&value)
    }
}

impl From<Filter> for String {
    fn from(value: Filter) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::All => f.write_str("all"),
            Filter::Member(m) => f.write_str(m),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortOrder {
    #[default]
    Newest,
    Oldest,
    MostLoved,
}

impl SortOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            SortOrder::Newest => "newest",
            SortOrder::Oldest => "oldest",
            SortOrder::MostLoved => "mostLoved",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "" | "newest" => Some(SortOrder::Newest),
            "oldest" => Some(SortOrder::Oldest),
            "mostLoved" | "most_loved" => Some(SortOrder::MostLoved),
            _ => None,
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LikeAction {
    Like,
    Unlike,
}

impl LikeAction {
    pub fn delta(self) -> i64 {
        match self {
            LikeAction::Like => 1,
            LikeAction::Unlike => -1,
        }
    }

    pub fn for_toggle(was_liked: bool) -> Self {
        if was_liked {
            LikeAction::Unlike
        } else {
            LikeAction::Like
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeRequest {
    pub viewer_id: String,
    pub action: LikeAction,
}

/// Server state of one letter right after a like mutation committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeReceipt {
    pub letter_id: String,
    pub liked: bool,
    pub likes: u64,
    pub changed: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedQuery {
    #[serde(default)]
    pub filter: Filter,
    #[serde(default)]
    pub sort: SortOrder,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LetterPage {
    pub items: Vec<Letter>,
    pub next: Option<String>,
}
