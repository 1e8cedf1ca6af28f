/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use letterbox_protocol::{Filter, Letter, SortOrder};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderField {
    Likes,
    CreatedAt,
    Id,
}

impl OrderField {
    pub fn column(self) -> &'static str {
        match self {
            OrderField::Likes => "likes",
            OrderField::CreatedAt => "created_at_ms",
            OrderField::Id => "id",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn sql(self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderKey {
    pub field: OrderField,
    pub dir: Direction,
}

impl OrderKey {
    const fn new(field: OrderField, dir: Direction) -> Self {
        Self { field, dir }
    }
}

/// Ordering plus optional member predicate for one (filter, sort) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySpec {
    pub filter: Filter,
    pub sort: SortOrder,
    pub order: Vec<OrderKey>,
}

pub fn build_query(filter: &Filter, sort: SortOrder) -> QuerySpec {
    let order = match sort {
        SortOrder::Newest => vec![OrderKey::new(OrderField::CreatedAt, Direction::Desc)],
        SortOrder::Oldest => vec![OrderKey::new(OrderField::CreatedAt, Direction::Asc)],
        SortOrder::MostLoved => vec![
            OrderKey::new(OrderField::Likes, Direction::Desc),
            OrderKey::new(OrderField::CreatedAt, Direction::Desc),
        ],
    };
    QuerySpec {
        filter: filter.clone(),
        sort,
        order,
    }
}

impl QuerySpec {
    /// Equality predicate on the member column, if any.
    pub fn member_eq(&self) -> Option<&str> {
        self.filter.member()
    }

    /// Explicit keys completed with `id` in the direction of the last key,
    /// so that the order is total.
    pub fn full_order(&self) -> Vec<OrderKey> {
        let mut keys = self.order.clone();
        let dir = keys.last().map(|k| k.dir).unwrap_or(Direction::Asc);
        keys.push(OrderKey::new(OrderField::Id, dir));
        keys
    }

    /// Identifies the (filter, sort) pair a cursor was produced for.
    pub fn key(&self) -> String {
        format!("{}|{}", self.filter, self.sort)
    }

    pub fn matches(&self, letter: &Letter) -> bool {
        match self.member_eq() {
            Some(m) => letter.member == m,
            None => true,
        }
    }

    pub fn compare(&self, a: &Letter, b: &Letter) -> Ordering {
        for key in self.full_order() {
            let ord = match key.field {
                OrderField::Likes => a.likes.cmp(&b.likes),
                OrderField::CreatedAt => a.created_at_ms.cmp(&b.created_at_ms),
                OrderField::Id => a.id.cmp(&b.id),
            };
            let ord = match key.dir {
                Direction::Asc => ord,
                Direction::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    pub fn cursor_for(&self, letter: &Letter) -> Cursor {
        Cursor {
            spec_key: self.key(),
            letter_id: letter.id.clone(),
            created_at_ms: letter.created_at_ms,
            likes: letter.likes,
        }
    }
}

/// Position right after the last letter of a fetched page. Only valid for the
/// spec it was produced for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub spec_key: String,
    pub letter_id: String,
    pub created_at_ms: i64,
    pub likes: u64,
}

impl Cursor {
    pub fn belongs_to(&self, spec: &QuerySpec) -> bool {
        self.spec_key == spec.key()
    }

    /// True when `letter` sorts strictly after this cursor under `spec`.
    pub fn precedes(&self, spec: &QuerySpec, letter: &Letter) -> bool {
        let anchor = Letter {
            id: self.letter_id.clone(),
            name: String::new(),
            member: String::new(),
            message: String::new(),
            created_at_ms: self.created_at_ms,
            color_class: String::new(),
            likes: self.likes,
            track: None,
        };
        spec.compare(&anchor, letter) == Ordering::Less
    }

    pub fn encode(&self) -> String {
        hex::encode(serde_json::to_vec(self).unwrap_or_default())
    }

    pub fn decode(raw: &str) -> Result<Self> {
        let bytes = hex::decode(raw.trim()).context("cursor is not hex")?;
        serde_json::from_slice(&bytes).context("malformed cursor")
    }
}
