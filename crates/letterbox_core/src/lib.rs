/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

pub mod client_kv;
pub mod config;
pub mod error;
pub mod events;
pub mod feed;
pub mod http_api;
pub mod identity;
pub mod ledger;
pub mod letter_db;
pub mod letters;
pub mod likes;
pub mod query;
pub mod share;
pub mod store;

pub fn letterbox_core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
