/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use letterbox_core::client_kv::ClientKv;
use letterbox_core::config::{default_config_path, load_config};
use letterbox_core::events::WINDOW_REPLACED;
use letterbox_core::feed::{FeedCoordinator, FeedView};
use letterbox_core::identity::ViewerIdentityStore;
use letterbox_core::ledger::LikeLedger;
use letterbox_core::letter_db::LetterDb;
use letterbox_core::likes::LikeCoordinator;
use letterbox_core::share::{share_url, SharePlatform};
use letterbox_core::store::{compose_letter, LocalDocStore};
use letterbox_protocol::{Filter, NewLetter, SortOrder};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

fn print_view(label: &str, view: &FeedView) {
    println!(
        "{label}: {} letters, has_more={}, phase={:?}",
        view.items.len(),
        view.has_more,
        view.phase
    );
    for l in &view.items {
        println!("  {} [{}] {:>3}♥ {}: {}", l.id, l.member, l.likes, l.name, l.message);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("info".parse().context("parse log directive")?),
        )
        .init();

    let cfg = load_config(default_config_path()?)?;
    let filter = Filter::parse(&std::env::var("LETTERBOX_FILTER").unwrap_or_default());
    let sort = SortOrder::parse(&std::env::var("LETTERBOX_SORT").unwrap_or_default())
        .context("LETTERBOX_SORT must be newest, oldest or mostLoved")?;
    let seed: usize = std::env::var("LETTERBOX_SEED")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(30);

    let db = Arc::new(LetterDb::open(cfg.store_db_path()?)?);
    let store = Arc::new(LocalDocStore::new(db, cfg.members(), cfg.event_capacity()));
    let members = cfg.members();
    for i in 0..seed {
        compose_letter(
            store.as_ref(),
            NewLetter {
                name: format!("army #{i}"),
                member: members[i % members.len()].clone(),
                message: format!("dev letter {i}"),
                track: None,
            },
        )
        .await?;
    }
    info!(seed, "seeded letters");

    let feed = Arc::new(FeedCoordinator::new(
        store.clone(),
        cfg.page_size(),
        cfg.event_capacity(),
    ));
    let kv = ClientKv::open(cfg.client_db_path()?)?;
    let likes = LikeCoordinator::new(
        store.clone(),
        Arc::new(ViewerIdentityStore::new(kv.clone())),
        Arc::new(LikeLedger::load(kv)?),
    )
    .with_view(feed.clone());

    let mut events = feed.events();
    feed.set_spec(filter, sort).await?;
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Ok(ev) = events.recv().await {
            if ev.kind == WINDOW_REPLACED {
                break;
            }
        }
    })
    .await
    .context("no snapshot within 5s")?;
    print_view("first page", &feed.view());

    let appended = feed.load_more().await?;
    println!("load_more appended {appended}");
    print_view("after load_more", &feed.view());

    let Some(first) = feed.view().items.first().cloned() else {
        println!("feed is empty");
        return Ok(());
    };
    let was_liked = likes.is_liked(&first.id);
    let outcome = likes.toggle_like(&first.id).await?;
    println!(
        "toggled like on {}: liked {} -> {}, likes now {} (ledger saved: {})",
        first.id, was_liked, outcome.receipt.liked, outcome.receipt.likes, outcome.ledger_persisted
    );
    for platform in [SharePlatform::WhatsApp, SharePlatform::Twitter, SharePlatform::Copy] {
        println!("{platform:?}: {}", share_url(platform, &cfg.public_base_url(), &first));
    }

    feed.close();
    Ok(())
}
