/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use letterbox_core::config::{default_config_path, load_config};
use letterbox_core::http_api::{router, ApiState};
use letterbox_core::letter_db::LetterDb;
use letterbox_core::store::LocalDocStore;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("info".parse().context("parse log directive")?),
        )
        .init();

    let config_path = match std::env::args().nth(1) {
        Some(p) if !p.trim().is_empty() => PathBuf::from(p),
        _ => default_config_path()?,
    };
    let cfg = load_config(&config_path)?;
    let db_path = cfg.store_db_path()?;
    info!(
        version = letterbox_core::letterbox_core_version(),
        config = %config_path.display(),
        db = %db_path.display(),
        "starting letterbox service"
    );

    let db = Arc::new(LetterDb::open(&db_path)?);
    db.health_check().context("letter db health check")?;
    let store = Arc::new(LocalDocStore::new(db, cfg.members(), cfg.event_capacity()));
    let app = router(ApiState {
        store,
        page_size: cfg.page_size(),
        public_base_url: cfg.public_base_url(),
    });

    let bind = cfg.bind();
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("bind {bind}"))?;
    info!(%bind, "listening");

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("ctrl_c handler failed: {e}");
        }
        info!("shutdown requested");
    };
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await
        .context("serve")?;
    info!("letterbox service stopped");
    Ok(())
}
