/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

pub const DEFAULT_MEMBERS: [&str; 8] =
    ["BTS", "RM", "Jin", "Suga", "J-Hope", "Jimin", "V", "Jungkook"];
pub const DEFAULT_PAGE_SIZE: u32 = 12;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct FeedConfig {
    pub data_dir: Option<String>,
    pub bind: Option<String>,
    /// Letters per live window and per `load_more` page.
    pub page_size: Option<u32>,
    /// Members a letter can be addressed to (the filter categories).
    pub members: Option<Vec<String>>,
    /// Capacity of the store change and feed event channels.
    pub event_capacity: Option<usize>,
    /// Base used when building share links.
    pub public_base_url: Option<String>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            bind: Some("127.0.0.1:8790".to_string()),
            page_size: Some(DEFAULT_PAGE_SIZE),
            members: Some(DEFAULT_MEMBERS.iter().map(|m| m.to_string()).collect()),
            event_capacity: Some(256),
            public_base_url: Some("http://127.0.0.1:8790".to_string()),
        }
    }
}

impl FeedConfig {
    pub fn page_size(&self) -> u32 {
        self.page_size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, 200)
    }

    pub fn members(&self) -> Vec<String> {
        let members = self
            .members
            .as_ref()
            .map(|list| {
                list.iter()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        if members.is_empty() {
            DEFAULT_MEMBERS.iter().map(|m| m.to_string()).collect()
        } else {
            members
        }
    }

    pub fn event_capacity(&self) -> usize {
        self.event_capacity.unwrap_or(256).clamp(16, 16_384)
    }

    pub fn bind(&self) -> String {
        self.bind
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or("127.0.0.1:8790")
            .to_string()
    }

    pub fn public_base_url(&self) -> String {
        self.public_base_url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("http://{}", self.bind()))
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        match self.data_dir.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(dir) => Ok(PathBuf::from(dir)),
            None => default_data_dir(),
        }
    }

    pub fn store_db_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join("letters.db"))
    }

    pub fn client_db_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join("client.db"))
    }
}

pub fn default_data_dir() -> Result<PathBuf> {
    if let Ok(v) = std::env::var("LETTERBOX_DATA_DIR") {
        return Ok(PathBuf::from(v));
    }
    let proj = ProjectDirs::from("net", "letterbox", "Letterbox")
        .context("unable to determine platform data dir")?;
    Ok(proj.data_local_dir().to_path_buf())
}

/// Reads `path` if it exists, falling back to defaults otherwise.
pub fn load_config(path: impl AsRef<Path>) -> Result<FeedConfig> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(FeedConfig::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read config: {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse config: {}", path.display()))
}

pub fn default_config_path() -> Result<PathBuf> {
    if let Ok(v) = std::env::var("LETTERBOX_CONFIG") {
        return Ok(PathBuf::from(v));
    }
    Ok(default_data_dir()?.join("config.json"))
}
