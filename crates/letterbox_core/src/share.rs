/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use letterbox_protocol::Letter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SharePlatform {
    WhatsApp,
    Telegram,
    Facebook,
    Twitter,
    Copy,
}

impl SharePlatform {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "whatsapp" => Some(Self::WhatsApp),
            "telegram" => Some(Self::Telegram),
            "facebook" => Some(Self::Facebook),
            "twitter" | "x" => Some(Self::Twitter),
            "copy" => Some(Self::Copy),
            _ => None,
        }
    }
}

/// Public permalink of a letter.
pub fn letter_url(base_url: &str, letter_id: &str) -> String {
    format!(
        "{}/letter/{}",
        base_url.trim_end_matches('/'),
        urlencoding::encode(letter_id)
    )
}

pub fn share_text(letter: &Letter) -> String {
    format!(
        "Read this heartfelt letter to {} from a fellow ARMY! 💜",
        letter.member
    )
}

/// Link that opens `platform`'s share dialog for `letter`. `Copy` yields the
/// permalink itself.
pub fn share_url(platform: SharePlatform, base_url: &str, letter: &Letter) -> String {
    let url = letter_url(base_url, &letter.id);
    let text = share_text(letter);
    match platform {
        SharePlatform::WhatsApp => format!(
            "https://wa.me/?text={}",
            urlencoding::encode(&format!("{text} {url}"))
        ),
        SharePlatform::Telegram => format!(
            "https://t.me/share/url?url={}&text={}",
            urlencoding::encode(&url),
            urlencoding::encode(&text)
        ),
        SharePlatform::Facebook => format!(
            "https://www.facebook.com/sharer/sharer.php?u={}",
            urlencoding::encode(&url)
        ),
        SharePlatform::Twitter => format!(
            "https://twitter.com/intent/tweet?text={}&url={}",
            urlencoding::encode(&text),
            urlencoding::encode(&url)
        ),
        SharePlatform::Copy => url,
    }
}
