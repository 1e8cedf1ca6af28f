/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use letterbox_protocol::{Letter, NewLetter};
use rand::{distributions::Alphanumeric, seq::SliceRandom, thread_rng, Rng};
use thiserror::Error;

pub const COLOR_CLASSES: [&str; 6] = ["card-1", "card-2", "card-3", "card-4", "card-5", "card-6"];
pub const MAX_NAME_CHARS: usize = 80;
pub const MAX_MESSAGE_CHARS: usize = 2000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct InvalidLetter(pub String);

/// Trimmed copy of `new`, or the first rule it breaks.
pub fn validate_new_letter(
    members: &[String],
    new: &NewLetter,
) -> Result<NewLetter, InvalidLetter> {
    let name = new.name.trim();
    let message = new.message.trim();
    let member = new.member.trim();
    if name.is_empty() {
        return Err(InvalidLetter("name is required".to_string()));
    }
    if name.chars().count() > MAX_NAME_CHARS {
        return Err(InvalidLetter(format!("name exceeds {MAX_NAME_CHARS} characters")));
    }
    if message.is_empty() {
        return Err(InvalidLetter("message is required".to_string()));
    }
    if message.chars().count() > MAX_MESSAGE_CHARS {
        return Err(InvalidLetter(format!("message exceeds {MAX_MESSAGE_CHARS} characters")));
    }
    if !members.iter().any(|m| m == member) {
        return Err(InvalidLetter(format!("unknown member: {member}")));
    }
    Ok(NewLetter {
        name: name.to_string(),
        member: member.to_string(),
        message: message.to_string(),
        track: new.track.clone(),
    })
}

pub fn new_letter_id() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(20)
        .map(char::from)
        .collect()
}

pub fn pick_color_class() -> &'static str {
    COLOR_CLASSES.choose(&mut thread_rng()).copied().unwrap_or(COLOR_CLASSES[0])
}

/// Store-assigned fields: id, timestamp, color tag, zero likes.
pub fn materialize(new: NewLetter, created_at_ms: i64) -> Letter {
    Letter {
        id: new_letter_id(),
        name: new.name,
        member: new.member,
        message: new.message,
        created_at_ms,
        color_class: pick_color_class().to_string(),
        likes: 0,
        track: new.track,
    }
}
