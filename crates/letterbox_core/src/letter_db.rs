/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::query::{Cursor, Direction, OrderField, QuerySpec};
use anyhow::{Context, Result};
use letterbox_protocol::{LikeAction, LikeReceipt, Letter, TrackRef};
use rusqlite::{params, types::Value, Connection, OptionalExtension, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::time::Duration;

const LETTER_COLUMNS: &str =
    "id, name, member, message, created_at_ms, color_class, likes, track_json";

/// Letter documents plus their liker sets, in one SQLite file.
#[derive(Clone)]
pub struct LetterDb {
    path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct CollectionPage<T> {
    pub items: Vec<T>,
    pub next: Option<Cursor>,
}

impl LetterDb {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let path = db_path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create data dir: {}", parent.display()))?;
        }
        let conn = Connection::open(&path).with_context(|| format!("open db: {}", path.display()))?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            CREATE TABLE IF NOT EXISTS letters (
              id TEXT PRIMARY KEY,
              name TEXT NOT NULL,
              member TEXT NOT NULL,
              message TEXT NOT NULL,
              created_at_ms INTEGER NOT NULL,
              color_class TEXT NOT NULL,
              likes INTEGER NOT NULL DEFAULT 0 CHECK (likes >= 0),
              track_json TEXT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_letters_created ON letters(created_at_ms DESC, id DESC);
            CREATE INDEX IF NOT EXISTS idx_letters_member_created
                ON letters(member, created_at_ms DESC, id DESC);
            CREATE INDEX IF NOT EXISTS idx_letters_likes
                ON letters(likes DESC, created_at_ms DESC, id DESC);

            CREATE TABLE IF NOT EXISTS letter_likers (
              letter_id TEXT NOT NULL,
              viewer_id TEXT NOT NULL,
              created_at_ms INTEGER NOT NULL,
              PRIMARY KEY (letter_id, viewer_id)
            );
            "#,
        )?;
        Ok(Self { path })
    }

    fn conn(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(conn)
    }

    pub fn health_check(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }

    pub fn insert_letter(&self, letter: &Letter) -> Result<()> {
        let track_json = match &letter.track {
            Some(t) => Some(serde_json::to_string(t).context("serialize track")?),
            None => None,
        };
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO letters(
                id, name, member, message, created_at_ms, color_class, likes, track_json
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                letter.id,
                letter.name,
                letter.member,
                letter.message,
                letter.created_at_ms,
                letter.color_class,
                letter.likes as i64,
                track_json
            ],
        )
        .with_context(|| format!("insert letter {}", letter.id))?;
        Ok(())
    }

    pub fn get_letter(&self, id: &str) -> Result<Option<Letter>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {LETTER_COLUMNS} FROM letters WHERE id=?1");
        conn.query_row(&sql, params![id], letter_from_row)
            .optional()
            .map_err(Into::into)
    }

    /// Ordered range read: up to `limit` letters matching `spec`, strictly
    /// after `after` when given.
    pub fn list_letters(
        &self,
        spec: &QuerySpec,
        after: Option<&Cursor>,
        limit: u32,
    ) -> Result<CollectionPage<Letter>> {
        if let Some(c) = after {
            anyhow::ensure!(
                c.belongs_to(spec),
                "cursor for {} used with {}",
                c.spec_key,
                spec.key()
            );
        }
        let limit = limit.min(200).max(1);
        let conn = self.conn()?;

        let (sql, params_vec) = page_sql(spec, after, limit);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(params_vec), letter_from_row)?;
        let items = rows.collect::<rusqlite::Result<Vec<_>>>()?;

        let next = if items.len() as u32 == limit {
            items.last().map(|l| spec.cursor_for(l))
        } else {
            None
        };
        Ok(CollectionPage { items, next })
    }

    /// Applies the like delta and the liker-set change in one transaction.
    /// The counter only moves when membership actually changed, so
    /// `likes == |likers|` after every commit. `None` when the letter is unknown.
    pub fn apply_like(
        &self,
        letter_id: &str,
        viewer_id: &str,
        action: LikeAction,
    ) -> Result<Option<LikeReceipt>> {
        let viewer_id = viewer_id.trim();
        anyhow::ensure!(!viewer_id.is_empty(), "empty viewer id");

        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let exists: Option<i64> = tx
            .query_row("SELECT likes FROM letters WHERE id=?1", params![letter_id], |r| r.get(0))
            .optional()?;
        if exists.is_none() {
            return Ok(None);
        }

        let changed = match action {
            LikeAction::Like => tx.execute(
                "INSERT OR IGNORE INTO letter_likers(letter_id, viewer_id, created_at_ms) \
                 VALUES (?1, ?2, ?3)",
                params![letter_id, viewer_id, crate::events::now_ms()],
            )?,
            LikeAction::Unlike => tx.execute(
                "DELETE FROM letter_likers WHERE letter_id=?1 AND viewer_id=?2",
                params![letter_id, viewer_id],
            )?,
        } == 1;

        if changed {
            tx.execute(
                "UPDATE letters SET likes = MAX(likes + ?2, 0) WHERE id=?1",
                params![letter_id, action.delta()],
            )?;
        }

        let likes: i64 = tx.query_row(
            "SELECT likes FROM letters WHERE id=?1",
            params![letter_id],
            |r| r.get(0),
        )?;
        tx.commit()?;

        Ok(Some(LikeReceipt {
            letter_id: letter_id.to_string(),
            liked: matches!(action, LikeAction::Like),
            likes: likes.max(0) as u64,
            changed,
        }))
    }

    pub fn is_liker(&self, letter_id: &str, viewer_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let hit: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM letter_likers WHERE letter_id=?1 AND viewer_id=?2",
                params![letter_id, viewer_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(hit.is_some())
    }

    pub fn count_likers(&self, letter_id: &str) -> Result<u64> {
        let conn = self.conn()?;
        let n: u64 = conn.query_row(
            "SELECT COUNT(*) FROM letter_likers WHERE letter_id=?1",
            params![letter_id],
            |r| r.get(0),
        )?;
        Ok(n)
    }
}

fn letter_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Letter> {
    let track_json: Option<String> = r.get(7)?;
    let likes: i64 = r.get(6)?;
    Ok(Letter {
        id: r.get(0)?,
        name: r.get(1)?,
        member: r.get(2)?,
        message: r.get(3)?,
        created_at_ms: r.get(4)?,
        color_class: r.get(5)?,
        likes: likes.max(0) as u64,
        // Tolerate legacy rows with a malformed track.
        track: track_json.and_then(|s| serde_json::from_str::<TrackRef>(&s).ok()),
    })
}

fn cursor_value(field: OrderField, cursor: &Cursor) -> Value {
    match field {
        OrderField::Likes => Value::Integer(cursor.likes as i64),
        OrderField::CreatedAt => Value::Integer(cursor.created_at_ms),
        OrderField::Id => Value::Text(cursor.letter_id.clone()),
    }
}

/// `k1 > c1 OR (k1 = c1 AND k2 > c2) OR ...`, with `<` for descending keys.
fn page_sql(spec: &QuerySpec, after: Option<&Cursor>, limit: u32) -> (String, Vec<Value>) {
    let keys = spec.full_order();
    let mut conds = Vec::<String>::new();
    let mut params_vec = Vec::<Value>::new();

    if let Some(m) = spec.member_eq() {
        conds.push("member = ?".to_string());
        params_vec.push(Value::Text(m.to_string()));
    }

    if let Some(cursor) = after {
        let mut alternatives = Vec::with_capacity(keys.len());
        for (i, key) in keys.iter().enumerate() {
            let mut parts = Vec::with_capacity(i + 1);
            for prev in &keys[..i] {
                parts.push(format!("{} = ?", prev.field.column()));
                params_vec.push(cursor_value(prev.field, cursor));
            }
            let op = match key.dir {
                Direction::Asc => ">",
                Direction::Desc => "<",
            };
            parts.push(format!("{} {op} ?", key.field.column()));
            params_vec.push(cursor_value(key.field, cursor));
            alternatives.push(format!("({})", parts.join(" AND ")));
        }
        conds.push(format!("({})", alternatives.join(" OR ")));
    }

    let where_sql = if conds.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conds.join(" AND "))
    };
    let order_sql = keys
        .iter()
        .map(|k| format!("{} {}", k.field.column(), k.dir.sql()))
        .collect::<Vec<_>>()
        .join(", ");
    params_vec.push(Value::Integer(limit as i64));
    (
        format!("SELECT {LETTER_COLUMNS} FROM letters{where_sql} ORDER BY {order_sql} LIMIT ?"),
        params_vec,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::build_query;
    use letterbox_protocol::{Filter, SortOrder};
    use tempfile::TempDir;

    fn letter(id: &str, member: &str, ts: i64, likes: u64) -> Letter {
        Letter {
            id: id.to_string(),
            name: "army".to_string(),
            member: member.to_string(),
            message: "purple you".to_string(),
            created_at_ms: ts,
            color_class: "card-2".to_string(),
            likes,
            track: None,
        }
    }

    fn seeded() -> (TempDir, LetterDb) {
        let dir = TempDir::new().unwrap();
        let db = LetterDb::open(dir.path().join("letters.db")).unwrap();
        for i in 0..30i64 {
            let member = if i % 3 == 0 { "Jin" } else { "RM" };
            db.insert_letter(&letter(&format!("l{i:02}"), member, 1_000 + i, (i % 4) as u64))
                .unwrap();
        }
        (dir, db)
    }

    fn ids(items: &[Letter]) -> Vec<String> {
        items.iter().map(|l| l.id.clone()).collect()
    }

    #[test]
    fn newest_pages_cover_everything_once() {
        let (_dir, db) = seeded();
        let spec = build_query(&Filter::All, SortOrder::Newest);
        let first = db.list_letters(&spec, None, 12).unwrap();
        assert_eq!(first.items.len(), 12);
        assert_eq!(first.items[0].id, "l29");

        let second = db.list_letters(&spec, first.next.as_ref(), 12).unwrap();
        let third = db.list_letters(&spec, second.next.as_ref(), 12).unwrap();
        assert_eq!(third.items.len(), 6);
        assert!(third.next.is_none());

        let mut all = ids(&first.items);
        all.extend(ids(&second.items));
        all.extend(ids(&third.items));
        let mut expected: Vec<String> = (0..30).rev().map(|i| format!("l{i:02}")).collect();
        assert_eq!(all, expected);
        expected.dedup();
        assert_eq!(expected.len(), 30);
    }

    #[test]
    fn most_loved_pagination_handles_equal_likes() {
        let (_dir, db) = seeded();
        let spec = build_query(&Filter::All, SortOrder::MostLoved);
        let mut seen = Vec::new();
        let mut cursor = None;
        loop {
            let page = db.list_letters(&spec, cursor.as_ref(), 7).unwrap();
            seen.extend(page.items.clone());
            match page.next {
                Some(c) => cursor = Some(c),
                None => break,
            }
        }
        assert_eq!(seen.len(), 30);
        for pair in seen.windows(2) {
            assert_eq!(spec.compare(&pair[0], &pair[1]), std::cmp::Ordering::Less);
        }
    }

    #[test]
    fn member_filter_and_oldest_order() {
        let (_dir, db) = seeded();
        let spec = build_query(&Filter::Member("Jin".into()), SortOrder::Oldest);
        let page = db.list_letters(&spec, None, 50).unwrap();
        assert_eq!(page.items.len(), 10);
        assert!(page.items.iter().all(|l| l.member == "Jin"));
        assert_eq!(page.items.first().unwrap().id, "l00");
        assert_eq!(page.items.last().unwrap().id, "l27");
    }

    #[test]
    fn cursor_from_another_spec_is_rejected() {
        let (_dir, db) = seeded();
        let newest = build_query(&Filter::All, SortOrder::Newest);
        let page = db.list_letters(&newest, None, 5).unwrap();
        let oldest = build_query(&Filter::All, SortOrder::Oldest);
        assert!(db.list_letters(&oldest, page.next.as_ref(), 5).is_err());
    }

    #[test]
    fn like_mutation_keeps_count_equal_to_likers() {
        let dir = TempDir::new().unwrap();
        let db = LetterDb::open(dir.path().join("letters.db")).unwrap();
        db.insert_letter(&letter("x", "V", 1, 0)).unwrap();

        let r = db.apply_like("x", "viewer-a", LikeAction::Like).unwrap().unwrap();
        assert!(r.changed);
        assert_eq!(r.likes, 1);

        // Second like from the same viewer is a no-op.
        let r = db.apply_like("x", "viewer-a", LikeAction::Like).unwrap().unwrap();
        assert!(!r.changed);
        assert_eq!(r.likes, 1);

        db.apply_like("x", "viewer-b", LikeAction::Like).unwrap();
        assert_eq!(db.get_letter("x").unwrap().unwrap().likes, 2);
        assert_eq!(db.count_likers("x").unwrap(), 2);

        let r = db.apply_like("x", "viewer-c", LikeAction::Unlike).unwrap().unwrap();
        assert!(!r.changed);
        assert_eq!(r.likes, 2);

        db.apply_like("x", "viewer-a", LikeAction::Unlike).unwrap();
        assert!(!db.is_liker("x", "viewer-a").unwrap());
        assert!(db.is_liker("x", "viewer-b").unwrap());
        assert_eq!(db.get_letter("x").unwrap().unwrap().likes, 1);
    }

    #[test]
    fn like_on_unknown_letter_is_none() {
        let dir = TempDir::new().unwrap();
        let db = LetterDb::open(dir.path().join("letters.db")).unwrap();
        assert!(db.apply_like("ghost", "v", LikeAction::Like).unwrap().is_none());
        assert_eq!(db.count_likers("ghost").unwrap(), 0);
    }

    #[test]
    fn track_round_trips_through_storage() {
        let dir = TempDir::new().unwrap();
        let db = LetterDb::open(dir.path().join("letters.db")).unwrap();
        let mut l = letter("t", "Jungkook", 9, 0);
        l.track = Some(TrackRef {
            id: "trk".into(),
            name: "Euphoria".into(),
            artist: "BTS".into(),
            album_cover: "https://img.example/cover.jpg".into(),
        });
        db.insert_letter(&l).unwrap();
        assert_eq!(db.get_letter("t").unwrap(), Some(l));
        assert!(db.get_letter("missing").unwrap().is_none());
    }
}
