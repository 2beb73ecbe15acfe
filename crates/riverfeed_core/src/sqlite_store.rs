/*
 * SPDX-FileCopyrightText: 2026 Riverfeed Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! SQLite persistence for the social graph and the post archive.
//!
//! One database file holds both store halves; `SqliteStore` implements
//! `FeedStore` and `PostStore` over it. Connections are opened per call,
//! which keeps the handle `Clone + Send + Sync` without pooling.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::ids::{CommentId, FeedId, PostId};
use crate::store::{
    CommentRecord, CommentRow, FeedRecord, FeedRecordKind, FeedStore, PostRecord, PostStore,
};

#[derive(Clone)]
pub struct SqliteStore {
    path: PathBuf,
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)
            .with_context(|| format!("open db: {}", path.display()))?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;

            -- identity graph
            CREATE TABLE IF NOT EXISTS feeds (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                kind            TEXT NOT NULL,
                user_name       TEXT NOT NULL UNIQUE,
                screen_name     TEXT NOT NULL,
                profile         TEXT NOT NULL DEFAULT '',
                is_private      INTEGER NOT NULL DEFAULT 0,
                email           TEXT,
                hashed_password TEXT
            );
            CREATE TABLE IF NOT EXISTS subscriptions (
                subscriber_id INTEGER NOT NULL,
                target_id     INTEGER NOT NULL,
                created_at_ms INTEGER NOT NULL,
                PRIMARY KEY (subscriber_id, target_id)
            );
            CREATE INDEX IF NOT EXISTS idx_subscriptions_target
                ON subscriptions(target_id);
            CREATE TABLE IF NOT EXISTS blocks (
                blocker_id INTEGER NOT NULL,
                target_id  INTEGER NOT NULL,
                PRIMARY KEY (blocker_id, target_id)
            );
            CREATE TABLE IF NOT EXISTS group_admins (
                group_id INTEGER NOT NULL,
                admin_id INTEGER NOT NULL,
                PRIMARY KEY (group_id, admin_id)
            );
            CREATE TABLE IF NOT EXISTS subscription_requests (
                from_user_id INTEGER NOT NULL,
                target_id    INTEGER NOT NULL,
                PRIMARY KEY (from_user_id, target_id)
            );

            -- post archive; to_feeds is a JSON array of feed ids
            CREATE TABLE IF NOT EXISTS posts (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                author_id     INTEGER NOT NULL,
                created_at_ms INTEGER NOT NULL,
                updated_at_ms INTEGER NOT NULL,
                to_feeds      TEXT NOT NULL,
                body          TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_posts_author
                ON posts(author_id, created_at_ms DESC);
            CREATE TABLE IF NOT EXISTS likes (
                user_id       INTEGER NOT NULL,
                post_id       INTEGER NOT NULL,
                created_at_ms INTEGER NOT NULL,
                PRIMARY KEY (user_id, post_id)
            );
            CREATE INDEX IF NOT EXISTS idx_likes_post ON likes(post_id);
            CREATE TABLE IF NOT EXISTS comments (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                post_id       INTEGER NOT NULL,
                author_id     INTEGER NOT NULL,
                created_at_ms INTEGER NOT NULL,
                body          TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_comments_post ON comments(post_id);
            CREATE INDEX IF NOT EXISTS idx_comments_author ON comments(author_id);
            ",
        )?;
        Ok(Self { path })
    }

    fn load_edge_column(&self, sql: &str, key: i64) -> Result<Vec<FeedId>> {
        let conn = Connection::open(&self.path)?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params![key], |r| r.get::<_, i64>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(FeedId::new(row?));
        }
        Ok(out)
    }
}

impl FeedStore for SqliteStore {
    fn create_feed(&self, record: &FeedRecord) -> Result<FeedId> {
        let conn = Connection::open(&self.path)?;
        conn.execute(
            "INSERT INTO feeds (kind, user_name, screen_name, profile, is_private, email, hashed_password)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.kind.as_str(),
                record.user_name,
                record.screen_name,
                record.profile,
                record.private as i64,
                record.email,
                record.hashed_password,
            ],
        )?;
        Ok(FeedId::new(conn.last_insert_rowid()))
    }

    fn load_feed(&self, id: FeedId) -> Result<Option<FeedRecord>> {
        let conn = Connection::open(&self.path)?;
        let row = conn
            .query_row(
                "SELECT kind, user_name, screen_name, profile, is_private, email, hashed_password
                 FROM feeds WHERE id = ?1",
                params![id.raw()],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, String>(2)?,
                        r.get::<_, String>(3)?,
                        r.get::<_, i64>(4)?,
                        r.get::<_, Option<String>>(5)?,
                        r.get::<_, Option<String>>(6)?,
                    ))
                },
            )
            .optional()?;
        let Some((kind, user_name, screen_name, profile, private, email, hashed_password)) = row
        else {
            return Ok(None);
        };
        let kind = FeedRecordKind::parse(&kind)
            .ok_or_else(|| anyhow::anyhow!("unknown feed kind: {}", kind))?;
        Ok(Some(FeedRecord {
            kind,
            user_name,
            screen_name,
            profile,
            private: private != 0,
            email,
            hashed_password,
        }))
    }

    fn find_feed_by_user_name(&self, user_name: &str) -> Result<Option<FeedId>> {
        let conn = Connection::open(&self.path)?;
        let id = conn
            .query_row(
                "SELECT id FROM feeds WHERE user_name = ?1",
                params![user_name],
                |r| r.get::<_, i64>(0),
            )
            .optional()?;
        Ok(id.map(FeedId::new))
    }

    fn create_subscription(&self, subscriber: FeedId, target: FeedId) -> Result<()> {
        let conn = Connection::open(&self.path)?;
        conn.execute(
            "INSERT OR IGNORE INTO subscriptions (subscriber_id, target_id, created_at_ms)
             VALUES (?1, ?2, ?3)",
            params![subscriber.raw(), target.raw(), now_ms()],
        )?;
        Ok(())
    }

    fn remove_subscription(&self, subscriber: FeedId, target: FeedId) -> Result<()> {
        let conn = Connection::open(&self.path)?;
        conn.execute(
            "DELETE FROM subscriptions WHERE subscriber_id = ?1 AND target_id = ?2",
            params![subscriber.raw(), target.raw()],
        )?;
        Ok(())
    }

    fn load_subscriptions(&self, subscriber: FeedId) -> Result<Vec<FeedId>> {
        self.load_edge_column(
            "SELECT target_id FROM subscriptions WHERE subscriber_id = ?1 ORDER BY target_id",
            subscriber.raw(),
        )
    }

    fn load_subscribers(&self, target: FeedId) -> Result<Vec<FeedId>> {
        self.load_edge_column(
            "SELECT subscriber_id FROM subscriptions WHERE target_id = ?1 ORDER BY subscriber_id",
            target.raw(),
        )
    }

    fn create_block(&self, blocker: FeedId, target: FeedId) -> Result<()> {
        let conn = Connection::open(&self.path)?;
        conn.execute(
            "INSERT OR IGNORE INTO blocks (blocker_id, target_id) VALUES (?1, ?2)",
            params![blocker.raw(), target.raw()],
        )?;
        Ok(())
    }

    fn remove_block(&self, blocker: FeedId, target: FeedId) -> Result<()> {
        let conn = Connection::open(&self.path)?;
        conn.execute(
            "DELETE FROM blocks WHERE blocker_id = ?1 AND target_id = ?2",
            params![blocker.raw(), target.raw()],
        )?;
        Ok(())
    }

    fn load_blocks(&self, blocker: FeedId) -> Result<Vec<FeedId>> {
        self.load_edge_column(
            "SELECT target_id FROM blocks WHERE blocker_id = ?1 ORDER BY target_id",
            blocker.raw(),
        )
    }

    fn create_admin(&self, group: FeedId, admin: FeedId) -> Result<()> {
        let conn = Connection::open(&self.path)?;
        conn.execute(
            "INSERT OR IGNORE INTO group_admins (group_id, admin_id) VALUES (?1, ?2)",
            params![group.raw(), admin.raw()],
        )?;
        Ok(())
    }

    fn remove_admin(&self, group: FeedId, admin: FeedId) -> Result<()> {
        let conn = Connection::open(&self.path)?;
        conn.execute(
            "DELETE FROM group_admins WHERE group_id = ?1 AND admin_id = ?2",
            params![group.raw(), admin.raw()],
        )?;
        Ok(())
    }

    fn load_admins(&self, group: FeedId) -> Result<Vec<FeedId>> {
        self.load_edge_column(
            "SELECT admin_id FROM group_admins WHERE group_id = ?1 ORDER BY admin_id",
            group.raw(),
        )
    }

    fn create_subscription_request(&self, from: FeedId, target: FeedId) -> Result<()> {
        let conn = Connection::open(&self.path)?;
        conn.execute(
            "INSERT OR IGNORE INTO subscription_requests (from_user_id, target_id) VALUES (?1, ?2)",
            params![from.raw(), target.raw()],
        )?;
        Ok(())
    }

    fn remove_subscription_request(&self, from: FeedId, target: FeedId) -> Result<()> {
        let conn = Connection::open(&self.path)?;
        conn.execute(
            "DELETE FROM subscription_requests WHERE from_user_id = ?1 AND target_id = ?2",
            params![from.raw(), target.raw()],
        )?;
        Ok(())
    }

    fn load_subscription_requests(&self, target: FeedId) -> Result<Vec<FeedId>> {
        self.load_edge_column(
            "SELECT from_user_id FROM subscription_requests WHERE target_id = ?1 ORDER BY from_user_id",
            target.raw(),
        )
    }
}

impl PostStore for SqliteStore {
    fn create_post(&self, record: &PostRecord) -> Result<PostId> {
        let conn = Connection::open(&self.path)?;
        let to_feeds = serde_json::to_string(&record.to_feeds)?;
        conn.execute(
            "INSERT INTO posts (author_id, created_at_ms, updated_at_ms, to_feeds, body)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.author_id.raw(),
                record.created_at,
                record.updated_at,
                to_feeds,
                record.body,
            ],
        )?;
        Ok(PostId::new(conn.last_insert_rowid()))
    }

    fn update_post(&self, id: PostId, record: &PostRecord) -> Result<()> {
        let conn = Connection::open(&self.path)?;
        let to_feeds = serde_json::to_string(&record.to_feeds)?;
        let n = conn.execute(
            "UPDATE posts SET author_id = ?2, created_at_ms = ?3, updated_at_ms = ?4,
                    to_feeds = ?5, body = ?6
             WHERE id = ?1",
            params![
                id.raw(),
                record.author_id.raw(),
                record.created_at,
                record.updated_at,
                to_feeds,
                record.body,
            ],
        )?;
        if n == 0 {
            anyhow::bail!("post {} not found", id);
        }
        Ok(())
    }

    fn load_post(&self, id: PostId) -> Result<Option<PostRecord>> {
        let conn = Connection::open(&self.path)?;
        let row = conn
            .query_row(
                "SELECT author_id, created_at_ms, updated_at_ms, to_feeds, body
                 FROM posts WHERE id = ?1",
                params![id.raw()],
                |r| {
                    Ok((
                        r.get::<_, i64>(0)?,
                        r.get::<_, i64>(1)?,
                        r.get::<_, i64>(2)?,
                        r.get::<_, String>(3)?,
                        r.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;
        let Some((author_id, created_at, updated_at, to_feeds, body)) = row else {
            return Ok(None);
        };
        let to_feeds: Vec<FeedId> = serde_json::from_str(&to_feeds)
            .with_context(|| format!("post {}: bad to_feeds column", id))?;
        Ok(Some(PostRecord {
            author_id: FeedId::new(author_id),
            created_at,
            updated_at,
            to_feeds,
            body,
        }))
    }

    fn delete_post_with_likes(&self, id: PostId) -> Result<()> {
        let mut conn = Connection::open(&self.path)?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM comments WHERE post_id = ?1", params![id.raw()])?;
        tx.execute("DELETE FROM likes WHERE post_id = ?1", params![id.raw()])?;
        tx.execute("DELETE FROM posts WHERE id = ?1", params![id.raw()])?;
        tx.commit()?;
        Ok(())
    }

    fn load_authored_post_ids(&self, author: FeedId) -> Result<Vec<PostId>> {
        let conn = Connection::open(&self.path)?;
        let mut stmt = conn.prepare(
            "SELECT id FROM posts WHERE author_id = ?1 ORDER BY created_at_ms DESC, id DESC",
        )?;
        let rows = stmt.query_map(params![author.raw()], |r| r.get::<_, i64>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(PostId::new(row?));
        }
        Ok(out)
    }

    fn create_like(&self, user: FeedId, post: PostId, created_at: i64) -> Result<()> {
        let conn = Connection::open(&self.path)?;
        conn.execute(
            "INSERT OR IGNORE INTO likes (user_id, post_id, created_at_ms) VALUES (?1, ?2, ?3)",
            params![user.raw(), post.raw(), created_at],
        )?;
        Ok(())
    }

    fn remove_like(&self, user: FeedId, post: PostId) -> Result<()> {
        let conn = Connection::open(&self.path)?;
        conn.execute(
            "DELETE FROM likes WHERE user_id = ?1 AND post_id = ?2",
            params![user.raw(), post.raw()],
        )?;
        Ok(())
    }

    fn load_likes(&self, post: PostId) -> Result<Vec<FeedId>> {
        self.load_edge_column(
            "SELECT user_id FROM likes WHERE post_id = ?1 ORDER BY created_at_ms DESC, rowid DESC",
            post.raw(),
        )
    }

    fn load_liked_post_ids(&self, user: FeedId) -> Result<Vec<PostId>> {
        let conn = Connection::open(&self.path)?;
        let mut stmt = conn.prepare(
            "SELECT post_id FROM likes WHERE user_id = ?1 ORDER BY created_at_ms DESC, rowid DESC",
        )?;
        let rows = stmt.query_map(params![user.raw()], |r| r.get::<_, i64>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(PostId::new(row?));
        }
        Ok(out)
    }

    fn create_comment(&self, record: &CommentRecord) -> Result<CommentId> {
        let conn = Connection::open(&self.path)?;
        conn.execute(
            "INSERT INTO comments (post_id, author_id, created_at_ms, body) VALUES (?1, ?2, ?3, ?4)",
            params![
                record.post_id.raw(),
                record.author_id.raw(),
                record.created_at,
                record.body,
            ],
        )?;
        Ok(CommentId::new(conn.last_insert_rowid()))
    }

    fn delete_comment(&self, id: CommentId) -> Result<()> {
        let conn = Connection::open(&self.path)?;
        conn.execute("DELETE FROM comments WHERE id = ?1", params![id.raw()])?;
        Ok(())
    }

    fn load_comments(&self, post: PostId) -> Result<Vec<CommentRow>> {
        let conn = Connection::open(&self.path)?;
        let mut stmt = conn.prepare(
            "SELECT id, post_id, author_id, created_at_ms, body
             FROM comments WHERE post_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![post.raw()], |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, i64>(2)?,
                r.get::<_, i64>(3)?,
                r.get::<_, String>(4)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (id, post_id, author_id, created_at, body) = row?;
            out.push(CommentRow {
                id: CommentId::new(id),
                post_id: PostId::new(post_id),
                author_id: FeedId::new(author_id),
                created_at,
                body,
            });
        }
        Ok(out)
    }

    fn load_commented_post_ids(&self, user: FeedId) -> Result<Vec<PostId>> {
        let conn = Connection::open(&self.path)?;
        let mut stmt = conn.prepare(
            "SELECT post_id FROM comments WHERE author_id = ?1
             GROUP BY post_id ORDER BY MAX(created_at_ms) DESC, MAX(id) DESC",
        )?;
        let rows = stmt.query_map(params![user.raw()], |r| r.get::<_, i64>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(PostId::new(row?));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("riverfeed.db")).unwrap();
        (dir, store)
    }

    fn user_record(name: &str) -> FeedRecord {
        FeedRecord {
            kind: FeedRecordKind::User,
            user_name: name.to_string(),
            screen_name: name.to_string(),
            profile: String::new(),
            private: false,
            email: None,
            hashed_password: None,
        }
    }

    #[test]
    fn feed_round_trip() {
        let (_dir, store) = store();
        let record = FeedRecord {
            kind: FeedRecordKind::User,
            user_name: "piglet".to_string(),
            screen_name: "Piglet".to_string(),
            profile: "small animal".to_string(),
            private: true,
            email: Some("piglet@example.com".to_string()),
            hashed_password: Some("hunter2-hashed".to_string()),
        };
        let id = store.create_feed(&record).unwrap();
        let loaded = store.load_feed(id).unwrap().unwrap();
        assert_eq!(loaded.kind, FeedRecordKind::User);
        assert_eq!(loaded.user_name, "piglet");
        assert!(loaded.private);
        assert_eq!(loaded.email.as_deref(), Some("piglet@example.com"));
        assert_eq!(store.find_feed_by_user_name("piglet").unwrap(), Some(id));
        assert_eq!(store.find_feed_by_user_name("pooh").unwrap(), None);
        assert!(store.load_feed(FeedId::new(999)).unwrap().is_none());
    }

    #[test]
    fn duplicate_user_name_is_a_constraint_error() {
        let (_dir, store) = store();
        store.create_feed(&user_record("piglet")).unwrap();
        assert!(store.create_feed(&user_record("piglet")).is_err());
    }

    #[test]
    fn subscription_edges_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("riverfeed.db");
        let a;
        let b;
        {
            let store = SqliteStore::open(&path).unwrap();
            a = store.create_feed(&user_record("a")).unwrap();
            b = store.create_feed(&user_record("b")).unwrap();
            store.create_subscription(a, b).unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.load_subscriptions(a).unwrap(), vec![b]);
        assert_eq!(store.load_subscribers(b).unwrap(), vec![a]);
        store.remove_subscription(a, b).unwrap();
        assert!(store.load_subscriptions(a).unwrap().is_empty());
    }

    #[test]
    fn likes_load_most_recent_first() {
        let (_dir, store) = store();
        let a = store.create_feed(&user_record("a")).unwrap();
        let b = store.create_feed(&user_record("b")).unwrap();
        let post = store
            .create_post(&PostRecord {
                author_id: a,
                created_at: 1,
                updated_at: 1,
                to_feeds: vec![a],
                body: "hello".to_string(),
            })
            .unwrap();
        store.create_like(a, post, 10).unwrap();
        store.create_like(b, post, 20).unwrap();
        assert_eq!(store.load_likes(post).unwrap(), vec![b, a]);
        assert_eq!(store.load_liked_post_ids(b).unwrap(), vec![post]);
        store.remove_like(b, post).unwrap();
        assert_eq!(store.load_likes(post).unwrap(), vec![a]);
    }

    #[test]
    fn post_round_trip_keeps_to_feeds() {
        let (_dir, store) = store();
        let a = store.create_feed(&user_record("a")).unwrap();
        let b = store.create_feed(&user_record("b")).unwrap();
        let post = store
            .create_post(&PostRecord {
                author_id: a,
                created_at: 5,
                updated_at: 5,
                to_feeds: vec![a, b],
                body: "cross-posted".to_string(),
            })
            .unwrap();
        let loaded = store.load_post(post).unwrap().unwrap();
        assert_eq!(loaded.author_id, a);
        assert_eq!(loaded.to_feeds, vec![a, b]);
        assert_eq!(loaded.body, "cross-posted");

        let mut updated = loaded;
        updated.updated_at = 9;
        store.update_post(post, &updated).unwrap();
        assert_eq!(store.load_post(post).unwrap().unwrap().updated_at, 9);
        assert!(store.update_post(PostId::new(999), &updated).is_err());
    }

    #[test]
    fn authored_ids_newest_first() {
        let (_dir, store) = store();
        let a = store.create_feed(&user_record("a")).unwrap();
        let mut ids = Vec::new();
        for ts in [10, 30, 20] {
            ids.push(
                store
                    .create_post(&PostRecord {
                        author_id: a,
                        created_at: ts,
                        updated_at: ts,
                        to_feeds: vec![a],
                        body: format!("post at {}", ts),
                    })
                    .unwrap(),
            );
        }
        assert_eq!(
            store.load_authored_post_ids(a).unwrap(),
            vec![ids[1], ids[2], ids[0]]
        );
    }

    #[test]
    fn commented_ids_ordered_by_latest_comment() {
        let (_dir, store) = store();
        let a = store.create_feed(&user_record("a")).unwrap();
        let mut posts = Vec::new();
        for ts in [1, 2] {
            posts.push(
                store
                    .create_post(&PostRecord {
                        author_id: a,
                        created_at: ts,
                        updated_at: ts,
                        to_feeds: vec![a],
                        body: "p".to_string(),
                    })
                    .unwrap(),
            );
        }
        for (post, ts) in [(posts[0], 10), (posts[1], 20), (posts[0], 30)] {
            store
                .create_comment(&CommentRecord {
                    post_id: post,
                    author_id: a,
                    created_at: ts,
                    body: "c".to_string(),
                })
                .unwrap();
        }
        // posts[0] has the latest comment, so it leads despite being older
        assert_eq!(
            store.load_commented_post_ids(a).unwrap(),
            vec![posts[0], posts[1]]
        );
        let rows = store.load_comments(posts[0]).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].created_at < rows[1].created_at);
    }

    #[test]
    fn delete_post_clears_likes_and_comments() {
        let (_dir, store) = store();
        let a = store.create_feed(&user_record("a")).unwrap();
        let post = store
            .create_post(&PostRecord {
                author_id: a,
                created_at: 1,
                updated_at: 1,
                to_feeds: vec![a],
                body: "doomed".to_string(),
            })
            .unwrap();
        store.create_like(a, post, 2).unwrap();
        store
            .create_comment(&CommentRecord {
                post_id: post,
                author_id: a,
                created_at: 3,
                body: "gone soon".to_string(),
            })
            .unwrap();
        store.delete_post_with_likes(post).unwrap();
        assert!(store.load_post(post).unwrap().is_none());
        assert!(store.load_likes(post).unwrap().is_empty());
        assert!(store.load_comments(post).unwrap().is_empty());
        assert!(store.load_liked_post_ids(a).unwrap().is_empty());
        assert!(store.load_commented_post_ids(a).unwrap().is_empty());
    }
}
