/*
 * SPDX-FileCopyrightText: 2026 Riverfeed Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! In-memory store used by tests and the dev binaries.
//!
//! Orderings match what the SQLite store produces, so the engine observes the
//! same behavior against either backend.

use anyhow::{bail, Result};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::ids::{CommentId, FeedId, PostId};
use crate::store::{CommentRecord, CommentRow, FeedRecord, FeedStore, PostRecord, PostStore};

/// Keeps all records in process memory behind one mutex.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Tables>,
}

#[derive(Default)]
struct Tables {
    next_feed_id: i64,
    next_post_id: i64,
    next_comment_id: i64,
    feeds: HashMap<FeedId, FeedRecord>,
    feed_ids_by_name: HashMap<String, FeedId>,
    subscriptions: Vec<(FeedId, FeedId)>,
    blocks: Vec<(FeedId, FeedId)>,
    admins: Vec<(FeedId, FeedId)>,
    subscription_requests: Vec<(FeedId, FeedId)>,
    posts: HashMap<PostId, PostRecord>,
    likes: Vec<(FeedId, PostId, i64)>,
    comments: Vec<CommentRow>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.inner.lock().expect("store mutex poisoned")
    }
}

fn push_edge(edges: &mut Vec<(FeedId, FeedId)>, edge: (FeedId, FeedId)) {
    if !edges.contains(&edge) {
        edges.push(edge);
    }
}

fn drop_edge(edges: &mut Vec<(FeedId, FeedId)>, edge: (FeedId, FeedId)) {
    edges.retain(|e| *e != edge);
}

impl FeedStore for MemoryStore {
    fn create_feed(&self, record: &FeedRecord) -> Result<FeedId> {
        let mut tables = self.tables();
        if tables.feed_ids_by_name.contains_key(&record.user_name) {
            bail!("user name already taken: {}", record.user_name);
        }
        tables.next_feed_id += 1;
        let id = FeedId::new(tables.next_feed_id);
        tables.feeds.insert(id, record.clone());
        tables.feed_ids_by_name.insert(record.user_name.clone(), id);
        Ok(id)
    }

    fn load_feed(&self, id: FeedId) -> Result<Option<FeedRecord>> {
        Ok(self.tables().feeds.get(&id).cloned())
    }

    fn find_feed_by_user_name(&self, user_name: &str) -> Result<Option<FeedId>> {
        Ok(self.tables().feed_ids_by_name.get(user_name).copied())
    }

    fn create_subscription(&self, subscriber: FeedId, target: FeedId) -> Result<()> {
        push_edge(&mut self.tables().subscriptions, (subscriber, target));
        Ok(())
    }

    fn remove_subscription(&self, subscriber: FeedId, target: FeedId) -> Result<()> {
        drop_edge(&mut self.tables().subscriptions, (subscriber, target));
        Ok(())
    }

    fn load_subscriptions(&self, subscriber: FeedId) -> Result<Vec<FeedId>> {
        Ok(self
            .tables()
            .subscriptions
            .iter()
            .filter(|(s, _)| *s == subscriber)
            .map(|(_, t)| *t)
            .collect())
    }

    fn load_subscribers(&self, target: FeedId) -> Result<Vec<FeedId>> {
        Ok(self
            .tables()
            .subscriptions
            .iter()
            .filter(|(_, t)| *t == target)
            .map(|(s, _)| *s)
            .collect())
    }

    fn create_block(&self, blocker: FeedId, target: FeedId) -> Result<()> {
        push_edge(&mut self.tables().blocks, (blocker, target));
        Ok(())
    }

    fn remove_block(&self, blocker: FeedId, target: FeedId) -> Result<()> {
        drop_edge(&mut self.tables().blocks, (blocker, target));
        Ok(())
    }

    fn load_blocks(&self, blocker: FeedId) -> Result<Vec<FeedId>> {
        Ok(self
            .tables()
            .blocks
            .iter()
            .filter(|(b, _)| *b == blocker)
            .map(|(_, t)| *t)
            .collect())
    }

    fn create_admin(&self, group: FeedId, admin: FeedId) -> Result<()> {
        push_edge(&mut self.tables().admins, (group, admin));
        Ok(())
    }

    fn remove_admin(&self, group: FeedId, admin: FeedId) -> Result<()> {
        drop_edge(&mut self.tables().admins, (group, admin));
        Ok(())
    }

    fn load_admins(&self, group: FeedId) -> Result<Vec<FeedId>> {
        Ok(self
            .tables()
            .admins
            .iter()
            .filter(|(g, _)| *g == group)
            .map(|(_, a)| *a)
            .collect())
    }

    fn create_subscription_request(&self, from: FeedId, target: FeedId) -> Result<()> {
        push_edge(&mut self.tables().subscription_requests, (from, target));
        Ok(())
    }

    fn remove_subscription_request(&self, from: FeedId, target: FeedId) -> Result<()> {
        drop_edge(&mut self.tables().subscription_requests, (from, target));
        Ok(())
    }

    fn load_subscription_requests(&self, target: FeedId) -> Result<Vec<FeedId>> {
        Ok(self
            .tables()
            .subscription_requests
            .iter()
            .filter(|(_, t)| *t == target)
            .map(|(f, _)| *f)
            .collect())
    }
}

impl PostStore for MemoryStore {
    fn create_post(&self, record: &PostRecord) -> Result<PostId> {
        let mut tables = self.tables();
        tables.next_post_id += 1;
        let id = PostId::new(tables.next_post_id);
        tables.posts.insert(id, record.clone());
        Ok(id)
    }

    fn update_post(&self, id: PostId, record: &PostRecord) -> Result<()> {
        let mut tables = self.tables();
        match tables.posts.get_mut(&id) {
            Some(slot) => {
                *slot = record.clone();
                Ok(())
            }
            None => bail!("post {} not stored", id),
        }
    }

    fn load_post(&self, id: PostId) -> Result<Option<PostRecord>> {
        Ok(self.tables().posts.get(&id).cloned())
    }

    fn delete_post_with_likes(&self, id: PostId) -> Result<()> {
        let mut tables = self.tables();
        tables.posts.remove(&id);
        tables.likes.retain(|(_, p, _)| *p != id);
        tables.comments.retain(|c| c.post_id != id);
        Ok(())
    }

    fn load_authored_post_ids(&self, author: FeedId) -> Result<Vec<PostId>> {
        let tables = self.tables();
        let mut rows: Vec<(i64, PostId)> = tables
            .posts
            .iter()
            .filter(|(_, record)| record.author_id == author)
            .map(|(id, record)| (record.created_at, *id))
            .collect();
        rows.sort_by(|a, b| (b.0, b.1.raw()).cmp(&(a.0, a.1.raw())));
        Ok(rows.into_iter().map(|(_, id)| id).collect())
    }

    fn create_like(&self, user: FeedId, post: PostId, created_at: i64) -> Result<()> {
        let mut tables = self.tables();
        if !tables.likes.iter().any(|(u, p, _)| *u == user && *p == post) {
            tables.likes.push((user, post, created_at));
        }
        Ok(())
    }

    fn remove_like(&self, user: FeedId, post: PostId) -> Result<()> {
        self.tables()
            .likes
            .retain(|(u, p, _)| !(*u == user && *p == post));
        Ok(())
    }

    fn load_likes(&self, post: PostId) -> Result<Vec<FeedId>> {
        let tables = self.tables();
        let mut rows: Vec<(i64, usize, FeedId)> = tables
            .likes
            .iter()
            .enumerate()
            .filter(|(_, (_, p, _))| *p == post)
            .map(|(idx, (user, _, ts))| (*ts, idx, *user))
            .collect();
        rows.sort_by(|a, b| (b.0, b.1).cmp(&(a.0, a.1)));
        Ok(rows.into_iter().map(|(_, _, user)| user).collect())
    }

    fn load_liked_post_ids(&self, user: FeedId) -> Result<Vec<PostId>> {
        let tables = self.tables();
        let mut rows: Vec<(i64, usize, PostId)> = tables
            .likes
            .iter()
            .enumerate()
            .filter(|(_, (u, _, _))| *u == user)
            .map(|(idx, (_, post, ts))| (*ts, idx, *post))
            .collect();
        rows.sort_by(|a, b| (b.0, b.1).cmp(&(a.0, a.1)));
        Ok(rows.into_iter().map(|(_, _, post)| post).collect())
    }

    fn create_comment(&self, record: &CommentRecord) -> Result<CommentId> {
        let mut tables = self.tables();
        tables.next_comment_id += 1;
        let id = CommentId::new(tables.next_comment_id);
        tables.comments.push(CommentRow {
            id,
            post_id: record.post_id,
            author_id: record.author_id,
            created_at: record.created_at,
            body: record.body.clone(),
        });
        Ok(id)
    }

    fn delete_comment(&self, id: CommentId) -> Result<()> {
        self.tables().comments.retain(|c| c.id != id);
        Ok(())
    }

    fn load_comments(&self, post: PostId) -> Result<Vec<CommentRow>> {
        Ok(self
            .tables()
            .comments
            .iter()
            .filter(|c| c.post_id == post)
            .cloned()
            .collect())
    }

    fn load_commented_post_ids(&self, user: FeedId) -> Result<Vec<PostId>> {
        let tables = self.tables();
        let mut latest: HashMap<PostId, (i64, i64)> = HashMap::new();
        for row in tables.comments.iter().filter(|c| c.author_id == user) {
            let key = (row.created_at, row.id.raw());
            let entry = latest.entry(row.post_id).or_insert(key);
            if key > *entry {
                *entry = key;
            }
        }
        let mut rows: Vec<(PostId, (i64, i64))> = latest.into_iter().collect();
        rows.sort_by(|a, b| b.1.cmp(&a.1));
        Ok(rows.into_iter().map(|(post, _)| post).collect())
    }
}
