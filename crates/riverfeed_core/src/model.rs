/*
 * SPDX-FileCopyrightText: 2026 Riverfeed Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! In-memory entities and the timeline primitive.
//!
//! Entities refer to each other by id and are resolved through the engine's
//! caches; nothing here holds a pointer to another entity.

use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

use crate::ids::{CommentId, FeedId, PostId};

/// A user or group identity plus its loaded graph edges.
#[derive(Debug, Clone)]
pub struct Feed {
    pub id: FeedId,
    pub user_name: String,
    pub screen_name: String,
    pub profile: String,
    pub private: bool,
    /// Users subscribed to this feed.
    pub subscribers: BTreeSet<FeedId>,
    pub kind: FeedKind,
}

/// Per-variant state of a feed.
#[derive(Debug, Clone)]
pub enum FeedKind {
    User(UserState),
    Group(GroupState),
}

#[derive(Debug, Clone, Default)]
pub struct UserState {
    pub email: Option<String>,
    pub hashed_password: Option<String>,
    /// Feeds this user subscribes to.
    pub subscriptions: BTreeSet<FeedId>,
    pub blocked_users: BTreeSet<FeedId>,
    /// Users waiting for this user to let them subscribe.
    pub subscription_requests: BTreeSet<FeedId>,
}

#[derive(Debug, Clone, Default)]
pub struct GroupState {
    /// Never emptied; removing the last admin is rejected upstream.
    pub admins: BTreeSet<FeedId>,
}

impl Feed {
    pub fn is_user(&self) -> bool {
        matches!(self.kind, FeedKind::User(_))
    }

    pub fn is_group(&self) -> bool {
        matches!(self.kind, FeedKind::Group(_))
    }

    pub fn as_user(&self) -> Option<&UserState> {
        match &self.kind {
            FeedKind::User(state) => Some(state),
            FeedKind::Group(_) => None,
        }
    }

    pub fn as_user_mut(&mut self) -> Option<&mut UserState> {
        match &mut self.kind {
            FeedKind::User(state) => Some(state),
            FeedKind::Group(_) => None,
        }
    }

    pub fn as_group(&self) -> Option<&GroupState> {
        match &self.kind {
            FeedKind::Group(state) => Some(state),
            FeedKind::User(_) => None,
        }
    }

    pub fn as_group_mut(&mut self) -> Option<&mut GroupState> {
        match &mut self.kind {
            FeedKind::Group(state) => Some(state),
            FeedKind::User(_) => None,
        }
    }
}

/// A post with its hydrated likes and comments.
#[derive(Debug, Clone)]
pub struct Post {
    pub id: PostId,
    pub author_id: FeedId,
    pub created_at: i64,
    /// Bumped by likes and comment changes, except like removal.
    pub updated_at: i64,
    /// Destination feeds, fixed at creation; never empty.
    pub to_feeds: Vec<FeedId>,
    pub body: String,
    /// Users who liked the post, most recent like first.
    pub likes: Vec<FeedId>,
    /// Comments in creation order.
    pub comments: Vec<Comment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Comment {
    pub id: CommentId,
    pub post_id: PostId,
    pub author_id: FeedId,
    pub created_at: i64,
    pub body: String,
}

/// Why a post appears in a home feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ShowReason {
    pub user_id: FeedId,
    pub action: ShowReasonAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ShowReasonAction {
    Subscription,
    Like,
    Comment,
}

/// Reader-facing projection of a post. Built per read, never stored.
#[derive(Debug, Clone, Serialize)]
pub struct PostView {
    pub id: PostId,
    pub author_id: FeedId,
    pub created_at: i64,
    pub updated_at: i64,
    pub body: String,
    /// Likes after block filtering and the shown-likes cap, requester first.
    pub likes: Vec<FeedId>,
    /// Likes hidden by the cap.
    pub omitted_likes: usize,
    /// Comments after block filtering, in creation order.
    pub comments: Vec<Comment>,
    pub reason: Option<ShowReason>,
}

/// The timelines the engine materializes per feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimelineKind {
    /// Posts authored by the owner.
    Posts,
    /// Posts the owner liked, ordered by like time.
    Likes,
    /// Posts the owner commented on, ordered by most recent comment.
    Comments,
    /// The owner's aggregated home feed.
    Home,
}

/// Ordered post ids, newest-relevant first, with optional per-post reasons.
///
/// Ids never repeat; `add` is an idempotent prepend.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    post_ids: Vec<PostId>,
    reasons: HashMap<PostId, ShowReason>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parts(post_ids: Vec<PostId>, reasons: HashMap<PostId, ShowReason>) -> Self {
        Self { post_ids, reasons }
    }

    pub fn post_ids(&self) -> &[PostId] {
        &self.post_ids
    }

    pub fn len(&self) -> usize {
        self.post_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.post_ids.is_empty()
    }

    pub fn contains(&self, post: PostId) -> bool {
        self.post_ids.contains(&post)
    }

    pub fn reason_for(&self, post: PostId) -> Option<ShowReason> {
        self.reasons.get(&post).copied()
    }

    /// Prepends the post if absent. Returns whether it was added.
    pub fn add(&mut self, post: PostId) -> bool {
        if self.contains(post) {
            return false;
        }
        self.post_ids.insert(0, post);
        true
    }

    /// Prepends the post with a reason. A post already present keeps its
    /// position and its old reason.
    pub fn add_with_reason(&mut self, post: PostId, reason: ShowReason) -> bool {
        if !self.add(post) {
            return false;
        }
        self.reasons.insert(post, reason);
        true
    }

    /// Moves a present post to the front; no-op when absent.
    pub fn bump(&mut self, post: PostId) {
        if let Some(pos) = self.post_ids.iter().position(|p| *p == post) {
            self.post_ids.remove(pos);
            self.post_ids.insert(0, post);
        }
    }

    /// Removes the post and its reason; no-op when absent.
    pub fn remove(&mut self, post: PostId) {
        self.post_ids.retain(|p| *p != post);
        self.reasons.remove(&post);
    }

    /// Overwrites the reason of a post already present.
    pub fn set_reason(&mut self, post: PostId, reason: ShowReason) {
        self.reasons.insert(post, reason);
    }

    /// Stable descending reorder by the given key.
    pub fn sort_by_key_desc<K, F>(&mut self, mut key: F)
    where
        K: Ord,
        F: FnMut(PostId) -> K,
    {
        self.post_ids.sort_by_key(|p| std::cmp::Reverse(key(*p)));
    }
}
