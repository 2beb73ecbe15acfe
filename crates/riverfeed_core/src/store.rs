/*
 * SPDX-FileCopyrightText: 2026 Riverfeed Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Storage contracts for the identity graph and the post archive.
//!
//! Stores hold raw records and edges; every model rule lives in the engine.
//! Implementations must apply each call atomically and keep the documented
//! orderings, which timelines rely on when they load.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::ids::{CommentId, FeedId, PostId};

/// Discriminates user feeds from group feeds in storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedRecordKind {
    User,
    Group,
}

impl FeedRecordKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FeedRecordKind::User => "user",
            FeedRecordKind::Group => "group",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(FeedRecordKind::User),
            "group" => Some(FeedRecordKind::Group),
            _ => None,
        }
    }
}

/// Stored identity of a user or group feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedRecord {
    pub kind: FeedRecordKind,
    pub user_name: String,
    pub screen_name: String,
    pub profile: String,
    pub private: bool,
    pub email: Option<String>,
    pub hashed_password: Option<String>,
}

/// Stored post row. Likes and comments are separate records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostRecord {
    pub author_id: FeedId,
    pub created_at: i64,
    pub updated_at: i64,
    pub to_feeds: Vec<FeedId>,
    pub body: String,
}

/// Comment payload at creation time; the store assigns the id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentRecord {
    pub post_id: PostId,
    pub author_id: FeedId,
    pub created_at: i64,
    pub body: String,
}

/// Comment row as loaded back, with its assigned id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentRow {
    pub id: CommentId,
    pub post_id: PostId,
    pub author_id: FeedId,
    pub created_at: i64,
    pub body: String,
}

/// Persistence for feeds and the edges between them.
pub trait FeedStore: Send + Sync {
    /// Creates a feed and returns its id. Fails on a duplicate user name.
    fn create_feed(&self, record: &FeedRecord) -> Result<FeedId>;
    fn load_feed(&self, id: FeedId) -> Result<Option<FeedRecord>>;
    fn find_feed_by_user_name(&self, user_name: &str) -> Result<Option<FeedId>>;

    fn create_subscription(&self, subscriber: FeedId, target: FeedId) -> Result<()>;
    fn remove_subscription(&self, subscriber: FeedId, target: FeedId) -> Result<()>;
    /// Feeds the given user subscribes to.
    fn load_subscriptions(&self, subscriber: FeedId) -> Result<Vec<FeedId>>;
    /// Users subscribed to the given feed.
    fn load_subscribers(&self, target: FeedId) -> Result<Vec<FeedId>>;

    fn create_block(&self, blocker: FeedId, target: FeedId) -> Result<()>;
    fn remove_block(&self, blocker: FeedId, target: FeedId) -> Result<()>;
    fn load_blocks(&self, blocker: FeedId) -> Result<Vec<FeedId>>;

    fn create_admin(&self, group: FeedId, admin: FeedId) -> Result<()>;
    fn remove_admin(&self, group: FeedId, admin: FeedId) -> Result<()>;
    fn load_admins(&self, group: FeedId) -> Result<Vec<FeedId>>;

    fn create_subscription_request(&self, from: FeedId, target: FeedId) -> Result<()>;
    fn remove_subscription_request(&self, from: FeedId, target: FeedId) -> Result<()>;
    /// Users with a pending request to subscribe to the target.
    fn load_subscription_requests(&self, target: FeedId) -> Result<Vec<FeedId>>;
}

/// Persistence for posts, likes, and comments.
pub trait PostStore: Send + Sync {
    fn create_post(&self, record: &PostRecord) -> Result<PostId>;
    fn update_post(&self, id: PostId, record: &PostRecord) -> Result<()>;
    fn load_post(&self, id: PostId) -> Result<Option<PostRecord>>;
    /// Deletes the post together with its likes and comments.
    fn delete_post_with_likes(&self, id: PostId) -> Result<()>;
    /// Ids of posts authored by the user, newest first.
    fn load_authored_post_ids(&self, author: FeedId) -> Result<Vec<PostId>>;

    fn create_like(&self, user: FeedId, post: PostId, created_at: i64) -> Result<()>;
    fn remove_like(&self, user: FeedId, post: PostId) -> Result<()>;
    /// Users who liked the post, most recent like first.
    fn load_likes(&self, post: PostId) -> Result<Vec<FeedId>>;
    /// Ids of posts the user liked, most recent like first.
    fn load_liked_post_ids(&self, user: FeedId) -> Result<Vec<PostId>>;

    fn create_comment(&self, record: &CommentRecord) -> Result<CommentId>;
    fn delete_comment(&self, id: CommentId) -> Result<()>;
    /// Comments on the post in creation order.
    fn load_comments(&self, post: PostId) -> Result<Vec<CommentRow>>;
    /// Ids of posts the user commented on, most recent comment first.
    fn load_commented_post_ids(&self, user: FeedId) -> Result<Vec<PostId>>;
}
