/*
 * SPDX-FileCopyrightText: 2026 Riverfeed Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! The social-graph engine: identity graph, post visibility, timelines, and
//! the fan-out that keeps them consistent.
//!
//! `Feeds` owns an unbounded read-through cache of entities keyed by id and a
//! map of materialized timelines. Reads hydrate lazily from the stores;
//! writes persist first, then update the cache, then touch only timelines
//! that are already materialized. A timeline that was never accessed gets the
//! same state later from its store-backed load or rebuild.
//!
//! One writer at a time: every operation takes `&mut self`. Callers that need
//! to share the engine across threads wrap it in a `Mutex`.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::ids::{CommentId, FeedId, PostId};
use crate::model::{
    Comment, Feed, FeedKind, GroupState, Post, PostView, ShowReason, ShowReasonAction, Timeline,
    TimelineKind, UserState,
};
use crate::store::{CommentRecord, FeedRecord, FeedRecordKind, FeedStore, PostRecord, PostStore};

fn default_max_shown_likes() -> usize {
    4
}

/// Engine tunables.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct FeedsConfig {
    /// Like-list cap in post views; likes beyond it are counted as omitted.
    #[serde(default = "default_max_shown_likes")]
    pub max_shown_likes: usize,
}

impl Default for FeedsConfig {
    fn default() -> Self {
        Self {
            max_shown_likes: default_max_shown_likes(),
        }
    }
}

/// Parameters for `create_user`. An unset screen name falls back to the
/// user name.
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub user_name: String,
    pub screen_name: Option<String>,
    pub profile: String,
    pub private: bool,
    pub email: Option<String>,
    pub hashed_password: Option<String>,
}

/// Parameters for `create_group`.
#[derive(Debug, Clone, Default)]
pub struct NewGroup {
    pub user_name: String,
    pub screen_name: Option<String>,
    pub profile: String,
    pub private: bool,
}

pub struct Feeds {
    cfg: FeedsConfig,
    clock: Arc<dyn Clock>,
    feed_store: Arc<dyn FeedStore>,
    post_store: Arc<dyn PostStore>,
    feeds: HashMap<FeedId, Feed>,
    posts: HashMap<PostId, Post>,
    timelines: HashMap<(FeedId, TimelineKind), Timeline>,
}

impl Feeds {
    pub fn new(
        feed_store: Arc<dyn FeedStore>,
        post_store: Arc<dyn PostStore>,
        clock: Arc<dyn Clock>,
        cfg: FeedsConfig,
    ) -> Self {
        Self {
            cfg,
            clock,
            feed_store,
            post_store,
            feeds: HashMap::new(),
            posts: HashMap::new(),
            timelines: HashMap::new(),
        }
    }

    pub fn create_user(&mut self, params: NewUser) -> Result<FeedId> {
        let NewUser {
            user_name,
            screen_name,
            profile,
            private,
            email,
            hashed_password,
        } = params;
        if user_name.trim().is_empty() {
            return Err(Error::Validation("user name must not be empty".to_string()));
        }
        if self.feed_store.find_feed_by_user_name(&user_name)?.is_some() {
            return Err(Error::Validation(format!(
                "user name already taken: {}",
                user_name
            )));
        }
        let record = FeedRecord {
            kind: FeedRecordKind::User,
            user_name: user_name.clone(),
            screen_name: screen_name.unwrap_or_else(|| user_name.clone()),
            profile,
            private,
            email,
            hashed_password,
        };
        let id = self.feed_store.create_feed(&record)?;
        self.feeds.insert(
            id,
            Feed {
                id,
                user_name: record.user_name,
                screen_name: record.screen_name,
                profile: record.profile,
                private: record.private,
                subscribers: BTreeSet::new(),
                kind: FeedKind::User(UserState {
                    email: record.email,
                    hashed_password: record.hashed_password,
                    ..UserState::default()
                }),
            },
        );
        info!(id = id.raw(), user_name = %user_name, "created user");
        Ok(id)
    }

    /// Creates a group feed. The creator is subscribed and promoted to admin.
    pub fn create_group(&mut self, creator: FeedId, params: NewGroup) -> Result<FeedId> {
        self.ensure_feed(creator)?;
        if !self.cached_feed(creator)?.is_user() {
            return Err(Error::Validation(format!("feed {} is not a user", creator)));
        }
        let NewGroup {
            user_name,
            screen_name,
            profile,
            private,
        } = params;
        if user_name.trim().is_empty() {
            return Err(Error::Validation("group name must not be empty".to_string()));
        }
        if self.feed_store.find_feed_by_user_name(&user_name)?.is_some() {
            return Err(Error::Validation(format!(
                "user name already taken: {}",
                user_name
            )));
        }
        let record = FeedRecord {
            kind: FeedRecordKind::Group,
            user_name: user_name.clone(),
            screen_name: screen_name.unwrap_or_else(|| user_name.clone()),
            profile,
            private,
            email: None,
            hashed_password: None,
        };
        let id = self.feed_store.create_feed(&record)?;
        self.feed_store.create_admin(id, creator)?;
        let mut admins = BTreeSet::new();
        admins.insert(creator);
        self.feeds.insert(
            id,
            Feed {
                id,
                user_name: record.user_name,
                screen_name: record.screen_name,
                profile: record.profile,
                private: record.private,
                subscribers: BTreeSet::new(),
                kind: FeedKind::Group(GroupState { admins }),
            },
        );
        self.link_subscription(creator, id)?;
        info!(id = id.raw(), creator = creator.raw(), user_name = %user_name, "created group");
        Ok(id)
    }

    pub fn find_feed_by_user_name(&mut self, user_name: &str) -> Result<Option<FeedId>> {
        Ok(self.feed_store.find_feed_by_user_name(user_name)?)
    }

    /// Loads the feed if needed and returns the cached entity.
    pub fn feed(&mut self, id: FeedId) -> Result<&Feed> {
        self.ensure_feed(id)?;
        self.cached_feed(id)
    }

    pub fn subscriptions(&mut self, user: FeedId) -> Result<Vec<FeedId>> {
        self.ensure_feed(user)?;
        Ok(self.user_state(user)?.subscriptions.iter().copied().collect())
    }

    pub fn subscribers(&mut self, feed: FeedId) -> Result<Vec<FeedId>> {
        self.ensure_feed(feed)?;
        Ok(self.cached_feed(feed)?.subscribers.iter().copied().collect())
    }

    pub fn blocked_users(&mut self, user: FeedId) -> Result<Vec<FeedId>> {
        self.ensure_feed(user)?;
        Ok(self.user_state(user)?.blocked_users.iter().copied().collect())
    }

    pub fn group_admins(&mut self, group: FeedId) -> Result<Vec<FeedId>> {
        self.ensure_feed(group)?;
        Ok(self.group_state(group)?.admins.iter().copied().collect())
    }

    /// Pending requesters waiting for the target user's decision.
    pub fn subscription_requests(&mut self, target: FeedId) -> Result<Vec<FeedId>> {
        self.ensure_feed(target)?;
        Ok(self
            .user_state(target)?
            .subscription_requests
            .iter()
            .copied()
            .collect())
    }

    pub fn subscribe_to(&mut self, user: FeedId, target: FeedId) -> Result<()> {
        if user == target {
            return Err(Error::Validation(
                "cannot subscribe to yourself".to_string(),
            ));
        }
        self.ensure_feed(user)?;
        self.ensure_feed(target)?;
        if self.is_content_blocked(user, Some(target)) {
            return Err(Error::Forbidden("subscription blocked"));
        }
        if self.user_state(user)?.subscriptions.contains(&target) {
            return Ok(());
        }
        let target_feed = self.cached_feed(target)?;
        if target_feed.private && target_feed.is_user() {
            return Err(Error::Forbidden("user is private"));
        }
        self.link_subscription(user, target)?;
        info!(user = user.raw(), target = target.raw(), "subscribed");
        Ok(())
    }

    pub fn unsubscribe_from(&mut self, user: FeedId, target: FeedId) -> Result<()> {
        self.ensure_feed(user)?;
        self.ensure_feed(target)?;
        if !self.user_state(user)?.subscriptions.contains(&target) {
            return Ok(());
        }
        self.unlink_subscription(user, target)?;
        info!(user = user.raw(), target = target.raw(), "unsubscribed");
        Ok(())
    }

    /// Blocks the target user. Subscriptions between the two are removed in
    /// both directions first; both home feeds are rebuilt.
    pub fn block_user(&mut self, user: FeedId, target: FeedId) -> Result<()> {
        if user == target {
            return Err(Error::Validation("cannot block yourself".to_string()));
        }
        self.ensure_feed(user)?;
        self.ensure_feed(target)?;
        if !self.cached_feed(target)?.is_user() {
            return Err(Error::Validation(format!("feed {} is not a user", target)));
        }
        if self.user_state(user)?.blocked_users.contains(&target) {
            return Ok(());
        }
        if self.user_state(user)?.subscriptions.contains(&target) {
            self.unlink_subscription(user, target)?;
        }
        if self.user_state(target)?.subscriptions.contains(&user) {
            self.unlink_subscription(target, user)?;
        }
        self.feed_store.create_block(user, target)?;
        self.user_state_mut(user)?.blocked_users.insert(target);
        for id in [user, target] {
            if self.timelines.contains_key(&(id, TimelineKind::Home)) {
                self.rebuild_home(id)?;
            }
        }
        info!(user = user.raw(), target = target.raw(), "blocked user");
        Ok(())
    }

    pub fn unblock_user(&mut self, user: FeedId, target: FeedId) -> Result<()> {
        self.ensure_feed(user)?;
        self.ensure_feed(target)?;
        if !self.user_state(user)?.blocked_users.contains(&target) {
            return Ok(());
        }
        self.feed_store.remove_block(user, target)?;
        self.user_state_mut(user)?.blocked_users.remove(&target);
        for id in [user, target] {
            if self.timelines.contains_key(&(id, TimelineKind::Home)) {
                self.rebuild_home(id)?;
            }
        }
        info!(user = user.raw(), target = target.raw(), "unblocked user");
        Ok(())
    }

    /// Asks a private user to allow a subscription. Idempotent; a no-op when
    /// the requester is already subscribed.
    pub fn send_subscription_request(&mut self, user: FeedId, target: FeedId) -> Result<()> {
        if user == target {
            return Err(Error::Validation(
                "cannot request a subscription to yourself".to_string(),
            ));
        }
        self.ensure_feed(user)?;
        self.ensure_feed(target)?;
        let target_feed = self.cached_feed(target)?;
        if !(target_feed.is_user() && target_feed.private) {
            return Err(Error::Validation(
                "subscription requests are only for private users".to_string(),
            ));
        }
        if self.is_content_blocked(user, Some(target)) {
            return Err(Error::Forbidden("subscription blocked"));
        }
        if self.user_state(user)?.subscriptions.contains(&target) {
            return Ok(());
        }
        if self.user_state(target)?.subscription_requests.contains(&user) {
            return Ok(());
        }
        self.feed_store.create_subscription_request(user, target)?;
        self.user_state_mut(target)?.subscription_requests.insert(user);
        info!(user = user.raw(), target = target.raw(), "subscription requested");
        Ok(())
    }

    /// Accepting is reserved to the requested user and creates the
    /// subscription even though the target is private.
    pub fn accept_subscription_request(
        &mut self,
        acting: FeedId,
        from: FeedId,
        target: FeedId,
    ) -> Result<()> {
        if acting != target {
            return Err(Error::Forbidden("only the requested user may accept"));
        }
        self.ensure_feed(from)?;
        self.ensure_feed(target)?;
        if !self.user_state(target)?.subscription_requests.contains(&from) {
            return Err(Error::NotFound {
                entity: "subscription request",
                id: from.raw(),
            });
        }
        if self.is_content_blocked(from, Some(target)) {
            return Err(Error::Forbidden("subscription blocked"));
        }
        self.feed_store.remove_subscription_request(from, target)?;
        self.user_state_mut(target)?.subscription_requests.remove(&from);
        self.link_subscription(from, target)?;
        info!(from = from.raw(), target = target.raw(), "subscription request accepted");
        Ok(())
    }

    pub fn reject_subscription_request(
        &mut self,
        acting: FeedId,
        from: FeedId,
        target: FeedId,
    ) -> Result<()> {
        if acting != target {
            return Err(Error::Forbidden("only the requested user may reject"));
        }
        self.ensure_feed(from)?;
        self.ensure_feed(target)?;
        if self.user_state(target)?.subscription_requests.contains(&from) {
            self.feed_store.remove_subscription_request(from, target)?;
            self.user_state_mut(target)?.subscription_requests.remove(&from);
            info!(from = from.raw(), target = target.raw(), "subscription request rejected");
        }
        Ok(())
    }

    pub fn add_group_admin(
        &mut self,
        acting: FeedId,
        group: FeedId,
        new_admin: FeedId,
    ) -> Result<()> {
        self.ensure_feed(group)?;
        self.ensure_feed(new_admin)?;
        let (acting_is_admin, already_admin) = {
            let state = self.group_state(group)?;
            (
                state.admins.contains(&acting),
                state.admins.contains(&new_admin),
            )
        };
        if !acting_is_admin {
            return Err(Error::Forbidden("only group admins may add admins"));
        }
        if already_admin {
            return Ok(());
        }
        if !self.cached_feed(new_admin)?.is_user() {
            return Err(Error::Validation(format!(
                "feed {} is not a user",
                new_admin
            )));
        }
        self.feed_store.create_admin(group, new_admin)?;
        self.group_state_mut(group)?.admins.insert(new_admin);
        info!(group = group.raw(), admin = new_admin.raw(), "added group admin");
        Ok(())
    }

    pub fn remove_group_admin(
        &mut self,
        acting: FeedId,
        group: FeedId,
        admin: FeedId,
    ) -> Result<()> {
        self.ensure_feed(group)?;
        let (acting_is_admin, is_admin, admin_count) = {
            let state = self.group_state(group)?;
            (
                state.admins.contains(&acting),
                state.admins.contains(&admin),
                state.admins.len(),
            )
        };
        if !acting_is_admin {
            return Err(Error::Forbidden("only group admins may remove admins"));
        }
        if !is_admin {
            return Ok(());
        }
        if admin_count == 1 {
            return Err(Error::Forbidden("cannot remove the only admin"));
        }
        self.feed_store.remove_admin(group, admin)?;
        self.group_state_mut(group)?.admins.remove(&admin);
        info!(group = group.raw(), admin = admin.raw(), "removed group admin");
        Ok(())
    }

    /// Publishes to the author's own feed.
    pub fn publish_post(&mut self, author: FeedId, body: &str) -> Result<PostId> {
        self.publish_post_to(author, &[author], body)
    }

    /// Publishes a post to the given destination feeds.
    ///
    /// A post addressed only to other users is a direct message and requires
    /// mutual subscription with every recipient. Any other destination must
    /// be the author's own feed or a group the author is subscribed to.
    pub fn publish_post_to(
        &mut self,
        author: FeedId,
        to_feeds: &[FeedId],
        body: &str,
    ) -> Result<PostId> {
        self.ensure_feed(author)?;
        if !self.cached_feed(author)?.is_user() {
            return Err(Error::Validation(format!("feed {} is not a user", author)));
        }
        if to_feeds.is_empty() {
            return Err(Error::Validation(
                "post must have at least one destination".to_string(),
            ));
        }
        for target in to_feeds {
            self.ensure_feed(*target)?;
        }
        let direct = self.is_direct_parts(author, to_feeds)?;
        if direct {
            for target in to_feeds {
                let mutual = self.user_state(author)?.subscriptions.contains(target)
                    && self.user_state(*target)?.subscriptions.contains(&author);
                if !mutual {
                    return Err(Error::Forbidden(
                        "direct posts require mutual subscription",
                    ));
                }
            }
        } else {
            for target in to_feeds {
                if *target == author {
                    continue;
                }
                let feed = self.cached_feed(*target)?;
                if !(feed.is_group() && feed.subscribers.contains(&author)) {
                    return Err(Error::Forbidden("cannot post to this feed"));
                }
            }
        }
        let now = self.clock.now_ms();
        let record = PostRecord {
            author_id: author,
            created_at: now,
            updated_at: now,
            to_feeds: to_feeds.to_vec(),
            body: body.to_string(),
        };
        let id = self.post_store.create_post(&record)?;
        self.posts.insert(
            id,
            Post {
                id,
                author_id: author,
                created_at: now,
                updated_at: now,
                to_feeds: to_feeds.to_vec(),
                body: body.to_string(),
                likes: Vec::new(),
                comments: Vec::new(),
            },
        );
        self.with_timeline(author, TimelineKind::Posts, |t| {
            t.add(id);
        });
        let mut recipients: BTreeSet<FeedId> = BTreeSet::new();
        recipients.insert(author);
        if direct {
            recipients.extend(to_feeds.iter().copied());
        } else {
            for target in to_feeds {
                recipients.extend(self.cached_feed(*target)?.subscribers.iter().copied());
            }
        }
        for recipient in recipients {
            self.with_timeline(recipient, TimelineKind::Home, |t| {
                t.add(id);
            });
        }
        info!(post = id.raw(), author = author.raw(), "published post");
        Ok(id)
    }

    pub fn like_post(&mut self, user: FeedId, post: PostId) -> Result<()> {
        self.ensure_feed(user)?;
        if !self.cached_feed(user)?.is_user() {
            return Err(Error::Validation(format!("feed {} is not a user", user)));
        }
        if !self.is_post_visible(post, Some(user))? {
            return Err(Error::Forbidden("post is not visible"));
        }
        if self.cached_post(post)?.likes.contains(&user) {
            return Err(Error::Forbidden("post already liked"));
        }
        let like_ts = self.clock.now_ms();
        self.post_store.create_like(user, post, like_ts)?;
        self.cached_post_mut(post)?.likes.insert(0, user);
        self.mark_post_updated(post)?;
        self.fan_out_engagement(user, post, ShowReasonAction::Like)?;
        self.bump_for_seers(user, post)?;
        info!(post = post.raw(), user = user.raw(), "liked post");
        Ok(())
    }

    /// Removes the user's like. A no-op when the post was not liked. Unlike
    /// every other engagement change, this does not touch `updated_at`, so
    /// the post keeps its position in updated-order timelines.
    pub fn unlike_post(&mut self, user: FeedId, post: PostId) -> Result<()> {
        self.ensure_feed(user)?;
        if !self.is_post_visible(post, Some(user))? {
            return Err(Error::Forbidden("post is not visible"));
        }
        if !self.cached_post(post)?.likes.contains(&user) {
            return Ok(());
        }
        let seers = self.users_who_see_post(post)?;
        self.post_store.remove_like(user, post)?;
        self.cached_post_mut(post)?.likes.retain(|l| *l != user);
        self.with_timeline(user, TimelineKind::Likes, |t| t.remove(post));
        self.rederive_reasons(post, &seers)?;
        info!(post = post.raw(), user = user.raw(), "unliked post");
        Ok(())
    }

    pub fn comment_on_post(
        &mut self,
        user: FeedId,
        post: PostId,
        body: &str,
    ) -> Result<CommentId> {
        self.ensure_feed(user)?;
        if !self.cached_feed(user)?.is_user() {
            return Err(Error::Validation(format!("feed {} is not a user", user)));
        }
        if !self.is_post_visible(post, Some(user))? {
            return Err(Error::Forbidden("post is not visible"));
        }
        let created_at = self.clock.now_ms();
        let record = CommentRecord {
            post_id: post,
            author_id: user,
            created_at,
            body: body.to_string(),
        };
        let id = self.post_store.create_comment(&record)?;
        self.cached_post_mut(post)?.comments.push(Comment {
            id,
            post_id: post,
            author_id: user,
            created_at,
            body: body.to_string(),
        });
        self.mark_post_updated(post)?;
        self.fan_out_engagement(user, post, ShowReasonAction::Comment)?;
        self.bump_for_seers(user, post)?;
        info!(post = post.raw(), user = user.raw(), comment = id.raw(), "commented on post");
        Ok(id)
    }

    /// Deletes a comment. Allowed for the comment's author and for anyone
    /// who can edit the post (the post author, admins of targeted groups).
    pub fn delete_comment(
        &mut self,
        acting: FeedId,
        post: PostId,
        comment: CommentId,
    ) -> Result<()> {
        self.ensure_feed(acting)?;
        if !self.is_post_visible(post, Some(acting))? {
            return Err(Error::Forbidden("post is not visible"));
        }
        let comment_author = {
            let p = self.cached_post(post)?;
            match p.comments.iter().find(|c| c.id == comment) {
                Some(c) => c.author_id,
                None => {
                    return Err(Error::NotFound {
                        entity: "comment",
                        id: comment.raw(),
                    })
                }
            }
        };
        if acting != comment_author && !self.can_edit_post(post, acting)? {
            return Err(Error::Forbidden("cannot delete another user's comment"));
        }
        let seers = self.users_who_see_post(post)?;
        self.post_store.delete_comment(comment)?;
        self.cached_post_mut(post)?.comments.retain(|c| c.id != comment);
        self.mark_post_updated(post)?;
        let remaining = self
            .cached_post(post)?
            .comments
            .iter()
            .any(|c| c.author_id == comment_author);
        if !remaining {
            self.with_timeline(comment_author, TimelineKind::Comments, |t| t.remove(post));
        }
        self.rederive_reasons(post, &seers)?;
        info!(post = post.raw(), comment = comment.raw(), acting = acting.raw(), "deleted comment");
        Ok(())
    }

    pub fn delete_post(&mut self, acting: FeedId, post: PostId) -> Result<()> {
        self.ensure_feed(acting)?;
        self.ensure_post(post)?;
        if !self.can_edit_post(post, acting)? {
            return Err(Error::Forbidden("cannot delete another user's post"));
        }
        let (author, to_feeds, likers, comment_authors) = {
            let p = self.cached_post(post)?;
            (
                p.author_id,
                p.to_feeds.clone(),
                p.likes.clone(),
                p.comments.iter().map(|c| c.author_id).collect::<Vec<_>>(),
            )
        };
        let direct = self.is_direct_parts(author, &to_feeds)?;
        let seers = self.users_who_see_post(post)?;
        self.post_store.delete_post_with_likes(post)?;
        self.with_timeline(author, TimelineKind::Posts, |t| t.remove(post));
        for liker in &likers {
            self.with_timeline(*liker, TimelineKind::Likes, |t| t.remove(post));
        }
        for commenter in &comment_authors {
            self.with_timeline(*commenter, TimelineKind::Comments, |t| t.remove(post));
        }
        // The subscribers-of formula never yields the author or the named
        // recipients of a direct post; scrub their homes explicitly.
        let mut homes = seers;
        homes.insert(author);
        if direct {
            homes.extend(to_feeds.iter().copied());
        }
        for owner in homes {
            self.with_timeline(owner, TimelineKind::Home, |t| t.remove(post));
        }
        self.posts.remove(&post);
        info!(post = post.raw(), acting = acting.raw(), "deleted post");
        Ok(())
    }

    /// Direct posts are visible to the author and the named recipients only.
    /// Feed posts are hidden between users blocking each other in either
    /// direction and otherwise visible when any target feed is visible to
    /// the requester.
    pub fn is_post_visible(&mut self, post: PostId, requester: Option<FeedId>) -> Result<bool> {
        self.ensure_post(post)?;
        let (author, to_feeds) = {
            let p = self.cached_post(post)?;
            (p.author_id, p.to_feeds.clone())
        };
        if let Some(r) = requester {
            self.ensure_feed(r)?;
        }
        if self.is_direct_parts(author, &to_feeds)? {
            return Ok(match requester {
                Some(r) => r == author || to_feeds.contains(&r),
                None => false,
            });
        }
        self.ensure_feed(author)?;
        if self.is_content_blocked(author, requester) {
            return Ok(false);
        }
        for target in &to_feeds {
            self.ensure_feed(*target)?;
            if self.is_feed_visible(*target, requester) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn is_direct_post(&mut self, post: PostId) -> Result<bool> {
        self.ensure_post(post)?;
        let (author, to_feeds) = {
            let p = self.cached_post(post)?;
            (p.author_id, p.to_feeds.clone())
        };
        self.is_direct_parts(author, &to_feeds)
    }

    pub fn is_group_post(&mut self, post: PostId) -> Result<bool> {
        self.ensure_post(post)?;
        let to_feeds = self.cached_post(post)?.to_feeds.clone();
        self.is_group_parts(&to_feeds)
    }

    /// The author may edit, and so may admins of any group the post targets.
    pub fn can_edit_post(&mut self, post: PostId, user: FeedId) -> Result<bool> {
        self.ensure_post(post)?;
        let (author, to_feeds) = {
            let p = self.cached_post(post)?;
            (p.author_id, p.to_feeds.clone())
        };
        if user == author {
            return Ok(true);
        }
        for target in &to_feeds {
            self.ensure_feed(*target)?;
            if let Some(group) = self.cached_feed(*target)?.as_group() {
                if group.admins.contains(&user) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Projects a post for the requester, or `None` when it is not visible.
    pub fn post_view(&mut self, post: PostId, requester: Option<FeedId>) -> Result<Option<PostView>> {
        let max_likes = self.cfg.max_shown_likes;
        self.build_view(post, requester, None, max_likes)
    }

    pub fn post_view_with_max_likes(
        &mut self,
        post: PostId,
        requester: Option<FeedId>,
        max_likes: usize,
    ) -> Result<Option<PostView>> {
        self.build_view(post, requester, None, max_likes)
    }

    /// Materializes the timeline if it has not been loaded yet.
    pub fn ensure_timeline(&mut self, owner: FeedId, kind: TimelineKind) -> Result<()> {
        if self.timelines.contains_key(&(owner, kind)) {
            return Ok(());
        }
        self.ensure_feed(owner)?;
        match kind {
            TimelineKind::Posts => {
                let ids = self.post_store.load_authored_post_ids(owner)?;
                self.timelines
                    .insert((owner, kind), Timeline::from_parts(ids, HashMap::new()));
            }
            TimelineKind::Likes => {
                let ids = self.post_store.load_liked_post_ids(owner)?;
                let ids = self.filter_engagement_ids(ids)?;
                self.timelines
                    .insert((owner, kind), Timeline::from_parts(ids, HashMap::new()));
            }
            TimelineKind::Comments => {
                let ids = self.post_store.load_commented_post_ids(owner)?;
                let ids = self.filter_engagement_ids(ids)?;
                self.timelines
                    .insert((owner, kind), Timeline::from_parts(ids, HashMap::new()));
            }
            TimelineKind::Home => {
                self.rebuild_home(owner)?;
            }
        }
        Ok(())
    }

    /// Raw id order of a timeline, before any visibility filtering.
    pub fn timeline_post_ids(&mut self, owner: FeedId, kind: TimelineKind) -> Result<Vec<PostId>> {
        self.ensure_timeline(owner, kind)?;
        Ok(self
            .timelines
            .get(&(owner, kind))
            .map(|t| t.post_ids().to_vec())
            .unwrap_or_default())
    }

    /// Recomputes the owner's home feed from scratch.
    ///
    /// Sources are the owner plus their subscriptions. Own posts of every
    /// source come first and carry no reason; then each user source
    /// contributes its liked and commented posts, tagging ids seen for the
    /// first time. The final order is descending by the post's current
    /// `updated_at`, with posts invisible to the owner keyed as zero.
    pub fn rebuild_home(&mut self, owner: FeedId) -> Result<()> {
        self.ensure_feed(owner)?;
        let mut sources: Vec<FeedId> = vec![owner];
        if let Some(state) = self.cached_feed(owner)?.as_user() {
            sources.extend(state.subscriptions.iter().copied());
        }

        let mut ordered: Vec<PostId> = Vec::new();
        let mut seen: HashSet<PostId> = HashSet::new();
        let mut reasons: HashMap<PostId, ShowReason> = HashMap::new();

        for source in &sources {
            self.ensure_timeline(*source, TimelineKind::Posts)?;
            for id in self.timeline_ids_copy(*source, TimelineKind::Posts) {
                if seen.insert(id) {
                    ordered.push(id);
                }
            }
        }
        for source in &sources {
            if !self.cached_feed(*source)?.is_user() {
                continue;
            }
            for (kind, action) in [
                (TimelineKind::Likes, ShowReasonAction::Like),
                (TimelineKind::Comments, ShowReasonAction::Comment),
            ] {
                self.ensure_timeline(*source, kind)?;
                for id in self.timeline_ids_copy(*source, kind) {
                    if seen.insert(id) {
                        ordered.push(id);
                        reasons.insert(
                            id,
                            ShowReason {
                                user_id: *source,
                                action,
                            },
                        );
                    }
                }
            }
        }

        let mut keys: HashMap<PostId, i64> = HashMap::new();
        for id in &ordered {
            let key = if self.is_post_visible(*id, Some(owner))? {
                self.cached_post(*id)?.updated_at
            } else {
                0
            };
            keys.insert(*id, key);
        }
        let mut timeline = Timeline::from_parts(ordered, reasons);
        timeline.sort_by_key_desc(|id| keys.get(&id).copied().unwrap_or(0));
        let count = timeline.len();
        self.timelines.insert((owner, TimelineKind::Home), timeline);
        debug!(owner = owner.raw(), posts = count, "rebuilt home feed");
        Ok(())
    }

    /// The owner's aggregated home feed, as seen by the owner.
    pub fn home_posts(&mut self, owner: FeedId) -> Result<Vec<PostView>> {
        self.timeline_views(owner, TimelineKind::Home, Some(owner), false)
    }

    /// Posts authored by the owner, filtered by the requester's visibility.
    pub fn own_posts(
        &mut self,
        owner: FeedId,
        requester: Option<FeedId>,
    ) -> Result<Vec<PostView>> {
        self.timeline_views(owner, TimelineKind::Posts, requester, false)
    }

    pub fn likes_posts(
        &mut self,
        owner: FeedId,
        requester: Option<FeedId>,
    ) -> Result<Vec<PostView>> {
        self.timeline_views(owner, TimelineKind::Likes, requester, false)
    }

    pub fn comments_posts(
        &mut self,
        owner: FeedId,
        requester: Option<FeedId>,
    ) -> Result<Vec<PostView>> {
        self.timeline_views(owner, TimelineKind::Comments, requester, false)
    }

    /// The owner's direct messages: a filter view over their own posts,
    /// readable by nobody else.
    pub fn direct_posts(
        &mut self,
        owner: FeedId,
        requester: Option<FeedId>,
    ) -> Result<Vec<PostView>> {
        if requester != Some(owner) {
            return Err(Error::Forbidden(
                "direct messages are visible only to their owner",
            ));
        }
        self.timeline_views(owner, TimelineKind::Posts, requester, true)
    }

    fn timeline_views(
        &mut self,
        owner: FeedId,
        kind: TimelineKind,
        requester: Option<FeedId>,
        only_direct: bool,
    ) -> Result<Vec<PostView>> {
        self.ensure_timeline(owner, kind)?;
        let entries: Vec<(PostId, Option<ShowReason>)> = self
            .timelines
            .get(&(owner, kind))
            .map(|t| {
                t.post_ids()
                    .iter()
                    .map(|id| (*id, t.reason_for(*id)))
                    .collect()
            })
            .unwrap_or_default();
        let max_likes = self.cfg.max_shown_likes;
        let mut views = Vec::new();
        for (id, reason) in entries {
            if only_direct && !self.is_direct_post(id)? {
                continue;
            }
            if let Some(view) = self.build_view(id, requester, reason, max_likes)? {
                views.push(view);
            }
        }
        Ok(views)
    }

    fn build_view(
        &mut self,
        post: PostId,
        requester: Option<FeedId>,
        reason: Option<ShowReason>,
        max_likes: usize,
    ) -> Result<Option<PostView>> {
        if !self.is_post_visible(post, requester)? {
            return Ok(None);
        }
        let (id, author_id, created_at, updated_at, body, raw_likes, raw_comments) = {
            let p = self.cached_post(post)?;
            (
                p.id,
                p.author_id,
                p.created_at,
                p.updated_at,
                p.body.clone(),
                p.likes.clone(),
                p.comments.clone(),
            )
        };
        for liker in &raw_likes {
            self.ensure_feed(*liker)?;
        }
        for comment in &raw_comments {
            self.ensure_feed(comment.author_id)?;
        }
        let mut likes: Vec<FeedId> = raw_likes
            .into_iter()
            .filter(|l| !self.is_content_blocked(*l, requester))
            .collect();
        if let Some(r) = requester {
            if let Some(pos) = likes.iter().position(|l| *l == r) {
                if pos > 0 {
                    likes.remove(pos);
                    likes.insert(0, r);
                }
            }
        }
        let omitted_likes = likes.len().saturating_sub(max_likes);
        likes.truncate(max_likes);
        let comments: Vec<Comment> = raw_comments
            .into_iter()
            .filter(|c| !self.is_content_blocked(c.author_id, requester))
            .collect();
        Ok(Some(PostView {
            id,
            author_id,
            created_at,
            updated_at,
            body,
            likes,
            omitted_likes,
            comments,
            reason,
        }))
    }

    fn ensure_feed(&mut self, id: FeedId) -> Result<()> {
        if self.feeds.contains_key(&id) {
            return Ok(());
        }
        let record = self.feed_store.load_feed(id)?.ok_or(Error::NotFound {
            entity: "feed",
            id: id.raw(),
        })?;
        let subscribers: BTreeSet<FeedId> =
            self.feed_store.load_subscribers(id)?.into_iter().collect();
        let kind = match record.kind {
            FeedRecordKind::User => FeedKind::User(UserState {
                email: record.email,
                hashed_password: record.hashed_password,
                subscriptions: self
                    .feed_store
                    .load_subscriptions(id)?
                    .into_iter()
                    .collect(),
                blocked_users: self.feed_store.load_blocks(id)?.into_iter().collect(),
                subscription_requests: self
                    .feed_store
                    .load_subscription_requests(id)?
                    .into_iter()
                    .collect(),
            }),
            FeedRecordKind::Group => FeedKind::Group(GroupState {
                admins: self.feed_store.load_admins(id)?.into_iter().collect(),
            }),
        };
        self.feeds.insert(
            id,
            Feed {
                id,
                user_name: record.user_name,
                screen_name: record.screen_name,
                profile: record.profile,
                private: record.private,
                subscribers,
                kind,
            },
        );
        Ok(())
    }

    fn ensure_post(&mut self, id: PostId) -> Result<()> {
        if self.posts.contains_key(&id) {
            return Ok(());
        }
        let record = self.post_store.load_post(id)?.ok_or(Error::NotFound {
            entity: "post",
            id: id.raw(),
        })?;
        let likes = self.post_store.load_likes(id)?;
        let comments = self
            .post_store
            .load_comments(id)?
            .into_iter()
            .map(|row| Comment {
                id: row.id,
                post_id: row.post_id,
                author_id: row.author_id,
                created_at: row.created_at,
                body: row.body,
            })
            .collect();
        self.posts.insert(
            id,
            Post {
                id,
                author_id: record.author_id,
                created_at: record.created_at,
                updated_at: record.updated_at,
                to_feeds: record.to_feeds,
                body: record.body,
                likes,
                comments,
            },
        );
        Ok(())
    }

    fn cached_feed(&self, id: FeedId) -> Result<&Feed> {
        self.feeds.get(&id).ok_or(Error::NotFound {
            entity: "feed",
            id: id.raw(),
        })
    }

    fn cached_feed_mut(&mut self, id: FeedId) -> Result<&mut Feed> {
        self.feeds.get_mut(&id).ok_or(Error::NotFound {
            entity: "feed",
            id: id.raw(),
        })
    }

    fn cached_post(&self, id: PostId) -> Result<&Post> {
        self.posts.get(&id).ok_or(Error::NotFound {
            entity: "post",
            id: id.raw(),
        })
    }

    fn cached_post_mut(&mut self, id: PostId) -> Result<&mut Post> {
        self.posts.get_mut(&id).ok_or(Error::NotFound {
            entity: "post",
            id: id.raw(),
        })
    }

    fn user_state(&self, id: FeedId) -> Result<&UserState> {
        self.cached_feed(id)?
            .as_user()
            .ok_or_else(|| Error::Validation(format!("feed {} is not a user", id)))
    }

    fn user_state_mut(&mut self, id: FeedId) -> Result<&mut UserState> {
        self.cached_feed_mut(id)?
            .as_user_mut()
            .ok_or_else(|| Error::Validation(format!("feed {} is not a user", id)))
    }

    fn group_state(&self, id: FeedId) -> Result<&GroupState> {
        self.cached_feed(id)?
            .as_group()
            .ok_or_else(|| Error::Validation(format!("feed {} is not a group", id)))
    }

    fn group_state_mut(&mut self, id: FeedId) -> Result<&mut GroupState> {
        self.cached_feed_mut(id)?
            .as_group_mut()
            .ok_or_else(|| Error::Validation(format!("feed {} is not a group", id)))
    }

    /// True when either user blocks the other. Anonymous requesters and
    /// group feeds are never blocked.
    fn is_content_blocked(&self, a: FeedId, b: Option<FeedId>) -> bool {
        let Some(b) = b else {
            return false;
        };
        if a == b {
            return false;
        }
        let a_blocks = self
            .feeds
            .get(&a)
            .and_then(|f| f.as_user())
            .map_or(false, |s| s.blocked_users.contains(&b));
        let b_blocks = self
            .feeds
            .get(&b)
            .and_then(|f| f.as_user())
            .map_or(false, |s| s.blocked_users.contains(&a));
        a_blocks || b_blocks
    }

    /// A private feed is visible only to its subscribers. There is no
    /// exception for the feed's owner.
    fn is_feed_visible(&self, feed: FeedId, requester: Option<FeedId>) -> bool {
        match self.feeds.get(&feed) {
            Some(f) => {
                if !f.private {
                    return true;
                }
                matches!(requester, Some(r) if f.subscribers.contains(&r))
            }
            None => false,
        }
    }

    fn is_direct_parts(&mut self, author: FeedId, to_feeds: &[FeedId]) -> Result<bool> {
        if to_feeds.is_empty() {
            return Ok(false);
        }
        for id in to_feeds {
            if *id == author {
                return Ok(false);
            }
            self.ensure_feed(*id)?;
            if !self.cached_feed(*id)?.is_user() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn is_group_parts(&mut self, to_feeds: &[FeedId]) -> Result<bool> {
        if to_feeds.is_empty() {
            return Ok(false);
        }
        for id in to_feeds {
            self.ensure_feed(*id)?;
            if !self.cached_feed(*id)?.is_group() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn link_subscription(&mut self, subscriber: FeedId, target: FeedId) -> Result<()> {
        self.feed_store.create_subscription(subscriber, target)?;
        self.user_state_mut(subscriber)?.subscriptions.insert(target);
        self.cached_feed_mut(target)?.subscribers.insert(subscriber);
        if self
            .timelines
            .contains_key(&(subscriber, TimelineKind::Home))
        {
            self.rebuild_home(subscriber)?;
        }
        Ok(())
    }

    fn unlink_subscription(&mut self, subscriber: FeedId, target: FeedId) -> Result<()> {
        self.feed_store.remove_subscription(subscriber, target)?;
        self.user_state_mut(subscriber)?.subscriptions.remove(&target);
        self.cached_feed_mut(target)?.subscribers.remove(&subscriber);
        if self
            .timelines
            .contains_key(&(subscriber, TimelineKind::Home))
        {
            self.rebuild_home(subscriber)?;
        }
        Ok(())
    }

    fn with_timeline<F>(&mut self, owner: FeedId, kind: TimelineKind, f: F)
    where
        F: FnOnce(&mut Timeline),
    {
        if let Some(timeline) = self.timelines.get_mut(&(owner, kind)) {
            f(timeline);
        }
    }

    fn timeline_ids_copy(&self, owner: FeedId, kind: TimelineKind) -> Vec<PostId> {
        self.timelines
            .get(&(owner, kind))
            .map(|t| t.post_ids().to_vec())
            .unwrap_or_default()
    }

    /// Drops direct and group-only posts from freshly loaded engagement
    /// timelines, so a load is indistinguishable from the incremental path,
    /// which never adds them.
    fn filter_engagement_ids(&mut self, ids: Vec<PostId>) -> Result<Vec<PostId>> {
        let mut kept = Vec::with_capacity(ids.len());
        for id in ids {
            self.ensure_post(id)?;
            let (author, to_feeds) = {
                let p = self.cached_post(id)?;
                (p.author_id, p.to_feeds.clone())
            };
            if self.is_direct_parts(author, &to_feeds)? || self.is_group_parts(&to_feeds)? {
                continue;
            }
            kept.push(id);
        }
        Ok(kept)
    }

    fn mark_post_updated(&mut self, post: PostId) -> Result<()> {
        let now = self.clock.now_ms();
        self.cached_post_mut(post)?.updated_at = now;
        self.persist_post(post)
    }

    fn persist_post(&mut self, post: PostId) -> Result<()> {
        let record = {
            let p = self.cached_post(post)?;
            PostRecord {
                author_id: p.author_id,
                created_at: p.created_at,
                updated_at: p.updated_at,
                to_feeds: p.to_feeds.clone(),
                body: p.body.clone(),
            }
        };
        self.post_store.update_post(post, &record)?;
        Ok(())
    }

    /// Adds the post to the actor's engagement timeline and to the home feed
    /// of every follower of the actor, tagged with the actor as reason.
    /// Direct and group-only posts never fan out this way.
    fn fan_out_engagement(
        &mut self,
        actor: FeedId,
        post: PostId,
        action: ShowReasonAction,
    ) -> Result<()> {
        let (author, to_feeds) = {
            let p = self.cached_post(post)?;
            (p.author_id, p.to_feeds.clone())
        };
        if self.is_direct_parts(author, &to_feeds)? || self.is_group_parts(&to_feeds)? {
            return Ok(());
        }
        let kind = match action {
            ShowReasonAction::Like => TimelineKind::Likes,
            ShowReasonAction::Comment => TimelineKind::Comments,
            ShowReasonAction::Subscription => return Ok(()),
        };
        self.with_timeline(actor, kind, |t| {
            t.add(post);
        });
        let reason = ShowReason {
            user_id: actor,
            action,
        };
        let followers: Vec<FeedId> =
            self.cached_feed(actor)?.subscribers.iter().copied().collect();
        for follower in followers {
            self.with_timeline(follower, TimelineKind::Home, |t| {
                t.add_with_reason(post, reason);
            });
        }
        Ok(())
    }

    /// Re-surfaces the post for everyone who sees it and follows the actor.
    fn bump_for_seers(&mut self, actor: FeedId, post: PostId) -> Result<()> {
        let seers = self.users_who_see_post(post)?;
        for seer in seers {
            self.ensure_feed(seer)?;
            let follows_actor = self
                .cached_feed(seer)?
                .as_user()
                .map_or(false, |s| s.subscriptions.contains(&actor));
            if follows_actor {
                self.with_timeline(seer, TimelineKind::Home, |t| t.bump(post));
            }
        }
        Ok(())
    }

    /// Subscribers of the author, the target feeds and, unless the post is
    /// group-only, of the likers and commenters. Bounds re-derivation and
    /// removal work; not an access-control check.
    fn users_who_see_post(&mut self, post: PostId) -> Result<BTreeSet<FeedId>> {
        self.ensure_post(post)?;
        let (author, to_feeds, likers, comment_authors) = {
            let p = self.cached_post(post)?;
            (
                p.author_id,
                p.to_feeds.clone(),
                p.likes.clone(),
                p.comments.iter().map(|c| c.author_id).collect::<Vec<_>>(),
            )
        };
        let mut scanned: BTreeSet<FeedId> = BTreeSet::new();
        scanned.insert(author);
        scanned.extend(to_feeds.iter().copied());
        if !self.is_group_parts(&to_feeds)? {
            scanned.extend(likers);
            scanned.extend(comment_authors);
        }
        let mut seers = BTreeSet::new();
        for feed in scanned {
            self.ensure_feed(feed)?;
            seers.extend(self.cached_feed(feed)?.subscribers.iter().copied());
        }
        Ok(seers)
    }

    /// Best remaining reason for the viewer: the author if followed, else the
    /// first followed commenter in comment order, else the first followed
    /// liker in like order.
    fn get_home_feed_reason(&mut self, post: PostId, viewer: FeedId) -> Result<Option<ShowReason>> {
        self.ensure_post(post)?;
        let (author, likers, comment_authors) = {
            let p = self.cached_post(post)?;
            (
                p.author_id,
                p.likes.clone(),
                p.comments.iter().map(|c| c.author_id).collect::<Vec<_>>(),
            )
        };
        self.ensure_feed(viewer)?;
        let subscriptions = match self.cached_feed(viewer)?.as_user() {
            Some(state) => state.subscriptions.clone(),
            None => return Ok(None),
        };
        if subscriptions.contains(&author) {
            return Ok(Some(ShowReason {
                user_id: author,
                action: ShowReasonAction::Subscription,
            }));
        }
        for commenter in comment_authors {
            if subscriptions.contains(&commenter) {
                return Ok(Some(ShowReason {
                    user_id: commenter,
                    action: ShowReasonAction::Comment,
                }));
            }
        }
        for liker in likers {
            if subscriptions.contains(&liker) {
                return Ok(Some(ShowReason {
                    user_id: liker,
                    action: ShowReasonAction::Like,
                }));
            }
        }
        Ok(None)
    }

    /// After a like or comment went away: update every previously-seeing
    /// user's reason, or drop the post from their home feed when no signal
    /// remains.
    fn rederive_reasons(&mut self, post: PostId, seers: &BTreeSet<FeedId>) -> Result<()> {
        for seer in seers {
            let present = self
                .timelines
                .get(&(*seer, TimelineKind::Home))
                .map_or(false, |t| t.contains(post));
            if !present {
                continue;
            }
            match self.get_home_feed_reason(post, *seer)? {
                Some(reason) => {
                    self.with_timeline(*seer, TimelineKind::Home, |t| t.set_reason(post, reason))
                }
                None => self.with_timeline(*seer, TimelineKind::Home, |t| t.remove(post)),
            }
        }
        Ok(())
    }
}
