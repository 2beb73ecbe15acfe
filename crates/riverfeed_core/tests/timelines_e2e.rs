/*
 * SPDX-FileCopyrightText: 2026 Riverfeed Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Home-feed integration tests: fan-out on write, show reasons, direct
//! messages and group routing, and the equivalence between the incremental
//! write path and a rebuild from the store.

use std::sync::Arc;

use riverfeed_core::clock::StepClock;
use riverfeed_core::engine::{Feeds, FeedsConfig, NewGroup, NewUser};
use riverfeed_core::error::Error;
use riverfeed_core::ids::FeedId;
use riverfeed_core::memory_store::MemoryStore;
use riverfeed_core::model::{PostView, ShowReason, ShowReasonAction, TimelineKind};

struct World {
    store: Arc<MemoryStore>,
    clock: Arc<StepClock>,
    feeds: Feeds,
}

impl World {
    fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(StepClock::starting_at(1));
        let feeds = Feeds::new(
            store.clone(),
            store.clone(),
            clock.clone(),
            FeedsConfig::default(),
        );
        World { store, clock, feeds }
    }

    /// Fresh engine over the same backing store, as after a restart.
    fn reload(&mut self) {
        self.feeds = Feeds::new(
            self.store.clone(),
            self.store.clone(),
            self.clock.clone(),
            FeedsConfig::default(),
        );
    }

    /// Creates a user and materializes all four of their timelines, so the
    /// incremental write path keeps them current from the start.
    fn user(&mut self, name: &str) -> FeedId {
        let id = self
            .feeds
            .create_user(NewUser {
                user_name: name.to_string(),
                ..NewUser::default()
            })
            .unwrap();
        for kind in [
            TimelineKind::Home,
            TimelineKind::Posts,
            TimelineKind::Likes,
            TimelineKind::Comments,
        ] {
            self.feeds.ensure_timeline(id, kind).unwrap();
        }
        id
    }

    fn group(&mut self, creator: FeedId, name: &str) -> FeedId {
        self.feeds
            .create_group(
                creator,
                NewGroup {
                    user_name: name.to_string(),
                    ..NewGroup::default()
                },
            )
            .unwrap()
    }

    fn home(&mut self, user: FeedId) -> Vec<PostView> {
        self.feeds.home_posts(user).unwrap()
    }

    fn home_bodies(&mut self, user: FeedId) -> Vec<String> {
        self.home(user).into_iter().map(|p| p.body).collect()
    }

    fn home_raw_len(&mut self, user: FeedId) -> usize {
        self.feeds
            .timeline_post_ids(user, TimelineKind::Home)
            .unwrap()
            .len()
    }
}

// ============================================================================
// Home feed basics
// ============================================================================

#[test]
fn home_feed_carries_own_and_subscribed_posts() {
    let mut w = World::new();
    let alpha = w.user("alpha");
    let beta = w.user("beta");
    w.feeds.subscribe_to(beta, alpha).unwrap();

    w.feeds.publish_post(alpha, "from alpha").unwrap();
    w.feeds.publish_post(beta, "from beta").unwrap();

    assert_eq!(w.home_bodies(alpha), vec!["from alpha"]);
    assert_eq!(w.home_bodies(beta), vec!["from beta", "from alpha"]);
}

#[test]
fn liking_does_not_reorder_the_likers_own_home() {
    let mut w = World::new();
    let alpha = w.user("alpha");
    let beta = w.user("beta");
    w.feeds.subscribe_to(beta, alpha).unwrap();

    let one = w.feeds.publish_post(alpha, "one").unwrap();
    w.feeds.publish_post(alpha, "two").unwrap();
    assert_eq!(w.home_bodies(beta), vec!["two", "one"]);

    // nobody follows themselves, so the actor's own feed keeps its order
    w.feeds.like_post(beta, one).unwrap();
    assert_eq!(w.home_bodies(beta), vec!["two", "one"]);
}

#[test]
fn bump_skips_watchers_not_following_the_actor() {
    let mut w = World::new();
    let alpha = w.user("alpha");
    let beta = w.user("beta");
    let gamma = w.user("gamma");
    w.feeds.subscribe_to(beta, alpha).unwrap();
    // gamma sees alpha's posts too but beta does not follow gamma
    w.feeds.subscribe_to(gamma, alpha).unwrap();

    let one = w.feeds.publish_post(alpha, "one").unwrap();
    w.feeds.publish_post(alpha, "two").unwrap();
    w.feeds.like_post(gamma, one).unwrap();

    assert_eq!(w.home_bodies(beta), vec!["two", "one"]);
    assert!(w.home(beta)[1].reason.is_none());
}

#[test]
fn bump_resurfaces_for_watchers_following_the_actor() {
    let mut w = World::new();
    let alpha = w.user("alpha");
    let beta = w.user("beta");
    let gamma = w.user("gamma");
    w.feeds.subscribe_to(beta, alpha).unwrap();
    w.feeds.subscribe_to(beta, gamma).unwrap();
    w.feeds.subscribe_to(gamma, alpha).unwrap();

    let one = w.feeds.publish_post(alpha, "one").unwrap();
    w.feeds.publish_post(alpha, "two").unwrap();
    w.feeds.like_post(gamma, one).unwrap();

    assert_eq!(w.home_bodies(beta), vec!["one", "two"]);
    // the entry came from the subscription to alpha, so no like tag is shown
    assert!(w.home(beta)[0].reason.is_none());
}

// ============================================================================
// Show reasons
// ============================================================================

#[test]
fn a_like_tags_the_post_for_followers_of_the_liker() {
    let mut w = World::new();
    let alpha = w.user("alpha");
    let liker = w.user("liker");
    let fan = w.user("fan");
    w.feeds.subscribe_to(liker, alpha).unwrap();
    w.feeds.subscribe_to(fan, liker).unwrap();

    let post = w.feeds.publish_post(alpha, "seen via like").unwrap();
    assert_eq!(w.home_raw_len(fan), 0);

    w.feeds.like_post(liker, post).unwrap();
    let entries = w.home(fan);
    assert_eq!(entries.len(), 1);
    assert_eq!(
        entries[0].reason,
        Some(ShowReason {
            user_id: liker,
            action: ShowReasonAction::Like,
        })
    );

    w.reload();
    let entries = w.home(fan);
    assert_eq!(entries.len(), 1);
    assert_eq!(
        entries[0].reason,
        Some(ShowReason {
            user_id: liker,
            action: ShowReasonAction::Like,
        })
    );
}

#[test]
fn a_comment_tags_the_post_for_followers_of_the_commenter() {
    let mut w = World::new();
    let alpha = w.user("alpha");
    let commenter = w.user("commenter");
    let fan = w.user("fan");
    w.feeds.subscribe_to(commenter, alpha).unwrap();
    w.feeds.subscribe_to(fan, commenter).unwrap();

    let post = w.feeds.publish_post(alpha, "seen via comment").unwrap();
    w.feeds.comment_on_post(commenter, post, "look").unwrap();

    let entries = w.home(fan);
    assert_eq!(entries.len(), 1);
    assert_eq!(
        entries[0].reason,
        Some(ShowReason {
            user_id: commenter,
            action: ShowReasonAction::Comment,
        })
    );
}

#[test]
fn author_subscription_outranks_like_and_comment_tags() {
    let mut w = World::new();
    let author = w.user("author");
    let liker = w.user("liker");
    let commenter = w.user("commenter");
    let viewer = w.user("viewer");
    w.feeds.subscribe_to(liker, author).unwrap();
    w.feeds.subscribe_to(commenter, author).unwrap();
    for followed in [author, liker, commenter] {
        w.feeds.subscribe_to(viewer, followed).unwrap();
    }

    let post = w.feeds.publish_post(author, "talked about").unwrap();
    w.feeds.like_post(liker, post).unwrap();
    w.feeds.comment_on_post(commenter, post, "hm").unwrap();

    // the entry came from the author subscription; engagement does not retag it
    assert!(w.home(viewer)[0].reason.is_none());

    // once the like disappears the reason is re-derived, and the author
    // subscription wins over the remaining comment
    w.feeds.unlike_post(liker, post).unwrap();
    assert_eq!(
        w.home(viewer)[0].reason,
        Some(ShowReason {
            user_id: author,
            action: ShowReasonAction::Subscription,
        })
    );
}

#[test]
fn unlike_drops_the_post_for_engagement_only_followers() {
    let mut w = World::new();
    let alpha = w.user("alpha");
    let liker = w.user("liker");
    let fan = w.user("fan");
    w.feeds.subscribe_to(liker, alpha).unwrap();
    w.feeds.subscribe_to(fan, liker).unwrap();

    let post = w.feeds.publish_post(alpha, "fleeting").unwrap();
    w.feeds.like_post(liker, post).unwrap();
    assert_eq!(w.home_raw_len(fan), 1);

    w.feeds.unlike_post(liker, post).unwrap();
    assert_eq!(w.home_raw_len(fan), 0);
    assert!(w.home_bodies(fan).is_empty());
}

#[test]
fn unlike_rederives_the_reason_from_the_remaining_liker() {
    let mut w = World::new();
    let alpha = w.user("alpha");
    let first = w.user("first");
    let second = w.user("second");
    let fan = w.user("fan");
    w.feeds.subscribe_to(first, alpha).unwrap();
    w.feeds.subscribe_to(second, alpha).unwrap();
    w.feeds.subscribe_to(fan, first).unwrap();
    w.feeds.subscribe_to(fan, second).unwrap();

    let post = w.feeds.publish_post(alpha, "shared taste").unwrap();
    w.feeds.like_post(first, post).unwrap();
    w.feeds.like_post(second, post).unwrap();
    assert_eq!(
        w.home(fan)[0].reason,
        Some(ShowReason {
            user_id: first,
            action: ShowReasonAction::Like,
        })
    );

    w.feeds.unlike_post(first, post).unwrap();
    assert_eq!(
        w.home(fan)[0].reason,
        Some(ShowReason {
            user_id: second,
            action: ShowReasonAction::Like,
        })
    );
}

#[test]
fn deleting_the_only_comment_drops_the_post_for_its_audience() {
    let mut w = World::new();
    let alpha = w.user("alpha");
    let commenter = w.user("commenter");
    let fan = w.user("fan");
    w.feeds.subscribe_to(commenter, alpha).unwrap();
    w.feeds.subscribe_to(fan, commenter).unwrap();

    let post = w.feeds.publish_post(alpha, "debated").unwrap();
    let comment = w.feeds.comment_on_post(commenter, post, "hot take").unwrap();
    assert_eq!(w.home_raw_len(fan), 1);

    // the post author moderates the comment away
    w.feeds.delete_comment(alpha, post, comment).unwrap();
    assert_eq!(w.home_raw_len(fan), 0);
    assert!(w
        .feeds
        .timeline_post_ids(commenter, TimelineKind::Comments)
        .unwrap()
        .is_empty());
}

// ============================================================================
// Reload equivalence
// ============================================================================

#[test]
fn an_observers_home_feed_is_identical_after_reload() {
    let mut w = World::new();
    let alpha = w.user("alpha");
    let beta = w.user("beta");
    let gamma = w.user("gamma");
    w.feeds.subscribe_to(beta, alpha).unwrap();
    w.feeds.subscribe_to(gamma, alpha).unwrap();
    w.feeds.subscribe_to(gamma, beta).unwrap();

    let dawn = w.feeds.publish_post(alpha, "dawn").unwrap();
    let noon = w.feeds.publish_post(alpha, "noon").unwrap();
    w.feeds.like_post(beta, dawn).unwrap();
    w.feeds.publish_post(beta, "dusk").unwrap();
    w.feeds.comment_on_post(beta, noon, "agreed").unwrap();

    let live = w.home_bodies(gamma);
    assert_eq!(live, vec!["noon", "dusk", "dawn"]);
    let live_reasons: Vec<Option<ShowReason>> =
        w.home(gamma).into_iter().map(|p| p.reason).collect();

    w.reload();
    assert_eq!(w.home_bodies(gamma), live);
    let rebuilt_reasons: Vec<Option<ShowReason>> =
        w.home(gamma).into_iter().map(|p| p.reason).collect();
    assert_eq!(rebuilt_reasons, live_reasons);
}

#[test]
fn invisible_posts_stay_out_of_home_reads_after_reload() {
    let mut w = World::new();
    let alpha = w.user("alpha");
    let beta = w.user("beta");
    let gamma = w.user("gamma");
    w.feeds.subscribe_to(gamma, alpha).unwrap();
    w.feeds.subscribe_to(gamma, beta).unwrap();
    w.feeds.publish_post(alpha, "stays").unwrap();
    w.feeds.publish_post(beta, "goes").unwrap();

    // blocking severs the link and hides beta's post
    w.feeds.block_user(gamma, beta).unwrap();
    assert_eq!(w.home_bodies(gamma), vec!["stays"]);
    w.reload();
    assert_eq!(w.home_bodies(gamma), vec!["stays"]);
}

// ============================================================================
// Direct messages
// ============================================================================

#[test]
fn directs_require_mutual_subscription() {
    let mut w = World::new();
    let alpha = w.user("alpha");
    let beta = w.user("beta");
    w.feeds.subscribe_to(alpha, beta).unwrap();
    let err = w
        .feeds
        .publish_post_to(alpha, &[beta], "too soon")
        .unwrap_err();
    assert!(matches!(err, Error::Forbidden(_)));

    w.feeds.subscribe_to(beta, alpha).unwrap();
    let dm = w.feeds.publish_post_to(alpha, &[beta], "hello").unwrap();
    assert!(w.feeds.is_direct_post(dm).unwrap());
}

#[test]
fn directs_cannot_mix_own_feed_and_recipients() {
    let mut w = World::new();
    let alpha = w.user("alpha");
    let beta = w.user("beta");
    w.feeds.subscribe_to(alpha, beta).unwrap();
    w.feeds.subscribe_to(beta, alpha).unwrap();
    let err = w
        .feeds
        .publish_post_to(alpha, &[alpha, beta], "confused")
        .unwrap_err();
    assert!(matches!(err, Error::Forbidden(_)));
}

#[test]
fn directs_reach_only_the_participants() {
    let mut w = World::new();
    let alpha = w.user("alpha");
    let beta = w.user("beta");
    let fan = w.user("fan");
    w.feeds.subscribe_to(alpha, beta).unwrap();
    w.feeds.subscribe_to(beta, alpha).unwrap();
    w.feeds.subscribe_to(fan, alpha).unwrap();

    w.feeds.publish_post_to(alpha, &[beta], "between us").unwrap();
    assert_eq!(w.home_bodies(alpha), vec!["between us"]);
    assert_eq!(w.home_bodies(beta), vec!["between us"]);
    assert_eq!(w.home_raw_len(fan), 0);

    // the recipient reads it through the author's posts, a bystander cannot
    assert_eq!(
        w.feeds.own_posts(alpha, Some(beta)).unwrap().len(),
        1
    );
    assert!(w.feeds.own_posts(alpha, Some(fan)).unwrap().is_empty());
    assert!(w.feeds.own_posts(alpha, None).unwrap().is_empty());

    w.reload();
    assert!(w.home_bodies(fan).is_empty());
    assert_eq!(w.home_bodies(beta), vec!["between us"]);
}

#[test]
fn the_direct_timeline_is_owner_only_and_directs_only() {
    let mut w = World::new();
    let alpha = w.user("alpha");
    let beta = w.user("beta");
    w.feeds.subscribe_to(alpha, beta).unwrap();
    w.feeds.subscribe_to(beta, alpha).unwrap();
    w.feeds.publish_post(alpha, "public note").unwrap();
    w.feeds.publish_post_to(alpha, &[beta], "private note").unwrap();

    let directs = w.feeds.direct_posts(alpha, Some(alpha)).unwrap();
    assert_eq!(
        directs.iter().map(|p| p.body.as_str()).collect::<Vec<_>>(),
        vec!["private note"]
    );

    let err = w.feeds.direct_posts(alpha, Some(beta)).unwrap_err();
    assert!(matches!(err, Error::Forbidden(_)));
    let err = w.feeds.direct_posts(alpha, None).unwrap_err();
    assert!(matches!(err, Error::Forbidden(_)));
}

#[test]
fn likes_on_directs_stay_out_of_likes_timelines() {
    let mut w = World::new();
    let alpha = w.user("alpha");
    let beta = w.user("beta");
    w.feeds.subscribe_to(alpha, beta).unwrap();
    w.feeds.subscribe_to(beta, alpha).unwrap();
    let dm = w.feeds.publish_post_to(alpha, &[beta], "liked dm").unwrap();

    w.feeds.like_post(beta, dm).unwrap();
    let view = w.feeds.post_view(dm, Some(alpha)).unwrap().unwrap();
    assert_eq!(view.likes, vec![beta]);
    assert!(w
        .feeds
        .timeline_post_ids(beta, TimelineKind::Likes)
        .unwrap()
        .is_empty());
    w.reload();
    assert!(w
        .feeds
        .timeline_post_ids(beta, TimelineKind::Likes)
        .unwrap()
        .is_empty());
}

// ============================================================================
// Groups
// ============================================================================

#[test]
fn group_posts_reach_group_subscribers() {
    let mut w = World::new();
    let founder = w.user("founder");
    let member = w.user("member");
    let outsider = w.user("outsider");
    let club = w.group(founder, "club");
    w.feeds.subscribe_to(member, club).unwrap();

    let post = w.feeds.publish_post_to(member, &[club], "meeting notes").unwrap();
    assert_eq!(w.home_bodies(founder), vec!["meeting notes"]);
    assert_eq!(w.home_bodies(member), vec!["meeting notes"]);
    assert_eq!(w.home_raw_len(outsider), 0);

    // the group feed itself authors nothing
    assert!(w
        .feeds
        .timeline_post_ids(club, TimelineKind::Posts)
        .unwrap()
        .is_empty());
    // the author keeps it in their own posts
    assert_eq!(
        w.feeds.timeline_post_ids(member, TimelineKind::Posts).unwrap(),
        vec![post]
    );
}

#[test]
fn non_subscribers_cannot_post_to_a_group() {
    let mut w = World::new();
    let founder = w.user("founder");
    let outsider = w.user("outsider");
    let club = w.group(founder, "club");
    let err = w
        .feeds
        .publish_post_to(outsider, &[club], "barging in")
        .unwrap_err();
    assert!(matches!(err, Error::Forbidden(_)));
}

#[test]
fn crossposting_to_own_feed_and_group_lands_once() {
    let mut w = World::new();
    let founder = w.user("founder");
    let member = w.user("member");
    let fan = w.user("fan");
    let club = w.group(founder, "club");
    w.feeds.subscribe_to(member, club).unwrap();
    w.feeds.subscribe_to(fan, member).unwrap();

    w.feeds
        .publish_post_to(member, &[member, club], "everywhere at once")
        .unwrap();
    // fan follows the author, founder only the group; each sees it once
    assert_eq!(w.home_bodies(fan), vec!["everywhere at once"]);
    assert_eq!(w.home_bodies(founder), vec!["everywhere at once"]);
    assert_eq!(w.home_raw_len(member), 1);
}

#[test]
fn liking_a_group_post_does_not_spread_it() {
    let mut w = World::new();
    let founder = w.user("founder");
    let member = w.user("member");
    let fan = w.user("fan");
    let club = w.group(founder, "club");
    w.feeds.subscribe_to(member, club).unwrap();
    w.feeds.subscribe_to(fan, member).unwrap();

    let post = w.feeds.publish_post_to(founder, &[club], "club only").unwrap();
    w.feeds.like_post(member, post).unwrap();

    // the like shows on the post but creates no entries anywhere
    let view = w.feeds.post_view(post, Some(founder)).unwrap().unwrap();
    assert_eq!(view.likes, vec![member]);
    assert_eq!(w.home_raw_len(fan), 0);
    assert!(w
        .feeds
        .timeline_post_ids(member, TimelineKind::Likes)
        .unwrap()
        .is_empty());
    w.reload();
    assert!(w
        .feeds
        .timeline_post_ids(member, TimelineKind::Likes)
        .unwrap()
        .is_empty());
}

#[test]
fn group_admins_can_delete_group_posts() {
    let mut w = World::new();
    let founder = w.user("founder");
    let member = w.user("member");
    let bystander = w.user("bystander");
    let club = w.group(founder, "club");
    w.feeds.subscribe_to(member, club).unwrap();
    w.feeds.subscribe_to(bystander, club).unwrap();

    let post = w.feeds.publish_post_to(member, &[club], "spam").unwrap();
    let err = w.feeds.delete_post(bystander, post).unwrap_err();
    assert!(matches!(err, Error::Forbidden(_)));

    w.feeds.delete_post(founder, post).unwrap();
    assert!(w
        .feeds
        .timeline_post_ids(member, TimelineKind::Posts)
        .unwrap()
        .is_empty());
    for user in [founder, member, bystander] {
        assert_eq!(w.home_raw_len(user), 0, "home of {} not scrubbed", user);
    }
}

#[test]
fn private_group_posts_require_membership() {
    let mut w = World::new();
    let founder = w.user("founder");
    let member = w.user("member");
    let outsider = w.user("outsider");
    let lodge = w
        .feeds
        .create_group(
            founder,
            NewGroup {
                user_name: "lodge".to_string(),
                private: true,
                ..NewGroup::default()
            },
        )
        .unwrap();
    // private groups are joined directly, unlike private users
    w.feeds.subscribe_to(member, lodge).unwrap();

    let post = w.feeds.publish_post_to(founder, &[lodge], "handshake").unwrap();
    assert!(w.feeds.post_view(post, Some(member)).unwrap().is_some());
    assert!(w.feeds.post_view(post, Some(outsider)).unwrap().is_none());
    assert!(w.feeds.post_view(post, None).unwrap().is_none());
}
