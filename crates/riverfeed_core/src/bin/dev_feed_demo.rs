/*
 * SPDX-FileCopyrightText: 2026 Riverfeed Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::Result;
use std::sync::Arc;

use riverfeed_core::clock::SystemClock;
use riverfeed_core::engine::{Feeds, FeedsConfig, NewGroup, NewUser};
use riverfeed_core::ids::FeedId;
use riverfeed_core::memory_store::MemoryStore;
use riverfeed_core::model::{PostView, ShowReasonAction};
use riverfeed_core::sqlite_store::SqliteStore;

fn ensure_user(feeds: &mut Feeds, name: &str) -> Result<FeedId> {
    if let Some(id) = feeds.find_feed_by_user_name(name)? {
        return Ok(id);
    }
    Ok(feeds.create_user(NewUser {
        user_name: name.to_string(),
        ..NewUser::default()
    })?)
}

fn ensure_group(feeds: &mut Feeds, creator: FeedId, name: &str) -> Result<FeedId> {
    if let Some(id) = feeds.find_feed_by_user_name(name)? {
        return Ok(id);
    }
    Ok(feeds.create_group(
        creator,
        NewGroup {
            user_name: name.to_string(),
            ..NewGroup::default()
        },
    )?)
}

fn print_posts(feeds: &mut Feeds, label: &str, posts: &[PostView]) -> Result<()> {
    println!("{} ({} posts)", label, posts.len());
    for post in posts {
        let author = feeds.feed(post.author_id)?.user_name.clone();
        let note = match post.reason {
            None => String::new(),
            Some(r) => {
                let who = feeds.feed(r.user_id)?.user_name.clone();
                match r.action {
                    ShowReasonAction::Subscription => format!("  [posted by {}]", who),
                    ShowReasonAction::Like => format!("  [liked by {}]", who),
                    ShowReasonAction::Comment => format!("  [commented by {}]", who),
                }
            }
        };
        println!("  {}: {}{}", author, post.body, note);
        for comment in &post.comments {
            let who = feeds.feed(comment.author_id)?.user_name.clone();
            println!("    - {}: {}", who, comment.body);
        }
        if post.omitted_likes > 0 {
            println!("    ({} likes shown, {} omitted)", post.likes.len(), post.omitted_likes);
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("info".parse().unwrap()),
        )
        .init();

    let body = std::env::var("RIVERFEED_BODY")
        .unwrap_or_else(|_| "Planted the first tomatoes today".to_string());
    let mut feeds = match std::env::var("RIVERFEED_DB") {
        Ok(path) => {
            let store = Arc::new(SqliteStore::open(&path)?);
            Feeds::new(
                store.clone(),
                store,
                Arc::new(SystemClock),
                FeedsConfig::default(),
            )
        }
        Err(_) => {
            let store = Arc::new(MemoryStore::new());
            Feeds::new(
                store.clone(),
                store,
                Arc::new(SystemClock),
                FeedsConfig::default(),
            )
        }
    };

    let ada = ensure_user(&mut feeds, "ada")?;
    let ben = ensure_user(&mut feeds, "ben")?;
    let cara = ensure_user(&mut feeds, "cara")?;
    let garden = ensure_group(&mut feeds, ada, "gardeners")?;

    feeds.subscribe_to(ben, ada)?;
    feeds.subscribe_to(cara, ben)?;
    feeds.subscribe_to(ada, ben)?;
    feeds.subscribe_to(ben, garden)?;

    let post = feeds.publish_post(ada, &body)?;
    feeds.like_post(ben, post)?;
    feeds.comment_on_post(ben, post, "Save me some seedlings")?;
    feeds.publish_post_to(ben, &[garden], "Meeting at the greenhouse on Friday")?;
    feeds.publish_post_to(ada, &[ben], "Your trowel is still in my shed")?;

    for (name, id) in [("ada", ada), ("ben", ben), ("cara", cara)] {
        let posts = feeds.home_posts(id)?;
        print_posts(&mut feeds, &format!("home feed of {}", name), &posts)?;
    }
    let directs = feeds.direct_posts(ada, Some(ada))?;
    print_posts(&mut feeds, "direct messages of ada", &directs)?;

    Ok(())
}
