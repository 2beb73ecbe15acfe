/*
 * SPDX-FileCopyrightText: 2026 Riverfeed Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Riverfeed core: a social-graph and timeline engine.
//!
//! Users and groups are both feeds in one identity graph; posts flow into
//! per-feed timelines by fan-out on write, and every aggregated home feed
//! stays explainable through show reasons. State lives behind the store
//! traits in [`store`], with SQLite and in-memory backends.

pub mod clock;
pub mod engine;
pub mod error;
pub mod ids;
pub mod memory_store;
pub mod model;
pub mod sqlite_store;
pub mod store;
