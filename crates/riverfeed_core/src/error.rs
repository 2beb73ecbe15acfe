/*
 * SPDX-FileCopyrightText: 2026 Riverfeed Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use thiserror::Error;

/// Failures surfaced by engine operations.
///
/// Every kind is terminal for the current action; checks run before any
/// mutation, so committed state is never left half-updated.
#[derive(Debug, Error)]
pub enum Error {
    /// An entity referenced by id has no stored record.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// The acting user is not allowed to perform the operation.
    #[error("forbidden: {0}")]
    Forbidden(&'static str),

    /// A structural rule is violated (duplicate user name, self-subscription).
    #[error("validation failed: {0}")]
    Validation(String),

    /// Malformed caller input, detected before it reaches the model.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The storage collaborator failed.
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
