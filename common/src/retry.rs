// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bounded retry for optimistic-concurrency collisions
//!
//! Status and label mutations against shared objects are fetch-then-write
//! under an opaque resource version.  When two writers race, the loser gets
//! [`Error::Conflict`] and simply needs to re-fetch and re-apply.  This
//! module provides the one combinator used everywhere for that: a bounded
//! number of attempts, retrying only on errors matching a classification
//! predicate, aborting immediately on anything else.

use crate::api::external::Error;
use std::future::Future;
use std::time::Duration;

/// How many times to attempt an operation and how long to pause between
/// attempts
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> RetryPolicy {
        RetryPolicy { max_attempts: 5, interval: Duration::from_millis(10) }
    }
}

/// Runs `op` until it succeeds, it fails with an error not matching
/// `retriable`, or the attempt budget is exhausted
///
/// `op` must be a complete fetch-modify-write closure: each attempt re-fetches
/// the object so that it observes the state that won the race.  The last
/// error is returned when the budget runs out.
pub async fn retry_if<T, F, Fut, P>(
    policy: &RetryPolicy,
    retriable: P,
    mut op: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
    P: Fn(&Error) -> bool,
{
    let mut last_error = None;
    for attempt in 0..policy.max_attempts {
        if attempt > 0 {
            tokio::time::sleep(policy.interval).await;
        }
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) if retriable(&error) => {
                last_error = Some(error);
            }
            Err(error) => return Err(error),
        }
    }
    // max_attempts is never 0 in practice, but don't panic on a
    // zero-attempt policy.
    Err(last_error
        .unwrap_or_else(|| Error::internal_error("retry budget was zero")))
}

/// [`retry_if`] specialized to optimistic-concurrency collisions
pub async fn retry_on_conflict<T, F, Fut>(
    policy: &RetryPolicy,
    op: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    retry_if(policy, Error::is_conflict, op).await
}
