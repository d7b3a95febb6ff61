// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interface to the impersonation authorization oracle
//!
//! The oracle is an external decision service (in production, subject access
//! review against the management cluster).  Implementations typically issue
//! a blocking network call; they must honor the request's deadline, and the
//! returned future is dropped promptly when the request is cancelled.

use async_trait::async_trait;
use flotilla_common::api::external::Error;
use std::collections::BTreeMap;

/// Asks whether an authenticated user may substitute parts of their
/// identity
///
/// Each dimension is gated independently: a user allowed to impersonate a
/// user name is not thereby allowed to impersonate groups or extra
/// attributes.
#[async_trait]
pub trait SubjectAccessReview: Send + Sync {
    /// May `user` execute as `impersonated_user`?
    async fn user_can_impersonate_user(
        &self,
        user: &str,
        impersonated_user: &str,
    ) -> Result<bool, Error>;

    /// May `user` execute with exactly this group set?
    async fn user_can_impersonate_groups(
        &self,
        user: &str,
        groups: &[String],
    ) -> Result<bool, Error>;

    /// May `user` execute with exactly these extra attributes?
    async fn user_can_impersonate_extras(
        &self,
        user: &str,
        extras: &BTreeMap<String, Vec<String>>,
    ) -> Result<bool, Error>;
}
