// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The impersonation gate
//!
//! Invoked once per inbound request, after primary authentication has
//! produced a base identity.  The gate reads the impersonation headers,
//! records the raw request into the audit context, authorizes each requested
//! substitution dimension against the oracle, and produces the effective
//! identity for the rest of the request pipeline.
//!
//! The header surface matches the platform convention exactly:
//!
//! ```text
//! Impersonate-User: alice
//! Impersonate-Group: devs            (repeatable)
//! Impersonate-Extra-acme.com%2fteam: blue    (repeatable)
//! ```
//!
//! Extra-attribute header keys are percent-encoded and folded to lowercase;
//! a malformed encoding falls back to the raw key rather than failing the
//! request.

use crate::authn::AuditInfo;
use crate::authn::Error;
use crate::authn::GROUP_ALL_AUTHENTICATED;
use crate::authn::ImpersonationTarget;
use crate::authn::SERVICE_ACCOUNT_USERNAME_PREFIX;
use crate::authn::UserInfo;
use crate::authz::SubjectAccessReview;
use http::HeaderMap;
use percent_encoding::percent_decode_str;
use slog::Logger;
use slog::debug;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

pub const IMPERSONATE_USER_HEADER: &str = "impersonate-user";
pub const IMPERSONATE_GROUP_HEADER: &str = "impersonate-group";
pub const IMPERSONATE_EXTRA_HEADER_PREFIX: &str = "impersonate-extra-";

/// The raw substitution a request asked for, parsed off its headers
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ImpersonationRequest {
    pub user: Option<String>,
    pub groups: Vec<String>,
    pub extra: BTreeMap<String, Vec<String>>,
}

/// The gate's output: the identity to use for the rest of the request
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImpersonationDecision {
    pub user: UserInfo,
    /// Whether a substitution actually occurred
    pub impersonated: bool,
}

/// Parses the impersonation headers off a request
///
/// Header values must be visible ASCII; anything else is a client error.
/// Extra keys are percent-decoded with fallback to the raw key.
pub fn parse_impersonation_headers(
    headers: &HeaderMap,
) -> Result<ImpersonationRequest, Error> {
    let mut request = ImpersonationRequest::default();

    if let Some(value) = headers.get(IMPERSONATE_USER_HEADER) {
        let user = value
            .to_str()
            .map_err(|e| Error::BadFormat {
                source: anyhow::Error::new(e)
                    .context("Impersonate-User value"),
            })?
            .to_string();
        request.user = Some(user);
    }

    for value in headers.get_all(IMPERSONATE_GROUP_HEADER) {
        let group = value
            .to_str()
            .map_err(|e| Error::BadFormat {
                source: anyhow::Error::new(e)
                    .context("Impersonate-Group value"),
            })?
            .to_string();
        request.groups.push(group);
    }

    for (name, value) in headers.iter() {
        // HeaderName is already folded to lowercase.
        let Some(suffix) =
            name.as_str().strip_prefix(IMPERSONATE_EXTRA_HEADER_PREFIX)
        else {
            continue;
        };
        let key = match percent_decode_str(suffix).decode_utf8() {
            Ok(decoded) => decoded.to_string(),
            // Not decodable; keep the raw key instead of failing the
            // request.
            Err(_) => suffix.to_string(),
        };
        let value = value
            .to_str()
            .map_err(|e| Error::BadFormat {
                source: anyhow::Error::new(e)
                    .context(format!("Impersonate-Extra {:?} value", key)),
            })?
            .to_string();
        request.extra.entry(key).or_default().push(value);
    }

    Ok(request)
}

/// Order-independent set comparison of group lists
fn groups_equal(left: &[String], right: &[String]) -> bool {
    if left.len() != right.len() {
        return false;
    }
    left.iter().collect::<BTreeSet<_>>() == right.iter().collect::<BTreeSet<_>>()
}

/// Decides whether an authenticated caller may execute as a different
/// identity
///
/// Constructed without an oracle, the gate accepts impersonation headers
/// unchecked; that is a supported deployment mode for embedded setups, not
/// an error.
pub struct ImpersonationGate {
    oracle: Option<Arc<dyn SubjectAccessReview>>,
    log: Logger,
}

impl ImpersonationGate {
    pub fn new(
        oracle: Option<Arc<dyn SubjectAccessReview>>,
        log: Logger,
    ) -> ImpersonationGate {
        ImpersonationGate { oracle, log }
    }

    /// Runs the decision sequence for one request
    ///
    /// The raw requested user and groups are recorded into `audit` whether
    /// or not the substitution is ultimately authorized.
    pub async fn authorize(
        &self,
        base: &UserInfo,
        headers: &HeaderMap,
        audit: &mut AuditInfo,
    ) -> Result<ImpersonationDecision, Error> {
        let request = parse_impersonation_headers(headers)?;
        audit.request_user = request.user.clone();
        audit.request_groups = request.groups.clone();

        let user_requested = request
            .user
            .as_deref()
            .map(|u| u != base.name)
            .unwrap_or(false);
        let groups_requested = !request.groups.is_empty()
            && !groups_equal(&request.groups, &base.groups);
        let extras_requested = !request.extra.is_empty();

        if !user_requested && !groups_requested && !extras_requested {
            return Ok(ImpersonationDecision {
                user: base.clone(),
                impersonated: false,
            });
        }

        if user_requested {
            let target = request.user.as_deref().unwrap();
            if target.starts_with(SERVICE_ACCOUNT_USERNAME_PREFIX) {
                // Becoming a provisioned service identity also requires
                // exchanging for that identity's credential downstream.
                // Neither the authorization rule nor the exchange is
                // designed yet, so this path fails closed.
                return Err(Error::ServiceAccountImpersonation {
                    name: target.to_string(),
                });
            }
        }

        if let Some(oracle) = &self.oracle {
            if user_requested {
                let target = request.user.as_deref().unwrap();
                match oracle
                    .user_can_impersonate_user(&base.name, target)
                    .await
                {
                    Ok(true) => {}
                    Ok(false) => {
                        return Err(Error::ImpersonationDenied {
                            target: ImpersonationTarget::User(
                                target.to_string(),
                            ),
                        });
                    }
                    Err(source) => {
                        return Err(Error::OracleFailure { source });
                    }
                }
            }

            if groups_requested {
                match oracle
                    .user_can_impersonate_groups(&base.name, &request.groups)
                    .await
                {
                    Ok(true) => {}
                    Ok(false) => {
                        return Err(Error::ImpersonationDenied {
                            target: ImpersonationTarget::Groups(
                                request.groups.clone(),
                            ),
                        });
                    }
                    Err(source) => {
                        return Err(Error::OracleFailure { source });
                    }
                }
            }

            if extras_requested {
                match oracle
                    .user_can_impersonate_extras(&base.name, &request.extra)
                    .await
                {
                    Ok(true) => {}
                    Ok(false) => {
                        return Err(Error::ImpersonationDenied {
                            target: ImpersonationTarget::Extras,
                        });
                    }
                    Err(source) => {
                        return Err(Error::OracleFailure { source });
                    }
                }
            }
        }

        if !user_requested {
            // Group or extra substitution alone does not replace the
            // identity; the request proceeds as the base user with their
            // original extras.
            return Ok(ImpersonationDecision {
                user: base.clone(),
                impersonated: false,
            });
        }

        let name = request.user.clone().unwrap();
        let mut groups = if groups_requested {
            request.groups.clone()
        } else {
            Vec::new()
        };
        if !groups.iter().any(|g| g == GROUP_ALL_AUTHENTICATED) {
            groups.push(GROUP_ALL_AUTHENTICATED.to_string());
        }
        let extra =
            if extras_requested { request.extra } else { BTreeMap::new() };

        debug!(self.log, "impersonation authorized";
            "base_user" => &base.name,
            "effective_user" => &name);
        Ok(ImpersonationDecision {
            user: UserInfo { uid: name.clone(), name, groups, extra },
            impersonated: true,
        })
    }
}
