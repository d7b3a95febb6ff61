// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Authentication facilities
//!
//! This module includes generic, HTTP-agnostic representations of who is
//! performing a request and why an impersonation attempt failed.  The
//! [`impersonate`] submodule implements the gate that decides, once primary
//! authentication has produced a base identity, whether the caller may
//! execute as a different identity instead.

pub mod impersonate;

use dropshot::HttpError;
use flotilla_common::api::external::Error as ApiError;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::fmt::Formatter;
use std::fmt::Result as FormatResult;

/// The well-known pseudo-group carried by every authenticated identity
pub const GROUP_ALL_AUTHENTICATED: &str = "system:authenticated";

/// Prefix identifying a provisioned service identity's user name
pub const SERVICE_ACCOUNT_USERNAME_PREFIX: &str = "system:serviceaccount:";

/// The identity a request executes as
///
/// Produced by primary authentication and possibly replaced by the
/// impersonation gate before the rest of the pipeline sees it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UserInfo {
    pub name: String,
    pub uid: String,
    pub groups: Vec<String>,
    pub extra: BTreeMap<String, Vec<String>>,
}

impl UserInfo {
    pub fn named(name: &str) -> UserInfo {
        UserInfo {
            name: name.to_string(),
            uid: name.to_string(),
            groups: Vec::new(),
            extra: BTreeMap::new(),
        }
    }

    /// Whether this identity is a provisioned service identity rather than a
    /// human user
    pub fn is_service_account(&self) -> bool {
        self.name.starts_with(SERVICE_ACCOUNT_USERNAME_PREFIX)
    }
}

/// Request-scoped audit record
///
/// The raw requested impersonation identity is recorded here once per
/// request, before and independent of the authorization outcome, and read by
/// audit-log infrastructure downstream.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AuditInfo {
    pub request_user: Option<String>,
    pub request_groups: Vec<String>,
}

/// What the caller asked to impersonate, for error reporting
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ImpersonationTarget {
    User(String),
    Groups(Vec<String>),
    Extras,
}

impl Display for ImpersonationTarget {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        match self {
            ImpersonationTarget::User(name) => write!(f, "user {:?}", name),
            ImpersonationTarget::Groups(groups) => {
                write!(f, "groups {:?}", groups)
            }
            ImpersonationTarget::Extras => write!(f, "extra attributes"),
        }
    }
}

/// Describes why an impersonation attempt failed
///
/// Denial is deliberately distinct from an authentication failure: the
/// caller *is* authenticated, they are just not allowed to become someone
/// else.  Conflating the two would surface a misleading 401 and invite
/// clients to retry with different credentials.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An impersonation header was syntactically unusable
    #[error("bad impersonation header: {source:#}")]
    BadFormat {
        #[source]
        source: anyhow::Error,
    },

    /// The authorization oracle denied the requested substitution
    #[error("not allowed to impersonate {target}")]
    ImpersonationDenied { target: ImpersonationTarget },

    /// The oracle call itself failed
    #[error("impersonation authorization check failed")]
    OracleFailure {
        #[source]
        source: ApiError,
    },

    /// Impersonating a provisioned service identity requires a dedicated
    /// authorization and credential-exchange path that does not exist yet;
    /// this fails closed until that path is designed.
    #[error("impersonating service account {name:?} is not supported")]
    ServiceAccountImpersonation { name: String },
}

impl From<Error> for HttpError {
    fn from(error: Error) -> Self {
        match error {
            e @ Error::BadFormat { .. } => {
                HttpError::for_bad_request(None, format!("{:#}", e))
            }
            // 403, not 401: the caller authenticated fine.
            e @ Error::ImpersonationDenied { .. } => {
                HttpError::for_client_error(
                    Some(String::from("ImpersonationDenied")),
                    http::StatusCode::FORBIDDEN,
                    format!("{}", e),
                )
            }
            e @ Error::ServiceAccountImpersonation { .. } => {
                HttpError::for_client_error(
                    Some(String::from("ServiceAccountImpersonation")),
                    http::StatusCode::FORBIDDEN,
                    format!("{}", e),
                )
            }
            Error::OracleFailure { source } => source.into(),
        }
    }
}
