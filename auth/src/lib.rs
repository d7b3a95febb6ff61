// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Request-path authentication facilities for the flotilla control plane
//!
//! [`authn`] holds the identity types produced by primary authentication and
//! the impersonation gate that may substitute a different identity for the
//! rest of the request pipeline.  [`authz`] holds the interface to the
//! authorization oracle those substitutions are checked against.

pub mod authn;
pub mod authz;
