// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! # Flotilla Control Plane
//!
//! Flotilla manages fleets of Kubernetes clusters from a single management
//! plane.  This crate implements common facilities used across the control
//! plane: the API object model mirrored into managed clusters, the shared
//! error taxonomy, label selectors, and the optimistic-concurrency retry
//! combinator.  Other top-level crates implement pieces of the control plane
//! (e.g., `flotilla-rbac`, `flotilla-auth`).

// We only use rustdoc for internal documentation, including private items, so
// it's expected that we'll have links to private items in the docs.
#![allow(rustdoc::private_intra_doc_links)]

pub mod api;
pub mod retry;
