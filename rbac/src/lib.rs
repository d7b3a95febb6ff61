// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! # Binding reconciliation engine
//!
//! This crate keeps the native role and binding objects in managed clusters
//! convergent with the management plane's role templates and bindings.  The
//! watch/event layer that invokes it and the API clients behind the store
//! traits live elsewhere; everything here is written against the interfaces
//! in [`store`] and is exercised in tests with the in-memory fakes.
//!
//! The flow for one binding is driven by [`reconciler::BindingReconciler`]:
//! resolve the template graph ([`gather`]), synthesize native roles
//! ([`roles`]) and bindings ([`bindings`]), provision the impersonation
//! identity ([`impersonation`]), and record each phase as a status condition
//! ([`status`]).  [`workspace`] derives workspace-scoped cluster roles from
//! global roles, and [`migration`] moves objects off the legacy ownership
//! labels.

pub mod bindings;
pub mod gather;
pub mod impersonation;
pub mod migration;
pub mod names;
pub mod reconciler;
pub mod roles;
pub mod status;
pub mod store;
pub mod workspace;

#[cfg(test)]
pub mod fakes;
