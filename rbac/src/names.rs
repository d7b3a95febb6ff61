// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Deterministic names and owner labels for derived native objects
//!
//! Re-reconciliation must find the objects a previous pass created, so every
//! derived object's name is a pure function of its source object's identity.
//! Native-object names are capped at 63 characters; longer names are
//! truncated with a digest suffix so that distinct inputs stay distinct.

use flotilla_common::api::external::ClusterRoleTemplateBinding;
use sha2::Digest;
use sha2::Sha256;

/// Maximum length of a native object name
const MAX_NAME_LENGTH: usize = 63;

/// Label carrying the owning binding's `<namespace>_<name>` on every native
/// binding derived from it; the store cannot select on owner references, so
/// deletion lists by this label.
pub const RTB_OWNER_LABEL: &str = "rbac.flotilla.io/owner";

/// Pre-migration owner label, keyed by the owning binding's UID
pub const RTB_OWNER_LABEL_LEGACY: &str = "rbac.flotilla.io/owner-uid";

/// Per-object marker set when the legacy label migration has rewritten an
/// object's owner label
pub const RTB_LABEL_UPDATED: &str = "rbac.flotilla.io/owner-updated";

/// Marker on a binding recording that its native bindings have been migrated
/// to the current ownership scheme
pub const RTB_LABELS_MIGRATED: &str = "rbac.flotilla.io/legacy-labels-migrated";

/// Standard managed-by label applied to everything this engine creates
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGER_VALUE: &str = "flotilla";

/// Joins name fragments with `-`, truncating with a digest suffix when the
/// result would exceed the platform's name length limit
///
/// Truncation keeps the first 57 characters and appends `-` plus the first
/// five hex characters of the SHA-256 digest of the full name, so truncated
/// names remain deterministic and collision-safe.
pub fn safe_concat_name(parts: &[&str]) -> String {
    let full = parts.join("-");
    if full.len() < MAX_NAME_LENGTH {
        return full;
    }
    let digest = Sha256::digest(full.as_bytes());
    format!("{}-{}", &full[..57], &hex::encode(digest)[..5])
}

/// The owner-label value identifying `binding`: `<namespace>_<name>`
///
/// Underscores cannot appear in object names, so the value is unambiguous.
pub fn binding_owner_value(binding: &ClusterRoleTemplateBinding) -> String {
    match &binding.metadata.namespace {
        Some(namespace) => {
            format!("{}_{}", namespace, binding.metadata.name)
        }
        None => binding.metadata.name.clone(),
    }
}

/// Name of the native binding granting `role_name` for `binding`
pub fn cluster_role_binding_name(
    binding: &ClusterRoleTemplateBinding,
    role_name: &str,
) -> String {
    let namespace = binding.metadata.namespace.as_deref().unwrap_or("");
    safe_concat_name(&["crb", namespace, &binding.metadata.name, role_name])
}
