// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! One-shot migration of native bindings created under the legacy ownership
//! labeling scheme
//!
//! Early releases labeled native bindings with the owning binding's UID.
//! The current scheme uses `<namespace>_<name>`, which survives backup and
//! restore.  Migration is gated by a marker label on the binding; once the
//! marker is `"true"` the whole pass is a no-op.  Re-running a partial
//! migration is safe: an object that already carries the new owner label is
//! excluded by the selector on the next pass.

use crate::names::RTB_LABELS_MIGRATED;
use crate::names::RTB_LABEL_UPDATED;
use crate::names::RTB_OWNER_LABEL;
use crate::names::RTB_OWNER_LABEL_LEGACY;
use crate::names::binding_owner_value;
use crate::store::BindingStore;
use crate::store::ClusterRoleBindingStore;
use flotilla_common::api::external::ClusterRoleTemplateBinding;
use flotilla_common::api::external::Error;
use flotilla_common::api::external::labels::LabelSelector;
use flotilla_common::api::external::labels::Requirement;
use flotilla_common::retry::RetryPolicy;
use flotilla_common::retry::retry_on_conflict;
use slog::Logger;
use slog::info;
use slog::warn;
use slog_error_chain::InlineErrorChain;

/// Migrates all native bindings owned by `binding` from the legacy scheme,
/// then marks the binding migrated
///
/// Every matched object is attempted even when some fail; failures are
/// reported once, combined, and the marker is left unset so the next
/// reconcile retries.
pub async fn migrate_legacy_labels(
    bindings: &dyn BindingStore,
    cluster_role_bindings: &dyn ClusterRoleBindingStore,
    retry: &RetryPolicy,
    log: &Logger,
    binding: &ClusterRoleTemplateBinding,
) -> Result<(), Error> {
    if binding.metadata.labels.get(RTB_LABELS_MIGRATED).map(String::as_str)
        == Some("true")
    {
        return Ok(());
    }

    let owner_value = binding_owner_value(binding);
    let selector = LabelSelector::new()
        .match_label(
            RTB_OWNER_LABEL_LEGACY,
            &binding.metadata.uid.to_string(),
        )
        .require(Requirement::does_not_exist(RTB_LABEL_UPDATED))
        .require(Requirement::does_not_exist(RTB_OWNER_LABEL));
    let legacy = cluster_role_bindings
        .list_cluster_role_bindings(&selector)
        .await
        .map_err(|e| {
            e.internal_context(format!(
                "listing cluster role bindings with selector {}",
                selector
            ))
        })?;

    let mut failures = Vec::new();
    for crb in &legacy {
        let name = crb.metadata.name.clone();
        let result = retry_on_conflict(retry, || async {
            let mut latest = cluster_role_bindings
                .get_cluster_role_binding(&name)
                .await?;
            latest
                .metadata
                .labels
                .insert(RTB_OWNER_LABEL.to_string(), owner_value.clone());
            latest
                .metadata
                .labels
                .insert(RTB_LABEL_UPDATED.to_string(), "true".to_string());
            cluster_role_bindings
                .update_cluster_role_binding(latest)
                .await
                .map(|_| ())
        })
        .await;
        if let Err(error) = result {
            warn!(log, "failed to migrate cluster role binding labels";
                "cluster_role_binding" => &name,
                "error" => %InlineErrorChain::new(&error));
            failures.push(format!("{}: {}", name, error));
        }
    }
    if !failures.is_empty() {
        return Err(Error::internal_error(&format!(
            "migrating owner labels for binding {:?}: {}",
            binding.metadata.name,
            failures.join("; ")
        )));
    }

    retry_on_conflict(retry, || async {
        let namespace =
            binding.metadata.namespace.as_deref().unwrap_or("");
        let mut latest = bindings
            .get_binding(namespace, &binding.metadata.name)
            .await?;
        latest
            .metadata
            .labels
            .insert(RTB_LABELS_MIGRATED.to_string(), "true".to_string());
        bindings.update_binding(latest).await.map(|_| ())
    })
    .await?;
    info!(log, "migrated legacy owner labels";
        "binding" => &binding.metadata.name,
        "migrated" => legacy.len());
    Ok(())
}
