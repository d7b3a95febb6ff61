// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Synthesis of native cluster role bindings from a reconciled binding

use crate::gather::GatheredRoles;
use crate::names::MANAGED_BY_LABEL;
use crate::names::MANAGER_VALUE;
use crate::names::RTB_OWNER_LABEL;
use crate::names::binding_owner_value;
use crate::names::cluster_role_binding_name;
use crate::store::ClusterRoleBindingStore;
use flotilla_common::api::external::ClusterRoleBinding;
use flotilla_common::api::external::ClusterRoleTemplateBinding;
use flotilla_common::api::external::Error;
use flotilla_common::api::external::ObjectMeta;
use flotilla_common::api::external::OwnerReference;
use flotilla_common::api::external::ResourceType;
use flotilla_common::api::external::Subject;
use slog::Logger;
use slog::debug;
use slog::info;

/// The subject a binding names, if any
///
/// A binding carries exactly one meaningful selector: a user name, a group
/// name, or a group principal name.
pub fn binding_subject(
    binding: &ClusterRoleTemplateBinding,
) -> Option<Subject> {
    if let Some(user) = &binding.user_name {
        return Some(Subject::user(user));
    }
    if let Some(principal) = &binding.group_principal_name {
        return Some(Subject::group(principal));
    }
    binding.group_name.as_deref().map(Subject::group)
}

/// Ensures one native binding per gathered role, granting that role to the
/// binding's subject
///
/// Native bindings are owned by the source binding for garbage collection
/// and additionally carry the owner label used for selector-based cleanup.
pub async fn ensure_cluster_role_bindings(
    store: &dyn ClusterRoleBindingStore,
    log: &Logger,
    roles: &GatheredRoles,
    binding: &ClusterRoleTemplateBinding,
) -> Result<(), Error> {
    let subject = binding_subject(binding).ok_or_else(|| {
        Error::invalid_request("binding names no user or group")
    })?;

    for role_name in roles.keys() {
        let name = cluster_role_binding_name(binding, role_name);
        match store.get_cluster_role_binding(&name).await {
            Ok(existing) => {
                if existing.subjects == vec![subject.clone()]
                    && existing.role_name == *role_name
                {
                    debug!(log, "cluster role binding up to date";
                        "cluster_role_binding" => &name);
                    continue;
                }
                let mut updated = existing;
                updated.subjects = vec![subject.clone()];
                updated.role_name = role_name.clone();
                store.update_cluster_role_binding(updated).await.map_err(
                    |e| {
                        e.internal_context(format!(
                            "updating cluster role binding {:?}",
                            name
                        ))
                    },
                )?;
                info!(log, "updated cluster role binding";
                    "cluster_role_binding" => &name);
            }
            Err(error) if error.is_not_found() => {
                store
                    .create_cluster_role_binding(desired_binding(
                        &name, role_name, &subject, binding,
                    ))
                    .await
                    .map_err(|e| {
                        e.internal_context(format!(
                            "creating cluster role binding {:?}",
                            name
                        ))
                    })?;
                info!(log, "created cluster role binding";
                    "cluster_role_binding" => &name,
                    "role" => role_name);
            }
            Err(error) => {
                return Err(error.internal_context(format!(
                    "fetching cluster role binding {:?}",
                    name
                )));
            }
        }
    }
    Ok(())
}

fn desired_binding(
    name: &str,
    role_name: &str,
    subject: &Subject,
    owner: &ClusterRoleTemplateBinding,
) -> ClusterRoleBinding {
    let mut metadata = ObjectMeta::named(name);
    metadata
        .labels
        .insert(RTB_OWNER_LABEL.to_string(), binding_owner_value(owner));
    metadata
        .labels
        .insert(MANAGED_BY_LABEL.to_string(), MANAGER_VALUE.to_string());
    metadata.owner_references.push(OwnerReference {
        kind: ResourceType::ClusterRoleTemplateBinding,
        name: owner.metadata.name.clone(),
        uid: owner.metadata.uid,
    });
    ClusterRoleBinding {
        metadata,
        subjects: vec![subject.clone()],
        role_name: role_name.to_string(),
    }
}
