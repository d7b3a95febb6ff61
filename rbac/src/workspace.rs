// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Synthesis of workspace-scoped cluster roles from a global role's
//! inherited workspace permission block
//!
//! A global role may carry a block of permissions to be applied across all
//! workspaces.  Two native cluster roles are derived from it: one holding
//! the block's resource rules verbatim, and one granting the block's verb
//! list on the workspace resource itself, constrained by resource name to
//! the currently-known workspaces.  The reserved local workspace is never
//! included.  Removing the block removes both roles.

use crate::names::MANAGED_BY_LABEL;
use crate::names::MANAGER_VALUE;
use crate::names::safe_concat_name;
use crate::store::ClusterRoleStore;
use crate::store::WorkspaceStore;
use flotilla_common::api::external::ClusterRole;
use flotilla_common::api::external::Error;
use flotilla_common::api::external::GlobalRole;
use flotilla_common::api::external::ObjectMeta;
use flotilla_common::api::external::OwnerReference;
use flotilla_common::api::external::PolicyRule;
use flotilla_common::api::external::ResourceType;
use slog::Logger;
use slog::debug;
use slog::info;
use std::sync::Arc;

/// The workspace every cluster registers into; it backs the management
/// plane itself and never receives inherited permissions.
pub const RESERVED_LOCAL_WORKSPACE: &str = "local";

/// API group and resource of the workspace objects named in the verbs role
pub const WORKSPACE_API_GROUP: &str = "management.flotilla.io";
pub const WORKSPACE_RESOURCE: &str = "workspaces";

/// Label tying a derived cluster role back to its global role
pub const GLOBAL_ROLE_OWNER_LABEL: &str = "rbac.flotilla.io/global-role-owner";

const WORKSPACE_RULES_ROLE_SUFFIX: &str = "workspace-rules";
const WORKSPACE_VERBS_ROLE_SUFFIX: &str = "workspace-verbs";

/// Reconciles the pair of workspace permission cluster roles for global
/// roles
pub struct WorkspaceRoleHandler {
    cluster_roles: Arc<dyn ClusterRoleStore>,
    workspaces: Arc<dyn WorkspaceStore>,
    log: Logger,
}

impl WorkspaceRoleHandler {
    pub fn new(
        cluster_roles: Arc<dyn ClusterRoleStore>,
        workspaces: Arc<dyn WorkspaceStore>,
        log: Logger,
    ) -> WorkspaceRoleHandler {
        WorkspaceRoleHandler { cluster_roles, workspaces, log }
    }

    /// Brings both derived cluster roles in line with the global role's
    /// permission block, deleting them when the block is absent
    pub async fn reconcile_workspace_permissions(
        &self,
        global_role: &GlobalRole,
    ) -> Result<(), Error> {
        let name = &global_role.metadata.name;
        let rules_name =
            safe_concat_name(&[name, WORKSPACE_RULES_ROLE_SUFFIX]);
        let verbs_name =
            safe_concat_name(&[name, WORKSPACE_VERBS_ROLE_SUFFIX]);

        let permissions =
            global_role.inherited_workspace_permissions.as_ref();
        let desired_rules = permissions.map(|p| {
            backing_role(global_role, &rules_name, p.resource_rules.clone())
        });
        let desired_verbs = match permissions {
            None => None,
            Some(p) => {
                let workspace_names = self.workspace_names().await?;
                if workspace_names.is_empty() {
                    // Nothing to scope the verbs to; the rule would grant
                    // access to no object at all.
                    debug!(self.log,
                        "no workspaces beyond the local one, \
                         skipping verbs role";
                        "global_role" => name);
                    None
                } else {
                    Some(backing_role(
                        global_role,
                        &verbs_name,
                        vec![PolicyRule {
                            verbs: p.workspace_verbs.clone(),
                            api_groups: vec![WORKSPACE_API_GROUP.to_string()],
                            resources: vec![WORKSPACE_RESOURCE.to_string()],
                            resource_names: workspace_names,
                        }],
                    ))
                }
            }
        };

        self.reconcile_role(&rules_name, desired_rules).await.map_err(
            |e| {
                e.internal_context(
                    "error reconciling workspace permissions cluster role",
                )
            },
        )?;
        self.reconcile_role(&verbs_name, desired_verbs).await.map_err(|e| {
            e.internal_context(
                "error reconciling workspace verbs cluster role",
            )
        })
    }

    async fn workspace_names(&self) -> Result<Vec<String>, Error> {
        let mut names: Vec<String> = self
            .workspaces
            .list_workspaces()
            .await?
            .into_iter()
            .map(|w| w.metadata.name)
            .filter(|n| n != RESERVED_LOCAL_WORKSPACE)
            .collect();
        names.sort();
        Ok(names)
    }

    /// Create-if-absent, update-if-changed, no-op-if-identical,
    /// delete-if-unwanted
    async fn reconcile_role(
        &self,
        name: &str,
        desired: Option<ClusterRole>,
    ) -> Result<(), Error> {
        match (self.cluster_roles.get_cluster_role(name).await, desired) {
            (Ok(_), None) => {
                match self.cluster_roles.delete_cluster_role(name).await {
                    Err(error) if error.is_not_found() => Ok(()),
                    other => other,
                }?;
                info!(self.log, "deleted workspace permission cluster role";
                    "cluster_role" => name);
                Ok(())
            }
            (Ok(existing), Some(want)) => {
                if existing.rules == want.rules {
                    return Ok(());
                }
                let mut updated = existing;
                updated.rules = want.rules;
                self.cluster_roles.update_cluster_role(updated).await?;
                info!(self.log, "updated workspace permission cluster role";
                    "cluster_role" => name);
                Ok(())
            }
            (Err(error), None) if error.is_not_found() => Ok(()),
            (Err(error), Some(want)) if error.is_not_found() => {
                self.cluster_roles.create_cluster_role(want).await?;
                info!(self.log, "created workspace permission cluster role";
                    "cluster_role" => name);
                Ok(())
            }
            (Err(error), _) => Err(error),
        }
    }
}

fn backing_role(
    global_role: &GlobalRole,
    name: &str,
    rules: Vec<PolicyRule>,
) -> ClusterRole {
    let mut metadata = ObjectMeta::named(name);
    metadata.labels.insert(
        GLOBAL_ROLE_OWNER_LABEL.to_string(),
        safe_concat_name(&[&global_role.metadata.name]),
    );
    metadata
        .labels
        .insert(MANAGED_BY_LABEL.to_string(), MANAGER_VALUE.to_string());
    metadata.owner_references.push(OwnerReference {
        kind: ResourceType::GlobalRole,
        name: global_role.metadata.name.clone(),
        uid: global_role.metadata.uid,
    });
    ClusterRole { metadata, rules }
}
