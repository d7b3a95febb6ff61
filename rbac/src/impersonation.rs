// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Provisioning of per-user impersonation identities
//!
//! When a binding grants a user access to a downstream cluster, the request
//! path later needs a service identity in that cluster that is allowed to
//! impersonate exactly that user.  The identity is a service account in a
//! dedicated namespace, a cluster role granting the `impersonate` verb on
//! that one user resource, and a cluster role binding tying the two
//! together.
//!
//! Many bindings can name the same user, so the identity is deleted only
//! once no binding references the user anymore.

use crate::names::MANAGED_BY_LABEL;
use crate::names::MANAGER_VALUE;
use crate::names::safe_concat_name;
use crate::store::BindingStore;
use crate::store::ClusterRoleBindingStore;
use crate::store::ClusterRoleStore;
use crate::store::ServiceAccountStore;
use flotilla_common::api::external::ClusterRole;
use flotilla_common::api::external::ClusterRoleBinding;
use flotilla_common::api::external::Error;
use flotilla_common::api::external::ObjectMeta;
use flotilla_common::api::external::PolicyRule;
use flotilla_common::api::external::ServiceAccount;
use flotilla_common::api::external::Subject;
use slog::Logger;
use slog::debug;
use slog::info;
use std::sync::Arc;

/// Namespace holding all provisioned impersonation service accounts
pub const IMPERSONATION_NAMESPACE: &str = "flotilla-impersonation-system";

const IMPERSONATION_PREFIX: &str = "flotilla-impersonation";

/// Name of the impersonation service account (and its cluster role) for
/// `user`
pub fn impersonation_account_name(user: &str) -> String {
    safe_concat_name(&[IMPERSONATION_PREFIX, user])
}

/// Provisions and tears down impersonation identities
pub struct Impersonator {
    service_accounts: Arc<dyn ServiceAccountStore>,
    cluster_roles: Arc<dyn ClusterRoleStore>,
    cluster_role_bindings: Arc<dyn ClusterRoleBindingStore>,
    bindings: Arc<dyn BindingStore>,
    log: Logger,
}

impl Impersonator {
    pub fn new(
        service_accounts: Arc<dyn ServiceAccountStore>,
        cluster_roles: Arc<dyn ClusterRoleStore>,
        cluster_role_bindings: Arc<dyn ClusterRoleBindingStore>,
        bindings: Arc<dyn BindingStore>,
        log: Logger,
    ) -> Impersonator {
        Impersonator {
            service_accounts,
            cluster_roles,
            cluster_role_bindings,
            bindings,
            log,
        }
    }

    /// Ensures the impersonation identity for `user` exists
    ///
    /// Idempotent: every piece is create-if-absent, repair-if-changed.
    pub async fn ensure_impersonator(&self, user: &str) -> Result<(), Error> {
        let name = impersonation_account_name(user);
        self.ensure_role(user, &name).await?;
        self.ensure_account(&name).await?;
        self.ensure_role_binding(&name).await?;
        Ok(())
    }

    async fn ensure_role(&self, user: &str, name: &str) -> Result<(), Error> {
        let rules = vec![PolicyRule {
            verbs: vec!["impersonate".to_string()],
            api_groups: vec!["".to_string()],
            resources: vec!["users".to_string()],
            resource_names: vec![user.to_string()],
        }];
        match self.cluster_roles.get_cluster_role(name).await {
            Ok(existing) => {
                if existing.rules == rules {
                    return Ok(());
                }
                let mut updated = existing;
                updated.rules = rules;
                self.cluster_roles.update_cluster_role(updated).await?;
                Ok(())
            }
            Err(error) if error.is_not_found() => {
                self.cluster_roles
                    .create_cluster_role(ClusterRole {
                        metadata: managed_metadata(name),
                        rules,
                    })
                    .await?;
                info!(self.log, "created impersonation cluster role";
                    "user" => user);
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    async fn ensure_account(&self, name: &str) -> Result<(), Error> {
        match self
            .service_accounts
            .get_service_account(IMPERSONATION_NAMESPACE, name)
            .await
        {
            Ok(_) => Ok(()),
            Err(error) if error.is_not_found() => {
                let mut metadata = managed_metadata(name);
                metadata.namespace =
                    Some(IMPERSONATION_NAMESPACE.to_string());
                self.service_accounts
                    .create_service_account(ServiceAccount { metadata })
                    .await?;
                info!(self.log, "created impersonation service account";
                    "service_account" => name);
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    async fn ensure_role_binding(&self, name: &str) -> Result<(), Error> {
        let binding_name = safe_concat_name(&[name, "binding"]);
        match self
            .cluster_role_bindings
            .get_cluster_role_binding(&binding_name)
            .await
        {
            Ok(_) => Ok(()),
            Err(error) if error.is_not_found() => {
                self.cluster_role_bindings
                    .create_cluster_role_binding(ClusterRoleBinding {
                        metadata: managed_metadata(&binding_name),
                        subjects: vec![Subject::service_account(
                            IMPERSONATION_NAMESPACE,
                            name,
                        )],
                        role_name: name.to_string(),
                    })
                    .await?;
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    /// Deletes the impersonation identity for `user` unless other bindings
    /// still reference the user
    ///
    /// `removing` identifies the binding currently being deleted (by
    /// namespace and name) so it does not count as a remaining reference.
    /// Deleting pieces that are already gone is treated as satisfied.
    pub async fn delete_impersonator(
        &self,
        user: &str,
        removing: Option<(&str, &str)>,
    ) -> Result<(), Error> {
        let still_referenced = self
            .bindings
            .list_bindings()
            .await
            .map_err(|e| {
                e.internal_context(
                    "listing bindings to check impersonator references",
                )
            })?
            .iter()
            .any(|b| {
                b.user_name.as_deref() == Some(user)
                    && removing
                        != Some((
                            b.metadata.namespace.as_deref().unwrap_or(""),
                            b.metadata.name.as_str(),
                        ))
            });
        if still_referenced {
            debug!(self.log,
                "impersonation identity still referenced, keeping";
                "user" => user);
            return Ok(());
        }

        let name = impersonation_account_name(user);
        let binding_name = safe_concat_name(&[&name, "binding"]);
        tolerate_not_found(
            self.cluster_role_bindings
                .delete_cluster_role_binding(&binding_name)
                .await,
        )?;
        tolerate_not_found(
            self.cluster_roles.delete_cluster_role(&name).await,
        )?;
        tolerate_not_found(
            self.service_accounts
                .delete_service_account(IMPERSONATION_NAMESPACE, &name)
                .await,
        )?;
        info!(self.log, "deleted impersonation identity"; "user" => user);
        Ok(())
    }
}

fn managed_metadata(name: &str) -> ObjectMeta {
    let mut metadata = ObjectMeta::named(name);
    metadata
        .labels
        .insert(MANAGED_BY_LABEL.to_string(), MANAGER_VALUE.to_string());
    metadata
}

fn tolerate_not_found(result: Result<(), Error>) -> Result<(), Error> {
    match result {
        Err(error) if error.is_not_found() => Ok(()),
        other => other,
    }
}
