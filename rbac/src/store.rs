// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interfaces to the object stores consumed by the reconciliation engine
//!
//! Reads go through a watch-backed local cache and are eventually consistent
//! with writes issued here: a read immediately following a write may not
//! reflect it.  Reconciliation is written to tolerate that; a retry sees the
//! true state.  Writes present the object's resource version and fail with
//! [`Error::Conflict`] when it is stale.
//!
//! Production implementations wrap the platform's API clients; tests use the
//! call-recording fakes in [`crate::fakes`].

use async_trait::async_trait;
use flotilla_common::api::external::ClusterRole;
use flotilla_common::api::external::ClusterRoleBinding;
use flotilla_common::api::external::ClusterRoleTemplateBinding;
use flotilla_common::api::external::Error;
use flotilla_common::api::external::RoleTemplate;
use flotilla_common::api::external::ServiceAccount;
use flotilla_common::api::external::Workspace;
use flotilla_common::api::external::labels::LabelSelector;

/// Read-only access to role templates (authored upstream, never written
/// here)
#[async_trait]
pub trait RoleTemplateStore: Send + Sync {
    async fn get_role_template(&self, name: &str)
    -> Result<RoleTemplate, Error>;
}

/// Access to native cluster roles in the target cluster
#[async_trait]
pub trait ClusterRoleStore: Send + Sync {
    async fn get_cluster_role(&self, name: &str) -> Result<ClusterRole, Error>;
    async fn create_cluster_role(
        &self,
        role: ClusterRole,
    ) -> Result<ClusterRole, Error>;
    async fn update_cluster_role(
        &self,
        role: ClusterRole,
    ) -> Result<ClusterRole, Error>;
    async fn delete_cluster_role(&self, name: &str) -> Result<(), Error>;
}

/// Access to native cluster role bindings in the target cluster
#[async_trait]
pub trait ClusterRoleBindingStore: Send + Sync {
    async fn get_cluster_role_binding(
        &self,
        name: &str,
    ) -> Result<ClusterRoleBinding, Error>;
    async fn list_cluster_role_bindings(
        &self,
        selector: &LabelSelector,
    ) -> Result<Vec<ClusterRoleBinding>, Error>;
    async fn create_cluster_role_binding(
        &self,
        binding: ClusterRoleBinding,
    ) -> Result<ClusterRoleBinding, Error>;
    async fn update_cluster_role_binding(
        &self,
        binding: ClusterRoleBinding,
    ) -> Result<ClusterRoleBinding, Error>;
    async fn delete_cluster_role_binding(&self, name: &str)
    -> Result<(), Error>;
}

/// Access to the management-plane bindings being reconciled
///
/// Status lives behind a subresource: `update_binding` never touches status,
/// and the two status writes never touch the rest of the object.
/// `patch_binding_status` applies an RFC 7386 merge patch computed by
/// [`crate::status::status_merge_patch`].
#[async_trait]
pub trait BindingStore: Send + Sync {
    async fn get_binding(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ClusterRoleTemplateBinding, Error>;
    async fn list_bindings(
        &self,
    ) -> Result<Vec<ClusterRoleTemplateBinding>, Error>;
    async fn update_binding(
        &self,
        binding: ClusterRoleTemplateBinding,
    ) -> Result<ClusterRoleTemplateBinding, Error>;
    async fn update_binding_status(
        &self,
        binding: ClusterRoleTemplateBinding,
    ) -> Result<ClusterRoleTemplateBinding, Error>;
    async fn patch_binding_status(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<ClusterRoleTemplateBinding, Error>;
}

/// Access to the provisioned impersonation service accounts
#[async_trait]
pub trait ServiceAccountStore: Send + Sync {
    async fn get_service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ServiceAccount, Error>;
    async fn create_service_account(
        &self,
        account: ServiceAccount,
    ) -> Result<ServiceAccount, Error>;
    async fn delete_service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<(), Error>;
}

/// Read-only access to the known workspaces
#[async_trait]
pub trait WorkspaceStore: Send + Sync {
    async fn list_workspaces(&self) -> Result<Vec<Workspace>, Error>;
}
