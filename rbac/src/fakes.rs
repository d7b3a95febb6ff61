// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Test-only implementations of the store interfaces
//!
//! One [`FakeCluster`] implements every store trait over in-memory maps.  In
//! lieu of any networked requests, it records each call for later
//! inspection, emulates optimistic concurrency (writes presenting a stale
//! resource version fail with a conflict), and can be told to fail specific
//! operations to drive error paths.

use crate::store::BindingStore;
use crate::store::ClusterRoleBindingStore;
use crate::store::ClusterRoleStore;
use crate::store::RoleTemplateStore;
use crate::store::ServiceAccountStore;
use crate::store::WorkspaceStore;
use async_trait::async_trait;
use flotilla_common::api::external::ClusterRole;
use flotilla_common::api::external::ClusterRoleBinding;
use flotilla_common::api::external::ClusterRoleTemplateBinding;
use flotilla_common::api::external::Error;
use flotilla_common::api::external::ObjectMeta;
use flotilla_common::api::external::ResourceType;
use flotilla_common::api::external::RoleTemplate;
use flotilla_common::api::external::ServiceAccount;
use flotilla_common::api::external::Workspace;
use flotilla_common::api::external::labels::LabelSelector;
use std::collections::BTreeMap;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CallKind {
    Get,
    List,
    Create,
    Update,
    UpdateStatus,
    Patch,
    Delete,
}

/// One recorded store call
#[derive(Clone, Debug)]
pub struct Call {
    pub kind: CallKind,
    pub resource: ResourceType,
    pub name: String,
}

#[derive(Default)]
struct Inner {
    role_templates: BTreeMap<String, RoleTemplate>,
    cluster_roles: BTreeMap<String, ClusterRole>,
    cluster_role_bindings: BTreeMap<String, ClusterRoleBinding>,
    bindings: BTreeMap<String, ClusterRoleTemplateBinding>,
    service_accounts: BTreeMap<String, ServiceAccount>,
    workspaces: BTreeMap<String, Workspace>,
    calls: Vec<Call>,
    injected: Vec<(CallKind, ResourceType, Error)>,
}

/// In-memory stand-in for every store the reconciliation engine consumes
pub struct FakeCluster {
    inner: Mutex<Inner>,
}

fn namespaced_key(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}

impl FakeCluster {
    pub fn new() -> FakeCluster {
        FakeCluster { inner: Mutex::new(Inner::default()) }
    }

    fn record(
        &self,
        kind: CallKind,
        resource: ResourceType,
        name: &str,
    ) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(Call { kind, resource, name: name.to_string() });
        if let Some(index) = inner
            .injected
            .iter()
            .position(|(k, r, _)| *k == kind && *r == resource)
        {
            let (_, _, error) = inner.injected.remove(index);
            return Err(error);
        }
        Ok(())
    }

    /// Queues `error` to be returned by the next matching operation
    pub fn inject_error(
        &self,
        kind: CallKind,
        resource: ResourceType,
        error: Error,
    ) {
        self.inner.lock().unwrap().injected.push((kind, resource, error));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().unwrap().calls.clone()
    }

    /// All recorded mutating calls
    pub fn writes(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| {
                matches!(
                    c.kind,
                    CallKind::Create
                        | CallKind::Update
                        | CallKind::UpdateStatus
                        | CallKind::Patch
                        | CallKind::Delete
                )
            })
            .collect()
    }

    pub fn put_role_template(&self, template: RoleTemplate) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .role_templates
            .insert(template.metadata.name.clone(), template);
    }

    pub fn put_cluster_role(&self, role: ClusterRole) {
        let mut inner = self.inner.lock().unwrap();
        let role = seeded(role, |r| &mut r.metadata);
        inner.cluster_roles.insert(role.metadata.name.clone(), role);
    }

    pub fn put_cluster_role_binding(&self, binding: ClusterRoleBinding) {
        let mut inner = self.inner.lock().unwrap();
        let binding = seeded(binding, |b| &mut b.metadata);
        inner
            .cluster_role_bindings
            .insert(binding.metadata.name.clone(), binding);
    }

    pub fn put_binding(&self, binding: ClusterRoleTemplateBinding) {
        let mut inner = self.inner.lock().unwrap();
        let binding = seeded(binding, |b| &mut b.metadata);
        let key = namespaced_key(
            binding.metadata.namespace.as_deref().unwrap_or(""),
            &binding.metadata.name,
        );
        inner.bindings.insert(key, binding);
    }

    pub fn put_service_account(&self, account: ServiceAccount) {
        let mut inner = self.inner.lock().unwrap();
        let account = seeded(account, |a| &mut a.metadata);
        let key = namespaced_key(
            account.metadata.namespace.as_deref().unwrap_or(""),
            &account.metadata.name,
        );
        inner.service_accounts.insert(key, account);
    }

    pub fn put_workspace(&self, name: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.workspaces.insert(
            name.to_string(),
            Workspace { metadata: ObjectMeta::named(name) },
        );
    }

    pub fn cluster_role(&self, name: &str) -> Option<ClusterRole> {
        self.inner.lock().unwrap().cluster_roles.get(name).cloned()
    }

    pub fn cluster_role_binding(
        &self,
        name: &str,
    ) -> Option<ClusterRoleBinding> {
        self.inner.lock().unwrap().cluster_role_bindings.get(name).cloned()
    }

    pub fn cluster_role_bindings_all(&self) -> Vec<ClusterRoleBinding> {
        self.inner
            .lock()
            .unwrap()
            .cluster_role_bindings
            .values()
            .cloned()
            .collect()
    }

    pub fn remove_cluster_role_binding(&self, name: &str) {
        self.inner.lock().unwrap().cluster_role_bindings.remove(name);
    }

    pub fn binding(
        &self,
        namespace: &str,
        name: &str,
    ) -> Option<ClusterRoleTemplateBinding> {
        self.inner
            .lock()
            .unwrap()
            .bindings
            .get(&namespaced_key(namespace, name))
            .cloned()
    }

    pub fn service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> Option<ServiceAccount> {
        self.inner
            .lock()
            .unwrap()
            .service_accounts
            .get(&namespaced_key(namespace, name))
            .cloned()
    }
}

/// Fills in the identity fields a real store would assign at admission
fn seeded<T>(mut object: T, meta: impl Fn(&mut T) -> &mut ObjectMeta) -> T {
    let m = meta(&mut object);
    if m.uid.is_nil() {
        m.uid = Uuid::new_v4();
    }
    if m.resource_version == 0 {
        m.resource_version = 1;
    }
    object
}

fn check_version(
    stored_version: u64,
    incoming_version: u64,
    resource: ResourceType,
    name: &str,
) -> Result<(), Error> {
    if stored_version != incoming_version {
        return Err(Error::conflict(resource, name));
    }
    Ok(())
}

#[async_trait]
impl RoleTemplateStore for FakeCluster {
    async fn get_role_template(
        &self,
        name: &str,
    ) -> Result<RoleTemplate, Error> {
        self.record(CallKind::Get, ResourceType::RoleTemplate, name)?;
        self.inner
            .lock()
            .unwrap()
            .role_templates
            .get(name)
            .cloned()
            .ok_or_else(|| {
                Error::not_found_by_name(ResourceType::RoleTemplate, name)
            })
    }
}

#[async_trait]
impl ClusterRoleStore for FakeCluster {
    async fn get_cluster_role(
        &self,
        name: &str,
    ) -> Result<ClusterRole, Error> {
        self.record(CallKind::Get, ResourceType::ClusterRole, name)?;
        self.inner.lock().unwrap().cluster_roles.get(name).cloned().ok_or_else(
            || Error::not_found_by_name(ResourceType::ClusterRole, name),
        )
    }

    async fn create_cluster_role(
        &self,
        role: ClusterRole,
    ) -> Result<ClusterRole, Error> {
        self.record(
            CallKind::Create,
            ResourceType::ClusterRole,
            &role.metadata.name,
        )?;
        let mut inner = self.inner.lock().unwrap();
        if inner.cluster_roles.contains_key(&role.metadata.name) {
            return Err(Error::ObjectAlreadyExists {
                type_name: ResourceType::ClusterRole,
                object_name: role.metadata.name,
            });
        }
        let role = seeded(role, |r| &mut r.metadata);
        inner.cluster_roles.insert(role.metadata.name.clone(), role.clone());
        Ok(role)
    }

    async fn update_cluster_role(
        &self,
        role: ClusterRole,
    ) -> Result<ClusterRole, Error> {
        self.record(
            CallKind::Update,
            ResourceType::ClusterRole,
            &role.metadata.name,
        )?;
        let mut inner = self.inner.lock().unwrap();
        let name = role.metadata.name.clone();
        let stored = inner.cluster_roles.get_mut(&name).ok_or_else(|| {
            Error::not_found_by_name(ResourceType::ClusterRole, &name)
        })?;
        check_version(
            stored.metadata.resource_version,
            role.metadata.resource_version,
            ResourceType::ClusterRole,
            &name,
        )?;
        let mut role = role;
        role.metadata.resource_version += 1;
        *stored = role.clone();
        Ok(role)
    }

    async fn delete_cluster_role(&self, name: &str) -> Result<(), Error> {
        self.record(CallKind::Delete, ResourceType::ClusterRole, name)?;
        let mut inner = self.inner.lock().unwrap();
        inner.cluster_roles.remove(name).map(|_| ()).ok_or_else(|| {
            Error::not_found_by_name(ResourceType::ClusterRole, name)
        })
    }
}

#[async_trait]
impl ClusterRoleBindingStore for FakeCluster {
    async fn get_cluster_role_binding(
        &self,
        name: &str,
    ) -> Result<ClusterRoleBinding, Error> {
        self.record(CallKind::Get, ResourceType::ClusterRoleBinding, name)?;
        self.inner
            .lock()
            .unwrap()
            .cluster_role_bindings
            .get(name)
            .cloned()
            .ok_or_else(|| {
                Error::not_found_by_name(
                    ResourceType::ClusterRoleBinding,
                    name,
                )
            })
    }

    async fn list_cluster_role_bindings(
        &self,
        selector: &LabelSelector,
    ) -> Result<Vec<ClusterRoleBinding>, Error> {
        self.record(CallKind::List, ResourceType::ClusterRoleBinding, "")?;
        Ok(self
            .inner
            .lock()
            .unwrap()
            .cluster_role_bindings
            .values()
            .filter(|crb| selector.matches(&crb.metadata.labels))
            .cloned()
            .collect())
    }

    async fn create_cluster_role_binding(
        &self,
        binding: ClusterRoleBinding,
    ) -> Result<ClusterRoleBinding, Error> {
        self.record(
            CallKind::Create,
            ResourceType::ClusterRoleBinding,
            &binding.metadata.name,
        )?;
        let mut inner = self.inner.lock().unwrap();
        if inner.cluster_role_bindings.contains_key(&binding.metadata.name) {
            return Err(Error::ObjectAlreadyExists {
                type_name: ResourceType::ClusterRoleBinding,
                object_name: binding.metadata.name,
            });
        }
        let binding = seeded(binding, |b| &mut b.metadata);
        inner
            .cluster_role_bindings
            .insert(binding.metadata.name.clone(), binding.clone());
        Ok(binding)
    }

    async fn update_cluster_role_binding(
        &self,
        binding: ClusterRoleBinding,
    ) -> Result<ClusterRoleBinding, Error> {
        self.record(
            CallKind::Update,
            ResourceType::ClusterRoleBinding,
            &binding.metadata.name,
        )?;
        let mut inner = self.inner.lock().unwrap();
        let name = binding.metadata.name.clone();
        let stored =
            inner.cluster_role_bindings.get_mut(&name).ok_or_else(|| {
                Error::not_found_by_name(
                    ResourceType::ClusterRoleBinding,
                    &name,
                )
            })?;
        check_version(
            stored.metadata.resource_version,
            binding.metadata.resource_version,
            ResourceType::ClusterRoleBinding,
            &name,
        )?;
        let mut binding = binding;
        binding.metadata.resource_version += 1;
        *stored = binding.clone();
        Ok(binding)
    }

    async fn delete_cluster_role_binding(
        &self,
        name: &str,
    ) -> Result<(), Error> {
        self.record(CallKind::Delete, ResourceType::ClusterRoleBinding, name)?;
        let mut inner = self.inner.lock().unwrap();
        inner.cluster_role_bindings.remove(name).map(|_| ()).ok_or_else(
            || {
                Error::not_found_by_name(
                    ResourceType::ClusterRoleBinding,
                    name,
                )
            },
        )
    }
}

#[async_trait]
impl BindingStore for FakeCluster {
    async fn get_binding(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ClusterRoleTemplateBinding, Error> {
        self.record(
            CallKind::Get,
            ResourceType::ClusterRoleTemplateBinding,
            name,
        )?;
        self.inner
            .lock()
            .unwrap()
            .bindings
            .get(&namespaced_key(namespace, name))
            .cloned()
            .ok_or_else(|| {
                Error::not_found_by_name(
                    ResourceType::ClusterRoleTemplateBinding,
                    name,
                )
            })
    }

    async fn list_bindings(
        &self,
    ) -> Result<Vec<ClusterRoleTemplateBinding>, Error> {
        self.record(
            CallKind::List,
            ResourceType::ClusterRoleTemplateBinding,
            "",
        )?;
        Ok(self.inner.lock().unwrap().bindings.values().cloned().collect())
    }

    async fn update_binding(
        &self,
        binding: ClusterRoleTemplateBinding,
    ) -> Result<ClusterRoleTemplateBinding, Error> {
        self.record(
            CallKind::Update,
            ResourceType::ClusterRoleTemplateBinding,
            &binding.metadata.name,
        )?;
        let mut inner = self.inner.lock().unwrap();
        let key = namespaced_key(
            binding.metadata.namespace.as_deref().unwrap_or(""),
            &binding.metadata.name,
        );
        let stored = inner.bindings.get_mut(&key).ok_or_else(|| {
            Error::not_found_by_name(
                ResourceType::ClusterRoleTemplateBinding,
                &binding.metadata.name,
            )
        })?;
        check_version(
            stored.metadata.resource_version,
            binding.metadata.resource_version,
            ResourceType::ClusterRoleTemplateBinding,
            &binding.metadata.name,
        )?;
        // Status lives behind a subresource; a plain update never writes it.
        let mut binding = binding;
        binding.status = stored.status.clone();
        binding.metadata.resource_version += 1;
        *stored = binding.clone();
        Ok(binding)
    }

    async fn update_binding_status(
        &self,
        binding: ClusterRoleTemplateBinding,
    ) -> Result<ClusterRoleTemplateBinding, Error> {
        self.record(
            CallKind::UpdateStatus,
            ResourceType::ClusterRoleTemplateBinding,
            &binding.metadata.name,
        )?;
        let mut inner = self.inner.lock().unwrap();
        let key = namespaced_key(
            binding.metadata.namespace.as_deref().unwrap_or(""),
            &binding.metadata.name,
        );
        let stored = inner.bindings.get_mut(&key).ok_or_else(|| {
            Error::not_found_by_name(
                ResourceType::ClusterRoleTemplateBinding,
                &binding.metadata.name,
            )
        })?;
        check_version(
            stored.metadata.resource_version,
            binding.metadata.resource_version,
            ResourceType::ClusterRoleTemplateBinding,
            &binding.metadata.name,
        )?;
        stored.status = binding.status;
        stored.metadata.resource_version += 1;
        Ok(stored.clone())
    }

    async fn patch_binding_status(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<ClusterRoleTemplateBinding, Error> {
        self.record(
            CallKind::Patch,
            ResourceType::ClusterRoleTemplateBinding,
            name,
        )?;
        let mut inner = self.inner.lock().unwrap();
        let key = namespaced_key(namespace, name);
        let stored = inner.bindings.get_mut(&key).ok_or_else(|| {
            Error::not_found_by_name(
                ResourceType::ClusterRoleTemplateBinding,
                name,
            )
        })?;
        let mut value = serde_json::to_value(&*stored).map_err(|e| {
            Error::internal_error(&format!("serializing binding: {}", e))
        })?;
        json_patch::merge(&mut value, patch);
        let mut patched: ClusterRoleTemplateBinding =
            serde_json::from_value(value).map_err(|e| {
                Error::internal_error(&format!(
                    "applying status patch: {}",
                    e
                ))
            })?;
        patched.metadata.resource_version += 1;
        *stored = patched.clone();
        Ok(patched)
    }
}

#[async_trait]
impl ServiceAccountStore for FakeCluster {
    async fn get_service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ServiceAccount, Error> {
        self.record(CallKind::Get, ResourceType::ServiceAccount, name)?;
        self.inner
            .lock()
            .unwrap()
            .service_accounts
            .get(&namespaced_key(namespace, name))
            .cloned()
            .ok_or_else(|| {
                Error::not_found_by_name(ResourceType::ServiceAccount, name)
            })
    }

    async fn create_service_account(
        &self,
        account: ServiceAccount,
    ) -> Result<ServiceAccount, Error> {
        self.record(
            CallKind::Create,
            ResourceType::ServiceAccount,
            &account.metadata.name,
        )?;
        let mut inner = self.inner.lock().unwrap();
        let key = namespaced_key(
            account.metadata.namespace.as_deref().unwrap_or(""),
            &account.metadata.name,
        );
        if inner.service_accounts.contains_key(&key) {
            return Err(Error::ObjectAlreadyExists {
                type_name: ResourceType::ServiceAccount,
                object_name: account.metadata.name,
            });
        }
        let account = seeded(account, |a| &mut a.metadata);
        inner.service_accounts.insert(key, account.clone());
        Ok(account)
    }

    async fn delete_service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<(), Error> {
        self.record(CallKind::Delete, ResourceType::ServiceAccount, name)?;
        let mut inner = self.inner.lock().unwrap();
        inner
            .service_accounts
            .remove(&namespaced_key(namespace, name))
            .map(|_| ())
            .ok_or_else(|| {
                Error::not_found_by_name(ResourceType::ServiceAccount, name)
            })
    }
}

#[async_trait]
impl WorkspaceStore for FakeCluster {
    async fn list_workspaces(&self) -> Result<Vec<Workspace>, Error> {
        self.record(CallKind::List, ResourceType::Workspace, "")?;
        Ok(self.inner.lock().unwrap().workspaces.values().cloned().collect())
    }
}
