// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Data structures and related facilities for representing resources in the
//! API
//!
//! These are the management-plane objects (role templates, bindings) and the
//! native cluster objects (cluster roles, cluster role bindings, service
//! accounts) that the access-control core mirrors between them.  The contents
//! here are all HTTP-agnostic.

mod error;
pub mod labels;
pub use error::*;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::fmt::Formatter;
use std::fmt::Result as FormatResult;
use uuid::Uuid;

/// The kind of an API resource, used in errors, owner references, and log
/// messages
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Ord, PartialEq, PartialOrd, Serialize,
)]
pub enum ResourceType {
    RoleTemplate,
    GlobalRole,
    ClusterRoleTemplateBinding,
    ClusterRole,
    ClusterRoleBinding,
    ServiceAccount,
    Workspace,
}

impl Display for ResourceType {
    fn fmt(&self, f: &mut Formatter) -> FormatResult {
        write!(
            f,
            "{}",
            match self {
                ResourceType::RoleTemplate => "role template",
                ResourceType::GlobalRole => "global role",
                ResourceType::ClusterRoleTemplateBinding =>
                    "cluster role template binding",
                ResourceType::ClusterRole => "cluster role",
                ResourceType::ClusterRoleBinding => "cluster role binding",
                ResourceType::ServiceAccount => "service account",
                ResourceType::Workspace => "workspace",
            }
        )
    }
}

/// Identity shared by all API objects
///
/// `resource_version` is an opaque counter bumped by the store on every
/// write.  A write that presents a stale version fails with
/// [`Error::Conflict`]; see [`crate::retry`].
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub uid: Uuid,
    #[serde(default)]
    pub resource_version: u64,
    #[serde(default)]
    pub generation: i64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
}

impl ObjectMeta {
    /// Metadata for a new cluster-scoped object
    pub fn named(name: &str) -> ObjectMeta {
        ObjectMeta { name: name.to_string(), ..Default::default() }
    }

    /// Metadata for a new namespaced object
    pub fn namespaced(namespace: &str, name: &str) -> ObjectMeta {
        ObjectMeta {
            name: name.to_string(),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        }
    }
}

/// Reference to the object that owns a derived object, used by the store for
/// garbage collection
///
/// Owner references cannot be queried with a label selector, which is why
/// derived objects additionally carry an owner label.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub kind: ResourceType,
    pub name: String,
    pub uid: Uuid,
}

/// A single policy rule: which verbs apply to which resources, optionally
/// restricted to specific resource names
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRule {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub verbs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub api_groups: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_names: Vec<String>,
}

/// A named, reusable bundle of policy rules that can inherit from other
/// templates
///
/// Templates are authored on the management plane and never written by the
/// reconciliation engine.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleTemplate {
    pub metadata: ObjectMeta,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<PolicyRule>,
    /// Names of templates this template inherits from
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub role_template_names: Vec<String>,
    #[serde(default)]
    pub administrative: bool,
}

/// The native, enforceable role object synthesized from a template
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterRole {
    pub metadata: ObjectMeta,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<PolicyRule>,
}

#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Ord, PartialEq, PartialOrd, Serialize,
)]
pub enum SubjectKind {
    User,
    Group,
    ServiceAccount,
}

/// The subject a native binding grants a role to
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub kind: SubjectKind,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl Subject {
    pub fn user(name: &str) -> Subject {
        Subject { kind: SubjectKind::User, name: name.to_string(), namespace: None }
    }

    pub fn group(name: &str) -> Subject {
        Subject { kind: SubjectKind::Group, name: name.to_string(), namespace: None }
    }

    pub fn service_account(namespace: &str, name: &str) -> Subject {
        Subject {
            kind: SubjectKind::ServiceAccount,
            name: name.to_string(),
            namespace: Some(namespace.to_string()),
        }
    }
}

/// The native binding object granting a cluster role to a subject
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterRoleBinding {
    pub metadata: ObjectMeta,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subjects: Vec<Subject>,
    pub role_name: String,
}

/// Associates a subject with a role template, scoped to one managed cluster
///
/// Created by binding-management logic upstream of this crate; the
/// reconciliation engine consumes it and records the outcome in `status`.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterRoleTemplateBinding {
    pub metadata: ObjectMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_principal_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_template_name: Option<String>,
    #[serde(default)]
    pub cluster_name: String,
    #[serde(default)]
    pub status: BindingStatus,
}

/// Outcome of one reconciliation phase, at most one per `type_` in a status
/// block
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum ConditionStatus {
    True,
    False,
}

/// Aggregate reconciliation state derived from a binding's conditions
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum Summary {
    #[default]
    InProgress,
    Completed,
    Error,
}

/// Status block of a [`ClusterRoleTemplateBinding`]
///
/// `conditions` is written by the control domain that owns the binding;
/// `remote_conditions` by the downstream-cluster domain.  The two lists are
/// disjoint and merged only by the summary synchronization step.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BindingStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remote_conditions: Vec<Condition>,
    #[serde(default)]
    pub summary: Summary,
    #[serde(default)]
    pub summary_local: Summary,
    #[serde(default)]
    pub summary_remote: Summary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub observed_generation: i64,
}

/// A provisioned downstream service identity
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccount {
    pub metadata: ObjectMeta,
}

/// A named partition used to scope certain cluster-wide resources
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub metadata: ObjectMeta,
}

/// Permissions inherited by every workspace a global role's subject can see
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspacePermission {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_rules: Vec<PolicyRule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub workspace_verbs: Vec<String>,
}

/// A management-plane role granting cluster-wide permissions, optionally
/// carrying an inherited workspace permission block
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalRole {
    pub metadata: ObjectMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inherited_workspace_permissions: Option<WorkspacePermission>,
}
