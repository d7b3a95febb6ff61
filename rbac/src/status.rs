// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Typed status conditions and summary aggregation for reconciled bindings
//!
//! Each reconciliation phase records exactly one condition, keyed by type.
//! The management-plane domain and the downstream-cluster domain write to
//! disjoint condition lists; only the synchronization step in this module
//! folds the two into the combined summary.  Persisting a condition uses a
//! minimal merge patch so that concurrent writers of unrelated status fields
//! are not clobbered.

use crate::store::BindingStore;
use chrono::Utc;
use flotilla_common::api::external::BindingStatus;
use flotilla_common::api::external::ClusterRoleTemplateBinding;
use flotilla_common::api::external::Condition;
use flotilla_common::api::external::ConditionStatus;
use flotilla_common::api::external::Error;
use flotilla_common::api::external::Summary;
use flotilla_common::retry::RetryPolicy;
use flotilla_common::retry::retry_on_conflict;
use serde_json::Value;
use serde_json::json;
use slog::Logger;
use slog::debug;
use uuid::Uuid;

/// All native roles derived from the binding's template exist with current
/// content.
pub const COND_ROLES_EXIST: &str = "RolesExist";
/// All native bindings granting those roles to the subject exist.
pub const COND_BINDINGS_EXIST: &str = "BindingsExist";
/// The impersonation identity for the binding's user is provisioned.  This
/// is the final phase; its presence makes a condition set "complete".
pub const COND_IMPERSONATOR_EXISTS: &str = "ImpersonatorExists";

pub const REASON_ROLE_TEMPLATE_DOES_NOT_EXIST: &str =
    "RoleTemplateDoesNotExist";
pub const REASON_USER_OR_GROUP_DOES_NOT_EXIST: &str = "UserOrGroupDoesNotExist";
pub const REASON_FAILED_TO_GET_ROLE_TEMPLATE: &str = "FailedToGetRoleTemplate";
pub const REASON_FAILED_TO_GATHER_ROLES: &str = "FailedToGatherRoles";
pub const REASON_FAILED_TO_CREATE_ROLES: &str = "FailedToCreateRoles";
pub const REASON_FAILED_TO_CREATE_BINDINGS: &str = "FailedToCreateBindings";
pub const REASON_FAILED_TO_CREATE_SERVICE_ACCOUNT_IMPERSONATOR: &str =
    "FailedToCreateServiceAccountImpersonator";

/// A passing condition; the reason is the condition type itself
pub fn condition_true(type_: &str, message: String) -> Condition {
    Condition {
        type_: type_.to_string(),
        status: ConditionStatus::True,
        reason: type_.to_string(),
        message,
        last_transition_time: Utc::now(),
    }
}

/// A failing condition with a machine-readable reason
pub fn condition_false(type_: &str, reason: &str, message: String) -> Condition {
    Condition {
        type_: type_.to_string(),
        status: ConditionStatus::False,
        reason: reason.to_string(),
        message,
        last_transition_time: Utc::now(),
    }
}

/// Inserts or replaces the condition with `condition`'s type
///
/// There is never more than one condition per type.  The transition time of
/// an existing condition is preserved unless the status actually changed.
pub fn upsert_condition(conditions: &mut Vec<Condition>, condition: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            let transition_time = if existing.status == condition.status {
                existing.last_transition_time
            } else {
                condition.last_transition_time
            };
            *existing = Condition { last_transition_time: transition_time, ..condition };
        }
        None => conditions.push(condition),
    }
}

/// Derives the aggregate state of one condition list
///
/// Any failed condition dominates; otherwise the list is complete once the
/// final phase has been recorded.
pub fn summarize(conditions: &[Condition], final_type: &str) -> Summary {
    if conditions.iter().any(|c| c.status == ConditionStatus::False) {
        return Summary::Error;
    }
    if conditions.iter().any(|c| c.type_ == final_type) {
        return Summary::Completed;
    }
    Summary::InProgress
}

/// Folds the local and remote summaries into the combined summary
pub fn combine_summaries(local: Summary, remote: Summary) -> Summary {
    match (local, remote) {
        (Summary::Error, _) | (_, Summary::Error) => Summary::Error,
        (Summary::Completed, Summary::Completed) => Summary::Completed,
        _ => Summary::InProgress,
    }
}

/// Computes the minimal merge patch taking `old` to `new`
///
/// Returns `None` when the statuses are structurally equal: a patch that
/// would reduce to only the identity precondition is a write with no
/// observable effect and is skipped.  The object's UID is included so the
/// store rejects the patch if the object was deleted and recreated.
pub fn status_merge_patch(
    uid: Uuid,
    old: &BindingStatus,
    new: &BindingStatus,
) -> Result<Option<Value>, Error> {
    let old_value = serde_json::to_value(old).map_err(|e| {
        Error::internal_error(&format!("serializing old status: {}", e))
    })?;
    let new_value = serde_json::to_value(new).map_err(|e| {
        Error::internal_error(&format!("serializing new status: {}", e))
    })?;
    let diff = merge_diff(&old_value, &new_value);
    if diff.as_object().map(|m| m.is_empty()).unwrap_or(false) {
        return Ok(None);
    }
    Ok(Some(json!({
        "metadata": { "uid": uid },
        "status": diff,
    })))
}

/// Two-way RFC 7386 merge diff: applying the result to `old` yields `new`
///
/// Nested objects are diffed recursively; arrays and scalars are replaced
/// wholesale; keys absent from `new` become explicit nulls.
fn merge_diff(old: &Value, new: &Value) -> Value {
    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            let mut diff = serde_json::Map::new();
            for (key, old_entry) in old_map {
                match new_map.get(key) {
                    None => {
                        diff.insert(key.clone(), Value::Null);
                    }
                    Some(new_entry) if new_entry != old_entry => {
                        diff.insert(
                            key.clone(),
                            merge_diff(old_entry, new_entry),
                        );
                    }
                    Some(_) => {}
                }
            }
            for (key, new_entry) in new_map {
                if !old_map.contains_key(key) {
                    diff.insert(key.clone(), new_entry.clone());
                }
            }
            Value::Object(diff)
        }
        _ => new.clone(),
    }
}

/// Upserts conditions reported by the downstream-cluster domain and
/// recomputes the remote and combined summaries
///
/// Fetches the latest binding, compares the resulting remote-condition list
/// by deep equality, and skips the write entirely when nothing would change.
/// Runs under the bounded conflict-retry discipline.
pub async fn sync_remote_conditions(
    store: &dyn BindingStore,
    retry: &RetryPolicy,
    log: &Logger,
    namespace: &str,
    name: &str,
    remote: &[Condition],
) -> Result<(), Error> {
    retry_on_conflict(retry, || async {
        let mut latest = store.get_binding(namespace, name).await?;
        let mut remote_conditions = latest.status.remote_conditions.clone();
        for condition in remote {
            upsert_condition(&mut remote_conditions, condition.clone());
        }
        let summary_remote =
            summarize(&remote_conditions, COND_IMPERSONATOR_EXISTS);
        let summary =
            combine_summaries(latest.status.summary_local, summary_remote);
        if remote_conditions == latest.status.remote_conditions
            && summary_remote == latest.status.summary_remote
            && summary == latest.status.summary
        {
            debug!(log, "remote conditions unchanged, skipping status write";
                "binding" => name);
            return Ok(());
        }
        latest.status.remote_conditions = remote_conditions;
        latest.status.summary_remote = summary_remote;
        latest.status.summary = summary;
        latest.status.last_update_time = Some(Utc::now());
        store.update_binding_status(latest).await?;
        Ok(())
    })
    .await
}

/// Applies `condition` to the binding's local condition list and persists
/// the change with a minimal status patch
///
/// The binding's resource version is refreshed from the patched object so
/// follow-up writes in the same pass do not conflict with ourselves.
pub async fn record_condition(
    store: &dyn BindingStore,
    log: &Logger,
    binding: &mut ClusterRoleTemplateBinding,
    condition: Condition,
) -> Result<(), Error> {
    let old_status = binding.status.clone();
    upsert_condition(&mut binding.status.conditions, condition);
    let Some(patch) =
        status_merge_patch(binding.metadata.uid, &old_status, &binding.status)?
    else {
        debug!(log, "status unchanged, skipping patch";
            "binding" => &binding.metadata.name);
        return Ok(());
    };
    let namespace =
        binding.metadata.namespace.clone().unwrap_or_default();
    let patched = store
        .patch_binding_status(&namespace, &binding.metadata.name, &patch)
        .await
        .map_err(|e| e.internal_context("patching binding status condition"))?;
    binding.metadata.resource_version = patched.metadata.resource_version;
    Ok(())
}
