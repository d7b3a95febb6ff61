// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The binding reconciler: drives one binding from event to converged
//! native state
//!
//! For each binding event the reconciler resolves the referenced template's
//! inheritance graph, synthesizes the native roles and bindings, and
//! provisions the user's impersonation identity, recording each phase as a
//! typed status condition.  A failed phase both leaves a condition on the
//! object and returns the error, so the surrounding work queue reschedules
//! the binding.  The whole sequence is idempotent; re-running it against
//! converged state performs reads only.
//!
//! The work queue guarantees at most one in-flight reconcile per binding.
//! Distinct bindings reconcile concurrently without locking: every native
//! object name is derived from exactly one owning binding, so writers never
//! overlap.

use crate::bindings::binding_subject;
use crate::bindings::ensure_cluster_role_bindings;
use crate::gather::GatheredRoles;
use crate::gather::gather_role_templates;
use crate::impersonation::Impersonator;
use crate::migration::migrate_legacy_labels;
use crate::names::RTB_OWNER_LABEL;
use crate::names::binding_owner_value;
use crate::roles::ensure_cluster_roles;
use crate::status::COND_BINDINGS_EXIST;
use crate::status::COND_IMPERSONATOR_EXISTS;
use crate::status::COND_ROLES_EXIST;
use crate::status::REASON_FAILED_TO_CREATE_BINDINGS;
use crate::status::REASON_FAILED_TO_CREATE_ROLES;
use crate::status::REASON_FAILED_TO_CREATE_SERVICE_ACCOUNT_IMPERSONATOR;
use crate::status::REASON_FAILED_TO_GATHER_ROLES;
use crate::status::REASON_FAILED_TO_GET_ROLE_TEMPLATE;
use crate::status::REASON_ROLE_TEMPLATE_DOES_NOT_EXIST;
use crate::status::REASON_USER_OR_GROUP_DOES_NOT_EXIST;
use crate::status::combine_summaries;
use crate::status::condition_false;
use crate::status::condition_true;
use crate::status::record_condition;
use crate::status::summarize;
use crate::store::BindingStore;
use crate::store::ClusterRoleBindingStore;
use crate::store::ClusterRoleStore;
use crate::store::RoleTemplateStore;
use chrono::Utc;
use flotilla_common::api::external::ClusterRoleTemplateBinding;
use flotilla_common::api::external::Error;
use flotilla_common::api::external::Summary;
use flotilla_common::api::external::labels::LabelSelector;
use flotilla_common::retry::RetryPolicy;
use flotilla_common::retry::retry_on_conflict;
use slog::Logger;
use slog::info;
use slog::o;
use slog::warn;
use std::sync::Arc;

/// Reconciles bindings into native roles, native bindings, and
/// impersonation identities
pub struct BindingReconciler {
    role_templates: Arc<dyn RoleTemplateStore>,
    cluster_roles: Arc<dyn ClusterRoleStore>,
    cluster_role_bindings: Arc<dyn ClusterRoleBindingStore>,
    bindings: Arc<dyn BindingStore>,
    impersonator: Impersonator,
    retry: RetryPolicy,
    log: Logger,
}

impl BindingReconciler {
    pub fn new(
        role_templates: Arc<dyn RoleTemplateStore>,
        cluster_roles: Arc<dyn ClusterRoleStore>,
        cluster_role_bindings: Arc<dyn ClusterRoleBindingStore>,
        bindings: Arc<dyn BindingStore>,
        impersonator: Impersonator,
        retry: RetryPolicy,
        log: Logger,
    ) -> BindingReconciler {
        BindingReconciler {
            role_templates,
            cluster_roles,
            cluster_role_bindings,
            bindings,
            impersonator,
            retry,
            log,
        }
    }

    /// Handles a newly created binding: marks it in progress, runs the full
    /// sync sequence, and records the final summary
    pub async fn binding_created(
        &self,
        binding: &mut ClusterRoleTemplateBinding,
    ) -> Result<(), Error> {
        self.set_in_progress(binding).await?;
        let synced = self.sync(binding).await;
        // The summary is recorded even when a phase failed, so the
        // conditions left by the failed phase are reflected in it.
        self.set_completed(binding).await?;
        synced
    }

    /// Handles an updated binding: performs the one-time label migration,
    /// then re-runs the sync sequence and summary
    pub async fn binding_updated(
        &self,
        binding: &mut ClusterRoleTemplateBinding,
    ) -> Result<(), Error> {
        migrate_legacy_labels(
            &*self.bindings,
            &*self.cluster_role_bindings,
            &self.retry,
            &self.log,
            binding,
        )
        .await?;
        let synced = self.sync(binding).await;
        self.set_completed(binding).await?;
        synced
    }

    /// Handles binding deletion: removes every native binding carrying this
    /// binding's owner label, then releases the impersonation identity
    ///
    /// Deletion is order-independent and tolerant: native bindings that were
    /// already removed by hand count as satisfied.
    pub async fn binding_removed(
        &self,
        binding: &ClusterRoleTemplateBinding,
    ) -> Result<(), Error> {
        let selector = LabelSelector::new()
            .match_label(RTB_OWNER_LABEL, &binding_owner_value(binding));
        let owned = self
            .cluster_role_bindings
            .list_cluster_role_bindings(&selector)
            .await
            .map_err(|e| {
                e.internal_context(format!(
                    "listing cluster role bindings with selector {}",
                    selector
                ))
            })?;
        for crb in owned {
            match self
                .cluster_role_bindings
                .delete_cluster_role_binding(&crb.metadata.name)
                .await
            {
                Ok(()) => {}
                Err(error) if error.is_not_found() => {}
                Err(error) => {
                    return Err(error.internal_context(format!(
                        "deleting cluster role binding {:?}",
                        crb.metadata.name
                    )));
                }
            }
        }

        if let Some(user) = &binding.user_name {
            let namespace =
                binding.metadata.namespace.as_deref().unwrap_or("");
            self.impersonator
                .delete_impersonator(
                    user,
                    Some((namespace, binding.metadata.name.as_str())),
                )
                .await?;
        }
        info!(self.log, "cleaned up binding";
            "binding" => &binding.metadata.name);
        Ok(())
    }

    /// The phase sequence: validate, gather, roles, bindings, impersonator
    ///
    /// Each phase failure is recorded as a condition and returned.
    /// Validation failures are recorded but not returned: retrying cannot
    /// fix a malformed binding.
    async fn sync(
        &self,
        binding: &mut ClusterRoleTemplateBinding,
    ) -> Result<(), Error> {
        let log = self
            .log
            .new(o!("binding" => binding.metadata.name.clone()));
        let name = binding.metadata.name.clone();

        let Some(template_name) = binding.role_template_name.clone() else {
            warn!(log, "binding has no role template set, skipping");
            record_condition(
                &*self.bindings,
                &log,
                binding,
                condition_false(
                    COND_ROLES_EXIST,
                    REASON_ROLE_TEMPLATE_DOES_NOT_EXIST,
                    format!("{} has no role template set", name),
                ),
            )
            .await?;
            return Ok(());
        };
        if binding_subject(binding).is_none() {
            record_condition(
                &*self.bindings,
                &log,
                binding,
                condition_false(
                    COND_ROLES_EXIST,
                    REASON_USER_OR_GROUP_DOES_NOT_EXIST,
                    format!(
                        "{} has no user name, group principal name or \
                         group name set",
                        name
                    ),
                ),
            )
            .await?;
            return Ok(());
        }

        let template = match self
            .role_templates
            .get_role_template(&template_name)
            .await
        {
            Ok(template) => template,
            Err(error) => {
                record_condition(
                    &*self.bindings,
                    &log,
                    binding,
                    condition_false(
                        COND_ROLES_EXIST,
                        REASON_FAILED_TO_GET_ROLE_TEMPLATE,
                        format!(
                            "couldn't get role template {:?}: {}",
                            template_name, error
                        ),
                    ),
                )
                .await?;
                return Err(error);
            }
        };

        let mut roles = GatheredRoles::new();
        if let Err(error) =
            gather_role_templates(&*self.role_templates, &template, &mut roles)
                .await
        {
            record_condition(
                &*self.bindings,
                &log,
                binding,
                condition_false(
                    COND_ROLES_EXIST,
                    REASON_FAILED_TO_GATHER_ROLES,
                    format!("couldn't gather roles: {}", error),
                ),
            )
            .await?;
            return Err(error.into());
        }

        if let Err(error) =
            ensure_cluster_roles(&*self.cluster_roles, &log, &roles).await
        {
            record_condition(
                &*self.bindings,
                &log,
                binding,
                condition_false(
                    COND_ROLES_EXIST,
                    REASON_FAILED_TO_CREATE_ROLES,
                    format!("couldn't ensure roles: {}", error),
                ),
            )
            .await?;
            return Err(error);
        }
        record_condition(
            &*self.bindings,
            &log,
            binding,
            condition_true(COND_ROLES_EXIST, format!("{} created", name)),
        )
        .await?;

        if let Err(error) = ensure_cluster_role_bindings(
            &*self.cluster_role_bindings,
            &log,
            &roles,
            binding,
        )
        .await
        {
            record_condition(
                &*self.bindings,
                &log,
                binding,
                condition_false(
                    COND_BINDINGS_EXIST,
                    REASON_FAILED_TO_CREATE_BINDINGS,
                    format!("couldn't ensure cluster bindings: {}", error),
                ),
            )
            .await?;
            return Err(error);
        }
        record_condition(
            &*self.bindings,
            &log,
            binding,
            condition_true(COND_BINDINGS_EXIST, format!("{} created", name)),
        )
        .await?;

        if let Some(user) = binding.user_name.clone() {
            if let Err(error) =
                self.impersonator.ensure_impersonator(&user).await
            {
                record_condition(
                    &*self.bindings,
                    &log,
                    binding,
                    condition_false(
                        COND_IMPERSONATOR_EXISTS,
                        REASON_FAILED_TO_CREATE_SERVICE_ACCOUNT_IMPERSONATOR,
                        format!(
                            "couldn't ensure service account impersonator: {}",
                            error
                        ),
                    ),
                )
                .await?;
                return Err(error);
            }
        }
        record_condition(
            &*self.bindings,
            &log,
            binding,
            condition_true(
                COND_IMPERSONATOR_EXISTS,
                format!("{} created", name),
            ),
        )
        .await
    }

    /// Clears the conditions this reconciler manages and marks the binding
    /// in progress before a sync
    async fn set_in_progress(
        &self,
        binding: &mut ClusterRoleTemplateBinding,
    ) -> Result<(), Error> {
        let namespace =
            binding.metadata.namespace.clone().unwrap_or_default();
        let name = binding.metadata.name.clone();
        let updated = retry_on_conflict(&self.retry, || async {
            let mut latest =
                self.bindings.get_binding(&namespace, &name).await?;
            latest.status.conditions.clear();
            latest.status.summary = Summary::InProgress;
            latest.status.summary_local = Summary::InProgress;
            latest.status.last_update_time = Some(Utc::now());
            self.bindings.update_binding_status(latest).await
        })
        .await?;
        // Later writes in this pass build on the version we just produced.
        *binding = updated;
        Ok(())
    }

    /// Derives the local summary from the recorded conditions and persists
    /// it together with the observed generation
    async fn set_completed(
        &self,
        binding: &mut ClusterRoleTemplateBinding,
    ) -> Result<(), Error> {
        let summary_local =
            summarize(&binding.status.conditions, COND_IMPERSONATOR_EXISTS);
        let namespace =
            binding.metadata.namespace.clone().unwrap_or_default();
        let name = binding.metadata.name.clone();
        let conditions = binding.status.conditions.clone();
        let observed_generation = binding.metadata.generation;
        let updated = retry_on_conflict(&self.retry, || async {
            let mut latest =
                self.bindings.get_binding(&namespace, &name).await?;
            latest.status.conditions = conditions.clone();
            latest.status.summary_local = summary_local;
            // A binding with no remote domain is summarized from the local
            // phases alone.
            latest.status.summary =
                if latest.status.remote_conditions.is_empty() {
                    summary_local
                } else {
                    combine_summaries(
                        summary_local,
                        latest.status.summary_remote,
                    )
                };
            latest.status.observed_generation = observed_generation;
            latest.status.last_update_time = Some(Utc::now());
            self.bindings.update_binding_status(latest).await
        })
        .await?;
        *binding = updated;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fakes::CallKind;
    use crate::fakes::FakeCluster;
    use crate::impersonation::IMPERSONATION_NAMESPACE;
    use crate::impersonation::impersonation_account_name;
    use crate::names::cluster_role_binding_name;
    use flotilla_common::api::external::ConditionStatus;
    use flotilla_common::api::external::ObjectMeta;
    use flotilla_common::api::external::PolicyRule;
    use flotilla_common::api::external::ResourceType;
    use flotilla_common::api::external::RoleTemplate;
    use uuid::Uuid;

    fn reconciler(fake: &Arc<FakeCluster>) -> BindingReconciler {
        let log = Logger::root(slog::Discard, o!());
        BindingReconciler::new(
            fake.clone(),
            fake.clone(),
            fake.clone(),
            fake.clone(),
            Impersonator::new(
                fake.clone(),
                fake.clone(),
                fake.clone(),
                fake.clone(),
                log.clone(),
            ),
            RetryPolicy::default(),
            log,
        )
    }

    fn rule(verbs: &[&str]) -> PolicyRule {
        PolicyRule {
            verbs: verbs.iter().map(|v| v.to_string()).collect(),
            api_groups: vec!["".to_string()],
            resources: vec!["pods".to_string()],
            resource_names: vec![],
        }
    }

    fn template(name: &str, inherits: &[&str], rules: Vec<PolicyRule>) -> RoleTemplate {
        RoleTemplate {
            metadata: ObjectMeta::named(name),
            rules,
            role_template_names: inherits
                .iter()
                .map(|n| n.to_string())
                .collect(),
            ..Default::default()
        }
    }

    fn seeded_binding(
        fake: &FakeCluster,
        template_name: Option<&str>,
        user: Option<&str>,
    ) -> ClusterRoleTemplateBinding {
        let mut metadata = ObjectMeta::namespaced("c-abc", "b1");
        metadata.uid = Uuid::new_v4();
        let binding = ClusterRoleTemplateBinding {
            metadata,
            user_name: user.map(|u| u.to_string()),
            role_template_name: template_name.map(|t| t.to_string()),
            ..Default::default()
        };
        fake.put_binding(binding.clone());
        fake.binding("c-abc", "b1").unwrap()
    }

    fn native_writes(fake: &FakeCluster) -> usize {
        fake.writes()
            .iter()
            .filter(|c| {
                matches!(
                    c.resource,
                    ResourceType::ClusterRole
                        | ResourceType::ClusterRoleBinding
                        | ResourceType::ServiceAccount
                )
            })
            .count()
    }

    #[tokio::test]
    async fn test_create_converges_and_completes() {
        let fake = Arc::new(FakeCluster::new());
        fake.put_role_template(template(
            "view",
            &["view-base"],
            vec![rule(&["get", "list"])],
        ));
        fake.put_role_template(template(
            "view-base",
            &[],
            vec![rule(&["get"])],
        ));
        let mut binding =
            seeded_binding(&fake, Some("view"), Some("alice"));

        reconciler(&fake).binding_created(&mut binding).await.unwrap();

        // Both templates materialized as cluster roles, each bound to alice.
        assert!(fake.cluster_role("view").is_some());
        assert!(fake.cluster_role("view-base").is_some());
        for role in ["view", "view-base"] {
            let name = cluster_role_binding_name(&binding, role);
            assert!(fake.cluster_role_binding(&name).is_some());
        }
        let sa_name = impersonation_account_name("alice");
        assert!(
            fake.service_account(IMPERSONATION_NAMESPACE, &sa_name).is_some()
        );

        let stored = fake.binding("c-abc", "b1").unwrap();
        let types: Vec<_> = stored
            .status
            .conditions
            .iter()
            .map(|c| c.type_.as_str())
            .collect();
        assert_eq!(
            types,
            vec![COND_ROLES_EXIST, COND_BINDINGS_EXIST, COND_IMPERSONATOR_EXISTS]
        );
        assert!(
            stored
                .status
                .conditions
                .iter()
                .all(|c| c.status == ConditionStatus::True)
        );
        assert_eq!(stored.status.summary_local, Summary::Completed);
        assert_eq!(stored.status.summary, Summary::Completed);
    }

    #[tokio::test]
    async fn test_second_pass_performs_no_native_writes() {
        let fake = Arc::new(FakeCluster::new());
        fake.put_role_template(template("view", &[], vec![rule(&["get"])]));
        let mut binding =
            seeded_binding(&fake, Some("view"), Some("alice"));
        let r = reconciler(&fake);
        r.binding_created(&mut binding).await.unwrap();
        let writes_before = native_writes(&fake);

        r.binding_updated(&mut binding).await.unwrap();
        assert_eq!(native_writes(&fake), writes_before);
    }

    #[tokio::test]
    async fn test_template_rule_change_updates_each_role_once() {
        let fake = Arc::new(FakeCluster::new());
        fake.put_role_template(template("view", &[], vec![rule(&["get"])]));
        let mut binding =
            seeded_binding(&fake, Some("view"), Some("alice"));
        let r = reconciler(&fake);
        r.binding_created(&mut binding).await.unwrap();

        fake.put_role_template(template(
            "view",
            &[],
            vec![rule(&["get", "watch"])],
        ));
        r.binding_updated(&mut binding).await.unwrap();

        assert_eq!(
            fake.cluster_role("view").unwrap().rules,
            vec![rule(&["get", "watch"])]
        );
        let role_updates = fake
            .calls()
            .iter()
            .filter(|c| {
                c.kind == CallKind::Update
                    && c.resource == ResourceType::ClusterRole
            })
            .count();
        assert_eq!(role_updates, 1);
    }

    #[tokio::test]
    async fn test_missing_template_name_is_degenerate_noop() {
        let fake = Arc::new(FakeCluster::new());
        let mut binding = seeded_binding(&fake, None, Some("alice"));

        reconciler(&fake).binding_created(&mut binding).await.unwrap();

        let stored = fake.binding("c-abc", "b1").unwrap();
        assert_eq!(stored.status.conditions.len(), 1);
        assert_eq!(
            stored.status.conditions[0].reason,
            REASON_ROLE_TEMPLATE_DOES_NOT_EXIST
        );
        assert_eq!(stored.status.summary, Summary::Error);
        assert_eq!(native_writes(&fake), 0);
    }

    #[tokio::test]
    async fn test_missing_subject_is_degenerate_noop() {
        let fake = Arc::new(FakeCluster::new());
        fake.put_role_template(template("view", &[], vec![]));
        let mut binding = seeded_binding(&fake, Some("view"), None);

        reconciler(&fake).binding_created(&mut binding).await.unwrap();

        let stored = fake.binding("c-abc", "b1").unwrap();
        assert_eq!(
            stored.status.conditions[0].reason,
            REASON_USER_OR_GROUP_DOES_NOT_EXIST
        );
        assert_eq!(native_writes(&fake), 0);
    }

    #[tokio::test]
    async fn test_template_fetch_failure_recorded_and_returned() {
        let fake = Arc::new(FakeCluster::new());
        let mut binding =
            seeded_binding(&fake, Some("gone"), Some("alice"));

        let error = reconciler(&fake)
            .binding_created(&mut binding)
            .await
            .unwrap_err();
        assert!(error.is_not_found());

        let stored = fake.binding("c-abc", "b1").unwrap();
        assert_eq!(
            stored.status.conditions[0].reason,
            REASON_FAILED_TO_GET_ROLE_TEMPLATE
        );
        assert_eq!(stored.status.summary, Summary::Error);
    }

    #[tokio::test]
    async fn test_role_creation_failure_recorded_and_returned() {
        let fake = Arc::new(FakeCluster::new());
        fake.put_role_template(template("view", &[], vec![rule(&["get"])]));
        fake.inject_error(
            CallKind::Create,
            ResourceType::ClusterRole,
            Error::unavail("api server unavailable"),
        );
        let mut binding =
            seeded_binding(&fake, Some("view"), Some("alice"));

        let error = reconciler(&fake)
            .binding_created(&mut binding)
            .await
            .unwrap_err();
        assert!(matches!(error, Error::ServiceUnavailable { .. }));

        let stored = fake.binding("c-abc", "b1").unwrap();
        assert_eq!(
            stored.status.conditions[0].reason,
            REASON_FAILED_TO_CREATE_ROLES
        );
        assert_eq!(stored.status.summary_local, Summary::Error);
    }

    #[tokio::test]
    async fn test_group_binding_skips_impersonator() {
        let fake = Arc::new(FakeCluster::new());
        fake.put_role_template(template("view", &[], vec![rule(&["get"])]));
        let mut metadata = ObjectMeta::namespaced("c-abc", "b1");
        metadata.uid = Uuid::new_v4();
        let binding = ClusterRoleTemplateBinding {
            metadata,
            group_name: Some("devs".to_string()),
            role_template_name: Some("view".to_string()),
            ..Default::default()
        };
        fake.put_binding(binding.clone());
        let mut binding = fake.binding("c-abc", "b1").unwrap();

        reconciler(&fake).binding_created(&mut binding).await.unwrap();

        // No impersonation identity for a group subject, but the phase is
        // still recorded so the summary can complete.
        assert!(
            fake.calls()
                .iter()
                .all(|c| c.resource != ResourceType::ServiceAccount
                    || c.kind == CallKind::Get)
        );
        let stored = fake.binding("c-abc", "b1").unwrap();
        assert_eq!(stored.status.summary, Summary::Completed);
    }

    #[tokio::test]
    async fn test_removal_deletes_owned_bindings_and_identity() {
        let fake = Arc::new(FakeCluster::new());
        fake.put_role_template(template("view", &[], vec![rule(&["get"])]));
        let mut binding =
            seeded_binding(&fake, Some("view"), Some("alice"));
        let r = reconciler(&fake);
        r.binding_created(&mut binding).await.unwrap();

        r.binding_removed(&binding).await.unwrap();

        let name = cluster_role_binding_name(&binding, "view");
        assert!(fake.cluster_role_binding(&name).is_none());
        let sa_name = impersonation_account_name("alice");
        assert!(
            fake.service_account(IMPERSONATION_NAMESPACE, &sa_name).is_none()
        );
    }

    #[tokio::test]
    async fn test_removal_tolerates_missing_native_bindings() {
        let fake = Arc::new(FakeCluster::new());
        fake.put_role_template(template("view", &[], vec![rule(&["get"])]));
        let mut binding =
            seeded_binding(&fake, Some("view"), Some("alice"));
        let r = reconciler(&fake);
        r.binding_created(&mut binding).await.unwrap();

        // Someone removed the native binding by hand.
        let name = cluster_role_binding_name(&binding, "view");
        fake.remove_cluster_role_binding(&name);

        r.binding_removed(&binding).await.unwrap();
    }

    #[tokio::test]
    async fn test_removal_keeps_identity_for_other_bindings() {
        let fake = Arc::new(FakeCluster::new());
        fake.put_role_template(template("view", &[], vec![rule(&["get"])]));
        let mut binding =
            seeded_binding(&fake, Some("view"), Some("alice"));
        let other = ClusterRoleTemplateBinding {
            metadata: ObjectMeta::namespaced("c-abc", "b2"),
            user_name: Some("alice".to_string()),
            role_template_name: Some("view".to_string()),
            ..Default::default()
        };
        fake.put_binding(other);
        let r = reconciler(&fake);
        r.binding_created(&mut binding).await.unwrap();

        r.binding_removed(&binding).await.unwrap();

        let sa_name = impersonation_account_name("alice");
        assert!(
            fake.service_account(IMPERSONATION_NAMESPACE, &sa_name).is_some()
        );
    }
}
