// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Synthesis of native cluster roles from gathered templates

use crate::gather::GatheredRoles;
use crate::names::MANAGED_BY_LABEL;
use crate::names::MANAGER_VALUE;
use crate::store::ClusterRoleStore;
use flotilla_common::api::external::ClusterRole;
use flotilla_common::api::external::Error;
use flotilla_common::api::external::ObjectMeta;
use slog::Logger;
use slog::debug;
use slog::info;

/// Ensures one native cluster role exists per gathered template, with rules
/// equal to the template's rules
///
/// Content comparison is structural equality of the rule list; an unchanged
/// role is left alone so downstream watchers see no spurious churn.
pub async fn ensure_cluster_roles(
    store: &dyn ClusterRoleStore,
    log: &Logger,
    roles: &GatheredRoles,
) -> Result<(), Error> {
    for (name, template) in roles {
        match store.get_cluster_role(name).await {
            Ok(existing) => {
                if existing.rules == template.rules {
                    debug!(log, "cluster role up to date"; "role" => name);
                    continue;
                }
                let mut updated = existing;
                updated.rules = template.rules.clone();
                store.update_cluster_role(updated).await.map_err(|e| {
                    e.internal_context(format!(
                        "updating cluster role {:?}",
                        name
                    ))
                })?;
                info!(log, "updated cluster role"; "role" => name);
            }
            Err(error) if error.is_not_found() => {
                let mut metadata = ObjectMeta::named(name);
                metadata.labels.insert(
                    MANAGED_BY_LABEL.to_string(),
                    MANAGER_VALUE.to_string(),
                );
                store
                    .create_cluster_role(ClusterRole {
                        metadata,
                        rules: template.rules.clone(),
                    })
                    .await
                    .map_err(|e| {
                        e.internal_context(format!(
                            "creating cluster role {:?}",
                            name
                        ))
                    })?;
                info!(log, "created cluster role"; "role" => name);
            }
            Err(error) => {
                return Err(error.internal_context(format!(
                    "fetching cluster role {:?}",
                    name
                )));
            }
        }
    }
    Ok(())
}
