// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Transitive resolution of role template inheritance
//!
//! A template may inherit from other templates, which may themselves
//! inherit.  Resolution flattens the whole graph reachable from one root
//! into a deduplicated set.  Template authors can create cycles and
//! diamonds; a template already gathered is never re-expanded, and a depth
//! bound backstops the visited-set in case of a pathological graph.

use crate::store::RoleTemplateStore;
use flotilla_common::api::external::Error;
use flotilla_common::api::external::RoleTemplate;
use std::collections::BTreeMap;

/// Upper bound on inheritance depth, counted in edges from the root
pub const MAX_INHERITANCE_DEPTH: usize = 32;

/// The flattened output of resolution: template name to template, each
/// reachable template present exactly once
pub type GatheredRoles = BTreeMap<String, RoleTemplate>;

#[derive(Debug, thiserror::Error)]
pub enum GatherError {
    #[error("role template {name:?} referenced but could not be retrieved")]
    TemplateNotFound {
        name: String,
        #[source]
        source: Error,
    },
    #[error(
        "inheritance depth limit ({MAX_INHERITANCE_DEPTH}) exceeded \
         expanding role template {name:?}"
    )]
    MaxDepthExceeded { name: String },
}

impl From<GatherError> for Error {
    fn from(error: GatherError) -> Error {
        match error {
            GatherError::TemplateNotFound { source, .. } => source,
            e @ GatherError::MaxDepthExceeded { .. } => {
                Error::internal_error(&e.to_string())
            }
        }
    }
}

/// Populates `into` with `root` and everything `root` transitively inherits
///
/// A template already present in `into` is not re-expanded, so diamonds are
/// deduplicated and cycles terminate.  Hitting the depth bound means the
/// graph is pathological (or the visited-set guard has regressed); the
/// caller surfaces it as a reconciliation error, not a crash.
pub async fn gather_role_templates(
    store: &dyn RoleTemplateStore,
    root: &RoleTemplate,
    into: &mut GatheredRoles,
) -> Result<(), GatherError> {
    let mut pending = vec![(root.clone(), 0usize)];
    while let Some((template, depth)) = pending.pop() {
        if depth > MAX_INHERITANCE_DEPTH {
            return Err(GatherError::MaxDepthExceeded {
                name: template.metadata.name,
            });
        }
        let name = template.metadata.name.clone();
        if into.contains_key(&name) {
            continue;
        }
        let inherited = template.role_template_names.clone();
        into.insert(name, template);
        for parent_name in inherited {
            if into.contains_key(&parent_name) {
                continue;
            }
            let parent = store
                .get_role_template(&parent_name)
                .await
                .map_err(|source| GatherError::TemplateNotFound {
                    name: parent_name.clone(),
                    source,
                })?;
            pending.push((parent, depth + 1));
        }
    }
    Ok(())
}
