use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::pin::Pin;

use tracing::{debug, info};

use crate::core::catalog::{require_version, CatalogClient, DependencyType, ModVersion};
use crate::core::error::{ErrorKind, ManagerError, ManagerResult};

/// Outcome of dependency resolution: one chosen version per mod id.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Resolution {
    resolved: BTreeMap<String, ModVersion>,
}

impl Resolution {
    pub fn get(&self, mod_id: &str) -> Option<&ModVersion> {
        self.resolved.get(mod_id)
    }

    pub fn as_map(&self) -> &BTreeMap<String, ModVersion> {
        &self.resolved
    }

    pub fn into_map(self) -> BTreeMap<String, ModVersion> {
        self.resolved
    }

    pub fn len(&self) -> usize {
        self.resolved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }

    /// Versions to materialize, in mod-id order.
    ///
    /// Embedded dependencies map to their parent version, so each distinct
    /// `(mod_id, version_id)` appears once.
    pub fn versions(&self) -> Vec<ModVersion> {
        let mut seen = HashSet::new();
        self.resolved
            .values()
            .filter(|v| seen.insert(v.key()))
            .cloned()
            .collect()
    }
}

type VisitFuture<'s> = Pin<Box<dyn Future<Output = ManagerResult<()>> + Send + 's>>;

/// Computes the closure of a selection under required edges.
///
/// Depth-first: `in_progress` holds the versions on the current path,
/// `finished` those whose subtree is complete.
pub struct ModResolver<'a> {
    catalog: &'a dyn CatalogClient,
    resolved: BTreeMap<String, ModVersion>,
    in_progress: HashSet<String>,
    finished: HashSet<String>,
    /// `(version key, conflicting mod id)`
    conflicts: Vec<(String, String)>,
}

impl<'a> ModResolver<'a> {
    pub fn new(catalog: &'a dyn CatalogClient) -> Self {
        Self {
            catalog,
            resolved: BTreeMap::new(),
            in_progress: HashSet::new(),
            finished: HashSet::new(),
            conflicts: Vec::new(),
        }
    }

    pub async fn resolve(mut self, initial: &[ModVersion]) -> ManagerResult<Resolution> {
        for version in initial {
            if self.resolved.contains_key(&version.mod_id) {
                debug!("Duplicate selection for {} ignored", version.mod_id);
                continue;
            }
            self.resolved.insert(version.mod_id.clone(), version.clone());
        }

        // Register embedded mods of the selection up front so that a sibling
        // requiring one of them does not go to the catalog for it.
        for version in initial {
            for dep in &version.dependencies {
                if dep.dep_type == DependencyType::Embedded
                    && !self.resolved.contains_key(&dep.id)
                {
                    self.resolved.insert(dep.id.clone(), version.clone());
                }
            }
        }

        for version in initial {
            let kept = self
                .resolved
                .get(&version.mod_id)
                .is_some_and(|v| v.key() == version.key());
            if kept {
                self.visit(version.clone()).await?;
            }
        }

        let violations: Vec<(String, String)> = self
            .conflicts
            .iter()
            .filter(|(_, mod_id)| self.resolved.contains_key(mod_id))
            .cloned()
            .collect();
        if !violations.is_empty() {
            return Err(ManagerError::Conflict(violations));
        }

        info!(
            "Resolved {} selected versions into {} mods",
            initial.len(),
            self.resolved.len()
        );
        Ok(Resolution {
            resolved: self.resolved,
        })
    }

    fn visit<'s>(&'s mut self, version: ModVersion) -> VisitFuture<'s> {
        Box::pin(async move {
            let key = version.key();
            if self.finished.contains(&key) {
                return Ok(());
            }
            if !self.in_progress.insert(key.clone()) {
                return Err(ManagerError::Cycle(key));
            }

            // Modpack members behave like required dependencies.
            let members = version
                .mods
                .iter()
                .map(|m| (m.id.as_str(), m.version.as_deref(), DependencyType::Required));
            let edges: Vec<(String, Option<String>, DependencyType)> = version
                .dependencies
                .iter()
                .map(|d| (d.id.as_str(), d.version.as_deref(), d.dep_type))
                .chain(members)
                .map(|(id, v, t)| (id.to_string(), v.map(str::to_string), t))
                .collect();

            for (dep_id, dep_version, dep_type) in edges {
                match dep_type {
                    DependencyType::Conflict => {
                        self.conflicts.push((key.clone(), dep_id));
                    }
                    DependencyType::Embedded => {
                        if !self.resolved.contains_key(&dep_id) {
                            debug!("{} is embedded in {}", dep_id, key);
                            self.resolved.insert(dep_id, version.clone());
                        }
                    }
                    DependencyType::Required | DependencyType::Optional => {
                        let existing = self.resolved.get(&dep_id).cloned();
                        let target = match existing {
                            Some(existing) => existing,
                            None => {
                                let fetched = require_version(
                                    self.catalog,
                                    &dep_id,
                                    dep_version.as_deref(),
                                )
                                .await;
                                let fetched = match fetched {
                                    Ok(v) => v,
                                    Err(e)
                                        if dep_type == DependencyType::Optional
                                            && e.kind() == ErrorKind::NotFound =>
                                    {
                                        info!(
                                            "Optional dependency {} of {} skipped: {}",
                                            dep_id, key, e
                                        );
                                        continue;
                                    }
                                    Err(e) => return Err(e),
                                };
                                fetched.validate(&dep_id)?;
                                self.resolved.insert(dep_id.clone(), fetched.clone());
                                fetched
                            }
                        };

                        // Satisfied by an embedding parent: nothing to traverse.
                        if target.mod_id != dep_id {
                            continue;
                        }
                        self.visit(target).await?;
                    }
                }
            }

            self.in_progress.remove(&key);
            self.finished.insert(key);
            Ok(())
        })
    }
}

/// Resolve `initial` against `catalog`.
pub async fn resolve(
    initial: &[ModVersion],
    catalog: &dyn CatalogClient,
) -> ManagerResult<Resolution> {
    ModResolver::new(catalog).resolve(initial).await
}
