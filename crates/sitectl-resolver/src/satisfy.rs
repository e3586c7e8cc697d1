use std::collections::BTreeSet;

use sitectl_core::{split_full_name, Catalog, Inventory, Source, Warning, WarningKind};

/// Which dependency declarations to check an addon against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyView {
    /// What the installed code declares: is the site fine as it is?
    Disk,
    /// What the catalog release declares: would installing it work?
    Reference,
}

impl DependencyView {
    pub fn source(self) -> Source {
        match self {
            Self::Disk => Source::Disk,
            Self::Reference => Source::Reference,
        }
    }
}

/// Full names on the current dependency path. Each recursive step gets its own copy.
pub type VisitPath = BTreeSet<String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Satisfaction {
    pub satisfied: bool,
    pub warnings: Vec<Warning>,
}

#[derive(Debug, Clone, Copy)]
pub struct Resolver<'a> {
    installed: &'a Inventory,
    catalog: &'a Catalog,
}

impl<'a> Resolver<'a> {
    pub fn new(installed: &'a Inventory, catalog: &'a Catalog) -> Self {
        Self { installed, catalog }
    }

    /// Dependencies declared for `full_name` in the given view, in name order.
    pub fn dependencies_of(&self, full_name: &str, view: DependencyView) -> Vec<(String, u64)> {
        let descriptor = match view {
            DependencyView::Disk => self.installed.get_full(full_name),
            DependencyView::Reference => self.catalog.get(full_name),
        };
        descriptor
            .map(|descriptor| {
                descriptor
                    .dependencies(view.source())
                    .map(|(name, version)| (name.to_string(), version))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn check(&self, full_name: &str, view: DependencyView) -> Satisfaction {
        let mut warnings = Vec::new();
        let satisfied = self.is_satisfiable(full_name, view, VisitPath::new(), &mut warnings);
        Satisfaction {
            satisfied,
            warnings,
        }
    }

    /// True when every dependency of `full_name` is installed at a sufficient version, or is
    /// absent from disk but obtainable from the catalog with its own dependencies met.
    ///
    /// An edge back onto the current path is reported as a loop and treated as met.
    pub fn is_satisfiable(
        &self,
        full_name: &str,
        view: DependencyView,
        visited: VisitPath,
        warnings: &mut Vec<Warning>,
    ) -> bool {
        for (dependency, min_version) in self.dependencies_of(full_name, view) {
            if visited.contains(&dependency) {
                warnings.push(Warning::new(
                    WarningKind::DependencyLoop,
                    format!("dependency loop detected: {dependency} depends on itself"),
                ));
                continue;
            }
            let mut path = visited.clone();
            path.insert(dependency.clone());

            let Some((dep_type, dep_name)) = split_full_name(&dependency) else {
                warnings.push(Warning::data(format!(
                    "malformed dependency '{dependency}' declared by {full_name}"
                )));
                return false;
            };

            let Some(installed) = self.installed.get(dep_type, dep_name) else {
                tracing::debug!(addon = full_name, dependency = %dependency, "dependency not installed");
                return false;
            };

            let on_disk = installed.version(Source::Disk).unwrap_or(0);
            if on_disk > 0 {
                if on_disk < min_version {
                    tracing::debug!(
                        addon = full_name,
                        dependency = %dependency,
                        on_disk,
                        min_version,
                        "installed dependency too old"
                    );
                    return false;
                }
                continue;
            }

            let listed = self.catalog.get(&dependency).is_some_and(|reference| {
                reference.version(Source::Reference).unwrap_or(0) >= min_version
            });
            if !listed || !self.is_satisfiable(&dependency, view, path, warnings) {
                tracing::debug!(addon = full_name, dependency = %dependency, "dependency not obtainable");
                return false;
            }
        }
        true
    }
}
