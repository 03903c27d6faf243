use crate::error::{OrchestratorError, Result};
use crate::module::AnalysisModule;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use synpipe_storage::validate_table_name;

/// Which modules a run should process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleSelection {
    /// Every registered module
    All,
    /// Named modules (order and duplicates are irrelevant)
    Named(Vec<String>),
}

impl ModuleSelection {
    /// Interpret command-line module names; `all` anywhere selects everything
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        if names.iter().any(|n| n.as_ref() == "all") {
            ModuleSelection::All
        } else {
            ModuleSelection::Named(names.iter().map(|n| n.as_ref().to_string()).collect())
        }
    }
}

/// Module registry with a deterministic topological order
///
/// Built once at startup. Construction fails on duplicate names, names that
/// cannot be used as result tables, dependencies on unregistered modules and
/// dependency cycles, so a `ModuleGraph` that exists is always a valid DAG.
pub struct ModuleGraph {
    /// Registration order
    modules: Vec<Arc<dyn AnalysisModule>>,
    index: HashMap<String, usize>,
    /// Topological levels; modules within a level are independent
    levels: Vec<Vec<usize>>,
    /// Flattened levels
    order: Vec<usize>,
}

impl ModuleGraph {
    pub fn new(modules: Vec<Arc<dyn AnalysisModule>>) -> Result<Self> {
        let mut index = HashMap::new();
        for (i, module) in modules.iter().enumerate() {
            let name = module.name().to_string();
            validate_table_name(&name)?;
            if index.insert(name.clone(), i).is_some() {
                return Err(OrchestratorError::DuplicateModule(name));
            }
        }

        // Validate dependencies exist
        let mut deps: Vec<BTreeSet<usize>> = Vec::with_capacity(modules.len());
        for module in &modules {
            let mut resolved = BTreeSet::new();
            for dep in module.dependencies() {
                let dep_idx =
                    index
                        .get(&dep)
                        .copied()
                        .ok_or_else(|| OrchestratorError::MissingDependency {
                            module: module.name().to_string(),
                            dependency: dep.clone(),
                        })?;
                resolved.insert(dep_idx);
            }
            deps.push(resolved);
        }

        let levels = Self::topological_levels(&modules, &deps)?;
        let order = levels.iter().flatten().copied().collect();

        Ok(Self {
            modules,
            index,
            levels,
            order,
        })
    }

    /// Kahn's algorithm, one level per round; ties broken by registration order
    fn topological_levels(
        modules: &[Arc<dyn AnalysisModule>],
        deps: &[BTreeSet<usize>],
    ) -> Result<Vec<Vec<usize>>> {
        let mut in_degree: Vec<usize> = deps.iter().map(BTreeSet::len).collect();
        let mut processed = vec![false; modules.len()];
        let mut remaining = modules.len();
        let mut levels = Vec::new();

        while remaining > 0 {
            let ready: Vec<usize> = (0..modules.len())
                .filter(|&i| !processed[i] && in_degree[i] == 0)
                .collect();

            if ready.is_empty() {
                let modules = (0..modules.len())
                    .filter(|&i| !processed[i])
                    .map(|i| modules[i].name().to_string())
                    .collect();
                return Err(OrchestratorError::DependencyCycle { modules });
            }

            for &i in &ready {
                processed[i] = true;
                remaining -= 1;
            }

            // Decrement dependents
            for (dependent, dep_set) in deps.iter().enumerate() {
                if processed[dependent] {
                    continue;
                }
                in_degree[dependent] -= ready.iter().filter(|r| dep_set.contains(r)).count();
            }

            levels.push(ready);
        }

        Ok(levels)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Module names in registration order
    pub fn names(&self) -> Vec<String> {
        self.modules.iter().map(|m| m.name().to_string()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn AnalysisModule>> {
        self.index.get(name).map(|&i| &self.modules[i])
    }

    /// Full topological order of every registered module
    pub fn topological_order(&self) -> Vec<&str> {
        self.order.iter().map(|&i| self.modules[i].name()).collect()
    }

    /// Resolve a selection into a dependency-respecting order
    ///
    /// The requested modules are filtered out of the full-graph order, so a
    /// subset always appears in the same relative order as in a full run.
    pub fn resolve(&self, selection: &ModuleSelection) -> Result<Vec<Arc<dyn AnalysisModule>>> {
        let wanted: Vec<bool> = match selection {
            ModuleSelection::All => vec![true; self.modules.len()],
            ModuleSelection::Named(names) => {
                let mut wanted = vec![false; self.modules.len()];
                for name in names {
                    let idx = self.index.get(name.as_str()).copied().ok_or_else(|| {
                        OrchestratorError::UnknownModule {
                            name: name.clone(),
                            valid: self.names(),
                        }
                    })?;
                    wanted[idx] = true;
                }
                wanted
            }
        };

        Ok(self
            .order
            .iter()
            .filter(|&&i| wanted[i])
            .map(|&i| self.modules[i].clone())
            .collect())
    }

    /// Execution plan as string (for logging)
    pub fn execution_plan(&self, selection: &ModuleSelection) -> Result<String> {
        let selected: BTreeSet<String> = self
            .resolve(selection)?
            .iter()
            .map(|m| m.name().to_string())
            .collect();

        Ok(self
            .levels
            .iter()
            .map(|level| {
                level
                    .iter()
                    .map(|&i| self.modules[i].name())
                    .filter(|name| selected.contains(*name))
                    .collect::<Vec<_>>()
            })
            .filter(|names| !names.is_empty())
            .enumerate()
            .map(|(i, names)| {
                if names.len() > 1 {
                    format!("Phase {}: {} (independent)", i + 1, names.join(" ∥ "))
                } else {
                    format!("Phase {}: {}", i + 1, names[0])
                }
            })
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

impl std::fmt::Debug for ModuleGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleGraph")
            .field("order", &self.topological_order())
            .finish()
    }
}
