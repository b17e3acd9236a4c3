//! Module dependency graph for incremental recompilation
//!
//! Edges are added whenever one module loads, includes or defines another.
//! When a module changes, every transitive dependent must be rebuilt.

use crate::types::Path;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

/// Why a dependency edge exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependencyReason {
    /// A macro module was loaded to resolve a macro call
    MacroLoad,
    /// A macro defined a new module
    MacroDefine,
    /// A macro forced a module into the compilation
    MacroInclude,
    /// Ordinary import/typing dependency
    Typing,
}

impl fmt::Display for DependencyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DependencyReason::MacroLoad => "macro-load",
            DependencyReason::MacroDefine => "macro-define",
            DependencyReason::MacroInclude => "macro-include",
            DependencyReason::Typing => "typing",
        };
        write!(f, "{}", s)
    }
}

/// Something that accepts module dependency edges.
pub trait DependencySink {
    fn add_dependency(&mut self, from: &Path, to: &Path, reason: DependencyReason);
}

/// Dependency graph over modules
#[derive(Debug, Default)]
pub struct ModuleDependencyGraph {
    /// Edges in the graph (from -> [to]); `from` depends on `to`
    edges: HashMap<Path, HashSet<Path>>,

    /// Reverse edges (to -> [from])
    reverse_edges: HashMap<Path, HashSet<Path>>,

    reasons: HashMap<(Path, Path), DependencyReason>,
}

impl ModuleDependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of edges in the graph
    pub fn edge_count(&self) -> usize {
        self.edges.values().map(|s| s.len()).sum()
    }

    pub fn reason(&self, from: &Path, to: &Path) -> Option<DependencyReason> {
        self.reasons.get(&(from.clone(), to.clone())).copied()
    }

    /// Get direct dependencies of a module
    pub fn direct_dependencies(&self, module: &Path) -> Vec<Path> {
        let mut deps: Vec<Path> = self
            .edges
            .get(module)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        deps.sort();
        deps
    }

    /// Get all dependents of a module (transitive)
    pub fn dependents_of(&self, module: &Path) -> HashSet<Path> {
        let mut dependents = HashSet::new();
        let mut to_visit = VecDeque::new();
        to_visit.push_back(module.clone());

        while let Some(current) = to_visit.pop_front() {
            if let Some(neighbors) = self.reverse_edges.get(&current) {
                for neighbor in neighbors {
                    if dependents.insert(neighbor.clone()) {
                        to_visit.push_back(neighbor.clone());
                    }
                }
            }
        }

        dependents
    }

    /// Drop every edge leaving `module` and return the modules that must be
    /// rebuilt because they depend on it.
    pub fn invalidate_module(&mut self, module: &Path) -> HashSet<Path> {
        let dependents = self.dependents_of(module);
        if let Some(targets) = self.edges.remove(module) {
            for target in targets {
                if let Some(back) = self.reverse_edges.get_mut(&target) {
                    back.remove(module);
                }
                self.reasons.remove(&(module.clone(), target));
            }
        }
        dependents
    }
}

impl DependencySink for ModuleDependencyGraph {
    fn add_dependency(&mut self, from: &Path, to: &Path, reason: DependencyReason) {
        if from == to {
            return;
        }
        self.edges
            .entry(from.clone())
            .or_insert_with(HashSet::new)
            .insert(to.clone());
        self.reverse_edges
            .entry(to.clone())
            .or_insert_with(HashSet::new)
            .insert(from.clone());
        self.reasons.insert((from.clone(), to.clone()), reason);
    }
}
