//! Dependency graph over one sheet's cells.
//!
//! Nodes are indexed in declaration order. Edges run from a cell to the
//! cells that read it, so forward reachability from an edited cell is the
//! set of cells that must be recomputed. Only same-sheet references become
//! edges; sheet references and parameters are leaves.
//!
//! Declaration order breaks every tie, so identical inputs always produce the
//! same affected set and evaluation order.

use std::collections::{BTreeSet, HashMap};

use super::cell_key::CellKey;
use super::error::TemplateError;

#[derive(Clone, Debug)]
pub struct DependencyGraph {
    keys: Vec<CellKey>,
    index: HashMap<CellKey, usize>,
    /// cell -> cells it reads
    dependencies: Vec<Vec<usize>>,
    /// cell -> cells that read it (ascending)
    dependents: Vec<Vec<usize>>,
}

/// Cells reachable from an edit, in declaration order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AffectedSet {
    pub(crate) indices: BTreeSet<usize>,
    keys: Vec<CellKey>,
    cyclic: bool,
}

impl AffectedSet {
    pub fn keys(&self) -> &[CellKey] {
        &self.keys
    }

    pub fn contains(&self, key: &CellKey) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// True when the edited cell reaches itself.
    pub fn is_cyclic(&self) -> bool {
        self.cyclic
    }

    pub fn union(mut self, other: AffectedSet, graph: &DependencyGraph) -> AffectedSet {
        self.indices.extend(other.indices);
        self.cyclic |= other.cyclic;
        self.keys = graph.keys_of(&self.indices);
        self
    }
}

impl DependencyGraph {
    /// Build a graph from `(cell, same-sheet dependencies)` pairs in declaration order.
    pub fn build<I>(nodes: I) -> Result<DependencyGraph, TemplateError>
    where
        I: IntoIterator<Item = (CellKey, Vec<CellKey>)>,
    {
        let nodes: Vec<(CellKey, Vec<CellKey>)> = nodes.into_iter().collect();
        let mut keys = Vec::with_capacity(nodes.len());
        let mut index = HashMap::with_capacity(nodes.len());
        for (key, _) in &nodes {
            if index.insert(key.clone(), keys.len()).is_some() {
                return Err(TemplateError::DuplicateCell(key.clone()));
            }
            keys.push(key.clone());
        }

        let mut dependencies = vec![Vec::new(); keys.len()];
        let mut dependents = vec![Vec::new(); keys.len()];
        for (cell_idx, (key, deps)) in nodes.iter().enumerate() {
            for dep in deps {
                let Some(&dep_idx) = index.get(dep) else {
                    return Err(TemplateError::UnknownDependency {
                        cell: key.clone(),
                        dependency: dep.clone().into(),
                    });
                };
                if !dependencies[cell_idx].contains(&dep_idx) {
                    dependencies[cell_idx].push(dep_idx);
                    dependents[dep_idx].push(cell_idx);
                }
            }
        }
        for list in &mut dependents {
            list.sort_unstable();
        }

        Ok(DependencyGraph {
            keys,
            index,
            dependencies,
            dependents,
        })
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &[CellKey] {
        &self.keys
    }

    pub fn index_of(&self, key: &CellKey) -> Option<usize> {
        self.index.get(key).copied()
    }

    /// Cells `key` reads, in declaration order of its dependency list.
    pub fn dependencies(&self, key: &CellKey) -> Vec<&CellKey> {
        self.index_of(key)
            .map(|i| self.dependencies[i].iter().map(|&d| &self.keys[d]).collect())
            .unwrap_or_default()
    }

    /// Cells that read `key` directly.
    pub fn dependents(&self, key: &CellKey) -> Vec<&CellKey> {
        self.index_of(key)
            .map(|i| self.dependents[i].iter().map(|&d| &self.keys[d]).collect())
            .unwrap_or_default()
    }

    pub(crate) fn dependency_indices(&self, idx: usize) -> &[usize] {
        &self.dependencies[idx]
    }

    /// All cells transitively reading `key`. The cell itself is only
    /// included (and the set flagged) when it reaches itself.
    pub fn affected_set(&self, key: &CellKey) -> AffectedSet {
        let Some(start) = self.index_of(key) else {
            return AffectedSet::default();
        };
        let indices = self.reach(&[start]);
        let cyclic = indices.contains(&start);
        AffectedSet {
            keys: self.keys_of(&indices),
            indices,
            cyclic,
        }
    }

    /// `keys` themselves plus everything reading them. Used when the inputs of
    /// `keys` changed outside the sheet.
    pub fn refresh_set(&self, keys: &[CellKey]) -> AffectedSet {
        let starts: Vec<usize> = keys.iter().filter_map(|k| self.index_of(k)).collect();
        let reached = self.reach(&starts);
        let cyclic = starts.iter().any(|s| reached.contains(s));
        let mut indices = reached;
        indices.extend(starts);
        AffectedSet {
            keys: self.keys_of(&indices),
            indices,
            cyclic,
        }
    }

    /// Kahn's algorithm over the affected subgraph; ready cells are released
    /// in declaration order. Returns the stuck cells if the subgraph is cyclic.
    pub fn topological_order(&self, affected: &AffectedSet) -> Result<Vec<CellKey>, Vec<CellKey>> {
        self.kahn(&affected.indices)
    }

    /// Evaluation order for every cell in the sheet.
    pub fn full_order(&self) -> Result<Vec<CellKey>, Vec<CellKey>> {
        let all: BTreeSet<usize> = (0..self.keys.len()).collect();
        self.kahn(&all)
    }

    fn kahn(&self, subset: &BTreeSet<usize>) -> Result<Vec<CellKey>, Vec<CellKey>> {
        let mut in_degree: HashMap<usize, usize> = subset
            .iter()
            .map(|&i| {
                let degree = self.dependencies[i]
                    .iter()
                    .filter(|d| subset.contains(d))
                    .count();
                (i, degree)
            })
            .collect();

        let mut ready: BTreeSet<usize> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(&i, _)| i)
            .collect();
        let mut order = Vec::with_capacity(subset.len());

        while let Some(next) = ready.pop_first() {
            order.push(self.keys[next].clone());
            for dependent in &self.dependents[next] {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(*dependent);
                    }
                }
            }
        }

        if order.len() == subset.len() {
            Ok(order)
        } else {
            let stuck: BTreeSet<usize> = in_degree
                .into_iter()
                .filter(|(_, degree)| *degree > 0)
                .map(|(i, _)| i)
                .collect();
            Err(self.keys_of(&stuck))
        }
    }

    fn reach(&self, starts: &[usize]) -> BTreeSet<usize> {
        let mut visited = BTreeSet::new();
        let mut to_process: Vec<usize> = starts
            .iter()
            .flat_map(|&s| self.dependents[s].iter().copied())
            .collect();
        while let Some(idx) = to_process.pop() {
            if !visited.insert(idx) {
                continue;
            }
            to_process.extend(self.dependents[idx].iter().copied());
        }
        visited
    }

    fn keys_of(&self, indices: &BTreeSet<usize>) -> Vec<CellKey> {
        indices.iter().map(|&i| self.keys[i].clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> CellKey {
        CellKey::parse(name).unwrap()
    }

    fn graph(spec: &[(&str, &[&str])]) -> DependencyGraph {
        DependencyGraph::build(
            spec.iter()
                .map(|(k, deps)| (key(k), deps.iter().map(|d| key(d)).collect())),
        )
        .unwrap()
    }

    fn names(keys: &[CellKey]) -> Vec<&str> {
        keys.iter().map(CellKey::as_str).collect()
    }

    #[test]
    fn test_affected_set_is_transitive_and_excludes_start() {
        let g = graph(&[
            ("a", &[]),
            ("b", &["a"]),
            ("c", &["b"]),
            ("d", &[]),
            ("e", &["d"]),
        ]);
        let affected = g.affected_set(&key("a"));
        assert_eq!(names(affected.keys()), vec!["b", "c"]);
        assert!(!affected.is_cyclic());
        assert!(!affected.contains(&key("e")));
    }

    #[test]
    fn test_topological_order_breaks_ties_by_declaration() {
        // total declared before its inputs to make sure order is not just declaration order.
        let g = graph(&[
            ("total", &["left", "right"]),
            ("input", &[]),
            ("right", &["input"]),
            ("left", &["input"]),
        ]);
        let affected = g.affected_set(&key("input"));
        let order = g.topological_order(&affected).unwrap();
        assert_eq!(names(&order), vec!["right", "left", "total"]);
    }

    #[test]
    fn test_cycle_flags_and_fails_ordering() {
        let g = graph(&[("x", &["y"]), ("y", &["x"])]);
        let affected = g.affected_set(&key("x"));
        assert!(affected.is_cyclic());
        assert!(affected.contains(&key("x")));
        let stuck = g.topological_order(&affected).unwrap_err();
        assert_eq!(names(&stuck), vec!["x", "y"]);
    }

    #[test]
    fn test_refresh_set_includes_starts() {
        let g = graph(&[("a", &[]), ("b", &[]), ("c", &["b"])]);
        let refresh = g.refresh_set(&[key("b")]);
        assert_eq!(names(refresh.keys()), vec!["b", "c"]);
        let merged = g.affected_set(&key("a")).union(refresh, &g);
        assert_eq!(names(merged.keys()), vec!["b", "c"]);
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let err = DependencyGraph::build(vec![(key("a"), vec![key("ghost")])]).unwrap_err();
        assert!(matches!(err, TemplateError::UnknownDependency { .. }));
    }

    #[test]
    fn test_unknown_key_has_empty_affected_set() {
        let g = graph(&[("a", &[])]);
        assert!(g.affected_set(&key("zzz")).is_empty());
    }
}
