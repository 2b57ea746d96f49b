//! Circular dependency detection for sheet templates.
//!
//! Formulas are fixed per template, so a cycle is a template bug. It is
//! looked for once, when the template is built, and a template that has one
//! is never served.

use std::collections::HashSet;

use super::cell_key::CellKey;
use super::deps::DependencyGraph;

/// Detect a circular dependency anywhere in the graph.
/// Returns the cells on the first cycle found (in dependency order), or None.
pub fn detect_cycle(graph: &DependencyGraph) -> Option<Vec<CellKey>> {
    let mut done = HashSet::new();
    let mut visiting = HashSet::new();
    let mut path = Vec::new();

    for start in 0..graph.len() {
        if detect_cycle_dfs(start, graph, &mut visiting, &mut done, &mut path) {
            let repeated = path.pop()?;
            let from = path.iter().position(|&i| i == repeated)?;
            return Some(path[from..].iter().map(|&i| graph.keys()[i].clone()).collect());
        }
    }
    None
}

fn detect_cycle_dfs(
    current: usize,
    graph: &DependencyGraph,
    visiting: &mut HashSet<usize>,
    done: &mut HashSet<usize>,
    path: &mut Vec<usize>,
) -> bool {
    if visiting.contains(&current) {
        path.push(current);
        return true;
    }
    if done.contains(&current) {
        return false;
    }

    visiting.insert(current);
    path.push(current);

    for &dep in graph.dependency_indices(current) {
        if detect_cycle_dfs(dep, graph, visiting, done, path) {
            return true;
        }
    }

    path.pop();
    visiting.remove(&current);
    done.insert(current);
    false
}
