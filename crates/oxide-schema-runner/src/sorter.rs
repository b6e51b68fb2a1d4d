//! Dependency ordering of changes.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::change::ChangeRecord;
use crate::error::{Result, RunnerError};

/// Returns whether `stored` names the same change as `wanted`.
///
/// Names match exactly, or when one is a `::`-qualified form of the other
/// (`app::changes::Mig00` matches `Mig00`).
#[must_use]
pub fn names_match(stored: &str, wanted: &str) -> bool {
    stored == wanted || is_qualified_suffix(stored, wanted) || is_qualified_suffix(wanted, stored)
}

fn is_qualified_suffix(long: &str, short: &str) -> bool {
    long.len() > short.len() + 2
        && long.ends_with(short)
        && long[..long.len() - short.len()].ends_with("::")
}

/// Resolves `wanted` against `candidates`: exact match first, then suffix match.
pub fn resolve_name<'a, I>(candidates: I, wanted: &str) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str> + Clone,
{
    candidates
        .clone()
        .into_iter()
        .find(|name| *name == wanted)
        .or_else(|| candidates.into_iter().find(|name| names_match(name, wanted)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

/// Orders changes so that every change comes after its dependencies.
///
/// Depth-first, post-order. Dependencies that name no known change are
/// treated as satisfied.
#[derive(Debug, Default)]
pub struct DependencyGraphSorter;

impl DependencyGraphSorter {
    /// Creates a new sorter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Sorts `changes`, failing with [`RunnerError::CircularDependency`] on a cycle.
    ///
    /// Names are unique in the result; later duplicates are dropped.
    pub fn sort(&self, changes: Vec<ChangeRecord>) -> Result<Vec<ChangeRecord>> {
        let mut seen = HashSet::new();
        let changes: Vec<ChangeRecord> = changes
            .into_iter()
            .filter(|change| {
                let first = seen.insert(change.name().to_string());
                if !first {
                    debug!(change = %change.name(), "Duplicate change, dropping");
                }
                first
            })
            .collect();

        let names: Vec<&str> = changes.iter().map(ChangeRecord::name).collect();
        let index: HashMap<&str, usize> = names.iter().enumerate().map(|(i, n)| (*n, i)).collect();

        // Resolve edges once so the walk only deals with indices.
        let edges: Vec<Vec<usize>> = changes
            .iter()
            .map(|change| {
                change
                    .dependencies()
                    .iter()
                    .filter_map(|dep| {
                        let resolved = resolve_name(names.iter().copied(), dep);
                        if resolved.is_none() {
                            debug!(
                                change = %change.name(),
                                dependency = %dep,
                                "Dependency not among discovered changes, treating as satisfied"
                            );
                        }
                        resolved.and_then(|name| index.get(name).copied())
                    })
                    .collect()
            })
            .collect();

        let mut marks: Vec<Option<Mark>> = vec![None; changes.len()];
        let mut path = Vec::new();
        let mut order = Vec::with_capacity(changes.len());

        for start in 0..changes.len() {
            if marks[start].is_none() {
                visit(start, &edges, &mut marks, &mut path, &mut order)
                    .map_err(|cycle| RunnerError::CircularDependency {
                        cycle: cycle.into_iter().map(|i| names[i].to_string()).collect(),
                    })?;
            }
        }

        let mut slots: Vec<Option<ChangeRecord>> = changes.into_iter().map(Some).collect();
        Ok(order.into_iter().filter_map(|i| slots[i].take()).collect())
    }
}

/// Visits `node`, returning the cycle as indices if one is found.
fn visit(
    node: usize,
    edges: &[Vec<usize>],
    marks: &mut [Option<Mark>],
    path: &mut Vec<usize>,
    order: &mut Vec<usize>,
) -> std::result::Result<(), Vec<usize>> {
    match marks[node] {
        Some(Mark::Done) => return Ok(()),
        Some(Mark::InProgress) => {
            let start = path.iter().position(|&n| n == node).unwrap_or(0);
            let mut cycle = path[start..].to_vec();
            cycle.push(node);
            return Err(cycle);
        }
        None => {}
    }

    marks[node] = Some(Mark::InProgress);
    path.push(node);
    for &dep in &edges[node] {
        visit(dep, edges, marks, path, order)?;
    }
    path.pop();
    marks[node] = Some(Mark::Done);
    order.push(node);
    Ok(())
}
