//! Dependency resolution: orders a phase's sources into execution waves.
//!
//! A source depends on every source of the same phase it references. The
//! plan is the layered topological order of that graph: wave 0 holds the
//! sources with no local dependency, wave `k` the sources whose
//! dependencies all sit in waves below `k`. Within a wave, sources keep
//! their declaration order. References to sources outside the phase are
//! not edges; those tables come from the pre phase or earlier runs.

use std::collections::{BTreeSet, HashMap};

use crate::error::{EngineError, Result};
use crate::model::Source;

/// Ordered waves of source keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionPlan {
    waves: Vec<Vec<String>>,
}

impl ExecutionPlan {
    pub fn waves(&self) -> &[Vec<String>] {
        &self.waves
    }

    pub fn len(&self) -> usize {
        self.waves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waves.is_empty()
    }

    /// Index of the wave holding `key`.
    pub fn wave_of(&self, key: &str) -> Option<usize> {
        self.waves
            .iter()
            .position(|wave| wave.iter().any(|k| k == key))
    }

    /// Number of sources across all waves.
    pub fn source_count(&self) -> usize {
        self.waves.iter().map(Vec::len).sum()
    }

    /// This plan's waves followed by `other`'s.
    pub fn chain(&self, other: &ExecutionPlan) -> ExecutionPlan {
        ExecutionPlan {
            waves: self
                .waves
                .iter()
                .chain(other.waves.iter())
                .cloned()
                .collect(),
        }
    }
}

/// Build the execution plan for one phase.
///
/// Fails with [`EngineError::DependencyCycle`] naming the keys of one
/// offending cycle.
pub fn plan(sources: &[Source]) -> Result<ExecutionPlan> {
    let index: HashMap<&str, usize> = sources
        .iter()
        .enumerate()
        .map(|(i, source)| (source.key(), i))
        .collect();

    let deps: Vec<BTreeSet<usize>> = sources
        .iter()
        .map(|source| {
            source
                .references()
                .iter()
                .filter_map(|reference| index.get(reference.as_str()).copied())
                .collect()
        })
        .collect();

    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); sources.len()];
    for (i, source_deps) in deps.iter().enumerate() {
        for &dep in source_deps {
            dependents[dep].push(i);
        }
    }

    let mut in_degree: Vec<usize> = deps.iter().map(BTreeSet::len).collect();
    let mut scheduled = vec![false; sources.len()];
    let mut waves = Vec::new();
    let mut processed = 0;

    loop {
        let ready: Vec<usize> = (0..sources.len())
            .filter(|&i| !scheduled[i] && in_degree[i] == 0)
            .collect();
        if ready.is_empty() {
            break;
        }

        for &i in &ready {
            scheduled[i] = true;
            for &dependent in &dependents[i] {
                in_degree[dependent] -= 1;
            }
        }
        processed += ready.len();
        waves.push(ready.iter().map(|&i| sources[i].key().to_string()).collect());
    }

    if processed != sources.len() {
        let cycle = find_cycle(&deps, &scheduled);
        return Err(EngineError::DependencyCycle {
            keys: cycle.iter().map(|&i| sources[i].key().to_string()).collect(),
        });
    }

    Ok(ExecutionPlan { waves })
}

/// Walk unscheduled dependencies until a node repeats.
///
/// Every unscheduled node has at least one unscheduled dependency, so the
/// walk always closes a loop.
fn find_cycle(deps: &[BTreeSet<usize>], scheduled: &[bool]) -> Vec<usize> {
    let Some(start) = scheduled.iter().position(|done| !done) else {
        return Vec::new();
    };

    let mut path = vec![start];
    let mut current = start;
    loop {
        let Some(&next) = deps[current].iter().find(|&&dep| !scheduled[dep]) else {
            return path;
        };
        if let Some(pos) = path.iter().position(|&node| node == next) {
            return path.split_off(pos);
        }
        path.push(next);
        current = next;
    }
}
