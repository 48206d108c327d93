//! Serial linearization and the serial build runner.

use std::collections::HashMap;

use tracing::{debug, error, info};

use crate::graph;
use crate::target::{Key, Target};

/// Post-order DFS recording the first visit index of each `out_of_date`
/// target, skipping up-to-date ones. Sorting by index ascending yields a
/// topological order: every dependency precedes its dependents.
///
/// The counting scheme mirrors the original implementation exactly
/// (`count` is threaded through recursive calls and re-added at each
/// return), which produces non-contiguous but strictly order-preserving
/// indices — only the relative order is ever used.
pub fn linearize(root: &Target) -> Vec<Target> {
    let mut records: HashMap<Key, (usize, Target)> = HashMap::new();
    linearize_recurse(root, &mut records, 0);

    let mut items: Vec<(usize, Target)> = records.into_values().collect();
    items.sort_by_key(|(index, _)| *index);
    items.into_iter().map(|(_, t)| t).collect()
}

fn linearize_recurse(targ: &Target, records: &mut HashMap<Key, (usize, Target)>, mut count: usize) -> usize {
    for dep in targ.dependencies() {
        count += linearize_recurse(dep, records, count);
    }

    if !records.contains_key(&targ.key()) && targ.out_of_date() {
        records.insert(targ.key(), (count, targ.clone()));
        count += 1;
    }

    count
}

/// Walks `sequence`, building each not-yet-built target in order. Returns
/// false immediately on the first failure, leaving dependents unbuilt.
pub fn run_sequence(sequence: &[Target]) -> bool {
    for targ in sequence {
        if targ.built() {
            continue;
        }

        debug!("Building {}: {}", targ.kind().name(), targ.fullname());
        if !targ.build() {
            error!("Build failed for {}: {}", targ.kind().name(), targ.fullname());
            return false;
        }
    }
    true
}

/// Detects a cycle, then serially linearizes and builds `root`.
pub fn root_build(root: &Target) -> bool {
    if let Some(cycle) = graph::detect_cycle(root) {
        display_cycle(&cycle);
        return false;
    }

    let ok = run_sequence(&linearize(root));
    if ok {
        info!("Build successful");
    }
    ok
}

/// Prints a cycle witness the way spec section 7 requires: each node with
/// its origin path relative to the root's basedir, looping back to the
/// first node.
pub fn display_cycle(cycle: &[Target]) {
    error!("Dependency cycle detected:");
    let base = cycle[0].env().basedir().to_path_buf();
    for t in cycle {
        let origin = t.env().basedir();
        let rel = origin.strip_prefix(&base).unwrap_or(origin);
        error!("\t{} from {}", t.fullname(), rel.display());
    }
    error!("\t{} from .", cycle[0].fullname());
}
