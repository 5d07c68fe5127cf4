//! Dependency ordering over module configs.
//!
//! Edge A -> B when B's configuration references A's id: either through the
//! explicit `depends_on` list or through any string value inside `params`
//! equal to a configured module id (a storage binding, a parent-hub
//! reference, ...). Ordering is Kahn's algorithm with an input-order
//! tie-break: among modules with no remaining unmet dependencies, the one
//! that appeared first in the repository's iteration order loads first.

use std::collections::{HashMap, HashSet};

use crate::repository::ConfigRecord;

/// Result of planning a batch: indices into the input slice in load order,
/// plus the ids that cannot be ordered because they sit on (or behind) a
/// dependency cycle.
#[derive(Debug, Default)]
pub(crate) struct DependencyPlan {
    pub order: Vec<usize>,
    pub cyclic: Vec<String>,
}

/// Ids referenced by `record` that name other configured modules.
pub(crate) fn references_of(record: &ConfigRecord, known: &HashSet<&str>) -> Vec<String> {
    let mut refs: Vec<String> = Vec::new();
    for dep in &record.config.depends_on {
        if known.contains(dep.as_str()) && dep != record.id() && !refs.contains(dep) {
            refs.push(dep.clone());
        }
    }
    collect_param_refs(&record.config.params, record.id(), known, &mut refs);
    refs
}

fn collect_param_refs(
    value: &serde_json::Value,
    self_id: &str,
    known: &HashSet<&str>,
    out: &mut Vec<String>,
) {
    match value {
        serde_json::Value::String(s) => {
            if known.contains(s.as_str()) && s != self_id && !out.contains(s) {
                out.push(s.clone());
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                collect_param_refs(item, self_id, known, out);
            }
        }
        serde_json::Value::Object(map) => {
            for item in map.values() {
                collect_param_refs(item, self_id, known, out);
            }
        }
        _ => {}
    }
}

/// Plan a load order for `records`.
///
/// Modules left with unmet dependencies after the sort (cycle members and
/// anything downstream of them) land in `cyclic` and are excluded from
/// `order`; unrelated modules are unaffected.
pub(crate) fn dependency_order(records: &[ConfigRecord]) -> DependencyPlan {
    let known: HashSet<&str> = records.iter().map(ConfigRecord::id).collect();
    let index_of: HashMap<&str, usize> = records
        .iter()
        .enumerate()
        .map(|(i, r)| (r.id(), i))
        .collect();

    // deps[i] = indices i waits on.
    let deps: Vec<Vec<usize>> = records
        .iter()
        .map(|r| {
            references_of(r, &known)
                .iter()
                .filter_map(|id| index_of.get(id.as_str()).copied())
                .collect()
        })
        .collect();

    let mut emitted = vec![false; records.len()];
    let mut order = Vec::with_capacity(records.len());

    // Input-order scan: each pass emits the first record whose dependencies
    // are all emitted. Quadratic, but batches are small and the tie-break
    // (repository iteration order) falls out for free.
    loop {
        let next = records.iter().enumerate().position(|(i, _)| {
            !emitted[i] && deps[i].iter().all(|&d| emitted[d])
        });
        match next {
            Some(i) => {
                emitted[i] = true;
                order.push(i);
            }
            None => break,
        }
    }

    let cyclic: Vec<String> = records
        .iter()
        .enumerate()
        .filter(|(i, _)| !emitted[*i])
        .map(|(_, r)| r.id().to_owned())
        .collect();

    DependencyPlan { order, cyclic }
}
