//! Linearization of parent-linked message trees.
//!
//! Hosted chat exports store every edit and regeneration as a branch. Only
//! one path is kept: the leaf with the latest timestamp wins, ties go to the
//! branch whose newest earlier message is latest, then to the later input
//! position.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct Node<'a> {
    pub id: &'a str,
    pub parent: Option<&'a str>,
    pub ts: Option<DateTime<Utc>>,
}

/// Indices into `nodes`, root first, along the winning branch.
///
/// When no node links to another node in the set the input is treated as a
/// flat list and ordered by timestamp (stable, so untimed input keeps its
/// order). A parent cycle is an error.
pub fn linearize(nodes: &[Node<'_>]) -> Result<Vec<usize>, String> {
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(nodes.len());
    for (i, node) in nodes.iter().enumerate() {
        if index.insert(node.id, i).is_some() {
            return Err(format!("duplicate node id '{}'", node.id));
        }
    }

    let parent: Vec<Option<usize>> = nodes
        .iter()
        .map(|n| n.parent.and_then(|p| index.get(p).copied()))
        .collect();

    if parent.iter().all(Option::is_none) {
        let mut order: Vec<usize> = (0..nodes.len()).collect();
        if nodes.iter().all(|n| n.ts.is_some()) {
            order.sort_by_key(|&i| nodes[i].ts);
        }
        return Ok(order);
    }

    check_acyclic(nodes, &parent)?;

    let mut has_child = vec![false; nodes.len()];
    for p in parent.iter().flatten() {
        has_child[*p] = true;
    }

    let mut best: Option<(Option<DateTime<Utc>>, Option<DateTime<Utc>>, usize)> = None;
    let mut best_path = Vec::new();
    for leaf in (0..nodes.len()).filter(|&i| !has_child[i]) {
        let path = path_to_root(leaf, &parent);
        let branch_max = path.iter().skip(1).filter_map(|&i| nodes[i].ts).max();
        let key = (nodes[leaf].ts, branch_max, leaf);
        if best.map_or(true, |b| key > b) {
            best = Some(key);
            best_path = path;
        }
    }

    best_path.reverse();
    Ok(best_path)
}

fn path_to_root(leaf: usize, parent: &[Option<usize>]) -> Vec<usize> {
    let mut path = vec![leaf];
    let mut cur = parent[leaf];
    while let Some(i) = cur {
        path.push(i);
        cur = parent[i];
    }
    path
}

fn check_acyclic(nodes: &[Node<'_>], parent: &[Option<usize>]) -> Result<(), String> {
    let mut settled = vec![false; nodes.len()];
    let mut stamp = vec![usize::MAX; nodes.len()];
    for start in 0..nodes.len() {
        let mut trail = Vec::new();
        let mut cur = Some(start);
        while let Some(i) = cur {
            if settled[i] {
                break;
            }
            if stamp[i] == start {
                return Err(format!("parent cycle through node '{}'", nodes[i].id));
            }
            stamp[i] = start;
            trail.push(i);
            cur = parent[i];
        }
        for i in trail {
            settled[i] = true;
        }
    }
    Ok(())
}
