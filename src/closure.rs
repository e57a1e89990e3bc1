// Transitive closure over the relationship graph.
//
// Precomputes reachability so impact analysis becomes a single indexed
// lookup instead of a BFS per question. The closure is cleared and rebuilt
// whole: BFS from every node with outgoing edges, recording (from, to,
// distance) up to the depth cap. Distances are BFS-minimal by construction.

use std::collections::{HashMap, HashSet, VecDeque};

use anyhow::Result;
use tracing::{debug, info};

use crate::database::SymbolDatabase;
use crate::extractors::RelationshipKind;

pub const MAX_CLOSURE_DEPTH: u32 = 10;

/// Which edges to follow and how deep.
#[derive(Debug, Clone)]
pub struct ClosureOptions {
    pub kinds: Vec<RelationshipKind>,
    pub max_depth: u32,
}

impl Default for ClosureOptions {
    fn default() -> Self {
        Self {
            kinds: vec![RelationshipKind::Call],
            max_depth: MAX_CLOSURE_DEPTH,
        }
    }
}

/// Rebuild the reachability table. Returns the number of rows written.
pub fn compute_transitive_closure(
    db: &mut SymbolDatabase,
    options: ClosureOptions,
) -> Result<usize> {
    db.clear_reachability()?;

    let edges = db.edges_by_kinds(&options.kinds)?;
    if edges.is_empty() {
        debug!("no edges of the requested kinds; closure is empty");
        return Ok(0);
    }

    let mut downstream: HashMap<&str, Vec<&str>> = HashMap::new();
    for (from, to) in &edges {
        downstream.entry(from.as_str()).or_default().push(to.as_str());
    }

    let mut entries: Vec<(String, String, u32)> = Vec::new();
    for &start in downstream.keys() {
        let mut visited: HashSet<&str> = HashSet::new();
        visited.insert(start);
        let mut queue: VecDeque<(&str, u32)> = VecDeque::new();
        queue.push_back((start, 0));

        while let Some((current, depth)) = queue.pop_front() {
            if depth >= options.max_depth {
                continue;
            }
            let Some(neighbours) = downstream.get(current) else {
                continue;
            };
            for &next in neighbours {
                if visited.insert(next) {
                    let distance = depth + 1;
                    entries.push((start.to_string(), next.to_string(), distance));
                    queue.push_back((next, distance));
                }
            }
        }
    }

    let written = db.add_reachability_batch(&entries)?;
    info!(rows = written, sources = downstream.len(), "reachability closure rebuilt");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::FileRecord;
    use crate::extractors::{
        Relationship, RelationshipColumns, Symbol, SymbolColumns, SymbolKind,
    };

    fn seed_graph(db: &mut SymbolDatabase, edges: &[(&str, &str)]) -> Vec<String> {
        db.add_file(&FileRecord {
            path: "g.py".into(),
            language: "python".into(),
            content_hash: "h".into(),
            size_bytes: 1,
            last_indexed: 1,
        })
        .unwrap();

        let mut names: Vec<&str> = edges.iter().flat_map(|(a, b)| [*a, *b]).collect();
        names.sort_unstable();
        names.dedup();

        let mut columns = SymbolColumns::default();
        let mut ids = Vec::new();
        for (i, name) in names.iter().enumerate() {
            let symbol = Symbol::new(
                name.to_string(),
                SymbolKind::Function,
                "python".into(),
                "g.py".into(),
                1,
                0,
                2,
                0,
                (i * 10) as u32,
                (i * 10 + 5) as u32,
            );
            ids.push((name.to_string(), symbol.id.clone()));
            columns.push(&symbol);
        }
        db.add_symbols_batch(&columns).unwrap();

        let id_of = |name: &str| {
            ids.iter()
                .find(|(n, _)| n == name)
                .map(|(_, id)| id.clone())
                .unwrap()
        };

        let mut rels = RelationshipColumns::default();
        for (from, to) in edges {
            rels.push(&Relationship {
                from_symbol_id: id_of(from),
                to_symbol_id: id_of(to),
                kind: RelationshipKind::Call,
                file_path: "g.py".into(),
                line_number: 1,
                confidence: 1.0,
            });
        }
        db.add_relationships_batch(&rels).unwrap();

        ids.into_iter().map(|(_, id)| id).collect()
    }

    #[test]
    fn distances_are_bfs_minimal() {
        let mut db = SymbolDatabase::in_memory().unwrap();
        // a -> b -> c and a -> c directly; distance a..c must be 1
        let ids = seed_graph(&mut db, &[("a", "b"), ("b", "c"), ("a", "c")]);
        let (a, c) = (&ids[0], &ids[2]);

        compute_transitive_closure(&mut db, ClosureOptions::default()).unwrap();
        assert_eq!(db.reachability_distance(a, c).unwrap(), Some(1));
    }

    #[test]
    fn depth_cap_limits_entries() {
        let mut db = SymbolDatabase::in_memory().unwrap();
        let ids = seed_graph(&mut db, &[("a", "b"), ("b", "c"), ("c", "d")]);
        let (a, d) = (&ids[0], &ids[3]);

        compute_transitive_closure(
            &mut db,
            ClosureOptions {
                kinds: vec![RelationshipKind::Call],
                max_depth: 2,
            },
        )
        .unwrap();
        assert_eq!(db.reachability_distance(a, d).unwrap(), None);
        assert_eq!(db.reachability_distance(a, &ids[2]).unwrap(), Some(2));
    }

    #[test]
    fn cycles_terminate() {
        let mut db = SymbolDatabase::in_memory().unwrap();
        let ids = seed_graph(&mut db, &[("a", "b"), ("b", "a")]);
        let written = compute_transitive_closure(&mut db, ClosureOptions::default()).unwrap();
        // a->b, b->a only; self-distances not recorded
        assert_eq!(written, 2);
        assert_eq!(db.reachability_distance(&ids[0], &ids[1]).unwrap(), Some(1));
    }

    #[test]
    fn rebuild_replaces_previous_closure() {
        let mut db = SymbolDatabase::in_memory().unwrap();
        seed_graph(&mut db, &[("a", "b")]);
        compute_transitive_closure(&mut db, ClosureOptions::default()).unwrap();
        let first = db.reachability_count().unwrap();
        compute_transitive_closure(&mut db, ClosureOptions::default()).unwrap();
        assert_eq!(db.reachability_count().unwrap(), first);
    }
}
