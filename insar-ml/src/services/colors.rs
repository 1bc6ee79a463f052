//! Building color assignment
//!
//! Buildings referenced by a run's results get a palette index such that
//! buildings within [`NEIGHBOR_DISTANCE_M`] of each other differ whenever the
//! palette allows. Coloring is greedy in a fixed order and every building
//! starts its palette scan at a digest-derived index, so recomputation always
//! yields the same colors.

use insar_common::geo::{envelope_tree, footprint_distance_m, Footprint};
use insar_common::{BuildingKey, BuildingSource, Result};
use sha1::{Digest, Sha1};
use sqlx::SqlitePool;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db;
use crate::stores::BuildingStore;

/// Number of distinguishable colors
pub const PALETTE_SIZE: u32 = 60;

/// Footprints closer than this are neighbors (metres)
pub const NEIGHBOR_DISTANCE_M: f64 = 5.0;

/// Digest-derived start index: first four bytes of SHA-1 over `"<source>:<id>"`
pub fn palette_start(key: &BuildingKey) -> u32 {
    let digest = Sha1::digest(key.to_string().as_bytes());
    let head = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    head % PALETTE_SIZE
}

/// Color for a building that has no stored entry
pub fn fallback_color_index(source: BuildingSource, building_id: &str) -> u32 {
    palette_start(&BuildingKey::new(source, building_id))
}

/// Neighbor sets over `footprints`; entries without a footprint stay isolated
pub fn build_adjacency(footprints: &[Option<&Footprint>]) -> Vec<BTreeSet<usize>> {
    let mut adjacency = vec![BTreeSet::new(); footprints.len()];

    let present: Vec<(usize, &Footprint)> = footprints
        .iter()
        .enumerate()
        .filter_map(|(idx, f)| f.map(|f| (idx, f)))
        .collect();
    let index = envelope_tree(
        present
            .iter()
            .map(|(_, f)| f.envelope().expanded_m(NEIGHBOR_DISTANCE_M)),
    );

    for (pos, (a, footprint)) in present.iter().enumerate() {
        for entry in index.locate_in_envelope_intersecting(&footprint.envelope().to_aabb()) {
            let other = entry.idx;
            if other <= pos {
                continue;
            }
            let (b, other_footprint) = present[other];
            if footprint_distance_m(footprint, other_footprint) <= NEIGHBOR_DISTANCE_M {
                adjacency[*a].insert(b);
                adjacency[b].insert(*a);
            }
        }
    }

    adjacency
}

/// Greedy coloring
///
/// Visits buildings by descending degree, ties by ascending key. Each takes the
/// first index, scanning cyclically from its start, that no colored neighbor
/// uses. When all are taken it keeps its start index.
pub fn greedy_colors(keys: &[BuildingKey], adjacency: &[BTreeSet<usize>]) -> Vec<u32> {
    let mut order: Vec<usize> = (0..keys.len()).collect();
    order.sort_by(|&a, &b| {
        adjacency[b]
            .len()
            .cmp(&adjacency[a].len())
            .then_with(|| keys[a].cmp(&keys[b]))
    });

    let mut colors: Vec<Option<u32>> = vec![None; keys.len()];
    for idx in order {
        let used: BTreeSet<u32> = adjacency[idx].iter().filter_map(|&n| colors[n]).collect();
        let start = palette_start(&keys[idx]);
        let chosen = (0..PALETTE_SIZE)
            .map(|offset| (start + offset) % PALETTE_SIZE)
            .find(|c| !used.contains(c))
            .unwrap_or(start);
        colors[idx] = Some(chosen);
    }

    colors
        .into_iter()
        .zip(keys)
        .map(|(c, key)| c.unwrap_or_else(|| palette_start(key)))
        .collect()
}

/// Color every building referenced by `run_id`'s results and upsert the table
///
/// Returns the number of colored buildings.
pub async fn assign_building_colors(
    pool: &SqlitePool,
    buildings: &dyn BuildingStore,
    run_id: Uuid,
) -> Result<usize> {
    let mut keys = db::results::referenced_buildings(pool, run_id).await?;
    if keys.is_empty() {
        debug!(run_id = %run_id, "No buildings referenced; nothing to color");
        return Ok(0);
    }

    let sources: BTreeSet<BuildingSource> = keys.iter().map(|k| k.source).collect();
    let mut footprints_by_key: HashMap<BuildingKey, Footprint> = HashMap::new();
    for source in sources {
        for record in buildings.query(source).await? {
            footprints_by_key.insert(record.key, record.footprint);
        }
    }

    // Buildings gone from the store are not colored
    let referenced = keys.len();
    keys.retain(|k| footprints_by_key.contains_key(k));
    if keys.len() < referenced {
        warn!(
            run_id = %run_id,
            missing = referenced - keys.len(),
            "Referenced buildings without a footprint skipped"
        );
    }
    if keys.is_empty() {
        return Ok(0);
    }

    let footprints: Vec<Option<&Footprint>> = keys.iter().map(|k| footprints_by_key.get(k)).collect();
    let adjacency = build_adjacency(&footprints);
    let colors = greedy_colors(&keys, &adjacency);

    let table: BTreeMap<BuildingKey, u32> = keys.into_iter().zip(colors).collect();
    db::colors::upsert_colors(pool, run_id, &table).await?;

    let edges: usize = adjacency.iter().map(BTreeSet::len).sum::<usize>() / 2;
    info!(run_id = %run_id, buildings = table.len(), edges, "Building colors assigned");
    Ok(table.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use insar_common::geo::{LocalFrame, LonLat};

    fn key(id: &str) -> BuildingKey {
        BuildingKey::new(BuildingSource::Gba, id)
    }

    fn complete_graph(n: usize) -> Vec<BTreeSet<usize>> {
        (0..n)
            .map(|i| (0..n).filter(|&j| j != i).collect())
            .collect()
    }

    #[test]
    fn test_palette_start_matches_reference_values() {
        // First eight hex digits of the SHA-1 digest, mod 60
        assert_eq!(palette_start(&key("123")), 37);
        assert_eq!(palette_start(&key("near")), 30);
        assert_eq!(palette_start(&key("lone")), 24);
        assert_eq!(palette_start(&BuildingKey::new(BuildingSource::Osm, "42")), 24);
    }

    #[test]
    fn test_palette_start_is_stable() {
        let k = key("123");
        assert_eq!(palette_start(&k), palette_start(&key("123")));
        assert!(palette_start(&k) < PALETTE_SIZE);
        assert_eq!(fallback_color_index(BuildingSource::Gba, "123"), palette_start(&k));
    }

    #[test]
    fn test_isolated_buildings_keep_their_start_index() {
        let keys = vec![key("a"), key("b")];
        let colors = greedy_colors(&keys, &[BTreeSet::new(), BTreeSet::new()]);
        assert_eq!(colors, vec![palette_start(&keys[0]), palette_start(&keys[1])]);
    }

    #[test]
    fn test_clique_up_to_palette_size_is_properly_colored() {
        for n in [2usize, 7, 60] {
            let keys: Vec<BuildingKey> = (0..n).map(|i| key(&format!("b{i}"))).collect();
            let colors = greedy_colors(&keys, &complete_graph(n));
            let distinct: BTreeSet<u32> = colors.iter().copied().collect();
            assert_eq!(distinct.len(), n, "clique of {n}");
        }
    }

    #[test]
    fn test_saturated_palette_falls_back_to_start() {
        let n = PALETTE_SIZE as usize + 1;
        let keys: Vec<BuildingKey> = (0..n).map(|i| key(&format!("b{i:03}"))).collect();
        let colors = greedy_colors(&keys, &complete_graph(n));
        // Equal degrees: the largest key is visited last and finds no free color
        let last = n - 1;
        assert_eq!(colors[last], palette_start(&keys[last]));
    }

    #[test]
    fn test_coloring_is_deterministic() {
        let keys: Vec<BuildingKey> = (0..12).map(|i| key(&format!("{i}"))).collect();
        let mut adjacency = vec![BTreeSet::new(); 12];
        for (a, b) in [(0, 1), (1, 2), (2, 0), (3, 4), (5, 6), (6, 7), (7, 8), (8, 5)] {
            adjacency[a].insert(b);
            adjacency[b].insert(a);
        }
        let first = greedy_colors(&keys, &adjacency);
        assert_eq!(first, greedy_colors(&keys, &adjacency));
        for (a, neighbors) in adjacency.iter().enumerate() {
            for &b in neighbors {
                assert_ne!(first[a], first[b]);
            }
        }
    }

    #[test]
    fn test_adjacency_uses_true_distance() {
        let origin = LonLat::new(16.37, 48.21);
        let frame = LocalFrame::at(origin);
        let square = |east: f64| {
            Footprint::rectangle(frame.offset(east, 0.0), frame.offset(east + 10.0, 10.0)).unwrap()
        };
        // a: [0,10], b: [14,24] (4 m gap), c: [30,40] (6 m gap from b)
        let (a, b, c) = (square(0.0), square(14.0), square(30.0));
        let adjacency = build_adjacency(&[Some(&a), Some(&b), Some(&c), None]);
        assert_eq!(adjacency[0], BTreeSet::from([1]));
        assert_eq!(adjacency[1], BTreeSet::from([0]));
        assert!(adjacency[2].is_empty());
        assert!(adjacency[3].is_empty());
    }
}
