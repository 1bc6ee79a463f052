//! Envelope entries for `rstar` R-trees
//!
//! Candidates are prefiltered by bounding box before exact distance tests. An
//! [`IndexedEnvelope`] remembers the position of its footprint in the caller's
//! slice so query hits map straight back to records.

use rstar::{RTree, RTreeObject, AABB};

use super::BBox;

/// Envelope of the `idx`-th item of some slice
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedEnvelope {
    pub idx: usize,
    env: AABB<[f64; 2]>,
}

impl IndexedEnvelope {
    pub fn new(idx: usize, bbox: &BBox) -> Self {
        Self {
            idx,
            env: bbox.to_aabb(),
        }
    }
}

impl RTreeObject for IndexedEnvelope {
    type Envelope = AABB<[f64; 2]>;

    #[inline]
    fn envelope(&self) -> Self::Envelope {
        self.env
    }
}

impl BBox {
    pub fn to_aabb(&self) -> AABB<[f64; 2]> {
        AABB::from_corners([self.min_lon, self.min_lat], [self.max_lon, self.max_lat])
    }
}

/// Bulk-load envelopes; entry `i` carries index `i`
pub fn envelope_tree(envelopes: impl IntoIterator<Item = BBox>) -> RTree<IndexedEnvelope> {
    let entries: Vec<IndexedEnvelope> = envelopes
        .into_iter()
        .enumerate()
        .map(|(idx, bbox)| IndexedEnvelope::new(idx, &bbox))
        .collect();
    RTree::bulk_load(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> BBox {
        BBox::new(min_lon, min_lat, max_lon, max_lat).unwrap()
    }

    fn hits(tree: &RTree<IndexedEnvelope>, window: &BBox) -> Vec<usize> {
        let mut ids: Vec<usize> = tree
            .locate_in_envelope_intersecting(&window.to_aabb())
            .map(|e| e.idx)
            .collect();
        ids.sort_unstable();
        ids
    }

    #[test]
    fn test_query_returns_intersecting_envelopes_only() {
        let tree = envelope_tree(vec![
            b(13.0000, 47.0000, 13.0001, 47.0001),
            b(13.0050, 47.0050, 13.0051, 47.0051),
            b(13.0001, 47.0001, 13.0030, 47.0030),
        ]);
        assert_eq!(hits(&tree, &b(13.00005, 47.00005, 13.0002, 47.0002)), vec![0, 2]);
    }

    #[test]
    fn test_touching_boundaries_intersect() {
        let tree = envelope_tree(vec![b(13.0, 47.0, 13.1, 47.1)]);
        assert_eq!(hits(&tree, &b(13.1, 47.1, 13.2, 47.2)), vec![0]);
    }

    #[test]
    fn test_large_envelope_is_a_single_entry() {
        // A regional envelope costs one node, independent of its area
        let tree = envelope_tree(vec![b(13.0, 47.0, 14.5, 48.5), b(-70.0, -30.0, -69.9, -29.9)]);
        assert_eq!(tree.size(), 2);
        assert_eq!(hits(&tree, &b(13.7, 47.7, 13.71, 47.71)), vec![0]);
        assert_eq!(hits(&tree, &BBox::world()), vec![0, 1]);
    }
}
