//! Feature standardization and DBSCAN
//!
//! Semantics follow the usual reference behaviour: Euclidean metric, a point
//! is within the radius when its distance is `<= eps`, and a point counts
//! towards its own neighborhood. Labels start at 0 in discovery order; noise
//! is [`NOISE`].

use std::collections::HashMap;

/// Label of points that belong to no cluster
pub const NOISE: i64 = -1;

/// Scales below this are treated as zero variance
const MIN_SCALE: f64 = 10.0 * f64::EPSILON;

/// Zero-mean, unit-variance columns (population std)
///
/// Non-finite inputs become 0 first. Constant columns are centred but keep
/// scale 1, so they end up all zeros.
pub fn standardize<const N: usize>(rows: &[[f64; N]]) -> Vec<[f64; N]> {
    if rows.is_empty() {
        return Vec::new();
    }
    let clean: Vec<[f64; N]> = rows
        .iter()
        .map(|row| row.map(|v| if v.is_finite() { v } else { 0.0 }))
        .collect();

    let n = clean.len() as f64;
    let mut mean = [0.0; N];
    for row in &clean {
        for (m, v) in mean.iter_mut().zip(row) {
            *m += v / n;
        }
    }
    let mut scale = [0.0; N];
    for row in &clean {
        for ((s, v), m) in scale.iter_mut().zip(row).zip(&mean) {
            *s += (v - m).powi(2) / n;
        }
    }
    for s in scale.iter_mut() {
        *s = s.sqrt();
        if *s < MIN_SCALE {
            *s = 1.0;
        }
    }

    clean
        .iter()
        .map(|row| {
            let mut out = [0.0; N];
            for d in 0..N {
                out[d] = (row[d] - mean[d]) / scale[d];
            }
            out
        })
        .collect()
}

fn squared_distance<const N: usize>(a: &[f64; N], b: &[f64; N]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

fn cell_of<const N: usize>(p: &[f64; N], eps: f64) -> [i64; N] {
    p.map(|v| (v / eps).floor() as i64)
}

/// Neighborhood of every point (itself included), via a grid of `eps` cells
fn neighborhoods<const N: usize>(points: &[[f64; N]], eps: f64) -> Vec<Vec<usize>> {
    let mut cells: HashMap<[i64; N], Vec<usize>> = HashMap::new();
    for (idx, p) in points.iter().enumerate() {
        cells.entry(cell_of(p, eps)).or_default().push(idx);
    }

    let offsets: Vec<[i64; N]> = (0..3usize.pow(N as u32))
        .map(|mut code| {
            let mut offset = [0i64; N];
            for o in offset.iter_mut() {
                *o = (code % 3) as i64 - 1;
                code /= 3;
            }
            offset
        })
        .collect();

    let eps_sq = eps * eps;
    points
        .iter()
        .map(|p| {
            let home = cell_of(p, eps);
            let mut found = Vec::new();
            for offset in &offsets {
                let mut key = home;
                for (k, o) in key.iter_mut().zip(offset) {
                    *k = k.saturating_add(*o);
                }
                if let Some(members) = cells.get(&key) {
                    found.extend(
                        members
                            .iter()
                            .copied()
                            .filter(|&j| squared_distance(p, &points[j]) <= eps_sq),
                    );
                }
            }
            found.sort_unstable();
            found
        })
        .collect()
}

/// Cluster labels for `points`
pub fn dbscan<const N: usize>(points: &[[f64; N]], eps: f64, min_samples: usize) -> Vec<i64> {
    let neighbors = neighborhoods(points, eps);
    let is_core: Vec<bool> = neighbors.iter().map(|n| n.len() >= min_samples).collect();

    let mut labels = vec![NOISE; points.len()];
    let mut next_label = 0i64;
    let mut stack = Vec::new();

    for seed in 0..points.len() {
        if labels[seed] != NOISE || !is_core[seed] {
            continue;
        }
        stack.push(seed);
        while let Some(i) = stack.pop() {
            if labels[i] != NOISE {
                continue;
            }
            labels[i] = next_label;
            if is_core[i] {
                stack.extend(neighbors[i].iter().copied().filter(|&j| labels[j] == NOISE));
            }
        }
        next_label += 1;
    }

    labels
}

/// Number of distinct non-noise labels
pub fn cluster_count(labels: &[i64]) -> usize {
    let mut seen: Vec<i64> = labels.iter().copied().filter(|&l| l != NOISE).collect();
    seen.sort_unstable();
    seen.dedup();
    seen.len()
}
