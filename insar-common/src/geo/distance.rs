//! True point/footprint and footprint/footprint distances in metres

use super::{Footprint, LocalFrame, LonLat, Xy};

/// Projected polygon rings
struct PlanarPolygon {
    exterior: Vec<Xy>,
    holes: Vec<Vec<Xy>>,
}

impl PlanarPolygon {
    fn rings(&self) -> impl Iterator<Item = &Vec<Xy>> {
        std::iter::once(&self.exterior).chain(self.holes.iter())
    }

    fn contains(&self, p: Xy) -> bool {
        point_in_ring(p, &self.exterior) && !self.holes.iter().any(|h| point_in_ring(p, h))
    }
}

fn project_footprint(frame: &LocalFrame, footprint: &Footprint) -> Vec<PlanarPolygon> {
    footprint
        .polygons()
        .iter()
        .map(|polygon| PlanarPolygon {
            exterior: polygon.exterior.iter().map(|p| frame.project(*p)).collect(),
            holes: polygon
                .holes
                .iter()
                .map(|ring| ring.iter().map(|p| frame.project(*p)).collect())
                .collect(),
        })
        .collect()
}

/// Ring edges, closing the ring when the last position does not repeat the first
fn segments(ring: &[Xy]) -> impl Iterator<Item = (Xy, Xy)> + '_ {
    let n = ring.len();
    (0..n).map(move |i| (ring[i], ring[(i + 1) % n]))
}

/// Distance from `p` to segment `a`-`b`
pub fn point_segment_distance(p: Xy, a: Xy, b: Xy) -> f64 {
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    let len2 = dx * dx + dy * dy;
    if len2 == 0.0 {
        return p.distance(a);
    }
    let t = (((p.x - a.x) * dx + (p.y - a.y) * dy) / len2).clamp(0.0, 1.0);
    p.distance(Xy::new(a.x + t * dx, a.y + t * dy))
}

/// Even-odd ray casting
pub fn point_in_ring(p: Xy, ring: &[Xy]) -> bool {
    let mut inside = false;
    let n = ring.len();
    if n < 3 {
        return false;
    }
    let mut j = n - 1;
    for i in 0..n {
        let (pi, pj) = (ring[i], ring[j]);
        if (pi.y > p.y) != (pj.y > p.y) {
            let x_cross = (pj.x - pi.x) * (p.y - pi.y) / (pj.y - pi.y) + pi.x;
            if p.x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

fn orientation(a: Xy, b: Xy, c: Xy) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

fn on_segment(a: Xy, b: Xy, p: Xy) -> bool {
    p.x >= a.x.min(b.x) && p.x <= a.x.max(b.x) && p.y >= a.y.min(b.y) && p.y <= a.y.max(b.y)
}

/// Proper or touching intersection of segments `a`-`b` and `c`-`d`
pub fn segments_intersect(a: Xy, b: Xy, c: Xy, d: Xy) -> bool {
    let o1 = orientation(a, b, c);
    let o2 = orientation(a, b, d);
    let o3 = orientation(c, d, a);
    let o4 = orientation(c, d, b);

    if ((o1 > 0.0 && o2 < 0.0) || (o1 < 0.0 && o2 > 0.0))
        && ((o3 > 0.0 && o4 < 0.0) || (o3 < 0.0 && o4 > 0.0))
    {
        return true;
    }

    (o1 == 0.0 && on_segment(a, b, c))
        || (o2 == 0.0 && on_segment(a, b, d))
        || (o3 == 0.0 && on_segment(c, d, a))
        || (o4 == 0.0 && on_segment(c, d, b))
}

/// Distance in metres from a point to a footprint; zero when the point lies inside
pub fn point_to_footprint_m(point: LonLat, footprint: &Footprint) -> f64 {
    let frame = LocalFrame::at(point);
    let origin = Xy::new(0.0, 0.0);
    let polygons = project_footprint(&frame, footprint);

    if polygons.iter().any(|polygon| polygon.contains(origin)) {
        return 0.0;
    }

    polygons
        .iter()
        .flat_map(|polygon| polygon.rings())
        .flat_map(|ring| segments(ring))
        .map(|(a, b)| point_segment_distance(origin, a, b))
        .fold(f64::INFINITY, f64::min)
}

/// Minimum distance in metres between two footprints; zero when they touch or overlap
pub fn footprint_distance_m(a: &Footprint, b: &Footprint) -> f64 {
    let frame = LocalFrame::at(a.envelope().center());
    let pa = project_footprint(&frame, a);
    let pb = project_footprint(&frame, b);

    let vertices = |polygons: &[PlanarPolygon]| -> Vec<Xy> {
        polygons
            .iter()
            .flat_map(|p| p.rings())
            .flat_map(|r| r.iter().copied())
            .collect()
    };
    let edges = |polygons: &[PlanarPolygon]| -> Vec<(Xy, Xy)> {
        polygons
            .iter()
            .flat_map(|p| p.rings())
            .flat_map(|r| segments(r))
            .collect()
    };

    let (va, vb) = (vertices(pa.as_slice()), vertices(pb.as_slice()));
    let (ea, eb) = (edges(pa.as_slice()), edges(pb.as_slice()));

    // Containment either way means overlap
    if va.iter().any(|v| pb.iter().any(|p| p.contains(*v)))
        || vb.iter().any(|v| pa.iter().any(|p| p.contains(*v)))
    {
        return 0.0;
    }

    if ea
        .iter()
        .any(|(a1, a2)| eb.iter().any(|(b1, b2)| segments_intersect(*a1, *a2, *b1, *b2)))
    {
        return 0.0;
    }

    let a_to_b = va
        .iter()
        .flat_map(|v| eb.iter().map(move |(s, e)| point_segment_distance(*v, *s, *e)));
    let b_to_a = vb
        .iter()
        .flat_map(|v| ea.iter().map(move |(s, e)| point_segment_distance(*v, *s, *e)));

    a_to_b.chain(b_to_a).fold(f64::INFINITY, f64::min)
}
