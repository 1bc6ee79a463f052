//! Metric projections on the WGS84 ellipsoid

use super::LonLat;
use std::f64::consts::PI;

const WGS84_A: f64 = 6_378_137.0;
const WGS84_F: f64 = 1.0 / 298.257_223_563;
const UTM_K0: f64 = 0.9996;
const UTM_FALSE_EASTING: f64 = 500_000.0;
const UTM_FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

fn eccentricity_squared() -> f64 {
    WGS84_F * (2.0 - WGS84_F)
}

/// Planar coordinate in metres
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Xy {
    pub x: f64,
    pub y: f64,
}

impl Xy {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: Xy) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Local tangent plane: metres east/north of an origin
///
/// Uses the meridional and prime-vertical radii of curvature at the origin latitude.
#[derive(Debug, Clone, Copy)]
pub struct LocalFrame {
    origin: LonLat,
    m_per_deg_lon: f64,
    m_per_deg_lat: f64,
}

impl LocalFrame {
    pub fn at(origin: LonLat) -> Self {
        let e2 = eccentricity_squared();
        let phi = origin.lat.to_radians();
        let w = (1.0 - e2 * phi.sin().powi(2)).sqrt();
        let prime_vertical = WGS84_A / w;
        let meridional = WGS84_A * (1.0 - e2) / w.powi(3);

        Self {
            origin,
            // Clamped so polar origins never divide by zero
            m_per_deg_lon: (prime_vertical * phi.cos() * PI / 180.0).max(1e-6),
            m_per_deg_lat: meridional * PI / 180.0,
        }
    }

    pub fn origin(&self) -> LonLat {
        self.origin
    }

    pub fn project(&self, p: LonLat) -> Xy {
        Xy::new(
            (p.lon - self.origin.lon) * self.m_per_deg_lon,
            (p.lat - self.origin.lat) * self.m_per_deg_lat,
        )
    }

    pub fn unproject(&self, xy: Xy) -> LonLat {
        LonLat::new(
            self.origin.lon + xy.x / self.m_per_deg_lon,
            self.origin.lat + xy.y / self.m_per_deg_lat,
        )
    }

    /// Position `east_m`/`north_m` metres away from the origin
    pub fn offset(&self, east_m: f64, north_m: f64) -> LonLat {
        self.unproject(Xy::new(east_m, north_m))
    }

    /// Degrees of longitude and latitude spanned by `metres` at the origin
    pub fn metres_to_degrees(&self, metres: f64) -> (f64, f64) {
        (metres / self.m_per_deg_lon, metres / self.m_per_deg_lat)
    }
}

/// Zone number (1-60) covering a longitude
pub fn utm_zone(lon: f64) -> u8 {
    let zone = ((lon + 180.0) / 6.0).floor() as i64 + 1;
    zone.clamp(1, 60) as u8
}

/// Universal Transverse Mercator projection for one zone
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Utm {
    zone: u8,
    north: bool,
}

impl Utm {
    pub fn new(zone: u8, north: bool) -> Self {
        Self {
            zone: zone.clamp(1, 60),
            north,
        }
    }

    /// Zone and hemisphere containing a position
    pub fn for_location(p: LonLat) -> Self {
        Self::new(utm_zone(p.lon), p.lat >= 0.0)
    }

    pub fn zone(&self) -> u8 {
        self.zone
    }

    /// EPSG code of this zone (326xx north, 327xx south)
    pub fn epsg(&self) -> u32 {
        let base = if self.north { 32600 } else { 32700 };
        base + u32::from(self.zone)
    }

    fn central_meridian(&self) -> f64 {
        f64::from(self.zone) * 6.0 - 183.0
    }

    /// Forward projection (series expansion, sub-millimetre within the zone)
    pub fn project(&self, p: LonLat) -> Xy {
        let e2 = eccentricity_squared();
        let e4 = e2 * e2;
        let e6 = e4 * e2;
        let ep2 = e2 / (1.0 - e2);

        let phi = p.lat.to_radians();
        let dlam = (p.lon - self.central_meridian()).to_radians();
        let (sin_phi, cos_phi) = phi.sin_cos();
        let tan_phi = phi.tan();

        let n = WGS84_A / (1.0 - e2 * sin_phi * sin_phi).sqrt();
        let t = tan_phi * tan_phi;
        let c = ep2 * cos_phi * cos_phi;
        let a = cos_phi * dlam;

        let m = WGS84_A
            * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * phi
                - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * phi).sin()
                + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * phi).sin()
                - (35.0 * e6 / 3072.0) * (6.0 * phi).sin());

        let x = UTM_K0
            * n
            * (a + (1.0 - t + c) * a.powi(3) / 6.0
                + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * ep2) * a.powi(5) / 120.0)
            + UTM_FALSE_EASTING;

        let mut y = UTM_K0
            * (m + n
                * tan_phi
                * (a * a / 2.0
                    + (5.0 - t + 9.0 * c + 4.0 * c * c) * a.powi(4) / 24.0
                    + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * ep2) * a.powi(6) / 720.0));
        if !self.north {
            y += UTM_FALSE_NORTHING_SOUTH;
        }

        Xy::new(x, y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utm_zone_for_salzburg() {
        let utm = Utm::for_location(LonLat::new(13.04, 47.80));
        assert_eq!(utm.zone(), 33);
        assert_eq!(utm.epsg(), 32633);
    }

    #[test]
    fn test_utm_origin_on_central_meridian() {
        let xy = Utm::new(33, true).project(LonLat::new(15.0, 0.0));
        assert!((xy.x - 500_000.0).abs() < 1e-6);
        assert!(xy.y.abs() < 1e-6);
    }

    #[test]
    fn test_utm_preserves_short_distances() {
        let frame = LocalFrame::at(LonLat::new(13.005, 47.795));
        let a = frame.origin();
        let b = frame.offset(60.0, 80.0);

        let utm = Utm::for_location(a);
        let d = utm.project(a).distance(utm.project(b));
        // UTM scale factor near 13°E is within 0.1% of unity
        assert!((d - 100.0).abs() < 0.1, "distance was {d}");
    }

    #[test]
    fn test_local_frame_round_trip() {
        let frame = LocalFrame::at(LonLat::new(13.0, 47.8));
        let p = frame.offset(4.0, -3.0);
        let xy = frame.project(p);
        assert!((xy.x - 4.0).abs() < 1e-9);
        assert!((xy.y + 3.0).abs() < 1e-9);
        assert!((xy.distance(Xy::new(0.0, 0.0)) - 5.0).abs() < 1e-9);
    }
}
