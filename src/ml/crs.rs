//! Conversion of native coordinates into the map projection
//!
//! Every supported source system is either geographic (longitude/latitude in
//! degrees, x first) or a Transverse Mercator grid on the Bessel 1841 or GRS80
//! ellipsoid. Korean 1985 grids are shifted to WGS84 with a seven-parameter
//! Helmert transform before projecting.

use crate::structs::{AnalysisError, Result};

/// Projection used for every converted output
pub const TARGET_CRS: &str = "EPSG:5179";

/// Accepted source systems
pub const ALLOWED_CRS: [&str; 19] = [
    "EPSG:4004",
    "EPSG:4019",
    "EPSG:4326",
    "EPSG:5173",
    "EPSG:5174",
    "EPSG:5175",
    "EPSG:5176",
    "EPSG:5177",
    "EPSG:5178",
    "EPSG:5179",
    "EPSG:5180",
    "EPSG:5181",
    "EPSG:5182",
    "EPSG:5183",
    "EPSG:5184",
    "EPSG:5185",
    "EPSG:5186",
    "EPSG:5187",
    "EPSG:5188",
];

/// Converts a coordinate pair from `source_crs` into `TARGET_CRS`
pub trait CoordinateConverter {
    /// # Errors
    /// Returns `UnsupportedCrs` if `source_crs` is not in `ALLOWED_CRS`
    fn convert(&self, x: f64, y: f64, source_crs: &str) -> Result<(f64, f64)>;
}

/// # Errors
/// Returns `UnsupportedCrs` if `crs` is not in `ALLOWED_CRS`
pub fn validate_crs(crs: &str) -> Result<()> {
    if ALLOWED_CRS.contains(&crs) {
        Ok(())
    } else {
        Err(AnalysisError::UnsupportedCrs(crs.to_string()))
    }
}

#[derive(Debug, Clone, Copy)]
struct Ellipsoid {
    a: f64,
    inv_f: f64,
}

impl Ellipsoid {
    const BESSEL: Self = Self {
        a: 6_377_397.155,
        inv_f: 299.152_812_8,
    };
    const GRS80: Self = Self {
        a: 6_378_137.0,
        inv_f: 298.257_222_101,
    };

    fn e2(self) -> f64 {
        let f = 1.0 / self.inv_f;
        f * (2.0 - f)
    }
}

/// Position-vector Helmert parameters to WGS84
#[derive(Debug, Clone, Copy)]
struct Helmert {
    translation: [f64; 3],
    /// arc-seconds
    rotation: [f64; 3],
    /// parts per million
    scale: f64,
}

const KOREAN_1985: Helmert = Helmert {
    translation: [-115.80, 474.99, 674.11],
    rotation: [1.16, -2.31, -1.63],
    scale: 6.43,
};

#[derive(Debug, Clone, Copy)]
struct TransverseMercator {
    lat0: f64,
    lon0: f64,
    k0: f64,
    false_easting: f64,
    false_northing: f64,
}

#[derive(Debug, Clone, Copy)]
enum Projection {
    Geographic,
    Tm(TransverseMercator),
}

#[derive(Debug, Clone, Copy)]
struct CrsDef {
    ellipsoid: Ellipsoid,
    to_wgs84: Option<Helmert>,
    projection: Projection,
}

const fn tm(lon0: f64, k0: f64, false_easting: f64, false_northing: f64) -> Projection {
    Projection::Tm(TransverseMercator {
        lat0: 38.0,
        lon0,
        k0,
        false_easting,
        false_northing,
    })
}

/// Offset of the modified Korean 1985 belts from the whole-degree meridians
const MODIFIED_BELT_SHIFT: f64 = 0.002_890_277_777_777_8;

fn lookup(crs: &str) -> Result<CrsDef> {
    validate_crs(crs)?;

    let bessel_1985 = |projection| CrsDef {
        ellipsoid: Ellipsoid::BESSEL,
        to_wgs84: Some(KOREAN_1985),
        projection,
    };
    let grs80 = |projection| CrsDef {
        ellipsoid: Ellipsoid::GRS80,
        to_wgs84: None,
        projection,
    };

    let def = match crs {
        "EPSG:4004" => CrsDef {
            ellipsoid: Ellipsoid::BESSEL,
            to_wgs84: None,
            projection: Projection::Geographic,
        },
        "EPSG:4019" | "EPSG:4326" => grs80(Projection::Geographic),
        "EPSG:5173" => bessel_1985(tm(125.0 + MODIFIED_BELT_SHIFT, 1.0, 200_000.0, 500_000.0)),
        "EPSG:5174" => bessel_1985(tm(127.0 + MODIFIED_BELT_SHIFT, 1.0, 200_000.0, 500_000.0)),
        "EPSG:5175" => bessel_1985(tm(127.0 + MODIFIED_BELT_SHIFT, 1.0, 200_000.0, 550_000.0)),
        "EPSG:5176" => bessel_1985(tm(129.0 + MODIFIED_BELT_SHIFT, 1.0, 200_000.0, 500_000.0)),
        "EPSG:5177" => bessel_1985(tm(131.0 + MODIFIED_BELT_SHIFT, 1.0, 200_000.0, 500_000.0)),
        "EPSG:5178" => bessel_1985(tm(127.5, 0.9996, 1_000_000.0, 2_000_000.0)),
        "EPSG:5179" => grs80(tm(127.5, 0.9996, 1_000_000.0, 2_000_000.0)),
        "EPSG:5180" => grs80(tm(125.0, 1.0, 200_000.0, 500_000.0)),
        "EPSG:5181" => grs80(tm(127.0, 1.0, 200_000.0, 500_000.0)),
        "EPSG:5182" => grs80(tm(127.0, 1.0, 200_000.0, 550_000.0)),
        "EPSG:5183" => grs80(tm(129.0, 1.0, 200_000.0, 500_000.0)),
        "EPSG:5184" => grs80(tm(131.0, 1.0, 200_000.0, 500_000.0)),
        "EPSG:5185" => grs80(tm(125.0, 1.0, 200_000.0, 600_000.0)),
        "EPSG:5186" => grs80(tm(127.0, 1.0, 200_000.0, 600_000.0)),
        "EPSG:5187" => grs80(tm(129.0, 1.0, 200_000.0, 600_000.0)),
        "EPSG:5188" => grs80(tm(131.0, 1.0, 200_000.0, 600_000.0)),
        other => return Err(AnalysisError::UnsupportedCrs(other.to_string())),
    };
    Ok(def)
}

/// Built-in converter for the Korean national grids
#[derive(Debug, Clone, Copy, Default)]
pub struct KoreanGridConverter;

impl CoordinateConverter for KoreanGridConverter {
    fn convert(&self, x: f64, y: f64, source_crs: &str) -> Result<(f64, f64)> {
        let source = lookup(source_crs)?;
        let target = lookup(TARGET_CRS)?;
        if source_crs == TARGET_CRS {
            return Ok((x, y));
        }

        let (lat, lon) = match source.projection {
            Projection::Geographic => (y.to_radians(), x.to_radians()),
            Projection::Tm(p) => p.inverse(source.ellipsoid, x, y),
        };

        let (lat, lon) = match source.to_wgs84 {
            Some(shift) => {
                let ecef = geodetic_to_ecef(source.ellipsoid, lat, lon);
                ecef_to_geodetic(target.ellipsoid, shift.apply(ecef))
            }
            None => (lat, lon),
        };

        match target.projection {
            Projection::Tm(p) => Ok(p.forward(target.ellipsoid, lat, lon)),
            Projection::Geographic => Ok((lon.to_degrees(), lat.to_degrees())),
        }
    }
}

impl TransverseMercator {
    /// Meridian arc length from the equator
    fn meridian_arc(ell: Ellipsoid, lat: f64) -> f64 {
        let e2 = ell.e2();
        let e4 = e2 * e2;
        let e6 = e4 * e2;
        ell.a
            * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * lat
                - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * lat).sin()
                + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * lat).sin()
                - (35.0 * e6 / 3072.0) * (6.0 * lat).sin())
    }

    fn forward(self, ell: Ellipsoid, lat: f64, lon: f64) -> (f64, f64) {
        let e2 = ell.e2();
        let ep2 = e2 / (1.0 - e2);
        let (sin, cos) = lat.sin_cos();
        let n = ell.a / (1.0 - e2 * sin * sin).sqrt();
        let t = lat.tan().powi(2);
        let c = ep2 * cos * cos;
        let a = (lon - self.lon0.to_radians()) * cos;
        let m = Self::meridian_arc(ell, lat);
        let m0 = Self::meridian_arc(ell, self.lat0.to_radians());

        let x = self.k0
            * n
            * (a + (1.0 - t + c) * a.powi(3) / 6.0
                + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * ep2) * a.powi(5) / 120.0);
        let y = self.k0
            * (m - m0
                + n * lat.tan()
                    * (a * a / 2.0
                        + (5.0 - t + 9.0 * c + 4.0 * c * c) * a.powi(4) / 24.0
                        + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * ep2) * a.powi(6)
                            / 720.0));

        (self.false_easting + x, self.false_northing + y)
    }

    fn inverse(self, ell: Ellipsoid, easting: f64, northing: f64) -> (f64, f64) {
        let e2 = ell.e2();
        let e4 = e2 * e2;
        let e6 = e4 * e2;
        let ep2 = e2 / (1.0 - e2);
        let m0 = Self::meridian_arc(ell, self.lat0.to_radians());

        let m = m0 + (northing - self.false_northing) / self.k0;
        let mu = m / (ell.a * (1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0));
        let e1 = (1.0 - (1.0 - e2).sqrt()) / (1.0 + (1.0 - e2).sqrt());
        let phi1 = mu
            + (3.0 * e1 / 2.0 - 27.0 * e1.powi(3) / 32.0) * (2.0 * mu).sin()
            + (21.0 * e1 * e1 / 16.0 - 55.0 * e1.powi(4) / 32.0) * (4.0 * mu).sin()
            + (151.0 * e1.powi(3) / 96.0) * (6.0 * mu).sin()
            + (1097.0 * e1.powi(4) / 512.0) * (8.0 * mu).sin();

        let (sin1, cos1) = phi1.sin_cos();
        let c1 = ep2 * cos1 * cos1;
        let t1 = phi1.tan().powi(2);
        let n1 = ell.a / (1.0 - e2 * sin1 * sin1).sqrt();
        let r1 = ell.a * (1.0 - e2) / (1.0 - e2 * sin1 * sin1).powf(1.5);
        let d = (easting - self.false_easting) / (n1 * self.k0);

        let lat = phi1
            - (n1 * phi1.tan() / r1)
                * (d * d / 2.0
                    - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * ep2) * d.powi(4) / 24.0
                    + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1 - 252.0 * ep2
                        - 3.0 * c1 * c1)
                        * d.powi(6)
                        / 720.0);
        let lon = self.lon0.to_radians()
            + (d - (1.0 + 2.0 * t1 + c1) * d.powi(3) / 6.0
                + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * ep2 + 24.0 * t1 * t1)
                    * d.powi(5)
                    / 120.0)
                / cos1;

        (lat, lon)
    }
}

impl Helmert {
    fn apply(self, [x, y, z]: [f64; 3]) -> [f64; 3] {
        let arcsec = std::f64::consts::PI / (180.0 * 3600.0);
        let [rx, ry, rz] = self.rotation.map(|r| r * arcsec);
        let s = 1.0 + self.scale * 1e-6;
        let [dx, dy, dz] = self.translation;
        [
            dx + s * (x - rz * y + ry * z),
            dy + s * (rz * x + y - rx * z),
            dz + s * (-ry * x + rx * y + z),
        ]
    }
}

fn geodetic_to_ecef(ell: Ellipsoid, lat: f64, lon: f64) -> [f64; 3] {
    let e2 = ell.e2();
    let (sin_lat, cos_lat) = lat.sin_cos();
    let n = ell.a / (1.0 - e2 * sin_lat * sin_lat).sqrt();
    [
        n * cos_lat * lon.cos(),
        n * cos_lat * lon.sin(),
        n * (1.0 - e2) * sin_lat,
    ]
}

fn ecef_to_geodetic(ell: Ellipsoid, [x, y, z]: [f64; 3]) -> (f64, f64) {
    let e2 = ell.e2();
    let p = x.hypot(y);
    let lon = y.atan2(x);
    let mut lat = z.atan2(p * (1.0 - e2));
    for _ in 0..10 {
        let sin_lat = lat.sin();
        let n = ell.a / (1.0 - e2 * sin_lat * sin_lat).sqrt();
        let h = p / lat.cos() - n;
        lat = z.atan2(p * (1.0 - e2 * n / (n + h)));
    }
    (lat, lon)
}
