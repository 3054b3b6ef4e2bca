//! 测地距离计算
//!
//! - `Ruler`: 距离/方位/插值的抽象，空间索引与路网只依赖该 trait
//! - `CheapRuler`: 以某一纬度为基准的局部平面近似 (城市尺度误差 < 0.1%)
//! - `GeodesicRuler`: 球面 haversine 公式，用于跨大范围的校验

use crate::types::LngLat;

// WGS84 椭球参数
const RE: f64 = 6378.137;
const FE: f64 = 1.0 / 298.257_223_563;
const E2: f64 = FE * (2.0 - FE);
const METERS: f64 = 1000.0;

/// 平均地球半径 (米)
const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// 将角度归一化到 [-180, 180]
#[inline]
pub fn wrap(deg: f64) -> f64 {
    let mut d = deg;
    while d < -180.0 {
        d += 360.0;
    }
    while d > 180.0 {
        d -= 360.0;
    }
    d
}

/// 线上最近点
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointOnLine {
    pub point: LngLat,
    /// 查询点到最近点的距离 (米)
    pub distance: f64,
    /// 最近点所在线段的起点下标
    pub index: usize,
    /// 最近点在该线段上的参数 (0..1)
    pub t: f64,
}

/// 测地计算接口，所有距离单位为米，方位单位为度 (正北为 0，顺时针)
pub trait Ruler: Send + Sync {
    fn distance(&self, a: LngLat, b: LngLat) -> f64;

    fn bearing(&self, a: LngLat, b: LngLat) -> f64;

    fn destination(&self, p: LngLat, distance: f64, bearing: f64) -> LngLat;

    /// 点到线段的最短距离
    fn point_to_segment_distance(&self, p: LngLat, a: LngLat, b: LngLat) -> f64;

    /// 线上距起点 `distance` 米处的点
    fn along(&self, line: &[LngLat], distance: f64) -> Option<LngLat> {
        let first = *line.first()?;
        if distance <= 0.0 {
            return Some(first);
        }
        let mut sum = 0.0;
        for pair in line.windows(2) {
            let d = self.distance(pair[0], pair[1]);
            sum += d;
            if sum > distance {
                return Some(interpolate(pair[0], pair[1], (distance - (sum - d)) / d));
            }
        }
        line.last().copied()
    }

    /// 折线总长
    fn line_distance(&self, line: &[LngLat]) -> f64 {
        line.windows(2).map(|pair| self.distance(pair[0], pair[1])).sum()
    }

    /// 折线上距 `p` 最近的点
    fn point_on_line(&self, line: &[LngLat], p: LngLat) -> Option<PointOnLine> {
        let first = *line.first()?;
        if line.len() == 1 {
            return Some(PointOnLine {
                point: first,
                distance: self.distance(p, first),
                index: 0,
                t: 0.0,
            });
        }

        let mut best: Option<PointOnLine> = None;
        for (index, pair) in line.windows(2).enumerate() {
            let (point, t) = self.closest_on_segment(p, pair[0], pair[1]);
            let distance = self.distance(p, point);
            if best.map_or(true, |b| distance < b.distance) {
                best = Some(PointOnLine {
                    point,
                    distance,
                    index,
                    t,
                });
            }
        }
        best
    }

    /// 线段上距 `p` 最近的点及其参数
    fn closest_on_segment(&self, p: LngLat, a: LngLat, b: LngLat) -> (LngLat, f64) {
        let ab = self.distance(a, b);
        if ab == 0.0 {
            return (a, 0.0);
        }
        // 在方位投影下求参数，对平面近似与球面都足够精确
        let ap = self.distance(a, p);
        let angle = (self.bearing(a, p) - self.bearing(a, b)).to_radians();
        let t = (ap * angle.cos() / ab).clamp(0.0, 1.0);
        (interpolate(a, b, t), t)
    }
}

/// 两点线性插值
#[inline]
pub fn interpolate(a: LngLat, b: LngLat, t: f64) -> LngLat {
    let dx = wrap(b.lng - a.lng);
    let dy = b.lat - a.lat;
    LngLat::new(a.lng + dx * t, a.lat + dy * t)
}

// ============================================================================
// CheapRuler
// ============================================================================

/// 局部平面近似
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CheapRuler {
    lat: f64,
    kx: f64,
    ky: f64,
}

impl CheapRuler {
    pub fn new(lat: f64) -> Self {
        let m = RE.to_radians() * METERS;
        let cos_lat = lat.to_radians().cos();
        let w2 = 1.0 / (1.0 - E2 * (1.0 - cos_lat * cos_lat));
        let w = w2.sqrt();

        Self {
            lat,
            kx: m * w * cos_lat,
            ky: m * w * w2 * (1.0 - E2),
        }
    }

    pub fn latitude(&self) -> f64 {
        self.lat
    }

    /// 纬度漂移超过 0.01° 时需要重建
    pub fn needs_replacing(&self, new_lat: f64) -> bool {
        (self.lat - new_lat).abs() > 0.01
    }

    /// 按东/北偏移 (米) 移动点
    pub fn offset(&self, p: LngLat, dx: f64, dy: f64) -> LngLat {
        LngLat::new(p.lng + dx / self.kx, p.lat + dy / self.ky)
    }

    /// 一米对应的经/纬度跨度
    pub fn degrees_per_meter(&self) -> (f64, f64) {
        (1.0 / self.kx, 1.0 / self.ky)
    }
}

impl Ruler for CheapRuler {
    fn distance(&self, a: LngLat, b: LngLat) -> f64 {
        let dx = wrap(a.lng - b.lng) * self.kx;
        let dy = (a.lat - b.lat) * self.ky;
        (dx * dx + dy * dy).sqrt()
    }

    fn bearing(&self, a: LngLat, b: LngLat) -> f64 {
        let dx = wrap(b.lng - a.lng) * self.kx;
        let dy = (b.lat - a.lat) * self.ky;
        dx.atan2(dy).to_degrees()
    }

    fn destination(&self, p: LngLat, distance: f64, bearing: f64) -> LngLat {
        let a = bearing.to_radians();
        self.offset(p, a.sin() * distance, a.cos() * distance)
    }

    fn point_to_segment_distance(&self, p: LngLat, a: LngLat, b: LngLat) -> f64 {
        let (point, _) = self.closest_on_segment(p, a, b);
        self.distance(p, point)
    }

    fn closest_on_segment(&self, p: LngLat, a: LngLat, b: LngLat) -> (LngLat, f64) {
        let dx = wrap(b.lng - a.lng) * self.kx;
        let dy = (b.lat - a.lat) * self.ky;
        if dx == 0.0 && dy == 0.0 {
            return (a, 0.0);
        }
        let t = (wrap(p.lng - a.lng) * self.kx * dx + (p.lat - a.lat) * self.ky * dy)
            / (dx * dx + dy * dy);
        let t = t.clamp(0.0, 1.0);
        (interpolate(a, b, t), t)
    }
}

// ============================================================================
// GeodesicRuler
// ============================================================================

/// 球面 haversine 公式
#[derive(Debug, Clone, Copy, Default)]
pub struct GeodesicRuler;

impl Ruler for GeodesicRuler {
    fn distance(&self, a: LngLat, b: LngLat) -> f64 {
        let lat1 = a.lat.to_radians();
        let lat2 = b.lat.to_radians();
        let d_lat = lat2 - lat1;
        let d_lng = wrap(b.lng - a.lng).to_radians();
        let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * h.sqrt().asin()
    }

    fn bearing(&self, a: LngLat, b: LngLat) -> f64 {
        let lat1 = a.lat.to_radians();
        let lat2 = b.lat.to_radians();
        let d_lng = wrap(b.lng - a.lng).to_radians();
        let y = d_lng.sin() * lat2.cos();
        let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * d_lng.cos();
        y.atan2(x).to_degrees()
    }

    fn destination(&self, p: LngLat, distance: f64, bearing: f64) -> LngLat {
        let delta = distance / EARTH_RADIUS_M;
        let theta = bearing.to_radians();
        let lat1 = p.lat.to_radians();
        let lng1 = p.lng.to_radians();
        let lat2 = (lat1.sin() * delta.cos() + lat1.cos() * delta.sin() * theta.cos()).asin();
        let lng2 = lng1
            + (theta.sin() * delta.sin() * lat1.cos()).atan2(delta.cos() - lat1.sin() * lat2.sin());
        LngLat::new(wrap(lng2.to_degrees()), lat2.to_degrees())
    }

    fn point_to_segment_distance(&self, p: LngLat, a: LngLat, b: LngLat) -> f64 {
        let (point, _) = self.closest_on_segment(p, a, b);
        self.distance(p, point)
    }
}
