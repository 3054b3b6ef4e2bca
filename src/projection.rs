//! Web 墨卡托瓦片坐标 (Slippy Map)
//!
//! 将 WGS84 经纬度与瓦片坐标/像素坐标互相转换。
//! 瓦片边长固定 256 像素，瓦片边界只由整数像素坐标计算，
//! 因此相邻瓦片的公共边界在浮点上逐位相等。

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;

use crate::types::{BoundingBox, LngLat};

/// 瓦片边长（像素）
pub const TILE_SIZE: u32 = 256;

/// 墨卡托投影可表示的纬度范围
const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

/// 瓦片坐标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileCoord {
    pub x: u32,
    pub y: u32,
    pub z: u8,
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

impl TileCoord {
    pub fn new(x: u32, y: u32, z: u8) -> Self {
        Self { x, y, z }
    }

    /// 从经纬度计算瓦片坐标
    pub fn from_lonlat(lon: f64, lat: f64, zoom: u8) -> Self {
        let (px, py) = lonlat_to_pixel(lon, lat, zoom);
        let n = tiles_per_axis(zoom);
        let x = (px / TILE_SIZE as f64).floor() as i64;
        let y = (py / TILE_SIZE as f64).floor() as i64;
        Self {
            x: x.clamp(0, n as i64 - 1) as u32,
            y: y.clamp(0, n as i64 - 1) as u32,
            z: zoom,
        }
    }

    /// 计算瓦片的经纬度边界
    pub fn to_bbox(&self) -> BoundingBox {
        let left = self.x as f64 * TILE_SIZE as f64;
        let top = self.y as f64 * TILE_SIZE as f64;
        let (west, north) = pixel_to_lonlat(left, top, self.z);
        let (east, south) = pixel_to_lonlat(
            (self.x as u64 + 1) as f64 * TILE_SIZE as f64,
            (self.y as u64 + 1) as f64 * TILE_SIZE as f64,
            self.z,
        );
        BoundingBox::new(west, south, east, north)
    }

    /// 瓦片内相对位置对应的坐标，`fx`/`fy` 以瓦片边长为单位 (0..1)
    pub fn lonlat_at(&self, fx: f64, fy: f64) -> LngLat {
        let (lng, lat) = pixel_to_lonlat(
            (self.x as f64 + fx) * TILE_SIZE as f64,
            (self.y as f64 + fy) * TILE_SIZE as f64,
            self.z,
        );
        LngLat::new(lng, lat)
    }

    /// 按给定偏移取相邻瓦片，x/y 在 2^zoom 上取模回绕
    pub fn offset(&self, dx: i64, dy: i64) -> Self {
        let n = tiles_per_axis(self.z) as i64;
        Self {
            x: (self.x as i64 + dx).rem_euclid(n) as u32,
            y: (self.y as i64 + dy).rem_euclid(n) as u32,
            z: self.z,
        }
    }
}

#[inline]
pub fn tiles_per_axis(zoom: u8) -> u64 {
    1_u64 << zoom
}

/// 经纬度 → 全局像素坐标
pub fn lonlat_to_pixel(lon: f64, lat: f64, zoom: u8) -> (f64, f64) {
    let map_size = (tiles_per_axis(zoom) * TILE_SIZE as u64) as f64;
    let lat = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE);
    let x = (lon + 180.0) / 360.0;
    let sin_lat = lat.to_radians().sin();
    let y = 0.5 - ((1.0 + sin_lat) / (1.0 - sin_lat)).ln() / (4.0 * PI);
    (x * map_size, y * map_size)
}

/// 全局像素坐标 → 经纬度
///
/// 不对像素做截断，网格跨越反子午线时经度可超出 ±180。
pub fn pixel_to_lonlat(px: f64, py: f64, zoom: u8) -> (f64, f64) {
    let map_size = (tiles_per_axis(zoom) * TILE_SIZE as u64) as f64;
    let lon = px / map_size * 360.0 - 180.0;
    let lat = (PI * (1.0 - 2.0 * py / map_size)).sinh().atan().to_degrees();
    (lon, lat)
}
