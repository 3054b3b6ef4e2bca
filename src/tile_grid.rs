//! 瓦片网格计算
//!
//! 以观察者位置为锚点选取 N×N 瓦片，并给出两个包围盒：
//! - central: 离开后才触发重算 (滞回，避免在盒边缘反复重算)
//! - total: 网格覆盖的全部范围

use serde_json::{json, Value};

use crate::projection::{lonlat_to_pixel, pixel_to_lonlat, tiles_per_axis, TileCoord, TILE_SIZE};
use crate::types::{BoundingBox, LngLat};

/// 2×2 网格的中心盒半宽 (像素)
const CENTRAL_HALF_WIDTH_2X2: f64 = 160.0;
/// 3×3 网格的中心盒半宽 (像素)
const CENTRAL_HALF_WIDTH_3X3: f64 = 192.0;

#[derive(Debug, Clone, PartialEq)]
pub struct TileGrid {
    /// 先按行 (y) 再按列 (x) 排列
    pub tiles: Vec<TileCoord>,
    pub central: BoundingBox,
    pub total: BoundingBox,
    pub zoom: u8,
    /// 左上角瓦片的未回绕坐标，用于计算内部边界
    origin: (i64, i64),
    size: u32,
}

impl TileGrid {
    /// 计算包含 `location` 的网格；`size` 只支持 1、2、3
    pub fn new(location: LngLat, size: u32, zoom: u8) -> Option<Self> {
        let anchor = TileCoord::from_lonlat(location.lng, location.lat, zoom);
        let (ax, ay) = (anchor.x as i64, anchor.y as i64);
        let tile = TILE_SIZE as f64;

        let (origin, central) = match size {
            1 => ((ax, ay), anchor.to_bbox()),
            2 => {
                // 以位置所在象限共享的瓦片角为网格中心
                let (px, py) = lonlat_to_pixel(location.lng, location.lat, zoom);
                let right = px - ax as f64 * tile >= tile / 2.0;
                let lower = py - ay as f64 * tile >= tile / 2.0;
                let x0 = if right { ax } else { ax - 1 };
                let y0 = if lower { ay } else { ay - 1 };
                let cx = (x0 + 1) as f64 * tile;
                let cy = (y0 + 1) as f64 * tile;
                ((x0, y0), pixel_box(cx, cy, CENTRAL_HALF_WIDTH_2X2, zoom))
            }
            3 => {
                let cx = ax as f64 * tile + tile / 2.0;
                let cy = ay as f64 * tile + tile / 2.0;
                ((ax - 1, ay - 1), pixel_box(cx, cy, CENTRAL_HALF_WIDTH_3X3, zoom))
            }
            _ => return None,
        };

        let mut tiles = Vec::with_capacity((size * size) as usize);
        for dy in 0..size as i64 {
            for dx in 0..size as i64 {
                tiles.push(anchor.offset(origin.0 - ax + dx, origin.1 - ay + dy));
            }
        }

        let (west, north) = pixel_to_lonlat(origin.0 as f64 * tile, origin.1 as f64 * tile, zoom);
        let (east, south) = pixel_to_lonlat(
            (origin.0 + size as i64) as f64 * tile,
            (origin.1 + size as i64) as f64 * tile,
            zoom,
        );

        Some(Self {
            tiles,
            central,
            total: BoundingBox::new(west, south, east, north),
            zoom,
            origin,
            size,
        })
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// 网格内部的瓦片分界经度，取回绕后瓦片的西边界 (落在 [-180, 180) 内)
    pub fn internal_longitudes(&self) -> Vec<f64> {
        let n = tiles_per_axis(self.zoom) as i64;
        (1..self.size as i64)
            .map(|i| {
                let column = (self.origin.0 + i).rem_euclid(n);
                pixel_to_lonlat(column as f64 * TILE_SIZE as f64, 0.0, self.zoom).0
            })
            .collect()
    }

    /// 网格内部的瓦片分界纬度
    pub fn internal_latitudes(&self) -> Vec<f64> {
        (1..self.size as i64)
            .map(|i| pixel_to_lonlat(0.0, (self.origin.1 + i) as f64 * TILE_SIZE as f64, self.zoom).1)
            .collect()
    }

    /// 点是否恰好落在某条内部分界线上
    ///
    /// 反子午线西侧瓦片的东边界是 180，东侧瓦片的西边界是 -180，两者视为同一条线。
    pub fn on_internal_boundary(&self, location: LngLat) -> bool {
        let lng = if location.lng >= 180.0 {
            location.lng - 360.0
        } else {
            location.lng
        };
        self.internal_longitudes().contains(&lng) || self.internal_latitudes().contains(&location.lat)
    }

    /// 调试用 GeoJSON：中心盒 + 每个瓦片轮廓
    pub fn to_geojson(&self) -> Value {
        let mut features = vec![outline(&self.central, "central")];
        for tile in &self.tiles {
            features.push(outline(&tile.to_bbox(), &tile.to_string()));
        }
        json!({
            "type": "FeatureCollection",
            "features": features,
        })
    }
}

fn pixel_box(cx: f64, cy: f64, half_width: f64, zoom: u8) -> BoundingBox {
    let (west, south) = pixel_to_lonlat(cx - half_width, cy + half_width, zoom);
    let (east, north) = pixel_to_lonlat(cx + half_width, cy - half_width, zoom);
    BoundingBox::new(west, south, east, north)
}

fn outline(bbox: &BoundingBox, name: &str) -> Value {
    let ring: Vec<[f64; 2]> = bbox.ring().iter().map(|p| [p.lng, p.lat]).collect();
    json!({
        "type": "Feature",
        "properties": { "name": name },
        "geometry": { "type": "Polygon", "coordinates": [ring] },
    })
}
