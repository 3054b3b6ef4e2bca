//! 公共类型定义
//!
//! 集中管理跨模块共享的坐标、包围盒与统计 DTO

use serde::{Deserialize, Serialize};

/// WGS84 坐标点 (经度, 纬度)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LngLat {
    pub lng: f64,
    pub lat: f64,
}

impl LngLat {
    pub const fn new(lng: f64, lat: f64) -> Self {
        Self { lng, lat }
    }

    /// 精确相等的哈希键 (瓦片内吸附后的坐标按位比较)
    #[inline]
    pub fn key(&self) -> LocationKey {
        LocationKey(self.lng.to_bits(), self.lat.to_bits())
    }
}

/// 路口表的键：坐标的位模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocationKey(u64, u64);

impl LocationKey {
    pub fn location(&self) -> LngLat {
        LngLat::new(f64::from_bits(self.0), f64::from_bits(self.1))
    }
}

/// 经纬度包围盒 (闭区间)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl BoundingBox {
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    /// 点是否落在盒内 (含边界)
    ///
    /// 跨越反子午线的盒子经度会超出 ±180，点的经度按 ±360 平移后再比较。
    pub fn contains(&self, point: LngLat) -> bool {
        is_between(self.south, self.north, point.lat)
            && [0.0, 360.0, -360.0]
                .iter()
                .any(|shift| is_between(self.west, self.east, point.lng + shift))
    }

    pub fn center(&self) -> LngLat {
        LngLat::new((self.west + self.east) / 2.0, (self.south + self.north) / 2.0)
    }

    /// 闭合的外环 (用于调试输出)
    pub fn ring(&self) -> Vec<LngLat> {
        vec![
            LngLat::new(self.west, self.north),
            LngLat::new(self.east, self.north),
            LngLat::new(self.east, self.south),
            LngLat::new(self.west, self.south),
            LngLat::new(self.west, self.north),
        ]
    }

    /// 计算一组坐标的包围盒
    pub fn of_points<'a>(points: impl IntoIterator<Item = &'a LngLat>) -> Option<Self> {
        let mut west = f64::MAX;
        let mut south = f64::MAX;
        let mut east = f64::MIN;
        let mut north = f64::MIN;
        let mut found = false;

        for p in points {
            west = west.min(p.lng);
            south = south.min(p.lat);
            east = east.max(p.lng);
            north = north.max(p.lat);
            found = true;
        }

        if found {
            Some(Self::new(west, south, east, north))
        } else {
            None
        }
    }
}

fn is_between(a: f64, b: f64, value: f64) -> bool {
    if a > b {
        value >= b && value <= a
    } else {
        value >= a && value <= b
    }
}

/// 网格统计信息
#[derive(Debug, Clone, Serialize)]
pub struct GridStats {
    pub generation: u64,
    pub tile_count: usize,
    pub cached_tiles: usize,
    pub way_count: usize,
    pub intersection_count: usize,
    pub joiner_count: usize,
    /// 每棵树的要素数量 (按 TreeId 顺序)
    pub tree_sizes: Vec<(String, usize)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_key_is_exact() {
        let a = LngLat::new(-4.25, 55.86);
        let b = LngLat::new(-4.25, 55.86 + 1e-12);
        assert_eq!(a.key(), LngLat::new(-4.25, 55.86).key());
        assert_ne!(a.key(), b.key());
        assert_eq!(a.key().location(), a);
    }

    #[test]
    fn test_bounding_box_contains_edges() {
        let bbox = BoundingBox::new(-1.0, -1.0, 1.0, 1.0);
        assert!(bbox.contains(LngLat::new(0.0, 0.0)));
        assert!(bbox.contains(LngLat::new(1.0, -1.0)));
        assert!(!bbox.contains(LngLat::new(1.0001, 0.0)));
    }

    #[test]
    fn test_of_points() {
        let pts = [LngLat::new(1.0, 2.0), LngLat::new(-1.0, 5.0)];
        let bbox = BoundingBox::of_points(pts.iter()).unwrap();
        assert_eq!(bbox, BoundingBox::new(-1.0, 2.0, 1.0, 5.0));
        assert!(BoundingBox::of_points([].iter()).is_none());
    }
}
