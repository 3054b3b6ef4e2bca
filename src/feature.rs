//! 要素模型
//!
//! `Feature` 构造后不可变，以 `Arc<Feature>` 在瓦片、合并集合与空间索引之间共享。
//! 去重身份是上游数字 ID 集合 (与顺序无关)，而不是对象身份。

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::road_graph::{IntersectionId, WayId};
use crate::ruler::Ruler;
use crate::types::{BoundingBox, LngLat};

pub type FeatureRef = Arc<Feature>;

/// 几何类型
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum Geometry {
    Point(LngLat),
    MultiPoint(Vec<LngLat>),
    LineString(Vec<LngLat>),
    MultiLineString(Vec<Vec<LngLat>>),
    /// 第一个环为外环，其余为洞
    Polygon(Vec<Vec<LngLat>>),
    MultiPolygon(Vec<Vec<Vec<LngLat>>>),
}

impl Geometry {
    /// 所有折线 (线要素本身，或面要素的各个环)
    pub fn lines(&self) -> Vec<&[LngLat]> {
        match self {
            Geometry::Point(_) | Geometry::MultiPoint(_) => Vec::new(),
            Geometry::LineString(line) => vec![line.as_slice()],
            Geometry::MultiLineString(lines) | Geometry::Polygon(lines) => {
                lines.iter().map(|l| l.as_slice()).collect()
            }
            Geometry::MultiPolygon(polygons) => polygons
                .iter()
                .flat_map(|rings| rings.iter().map(|r| r.as_slice()))
                .collect(),
        }
    }

    /// 离散点 (点要素)
    pub fn points(&self) -> &[LngLat] {
        match self {
            Geometry::Point(p) => std::slice::from_ref(p),
            Geometry::MultiPoint(points) => points,
            _ => &[],
        }
    }

    pub fn is_polygonal(&self) -> bool {
        matches!(self, Geometry::Polygon(_) | Geometry::MultiPolygon(_))
    }

    pub fn bbox(&self) -> Option<BoundingBox> {
        match self {
            Geometry::Point(_) | Geometry::MultiPoint(_) => BoundingBox::of_points(self.points()),
            _ => BoundingBox::of_points(self.lines().into_iter().flatten()),
        }
    }

    /// 面要素是否包含点 (射线法，洞内的点不算包含)
    pub fn contains(&self, p: LngLat) -> bool {
        match self {
            Geometry::Polygon(rings) => polygon_contains(rings, p),
            Geometry::MultiPolygon(polygons) => {
                polygons.iter().any(|rings| polygon_contains(rings, p))
            }
            _ => false,
        }
    }

    /// 点到几何体的距离 (米)，面内部的点距离为 0
    pub fn distance_to(&self, p: LngLat, ruler: &dyn Ruler) -> f64 {
        if self.is_polygonal() && self.contains(p) {
            return 0.0;
        }
        match self {
            Geometry::Point(q) => ruler.distance(p, *q),
            Geometry::MultiPoint(points) => points
                .iter()
                .map(|q| ruler.distance(p, *q))
                .fold(f64::INFINITY, f64::min),
            _ => self
                .lines()
                .into_iter()
                .map(|line| line_distance_to(line, p, ruler))
                .fold(f64::INFINITY, f64::min),
        }
    }
}

fn line_distance_to(line: &[LngLat], p: LngLat, ruler: &dyn Ruler) -> f64 {
    match line {
        [] => f64::INFINITY,
        [only] => ruler.distance(p, *only),
        _ => line
            .windows(2)
            .map(|s| ruler.point_to_segment_distance(p, s[0], s[1]))
            .fold(f64::INFINITY, f64::min),
    }
}

fn polygon_contains(rings: &[Vec<LngLat>], p: LngLat) -> bool {
    let Some((outer, holes)) = rings.split_first() else {
        return false;
    };
    ring_contains(outer, p) && !holes.iter().any(|hole| ring_contains(hole, p))
}

/// 射线法判断点是否在环内
pub fn ring_contains(ring: &[LngLat], p: LngLat) -> bool {
    if ring.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = ring.len() - 1;
    for i in 0..ring.len() {
        let (a, b) = (ring[i], ring[j]);
        if (a.lat > p.lat) != (b.lat > p.lat)
            && p.lng < (b.lng - a.lng) * (p.lat - a.lat) / (b.lat - a.lat) + a.lng
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// 要素与路网节点的关联
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GraphRef {
    Way(WayId),
    Intersection(IntersectionId),
}

/// 地图要素
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub geometry: Geometry,
    /// 语义标签 (name / class / subclass / feature_type ...)
    #[serde(default)]
    pub tags: Vec<(String, String)>,
    /// 原始 OSM 标签
    #[serde(default)]
    pub foreign: Vec<(String, String)>,
    /// 上游数字 ID 列表
    #[serde(default)]
    pub osm_ids: Vec<i64>,
    #[serde(skip)]
    pub graph: Option<GraphRef>,
}

impl Feature {
    pub fn new(geometry: Geometry) -> Self {
        Self {
            geometry,
            tags: Vec::new(),
            foreign: Vec::new(),
            osm_ids: Vec::new(),
            graph: None,
        }
    }

    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.tags.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_foreign(mut self, key: &str, value: &str) -> Self {
        self.foreign.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_ids(mut self, ids: &[i64]) -> Self {
        self.osm_ids = ids.to_vec();
        self
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        lookup(&self.tags, key)
    }

    pub fn foreign_tag(&self, key: &str) -> Option<&str> {
        lookup(&self.foreign, key)
    }

    pub fn name(&self) -> Option<&str> {
        self.tag("name")
    }

    /// 去重键：排序去重后的 ID 集合；没有 ID 的要素不参与去重
    pub fn dedup_key(&self) -> Option<Vec<i64>> {
        if self.osm_ids.is_empty() {
            return None;
        }
        let mut ids = self.osm_ids.clone();
        ids.sort_unstable();
        ids.dedup();
        Some(ids)
    }
}

fn lookup<'a>(tags: &'a [(String, String)], key: &str) -> Option<&'a str> {
    tags.iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}
