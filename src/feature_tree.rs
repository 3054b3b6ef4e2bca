//! 要素空间索引 (R-Tree)
//!
//! 架构设计：
//! - 点要素按点入树，线要素按线段逐段入树，面要素按每个多边形的包围盒入树
//! - 查询先用包围方框粗筛，再用 Ruler 精确计算距离
//! - 同一要素可能命中多个条目，结果按要素去重并取最小距离
//! - 距离相同的结果按构建时的输入顺序排列，保证确定性
//!
//! 构建后不可变，新一代网格整体替换。

use rstar::{RTree, RTreeObject, AABB};
use std::collections::BTreeMap;

use crate::feature::{FeatureRef, Geometry};
use crate::ruler::Ruler;
use crate::types::{BoundingBox, LngLat};

/// 粗筛用的平均地球半径 (米)
const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// 粗筛方框的放大系数，覆盖椭球与球面半径的差异
const SEARCH_MARGIN: f64 = 1.1;

#[derive(Debug, Clone, Copy)]
enum Shape {
    Point(LngLat),
    Segment(LngLat, LngLat),
    /// 多边形的包围盒，精确判定回到要素几何
    Area(BoundingBox),
}

/// R-Tree 条目 (只存要素下标与形状)
#[derive(Debug, Clone, Copy)]
struct TreeEntry {
    index: usize,
    shape: Shape,
}

impl RTreeObject for TreeEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        match self.shape {
            Shape::Point(p) => AABB::from_point([p.lng, p.lat]),
            Shape::Segment(a, b) => AABB::from_corners([a.lng, a.lat], [b.lng, b.lat]),
            Shape::Area(bbox) => AABB::from_corners([bbox.west, bbox.south], [bbox.east, bbox.north]),
        }
    }
}

/// 一个类别的空间索引
#[derive(Debug, Default)]
pub struct FeatureTree {
    features: Vec<FeatureRef>,
    tree: RTree<TreeEntry>,
}

impl FeatureTree {
    /// 构建索引，空输入得到合法的空索引
    pub fn build(features: Vec<FeatureRef>) -> Self {
        let mut entries = Vec::new();
        for (index, feature) in features.iter().enumerate() {
            collect_entries(index, &feature.geometry, &mut entries);
        }
        Self {
            features,
            tree: RTree::bulk_load(entries),
        }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// 全部要素 (构建顺序)
    pub fn all(&self) -> &[FeatureRef] {
        &self.features
    }

    /// `max_distance` 内最近的要素
    pub fn nearest(&self, point: LngLat, ruler: &dyn Ruler, max_distance: f64) -> Option<FeatureRef> {
        self.distances_to(point, max_distance, ruler)
            .into_iter()
            .min_by(|(ia, da), (ib, db)| da.total_cmp(db).then(ia.cmp(ib)))
            .map(|(index, _)| self.features[index].clone())
    }

    /// `max_distance` 内最近的 `k` 个要素，由近到远
    pub fn k_nearest(
        &self,
        point: LngLat,
        max_distance: f64,
        k: usize,
        ruler: &dyn Ruler,
    ) -> Vec<FeatureRef> {
        self.sorted_by_distance(point, max_distance, ruler)
            .into_iter()
            .take(k)
            .map(|(feature, _)| feature)
            .collect()
    }

    /// 按距离排序的结果 (附带距离)
    pub fn sorted_by_distance(
        &self,
        point: LngLat,
        max_distance: f64,
        ruler: &dyn Ruler,
    ) -> Vec<(FeatureRef, f64)> {
        let mut hits: Vec<(usize, f64)> = self.distances_to(point, max_distance, ruler).into_iter().collect();
        // BTreeMap 已按下标排序，稳定排序保留输入顺序作为平局规则
        hits.sort_by(|a, b| a.1.total_cmp(&b.1));
        hits.into_iter()
            .map(|(index, d)| (self.features[index].clone(), d))
            .collect()
    }

    /// `max_distance` 内的全部要素 (无序，实际按构建顺序返回)
    pub fn within(&self, point: LngLat, max_distance: f64, ruler: &dyn Ruler) -> Vec<FeatureRef> {
        self.distances_to(point, max_distance, ruler)
            .into_keys()
            .map(|index| self.features[index].clone())
            .collect()
    }

    /// 距折线任一线段 `max_distance` 以内的要素
    pub fn near_line(&self, line: &[LngLat], max_distance: f64, ruler: &dyn Ruler) -> Vec<FeatureRef> {
        let Some(bbox) = BoundingBox::of_points(line) else {
            return Vec::new();
        };
        let (dlng, dlat) = search_offsets(bbox.north.abs().max(bbox.south.abs()), max_distance);
        let envelopes = search_envelopes(
            [bbox.west - dlng, bbox.south - dlat],
            [bbox.east + dlng, bbox.north + dlat],
        );

        let mut hits = BTreeMap::new();
        let candidates = envelopes
            .iter()
            .flat_map(|envelope| self.tree.locate_in_envelope_intersecting(envelope));
        for entry in candidates {
            if hits.contains_key(&entry.index) {
                continue;
            }
            let d = self.entry_distance_to_line(entry, line, ruler);
            if d <= max_distance {
                hits.insert(entry.index, d);
            }
        }
        hits.into_keys().map(|index| self.features[index].clone()).collect()
    }

    /// 包含该点的面要素
    pub fn containing_polygons(&self, point: LngLat) -> Vec<FeatureRef> {
        let envelope = AABB::from_point([point.lng, point.lat]);
        let mut indices: Vec<usize> = self
            .tree
            .locate_in_envelope_intersecting(&envelope)
            .filter(|entry| matches!(entry.shape, Shape::Area(_)))
            .map(|entry| entry.index)
            .collect();
        indices.sort_unstable();
        indices.dedup();
        indices
            .into_iter()
            .filter(|&index| self.features[index].geometry.contains(point))
            .map(|index| self.features[index].clone())
            .collect()
    }

    /// 粗筛 + 精算，返回 要素下标 → 最小距离
    fn distances_to(&self, point: LngLat, max_distance: f64, ruler: &dyn Ruler) -> BTreeMap<usize, f64> {
        let mut hits: BTreeMap<usize, f64> = BTreeMap::new();
        let mut consider = |entry: &TreeEntry| {
            let d = self.entry_distance(entry, point, ruler);
            if d <= max_distance {
                hits.entry(entry.index)
                    .and_modify(|best| *best = best.min(d))
                    .or_insert(d);
            }
        };

        if max_distance.is_finite() {
            let (dlng, dlat) = search_offsets(point.lat, max_distance);
            let envelopes = search_envelopes(
                [point.lng - dlng, point.lat - dlat],
                [point.lng + dlng, point.lat + dlat],
            );
            for envelope in &envelopes {
                self.tree.locate_in_envelope_intersecting(envelope).for_each(&mut consider);
            }
        } else {
            self.tree.iter().for_each(&mut consider);
        }
        hits
    }

    fn entry_distance(&self, entry: &TreeEntry, point: LngLat, ruler: &dyn Ruler) -> f64 {
        match entry.shape {
            Shape::Point(p) => ruler.distance(point, p),
            Shape::Segment(a, b) => ruler.point_to_segment_distance(point, a, b),
            Shape::Area(_) => self.features[entry.index].geometry.distance_to(point, ruler),
        }
    }

    fn entry_distance_to_line(&self, entry: &TreeEntry, line: &[LngLat], ruler: &dyn Ruler) -> f64 {
        let segments: Vec<(LngLat, LngLat)> = if line.len() == 1 {
            vec![(line[0], line[0])]
        } else {
            line.windows(2).map(|s| (s[0], s[1])).collect()
        };

        match entry.shape {
            Shape::Point(p) => segments
                .iter()
                .map(|&(a, b)| ruler.point_to_segment_distance(p, a, b))
                .fold(f64::INFINITY, f64::min),
            Shape::Segment(c, d) => segments
                .iter()
                .map(|&(a, b)| segment_distance(a, b, c, d, ruler))
                .fold(f64::INFINITY, f64::min),
            Shape::Area(_) => {
                let geometry = &self.features[entry.index].geometry;
                if line.iter().any(|p| geometry.contains(*p)) {
                    return 0.0;
                }
                let mut best = f64::INFINITY;
                for ring in geometry.lines() {
                    for edge in ring.windows(2) {
                        for &(a, b) in &segments {
                            best = best.min(segment_distance(a, b, edge[0], edge[1], ruler));
                        }
                    }
                }
                best
            }
        }
    }
}

/// 粗筛方框；越过 ±180 时补上平移 360° 后的另一侧
fn search_envelopes(lower: [f64; 2], upper: [f64; 2]) -> Vec<AABB<[f64; 2]>> {
    let mut envelopes = vec![AABB::from_corners(lower, upper)];
    if lower[0] < -180.0 {
        envelopes.push(AABB::from_corners([lower[0] + 360.0, lower[1]], [upper[0] + 360.0, upper[1]]));
    }
    if upper[0] > 180.0 {
        envelopes.push(AABB::from_corners([lower[0] - 360.0, lower[1]], [upper[0] - 360.0, upper[1]]));
    }
    envelopes
}

fn collect_entries(index: usize, geometry: &Geometry, entries: &mut Vec<TreeEntry>) {
    match geometry {
        Geometry::Point(p) => entries.push(TreeEntry {
            index,
            shape: Shape::Point(*p),
        }),
        Geometry::MultiPoint(points) => {
            entries.extend(points.iter().map(|p| TreeEntry {
                index,
                shape: Shape::Point(*p),
            }));
        }
        Geometry::LineString(line) => push_line(index, line, entries),
        Geometry::MultiLineString(lines) => {
            for line in lines {
                push_line(index, line, entries);
            }
        }
        Geometry::Polygon(rings) => push_area(index, rings, entries),
        Geometry::MultiPolygon(polygons) => {
            for rings in polygons {
                push_area(index, rings, entries);
            }
        }
    }
}

fn push_line(index: usize, line: &[LngLat], entries: &mut Vec<TreeEntry>) {
    if let [only] = line {
        entries.push(TreeEntry {
            index,
            shape: Shape::Point(*only),
        });
        return;
    }
    entries.extend(line.windows(2).map(|s| TreeEntry {
        index,
        shape: Shape::Segment(s[0], s[1]),
    }));
}

fn push_area(index: usize, rings: &[Vec<LngLat>], entries: &mut Vec<TreeEntry>) {
    if let Some(bbox) = rings.first().and_then(|outer| BoundingBox::of_points(outer)) {
        entries.push(TreeEntry {
            index,
            shape: Shape::Area(bbox),
        });
    }
}

/// 距离 (米) 对应的经/纬度粗筛半径
fn search_offsets(lat: f64, distance: f64) -> (f64, f64) {
    let dlat = distance / EARTH_RADIUS_M * (180.0 / std::f64::consts::PI) * SEARCH_MARGIN;
    let cos_lat = lat.to_radians().cos().max(1e-6);
    (dlat / cos_lat, dlat)
}

/// 两线段的最短距离，相交时为 0
fn segment_distance(a: LngLat, b: LngLat, c: LngLat, d: LngLat, ruler: &dyn Ruler) -> f64 {
    if segments_intersect(a, b, c, d) {
        return 0.0;
    }
    ruler
        .point_to_segment_distance(a, c, d)
        .min(ruler.point_to_segment_distance(b, c, d))
        .min(ruler.point_to_segment_distance(c, a, b))
        .min(ruler.point_to_segment_distance(d, a, b))
}

fn segments_intersect(a: LngLat, b: LngLat, c: LngLat, d: LngLat) -> bool {
    fn orient(p: LngLat, q: LngLat, r: LngLat) -> f64 {
        (q.lng - p.lng) * (r.lat - p.lat) - (q.lat - p.lat) * (r.lng - p.lng)
    }
    let d1 = orient(c, d, a);
    let d2 = orient(c, d, b);
    let d3 = orient(a, b, c);
    let d4 = orient(a, b, d);
    ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::Feature;
    use crate::ruler::CheapRuler;
    use std::sync::Arc;

    const ORIGIN: LngLat = LngLat::new(-4.25, 55.86);

    fn ruler() -> CheapRuler {
        CheapRuler::new(ORIGIN.lat)
    }

    fn point_at(east: f64, north: f64, name: &str) -> FeatureRef {
        let p = ruler().offset(ORIGIN, east, north);
        Arc::new(Feature::new(Geometry::Point(p)).with_tag("name", name))
    }

    fn line_at(from: (f64, f64), to: (f64, f64), name: &str) -> FeatureRef {
        let r = ruler();
        let a = r.offset(ORIGIN, from.0, from.1);
        let b = r.offset(ORIGIN, to.0, to.1);
        Arc::new(Feature::new(Geometry::LineString(vec![a, b])).with_tag("name", name))
    }

    fn square_at(west: f64, south: f64, size: f64, name: &str) -> FeatureRef {
        let r = ruler();
        let ring = vec![
            r.offset(ORIGIN, west, south),
            r.offset(ORIGIN, west + size, south),
            r.offset(ORIGIN, west + size, south + size),
            r.offset(ORIGIN, west, south + size),
            r.offset(ORIGIN, west, south),
        ];
        Arc::new(Feature::new(Geometry::Polygon(vec![ring])).with_tag("name", name))
    }

    fn names(features: &[FeatureRef]) -> Vec<&str> {
        features.iter().map(|f| f.name().unwrap_or("")).collect()
    }

    #[test]
    fn test_empty_tree() {
        let tree = FeatureTree::build(Vec::new());
        assert!(tree.is_empty());
        assert!(tree.nearest(ORIGIN, &ruler(), f64::INFINITY).is_none());
        assert!(tree.within(ORIGIN, 100.0, &ruler()).is_empty());
        assert!(tree.containing_polygons(ORIGIN).is_empty());
    }

    #[test]
    fn test_nearest_respects_max_distance() {
        let tree = FeatureTree::build(vec![point_at(50.0, 0.0, "far"), point_at(10.0, 0.0, "near")]);
        let r = ruler();
        assert_eq!(tree.nearest(ORIGIN, &r, 100.0).unwrap().name(), Some("near"));
        assert!(tree.nearest(ORIGIN, &r, 5.0).is_none());
        assert_eq!(tree.nearest(ORIGIN, &r, f64::INFINITY).unwrap().name(), Some("near"));
    }

    #[test]
    fn test_nearest_tie_uses_input_order() {
        let tree = FeatureTree::build(vec![
            point_at(0.0, 20.0, "first"),
            point_at(0.0, 20.0, "second"),
        ]);
        assert_eq!(tree.nearest(ORIGIN, &ruler(), 100.0).unwrap().name(), Some("first"));
        let result = tree.k_nearest(ORIGIN, 100.0, 2, &ruler());
        assert_eq!(names(&result), vec!["first", "second"]);
    }

    #[test]
    fn test_k_nearest_is_sorted_and_deduplicated() {
        // 折线有两段都靠近原点，只能返回一次
        let r = ruler();
        let bent = Arc::new(
            Feature::new(Geometry::LineString(vec![
                r.offset(ORIGIN, -30.0, 15.0),
                r.offset(ORIGIN, 0.0, 15.0),
                r.offset(ORIGIN, 30.0, 15.0),
            ]))
            .with_tag("name", "bent"),
        );
        let tree = FeatureTree::build(vec![
            point_at(40.0, 0.0, "c"),
            bent,
            point_at(5.0, 0.0, "a"),
            point_at(500.0, 0.0, "out"),
        ]);
        let result = tree.k_nearest(ORIGIN, 100.0, 10, &r);
        assert_eq!(names(&result), vec!["a", "bent", "c"]);
        let result = tree.k_nearest(ORIGIN, 100.0, 2, &r);
        assert_eq!(names(&result), vec!["a", "bent"]);
    }

    #[test]
    fn test_within_uses_segment_distance() {
        // 线段两端都在 100 米外，但中段只距 10 米
        let tree = FeatureTree::build(vec![
            line_at((-200.0, 10.0), (200.0, 10.0), "road"),
            point_at(0.0, 80.0, "poi"),
        ]);
        let result = tree.within(ORIGIN, 20.0, &ruler());
        assert_eq!(names(&result), vec!["road"]);
        let result = tree.within(ORIGIN, 100.0, &ruler());
        assert_eq!(names(&result), vec!["road", "poi"]);
    }

    #[test]
    fn test_near_line() {
        let r = ruler();
        let tree = FeatureTree::build(vec![
            point_at(50.0, 8.0, "house 1"),
            point_at(50.0, 40.0, "house 2"),
            line_at((20.0, -20.0), (20.0, 20.0), "crossing road"),
            square_at(80.0, 3.0, 10.0, "shop"),
        ]);
        let street = [r.offset(ORIGIN, 0.0, 0.0), r.offset(ORIGIN, 100.0, 0.0)];
        let result = tree.near_line(&street, 10.0, &r);
        assert_eq!(names(&result), vec!["house 1", "crossing road", "shop"]);
    }

    #[test]
    fn test_containing_polygons() {
        let r = ruler();
        let tree = FeatureTree::build(vec![
            square_at(-50.0, -50.0, 100.0, "park"),
            square_at(-10.0, -10.0, 20.0, "pond"),
            square_at(200.0, 200.0, 10.0, "elsewhere"),
            point_at(0.0, 0.0, "bench"),
        ]);
        assert_eq!(names(&tree.containing_polygons(ORIGIN)), vec!["park", "pond"]);
        let outside_pond = r.offset(ORIGIN, 30.0, 30.0);
        assert_eq!(names(&tree.containing_polygons(outside_pond)), vec!["park"]);
        // 面内的点距离为 0
        assert_eq!(tree.nearest(outside_pond, &r, 1.0).unwrap().name(), Some("park"));
    }

    #[test]
    fn test_queries_across_antimeridian() {
        let r = CheapRuler::new(57.0);
        let west = LngLat::new(179.9999, 57.0);
        let east = LngLat::new(-179.9999, 57.0);
        let tree = FeatureTree::build(vec![
            Arc::new(Feature::new(Geometry::Point(west)).with_tag("name", "west")),
            Arc::new(Feature::new(Geometry::Point(east)).with_tag("name", "east")),
            Arc::new(Feature::new(Geometry::Point(LngLat::new(179.99, 57.0))).with_tag("name", "far")),
        ]);

        let near_west = LngLat::new(179.99995, 57.0);
        assert!(r.distance(west, east) < 20.0);
        assert_eq!(names(&tree.k_nearest(near_west, 20.0, 5, &r)), vec!["west", "east"]);
        assert_eq!(names(&tree.within(LngLat::new(-179.99995, 57.0), 20.0, &r)), vec!["west", "east"]);

        let line = [LngLat::new(179.9995, 57.0), LngLat::new(179.99995, 57.0)];
        assert_eq!(names(&tree.near_line(&line, 10.0, &r)), vec!["west", "east"]);
    }
}
