//! 路网图 (Way ↔ Intersection)
//!
//! 架构设计：
//! - Way 与 Intersection 存放在 DashMap 竞技场中，互相只保存 ID
//! - Way 的两个端点槽位 (START/END) 与 Intersection 的成员列表必须双向一致
//! - 删除即清空槽位：先从路口成员列表移除，再清空 Way 自身的端点
//! - JOINER 只用于缝合瓦片边界，随网格代际整体丢弃
//!
//! 所有修改都在单写者上下文中执行；读写同一张表时不得跨调用持有 guard。

use dashmap::mapref::one::Ref;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::ruler::Ruler;
use crate::types::LngLat;

/// Way ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct WayId(pub u64);

/// Intersection ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct IntersectionId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WayType {
    Road,
    Path,
    /// 跨瓦片缝合边
    Joiner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WayEnd {
    Start = 0,
    End = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntersectionType {
    Regular,
    /// 道路被瓦片边界截断处
    TileEdge,
}

/// 路段
#[derive(Debug, Clone)]
pub struct Way {
    pub id: WayId,
    pub way_type: WayType,
    pub geometry: Vec<LngLat>,
    pub length: f64,
    pub name: Option<String>,
    pub tags: Vec<(String, String)>,
    /// 两端的路口 [START, END]
    pub intersections: [Option<IntersectionId>; 2],
    /// 遍历推导出的名称标签 (destination:forward, dead-end:backward, passes:forward ...)
    pub confected: BTreeMap<String, String>,
}

impl Way {
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn end(&self, end: WayEnd) -> Option<IntersectionId> {
        self.intersections[end as usize]
    }

    /// 另一端的路口；`from` 不是本路段端点时返回 None
    pub fn other_intersection(&self, from: IntersectionId) -> Option<IntersectionId> {
        if self.end(WayEnd::Start) == Some(from) {
            self.end(WayEnd::End)
        } else if self.end(WayEnd::End) == Some(from) {
            self.end(WayEnd::Start)
        } else {
            None
        }
    }

    pub fn contains_intersection(&self, id: IntersectionId) -> bool {
        self.intersections.contains(&Some(id))
    }

    pub fn is_sidewalk_or_crossing(&self) -> bool {
        matches!(self.tag("footway"), Some("sidewalk") | Some("crossing"))
    }

    /// 起止于同一路口
    pub fn is_looped_back(&self) -> bool {
        self.intersections[0].is_some() && self.intersections[0] == self.intersections[1]
    }

    pub fn destination(&self, forwards: bool) -> Option<&str> {
        self.confected_tag("destination", forwards)
    }

    pub fn dead_end(&self, forwards: bool) -> Option<&str> {
        self.confected_tag("dead-end", forwards)
    }

    pub fn passes(&self, forwards: bool) -> Option<&str> {
        self.confected_tag("passes", forwards)
    }

    fn confected_tag(&self, prefix: &str, forwards: bool) -> Option<&str> {
        let key = format!("{}:{}", prefix, if forwards { "forward" } else { "backward" });
        self.confected.get(&key).map(String::as_str)
    }
}

/// 路口
#[derive(Debug, Clone)]
pub struct Intersection {
    pub id: IntersectionId,
    pub location: LngLat,
    pub intersection_type: IntersectionType,
    pub name: String,
    pub members: Vec<WayId>,
}

/// 路网竞技场
pub struct RoadGraph {
    ways: DashMap<WayId, Way>,
    intersections: DashMap<IntersectionId, Intersection>,
    next_id: AtomicU64,
}

impl Default for RoadGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl RoadGraph {
    pub fn new() -> Self {
        Self {
            ways: DashMap::new(),
            intersections: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    fn generate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    // ========================================================================
    // 创建与访问
    // ========================================================================

    pub fn add_way(
        &self,
        way_type: WayType,
        geometry: Vec<LngLat>,
        name: Option<String>,
        tags: Vec<(String, String)>,
        ruler: &dyn Ruler,
    ) -> WayId {
        let id = WayId(self.generate_id());
        let length = ruler.line_distance(&geometry);
        self.ways.insert(
            id,
            Way {
                id,
                way_type,
                geometry,
                length,
                name,
                tags,
                intersections: [None, None],
                confected: BTreeMap::new(),
            },
        );
        id
    }

    pub fn add_intersection(&self, location: LngLat, intersection_type: IntersectionType) -> IntersectionId {
        let id = IntersectionId(self.generate_id());
        self.intersections.insert(
            id,
            Intersection {
                id,
                location,
                intersection_type,
                name: String::new(),
                members: Vec::new(),
            },
        );
        id
    }

    pub fn way(&self, id: WayId) -> Option<Ref<'_, WayId, Way>> {
        self.ways.get(&id)
    }

    pub fn intersection(&self, id: IntersectionId) -> Option<Ref<'_, IntersectionId, Intersection>> {
        self.intersections.get(&id)
    }

    /// 路口成员 (路口不存在时为空)
    pub fn members(&self, id: IntersectionId) -> Vec<WayId> {
        self.intersections
            .get(&id)
            .map(|i| i.members.clone())
            .unwrap_or_default()
    }

    pub fn way_count(&self) -> usize {
        self.ways.len()
    }

    pub fn intersection_count(&self) -> usize {
        self.intersections.len()
    }

    pub fn joiner_count(&self) -> usize {
        self.ways.iter().filter(|w| w.way_type == WayType::Joiner).count()
    }

    /// 另一端的路口
    pub fn other_intersection(&self, way: WayId, from: IntersectionId) -> Option<IntersectionId> {
        self.ways.get(&way)?.other_intersection(from)
    }

    /// 任一端是瓦片边界路口
    pub fn ends_at_tile_edge(&self, way: WayId) -> bool {
        let Some(ends) = self.ways.get(&way).map(|w| w.intersections) else {
            return false;
        };
        ends.iter().flatten().any(|i| {
            self.intersections
                .get(i)
                .is_some_and(|i| i.intersection_type == IntersectionType::TileEdge)
        })
    }

    /// 路段离开路口时的方位角
    pub fn heading(&self, way: WayId, from: IntersectionId, ruler: &dyn Ruler) -> Option<f64> {
        let origin = self.intersections.get(&from)?.location;
        let way = self.ways.get(&way)?;
        if way.geometry.len() < 2 {
            return None;
        }
        let next = if way.end(WayEnd::Start) == Some(from) {
            way.geometry[1]
        } else if way.end(WayEnd::End) == Some(from) {
            way.geometry[way.geometry.len() - 2]
        } else {
            return None;
        };
        Some(ruler.bearing(origin, next))
    }

    // ========================================================================
    // 连接与拆除
    // ========================================================================

    /// 把路段的一端挂到路口上 (双向)
    pub fn link(&self, way: WayId, end: WayEnd, intersection: IntersectionId) -> bool {
        if !self.intersections.contains_key(&intersection) {
            return false;
        }
        let previous = {
            let Some(mut w) = self.ways.get_mut(&way) else {
                return false;
            };
            std::mem::replace(&mut w.intersections[end as usize], Some(intersection))
        };
        if let Some(previous) = previous {
            self.detach_member(previous, way);
        }
        if let Some(mut i) = self.intersections.get_mut(&intersection) {
            i.members.push(way);
        }
        true
    }

    /// 用 JOINER 缝合两个路口
    ///
    /// 两侧都必须少于 2 个成员且尚未共享成员，否则返回 None。
    pub fn join(&self, a: IntersectionId, b: IntersectionId, ruler: &dyn Ruler) -> Option<WayId> {
        if a == b {
            return None;
        }
        let (location_a, members_a) = {
            let i = self.intersections.get(&a)?;
            (i.location, i.members.clone())
        };
        let (location_b, members_b) = {
            let i = self.intersections.get(&b)?;
            (i.location, i.members.clone())
        };
        if members_a.len() >= 2 || members_b.len() >= 2 {
            return None;
        }
        if members_a.iter().any(|m| members_b.contains(m)) {
            return None;
        }

        let joiner = self.add_way(
            WayType::Joiner,
            vec![location_a, location_b],
            None,
            Vec::new(),
            ruler,
        );
        self.link(joiner, WayEnd::Start, a);
        self.link(joiner, WayEnd::End, b);
        Some(joiner)
    }

    /// 断开路段与两端路口的双向引用 (路段本身保留)
    pub fn unlink_way(&self, way: WayId) {
        let ends = {
            let Some(mut w) = self.ways.get_mut(&way) else {
                return;
            };
            std::mem::take(&mut w.intersections)
        };
        for intersection in ends.into_iter().flatten() {
            self.detach_member(intersection, way);
        }
    }

    /// 断开并移除路段
    pub fn remove_way(&self, way: WayId) -> Option<Way> {
        self.unlink_way(way);
        self.ways.remove(&way).map(|(_, w)| w)
    }

    /// 清空成员端点并移除路口
    pub fn remove_intersection(&self, id: IntersectionId) -> Option<Intersection> {
        let (_, intersection) = self.intersections.remove(&id)?;
        for member in &intersection.members {
            if let Some(mut w) = self.ways.get_mut(member) {
                for slot in w.intersections.iter_mut() {
                    if *slot == Some(id) {
                        *slot = None;
                    }
                }
            }
        }
        Some(Intersection {
            members: Vec::new(),
            ..intersection
        })
    }

    /// 移除一组 JOINER，返回实际移除的数量
    pub fn remove_joiners(&self, joiners: &[WayId]) -> usize {
        joiners
            .iter()
            .filter(|id| {
                let is_joiner = self
                    .ways
                    .get(id)
                    .is_some_and(|w| w.way_type == WayType::Joiner);
                is_joiner && self.remove_way(**id).is_some()
            })
            .count()
    }

    fn detach_member(&self, intersection: IntersectionId, way: WayId) {
        if let Some(mut i) = self.intersections.get_mut(&intersection) {
            i.members.retain(|m| *m != way);
        }
    }

    // ========================================================================
    // 遍历与命名
    // ========================================================================

    /// 沿只有两个成员的路口向前追踪路段链
    ///
    /// 返回 (是否正向, 路段) 序列，首项是 `start` 本身。遇到环、深度超限、
    /// 或 `early_stop` 对非 JOINER 路段返回 true 时停止 (该路段不计入)。
    pub fn follow_ways(
        &self,
        start: WayId,
        from: IntersectionId,
        depth_limit: usize,
        mut early_stop: Option<&mut dyn FnMut(&Way, Option<&Way>) -> bool>,
    ) -> Vec<(bool, WayId)> {
        let mut chain: Vec<(bool, WayId)> = Vec::new();
        let mut current = start;
        let mut from = from;
        let mut depth = 0;

        loop {
            if depth > depth_limit {
                break;
            }
            let next = {
                let Some(way) = self.ways.get(&current) else {
                    break;
                };
                if let Some(stop) = early_stop.as_mut() {
                    if way.way_type != WayType::Joiner {
                        let last = chain.last().and_then(|(_, id)| self.ways.get(id));
                        if stop(&*way, last.as_deref()) {
                            break;
                        }
                    }
                }
                if chain.iter().any(|(_, id)| *id == current) {
                    break;
                }
                let forwards = way.end(WayEnd::Start) == Some(from);
                chain.push((forwards, current));
                if forwards {
                    way.end(WayEnd::End)
                } else {
                    way.end(WayEnd::Start)
                }
            };

            let Some(next) = next else {
                break;
            };
            let members = self.members(next);
            if members.len() != 2 {
                break;
            }
            match members.into_iter().find(|m| *m != current) {
                Some(way) => {
                    current = way;
                    from = next;
                    depth += 1;
                }
                None => break,
            }
        }
        chain
    }

    /// 成员按长度排序，并以 "/" 连接不重复的成员名 (无名成员用 class)
    pub fn name_intersection(&self, id: IntersectionId) {
        let mut described: Vec<(WayId, f64, Option<String>)> = self
            .members(id)
            .into_iter()
            .filter_map(|m| {
                let w = self.ways.get(&m)?;
                let label = w.name.clone().or_else(|| w.tag("class").map(str::to_string));
                Some((m, w.length, label))
            })
            .collect();
        described.sort_by(|a, b| a.1.total_cmp(&b.1));

        let mut labels: Vec<String> = Vec::new();
        for (_, _, label) in &described {
            if let Some(label) = label {
                if !labels.contains(label) {
                    labels.push(label.clone());
                }
            }
        }

        if let Some(mut intersection) = self.intersections.get_mut(&id) {
            intersection.members = described.into_iter().map(|(m, _, _)| m).collect();
            intersection.name = labels.join("/");
        }
    }

    pub fn set_confected(&self, way: WayId, key: String, value: String) {
        if let Some(mut w) = self.ways.get_mut(&way) {
            w.confected.insert(key, value);
        }
    }

    pub fn clear_confected(&self, ways: &[WayId]) {
        for id in ways {
            if let Some(mut w) = self.ways.get_mut(id) {
                w.confected.clear();
            }
        }
    }

    // ========================================================================
    // 一致性检查
    // ========================================================================

    /// 双向引用不一致的描述列表，空表示一致
    pub fn integrity_violations(&self) -> Vec<String> {
        let mut violations = Vec::new();
        for way in self.ways.iter() {
            for (slot, end) in way.intersections.iter().enumerate() {
                let Some(end) = end else { continue };
                match self.intersections.get(end) {
                    None => violations.push(format!("way {:?} slot {} -> missing {:?}", way.id, slot, end)),
                    Some(i) if !i.members.contains(&way.id) => violations.push(format!(
                        "way {:?} slot {} -> {:?} which does not list it",
                        way.id, slot, end
                    )),
                    _ => {}
                }
            }
        }
        for intersection in self.intersections.iter() {
            for member in &intersection.members {
                match self.ways.get(member) {
                    None => violations.push(format!(
                        "intersection {:?} lists missing {:?}",
                        intersection.id, member
                    )),
                    Some(w) if !w.contains_intersection(intersection.id) => violations.push(format!(
                        "intersection {:?} lists {:?} which does not reference it",
                        intersection.id, member
                    )),
                    _ => {}
                }
            }
        }
        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ruler::CheapRuler;

    const ORIGIN: LngLat = LngLat::new(-4.25, 55.86);

    fn ruler() -> CheapRuler {
        CheapRuler::new(ORIGIN.lat)
    }

    fn at(east: f64, north: f64) -> LngLat {
        ruler().offset(ORIGIN, east, north)
    }

    /// 在两个路口之间建一条路
    fn road(graph: &RoadGraph, a: IntersectionId, b: IntersectionId, name: Option<&str>) -> WayId {
        let la = graph.intersection(a).unwrap().location;
        let lb = graph.intersection(b).unwrap().location;
        let way = graph.add_way(
            WayType::Road,
            vec![la, lb],
            name.map(str::to_string),
            vec![("class".into(), "service".into())],
            &ruler(),
        );
        graph.link(way, WayEnd::Start, a);
        graph.link(way, WayEnd::End, b);
        way
    }

    #[test]
    fn test_link_is_bidirectional() {
        let graph = RoadGraph::new();
        let a = graph.add_intersection(at(0.0, 0.0), IntersectionType::Regular);
        let b = graph.add_intersection(at(100.0, 0.0), IntersectionType::Regular);
        let way = road(&graph, a, b, Some("Main Street"));

        assert_eq!(graph.members(a), vec![way]);
        assert_eq!(graph.other_intersection(way, a), Some(b));
        assert_eq!(graph.other_intersection(way, b), Some(a));
        assert!((graph.way(way).unwrap().length - 100.0).abs() < 1e-6);
        assert!(graph.integrity_violations().is_empty());
    }

    #[test]
    fn test_other_intersection_for_non_member_is_none() {
        let graph = RoadGraph::new();
        let a = graph.add_intersection(at(0.0, 0.0), IntersectionType::Regular);
        let b = graph.add_intersection(at(100.0, 0.0), IntersectionType::Regular);
        let c = graph.add_intersection(at(200.0, 0.0), IntersectionType::Regular);
        let way = road(&graph, a, b, None);
        assert_eq!(graph.other_intersection(way, c), None);

        // 只有一端的路段
        let stub = graph.add_way(WayType::Path, vec![at(0.0, 0.0), at(0.0, 50.0)], None, Vec::new(), &ruler());
        graph.link(stub, WayEnd::Start, a);
        assert_eq!(graph.other_intersection(stub, a), None);
    }

    #[test]
    fn test_join_is_symmetric_and_refuses_duplicates() {
        let graph = RoadGraph::new();
        let a = graph.add_intersection(at(0.0, 0.0), IntersectionType::TileEdge);
        let b = graph.add_intersection(at(0.3, 0.0), IntersectionType::TileEdge);
        let left = graph.add_intersection(at(-50.0, 0.0), IntersectionType::Regular);
        let right = graph.add_intersection(at(50.0, 0.0), IntersectionType::Regular);
        road(&graph, left, a, Some("West Road"));
        road(&graph, b, right, Some("East Road"));

        let joiner = graph.join(a, b, &ruler()).unwrap();
        assert_eq!(graph.members(a).len(), 2);
        assert_eq!(graph.members(b).len(), 2);
        assert_eq!(graph.other_intersection(joiner, a), Some(b));
        assert_eq!(graph.other_intersection(joiner, b), Some(a));
        assert_eq!(graph.way(joiner).unwrap().way_type, WayType::Joiner);

        // 已连接的一对不会再连接
        assert!(graph.join(a, b, &ruler()).is_none());
        assert!(graph.join(a, a, &ruler()).is_none());
        assert_eq!(graph.joiner_count(), 1);
        assert!(graph.integrity_violations().is_empty());
    }

    #[test]
    fn test_remove_joiners_restores_graph() {
        let graph = RoadGraph::new();
        let a = graph.add_intersection(at(0.0, 0.0), IntersectionType::TileEdge);
        let b = graph.add_intersection(at(0.3, 0.0), IntersectionType::TileEdge);
        let joiner = graph.join(a, b, &ruler()).unwrap();

        assert_eq!(graph.remove_joiners(&[joiner]), 1);
        assert!(graph.members(a).is_empty());
        assert!(graph.members(b).is_empty());
        assert!(graph.way(joiner).is_none());
        assert_eq!(graph.remove_joiners(&[joiner]), 0);
        assert!(graph.integrity_violations().is_empty());
    }

    #[test]
    fn test_remove_intersection_clears_way_slots() {
        let graph = RoadGraph::new();
        let a = graph.add_intersection(at(0.0, 0.0), IntersectionType::Regular);
        let b = graph.add_intersection(at(100.0, 0.0), IntersectionType::Regular);
        let way = road(&graph, a, b, None);

        let removed = graph.remove_intersection(b).unwrap();
        assert!(removed.members.is_empty());
        assert_eq!(graph.way(way).unwrap().intersections, [Some(a), None]);
        assert!(graph.members(b).is_empty());
        assert!(graph.integrity_violations().is_empty());
    }

    #[test]
    fn test_follow_ways_chains_through_two_member_intersections() {
        let graph = RoadGraph::new();
        let i0 = graph.add_intersection(at(0.0, 0.0), IntersectionType::Regular);
        let i1 = graph.add_intersection(at(50.0, 0.0), IntersectionType::Regular);
        let i2 = graph.add_intersection(at(100.0, 0.0), IntersectionType::Regular);
        let i3 = graph.add_intersection(at(150.0, 0.0), IntersectionType::Regular);
        let w0 = road(&graph, i0, i1, None);
        // 反向存储的中间段
        let w1 = road(&graph, i2, i1, None);
        let w2 = road(&graph, i2, i3, Some("High Street"));

        let chain = graph.follow_ways(w0, i0, 15, None);
        assert_eq!(chain, vec![(true, w0), (false, w1), (true, w2)]);

        let mut stop_at_named = |way: &Way, _: Option<&Way>| way.name.is_some();
        let chain = graph.follow_ways(w0, i0, 15, Some(&mut stop_at_named));
        assert_eq!(chain, vec![(true, w0), (false, w1)]);

        let chain = graph.follow_ways(w0, i0, 0, None);
        assert_eq!(chain, vec![(true, w0)]);
    }

    #[test]
    fn test_follow_ways_stops_on_loop() {
        let graph = RoadGraph::new();
        let a = graph.add_intersection(at(0.0, 0.0), IntersectionType::Regular);
        let b = graph.add_intersection(at(50.0, 0.0), IntersectionType::Regular);
        let w0 = road(&graph, a, b, None);
        let w1 = road(&graph, b, a, None);
        let chain = graph.follow_ways(w0, a, 15, None);
        assert_eq!(chain, vec![(true, w0), (true, w1)]);
    }

    #[test]
    fn test_intersection_name_and_helpers() {
        let graph = RoadGraph::new();
        let centre = graph.add_intersection(at(0.0, 0.0), IntersectionType::Regular);
        let far = graph.add_intersection(at(200.0, 0.0), IntersectionType::Regular);
        let near = graph.add_intersection(at(0.0, 20.0), IntersectionType::TileEdge);
        let long = road(&graph, centre, far, Some("Moor Road"));
        let short = road(&graph, centre, near, None);

        graph.name_intersection(centre);
        let intersection = graph.intersection(centre).unwrap();
        assert_eq!(intersection.members, vec![short, long]);
        assert_eq!(intersection.name, "service/Moor Road");
        drop(intersection);

        assert!(graph.ends_at_tile_edge(short));
        assert!(!graph.ends_at_tile_edge(long));
        let heading = graph.heading(long, centre, &ruler()).unwrap();
        assert!((heading - 90.0).abs() < 1e-6);
        let heading = graph.heading(short, near, &ruler()).unwrap();
        assert!((heading.abs() - 180.0).abs() < 1e-6);
    }
}
