//! 无名路段的名称推导
//!
//! 从每个路口出发沿无名路段追踪，直到遇到有名路段：
//! - `destination:{forward|backward}`: 该方向通往的有名道路
//! - `passes:{forward|backward}`: 途经的台阶 / 桥 / 隧道
//! - `dead-end:{forward|backward}`: 该方向是断头路
//!
//! 方向以路段自身几何方向为准；从路口正向走出的路段，回到路口的方向是 backward。

use std::collections::HashMap;

use crate::road_graph::{IntersectionId, RoadGraph, Way, WayEnd, WayId};
use crate::types::LocationKey;

const DEAD_END: &str = "dead-end";

fn direction(forwards: bool) -> &'static str {
    if forwards {
        "backward"
    } else {
        "forward"
    }
}

fn set_destination_tag(graph: &RoadGraph, forwards: bool, id: WayId, value: &str, dead_end: bool, passes: &str) {
    if !value.is_empty() {
        let prefix = if dead_end { "dead-end" } else { "destination" };
        graph.set_confected(id, format!("{}:{}", prefix, direction(forwards)), value.to_string());
    }
    if !passes.is_empty() {
        graph.set_confected(id, format!("passes:{}", direction(forwards)), passes.to_string());
    }
}

/// 沿路口遍历并写入推导标签，返回实际处理的路口数
///
/// `accumulator` 按路口坐标记录已处理的路口，重复出现的路口跳过。
pub fn confect_names(
    graph: &RoadGraph,
    intersections: &[IntersectionId],
    accumulator: &mut HashMap<LocationKey, IntersectionId>,
    depth_limit: usize,
) -> usize {
    let mut processed = 0;
    for &id in intersections {
        let Some(key) = graph.intersection(id).map(|i| i.location.key()) else {
            continue;
        };
        if accumulator.contains_key(&key) {
            continue;
        }
        accumulator.insert(key, id);
        processed += 1;

        let members = graph.members(id);
        let named = members
            .iter()
            .find_map(|m| graph.way(*m).and_then(|w| w.name.clone()))
            .unwrap_or_default();

        for &member in &members {
            let skip = graph
                .way(member)
                .map_or(true, |w| w.name.is_some() || w.is_sidewalk_or_crossing());
            if skip {
                continue;
            }

            let mut passes = String::new();
            let mut stop_at_named = |way: &Way, _: Option<&Way>| {
                if way.tag("subclass") == Some("steps") {
                    passes = "steps".to_string();
                } else if let Some(brunnel) = way.tag("brunnel") {
                    passes = brunnel.to_string();
                }
                way.name.is_some()
            };
            let chain = graph.follow_ways(member, id, depth_limit, Some(&mut stop_at_named));
            for &(forwards, way) in &chain {
                set_destination_tag(graph, forwards, way, &named, false, &passes);
            }
        }

        for &member in &members {
            let chain = graph.follow_ways(member, id, depth_limit, None);
            let Some(&(forwards, last)) = chain.last() else {
                continue;
            };
            let far_end = if forwards { WayEnd::End } else { WayEnd::Start };
            let dead_end = graph.way(last).is_some_and(|w| w.end(far_end).is_none());
            if dead_end {
                // 有名路段同样标记
                for &(forwards, way) in &chain {
                    set_destination_tag(graph, !forwards, way, DEAD_END, true, "");
                }
            }
        }
    }
    processed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::road_graph::{IntersectionType, WayType};
    use crate::ruler::CheapRuler;
    use crate::types::LngLat;

    const ORIGIN: LngLat = LngLat::new(-4.25, 55.86);

    fn ruler() -> CheapRuler {
        CheapRuler::new(ORIGIN.lat)
    }

    fn node(graph: &RoadGraph, east: f64) -> IntersectionId {
        graph.add_intersection(ruler().offset(ORIGIN, east, 0.0), IntersectionType::Regular)
    }

    fn way(graph: &RoadGraph, a: IntersectionId, b: Option<IntersectionId>, name: Option<&str>, tags: &[(&str, &str)]) -> WayId {
        let la = graph.intersection(a).unwrap().location;
        let lb = match b {
            Some(b) => graph.intersection(b).unwrap().location,
            None => ruler().offset(la, 30.0, 30.0),
        };
        let tags = tags.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        let id = graph.add_way(WayType::Path, vec![la, lb], name.map(str::to_string), tags, &ruler());
        graph.link(id, WayEnd::Start, a);
        if let Some(b) = b {
            graph.link(id, WayEnd::End, b);
        }
        id
    }

    #[test]
    fn test_destinations_in_both_directions() {
        let graph = RoadGraph::new();
        let (i0, i1, i2, i3) = (node(&graph, 0.0), node(&graph, 50.0), node(&graph, 100.0), node(&graph, 150.0));
        way(&graph, i0, Some(i1), Some("Moor Road"), &[]);
        let lane = way(&graph, i1, Some(i2), None, &[]);
        way(&graph, i2, Some(i3), Some("Burn Lane"), &[]);

        let mut accumulator = HashMap::new();
        let processed = confect_names(&graph, &[i0, i1, i2, i3], &mut accumulator, 15);
        assert_eq!(processed, 4);

        let lane = graph.way(lane).unwrap();
        assert_eq!(lane.destination(false), Some("Moor Road"));
        assert_eq!(lane.destination(true), Some("Burn Lane"));
        assert_eq!(lane.dead_end(true), None);
        assert_eq!(lane.passes(true), None);
    }

    #[test]
    fn test_passes_steps_along_chain() {
        let graph = RoadGraph::new();
        let nodes: Vec<_> = (0..4).map(|i| node(&graph, i as f64 * 50.0)).collect();
        way(&graph, nodes[0], Some(nodes[1]), Some("Moor Road"), &[]);
        let first = way(&graph, nodes[1], Some(nodes[2]), None, &[]);
        let steps = way(&graph, nodes[2], Some(nodes[3]), None, &[("subclass", "steps")]);
        let end = node(&graph, 200.0);
        way(&graph, nodes[3], Some(end), Some("High Street"), &[]);

        confect_names(&graph, &[nodes[1], nodes[3]], &mut HashMap::new(), 15);

        for id in [first, steps] {
            let w = graph.way(id).unwrap();
            assert_eq!(w.destination(false), Some("Moor Road"));
            assert_eq!(w.destination(true), Some("High Street"));
            assert_eq!(w.passes(false), Some("steps"));
            assert_eq!(w.passes(true), Some("steps"));
        }
    }

    #[test]
    fn test_dead_end() {
        let graph = RoadGraph::new();
        let (i0, i1) = (node(&graph, 0.0), node(&graph, 50.0));
        let road = way(&graph, i0, Some(i1), Some("Moor Road"), &[]);
        let stub = way(&graph, i1, None, None, &[]);

        confect_names(&graph, &[i1], &mut HashMap::new(), 15);

        let stub = graph.way(stub).unwrap();
        assert_eq!(stub.dead_end(true), Some("dead-end"));
        assert_eq!(stub.dead_end(false), None);
        assert_eq!(stub.destination(false), Some("Moor Road"));
        assert!(graph.way(road).unwrap().confected.is_empty());
    }

    #[test]
    fn test_sidewalks_are_not_confected() {
        let graph = RoadGraph::new();
        let (i0, i1, i2) = (node(&graph, 0.0), node(&graph, 50.0), node(&graph, 100.0));
        way(&graph, i0, Some(i1), Some("Moor Road"), &[]);
        let sidewalk = way(&graph, i1, Some(i2), None, &[("footway", "sidewalk")]);
        way(&graph, i1, Some(i0), None, &[]);

        confect_names(&graph, &[i1], &mut HashMap::new(), 15);
        assert_eq!(graph.way(sidewalk).unwrap().destination(false), None);
    }

    #[test]
    fn test_accumulator_skips_known_locations() {
        let graph = RoadGraph::new();
        let (i0, i1) = (node(&graph, 0.0), node(&graph, 50.0));
        way(&graph, i0, Some(i1), Some("Moor Road"), &[]);

        let mut accumulator = HashMap::new();
        assert_eq!(confect_names(&graph, &[i0, i1], &mut accumulator, 15), 2);
        assert_eq!(confect_names(&graph, &[i0, i1], &mut accumulator, 15), 0);
        assert_eq!(accumulator.len(), 2);
    }
}
