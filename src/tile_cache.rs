//! 瓦片缓存 (LRU)
//!
//! 每个缓存瓦片拥有自己在路网图中的 Way / Intersection。
//! 淘汰不是简单丢弃：`release` 接管被淘汰的瓦片，先拆掉挂在其路口上的 JOINER，
//! 再断开并移除路段，最后移除路口，保证图中不残留指向它的引用。

use std::collections::HashMap;
use std::sync::Arc;

use crate::categories::{classify_tile_features, Collections, TreeId};
use crate::feature::{Feature, FeatureRef, Geometry, GraphRef};
use crate::projection::TileCoord;
use crate::road_graph::{IntersectionId, IntersectionType, RoadGraph, WayEnd, WayId, WayType};
use crate::ruler::Ruler;
use crate::tile_provider::TileData;
use crate::types::LocationKey;

/// 已解析并挂入路网图的瓦片
#[derive(Debug)]
pub struct CachedTile {
    pub coord: TileCoord,
    pub collections: Collections,
    /// 按提供者顺序
    pub ways: Vec<WayId>,
    /// 按提供者顺序 (同坐标只保留第一个)
    pub intersections: Vec<IntersectionId>,
    /// 瓦片内路口表 (未缝合)
    pub intersection_map: HashMap<LocationKey, IntersectionId>,
    pub last_used: u64,
}

impl CachedTile {
    /// 把提供者数据建成图节点与分类集合
    pub fn materialize(coord: TileCoord, data: TileData, graph: &RoadGraph, ruler: &dyn Ruler) -> Self {
        let mut intersections = Vec::with_capacity(data.intersections.len());
        let mut intersection_map = HashMap::new();
        // 提供者下标 -> 图中的路口
        let mut by_index = Vec::with_capacity(data.intersections.len());
        for raw in &data.intersections {
            let id = *intersection_map
                .entry(raw.location.key())
                .or_insert_with(|| {
                    let id = graph.add_intersection(raw.location, raw.intersection_type);
                    intersections.push(id);
                    id
                });
            by_index.push(id);
        }

        let mut ways = Vec::with_capacity(data.ways.len());
        let mut road_features: Vec<(WayType, FeatureRef)> = Vec::new();
        for raw in data.ways {
            let name = raw.name().map(str::to_string);
            let id = graph.add_way(raw.way_type, raw.geometry.clone(), name, raw.tags.clone(), ruler);
            for (end, index) in [(WayEnd::Start, raw.start), (WayEnd::End, raw.end)] {
                let Some(index) = index else { continue };
                match by_index.get(index) {
                    Some(&intersection) => {
                        graph.link(id, end, intersection);
                    }
                    None => log::warn!("瓦片 {} 的路段引用了不存在的路口 {}", coord, index),
                }
            }
            ways.push(id);

            let feature = Feature {
                geometry: Geometry::LineString(raw.geometry),
                tags: raw.tags,
                foreign: Vec::new(),
                osm_ids: raw.osm_ids,
                graph: Some(GraphRef::Way(id)),
            };
            road_features.push((raw.way_type, Arc::new(feature)));
        }

        for &id in &intersections {
            graph.name_intersection(id);
        }

        let mut collections = Collections::new();
        for (way_type, feature) in road_features {
            match way_type {
                WayType::Road => {
                    collections.push(TreeId::Roads, feature.clone());
                    collections.push(TreeId::RoadsAndPaths, feature);
                }
                WayType::Path => collections.push(TreeId::RoadsAndPaths, feature),
                WayType::Joiner => log::warn!("瓦片 {} 自带 JOINER 路段，已忽略其要素", coord),
            }
        }

        for &id in &intersections {
            let Some(intersection) = graph.intersection(id) else {
                continue;
            };
            if intersection.intersection_type != IntersectionType::Regular {
                continue;
            }
            let mut feature = Feature::new(Geometry::Point(intersection.location));
            if !intersection.name.is_empty() {
                feature = feature.with_tag("name", &intersection.name);
            }
            feature.graph = Some(GraphRef::Intersection(id));
            collections.push(TreeId::Intersections, Arc::new(feature));
        }

        let features: Vec<FeatureRef> = data.features.into_iter().map(Arc::new).collect();
        classify_tile_features(&features, &mut collections);

        Self {
            coord,
            collections,
            ways,
            intersections,
            intersection_map,
            last_used: 0,
        }
    }

    pub fn has_roads(&self) -> bool {
        !self.collections.get(TreeId::RoadsAndPaths).is_empty()
    }
}

/// 拆除瓦片在路网图中的全部节点
fn release(tile: CachedTile, graph: &RoadGraph) {
    let mut joiners = Vec::new();
    for &id in &tile.intersections {
        for member in graph.members(id) {
            if graph.way(member).is_some_and(|w| w.way_type == WayType::Joiner) {
                joiners.push(member);
            }
        }
    }
    let joiners_removed = graph.remove_joiners(&joiners);

    for &id in &tile.ways {
        graph.remove_way(id);
    }
    for &id in &tile.intersections {
        graph.remove_intersection(id);
    }
    log::debug!(
        "释放瓦片 {}: {} 条路段, {} 个路口, {} 条 JOINER",
        tile.coord,
        tile.ways.len(),
        tile.intersections.len(),
        joiners_removed
    );
}

/// 有界 LRU 瓦片缓存
#[derive(Debug)]
pub struct TileCache {
    tiles: HashMap<TileCoord, CachedTile>,
    max_tiles: usize,
    /// 逻辑时钟，每次访问递增
    clock: u64,
}

impl TileCache {
    pub fn new(max_tiles: usize) -> Self {
        Self {
            tiles: HashMap::new(),
            max_tiles,
            clock: 0,
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// 命中时刷新 `last_used`
    pub fn get(&mut self, coord: TileCoord) -> Option<&CachedTile> {
        if !self.touch(coord) {
            return None;
        }
        self.tiles.get(&coord)
    }

    /// 刷新 `last_used`，返回是否命中
    pub fn touch(&mut self, coord: TileCoord) -> bool {
        let now = self.tick();
        match self.tiles.get_mut(&coord) {
            Some(tile) => {
                tile.last_used = now;
                log::debug!("缓存命中 {}", coord);
                true
            }
            None => false,
        }
    }

    /// 只读访问，不刷新时间戳
    pub fn peek(&self, coord: TileCoord) -> Option<&CachedTile> {
        self.tiles.get(&coord)
    }

    pub fn contains(&self, coord: TileCoord) -> bool {
        self.tiles.contains_key(&coord)
    }

    /// 放入瓦片；超出容量时淘汰 `last_used` 最小的一个并返回其坐标
    pub fn put(&mut self, mut tile: CachedTile, graph: &RoadGraph) -> Option<TileCoord> {
        tile.last_used = self.tick();
        if let Some(previous) = self.tiles.insert(tile.coord, tile) {
            release(previous, graph);
        }
        if self.tiles.len() <= self.max_tiles {
            return None;
        }

        let oldest = self
            .tiles
            .values()
            .min_by_key(|t| t.last_used)
            .map(|t| t.coord)?;
        let evicted = self.tiles.remove(&oldest)?;
        log::debug!("淘汰瓦片 {} (last_used = {})", oldest, evicted.last_used);
        release(evicted, graph);
        Some(oldest)
    }

    /// 逐个释放全部瓦片
    pub fn clear(&mut self, graph: &RoadGraph) {
        for (_, tile) in self.tiles.drain() {
            release(tile, graph);
        }
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn max_tiles(&self) -> usize {
        self.max_tiles
    }
}
