//! 网格装配
//!
//! 输入 N×N 个已缓存瓦片，输出一代完整的网格：
//! 1. 按类别合并各瓦片集合，按上游 ID 集合去重 (先到先得)
//! 2. POI 超类分类
//! 3. 缝合内部边界上的 TILE_EDGE 路口 (JOINER)
//! 4. 无名路段名称推导
//! 5. 为每个类别构建空间索引
//!
//! 装配是纯同步过程，必须在单写者上下文中执行。

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use crate::categories::{classify_pois, Collections, EnabledCategories, TreeId};
use crate::confect::confect_names;
use crate::config::GridConfig;
use crate::feature::FeatureRef;
use crate::feature_tree::FeatureTree;
use crate::road_graph::{IntersectionId, IntersectionType, RoadGraph, WayId};
use crate::ruler::Ruler;
use crate::tile_cache::CachedTile;
use crate::tile_grid::TileGrid;
use crate::types::{LngLat, LocationKey};

/// 已发布的一代网格
#[derive(Debug)]
pub struct Grid {
    pub generation: u64,
    pub tile_grid: TileGrid,
    trees: [FeatureTree; TreeId::COUNT],
    /// 全网格路口表 (按瓦片顺序，同坐标先到先得)
    pub intersections: HashMap<LocationKey, IntersectionId>,
    /// 本代创建的 JOINER，换代前整体移除
    pub joiners: Vec<WayId>,
}

impl Grid {
    pub fn tree(&self, id: TreeId) -> &FeatureTree {
        &self.trees[id.index()]
    }

    pub fn tree_sizes(&self) -> Vec<(String, usize)> {
        TreeId::ALL
            .iter()
            .map(|id| (format!("{:?}", id), self.tree(*id).len()))
            .collect()
    }

    /// 按新的启用组合重建“当前选中类别”索引
    pub fn reselect(&mut self, enabled: &EnabledCategories) {
        let mut selected: Vec<FeatureRef> = Vec::new();
        if enabled.places_and_landmarks {
            selected.extend(self.tree(TreeId::PlacePois).all().iter().cloned());
            selected.extend(self.tree(TreeId::LandmarkPois).all().iter().cloned());
        }
        if enabled.mobility {
            selected.extend(self.tree(TreeId::MobilityPois).all().iter().cloned());
        }
        self.trees[TreeId::SelectedSuperCategories.index()] = FeatureTree::build(selected);
    }
}

/// 合并各瓦片的非派生类别
///
/// 关联路网节点的要素与没有 ID 的要素总是保留。
pub fn merge_collections(tiles: &[&CachedTile]) -> Collections {
    let mut merged = Collections::new();
    for id in TreeId::ALL.iter().filter(|id| !id.is_derived()) {
        let mut seen: HashSet<Vec<i64>> = HashSet::new();
        for tile in tiles {
            for feature in tile.collections.get(*id) {
                let keep = feature.graph.is_some()
                    || feature.dedup_key().map_or(true, |key| seen.insert(key));
                if keep {
                    merged.push(*id, feature.clone());
                }
            }
        }
    }
    merged
}

/// 缝合内部边界上的 TILE_EDGE 路口，返回新建的 JOINER
///
/// 候选按瓦片顺序、再按提供者顺序排列；每个路口至多连接一次，
/// 同一瓦片内的路口不互相连接。
pub fn join_tile_edges(
    tile_grid: &TileGrid,
    tiles: &[&CachedTile],
    graph: &RoadGraph,
    max_distance: f64,
    ruler: &dyn Ruler,
) -> Vec<WayId> {
    let mut candidates: Vec<(usize, IntersectionId, LngLat)> = Vec::new();
    for (tile_index, tile) in tiles.iter().enumerate() {
        for &id in &tile.intersections {
            let Some(intersection) = graph.intersection(id) else {
                continue;
            };
            if intersection.intersection_type == IntersectionType::TileEdge
                && tile_grid.on_internal_boundary(intersection.location)
            {
                candidates.push((tile_index, id, intersection.location));
            }
        }
    }

    let mut joined = vec![false; candidates.len()];
    let mut joiners = Vec::new();
    for i in 0..candidates.len() {
        if joined[i] {
            continue;
        }
        let (tile_a, a, location_a) = candidates[i];
        for j in (i + 1)..candidates.len() {
            let (tile_b, b, location_b) = candidates[j];
            if joined[j] || tile_a == tile_b {
                continue;
            }
            if ruler.distance(location_a, location_b) >= max_distance {
                continue;
            }
            if let Some(joiner) = graph.join(a, b, ruler) {
                joined[i] = true;
                joined[j] = true;
                joiners.push(joiner);
                break;
            }
        }
    }
    log::debug!("{} 个边界路口，创建 {} 条 JOINER", candidates.len(), joiners.len());
    joiners
}

/// 装配一代网格
///
/// 调用前上一代的 JOINER 必须已经移除。
pub fn assemble(
    generation: u64,
    tile_grid: TileGrid,
    tiles: &[&CachedTile],
    graph: &RoadGraph,
    config: &GridConfig,
    enabled: &EnabledCategories,
    ruler: &dyn Ruler,
) -> Grid {
    let started = Instant::now();

    let mut merged = merge_collections(tiles);
    classify_pois(&mut merged, enabled);

    let has_roads = tiles.iter().any(|t| t.has_roads());
    let joiners = if tiles.len() > 1 && has_roads {
        join_tile_edges(&tile_grid, tiles, graph, config.joiner_max_distance, ruler)
    } else {
        Vec::new()
    };

    let road_tiles: Vec<&&CachedTile> = tiles.iter().filter(|t| t.has_roads()).collect();
    for tile in &road_tiles {
        graph.clear_confected(&tile.ways);
    }
    let mut accumulator = HashMap::new();
    for tile in &road_tiles {
        confect_names(graph, &tile.intersections, &mut accumulator, config.follow_depth_limit);
    }

    let mut intersections = HashMap::new();
    for tile in tiles {
        for (key, id) in &tile.intersection_map {
            intersections.entry(*key).or_insert(*id);
        }
    }

    let trees: [FeatureTree; TreeId::COUNT] =
        std::array::from_fn(|i| FeatureTree::build(merged.take(TreeId::ALL[i])));

    log::info!(
        "网格第 {} 代装配完成: {} 个瓦片, {} 条 JOINER, {} 个路口, 耗时 {:?}",
        generation,
        tiles.len(),
        joiners.len(),
        intersections.len(),
        started.elapsed()
    );

    Grid {
        generation,
        tile_grid,
        trees,
        intersections,
        joiners,
    }
}
