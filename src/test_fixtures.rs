//! 测试用的合成瓦片

use crate::feature::{Feature, Geometry};
use crate::projection::TileCoord;
use crate::road_graph::{IntersectionType, WayType};
use crate::ruler::CheapRuler;
use crate::tile_grid::TileGrid;
use crate::tile_provider::{StaticTileProvider, TileData, TileIntersection, TileWay};
use crate::types::LngLat;

pub const ZOOM: u8 = 15;

/// 格拉斯哥市中心附近的瓦片
pub fn home_tile() -> TileCoord {
    TileCoord::new(16000, 10000, ZOOM)
}

/// 位于 `home_tile` 右下象限：2×2 网格为 home、右、下、右下
pub fn observer() -> LngLat {
    home_tile().lonlat_at(0.75, 0.75)
}

fn tags(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

fn junction(location: LngLat, intersection_type: IntersectionType) -> TileIntersection {
    TileIntersection {
        location,
        intersection_type,
    }
}

fn poi(location: LngLat, feature_type: &str, feature_value: &str, id: i64) -> Feature {
    Feature::new(Geometry::Point(location))
        .with_foreign("feature_type", feature_type)
        .with_foreign("feature_value", feature_value)
        .with_ids(&[id])
}

/// 十字路口：东西向道路 (有名) + 南北向小路 (无名)，四个端点在瓦片边界上
///
/// 另带一个咖啡馆和一个公交站。
pub fn crossroads_tile(coord: TileCoord) -> TileData {
    let centre = coord.lonlat_at(0.5, 0.5);
    let ends = [
        coord.lonlat_at(1.0, 0.5),
        coord.lonlat_at(0.0, 0.5),
        coord.lonlat_at(0.5, 0.0),
        coord.lonlat_at(0.5, 1.0),
    ];

    let mut intersections = vec![junction(centre, IntersectionType::Regular)];
    intersections.extend(ends.iter().map(|p| junction(*p, IntersectionType::TileEdge)));

    let ways = ends
        .iter()
        .enumerate()
        .map(|(i, end)| {
            let (way_type, tags) = if i < 2 {
                (
                    WayType::Road,
                    tags(&[("name", "Sauchiehall Street"), ("class", "secondary")]),
                )
            } else {
                (WayType::Path, tags(&[("class", "footway")]))
            };
            TileWay {
                way_type,
                geometry: vec![centre, *end],
                tags,
                osm_ids: vec![coord.x as i64 * 1000 + i as i64],
                start: Some(0),
                end: Some(i + 1),
            }
        })
        .collect();

    let base = coord.x as i64 * 1000 + coord.y as i64 * 10;
    TileData {
        features: vec![
            poi(coord.lonlat_at(0.6, 0.4), "amenity", "cafe", base + 1),
            poi(coord.lonlat_at(0.4, 0.6), "highway", "bus_stop", base + 2),
        ],
        ways,
        intersections,
    }
}

/// 一条从瓦片中部通往东边界的道路；`intersections[1]` 是边界路口
pub fn road_to_east_edge(coord: TileCoord, fy: f64, name: &str) -> TileData {
    let inner = coord.lonlat_at(0.5, fy);
    let edge = coord.lonlat_at(1.0, fy);
    TileData {
        features: Vec::new(),
        ways: vec![TileWay {
            way_type: WayType::Road,
            geometry: vec![inner, edge],
            tags: tags(&[("name", name), ("class", "tertiary")]),
            osm_ids: vec![1],
            start: Some(0),
            end: Some(1),
        }],
        intersections: vec![
            junction(inner, IntersectionType::Regular),
            junction(edge, IntersectionType::TileEdge),
        ],
    }
}

/// 一条从西边界通往瓦片中部的道路；边界路口向北偏移 `nudge` 米，
/// 模拟两侧瓦片各自吸附造成的错位。`intersections[1]` 是边界路口
pub fn road_from_west_edge(coord: TileCoord, fy: f64, nudge: f64, name: &str) -> TileData {
    let inner = coord.lonlat_at(0.5, fy);
    let boundary = coord.lonlat_at(0.0, fy);
    let edge = CheapRuler::new(boundary.lat).offset(boundary, 0.0, nudge);
    TileData {
        features: Vec::new(),
        ways: vec![TileWay {
            way_type: WayType::Road,
            geometry: vec![edge, inner],
            tags: tags(&[("name", name), ("class", "tertiary")]),
            osm_ids: vec![2],
            start: Some(1),
            end: Some(0),
        }],
        intersections: vec![
            junction(inner, IntersectionType::Regular),
            junction(edge, IntersectionType::TileEdge),
        ],
    }
}

/// 2×2 网格：上排两个瓦片各有一条道路止于共享边界，边界路口相距 0.3 米；
/// 下排两个瓦片为空
pub fn seam_provider(grid: &TileGrid) -> StaticTileProvider {
    let provider = StaticTileProvider::new();
    provider.insert(grid.tiles[0], road_to_east_edge(grid.tiles[0], 0.9, "Argyle Street"));
    provider.insert(grid.tiles[1], road_from_west_edge(grid.tiles[1], 0.9, 0.3, "Trongate"));
    provider.insert(grid.tiles[2], TileData::default());
    provider.insert(grid.tiles[3], TileData::default());
    provider
}

/// 以 `observer` 为中心的 2×2 接缝网格
pub fn seam_grid() -> (TileGrid, StaticTileProvider) {
    // 夹具位置固定，网格一定存在
    let grid = TileGrid::new(observer(), 2, ZOOM).unwrap();
    let provider = seam_provider(&grid);
    (grid, provider)
}
