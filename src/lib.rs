//! tilegraph - 瓦片网格与路网图引擎
//!
//! 为移动中的观察者维护周边路网与 POI 的实时可查询模型
//!
//! # 模块结构
//!
//! - `types`: 公共类型定义
//! - `config`: 引擎配置
//! - `error`: 错误分类
//! - `projection`: Web 墨卡托投影与瓦片坐标
//! - `ruler`: 局部平面距离/方位计算
//! - `feature`: 地图要素与几何
//! - `feature_tree`: 按类别的空间索引 (R-Tree)
//! - `road_graph`: 路网图 (Way ↔ Intersection 竞技场)
//! - `confect`: 无名路段名称推导
//! - `categories`: 要素分类
//! - `tile_grid`: 瓦片网格与中心盒计算
//! - `tile_provider`: 瓦片数据来源
//! - `tile_cache`: LRU 瓦片缓存
//! - `grid_assembler`: 网格装配与跨瓦片缝合
//! - `grid_state`: 对外门面
//! - `grid_service`: 单写者 worker

pub mod categories;
pub mod confect;
pub mod config;
pub mod error;
pub mod feature;
pub mod feature_tree;
pub mod grid_assembler;
pub mod grid_service;
pub mod grid_state;
pub mod projection;
pub mod road_graph;
pub mod ruler;
pub mod tile_cache;
pub mod tile_grid;
pub mod tile_provider;
pub mod types;

#[cfg(test)]
mod test_fixtures;

pub use categories::{EnabledCategories, TreeId};
pub use config::GridConfig;
pub use error::{GridError, TileUnavailable};
pub use feature::{Feature, FeatureRef, Geometry, GraphRef};
pub use feature_tree::FeatureTree;
pub use grid_service::{spawn, GridHandle};
pub use grid_state::{GridState, GridUpdate, TreeContext};
pub use projection::TileCoord;
pub use road_graph::{IntersectionId, IntersectionType, RoadGraph, WayId, WayType};
pub use ruler::{CheapRuler, Ruler};
pub use tile_provider::{StaticTileProvider, TileData, TileProvider};
pub use types::{BoundingBox, GridStats, LngLat};
