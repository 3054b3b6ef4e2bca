//! 瓦片提供者
//!
//! 引擎只消费解码后的单瓦片数据：原始要素 + 路段 + 瓦片内路口表 (未缝合)。
//! 网络/离线归档的读取与解码由外部实现 `TileProvider`。

use anyhow::{Context, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::error::TileUnavailable;
use crate::feature::Feature;
use crate::projection::TileCoord;
use crate::road_graph::{IntersectionType, WayType};
use crate::types::LngLat;

/// 瓦片内的路段，`start`/`end` 是 `TileData::intersections` 的下标
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileWay {
    pub way_type: WayType,
    pub geometry: Vec<LngLat>,
    #[serde(default)]
    pub tags: Vec<(String, String)>,
    #[serde(default)]
    pub osm_ids: Vec<i64>,
    #[serde(default)]
    pub start: Option<usize>,
    #[serde(default)]
    pub end: Option<usize>,
}

impl TileWay {
    pub fn name(&self) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k == "name")
            .map(|(_, v)| v.as_str())
    }
}

/// 瓦片内的路口 (坐标已按瓦片吸附)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TileIntersection {
    pub location: LngLat,
    pub intersection_type: IntersectionType,
}

/// 单个瓦片的解码结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TileData {
    /// 非路网要素 (POI、入口、聚落 ...)
    #[serde(default)]
    pub features: Vec<Feature>,
    #[serde(default)]
    pub ways: Vec<TileWay>,
    #[serde(default)]
    pub intersections: Vec<TileIntersection>,
}

/// 瓦片数据来源
///
/// 可并发调用；失败时返回可重试的 `TileUnavailable`。
pub trait TileProvider: Send + Sync + 'static {
    fn fetch_tile(&self, tile: TileCoord) -> impl Future<Output = Result<TileData, TileUnavailable>> + Send;
}

// ============================================================================
// 内存提供者
// ============================================================================

/// 内存瓦片提供者 (静态数据、测试夹具)
///
/// 支持按瓦片注入失败、固定延迟，并记录每个瓦片的拉取次数。
#[derive(Default)]
pub struct StaticTileProvider {
    tiles: DashMap<TileCoord, TileData>,
    /// 依次消费的一次性失败
    queued_failures: DashMap<TileCoord, VecDeque<TileUnavailable>>,
    /// 持续失败
    permanent_failures: DashMap<TileCoord, TileUnavailable>,
    latency: Option<Duration>,
    fetch_counts: DashMap<TileCoord, usize>,
    total_fetches: AtomicUsize,
}

#[derive(Deserialize)]
struct FixtureTile {
    tile: TileCoord,
    data: TileData,
}

impl StaticTileProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// 从 JSON 夹具加载：`[{ "tile": {x,y,z}, "data": TileData }, ...]`
    pub fn from_json(json: &str) -> Result<Self> {
        let fixtures: Vec<FixtureTile> = serde_json::from_str(json).context("无法解析瓦片夹具")?;
        let provider = Self::new();
        for fixture in fixtures {
            provider.insert(fixture.tile, fixture.data);
        }
        Ok(provider)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("无法打开瓦片夹具: {}", path.display()))?;
        Self::from_json(&json)
    }

    pub fn insert(&self, tile: TileCoord, data: TileData) {
        self.tiles.insert(tile, data);
    }

    /// 接下来 `times` 次拉取该瓦片时失败
    pub fn fail_next(&self, tile: TileCoord, times: usize, error: TileUnavailable) {
        let mut queue = self.queued_failures.entry(tile).or_default();
        queue.extend(std::iter::repeat(error).take(times));
    }

    /// 该瓦片的所有拉取都失败，直到 `clear_failures`
    pub fn fail_always(&self, tile: TileCoord, error: TileUnavailable) {
        self.permanent_failures.insert(tile, error);
    }

    pub fn clear_failures(&self, tile: TileCoord) {
        self.permanent_failures.remove(&tile);
        self.queued_failures.remove(&tile);
    }

    pub fn fetch_count(&self, tile: TileCoord) -> usize {
        self.fetch_counts.get(&tile).map(|c| *c).unwrap_or(0)
    }

    pub fn total_fetches(&self) -> usize {
        self.total_fetches.load(Ordering::SeqCst)
    }

    fn resolve(&self, tile: TileCoord) -> Result<TileData, TileUnavailable> {
        if let Some(error) = self.permanent_failures.get(&tile) {
            return Err(error.clone());
        }
        if let Some(error) = self
            .queued_failures
            .get_mut(&tile)
            .and_then(|mut queue| queue.pop_front())
        {
            return Err(error);
        }
        self.tiles
            .get(&tile)
            .map(|data| data.clone())
            .ok_or(TileUnavailable::NotFound)
    }
}

impl TileProvider for StaticTileProvider {
    fn fetch_tile(&self, tile: TileCoord) -> impl Future<Output = Result<TileData, TileUnavailable>> + Send {
        async move {
            *self.fetch_counts.entry(tile).or_insert(0) += 1;
            self.total_fetches.fetch_add(1, Ordering::SeqCst);
            log::debug!("拉取瓦片 {}", tile);

            if let Some(latency) = self.latency {
                tokio::time::sleep(latency).await;
            }
            self.resolve(tile)
        }
    }
}
