//! 网格状态 (对外门面)
//!
//! 架构设计：
//! - 位置更新分三段：plan (只读判断) → fetch (并发拉取，无共享可变状态) → commit (同步装配与发布)
//! - 位置仍在中心盒内时直接返回，这是最常见的路径
//! - 更新失败时所有状态保持不变，旧网格继续可查询
//! - 所有查询都需要 `TreeContext`，只有单写者上下文能持有与本状态匹配的令牌

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinSet;

use crate::categories::{EnabledCategories, TreeId};
use crate::config::GridConfig;
use crate::error::{GridError, TileUnavailable};
use crate::feature::FeatureRef;
use crate::feature_tree::FeatureTree;
use crate::grid_assembler::{assemble, Grid};
use crate::projection::TileCoord;
use crate::road_graph::{IntersectionId, RoadGraph};
use crate::ruler::CheapRuler;
use crate::tile_cache::{CachedTile, TileCache};
use crate::tile_grid::TileGrid;
use crate::tile_provider::{TileData, TileProvider};
use crate::types::{BoundingBox, GridStats, LngLat, LocationKey};

static NEXT_STATE_ID: AtomicU64 = AtomicU64::new(1);

/// 单写者上下文令牌
///
/// 只能在 crate 内部铸造；持有与某个 `GridState` 匹配的令牌即表示处于其单写者上下文中。
#[derive(Debug)]
pub struct TreeContext {
    state_id: u64,
}

impl TreeContext {
    pub(crate) fn new(state_id: u64) -> Self {
        Self { state_id }
    }

    pub fn state_id(&self) -> u64 {
        self.state_id
    }
}

/// 位置更新的结果
#[derive(Debug, Clone, PartialEq)]
pub enum GridUpdate {
    /// 位置仍在中心盒内
    Unchanged,
    Recomputed {
        generation: u64,
        tiles: Vec<TileCoord>,
        /// 实际从提供者拉取的瓦片数
        fetched: usize,
    },
}

/// 需要重算时的计划
#[derive(Debug, Clone)]
pub struct UpdatePlan {
    pub location: LngLat,
    pub tile_grid: TileGrid,
    /// 缓存中缺失、需要拉取的瓦片
    pub missing: Vec<TileCoord>,
}

pub struct GridState<P: TileProvider> {
    id: u64,
    config: GridConfig,
    provider: Arc<P>,
    cache: TileCache,
    graph: RoadGraph,
    grid: Option<Grid>,
    ruler: CheapRuler,
    enabled: EnabledCategories,
    generation: u64,
}

impl<P: TileProvider> GridState<P> {
    pub fn new(config: GridConfig, provider: Arc<P>) -> anyhow::Result<Self> {
        config.validate()?;
        Ok(Self {
            id: NEXT_STATE_ID.fetch_add(1, Ordering::SeqCst),
            cache: TileCache::new(config.max_cached_tiles),
            config,
            provider,
            graph: RoadGraph::new(),
            grid: None,
            ruler: CheapRuler::new(0.0),
            enabled: EnabledCategories::default(),
            generation: 0,
        })
    }

    /// 本状态的单写者令牌 (仅供 worker 与测试)
    pub(crate) fn context(&self) -> TreeContext {
        TreeContext::new(self.id)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    pub fn provider(&self) -> Arc<P> {
        self.provider.clone()
    }

    fn verify(&self, ctx: &TreeContext) -> Result<(), GridError> {
        if ctx.state_id != self.id {
            return Err(GridError::ContextViolation(format!(
                "token for state {} used on state {}",
                ctx.state_id, self.id
            )));
        }
        Ok(())
    }

    #[inline]
    fn guard(&self, ctx: &TreeContext) {
        debug_assert!(
            ctx.state_id == self.id,
            "grid state {} queried with a token for state {}",
            self.id,
            ctx.state_id
        );
    }

    // ========================================================================
    // 位置更新
    // ========================================================================

    /// 判断是否需要重算；位置在中心盒内时返回 None
    pub fn plan(&self, ctx: &TreeContext, location: LngLat) -> Result<Option<UpdatePlan>, GridError> {
        self.verify(ctx)?;
        if let Some(grid) = &self.grid {
            if grid.tile_grid.central.contains(location) {
                return Ok(None);
            }
        }
        let Some(tile_grid) = TileGrid::new(location, self.config.grid_size, self.config.zoom) else {
            log::warn!("不支持的网格尺寸 {}", self.config.grid_size);
            return Ok(None);
        };
        let missing = tile_grid
            .tiles
            .iter()
            .copied()
            .filter(|t| !self.cache.contains(*t))
            .collect();
        Ok(Some(UpdatePlan {
            location,
            tile_grid,
            missing,
        }))
    }

    /// 装配并发布新一代网格
    ///
    /// 先移除上一代的 JOINER，再刷新/写入缓存，最后一次性替换已发布的网格。
    pub fn commit(
        &mut self,
        ctx: &TreeContext,
        plan: UpdatePlan,
        fetched: Vec<(TileCoord, TileData)>,
    ) -> Result<GridUpdate, GridError> {
        self.verify(ctx)?;
        let started = Instant::now();

        // 在改动任何状态之前确认每个瓦片都可用
        let unavailable = plan
            .tile_grid
            .tiles
            .iter()
            .copied()
            .find(|coord| !self.cache.contains(*coord) && !fetched.iter().any(|(tile, _)| tile == coord));
        if let Some(coord) = unavailable {
            log::warn!("瓦片 {} 既不在缓存中也未拉取，保留上一代网格", coord);
            return Err(GridError::TileMissing(coord));
        }

        if let Some(previous) = &self.grid {
            self.graph.remove_joiners(&previous.joiners);
        }
        if self.ruler.needs_replacing(plan.location.lat) {
            self.ruler = CheapRuler::new(plan.location.lat);
        }

        for coord in &plan.tile_grid.tiles {
            self.cache.touch(*coord);
        }
        let fetched_count = fetched.len();
        for (coord, data) in fetched {
            let tile = CachedTile::materialize(coord, data, &self.graph, &self.ruler);
            self.cache.put(tile, &self.graph);
        }

        // 缓存容量不小于网格瓦片数，且本代瓦片已先刷新，插入时不会被逐出
        let tiles: Vec<&CachedTile> = plan
            .tile_grid
            .tiles
            .iter()
            .filter_map(|coord| self.cache.peek(*coord))
            .collect();
        debug_assert_eq!(tiles.len(), plan.tile_grid.tiles.len());

        let generation = self.generation + 1;
        let grid = assemble(
            generation,
            plan.tile_grid.clone(),
            &tiles,
            &self.graph,
            &self.config,
            &self.enabled,
            &self.ruler,
        );
        self.grid = Some(grid);
        self.generation = generation;

        log::info!(
            "发布网格第 {} 代 (拉取 {} 个瓦片，缓存 {} 个)，耗时 {:?}",
            generation,
            fetched_count,
            self.cache.len(),
            started.elapsed()
        );
        Ok(GridUpdate::Recomputed {
            generation,
            tiles: plan.tile_grid.tiles,
            fetched: fetched_count,
        })
    }

    /// 完整的位置更新：plan → fetch → commit
    pub async fn location_update(&mut self, ctx: &TreeContext, location: LngLat) -> Result<GridUpdate, GridError> {
        let Some(plan) = self.plan(ctx, location)? else {
            return Ok(GridUpdate::Unchanged);
        };
        let fetched = fetch_tiles(self.provider.clone(), plan.missing.clone(), self.config.max_fetch_attempts).await?;
        self.commit(ctx, plan, fetched)
    }

    /// 切换启用的超类，只重建选中类别的索引
    pub fn set_enabled_categories(&mut self, ctx: &TreeContext, enabled: EnabledCategories) {
        self.guard(ctx);
        self.enabled = enabled;
        if let Some(grid) = self.grid.as_mut() {
            grid.reselect(&enabled);
        }
    }

    /// 丢弃网格并逐个释放缓存瓦片
    pub fn reset(&mut self, ctx: &TreeContext) {
        self.guard(ctx);
        if let Some(previous) = self.grid.take() {
            self.graph.remove_joiners(&previous.joiners);
        }
        self.cache.clear(&self.graph);
    }

    // ========================================================================
    // 查询
    // ========================================================================

    pub fn feature_tree(&self, ctx: &TreeContext, id: TreeId) -> Option<&FeatureTree> {
        self.guard(ctx);
        self.grid.as_ref().map(|g| g.tree(id))
    }

    pub fn nearest_feature(
        &self,
        ctx: &TreeContext,
        id: TreeId,
        location: LngLat,
        max_distance: f64,
    ) -> Option<FeatureRef> {
        self.feature_tree(ctx, id)?.nearest(location, &self.ruler, max_distance)
    }

    /// `distance` 内的要素；`max_count` 为 0 时返回全部，否则按距离取最近的若干个
    pub fn feature_collection(
        &self,
        ctx: &TreeContext,
        id: TreeId,
        location: LngLat,
        distance: f64,
        max_count: usize,
    ) -> Vec<FeatureRef> {
        let Some(tree) = self.feature_tree(ctx, id) else {
            return Vec::new();
        };
        if max_count == 0 {
            tree.within(location, distance, &self.ruler)
        } else {
            tree.k_nearest(location, distance, max_count, &self.ruler)
        }
    }

    pub fn is_location_within_grid(&self, ctx: &TreeContext, location: LngLat) -> bool {
        self.guard(ctx);
        self.grid
            .as_ref()
            .is_some_and(|g| g.tile_grid.total.contains(location))
    }

    pub fn ruler(&self, ctx: &TreeContext) -> &CheapRuler {
        self.guard(ctx);
        &self.ruler
    }

    pub fn graph(&self, ctx: &TreeContext) -> &RoadGraph {
        self.guard(ctx);
        &self.graph
    }

    /// 全网格路口表
    pub fn intersections(&self, ctx: &TreeContext) -> Option<&HashMap<LocationKey, IntersectionId>> {
        self.guard(ctx);
        self.grid.as_ref().map(|g| &g.intersections)
    }

    pub fn intersection_at(&self, ctx: &TreeContext, location: LngLat) -> Option<IntersectionId> {
        self.intersections(ctx)?.get(&location.key()).copied()
    }

    pub fn central_box(&self, ctx: &TreeContext) -> Option<BoundingBox> {
        self.guard(ctx);
        self.grid.as_ref().map(|g| g.tile_grid.central)
    }

    pub fn total_box(&self, ctx: &TreeContext) -> Option<BoundingBox> {
        self.guard(ctx);
        self.grid.as_ref().map(|g| g.tile_grid.total)
    }

    pub fn tile_grid(&self, ctx: &TreeContext) -> Option<&TileGrid> {
        self.guard(ctx);
        self.grid.as_ref().map(|g| &g.tile_grid)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn stats(&self, ctx: &TreeContext) -> GridStats {
        self.guard(ctx);
        GridStats {
            generation: self.generation,
            tile_count: self.grid.as_ref().map_or(0, |g| g.tile_grid.tiles.len()),
            cached_tiles: self.cache.len(),
            way_count: self.graph.way_count(),
            intersection_count: self.graph.intersection_count(),
            joiner_count: self.graph.joiner_count(),
            tree_sizes: self.grid.as_ref().map(|g| g.tree_sizes()).unwrap_or_default(),
        }
    }
}

// ============================================================================
// 并发拉取
// ============================================================================

async fn fetch_with_retry<P: TileProvider>(
    provider: Arc<P>,
    tile: TileCoord,
    max_attempts: u32,
) -> Result<TileData, GridError> {
    let mut last = TileUnavailable::NotFound;
    for attempt in 1..=max_attempts {
        match provider.fetch_tile(tile).await {
            Ok(data) => return Ok(data),
            Err(err) => {
                log::warn!("瓦片 {} 第 {}/{} 次拉取失败: {}", tile, attempt, max_attempts, err);
                last = err;
            }
        }
    }
    Err(GridError::GridUpdateFailed {
        tile,
        attempts: max_attempts,
        source: last,
    })
}

/// 并发拉取一组瓦片，每个瓦片最多尝试 `max_attempts` 次
///
/// 任一瓦片最终失败即放弃整批；丢弃返回的 future 会中止所有未完成的拉取。
/// 结果按输入顺序返回。
pub async fn fetch_tiles<P: TileProvider>(
    provider: Arc<P>,
    tiles: Vec<TileCoord>,
    max_attempts: u32,
) -> Result<Vec<(TileCoord, TileData)>, GridError> {
    let mut set = JoinSet::new();
    for tile in tiles.iter().copied() {
        let provider = provider.clone();
        set.spawn(async move { (tile, fetch_with_retry(provider, tile, max_attempts).await) });
    }

    let mut fetched: HashMap<TileCoord, TileData> = HashMap::with_capacity(tiles.len());
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((tile, Ok(data))) => {
                fetched.insert(tile, data);
            }
            Ok((_, Err(err))) => return Err(err),
            Err(join_error) if join_error.is_cancelled() => return Err(GridError::Cancelled),
            Err(join_error) => {
                log::warn!("拉取任务异常退出: {}", join_error);
                return Err(GridError::WorkerStopped);
            }
        }
    }

    Ok(tiles
        .into_iter()
        .filter_map(|tile| fetched.remove(&tile).map(|data| (tile, data)))
        .collect())
}
