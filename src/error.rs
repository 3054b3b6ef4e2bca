//! 错误分类
//!
//! - `TileUnavailable`: 瓦片提供者的可重试失败
//! - `GridError`: 网格更新入口与单写者上下文的失败

use thiserror::Error;

use crate::projection::TileCoord;

/// 瓦片暂不可用 (可重试)
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TileUnavailable {
    #[error("network error: {0}")]
    Network(String),
    #[error("offline archive missing: {0}")]
    MissingArchive(String),
    #[error("tile decode failed: {0}")]
    Decode(String),
    #[error("tile not found")]
    NotFound,
}

/// 网格更新与查询上下文错误
#[derive(Debug, Clone, Error)]
pub enum GridError {
    /// 某个瓦片在重试耗尽后仍不可用，旧网格保持有效
    #[error("grid update failed: tile {tile} unavailable after {attempts} attempts")]
    GridUpdateFailed {
        tile: TileCoord,
        attempts: u32,
        #[source]
        source: TileUnavailable,
    },

    /// 计划内的瓦片既不在缓存中也不在本次拉取结果中，不发布缺瓦片的网格
    #[error("grid update failed: tile {0} is neither cached nor fetched")]
    TileMissing(TileCoord),

    /// 被更新的位置请求取代
    #[error("grid update cancelled by a newer location")]
    Cancelled,

    /// 在单写者上下文之外访问网格
    #[error("context violation: {0}")]
    ContextViolation(String),

    /// worker 已退出
    #[error("grid worker stopped")]
    WorkerStopped,
}

impl GridError {
    /// 调用方可以在下一次位置更新时重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GridError::GridUpdateFailed { .. } | GridError::TileMissing(_) | GridError::Cancelled
        )
    }
}
