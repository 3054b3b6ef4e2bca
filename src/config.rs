//! 网格引擎配置

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 网格引擎参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// 瓦片缩放级别
    pub zoom: u8,
    /// N×N 网格的 N (支持 1/2/3)
    pub grid_size: u32,
    /// 瓦片缓存上限
    pub max_cached_tiles: usize,
    /// 单个瓦片的最大拉取次数
    pub max_fetch_attempts: u32,
    /// 跨瓦片路口的最大缝合距离 (米)
    pub joiner_max_distance: f64,
    /// 沿路追踪的最大深度
    pub follow_depth_limit: usize,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            zoom: 15,
            grid_size: 2,
            max_cached_tiles: 10,
            max_fetch_attempts: 5,
            joiner_max_distance: 1.0,
            follow_depth_limit: 15,
        }
    }
}

impl GridConfig {
    pub fn validate(&self) -> Result<()> {
        if !(1..=3).contains(&self.grid_size) {
            bail!("grid_size 必须在 1..=3 之间, 实际为 {}", self.grid_size);
        }
        let tiles = (self.grid_size * self.grid_size) as usize;
        // 一代网格必须能完整放进缓存
        if self.max_cached_tiles < tiles {
            bail!(
                "max_cached_tiles ({}) 小于单个网格的瓦片数 ({})",
                self.max_cached_tiles,
                tiles
            );
        }
        if self.max_fetch_attempts == 0 {
            bail!("max_fetch_attempts 不能为 0");
        }
        if self.zoom > 22 {
            bail!("zoom {} 超出范围 (最大 22)", self.zoom);
        }
        if !(self.joiner_max_distance > 0.0) {
            bail!("joiner_max_distance 必须为正数");
        }
        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: GridConfig = serde_json::from_str(json).context("无法解析网格配置")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("无法打开配置文件: {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("配置文件无效: {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = GridConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_cached_tiles, 10);
        assert_eq!(config.max_fetch_attempts, 5);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = GridConfig::from_json(r#"{ "grid_size": 3 }"#).unwrap();
        assert_eq!(config.grid_size, 3);
        assert_eq!(config.zoom, 15);
    }

    #[test]
    fn test_rejects_invalid() {
        assert!(GridConfig::from_json(r#"{ "grid_size": 4 }"#).is_err());
        assert!(GridConfig::from_json(r#"{ "grid_size": 3, "max_cached_tiles": 8 }"#).is_err());
        assert!(GridConfig::from_json(r#"{ "max_fetch_attempts": 0 }"#).is_err());
        assert!(GridConfig::from_json(r#"{ "zoom": 23 }"#).is_err());
        assert!(GridConfig::from_json(r#"{ "joiner_max_distance": 0.0 }"#).is_err());
        assert!(GridConfig::from_json("not json").is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = GridConfig::load("/nonexistent/grid.json").unwrap_err();
        assert!(err.to_string().contains("无法打开配置文件"));
    }
}
