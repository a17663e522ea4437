// 该文件是 Loufang （楼房） 项目的一部分。
// src/config.rs - 流水线配置
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::{fmt, path::PathBuf, str::FromStr};

use thiserror::Error;

/// 模型输入的瓦片边长（像素）
pub const DEFAULT_TILE_EDGE: u32 = 300;
/// 置信度阈值，严格大于该值的检测才会保留
pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.74;
/// 批大小经验系数：每 GiB 主机内存对应的瓦片数
///
/// 该系数假设推理受主机内存约束；在 GPU 或量化模型上可能不成立，
/// 此时应通过 [`BatchSizing::Fixed`] 覆盖。
pub const DEFAULT_MEMORY_RATIO: f64 = 28.0 / 15.0;
/// 输出图层名称
pub const DEFAULT_LAYER_NAME: &str = "boxes";
/// 临时瓦片文件扩展名
pub const DEFAULT_TILE_EXTENSION: &str = "tiff";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileSize {
  pub width: u32,
  pub height: u32,
}

impl TileSize {
  pub const fn new(width: u32, height: u32) -> Self {
    Self { width, height }
  }

  pub const fn square(edge: u32) -> Self {
    Self::new(edge, edge)
  }

  /// 宽或高为零
  pub fn is_empty(&self) -> bool {
    self.width == 0 || self.height == 0
  }

  /// 单个瓦片的 RGB 字节数
  pub fn byte_len(&self) -> usize {
    self.width as usize * self.height as usize * 3
  }
}

impl Default for TileSize {
  fn default() -> Self {
    Self::square(DEFAULT_TILE_EDGE)
  }
}

impl fmt::Display for TileSize {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}x{}", self.width, self.height)
  }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TileSizeError {
  #[error("瓦片尺寸格式错误: {0}，应为 WxH 或单个边长")]
  Format(String),
  #[error("瓦片尺寸必须大于 0")]
  Zero,
}

impl FromStr for TileSize {
  type Err = TileSizeError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let parse = |v: &str| {
      v.trim()
        .parse::<u32>()
        .map_err(|_| TileSizeError::Format(s.to_string()))
    };
    let size = match s.split_once(['x', 'X']) {
      Some((w, h)) => TileSize::new(parse(w)?, parse(h)?),
      None => TileSize::square(parse(s)?),
    };
    if size.width == 0 || size.height == 0 {
      return Err(TileSizeError::Zero);
    }
    Ok(size)
  }
}

/// 批大小策略
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BatchSizing {
  /// 按主机总内存估算：`floor(GiB × ratio)`
  Memory { ratio: f64 },
  /// 固定批大小
  Fixed(usize),
}

impl Default for BatchSizing {
  fn default() -> Self {
    BatchSizing::Memory {
      ratio: DEFAULT_MEMORY_RATIO,
    }
  }
}

/// 流水线配置
#[derive(Debug, Clone)]
pub struct PipelineConfig {
  pub input_dir: PathBuf,
  pub output_dir: PathBuf,
  pub scratch_dir: PathBuf,
  pub tile_size: TileSize,
  pub score_threshold: f32,
  pub batch_sizing: BatchSizing,
  pub tile_extension: String,
  pub layer: String,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      input_dir: PathBuf::from("input_images"),
      output_dir: PathBuf::from("output_gpkg"),
      scratch_dir: PathBuf::from("tmp"),
      tile_size: TileSize::default(),
      score_threshold: DEFAULT_SCORE_THRESHOLD,
      batch_sizing: BatchSizing::default(),
      tile_extension: DEFAULT_TILE_EXTENSION.to_string(),
      layer: DEFAULT_LAYER_NAME.to_string(),
    }
  }
}

impl PipelineConfig {
  pub fn with_input_dir(mut self, dir: impl Into<PathBuf>) -> Self {
    self.input_dir = dir.into();
    self
  }

  pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
    self.output_dir = dir.into();
    self
  }

  pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
    self.scratch_dir = dir.into();
    self
  }

  pub fn with_tile_size(mut self, tile_size: TileSize) -> Self {
    self.tile_size = tile_size;
    self
  }

  pub fn with_score_threshold(mut self, threshold: f32) -> Self {
    self.score_threshold = threshold;
    self
  }

  pub fn with_batch_sizing(mut self, sizing: BatchSizing) -> Self {
    self.batch_sizing = sizing;
    self
  }

  pub fn with_tile_extension(mut self, extension: impl Into<String>) -> Self {
    self.tile_extension = extension.into();
    self
  }
}
