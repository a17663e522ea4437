// 该文件是 Loufang （楼房） 项目的一部分。
// src/tile/name.rs - 瓦片命名编解码
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

//! 瓦片在源影像中的像素范围被编码进文件名 `{x0}_{x1}_{y0}_{y1}.<ext>`，
//! 这是瓦片化之后唯一保存地理参考信息的地方。

use std::{fmt, path::Path, str::FromStr};

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TileNameError {
  #[error("瓦片文件名格式错误: {0}")]
  Malformed(String),
  #[error("瓦片像素范围无效: {0}")]
  EmptyRange(String),
  #[error("无法从路径中取得瓦片文件名: {0}")]
  NoStem(String),
}

/// 瓦片在源影像中的像素范围，区间左闭右开
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileName {
  pub x_start: u32,
  pub x_end: u32,
  pub y_start: u32,
  pub y_end: u32,
}

impl TileName {
  pub fn new(x_start: u32, x_end: u32, y_start: u32, y_end: u32) -> Self {
    Self {
      x_start,
      x_end,
      y_start,
      y_end,
    }
  }

  /// 未填充部分的宽度
  pub fn width(&self) -> u32 {
    self.x_end - self.x_start
  }

  /// 未填充部分的高度
  pub fn height(&self) -> u32 {
    self.y_end - self.y_start
  }

  pub fn file_name(&self, extension: &str) -> String {
    format!("{}.{}", self, extension)
  }

  pub fn from_path(path: &Path) -> Result<Self, TileNameError> {
    path
      .file_stem()
      .and_then(|stem| stem.to_str())
      .ok_or_else(|| TileNameError::NoStem(path.display().to_string()))?
      .parse()
  }
}

impl fmt::Display for TileName {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{}_{}_{}_{}",
      self.x_start, self.x_end, self.y_start, self.y_end
    )
  }
}

impl FromStr for TileName {
  type Err = TileNameError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let parts = s
      .split('_')
      .map(|part| part.parse::<u32>())
      .collect::<Result<Vec<_>, _>>()
      .map_err(|_| TileNameError::Malformed(s.to_string()))?;

    let [x_start, x_end, y_start, y_end] = parts[..] else {
      return Err(TileNameError::Malformed(s.to_string()));
    };

    if x_start >= x_end || y_start >= y_end {
      return Err(TileNameError::EmptyRange(s.to_string()));
    }

    Ok(TileName::new(x_start, x_end, y_start, y_end))
  }
}
