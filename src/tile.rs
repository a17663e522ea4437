// 该文件是 Loufang （楼房） 项目的一部分。
// src/tile.rs - 影像瓦片化
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

use std::path::{Path, PathBuf};

use image::{RgbImage, imageops};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  config::{DEFAULT_TILE_EXTENSION, TileSize},
  frame::read_rgb_image,
};

pub mod name;
pub use self::name::{TileName, TileNameError};

#[derive(Error, Debug)]
pub enum TileError {
  #[error("无法读取影像 {path}: {source}")]
  ImageLoad {
    path: PathBuf,
    #[source]
    source: image::ImageError,
  },
  #[error("无法写入瓦片 {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: image::ImageError,
  },
  #[error("临时目录不可用 {path}: {source}")]
  Scratch {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("瓦片尺寸不能为零: {0}")]
  EmptyTileSize(TileSize),
}

/// 将源影像切分为固定尺寸的瓦片并写入临时目录
#[derive(Debug, Clone)]
pub struct Tiler {
  scratch_dir: PathBuf,
  tile_size: TileSize,
  extension: String,
}

impl Tiler {
  pub fn new(scratch_dir: impl Into<PathBuf>, tile_size: TileSize) -> Self {
    Self {
      scratch_dir: scratch_dir.into(),
      tile_size,
      extension: DEFAULT_TILE_EXTENSION.to_string(),
    }
  }

  pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
    self.extension = extension.into();
    self
  }

  /// 按先 x 后 y 的顺序列出覆盖 `width × height` 的瓦片范围。
  /// 瓦片尺寸为零时返回空列表。
  pub fn plan(width: u32, height: u32, tile_size: TileSize) -> Vec<TileName> {
    let mut names = Vec::new();
    if tile_size.is_empty() {
      return names;
    }
    for x_start in (0..width).step_by(tile_size.width as usize) {
      for y_start in (0..height).step_by(tile_size.height as usize) {
        names.push(TileName::new(
          x_start,
          x_start.saturating_add(tile_size.width).min(width),
          y_start,
          y_start.saturating_add(tile_size.height).min(height),
        ));
      }
    }
    names
  }

  /// 切分影像，返回的瓦片路径顺序与推理结果按位置一一对应。
  ///
  /// 影像尺寸恰好等于瓦片尺寸时不做切分，直接返回原路径。
  pub fn tile(&self, image_path: &Path) -> Result<Vec<PathBuf>, TileError> {
    if self.tile_size.is_empty() {
      return Err(TileError::EmptyTileSize(self.tile_size));
    }

    let load_error = |source| TileError::ImageLoad {
      path: image_path.to_path_buf(),
      source,
    };

    let (width, height) = image::image_dimensions(image_path).map_err(load_error)?;
    if TileSize::new(width, height) == self.tile_size {
      debug!("影像尺寸等于瓦片尺寸，跳过切分: {}", image_path.display());
      return Ok(vec![image_path.to_path_buf()]);
    }

    let image = read_rgb_image(image_path).map_err(load_error)?;
    std::fs::create_dir_all(&self.scratch_dir).map_err(|source| TileError::Scratch {
      path: self.scratch_dir.clone(),
      source,
    })?;

    let names = Self::plan(width, height, self.tile_size);
    let mut paths = Vec::with_capacity(names.len());
    for name in names {
      let tile = self.cut(&image, &name);
      let path = self.scratch_dir.join(name.file_name(&self.extension));
      tile.save(&path).map_err(|source| TileError::Write {
        path: path.clone(),
        source,
      })?;
      paths.push(path);
    }

    info!(
      "影像 {} ({}x{}) 切分为 {} 个瓦片",
      image_path.display(),
      width,
      height,
      paths.len()
    );
    Ok(paths)
  }

  fn cut(&self, image: &RgbImage, name: &TileName) -> RgbImage {
    let crop = imageops::crop_imm(image, name.x_start, name.y_start, name.width(), name.height())
      .to_image();
    if crop.dimensions() == (self.tile_size.width, self.tile_size.height) {
      return crop;
    }

    // 边缘瓦片左上对齐，其余部分补零
    let mut canvas = RgbImage::new(self.tile_size.width, self.tile_size.height);
    imageops::replace(&mut canvas, &crop, 0, 0);
    canvas
  }

  /// 清空临时目录中的文件，删除失败只记录警告。返回删除的文件数。
  pub fn purge(&self) -> usize {
    let entries = match std::fs::read_dir(&self.scratch_dir) {
      Ok(entries) => entries,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
      Err(e) => {
        warn!("无法读取临时目录 {}: {}", self.scratch_dir.display(), e);
        return 0;
      }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
      let path = entry.path();
      if !path.is_file() {
        continue;
      }
      match std::fs::remove_file(&path) {
        Ok(()) => removed += 1,
        Err(e) => warn!("无法删除临时瓦片 {}: {}", path.display(), e),
      }
    }
    debug!("已清理 {} 个临时瓦片", removed);
    removed
  }
}
