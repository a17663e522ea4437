// 该文件是 Loufang （楼房） 项目的一部分。
// src/geo.rs - 地理参考解析
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

use thiserror::Error;
use tracing::{debug, warn};

use crate::tile::{TileName, TileNameError};

#[cfg(feature = "geotiff")]
mod geotiff;
mod world_file;
pub use self::world_file::is_world_file;

/// GDAL 在影像旁写出的辅助文件后缀
const GDAL_SIDECAR_SUFFIXES: [&str; 3] = [".aux.xml", ".ovr", ".msk"];

/// 影像的伴随文件：世界文件，或 GDAL 写出的 `.aux.xml`、`.ovr`、`.msk`
pub fn is_sidecar(path: &Path) -> bool {
  if is_world_file(path) {
    return true;
  }
  path
    .file_name()
    .and_then(|name| name.to_str())
    .map(|name| {
      let name = name.to_ascii_lowercase();
      GDAL_SIDECAR_SUFFIXES
        .iter()
        .any(|suffix| name.ends_with(suffix))
    })
    .unwrap_or(false)
}

#[derive(Error, Debug)]
pub enum GeoError {
  #[error("无法读取影像元数据 {path}: {source}")]
  Raster {
    path: PathBuf,
    #[source]
    source: image::ImageError,
  },
  #[error("影像缺少仿射地理参考: {0}")]
  MissingTransform(PathBuf),
  #[error("地理参考无效 {path}: {reason}")]
  InvalidTransform { path: PathBuf, reason: String },
  #[cfg(feature = "geotiff")]
  #[error("GeoTIFF 标签读取错误 {path}: {source}")]
  GeoTiff {
    path: PathBuf,
    #[source]
    source: tiff::TiffError,
  },
  #[error("世界文件读取错误 {path}: {reason}")]
  WorldFile { path: PathBuf, reason: String },
  #[error("瓦片名称无法解析: {0}")]
  TileName(#[from] TileNameError),
}

/// 世界坐标点
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
  pub x: f64,
  pub y: f64,
}

impl Point {
  pub const fn new(x: f64, y: f64) -> Self {
    Self { x, y }
  }
}

/// GDAL 顺序的六参数仿射变换：
/// `[originX, pixelWidth, rowRotation, originY, columnRotation, -pixelHeight]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform(pub [f64; 6]);

impl GeoTransform {
  pub fn north_up(origin: Point, pixel_width: f64, pixel_height: f64) -> Self {
    GeoTransform([origin.x, pixel_width, 0.0, origin.y, 0.0, -pixel_height])
  }

  pub fn is_rotated(&self) -> bool {
    self.0[2] != 0.0 || self.0[4] != 0.0
  }
}

/// 单张源影像的尺寸与地理参考，每张影像处理前读取一次
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoConfig {
  pub width: u32,
  pub height: u32,
  pub pixel_width: f64,
  pub pixel_height: f64,
  pub origin_x: f64,
  pub origin_y: f64,
}

impl GeoConfig {
  /// 读取影像的像素尺寸与仿射变换。
  ///
  /// 优先使用 GeoTIFF 标签，其次查找同名世界文件（`.tfw`、`.pgw`、`.wld` 等）。
  pub fn configure(image_path: &Path) -> Result<Self, GeoError> {
    let (width, height) =
      image::image_dimensions(image_path).map_err(|source| GeoError::Raster {
        path: image_path.to_path_buf(),
        source,
      })?;

    let transform = match read_embedded_transform(image_path)? {
      Some(transform) => transform,
      None => world_file::read_sidecar(image_path)?
        .ok_or_else(|| GeoError::MissingTransform(image_path.to_path_buf()))?,
    };

    if transform.is_rotated() {
      warn!(
        "影像 {} 含旋转参数 {:?}，旋转项将被忽略",
        image_path.display(),
        transform
      );
    }

    let config = Self::from_transform(width, height, transform).map_err(|reason| {
      GeoError::InvalidTransform {
        path: image_path.to_path_buf(),
        reason,
      }
    })?;
    debug!("影像 {} 地理参考: {:?}", image_path.display(), config);
    Ok(config)
  }

  pub fn from_transform(width: u32, height: u32, transform: GeoTransform) -> Result<Self, String> {
    let [origin_x, pixel_width, _, origin_y, _, pixel_height] = transform.0;
    let pixel_width = pixel_width.abs();
    let pixel_height = pixel_height.abs();

    if !(origin_x.is_finite() && origin_y.is_finite()) {
      return Err(format!("原点坐标非有限值: ({}, {})", origin_x, origin_y));
    }
    if !(pixel_width.is_finite() && pixel_width > 0.0) {
      return Err(format!("像素宽度必须为正: {}", pixel_width));
    }
    if !(pixel_height.is_finite() && pixel_height > 0.0) {
      return Err(format!("像素高度必须为正: {}", pixel_height));
    }

    Ok(Self {
      width,
      height,
      pixel_width,
      pixel_height,
      origin_x,
      origin_y,
    })
  }

  pub fn origin(&self) -> Point {
    Point::new(self.origin_x, self.origin_y)
  }

  /// 瓦片像素 (0, 0) 在世界坐标中的位置
  pub fn tile_origin(&self, name: &TileName) -> Point {
    Point::new(
      self.origin_x + name.x_start as f64 * self.pixel_width,
      self.origin_y - name.y_start as f64 * self.pixel_height,
    )
  }

  /// 根据瓦片文件名解析其世界坐标原点
  pub fn resolve_tile_origin(&self, tile_path: &Path) -> Result<Point, GeoError> {
    let name = TileName::from_path(tile_path)?;
    Ok(self.tile_origin(&name))
  }
}

#[cfg(feature = "geotiff")]
fn read_embedded_transform(image_path: &Path) -> Result<Option<GeoTransform>, GeoError> {
  let is_tiff = image_path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "tif" | "tiff"))
    .unwrap_or(false);
  if !is_tiff {
    return Ok(None);
  }

  geotiff::read_transform(image_path).map_err(|source| GeoError::GeoTiff {
    path: image_path.to_path_buf(),
    source,
  })
}

#[cfg(not(feature = "geotiff"))]
fn read_embedded_transform(_image_path: &Path) -> Result<Option<GeoTransform>, GeoError> {
  Ok(None)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn sidecars_are_recognised() {
    assert!(is_sidecar(Path::new("/in/scene.pgw")));
    assert!(is_sidecar(Path::new("/in/scene.tif.aux.xml")));
    assert!(is_sidecar(Path::new("/in/scene.tif.ovr")));
    assert!(is_sidecar(Path::new("/in/scene.TIF.MSK")));
    assert!(!is_sidecar(Path::new("/in/scene.tif")));
    assert!(!is_sidecar(Path::new("/in/scene.xml.png")));
  }

  fn config() -> GeoConfig {
    GeoConfig::from_transform(
      600,
      600,
      GeoTransform([500_000.0, 0.5, 0.0, 4_000_000.0, 0.0, -0.25]),
    )
    .unwrap()
  }

  #[test]
  fn pixel_height_takes_magnitude() {
    let config = config();
    assert_eq!(config.pixel_width, 0.5);
    assert_eq!(config.pixel_height, 0.25);
    assert_eq!(config.origin(), Point::new(500_000.0, 4_000_000.0));
  }

  #[test]
  fn tile_origin_follows_tile_name() {
    let config = config();
    let name: TileName = "300_600_0_300".parse().unwrap();
    assert_eq!(
      config.tile_origin(&name),
      Point::new(500_000.0 + 300.0 * 0.5, 4_000_000.0)
    );
    let origin = config
      .resolve_tile_origin(Path::new("/scratch/0_300_300_600.tiff"))
      .unwrap();
    assert_eq!(origin, Point::new(500_000.0, 4_000_000.0 - 300.0 * 0.25));
  }

  #[test]
  fn resolve_rejects_untiled_names() {
    let err = config()
      .resolve_tile_origin(Path::new("/input/scene.tif"))
      .unwrap_err();
    assert!(matches!(err, GeoError::TileName(_)));
  }

  #[test]
  fn zero_pixel_size_is_invalid() {
    let transform = GeoTransform([0.0, 0.0, 0.0, 0.0, 0.0, -1.0]);
    assert!(GeoConfig::from_transform(10, 10, transform).is_err());
    let transform = GeoTransform([0.0, 1.0, 0.0, f64::NAN, 0.0, -1.0]);
    assert!(GeoConfig::from_transform(10, 10, transform).is_err());
  }
}
