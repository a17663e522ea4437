// 该文件是 Loufang （楼房） 项目的一部分。
// src/output.rs - 输出定义
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

use std::path::PathBuf;

use thiserror::Error;

use crate::reconstruct::Polygon;

/// 一条持久化的检测结果
#[derive(Debug, Clone, PartialEq)]
pub struct PolygonRecord {
  pub fid: i64,
  pub polygon: Polygon,
  pub score: f32,
}

/// 只追加的矢量图层
pub trait FeatureLayer {
  /// 图层中已持久化的记录数
  fn row_count(&self) -> usize;

  /// 已使用的最大 fid，空图层为 0。删除过记录的图层中可能大于 `row_count`。
  fn last_fid(&self) -> i64;

  /// 一次性写入一组记录，失败时不应留下部分写入
  fn append(&mut self, records: &[PolygonRecord]) -> Result<(), DatasetError>;
}

#[derive(Error, Debug)]
pub enum DatasetError {
  #[error("GeoPackage 错误 {path}: {source}")]
  Sqlite {
    path: PathBuf,
    #[source]
    source: rusqlite::Error,
  },
  #[error("I/O 错误 {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("几何数据无效: {0}")]
  Geometry(String),
}

mod accumulator;
pub use self::accumulator::{AccumulateError, ResultAccumulator};

mod geopackage;
pub use self::geopackage::{GeoPackageLayer, decode_geometry, encode_geometry, run_file_name};

mod memory;
pub use self::memory::MemoryLayer;
