// 该文件是 Loufang （楼房） 项目的一部分。
// src/output/accumulator.rs - 检测结果累积
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
use tracing::{debug, info};

use crate::{
  config::TileSize,
  geo::{GeoError, Point},
  model::Detection,
  output::{DatasetError, FeatureLayer, PolygonRecord},
  reconstruct::to_polygon,
  task::ImageContext,
};

#[derive(Error, Debug)]
pub enum AccumulateError {
  #[error("无法确定瓦片原点: {0}")]
  Geo(#[from] GeoError),
  #[error("写入结果失败: {0}")]
  Dataset(#[from] DatasetError),
}

/// 过滤检测结果、构造多边形并追加到图层。
///
/// `fid` 从图层已用的最大 fid 之后继续递增，只有新增记录时才写盘。
pub struct ResultAccumulator<L> {
  layer: L,
  pending: Vec<PolygonRecord>,
  next_fid: i64,
  threshold: f32,
  tile_size: TileSize,
  flushes: usize,
}

impl<L: FeatureLayer> ResultAccumulator<L> {
  pub fn new(layer: L, threshold: f32, tile_size: TileSize) -> Self {
    let next_fid = layer.last_fid() + 1;
    debug!(
      "结果图层已有 {} 条记录，下一个 fid 为 {}",
      layer.row_count(),
      next_fid
    );
    Self {
      layer,
      pending: Vec::new(),
      next_fid,
      threshold,
      tile_size,
      flushes: 0,
    }
  }

  pub fn layer(&self) -> &L {
    &self.layer
  }

  pub fn next_fid(&self) -> i64 {
    self.next_fid
  }

  /// 实际写盘的次数
  pub fn flushes(&self) -> usize {
    self.flushes
  }

  /// 接收一批瓦片的检测结果，`detections[i]` 对应 `tiles[i]`。
  /// 返回保留的检测数量。任一瓦片原点解析失败时整批丢弃。
  pub fn accept(
    &mut self,
    image: &ImageContext,
    tiles: &[PathBuf],
    detections: &[Vec<Detection>],
  ) -> Result<usize, AccumulateError> {
    if let Err(e) = self.collect(image, tiles, detections) {
      self.discard_pending();
      return Err(e.into());
    }

    let kept = self.pending.len();
    self.flush()?;
    Ok(kept)
  }

  fn collect(
    &mut self,
    image: &ImageContext,
    tiles: &[PathBuf],
    detections: &[Vec<Detection>],
  ) -> Result<(), GeoError> {
    let threshold = self.threshold;
    for (tile, tile_detections) in tiles.iter().zip(detections) {
      let mut origin: Option<Point> = None;
      for detection in tile_detections.iter().filter(|d| d.score > threshold) {
        let tile_origin = match origin {
          Some(origin) => origin,
          None => *origin.insert(image.tile_origin(tile)?),
        };
        let polygon = to_polygon(tile_origin, &detection.bbox, &image.geo, self.tile_size);
        self.pending.push(PolygonRecord {
          fid: self.next_fid,
          polygon,
          score: detection.score,
        });
        self.next_fid += 1;
      }
    }
    Ok(())
  }

  fn discard_pending(&mut self) {
    self.next_fid -= self.pending.len() as i64;
    self.pending.clear();
  }

  /// 将待写记录写入图层；没有新增记录时不做任何写操作
  pub fn flush(&mut self) -> Result<bool, DatasetError> {
    if self.pending.is_empty() {
      return Ok(false);
    }

    if let Err(e) = self.layer.append(&self.pending) {
      // 图层写入是原子的，失败时回退 fid
      self.discard_pending();
      return Err(e);
    }

    info!("写入 {} 条检测记录", self.pending.len());
    self.pending.clear();
    self.flushes += 1;
    Ok(true)
  }
}
