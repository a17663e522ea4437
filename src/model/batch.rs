// 该文件是 Loufang （楼房） 项目的一部分。
// src/model/batch.rs - 批量推理
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

use sysinfo::System;
use tracing::{debug, info};

use crate::{
  config::{BatchSizing, TileSize},
  frame::{NhwcBatch, RgbNhwcFrame, read_rgb_image},
  model::{Detection, InferenceError, Model, RawDetections},
};

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// `floor(total_gib × ratio)`，至少为 1
pub fn batch_size_for_memory(total_gib: f64, ratio: f64) -> usize {
  ((total_gib * ratio).floor() as usize).max(1)
}

pub fn resolve_batch_size(sizing: &BatchSizing) -> usize {
  match *sizing {
    BatchSizing::Fixed(size) => size.max(1),
    BatchSizing::Memory { ratio } => {
      let mut system = System::new();
      system.refresh_memory();
      let total_gib = system.total_memory() as f64 / GIB;
      let size = batch_size_for_memory(total_gib, ratio);
      debug!("主机内存 {:.2} GiB, 批大小 {}", total_gib, size);
      size
    }
  }
}

/// 一批瓦片及其检测结果，`detections[i]` 对应 `paths[i]`
#[derive(Debug)]
pub struct TileBatch<'p> {
  pub paths: &'p [PathBuf],
  pub detections: Vec<Vec<Detection>>,
}

/// 将瓦片按批送入模型，保持输入顺序
pub struct BatchRunner<'m, M> {
  model: &'m M,
  tile_size: TileSize,
  batch_size: usize,
}

impl<'m, M> BatchRunner<'m, M>
where
  M: Model<Input = NhwcBatch, Output = RawDetections>,
  M::Error: std::error::Error + Send + Sync + 'static,
{
  pub fn new(model: &'m M, tile_size: TileSize, batch_size: usize) -> Self {
    let batch_size = match model.max_batch() {
      Some(limit) if limit < batch_size => {
        debug!("批大小 {} 超过模型上限 {}，已截断", batch_size, limit);
        limit
      }
      _ => batch_size,
    }
    .max(1);

    Self {
      model,
      tile_size,
      batch_size,
    }
  }

  pub fn batch_size(&self) -> usize {
    self.batch_size
  }

  /// 逐批推理；某一批失败时返回错误，由调用方决定是否继续
  pub fn run<'a>(
    &'a self,
    tile_paths: &'a [PathBuf],
  ) -> impl Iterator<Item = Result<TileBatch<'a>, InferenceError>> + 'a {
    tile_paths.chunks(self.batch_size).map(move |paths| {
      self
        .run_batch(paths)
        .map(|detections| TileBatch { paths, detections })
    })
  }

  fn run_batch(&self, paths: &[PathBuf]) -> Result<Vec<Vec<Detection>>, InferenceError> {
    let mut batch = NhwcBatch::with_capacity(self.tile_size, paths.len());
    for path in paths {
      let image = read_rgb_image(path).map_err(|source| InferenceError::TileLoad {
        path: path.clone(),
        source,
      })?;
      batch
        .push(&RgbNhwcFrame::from(image))
        .map_err(|source| InferenceError::TileShape {
          path: path.clone(),
          source,
        })?;
    }

    let now = std::time::Instant::now();
    let output = self
      .model
      .infer(&batch)
      .map_err(|e| InferenceError::Backend(Box::new(e)))?;
    info!("{} 个瓦片推理完成，耗时: {:.2?}", batch.len(), now.elapsed());

    output.into_detections(batch.len())
  }
}
