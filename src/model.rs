// 该文件是 Loufang （楼房） 项目的一部分。
// src/model.rs - 检测模型
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

use crate::frame::FrameShapeError;

/// 冻结检测图的输入名
pub const INPUT_TENSOR: &str = "image_tensor";
/// 冻结检测图的四个输出名，顺序与 [`RawDetections`] 字段一致
pub const OUTPUT_TENSORS: [&str; 4] = [
  "detection_boxes",
  "detection_scores",
  "detection_classes",
  "num_detections",
];

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;

  /// 模型一次可接受的最大批大小，`None` 表示不限
  fn max_batch(&self) -> Option<usize> {
    None
  }
}

#[derive(Error, Debug)]
pub enum InferenceError {
  #[error("推理后端错误: {0}")]
  Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
  #[error("模型输出格式错误: {0}")]
  MalformedOutput(String),
  #[error("无法读取瓦片 {path}: {source}")]
  TileLoad {
    path: PathBuf,
    #[source]
    source: image::ImageError,
  },
  #[error("瓦片尺寸不符合模型输入 {path}: {source}")]
  TileShape {
    path: PathBuf,
    #[source]
    source: FrameShapeError,
  },
}

/// 相对瓦片的归一化检测框，取值范围 `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedBox {
  pub ymin: f32,
  pub xmin: f32,
  pub ymax: f32,
  pub xmax: f32,
}

impl From<[f32; 4]> for NormalizedBox {
  fn from([ymin, xmin, ymax, xmax]: [f32; 4]) -> Self {
    Self {
      ymin,
      xmin,
      ymax,
      xmax,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
  pub bbox: NormalizedBox,
  pub score: f32,
  /// 模型给出的类别，流水线不使用
  pub class_id: u32,
}

/// 检测模型一次调用的原始输出
///
/// - `boxes`: `[N, K, 4]`，每个框为 `(ymin, xmin, ymax, xmax)`
/// - `scores`: `[N, K]`
/// - `classes`: `[N, K]`
/// - `num_detections`: `[N]`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawDetections {
  pub boxes: Vec<f32>,
  pub scores: Vec<f32>,
  pub classes: Vec<f32>,
  pub num_detections: Vec<f32>,
  /// 每个瓦片的检测槽位数 `K`
  pub max_detections: usize,
}

impl RawDetections {
  /// 校验形状并拆分为逐瓦片的检测列表，顺序与输入批一致
  pub fn into_detections(self, batch_len: usize) -> Result<Vec<Vec<Detection>>, InferenceError> {
    let k = self.max_detections;
    let malformed = |what: &str, expected: usize, actual: usize| {
      InferenceError::MalformedOutput(format!(
        "{} 长度应为 {}, 实际为 {}",
        what, expected, actual
      ))
    };

    if self.num_detections.len() != batch_len {
      return Err(malformed(
        OUTPUT_TENSORS[3],
        batch_len,
        self.num_detections.len(),
      ));
    }
    if self.scores.len() != batch_len * k {
      return Err(malformed(OUTPUT_TENSORS[1], batch_len * k, self.scores.len()));
    }
    if self.classes.len() != batch_len * k {
      return Err(malformed(OUTPUT_TENSORS[2], batch_len * k, self.classes.len()));
    }
    if self.boxes.len() != batch_len * k * 4 {
      return Err(malformed(OUTPUT_TENSORS[0], batch_len * k * 4, self.boxes.len()));
    }

    let mut tiles = Vec::with_capacity(batch_len);
    for (tile, &count) in self.num_detections.iter().enumerate() {
      if !count.is_finite() || count < 0.0 || count as usize > k {
        return Err(InferenceError::MalformedOutput(format!(
          "第 {} 个瓦片的检测数量无效: {}",
          tile, count
        )));
      }

      let count = count as usize;
      let mut detections = Vec::with_capacity(count);
      for slot in tile * k..tile * k + count {
        let coords: [f32; 4] = [
          self.boxes[slot * 4],
          self.boxes[slot * 4 + 1],
          self.boxes[slot * 4 + 2],
          self.boxes[slot * 4 + 3],
        ];
        let score = self.scores[slot];
        if !score.is_finite() || coords.iter().any(|c| !c.is_finite()) {
          return Err(InferenceError::MalformedOutput(format!(
            "第 {} 个瓦片存在非有限值: 框 {:?}, 置信度 {}",
            tile, coords, score
          )));
        }
        detections.push(Detection {
          bbox: NormalizedBox::from(coords),
          score,
          class_id: self.classes[slot] as u32,
        });
      }
      tiles.push(detections);
    }

    Ok(tiles)
  }
}

mod batch;
pub use self::batch::{BatchRunner, TileBatch, batch_size_for_memory, resolve_batch_size};

#[cfg(feature = "model_tract")]
mod tract;
#[cfg(feature = "model_tract")]
pub use self::tract::{TractDetector, TractDetectorBuilder, TractDetectorError};
