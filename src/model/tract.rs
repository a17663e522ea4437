// 该文件是 Loufang （楼房） 项目的一部分。
// src/model/tract.rs - 基于 tract 的 ONNX 检测模型
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
use tracing::{debug, info, warn};
use tract_onnx::prelude::*;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  config::TileSize,
  frame::{AsNhwcFrame, NhwcBatch},
  model::{INPUT_TENSOR, Model, OUTPUT_TENSORS, RawDetections},
};

/// 编译时允许的最大批容量
pub const MAX_CAPACITY: usize = 256;

#[derive(Error, Debug)]
pub enum TractDetectorError {
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("模型缺少输出 {0}")]
  MissingOutput(&'static str),
  #[error("批大小 {len} 超过模型容量 {capacity}")]
  BatchOverflow { len: usize, capacity: usize },
  #[error("tract 错误: {0}")]
  Tract(#[from] TractError),
}

/// 以固定批容量编译的冻结检测图（由 TensorFlow 导出为 ONNX）
pub struct TractDetector {
  plan: TypedRunnableModel<TypedModel>,
  capacity: usize,
  tile_size: TileSize,
  /// 按 [`OUTPUT_TENSORS`] 顺序排列的输出下标
  outputs: [usize; 4],
}

pub struct TractDetectorBuilder {
  model_path: PathBuf,
  tile_size: TileSize,
  capacity: usize,
}

impl FromUrlWithScheme for TractDetectorBuilder {
  const SCHEME: &'static str = "tract";
}

impl FromUrl for TractDetectorBuilder {
  type Error = TractDetectorError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(TractDetectorError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    Ok(TractDetectorBuilder {
      model_path: PathBuf::from(url.path()),
      tile_size: TileSize::default(),
      capacity: 1,
    })
  }
}

impl TractDetectorBuilder {
  pub fn tile_size(mut self, tile_size: TileSize) -> Self {
    self.tile_size = tile_size;
    self
  }

  /// 批容量，限制在 `1..=MAX_CAPACITY`
  pub fn capacity(mut self, capacity: usize) -> Self {
    if capacity > MAX_CAPACITY {
      warn!("批容量 {} 过大，降为 {}", capacity, MAX_CAPACITY);
    }
    self.capacity = capacity.clamp(1, MAX_CAPACITY);
    self
  }

  pub fn build(self) -> Result<TractDetector, TractDetectorError> {
    padded_len(self.capacity, self.tile_size)?;
    info!("加载模型文件: {}", self.model_path.display());
    let model = tract_onnx::onnx().model_for_path(&self.model_path)?;

    if let Some(input) = model.input_outlets()?.first() {
      let name = &model.node(input.node).name;
      if name != INPUT_TENSOR {
        warn!("模型输入名为 {}，期望 {}", name, INPUT_TENSOR);
      }
    }

    let labels: Vec<String> = model
      .output_outlets()?
      .iter()
      .map(|outlet| {
        model
          .outlet_label(*outlet)
          .map(str::to_string)
          .unwrap_or_else(|| model.node(outlet.node).name.clone())
      })
      .collect();
    debug!("模型输出: {:?}", labels);

    let mut outputs = [0usize; 4];
    for (slot, name) in OUTPUT_TENSORS.iter().enumerate() {
      outputs[slot] = labels
        .iter()
        .position(|label| label.starts_with(name))
        .ok_or(TractDetectorError::MissingOutput(name))?;
    }

    let shape = [
      self.capacity,
      self.tile_size.height as usize,
      self.tile_size.width as usize,
      3,
    ];
    info!("编译模型，输入形状 {:?}", shape);
    let plan = model
      .with_input_fact(0, u8::fact(shape).into())?
      .into_optimized()?
      .into_runnable()?;
    info!("模型加载完成");

    Ok(TractDetector {
      plan,
      capacity: self.capacity,
      tile_size: self.tile_size,
      outputs,
    })
  }
}

/// 按容量补齐后的输入字节数
fn padded_len(capacity: usize, tile_size: TileSize) -> Result<usize, TractDetectorError> {
  (tile_size.width as usize)
    .checked_mul(tile_size.height as usize)
    .and_then(|pixels| pixels.checked_mul(3))
    .and_then(|frame| frame.checked_mul(capacity))
    .ok_or(TractDetectorError::BatchOverflow {
      len: capacity,
      capacity: MAX_CAPACITY,
    })
}

fn flatten(value: &TValue, take: usize) -> Result<Vec<f32>, TractDetectorError> {
  let view = value.to_array_view::<f32>()?;
  Ok(view.iter().copied().take(take).collect())
}

impl Model for TractDetector {
  type Input = NhwcBatch;
  type Output = RawDetections;
  type Error = TractDetectorError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let len = input.len();
    if len > self.capacity {
      return Err(TractDetectorError::BatchOverflow {
        len,
        capacity: self.capacity,
      });
    }

    // 模型以固定批容量编译，不足部分补零，输出只取前 len 个
    let mut data = input.as_nhwc().to_vec();
    data.resize(padded_len(self.capacity, self.tile_size)?, 0);
    let mut shape = input.shape();
    shape[0] = self.capacity;
    let tensor = Tensor::from_shape(&shape, &data)?;

    debug!("执行模型推理");
    let result = self.plan.run(tvec!(tensor.into()))?;

    let [boxes_idx, scores_idx, classes_idx, num_idx] = self.outputs;
    let max_detections = result[scores_idx].shape().get(1).copied().unwrap_or(0);

    Ok(RawDetections {
      boxes: flatten(&result[boxes_idx], len * max_detections * 4)?,
      scores: flatten(&result[scores_idx], len * max_detections)?,
      classes: flatten(&result[classes_idx], len * max_detections)?,
      num_detections: flatten(&result[num_idx], len)?,
      max_detections,
    })
  }

  fn max_batch(&self) -> Option<usize> {
    Some(self.capacity)
  }
}
