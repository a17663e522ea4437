// 该文件是 Loufang （楼房） 项目的一部分。
// src/frame.rs - NHWC 帧与批定义
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

use std::path::Path;

use image::{ImageReader, ImageResult, RgbImage};
use thiserror::Error;

use crate::config::TileSize;

const RGB_CHANNELS: usize = 3;

/// 读取影像并转换为 8 位 RGB，航拍大图需要解除解码器的尺寸限制
pub fn read_rgb_image(path: &Path) -> ImageResult<RgbImage> {
  let mut reader = ImageReader::open(path)?.with_guessed_format()?;
  reader.no_limits();
  Ok(reader.decode()?.to_rgb8())
}

pub trait AsNhwcFrame {
  fn as_nhwc(&self) -> &[u8];
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("帧尺寸不匹配: 期望 {expected}, 实际 {actual}")]
pub struct FrameShapeError {
  pub expected: TileSize,
  pub actual: TileSize,
}

#[derive(Debug, Clone)]
pub struct RgbNhwcFrame {
  width: usize,
  height: usize,
  data: Box<[u8]>,
}

impl RgbNhwcFrame {
  pub fn with_shape(height: usize, width: usize) -> Self {
    let data = vec![0u8; RGB_CHANNELS * width * height].into_boxed_slice();
    Self {
      width,
      height,
      data,
    }
  }

  pub fn size(&self) -> TileSize {
    TileSize::new(self.width as u32, self.height as u32)
  }
}

impl From<RgbImage> for RgbNhwcFrame {
  fn from(image: RgbImage) -> Self {
    let (width, height) = image.dimensions();
    // RgbImage 的内存布局本身就是 HWC
    Self {
      width: width as usize,
      height: height as usize,
      data: image.into_raw().into_boxed_slice(),
    }
  }
}

impl AsNhwcFrame for RgbNhwcFrame {
  fn as_nhwc(&self) -> &[u8] {
    &self.data
  }
}

/// 按 NHWC 排列堆叠的一批瓦片，作为模型的单个输入
#[derive(Debug, Clone)]
pub struct NhwcBatch {
  tile_size: TileSize,
  len: usize,
  data: Vec<u8>,
}

impl NhwcBatch {
  pub fn with_capacity(tile_size: TileSize, capacity: usize) -> Self {
    Self {
      tile_size,
      len: 0,
      data: Vec::with_capacity(tile_size.byte_len() * capacity),
    }
  }

  pub fn push(&mut self, frame: &RgbNhwcFrame) -> Result<(), FrameShapeError> {
    if frame.size() != self.tile_size {
      return Err(FrameShapeError {
        expected: self.tile_size,
        actual: frame.size(),
      });
    }
    self.data.extend_from_slice(frame.as_nhwc());
    self.len += 1;
    Ok(())
  }

  pub fn len(&self) -> usize {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  pub fn tile_size(&self) -> TileSize {
    self.tile_size
  }

  /// `[N, H, W, C]`
  pub fn shape(&self) -> [usize; 4] {
    [
      self.len,
      self.tile_size.height as usize,
      self.tile_size.width as usize,
      RGB_CHANNELS,
    ]
  }
}

impl AsNhwcFrame for NhwcBatch {
  fn as_nhwc(&self) -> &[u8] {
    &self.data
  }
}
