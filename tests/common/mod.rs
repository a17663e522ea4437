// 该文件是 Loufang （楼房） 项目的一部分。
// tests/common/mod.rs - 集成测试公共工具
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

#![allow(dead_code)]

use std::{
  cell::RefCell,
  path::{Path, PathBuf},
  rc::Rc,
};

use image::{Rgb, RgbImage};
use thiserror::Error;

use loufang::{
  frame::{AsNhwcFrame, NhwcBatch},
  model::{Model, RawDetections},
};

/// 标记像素的颜色，模型桩只对左上像素为该颜色的瓦片给出检测
pub const MARKER: Rgb<u8> = Rgb([200, 200, 200]);

/// 标记瓦片上返回的高分检测框 `(ymin, xmin, ymax, xmax)`
pub const MARKED_BOX: [f32; 4] = [0.25, 0.5, 0.75, 0.75];
pub const MARKED_SCORE: f32 = 0.9;
/// 同一瓦片上的低分检测，应被阈值过滤
pub const FAINT_SCORE: f32 = 0.5;

const SLOTS: usize = 3;

#[derive(Error, Debug)]
#[error("推理服务不可用")]
pub struct StubError;

/// 按瓦片内容给出固定结果的检测模型
#[derive(Default, Clone)]
pub struct MarkerModel {
  calls: Rc<RefCell<Vec<usize>>>,
  fail: bool,
}

impl MarkerModel {
  pub fn failing() -> Self {
    Self {
      fail: true,
      ..Self::default()
    }
  }

  /// 每次调用的批大小
  pub fn calls(&self) -> Rc<RefCell<Vec<usize>>> {
    self.calls.clone()
  }
}

impl Model for MarkerModel {
  type Input = NhwcBatch;
  type Output = RawDetections;
  type Error = StubError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    self.calls.borrow_mut().push(input.len());
    if self.fail {
      return Err(StubError);
    }

    let mut raw = RawDetections {
      max_detections: SLOTS,
      ..RawDetections::default()
    };
    let frame_len = input.tile_size().byte_len();
    for frame in input.as_nhwc().chunks(frame_len) {
      let marked = frame[..3] == MARKER.0;
      for slot in 0..SLOTS {
        let (bbox, score) = match (marked, slot) {
          (true, 0) => (MARKED_BOX, MARKED_SCORE),
          (true, 1) => ([0.0, 0.0, 0.1, 0.1], FAINT_SCORE),
          // 超出 num_detections 的槽位不应被读取
          _ => ([0.0, 0.0, 1.0, 1.0], 0.99),
        };
        raw.boxes.extend_from_slice(&bbox);
        raw.scores.push(score);
        raw.classes.push(1.0);
      }
      raw.num_detections.push(if marked { 2.0 } else { 0.0 });
    }
    Ok(raw)
  }
}

/// 写出 `width × height` 的 PNG，`marked` 区域填充标记颜色，其余为黑色
pub fn write_png(
  path: &Path,
  width: u32,
  height: u32,
  marked: impl Fn(u32, u32) -> bool,
) -> PathBuf {
  let image = RgbImage::from_fn(width, height, |x, y| {
    if marked(x, y) { MARKER } else { Rgb([0, 0, 0]) }
  });
  image.save(path).unwrap();
  path.to_path_buf()
}

/// 写出北向上的世界文件，`(origin_x, origin_y)` 为左上像素角点
pub fn write_world_file(image_path: &Path, origin_x: f64, origin_y: f64, pixel: f64) {
  let text = format!(
    "{}\n0.0\n0.0\n{}\n{}\n{}\n",
    pixel,
    -pixel,
    origin_x + pixel / 2.0,
    origin_y - pixel / 2.0
  );
  std::fs::write(image_path.with_extension("pgw"), text).unwrap();
}

pub fn stems(paths: &[PathBuf]) -> Vec<String> {
  paths
    .iter()
    .map(|p| p.file_stem().unwrap().to_string_lossy().into_owned())
    .collect()
}
