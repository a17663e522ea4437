// 该文件是 Loufang （楼房） 项目的一部分。
// src/reconstruct.rs - 检测框到世界坐标多边形
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

use crate::{
  config::TileSize,
  geo::{GeoConfig, Point},
  model::NormalizedBox,
};

/// 闭合四边形，`ring[4] == ring[0]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Polygon {
  pub ring: [Point; 5],
}

impl Polygon {
  pub fn from_corners(corners: [Point; 4]) -> Self {
    let [p1, p2, p3, p4] = corners;
    Self {
      ring: [p1, p2, p3, p4, p1],
    }
  }

  pub fn corners(&self) -> [Point; 4] {
    [self.ring[0], self.ring[1], self.ring[2], self.ring[3]]
  }

  /// `(min_x, max_x, min_y, max_y)`
  pub fn envelope(&self) -> (f64, f64, f64, f64) {
    self.ring.iter().fold(
      (f64::INFINITY, f64::NEG_INFINITY, f64::INFINITY, f64::NEG_INFINITY),
      |(min_x, max_x, min_y, max_y), p| {
        (min_x.min(p.x), max_x.max(p.x), min_y.min(p.y), max_y.max(p.y))
      },
    )
  }
}

/// 将相对于瓦片的归一化检测框转换为世界坐标下的四边形。
///
/// 角点取像素中心（偏移半个像素），顺序为
/// 左下 → 左上 → 右上 → 右下。结果坐标按影像像素尺寸 `±W`/`±H` 截断。
pub fn to_polygon(
  tile_origin: Point,
  bbox: &NormalizedBox,
  geo: &GeoConfig,
  tile_size: TileSize,
) -> Polygon {
  let pw = geo.pixel_width;
  let ph = geo.pixel_height;
  let sx = tile_size.width as f64;
  let sy = tile_size.height as f64;

  let x = |t: f32| tile_origin.x + (pw * t as f64 * sx + pw / 2.0);
  let y = |t: f32| tile_origin.y - (ph * t as f64 * sy + ph / 2.0);

  let corners = [
    Point::new(x(bbox.xmin), y(bbox.ymax)),
    Point::new(x(bbox.xmin), y(bbox.ymin)),
    Point::new(x(bbox.xmax), y(bbox.ymin)),
    Point::new(x(bbox.xmax), y(bbox.ymax)),
  ]
  .map(|p| clamp_point(p, geo.width as f64, geo.height as f64));

  Polygon::from_corners(corners)
}

fn clamp_point(p: Point, bound_x: f64, bound_y: f64) -> Point {
  Point::new(clamp_signed(p.x, bound_x), clamp_signed(p.y, bound_y))
}

fn clamp_signed(value: f64, bound: f64) -> f64 {
  if value.abs() > bound {
    bound.copysign(value)
  } else {
    value
  }
}
