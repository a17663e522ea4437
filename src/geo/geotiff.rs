// 该文件是 Loufang （楼房） 项目的一部分。
// src/geo/geotiff.rs - GeoTIFF 标签读取
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

use std::{
  fs::File,
  io::{BufReader, Read, Seek},
  path::Path,
};

use tiff::{TiffResult, decoder::Decoder, tags::Tag};
use tracing::debug;

use super::GeoTransform;

const GT_RASTER_TYPE_GEO_KEY: u16 = 1025;
const RASTER_PIXEL_IS_POINT: u16 = 2;

/// `GeoKeyDirectoryTag` 中 `GTRasterTypeGeoKey` 是否为 `RasterPixelIsPoint`。
///
/// 目录以 4 个 short 的头部开始，其后每个键占 4 个 short：
/// `KeyID, TIFFTagLocation, Count, Value`。缺省为 `RasterPixelIsArea`。
fn raster_is_point<R: Read + Seek>(decoder: &mut Decoder<R>) -> TiffResult<bool> {
  let Some(directory) = decoder.find_tag(Tag::GeoKeyDirectoryTag)? else {
    return Ok(false);
  };
  let keys = directory.into_u16_vec()?;
  Ok(keys.chunks_exact(4).skip(1).any(|key| {
    key[0] == GT_RASTER_TYPE_GEO_KEY && key[1] == 0 && key[3] == RASTER_PIXEL_IS_POINT
  }))
}

/// 像素点模式下变换锚定在像素中心，平移半个像素回到左上角点
fn shift_to_corner(mut transform: GeoTransform) -> GeoTransform {
  let t = &mut transform.0;
  t[0] -= 0.5 * t[1] + 0.5 * t[2];
  t[3] -= 0.5 * t[4] + 0.5 * t[5];
  debug!("RasterPixelIsPoint，原点平移至 ({}, {})", t[0], t[3]);
  transform
}

/// 从 GeoTIFF 标签读取仿射变换。
///
/// `ModelTransformationTag` 优先；否则使用 `ModelTiepointTag` 与
/// `ModelPixelScaleTag` 的组合。两者都没有时返回 `None`。
/// 返回的原点总是左上像素的角点，`RasterPixelIsPoint` 会被换算。
pub fn read_transform(path: &Path) -> TiffResult<Option<GeoTransform>> {
  let mut decoder = Decoder::new(BufReader::new(File::open(path)?))?;
  let transform = read_raw_transform(&mut decoder)?;
  if transform.is_some() && raster_is_point(&mut decoder)? {
    return Ok(transform.map(shift_to_corner));
  }
  Ok(transform)
}

fn read_raw_transform<R: Read + Seek>(
  decoder: &mut Decoder<R>,
) -> TiffResult<Option<GeoTransform>> {
  if let Some(matrix) = decoder.find_tag(Tag::ModelTransformationTag)? {
    let m = matrix.into_f64_vec()?;
    if m.len() >= 16 {
      debug!("使用 ModelTransformationTag: {:?}", &m[..8]);
      return Ok(Some(GeoTransform([m[3], m[0], m[1], m[7], m[4], m[5]])));
    }
  }

  let tiepoint = decoder
    .find_tag(Tag::ModelTiepointTag)?
    .map(|value| value.into_f64_vec())
    .transpose()?;
  let scale = decoder
    .find_tag(Tag::ModelPixelScaleTag)?
    .map(|value| value.into_f64_vec())
    .transpose()?;

  match (tiepoint, scale) {
    (Some(tp), Some(sc)) if tp.len() >= 6 && sc.len() >= 2 => {
      // 锚点 (i, j) 像素对应世界坐标 (x, y)
      let (i, j, x, y) = (tp[0], tp[1], tp[3], tp[4]);
      debug!("使用 ModelTiepointTag {:?} 与 ModelPixelScaleTag {:?}", tp, sc);
      Ok(Some(GeoTransform([
        x - i * sc[0],
        sc[0],
        0.0,
        y + j * sc[1],
        0.0,
        -sc[1],
      ])))
    }
    _ => Ok(None),
  }
}
