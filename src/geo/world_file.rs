// 该文件是 Loufang （楼房） 项目的一部分。
// src/geo/world_file.rs - ESRI 世界文件读取
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

use tracing::debug;

use super::{GeoError, GeoTransform};

const WORLD_FILE_EXTENSIONS: [&str; 13] = [
  "tfw", "tifw", "tiffw", "pgw", "pngw", "jgw", "jpgw", "jpegw", "bpw", "bmpw", "gfw", "gifw",
  "wld",
];

pub fn is_world_file(path: &Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| WORLD_FILE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
    .unwrap_or(false)
}

/// 影像可能对应的世界文件路径，按 GDAL 的查找顺序排列
fn sidecar_candidates(image_path: &Path) -> Vec<PathBuf> {
  let Some(ext) = image_path.extension().and_then(|ext| ext.to_str()) else {
    return vec![image_path.with_extension("wld")];
  };

  let mut candidates = Vec::with_capacity(3);
  let mut chars = ext.chars();
  if let (Some(first), Some(last)) = (chars.next(), chars.next_back()) {
    candidates.push(image_path.with_extension(format!("{}{}w", first, last)));
  }
  candidates.push(image_path.with_extension(format!("{}w", ext)));
  candidates.push(image_path.with_extension("wld"));
  candidates
}

pub fn read_sidecar(image_path: &Path) -> Result<Option<GeoTransform>, GeoError> {
  for candidate in sidecar_candidates(image_path) {
    if !candidate.is_file() {
      continue;
    }
    debug!("使用世界文件: {}", candidate.display());
    let text = std::fs::read_to_string(&candidate).map_err(|e| GeoError::WorldFile {
      path: candidate.clone(),
      reason: e.to_string(),
    })?;
    return parse(&text)
      .map(Some)
      .map_err(|reason| GeoError::WorldFile {
        path: candidate,
        reason,
      });
  }
  Ok(None)
}

/// 世界文件六行依次为 A, D, B, E, C, F，其中 (C, F) 是左上像素中心。
/// 转换为以左上像素角点为原点的 GDAL 变换。
pub fn parse(text: &str) -> Result<GeoTransform, String> {
  let values = text
    .lines()
    .map(str::trim)
    .filter(|line| !line.is_empty())
    .map(|line| {
      line
        .parse::<f64>()
        .map_err(|_| format!("无法解析数值: {}", line))
    })
    .collect::<Result<Vec<_>, _>>()?;

  let [a, d, b, e, c, f] = values[..] else {
    return Err(format!("世界文件应包含 6 个数值，实际 {}", values.len()));
  };

  Ok(GeoTransform([
    c - a / 2.0 - b / 2.0,
    a,
    b,
    f - d / 2.0 - e / 2.0,
    d,
    e,
  ]))
}
