// 该文件是 Loufang （楼房） 项目的一部分。
// tests/tiling.rs - 切分与地理参考测试
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

mod common;

use approx::assert_relative_eq;
use tempfile::tempdir;

use loufang::{
  config::TileSize,
  geo::{GeoConfig, GeoError, Point},
  tile::{TileError, TileName, Tiler},
};

use common::{stems, write_png, write_world_file};

#[test]
fn image_matching_tile_size_is_not_cut() {
  let dir = tempdir().unwrap();
  let image = write_png(&dir.path().join("single.png"), 300, 300, |_, _| true);
  let scratch = dir.path().join("tmp");

  let tiles = Tiler::new(&scratch, TileSize::default()).tile(&image).unwrap();
  assert_eq!(tiles, vec![image]);
  assert!(!scratch.exists());
}

#[test]
fn square_image_yields_four_named_tiles() {
  let dir = tempdir().unwrap();
  let image = write_png(&dir.path().join("scene.png"), 600, 600, |_, _| false);
  let scratch = dir.path().join("tmp");

  let tiles = Tiler::new(&scratch, TileSize::default()).tile(&image).unwrap();
  assert_eq!(
    stems(&tiles),
    vec!["0_300_0_300", "0_300_300_600", "300_600_0_300", "300_600_300_600"]
  );
  for tile in &tiles {
    assert_eq!(tile.parent().unwrap(), scratch);
    assert_eq!(tile.extension().unwrap(), "tiff");
    assert_eq!(image::image_dimensions(tile).unwrap(), (300, 300));
  }
}

#[test]
fn edge_tiles_are_padded_and_cover_the_image() {
  let dir = tempdir().unwrap();
  let (width, height) = (650u32, 420u32);
  let image = write_png(&dir.path().join("edge.png"), width, height, |_, _| true);
  let tiler = Tiler::new(dir.path().join("tmp"), TileSize::default());

  let tiles = tiler.tile(&image).unwrap();
  let mut covered = vec![0u8; (width * height) as usize];
  for tile in &tiles {
    let name = TileName::from_path(tile).unwrap();
    for y in name.y_start..name.y_end {
      for x in name.x_start..name.x_end {
        covered[(y * width + x) as usize] += 1;
      }
    }

    let pixels = image::open(tile).unwrap().to_rgb8();
    assert_eq!(pixels.dimensions(), (300, 300));
    assert_eq!(pixels.get_pixel(0, 0).0, common::MARKER.0);
    if name.width() < 300 {
      assert_eq!(pixels.get_pixel(name.width(), 0).0, [0, 0, 0]);
    }
    if name.height() < 300 {
      assert_eq!(pixels.get_pixel(0, name.height()).0, [0, 0, 0]);
    }
  }
  assert!(covered.iter().all(|&count| count == 1));

  assert_eq!(tiler.purge(), tiles.len());
  assert!(tiles.iter().all(|tile| !tile.exists()));
}

#[test]
fn corrupt_image_is_an_image_load_error() {
  let dir = tempdir().unwrap();
  let path = dir.path().join("broken.png");
  std::fs::write(&path, b"not a png").unwrap();

  let err = Tiler::new(dir.path().join("tmp"), TileSize::default())
    .tile(&path)
    .unwrap_err();
  assert!(matches!(err, TileError::ImageLoad { .. }));
}

#[test]
fn scratch_path_occupied_by_a_file_is_a_scratch_error() {
  let dir = tempdir().unwrap();
  let image = write_png(&dir.path().join("scene.png"), 600, 600, |_, _| false);
  let scratch = dir.path().join("tmp");
  std::fs::write(&scratch, b"x").unwrap();

  let tiler = Tiler::new(&scratch, TileSize::default());
  let err = tiler.tile(&image).unwrap_err();
  assert!(matches!(err, TileError::Scratch { ref path, .. } if *path == scratch));
  assert_eq!(tiler.purge(), 0);
}

#[test]
fn tile_origin_matches_tile_name() {
  let dir = tempdir().unwrap();
  let image = write_png(&dir.path().join("scene.png"), 600, 600, |_, _| false);
  write_world_file(&image, 500_000.0, 4_000_000.0, 0.5);

  let geo = GeoConfig::configure(&image).unwrap();
  assert_eq!((geo.width, geo.height), (600, 600));
  assert_relative_eq!(geo.pixel_width, 0.5);
  assert_relative_eq!(geo.pixel_height, 0.5);

  let tiles = Tiler::new(dir.path().join("tmp"), TileSize::default())
    .tile(&image)
    .unwrap();
  for tile in &tiles {
    let name = TileName::from_path(tile).unwrap();
    let origin = geo.resolve_tile_origin(tile).unwrap();
    assert_relative_eq!(origin.x, 500_000.0 + name.x_start as f64 * 0.5);
    assert_relative_eq!(origin.y, 4_000_000.0 - name.y_start as f64 * 0.5);
  }
  assert_eq!(geo.origin(), Point::new(500_000.0, 4_000_000.0));
}

#[test]
fn image_without_georeference_is_rejected() {
  let dir = tempdir().unwrap();
  let image = write_png(&dir.path().join("bare.png"), 20, 20, |_, _| false);

  assert!(matches!(
    GeoConfig::configure(&image),
    Err(GeoError::MissingTransform(_))
  ));
}
