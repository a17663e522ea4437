// 该文件是 Loufang （楼房） 项目的一部分。
// tests/pipeline.rs - 端到端流水线测试
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

use std::{
  path::{Path, PathBuf},
  sync::{Arc, atomic::AtomicBool},
};

use approx::assert_relative_eq;
use chrono::Local;
use tempfile::{TempDir, tempdir};

use loufang::{
  config::{BatchSizing, PipelineConfig, TileSize},
  geo::Point,
  model::{BatchRunner, InferenceError},
  output::{FeatureLayer, GeoPackageLayer, MemoryLayer, ResultAccumulator},
  task::{DirectoryTask, RunContext, Task, TaskError},
  tile::TileError,
};

use common::{MARKED_SCORE, MarkerModel, write_png, write_world_file};

struct Workspace {
  root: TempDir,
}

impl Workspace {
  fn new() -> Self {
    let root = tempdir().unwrap();
    std::fs::create_dir(root.path().join("input")).unwrap();
    Self { root }
  }

  fn input(&self) -> PathBuf {
    self.root.path().join("input")
  }

  fn scratch(&self) -> PathBuf {
    self.root.path().join("tmp")
  }

  fn config(&self) -> PipelineConfig {
    PipelineConfig::default()
      .with_input_dir(self.input())
      .with_output_dir(self.root.path().join("output"))
      .with_scratch_dir(self.scratch())
      .with_batch_sizing(BatchSizing::Fixed(3))
  }

  /// 600×600、像素 1 米、左上角位于 (0, 600) 的影像，左下瓦片带标记
  fn add_scene(&self, name: &str) -> PathBuf {
    let path = write_png(&self.input().join(name), 600, 600, |x, y| x < 300 && y >= 300);
    write_world_file(&path, 0.0, 600.0, 1.0);
    path
  }
}

fn memory_run(config: &PipelineConfig) -> RunContext<MemoryLayer> {
  RunContext::new(
    Local::now(),
    ResultAccumulator::new(
      MemoryLayer::default(),
      config.score_threshold,
      config.tile_size,
    ),
  )
}

fn assert_point(p: Point, x: f64, y: f64) {
  assert_relative_eq!(p.x, x, epsilon = 1e-9);
  assert_relative_eq!(p.y, y, epsilon = 1e-9);
}

#[test]
fn detection_in_lower_left_tile_becomes_one_polygon() {
  let ws = Workspace::new();
  ws.add_scene("scene.png");
  let config = ws.config();
  let mut run = memory_run(&config);

  let model = MarkerModel::default();
  let calls = model.calls();
  let summary = DirectoryTask::new(config).run_task(model, &mut run).unwrap();

  assert!(summary.is_success());
  assert_eq!(summary.processed, 1);
  assert_eq!(summary.records, 1);
  assert!(!summary.interrupted);
  // 4 个瓦片，批大小 3
  assert_eq!(*calls.borrow(), vec![3, 1]);

  let records = run.accumulator.layer().records();
  assert_eq!(records.len(), 1);
  assert_eq!(records[0].fid, 1);
  assert_eq!(records[0].score, MARKED_SCORE);

  // 瓦片 0_300_300_600 的原点为 (0, 300)
  let [p1, p2, p3, p4] = records[0].polygon.corners();
  assert_point(p1, 150.5, 74.5);
  assert_point(p2, 150.5, 224.5);
  assert_point(p3, 225.5, 224.5);
  assert_point(p4, 225.5, 74.5);
  assert_eq!(records[0].polygon.ring[4], records[0].polygon.ring[0]);

  let leftover = std::fs::read_dir(ws.scratch()).unwrap().count();
  assert_eq!(leftover, 0);
}

#[test]
fn single_tile_image_uses_image_origin() {
  let ws = Workspace::new();
  let path = write_png(&ws.input().join("small.png"), 300, 300, |_, _| true);
  write_world_file(&path, 10.0, 290.0, 1.0);
  let config = ws.config();
  let mut run = memory_run(&config);

  let summary = DirectoryTask::new(config)
    .run_task(MarkerModel::default(), &mut run)
    .unwrap();

  assert_eq!(summary.records, 1);
  let [p1, _, p3, _] = run.accumulator.layer().records()[0].polygon.corners();
  assert_point(p1, 10.0 + 150.5, 290.0 - 225.5);
  assert_point(p3, 10.0 + 225.5, 290.0 - 75.5);
  // 未切分时不会写入临时目录
  assert!(!ws.scratch().exists());
}

#[test]
fn failing_image_does_not_stop_the_run() {
  let ws = Workspace::new();
  let broken = ws.input().join("a_broken.png");
  std::fs::write(&broken, b"definitely not a png").unwrap();
  let bare = write_png(&ws.input().join("b_bare.png"), 600, 600, |_, _| false);
  ws.add_scene("c_scene.png");
  let config = ws.config();
  let mut run = memory_run(&config);

  let summary = DirectoryTask::new(config)
    .run_task(MarkerModel::default(), &mut run)
    .unwrap();

  assert!(!summary.is_success());
  assert_eq!(summary.processed, 1);
  assert_eq!(summary.records, 1);
  let failed: Vec<&Path> = summary.failed.iter().map(|(p, _)| p.as_path()).collect();
  assert_eq!(failed, vec![broken.as_path(), bare.as_path()]);
  assert_eq!(run.accumulator.layer().records().len(), 1);
}

#[test]
fn stale_scratch_tiles_are_replaced() {
  let ws = Workspace::new();
  ws.add_scene("scene.png");
  std::fs::create_dir(ws.scratch()).unwrap();
  std::fs::write(ws.scratch().join("0_300_0_300.tiff"), b"left over from a crash").unwrap();
  std::fs::write(ws.scratch().join("9_9_9_9.tiff"), b"junk").unwrap();
  let config = ws.config();
  let mut run = memory_run(&config);

  let summary = DirectoryTask::new(config)
    .run_task(MarkerModel::default(), &mut run)
    .unwrap();

  assert!(summary.is_success());
  assert_eq!(summary.records, 1);
  let records = run.accumulator.layer().records();
  assert_eq!(records.len(), 1);
  assert_point(records[0].polygon.corners()[0], 150.5, 74.5);
  assert_eq!(std::fs::read_dir(ws.scratch()).unwrap().count(), 0);
}

#[test]
fn unusable_scratch_fails_only_tiled_images() {
  let ws = Workspace::new();
  let scene = ws.add_scene("a_scene.png");
  let small = write_png(&ws.input().join("b_small.png"), 300, 300, |_, _| true);
  write_world_file(&small, 10.0, 290.0, 1.0);
  // 临时目录位置被普通文件占用
  std::fs::write(ws.scratch(), b"not a directory").unwrap();
  let config = ws.config();
  let mut run = memory_run(&config);

  let summary = DirectoryTask::new(config)
    .run_task(MarkerModel::default(), &mut run)
    .unwrap();

  assert_eq!(summary.processed, 1);
  assert_eq!(summary.records, 1);
  assert_eq!(summary.failed.len(), 1);
  assert_eq!(summary.failed[0].0, scene);
  assert!(ws.scratch().is_file());
}

#[test]
fn zero_tile_size_is_rejected_before_listing() {
  let ws = Workspace::new();
  ws.add_scene("scene.png");
  let config = ws.config().with_tile_size(TileSize::new(0, 300));
  let mut run = memory_run(&config);

  let model = MarkerModel::default();
  let calls = model.calls();
  let err = DirectoryTask::new(config).run_task(model, &mut run).unwrap_err();
  assert!(matches!(err, TaskError::Tile(TileError::EmptyTileSize(_))));
  assert!(calls.borrow().is_empty());
}

#[test]
fn inference_failure_is_reported_and_scratch_cleared() {
  let ws = Workspace::new();
  ws.add_scene("scene.png");
  let config = ws.config();
  let mut run = memory_run(&config);

  let summary = DirectoryTask::new(config)
    .run_task(MarkerModel::failing(), &mut run)
    .unwrap();

  assert_eq!(summary.processed, 0);
  assert_eq!(summary.failed.len(), 1);
  assert_eq!(run.accumulator.flushes(), 0);
  assert_eq!(std::fs::read_dir(ws.scratch()).unwrap().count(), 0);
}

#[test]
fn batch_runner_propagates_backend_errors() {
  let ws = Workspace::new();
  let tile = write_png(&ws.input().join("tile.png"), 300, 300, |_, _| false);

  let model = MarkerModel::failing();
  let runner = BatchRunner::new(&model, TileSize::default(), 8);
  let tiles = [tile];
  let results: Vec<_> = runner.run(&tiles).collect();
  assert_eq!(results.len(), 1);
  assert!(matches!(results[0], Err(InferenceError::Backend(_))));
}

#[test]
fn stop_flag_skips_remaining_images() {
  let ws = Workspace::new();
  ws.add_scene("scene.png");
  let config = ws.config();
  let mut run = memory_run(&config);

  let stop = Arc::new(AtomicBool::new(true));
  let summary = DirectoryTask::new(config)
    .with_stop_flag(stop)
    .run_task(MarkerModel::default(), &mut run)
    .unwrap();

  assert!(summary.interrupted);
  assert_eq!(summary.processed, 0);
  assert!(summary.is_success());
}

#[test]
fn listing_is_sorted_and_skips_sidecars() {
  let ws = Workspace::new();
  let b = ws.add_scene("b.png");
  let a = ws.add_scene("a.png");
  std::fs::create_dir(ws.input().join("nested")).unwrap();
  std::fs::write(ws.input().join("a.png.aux.xml"), b"<PAMDataset/>").unwrap();
  std::fs::write(ws.input().join("b.png.ovr"), b"overview").unwrap();

  let images = DirectoryTask::new(ws.config()).list_images().unwrap();
  assert_eq!(images, vec![a, b]);
}

#[test]
fn reopened_geopackage_resumes_without_rewriting() {
  let ws = Workspace::new();
  ws.add_scene("scene.png");
  let config = ws.config();
  let started = Local::now();

  let mut first = RunContext::open(&config, started).unwrap();
  let summary = DirectoryTask::new(config.clone())
    .run_task(MarkerModel::default(), &mut first)
    .unwrap();
  assert_eq!(summary.records, 1);
  let gpkg = first.accumulator.layer().path().to_path_buf();
  drop(first);

  // 第二次运行没有新的标记，不应产生写入
  std::fs::remove_file(ws.input().join("scene.png")).unwrap();
  let quiet = write_png(&ws.input().join("scene.png"), 600, 600, |_, _| false);
  write_world_file(&quiet, 0.0, 600.0, 1.0);

  let mut second = RunContext::open(&config, started).unwrap();
  assert_eq!(second.accumulator.layer().path(), gpkg.as_path());
  assert_eq!(second.accumulator.layer().row_count(), 1);
  assert_eq!(second.accumulator.next_fid(), 2);

  let summary = DirectoryTask::new(config)
    .run_task(MarkerModel::default(), &mut second)
    .unwrap();
  assert_eq!(summary.processed, 1);
  assert_eq!(summary.records, 0);
  assert_eq!(second.accumulator.flushes(), 0);

  let layer = GeoPackageLayer::open(&gpkg, "boxes").unwrap();
  let records = layer.read_records().unwrap();
  assert_eq!(records.len(), 1);
  assert_eq!(records[0].fid, 1);
  assert_point(records[0].polygon.corners()[0], 150.5, 74.5);
}
