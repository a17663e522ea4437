// 该文件是 Loufang （楼房） 项目的一部分。
// src/task.rs - 目录批处理任务
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
  path::{Path, PathBuf},
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
};

use chrono::{DateTime, Local};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  config::{PipelineConfig, TileSize},
  frame::NhwcBatch,
  geo::{GeoConfig, GeoError, Point, is_sidecar},
  model::{BatchRunner, InferenceError, Model, RawDetections, resolve_batch_size},
  output::{
    AccumulateError, DatasetError, FeatureLayer, GeoPackageLayer, ResultAccumulator, run_file_name,
  },
  tile::{TileError, Tiler},
};

#[derive(Error, Debug)]
pub enum TaskError {
  #[error("无法读取输入目录 {path}: {source}")]
  Input {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("临时目录 {0} 与输入目录相同，清理时会删除输入影像")]
  ScratchIsInput(PathBuf),
  #[error("无法注册中断处理: {0}")]
  Interrupt(#[from] ctrlc::Error),
  #[error(transparent)]
  Tile(#[from] TileError),
  #[error(transparent)]
  Geo(#[from] GeoError),
  #[error(transparent)]
  Inference(#[from] InferenceError),
  #[error(transparent)]
  Accumulate(#[from] AccumulateError),
  #[error(transparent)]
  Dataset(#[from] DatasetError),
}

/// 正在处理的源影像
#[derive(Debug, Clone)]
pub struct ImageContext {
  pub path: PathBuf,
  pub geo: GeoConfig,
  /// 影像尺寸恰好等于瓦片尺寸，未做切分
  pub single_tile: bool,
}

impl ImageContext {
  pub fn new(path: PathBuf, geo: GeoConfig, tile_size: TileSize) -> Self {
    let single_tile = TileSize::new(geo.width, geo.height) == tile_size;
    Self {
      path,
      geo,
      single_tile,
    }
  }

  /// 瓦片左上角的世界坐标。未切分的影像直接使用影像原点，
  /// 否则从瓦片文件名中解析像素偏移。
  pub fn tile_origin(&self, tile_path: &Path) -> Result<Point, GeoError> {
    if self.single_tile {
      Ok(self.geo.origin())
    } else {
      self.geo.resolve_tile_origin(tile_path)
    }
  }
}

/// 一次运行共享的状态：开始时间与结果图层
pub struct RunContext<L> {
  pub started: DateTime<Local>,
  pub accumulator: ResultAccumulator<L>,
}

impl<L: FeatureLayer> RunContext<L> {
  pub fn new(started: DateTime<Local>, accumulator: ResultAccumulator<L>) -> Self {
    Self {
      started,
      accumulator,
    }
  }
}

impl RunContext<GeoPackageLayer> {
  /// 在输出目录中打开（或续写）以开始时间命名的 GeoPackage
  pub fn open(config: &PipelineConfig, started: DateTime<Local>) -> Result<Self, DatasetError> {
    std::fs::create_dir_all(&config.output_dir).map_err(|source| DatasetError::Io {
      path: config.output_dir.clone(),
      source,
    })?;
    let path = config.output_dir.join(run_file_name(&started));
    let layer = GeoPackageLayer::open(&path, &config.layer)?;
    let accumulator = ResultAccumulator::new(layer, config.score_threshold, config.tile_size);
    Ok(Self::new(started, accumulator))
  }
}

/// 一次运行的统计
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RunSummary {
  /// 成功处理的影像数
  pub processed: usize,
  /// 写入的检测记录数
  pub records: usize,
  /// 失败的影像及错误信息
  pub failed: Vec<(PathBuf, String)>,
  /// 是否因中断提前结束
  pub interrupted: bool,
}

impl RunSummary {
  pub fn is_success(&self) -> bool {
    self.failed.is_empty()
  }
}

pub trait Task<M, L>: Sized {
  type Error;
  fn run_task(self, model: M, run: &mut RunContext<L>) -> Result<RunSummary, Self::Error>;
}

/// 依次处理输入目录中的全部影像。
///
/// 单张影像失败只记录错误，后续影像照常处理。
pub struct DirectoryTask {
  config: PipelineConfig,
  stop: Arc<AtomicBool>,
}

impl DirectoryTask {
  pub fn new(config: PipelineConfig) -> Self {
    Self {
      config,
      stop: Arc::new(AtomicBool::new(false)),
    }
  }

  pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
    self.stop = stop;
    self
  }

  /// 注册 Ctrl-C 处理：第一次在当前影像结束后停止，第二次立即退出
  pub fn install_interrupt(&self) -> Result<(), TaskError> {
    let stop = self.stop.clone();
    ctrlc::set_handler(move || {
      if stop.swap(true, Ordering::SeqCst) {
        warn!("再次收到中断信号，强制退出程序");
        std::process::exit(130);
      }
      info!("收到中断信号，当前影像处理完成后退出...");
    })?;
    Ok(())
  }

  /// 按文件名排序列出输入目录中的影像，跳过子目录与伴随文件
  pub fn list_images(&self) -> Result<Vec<PathBuf>, TaskError> {
    let input_error = |source| TaskError::Input {
      path: self.config.input_dir.clone(),
      source,
    };

    let mut images = Vec::new();
    for entry in std::fs::read_dir(&self.config.input_dir).map_err(input_error)? {
      let path = entry.map_err(input_error)?.path();
      if !path.is_file() || is_sidecar(&path) {
        continue;
      }
      images.push(path);
    }
    images.sort();
    Ok(images)
  }

  fn check_scratch(&self) -> Result<(), TaskError> {
    let scratch = &self.config.scratch_dir;
    let input = &self.config.input_dir;
    let same = match (scratch.canonicalize(), input.canonicalize()) {
      (Ok(a), Ok(b)) => a == b,
      _ => scratch == input,
    };
    if same {
      return Err(TaskError::ScratchIsInput(scratch.clone()));
    }
    Ok(())
  }

  fn process_image<M, L>(
    &self,
    runner: &BatchRunner<'_, M>,
    tiler: &Tiler,
    accumulator: &mut ResultAccumulator<L>,
    path: &Path,
  ) -> Result<usize, TaskError>
  where
    M: Model<Input = NhwcBatch, Output = RawDetections>,
    M::Error: std::error::Error + Send + Sync + 'static,
    L: FeatureLayer,
  {
    let geo = GeoConfig::configure(path)?;
    let image = ImageContext::new(path.to_path_buf(), geo, self.config.tile_size);
    let tiles = match tiler.tile(path) {
      Ok(tiles) => tiles,
      Err(e) => {
        tiler.purge();
        return Err(e.into());
      }
    };

    let result = Self::detect_tiles(runner, accumulator, &image, &tiles);
    if !image.single_tile {
      tiler.purge();
    }
    result
  }

  fn detect_tiles<M, L>(
    runner: &BatchRunner<'_, M>,
    accumulator: &mut ResultAccumulator<L>,
    image: &ImageContext,
    tiles: &[PathBuf],
  ) -> Result<usize, TaskError>
  where
    M: Model<Input = NhwcBatch, Output = RawDetections>,
    M::Error: std::error::Error + Send + Sync + 'static,
    L: FeatureLayer,
  {
    let mut kept = 0;
    for batch in runner.run(tiles) {
      let batch = batch?;
      kept += accumulator.accept(image, batch.paths, &batch.detections)?;
    }
    Ok(kept)
  }
}

impl<M, L> Task<M, L> for DirectoryTask
where
  M: Model<Input = NhwcBatch, Output = RawDetections>,
  M::Error: std::error::Error + Send + Sync + 'static,
  L: FeatureLayer,
{
  type Error = TaskError;

  fn run_task(self, model: M, run: &mut RunContext<L>) -> Result<RunSummary, Self::Error> {
    info!("开始任务，输入目录: {}", self.config.input_dir.display());
    if self.config.tile_size.is_empty() {
      return Err(TileError::EmptyTileSize(self.config.tile_size).into());
    }
    self.check_scratch()?;
    let images = self.list_images()?;
    info!("共 {} 张待处理影像", images.len());

    let tiler = Tiler::new(&self.config.scratch_dir, self.config.tile_size)
      .with_extension(&self.config.tile_extension);
    let stale = tiler.purge();
    if stale > 0 {
      warn!("清理上次运行残留的 {} 个临时瓦片", stale);
    }

    let batch_size = resolve_batch_size(&self.config.batch_sizing);
    let runner = BatchRunner::new(&model, self.config.tile_size, batch_size);
    info!("批大小: {}", runner.batch_size());

    let mut summary = RunSummary::default();
    for (index, path) in images.iter().enumerate() {
      if self.stop.load(Ordering::SeqCst) {
        warn!("中断信号接收，跳过剩余 {} 张影像", images.len() - index);
        summary.interrupted = true;
        break;
      }

      info!("({}/{}) 处理影像 {}", index + 1, images.len(), path.display());
      let now = std::time::Instant::now();
      match self.process_image(&runner, &tiler, &mut run.accumulator, path) {
        Ok(kept) => {
          info!("影像处理完成，保留 {} 个检测，耗时: {:.2?}", kept, now.elapsed());
          summary.processed += 1;
          summary.records += kept;
        }
        Err(e) => {
          error!("影像 {} 处理失败: {}", path.display(), error_chain(&e));
          summary.failed.push((path.clone(), e.to_string()));
        }
      }
    }

    debug!("任务统计: {:?}", summary);
    info!(
      "任务完成: 成功 {} 张，失败 {} 张，共写入 {} 条记录",
      summary.processed,
      summary.failed.len(),
      summary.records
    );
    Ok(summary)
  }
}

fn error_chain(e: &dyn std::error::Error) -> String {
  let mut message = e.to_string();
  let mut source = e.source();
  while let Some(cause) = source {
    message.push_str(": ");
    message.push_str(&cause.to_string());
    source = cause.source();
  }
  message
}
