// 该文件是 Loufang （楼房） 项目的一部分。
// src/main.rs - 项目主程序
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

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use url::Url;

use loufang::{
  FromUrl,
  config::{BatchSizing, DEFAULT_MEMORY_RATIO, DEFAULT_SCORE_THRESHOLD, PipelineConfig, TileSize},
  model::{Model, TractDetectorBuilder, resolve_batch_size},
  task::{DirectoryTask, RunContext, Task},
};

/// Loufang 航拍影像建筑物检测
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 检测模型路径
  #[arg(long, value_name = "MODEL", default_value = "tract:///model/frozen_inference_graph.onnx")]
  pub model: Url,
  /// 输入影像目录
  #[arg(long, value_name = "DIR", default_value = "input_images")]
  pub input: PathBuf,
  /// GeoPackage 输出目录
  #[arg(long, value_name = "DIR", default_value = "output_gpkg")]
  pub output: PathBuf,
  /// 临时瓦片目录，每张影像处理后清空
  #[arg(long, value_name = "DIR", default_value = "tmp")]
  pub scratch: PathBuf,
  /// 瓦片尺寸，`300` 或 `宽x高`
  #[arg(long, value_name = "SIZE", default_value_t = TileSize::default())]
  pub tile_size: TileSize,
  /// 置信度阈值（严格大于）
  #[arg(long, value_name = "SCORE", default_value_t = DEFAULT_SCORE_THRESHOLD)]
  pub threshold: f32,
  /// 固定批大小，不指定时按主机内存估算
  #[arg(long, value_name = "N")]
  pub batch_size: Option<usize>,
  /// 每 GiB 内存对应的批大小
  #[arg(long, value_name = "RATIO", default_value_t = DEFAULT_MEMORY_RATIO)]
  pub memory_ratio: f64,
}

impl Args {
  fn pipeline_config(&self) -> PipelineConfig {
    let batch_sizing = match self.batch_size {
      Some(size) => BatchSizing::Fixed(size),
      None => BatchSizing::Memory {
        ratio: self.memory_ratio,
      },
    };

    PipelineConfig::default()
      .with_input_dir(&self.input)
      .with_output_dir(&self.output)
      .with_scratch_dir(&self.scratch)
      .with_tile_size(self.tile_size)
      .with_score_threshold(self.threshold)
      .with_batch_sizing(batch_sizing)
  }
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = Args::parse();
  let config = args.pipeline_config();

  info!("模型文件路径: {}", args.model);
  info!("输入目录: {}", config.input_dir.display());
  info!("输出目录: {}", config.output_dir.display());
  info!("瓦片尺寸: {}", config.tile_size);
  info!("置信度阈值: {}", config.score_threshold);

  let capacity = resolve_batch_size(&config.batch_sizing);
  let model = TractDetectorBuilder::from_url(&args.model)?
    .tile_size(config.tile_size)
    .capacity(capacity)
    .build()
    .context("加载检测模型失败")?;
  let capacity = model.max_batch().unwrap_or(capacity);

  let mut run = RunContext::open(&config, chrono::Local::now()).context("无法创建输出数据集")?;

  let task = DirectoryTask::new(config.with_batch_sizing(BatchSizing::Fixed(capacity)));
  task.install_interrupt()?;
  let summary = task.run_task(model, &mut run)?;

  if !summary.is_success() {
    for (path, reason) in &summary.failed {
      error!("失败: {}: {}", path.display(), reason);
    }
    anyhow::bail!("{} 张影像处理失败", summary.failed.len());
  }

  Ok(())
}
