// 该文件是 Xibaohe （细胞核） 项目的一部分。
// src/task.rs - 图块扫描任务
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

use std::sync::{
  Arc,
  atomic::{AtomicBool, AtomicUsize, Ordering},
};
use std::time::Instant;

use rayon::prelude::*;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  checkpoint::{CheckpointError, CheckpointStore},
  config::{ConfigError, PipelineConfig},
  filter::{FilterThresholds, filter_tile},
  input::NormalizedImage,
  model::{Model, ModelError, ModelGuard},
  tile::{Tile, TileScheduler},
};

#[derive(Error, Debug)]
pub enum TaskError {
  #[error("配置错误: {0}")]
  ConfigError(#[from] ConfigError),
  #[error("模型错误: {0}")]
  ModelError(#[from] ModelError),
  #[error("检查点错误: {0}")]
  CheckpointError(#[from] CheckpointError),
  #[error("任务被中断")]
  Interrupted,
}

/// 一次扫描的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
  pub tiles_total: usize,
  pub tiles_scanned: usize,
  pub tiles_skipped: usize,
  pub records_written: usize,
  pub detections_written: usize,
}

pub trait Task<M>: Sized {
  type Error;
  fn run_task(
    self,
    image: &NormalizedImage,
    model: &ModelGuard<M>,
    store: &CheckpointStore,
  ) -> Result<ScanReport, Self::Error>;
}

#[derive(Debug, Clone)]
struct ScanSettings {
  tile_size: usize,
  step: usize,
  thresholds: FilterThresholds,
  resume: bool,
  stop: Arc<AtomicBool>,
}

impl ScanSettings {
  fn from_config(config: &PipelineConfig) -> Self {
    Self {
      tile_size: config.tile_size,
      step: config.rolling_window,
      thresholds: config.thresholds(),
      resume: config.resume,
      stop: Arc::new(AtomicBool::new(false)),
    }
  }

  fn scheduler(&self, image: &NormalizedImage) -> Result<TileScheduler, ConfigError> {
    TileScheduler::new(image.height(), image.width(), self.tile_size, self.step)
  }

  fn check_stop(&self) -> Result<(), TaskError> {
    if self.stop.load(Ordering::SeqCst) {
      warn!("中断信号接收，停止扫描");
      return Err(TaskError::Interrupted);
    }
    Ok(())
  }
}

#[derive(Default)]
struct Counters {
  scanned: AtomicUsize,
  skipped: AtomicUsize,
  records: AtomicUsize,
  detections: AtomicUsize,
}

impl Counters {
  fn report(&self, total: usize) -> ScanReport {
    ScanReport {
      tiles_total: total,
      tiles_scanned: self.scanned.load(Ordering::SeqCst),
      tiles_skipped: self.skipped.load(Ordering::SeqCst),
      records_written: self.records.load(Ordering::SeqCst),
      detections_written: self.detections.load(Ordering::SeqCst),
    }
  }

  fn finished(&self) -> usize {
    self.scanned.load(Ordering::SeqCst) + self.skipped.load(Ordering::SeqCst)
  }
}

// 推理、过滤、写入检查点，空结果不写记录
fn process_tile<M: Model>(
  tile: Tile,
  image: &NormalizedImage,
  model: &ModelGuard<M>,
  store: &CheckpointStore,
  settings: &ScanSettings,
  counters: &Counters,
) -> Result<(), TaskError> {
  settings.check_stop()?;

  if settings.resume && store.contains(tile.index) {
    debug!("图块 {} 已有检查点，跳过", tile.index);
    counters.skipped.fetch_add(1, Ordering::SeqCst);
    return Ok(());
  }

  let crop = image.crop(&tile);
  let raw = model.infer(&crop)?;
  let kept = filter_tile(raw, &tile, &settings.thresholds);
  if !kept.is_empty() {
    store.save(tile.index, &kept)?;
    counters.records.fetch_add(1, Ordering::SeqCst);
    counters.detections.fetch_add(kept.len(), Ordering::SeqCst);
    debug!(
      "图块 {} ({}, {}) 保留 {} 个检测",
      tile.index,
      tile.row,
      tile.col,
      kept.len()
    );
  }
  counters.scanned.fetch_add(1, Ordering::SeqCst);
  Ok(())
}

const PROGRESS_INTERVAL: usize = 100;

fn log_progress(counters: &Counters, total: usize) {
  let finished = counters.finished();
  if finished % PROGRESS_INTERVAL == 0 || finished == total {
    info!("已处理图块 {}/{}", finished, total);
  }
}

/// 逐个处理图块
#[derive(Debug, Clone)]
pub struct SequentialScan {
  settings: ScanSettings,
}

impl SequentialScan {
  pub fn new(config: &PipelineConfig) -> Self {
    Self {
      settings: ScanSettings::from_config(config),
    }
  }

  pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
    self.settings.stop = stop;
    self
  }
}

impl<M: Model> Task<M> for SequentialScan {
  type Error = TaskError;

  fn run_task(
    self,
    image: &NormalizedImage,
    model: &ModelGuard<M>,
    store: &CheckpointStore,
  ) -> Result<ScanReport, Self::Error> {
    let scheduler = self.settings.scheduler(image)?;
    let total = scheduler.tiles().count();
    info!("开始顺序扫描, 共 {} 个图块", total);

    let now = Instant::now();
    let counters = Counters::default();
    for tile in scheduler.tiles() {
      process_tile(tile, image, model, store, &self.settings, &counters)?;
      log_progress(&counters, total);
    }

    let report = counters.report(total);
    info!("扫描完成，耗时: {:.2?}, {:?}", now.elapsed(), report);
    Ok(report)
  }
}

/// 在 rayon 线程池上并发处理图块，模型调用经 [`ModelGuard`] 串行化
#[derive(Debug, Clone)]
pub struct ParallelScan {
  settings: ScanSettings,
}

impl ParallelScan {
  pub fn new(config: &PipelineConfig) -> Self {
    Self {
      settings: ScanSettings::from_config(config),
    }
  }

  pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
    self.settings.stop = stop;
    self
  }
}

impl<M: Model + Send> Task<M> for ParallelScan {
  type Error = TaskError;

  fn run_task(
    self,
    image: &NormalizedImage,
    model: &ModelGuard<M>,
    store: &CheckpointStore,
  ) -> Result<ScanReport, Self::Error> {
    let scheduler = self.settings.scheduler(image)?;
    let total = scheduler.tiles().count();
    info!(
      "开始并行扫描, 共 {} 个图块, {} 个工作线程",
      total,
      rayon::current_num_threads()
    );

    let now = Instant::now();
    let counters = Counters::default();
    scheduler.tiles().par_bridge().try_for_each(|tile| {
      process_tile(tile, image, model, store, &self.settings, &counters)?;
      log_progress(&counters, total);
      Ok::<(), TaskError>(())
    })?;

    let report = counters.report(total);
    info!("扫描完成，耗时: {:.2?}, {:?}", now.elapsed(), report);
    Ok(report)
  }
}
