// 该文件是 Xibaohe （细胞核） 项目的一部分。
// src/pipeline.rs - 分割流水线
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

use std::sync::{Arc, atomic::AtomicBool};

use chrono::{DateTime, Local};
use tracing::info;

use crate::{
  aggregate::AggregatedSet,
  canvas::{Canvas, composite},
  checkpoint::CheckpointStore,
  config::PipelineConfig,
  input::NormalizedImage,
  model::{Model, ModelGuard},
  nms::nms,
  task::{ParallelScan, ScanReport, SequentialScan, Task, TaskError},
};

/// 一次运行的结果
#[derive(Debug, Clone)]
pub struct Segmentation {
  pub canvas: Canvas,
  /// NMS 之后保留的检测，顺序与标签一致
  pub detections: AggregatedSet,
  pub aggregated: usize,
  pub report: ScanReport,
  pub started_at: DateTime<Local>,
  pub finished_at: DateTime<Local>,
}

/// 扫描 → 检查点 → 汇总 → NMS → 绘制
pub struct Pipeline<M> {
  config: PipelineConfig,
  model: ModelGuard<M>,
  store: CheckpointStore,
  stop: Arc<AtomicBool>,
}

impl<M: Model + Send> Pipeline<M> {
  pub fn new(config: PipelineConfig, model: M, store: CheckpointStore) -> Result<Self, TaskError> {
    config.validate()?;
    Ok(Self {
      config,
      model: ModelGuard::new(model),
      store,
      stop: Arc::new(AtomicBool::new(false)),
    })
  }

  pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
    self.stop = stop;
    self
  }

  pub fn config(&self) -> &PipelineConfig {
    &self.config
  }

  pub fn store(&self) -> &CheckpointStore {
    &self.store
  }

  pub fn run(&self, image: &NormalizedImage) -> Result<Segmentation, TaskError> {
    let started_at = Local::now();
    if !self.config.resume {
      self.store.clear()?;
    }

    let report = self.scan(image)?;

    let aggregated = self.store.load_all()?;
    let keep = nms(&aggregated.boxes, &aggregated.scores, self.config.thres_nms);
    let detections = aggregated.select(&keep);
    info!(
      "汇总 {} 个检测, NMS 后保留 {} 个",
      aggregated.len(),
      detections.len()
    );

    let canvas = composite(&detections, image.height(), image.width());
    Ok(Segmentation {
      canvas,
      detections,
      aggregated: aggregated.len(),
      report,
      started_at,
      finished_at: Local::now(),
    })
  }

  fn scan(&self, image: &NormalizedImage) -> Result<ScanReport, TaskError> {
    if self.config.parallel {
      ParallelScan::new(&self.config)
        .with_stop_flag(self.stop.clone())
        .run_task(image, &self.model, &self.store)
    } else {
      SequentialScan::new(&self.config)
        .with_stop_flag(self.stop.clone())
        .run_task(image, &self.model, &self.store)
    }
  }
}
