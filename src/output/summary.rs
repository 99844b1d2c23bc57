// 该文件是 Xibaohe （细胞核） 项目的一部分。
// src/output/summary.rs - 运行摘要
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
  io::{BufWriter, Write},
  path::PathBuf,
};

use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::info;

use crate::{
  config::PipelineConfig,
  input::NormalizedImage,
  output::{OutputError, Render, ensure_parent},
  pipeline::Segmentation,
  task::ScanReport,
};

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
  pub started_at: DateTime<Local>,
  pub finished_at: DateTime<Local>,
  pub elapsed_seconds: f64,
  pub image_height: usize,
  pub image_width: usize,
  pub scan: ScanReport,
  pub detections_aggregated: usize,
  pub detections_kept: usize,
  pub max_label: u32,
  pub config: PipelineConfig,
}

impl RunSummary {
  pub fn new(frame: &NormalizedImage, result: &Segmentation, config: &PipelineConfig) -> Self {
    let elapsed = result.finished_at - result.started_at;
    Self {
      started_at: result.started_at,
      finished_at: result.finished_at,
      elapsed_seconds: elapsed.num_milliseconds() as f64 / 1000.0,
      image_height: frame.height(),
      image_width: frame.width(),
      scan: result.report,
      detections_aggregated: result.aggregated,
      detections_kept: result.detections.len(),
      max_label: result.canvas.max_label(),
      config: config.clone(),
    }
  }
}

pub struct SummaryOutput {
  path: PathBuf,
  config: PipelineConfig,
}

impl SummaryOutput {
  pub fn new(path: impl Into<PathBuf>, config: PipelineConfig) -> Self {
    Self {
      path: path.into(),
      config,
    }
  }
}

impl Render<NormalizedImage, Segmentation> for SummaryOutput {
  type Error = OutputError;

  fn render_result(&self, frame: &NormalizedImage, result: &Segmentation) -> Result<(), Self::Error> {
    let summary = RunSummary::new(frame, result, &self.config);
    ensure_parent(&self.path)?;
    let mut writer = BufWriter::new(File::create(&self.path)?);
    serde_json::to_writer_pretty(&mut writer, &summary)?;
    writer.flush()?;

    info!("保存运行摘要到文件: {}", self.path.display());
    Ok(())
  }
}
