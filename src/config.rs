// 该文件是 Xibaohe （细胞核） 项目的一部分。
// src/config.rs - 流水线配置
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
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::filter::FilterThresholds;

pub const DEFAULT_THRES_NMS: f32 = 0.1;
pub const DEFAULT_THRES_PREDICTION: f32 = 0.6;
pub const DEFAULT_THRES_MASK: f32 = 0.95;
pub const DEFAULT_THRES_SIZE: f32 = 0.3;
pub const DEFAULT_TILE_SIZE: usize = 128;
pub const DEFAULT_ROLLING_WINDOW: usize = 10;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
  #[error("无效的设备: {requested}，检测到 {available} 个加速设备")]
  InvalidDeviceSelector { requested: String, available: usize },
  #[error("无法解析设备选择: {0}（应为 cpu、cuda 或 cuda:N）")]
  MalformedDevice(String),
  #[error("输入文件不存在: {0}")]
  MissingInputArtifact(PathBuf),
  #[error("模型文件不存在: {0}")]
  MissingModelArtifact(PathBuf),
  #[error("{0} 必须大于 0")]
  ZeroLength(&'static str),
  #[error("阈值 {name} 超出范围: {value}")]
  ThresholdOutOfRange { name: &'static str, value: f32 },
}

/// 计算设备选择
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
  Cpu,
  Cuda(usize),
}

impl FromStr for Device {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("cpu") {
      return Ok(Device::Cpu);
    }
    if s.eq_ignore_ascii_case("cuda") {
      return Ok(Device::Cuda(0));
    }
    match s.split_once(':') {
      Some((kind, id)) if kind.eq_ignore_ascii_case("cuda") => id
        .parse::<usize>()
        .map(Device::Cuda)
        .map_err(|_| ConfigError::MalformedDevice(s.to_string())),
      _ => Err(ConfigError::MalformedDevice(s.to_string())),
    }
  }
}

impl std::fmt::Display for Device {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Device::Cpu => write!(f, "cpu"),
      Device::Cuda(id) => write!(f, "cuda:{}", id),
    }
  }
}

impl Device {
  /// 根据后端可用的加速设备数量校验设备选择
  pub fn validate(self, available: usize) -> Result<Self, ConfigError> {
    match self {
      Device::Cpu => Ok(self),
      Device::Cuda(id) if id < available => Ok(self),
      Device::Cuda(_) => {
        error!("无效的 GPU 编号: 检测到 {} 个设备，但选择了 {}", available, self);
        Err(ConfigError::InvalidDeviceSelector {
          requested: self.to_string(),
          available,
        })
      }
    }
  }
}

/// 在任何处理开始前检查输入与模型文件是否存在
pub fn check_artifacts(input: &Path, model: &Path) -> Result<(), ConfigError> {
  if !input.is_file() {
    error!("输入文件不存在: {}", input.display());
    return Err(ConfigError::MissingInputArtifact(input.to_path_buf()));
  }
  if !model.is_file() {
    error!("模型文件不存在: {}", model.display());
    return Err(ConfigError::MissingModelArtifact(model.to_path_buf()));
  }
  Ok(())
}

/// 流水线参数
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineConfig {
  /// NMS IoU 阈值
  pub thres_nms: f32,
  /// 预测分数阈值
  pub thres_prediction: f32,
  /// 掩码二值化阈值
  pub thres_mask: f32,
  /// 检测框面积相对图块面积的上限
  pub thres_size: f32,
  /// 图块边长
  pub tile_size: usize,
  /// 滑动窗口步长
  pub rolling_window: usize,
  /// 并行处理图块
  pub parallel: bool,
  /// 跳过已有检查点的图块
  pub resume: bool,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      thres_nms: DEFAULT_THRES_NMS,
      thres_prediction: DEFAULT_THRES_PREDICTION,
      thres_mask: DEFAULT_THRES_MASK,
      thres_size: DEFAULT_THRES_SIZE,
      tile_size: DEFAULT_TILE_SIZE,
      rolling_window: DEFAULT_ROLLING_WINDOW,
      parallel: false,
      resume: false,
    }
  }
}

impl PipelineConfig {
  pub fn with_tile_size(mut self, tile_size: usize) -> Self {
    self.tile_size = tile_size;
    self
  }

  pub fn with_rolling_window(mut self, rolling_window: usize) -> Self {
    self.rolling_window = rolling_window;
    self
  }

  pub fn with_parallel(mut self, parallel: bool) -> Self {
    self.parallel = parallel;
    self
  }

  pub fn with_resume(mut self, resume: bool) -> Self {
    self.resume = resume;
    self
  }

  pub fn thresholds(&self) -> FilterThresholds {
    FilterThresholds {
      prediction: self.thres_prediction,
      size: self.thres_size,
      mask: self.thres_mask,
    }
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.tile_size == 0 {
      return Err(ConfigError::ZeroLength("tile-size"));
    }
    if self.rolling_window == 0 {
      return Err(ConfigError::ZeroLength("rolling-window"));
    }
    for (name, value) in [
      ("thres-nms", self.thres_nms),
      ("thres-prediction", self.thres_prediction),
      ("thres-mask", self.thres_mask),
    ] {
      if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::ThresholdOutOfRange { name, value });
      }
    }
    if !(self.thres_size > 0.0) {
      return Err(ConfigError::ThresholdOutOfRange {
        name: "thres-size",
        value: self.thres_size,
      });
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_device_selectors() {
    assert_eq!("cpu".parse::<Device>(), Ok(Device::Cpu));
    assert_eq!("cuda".parse::<Device>(), Ok(Device::Cuda(0)));
    assert_eq!("cuda:3".parse::<Device>(), Ok(Device::Cuda(3)));
    assert!(matches!(
      "tpu:1".parse::<Device>(),
      Err(ConfigError::MalformedDevice(_))
    ));
    assert!(matches!(
      "cuda:x".parse::<Device>(),
      Err(ConfigError::MalformedDevice(_))
    ));
  }

  #[test]
  fn rejects_unavailable_accelerator() {
    assert_eq!(Device::Cpu.validate(0), Ok(Device::Cpu));
    assert_eq!(Device::Cuda(1).validate(2), Ok(Device::Cuda(1)));
    assert_eq!(
      Device::Cuda(0).validate(0),
      Err(ConfigError::InvalidDeviceSelector {
        requested: "cuda:0".to_string(),
        available: 0,
      })
    );
  }

  #[test]
  fn defaults_are_valid() {
    let config = PipelineConfig::default();
    assert_eq!(config.tile_size, 128);
    assert_eq!(config.rolling_window, 10);
    assert!(config.validate().is_ok());
  }

  #[test]
  fn rejects_degenerate_config() {
    let config = PipelineConfig::default().with_rolling_window(0);
    assert_eq!(
      config.validate(),
      Err(ConfigError::ZeroLength("rolling-window"))
    );

    let config = PipelineConfig {
      thres_nms: 1.5,
      ..Default::default()
    };
    assert!(matches!(
      config.validate(),
      Err(ConfigError::ThresholdOutOfRange { name: "thres-nms", .. })
    ));
  }

  #[test]
  fn missing_artifacts_are_reported() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input.tiff");
    let model = dir.path().join("model.onnx");
    assert_eq!(
      check_artifacts(&input, &model),
      Err(ConfigError::MissingInputArtifact(input.clone()))
    );
    std::fs::write(&input, b"").unwrap();
    assert_eq!(
      check_artifacts(&input, &model),
      Err(ConfigError::MissingModelArtifact(model.clone()))
    );
    std::fs::write(&model, b"").unwrap();
    assert!(check_artifacts(&input, &model).is_ok());
  }
}
