// 该文件是 Xibaohe （细胞核） 项目的一部分。
// src/model.rs - 模型
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

use std::sync::Mutex;

use ndarray::Array2;
use thiserror::Error;
use tracing::{debug, error};

use crate::tile::TileImage;

/// 检测/分割模型
///
/// 输入为单个图块，输出为图块局部坐标下的原始张量。
pub trait Model {
  type Error: std::error::Error + Send + Sync + 'static;

  fn infer(&self, input: &TileImage) -> Result<RawOutput, Self::Error>;
}

/// 模型原始输出，形状随实现而异
#[derive(Debug, Clone, Default)]
pub struct RawOutput {
  pub scores: Vec<f32>,
  pub boxes: Vec<f32>,
  pub boxes_shape: Vec<usize>,
  pub masks: Vec<f32>,
  pub masks_shape: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct RawDetection {
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，图块局部坐标
  pub score: f32,
  pub mask: Array2<f32>,
}

#[derive(Debug, Clone, Default)]
pub struct RawDetections {
  pub items: Vec<RawDetection>,
}

impl RawDetections {
  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  /// 把原始输出整理为 N×4 检测框与 N 个 T×T 掩码
  pub fn from_raw(raw: RawOutput, tile_size: usize) -> Result<Self, ModelError> {
    let count = raw.scores.len();
    let plane = tile_size * tile_size;

    if raw.boxes.len() != count * 4 || shape_len(&raw.boxes_shape) != raw.boxes.len() {
      error!(
        "检测框数量不匹配: 分数 {}, 检测框数据 {} {:?}",
        count,
        raw.boxes.len(),
        raw.boxes_shape
      );
      return Err(ModelError::MalformedOutput(format!(
        "{} 个分数对应 {} 个检测框数据, 形状 {:?}",
        count,
        raw.boxes.len(),
        raw.boxes_shape
      )));
    }

    let masks_ok = raw.masks.len() == count * plane
      && shape_len(&raw.masks_shape) == raw.masks.len()
      && match raw.masks_shape.as_slice() {
        [n, 1, h, w] | [n, h, w] => *n == count && (*h, *w) == (tile_size, tile_size),
        [h, w] => count == 1 && (*h, *w) == (tile_size, tile_size),
        _ => count == 0,
      };
    if !masks_ok {
      error!(
        "掩码形状不匹配: 分数 {}, 掩码形状 {:?}, 图块边长 {}",
        count, raw.masks_shape, tile_size
      );
      return Err(ModelError::MalformedOutput(format!(
        "{} 个分数对应掩码形状 {:?}（图块边长 {}）",
        count, raw.masks_shape, tile_size
      )));
    }

    let mut items = Vec::with_capacity(count);
    for (k, score) in raw.scores.into_iter().enumerate() {
      let b = &raw.boxes[k * 4..k * 4 + 4];
      let mask = Array2::from_shape_vec(
        (tile_size, tile_size),
        raw.masks[k * plane..(k + 1) * plane].to_vec(),
      )
      .map_err(|e| ModelError::MalformedOutput(e.to_string()))?;
      items.push(RawDetection {
        bbox: [b[0], b[1], b[2], b[3]],
        score,
        mask,
      });
    }

    debug!("模型输出 {} 个检测", items.len());
    Ok(RawDetections { items })
  }
}

fn shape_len(shape: &[usize]) -> usize {
  if shape.is_empty() {
    0
  } else {
    shape.iter().product()
  }
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("模型调用失败 (图块 {tile}): {source}")]
  Invocation {
    tile: usize,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
  },
  #[error("模型输出格式错误: {0}")]
  MalformedOutput(String),
  #[error("模型锁已失效")]
  Poisoned,
}

/// 模型调用能力对象
///
/// 模型不保证可并发调用，所有调用都经过同一把锁，锁只覆盖一次推理。
pub struct ModelGuard<M> {
  model: Mutex<M>,
}

impl<M: Model> ModelGuard<M> {
  pub fn new(model: M) -> Self {
    Self {
      model: Mutex::new(model),
    }
  }

  pub fn infer(&self, input: &TileImage) -> Result<RawDetections, ModelError> {
    let index = input.tile().index;
    let raw = {
      let model = self.model.lock().map_err(|_| ModelError::Poisoned)?;
      model.infer(input).map_err(|e| {
        error!("图块 {} 推理失败: {}", index, e);
        ModelError::Invocation {
          tile: index,
          source: Box::new(e),
        }
      })?
    };
    RawDetections::from_raw(raw, input.size())
  }

  pub fn into_inner(self) -> Result<M, ModelError> {
    self.model.into_inner().map_err(|_| ModelError::Poisoned)
  }
}

#[cfg(feature = "model_onnx")]
mod onnx;
#[cfg(feature = "model_onnx")]
pub use self::onnx::{OnnxSegmenter, OnnxSegmenterBuilder, OnnxSegmenterError};

#[cfg(test)]
mod tests {
  use super::*;
  use crate::tile::Tile;

  fn raw(count: usize, boxes_shape: Vec<usize>, masks_shape: Vec<usize>, size: usize) -> RawOutput {
    RawOutput {
      scores: vec![0.9; count],
      boxes: (0..count * 4).map(|v| v as f32).collect(),
      boxes_shape,
      masks: vec![0.5; count * size * size],
      masks_shape,
    }
  }

  #[test]
  fn single_flat_box_becomes_one_row() {
    let out = RawDetections::from_raw(raw(1, vec![4], vec![1, 1, 4, 4], 4), 4).unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out.items[0].bbox, [0.0, 1.0, 2.0, 3.0]);
    assert_eq!(out.items[0].mask.dim(), (4, 4));
  }

  #[test]
  fn accepts_all_mask_layouts() {
    assert_eq!(
      RawDetections::from_raw(raw(2, vec![2, 4], vec![2, 1, 3, 3], 3), 3).unwrap().len(),
      2
    );
    assert_eq!(
      RawDetections::from_raw(raw(2, vec![2, 4], vec![2, 3, 3], 3), 3).unwrap().len(),
      2
    );
    assert_eq!(
      RawDetections::from_raw(raw(1, vec![1, 4], vec![3, 3], 3), 3).unwrap().len(),
      1
    );
  }

  #[test]
  fn empty_output_is_empty_set() {
    assert!(RawDetections::from_raw(raw(0, vec![0, 4], vec![0, 1, 8, 8], 8), 8).unwrap().is_empty());
    assert!(RawDetections::from_raw(RawOutput::default(), 8).unwrap().is_empty());
  }

  #[test]
  fn rejects_misaligned_output() {
    let mut bad = raw(2, vec![2, 4], vec![2, 1, 3, 3], 3);
    bad.scores.pop();
    assert!(matches!(
      RawDetections::from_raw(bad, 3),
      Err(ModelError::MalformedOutput(_))
    ));

    let wrong_tile = raw(1, vec![1, 4], vec![1, 1, 3, 3], 3);
    assert!(matches!(
      RawDetections::from_raw(wrong_tile, 4),
      Err(ModelError::MalformedOutput(_))
    ));
  }

  #[derive(Debug, thiserror::Error)]
  #[error("boom")]
  struct Boom;

  struct Failing;

  impl Model for Failing {
    type Error = Boom;

    fn infer(&self, _input: &TileImage) -> Result<RawOutput, Self::Error> {
      Err(Boom)
    }
  }

  #[test]
  fn guard_reports_failing_tile() {
    let guard = ModelGuard::new(Failing);
    let tile = Tile {
      index: 7,
      row: 0,
      col: 0,
      size: 2,
    };
    let err = guard.infer(&TileImage::new(tile, vec![0.0; 4])).unwrap_err();
    assert!(matches!(err, ModelError::Invocation { tile: 7, .. }));
  }
}
