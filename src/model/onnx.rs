// 该文件是 Xibaohe （细胞核） 项目的一部分。
// src/model/onnx.rs - ONNX 分割模型
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

use thiserror::Error;
use tracing::{debug, info};
use tract_onnx::prelude::*;

use crate::{
  config::DEFAULT_TILE_SIZE,
  model::{Model, RawOutput},
  tile::TileImage,
};

type BoxedError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum OnnxSegmenterError {
  #[error("模型文件不存在: {0}")]
  ModelNotFound(PathBuf),
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[source] BoxedError),
  #[error("推理错误: {0}")]
  InferenceError(#[source] BoxedError),
  #[error("模型输出缺少{0}")]
  MissingOutput(&'static str),
}

/// 在 CPU 上运行的 ONNX 实例分割模型（Mask R-CNN 导出格式）
///
/// 输入 `[1, T, T]` 单通道图块，输出中按形状识别：
/// - `[N, 4]` 检测框
/// - `[N]` 浮点分数（整型类别输出被忽略）
/// - `[N, 1, T, T]` 或 `[N, T, T]` 掩码概率
pub struct OnnxSegmenter {
  plan: TypedRunnableModel<TypedModel>,
}

impl OnnxSegmenter {
  /// 该后端没有可用的加速设备
  pub const AVAILABLE_ACCELERATORS: usize = 0;

  fn run(&self, input: &TileImage) -> TractResult<Outputs> {
    let size = input.size();
    let tensor: Tensor =
      tract_ndarray::Array3::from_shape_vec((1, size, size), input.data().to_vec())?.into();
    let outputs = self.plan.run(tvec!(tensor.into()))?;

    let mut found = Outputs::default();
    for (idx, value) in outputs.iter().enumerate() {
      if value.datum_type() != f32::datum_type() {
        debug!("跳过第 {} 个输出: 类型 {:?}", idx, value.datum_type());
        continue;
      }
      let view = value.to_array_view::<f32>()?;
      let shape = view.shape().to_vec();
      let data: Vec<f32> = view.iter().copied().collect();
      match shape.as_slice() {
        [_, 4] if found.boxes.is_none() => found.boxes = Some((data, shape)),
        [_] if found.scores.is_none() => found.scores = Some(data),
        [_, _, _, _] | [_, _, _] if found.masks.is_none() => found.masks = Some((data, shape)),
        _ => debug!("忽略第 {} 个输出: 形状 {:?}", idx, shape),
      }
    }
    Ok(found)
  }
}

#[derive(Default)]
struct Outputs {
  scores: Option<Vec<f32>>,
  boxes: Option<(Vec<f32>, Vec<usize>)>,
  masks: Option<(Vec<f32>, Vec<usize>)>,
}

impl Model for OnnxSegmenter {
  type Error = OnnxSegmenterError;

  fn infer(&self, input: &TileImage) -> Result<RawOutput, Self::Error> {
    let found = self
      .run(input)
      .map_err(|e| OnnxSegmenterError::InferenceError(e.into()))?;
    let scores = found.scores.ok_or(OnnxSegmenterError::MissingOutput("分数"))?;
    let (boxes, boxes_shape) = found.boxes.ok_or(OnnxSegmenterError::MissingOutput("检测框"))?;
    let (masks, masks_shape) = found.masks.ok_or(OnnxSegmenterError::MissingOutput("掩码"))?;
    Ok(RawOutput {
      scores,
      boxes,
      boxes_shape,
      masks,
      masks_shape,
    })
  }
}

pub struct OnnxSegmenterBuilder {
  model_path: PathBuf,
  tile_size: usize,
}

impl OnnxSegmenterBuilder {
  pub fn new(model_path: impl Into<PathBuf>) -> Self {
    Self {
      model_path: model_path.into(),
      tile_size: DEFAULT_TILE_SIZE,
    }
  }

  pub fn tile_size(mut self, tile_size: usize) -> Self {
    self.tile_size = tile_size;
    self
  }

  pub fn build(self) -> Result<OnnxSegmenter, OnnxSegmenterError> {
    if !self.model_path.is_file() {
      return Err(OnnxSegmenterError::ModelNotFound(self.model_path));
    }

    info!("加载模型文件: {}", self.model_path.display());
    let size = self.tile_size;
    let plan = tract_onnx::onnx()
      .model_for_path(&self.model_path)
      .and_then(|model| {
        model.with_input_fact(
          0,
          InferenceFact::dt_shape(f32::datum_type(), tvec!(1, size, size)),
        )
      })
      .and_then(|model| model.into_optimized())
      .and_then(|model| model.into_runnable())
      .map_err(|e| OnnxSegmenterError::ModelLoadError(e.into()))?;
    info!("模型加载完成, 输入尺寸 1x{}x{}", size, size);

    Ok(OnnxSegmenter { plan })
  }
}
