// 该文件是 Xibaohe （细胞核） 项目的一部分。
// tests/common/synthetic_image.rs - 合成图像与桩模型
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
  atomic::{AtomicUsize, Ordering},
};
use std::thread;
use std::time::Duration;

use xibaohe::{
  input::{NormalizedImage, PixelFormat, RawImage},
  model::{Model, RawOutput},
  tile::TileImage,
};

pub const BLOB_ORIGIN: usize = 100;
pub const BLOB_SIDE: usize = 40;
const BLOB_VALUE: f64 = 40_000.0;
const BACKGROUND_VALUE: f64 = 1_000.0;
const BRIGHT_LEVEL: f32 = 100.0;

/// 16 位方形图像，中间一个亮方块
pub fn blob_image(side: usize) -> NormalizedImage {
  let mut samples = vec![BACKGROUND_VALUE; side * side];
  for row in BLOB_ORIGIN..BLOB_ORIGIN + BLOB_SIDE {
    for col in BLOB_ORIGIN..BLOB_ORIGIN + BLOB_SIDE {
      samples[row * side + col] = BLOB_VALUE;
    }
  }
  RawImage::new(side, side, PixelFormat::U16, samples)
    .and_then(|raw| raw.normalize())
    .unwrap()
}

/// 把图块中的亮像素当作一个细胞核
///
/// 分数与可见比例成正比，只有完整看到亮块的图块才能得到 0.9。
pub struct BlobModel;

impl Model for BlobModel {
  type Error = std::io::Error;

  fn infer(&self, input: &TileImage) -> Result<RawOutput, Self::Error> {
    let size = input.size();
    let mut mask = vec![0.0f32; size * size];
    let (mut x0, mut y0, mut x1, mut y1) = (usize::MAX, usize::MAX, 0, 0);
    let mut visible = 0usize;
    for row in 0..size {
      for col in 0..size {
        if input.get(row, col) > BRIGHT_LEVEL {
          mask[row * size + col] = 1.0;
          visible += 1;
          x0 = x0.min(col);
          y0 = y0.min(row);
          x1 = x1.max(col + 1);
          y1 = y1.max(row + 1);
        }
      }
    }

    if visible == 0 {
      return Ok(RawOutput {
        boxes_shape: vec![0, 4],
        masks_shape: vec![0, 1, size, size],
        ..RawOutput::default()
      });
    }

    let full = (BLOB_SIDE * BLOB_SIDE) as f32;
    Ok(RawOutput {
      scores: vec![0.9 * visible as f32 / full],
      boxes: vec![x0 as f32, y0 as f32, x1 as f32, y1 as f32],
      boxes_shape: vec![1, 4],
      masks: mask,
      masks_shape: vec![1, 1, size, size],
    })
  }
}

/// 统计调用次数与同时进行的调用数
#[derive(Default, Clone)]
pub struct CallStats {
  pub calls: Arc<AtomicUsize>,
  pub in_flight: Arc<AtomicUsize>,
  pub max_in_flight: Arc<AtomicUsize>,
}

pub struct CountingModel<M> {
  inner: M,
  stats: CallStats,
  delay: Duration,
}

impl<M> CountingModel<M> {
  pub fn new(inner: M, stats: CallStats) -> Self {
    Self {
      inner,
      stats,
      delay: Duration::ZERO,
    }
  }

  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = delay;
    self
  }
}

impl<M: Model> Model for CountingModel<M> {
  type Error = M::Error;

  fn infer(&self, input: &TileImage) -> Result<RawOutput, Self::Error> {
    let now = self.stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    self.stats.max_in_flight.fetch_max(now, Ordering::SeqCst);
    self.stats.calls.fetch_add(1, Ordering::SeqCst);
    if !self.delay.is_zero() {
      thread::sleep(self.delay);
    }
    let result = self.inner.infer(input);
    self.stats.in_flight.fetch_sub(1, Ordering::SeqCst);
    result
  }
}
