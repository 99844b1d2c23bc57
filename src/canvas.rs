// 该文件是 Xibaohe （细胞核） 项目的一部分。
// src/canvas.rs - 实例标签画布
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

use ndarray::{Array2, s};
use tracing::{debug, warn};

use crate::aggregate::AggregatedSet;
use crate::filter::{TileMask, pixel_extent};

/// 与输入图像同尺寸的标签图，0 为背景
#[derive(Debug, Clone, PartialEq)]
pub struct Canvas {
  labels: Array2<u32>,
}

impl Canvas {
  pub fn new(height: usize, width: usize) -> Self {
    Self {
      labels: Array2::zeros((height, width)),
    }
  }

  pub fn shape(&self) -> (usize, usize) {
    self.labels.dim()
  }

  pub fn get(&self, row: usize, col: usize) -> u32 {
    self.labels[[row, col]]
  }

  pub fn labels(&self) -> &Array2<u32> {
    &self.labels
  }

  pub fn max_label(&self) -> u32 {
    self.labels.iter().copied().max().unwrap_or(0)
  }

  /// 把掩码乘以 `id` 累加到检测框位置
  ///
  /// 掩码与检测框尺寸不一致时取两者较小的范围，写入范围裁剪到画布内。
  pub fn paint(&mut self, bbox: &[f32; 4], mask: &TileMask, id: u32) {
    let [x0, y0, x1, y1] = pixel_extent(bbox);
    let (mask_h, mask_w) = mask.mask.dim();
    let (box_h, box_w) = (y1 - y0, x1 - x0);
    if (mask_h, mask_w) != (box_h, box_w) {
      warn!(
        "实例 {} 掩码尺寸 {}x{} 与检测框 {}x{} 不一致，按较小范围绘制",
        id, mask_h, mask_w, box_h, box_w
      );
    }

    let (height, width) = self.shape();
    let h = mask_h.min(box_h).min(height.saturating_sub(y0));
    let w = mask_w.min(box_w).min(width.saturating_sub(x0));
    if h == 0 || w == 0 {
      return;
    }

    self
      .labels
      .slice_mut(s![y0..y0 + h, x0..x0 + w])
      .zip_mut_with(&mask.mask.slice(s![..h, ..w]), |c, &m| {
        *c += u32::from(m) * id
      });
  }
}

/// 按 NMS 顺序绘制，第 i 个检测的标签为 i + 1，重叠处累加
pub fn composite(set: &AggregatedSet, height: usize, width: usize) -> Canvas {
  let mut canvas = Canvas::new(height, width);
  for (i, (bbox, _, mask)) in set.iter().enumerate() {
    canvas.paint(bbox, mask, (i + 1) as u32);
  }
  debug!("绘制 {} 个实例到 {}x{} 画布", set.len(), height, width);
  canvas
}

#[cfg(test)]
mod tests {
  use super::*;

  fn square(x: usize, y: usize, side: usize) -> ([f32; 4], TileMask) {
    let bbox = [x as f32, y as f32, (x + side) as f32, (y + side) as f32];
    let mask = TileMask {
      anchor: (0, 0),
      mask: Array2::ones((side, side)),
    };
    (bbox, mask)
  }

  fn set_of(items: Vec<([f32; 4], TileMask)>) -> AggregatedSet {
    let mut set = AggregatedSet::default();
    for (bbox, mask) in items {
      set.boxes.push(bbox);
      set.scores.push(0.9);
      set.masks.push(mask);
    }
    set
  }

  #[test]
  fn canvas_matches_input_shape() {
    let canvas = composite(&AggregatedSet::default(), 37, 53);
    assert_eq!(canvas.shape(), (37, 53));
    assert_eq!(canvas.max_label(), 0);
  }

  #[test]
  fn ids_follow_order_and_overlap_adds() {
    let set = set_of(vec![square(0, 0, 4), square(2, 2, 4)]);
    let canvas = composite(&set, 8, 8);
    assert_eq!(canvas.get(0, 0), 1);
    assert_eq!(canvas.get(5, 5), 2);
    assert_eq!(canvas.get(3, 3), 3);
    assert_eq!(canvas.get(7, 7), 0);
  }

  #[test]
  fn mismatched_mask_uses_smaller_extent() {
    let (bbox, _) = square(1, 1, 4);
    let mask = TileMask {
      anchor: (0, 0),
      mask: Array2::ones((2, 6)),
    };
    let canvas = composite(&set_of(vec![(bbox, mask)]), 8, 8);
    assert_eq!(canvas.get(1, 1), 1);
    assert_eq!(canvas.get(2, 4), 1);
    assert_eq!(canvas.get(3, 1), 0);
    assert_eq!(canvas.get(1, 5), 0);
  }

  #[test]
  fn writes_are_clipped_to_canvas() {
    let canvas = composite(&set_of(vec![square(6, 6, 4)]), 8, 8);
    assert_eq!(canvas.get(7, 7), 1);
    assert_eq!(canvas.labels().sum(), 4);
  }
}
