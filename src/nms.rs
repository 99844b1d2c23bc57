// 该文件是 Xibaohe （细胞核） 项目的一部分。
// src/nms.rs - 全局非极大值抑制
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

use std::cmp::Ordering;

use tracing::debug;

use crate::filter::box_area;

/// 计算两个边界框的 IoU
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let x1 = a[0].max(b[0]);
  let y1 = a[1].max(b[1]);
  let x2 = a[2].min(b[2]);
  let y2 = a[3].min(b[3]);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let union = box_area(a) + box_area(b) - intersection;

  if union > 0.0 {
    intersection / union
  } else {
    0.0
  }
}

/// 与类别无关的贪心 NMS，返回按接受顺序排列的保留下标
///
/// 分数降序稳定排序（同分按原下标），IoU 严格大于阈值的检测框被抑制。
pub fn nms(boxes: &[[f32; 4]], scores: &[f32], threshold: f32) -> Vec<usize> {
  debug_assert_eq!(boxes.len(), scores.len());
  let n = scores.len();

  let mut order: Vec<usize> = (0..n).collect();
  order.sort_by(|&a, &b| {
    scores[b]
      .partial_cmp(&scores[a])
      .unwrap_or(Ordering::Equal)
  });

  let mut keep = Vec::new();
  let mut suppressed = vec![false; n];
  for (pos, &i) in order.iter().enumerate() {
    if suppressed[i] {
      continue;
    }
    keep.push(i);
    for &j in &order[pos + 1..] {
      if !suppressed[j] && iou(&boxes[i], &boxes[j]) > threshold {
        suppressed[j] = true;
      }
    }
  }

  debug!("NMS 保留 {} / {} 个检测", keep.len(), n);
  keep
}
