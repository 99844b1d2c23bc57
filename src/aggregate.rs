// 该文件是 Xibaohe （细胞核） 项目的一部分。
// src/aggregate.rs - 检测结果汇总
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

use crate::filter::{FilteredDetection, TileMask};

/// 全部图块的检测结果，三个列表按下标对齐
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregatedSet {
  pub boxes: Vec<[f32; 4]>,
  pub scores: Vec<f32>,
  pub masks: Vec<TileMask>,
}

impl AggregatedSet {
  pub fn len(&self) -> usize {
    self.scores.len()
  }

  pub fn is_empty(&self) -> bool {
    self.scores.is_empty()
  }

  pub fn push(&mut self, detection: FilteredDetection) {
    self.boxes.push(detection.bbox);
    self.scores.push(detection.score);
    self.masks.push(detection.mask);
  }

  /// 按下标列表取子集，三个列表同步
  pub fn select(&self, indices: &[usize]) -> AggregatedSet {
    AggregatedSet {
      boxes: indices.iter().map(|&i| self.boxes[i]).collect(),
      scores: indices.iter().map(|&i| self.scores[i]).collect(),
      masks: indices.iter().map(|&i| self.masks[i].clone()).collect(),
    }
  }

  pub fn iter(&self) -> impl Iterator<Item = (&[f32; 4], f32, &TileMask)> {
    self
      .boxes
      .iter()
      .zip(self.scores.iter().copied())
      .zip(self.masks.iter())
      .map(|((bbox, score), mask)| (bbox, score, mask))
  }
}

impl FromIterator<FilteredDetection> for AggregatedSet {
  fn from_iter<I: IntoIterator<Item = FilteredDetection>>(iter: I) -> Self {
    let mut set = AggregatedSet::default();
    for detection in iter {
      set.push(detection);
    }
    set
  }
}

/// 拼接每个记录展开后的检测列表
pub fn aggregate<I, E>(records: I) -> Result<AggregatedSet, E>
where
  I: IntoIterator<Item = Result<Vec<FilteredDetection>, E>>,
{
  let mut set = AggregatedSet::default();
  for record in records {
    for detection in record? {
      set.push(detection);
    }
  }
  Ok(set)
}
