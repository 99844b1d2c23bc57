// 该文件是 Xibaohe （细胞核） 项目的一部分。
// src/filter.rs - 图块检测结果过滤
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
use tracing::trace;

use crate::{
  model::{RawDetection, RawDetections},
  tile::Tile,
};

/// 检测框最小面积（像素²）
pub const MIN_BOX_AREA: f32 = 30.0;
/// 掩码概率和的下限
pub const MIN_MASK_MASS: f32 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterThresholds {
  /// 预测分数下限
  pub prediction: f32,
  /// 检测框面积 / 图块面积 的上限
  pub size: f32,
  /// 掩码二值化阈值
  pub mask: f32,
}

/// 裁剪到检测框范围的二值掩码，`anchor` 为所在图块的原点 (col, row)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileMask {
  pub anchor: (usize, usize),
  pub mask: Array2<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilteredDetection {
  pub bbox: [f32; 4], // 全图坐标
  pub score: f32,
  pub mask: TileMask,
}

pub fn box_area(bbox: &[f32; 4]) -> f32 {
  (bbox[2] - bbox[0]) * (bbox[3] - bbox[1])
}

/// 检测框对应的像素范围 `[x0, y0, x1, y1]`，四舍五入且保证 x1 ≥ x0、y1 ≥ y0
pub fn pixel_extent(bbox: &[f32; 4]) -> [usize; 4] {
  let px = |v: f32| v.round().max(0.0) as usize;
  let (x0, y0) = (px(bbox[0]), px(bbox[1]));
  [x0, y0, px(bbox[2]).max(x0), px(bbox[3]).max(y0)]
}

/// 依次执行分数、相对面积、绝对面积与掩码质量筛选，集合为空时提前返回
///
/// 返回筛选后是否仍有检测。对已筛选过的集合再次调用不会改变结果。
pub fn screen(items: &mut Vec<RawDetection>, tile_area: f32, thresholds: &FilterThresholds) -> bool {
  items.retain(|d| d.score >= thresholds.prediction);
  trace!("分数筛选后剩余 {}", items.len());
  if items.is_empty() {
    return false;
  }

  items.retain(|d| box_area(&d.bbox) / tile_area <= thresholds.size);
  trace!("相对面积筛选后剩余 {}", items.len());
  if items.is_empty() {
    return false;
  }

  items.retain(|d| box_area(&d.bbox) > MIN_BOX_AREA);
  trace!("绝对面积筛选后剩余 {}", items.len());
  if items.is_empty() {
    return false;
  }

  items.retain(|d| d.mask.sum() > MIN_MASK_MASS);
  trace!("掩码质量筛选后剩余 {}", items.len());
  !items.is_empty()
}

/// 过滤单个图块的检测结果并转换到全图坐标
pub fn filter_tile(
  detections: RawDetections,
  tile: &Tile,
  thresholds: &FilterThresholds,
) -> Vec<FilteredDetection> {
  let mut items = detections.items;
  if !screen(&mut items, tile.area() as f32, thresholds) {
    return Vec::new();
  }

  items
    .into_iter()
    .map(|d| finalize(d, tile, thresholds.mask))
    .collect()
}

// 二值化、裁剪到检测框、平移到全图坐标
fn finalize(detection: RawDetection, tile: &Tile, mask_threshold: f32) -> FilteredDetection {
  let limit = tile.size as f32;
  let local = detection.bbox.map(|v| v.clamp(0.0, limit));
  let [x0, y0, x1, y1] = pixel_extent(&local);

  let binary = detection.mask.mapv(|p| u8::from(p >= mask_threshold));
  let cropped = binary.slice(s![y0..y1, x0..x1]).to_owned();

  let (col, row) = (tile.col as f32, tile.row as f32);
  FilteredDetection {
    bbox: [local[0] + col, local[1] + row, local[2] + col, local[3] + row],
    score: detection.score,
    mask: TileMask {
      anchor: (tile.col, tile.row),
      mask: cropped,
    },
  }
}
