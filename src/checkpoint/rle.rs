// 该文件是 Xibaohe （细胞核） 项目的一部分。
// src/checkpoint/rle.rs - 二值掩码游程编码
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

use ndarray::{Array2, ArrayView2};

/// 行优先游程编码，游程交替表示 0 与 1，第一个游程总是 0（可能为空）
pub fn encode(mask: ArrayView2<u8>) -> Vec<u32> {
  let mut runs = Vec::new();
  let mut current = 0u8;
  let mut count = 0u32;
  for &v in mask.iter() {
    let v = u8::from(v != 0);
    if v != current {
      runs.push(count);
      count = 0;
      current = v;
    }
    count += 1;
  }
  runs.push(count);
  runs
}

/// 解码，游程总长必须等于 `height * width`
pub fn decode(runs: &[u32], height: usize, width: usize) -> Option<Array2<u8>> {
  let total: usize = runs.iter().map(|&r| r as usize).sum();
  if total != height * width {
    return None;
  }
  let mut data = Vec::with_capacity(total);
  let mut value = 0u8;
  for &run in runs {
    data.extend(std::iter::repeat_n(value, run as usize));
    value ^= 1;
  }
  Array2::from_shape_vec((height, width), data).ok()
}
