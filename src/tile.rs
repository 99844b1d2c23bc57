// 该文件是 Xibaohe （细胞核） 项目的一部分。
// src/tile.rs - 图块调度
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

use crate::config::ConfigError;

/// 图像中的一个正方形窗口
///
/// `index` 按调度顺序单调递增，仅用作检查点键。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tile {
  pub index: usize,
  pub row: usize,
  pub col: usize,
  pub size: usize,
}

impl Tile {
  pub fn area(&self) -> usize {
    self.size * self.size
  }
}

/// 单个图块的像素数据，行优先，取值范围 [0, 255]
#[derive(Debug, Clone)]
pub struct TileImage {
  tile: Tile,
  data: Vec<f32>,
}

impl TileImage {
  pub fn new(tile: Tile, data: Vec<f32>) -> Self {
    assert_eq!(
      data.len(),
      tile.area(),
      "图块数据长度不匹配: 期望 {}, 实际 {}",
      tile.area(),
      data.len()
    );
    Self { tile, data }
  }

  pub fn tile(&self) -> &Tile {
    &self.tile
  }

  pub fn size(&self) -> usize {
    self.tile.size
  }

  pub fn data(&self) -> &[f32] {
    &self.data
  }

  pub fn get(&self, row: usize, col: usize) -> f32 {
    self.data[row * self.tile.size + col]
  }
}

/// 滑动窗口图块调度器
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileScheduler {
  height: usize,
  width: usize,
  size: usize,
  step: usize,
}

impl TileScheduler {
  pub fn new(height: usize, width: usize, size: usize, step: usize) -> Result<Self, ConfigError> {
    if size == 0 {
      return Err(ConfigError::ZeroLength("tile-size"));
    }
    if step == 0 {
      return Err(ConfigError::ZeroLength("rolling-window"));
    }
    Ok(Self {
      height,
      width,
      size,
      step,
    })
  }

  pub fn tiles(&self) -> Tiles {
    Tiles {
      scheduler: *self,
      phase: Phase::Primary,
      row: 0,
      col: 0,
      next_index: 0,
    }
  }

  // 主扫描的最后一行止于 H - (H - T) % S，余数非零时才补底边行
  fn needs_bottom_row(&self) -> bool {
    self.size <= self.height && (self.height - self.size) % self.step != 0
  }

  fn needs_right_column(&self) -> bool {
    self.size <= self.width && (self.width - self.size) % self.step != 0
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
  Primary,
  BottomRow,
  RightColumn,
  Corner,
  Done,
}

/// 惰性图块序列：行优先主扫描，之后是底边行、右边列与右下角
#[derive(Debug, Clone)]
pub struct Tiles {
  scheduler: TileScheduler,
  phase: Phase,
  row: usize,
  col: usize,
  next_index: usize,
}

impl Tiles {
  fn emit(&mut self, row: usize, col: usize) -> Tile {
    let tile = Tile {
      index: self.next_index,
      row,
      col,
      size: self.scheduler.size,
    };
    self.next_index += 1;
    tile
  }

  fn advance(&mut self, phase: Phase) {
    self.phase = phase;
    self.row = 0;
    self.col = 0;
  }
}

impl Iterator for Tiles {
  type Item = Tile;

  fn next(&mut self) -> Option<Self::Item> {
    let TileScheduler {
      height,
      width,
      size,
      step,
    } = self.scheduler;

    loop {
      match self.phase {
        Phase::Primary => {
          if self.row + size > height {
            self.advance(Phase::BottomRow);
            continue;
          }
          if self.col + size > width {
            self.row += step;
            self.col = 0;
            continue;
          }
          let tile = self.emit(self.row, self.col);
          self.col += step;
          return Some(tile);
        }
        Phase::BottomRow => {
          if !self.scheduler.needs_bottom_row() || self.col + size > width {
            self.advance(Phase::RightColumn);
            continue;
          }
          let tile = self.emit(height - size, self.col);
          self.col += step;
          return Some(tile);
        }
        Phase::RightColumn => {
          if !self.scheduler.needs_right_column() || self.row + size > height {
            self.advance(Phase::Corner);
            continue;
          }
          let tile = self.emit(self.row, width - size);
          self.row += step;
          return Some(tile);
        }
        Phase::Corner => {
          self.phase = Phase::Done;
          if self.scheduler.needs_bottom_row() && self.scheduler.needs_right_column() {
            return Some(self.emit(height - size, width - size));
          }
        }
        Phase::Done => return None,
      }
    }
  }
}

impl std::iter::FusedIterator for Tiles {}
