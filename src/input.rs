// 该文件是 Xibaohe （细胞核） 项目的一部分。
// src/input.rs - 图像输入与归一化
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

use thiserror::Error;
use tracing::{debug, error};

use crate::tile::{Tile, TileImage};

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::ImageFileInput;

#[derive(Error, Debug)]
pub enum InputError {
  #[error("Unsupported pixel format: {0}")]
  UnsupportedPixelFormat(String),
  #[error("Shape mismatch: expected {expected} samples, got {actual}")]
  ShapeMismatch { expected: usize, actual: usize },
  #[error("Empty image")]
  EmptyImage,
  #[cfg(feature = "read_image_file")]
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[cfg(feature = "read_image_file")]
  #[error("Image loading error: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

/// 源图像的像素类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
  I8,
  U8,
  I16,
  U16,
  F16,
  I32,
  U32,
  F32,
  I64,
  U64,
  F64,
  Complex64,
  Complex128,
}

impl PixelFormat {
  /// 归一化除数，按位宽取 2^bits
  pub fn dynamic_range(&self) -> Result<f64, InputError> {
    match self {
      PixelFormat::I8 | PixelFormat::U8 => Ok(2f64.powi(8)),
      PixelFormat::U16 | PixelFormat::F16 => Ok(2f64.powi(16)),
      PixelFormat::U32 | PixelFormat::F32 => Ok(2f64.powi(32)),
      PixelFormat::U64 | PixelFormat::F64 => Ok(2f64.powi(64)),
      other => {
        error!("不支持的像素类型: {:?}", other);
        Err(InputError::UnsupportedPixelFormat(format!("{:?}", other)))
      }
    }
  }
}

/// 单通道原始图像，行优先
#[derive(Debug, Clone)]
pub struct RawImage {
  height: usize,
  width: usize,
  format: PixelFormat,
  samples: Vec<f64>,
}

impl RawImage {
  pub fn new(
    height: usize,
    width: usize,
    format: PixelFormat,
    samples: Vec<f64>,
  ) -> Result<Self, InputError> {
    if height == 0 || width == 0 {
      return Err(InputError::EmptyImage);
    }
    if samples.len() != height * width {
      return Err(InputError::ShapeMismatch {
        expected: height * width,
        actual: samples.len(),
      });
    }
    Ok(Self {
      height,
      width,
      format,
      samples,
    })
  }

  /// 从交错存储的多通道数据中取第一个通道
  pub fn first_channel(
    height: usize,
    width: usize,
    channels: usize,
    format: PixelFormat,
    interleaved: &[f64],
  ) -> Result<Self, InputError> {
    let channels = channels.max(1);
    if interleaved.len() != height * width * channels {
      return Err(InputError::ShapeMismatch {
        expected: height * width * channels,
        actual: interleaved.len(),
      });
    }
    let samples = interleaved.iter().step_by(channels).copied().collect();
    Self::new(height, width, format, samples)
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn format(&self) -> PixelFormat {
    self.format
  }

  /// 按像素类型的动态范围缩放到 [0, 255]
  pub fn normalize(&self) -> Result<NormalizedImage, InputError> {
    let range = self.format.dynamic_range()?;
    debug!(
      "归一化 {}x{} 图像, 像素类型 {:?}, 除数 {}",
      self.height, self.width, self.format, range
    );
    let data = self
      .samples
      .iter()
      .map(|&v| (v / range * 255.0) as f32)
      .collect();
    NormalizedImage::new(self.height, self.width, data)
  }
}

/// 归一化到 [0, 255] 的单通道图像
#[derive(Debug, Clone)]
pub struct NormalizedImage {
  height: usize,
  width: usize,
  data: Vec<f32>,
}

impl NormalizedImage {
  pub fn new(height: usize, width: usize, data: Vec<f32>) -> Result<Self, InputError> {
    if height == 0 || width == 0 {
      return Err(InputError::EmptyImage);
    }
    if data.len() != height * width {
      return Err(InputError::ShapeMismatch {
        expected: height * width,
        actual: data.len(),
      });
    }
    Ok(Self {
      height,
      width,
      data,
    })
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn shape(&self) -> (usize, usize) {
    (self.height, self.width)
  }

  pub fn data(&self) -> &[f32] {
    &self.data
  }

  pub fn get(&self, row: usize, col: usize) -> f32 {
    self.data[row * self.width + col]
  }

  /// 裁剪出一个图块，调度器保证图块完全位于图像内
  pub fn crop(&self, tile: &Tile) -> TileImage {
    debug_assert!(tile.row + tile.size <= self.height && tile.col + tile.size <= self.width);
    let mut data = Vec::with_capacity(tile.area());
    for row in tile.row..tile.row + tile.size {
      let start = row * self.width + tile.col;
      data.extend_from_slice(&self.data[start..start + tile.size]);
    }
    TileImage::new(*tile, data)
  }
}
