// 该文件是 Xibaohe （细胞核） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use std::path::Path;

use image::{DynamicImage, ImageBuffer, ImageReader, Pixel};
use tracing::{error, info};

use crate::input::{InputError, PixelFormat, RawImage};

/// 通过 `image` 读取图像文件，多通道图像只保留第一个通道
pub struct ImageFileInput;

impl ImageFileInput {
  pub fn open(path: impl AsRef<Path>) -> Result<RawImage, InputError> {
    let path = path.as_ref();
    info!("读取图像文件: {}", path.display());
    let image = ImageReader::open(path)?.with_guessed_format()?.decode()?;
    let (width, height) = (image.width() as usize, image.height() as usize);

    let (format, samples) = match &image {
      DynamicImage::ImageLuma8(buf) => (PixelFormat::U8, first_channel(buf)),
      DynamicImage::ImageLumaA8(buf) => (PixelFormat::U8, first_channel(buf)),
      DynamicImage::ImageRgb8(buf) => (PixelFormat::U8, first_channel(buf)),
      DynamicImage::ImageRgba8(buf) => (PixelFormat::U8, first_channel(buf)),
      DynamicImage::ImageLuma16(buf) => (PixelFormat::U16, first_channel(buf)),
      DynamicImage::ImageLumaA16(buf) => (PixelFormat::U16, first_channel(buf)),
      DynamicImage::ImageRgb16(buf) => (PixelFormat::U16, first_channel(buf)),
      DynamicImage::ImageRgba16(buf) => (PixelFormat::U16, first_channel(buf)),
      DynamicImage::ImageRgb32F(buf) => (PixelFormat::F32, first_channel(buf)),
      DynamicImage::ImageRgba32F(buf) => (PixelFormat::F32, first_channel(buf)),
      other => {
        error!("不支持的颜色类型: {:?}", other.color());
        return Err(InputError::UnsupportedPixelFormat(format!(
          "{:?}",
          other.color()
        )));
      }
    };

    info!("图像尺寸: {}x{}, 像素类型 {:?}", height, width, format);
    RawImage::new(height, width, format, samples)
  }
}

fn first_channel<P>(buf: &ImageBuffer<P, Vec<P::Subpixel>>) -> Vec<f64>
where
  P: Pixel,
  P::Subpixel: Into<f64>,
{
  buf.pixels().map(|p| p.channels()[0].into()).collect()
}
