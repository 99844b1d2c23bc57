// 该文件是 Xibaohe （细胞核） 项目的一部分。
// src/output/label_image.rs - 保存 16 位标签图
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

use std::{fs, io::Cursor, path::PathBuf};

use image::{ImageBuffer, Luma};
use tiff::encoder::{TiffEncoder, colortype};
use tracing::{info, warn};

use crate::{
  canvas::Canvas,
  input::NormalizedImage,
  output::{OutputError, Render, ensure_parent},
  pipeline::Segmentation,
};

/// 标签图输出，最大标签不超过 65535 时写 16 位灰度，否则写 32 位灰度
pub struct LabelImageOutput {
  path: PathBuf,
}

impl LabelImageOutput {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  fn to_gray16(canvas: &Canvas) -> ImageBuffer<Luma<u16>, Vec<u16>> {
    let (height, width) = canvas.shape();
    let labels = canvas.labels();
    ImageBuffer::from_fn(width as u32, height as u32, |x, y| {
      Luma([labels[[y as usize, x as usize]] as u16])
    })
  }

  fn encode_gray32(canvas: &Canvas) -> Result<Vec<u8>, OutputError> {
    let (height, width) = canvas.shape();
    let data: Vec<u32> = canvas.labels().iter().copied().collect();
    let mut buffer = Cursor::new(Vec::new());
    TiffEncoder::new(&mut buffer)?.write_image::<colortype::Gray32>(
      width as u32,
      height as u32,
      &data,
    )?;
    Ok(buffer.into_inner())
  }
}

impl Render<NormalizedImage, Segmentation> for LabelImageOutput {
  type Error = OutputError;

  fn render_result(&self, _frame: &NormalizedImage, result: &Segmentation) -> Result<(), Self::Error> {
    ensure_parent(&self.path)?;
    let max = result.canvas.max_label();
    if max <= u32::from(u16::MAX) {
      Self::to_gray16(&result.canvas).save(&self.path)?;
    } else {
      info!("最大标签 {} 超出 16 位范围，改用 32 位标签图", max);
      fs::write(&self.path, Self::encode_gray32(&result.canvas)?)?;
    }

    warn!("保存标签图到文件: {}", self.path.display());
    Ok(())
  }
}
