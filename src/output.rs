// 该文件是 Xibaohe （细胞核） 项目的一部分。
// src/output.rs - 输出定义
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

use thiserror::Error;

use crate::{input::NormalizedImage, pipeline::Segmentation};

pub trait Render<Frame, Output>: Sized {
  type Error;
  fn render_result(&self, frame: &Frame, result: &Output) -> Result<(), Self::Error>;
}

#[cfg(feature = "save_image_file")]
mod label_image;
#[cfg(feature = "save_image_file")]
pub use self::label_image::LabelImageOutput;

#[cfg(feature = "save_image_file")]
mod preview;
#[cfg(feature = "save_image_file")]
pub use self::preview::PreviewOutput;

mod summary;
pub use self::summary::{RunSummary, SummaryOutput};

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[cfg(feature = "save_image_file")]
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[cfg(feature = "save_image_file")]
  #[error("TIFF 编码错误: {0}")]
  TiffError(#[from] tiff::TiffError),
  #[error("序列化错误: {0}")]
  SerdeError(#[from] serde_json::Error),
}

pub enum OutputWrapper {
  #[cfg(feature = "save_image_file")]
  LabelImage(LabelImageOutput),
  #[cfg(feature = "save_image_file")]
  Preview(PreviewOutput),
  Summary(SummaryOutput),
}

impl Render<NormalizedImage, Segmentation> for OutputWrapper {
  type Error = OutputError;

  fn render_result(&self, frame: &NormalizedImage, result: &Segmentation) -> Result<(), Self::Error> {
    match self {
      #[cfg(feature = "save_image_file")]
      OutputWrapper::LabelImage(output) => output.render_result(frame, result),
      #[cfg(feature = "save_image_file")]
      OutputWrapper::Preview(output) => output.render_result(frame, result),
      OutputWrapper::Summary(output) => output.render_result(frame, result),
    }
  }
}

// 保存前创建父目录
fn ensure_parent(path: &Path) -> Result<(), OutputError> {
  if let Some(parent) = path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent)?;
  }
  Ok(())
}
