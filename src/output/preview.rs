// 该文件是 Xibaohe （细胞核） 项目的一部分。
// src/output/preview.rs - 分割结果预览图
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

use std::path::PathBuf;

use image::{ImageBuffer, Rgb, RgbImage};
use imageproc::{drawing::draw_hollow_rect_mut, rect::Rect};
use tracing::warn;

use crate::{
  filter::pixel_extent,
  input::NormalizedImage,
  output::{OutputError, Render, ensure_parent},
  pipeline::Segmentation,
};

const BOX_COLOR: [u8; 3] = [255, 255, 0]; // 黄色
const TINT_ALPHA: f32 = 0.45;

pub struct PreviewOutput {
  path: PathBuf,
  box_color: [u8; 3],
}

impl PreviewOutput {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      box_color: BOX_COLOR,
    }
  }

  pub fn with_box_color(mut self, color: [u8; 3]) -> Self {
    self.box_color = color;
    self
  }

  fn draw(&self, frame: &NormalizedImage, result: &Segmentation) -> RgbImage {
    let labels = result.canvas.labels();
    let mut image: RgbImage =
      ImageBuffer::from_fn(frame.width() as u32, frame.height() as u32, |x, y| {
        let (row, col) = (y as usize, x as usize);
        let gray = frame.get(row, col).clamp(0.0, 255.0);
        match labels[[row, col]] {
          0 => Rgb([gray as u8; 3]),
          label => {
            let tint = label_color(label);
            Rgb(tint.map(|c| (gray * (1.0 - TINT_ALPHA) + c as f32 * TINT_ALPHA) as u8))
          }
        }
      });

    for bbox in &result.detections.boxes {
      let [x0, y0, x1, y1] = pixel_extent(bbox);
      if x1 <= x0 || y1 <= y0 {
        continue;
      }
      let rect = Rect::at(x0 as i32, y0 as i32).of_size((x1 - x0) as u32, (y1 - y0) as u32);
      draw_hollow_rect_mut(&mut image, rect, Rgb(self.box_color));
    }
    image
  }
}

// 相邻标签颜色差异尽量大
fn label_color(label: u32) -> [u8; 3] {
  let hash = label.wrapping_mul(2_654_435_761);
  [
    (hash >> 24) as u8 | 0x40,
    (hash >> 16) as u8 | 0x40,
    (hash >> 8) as u8 | 0x40,
  ]
}

impl Render<NormalizedImage, Segmentation> for PreviewOutput {
  type Error = OutputError;

  fn render_result(&self, frame: &NormalizedImage, result: &Segmentation) -> Result<(), Self::Error> {
    let image = self.draw(frame, result);
    ensure_parent(&self.path)?;
    image.save(&self.path)?;

    warn!("保存预览图到文件: {}", self.path.display());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::output::testing::segmentation;

  #[test]
  fn draws_boxes_and_tints_labels() {
    let (frame, result) = segmentation();
    let output = PreviewOutput::new("unused.png").with_box_color([255, 0, 0]);
    let image = output.draw(&frame, &result);

    assert_eq!(image.dimensions(), (16, 16));
    assert_eq!(image.get_pixel(1, 1), &Rgb([255, 0, 0]));
    let gray = frame.get(15, 0) as u8;
    assert_eq!(image.get_pixel(0, 15), &Rgb([gray; 3]));
    assert_ne!(image.get_pixel(2, 2), &Rgb([frame.get(2, 2) as u8; 3]));
  }

  #[test]
  fn saves_png() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("preview.png");
    let (frame, result) = segmentation();
    PreviewOutput::new(&path)
      .render_result(&frame, &result)
      .unwrap();
    assert_eq!(image::open(&path).unwrap().width(), 16);
  }
}
