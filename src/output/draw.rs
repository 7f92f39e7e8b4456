// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
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

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  FromConfig,
  config::{CfgNode, ConfigError},
  model::{DetectItem, DetectResult, Metadata},
};

// 未加载字体时用于估计标签宽度
const LABEL_CHAR_WIDTH: f32 = 0.55;
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const PALETTE_SIZE: usize = 80;

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("配置错误: {0}")]
  Config(#[from] ConfigError),
  #[error("无法读取字体文件 {path}: {source}")]
  FontIo {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("无效的字体文件: {0}")]
  InvalidFont(PathBuf),
}

pub struct Draw {
  font: Option<FontArc>,
  font_size: f32,
  box_thickness: u32,
  colors: Vec<Rgb<u8>>,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      font: None,
      font_size: 18.0,
      box_thickness: 2,
      colors: palette(PALETTE_SIZE),
    }
  }
}

impl FromConfig for Draw {
  type Error = DrawError;

  fn from_config(cfg: &CfgNode) -> Result<Self, Self::Error> {
    let font_path = cfg.get_str("VIS.FONT")?;
    let font = if font_path.is_empty() {
      info!("未配置 VIS.FONT，标签只绘制色条");
      None
    } else {
      let path = PathBuf::from(font_path);
      let data = std::fs::read(&path).map_err(|source| DrawError::FontIo {
        path: path.clone(),
        source,
      })?;
      Some(FontArc::try_from_vec(data).map_err(|_| DrawError::InvalidFont(path))?)
    };

    Ok(Self {
      font,
      font_size: cfg.get_f32("VIS.FONT_SIZE")?,
      box_thickness: cfg.get_u32("VIS.BOX_THICKNESS")?.max(1),
      colors: palette(PALETTE_SIZE),
    })
  }
}

impl Draw {
  pub fn color_of(&self, class_id: u32) -> Rgb<u8> {
    self.colors[class_id as usize % self.colors.len()]
  }

  /// 在图像上绘制全部检测框与标签
  pub fn draw_detections(&self, image: &mut RgbImage, result: &DetectResult, metadata: &Metadata) {
    for item in result.iter() {
      self.draw_item(image, item, metadata);
    }
  }

  fn draw_item(&self, image: &mut RgbImage, item: &DetectItem, metadata: &Metadata) {
    let Some(region) = item.bbox.pixel_region(image.width(), image.height()) else {
      debug!("检测框位于图像外，跳过: {:?}", item.bbox);
      return;
    };
    let color = self.color_of(item.class_id);

    // 边框向内加粗
    for t in 0..self.box_thickness {
      let width = region.width.saturating_sub(2 * t);
      let height = region.height.saturating_sub(2 * t);
      if width == 0 || height == 0 {
        break;
      }
      let rect = Rect::at((region.x + t) as i32, (region.y + t) as i32).of_size(width, height);
      draw_hollow_rect_mut(image, rect, color);
    }

    let label = format!("{} {:.0}%", metadata.label(item.class_id), item.score * 100.0);
    let (text_width, text_height) = self.label_size(&label);
    let bar_height = text_height + 2 * LABEL_TEXT_VERTICAL_PADDING as u32;

    // 标签放在框的上方，空间不够时贴着图像上边缘
    let label_x = region.x as i32;
    let label_y = (region.y as i32 - bar_height as i32).max(0);
    let bar_width = text_width.min(image.width() - region.x);
    if bar_width == 0 {
      return;
    }

    let bar = Rect::at(label_x, label_y).of_size(bar_width, bar_height);
    draw_filled_rect_mut(image, bar, color);

    if let Some(font) = &self.font {
      draw_text_mut(
        image,
        TEXT_COLOR,
        label_x,
        label_y + LABEL_TEXT_VERTICAL_PADDING,
        PxScale::from(self.font_size),
        font,
        &label,
      );
    }
  }

  fn label_size(&self, label: &str) -> (u32, u32) {
    match &self.font {
      Some(font) => text_size(PxScale::from(self.font_size), font, label),
      None => (
        (label.chars().count() as f32 * self.font_size * LABEL_CHAR_WIDTH).ceil() as u32,
        self.font_size.ceil() as u32,
      ),
    }
  }
}

/// 按色相均匀分布的类别颜色
fn palette(n: usize) -> Vec<Rgb<u8>> {
  (0..n)
    .map(|i| hsv_to_rgb(i as f32 / n as f32 * 360.0, 0.8, 0.9))
    .collect()
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
  let c = v * s;
  let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
  let m = v - c;

  let (r, g, b) = match h {
    h if h < 60.0 => (c, x, 0.0),
    h if h < 120.0 => (x, c, 0.0),
    h if h < 180.0 => (0.0, c, x),
    h if h < 240.0 => (0.0, x, c),
    h if h < 300.0 => (x, 0.0, c),
    _ => (c, 0.0, x),
  };

  Rgb([
    ((r + m) * 255.0) as u8,
    ((g + m) * 255.0) as u8,
    ((b + m) * 255.0) as u8,
  ])
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::BBox;

  fn single(class_id: u32, bbox: BBox) -> DetectResult {
    DetectResult::new(vec![DetectItem {
      class_id,
      score: 0.87,
      bbox,
    }])
  }

  #[test]
  fn box_edges_use_class_color() {
    let draw = Draw::default();
    let mut image = RgbImage::new(100, 100);
    let result = single(3, BBox::new(20.0, 40.0, 60.0, 80.0));
    draw.draw_detections(&mut image, &result, &Metadata::coco());

    let color = draw.color_of(3);
    // 外框与向内一像素的第二道边框
    assert_eq!(*image.get_pixel(20, 60), color);
    assert_eq!(*image.get_pixel(21, 60), color);
    assert_eq!(*image.get_pixel(59, 60), color);
    // 框内部保持原样
    assert_eq!(*image.get_pixel(40, 60), Rgb([0, 0, 0]));
  }

  #[test]
  fn label_bar_sits_above_box() {
    let draw = Draw::default();
    let mut image = RgbImage::new(200, 100);
    let result = single(0, BBox::new(10.0, 50.0, 60.0, 90.0));
    draw.draw_detections(&mut image, &result, &Metadata::coco());

    assert_eq!(*image.get_pixel(12, 45), draw.color_of(0));
    assert_eq!(*image.get_pixel(12, 10), Rgb([0, 0, 0]));
  }

  #[test]
  fn box_outside_image_is_skipped() {
    let draw = Draw::default();
    let mut image = RgbImage::new(32, 32);
    let result = single(1, BBox::new(40.0, 40.0, 80.0, 80.0));
    draw.draw_detections(&mut image, &result, &Metadata::default());
    assert!(image.pixels().all(|p| *p == Rgb([0, 0, 0])));
  }

  #[test]
  fn palette_is_distinct_and_wraps() {
    let draw = Draw::default();
    assert_ne!(draw.color_of(0), draw.color_of(1));
    assert_eq!(draw.color_of(0), draw.color_of(PALETTE_SIZE as u32));
  }

  #[test]
  fn missing_font_file_is_an_error() {
    let mut cfg = crate::config::get_cfg().unwrap();
    cfg
      .merge_from_list(&["VIS.FONT", "/nonexistent/font.ttf"])
      .unwrap();
    assert!(matches!(
      Draw::from_config(&cfg),
      Err(DrawError::FontIo { .. })
    ));
  }
}
