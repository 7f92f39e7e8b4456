// 该文件是 Shanan （山南西风） 项目的一部分。
// src/predictor.rs - 推理与可视化
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

use image::RgbImage;
use thiserror::Error;

use crate::{
  FromConfig,
  config::{CfgNode, ConfigError},
  model::{DetectResult, Metadata, Model},
  output::{Draw, DrawError},
};

#[derive(Error, Debug)]
pub enum PredictorError {
  #[error("配置错误: {0}")]
  Config(#[from] ConfigError),
  #[error("可视化初始化错误: {0}")]
  Draw(#[from] DrawError),
}

/// 运行模型并把结果画在图像上
pub struct VisualizationDemo<M> {
  model: M,
  metadata: Metadata,
  draw: Draw,
}

impl<M: Model> VisualizationDemo<M> {
  pub fn new(model: M, metadata: Metadata, draw: Draw) -> Self {
    Self {
      model,
      metadata,
      draw,
    }
  }

  /// 元数据与绘制参数取自配置
  pub fn from_config(model: M, cfg: &CfgNode) -> Result<Self, PredictorError> {
    Ok(Self::new(
      model,
      Metadata::from_config(cfg)?,
      Draw::from_config(cfg)?,
    ))
  }

  pub fn run_on_image(&self, image: &RgbImage) -> Result<(DetectResult, RgbImage), M::Error> {
    let result = self.model.infer(image)?;
    let visualized = self.visualize(image, &result);
    Ok((result, visualized))
  }

  /// 逐帧推理并绘制，惰性求值
  pub fn run_on_video<'a, I>(
    &'a self,
    frames: I,
  ) -> impl Iterator<Item = Result<RgbImage, M::Error>> + 'a
  where
    I: IntoIterator<Item = RgbImage>,
    I::IntoIter: 'a,
  {
    frames.into_iter().map(move |frame| {
      let result = self.model.infer(&frame)?;
      let mut frame = frame;
      self.draw.draw_detections(&mut frame, &result, &self.metadata);
      Ok(frame)
    })
  }

  fn visualize(&self, image: &RgbImage, result: &DetectResult) -> RgbImage {
    let mut canvas = image.clone();
    self.draw.draw_detections(&mut canvas, result, &self.metadata);
    canvas
  }
}

#[cfg(test)]
mod tests {
  use std::cell::Cell;

  use super::*;
  use crate::model::{BBox, DetectItem};

  struct FixedModel {
    calls: Cell<usize>,
  }

  impl Model for FixedModel {
    type Error = std::convert::Infallible;

    fn infer(&self, _image: &RgbImage) -> Result<DetectResult, Self::Error> {
      self.calls.set(self.calls.get() + 1);
      Ok(DetectResult::new(vec![DetectItem {
        class_id: 0,
        score: 0.9,
        bbox: BBox::new(2.0, 2.0, 12.0, 12.0),
      }]))
    }
  }

  fn demo() -> VisualizationDemo<FixedModel> {
    VisualizationDemo::new(
      FixedModel {
        calls: Cell::new(0),
      },
      Metadata::coco(),
      Draw::default(),
    )
  }

  #[test]
  fn run_on_image_keeps_input_untouched() {
    let demo = demo();
    let image = RgbImage::new(32, 32);
    let (result, visualized) = demo.run_on_image(&image).unwrap();

    assert_eq!(result.len(), 1);
    assert!(image.pixels().all(|p| p.0 == [0, 0, 0]));
    assert_ne!(visualized, image);
  }

  #[test]
  fn run_on_video_is_lazy() {
    let demo = demo();
    let frames = (0..5).map(|_| RgbImage::new(16, 16));
    let mut output = demo.run_on_video(frames);

    assert_eq!(demo.model.calls.get(), 0);
    assert!(output.next().unwrap().is_ok());
    assert!(output.next().unwrap().is_ok());
    assert_eq!(demo.model.calls.get(), 2);
  }
}
