// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model.rs - 模型
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

use std::borrow::Cow;

use image::RgbImage;

use crate::{
  FromConfig,
  config::{CfgNode, ConfigError},
};

/// 检测模型
///
/// 模型本身（网络结构、NMS、框回归）都在外部，这里只约定输入图像与输出结果。
pub trait Model {
  type Error;

  fn infer(&self, image: &RgbImage) -> Result<DetectResult, Self::Error>;
}

/// 像素坐标下的边界框 `(x1, y1, x2, y2)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
  pub x1: f32,
  pub y1: f32,
  pub x2: f32,
  pub y2: f32,
}

/// 图像内的整数像素区域，`[x, x + width) × [y, y + height)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRegion {
  pub x: u32,
  pub y: u32,
  pub width: u32,
  pub height: u32,
}

impl BBox {
  pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
    Self { x1, y1, x2, y2 }
  }

  pub fn scale(&self, sx: f32, sy: f32) -> Self {
    Self {
      x1: self.x1 * sx,
      y1: self.y1 * sy,
      x2: self.x2 * sx,
      y2: self.y2 * sy,
    }
  }

  /// 向零截断取整
  pub fn to_int(&self) -> [i64; 4] {
    [
      self.x1 as i64,
      self.y1 as i64,
      self.x2 as i64,
      self.y2 as i64,
    ]
  }

  /// 取整后裁剪到 `width × height` 的图像内；区域为空时返回 `None`
  pub fn pixel_region(&self, width: u32, height: u32) -> Option<PixelRegion> {
    let [x1, y1, x2, y2] = self.to_int();
    let (w, h) = (width as i64, height as i64);
    let x1 = x1.clamp(0, w);
    let x2 = x2.clamp(0, w);
    let y1 = y1.clamp(0, h);
    let y2 = y2.clamp(0, h);

    if x2 <= x1 || y2 <= y1 {
      return None;
    }

    Some(PixelRegion {
      x: x1 as u32,
      y: y1 as u32,
      width: (x2 - x1) as u32,
      height: (y2 - y1) as u32,
    })
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem {
  pub class_id: u32,
  pub score: f32,
  pub bbox: BBox,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
}

impl DetectResult {
  pub fn new(items: Vec<DetectItem>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, DetectItem> {
    self.items.iter()
  }

  pub fn boxes(&self) -> impl Iterator<Item = &BBox> + '_ {
    self.items.iter().map(|item| &item.bbox)
  }
}

/// 类别元数据
#[derive(Debug, Clone, Default)]
pub struct Metadata {
  thing_classes: Vec<String>,
}

impl Metadata {
  pub fn new(thing_classes: Vec<String>) -> Self {
    Self { thing_classes }
  }

  pub fn coco() -> Self {
    Self::new(COCO_CLASSES.iter().map(|s| s.to_string()).collect())
  }

  pub fn thing_classes(&self) -> &[String] {
    &self.thing_classes
  }

  pub fn label(&self, class_id: u32) -> Cow<'_, str> {
    match self.thing_classes.get(class_id as usize) {
      Some(name) => Cow::Borrowed(name.as_str()),
      None => Cow::Owned(format!("class {}", class_id)),
    }
  }
}

impl FromConfig for Metadata {
  type Error = ConfigError;

  fn from_config(cfg: &CfgNode) -> Result<Self, Self::Error> {
    let names = cfg.get_str_list("MODEL.ONNX.CLASS_NAMES")?;
    if !names.is_empty() {
      return Ok(Metadata::new(names));
    }

    let datasets = cfg.get_str_list("DATASETS.TEST")?;
    match datasets.first() {
      Some(name) if name.starts_with("coco") => Ok(Metadata::coco()),
      _ => Ok(Metadata::default()),
    }
  }
}

/// 按模型结构选取对应的置信度阈值键
pub fn score_threshold(cfg: &CfgNode) -> Result<f32, ConfigError> {
  let key = match cfg.get_str("MODEL.META_ARCHITECTURE")? {
    "FCOS" | "OneStageDetector" | "OneStageRCNN" => "MODEL.FCOS.INFERENCE_TH_TEST",
    "RetinaNet" => "MODEL.RETINANET.SCORE_THRESH_TEST",
    "MEInst" => "MODEL.MEInst.INFERENCE_TH_TEST",
    "PanopticFPN" => "MODEL.PANOPTIC_FPN.COMBINE.INSTANCES_CONFIDENCE_THRESH",
    _ => "MODEL.ROI_HEADS.SCORE_THRESH_TEST",
  };
  cfg.get_f32(key)
}

mod labels;
pub use self::labels::COCO_CLASSES;

pub mod transform;

#[cfg(feature = "onnx")]
mod onnx;
#[cfg(feature = "onnx")]
pub use self::onnx::{OnnxDetector, OnnxDetectorError};
