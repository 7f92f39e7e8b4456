// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/transform.rs - 推理前后的图像与结果变换
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

use std::str::FromStr;

use image::RgbImage;
use thiserror::Error;
use tracing::debug;

use crate::model::{BBox, DetectItem, DetectResult};

#[derive(Error, Debug, PartialEq)]
pub enum TransformError {
  #[error("不支持的输入格式: {0}")]
  UnsupportedFormat(String),
  #[error("模型输出长度不一致: boxes={boxes}, scores={scores}, classes={classes}")]
  OutputShapeMismatch {
    boxes: usize,
    scores: usize,
    classes: usize,
  },
}

/// 模型期望的通道顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
  Rgb,
  Bgr,
}

impl FromStr for InputFormat {
  type Err = TransformError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_uppercase().as_str() {
      "RGB" => Ok(InputFormat::Rgb),
      "BGR" => Ok(InputFormat::Bgr),
      _ => Err(TransformError::UnsupportedFormat(s.to_string())),
    }
  }
}

/// 短边缩放到 `short_edge`，长边不超过 `max_size`，返回 `(new_h, new_w)`
///
/// `short_edge` 为 0 时保持原尺寸。
pub fn resize_shortest_edge(height: u32, width: u32, short_edge: u32, max_size: u32) -> (u32, u32) {
  if short_edge == 0 || height == 0 || width == 0 {
    return (height, width);
  }

  let (h, w) = (height as f64, width as f64);
  let size = short_edge as f64;
  let scale = size / h.min(w);
  let (mut new_h, mut new_w) = if h < w {
    (size, scale * w)
  } else {
    (scale * h, size)
  };

  let longest = new_h.max(new_w);
  if max_size > 0 && longest > max_size as f64 {
    let scale = max_size as f64 / longest;
    new_h *= scale;
    new_w *= scale;
  }

  ((new_h + 0.5) as u32, (new_w + 0.5) as u32)
}

/// RGB 图像转为 CHW 排列的浮点张量数据，取值范围保持 0~255
pub fn to_chw_tensor(image: &RgbImage, format: InputFormat) -> Vec<f32> {
  let (width, height) = image.dimensions();
  let plane = (width as usize) * (height as usize);
  let mut data = vec![0f32; plane * 3];

  let order: [usize; 3] = match format {
    InputFormat::Rgb => [0, 1, 2],
    InputFormat::Bgr => [2, 1, 0],
  };

  for (idx, pixel) in image.pixels().enumerate() {
    for (c, &src) in order.iter().enumerate() {
      data[c * plane + idx] = pixel[src] as f32;
    }
  }
  data
}

/// 解析导出检测图的输出
///
/// `boxes` 为 `[N, 4]`，`scores` 与 `classes` 为 `[N]`，坐标位于缩放后的图像上，
/// `(sx, sy)` 把坐标映射回原图。低于阈值或类别为负的结果被丢弃，按分数降序最多保留
/// `max_detections` 个（0 表示不限制）。
pub fn decode_outputs(
  boxes: &[f32],
  scores: &[f32],
  classes: &[i64],
  (sx, sy): (f32, f32),
  score_threshold: f32,
  max_detections: usize,
) -> Result<DetectResult, TransformError> {
  let n = scores.len();
  if boxes.len() != n * 4 || classes.len() != n {
    return Err(TransformError::OutputShapeMismatch {
      boxes: boxes.len(),
      scores: n,
      classes: classes.len(),
    });
  }

  let mut items: Vec<DetectItem> = scores
    .iter()
    .zip(classes.iter())
    .zip(boxes.chunks_exact(4))
    .filter(|((score, _), _)| **score >= score_threshold)
    .filter_map(|((&score, &class_id), b)| {
      let Ok(class_id) = u32::try_from(class_id) else {
        debug!("丢弃无效类别 {} 的检测结果", class_id);
        return None;
      };
      Some(DetectItem {
        class_id,
        score,
        bbox: BBox::new(b[0], b[1], b[2], b[3]).scale(sx, sy),
      })
    })
    .collect();

  items.sort_by(|a, b| b.score.total_cmp(&a.score));
  if max_detections > 0 {
    items.truncate(max_detections);
  }

  Ok(DetectResult::new(items))
}
