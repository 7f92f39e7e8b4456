// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/onnx.rs - ONNX 导出检测图推理
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

//! # ONNX 检测器
//!
//! 加载 `MODEL.WEIGHTS` 指向的导出检测图。导出图包含完整的检测流程（骨干网络、
//! 检测头、NMS），输入为 `[3, H, W]` 的 0~255 浮点图像，输出：
//!
//! - `boxes`: `[N, 4]`，缩放后图像上的 `(x1, y1, x2, y2)`
//! - `scores`: `[N]`
//! - `classes`: `[N]`，int64（部分导出器为 float32）
//!
//! 输入输出名称可在 `MODEL.ONNX` 中修改。

use std::{path::PathBuf, sync::Mutex, time::Instant};

use image::{RgbImage, imageops::FilterType};
use ort::{
  session::{Session, SessionOutputs},
  value::Tensor,
};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  FromConfig,
  config::{CfgNode, ConfigError},
  model::{
    DetectResult, Model, score_threshold,
    transform::{InputFormat, TransformError, decode_outputs, resize_shortest_edge, to_chw_tensor},
  },
};

#[derive(Error, Debug)]
pub enum OnnxDetectorError {
  #[error("配置错误: {0}")]
  Config(#[from] ConfigError),
  #[error("未指定模型文件 (MODEL.WEIGHTS)")]
  MissingWeights,
  #[error("模型文件不存在: {0}")]
  WeightsNotFound(PathBuf),
  #[error("ONNX Runtime 错误: {0}")]
  Ort(#[from] ort::Error),
  #[error("模型输出缺失: {0}")]
  MissingOutput(String),
  #[error("推理会话锁已损坏")]
  SessionPoisoned,
  #[error("{0}")]
  Transform(#[from] TransformError),
}

/// `MODEL.ONNX` 配置节
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
struct OnnxConfig {
  input_name: String,
  boxes_output: String,
  scores_output: String,
  classes_output: String,
  intra_threads: usize,
}

pub struct OnnxDetector {
  session: Mutex<Session>,
  io: OnnxConfig,
  format: InputFormat,
  min_size: u32,
  max_size: u32,
  score_threshold: f32,
  max_detections: usize,
}

impl FromConfig for OnnxDetector {
  type Error = OnnxDetectorError;

  fn from_config(cfg: &CfgNode) -> Result<Self, Self::Error> {
    let weights = cfg.get_str("MODEL.WEIGHTS")?;
    if weights.is_empty() {
      return Err(OnnxDetectorError::MissingWeights);
    }
    let weights = PathBuf::from(weights);
    if !weights.is_file() {
      return Err(OnnxDetectorError::WeightsNotFound(weights));
    }

    let io: OnnxConfig = cfg.section("MODEL.ONNX")?;
    let format = cfg.get_str("INPUT.FORMAT")?.parse::<InputFormat>()?;

    info!("加载 ONNX 模型: {}", weights.display());
    let mut builder = Session::builder()?;
    if io.intra_threads > 0 {
      builder = builder.with_intra_threads(io.intra_threads)?;
    }
    let session = builder.commit_from_file(&weights)?;

    let detector = OnnxDetector {
      session: Mutex::new(session),
      format,
      min_size: cfg.get_u32("INPUT.MIN_SIZE_TEST")?,
      max_size: cfg.get_u32("INPUT.MAX_SIZE_TEST")?,
      score_threshold: score_threshold(cfg)?,
      max_detections: cfg.get_u32("TEST.DETECTIONS_PER_IMAGE")? as usize,
      io,
    };
    info!(
      "模型加载完成: 输入格式 {:?}, 短边 {}, 长边上限 {}, 阈值 {}",
      detector.format, detector.min_size, detector.max_size, detector.score_threshold
    );
    Ok(detector)
  }
}

impl OnnxDetector {
  fn extract_f32(outputs: &SessionOutputs<'_>, name: &str) -> Result<Vec<f32>, OnnxDetectorError> {
    let value = outputs
      .get(name)
      .ok_or_else(|| OnnxDetectorError::MissingOutput(name.to_string()))?;
    let (_shape, data) = value.try_extract_tensor::<f32>()?;
    Ok(data.to_vec())
  }

  // 类别输出一般为 int64，个别导出器给出 float32
  fn extract_classes(outputs: &SessionOutputs<'_>, name: &str) -> Result<Vec<i64>, OnnxDetectorError> {
    let value = outputs
      .get(name)
      .ok_or_else(|| OnnxDetectorError::MissingOutput(name.to_string()))?;
    if let Ok((_shape, data)) = value.try_extract_tensor::<i64>() {
      return Ok(data.to_vec());
    }
    let (_shape, data) = value.try_extract_tensor::<f32>()?;
    Ok(data.iter().map(|&c| c as i64).collect())
  }
}

impl Model for OnnxDetector {
  type Error = OnnxDetectorError;

  fn infer(&self, image: &RgbImage) -> Result<DetectResult, Self::Error> {
    let (width, height) = image.dimensions();
    let (new_h, new_w) = resize_shortest_edge(height, width, self.min_size, self.max_size);

    let now = Instant::now();
    let resized;
    let input = if (new_w, new_h) == (width, height) {
      image
    } else {
      resized = image::imageops::resize(image, new_w, new_h, FilterType::Triangle);
      &resized
    };

    let shape = [3usize, new_h as usize, new_w as usize];
    let data = to_chw_tensor(input, self.format);
    let tensor = Tensor::from_array((shape, data.into_boxed_slice()))?.into_dyn();
    debug!("预处理完成: {}x{} -> {}x{}, 耗时 {:.2?}", width, height, new_w, new_h, now.elapsed());

    let (boxes, scores, classes) = {
      let mut session = self
        .session
        .lock()
        .map_err(|_| OnnxDetectorError::SessionPoisoned)?;
      let outputs = session.run(ort::inputs![self.io.input_name.as_str() => tensor])?;
      (
        Self::extract_f32(&outputs, &self.io.boxes_output)?,
        Self::extract_f32(&outputs, &self.io.scores_output)?,
        Self::extract_classes(&outputs, &self.io.classes_output)?,
      )
    };

    let scale = (width as f32 / new_w as f32, height as f32 / new_h as f32);
    let result = decode_outputs(
      &boxes,
      &scores,
      &classes,
      scale,
      self.score_threshold,
      self.max_detections,
    )?;
    debug!("推理完成: {} 个结果, 耗时 {:.2?}", result.len(), now.elapsed());
    Ok(result)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::get_cfg;

  #[test]
  fn missing_weights_is_reported() {
    let err = OnnxDetector::from_config(&get_cfg().unwrap()).err().unwrap();
    assert!(matches!(err, OnnxDetectorError::MissingWeights));
  }

  #[test]
  fn nonexistent_weights_is_reported() {
    let mut cfg = get_cfg().unwrap();
    cfg
      .merge_from_list(&["MODEL.WEIGHTS", "/nonexistent/model.onnx"])
      .unwrap();
    let err = OnnxDetector::from_config(&cfg).err().unwrap();
    assert!(matches!(err, OnnxDetectorError::WeightsNotFound(_)));
  }

  #[test]
  fn onnx_section_deserializes_from_defaults() {
    let io: OnnxConfig = get_cfg().unwrap().section("MODEL.ONNX").unwrap();
    assert_eq!(io.input_name, "image");
    assert_eq!(io.classes_output, "classes");
    assert_eq!(io.intra_threads, 0);
  }
}
