// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 输入
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

//! # GStreamer 视频输入
//!
//! 视频文件（`filesrc ! decodebin`）与摄像头（`v4l2src`）两种来源，统一经
//! `videoconvert` 转为 RGB 后由 `appsink` 取出。
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```
//!
//! 需要启用 `gstreamer` 特性。
//!
//! ## 支持的视频格式
//!
//! - RGB
//! - BGR（自动转换为 RGB）

use std::path::{Path, PathBuf};

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::input::Frame;

// 等待第一帧的最长时间
const FIRST_SAMPLE_TIMEOUT_SECS: u64 = 10;

/// GStreamer 输入错误类型
#[derive(Error, Debug)]
pub enum GStreamerInputError {
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("Failed to get appsink element")]
  AppSinkNotFound,
  #[error("Failed to convert element to appsink")]
  AppSinkConversionFailed,
  #[error("Failed to get video info from caps")]
  VideoInfoError,
  #[error("Unsupported video format")]
  UnsupportedFormat,
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  #[error("Buffer size mismatch: expected {expected} bytes, got {actual} bytes")]
  BufferSizeMismatch { expected: usize, actual: usize },
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  #[error("No frame received from {0}")]
  NoFrames(String),
}

/// 视频来源
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GStreamerSource {
  File(PathBuf),
  Camera(String),
}

impl GStreamerSource {
  // 路径与设备不进入管道描述，由 `source_property` 单独设置
  fn to_pipeline(&self) -> &'static str {
    match self {
      GStreamerSource::File(_) => {
        "filesrc name=source ! decodebin ! videoconvert ! video/x-raw,format=RGB ! appsink name=sink sync=false max-buffers=4"
      }
      GStreamerSource::Camera(_) => {
        "v4l2src name=source ! videoconvert ! video/x-raw,format=RGB ! appsink name=sink max-buffers=2 drop=true"
      }
    }
  }

  fn source_property(&self) -> (&'static str, String) {
    match self {
      GStreamerSource::File(path) => ("location", path.to_string_lossy().into_owned()),
      GStreamerSource::Camera(device) => ("device", device.clone()),
    }
  }

  fn describe(&self) -> String {
    match self {
      GStreamerSource::File(path) => path.display().to_string(),
      GStreamerSource::Camera(device) => device.clone(),
    }
  }
}

/// GStreamer 视频输入
///
/// 打开时先取出第一帧以确定尺寸与帧率，随后按帧迭代，直到流结束或出错。
pub struct GStreamerInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  width: u32,
  height: u32,
  fps: f64,
  frame_count: Option<u64>,
  pending: Option<gst::Sample>,
  index: u64,
}

impl Drop for GStreamerInput {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer pipeline: {}", e);
    }
  }
}

impl GStreamerInput {
  pub fn open(source: &GStreamerSource) -> Result<Self, GStreamerInputError> {
    gst::init()?;

    let description = source.to_pipeline();
    info!("GStreamer pipeline description: {}", description);

    let pipeline = gst::parse::launch(description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("Failed to create pipeline".to_string()))?;

    let (property, value) = source.source_property();
    pipeline
      .by_name("source")
      .ok_or_else(|| GStreamerInputError::PipelineError("Failed to get source element".to_string()))?
      .set_property(property, value.as_str());

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkConversionFailed)?;

    pipeline.set_state(gst::State::Playing)?;

    let first = appsink
      .try_pull_sample(gst::ClockTime::from_seconds(FIRST_SAMPLE_TIMEOUT_SECS))
      .ok_or_else(|| match bus_error(&pipeline) {
        Some(message) => GStreamerInputError::PipelineError(message),
        None => GStreamerInputError::NoFrames(source.describe()),
      })?;

    let caps = first
      .caps()
      .ok_or_else(|| GStreamerInputError::PipelineError("No caps in sample".to_string()))?;
    let video_info =
      gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;
    let fps = video_info.fps();
    let fps = if fps.numer() > 0 && fps.denom() > 0 {
      fps.numer() as f64 / fps.denom() as f64
    } else {
      0.0
    };

    let frame_count = match source {
      GStreamerSource::File(_) => pipeline
        .query_duration::<gst::ClockTime>()
        .map(|duration| (duration.nseconds() as f64 * fps / 1e9).round() as u64),
      GStreamerSource::Camera(_) => None,
    };

    info!(
      "输入源已打开: {} {}x{} @ {:.2} fps, 帧数 {:?}",
      source.describe(),
      video_info.width(),
      video_info.height(),
      fps,
      frame_count
    );

    Ok(GStreamerInput {
      width: video_info.width(),
      height: video_info.height(),
      fps,
      frame_count,
      pending: Some(first),
      index: 0,
      pipeline,
      appsink,
    })
  }

  pub fn open_file(path: &Path) -> Result<Self, GStreamerInputError> {
    Self::open(&GStreamerSource::File(path.to_path_buf()))
  }

  pub fn open_camera(device: &str) -> Result<Self, GStreamerInputError> {
    Self::open(&GStreamerSource::Camera(device.to_string()))
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn fps(&self) -> f64 {
    self.fps
  }

  /// 总帧数，由时长与帧率估算；摄像头或时长未知时为 `None`
  pub fn frame_count(&self) -> Option<u64> {
    self.frame_count
  }

  fn pull_sample(&mut self) -> Option<gst::Sample> {
    if let Some(sample) = self.pending.take() {
      return Some(sample);
    }
    match self.appsink.pull_sample() {
      Ok(sample) => Some(sample),
      Err(_) => {
        match bus_error(&self.pipeline) {
          Some(message) => error!("GStreamer 管道错误: {}", message),
          None => info!("输入流结束"),
        }
        None
      }
    }
  }
}

impl Iterator for GStreamerInput {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    let sample = self.pull_sample()?;
    match convert_sample_to_image(&sample) {
      Ok((image, timestamp_ms)) => {
        let frame = Frame {
          image,
          index: self.index,
          timestamp_ms,
        };
        self.index += 1;
        Some(frame)
      }
      Err(e) => {
        error!("Failed to fetch sample: {}", e);
        None
      }
    }
  }
}

fn bus_error(pipeline: &gst::Pipeline) -> Option<String> {
  let bus = pipeline.bus()?;
  let message = bus.pop_filtered(&[gst::MessageType::Error])?;
  match message.view() {
    gst::MessageView::Error(err) => Some(format!("{} ({:?})", err.error(), err.debug())),
    _ => None,
  }
}

fn convert_sample_to_image(sample: &gst::Sample) -> Result<(RgbImage, u64), GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("No buffer in sample".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("No caps in sample".to_string()))?;

  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;

  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  let stride = video_info.stride()[0] as usize;

  let map = buffer.map_readable().map_err(|e| {
    GStreamerInputError::PipelineError(format!("Failed to map buffer for reading: {}", e))
  })?;
  let data = map.as_slice();

  let expected_size = stride * (height.saturating_sub(1)) + width * 3;
  if data.len() < expected_size {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected: expected_size,
      actual: data.len(),
    });
  }

  let swap = match video_info.format() {
    gst_video::VideoFormat::Rgb => false,
    gst_video::VideoFormat::Bgr => true,
    _ => return Err(GStreamerInputError::UnsupportedFormat),
  };

  let mut raw = Vec::with_capacity(width * height * 3);
  for h in 0..height {
    let row = &data[h * stride..h * stride + width * 3];
    if swap {
      for pixel in row.chunks_exact(3) {
        raw.extend_from_slice(&[pixel[2], pixel[1], pixel[0]]);
      }
    } else {
      raw.extend_from_slice(row);
    }
  }

  let image = RgbImage::from_raw(width as u32, height as u32, raw)
    .ok_or_else(|| GStreamerInputError::PipelineError("Invalid frame dimensions".to_string()))?;
  let timestamp_ms = buffer.pts().map(|pts| pts.mseconds()).unwrap_or(0);
  Ok((image, timestamp_ms))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn file_pipeline_does_not_drop_frames() {
    let source = GStreamerSource::File(PathBuf::from("/videos/a \"b\".mp4"));
    let pipeline = source.to_pipeline();
    assert!(pipeline.starts_with("filesrc name=source ! decodebin"));
    assert!(pipeline.contains("format=RGB"));
    assert!(!pipeline.contains("drop=true"));
    assert!(!pipeline.contains("videos"));
    assert_eq!(
      source.source_property(),
      ("location", "/videos/a \"b\".mp4".to_string())
    );
  }

  #[test]
  fn camera_pipeline_uses_v4l2() {
    let source = GStreamerSource::Camera("/dev/video2 ! fakesink".to_string());
    let pipeline = source.to_pipeline();
    assert!(pipeline.starts_with("v4l2src name=source !"));
    assert!(pipeline.ends_with("drop=true"));
    assert_eq!(
      source.source_property(),
      ("device", "/dev/video2 ! fakesink".to_string())
    );
  }
}
