// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/gstreamer_video_output.rs - GStreamer 视频文件与窗口输出
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

//! # GStreamer 输出
//!
//! 两种基于 `appsrc` 的输出：
//!
//! - [`GStreamerVideoOutput`]：`appsrc ! videoconvert ! x264enc ! matroskamux ! filesink`，
//!   帧率与帧尺寸取自输入源，结束时发送 EOS 并等待文件写完。
//! - [`DisplayOutput`]：`appsrc ! videoconvert ! autovideosink`，在窗口中显示，
//!   帧尺寸变化时重新协商 caps。

use std::path::Path;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use thiserror::Error;
use tracing::{info, warn};

use crate::output::OutputWriter;

// 等待 EOS 的最长时间
const EOS_TIMEOUT_SECS: u64 = 10;

const DISPLAY_PIPELINE: &str =
  "appsrc name=src is-live=true ! videoconvert ! autovideosink name=display sync=false";

// 输出路径通过 filesink 的 location 属性设置
const FILE_PIPELINE: &str = "appsrc name=src ! videoconvert ! video/x-raw,format=I420 ! x264enc speed-preset=fast ! h264parse ! matroskamux ! filesink name=filesink";

#[derive(Error, Debug)]
pub enum GStreamerVideoOutputError {
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("Failed to get appsrc element")]
  AppSrcNotFound,
  #[error("Failed to convert element to appsrc")]
  AppSrcConversionFailed,
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  #[error("Buffer creation error")]
  BufferCreationError,
  #[error("Frame size mismatch: expected {expected:?}, got {actual:?}")]
  FrameSizeMismatch {
    expected: (u32, u32),
    actual: (u32, u32),
  },
  #[error("Flow error: {0:?}")]
  FlowError(gst::FlowError),
}

struct AppSrcPipeline {
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  info: gst_video::VideoInfo,
  fps: gst::Fraction,
  frame_count: u64,
  finished: bool,
}

impl AppSrcPipeline {
  /// `configure` 在管道启动前调用，用于设置元素属性
  fn launch<F>(
    description: &str,
    width: u32,
    height: u32,
    fps: gst::Fraction,
    configure: F,
  ) -> Result<Self, GStreamerVideoOutputError>
  where
    F: FnOnce(&gst::Pipeline) -> Result<(), GStreamerVideoOutputError>,
  {
    gst::init()?;

    info!("GStreamer pipeline description: {}", description);
    let pipeline = gst::parse::launch(description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| {
        GStreamerVideoOutputError::PipelineError("Failed to create pipeline".to_string())
      })?;

    let appsrc = pipeline
      .by_name("src")
      .ok_or(GStreamerVideoOutputError::AppSrcNotFound)?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| GStreamerVideoOutputError::AppSrcConversionFailed)?;

    let info = video_info(width, height, fps)?;
    appsrc.set_caps(Some(&info.to_caps()?));
    appsrc.set_format(gst::Format::Time);

    configure(&pipeline)?;
    pipeline.set_state(gst::State::Playing)?;

    Ok(Self {
      pipeline,
      appsrc,
      info,
      fps,
      frame_count: 0,
      finished: false,
    })
  }

  fn renegotiate(&mut self, width: u32, height: u32) -> Result<(), GStreamerVideoOutputError> {
    self.info = video_info(width, height, self.fps)?;
    self.appsrc.set_caps(Some(&self.info.to_caps()?));
    Ok(())
  }

  fn push(&mut self, image: &RgbImage) -> Result<(), GStreamerVideoOutputError> {
    let (width, height) = image.dimensions();
    let expected = (self.info.width(), self.info.height());
    if (width, height) != expected {
      return Err(GStreamerVideoOutputError::FrameSizeMismatch {
        expected,
        actual: (width, height),
      });
    }

    // GStreamer 的 RGB 行宽按 4 字节对齐，需要逐行拷贝
    let stride = self.info.stride()[0] as usize;
    let row_bytes = width as usize * 3;
    let mut buffer = gst::Buffer::with_size(self.info.size())
      .map_err(|_| GStreamerVideoOutputError::BufferCreationError)?;

    let frame_duration = self.frame_duration_ns();
    {
      let buffer_ref = buffer
        .get_mut()
        .ok_or(GStreamerVideoOutputError::BufferCreationError)?;
      buffer_ref.set_pts(gst::ClockTime::from_nseconds(self.frame_count * frame_duration));
      buffer_ref.set_duration(gst::ClockTime::from_nseconds(frame_duration));

      let mut map = buffer_ref.map_writable().map_err(|_| {
        GStreamerVideoOutputError::PipelineError("Failed to map buffer".to_string())
      })?;
      let dst = map.as_mut_slice();
      for (y, row) in image.as_raw().chunks_exact(row_bytes).enumerate() {
        dst[y * stride..y * stride + row_bytes].copy_from_slice(row);
      }
    }

    self
      .appsrc
      .push_buffer(buffer)
      .map_err(GStreamerVideoOutputError::FlowError)?;
    self.frame_count += 1;
    Ok(())
  }

  fn frame_duration_ns(&self) -> u64 {
    let (numer, denom) = (self.fps.numer().max(1) as u64, self.fps.denom().max(1) as u64);
    1_000_000_000 * denom / numer
  }

  fn finish(&mut self) -> Result<(), GStreamerVideoOutputError> {
    if self.finished {
      return Ok(());
    }
    self.finished = true;

    let mut result = self
      .appsrc
      .end_of_stream()
      .map(|_| ())
      .map_err(GStreamerVideoOutputError::FlowError);

    if result.is_ok()
      && let Some(bus) = self.pipeline.bus()
    {
      let message = bus.timed_pop_filtered(
        gst::ClockTime::from_seconds(EOS_TIMEOUT_SECS),
        &[gst::MessageType::Eos, gst::MessageType::Error],
      );
      match message.as_ref().map(|m| m.view()) {
        Some(gst::MessageView::Error(err)) => {
          result = Err(GStreamerVideoOutputError::PipelineError(format!(
            "{} ({:?})",
            err.error(),
            err.debug()
          )));
        }
        Some(_) => {}
        None => warn!("等待 EOS 超时"),
      }
    }

    self.pipeline.set_state(gst::State::Null)?;
    info!("输出管道关闭，共写入 {} 帧", self.frame_count);
    result
  }
}

impl Drop for AppSrcPipeline {
  fn drop(&mut self) {
    if let Err(e) = self.finish() {
      warn!("Failed to stop GStreamer output pipeline: {}", e);
    }
  }
}

fn video_info(
  width: u32,
  height: u32,
  fps: gst::Fraction,
) -> Result<gst_video::VideoInfo, GStreamerVideoOutputError> {
  Ok(
    gst_video::VideoInfo::builder(gst_video::VideoFormat::Rgb, width, height)
      .fps(fps)
      .build()?,
  )
}

// 帧率转换为分数形式，无效值按 30 处理
fn fps_fraction(fps: f64) -> gst::Fraction {
  if fps.is_nan() || fps <= 0.0 {
    return gst::Fraction::new(30, 1);
  }
  if fps.fract() == 0.0 {
    gst::Fraction::new(fps as i32, 1)
  } else {
    gst::Fraction::new((fps * 1000.0).round() as i32, 1000)
  }
}

/// 视频文件输出（H.264 + Matroska）
pub struct GStreamerVideoOutput {
  inner: AppSrcPipeline,
}

impl GStreamerVideoOutput {
  pub fn create(
    path: &Path,
    width: u32,
    height: u32,
    fps: f64,
  ) -> Result<Self, GStreamerVideoOutputError> {
    let location = path.to_string_lossy();
    let inner = AppSrcPipeline::launch(FILE_PIPELINE, width, height, fps_fraction(fps), |pipeline| {
      pipeline
        .by_name("filesink")
        .ok_or_else(|| GStreamerVideoOutputError::PipelineError("Failed to get filesink".to_string()))?
        .set_property("location", &*location);
      Ok(())
    })?;
    info!(
      "Video output initialized: {}x{} @ {} fps -> {}",
      width,
      height,
      fps,
      path.display()
    );
    Ok(Self { inner })
  }
}

impl OutputWriter for GStreamerVideoOutput {
  type Error = GStreamerVideoOutputError;

  fn write_frame(&mut self, image: &RgbImage) -> Result<(), Self::Error> {
    self.inner.push(image)
  }

  fn finish(&mut self) -> Result<(), Self::Error> {
    self.inner.finish()
  }
}

/// 窗口显示
///
/// `name` 只用于日志；窗口标题由平台的 sink 决定。
pub struct DisplayOutput {
  inner: AppSrcPipeline,
}

impl DisplayOutput {
  pub fn open(name: &str, width: u32, height: u32, fps: f64) -> Result<Self, GStreamerVideoOutputError> {
    let inner =
      AppSrcPipeline::launch(DISPLAY_PIPELINE, width, height, fps_fraction(fps), |_| Ok(()))?;
    info!("打开显示窗口: {}", name);
    Ok(Self { inner })
  }
}

impl OutputWriter for DisplayOutput {
  type Error = GStreamerVideoOutputError;

  fn write_frame(&mut self, image: &RgbImage) -> Result<(), Self::Error> {
    let (width, height) = image.dimensions();
    if (width, height) != (self.inner.info.width(), self.inner.info.height()) {
      self.inner.renegotiate(width, height)?;
    }
    self.inner.push(image)
  }

  fn finish(&mut self) -> Result<(), Self::Error> {
    self.inner.finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn pipelines_carry_no_user_text() {
    assert!(FILE_PIPELINE.ends_with("filesink name=filesink"));
    assert!(!FILE_PIPELINE.contains("location"));
    assert!(DISPLAY_PIPELINE.contains("autovideosink name=display"));
  }

  #[test]
  fn fps_falls_back_to_thirty() {
    assert_eq!(fps_fraction(f64::NAN), gst::Fraction::new(30, 1));
    assert_eq!(fps_fraction(0.0), gst::Fraction::new(30, 1));
    assert_eq!(fps_fraction(25.0), gst::Fraction::new(25, 1));
    assert_eq!(fps_fraction(29.97), gst::Fraction::new(29970, 1000));
  }
}
