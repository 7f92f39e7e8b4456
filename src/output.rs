// 该文件是 Shanan （山南西风） 项目的一部分。
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

use std::path::PathBuf;

use image::RgbImage;
use thiserror::Error;

/// 逐帧输出（视频文件、窗口）
pub trait OutputWriter {
  type Error;
  fn write_frame(&mut self, image: &RgbImage) -> Result<(), Self::Error>;
  fn finish(&mut self) -> Result<(), Self::Error>;
}

/// 图像与摄像头显示的名称（用于日志）
pub const WINDOW_NAME: &str = "COCO detections";

pub mod draw;
pub use self::draw::{Draw, DrawError};

mod save_image_file;
pub use self::save_image_file::{ImageResultWriter, SaveImageFileError, crop_boxes, process_image};

mod target;
pub use self::target::{ImageOutputTarget, video_output_path};

#[cfg(feature = "gstreamer")]
mod gstreamer_video_output;
#[cfg(feature = "gstreamer")]
pub use self::gstreamer_video_output::{
  DisplayOutput, GStreamerVideoOutput, GStreamerVideoOutputError,
};

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("请使用 --output 指定一个目录")]
  NeedDirectory,
  #[error("输出文件已存在: {0}")]
  OutputExists(PathBuf),
  #[error("I/O 错误 {path}: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[cfg(feature = "gstreamer")]
  #[error("GStreamer 视频输出错误: {0}")]
  GStreamerVideoOutputError(#[from] GStreamerVideoOutputError),
}
