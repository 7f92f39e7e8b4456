// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input.rs - 输入定义
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

/// 视频流中的一帧
#[derive(Debug, Clone)]
pub struct Frame {
  pub image: RgbImage,
  /// 从 0 开始的帧序号
  pub index: u64,
  /// 显示时间戳（毫秒），未知时为 0
  pub timestamp_ms: u64,
}

#[derive(Error, Debug)]
pub enum InputError {
  #[error("I/O 错误 {path}: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("图像读取错误 {path}: {source}")]
  Image {
    path: PathBuf,
    source: image::ImageError,
  },
  #[error("无效的通配符模式: {0}")]
  Pattern(#[from] glob::PatternError),
  #[error("The input path(s) was not found: {0}")]
  NotFound(String),
}

mod image_files;
pub use self::image_files::resolve_image_inputs;

mod read_image_file;
pub use self::read_image_file::read_image;

#[cfg(feature = "gstreamer")]
mod gstreamer_input;
#[cfg(feature = "gstreamer")]
pub use self::gstreamer_input::{GStreamerInput, GStreamerInputError, GStreamerSource};
