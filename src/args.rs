// 该文件是 Shanan （山南西风） 项目的一部分。
// src/args.rs - 项目参数配置
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

use clap::{ArgGroup, Parser};

pub const DEFAULT_CONFIG_FILE: &str =
  "configs/quick_schedules/e2e_mask_rcnn_R_50_FPN_inference_acc_test.toml";

/// 检测演示程序参数
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Detection demo", long_about = None)]
#[command(group(
  ArgGroup::new("source")
    .required(true)
    .multiple(false)
    .args(["input", "webcam", "video_input"]),
))]
pub struct Args {
  /// 配置文件路径
  #[arg(long, value_name = "FILE", default_value = DEFAULT_CONFIG_FILE)]
  pub config_file: PathBuf,

  /// 从摄像头读取输入
  #[arg(long)]
  pub webcam: bool,

  /// 视频文件路径
  #[arg(long, value_name = "PATH")]
  pub video_input: Option<PathBuf>,

  /// 输入图像列表，空格分隔；也可以是一个目录或一个通配符模式
  #[arg(long, value_name = "PATH", num_args = 1..)]
  pub input: Option<Vec<String>>,

  /// 保存可视化结果的文件或目录；不指定时在窗口中显示
  #[arg(long, value_name = "PATH")]
  pub output: Option<PathBuf>,

  /// 显示检测结果的最低置信度 (0.0 - 1.0)
  #[arg(long, default_value = "0.3", value_name = "THRESHOLD", value_parser = parse_threshold)]
  pub confidence_threshold: f32,

  /// 以 `KEY VALUE` 成对形式修改配置项，占用其后全部参数
  #[arg(
    long,
    value_name = "KEY VALUE",
    num_args = 0..,
    allow_hyphen_values = true
  )]
  pub opts: Vec<String>,

  /// 摄像头设备（配合 --webcam）
  #[arg(long, value_name = "DEVICE", default_value = "/dev/video0")]
  pub camera_device: String,

  /// 最大处理帧数（仅对视频/摄像头有效，0 表示无限制）
  #[arg(long, default_value = "0", value_name = "COUNT")]
  pub max_frames: u64,
}

/// 输入来源
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputMode {
  Images(Vec<String>),
  Webcam(String),
  Video(PathBuf),
}

impl Args {
  pub fn mode(&self) -> InputMode {
    if let Some(inputs) = &self.input {
      InputMode::Images(inputs.clone())
    } else if let Some(video) = &self.video_input {
      InputMode::Video(video.clone())
    } else {
      InputMode::Webcam(self.camera_device.clone())
    }
  }

  pub fn max_frames(&self) -> Option<u64> {
    (self.max_frames > 0).then_some(self.max_frames)
  }
}

fn parse_threshold(s: &str) -> Result<f32, String> {
  let value: f32 = s
    .parse()
    .map_err(|e| format!("无效的阈值 `{}`: {}", s, e))?;
  if (0.0..=1.0).contains(&value) {
    Ok(value)
  } else {
    Err(format!("阈值必须在 0.0 到 1.0 之间, 实际 {}", value))
  }
}
