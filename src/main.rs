// 该文件是 Shanan （山南西风） 项目的一部分。
// src/main.rs - 项目主程序
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

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use shanan_demo::{
  FromConfig,
  args::{Args, InputMode},
  config::setup_cfg,
  model::OnnxDetector,
  predictor::VisualizationDemo,
  task::{ImageTask, Task, VideoTask, WebcamTask},
};

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = Args::parse();
  info!("Arguments: {:?}", args);

  let cfg = setup_cfg(&args.config_file, args.opts.as_slice(), args.confidence_threshold)
    .with_context(|| format!("无法加载配置 {}", args.config_file.display()))?;
  debug!("最终配置:\n{}", cfg);

  let model = OnnxDetector::from_config(&cfg).context("模型加载失败")?;
  let demo = VisualizationDemo::from_config(model, &cfg)?;

  match args.mode() {
    InputMode::Images(inputs) => ImageTask::new(inputs, args.output.clone()).run_task(&demo),
    InputMode::Webcam(device) => WebcamTask {
      device,
      output: args.output.clone(),
      max_frames: args.max_frames(),
    }
    .run_task(&demo),
    InputMode::Video(path) => VideoTask {
      path,
      output: args.output.clone(),
      max_frames: args.max_frames(),
    }
    .run_task(&demo),
  }
}
