// 该文件是 Shanan （山南西风） 项目的一部分。
// src/task.rs - 任务定义
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

use std::{
  path::PathBuf,
  sync::mpsc::{self, Receiver},
  thread,
  time::{Duration, Instant},
};

use anyhow::Context;
use image::RgbImage;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tracing::{debug, error, info, warn};

use crate::{
  input::{Frame, read_image, resolve_image_inputs},
  model::Model,
  output::{ImageOutputTarget, ImageResultWriter, OutputWriter},
  predictor::VisualizationDemo,
};

pub trait Task<M: Model>: Sized {
  type Error;
  fn run_task(self, demo: &VisualizationDemo<M>) -> Result<(), Self::Error>;
}

/// Ctrl-C 时向返回的通道发送信号；30 秒内未退出则强制结束进程
pub fn install_interrupt() -> anyhow::Result<Receiver<()>> {
  let (tx, rx) = mpsc::channel();
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    let _ = tx.send(());
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })
  .context("无法设置 Ctrl-C 处理函数")?;
  Ok(rx)
}

/// 有总数时显示进度条，否则显示计数器
pub fn progress_bar(total: Option<u64>, visible: bool) -> ProgressBar {
  let (bar, template) = match total {
    Some(total) => (
      ProgressBar::new(total),
      "{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec} {eta})",
    ),
    None => (
      ProgressBar::new_spinner(),
      "{spinner:.green} [{elapsed}] {pos} ({per_sec})",
    ),
  };
  if let Ok(style) = ProgressStyle::with_template(template) {
    bar.set_style(style.progress_chars("#>-"));
  }
  if !visible {
    bar.set_draw_target(ProgressDrawTarget::hidden());
  }
  bar
}

/// 取出帧图像，同时记录帧序号与时间戳
pub fn frame_images<I>(frames: I) -> impl Iterator<Item = RgbImage>
where
  I: IntoIterator<Item = Frame>,
{
  frames.into_iter().map(|frame| {
    debug!("读取第 {} 帧, 时间戳 {} ms", frame.index, frame.timestamp_ms);
    frame.image
  })
}

/// 逐帧推理、绘制并写出，返回处理的帧数
///
/// 输入结束、达到 `max_frames` 或 `stop` 收到信号时停止，最后调用 `finish`。
pub fn run_stream<M, I, W>(
  demo: &VisualizationDemo<M>,
  frames: I,
  writer: &mut W,
  progress: &ProgressBar,
  max_frames: Option<u64>,
  stop: &Receiver<()>,
) -> anyhow::Result<u64>
where
  M: Model,
  M::Error: std::error::Error + Send + Sync + 'static,
  I: IntoIterator<Item = RgbImage>,
  W: OutputWriter,
  W::Error: std::error::Error + Send + Sync + 'static,
{
  let mut count = 0u64;
  let mut now = Instant::now();
  for visualized in demo.run_on_video(frames) {
    let visualized = visualized.context("推理失败")?;
    let elapsed_a = now.elapsed();
    writer.write_frame(&visualized).context("写出帧失败")?;
    let elapsed_b = now.elapsed();
    now = Instant::now();
    count += 1;
    progress.inc(1);
    debug!("第 {} 帧完成，耗时: {:.2?} / {:.2?}", count, elapsed_a, elapsed_b);

    if max_frames.is_some_and(|n| count >= n) {
      info!("达到指定帧数 {}, 退出任务循环", count);
      break;
    }
    if stop.try_recv().is_ok() {
      warn!("中断信号接收，退出任务循环");
      break;
    }
  }

  writer.finish().context("关闭输出失败")?;
  progress.finish();
  info!("任务完成，共处理 {} 帧", count);
  Ok(count)
}

/// 图像列表
pub struct ImageTask {
  pub inputs: Vec<String>,
  pub output: Option<PathBuf>,
}

impl ImageTask {
  pub fn new(inputs: Vec<String>, output: Option<PathBuf>) -> Self {
    Self { inputs, output }
  }
}

impl<M> Task<M> for ImageTask
where
  M: Model,
  M::Error: std::error::Error + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, demo: &VisualizationDemo<M>) -> Result<(), Self::Error> {
    let paths = resolve_image_inputs(self.inputs.as_slice())?;
    info!("共 {} 个输入图像", paths.len());

    let writer = match &self.output {
      Some(output) => Some(ImageResultWriter::new(ImageOutputTarget::resolve(
        output,
        paths.len(),
      )?)),
      None => None,
    };
    let mut window = window::ImageWindow::default();

    let progress = progress_bar(Some(paths.len() as u64), writer.is_some());
    for path in &paths {
      progress.inc(1);
      let image = match read_image(path) {
        Ok(image) => image,
        Err(e) => {
          error!("{}", e);
          continue;
        }
      };

      let start = Instant::now();
      let (result, visualized) = demo
        .run_on_image(&image)
        .with_context(|| format!("{}: 推理失败", path.display()))?;
      info!(
        "{}: detected {} instances in {:.2}s",
        path.display(),
        result.len(),
        start.elapsed().as_secs_f64()
      );

      match &writer {
        Some(writer) => {
          if let Err(e) = writer.write(path, &image, &result, &visualized) {
            error!("{}: 结果写出失败: {}", path.display(), e);
          }
        }
        None => {
          if !window.show(&visualized)? {
            break;
          }
        }
      }
    }
    progress.finish();
    Ok(())
  }
}

/// 摄像头
pub struct WebcamTask {
  pub device: String,
  pub output: Option<PathBuf>,
  pub max_frames: Option<u64>,
}

/// 视频文件
pub struct VideoTask {
  pub path: PathBuf,
  pub output: Option<PathBuf>,
  pub max_frames: Option<u64>,
}

#[cfg(feature = "gstreamer")]
mod stream {
  use std::path::Path;

  use anyhow::Context;
  use tracing::info;

  use super::{
    Task, VideoTask, WebcamTask, frame_images, install_interrupt, progress_bar, run_stream,
  };
  use crate::{
    input::GStreamerInput,
    model::Model,
    output::{DisplayOutput, GStreamerVideoOutput, WINDOW_NAME, video_output_path},
    predictor::VisualizationDemo,
  };

  impl<M> Task<M> for WebcamTask
  where
    M: Model,
    M::Error: std::error::Error + Send + Sync + 'static,
  {
    type Error = anyhow::Error;

    fn run_task(self, demo: &VisualizationDemo<M>) -> Result<(), Self::Error> {
      let stop = install_interrupt()?;
      let input = GStreamerInput::open_camera(&self.device)
        .with_context(|| format!("无法打开摄像头 {}", self.device))?;
      let (width, height, fps) = (input.width(), input.height(), input.fps());
      let frames = frame_images(input);
      let progress = progress_bar(None, true);

      match &self.output {
        Some(output) => {
          let path = video_output_path(output, Path::new("webcam"))?;
          info!("保存到视频文件: {}", path.display());
          let mut writer = GStreamerVideoOutput::create(&path, width, height, fps)?;
          run_stream(demo, frames, &mut writer, &progress, self.max_frames, &stop)?;
        }
        None => {
          let mut writer = DisplayOutput::open(WINDOW_NAME, width, height, fps)?;
          run_stream(demo, frames, &mut writer, &progress, self.max_frames, &stop)?;
        }
      }
      Ok(())
    }
  }

  impl<M> Task<M> for VideoTask
  where
    M: Model,
    M::Error: std::error::Error + Send + Sync + 'static,
  {
    type Error = anyhow::Error;

    fn run_task(self, demo: &VisualizationDemo<M>) -> Result<(), Self::Error> {
      let output_path = match &self.output {
        Some(output) => Some(video_output_path(output, &self.path)?),
        None => None,
      };
      anyhow::ensure!(self.path.is_file(), "视频文件不存在: {}", self.path.display());

      let stop = install_interrupt()?;
      let input = GStreamerInput::open_file(&self.path)
        .with_context(|| format!("无法打开视频 {}", self.path.display()))?;
      let (width, height, fps) = (input.width(), input.height(), input.fps());
      let progress = progress_bar(input.frame_count(), true);
      let frames = frame_images(input);

      match output_path {
        Some(path) => {
          info!("保存到视频文件: {}", path.display());
          let mut writer = GStreamerVideoOutput::create(&path, width, height, fps)?;
          run_stream(demo, frames, &mut writer, &progress, self.max_frames, &stop)?;
        }
        None => {
          let title = self
            .path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| WINDOW_NAME.to_string());
          let mut writer = DisplayOutput::open(&title, width, height, fps)?;
          run_stream(demo, frames, &mut writer, &progress, self.max_frames, &stop)?;
        }
      }
      Ok(())
    }
  }
}

#[cfg(not(feature = "gstreamer"))]
mod stream {
  use super::{Task, VideoTask, WebcamTask};
  use crate::{model::Model, predictor::VisualizationDemo};

  impl<M: Model> Task<M> for WebcamTask {
    type Error = anyhow::Error;

    fn run_task(self, _demo: &VisualizationDemo<M>) -> Result<(), Self::Error> {
      anyhow::bail!("摄像头输入需要启用 gstreamer 特性 ({})", self.device)
    }
  }

  impl<M: Model> Task<M> for VideoTask {
    type Error = anyhow::Error;

    fn run_task(self, _demo: &VisualizationDemo<M>) -> Result<(), Self::Error> {
      anyhow::bail!("视频输入需要启用 gstreamer 特性 ({})", self.path.display())
    }
  }
}

#[cfg(feature = "gstreamer")]
mod window {
  use std::io::BufRead;

  use image::RgbImage;
  use tracing::info;

  use crate::output::{DisplayOutput, OutputWriter, WINDOW_NAME};

  /// 逐张显示图像，等待回车继续，输入 `q` 退出
  #[derive(Default)]
  pub struct ImageWindow {
    display: Option<DisplayOutput>,
  }

  impl ImageWindow {
    pub fn show(&mut self, image: &RgbImage) -> anyhow::Result<bool> {
      let display = match self.display.as_mut() {
        Some(display) => display,
        None => self
          .display
          .insert(DisplayOutput::open(WINDOW_NAME, image.width(), image.height(), 1.0)?),
      };
      display.write_frame(image)?;

      info!("按 Enter 显示下一张，输入 q 退出");
      let mut line = String::new();
      std::io::stdin().lock().read_line(&mut line)?;
      Ok(line.trim() != "q")
    }
  }
}

#[cfg(not(feature = "gstreamer"))]
mod window {
  use image::RgbImage;

  #[derive(Default)]
  pub struct ImageWindow;

  impl ImageWindow {
    pub fn show(&mut self, _image: &RgbImage) -> anyhow::Result<bool> {
      anyhow::bail!("窗口显示需要启用 gstreamer 特性，或使用 --output 保存结果")
    }
  }
}
