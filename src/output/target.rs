// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/target.rs - 输出路径解析
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

use std::path::{Path, PathBuf};

use tracing::info;

use crate::output::OutputError;

/// 图像模式下 `--output` 的解析结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageOutputTarget {
  /// 输出目录，可视化结果沿用输入文件名
  Directory(PathBuf),
  /// 单个输出文件，附属输出写入其所在目录
  File { path: PathBuf, side_dir: PathBuf },
}

impl ImageOutputTarget {
  /// 已存在的目录或没有扩展名的路径视为目录（不存在时创建）；
  /// 带扩展名的路径视为单个文件，只允许一个输入。
  pub fn resolve(output: &Path, n_inputs: usize) -> Result<Self, OutputError> {
    if output.is_dir() || output.extension().is_none() {
      if !output.exists() {
        info!("创建输出目录: {}", output.display());
      }
      create_dir(output)?;
      return Ok(ImageOutputTarget::Directory(output.to_path_buf()));
    }

    if n_inputs != 1 {
      return Err(OutputError::NeedDirectory);
    }

    let side_dir = match output.parent() {
      Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
      _ => PathBuf::from("."),
    };
    create_dir(&side_dir)?;
    Ok(ImageOutputTarget::File {
      path: output.to_path_buf(),
      side_dir,
    })
  }

  /// 可视化结果的保存路径
  pub fn visualization_path(&self, input: &Path) -> PathBuf {
    match self {
      ImageOutputTarget::Directory(dir) => match input.file_name() {
        Some(name) => dir.join(name),
        None => dir.join("output.jpg"),
      },
      ImageOutputTarget::File { path, .. } => path.clone(),
    }
  }

  /// 裁剪图、遮罩等附属输出所在目录
  pub fn side_dir(&self) -> &Path {
    match self {
      ImageOutputTarget::Directory(dir) => dir,
      ImageOutputTarget::File { side_dir, .. } => side_dir,
    }
  }
}

/// 视频模式下的输出文件；目录时为 `<dir>/<输入文件名>.mkv`，拒绝覆盖已有文件
pub fn video_output_path(output: &Path, input: &Path) -> Result<PathBuf, OutputError> {
  let path = if output.is_dir() {
    let stem = input
      .file_stem()
      .map(|s| s.to_string_lossy().into_owned())
      .unwrap_or_else(|| "output".to_string());
    output.join(format!("{}.mkv", stem))
  } else {
    output.to_path_buf()
  };

  if path.is_file() {
    return Err(OutputError::OutputExists(path));
  }
  Ok(path)
}

fn create_dir(path: &Path) -> Result<(), OutputError> {
  std::fs::create_dir_all(path).map_err(|source| OutputError::Io {
    path: path.to_path_buf(),
    source,
  })
}
