// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use std::path::Path;

use image::{ImageReader, RgbImage};

use crate::input::InputError;

/// 读取图像文件并转为 RGB
pub fn read_image(path: &Path) -> Result<RgbImage, InputError> {
  let image_error = |source| InputError::Image {
    path: path.to_path_buf(),
    source,
  };

  let reader = ImageReader::open(path)
    .map_err(|source| InputError::Io {
      path: path.to_path_buf(),
      source,
    })?
    .with_guessed_format()
    .map_err(|source| InputError::Io {
      path: path.to_path_buf(),
      source,
    })?;
  let image = reader.decode().map_err(image_error)?;
  Ok(image.to_rgb8())
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{GrayImage, Luma};

  #[test]
  fn gray_image_is_converted_to_rgb() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gray.png");
    GrayImage::from_pixel(4, 3, Luma([90])).save(&path).unwrap();

    let image = read_image(&path).unwrap();
    assert_eq!(image.dimensions(), (4, 3));
    assert_eq!(image.get_pixel(1, 1).0, [90, 90, 90]);
  }

  #[test]
  fn format_is_guessed_from_content() {
    let dir = tempfile::tempdir().unwrap();
    let png = dir.path().join("a.png");
    RgbImage::new(2, 2).save(&png).unwrap();
    let renamed = dir.path().join("a.data");
    std::fs::rename(&png, &renamed).unwrap();

    assert!(read_image(&renamed).is_ok());
  }

  #[test]
  fn missing_file_is_io_error() {
    let err = read_image(Path::new("/nonexistent/x.png")).unwrap_err();
    assert!(matches!(err, InputError::Io { .. }));
  }

  #[test]
  fn garbage_is_image_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.png");
    std::fs::write(&path, b"not an image").unwrap();
    assert!(matches!(read_image(&path), Err(InputError::Image { .. })));
  }
}
