// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/save_image_file.rs - 保存图像文件
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

use image::{ImageFormat, Rgb, RgbImage, imageops};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  model::{BBox, DetectResult, PixelRegion},
  output::target::ImageOutputTarget,
};

const FILL: Rgb<u8> = Rgb([255, 255, 255]);

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("图像保存失败 {path}: {source}")]
  ImageError {
    path: PathBuf,
    source: image::ImageError,
  },
}

/// 将所有框区域填充为白色：`incomplete` 基于原图，`mask` 基于全黑画布，均保存为 JPEG
pub fn process_image<'a>(
  image: &RgbImage,
  boxes: impl IntoIterator<Item = &'a BBox>,
  incomplete_path: &Path,
  mask_path: &Path,
) -> Result<(), SaveImageFileError> {
  let (width, height) = image.dimensions();
  let mut incomplete = image.clone();
  let mut mask = RgbImage::new(width, height);

  for region in boxes
    .into_iter()
    .filter_map(|bbox| bbox.pixel_region(width, height))
  {
    fill_region(&mut incomplete, region);
    fill_region(&mut mask, region);
  }

  save_jpeg(&incomplete, incomplete_path)?;
  save_jpeg(&mask, mask_path)
}

/// 逐框裁剪；截断后为空的框对应 `None`
pub fn crop_boxes<'a>(
  image: &RgbImage,
  boxes: impl IntoIterator<Item = &'a BBox>,
) -> Vec<Option<RgbImage>> {
  let (width, height) = image.dimensions();
  boxes
    .into_iter()
    .map(|bbox| {
      bbox.pixel_region(width, height).map(|r| {
        imageops::crop_imm(image, r.x, r.y, r.width, r.height).to_image()
      })
    })
    .collect()
}

fn fill_region(image: &mut RgbImage, region: PixelRegion) {
  for y in region.y..region.y + region.height {
    for x in region.x..region.x + region.width {
      image.put_pixel(x, y, FILL);
    }
  }
}

fn save_jpeg(image: &RgbImage, path: &Path) -> Result<(), SaveImageFileError> {
  image
    .save_with_format(path, ImageFormat::Jpeg)
    .map_err(|source| SaveImageFileError::ImageError {
      path: path.to_path_buf(),
      source,
    })
}

/// 单张输入图像的全部输出
pub struct ImageResultWriter {
  target: ImageOutputTarget,
}

impl ImageResultWriter {
  pub fn new(target: ImageOutputTarget) -> Self {
    Self { target }
  }

  /// 写出可视化结果、遮罩对与逐框裁剪图，返回写出的文件
  ///
  /// 遮罩对写入失败只记录警告，不影响裁剪图。
  pub fn write(
    &self,
    input: &Path,
    image: &RgbImage,
    result: &DetectResult,
    visualized: &RgbImage,
  ) -> Result<Vec<PathBuf>, SaveImageFileError> {
    let mut written = Vec::new();

    let vis_path = self.target.visualization_path(input);
    visualized
      .save(&vis_path)
      .map_err(|source| SaveImageFileError::ImageError {
        path: vis_path.clone(),
        source,
      })?;
    written.push(vis_path);

    let stem = input
      .file_stem()
      .map(|s| s.to_string_lossy().into_owned())
      .unwrap_or_default();
    let dir = self.target.side_dir();

    let incomplete_path = dir.join(format!("{}_incomplete.jpg", stem));
    let mask_path = dir.join(format!("{}_mask.jpg", stem));
    match process_image(image, result.boxes(), &incomplete_path, &mask_path) {
      Ok(()) => written.extend([incomplete_path, mask_path]),
      Err(e) => warn!("遮罩生成失败: {}", e),
    }

    for (idx, (item, crop)) in result
      .iter()
      .zip(crop_boxes(image, result.boxes()))
      .enumerate()
    {
      debug!("{}, {:?}", idx, item.bbox);
      let Some(crop) = crop else {
        warn!("第 {} 个检测框裁剪结果为空，跳过: {:?}", idx, item.bbox);
        continue;
      };
      let crop_path = dir.join(format!("{}_cropped_{}.jpg", stem, idx));
      save_jpeg(&crop, &crop_path)?;
      written.push(crop_path);
    }

    info!("{}: 写出 {} 个文件", input.display(), written.len());
    Ok(written)
  }
}
