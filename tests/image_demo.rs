// 该文件是 Shanan （山南西风） 项目的一部分。
// tests/image_demo.rs - 图像演示流程测试
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

use std::{convert::Infallible, path::PathBuf};

use image::{Rgb, RgbImage};
use shanan_demo::{
  config::setup_cfg,
  model::{BBox, DetectItem, DetectResult, Metadata, Model, score_threshold},
  output::Draw,
  predictor::VisualizationDemo,
  task::{ImageTask, Task},
};

struct TwoBoxes;

impl Model for TwoBoxes {
  type Error = Infallible;

  fn infer(&self, _image: &RgbImage) -> Result<DetectResult, Self::Error> {
    Ok(DetectResult::new(vec![
      DetectItem {
        class_id: 0,
        score: 0.95,
        bbox: BBox::new(4.0, 4.0, 20.0, 20.0),
      },
      DetectItem {
        class_id: 2,
        score: 0.6,
        bbox: BBox::new(30.0, 8.0, 60.0, 40.0),
      },
    ]))
  }
}

fn repo_config(name: &str) -> PathBuf {
  PathBuf::from(env!("CARGO_MANIFEST_DIR"))
    .join("configs")
    .join(name)
}

fn demo() -> VisualizationDemo<TwoBoxes> {
  VisualizationDemo::new(TwoBoxes, Metadata::coco(), Draw::default())
}

fn write_input(path: &PathBuf) {
  RgbImage::from_pixel(64, 48, Rgb([40, 80, 120]))
    .save(path)
    .unwrap();
}

#[test]
fn default_config_resolves_base_and_threshold() {
  let cfg = setup_cfg(
    &repo_config("quick_schedules/e2e_mask_rcnn_R_50_FPN_inference_acc_test.toml"),
    &["MODEL.WEIGHTS", "other.onnx"],
    0.4,
  )
  .unwrap();

  assert_eq!(cfg.get_str("MODEL.META_ARCHITECTURE").unwrap(), "GeneralizedRCNN");
  assert_eq!(cfg.get_str("MODEL.WEIGHTS").unwrap(), "other.onnx");
  assert_eq!(
    cfg.get_str_list("DATASETS.TEST").unwrap(),
    vec!["coco_2017_val_100".to_string()]
  );
  assert!((score_threshold(&cfg).unwrap() - 0.4).abs() < 1e-6);
}

#[test]
fn one_stage_config_uses_fcos_threshold() {
  let cfg = setup_cfg(
    &repo_config("FCOS-Detection/R_50_1x.toml"),
    &["MODEL.FCOS.NMS_TH", "0.5"],
    0.25,
  )
  .unwrap();

  assert_eq!(cfg.get_str("MODEL.META_ARCHITECTURE").unwrap(), "OneStageDetector");
  assert!((cfg.get_f32("MODEL.FCOS.NMS_TH").unwrap() - 0.5).abs() < 1e-6);
  assert!((score_threshold(&cfg).unwrap() - 0.25).abs() < 1e-6);
}

#[test]
fn directory_output_gets_all_side_files() {
  let dir = tempfile::tempdir().unwrap();
  let inputs = dir.path().join("inputs");
  std::fs::create_dir(&inputs).unwrap();
  write_input(&inputs.join("a.png"));
  write_input(&inputs.join("b.png"));
  let out = dir.path().join("vis");

  ImageTask::new(
    vec![inputs.to_string_lossy().into_owned()],
    Some(out.clone()),
  )
  .run_task(&demo())
  .unwrap();

  for stem in ["a", "b"] {
    assert!(out.join(format!("{stem}.png")).is_file());
    assert!(out.join(format!("{stem}_incomplete.jpg")).is_file());
    assert!(out.join(format!("{stem}_mask.jpg")).is_file());
    assert!(out.join(format!("{stem}_cropped_0.jpg")).is_file());
    assert!(out.join(format!("{stem}_cropped_1.jpg")).is_file());
  }

  let crop = image::open(out.join("a_cropped_1.jpg")).unwrap();
  assert_eq!((crop.width(), crop.height()), (30, 32));
}

#[test]
fn single_input_may_name_an_output_file() {
  let dir = tempfile::tempdir().unwrap();
  let input = dir.path().join("photo.png");
  write_input(&input);
  let out = dir.path().join("result").join("vis.png");
  std::fs::create_dir(dir.path().join("result")).unwrap();

  ImageTask::new(
    vec![input.to_string_lossy().into_owned()],
    Some(out.clone()),
  )
  .run_task(&demo())
  .unwrap();

  assert!(out.is_file());
  assert!(dir.path().join("result/photo_mask.jpg").is_file());
  assert!(dir.path().join("result/photo_cropped_0.jpg").is_file());
}

#[test]
fn several_inputs_refuse_a_file_output() {
  let dir = tempfile::tempdir().unwrap();
  let a = dir.path().join("a.png");
  let b = dir.path().join("b.png");
  write_input(&a);
  write_input(&b);

  let result = ImageTask::new(
    vec![
      a.to_string_lossy().into_owned(),
      b.to_string_lossy().into_owned(),
    ],
    Some(dir.path().join("vis.png")),
  )
  .run_task(&demo());

  assert!(result.is_err());
}
