// 该文件是 Shanan （山南西风） 项目的一部分。
// src/config.rs - 分层配置
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

//! # 分层配置
//!
//! 配置以 TOML 树的形式保存，键使用点分路径（如 `MODEL.FCOS.INFERENCE_TH_TEST`）。
//! 合并顺序：
//!
//! 1. 内置默认值（[`get_cfg`]）
//! 2. 自定义补充项（[`add_custom_configs`]）
//! 3. 配置文件（[`CfgNode::merge_from_file`]，支持 `_BASE_` 继承）
//! 4. 命令行 `KEY VALUE` 覆盖（[`CfgNode::merge_from_list`]）
//! 5. 置信度阈值覆盖，随后冻结（[`setup_cfg`]）
//!
//! 只能覆盖默认值中已经存在的键，且值的类型必须一致（整数可以放宽为浮点数）。

use std::{
  fmt,
  path::{Path, PathBuf},
};

use serde::de::DeserializeOwned;
use thiserror::Error;
use toml::{Table, Value};
use tracing::{debug, info};

const DEFAULT_CONFIG: &str = include_str!("config/defaults.toml");
const BASE_KEY: &str = "_BASE_";
const MAX_BASE_DEPTH: usize = 16;

/// 置信度阈值在各类检测器中对应的配置键
pub const CONFIDENCE_THRESHOLD_KEYS: [&str; 5] = [
  "MODEL.RETINANET.SCORE_THRESH_TEST",
  "MODEL.ROI_HEADS.SCORE_THRESH_TEST",
  "MODEL.FCOS.INFERENCE_TH_TEST",
  "MODEL.MEInst.INFERENCE_TH_TEST",
  "MODEL.PANOPTIC_FPN.COMBINE.INSTANCES_CONFIDENCE_THRESH",
];

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("无法读取配置文件 {path}: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("配置文件解析错误 {path}: {source}")]
  Parse {
    path: PathBuf,
    source: toml::de::Error,
  },
  #[error("内置默认配置无效: {0}")]
  Defaults(#[source] toml::de::Error),
  #[error("配置键不存在: {0}")]
  KeyNotFound(String),
  #[error("配置键 {key} 类型不匹配: 期望 {expected}, 实际 {found}")]
  TypeMismatch {
    key: String,
    expected: &'static str,
    found: &'static str,
  },
  #[error("配置已冻结，无法修改: {0}")]
  Frozen(String),
  #[error("覆盖参数必须是 KEY VALUE 成对出现, 实际数量 {0}")]
  OddOverrideList(usize),
  #[error("_BASE_ 继承层级过深: {0}")]
  BaseTooDeep(PathBuf),
  #[error("配置节 {key} 反序列化错误: {source}")]
  Section {
    key: String,
    source: toml::de::Error,
  },
}

/// 配置节点
#[derive(Debug, Clone)]
pub struct CfgNode {
  table: Table,
  frozen: bool,
}

/// 内置默认配置
pub fn get_cfg() -> Result<CfgNode, ConfigError> {
  let table = DEFAULT_CONFIG
    .parse::<Table>()
    .map_err(ConfigError::Defaults)?;
  Ok(CfgNode {
    table,
    frozen: false,
  })
}

/// 追加训练相关的自定义配置项
pub fn add_custom_configs(cfg: &mut CfgNode) {
  let mut best_checkpointer = Table::new();
  best_checkpointer.insert("ENABLED".into(), Value::Boolean(false));
  best_checkpointer.insert("METRIC".into(), Value::String("bbox/AP50".into()));
  best_checkpointer.insert("MODE".into(), Value::String("max".into()));

  let solver = cfg
    .table
    .entry("SOLVER")
    .or_insert(Value::Table(Table::new()));
  if let Value::Table(solver) = solver {
    solver.insert("BEST_CHECKPOINTER".into(), Value::Table(best_checkpointer));
  }
  cfg
    .table
    .insert("TRAIN_LOG_PERIOD".into(), Value::Integer(200));
}

/// 按命令行参数构建最终配置并冻结
pub fn setup_cfg<S: AsRef<str>>(
  config_file: &Path,
  opts: &[S],
  confidence_threshold: f32,
) -> Result<CfgNode, ConfigError> {
  let mut cfg = get_cfg()?;
  add_custom_configs(&mut cfg);
  cfg.merge_from_file(config_file)?;
  cfg.merge_from_list(opts)?;
  for key in CONFIDENCE_THRESHOLD_KEYS {
    cfg.set(key, Value::Float(confidence_threshold as f64))?;
  }
  cfg.freeze();
  Ok(cfg)
}

impl CfgNode {
  pub fn merge_from_file(&mut self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
    self.merge_from_file_with_depth(path.as_ref(), 0)
  }

  fn merge_from_file_with_depth(&mut self, path: &Path, depth: usize) -> Result<(), ConfigError> {
    if depth > MAX_BASE_DEPTH {
      return Err(ConfigError::BaseTooDeep(path.to_path_buf()));
    }
    self.ensure_mutable(&path.display().to_string())?;

    info!("加载配置文件: {}", path.display());
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    let mut table = text.parse::<Table>().map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })?;

    if let Some(base) = table.remove(BASE_KEY) {
      let base = match base {
        Value::String(base) => base,
        other => {
          return Err(ConfigError::TypeMismatch {
            key: BASE_KEY.to_string(),
            expected: "string",
            found: other.type_str(),
          });
        }
      };
      let base_path = path.parent().unwrap_or(Path::new("")).join(base);
      debug!("配置继承: {} -> {}", path.display(), base_path.display());
      self.merge_from_file_with_depth(&base_path, depth + 1)?;
    }

    merge_table(&mut self.table, table, "")
  }

  /// 合并 `KEY VALUE` 形式的覆盖列表
  pub fn merge_from_list<S: AsRef<str>>(&mut self, opts: &[S]) -> Result<(), ConfigError> {
    if opts.len() % 2 != 0 {
      return Err(ConfigError::OddOverrideList(opts.len()));
    }
    for pair in opts.chunks(2) {
      let key = pair[0].as_ref();
      let raw = pair[1].as_ref();
      debug!("配置覆盖: {} = {}", key, raw);
      let value = match (self.get(key), parse_literal(raw)) {
        // 字符串键保留命令行原文，如 `MODEL.DEVICE 0`
        (Some(Value::String(_)), value) if !value.is_str() => Value::String(raw.to_string()),
        (_, value) => value,
      };
      self.set(key, value)?;
    }
    Ok(())
  }

  pub fn set(&mut self, key: &str, value: Value) -> Result<(), ConfigError> {
    self.ensure_mutable(key)?;
    let slot = self
      .lookup_mut(key)
      .ok_or_else(|| ConfigError::KeyNotFound(key.to_string()))?;
    *slot = coerce(slot, value, key)?;
    Ok(())
  }

  pub fn freeze(&mut self) {
    self.frozen = true;
  }

  pub fn is_frozen(&self) -> bool {
    self.frozen
  }

  pub fn get(&self, key: &str) -> Option<&Value> {
    let mut parts = key.split('.');
    let mut current = self.table.get(parts.next()?)?;
    for part in parts {
      current = current.as_table()?.get(part)?;
    }
    Some(current)
  }

  fn require(&self, key: &str) -> Result<&Value, ConfigError> {
    self
      .get(key)
      .ok_or_else(|| ConfigError::KeyNotFound(key.to_string()))
  }

  pub fn get_f32(&self, key: &str) -> Result<f32, ConfigError> {
    match self.require(key)? {
      Value::Float(v) => Ok(*v as f32),
      Value::Integer(v) => Ok(*v as f32),
      other => Err(mismatch(key, "float", other)),
    }
  }

  pub fn get_u32(&self, key: &str) -> Result<u32, ConfigError> {
    match self.require(key)? {
      Value::Integer(v) if *v >= 0 => Ok(*v as u32),
      other => Err(mismatch(key, "non-negative integer", other)),
    }
  }

  pub fn get_bool(&self, key: &str) -> Result<bool, ConfigError> {
    let value = self.require(key)?;
    value.as_bool().ok_or_else(|| mismatch(key, "boolean", value))
  }

  pub fn get_str(&self, key: &str) -> Result<&str, ConfigError> {
    let value = self.require(key)?;
    value.as_str().ok_or_else(|| mismatch(key, "string", value))
  }

  pub fn get_str_list(&self, key: &str) -> Result<Vec<String>, ConfigError> {
    let value = self.require(key)?;
    let array = value.as_array().ok_or_else(|| mismatch(key, "array", value))?;
    array
      .iter()
      .map(|item| {
        item
          .as_str()
          .map(String::from)
          .ok_or_else(|| mismatch(key, "array of strings", item))
      })
      .collect()
  }

  /// 将某个配置节反序列化为强类型结构
  pub fn section<T: DeserializeOwned>(&self, key: &str) -> Result<T, ConfigError> {
    self
      .require(key)?
      .clone()
      .try_into()
      .map_err(|source| ConfigError::Section {
        key: key.to_string(),
        source,
      })
  }

  fn ensure_mutable(&self, key: &str) -> Result<(), ConfigError> {
    if self.frozen {
      Err(ConfigError::Frozen(key.to_string()))
    } else {
      Ok(())
    }
  }

  fn lookup_mut(&mut self, key: &str) -> Option<&mut Value> {
    let mut parts = key.split('.');
    let mut current = self.table.get_mut(parts.next()?)?;
    for part in parts {
      current = current.as_table_mut()?.get_mut(part)?;
    }
    Some(current)
  }
}

impl fmt::Display for CfgNode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let text = toml::to_string(&self.table).map_err(|_| fmt::Error)?;
    f.write_str(&text)
  }
}

fn mismatch(key: &str, expected: &'static str, found: &Value) -> ConfigError {
  ConfigError::TypeMismatch {
    key: key.to_string(),
    expected,
    found: found.type_str(),
  }
}

fn merge_table(dst: &mut Table, src: Table, prefix: &str) -> Result<(), ConfigError> {
  for (key, value) in src {
    let full_key = if prefix.is_empty() {
      key.clone()
    } else {
      format!("{}.{}", prefix, key)
    };
    let slot = dst
      .get_mut(&key)
      .ok_or_else(|| ConfigError::KeyNotFound(full_key.clone()))?;
    match (slot, value) {
      (Value::Table(dst_child), Value::Table(src_child)) => {
        merge_table(dst_child, src_child, &full_key)?;
      }
      (slot, value) => {
        *slot = coerce(slot, value, &full_key)?;
      }
    }
  }
  Ok(())
}

// 新值必须与原值同类型；整数可以放宽为浮点数
fn coerce(old: &Value, new: Value, key: &str) -> Result<Value, ConfigError> {
  match (old, new) {
    (Value::Float(_), Value::Integer(v)) => Ok(Value::Float(v as f64)),
    (old, new) if std::mem::discriminant(old) == std::mem::discriminant(&new) => Ok(new),
    (old, new) => Err(ConfigError::TypeMismatch {
      key: key.to_string(),
      expected: old.type_str(),
      found: new.type_str(),
    }),
  }
}

// 按 TOML 字面量解析，失败时视为裸字符串
fn parse_literal(raw: &str) -> Value {
  format!("value = {}", raw)
    .parse::<Table>()
    .ok()
    .and_then(|mut table| table.remove("value"))
    .unwrap_or_else(|| Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn write_config(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
  }

  #[test]
  fn defaults_contain_threshold_keys() {
    let cfg = get_cfg().unwrap();
    for key in CONFIDENCE_THRESHOLD_KEYS {
      assert!(cfg.get(key).is_some(), "missing {}", key);
    }
    assert_eq!(cfg.get_str("INPUT.FORMAT").unwrap(), "BGR");
  }

  #[test]
  fn custom_configs_are_added() {
    let mut cfg = get_cfg().unwrap();
    add_custom_configs(&mut cfg);
    assert!(!cfg.get_bool("SOLVER.BEST_CHECKPOINTER.ENABLED").unwrap());
    assert_eq!(cfg.get_str("SOLVER.BEST_CHECKPOINTER.METRIC").unwrap(), "bbox/AP50");
    assert_eq!(cfg.get_str("SOLVER.BEST_CHECKPOINTER.MODE").unwrap(), "max");
    assert_eq!(cfg.get_u32("TRAIN_LOG_PERIOD").unwrap(), 200);
    // 原有的 SOLVER 项保持不变
    assert_eq!(cfg.get_u32("SOLVER.IMS_PER_BATCH").unwrap(), 16);
  }

  #[test]
  fn merge_list_parses_literals() {
    let mut cfg = get_cfg().unwrap();
    cfg
      .merge_from_list(&[
        "MODEL.WEIGHTS",
        "/models/abcnet.onnx",
        "INPUT.MIN_SIZE_TEST",
        "640",
        "MODEL.FCOS.INFERENCE_TH_TEST",
        "1",
        "DATASETS.TEST",
        "[\"totaltext_test\"]",
      ])
      .unwrap();
    assert_eq!(cfg.get_str("MODEL.WEIGHTS").unwrap(), "/models/abcnet.onnx");
    assert_eq!(cfg.get_u32("INPUT.MIN_SIZE_TEST").unwrap(), 640);
    assert_eq!(cfg.get_f32("MODEL.FCOS.INFERENCE_TH_TEST").unwrap(), 1.0);
    assert_eq!(cfg.get_str_list("DATASETS.TEST").unwrap(), vec!["totaltext_test"]);
  }

  #[test]
  fn merge_list_rejects_odd_length() {
    let mut cfg = get_cfg().unwrap();
    let err = cfg.merge_from_list(&["MODEL.WEIGHTS"]).unwrap_err();
    assert!(matches!(err, ConfigError::OddOverrideList(1)));
  }

  #[test]
  fn merge_list_rejects_unknown_key() {
    let mut cfg = get_cfg().unwrap();
    let err = cfg.merge_from_list(&["MODEL.NOPE", "1"]).unwrap_err();
    assert!(matches!(err, ConfigError::KeyNotFound(key) if key == "MODEL.NOPE"));
  }

  #[test]
  fn merge_list_rejects_type_mismatch() {
    let mut cfg = get_cfg().unwrap();
    let err = cfg
      .merge_from_list(&["INPUT.MIN_SIZE_TEST", "large"])
      .unwrap_err();
    assert!(matches!(err, ConfigError::TypeMismatch { expected: "integer", .. }));
  }

  #[test]
  fn string_keys_keep_numeric_text() {
    let mut cfg = get_cfg().unwrap();
    cfg.merge_from_list(&["MODEL.DEVICE", "0"]).unwrap();
    assert_eq!(cfg.get_str("MODEL.DEVICE").unwrap(), "0");
  }

  #[test]
  fn merge_file_keeps_string_keys_strict() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), "weights.toml", "[MODEL]\nWEIGHTS = 5\n");
    let mut cfg = get_cfg().unwrap();
    let err = cfg.merge_from_file(&path).unwrap_err();
    assert!(matches!(
      err,
      ConfigError::TypeMismatch { key, expected: "string", found: "integer" } if key == "MODEL.WEIGHTS"
    ));
  }

  #[test]
  fn set_keeps_string_keys_strict() {
    let mut cfg = get_cfg().unwrap();
    assert!(matches!(
      cfg.set("MODEL.DEVICE", Value::Boolean(true)),
      Err(ConfigError::TypeMismatch { .. })
    ));
  }

  #[test]
  fn merge_file_follows_base() {
    let dir = tempfile::tempdir().unwrap();
    write_config(
      dir.path(),
      "Base.toml",
      "[MODEL]\nMETA_ARCHITECTURE = \"OneStageDetector\"\nWEIGHTS = \"base.onnx\"\n",
    );
    let child = write_config(
      dir.path(),
      "child.toml",
      "_BASE_ = \"Base.toml\"\n[MODEL]\nWEIGHTS = \"child.onnx\"\n[INPUT]\nMAX_SIZE_TEST = 1000\n",
    );

    let mut cfg = get_cfg().unwrap();
    cfg.merge_from_file(&child).unwrap();
    assert_eq!(cfg.get_str("MODEL.META_ARCHITECTURE").unwrap(), "OneStageDetector");
    assert_eq!(cfg.get_str("MODEL.WEIGHTS").unwrap(), "child.onnx");
    assert_eq!(cfg.get_u32("INPUT.MAX_SIZE_TEST").unwrap(), 1000);
  }

  #[test]
  fn merge_file_reports_full_unknown_key() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), "bad.toml", "[MODEL.FCOS]\nUNKNOWN = 1\n");
    let mut cfg = get_cfg().unwrap();
    let err = cfg.merge_from_file(&path).unwrap_err();
    assert!(matches!(err, ConfigError::KeyNotFound(key) if key == "MODEL.FCOS.UNKNOWN"));
  }

  #[test]
  fn cyclic_base_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), "loop.toml", "_BASE_ = \"loop.toml\"\n");
    let mut cfg = get_cfg().unwrap();
    assert!(matches!(
      cfg.merge_from_file(&path).unwrap_err(),
      ConfigError::BaseTooDeep(_)
    ));
  }

  #[test]
  fn setup_overrides_every_threshold_and_freezes() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), "demo.toml", "[MODEL]\nWEIGHTS = \"m.onnx\"\n");
    let mut cfg = setup_cfg(&path, &["INPUT.FORMAT", "RGB"], 0.42).unwrap();

    for key in CONFIDENCE_THRESHOLD_KEYS {
      assert!((cfg.get_f32(key).unwrap() - 0.42).abs() < 1e-6, "{}", key);
    }
    assert_eq!(cfg.get_str("INPUT.FORMAT").unwrap(), "RGB");
    assert!(cfg.is_frozen());
    assert!(matches!(
      cfg.set("MODEL.WEIGHTS", Value::String("x".into())),
      Err(ConfigError::Frozen(_))
    ));
  }

  #[test]
  fn section_deserializes_typed_struct() {
    #[derive(serde::Deserialize)]
    #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
    struct Input {
      format: String,
      min_size_test: u32,
    }

    let cfg = get_cfg().unwrap();
    let input: Input = cfg.section("INPUT").unwrap();
    assert_eq!(input.format, "BGR");
    assert_eq!(input.min_size_test, 800);
  }
}
