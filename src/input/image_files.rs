// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input/image_files.rs - 图像输入列表解析
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

use tracing::{debug, warn};

use crate::input::InputError;

/// 将 `--input` 展开为待处理的图像路径
///
/// - 第一项是目录：取该目录下的全部条目（按名称排序）
/// - 只有一项：展开 `~` 后按通配符匹配，没有匹配时报错
/// - 其他情况：原样返回
pub fn resolve_image_inputs<S: AsRef<str>>(inputs: &[S]) -> Result<Vec<PathBuf>, InputError> {
  let Some(first) = inputs.first() else {
    return Err(InputError::NotFound(String::new()));
  };
  let first = first.as_ref();

  if Path::new(first).is_dir() {
    let dir = Path::new(first);
    let entries = std::fs::read_dir(dir).map_err(|source| InputError::Io {
      path: dir.to_path_buf(),
      source,
    })?;
    let mut paths = entries
      .map(|entry| entry.map(|e| e.path()))
      .collect::<Result<Vec<_>, _>>()
      .map_err(|source| InputError::Io {
        path: dir.to_path_buf(),
        source,
      })?;
    paths.sort();
    debug!("目录 {} 下共 {} 个输入", dir.display(), paths.len());
    return Ok(paths);
  }

  if inputs.len() == 1 {
    let pattern = expand_user(first);
    let mut paths = Vec::new();
    for entry in glob::glob(&pattern)? {
      match entry {
        Ok(path) => paths.push(path),
        Err(e) => warn!("无法访问 {}: {}", e.path().display(), e),
      }
    }
    if paths.is_empty() {
      return Err(InputError::NotFound(first.to_string()));
    }
    return Ok(paths);
  }

  Ok(inputs.iter().map(|s| PathBuf::from(s.as_ref())).collect())
}

// 展开开头的 `~` 为用户主目录
fn expand_user(path: &str) -> String {
  let rest = match path.strip_prefix('~') {
    Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
    _ => return path.to_string(),
  };
  match dirs::home_dir() {
    Some(home) => format!("{}{}", home.display(), rest),
    None => path.to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn touch(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"").unwrap();
    path
  }

  #[test]
  fn directory_lists_sorted_entries() {
    let dir = tempfile::tempdir().unwrap();
    let b = touch(dir.path(), "b.jpg");
    let a = touch(dir.path(), "a.png");
    let dir_str = dir.path().to_string_lossy().into_owned();

    let paths = resolve_image_inputs(&[dir_str.as_str(), "ignored.jpg"]).unwrap();
    assert_eq!(paths, vec![a, b]);
  }

  #[test]
  fn single_pattern_is_globbed() {
    let dir = tempfile::tempdir().unwrap();
    let a = touch(dir.path(), "x1.jpg");
    let b = touch(dir.path(), "x2.jpg");
    touch(dir.path(), "y.png");
    let pattern = format!("{}/x*.jpg", dir.path().display());

    assert_eq!(resolve_image_inputs(&[pattern]).unwrap(), vec![a, b]);
  }

  #[test]
  fn empty_glob_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let pattern = format!("{}/*.jpg", dir.path().display());
    let err = resolve_image_inputs(&[pattern]).unwrap_err();
    assert!(matches!(err, InputError::NotFound(_)));
    assert!(err.to_string().starts_with("The input path(s) was not found"));
  }

  #[test]
  fn multiple_inputs_are_kept_verbatim() {
    let paths = resolve_image_inputs(&["missing1.jpg", "missing2.jpg"]).unwrap();
    assert_eq!(
      paths,
      vec![PathBuf::from("missing1.jpg"), PathBuf::from("missing2.jpg")]
    );
  }

  #[test]
  fn tilde_is_expanded() {
    assert_eq!(expand_user("/abs/path"), "/abs/path");
    assert_eq!(expand_user("~user/x"), "~user/x");
    if let Some(home) = dirs::home_dir() {
      assert_eq!(expand_user("~/imgs/*.jpg"), format!("{}/imgs/*.jpg", home.display()));
    }
  }
}
