// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 输出目录: runs/detect/exp, exp2, exp3, ...

use std::path::{Path, PathBuf};

use anyhow::Result;
use regex::Regex;
use tracing::info;

/// 目录已存在且不允许复用时, 追加递增序号
///
/// `runs/exp` → `runs/exp2` → `runs/exp3` ... 序号取已有最大值 + 1。
pub fn increment_path(path: &Path, exist_ok: bool) -> PathBuf {
    if !path.exists() || exist_ok {
        return path.to_path_buf();
    }

    let stem = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty());

    let n = Regex::new(&format!(r"^{}(\d+)$", regex::escape(&stem)))
        .ok()
        .and_then(|re| {
            std::fs::read_dir(parent.unwrap_or(Path::new(".")))
                .ok()?
                .filter_map(|e| e.ok())
                .filter_map(|e| {
                    let name = e.file_name().to_string_lossy().to_string();
                    re.captures(&name)?.get(1)?.as_str().parse::<usize>().ok()
                })
                .max()
        })
        .map_or(2, |i| i + 1);

    let name = format!("{}{}", stem, n);
    match parent {
        Some(p) => p.join(name),
        None => PathBuf::from(name),
    }
}

/// 创建输出目录 (保存标签时包含 labels/)
pub fn create_save_dir(project: &Path, name: &str, exist_ok: bool, save_txt: bool) -> Result<PathBuf> {
    let save_dir = increment_path(&project.join(name), exist_ok);
    let dir = if save_txt {
        save_dir.join("labels")
    } else {
        save_dir.clone()
    };
    std::fs::create_dir_all(&dir)?;
    info!("📁 输出目录: {}", save_dir.display());
    Ok(save_dir)
}
