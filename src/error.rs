// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 领域错误类型
//!
//! 应用层统一使用 `anyhow::Result`,这里只列出调用方需要区分的失败情况。

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectError {
    #[error("输入源不存在: {0}")]
    SourceNotFound(PathBuf),

    #[error("模型文件不存在: {0}")]
    ModelNotFound(PathBuf),

    #[error("未找到可处理的图片或视频: {0}")]
    NoMedia(PathBuf),

    #[error("流列表为空: {0}")]
    EmptyStreamList(PathBuf),

    #[error("不支持的模型输出形状 {shape:?} (nc={nc})")]
    UnsupportedOutput { shape: Vec<usize>, nc: usize },

    #[error("设备参数无效: {0}")]
    InvalidDevice(String),

    #[error("视频写入失败: {0}")]
    VideoWriter(String),

    #[error("视频解码失败: {0}")]
    Decoder(String),

    #[error("字体加载失败: {0}")]
    Font(String),
}
