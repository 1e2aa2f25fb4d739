/// 模型统一接口与实现
///
/// # 架构说明
///
/// - **YOLO**: 一个结构体覆盖常见 YOLO 导出格式
///   - 模型加载 (new)
///   - 预处理 (preprocess, letterbox)
///   - 推理 (run)
///   - 后处理 (postprocess, 解码 + NMS + 坐标还原)
///   - 文件: `yolo.rs`
///
/// ## 输出布局
/// 输出头的布局由输出形状和类别数推断, 见 [`HeadLayout`]。
///
/// ## 使用示例
/// ```ignore
/// use nametag_rs::models::{Model, YOLO, YOLOConfig};
///
/// let mut model = YOLO::new(config)?;
/// let results = model.forward(&images)?;
/// ```
use anyhow::Result;
use image::RgbImage;
use ndarray::{Array, IxDyn};

use crate::error::DetectError;
use crate::DetectionResult;

pub mod yolo;

pub use yolo::{check_img_size, Letterbox, YOLOConfig, YOLO};

/// 输出头布局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadLayout {
    /// `[batch, anchors, 5 + nc]`, 含 objectness (YOLOv5 / YOLOv7 导出)
    Anchor,
    /// `[batch, 4 + nc, anchors]`, 无 objectness (YOLOv8 / YOLOv11 导出)
    AnchorFree,
}

impl HeadLayout {
    /// 由输出形状推断布局与类别数
    ///
    /// `nc` 来自模型元数据; 缺失时按 "锚点数远大于通道数" 判断。
    /// 动态维度用非正数表示。
    pub fn infer(shape: &[i64], nc: Option<usize>) -> Result<(HeadLayout, usize), DetectError> {
        let unsupported = || DetectError::UnsupportedOutput {
            shape: shape.iter().map(|d| (*d).max(0) as usize).collect(),
            nc: nc.unwrap_or(0),
        };
        if shape.len() != 3 {
            return Err(unsupported());
        }
        let (d1, d2) = (shape[1], shape[2]);

        if let Some(nc) = nc {
            let nc_i = nc as i64;
            return if d1 == 4 + nc_i {
                Ok((HeadLayout::AnchorFree, nc))
            } else if d2 == 5 + nc_i {
                Ok((HeadLayout::Anchor, nc))
            } else {
                Err(unsupported())
            };
        }

        let anchor_free = match (d1 > 0, d2 > 0) {
            (true, true) => d1 < d2,
            (true, false) => true,
            (false, true) => false,
            (false, false) => return Err(unsupported()),
        };
        if anchor_free && d1 > 4 {
            Ok((HeadLayout::AnchorFree, (d1 - 4) as usize))
        } else if !anchor_free && d2 > 5 {
            Ok((HeadLayout::Anchor, (d2 - 5) as usize))
        } else {
            Err(unsupported())
        }
    }
}

/// 统一的检测模型接口
///
/// ## 核心流程
/// ```text
/// 原始图片 → preprocess → ndarray张量
///          ↓
///     推理引擎 run
///          ↓
///     原始输出 → postprocess → 检测结果
/// ```
pub trait Model {
    /// 预处理: 图片 → NCHW 张量
    fn preprocess(&mut self, images: &[RgbImage]) -> Result<Vec<Array<f32, IxDyn>>>;

    /// 推理: 执行模型前向传播
    fn run(&mut self, xs: Vec<Array<f32, IxDyn>>, profile: bool)
        -> Result<Vec<Array<f32, IxDyn>>>;

    /// 后处理: 原始输出 → 检测结果 (原图坐标)
    fn postprocess(
        &self,
        xs: Vec<Array<f32, IxDyn>>,
        xs0: &[RgbImage],
    ) -> Result<Vec<DetectionResult>>;

    /// 打印模型信息
    fn summary(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_with_names() {
        assert_eq!(
            HeadLayout::infer(&[1, 25200, 6], Some(1)).unwrap(),
            (HeadLayout::Anchor, 1)
        );
        assert_eq!(
            HeadLayout::infer(&[1, 84, 8400], Some(80)).unwrap(),
            (HeadLayout::AnchorFree, 80)
        );
        assert!(HeadLayout::infer(&[1, 84, 8400], Some(2)).is_err());
    }

    #[test]
    fn test_infer_without_names() {
        assert_eq!(
            HeadLayout::infer(&[1, 25200, 85], None).unwrap(),
            (HeadLayout::Anchor, 80)
        );
        assert_eq!(
            HeadLayout::infer(&[1, 5, 8400], None).unwrap(),
            (HeadLayout::AnchorFree, 1)
        );
        // 锚点数为动态维度
        assert_eq!(
            HeadLayout::infer(&[-1, 6, -1], None).unwrap(),
            (HeadLayout::AnchorFree, 2)
        );
        assert_eq!(
            HeadLayout::infer(&[-1, -1, 7], None).unwrap(),
            (HeadLayout::Anchor, 2)
        );
    }

    #[test]
    fn test_infer_rejects_bad_shapes() {
        assert!(HeadLayout::infer(&[1, 84], None).is_err());
        assert!(HeadLayout::infer(&[1, -1, -1], None).is_err());
        assert!(HeadLayout::infer(&[1, 4, 8400], None).is_err());
    }
}
