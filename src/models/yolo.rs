// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// YOLO 检测模型实现
// 包含: 模型加载、letterbox 预处理、推理、后处理

use anyhow::Result;
use fast_image_resize as fr;
use image::RgbImage;
use ndarray::{s, Array, ArrayView1, ArrayView2, Axis, Ix2, IxDyn};
use tracing::{info, warn};

use super::{HeadLayout, Model};
use crate::{non_max_suppression, Bbox, DetectionResult, OrtBackend, OrtConfig, OrtEP};

/// letterbox 填充色 (114, 114, 114)
const PAD_VALUE: f32 = 114.0 / 255.0;

/// 模型构建参数
#[derive(Debug, Clone)]
pub struct YOLOConfig {
    pub model: String,
    pub ep: OrtEP,
    pub fp16: bool,
    /// 推理尺寸 (已按 stride 对齐), 仅在动态输入时生效
    pub img_size: u32,
    pub conf: f32,
    pub iou: f32,
    pub agnostic: bool,
    pub classes: Option<Vec<usize>>,
}

/// 将推理尺寸向上取整到 stride 的倍数
pub fn check_img_size(img_size: u32, stride: u32) -> u32 {
    let stride = stride.max(1);
    let new_size = img_size.div_ceil(stride).max(1) * stride;
    if new_size != img_size {
        warn!(
            "⚠️ --img-size {} 必须是 stride {} 的倍数, 已调整为 {}",
            img_size, stride, new_size
        );
    }
    new_size
}

/// letterbox 变换参数: 原图 (w0, h0) → 输入 (w1, h1)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub gain: f32,
    pub new_w: u32,
    pub new_h: u32,
    pub left: u32,
    pub top: u32,
    pub pad_x: f32,
    pub pad_y: f32,
    w0: f32,
    h0: f32,
}

impl Letterbox {
    pub fn new(w0: u32, h0: u32, w1: u32, h1: u32) -> Self {
        let (w0f, h0f) = (w0 as f32, h0 as f32);
        let gain = (w1 as f32 / w0f).min(h1 as f32 / h0f);
        let new_w = ((w0f * gain).round() as u32).clamp(1, w1);
        let new_h = ((h0f * gain).round() as u32).clamp(1, h1);
        let dw = (w1 - new_w) as f32 / 2.0;
        let dh = (h1 - new_h) as f32 / 2.0;
        Self {
            gain,
            new_w,
            new_h,
            left: (dw - 0.1).round().max(0.0) as u32,
            top: (dh - 0.1).round().max(0.0) as u32,
            pad_x: (w1 as f32 - w0f * gain) / 2.0,
            pad_y: (h1 as f32 - h0f * gain) / 2.0,
            w0: w0f,
            h0: h0f,
        }
    }

    /// 输入坐标 (x1, y1, x2, y2) → 原图坐标, 裁剪到图像范围并取整
    pub fn scale_coords(&self, xyxy: [f32; 4]) -> [f32; 4] {
        let [x1, y1, x2, y2] = xyxy;
        let sx = |x: f32| ((x - self.pad_x) / self.gain).clamp(0.0, self.w0).round();
        let sy = |y: f32| ((y - self.pad_y) / self.gain).clamp(0.0, self.h0).round();
        [sx(x1), sy(y1), sx(x2), sy(y2)]
    }
}

/// YOLO 检测模型
pub struct YOLO {
    engine: OrtBackend,
    nc: Option<usize>,
    height: u32,
    width: u32,
    conf: f32,
    iou: f32,
    agnostic: bool,
    classes: Option<Vec<usize>>,
    names: Vec<String>,
}

impl YOLO {
    pub fn new(config: YOLOConfig) -> Result<Self> {
        let engine = OrtBackend::build(OrtConfig {
            f: config.model.clone(),
            ep: config.ep,
            trt_fp16: config.fp16,
            image_size: (Some(config.img_size), Some(config.img_size)),
        })?;

        let (height, width) = (engine.height(), engine.width());
        let names = engine.names().unwrap_or_default();
        let nc = engine.nc();

        // 静态输出形状可以提前校验, 动态的留到第一次推理
        let output_shape = engine.output_shape();
        if output_shape.len() == 3 {
            if let Err(e) = HeadLayout::infer(output_shape, nc) {
                if output_shape.iter().all(|d| *d > 0) {
                    return Err(e.into());
                }
            }
        }

        Ok(Self {
            engine,
            nc,
            height,
            width,
            conf: config.conf,
            iou: config.iou,
            agnostic: config.agnostic,
            classes: config.classes,
            names,
        })
    }

    pub fn preprocess(&mut self, xs: &[RgbImage]) -> Result<Array<f32, IxDyn>> {
        let (h1, w1) = (self.height(), self.width());
        let mut ys = Array::from_elem((xs.len(), 3, h1 as usize, w1 as usize), PAD_VALUE).into_dyn();
        let mut resizer = fr::Resizer::new();

        for (idx, x) in xs.iter().enumerate() {
            let lb = Letterbox::new(x.width(), x.height(), w1, h1);

            let src = fr::images::ImageRef::new(x.width(), x.height(), x.as_raw(), fr::PixelType::U8x3)?;
            let mut dst = fr::images::Image::new(lb.new_w, lb.new_h, fr::PixelType::U8x3);
            resizer.resize(
                &src,
                &mut dst,
                &fr::ResizeOptions::new()
                    .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear)),
            )?;

            let (top, left) = (lb.top as usize, lb.left as usize);
            let new_w = lb.new_w as usize;
            for (i, rgb) in dst.buffer().chunks_exact(3).enumerate() {
                let y = top + i / new_w;
                let x = left + i % new_w;
                ys[[idx, 0, y, x]] = (rgb[0] as f32) / 255.0;
                ys[[idx, 1, y, x]] = (rgb[1] as f32) / 255.0;
                ys[[idx, 2, y, x]] = (rgb[2] as f32) / 255.0;
            }
        }

        Ok(ys)
    }

    /// 用全零输入跑一次, 触发 GPU 侧的初始化
    pub fn warmup(&mut self) -> Result<()> {
        let xs = Array::zeros((1, 3, self.height() as usize, self.width() as usize)).into_dyn();
        self.engine.run(xs, false)?;
        Ok(())
    }

    pub fn postprocess(
        &self,
        xs: Vec<Array<f32, IxDyn>>,
        xs0: &[RgbImage],
    ) -> Result<Vec<DetectionResult>> {
        let preds = xs
            .first()
            .ok_or_else(|| anyhow::anyhow!("模型没有输出"))?;
        let shape: Vec<i64> = preds.shape().iter().map(|d| *d as i64).collect();
        let (layout, nc) = HeadLayout::infer(&shape, self.nc)?;

        let mut ys = Vec::with_capacity(xs0.len());
        for (idx, anchor) in preds.axis_iter(Axis(0)).enumerate() {
            let Some(x0) = xs0.get(idx) else { break };
            let lb = Letterbox::new(x0.width(), x0.height(), self.width(), self.height());

            // 统一成 [anchors, channels]
            let anchor = anchor.into_dimensionality::<Ix2>()?;
            let rows = match layout {
                HeadLayout::AnchorFree => anchor.reversed_axes(),
                HeadLayout::Anchor => anchor,
            };

            let mut data = decode_rows(rows, layout, nc, self.conf, self.classes.as_deref());

            // NMS 在输入坐标系里做, 再还原到原图
            non_max_suppression(&mut data, self.iou, self.agnostic);

            let bboxes = data
                .into_iter()
                .map(|b| {
                    let [x1, y1, x2, y2] = lb.scale_coords(b.xyxy());
                    Bbox::from_xyxy(x1, y1, x2, y2, b.id(), b.confidence())
                })
                .collect();
            ys.push(DetectionResult::new(bboxes));
        }

        Ok(ys)
    }

    pub fn summary(&self) {
        info!(
            "\nSummary:\n\
            > Names: {:?}\n\
            > Author: {}\n\
            > EP: {:?} {}\n\
            > Dtype: {:?}\n\
            > Batch: ({}), Height: {} ({}), Width: {} ({})\n\
            > nc: {}, stride: {}, conf: {}, iou: {}, agnostic: {}\n",
            self.names,
            match (self.engine.author(), self.engine.version()) {
                (Some(author), Some(ver)) => format!("{} {}", author, ver),
                (Some(author), None) => author.to_string(),
                _ => String::from("-"),
            },
            self.engine.ep(),
            if let OrtEP::CPU = self.engine.ep() {
                ""
            } else {
                "(May still fall back to CPU)"
            },
            self.engine.dtype(),
            if self.engine.is_batch_dynamic() {
                "Dynamic"
            } else {
                "Const"
            },
            self.height(),
            if self.engine.is_height_dynamic() {
                "Dynamic"
            } else {
                "Const"
            },
            self.width(),
            if self.engine.is_width_dynamic() {
                "Dynamic"
            } else {
                "Const"
            },
            self.nc
                .map(|n| n.to_string())
                .unwrap_or_else(|| "auto".to_string()),
            self.stride(),
            self.conf,
            self.iou,
            self.agnostic,
        );
    }

    pub fn engine(&self) -> &OrtBackend {
        &self.engine
    }

    pub fn stride(&self) -> u32 {
        self.engine.stride()
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_cpu(&self) -> bool {
        matches!(self.engine.ep(), OrtEP::CPU)
    }
}

/// 解码一张图的输出行 `[anchors, channels]`: 置信度/类别过滤, cxcywh → xyxy
fn decode_rows(
    rows: ArrayView2<f32>,
    layout: HeadLayout,
    nc: usize,
    conf: f32,
    classes: Option<&[usize]>,
) -> Vec<Bbox> {
    const CXYWH_OFFSET: usize = 4;

    let mut data = Vec::new();
    for pred in rows.axis_iter(Axis(0)) {
        let scored = match layout {
            HeadLayout::AnchorFree => {
                best_class(pred.slice(s![CXYWH_OFFSET..CXYWH_OFFSET + nc]), 1.0)
            }
            HeadLayout::Anchor => {
                let obj = pred[CXYWH_OFFSET];
                if obj <= conf {
                    continue;
                }
                best_class(pred.slice(s![CXYWH_OFFSET + 1..CXYWH_OFFSET + 1 + nc]), obj)
            }
        };
        let Some((id, confidence)) = scored else {
            continue;
        };
        if confidence <= conf {
            continue;
        }
        if classes.is_some_and(|c| !c.contains(&id)) {
            continue;
        }

        let (cx, cy, w, h) = (pred[0], pred[1], pred[2], pred[3]);
        data.push(Bbox::from_xyxy(
            cx - w / 2.,
            cy - h / 2.,
            cx + w / 2.,
            cy + h / 2.,
            id,
            confidence,
        ));
    }
    data
}

/// 取最高分类别, 分数乘以 objectness
fn best_class(clss: ArrayView1<f32>, obj: f32) -> Option<(usize, f32)> {
    clss.iter()
        .enumerate()
        .map(|(id, c)| (id, c * obj))
        .reduce(|max, x| if x.1 > max.1 { x } else { max })
}

// 实现统一的 Model trait
impl Model for YOLO {
    fn preprocess(&mut self, images: &[RgbImage]) -> Result<Vec<Array<f32, IxDyn>>> {
        let batch = YOLO::preprocess(self, images)?;
        Ok(vec![batch])
    }

    fn run(&mut self, mut xs: Vec<Array<f32, IxDyn>>, profile: bool) -> Result<Vec<Array<f32, IxDyn>>> {
        if xs.is_empty() {
            anyhow::bail!("空输入");
        }
        self.engine.run(xs.swap_remove(0), profile)
    }

    fn postprocess(
        &self,
        xs: Vec<Array<f32, IxDyn>>,
        xs0: &[RgbImage],
    ) -> Result<Vec<DetectionResult>> {
        YOLO::postprocess(self, xs, xs0)
    }

    fn summary(&self) {
        YOLO::summary(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_img_size() {
        assert_eq!(check_img_size(640, 32), 640);
        assert_eq!(check_img_size(641, 32), 672);
        assert_eq!(check_img_size(100, 64), 128);
        assert_eq!(check_img_size(0, 32), 32);
    }

    #[test]
    fn test_letterbox_landscape() {
        // 1280x720 → 640x640: gain 0.5, 640x360, 上下各填充 140
        let lb = Letterbox::new(1280, 720, 640, 640);
        assert!((lb.gain - 0.5).abs() < 1e-6);
        assert_eq!((lb.new_w, lb.new_h), (640, 360));
        assert_eq!((lb.left, lb.top), (0, 140));
        assert!((lb.pad_y - 140.0).abs() < 1e-6);
    }

    #[test]
    fn test_scale_coords_roundtrip() {
        let lb = Letterbox::new(1280, 720, 640, 640);
        // 原图 (100, 200, 300, 400) 在输入中为 (50, 240, 150, 340)
        let xyxy = lb.scale_coords([50.0, 240.0, 150.0, 340.0]);
        assert_eq!(xyxy, [100.0, 200.0, 300.0, 400.0]);
    }

    #[test]
    fn test_scale_coords_clips() {
        let lb = Letterbox::new(1280, 720, 640, 640);
        let xyxy = lb.scale_coords([-20.0, 100.0, 700.0, 600.0]);
        assert_eq!(xyxy, [0.0, 0.0, 1280.0, 720.0]);
    }

    #[test]
    fn test_decode_anchor_rows() {
        // [anchors, 5 + nc], nc = 2
        let rows = ndarray::arr2(&[
            [100.0f32, 100.0, 40.0, 80.0, 0.9, 0.2, 0.8], // 0.9 * 0.8 = 0.72, 类别 1
            [200.0, 200.0, 10.0, 10.0, 0.1, 0.9, 0.9],   // objectness 太低
            [300.0, 300.0, 20.0, 20.0, 0.5, 0.4, 0.1],   // 0.5 * 0.4 = 0.2 < 0.25
        ]);
        let boxes = decode_rows(rows.view(), HeadLayout::Anchor, 2, 0.25, None);
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].xyxy(), [80.0, 60.0, 120.0, 140.0]);
        assert_eq!(boxes[0].id(), 1);
        assert!((boxes[0].confidence() - 0.72).abs() < 1e-6);
    }

    #[test]
    fn test_decode_drops_scores_at_threshold() {
        // 分数恰好等于阈值时丢弃
        let rows = ndarray::arr2(&[
            [10.0f32, 10.0, 4.0, 4.0, 0.5, 1.0], // objectness == conf
            [20.0, 20.0, 4.0, 4.0, 1.0, 0.5],    // obj * cls == conf
            [30.0, 30.0, 4.0, 4.0, 1.0, 0.75],
        ]);
        let boxes = decode_rows(rows.view(), HeadLayout::Anchor, 1, 0.5, None);
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].confidence(), 0.75);

        let free = ndarray::arr2(&[[10.0f32, 10.0, 4.0, 4.0, 0.5], [20.0, 20.0, 4.0, 4.0, 0.5001]]);
        let boxes = decode_rows(free.view(), HeadLayout::AnchorFree, 1, 0.5, None);
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].xyxy(), [18.0, 18.0, 22.0, 22.0]);
    }

    #[test]
    fn test_decode_anchor_free_rows_with_class_filter() {
        // 输出为 [4 + nc, anchors], 转置后逐行解码
        let out = ndarray::arr2(&[
            [10.0f32, 50.0],
            [10.0, 50.0],
            [4.0, 20.0],
            [4.0, 20.0],
            [0.9, 0.1],
            [0.05, 0.6],
        ]);
        let rows = out.view().reversed_axes();
        let all = decode_rows(rows, HeadLayout::AnchorFree, 2, 0.25, None);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id(), 0);
        assert_eq!(all[1].id(), 1);

        let only_0 = decode_rows(rows, HeadLayout::AnchorFree, 2, 0.25, Some(&[0]));
        assert_eq!(only_0.len(), 1);
        assert_eq!(only_0[0].xyxy(), [8.0, 8.0, 12.0, 12.0]);
    }

    #[test]
    fn test_best_class() {
        let clss = ndarray::arr1(&[0.1f32, 0.7, 0.3]);
        assert_eq!(best_class(clss.view(), 1.0), Some((1, 0.7)));
        let (id, conf) = best_class(clss.view(), 0.5).unwrap();
        assert_eq!(id, 1);
        assert!((conf - 0.35).abs() < 1e-6);
        let empty = ndarray::Array1::<f32>::zeros(0);
        assert_eq!(best_class(empty.view(), 1.0), None);
    }
}
