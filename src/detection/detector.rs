// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 检测器 (Detector)
//! 职责: 一帧图像 → 人员模型 + 胸牌模型 → 包含匹配

use std::time::Instant;

use anyhow::Result;
use image::RgbImage;
use tracing::info;

use super::matcher::{match_name_tags, TaggedPerson};
use crate::models::{Model, YOLOConfig, YOLO};
use crate::{Args, Bbox};

/// 单帧检测结果
#[derive(Clone, Debug, Default)]
pub struct FrameDetections {
    pub persons: Vec<Bbox>,
    pub tags: Vec<Bbox>,
    pub matches: Vec<TaggedPerson>,
    /// 两个模型的 预处理 + 推理 耗时
    pub inference_ms: f64,
    /// 两个模型的 解码 + NMS + 坐标还原 耗时
    pub nms_ms: f64,
}

pub struct Detector {
    person_model: YOLO,
    tag_model: YOLO,
    profile: bool,
}

impl Detector {
    /// 加载两个模型; 推理尺寸对齐到两个模型 stride 的较大者
    pub fn new(args: &Args) -> Result<Self> {
        let ep = args.execution_provider()?;
        let config = |model: &str| YOLOConfig {
            model: model.to_string(),
            ep,
            fp16: args.fp16,
            img_size: args.img_size,
            conf: args.conf_thres,
            iou: args.iou_thres,
            agnostic: args.agnostic_nms,
            classes: args.class_filter().map(|c| c.to_vec()),
        };

        let mut person_model = YOLO::new(config(&args.weights1))?;
        info!("✅ 人员检测模型加载成功: {}", args.weights1);
        let mut tag_model = YOLO::new(config(&args.weights2))?;
        info!("✅ 胸牌检测模型加载成功: {}", args.weights2);

        let stride = person_model.stride().max(tag_model.stride());
        let img_size = crate::models::check_img_size(args.img_size, stride);
        if img_size != args.img_size {
            // 动态输入的模型按对齐后的尺寸重建
            if person_model.engine().is_height_dynamic() || person_model.engine().is_width_dynamic() {
                person_model = YOLO::new(YOLOConfig {
                    img_size,
                    ..config(&args.weights1)
                })?;
            }
            if tag_model.engine().is_height_dynamic() || tag_model.engine().is_width_dynamic() {
                tag_model = YOLO::new(YOLOConfig {
                    img_size,
                    ..config(&args.weights2)
                })?;
            }
        }

        person_model.summary();
        tag_model.summary();

        Ok(Self {
            person_model,
            tag_model,
            profile: args.profile,
        })
    }

    /// 非 CPU 后端先各跑一次
    pub fn warmup(&mut self) -> Result<()> {
        if self.person_model.is_cpu() && self.tag_model.is_cpu() {
            return Ok(());
        }
        let t = Instant::now();
        self.person_model.warmup()?;
        self.tag_model.warmup()?;
        info!("🔥 模型预热完成: {:.1}ms", t.elapsed().as_secs_f64() * 1000.0);
        Ok(())
    }

    /// 处理单帧检测
    pub fn detect(&mut self, frame: &RgbImage) -> Result<FrameDetections> {
        let images = std::slice::from_ref(frame);

        // 1. 预处理 + 推理
        let t1 = Instant::now();
        let xs1 = Model::preprocess(&mut self.person_model, images)?;
        let ys1 = Model::run(&mut self.person_model, xs1, self.profile)?;
        let xs2 = Model::preprocess(&mut self.tag_model, images)?;
        let ys2 = Model::run(&mut self.tag_model, xs2, self.profile)?;
        let inference_ms = t1.elapsed().as_secs_f64() * 1000.0;

        // 2. 后处理 (NMS)
        let t2 = Instant::now();
        let persons = Model::postprocess(&self.person_model, ys1, images)?
            .into_iter()
            .next()
            .map(|r| r.bboxes)
            .unwrap_or_default();
        let tags = Model::postprocess(&self.tag_model, ys2, images)?
            .into_iter()
            .next()
            .map(|r| r.bboxes)
            .unwrap_or_default();
        let nms_ms = t2.elapsed().as_secs_f64() * 1000.0;

        // 3. 包含匹配
        let matches = match_name_tags(&persons, &tags);

        Ok(FrameDetections {
            persons,
            tags,
            matches,
            inference_ms,
            nms_ms,
        })
    }
}
