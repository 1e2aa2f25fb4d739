#![allow(clippy::type_complexity)]
// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod config; // 命令行参数
pub mod detection; // 人员/胸牌 检测与匹配
pub mod error; // 领域错误
pub mod input; // 输入源 (图片/视频/流)
pub mod models; // 模型接口与具体实现
pub mod output; // 标注绘制与结果保存
pub mod pipeline; // 主流程

pub mod ort_backend;

pub use crate::config::Args;
pub use crate::detection::{match_name_tags, Detector, FrameDetections, TaggedPerson};
pub use crate::error::DetectError;
pub use crate::models::{HeadLayout, Model, YOLO};
pub use crate::ort_backend::{OrtBackend, OrtConfig, OrtEP};

/// 每张图最多保留的检测框数
pub const MAX_DET: usize = 300;

/// 贪心 NMS
///
/// 按置信度降序, 与已保留框 IoU 超过阈值的框被丢弃。
/// `agnostic == false` 时只在同类别之间抑制。
pub fn non_max_suppression(xs: &mut Vec<Bbox>, iou_threshold: f32, agnostic: bool) {
    xs.sort_by(|b1, b2| b2.confidence().total_cmp(&b1.confidence()));

    let mut current_index = 0;
    for index in 0..xs.len() {
        let mut drop = false;
        for prev_index in 0..current_index {
            if !agnostic && xs[prev_index].id() != xs[index].id() {
                continue;
            }
            let iou = xs[prev_index].iou(&xs[index]);
            if iou > iou_threshold {
                drop = true;
                break;
            }
        }
        if !drop {
            xs.swap(current_index, index);
            current_index += 1;
            if current_index == MAX_DET {
                break;
            }
        }
    }
    xs.truncate(current_index);
}

#[derive(Clone, PartialEq, Default, Debug)]
pub struct DetectionResult {
    // 单张图的检测框 (原图坐标)
    pub bboxes: Vec<Bbox>,
}

impl DetectionResult {
    pub fn new(bboxes: Vec<Bbox>) -> Self {
        Self { bboxes }
    }

    pub fn bboxes(&self) -> &[Bbox] {
        &self.bboxes
    }

    pub fn is_empty(&self) -> bool {
        self.bboxes.is_empty()
    }
}

#[derive(Debug, PartialEq, Clone, Copy, Default)]
pub struct Point2 {
    x: f32,
    y: f32,
}

impl Point2 {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn x(&self) -> f32 {
        self.x
    }

    pub fn y(&self) -> f32 {
        self.y
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Bbox {
    // a bounding box around an object
    xmin: f32,
    ymin: f32,
    width: f32,
    height: f32,
    id: usize,
    confidence: f32,
}

impl Bbox {
    pub fn new_from_xywh(xmin: f32, ymin: f32, width: f32, height: f32) -> Self {
        Self {
            xmin,
            ymin,
            width,
            height,
            ..Default::default()
        }
    }

    pub fn new(xmin: f32, ymin: f32, width: f32, height: f32, id: usize, confidence: f32) -> Self {
        Self {
            xmin,
            ymin,
            width,
            height,
            id,
            confidence,
        }
    }

    pub fn from_xyxy(x1: f32, y1: f32, x2: f32, y2: f32, id: usize, confidence: f32) -> Self {
        Self::new(x1, y1, x2 - x1, y2 - y1, id, confidence)
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn height(&self) -> f32 {
        self.height
    }

    pub fn xmin(&self) -> f32 {
        self.xmin
    }

    pub fn ymin(&self) -> f32 {
        self.ymin
    }

    pub fn xmax(&self) -> f32 {
        self.xmin + self.width
    }

    pub fn ymax(&self) -> f32 {
        self.ymin + self.height
    }

    /// (x1, y1, x2, y2)
    pub fn xyxy(&self) -> [f32; 4] {
        [self.xmin, self.ymin, self.xmax(), self.ymax()]
    }

    pub fn tl(&self) -> Point2 {
        Point2::new(self.xmin, self.ymin)
    }

    pub fn br(&self) -> Point2 {
        Point2::new(self.xmax(), self.ymax())
    }

    pub fn cxcy(&self) -> Point2 {
        Point2::new(self.xmin + self.width / 2., self.ymin + self.height / 2.)
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    pub fn intersection_area(&self, another: &Bbox) -> f32 {
        let l = self.xmin.max(another.xmin);
        let r = self.xmax().min(another.xmax());
        let t = self.ymin.max(another.ymin);
        let b = self.ymax().min(another.ymax());
        (r - l).max(0.) * (b - t).max(0.)
    }

    pub fn union(&self, another: &Bbox) -> f32 {
        self.area() + another.area() - self.intersection_area(another)
    }

    pub fn iou(&self, another: &Bbox) -> f32 {
        let union = self.union(another);
        if union <= 0. {
            return 0.;
        }
        self.intersection_area(another) / union
    }

    /// 左上角是否严格落在 `outer` 内部 (边界上不算)
    pub fn tl_strictly_inside(&self, outer: &Bbox) -> bool {
        outer.xmin() < self.xmin
            && self.xmin < outer.xmax()
            && outer.ymin() < self.ymin
            && self.ymin < outer.ymax()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x1: f32, y1: f32, x2: f32, y2: f32, id: usize, conf: f32) -> Bbox {
        Bbox::from_xyxy(x1, y1, x2, y2, id, conf)
    }

    #[test]
    fn test_bbox_geometry() {
        let b = bbox(10., 20., 50., 100., 0, 0.9);
        assert_eq!(b.width(), 40.);
        assert_eq!(b.height(), 80.);
        assert_eq!(b.xyxy(), [10., 20., 50., 100.]);
        assert_eq!(b.cxcy(), Point2::new(30., 60.));
        assert_eq!(b.area(), 3200.);
    }

    #[test]
    fn test_iou() {
        let a = bbox(0., 0., 10., 10., 0, 0.9);
        let b = bbox(5., 0., 15., 10., 0, 0.8);
        assert!((a.iou(&b) - 50. / 150.).abs() < 1e-6);
        let far = bbox(100., 100., 110., 110., 0, 0.8);
        assert_eq!(a.iou(&far), 0.);
        assert!((a.iou(&a) - 1.).abs() < 1e-6);
    }

    #[test]
    fn test_nms_suppresses_overlaps() {
        let mut xs = vec![
            bbox(0., 0., 10., 10., 0, 0.6),
            bbox(1., 1., 11., 11., 0, 0.9),
            bbox(50., 50., 60., 60., 0, 0.7),
        ];
        non_max_suppression(&mut xs, 0.45, false);
        assert_eq!(xs.len(), 2);
        assert_eq!(xs[0].confidence(), 0.9);
        assert_eq!(xs[1].confidence(), 0.7);
    }

    #[test]
    fn test_nms_class_aware_vs_agnostic() {
        let boxes = vec![
            bbox(0., 0., 10., 10., 0, 0.9),
            bbox(1., 1., 11., 11., 1, 0.8),
        ];

        let mut aware = boxes.clone();
        non_max_suppression(&mut aware, 0.45, false);
        assert_eq!(aware.len(), 2);

        let mut agnostic = boxes;
        non_max_suppression(&mut agnostic, 0.45, true);
        assert_eq!(agnostic.len(), 1);
        assert_eq!(agnostic[0].id(), 0);
    }

    #[test]
    fn test_nms_caps_detections() {
        let mut xs: Vec<Bbox> = (0..MAX_DET + 20)
            .map(|i| {
                let x = i as f32 * 20.;
                bbox(x, 0., x + 10., 10., 0, 0.5)
            })
            .collect();
        non_max_suppression(&mut xs, 0.45, false);
        assert_eq!(xs.len(), MAX_DET);
    }

    #[test]
    fn test_tl_strictly_inside() {
        let person = bbox(10., 10., 100., 200., 0, 0.9);
        assert!(bbox(20., 30., 40., 50., 0, 0.9).tl_strictly_inside(&person));
        // 边界上不算
        assert!(!bbox(10., 30., 40., 50., 0, 0.9).tl_strictly_inside(&person));
        assert!(!bbox(20., 200., 40., 250., 0, 0.9).tl_strictly_inside(&person));
        // 只看左上角, 右下角可以越界
        assert!(bbox(90., 190., 140., 250., 0, 0.9).tl_strictly_inside(&person));
    }
}
