// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 命令行参数

use clap::Parser;
use std::path::PathBuf;

use crate::error::DetectError;
use crate::OrtEP;

/// 人员 + 胸牌 双模型检测
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// 模型1 ONNX 路径 (人员检测)
    #[arg(long, default_value = "yolov7_1.onnx")]
    pub weights1: String,

    /// 模型2 ONNX 路径 (胸牌检测)
    #[arg(long, default_value = "yolov7_2.onnx")]
    pub weights2: String,

    /// 输入源: 文件/目录/流列表.txt/摄像头序号/rtsp://...
    #[arg(long, default_value = "inference/images")]
    pub source: String,

    /// 推理尺寸 (像素)
    #[arg(long = "img-size", default_value_t = 640)]
    pub img_size: u32,

    /// 置信度阈值
    #[arg(long = "conf-thres", default_value_t = 0.25)]
    pub conf_thres: f32,

    /// NMS 的 IOU 阈值
    #[arg(long = "iou-thres", default_value_t = 0.45)]
    pub iou_thres: f32,

    /// 推理设备: cpu 或 CUDA 序号 (如 0),留空则优先 CUDA:0
    #[arg(long, default_value = "")]
    pub device: String,

    /// 在所选 CUDA 设备上使用 TensorRT
    #[arg(long)]
    pub trt: bool,

    /// TensorRT fp16
    #[arg(long)]
    pub fp16: bool,

    /// 保存检测结果到 *.txt
    #[arg(long = "save-txt")]
    pub save_txt: bool,

    /// 在 --save-txt 标签中写入置信度
    #[arg(long = "save-conf")]
    pub save_conf: bool,

    /// 不保存图片/视频
    #[arg(long)]
    pub nosave: bool,

    /// 只保留指定类别: --classes 0 或 --classes 0 2 3
    #[arg(long, num_args = 1..)]
    pub classes: Option<Vec<usize>>,

    /// 类别无关 NMS
    #[arg(long = "agnostic-nms")]
    pub agnostic_nms: bool,

    /// 结果保存到 project/name
    #[arg(long, default_value = "runs/detect")]
    pub project: PathBuf,

    /// 结果保存到 project/name
    #[arg(long, default_value = "exp")]
    pub name: String,

    /// project/name 已存在时直接复用,不递增
    #[arg(long = "exist-ok")]
    pub exist_ok: bool,

    /// 标注字体 (TTF),默认使用缓存/下载的 Arial
    #[arg(long)]
    pub font: Option<PathBuf>,

    /// 打印每个模型的预处理/推理/后处理耗时
    #[arg(long)]
    pub profile: bool,
}

impl Args {
    /// 由 --device/--trt 推出执行后端
    pub fn execution_provider(&self) -> Result<OrtEP, DetectError> {
        let device = self.device.trim().to_lowercase();
        if device == "cpu" {
            if self.trt {
                return Err(DetectError::InvalidDevice(
                    "--trt 需要 CUDA 设备".to_string(),
                ));
            }
            return Ok(OrtEP::CPU);
        }

        let device_id = if device.is_empty() {
            0
        } else {
            // 多卡写法 0,1,2 只取第一张
            let first = device.split(',').next().unwrap_or_default().trim();
            first
                .parse::<i32>()
                .map_err(|_| DetectError::InvalidDevice(self.device.clone()))?
        };

        Ok(if self.trt {
            OrtEP::Trt(device_id)
        } else {
            OrtEP::CUDA(device_id)
        })
    }

    /// 是否保存图片/视频 (流列表 .txt 时同样不保存)
    pub fn save_img(&self) -> bool {
        !self.nosave && !self.source.ends_with(".txt")
    }

    /// 类别过滤, 空列表视为不过滤
    pub fn class_filter(&self) -> Option<&[usize]> {
        self.classes.as_deref().filter(|c| !c.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["detect"]);
        assert_eq!(args.weights1, "yolov7_1.onnx");
        assert_eq!(args.weights2, "yolov7_2.onnx");
        assert_eq!(args.source, "inference/images");
        assert_eq!(args.img_size, 640);
        assert!((args.conf_thres - 0.25).abs() < f32::EPSILON);
        assert!((args.iou_thres - 0.45).abs() < f32::EPSILON);
        assert_eq!(args.project, PathBuf::from("runs/detect"));
        assert_eq!(args.name, "exp");
        assert!(args.save_img());
        assert!(args.class_filter().is_none());
    }

    #[test]
    fn test_classes_and_flags() {
        let args = Args::parse_from([
            "detect",
            "--classes",
            "0",
            "2",
            "--agnostic-nms",
            "--save-txt",
            "--save-conf",
            "--img-size",
            "320",
        ]);
        assert_eq!(args.class_filter(), Some(&[0usize, 2][..]));
        assert!(args.agnostic_nms);
        assert!(args.save_txt && args.save_conf);
        assert_eq!(args.img_size, 320);
    }

    #[test]
    fn test_stream_list_disables_saving() {
        let args = Args::parse_from(["detect", "--source", "streams.txt"]);
        assert!(!args.save_img());
        let args = Args::parse_from(["detect", "--nosave"]);
        assert!(!args.save_img());
    }

    #[test]
    fn test_execution_provider() {
        let args = Args::parse_from(["detect", "--device", "cpu"]);
        assert_eq!(args.execution_provider().unwrap(), OrtEP::CPU);

        let args = Args::parse_from(["detect"]);
        assert_eq!(args.execution_provider().unwrap(), OrtEP::CUDA(0));

        let args = Args::parse_from(["detect", "--device", "1,2"]);
        assert_eq!(args.execution_provider().unwrap(), OrtEP::CUDA(1));

        let args = Args::parse_from(["detect", "--device", "0", "--trt"]);
        assert_eq!(args.execution_provider().unwrap(), OrtEP::Trt(0));

        let args = Args::parse_from(["detect", "--device", "gpu"]);
        assert!(args.execution_provider().is_err());

        let args = Args::parse_from(["detect", "--device", "cpu", "--trt"]);
        assert!(args.execution_provider().is_err());
    }
}
