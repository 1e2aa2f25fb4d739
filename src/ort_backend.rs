// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! ONNX Runtime 推理后端
//!
//! 负责: 会话构建(执行后端选择)、输入输出信息、模型元数据(names/stride)解析、
//! 单批次推理(自动处理 fp16 输入输出)。

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use half::f16;
use ndarray::{Array, IxDyn};
use once_cell::sync::Lazy;
use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, ExecutionProviderDispatch,
    TensorRTExecutionProvider,
};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::tensor::TensorElementType;
use ort::value::{Tensor, ValueType};
use regex::Regex;
use tracing::{info, warn};

/// 默认 stride (元数据缺失时)
pub const DEFAULT_STRIDE: u32 = 32;

/// 动态输入尺寸时的默认推理尺寸
pub const DEFAULT_IMAGE_SIZE: u32 = 640;

/// 执行后端
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrtEP {
    CPU,
    CUDA(i32),
    Trt(i32),
}

/// 构建参数
#[derive(Debug, Clone)]
pub struct OrtConfig {
    pub f: String,
    pub ep: OrtEP,
    pub trt_fp16: bool,
    /// (height, width), 仅在模型输入为动态尺寸时生效
    pub image_size: (Option<u32>, Option<u32>),
}

pub struct OrtBackend {
    session: Session,
    ep: OrtEP,
    input_name: String,
    input_dtype: TensorElementType,
    output_names: Vec<String>,
    output_shape: Vec<i64>,
    batch_dynamic: bool,
    height: u32,
    height_dynamic: bool,
    width: u32,
    width_dynamic: bool,
    names: Option<Vec<String>>,
    stride: u32,
    author: Option<String>,
    version: Option<String>,
}

impl OrtBackend {
    pub fn build(args: OrtConfig) -> Result<Self> {
        let path = Path::new(&args.f);
        if !path.exists() {
            return Err(crate::DetectError::ModelNotFound(path.to_path_buf()).into());
        }

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_execution_providers(Self::providers(args.ep, args.trt_fp16))?
            .commit_from_file(path)
            .with_context(|| format!("模型加载失败: {}", args.f))?;

        // 输入: [batch, 3, height, width]
        let input = session
            .inputs
            .first()
            .with_context(|| format!("模型没有输入: {}", args.f))?;
        let input_name = input.name.clone();
        let (input_dtype, input_shape) = match &input.input_type {
            ValueType::Tensor { ty, shape, .. } => {
                (*ty, shape.iter().copied().collect::<Vec<i64>>())
            }
            other => anyhow::bail!("不支持的模型输入类型: {:?}", other),
        };
        if input_shape.len() != 4 {
            anyhow::bail!("模型输入应为4维 NCHW, 实际: {:?}", input_shape);
        }

        let batch_dynamic = input_shape[0] <= 0;
        let (height, height_dynamic) =
            Self::resolve_dim(input_shape[2], args.image_size.0, "height");
        let (width, width_dynamic) = Self::resolve_dim(input_shape[3], args.image_size.1, "width");

        // 输出
        let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();
        let output_shape = session
            .outputs
            .first()
            .and_then(|o| match &o.output_type {
                ValueType::Tensor { shape, .. } => Some(shape.iter().copied().collect()),
                _ => None,
            })
            .unwrap_or_default();

        // 元数据
        let (names, stride, author, version) = {
            let metadata = session.metadata()?;
            let names = metadata
                .custom("names")?
                .map(|s| parse_names(&s))
                .filter(|n| !n.is_empty());
            let stride = metadata
                .custom("stride")?
                .and_then(|s| parse_stride(&s))
                .unwrap_or(DEFAULT_STRIDE);
            let author = metadata.custom("author")?;
            let version = metadata.custom("version")?;
            (names, stride, author, version)
        };

        info!(
            "✅ 模型加载成功: {} (输入 {} {:?}, stride {})",
            args.f, input_name, input_shape, stride
        );

        Ok(Self {
            session,
            ep: args.ep,
            input_name,
            input_dtype,
            output_names,
            output_shape,
            batch_dynamic,
            height,
            height_dynamic,
            width,
            width_dynamic,
            names,
            stride,
            author,
            version,
        })
    }

    fn providers(ep: OrtEP, trt_fp16: bool) -> Vec<ExecutionProviderDispatch> {
        // 注册失败时 ORT 会自动回退到 CPU
        match ep {
            OrtEP::CPU => vec![CPUExecutionProvider::default().build()],
            OrtEP::CUDA(id) => vec![
                CUDAExecutionProvider::default().with_device_id(id).build(),
                CPUExecutionProvider::default().build(),
            ],
            OrtEP::Trt(id) => vec![
                TensorRTExecutionProvider::default()
                    .with_device_id(id)
                    .with_fp16(trt_fp16)
                    .build(),
                CUDAExecutionProvider::default().with_device_id(id).build(),
                CPUExecutionProvider::default().build(),
            ],
        }
    }

    fn resolve_dim(dim: i64, requested: Option<u32>, what: &str) -> (u32, bool) {
        if dim > 0 {
            let dim = dim as u32;
            if let Some(r) = requested {
                if r != dim {
                    warn!("⚠️ 模型输入 {} 固定为 {}, 忽略请求的 {}", what, dim, r);
                }
            }
            (dim, false)
        } else {
            (requested.unwrap_or(DEFAULT_IMAGE_SIZE), true)
        }
    }

    /// 推理一个批次, 输入为 NCHW f32
    pub fn run(&mut self, xs: Array<f32, IxDyn>, profile: bool) -> Result<Vec<Array<f32, IxDyn>>> {
        let shape: [usize; 4] = xs.shape().try_into()?;
        let t = Instant::now();

        let outputs = match self.input_dtype {
            TensorElementType::Float16 => {
                let data: Vec<f16> = xs.iter().map(|x| f16::from_f32(*x)).collect();
                let tensor = Tensor::from_array((shape, data.into_boxed_slice()))?;
                self.session.run(ort::inputs![self.input_name.as_str() => tensor])?
            }
            _ => {
                let data: Vec<f32> = xs.iter().copied().collect();
                let tensor = Tensor::from_array((shape, data.into_boxed_slice()))?;
                self.session.run(ort::inputs![self.input_name.as_str() => tensor])?
            }
        };

        let mut ys = Vec::with_capacity(self.output_names.len());
        for name in self.output_names.iter() {
            let value = &outputs[name.as_str()];
            let y = match value.try_extract_array::<f32>() {
                Ok(y) => y.into_owned(),
                Err(_) => value
                    .try_extract_array::<f16>()
                    .with_context(|| format!("无法读取输出 {}", name))?
                    .mapv(f16::to_f32),
            };
            ys.push(y);
        }

        if profile {
            info!("[ORT run] {:?}: {:?}", self.ep, t.elapsed());
        }
        Ok(ys)
    }

    pub fn ep(&self) -> &OrtEP {
        &self.ep
    }

    pub fn dtype(&self) -> TensorElementType {
        self.input_dtype
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn is_batch_dynamic(&self) -> bool {
        self.batch_dynamic
    }

    pub fn is_height_dynamic(&self) -> bool {
        self.height_dynamic
    }

    pub fn is_width_dynamic(&self) -> bool {
        self.width_dynamic
    }

    /// 第一个输出的静态形状 (动态维度为 -1)
    pub fn output_shape(&self) -> &[i64] {
        &self.output_shape
    }

    pub fn names(&self) -> Option<Vec<String>> {
        self.names.clone()
    }

    pub fn nc(&self) -> Option<usize> {
        self.names.as_ref().map(|n| n.len())
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn author(&self) -> Option<&str> {
        self.author.as_deref()
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }
}

static INDEXED_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(\d+)\s*:\s*['"]([^'"]*)['"]"#).unwrap());
static QUOTED_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r#"['"]([^'"]*)['"]"#).unwrap());
static INTEGER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());

/// 解析 names 元数据
///
/// 支持 `{0: 'person', 1: 'tag'}` 与 `['person', 'tag']` 两种写法。
pub fn parse_names(s: &str) -> Vec<String> {
    let mut pairs: Vec<(usize, String)> = INDEXED_NAME
        .captures_iter(s)
        .filter_map(|c| Some((c[1].parse().ok()?, c[2].to_string())))
        .collect();
    if !pairs.is_empty() {
        pairs.sort_by_key(|(i, _)| *i);
        return pairs.into_iter().map(|(_, n)| n).collect();
    }

    QUOTED_NAME.captures_iter(s).map(|c| c[1].to_string()).collect()
}

/// 解析 stride 元数据, `32` 或 `[8, 16, 32]` 取最大值
pub fn parse_stride(s: &str) -> Option<u32> {
    INTEGER.find_iter(s).filter_map(|m| m.as_str().parse().ok()).max()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_model_file() {
        let err = OrtBackend::build(OrtConfig {
            f: "/no/such/yolov7_1.onnx".to_string(),
            ep: OrtEP::CPU,
            trt_fp16: false,
            image_size: (Some(640), Some(640)),
        })
        .err()
        .unwrap();
        assert!(matches!(
            err.downcast_ref::<crate::DetectError>(),
            Some(crate::DetectError::ModelNotFound(_))
        ));
        assert!(err.to_string().contains("模型文件不存在"));
    }

    #[test]
    fn test_parse_names_dict() {
        let names = parse_names("{1: 'name tag', 0: 'person'}");
        assert_eq!(names, vec!["person".to_string(), "name tag".to_string()]);
    }

    #[test]
    fn test_parse_names_list() {
        let names = parse_names(r#"["person", "tag"]"#);
        assert_eq!(names, vec!["person".to_string(), "tag".to_string()]);
    }

    #[test]
    fn test_parse_names_garbage() {
        assert!(parse_names("none").is_empty());
    }

    #[test]
    fn test_parse_stride() {
        assert_eq!(parse_stride("32"), Some(32));
        assert_eq!(parse_stride("[8, 16, 32, 64]"), Some(64));
        assert_eq!(parse_stride(""), None);
    }

    #[test]
    fn test_resolve_dim() {
        assert_eq!(OrtBackend::resolve_dim(640, Some(320), "height"), (640, false));
        assert_eq!(OrtBackend::resolve_dim(-1, Some(320), "height"), (320, true));
        assert_eq!(
            OrtBackend::resolve_dim(-1, None, "width"),
            (DEFAULT_IMAGE_SIZE, true)
        );
    }
}
