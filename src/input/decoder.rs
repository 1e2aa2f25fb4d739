// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// FFmpeg 解码器
///
/// 视频文件 / 网络流 / 本地摄像头 统一由 ez-ffmpeg 解码, 在独立线程中运行,
/// 通过 `DecodeFilter` 把 RGB 帧送入 crossbeam 通道。
use super::decode_filter::{DecodeFilter, DecodedFrame};
use crate::DetectError;
use anyhow::Result;
use crossbeam_channel::Sender;
use ez_ffmpeg::core::context::null_output::create_null_output;
use ez_ffmpeg::filter::frame_pipeline_builder::FramePipelineBuilder;
use ez_ffmpeg::stream_info::{find_video_stream_info, StreamInfo};
use ez_ffmpeg::{AVMediaType, FfmpegContext, Input};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{error, info, warn};

/// 摄像头打开失败时的重试次数
const CAMERA_RETRIES: usize = 3;

/// 输入类型
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputKind {
    /// 本地视频文件 (不丢帧)
    File,
    /// rtsp / rtmp / http 流
    Network,
    /// 本地摄像头序号
    Camera(usize),
}

/// 视频元信息
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
    pub fps: f64,
    /// 文件总帧数 (流为 None)
    pub frames: Option<usize>,
}

/// 读取视频帧率/总帧数, 失败时返回 None
pub fn read_video_info(url: &str) -> Option<VideoInfo> {
    match find_video_stream_info(url) {
        Ok(Some(StreamInfo::Video { fps, nb_frames, .. })) => Some(VideoInfo {
            fps,
            frames: (nb_frames > 0).then_some(nb_frames as usize),
        }),
        Ok(_) => {
            warn!("⚠️ 未找到视频流: {}", url);
            None
        }
        Err(e) => {
            warn!("⚠️ 读取视频信息失败 {}: {}", url, e);
            None
        }
    }
}

/// 解码器
pub struct Decoder {
    url: String,
    kind: InputKind,
    stream: usize,
}

impl Decoder {
    pub fn new(url: impl Into<String>, kind: InputKind, stream: usize) -> Self {
        Self {
            url: url.into(),
            kind,
            stream,
        }
    }

    /// 在后台线程中解码, 通道关闭即结束
    pub fn spawn(self, tx: Sender<DecodedFrame>) -> JoinHandle<Result<()>> {
        std::thread::spawn(move || {
            let result = self.run(tx);
            if let Err(e) = &result {
                error!("❌ 解码失败 (#{}): {}", self.stream, e);
            }
            result
        })
    }

    /// 阻塞解码直到输入结束
    pub fn run(&self, tx: Sender<DecodedFrame>) -> Result<()> {
        let url = self.input_url()?;
        info!("🎬 解码器启动 (#{}): {} [{:?}]", self.stream, url, self.kind);

        let retries = match self.kind {
            InputKind::Camera(_) => CAMERA_RETRIES,
            _ => 1,
        };

        let mut attempt = 0;
        let ctx = loop {
            attempt += 1;
            let blocking = self.kind == InputKind::File;
            let filter = DecodeFilter::new(tx.clone(), self.stream, blocking);

            // 构建帧处理管线
            let pipe: FramePipelineBuilder = AVMediaType::AVMEDIA_TYPE_VIDEO.into();
            let pipe = pipe.filter("decode", Box::new(filter));
            let out = create_null_output().add_frame_pipeline(pipe);

            let built = FfmpegContext::builder()
                .input(self.input(&url))
                .filter_descs(["format=rgb24"].into())
                .output(out)
                .build();

            match built {
                Ok(ctx) => break ctx,
                Err(e) if attempt < retries => {
                    warn!(
                        "⚠️ 输入忙或无法打开, 1秒后重试... ({}/{}): {}",
                        attempt, retries, e
                    );
                    std::thread::sleep(Duration::from_secs(1));
                }
                Err(e) => {
                    return Err(DetectError::Decoder(format!("构建失败 {}: {}", url, e)).into())
                }
            }
        };

        let sch = ctx
            .start()
            .map_err(|e| DetectError::Decoder(format!("启动失败 {}: {}", url, e)))?;
        // 接收端提前关闭时 ffmpeg 以错误结束, 属于正常退出
        if let Err(e) = sch.wait() {
            warn!("⚠️ 解码结束 (#{}): {}", self.stream, e);
        }
        info!("✅ 解码线程正常退出 (#{})", self.stream);
        Ok(())
    }

    /// 按输入类型配置 ffmpeg 输入
    fn input(&self, url: &str) -> Input {
        match self.kind {
            InputKind::File => Input::new(url),
            InputKind::Network => {
                let input = Input::new(url);
                if url.to_ascii_lowercase().starts_with("rtsp://") {
                    input.set_input_opts(
                        [
                            ("rtsp_transport", "tcp"),
                            ("buffer_size", "67108864"),
                            ("rtsp_flags", "prefer_tcp"),
                        ]
                        .into(),
                    )
                } else {
                    input
                }
            }
            InputKind::Camera(_) => Input::new(url).set_format(camera_format()),
        }
    }

    fn input_url(&self) -> Result<String> {
        match self.kind {
            InputKind::Camera(index) => camera_url(index),
            _ => Ok(self.url.clone()),
        }
    }
}

/// 摄像头输入格式 - 根据平台选择
fn camera_format() -> &'static str {
    #[cfg(target_os = "windows")]
    {
        "dshow" // DirectShow
    }
    #[cfg(target_os = "macos")]
    {
        "avfoundation" // AVFoundation
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        "v4l2" // Video4Linux2
    }
}

/// 格式化摄像头URL - 根据平台选择
fn camera_url(index: usize) -> Result<String> {
    #[cfg(target_os = "windows")]
    {
        // dshow 需要设备名称
        let devices = ez_ffmpeg::device::get_input_video_devices()
            .map_err(|e| DetectError::Decoder(format!("枚举摄像头失败: {}", e)))?;
        for (i, name) in devices.iter().enumerate() {
            info!("   [{}] {}", i, name);
        }
        let name = devices
            .get(index)
            .ok_or_else(|| DetectError::Decoder(format!("摄像头 {} 不存在", index)))?;
        Ok(format!("video={}", name))
    }
    #[cfg(target_os = "macos")]
    {
        Ok(format!("{}", index))
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        Ok(format!("/dev/video{}", index))
    }
}
