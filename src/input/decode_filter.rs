// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// FFmpeg解码过滤器模块
///
/// 解码线程中运行: RGB24 帧 → `RgbImage` → crossbeam 通道
use crossbeam_channel::{Sender, TrySendError};
use ez_ffmpeg::filter::frame_filter::FrameFilter;
use ez_ffmpeg::filter::frame_filter_context::FrameFilterContext;
use ez_ffmpeg::{AVMediaType, Frame};
use image::RgbImage;
use std::time::Instant;
use tracing::{debug, info, warn};

/// 已解码帧 (解码线程 → 主线程)
pub struct DecodedFrame {
    /// 来源序号 (多路流时区分)
    pub stream: usize,
    pub image: RgbImage,
}

/// FFmpeg解码过滤器: 视频/流 → RGB帧
///
/// 前级滤镜需为 `format=rgb24`。
pub struct DecodeFilter {
    tx: Sender<DecodedFrame>,
    stream: usize,
    /// 文件: 阻塞发送, 不丢帧; 实时流: 队列满时丢帧
    blocking: bool,
    pub count: usize,
    pub last: Instant,
    pub current_fps: f64,
    pub dropped_frames: usize,
    pub total_frames: usize,
}

impl DecodeFilter {
    pub fn new(tx: Sender<DecodedFrame>, stream: usize, blocking: bool) -> Self {
        Self {
            tx,
            stream,
            blocking,
            count: 0,
            last: Instant::now(),
            current_fps: 0.0,
            dropped_frames: 0,
            total_frames: 0,
        }
    }

    /// 按行拷贝 RGB24 平面 (去掉行尾对齐)
    fn copy_rgb24(data: &[u8], stride: usize, width: usize, height: usize) -> Option<Vec<u8>> {
        let row = width * 3;
        if stride < row || data.len() < stride * (height - 1) + row {
            return None;
        }
        let mut rgb = Vec::with_capacity(row * height);
        for y in 0..height {
            rgb.extend_from_slice(&data[y * stride..y * stride + row]);
        }
        Some(rgb)
    }
}

impl FrameFilter for DecodeFilter {
    fn media_type(&self) -> AVMediaType {
        AVMediaType::AVMEDIA_TYPE_VIDEO
    }

    fn init(&mut self, _ctx: &FrameFilterContext) -> Result<(), String> {
        info!("✅ 解码线程启动 (#{})", self.stream);
        Ok(())
    }

    fn filter_frame(
        &mut self,
        frame: Frame,
        _ctx: &FrameFilterContext,
    ) -> Result<Option<Frame>, String> {
        self.total_frames += 1;

        // SAFETY: 只读访问 FFmpeg 持有的 AVFrame, 读取范围由 linesize × height 约束
        let image = unsafe {
            if frame.as_ptr().is_null() || frame.is_empty() || frame.is_corrupt() {
                self.dropped_frames += 1;
                return Ok(None);
            }

            let av = &*frame.as_ptr();
            let (w, h) = (av.width, av.height);
            let stride = av.linesize[0];
            if w <= 0 || h <= 0 || stride <= 0 || av.data[0].is_null() {
                self.dropped_frames += 1;
                warn!("⚠️ 丢弃帧 #{}: 非法帧 {}x{}", self.total_frames, w, h);
                return Ok(None);
            }

            let (w, h, stride) = (w as usize, h as usize, stride as usize);
            let plane = std::slice::from_raw_parts(av.data[0], stride * h);
            let Some(rgb) = Self::copy_rgb24(plane, stride, w, h) else {
                self.dropped_frames += 1;
                warn!("⚠️ 丢弃帧 #{}: 步长异常 {}", self.total_frames, stride);
                return Ok(None);
            };
            RgbImage::from_raw(w as u32, h as u32, rgb)
        };

        let Some(image) = image else {
            self.dropped_frames += 1;
            return Ok(None);
        };

        let decoded = DecodedFrame {
            stream: self.stream,
            image,
        };
        if self.blocking {
            self.tx
                .send(decoded)
                .map_err(|_| "frame receiver dropped".to_string())?;
        } else {
            match self.tx.try_send(decoded) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => self.dropped_frames += 1,
                Err(TrySendError::Disconnected(_)) => {
                    return Err("frame receiver dropped".to_string())
                }
            }
        }

        // 计算FPS
        self.count += 1;
        if self.last.elapsed().as_secs_f64() >= 1.0 {
            let elapsed = self.last.elapsed().as_secs_f64();
            self.current_fps = self.count as f64 / elapsed;
            debug!(
                "📺 解码统计 #{}: {:.1}fps | 总帧{} | 丢弃{}",
                self.stream, self.current_fps, self.total_frames, self.dropped_frames
            );
            self.last = Instant::now();
            self.count = 0;
        }

        Ok(Some(frame))
    }

    fn uninit(&mut self, _ctx: &FrameFilterContext) {
        info!(
            "✅ 解码线程退出 (#{}): 总帧{} | 丢弃{}",
            self.stream, self.total_frames, self.dropped_frames
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_rgb24_strips_padding() {
        // 2x2, 每行 8 字节 (6 字节像素 + 2 字节对齐)
        let data = [
            1, 2, 3, 4, 5, 6, 0, 0, //
            7, 8, 9, 10, 11, 12, 0, 0,
        ];
        let rgb = DecodeFilter::copy_rgb24(&data, 8, 2, 2).unwrap();
        assert_eq!(rgb, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
    }

    #[test]
    fn test_copy_rgb24_rejects_short_stride() {
        let data = [0u8; 16];
        assert!(DecodeFilter::copy_rgb24(&data, 4, 2, 2).is_none());
        assert!(DecodeFilter::copy_rgb24(&data[..10], 8, 2, 2).is_none());
    }
}
