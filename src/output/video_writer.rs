// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 视频写入: RGB 帧 → rawvideo 读回调 → ez-ffmpeg 编码 (MPEG-4 Part 2)

use std::path::{Path, PathBuf};
use std::thread::JoinHandle;

use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use ez_ffmpeg::{FfmpegContext, Input, Output};
use image::RgbImage;
use tracing::{info, warn};

use crate::DetectError;

/// 流输出的默认帧率
pub const DEFAULT_FPS: f64 = 30.0;
/// 编码器: mp4v
pub const VIDEO_CODEC: &str = "mpeg4";

/// AVERROR_EOF
const AVERROR_EOF: i32 = -541478725;
const QUEUE: usize = 16;

pub struct VideoWriter {
    path: PathBuf,
    width: u32,
    height: u32,
    frames: usize,
    tx: Option<Sender<Vec<u8>>>,
    handle: Option<JoinHandle<Result<()>>>,
}

impl VideoWriter {
    /// 启动编码线程
    pub fn new(path: &Path, fps: f64, width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(DetectError::VideoWriter(format!("非法尺寸 {}x{}", width, height)).into());
        }
        let fps = if fps.is_finite() && fps > 0.0 { fps } else { DEFAULT_FPS };

        let (tx, rx) = bounded::<Vec<u8>>(QUEUE);
        let out = path.to_string_lossy().to_string();
        let handle = std::thread::spawn(move || encode(rx, out, fps, width, height));
        info!(
            "🎞️ 视频写入: {} ({}x{} @ {:.2}fps)",
            path.display(),
            width,
            height,
            fps
        );

        Ok(Self {
            path: path.to_path_buf(),
            width,
            height,
            frames: 0,
            tx: Some(tx),
            handle: Some(handle),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 写入一帧, 尺寸必须与创建时一致
    pub fn write(&mut self, img: &RgbImage) -> Result<()> {
        if img.dimensions() != (self.width, self.height) {
            return Err(DetectError::VideoWriter(format!(
                "帧尺寸 {:?} 与视频 {}x{} 不一致",
                img.dimensions(),
                self.width,
                self.height
            ))
            .into());
        }
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| DetectError::VideoWriter("writer already finished".into()))?;
        if tx.send(img.as_raw().clone()).is_err() {
            // 编码线程已退出, 取回错误
            self.tx = None;
            return Err(self.join().err().unwrap_or_else(|| {
                DetectError::VideoWriter(format!("encoder stopped: {}", self.path.display())).into()
            }));
        }
        self.frames += 1;
        Ok(())
    }

    /// 结束写入并等待编码完成
    pub fn finish(mut self) -> Result<()> {
        self.tx = None;
        self.join()?;
        info!("✅ 视频已保存: {} ({} 帧)", self.path.display(), self.frames);
        Ok(())
    }

    fn join(&mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| anyhow!("video encoder thread panicked"))?,
            None => Ok(()),
        }
    }
}

impl Drop for VideoWriter {
    fn drop(&mut self) {
        self.tx = None;
        if let Err(e) = self.join() {
            warn!("⚠️ 视频写入失败 {}: {}", self.path.display(), e);
        }
    }
}

/// 编码线程: 从通道读帧, 通道关闭即 EOF
fn encode(rx: Receiver<Vec<u8>>, out: String, fps: f64, width: u32, height: u32) -> Result<()> {
    let mut pending: Vec<u8> = Vec::new();
    let mut offset = 0usize;
    let read = move |buf: &mut [u8]| -> i32 {
        if offset >= pending.len() {
            match rx.recv() {
                Ok(frame) => {
                    pending = frame;
                    offset = 0;
                }
                Err(_) => return AVERROR_EOF,
            }
        }
        let n = (pending.len() - offset).min(buf.len());
        buf[..n].copy_from_slice(&pending[offset..offset + n]);
        offset += n;
        n as i32
    };

    let size = format!("{}x{}", width, height);
    let rate = format!("{}", fps);
    let input = Input::new_by_read_callback(read)
        .set_format("rawvideo")
        .set_input_opts(
            [
                ("video_size", size.as_str()),
                ("pixel_format", "rgb24"),
                ("framerate", rate.as_str()),
            ]
            .into(),
        );
    let output = Output::from(out.as_str()).set_video_codec(VIDEO_CODEC);

    let ctx = FfmpegContext::builder()
        .input(input)
        .output(output)
        .build()
        .map_err(|e| DetectError::VideoWriter(format!("构建失败 {}: {}", out, e)))?;
    let sch = ctx
        .start()
        .map_err(|e| DetectError::VideoWriter(format!("启动失败 {}: {}", out, e)))?;
    sch.wait()
        .map_err(|e| DetectError::VideoWriter(format!("编码失败 {}: {}", out, e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_empty_size() {
        let tmp = tempfile::tempdir().unwrap();
        let err = VideoWriter::new(&tmp.path().join("a.mp4"), 30.0, 0, 10).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<DetectError>(),
            Some(DetectError::VideoWriter(_))
        ));
    }
}
