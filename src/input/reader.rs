// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 帧迭代器: 依次产出图片、视频帧、流帧

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;

use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, Receiver};
use image::RgbImage;
use tracing::{info, warn};

use super::decode_filter::DecodedFrame;
use super::decoder::{read_video_info, Decoder, InputKind};
use super::source::{is_video, ImageLoader, Source};

/// 文件解码队列 (阻塞发送)
const FILE_QUEUE: usize = 8;
/// 实时流队列 (满时丢帧)
const STREAM_QUEUE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Image,
    Video,
    Stream,
}

/// 一帧输入
#[derive(Debug, Clone)]
pub struct Frame {
    /// 文件路径或流地址
    pub path: String,
    pub mode: Mode,
    /// 文件序号 (从 1 开始) 或流序号 (从 0 开始)
    pub index: usize,
    /// 文件总数 / 流路数
    pub count: usize,
    /// 当前视频/流的帧序号 (从 1 开始), 图片为 0
    pub frame: usize,
    /// 视频总帧数
    pub frames: Option<usize>,
    pub fps: Option<f64>,
    pub image: RgbImage,
}

impl Frame {
    /// 日志前缀
    pub fn prefix(&self) -> String {
        match self.mode {
            Mode::Image => format!("image {}/{} {}: ", self.index, self.count, self.path),
            Mode::Video => format!(
                "video {}/{} ({}/{}) {}: ",
                self.index,
                self.count,
                self.frame,
                self.frames.map_or_else(|| "?".to_string(), |n| n.to_string()),
                self.path
            ),
            Mode::Stream => format!("{}: ", self.index),
        }
    }

    /// 输出文件名: 路径最后一段, 流地址无法取名时用序号
    pub fn file_name(&self) -> String {
        Path::new(&self.path)
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("stream{}", self.index))
    }

    /// 标签文件名主干
    pub fn stem(&self) -> String {
        let name = self.file_name();
        Path::new(&name)
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_string)
            .unwrap_or(name)
    }
}

/// 正在解码的视频或流
struct Active {
    rx: Receiver<DecodedFrame>,
    handles: Vec<JoinHandle<Result<()>>>,
    /// 每路一个: (地址, 已产出帧数)
    paths: Vec<(String, usize)>,
    mode: Mode,
    index: usize,
    frames: Option<usize>,
    fps: Option<f64>,
}

impl Active {
    /// 通道关闭后回收解码线程, 返回第一个错误
    fn join(self) -> Result<()> {
        drop(self.rx);
        let mut first = None;
        for handle in self.handles {
            let result = handle
                .join()
                .map_err(|_| anyhow!("decoder thread panicked"))
                .and_then(|r| r);
            if let Err(e) = result {
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }
}

pub struct FrameReader {
    files: VecDeque<PathBuf>,
    count: usize,
    /// 已处理文件数
    seen: usize,
    active: Option<Active>,
}

impl FrameReader {
    pub fn new(source: &Source) -> Result<Self> {
        match source {
            Source::Images(path) => {
                let loader = ImageLoader::new(path)?;
                Ok(Self {
                    count: loader.total(),
                    files: loader.files().cloned().collect(),
                    seen: 0,
                    active: None,
                })
            }
            Source::Camera(index) => Ok(Self::streams(&[index.to_string()])),
            Source::Streams(urls) => Ok(Self::streams(urls)),
        }
    }

    /// 每路流一个解码线程, 共用一个有界通道
    fn streams(urls: &[String]) -> Self {
        let (tx, rx) = bounded(STREAM_QUEUE);
        let handles = urls
            .iter()
            .enumerate()
            .map(|(i, url)| {
                let kind = match url.parse::<usize>() {
                    Ok(index) => InputKind::Camera(index),
                    Err(_) => InputKind::Network,
                };
                info!("{}/{}: {}...", i + 1, urls.len(), url);
                Decoder::new(url.clone(), kind, i).spawn(tx.clone())
            })
            .collect();

        Self {
            files: VecDeque::new(),
            count: urls.len(),
            seen: 0,
            active: Some(Active {
                rx,
                handles,
                paths: urls.iter().map(|u| (u.clone(), 0)).collect(),
                mode: Mode::Stream,
                index: 0,
                frames: None,
                fps: None,
            }),
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    fn start_video(&mut self, path: &Path) -> Active {
        let url = path.to_string_lossy().to_string();
        let info = read_video_info(&url);
        let (tx, rx) = bounded(FILE_QUEUE);
        let handle = Decoder::new(url.clone(), InputKind::File, 0).spawn(tx);
        Active {
            rx,
            handles: vec![handle],
            paths: vec![(url, 0)],
            mode: Mode::Video,
            index: self.seen,
            frames: info.and_then(|i| i.frames),
            fps: info.map(|i| i.fps).filter(|f| *f > 0.0),
        }
    }

    fn load_image(&self, path: &Path) -> Result<Frame> {
        let image = image::open(path)
            .map_err(|e| anyhow!("Failed to open image {}: {}", path.display(), e))?
            .to_rgb8();
        Ok(Frame {
            path: path.to_string_lossy().to_string(),
            mode: Mode::Image,
            index: self.seen,
            count: self.count,
            frame: 0,
            frames: None,
            fps: None,
            image,
        })
    }
}

impl Iterator for FrameReader {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(active) = self.active.as_mut() {
                if let Ok(decoded) = active.rx.recv() {
                    let Some((path, frame)) = active.paths.get_mut(decoded.stream) else {
                        warn!("⚠️ 未知流序号 {}", decoded.stream);
                        continue;
                    };
                    *frame += 1;
                    let index = match active.mode {
                        Mode::Stream => decoded.stream,
                        _ => active.index,
                    };
                    return Some(Ok(Frame {
                        path: path.clone(),
                        mode: active.mode,
                        index,
                        count: self.count,
                        frame: *frame,
                        frames: active.frames,
                        fps: active.fps,
                        image: decoded.image,
                    }));
                }

                // 所有发送端关闭: 当前视频/流结束
                if let Some(active) = self.active.take() {
                    if let Err(e) = active.join() {
                        return Some(Err(e));
                    }
                }
                continue;
            }

            let path = self.files.pop_front()?;
            self.seen += 1;
            if is_video(&path) {
                self.active = Some(self.start_video(&path));
                continue;
            }
            return Some(self.load_image(&path));
        }
    }
}
