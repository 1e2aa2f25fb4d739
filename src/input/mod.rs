/// 输入系统 (Input System)
///
/// - Source:       输入源识别 (文件/目录/摄像头/网络流)
/// - FrameReader:  逐帧迭代, 图片直接解码, 视频/流交给后台解码线程
/// - Decoder:      ez-ffmpeg 解码线程 (文件/RTSP/摄像头)
/// - DecodeFilter: 帧过滤, 转 RGB 送入通道
pub mod decode_filter;
pub mod decoder;
pub mod reader;
pub mod source;

pub use decode_filter::{DecodeFilter, DecodedFrame};
pub use decoder::{read_video_info, Decoder, InputKind, VideoInfo};
pub use reader::{Frame, FrameReader, Mode};
pub use source::{is_image, is_video, ImageLoader, Source, IMG_FORMATS, VID_FORMATS};
