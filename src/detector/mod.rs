mod onnx;

use std::path::{Path, PathBuf};

use image::RgbImage;
use thiserror::Error;

pub use self::onnx::OnnxHandDetector;

/// 每只手的关键点数量，下标 0 为手腕
pub const NUM_KEYPOINTS: usize = 21;

/// 单个关键点的三维坐标 `[x, y, z]`
pub type Keypoint = [f32; 3];

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("无法读取图片 {path}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("关键点推理失败")]
    Inference(#[source] anyhow::Error),
}

/// 检测到的一只手
#[derive(Debug, Clone, PartialEq)]
pub struct Hand {
    keypoints: [Keypoint; NUM_KEYPOINTS],
}

impl Hand {
    pub fn new(keypoints: [Keypoint; NUM_KEYPOINTS]) -> Self {
        Self { keypoints }
    }

    pub fn keypoints(&self) -> &[Keypoint; NUM_KEYPOINTS] {
        &self.keypoints
    }
}

/// 一张图片的检测结果，可能不包含任何手
///
/// 没有检测到手是正常结果，而不是错误
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Detection {
    hands: Vec<Hand>,
}

impl Detection {
    pub fn new(hands: Vec<Hand>) -> Self {
        Self { hands }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn has_hand(&self) -> bool {
        !self.hands.is_empty()
    }

    /// 返回第一只检测到的手
    pub fn first(&self) -> Option<&Hand> {
        self.hands.first()
    }
}

/// 手部关键点检测器
///
/// 检测器通常带有内部状态（已加载的网络、输入缓冲区等），构造代价较高，
/// 因此每个工作线程只持有一个实例，并在处理的所有图片之间复用。
pub trait HandDetector {
    /// 对已解码的 RGB 图片进行检测
    fn detect(&mut self, image: &RgbImage) -> Result<Detection, DetectError>;

    /// 读取并检测一张图片，像素数据在检测结束后立刻释放
    fn detect_path(&mut self, path: &Path) -> Result<Detection, DetectError> {
        let image = load_rgb(path)?;
        self.detect(&image)
    }
}

impl<D: HandDetector + ?Sized> HandDetector for Box<D> {
    fn detect(&mut self, image: &RgbImage) -> Result<Detection, DetectError> {
        (**self).detect(image)
    }

    fn detect_path(&mut self, path: &Path) -> Result<Detection, DetectError> {
        (**self).detect_path(path)
    }
}

/// 解码图片文件为 RGB8
pub fn load_rgb(path: &Path) -> Result<RgbImage, DetectError> {
    image::open(path)
        .map(|img| img.into_rgb8())
        .map_err(|source| DetectError::Unreadable { path: path.to_path_buf(), source })
}
