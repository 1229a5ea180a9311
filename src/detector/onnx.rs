use anyhow::{Context, anyhow};
use image::RgbImage;
use image::imageops::{self, FilterType};
use log::debug;
use tract_onnx::prelude::*;

use super::{DetectError, Detection, Hand, HandDetector, Keypoint, NUM_KEYPOINTS};
use crate::config::{DetectorOptions, TensorLayout};

/// 基于 ONNX 手部关键点网络的检测器
///
/// 网络输入为 `N x N` 的 RGB 图片，像素值范围 `[0, 1]`；
/// 输出 0 为 `[1, 63]` 的关键点坐标（单位为输入像素），输出 1 为 `[1, 1]` 的手部存在置信度。
/// 图片会被整体缩放到输入尺寸，因此每张图片最多检测到一只手。
pub struct OnnxHandDetector {
    plan: TypedRunnableModel<TypedModel>,
    size: u32,
    layout: TensorLayout,
    min_confidence: f32,
}

impl OnnxHandDetector {
    pub fn load(opts: &DetectorOptions) -> anyhow::Result<Self> {
        let n = opts.input_size as usize;
        let shape = match opts.layout {
            TensorLayout::Nhwc => [1, n, n, 3],
            TensorLayout::Nchw => [1, 3, n, n],
        };
        let plan = tract_onnx::onnx()
            .model_for_path(&opts.model)
            .with_context(|| format!("无法加载模型 {}", opts.model.display()))?
            .with_input_fact(0, f32::fact(shape).into())?
            .into_optimized()?
            .into_runnable()?;
        debug!("已加载关键点模型 {}，输入 {:?}", opts.model.display(), shape);
        Ok(Self {
            plan,
            size: opts.input_size,
            layout: opts.layout,
            min_confidence: opts.min_confidence,
        })
    }

    fn input_tensor(&self, image: &RgbImage) -> Tensor {
        let resized = imageops::resize(image, self.size, self.size, FilterType::Triangle);
        let n = self.size as usize;
        let pixel =
            |x: usize, y: usize, c: usize| resized.get_pixel(x as u32, y as u32).0[c] as f32 / 255.0;
        match self.layout {
            TensorLayout::Nhwc => {
                tract_ndarray::Array4::from_shape_fn((1, n, n, 3), |(_, y, x, c)| pixel(x, y, c))
                    .into()
            }
            TensorLayout::Nchw => {
                tract_ndarray::Array4::from_shape_fn((1, 3, n, n), |(_, c, y, x)| pixel(x, y, c))
                    .into()
            }
        }
    }
}

impl HandDetector for OnnxHandDetector {
    fn detect(&mut self, image: &RgbImage) -> Result<Detection, DetectError> {
        let input = self.input_tensor(image);
        let outputs = self.plan.run(tvec!(input.into())).map_err(DetectError::Inference)?;
        if outputs.len() < 2 {
            return Err(DetectError::Inference(anyhow!("模型输出数量不足: {}", outputs.len())));
        }

        let presence = outputs[1].to_array_view::<f32>().map_err(DetectError::Inference)?;
        let presence = presence.iter().next().copied().unwrap_or(0.0);
        if presence < self.min_confidence {
            return Ok(Detection::none());
        }

        let coords = outputs[0].to_array_view::<f32>().map_err(DetectError::Inference)?;
        let coords = coords.iter().copied().collect::<Vec<_>>();
        if coords.len() != NUM_KEYPOINTS * 3 {
            return Err(DetectError::Inference(anyhow!("关键点数量错误: {}", coords.len())));
        }

        // 与 MediaPipe 一致：x、y 按输入宽高归一化，z 与 x 使用相同的比例
        let scale = self.size as f32;
        let mut keypoints = [Keypoint::default(); NUM_KEYPOINTS];
        for (kp, xyz) in keypoints.iter_mut().zip(coords.chunks_exact(3)) {
            *kp = [xyz[0] / scale, xyz[1] / scale, xyz[2] / scale];
        }
        Ok(Detection::new(vec![Hand::new(keypoints)]))
    }
}
