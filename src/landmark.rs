//! 关键点归一化
//!
//! 数据集特征提取和在线推理必须使用同一套归一化逻辑，否则训练数据和推理输入的分布会不一致。

use crate::detector::{Keypoint, NUM_KEYPOINTS};

/// 特征向量维度：去掉手腕后的 20 个关键点 × 3
pub const FEATURE_DIM: usize = (NUM_KEYPOINTS - 1) * 3;

/// 将 21 个关键点归一化为 60 维特征向量
///
/// 1. 以手腕（关键点 0）为原点平移所有关键点
/// 2. 计算三个坐标轴上的最大跨度（max - min），取其中最大者作为缩放因子，为 0 时使用 1.0
/// 3. 所有关键点除以缩放因子
/// 4. 去掉手腕，按关键点顺序展开剩余的 20 × 3 个坐标
pub fn normalize(keypoints: &[Keypoint; NUM_KEYPOINTS]) -> [f32; FEATURE_DIM] {
    let wrist = keypoints[0];
    let mut centered = *keypoints;
    for kp in centered.iter_mut() {
        for axis in 0..3 {
            kp[axis] -= wrist[axis];
        }
    }

    let mut scale = (0..3)
        .map(|axis| {
            let (min, max) = centered.iter().fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), kp| {
                (lo.min(kp[axis]), hi.max(kp[axis]))
            });
            max - min
        })
        .fold(0.0f32, f32::max);
    if scale == 0.0 {
        scale = 1.0;
    }

    let mut features = [0.0; FEATURE_DIM];
    for (dst, kp) in features.chunks_exact_mut(3).zip(&centered[1..]) {
        for axis in 0..3 {
            dst[axis] = kp[axis] / scale;
        }
    }
    features
}

/// 从扁平的 63 个浮点数（21 × 3）归一化，长度不符时返回 `None`
pub fn normalize_flat(raw: &[f32]) -> Option<[f32; FEATURE_DIM]> {
    if raw.len() != NUM_KEYPOINTS * 3 {
        return None;
    }
    let mut keypoints = [Keypoint::default(); NUM_KEYPOINTS];
    for (kp, xyz) in keypoints.iter_mut().zip(raw.chunks_exact(3)) {
        kp.copy_from_slice(xyz);
    }
    Some(normalize(&keypoints))
}
