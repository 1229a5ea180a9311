use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Result;
use indicatif::ProgressBar;

use crate::dataset::FeatureVector;
use crate::detector::{DetectError, HandDetector};
use crate::filter::EXCLUDED_CLASS;
use crate::landmark::normalize;
use crate::pool::WorkerPool;
use crate::utils::{class_label, pb_warn};

/// 图片未能生成特征的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FailureReason {
    /// 类别被排除（`nothing`），不做检测
    ClassExcluded,
    /// 没有检测到手
    NoHand,
    /// 图片无法读取
    CorruptImage,
}

impl FailureReason {
    pub const ALL: [FailureReason; 3] = [Self::ClassExcluded, Self::NoHand, Self::CorruptImage];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClassExcluded => "class_excluded",
            Self::NoHand => "no_hand",
            Self::CorruptImage => "corrupt_image",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 将一张图片转换为特征向量
///
/// 类别名区分大小写：只有目录名恰好为 `nothing` 时才会跳过检测。
pub fn vectorize_image<D>(detector: &mut D, path: &Path) -> Result<FeatureVector, FailureReason>
where
    D: HandDetector + ?Sized,
{
    extract(detector, path).map_err(|(reason, _)| reason)
}

/// 失败时同时返回推理错误，由调用线程负责输出
fn extract<D>(detector: &mut D, path: &Path) -> Result<FeatureVector, (FailureReason, Option<DetectError>)>
where
    D: HandDetector + ?Sized,
{
    let label = class_label(path);
    if label == EXCLUDED_CLASS {
        return Err((FailureReason::ClassExcluded, None));
    }

    let detection = match detector.detect_path(path) {
        Ok(detection) => detection,
        Err(DetectError::Unreadable { .. }) => return Err((FailureReason::CorruptImage, None)),
        Err(e @ DetectError::Inference(_)) => return Err((FailureReason::CorruptImage, Some(e))),
    };
    let hand = detection.first().ok_or((FailureReason::NoHand, None))?;
    Ok(FeatureVector { label: label.into_owned(), features: normalize(hand.keypoints()) })
}

/// 各失败原因的计数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureCounts(BTreeMap<FailureReason, usize>);

impl Default for FailureCounts {
    fn default() -> Self {
        Self(FailureReason::ALL.into_iter().map(|reason| (reason, 0)).collect())
    }
}

impl FailureCounts {
    pub fn record(&mut self, reason: FailureReason) {
        *self.0.entry(reason).or_default() += 1;
    }

    pub fn get(&self, reason: FailureReason) -> usize {
        self.0.get(&reason).copied().unwrap_or_default()
    }

    pub fn total(&self) -> usize {
        self.0.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (FailureReason, usize)> + '_ {
        self.0.iter().map(|(&reason, &count)| (reason, count))
    }
}

#[derive(Debug, Clone)]
pub struct VectorizeSummary {
    pub ok: usize,
    pub failures: FailureCounts,
    pub workers: usize,
    pub chunk_size: usize,
}

impl fmt::Display for VectorizeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "成功样本: {}  |  失败/跳过: {}", self.ok, self.failures.total())?;
        for (reason, count) in self.failures.iter() {
            write!(f, "\n    - {:15}: {}", reason.as_str(), count)?;
        }
        write!(f, "\n工作线程: {}  |  分块大小: {}", self.workers, self.chunk_size)
    }
}

/// 并行提取所有图片的特征，结果按输入顺序排列
pub fn vectorize_images<I, D, F>(
    images: I,
    pool: &WorkerPool,
    init: F,
    pb: &ProgressBar,
) -> Result<(Vec<FeatureVector>, VectorizeSummary)>
where
    I: IntoIterator<Item = PathBuf>,
    I::IntoIter: Send,
    D: HandDetector,
    F: Fn() -> Result<D> + Sync,
{
    let mut rows = vec![];
    let mut failures = FailureCounts::default();
    pool.run(
        images,
        init,
        |detector: &mut D, path: PathBuf| (extract(detector, &path), path),
        |(outcome, path)| {
            match outcome {
                Ok(row) => rows.push(row),
                Err((reason, error)) => {
                    if let Some(e) = error {
                        pb_warn(pb, format_args!("{}: {:#}", path.display(), anyhow::Error::from(e)));
                    }
                    failures.record(reason);
                }
            }
            pb.inc(1);
            Ok(())
        },
    )?;
    let summary = VectorizeSummary {
        ok: rows.len(),
        failures,
        workers: pool.workers(),
        chunk_size: pool.chunk_size(),
    };
    Ok((rows, summary))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use image::RgbImage;

    use super::*;
    use crate::detector::{Detection, Hand, NUM_KEYPOINTS};

    /// 根据左上角像素的红色通道决定是否检测到手，并记录调用次数
    #[derive(Default)]
    struct ScriptedDetector {
        calls: usize,
    }

    impl HandDetector for ScriptedDetector {
        fn detect(&mut self, image: &RgbImage) -> Result<Detection, DetectError> {
            self.calls += 1;
            if image.get_pixel(0, 0).0[0] > 128 {
                let mut kps = [[0.0; 3]; NUM_KEYPOINTS];
                kps[8] = [0.5, 0.25, 0.0];
                Ok(Detection::new(vec![Hand::new(kps)]))
            } else {
                Ok(Detection::none())
            }
        }
    }

    fn write_image(root: &Path, class: &str, name: &str, red: u8) -> PathBuf {
        let dir = root.join(class);
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        RgbImage::from_pixel(16, 16, image::Rgb([red, 0, 0])).save(&path).unwrap();
        path
    }

    #[test]
    fn test_excluded_class_skips_detection() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_image(dir.path(), "nothing", "n1.jpg", 255);
        let mut detector = ScriptedDetector::default();
        assert_eq!(vectorize_image(&mut detector, &path), Err(FailureReason::ClassExcluded));
        assert_eq!(detector.calls, 0);
    }

    #[test]
    fn test_label_match_is_case_sensitive() {
        // 目录名为 Nothing 时不会被排除，而是照常检测
        let dir = tempfile::tempdir().unwrap();
        let path = write_image(dir.path(), "Nothing", "n1.jpg", 0);
        let mut detector = ScriptedDetector::default();
        assert_eq!(vectorize_image(&mut detector, &path), Err(FailureReason::NoHand));
        assert_eq!(detector.calls, 1);
    }

    #[test]
    fn test_corrupt_image() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("A")).unwrap();
        let path = dir.path().join("A/broken.jpg");
        fs::write(&path, b"\xff\xd8 truncated").unwrap();
        let mut detector = ScriptedDetector::default();
        assert_eq!(vectorize_image(&mut detector, &path), Err(FailureReason::CorruptImage));
        assert_eq!(detector.calls, 0);
    }

    #[test]
    fn test_feature_vector() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_image(dir.path(), "A", "a1.jpg", 255);
        let mut detector = ScriptedDetector::default();
        let row = vectorize_image(&mut detector, &path).unwrap();
        assert_eq!(row.label, "A");
        assert_eq!(row.features.len(), 60);
        // 关键点 8 是跨度最大的点，缩放后 x 为 1
        assert_eq!(row.features[(8 - 1) * 3], 1.0);
        assert_eq!(row.features[(8 - 1) * 3 + 1], 0.5);
    }

    /// 对所有图片都返回推理错误
    struct BrokenDetector;

    impl HandDetector for BrokenDetector {
        fn detect(&mut self, _image: &RgbImage) -> Result<Detection, DetectError> {
            Err(DetectError::Inference(anyhow::anyhow!("transient")))
        }
    }

    #[test]
    fn test_inference_failure_is_counted() {
        let dir = tempfile::tempdir().unwrap();
        let paths = vec![
            write_image(dir.path(), "A", "a1.jpg", 255),
            write_image(dir.path(), "A", "a2.jpg", 255),
            write_image(dir.path(), "nothing", "n1.jpg", 0),
        ];
        let pool = WorkerPool::new(2, 1);
        let (rows, summary) =
            vectorize_images(paths, &pool, || Ok(BrokenDetector), &ProgressBar::hidden()).unwrap();
        assert!(rows.is_empty());
        assert_eq!(summary.failures.get(FailureReason::CorruptImage), 2);
        assert_eq!(summary.failures.get(FailureReason::ClassExcluded), 1);
    }

    #[test]
    fn test_failure_counts() {
        let mut counts = FailureCounts::default();
        counts.record(FailureReason::NoHand);
        counts.record(FailureReason::NoHand);
        counts.record(FailureReason::CorruptImage);
        assert_eq!(counts.get(FailureReason::NoHand), 2);
        assert_eq!(counts.get(FailureReason::ClassExcluded), 0);
        assert_eq!(counts.total(), 3);
        assert_eq!(counts.iter().count(), 3);
    }
}
