use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use indicatif::ProgressBar;

use crate::detector::{DetectError, Detection, HandDetector};
use crate::pool::WorkerPool;
use crate::utils::{class_label, pb_warn};

/// 不应包含手的类别
pub const EXCLUDED_CLASS: &str = "nothing";

/// 图片是否满足其类别的规则
///
/// - `nothing` 类别（不区分大小写）：没有检测到手才有效
/// - 其他类别：至少检测到一只手才有效
pub fn is_valid(label: &str, detection: &Detection) -> bool {
    if label.to_lowercase() == EXCLUDED_CLASS {
        !detection.has_hand()
    } else {
        detection.has_hand()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidityDecision {
    pub path: PathBuf,
    pub valid: bool,
    /// 推理失败时的错误信息，此时图片视为无效
    pub failure: Option<String>,
}

/// 检测一张图片并判定其有效性
///
/// 图片无法读取时返回错误；推理失败只影响这一张图片，结果为无效并附带错误信息。
pub fn decide_validity<D>(detector: &mut D, path: PathBuf) -> Result<ValidityDecision, DetectError>
where
    D: HandDetector + ?Sized,
{
    match detector.detect_path(&path) {
        Ok(detection) => {
            let valid = is_valid(&class_label(&path), &detection);
            Ok(ValidityDecision { path, valid, failure: None })
        }
        Err(e @ DetectError::Inference(_)) => {
            let failure = format!("{:#}", anyhow::Error::from(e));
            Ok(ValidityDecision { path, valid: false, failure: Some(failure) })
        }
        Err(e) => Err(e),
    }
}

/// 将图片复制到 `clean` 或 `rejected` 目录，保留类别子目录和文件名
pub struct Partitioner {
    clean_root: PathBuf,
    rejected_root: PathBuf,
}

impl Partitioner {
    pub fn new(output: &Path) -> Result<Self> {
        let clean_root = output.join("clean");
        let rejected_root = output.join("rejected");
        for dir in [&clean_root, &rejected_root] {
            fs::create_dir_all(dir).with_context(|| format!("无法创建目录 {}", dir.display()))?;
        }
        Ok(Self { clean_root, rejected_root })
    }

    pub fn clean_root(&self) -> &Path {
        &self.clean_root
    }

    pub fn rejected_root(&self) -> &Path {
        &self.rejected_root
    }

    pub fn destination(&self, decision: &ValidityDecision) -> Result<PathBuf> {
        let root = if decision.valid { &self.clean_root } else { &self.rejected_root };
        let file_name = decision
            .path
            .file_name()
            .ok_or_else(|| anyhow!("无效的图片路径: {}", decision.path.display()))?;
        Ok(root.join(&*class_label(&decision.path)).join(file_name))
    }

    /// 复制图片，同名文件会被覆盖
    ///
    /// 先写入同目录下的临时文件再重命名，目标文件要么不存在要么完整
    pub fn place(&self, decision: &ValidityDecision) -> Result<PathBuf> {
        let dst = self.destination(decision)?;
        if let Some(dir) = dst.parent() {
            fs::create_dir_all(dir).with_context(|| format!("无法创建目录 {}", dir.display()))?;
        }
        let mut tmp_name = std::ffi::OsString::from(".");
        tmp_name.push(dst.file_name().unwrap_or_default());
        tmp_name.push(".partial");
        let tmp = dst.with_file_name(tmp_name);

        fs::copy(&decision.path, &tmp).with_context(|| {
            format!("无法复制 {} -> {}", decision.path.display(), tmp.display())
        })?;
        fs::rename(&tmp, &dst).with_context(|| format!("无法写入 {}", dst.display()))?;
        Ok(dst)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterSummary {
    pub kept: usize,
    pub rejected: usize,
    /// 推理失败的图片数，已计入 `rejected`
    pub failed: usize,
    pub workers: usize,
}

impl FilterSummary {
    pub fn total(&self) -> usize {
        self.kept + self.rejected
    }

    /// 拒绝比例（百分比）
    pub fn reject_rate(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.rejected as f64 / total as f64 * 100.0,
        }
    }
}

impl fmt::Display for FilterSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "保留图片 : {}", self.kept)?;
        writeln!(f, "拒绝图片 : {}", self.rejected)?;
        writeln!(f, "推理失败 : {}", self.failed)?;
        writeln!(f, "处理总数 : {}", self.total())?;
        writeln!(f, "拒绝比例 : {:.2}%", self.reject_rate())?;
        write!(f, "工作线程 : {}", self.workers)
    }
}

/// 对所有图片进行检测并划分到输出目录
///
/// 任意一张图片无法读取都会中止整个任务，已经复制的文件保持完整。
/// 推理失败的图片放入 `rejected` 目录，任务继续。
pub fn filter_images<I, D, F>(
    images: I,
    partitioner: &Partitioner,
    pool: &WorkerPool,
    init: F,
    pb: &ProgressBar,
) -> Result<FilterSummary>
where
    I: IntoIterator<Item = PathBuf>,
    I::IntoIter: Send,
    D: HandDetector,
    F: Fn() -> Result<D> + Sync,
{
    let mut summary = FilterSummary { workers: pool.workers(), ..Default::default() };
    pool.run(images, init, decide_validity::<D>, |decision| {
        let decision = decision?;
        if let Some(failure) = &decision.failure {
            pb_warn(pb, format_args!("{}: {}", decision.path.display(), failure));
            summary.failed += 1;
        }
        partitioner.place(&decision)?;
        if decision.valid {
            summary.kept += 1;
        } else {
            summary.rejected += 1;
        }
        pb.inc(1);
        Ok(())
    })?;
    Ok(summary)
}
