use std::borrow::Cow;
use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use either::Either;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use walkdir::WalkDir;

/// 参与处理的图片后缀
pub const IMAGE_SUFFIX: &str = "jpg";

pub fn pb_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{prefix:.bold} [{elapsed_precise}] {wide_bar:.cyan/blue} {pos}/{len} {per_sec} {msg}",
    )
    .expect("invalid progress template")
    .progress_chars("##-")
}

/// 未知总量时使用的样式
pub fn pb_style_spinner() -> ProgressStyle {
    ProgressStyle::with_template("{prefix:.bold} {spinner} [{elapsed_precise}] {pos} {per_sec} {msg}")
        .expect("invalid progress template")
}

/// 创建进度条，`enabled` 为 false 时返回隐藏的进度条
pub fn progress_bar(prefix: &'static str, total: Option<usize>, enabled: bool) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }
    let pb = match total {
        Some(total) => ProgressBar::new(total as u64).with_style(pb_style()),
        None => ProgressBar::no_length().with_style(pb_style_spinner()),
    };
    pb.with_prefix(prefix)
}

/// 输出警告，进度条显示期间先将其隐藏，避免日志与进度条交错
pub fn pb_warn(pb: &ProgressBar, message: impl std::fmt::Display) {
    pb.suspend(|| warn!("{message}"));
}

/// 递归扫描 `root` 下的所有图片，按文件名排序以保证每次运行的顺序一致
pub fn scan_images(root: &Path) -> impl Iterator<Item = PathBuf> + Send + use<> {
    WalkDir::new(root).sort_by_file_name().into_iter().filter_map(|entry| {
        let entry = entry.ok()?;
        if !entry.file_type().is_file() {
            return None;
        }
        let is_image =
            entry.path().extension().is_some_and(|ext| ext.eq_ignore_ascii_case(IMAGE_SUFFIX));
        is_image.then(|| entry.into_path())
    })
}

/// 获取输入图片列表
///
/// `materialize` 为 true 时一次性扫描全部图片以得到总数，此时没有图片视为错误；
/// 否则返回惰性迭代器，不做空输入检查。
pub fn collect_images(
    root: &Path,
    materialize: bool,
) -> Result<(impl Iterator<Item = PathBuf> + Send + use<>, Option<usize>)> {
    let images = scan_images(root);
    if !materialize {
        return Ok((Either::Right(images), None));
    }

    let images = images.collect::<Vec<_>>();
    if images.is_empty() {
        bail!("输入目录中没有找到 *.{} 图片: {}", IMAGE_SUFFIX, root.display());
    }
    info!("扫描完成，共 {} 张图片", images.len());
    let total = images.len();
    Ok((Either::Left(images.into_iter()), Some(total)))
}

/// 图片所在目录名即为类别，保留原始大小写
pub fn class_label(path: &Path) -> Cow<'_, str> {
    path.parent()
        .and_then(|dir| dir.file_name())
        .map(|name| name.to_string_lossy())
        .unwrap_or(Cow::Borrowed(""))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn test_class_label() {
        assert_eq!(class_label(Path::new("data/raw/A/A1.jpg")), "A");
        assert_eq!(class_label(Path::new("data/raw/Nothing/x.jpg")), "Nothing");
        assert_eq!(class_label(Path::new("x.jpg")), "");
    }

    #[test]
    fn test_scan_images_recursive() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("A/deep")).unwrap();
        fs::create_dir_all(root.join("B")).unwrap();
        fs::write(root.join("A/a2.jpg"), b"").unwrap();
        fs::write(root.join("A/a1.JPG"), b"").unwrap();
        fs::write(root.join("A/deep/a3.jpg"), b"").unwrap();
        fs::write(root.join("B/b1.png"), b"").unwrap();
        fs::write(root.join("B/notes.txt"), b"").unwrap();

        let found = scan_images(root)
            .map(|p| p.strip_prefix(root).unwrap().to_path_buf())
            .collect::<Vec<_>>();
        assert_eq!(
            found,
            vec![PathBuf::from("A/a1.JPG"), PathBuf::from("A/a2.jpg"), PathBuf::from("A/deep/a3.jpg")]
        );
    }

    #[test]
    fn test_collect_images_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(collect_images(dir.path(), true).is_err());

        let (images, total) = collect_images(dir.path(), false).unwrap();
        assert_eq!(total, None);
        assert_eq!(images.count(), 0);
    }

    #[test]
    fn test_collect_images_materialized() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("C")).unwrap();
        fs::write(dir.path().join("C/c.jpg"), b"").unwrap();
        let (images, total) = collect_images(dir.path(), true).unwrap();
        assert_eq!(total, Some(1));
        assert_eq!(images.count(), 1);
    }
}
