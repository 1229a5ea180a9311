use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use log::info;
use ndarray::{Array2, ArrayView1};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rayon::prelude::*;

use crate::landmark::FEATURE_DIM;

/// 分层抽样使用的固定随机种子
pub const SPLIT_SEED: u64 = 42;
/// 第一次划分中保留集（holdout）的比例
pub const HOLDOUT_RATIO: f64 = 0.2;
/// 第二次划分中测试集占保留集的比例
pub const TEST_RATIO_OF_HOLDOUT: f64 = 0.5;

pub const FEATURES_ALL: &str = "features_all.csv";
pub const TRAIN_80: &str = "train80.csv";
pub const TEST_20: &str = "test20.csv";
pub const VAL_10: &str = "val10.csv";
pub const TEST_10: &str = "test10.csv";

/// 一张图片的特征：类别 + 60 维归一化关键点
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    pub label: String,
    pub features: [f32; FEATURE_DIM],
}

/// 特征表，每行为 `label, f0, ..., f59`
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetTable {
    labels: Vec<String>,
    features: Array2<f32>,
}

impl DatasetTable {
    pub fn from_rows(rows: Vec<FeatureVector>) -> Self {
        let n = rows.len();
        let mut labels = Vec::with_capacity(n);
        let mut features = Array2::zeros((n, FEATURE_DIM));
        for (mut dst, row) in features.rows_mut().into_iter().zip(rows) {
            dst.assign(&ArrayView1::from(&row.features[..]));
            labels.push(row.label);
        }
        Self { labels, features }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn features(&self) -> &Array2<f32> {
        &self.features
    }

    pub fn row(&self, index: usize) -> (&str, ArrayView1<'_, f32>) {
        (&self.labels[index], self.features.row(index))
    }

    pub fn header() -> Vec<String> {
        std::iter::once("label".to_string()).chain((0..FEATURE_DIM).map(|i| format!("f{i}"))).collect()
    }

    /// 写入 CSV，`rows` 为 `None` 时写入全部行
    pub fn write_csv(&self, path: &Path, rows: Option<&[usize]>) -> Result<()> {
        let mut writer =
            csv::Writer::from_path(path).with_context(|| format!("无法创建 {}", path.display()))?;
        writer.write_record(Self::header())?;
        let mut write_row = |index: usize| -> Result<()> {
            let (label, values) = self.row(index);
            let record = std::iter::once(label.to_string()).chain(values.iter().map(|v| v.to_string()));
            writer.write_record(record)?;
            Ok(())
        };
        match rows {
            Some(rows) => rows.iter().try_for_each(|&i| write_row(i))?,
            None => (0..self.len()).try_for_each(&mut write_row)?,
        }
        writer.flush()?;
        Ok(())
    }

    pub fn read_csv(path: &Path) -> Result<Self> {
        let mut reader =
            csv::Reader::from_path(path).with_context(|| format!("无法读取 {}", path.display()))?;
        let header = reader.headers()?.iter().map(str::to_owned).collect::<Vec<_>>();
        if header != Self::header() {
            bail!("{} 的表头不符合 label,f0..f{}", path.display(), FEATURE_DIM - 1);
        }
        let mut rows = vec![];
        for (line, record) in reader.records().enumerate() {
            let record = record?;
            let mut features = [0.0; FEATURE_DIM];
            for (dst, field) in features.iter_mut().zip(record.iter().skip(1)) {
                *dst = field
                    .parse()
                    .with_context(|| format!("{} 第 {} 行包含无效数值", path.display(), line + 2))?;
            }
            rows.push(FeatureVector { label: record[0].to_string(), features });
        }
        Ok(Self::from_rows(rows))
    }
}

/// 分层随机划分
///
/// 将 `indices` 按 `labels` 分组，每组按 `test_size` 的比例抽取测试部分，返回 `(train, test)`。
/// 样本数不少于 2 的类别在两部分中都至少有一个样本；只有一个样本的类别放入训练部分。
/// 相同的输入和种子总是得到相同的结果。
pub fn stratified_split(
    labels: &[String],
    indices: &[usize],
    test_size: f64,
    seed: u64,
) -> (Vec<usize>, Vec<usize>) {
    let n = indices.len();
    if n == 0 {
        return (vec![], vec![]);
    }

    let mut groups: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for &i in indices {
        groups.entry(labels[i].as_str()).or_default().push(i);
    }

    let n_test = ((test_size * n as f64).ceil() as usize).min(n);
    let allocation = allocate(groups.values().map(Vec::len), n, n_test);

    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::with_capacity(n - n_test);
    let mut test = Vec::with_capacity(n_test);
    for (mut members, take) in groups.into_values().zip(allocation) {
        members.shuffle(&mut rng);
        test.extend_from_slice(&members[..take]);
        train.extend_from_slice(&members[take..]);
    }
    train.shuffle(&mut rng);
    test.shuffle(&mut rng);
    (train, test)
}

/// 按各组大小比例分配 `n_test` 个测试样本
fn allocate(sizes: impl Iterator<Item = usize>, n: usize, n_test: usize) -> Vec<usize> {
    let sizes = sizes.collect::<Vec<_>>();
    let exact = sizes.iter().map(|&size| size as f64 * n_test as f64 / n as f64).collect::<Vec<_>>();
    let mut alloc = exact.iter().map(|x| x.floor() as usize).collect::<Vec<_>>();

    // 剩余的名额按小数部分从大到小分配
    let mut remaining = n_test.saturating_sub(alloc.iter().sum());
    let mut order = (0..sizes.len()).collect::<Vec<_>>();
    order.sort_by(|&a, &b| (exact[b] - exact[b].floor()).total_cmp(&(exact[a] - exact[a].floor())));
    for &i in order.iter().cycle().take(order.len() * 2) {
        if remaining == 0 {
            break;
        }
        if alloc[i] < sizes[i] {
            alloc[i] += 1;
            remaining -= 1;
        }
    }

    for (take, &size) in alloc.iter_mut().zip(&sizes) {
        *take = if size >= 2 { (*take).clamp(1, size - 1) } else { 0 };
    }
    alloc
}

/// 两套划分方案
///
/// - 方案 A：全部样本按 80 / 20 划分为 `train` 和 `holdout`
/// - 方案 B：`holdout` 再按 50 / 50 划分为 `val` 和 `test`，各占全部样本的 10%
///
/// 所有下标均指向完整特征表中的行。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitSchemes {
    pub train: Vec<usize>,
    pub holdout: Vec<usize>,
    pub val: Vec<usize>,
    pub test: Vec<usize>,
}

impl SplitSchemes {
    pub fn compute(table: &DatasetTable, seed: u64) -> Self {
        let all = (0..table.len()).collect::<Vec<_>>();
        let (train, holdout) = stratified_split(table.labels(), &all, HOLDOUT_RATIO, seed);
        let (val, test) = stratified_split(table.labels(), &holdout, TEST_RATIO_OF_HOLDOUT, seed);
        Self { train, holdout, val, test }
    }
}

/// 写入完整特征表和四个划分文件，返回写入的文件路径
pub fn write_dataset(table: &DatasetTable, schemes: &SplitSchemes, output: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(output).with_context(|| format!("无法创建目录 {}", output.display()))?;
    let outputs: Vec<(&str, Option<&[usize]>)> = vec![
        (FEATURES_ALL, None),
        (TRAIN_80, Some(schemes.train.as_slice())),
        (TEST_20, Some(schemes.holdout.as_slice())),
        (VAL_10, Some(schemes.val.as_slice())),
        (TEST_10, Some(schemes.test.as_slice())),
    ];
    outputs
        .par_iter()
        .map(|&(name, rows)| -> Result<PathBuf> {
            let path = output.join(name);
            table.write_csv(&path, rows)?;
            info!("已写入 {} ({} 行)", path.display(), rows.map_or(table.len(), <[usize]>::len));
            Ok(path)
        })
        .collect()
}
