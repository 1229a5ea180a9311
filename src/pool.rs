use std::collections::BTreeMap;
use std::thread;

use anyhow::{Result, anyhow};
use crossbeam_channel::{Receiver, bounded, unbounded};
use log::debug;

/// 固定大小的工作线程池
///
/// 输入按块（chunk）分发给工作线程，每个工作线程在处理第一块时才构造自己的状态
/// （通常是关键点检测器），之后处理的所有输入都复用这一个实例，线程之间不共享状态。
/// 结果按提交顺序交还给调用线程。
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    workers: usize,
    chunk_size: usize,
}

impl WorkerPool {
    pub fn new(workers: usize, chunk_size: usize) -> Self {
        Self { workers: workers.max(1), chunk_size: chunk_size.max(1) }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// 并行处理 `items`，并在调用线程中按提交顺序依次消费结果
    ///
    /// 参数：
    /// - items: 输入序列，可以是惰性迭代器，不会被一次性读入内存
    /// - init: 构造工作线程状态，每个线程最多调用一次，失败时整个任务中止
    /// - job: 处理单个输入，单个输入的失败应当体现在返回值中
    /// - consume: 消费单个结果，返回错误时中止整个任务
    pub fn run<I, T, R, S, F, M, C>(&self, items: I, init: F, job: M, mut consume: C) -> Result<()>
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send,
        T: Send,
        R: Send,
        F: Fn() -> Result<S> + Sync,
        M: Fn(&mut S, T) -> R + Sync,
        C: FnMut(R) -> Result<()>,
    {
        let (task_tx, task_rx) = bounded::<(usize, Vec<T>)>(self.workers * 2);
        let (result_tx, result_rx) = unbounded::<(usize, Result<Vec<R>>)>();
        let chunk_size = self.chunk_size;
        let items = items.into_iter();

        thread::scope(|s| -> Result<()> {
            s.spawn(move || {
                let mut items = items;
                for seq in 0.. {
                    let chunk = items.by_ref().take(chunk_size).collect::<Vec<_>>();
                    if chunk.is_empty() || task_tx.send((seq, chunk)).is_err() {
                        break;
                    }
                }
            });

            for id in 0..self.workers {
                let task_rx = task_rx.clone();
                let result_tx = result_tx.clone();
                let (init, job) = (&init, &job);
                thread::Builder::new().name(format!("worker-{id}")).spawn_scoped(s, move || {
                    let mut tasks = task_rx.iter();
                    let Some((seq, chunk)) = tasks.next() else {
                        return;
                    };
                    let mut state = match init() {
                        Ok(state) => state,
                        Err(e) => {
                            let _ = result_tx.send((seq, Err(e)));
                            return;
                        }
                    };
                    debug!("工作线程 {id} 初始化完成");
                    for (seq, chunk) in std::iter::once((seq, chunk)).chain(tasks) {
                        let out = chunk.into_iter().map(|item| job(&mut state, item)).collect();
                        if result_tx.send((seq, Ok(out))).is_err() {
                            return;
                        }
                    }
                })?;
            }
            drop(task_rx);
            drop(result_tx);

            // NOTE: 返回前必须先关闭结果通道，工作线程才能在中止时退出
            let outcome = drain_in_order(&result_rx, &mut consume);
            drop(result_rx);
            outcome
        })
    }
}

/// 按块序号重新排序，依次交给 `consume`
fn drain_in_order<R, C>(rx: &Receiver<(usize, Result<Vec<R>>)>, consume: &mut C) -> Result<()>
where
    C: FnMut(R) -> Result<()>,
{
    let mut pending = BTreeMap::new();
    let mut next = 0;
    for (seq, chunk) in rx {
        pending.insert(seq, chunk?);
        while let Some(chunk) = pending.remove(&next) {
            for result in chunk {
                consume(result)?;
            }
            next += 1;
        }
    }
    if !pending.is_empty() {
        return Err(anyhow!("工作线程异常退出，{} 块结果未能交付", pending.len()));
    }
    Ok(())
}

/// 计算分块大小：`ceil(total * percent / 100 / workers)`，最小为 1
pub fn chunk_size_for(total: usize, percent: usize, workers: usize) -> usize {
    (total * percent).div_ceil(100 * workers.max(1)).max(1)
}

/// 工作线程数量：CPU 核心数减去预留的余量，最少为 1
pub fn worker_count(headroom: usize) -> usize {
    num_cpus::get().saturating_sub(headroom).max(1)
}
