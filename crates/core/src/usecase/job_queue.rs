use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::domain::event::JobCallbacks;
use crate::domain::job::{JobPriority, JobRecord, JobSource};

/// キューに載るジョブ（永続レコードの作業コピー + 実行時情報）
#[derive(Debug)]
pub struct QueuedJob {
    pub record: JobRecord,
    pub source: JobSource,
    pub callbacks: JobCallbacks,
    cancel: Arc<AtomicBool>,
    /// 初回投入時に採番。再投入（一時停止後）でも維持して FIFO 位置を保つ。
    seq: Option<u64>,
}

impl QueuedJob {
    pub fn new(record: JobRecord, source: JobSource) -> Self {
        Self {
            record,
            source,
            callbacks: JobCallbacks::default(),
            cancel: Arc::new(AtomicBool::new(false)),
            seq: None,
        }
    }

    pub fn with_callbacks(mut self, callbacks: JobCallbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn priority(&self) -> JobPriority {
        self.record.priority
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(AtomicOrdering::Acquire)
    }
}

/// エンジンを使用中のジョブ
#[derive(Debug, Clone)]
pub struct ActiveJob {
    pub job_id: String,
    pub priority: JobPriority,
    cancel: Arc<AtomicBool>,
}

/// cancel() の結果
#[derive(Debug)]
pub enum CancelOutcome {
    /// 待機中だったのでキューから取り除いた
    Removed(Box<QueuedJob>),
    /// 実行中なので次のチャンク境界で止まるよう通知した
    Signalled,
    NotFound,
}

struct QueueEntry {
    priority: JobPriority,
    seq: u64,
    job: QueuedJob,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap は最大ヒープ: 優先度値が小さく、seq が小さいものを「大きい」とする
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct QueueState {
    heap: BinaryHeap<QueueEntry>,
    next_seq: u64,
    active: Option<ActiveJob>,
}

/// 優先度付きジョブキュー
///
/// 同一優先度は投入順 (FIFO)。実行中ジョブの参照も同じロックで保護する。
pub struct JobQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl JobQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            available: Condvar::new(),
        }
    }

    /// ジョブを投入する。O(log n)
    pub fn push(&self, mut job: QueuedJob) {
        let mut state = self.state.lock();
        let seq = match job.seq {
            Some(seq) => seq,
            None => {
                let seq = state.next_seq;
                state.next_seq += 1;
                job.seq = Some(seq);
                seq
            }
        };
        state.heap.push(QueueEntry {
            priority: job.record.priority,
            seq,
            job,
        });
        drop(state);
        self.available.notify_one();
    }

    /// 最優先ジョブを取り出し、実行中ジョブとして登録する。
    ///
    /// 空なら最大 timeout だけ待つ。起こされた時点（wake_all を含む）でも空なら None。
    pub fn pop_timeout(&self, timeout: Duration) -> Option<QueuedJob> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        if state.heap.is_empty() {
            let _ = self.available.wait_until(&mut state, deadline);
        }

        let entry = state.heap.pop()?;
        state.active = Some(ActiveJob {
            job_id: entry.job.record.id.clone(),
            priority: entry.priority,
            cancel: entry.job.cancel.clone(),
        });
        Some(entry.job)
    }

    /// 実行中ジョブの登録を解除する
    pub fn clear_active(&self) {
        self.state.lock().active = None;
    }

    pub fn active(&self) -> Option<ActiveJob> {
        self.state.lock().active.clone()
    }

    /// priority より優先度の高いジョブが待機中か
    pub fn has_pending_above(&self, priority: JobPriority) -> bool {
        self.state
            .lock()
            .heap
            .peek()
            .is_some_and(|entry| entry.priority < priority)
    }

    /// ジョブを取り消す。待機中なら取り除き、実行中ならフラグを立てる。
    pub fn cancel(&self, job_id: &str) -> CancelOutcome {
        let mut state = self.state.lock();

        if let Some(active) = &state.active {
            if active.job_id == job_id {
                active.cancel.store(true, AtomicOrdering::Release);
                return CancelOutcome::Signalled;
            }
        }

        let entries = std::mem::take(&mut state.heap).into_vec();
        let mut removed = None;
        let mut kept = Vec::with_capacity(entries.len());
        for entry in entries {
            if removed.is_none() && entry.job.record.id == job_id {
                entry.job.cancel.store(true, AtomicOrdering::Release);
                removed = Some(entry.job);
            } else {
                kept.push(entry);
            }
        }
        state.heap = BinaryHeap::from(kept);

        match removed {
            Some(job) => CancelOutcome::Removed(Box::new(job)),
            None => CancelOutcome::NotFound,
        }
    }

    /// 待機中のジョブID（取り出し順）
    pub fn pending_ids(&self) -> Vec<String> {
        let state = self.state.lock();
        let mut entries: Vec<&QueueEntry> = state.heap.iter().collect();
        entries.sort_by(|a, b| b.cmp(a));
        entries.iter().map(|e| e.job.record.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().heap.len()
    }

    /// 待機中のワーカーを起こす（shutdown 用）
    pub fn wake_all(&self) {
        self.available.notify_all();
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}
