use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;

use parking_lot::Mutex;

use super::job_queue::{ActiveJob, CancelOutcome, JobQueue, QueuedJob};
use super::preempt::PreemptGate;
use super::worker::{self, now, Shared};
use crate::domain::error::AppError;
use crate::domain::event::{JobCallbacks, JobEvent};
use crate::domain::job::{
    new_job_id, AudioBuffer, ChunkRecord, JobPriority, JobRecord, JobSource, JobStatus, RetryMode,
};
use crate::domain::settings::{DecodingSettings, SchedulerConfig};
use crate::infra::audio::AudioLoader;
use crate::infra::storage::JobStore;
use crate::infra::stt::SttEngine;

struct WorkerHandle {
    thread: thread::JoinHandle<()>,
    done_rx: mpsc::Receiver<()>,
}

/// 文字起こしジョブスケジューラ（外部から使う唯一の窓口）
///
/// 単一ワーカースレッドが推論エンジンを排他的に使い、submit / cancel / retry は
/// 任意のスレッドから同時に呼び出せる。
pub struct Scheduler {
    shared: Arc<Shared>,
    worker: Mutex<Option<WorkerHandle>>,
    closed: AtomicBool,
}

impl Scheduler {
    /// ストアから未完了ジョブを復元し、ワーカーを起動する
    pub fn start(
        config: SchedulerConfig,
        store: Arc<JobStore>,
        engine: Box<dyn SttEngine>,
        loader: Arc<dyn AudioLoader>,
        event_tx: mpsc::Sender<JobEvent>,
    ) -> Result<Self, AppError> {
        // 推論呼び出し用の tokio ランタイム（ワーカースレッド専用）
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| AppError::internal(format!("tokio ランタイム作成に失敗: {e}")))?;

        log::info!("Starting scheduler with engine {}", engine.name());
        let shared = Arc::new(Shared {
            config,
            store,
            queue: JobQueue::new(),
            gate: PreemptGate::new(),
            engine: Mutex::new(engine),
            loader,
            event_tx,
            stop: AtomicBool::new(false),
        });

        let scheduler = Self {
            shared: shared.clone(),
            worker: Mutex::new(None),
            closed: AtomicBool::new(false),
        };
        scheduler.restore_pending_jobs()?;
        if let Err(e) = scheduler.cleanup_finished(scheduler.shared.config.retention_days) {
            log::warn!("Retention sweep failed: {e}");
        }

        let (done_tx, done_rx) = mpsc::channel();
        let thread = thread::Builder::new()
            .name("transcription-worker".to_string())
            .spawn(move || worker::run(shared, rt, done_tx))
            .map_err(|e| AppError::internal(format!("ワーカースレッド起動に失敗: {e}")))?;
        *scheduler.worker.lock() = Some(WorkerHandle { thread, done_rx });

        Ok(scheduler)
    }

    // ==================== Submission ====================

    /// push-to-talk ジョブ（HIGH、チャンク分割なし、インメモリ）
    pub fn submit_interactive(
        &self,
        audio: AudioBuffer,
        language: Option<String>,
        settings: DecodingSettings,
    ) -> Result<String, AppError> {
        self.submit_interactive_with(audio, language, settings, JobCallbacks::default())
    }

    pub fn submit_interactive_with(
        &self,
        audio: AudioBuffer,
        language: Option<String>,
        settings: DecodingSettings,
        callbacks: JobCallbacks,
    ) -> Result<String, AppError> {
        self.ensure_open()?;
        let record = JobRecord::new(
            new_job_id(JobPriority::High),
            JobPriority::High,
            None,
            language,
            settings,
            now(),
        );
        let job_id = record.id.clone();

        // インメモリジョブは再開できないので、永続化の失敗は致命的ではない
        if let Err(e) = self.shared.store.insert_job(&record) {
            log::warn!("Failed to persist PTT job to database: {e}");
        }

        self.shared
            .queue
            .push(QueuedJob::new(record, JobSource::Memory(audio)).with_callbacks(callbacks));

        let active = self.shared.queue.active();
        if active.map_or(true, |a| a.priority != JobPriority::High) {
            log::info!("Requesting preemption of running job for HIGH priority job {job_id}");
            self.shared.gate.request_preemption();
        }

        log::info!("Submitted PTT job {job_id}");
        Ok(job_id)
    }

    /// ファイル文字起こしジョブ（NORMAL: 単発, LOW: バッチ）
    pub fn submit_file(
        &self,
        path: impl Into<PathBuf>,
        language: Option<String>,
        settings: DecodingSettings,
        priority: JobPriority,
    ) -> Result<String, AppError> {
        self.submit_file_with(path, language, settings, priority, JobCallbacks::default())
    }

    pub fn submit_file_with(
        &self,
        path: impl Into<PathBuf>,
        language: Option<String>,
        settings: DecodingSettings,
        priority: JobPriority,
        callbacks: JobCallbacks,
    ) -> Result<String, AppError> {
        self.ensure_open()?;
        if priority == JobPriority::High {
            return Err(AppError::invalid_state(
                "HIGH priority is reserved for interactive jobs",
            ));
        }

        let path = path.into();
        let record = JobRecord::new(
            new_job_id(priority),
            priority,
            Some(path.to_string_lossy().to_string()),
            language,
            settings,
            now(),
        );
        let job_id = record.id.clone();

        self.shared.store.insert_job(&record)?;
        self.shared
            .queue
            .push(QueuedJob::new(record, JobSource::File(path)).with_callbacks(callbacks));

        log::info!("Submitted file job {job_id} (priority={priority:?})");
        Ok(job_id)
    }

    /// 複数ファイルを LOW 優先度でまとめて投入する
    pub fn submit_batch<P: Into<PathBuf>>(
        &self,
        paths: impl IntoIterator<Item = P>,
        language: Option<String>,
        settings: DecodingSettings,
    ) -> Result<Vec<String>, AppError> {
        let job_ids = paths
            .into_iter()
            .map(|path| {
                self.submit_file(path, language.clone(), settings.clone(), JobPriority::Low)
            })
            .collect::<Result<Vec<_>, _>>()?;

        log::info!("Submitted batch of {} file jobs", job_ids.len());
        Ok(job_ids)
    }

    // ==================== Control ====================

    /// ジョブを取り消す（ベストエフォート）
    ///
    /// 待機中ならその場で CANCELLED。実行中なら次のチャンク境界で止まる。
    /// 取り消し対象が無ければ false。
    pub fn cancel(&self, job_id: &str) -> Result<bool, AppError> {
        match self.shared.queue.cancel(job_id) {
            CancelOutcome::Removed(_) => {
                self.shared.store.mark_cancelled(job_id, &now())?;
                log::info!("Cancelled queued job {job_id}");
                self.shared.emit(JobEvent::Cancelled {
                    job_id: job_id.to_string(),
                });
                Ok(true)
            }
            CancelOutcome::Signalled => {
                log::info!("Cancelling running job {job_id}");
                Ok(true)
            }
            // メモリ上に無いがストア上は未完了（shutdown 後など）
            CancelOutcome::NotFound => {
                let cancelled = self.shared.store.mark_cancelled(job_id, &now())?;
                if cancelled {
                    self.shared.emit(JobEvent::Cancelled {
                        job_id: job_id.to_string(),
                    });
                }
                Ok(cancelled)
            }
        }
    }

    /// FAILED ジョブを同じIDで PENDING に戻し、元のパラメータで再投入する
    pub fn retry(&self, job_id: &str, mode: RetryMode) -> Result<String, AppError> {
        self.ensure_open()?;
        let record = self
            .shared
            .store
            .get_job(job_id)?
            .ok_or_else(|| AppError::not_found(format!("job {job_id} not found")))?;

        if record.status != JobStatus::Failed {
            return Err(AppError::invalid_state(format!(
                "job {job_id} is not in FAILED state (status={})",
                record.status.as_str()
            )));
        }
        let Some(path) = record.file_path.clone() else {
            return Err(AppError::invalid_state(format!(
                "job {job_id} has no durable audio source"
            )));
        };

        let resume_from = match mode {
            RetryMode::Restart => 0,
            RetryMode::Resume => self.shared.store.contiguous_chunk_count(job_id)?,
        };
        // 同時 retry では先にリセットした側だけが再投入する
        if !self.shared.store.reset_for_retry(job_id, resume_from)? {
            return Err(AppError::invalid_state(format!(
                "job {job_id} is no longer in FAILED state"
            )));
        }

        let mut record = record;
        record.status = JobStatus::Pending;
        record.completed_chunks = resume_from;
        record.current_chunk_index = resume_from;
        record.error_message = None;
        record.result_text = None;
        record.result_segments = None;
        record.completed_at = None;

        self.shared
            .queue
            .push(QueuedJob::new(record, JobSource::File(PathBuf::from(path))));

        log::info!("Retrying job {job_id} from chunk {resume_from}");
        Ok(job_id.to_string())
    }

    /// ワーカーを停止する。実行中のチャンクジョブはチェックポイントされる。
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        let Some(handle) = self.worker.lock().take() else {
            return;
        };

        log::info!("Shutting down scheduler");
        self.shared.stop.store(true, Ordering::Release);
        self.shared.queue.wake_all();
        self.shared.gate.release();

        match handle
            .done_rx
            .recv_timeout(self.shared.config.shutdown_timeout())
        {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                if handle.thread.join().is_err() {
                    log::error!("Worker thread panicked");
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                log::warn!(
                    "Worker did not stop within {:?}; detaching",
                    self.shared.config.shutdown_timeout()
                );
            }
        }
    }

    // ==================== Queries ====================

    pub fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>, AppError> {
        self.shared.store.get_job(job_id)
    }

    pub fn list_jobs(&self, status: Option<JobStatus>) -> Result<Vec<JobRecord>, AppError> {
        self.shared.store.list_jobs(status)
    }

    pub fn get_job_chunks(&self, job_id: &str) -> Result<Vec<ChunkRecord>, AppError> {
        self.shared.store.get_job_chunks(job_id)
    }

    /// エンジンを使用中のジョブ
    pub fn current_job(&self) -> Option<ActiveJob> {
        self.shared.queue.active()
    }

    pub fn pending_count(&self) -> usize {
        self.shared.queue.len()
    }

    // ==================== Data cleanup ====================

    /// 終端ジョブを削除する（実行待ち・実行中のジョブは対象外）
    pub fn delete_job(&self, job_id: &str) -> Result<bool, AppError> {
        match self.shared.store.get_job(job_id)? {
            Some(record) if !record.status.is_terminal() => Err(AppError::invalid_state(format!(
                "job {job_id} is still {}",
                record.status.as_str()
            ))),
            Some(_) => self.shared.store.delete_job(job_id),
            None => Ok(false),
        }
    }

    /// 保持期間を過ぎた終端ジョブをチャンクごと削除する（0=無期限）
    pub fn cleanup_finished(&self, retention_days: u32) -> Result<u32, AppError> {
        if retention_days == 0 {
            return Ok(0);
        }
        let cutoff = chrono::Utc::now() - chrono::Duration::days(i64::from(retention_days));
        let deleted = self
            .shared
            .store
            .delete_finished_before(&cutoff.to_rfc3339())?;
        log::info!("Retention sweep removed {deleted} finished jobs");
        Ok(deleted)
    }

    // ==================== Recovery ====================

    /// 起動時に PENDING / PAUSED（と処理中に落ちた RUNNING）ジョブを再投入する
    fn restore_pending_jobs(&self) -> Result<(), AppError> {
        let records = self.shared.store.get_recoverable_jobs()?;
        if records.is_empty() {
            log::info!("No pending jobs to restore");
            return Ok(());
        }

        let mut restored = 0usize;
        for mut record in records {
            let Some(path) = record.file_path.clone() else {
                // インメモリ音声は失われているので復元できない
                log::info!("Dropping unrecoverable in-memory job {}", record.id);
                self.shared.store.mark_cancelled(&record.id, &now())?;
                continue;
            };

            let persisted = self.shared.store.contiguous_chunk_count(&record.id)?;
            let resume_from = record.current_chunk_index.max(persisted);
            if record.status == JobStatus::Running || resume_from != record.current_chunk_index {
                self.shared.store.save_checkpoint(&record.id, resume_from)?;
                record.status = JobStatus::Paused;
            }
            record.current_chunk_index = resume_from;
            record.completed_chunks = record.completed_chunks.max(resume_from);

            log::info!("Restored job {} at chunk {resume_from}", record.id);
            self.shared
                .queue
                .push(QueuedJob::new(record, JobSource::File(PathBuf::from(path))));
            restored += 1;
        }

        log::info!("Restored {restored} pending jobs");
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), AppError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(AppError::shutdown("scheduler is shut down"));
        }
        Ok(())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
