use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};

use parking_lot::Mutex;

use super::job_queue::{JobQueue, QueuedJob};
use super::preempt::PreemptGate;
use crate::domain::error::AppError;
use crate::domain::event::{JobCallbacks, JobEvent, TranscriptionOutput};
use crate::domain::job::{AudioBuffer, ChunkRecord, JobPriority, JobSource, JobStatus};
use crate::domain::settings::SchedulerConfig;
use crate::infra::audio::{plan_chunks, AudioLoader};
use crate::infra::storage::JobStore;
use crate::infra::stt::SttEngine;

/// 呼び出し側スレッドとワーカーが共有する状態
pub(crate) struct Shared {
    pub config: SchedulerConfig,
    pub store: Arc<JobStore>,
    pub queue: JobQueue,
    pub gate: PreemptGate,
    /// エンジン排他ロック。保持している間だけ推論を呼べる。
    pub engine: Mutex<Box<dyn SttEngine>>,
    pub loader: Arc<dyn AudioLoader>,
    pub event_tx: mpsc::Sender<JobEvent>,
    pub stop: AtomicBool,
}

impl Shared {
    pub fn emit(&self, event: JobEvent) {
        // 受信側が居なくてもジョブ処理は続ける
        let _ = self.event_tx.send(event);
    }

    fn is_stopping(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }
}

/// 1 ジョブの処理結果
enum RunOutcome {
    Completed(TranscriptionOutput),
    /// 高優先度ジョブに譲るためチャンク境界で退避した
    Preempted { next_chunk: u32 },
    /// shutdown によりチャンク境界で退避した（再投入しない）
    Stopped { next_chunk: u32 },
    Cancelled,
}

/// ワーカーループ（専用スレッドで実行）
///
/// 推論エンジンを呼ぶのはここだけ。engine ロックで排他を保証する。
pub(crate) fn run(shared: Arc<Shared>, rt: tokio::runtime::Runtime, done_tx: mpsc::Sender<()>) {
    log::info!("Queue processing loop started");

    while !shared.is_stopping() {
        let Some(job) = shared.queue.pop_timeout(shared.config.dequeue_timeout()) else {
            continue;
        };

        // 退避直後（再投入前）に取り消されたジョブ
        if job.is_cancelled() {
            log::info!("Skipping cancelled job {}", job.id());
            shared.queue.clear_active();
            match shared.store.mark_cancelled(job.id(), &now()) {
                Ok(true) => shared.emit(JobEvent::Cancelled {
                    job_id: job.id().to_string(),
                }),
                Ok(false) => {}
                Err(e) => log::warn!("Failed to persist cancellation of job {}: {e}", job.id()),
            }
            continue;
        }

        let job_id = job.id().to_string();
        let priority = job.priority();

        let outcome = {
            let engine = shared.engine.lock();
            log::info!("Processing job {job_id} (priority={priority:?})");
            panic::catch_unwind(AssertUnwindSafe(|| {
                process_job(&shared, &rt, &**engine, job)
            }))
        };

        shared.queue.clear_active();

        if let Err(payload) = outcome {
            let detail = panic_message(payload.as_ref());
            log::error!("Error in queue processing loop for job {job_id}: {detail}");
            fail_job(&shared, &job_id, &format!("Queue error: {detail}"), None);
        }

        if priority == JobPriority::High {
            log::info!("HIGH priority job {job_id} finished, resuming paused jobs");
            shared.gate.release();
        }
    }

    log::info!("Queue processing loop stopped");
    let _ = done_tx.send(());
}

fn process_job(
    shared: &Shared,
    rt: &tokio::runtime::Runtime,
    engine: &dyn SttEngine,
    mut job: QueuedJob,
) {
    let job_id = job.id().to_string();
    let resume_at = job.record.current_chunk_index;
    let resuming = job.record.status == JobStatus::Paused || resume_at > 0;

    if let Err(e) = shared.store.mark_running(&job_id, &now()) {
        fail_job(shared, &job_id, &e.message, Some(&mut job.callbacks));
        return;
    }
    job.record.status = JobStatus::Running;
    if resuming {
        log::info!("Resuming job {job_id} at chunk {resume_at}");
        shared.emit(JobEvent::Resumed {
            job_id: job_id.clone(),
            chunk_index: resume_at,
        });
    } else {
        shared.emit(JobEvent::Started {
            job_id: job_id.clone(),
        });
    }

    let result = match &job.source {
        JobSource::Memory(audio) => transcribe_whole(shared, rt, engine, &job, audio),
        JobSource::File(path) => {
            let path = path.clone();
            match shared.loader.load(&path) {
                Ok(audio) => transcribe_chunked(shared, rt, engine, &mut job, &audio),
                Err(e) => Err(e.into()),
            }
        }
    };

    match result {
        Ok(RunOutcome::Completed(output)) => complete_job(shared, job, output),
        Ok(RunOutcome::Preempted { next_chunk }) => {
            if let Err(e) = checkpoint(shared, &mut job, next_chunk) {
                fail_job(shared, &job_id, &e.message, Some(&mut job.callbacks));
                return;
            }
            log::info!("Re-queueing paused job {job_id} to resume at chunk {next_chunk}");
            shared.queue.push(job);
        }
        Ok(RunOutcome::Stopped { next_chunk }) => {
            if let Err(e) = checkpoint(shared, &mut job, next_chunk) {
                log::warn!("Failed to checkpoint job {job_id} on shutdown: {e}");
            }
        }
        Ok(RunOutcome::Cancelled) => {
            if let Err(e) = shared.store.mark_cancelled(&job_id, &now()) {
                log::warn!("Failed to persist cancellation of job {job_id}: {e}");
            }
            log::info!("Job {job_id} cancelled");
            shared.emit(JobEvent::Cancelled { job_id });
        }
        Err(e) => {
            log::error!("Job {job_id} failed: {e}");
            fail_job(shared, &job_id, &e.message, Some(&mut job.callbacks));
        }
    }
}

/// インメモリ音声を 1 回の推論で処理する（チャンク分割なし）
fn transcribe_whole(
    shared: &Shared,
    rt: &tokio::runtime::Runtime,
    engine: &dyn SttEngine,
    job: &QueuedJob,
    audio: &AudioBuffer,
) -> Result<RunOutcome, AppError> {
    if job.is_cancelled() {
        return Ok(RunOutcome::Cancelled);
    }
    warn_on_rate_mismatch(shared, job.id(), audio);
    log::info!(
        "Transcribing {} audio samples for job {}",
        audio.samples.len(),
        job.id()
    );

    let result = rt.block_on(engine.transcribe(
        audio,
        job.record.language.as_deref(),
        &job.record.settings,
    ))?;

    // 推論中の取消は結果を破棄する
    if job.is_cancelled() {
        return Ok(RunOutcome::Cancelled);
    }

    Ok(RunOutcome::Completed(TranscriptionOutput {
        text: result.text.trim().to_string(),
        language: result.language.or_else(|| job.record.language.clone()),
        segments: result.segments,
    }))
}

/// ファイル音声をチャンクごとに処理し、境界ごとにチェックポイントする
fn transcribe_chunked(
    shared: &Shared,
    rt: &tokio::runtime::Runtime,
    engine: &dyn SttEngine,
    job: &mut QueuedJob,
    audio: &AudioBuffer,
) -> Result<RunOutcome, AppError> {
    let job_id = job.id().to_string();
    warn_on_rate_mismatch(shared, &job_id, audio);

    let spans = plan_chunks(
        audio.samples.len(),
        audio.sample_rate,
        shared.config.chunk_duration_secs,
    );
    let total = spans.len() as u32;
    shared.store.set_total_chunks(&job_id, total)?;
    job.record.total_chunks = total;

    let start = job.record.current_chunk_index.min(total);
    log::info!(
        "Job {job_id}: {:.2}s audio in {total} chunks, starting at chunk {start}",
        audio.duration_secs()
    );

    let mut detected_language = None;

    for span in &spans[start as usize..] {
        if job.is_cancelled() {
            log::info!("Job {job_id} cancelled at chunk {}/{total}", span.index);
            return Ok(RunOutcome::Cancelled);
        }
        if shared.is_stopping() {
            return Ok(RunOutcome::Stopped {
                next_chunk: span.index,
            });
        }
        if should_yield(shared, job.priority()) {
            log::info!("Job {job_id} paused at chunk {}/{total}", span.index);
            return Ok(RunOutcome::Preempted {
                next_chunk: span.index,
            });
        }

        log::debug!("Transcribing chunk {}/{total} of job {job_id}", span.index + 1);
        let chunk_audio = AudioBuffer::new(span.slice(&audio.samples).to_vec(), audio.sample_rate);
        let result = rt.block_on(engine.transcribe(
            &chunk_audio,
            job.record.language.as_deref(),
            &job.record.settings,
        ))?;

        if detected_language.is_none() {
            detected_language = result.language;
        }

        shared.store.upsert_chunk(&ChunkRecord {
            job_id: job_id.clone(),
            chunk_index: span.index,
            text: result.text.trim().to_string(),
            start_time: span.start_time,
            end_time: span.end_time,
            segments: result
                .segments
                .into_iter()
                .map(|seg| seg.shifted(span.start_time))
                .collect(),
            created_at: now(),
        })?;

        job.record.completed_chunks = span.index + 1;
        job.record.current_chunk_index = span.index + 1;
        if let Err(e) = shared.store.record_progress(
            &job_id,
            job.record.completed_chunks,
            job.record.current_chunk_index,
        ) {
            // チャンク自体は保存済みなので、復元時にはチャンク数から再開できる
            log::warn!("Failed to update progress of job {job_id}: {e}");
        }

        let percent = job.record.progress_percent();
        shared.emit(JobEvent::Progress {
            job_id: job_id.clone(),
            percent,
        });
        if let Some(on_progress) = &job.callbacks.on_progress {
            on_progress(percent);
        }
    }

    if job.is_cancelled() {
        return Ok(RunOutcome::Cancelled);
    }

    let chunks: Vec<ChunkRecord> = shared
        .store
        .get_job_chunks(&job_id)?
        .into_iter()
        .filter(|c| c.chunk_index < total)
        .collect();
    if chunks.len() as u32 != total {
        return Err(AppError::internal(format!(
            "job {job_id} has {} of {total} chunks persisted",
            chunks.len()
        )));
    }

    let text = chunks
        .iter()
        .map(|c| c.text.as_str())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    let segments = chunks.into_iter().flat_map(|c| c.segments).collect();

    Ok(RunOutcome::Completed(TranscriptionOutput {
        text,
        language: detected_language.or_else(|| job.record.language.clone()),
        segments,
    }))
}

/// チャンク境界でのプリエンプション確認
///
/// 信号が閉じていても、より優先度の高い待機ジョブが既に無ければ信号を開き直して続行する。
fn should_yield(shared: &Shared, priority: JobPriority) -> bool {
    if shared.gate.wait_open(shared.config.preempt_poll()) {
        return false;
    }
    if shared.queue.has_pending_above(priority) {
        return true;
    }
    shared.gate.release();
    false
}

fn checkpoint(shared: &Shared, job: &mut QueuedJob, next_chunk: u32) -> Result<(), AppError> {
    shared.store.save_checkpoint(job.id(), next_chunk)?;
    job.record.status = JobStatus::Paused;
    job.record.current_chunk_index = next_chunk;
    shared.emit(JobEvent::Paused {
        job_id: job.id().to_string(),
        chunk_index: next_chunk,
    });
    Ok(())
}

fn complete_job(shared: &Shared, mut job: QueuedJob, output: TranscriptionOutput) {
    let job_id = job.id().to_string();
    if let Err(e) = shared
        .store
        .mark_completed(&job_id, &output.text, &output.segments, &now())
    {
        fail_job(shared, &job_id, &e.message, Some(&mut job.callbacks));
        return;
    }

    log::info!("Job {job_id} completed ({} chars)", output.text.chars().count());
    shared.emit(JobEvent::Completed {
        job_id,
        text: output.text.clone(),
        result: output.clone(),
    });
    if let Some(on_complete) = job.callbacks.on_complete.take() {
        on_complete(&output);
    }
}

/// FAILED に遷移し、失敗イベントを発行する
fn fail_job(shared: &Shared, job_id: &str, message: &str, callbacks: Option<&mut JobCallbacks>) {
    let message = if message.is_empty() {
        "unknown error"
    } else {
        message
    };
    match shared.store.mark_failed(job_id, message, &now()) {
        Ok(true) => {}
        // 終端状態は上書きしない（完了後のコールバック panic など）
        Ok(false) if is_finished(shared, job_id) => {
            log::warn!("Job {job_id} already finished; ignoring late error: {message}");
            return;
        }
        Ok(false) => {}
        Err(e) => log::warn!("Failed to persist failure of job {job_id}: {e}"),
    }
    shared.emit(JobEvent::Failed {
        job_id: job_id.to_string(),
        error: message.to_string(),
    });
    if let Some(on_error) = callbacks.and_then(|cb| cb.on_error.take()) {
        on_error(message);
    }
}

fn is_finished(shared: &Shared, job_id: &str) -> bool {
    matches!(shared.store.get_job(job_id), Ok(Some(job)) if job.status.is_terminal())
}

fn warn_on_rate_mismatch(shared: &Shared, job_id: &str, audio: &AudioBuffer) {
    if audio.sample_rate != shared.config.sample_rate {
        log::warn!(
            "Job {job_id}: audio is {} Hz, engine expects {} Hz",
            audio.sample_rate,
            shared.config.sample_rate
        );
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

pub(crate) fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}
