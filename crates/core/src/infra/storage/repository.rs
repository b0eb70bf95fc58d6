use std::path::PathBuf;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::domain::error::AppError;
use crate::domain::job::{ChunkRecord, JobPriority, JobRecord, JobStatus, TranscriptSegment};
use crate::domain::settings::DecodingSettings;

const JOB_COLUMNS: &str = "id, priority, status, file_path, language, settings,
     total_chunks, completed_chunks, current_chunk_index,
     result_text, result_segments, error_message,
     created_at, started_at, completed_at";

/// SQLiteジョブストア（jobs + job_chunks）
///
/// 呼び出し側スレッドとワーカーから同時に使われるため、接続は Mutex で保護する。
pub struct JobStore {
    conn: Mutex<Connection>,
}

impl JobStore {
    /// 新規接続（ファイルパス指定）
    pub fn open(path: &str) -> Result<Self, AppError> {
        let conn = Connection::open(path)
            .map_err(|e| AppError::storage(format!("DB接続に失敗: {e}")))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// in-memory DB（テスト用）
    pub fn open_in_memory() -> Result<Self, AppError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AppError::storage(format!("in-memory DB作成に失敗: {e}")))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// デフォルトの DB パスで開く（親ディレクトリは必要なら作成）
    pub fn open_default() -> Result<Self, AppError> {
        let path = Self::default_path();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .map_err(|e| AppError::storage(format!("DBディレクトリ作成に失敗: {e}")))?;
        }
        Self::open(&path.to_string_lossy())
    }

    /// デフォルトの DB パス（`TQ_DB_PATH` で上書き可能）
    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var("TQ_DB_PATH") {
            return PathBuf::from(path);
        }
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tq")
            .join("jobs.db")
    }

    /// スキーママイグレーション
    fn migrate(&self) -> Result<(), AppError> {
        self.conn
            .lock()
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS jobs (
                    id                  TEXT PRIMARY KEY,
                    priority            INTEGER NOT NULL,
                    status              TEXT NOT NULL DEFAULT 'pending',
                    file_path           TEXT,
                    language            TEXT,
                    settings            TEXT NOT NULL DEFAULT '{}',
                    total_chunks        INTEGER NOT NULL DEFAULT 0,
                    completed_chunks    INTEGER NOT NULL DEFAULT 0,
                    current_chunk_index INTEGER NOT NULL DEFAULT 0,
                    result_text         TEXT,
                    result_segments     TEXT,
                    error_message       TEXT,
                    created_at          TEXT NOT NULL,
                    started_at          TEXT,
                    completed_at        TEXT
                );

                CREATE INDEX IF NOT EXISTS idx_jobs_status
                    ON jobs(status);
                CREATE INDEX IF NOT EXISTS idx_jobs_created
                    ON jobs(created_at);

                CREATE TABLE IF NOT EXISTS job_chunks (
                    job_id      TEXT NOT NULL,
                    chunk_index INTEGER NOT NULL,
                    text        TEXT NOT NULL DEFAULT '',
                    start_time  REAL NOT NULL,
                    end_time    REAL NOT NULL,
                    segments    TEXT NOT NULL DEFAULT '[]',
                    created_at  TEXT NOT NULL,
                    PRIMARY KEY (job_id, chunk_index)
                );
                ",
            )
            .map_err(|e| AppError::storage(format!("マイグレーション失敗: {e}")))?;
        Ok(())
    }

    // --- Jobs ---

    pub fn insert_job(&self, job: &JobRecord) -> Result<(), AppError> {
        let settings = job
            .settings
            .to_json()
            .map_err(|e| AppError::internal(format!("settings serialize: {e}")))?;
        let segments = match &job.result_segments {
            Some(segs) => Some(
                serde_json::to_string(segs)
                    .map_err(|e| AppError::internal(format!("segments serialize: {e}")))?,
            ),
            None => None,
        };

        self.conn
            .lock()
            .execute(
                "INSERT INTO jobs (id, priority, status, file_path, language, settings,
                                   total_chunks, completed_chunks, current_chunk_index,
                                   result_text, result_segments, error_message,
                                   created_at, started_at, completed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                params![
                    job.id,
                    job.priority.as_i64(),
                    job.status.as_str(),
                    job.file_path,
                    job.language,
                    settings,
                    job.total_chunks,
                    job.completed_chunks,
                    job.current_chunk_index,
                    job.result_text,
                    segments,
                    job.error_message,
                    job.created_at,
                    job.started_at,
                    job.completed_at,
                ],
            )
            .map_err(|e| AppError::storage(format!("ジョブ挿入失敗: {e}")))?;
        Ok(())
    }

    pub fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>, AppError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"))
            .map_err(|e| AppError::storage(format!("クエリ準備失敗: {e}")))?;

        let job = stmt
            .query_row(params![job_id], Self::map_job_row)
            .optional()
            .map_err(|e| AppError::storage(format!("行読み取り失敗: {e}")))?;
        Ok(job)
    }

    /// ジョブ一覧（作成順）。status 指定時はその状態のみ。
    pub fn list_jobs(&self, status: Option<JobStatus>) -> Result<Vec<JobRecord>, AppError> {
        let conn = self.conn.lock();
        let jobs = if let Some(status) = status {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {JOB_COLUMNS} FROM jobs WHERE status = ?1 ORDER BY created_at, rowid"
                ))
                .map_err(|e| AppError::storage(format!("クエリ準備失敗: {e}")))?;
            let rows = stmt
                .query_map(params![status.as_str()], Self::map_job_row)
                .map_err(|e| AppError::storage(format!("クエリ実行失敗: {e}")))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| AppError::storage(format!("行読み取り失敗: {e}")))?;
            rows
        } else {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at, rowid"
                ))
                .map_err(|e| AppError::storage(format!("クエリ準備失敗: {e}")))?;
            let rows = stmt
                .query_map([], Self::map_job_row)
                .map_err(|e| AppError::storage(format!("クエリ実行失敗: {e}")))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| AppError::storage(format!("行読み取り失敗: {e}")))?;
            rows
        };
        Ok(jobs)
    }

    /// 起動時の復元対象（PENDING / PAUSED / RUNNING）を優先度・投入順で返す
    ///
    /// RUNNING はプロセスが処理中に終了したジョブ。
    pub fn get_recoverable_jobs(&self) -> Result<Vec<JobRecord>, AppError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {JOB_COLUMNS} FROM jobs
                 WHERE status IN ('pending', 'paused', 'running')
                 ORDER BY priority, created_at, rowid"
            ))
            .map_err(|e| AppError::storage(format!("クエリ準備失敗: {e}")))?;

        let jobs = stmt
            .query_map([], Self::map_job_row)
            .map_err(|e| AppError::storage(format!("クエリ実行失敗: {e}")))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| AppError::storage(format!("行読み取り失敗: {e}")))?;
        Ok(jobs)
    }

    /// RUNNING に遷移。started_at は初回のみ記録する。
    pub fn mark_running(&self, job_id: &str, now: &str) -> Result<(), AppError> {
        self.conn
            .lock()
            .execute(
                "UPDATE jobs SET status = 'running', started_at = COALESCE(started_at, ?1)
                 WHERE id = ?2",
                params![now, job_id],
            )
            .map_err(|e| AppError::storage(format!("ジョブ状態更新失敗: {e}")))?;
        Ok(())
    }

    pub fn set_total_chunks(&self, job_id: &str, total_chunks: u32) -> Result<(), AppError> {
        self.conn
            .lock()
            .execute(
                "UPDATE jobs SET total_chunks = ?1 WHERE id = ?2",
                params![total_chunks, job_id],
            )
            .map_err(|e| AppError::storage(format!("チャンク数更新失敗: {e}")))?;
        Ok(())
    }

    pub fn record_progress(
        &self,
        job_id: &str,
        completed_chunks: u32,
        current_chunk_index: u32,
    ) -> Result<(), AppError> {
        self.conn
            .lock()
            .execute(
                "UPDATE jobs SET completed_chunks = ?1, current_chunk_index = ?2 WHERE id = ?3",
                params![completed_chunks, current_chunk_index, job_id],
            )
            .map_err(|e| AppError::storage(format!("進捗更新失敗: {e}")))?;
        Ok(())
    }

    /// チェックポイント: PAUSED + 再開位置を記録
    pub fn save_checkpoint(&self, job_id: &str, chunk_index: u32) -> Result<(), AppError> {
        self.conn
            .lock()
            .execute(
                "UPDATE jobs SET status = 'paused', current_chunk_index = ?1 WHERE id = ?2",
                params![chunk_index, job_id],
            )
            .map_err(|e| AppError::storage(format!("チェックポイント保存失敗: {e}")))?;
        Ok(())
    }

    pub fn mark_completed(
        &self,
        job_id: &str,
        text: &str,
        segments: &[TranscriptSegment],
        now: &str,
    ) -> Result<(), AppError> {
        let segments = serde_json::to_string(segments)
            .map_err(|e| AppError::internal(format!("segments serialize: {e}")))?;
        self.conn
            .lock()
            .execute(
                "UPDATE jobs SET status = 'completed', result_text = ?1, result_segments = ?2,
                                 error_message = NULL, completed_at = ?3
                 WHERE id = ?4",
                params![text, segments, now, job_id],
            )
            .map_err(|e| AppError::storage(format!("ジョブ完了更新失敗: {e}")))?;
        Ok(())
    }

    /// 非終端ジョブを FAILED にする。更新されたら true（終端ジョブは変更しない）。
    pub fn mark_failed(&self, job_id: &str, error: &str, now: &str) -> Result<bool, AppError> {
        let affected = self
            .conn
            .lock()
            .execute(
                "UPDATE jobs SET status = 'failed', error_message = ?1, completed_at = ?2
                 WHERE id = ?3 AND status NOT IN ('completed', 'failed', 'cancelled')",
                params![error, now, job_id],
            )
            .map_err(|e| AppError::storage(format!("ジョブ失敗更新失敗: {e}")))?;
        Ok(affected > 0)
    }

    /// 非終端ジョブを CANCELLED にする。更新されたら true。
    pub fn mark_cancelled(&self, job_id: &str, now: &str) -> Result<bool, AppError> {
        let affected = self
            .conn
            .lock()
            .execute(
                "UPDATE jobs SET status = 'cancelled', completed_at = ?1
                 WHERE id = ?2 AND status IN ('pending', 'running', 'paused')",
                params![now, job_id],
            )
            .map_err(|e| AppError::storage(format!("ジョブ取消更新失敗: {e}")))?;
        Ok(affected > 0)
    }

    /// FAILED ジョブを再実行のため PENDING に戻す。resume_from より前のチャンクは完了扱い。
    ///
    /// FAILED 以外なら何もせず false。
    pub fn reset_for_retry(&self, job_id: &str, resume_from: u32) -> Result<bool, AppError> {
        let affected = self
            .conn
            .lock()
            .execute(
                "UPDATE jobs SET status = 'pending', completed_chunks = ?1, current_chunk_index = ?1,
                                 result_text = NULL, result_segments = NULL,
                                 error_message = NULL, completed_at = NULL
                 WHERE id = ?2 AND status = 'failed'",
                params![resume_from, job_id],
            )
            .map_err(|e| AppError::storage(format!("ジョブリセット失敗: {e}")))?;
        Ok(affected > 0)
    }

    // --- Chunks ---

    /// チャンク結果を保存する。同じ (job_id, chunk_index) は上書き。
    pub fn upsert_chunk(&self, chunk: &ChunkRecord) -> Result<(), AppError> {
        let segments = serde_json::to_string(&chunk.segments)
            .map_err(|e| AppError::internal(format!("segments serialize: {e}")))?;
        self.conn
            .lock()
            .execute(
                "INSERT INTO job_chunks (job_id, chunk_index, text, start_time, end_time, segments, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(job_id, chunk_index) DO UPDATE SET
                    text = excluded.text,
                    start_time = excluded.start_time,
                    end_time = excluded.end_time,
                    segments = excluded.segments,
                    created_at = excluded.created_at",
                params![
                    chunk.job_id,
                    chunk.chunk_index,
                    chunk.text,
                    chunk.start_time,
                    chunk.end_time,
                    segments,
                    chunk.created_at,
                ],
            )
            .map_err(|e| AppError::storage(format!("チャンク保存失敗: {e}")))?;
        Ok(())
    }

    pub fn get_job_chunks(&self, job_id: &str) -> Result<Vec<ChunkRecord>, AppError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT job_id, chunk_index, text, start_time, end_time, segments, created_at
                 FROM job_chunks WHERE job_id = ?1 ORDER BY chunk_index",
            )
            .map_err(|e| AppError::storage(format!("クエリ準備失敗: {e}")))?;

        let chunks = stmt
            .query_map(params![job_id], |row| {
                let segments: String = row.get(5)?;
                Ok(ChunkRecord {
                    job_id: row.get(0)?,
                    chunk_index: row.get(1)?,
                    text: row.get(2)?,
                    start_time: row.get(3)?,
                    end_time: row.get(4)?,
                    segments: serde_json::from_str(&segments).unwrap_or_default(),
                    created_at: row.get(6)?,
                })
            })
            .map_err(|e| AppError::storage(format!("クエリ実行失敗: {e}")))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| AppError::storage(format!("行読み取り失敗: {e}")))?;
        Ok(chunks)
    }

    /// 0 から欠番なく続くチャンク数
    pub fn contiguous_chunk_count(&self, job_id: &str) -> Result<u32, AppError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT chunk_index FROM job_chunks WHERE job_id = ?1 ORDER BY chunk_index")
            .map_err(|e| AppError::storage(format!("クエリ準備失敗: {e}")))?;

        let indices = stmt
            .query_map(params![job_id], |row| row.get::<_, u32>(0))
            .map_err(|e| AppError::storage(format!("クエリ実行失敗: {e}")))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| AppError::storage(format!("行読み取り失敗: {e}")))?;

        Ok(indices
            .iter()
            .zip(0u32..)
            .take_while(|(idx, expected)| **idx == *expected)
            .count() as u32)
    }

    // --- Data cleanup ---

    /// ジョブとそのチャンクを削除する
    pub fn delete_job(&self, job_id: &str) -> Result<bool, AppError> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| AppError::storage(format!("トランザクション開始失敗: {e}")))?;
        tx.execute("DELETE FROM job_chunks WHERE job_id = ?1", params![job_id])
            .map_err(|e| AppError::storage(format!("チャンク削除失敗: {e}")))?;
        let affected = tx
            .execute("DELETE FROM jobs WHERE id = ?1", params![job_id])
            .map_err(|e| AppError::storage(format!("ジョブ削除失敗: {e}")))?;
        tx.commit()
            .map_err(|e| AppError::storage(format!("コミット失敗: {e}")))?;
        Ok(affected > 0)
    }

    /// 保持期間切れの終端ジョブをチャンクごと削除する
    pub fn delete_finished_before(&self, before_date: &str) -> Result<u32, AppError> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| AppError::storage(format!("トランザクション開始失敗: {e}")))?;
        let finished = "SELECT id FROM jobs
                        WHERE status IN ('completed', 'failed', 'cancelled')
                          AND COALESCE(completed_at, created_at) < ?1";
        tx.execute(
            &format!("DELETE FROM job_chunks WHERE job_id IN ({finished})"),
            params![before_date],
        )
        .map_err(|e| AppError::storage(format!("チャンク削除失敗: {e}")))?;
        let affected = tx
            .execute(
                &format!("DELETE FROM jobs WHERE id IN ({finished})"),
                params![before_date],
            )
            .map_err(|e| AppError::storage(format!("ジョブ削除失敗: {e}")))?;
        tx.commit()
            .map_err(|e| AppError::storage(format!("コミット失敗: {e}")))?;
        Ok(affected as u32)
    }

    fn map_job_row(row: &rusqlite::Row) -> rusqlite::Result<JobRecord> {
        let priority: i64 = row.get(1)?;
        let status: String = row.get(2)?;
        let settings: String = row.get(5)?;
        let segments: Option<String> = row.get(10)?;

        Ok(JobRecord {
            id: row.get(0)?,
            priority: JobPriority::from_i64(priority).unwrap_or(JobPriority::Low),
            status: JobStatus::parse(&status).unwrap_or(JobStatus::Failed),
            file_path: row.get(3)?,
            language: row.get(4)?,
            settings: DecodingSettings::from_json(&settings),
            total_chunks: row.get(6)?,
            completed_chunks: row.get(7)?,
            current_chunk_index: row.get(8)?,
            result_text: row.get(9)?,
            result_segments: segments.and_then(|s| serde_json::from_str(&s).ok()),
            error_message: row.get(11)?,
            created_at: row.get(12)?,
            started_at: row.get(13)?,
            completed_at: row.get(14)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> String {
        "2025-01-15T10:30:00Z".to_string()
    }

    fn file_job(id: &str, priority: JobPriority, created_at: &str) -> JobRecord {
        JobRecord::new(
            id.to_string(),
            priority,
            Some(format!("/audio/{id}.wav")),
            Some("ja".to_string()),
            DecodingSettings::default(),
            created_at.to_string(),
        )
    }

    fn chunk(job_id: &str, index: u32, text: &str) -> ChunkRecord {
        ChunkRecord {
            job_id: job_id.to_string(),
            chunk_index: index,
            text: text.to_string(),
            start_time: index as f64 * 30.0,
            end_time: (index + 1) as f64 * 30.0,
            segments: vec![TranscriptSegment {
                start: index as f64 * 30.0,
                end: index as f64 * 30.0 + 1.0,
                text: text.to_string(),
            }],
            created_at: now(),
        }
    }

    #[test]
    fn test_insert_and_get_job() {
        let store = JobStore::open_in_memory().unwrap();
        let mut job = file_job("j1", JobPriority::Normal, &now());
        job.settings.beam_size = Some(5);
        store.insert_job(&job).unwrap();

        let loaded = store.get_job("j1").unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Pending);
        assert_eq!(loaded.priority, JobPriority::Normal);
        assert_eq!(loaded.file_path.as_deref(), Some("/audio/j1.wav"));
        assert_eq!(loaded.language.as_deref(), Some("ja"));
        assert_eq!(loaded.settings.beam_size, Some(5));
        assert!(loaded.started_at.is_none());
    }

    #[test]
    fn test_get_nonexistent_job() {
        let store = JobStore::open_in_memory().unwrap();
        assert!(store.get_job("nonexistent").unwrap().is_none());
    }

    #[test]
    fn test_lifecycle_updates() {
        let store = JobStore::open_in_memory().unwrap();
        store.insert_job(&file_job("j1", JobPriority::Low, &now())).unwrap();

        store.mark_running("j1", "2025-01-15T10:31:00Z").unwrap();
        store.set_total_chunks("j1", 3).unwrap();
        store.record_progress("j1", 1, 1).unwrap();
        store.save_checkpoint("j1", 1).unwrap();

        let paused = store.get_job("j1").unwrap().unwrap();
        assert_eq!(paused.status, JobStatus::Paused);
        assert_eq!(paused.total_chunks, 3);
        assert_eq!(paused.current_chunk_index, 1);

        // 再開時に started_at は上書きされない
        store.mark_running("j1", "2025-01-15T10:40:00Z").unwrap();
        let resumed = store.get_job("j1").unwrap().unwrap();
        assert_eq!(resumed.started_at.as_deref(), Some("2025-01-15T10:31:00Z"));

        let segs = vec![TranscriptSegment {
            start: 0.0,
            end: 1.0,
            text: "a".into(),
        }];
        store
            .mark_completed("j1", "a b c", &segs, "2025-01-15T10:45:00Z")
            .unwrap();
        let done = store.get_job("j1").unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.result_text.as_deref(), Some("a b c"));
        assert_eq!(done.result_segments, Some(segs));
    }

    #[test]
    fn test_mark_failed_and_reset() {
        let store = JobStore::open_in_memory().unwrap();
        store.insert_job(&file_job("j1", JobPriority::Normal, &now())).unwrap();
        store.record_progress("j1", 2, 2).unwrap();
        assert!(store.mark_failed("j1", "engine crashed", &now()).unwrap());

        let failed = store.get_job("j1").unwrap().unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("engine crashed"));

        assert!(store.reset_for_retry("j1", 0).unwrap());
        let reset = store.get_job("j1").unwrap().unwrap();
        assert_eq!(reset.status, JobStatus::Pending);
        assert_eq!(reset.current_chunk_index, 0);
        assert_eq!(reset.completed_chunks, 0);
        assert!(reset.error_message.is_none());

        // 2 回目は FAILED ではないので何もしない（同時 retry の二重投入防止）
        assert!(!store.reset_for_retry("j1", 0).unwrap());
    }

    #[test]
    fn test_mark_failed_keeps_terminal_status() {
        let store = JobStore::open_in_memory().unwrap();
        store.insert_job(&file_job("done", JobPriority::Normal, &now())).unwrap();
        store.insert_job(&file_job("cancelled", JobPriority::Normal, &now())).unwrap();
        store.mark_completed("done", "text", &[], &now()).unwrap();
        store.mark_cancelled("cancelled", &now()).unwrap();

        assert!(!store.mark_failed("done", "late error", &now()).unwrap());
        assert!(!store.mark_failed("cancelled", "late error", &now()).unwrap());

        let done = store.get_job("done").unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert!(done.error_message.is_none());
        assert_eq!(
            store.get_job("cancelled").unwrap().unwrap().status,
            JobStatus::Cancelled
        );
    }

    #[test]
    fn test_mark_cancelled_only_non_terminal() {
        let store = JobStore::open_in_memory().unwrap();
        store.insert_job(&file_job("j1", JobPriority::Normal, &now())).unwrap();
        store.insert_job(&file_job("j2", JobPriority::Normal, &now())).unwrap();
        store.mark_completed("j2", "done", &[], &now()).unwrap();

        assert!(store.mark_cancelled("j1", &now()).unwrap());
        assert!(!store.mark_cancelled("j1", &now()).unwrap()); // already cancelled
        assert!(!store.mark_cancelled("j2", &now()).unwrap());
        assert_eq!(
            store.get_job("j2").unwrap().unwrap().status,
            JobStatus::Completed
        );
    }

    #[test]
    fn test_upsert_chunk_overwrites() {
        let store = JobStore::open_in_memory().unwrap();
        store.upsert_chunk(&chunk("j1", 0, "first")).unwrap();
        store.upsert_chunk(&chunk("j1", 1, "second")).unwrap();
        // 同じキーで再書き込み（重複再開）
        store.upsert_chunk(&chunk("j1", 1, "second again")).unwrap();

        let chunks = store.get_job_chunks("j1").unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].text, "second again");
        assert_eq!(chunks[1].start_time, 30.0);
        assert_eq!(chunks[1].segments.len(), 1);
    }

    #[test]
    fn test_contiguous_chunk_count_stops_at_gap() {
        let store = JobStore::open_in_memory().unwrap();
        assert_eq!(store.contiguous_chunk_count("j1").unwrap(), 0);

        store.upsert_chunk(&chunk("j1", 0, "a")).unwrap();
        store.upsert_chunk(&chunk("j1", 1, "b")).unwrap();
        store.upsert_chunk(&chunk("j1", 3, "d")).unwrap();
        assert_eq!(store.contiguous_chunk_count("j1").unwrap(), 2);
    }

    #[test]
    fn test_recoverable_jobs_ordering() {
        let store = JobStore::open_in_memory().unwrap();
        store
            .insert_job(&file_job("low", JobPriority::Low, "2025-01-15T10:00:00Z"))
            .unwrap();
        store
            .insert_job(&file_job("normal_late", JobPriority::Normal, "2025-01-15T10:02:00Z"))
            .unwrap();
        store
            .insert_job(&file_job("normal_early", JobPriority::Normal, "2025-01-15T10:01:00Z"))
            .unwrap();
        store
            .insert_job(&file_job("done", JobPriority::High, "2025-01-15T09:00:00Z"))
            .unwrap();
        store.mark_completed("done", "", &[], &now()).unwrap();
        store.save_checkpoint("low", 2).unwrap();

        let ids: Vec<String> = store
            .get_recoverable_jobs()
            .unwrap()
            .into_iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(ids, vec!["normal_early", "normal_late", "low"]);
    }

    #[test]
    fn test_list_jobs_by_status() {
        let store = JobStore::open_in_memory().unwrap();
        store.insert_job(&file_job("j1", JobPriority::Low, &now())).unwrap();
        store.insert_job(&file_job("j2", JobPriority::Low, &now())).unwrap();
        store.mark_failed("j2", "boom", &now()).unwrap();

        assert_eq!(store.list_jobs(None).unwrap().len(), 2);
        let failed = store.list_jobs(Some(JobStatus::Failed)).unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, "j2");
    }

    #[test]
    fn test_delete_job_removes_chunks() {
        let store = JobStore::open_in_memory().unwrap();
        store.insert_job(&file_job("j1", JobPriority::Low, &now())).unwrap();
        store.upsert_chunk(&chunk("j1", 0, "a")).unwrap();

        assert!(store.delete_job("j1").unwrap());
        assert!(!store.delete_job("j1").unwrap()); // already deleted
        assert!(store.get_job_chunks("j1").unwrap().is_empty());
    }

    #[test]
    fn test_delete_finished_before() {
        let store = JobStore::open_in_memory().unwrap();
        store
            .insert_job(&file_job("old_done", JobPriority::Low, "2025-01-01T00:00:00Z"))
            .unwrap();
        store
            .insert_job(&file_job("old_pending", JobPriority::Low, "2025-01-01T00:00:00Z"))
            .unwrap();
        store
            .insert_job(&file_job("new_done", JobPriority::Low, "2025-06-01T00:00:00Z"))
            .unwrap();
        store
            .mark_completed("old_done", "x", &[], "2025-01-02T00:00:00Z")
            .unwrap();
        store
            .mark_completed("new_done", "y", &[], "2025-06-02T00:00:00Z")
            .unwrap();
        store.upsert_chunk(&chunk("old_done", 0, "x")).unwrap();

        let deleted = store.delete_finished_before("2025-03-01T00:00:00Z").unwrap();
        // old_done: 終端かつ古い → 削除
        // old_pending: 非終端 → 残る
        assert_eq!(deleted, 1);
        assert!(store.get_job("old_done").unwrap().is_none());
        assert!(store.get_job_chunks("old_done").unwrap().is_empty());
        assert!(store.get_job("old_pending").unwrap().is_some());
        assert!(store.get_job("new_done").unwrap().is_some());
    }

    #[test]
    fn test_open_default_honours_env_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("jobs.db");
        std::env::set_var("TQ_DB_PATH", &path);

        assert_eq!(JobStore::default_path(), path);
        let store = JobStore::open_default().unwrap();
        store.insert_job(&file_job("j1", JobPriority::Low, &now())).unwrap();
        std::env::remove_var("TQ_DB_PATH");

        assert!(path.exists());
    }

    #[test]
    fn test_open_file_persists_across_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.db");
        let path = path.to_string_lossy().to_string();

        {
            let store = JobStore::open(&path).unwrap();
            store.insert_job(&file_job("j1", JobPriority::Normal, &now())).unwrap();
            store.upsert_chunk(&chunk("j1", 0, "persisted")).unwrap();
        }

        let reopened = JobStore::open(&path).unwrap();
        assert!(reopened.get_job("j1").unwrap().is_some());
        assert_eq!(reopened.get_job_chunks("j1").unwrap()[0].text, "persisted");
    }
}
