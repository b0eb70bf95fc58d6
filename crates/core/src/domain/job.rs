use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::settings::DecodingSettings;

/// ジョブ優先度（値が小さいほど先に処理される）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    /// Push-to-talk（他のジョブを中断させる）
    High = 0,
    /// 単一ファイルの文字起こし
    Normal = 1,
    /// バッチ文字起こし
    Low = 2,
}

impl JobPriority {
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::High),
            1 => Some(Self::Normal),
            2 => Some(Self::Low),
            _ => None,
        }
    }
}

/// ジョブ状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// 終端状態（COMPLETED / FAILED / CANCELLED）
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// ジョブの音声ソース
#[derive(Debug, Clone)]
pub enum JobSource {
    /// インメモリ音声（PTT 用、永続化されない）
    Memory(AudioBuffer),
    /// ファイルパス（再開可能）
    File(PathBuf),
}

/// 正規化済み音声 (f32, mono)
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// 音声長（秒）。sample_rate が 0 の場合は 0。
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// タイムスタンプ付きの書き起こしセグメント
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

impl TranscriptSegment {
    /// 開始・終了時刻を offset 秒だけずらす
    pub fn shifted(mut self, offset: f64) -> Self {
        self.start += offset;
        self.end += offset;
        self
    }
}

/// 永続化されたジョブレコード
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub priority: JobPriority,
    pub status: JobStatus,
    pub file_path: Option<String>,
    pub language: Option<String>,
    pub settings: DecodingSettings,
    pub total_chunks: u32,
    pub completed_chunks: u32,
    pub current_chunk_index: u32,
    pub result_text: Option<String>,
    pub result_segments: Option<Vec<TranscriptSegment>>,
    pub error_message: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

impl JobRecord {
    pub fn new(
        id: String,
        priority: JobPriority,
        file_path: Option<String>,
        language: Option<String>,
        settings: DecodingSettings,
        now: String,
    ) -> Self {
        Self {
            id,
            priority,
            status: JobStatus::Pending,
            file_path,
            language,
            settings,
            total_chunks: 0,
            completed_chunks: 0,
            current_chunk_index: 0,
            result_text: None,
            result_segments: None,
            error_message: None,
            created_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// 進捗率 (0–100)
    pub fn progress_percent(&self) -> u8 {
        if self.total_chunks == 0 {
            return 0;
        }
        let pct = self.completed_chunks.min(self.total_chunks) * 100 / self.total_chunks;
        pct as u8
    }
}

/// 永続化されたチャンク結果（(job_id, chunk_index) で一意）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub job_id: String,
    pub chunk_index: u32,
    pub text: String,
    /// 元音声の絶対時刻（秒）
    pub start_time: f64,
    pub end_time: f64,
    pub segments: Vec<TranscriptSegment>,
    pub created_at: String,
}

/// 失敗ジョブ再実行時の進捗の扱い
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryMode {
    /// チャンク 0 からやり直す（既存チャンクは上書きされる）
    Restart,
    /// 書き込み済みチャンクを残し、その続きから再開する
    Resume,
}

/// ジョブIDを生成する
pub fn new_job_id(priority: JobPriority) -> String {
    let prefix = match priority {
        JobPriority::High => "ptt",
        JobPriority::Normal | JobPriority::Low => "file",
    };
    format!("{prefix}_{}", uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(JobPriority::High < JobPriority::Normal);
        assert!(JobPriority::Normal < JobPriority::Low);
        assert_eq!(JobPriority::from_i64(2), Some(JobPriority::Low));
        assert_eq!(JobPriority::from_i64(7), None);
    }

    #[test]
    fn test_status_roundtrip_and_terminal() {
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Paused,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Paused.is_terminal());
    }

    #[test]
    fn test_progress_percent() {
        let mut record = JobRecord::new(
            "j1".into(),
            JobPriority::Normal,
            Some("/tmp/a.wav".into()),
            None,
            DecodingSettings::default(),
            "2025-01-15T10:30:00Z".into(),
        );
        assert_eq!(record.progress_percent(), 0);
        record.total_chunks = 3;
        record.completed_chunks = 1;
        assert_eq!(record.progress_percent(), 33);
        record.completed_chunks = 3;
        assert_eq!(record.progress_percent(), 100);
    }

    #[test]
    fn test_segment_shift() {
        let seg = TranscriptSegment {
            start: 1.5,
            end: 2.0,
            text: "hi".into(),
        };
        let shifted = seg.shifted(30.0);
        assert_eq!(shifted.start, 31.5);
        assert_eq!(shifted.end, 32.0);
    }

    #[test]
    fn test_job_id_prefix() {
        assert!(new_job_id(JobPriority::High).starts_with("ptt_"));
        assert!(new_job_id(JobPriority::Low).starts_with("file_"));
    }

    #[test]
    fn test_audio_duration() {
        let audio = AudioBuffer::new(vec![0.0; 8000], 16_000);
        assert!((audio.duration_secs() - 0.5).abs() < f64::EPSILON);
        assert_eq!(AudioBuffer::new(vec![0.0; 10], 0).duration_secs(), 0.0);
    }
}
