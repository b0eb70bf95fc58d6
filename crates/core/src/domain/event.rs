use serde::Serialize;

use super::job::TranscriptSegment;

/// 文字起こし結果（チャンク結合済み）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptionOutput {
    pub text: String,
    pub language: Option<String>,
    pub segments: Vec<TranscriptSegment>,
}

/// スケジューラから発行されるジョブイベント（プレゼンテーション層が購読する）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    Started {
        job_id: String,
    },
    Progress {
        job_id: String,
        percent: u8,
    },
    /// プリエンプションでチャンク境界に退避した
    Paused {
        job_id: String,
        chunk_index: u32,
    },
    Resumed {
        job_id: String,
        chunk_index: u32,
    },
    Completed {
        job_id: String,
        text: String,
        result: TranscriptionOutput,
    },
    Failed {
        job_id: String,
        error: String,
    },
    Cancelled {
        job_id: String,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> &str {
        match self {
            Self::Started { job_id }
            | Self::Progress { job_id, .. }
            | Self::Paused { job_id, .. }
            | Self::Resumed { job_id, .. }
            | Self::Completed { job_id, .. }
            | Self::Failed { job_id, .. }
            | Self::Cancelled { job_id } => job_id,
        }
    }
}

/// ジョブ単位のコールバック（イベントとは別に worker から呼ばれる）
#[derive(Default)]
pub struct JobCallbacks {
    pub on_progress: Option<Box<dyn Fn(u8) + Send + Sync>>,
    pub on_complete: Option<Box<dyn FnOnce(&TranscriptionOutput) + Send>>,
    pub on_error: Option<Box<dyn FnOnce(&str) + Send>>,
}

impl std::fmt::Debug for JobCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobCallbacks")
            .field("on_progress", &self.on_progress.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}
