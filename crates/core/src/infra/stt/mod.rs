mod noop;

pub use noop::NoopSttService;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::error::AppError;
use crate::domain::job::{AudioBuffer, TranscriptSegment};
use crate::domain::settings::DecodingSettings;

/// 推論エンジンの書き起こし結果
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscriptResult {
    pub text: String,
    /// 検出（または指定）された言語
    pub language: Option<String>,
    /// 入力バッファ先頭からの相対時刻
    pub segments: Vec<TranscriptSegment>,
}

/// STTエラー
#[derive(Debug, thiserror::Error)]
pub enum SttError {
    #[error("Audio format error: {0}")]
    AudioFormat(String),
    #[error("Engine not available: {0}")]
    EngineNotAvailable(String),
    #[error("Transcription failed: {0}")]
    TranscriptionFailed(String),
}

impl From<SttError> for AppError {
    fn from(e: SttError) -> Self {
        AppError::engine(e.to_string())
    }
}

/// 推論エンジン trait
///
/// 実装はリエントラントでなくてよい。スケジューラのワーカーが排他ロックを
/// 保持した状態でのみ呼び出し、呼び出し中に中断することはない。
#[async_trait]
pub trait SttEngine: Send + Sync {
    async fn transcribe(
        &self,
        audio: &AudioBuffer,
        language: Option<&str>,
        settings: &DecodingSettings,
    ) -> Result<TranscriptResult, SttError>;

    /// エンジン名 (例: "whisper.cpp")。
    fn name(&self) -> &str;
}
