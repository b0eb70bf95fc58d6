use async_trait::async_trait;

use super::{SttEngine, SttError, TranscriptResult};
use crate::domain::job::{AudioBuffer, TranscriptSegment};
use crate::domain::settings::DecodingSettings;

/// NoopSttService: 固定文字列を返すモック実装。
/// 実エンジン未接続の環境でスケジューラを動かすためのスタブ。
pub struct NoopSttService;

#[async_trait]
impl SttEngine for NoopSttService {
    async fn transcribe(
        &self,
        audio: &AudioBuffer,
        language: Option<&str>,
        _settings: &DecodingSettings,
    ) -> Result<TranscriptResult, SttError> {
        let text = "[STT stub]".to_string();
        Ok(TranscriptResult {
            text: text.clone(),
            language: language.map(str::to_string),
            segments: vec![TranscriptSegment {
                start: 0.0,
                end: audio.duration_secs(),
                text,
            }],
        })
    }

    fn name(&self) -> &str {
        "noop"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_stt_returns_fixed_text() {
        let stt = NoopSttService;
        let result = stt
            .transcribe(
                &AudioBuffer::new(vec![0.0; 16_000], 16_000),
                Some("ja"),
                &DecodingSettings::default(),
            )
            .await
            .unwrap();

        assert!(!result.text.is_empty());
        assert_eq!(result.language.as_deref(), Some("ja"));
        assert_eq!(result.segments.len(), 1);
        assert!((result.segments[0].end - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_noop_name() {
        assert_eq!(NoopSttService.name(), "noop");
    }
}
