use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// スケジューラ設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// チャンク長（秒）
    pub chunk_duration_secs: f32,
    /// エンジンが要求するサンプルレート (Hz)
    pub sample_rate: u32,
    /// 空キューでの待機上限（ミリ秒）。シャットダウン確認の間隔を兼ねる。
    pub dequeue_timeout_ms: u64,
    /// チャンク境界でのプリエンプション待機上限（ミリ秒）
    pub preempt_poll_ms: u64,
    /// shutdown 時のワーカー join 待機上限（ミリ秒）
    pub shutdown_timeout_ms: u64,
    /// 終端ジョブの保持日数（0=無期限）
    pub retention_days: u32,
}

impl SchedulerConfig {
    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_millis(self.dequeue_timeout_ms)
    }

    pub fn preempt_poll(&self) -> Duration {
        Duration::from_millis(self.preempt_poll_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            chunk_duration_secs: 30.0,
            sample_rate: 16_000,
            dequeue_timeout_ms: 1000,
            preempt_poll_ms: 100,
            shutdown_timeout_ms: 5000,
            retention_days: 30,
        }
    }
}

/// デコード設定（推論エンジンにそのまま渡される）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodingSettings {
    /// ビームサーチサイズ
    #[serde(skip_serializing_if = "Option::is_none")]
    pub beam_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_of: Option<u32>,
    /// サンプリング温度 (0.0 = greedy)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_prompt: Option<String>,
    pub word_timestamps: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition_on_previous_text: Option<bool>,
    /// エンジン固有の拡張パラメータ
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl DecodingSettings {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// JSON から復元する。壊れた値はデフォルトにフォールバック。
    pub fn from_json(s: &str) -> Self {
        serde_json::from_str(s).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.chunk_duration_secs, 30.0);
        assert_eq!(config.sample_rate, 16_000);
        assert_eq!(config.preempt_poll(), Duration::from_millis(100));
    }

    #[test]
    fn test_config_partial_json_uses_defaults() {
        let config: SchedulerConfig =
            serde_json::from_str(r#"{"chunk_duration_secs": 10.0}"#).unwrap();
        assert_eq!(config.chunk_duration_secs, 10.0);
        assert_eq!(config.dequeue_timeout_ms, 1000);
    }

    #[test]
    fn test_decoding_settings_extra_passthrough() {
        let json = r#"{"beam_size": 5, "temperature": 0.0, "vad_filter": true}"#;
        let settings = DecodingSettings::from_json(json);
        assert_eq!(settings.beam_size, Some(5));
        assert_eq!(settings.temperature, Some(0.0));
        assert_eq!(
            settings.extra.get("vad_filter"),
            Some(&serde_json::Value::Bool(true))
        );

        let back = DecodingSettings::from_json(&settings.to_json().unwrap());
        assert_eq!(back, settings);
    }

    #[test]
    fn test_decoding_settings_corrupt_json_falls_back() {
        let settings = DecodingSettings::from_json("not json");
        assert_eq!(settings, DecodingSettings::default());
    }
}
