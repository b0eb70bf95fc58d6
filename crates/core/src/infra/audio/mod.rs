pub mod chunker;

pub use chunker::{plan_chunks, ChunkSpan};

use std::path::{Path, PathBuf};

use crate::domain::error::AppError;
use crate::domain::job::AudioBuffer;

/// 音声ファイル読み込みエラー
#[derive(Debug, thiserror::Error)]
pub enum AudioLoadError {
    #[error("Audio file not found: {0}")]
    NotFound(PathBuf),
    #[error("Cannot load audio {path}: {reason}")]
    Decode { path: PathBuf, reason: String },
}

impl From<AudioLoadError> for AppError {
    fn from(e: AudioLoadError) -> Self {
        AppError::audio(e.to_string())
    }
}

/// ファイルパスを正規化済み mono f32 バッファに変換する外部コラボレータ
///
/// 返すバッファはエンジンが要求するサンプルレートであること。
pub trait AudioLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<AudioBuffer, AudioLoadError>;
}

impl<F> AudioLoader for F
where
    F: Fn(&Path) -> Result<AudioBuffer, AudioLoadError> + Send + Sync,
{
    fn load(&self, path: &Path) -> Result<AudioBuffer, AudioLoadError> {
        self(path)
    }
}
