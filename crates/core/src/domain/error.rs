use serde::Serialize;

/// アプリケーション共通エラーコード
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorCode {
    #[serde(rename = "E_NOT_FOUND")]
    NotFound,
    #[serde(rename = "E_INVALID_STATE")]
    InvalidState,
    #[serde(rename = "E_STORAGE")]
    Storage,
    #[serde(rename = "E_AUDIO")]
    Audio,
    #[serde(rename = "E_ENGINE")]
    Engine,
    #[serde(rename = "E_SHUTDOWN")]
    Shutdown,
    #[serde(rename = "E_INTERNAL")]
    Internal,
}

/// アプリケーションエラー（イベントペイロード兼用）
#[derive(Debug, Clone, Serialize)]
pub struct AppError {
    pub code: ErrorCode,
    pub message: String,
    pub recoverable: bool,
}

impl AppError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::NotFound,
            message: msg.into(),
            recoverable: true,
        }
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::InvalidState,
            message: msg.into(),
            recoverable: true,
        }
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::Storage,
            message: msg.into(),
            recoverable: false,
        }
    }

    pub fn audio(msg: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::Audio,
            message: msg.into(),
            recoverable: false,
        }
    }

    pub fn engine(msg: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::Engine,
            message: msg.into(),
            recoverable: true,
        }
    }

    pub fn shutdown(msg: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::Shutdown,
            message: msg.into(),
            recoverable: false,
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::Internal,
            message: msg.into(),
            recoverable: false,
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:?}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {}

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        Self::storage(e.to_string())
    }
}
