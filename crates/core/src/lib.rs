//! 文字起こしジョブスケジューラ
//!
//! 優先度付きキュー・単一ワーカー・チャンク境界での協調プリエンプション・
//! SQLite による永続化とクラッシュ後の再開を提供する。

pub mod domain;
pub mod infra;
pub mod usecase;

pub use usecase::scheduler::Scheduler;
