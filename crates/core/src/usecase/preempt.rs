use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// プリエンプション信号
///
/// 開いている間は実行中ジョブがそのまま進む。HIGH ジョブ投入時に閉じられ、
/// HIGH ジョブ完了時に再び開く。チャンク境界での確認は短い待機付き（スピンしない）。
pub struct PreemptGate {
    open: Mutex<bool>,
    cv: Condvar,
}

impl PreemptGate {
    pub fn new() -> Self {
        Self {
            open: Mutex::new(true),
            cv: Condvar::new(),
        }
    }

    /// 実行中の低優先度ジョブに退避を要求する
    pub fn request_preemption(&self) {
        *self.open.lock() = false;
    }

    /// 退避要求を取り下げる
    pub fn release(&self) {
        *self.open.lock() = true;
        self.cv.notify_all();
    }

    /// 最大 timeout だけ開くのを待つ。開いていれば true。
    pub fn wait_open(&self, timeout: Duration) -> bool {
        let mut open = self.open.lock();
        if !*open {
            let _ = self.cv.wait_while_for(&mut open, |open| !*open, timeout);
        }
        *open
    }
}

impl Default for PreemptGate {
    fn default() -> Self {
        Self::new()
    }
}
