use std::ops::Range;

/// 固定長チャンクの範囲（元音声の絶対時刻つき）
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkSpan {
    pub index: u32,
    pub samples: Range<usize>,
    pub start_time: f64,
    pub end_time: f64,
}

impl ChunkSpan {
    pub fn slice<'a>(&self, audio: &'a [f32]) -> &'a [f32] {
        &audio[self.samples.clone()]
    }
}

/// total_samples 長の音声を window_secs 秒ごとに分割する。
///
/// 最後のチャンクは短くなり得る。時刻は実際に切り出すサンプル範囲から求めるので、
/// W がサンプル数で割り切れる場合は `start_time = i·W`, `end_time = min((i+1)·W, D)`。
/// 空の音声や sample_rate 0 はチャンク 0 個。
pub fn plan_chunks(total_samples: usize, sample_rate: u32, window_secs: f32) -> Vec<ChunkSpan> {
    if total_samples == 0 || sample_rate == 0 {
        return Vec::new();
    }

    let window_secs = f64::from(window_secs.max(f32::EPSILON));
    let rate = f64::from(sample_rate);
    let window_samples = ((window_secs * rate).round() as usize).max(1);

    (0..total_samples)
        .step_by(window_samples)
        .enumerate()
        .map(|(i, start)| {
            let end = (start + window_samples).min(total_samples);
            ChunkSpan {
                index: i as u32,
                samples: start..end,
                start_time: start as f64 / rate,
                end_time: end as f64 / rate,
            }
        })
        .collect()
}
