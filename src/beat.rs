//! R-peak detection and heart-rate estimation.
//!
//! The detector is an adaptive-threshold, hysteresis-gated peak finder over
//! the primary channel:
//!
//! - a sample rising 30% above the mean of the last 10 samples arms a peak;
//! - the peak disarms once the signal falls below 80% of that threshold;
//! - the time between peaks (R-R interval) is kept for the last 5 beats and
//!   averaged into a BPM figure.
//!
//! There is no frequency-domain filtering. Timestamps are supplied by the
//! caller in milliseconds so the detector is deterministic under test.

use std::collections::VecDeque;

use log::debug;

/// Samples kept for the rolling average.
pub const SAMPLE_WINDOW: usize = 100;
/// Samples averaged to build the threshold.
pub const RECENT_SAMPLES: usize = 10;
/// Rising-edge threshold relative to the recent average.
pub const THRESHOLD_FACTOR: f64 = 1.3;
/// Reset threshold relative to the rising-edge threshold.
pub const HYSTERESIS_FACTOR: f64 = 0.8;
/// R-R intervals retained for smoothing.
pub const INTERVAL_WINDOW: usize = 5;
/// Intervals must be strictly longer than this (200 BPM).
pub const MIN_INTERVAL_MS: u64 = 300;
/// Intervals must be strictly shorter than this (30 BPM).
pub const MAX_INTERVAL_MS: u64 = 2000;
pub const MIN_BPM: u32 = 30;
pub const MAX_BPM: u32 = 200;

/// A peak whose R-R interval was plausible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Beat {
    /// Time since the previous peak.
    pub interval_ms: u64,
    /// Heart rate after this beat (unchanged if the new estimate was rejected).
    pub heart_rate: u16,
    /// Estimate that fell outside 30-200 BPM and was discarded.
    pub rejected_bpm: Option<u32>,
}

/// Rolling R-peak detector for one connection.
#[derive(Debug, Clone)]
pub struct BeatDetector {
    samples: VecDeque<u16>,
    intervals: VecDeque<u64>,
    peak_armed: bool,
    last_peak_ms: u64,
    heart_rate: u16,
}

impl BeatDetector {
    /// Create a detector; `now_ms` counts as the time of the previous peak.
    pub fn new(now_ms: u64) -> Self {
        Self {
            samples: VecDeque::with_capacity(SAMPLE_WINDOW + 1),
            intervals: VecDeque::with_capacity(INTERVAL_WINDOW + 1),
            peak_armed: false,
            last_peak_ms: now_ms,
            heart_rate: 0,
        }
    }

    /// Last accepted heart rate, 0 until two intervals have been seen.
    pub fn heart_rate(&self) -> u16 {
        self.heart_rate
    }

    /// Number of buffered primary-channel samples.
    pub fn buffered(&self) -> usize {
        self.samples.len()
    }

    pub fn intervals(&self) -> impl Iterator<Item = u64> + '_ {
        self.intervals.iter().copied()
    }

    /// Feed one primary-channel sample taken at `now_ms`.
    ///
    /// Returns a [`Beat`] when a peak with a plausible R-R interval was found.
    pub fn push(&mut self, value: u16, now_ms: u64) -> Option<Beat> {
        self.samples.push_back(value);
        if self.samples.len() > SAMPLE_WINDOW {
            self.samples.pop_front();
        }
        if self.samples.len() < RECENT_SAMPLES {
            return None;
        }

        let recent: f64 = self
            .samples
            .iter()
            .rev()
            .take(RECENT_SAMPLES)
            .map(|&v| f64::from(v))
            .sum::<f64>()
            / RECENT_SAMPLES as f64;
        let threshold = recent * THRESHOLD_FACTOR;
        let value = f64::from(value);

        if value > threshold && !self.peak_armed {
            self.peak_armed = true;
            let interval = now_ms.saturating_sub(self.last_peak_ms);
            self.last_peak_ms = now_ms;
            return self.record_interval(interval);
        }
        if value < threshold * HYSTERESIS_FACTOR {
            self.peak_armed = false;
        }
        None
    }

    fn record_interval(&mut self, interval_ms: u64) -> Option<Beat> {
        if interval_ms <= MIN_INTERVAL_MS || interval_ms >= MAX_INTERVAL_MS {
            debug!("ignoring R-R interval of {} ms", interval_ms);
            return None;
        }

        self.intervals.push_back(interval_ms);
        if self.intervals.len() > INTERVAL_WINDOW {
            self.intervals.pop_front();
        }

        let mut rejected_bpm = None;
        if let Some(bpm) = mean_bpm(self.intervals.make_contiguous()) {
            if (MIN_BPM..=MAX_BPM).contains(&bpm) {
                self.heart_rate = bpm as u16;
            } else {
                debug!("rejecting implausible heart rate {} BPM", bpm);
                rejected_bpm = Some(bpm);
            }
        }

        Some(Beat {
            interval_ms,
            heart_rate: self.heart_rate,
            rejected_bpm,
        })
    }
}

/// BPM from the mean of `intervals`, rounded to the nearest integer.
///
/// Needs at least two intervals; range checking is left to the caller.
pub fn mean_bpm(intervals: &[u64]) -> Option<u32> {
    if intervals.len() < 2 {
        return None;
    }
    let mean = intervals.iter().sum::<u64>() as f64 / intervals.len() as f64;
    if mean <= 0.0 {
        return None;
    }
    Some((60_000.0 / mean).round() as u32)
}
