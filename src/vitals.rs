//! Vitals snapshot and the cosmetic companion values.
//!
//! Only the heart rate is measured. SpO2, blood pressure, temperature,
//! respiration and the quality score are display values derived from it with
//! some jitter, refreshed on a timer while a heart rate is known.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Buffered samples needed before a quality score is reported.
const QUALITY_MIN_SAMPLES: usize = 50;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BloodPressure {
    pub systolic: i32,
    pub diastolic: i32,
}

/// Everything shown on the vitals panel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VitalsSnapshot {
    pub heart_rate: u16,
    pub spo2: u8,
    pub respiration_rate: u16,
    pub blood_pressure: BloodPressure,
    pub temperature: f64,
    pub ecg_quality: u8,
    pub leads_off: bool,
}

impl VitalsSnapshot {
    /// Refresh the derived values from the current heart rate.
    ///
    /// `buffered` is the beat detector's sample count, used for the quality
    /// score. Does nothing while no heart rate is known; returns whether the
    /// snapshot was touched.
    pub fn randomize<R: Rng>(&mut self, buffered: usize, rng: &mut R) -> bool {
        if self.heart_rate == 0 {
            return false;
        }
        let hr = f64::from(self.heart_rate);

        self.spo2 = 95 + rng.gen_range(0..4u8);

        let variation = (hr - 70.0) * 0.5;
        let systolic = (120.0 + variation + rng.gen_range(-5.0..5.0)).round();
        self.blood_pressure.systolic = systolic as i32;
        self.blood_pressure.diastolic = (systolic * 0.65).round() as i32;

        let temperature: f64 = 36.5 + rng.gen_range(0.0..0.5);
        self.temperature = (temperature * 10.0).round() / 10.0;

        self.respiration_rate = (hr / 4.0).round() as u16;

        self.ecg_quality = if buffered > QUALITY_MIN_SAMPLES {
            85 + rng.gen_range(0..15u8)
        } else {
            0
        };
        true
    }
}
