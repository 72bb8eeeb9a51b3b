//! Synthetic migraine dataset for demos, smoke runs and tests.
//!
//! Feature ranges mirror the production intake form. Occurrence is drawn from
//! a logistic model of a trigger-weighted risk score, so the labels are
//! learnable but noisy; severity (1-10) grows with the same score and is 0 for
//! rows without an episode.

use crate::domain::{FeatureColumn, FeatureMatrix, Result};
use crate::models::rng::SplitMix64;
use crate::stats::sigmoid;

/// Column names in their canonical order.
pub const FEATURE_NAMES: [&str; 23] = [
    "age",
    "gender",
    "sleep_hours",
    "sleep_quality",
    "stress_level",
    "hydration",
    "exercise",
    "screen_time",
    "caffeine_intake",
    "alcohol_intake",
    "weather_changes",
    "menstrual_cycle",
    "dehydration",
    "bright_light",
    "loud_noises",
    "strong_smells",
    "missed_meals",
    "specific_foods",
    "physical_activity",
    "neck_pain",
    "weather_pressure",
    "humidity",
    "temperature_change",
];

fn draw_row(rng: &mut SplitMix64) -> [f64; 23] {
    let mut row = [0.0; 23];
    row[0] = rng.int_between(18, 69) as f64;
    row[1] = rng.int_between(0, 1) as f64;
    row[2] = rng.uniform(4.0, 10.0);
    row[3] = rng.int_between(1, 10) as f64;
    row[4] = rng.int_between(1, 10) as f64;
    row[5] = rng.int_between(0, 10) as f64;
    row[6] = rng.int_between(0, 10) as f64;
    row[7] = rng.uniform(0.0, 16.0);
    row[8] = rng.int_between(0, 5) as f64;
    row[9] = rng.int_between(0, 5) as f64;
    for slot in row.iter_mut().take(20).skip(10) {
        *slot = rng.int_between(0, 1) as f64;
    }
    row[20] = rng.uniform(980.0, 1030.0);
    row[21] = rng.uniform(30.0, 90.0);
    row[22] = rng.uniform(-10.0, 10.0);
    row
}

/// Centred risk score: positive values favour an episode.
fn risk_score(r: &[f64; 23]) -> f64 {
    let triggers: f64 = r[10..20].iter().sum();
    0.45 * (r[4] - 5.5)
        - 0.40 * (r[2] - 7.0)
        - 0.20 * (r[3] - 5.5)
        - 0.15 * (r[5] - 5.0)
        + 0.10 * (r[7] - 8.0)
        + 0.25 * (r[8] - 2.5)
        + 0.20 * (r[9] - 2.5)
        + 0.30 * (triggers - 5.0)
        - 0.03 * (r[20] - 1005.0)
        + 0.05 * r[22].abs()
        - 0.25
}

/// `rows` deterministic samples with occurrence target and severity column.
pub fn migraine_dataset(rows: usize, seed: u64) -> Result<FeatureMatrix> {
    let mut rng = SplitMix64::new(seed);
    let mut columns: Vec<Vec<f64>> = vec![Vec::with_capacity(rows); FEATURE_NAMES.len()];
    let mut occurrence = Vec::with_capacity(rows);
    let mut severity = Vec::with_capacity(rows);

    for _ in 0..rows {
        let row = draw_row(&mut rng);
        let score = risk_score(&row);
        let episode = rng.next_f64() < sigmoid(score);
        let level = if episode {
            (5.5 + 0.8 * score + rng.normal()).clamp(1.0, 10.0)
        } else {
            0.0
        };
        for (column, value) in columns.iter_mut().zip(row) {
            column.push(value);
        }
        occurrence.push(if episode { 1.0 } else { 0.0 });
        severity.push(level);
    }

    let features = FEATURE_NAMES
        .iter()
        .zip(columns)
        .map(|(name, values)| FeatureColumn::new(*name, values))
        .collect();
    FeatureMatrix::new(features, Some(occurrence))?.with_severity(severity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_and_ranges() {
        let m = migraine_dataset(300, 42).unwrap();
        assert_eq!(m.n_rows(), 300);
        assert_eq!(m.feature_names(), FEATURE_NAMES.map(String::from).to_vec());

        let age = m.column("age").unwrap();
        assert!(age.iter().all(|v| (18.0..=69.0).contains(v)));
        let pressure = m.column("weather_pressure").unwrap();
        assert!(pressure.iter().all(|v| (980.0..1030.0).contains(v)));
        let neck = m.column("neck_pain").unwrap();
        assert!(neck.iter().all(|v| *v == 0.0 || *v == 1.0));
    }

    #[test]
    fn severity_tracks_occurrence() {
        let m = migraine_dataset(400, 7).unwrap();
        let target = m.target.as_ref().unwrap();
        let severity = m.severity.as_ref().unwrap();
        for (t, s) in target.iter().zip(severity) {
            if *t == 1.0 {
                assert!((1.0..=10.0).contains(s));
            } else {
                assert_eq!(*s, 0.0);
            }
        }
        let positives = target.iter().filter(|v| **v == 1.0).count();
        assert!(positives > 80 && positives < 320, "positives = {positives}");
    }

    #[test]
    fn same_seed_same_data() {
        assert_eq!(migraine_dataset(50, 3).unwrap(), migraine_dataset(50, 3).unwrap());
        assert_ne!(migraine_dataset(50, 3).unwrap(), migraine_dataset(50, 4).unwrap());
    }
}
