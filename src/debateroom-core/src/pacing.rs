//! Simulated typing pace for the incremental reveal.

use rand_distr::{Beta, Distribution};
use std::time::Duration;

use crate::config::PacingSettings;
use crate::error::DebateError;

/// Draws per-character delays from a Beta distribution rescaled into
/// `[min, max]`. With a right-skewed shape such as Beta(1, 3) most characters
/// come quickly with the occasional longer pause.
#[derive(Debug, Clone)]
pub struct TypingPacer {
    distribution: Beta<f64>,
    min_secs: f64,
    span_secs: f64,
}

impl TypingPacer {
    pub fn new(settings: &PacingSettings) -> Result<Self, DebateError> {
        let distribution = Beta::new(settings.alpha, settings.beta)
            .map_err(|e| DebateError::ConfigError(format!("Invalid pacing shape: {}", e)))?;

        Ok(Self {
            distribution,
            min_secs: settings.min_delay_secs,
            span_secs: (settings.max_delay_secs - settings.min_delay_secs).max(0.0),
        })
    }

    /// Delay before revealing the next character.
    pub fn next_delay(&self) -> Duration {
        let value = self.distribution.sample(&mut rand::rng());
        Duration::from_secs_f64(self.min_secs + value * self.span_secs)
    }
}

/// Every char-boundary prefix of `text`, shortest first; one per character.
pub fn reveal_prefixes(text: &str) -> impl Iterator<Item = &str> {
    text.char_indices().map(move |(i, c)| &text[..i + c.len_utf8()])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(alpha: f64, beta: f64, min: f64, max: f64) -> PacingSettings {
        PacingSettings {
            alpha,
            beta,
            min_delay_secs: min,
            max_delay_secs: max,
        }
    }

    #[test]
    fn test_delays_stay_within_bounds() {
        let pacer = TypingPacer::new(&settings(1.0, 3.0, 0.01, 0.35)).unwrap();
        for _ in 0..1000 {
            let delay = pacer.next_delay().as_secs_f64();
            assert!((0.01..=0.35 + 1e-9).contains(&delay), "delay {delay} out of range");
        }
    }

    #[test]
    fn test_right_skew_favors_short_delays() {
        let pacer = TypingPacer::new(&settings(1.0, 3.0, 0.0, 1.0)).unwrap();
        let samples: Vec<f64> = (0..4000).map(|_| pacer.next_delay().as_secs_f64()).collect();
        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        // Beta(1, 3) has mean 0.25.
        assert!((0.2..0.3).contains(&mean), "mean {mean}");
    }

    #[test]
    fn test_zero_span_is_constant() {
        let pacer = TypingPacer::new(&settings(2.0, 5.0, 0.0, 0.0)).unwrap();
        assert_eq!(pacer.next_delay(), Duration::ZERO);
    }

    #[test]
    fn test_rejects_non_positive_shape() {
        assert!(TypingPacer::new(&settings(0.0, 3.0, 0.0, 1.0)).is_err());
    }

    #[test]
    fn test_reveal_prefixes_per_character() {
        let prefixes: Vec<_> = reveal_prefixes("학교 ok").collect();
        assert_eq!(prefixes, vec!["학", "학교", "학교 ", "학교 o", "학교 ok"]);
        assert_eq!(reveal_prefixes("").count(), 0);
    }
}
