//! Coalescing of live user input into generation requests.
//!
//! Typing should not start a generation per keystroke, yet a genuine change of
//! direction must replace a stale in-flight answer. The decision depends only
//! on whether the side is generating, the trigger it is generating for, and
//! the new text.

use crate::similarity::SimilarityScorer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// Live keystrokes.
    Typing,
    /// Finalized text.
    Send,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Nothing to do beyond echoing the input.
    Ignore,
    /// The in-flight generation already answers this input.
    Drop,
    /// Start a generation for the input, cancelling the in-flight one first
    /// when `interrupt` is set.
    Issue { interrupt: bool },
}

pub struct CoalescePolicy<'a> {
    pub scorer: &'a dyn SimilarityScorer,
    pub threshold: u8,
}

impl CoalescePolicy<'_> {
    pub fn decide(
        &self,
        kind: InputKind,
        in_progress: bool,
        active_trigger: Option<&str>,
        text: &str,
    ) -> Decision {
        if text.trim().is_empty() {
            return Decision::Ignore;
        }

        match (kind, in_progress) {
            (InputKind::Typing, false) => Decision::Ignore,
            (InputKind::Typing, true) => match active_trigger {
                Some(active) if self.scorer.ratio(active, text) < self.threshold => {
                    Decision::Issue { interrupt: true }
                }
                _ => Decision::Ignore,
            },
            (InputKind::Send, false) => Decision::Issue { interrupt: false },
            (InputKind::Send, true) => match active_trigger {
                Some(active) if self.scorer.ratio(active, text) > self.threshold => Decision::Drop,
                _ => Decision::Issue { interrupt: true },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(u8);

    impl SimilarityScorer for Fixed {
        fn ratio(&self, _a: &str, _b: &str) -> u8 {
            self.0
        }
    }

    fn decide(score: u8, kind: InputKind, in_progress: bool, active: Option<&str>) -> Decision {
        CoalescePolicy {
            scorer: &Fixed(score),
            threshold: 60,
        }
        .decide(kind, in_progress, active, "새 문장")
    }

    #[test]
    fn test_typing_without_generation_is_ignored() {
        assert_eq!(decide(0, InputKind::Typing, false, Some("old")), Decision::Ignore);
    }

    #[test]
    fn test_similar_typing_is_coalesced() {
        assert_eq!(decide(80, InputKind::Typing, true, Some("old")), Decision::Ignore);
        assert_eq!(decide(60, InputKind::Typing, true, Some("old")), Decision::Ignore);
    }

    #[test]
    fn test_divergent_typing_interrupts() {
        assert_eq!(
            decide(40, InputKind::Typing, true, Some("old")),
            Decision::Issue { interrupt: true }
        );
    }

    #[test]
    fn test_typing_without_known_trigger_is_ignored() {
        assert_eq!(decide(0, InputKind::Typing, true, None), Decision::Ignore);
    }

    #[test]
    fn test_send_when_idle_always_issues() {
        assert_eq!(
            decide(100, InputKind::Send, false, Some("old")),
            Decision::Issue { interrupt: false }
        );
    }

    #[test]
    fn test_send_matching_in_flight_is_dropped() {
        assert_eq!(decide(61, InputKind::Send, true, Some("old")), Decision::Drop);
    }

    #[test]
    fn test_send_at_or_below_threshold_replaces_in_flight() {
        assert_eq!(
            decide(60, InputKind::Send, true, Some("old")),
            Decision::Issue { interrupt: true }
        );
        assert_eq!(
            decide(10, InputKind::Send, true, None),
            Decision::Issue { interrupt: true }
        );
    }

    #[test]
    fn test_blank_input_is_ignored() {
        let policy = CoalescePolicy {
            scorer: &Fixed(0),
            threshold: 60,
        };
        assert_eq!(policy.decide(InputKind::Send, false, None, "  \n"), Decision::Ignore);
    }
}
