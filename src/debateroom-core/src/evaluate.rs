//! Post-debate evaluation: a judge model's verdict and per-side argument
//! diversity.

use regex::Regex;
use std::collections::HashSet;
use tracing::{info, warn};

use crate::message::Message;
use crate::model::ModelClient;
use crate::participant::Role;

pub const JUDGE_SYSTEM_PROMPT: &str = "You are a debate judge.";

/// What the judge said, plus whatever could be read out of it.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub text: String,
    /// 1-10 per side, indexed by [`Role::BOTH`] order.
    pub scores: [Option<u8>; 2],
    pub winner: Option<Role>,
}

impl Verdict {
    fn unscored(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            scores: [None, None],
            winner: None,
        }
    }

    pub fn score(&self, role: Role) -> Option<u8> {
        self.scores[role.index()]
    }

    /// Read scores and the winner from a reply in the requested
    /// `NAME: [[score]], NAME: [[score]], winner: [[name]]` shape.
    pub fn parse(text: &str, names: &[String; 2]) -> Self {
        let mut scores = [None, None];
        for role in Role::BOTH {
            let pattern = format!(r"(?i){}\s*:\s*\[*\s*(\d{{1,2}})", regex::escape(&names[role.index()]));
            scores[role.index()] = Regex::new(&pattern)
                .ok()
                .and_then(|re| re.captures(text))
                .and_then(|caps| caps[1].parse::<u8>().ok())
                .filter(|score| (1..=10).contains(score));
        }

        let winner = Regex::new(r"(?i)winner\s*:\s*\[*\s*([^\],.\n]+)")
            .ok()
            .and_then(|re| re.captures(text))
            .and_then(|caps| {
                let named = caps[1].trim().to_lowercase();
                Role::BOTH
                    .into_iter()
                    .find(|role| named == names[role.index()].to_lowercase())
            });

        Self {
            text: text.trim().to_string(),
            scores,
            winner,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub verdict: Verdict,
    /// Leave-one-out distinct-n per side, indexed by [`Role::BOTH`] order.
    pub diversity: [f64; 2],
}

impl Evaluation {
    pub fn diversity(&self, role: Role) -> f64 {
        self.diversity[role.index()]
    }
}

pub struct DebateEvaluator {
    judge: Box<dyn ModelClient>,
    diversity_n: usize,
}

impl DebateEvaluator {
    pub fn new(judge: Box<dyn ModelClient>, diversity_n: usize) -> Self {
        Self { judge, diversity_n }
    }

    /// Judge the finalized messages of a closed debate. Judge failures end up
    /// in the verdict text; the diversity scores are always computed.
    pub async fn evaluate(&mut self, topic: &str, messages: &[Message]) -> Evaluation {
        let turns = paired_turns(messages);
        let names = side_names(turns);

        let mut diversity = [0.0; 2];
        for role in Role::BOTH {
            let said: Vec<&str> = turns
                .iter()
                .filter(|m| m.role == role)
                .map(|m| m.text.as_str())
                .collect();
            diversity[role.index()] = diversity_index(&said, self.diversity_n);
        }

        let verdict = match judge_prompt(topic, turns, &names) {
            None => Verdict::unscored("Not enough valid debate turns to evaluate."),
            Some(prompt) => match self.judge.generate(&prompt).await {
                Ok(reply) => Verdict::parse(&reply, &names),
                Err(e) => {
                    warn!(error = %e, "judge failed");
                    Verdict::unscored(format!("Failed to get a verdict: {}", e))
                }
            },
        };

        info!(winner = ?verdict.winner, scores = ?verdict.scores, "debate evaluated");
        Evaluation { verdict, diversity }
    }
}

/// The log cut to an even count so every statement has a reply.
fn paired_turns(messages: &[Message]) -> &[Message] {
    &messages[..messages.len() - messages.len() % 2]
}

/// Upper-cased speaker name per side, falling back to the side's label.
fn side_names(turns: &[Message]) -> [String; 2] {
    Role::BOTH.map(|role| {
        turns
            .iter()
            .find(|m| m.role == role && !m.name.trim().is_empty())
            .map(|m| m.name.to_uppercase())
            .unwrap_or_else(|| role.as_str().to_uppercase())
    })
}

fn judge_prompt(topic: &str, turns: &[Message], names: &[String; 2]) -> Option<String> {
    if turns.len() < 2 {
        return None;
    }

    let script = turns
        .chunks(2)
        .map(|pair| {
            pair.iter()
                .map(|m| format!("{}: \"{}\"", names[m.role.index()], m.text))
                .collect::<Vec<_>>()
                .join(". ")
        })
        .collect::<Vec<_>>()
        .join(" ");

    let [first, second] = names;
    Some(format!(
        "We had a debate and the topic was \"{topic}\". The two sides in the debate each provided \
         arguments to prove their side and refute the points raised by the opponent. You are a judge \
         for this debate. You should be impartial and as objective as possible. The debate script \
         will be given. You should give a score from 1 to 10 to each side of the debate. In your \
         judgement, you should take into account the following criteria: clarity of arguments, \
         factuality and use of evidence, rebuttal and counterarguments, logical consistency, \
         persuasiveness and impact, conciseness, coherence. Also, you should choose the side who you \
         think is the overall winner. Your answer MUST follow the following format: \
         \"{first}: [[score of {first}]], {second}: [[score of {second}]], winner: [[name of winner]]. \
         [[description]]\".\n\n\
         The script of the debate is as follows:\n{script}\n\n\
         평가는 **한국어**로 작성해주세요.",
        topic = topic.trim(),
    ))
}

/// Lower-cased words of two or more word characters.
fn words(text: &str) -> Vec<String> {
    match Regex::new(r"\w\w+") {
        Ok(re) => re.find_iter(&text.to_lowercase()).map(|m| m.as_str().to_string()).collect(),
        Err(_) => Vec::new(),
    }
}

fn ngrams(text: &str, n: usize) -> HashSet<String> {
    let words = words(text);
    if n == 0 || words.len() < n {
        return HashSet::new();
    }
    words.windows(n).map(|w| w.join(" ")).collect()
}

/// Mean share of each turn's word n-grams that no other turn uses. A side
/// that keeps repeating itself scores near 0; one turn alone scores 1.
pub fn diversity_index(turns: &[&str], n: usize) -> f64 {
    if turns.is_empty() {
        return 0.0;
    }

    let grams: Vec<HashSet<String>> = turns.iter().map(|t| ngrams(t, n)).collect();
    let total: f64 = grams
        .iter()
        .enumerate()
        .map(|(i, current)| {
            if current.is_empty() {
                return 0.0;
            }
            let distinct = current
                .iter()
                .filter(|gram| {
                    !grams
                        .iter()
                        .enumerate()
                        .any(|(j, other)| j != i && other.contains(*gram))
                })
                .count();
            distinct as f64 / current.len() as f64
        })
        .sum();

    total / grams.len() as f64
}
