//! Pure aggregation over per-chat counters. No storage access here, so the
//! arithmetic is testable on plain values.

use std::collections::BTreeMap;

use serde::Serialize;

/// One chat's contribution to a child's window summary, taken from its
/// analytics row. Scores are `None` when the chat was never scored.
#[derive(Debug, Clone)]
pub struct ChatSample {
    pub character: String,
    pub message_count: i64,
    pub total_words: i64,
    pub vocabulary_score: Option<f64>,
    pub grammar_score: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct CharacterSummary {
    pub total_chats: i64,
    pub total_messages: i64,
    pub total_words: i64,
    pub avg_vocabulary_score: f64,
    pub avg_grammar_score: f64,
    #[serde(skip)]
    scored_vocabulary: u32,
    #[serde(skip)]
    scored_grammar: u32,
}

/// Totals over one time window, with a per-character breakdown. Averages
/// cover only the chats that carry a score.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct WindowSummary {
    pub total_chats: i64,
    pub total_messages: i64,
    pub total_words: i64,
    pub avg_vocabulary_score: f64,
    pub avg_grammar_score: f64,
    pub characters: BTreeMap<String, CharacterSummary>,
    #[serde(skip)]
    scored_vocabulary: u32,
    #[serde(skip)]
    scored_grammar: u32,
}

/// Running mean so a long window never needs the full list in one pass.
fn fold_mean(avg: f64, n: u32, x: f64) -> f64 {
    avg + (x - avg) / n as f64
}

pub fn summarize(samples: &[ChatSample]) -> WindowSummary {
    let mut summary = WindowSummary::default();
    for sample in samples {
        summary.total_chats += 1;
        summary.total_messages += sample.message_count;
        summary.total_words += sample.total_words;
        if let Some(score) = sample.vocabulary_score {
            summary.scored_vocabulary += 1;
            summary.avg_vocabulary_score =
                fold_mean(summary.avg_vocabulary_score, summary.scored_vocabulary, score);
        }
        if let Some(score) = sample.grammar_score {
            summary.scored_grammar += 1;
            summary.avg_grammar_score =
                fold_mean(summary.avg_grammar_score, summary.scored_grammar, score);
        }

        let entry = summary
            .characters
            .entry(sample.character.clone())
            .or_default();
        entry.total_chats += 1;
        entry.total_messages += sample.message_count;
        entry.total_words += sample.total_words;
        if let Some(score) = sample.vocabulary_score {
            entry.scored_vocabulary += 1;
            entry.avg_vocabulary_score =
                fold_mean(entry.avg_vocabulary_score, entry.scored_vocabulary, score);
        }
        if let Some(score) = sample.grammar_score {
            entry.scored_grammar += 1;
            entry.avg_grammar_score =
                fold_mean(entry.avg_grammar_score, entry.scored_grammar, score);
        }
    }
    summary
}
