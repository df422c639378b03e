use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestKind {
    Hinted,
    SectionFinal,
    GlobalFinal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestDefinition {
    pub id: u64,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: TestKind,
    /// Minutes. `None` means the test is untimed.
    #[serde(default)]
    pub duration: Option<u32>,
    #[serde(default)]
    pub section_id: Option<u64>,
    #[serde(default)]
    pub topic_id: Option<u64>,
    #[serde(default)]
    pub questions: Vec<Question>,
}

impl TestDefinition {
    pub fn hints_enabled(&self) -> bool {
        self.kind == TestKind::Hinted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    SingleChoice,
    MultipleChoice,
    OpenText,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: u64,
    #[serde(rename = "question")]
    pub prompt: String,
    #[serde(rename = "question_type")]
    pub kind: QuestionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl Question {
    pub fn options(&self) -> &[String] {
        self.options.as_deref().unwrap_or_default()
    }

    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref().filter(|h| !h.trim().is_empty())
    }
}

/// A learner's answer to one question. The variant must match the
/// question kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Answer {
    Single(Option<usize>),
    Multiple(BTreeSet<usize>),
    Text(String),
}

impl Answer {
    pub fn empty_for(kind: QuestionKind) -> Self {
        match kind {
            QuestionKind::SingleChoice => Answer::Single(None),
            QuestionKind::MultipleChoice => Answer::Multiple(BTreeSet::new()),
            QuestionKind::OpenText => Answer::Text(String::new()),
        }
    }

    pub fn matches(&self, kind: QuestionKind) -> bool {
        matches!(
            (self, kind),
            (Answer::Single(_), QuestionKind::SingleChoice)
                | (Answer::Multiple(_), QuestionKind::MultipleChoice)
                | (Answer::Text(_), QuestionKind::OpenText)
        )
    }

    /// Whether the answer is complete enough to move past the question.
    pub fn is_ready(&self) -> bool {
        match self {
            Answer::Single(choice) => choice.is_some(),
            Answer::Multiple(choices) => !choices.is_empty(),
            Answer::Text(text) => !text.trim().is_empty(),
        }
    }

    /// Wire encoding for submission. Choices are always sent as a list so an
    /// unanswered single-choice question becomes `[]`.
    pub fn to_value(&self) -> AnswerValue {
        match self {
            Answer::Single(choice) => AnswerValue::Choices(choice.iter().copied().collect()),
            Answer::Multiple(choices) => AnswerValue::Choices(choices.iter().copied().collect()),
            Answer::Text(text) => AnswerValue::Text(text.clone()),
        }
    }
}

pub type AnswerMap = BTreeMap<u64, Answer>;

pub fn empty_answers(questions: &[Question]) -> AnswerMap {
    questions
        .iter()
        .map(|q| (q.id, Answer::empty_for(q.kind)))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptStatus {
    InProgress,
    Completed,
}

impl AttemptStatus {
    fn in_progress() -> Self {
        AttemptStatus::InProgress
    }
}

/// Attempt as reported by the status and start endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptSnapshot {
    pub attempt_id: u64,
    #[serde(default)]
    pub attempt_number: u32,
    #[serde(default = "AttemptStatus::in_progress")]
    pub status: AttemptStatus,
    #[serde(deserialize_with = "server_time::deserialize")]
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub duration: Option<u32>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default, deserialize_with = "server_time::deserialize_option")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub questions: Vec<Question>,
}

impl AttemptSnapshot {
    /// Result of an attempt the server already finished. The status endpoint
    /// reports only a percentage, so the correct count is derived from it.
    pub fn completed_result(&self) -> AttemptResult {
        let total = self.questions.len() as u32;
        let score = self.score.unwrap_or(0.0);
        AttemptResult {
            attempt_id: self.attempt_id,
            attempt_number: self.attempt_number,
            score,
            correct_count: ((score / 100.0) * f64::from(total)).round() as u32,
            total_questions: total,
            completed_at: self.completed_at,
            time_spent: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Choices(Vec<usize>),
    Text(String),
}

impl AnswerValue {
    pub fn is_empty(&self) -> bool {
        match self {
            AnswerValue::Choices(c) => c.is_empty(),
            AnswerValue::Text(t) => t.is_empty(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmittedAnswer {
    pub question_id: u64,
    pub answer: AnswerValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitPayload {
    pub attempt_id: u64,
    /// Seconds since the server-recorded start.
    pub time_spent: i64,
    pub answers: Vec<SubmittedAnswer>,
}

/// Body returned by the submit endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitReceipt {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub attempt_number: Option<u32>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default, rename = "correctCount")]
    pub correct_count: Option<u32>,
    #[serde(default, rename = "totalQuestions")]
    pub total_questions: Option<u32>,
    pub status: AttemptStatus,
    #[serde(default, deserialize_with = "server_time::deserialize_option")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub time_spent: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptResult {
    pub attempt_id: u64,
    pub attempt_number: u32,
    pub score: f64,
    pub correct_count: u32,
    pub total_questions: u32,
    pub completed_at: Option<DateTime<Utc>>,
    pub time_spent: Option<i64>,
}

/// Server timestamps arrive either with an offset or as naive local
/// `isoformat()` strings; naive ones are read as UTC.
pub(crate) mod server_time {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};

    const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        let raw = raw.trim();
        if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
            return Some(t.with_timezone(&Utc));
        }
        NAIVE_FORMATS
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
            .map(|naive| naive.and_utc())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| D::Error::custom(format!("invalid timestamp: {}", raw)))
    }

    pub fn deserialize_option<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            Some(raw) => parse(&raw)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("invalid timestamp: {}", raw))),
            None => Ok(None),
        }
    }

    #[cfg(test)]
    mod tests {
        use chrono::TimeZone;

        use super::*;

        #[test]
        fn naive_and_offset_timestamps_are_accepted() {
            let nine = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
            assert_eq!(parse("2025-03-01T09:00:00"), Some(nine));
            assert_eq!(parse("2025-03-01 09:00:00"), Some(nine));
            assert_eq!(parse("2025-03-01T12:00:00+03:00"), Some(nine));
            assert_eq!(
                parse("2025-03-01T09:00:00.250000"),
                Some(nine + chrono::Duration::milliseconds(250))
            );
            assert_eq!(parse("yesterday"), None);
        }
    }
}
