use std::fs;
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tracing::warn;

use crate::error::StoreError;
use crate::model::{AnswerMap, Question, TestDefinition};
use crate::state::SessionState;
use crate::store::{SessionKey, SessionStore};
use crate::submit;
use crate::timer::format_clock;

/// What a previous run left behind for a test.
#[derive(Debug, Clone, PartialEq)]
pub struct SavedSession {
    pub attempt_id: u64,
    pub test: Option<TestDefinition>,
    pub questions: Vec<Question>,
    pub answers: AnswerMap,
    pub current_question: usize,
    pub started_at: Option<DateTime<Utc>>,
}

/// Mirrors the running attempt to the store. Does nothing until an attempt
/// exists.
pub fn save_state(store: &mut dyn SessionStore, state: &SessionState) -> Result<(), StoreError> {
    let Some(attempt_id) = state.attempt_id else {
        return Ok(());
    };
    let id = state.test_id;

    store.set(id, SessionKey::AttemptId, &attempt_id.to_string())?;
    store.set(id, SessionKey::Test, &serde_json::to_string(&state.test)?)?;
    store.set(id, SessionKey::Questions, &serde_json::to_string(&state.questions)?)?;
    store.set(id, SessionKey::Answers, &serde_json::to_string(&state.answers)?)?;
    store.set(id, SessionKey::CurrentQuestion, &state.current_question.to_string())?;
    let started = state
        .started_at
        .map(|t| t.to_rfc3339_opts(SecondsFormat::AutoSi, true))
        .unwrap_or_default();
    store.set(id, SessionKey::StartTime, &started)?;
    Ok(())
}

/// Writes only the answers and the question pointer, the two values user
/// input changes.
pub fn save_progress(store: &mut dyn SessionStore, state: &SessionState) -> Result<(), StoreError> {
    if state.attempt_id.is_none() {
        return Ok(());
    }
    let id = state.test_id;
    store.set(id, SessionKey::Answers, &serde_json::to_string(&state.answers)?)?;
    store.set(id, SessionKey::CurrentQuestion, &state.current_question.to_string())?;
    Ok(())
}

/// `Ok(None)` when nothing usable is saved. A value that fails to parse is
/// treated as missing rather than fatal.
pub fn load_state(store: &dyn SessionStore, test_id: u64) -> Result<Option<SavedSession>, StoreError> {
    let attempt_id = match store
        .get(test_id, SessionKey::AttemptId)?
        .and_then(|v| v.trim().parse::<u64>().ok())
    {
        Some(id) => id,
        None => return Ok(None),
    };

    let test = read_json::<Option<TestDefinition>>(store, test_id, SessionKey::Test)?.flatten();
    let questions = read_json::<Vec<Question>>(store, test_id, SessionKey::Questions)?
        .unwrap_or_default();
    let answers = read_json::<AnswerMap>(store, test_id, SessionKey::Answers)?.unwrap_or_default();
    let current_question = store
        .get(test_id, SessionKey::CurrentQuestion)?
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    let started_at = store
        .get(test_id, SessionKey::StartTime)?
        .and_then(|v| DateTime::parse_from_rfc3339(v.trim()).ok())
        .map(|t| t.with_timezone(&Utc));

    Ok(Some(SavedSession {
        attempt_id,
        test,
        questions,
        answers,
        current_question,
        started_at,
    }))
}

fn read_json<T: serde::de::DeserializeOwned>(
    store: &dyn SessionStore,
    test_id: u64,
    key: SessionKey,
) -> Result<Option<T>, StoreError> {
    let Some(raw) = store.get(test_id, key)? else {
        return Ok(None);
    };
    match serde_json::from_str(&raw) {
        Ok(value) => Ok(Some(value)),
        Err(err) => {
            warn!(test_id, key = key.name(), error = %err, "ignoring unreadable saved value");
            Ok(None)
        }
    }
}

pub fn clear_state(store: &mut dyn SessionStore, test_id: u64) -> Result<(), StoreError> {
    store.clear(test_id)
}

/// Puts a saved session back into a blank state so it can be shown or
/// exported without the server.
pub fn restore_offline(state: &mut SessionState, saved: SavedSession) {
    state.test = saved.test;
    state.attempt_id = Some(saved.attempt_id);
    state.questions = saved.questions;
    state.answers = saved.answers;
    state.current_question = saved
        .current_question
        .min(state.questions.len().saturating_sub(1));
    state.started_at = saved.started_at;
}

#[derive(Serialize)]
struct ExportDocument<'a> {
    test_id: u64,
    title: Option<&'a str>,
    attempt_id: Option<u64>,
    started_at: Option<String>,
    current_question: usize,
    answers: Vec<crate::model::SubmittedAnswer>,
}

pub fn export_answers(state: &SessionState, path: &Path) -> Result<(), StoreError> {
    let document = ExportDocument {
        test_id: state.test_id,
        title: state.test.as_ref().map(|t| t.title.as_str()),
        attempt_id: state.attempt_id,
        started_at: state.started_at.map(|t| t.to_rfc3339()),
        current_question: state.current_question,
        answers: submit::encode_answers(state),
    };
    let yaml = serde_yaml::to_string(&document)?;
    fs::write(path, yaml)?;
    Ok(())
}

pub fn print_status(state: &SessionState, now: DateTime<Utc>) {
    let title = state
        .test
        .as_ref()
        .map(|t| t.title.as_str())
        .unwrap_or("(unknown test)");
    println!("Test: {} (#{})", title, state.test_id);

    let Some(attempt_id) = state.attempt_id else {
        println!("No saved attempt.");
        return;
    };
    let counts = state.status_counts();
    println!("Attempt: {}", attempt_id);
    println!("Questions: {}", state.questions.len());
    println!(
        "  Answered: {}, Not answered: {}",
        counts.answered, counts.unanswered
    );
    println!("  Current question: {}", state.current_question + 1);
    if let Some(started) = state.started_at {
        println!("Started: {}", started.to_rfc3339());
        if let Some(minutes) = state.duration_minutes() {
            let left = crate::timer::remaining_seconds(minutes, started, now);
            println!("Time left: {}", format_clock(left));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::TimeZone;

    use super::*;
    use crate::model::{Answer, AttemptSnapshot, AttemptStatus, QuestionKind, TestKind};
    use crate::store::MemoryStore;

    fn started_state() -> SessionState {
        let mut state = SessionState::new(4, Some(1));
        state.test = Some(TestDefinition {
            id: 4,
            title: "Ownership".to_string(),
            kind: TestKind::Hinted,
            duration: Some(20),
            section_id: Some(3),
            topic_id: Some(1),
            questions: Vec::new(),
        });
        let snapshot = AttemptSnapshot {
            attempt_id: 31,
            attempt_number: 1,
            status: AttemptStatus::InProgress,
            start_time: Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap(),
            duration: Some(20),
            score: None,
            completed_at: None,
            questions: vec![
                Question {
                    id: 1,
                    prompt: "Pick one".into(),
                    kind: QuestionKind::SingleChoice,
                    options: Some(vec!["a".into(), "b".into()]),
                    hint: Some("not a".into()),
                    image: None,
                },
                Question {
                    id: 2,
                    prompt: "Pick many".into(),
                    kind: QuestionKind::MultipleChoice,
                    options: Some(vec!["a".into(), "b".into(), "c".into()]),
                    hint: None,
                    image: None,
                },
            ],
        };
        state.begin_attempt(&snapshot, AnswerMap::new(), 0);
        state
    }

    #[test]
    fn saved_state_round_trips() {
        let mut state = started_state();
        state.set_answer(1, Answer::Single(Some(1))).unwrap();
        state.set_answer(2, Answer::Multiple(BTreeSet::from([0, 2]))).unwrap();
        state.current_question = 1;

        let mut store = MemoryStore::new();
        save_state(&mut store, &state).unwrap();
        assert_eq!(store.len(), 6);

        let saved = load_state(&store, 4).unwrap().unwrap();
        assert_eq!(saved.attempt_id, 31);
        assert_eq!(saved.answers, state.answers);
        assert_eq!(saved.questions, state.questions);
        assert_eq!(saved.test, state.test);
        assert_eq!(saved.current_question, 1);
        assert_eq!(saved.started_at, state.started_at);
    }

    #[test]
    fn nothing_is_saved_before_an_attempt_exists() {
        let state = SessionState::new(4, None);
        let mut store = MemoryStore::new();
        save_state(&mut store, &state).unwrap();
        save_progress(&mut store, &state).unwrap();
        assert!(store.is_empty());
        assert_eq!(load_state(&store, 4).unwrap(), None);
    }

    #[test]
    fn unreadable_answers_fall_back_to_empty() {
        let mut store = MemoryStore::new();
        store.set(4, SessionKey::AttemptId, "31").unwrap();
        store.set(4, SessionKey::Answers, "{not json").unwrap();

        let saved = load_state(&store, 4).unwrap().unwrap();
        assert!(saved.answers.is_empty());
        assert_eq!(saved.started_at, None);
    }

    #[test]
    fn clear_removes_all_six_keys() {
        let state = started_state();
        let mut store = MemoryStore::new();
        save_state(&mut store, &state).unwrap();
        clear_state(&mut store, 4).unwrap();
        for key in SessionKey::ALL {
            assert_eq!(store.get(4, key).unwrap(), None);
        }
    }
}
