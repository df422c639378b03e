use std::collections::BTreeSet;
use std::fs;

use examrun::model::{Answer, AnswerMap, AttemptSnapshot};
use examrun::persist;
use examrun::state::SessionState;
use examrun::store::{state_dir_for, FileStore, SessionKey, SessionStore};

fn snapshot() -> AttemptSnapshot {
    let content = fs::read_to_string("tests/fixtures/status_in_progress.json")
        .expect("Cannot read fixture");
    serde_json::from_str(&content).unwrap()
}

#[test]
fn test_session_survives_a_restart() {
    let tmp_dir = std::env::temp_dir().join("examrun_test_file_store");
    let _ = fs::remove_dir_all(&tmp_dir);

    let mut state = SessionState::new(12, Some(3));
    state.begin_attempt(&snapshot(), AnswerMap::new(), 0);
    state.set_answer(3, Answer::Text("a scope for borrows".into())).unwrap();
    state
        .set_answer(2, Answer::Multiple(BTreeSet::from([0, 3])))
        .unwrap();
    state.current_question = 2;

    let mut store = FileStore::new(&tmp_dir);
    persist::save_state(&mut store, &state).unwrap();

    let reopened = FileStore::new(&tmp_dir);
    let saved = persist::load_state(&reopened, 12).unwrap().unwrap();
    assert_eq!(saved.attempt_id, 57);
    assert_eq!(saved.current_question, 2);
    assert_eq!(saved.answers, state.answers);
    assert_eq!(saved.questions.len(), 4);
    assert_eq!(saved.started_at, state.started_at);

    assert_eq!(
        reopened.get(12, SessionKey::CurrentQuestion).unwrap().as_deref(),
        Some("2")
    );
    assert_eq!(reopened.get(13, SessionKey::AttemptId).unwrap(), None);

    let _ = fs::remove_dir_all(&tmp_dir);
}

#[test]
fn test_clear_only_touches_one_test() {
    let tmp_dir = std::env::temp_dir().join("examrun_test_file_store_clear");
    let _ = fs::remove_dir_all(&tmp_dir);

    let mut store = FileStore::new(&tmp_dir);
    store.set(1, SessionKey::AttemptId, "10").unwrap();
    store.set(2, SessionKey::AttemptId, "20").unwrap();

    store.clear(1).unwrap();

    assert_eq!(store.get(1, SessionKey::AttemptId).unwrap(), None);
    assert_eq!(store.get(2, SessionKey::AttemptId).unwrap().as_deref(), Some("20"));

    let _ = fs::remove_dir_all(&tmp_dir);
}

#[test]
fn test_export_writes_yaml() {
    let tmp_dir = std::env::temp_dir().join("examrun_test_export");
    let _ = fs::remove_dir_all(&tmp_dir);
    fs::create_dir_all(&tmp_dir).unwrap();

    let mut state = SessionState::new(12, None);
    state.begin_attempt(&snapshot(), AnswerMap::new(), 1);
    state.set_answer(1, Answer::Single(Some(2))).unwrap();

    let path = tmp_dir.join("answers.yaml");
    persist::export_answers(&state, &path).unwrap();

    let written = fs::read_to_string(&path).unwrap();
    assert!(written.contains("attempt_id: 57"));
    assert!(written.contains("question_id: 1"));
    assert!(written.contains("current_question: 1"));

    let _ = fs::remove_dir_all(&tmp_dir);
}

#[test]
fn test_state_dirs_differ_per_server() {
    let root = std::env::temp_dir().join("examrun_roots");
    let a = state_dir_for(&root, "https://one.example/api/v1");
    let b = state_dir_for(&root, "https://two.example/api/v1");
    assert_ne!(a, b);
    assert!(a.starts_with(&root));
}
