use tracing::{debug, info, warn};

use crate::api::AttemptApi;
use crate::error::{ApiError, SessionError};
use crate::model::*;
use crate::persist;
use crate::store::SessionStore;

#[derive(Debug, Clone, PartialEq)]
pub struct ResumedAttempt {
    pub test: TestDefinition,
    pub snapshot: AttemptSnapshot,
    pub answers: AnswerMap,
    pub current_question: usize,
}

/// What a visit to a test page finds.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    NotStarted { test: TestDefinition },
    Resumed(ResumedAttempt),
    Completed { test: TestDefinition, result: AttemptResult },
    Failed(String),
}

/// Status lookup that tells "no attempt" (404) apart from a cached 304,
/// which is asked again once before giving up.
pub async fn fetch_status(
    api: &dyn AttemptApi,
    test_id: u64,
) -> Result<Option<AttemptSnapshot>, ApiError> {
    match api.attempt_status(test_id).await {
        Err(ApiError::NotModified) => {
            debug!(test_id, "status answered 304, asking again");
            api.attempt_status(test_id).await
        }
        other => other,
    }
}

pub async fn load(
    api: &dyn AttemptApi,
    store: &mut dyn SessionStore,
    test_id: u64,
) -> LoadOutcome {
    let test = match api.fetch_test(test_id).await {
        Ok(test) => test,
        Err(err) => {
            warn!(test_id, error = %err, "cannot load test");
            return LoadOutcome::Failed(describe_load_error(&err));
        }
    };

    let status = match fetch_status(api, test_id).await {
        Ok(status) => status,
        Err(err) => {
            warn!(test_id, error = %err, "cannot load attempt status");
            return LoadOutcome::Failed(describe_load_error(&err));
        }
    };

    match status {
        None => {
            discard_saved(store, test_id);
            LoadOutcome::NotStarted { test }
        }
        Some(mut snapshot) if snapshot.status == AttemptStatus::Completed => {
            info!(test_id, attempt_id = snapshot.attempt_id, "attempt already completed");
            discard_saved(store, test_id);
            if snapshot.questions.is_empty() {
                snapshot.questions = test.questions.clone();
            }
            let result = snapshot.completed_result();
            LoadOutcome::Completed { test, result }
        }
        Some(mut snapshot) => {
            let saved = match persist::load_state(store, test_id) {
                Ok(saved) => saved,
                Err(err) => {
                    warn!(test_id, error = %err, "saved session unreadable, discarding it");
                    discard_saved(store, test_id);
                    None
                }
            };

            let (answers, current_question) = match saved {
                Some(saved) if saved.attempt_id == snapshot.attempt_id => {
                    if snapshot.questions.is_empty() {
                        snapshot.questions = saved.questions;
                    }
                    (saved.answers, saved.current_question)
                }
                Some(saved) => {
                    info!(
                        test_id,
                        saved_attempt = saved.attempt_id,
                        server_attempt = snapshot.attempt_id,
                        "saved session belongs to another attempt"
                    );
                    discard_saved(store, test_id);
                    (AnswerMap::new(), 0)
                }
                None => (AnswerMap::new(), 0),
            };
            if snapshot.questions.is_empty() {
                snapshot.questions = test.questions.clone();
            }

            info!(
                test_id,
                attempt_id = snapshot.attempt_id,
                current_question,
                "resuming attempt"
            );
            LoadOutcome::Resumed(ResumedAttempt {
                test,
                snapshot,
                answers,
                current_question,
            })
        }
    }
}

/// Starts a new attempt unless one is already running.
pub async fn start(api: &dyn AttemptApi, test_id: u64) -> Result<AttemptSnapshot, SessionError> {
    match fetch_status(api, test_id).await {
        Ok(Some(snapshot)) if snapshot.status == AttemptStatus::InProgress => {
            warn!(test_id, attempt_id = snapshot.attempt_id, "refusing to start a second attempt");
            return Err(SessionError::Conflict);
        }
        Ok(_) => {}
        Err(err) => {
            return Err(SessionError::Load(format!(
                "cannot check for a running attempt: {}",
                err
            )));
        }
    }

    match api.start_attempt(test_id).await {
        Ok(snapshot) => {
            info!(test_id, attempt_id = snapshot.attempt_id, "attempt started");
            Ok(snapshot)
        }
        Err(err) if err.is_conflict() => Err(SessionError::Conflict),
        Err(err) if err.is_forbidden() => Err(SessionError::Unavailable(err.to_string())),
        Err(err) => Err(SessionError::Load(format!("cannot start the test: {}", err))),
    }
}

fn discard_saved(store: &mut dyn SessionStore, test_id: u64) {
    if let Err(err) = persist::clear_state(store, test_id) {
        warn!(test_id, error = %err, "cannot clear saved session");
    }
}

fn describe_load_error(err: &ApiError) -> String {
    match err.status() {
        Some(403) => "you do not have access to this test".to_string(),
        Some(404) => "test not found".to_string(),
        _ => format!("cannot load the test: {}", err),
    }
}
