use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::api::AttemptApi;
use crate::error::ApiError;
use crate::model::*;
use crate::timer::Clock;

pub(crate) fn sample_test(duration: Option<u32>) -> TestDefinition {
    TestDefinition {
        id: 7,
        title: "Borrowing".to_string(),
        kind: TestKind::SectionFinal,
        duration,
        section_id: Some(1),
        topic_id: Some(2),
        questions: vec![
            Question {
                id: 1,
                prompt: "Which call moves the value?".into(),
                kind: QuestionKind::SingleChoice,
                options: Some(vec!["clone".into(), "into".into(), "as_ref".into()]),
                hint: Some("think about moves".into()),
                image: None,
            },
            Question {
                id: 2,
                prompt: "Which types are Copy?".into(),
                kind: QuestionKind::MultipleChoice,
                options: Some(vec!["u8".into(), "String".into(), "bool".into()]),
                hint: None,
                image: None,
            },
            Question {
                id: 3,
                prompt: "What does the borrow checker prevent?".into(),
                kind: QuestionKind::OpenText,
                options: None,
                hint: None,
                image: None,
            },
        ],
    }
}

#[derive(Debug, Default)]
struct Script {
    status: Option<AttemptSnapshot>,
    status_broken: bool,
    failing_submits: u32,
    lose_response: bool,
    starts: u32,
    next_attempt_id: u64,
    submits: Vec<SubmitPayload>,
}

/// In-memory server for one test. Answers every request from a script and
/// records what the client sent.
#[derive(Debug)]
pub(crate) struct FakeApi {
    test: Mutex<TestDefinition>,
    clock: Arc<dyn Clock>,
    script: Mutex<Script>,
}

impl FakeApi {
    pub(crate) fn new(test: TestDefinition, clock: Arc<dyn Clock>) -> Self {
        Self {
            test: Mutex::new(test),
            clock,
            script: Mutex::new(Script {
                next_attempt_id: 100,
                ..Script::default()
            }),
        }
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }

    pub(crate) fn set_kind(&self, kind: TestKind) {
        self.test.lock().unwrap().kind = kind;
    }

    pub(crate) fn fail_next_submits(&self, count: u32) {
        self.script().failing_submits = count;
    }

    /// The next submission is scored on the server but the reply never
    /// reaches the client.
    pub(crate) fn lose_next_response(&self) {
        self.script().lose_response = true;
    }

    pub(crate) fn break_status(&self) {
        self.script().status_broken = true;
    }

    /// An attempt started from somewhere else.
    pub(crate) fn start_elsewhere(&self) {
        let snapshot = self.new_attempt();
        self.script().status = Some(snapshot);
    }

    pub(crate) fn submits(&self) -> Vec<SubmitPayload> {
        self.script().submits.clone()
    }

    pub(crate) fn starts(&self) -> u32 {
        self.script().starts
    }

    pub(crate) fn server_status(&self) -> Option<AttemptStatus> {
        self.script().status.as_ref().map(|s| s.status)
    }

    fn new_attempt(&self) -> AttemptSnapshot {
        let test = self.test.lock().unwrap().clone();
        let mut script = self.script();
        script.next_attempt_id += 1;
        AttemptSnapshot {
            attempt_id: script.next_attempt_id,
            attempt_number: script.starts + 1,
            status: AttemptStatus::InProgress,
            start_time: self.clock.now(),
            duration: test.duration,
            score: None,
            completed_at: None,
            questions: test.questions,
        }
    }

    fn score(payload: &SubmitPayload) -> (f64, u32) {
        let total = payload.answers.len() as u32;
        let correct = payload
            .answers
            .iter()
            .filter(|a| !a.answer.is_empty())
            .count() as u32;
        let score = if total == 0 {
            0.0
        } else {
            f64::from(correct) * 100.0 / f64::from(total)
        };
        (score, correct)
    }
}

#[async_trait]
impl AttemptApi for FakeApi {
    async fn fetch_test(&self, _test_id: u64) -> Result<TestDefinition, ApiError> {
        Ok(self.test.lock().unwrap().clone())
    }

    async fn attempt_status(&self, _test_id: u64) -> Result<Option<AttemptSnapshot>, ApiError> {
        let script = self.script();
        if script.status_broken {
            return Err(ApiError::Status {
                status: 500,
                message: "status unavailable".into(),
            });
        }
        Ok(script.status.clone())
    }

    async fn start_attempt(&self, _test_id: u64) -> Result<AttemptSnapshot, ApiError> {
        let snapshot = self.new_attempt();
        let mut script = self.script();
        script.starts += 1;
        script.status = Some(snapshot.clone());
        Ok(snapshot)
    }

    async fn submit_attempt(
        &self,
        _test_id: u64,
        payload: &SubmitPayload,
    ) -> Result<SubmitReceipt, ApiError> {
        let now = self.clock.now();
        let mut script = self.script();
        script.submits.push(payload.clone());

        if script.failing_submits > 0 {
            script.failing_submits -= 1;
            return Err(ApiError::Status {
                status: 500,
                message: "Internal Server Error".into(),
            });
        }

        let (score, correct) = Self::score(payload);
        let attempt_number = match script.status.as_mut() {
            Some(snapshot) if snapshot.attempt_id == payload.attempt_id => {
                snapshot.status = AttemptStatus::Completed;
                snapshot.score = Some(score);
                snapshot.completed_at = Some(now);
                snapshot.attempt_number
            }
            _ => {
                return Err(ApiError::Status {
                    status: 404,
                    message: "attempt not found".into(),
                })
            }
        };

        if script.lose_response {
            script.lose_response = false;
            return Err(ApiError::Decode("connection reset".into()));
        }

        Ok(SubmitReceipt {
            id: Some(payload.attempt_id),
            attempt_number: Some(attempt_number),
            score: Some(score),
            correct_count: Some(correct),
            total_questions: Some(payload.answers.len() as u32),
            status: AttemptStatus::Completed,
            completed_at: Some(now),
            time_spent: Some(payload.time_spent),
        })
    }
}
