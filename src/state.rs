use chrono::{DateTime, Utc};

use crate::error::SessionError;
use crate::model::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Loading failed; nothing can be done until the session is reloaded.
    Unusable,
    NotStarted,
    InProgress,
    Submitting,
    Completed,
    /// Submission kept failing and the session was given up.
    Abandoned,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed | Phase::Abandoned)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectTarget {
    SectionTree(u64),
    Topics,
}

impl RedirectTarget {
    pub fn path(&self) -> String {
        match self {
            RedirectTarget::SectionTree(topic_id) => format!("/section/tree/{}", topic_id),
            RedirectTarget::Topics => "/topics".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    RedirectElapsed,
    SubmissionAbandoned,
    UserLeft,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Navigation {
    pub target: RedirectTarget,
    pub reason: ExitReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    Moved(usize),
    /// Already on the last question; moving on means finishing.
    AtEnd,
}

#[derive(Debug, Clone)]
pub struct SessionState {
    pub test_id: u64,
    pub topic_id: Option<u64>,
    pub phase: Phase,
    pub test: Option<TestDefinition>,
    pub attempt_id: Option<u64>,
    pub attempt_number: Option<u32>,
    pub questions: Vec<Question>,
    pub answers: AnswerMap,
    pub current_question: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub remaining_seconds: Option<i64>,
    pub submit_failures: u32,
    pub result: Option<AttemptResult>,
    pub redirect_countdown: Option<u32>,
    pub error: Option<String>,
    pub hint_visible: bool,
    pub exit: Option<Navigation>,
}

impl SessionState {
    pub fn new(test_id: u64, topic_id: Option<u64>) -> Self {
        Self {
            test_id,
            topic_id,
            phase: Phase::NotStarted,
            test: None,
            attempt_id: None,
            attempt_number: None,
            questions: Vec::new(),
            answers: AnswerMap::new(),
            current_question: 0,
            started_at: None,
            remaining_seconds: None,
            submit_failures: 0,
            result: None,
            redirect_countdown: None,
            error: None,
            hint_visible: false,
            exit: None,
        }
    }

    pub fn duration_minutes(&self) -> Option<u32> {
        self.test.as_ref().and_then(|t| t.duration)
    }

    pub fn current_question(&self) -> Option<&Question> {
        self.questions.get(self.current_question)
    }

    pub fn is_last_question(&self) -> bool {
        !self.questions.is_empty() && self.current_question + 1 >= self.questions.len()
    }

    pub fn question(&self, question_id: u64) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == question_id)
    }

    pub fn answer(&self, question_id: u64) -> Option<&Answer> {
        self.answers.get(&question_id)
    }

    pub fn is_answer_ready(&self, question_id: u64) -> bool {
        self.answers
            .get(&question_id)
            .map(Answer::is_ready)
            .unwrap_or(false)
    }

    pub fn current_answer_ready(&self) -> bool {
        self.current_question()
            .map(|q| self.is_answer_ready(q.id))
            .unwrap_or(false)
    }

    /// Replaces the stored answer. The value must fit the question.
    pub fn set_answer(&mut self, question_id: u64, answer: Answer) -> Result<(), SessionError> {
        if self.phase != Phase::InProgress {
            return Err(SessionError::NotInProgress);
        }
        let question = self
            .question(question_id)
            .ok_or_else(|| SessionError::InvalidAnswer {
                question_id,
                reason: "question is not part of this attempt".to_string(),
            })?;
        if !answer.matches(question.kind) {
            return Err(SessionError::InvalidAnswer {
                question_id,
                reason: format!("answer does not fit a {:?} question", question.kind),
            });
        }
        let option_count = question.options().len();
        let out_of_range = match &answer {
            Answer::Single(Some(idx)) => *idx >= option_count,
            Answer::Multiple(set) => set.iter().any(|idx| *idx >= option_count),
            _ => false,
        };
        if out_of_range {
            return Err(SessionError::InvalidAnswer {
                question_id,
                reason: format!("option out of range (question has {})", option_count),
            });
        }
        self.answers.insert(question_id, answer);
        Ok(())
    }

    /// Moves forward only when the current answer is ready.
    pub fn advance(&mut self) -> Result<Advance, SessionError> {
        if self.phase != Phase::InProgress {
            return Err(SessionError::NotInProgress);
        }
        if !self.current_answer_ready() {
            return Err(SessionError::AnswerNotReady);
        }
        if self.is_last_question() {
            return Ok(Advance::AtEnd);
        }
        self.current_question += 1;
        self.hint_visible = false;
        Ok(Advance::Moved(self.current_question))
    }

    /// Going back is never gated on the answer.
    pub fn previous(&mut self) -> bool {
        if self.phase != Phase::InProgress || self.current_question == 0 {
            return false;
        }
        self.current_question -= 1;
        self.hint_visible = false;
        true
    }

    /// Hints exist only on hinted tests.
    pub fn toggle_hint(&mut self) -> Option<&str> {
        let hints_enabled = self.test.as_ref().is_some_and(TestDefinition::hints_enabled);
        let has_hint = self.current_question().and_then(Question::hint).is_some();
        if !hints_enabled || !has_hint {
            self.hint_visible = false;
            return None;
        }
        self.hint_visible = !self.hint_visible;
        if self.hint_visible {
            self.current_question().and_then(Question::hint)
        } else {
            None
        }
    }

    pub fn redirect_target(&self) -> RedirectTarget {
        match self.topic_id.or_else(|| self.test.as_ref().and_then(|t| t.topic_id)) {
            Some(topic_id) => RedirectTarget::SectionTree(topic_id),
            None => RedirectTarget::Topics,
        }
    }

    /// Installs a freshly started or resumed attempt.
    pub fn begin_attempt(
        &mut self,
        snapshot: &AttemptSnapshot,
        answers: AnswerMap,
        current_question: usize,
    ) {
        self.attempt_id = Some(snapshot.attempt_id);
        self.attempt_number = Some(snapshot.attempt_number);
        self.started_at = Some(snapshot.start_time);
        self.questions = snapshot.questions.clone();
        let mut merged = empty_answers(&self.questions);
        for (id, answer) in answers {
            let fits = self.question(id).is_some_and(|q| answer.matches(q.kind));
            if fits {
                merged.insert(id, answer);
            }
        }
        self.answers = merged;
        self.current_question = current_question.min(self.questions.len().saturating_sub(1));
        if let Some(test) = self.test.as_mut() {
            if test.duration.is_none() {
                test.duration = snapshot.duration;
            }
        }
        self.remaining_seconds = None;
        self.submit_failures = 0;
        self.result = None;
        self.error = None;
        self.hint_visible = false;
        self.phase = Phase::InProgress;
    }

    pub fn status_counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for q in &self.questions {
            if self.is_answer_ready(q.id) {
                counts.answered += 1;
            } else {
                counts.unanswered += 1;
            }
        }
        counts
    }

    /// Drops the attempt and returns to the pre-start state.
    pub fn reset(&mut self) {
        let test = self.test.take();
        *self = SessionState::new(self.test_id, self.topic_id);
        self.test = test;
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatusCounts {
    pub answered: usize,
    pub unanswered: usize,
}
