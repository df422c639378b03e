use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::api::AttemptApi;
use crate::error::ApiError;
use crate::model::*;
use crate::state::SessionState;
use crate::timer::elapsed_seconds;

/// Failed submissions tolerated before the session is given up.
pub const MAX_SUBMIT_ATTEMPTS: u32 = 3;

/// Seconds the result stays on screen before leaving the test.
pub const REDIRECT_AFTER_SECS: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Manual,
    LastQuestion,
    TimeExpired,
    Retry,
}

impl Trigger {
    pub fn is_automatic(self) -> bool {
        matches!(self, Trigger::TimeExpired | Trigger::Retry)
    }
}

#[derive(Debug)]
pub enum SubmitOutcome {
    Completed(AttemptResult),
    /// The server had already finished the attempt; nothing was sent.
    AlreadyCompleted(AttemptResult),
    Failed(ApiError),
}

/// One entry per question, in question order. Unanswered questions are sent
/// as an empty selection or empty text.
pub fn encode_answers(state: &SessionState) -> Vec<SubmittedAnswer> {
    state
        .questions
        .iter()
        .map(|q| {
            let answer = match state.answers.get(&q.id) {
                Some(answer) if answer.matches(q.kind) => answer.to_value(),
                _ => Answer::empty_for(q.kind).to_value(),
            };
            SubmittedAnswer {
                question_id: q.id,
                answer,
            }
        })
        .collect()
}

/// `None` when no attempt is running.
pub fn build_payload(state: &SessionState, now: DateTime<Utc>) -> Option<SubmitPayload> {
    let attempt_id = state.attempt_id?;
    let time_spent = state
        .started_at
        .map(|start| elapsed_seconds(start, now))
        .unwrap_or(0);
    Some(SubmitPayload {
        attempt_id,
        time_spent,
        answers: encode_answers(state),
    })
}

pub fn result_from_receipt(
    receipt: &SubmitReceipt,
    state: &SessionState,
    time_spent: i64,
) -> AttemptResult {
    let total = receipt
        .total_questions
        .unwrap_or(state.questions.len() as u32);
    let score = receipt.score.unwrap_or(0.0);
    let correct = receipt
        .correct_count
        .unwrap_or_else(|| ((score / 100.0) * f64::from(total)).round() as u32);
    AttemptResult {
        attempt_id: receipt.id.or(state.attempt_id).unwrap_or_default(),
        attempt_number: receipt
            .attempt_number
            .or(state.attempt_number)
            .unwrap_or_default(),
        score,
        correct_count: correct,
        total_questions: total,
        completed_at: receipt.completed_at,
        time_spent: receipt.time_spent.or(Some(time_spent)),
    }
}

/// Delay before the automatic retry that follows the `failures`-th failure.
pub fn retry_backoff(failures: u32) -> Duration {
    Duration::from_secs(2u64.saturating_pow(failures).min(30))
}

/// Re-checks the server first so a retry never scores an attempt twice, then
/// sends every answer.
pub async fn submit_attempt(
    api: &dyn AttemptApi,
    state: &SessionState,
    now: DateTime<Utc>,
) -> SubmitOutcome {
    let Some(payload) = build_payload(state, now) else {
        return SubmitOutcome::Failed(ApiError::Decode("no attempt to submit".to_string()));
    };

    match api.attempt_status(state.test_id).await {
        Ok(Some(snapshot))
            if snapshot.status == AttemptStatus::Completed
                && snapshot.attempt_id == payload.attempt_id =>
        {
            info!(
                test_id = state.test_id,
                attempt_id = snapshot.attempt_id,
                "attempt already completed on the server"
            );
            let mut snapshot = snapshot;
            if snapshot.questions.is_empty() {
                snapshot.questions = state.questions.clone();
            }
            return SubmitOutcome::AlreadyCompleted(snapshot.completed_result());
        }
        Ok(_) => {}
        Err(err) => {
            warn!(test_id = state.test_id, error = %err, "status re-check failed; submitting anyway");
        }
    }

    debug!(
        test_id = state.test_id,
        attempt_id = payload.attempt_id,
        answers = payload.answers.len(),
        time_spent = payload.time_spent,
        "submitting attempt"
    );
    match api.submit_attempt(state.test_id, &payload).await {
        Ok(receipt) => SubmitOutcome::Completed(result_from_receipt(
            &receipt,
            state,
            payload.time_spent,
        )),
        Err(err) => SubmitOutcome::Failed(err),
    }
}
