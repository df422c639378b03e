use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{debug, info, warn};

use crate::api::AttemptApi;
use crate::error::SessionError;
use crate::loader::{self, LoadOutcome};
use crate::model::{Answer, AnswerMap, AttemptResult};
use crate::persist;
use crate::state::{Advance, ExitReason, Navigation, Phase, SessionState};
use crate::store::SessionStore;
use crate::submit::{self, SubmitOutcome, Trigger, MAX_SUBMIT_ATTEMPTS, REDIRECT_AFTER_SECS};
use crate::timer::{remaining_seconds, Clock, Scheduled, TimerEvent, TimerSlot, Timers};

/// Drives one test attempt: loading, answering, timing and submission.
///
/// All timers feed a single event queue; the owner pulls events with
/// [`SessionController::next_event`] and hands them back through
/// [`SessionController::handle_event`]. Dropping the controller cancels
/// every timer.
pub struct SessionController {
    state: SessionState,
    api: Arc<dyn AttemptApi>,
    store: Box<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    timers: Timers,
    events: UnboundedReceiver<Scheduled>,
}

impl SessionController {
    pub fn new(
        test_id: u64,
        topic_id: Option<u64>,
        api: Arc<dyn AttemptApi>,
        store: Box<dyn SessionStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (tx, events) = mpsc::unbounded_channel();
        Self {
            state: SessionState::new(test_id, topic_id),
            api,
            store,
            clock,
            timers: Timers::new(tx),
            events,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_timer_armed(&self, slot: TimerSlot) -> bool {
        self.timers.is_armed(slot)
    }

    pub async fn load(&mut self) -> Result<(), SessionError> {
        let test_id = self.state.test_id;
        let outcome = loader::load(self.api.as_ref(), self.store.as_mut(), test_id).await;

        match outcome {
            LoadOutcome::NotStarted { test } => {
                self.state.test = Some(test);
                self.state.phase = Phase::NotStarted;
                Ok(())
            }
            LoadOutcome::Resumed(resumed) => {
                self.state.test = Some(resumed.test);
                self.state
                    .begin_attempt(&resumed.snapshot, resumed.answers, resumed.current_question);
                self.save_all();
                self.arm_countdown();
                Ok(())
            }
            LoadOutcome::Completed { test, result } => {
                self.state.test = Some(test);
                self.complete(result);
                Ok(())
            }
            LoadOutcome::Failed(reason) => {
                self.state.phase = Phase::Unusable;
                self.state.error = Some(reason.clone());
                Err(SessionError::Load(reason))
            }
        }
    }

    pub async fn start(&mut self) -> Result<(), SessionError> {
        match self.state.phase {
            Phase::NotStarted => {}
            Phase::InProgress | Phase::Submitting => return Err(SessionError::Conflict),
            _ => return Err(SessionError::NotInProgress),
        }

        let snapshot = match loader::start(self.api.as_ref(), self.state.test_id).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                self.state.error = Some(err.to_string());
                return Err(err);
            }
        };

        self.state.begin_attempt(&snapshot, AnswerMap::new(), 0);
        self.save_all();
        self.arm_countdown();
        Ok(())
    }

    pub fn set_answer(&mut self, question_id: u64, answer: Answer) -> Result<(), SessionError> {
        self.state.set_answer(question_id, answer)?;
        self.state.error = None;
        self.save_progress();
        Ok(())
    }

    /// Moves to the next question, or submits when on the last one.
    pub async fn next(&mut self) -> Result<Advance, SessionError> {
        let advance = self.state.advance()?;
        match advance {
            Advance::Moved(_) => {
                self.state.error = None;
                self.save_progress();
            }
            Advance::AtEnd => self.submit(Trigger::LastQuestion).await,
        }
        Ok(advance)
    }

    pub fn previous(&mut self) -> bool {
        let moved = self.state.previous();
        if moved {
            self.state.error = None;
            self.save_progress();
        }
        moved
    }

    pub async fn finish(&mut self) -> Result<(), SessionError> {
        if self.state.phase != Phase::InProgress {
            return Err(SessionError::NotInProgress);
        }
        if !self.state.current_answer_ready() {
            return Err(SessionError::AnswerNotReady);
        }
        self.submit(Trigger::Manual).await;
        Ok(())
    }

    pub fn toggle_hint(&mut self) -> Option<String> {
        self.state.toggle_hint().map(str::to_string)
    }

    /// Explicit navigation away. A running attempt stays saved so it can be
    /// resumed.
    pub fn leave(&mut self) {
        self.timers.cancel_all();
        self.state.redirect_countdown = None;
        self.state.exit = Some(Navigation {
            target: self.state.redirect_target(),
            reason: ExitReason::UserLeft,
        });
    }

    /// Forgets the attempt locally and returns to the start screen.
    pub fn reset(&mut self) {
        self.timers.cancel_all();
        self.clear_saved();
        self.state.reset();
    }

    pub fn shutdown(&mut self) {
        self.timers.cancel_all();
    }

    pub async fn next_event(&mut self) -> Option<Scheduled> {
        self.events.recv().await
    }

    pub async fn handle_event(&mut self, scheduled: Scheduled) {
        if !self.timers.is_current(&scheduled) {
            debug!(?scheduled, "dropping event from a cancelled timer");
            return;
        }

        match scheduled.event {
            TimerEvent::Tick(secs) => {
                self.state.remaining_seconds = Some(secs);
            }
            TimerEvent::TimeExpired => {
                self.timers.release(TimerSlot::Countdown);
                self.state.remaining_seconds = Some(0);
                if self.state.phase == Phase::InProgress {
                    info!(test_id = self.state.test_id, "time is up");
                    self.submit(Trigger::TimeExpired).await;
                }
            }
            TimerEvent::RetrySubmit => {
                self.timers.release(TimerSlot::Countdown);
                if self.state.phase == Phase::InProgress {
                    self.submit(Trigger::Retry).await;
                }
            }
            TimerEvent::RedirectTick(left) => {
                self.state.redirect_countdown = Some(left);
            }
            TimerEvent::RedirectDue => {
                self.timers.cancel_all();
                self.state.redirect_countdown = None;
                self.state.exit = Some(Navigation {
                    target: self.state.redirect_target(),
                    reason: ExitReason::RedirectElapsed,
                });
            }
        }
    }

    async fn submit(&mut self, trigger: Trigger) {
        if self.state.phase != Phase::InProgress {
            debug!(?trigger, phase = ?self.state.phase, "submission already handled");
            return;
        }
        if self.state.submit_failures >= MAX_SUBMIT_ATTEMPTS {
            self.abandon();
            return;
        }

        self.state.phase = Phase::Submitting;
        self.timers.cancel(TimerSlot::Countdown);
        info!(
            test_id = self.state.test_id,
            ?trigger,
            automatic = trigger.is_automatic(),
            "submitting answers"
        );

        let now = self.clock.now();
        let outcome = submit::submit_attempt(self.api.as_ref(), &self.state, now).await;

        match outcome {
            SubmitOutcome::Completed(result) | SubmitOutcome::AlreadyCompleted(result) => {
                self.complete(result);
            }
            SubmitOutcome::Failed(err) => {
                self.state.submit_failures += 1;
                let failures = self.state.submit_failures;
                warn!(
                    test_id = self.state.test_id,
                    failures,
                    client_error = err.is_client_error(),
                    error = %err,
                    "submission failed"
                );
                self.state.error = Some(SessionError::Submission(err.to_string()).to_string());

                if failures >= MAX_SUBMIT_ATTEMPTS {
                    self.abandon();
                    return;
                }

                self.state.phase = Phase::InProgress;
                if self.time_is_up() {
                    self.timers.schedule_retry(submit::retry_backoff(failures));
                } else {
                    self.arm_countdown();
                }
            }
        }
    }

    fn complete(&mut self, result: AttemptResult) {
        info!(
            test_id = self.state.test_id,
            attempt_id = result.attempt_id,
            score = result.score,
            "attempt completed"
        );
        self.timers.cancel_all();
        self.state.phase = Phase::Completed;
        self.state.result = Some(result);
        self.state.error = None;
        self.clear_saved();
        self.state.redirect_countdown = Some(REDIRECT_AFTER_SECS);
        self.timers.start_redirect(REDIRECT_AFTER_SECS);
    }

    fn abandon(&mut self) {
        warn!(
            test_id = self.state.test_id,
            failures = self.state.submit_failures,
            "giving up on submission"
        );
        self.timers.cancel_all();
        self.state.phase = Phase::Abandoned;
        self.clear_saved();
        self.state.exit = Some(Navigation {
            target: self.state.redirect_target(),
            reason: ExitReason::SubmissionAbandoned,
        });
    }

    fn time_is_up(&self) -> bool {
        match (self.state.started_at, self.state.duration_minutes()) {
            (Some(start), Some(minutes)) => remaining_seconds(minutes, start, self.clock.now()) == 0,
            _ => false,
        }
    }

    fn arm_countdown(&mut self) {
        let runnable = self.state.phase == Phase::InProgress && self.state.result.is_none();
        match (runnable, self.state.started_at, self.state.duration_minutes()) {
            (true, Some(start), Some(minutes)) => {
                self.state.remaining_seconds =
                    Some(remaining_seconds(minutes, start, self.clock.now()));
                self.timers.start_countdown(start, minutes, self.clock.clone());
            }
            _ => {
                self.state.remaining_seconds = None;
                self.timers.cancel(TimerSlot::Countdown);
            }
        }
    }

    fn save_all(&mut self) {
        if let Err(err) = persist::save_state(self.store.as_mut(), &self.state) {
            warn!(test_id = self.state.test_id, error = %err, "cannot save session");
        }
    }

    fn save_progress(&mut self) {
        if let Err(err) = persist::save_progress(self.store.as_mut(), &self.state) {
            warn!(test_id = self.state.test_id, error = %err, "cannot save progress");
        }
    }

    fn clear_saved(&mut self) {
        if let Err(err) = persist::clear_state(self.store.as_mut(), self.state.test_id) {
            warn!(test_id = self.state.test_id, error = %err, "cannot clear saved session");
        }
    }
}
