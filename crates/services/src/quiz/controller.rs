use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use learn_core::model::{
    FailureReason, QuestionSetDraft, QuizProgress, QuizSession, RetryDecision, Score,
    SessionEpoch, SessionState, Submission,
};
use storage::{BearerToken, CredentialProvider};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::retry::RetryPolicy;
use crate::api::QuizApi;
use crate::error::{ApiError, QuizError, SubmissionFailure};

/// Point-in-time view of a quiz session, published on every transition.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub epoch: SessionEpoch,
    pub state: SessionState,
    /// Detail for the most recent failure, cleared by the next success or restart.
    pub last_error: Option<QuizError>,
    /// Set by `close`; nothing further happens until the next `start_session`.
    pub closed: bool,
}

//
// ─── CONTROLLER ────────────────────────────────────────────────────────────────
//

/// Owns one learner's quiz session.
///
/// Fetches and submissions run as a single background task owned by the controller.
/// Restarting or dropping the controller aborts that task, and any response that
/// still arrives for an older epoch is discarded.
pub struct QuizController {
    shared: Arc<Shared>,
}

struct Shared {
    api: Arc<dyn QuizApi>,
    credentials: Arc<dyn CredentialProvider>,
    policy: RetryPolicy,
    inner: Mutex<Inner>,
    updates: watch::Sender<SessionSnapshot>,
}

struct Inner {
    epoch: SessionEpoch,
    session: QuizSession,
    last_error: Option<QuizError>,
    closed: bool,
    task: Option<JoinHandle<()>>,
}

impl QuizController {
    #[must_use]
    pub fn new(api: Arc<dyn QuizApi>, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self::with_policy(api, credentials, RetryPolicy::default())
    }

    #[must_use]
    pub fn with_policy(
        api: Arc<dyn QuizApi>,
        credentials: Arc<dyn CredentialProvider>,
        policy: RetryPolicy,
    ) -> Self {
        let inner = Inner {
            epoch: SessionEpoch::default(),
            session: QuizSession::new(),
            last_error: None,
            closed: false,
            task: None,
        };
        let (updates, _) = watch::channel(inner.snapshot());
        Self {
            shared: Arc::new(Shared {
                api,
                credentials,
                policy,
                inner: Mutex::new(inner),
                updates,
            }),
        }
    }

    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        self.shared.policy
    }

    /// Start (or restart) the session and fetch a question set in the background.
    ///
    /// Cancels whatever the previous session still had pending and resets the
    /// attempt count.
    ///
    /// # Errors
    ///
    /// Returns `QuizError::Unauthenticated` without touching the network when no
    /// credential is available; the session is then `Failed(Unauthenticated)`.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn start_session(&self) -> Result<SessionEpoch, QuizError> {
        let has_credential = self.shared.credentials.get().is_some();

        let mut inner = self.shared.lock();
        inner.cancel_task();
        inner.epoch = inner.epoch.next();
        inner.session.restart();
        inner.last_error = None;
        inner.closed = false;
        let epoch = inner.epoch;

        if !has_credential {
            warn!(%epoch, "no credential available, not fetching quiz");
            inner.fail(FailureReason::Unauthenticated, QuizError::Unauthenticated);
            self.shared.publish(&inner);
            return Err(QuizError::Unauthenticated);
        }

        debug!(%epoch, "starting quiz session");
        inner.task = Some(tokio::spawn(Arc::clone(&self.shared).fetch_loop(epoch)));
        self.shared.publish(&inner);
        Ok(epoch)
    }

    /// Discard questions, answers and score and fetch a new question set.
    ///
    /// # Errors
    ///
    /// See `start_session`.
    pub fn reset(&self) -> Result<SessionEpoch, QuizError> {
        self.start_session()
    }

    /// Choose `option` for the question with `prompt`; re-answering replaces the choice.
    ///
    /// # Errors
    ///
    /// Returns `QuizError::NotActive` outside `Active`, and `UnknownQuestion` /
    /// `UnknownOption` for choices that do not belong to the current set.
    pub fn record_answer(&self, prompt: &str, option: &str) -> Result<QuizProgress, QuizError> {
        let mut inner = self.shared.lock();
        let progress = inner.session.record_answer(prompt, option).map_err(|err| {
            debug!(error = %err, "answer rejected");
            QuizError::from(err)
        })?;
        self.shared.publish(&inner);
        Ok(progress)
    }

    /// Submit the complete answer set for scoring.
    ///
    /// A failed submission returns the session to `Active` with answers intact and is
    /// never retried automatically.
    ///
    /// # Errors
    ///
    /// Returns `IncompleteSubmission` or `NotActive` without any state change when the
    /// session cannot be submitted, `SubmissionFailed` when scoring fails, and
    /// `Superseded` if the session was restarted while scoring was in flight.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub async fn submit(&self) -> Result<Score, QuizError> {
        let token = self.shared.credentials.get();
        let outcome = {
            let mut inner = self.shared.lock();
            let submission = inner.session.begin_submit()?;
            let Some(token) = token else {
                if let Err(err) = inner.session.abort_submit() {
                    warn!(error = %err, "could not undo submission");
                }
                return Err(QuizError::Unauthenticated);
            };

            let epoch = inner.epoch;
            let (reply, outcome) = oneshot::channel();
            inner.last_error = None;
            inner.task = Some(tokio::spawn(Arc::clone(&self.shared).submit_once(
                epoch, token, submission, reply,
            )));
            self.shared.publish(&inner);
            outcome
        };

        outcome.await.unwrap_or(Err(QuizError::Superseded))
    }

    /// Abandon the session: cancel pending work and ignore anything still in flight.
    ///
    /// The state is left as it was; snapshots report `closed` so `settled` waiters return.
    pub fn close(&self) {
        let mut inner = self.shared.lock();
        inner.cancel_task();
        inner.epoch = inner.epoch.next();
        inner.closed = true;
        debug!(epoch = %inner.epoch, "quiz session closed");
        self.shared.publish(&inner);
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.updates.borrow().clone()
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.snapshot().state
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.shared.updates.subscribe()
    }

    /// Wait until the session is neither loading nor submitting, or has been closed.
    ///
    /// Only meaningful after `start_session`; a controller that was never started
    /// stays in `Loading`.
    pub async fn settled(&self) -> SessionSnapshot {
        let mut updates = self.shared.updates.subscribe();
        match updates
            .wait_for(|snapshot| snapshot.closed || snapshot.state.is_settled())
            .await
        {
            Ok(snapshot) => snapshot.clone(),
            Err(_) => self.snapshot(),
        }
    }
}

impl Drop for QuizController {
    fn drop(&mut self) {
        self.close();
    }
}

//
// ─── BACKGROUND WORK ───────────────────────────────────────────────────────────
//

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_current(&self, epoch: SessionEpoch) -> bool {
        self.lock().epoch == epoch
    }

    fn publish(&self, inner: &Inner) {
        self.updates.send_replace(inner.snapshot());
    }

    async fn fetch_loop(self: Arc<Self>, epoch: SessionEpoch) {
        loop {
            let Some(token) = self.credentials.get() else {
                let mut inner = self.lock();
                if inner.epoch == epoch {
                    warn!(%epoch, "credential disappeared before fetching quiz");
                    inner.fail(FailureReason::Unauthenticated, QuizError::Unauthenticated);
                    self.publish(&inner);
                }
                return;
            };

            let result = self.api.fetch_question_set(&token).await;
            if matches!(&result, Err(err) if err.is_unauthorized()) && self.is_current(epoch) {
                warn!(%epoch, "credential rejected, clearing it");
                self.credentials.clear();
            }

            let retry = {
                let mut inner = self.lock();
                if inner.epoch != epoch {
                    debug!(%epoch, current = %inner.epoch, "dropping question set for superseded session");
                    return;
                }
                let retry = self.apply_fetch(&mut inner, result);
                self.publish(&inner);
                retry
            };
            if !retry {
                return;
            }

            debug!(%epoch, delay = ?self.policy.delay, "retrying question set fetch");
            tokio::time::sleep(self.policy.delay).await;
        }
    }

    /// Apply one fetch outcome; returns true when another attempt should follow.
    fn apply_fetch(&self, inner: &mut Inner, result: Result<QuestionSetDraft, ApiError>) -> bool {
        let epoch = inner.epoch;
        match result {
            Ok(draft) => {
                match inner.session.load(draft) {
                    Ok(()) => {
                        let questions = inner.session.state().questions().map_or(0, |q| q.len());
                        info!(%epoch, questions, "quiz ready");
                        inner.last_error = None;
                    }
                    Err(err) => {
                        warn!(%epoch, error = %err, "rejected question set");
                        inner.last_error = Some(err.into());
                    }
                }
                false
            }
            Err(err) if err.is_unauthorized() => {
                inner.fail(FailureReason::Unauthenticated, QuizError::Unauthenticated);
                false
            }
            Err(err) if err.is_invalid_payload() => {
                warn!(%epoch, error = %err, "question set could not be decoded");
                inner.fail(
                    FailureReason::InvalidPayload,
                    QuizError::InvalidPayload(err.to_string()),
                );
                false
            }
            Err(err) => match inner.session.record_transient_failure(self.policy.max_attempts) {
                Ok(RetryDecision::Retry { attempts }) => {
                    warn!(%epoch, attempts, error = %err, "question set fetch failed");
                    inner.last_error = Some(QuizError::TransientFetch {
                        attempts,
                        source: Arc::new(err),
                    });
                    true
                }
                Ok(RetryDecision::GiveUp { attempts }) => {
                    warn!(%epoch, attempts, error = %err, "giving up on question set");
                    inner.last_error = Some(QuizError::MaxRetriesExceeded { attempts });
                    false
                }
                Err(state_err) => {
                    warn!(%epoch, error = %state_err, "fetch finished in unexpected state");
                    false
                }
            },
        }
    }

    async fn submit_once(
        self: Arc<Self>,
        epoch: SessionEpoch,
        token: BearerToken,
        submission: Submission,
        reply: oneshot::Sender<Result<Score, QuizError>>,
    ) {
        let result = self.api.score(&token, &submission).await;
        let outcome = {
            let mut inner = self.lock();
            if inner.epoch == epoch {
                let outcome = Self::apply_score(&mut inner, result);
                self.publish(&inner);
                outcome
            } else {
                debug!(%epoch, current = %inner.epoch, "dropping score for superseded session");
                Err(QuizError::Superseded)
            }
        };

        if reply.send(outcome).is_err() {
            debug!(%epoch, "submitter stopped waiting for the score");
        }
    }

    fn apply_score(inner: &mut Inner, result: Result<f64, ApiError>) -> Result<Score, QuizError> {
        let epoch = inner.epoch;
        let scored = result
            .map_err(SubmissionFailure::from)
            .and_then(|raw| Score::from_percentage(raw).map_err(SubmissionFailure::from));

        match scored {
            Ok(score) => {
                inner.session.complete_submit(score)?;
                info!(%epoch, %score, "quiz scored");
                inner.last_error = None;
                Ok(score)
            }
            Err(failure) => {
                warn!(%epoch, error = %failure, "submission failed");
                inner.session.abort_submit()?;
                let err = QuizError::from(failure);
                inner.last_error = Some(err.clone());
                Err(err)
            }
        }
    }
}

impl Inner {
    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            epoch: self.epoch,
            state: self.session.state().clone(),
            last_error: self.last_error.clone(),
            closed: self.closed,
        }
    }

    fn cancel_task(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn fail(&mut self, reason: FailureReason, err: QuizError) {
        if let Err(state_err) = self.session.fail(reason) {
            warn!(epoch = %self.epoch, error = %state_err, "could not mark session failed");
            return;
        }
        self.last_error = Some(err);
    }
}
