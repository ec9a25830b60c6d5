use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::{Mutex, OnceLock, Weak};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use learn_core::model::{
    FailureReason, QuestionDraft, QuestionSetDraft, QuizResult, SessionState, StateKind,
    Submission,
};
use reqwest::StatusCode;
use services::{ApiError, QuizApi, QuizController, QuizError, RetryPolicy};
use storage::{BearerToken, CredentialProvider, InMemoryCredentials};
use tokio::sync::oneshot;
use tokio::time::Instant;

enum FetchStep {
    Ready(Result<QuestionSetDraft, ApiError>),
    Gated(oneshot::Receiver<()>, QuestionSetDraft),
}

/// `QuizApi` that replays scripted responses in order.
#[derive(Default)]
struct ScriptedApi {
    fetches: Mutex<VecDeque<FetchStep>>,
    scores: Mutex<VecDeque<Result<f64, ApiError>>>,
    fetch_calls: AtomicUsize,
    score_calls: AtomicUsize,
    last_submission: Mutex<Option<Submission>>,
}

impl ScriptedApi {
    fn push_fetch(&self, result: Result<QuestionSetDraft, ApiError>) {
        self.fetches
            .lock()
            .unwrap()
            .push_back(FetchStep::Ready(result));
    }

    fn push_gated_fetch(&self, draft: QuestionSetDraft) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.fetches
            .lock()
            .unwrap()
            .push_back(FetchStep::Gated(rx, draft));
        tx
    }

    fn push_score(&self, result: Result<f64, ApiError>) {
        self.scores.lock().unwrap().push_back(result);
    }

    fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    fn score_calls(&self) -> usize {
        self.score_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QuizApi for ScriptedApi {
    async fn fetch_question_set(&self, _token: &BearerToken) -> Result<QuestionSetDraft, ApiError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let step = self.fetches.lock().unwrap().pop_front();
        match step {
            Some(FetchStep::Ready(result)) => result,
            Some(FetchStep::Gated(gate, draft)) => {
                let _ = gate.await;
                Ok(draft)
            }
            None => Err(server_error()),
        }
    }

    async fn score(&self, _token: &BearerToken, submission: &Submission) -> Result<f64, ApiError> {
        self.score_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_submission.lock().unwrap() = Some(submission.clone());
        self.scores
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(server_error()))
    }

    async fn quiz_history(&self, _token: &BearerToken) -> Result<Vec<QuizResult>, ApiError> {
        Ok(Vec::new())
    }
}

fn server_error() -> ApiError {
    ApiError::Status(StatusCode::INTERNAL_SERVER_ERROR, "boom".into())
}

fn single_question() -> QuestionSetDraft {
    QuestionSetDraft::new(None, vec![QuestionDraft::new("Q1", ["A", "B"], "A")])
}

fn topic_set(topic: &str) -> QuestionSetDraft {
    QuestionSetDraft::new(
        Some(topic.to_string()),
        vec![
            QuestionDraft::new("Q1", ["A", "B"], "A"),
            QuestionDraft::new("Q2", ["C", "D"], "D"),
        ],
    )
}

fn setup() -> (Arc<ScriptedApi>, InMemoryCredentials, QuizController) {
    let api = Arc::new(ScriptedApi::default());
    let credentials = InMemoryCredentials::with_token(BearerToken::new("token").unwrap());
    let controller = QuizController::new(api.clone(), Arc::new(credentials.clone()));
    (api, credentials, controller)
}

async fn wait_for_fetch_calls(api: &ScriptedApi, calls: usize) {
    while api.fetch_calls() < calls {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn single_question_quiz_is_scored() {
    let (api, _credentials, controller) = setup();
    api.push_fetch(Ok(single_question()));
    api.push_score(Ok(100.0));

    controller.start_session().unwrap();
    let snapshot = controller.settled().await;
    assert_eq!(snapshot.state.kind(), StateKind::Active);
    let ratio = snapshot.state.progress().unwrap().completion_ratio();
    assert!(ratio.abs() < f64::EPSILON);

    let progress = controller.record_answer("Q1", "A").unwrap();
    assert!((progress.completion_ratio() - 1.0).abs() < f64::EPSILON);

    let score = controller.submit().await.unwrap();
    assert_eq!(score.value(), 100);
    assert_eq!(controller.state().score().map(|s| s.value()), Some(100));

    let submission = api.last_submission.lock().unwrap().clone().unwrap();
    assert_eq!(submission.answers.get("Q1").map(String::as_str), Some("A"));
    assert_eq!(
        submission.correct_answers.get("Q1").map(String::as_str),
        Some("A")
    );
}

#[tokio::test(start_paused = true)]
async fn three_transient_failures_exhaust_retries() {
    let (api, _credentials, controller) = setup();
    api.push_fetch(Err(server_error()));
    api.push_fetch(Err(server_error()));
    api.push_fetch(Err(server_error()));

    let started = Instant::now();
    controller.start_session().unwrap();
    let snapshot = controller.settled().await;

    assert_eq!(
        snapshot.state.failure(),
        Some((FailureReason::MaxRetriesExceeded, 3))
    );
    assert!(matches!(
        snapshot.last_error,
        Some(QuizError::MaxRetriesExceeded { attempts: 3 })
    ));
    assert_eq!(api.fetch_calls(), 3);
    assert!(started.elapsed() >= RetryPolicy::DEFAULT_DELAY * 2);

    // nothing else fires later
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(api.fetch_calls(), 3);

    // a manual restart begins again from zero attempts
    api.push_fetch(Ok(single_question()));
    controller.start_session().unwrap();
    assert_eq!(controller.state(), SessionState::Loading { attempts: 0 });
    let snapshot = controller.settled().await;
    assert_eq!(snapshot.state.kind(), StateKind::Active);
    assert_eq!(api.fetch_calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn transient_failure_then_success_recovers() {
    let (api, _credentials, controller) = setup();
    api.push_fetch(Err(server_error()));
    api.push_fetch(Ok(single_question()));

    let mut updates = controller.subscribe();
    controller.start_session().unwrap();

    updates
        .wait_for(|s| s.state == SessionState::Loading { attempts: 1 })
        .await
        .unwrap();
    assert!(matches!(
        updates.borrow().last_error,
        Some(QuizError::TransientFetch { attempts: 1, .. })
    ));

    let snapshot = controller.settled().await;
    assert_eq!(snapshot.state.kind(), StateKind::Active);
    assert!(snapshot.last_error.is_none());
    assert_eq!(api.fetch_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn auth_rejection_is_never_retried() {
    let (api, credentials, controller) = setup();
    api.push_fetch(Err(server_error()));
    api.push_fetch(Err(ApiError::Unauthorized));
    api.push_fetch(Ok(single_question()));

    controller.start_session().unwrap();
    let snapshot = controller.settled().await;

    assert_eq!(
        snapshot.state.failure(),
        Some((FailureReason::Unauthenticated, 1))
    );
    assert!(credentials.get().is_none());

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(api.fetch_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn missing_credential_fails_without_network() {
    let api = Arc::new(ScriptedApi::default());
    let controller = QuizController::new(api.clone(), Arc::new(InMemoryCredentials::new()));

    let err = controller.start_session().unwrap_err();
    assert!(matches!(err, QuizError::Unauthenticated));
    assert_eq!(
        controller.state().failure(),
        Some((FailureReason::Unauthenticated, 0))
    );

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(api.fetch_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn invalid_payload_fails_without_retry() {
    let (api, _credentials, controller) = setup();
    api.push_fetch(Ok(QuestionSetDraft::new(Some("Empty".into()), Vec::new())));

    controller.start_session().unwrap();
    let snapshot = controller.settled().await;

    assert_eq!(
        snapshot.state.failure(),
        Some((FailureReason::InvalidPayload, 0))
    );
    assert!(matches!(snapshot.last_error, Some(QuizError::InvalidPayload(_))));

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(api.fetch_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn incomplete_submission_is_refused() {
    let (api, _credentials, controller) = setup();
    api.push_fetch(Ok(topic_set("Rust")));
    controller.start_session().unwrap();
    controller.settled().await;

    let before = controller.state();
    let err = controller.submit().await.unwrap_err();
    assert!(matches!(
        err,
        QuizError::IncompleteSubmission {
            answered: 0,
            total: 2
        }
    ));
    assert_eq!(controller.state(), before);

    controller.record_answer("Q1", "A").unwrap();
    controller.record_answer("Q1", "B").unwrap();
    let before = controller.state();
    assert_eq!(before.answers().unwrap().len(), 1);
    assert!(matches!(
        controller.submit().await,
        Err(QuizError::IncompleteSubmission {
            answered: 1,
            total: 2
        })
    ));
    assert_eq!(controller.state(), before);
    assert_eq!(api.score_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn invalid_answers_are_rejected() {
    let (api, _credentials, controller) = setup();
    api.push_fetch(Ok(topic_set("Rust")));
    controller.start_session().unwrap();
    controller.settled().await;
    let before = controller.state();

    assert!(matches!(
        controller.record_answer("Q1", "Z"),
        Err(QuizError::UnknownOption { .. })
    ));
    assert!(matches!(
        controller.record_answer("Q7", "A"),
        Err(QuizError::UnknownQuestion { .. })
    ));
    assert_eq!(controller.state(), before);
}

#[tokio::test(start_paused = true)]
async fn submission_failure_returns_to_active() {
    let (api, _credentials, controller) = setup();
    api.push_fetch(Ok(single_question()));
    api.push_score(Err(server_error()));
    api.push_score(Ok(0.0));

    controller.start_session().unwrap();
    controller.settled().await;
    controller.record_answer("Q1", "B").unwrap();

    let err = controller.submit().await.unwrap_err();
    assert!(matches!(err, QuizError::SubmissionFailed(_)));
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.state.kind(), StateKind::Active);
    assert_eq!(snapshot.state.answers().unwrap().get("Q1"), Some("B"));
    assert!(matches!(
        snapshot.last_error,
        Some(QuizError::SubmissionFailed(_))
    ));

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(api.score_calls(), 1);

    let score = controller.submit().await.unwrap();
    assert_eq!(score.value(), 0);
    assert_eq!(api.score_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn out_of_range_score_is_a_submission_failure() {
    let (api, _credentials, controller) = setup();
    api.push_fetch(Ok(single_question()));
    api.push_score(Ok(250.0));

    controller.start_session().unwrap();
    controller.settled().await;
    controller.record_answer("Q1", "A").unwrap();

    assert!(matches!(
        controller.submit().await,
        Err(QuizError::SubmissionFailed(_))
    ));
    assert_eq!(controller.state().kind(), StateKind::Active);
}

#[tokio::test(start_paused = true)]
async fn fractional_score_is_rounded_not_rejected() {
    let (api, _credentials, controller) = setup();
    api.push_fetch(Ok(single_question()));
    api.push_score(Ok(66.67));

    controller.start_session().unwrap();
    controller.settled().await;
    controller.record_answer("Q1", "B").unwrap();

    let score = controller.submit().await.unwrap();
    assert_eq!(score.value(), 67);
    assert_eq!(controller.state().kind(), StateKind::Scored);
}

#[tokio::test(start_paused = true)]
async fn scored_session_refuses_further_changes() {
    let (api, _credentials, controller) = setup();
    api.push_fetch(Ok(single_question()));
    api.push_score(Ok(100.0));

    controller.start_session().unwrap();
    controller.settled().await;
    controller.record_answer("Q1", "A").unwrap();
    controller.submit().await.unwrap();
    let before = controller.state();

    assert!(matches!(
        controller.submit().await,
        Err(QuizError::NotActive {
            state: StateKind::Scored
        })
    ));
    assert!(matches!(
        controller.record_answer("Q1", "B"),
        Err(QuizError::NotActive { .. })
    ));
    assert_eq!(controller.state(), before);
    assert_eq!(api.score_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn superseded_fetch_never_touches_new_session() {
    let (api, _credentials, controller) = setup();
    let release_first = api.push_gated_fetch(topic_set("First"));
    api.push_fetch(Ok(topic_set("Second")));

    let first = controller.start_session().unwrap();
    wait_for_fetch_calls(&api, 1).await;

    let second = controller.reset().unwrap();
    assert!(second > first);
    let snapshot = controller.settled().await;
    assert_eq!(snapshot.epoch, second);
    assert_eq!(
        snapshot.state.questions().unwrap().topic(),
        Some("Second")
    );

    // the first fetch was cancelled along with its session
    let _ = release_first.send(());
    tokio::time::sleep(Duration::from_secs(5)).await;

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.epoch, second);
    assert_eq!(
        snapshot.state.questions().unwrap().topic(),
        Some("Second")
    );
}

#[tokio::test(start_paused = true)]
async fn restart_cancels_pending_retry() {
    let (api, _credentials, controller) = setup();
    api.push_fetch(Err(server_error()));
    api.push_fetch(Ok(topic_set("Fresh")));

    let mut updates = controller.subscribe();
    controller.start_session().unwrap();
    updates
        .wait_for(|s| s.state == SessionState::Loading { attempts: 1 })
        .await
        .unwrap();

    controller.start_session().unwrap();
    let snapshot = controller.settled().await;
    assert_eq!(snapshot.state.kind(), StateKind::Active);
    assert_eq!(api.fetch_calls(), 2);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(api.fetch_calls(), 2);
    assert_eq!(controller.state().kind(), StateKind::Active);
}

#[tokio::test(start_paused = true)]
async fn dropping_controller_cancels_in_flight_fetch() {
    let (api, _credentials, controller) = setup();
    let mut release = api.push_gated_fetch(single_question());

    controller.start_session().unwrap();
    wait_for_fetch_calls(&api, 1).await;

    drop(controller);
    release.closed().await;
}

#[tokio::test(start_paused = true)]
async fn close_releases_settled_waiters() {
    let (api, _credentials, controller) = setup();
    let _release = api.push_gated_fetch(single_question());

    controller.start_session().unwrap();
    wait_for_fetch_calls(&api, 1).await;

    let (snapshot, ()) = tokio::join!(controller.settled(), async {
        tokio::task::yield_now().await;
        controller.close();
    });
    assert!(snapshot.closed);
    assert_eq!(snapshot.state.kind(), StateKind::Loading);

    // A closed controller does not block later waiters either.
    assert!(controller.settled().await.closed);

    controller.start_session().unwrap();
    assert!(!controller.snapshot().closed);
}

/// Credential provider that calls back into the controller on every access.
///
/// The controller's session lock is not reentrant, so this hangs if the controller
/// touches credentials while holding it.
#[derive(Default)]
struct ReentrantCredentials {
    inner: InMemoryCredentials,
    controller: OnceLock<Weak<QuizController>>,
    reentered: AtomicUsize,
}

impl ReentrantCredentials {
    fn touch_controller(&self) {
        if let Some(controller) = self.controller.get().and_then(Weak::upgrade) {
            let _ = controller.record_answer("Q1", "A");
            self.reentered.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl CredentialProvider for ReentrantCredentials {
    fn get(&self) -> Option<BearerToken> {
        self.touch_controller();
        self.inner.get()
    }

    fn clear(&self) {
        self.touch_controller();
        self.inner.clear();
    }
}

#[tokio::test(start_paused = true)]
async fn credentials_are_accessed_outside_the_session_lock() {
    let api = Arc::new(ScriptedApi::default());
    api.push_fetch(Err(ApiError::Unauthorized));
    api.push_fetch(Ok(single_question()));
    api.push_score(Ok(100.0));

    let credentials = Arc::new(ReentrantCredentials::default());
    credentials.inner.set(BearerToken::new("token").unwrap());
    let controller = Arc::new(QuizController::new(api.clone(), credentials.clone()));
    credentials
        .controller
        .set(Arc::downgrade(&controller))
        .unwrap();

    controller.start_session().unwrap();
    let snapshot = controller.settled().await;
    assert_eq!(
        snapshot.state.failure(),
        Some((FailureReason::Unauthenticated, 0))
    );
    assert!(credentials.inner.get().is_none());

    credentials.inner.set(BearerToken::new("fresh").unwrap());
    controller.start_session().unwrap();
    controller.settled().await;
    controller.record_answer("Q1", "A").unwrap();
    assert_eq!(controller.submit().await.unwrap().value(), 100);

    // start, fetch, clear, start, fetch, submit
    assert!(credentials.reentered.load(Ordering::SeqCst) >= 6);
}

#[tokio::test(start_paused = true)]
async fn restart_during_submission_supersedes_it() {
    let api = Arc::new(GatedScoreApi::default());
    let credentials = InMemoryCredentials::with_token(BearerToken::new("token").unwrap());
    let controller = Arc::new(QuizController::new(api.clone(), Arc::new(credentials)));

    controller.start_session().unwrap();
    controller.settled().await;
    controller.record_answer("Q1", "A").unwrap();

    let submitting = Arc::clone(&controller);
    let pending = tokio::spawn(async move { submitting.submit().await });
    while api.score_calls.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }
    assert_eq!(controller.state().kind(), StateKind::Submitting);

    controller.reset().unwrap();
    let outcome = pending.await.unwrap();
    assert!(matches!(outcome, Err(QuizError::Superseded)));

    let snapshot = controller.settled().await;
    assert_eq!(snapshot.state.kind(), StateKind::Active);
    assert!(snapshot.state.answers().unwrap().is_empty());
}

/// Serves the same question set every time and never answers a submission.
#[derive(Default)]
struct GatedScoreApi {
    score_calls: AtomicUsize,
}

#[async_trait]
impl QuizApi for GatedScoreApi {
    async fn fetch_question_set(&self, _token: &BearerToken) -> Result<QuestionSetDraft, ApiError> {
        Ok(single_question())
    }

    async fn score(&self, _token: &BearerToken, _submission: &Submission) -> Result<f64, ApiError> {
        self.score_calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }

    async fn quiz_history(&self, _token: &BearerToken) -> Result<Vec<QuizResult>, ApiError> {
        Ok(Vec::new())
    }
}
