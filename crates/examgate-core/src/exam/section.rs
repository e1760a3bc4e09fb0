use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tracing::{info, warn};

use super::{timer_key, SectionDurations, SectionKind, TIMER_KEY_PREFIX};
use crate::api::ApiClient;
use crate::clock::Clock;
use crate::store::DurableStore;
use crate::timer::{
    seconds_left, CountdownHandle, DeadlineStore, PersistentTimer, TimerState, UnloadRegistry,
};

/// A section deadline found in the store, e.g. from a previous run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDeadline {
    pub key: String,
    pub deadline_ms: i64,
    pub remaining_secs: i64,
}

/// Opens timed sections of an attempt.
pub struct ExamRunner {
    api: ApiClient,
    store: Arc<dyn DurableStore>,
    clock: Arc<dyn Clock>,
    unload: UnloadRegistry,
    durations: SectionDurations,
}

impl ExamRunner {
    pub fn new(
        api: ApiClient,
        store: Arc<dyn DurableStore>,
        clock: Arc<dyn Clock>,
        unload: UnloadRegistry,
        durations: SectionDurations,
    ) -> Self {
        Self {
            api,
            store,
            clock,
            unload,
            durations,
        }
    }

    /// Fetch the section and attach its countdown. Content is fetched first,
    /// so a dead session never starts a clock.
    pub async fn enter_section(&self, attempt_id: &str, kind: SectionKind) -> Result<ActiveSection> {
        let content = self
            .api
            .section_content(attempt_id, kind)
            .await
            .with_context(|| format!("Failed to load {} section", kind.display_name()))?;

        let key = timer_key(attempt_id, kind);
        let (expired_tx, expired_rx) = oneshot::channel();
        let mut timer = PersistentTimer::new(self.store.clone(), self.clock.clone(), self.unload.clone());
        let state = timer.initialize(self.durations.for_kind(kind), &key, move || {
            let _ = expired_tx.send(());
        })?;
        info!(attempt_id, section = kind.wire_name(), ?state, remaining = timer.remaining(), "Entered section");

        Ok(ActiveSection {
            api: self.api.clone(),
            attempt_id: attempt_id.to_string(),
            kind,
            key,
            content,
            answers: Map::new(),
            countdown: CountdownHandle::spawn(timer),
            expired: Some(expired_rx),
            time_up: false,
        })
    }

    /// Section deadlines still in the store, with their remaining time.
    pub fn pending_deadlines(&self) -> Result<Vec<PendingDeadline>> {
        let now = self.clock.now_ms();
        Ok(DeadlineStore::new(self.store.clone())
            .list(TIMER_KEY_PREFIX)?
            .into_iter()
            .filter_map(|(key, deadline_ms)| match seconds_left(deadline_ms, now) {
                Some(remaining_secs) => Some(PendingDeadline {
                    key,
                    deadline_ms,
                    remaining_secs,
                }),
                None => {
                    warn!(key = %key, deadline_ms, "Skipping out-of-range deadline record");
                    None
                }
            })
            .collect())
    }
}

/// A section on screen: its content, the draft answers, and the countdown.
pub struct ActiveSection {
    api: ApiClient,
    attempt_id: String,
    kind: SectionKind,
    key: String,
    content: Value,
    answers: Map<String, Value>,
    countdown: CountdownHandle,
    /// Taken once the expiry signal has resolved; `time_up` keeps the answer.
    expired: Option<oneshot::Receiver<()>>,
    time_up: bool,
}

impl ActiveSection {
    pub fn kind(&self) -> SectionKind {
        self.kind
    }

    pub fn attempt_id(&self) -> &str {
        &self.attempt_id
    }

    pub fn timer_key(&self) -> &str {
        &self.key
    }

    pub fn content(&self) -> &Value {
        &self.content
    }

    pub fn countdown(&self) -> &CountdownHandle {
        &self.countdown
    }

    pub fn set_answer(&mut self, question_id: &str, answer: Value) {
        self.answers.insert(question_id.to_string(), answer);
    }

    pub fn set_answers(&mut self, answers: Map<String, Value>) {
        self.answers.extend(answers);
    }

    pub fn answers(&self) -> &Map<String, Value> {
        &self.answers
    }

    pub fn is_expired(&self) -> bool {
        self.countdown.snapshot().state == TimerState::Expired
    }

    /// Resolves once the countdown hits zero. Returns false if the countdown
    /// went away without expiring. Later calls return the same answer
    /// immediately.
    pub async fn expired(&mut self) -> bool {
        if let Some(rx) = self.expired.as_mut() {
            self.time_up = rx.await.is_ok();
            self.expired = None;
        }
        self.time_up
    }

    /// Early, manual submission: the timer is cleared before posting.
    pub async fn submit(mut self) -> Result<Value> {
        if let Err(e) = self.countdown.clear() {
            warn!(key = %self.key, error = %e, "Failed to clear section timer");
        }
        info!(attempt_id = %self.attempt_id, section = self.kind.wire_name(), "Submitting section");
        self.post().await
    }

    /// Forced submission after expiry. The deadline is already gone.
    pub async fn submit_on_expire(self) -> Result<Value> {
        info!(attempt_id = %self.attempt_id, section = self.kind.wire_name(), "Time is up, submitting section");
        self.post().await
    }

    async fn post(self) -> Result<Value> {
        let answers = Value::Object(self.answers);
        self.api
            .submit_section_answers(&self.attempt_id, self.kind, &answers)
            .await
            .with_context(|| format!("Failed to submit {} section", self.kind.display_name()))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::gate::tests::{fixture, user_token, StubTransport, NOW_MS};
    use crate::api::{ApiError, RequestGate};
    use serde_json::json;
    use std::time::Duration;

    const DURATIONS: SectionDurations = SectionDurations {
        listening: 3,
        reading: 60,
        writing: 60,
    };

    fn runner(f: &crate::api::gate::tests::Fixture, transport: Arc<StubTransport>) -> ExamRunner {
        let api = ApiClient::new(RequestGate::new(f.session.clone(), transport));
        ExamRunner::new(api, f.store.clone(), f.clock.clone(), UnloadRegistry::new(), DURATIONS)
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_forces_submission() {
        let f = fixture("/attempt/a1/listening");
        f.session.login(&user_token(3600)).unwrap();
        let transport = Arc::new(StubTransport::with_responses(vec![
            (200, r#"{"questions": []}"#),
            (200, r#"{"ok": true}"#),
        ]));
        let runner = runner(&f, transport.clone());

        let mut section = runner.enter_section("a1", SectionKind::Listening).await.unwrap();
        assert_eq!(section.content(), &json!({"questions": []}));
        assert!(f.store.get("exam-timer:a1:LISTENING").unwrap().is_some());
        section.set_answer("q1", json!("B"));

        assert!(section.expired().await);
        assert!(section.is_expired());
        assert!(f.store.get("exam-timer:a1:LISTENING").unwrap().is_none());

        let result = section.submit_on_expire().await.unwrap();
        assert_eq!(result, json!({"ok": true}));
        let sent = transport.sent();
        assert_eq!(sent[1].path, "/tests/attempts/a1/submit-section");
        assert_eq!(
            sent[1].body,
            Some(json!({"sectionType": "LISTENING", "answers": {"q1": "B"}}))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_submit_clears_deadline() {
        let f = fixture("/attempt/a1/reading");
        f.session.login(&user_token(3600)).unwrap();
        let transport = Arc::new(StubTransport::default());
        let runner = runner(&f, transport.clone());

        let section = runner.enter_section("a1", SectionKind::Reading).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5_500)).await;
        assert_eq!(section.countdown().snapshot().remaining, 55);

        section.submit().await.unwrap();
        assert!(f.store.get("exam-timer:a1:READING").unwrap().is_none());
        assert_eq!(transport.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_reentering_resumes_stored_deadline() {
        let f = fixture("/attempt/a1/reading");
        f.session.login(&user_token(3600)).unwrap();
        let runner = runner(&f, Arc::new(StubTransport::default()));

        let section = runner.enter_section("a1", SectionKind::Reading).await.unwrap();
        drop(section);

        f.clock.advance_secs(20);
        let section = runner.enter_section("a1", SectionKind::Reading).await.unwrap();
        assert_eq!(section.countdown().snapshot().remaining, 40);

        let pending = runner.pending_deadlines().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].key, "exam-timer:a1:READING");
        assert_eq!(pending[0].deadline_ms, NOW_MS + 60_000);
        assert_eq!(pending[0].remaining_secs, 40);
    }

    #[tokio::test]
    async fn test_dead_session_never_starts_a_clock() {
        let f = fixture("/attempt/a1/writing");
        let transport = Arc::new(StubTransport::default());
        let runner = runner(&f, transport.clone());

        let err = runner
            .enter_section("a1", SectionKind::Writing)
            .await
            .err()
            .unwrap();
        assert!(ApiError::is_session_ended(&err));
        assert!(transport.sent().is_empty());
        assert!(f.store.is_empty());
    }

    #[tokio::test]
    async fn test_reentering_after_deadline_expires_immediately() {
        let f = fixture("/attempt/a1/writing");
        f.session.login(&user_token(3600)).unwrap();
        f.store
            .set("exam-timer:a1:WRITING", &(NOW_MS - 1_000).to_string())
            .unwrap();
        let runner = runner(&f, Arc::new(StubTransport::default()));

        let mut section = runner.enter_section("a1", SectionKind::Writing).await.unwrap();
        assert!(section.is_expired());
        assert!(section.expired().await);
        // Asking again gives the same answer
        assert!(section.expired().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_can_be_polled_from_a_loop() {
        let f = fixture("/attempt/a1/listening");
        f.session.login(&user_token(3600)).unwrap();
        let runner = runner(&f, Arc::new(StubTransport::default()));
        let mut section = runner.enter_section("a1", SectionKind::Listening).await.unwrap();

        let mut polls = 0;
        loop {
            tokio::select! {
                fired = section.expired() => {
                    assert!(fired);
                    break;
                }
                _ = tokio::time::sleep(Duration::from_millis(500)) => polls += 1,
            }
        }
        assert!(polls >= 5);
        assert!(section.expired().await);
        assert!(section.is_expired());
    }

    #[tokio::test]
    async fn test_pending_deadlines_skip_out_of_range_records() {
        let f = fixture("/tests");
        f.store.set("exam-timer:a1:READING", &i64::MIN.to_string()).unwrap();
        f.store
            .set("exam-timer:a1:WRITING", &(NOW_MS + 90_000).to_string())
            .unwrap();
        let runner = runner(&f, Arc::new(StubTransport::default()));

        let pending = runner.pending_deadlines().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].key, "exam-timer:a1:WRITING");
        assert_eq!(pending[0].remaining_secs, 90);
    }

    #[tokio::test]
    async fn test_oversized_duration_fails_to_enter() {
        let f = fixture("/attempt/a1/reading");
        f.session.login(&user_token(3600)).unwrap();
        let api = ApiClient::new(RequestGate::new(f.session.clone(), Arc::new(StubTransport::default())));
        let durations = SectionDurations {
            reading: i64::MAX / 1000,
            ..DURATIONS
        };
        let runner = ExamRunner::new(api, f.store.clone(), f.clock.clone(), UnloadRegistry::new(), durations);

        assert!(runner.enter_section("a1", SectionKind::Reading).await.is_err());
        assert!(f.store.get("exam-timer:a1:READING").unwrap().is_none());
    }
}
