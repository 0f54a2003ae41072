use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::future::{AbortHandle, Abortable};

use crate::agent::commands::extract_actions;
use crate::agent::observer::ScreenObserver;
use crate::agent::state::{Action, AgentConfig, AgentSnapshot, Session, SessionStatus};
use crate::agent::transcript::{ConversationEntry, EntryKind, EntryMetadata, Transcript};
use crate::emulator::facade::EmulatorFacade;
use crate::errors::{EmuPilotError, EmuPilotResult};
use crate::events::{SubscriberSet, Subscription};
use crate::llm::client::CompletionClient;
use crate::llm::types::{ChatMessage, CompletionRequest, Role};

/// Reply recorded when a stop request lands while the model call is in
/// flight.
pub const CANCELLED_REPLY: &str = "Request was cancelled.";

fn greeting(session: &Session) -> String {
    format!("Ready to pilot the machine. Current task: {}", session.task)
}

/// Drives one piloting session: takes user messages, calls the model with
/// the transcript plus a screen description, extracts keyboard actions
/// from the reply and executes them on the attached emulator.
///
/// One turn runs at a time; a second message while a turn is in flight is
/// rejected. `stop` is terminal and aborts any in-flight model call.
pub struct AgentLoop {
    state: Mutex<LoopState>,
    client: Arc<dyn CompletionClient>,
    observer: Arc<dyn ScreenObserver>,
    config: AgentConfig,
    emulator: Mutex<Option<Arc<EmulatorFacade>>>,
    subscribers: SubscriberSet<AgentSnapshot>,
}

struct LoopState {
    session: Session,
    transcript: Transcript,
    processing: bool,
    cancel: Option<AbortHandle>,
    consecutive_failures: u32,
}

impl AgentLoop {
    pub fn new(
        session: Session,
        client: Arc<dyn CompletionClient>,
        observer: Arc<dyn ScreenObserver>,
        config: AgentConfig,
    ) -> Self {
        let transcript = match &config.transcript_dir {
            Some(dir) => Transcript::with_flush_dir(session.id, dir.clone()),
            None => Transcript::new(session.id),
        };
        Self {
            state: Mutex::new(LoopState {
                session,
                transcript,
                processing: false,
                cancel: None,
                consecutive_failures: 0,
            }),
            client,
            observer,
            config,
            emulator: Mutex::new(None),
            subscribers: SubscriberSet::new(),
        }
    }

    pub fn set_emulator(&self, facade: Arc<EmulatorFacade>) {
        *self
            .emulator
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(facade);
    }

    pub fn status(&self) -> SessionStatus {
        self.lock_state().session.status
    }

    pub fn session(&self) -> Session {
        self.lock_state().session.clone()
    }

    pub fn history(&self) -> Vec<ConversationEntry> {
        self.lock_state().transcript.entries()
    }

    pub fn is_processing(&self) -> bool {
        self.lock_state().processing
    }

    pub fn snapshot(&self) -> AgentSnapshot {
        let state = self.lock_state();
        AgentSnapshot {
            session: state.session.clone(),
            processing: state.processing,
            entries: state.transcript.entries(),
        }
    }

    /// Subscribe to session snapshots. Fires once immediately with the
    /// current snapshot, then after every change.
    pub fn on_update(
        &self,
        callback: impl Fn(&AgentSnapshot) + Send + Sync + 'static,
    ) -> Subscription<AgentSnapshot> {
        callback(&self.snapshot());
        self.subscribers.subscribe(callback)
    }

    /// Open the session: record the greeting (with an initial screenshot
    /// when one can be captured) and move to `Running`. No-op unless the
    /// session is `Idle`.
    pub fn start(&self) {
        {
            let mut state = self.lock_state();
            if state.session.status != SessionStatus::Idle {
                tracing::debug!(status = %state.session.status, "start ignored");
                return;
            }
            state.session.status = SessionStatus::Starting;
        }
        self.publish();

        let screenshot = self.facade().and_then(|f| f.take_screenshot());
        {
            let mut state = self.lock_state();
            let mut entry = ConversationEntry::new(Role::Assistant, greeting(&state.session))
                .with_kind(EntryKind::Response);
            if let Some(shot) = screenshot {
                entry = entry.with_metadata(EntryMetadata {
                    screenshot: Some(shot),
                    ..Default::default()
                });
            }
            state.transcript.push(entry);
            state.session.status = SessionStatus::Running;
        }
        self.publish();
        tracing::info!(session = %self.lock_state().session.id, "session started");
    }

    /// Record a user message and run the turn (or turns, with
    /// `auto_continue`) it triggers. Errors when the session is not
    /// running or a turn is already in flight; turn failures themselves
    /// are recorded in the transcript, not returned.
    pub async fn send_user_message(&self, text: &str) -> EmuPilotResult<()> {
        {
            let mut state = self.lock_state();
            if state.session.status != SessionStatus::Running {
                return Err(EmuPilotError::Agent(format!(
                    "session is {}, not accepting messages",
                    state.session.status
                )));
            }
            if state.processing {
                return Err(EmuPilotError::Agent("a turn is already in progress".into()));
            }
            state.processing = true;
            state
                .transcript
                .push(ConversationEntry::new(Role::User, text));
        }
        self.publish();
        self.run_turns().await;
        Ok(())
    }

    /// Stop the session for good. Any in-flight model call is aborted and
    /// queued actions from the current reply are discarded.
    pub fn stop(&self) {
        let cancel = {
            let mut state = self.lock_state();
            if state.session.status == SessionStatus::Stopped {
                return;
            }
            state.session.status = SessionStatus::Stopped;
            state.transcript.push(
                ConversationEntry::new(Role::System, "Session stopped by user.")
                    .with_kind(EntryKind::System),
            );
            state.cancel.take()
        };
        if let Some(handle) = cancel {
            handle.abort();
        }
        self.publish();
        tracing::info!("session stopped");
    }

    async fn run_turns(&self) {
        let mut turns: u32 = 0;
        loop {
            turns += 1;
            let proceed = match self.run_single_turn().await {
                Ok(executed) => {
                    self.lock_state().consecutive_failures = 0;
                    self.config.auto_continue
                        && executed > 0
                        && self.status() == SessionStatus::Running
                        && turns < self.config.max_auto_turns
                }
                Err(e) => {
                    tracing::error!(error = %e, "turn failed");
                    let failures = {
                        let mut state = self.lock_state();
                        state.consecutive_failures += 1;
                        state.transcript.push(
                            ConversationEntry::new(
                                Role::System,
                                format!("Model call failed: {e}"),
                            )
                            .with_kind(EntryKind::Error)
                            .with_metadata(EntryMetadata {
                                error: Some(e.to_string()),
                                ..Default::default()
                            }),
                        );
                        state.consecutive_failures
                    };
                    self.config.auto_continue
                        && self.status() == SessionStatus::Running
                        && failures < self.config.max_failures
                        && turns < self.config.max_auto_turns
                }
            };
            if !proceed {
                self.lock_state().processing = false;
                self.publish();
                break;
            }
            self.publish();
        }
    }

    /// One observe-ask-act cycle. Returns how many actions were executed.
    async fn run_single_turn(&self) -> EmuPilotResult<usize> {
        let facade = self.facade();
        let screenshot = facade.as_ref().and_then(|f| f.take_screenshot());
        let screen_note = match &facade {
            Some(f) => {
                let snap = f.snapshot();
                self.observer.describe(screenshot.as_deref(), &snap).await
            }
            None => "[screen] No emulator session is attached.".to_string(),
        };

        let request = self.build_request(&screen_note);
        let (reply, cancelled) = match self.call_model(&request).await {
            Ok(reply) => (reply, false),
            Err(EmuPilotError::Cancelled) => (CANCELLED_REPLY.to_string(), true),
            Err(e) => return Err(e),
        };

        {
            let mut state = self.lock_state();
            let mut entry = ConversationEntry::new(Role::Assistant, reply.clone())
                .with_kind(EntryKind::Response);
            if let Some(shot) = &screenshot {
                entry = entry.with_metadata(EntryMetadata {
                    screenshot: Some(shot.clone()),
                    ..Default::default()
                });
            }
            state.transcript.push(entry);
        }
        self.publish();

        if cancelled {
            return Ok(0);
        }

        let actions = extract_actions(self.config.syntax, &reply);
        tracing::debug!(actions = actions.len(), "reply parsed");
        let mut executed = 0;
        for action in &actions {
            // A stop request discards whatever the reply still wanted to do
            if self.status() != SessionStatus::Running {
                break;
            }
            self.execute_action(action).await;
            executed += 1;
        }
        Ok(executed)
    }

    fn build_request(&self, screen_note: &str) -> CompletionRequest {
        let state = self.lock_state();
        let mut messages: Vec<ChatMessage> = state
            .transcript
            .iter()
            .map(|entry| ChatMessage::new(entry.role, entry.content.clone()))
            .collect();
        messages.push(ChatMessage::system(screen_note));
        CompletionRequest {
            model: state.session.model.clone(),
            messages,
            system_prompt: Some(state.session.system_prompt.clone()),
            max_tokens: state.session.max_tokens,
            temperature: state.session.temperature,
        }
    }

    /// Call the model with the configured timeout, an abort hook for
    /// `stop` and bounded retries on transient failures.
    async fn call_model(&self, request: &CompletionRequest) -> EmuPilotResult<String> {
        let timeout = Duration::from_secs(self.config.request_timeout_secs);
        let mut attempt: u32 = 0;
        loop {
            if self.status() == SessionStatus::Stopped {
                return Err(EmuPilotError::Cancelled);
            }
            let (abort, registration) = AbortHandle::new_pair();
            self.lock_state().cancel = Some(abort);
            let outcome = Abortable::new(
                tokio::time::timeout(timeout, self.client.generate(request)),
                registration,
            )
            .await;
            self.lock_state().cancel = None;

            let result = match outcome {
                Err(_aborted) => return Err(EmuPilotError::Cancelled),
                Ok(Err(_elapsed)) => Err(EmuPilotError::upstream(
                    None,
                    format!("request timed out after {}s", timeout.as_secs()),
                )),
                Ok(Ok(inner)) => inner,
            };

            match result {
                Ok(text) => return Ok(text),
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    attempt += 1;
                    tracing::warn!(error = %e, attempt, "transient model failure, retrying");
                    tokio::time::sleep(Duration::from_millis(
                        self.config.retry_backoff_ms * u64::from(attempt),
                    ))
                    .await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn execute_action(&self, action: &Action) {
        let echo = action.describe();
        {
            let mut state = self.lock_state();
            state.transcript.push(
                ConversationEntry::new(Role::System, format!("Executing: {echo}"))
                    .with_kind(EntryKind::Command)
                    .with_metadata(EntryMetadata {
                        command: Some(echo.clone()),
                        ..Default::default()
                    }),
            );
        }
        self.publish();

        match self.facade() {
            Some(facade) => match action {
                Action::TypeText { text } => facade.send_text(text).await,
                Action::PressKey { key } => facade.send_special_key(key).await,
            },
            None => tracing::warn!(action = %echo, "no emulator attached, action skipped"),
        }

        tokio::time::sleep(Duration::from_millis(self.config.settle_delay_ms)).await;
        if let Some(facade) = self.facade() {
            facade.take_screenshot();
        }
        self.publish();
    }

    fn facade(&self) -> Option<Arc<EmulatorFacade>> {
        self.emulator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn publish(&self) {
        let snapshot = self.snapshot();
        self.subscribers.publish(&snapshot);
    }

    fn lock_state(&self) -> MutexGuard<'_, LoopState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::observer::SyntheticObserver;
    use crate::config::EnvironmentConfig;
    use crate::emulator::assets::OsType;
    use crate::errors::EmuPilotResult;
    use crate::llm::client::TokenSink;
    use crate::llm::registry::ProviderKind;
    use async_trait::async_trait;

    struct NullClient;

    #[async_trait]
    impl CompletionClient for NullClient {
        fn provider(&self) -> ProviderKind {
            ProviderKind::Ollama
        }

        async fn generate(&self, _request: &CompletionRequest) -> EmuPilotResult<String> {
            Ok("Nothing to do.".into())
        }

        async fn stream(
            &self,
            request: &CompletionRequest,
            on_token: TokenSink<'_>,
        ) -> EmuPilotResult<String> {
            let reply = self.generate(request).await?;
            on_token(&reply);
            Ok(reply)
        }
    }

    fn test_loop() -> AgentLoop {
        let env = EnvironmentConfig {
            name: "lab".into(),
            os: OsType::Linux,
            provider: ProviderKind::Ollama,
            model: "llama3".into(),
            task: "print the date".into(),
            system_prompt: None,
            options: Default::default(),
        };
        AgentLoop::new(
            Session::from_environment(&env),
            Arc::new(NullClient),
            Arc::new(SyntheticObserver),
            AgentConfig::default(),
        )
    }

    #[test]
    fn greeting_names_the_task() {
        let agent = test_loop();
        agent.start();
        let history = agent.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::Assistant);
        assert!(history[0].content.contains("print the date"));
        assert_eq!(agent.status(), SessionStatus::Running);
    }

    #[tokio::test]
    async fn idle_session_rejects_messages() {
        let agent = test_loop();
        let err = agent.send_user_message("hello").await.unwrap_err();
        assert!(matches!(err, EmuPilotError::Agent(_)));
        assert!(err.to_string().contains("idle"));
    }

    #[test]
    fn second_start_is_a_no_op() {
        let agent = test_loop();
        agent.start();
        agent.start();
        assert_eq!(agent.history().len(), 1);
    }

    #[test]
    fn stop_is_terminal_and_recorded() {
        let agent = test_loop();
        agent.start();
        agent.stop();
        agent.stop();
        assert_eq!(agent.status(), SessionStatus::Stopped);
        let history = agent.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content, "Session stopped by user.");
    }
}
