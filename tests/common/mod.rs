#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use emupilot::config::EnvironmentConfig;
use emupilot::emulator::assets::{AssetProber, OsType};
use emupilot::emulator::engine::{
    EmulationEngine, EngineEvent, EngineEventKind, EngineFactory, EngineOptions, EventCallback,
    ListenerId, ScreenFrame,
};
use emupilot::errors::{EmuPilotError, EmuPilotResult};
use emupilot::llm::client::{CompletionClient, TokenSink};
use emupilot::llm::registry::ProviderKind;
use emupilot::llm::types::CompletionRequest;

/// What the guest keyboard received, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Injected {
    Text(String),
    Scancodes(Vec<u16>),
}

struct FakeEngineState {
    injected: Vec<Injected>,
    listeners: HashMap<u64, (EngineEventKind, EventCallback)>,
    destroyed: bool,
    run_calls: u32,
    pause_calls: u32,
    restart_calls: u32,
}

/// Recording engine double. By default it signals readiness the moment a
/// `Ready` listener registers, so boots complete synchronously.
pub struct FakeEngine {
    state: Mutex<FakeEngineState>,
    next_listener: AtomicU64,
    ready_on_listen: bool,
    frame: Option<ScreenFrame>,
    memory: Option<u64>,
    pub screenshot_calls: AtomicU64,
    pub memory_reads: AtomicU64,
}

impl FakeEngine {
    fn base() -> Self {
        Self {
            state: Mutex::new(FakeEngineState {
                injected: Vec::new(),
                listeners: HashMap::new(),
                destroyed: false,
                run_calls: 0,
                pause_calls: 0,
                restart_calls: 0,
            }),
            next_listener: AtomicU64::new(1),
            ready_on_listen: true,
            frame: Some(ScreenFrame {
                width: 4,
                height: 2,
                rgba: vec![0x20; 4 * 2 * 4],
            }),
            memory: Some(48 * 1024 * 1024),
            screenshot_calls: AtomicU64::new(0),
            memory_reads: AtomicU64::new(0),
        }
    }

    pub fn new() -> Arc<Self> {
        Arc::new(Self::base())
    }

    /// Never signals readiness on its own.
    pub fn unready() -> Arc<Self> {
        Arc::new(Self {
            ready_on_listen: false,
            ..Self::base()
        })
    }

    /// Has no framebuffer to capture.
    pub fn without_frame() -> Arc<Self> {
        Arc::new(Self {
            frame: None,
            ..Self::base()
        })
    }

    /// Deliver an event to every listener registered for its kind.
    pub fn emit(&self, event: &EngineEvent) {
        let callbacks: Vec<EventCallback> = {
            let state = self.state.lock().unwrap();
            state
                .listeners
                .values()
                .filter(|(kind, _)| *kind == event.kind())
                .map(|(_, cb)| cb.clone())
                .collect()
        };
        for callback in callbacks {
            callback(event);
        }
    }

    pub fn take_injected(&self) -> Vec<Injected> {
        std::mem::take(&mut self.state.lock().unwrap().injected)
    }

    pub fn listener_count(&self) -> usize {
        self.state.lock().unwrap().listeners.len()
    }

    pub fn destroyed(&self) -> bool {
        self.state.lock().unwrap().destroyed
    }

    pub fn run_calls(&self) -> u32 {
        self.state.lock().unwrap().run_calls
    }

    pub fn pause_calls(&self) -> u32 {
        self.state.lock().unwrap().pause_calls
    }

    pub fn restart_calls(&self) -> u32 {
        self.state.lock().unwrap().restart_calls
    }
}

impl EmulationEngine for FakeEngine {
    fn run(&self) {
        self.state.lock().unwrap().run_calls += 1;
    }

    fn pause(&self) {
        self.state.lock().unwrap().pause_calls += 1;
    }

    fn restart(&self) {
        self.state.lock().unwrap().restart_calls += 1;
    }

    fn destroy(&self) {
        self.state.lock().unwrap().destroyed = true;
    }

    fn send_text(&self, text: &str) {
        self.state
            .lock()
            .unwrap()
            .injected
            .push(Injected::Text(text.to_string()));
    }

    fn send_scancodes(&self, codes: &[u16]) {
        self.state
            .lock()
            .unwrap()
            .injected
            .push(Injected::Scancodes(codes.to_vec()));
    }

    fn screenshot(&self) -> Option<ScreenFrame> {
        self.screenshot_calls.fetch_add(1, Ordering::SeqCst);
        self.frame.clone()
    }

    fn memory_usage(&self) -> Option<u64> {
        self.memory_reads.fetch_add(1, Ordering::SeqCst);
        self.memory
    }

    fn add_listener(&self, kind: EngineEventKind, callback: EventCallback) -> ListenerId {
        let id = self.next_listener.fetch_add(1, Ordering::SeqCst);
        let fire_ready = {
            let mut state = self.state.lock().unwrap();
            state.listeners.insert(id, (kind, callback.clone()));
            kind == EngineEventKind::Ready && self.ready_on_listen
        };
        if fire_ready {
            callback(&EngineEvent::Ready);
        }
        ListenerId(id)
    }

    fn remove_listener(&self, id: ListenerId) {
        self.state.lock().unwrap().listeners.remove(&id.0);
    }
}

pub struct FakeFactory {
    engine: Arc<FakeEngine>,
    loaded: bool,
    fail_create: bool,
    pub create_calls: AtomicU32,
    pub last_options: Mutex<Option<EngineOptions>>,
}

impl FakeFactory {
    pub fn new(engine: Arc<FakeEngine>) -> Arc<Self> {
        Arc::new(Self {
            engine,
            loaded: true,
            fail_create: false,
            create_calls: AtomicU32::new(0),
            last_options: Mutex::new(None),
        })
    }

    pub fn not_loaded(engine: Arc<FakeEngine>) -> Arc<Self> {
        Arc::new(Self {
            engine,
            loaded: false,
            fail_create: false,
            create_calls: AtomicU32::new(0),
            last_options: Mutex::new(None),
        })
    }

    pub fn failing(engine: Arc<FakeEngine>) -> Arc<Self> {
        Arc::new(Self {
            engine,
            loaded: true,
            fail_create: true,
            create_calls: AtomicU32::new(0),
            last_options: Mutex::new(None),
        })
    }
}

impl EngineFactory for FakeFactory {
    fn is_loaded(&self) -> bool {
        self.loaded
    }

    fn create(&self, options: EngineOptions) -> EmuPilotResult<Arc<dyn EmulationEngine>> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_options.lock().unwrap() = Some(options);
        if self.fail_create {
            return Err(EmuPilotError::Device("constructor exploded".into()));
        }
        Ok(self.engine.clone())
    }
}

/// Probe stub answering from a fixed set of missing URL substrings.
pub struct StaticProber {
    missing: Vec<String>,
    fail: bool,
    pub probed: Mutex<Vec<String>>,
}

impl StaticProber {
    pub fn all_present() -> Arc<Self> {
        Arc::new(Self {
            missing: Vec::new(),
            fail: false,
            probed: Mutex::new(Vec::new()),
        })
    }

    pub fn missing(substring: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            missing: vec![substring.into()],
            fail: false,
            probed: Mutex::new(Vec::new()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            missing: Vec::new(),
            fail: true,
            probed: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl AssetProber for StaticProber {
    async fn exists(&self, url: &str) -> EmuPilotResult<bool> {
        self.probed.lock().unwrap().push(url.to_string());
        if self.fail {
            return Err(EmuPilotError::Device("probe transport failed".into()));
        }
        Ok(!self.missing.iter().any(|m| url.contains(m.as_str())))
    }
}

/// Completion double that pops scripted results and records requests.
/// Falls back to a reply without commands when the script runs dry.
pub struct ScriptedClient {
    replies: Mutex<VecDeque<EmuPilotResult<String>>>,
    delay: Option<Duration>,
    pub requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedClient {
    pub fn replying(replies: &[&str]) -> Arc<Self> {
        Self::with_results(replies.iter().map(|r| Ok(r.to_string())).collect())
    }

    pub fn with_results(results: Vec<EmuPilotResult<String>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(results.into()),
            delay: None,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn delayed(reply: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::from([Ok(reply.to_string())])),
            delay: Some(delay),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Ollama
    }

    async fn generate(&self, request: &CompletionRequest) -> EmuPilotResult<String> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("Nothing further.".into()))
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

pub fn test_env(os: OsType) -> EnvironmentConfig {
    EnvironmentConfig {
        name: "test-lab".into(),
        os,
        provider: ProviderKind::Ollama,
        model: "llama3".into(),
        task: "List the files in the home directory.".into(),
        system_prompt: None,
        options: Default::default(),
    }
}
