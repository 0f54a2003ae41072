use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::emulator::assets::{boot_assets, AssetProber, OsType};
use crate::emulator::engine::{
    EmulationEngine, EngineEvent, EngineEventKind, EngineFactory, EngineOptions, ListenerId,
    MountPoint, ScreenFrame,
};
use crate::emulator::keymap;
use crate::emulator::types::{EmulatorSnapshot, EmulatorStatus, InitOptions, Screenshot};
use crate::errors::{EmuPilotError, EmuPilotResult};
use crate::events::{SubscriberSet, Subscription};

const DEFAULT_ASSET_BASE: &str = "/assets";
/// Hard bound on the wait for the engine's ready signal.
const READY_TIMEOUT: Duration = Duration::from_secs(30);
/// Pacing between injected characters so guest keyboard buffers keep up.
const CHAR_PACING: Duration = Duration::from_millis(50);
/// Gap between press and release scancodes of one key.
const KEY_EVENT_GAP: Duration = Duration::from_millis(25);
const MEMORY_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Owns one virtual-machine session: boot, keyboard input, screenshots and
/// the subscribable state snapshot. Exactly one engine instance at a time.
pub struct EmulatorFacade {
    os: OsType,
    asset_base: String,
    factory: Arc<dyn EngineFactory>,
    prober: Arc<dyn AssetProber>,
    /// Self-handle captured by listener closures and the poll task.
    weak: Weak<EmulatorFacade>,
    state: Mutex<FacadeState>,
    queue: Mutex<TypeQueue>,
    subscribers: SubscriberSet<EmulatorSnapshot>,
}

struct FacadeState {
    status: EmulatorStatus,
    is_running: bool,
    engine: Option<Arc<dyn EmulationEngine>>,
    listeners: Vec<ListenerId>,
    screenshot: Option<Arc<Screenshot>>,
    memory_usage: Option<u64>,
    network_active: bool,
    boot_progress: u8,
    last_action: Option<String>,
    has_surface: bool,
    memory_task: Option<JoinHandle<()>>,
    ready_tx: Option<oneshot::Sender<()>>,
}

impl FacadeState {
    fn new() -> Self {
        Self {
            status: EmulatorStatus::Uninitialized,
            is_running: false,
            engine: None,
            listeners: Vec::new(),
            screenshot: None,
            memory_usage: None,
            network_active: false,
            boot_progress: 0,
            last_action: None,
            has_surface: false,
            memory_task: None,
            ready_tx: None,
        }
    }
}

struct TypeQueue {
    pending: VecDeque<char>,
    draining: bool,
}

impl EmulatorFacade {
    pub fn new(
        os: OsType,
        factory: Arc<dyn EngineFactory>,
        prober: Arc<dyn AssetProber>,
    ) -> Arc<Self> {
        Self::with_asset_base(os, factory, prober, DEFAULT_ASSET_BASE)
    }

    pub fn with_asset_base(
        os: OsType,
        factory: Arc<dyn EngineFactory>,
        prober: Arc<dyn AssetProber>,
        asset_base: impl Into<String>,
    ) -> Arc<Self> {
        let asset_base = asset_base.into();
        Arc::new_cyclic(|weak| Self {
            os,
            asset_base,
            factory,
            prober,
            weak: weak.clone(),
            state: Mutex::new(FacadeState::new()),
            queue: Mutex::new(TypeQueue {
                pending: VecDeque::new(),
                draining: false,
            }),
            subscribers: SubscriberSet::new(),
        })
    }

    pub fn os_type(&self) -> OsType {
        self.os
    }

    pub fn status(&self) -> EmulatorStatus {
        self.lock_state().status
    }

    pub fn is_running(&self) -> bool {
        self.lock_state().is_running
    }

    pub fn snapshot(&self) -> EmulatorSnapshot {
        let state = self.lock_state();
        self.build_snapshot(&state)
    }

    /// Subscribe to state snapshots. The callback fires once immediately
    /// with the current snapshot, then after every state transition.
    pub fn on_update(
        &self,
        callback: impl Fn(&EmulatorSnapshot) + Send + Sync + 'static,
    ) -> Subscription<EmulatorSnapshot> {
        callback(&self.snapshot());
        self.subscribers.subscribe(callback)
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────

    /// Boot one engine instance. Ordering: mount attachment, engine library
    /// presence, boot asset probes, engine construction, event listeners,
    /// readiness wait. Every failure path leaves a terminal status behind;
    /// call [`destroy`](Self::destroy) before trying again.
    pub async fn init(
        &self,
        mount: MountPoint,
        options: &InitOptions,
    ) -> EmuPilotResult<()> {
        {
            let state = self.lock_state();
            match state.status {
                EmulatorStatus::Uninitialized | EmulatorStatus::Destroyed => {}
                other => {
                    return Err(EmuPilotError::Initialization(format!(
                        "cannot init while {other}; destroy the current session first"
                    )));
                }
            }
        }

        if !mount.is_attached() {
            self.set_status(EmulatorStatus::InitFailed);
            return Err(EmuPilotError::Initialization(format!(
                "mount point '{}' is not attached",
                mount.id()
            )));
        }

        if !self.factory.is_loaded() {
            self.set_status(EmulatorStatus::LoadFailed);
            return Err(EmuPilotError::Initialization(
                "engine library is not loaded".into(),
            ));
        }

        self.set_status(EmulatorStatus::Loading);
        let assets = boot_assets(self.os, &self.asset_base);
        tracing::info!(os = %self.os, boot_order = assets.boot_order, "probing boot assets");
        for url in assets.urls() {
            match self.prober.exists(url).await {
                Ok(true) => {}
                Ok(false) => {
                    self.set_status(EmulatorStatus::DownloadError);
                    return Err(EmuPilotError::Initialization(format!(
                        "boot asset not found: {url}"
                    )));
                }
                Err(e) => {
                    self.set_status(EmulatorStatus::DownloadError);
                    return Err(EmuPilotError::Initialization(format!(
                        "boot asset probe failed for {url}: {e}"
                    )));
                }
            }
        }

        self.set_status(EmulatorStatus::Creating);
        let engine_options = EngineOptions {
            mount,
            memory_mb: options.memory_mb,
            vga_memory_mb: options.vga_memory_mb,
            wasm_url: assets.wasm_url.clone(),
            bios_url: assets.bios_url.clone(),
            vga_bios_url: assets.vga_bios_url.clone(),
            media: assets.media.clone(),
            boot_order: assets.boot_order,
            autostart: options.autostart,
            acpi: assets.acpi,
            network_enabled: options.network,
            preserve_state: options.persist_state,
        };
        let engine = match self.factory.create(engine_options) {
            Ok(engine) => engine,
            Err(e) => {
                self.set_status(EmulatorStatus::InitFailed);
                return Err(EmuPilotError::Initialization(format!(
                    "engine construction failed: {e}"
                )));
            }
        };

        let (ready_tx, ready_rx) = oneshot::channel();
        {
            let mut state = self.lock_state();
            state.engine = Some(engine.clone());
            state.ready_tx = Some(ready_tx);
            state.network_active = options.network;
        }
        self.register_listeners(&engine);

        match tokio::time::timeout(READY_TIMEOUT, ready_rx).await {
            Ok(Ok(())) => {}
            _ => {
                tracing::error!(
                    os = %self.os,
                    timeout_s = READY_TIMEOUT.as_secs(),
                    "engine readiness timed out"
                );
                self.teardown_engine();
                self.set_status(EmulatorStatus::InitFailed);
                return Err(EmuPilotError::Initialization(format!(
                    "engine did not signal readiness within {}s",
                    READY_TIMEOUT.as_secs()
                )));
            }
        }

        {
            let mut state = self.lock_state();
            state.status = EmulatorStatus::Ready;
            state.is_running = true;
            state.last_action = Some("session ready".into());
        }
        self.publish();

        if options.autostart {
            engine.run();
            self.set_status(EmulatorStatus::Running);
        }

        self.start_memory_poll(engine);
        tracing::info!(os = %self.os, autostart = options.autostart, "emulator session initialized");
        Ok(())
    }

    pub fn stop(&self) {
        let engine = self.lock_state().engine.clone();
        let Some(engine) = engine else { return };
        engine.pause();
        {
            let mut state = self.lock_state();
            state.status = EmulatorStatus::Stopped;
            state.last_action = Some("execution stopped".into());
        }
        self.publish();
    }

    pub fn resume(&self) {
        let engine = self.lock_state().engine.clone();
        let Some(engine) = engine else { return };
        engine.run();
        {
            let mut state = self.lock_state();
            state.status = EmulatorStatus::Running;
            state.last_action = Some("execution resumed".into());
        }
        self.publish();
    }

    /// Reboot the guest without tearing down the engine instance.
    pub fn restart(&self) {
        let engine = self.lock_state().engine.clone();
        let Some(engine) = engine else { return };
        engine.restart();
        {
            let mut state = self.lock_state();
            state.status = EmulatorStatus::Running;
            state.last_action = Some("machine restarted".into());
        }
        self.publish();
    }

    /// Tear the session down: abort the memory poll, remove every engine
    /// listener, destroy the engine and clear cached state. Idempotent; any
    /// control call after this is a no-op.
    pub fn destroy(&self) {
        let (engine, listeners, task) = {
            let mut state = self.lock_state();
            if state.status == EmulatorStatus::Destroyed && state.engine.is_none() {
                return;
            }
            state.status = EmulatorStatus::Destroyed;
            state.is_running = false;
            state.screenshot = None;
            state.memory_usage = None;
            state.boot_progress = 0;
            state.has_surface = false;
            state.ready_tx = None;
            state.last_action = Some("session destroyed".into());
            (
                state.engine.take(),
                std::mem::take(&mut state.listeners),
                state.memory_task.take(),
            )
        };
        {
            let mut queue = self.lock_queue();
            queue.pending.clear();
        }
        if let Some(task) = task {
            task.abort();
        }
        if let Some(engine) = engine {
            for id in listeners {
                engine.remove_listener(id);
            }
            engine.destroy();
        }
        self.publish();
        tracing::info!(os = %self.os, "emulator session destroyed");
    }

    // ── Input ─────────────────────────────────────────────────────────────

    /// Queue text for paced keyboard injection. Characters go in one per
    /// 50ms; `'\n'` is injected as an Enter press and release. Concurrent
    /// calls append to the same queue and never start a second drain loop.
    /// Silently ignored when no engine instance exists.
    pub async fn send_text(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        if self.lock_state().engine.is_none() {
            tracing::debug!("send_text ignored, no engine instance");
            return;
        }
        let queued = text.chars().count();
        {
            let mut queue = self.lock_queue();
            queue.pending.extend(text.chars());
            if queue.draining {
                return;
            }
            queue.draining = true;
        }
        {
            let mut state = self.lock_state();
            state.last_action = Some(format!("typing {queued} characters"));
        }
        self.publish();
        self.drain_type_queue().await;
    }

    async fn drain_type_queue(&self) {
        loop {
            let next = {
                let mut queue = self.lock_queue();
                match queue.pending.pop_front() {
                    Some(c) => c,
                    None => {
                        queue.draining = false;
                        break;
                    }
                }
            };
            let engine = self.lock_state().engine.clone();
            let Some(engine) = engine else {
                let mut queue = self.lock_queue();
                queue.pending.clear();
                queue.draining = false;
                break;
            };
            if next == '\n' {
                engine.send_scancodes(keymap::ENTER_MAKE);
                tokio::time::sleep(KEY_EVENT_GAP).await;
                engine.send_scancodes(&keymap::break_codes(keymap::ENTER_MAKE));
            } else {
                let mut buf = [0u8; 4];
                engine.send_text(next.encode_utf8(&mut buf));
            }
            tokio::time::sleep(CHAR_PACING).await;
        }
    }

    /// Press and release one raw scancode. No-op without an engine.
    pub async fn send_key(&self, scancode: u16) {
        let engine = self.lock_state().engine.clone();
        let Some(engine) = engine else { return };
        engine.send_scancodes(&[scancode]);
        tokio::time::sleep(KEY_EVENT_GAP).await;
        engine.send_scancodes(&[keymap::break_code(scancode)]);
    }

    /// Press and release a named key. Unknown names and missing sessions
    /// are silently ignored.
    pub async fn send_special_key(&self, name: &str) {
        let Some(make) = keymap::scancodes_for(name) else {
            tracing::warn!(key = %name, "unknown special key ignored");
            return;
        };
        let engine = self.lock_state().engine.clone();
        let Some(engine) = engine else { return };
        engine.send_scancodes(make);
        tokio::time::sleep(KEY_EVENT_GAP).await;
        engine.send_scancodes(&keymap::break_codes(make));
        {
            let mut state = self.lock_state();
            state.last_action = Some(format!("key {name}"));
        }
        self.publish();
    }

    // ── Observation ───────────────────────────────────────────────────────

    /// Capture the framebuffer as a PNG screenshot. `None` without a
    /// running session or before the engine announces a renderable surface.
    pub fn take_screenshot(&self) -> Option<Arc<Screenshot>> {
        let engine = {
            let state = self.lock_state();
            if !state.is_running || !state.has_surface {
                return None;
            }
            state.engine.clone()?
        };
        let frame = engine.screenshot()?;
        let shot = match encode_png(&frame) {
            Ok(shot) => Arc::new(shot),
            Err(e) => {
                tracing::warn!(error = %e, "screenshot encode failed");
                return None;
            }
        };
        {
            let mut state = self.lock_state();
            state.screenshot = Some(shot.clone());
        }
        self.publish();
        Some(shot)
    }

    // ── Engine events ─────────────────────────────────────────────────────

    fn register_listeners(&self, engine: &Arc<dyn EmulationEngine>) {
        let kinds = [
            EngineEventKind::Ready,
            EngineEventKind::Stopped,
            EngineEventKind::DownloadProgress,
            EngineEventKind::DownloadError,
            EngineEventKind::Boot,
            EngineEventKind::Error,
            EngineEventKind::ScreenSetMode,
            EngineEventKind::ScreenSetSize,
        ];
        let mut ids = Vec::with_capacity(kinds.len());
        for kind in kinds {
            let weak = self.weak.clone();
            let id = engine.add_listener(
                kind,
                Arc::new(move |event| {
                    if let Some(facade) = weak.upgrade() {
                        facade.handle_engine_event(event);
                    }
                }),
            );
            ids.push(id);
        }
        self.lock_state().listeners = ids;
    }

    fn handle_engine_event(&self, event: &EngineEvent) {
        let mut publish = true;
        {
            let mut state = self.lock_state();
            match event {
                EngineEvent::Ready => {
                    if let Some(tx) = state.ready_tx.take() {
                        let _ = tx.send(());
                        // init publishes the Ready transition itself
                        publish = false;
                    } else {
                        state.status = EmulatorStatus::Ready;
                        state.is_running = true;
                    }
                }
                EngineEvent::Stopped => {
                    state.status = EmulatorStatus::Stopped;
                    state.last_action = Some("engine stopped".into());
                }
                EngineEvent::DownloadProgress {
                    file,
                    loaded,
                    total,
                } => {
                    if *total > 0 {
                        state.boot_progress = (loaded.saturating_mul(100) / total).min(100) as u8;
                    }
                    state.last_action = Some(format!("downloading {file}"));
                }
                EngineEvent::DownloadError { file } => {
                    state.status = EmulatorStatus::DownloadError;
                    state.last_action = Some(format!("download failed: {file}"));
                }
                EngineEvent::Boot => {
                    state.boot_progress = 100;
                    state.last_action = Some("guest boot".into());
                }
                EngineEvent::Error { message } => {
                    tracing::warn!(message = %message, "engine reported device error");
                    state.status = EmulatorStatus::DeviceError;
                    state.last_action = Some(format!("device error: {message}"));
                }
                EngineEvent::ScreenSetMode { .. } | EngineEvent::ScreenSetSize { .. } => {
                    state.has_surface = true;
                }
            }
        }
        if publish {
            self.publish();
        }
    }

    fn start_memory_poll(&self, engine: Arc<dyn EmulationEngine>) {
        let weak = self.weak.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(MEMORY_POLL_INTERVAL);
            loop {
                ticker.tick().await;
                let Some(facade) = weak.upgrade() else { break };
                let usage = engine.memory_usage();
                {
                    let mut state = facade.lock_state();
                    if state.engine.is_none() {
                        break;
                    }
                    state.memory_usage = usage;
                }
                facade.publish();
            }
        });
        self.lock_state().memory_task = Some(handle);
    }

    // ── Internals ─────────────────────────────────────────────────────────

    fn teardown_engine(&self) {
        let (engine, listeners, task) = {
            let mut state = self.lock_state();
            state.ready_tx = None;
            (
                state.engine.take(),
                std::mem::take(&mut state.listeners),
                state.memory_task.take(),
            )
        };
        if let Some(task) = task {
            task.abort();
        }
        if let Some(engine) = engine {
            for id in listeners {
                engine.remove_listener(id);
            }
            engine.destroy();
        }
    }

    fn set_status(&self, status: EmulatorStatus) {
        {
            let mut state = self.lock_state();
            state.status = status;
        }
        self.publish();
    }

    fn publish(&self) {
        let snapshot = self.snapshot();
        self.subscribers.publish(&snapshot);
    }

    fn build_snapshot(&self, state: &FacadeState) -> EmulatorSnapshot {
        EmulatorSnapshot {
            is_running: state.is_running,
            os_type: self.os,
            screenshot: state.screenshot.clone(),
            status: state.status,
            memory_usage: state.memory_usage,
            network_active: state.network_active,
            boot_progress: state.boot_progress,
            last_action: state.last_action.clone(),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, FacadeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_queue(&self) -> MutexGuard<'_, TypeQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn encode_png(frame: &ScreenFrame) -> EmuPilotResult<Screenshot> {
    let image = image::RgbaImage::from_raw(frame.width, frame.height, frame.rgba.clone())
        .ok_or_else(|| EmuPilotError::Device("framebuffer size mismatch".into()))?;
    let mut png = Vec::new();
    let mut cursor = std::io::Cursor::new(&mut png);
    image::DynamicImage::ImageRgba8(image)
        .write_to(&mut cursor, image::ImageFormat::Png)
        .map_err(|e| EmuPilotError::Device(format!("png encode failed: {e}")))?;
    Ok(Screenshot {
        width: frame.width,
        height: frame.height,
        png,
        captured_at: chrono::Utc::now(),
    })
}
