//! Lifecycle controller: provision, launch, wait for readiness, tear down.
//!
//! A session owns one application instance on one worker thread. Setup walks
//! `NotStarted → Starting → Ready`; a failure at any step tears down whatever
//! was already built and surfaces as `SetupFailed`. Teardown checks that the
//! main window still holds focus, closes the application, joins the worker
//! within `join_timeout`, removes the scratch tree and restores leftover
//! overrides. Every failure along the way lands in the `TeardownReport`.

#![allow(missing_docs)]

use std::marker::PhantomData;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::core::config::HarnessConfig;
use crate::core::errors::{AlhError, Result};
use crate::env::scratch::{ProvisionedEnv, Provisioner, ScratchEnvironment};
use crate::gateway::Gateway;
use crate::logger::{HarnessEvent, LoggerHandle, SessionLoggerConfig, spawn_logger};
use crate::patch::registry::PatchRegistry;
use crate::poller::{WaitCondition, WaitOutcome, wait_for};
use crate::runtime::app::Application;
use crate::runtime::context::{ExecutionContext, LaunchEnv};
use crate::runtime::event_loop::{panic_message, spawn_app_thread};
use crate::session::handle::AppHandle;
use crate::session::slot::SessionSlot;
use crate::session::state::{Lifecycle, SessionState};
use crate::simulate::dialogs::Dialogs;
use crate::simulate::simulator::Simulator;

// ──────────────────── builder ────────────────────

/// Configures and starts a [`TestSession`].
pub struct SessionBuilder<A> {
    config: HarnessConfig,
    provisioner: Option<Box<dyn Provisioner>>,
    dialogs: Option<Arc<Dialogs>>,
    _app: PhantomData<fn() -> A>,
}

impl<A: Application> SessionBuilder<A> {
    /// Defaults to a [`ScratchEnvironment`] and headless dialogs.
    pub fn new(config: HarnessConfig) -> Self {
        Self {
            config,
            provisioner: Some(Box::new(ScratchEnvironment::new())),
            dialogs: None,
            _app: PhantomData,
        }
    }

    #[must_use]
    pub fn provisioner(mut self, provisioner: impl Provisioner + 'static) -> Self {
        self.provisioner = Some(Box::new(provisioner));
        self
    }

    /// Launch without a scratch environment or mock config.
    #[must_use]
    pub fn without_provisioning(mut self) -> Self {
        self.provisioner = None;
        self
    }

    #[must_use]
    pub fn dialogs(mut self, dialogs: Arc<Dialogs>) -> Self {
        self.dialogs = Some(dialogs);
        self
    }

    pub fn start(self) -> Result<TestSession<A>> {
        TestSession::launch(self)
    }
}

// ──────────────────── teardown report ────────────────────

/// How the worker thread ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinOutcome {
    NotJoined,
    Exited,
    ExitedWithError,
    Panicked,
    TimedOut,
}

impl JoinOutcome {
    /// `false` only when the worker may still be running.
    pub const fn worker_exited(self) -> bool {
        !matches!(self, Self::TimedOut)
    }
}

/// Everything teardown observed.
#[derive(Debug)]
pub struct TeardownReport {
    pub session_id: String,
    pub final_state: SessionState,
    pub duration: Duration,
    /// Main window still held focus when the test finished.
    pub shutdown_verified: bool,
    pub worker: JoinOutcome,
    pub restored_overrides: usize,
    /// Failures that make the teardown unsuccessful.
    pub failures: Vec<AlhError>,
    /// Recorded but not fatal under the current configuration.
    pub warnings: Vec<AlhError>,
    pub dropped_log_events: u64,
}

impl TeardownReport {
    fn new(session_id: &str, state: SessionState) -> Self {
        Self {
            session_id: session_id.to_string(),
            final_state: state,
            duration: Duration::ZERO,
            shutdown_verified: false,
            worker: JoinOutcome::NotJoined,
            restored_overrides: 0,
            failures: Vec::new(),
            warnings: Vec::new(),
            dropped_log_events: 0,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.warnings.is_empty()
    }

    /// The first failure as an error; the rest go to stderr.
    pub fn into_result(mut self) -> Result<Self> {
        if self.failures.is_empty() {
            return Ok(self);
        }
        for extra in self.failures.iter().skip(1) {
            eprintln!("[ALH-SESSION] additional teardown failure: {extra}");
        }
        Err(self.failures.remove(0))
    }
}

// ──────────────────── owned resources ────────────────────

/// What a session must give back, whether setup finished or not.
struct Resources {
    provisioner: Option<Box<dyn Provisioner>>,
    provisioned: Option<ProvisionedEnv>,
    registry: PatchRegistry,
    logger: LoggerHandle,
    logger_join: Option<JoinHandle<()>>,
    slot: Option<SessionSlot>,
}

impl Resources {
    fn release_environment(&mut self, failures: &mut Vec<AlhError>) {
        if let (Some(provisioner), Some(env)) = (self.provisioner.as_mut(), self.provisioned.take())
            && let Err(e) = provisioner.teardown(&env)
        {
            self.logger.send(HarnessEvent::from_error(&e));
            failures.push(e);
        }
    }

    fn restore_overrides(&mut self, failures: &mut Vec<AlhError>) -> usize {
        let outstanding = self.registry.outstanding().len();
        if outstanding > 0 {
            self.logger.note(
                "ALH-SESSION",
                format!("restoring {outstanding} override(s) left by the test"),
            );
        }
        failures.extend(self.registry.restore_all());
        outstanding
    }

    fn close_logger(&mut self) {
        self.logger.shutdown();
        if let Some(join) = self.logger_join.take() {
            let _ = join.join();
        }
    }
}

/// Join `handle`, giving up after `timeout`. A worker that never finishes is
/// left detached.
fn join_bounded(
    handle: JoinHandle<Result<()>>,
    timeout: Duration,
    interval: Duration,
) -> (JoinOutcome, Option<AlhError>) {
    if wait_for(|| handle.is_finished(), timeout, interval).is_err() {
        return (JoinOutcome::TimedOut, Some(AlhError::JoinTimeout { timeout }));
    }
    match handle.join() {
        Ok(Ok(())) => (JoinOutcome::Exited, None),
        Ok(Err(e)) => (JoinOutcome::ExitedWithError, Some(e)),
        Err(payload) => (
            JoinOutcome::Panicked,
            Some(AlhError::WorkerPanicked {
                message: panic_message(payload.as_ref()),
            }),
        ),
    }
}

// ──────────────────── session ────────────────────

/// One live application under test.
pub struct TestSession<A: Application> {
    id: String,
    config: HarnessConfig,
    lifecycle: Lifecycle,
    gateway: Gateway<A>,
    globals: Arc<ExecutionContext>,
    dialogs: Arc<Dialogs>,
    worker: Option<JoinHandle<Result<()>>>,
    resources: Resources,
    started: Instant,
    readiness: WaitOutcome,
}

impl<A: Application> TestSession<A> {
    pub fn builder(config: HarnessConfig) -> SessionBuilder<A> {
        SessionBuilder::new(config)
    }

    /// Start with the default scratch environment and headless dialogs.
    pub fn start(config: HarnessConfig) -> Result<Self> {
        SessionBuilder::new(config).start()
    }

    #[allow(clippy::too_many_lines)]
    fn launch(builder: SessionBuilder<A>) -> Result<Self> {
        let SessionBuilder {
            config,
            provisioner,
            dialogs,
            ..
        } = builder;
        config.validate()?;
        let started = Instant::now();

        // 1. Session slot: wait out any previous session's worker.
        let slot = SessionSlot::acquire(config.slot_timeout())?;
        let id = format!("{}-{:08x}", std::process::id(), rand::random::<u32>());

        // 2. Session logger.
        let (logger, logger_join) = if config.log.enabled {
            let logger_config = SessionLoggerConfig::from_log_config(&config.log, id.clone());
            let (handle, join) =
                spawn_logger(logger_config).map_err(|cause| AlhError::SetupFailed {
                    phase: "logger",
                    worker_exited: true,
                    cause: Box::new(cause),
                })?;
            (handle, Some(join))
        } else {
            (LoggerHandle::stderr_only(config.log.verbose), None)
        };

        let mut resources = Resources {
            provisioner,
            provisioned: None,
            registry: PatchRegistry::with_logger(logger.clone()),
            logger: logger.clone(),
            logger_join,
            slot: Some(slot),
        };
        let mut lifecycle = Lifecycle::new(logger.clone());
        lifecycle.advance(SessionState::Starting)?;
        logger.send(HarnessEvent::SessionStarted {
            config_hash: config.stable_hash().unwrap_or_default(),
            sentinel: config.session.sentinel.clone(),
        });

        // 3. Scratch environment and mock config.
        let dialogs = dialogs.unwrap_or_else(|| Arc::new(Dialogs::headless()));
        let mut env = LaunchEnv::new(config.session.sentinel.clone()).with_dialogs(Arc::clone(&dialogs));
        if let Some(provisioner) = resources.provisioner.as_mut() {
            match provisioner.provision(&config) {
                Ok(provisioned) => {
                    env = env.with_provisioned(&provisioned);
                    resources.provisioned = Some(provisioned);
                }
                Err(cause) => {
                    return Err(Self::abort_setup(
                        &config, lifecycle, resources, "provision", cause, None,
                    ));
                }
            }
        }

        // 4. Worker thread running the application's entry point.
        let (gateway, worker) = match spawn_app_thread::<A>(
            env.clone(),
            config.gateway.capacity,
            &config.session.worker_thread_name,
            logger.clone(),
        ) {
            Ok(spawned) => spawned,
            Err(cause) => {
                return Err(Self::abort_setup(
                    &config, lifecycle, resources, "spawn", cause, None,
                ));
            }
        };

        // 5. Readiness sentinel, then one round-trip through the loop.
        let readiness = WaitCondition::new(config.readiness_timeout())
            .with_interval(config.poll_interval())
            .try_wait(
                &format!("readiness sentinel `{}`", config.session.sentinel),
                || {
                    if env.is_ready() {
                        return Ok(true);
                    }
                    if worker.is_finished() {
                        return Err(AlhError::AppThreadGone {
                            operation: "launch".to_string(),
                            details: "application thread exited before signalling readiness"
                                .to_string(),
                        });
                    }
                    Ok(false)
                },
            );
        let readiness = match readiness {
            Ok(outcome) => outcome,
            Err(cause) => {
                if let AlhError::Timeout {
                    condition, elapsed, ..
                } = &cause
                {
                    logger.send(HarnessEvent::WaitTimedOut {
                        condition: condition.clone(),
                        elapsed_ms: duration_ms(*elapsed),
                    });
                }
                return Err(Self::abort_setup(
                    &config,
                    lifecycle,
                    resources,
                    "readiness",
                    cause,
                    Some((&gateway, worker)),
                ));
            }
        };

        let probe = gateway
            .run_named("readiness probe", |cx| cx.is_launched())
            .and_then(|launched| {
                if launched {
                    Ok(())
                } else {
                    Err(AlhError::AppState {
                        details: "loop answered but the application is not installed".to_string(),
                    })
                }
            });
        if let Err(cause) = probe {
            return Err(Self::abort_setup(
                &config,
                lifecycle,
                resources,
                "probe",
                cause,
                Some((&gateway, worker)),
            ));
        }

        logger.send(HarnessEvent::ReadinessReached {
            elapsed_ms: duration_ms(readiness.elapsed),
            polls: readiness.polls,
        });
        lifecycle.advance(SessionState::Ready)?;

        Ok(Self {
            id,
            config,
            lifecycle,
            gateway,
            globals: Arc::clone(&env.globals),
            dialogs,
            worker: Some(worker),
            resources,
            started,
            readiness,
        })
    }

    /// Best-effort cleanup after a failed setup step.
    fn abort_setup(
        config: &HarnessConfig,
        mut lifecycle: Lifecycle,
        mut resources: Resources,
        phase: &'static str,
        cause: AlhError,
        worker: Option<(&Gateway<A>, JoinHandle<Result<()>>)>,
    ) -> AlhError {
        lifecycle.fail();
        resources.logger.send(HarnessEvent::from_error(&cause));
        eprintln!("[ALH-SESSION] setup failed during {phase}: {cause}");

        let mut cause = cause;
        let mut failures = Vec::new();
        let worker_exited = match worker {
            None => true,
            Some((gateway, handle)) => {
                gateway.request_quit();
                let (outcome, worker_error) =
                    join_bounded(handle, config.join_timeout(), config.poll_interval());
                match worker_error {
                    // The worker's own error explains the exit better.
                    Some(e) if matches!(cause, AlhError::AppThreadGone { .. }) => cause = e,
                    Some(e) => failures.push(e),
                    None => {}
                }
                outcome.worker_exited()
            }
        };

        resources.release_environment(&mut failures);
        resources.restore_overrides(&mut failures);
        for failure in &failures {
            eprintln!("[ALH-SESSION] cleanup after failed setup: {failure}");
        }
        resources.logger.send(HarnessEvent::SessionStopped {
            state: lifecycle.state().as_str(),
            duration_ms: 0,
            failures: failures.len() + 1,
        });
        resources.close_logger();
        drop(resources.slot.take());

        AlhError::SetupFailed {
            phase,
            worker_exited,
            cause: Box::new(cause),
        }
    }

    // ──────────────────── accessors ────────────────────

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.lifecycle.state()
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn is_ready(&self) -> bool {
        self.state().is_live()
    }

    /// How long readiness took and how many polls it needed.
    pub fn readiness(&self) -> WaitOutcome {
        self.readiness
    }

    pub fn gateway(&self) -> &Gateway<A> {
        &self.gateway
    }

    pub fn registry(&self) -> &PatchRegistry {
        &self.resources.registry
    }

    pub fn dialogs(&self) -> &Arc<Dialogs> {
        &self.dialogs
    }

    pub fn globals(&self) -> &ExecutionContext {
        &self.globals
    }

    /// The scratch environment, when provisioned.
    pub fn environment(&self) -> Option<&ProvisionedEnv> {
        self.resources.provisioned.as_ref()
    }

    pub fn logger(&self) -> &LoggerHandle {
        &self.resources.logger
    }

    // ──────────────────── driving ────────────────────

    /// Hand the application to the test. Moves the session to `Running`.
    pub fn handle(&mut self) -> Result<AppHandle<A>> {
        match self.state() {
            SessionState::Ready => self.lifecycle.advance(SessionState::Running)?,
            SessionState::Running => {}
            other => return Err(AlhError::NotReady { state: other.as_str() }),
        }
        Ok(AppHandle::new(
            self.gateway.clone(),
            Arc::clone(&self.globals),
            &self.config.session.sentinel,
        ))
    }

    /// A simulator wired to this session's gateway, registry and dialogs.
    pub fn simulator(&self) -> Result<Simulator<A>> {
        let state = self.state();
        if !state.is_live() {
            return Err(AlhError::NotReady { state: state.as_str() });
        }
        Ok(Simulator::new(
            self.gateway.clone(),
            self.resources.registry.clone(),
            Arc::clone(&self.dialogs),
        ))
    }

    /// Poll `predicate` with the configured `[poll]` bounds.
    pub fn wait_for<F>(&self, description: &str, predicate: F) -> Result<WaitOutcome>
    where
        F: FnMut() -> bool,
    {
        let result = self.config.wait_condition().wait(description, predicate);
        self.observe_wait(result)
    }

    /// Poll application state through the gateway until `predicate` holds.
    pub fn wait_until_app<F>(&self, description: &str, predicate: F) -> Result<WaitOutcome>
    where
        F: Fn(&A) -> bool + Send + Sync + 'static,
    {
        let predicate = Arc::new(predicate);
        let gateway = self.gateway.clone();
        let result = self.config.wait_condition().try_wait(description, || {
            let predicate = Arc::clone(&predicate);
            gateway.read(move |app| predicate(app))
        });
        self.observe_wait(result)
    }

    fn observe_wait(&self, result: Result<WaitOutcome>) -> Result<WaitOutcome> {
        if let Err(AlhError::Timeout {
            condition, elapsed, ..
        }) = &result
        {
            self.resources.logger.send(HarnessEvent::WaitTimedOut {
                condition: condition.clone(),
                elapsed_ms: duration_ms(*elapsed),
            });
        }
        result
    }

    // ──────────────────── teardown ────────────────────

    /// Tear down and fail on the first teardown failure.
    pub fn teardown(mut self) -> Result<TeardownReport> {
        self.shutdown().into_result()
    }

    /// Tear down and return the report whatever happened.
    pub fn teardown_report(mut self) -> TeardownReport {
        self.shutdown()
    }

    fn shutdown(&mut self) -> TeardownReport {
        let mut report = TeardownReport::new(&self.id, self.state());
        if self.state().is_terminal() {
            return report;
        }
        if let Err(e) = self.lifecycle.advance(SessionState::TearingDown) {
            report.failures.push(e);
        }

        // 1. Shutdown-safety: the main window must still be active.
        match self.gateway.read(A::is_active_window) {
            Ok(true) => report.shutdown_verified = true,
            Ok(false) => {
                let details = "main window was not the active window when the test finished";
                self.resources
                    .logger
                    .send(HarnessEvent::InvariantViolated {
                        details: details.to_string(),
                    });
                eprintln!("[ALH-SESSION] invariant violated: {details}");
                let violation = AlhError::InvariantViolation {
                    details: details.to_string(),
                };
                if self.config.session.fail_on_focus_leak {
                    report.failures.push(violation);
                } else {
                    report.warnings.push(violation);
                }
            }
            Err(e) => report.failures.push(e),
        }

        // 2. Close, then quit and join within the bound.
        if let Err(e) = self
            .gateway
            .try_run_named("close", |cx| cx.app_mut()?.close(cx))
        {
            self.resources.logger.note("ALH-SESSION", format!("close failed: {e}"));
            report.failures.push(e);
        }
        self.gateway.request_quit();
        if let Some(worker) = self.worker.take() {
            let (outcome, error) =
                join_bounded(worker, self.config.join_timeout(), self.config.poll_interval());
            report.worker = outcome;
            report.failures.extend(error);
        }

        // 3. Scratch tree, leftover overrides.
        self.resources.release_environment(&mut report.failures);
        report.restored_overrides = self.resources.restore_overrides(&mut report.failures);

        // 4. Logger, slot.
        if let Err(e) = self.lifecycle.advance(SessionState::Stopped) {
            report.failures.push(e);
        }
        report.final_state = self.state();
        report.duration = self.started.elapsed();
        for failure in &report.failures {
            self.resources.logger.send(HarnessEvent::from_error(failure));
        }
        self.resources.logger.send(HarnessEvent::SessionStopped {
            state: report.final_state.as_str(),
            duration_ms: duration_ms(report.duration),
            failures: report.failures.len(),
        });
        report.dropped_log_events = self.resources.logger.dropped_events();
        self.resources.close_logger();
        drop(self.resources.slot.take());
        report
    }
}

impl<A: Application> Drop for TestSession<A> {
    fn drop(&mut self) {
        if self.state().is_terminal() {
            return;
        }
        let report = self.shutdown();
        for failure in &report.failures {
            eprintln!("[ALH-SESSION] teardown on drop: {failure}");
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn duration_ms(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use super::*;
    use crate::runtime::event_loop::LoopContext;
    use crate::simulate::dialogs::{Confirmer, ConfirmRequest, QUESTION};
    use crate::simulate::input::{InputEvent, WidgetId};

    /// Reads its behaviour from the `[probe]` section of the mock config.
    struct Probe {
        active: bool,
        clicks: u32,
    }

    impl Application for Probe {
        fn launch(cx: &LoopContext<Self>, env: &LaunchEnv) -> Result<Self> {
            let config = env.mock_config()?;
            if config.get_raw("probe", "fail_launch") == Some("yes") {
                return Err(AlhError::InvalidConfig {
                    details: "probe refused to launch".to_string(),
                });
            }
            if let Some(delay) = config
                .get_raw("probe", "ready_after_ms")
                .and_then(|ms| ms.parse::<u64>().ok())
            {
                let env = env.clone();
                cx.single_shot(Duration::from_millis(delay), move |_| {
                    env.signal_ready("probe".to_string());
                });
            }
            Ok(Self {
                active: true,
                clicks: 0,
            })
        }

        fn dispatch(
            &mut self,
            _cx: &LoopContext<Self>,
            _target: &WidgetId,
            event: &InputEvent,
        ) -> Result<()> {
            if matches!(event, InputEvent::Click { .. }) {
                self.clicks += 1;
            }
            Ok(())
        }

        fn is_active_window(&self) -> bool {
            self.active
        }
    }

    fn test_config(dir: &Path) -> HarnessConfig {
        let mut config = HarnessConfig::default();
        config.scratch.root = dir.join("scratch");
        config.log.jsonl_path = dir.join("logs").join("session.jsonl");
        config.session.readiness_timeout_ms = 2_000;
        config.session.join_timeout_ms = 2_000;
        config.poll.interval_ms = 5;
        config
    }

    fn start_probe(
        config: HarnessConfig,
        key: &'static str,
        value: &'static str,
    ) -> Result<TestSession<Probe>> {
        let scratch =
            ScratchEnvironment::new().with_config_edit(move |cfg| cfg.set("probe", key, value));
        SessionBuilder::<Probe>::new(config)
            .provisioner(scratch)
            .start()
    }

    #[test]
    fn starts_ready_and_tears_down_clean() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = start_probe(test_config(dir.path()), "ready_after_ms", "50").unwrap();
        assert_eq!(session.state(), SessionState::Ready);
        assert!(session.readiness().elapsed >= Duration::from_millis(50));
        let scratch: PathBuf = session.environment().unwrap().root.clone();
        assert!(scratch.join("mock_config.ini").is_file());

        let handle = session.handle().unwrap();
        assert_eq!(session.state(), SessionState::Running);
        assert_eq!(handle.sentinel_value::<String>().unwrap(), "probe");

        let report = session.teardown().unwrap();
        assert!(report.is_clean());
        assert!(report.shutdown_verified);
        assert_eq!(report.final_state, SessionState::Stopped);
        assert_eq!(report.worker, JoinOutcome::Exited);
        assert!(!scratch.exists());
        assert_eq!(handle.read(|app| app.clicks).unwrap_err().code(), "ALH-2102");

        let log = std::fs::read_to_string(dir.path().join("logs/session.jsonl")).unwrap();
        assert!(log.contains("\"session_start\""));
        assert!(log.contains("\"readiness\""));
        assert!(log.contains("\"session_stop\""));
    }

    #[test]
    fn never_ready_is_a_setup_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.session.readiness_timeout_ms = 100;
        let err = start_probe(config, "ready_after_ms", "never").err().unwrap();
        match &err {
            AlhError::SetupFailed {
                phase,
                worker_exited,
                ..
            } => {
                assert_eq!(*phase, "readiness");
                assert!(*worker_exited);
            }
            other => panic!("unexpected error {other}"),
        }
        assert!(err.is_timeout());
        // Scratch tree removed during cleanup.
        let leftovers = std::fs::read_dir(dir.path().join("scratch"))
            .map(|entries| entries.count())
            .unwrap_or(0);
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn launch_error_becomes_the_setup_cause() {
        let dir = tempfile::tempdir().unwrap();
        let err = start_probe(test_config(dir.path()), "fail_launch", "yes").err().unwrap();
        let AlhError::SetupFailed { phase, cause, .. } = err else {
            panic!("expected SetupFailed");
        };
        assert_eq!(phase, "readiness");
        assert_eq!(cause.code(), "ALH-1001");
    }

    #[test]
    fn focus_leak_is_fatal_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = start_probe(test_config(dir.path()), "ready_after_ms", "0").unwrap();
        let handle = session.handle().unwrap();
        handle.write(|app| app.active = false).unwrap();
        let err = session.teardown().unwrap_err();
        assert_eq!(err.code(), "ALH-3002");
    }

    #[test]
    fn focus_leak_can_be_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.session.fail_on_focus_leak = false;
        let session = start_probe(config, "ready_after_ms", "0").unwrap();
        session.gateway().write(|app| app.active = false).unwrap();
        // Handle never taken: Ready goes straight to teardown.
        let report = session.teardown().unwrap();
        assert!(!report.shutdown_verified);
        assert_eq!(report.warnings.len(), 1);
        assert!(!report.is_clean());
    }

    #[test]
    fn handle_requires_a_live_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = start_probe(test_config(dir.path()), "ready_after_ms", "0").unwrap();
        let first = session.handle().unwrap();
        let second = session.handle().unwrap();
        assert_eq!(
            first.gateway().worker_thread(),
            second.gateway().worker_thread()
        );
        let report = session.teardown_report();
        assert_eq!(report.final_state, SessionState::Stopped);
    }

    #[test]
    fn leftover_overrides_are_restored() {
        let dir = tempfile::tempdir().unwrap();
        let session = start_probe(test_config(dir.path()), "ready_after_ms", "0").unwrap();
        let always_yes: Confirmer = Arc::new(|_: &ConfirmRequest| true);
        let guard = session
            .registry()
            .with_override(session.dialogs(), QUESTION, always_yes)
            .unwrap();
        std::mem::forget(guard);
        let dialogs = Arc::clone(session.dialogs());

        let report = session.teardown().unwrap();
        assert_eq!(report.restored_overrides, 1);
        let request = ConfirmRequest {
            parent: None,
            title: "Remove".to_string(),
            message: "Remove routine?".to_string(),
        };
        assert!(!dialogs.question(&request));
    }

    #[test]
    fn dropping_a_session_tears_it_down() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = start_probe(test_config(dir.path()), "ready_after_ms", "0").unwrap();
        let handle = session.handle().unwrap();
        let scratch = session.environment().unwrap().root.clone();
        drop(session);
        assert!(!scratch.exists());
        assert_eq!(handle.read(|app| app.clicks).unwrap_err().code(), "ALH-2102");
    }

    #[test]
    fn wait_until_app_observes_state() {
        let dir = tempfile::tempdir().unwrap();
        let session = start_probe(test_config(dir.path()), "ready_after_ms", "0").unwrap();
        let sim = session.simulator().unwrap();
        sim.post_mouse_click("button").unwrap();
        session
            .wait_until_app("one click recorded", |app| app.clicks == 1)
            .unwrap();

        let err = session
            .wait_until_app("impossible", |app| app.clicks > 5)
            .unwrap_err();
        assert!(err.is_timeout());
        session.teardown().unwrap();
    }
}
