//! Session controller.
//!
//! The `SessionController` is the single entry point for the presentation
//! layer. It enforces the operation guards, owns the enrollment state machine
//! and runs the matcher.
//!
//! # Architecture
//!
//! All session state lives on one completion task. Public calls, device
//! events and worker results reach it as commands over one channel, so no
//! two state changes ever interleave. Device calls never run on the
//! completion task: they run on workers that post their result back.
//!
//! ```text
//!  API call ──► guard ──┐
//!                       │        ┌──────────────────┐     ┌──────────────┐
//!  Device events ───────┼──────► │ completion task  │ ──► │ status watch │
//!  (forwarder)          │        │ (state machine)  │     └──────────────┘
//!                       │        └──────────────────┘
//!  Worker results ──────┘          │            ▲
//!                                  ▼            │
//!                           ┌─────────────┐     │
//!                           │ driver task │ ────┘
//!                           │ (per enroll)│  begin_capture / capture_once
//!                           └─────────────┘  fetch / cancel
//! ```
//!
//! Each enrollment gets a driver task that executes its device requests in
//! order, so a cancel can never overtake the capture it is meant to abort.
//! Dropping the last controller handle stops every task.
//!
//! # Examples
//!
//! ```no_run
//! use biokey_core::CaptureMode;
//! use biokey_hardware::mock::MockSensor;
//! use biokey_session::{CaptureConfig, SessionController};
//! use biokey_storage::{Database, SqliteTemplateStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (sensor, handle) = MockSensor::new();
//! let db = Database::in_memory().await?;
//! let store = SqliteTemplateStore::new(db.pool().clone());
//!
//! let controller = SessionController::new(sensor, store, CaptureConfig::default())?;
//! handle.announce();
//! controller.wait_until(|s| s.detected_model.is_some()).await?;
//!
//! controller.initialize().await?;
//! controller.start_enrollment(CaptureMode::Manual).await?;
//! let status = controller.wait_until(|s| s.phase.is_terminal()).await?;
//! println!("{status}");
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::sync::Arc;

use biokey_core::{CaptureMode, DeviceModel, Error, OperationKind, ResultCode, Result};
use biokey_hardware::{
    CaptureDevice, CaptureParams, CaptureQuality, ConnectionState, DeviceEvent, DeviceInfo,
    HardwareError,
};
use biokey_storage::TemplateStore;
use biokey_storage::models::NewSample;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, trace, warn};

use crate::config::CaptureConfig;
use crate::guard::{GuardToken, OperationGuards};
use crate::matcher::{MatchOutcome, Matcher};
use crate::state_machine::{
    AttemptOutcome, Directive, EnrollmentSession, FailureReason, PhaseTransition, SessionPhase,
};
use crate::status::{SessionStatus, StatusEvent};

type Reply<T> = oneshot::Sender<Result<T>>;

/// Message processed by the completion task.
#[derive(Debug)]
enum Command {
    Initialize {
        guard: GuardToken,
        reply: Reply<DeviceInfo>,
    },
    InitFinished {
        generation: u64,
        guard: GuardToken,
        reply: Reply<DeviceInfo>,
        result: Result<DeviceInfo>,
    },
    Uninitialize {
        guard: GuardToken,
        reply: Reply<()>,
    },
    UninitFinished {
        generation: u64,
        guard: GuardToken,
        reply: Reply<()>,
        result: Result<()>,
    },
    StartEnrollment {
        guard: GuardToken,
        mode: CaptureMode,
        reply: Reply<()>,
    },
    AttemptFinished {
        enrollment: u64,
        slot: u32,
        report: AttemptReport,
    },
    Stop {
        guard: GuardToken,
        reply: Reply<()>,
    },
    StopFinished {
        enrollment: u64,
        guard: GuardToken,
        reply: Reply<()>,
        result: Result<()>,
    },
    Match {
        guard: GuardToken,
        reply: Reply<MatchOutcome>,
    },
    MatchFinished {
        generation: u64,
        guard: GuardToken,
        reply: Reply<MatchOutcome>,
        result: Result<MatchOutcome>,
    },
    Shutdown {
        reply: Reply<()>,
    },
    Device(DeviceEvent),
}

/// Raw result of one capture attempt, before persistence.
#[derive(Debug)]
enum AttemptReport {
    Captured(CapturedSample),
    TemplateUnavailable { code: i32, message: String },
    TimedOut,
    Disconnected,
    Failed { code: i32, message: String },
}

impl AttemptReport {
    fn from_error(err: &HardwareError) -> Self {
        if err.is_timeout() {
            Self::TimedOut
        } else if err.is_disconnected() {
            Self::Disconnected
        } else {
            Self::Failed {
                code: err.code(),
                message: err.to_string(),
            }
        }
    }
}

#[derive(Debug)]
struct CapturedSample {
    quality: CaptureQuality,
    template: Vec<u8>,
    image: Option<Vec<u8>>,
}

/// Work for an enrollment's driver task.
#[derive(Debug)]
enum DriverRequest {
    Capture { slot: u32 },
    Harvest { slot: u32, quality: CaptureQuality },
    Cancel { guard: GuardToken, reply: Reply<()> },
}

/// Enrollment in flight.
#[derive(Debug)]
struct Enrollment {
    id: u64,
    mode: CaptureMode,
    /// Capture guard, released when the enrollment ends.
    _guard: GuardToken,
    token: CancellationToken,
    driver: mpsc::UnboundedSender<DriverRequest>,
    /// Manual mode: a `CaptureCompleted` event is expected.
    awaiting_event: bool,
    /// Template and image of an accepted finger are being fetched.
    harvest_pending: bool,
}

impl Enrollment {
    fn send(&self, request: DriverRequest) {
        if self.driver.send(request).is_err() {
            warn!(enrollment = self.id, "Capture driver stopped");
        }
    }
}

struct Inner {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<SessionStatus>,
    guards: OperationGuards,
    config: CaptureConfig,
    _shutdown: DropGuard,
}

/// Orchestrates device initialization, enrollment and matching.
///
/// Cheap to clone; all clones drive the same session.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("status", &*self.inner.status.borrow())
            .field("running", &self.inner.guards.running())
            .finish()
    }
}

impl SessionController {
    /// Create a controller and start its tasks.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if the configuration is invalid.
    pub fn new<D, S>(device: D, store: S, config: CaptureConfig) -> Result<Self>
    where
        D: CaptureDevice,
        S: TemplateStore,
    {
        config.validate()?;

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let guards = OperationGuards::new();

        let initial = SessionStatus {
            target: config.target_samples,
            mode: config.mode,
            ..SessionStatus::default()
        };
        let (status_tx, status_rx) = watch::channel(initial);

        let device = Arc::new(device);

        // Subscribe before anything can be emitted on the controller's behalf.
        let events = device.subscribe();
        tokio::spawn(forward_events(
            events,
            commands_tx.clone(),
            shutdown.clone(),
        ));

        let context = Context {
            session: new_session(&config, SessionPhase::Idle, config.mode),
            device,
            store: Arc::new(store),
            config: config.clone(),
            guards: guards.clone(),
            commands: commands_tx.clone(),
            status: status_tx,
            enrollment: None,
            device_info: None,
            detected_model: None,
            connected: false,
            live_quality: None,
            failure_message: None,
            match_token: None,
            generation: 0,
            next_enrollment: 0,
            shutdown: shutdown.clone(),
        };
        tokio::spawn(context.run(commands_rx));

        info!(
            target_samples = config.target_samples,
            mode = ?config.mode,
            "Session controller started"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                commands: commands_tx,
                status: status_rx,
                guards,
                config,
                _shutdown: shutdown.drop_guard(),
            }),
        })
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.inner.config
    }

    /// Initialize the sensor using the detected model, falling back to the
    /// configured one.
    ///
    /// Returns the cached device info if the device is already initialized.
    ///
    /// # Errors
    ///
    /// - [`Error::OperationAlreadyInProgress`] if an initialization is running
    /// - [`Error::NoDeviceDetected`] if no model is known
    /// - [`Error::InitializationError`] with the vendor code
    pub async fn initialize(&self) -> Result<DeviceInfo> {
        let guard = self.acquire(OperationKind::Init)?;
        self.request(|reply| Command::Initialize { guard, reply })
            .await
    }

    /// Tear the sensor down and return to `Idle`.
    ///
    /// # Errors
    ///
    /// [`Error::OperationAlreadyInProgress`] while an initialization, an
    /// enrollment or a match is running, or the teardown failure.
    pub async fn uninitialize(&self) -> Result<()> {
        let guard = self.acquire(OperationKind::Uninit)?;
        self.request(|reply| Command::Uninitialize { guard, reply })
            .await
    }

    /// Start collecting samples.
    ///
    /// Returns once the first capture has been dispatched. Progress is
    /// reported through [`status`](Self::status).
    ///
    /// # Errors
    ///
    /// - [`Error::OperationAlreadyInProgress`] if an enrollment or a match is
    ///   running; the running operation is not affected
    /// - [`Error::DeviceNotInitialized`] without a live device
    pub async fn start_enrollment(&self, mode: CaptureMode) -> Result<()> {
        let guard = self.acquire(OperationKind::Capture)?;
        self.request(|reply| Command::StartEnrollment { guard, mode, reply })
            .await
    }

    /// Request the running enrollment to stop.
    ///
    /// The stop is honored at the next attempt boundary. In manual mode the
    /// pending capture is also aborted on the device; this call then returns
    /// once the abort has been confirmed. Without a running enrollment this
    /// is a no-op.
    ///
    /// # Errors
    ///
    /// The device's cancel failure. The enrollment then continues on the same
    /// slot.
    pub async fn stop(&self) -> Result<()> {
        let guard = self.acquire(OperationKind::Stop)?;
        self.request(|reply| Command::Stop { guard, reply }).await
    }

    /// Capture one finger and search the store for it.
    ///
    /// # Errors
    ///
    /// - [`Error::OperationAlreadyInProgress`] while an enrollment or another
    ///   match is running
    /// - [`Error::DeviceNotInitialized`] without a live device
    /// - [`Error::EmptyStore`] when nothing is enrolled
    /// - capture failures, verbatim
    pub async fn start_match(&self) -> Result<MatchOutcome> {
        let guard = self.acquire(OperationKind::Capture)?;
        self.request(|reply| Command::Match { guard, reply }).await
    }

    /// Abort any capture, tear the device down and return to `Idle`.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    /// Latest status snapshot.
    pub fn status(&self) -> SessionStatus {
        self.inner.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status.clone()
    }

    /// Wait until a status satisfies `predicate`. Checks the current status
    /// first.
    ///
    /// # Errors
    ///
    /// [`Error::ControllerStopped`] if the controller shuts down first.
    pub async fn wait_until<F>(&self, mut predicate: F) -> Result<SessionStatus>
    where
        F: FnMut(&SessionStatus) -> bool,
    {
        let mut status = self.subscribe_status();
        let matched = status
            .wait_for(|s| predicate(s))
            .await
            .map_err(|_| Error::ControllerStopped)?;
        Ok((*matched).clone())
    }

    /// Whether the guard for `kind` is currently held.
    pub fn is_running(&self, kind: OperationKind) -> bool {
        self.inner.guards.is_running(kind)
    }

    fn acquire(&self, kind: OperationKind) -> Result<GuardToken> {
        self.inner.guards.try_acquire(kind).inspect_err(|_| {
            debug!(%kind, "Rejected, operation already running");
        })
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.inner
            .commands
            .send(build(reply))
            .map_err(|_| Error::ControllerStopped)?;
        response.await.map_err(|_| Error::ControllerStopped)?
    }
}

/// Release the operation guard, then reply.
fn answer<T>(guard: GuardToken, reply: Reply<T>, result: Result<T>) {
    drop(guard);
    let _ = reply.send(result);
}

fn record(result: Result<PhaseTransition>) {
    match result {
        Ok(transition) => debug!(%transition, "Session phase changed"),
        Err(err) => warn!(error = %err, "Unexpected session transition"),
    }
}

fn new_session(config: &CaptureConfig, phase: SessionPhase, mode: CaptureMode) -> EnrollmentSession {
    EnrollmentSession::builder()
        .with_initial_phase(phase)
        .with_target(config.target_samples)
        .with_mode(mode)
        .with_max_timeout_retries(config.max_timeout_retries)
        .build()
}

/// Re-post sensor events onto the completion task.
async fn forward_events(
    mut events: tokio::sync::broadcast::Receiver<DeviceEvent>,
    commands: mpsc::UnboundedSender<Command>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Ok(event) => {
                if commands.send(Command::Device(event)).is_err() {
                    break;
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Device events dropped");
            }
            Err(RecvError::Closed) => break,
        }
    }
    debug!("Device event forwarder stopped");
}

/// Fetch image and template of the accepted finger.
///
/// The image is optional; only a missing template discards the sample.
async fn harvest<D: CaptureDevice>(device: &D, quality: CaptureQuality) -> AttemptReport {
    let image = match device.fetch_image().await {
        Ok(image) => Some(image),
        Err(err) => {
            warn!(error = %err, "Image unavailable, keeping template only");
            None
        }
    };

    match device.fetch_template().await {
        Ok(template) => AttemptReport::Captured(CapturedSample {
            quality,
            template,
            image,
        }),
        Err(err) if err.is_disconnected() => AttemptReport::Disconnected,
        Err(err) => AttemptReport::TemplateUnavailable {
            code: err.code(),
            message: err.to_string(),
        },
    }
}

/// Execute one enrollment's device requests in order.
async fn drive<D: CaptureDevice>(
    device: Arc<D>,
    enrollment: u64,
    mode: CaptureMode,
    params: CaptureParams,
    mut requests: mpsc::UnboundedReceiver<DriverRequest>,
    commands: mpsc::UnboundedSender<Command>,
    token: CancellationToken,
) {
    loop {
        let request = tokio::select! {
            biased;
            () = token.cancelled() => break,
            request = requests.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        let command = match request {
            // A cancel always runs to completion so the caller gets an answer.
            DriverRequest::Cancel { guard, reply } => {
                let result = device.cancel_capture().await.map_err(Error::from);
                Some(Command::StopFinished {
                    enrollment,
                    guard,
                    reply,
                    result,
                })
            }
            DriverRequest::Capture { slot } => {
                let work = async {
                    match mode {
                        CaptureMode::Manual => match device.begin_capture(params).await {
                            Ok(()) => None,
                            Err(err) => Some(AttemptReport::from_error(&err)),
                        },
                        CaptureMode::Auto => match device.capture_once(params).await {
                            Ok(quality) => Some(harvest(&*device, quality).await),
                            Err(err) => Some(AttemptReport::from_error(&err)),
                        },
                    }
                };
                let report = tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    report = work => report,
                };
                report.map(|report| Command::AttemptFinished {
                    enrollment,
                    slot,
                    report,
                })
            }
            DriverRequest::Harvest { slot, quality } => {
                let report = tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    report = harvest(&*device, quality) => report,
                };
                Some(Command::AttemptFinished {
                    enrollment,
                    slot,
                    report,
                })
            }
        };

        if let Some(command) = command
            && commands.send(command).is_err()
        {
            break;
        }
    }

    // The enrollment ended under a queued stop; that stop has taken effect.
    requests.close();
    while let Ok(request) = requests.try_recv() {
        if let DriverRequest::Cancel { guard, reply } = request {
            answer(guard, reply, Ok(()));
        }
    }
    trace!(enrollment, "Capture driver stopped");
}

/// State owned by the completion task.
struct Context<D, S> {
    device: Arc<D>,
    store: Arc<S>,
    config: CaptureConfig,
    guards: OperationGuards,
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Sender<SessionStatus>,
    session: EnrollmentSession,
    enrollment: Option<Enrollment>,
    device_info: Option<DeviceInfo>,
    detected_model: Option<DeviceModel>,
    connected: bool,
    live_quality: Option<u8>,
    /// Vendor message of the capture failure that ends the enrollment.
    failure_message: Option<String>,
    /// Cancels the match in flight.
    match_token: Option<CancellationToken>,
    /// Bumped whenever the device handle is invalidated.
    generation: u64,
    next_enrollment: u64,
    shutdown: CancellationToken,
}

impl<D, S> Context<D, S>
where
    D: CaptureDevice,
    S: TemplateStore,
{
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let shutdown = self.shutdown.clone();
        loop {
            let command = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };
            self.handle(command).await;
        }

        self.end_enrollment();
        debug!("Session controller stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Initialize { guard, reply } => self.on_initialize(guard, reply),
            Command::InitFinished {
                generation,
                guard,
                reply,
                result,
            } => self.on_init_finished(generation, guard, reply, result),
            Command::Uninitialize { guard, reply } => self.on_uninitialize(guard, reply),
            Command::UninitFinished {
                generation,
                guard,
                reply,
                result,
            } => self.on_uninit_finished(generation, guard, reply, result),
            Command::StartEnrollment { guard, mode, reply } => {
                let result = self.on_start_enrollment(guard, mode);
                let _ = reply.send(result);
            }
            Command::AttemptFinished {
                enrollment,
                slot,
                report,
            } => self.on_attempt_finished(enrollment, slot, report).await,
            Command::Stop { guard, reply } => self.on_stop(guard, reply),
            Command::StopFinished {
                enrollment,
                guard,
                reply,
                result,
            } => self.on_stop_finished(enrollment, guard, reply, result),
            Command::Match { guard, reply } => self.on_match(guard, reply),
            Command::MatchFinished {
                generation,
                guard,
                reply,
                result,
            } => self.on_match_finished(generation, guard, reply, result),
            Command::Shutdown { reply } => self.on_shutdown(reply),
            Command::Device(event) => self.on_device_event(event),
        }
    }

    /// Run a device call off the completion task and post its result back.
    fn spawn_worker<F>(&self, work: F)
    where
        F: Future<Output = Command> + Send + 'static,
    {
        let commands = self.commands.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {}
                command = work => {
                    let _ = commands.send(command);
                }
            }
        });
    }

    fn publish(&mut self, event: StatusEvent) {
        debug!(phase = %self.session.phase(), captured = self.session.captured(), %event, "Status");
        self.send_status(event);
    }

    /// Republish with the current event, e.g. after a preview frame.
    fn refresh(&mut self) {
        let event = self.status.borrow().event.clone();
        self.send_status(event);
    }

    fn send_status(&mut self, event: StatusEvent) {
        let snapshot = self.snapshot(event);
        self.status.send_modify(|status| {
            let seq = status.seq + 1;
            *status = SessionStatus { seq, ..snapshot };
        });
    }

    fn snapshot(&self, event: StatusEvent) -> SessionStatus {
        SessionStatus {
            seq: 0,
            phase: self.session.phase(),
            captured: self.session.captured(),
            target: self.session.target(),
            mode: self.session.mode(),
            device: self.device_info.clone(),
            detected_model: self.detected_model,
            connected: self.connected,
            live_quality: self.live_quality,
            event,
        }
    }

    /// Rejection for the first of `kinds` that is running.
    fn busy(&self, kinds: &[OperationKind]) -> Option<Error> {
        kinds
            .iter()
            .copied()
            .find(|kind| self.guards.is_running(*kind))
            .map(Error::OperationAlreadyInProgress)
    }

    // Initialization

    fn on_initialize(&mut self, guard: GuardToken, reply: Reply<DeviceInfo>) {
        if let Some(busy) = self.busy(&[OperationKind::Capture, OperationKind::Uninit]) {
            return answer(guard, reply, Err(busy));
        }
        if let Some(info) = &self.device_info {
            debug!(device = %info.name, "Device already initialized");
            return answer(guard, reply, Ok(info.clone()));
        }

        let Some(model) = self.detected_model.or(self.config.device_model) else {
            warn!("Initialize requested but no sensor detected");
            let err = Error::NoDeviceDetected;
            self.publish(StatusEvent::InitFailed {
                code: None,
                message: err.to_string(),
            });
            return answer(guard, reply, Err(err));
        };

        self.session = new_session(&self.config, SessionPhase::Idle, self.config.mode);
        if let Err(err) = self.session.begin_initialization() {
            return answer(guard, reply, Err(err));
        }
        info!(%model, "Initializing sensor");
        self.publish(StatusEvent::Initializing);

        let device = Arc::clone(&self.device);
        let client_key = self.config.client_key.clone();
        let generation = self.generation;
        self.spawn_worker(async move {
            let result = device
                .initialize(model, client_key.as_deref())
                .await
                .map_err(Error::from);
            Command::InitFinished {
                generation,
                guard,
                reply,
                result,
            }
        });
    }

    fn on_init_finished(
        &mut self,
        generation: u64,
        guard: GuardToken,
        reply: Reply<DeviceInfo>,
        result: Result<DeviceInfo>,
    ) {
        drop(guard);
        if generation != self.generation {
            debug!("Initialization finished after the device was lost");
            let _ = reply.send(result.and(Err(Error::DeviceDisconnected)));
            return;
        }

        match result {
            Ok(info) => {
                record(self.session.initialization_succeeded());
                info!(
                    device = %info.name,
                    model = %info.model,
                    serial = info.serial_number.as_deref().unwrap_or("-"),
                    "Sensor initialized"
                );
                self.device_info = Some(info.clone());
                self.connected = true;
                self.publish(StatusEvent::Initialized);
                let _ = reply.send(Ok(info));
            }
            Err(err) => {
                warn!(error = %err, code = ?err.code(), "Sensor initialization failed");
                record(self.session.initialization_failed(err.code()));
                self.publish(StatusEvent::InitFailed {
                    code: err.code(),
                    message: err.to_string(),
                });
                let _ = reply.send(Err(err));
            }
        }
    }

    fn on_uninitialize(&mut self, guard: GuardToken, reply: Reply<()>) {
        if let Some(busy) = self.busy(&[OperationKind::Capture, OperationKind::Init]) {
            return answer(guard, reply, Err(busy));
        }

        let device = Arc::clone(&self.device);
        let generation = self.generation;
        self.spawn_worker(async move {
            let result = device.teardown().await.map_err(Error::from);
            Command::UninitFinished {
                generation,
                guard,
                reply,
                result,
            }
        });
    }

    fn on_uninit_finished(
        &mut self,
        generation: u64,
        guard: GuardToken,
        reply: Reply<()>,
        result: Result<()>,
    ) {
        drop(guard);
        if generation != self.generation {
            let _ = reply.send(result);
            return;
        }

        match result {
            Ok(()) => {
                self.session = new_session(&self.config, SessionPhase::Idle, self.config.mode);
                self.device_info = None;
                self.live_quality = None;
                self.generation += 1;
                info!("Sensor uninitialized");
                self.publish(StatusEvent::Uninitialized);
                let _ = reply.send(Ok(()));
            }
            Err(err) => {
                warn!(error = %err, "Sensor teardown failed");
                self.publish(StatusEvent::UninitFailed {
                    code: err.code(),
                    message: err.to_string(),
                });
                let _ = reply.send(Err(err));
            }
        }
    }

    // Enrollment

    fn on_start_enrollment(&mut self, guard: GuardToken, mode: CaptureMode) -> Result<()> {
        if let Some(busy) = self.busy(&[OperationKind::Init, OperationKind::Uninit]) {
            return Err(busy);
        }
        if self.device_info.is_none() {
            return Err(Error::DeviceNotInitialized);
        }

        let mut session = new_session(&self.config, SessionPhase::Ready, mode);
        let directive = session.start_enrollment()?;
        self.session = session;
        self.failure_message = None;

        self.next_enrollment += 1;
        let id = self.next_enrollment;
        let token = self.shutdown.child_token();
        let (driver_tx, driver_rx) = mpsc::unbounded_channel();
        tokio::spawn(drive(
            Arc::clone(&self.device),
            id,
            mode,
            self.config.capture_params(),
            driver_rx,
            self.commands.clone(),
            token.clone(),
        ));

        self.enrollment = Some(Enrollment {
            id,
            mode,
            _guard: guard,
            token,
            driver: driver_tx,
            awaiting_event: false,
            harvest_pending: false,
        });
        info!(
            enrollment = id,
            ?mode,
            target = self.session.target(),
            "Enrollment started"
        );
        self.advance(directive);
        Ok(())
    }

    async fn on_attempt_finished(&mut self, enrollment: u64, slot: u32, report: AttemptReport) {
        let current = self.session.current_slot();
        match self.enrollment.as_mut() {
            Some(active) if active.id == enrollment && slot == current => {
                active.awaiting_event = false;
                active.harvest_pending = false;
            }
            _ => {
                debug!(enrollment, slot, "Discarding stale attempt result");
                return;
            }
        }

        match report {
            AttemptReport::Captured(sample) => self.persist(slot, sample).await,
            AttemptReport::TemplateUnavailable { code, message } => {
                warn!(slot, code, %message, "Template unavailable, sample discarded");
                self.publish(StatusEvent::SampleDiscarded {
                    slot,
                    reason: message,
                });
                self.apply(AttemptOutcome::Discarded);
            }
            AttemptReport::TimedOut => self.apply(AttemptOutcome::TimedOut),
            AttemptReport::Disconnected => self.handle_disconnect(),
            AttemptReport::Failed { code, message } => {
                warn!(slot, code, %message, "Capture failed");
                self.failure_message = Some(message);
                self.apply(AttemptOutcome::Failed { code });
            }
        }
    }

    async fn persist(&mut self, slot: u32, sample: CapturedSample) {
        let CapturedSample {
            quality,
            template,
            image,
        } = sample;

        let saved = match NewSample::new(slot, template, image, quality.quality, quality.nfiq) {
            Ok(new_sample) => self.store.save(new_sample).await.map_err(Error::from),
            Err(err) => Err(Error::from(err)),
        };

        match saved {
            Ok(record_id) => match self.session.apply(AttemptOutcome::Saved) {
                Ok(directive) => {
                    self.publish(StatusEvent::FingerSaved {
                        slot,
                        record_id,
                        quality: quality.quality,
                        nfiq: quality.nfiq,
                    });
                    self.advance(directive);
                }
                Err(err) => warn!(error = %err, %record_id, "Saved sample outside an enrollment"),
            },
            Err(err) => {
                warn!(slot, error = %err, "Sample not persisted");
                self.publish(StatusEvent::SampleDiscarded {
                    slot,
                    reason: err.to_string(),
                });
                self.apply(AttemptOutcome::Discarded);
            }
        }
    }

    fn apply(&mut self, outcome: AttemptOutcome) {
        match self.session.apply(outcome) {
            Ok(directive) => self.advance(directive),
            Err(err) => warn!(error = %err, ?outcome, "Attempt outcome ignored"),
        }
    }

    fn advance(&mut self, directive: Directive) {
        match directive {
            Directive::Capture { slot } => {
                self.issue(slot);
                self.publish(StatusEvent::CaptureStarted { slot });
            }
            Directive::Retry { slot, attempt } => {
                info!(slot, attempt, "No finger before timeout, retrying");
                self.issue(slot);
                self.publish(StatusEvent::RetryingAfterTimeout { slot, attempt });
            }
            Directive::Finished(phase) => {
                self.end_enrollment();
                let event = match phase {
                    SessionPhase::Failed(reason) => StatusEvent::Failed {
                        code: reason.code(),
                        message: self
                            .failure_message
                            .take()
                            .unwrap_or_else(|| reason.to_string()),
                    },
                    _ if self.session.stop_requested() => StatusEvent::Stopped,
                    _ => StatusEvent::Completed,
                };
                info!(
                    %phase,
                    captured = self.session.captured(),
                    target = self.session.target(),
                    "Enrollment finished"
                );
                self.publish(event);
            }
        }
    }

    fn issue(&mut self, slot: u32) {
        let Some(enrollment) = self.enrollment.as_mut() else {
            return;
        };
        if enrollment.mode == CaptureMode::Manual {
            enrollment.awaiting_event = true;
        }
        debug!(slot, "Dispatching capture");
        enrollment.send(DriverRequest::Capture { slot });
    }

    fn end_enrollment(&mut self) {
        if let Some(enrollment) = self.enrollment.take() {
            enrollment.token.cancel();
        }
    }

    fn cancel_match(&mut self) {
        if let Some(token) = self.match_token.take() {
            debug!("Cancelling match in flight");
            token.cancel();
        }
    }

    // Stop

    fn on_stop(&mut self, guard: GuardToken, reply: Reply<()>) {
        let Some(enrollment) = self.enrollment.as_ref() else {
            debug!("Stop requested with no enrollment running");
            return answer(guard, reply, Ok(()));
        };
        let id = enrollment.id;
        let mode = enrollment.mode;

        if !self.session.request_stop() {
            return answer(guard, reply, Ok(()));
        }
        info!(enrollment = id, ?mode, "Stop requested");
        self.publish(StatusEvent::StopRequested);

        match mode {
            CaptureMode::Manual => {
                if let Some(enrollment) = self.enrollment.as_ref() {
                    enrollment.send(DriverRequest::Cancel { guard, reply });
                }
            }
            CaptureMode::Auto if self.config.hard_cancel_in_auto => {
                let device = Arc::clone(&self.device);
                self.spawn_worker(async move {
                    let result = device.cancel_capture().await.map_err(Error::from);
                    Command::StopFinished {
                        enrollment: id,
                        guard,
                        reply,
                        result,
                    }
                });
            }
            // Cooperative only: the loop stops after the running attempt.
            CaptureMode::Auto => answer(guard, reply, Ok(())),
        }
    }

    fn on_stop_finished(
        &mut self,
        enrollment: u64,
        guard: GuardToken,
        reply: Reply<()>,
        result: Result<()>,
    ) {
        drop(guard);
        let Some(active) = self.enrollment.as_ref().filter(|e| e.id == enrollment) else {
            // The enrollment ended on its own in the meantime.
            let _ = reply.send(Ok(()));
            return;
        };
        let mode = active.mode;
        let harvest_pending = active.harvest_pending;

        match result {
            Ok(()) if mode == CaptureMode::Manual && harvest_pending => {
                debug!("Capture aborted while harvesting, letting the sample finish");
                let _ = reply.send(Ok(()));
            }
            Ok(()) => {
                record(self.session.finish_stopped());
                self.end_enrollment();
                info!(captured = self.session.captured(), "Enrollment stopped");
                self.publish(StatusEvent::Stopped);
                let _ = reply.send(Ok(()));
            }
            Err(err) => {
                warn!(error = %err, "Cancel failed, resuming enrollment");
                record(self.session.withdraw_stop());
                self.publish(StatusEvent::StopFailed {
                    code: err.code(),
                    message: err.to_string(),
                });
                let _ = reply.send(Err(err));
            }
        }
    }

    // Matching

    fn on_match(&mut self, guard: GuardToken, reply: Reply<MatchOutcome>) {
        if let Some(busy) = self.busy(&[OperationKind::Init, OperationKind::Uninit]) {
            return answer(guard, reply, Err(busy));
        }
        if self.device_info.is_none() {
            return answer(guard, reply, Err(Error::DeviceNotInitialized));
        }

        self.publish(StatusEvent::Matching);
        let matcher = Matcher::new(self.config.capture_params(), self.config.match_threshold);
        debug!(threshold = matcher.threshold(), "Matching against store");
        let device = Arc::clone(&self.device);
        let store = Arc::clone(&self.store);
        let generation = self.generation;
        let token = self.shutdown.child_token();
        self.match_token = Some(token.clone());
        self.spawn_worker(async move {
            // Losing the device drops the capture and the scan.
            let result = tokio::select! {
                biased;
                () = token.cancelled() => Err(Error::DeviceDisconnected),
                result = matcher.run(&*device, &*store) => result,
            };
            Command::MatchFinished {
                generation,
                guard,
                reply,
                result,
            }
        });
    }

    fn on_match_finished(
        &mut self,
        generation: u64,
        guard: GuardToken,
        reply: Reply<MatchOutcome>,
        result: Result<MatchOutcome>,
    ) {
        drop(guard);
        if generation != self.generation {
            let _ = reply.send(result);
            return;
        }
        self.match_token = None;

        let disconnected = matches!(&result, Err(err) if err.is_disconnect());
        let event = match &result {
            Ok(MatchOutcome::Matched {
                record_id, score, ..
            }) => StatusEvent::MatchFound {
                record_id: record_id.clone(),
                score: *score,
            },
            Ok(MatchOutcome::NoMatch { checked, .. }) => StatusEvent::NoMatch { checked: *checked },
            Err(err) => StatusEvent::MatchFailed {
                code: err.code(),
                message: err.to_string(),
            },
        };
        self.publish(event);
        if disconnected {
            self.handle_disconnect();
        }
        let _ = reply.send(result);
    }

    // Device lifecycle

    fn on_shutdown(&mut self, reply: Reply<()>) {
        let capture_in_flight =
            self.enrollment.is_some() || self.guards.is_running(OperationKind::Capture);

        self.generation += 1;
        self.end_enrollment();
        self.cancel_match();
        self.guards.clear_all();
        self.session = new_session(&self.config, SessionPhase::Idle, self.config.mode);
        self.device_info = None;
        self.live_quality = None;
        info!(capture_in_flight, "Shutting down session");
        self.publish(StatusEvent::ShutDown);

        let device = Arc::clone(&self.device);
        tokio::spawn(async move {
            if capture_in_flight && let Err(err) = device.cancel_capture().await {
                warn!(error = %err, "Cancel during shutdown failed");
            }
            let result = device.teardown().await.map_err(Error::from);
            let _ = reply.send(result);
        });
    }

    fn on_device_event(&mut self, event: DeviceEvent) {
        match event {
            DeviceEvent::Detected {
                name,
                state: ConnectionState::Connected,
            } => {
                let model = match name.parse::<DeviceModel>() {
                    Ok(model) => Some(model),
                    Err(err) => {
                        warn!(%name, error = %err, "Unsupported sensor detected");
                        None
                    }
                };
                info!(%name, ?model, "Sensor detected");
                self.detected_model = model;
                self.connected = true;
                self.publish(StatusEvent::DeviceDetected { model, name });
            }
            DeviceEvent::Detected {
                name,
                state: ConnectionState::Disconnected,
            } => {
                info!(%name, "Sensor removed");
                self.handle_disconnect();
            }
            DeviceEvent::Preview { result, quality } => match result {
                ResultCode::DeviceDisconnected => self.handle_disconnect(),
                ResultCode::Success => {
                    trace!(quality, "Preview frame");
                    self.live_quality = Some(quality);
                    self.refresh();
                }
                other => trace!(%other, "Preview frame without image"),
            },
            DeviceEvent::CaptureCompleted {
                result,
                quality,
                nfiq,
            } => self.on_capture_completed(result, CaptureQuality::new(quality, nfiq)),
            DeviceEvent::FingerPosition { position, .. } => {
                trace!(position, "Finger position hint");
            }
            other => trace!(?other, "Unhandled device event"),
        }
    }

    fn on_capture_completed(&mut self, result: ResultCode, quality: CaptureQuality) {
        let slot = self.session.current_slot();
        let Some(enrollment) = self
            .enrollment
            .as_mut()
            .filter(|e| e.mode == CaptureMode::Manual && e.awaiting_event)
        else {
            debug!(%result, "Capture completion with no capture pending");
            return;
        };
        enrollment.awaiting_event = false;

        match result {
            ResultCode::Success => {
                debug!(slot, quality = quality.quality, nfiq = quality.nfiq, "Finger accepted");
                enrollment.harvest_pending = true;
                enrollment.send(DriverRequest::Harvest { slot, quality });
            }
            ResultCode::Timeout => self.apply(AttemptOutcome::TimedOut),
            ResultCode::DeviceDisconnected => self.handle_disconnect(),
            ResultCode::Other(code) => {
                let message = HardwareError::from_code(code).to_string();
                warn!(slot, code, %message, "Capture failed");
                self.failure_message = Some(message);
                self.apply(AttemptOutcome::Failed { code });
            }
        }
    }

    /// Drop the device handle and the session. Always wins over whatever is
    /// in flight.
    fn handle_disconnect(&mut self) {
        let had_enrollment = self.enrollment.is_some();
        self.guards.clear_all();
        self.generation += 1;
        self.end_enrollment();
        self.cancel_match();
        if let Some(transition) = self.session.fail(FailureReason::DeviceDisconnected) {
            debug!(%transition, "Session phase changed");
        }
        self.device_info = None;
        self.detected_model = None;
        self.connected = false;
        self.live_quality = None;
        warn!(
            had_enrollment,
            captured = self.session.captured(),
            "Sensor disconnected"
        );
        self.publish(StatusEvent::Disconnected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use biokey_hardware::mock::MockSensor;

    #[tokio::test]
    async fn test_stop_queued_behind_ended_enrollment_is_answered() {
        let (sensor, handle) = MockSensor::new();
        let guards = OperationGuards::new();
        let (requests, driver) = mpsc::unbounded_channel();
        let (commands, mut completions) = mpsc::unbounded_channel();
        let token = CancellationToken::new();

        let (reply, response) = oneshot::channel();
        let guard = guards.try_acquire(OperationKind::Stop).unwrap();
        requests.send(DriverRequest::Cancel { guard, reply }).unwrap();
        // The enrollment finishes before the driver gets to the stop.
        token.cancel();

        drive(
            Arc::new(sensor),
            1,
            CaptureMode::Manual,
            CaptureConfig::default().capture_params(),
            driver,
            commands,
            token,
        )
        .await;

        assert!(matches!(response.await, Ok(Ok(()))));
        assert!(!guards.is_running(OperationKind::Stop));
        assert_eq!(handle.cancel_requests(), 0);
        assert!(completions.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_driver_drops_queued_captures_after_cancellation() {
        let (sensor, handle) = MockSensor::new();
        let (requests, driver) = mpsc::unbounded_channel();
        let (commands, mut completions) = mpsc::unbounded_channel();
        let token = CancellationToken::new();

        requests.send(DriverRequest::Capture { slot: 1 }).unwrap();
        token.cancel();

        drive(
            Arc::new(sensor),
            1,
            CaptureMode::Auto,
            CaptureConfig::default().capture_params(),
            driver,
            commands,
            token,
        )
        .await;

        assert_eq!(handle.capture_requests(), 0);
        assert!(completions.try_recv().is_err());
        assert!(requests.send(DriverRequest::Capture { slot: 2 }).is_err());
    }
}
