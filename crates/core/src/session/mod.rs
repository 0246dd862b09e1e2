//! The mirror session: idle/running state, the periodic capture timer, and the
//! capture → analyze → present cycle.
//!
//! All mutable state sits behind one mutex that is never held across an await.
//! A cycle claims the in-flight flag before it suspends and releases it on every
//! exit path, so at most one analysis request is outstanding per session. A
//! cycle that finishes after the run it started in has ended only releases the
//! flag; its result is dropped.

mod log;
#[cfg(test)]
mod tests;

use crate::analysis::{AnalysisError, AnalysisService, Roast};
use crate::capture::{
    Camera, CaptureError, FrameEncoding, FrameRenderer, MediaAccessError, MediaStream,
    StreamConstraints,
};
use crate::config::{AppConfig, CycleInterval};
use crate::emotion::{glyph_for, Emotion};
use crate::metrics::Scoreboard;
use crate::present::{Presentation, PresentationSink, StatusMessage};
use crate::share::{SharePayload, ShareTarget};
use crate::speech::{SpeechOutput, SpeechParams, Utterance};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use url::Url;

pub use log::{RoastLog, RoastLogEntry, ROAST_LOG_CAPACITY};

const LOG_TARGET: &str = "session";

#[derive(Clone, Debug, PartialEq)]
pub struct SessionSettings {
    pub interval: CycleInterval,
    pub constraints: StreamConstraints,
    pub encoding: FrameEncoding,
    pub speech: SpeechParams,
    pub page_url: Option<Url>,
}

impl SessionSettings {
    pub fn from_app(app: &AppConfig) -> Self {
        Self {
            interval: app.interval,
            constraints: app.constraints,
            encoding: app.encoding,
            speech: app.speech,
            page_url: app.page_url.clone(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            interval: CycleInterval::default(),
            constraints: StreamConstraints::default(),
            encoding: FrameEncoding::default(),
            speech: SpeechParams::default(),
            page_url: None,
        }
    }
}

/// The platform pieces a session drives. None of them read session state.
#[derive(Clone)]
pub struct Collaborators {
    pub camera: Arc<dyn Camera>,
    pub renderer: Arc<dyn FrameRenderer>,
    pub analysis: Arc<dyn AnalysisService>,
    pub speech: Arc<dyn SpeechOutput>,
    pub sink: Arc<dyn PresentationSink>,
    pub share: Option<Arc<dyn ShareTarget>>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trigger {
    Timer,
    Manual,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    Presented { roast_count: u64 },
    ServiceError,
    TransportError,
    /// Another cycle was still waiting on the service.
    Absorbed,
    NotRunning,
    /// The session stopped while the request was outstanding.
    Discarded,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShareOutcome {
    Shared,
    ShareFailed,
    Prompted,
    NothingToShare,
}

#[derive(thiserror::Error, Debug)]
pub enum CycleError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: RunState,
    pub scoreboard: Scoreboard,
    pub karma_mode: bool,
    pub last_expression: String,
    /// Newest first.
    pub log: Vec<String>,
    pub display: String,
    pub cycle_in_flight: bool,
    pub active_timers: usize,
}

enum Phase {
    Idle,
    Starting { attempt: u64 },
    Running(Running),
}

struct Running {
    attempt: u64,
    stream: Arc<dyn MediaStream>,
    timer: JoinHandle<()>,
}

impl Drop for Running {
    fn drop(&mut self) {
        self.timer.abort();
        self.stream.stop_all_tracks();
    }
}

struct Screen {
    text: String,
    shareable: bool,
}

impl Screen {
    fn status(status: StatusMessage) -> Self {
        Self {
            text: status.text().to_owned(),
            shareable: !status.is_placeholder(),
        }
    }

    fn roast(text: &str) -> Self {
        Self {
            text: text.to_owned(),
            shareable: !text.is_empty(),
        }
    }
}

struct Inner {
    phase: Phase,
    attempts: u64,
    in_flight: bool,
    roast_count: u64,
    karma_mode: bool,
    last_expression: String,
    log: RoastLog,
    screen: Screen,
}

impl Inner {
    fn new() -> Self {
        Self {
            phase: Phase::Idle,
            attempts: 0,
            in_flight: false,
            roast_count: 0,
            karma_mode: false,
            last_expression: Emotion::Neutral.label().to_owned(),
            log: RoastLog::new(),
            screen: Screen::status(StatusMessage::Loading),
        }
    }

    fn show(&mut self, status: StatusMessage, updates: &mut Vec<Presentation>) {
        self.screen = Screen::status(status);
        updates.push(Presentation::Status(status));
    }

    fn running_attempt(&self) -> Option<u64> {
        match &self.phase {
            Phase::Running(running) => Some(running.attempt),
            _ => None,
        }
    }

    fn active_timers(&self) -> usize {
        match &self.phase {
            Phase::Running(running) if !running.timer.is_finished() => 1,
            _ => 0,
        }
    }
}

struct Shared {
    settings: SessionSettings,
    deps: Collaborators,
    inner: Mutex<Inner>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn present_all(&self, updates: Vec<Presentation>) {
        for update in updates {
            self.deps.sink.present(update);
        }
    }
}

/// Clears the in-flight flag however the cycle ends.
struct InFlight<'a> {
    shared: &'a Shared,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.shared.lock().in_flight = false;
    }
}

/// Returns a start that never finished back to idle, e.g. when the caller
/// dropped the `start()` future while the camera was opening.
struct PendingStart<'a> {
    shared: &'a Shared,
    attempt: u64,
}

impl Drop for PendingStart<'_> {
    fn drop(&mut self) {
        let mut inner = self.shared.lock();
        if matches!(inner.phase, Phase::Starting { attempt } if attempt == self.attempt) {
            inner.phase = Phase::Idle;
            tracing::debug!(target: LOG_TARGET, attempt = self.attempt, "abandoned start reset to idle");
        }
    }
}

/// Cheap to clone; clones drive the same session.
#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
}

impl Session {
    pub fn new(settings: SessionSettings, deps: Collaborators) -> Self {
        Self {
            shared: Arc::new(Shared {
                settings,
                deps,
                inner: Mutex::new(Inner::new()),
            }),
        }
    }

    /// Opens the camera and arms the cycle timer. A no-op unless idle.
    pub async fn start(&self) -> Result<(), MediaAccessError> {
        let attempt = {
            let mut inner = self.shared.lock();
            if !matches!(inner.phase, Phase::Idle) {
                tracing::debug!(target: LOG_TARGET, "start ignored, session not idle");
                return Ok(());
            }
            inner.attempts += 1;
            let attempt = inner.attempts;
            inner.phase = Phase::Starting { attempt };
            attempt
        };
        let _pending = PendingStart {
            shared: &self.shared,
            attempt,
        };

        let opened = self
            .shared
            .deps
            .camera
            .open(self.shared.settings.constraints)
            .await;

        let mut updates = Vec::new();
        let result = {
            let mut inner = self.shared.lock();
            let wanted = matches!(inner.phase, Phase::Starting { attempt: a } if a == attempt);
            match opened {
                Ok(stream) if wanted => {
                    let period = self.shared.settings.interval.duration();
                    let timer = arm_timer(Arc::downgrade(&self.shared), period);
                    inner.phase = Phase::Running(Running {
                        attempt,
                        stream,
                        timer,
                    });
                    inner.show(StatusMessage::Analyzing, &mut updates);
                    updates.push(Presentation::RunningChanged(true));
                    tracing::info!(
                        target: LOG_TARGET,
                        attempt,
                        interval_ms = self.shared.settings.interval.period_ms,
                        "mirror started"
                    );
                    Ok(())
                }
                Ok(stream) => {
                    // Stopped while the camera was opening.
                    stream.stop_all_tracks();
                    tracing::debug!(target: LOG_TARGET, attempt, "late camera stream released");
                    Ok(())
                }
                Err(err) if wanted => {
                    inner.phase = Phase::Idle;
                    inner.show(StatusMessage::CameraDenied, &mut updates);
                    tracing::warn!(target: LOG_TARGET, error = %err, "camera access failed");
                    Err(err)
                }
                Err(err) => {
                    tracing::debug!(target: LOG_TARGET, error = %err, "camera failed after start was cancelled");
                    Err(err)
                }
            }
        };
        self.shared.present_all(updates);
        result
    }

    /// Stops every track, disarms the timer and returns to idle. Idempotent.
    pub fn stop(&self) {
        let mut updates = Vec::new();
        let released = {
            let mut inner = self.shared.lock();
            let previous = std::mem::replace(&mut inner.phase, Phase::Idle);
            match previous {
                Phase::Idle => None,
                previous => {
                    inner.show(StatusMessage::Stopped, &mut updates);
                    // A cancelled start never announced running.
                    if matches!(previous, Phase::Running(_)) {
                        updates.push(Presentation::RunningChanged(false));
                    }
                    Some(previous)
                }
            }
        };

        match released {
            // Dropping the running phase aborts its timer and stops its tracks.
            Some(previous) => {
                drop(previous);
                tracing::info!(target: LOG_TARGET, "mirror stopped");
            }
            None => tracing::debug!(target: LOG_TARGET, "stop ignored, session idle"),
        }
        self.shared.present_all(updates);
    }

    /// Starts when idle, stops otherwise. Returns the resulting state.
    pub async fn toggle(&self) -> Result<RunState, MediaAccessError> {
        let idle = matches!(self.shared.lock().phase, Phase::Idle);
        if idle {
            self.start().await?;
        } else {
            self.stop();
        }
        Ok(self.state())
    }

    /// Only the status text reflects the mode; cycles behave the same either way.
    pub fn toggle_karma_mode(&self) -> bool {
        let mut updates = Vec::new();
        let enabled = {
            let mut inner = self.shared.lock();
            inner.karma_mode = !inner.karma_mode;
            let enabled = inner.karma_mode;
            let status = if enabled {
                StatusMessage::KarmaEnabled
            } else {
                StatusMessage::KarmaDisabled
            };
            inner.show(status, &mut updates);
            updates.push(Presentation::KarmaModeChanged(enabled));
            enabled
        };
        tracing::debug!(target: LOG_TARGET, enabled, "karma mode toggled");
        self.shared.present_all(updates);
        enabled
    }

    /// Runs one cycle now, outside the timer.
    pub async fn force_cycle(&self) -> CycleOutcome {
        self.run_cycle(Trigger::Manual).await
    }

    async fn run_cycle(&self, trigger: Trigger) -> CycleOutcome {
        let mut updates = Vec::new();
        let claim = {
            let mut inner = self.shared.lock();
            let running = match &inner.phase {
                Phase::Running(running) => Some((running.attempt, Arc::clone(&running.stream))),
                _ => None,
            };
            match running {
                None => {
                    if trigger == Trigger::Manual {
                        inner.show(StatusMessage::StartFirst, &mut updates);
                    }
                    Err(CycleOutcome::NotRunning)
                }
                Some(_) if inner.in_flight => Err(CycleOutcome::Absorbed),
                Some(claimed) => {
                    inner.in_flight = true;
                    Ok(claimed)
                }
            }
        };

        let (attempt, stream) = match claim {
            Ok(claimed) => claimed,
            Err(outcome) => {
                if outcome == CycleOutcome::Absorbed {
                    tracing::debug!(target: LOG_TARGET, ?trigger, "analysis still in flight, cycle skipped");
                }
                self.shared.present_all(updates);
                return outcome;
            }
        };

        let _in_flight = InFlight {
            shared: &self.shared,
        };
        tracing::debug!(target: LOG_TARGET, ?trigger, attempt, "cycle started");
        let result = self.capture_and_analyze(stream).await;
        self.complete(attempt, result)
    }

    async fn capture_and_analyze(&self, stream: Arc<dyn MediaStream>) -> Result<Roast, CycleError> {
        let frame = stream.current_frame()?;
        drop(stream);
        let encoded = self
            .shared
            .deps
            .renderer
            .render(frame, self.shared.settings.encoding)
            .await?;
        let roast = self.shared.deps.analysis.analyze(encoded).await?;
        Ok(roast)
    }

    fn complete(&self, attempt: u64, result: Result<Roast, CycleError>) -> CycleOutcome {
        let mut updates = Vec::new();
        let mut utterance = None;
        let outcome = {
            let mut inner = self.shared.lock();
            if inner.running_attempt() != Some(attempt) {
                tracing::debug!(
                    target: LOG_TARGET,
                    attempt,
                    succeeded = result.is_ok(),
                    "session stopped mid-cycle, result dropped"
                );
                return CycleOutcome::Discarded;
            }

            match result {
                Ok(roast) => {
                    if let Some(emotion) = roast.emotion {
                        inner.last_expression = emotion;
                    }
                    let label = inner.last_expression.clone();
                    inner.screen = Screen::roast(&roast.text);
                    updates.push(Presentation::Roast(roast.text.clone()));
                    updates.push(Presentation::Expression {
                        glyph: glyph_for(&label).to_owned(),
                        label: label.clone(),
                    });
                    utterance = Some(Utterance {
                        text: roast.text.clone(),
                        params: self.shared.settings.speech,
                    });

                    inner.roast_count += 1;
                    let sequence = inner.roast_count;
                    inner.log.record(RoastLogEntry {
                        sequence,
                        text: roast.text,
                        expression: label.clone(),
                        recorded_at: SystemTime::now(),
                    });
                    updates.push(Presentation::Log(inner.log.texts()));
                    updates.push(Presentation::Scores(Scoreboard::from_count(sequence)));

                    tracing::info!(target: LOG_TARGET, roast_count = sequence, expression = %label, "roast presented");
                    CycleOutcome::Presented {
                        roast_count: sequence,
                    }
                }
                Err(CycleError::Analysis(err)) if !err.is_transport() => {
                    tracing::warn!(target: LOG_TARGET, reason = %err, "analysis service rejected the frame");
                    inner.show(StatusMessage::ServiceMalfunction, &mut updates);
                    CycleOutcome::ServiceError
                }
                Err(err) => {
                    tracing::warn!(target: LOG_TARGET, error = %err, "cycle failed");
                    inner.show(StatusMessage::NetworkFailure, &mut updates);
                    CycleOutcome::TransportError
                }
            }
        };

        self.shared.present_all(updates);
        if let Some(utterance) = utterance {
            self.shared.deps.speech.speak(utterance);
        }
        outcome
    }

    /// Hands the text on screen to the share target, or prompts with it.
    pub async fn share(&self) -> ShareOutcome {
        let mut updates = Vec::new();
        let roast = {
            let mut inner = self.shared.lock();
            if inner.screen.shareable {
                Some(inner.screen.text.clone())
            } else {
                inner.show(StatusMessage::RoastFirst, &mut updates);
                None
            }
        };
        self.shared.present_all(updates);

        let Some(roast) = roast else {
            return ShareOutcome::NothingToShare;
        };
        let page_url = self.shared.settings.page_url.clone();

        match &self.shared.deps.share {
            Some(target) if target.is_available() => {
                match target.share(SharePayload::for_roast(&roast, page_url)).await {
                    Ok(()) => ShareOutcome::Shared,
                    Err(e) => {
                        tracing::warn!(target: LOG_TARGET, error = %e, "share failed");
                        ShareOutcome::ShareFailed
                    }
                }
            }
            _ => {
                let prompt = SharePayload::prompt(&roast, page_url.as_ref());
                self.shared.present_all(vec![Presentation::Prompt(prompt)]);
                ShareOutcome::Prompted
            }
        }
    }

    pub fn state(&self) -> RunState {
        match self.shared.lock().phase {
            Phase::Running(_) => RunState::Running,
            Phase::Idle | Phase::Starting { .. } => RunState::Idle,
        }
    }

    pub fn roast_count(&self) -> u64 {
        self.shared.lock().roast_count
    }

    pub fn active_timers(&self) -> usize {
        self.shared.lock().active_timers()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = self.shared.lock();
        SessionSnapshot {
            state: match inner.phase {
                Phase::Running(_) => RunState::Running,
                _ => RunState::Idle,
            },
            scoreboard: Scoreboard::from_count(inner.roast_count),
            karma_mode: inner.karma_mode,
            last_expression: inner.last_expression.clone(),
            log: inner.log.texts(),
            display: inner.screen.text.clone(),
            cycle_in_flight: inner.in_flight,
            active_timers: inner.active_timers(),
        }
    }
}

/// First tick one full period after arming. Each tick spawns its own cycle so
/// aborting the timer never cancels a request already sent.
fn arm_timer(shared: Weak<Shared>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticks = tokio::time::interval_at(Instant::now() + period, period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticks.tick().await;
            let Some(shared) = shared.upgrade() else {
                break;
            };
            let session = Session { shared };
            tokio::spawn(async move {
                session.run_cycle(Trigger::Timer).await;
            });
        }
    })
}
