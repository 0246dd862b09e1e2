use super::*;
use crate::capture::{EncodedFrame, ImageFormat, VideoFrame, VideoTrack};
use crate::emotion::UNCERTAIN_GLYPH;
use crate::share::ShareError;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Semaphore;

struct StubStream {
    tracks: Vec<VideoTrack>,
}

impl MediaStream for StubStream {
    fn tracks(&self) -> &[VideoTrack] {
        &self.tracks
    }

    fn current_frame(&self) -> Result<VideoFrame, CaptureError> {
        if !self.is_live() {
            return Err(CaptureError::StreamEnded);
        }
        Ok(VideoFrame::new(2, 2))
    }
}

#[derive(Default)]
struct StubCamera {
    deny: bool,
    /// When set, each open waits for a permit.
    gate: Option<Arc<Semaphore>>,
    requests: AtomicUsize,
    opened: Mutex<Vec<Arc<StubStream>>>,
}

impl StubCamera {
    fn denying() -> Self {
        Self {
            deny: true,
            ..Self::default()
        }
    }

    fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    fn streams(&self) -> Vec<Arc<StubStream>> {
        self.opened.lock().expect("lock").clone()
    }
}

impl Camera for StubCamera {
    fn open(
        &self,
        _constraints: StreamConstraints,
    ) -> BoxFuture<'_, Result<Arc<dyn MediaStream>, MediaAccessError>> {
        async move {
            self.requests.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.acquire().await.expect("gate open").forget();
            }
            if self.deny {
                return Err(MediaAccessError::PermissionDenied("user said no".into()));
            }
            let stream = Arc::new(StubStream {
                tracks: vec![VideoTrack::new("video"), VideoTrack::new("depth")],
            });
            self.opened.lock().expect("lock").push(Arc::clone(&stream));
            let stream: Arc<dyn MediaStream> = stream;
            Ok(stream)
        }
        .boxed()
    }
}

struct StubRenderer;

impl FrameRenderer for StubRenderer {
    fn render(
        &self,
        frame: VideoFrame,
        encoding: FrameEncoding,
    ) -> BoxFuture<'_, Result<EncodedFrame, CaptureError>> {
        async move {
            Ok(EncodedFrame {
                bytes: Bytes::from_static(b"jpeg"),
                format: encoding.format,
                width: frame.width(),
                height: frame.height(),
            })
        }
        .boxed()
    }
}

/// Answers from a script, then with numbered roasts. With a gate, every request
/// waits for a permit first.
#[derive(Default)]
struct ScriptedAnalysis {
    script: Mutex<VecDeque<Result<Roast, AnalysisError>>>,
    gate: Option<Arc<Semaphore>>,
    calls: AtomicUsize,
    outstanding: AtomicUsize,
    max_outstanding: AtomicUsize,
}

impl ScriptedAnalysis {
    fn scripted(replies: Vec<Result<Roast, AnalysisError>>) -> Self {
        Self {
            script: Mutex::new(replies.into()),
            ..Self::default()
        }
    }

    fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl AnalysisService for ScriptedAnalysis {
    fn analyze(&self, _frame: EncodedFrame) -> BoxFuture<'_, Result<Roast, AnalysisError>> {
        async move {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let now = self.outstanding.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_outstanding.fetch_max(now, Ordering::SeqCst);

            if let Some(gate) = &self.gate {
                gate.acquire().await.expect("gate open").forget();
            }

            self.outstanding.fetch_sub(1, Ordering::SeqCst);
            let scripted = self.script.lock().expect("lock").pop_front();
            scripted.unwrap_or_else(|| Ok(roast(&format!("roast {call}"), Some("neutral"))))
        }
        .boxed()
    }
}

#[derive(Default)]
struct RecordingSpeech {
    spoken: Mutex<Vec<Utterance>>,
}

impl SpeechOutput for RecordingSpeech {
    fn speak(&self, utterance: Utterance) {
        self.spoken.lock().expect("lock").push(utterance);
    }
}

#[derive(Default)]
struct RecordingSink {
    updates: Mutex<Vec<Presentation>>,
}

impl RecordingSink {
    fn all(&self) -> Vec<Presentation> {
        self.updates.lock().expect("lock").clone()
    }

    fn last_status(&self) -> Option<StatusMessage> {
        self.all().into_iter().rev().find_map(|u| match u {
            Presentation::Status(status) => Some(status),
            _ => None,
        })
    }
}

impl PresentationSink for RecordingSink {
    fn present(&self, update: Presentation) {
        self.updates.lock().expect("lock").push(update);
    }
}

#[derive(Default)]
struct RecordingShare {
    shared: Mutex<Vec<SharePayload>>,
}

impl ShareTarget for RecordingShare {
    fn is_available(&self) -> bool {
        true
    }

    fn share(&self, payload: SharePayload) -> BoxFuture<'_, Result<(), ShareError>> {
        async move {
            self.shared.lock().expect("lock").push(payload);
            Ok(())
        }
        .boxed()
    }
}

fn roast(text: &str, emotion: Option<&str>) -> Roast {
    Roast {
        text: text.to_owned(),
        emotion: emotion.map(str::to_owned),
    }
}

struct Harness {
    session: Session,
    camera: Arc<StubCamera>,
    analysis: Arc<ScriptedAnalysis>,
    speech: Arc<RecordingSpeech>,
    sink: Arc<RecordingSink>,
}

impl Harness {
    fn new(camera: StubCamera, analysis: ScriptedAnalysis, interval_ms: u64) -> Self {
        Self::with_share(camera, analysis, interval_ms, None)
    }

    fn with_share(
        camera: StubCamera,
        analysis: ScriptedAnalysis,
        interval_ms: u64,
        share: Option<Arc<dyn ShareTarget>>,
    ) -> Self {
        let camera = Arc::new(camera);
        let analysis = Arc::new(analysis);
        let speech = Arc::new(RecordingSpeech::default());
        let sink = Arc::new(RecordingSink::default());
        let settings = SessionSettings {
            interval: CycleInterval::new(interval_ms).expect("nonzero"),
            page_url: Some(Url::parse("https://mirror.example/").expect("url")),
            ..SessionSettings::default()
        };
        let session = Session::new(
            settings,
            Collaborators {
                camera: camera.clone(),
                renderer: Arc::new(StubRenderer),
                analysis: analysis.clone(),
                speech: speech.clone(),
                sink: sink.clone(),
                share,
            },
        );
        Self {
            session,
            camera,
            analysis,
            speech,
            sink,
        }
    }

    /// Manual-trigger harness whose timer never fires during a test.
    fn manual(analysis: ScriptedAnalysis) -> Self {
        Self::new(StubCamera::default(), analysis, 3_600_000)
    }
}

async fn wait_for_camera_requests(camera: &StubCamera, requests: usize) {
    for _ in 0..1000 {
        if camera.requests() >= requests {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("camera never saw {requests} open requests");
}

async fn wait_for_calls(analysis: &ScriptedAnalysis, calls: usize) {
    for _ in 0..1000 {
        if analysis.calls() >= calls {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("analysis never reached {calls} calls");
}

#[tokio::test]
async fn three_successes_fill_log_newest_first() {
    let h = Harness::manual(ScriptedAnalysis::scripted(vec![
        Ok(roast("A", Some("happy"))),
        Ok(roast("B", Some("sad"))),
        Ok(roast("C", Some("angry"))),
    ]));
    h.session.start().await.expect("camera");

    for expected in 1..=3 {
        assert_eq!(
            h.session.force_cycle().await,
            CycleOutcome::Presented {
                roast_count: expected
            }
        );
    }

    let snap = h.session.snapshot();
    assert_eq!(snap.log, vec!["C", "B", "A"]);
    assert_eq!(snap.scoreboard.roast_count, 3);
    assert_eq!(snap.scoreboard.karma_percent, 30);
    assert_eq!(snap.scoreboard.cringe_score, 10);
    assert_eq!(snap.display, "C");
    assert_eq!(snap.last_expression, "angry");
    assert!(!snap.cycle_in_flight);

    let updates = h.sink.all();
    assert!(updates.contains(&Presentation::Expression {
        label: "angry".into(),
        glyph: "😠".into(),
    }));
    assert_eq!(
        updates.last(),
        Some(&Presentation::Scores(Scoreboard::from_count(3)))
    );
}

#[tokio::test]
async fn eleventh_success_evicts_first_log_entry() {
    let h = Harness::manual(ScriptedAnalysis::default());
    h.session.start().await.expect("camera");
    for _ in 0..11 {
        h.session.force_cycle().await;
    }

    let snap = h.session.snapshot();
    assert_eq!(snap.log.len(), ROAST_LOG_CAPACITY);
    assert_eq!(snap.log.first().map(String::as_str), Some("roast 11"));
    assert!(!snap.log.contains(&"roast 1".to_owned()));
    assert_eq!(snap.scoreboard.karma_percent, 100);
    assert_eq!(snap.scoreboard.cringe_score, 38);
}

#[tokio::test]
async fn failures_leave_counters_and_log_alone() {
    let h = Harness::manual(ScriptedAnalysis::scripted(vec![
        Ok(roast("first", None)),
        Err(AnalysisError::Service { message: None }),
        Err(AnalysisError::Malformed("not json".into())),
    ]));
    h.session.start().await.expect("camera");

    assert!(matches!(h.session.force_cycle().await, CycleOutcome::Presented { .. }));

    assert_eq!(h.session.force_cycle().await, CycleOutcome::ServiceError);
    assert_eq!(h.sink.last_status(), Some(StatusMessage::ServiceMalfunction));

    assert_eq!(h.session.force_cycle().await, CycleOutcome::TransportError);
    assert_eq!(h.sink.last_status(), Some(StatusMessage::NetworkFailure));

    let snap = h.session.snapshot();
    assert_eq!(snap.scoreboard.roast_count, 1);
    assert_eq!(snap.log, vec!["first"]);
    assert_eq!(snap.state, RunState::Running);
    assert!(!snap.cycle_in_flight);
    assert_eq!(h.speech.spoken.lock().expect("lock").len(), 1);
}

#[tokio::test]
async fn capture_failure_is_absorbed_like_transport() {
    let h = Harness::manual(ScriptedAnalysis::default());
    h.session.start().await.expect("camera");
    for stream in h.camera.streams() {
        stream.stop_all_tracks();
    }

    assert_eq!(h.session.force_cycle().await, CycleOutcome::TransportError);
    assert_eq!(h.analysis.calls(), 0);
    assert_eq!(h.session.roast_count(), 0);
}

#[tokio::test]
async fn force_while_idle_prompts_without_request() {
    let h = Harness::manual(ScriptedAnalysis::default());
    assert_eq!(h.session.force_cycle().await, CycleOutcome::NotRunning);
    assert_eq!(h.analysis.calls(), 0);
    assert_eq!(h.sink.last_status(), Some(StatusMessage::StartFirst));
    assert_eq!(h.session.snapshot().display, "Start the mirror first!");
}

#[tokio::test]
async fn second_start_is_a_no_op() {
    let h = Harness::manual(ScriptedAnalysis::default());
    h.session.start().await.expect("camera");
    h.session.start().await.expect("no-op");

    assert_eq!(h.camera.streams().len(), 1);
    assert_eq!(h.session.active_timers(), 1);
    assert_eq!(h.session.state(), RunState::Running);
    assert_eq!(h.sink.last_status(), Some(StatusMessage::Analyzing));
}

#[tokio::test]
async fn stop_releases_every_track_and_the_timer() {
    let h = Harness::manual(ScriptedAnalysis::default());
    h.session.start().await.expect("camera");
    let first = h.camera.streams().remove(0);
    assert!(first.is_live());

    h.session.stop();
    assert!(first.tracks().iter().all(|t| !t.is_live()));
    assert_eq!(h.session.active_timers(), 0);
    assert_eq!(h.session.state(), RunState::Idle);
    assert_eq!(h.sink.last_status(), Some(StatusMessage::Stopped));

    let updates_before = h.sink.all().len();
    h.session.stop();
    assert_eq!(h.sink.all().len(), updates_before);

    h.session.start().await.expect("camera again");
    let streams = h.camera.streams();
    assert_eq!(streams.len(), 2);
    assert!(!streams[0].is_live());
    assert!(streams[1].is_live());
    assert_eq!(h.session.active_timers(), 1);
}

#[tokio::test(start_paused = true)]
async fn camera_denial_stays_idle_without_timer() {
    let h = Harness::new(StubCamera::denying(), ScriptedAnalysis::default(), 5000);
    let err = h.session.start().await.unwrap_err();
    assert!(matches!(err, MediaAccessError::PermissionDenied(_)));
    assert_eq!(h.session.state(), RunState::Idle);
    assert_eq!(h.session.active_timers(), 0);
    assert_eq!(h.sink.last_status(), Some(StatusMessage::CameraDenied));

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.analysis.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn timer_fires_once_per_interval() {
    let h = Harness::new(StubCamera::default(), ScriptedAnalysis::default(), 5000);
    h.session.start().await.expect("camera");

    tokio::time::sleep(Duration::from_millis(4900)).await;
    assert_eq!(h.analysis.calls(), 0);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.analysis.calls(), 1);
    assert_eq!(h.session.roast_count(), 1);

    tokio::time::sleep(Duration::from_millis(10_000)).await;
    assert_eq!(h.analysis.calls(), 3);

    h.session.stop();
    tokio::time::sleep(Duration::from_millis(20_000)).await;
    assert_eq!(h.analysis.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn tick_during_outstanding_request_is_absorbed() {
    let gate = Arc::new(Semaphore::new(0));
    let h = Harness::new(StubCamera::default(), ScriptedAnalysis::gated(gate.clone()), 5000);
    h.session.start().await.expect("camera");

    tokio::time::sleep(Duration::from_millis(5100)).await;
    assert_eq!(h.analysis.calls(), 1);
    assert!(h.session.snapshot().cycle_in_flight);

    tokio::time::sleep(Duration::from_millis(10_000)).await;
    assert_eq!(h.analysis.calls(), 1);
    assert_eq!(
        h.session.force_cycle().await,
        CycleOutcome::Absorbed
    );

    gate.add_permits(1);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.session.roast_count(), 1);
    assert!(!h.session.snapshot().cycle_in_flight);

    gate.add_permits(1);
    tokio::time::sleep(Duration::from_millis(5000)).await;
    assert_eq!(h.analysis.calls(), 2);
    assert_eq!(h.analysis.max_outstanding.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn result_arriving_after_stop_is_dropped() {
    let gate = Arc::new(Semaphore::new(0));
    let h = Harness::new(StubCamera::default(), ScriptedAnalysis::gated(gate.clone()), 3_600_000);
    h.session.start().await.expect("camera");

    let pending = {
        let session = h.session.clone();
        tokio::spawn(async move { session.force_cycle().await })
    };
    wait_for_calls(&h.analysis, 1).await;

    h.session.stop();
    gate.add_permits(1);
    assert_eq!(pending.await.expect("cycle task"), CycleOutcome::Discarded);

    let snap = h.session.snapshot();
    assert_eq!(snap.scoreboard.roast_count, 0);
    assert!(snap.log.is_empty());
    assert_eq!(snap.display, StatusMessage::Stopped.text());
    assert!(!snap.cycle_in_flight);
    assert!(h.speech.spoken.lock().expect("lock").is_empty());
}

#[tokio::test]
async fn result_from_previous_run_is_dropped_after_restart() {
    let gate = Arc::new(Semaphore::new(0));
    let h = Harness::new(StubCamera::default(), ScriptedAnalysis::gated(gate.clone()), 3_600_000);
    h.session.start().await.expect("camera");

    let pending = {
        let session = h.session.clone();
        tokio::spawn(async move { session.force_cycle().await })
    };
    wait_for_calls(&h.analysis, 1).await;

    h.session.stop();
    h.session.start().await.expect("camera again");
    assert_eq!(h.session.force_cycle().await, CycleOutcome::Absorbed);

    gate.add_permits(1);
    assert_eq!(pending.await.expect("cycle task"), CycleOutcome::Discarded);
    assert_eq!(h.session.roast_count(), 0);

    gate.add_permits(1);
    assert_eq!(
        h.session.force_cycle().await,
        CycleOutcome::Presented { roast_count: 1 }
    );
}

#[tokio::test]
async fn expression_is_kept_when_response_has_none() {
    let h = Harness::manual(ScriptedAnalysis::scripted(vec![
        Ok(roast("first", Some("angry"))),
        Ok(roast("second", None)),
        Ok(roast("third", Some("ecstatic"))),
    ]));
    h.session.start().await.expect("camera");

    h.session.force_cycle().await;
    h.session.force_cycle().await;
    assert_eq!(h.session.snapshot().last_expression, "angry");
    let expressions: Vec<Presentation> = h
        .sink
        .all()
        .into_iter()
        .filter(|u| matches!(u, Presentation::Expression { .. }))
        .collect();
    assert_eq!(expressions.len(), 2);
    assert!(expressions.iter().all(|u| u
        == &Presentation::Expression {
            label: "angry".into(),
            glyph: "😠".into(),
        }));

    h.session.force_cycle().await;
    assert!(h.sink.all().contains(&Presentation::Expression {
        label: "ecstatic".into(),
        glyph: UNCERTAIN_GLYPH.into(),
    }));
}

#[tokio::test]
async fn roast_is_spoken_with_fixed_voice() {
    let h = Harness::manual(ScriptedAnalysis::scripted(vec![Ok(roast(
        "Whoa, who stole your coffee?",
        Some("angry"),
    ))]));
    h.session.start().await.expect("camera");
    h.session.force_cycle().await;

    let spoken = h.speech.spoken.lock().expect("lock").clone();
    assert_eq!(spoken.len(), 1);
    assert_eq!(spoken[0].text, "Whoa, who stole your coffee?");
    assert_eq!(spoken[0].params, SpeechParams::default());
}

#[tokio::test]
async fn karma_mode_only_changes_status() {
    let h = Harness::manual(ScriptedAnalysis::default());
    assert!(h.session.toggle_karma_mode());
    assert_eq!(h.sink.last_status(), Some(StatusMessage::KarmaEnabled));
    assert!(h.sink.all().contains(&Presentation::KarmaModeChanged(true)));
    assert_eq!(h.session.state(), RunState::Idle);

    h.session.start().await.expect("camera");
    assert!(matches!(h.session.force_cycle().await, CycleOutcome::Presented { .. }));
    assert!(h.session.snapshot().karma_mode);

    assert!(!h.session.toggle_karma_mode());
    assert_eq!(h.sink.last_status(), Some(StatusMessage::KarmaDisabled));
    assert_eq!(h.session.roast_count(), 1);
}

#[tokio::test]
async fn toggle_alternates_between_states() {
    let h = Harness::manual(ScriptedAnalysis::default());
    assert_eq!(h.session.toggle().await.expect("camera"), RunState::Running);
    assert_eq!(h.session.toggle().await.expect("stop"), RunState::Idle);
    assert_eq!(
        h.sink
            .all()
            .into_iter()
            .filter(|u| matches!(u, Presentation::RunningChanged(_)))
            .collect::<Vec<_>>(),
        vec![
            Presentation::RunningChanged(true),
            Presentation::RunningChanged(false)
        ]
    );
}

#[tokio::test]
async fn share_requires_a_roast_on_screen() {
    let h = Harness::manual(ScriptedAnalysis::default());
    assert_eq!(h.session.share().await, ShareOutcome::NothingToShare);
    assert_eq!(h.sink.last_status(), Some(StatusMessage::RoastFirst));

    h.session.start().await.expect("camera");
    assert_eq!(h.session.share().await, ShareOutcome::NothingToShare);
}

#[tokio::test]
async fn share_falls_back_to_prompt() {
    let h = Harness::manual(ScriptedAnalysis::scripted(vec![Ok(roast(
        "Resting mirror face, I see.",
        Some("neutral"),
    ))]));
    h.session.start().await.expect("camera");
    h.session.force_cycle().await;

    assert_eq!(h.session.share().await, ShareOutcome::Prompted);
    assert_eq!(
        h.sink.all().last(),
        Some(&Presentation::Prompt(
            "Share this roast:\n\n\"Resting mirror face, I see.\"\n\nhttps://mirror.example/".into()
        ))
    );
}

#[tokio::test]
async fn share_uses_target_when_available() {
    let target = Arc::new(RecordingShare::default());
    let h = Harness::with_share(
        StubCamera::default(),
        ScriptedAnalysis::scripted(vec![Ok(roast("Surprise! You still look like that.", None))]),
        3_600_000,
        Some(target.clone()),
    );
    h.session.start().await.expect("camera");
    h.session.force_cycle().await;

    assert_eq!(h.session.share().await, ShareOutcome::Shared);
    let shared = target.shared.lock().expect("lock").clone();
    assert_eq!(
        shared,
        vec![SharePayload::for_roast(
            "Surprise! You still look like that.",
            Some(Url::parse("https://mirror.example/").expect("url"))
        )]
    );
}

#[tokio::test]
async fn stopped_status_is_shareable_like_any_message() {
    let h = Harness::manual(ScriptedAnalysis::default());
    h.session.start().await.expect("camera");
    h.session.stop();
    assert_eq!(h.session.share().await, ShareOutcome::Prompted);
}

#[test]
fn settings_follow_app_config() {
    let mut app = AppConfig::with_endpoint(
        crate::config::Endpoint::parse("http://localhost:5000/analyze").expect("endpoint"),
    );
    app.encoding = FrameEncoding::new(ImageFormat::Png, 1.0).expect("valid");
    let settings = SessionSettings::from_app(&app);
    assert_eq!(settings.interval.period_ms, 5000);
    assert_eq!(settings.encoding.format, ImageFormat::Png);
    assert_eq!(settings.constraints.ideal_width, 1280);
}

#[tokio::test]
async fn abandoned_start_can_be_retried() {
    let gate = Arc::new(Semaphore::new(0));
    let h = Harness::new(StubCamera::gated(gate.clone()), ScriptedAnalysis::default(), 3_600_000);

    let first = {
        let session = h.session.clone();
        tokio::spawn(async move { session.start().await })
    };
    wait_for_camera_requests(&h.camera, 1).await;
    first.abort();
    assert!(first.await.expect_err("aborted").is_cancelled());
    assert_eq!(h.session.state(), RunState::Idle);

    gate.add_permits(1);
    h.session.start().await.expect("camera");
    assert_eq!(h.camera.requests(), 2);
    assert_eq!(h.camera.streams().len(), 1);
    assert_eq!(h.session.state(), RunState::Running);
    assert_eq!(h.session.active_timers(), 1);
}

#[tokio::test]
async fn stop_during_camera_open_cancels_quietly() {
    let gate = Arc::new(Semaphore::new(0));
    let h = Harness::new(StubCamera::gated(gate.clone()), ScriptedAnalysis::default(), 3_600_000);

    let pending = {
        let session = h.session.clone();
        tokio::spawn(async move { session.start().await })
    };
    wait_for_camera_requests(&h.camera, 1).await;

    h.session.stop();
    assert_eq!(h.sink.all(), vec![Presentation::Status(StatusMessage::Stopped)]);

    gate.add_permits(1);
    pending.await.expect("start task").expect("cancelled start is not an error");
    assert_eq!(h.session.state(), RunState::Idle);
    assert_eq!(h.session.active_timers(), 0);
    let streams = h.camera.streams();
    assert_eq!(streams.len(), 1);
    assert!(!streams[0].is_live());
    assert!(!h
        .sink
        .all()
        .iter()
        .any(|u| matches!(u, Presentation::RunningChanged(_))));
}
