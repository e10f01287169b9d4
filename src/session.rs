use crate::{
    clock::{Clock, Stopwatch},
    error::Error,
    feedback::{FeedbackGenerator, FeedbackRequest, FeedbackScheduler},
    hold::{HoldConfig, HoldEvent, HoldState, HoldTimer},
    joints::{extract_joint_angles, JointAngles},
    pose::LandmarkSet,
    reference::{PoseSpec, ReferencePose, ReferenceStore, TrainingModule},
    scoring::{score_accuracy, AccuracyReport, ScoringConfig},
};
use std::{
    sync::mpsc::{channel, Receiver, Sender},
    time::Duration,
};
use tracing::{debug, info, instrument, trace, warn};

pub(crate) const BASELINE_SCORE: u32 = 100;
pub(crate) const POSE_BONUS: u32 = 5;
pub(crate) const DEFAULT_FEEDBACK_INTERVAL: u32 = 5;

/// Landmarks below this visibility are reported at trace level.
const VISIBILITY_WARNING: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionState {
    NotStarted,
    InProgress(usize),
    Paused(usize),
    Completed,
}

/// The result of one scoring cycle.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub(crate) struct Snapshot {
    pub(crate) pose_index: usize,
    pub(crate) angles: JointAngles,
    pub(crate) accuracy: AccuracyReport,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub(crate) struct PoseCompletion {
    pub(crate) pose_index: usize,
    pub(crate) pose_id: String,
    /// Time spent in progress on the pose; `None` when it was skipped.
    pub(crate) elapsed: Option<Duration>,
    pub(crate) completed: bool,
    pub(crate) best_accuracy: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SessionEvent {
    Snapshot(Snapshot),
    Hold(HoldState),
    PoseStarted { index: usize, name: String },
    PoseCompleted(PoseCompletion),
    Paused,
    Resumed,
    SessionCompleted { score: u32 },
    Feedback(String),
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub(crate) struct SessionOptions {
    pub(crate) scoring: ScoringConfig,
    pub(crate) hold: HoldConfig,
    /// Ticks between feedback requests; 0 disables feedback.
    pub(crate) feedback_interval: u32,
    /// Only let the learner skip poses the module marks as skippable.
    pub(crate) restrict_skips: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            scoring: ScoringConfig::default(),
            hold: HoldConfig::default(),
            feedback_interval: DEFAULT_FEEDBACK_INTERVAL,
            restrict_skips: false,
        }
    }
}

/// Drives a learner through the poses of a [`TrainingModule`].
///
/// Landmark frames are scored as they arrive and the latest result is kept;
/// [`Session::tick`] must be called once per second and feeds that result into
/// the hold timer. Everything that happens is published to subscribers.
pub(crate) struct Session<C> {
    module: TrainingModule,
    references: ReferenceStore,
    options: SessionOptions,
    clock: C,

    state: SessionState,
    score: u32,
    hold: HoldTimer,
    latest: Option<Snapshot>,
    seen_landmarks: bool,

    pose_watch: Stopwatch,
    session_watch: Stopwatch,
    best_accuracy: f32,
    pose_ticks: u32,
    completions: Vec<PoseCompletion>,

    feedback: Option<FeedbackScheduler>,
    subscribers: Vec<Sender<SessionEvent>>,
}

impl<C> Session<C>
where
    C: Clock,
{
    pub(crate) fn new(
        module: TrainingModule,
        references: ReferenceStore,
        options: SessionOptions,
        clock: C,
    ) -> Self {
        for key in module.missing_references(&references) {
            warn!(message = "no reference pose", reference_key = key);
        }
        Self {
            module,
            references,
            hold: HoldTimer::new(options.hold),
            options,
            clock,
            state: SessionState::NotStarted,
            score: BASELINE_SCORE,
            latest: None,
            seen_landmarks: false,
            pose_watch: Stopwatch::default(),
            session_watch: Stopwatch::default(),
            best_accuracy: 0.0,
            pose_ticks: 0,
            completions: Vec::new(),
            feedback: None,
            subscribers: Vec::new(),
        }
    }

    /// Generate coaching feedback with `generator` on a background thread.
    pub(crate) fn with_feedback(mut self, generator: Box<dyn FeedbackGenerator>) -> Self {
        self.feedback = Some(FeedbackScheduler::spawn(generator));
        self
    }

    pub(crate) fn subscribe(&mut self) -> Receiver<SessionEvent> {
        let (tx, rx) = channel();
        self.subscribers.push(tx);
        rx
    }

    pub(crate) fn state(&self) -> SessionState {
        self.state
    }

    pub(crate) fn score(&self) -> u32 {
        self.score
    }

    pub(crate) fn module(&self) -> &TrainingModule {
        &self.module
    }

    pub(crate) fn latest(&self) -> Option<&Snapshot> {
        self.latest.as_ref()
    }

    pub(crate) fn hold_state(&self) -> HoldState {
        self.hold.state()
    }

    pub(crate) fn hold_config(&self) -> &HoldConfig {
        self.hold.config()
    }

    pub(crate) fn completions(&self) -> &[PoseCompletion] {
        &self.completions
    }

    /// Time spent in progress since the session started, excluding pauses.
    pub(crate) fn training_time(&self) -> Duration {
        self.session_watch.elapsed(self.clock.now())
    }

    pub(crate) fn current_index(&self) -> Option<usize> {
        match self.state {
            SessionState::InProgress(index) | SessionState::Paused(index) => Some(index),
            SessionState::NotStarted | SessionState::Completed => None,
        }
    }

    pub(crate) fn current_pose(&self) -> Option<&PoseSpec> {
        self.current_index()
            .and_then(|index| self.module.poses.get(index))
    }

    fn current_reference(&self) -> Option<&ReferencePose> {
        self.current_pose()
            .and_then(|pose| self.references.get(&pose.reference_key))
    }

    fn publish(&mut self, event: SessionEvent) {
        trace!(message = "publishing", ?event);
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    #[instrument(name = "Session::start", skip(self))]
    pub(crate) fn start(&mut self) -> Result<(), Error> {
        if !self.seen_landmarks {
            return Err(Error::NoLandmarkData);
        }
        self.reset();
        self.session_watch.start(self.clock.now());
        info!(
            message = "training started",
            module = %self.module.name,
            poses = self.module.poses.len()
        );
        self.begin_pose(0);
        Ok(())
    }

    #[instrument(name = "Session::on_landmark_frame", skip(self, frame), level = "trace")]
    pub(crate) fn on_landmark_frame(&mut self, frame: Option<LandmarkSet>) {
        if frame.is_some() && !self.seen_landmarks {
            debug!(message = "first landmark frame");
            self.seen_landmarks = true;
        }

        let index = match self.state {
            SessionState::InProgress(index) => index,
            _ => return,
        };

        if let Some(frame) = frame.as_ref() {
            if let Ok(hidden) = frame.poorly_visible(VISIBILITY_WARNING) {
                if !hidden.is_empty() {
                    trace!(message = "poorly visible landmarks", ?hidden, len = frame.len());
                }
            }
        }

        let angles = extract_joint_angles(frame.as_ref());
        let accuracy = score_accuracy(&angles, self.current_reference(), &self.options.scoring);
        trace!(
            message = "scored",
            overall = accuracy.overall,
            weakest = ?accuracy.weakest_joint()
        );
        if accuracy.overall > self.best_accuracy {
            self.best_accuracy = accuracy.overall;
        }

        let snapshot = Snapshot {
            pose_index: index,
            angles,
            accuracy,
        };
        self.latest = Some(snapshot.clone());
        self.publish(SessionEvent::Snapshot(snapshot));
        self.drain_feedback();
    }

    /// The one-second cadence: advances the hold timer with the latest accuracy.
    #[instrument(name = "Session::tick", skip(self), level = "debug")]
    pub(crate) fn tick(&mut self) -> HoldEvent {
        if !matches!(self.state, SessionState::InProgress(_)) {
            return HoldEvent::Idle;
        }

        self.pose_ticks += 1;
        let accuracy = self
            .latest
            .as_ref()
            .map_or(0.0, |snapshot| snapshot.accuracy.overall);
        let event = self.hold.tick(accuracy);
        debug!(message = "hold", ?event, accuracy);
        self.publish(SessionEvent::Hold(self.hold.state()));

        if event == HoldEvent::Completed {
            self.finish_pose(true);
        } else {
            let interval = self.options.feedback_interval;
            if interval > 0 && self.pose_ticks % interval == 0 {
                self.request_feedback();
            }
        }
        self.drain_feedback();
        event
    }

    /// Complete the current pose: the hold was demonstrated or the learner
    /// marked it done.
    #[instrument(name = "Session::advance", skip(self))]
    pub(crate) fn advance(&mut self) -> Result<(), Error> {
        if !matches!(self.state, SessionState::InProgress(_)) {
            return Err(Error::NotInProgress("advance"));
        }
        self.finish_pose(true);
        Ok(())
    }

    #[instrument(name = "Session::skip", skip(self))]
    pub(crate) fn skip(&mut self) -> Result<(), Error> {
        let index = match self.state {
            SessionState::InProgress(index) => index,
            _ => return Err(Error::NotInProgress("skip")),
        };
        let pose = &self.module.poses[index];
        if self.options.restrict_skips && !pose.skippable {
            return Err(Error::NotSkippable(index, pose.name.clone()));
        }
        self.finish_pose(false);
        Ok(())
    }

    #[instrument(name = "Session::pause", skip(self))]
    pub(crate) fn pause(&mut self) -> Result<(), Error> {
        let index = match self.state {
            SessionState::InProgress(index) => index,
            _ => return Err(Error::NotInProgress("pause")),
        };
        let now = self.clock.now();
        self.state = SessionState::Paused(index);
        self.pose_watch.stop(now);
        self.session_watch.stop(now);
        self.hold.reset();
        self.cancel_feedback();
        info!(message = "paused", pose = index);
        self.publish(SessionEvent::Paused);
        self.publish(SessionEvent::Hold(self.hold.state()));
        Ok(())
    }

    #[instrument(name = "Session::resume", skip(self))]
    pub(crate) fn resume(&mut self) -> Result<(), Error> {
        let index = match self.state {
            SessionState::Paused(index) => index,
            _ => return Err(Error::NotPaused),
        };
        let now = self.clock.now();
        self.state = SessionState::InProgress(index);
        self.pose_watch.start(now);
        self.session_watch.start(now);
        // frames scored before the pause do not count towards a new hold
        self.latest = None;
        info!(message = "resumed", pose = index);
        self.publish(SessionEvent::Resumed);
        Ok(())
    }

    /// Back to [`SessionState::NotStarted`] with the baseline score.
    #[instrument(name = "Session::restart", skip(self))]
    pub(crate) fn restart(&mut self) {
        self.reset();
        info!(message = "restarted");
    }

    fn reset(&mut self) {
        self.cancel_feedback();
        self.state = SessionState::NotStarted;
        self.score = BASELINE_SCORE;
        self.hold.reset();
        self.latest = None;
        self.pose_watch.reset();
        self.session_watch.reset();
        self.best_accuracy = 0.0;
        self.pose_ticks = 0;
        self.completions.clear();
    }

    fn begin_pose(&mut self, index: usize) {
        self.state = SessionState::InProgress(index);
        self.hold.reset();
        self.latest = None;
        self.best_accuracy = 0.0;
        self.pose_ticks = 0;
        self.pose_watch.reset();
        self.pose_watch.start(self.clock.now());

        let pose = &self.module.poses[index];
        let name = pose.name.clone();
        if self.references.get(&pose.reference_key).is_none() {
            warn!(
                message = "pose has no reference and cannot be completed by holding it",
                pose = %name,
                reference_key = %pose.reference_key
            );
        }
        info!(message = "pose started", index, pose = %name);
        self.publish(SessionEvent::PoseStarted { index, name });
    }

    fn finish_pose(&mut self, completed: bool) {
        let index = match self.current_index() {
            Some(index) => index,
            None => return,
        };
        let now = self.clock.now();
        self.pose_watch.stop(now);
        self.cancel_feedback();

        if completed {
            self.score += POSE_BONUS;
        }
        let completion = PoseCompletion {
            pose_index: index,
            pose_id: self.module.poses[index].id.clone(),
            elapsed: if completed {
                Some(self.pose_watch.elapsed(now))
            } else {
                None
            },
            completed,
            best_accuracy: self.best_accuracy,
        };
        let outcome = if completed { "pose completed" } else { "pose skipped" };
        info!(
            message = outcome,
            index,
            elapsed = ?completion.elapsed,
            score = self.score
        );
        self.completions.push(completion.clone());
        self.publish(SessionEvent::PoseCompleted(completion));

        let next = index + 1;
        if next < self.module.poses.len() {
            self.begin_pose(next);
        } else {
            self.state = SessionState::Completed;
            self.hold.reset();
            self.latest = None;
            self.session_watch.stop(now);
            info!(message = "training completed", score = self.score);
            let score = self.score;
            self.publish(SessionEvent::SessionCompleted { score });
        }
    }

    fn request_feedback(&mut self) {
        let scheduler = match self.feedback.as_ref() {
            Some(scheduler) => scheduler,
            None => return,
        };
        let (snapshot, pose) = match (self.latest.as_ref(), self.current_pose()) {
            (Some(snapshot), Some(pose)) => (snapshot, pose),
            _ => return,
        };
        let request = FeedbackRequest {
            pose_name: pose.name.clone(),
            pose_description: pose.description.clone(),
            key_points: pose.key_points.clone(),
            accuracy: snapshot.accuracy.overall,
            reference_angles: self
                .current_reference()
                .map(|reference| reference.angles)
                .unwrap_or_default(),
            current_angles: snapshot.angles,
        };
        if scheduler.request(request) {
            debug!(message = "feedback requested", accuracy = snapshot.accuracy.overall);
        }
    }

    /// Publish feedback that finished since the last call.
    pub(crate) fn drain_feedback(&mut self) {
        let texts = match self.feedback.as_ref() {
            Some(scheduler) => scheduler.poll(),
            None => return,
        };
        for text in texts {
            self.publish(SessionEvent::Feedback(text));
        }
    }

    fn cancel_feedback(&self) {
        if let Some(scheduler) = self.feedback.as_ref() {
            scheduler.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        PoseCompletion, Session, SessionEvent, SessionOptions, SessionState, BASELINE_SCORE,
        POSE_BONUS,
    };
    use crate::{
        clock::ManualClock,
        error::Error,
        feedback::HintFeedback,
        hold::HoldEvent,
        joints::{
            tests::{left_elbow_bent, standing},
            Joint,
        },
        reference::{PoseSpec, ReferencePose, ReferenceStore, TrainingModule},
    };
    use assert_approx_eq::assert_approx_eq;
    use std::{
        sync::mpsc::Receiver,
        time::{Duration, Instant},
    };

    fn references() -> ReferenceStore {
        let mut store = ReferenceStore::default();
        store.insert("bent", ReferencePose::default().target(Joint::LeftElbow, 90.0));
        store
    }

    fn module() -> TrainingModule {
        TrainingModule::new(
            "test",
            vec![
                PoseSpec::new("a", "First", "bent"),
                PoseSpec::new("b", "Second", "bent").skippable(),
            ],
        )
        .unwrap()
    }

    fn session(options: SessionOptions) -> (Session<ManualClock>, ManualClock) {
        let clock = ManualClock::new();
        let session = Session::new(module(), references(), options, clock.clone());
        (session, clock)
    }

    fn started() -> (Session<ManualClock>, ManualClock) {
        let (mut session, clock) = session(SessionOptions::default());
        session.on_landmark_frame(Some(standing()));
        session.start().unwrap();
        (session, clock)
    }

    /// One frame and one tick per second.
    fn hold_for(session: &mut Session<ManualClock>, clock: &ManualClock, seconds: u32) {
        for _ in 0..seconds {
            session.on_landmark_frame(Some(left_elbow_bent()));
            clock.advance(Duration::from_secs(1));
            session.tick();
        }
    }

    fn completions(events: &Receiver<SessionEvent>) -> Vec<PoseCompletion> {
        events
            .try_iter()
            .filter_map(|event| match event {
                SessionEvent::PoseCompleted(completion) => Some(completion),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn start_requires_landmarks() {
        let (mut session, _) = session(SessionOptions::default());
        assert!(matches!(session.start(), Err(Error::NoLandmarkData)));
        session.on_landmark_frame(None);
        assert!(matches!(session.start(), Err(Error::NoLandmarkData)));
        session.on_landmark_frame(Some(standing()));
        session.start().unwrap();
        assert_eq!(session.state(), SessionState::InProgress(0));
        assert_eq!(session.score(), BASELINE_SCORE);
    }

    #[test]
    fn frames_before_start_are_not_scored() {
        let (mut session, _) = session(SessionOptions::default());
        session.on_landmark_frame(Some(left_elbow_bent()));
        assert!(session.latest().is_none());
    }

    #[test]
    fn holding_three_seconds_completes_the_pose() {
        let (mut session, clock) = started();
        let events = session.subscribe();

        hold_for(&mut session, &clock, 3);

        assert_eq!(session.state(), SessionState::InProgress(1));
        assert_eq!(session.score(), BASELINE_SCORE + POSE_BONUS);
        let done = completions(&events);
        assert_eq!(done.len(), 1);
        assert!(done[0].completed);
        assert_eq!(done[0].pose_id, "a");
        assert_eq!(done[0].elapsed, Some(Duration::from_secs(3)));
        assert_approx_eq!(done[0].best_accuracy, 100.0);
    }

    #[test]
    fn snapshot_is_published_per_frame() {
        let (mut session, _) = started();
        let events = session.subscribe();
        session.on_landmark_frame(Some(left_elbow_bent()));
        let snapshot = events
            .try_iter()
            .find_map(|event| match event {
                SessionEvent::Snapshot(snapshot) => Some(snapshot),
                _ => None,
            })
            .unwrap();
        assert_eq!(snapshot.pose_index, 0);
        assert_eq!(snapshot.angles[Joint::LeftElbow], 90.0);
        assert_approx_eq!(snapshot.accuracy.overall, 100.0);
    }

    #[test]
    fn broken_hold_starts_over() {
        let (mut session, clock) = started();
        hold_for(&mut session, &clock, 2);
        session.on_landmark_frame(Some(standing()));
        assert_eq!(session.tick(), HoldEvent::Reset);
        assert_eq!(session.hold_state().elapsed_seconds, 0);
        hold_for(&mut session, &clock, 2);
        assert_eq!(session.state(), SessionState::InProgress(0));
        hold_for(&mut session, &clock, 1);
        assert_eq!(session.state(), SessionState::InProgress(1));
    }

    #[test]
    fn tick_without_frames_never_completes() {
        let (mut session, _) = started();
        for _ in 0..10 {
            session.tick();
        }
        assert_eq!(session.state(), SessionState::InProgress(0));
        assert_eq!(session.score(), BASELINE_SCORE);
    }

    #[test]
    fn whole_module_completes() {
        let (mut session, clock) = started();
        let events = session.subscribe();
        hold_for(&mut session, &clock, 3);
        session.advance().unwrap();

        assert_eq!(session.state(), SessionState::Completed);
        assert_eq!(session.score(), BASELINE_SCORE + 2 * POSE_BONUS);
        assert!(events
            .try_iter()
            .any(|event| event == SessionEvent::SessionCompleted { score: 110 }));
        assert!(matches!(session.advance(), Err(Error::NotInProgress(_))));
        assert_eq!(session.training_time(), Duration::from_secs(3));
    }

    #[test]
    fn skip_gives_no_bonus() {
        let (mut session, clock) = started();
        hold_for(&mut session, &clock, 3);
        session.skip().unwrap();

        assert_eq!(session.state(), SessionState::Completed);
        assert_eq!(session.score(), BASELINE_SCORE + POSE_BONUS);
        let skipped = &session.completions()[1];
        assert!(!skipped.completed);
        assert_eq!(skipped.elapsed, None);
    }

    #[test]
    fn any_pose_can_be_skipped_by_default() {
        let mut session = Session::new(
            TrainingModule::module_one(),
            ReferenceStore::default(),
            SessionOptions::default(),
            ManualClock::new(),
        );
        session.on_landmark_frame(Some(standing()));
        session.start().unwrap();
        assert!(!session.module().poses[0].skippable);

        session.skip().unwrap();

        assert_eq!(session.state(), SessionState::InProgress(1));
        assert_eq!(session.score(), BASELINE_SCORE);
        assert_eq!(session.completions()[0].elapsed, None);
        assert!(!session.completions()[0].completed);
    }

    #[test]
    fn restricted_skips_follow_the_module() {
        let (mut session, clock) = session(SessionOptions {
            restrict_skips: true,
            ..Default::default()
        });
        session.on_landmark_frame(Some(standing()));
        session.start().unwrap();
        assert!(matches!(session.skip(), Err(Error::NotSkippable(0, _))));
        assert_eq!(session.state(), SessionState::InProgress(0));

        hold_for(&mut session, &clock, 3);
        session.skip().unwrap();
        assert_eq!(session.state(), SessionState::Completed);
    }

    #[test]
    fn pause_freezes_evaluation() {
        let (mut session, clock) = started();
        hold_for(&mut session, &clock, 2);
        session.pause().unwrap();
        assert_eq!(session.state(), SessionState::Paused(0));
        assert_eq!(session.hold_state().elapsed_seconds, 0);

        // nothing counts while paused
        hold_for(&mut session, &clock, 5);
        assert_eq!(session.state(), SessionState::Paused(0));
        assert!(matches!(session.pause(), Err(Error::NotInProgress(_))));

        session.resume().unwrap();
        assert!(matches!(session.resume(), Err(Error::NotPaused)));
        hold_for(&mut session, &clock, 3);
        assert_eq!(session.state(), SessionState::InProgress(1));
        // 2 seconds before the pause and 3 after
        assert_eq!(session.completions()[0].elapsed, Some(Duration::from_secs(5)));
    }

    #[test]
    fn missing_reference_stalls_progress() {
        let clock = ManualClock::new();
        let module = TrainingModule::new(
            "gap",
            vec![
                PoseSpec::new("x", "Unknown", "nowhere").skippable(),
                PoseSpec::new("a", "First", "bent"),
            ],
        )
        .unwrap();
        let mut session = Session::new(module, references(), SessionOptions::default(), clock);
        session.on_landmark_frame(Some(left_elbow_bent()));
        session.start().unwrap();

        for _ in 0..5 {
            session.on_landmark_frame(Some(left_elbow_bent()));
            session.tick();
        }
        assert_eq!(session.latest().unwrap().accuracy.overall, 0.0);
        assert_eq!(session.state(), SessionState::InProgress(0));

        session.skip().unwrap();
        assert_eq!(session.state(), SessionState::InProgress(1));
    }

    #[test]
    fn restart_resets_score() {
        let (mut session, clock) = started();
        hold_for(&mut session, &clock, 3);
        session.restart();
        assert_eq!(session.state(), SessionState::NotStarted);
        assert_eq!(session.score(), BASELINE_SCORE);
        assert!(session.completions().is_empty());
        // the camera is still live
        session.start().unwrap();
    }

    #[test]
    fn feedback_arrives_as_event() {
        let (mut session, _) = session(SessionOptions {
            feedback_interval: 2,
            ..Default::default()
        });
        let mut session = session.with_feedback(Box::new(HintFeedback::default()));
        let events = session.subscribe();
        session.on_landmark_frame(Some(standing()));
        session.start().unwrap();
        session.on_landmark_frame(Some(standing()));
        session.tick();
        session.tick();

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut feedback = None;
        while feedback.is_none() && Instant::now() < deadline {
            session.drain_feedback();
            feedback = events.try_iter().find_map(|event| match event {
                SessionEvent::Feedback(text) => Some(text),
                _ => None,
            });
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(
            feedback.unwrap(),
            "Bend your left elbow a little more (about 90° off)."
        );
    }
}
