use crate::{
    error::Error,
    joints::{Joint, JointAngles},
    reference::JointTargets,
    scoring::{joint_accuracy, ScoringConfig},
    summary::{minutes_seconds, Rating, SessionSummary},
};
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        mpsc::{self, Receiver, SyncSender, TrySendError},
        Arc,
    },
    thread::JoinHandle,
};
use tracing::{debug, warn};

/// Shown whenever the generator fails or returns nothing.
pub(crate) const FALLBACK_FEEDBACK: &str =
    "Great effort! Keep practicing to improve your form and technique.";

/// Closing remarks when no session review could be generated.
pub(crate) const SESSION_FALLBACK_FEEDBACK: &str = "Excellent training session! Your dedication \
     to improving your martial arts skills is commendable. Keep up the great work!";

/// Everything a coach needs to comment on the learner's current attempt.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FeedbackRequest {
    pub(crate) pose_name: String,
    pub(crate) pose_description: String,
    pub(crate) key_points: Vec<String>,
    pub(crate) accuracy: f32,
    pub(crate) reference_angles: JointTargets,
    pub(crate) current_angles: JointAngles,
}

pub(crate) trait FeedbackGenerator: Send {
    fn generate(&self, request: &FeedbackRequest) -> Result<String, Error>;

    /// Closing remarks on a finished session.
    fn review(&self, _summary: &SessionSummary) -> Result<String, Error> {
        Err(Error::FeedbackUnavailable("no session review"))
    }
}

/// Run `generator`, degrading any failure to [`FALLBACK_FEEDBACK`].
pub(crate) fn generate_or_fallback(
    generator: &dyn FeedbackGenerator,
    request: &FeedbackRequest,
) -> String {
    match generator.generate(request) {
        Ok(text) if !text.trim().is_empty() => text.trim().to_owned(),
        Ok(_) => {
            warn!(message = "feedback generator returned empty text");
            FALLBACK_FEEDBACK.to_owned()
        }
        Err(error) => {
            warn!(message = "feedback generation failed", error = %error);
            FALLBACK_FEEDBACK.to_owned()
        }
    }
}

/// Run `generator`'s session review, degrading any failure to
/// [`SESSION_FALLBACK_FEEDBACK`].
pub(crate) fn review_or_fallback(
    generator: &dyn FeedbackGenerator,
    summary: &SessionSummary,
) -> String {
    match generator.review(summary) {
        Ok(text) if !text.trim().is_empty() => text.trim().to_owned(),
        Ok(_) => {
            warn!(message = "session review was empty");
            SESSION_FALLBACK_FEEDBACK.to_owned()
        }
        Err(error) => {
            warn!(message = "session review failed", error = %error);
            SESSION_FALLBACK_FEEDBACK.to_owned()
        }
    }
}

/// Local coaching hints: names the joint furthest from its target and which way
/// to move it.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct HintFeedback {
    scoring: ScoringConfig,
}

impl HintFeedback {
    pub(crate) fn new(scoring: ScoringConfig) -> Self {
        Self { scoring }
    }
}

impl FeedbackGenerator for HintFeedback {
    fn generate(&self, request: &FeedbackRequest) -> Result<String, Error> {
        let worst = request
            .reference_angles
            .iter()
            .filter_map(|(joint, target)| {
                let delta = request.current_angles[joint] - target?;
                if delta.is_finite() {
                    Some((joint, delta))
                } else {
                    None
                }
            })
            .fold(None, |worst: Option<(Joint, f32)>, (joint, delta)| match worst {
                Some((_, worst_delta)) if worst_delta.abs() >= delta.abs() => worst,
                _ => Some((joint, delta)),
            });

        let (joint, delta) = match worst {
            Some(worst) => worst,
            None => return Err(Error::FeedbackUnavailable("pose has no reference angles")),
        };

        if delta.abs() <= self.scoring.tolerance {
            return Ok(format!(
                "Looking sharp! Keep that {} steady.",
                request.pose_name
            ));
        }

        Ok(format!(
            "{} (about {:.0}° off).",
            hint(joint, delta > 0.0),
            delta.abs()
        ))
    }

    fn review(&self, summary: &SessionSummary) -> Result<String, Error> {
        if summary.poses.is_empty() {
            return Err(Error::FeedbackUnavailable("no pose was finished"));
        }
        let opening = match summary.rating() {
            Rating::Excellent => "Outstanding session!",
            Rating::Great => "Great session!",
            Rating::Good => "Good session.",
            Rating::Poor => "Every session counts.",
        };
        let mut text = format!(
            "{} You held {} of {} poses at {:.0}% average accuracy in {}.",
            opening,
            summary.poses_completed,
            summary.poses_total,
            summary.average_accuracy,
            minutes_seconds(summary.total_time)
        );
        match summary.poses_skipped() {
            0 => {}
            1 => text.push_str(" Come back to the pose you skipped next time."),
            skipped => text.push_str(&format!(
                " Come back to the {} poses you skipped next time.",
                skipped
            )),
        }
        if summary.average_accuracy < joint_accuracy(self.scoring.tolerance, &self.scoring) {
            text.push_str(" Slow down and match each reference angle before holding.");
        }
        Ok(text)
    }
}

fn hint(joint: Joint, too_large: bool) -> String {
    let label = joint.label();
    let arm = match joint.side() {
        crate::pose::constants::Side::Left => "left arm",
        crate::pose::constants::Side::Right => "right arm",
    };
    match (joint, too_large) {
        (Joint::LeftShoulder, true) | (Joint::RightShoulder, true) => {
            format!("Your {} is raised too high, bring it down a bit", arm)
        }
        (Joint::LeftShoulder, false) | (Joint::RightShoulder, false) => {
            format!("Your {} is a bit low, raise it a little more", arm)
        }
        (Joint::LeftElbow, true) | (Joint::RightElbow, true) => {
            format!("Your {} is bent too far, extend it slightly", label)
        }
        (Joint::LeftElbow, false) | (Joint::RightElbow, false) => {
            format!("Bend your {} a little more", label)
        }
        (Joint::LeftKnee, true) | (Joint::RightKnee, true) => {
            format!("Your {} is too straight, bend it more", label)
        }
        (Joint::LeftKnee, false) | (Joint::RightKnee, false) => {
            format!("Your {} is bent too deep, straighten it a little", label)
        }
    }
}

type Tagged<T> = (u64, T);

/// Runs one feedback generator on a background thread.
///
/// Requests never block the caller: while the worker is busy and one request is
/// already queued, new requests are dropped. [`FeedbackScheduler::cancel`]
/// discards everything requested so far, including answers still in flight.
pub(crate) struct FeedbackScheduler {
    requests: Option<SyncSender<Tagged<FeedbackRequest>>>,
    responses: Receiver<Tagged<String>>,
    epoch: Arc<AtomicU64>,
    worker: Option<JoinHandle<()>>,
}

impl FeedbackScheduler {
    pub(crate) fn spawn(generator: Box<dyn FeedbackGenerator>) -> Self {
        let (requests_tx, requests_rx) = mpsc::sync_channel::<Tagged<FeedbackRequest>>(1);
        let (responses_tx, responses_rx) = mpsc::channel();
        let epoch = Arc::new(AtomicU64::new(0));
        let worker_epoch = epoch.clone();

        let worker = std::thread::spawn(move || {
            while let Ok((requested_at, request)) = requests_rx.recv() {
                if requested_at != worker_epoch.load(Ordering::SeqCst) {
                    debug!(message = "skipping cancelled feedback request");
                    continue;
                }
                let text = generate_or_fallback(generator.as_ref(), &request);
                if responses_tx.send((requested_at, text)).is_err() {
                    break;
                }
            }
        });

        Self {
            requests: Some(requests_tx),
            responses: responses_rx,
            epoch,
            worker: Some(worker),
        }
    }

    /// Queue a request; returns whether it was accepted.
    pub(crate) fn request(&self, request: FeedbackRequest) -> bool {
        let requests = match self.requests.as_ref() {
            Some(requests) => requests,
            None => return false,
        };
        match requests.try_send((self.epoch.load(Ordering::SeqCst), request)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!(message = "feedback worker busy, dropping request");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!(message = "feedback worker has stopped");
                false
            }
        }
    }

    /// Finished feedback texts for requests that were not cancelled.
    pub(crate) fn poll(&self) -> Vec<String> {
        let current = self.epoch.load(Ordering::SeqCst);
        self.responses
            .try_iter()
            .filter(|(epoch, _)| *epoch == current)
            .map(|(_, text)| text)
            .collect()
    }

    pub(crate) fn cancel(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for FeedbackScheduler {
    fn drop(&mut self) {
        self.cancel();
        // closing the request channel ends the worker loop
        self.requests.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!(message = "feedback worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        generate_or_fallback, review_or_fallback, FeedbackGenerator, FeedbackRequest,
        FeedbackScheduler, HintFeedback, FALLBACK_FEEDBACK, SESSION_FALLBACK_FEEDBACK,
    };
    use crate::{
        error::Error,
        joints::{Joint, JointAngles},
        reference::JointTargets,
        session::PoseCompletion,
        summary::SessionSummary,
    };
    use std::{
        sync::{mpsc, Mutex},
        time::{Duration, Instant},
    };

    fn request(current_elbow: f32) -> FeedbackRequest {
        let mut reference_angles = JointTargets::default();
        reference_angles[Joint::LeftElbow] = Some(90.0);
        reference_angles[Joint::RightKnee] = Some(170.0);
        let mut current_angles = JointAngles::default();
        current_angles[Joint::LeftElbow] = current_elbow;
        current_angles[Joint::RightKnee] = 168.0;
        FeedbackRequest {
            pose_name: "Basic Block".to_owned(),
            pose_description: "Block".to_owned(),
            key_points: vec!["Elbow at 90 degrees".to_owned()],
            accuracy: 50.0,
            reference_angles,
            current_angles,
        }
    }

    struct Failing;

    impl FeedbackGenerator for Failing {
        fn generate(&self, _: &FeedbackRequest) -> Result<String, Error> {
            Err(Error::EmptyFeedback)
        }
    }

    /// Answers with the pose name once the test lets it through.
    struct Gated(Mutex<mpsc::Receiver<()>>);

    impl FeedbackGenerator for Gated {
        fn generate(&self, request: &FeedbackRequest) -> Result<String, Error> {
            let _ = self.0.lock().unwrap().recv();
            Ok(format!("{} {}", request.pose_name, request.accuracy))
        }
    }

    fn summary(poses: Vec<PoseCompletion>) -> SessionSummary {
        let poses_completed = poses.iter().filter(|pose| pose.completed).count();
        let average_accuracy = if poses.is_empty() {
            0.0
        } else {
            poses.iter().map(|pose| pose.best_accuracy).sum::<f32>() / poses.len() as f32
        };
        SessionSummary {
            module: "Module 1".to_owned(),
            score: 100 + 5 * poses_completed as u32,
            max_score: 110,
            poses_total: 2,
            poses_completed,
            average_accuracy,
            total_time: Duration::from_secs(75),
            poses,
            coaching: None,
        }
    }

    fn pose(index: usize, completed: bool, best_accuracy: f32) -> PoseCompletion {
        PoseCompletion {
            pose_index: index,
            pose_id: (index + 1).to_string(),
            elapsed: if completed {
                Some(Duration::from_secs(3))
            } else {
                None
            },
            completed,
            best_accuracy,
        }
    }

    fn wait_for(scheduler: &FeedbackScheduler) -> Vec<String> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let texts = scheduler.poll();
            if !texts.is_empty() || Instant::now() > deadline {
                return texts;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn hint_names_worst_joint() {
        let text = HintFeedback::default().generate(&request(40.0)).unwrap();
        assert_eq!(text, "Bend your left elbow a little more (about 50° off).");

        let text = HintFeedback::default().generate(&request(120.0)).unwrap();
        assert!(text.starts_with("Your left elbow is bent too far"), "{}", text);
    }

    #[test]
    fn hint_on_target() {
        let text = HintFeedback::default().generate(&request(93.0)).unwrap();
        assert_eq!(text, "Looking sharp! Keep that Basic Block steady.");
    }

    #[test]
    fn hint_without_reference_falls_back() {
        let mut request = request(90.0);
        request.reference_angles = JointTargets::default();
        assert_eq!(
            generate_or_fallback(&HintFeedback::default(), &request),
            FALLBACK_FEEDBACK
        );
    }

    #[test]
    fn failures_degrade_to_fallback() {
        let scheduler = FeedbackScheduler::spawn(Box::new(Failing));
        assert!(scheduler.request(request(90.0)));
        assert_eq!(wait_for(&scheduler), vec![FALLBACK_FEEDBACK.to_owned()]);
    }

    #[test]
    fn requests_never_block() {
        let (gate, gate_rx) = mpsc::channel();
        let scheduler = FeedbackScheduler::spawn(Box::new(Gated(Mutex::new(gate_rx))));
        let accepted = (0..3)
            .filter(|&i| scheduler.request(request(i as f32)))
            .count();
        assert!(accepted < 3);
        for _ in 0..3 {
            gate.send(()).unwrap();
        }
    }

    #[test]
    fn cancelled_answers_are_discarded() {
        let (gate, gate_rx) = mpsc::channel();
        let scheduler = FeedbackScheduler::spawn(Box::new(Gated(Mutex::new(gate_rx))));
        assert!(scheduler.request(request(1.0)));
        scheduler.cancel();
        gate.send(()).unwrap();

        let mut fresh = request(2.0);
        fresh.accuracy = 99.0;
        // the worker may still be busy with the cancelled request
        let deadline = Instant::now() + Duration::from_secs(5);
        while !scheduler.request(fresh.clone()) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        gate.send(()).unwrap();

        assert_eq!(wait_for(&scheduler), vec!["Basic Block 99".to_owned()]);
    }

    #[test]
    fn hint_review_of_a_clean_session() {
        let text = HintFeedback::default()
            .review(&summary(vec![pose(0, true, 96.0), pose(1, true, 94.0)]))
            .unwrap();
        assert_eq!(
            text,
            "Outstanding session! You held 2 of 2 poses at 95% average accuracy in 1:15."
        );
    }

    #[test]
    fn hint_review_mentions_skips_and_accuracy() {
        let text = HintFeedback::default()
            .review(&summary(vec![pose(0, true, 96.0), pose(1, false, 40.0)]))
            .unwrap();
        assert!(text.contains("You held 1 of 2 poses at 68%"), "{}", text);
        assert!(text.contains("the pose you skipped"), "{}", text);
        assert!(text.ends_with("before holding."), "{}", text);
    }

    #[test]
    fn review_falls_back() {
        let empty = summary(Vec::new());
        assert_eq!(
            review_or_fallback(&HintFeedback::default(), &empty),
            SESSION_FALLBACK_FEEDBACK
        );
        let finished = summary(vec![pose(0, true, 96.0)]);
        assert_eq!(review_or_fallback(&Failing, &finished), SESSION_FALLBACK_FEEDBACK);
    }
}
