use crate::{
    clock::{Clock, ManualClock},
    error::Error,
    frames::{Control, Frame, FrameReader},
    session::{Session, SessionEvent, SessionState},
};
use anyhow::{anyhow, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::{
    io::BufRead,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{channel, Receiver, RecvTimeoutError},
        Arc,
    },
    time::Duration,
};
use tracing::{debug, info, warn};

pub(crate) const TICK: Duration = Duration::from_secs(1);

/// How often the live loop wakes up to check for cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

enum Input {
    Frame(Frame),
    Tick,
    End,
}

pub(crate) fn spinner() -> ProgressBar {
    ProgressBar::new_spinner().with_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
            .template("{prefix:.bold.dim} {spinner} {wide_msg}"),
    )
}

/// Feeds landmark frames and one-second ticks into a [`Session`].
///
/// The session is started as soon as the first frame with a body arrives and
/// driving stops once every pose is done, the input ends or `running` is
/// cleared.
pub(crate) struct Driver {
    running: Arc<AtomicBool>,
    progress: Option<ProgressBar>,
    tick: Duration,
}

impl Driver {
    pub(crate) fn new(running: Arc<AtomicBool>) -> Self {
        Self {
            running,
            progress: None,
            tick: TICK,
        }
    }

    pub(crate) fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    #[cfg(test)]
    pub(crate) fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn on_frame<C>(&self, session: &mut Session<C>, frame: Frame) -> Result<(), Error>
    where
        C: Clock,
    {
        if let Some(control) = frame.control {
            self.on_control(session, control);
            self.show(session);
            return Ok(());
        }

        let has_body = frame.landmarks.is_some();
        session.on_landmark_frame(frame.landmarks);
        if has_body && session.state() == SessionState::NotStarted {
            session.start()?;
        }
        self.show(session);
        Ok(())
    }

    fn on_control<C>(&self, session: &mut Session<C>, control: Control)
    where
        C: Clock,
    {
        let result = match control {
            Control::Pause => session.pause(),
            Control::Resume => session.resume(),
            Control::Skip => session.skip(),
            Control::Complete => session.advance(),
            Control::Restart => {
                session.restart();
                Ok(())
            }
        };
        match result {
            Ok(()) => debug!(message = "applied control", ?control),
            Err(error) => warn!(message = "ignoring control", ?control, %error),
        }
    }

    fn on_tick<C>(&self, session: &mut Session<C>)
    where
        C: Clock,
    {
        session.tick();
        if let Some(progress) = self.progress.as_ref() {
            progress.tick();
        }
        self.show(session);
    }

    fn show<C>(&self, session: &Session<C>)
    where
        C: Clock,
    {
        let progress = match self.progress.as_ref() {
            Some(progress) => progress,
            None => return,
        };
        let poses = session.module().poses.len();
        let message = match session.current_index() {
            Some(index) => format!(
                "pose {}/{} · accuracy {:.0}% · hold {}/{}s · score {}",
                index + 1,
                poses,
                session.latest().map_or(0.0, |snapshot| snapshot.accuracy.overall),
                session.hold_state().elapsed_seconds,
                session.hold_config().seconds,
                session.score()
            ),
            None => format!("{} poses · score {}", poses, session.score()),
        };
        progress.set_prefix(session.module().name.clone());
        progress.set_message(message);
    }

    /// Print coaching feedback that arrived since the last call; returns how many.
    fn report(&self, events: &Receiver<SessionEvent>) -> usize {
        let mut shown = 0;
        for event in events.try_iter() {
            if let SessionEvent::Feedback(text) = event {
                match self.progress.as_ref() {
                    Some(progress) => progress.println(format!("coach: {}", text)),
                    None => info!(message = "feedback", %text),
                }
                shown += 1;
            }
        }
        shown
    }

    fn finish(&self) {
        if let Some(progress) = self.progress.as_ref() {
            progress.finish_and_clear();
        }
    }

    /// Process recorded frames as fast as possible.
    ///
    /// Time comes from the frames: `clock` jumps to each frame's timestamp and a
    /// tick is emitted for every whole second since the session started.
    /// Frames without a timestamp reuse the previous one.
    pub(crate) fn replay<I>(
        &self,
        session: &mut Session<ManualClock>,
        clock: &ManualClock,
        frames: I,
    ) -> Result<(), Error>
    where
        I: IntoIterator<Item = Result<Frame, Error>>,
    {
        let events = session.subscribe();
        let mut next_tick = None;
        let mut frames_seen = 0usize;

        for frame in frames {
            if !self.running() || session.state() == SessionState::Completed {
                break;
            }
            let frame = frame?;
            frames_seen += 1;
            let at = frame.at.unwrap_or_else(|| clock.now());

            if let Some(tick_at) = next_tick.as_mut() {
                while *tick_at <= at && session.state() != SessionState::Completed {
                    clock.set(*tick_at);
                    self.on_tick(session);
                    *tick_at += self.tick;
                }
            }

            clock.set(at);
            let was_started = session.state() != SessionState::NotStarted;
            self.on_frame(session, frame)?;
            if !was_started && session.state() != SessionState::NotStarted {
                next_tick = Some(clock.now() + self.tick);
            }
            self.report(&events);
        }
        self.report(&events);

        info!(
            message = "replay finished",
            frames = frames_seen,
            state = ?session.state(),
            at = ?clock.now()
        );
        self.finish();
        Ok(())
    }

    /// Process a live stream of frames on the wall clock.
    ///
    /// One thread reads frames and another emits ticks; both feed a single
    /// channel so frames and ticks reach the session in arrival order.
    pub(crate) fn follow<C, R>(&self, session: &mut Session<C>, reader: R) -> Result<()>
    where
        C: Clock,
        R: BufRead + Send,
    {
        let (inputs_tx, inputs_rx) = channel();
        let ticks_tx = inputs_tx.clone();
        // cleared when this call returns, independently of the caller's flag
        let live = AtomicBool::new(true);
        let running = &self.running;
        let keep_going = || live.load(Ordering::SeqCst) && running.load(Ordering::SeqCst);
        let tick = self.tick;

        let result = crossbeam::thread::scope(|scope| {
            let reader = scope.spawn(move |_| {
                let mut read = Ok(());
                for frame in FrameReader::new(reader) {
                    if !keep_going() {
                        break;
                    }
                    match frame {
                        Ok(frame) => {
                            if inputs_tx.send(Input::Frame(frame)).is_err() {
                                break;
                            }
                        }
                        Err(error) => {
                            read = Err::<(), Error>(error);
                            break;
                        }
                    }
                }
                // the receiver may already be gone
                let _ = inputs_tx.send(Input::End);
                read
            });

            scope.spawn(move |_| {
                while keep_going() {
                    std::thread::sleep(tick);
                    if ticks_tx.send(Input::Tick).is_err() {
                        break;
                    }
                }
            });

            let outcome = self.pump(session, &inputs_rx);
            // stop the ticker and the reader before the scope joins them
            live.store(false, Ordering::SeqCst);
            drop(inputs_rx);

            let read = reader
                .join()
                .map_err(|_| anyhow!("frame reader thread panicked"))?;
            outcome?;
            read.context("failed reading landmark frames")
        })
        .map_err(|_| anyhow!("driver thread panicked"))?;

        self.finish();
        result
    }

    fn pump<C>(&self, session: &mut Session<C>, inputs: &Receiver<Input>) -> Result<()>
    where
        C: Clock,
    {
        let events = session.subscribe();
        while self.running() && session.state() != SessionState::Completed {
            match inputs.recv_timeout(POLL_INTERVAL) {
                Ok(Input::Frame(frame)) => self
                    .on_frame(session, frame)
                    .context("failed starting training")?,
                Ok(Input::Tick) => self.on_tick(session),
                Ok(Input::End) => {
                    debug!(message = "end of landmark stream");
                    break;
                }
                Err(RecvTimeoutError::Timeout) => session.drain_feedback(),
                Err(RecvTimeoutError::Disconnected) => {
                    warn!(message = "input threads stopped unexpectedly");
                    break;
                }
            }
            self.report(&events);
        }
        self.report(&events);
        info!(message = "stopped following", state = ?session.state());
        Ok(())
    }
}
