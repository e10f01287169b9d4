pub(crate) const DEFAULT_HOLD_THRESHOLD: f32 = 90.0;
pub(crate) const DEFAULT_HOLD_SECONDS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub(crate) struct HoldConfig {
    /// Minimum overall accuracy, in percent, that counts towards the hold.
    pub(crate) threshold: f32,
    /// Consecutive qualifying ticks needed to complete the pose.
    pub(crate) seconds: u32,
}

impl Default for HoldConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_HOLD_THRESHOLD,
            seconds: DEFAULT_HOLD_SECONDS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub(crate) struct HoldState {
    pub(crate) active: bool,
    pub(crate) elapsed_seconds: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HoldEvent {
    /// Below threshold and nothing to reset.
    Idle,
    /// The first qualifying tick of a new hold.
    Started,
    /// Still holding, with the number of qualifying ticks so far.
    Progress(u32),
    /// A hold in progress was broken.
    Reset,
    /// The hold lasted long enough; the timer is idle again.
    Completed,
}

/// Counts consecutive one-second ticks at or above the accuracy threshold.
#[derive(Debug, Clone)]
pub(crate) struct HoldTimer {
    config: HoldConfig,
    state: HoldState,
}

impl HoldTimer {
    pub(crate) fn new(config: HoldConfig) -> Self {
        Self {
            config,
            state: HoldState::default(),
        }
    }

    pub(crate) fn state(&self) -> HoldState {
        self.state
    }

    pub(crate) fn config(&self) -> &HoldConfig {
        &self.config
    }

    /// Back to idle regardless of accuracy (pause, pose change).
    pub(crate) fn reset(&mut self) {
        self.state = HoldState::default();
    }

    /// Advance by one tick using the latest overall accuracy.
    pub(crate) fn tick(&mut self, accuracy: f32) -> HoldEvent {
        // NaN compares false and so never qualifies
        if !(accuracy >= self.config.threshold) {
            let was_active = self.state.active;
            self.reset();
            return if was_active {
                HoldEvent::Reset
            } else {
                HoldEvent::Idle
            };
        }

        let started = !self.state.active;
        self.state.active = true;
        self.state.elapsed_seconds += 1;

        if self.state.elapsed_seconds >= self.config.seconds {
            self.reset();
            HoldEvent::Completed
        } else if started {
            HoldEvent::Started
        } else {
            HoldEvent::Progress(self.state.elapsed_seconds)
        }
    }
}

impl Default for HoldTimer {
    fn default() -> Self {
        Self::new(HoldConfig::default())
    }
}
