use crate::{
    clock::Clock,
    session::{PoseCompletion, Session, BASELINE_SCORE, POSE_BONUS},
};
use std::{convert::TryFrom, fmt, time::Duration};

/// Accuracy difference, in points, below which two players are considered even.
const ACCURACY_TIE: f32 = 0.1;

/// Time difference below which two players are considered even.
const TIME_TIE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize)]
pub(crate) enum Rating {
    Poor,
    Good,
    Great,
    Excellent,
}

impl Rating {
    pub(crate) fn from_percentage(percentage: f32) -> Self {
        if percentage >= 90.0 {
            Rating::Excellent
        } else if percentage >= 80.0 {
            Rating::Great
        } else if percentage >= 70.0 {
            Rating::Good
        } else {
            Rating::Poor
        }
    }
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Rating::Excellent => "EXCELLENT",
            Rating::Great => "GREAT",
            Rating::Good => "GOOD",
            Rating::Poor => "POOR",
        })
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub(crate) struct SessionSummary {
    pub(crate) module: String,
    pub(crate) score: u32,
    pub(crate) max_score: u32,
    pub(crate) poses_total: usize,
    pub(crate) poses_completed: usize,
    /// Mean of the best accuracy reached on each pose attempted.
    pub(crate) average_accuracy: f32,
    pub(crate) total_time: Duration,
    pub(crate) poses: Vec<PoseCompletion>,
    /// Closing remarks from the feedback generator, when one ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) coaching: Option<String>,
}

impl SessionSummary {
    pub(crate) fn from_session<C>(session: &Session<C>) -> Self
    where
        C: Clock,
    {
        let poses = session.completions().to_vec();
        let average_accuracy = if poses.is_empty() {
            0.0
        } else {
            poses.iter().map(|pose| pose.best_accuracy).sum::<f32>() / poses.len() as f32
        };
        let poses_total = session.module().poses.len();
        let bonus = u32::try_from(poses_total)
            .unwrap_or(u32::MAX)
            .saturating_mul(POSE_BONUS);

        Self {
            module: session.module().name.clone(),
            score: session.score(),
            max_score: BASELINE_SCORE.saturating_add(bonus),
            poses_total,
            poses_completed: poses.iter().filter(|pose| pose.completed).count(),
            average_accuracy,
            total_time: session.training_time(),
            poses,
            coaching: None,
        }
    }

    pub(crate) fn percentage(&self) -> f32 {
        if self.max_score == 0 {
            return 0.0;
        }
        self.score as f32 / self.max_score as f32 * 100.0
    }

    pub(crate) fn rating(&self) -> Rating {
        Rating::from_percentage(self.percentage())
    }

    pub(crate) fn poses_skipped(&self) -> usize {
        self.poses.len().saturating_sub(self.poses_completed)
    }
}

pub(crate) fn minutes_seconds(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{}:{:02}", secs / 60, secs % 60)
}

impl fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.module)?;
        writeln!(
            f,
            "score {}/{} ({:.0}%, {})",
            self.score,
            self.max_score,
            self.percentage(),
            self.rating()
        )?;
        writeln!(
            f,
            "poses {}/{} · accuracy {:.1}% · time {}",
            self.poses_completed,
            self.poses_total,
            self.average_accuracy,
            minutes_seconds(self.total_time)
        )?;
        for pose in &self.poses {
            let time = pose
                .elapsed
                .map_or_else(|| "skipped".to_owned(), minutes_seconds);
            writeln!(
                f,
                "  {:>2}. {:<8} {:>5.1}% {:<9} {}",
                pose.pose_index + 1,
                pose.pose_id,
                pose.best_accuracy,
                Rating::from_percentage(pose.best_accuracy),
                time
            )?;
        }
        if let Some(coaching) = self.coaching.as_ref() {
            writeln!(f, "coach: {}", coaching)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    First,
    Second,
    Tie,
}

/// Rank two players: higher average accuracy wins, then the faster total time.
pub(crate) fn compare(first: &SessionSummary, second: &SessionSummary) -> Outcome {
    let accuracy_gap = first.average_accuracy - second.average_accuracy;
    if accuracy_gap.abs() >= ACCURACY_TIE {
        return if accuracy_gap > 0.0 {
            Outcome::First
        } else {
            Outcome::Second
        };
    }

    let (faster, gap) = if first.total_time <= second.total_time {
        (Outcome::First, second.total_time - first.total_time)
    } else {
        (Outcome::Second, first.total_time - second.total_time)
    };
    if gap < TIME_TIE {
        Outcome::Tie
    } else {
        faster
    }
}
