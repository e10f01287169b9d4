use crate::{
    joints::{Joint, JointAngles, PerJoint},
    reference::ReferencePose,
};
use ordered_float::NotNan;

pub(crate) const DEFAULT_TOLERANCE_DEGREES: f32 = 10.0;
pub(crate) const DEFAULT_PENALTY_PER_DEGREE: f32 = 2.0;

/// Accuracy at exactly `tolerance` degrees of error.
const TOLERANCE_BOUNDARY_ACCURACY: f32 = 90.0;

#[derive(Debug, Clone, Copy, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub(crate) struct ScoringConfig {
    /// Error in degrees still considered "on target" (100% down to 90%).
    pub(crate) tolerance: f32,
    /// Accuracy points lost per degree beyond the tolerance.
    pub(crate) penalty_per_degree: f32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE_DEGREES,
            penalty_per_degree: DEFAULT_PENALTY_PER_DEGREE,
        }
    }
}

/// Accuracy percentage per joint; `None` where the reference has no target.
pub(crate) type JointAccuracies = PerJoint<Option<f32>>;

#[derive(Debug, Clone, Copy, PartialEq, Default, serde::Serialize)]
pub(crate) struct AccuracyReport {
    pub(crate) per_joint: JointAccuracies,
    pub(crate) overall: f32,
}

impl AccuracyReport {
    /// The scored joint furthest from its target, first in joint order on ties.
    pub(crate) fn weakest_joint(&self) -> Option<(Joint, f32)> {
        self.per_joint
            .iter()
            .filter_map(|(joint, accuracy)| {
                let accuracy = NotNan::new(accuracy?).ok()?;
                Some((accuracy, joint))
            })
            .min()
            .map(|(accuracy, joint)| (joint, accuracy.into_inner()))
    }
}

/// Accuracy of a single joint given its absolute error in degrees.
pub(crate) fn joint_accuracy(error: f32, config: &ScoringConfig) -> f32 {
    if !error.is_finite() {
        return 0.0;
    }

    let error = error.abs();
    let tolerance = config.tolerance;
    if error <= tolerance {
        if tolerance <= 0.0 {
            return 100.0;
        }
        100.0 - (error / tolerance) * (100.0 - TOLERANCE_BOUNDARY_ACCURACY)
    } else {
        let excess = error - tolerance;
        (TOLERANCE_BOUNDARY_ACCURACY - excess * config.penalty_per_degree).max(0.0)
    }
}

/// Compare the current joint angles against `reference`.
///
/// Without a reference nothing is scored and the overall accuracy is 0.
pub(crate) fn score_accuracy(
    current: &JointAngles,
    reference: Option<&ReferencePose>,
    config: &ScoringConfig,
) -> AccuracyReport {
    let reference = match reference {
        Some(reference) => reference,
        None => return AccuracyReport::default(),
    };

    let per_joint = JointAccuracies::from_fn(|joint| {
        let target = reference.angles[joint]?;
        let actual = current[joint];
        Some(if target.is_finite() && actual.is_finite() {
            joint_accuracy(actual - target, config)
        } else {
            0.0
        })
    });

    let (weighted_total, total_weight) = per_joint
        .iter()
        .filter_map(|(joint, accuracy)| accuracy.map(|accuracy| (joint, accuracy)))
        .fold((0.0, 0.0), |(total, weights), (joint, accuracy)| {
            let weight = reference.weight(joint);
            (total + accuracy * weight, weights + weight)
        });

    let overall = if total_weight > 0.0 {
        weighted_total / total_weight
    } else {
        0.0
    };

    AccuracyReport { per_joint, overall }
}
