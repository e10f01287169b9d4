use crate::error::Error;
use num_traits::{FromPrimitive, ToPrimitive};

/// Landmark numbering produced by the pose estimator (MediaPipe Pose, 33 points).
#[derive(Debug, Copy, Clone, PartialEq, Eq, num_derive::FromPrimitive, num_derive::ToPrimitive)]
pub(crate) enum LandmarkKind {
    Nose,
    LeftEyeInner,
    LeftEye,
    LeftEyeOuter,
    RightEyeInner,
    RightEye,
    RightEyeOuter,
    LeftEar,
    RightEar,
    MouthLeft,
    MouthRight,
    LeftShoulder,
    RightShoulder,
    LeftElbow,
    RightElbow,
    LeftWrist,
    RightWrist,
    LeftPinky,
    RightPinky,
    LeftIndex,
    RightIndex,
    LeftThumb,
    RightThumb,
    LeftHip,
    RightHip,
    LeftKnee,
    RightKnee,
    LeftAnkle,
    RightAnkle,
    LeftHeel,
    RightHeel,
    LeftFootIndex,
    RightFootIndex,
}

impl LandmarkKind {
    pub(crate) fn from_idx(index: usize) -> Result<Self, Error> {
        Self::from_usize(index).ok_or(Error::ConvertUSizeToLandmarkKind(index))
    }
}

pub(crate) const NUM_LANDMARKS: usize = 33;

fn default_visibility() -> f32 {
    1.0
}

/// One estimated body keypoint in normalized frame coordinates.
#[derive(Debug, Copy, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub(crate) struct Landmark {
    pub(crate) x: f32,
    pub(crate) y: f32,
    pub(crate) z: f32,
    #[serde(default = "default_visibility")]
    pub(crate) visibility: f32,
}

impl Landmark {
    pub(crate) fn new(x: f32, y: f32, z: f32) -> Self {
        Self {
            x,
            y,
            z,
            visibility: 1.0,
        }
    }

    pub(crate) fn with_visibility(self, visibility: f32) -> Self {
        Self { visibility, ..self }
    }
}

/// All landmarks of one frame, indexed by [`LandmarkKind`].
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct LandmarkSet {
    landmarks: Vec<Landmark>,
}

impl LandmarkSet {
    pub(crate) fn new(landmarks: Vec<Landmark>) -> Self {
        Self { landmarks }
    }

    pub(crate) fn len(&self) -> usize {
        self.landmarks.len()
    }

    /// Whether every index the joint extractor reads is present.
    pub(crate) fn is_complete(&self) -> bool {
        self.landmarks.len() >= NUM_LANDMARKS
    }

    pub(crate) fn get(&self, kind: LandmarkKind) -> Option<&Landmark> {
        kind.to_usize().and_then(|index| self.landmarks.get(index))
    }

    #[cfg(test)]
    pub(crate) fn set(&mut self, kind: LandmarkKind, landmark: Landmark) {
        if let Some(slot) = kind.to_usize().and_then(|index| self.landmarks.get_mut(index)) {
            *slot = landmark;
        }
    }

    /// Named landmarks whose visibility is below `threshold`.
    pub(crate) fn poorly_visible(&self, threshold: f32) -> Result<Vec<LandmarkKind>, Error> {
        self.landmarks
            .iter()
            .take(NUM_LANDMARKS)
            .enumerate()
            .filter(|(_, landmark)| landmark.visibility < threshold)
            .map(|(index, _)| LandmarkKind::from_idx(index))
            .collect()
    }
}

impl From<Vec<Landmark>> for LandmarkSet {
    fn from(landmarks: Vec<Landmark>) -> Self {
        Self::new(landmarks)
    }
}

pub(crate) mod constants {
    use crate::pose::LandmarkKind::{self, *};

    /// Body side as the learner perceives it on the mirrored camera preview.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub(crate) enum Side {
        Left,
        Right,
    }

    #[derive(Debug, Copy, Clone)]
    pub(crate) struct Limbs {
        pub(crate) shoulder: LandmarkKind,
        pub(crate) elbow: LandmarkKind,
        pub(crate) wrist: LandmarkKind,
        pub(crate) hip: LandmarkKind,
        pub(crate) knee: LandmarkKind,
        pub(crate) ankle: LandmarkKind,
    }

    // The preview is mirrored, so the side the learner calls "my left" is the
    // estimator's Left* landmarks. Reference poses were recorded with this
    // mapping; flipping it swaps every left/right comparison.
    pub(crate) const MIRRORED_SIDES: [(Side, Limbs); 2] = [
        (
            Side::Left,
            Limbs {
                shoulder: LeftShoulder,
                elbow: LeftElbow,
                wrist: LeftWrist,
                hip: LeftHip,
                knee: LeftKnee,
                ankle: LeftAnkle,
            },
        ),
        (
            Side::Right,
            Limbs {
                shoulder: RightShoulder,
                elbow: RightElbow,
                wrist: RightWrist,
                hip: RightHip,
                knee: RightKnee,
                ankle: RightAnkle,
            },
        ),
    ];

    pub(crate) fn limbs(side: Side) -> Limbs {
        match side {
            Side::Left => MIRRORED_SIDES[0].1,
            Side::Right => MIRRORED_SIDES[1].1,
        }
    }
}
