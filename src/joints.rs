use crate::{
    error::Error,
    geometry::{angle_between, Point3},
    pose::{
        constants::{limbs, Side},
        LandmarkKind, LandmarkSet,
    },
};
use serde::ser::SerializeMap;
use std::{
    collections::BTreeMap,
    fmt,
    ops::{Index, IndexMut},
    str::FromStr,
};
use tracing::warn;

pub(crate) const NUM_JOINTS: usize = 6;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) enum Joint {
    LeftShoulder,
    RightShoulder,
    LeftElbow,
    RightElbow,
    LeftKnee,
    RightKnee,
}

impl Joint {
    pub(crate) const ALL: [Joint; NUM_JOINTS] = [
        Joint::LeftShoulder,
        Joint::RightShoulder,
        Joint::LeftElbow,
        Joint::RightElbow,
        Joint::LeftKnee,
        Joint::RightKnee,
    ];

    /// Wire name, as used by reference tables and feedback prompts.
    pub(crate) fn name(self) -> &'static str {
        match self {
            Joint::LeftShoulder => "leftShoulder",
            Joint::RightShoulder => "rightShoulder",
            Joint::LeftElbow => "leftElbow",
            Joint::RightElbow => "rightElbow",
            Joint::LeftKnee => "leftKnee",
            Joint::RightKnee => "rightKnee",
        }
    }

    /// Human readable name, e.g. "left elbow".
    pub(crate) fn label(self) -> &'static str {
        match self {
            Joint::LeftShoulder => "left shoulder",
            Joint::RightShoulder => "right shoulder",
            Joint::LeftElbow => "left elbow",
            Joint::RightElbow => "right elbow",
            Joint::LeftKnee => "left knee",
            Joint::RightKnee => "right knee",
        }
    }

    pub(crate) fn side(self) -> Side {
        match self {
            Joint::LeftShoulder | Joint::LeftElbow | Joint::LeftKnee => Side::Left,
            Joint::RightShoulder | Joint::RightElbow | Joint::RightKnee => Side::Right,
        }
    }

    /// Landmarks `(endpoint, vertex, endpoint)` measured for this joint and how
    /// the raw angle is reported.
    fn triplet(self) -> (LandmarkKind, LandmarkKind, LandmarkKind, Reading) {
        let limbs = limbs(self.side());
        match self {
            Joint::LeftShoulder | Joint::RightShoulder => {
                (limbs.elbow, limbs.shoulder, limbs.hip, Reading::Angle)
            }
            Joint::LeftElbow | Joint::RightElbow => {
                (limbs.wrist, limbs.elbow, limbs.shoulder, Reading::Bend)
            }
            Joint::LeftKnee | Joint::RightKnee => {
                (limbs.ankle, limbs.knee, limbs.hip, Reading::Angle)
            }
        }
    }
}

impl fmt::Display for Joint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Joint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Joint::ALL
            .iter()
            .copied()
            .find(|joint| joint.name() == s)
            .ok_or_else(|| Error::UnknownJoint(s.to_owned()))
    }
}

#[derive(Debug, Copy, Clone)]
enum Reading {
    /// The interior angle at the vertex.
    Angle,
    /// `180 - angle`: 0 is a straight limb, larger is more bent.
    Bend,
}

/// One value per [`Joint`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub(crate) struct PerJoint<T>([T; NUM_JOINTS]);

impl<T> PerJoint<T>
where
    T: Copy + Default,
{
    pub(crate) fn from_fn<F>(mut f: F) -> Self
    where
        F: FnMut(Joint) -> T,
    {
        let mut values = [T::default(); NUM_JOINTS];
        for (value, &joint) in values.iter_mut().zip(Joint::ALL.iter()) {
            *value = f(joint);
        }
        Self(values)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (Joint, T)> + '_ {
        Joint::ALL.iter().copied().zip(self.0.iter().copied())
    }
}

impl<T> Index<Joint> for PerJoint<T> {
    type Output = T;

    fn index(&self, joint: Joint) -> &Self::Output {
        &self.0[joint as usize]
    }
}

impl<T> IndexMut<Joint> for PerJoint<T> {
    fn index_mut(&mut self, joint: Joint) -> &mut Self::Output {
        &mut self.0[joint as usize]
    }
}

impl PerJoint<Option<f32>> {
    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.0.iter().all(Option::is_none)
    }
}

impl serde::Serialize for PerJoint<f32> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_map(self.iter().map(|(joint, value)| (joint.name(), value)))
    }
}

impl serde::Serialize for PerJoint<Option<f32>> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut map = serializer.serialize_map(None)?;
        for (joint, value) in self.iter() {
            if let Some(value) = value {
                map.serialize_entry(joint.name(), &value)?;
            }
        }
        map.end()
    }
}

impl<'de> serde::Deserialize<'de> for PerJoint<Option<f32>> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = BTreeMap::<String, f32>::deserialize(deserializer)?;
        let mut values = Self::default();
        for (name, value) in raw {
            match name.parse::<Joint>() {
                Ok(joint) => values[joint] = Some(value),
                Err(_) => warn!(message = "ignoring unknown joint", joint = %name),
            }
        }
        Ok(values)
    }
}

/// Joint angles in degrees for one frame.
pub(crate) type JointAngles = PerJoint<f32>;

/// Compute the six tracked joint angles from a landmark frame.
///
/// Missing or incomplete frames produce all zeros.
pub(crate) fn extract_joint_angles(landmarks: Option<&LandmarkSet>) -> JointAngles {
    let landmarks = match landmarks {
        Some(landmarks) if landmarks.is_complete() => landmarks,
        _ => return JointAngles::default(),
    };

    JointAngles::from_fn(|joint| {
        let (a, vertex, b, reading) = joint.triplet();
        let point = |kind| landmarks.get(kind).map(Point3::from).unwrap_or_default();
        let angle = angle_between(point(a), point(vertex), point(b));
        match reading {
            Reading::Angle => angle,
            Reading::Bend => 180.0 - angle,
        }
    })
}
