use crate::{
    error::Error,
    joints::{Joint, JointAngles, PerJoint},
};
use std::{collections::BTreeMap, path::Path};

/// Weight given to a joint the reference does not weigh explicitly.
pub(crate) const DEFAULT_WEIGHT: f32 = 1.0;

/// Target angle per joint; joints without a target are not scored.
pub(crate) type JointTargets = PerJoint<Option<f32>>;

/// Relative importance per joint.
pub(crate) type JointWeights = PerJoint<Option<f32>>;

/// The target geometry for one training pose.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub(crate) struct ReferencePose {
    pub(crate) angles: JointTargets,
    #[serde(default)]
    pub(crate) weights: JointWeights,
}

impl ReferencePose {
    pub(crate) fn new(angles: JointTargets, weights: JointWeights) -> Self {
        Self { angles, weights }
    }

    /// Effective weight of `joint`. Missing, zero, negative and non-finite
    /// weights all fall back to [`DEFAULT_WEIGHT`].
    pub(crate) fn weight(&self, joint: Joint) -> f32 {
        match self.weights[joint] {
            Some(weight) if weight.is_finite() && weight > 0.0 => weight,
            _ => DEFAULT_WEIGHT,
        }
    }

    /// Record the learner's current stance as a reference with unit weights.
    pub(crate) fn capture(angles: &JointAngles) -> Self {
        Self::new(
            JointTargets::from_fn(|joint| Some(angles[joint])),
            JointWeights::default(),
        )
    }

    #[cfg(test)]
    pub(crate) fn target(mut self, joint: Joint, angle: f32) -> Self {
        self.angles[joint] = Some(angle);
        self
    }

    #[cfg(test)]
    pub(crate) fn weighted(mut self, joint: Joint, weight: f32) -> Self {
        self.weights[joint] = Some(weight);
        self
    }
}

/// Reference poses keyed by reference key, in the `{"poses": {...}}` layout.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub(crate) struct ReferenceStore {
    poses: BTreeMap<String, ReferencePose>,
}

impl ReferenceStore {
    pub(crate) fn from_json(json: &str) -> Result<Self, Error> {
        serde_json::from_str(json).map_err(Error::ParseReferences)
    }

    pub(crate) fn load<P>(path: P) -> Result<Self, Error>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| Error::ReadFile(e, path.to_owned()))?;
        Self::from_json(&content)
    }

    pub(crate) fn to_json(&self) -> Result<String, Error> {
        serde_json::to_string_pretty(self).map_err(Error::SerializeReferences)
    }

    pub(crate) fn save<P>(&self, path: P) -> Result<(), Error>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        std::fs::write(path, self.to_json()?).map_err(|e| Error::WriteFile(e, path.to_owned()))
    }

    pub(crate) fn get(&self, key: &str) -> Option<&ReferencePose> {
        self.poses.get(key)
    }

    pub(crate) fn insert<K>(&mut self, key: K, pose: ReferencePose) -> Option<ReferencePose>
    where
        K: Into<String>,
    {
        self.poses.insert(key.into(), pose)
    }

    pub(crate) fn len(&self) -> usize {
        self.poses.len()
    }
}

/// One step of a training module.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PoseSpec {
    pub(crate) id: String,
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) description: String,
    #[serde(default)]
    pub(crate) key_points: Vec<String>,
    pub(crate) reference_key: String,
    #[serde(default)]
    pub(crate) skippable: bool,
}

impl PoseSpec {
    pub(crate) fn new<I, N, R>(id: I, name: N, reference_key: R) -> Self
    where
        I: Into<String>,
        N: Into<String>,
        R: Into<String>,
    {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            key_points: Vec::new(),
            reference_key: reference_key.into(),
            skippable: false,
        }
    }

    fn described(mut self, description: &str, key_points: &[&str]) -> Self {
        self.description = description.to_owned();
        self.key_points = key_points.iter().map(|&point| point.to_owned()).collect();
        self
    }

    pub(crate) fn skippable(mut self) -> Self {
        self.skippable = true;
        self
    }
}

/// An ordered sequence of poses trained one after another.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub(crate) struct TrainingModule {
    pub(crate) name: String,
    pub(crate) poses: Vec<PoseSpec>,
}

impl TrainingModule {
    pub(crate) fn new<N>(name: N, poses: Vec<PoseSpec>) -> Result<Self, Error>
    where
        N: Into<String>,
    {
        if poses.is_empty() {
            return Err(Error::EmptyModule);
        }
        Ok(Self {
            name: name.into(),
            poses,
        })
    }

    pub(crate) fn from_json(json: &str) -> Result<Self, Error> {
        let module: Self = serde_json::from_str(json).map_err(Error::ParseModule)?;
        Self::new(module.name, module.poses)
    }

    pub(crate) fn load<P>(path: P) -> Result<Self, Error>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| Error::ReadFile(e, path.to_owned()))?;
        Self::from_json(&content)
    }

    /// Reference keys used by the module that `store` has no entry for.
    pub(crate) fn missing_references<'a>(&'a self, store: &ReferenceStore) -> Vec<&'a str> {
        self.poses
            .iter()
            .map(|pose| pose.reference_key.as_str())
            .filter(|key| store.get(key).is_none())
            .collect()
    }

    /// The built-in first module: guards, blocks and the crane.
    pub(crate) fn module_one() -> Self {
        Self {
            name: "Module 1: Defensive Fundamentals".to_owned(),
            poses: vec![
                PoseSpec::new("1", "Guard Position Right Jab", "guardRight").described(
                    "Maintain a balanced defensive stance with hands raised",
                    &[
                        "Feet shoulder-width apart",
                        "Hands at face level",
                        "Weight evenly distributed",
                        "Eyes focused forward",
                    ],
                ),
                PoseSpec::new("2", "Guard Position Left Jab", "guardLeft").described(
                    "Lower defensive position ready to block incoming attacks",
                    &[
                        "Slight crouch",
                        "Arms positioned to protect body",
                        "Quick reaction posture",
                        "Stable base",
                    ],
                ),
                PoseSpec::new("3", "Basic Block with Right Hand", "basicBlockRight").described(
                    "Execute a fundamental blocking movement",
                    &[
                        "Forearm parallel to ground",
                        "Elbow at 90 degrees",
                        "Strong defensive position",
                        "Ready to counter",
                    ],
                ),
                PoseSpec::new("4", "Basic Block with Left Hand", "basicBlockLeft").described(
                    "Return to neutral combat-ready stance",
                    &[
                        "Relaxed but alert",
                        "Hands at sides",
                        "Weight balanced",
                        "Ready to react",
                    ],
                ),
                PoseSpec::new("5", "Crane Stance", "crane")
                    .described(
                        "Crane stance",
                        &["Hands at sides", "Weight balanced", "Ready to react"],
                    )
                    .skippable(),
                PoseSpec::new("6", "Crane Kick!", "craneKick")
                    .described(
                        "Crane kick",
                        &["Hands at sides", "Weight balanced", "Just Kick!"],
                    )
                    .skippable(),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ReferencePose, ReferenceStore, TrainingModule, DEFAULT_WEIGHT};
    use crate::joints::{Joint, JointAngles};

    const REFERENCES: &str = r#"{
        "poses": {
            "guardRight": {
                "angles": {"leftElbow": 120, "rightElbow": 35, "leftShoulder": 40},
                "weights": {"leftElbow": 2.0, "rightElbow": 0}
            },
            "crane": {
                "angles": {"leftKnee": 90}
            }
        }
    }"#;

    #[test]
    fn parse_reference_table() {
        let store = ReferenceStore::from_json(REFERENCES).unwrap();
        assert_eq!(store.len(), 2);

        let guard = store.get("guardRight").unwrap();
        assert_eq!(guard.angles[Joint::LeftElbow], Some(120.0));
        assert_eq!(guard.angles[Joint::LeftKnee], None);
        assert_eq!(guard.weight(Joint::LeftElbow), 2.0);
        // zero weight behaves like a missing one
        assert_eq!(guard.weight(Joint::RightElbow), DEFAULT_WEIGHT);
        assert_eq!(guard.weight(Joint::LeftShoulder), DEFAULT_WEIGHT);

        let crane = store.get("crane").unwrap();
        assert!(crane.weights.is_empty());
    }

    #[test]
    fn malformed_table_is_an_error() {
        assert!(ReferenceStore::from_json(r#"{"poses": {"x": {"weights": {}}}}"#).is_err());
    }

    #[test]
    fn captured_reference_survives_serialization() {
        let mut angles = JointAngles::default();
        angles[Joint::LeftKnee] = 92.0;
        angles[Joint::RightElbow] = 15.0;

        let mut store = ReferenceStore::default();
        store.insert("custom", ReferencePose::capture(&angles));
        let parsed = ReferenceStore::from_json(&store.to_json().unwrap()).unwrap();

        let custom = parsed.get("custom").unwrap();
        assert_eq!(custom.angles[Joint::LeftKnee], Some(92.0));
        assert_eq!(custom.angles[Joint::RightElbow], Some(15.0));
        assert_eq!(custom.weight(Joint::LeftKnee), DEFAULT_WEIGHT);
    }

    #[test]
    fn module_one_layout() {
        let module = TrainingModule::module_one();
        assert_eq!(module.poses.len(), 6);
        assert_eq!(module.poses[0].reference_key, "guardRight");
        assert!(!module.poses[3].skippable);
        assert!(module.poses[4].skippable && module.poses[5].skippable);
    }

    #[test]
    fn module_json_requires_poses() {
        assert!(TrainingModule::from_json(r#"{"name": "empty", "poses": []}"#).is_err());
        let module = TrainingModule::from_json(
            r#"{"name": "m", "poses": [{"id": "a", "name": "A", "referenceKey": "guardRight"}]}"#,
        )
        .unwrap();
        assert_eq!(module.poses[0].key_points.len(), 0);
    }

    #[test]
    fn bundled_references_cover_module_one() {
        let store = ReferenceStore::from_json(include_str!("../data/references.json")).unwrap();
        assert!(TrainingModule::module_one()
            .missing_references(&store)
            .is_empty());
    }

    #[test]
    fn missing_references_are_listed() {
        let store = ReferenceStore::from_json(REFERENCES).unwrap();
        let module = TrainingModule::module_one();
        assert_eq!(
            module.missing_references(&store),
            vec!["guardLeft", "basicBlockRight", "basicBlockLeft", "craneKick"]
        );
    }
}
