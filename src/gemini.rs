use crate::{
    error::Error,
    feedback::{FeedbackGenerator, FeedbackRequest},
    summary::SessionSummary,
};
#[cfg(any(test, feature = "gemini"))]
use crate::summary::minutes_seconds;

pub(crate) const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub(crate) const DEFAULT_MODEL: &str = "gemini-2.5-flash";

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub(crate) struct GeminiConfig {
    pub(crate) base_url: String,
    pub(crate) model: String,
    pub(crate) timeout_secs: u64,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            model: DEFAULT_MODEL.to_owned(),
            timeout_secs: 10,
        }
    }
}

/// Coaching feedback from the Gemini `generateContent` API.
///
/// Without the `gemini` feature every request fails with
/// [`Error::FeedbackUnavailable`], so callers fall back to the canned texts.
pub(crate) struct GeminiFeedback {
    #[cfg(feature = "gemini")]
    api_key: String,
    #[cfg(feature = "gemini")]
    config: GeminiConfig,
    #[cfg(feature = "gemini")]
    client: reqwest::blocking::Client,
}

impl GeminiFeedback {
    pub(crate) fn new(api_key: String, config: GeminiConfig) -> Result<Self, Error> {
        if api_key.trim().is_empty() {
            return Err(Error::FeedbackUnavailable("the Gemini API key is empty"));
        }

        #[cfg(feature = "gemini")]
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(Error::FeedbackRequest)?;

        #[cfg(not(feature = "gemini"))]
        tracing::warn!(
            message = "built without the `gemini` feature, using fallback feedback",
            model = %config.model
        );

        Ok(Self {
            #[cfg(feature = "gemini")]
            api_key,
            #[cfg(feature = "gemini")]
            config,
            #[cfg(feature = "gemini")]
            client,
        })
    }

    #[cfg(feature = "gemini")]
    fn ask(&self, prompt: &str) -> Result<String, Error> {
        let endpoint = endpoint(&self.config);
        tracing::debug!(
            message = "requesting feedback",
            %endpoint,
            timeout_secs = self.config.timeout_secs
        );
        let response = self
            .client
            .post(endpoint)
            .query(&[("key", self.api_key.as_str())])
            .json(&request_body(prompt))
            .send()
            .and_then(reqwest::blocking::Response::error_for_status)
            .map_err(Error::FeedbackRequest)?
            .text()
            .map_err(Error::FeedbackRequest)?;
        response_text(&response)
    }

    #[cfg(not(feature = "gemini"))]
    fn ask(&self, _prompt: &str) -> Result<String, Error> {
        Err(Error::FeedbackUnavailable(
            "built without the `gemini` feature",
        ))
    }
}

impl FeedbackGenerator for GeminiFeedback {
    #[cfg(feature = "gemini")]
    fn generate(&self, request: &FeedbackRequest) -> Result<String, Error> {
        self.ask(&prompt(request))
    }

    #[cfg(not(feature = "gemini"))]
    fn generate(&self, _request: &FeedbackRequest) -> Result<String, Error> {
        self.ask("")
    }

    #[cfg(feature = "gemini")]
    fn review(&self, summary: &SessionSummary) -> Result<String, Error> {
        self.ask(&session_prompt(summary))
    }

    #[cfg(not(feature = "gemini"))]
    fn review(&self, _summary: &SessionSummary) -> Result<String, Error> {
        self.ask("")
    }
}

#[cfg(any(test, feature = "gemini"))]
fn endpoint(config: &GeminiConfig) -> String {
    format!(
        "{}/v1beta/models/{}:generateContent",
        config.base_url.trim_end_matches('/'),
        config.model
    )
}

/// The coaching prompt sent to the model.
#[cfg(any(test, feature = "gemini"))]
pub(crate) fn prompt(request: &FeedbackRequest) -> String {
    let reference = serde_json::to_string(&request.reference_angles).unwrap_or_default();
    let current = serde_json::to_string(&request.current_angles).unwrap_or_default();
    format!(
        "You are a martial arts instructor providing feedback on pose training.\n\
         \n\
         Pose Name: {name}\n\
         Pose Description: {description}\n\
         Key Points: {key_points}\n\
         Accuracy: {accuracy:.1}%\n\
         Reference Angles: {reference}\n\
         Current Angles: {current}\n\
         \n\
         Provide constructive feedback in at most one short sentence so the user can \
         improve their form. Say which joint to adjust and in which direction, for \
         example \"Your left elbow is too high, try bringing it down\". Keep the tone \
         positive. The user passes the pose at 90% overall accuracy or more; accuracy \
         is the weighted mean of per-joint scores with a 10 degree tolerance.",
        name = request.pose_name,
        description = request.pose_description,
        key_points = request.key_points.join("; "),
        accuracy = request.accuracy,
        reference = reference,
        current = current,
    )
}

/// The end-of-session prompt.
#[cfg(any(test, feature = "gemini"))]
pub(crate) fn session_prompt(summary: &SessionSummary) -> String {
    format!(
        "You are a martial arts instructor providing overall training session feedback.\n\
         \n\
         Session Summary:\n\
         - Module: {module}\n\
         - Total Score: {score}/{max_score}\n\
         - Average Accuracy: {accuracy:.1}%\n\
         - Total Time: {time}\n\
         - Poses Completed: {completed}/{total}\n\
         \n\
         Provide comprehensive feedback in 3-4 sentences covering the overall \
         performance, specific strengths shown, areas to focus on in future sessions, \
         and encouragement. Keep the tone positive, professional, and motivating.",
        module = summary.module,
        score = summary.score,
        max_score = summary.max_score,
        accuracy = summary.average_accuracy,
        time = minutes_seconds(summary.total_time),
        completed = summary.poses_completed,
        total = summary.poses_total,
    )
}

#[cfg(any(test, feature = "gemini"))]
pub(crate) fn request_body(prompt: &str) -> serde_json::Value {
    serde_json::json!({
        "contents": [{"parts": [{"text": prompt}]}]
    })
}

#[cfg(any(test, feature = "gemini"))]
#[derive(serde::Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[cfg(any(test, feature = "gemini"))]
#[derive(serde::Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[cfg(any(test, feature = "gemini"))]
#[derive(serde::Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[cfg(any(test, feature = "gemini"))]
#[derive(serde::Deserialize)]
struct Part {
    text: Option<String>,
}

/// Text of the first candidate of a `generateContent` response.
#[cfg(any(test, feature = "gemini"))]
pub(crate) fn response_text(body: &str) -> Result<String, Error> {
    let response: GenerateContentResponse =
        serde_json::from_str(body).map_err(Error::DecodeFeedback)?;
    response
        .candidates
        .into_iter()
        .filter_map(|candidate| candidate.content)
        .flat_map(|content| content.parts)
        .filter_map(|part| part.text)
        .find(|text| !text.trim().is_empty())
        .map(|text| text.trim().to_owned())
        .ok_or(Error::EmptyFeedback)
}

#[cfg(test)]
mod tests {
    use super::{
        endpoint, prompt, request_body, response_text, session_prompt, GeminiConfig,
        GeminiFeedback,
    };
    use crate::{
        error::Error,
        feedback::FeedbackRequest,
        joints::{Joint, JointAngles},
        reference::JointTargets,
        summary::SessionSummary,
    };
    use std::time::Duration;

    fn request() -> FeedbackRequest {
        let mut reference_angles = JointTargets::default();
        reference_angles[Joint::LeftElbow] = Some(90.0);
        FeedbackRequest {
            pose_name: "Crane Stance".to_owned(),
            pose_description: "Crane stance".to_owned(),
            key_points: vec!["Hands at sides".to_owned(), "Weight balanced".to_owned()],
            accuracy: 72.25,
            reference_angles,
            current_angles: JointAngles::default(),
        }
    }

    #[test]
    fn prompt_carries_request() {
        let text = prompt(&request());
        assert!(text.contains("Pose Name: Crane Stance"));
        assert!(text.contains("Key Points: Hands at sides; Weight balanced"));
        assert!(text.contains("Accuracy: 72.2%") || text.contains("Accuracy: 72.3%"));
        assert!(text.contains(r#"Reference Angles: {"leftElbow":90.0}"#));
    }

    #[test]
    fn body_shape() {
        let body = request_body("hi");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "hi");
    }

    #[test]
    fn first_candidate_text() {
        let body = r#"{"candidates": [
            {"content": {"parts": [{"text": "  Raise your left arm a bit. \n"}]}},
            {"content": {"parts": [{"text": "ignored"}]}}
        ]}"#;
        assert_eq!(response_text(body).unwrap(), "Raise your left arm a bit.");
    }

    #[test]
    fn empty_response_is_an_error() {
        assert!(response_text(r#"{"candidates": []}"#).is_err());
        assert!(response_text("not json").is_err());
    }

    #[test]
    fn endpoint_from_config() {
        let config = GeminiConfig {
            base_url: "http://localhost:8080/".to_owned(),
            ..Default::default()
        };
        assert_eq!(
            endpoint(&config),
            "http://localhost:8080/v1beta/models/gemini-2.5-flash:generateContent"
        );
    }

    #[test]
    fn empty_api_key_is_rejected() {
        assert!(matches!(
            GeminiFeedback::new("  ".to_owned(), GeminiConfig::default()),
            Err(Error::FeedbackUnavailable(_))
        ));
    }

    fn summary() -> SessionSummary {
        SessionSummary {
            module: "Module 1: Defensive Fundamentals".to_owned(),
            score: 120,
            max_score: 130,
            poses_total: 6,
            poses_completed: 4,
            average_accuracy: 81.5,
            total_time: Duration::from_secs(95),
            poses: Vec::new(),
            coaching: None,
        }
    }

    #[test]
    fn session_prompt_carries_summary() {
        let text = session_prompt(&summary());
        assert!(text.contains("- Total Score: 120/130"), "{}", text);
        assert!(text.contains("- Average Accuracy: 81.5%"), "{}", text);
        assert!(text.contains("- Total Time: 1:35"), "{}", text);
        assert!(text.contains("- Poses Completed: 4/6"), "{}", text);
    }

    #[cfg(not(feature = "gemini"))]
    #[test]
    fn review_without_the_feature_falls_back() {
        use crate::feedback::{review_or_fallback, SESSION_FALLBACK_FEEDBACK};

        let gemini = GeminiFeedback::new("key".to_owned(), GeminiConfig::default()).unwrap();
        assert_eq!(review_or_fallback(&gemini, &summary()), SESSION_FALLBACK_FEEDBACK);
    }
}
