//! Driver copilot and waste photo classification.
//!
//! Both talk to an external model through a trait so the model binding can be
//! swapped out. Neither ever fails the caller: the copilot answers with a
//! fixed apology and the classifier simply has no suggestion.

use std::sync::OnceLock;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use regex::Regex;
use tracing::{debug, warn};

use crate::error::Result;
use crate::model::{CollectionStatus, GeoLocation};

/// Reply used when the assistant could not be reached.
pub const FALLBACK_REPLY: &str = "Network error. Please try again.";

/// Reply used when the assistant answered with no text.
pub const EMPTY_REPLY: &str = "I couldn't find that.";

/// Standing instructions for the copilot model.
pub const COPILOT_INSTRUCTIONS: &str = "You are a savvy copilot for a waste management driver \
    in India. Help with navigation, finding fuel, mechanics, and food. Be concise.";

/// Question put to the classifier alongside the photo.
pub const CLASSIFY_PROMPT: &str = "Analyze this image of household waste. Classify it strictly \
    as one of these three: 'SEGREGATED' (if it looks cleanly separated into wet/dry bins), \
    'MIXED' (if it looks like a mess of mixed garbage), or 'REJECTED' (if it contains \
    hazardous materials, construction debris, or is completely unacceptable). \
    Return ONLY the word.";

fn data_uri_prefix() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^data:image/(png|jpg|jpeg);base64,").expect("valid data URI pattern")
    })
}

/// Who said a line in a copilot session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    /// The driver.
    Driver,
    /// The assistant.
    Assistant,
}

/// One line of a copilot session.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    /// Who said it.
    pub speaker: Speaker,
    /// What was said.
    pub text: String,
}

/// A question for the assistant.
#[derive(Debug, Clone, PartialEq)]
pub struct AssistantRequest {
    /// The driver's message.
    pub text: String,
    /// Where the driver is, when known.
    pub location: Option<GeoLocation>,
}

/// A link the assistant grounded its answer on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// Human-readable title.
    pub title: String,
    /// Target URL.
    pub link: String,
}

/// The assistant's answer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AssistantReply {
    /// Answer text.
    pub text: String,
    /// Supporting links, possibly none.
    pub references: Vec<Reference>,
}

/// A conversational model.
#[async_trait::async_trait]
pub trait Assistant: Send + Sync {
    /// Answer `request` under `instructions`, given the session so far.
    ///
    /// # Errors
    ///
    /// Returns an error if the model could not be reached.
    async fn reply(
        &self,
        instructions: &str,
        history: &[Turn],
        request: &AssistantRequest,
    ) -> Result<AssistantReply>;
}

/// A copilot conversation with a driver.
pub struct Copilot<A> {
    assistant: A,
    history: Vec<Turn>,
}

impl<A> std::fmt::Debug for Copilot<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Copilot")
            .field("turns", &self.history.len())
            .finish_non_exhaustive()
    }
}

impl<A: Assistant> Copilot<A> {
    /// Start a fresh session.
    #[must_use]
    pub fn new(assistant: A) -> Self {
        Self {
            assistant,
            history: Vec::new(),
        }
    }

    /// Lines exchanged since the last reset.
    #[must_use]
    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    /// Forget the conversation so far.
    pub fn reset(&mut self) {
        self.history.clear();
    }

    /// Ask the assistant. Blank messages are ignored and return `None`.
    ///
    /// Coordinates are forwarded only when both are non-zero.
    pub async fn ask(&mut self, text: &str, gps: Option<GeoLocation>) -> Option<AssistantReply> {
        if text.trim().is_empty() {
            return None;
        }

        let request = AssistantRequest {
            text: text.to_string(),
            location: gps.filter(|g| g.lat != 0.0 && g.lng != 0.0),
        };

        let reply = match self
            .assistant
            .reply(COPILOT_INSTRUCTIONS, &self.history, &request)
            .await
        {
            Ok(mut reply) => {
                if reply.text.trim().is_empty() {
                    reply.text = EMPTY_REPLY.to_string();
                }
                reply
                    .references
                    .retain(|r| !r.title.is_empty() && !r.link.is_empty());
                reply
            }
            Err(e) => {
                warn!(error = %e, "Copilot request failed");
                AssistantReply {
                    text: FALLBACK_REPLY.to_string(),
                    references: Vec::new(),
                }
            }
        };

        self.history.push(Turn {
            speaker: Speaker::Driver,
            text: request.text,
        });
        self.history.push(Turn {
            speaker: Speaker::Assistant,
            text: reply.text.clone(),
        });
        Some(reply)
    }
}

/// A vision model that describes a waste photo in words.
#[async_trait::async_trait]
pub trait ImageClassifier: Send + Sync {
    /// Answer `prompt` about the JPEG/PNG image in `image_base64`.
    ///
    /// # Errors
    ///
    /// Returns an error if the model could not be reached.
    async fn classify(&self, prompt: &str, image_base64: &str) -> Result<String>;
}

/// Remove a leading `data:image/...;base64,` prefix, if present.
#[must_use]
pub fn strip_data_uri_prefix(image: &str) -> &str {
    match data_uri_prefix().find(image) {
        Some(m) => &image[m.end()..],
        None => image,
    }
}

/// Map a model answer to a status. The first of SEGREGATED, MIXED, REJECTED
/// found in the answer wins.
#[must_use]
pub fn parse_classification(answer: &str) -> Option<CollectionStatus> {
    let answer = answer.trim().to_uppercase();
    if answer.contains("SEGREGATED") {
        Some(CollectionStatus::Segregated)
    } else if answer.contains("MIXED") {
        Some(CollectionStatus::Mixed)
    } else if answer.contains("REJECTED") {
        Some(CollectionStatus::Rejected)
    } else {
        None
    }
}

/// Suggest a status for a waste photo, or `None` if there is no suggestion.
pub async fn classify_image(
    classifier: &dyn ImageClassifier,
    image: &str,
) -> Option<CollectionStatus> {
    match classifier
        .classify(CLASSIFY_PROMPT, strip_data_uri_prefix(image))
        .await
    {
        Ok(answer) => {
            let status = parse_classification(&answer);
            debug!(?status, "Image classified");
            status
        }
        Err(e) => {
            warn!(error = %e, "Image classification failed");
            None
        }
    }
}

/// Encode image bytes as a `data:<mime>;base64,` URI.
#[must_use]
pub fn image_data_uri(bytes: &[u8], mime: &str) -> String {
    format!("data:{mime};base64,{}", STANDARD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use parking_lot::Mutex;

    /// Assistant that records what it was asked.
    #[derive(Default)]
    struct Recording {
        requests: Mutex<Vec<(usize, AssistantRequest)>>,
        reply: AssistantReply,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl Assistant for &Recording {
        async fn reply(
            &self,
            instructions: &str,
            history: &[Turn],
            request: &AssistantRequest,
        ) -> Result<AssistantReply> {
            assert_eq!(instructions, COPILOT_INSTRUCTIONS);
            self.requests.lock().push((history.len(), request.clone()));
            if self.fail {
                return Err(Error::collaborator("assistant", "unreachable"));
            }
            Ok(self.reply.clone())
        }
    }

    struct Canned(Option<&'static str>);

    #[async_trait::async_trait]
    impl ImageClassifier for Canned {
        async fn classify(&self, prompt: &str, image_base64: &str) -> Result<String> {
            assert_eq!(prompt, CLASSIFY_PROMPT);
            assert!(!image_base64.starts_with("data:"));
            self.0
                .map(str::to_string)
                .ok_or_else(|| Error::collaborator("classifier", "unreachable"))
        }
    }

    #[tokio::test]
    async fn test_copilot_forwards_coordinates_only_when_both_set() {
        let assistant = Recording::default();
        let mut copilot = Copilot::new(&assistant);

        copilot
            .ask("Nearest fuel?", Some(GeoLocation::new(12.9, 77.6)))
            .await
            .unwrap();
        copilot
            .ask("And a mechanic?", Some(GeoLocation::new(12.9, 0.0)))
            .await
            .unwrap();
        copilot.ask("Food?", None).await.unwrap();

        let requests = assistant.requests.lock();
        assert_eq!(requests[0].1.location, Some(GeoLocation::new(12.9, 77.6)));
        assert_eq!(requests[1].1.location, None);
        assert_eq!(requests[2].1.location, None);
    }

    #[tokio::test]
    async fn test_copilot_failure_is_generic_reply() {
        let assistant = Recording {
            fail: true,
            ..Default::default()
        };
        let mut copilot = Copilot::new(&assistant);

        let reply = copilot.ask("Where is the depot?", None).await.unwrap();
        assert_eq!(reply.text, FALLBACK_REPLY);
        assert!(reply.references.is_empty());
    }

    #[tokio::test]
    async fn test_copilot_empty_answer_and_partial_links() {
        let assistant = Recording {
            reply: AssistantReply {
                text: "  ".to_string(),
                references: vec![
                    Reference {
                        title: "Ravi Motors".to_string(),
                        link: "https://maps.example/ravi".to_string(),
                    },
                    Reference {
                        title: String::new(),
                        link: "https://maps.example/untitled".to_string(),
                    },
                ],
            },
            ..Default::default()
        };
        let mut copilot = Copilot::new(&assistant);

        let reply = copilot.ask("Mechanic?", None).await.unwrap();
        assert_eq!(reply.text, EMPTY_REPLY);
        assert_eq!(reply.references.len(), 1);
        assert_eq!(reply.references[0].title, "Ravi Motors");
    }

    #[tokio::test]
    async fn test_copilot_session_and_reset() {
        let assistant = Recording::default();
        let mut copilot = Copilot::new(&assistant);

        assert!(copilot.ask("   ", None).await.is_none());
        copilot.ask("First", None).await.unwrap();
        copilot.ask("Second", None).await.unwrap();
        assert_eq!(copilot.history().len(), 4);
        assert_eq!(copilot.history()[0].speaker, Speaker::Driver);

        copilot.reset();
        assert!(copilot.history().is_empty());
        copilot.ask("Third", None).await.unwrap();

        let seen: Vec<usize> = assistant.requests.lock().iter().map(|(n, _)| *n).collect();
        assert_eq!(seen, vec![0, 2, 0]);
    }

    #[test]
    fn test_parse_classification_order() {
        assert_eq!(parse_classification("segregated"), Some(CollectionStatus::Segregated));
        assert_eq!(parse_classification(" Mixed.\n"), Some(CollectionStatus::Mixed));
        assert_eq!(parse_classification("REJECTED"), Some(CollectionStatus::Rejected));
        assert_eq!(
            parse_classification("MIXED, not SEGREGATED"),
            Some(CollectionStatus::Segregated)
        );
        assert_eq!(parse_classification("LOCKED"), None);
        assert_eq!(parse_classification(""), None);
    }

    #[test]
    fn test_strip_data_uri_prefix() {
        assert_eq!(strip_data_uri_prefix("data:image/jpeg;base64,QUJD"), "QUJD");
        assert_eq!(strip_data_uri_prefix("data:image/png;base64,QUJD"), "QUJD");
        assert_eq!(strip_data_uri_prefix("QUJD"), "QUJD");
        assert_eq!(
            strip_data_uri_prefix("data:image/gif;base64,QUJD"),
            "data:image/gif;base64,QUJD"
        );
    }

    #[test]
    fn test_image_data_uri() {
        assert_eq!(image_data_uri(b"ABC", "image/jpeg"), "data:image/jpeg;base64,QUJD");
    }

    #[tokio::test]
    async fn test_classify_image() {
        let uri = image_data_uri(b"photo", "image/jpeg");

        let status = classify_image(&Canned(Some("mixed")), &uri).await;
        assert_eq!(status, Some(CollectionStatus::Mixed));

        let status = classify_image(&Canned(Some("no idea")), &uri).await;
        assert_eq!(status, None);
    }

    #[tokio::test]
    async fn test_classifier_failure_means_no_suggestion() {
        assert_eq!(classify_image(&Canned(None), "QUJD").await, None);
    }
}
