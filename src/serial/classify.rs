use serde::{Deserialize, Serialize};

const PAYLOAD_OPEN: u8 = b'{';
const PAYLOAD_CLOSE: u8 = b'}';

/// How a frame that mixes log text and JSON is split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierPolicy {
    /// Text before the first `{` is log output, the rest is the candidate payload.
    #[default]
    SplitOnFirstMarker,
    /// Only a frame that is `{ ... }` as a whole is a payload.
    WholeFrame,
}

/// Result of classifying a single frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classified {
    pub log: Option<String>,
    pub payload: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FrameClassifier {
    policy: ClassifierPolicy,
}

impl FrameClassifier {
    pub fn new(policy: ClassifierPolicy) -> Self {
        Self { policy }
    }

    /// Split a frame (delimiter already removed) into log text and payload.
    ///
    /// The payload is not validated here; parse failures are the consumer's call.
    pub fn classify(&self, frame: &[u8]) -> Classified {
        match self.policy {
            ClassifierPolicy::SplitOnFirstMarker => {
                match frame.iter().position(|&b| b == PAYLOAD_OPEN) {
                    Some(idx) => Classified {
                        log: log_text(&frame[..idx]),
                        payload: Some(frame[idx..].to_vec()),
                    },
                    None => Classified { log: log_text(frame), payload: None },
                }
            }
            ClassifierPolicy::WholeFrame => {
                let trimmed = frame.trim_ascii();
                if trimmed.first() == Some(&PAYLOAD_OPEN) && trimmed.last() == Some(&PAYLOAD_CLOSE) {
                    Classified { log: None, payload: Some(trimmed.to_vec()) }
                } else {
                    Classified { log: log_text(frame), payload: None }
                }
            }
        }
    }
}

fn log_text(bytes: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}
