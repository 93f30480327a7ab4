use crate::extractor::Media;
use serde::Serialize;

/// Status tag returned alongside the media list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Duplicate,
    Like,
    Command,
    Unauthorized,
    Ignored,
}

#[derive(Debug, Serialize)]
pub struct RelayResponse {
    pub media: Vec<Media>,
    pub message: Outcome,
}

impl RelayResponse {
    pub fn new(media: Vec<Media>, message: Outcome) -> Self {
        Self { media, message }
    }

    pub fn empty(message: Outcome) -> Self {
        Self::new(Vec::new(), message)
    }
}
