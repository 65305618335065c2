//! Keyword classifier for employer replies.
//!
//! Maps (subject, body) to a response category with a confidence score.
//! Pure and infallible: malformed or empty input classifies as `Other`.

pub mod signals;

use serde::{Deserialize, Serialize};
use tracing::debug;

pub use signals::{ResponseCategory, keyword_score};

use crate::mail::EmailMessage;

/// Classifier output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub category: ResponseCategory,
    /// Fraction of the winning category's keywords present, in [0, 1].
    pub confidence: f64,
    pub action_required: bool,
}

impl Classification {
    pub fn other() -> Self {
        Self {
            category: ResponseCategory::Other,
            confidence: 0.0,
            action_required: false,
        }
    }
}

/// Stateless classifier. Construct one and pass it to whoever needs it.
#[derive(Debug, Clone, Default)]
pub struct Classifier;

impl Classifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify an email by subject and body, case-insensitively.
    pub fn classify(&self, subject: &str, body: &str) -> Classification {
        let text = format!("{subject} {body}").to_lowercase();
        if text.trim().is_empty() {
            return Classification::other();
        }

        // Priority order decides, not the highest score. See `ResponseCategory::PRIORITY`.
        for category in ResponseCategory::PRIORITY {
            let score = keyword_score(&text, category.keywords());
            if score > category.threshold() {
                debug!(category = %category, score, "Email classified");
                return Classification {
                    category,
                    confidence: score,
                    action_required: category.action_required(),
                };
            }
        }

        Classification::other()
    }

    /// Classify a fetched message.
    pub fn classify_message(&self, message: &EmailMessage) -> Classification {
        self.classify(&message.subject, &message.body)
    }
}
