//! Response categories and their keyword signals.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// What kind of reply an inbound email represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseCategory {
    Interview,
    Rejection,
    Offer,
    InfoRequest,
    Other,
}

impl ResponseCategory {
    /// Categories with a keyword signal, in the order they are tried.
    ///
    /// The first category over its threshold wins, even when a later one
    /// scores higher. An email that is both a soft rejection and an invite
    /// for a different role resolves to Interview. Reordering this array
    /// changes tie-breaks for every mixed-signal email.
    pub const PRIORITY: [ResponseCategory; 4] = [
        Self::Offer,
        Self::Interview,
        Self::Rejection,
        Self::InfoRequest,
    ];

    /// Phrases that signal this category. Matched against lowercased text.
    pub fn keywords(self) -> &'static [&'static str] {
        match self {
            Self::Offer => &[
                "offer letter",
                "pleased to offer",
                "job offer",
                "offer of employment",
                "compensation package",
                "base salary",
                "signing bonus",
                "start date",
                "welcome aboard",
                "accept the offer",
            ],
            Self::Interview => &[
                "interview",
                "schedule a call",
                "phone screen",
                "zoom",
                "video call",
                "next steps",
                "availability",
                "meet with",
                "calendly",
                "technical screen",
            ],
            Self::Rejection => &[
                "unfortunately",
                "other candidates",
                "decided to move forward with",
                "not moving forward",
                "not been selected",
                "regret to inform",
                "position has been filled",
                "best of luck",
                "pursue other",
                "will not be proceeding",
            ],
            Self::InfoRequest => &[
                "additional information",
                "could you provide",
                "please provide",
                "please send",
                "coding challenge",
                "take-home",
                "assessment",
                "questionnaire",
                "references",
                "portfolio",
            ],
            Self::Other => &[],
        }
    }

    /// Score a category must exceed to win.
    pub fn threshold(self) -> f64 {
        match self {
            Self::Offer => 0.2,
            Self::Interview => 0.15,
            Self::Rejection => 0.2,
            Self::InfoRequest => 0.15,
            Self::Other => 1.0,
        }
    }

    /// Whether the user has to do something about this reply.
    pub fn action_required(self) -> bool {
        match self {
            Self::Offer | Self::Interview | Self::InfoRequest => true,
            Self::Rejection | Self::Other => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Interview => "interview",
            Self::Rejection => "rejection",
            Self::Offer => "offer",
            Self::InfoRequest => "info_request",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for ResponseCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResponseCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "interview" => Ok(Self::Interview),
            "rejection" => Ok(Self::Rejection),
            "offer" => Ok(Self::Offer),
            "info_request" => Ok(Self::InfoRequest),
            "other" => Ok(Self::Other),
            other => Err(format!("unknown response category: {other}")),
        }
    }
}

/// Fraction of `keywords` present in `text`. `text` must already be lowercased.
pub fn keyword_score(text: &str, keywords: &[&str]) -> f64 {
    if keywords.is_empty() {
        return 0.0;
    }
    let hits = keywords.iter().filter(|kw| text.contains(**kw)).count();
    hits as f64 / keywords.len() as f64
}
