//! Badge variant for a status, stage or user label.
//!
//! Rules are checked in order and the first match wins: destructive terms, then VIP,
//! then success, then pending, then the terms specific to the label kind. Anything
//! else is neutral. All patterns are case-insensitive and match whole words.

use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BadgeKind {
    Status,
    Stage,
    User,
}

impl FromStr for BadgeKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "status" => Ok(BadgeKind::Status),
            "stage" => Ok(BadgeKind::Stage),
            "user" => Ok(BadgeKind::User),
            other => Err(AppError::user("unknown_kind".to_string(), format!("unknown badge kind '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    Destructive,
    Warning,
    Success,
    Pending,
    Info,
    Neutral,
}

impl Variant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::Destructive => "destructive",
            Variant::Warning => "warning",
            Variant::Success => "success",
            Variant::Pending => "pending",
            Variant::Info => "info",
            Variant::Neutral => "neutral",
        }
    }
}

fn re(pattern: &str) -> Regex {
    // Patterns are literals below; a failure here is a programming error caught by tests.
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid badge pattern {pattern}: {e}"))
}

static DESTRUCTIVE: Lazy<Regex> = Lazy::new(|| {
    re(r"(?i)\b(reject(ed)?|cancel(l?ed)?|fail(ed|ure)?|error|denied|declined|deleted|inactive|overdue|lost|damaged|blocked|expired)\b")
});
static VIP: Lazy<Regex> = Lazy::new(|| re(r"(?i)\bvip\b"));
static SUCCESS: Lazy<Regex> = Lazy::new(|| {
    re(r"(?i)\b(approved|accepted|completed?|delivered|shipped|fulfilled|active|done|resolved|paid)\b")
});
static PENDING: Lazy<Regex> = Lazy::new(|| {
    re(r"(?i)\b(pending|processing|waiting|awaiting|queued|draft|invited|on hold|in review|under review)\b")
});
static STATUS_INFO: Lazy<Regex> = Lazy::new(|| re(r"(?i)\b(new|open|submitted)\b"));
static STAGE_INFO: Lazy<Regex> = Lazy::new(|| {
    re(r"(?i)\b(picking|packing|packed|sorting|ready|in transit|out for delivery|received)\b")
});
static USER_INFO: Lazy<Regex> = Lazy::new(|| re(r"(?i)\b(admin|owner)\b"));

pub fn classify(text: &str, kind: Option<BadgeKind>) -> Variant {
    if DESTRUCTIVE.is_match(text) {
        return Variant::Destructive;
    }
    if VIP.is_match(text) {
        return Variant::Warning;
    }
    if SUCCESS.is_match(text) {
        return Variant::Success;
    }
    if PENDING.is_match(text) {
        return Variant::Pending;
    }
    let kind_pattern = match kind {
        Some(BadgeKind::Status) => &*STATUS_INFO,
        Some(BadgeKind::Stage) => &*STAGE_INFO,
        Some(BadgeKind::User) => &*USER_INFO,
        None => return Variant::Neutral,
    };
    if kind_pattern.is_match(text) {
        Variant::Info
    } else {
        Variant::Neutral
    }
}
