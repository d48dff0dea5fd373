//! Shared types for the triage pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ── Category ────────────────────────────────────────────────────────

/// Category assigned to every processed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Application,
    Interview,
    Offer,
    Rejection,
    Other,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Application,
        Category::Interview,
        Category::Offer,
        Category::Rejection,
        Category::Other,
    ];

    /// Mailbox label applied to messages of this category.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Application => "Application",
            Self::Interview => "Interview",
            Self::Offer => "Offer",
            Self::Rejection => "Rejection",
            Self::Other => "Other",
        }
    }

    /// Column holding this category's tally in `category_counts`.
    pub(crate) fn column(&self) -> &'static str {
        match self {
            Self::Application => "application",
            Self::Interview => "interview",
            Self::Offer => "offer",
            Self::Rejection => "rejection",
            Self::Other => "other",
        }
    }

    /// Reply policy for this category, if it warrants a reply at all.
    pub fn response_policy(&self) -> Option<ResponsePolicy> {
        match self {
            Self::Interview => Some(ResponsePolicy::ConfirmInterview),
            Self::Offer => Some(ResponsePolicy::AcknowledgeOffer),
            Self::Rejection => Some(ResponsePolicy::GraciousDecline),
            Self::Application | Self::Other => None,
        }
    }

    pub fn warrants_reply(&self) -> bool {
        self.response_policy().is_some()
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A label string that is not one of the five categories.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown category label: '{0}'")]
pub struct UnknownCategory(pub String);

impl FromStr for Category {
    type Err = UnknownCategory;

    /// The single string → `Category` conversion. Tolerates surrounding
    /// whitespace, quotes, a trailing period and case differences, since
    /// that is how model output tends to drift.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cleaned = s
            .trim()
            .trim_matches(|c: char| c == '"' || c == '\'' || c == '*' || c == '.' || c == '`')
            .trim();
        Category::ALL
            .into_iter()
            .find(|c| c.label().eq_ignore_ascii_case(cleaned))
            .ok_or_else(|| UnknownCategory(s.to_string()))
    }
}

/// What kind of reply a category calls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponsePolicy {
    /// Acknowledge the interview details and confirm availability.
    ConfirmInterview,
    /// Thank them and ask for time to review the offer.
    AcknowledgeOffer,
    /// Thank them and keep the door open.
    GraciousDecline,
}

// ── Candidate & message ─────────────────────────────────────────────

/// A job candidate whose mailbox is triaged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    pub name: String,
    /// Mailbox address, also the login.
    pub address: String,
    /// Reference resolved to a secret by the mailbox connector.
    pub credential_ref: String,
}

/// A message fetched from a candidate's mailbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Mailbox-assigned id (IMAP UID), stable across sessions.
    pub id: String,
    pub subject: String,
    pub sender: String,
    /// Raw RFC 2822 `Date` header, as the mailbox reports it.
    pub date: String,
    pub body: String,
}

impl Message {
    /// Parse the mailbox date representation.
    pub fn received_at(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc2822(self.date.trim())
            .ok()
            .map(|d| d.with_timezone(&Utc))
    }

    /// Subject line for a reply draft.
    pub fn reply_subject(&self) -> String {
        format!("Re: {}", self.subject)
    }
}

// ── Records & counts ────────────────────────────────────────────────

/// Durable outcome of running the pipeline on one message.
///
/// At most one exists per `(candidate_id, message_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingRecord {
    pub candidate_id: String,
    pub message_id: String,
    pub category: Category,
    pub received_at: DateTime<Utc>,
    pub response_present: bool,
    pub subject: String,
    pub sender: String,
    pub processed_at: DateTime<Utc>,
}

/// Per-candidate running tally of processed messages by category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCount {
    pub candidate_id: String,
    pub candidate_name: String,
    pub candidate_address: String,
    pub application: u32,
    pub interview: u32,
    pub offer: u32,
    pub rejection: u32,
    pub other: u32,
    pub last_updated: DateTime<Utc>,
}

impl CategoryCount {
    pub fn get(&self, category: Category) -> u32 {
        match category {
            Category::Application => self.application,
            Category::Interview => self.interview,
            Category::Offer => self.offer,
            Category::Rejection => self.rejection,
            Category::Other => self.other,
        }
    }

    pub fn total(&self) -> u64 {
        Category::ALL.iter().map(|c| u64::from(self.get(*c))).sum()
    }
}

// ── Outcomes ────────────────────────────────────────────────────────

/// How one message's trip through the pipeline ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Every step succeeded.
    Processed { category: Category, drafted: bool },
    /// A record for this message already existed; nothing was touched.
    Skipped,
    /// Record persisted, but labeling or drafting failed.
    PartiallyFailed {
        category: Category,
        drafted: bool,
        label_failed: bool,
        draft_failed: bool,
    },
}

impl ProcessOutcome {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Processed { .. } => "processed",
            Self::Skipped => "skipped",
            Self::PartiallyFailed { .. } => "partially_failed",
        }
    }

    /// Whether a reply draft landed in the mailbox.
    pub fn drafted(&self) -> bool {
        match self {
            Self::Processed { drafted, .. } | Self::PartiallyFailed { drafted, .. } => *drafted,
            Self::Skipped => false,
        }
    }

    pub fn category(&self) -> Option<Category> {
        match self {
            Self::Processed { category, .. } | Self::PartiallyFailed { category, .. } => {
                Some(*category)
            }
            Self::Skipped => None,
        }
    }
}

// ── Time window ─────────────────────────────────────────────────────

/// Half-open date interval `[start, end)` used to select messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl TimeWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, ConfigError> {
        if start >= end {
            return Err(ConfigError::InvalidValue {
                key: "window".into(),
                message: format!("start {start} must be before end {end}"),
            });
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date < self.end
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Named windows relative to the current day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPreset {
    Today,
    Yesterday,
    LastWeek,
}

impl WindowPreset {
    pub fn resolve(self, today: NaiveDate) -> TimeWindow {
        let (start, end) = match self {
            Self::Today => (today, today + Days::new(1)),
            Self::Yesterday => (today - Days::new(1), today),
            Self::LastWeek => (today - Days::new(7), today),
        };
        TimeWindow { start, end }
    }
}

impl FromStr for WindowPreset {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "today" => Ok(Self::Today),
            "yesterday" => Ok(Self::Yesterday),
            "last_week" | "last-week" | "week" => Ok(Self::LastWeek),
            other => Err(ConfigError::InvalidValue {
                key: "TRIAGE_WINDOW".into(),
                message: format!("unknown window '{other}' (expected today, yesterday or last_week)"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn category_parses_exact_labels() {
        for category in Category::ALL {
            assert_eq!(category.label().parse::<Category>().unwrap(), category);
        }
    }

    #[test]
    fn category_parse_tolerates_model_noise() {
        assert_eq!(" interview\n".parse::<Category>().unwrap(), Category::Interview);
        assert_eq!("\"Offer\"".parse::<Category>().unwrap(), Category::Offer);
        assert_eq!("Rejection.".parse::<Category>().unwrap(), Category::Rejection);
    }

    #[test]
    fn category_rejects_unknown_labels() {
        assert!("Spam".parse::<Category>().is_err());
        assert!("".parse::<Category>().is_err());
        assert!("Interview or Offer".parse::<Category>().is_err());
    }

    #[test]
    fn only_three_categories_warrant_replies() {
        assert!(!Category::Application.warrants_reply());
        assert!(Category::Interview.warrants_reply());
        assert!(Category::Offer.warrants_reply());
        assert!(Category::Rejection.warrants_reply());
        assert!(!Category::Other.warrants_reply());
    }

    #[test]
    fn message_parses_rfc2822_date() {
        let msg = Message {
            id: "42".into(),
            subject: "Interview".into(),
            sender: "hr@acme.com".into(),
            date: "Tue, 14 May 2024 09:30:00 +0200".into(),
            body: "hello".into(),
        };
        let at = msg.received_at().unwrap();
        assert_eq!(at.to_rfc3339(), "2024-05-14T07:30:00+00:00");
        assert_eq!(msg.reply_subject(), "Re: Interview");
    }

    #[test]
    fn message_with_garbage_date_has_no_timestamp() {
        let msg = Message {
            id: "1".into(),
            subject: String::new(),
            sender: String::new(),
            date: "yesterday-ish".into(),
            body: String::new(),
        };
        assert!(msg.received_at().is_none());
    }

    #[test]
    fn count_total_sums_all_categories() {
        let count = CategoryCount {
            candidate_id: "c1".into(),
            candidate_name: "Ada".into(),
            candidate_address: "ada@example.com".into(),
            application: 1,
            interview: 2,
            offer: 0,
            rejection: 3,
            other: 4,
            last_updated: Utc::now(),
        };
        assert_eq!(count.total(), 10);
        assert_eq!(count.get(Category::Rejection), 3);
    }

    #[test]
    fn window_presets_are_half_open() {
        let today = date(2024, 3, 10);

        let w = WindowPreset::Today.resolve(today);
        assert!(w.contains(today));
        assert!(!w.contains(date(2024, 3, 11)));

        let w = WindowPreset::Yesterday.resolve(today);
        assert!(w.contains(date(2024, 3, 9)));
        assert!(!w.contains(today));

        let w = WindowPreset::LastWeek.resolve(today);
        assert_eq!(w.start, date(2024, 3, 3));
        assert!(!w.contains(today));
    }

    #[test]
    fn window_rejects_empty_interval() {
        let d = date(2024, 1, 1);
        assert!(TimeWindow::new(d, d).is_err());
        assert!(TimeWindow::new(date(2024, 1, 2), d).is_err());
        assert!(TimeWindow::new(d, date(2024, 1, 2)).is_ok());
    }

    #[test]
    fn window_preset_from_str() {
        assert_eq!("Today".parse::<WindowPreset>().unwrap(), WindowPreset::Today);
        assert_eq!("last_week".parse::<WindowPreset>().unwrap(), WindowPreset::LastWeek);
        assert!("fortnight".parse::<WindowPreset>().is_err());
    }
}
