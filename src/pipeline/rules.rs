//! Keyword classifier for offline runs.
//!
//! Pattern rules are checked in priority order:
//! - Offer phrases → Offer
//! - Rejection phrases → Rejection
//! - Interview phrases → Interview
//! - Application phrases → Application
//!
//! An interview mention next to a negation reads as a rejection. Anything
//! left over is Other.

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use crate::llm::Classifier;
use crate::pipeline::types::Category;

/// A single keyword rule with a compiled regex.
#[derive(Debug, Clone)]
pub struct KeywordRule {
    /// Compiled regex for matching.
    pub regex: Regex,
    /// Category assigned on match.
    pub category: Category,
    /// Human-readable description for logs.
    pub description: String,
}

/// Priority-ordered keyword rules.
pub struct KeywordClassifier {
    rules: Vec<KeywordRule>,
    interview_mention: Regex,
    negation: Regex,
}

impl KeywordClassifier {
    /// Create a classifier with the default job-mail rules.
    pub fn default_rules() -> Self {
        let table: [(Category, &str, &str); 4] = [
            (
                Category::Offer,
                "offer language",
                r"(?i)(offer letter|pleased to offer|excited to offer|welcome to the team|compensation package|joining bonus)",
            ),
            (
                Category::Rejection,
                "rejection language",
                r"(?i)(not moving forward|not selected|unfortunately|regret to inform|other candidates|wish you the best)",
            ),
            (
                Category::Interview,
                "interview scheduling",
                r"(?i)(interview scheduled|schedule an interview|invite you to (an|a) interview|calendar invite|zoom link|teams meeting|technical round|panel interview|hirevue|schedule a call)",
            ),
            (
                Category::Application,
                "application paperwork",
                r"(?i)(application (submitted|received|status)|attached my resume|applied for (the )?position|job application|reference number)",
            ),
        ];

        let rules = table
            .into_iter()
            .map(|(category, description, pattern)| KeywordRule {
                regex: Regex::new(pattern).unwrap(),
                category,
                description: description.into(),
            })
            .collect();

        Self {
            rules,
            ..Self::empty()
        }
    }

    /// No keyword rules, only the negated-interview fallback.
    fn empty() -> Self {
        Self {
            rules: Vec::new(),
            interview_mention: Regex::new(r"(?i)\binterview").unwrap(),
            negation: Regex::new(r"(?i)\b(not|unfortunately)\b").unwrap(),
        }
    }

    /// Evaluate text against all rules.
    pub fn evaluate(&self, text: &str) -> Category {
        for rule in &self.rules {
            if rule.regex.is_match(text) {
                debug!(
                    rule = %rule.description,
                    category = %rule.category,
                    "Text matched keyword rule"
                );
                return rule.category;
            }
        }

        if self.interview_mention.is_match(text) && self.negation.is_match(text) {
            return Category::Rejection;
        }

        Category::Other
    }
}

#[async_trait]
impl Classifier for KeywordClassifier {
    async fn classify(&self, text: &str) -> String {
        self.evaluate(text).label().to_string()
    }
}
