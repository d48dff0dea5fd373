//! Message pipeline: classifies, labels, replies to and records one
//! message.
//!
//! **Core invariant: one ProcessingRecord per (candidate, message).**
//! The dedup check runs first, and the ledger write is exactly-once, so
//! re-running an overlapping window touches nothing already handled.
//!
//! Flow:
//! 1. Dedup check → may short-circuit to `Skipped`
//! 2. Classify → coerced into the closed category set
//! 3. Label → failure is noted, not fatal
//! 4. Respond → only for categories with a response policy
//! 5. Record → record + count in one ledger transaction
//! 6. Draft → only if a reply exists; failure is noted, not fatal

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::llm::{Classifier, Responder};
use crate::mailbox::Mailbox;
use crate::pipeline::types::{Candidate, Category, Message, ProcessOutcome, ProcessingRecord};
use crate::store::{Ledger, RecordWrite};

/// Runs one message at a time through the triage steps.
pub struct Pipeline {
    classifier: Arc<dyn Classifier>,
    responder: Arc<dyn Responder>,
    ledger: Arc<dyn Ledger>,
}

impl Pipeline {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        responder: Arc<dyn Responder>,
        ledger: Arc<dyn Ledger>,
    ) -> Self {
        Self {
            classifier,
            responder,
            ledger,
        }
    }

    /// Process a single message for a candidate.
    ///
    /// Mailbox failures are folded into the outcome. Only a missing message
    /// id or an unavailable ledger returns `Err`; in the latter case nothing
    /// was recorded and the message is retried on the next run.
    pub async fn process(
        &self,
        candidate: &Candidate,
        message: &Message,
        mailbox: &dyn Mailbox,
    ) -> Result<ProcessOutcome, PipelineError> {
        if message.id.trim().is_empty() {
            return Err(PipelineError::ContractViolation(format!(
                "message without id in mailbox {}",
                candidate.address
            )));
        }

        // Step 1: Dedup
        if self.ledger.has_record(&candidate.id, &message.id).await? {
            debug!(
                candidate = %candidate.id,
                message_id = %message.id,
                "Already processed, skipping"
            );
            return Ok(ProcessOutcome::Skipped);
        }

        // Step 2: Classify
        let category = self.classify(&message.body).await;

        // Step 3: Label
        let label_failed = match mailbox.apply_label(&message.id, category.label()).await {
            Ok(()) => false,
            Err(e) => {
                warn!(
                    candidate = %candidate.id,
                    message_id = %message.id,
                    category = %category,
                    error = %e,
                    "Failed to apply label"
                );
                true
            }
        };

        // Step 4: Respond
        let reply = if category.warrants_reply() {
            self.responder
                .respond(&message.body, category)
                .await
                .filter(|r| !r.trim().is_empty())
        } else {
            None
        };

        // Step 5: Record
        let received_at = message.received_at().unwrap_or_else(|| {
            warn!(
                message_id = %message.id,
                date = %message.date,
                "Unparseable message date, using processing time"
            );
            Utc::now()
        });
        let record = ProcessingRecord {
            candidate_id: candidate.id.clone(),
            message_id: message.id.clone(),
            category,
            received_at,
            response_present: reply.is_some(),
            subject: message.subject.clone(),
            sender: message.sender.clone(),
            processed_at: Utc::now(),
        };
        if self.ledger.upsert_record_and_count(&record).await? == RecordWrite::AlreadyRecorded {
            debug!(
                candidate = %candidate.id,
                message_id = %message.id,
                "Recorded concurrently, skipping draft"
            );
            return Ok(ProcessOutcome::Skipped);
        }

        // Step 6: Draft
        let mut drafted = false;
        let mut draft_failed = false;
        if let Some(reply) = reply {
            match mailbox
                .create_draft(&message.sender, &message.reply_subject(), &reply)
                .await
            {
                Ok(()) => drafted = true,
                Err(e) => {
                    warn!(
                        candidate = %candidate.id,
                        message_id = %message.id,
                        to = %message.sender,
                        error = %e,
                        "Failed to create draft"
                    );
                    draft_failed = true;
                }
            }
        }

        let outcome = if label_failed || draft_failed {
            ProcessOutcome::PartiallyFailed {
                category,
                drafted,
                label_failed,
                draft_failed,
            }
        } else {
            ProcessOutcome::Processed { category, drafted }
        };

        info!(
            candidate = %candidate.id,
            message_id = %message.id,
            category = %category,
            outcome = outcome.label(),
            drafted,
            "Message processed"
        );
        Ok(outcome)
    }

    /// Classify a body, coercing anything outside the category set to Other.
    ///
    /// Empty bodies are Other without a classifier call.
    async fn classify(&self, body: &str) -> Category {
        if body.trim().is_empty() {
            debug!("Empty body, classifying as Other");
            return Category::Other;
        }

        let raw = self.classifier.classify(body).await;
        match raw.parse::<Category>() {
            Ok(category) => category,
            Err(e) => {
                warn!(error = %e, "Classifier returned an unknown label, using Other");
                Category::Other
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::error::MailboxError;
    use crate::llm::TemplateResponder;
    use crate::pipeline::types::TimeWindow;
    use crate::store::LibSqlBackend;

    // ── Fakes ───────────────────────────────────────────────────────

    /// In-memory mailbox that records every side effect.
    #[derive(Default)]
    pub(crate) struct FakeMailbox {
        pub messages: Vec<Message>,
        pub fail_labels_for: HashSet<String>,
        pub fail_drafts: bool,
        pub fail_list: bool,
        pub labels: Mutex<Vec<(String, String)>>,
        pub drafts: Mutex<Vec<(String, String, String)>>,
    }

    impl FakeMailbox {
        pub fn with_messages(messages: Vec<Message>) -> Self {
            Self {
                messages,
                ..Default::default()
            }
        }

        pub fn label_calls(&self) -> Vec<(String, String)> {
            self.labels.lock().unwrap().clone()
        }

        pub fn draft_calls(&self) -> Vec<(String, String, String)> {
            self.drafts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Mailbox for Arc<FakeMailbox> {
        async fn list_messages(&self, _window: &TimeWindow) -> Result<Vec<Message>, MailboxError> {
            if self.fail_list {
                return Err(MailboxError::Command {
                    command: "UID SEARCH".into(),
                    reason: "fake failure".into(),
                });
            }
            Ok(self.messages.clone())
        }

        async fn apply_label(&self, message_id: &str, label: &str) -> Result<(), MailboxError> {
            if self.fail_labels_for.contains(message_id) {
                return Err(MailboxError::Command {
                    command: "UID STORE".into(),
                    reason: "fake failure".into(),
                });
            }
            self.labels
                .lock()
                .unwrap()
                .push((message_id.to_string(), label.to_string()));
            Ok(())
        }

        async fn create_draft(
            &self,
            to: &str,
            subject: &str,
            body: &str,
        ) -> Result<(), MailboxError> {
            if self.fail_drafts {
                return Err(MailboxError::Draft("fake failure".into()));
            }
            self.drafts
                .lock()
                .unwrap()
                .push((to.to_string(), subject.to_string(), body.to_string()));
            Ok(())
        }
    }

    /// Returns a fixed label and counts calls.
    pub(crate) struct FixedClassifier {
        pub label: String,
        pub calls: AtomicUsize,
    }

    impl FixedClassifier {
        pub fn new(label: &str) -> Self {
            Self {
                label: label.into(),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Classifier for FixedClassifier {
        async fn classify(&self, _text: &str) -> String {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.label.clone()
        }
    }

    /// Replies to everything, even categories that shouldn't get one.
    struct EagerResponder;

    #[async_trait]
    impl Responder for EagerResponder {
        async fn respond(&self, _text: &str, _category: Category) -> Option<String> {
            Some("reply".into())
        }
    }

    pub(crate) fn make_message(id: &str, body: &str) -> Message {
        Message {
            id: id.into(),
            subject: "Next steps".into(),
            sender: "hr@acme.com".into(),
            date: "Tue, 14 May 2024 09:30:00 +0000".into(),
            body: body.into(),
        }
    }

    async fn setup(
        label: &str,
    ) -> (Pipeline, Arc<FixedClassifier>, Arc<LibSqlBackend>, Candidate) {
        let ledger = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let id = ledger
            .add_candidate("Ada", "ada@example.com", "pw")
            .await
            .unwrap();
        let candidate = Candidate {
            id,
            name: "Ada".into(),
            address: "ada@example.com".into(),
            credential_ref: "pw".into(),
        };
        let classifier = Arc::new(FixedClassifier::new(label));
        let pipeline = Pipeline::new(
            classifier.clone(),
            Arc::new(TemplateResponder),
            ledger.clone(),
        );
        (pipeline, classifier, ledger, candidate)
    }

    // ── Pipeline tests ──────────────────────────────────────────────

    #[tokio::test]
    async fn interview_message_is_labeled_recorded_and_drafted() {
        let (pipeline, _, ledger, candidate) = setup("Interview").await;
        let mailbox = Arc::new(FakeMailbox::default());
        let msg = make_message("1", "We would like to schedule an interview for next week.");

        let outcome = pipeline.process(&candidate, &msg, &mailbox).await.unwrap();
        assert_eq!(
            outcome,
            ProcessOutcome::Processed {
                category: Category::Interview,
                drafted: true
            }
        );

        assert_eq!(mailbox.label_calls(), vec![("1".into(), "Interview".into())]);
        let drafts = mailbox.draft_calls();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].0, "hr@acme.com");
        assert_eq!(drafts[0].1, "Re: Next steps");
        assert!(!drafts[0].2.is_empty());

        let counts = ledger.get_counts(&candidate.id).await.unwrap().unwrap();
        assert_eq!(counts.interview, 1);
        assert_eq!(counts.total(), 1);
    }

    #[tokio::test]
    async fn empty_body_is_other_without_classifier_call() {
        let (pipeline, classifier, ledger, candidate) = setup("Offer").await;
        let mailbox = Arc::new(FakeMailbox::default());

        let outcome = pipeline
            .process(&candidate, &make_message("1", "  \n "), &mailbox)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ProcessOutcome::Processed {
                category: Category::Other,
                drafted: false
            }
        );
        assert_eq!(classifier.calls(), 0);
        assert!(mailbox.draft_calls().is_empty());
        assert_eq!(ledger.get_counts(&candidate.id).await.unwrap().unwrap().other, 1);
    }

    #[tokio::test]
    async fn duplicate_message_is_skipped() {
        let (pipeline, classifier, ledger, candidate) = setup("Offer").await;
        let mailbox = Arc::new(FakeMailbox::default());
        let msg = make_message("7", "We are pleased to offer you the role");

        pipeline.process(&candidate, &msg, &mailbox).await.unwrap();
        let second = pipeline.process(&candidate, &msg, &mailbox).await.unwrap();

        assert_eq!(second, ProcessOutcome::Skipped);
        assert_eq!(classifier.calls(), 1);
        assert_eq!(mailbox.label_calls().len(), 1);
        assert_eq!(mailbox.draft_calls().len(), 1);
        let counts = ledger.get_counts(&candidate.id).await.unwrap().unwrap();
        assert_eq!(counts.offer, 1);
        assert_eq!(ledger.count_records(&candidate.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unknown_label_is_coerced_to_other() {
        let (pipeline, _, ledger, candidate) = setup("Probably spam?").await;
        let mailbox = Arc::new(FakeMailbox::default());

        let outcome = pipeline
            .process(&candidate, &make_message("1", "hello"), &mailbox)
            .await
            .unwrap();
        assert_eq!(outcome.category(), Some(Category::Other));
        assert_eq!(mailbox.label_calls()[0].1, "Other");
        assert_eq!(ledger.get_counts(&candidate.id).await.unwrap().unwrap().other, 1);
    }

    #[tokio::test]
    async fn other_never_drafts_even_if_responder_replies() {
        let ledger = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let pipeline = Pipeline::new(
            Arc::new(FixedClassifier::new("Other")),
            Arc::new(EagerResponder),
            ledger.clone(),
        );
        let id = ledger
            .add_candidate("Ada", "ada@example.com", "pw")
            .await
            .unwrap();
        let candidate = Candidate {
            id,
            name: "Ada".into(),
            address: "ada@example.com".into(),
            credential_ref: "pw".into(),
        };
        let mailbox = Arc::new(FakeMailbox::default());

        pipeline
            .process(&candidate, &make_message("1", "newsletter"), &mailbox)
            .await
            .unwrap();
        assert!(mailbox.draft_calls().is_empty());
    }

    #[tokio::test]
    async fn label_failure_still_records_and_drafts() {
        let (pipeline, _, ledger, candidate) = setup("Rejection").await;
        let mailbox = Arc::new(FakeMailbox {
            fail_labels_for: HashSet::from(["1".to_string()]),
            ..Default::default()
        });

        let outcome = pipeline
            .process(&candidate, &make_message("1", "Unfortunately..."), &mailbox)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ProcessOutcome::PartiallyFailed {
                category: Category::Rejection,
                drafted: true,
                label_failed: true,
                draft_failed: false
            }
        );
        assert!(ledger.has_record(&candidate.id, "1").await.unwrap());
        assert_eq!(mailbox.draft_calls().len(), 1);

        // The next message is unaffected
        let next = pipeline
            .process(&candidate, &make_message("2", "Unfortunately..."), &mailbox)
            .await
            .unwrap();
        assert!(matches!(next, ProcessOutcome::Processed { .. }));
    }

    #[tokio::test]
    async fn draft_failure_keeps_record() {
        let (pipeline, _, ledger, candidate) = setup("Offer").await;
        let mailbox = Arc::new(FakeMailbox {
            fail_drafts: true,
            ..Default::default()
        });

        let outcome = pipeline
            .process(&candidate, &make_message("1", "offer letter attached"), &mailbox)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ProcessOutcome::PartiallyFailed {
                category: Category::Offer,
                drafted: false,
                label_failed: false,
                draft_failed: true
            }
        );
        assert!(ledger.has_record(&candidate.id, "1").await.unwrap());

        // Processed once Step 5 completes: a rerun skips it
        let rerun = pipeline
            .process(&candidate, &make_message("1", "offer letter attached"), &mailbox)
            .await
            .unwrap();
        assert_eq!(rerun, ProcessOutcome::Skipped);
    }

    #[tokio::test]
    async fn missing_message_id_is_contract_violation() {
        let (pipeline, _, ledger, candidate) = setup("Offer").await;
        let mailbox = Arc::new(FakeMailbox::default());

        let err = pipeline
            .process(&candidate, &make_message(" ", "body"), &mailbox)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ContractViolation(_)));
        assert!(mailbox.label_calls().is_empty());
        assert!(ledger.get_counts(&candidate.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unparseable_date_falls_back_to_now() {
        let (pipeline, _, ledger, candidate) = setup("Application").await;
        let mailbox = Arc::new(FakeMailbox::default());
        let mut msg = make_message("1", "application submitted");
        msg.date = "sometime".into();

        let outcome = pipeline.process(&candidate, &msg, &mailbox).await.unwrap();
        assert_eq!(
            outcome,
            ProcessOutcome::Processed {
                category: Category::Application,
                drafted: false
            }
        );
        assert!(ledger.has_record(&candidate.id, "1").await.unwrap());
    }
}
