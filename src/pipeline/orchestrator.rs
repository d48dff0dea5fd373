//! Run driver: walks the roster, opens one mailbox session per candidate
//! and feeds every message in the window through the pipeline.
//!
//! A failing candidate or message is logged and counted, never fatal.
//! Only a roster that cannot be loaded aborts the run.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::{MailboxError, Result};
use crate::mailbox::{Mailbox, MailboxConnector};
use crate::pipeline::processor::Pipeline;
use crate::pipeline::types::{Candidate, ProcessOutcome, TimeWindow};
use crate::store::Ledger;

/// Default cap on candidates loaded per run.
pub const DEFAULT_MAX_CANDIDATES: usize = 150;

/// Mailbox sessions for the run, keyed by candidate id.
pub struct SessionRegistry {
    connector: Arc<dyn MailboxConnector>,
    sessions: HashMap<String, Box<dyn Mailbox>>,
}

impl SessionRegistry {
    pub fn new(connector: Arc<dyn MailboxConnector>) -> Self {
        Self {
            connector,
            sessions: HashMap::new(),
        }
    }

    /// The candidate's session, connecting on first use.
    pub async fn get_or_connect(
        &mut self,
        candidate: &Candidate,
    ) -> std::result::Result<&dyn Mailbox, MailboxError> {
        match self.sessions.entry(candidate.id.clone()) {
            Entry::Occupied(entry) => Ok(&**entry.into_mut()),
            Entry::Vacant(entry) => {
                let session = self.connector.connect(candidate).await?;
                Ok(&**entry.insert(session))
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Log out of every session and forget them.
    pub async fn close_all(&mut self) {
        for (_, session) in self.sessions.drain() {
            session.close().await;
        }
    }
}

/// Tallies for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub window: String,
    pub candidates_seen: usize,
    pub candidates_failed: usize,
    pub messages_seen: usize,
    pub processed: usize,
    pub partially_failed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub drafts_created: usize,
}

impl RunSummary {
    fn record(&mut self, outcome: &ProcessOutcome) {
        match outcome {
            ProcessOutcome::Processed { .. } => self.processed += 1,
            ProcessOutcome::PartiallyFailed { .. } => self.partially_failed += 1,
            ProcessOutcome::Skipped => self.skipped += 1,
        }
        if outcome.drafted() {
            self.drafts_created += 1;
        }
    }
}

/// Drives the pipeline across the candidate × message cross-product.
pub struct Orchestrator {
    pipeline: Pipeline,
    ledger: Arc<dyn Ledger>,
    sessions: SessionRegistry,
    max_candidates: usize,
}

impl Orchestrator {
    pub fn new(
        pipeline: Pipeline,
        ledger: Arc<dyn Ledger>,
        connector: Arc<dyn MailboxConnector>,
    ) -> Self {
        Self {
            pipeline,
            ledger,
            sessions: SessionRegistry::new(connector),
            max_candidates: DEFAULT_MAX_CANDIDATES,
        }
    }

    pub fn with_max_candidates(mut self, max_candidates: usize) -> Self {
        self.max_candidates = max_candidates;
        self
    }

    /// Number of mailbox sessions opened so far.
    pub fn open_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Triage every candidate's messages in `window`.
    ///
    /// Sessions stay open between runs; call `shutdown` when done.
    pub async fn run(&mut self, window: &TimeWindow) -> Result<RunSummary> {
        let candidates = self.ledger.list_candidates(self.max_candidates).await?;
        info!(candidates = candidates.len(), window = %window, "Starting triage run");

        let mut summary = RunSummary {
            window: window.to_string(),
            ..Default::default()
        };

        for candidate in &candidates {
            summary.candidates_seen += 1;

            let mailbox = match self.sessions.get_or_connect(candidate).await {
                Ok(mailbox) => mailbox,
                Err(e) => {
                    error!(
                        candidate = %candidate.id,
                        address = %candidate.address,
                        error = %e,
                        "Mailbox session failed, skipping candidate"
                    );
                    summary.candidates_failed += 1;
                    continue;
                }
            };

            let messages = match mailbox.list_messages(window).await {
                Ok(messages) => messages,
                Err(e) => {
                    error!(
                        candidate = %candidate.id,
                        address = %candidate.address,
                        error = %e,
                        "Failed to list messages, skipping candidate"
                    );
                    summary.candidates_failed += 1;
                    continue;
                }
            };

            info!(
                candidate = %candidate.id,
                count = messages.len(),
                "Processing candidate messages"
            );

            for message in &messages {
                summary.messages_seen += 1;
                match self.pipeline.process(candidate, message, mailbox).await {
                    Ok(outcome) => summary.record(&outcome),
                    Err(e) => {
                        warn!(
                            candidate = %candidate.id,
                            message_id = %message.id,
                            error = %e,
                            "Message failed, will retry next run"
                        );
                        summary.failed += 1;
                    }
                }
            }
        }

        info!(
            candidates = summary.candidates_seen,
            candidates_failed = summary.candidates_failed,
            processed = summary.processed,
            partially_failed = summary.partially_failed,
            skipped = summary.skipped,
            failed = summary.failed,
            drafts = summary.drafts_created,
            "Triage run complete"
        );
        Ok(summary)
    }

    /// Close every mailbox session.
    pub async fn shutdown(&mut self) {
        self.sessions.close_all().await;
    }
}
