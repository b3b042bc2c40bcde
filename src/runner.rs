//! Sequential batch runner.
//!
//! Drives one dispatch per contact, strictly in input order, with a
//! liveness re-check at every iteration boundary. A contact's failure is
//! recorded and the loop moves on; losing the automation target cancels
//! everything that has not yet been attempted. The loop is strictly
//! sequential: send ordering and human pacing both depend on it.

use crate::history::HistoryLog;
use crate::protocol::EventMessage;
use crate::roster::Contact;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

// ── Outcomes ────────────────────────────────────────────────────────────────

/// What happened to one contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    Sent,
    Failed,
    Cancelled,
}

impl OutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::Sent => "Sent",
            OutcomeKind::Failed => "Failed",
            OutcomeKind::Cancelled => "Cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Sent" => Some(OutcomeKind::Sent),
            "Failed" => Some(OutcomeKind::Failed),
            "Cancelled" => Some(OutcomeKind::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The recorded result of one dispatch attempt (or its synthesized
/// cancellation). Created once, appended to history, never mutated.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub kind: OutcomeKind,
    pub phone: String,
    pub name: String,
    pub result: String,
    pub timestamp: DateTime<Utc>,
}

impl DispatchOutcome {
    pub fn sent(contact: &Contact) -> Self {
        Self::new(
            OutcomeKind::Sent,
            contact,
            format!("Message sent to {}", contact.label()),
        )
    }

    pub fn failed(contact: &Contact, reason: impl std::fmt::Display) -> Self {
        Self::new(
            OutcomeKind::Failed,
            contact,
            format!("Failed to send message to {}: {reason}", contact.label()),
        )
    }

    /// Synthesized for contacts never attempted because the target went away.
    pub fn cancelled(contact: &Contact) -> Self {
        Self::new(
            OutcomeKind::Cancelled,
            contact,
            "Cancelled before dispatch: WhatsApp Web is no longer open".to_string(),
        )
    }

    fn new(kind: OutcomeKind, contact: &Contact, result: String) -> Self {
        Self {
            kind,
            phone: contact.phone.clone(),
            name: contact.name.clone(),
            result,
            timestamp: Utc::now(),
        }
    }
}

// ── Seams ───────────────────────────────────────────────────────────────────

/// One complete send attempt for one contact. Implementations must capture
/// every failure and return it as a tagged outcome — nothing may escape
/// this boundary, or a single contact could abort the whole batch.
#[async_trait]
pub trait ContactDispatch: Send + Sync {
    async fn dispatch(&self, contact: &Contact) -> DispatchOutcome;
}

/// Is the automation target still the expected host?
#[async_trait]
pub trait Liveness: Send + Sync {
    async fn is_live(&self) -> bool;
}

/// Where progress events go. Emission must never block the loop.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: EventMessage);
}

impl ProgressSink for tokio::sync::broadcast::Sender<EventMessage> {
    fn emit(&self, event: EventMessage) {
        // No receivers is fine — nobody is watching this run.
        let _ = self.send(event);
    }
}

impl ProgressSink for tokio::sync::mpsc::UnboundedSender<EventMessage> {
    fn emit(&self, event: EventMessage) {
        let _ = self.send(event);
    }
}

// ── Runner ──────────────────────────────────────────────────────────────────

/// Aggregated counts for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub sent: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// Drives the dispatcher across an ordered contact list.
pub struct BatchRunner<'a> {
    dispatcher: &'a dyn ContactDispatch,
    liveness: &'a dyn Liveness,
    history: &'a HistoryLog,
    events: &'a dyn ProgressSink,
}

impl<'a> BatchRunner<'a> {
    pub fn new(
        dispatcher: &'a dyn ContactDispatch,
        liveness: &'a dyn Liveness,
        history: &'a HistoryLog,
        events: &'a dyn ProgressSink,
    ) -> Self {
        Self { dispatcher, liveness, history, events }
    }

    /// Run the batch to completion (or interruption). Never errors: every
    /// failure mode is folded into outcomes and events.
    pub async fn run(&self, contacts: &[Contact]) -> BatchSummary {
        let total = contacts.len();
        let mut summary = BatchSummary::default();

        if !self.liveness.is_live().await {
            self.events.emit(EventMessage::Status {
                text: "Please open WhatsApp Web first".to_string(),
                progress: None,
                completed: Some(true),
            });
            for contact in contacts {
                self.record(DispatchOutcome::cancelled(contact));
                summary.cancelled += 1;
            }
            return summary;
        }

        for (index, contact) in contacts.iter().enumerate() {
            // The operator may navigate away mid-run; contacts already
            // attempted keep their real outcomes.
            if !self.liveness.is_live().await {
                for remaining in &contacts[index..] {
                    self.record(DispatchOutcome::cancelled(remaining));
                    summary.cancelled += 1;
                }
                self.events.emit(EventMessage::completed(
                    format!(
                        "Sending interrupted: WhatsApp Web is no longer open (Success: {}, Failed: {})",
                        summary.sent, summary.failed
                    ),
                    percentage(index, total),
                ));
                tracing::warn!(attempted = index, total, "batch interrupted — target lost");
                return summary;
            }

            self.events.emit(EventMessage::status(
                format!(
                    "Sending message {} of {}... (Success: {}, Failed: {})",
                    index + 1,
                    total,
                    summary.sent,
                    summary.failed
                ),
                percentage(index + 1, total),
            ));

            let outcome = self.dispatcher.dispatch(contact).await;
            match outcome.kind {
                OutcomeKind::Sent => summary.sent += 1,
                OutcomeKind::Failed => summary.failed += 1,
                OutcomeKind::Cancelled => summary.cancelled += 1,
            }
            tracing::info!(
                phone = %contact.phone,
                outcome = %outcome.kind,
                index,
                "dispatch finished"
            );
            self.record(outcome);
        }

        self.events.emit(EventMessage::completed(
            format!(
                "Completed! Successfully sent: {}, Failed: {}",
                summary.sent, summary.failed
            ),
            100.0,
        ));
        summary
    }

    fn record(&self, outcome: DispatchOutcome) {
        if let Err(err) = self.history.append(&outcome) {
            tracing::warn!(%err, "history append failed");
            self.events
                .emit(EventMessage::error(format!("History log write failed: {err}")));
        }
    }
}

fn percentage(done: usize, total: usize) -> f64 {
    if total == 0 {
        100.0
    } else {
        done as f64 / total as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn contact(phone: &str, name: &str, message: &str) -> Contact {
        let record: BTreeMap<String, String> = [
            ("Phone Number", phone),
            ("Name", name),
            ("Custom Message", message),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let mut contacts = crate::roster::contacts_from_records(vec![record]);
        contacts.remove(0)
    }

    /// Succeeds unless the phone is listed as failing.
    struct ScriptedDispatch {
        failing: HashSet<String>,
        calls: AtomicUsize,
    }

    impl ScriptedDispatch {
        fn new(failing: &[&str]) -> Self {
            Self {
                failing: failing.iter().map(|s| s.to_string()).collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ContactDispatch for ScriptedDispatch {
        async fn dispatch(&self, contact: &Contact) -> DispatchOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.contains(&contact.phone) {
                DispatchOutcome::failed(contact, "Timeout waiting for element: span[data-icon=\"send\"]")
            } else {
                DispatchOutcome::sent(contact)
            }
        }
    }

    /// Live for the first `limit` checks, dead afterwards.
    struct CountdownLiveness {
        limit: usize,
        checks: AtomicUsize,
    }

    impl CountdownLiveness {
        fn new(limit: usize) -> Self {
            Self { limit, checks: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl Liveness for CountdownLiveness {
        async fn is_live(&self) -> bool {
            self.checks.fetch_add(1, Ordering::SeqCst) < self.limit
        }
    }

    #[derive(Default)]
    struct CapturedEvents(Mutex<Vec<EventMessage>>);

    impl ProgressSink for CapturedEvents {
        fn emit(&self, event: EventMessage) {
            self.0.lock().unwrap().push(event);
        }
    }

    impl CapturedEvents {
        fn statuses(&self) -> Vec<(String, Option<f64>, Option<bool>)> {
            self.0
                .lock()
                .unwrap()
                .iter()
                .filter_map(|e| match e {
                    EventMessage::Status { text, progress, completed } => {
                        Some((text.clone(), *progress, *completed))
                    }
                    _ => None,
                })
                .collect()
        }
    }

    fn contacts(n: usize) -> Vec<Contact> {
        (0..n)
            .map(|i| contact(&format!("1555000{i:04}"), &format!("c{i}"), "hi {{Name}}"))
            .collect()
    }

    #[tokio::test]
    async fn emits_n_progress_events_and_one_completion() {
        let dispatch = ScriptedDispatch::new(&[]);
        let liveness = CountdownLiveness::new(usize::MAX);
        let history = HistoryLog::open_in_memory().unwrap();
        let events = CapturedEvents::default();

        let list = contacts(3);
        let summary = BatchRunner::new(&dispatch, &liveness, &history, &events)
            .run(&list)
            .await;

        assert_eq!(summary, BatchSummary { sent: 3, failed: 0, cancelled: 0 });

        let statuses = events.statuses();
        assert_eq!(statuses.len(), 4);

        let progress: Vec<f64> = statuses[..3].iter().map(|(_, p, _)| p.unwrap()).collect();
        assert!(progress.windows(2).all(|w| w[0] < w[1]), "not strictly increasing: {progress:?}");
        assert_eq!(progress[2], 100.0);
        assert!(statuses[..3].iter().all(|(_, _, c)| c.is_none()));

        let (text, progress, completed) = &statuses[3];
        assert_eq!(text, "Completed! Successfully sent: 3, Failed: 0");
        assert_eq!(*progress, Some(100.0));
        assert_eq!(*completed, Some(true));

        assert_eq!(history.len().unwrap(), 3);
    }

    #[tokio::test]
    async fn one_failure_does_not_abort_the_batch() {
        let dispatch = ScriptedDispatch::new(&["15550000001"]);
        let liveness = CountdownLiveness::new(usize::MAX);
        let history = HistoryLog::open_in_memory().unwrap();
        let events = CapturedEvents::default();

        let list = contacts(3);
        let summary = BatchRunner::new(&dispatch, &liveness, &history, &events)
            .run(&list)
            .await;

        assert_eq!(summary, BatchSummary { sent: 2, failed: 1, cancelled: 0 });
        let statuses = events.statuses();
        assert_eq!(
            statuses.last().unwrap().0,
            "Completed! Successfully sent: 2, Failed: 1"
        );
    }

    #[tokio::test]
    async fn dead_target_at_start_cancels_everything_without_attempts() {
        let dispatch = ScriptedDispatch::new(&[]);
        let liveness = CountdownLiveness::new(0);
        let history = HistoryLog::open_in_memory().unwrap();
        let events = CapturedEvents::default();

        let list = contacts(2);
        let summary = BatchRunner::new(&dispatch, &liveness, &history, &events)
            .run(&list)
            .await;

        assert_eq!(summary, BatchSummary { sent: 0, failed: 0, cancelled: 2 });
        assert_eq!(dispatch.calls.load(Ordering::SeqCst), 0);

        let statuses = events.statuses();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].0, "Please open WhatsApp Web first");
        assert_eq!(statuses[0].2, Some(true));

        let entries = history.recent(10).unwrap();
        assert!(entries.iter().all(|e| e.status == OutcomeKind::Cancelled));
    }

    #[tokio::test]
    async fn losing_the_target_mid_run_cancels_the_rest() {
        let dispatch = ScriptedDispatch::new(&[]);
        // Checks: precondition, iteration 0, iteration 1 (dead).
        let liveness = CountdownLiveness::new(2);
        let history = HistoryLog::open_in_memory().unwrap();
        let events = CapturedEvents::default();

        let list = contacts(4);
        let summary = BatchRunner::new(&dispatch, &liveness, &history, &events)
            .run(&list)
            .await;

        assert_eq!(summary, BatchSummary { sent: 1, failed: 0, cancelled: 3 });
        assert_eq!(dispatch.calls.load(Ordering::SeqCst), 1);

        // Attempted contact keeps its real outcome, the rest are Cancelled.
        let mut entries = history.recent(10).unwrap();
        entries.reverse();
        assert_eq!(entries[0].status, OutcomeKind::Sent);
        assert!(entries[1..].iter().all(|e| e.status == OutcomeKind::Cancelled));

        // Exactly one interrupted completion event.
        let completions: Vec<_> = events
            .statuses()
            .into_iter()
            .filter(|(_, _, c)| *c == Some(true))
            .collect();
        assert_eq!(completions.len(), 1);
        assert!(completions[0].0.starts_with("Sending interrupted"));
    }

    #[tokio::test]
    async fn single_contact_scenario_end_to_end() {
        let dispatch = ScriptedDispatch::new(&[]);
        let liveness = CountdownLiveness::new(usize::MAX);
        let history = HistoryLog::open_in_memory().unwrap();
        let events = CapturedEvents::default();

        let list = vec![contact("1", "A", "Hi {{Name}}")];
        assert_eq!(list[0].processed_message, "Hi A");

        let summary = BatchRunner::new(&dispatch, &liveness, &history, &events)
            .run(&list)
            .await;

        assert_eq!(summary, BatchSummary { sent: 1, failed: 0, cancelled: 0 });

        let entries = history.recent(10).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, OutcomeKind::Sent);
        assert_eq!(entries[0].result, "Message sent to A");

        assert_eq!(
            events.statuses().last().unwrap().0,
            "Completed! Successfully sent: 1, Failed: 0"
        );
    }
}
