//! Per-message relay pipeline.
//!
//! For each inbound message the engine snapshots the other open connections,
//! queues the `message` frame on each of them before returning, and then
//! spawns one enrichment task per recipient. Enrichment asks the generator
//! for replies, parses them, and queues either a three-item `suggestions`
//! frame or the empty hide signal. Every (message, recipient) unit is
//! independent: nothing one unit does can fail another.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use metrics::{counter, gauge};
use tokio::task::JoinHandle;
use tracing::{debug, debug_span, warn, Instrument};

use parley_core::errors::GenerationError;
use parley_core::events::{InboundMessage, OutboundEvent};
use parley_core::generator::{suggestion_prompt, SuggestionGenerator};
use parley_core::ids::{ConnectionId, MessageId};
use parley_core::suggestions::SuggestionBatch;
use parley_telemetry::metrics::{
    ENRICHMENTS_IN_FLIGHT, RELAY_MESSAGES_TOTAL, RELAY_SEND_FAILURES_TOTAL,
    SUGGESTIONS_DELIVERED_TOTAL, SUGGESTIONS_SUPPRESSED_TOTAL,
};

use crate::connection::Connection;
use crate::error::SendError;
use crate::registry::ConnectionRegistry;

/// Why a recipient got the hide signal instead of suggestions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SuppressReason {
    GenerationFailed(GenerationError),
    /// Parsed candidate count was not exactly three.
    MalformedCount(usize),
}

impl SuppressReason {
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::GenerationFailed(_) => "generation_failed",
            Self::MalformedCount(_) => "malformed_count",
        }
    }
}

/// How one enrichment task ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EnrichmentOutcome {
    /// Three suggestions were queued for the recipient.
    Delivered,
    /// The hide signal was queued for the recipient.
    Suppressed(SuppressReason),
    /// The recipient closed while generation was pending.
    Cancelled,
    /// The result could not be queued; it was discarded.
    Undeliverable(SendError),
}

/// What `relay` did with one inbound message.
#[derive(Debug)]
pub struct RelayReport {
    pub message_id: MessageId,
    /// Connections in the snapshot.
    pub recipients: usize,
    /// Connections the `message` frame was queued on.
    pub delivered: usize,
    /// One enrichment task per delivered recipient. Dropping the handles
    /// detaches the tasks; they still run to completion.
    pub tasks: Vec<JoinHandle<EnrichmentOutcome>>,
}

/// Fans inbound messages out to every other connection and enriches each
/// delivery with reply suggestions.
#[derive(Clone)]
pub struct RelayEngine {
    registry: Arc<ConnectionRegistry>,
    generator: Arc<dyn SuggestionGenerator>,
    in_flight: Arc<AtomicUsize>,
}

impl RelayEngine {
    pub fn new(registry: Arc<ConnectionRegistry>, generator: Arc<dyn SuggestionGenerator>) -> Self {
        Self {
            registry,
            generator,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Enrichment tasks that have not finished yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Relay `message` from connection `from` to every other open connection.
    ///
    /// Must be called from within a Tokio runtime. Returns once every
    /// `message` frame is queued; enrichment continues in the background.
    pub fn relay(&self, from: &ConnectionId, message: InboundMessage) -> RelayReport {
        let message_id = MessageId::new();
        let recipients = self.registry.others(from);
        counter!(RELAY_MESSAGES_TOTAL).increment(1);

        let mut report = RelayReport {
            message_id: message_id.clone(),
            recipients: recipients.len(),
            delivered: 0,
            tasks: Vec::with_capacity(recipients.len()),
        };
        if recipients.is_empty() {
            debug!(msg_id = %message_id, from = %from, "no recipients");
            return report;
        }

        let InboundMessage { sender, content } = message;
        let prompt: Arc<str> = suggestion_prompt(&sender, &content).into();
        let frame = match (OutboundEvent::Message { sender: sender.clone(), content }).to_json() {
            Ok(json) => Arc::new(json),
            Err(e) => {
                warn!(msg_id = %message_id, error = %e, "failed to encode message");
                return report;
            }
        };

        for recipient in recipients {
            if let Err(e) = recipient.send(Arc::clone(&frame)) {
                counter!(RELAY_SEND_FAILURES_TOTAL, "reason" => e.error_kind()).increment(1);
                debug!(
                    msg_id = %message_id,
                    conn_id = %recipient.id(),
                    error_kind = e.error_kind(),
                    "skipping recipient"
                );
                continue;
            }
            report.delivered += 1;

            let span = debug_span!("enrich", msg_id = %message_id, conn_id = %recipient.id());
            let task = enrich(
                recipient,
                Arc::clone(&self.generator),
                sender.clone(),
                Arc::clone(&prompt),
                InFlightGuard::new(Arc::clone(&self.in_flight)),
            );
            report.tasks.push(tokio::spawn(task.instrument(span)));
        }

        debug!(
            msg_id = %message_id,
            sender = %sender,
            recipients = report.recipients,
            delivered = report.delivered,
            "message relayed"
        );
        report
    }
}

async fn enrich(
    recipient: Arc<Connection>,
    generator: Arc<dyn SuggestionGenerator>,
    sender: String,
    prompt: Arc<str>,
    _guard: InFlightGuard,
) -> EnrichmentOutcome {
    let cancel = recipient.cancellation();
    let result = tokio::select! {
        biased;
        () = cancel.cancelled() => {
            debug!("recipient closed, generation abandoned");
            return EnrichmentOutcome::Cancelled;
        }
        result = generator.generate(&prompt) => result,
    };

    let (event, outcome) = match result {
        Ok(raw) => {
            let batch = SuggestionBatch::parse(&raw);
            let count = batch.len();
            match batch.accepted() {
                Some(content) => (
                    OutboundEvent::Suggestions { sender, content },
                    EnrichmentOutcome::Delivered,
                ),
                None => {
                    debug!(count, "unexpected suggestion count");
                    (
                        OutboundEvent::hide_suggestions(sender),
                        EnrichmentOutcome::Suppressed(SuppressReason::MalformedCount(count)),
                    )
                }
            }
        }
        Err(e) => (
            OutboundEvent::hide_suggestions(sender),
            EnrichmentOutcome::Suppressed(SuppressReason::GenerationFailed(e)),
        ),
    };

    if let Err(e) = recipient.send_event(&event) {
        counter!(RELAY_SEND_FAILURES_TOTAL, "reason" => e.error_kind()).increment(1);
        debug!(error_kind = e.error_kind(), "suggestions discarded");
        return EnrichmentOutcome::Undeliverable(e);
    }

    match &outcome {
        EnrichmentOutcome::Delivered => counter!(SUGGESTIONS_DELIVERED_TOTAL).increment(1),
        EnrichmentOutcome::Suppressed(reason) => {
            counter!(SUGGESTIONS_SUPPRESSED_TOTAL, "reason" => reason.as_label()).increment(1)
        }
        _ => {}
    }
    outcome
}

/// Tracks a running enrichment task; released on drop, including abort.
struct InFlightGuard {
    counter: Arc<AtomicUsize>,
}

impl InFlightGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        let now = counter.fetch_add(1, Ordering::Relaxed) + 1;
        gauge!(ENRICHMENTS_IN_FLIGHT).set(now as f64);
        Self { counter }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let now = self.counter.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
        gauge!(ENRICHMENTS_IN_FLIGHT).set(now as f64);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use parley_llm::{BoundedGenerator, MockGenerator, MockResponse};
    use serde_json::Value;
    use tokio::sync::mpsc;

    const GOOD_REPLY: &str = "1. Hi\n2. Hey\n3. Yo";

    struct Client {
        conn: Arc<Connection>,
        rx: mpsc::Receiver<Arc<String>>,
    }

    impl Client {
        fn join(registry: &ConnectionRegistry, name: &str) -> Self {
            let (tx, rx) = mpsc::channel(32);
            let conn = Arc::new(Connection::new(name, tx));
            registry.add(Arc::clone(&conn));
            Self { conn, rx }
        }

        async fn next(&mut self) -> Value {
            let frame = self.rx.recv().await.expect("channel open");
            serde_json::from_str(&frame).unwrap()
        }

        fn assert_idle(&mut self) {
            assert!(self.rx.try_recv().is_err(), "unexpected frame queued");
        }
    }

    fn engine_with(generator: impl SuggestionGenerator + 'static) -> RelayEngine {
        RelayEngine::new(Arc::new(ConnectionRegistry::new()), Arc::new(generator))
    }

    async fn finish(report: RelayReport) -> Vec<EnrichmentOutcome> {
        let mut outcomes = Vec::new();
        for task in report.tasks {
            outcomes.push(task.await.unwrap());
        }
        outcomes
    }

    #[tokio::test]
    async fn three_client_scenario() {
        let engine = engine_with(MockGenerator::repeating(MockResponse::text(GOOD_REPLY)));
        let registry = engine.registry();
        let mut dog = Client::join(registry, "happy dog");
        let mut cat = Client::join(registry, "brave cat");
        let mut bee = Client::join(registry, "lucky bee");

        let report = engine.relay(dog.conn.id(), InboundMessage::new("happy dog", "hello"));
        assert_eq!(report.recipients, 2);
        assert_eq!(report.delivered, 2);
        let outcomes = finish(report).await;
        assert!(outcomes.iter().all(|o| *o == EnrichmentOutcome::Delivered));

        for client in [&mut cat, &mut bee] {
            let message = client.next().await;
            assert_eq!(
                message,
                serde_json::json!({"type": "message", "sender": "happy dog", "content": "hello"})
            );
            let suggestions = client.next().await;
            assert_eq!(
                suggestions,
                serde_json::json!({"type": "suggestions", "sender": "happy dog", "content": ["Hi", "Hey", "Yo"]})
            );
            client.assert_idle();
        }
        dog.assert_idle();
    }

    #[tokio::test]
    async fn message_is_queued_before_relay_returns() {
        // Generation never completes within the test.
        let engine = engine_with(MockGenerator::repeating(MockResponse::delayed(
            Duration::from_secs(3600),
            MockResponse::text(GOOD_REPLY),
        )));
        let registry = engine.registry();
        let a = Client::join(registry, "happy dog");
        let mut b = Client::join(registry, "brave cat");

        let report = engine.relay(a.conn.id(), InboundMessage::new("happy dog", "hi"));
        let frame = b.rx.try_recv().expect("message queued synchronously");
        assert!(frame.contains(r#""type":"message""#));
        for task in report.tasks {
            task.abort();
        }
    }

    #[tokio::test]
    async fn one_call_per_recipient_with_templated_prompt() {
        let generator = Arc::new(MockGenerator::repeating(MockResponse::text(GOOD_REPLY)));
        let engine = RelayEngine::new(Arc::new(ConnectionRegistry::new()), generator.clone());
        let registry = engine.registry();
        let a = Client::join(registry, "happy dog");
        let _b = Client::join(registry, "brave cat");
        let _c = Client::join(registry, "lucky bee");
        let _d = Client::join(registry, "calm owl");

        finish(engine.relay(a.conn.id(), InboundMessage::new("happy dog", "hello"))).await;
        assert_eq!(generator.call_count(), 3);
        let expected =
            "A person named 'happy dog' said to me 'hello'. Numerically list 3 extremely brief responses.";
        assert!(generator.prompts().iter().all(|p| p == expected));
    }

    #[tokio::test]
    async fn wrong_count_sends_hide_signal() {
        let engine = engine_with(MockGenerator::repeating(MockResponse::text("1. Sure\n2. Okay")));
        let registry = engine.registry();
        let a = Client::join(registry, "happy dog");
        let mut b = Client::join(registry, "brave cat");

        let outcomes = finish(engine.relay(a.conn.id(), InboundMessage::new("happy dog", "yo"))).await;
        assert_eq!(
            outcomes,
            vec![EnrichmentOutcome::Suppressed(SuppressReason::MalformedCount(2))]
        );

        assert_eq!(b.next().await["type"], "message");
        assert_eq!(
            b.next().await,
            serde_json::json!({"type": "suggestions", "sender": "happy dog", "content": []})
        );
        b.assert_idle();
    }

    #[tokio::test]
    async fn blank_lines_do_not_shift_the_count() {
        let engine = engine_with(MockGenerator::repeating(MockResponse::text(
            "1. Sure\n2. Okay\n\n3. Nope",
        )));
        let registry = engine.registry();
        let a = Client::join(registry, "happy dog");
        let mut b = Client::join(registry, "brave cat");

        finish(engine.relay(a.conn.id(), InboundMessage::new("happy dog", "ok?"))).await;
        b.next().await;
        assert_eq!(
            b.next().await["content"],
            serde_json::json!(["Sure", "Okay", "Nope"])
        );
    }

    #[tokio::test]
    async fn backend_failure_is_isolated_per_recipient() {
        let engine = engine_with(MockGenerator::new(vec![
            MockResponse::unavailable("connection refused"),
            MockResponse::text(GOOD_REPLY),
            MockResponse::text(GOOD_REPLY),
        ]));
        let registry = engine.registry();
        let a = Client::join(registry, "happy dog");
        let mut others: Vec<_> = ["brave cat", "lucky bee", "calm owl"]
            .into_iter()
            .map(|name| Client::join(registry, name))
            .collect();

        let outcomes = finish(engine.relay(a.conn.id(), InboundMessage::new("happy dog", "hi"))).await;
        let delivered = outcomes.iter().filter(|o| **o == EnrichmentOutcome::Delivered).count();
        let failed = outcomes
            .iter()
            .filter(|o| matches!(o, EnrichmentOutcome::Suppressed(SuppressReason::GenerationFailed(_))))
            .count();
        assert_eq!((delivered, failed), (2, 1));

        let mut hidden = 0;
        for client in &mut others {
            // Every recipient still got the message first.
            assert_eq!(client.next().await["type"], "message");
            let suggestions = client.next().await;
            match suggestions["content"].as_array().map(Vec::len) {
                Some(0) => hidden += 1,
                Some(3) => {}
                other => panic!("unexpected suggestions payload: {other:?}"),
            }
        }
        assert_eq!(hidden, 1);
    }

    /// Stalls only on prompts that mention `marker`.
    struct SlowOn {
        marker: &'static str,
    }

    #[async_trait::async_trait]
    impl SuggestionGenerator for SlowOn {
        fn name(&self) -> &str {
            "slow-on"
        }

        fn model(&self) -> &str {
            "test"
        }

        async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
            if prompt.contains(self.marker) {
                tokio::time::sleep(Duration::from_secs(20)).await;
            }
            Ok(GOOD_REPLY.to_string())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_enrichment_does_not_block_other_messages() {
        let engine = engine_with(SlowOn { marker: "first" });
        let registry = engine.registry();
        let a = Client::join(registry, "happy dog");
        let b = Client::join(registry, "brave cat");

        let slow = engine.relay(a.conn.id(), InboundMessage::new("happy dog", "first"));
        let fast = engine.relay(b.conn.id(), InboundMessage::new("brave cat", "second"));

        let started = tokio::time::Instant::now();
        assert_eq!(finish(fast).await, vec![EnrichmentOutcome::Delivered]);
        assert!(started.elapsed() < Duration::from_secs(20));
        assert_eq!(engine.in_flight(), 1);

        assert_eq!(finish(slow).await, vec![EnrichmentOutcome::Delivered]);
        assert_eq!(engine.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_sends_hide_signal() {
        let engine = engine_with(BoundedGenerator::new(
            MockGenerator::repeating(MockResponse::delayed(
                Duration::from_secs(120),
                MockResponse::text(GOOD_REPLY),
            )),
            Duration::from_secs(30),
        ));
        let registry = engine.registry();
        let a = Client::join(registry, "happy dog");
        let mut b = Client::join(registry, "brave cat");

        let outcomes = finish(engine.relay(a.conn.id(), InboundMessage::new("happy dog", "hi"))).await;
        assert_eq!(
            outcomes,
            vec![EnrichmentOutcome::Suppressed(SuppressReason::GenerationFailed(
                GenerationError::Timeout(Duration::from_secs(30))
            ))]
        );
        b.next().await;
        assert_eq!(b.next().await["content"], serde_json::json!([]));
    }

    #[tokio::test(start_paused = true)]
    async fn closing_recipient_cancels_enrichment() {
        let engine = engine_with(MockGenerator::repeating(MockResponse::delayed(
            Duration::from_secs(3600),
            MockResponse::text(GOOD_REPLY),
        )));
        let registry = engine.registry();
        let a = Client::join(registry, "happy dog");
        let b = Client::join(registry, "brave cat");

        let report = engine.relay(a.conn.id(), InboundMessage::new("happy dog", "bye"));
        assert_eq!(engine.in_flight(), 1);
        registry.remove(b.conn.id());

        let outcomes = finish(report).await;
        assert_eq!(outcomes, vec![EnrichmentOutcome::Cancelled]);
        assert_eq!(engine.in_flight(), 0);
    }

    #[tokio::test]
    async fn result_for_lost_recipient_is_discarded() {
        let engine = engine_with(MockGenerator::repeating(MockResponse::text(GOOD_REPLY)));
        let registry = engine.registry();
        let a = Client::join(registry, "happy dog");
        let Client { conn: b_conn, rx: mut b_rx } = Client::join(registry, "brave cat");

        // The transport has ended but the registry has not caught up yet.
        let report = engine.relay(a.conn.id(), InboundMessage::new("happy dog", "hi"));
        assert!(b_rx.try_recv().is_ok());
        b_conn.begin_close();

        let outcomes = finish(report).await;
        assert_eq!(
            outcomes,
            vec![EnrichmentOutcome::Undeliverable(SendError::ConnectionLost)]
        );
    }

    #[tokio::test]
    async fn removed_connection_receives_nothing() {
        let engine = engine_with(MockGenerator::repeating(MockResponse::text(GOOD_REPLY)));
        let registry = engine.registry();
        let a = Client::join(registry, "happy dog");
        let mut b = Client::join(registry, "brave cat");
        let mut c = Client::join(registry, "lucky bee");

        registry.remove(b.conn.id());
        let report = engine.relay(a.conn.id(), InboundMessage::new("happy dog", "hello"));
        assert_eq!(report.recipients, 1);
        finish(report).await;

        b.assert_idle();
        assert_eq!(c.next().await["type"], "message");
    }

    #[tokio::test]
    async fn full_queue_skips_recipient() {
        let engine = engine_with(MockGenerator::repeating(MockResponse::text(GOOD_REPLY)));
        let registry = engine.registry();
        let a = Client::join(registry, "happy dog");
        let (tx, _rx) = mpsc::channel(1);
        let stuck = Arc::new(Connection::new("slow fox", tx));
        stuck.send(Arc::new("backlog".into())).unwrap();
        registry.add(Arc::clone(&stuck));
        let mut c = Client::join(registry, "lucky bee");

        let report = engine.relay(a.conn.id(), InboundMessage::new("happy dog", "hello"));
        assert_eq!(report.recipients, 2);
        assert_eq!(report.delivered, 1);
        assert_eq!(stuck.drop_count(), 1);
        finish(report).await;
        assert_eq!(c.next().await["type"], "message");
    }

    #[tokio::test]
    async fn lone_sender_has_no_recipients() {
        let generator = Arc::new(MockGenerator::repeating(MockResponse::text(GOOD_REPLY)));
        let engine = RelayEngine::new(Arc::new(ConnectionRegistry::new()), generator.clone());
        let mut a = Client::join(engine.registry(), "happy dog");

        let report = engine.relay(a.conn.id(), InboundMessage::new("happy dog", "anyone?"));
        assert_eq!(report.recipients, 0);
        assert!(report.tasks.is_empty());
        assert_eq!(generator.call_count(), 0);
        a.assert_idle();
    }

    #[tokio::test]
    async fn messages_from_one_sender_keep_order() {
        let engine = engine_with(MockGenerator::repeating(MockResponse::text("nope")));
        let registry = engine.registry();
        let a = Client::join(registry, "happy dog");
        let mut b = Client::join(registry, "brave cat");

        let mut reports = Vec::new();
        for i in 0..5 {
            reports.push(engine.relay(a.conn.id(), InboundMessage::new("happy dog", format!("m{i}"))));
        }
        for report in reports {
            finish(report).await;
        }

        let mut contents = Vec::new();
        while let Ok(frame) = b.rx.try_recv() {
            let value: Value = serde_json::from_str(&frame).unwrap();
            if value["type"] == "message" {
                contents.push(value["content"].as_str().unwrap().to_string());
            }
        }
        assert_eq!(contents, vec!["m0", "m1", "m2", "m3", "m4"]);
    }
}
