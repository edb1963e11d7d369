//! Triage pipeline — runs one message from raw bytes to delivery.
//!
//! Flow:
//! 1. Dedup guard (fingerprint already seen → skip)
//! 2. Content extraction (never fails)
//! 3. Classification → Geocoding (only with an address) → Routing
//! 4. Forward, with the error-report fallback
//!
//! Each step is fault-isolated: a failure routes the message to the
//! control mailbox and is counted, it never escapes to the poll loop.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::channels::RawMessage;
use crate::extract::ContentExtractor;
use crate::pipeline::classifier::Classifier;
use crate::pipeline::forwarder::Forwarder;
use crate::pipeline::geocoder::Geocoder;
use crate::pipeline::resolver::{RoutingConfig, resolve};
use crate::pipeline::state::TriageState;
use crate::pipeline::types::{Annotation, Department, RouteReason};

/// What happened to one fetched message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Fingerprint already processed in this run.
    Duplicate,
    Delivered(RouteReason),
    /// Classifier failed; forwarded to review with a note.
    ClassificationFailed,
    /// Not a mail message; reported to the control mailbox.
    Unparseable,
    /// Forward failed (reported or critical).
    DeliveryFailed,
}

impl MessageOutcome {
    /// Whether the message counted toward `total_processed`.
    pub fn is_processed(&self) -> bool {
        !matches!(self, Self::Duplicate)
    }
}

pub struct TriagePipeline {
    extractor: ContentExtractor,
    classifier: Arc<dyn Classifier>,
    geocoder: Option<Arc<dyn Geocoder>>,
    forwarder: Forwarder,
    routing: RoutingConfig,
    departments: Vec<Department>,
}

impl TriagePipeline {
    pub fn new(
        extractor: ContentExtractor,
        classifier: Arc<dyn Classifier>,
        geocoder: Option<Arc<dyn Geocoder>>,
        forwarder: Forwarder,
        routing: RoutingConfig,
        departments: Vec<Department>,
    ) -> Self {
        Self {
            extractor,
            classifier,
            geocoder,
            forwarder,
            routing,
            departments,
        }
    }

    /// Process one message, updating the dedup set and counters in `state`.
    pub async fn process(&self, raw: &RawMessage, state: &mut TriageState) -> MessageOutcome {
        let fingerprint = raw.fingerprint();
        if state.is_processed(&fingerprint) {
            debug!(seq = raw.seq, %fingerprint, "Skipping duplicate message");
            return MessageOutcome::Duplicate;
        }

        info!(seq = raw.seq, %fingerprint, "Processing message");

        if raw.parse().is_none() {
            warn!(seq = raw.seq, bytes = raw.as_bytes().len(), "Message is not parseable");
            let body = String::from_utf8_lossy(raw.as_bytes());
            if let Err(e) = self
                .forwarder
                .report_error("Message could not be parsed", &body)
                .await
            {
                error!(seq = raw.seq, error = %e, "Error report for unparseable message failed");
            }
            state.metrics.record_failure();
            return MessageOutcome::Unparseable;
        }

        let content = self.extractor.extract(raw).await;

        let classification = match self.classifier.classify(&content, &self.departments).await {
            Ok(classification) => classification,
            Err(e) => {
                let decision = resolve(None, None, &self.routing);
                let annotation = Annotation {
                    note: Some(e.marker().to_string()),
                    ..Default::default()
                };
                if let Err(delivery) = self
                    .forwarder
                    .forward(raw, &content, &decision, &annotation)
                    .await
                {
                    error!(seq = raw.seq, error = %delivery, "Review forward after classifier failure failed");
                }
                state.metrics.record_failure();
                return MessageOutcome::ClassificationFailed;
            }
        };

        let geocode = match &self.geocoder {
            Some(geocoder) if classification.has_address() => {
                Some(geocoder.geocode(&classification.address).await)
            }
            _ => None,
        };

        let decision = resolve(Some(&classification), geocode.as_ref(), &self.routing);
        debug!(
            seq = raw.seq,
            confidence = classification.confidence,
            reason = decision.reason.label(),
            to = %decision.destination,
            "Routing decided"
        );

        let annotation = Annotation {
            classification: Some(classification),
            geocode,
            note: None,
        };

        match self
            .forwarder
            .forward(raw, &content, &decision, &annotation)
            .await
        {
            Ok(()) => {
                state.mark_processed(fingerprint);
                state.metrics.record_success();
                if decision.reason == RouteReason::LowConfidence {
                    state.metrics.record_low_confidence();
                }
                MessageOutcome::Delivered(decision.reason)
            }
            Err(e) => {
                error!(seq = raw.seq, error = %e, "Delivery failed");
                state.metrics.record_failure();
                MessageOutcome::DeliveryFailed
            }
        }
    }

    /// Process a batch in order. Failures on one message don't affect the rest.
    pub async fn process_batch(
        &self,
        messages: &[RawMessage],
        state: &mut TriageState,
    ) -> Vec<MessageOutcome> {
        let mut outcomes = Vec::with_capacity(messages.len());
        for raw in messages {
            outcomes.push(self.process(raw, state).await);
        }
        outcomes
    }
}
