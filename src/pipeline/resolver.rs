//! Picks the destination mailbox for one message.

use std::collections::HashMap;

use crate::pipeline::types::{
    ClassificationResult, GeocodeResult, MacroArea, RouteReason, RoutingDecision,
};

/// Default minimum confidence for automatic routing.
pub const DEFAULT_CONFIDENCE_THRESHOLD: u8 = 90;

#[derive(Debug, Clone)]
pub struct RoutingConfig {
    /// Confidence at or above this is routed automatically.
    pub threshold: u8,
    /// Human-review mailbox.
    pub control_mailbox: String,
    pub recipients: HashMap<MacroArea, String>,
}

impl RoutingConfig {
    pub fn recipient(&self, area: MacroArea) -> Option<&str> {
        self.recipients
            .get(&area)
            .map(String::as_str)
            .filter(|addr| !addr.trim().is_empty())
    }
}

/// Exactly one of four outcomes:
/// 1. no classification → review (`ExtractionError`)
/// 2. confidence below threshold → review (`LowConfidence`)
/// 3. resolved area with a recipient → that recipient (`HighConfidence`)
/// 4. anything else → review (`UnmappedArea`)
pub fn resolve(
    classification: Option<&ClassificationResult>,
    geocode: Option<&GeocodeResult>,
    config: &RoutingConfig,
) -> RoutingDecision {
    let review = |reason| RoutingDecision {
        destination: config.control_mailbox.clone(),
        reason,
    };

    let Some(classification) = classification else {
        return review(RouteReason::ExtractionError);
    };

    if classification.confidence < config.threshold {
        return review(RouteReason::LowConfidence);
    }

    match geocode
        .and_then(GeocodeResult::macro_area)
        .and_then(|area| config.recipient(area))
    {
        Some(recipient) => RoutingDecision {
            destination: recipient.to_string(),
            reason: RouteReason::HighConfidence,
        },
        None => review(RouteReason::UnmappedArea),
    }
}
