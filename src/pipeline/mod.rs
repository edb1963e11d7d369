//! Email triage pipeline.
//!
//! Every fetched message flows through:
//! 1. `ContentExtractor::extract()` — subject, body, PDF text
//! 2. `Classifier::classify()` — LLM reading, strictly validated
//! 3. `Geocoder::geocode()` — only when an address was found
//! 4. `resolve()` — confidence-gated destination
//! 5. `Forwarder::forward()` — annotated message plus original PDFs
//!
//! **Every failure has a delivery path.** Nothing is dropped silently:
//! low confidence, bad classifier output and send failures all end in the
//! control mailbox.

pub mod classifier;
pub mod forwarder;
pub mod geocoder;
pub mod metrics;
pub mod poller;
pub mod processor;
pub mod resolver;
pub mod state;
pub mod types;

pub use classifier::{ChatCompletionsClassifier, Classifier, create_classifier};
pub use forwarder::Forwarder;
pub use geocoder::{AzureMapsGeocoder, Geocoder, classify_region};
pub use metrics::{MetricsFile, MetricsSnapshot, ProcessingMetrics};
pub use poller::{Poller, PollerConfig, spawn_poller};
pub use processor::{MessageOutcome, TriagePipeline};
pub use resolver::{RoutingConfig, resolve};
pub use state::TriageState;
pub use types::*;
