//! Shared types for the triage pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};

// ── Departments ─────────────────────────────────────────────────────

/// A routing department, as listed in the externally managed JSON file.
///
/// The legacy Italian keys (`nome`, `descrizione`, `email`) are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Department {
    #[serde(alias = "nome")]
    pub name: String,
    #[serde(default, alias = "descrizione")]
    pub description: String,
    #[serde(default, alias = "email")]
    pub email_address: String,
}

// ── Classification ──────────────────────────────────────────────────

/// Validated classifier output. Never partially filled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub summary: String,
    pub equipment: String,
    pub address: String,
    /// 0..=100.
    pub confidence: u8,
    /// Department name, always one of the candidates when any exist.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
}

impl ClassificationResult {
    /// The classifier reports `"not found"` rather than inventing an address.
    pub fn has_address(&self) -> bool {
        let address = self.address.trim();
        !address.is_empty() && !address.eq_ignore_ascii_case("not found")
    }
}

// ── Geography ───────────────────────────────────────────────────────

/// Coarse routing region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MacroArea {
    Nord,
    Centro,
    Sud,
    Unknown,
}

impl MacroArea {
    /// Key used by the recipient map and the `RECIPIENTS_*` variables.
    pub fn key(&self) -> &'static str {
        match self {
            Self::Nord => "nord",
            Self::Centro => "centro",
            Self::Sud => "sud",
            Self::Unknown => "unknown",
        }
    }

    /// Areas that can carry a recipient.
    pub const ROUTABLE: [MacroArea; 3] = [MacroArea::Nord, MacroArea::Centro, MacroArea::Sud];
}

impl fmt::Display for MacroArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Nord => "Nord",
            Self::Centro => "Centro",
            Self::Sud => "Sud",
            Self::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

/// Marker for a failed forward lookup.
pub const ADDRESS_NOT_FOUND: &str = "Address not found";

/// Marker for a failed reverse lookup.
pub const ADDRESS_DETAILS_NOT_FOUND: &str = "Address details not found";

/// Outcome of geocoding an address. Lookup failures are data, not errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeocodeResult {
    Resolved {
        comune: String,
        provincia: String,
        regione: String,
        macro_area: MacroArea,
    },
    Unresolved {
        marker: String,
    },
}

impl GeocodeResult {
    pub fn unresolved(marker: &str) -> Self {
        Self::Unresolved {
            marker: marker.to_string(),
        }
    }

    pub fn macro_area(&self) -> Option<MacroArea> {
        match self {
            Self::Resolved { macro_area, .. } => Some(*macro_area),
            Self::Unresolved { .. } => None,
        }
    }

    /// One-line description for the forwarded header block.
    pub fn describe(&self) -> String {
        match self {
            Self::Resolved {
                comune,
                provincia,
                regione,
                macro_area,
            } => format!("{comune}, {provincia}, {regione} ({macro_area})"),
            Self::Unresolved { marker } => marker.clone(),
        }
    }
}

// ── Routing ─────────────────────────────────────────────────────────

/// Why a destination was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteReason {
    HighConfidence,
    LowConfidence,
    UnmappedArea,
    ExtractionError,
}

impl RouteReason {
    pub fn label(&self) -> &'static str {
        match self {
            Self::HighConfidence => "high confidence",
            Self::LowConfidence => "low confidence",
            Self::UnmappedArea => "unmapped area",
            Self::ExtractionError => "extraction error",
        }
    }

    /// Whether this route ends in the human-review mailbox.
    pub fn is_review(&self) -> bool {
        !matches!(self, Self::HighConfidence)
    }
}

/// Where one message goes, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingDecision {
    pub destination: String,
    pub reason: RouteReason,
}

// ── Annotation ──────────────────────────────────────────────────────

/// Everything the forwarded header block shows about the analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Annotation {
    pub classification: Option<ClassificationResult>,
    pub geocode: Option<GeocodeResult>,
    /// Free-form marker, e.g. `Invalid JSON response`.
    pub note: Option<String>,
}
