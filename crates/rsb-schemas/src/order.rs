//! Outcome types for order ingestion.

use serde::{Deserialize, Serialize};

/// Why an order was rejected before reaching RMS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    /// Financial status outside {paid, partially_paid, authorized}.
    NotPaid { status: String },
    /// No line items carrying a SKU, or non-positive total.
    EmptyOrder,
    /// At least one line item's SKU has no RMS item. Partial ingestion is
    /// never attempted; the whole order is rejected.
    UnknownSku { skus: Vec<String> },
    /// Customer email missing while `REQUIRE_CUSTOMER_EMAIL` is set.
    MissingEmail,
}

impl RejectReason {
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::NotPaid { .. } => "not_paid",
            RejectReason::EmptyOrder => "empty_order",
            RejectReason::UnknownSku { .. } => "unknown_sku",
            RejectReason::MissingEmail => "missing_email",
        }
    }
}

/// Terminal state of one ingestion attempt.
///
/// `Received → Validated → Resolved → Persisted`, short-circuiting to
/// `Rejected` or `Duplicate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IngestOutcome {
    /// Header and lines committed in one RMS transaction.
    Persisted { order_id: i64 },
    /// An order with this reference number already exists; nothing written.
    Duplicate,
    Rejected { reason: RejectReason },
}

impl IngestOutcome {
    pub fn status_str(&self) -> &'static str {
        match self {
            IngestOutcome::Persisted { .. } => "Persisted",
            IngestOutcome::Duplicate => "Duplicate",
            IngestOutcome::Rejected { .. } => "Rejected",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reject_codes_are_stable() {
        assert_eq!(
            RejectReason::UnknownSku { skus: vec!["X".into()] }.code(),
            "unknown_sku"
        );
        assert_eq!(RejectReason::MissingEmail.code(), "missing_email");
    }

    #[test]
    fn outcome_status_strings() {
        assert_eq!(IngestOutcome::Persisted { order_id: 7 }.status_str(), "Persisted");
        assert_eq!(IngestOutcome::Duplicate.status_str(), "Duplicate");
    }
}
