use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Fixed-length identifier correlating a node-side invoice to a stored record.
///
/// This is the invoice's payment hash on the node. The engine never inspects
/// it; it is an opaque 32-byte key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PaymentId(pub [u8; 32]);

impl PaymentId {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for PaymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for PaymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PaymentId({})", hex::encode(self.0))
    }
}

/// Node-side lifecycle state of an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceState {
    Open,
    Accepted,
    Settled,
    Canceled,
}

impl InvoiceState {
    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, InvoiceState::Settled | InvoiceState::Canceled)
    }
}

/// Caller-supplied parameters for a new invoice.
///
/// The engine forwards these to the node untouched; amount policy belongs to
/// the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceParams {
    pub amount_sat: u64,
    pub memo: String,
    pub expiry: Duration,
}

impl InvoiceParams {
    pub const DEFAULT_EXPIRY: Duration = Duration::from_secs(600);

    pub fn new(amount_sat: u64, memo: impl Into<String>) -> Self {
        Self {
            amount_sat,
            memo: memo.into(),
            expiry: Self::DEFAULT_EXPIRY,
        }
    }

    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.expiry = expiry;
        self
    }
}

/// The node-authoritative view of an invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub payment_id: PaymentId,
    pub state: InvoiceState,
    pub amount_sat: u64,
    pub memo: String,
    pub payment_request: String,
    pub expires_at: DateTime<Utc>,
}

impl Invoice {
    /// An open invoice past its expiry can never settle.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Response to invoice creation: the key the engine correlates on plus the
/// payable request string handed to the payer.
#[derive(Debug, Clone, PartialEq)]
pub struct IssuedInvoice {
    pub payment_id: PaymentId,
    pub payment_request: String,
}
