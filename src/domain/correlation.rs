use crate::domain::invoice::PaymentId;
use serde::{Deserialize, Serialize};

/// Durable link between an outstanding invoice and the handler that owns it.
///
/// A record exists from the moment invoice creation succeeds until the
/// settlement has been dispatched or the invoice is known to be dead. It is
/// never mutated in place, only written whole and deleted whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correlation {
    pub payment_id: PaymentId,
    pub handler_id: String,
    /// Opaque caller data handed to the handler verbatim on settlement.
    pub context: String,
}

impl Correlation {
    pub fn new(
        payment_id: PaymentId,
        handler_id: impl Into<String>,
        context: impl Into<String>,
    ) -> Self {
        Self {
            payment_id,
            handler_id: handler_id.into(),
            context: context.into(),
        }
    }
}
