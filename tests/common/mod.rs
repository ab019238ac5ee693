use async_trait::async_trait;
use chrono::Utc;
use paywatch::domain::invoice::{Invoice, InvoiceParams, InvoiceState, IssuedInvoice, PaymentId};
use paywatch::domain::ports::{InvoiceUpdateStream, NodeClient, SettlementStream};
use paywatch::error::{PaymentError, Result};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Deterministic in-memory payment node.
///
/// Tests drive invoice state explicitly: `settle`/`cancel` flip the state and
/// emit events on every open feed, while `mark_settled`/`mark_canceled` flip
/// the state silently, simulating a transition that happened while nobody was
/// listening (process downtime).
#[derive(Default)]
pub struct FakeNode {
    state: Mutex<FakeNodeState>,
}

#[derive(Default)]
struct FakeNodeState {
    invoices: HashMap<PaymentId, Invoice>,
    next_id: u8,
    settlement_subs: Vec<mpsc::UnboundedSender<Result<Invoice>>>,
    single_subs: HashMap<PaymentId, Vec<mpsc::UnboundedSender<Result<InvoiceState>>>>,
    fail_create: bool,
    fail_subscribe: bool,
    feed_connects: u32,
}

impl FakeNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the invoice settled and pushes the event to every open feed.
    pub fn settle(&self, payment_id: &PaymentId) {
        let mut state = self.state.lock().unwrap();
        let invoice = state
            .invoices
            .get_mut(payment_id)
            .expect("settling unknown invoice");
        invoice.state = InvoiceState::Settled;
        let event = invoice.clone();
        state
            .settlement_subs
            .retain(|tx| tx.send(Ok(event.clone())).is_ok());
        if let Some(subs) = state.single_subs.get_mut(payment_id) {
            subs.retain(|tx| tx.send(Ok(InvoiceState::Settled)).is_ok());
        }
    }

    /// Marks the invoice canceled and pushes the event to every open feed.
    pub fn cancel(&self, payment_id: &PaymentId) {
        let mut state = self.state.lock().unwrap();
        let invoice = state
            .invoices
            .get_mut(payment_id)
            .expect("canceling unknown invoice");
        invoice.state = InvoiceState::Canceled;
        let event = invoice.clone();
        state
            .settlement_subs
            .retain(|tx| tx.send(Ok(event.clone())).is_ok());
        if let Some(subs) = state.single_subs.get_mut(payment_id) {
            subs.retain(|tx| tx.send(Ok(InvoiceState::Canceled)).is_ok());
        }
    }

    /// Flips the invoice to settled without emitting any event.
    pub fn mark_settled(&self, payment_id: &PaymentId) {
        let mut state = self.state.lock().unwrap();
        state
            .invoices
            .get_mut(payment_id)
            .expect("settling unknown invoice")
            .state = InvoiceState::Settled;
    }

    /// Flips the invoice to canceled without emitting any event.
    pub fn mark_canceled(&self, payment_id: &PaymentId) {
        let mut state = self.state.lock().unwrap();
        state
            .invoices
            .get_mut(payment_id)
            .expect("canceling unknown invoice")
            .state = InvoiceState::Canceled;
    }

    /// Drops every open settlement feed, ending the streams on the consumer
    /// side.
    pub fn close_settlement_feed(&self) {
        self.state.lock().unwrap().settlement_subs.clear();
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.state.lock().unwrap().fail_create = fail;
    }

    pub fn set_fail_subscribe(&self, fail: bool) {
        self.state.lock().unwrap().fail_subscribe = fail;
    }

    /// How many times a settlement feed has been opened.
    pub fn feed_connects(&self) -> u32 {
        self.state.lock().unwrap().feed_connects
    }
}

#[async_trait]
impl NodeClient for FakeNode {
    async fn create_invoice(&self, params: InvoiceParams) -> Result<IssuedInvoice> {
        let mut state = self.state.lock().unwrap();
        if state.fail_create {
            return Err(PaymentError::NodeUnavailable(
                "fake node: create refused".to_string(),
            ));
        }
        state.next_id += 1;
        let payment_id = PaymentId([state.next_id; 32]);
        let invoice = Invoice {
            payment_id,
            state: InvoiceState::Open,
            amount_sat: params.amount_sat,
            memo: params.memo,
            payment_request: format!("lnbcfake{}", state.next_id),
            expires_at: Utc::now() + chrono::Duration::from_std(params.expiry).unwrap(),
        };
        let payment_request = invoice.payment_request.clone();
        state.invoices.insert(payment_id, invoice);
        Ok(IssuedInvoice {
            payment_id,
            payment_request,
        })
    }

    async fn lookup_invoice(&self, payment_id: &PaymentId) -> Result<Invoice> {
        let state = self.state.lock().unwrap();
        state
            .invoices
            .get(payment_id)
            .cloned()
            .ok_or_else(|| PaymentError::NotFound(payment_id.to_string()))
    }

    async fn subscribe_settlements(&self) -> Result<SettlementStream> {
        let mut state = self.state.lock().unwrap();
        if state.fail_subscribe {
            return Err(PaymentError::NodeUnavailable(
                "fake node: feed refused".to_string(),
            ));
        }
        state.feed_connects += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        state.settlement_subs.push(tx);
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    async fn subscribe_single_invoice(
        &self,
        payment_id: &PaymentId,
    ) -> Result<InvoiceUpdateStream> {
        let mut state = self.state.lock().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        state.single_subs.entry(*payment_id).or_default().push(tx);
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }
}

/// A registry with a single handler that forwards every dispatch to a
/// channel the test can await on.
pub fn recording_registry(
    handler_id: &str,
) -> (
    paywatch::application::registry::HandlerRegistry,
    mpsc::UnboundedReceiver<(Invoice, String)>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let registry = paywatch::application::registry::HandlerRegistry::builder()
        .register_fn(handler_id, move |invoice, context| {
            let tx = tx.clone();
            async move {
                tx.send((invoice, context)).unwrap();
                Ok(())
            }
        })
        .build();
    (registry, rx)
}

pub async fn recv_dispatched(
    rx: &mut mpsc::UnboundedReceiver<(Invoice, String)>,
) -> (Invoice, String) {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("no dispatch within 2s")
        .expect("dispatch channel closed")
}

/// Polls `check` until it returns true or two seconds pass.
pub async fn eventually<F>(mut check: F)
where
    F: AsyncFnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if check().await {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 2s"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
