use crate::application::registry::HandlerRegistry;
use crate::domain::correlation::Correlation;
use crate::domain::invoice::{Invoice, InvoiceParams, InvoiceState, IssuedInvoice, PaymentId};
use crate::domain::ports::{
    CorrelationStore, CorrelationStoreRef, NodeClient, NodeClientRef, SettlementStream,
};
use crate::error::{PaymentError, Result};
use chrono::Utc;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Tunables for the long-running stream consumers.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How many consecutive times the settlement feed may be re-established
    /// after ending or erroring before the dispatch loop gives up with
    /// [`PaymentError::NodeUnavailable`]. The counter resets on every
    /// successfully received event.
    pub reconnect_attempts: u32,
    /// Base delay of the exponential reconnect backoff.
    pub reconnect_base_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reconnect_attempts: 5,
            reconnect_base_delay: Duration::from_millis(500),
        }
    }
}

impl EngineConfig {
    /// Delay before reconnect attempt `attempt` (1-based), doubling per
    /// attempt and capped at 64x the base.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(6);
        self.reconnect_base_delay.saturating_mul(factor)
    }
}

/// Outcome of pushing one settled invoice through the commit path.
#[derive(Debug, PartialEq, Eq)]
enum DispatchOutcome {
    Dispatched,
    /// No record found: a racing path already committed this payment, or the
    /// invoice was never ours.
    AlreadyHandled,
    /// The record names a handler id nothing is registered under; the record
    /// stays put.
    Unregistered,
}

/// Why the settlement feed stopped yielding events.
enum FeedExit {
    Shutdown,
    Lost(String),
}

/// Correlates invoices issued on behalf of registered handlers with the
/// settlements the node reports, across process restarts.
///
/// The engine owns the correlation store exclusively. Settlement state is
/// never cached locally; it is always re-derived from the node.
pub struct CorrelationEngine {
    inner: Arc<Inner>,
    config: EngineConfig,
    shutdown_tx: watch::Sender<bool>,
    watches: Mutex<JoinSet<()>>,
}

struct Inner {
    node: NodeClientRef,
    store: CorrelationStoreRef,
    handlers: HandlerRegistry,
    shutdown_rx: watch::Receiver<bool>,
}

impl CorrelationEngine {
    pub fn new(
        node: NodeClientRef,
        store: CorrelationStoreRef,
        handlers: HandlerRegistry,
        config: EngineConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                node,
                store,
                handlers,
                shutdown_rx,
            }),
            shutdown_tx,
            watches: Mutex::new(JoinSet::new()),
            config,
        }
    }

    /// Creates an invoice at the node and durably records which handler owns
    /// it before returning.
    ///
    /// If this returns `Ok`, a later settlement of the invoice will reach
    /// `handler_id` even across a restart. If the node call fails, nothing is
    /// written and the error is surfaced unchanged.
    pub async fn issue_invoice(
        &self,
        handler_id: &str,
        context: &str,
        params: InvoiceParams,
    ) -> Result<IssuedInvoice> {
        // The registry is sealed before the engine exists, so an unknown id
        // could never be dispatched. Refuse it at the door.
        if !self.inner.handlers.contains(handler_id) {
            return Err(PaymentError::InvalidParams(format!(
                "no handler registered under `{handler_id}`"
            )));
        }
        let issued = self.inner.node.create_invoice(params).await?;
        self.inner
            .store
            .put(Correlation::new(issued.payment_id, handler_id, context))
            .await?;
        debug!(payment_id = %issued.payment_id, handler_id = %handler_id, "correlation recorded");
        Ok(issued)
    }

    /// Consumes the node-wide settlement feed until [`shutdown`] is called or
    /// the reconnect budget is exhausted.
    ///
    /// Dispatch order equals feed delivery order. A failing handler is logged
    /// and its record kept for the next recovery pass; the loop keeps
    /// consuming the feed.
    ///
    /// [`shutdown`]: CorrelationEngine::shutdown
    pub async fn run_dispatch_loop(&self) -> Result<()> {
        let mut shutdown = self.inner.shutdown_rx.clone();
        let mut attempts: u32 = 0;
        loop {
            if *shutdown.borrow() {
                return Ok(());
            }
            match self.inner.node.subscribe_settlements().await {
                Ok(stream) => {
                    info!("consuming settlement feed");
                    match self
                        .consume_settlements(stream, &mut shutdown, &mut attempts)
                        .await?
                    {
                        FeedExit::Shutdown => return Ok(()),
                        FeedExit::Lost(reason) => warn!(%reason, "settlement feed lost"),
                    }
                }
                Err(err) => warn!(%err, "unable to open settlement feed"),
            }

            attempts += 1;
            if attempts > self.config.reconnect_attempts {
                return Err(PaymentError::NodeUnavailable(format!(
                    "settlement feed lost after {attempts} connection attempts"
                )));
            }
            let delay = self.config.backoff_delay(attempts);
            debug!(attempt = attempts, ?delay, "reconnecting settlement feed");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => return Ok(()),
            }
        }
    }

    async fn consume_settlements(
        &self,
        mut stream: SettlementStream,
        shutdown: &mut watch::Receiver<bool>,
        attempts: &mut u32,
    ) -> Result<FeedExit> {
        loop {
            let event = tokio::select! {
                event = stream.next() => event,
                _ = shutdown.changed() => return Ok(FeedExit::Shutdown),
            };
            match event {
                Some(Ok(invoice)) => {
                    *attempts = 0;
                    if invoice.state != InvoiceState::Settled {
                        continue;
                    }
                    match self.inner.dispatch_settled(&invoice).await {
                        Ok(_) => {}
                        Err(PaymentError::CallbackFailed { handler_id, source }) => {
                            error!(
                                payment_id = %invoice.payment_id,
                                handler_id = %handler_id,
                                %source,
                                "settlement handler failed; record kept for recovery"
                            );
                        }
                        Err(err) => return Err(err),
                    }
                }
                Some(Err(err)) => return Ok(FeedExit::Lost(err.to_string())),
                None => return Ok(FeedExit::Lost("feed closed".to_string())),
            }
        }
    }

    /// Reconciles every persisted correlation against the node's
    /// authoritative per-invoice state. One-shot; safe to run again at any
    /// time, including concurrently with the dispatch loop.
    ///
    /// Settled invoices are committed, dead ones removed, and still-open ones
    /// get a dedicated watch so a settlement arriving before the global feed
    /// is re-established is not missed.
    ///
    /// Callers needing a deadline can wrap the returned future in
    /// `tokio::time::timeout`; an interrupted pass leaves every unvisited
    /// record in place for the next one.
    pub async fn run_recovery(&self) -> Result<()> {
        let records = self.inner.store.list_all().await?;
        info!(pending = records.len(), "running recovery pass");
        for record in records {
            match self.recover_record(&record).await {
                Ok(()) => {}
                Err(err @ (PaymentError::Storage(_) | PaymentError::Serialization(_))) => {
                    return Err(err);
                }
                // One unreachable invoice must not starve the rest of the
                // pass; its record stays put for the next run.
                Err(err) => {
                    error!(payment_id = %record.payment_id, %err, "recovery failed for record")
                }
            }
        }
        Ok(())
    }

    async fn recover_record(&self, record: &Correlation) -> Result<()> {
        let invoice = self.inner.node.lookup_invoice(&record.payment_id).await?;
        match invoice.state {
            InvoiceState::Settled => {
                self.inner.dispatch_settled(&invoice).await?;
            }
            InvoiceState::Canceled => {
                info!(payment_id = %record.payment_id, "invoice canceled; removing record");
                self.inner.store.delete(&record.payment_id).await?;
            }
            InvoiceState::Open | InvoiceState::Accepted => {
                if invoice.is_expired(Utc::now()) {
                    info!(payment_id = %record.payment_id, "invoice expired unpaid; removing record");
                    self.inner.store.delete(&record.payment_id).await?;
                } else {
                    let inner = Arc::clone(&self.inner);
                    let mut watches = self.watches.lock().await;
                    watches.spawn(inner.watch_invoice(record.payment_id));
                }
            }
        }
        Ok(())
    }

    /// Signals the dispatch loop and every invoice watch to stop, then waits
    /// for in-flight watches to wind down.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let mut watches = self.watches.lock().await;
        while let Some(joined) = watches.join_next().await {
            if let Err(err) = joined {
                error!(%err, "invoice watch panicked");
            }
        }
    }
}

impl Inner {
    /// The shared commit path: look up the record, invoke its handler, and
    /// delete the record only after the handler returns.
    ///
    /// Racing callers are tolerated: the first successful delete wins and
    /// every later observer short-circuits on the missing record.
    async fn dispatch_settled(&self, invoice: &Invoice) -> Result<DispatchOutcome> {
        let Some(record) = self.store.get(&invoice.payment_id).await? else {
            debug!(payment_id = %invoice.payment_id, "no pending record for settlement");
            return Ok(DispatchOutcome::AlreadyHandled);
        };
        let Some(handler) = self.handlers.get(&record.handler_id) else {
            warn!(
                payment_id = %invoice.payment_id,
                handler_id = %record.handler_id,
                "no handler registered; record kept"
            );
            return Ok(DispatchOutcome::Unregistered);
        };
        handler
            .on_settled(invoice.clone(), record.context.clone())
            .await
            .map_err(|source| PaymentError::CallbackFailed {
                handler_id: record.handler_id.clone(),
                source,
            })?;
        self.store.delete(&invoice.payment_id).await?;
        info!(
            payment_id = %invoice.payment_id,
            handler_id = %record.handler_id,
            "settlement dispatched"
        );
        Ok(DispatchOutcome::Dispatched)
    }

    /// Dedicated feed for one open invoice found during recovery, covering a
    /// settlement that lands before the global feed is back up.
    async fn watch_invoice(self: Arc<Self>, payment_id: PaymentId) {
        let mut shutdown = self.shutdown_rx.clone();
        let mut stream = match self.node.subscribe_single_invoice(&payment_id).await {
            Ok(stream) => stream,
            Err(err) => {
                warn!(%payment_id, %err, "unable to watch invoice; next recovery pass retries");
                return;
            }
        };
        debug!(%payment_id, "watching invoice");
        loop {
            let update = tokio::select! {
                update = stream.next() => update,
                _ = shutdown.changed() => return,
            };
            match update {
                Some(Ok(InvoiceState::Settled)) => {
                    // The watch only carries the state transition; fetch the
                    // authoritative invoice for the handler.
                    match self.node.lookup_invoice(&payment_id).await {
                        Ok(invoice) => {
                            if let Err(err) = self.dispatch_settled(&invoice).await {
                                error!(%payment_id, %err, "watch dispatch failed; record kept");
                            }
                        }
                        Err(err) => error!(%payment_id, %err, "unable to fetch settled invoice"),
                    }
                    return;
                }
                Some(Ok(InvoiceState::Canceled)) => {
                    match self.store.delete(&payment_id).await {
                        Ok(()) => info!(%payment_id, "invoice canceled; record removed"),
                        Err(err) => error!(%payment_id, %err, "unable to remove canceled record"),
                    }
                    return;
                }
                Some(Ok(_)) => continue,
                Some(Err(err)) => {
                    warn!(%payment_id, %err, "invoice watch error");
                    return;
                }
                None => {
                    debug!(%payment_id, "invoice watch ended");
                    return;
                }
            }
        }
    }
}
