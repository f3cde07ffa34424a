//! Per-requester batch execution: singleton leases, quota, cancellation, summaries.

use std::sync::Arc;

use dashmap::{mapref::entry::Entry, DashMap};
use tokio_util::sync::CancellationToken;

use crate::{
    config::RelayTuning,
    domain::{CorrelationId, RelayRequest, UserId},
    errors::{Error, ErrorScope},
    formatting::{escape_html, truncate_chars},
    messaging::port::MessagingPort,
    ports::{QuotaStore, SourceSession},
    session::SessionBroker,
    transfer::{ItemContext, ItemOutcome, TransferEngine},
    Result,
};

struct BatchSlot {
    correlation: CorrelationId,
    cancel: CancellationToken,
}

/// Which requesters currently have a batch running.
#[derive(Default)]
pub struct BatchRegistry {
    slots: DashMap<UserId, BatchSlot>,
}

impl BatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the requester's slot. Never queues: a running batch means rejection.
    pub fn try_begin(
        self: &Arc<Self>,
        user: UserId,
        correlation: CorrelationId,
    ) -> Result<BatchLease> {
        let cancel = CancellationToken::new();
        match self.slots.entry(user) {
            Entry::Occupied(_) => Err(Error::AlreadyRunning),
            Entry::Vacant(v) => {
                v.insert(BatchSlot {
                    correlation: correlation.clone(),
                    cancel: cancel.clone(),
                });
                Ok(BatchLease {
                    registry: Arc::clone(self),
                    user,
                    correlation,
                    cancel,
                })
            }
        }
    }

    /// Ask the requester's running batch to stop. `false` when nothing is running.
    pub fn cancel(&self, user: UserId) -> bool {
        match self.slots.get(&user) {
            Some(slot) => {
                slot.cancel.cancel();
                tracing::info!(user = user.0, correlation = %slot.correlation, "batch cancel requested");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, user: UserId) -> bool {
        self.slots.contains_key(&user)
    }
}

/// Exclusive right to run a batch for one requester; released on drop.
pub struct BatchLease {
    registry: Arc<BatchRegistry>,
    user: UserId,
    correlation: CorrelationId,
    cancel: CancellationToken,
}

impl BatchLease {
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for BatchLease {
    fn drop(&mut self) {
        // Only clear the slot this lease created.
        self.registry
            .slots
            .remove_if(&self.user, |_, slot| slot.correlation == self.correlation);
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub attempted: usize,
    pub relayed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: bool,
}

/// Drives one relay request from lease acquisition to summary.
pub struct RelayService {
    registry: Arc<BatchRegistry>,
    quota: Arc<dyn QuotaStore>,
    sessions: SessionBroker,
    engine: TransferEngine,
    messenger: Arc<dyn MessagingPort>,
    tuning: RelayTuning,
}

impl RelayService {
    pub fn new(
        registry: Arc<BatchRegistry>,
        quota: Arc<dyn QuotaStore>,
        sessions: SessionBroker,
        engine: TransferEngine,
        messenger: Arc<dyn MessagingPort>,
        tuning: RelayTuning,
    ) -> Self {
        Self {
            registry,
            quota,
            sessions,
            engine,
            messenger,
            tuning,
        }
    }

    pub fn registry(&self) -> &Arc<BatchRegistry> {
        &self.registry
    }

    pub fn sessions(&self) -> &SessionBroker {
        &self.sessions
    }

    pub fn cancel(&self, user: UserId) -> bool {
        self.registry.cancel(user)
    }

    /// Run a request. Batch-scoped failures are returned after the requester was told.
    pub async fn run(&self, req: RelayRequest) -> Result<BatchReport> {
        // Lease before quota: a rejected duplicate costs nothing.
        let lease = match self.registry.try_begin(req.requester, req.correlation.clone()) {
            Ok(lease) => lease,
            Err(e) => {
                self.tell(&req, &e.user_message()).await;
                return Err(e);
            }
        };

        let result = self.run_leased(&req, &lease).await;
        if let Err(e) = &result {
            tracing::info!(user = req.requester.0, correlation = %req.correlation, error = %e, "batch aborted");
            self.tell(&req, &e.user_message()).await;
        }
        drop(lease);
        result
    }

    async fn run_leased(&self, req: &RelayRequest, lease: &BatchLease) -> Result<BatchReport> {
        if !self.quota.consume(req.requester).await? {
            return Err(Error::QuotaExhausted);
        }

        let session = self.sessions.acquire(req.requester).await?;
        let report = self.run_items(req, lease, session.as_ref()).await;
        if let Err(e) = session.close().await {
            tracing::debug!(error = %e, "delegated session close failed");
        }
        let report = report?;

        if req.range.is_batch() {
            let summary = summary_text(req, &report);
            self.tell(req, &summary).await;
        }

        tracing::info!(
            user = req.requester.0,
            correlation = %req.correlation,
            attempted = report.attempted,
            relayed = report.relayed,
            skipped = report.skipped,
            failed = report.failed,
            cancelled = report.cancelled,
            "batch finished"
        );
        Ok(report)
    }

    async fn run_items(
        &self,
        req: &RelayRequest,
        lease: &BatchLease,
        session: &dyn SourceSession,
    ) -> Result<BatchReport> {
        let source = req.source.resolve();
        let mut report = BatchReport::default();

        let ctx = ItemContext {
            request: req,
            source: &source,
            session,
            cancel: lease.cancel_token(),
        };

        let mut ids = req.range.ids().peekable();
        while let Some(id) = ids.next() {
            if lease.is_cancelled() {
                report.cancelled = true;
                break;
            }
            report.attempted += 1;

            match self.relay_one(req, &ctx, id).await {
                Ok(ItemOutcome::Relayed(kind)) => {
                    tracing::debug!(item = id, kind = kind.label(), "item relayed");
                    report.relayed += 1;
                }
                Ok(ItemOutcome::Copied) => report.relayed += 1,
                Ok(ItemOutcome::Skipped) => report.skipped += 1,
                Ok(ItemOutcome::Cancelled) => {
                    report.cancelled = true;
                    break;
                }
                Err(e) => match e.scope() {
                    ErrorScope::Batch => return Err(e),
                    ErrorScope::Item => {
                        report.failed += 1;
                        tracing::warn!(item = id, error = %e, "item failed");
                        if self.tuning.show_item_errors {
                            self.tell(req, &item_error_text(id, &e)).await;
                        }
                    }
                    ErrorScope::Silent => {
                        tracing::warn!(item = id, error = %e, "item finished with silent error");
                    }
                },
            }

            if ids.peek().is_some() && !self.tuning.item_delay.is_zero() {
                tokio::time::sleep(self.tuning.item_delay).await;
            }
        }

        Ok(report)
    }

    async fn relay_one(&self, req: &RelayRequest, ctx: &ItemContext<'_>, id: i32) -> Result<ItemOutcome> {
        if req.source.is_public() {
            match self
                .engine
                .sink()
                .copy_message(req.chat_id, ctx.source, id, req.reply_to)
                .await
            {
                Ok(_) => return Ok(ItemOutcome::Copied),
                Err(e) => {
                    tracing::debug!(item = id, error = %e, "direct copy refused, using delegated session");
                }
            }
        }
        self.engine.process(ctx, id).await
    }

    async fn tell(&self, req: &RelayRequest, html: &str) {
        if let Err(e) = self.messenger.send_html(req.chat_id, html, req.reply_to).await {
            tracing::warn!(chat = req.chat_id.0, error = %e, "reply not delivered");
        }
    }
}

fn item_error_text(id: i32, e: &Error) -> String {
    format!(
        "❌ <b>Message {id}:</b> <code>{}</code>",
        escape_html(&truncate_chars(&e.to_string(), 300))
    )
}

fn summary_text(req: &RelayRequest, report: &BatchReport) -> String {
    let head = if report.cancelled {
        "⛔ <b>Batch cancelled</b>"
    } else {
        "✅ <b>Batch complete</b>"
    };
    format!(
        "{head}\n\n📊 Range: <code>{}</code> → <code>{}</code> ({} messages)\n✔️ Relayed: {}\n⏭ Skipped: {}\n❌ Failed: {}",
        req.range.from,
        req.range.to,
        req.range.count(),
        report.relayed,
        report.skipped,
        report.failed,
    )
}
