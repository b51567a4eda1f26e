//! Tokio driver for a [`LiveSession`].
//!
//! Entry and exit ticks fire from two intervals inside one `select!` loop.
//! Each tick runs on the blocking pool while holding the session lock. Every
//! feed and broker call inside a tick is bounded by `call_timeout`, so a
//! tick always finishes and shutdown (Ctrl-C or market close) is observed
//! between ticks. A tick that finds the session still locked is skipped.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tokio::time::{interval, timeout, MissedTickBehavior};

use crate::domain::error::IntratraderError;
use crate::domain::live::{LivePorts, LiveSession, TickOutcome};
use crate::domain::position::{ClosedPosition, Position};
use crate::ports::broker_port::{BrokerPort, Fill, OrderRequest};
use crate::ports::market_feed_port::{MarketFeedPort, MarketSnapshot};
use crate::ports::notifier_port::NotifierPort;
use crate::ports::store_port::{LedgerPort, LiveStatePort};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickKind {
    Entry,
    Exit,
    /// Close everything once the market has closed.
    CloseOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    MarketClosed,
    Interrupted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub stop: StopReason,
    pub entry_ticks: usize,
    pub exit_ticks: usize,
    pub degraded_ticks: usize,
    pub trades: Vec<ClosedPosition>,
    /// Positions still open when the loop stopped.
    pub left_open: Vec<Position>,
}

#[derive(Clone)]
pub struct LiveServices {
    pub feed: Arc<dyn MarketFeedPort + Send + Sync>,
    pub broker: Arc<dyn BrokerPort + Send + Sync>,
    pub notifier: Arc<dyn NotifierPort + Send + Sync>,
    pub ledger: Option<Arc<dyn LedgerPort + Send + Sync>>,
    pub state: Option<Arc<dyn LiveStatePort + Send + Sync>>,
}

pub struct LiveRunner {
    session: Arc<Mutex<LiveSession>>,
    services: LiveServices,
}

impl LiveRunner {
    pub fn new(session: LiveSession, services: LiveServices) -> Self {
        LiveRunner {
            session: Arc::new(Mutex::new(session)),
            services,
        }
    }

    /// Run until the market closes or Ctrl-C is received.
    pub async fn run(&self) -> Result<RunSummary, IntratraderError> {
        self.run_until(tokio::signal::ctrl_c()).await
    }

    /// Run until the market closes or `shutdown` completes.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<RunSummary, IntratraderError>
    where
        F: std::future::Future<Output = std::io::Result<()>>,
    {
        let settings = *self.session.lock().await.settings();
        let mut entry = interval(settings.entry_interval);
        let mut exit = interval(settings.exit_interval);
        entry.set_missed_tick_behavior(MissedTickBehavior::Skip);
        exit.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        let mut summary = RunSummary {
            stop: StopReason::Interrupted,
            entry_ticks: 0,
            exit_ticks: 0,
            degraded_ticks: 0,
            trades: Vec::new(),
            left_open: Vec::new(),
        };

        tracing::info!(
            entry_secs = settings.entry_interval.as_secs(),
            exit_secs = settings.exit_interval.as_secs(),
            market_close = %settings.market_close,
            "live session started"
        );

        loop {
            let kind = tokio::select! {
                res = &mut shutdown => {
                    res?;
                    tracing::info!("shutdown requested");
                    break;
                }
                _ = exit.tick() => TickKind::Exit,
                _ = entry.tick() => TickKind::Entry,
            };

            let outcome = self.tick(kind, Local::now().naive_local()).await;
            match kind {
                TickKind::Entry => summary.entry_ticks += 1,
                TickKind::Exit | TickKind::CloseOut => summary.exit_ticks += 1,
            }
            self.after_tick(&outcome, &mut summary).await;

            if outcome == TickOutcome::MarketClosed {
                summary.stop = StopReason::MarketClosed;
                tracing::info!("market closed, closing out");
                let last = self.tick(TickKind::CloseOut, Local::now().naive_local()).await;
                self.after_tick(&last, &mut summary).await;
                break;
            }
        }

        summary.left_open = self.session.lock().await.portfolio().open_positions().to_vec();
        if !summary.left_open.is_empty() {
            tracing::warn!(
                open = summary.left_open.len(),
                "live session stopped with open positions"
            );
        }
        tracing::info!(
            trades = summary.trades.len(),
            degraded = summary.degraded_ticks,
            "live session finished"
        );
        Ok(summary)
    }

    /// Run one tick on the blocking pool. If the previous tick still holds
    /// the session the cycle is skipped.
    pub async fn tick(&self, kind: TickKind, now: NaiveDateTime) -> TickOutcome {
        let Ok(mut session) = Arc::clone(&self.session).try_lock_owned() else {
            return TickOutcome::Degraded("previous tick still running".to_string());
        };
        let budget = session.settings().call_timeout;
        let services = self.services.clone();
        let handle = Handle::current();

        let task = tokio::task::spawn_blocking(move || {
            let feed = TimedFeed {
                inner: services.feed,
                handle: handle.clone(),
                budget,
            };
            let broker = TimedBroker {
                inner: services.broker,
                handle,
                budget,
            };
            let ports = LivePorts {
                feed: &feed,
                broker: &broker,
                notifier: services.notifier.as_ref(),
            };
            match kind {
                TickKind::Entry => session.entry_tick(now, &ports),
                TickKind::Exit => session.exit_tick(now, &ports),
                TickKind::CloseOut => session.close_out(now, &ports),
            }
        });

        match task.await {
            Ok(outcome) => outcome,
            Err(e) => TickOutcome::Degraded(format!("tick task failed: {e}")),
        }
    }

    async fn after_tick(&self, outcome: &TickOutcome, summary: &mut RunSummary) {
        summary.trades.extend(self.record_closed().await);
        match outcome {
            TickOutcome::Degraded(reason) => {
                summary.degraded_ticks += 1;
                tracing::warn!(%reason, "tick degraded");
            }
            TickOutcome::Opened(_) => self.save_state().await,
            TickOutcome::Exits { closed, .. } if *closed > 0 => self.save_state().await,
            _ => {}
        }
    }

    /// Hand newly closed trades to the ledger, if one is configured.
    async fn record_closed(&self) -> Vec<ClosedPosition> {
        let closed = self.session.lock().await.drain_closed();
        if closed.is_empty() {
            return closed;
        }
        if let Some(ledger) = &self.services.ledger {
            let ledger = Arc::clone(ledger);
            let batch = closed.clone();
            match tokio::task::spawn_blocking(move || ledger.record_trades(&batch)).await {
                Ok(Ok(report)) if report.is_clean() => {
                    tracing::debug!(inserted = report.inserted, "trades recorded");
                }
                Ok(Ok(report)) => {
                    tracing::warn!(failed = report.failed(), "some trades not recorded");
                }
                Ok(Err(e)) => tracing::warn!(error = %e, "trade ledger write failed"),
                Err(e) => tracing::warn!(error = %e, "trade ledger task failed"),
            }
        }
        closed
    }

    /// Persist open positions and the daily count, if a store is configured.
    async fn save_state(&self) {
        let Some(store) = &self.services.state else {
            return;
        };
        let store = Arc::clone(store);
        let state = self.session.lock().await.state();
        match tokio::task::spawn_blocking(move || store.save_live_state(&state)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "live state write failed"),
            Err(e) => tracing::warn!(error = %e, "live state task failed"),
        }
    }
}

/// Run `op` on the blocking pool and give up waiting after `budget`.
/// Must be called from a blocking-pool thread, never from async code.
fn bounded<T, F>(handle: &Handle, budget: Duration, call: &str, op: F) -> Result<T, IntratraderError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, IntratraderError> + Send + 'static,
{
    handle.block_on(async {
        match timeout(budget, tokio::task::spawn_blocking(op)).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(IntratraderError::Broker {
                reason: format!("{call} task failed: {e}"),
            }),
            Err(_) => Err(IntratraderError::Timeout {
                call: call.to_string(),
                after: budget,
            }),
        }
    })
}

struct TimedFeed {
    inner: Arc<dyn MarketFeedPort + Send + Sync>,
    handle: Handle,
    budget: Duration,
}

impl MarketFeedPort for TimedFeed {
    fn snapshot(&self) -> Result<Option<MarketSnapshot>, IntratraderError> {
        let feed = Arc::clone(&self.inner);
        bounded(&self.handle, self.budget, "market snapshot", move || feed.snapshot())
    }
}

struct TimedBroker {
    inner: Arc<dyn BrokerPort + Send + Sync>,
    handle: Handle,
    budget: Duration,
}

impl BrokerPort for TimedBroker {
    fn place_order(&self, order: &OrderRequest) -> Result<Fill, IntratraderError> {
        let broker = Arc::clone(&self.inner);
        let order = *order;
        bounded(&self.handle, self.budget, "broker order", move || broker.place_order(&order))
    }
}
