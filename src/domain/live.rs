//! Live trading session.
//!
//! Reuses the entry gate and exit chain on wall-clock ticks instead of a
//! replayed series. Every failure of the feed or broker ends the current
//! tick with [`TickOutcome::Degraded`] and leaves the position book as it
//! was; nothing here panics or gives up the session. A bar older than
//! `max_signal_age` counts as a feed failure.

use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use super::entry_policy::{evaluate_entry, EntryDecision, EntryGate, SkipReason};
use super::error::IntratraderError;
use super::exit_policy::{evaluate_exit, BarContext};
use super::params::TradingParams;
use super::portfolio::{DailyState, Portfolio};
use super::position::{ClosedPosition, ExitReason, Position};
use super::retry::RetryPolicy;
use super::signal::SmoothedSignal;
use crate::ports::broker_port::{BrokerPort, Fill, OrderIntent, OrderRequest};
use crate::ports::market_feed_port::{MarketFeedPort, MarketSnapshot};
use crate::ports::notifier_port::NotifierPort;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiveSettings {
    pub entry_interval: Duration,
    pub exit_interval: Duration,
    pub market_close: NaiveTime,
    /// Oldest signal usable for entries and oldest bar usable at all.
    pub max_signal_age: Duration,
    pub retry: RetryPolicy,
    /// Budget for each single feed or broker call.
    pub call_timeout: Duration,
}

impl Default for LiveSettings {
    fn default() -> Self {
        LiveSettings {
            entry_interval: Duration::from_secs(60),
            exit_interval: Duration::from_secs(10),
            market_close: NaiveTime::from_hms_opt(15, 25, 0).unwrap_or(NaiveTime::MIN),
            max_signal_age: Duration::from_secs(120),
            retry: RetryPolicy::default(),
            call_timeout: Duration::from_secs(5),
        }
    }
}

pub struct LivePorts<'a> {
    pub feed: &'a dyn MarketFeedPort,
    pub broker: &'a dyn BrokerPort,
    pub notifier: &'a dyn NotifierPort,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Opened(Position),
    EntrySkipped(SkipReason),
    Exits { closed: usize, failed: usize },
    MarketClosed,
    Degraded(String),
}

/// What survives a restart: open positions and the admission count for
/// the trading day in `date`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveState {
    pub date: Option<NaiveDate>,
    pub opened_today: usize,
    pub open_positions: Vec<Position>,
}

pub struct LiveSession {
    params: TradingParams,
    settings: LiveSettings,
    book: Portfolio,
    daily: DailyState,
    drained: usize,
}

impl LiveSession {
    pub fn new(params: TradingParams, settings: LiveSettings) -> Self {
        LiveSession {
            params,
            settings,
            book: Portfolio::new(),
            daily: DailyState::default(),
            drained: 0,
        }
    }

    /// Resume from persisted state.
    pub fn restore(params: TradingParams, settings: LiveSettings, state: LiveState) -> Self {
        let mut session = LiveSession::new(params, settings);
        if !state.open_positions.is_empty() {
            tracing::info!(
                open = state.open_positions.len(),
                opened_today = state.opened_today,
                "restoring live positions"
            );
        }
        for position in state.open_positions {
            session.book.open_position(position);
        }
        session.daily = DailyState {
            date: state.date,
            opened: state.opened_today,
        };
        session
    }

    pub fn state(&self) -> LiveState {
        LiveState {
            date: self.daily.date,
            opened_today: self.daily.opened,
            open_positions: self.book.open_positions().to_vec(),
        }
    }

    pub fn settings(&self) -> &LiveSettings {
        &self.settings
    }

    pub fn portfolio(&self) -> &Portfolio {
        &self.book
    }

    pub fn opened_today(&self) -> usize {
        self.daily.opened
    }

    pub fn is_market_closed(&self, now: NaiveDateTime) -> bool {
        now.time() >= self.settings.market_close
    }

    pub fn entry_tick(&mut self, now: NaiveDateTime, ports: &LivePorts<'_>) -> TickOutcome {
        self.daily.roll(now.date());
        if self.is_market_closed(now) {
            return TickOutcome::MarketClosed;
        }

        let snapshot = match self.fresh_snapshot(now, ports) {
            Ok(s) => s,
            Err(outcome) => return outcome,
        };
        let signal = self.fresh_signal(now, &snapshot);
        let ctx = BarContext {
            timestamp: now,
            price: snapshot.bar.close,
            signal: signal.as_ref(),
            atr: snapshot.atr,
        };
        let gate = EntryGate {
            open_positions: self.book.open_count(),
            opened_today: self.daily.opened,
        };

        let decision = evaluate_entry(&ctx, gate, &self.params);
        let direction = match decision {
            EntryDecision::Open { direction, .. } => direction,
            EntryDecision::Skip(reason) => {
                tracing::debug!(time = %now, reason = reason.as_str(), "live entry skipped");
                return TickOutcome::EntrySkipped(reason);
            }
        };

        let order = OrderRequest {
            timestamp: now,
            direction,
            intent: OrderIntent::Open,
            reference_price: ctx.price,
        };
        let fill = match place_order(&self.settings.retry, "open order", ports, &order) {
            Ok(fill) => fill,
            Err(e) => {
                tracing::warn!(error = %e, "open order failed, skipping cycle");
                return TickOutcome::Degraded(e.to_string());
            }
        };

        let Some(position) = decision.into_position(&ctx, fill.price, &self.params) else {
            return TickOutcome::Degraded("stop levels unavailable at fill price".to_string());
        };

        self.book.open_position(position.clone());
        self.daily.record_open();
        tracing::info!(
            direction = %position.direction,
            price = position.entry_price,
            confidence = position.confidence,
            "live position opened"
        );
        notify(
            ports,
            &format!(
                "OPEN {} @ {:.2} (conf {:.3}, sl {:.2}, tp {:.2})",
                position.direction,
                position.entry_price,
                position.confidence,
                position.stop_loss,
                position.take_profit
            ),
        );
        TickOutcome::Opened(position)
    }

    pub fn exit_tick(&mut self, now: NaiveDateTime, ports: &LivePorts<'_>) -> TickOutcome {
        if self.book.open_count() == 0 {
            return TickOutcome::Exits { closed: 0, failed: 0 };
        }
        let snapshot = match self.fresh_snapshot(now, ports) {
            Ok(s) => s,
            Err(outcome) => return outcome,
        };
        let params = self.params.clone();
        self.close_matching(now, ports, &snapshot, |position, ctx| {
            evaluate_exit(position, ctx, &params).map(|d| d.reason)
        })
    }

    /// Close every open position regardless of the exit chain. Used once
    /// the market has closed.
    pub fn close_out(&mut self, now: NaiveDateTime, ports: &LivePorts<'_>) -> TickOutcome {
        if self.book.open_count() == 0 {
            return TickOutcome::Exits { closed: 0, failed: 0 };
        }
        let snapshot = match self.fresh_snapshot(now, ports) {
            Ok(s) => s,
            Err(outcome) => return outcome,
        };
        self.close_matching(now, ports, &snapshot, |_, _| Some(ExitReason::ForcedExit))
    }

    fn close_matching<F>(
        &mut self,
        now: NaiveDateTime,
        ports: &LivePorts<'_>,
        snapshot: &MarketSnapshot,
        decide: F,
    ) -> TickOutcome
    where
        F: Fn(&Position, &BarContext<'_>) -> Option<ExitReason>,
    {
        let signal = snapshot.signal.map(|s| s.signal);
        let ctx = BarContext {
            timestamp: now,
            price: snapshot.bar.close,
            signal: signal.as_ref(),
            atr: snapshot.atr,
        };

        let retry = self.settings.retry;
        let before = self.book.closed_positions().len();
        let mut failed = 0usize;
        let closed = self.book.close_with(now, |position| {
            let reason = decide(position, &ctx)?;
            let order = OrderRequest {
                timestamp: now,
                direction: position.direction,
                intent: OrderIntent::Close,
                reference_price: ctx.price,
            };
            match place_order(&retry, "close order", ports, &order) {
                Ok(fill) => Some((fill.price, reason)),
                Err(e) => {
                    tracing::warn!(error = %e, reason = %reason, "close order failed, keeping position");
                    failed += 1;
                    None
                }
            }
        });

        for trade in &self.book.closed_positions()[before..] {
            tracing::info!(
                direction = %trade.direction,
                pnl = trade.pnl,
                reason = %trade.exit_reason,
                "live position closed"
            );
            notify(
                ports,
                &format!(
                    "CLOSE {} @ {:.2} pnl {:.2} ({})",
                    trade.direction, trade.exit_price, trade.pnl, trade.exit_reason
                ),
            );
        }

        TickOutcome::Exits { closed, failed }
    }

    /// Closed positions not yet handed out by a previous call.
    pub fn drain_closed(&mut self) -> Vec<ClosedPosition> {
        let closed = self.book.closed_positions();
        let fresh = closed[self.drained..].to_vec();
        self.drained = closed.len();
        fresh
    }

    fn fresh_snapshot(&self, now: NaiveDateTime, ports: &LivePorts<'_>) -> Result<MarketSnapshot, TickOutcome> {
        let snapshot = match self.settings.retry.run("market snapshot", || ports.feed.snapshot()) {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return Err(TickOutcome::Degraded("no market data".to_string())),
            Err(e) => {
                tracing::warn!(error = %e, "market feed failed, skipping cycle");
                return Err(TickOutcome::Degraded(e.to_string()));
            }
        };
        let age = (now - snapshot.bar.timestamp).to_std().unwrap_or(Duration::ZERO);
        if age > self.settings.max_signal_age {
            tracing::warn!(bar = %snapshot.bar.timestamp, ?age, "latest bar is stale, skipping cycle");
            return Err(TickOutcome::Degraded(format!("stale bar at {}", snapshot.bar.timestamp)));
        }
        Ok(snapshot)
    }

    fn fresh_signal(&self, now: NaiveDateTime, snapshot: &MarketSnapshot) -> Option<SmoothedSignal> {
        let timed = snapshot.signal?;
        let age = (now - timed.timestamp).to_std().unwrap_or(Duration::ZERO);
        if age > self.settings.max_signal_age {
            tracing::debug!(signal = %timed.timestamp, ?age, "ignoring stale signal");
            None
        } else {
            Some(timed.signal)
        }
    }
}

/// Timeouts are not retried: the order may have gone through.
fn place_order(
    retry: &RetryPolicy,
    what: &str,
    ports: &LivePorts<'_>,
    order: &OrderRequest,
) -> Result<Fill, IntratraderError> {
    retry.run_filtered(
        what,
        || ports.broker.place_order(order),
        |e| !e.is_timeout(),
        std::thread::sleep,
    )
}

fn notify(ports: &LivePorts<'_>, message: &str) {
    if let Err(e) = ports.notifier.notify(message) {
        tracing::warn!(error = %e, "notification failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::bar::Bar;
    use crate::domain::position::Direction;
    use crate::domain::signal::TimedSignal;
    use chrono::NaiveDate;
    use std::cell::{Cell, RefCell};

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 7, 14)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    struct StubFeed {
        snapshot: RefCell<Option<MarketSnapshot>>,
        fail: Cell<bool>,
    }

    impl StubFeed {
        fn new(price: f64, signal: Option<TimedSignal>) -> Self {
            StubFeed {
                snapshot: RefCell::new(Some(MarketSnapshot {
                    bar: Bar::flat(at(10, 0, 0), price),
                    signal,
                    atr: None,
                })),
                fail: Cell::new(false),
            }
        }

        fn set_price(&self, price: f64) {
            if let Some(s) = self.snapshot.borrow_mut().as_mut() {
                s.bar.close = price;
            }
        }
    }

    impl MarketFeedPort for StubFeed {
        fn snapshot(&self) -> Result<Option<MarketSnapshot>, IntratraderError> {
            if self.fail.get() {
                return Err(IntratraderError::Data {
                    reason: "feed down".into(),
                });
            }
            Ok(self.snapshot.borrow().clone())
        }
    }

    struct StubBroker {
        fail: Cell<bool>,
        hang: Cell<bool>,
        orders: RefCell<Vec<OrderRequest>>,
    }

    impl StubBroker {
        fn new() -> Self {
            StubBroker {
                fail: Cell::new(false),
                hang: Cell::new(false),
                orders: RefCell::new(Vec::new()),
            }
        }
    }

    impl BrokerPort for StubBroker {
        fn place_order(&self, order: &OrderRequest) -> Result<Fill, IntratraderError> {
            self.orders.borrow_mut().push(*order);
            if self.hang.get() {
                return Err(IntratraderError::Timeout {
                    call: "broker order".into(),
                    after: Duration::from_millis(300),
                });
            }
            if self.fail.get() {
                return Err(IntratraderError::Broker {
                    reason: "rejected".into(),
                });
            }
            Ok(Fill {
                price: order.reference_price,
                timestamp: order.timestamp,
            })
        }
    }

    struct Silent;

    impl NotifierPort for Silent {
        fn notify(&self, _message: &str) -> Result<(), IntratraderError> {
            Ok(())
        }
    }

    fn settings() -> LiveSettings {
        LiveSettings {
            retry: RetryPolicy {
                max_retries: 1,
                base_delay: Duration::from_millis(1),
            },
            ..LiveSettings::default()
        }
    }

    fn long_signal(timestamp: NaiveDateTime) -> TimedSignal {
        TimedSignal {
            timestamp,
            signal: SmoothedSignal {
                entry_smoothed_long: 0.9,
                ..Default::default()
            },
        }
    }

    #[test]
    fn opens_then_takes_profit() {
        let feed = StubFeed::new(1000.0, Some(long_signal(at(9, 59, 0))));
        let broker = StubBroker::new();
        let ports = LivePorts {
            feed: &feed,
            broker: &broker,
            notifier: &Silent,
        };
        let mut session = LiveSession::new(TradingParams::default(), settings());

        match session.entry_tick(at(10, 0, 0), &ports) {
            TickOutcome::Opened(p) => {
                assert_eq!(p.direction, Direction::Long);
                assert_eq!(p.take_profit, 1050.0);
            }
            other => panic!("expected open, got {other:?}"),
        }
        assert_eq!(session.opened_today(), 1);

        feed.set_price(1051.0);
        assert_eq!(
            session.exit_tick(at(10, 0, 10), &ports),
            TickOutcome::Exits { closed: 1, failed: 0 }
        );
        let closed = session.drain_closed();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].exit_reason, ExitReason::FixedTp);
        assert!(session.drain_closed().is_empty());
    }

    #[test]
    fn stale_signal_is_ignored_for_entries() {
        let feed = StubFeed::new(1000.0, Some(long_signal(at(9, 57, 0))));
        let broker = StubBroker::new();
        let ports = LivePorts {
            feed: &feed,
            broker: &broker,
            notifier: &Silent,
        };
        let mut session = LiveSession::new(TradingParams::default(), settings());
        assert_eq!(
            session.entry_tick(at(10, 0, 0), &ports),
            TickOutcome::EntrySkipped(SkipReason::MissingSignal)
        );
        assert!(broker.orders.borrow().is_empty());
    }

    #[test]
    fn feed_failure_degrades_cycle() {
        let feed = StubFeed::new(1000.0, Some(long_signal(at(10, 0, 0))));
        feed.fail.set(true);
        let broker = StubBroker::new();
        let ports = LivePorts {
            feed: &feed,
            broker: &broker,
            notifier: &Silent,
        };
        let mut session = LiveSession::new(TradingParams::default(), settings());
        assert!(matches!(session.entry_tick(at(10, 0, 0), &ports), TickOutcome::Degraded(_)));
        assert_eq!(session.portfolio().open_count(), 0);
    }

    #[test]
    fn broker_failure_keeps_position_open_until_next_tick() {
        let feed = StubFeed::new(1000.0, Some(long_signal(at(10, 0, 0))));
        let broker = StubBroker::new();
        let ports = LivePorts {
            feed: &feed,
            broker: &broker,
            notifier: &Silent,
        };
        let mut session = LiveSession::new(TradingParams::default(), settings());
        assert!(matches!(session.entry_tick(at(10, 0, 0), &ports), TickOutcome::Opened(_)));

        feed.set_price(800.0);
        broker.fail.set(true);
        assert_eq!(
            session.exit_tick(at(10, 0, 10), &ports),
            TickOutcome::Exits { closed: 0, failed: 1 }
        );
        assert_eq!(session.portfolio().open_count(), 1);
        // first attempt plus one retry
        assert_eq!(broker.orders.borrow().len(), 3);

        broker.fail.set(false);
        assert_eq!(
            session.exit_tick(at(10, 0, 20), &ports),
            TickOutcome::Exits { closed: 1, failed: 0 }
        );
        assert_eq!(session.drain_closed()[0].exit_reason, ExitReason::FixedSl);
    }

    #[test]
    fn broker_failure_on_entry_opens_nothing() {
        let feed = StubFeed::new(1000.0, Some(long_signal(at(10, 0, 0))));
        let broker = StubBroker::new();
        broker.fail.set(true);
        let ports = LivePorts {
            feed: &feed,
            broker: &broker,
            notifier: &Silent,
        };
        let mut session = LiveSession::new(TradingParams::default(), settings());
        assert!(matches!(session.entry_tick(at(10, 0, 0), &ports), TickOutcome::Degraded(_)));
        assert_eq!(session.portfolio().open_count(), 0);
        assert_eq!(session.opened_today(), 0);
    }

    #[test]
    fn daily_counter_resets_on_new_date() {
        let feed = StubFeed::new(1000.0, Some(long_signal(at(10, 0, 0))));
        let broker = StubBroker::new();
        let ports = LivePorts {
            feed: &feed,
            broker: &broker,
            notifier: &Silent,
        };
        let params = TradingParams {
            max_daily_positions: 1,
            ..TradingParams::default()
        };
        let mut session = LiveSession::new(params, settings());
        assert!(matches!(session.entry_tick(at(10, 0, 0), &ports), TickOutcome::Opened(_)));
        assert_eq!(
            session.entry_tick(at(10, 1, 0), &ports),
            TickOutcome::EntrySkipped(SkipReason::DailyCap)
        );

        let next_day = at(10, 0, 0) + chrono::Duration::days(1);
        *feed.snapshot.borrow_mut() = Some(MarketSnapshot {
            bar: Bar::flat(next_day, 1000.0),
            signal: Some(long_signal(next_day)),
            atr: None,
        });
        assert!(matches!(session.entry_tick(next_day, &ports), TickOutcome::Opened(_)));
    }

    #[test]
    fn market_close_stops_entries() {
        let feed = StubFeed::new(1000.0, Some(long_signal(at(15, 25, 0))));
        let broker = StubBroker::new();
        let ports = LivePorts {
            feed: &feed,
            broker: &broker,
            notifier: &Silent,
        };
        let mut session = LiveSession::new(TradingParams::default(), settings());
        assert_eq!(session.entry_tick(at(15, 25, 0), &ports), TickOutcome::MarketClosed);
    }

    #[test]
    fn stale_bar_blocks_entries_and_exits() {
        let next_day = at(10, 0, 0) + chrono::Duration::days(1);
        let feed = StubFeed::new(1000.0, Some(long_signal(next_day)));
        let broker = StubBroker::new();
        let ports = LivePorts {
            feed: &feed,
            broker: &broker,
            notifier: &Silent,
        };
        let mut session = LiveSession::new(TradingParams::default(), settings());
        match session.entry_tick(next_day, &ports) {
            TickOutcome::Degraded(reason) => assert!(reason.contains("stale bar"), "{reason}"),
            other => panic!("expected degraded tick, got {other:?}"),
        }
        assert!(broker.orders.borrow().is_empty());

        // open on a fresh bar, then let the feed go quiet past its target
        *feed.snapshot.borrow_mut() = Some(MarketSnapshot {
            bar: Bar::flat(at(10, 0, 0), 1000.0),
            signal: Some(long_signal(at(10, 0, 0))),
            atr: None,
        });
        assert!(matches!(session.entry_tick(at(10, 0, 0), &ports), TickOutcome::Opened(_)));
        feed.set_price(1100.0);
        assert!(matches!(session.exit_tick(at(10, 5, 0), &ports), TickOutcome::Degraded(_)));
        assert_eq!(session.portfolio().open_count(), 1);
        assert_eq!(broker.orders.borrow().len(), 1);
    }

    #[test]
    fn timed_out_order_is_not_retried() {
        let feed = StubFeed::new(1000.0, Some(long_signal(at(10, 0, 0))));
        let broker = StubBroker::new();
        broker.hang.set(true);
        let ports = LivePorts {
            feed: &feed,
            broker: &broker,
            notifier: &Silent,
        };
        let mut session = LiveSession::new(TradingParams::default(), settings());
        assert!(matches!(session.entry_tick(at(10, 0, 0), &ports), TickOutcome::Degraded(_)));
        assert_eq!(broker.orders.borrow().len(), 1);
        assert_eq!(session.portfolio().open_count(), 0);
        assert_eq!(session.opened_today(), 0);
    }

    #[test]
    fn restored_session_resumes_positions_and_daily_count() {
        let feed = StubFeed::new(1000.0, Some(long_signal(at(10, 0, 0))));
        let broker = StubBroker::new();
        let ports = LivePorts {
            feed: &feed,
            broker: &broker,
            notifier: &Silent,
        };
        let params = TradingParams {
            max_daily_positions: 1,
            ..TradingParams::default()
        };
        let mut first = LiveSession::new(params.clone(), settings());
        assert!(matches!(first.entry_tick(at(10, 0, 0), &ports), TickOutcome::Opened(_)));
        let saved = first.state();
        assert_eq!(saved.opened_today, 1);
        assert_eq!(saved.open_positions.len(), 1);
        drop(first);

        let mut resumed = LiveSession::restore(params, settings(), saved.clone());
        assert_eq!(resumed.state(), saved);
        assert_eq!(
            resumed.entry_tick(at(10, 1, 0), &ports),
            TickOutcome::EntrySkipped(SkipReason::DailyCap)
        );

        feed.set_price(1050.0);
        assert_eq!(
            resumed.exit_tick(at(10, 1, 10), &ports),
            TickOutcome::Exits { closed: 1, failed: 0 }
        );
        let closed = resumed.drain_closed();
        assert_eq!(closed[0].entry_time, at(10, 0, 0));
        assert_eq!(closed[0].exit_reason, ExitReason::FixedTp);
    }

    #[test]
    fn close_out_ignores_the_exit_chain() {
        let feed = StubFeed::new(1000.0, Some(long_signal(at(10, 0, 0))));
        let broker = StubBroker::new();
        let ports = LivePorts {
            feed: &feed,
            broker: &broker,
            notifier: &Silent,
        };
        let mut session = LiveSession::new(TradingParams::default(), settings());
        assert!(matches!(session.entry_tick(at(10, 0, 0), &ports), TickOutcome::Opened(_)));
        assert_eq!(
            session.exit_tick(at(10, 0, 30), &ports),
            TickOutcome::Exits { closed: 0, failed: 0 }
        );
        assert_eq!(
            session.close_out(at(10, 1, 0), &ports),
            TickOutcome::Exits { closed: 1, failed: 0 }
        );
        assert_eq!(session.drain_closed()[0].exit_reason, ExitReason::ForcedExit);
        assert!(session.state().open_positions.is_empty());
    }
}
