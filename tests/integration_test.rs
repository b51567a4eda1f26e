//! End-to-end simulation tests over synthetic one-minute sessions.

mod common;

use approx::assert_relative_eq;
use common::*;
use intratrader::domain::backtest::{run_simulation, ClockState, SimulationClock, SimulationConfig, SimulationResult};
use intratrader::domain::entry_policy::SkipReason;
use intratrader::domain::error::IntratraderError;
use intratrader::domain::offsets::{AtrMultiple, OffsetStrategy};
use intratrader::domain::params::TradingParams;
use intratrader::domain::position::{Direction, ExitReason, TradeResult};
use intratrader::domain::series::{prepare_signals, MarketData};
use intratrader::domain::signal::{FeatureRow, PredictionInput, PredictionRow, TimedSignal};
use proptest::prelude::*;

const DAY: &str = "2025-07-14";
const NEXT_DAY: &str = "2025-07-15";

fn simulate(bars: Vec<Bar>, signals: Vec<TimedSignal>, params: TradingParams) -> SimulationResult {
    simulate_with_features(bars, signals, Vec::new(), params)
}

fn simulate_with_features(
    bars: Vec<Bar>,
    signals: Vec<TimedSignal>,
    features: Vec<FeatureRow>,
    params: TradingParams,
) -> SimulationResult {
    let start = bars.first().map(|b| b.date()).unwrap();
    let end = bars.last().map(|b| b.date()).unwrap();
    let data = MarketData::new(bars, signals, features).unwrap();
    let config = SimulationConfig {
        start_date: start,
        end_date: end,
        params,
    };
    run_simulation(&data, &config)
}

#[test]
fn flat_price_long_closes_at_forced_exit_with_zero_pnl() {
    let bars = session_bars(DAY, |_| 100.0);
    let signals = signals_for(&bars, &[1]);
    let result = simulate(bars, signals, TradingParams::default());

    assert_eq!(result.closed.len(), 1);
    let trade = &result.closed[0];
    assert_eq!(trade.direction, Direction::Long);
    assert_eq!(trade.entry_time, ts(DAY, 9, 16));
    assert_eq!(trade.exit_time, ts(DAY, 15, 13));
    assert_eq!(trade.exit_reason, ExitReason::ForcedExit);
    assert_eq!(trade.pnl, 0.0);
    assert_eq!(trade.result, TradeResult::Loss);
    assert_relative_eq!(trade.confidence, 0.9);
}

#[test]
fn rising_price_hits_take_profit_first_time_target_is_reached() {
    let bars = session_bars(DAY, |i| if i <= 1 { 100.0 } else { 100.0 + (i - 1) as f64 });
    let signals = signals_for(&bars, &[1]);
    let result = simulate(bars, signals, TradingParams::default());

    assert_eq!(result.closed.len(), 1);
    let trade = &result.closed[0];
    assert_eq!(trade.exit_reason, ExitReason::FixedTp);
    assert_eq!(trade.exit_time, ts(DAY, 10, 6));
    assert_eq!(trade.exit_price, 150.0);
    assert_eq!(trade.pnl, 50.0);
    assert_eq!(trade.result, TradeResult::Win);
}

#[test]
fn falling_price_hits_stop_loss() {
    let bars = session_bars(DAY, |i| if i <= 1 { 1000.0 } else { 1000.0 - 2.0 * (i - 1) as f64 });
    let signals = signals_for(&bars, &[1]);
    let result = simulate(bars, signals, TradingParams::default());

    let trade = &result.closed[0];
    assert_eq!(trade.exit_reason, ExitReason::FixedSl);
    assert_eq!(trade.exit_price, 840.0);
    assert_eq!(trade.pnl, -160.0);
}

#[test]
fn opposite_exit_confidence_closes_long() {
    let bars = session_bars(DAY, |_| 100.0);
    let mut signals = signals_for(&bars, &[1]);
    signals[15] = signal(bars[15].timestamp, 0.1, 0.1, 0.1, 0.52);
    let result = simulate(bars, signals, TradingParams::default());

    assert_eq!(result.closed.len(), 1);
    let trade = &result.closed[0];
    assert_eq!(trade.exit_reason, ExitReason::ConfShortExit);
    assert_eq!(trade.exit_time, ts(DAY, 9, 30));
    assert_eq!(trade.pnl, 0.0);
}

#[test]
fn short_position_closes_on_long_exit_confidence() {
    let bars = session_bars(DAY, |_| 100.0);
    let mut signals = signals_for(&bars, &[]);
    signals[3] = signal(bars[3].timestamp, 0.1, 0.95, 0.1, 0.95);
    signals[10] = signal(bars[10].timestamp, 0.1, 0.1, 0.6, 0.1);
    let result = simulate(bars, signals, TradingParams::default());

    assert_eq!(result.closed.len(), 1);
    let trade = &result.closed[0];
    assert_eq!(trade.direction, Direction::Short);
    assert_eq!(trade.stop_loss, 260.0);
    assert_eq!(trade.take_profit, 50.0);
    assert_eq!(trade.exit_reason, ExitReason::ConfLongExit);
}

#[test]
fn concurrent_cap_blocks_the_61st_entry() {
    let bars = session_bars(DAY, |_| 100.0);
    let qualifying: Vec<usize> = (0..61).collect();
    let signals = signals_for(&bars, &qualifying);
    let sixty_first = bars[60].timestamp;
    let result = simulate(bars, signals, TradingParams::default());

    assert_eq!(result.closed.len(), 60);
    assert_eq!(result.peak_open, 60);
    assert!(result.closed.iter().all(|t| t.entry_time != sixty_first));
    assert!(result.skips[&SkipReason::ConcurrentCap] >= 1);
    assert!(result.closed.iter().all(|t| t.exit_reason == ExitReason::ForcedExit));
}

#[test]
fn daily_cap_resets_on_the_next_day() {
    let params = TradingParams {
        max_daily_positions: 2,
        ..TradingParams::default()
    };
    let mut bars = session_bars(DAY, |_| 100.0);
    bars.extend(session_bars(NEXT_DAY, |_| 100.0));
    let mut signals = signals_for(&bars, &[0, 1, 2, 3, 4]);
    let second_day_start = 375;
    for i in second_day_start..second_day_start + 5 {
        signals[i] = signal(bars[i].timestamp, 0.9, 0.1, 0.9, 0.1);
    }
    let result = simulate(bars, signals, params);

    let entries: Vec<_> = result.closed.iter().map(|t| t.entry_time).collect();
    assert_eq!(
        entries,
        vec![
            ts(DAY, 9, 15),
            ts(DAY, 9, 16),
            ts(NEXT_DAY, 9, 15),
            ts(NEXT_DAY, 9, 16)
        ]
    );
    // Every later in-window bar on each day hits the cap.
    assert_eq!(result.skips[&SkipReason::DailyCap], 2 * (311 - 2));
    assert_eq!(result.days_processed, 2);
}

#[test]
fn long_wins_when_both_sides_qualify() {
    let bars = session_bars(DAY, |_| 100.0);
    let mut signals = signals_for(&bars, &[]);
    signals[2] = signal(bars[2].timestamp, 0.9, 0.95, 0.1, 0.1);
    let result = simulate(bars, signals, TradingParams::default());
    assert_eq!(result.closed[0].direction, Direction::Long);
}

#[test]
fn bars_without_signal_are_skipped_not_errors() {
    let bars = session_bars(DAY, |_| 100.0);
    let result = simulate(bars, Vec::new(), TradingParams::default());

    assert!(result.closed.is_empty());
    // 09:15 through 14:25 inclusive.
    assert_eq!(result.skips[&SkipReason::MissingSignal], 311);
    assert_eq!(result.skips[&SkipReason::FinalBar], 1);
    assert_eq!(result.bars_processed, 375);
}

#[test]
fn forced_exit_takes_precedence_over_take_profit() {
    let bars = session_bars(DAY, |i| if i >= 358 { 150.0 } else { 100.0 });
    let signals = signals_for(&bars, &[1]);
    let result = simulate(bars, signals, TradingParams::default());

    let trade = &result.closed[0];
    assert_eq!(trade.exit_time, ts(DAY, 15, 13));
    assert_eq!(trade.exit_reason, ExitReason::ForcedExit);
    assert_eq!(trade.pnl, 50.0);
}

#[test]
fn atr_stops_scale_with_volatility() {
    let params = TradingParams {
        offsets: OffsetStrategy::Atr(AtrMultiple {
            multiplier: 2.0,
            reward_ratio: 1.5,
        }),
        ..TradingParams::default()
    };
    let bars = session_bars(DAY, |i| if i <= 1 { 100.0 } else { 100.0 + (i - 1) as f64 });
    let signals = signals_for(&bars, &[0, 1]);
    let features = vec![FeatureRow {
        timestamp: bars[1].timestamp,
        atr: Some(10.0),
    }];
    let result = simulate_with_features(bars, signals, features, params);

    assert_eq!(result.skips[&SkipReason::MissingAtr], 1);
    assert_eq!(result.closed.len(), 1);
    let trade = &result.closed[0];
    assert_eq!(trade.entry_time, ts(DAY, 9, 16));
    assert_eq!(trade.stop_loss, 80.0);
    assert_eq!(trade.take_profit, 130.0);
    assert_eq!(trade.exit_reason, ExitReason::FixedTp);
    assert_eq!(trade.pnl, 30.0);
}

#[test]
fn stragglers_close_at_the_last_bar_of_the_series() {
    let mut bars = minute_bars(DAY, 9, 15, 46, |_| 100.0);
    bars.extend(session_bars(NEXT_DAY, |_| 120.0));
    let signals = signals_for(&bars, &[1]);
    let data = MarketData::new(bars, signals, Vec::new()).unwrap();
    let config = sim_config(DAY, DAY, TradingParams::default());
    let result = run_simulation(&data, &config);

    assert_eq!(result.days_processed, 1);
    assert_eq!(result.closed.len(), 1);
    let trade = &result.closed[0];
    assert_eq!(trade.exit_reason, ExitReason::FinalClose);
    assert_eq!(trade.exit_time, ts(NEXT_DAY, 15, 29));
    assert_eq!(trade.pnl, 20.0);
}

#[test]
fn no_entry_on_the_last_bar_of_the_series() {
    let bars = minute_bars(DAY, 9, 15, 5, |_| 100.0);
    let signals = signals_for(&bars, &[4]);
    let result = simulate(bars, signals, TradingParams::default());
    assert!(result.closed.is_empty());
    assert_eq!(result.skips[&SkipReason::FinalBar], 1);
}

#[test]
fn out_of_order_bars_are_rejected() {
    let mut bars = session_bars(DAY, |_| 100.0);
    bars.swap(10, 11);
    let err = MarketData::new(bars, Vec::new(), Vec::new()).unwrap_err();
    match err {
        IntratraderError::DataOrdering {
            series, timestamp, ..
        } => {
            assert_eq!(series, "bars");
            assert_eq!(timestamp, ts(DAY, 9, 25));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn raw_predictions_are_smoothed_with_partial_windows() {
    let rows: Vec<PredictionRow> = [0.2, 0.8, 0.9]
        .iter()
        .enumerate()
        .map(|(i, &c)| PredictionRow::new(ts(DAY, 9, 15 + i as u32), Direction::Long, c))
        .collect();
    let signals = prepare_signals(PredictionInput::Raw(rows), &TradingParams::default()).unwrap();

    assert_eq!(signals.len(), 3);
    // Entry window 3: (0.2*1 + 0.8*2 + 0.9*3) / 6.
    assert_relative_eq!(signals[2].signal.entry_smoothed_long, 0.75, epsilon = 1e-12);
    // Exit window 15 with three rows: weights 13, 14, 15.
    assert_relative_eq!(signals[2].signal.exit_smoothed_long, 27.3 / 42.0, epsilon = 1e-12);
    assert_eq!(signals[2].signal.entry_smoothed_short, 0.0);
}

#[test]
fn clock_walks_calendar_days_including_empty_ones() {
    let mut bars = minute_bars(DAY, 9, 15, 3, |_| 100.0);
    bars.extend(minute_bars("2025-07-16", 9, 15, 3, |_| 100.0));
    let data = MarketData::new(bars, Vec::new(), Vec::new()).unwrap();
    let config = sim_config(DAY, "2025-07-16", TradingParams::default());
    let mut clock = SimulationClock::new(&data, &config);

    let mut seen = Vec::new();
    while clock.state() != ClockState::Finished {
        seen.push(clock.state());
        clock.step();
    }
    assert!(seen.contains(&ClockState::DayComplete(date(NEXT_DAY))));
    assert!(!seen
        .iter()
        .any(|s| matches!(s, ClockState::ProcessingBar { date: d, .. } if *d == date(NEXT_DAY))));
    assert_eq!(
        seen.iter()
            .filter(|s| matches!(s, ClockState::ProcessingBar { .. }))
            .count(),
        6
    );
}

fn arb_session() -> impl Strategy<Value = (Vec<Bar>, Vec<TimedSignal>)> {
    prop::collection::vec((-40i32..=40, 0u8..=100, 0u8..=100, 0u8..=100, 0u8..=100), 30..160).prop_map(
        |steps| {
            let mut price = 1000.0;
            let mut bars = Vec::with_capacity(steps.len());
            let mut signals = Vec::with_capacity(steps.len());
            let start = ts(DAY, 14, 0);
            for (i, (delta, el, es, xl, xs)) in steps.into_iter().enumerate() {
                price += f64::from(delta);
                let t = start + chrono::Duration::minutes(i as i64);
                bars.push(Bar::flat(t, price));
                signals.push(signal(
                    t,
                    f64::from(el) / 100.0,
                    f64::from(es) / 100.0,
                    f64::from(xl) / 100.0,
                    f64::from(xs) / 100.0,
                ));
            }
            (bars, signals)
        },
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn every_entered_position_closes_exactly_once((bars, signals) in arb_session()) {
        let params = TradingParams {
            long_threshold: 0.6,
            short_threshold: 0.6,
            max_concurrent_positions: 5,
            max_daily_positions: 12,
            ..TradingParams::default()
        };
        let last = bars.last().map(|b| b.timestamp).unwrap();
        let result = simulate(bars, signals, params.clone());

        let skipped: usize = result.skips.values().sum();
        prop_assert_eq!(result.closed.len(), result.bars_processed - skipped);
        prop_assert!(result.peak_open <= params.max_concurrent_positions);
        prop_assert!(result.closed.len() <= params.max_daily_positions);
        for t in &result.closed {
            prop_assert!(t.entry_time < t.exit_time);
            prop_assert!(t.exit_time <= last);
            prop_assert!(params.in_entry_window(t.entry_time.time()));
            prop_assert_eq!(t.pnl, t.direction.sign() * (t.exit_price - t.entry_price));
        }
    }

    #[test]
    fn simulation_is_deterministic((bars, signals) in arb_session()) {
        let first = simulate(bars.clone(), signals.clone(), TradingParams::default());
        let second = simulate(bars, signals, TradingParams::default());
        prop_assert_eq!(first, second);
    }
}
