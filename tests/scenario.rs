use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use rules_bt::prelude::*;

fn day(d: i64) -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_time(NaiveTime::MIN).and_utc() + Duration::days(d)
}

fn series(prices: &[f64]) -> Vec<PriceBar> {
    prices
        .iter()
        .enumerate()
        .map(|(i, p)| PriceBar::from((day(i as i64), *p, 1_000)))
        .collect()
}

fn dip_and_take_profit() -> RuleSet {
    let mut rules = RuleSet::default();
    rules
        .push(Rule::Threshold(ThresholdRule {
            name: "Dip".into(),
            side: Side::Buy,
            metric: Metric::Price,
            direction: Direction::Decrease,
            percent: 3.0,
            quantity: 10,
        }))
        .unwrap()
        .push(Rule::ThresholdExit(ThresholdExitRule {
            name: "Take profit".into(),
            kind: ExitKind::Profit,
            profit_percent: Some(2.0),
            loss_percent: None,
            quantity: 10,
        }))
        .unwrap();
    rules
}

fn config(instruments: &[&str], capital: f64) -> BacktestConfig {
    BacktestConfig::new(
        instruments.iter().map(|i| i.to_string()).collect(),
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        capital,
        dip_and_take_profit(),
    )
}

fn dip_then_profit() -> BacktestResult {
    let provider = InMemoryProvider::new().with_series("XYZ", series(&[100.0, 97.0, 101.0, 95.0, 99.0]));
    Backtest::new(config(&["XYZ"], 100_000.0)).unwrap().run(&provider).unwrap()
}

#[test]
fn dip_buy_then_take_profit_twice() {
    let result = dip_then_profit();

    let trades = result
        .trades()
        .iter()
        .map(|t| (t.timestamp, t.side, t.price, t.rule_name.as_str(), t.pnl))
        .collect::<Vec<_>>();
    assert_eq!(
        trades,
        vec![
            (day(1), Side::Buy, 97.0, "Dip", None),
            (day(2), Side::Sell, 101.0, "Take profit", Some(40.0)),
            (day(3), Side::Buy, 95.0, "Dip", None),
            (day(4), Side::Sell, 99.0, "Take profit", Some(40.0)),
        ]
    );
    assert_eq!(result.final_cash(), 100_080.0);

    let metrics = Metrics::from(&result);
    assert_eq!(metrics.total_trades(), 4);
    assert_eq!(metrics.winning_trades(), 2);
    assert_eq!(metrics.losing_trades(), 0);
    assert_eq!(metrics.total_pnl(), 80.0);
    assert!((metrics.percent_return() - 0.08).abs() < 1e-9);
    assert_eq!(metrics.max_drawdown(), 0.0);
    assert_eq!(metrics.win_rate(), 100.0);
    assert!(metrics.profit_factor().is_infinite());
}

#[test]
fn dip_buy_equity_curve() {
    let result = dip_then_profit();
    let equity = result.snapshots().iter().map(|s| s.equity).collect::<Vec<_>>();
    assert_eq!(equity, vec![100_000.0, 100_000.0, 100_040.0, 100_040.0, 100_080.0]);
    assert_eq!(result.snapshots()[0].timestamp, day(0));
    assert_eq!(result.snapshots()[4].timestamp, day(4));
}

#[cfg(feature = "serde")]
#[test]
fn dip_buy_report() {
    let report = BacktestReport::from(&dip_then_profit());
    assert_eq!(report.total_trades, 4);
    assert_eq!(report.total_pnl, 80.0);
    assert_eq!(report.percent_return, 0.08);
    assert_eq!(report.max_drawdown, 0.0);
    assert_eq!(report.portfolio_value.len(), report.timestamps.len());
    assert_eq!(report.timestamps[0], "2024-01-01T00:00:00");
    assert_eq!(report.trades[1].timestamp, "2024-01-03T00:00:00");

    let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert_eq!(json["totalPnL"], 80.0);
    assert_eq!(json["winningTrades"], 2);
    assert_eq!(json["trades"][0]["side"], "BUY");
    assert_eq!(json["trades"][0]["ruleName"], "Dip");
    assert!(json["trades"][0].get("pnl").is_none());
    assert_eq!(json["trades"][1]["pnl"], 40.0);
}

#[cfg(feature = "serde")]
#[test]
fn request_runs_end_to_end() {
    let request: BacktestRequest = serde_json::from_value(serde_json::json!({
        "stocks": ["XYZ"],
        "startDate": "2024-01-01",
        "endDate": "2024-01-31",
        "initialCapital": 100000,
        "rules": [
            { "name": "Dip", "decision": "BUY", "quantity": 10, "pythonRuleType": "price_dip", "changePercent": 3 },
            { "name": "Take profit", "decision": "SELL", "quantity": 10,
              "ruleVariant": "early_profit_taker", "profitThreshold": 0.02 },
        ],
    }))
    .unwrap();
    let config = BacktestConfig::try_from(request).unwrap();
    config.rules.check_pairing().unwrap();

    let provider = InMemoryProvider::new().with_series("XYZ", series(&[100.0, 97.0, 101.0, 95.0, 99.0]));
    let result = Backtest::new(config).unwrap().run(&provider).unwrap();
    assert_eq!(result.final_cash(), 100_080.0);
    assert_eq!(result, dip_then_profit());
}

#[test]
fn capital_goes_to_the_first_configured_instrument() {
    let provider = InMemoryProvider::new()
        .with_series("AAA", series(&[100.0, 97.0, 101.0]))
        .with_series("BBB", series(&[100.0, 97.0, 101.0]));

    // 1000 covers a single 10 x 97 entry
    for (order, winner) in [(["AAA", "BBB"], "AAA"), (["BBB", "AAA"], "BBB")] {
        let result = Backtest::new(config(&order, 1_000.0)).unwrap().run(&provider).unwrap();
        assert_eq!(result.trades().len(), 2);
        assert!(result.trades().iter().all(|t| t.instrument == winner));
        assert_eq!(result.final_cash(), 1_040.0);
    }
}

#[test]
fn open_positions_are_liquidated_at_their_own_last_bar() {
    let provider = InMemoryProvider::new()
        .with_series("AAA", series(&[100.0, 97.0, 96.0]))
        .with_series("BBB", series(&[100.0, 97.0, 96.0, 95.0, 94.0]));
    let result = Backtest::new(config(&["AAA", "BBB"], 10_000.0)).unwrap().run(&provider).unwrap();

    let exits = result.trades().iter().filter(|t| t.is_liquidation()).collect::<Vec<_>>();
    assert_eq!(exits.len(), 2);
    assert_eq!((exits[0].instrument.as_str(), exits[0].timestamp, exits[0].pnl), ("AAA", day(2), Some(-10.0)));
    assert_eq!((exits[1].instrument.as_str(), exits[1].timestamp, exits[1].pnl), ("BBB", day(4), Some(-30.0)));
    assert_eq!(result.final_cash(), 9_960.0);

    let metrics = Metrics::from(&result);
    assert_eq!(metrics.losing_trades(), 2);
    assert_eq!(metrics.win_rate(), 0.0);
    assert!(metrics.max_drawdown() > 0.0);
}

#[test]
fn synthetic_runs_are_reproducible() {
    let mut rules = RuleSet::default();
    rules
        .push(Rule::IndicatorCross(IndicatorCrossRule {
            name: "MR".into(),
            short_window: 5,
            long_window: 20,
            quantity: 5,
        }))
        .unwrap()
        .push(Rule::ThresholdExit(ThresholdExitRule {
            name: "LPT".into(),
            kind: ExitKind::Both,
            profit_percent: Some(3.0),
            loss_percent: Some(3.0),
            quantity: 5,
        }))
        .unwrap();
    let config = BacktestConfig::new(
        vec!["AAA".into(), "BBB".into()],
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
        25_000.0,
        rules,
    )
    .granularity(Granularity::H4);

    let backtest = Backtest::new(config).unwrap();
    let a = backtest.run(&SyntheticProvider::new(7)).unwrap();
    let b = backtest.run(&SyntheticProvider::new(7)).unwrap();
    assert_eq!(a, b);
    assert!(a.snapshots().len() > 2);
    assert!(a.trades().iter().all(|t| t.timestamp.date_naive() <= NaiveDate::from_ymd_opt(2024, 3, 31).unwrap()));
}
