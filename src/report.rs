//! JSON request/response boundary.
//!
//! A [`BacktestRequest`] is the wire form of a configuration: rules arrive as loosely typed
//! records (`decision`, `changeType`, `ruleVariant`, ...) and are converted into typed [`Rule`]s
//! here, so the engine never sees a field that only makes sense for another rule kind.
//! A [`BacktestReport`] is the wire form of a result, with money and percent values rounded to
//! cents.

use std::path::Path;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{
    engine::*,
    errors::{Error, Result},
    metrics::Metrics,
    utils::{read_json, round2},
};

const DEFAULT_SHORT_WINDOW: usize = 5;
const DEFAULT_LONG_WINDOW: usize = 20;
// thresholds travel as fractions
const DEFAULT_THRESHOLD: f64 = 0.02;
const DEFAULT_CHANGE_PERCENT: f64 = 2.0;
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// What a threshold rule watches, as sent on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// Price up by at least `changePercent`.
    PriceIncrease,
    /// Price down by at least `changePercent`.
    PriceDecrease,
    /// Volume up by at least `changePercent`.
    VolumeIncrease,
    /// Volume down by at least `changePercent`.
    VolumeDecrease,
}

impl ChangeType {
    fn split(self) -> (Metric, Direction) {
        match self {
            ChangeType::PriceIncrease => (Metric::Price, Direction::Increase),
            ChangeType::PriceDecrease => (Metric::Price, Direction::Decrease),
            ChangeType::VolumeIncrease => (Metric::Volume, Direction::Increase),
            ChangeType::VolumeDecrease => (Metric::Volume, Direction::Decrease),
        }
    }
}

/// Named rule presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleVariant {
    /// BUY while the short moving average is below the long one.
    MeanReversal,
    /// BUY on a price drop (`changePercent`).
    PriceDip,
    /// BUY on a price rise (`changePercent`).
    PriceMomentum,
    /// SELL once the position gained `profitThreshold`.
    EarlyProfitTaker,
    /// SELL once the position lost `lossThreshold`.
    EarlyLossTaker,
    /// SELL on whichever threshold is reached first.
    LossProfitTaker,
}

impl RuleVariant {
    fn side(&self) -> Side {
        match self {
            RuleVariant::MeanReversal | RuleVariant::PriceDip | RuleVariant::PriceMomentum => Side::Buy,
            _ => Side::Sell,
        }
    }
}

impl FromStr for RuleVariant {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mean_reversal" => Ok(RuleVariant::MeanReversal),
            "price_dip" => Ok(RuleVariant::PriceDip),
            "price_momentum" => Ok(RuleVariant::PriceMomentum),
            "early_profit_taker" => Ok(RuleVariant::EarlyProfitTaker),
            "early_loss_taker" => Ok(RuleVariant::EarlyLossTaker),
            "loss_profit_taker" => Ok(RuleVariant::LossProfitTaker),
            _ => Err(Error::UnknownRuleVariant(s.to_string())),
        }
    }
}

fn enabled_by_default() -> bool {
    true
}

/// One rule as sent on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleConfig {
    /// Client-side identifier, ignored by the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Display name, recorded on trades.
    pub name: String,
    /// Whether the rule takes part in the run.
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// `BUY` or `SELL`.
    pub decision: Side,
    /// Quantity bought on entry.
    pub quantity: u64,
    /// Bar interval the rule was designed for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeframe: Option<String>,
    /// Threshold rule trigger.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_type: Option<ChangeType>,
    /// Threshold rule level, in percent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_percent: Option<f64>,
    /// Preset name; takes precedence over `changeType`.
    #[serde(default, alias = "pythonRuleType", skip_serializing_if = "Option::is_none")]
    pub rule_variant: Option<String>,
    /// Mean reversal short window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_window: Option<usize>,
    /// Mean reversal long window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_window: Option<usize>,
    /// Take-profit level as a fraction (`0.02` is 2%).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profit_threshold: Option<f64>,
    /// Stop-loss level as a fraction (`0.02` is 2%).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loss_threshold: Option<f64>,
    /// Preset parameters nested under `params`; they win over the flat fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<RuleParams>,
}

/// Preset parameters of a [`RuleConfig`], as nested under `params`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleParams {
    /// Mean reversal short window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_window: Option<usize>,
    /// Mean reversal long window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_window: Option<usize>,
    /// Take-profit level as a fraction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profit_threshold: Option<f64>,
    /// Stop-loss level as a fraction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loss_threshold: Option<f64>,
}

impl RuleConfig {
    fn param<T>(&self, nested: impl Fn(&RuleParams) -> Option<T>, flat: Option<T>) -> Option<T> {
        self.params.as_ref().and_then(nested).or(flat)
    }
}

impl TryFrom<&RuleConfig> for Rule {
    type Error = Error;

    fn try_from(config: &RuleConfig) -> Result<Self> {
        let name = config.name.clone();
        let quantity = config.quantity;
        let percent = config.change_percent.unwrap_or(DEFAULT_CHANGE_PERCENT);
        let profit_threshold = config.param(|p| p.profit_threshold, config.profit_threshold);
        let loss_threshold = config.param(|p| p.loss_threshold, config.loss_threshold);
        let profit = || Some(profit_threshold.unwrap_or(DEFAULT_THRESHOLD) * 100.0);
        let loss = || Some(loss_threshold.unwrap_or(DEFAULT_THRESHOLD) * 100.0);

        let Some(variant) = config.rule_variant.as_deref() else {
            let change_type = config.change_type.ok_or_else(|| Error::InvalidRule {
                name: name.clone(),
                reason: "either changeType or ruleVariant is required".to_string(),
            })?;
            let (metric, direction) = change_type.split();
            return Ok(Rule::Threshold(ThresholdRule {
                name,
                side: config.decision,
                metric,
                direction,
                percent,
                quantity,
            }));
        };

        let variant = variant.parse::<RuleVariant>()?;
        if variant.side() != config.decision {
            return Err(Error::InvalidRule {
                name,
                reason: format!("{variant:?} cannot be a {} rule", config.decision),
            });
        }

        let exit = |kind, profit_percent, loss_percent| {
            Rule::ThresholdExit(ThresholdExitRule {
                name: name.clone(),
                kind,
                profit_percent,
                loss_percent,
                quantity,
            })
        };
        let rule = match variant {
            RuleVariant::MeanReversal => Rule::IndicatorCross(IndicatorCrossRule {
                name: name.clone(),
                short_window: config
                    .param(|p| p.short_window, config.short_window)
                    .unwrap_or(DEFAULT_SHORT_WINDOW),
                long_window: config
                    .param(|p| p.long_window, config.long_window)
                    .unwrap_or(DEFAULT_LONG_WINDOW),
                quantity,
            }),
            RuleVariant::PriceDip | RuleVariant::PriceMomentum => {
                let direction = match variant {
                    RuleVariant::PriceDip => Direction::Decrease,
                    _ => Direction::Increase,
                };
                Rule::Threshold(ThresholdRule {
                    name: name.clone(),
                    side: Side::Buy,
                    metric: Metric::Price,
                    direction,
                    percent,
                    quantity,
                })
            }
            RuleVariant::EarlyProfitTaker => exit(ExitKind::Profit, profit(), None),
            RuleVariant::EarlyLossTaker => exit(ExitKind::Loss, None, loss()),
            RuleVariant::LossProfitTaker => exit(ExitKind::Both, profit(), loss()),
        };
        Ok(rule)
    }
}

/// A configuration as sent on the wire.
///
/// ### Example
/// ```rust
/// use rules_bt::prelude::*;
///
/// let json = r#"{
///     "stocks": ["XYZ"],
///     "startDate": "2024-01-01",
///     "endDate": "2024-03-31",
///     "initialCapital": 10000,
///     "rules": [
///         { "name": "Dip", "decision": "BUY", "quantity": 10,
///           "changeType": "price_decrease", "changePercent": 3 },
///         { "name": "Exit", "decision": "SELL", "quantity": 10,
///           "ruleVariant": "loss_profit_taker" }
///     ]
/// }"#;
/// let request: BacktestRequest = serde_json::from_str(json).unwrap();
/// let config = BacktestConfig::try_from(request).unwrap();
/// assert_eq!(config.rules.len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestRequest {
    /// Instruments, in processing order.
    #[serde(alias = "stocks")]
    pub instruments: Vec<String>,
    /// First calendar day (inclusive).
    pub start_date: NaiveDate,
    /// Last calendar day (inclusive).
    pub end_date: NaiveDate,
    /// Starting cash.
    pub initial_capital: f64,
    /// Bar interval; defaults to the finest rule timeframe, else daily.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub granularity: Option<String>,
    /// Approximate number of equity samples.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_points: Option<usize>,
    /// One equity sample every this many timeline steps; wins over `samplePoints`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_every: Option<usize>,
    /// Rules, in evaluation order.
    pub rules: Vec<RuleConfig>,
}

impl BacktestRequest {
    /// Reads a request from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        read_json(path.as_ref())
    }

    /// Returns the requested granularity, or the finest timeframe among enabled rules, or daily.
    pub fn granularity(&self) -> Result<Granularity> {
        if let Some(granularity) = &self.granularity {
            return granularity.parse();
        }
        let mut finest = None;
        for rule in self.rules.iter().filter(|r| r.enabled) {
            if let Some(timeframe) = &rule.timeframe {
                let granularity = timeframe.parse::<Granularity>()?;
                finest = Some(finest.map_or(granularity, |f: Granularity| f.min(granularity)));
            }
        }
        Ok(finest.unwrap_or_default())
    }
}

impl TryFrom<BacktestRequest> for BacktestConfig {
    type Error = Error;

    fn try_from(request: BacktestRequest) -> Result<Self> {
        let granularity = request.granularity()?;
        let sampling = match (request.sample_every, request.sample_points) {
            (Some(n), _) => SamplingPolicy::EveryBars(n),
            (None, Some(points)) => SamplingPolicy::EvenlyIndexed { points },
            (None, None) => SamplingPolicy::default(),
        };

        let mut rules = RuleSet::default();
        for config in &request.rules {
            rules.push_with(Rule::try_from(config)?, config.enabled)?;
        }

        let config = BacktestConfig::new(
            request.instruments,
            request.start_date,
            request.end_date,
            request.initial_capital,
            rules,
        )
        .granularity(granularity)
        .sampling(sampling);
        config.validate()?;
        Ok(config)
    }
}

/// A trade as sent on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeReport {
    /// Sequence number within the run.
    pub id: u64,
    /// `YYYY-MM-DDTHH:MM:SS`, UTC.
    pub timestamp: String,
    /// Traded instrument.
    pub instrument: String,
    /// `BUY` or `SELL`.
    pub side: Side,
    /// Fill price, rounded to cents.
    pub price: f64,
    /// Filled quantity.
    pub quantity: u64,
    /// Name of the rule that fired.
    pub rule_name: String,
    /// Realized P&L of sells, rounded to cents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pnl: Option<f64>,
}

impl From<&Trade> for TradeReport {
    fn from(trade: &Trade) -> Self {
        Self {
            id: trade.id,
            timestamp: trade.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            instrument: trade.instrument.clone(),
            side: trade.side,
            price: round2(trade.price),
            quantity: trade.quantity,
            rule_name: trade.rule_name.clone(),
            pnl: trade.pnl.map(round2),
        }
    }
}

/// A result as sent on the wire. `portfolioValue` and `timestamps` are parallel arrays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestReport {
    /// Number of trades, BUY and SELL.
    pub total_trades: usize,
    /// Closed trades with a positive P&L.
    pub winning_trades: usize,
    /// Closed trades with a negative P&L.
    pub losing_trades: usize,
    /// Sum of the realized P&L.
    #[serde(rename = "totalPnL")]
    pub total_pnl: f64,
    /// Return on the initial capital, in percent.
    pub percent_return: f64,
    /// Max drawdown of the sampled equity, in percent.
    pub max_drawdown: f64,
    /// Trade log.
    pub trades: Vec<TradeReport>,
    /// Sampled equity.
    pub portfolio_value: Vec<f64>,
    /// Sample instants.
    pub timestamps: Vec<String>,
}

impl From<&BacktestResult> for BacktestReport {
    fn from(result: &BacktestResult) -> Self {
        let metrics = Metrics::from(result);
        Self {
            total_trades: metrics.total_trades(),
            winning_trades: metrics.winning_trades(),
            losing_trades: metrics.losing_trades(),
            total_pnl: round2(metrics.total_pnl()),
            percent_return: round2(metrics.percent_return()),
            max_drawdown: round2(metrics.max_drawdown()),
            trades: result.trades().iter().map(TradeReport::from).collect(),
            portfolio_value: result.snapshots().iter().map(|s| round2(s.equity)).collect(),
            timestamps: result
                .snapshots()
                .iter()
                .map(|s| s.timestamp.format(TIMESTAMP_FORMAT).to_string())
                .collect(),
        }
    }
}

impl BacktestReport {
    /// Serializes the report as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rule(value: serde_json::Value) -> RuleConfig {
        serde_json::from_value(value).unwrap()
    }

    fn request(rules: serde_json::Value) -> BacktestRequest {
        serde_json::from_value(json!({
            "instruments": ["XYZ"],
            "startDate": "2024-01-01",
            "endDate": "2024-01-31",
            "initialCapital": 100000,
            "rules": rules,
        }))
        .unwrap()
    }

    #[test]
    fn threshold_rule_from_wire() {
        let config = rule(json!({
            "name": "Dip", "decision": "BUY", "quantity": 10,
            "changeType": "price_decrease", "changePercent": 3
        }));
        assert!(config.enabled);
        let Rule::Threshold(rule) = Rule::try_from(&config).unwrap() else {
            panic!("expected a threshold rule");
        };
        assert_eq!(rule.side, Side::Buy);
        assert_eq!(rule.metric, Metric::Price);
        assert_eq!(rule.direction, Direction::Decrease);
        assert_eq!(rule.percent, 3.0);

        let config = rule_without_percent();
        let Rule::Threshold(rule) = Rule::try_from(&config).unwrap() else {
            panic!("expected a threshold rule");
        };
        assert_eq!(rule.percent, 2.0);
        assert_eq!(rule.metric, Metric::Volume);
    }

    fn rule_without_percent() -> RuleConfig {
        rule(json!({
            "name": "Spike", "decision": "BUY", "quantity": 1, "changeType": "volume_increase"
        }))
    }

    #[test]
    fn variants_from_wire() {
        let mean = rule(json!({
            "name": "MR", "decision": "BUY", "quantity": 5, "ruleVariant": "mean_reversal", "longWindow": 30
        }));
        assert_eq!(
            Rule::try_from(&mean).unwrap(),
            Rule::IndicatorCross(IndicatorCrossRule {
                name: "MR".into(),
                short_window: 5,
                long_window: 30,
                quantity: 5,
            })
        );

        let both = rule(json!({
            "name": "LPT", "decision": "SELL", "quantity": 5,
            "pythonRuleType": "loss_profit_taker", "profitThreshold": 0.05
        }));
        let Rule::ThresholdExit(exit) = Rule::try_from(&both).unwrap() else {
            panic!("expected an exit rule");
        };
        assert_eq!(exit.kind, ExitKind::Both);
        assert_eq!(exit.profit_percent, Some(5.0));
        assert_eq!(exit.loss_percent, Some(2.0));

        let loss = rule(json!({
            "name": "ELT", "decision": "SELL", "quantity": 5, "ruleVariant": "early_loss_taker"
        }));
        let Rule::ThresholdExit(exit) = Rule::try_from(&loss).unwrap() else {
            panic!("expected an exit rule");
        };
        assert_eq!(exit.kind, ExitKind::Loss);
        assert_eq!(exit.profit_percent, None);
    }

    #[test]
    fn nested_params_from_wire() {
        let mean = rule(json!({
            "id": "r1", "name": "MR", "ruleType": "python", "timeframe": "1D", "decision": "BUY",
            "quantity": 5, "enabled": true, "pythonRuleType": "mean_reversal",
            "params": { "shortWindow": 3, "longWindow": 50 }
        }));
        let Rule::IndicatorCross(cross) = Rule::try_from(&mean).unwrap() else {
            panic!("expected an indicator rule");
        };
        assert_eq!((cross.short_window, cross.long_window), (3, 50));

        let profit = rule(json!({
            "name": "EPT", "decision": "SELL", "quantity": 5, "pythonRuleType": "early_profit_taker",
            "profitThreshold": 0.05, "params": { "profitThreshold": 0.10 }
        }));
        let Rule::ThresholdExit(exit) = Rule::try_from(&profit).unwrap() else {
            panic!("expected an exit rule");
        };
        assert!((exit.profit_percent.unwrap() - 10.0).abs() < 1e-9);

        // missing nested values fall back to the flat ones, then to the defaults
        let both = rule(json!({
            "name": "LPT", "decision": "SELL", "quantity": 5, "pythonRuleType": "loss_profit_taker",
            "lossThreshold": 0.04, "params": { "profitThreshold": 0.03 }
        }));
        let Rule::ThresholdExit(exit) = Rule::try_from(&both).unwrap() else {
            panic!("expected an exit rule");
        };
        assert!((exit.profit_percent.unwrap() - 3.0).abs() < 1e-9);
        assert!((exit.loss_percent.unwrap() - 4.0).abs() < 1e-9);

        let mean = rule(json!({
            "name": "MR", "decision": "BUY", "quantity": 5, "pythonRuleType": "mean_reversal", "params": {}
        }));
        let Rule::IndicatorCross(cross) = Rule::try_from(&mean).unwrap() else {
            panic!("expected an indicator rule");
        };
        assert_eq!((cross.short_window, cross.long_window), (5, 20));
    }

    #[test]
    fn variant_errors() {
        let mismatched = rule(json!({
            "name": "EPT", "decision": "BUY", "quantity": 5, "ruleVariant": "early_profit_taker"
        }));
        assert!(matches!(Rule::try_from(&mismatched), Err(Error::InvalidRule { .. })));

        let unknown = rule(json!({
            "name": "X", "decision": "BUY", "quantity": 5, "ruleVariant": "golden_cross"
        }));
        assert!(matches!(Rule::try_from(&unknown), Err(Error::UnknownRuleVariant(v)) if v == "golden_cross"));

        let bare = rule(json!({ "name": "X", "decision": "BUY", "quantity": 5 }));
        assert!(matches!(Rule::try_from(&bare), Err(Error::InvalidRule { .. })));
    }

    #[test]
    fn request_to_config() {
        let mut request = request(json!([
            { "name": "Dip", "decision": "BUY", "quantity": 10, "changeType": "price_decrease",
              "changePercent": 3, "timeframe": "1D" },
            { "name": "TP", "decision": "SELL", "quantity": 10, "changeType": "price_increase",
              "timeframe": "1H" },
            { "name": "Off", "decision": "SELL", "quantity": 10, "changeType": "price_increase",
              "timeframe": "1Min", "enabled": false }
        ]));
        assert_eq!(request.granularity().unwrap(), Granularity::H1);

        request.sample_every = Some(3);
        let config = BacktestConfig::try_from(request.clone()).unwrap();
        assert_eq!(config.granularity, Granularity::H1);
        assert_eq!(config.sampling, SamplingPolicy::EveryBars(3));
        assert_eq!(config.rules.len(), 3);
        assert!(!config.rules.entries().nth(2).unwrap().enabled());

        request.granularity = Some("15Min".into());
        assert_eq!(request.granularity().unwrap(), Granularity::M15);
    }

    #[test]
    fn request_validation() {
        let request = request(json!([
            { "name": "Dip", "decision": "BUY", "quantity": 10, "changeType": "price_decrease",
              "enabled": false }
        ]));
        assert!(matches!(BacktestConfig::try_from(request), Err(Error::NoRulesEnabled)));

        let json = json!({
            "stocks": [],
            "startDate": "2024-01-01",
            "endDate": "2024-01-31",
            "initialCapital": 1000,
            "rules": [{ "name": "Dip", "decision": "BUY", "quantity": 1, "changeType": "price_decrease" }]
        });
        let request: BacktestRequest = serde_json::from_value(json).unwrap();
        assert!(matches!(BacktestConfig::try_from(request), Err(Error::NoInstruments)));
    }

    #[test]
    fn report_rounding_and_keys() {
        use chrono::{DateTime, Duration};

        let t0 = DateTime::from_timestamp(1_704_067_200, 0).unwrap(); // 2024-01-01T00:00:00Z
        let provider = InMemoryProvider::new().with_series(
            "XYZ",
            [100.0, 97.0, 101.0]
                .iter()
                .enumerate()
                .map(|(i, p)| PriceBar::from((t0 + Duration::days(i as i64), *p, 0)))
                .collect(),
        );
        let request = request(json!([
            { "name": "Dip", "decision": "BUY", "quantity": 3, "changeType": "price_decrease",
              "changePercent": 3 },
            { "name": "TP", "decision": "SELL", "quantity": 3, "changeType": "price_increase" }
        ]));
        let config = BacktestConfig::try_from(request).unwrap();
        let result = Backtest::new(config).unwrap().run(&provider).unwrap();
        let report = BacktestReport::from(&result);

        assert_eq!(report.total_trades, 2);
        assert_eq!(report.total_pnl, 12.0);
        assert_eq!(report.percent_return, 0.01);
        assert_eq!(report.portfolio_value.len(), report.timestamps.len());
        assert_eq!(report.timestamps[0], "2024-01-01T00:00:00");

        let value = serde_json::to_value(&report).unwrap();
        assert!(value.get("totalPnL").is_some());
        assert!(value.get("portfolioValue").is_some());
        assert_eq!(value["trades"][0]["side"], "BUY");
        assert_eq!(value["trades"][0]["ruleName"], "Dip");
        assert!(value["trades"][0].get("pnl").is_none());
        assert_eq!(value["trades"][1]["pnl"], 12.0);
    }
}
