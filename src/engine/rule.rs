use std::collections::BTreeSet;
use std::fmt;

use crate::{
    PercentCalculus,
    engine::{IndicatorCache, Position, PriceBar},
    errors::{Error, Result},
};

// percent thresholds tolerate float rounding of the computed change
const TOLERANCE: f64 = 1e-9;

/// Represents the side of a rule or trade (buy or sell).
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "UPPERCASE"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Opens a position.
    Buy,
    /// Closes a position.
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// The quantity a threshold rule watches.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    /// Bar price.
    Price,
    /// Bar volume.
    Volume,
}

/// The direction a threshold rule waits for.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Change of at least `+percent`.
    Increase,
    /// Change of at most `-percent`.
    Decrease,
}

impl Direction {
    fn crossed(&self, change: f64, percent: f64) -> bool {
        match self {
            Direction::Increase => change >= percent - TOLERANCE,
            Direction::Decrease => change <= -percent + TOLERANCE,
        }
    }
}

/// Which thresholds a [`ThresholdExitRule`] watches.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    /// Take profit only.
    Profit,
    /// Stop loss only.
    Loss,
    /// Whichever comes first.
    Both,
}

/// Percent-change trigger.
///
/// A BUY rule compares the current bar against the previous one. A SELL rule compares the current
/// price against the entry price of the open position (volume has no entry value, so a SELL rule
/// on volume keeps comparing bar over bar). A SELL closes the whole position whatever `quantity`
/// says.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdRule {
    /// Display name, recorded on trades.
    pub name: String,
    /// Entry or exit.
    pub side: Side,
    /// Watched quantity.
    pub metric: Metric,
    /// Awaited direction.
    pub direction: Direction,
    /// Minimum absolute change, in percent.
    pub percent: f64,
    /// Quantity bought on entry.
    pub quantity: u64,
}

/// Mean-reversion entry: fires while the short moving average is below the long one.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorCrossRule {
    /// Display name, recorded on trades.
    pub name: String,
    /// Short window length (at least 2).
    pub short_window: usize,
    /// Long window length (greater than `short_window`).
    pub long_window: usize,
    /// Quantity bought on entry.
    pub quantity: u64,
}

/// Position P&L exit against a profit target and/or a loss limit, both in percent.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdExitRule {
    /// Display name, recorded on trades.
    pub name: String,
    /// Thresholds in use.
    pub kind: ExitKind,
    /// Take-profit level, required by `Profit` and `Both`.
    pub profit_percent: Option<f64>,
    /// Stop-loss level, required by `Loss` and `Both`.
    pub loss_percent: Option<f64>,
    /// Unused on exit: the whole position is sold.
    pub quantity: u64,
}

/// A trading rule.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    /// See [`ThresholdRule`].
    Threshold(ThresholdRule),
    /// See [`IndicatorCrossRule`].
    IndicatorCross(IndicatorCrossRule),
    /// See [`ThresholdExitRule`].
    ThresholdExit(ThresholdExitRule),
}

/// What a rule can see when it is evaluated on one bar of one instrument.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    /// Instrument being evaluated.
    pub instrument: &'a str,
    /// Index of `current` in the instrument's series.
    pub index: usize,
    /// Previous bar of the instrument, if any.
    pub previous: Option<&'a PriceBar>,
    /// Current bar.
    pub current: &'a PriceBar,
    /// Open position of the instrument, if any.
    pub position: Option<&'a Position>,
    /// Rolling statistics.
    pub indicators: &'a IndicatorCache,
}

impl EvalContext<'_> {
    fn held(&self, name: &str) -> Result<&Position> {
        self.position
            .ok_or_else(|| Error::Unreachable(format!("exit rule '{name}' evaluated on flat {}", self.instrument)))
    }

    fn bar_change(&self, metric: Metric) -> Option<f64> {
        let previous = self.previous?;
        let (before, now) = match metric {
            Metric::Price => (previous.price(), self.current.price()),
            Metric::Volume => (previous.volume() as f64, self.current.volume() as f64),
        };
        (before > 0.0).then(|| before.change(now))
    }
}

impl Rule {
    /// Returns the rule name.
    pub fn name(&self) -> &str {
        match self {
            Rule::Threshold(rule) => &rule.name,
            Rule::IndicatorCross(rule) => &rule.name,
            Rule::ThresholdExit(rule) => &rule.name,
        }
    }

    /// Returns whether the rule opens or closes positions.
    pub fn side(&self) -> Side {
        match self {
            Rule::Threshold(rule) => rule.side,
            Rule::IndicatorCross(_) => Side::Buy,
            Rule::ThresholdExit(_) => Side::Sell,
        }
    }

    /// Returns the configured quantity.
    pub fn quantity(&self) -> u64 {
        match self {
            Rule::Threshold(rule) => rule.quantity,
            Rule::IndicatorCross(rule) => rule.quantity,
            Rule::ThresholdExit(rule) => rule.quantity,
        }
    }

    /// Checks the rule parameters.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| Error::InvalidRule {
            name: self.name().to_string(),
            reason: reason.to_string(),
        };
        let positive = |value: f64| value > 0.0 && value.is_finite();

        if self.quantity() == 0 {
            return Err(invalid("quantity must be positive"));
        }
        match self {
            Rule::Threshold(rule) => {
                if !positive(rule.percent) {
                    return Err(invalid("percent must be positive"));
                }
            }
            Rule::IndicatorCross(rule) => {
                if rule.short_window < 2 {
                    return Err(invalid("short window must be at least 2"));
                }
                if rule.long_window <= rule.short_window {
                    return Err(invalid("long window must be greater than the short window"));
                }
            }
            Rule::ThresholdExit(rule) => {
                let needs_profit = matches!(rule.kind, ExitKind::Profit | ExitKind::Both);
                let needs_loss = matches!(rule.kind, ExitKind::Loss | ExitKind::Both);
                if needs_profit && !rule.profit_percent.is_some_and(positive) {
                    return Err(invalid("profit threshold must be positive"));
                }
                if needs_loss && !rule.loss_percent.is_some_and(positive) {
                    return Err(invalid("loss threshold must be positive"));
                }
            }
        }
        Ok(())
    }

    /// Decides whether the rule fires on the current bar. Rules never mutate state.
    ///
    /// Evaluating a SELL-side rule without an open position is an internal error.
    pub fn fires(&self, ctx: &EvalContext<'_>) -> Result<bool> {
        match self {
            Rule::Threshold(rule) => match (rule.side, rule.metric) {
                (Side::Buy, metric) | (Side::Sell, metric @ Metric::Volume) => {
                    if rule.side == Side::Sell {
                        ctx.held(&rule.name)?;
                    }
                    Ok(ctx
                        .bar_change(metric)
                        .is_some_and(|change| rule.direction.crossed(change, rule.percent)))
                }
                (Side::Sell, Metric::Price) => {
                    let change = ctx.held(&rule.name)?.pnl_percent(ctx.current.price());
                    Ok(rule.direction.crossed(change, rule.percent))
                }
            },
            Rule::IndicatorCross(rule) => {
                let short = ctx.indicators.average(ctx.instrument, rule.short_window, ctx.index);
                let long = ctx.indicators.average(ctx.instrument, rule.long_window, ctx.index);
                Ok(matches!((short, long), (Some(short), Some(long)) if short < long))
            }
            Rule::ThresholdExit(rule) => {
                let change = ctx.held(&rule.name)?.pnl_percent(ctx.current.price());
                let take_profit = match rule.kind {
                    ExitKind::Profit | ExitKind::Both => {
                        rule.profit_percent.is_some_and(|p| Direction::Increase.crossed(change, p))
                    }
                    ExitKind::Loss => false,
                };
                let stop_loss = match rule.kind {
                    ExitKind::Loss | ExitKind::Both => {
                        rule.loss_percent.is_some_and(|p| Direction::Decrease.crossed(change, p))
                    }
                    ExitKind::Profit => false,
                };
                Ok(take_profit || stop_loss)
            }
        }
    }
}

/// A rule and its enabled flag.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct RuleEntry {
    rule: Rule,
    enabled: bool,
}

impl RuleEntry {
    /// Returns the rule.
    pub fn rule(&self) -> &Rule {
        &self.rule
    }

    /// Returns whether the rule takes part in the run.
    pub fn enabled(&self) -> bool {
        self.enabled
    }
}

/// Ordered set of rules. Declaration order is evaluation order: the first enabled rule that fires
/// wins. Rules are immutable once added; only their enabled flag can change.
///
/// Every rule is validated on the way in, deserialization included.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "RuleEntries"))]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleSet {
    entries: Vec<RuleEntry>,
}

#[cfg(feature = "serde")]
#[derive(serde::Deserialize)]
struct RuleEntries {
    entries: Vec<RuleEntry>,
}

#[cfg(feature = "serde")]
impl TryFrom<RuleEntries> for RuleSet {
    type Error = Error;

    fn try_from(raw: RuleEntries) -> Result<Self> {
        let mut rules = RuleSet::default();
        for entry in raw.entries {
            rules.push_with(entry.rule, entry.enabled)?;
        }
        Ok(rules)
    }
}

impl RuleSet {
    /// Adds an enabled rule.
    pub fn push(&mut self, rule: Rule) -> Result<&mut Self> {
        self.push_with(rule, true)
    }

    /// Adds a rule with the given enabled flag.
    pub fn push_with(&mut self, rule: Rule, enabled: bool) -> Result<&mut Self> {
        rule.validate()?;
        self.entries.push(RuleEntry { rule, enabled });
        Ok(self)
    }

    /// Enables or disables the rule at `index`.
    pub fn set_enabled(&mut self, index: usize, enabled: bool) -> Result<()> {
        let entry = self
            .entries
            .get_mut(index)
            .ok_or_else(|| Error::Msg(format!("no rule at index {index}")))?;
        entry.enabled = enabled;
        Ok(())
    }

    /// Returns every rule, enabled or not, in declaration order.
    pub fn entries(&self) -> std::slice::Iter<'_, RuleEntry> {
        self.entries.iter()
    }

    /// Returns the number of rules.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if there is no rule.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the enabled rules of `side`, in declaration order.
    pub fn enabled(&self, side: Side) -> impl Iterator<Item = &Rule> {
        self.entries
            .iter()
            .filter(move |e| e.enabled && e.rule.side() == side)
            .map(|e| &e.rule)
    }

    /// Returns `true` if at least one rule is enabled.
    pub fn any_enabled(&self) -> bool {
        self.entries.iter().any(|e| e.enabled)
    }

    /// Returns every window length used by an enabled indicator rule.
    pub fn windows(&self) -> BTreeSet<usize> {
        self.enabled(Side::Buy)
            .filter_map(|rule| match rule {
                Rule::IndicatorCross(rule) => Some([rule.short_window, rule.long_window]),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Caller-side gate: fails with [`Error::NoEntryRule`] when no enabled BUY rule exists, in
    /// which case a run would produce zero trades.
    pub fn check_pairing(&self) -> Result<()> {
        if self.enabled(Side::Buy).next().is_none() {
            return Err(Error::NoEntryRule);
        }
        Ok(())
    }

    /// Returns the first enabled rule of `side` that fires in `ctx`.
    pub fn first_firing(&self, side: Side, ctx: &EvalContext<'_>) -> Result<Option<&Rule>> {
        for rule in self.enabled(side) {
            if rule.fires(ctx)? {
                return Ok(Some(rule));
            }
        }
        Ok(None)
    }
}
