//! Strategy parameter optimization.
//!
//! This module runs one backtest per parameter combination, in parallel. The `Optimizer` holds
//! the configuration and the series (fetched once, shared read-only by every run), while the
//! `ParameterCombination` trait defines how to generate parameter sets.

use std::marker::PhantomData;

use crate::engine::{Backtest, BacktestConfig, InMemoryProvider, PriceSeriesProvider, RuleSet};
use crate::errors::Result;
use crate::metrics::Metrics;

use rayon::prelude::*;

/// Trait defining how to generate parameter combinations for optimization.
///
/// Implement this trait for your parameter types to define how combinations should be generated.
/// The associated type `Output` represents a single parameter combination (e.g., a tuple of values).
pub trait ParameterCombination: Sync {
    /// Type representing a single parameter combination (e.g., `(usize, f64)`).
    type Output: Clone + Send + Sync;

    /// Generates all possible parameter combinations to test.
    ///
    /// # Returns
    /// A vector containing all parameter combinations.
    fn generate() -> Vec<Self::Output>;
}

/// Runs a backtest per parameter combination.
///
/// Runs share nothing but the series: each one owns its ledger, positions and indicators.
#[derive(Debug, Clone)]
pub struct Optimizer<PC: ParameterCombination> {
    config: BacktestConfig,
    series: InMemoryProvider,
    _marker: PhantomData<PC>,
}

impl<PC: ParameterCombination> Optimizer<PC> {
    /// Creates a new `Optimizer`, fetching the series of every configured instrument once.
    ///
    /// # Arguments
    /// * `config` - Base configuration; its rules are replaced by each combination's.
    /// * `provider` - Source of the price series.
    ///
    /// # Returns
    /// A new `Optimizer` instance, or the provider's error.
    pub fn new<P>(config: BacktestConfig, provider: &P) -> Result<Self>
    where
        P: PriceSeriesProvider + ?Sized,
    {
        let mut series = InMemoryProvider::new();
        for instrument in &config.instruments {
            let bars = provider.series(instrument, config.start, config.end, config.granularity)?;
            series.insert(instrument.clone(), bars);
        }
        Ok(Self {
            config,
            series,
            _marker: PhantomData,
        })
    }

    /// Backtests every parameter combination.
    ///
    /// # Arguments
    /// * `combinator` - Builds the rule set of a parameter combination.
    ///
    /// # Returns
    /// Each parameter combination with the metrics of its run, in generation order.
    ///
    /// # Errors
    /// Returns the first error met while building a rule set or running a backtest.
    pub fn with<C>(&self, combinator: C) -> Result<Vec<(PC::Output, Metrics)>>
    where
        C: Fn(&PC::Output) -> Result<RuleSet> + Sync,
    {
        PC::generate()
            .par_iter()
            .map(|params| {
                let mut config = self.config.clone();
                config.rules = combinator(params)?;
                let result = Backtest::new(config)?.run(&self.series)?;
                Ok((params.clone(), Metrics::from(&result)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prelude::*;
    use chrono::NaiveDate;

    struct Windows;

    impl ParameterCombination for Windows {
        type Output = (usize, usize);

        fn generate() -> Vec<Self::Output> {
            (2..=6)
                .flat_map(|short| (10..=30).step_by(5).map(move |long| (short, long)))
                .collect()
        }
    }

    fn rules(&(short_window, long_window): &(usize, usize)) -> Result<RuleSet> {
        let mut rules = RuleSet::default();
        rules
            .push(Rule::IndicatorCross(IndicatorCrossRule {
                name: format!("MR {short_window}/{long_window}"),
                short_window,
                long_window,
                quantity: 10,
            }))?
            .push(Rule::ThresholdExit(ThresholdExitRule {
                name: "LPT".into(),
                kind: ExitKind::Both,
                profit_percent: Some(2.0),
                loss_percent: Some(2.0),
                quantity: 10,
            }))?;
        Ok(rules)
    }

    fn config() -> BacktestConfig {
        BacktestConfig::new(
            vec!["AAA".into(), "BBB".into()],
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
            10_000.0,
            rules(&(5, 20)).unwrap(),
        )
    }

    #[test]
    fn optimizer_with_mean_reversion_windows() {
        let provider = SyntheticProvider::new(11);
        let optimizer = Optimizer::<Windows>::new(config(), &provider).unwrap();
        let results = optimizer.with(rules).unwrap();

        assert_eq!(results.len(), Windows::generate().len());
        assert_eq!(
            results.iter().map(|(params, _)| *params).collect::<Vec<_>>(),
            Windows::generate()
        );

        // same outcome as a sequential run
        let (params, metrics) = &results[7];
        let mut config = config();
        config.rules = rules(params).unwrap();
        let result = Backtest::new(config).unwrap().run(&provider).unwrap();
        assert_eq!(metrics, &Metrics::from(&result));
    }

    #[test]
    fn optimizer_propagates_rule_errors() {
        let provider = SyntheticProvider::new(11);
        let optimizer = Optimizer::<Windows>::new(config(), &provider).unwrap();
        // long window not above the short one
        let result = optimizer.with(|&(short, _)| rules(&(short, short)));
        assert!(matches!(result, Err(Error::InvalidRule { .. })));
    }
}
