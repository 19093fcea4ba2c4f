use chrono::NaiveDate;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// No instrument was selected. A backtest needs at least one.
    #[error("No instruments selected")]
    NoInstruments,

    /// The same instrument was configured twice.
    #[error("Instrument configured more than once: {0}")]
    DuplicateInstrument(String),

    /// Every rule is disabled (or none were configured).
    #[error("No rules enabled")]
    NoRulesEnabled,

    /// No enabled BUY rule, so the run can never open a position.
    #[error("No enabled BUY rule: the backtest would produce zero trades")]
    NoEntryRule,

    /// A rule has inconsistent or out-of-range parameters.
    #[error("Invalid rule '{name}': {reason}")]
    InvalidRule {
        /// Rule name.
        name: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The initial capital is not positive.
    #[error("Initial capital must be positive (got: {0})")]
    NegZeroBalance(f64),

    /// The end date precedes the start date.
    #[error("Invalid date range: {0} is after {1}")]
    InvalidDateRange(NaiveDate, NaiveDate),

    /// A bar carries an invalid price.
    #[error("Invalid bar for {instrument}: {reason}")]
    InvalidBar {
        /// Instrument of the series.
        instrument: String,
        /// What is wrong with the bar.
        reason: String,
    },

    /// A series is not strictly increasing in time.
    #[error("Series for {instrument} is not strictly increasing in time")]
    UnorderedSeries {
        /// Instrument of the series.
        instrument: String,
    },

    /// The ledger does not have enough cash for the entry.
    #[error("Insufficient funds: required {0}, available {1}")]
    InsufficientFunds(f64, f64),

    /// The rule variant string is not recognised.
    #[error("Unknown rule variant: {0}")]
    UnknownRuleVariant(String),

    /// The granularity string is not recognised.
    #[error("Unknown granularity: {0}")]
    UnknownGranularity(String),

    /// An unreachable context was encountered. This is likely a bug.
    #[error("Unreachable context (internal error): {0}")]
    Unreachable(String),

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error occurred.
    #[cfg(feature = "serde")]
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Chart rendering failed.
    #[cfg(feature = "draws")]
    #[error("Plotters error: {0}")]
    Plotters(String),

    /// Free-form error.
    #[error("{0}")]
    Msg(String),
}
