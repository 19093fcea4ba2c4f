//! Module for visualizing backtest results.

use std::path::PathBuf;

use crate::engine::{BacktestResult, PriceBar, Side};
use crate::errors::{Error, Result};

use chrono::{DateTime, Duration, Utc};
use plotters::backend::{BitMapBackend, DrawingBackend, SVGBackend};
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::WHITE;

/// Height over width of a single-panel chart.
const ASPECT_RATIO: f64 = 0.5625;
/// Font size of the time axis labels.
const X_LABEL_SIZE: i32 = 20;
/// Font size of the value axis labels.
const Y_LABEL_SIZE: i32 = 20;

/// Where and in which format a chart is written.
#[derive(Debug, Clone)]
pub enum DrawOutput {
    /// SVG file.
    Svg(PathBuf),
    /// PNG bitmap.
    Png(PathBuf),
}

impl Default for DrawOutput {
    fn default() -> Self {
        Self::Svg(PathBuf::from("backtest.svg"))
    }
}

/// Title and destination of an equity chart.
#[derive(Debug, Clone, Default)]
pub struct DrawOptions {
    /// Chart title.
    title: Option<String>,
    /// Destination file.
    output: DrawOutput,
}

impl DrawOptions {
    /// Sets the chart title.
    pub fn title(mut self, title: impl ToString) -> Self {
        self.title = Some(title.to_string());
        self
    }

    /// Sets the destination file.
    pub fn draw_output(mut self, output: DrawOutput) -> Self {
        self.output = output;
        self
    }
}

/// Renders the outcome of a run.
///
/// Draws the equity curve against the initial capital and, when a series is attached, a price
/// panel of that instrument with its BUY (green) and SELL (red) fills.
pub struct Draw<'d> {
    result: &'d BacktestResult,
    prices: Option<(&'d str, &'d [PriceBar])>,
    options: DrawOptions,
}

fn plotters_err(e: impl ToString) -> Error {
    Error::Plotters(e.to_string())
}

/// Returns a non-empty `[first, last]` time range.
fn time_range(mut times: impl Iterator<Item = DateTime<Utc>>) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let first = times.next().ok_or_else(|| Error::Msg("nothing to draw".to_string()))?;
    let (first, last) = times.fold((first, first), |(lo, hi), t| (lo.min(t), hi.max(t)));
    if last > first {
        Ok((first, last))
    } else {
        Ok((first, first + Duration::days(1)))
    }
}

/// Returns a padded, non-empty value range.
fn value_range(values: impl Iterator<Item = f64> + Clone) -> (f64, f64) {
    let min = values.clone().fold(f64::INFINITY, f64::min);
    let max = values.fold(f64::NEG_INFINITY, f64::max);
    let padding = ((max - min) * 0.1).max(1.0);
    (min - padding, max + padding)
}

impl<'d> Draw<'d> {
    /// Creates a new `Draw` instance for the given result.
    pub fn with_result(result: &'d BacktestResult) -> Self {
        Self {
            result,
            prices: None,
            options: DrawOptions::default(),
        }
    }

    /// Adds a price panel for `instrument`.
    pub fn with_prices(mut self, instrument: &'d str, bars: &'d [PriceBar]) -> Self {
        self.prices = Some((instrument, bars));
        self
    }

    /// Replaces the title and destination.
    pub fn with_options(mut self, options: DrawOptions) -> Self {
        self.options = options;
        self
    }

    /// Renders the chart and writes it to the configured destination.
    pub fn plot(&self) -> Result<()> {
        let samples = self.result.snapshots().len() as u32;
        let height_factor = if self.prices.is_some() { 1.6 } else { 1.0 };
        let width = 1280.max(10 * samples);
        let height = ((width as f64 * ASPECT_RATIO * height_factor) as u32).min(900);

        match &self.options.output {
            DrawOutput::Svg(path) => {
                let root = SVGBackend::new(path, (width, height)).into_drawing_area();
                root.fill(&WHITE).map_err(plotters_err)?;
                self.draw_chart(&root)
            }
            DrawOutput::Png(path) => {
                let root = BitMapBackend::new(path, (width, height)).into_drawing_area();
                root.fill(&WHITE).map_err(plotters_err)?;
                self.draw_chart(&root)
            }
        }
    }

    fn draw_chart<DB: DrawingBackend>(&self, drawing_area: &DrawingArea<DB, Shift>) -> Result<()> {
        let title = self.options.title.as_deref().unwrap_or("Backtest equity");
        match self.prices {
            Some((instrument, bars)) => {
                let equity_height = drawing_area.dim_in_pixel().1 as f64 * 0.55;
                let (equity_area, price_area) = drawing_area.split_vertically(equity_height as u32);
                self.draw_equity_chart(&equity_area, title)?;
                self.draw_price_chart(&price_area, instrument, bars)?;
            }
            None => self.draw_equity_chart(drawing_area, title)?,
        }

        drawing_area.present().map_err(plotters_err)
    }

    /// Draws the sampled equity and the initial capital line.
    fn draw_equity_chart<DB: DrawingBackend>(&self, drawing_area: &DrawingArea<DB, Shift>, title: &str) -> Result<()> {
        let snapshots = self.result.snapshots();
        let (first_time, last_time) = time_range(snapshots.iter().map(|s| s.timestamp))?;
        let initial_capital = self.result.initial_capital();
        let (min_equity, max_equity) =
            value_range(snapshots.iter().map(|s| s.equity).chain(std::iter::once(initial_capital)));

        let drawing_area = drawing_area.margin(10, 10, 70, 70);
        let mut chart = ChartBuilder::on(&drawing_area)
            .caption(title, ("sans-serif", 30).into_font())
            .x_label_area_size(X_LABEL_SIZE)
            .y_label_area_size(Y_LABEL_SIZE)
            .build_cartesian_2d(first_time..last_time, min_equity..max_equity)
            .map_err(plotters_err)?;

        chart
            .configure_mesh()
            .y_desc("Equity")
            .x_label_style(("sans-serif", X_LABEL_SIZE))
            .y_label_style(("sans-serif", Y_LABEL_SIZE))
            .x_labels(8)
            .y_labels(5)
            .draw()
            .map_err(plotters_err)?;

        chart
            .draw_series(LineSeries::new(
                [(first_time, initial_capital), (last_time, initial_capital)],
                BLACK.mix(0.3).stroke_width(1),
            ))
            .map_err(plotters_err)?;

        chart
            .draw_series(LineSeries::new(snapshots.iter().map(|s| (s.timestamp, s.equity)), BLUE))
            .map(|_| ())
            .map_err(plotters_err)
    }

    /// Draws the price line of one instrument with its fills.
    fn draw_price_chart<DB: DrawingBackend>(
        &self,
        drawing_area: &DrawingArea<DB, Shift>,
        instrument: &str,
        bars: &[PriceBar],
    ) -> Result<()> {
        let (first_time, last_time) = time_range(bars.iter().map(PriceBar::timestamp))?;
        let (min_price, max_price) = value_range(bars.iter().map(PriceBar::price));

        let drawing_area = drawing_area.margin(0, 10, 70, 70);
        let mut chart = ChartBuilder::on(&drawing_area)
            .caption(instrument, ("sans-serif", 24).into_font())
            .x_label_area_size(X_LABEL_SIZE)
            .y_label_area_size(Y_LABEL_SIZE)
            .build_cartesian_2d(first_time..last_time, min_price..max_price)
            .map_err(plotters_err)?;

        chart
            .configure_mesh()
            .x_desc("Time")
            .y_desc("Price")
            .x_label_style(("sans-serif", X_LABEL_SIZE))
            .y_label_style(("sans-serif", Y_LABEL_SIZE))
            .x_labels(8)
            .y_labels(5)
            .draw()
            .map_err(plotters_err)?;

        chart
            .draw_series(LineSeries::new(bars.iter().map(|b| (b.timestamp(), b.price())), BLACK))
            .map_err(plotters_err)?;

        let fills = self.result.trades().iter().filter(|t| t.instrument == instrument);
        chart
            .draw_series(fills.map(|trade| {
                let color = match trade.side {
                    Side::Buy => GREEN.filled(),
                    Side::Sell => RED.filled(),
                };
                Circle::new((trade.timestamp, trade.price), 4, color)
            }))
            .map(|_| ())
            .map_err(plotters_err)
    }
}
