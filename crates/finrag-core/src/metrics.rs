//! Portfolio performance metrics over periodic return series.
//!
//! Returns are simple per-period returns (`0.01` = 1%). Standard
//! deviations are sample deviations (n − 1 denominator).

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum MetricsError {
    #[error("return series is empty")]
    Empty,
    #[error("need at least {needed} observations, got {got}")]
    TooFewObservations { needed: usize, got: usize },
    #[error("series lengths differ: portfolio has {portfolio}, benchmark has {benchmark}")]
    LengthMismatch { portfolio: usize, benchmark: usize },
    #[error("standard deviation of excess returns is zero")]
    ZeroVolatility,
}

pub type MetricsResult<T> = Result<T, MetricsError>;

/// Upside and downside capture relative to a benchmark.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CaptureRatios {
    /// `None` when the benchmark never rose.
    pub up_capture: Option<f64>,
    /// `None` when the benchmark never fell.
    pub down_capture: Option<f64>,
}

fn mean(xs: &[f64]) -> f64 {
    xs.iter().sum::<f64>() / xs.len() as f64
}

fn sample_std(xs: &[f64]) -> f64 {
    let m = mean(xs);
    let var = xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (xs.len() - 1) as f64;
    var.sqrt()
}

fn check_pair(portfolio: &[f64], benchmark: &[f64]) -> MetricsResult<()> {
    if portfolio.len() != benchmark.len() {
        return Err(MetricsError::LengthMismatch {
            portfolio: portfolio.len(),
            benchmark: benchmark.len(),
        });
    }
    if portfolio.is_empty() {
        return Err(MetricsError::Empty);
    }
    Ok(())
}

/// Mean excess return over its sample standard deviation.
pub fn sharpe_ratio(returns: &[f64], risk_free: f64) -> MetricsResult<f64> {
    if returns.len() < 2 {
        return Err(MetricsError::TooFewObservations {
            needed: 2,
            got: returns.len(),
        });
    }
    let excess: Vec<f64> = returns.iter().map(|r| r - risk_free).collect();
    let sd = sample_std(&excess);
    if sd == 0.0 {
        return Err(MetricsError::ZeroVolatility);
    }
    Ok(mean(&excess) / sd)
}

/// Fraction of periods in which the portfolio beat the benchmark.
pub fn batting_average(portfolio: &[f64], benchmark: &[f64]) -> MetricsResult<f64> {
    check_pair(portfolio, benchmark)?;
    let wins = portfolio
        .iter()
        .zip(benchmark)
        .filter(|(p, b)| p > b)
        .count();
    Ok(wins as f64 / portfolio.len() as f64)
}

pub fn capture_ratios(portfolio: &[f64], benchmark: &[f64]) -> MetricsResult<CaptureRatios> {
    check_pair(portfolio, benchmark)?;

    let ratio = |keep: fn(f64) -> bool| {
        let (p, b) = portfolio
            .iter()
            .zip(benchmark)
            .filter(|(_, b)| keep(**b))
            .fold((0.0, 0.0), |(sp, sb), (p, b)| (sp + p, sb + b));
        (b != 0.0).then(|| p / b)
    };

    Ok(CaptureRatios {
        up_capture: ratio(|b| b > 0.0),
        down_capture: ratio(|b| b < 0.0),
    })
}

/// Sample standard deviation of active returns.
pub fn tracking_error(portfolio: &[f64], benchmark: &[f64]) -> MetricsResult<f64> {
    check_pair(portfolio, benchmark)?;
    if portfolio.len() < 2 {
        return Err(MetricsError::TooFewObservations {
            needed: 2,
            got: portfolio.len(),
        });
    }
    let active: Vec<f64> = portfolio.iter().zip(benchmark).map(|(p, b)| p - b).collect();
    Ok(sample_std(&active))
}

/// Largest peak-to-trough decline of cumulative wealth, as a negative
/// fraction (`0.0` when wealth never falls).
pub fn max_drawdown(returns: &[f64]) -> MetricsResult<f64> {
    if returns.is_empty() {
        return Err(MetricsError::Empty);
    }
    let mut wealth = 1.0;
    let mut peak = f64::NEG_INFINITY;
    let mut worst = 0.0f64;
    for r in returns {
        wealth *= 1.0 + r;
        peak = peak.max(wealth);
        worst = worst.min((wealth - peak) / peak);
    }
    Ok(worst)
}
