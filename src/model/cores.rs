//! Core functions `g(x; a, b)` mapping stimulus intensity onto the sigmoid's
//! input scale. Each core uses the first two model parameters.

use std::f64::consts::LN_2;
use std::fmt;

use crate::data::TrialData;
use crate::error::{PsiError, Result};
use crate::model::sigmoids::Sigmoid;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Core {
    /// `(x - a) / b`: location and scale.
    Ab,
    /// Midpoint `m` and width `w`: the sigmoid covers `[alpha, 1 - alpha]`
    /// over an interval of length `w` centred at `m`.
    Mw { alpha: f64, zalpha: f64, zshift: f64 },
    /// `a * x + b`
    Linear,
    /// `a * ln(x) + b`
    Log,
    /// Weibull in log coordinates with threshold `m` and slope `s`:
    /// `2 s m / ln 2 * (ln x - ln m) + ln ln 2`.
    Weibull,
    /// `(x / a)^b`
    Poly,
}

impl Core {
    /// Midpoint-width core whose constants depend on the sigmoid it is paired with.
    pub fn mw(sigmoid: Sigmoid, alpha: f64) -> Result<Self> {
        if !(alpha > 0.0 && alpha < 0.5) {
            return Err(PsiError::UnknownCore(format!("mw{alpha}")));
        }
        Ok(Core::Mw {
            alpha,
            zalpha: sigmoid.inv(1.0 - alpha) - sigmoid.inv(alpha),
            zshift: sigmoid.inv(0.5),
        })
    }

    /// Parses `"ab"`, `"linear"`, `"log"`, `"weibull"`, `"poly"` and
    /// `"mw<alpha>"` (plain `"mw"` means alpha = 0.1).
    pub fn parse(name: &str, sigmoid: Sigmoid) -> Result<Self> {
        let name = name.trim().to_ascii_lowercase();
        match name.as_str() {
            "ab" => Ok(Core::Ab),
            "linear" => Ok(Core::Linear),
            "log" | "logarithmic" => Ok(Core::Log),
            "weibull" => Ok(Core::Weibull),
            "poly" => Ok(Core::Poly),
            "mw" => Core::mw(sigmoid, 0.1),
            other => match other.strip_prefix("mw").map(str::parse::<f64>) {
                Some(Ok(alpha)) => Core::mw(sigmoid, alpha),
                _ => Err(PsiError::UnknownCore(name.clone())),
            },
        }
    }

    pub fn g(&self, x: f64, prm: &[f64]) -> f64 {
        let (a, b) = (prm[0], prm[1]);
        match *self {
            Core::Ab => (x - a) / b,
            Core::Mw { zalpha, zshift, .. } => zalpha / b * (x - a) + zshift,
            Core::Linear => a * x + b,
            Core::Log => a * x.ln() + b,
            Core::Weibull => 2.0 * b * a / LN_2 * (x.ln() - a.ln()) + LN_2.ln(),
            Core::Poly => (x / a).powf(b),
        }
    }

    /// Derivative of [`Core::g`] with respect to `x`.
    pub fn dg(&self, x: f64, prm: &[f64]) -> f64 {
        let (a, b) = (prm[0], prm[1]);
        match *self {
            Core::Ab => 1.0 / b,
            Core::Mw { zalpha, .. } => zalpha / b,
            Core::Linear => a,
            Core::Log => a / x,
            Core::Weibull => 2.0 * b * a / (LN_2 * x),
            Core::Poly => b / a * (x / a).powf(b - 1.0),
        }
    }

    /// Intensity `x` with `g(x) = y`.
    pub fn inv(&self, y: f64, prm: &[f64]) -> f64 {
        let (a, b) = (prm[0], prm[1]);
        match *self {
            Core::Ab => a + y * b,
            Core::Mw { zalpha, zshift, .. } => a + (y - zshift) * b / zalpha,
            Core::Linear => (y - b) / a,
            Core::Log => ((y - b) / a).exp(),
            Core::Weibull => ((y - LN_2.ln()) * LN_2 / (2.0 * b * a) + a.ln()).exp(),
            Core::Poly => a * y.powf(1.0 / b),
        }
    }

    /// Plausible range of parameter `index` (0 or 1) given the data's
    /// intensities. Used for starting values and posterior grids.
    pub fn parameter_range(&self, data: &TrialData, index: usize) -> (f64, f64) {
        let (lo, hi) = data.intensity_range();
        let span = if hi > lo { hi - lo } else { 1.0 };
        let scale = 10.0 / span;
        match (*self, index) {
            (Core::Ab | Core::Mw { .. }, 0) => (lo, hi),
            (Core::Ab | Core::Mw { .. }, _) => (0.0, span),
            (Core::Linear, 0) => (0.0, scale),
            (Core::Linear, _) => {
                let reach = lo.abs().max(hi.abs()) * scale;
                (-reach, reach)
            }
            (Core::Log, 0) => {
                let log_span = log_span(lo, hi);
                (0.0, 10.0 / log_span)
            }
            (Core::Log, _) => {
                let (llo, lhi) = (positive(lo).ln(), positive(hi).ln());
                let reach = llo.abs().max(lhi.abs()) * 10.0 / log_span(lo, hi);
                (-reach, reach)
            }
            (Core::Weibull | Core::Poly, 0) => (positive(lo), hi.max(positive(lo))),
            (Core::Weibull, _) => (0.0, scale),
            (Core::Poly, _) => (0.0, 5.0),
        }
    }

    /// Domain of parameter `index` (0 or 1). The intercept of the linear and
    /// logarithmic cores is the only second parameter that may be negative.
    pub fn parameter_bounds(&self, index: usize) -> (f64, f64) {
        match (*self, index) {
            (Core::Weibull | Core::Poly, _) => (0.0, f64::INFINITY),
            (Core::Ab | Core::Mw { .. }, 1) => (0.0, f64::INFINITY),
            _ => (f64::NEG_INFINITY, f64::INFINITY),
        }
    }
}

fn positive(x: f64) -> f64 {
    if x > 0.0 {
        x
    } else {
        1e-3
    }
}

fn log_span(lo: f64, hi: f64) -> f64 {
    let span = positive(hi).ln() - positive(lo).ln();
    if span > 0.0 {
        span
    } else {
        1.0
    }
}

impl fmt::Display for Core {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Core::Ab => f.write_str("ab"),
            Core::Mw { alpha, .. } => write!(f, "mw{alpha}"),
            Core::Linear => f.write_str("linear"),
            Core::Log => f.write_str("log"),
            Core::Weibull => f.write_str("weibull"),
            Core::Poly => f.write_str("poly"),
        }
    }
}
