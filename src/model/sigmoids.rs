//! Sigmoid link functions mapping the core output onto `[0, 1]`.

use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use crate::error::PsiError;
use crate::stats::{inv_phi, normal_pdf, phi};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sigmoid {
    /// `1 / (1 + exp(-x))`
    Logistic,
    /// Standard normal CDF.
    Gauss,
    /// `atan(x) / pi + 1/2`
    Cauchy,
    /// `1 - exp(-x)` for `x > 0`, else 0.
    Exponential,
    /// Left-skewed Gumbel, `1 - exp(-exp(x))`.
    GumbelL,
    /// Right-skewed Gumbel, `exp(-exp(-x))`.
    GumbelR,
}

impl Sigmoid {
    pub fn f(&self, x: f64) -> f64 {
        match self {
            Sigmoid::Logistic => 1.0 / (1.0 + (-x).exp()),
            Sigmoid::Gauss => phi(x),
            Sigmoid::Cauchy => x.atan() / PI + 0.5,
            Sigmoid::Exponential => {
                if x > 0.0 {
                    1.0 - (-x).exp()
                } else {
                    0.0
                }
            }
            Sigmoid::GumbelL => 1.0 - (-x.exp()).exp(),
            Sigmoid::GumbelR => (-(-x).exp()).exp(),
        }
    }

    /// Derivative of [`Sigmoid::f`].
    pub fn df(&self, x: f64) -> f64 {
        match self {
            Sigmoid::Logistic => {
                let f = self.f(x);
                f * (1.0 - f)
            }
            Sigmoid::Gauss => normal_pdf(x),
            Sigmoid::Cauchy => 1.0 / (PI * (1.0 + x * x)),
            Sigmoid::Exponential => {
                if x > 0.0 {
                    (-x).exp()
                } else {
                    0.0
                }
            }
            Sigmoid::GumbelL => (x - x.exp()).exp(),
            Sigmoid::GumbelR => (-x - (-x).exp()).exp(),
        }
    }

    /// Inverse of [`Sigmoid::f`] on `(0, 1)`.
    pub fn inv(&self, p: f64) -> f64 {
        match self {
            Sigmoid::Logistic => (p / (1.0 - p)).ln(),
            Sigmoid::Gauss => inv_phi(p),
            Sigmoid::Cauchy => (PI * (p - 0.5)).tan(),
            Sigmoid::Exponential => -(1.0 - p).ln(),
            Sigmoid::GumbelL => (-(1.0 - p).ln()).ln(),
            Sigmoid::GumbelR => -(-p.ln()).ln(),
        }
    }
}

impl fmt::Display for Sigmoid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Sigmoid::Logistic => "logistic",
            Sigmoid::Gauss => "gauss",
            Sigmoid::Cauchy => "cauchy",
            Sigmoid::Exponential => "exp",
            Sigmoid::GumbelL => "gumbel_l",
            Sigmoid::GumbelR => "gumbel_r",
        };
        f.write_str(name)
    }
}

impl FromStr for Sigmoid {
    type Err = PsiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "logistic" => Ok(Sigmoid::Logistic),
            "gauss" => Ok(Sigmoid::Gauss),
            "cauchy" => Ok(Sigmoid::Cauchy),
            "exp" | "exponential" => Ok(Sigmoid::Exponential),
            "gumbel_l" | "lgumbel" => Ok(Sigmoid::GumbelL),
            "gumbel_r" | "rgumbel" => Ok(Sigmoid::GumbelR),
            _ => Err(PsiError::UnknownSigmoid(s.to_string())),
        }
    }
}
