//! Bayesian and bootstrap inference for psychometric functions.

pub mod asir;
pub mod bootstrap;
pub mod core;
pub mod data;
pub mod diagnostics;
pub mod distributions;
pub mod error;
pub mod evidence;
pub mod integrate;
pub mod marginals;
pub mod model;
pub mod optimizer;
pub mod stats;

pub use asir::{sample_posterior, Asir, AsirResult, PosteriorSample, PosteriorSampleSet};
pub use bootstrap::{bootstrap, jackknife, map_estimate, Bootstrap, BootstrapReplicateSet, JackknifeSet};
pub use data::{Block, TrialData};
pub use diagnostics::annotate;
pub use distributions::{Family, Prior};
pub use error::{PsiError, Result};
pub use evidence::{model_evidence, outlier_bayes_factors, OutlierEvidence};
pub use marginals::{build_marginals, build_marginals_with_grid_size, IndependentPosterior};
pub use model::{Core, Model, PsychometricFunction, Sigmoid};
pub use optimizer::{Cobyla, Optimizer};
