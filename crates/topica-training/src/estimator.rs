//! Newton-Raphson re-estimation of the Dirichlet concentration alpha.
//!
//! The Hessian of the alpha objective is a diagonal matrix plus a constant
//! rank-one term, so each Newton step is computed in linear time without
//! forming or inverting the matrix.

use crate::alpha::{AlphaVector, SufficientStatistics};
use crate::config::{EstimatorKind, NewtonSettings};
use crate::error::TrainingError;
use crate::special::{digamma, trigamma};
use thiserror::Error;
use tracing::{debug, warn};

/// A non-finite or ill-conditioned quantity showed up during the update.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct NumericDomainError(String);

impl From<NumericDomainError> for TrainingError {
    fn from(e: NumericDomainError) -> Self {
        Self::NumericDomain(e.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Every component moved by less than the relative threshold.
    Converged,
    IterationCap,
    /// No step size kept every component positive; the last accepted vector is returned.
    BacktrackingAbandoned,
}

#[derive(Debug, Clone)]
pub struct AlphaUpdate {
    pub alpha: AlphaVector,
    pub iterations: u32,
    pub stop: StopReason,
}

/// Alpha update strategy, selected by [`EstimatorKind`].
#[derive(Debug, Clone, Copy)]
pub enum AlphaEstimator {
    Vector(NewtonSettings),
    Scalar(NewtonSettings),
}

impl AlphaEstimator {
    #[must_use]
    pub fn new(kind: EstimatorKind, settings: NewtonSettings) -> Self {
        match kind {
            EstimatorKind::Vector => Self::Vector(settings),
            EstimatorKind::Scalar => Self::Scalar(settings),
        }
    }

    #[must_use]
    pub fn kind(&self) -> EstimatorKind {
        match self {
            Self::Vector(_) => EstimatorKind::Vector,
            Self::Scalar(_) => EstimatorKind::Scalar,
        }
    }

    /// Re-estimate alpha from `documents` documents and their sufficient statistics.
    pub fn estimate(
        &self,
        alpha: &AlphaVector,
        documents: u64,
        statistics: &SufficientStatistics,
    ) -> Result<AlphaUpdate, NumericDomainError> {
        if alpha.len() != statistics.len() {
            return Err(NumericDomainError(format!(
                "alpha has {} topics but sufficient statistics have {}",
                alpha.len(),
                statistics.len()
            )));
        }
        let documents = documents as f64;
        match self {
            Self::Vector(settings) => update_vector(settings, alpha, documents, statistics.as_slice()),
            Self::Scalar(settings) => update_scalar(settings, alpha, documents, statistics.sum()),
        }
    }

    /// Like [`estimate`](Self::estimate), but falls back to the unchanged input on numeric failure.
    #[must_use]
    pub fn estimate_or_retain(
        &self,
        alpha: &AlphaVector,
        documents: u64,
        statistics: &SufficientStatistics,
    ) -> AlphaVector {
        match self.estimate(alpha, documents, statistics) {
            Ok(update) => update.alpha,
            Err(e) => {
                warn!(error = %e, "alpha update failed, keeping previous alpha");
                alpha.clone()
            }
        }
    }
}

fn update_vector(
    settings: &NewtonSettings,
    alpha: &AlphaVector,
    documents: f64,
    statistics: &[f64],
) -> Result<AlphaUpdate, NumericDomainError> {
    let topics = alpha.len();
    let mut current = alpha.as_slice().to_vec();
    let mut gradient = vec![0.0; topics];
    let mut hessian = vec![0.0; topics];
    let mut alpha_sum: f64 = current.iter().sum();
    // Backtracking shrinkage carries over between Newton iterations.
    let mut decay: u32 = 0;
    let mut iterations: u32 = 0;

    loop {
        let digamma_sum = digamma(alpha_sum);
        let mut sum_g_h = 0.0;
        let mut sum_1_h = 0.0;
        for i in 0..topics {
            gradient[i] = documents * (digamma_sum - digamma(current[i])) + statistics[i];
            hessian[i] = -documents * trigamma(current[i]);

            if !gradient[i].is_finite() {
                return Err(NumericDomainError(format!("non-finite alpha gradient for topic {}", i + 1)));
            }
            if !hessian[i].is_finite() || hessian[i] >= 0.0 {
                return Err(NumericDomainError(format!("invalid alpha hessian for topic {}", i + 1)));
            }
            sum_g_h += gradient[i] / hessian[i];
            sum_1_h += 1.0 / hessian[i];
        }

        let z = documents * trigamma(alpha_sum);
        let c = sum_g_h / (1.0 / z + sum_1_h);
        if !c.is_finite() {
            return Err(NumericDomainError("singular alpha hessian".to_string()));
        }

        let next = loop {
            let scale = settings.decay_factor.powi(decay as i32);
            let candidate: Option<Vec<f64>> = current
                .iter()
                .enumerate()
                .map(|(i, a)| {
                    let step = scale * (gradient[i] - c) / hessian[i];
                    let updated = a - step;
                    (*a > step && updated.is_finite()).then_some(updated)
                })
                .collect();

            match candidate {
                Some(next) => break Some(next),
                None => {
                    decay += 1;
                    if decay > settings.max_decay {
                        break None;
                    }
                }
            }
        };

        let Some(next) = next else {
            debug!(iterations, decay, "alpha backtracking abandoned");
            return Ok(AlphaUpdate {
                alpha: AlphaVector(current),
                iterations,
                stop: StopReason::BacktrackingAbandoned,
            });
        };

        let moving = next
            .iter()
            .zip(&current)
            .any(|(new, old)| ((new - old) / old).abs() >= settings.threshold);
        alpha_sum = next.iter().sum();
        current = next;
        iterations += 1;

        if !moving {
            debug!(iterations, "alpha converged");
            return Ok(AlphaUpdate { alpha: AlphaVector(current), iterations, stop: StopReason::Converged });
        }
        if iterations >= settings.max_iterations {
            return Ok(AlphaUpdate { alpha: AlphaVector(current), iterations, stop: StopReason::IterationCap });
        }
    }
}

/// Symmetric-prior variant: one concentration shared by every topic, updated in log space.
fn update_scalar(
    settings: &NewtonSettings,
    alpha: &AlphaVector,
    documents: f64,
    statistic: f64,
) -> Result<AlphaUpdate, NumericDomainError> {
    let topics = alpha.len() as f64;
    let mut init = alpha.sum() / topics;
    let mut value = init;
    let mut stop = StopReason::IterationCap;
    let mut iterations = 0;

    while iterations < settings.max_iterations {
        iterations += 1;
        if !value.is_finite() || value <= 0.0 {
            init *= settings.scale_factor;
            value = init;
        }

        let sum = value * topics;
        let gradient = documents * topics * (digamma(sum) - digamma(value)) + statistic;
        let hessian = documents * (topics * topics * trigamma(sum) - topics * trigamma(value));
        if !gradient.is_finite() || !hessian.is_finite() {
            return Err(NumericDomainError("non-finite scalar alpha gradient".to_string()));
        }

        value = (value.ln() - gradient / (hessian * value + gradient)).exp();

        if gradient.abs() < settings.threshold {
            stop = StopReason::Converged;
            break;
        }
    }

    if !value.is_finite() || value <= 0.0 {
        return Err(NumericDomainError(format!("scalar alpha left the positive domain: {value}")));
    }
    Ok(AlphaUpdate { alpha: AlphaVector(vec![value; alpha.len()]), iterations, stop })
}
