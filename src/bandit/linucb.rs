//! LinUCB model state and arithmetic.
//!
//! Per session: preference vector θ, design matrix A (symmetric positive
//! definite) and reward accumulator b, with θ = A⁻¹b. Scoring is
//! `ucb(x) = θᵀx + α·√max(0, xᵀA⁻¹x)`. The authoritative model for a session
//! is whatever a fresh replay of its ordered interaction stream produces;
//! cached state must stay equivalent to that replay.

use nalgebra::{DMatrix, DVector};
use thiserror::Error;
use tracing::warn;

use super::{ADAPTIVE_EXPLORATION_AFTER, ALPHA_DECAY, ALPHA_MAX, ALPHA_MIN, REGULARIZATION};

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("design matrix not invertible after regularization ladder")]
    Singular,

    #[error("feature vector has {got} dimensions, model expects {expected}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// Mutable per-session LinUCB state.
#[derive(Debug, Clone)]
pub struct LinUcbModel {
    alpha: f64,
    dimensions: usize,
    a: DMatrix<f64>,
    b: DVector<f64>,
    theta: DVector<f64>,
    interactions: u32,
}

impl LinUcbModel {
    pub fn new(alpha: f64, dimensions: usize) -> Self {
        Self {
            alpha: alpha.clamp(ALPHA_MIN, ALPHA_MAX),
            dimensions,
            a: DMatrix::identity(dimensions, dimensions) * (1.0 + REGULARIZATION),
            b: DVector::zeros(dimensions),
            theta: DVector::zeros(dimensions),
            interactions: 0,
        }
    }

    /// Rebuild a model from the ordered reward stream of a session.
    pub fn replay<'a, I>(alpha: f64, dimensions: usize, stream: I) -> Result<Self, ModelError>
    where
        I: IntoIterator<Item = (&'a [f64], f64)>,
    {
        let mut model = Self::new(alpha, dimensions);
        for (x, reward) in stream {
            model.update(x, reward)?;
        }
        Ok(model)
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn interactions(&self) -> u32 {
        self.interactions
    }

    pub fn theta(&self) -> &DVector<f64> {
        &self.theta
    }

    pub fn theta_norm(&self) -> f64 {
        self.theta.norm()
    }

    fn check_dimensions(&self, x: &[f64]) -> Result<(), ModelError> {
        if x.len() != self.dimensions {
            return Err(ModelError::DimensionMismatch {
                expected: self.dimensions,
                got: x.len(),
            });
        }
        Ok(())
    }

    /// Invert a design matrix with the fallback ladder: plain inverse, then
    /// +λ·I, then +10λ·I. A second regularized failure is fatal.
    fn invert(matrix: &DMatrix<f64>) -> Result<DMatrix<f64>, ModelError> {
        let dims = matrix.nrows();
        for (step, boost) in [0.0, REGULARIZATION, 10.0 * REGULARIZATION]
            .into_iter()
            .enumerate()
        {
            let candidate = if boost == 0.0 {
                matrix.clone()
            } else {
                warn!(boost, "design matrix inversion retry with extra ridge");
                matrix + DMatrix::identity(dims, dims) * boost
            };
            if let Some(inverse) = candidate.try_inverse() {
                if inverse.iter().all(|v| v.is_finite()) {
                    if step > 0 {
                        warn!(step, "design matrix inverted on fallback rung");
                    }
                    return Ok(inverse);
                }
            }
        }
        Err(ModelError::Singular)
    }

    pub fn expected_reward(&self, x: &[f64]) -> Result<f64, ModelError> {
        self.check_dimensions(x)?;
        Ok(self.theta.iter().zip(x).map(|(t, v)| t * v).sum())
    }

    pub fn confidence(&self, x: &[f64]) -> Result<f64, ModelError> {
        self.check_dimensions(x)?;
        let a_inv = Self::invert(&self.a)?;
        let xv = DVector::from_column_slice(x);
        let quad = (xv.transpose() * &a_inv * &xv)[(0, 0)];
        Ok(self.alpha * quad.max(0.0).sqrt())
    }

    /// Upper confidence bound for a query vector.
    pub fn ucb(&self, x: &[f64]) -> Result<f64, ModelError> {
        Ok(self.expected_reward(x)? + self.confidence(x)?)
    }

    /// Fold one observed `(x, reward)` into the model. Nothing is committed
    /// when the updated matrix cannot be inverted.
    pub fn update(&mut self, x: &[f64], reward: f64) -> Result<(), ModelError> {
        self.check_dimensions(x)?;

        let xv = DVector::from_column_slice(x);
        let a = &self.a + &xv * xv.transpose();
        let b = &self.b + &xv * reward;
        let theta = Self::invert(&a)? * &b;

        self.a = a;
        self.b = b;
        self.theta = theta;
        self.interactions += 1;

        if self.interactions > ADAPTIVE_EXPLORATION_AFTER {
            self.alpha = (self.alpha * ALPHA_DECAY).max(ALPHA_MIN);
        }
        self.alpha = self.alpha.min(ALPHA_MAX);

        Ok(())
    }

    /// Immutable scoring view with the inverse computed once, for scoring a
    /// whole candidate pool.
    pub fn snapshot(&self) -> Result<ModelSnapshot, ModelError> {
        Ok(ModelSnapshot {
            alpha: self.alpha,
            dimensions: self.dimensions,
            theta: self.theta.clone(),
            a_inv: Self::invert(&self.a)?,
        })
    }
}

/// Read-only scoring state sharing one matrix inversion.
#[derive(Debug, Clone)]
pub struct ModelSnapshot {
    alpha: f64,
    dimensions: usize,
    theta: DVector<f64>,
    a_inv: DMatrix<f64>,
}

impl ModelSnapshot {
    pub fn expected_reward(&self, x: &[f64]) -> f64 {
        self.theta.iter().zip(x).map(|(t, v)| t * v).sum()
    }

    pub fn confidence(&self, x: &[f64]) -> f64 {
        let xv = DVector::from_column_slice(x);
        let quad = (xv.transpose() * &self.a_inv * &xv)[(0, 0)];
        self.alpha * quad.max(0.0).sqrt()
    }

    pub fn ucb(&self, x: &[f64]) -> f64 {
        self.expected_reward(x) + self.confidence(x)
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }
}
