//! Gaussian approximation of a beam cross section.
//!
//! Fits the TEM00 intensity profile
//!
//! `f(x) = 2c / (π a²) · exp(-2 (x - b)² / a²)`
//!
//! where `a` is the 1/e² radius, `b` the centre and `c` the power. The
//! minimisation is MINPACK-style Levenberg–Marquardt from the
//! `levenberg_marquardt` crate, driven with an analytic Jacobian. The beam
//! width reported is `|2a|`.

use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use nalgebra::{storage::Owned, DVector, Dyn, OMatrix, Vector3, U3};
use ndarray::{Array1, ArrayView1};
use std::f64::consts::PI;

/// Evaluation budget factor for a single fit.
pub const DEFAULT_MAX_ITERATIONS: usize = 100;

/// Relative tolerance on cost reduction and parameter step.
const TOLERANCE: f64 = 1.49e-8;

/// Model parameters `(a, b, c)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussParams {
    /// 1/e² radius
    pub radius: f64,
    pub center: f64,
    pub power: f64,
}

impl GaussParams {
    /// Seed derived from a 4-sigma diameter `d`: `(d/2, 0, π d² / 32)`.
    pub fn from_diameter(diameter: f64) -> Self {
        Self {
            radius: diameter / 2.0,
            center: 0.0,
            power: PI * diameter * diameter / 32.0,
        }
    }

    fn from_vector(v: &Vector3<f64>) -> Self {
        Self {
            radius: v[0],
            center: v[1],
            power: v[2],
        }
    }

    fn to_vector(self) -> Vector3<f64> {
        Vector3::new(self.radius, self.center, self.power)
    }

    fn is_finite(&self) -> bool {
        self.radius.is_finite() && self.center.is_finite() && self.power.is_finite()
    }

    /// Model value at `x`.
    pub fn evaluate(&self, x: f64) -> f64 {
        let a2 = self.radius * self.radius;
        let d = x - self.center;
        2.0 * self.power / (PI * a2) * (-2.0 * d * d / a2).exp()
    }

    pub fn diameter(&self) -> f64 {
        (2.0 * self.radius).abs()
    }
}

/// Result of [`fit_gaussian`].
#[derive(Debug, Clone, PartialEq)]
pub struct GaussFit {
    pub params: GaussParams,
    /// False when the fit failed and `params` hold the fallback values
    pub converged: bool,
    /// Model evaluations spent by the solver
    pub iterations: usize,
}

impl GaussFit {
    pub fn diameter(&self) -> f64 {
        self.params.diameter()
    }

    /// Model sampled on `axis`.
    pub fn model(&self, axis: &ArrayView1<f64>) -> Array1<f64> {
        axis.mapv(|x| self.params.evaluate(x))
    }
}

/// One cross section posed as a least-squares problem in `(a, b, c)`.
struct GaussProblem<'a> {
    axis: ArrayView1<'a, f64>,
    profile: ArrayView1<'a, f64>,
    params: GaussParams,
}

impl LeastSquaresProblem<f64, Dyn, U3> for GaussProblem<'_> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, U3>;
    type ParameterStorage = Owned<f64, U3>;

    fn set_params(&mut self, x: &Vector3<f64>) {
        self.params = GaussParams::from_vector(x);
    }

    fn params(&self) -> Vector3<f64> {
        self.params.to_vector()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        if self.params.radius == 0.0 {
            return None;
        }
        let residuals = DVector::from_iterator(
            self.profile.len(),
            self.axis
                .iter()
                .zip(self.profile.iter())
                .map(|(&x, &y)| self.params.evaluate(x) - y),
        );
        residuals.iter().all(|r| r.is_finite()).then_some(residuals)
    }

    fn jacobian(&self) -> Option<OMatrix<f64, Dyn, U3>> {
        let a = self.params.radius;
        if a == 0.0 {
            return None;
        }
        let a2 = a * a;
        let mut jacobian = OMatrix::<f64, Dyn, U3>::zeros(self.axis.len());
        for (row, &x) in self.axis.iter().enumerate() {
            let d = x - self.params.center;
            let g = (-2.0 * d * d / a2).exp();
            let f = 2.0 * self.params.power / (PI * a2) * g;
            jacobian[(row, 0)] = f * (-2.0 / a + 4.0 * d * d / (a2 * a));
            jacobian[(row, 1)] = f * 4.0 * d / a2;
            jacobian[(row, 2)] = 2.0 / (PI * a2) * g;
        }
        jacobian.iter().all(|v| v.is_finite()).then_some(jacobian)
    }
}

/// Fit the Gaussian model to `profile` sampled at `axis`.
///
/// `seed` is the starting point and the fallback. Without a seed the
/// fallback is `(len/4, len/2, 1)` in axis units. The fit never fails
/// outright: a degenerate input, an unsuccessful solver termination or
/// non-finite parameters return the fallback with `converged == false`.
pub fn fit_gaussian(
    axis: &ArrayView1<f64>,
    profile: &ArrayView1<f64>,
    seed: Option<GaussParams>,
    max_iterations: usize,
) -> GaussFit {
    let fallback = seed.unwrap_or_else(|| {
        let len = profile.len() as f64;
        GaussParams {
            radius: len / 4.0,
            center: len / 2.0,
            power: 1.0,
        }
    });
    let failed = |iterations| GaussFit {
        params: fallback,
        converged: false,
        iterations,
    };

    if axis.len() != profile.len()
        || profile.len() < 3
        || max_iterations == 0
        || fallback.radius == 0.0
        || !fallback.is_finite()
    {
        return failed(0);
    }

    let problem = GaussProblem {
        axis: axis.view(),
        profile: profile.view(),
        params: fallback,
    };
    let (problem, report) = LevenbergMarquardt::new()
        .with_ftol(TOLERANCE)
        .with_xtol(TOLERANCE)
        .with_patience(max_iterations)
        .minimize(problem);

    let params = problem.params;
    if !report.termination.was_successful() || !params.is_finite() || params.radius == 0.0 {
        log::debug!(
            "gaussian fit fell back to seed: {:?} after {} evaluations",
            report.termination,
            report.number_of_evaluations
        );
        return failed(report.number_of_evaluations);
    }

    GaussFit {
        params,
        converged: true,
        iterations: report.number_of_evaluations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn centered_axis(len: usize, scale: f64) -> Array1<f64> {
        Array1::from_shape_fn(len, |i| (i as f64 - len as f64 / 2.0) * scale)
    }

    #[test]
    fn test_fit_recovers_clean_profile() {
        let axis = centered_axis(101, 1.0);
        let truth = GaussParams {
            radius: 12.0,
            center: 3.0,
            power: 2000.0,
        };
        let profile = axis.mapv(|x| truth.evaluate(x));

        let fit = fit_gaussian(
            &axis.view(),
            &profile.view(),
            Some(GaussParams::from_diameter(22.0)),
            DEFAULT_MAX_ITERATIONS,
        );

        assert!(fit.converged);
        assert!(fit.iterations > 0);
        assert_relative_eq!(fit.params.radius.abs(), 12.0, max_relative = 1e-4);
        assert_relative_eq!(fit.params.center, 3.0, epsilon = 1e-3);
        assert_relative_eq!(fit.diameter(), 24.0, max_relative = 1e-4);
    }

    #[test]
    fn test_fit_with_scaled_axis() {
        let axis = centered_axis(80, 2.5);
        let truth = GaussParams {
            radius: 30.0,
            center: 0.0,
            power: 5.0e4,
        };
        let profile = axis.mapv(|x| truth.evaluate(x));

        let fit = fit_gaussian(
            &axis.view(),
            &profile.view(),
            Some(GaussParams::from_diameter(64.0)),
            DEFAULT_MAX_ITERATIONS,
        );

        assert!(fit.converged);
        assert_relative_eq!(fit.diameter(), 60.0, max_relative = 1e-3);
        let model = fit.model(&axis.view());
        assert_relative_eq!(model[40], profile[40], max_relative = 1e-3);
    }

    #[test]
    fn test_fit_failure_falls_back_to_seed() {
        let axis = centered_axis(3, 1.0);
        let profile = Array1::<f64>::zeros(2);
        let seed = GaussParams::from_diameter(10.0);

        let fit = fit_gaussian(&axis.view(), &profile.view(), Some(seed), DEFAULT_MAX_ITERATIONS);
        assert!(!fit.converged);
        assert_eq!(fit.params, seed);
        assert_relative_eq!(fit.diameter(), 10.0);
    }

    #[test]
    fn test_fit_without_seed_uses_default_fallback() {
        let axis = centered_axis(40, 1.0);
        let profile = Array1::<f64>::zeros(40);

        let fit = fit_gaussian(&axis.view(), &profile.view(), Some(GaussParams::from_diameter(0.0)), 10);
        assert!(!fit.converged);
        assert_eq!(fit.diameter(), 0.0);

        let fit = fit_gaussian(&axis.view(), &profile.view(), None, 0);
        assert!(!fit.converged);
        assert_relative_eq!(fit.params.radius, 10.0);
        assert_relative_eq!(fit.params.center, 20.0);
        assert_relative_eq!(fit.params.power, 1.0);
    }

    #[test]
    fn test_seed_from_diameter() {
        let seed = GaussParams::from_diameter(8.0);
        assert_relative_eq!(seed.radius, 4.0);
        assert_relative_eq!(seed.center, 0.0);
        assert_relative_eq!(seed.power, PI * 2.0);
    }
}
