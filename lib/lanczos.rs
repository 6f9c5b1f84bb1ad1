//! Lanczos ground-state solver for symmetric linear maps.
//!
//! The operator is given as a closure applying it to a vector, so that the
//! effective Hamiltonian of a DMRG bond update never has to be built as a
//! matrix. The Krylov basis is fully re-orthogonalized at every step, and the
//! tridiagonal projection is diagonalized with LAPACK.

use ndarray as nd;
use ndarray_linalg::{ Eigh, UPLO };
use rand::{ Rng, SeedableRng, rngs::StdRng };
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LanczosError {
    /// Returned when the problem has dimension zero.
    #[error("error in Lanczos: empty problem")]
    EmptyProblem,

    /// Returned when the operator output has the wrong length.
    #[error("error in Lanczos: operator output has length {0}, expected {1}")]
    IncompatibleShape(usize, usize),

    /// Returned when diagonalization of the Krylov projection fails.
    #[error("error in Lanczos: diagonalization failed: {0}")]
    Diagonalization(String),
}
use LanczosError::*;
pub type LanczosResult<T> = Result<T, LanczosError>;

/// Controls for [`lanczos`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct LanczosArgs {
    /// Maximum number of operator applications.
    pub max_iter: usize,
    /// Convergence threshold on the residual norm of the Ritz pair.
    pub tol: f64,
}

impl Default for LanczosArgs {
    fn default() -> Self { Self { max_iter: 2, tol: 1e-10 } }
}

/// Lowest Ritz pair found by [`lanczos`].
#[derive(Clone, Debug)]
pub struct Eigenpair {
    pub value: f64,
    /// Normalized Ritz vector.
    pub vector: nd::Array1<f64>,
    /// Residual norm estimate ‖*Hv* − *λv*‖.
    pub residual: f64,
    /// Number of operator applications used.
    pub iterations: usize,
    /// `true` if the residual dropped below the tolerance (or the Krylov
    /// space became invariant) within the budget.
    pub converged: bool,
}

const BREAKDOWN: f64 = 1e-14;
const SEED: u64 = 10546;

fn norm(v: &nd::Array1<f64>) -> f64 { v.dot(v).sqrt() }

// lowest eigenpair of the symmetric tridiagonal matrix with diagonal `a` and
// off-diagonal `b`
fn tridiag_ground(a: &[f64], b: &[f64])
    -> LanczosResult<(f64, nd::Array1<f64>)>
{
    let m = a.len();
    let t: nd::Array2<f64>
        = nd::Array2::from_shape_fn((m, m), |(i, j)| {
            if i == j {
                a[i]
            } else if i + 1 == j {
                b[i]
            } else if j + 1 == i {
                b[j]
            } else {
                0.0
            }
        });
    let (e, v)
        = t.eigh(UPLO::Lower)
        .map_err(|err| Diagonalization(err.to_string()))?;
    Ok((e[0], v.column(0).to_owned()))
}

/// Find the lowest eigenpair of the symmetric operator `apply` starting from
/// `start`.
///
/// At most `args.max_iter` applications of the operator are made (never more
/// than the problem dimension). When the budget runs out before the residual
/// reaches `args.tol`, the best Ritz pair is returned with `converged` set to
/// `false`. A zero or non-finite start vector is replaced by a fixed-seed
/// random vector.
///
/// Errors from `apply` are passed through; failures of the solver itself are
/// converted into `E`.
pub fn lanczos<F, E>(mut apply: F, start: &nd::Array1<f64>, args: &LanczosArgs)
    -> Result<Eigenpair, E>
where
    F: FnMut(&nd::Array1<f64>) -> Result<nd::Array1<f64>, E>,
    E: From<LanczosError>,
{
    let dim = start.len();
    if dim == 0 { return Err(EmptyProblem.into()); }
    let mut v0 = start.clone();
    let n0 = norm(&v0);
    if !n0.is_finite() || n0 < BREAKDOWN {
        let mut rng = StdRng::seed_from_u64(SEED);
        v0 = nd::Array1::from_shape_fn(dim, |_| rng.gen::<f64>() - 0.5);
        let n0 = norm(&v0);
        v0 /= n0;
    } else {
        v0 /= n0;
    }

    let kmax = args.max_iter.max(1).min(dim);
    let mut basis: Vec<nd::Array1<f64>> = vec![v0];
    let mut alphas: Vec<f64> = Vec::with_capacity(kmax);
    let mut betas: Vec<f64> = Vec::with_capacity(kmax);
    for k in 0..kmax {
        let mut w = apply(&basis[k])?;
        if w.len() != dim { return Err(IncompatibleShape(w.len(), dim).into()); }
        alphas.push(w.dot(&basis[k]));
        // two passes of Gram-Schmidt against the whole basis
        for _ in 0..2 {
            for q in basis.iter() {
                let c = w.dot(q);
                w.scaled_add(-c, q);
            }
        }
        let beta = norm(&w);
        let (theta, y) = tridiag_ground(&alphas, &betas)?;
        let residual = beta * y[k].abs();
        let invariant = beta < BREAKDOWN;
        if residual <= args.tol || invariant || k + 1 == kmax {
            let mut vector: nd::Array1<f64> = nd::Array1::zeros(dim);
            basis.iter().zip(y.iter())
                .for_each(|(q, yi)| { vector.scaled_add(*yi, q); });
            let nv = norm(&vector);
            if nv > 0.0 { vector /= nv; }
            return Ok(Eigenpair {
                value: theta,
                vector,
                residual,
                iterations: k + 1,
                converged: residual <= args.tol || invariant,
            });
        }
        betas.push(beta);
        basis.push(w / beta);
    }
    unreachable!("the loop returns on its last iteration")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_matrix(n: usize) -> nd::Array2<f64> {
        // symmetric, well separated lowest eigenvalue
        nd::Array2::from_shape_fn((n, n), |(i, j)| {
            if i == j {
                i as f64
            } else {
                0.1 / (1.0 + (i as f64 - j as f64).abs())
            }
        })
    }

    fn exact_ground(h: &nd::Array2<f64>) -> f64 {
        let (e, _) = h.eigh(UPLO::Lower).unwrap();
        e[0]
    }

    #[test]
    fn converges_with_full_budget() {
        let h = test_matrix(30);
        let start = nd::Array1::from_elem(30, 1.0);
        let args = LanczosArgs { max_iter: 30, tol: 1e-10 };
        let res: Eigenpair
            = lanczos::<_, LanczosError>(|v| Ok(h.dot(v)), &start, &args).unwrap();
        assert!(res.converged);
        assert!((res.value - exact_ground(&h)).abs() < 1e-10);
        let r = h.dot(&res.vector) - &res.vector * res.value;
        assert!(norm(&r) < 1e-8);
    }

    #[test]
    fn small_budget_is_variational() {
        let h = test_matrix(30);
        let start = nd::Array1::from_elem(30, 1.0);
        let exact = exact_ground(&h);
        let mut last = f64::INFINITY;
        for max_iter in 1..6 {
            let args = LanczosArgs { max_iter, tol: 1e-14 };
            let res: Eigenpair
                = lanczos::<_, LanczosError>(|v| Ok(h.dot(v)), &start, &args)
                .unwrap();
            assert!(!res.converged);
            assert_eq!(res.iterations, max_iter);
            assert!(res.value >= exact - 1e-12);
            assert!(res.value <= last + 1e-12);
            last = res.value;
        }
    }

    #[test]
    fn zero_start_and_tiny_problems() {
        let h = test_matrix(5);
        let start = nd::Array1::zeros(5);
        let args = LanczosArgs { max_iter: 10, tol: 1e-10 };
        let res = lanczos::<_, LanczosError>(|v| Ok(h.dot(v)), &start, &args).unwrap();
        assert!((res.value - exact_ground(&h)).abs() < 1e-10);

        let one = nd::array![3.0];
        let res
            = lanczos::<_, LanczosError>(|v| Ok(v * -2.0), &one, &args).unwrap();
        assert!(res.converged);
        assert!((res.value + 2.0).abs() < 1e-14);

        let empty: nd::Array1<f64> = nd::Array1::zeros(0);
        assert!(matches!(
            lanczos::<_, LanczosError>(|v| Ok(v.clone()), &empty, &args),
            Err(EmptyProblem),
        ));
    }
}
