//! Local Hilbert spaces of spin-1 sites, with named basis states and
//! operators.
//!
//! Basis order on every site is `[Up, Z0, Dn]`, i.e. *m* = +1, 0, –1. All
//! operators are real; *S*<sup>*y*</sup> is therefore not provided, and the
//! XY part of an exchange coupling is built from *S*<sup>+</sup> and
//! *S*<sup>–</sup> instead.

use std::f64::consts::SQRT_2;
use ndarray as nd;
use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;
use thiserror::Error;
use crate::tensor::{ Leg, Tensor, TensorError, TensorResult };

#[derive(Debug, Error)]
pub enum SitesError {
    /// Returned when attempting to create a site set of zero sites.
    #[error("error in site set creation: cannot create for an empty system")]
    EmptySystem,

    /// Returned when a state label isn't recognized.
    #[error("unknown spin-1 state label {0:?}")]
    UnknownState(String),

    /// Returned when an operator name isn't recognized.
    #[error("unknown spin-1 operator {0:?}")]
    UnknownOperator(String),

    /// Returned when a site number is out of bounds.
    #[error("site {0} is out of bounds for a system of {1} sites")]
    OutOfBounds(usize, usize),

    #[error(transparent)]
    Tensor(#[from] TensorError),
}
use SitesError::*;
pub type SitesResult<T> = Result<T, SitesError>;

/// Dimension of a single spin-1 site.
pub const SPIN_ONE_DIM: usize = 3;

/// Make the *S*<sup>*z*</sup> matrix.
pub fn make_sz() -> nd::Array2<f64> {
    nd::array![
        [1.0, 0.0,  0.0],
        [0.0, 0.0,  0.0],
        [0.0, 0.0, -1.0],
    ]
}

/// Lazy-static version of [`make_sz`].
pub static SZMAT: Lazy<nd::Array2<f64>> = Lazy::new(make_sz);

/// Make the raising operator *S*<sup>+</sup>.
pub fn make_sp() -> nd::Array2<f64> {
    nd::array![
        [0.0, SQRT_2,    0.0],
        [0.0,    0.0, SQRT_2],
        [0.0,    0.0,    0.0],
    ]
}

/// Lazy-static version of [`make_sp`].
pub static SPMAT: Lazy<nd::Array2<f64>> = Lazy::new(make_sp);

/// Make the lowering operator *S*<sup>–</sup>.
pub fn make_sm() -> nd::Array2<f64> { make_sp().reversed_axes() }

/// Lazy-static version of [`make_sm`].
pub static SMMAT: Lazy<nd::Array2<f64>> = Lazy::new(make_sm);

/// Lazy-static 3 × 3 identity.
pub static IDMAT: Lazy<nd::Array2<f64>> = Lazy::new(|| nd::Array2::eye(SPIN_ONE_DIM));

static OPERATORS: Lazy<FxHashMap<&'static str, nd::Array2<f64>>>
    = Lazy::new(|| {
        let sx = (make_sp() + make_sm()) * 0.5;
        let sz2 = make_sz().dot(&make_sz());
        let mut ops: FxHashMap<&'static str, nd::Array2<f64>>
            = FxHashMap::default();
        ops.insert("Id", IDMAT.clone());
        ops.insert("Sz", SZMAT.clone());
        ops.insert("S+", SPMAT.clone());
        ops.insert("Sp", SPMAT.clone());
        ops.insert("S-", SMMAT.clone());
        ops.insert("Sm", SMMAT.clone());
        ops.insert("Sx", sx);
        ops.insert("Sz2", sz2);
        ops
    });

/// A chain of spin-1 sites.
///
/// Sites are numbered from zero. The object holds no tensors; it only hands
/// out site legs, state indices and operator tensors for given positions.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SpinOne {
    n: usize,
}

impl SpinOne {
    /// Create a new chain of `n` sites.
    ///
    /// Fails if `n == 0`.
    pub fn new(n: usize) -> SitesResult<Self> {
        if n == 0 { return Err(EmptySystem); }
        Ok(Self { n })
    }

    /// Return the number of sites.
    pub fn n(&self) -> usize { self.n }

    /// Return the local dimension of every site.
    pub fn dim(&self) -> usize { SPIN_ONE_DIM }

    fn check(&self, k: usize) -> SitesResult<()> {
        if k < self.n { Ok(()) } else { Err(OutOfBounds(k, self.n)) }
    }

    /// Return the physical leg of site `k`.
    pub fn site_leg(&self, k: usize) -> SitesResult<Leg> {
        self.check(k)?;
        Ok(Leg::site(k, SPIN_ONE_DIM))
    }

    /// Return the basis index of a named state.
    pub fn state(&self, label: &str) -> SitesResult<usize> {
        match label {
            "Up" | "↑" | "+" => Ok(0),
            "Z0" | "0" => Ok(1),
            "Dn" | "Down" | "↓" | "-" => Ok(2),
            _ => Err(UnknownState(label.to_string())),
        }
    }

    /// Return the matrix of a named operator, indexed `[s', s]`.
    pub fn op_matrix(&self, name: &str) -> SitesResult<nd::Array2<f64>> {
        OPERATORS.get(name)
            .cloned()
            .ok_or_else(|| UnknownOperator(name.to_string()))
    }

    /// Return a named operator acting on site `k`, as a tensor with legs
    /// `[s_k', s_k]`.
    pub fn op(&self, name: &str, k: usize) -> SitesResult<Tensor<Leg>> {
        let mat = self.op_matrix(name)?;
        let leg = self.site_leg(k)?;
        Ok(op_tensor(&mat, leg)?)
    }
}

/// Wrap a square matrix `[s', s]` as a tensor on `leg` with legs
/// `[leg', leg]`.
pub fn op_tensor(mat: &nd::Array2<f64>, leg: Leg) -> TensorResult<Tensor<Leg>> {
    Tensor::from_array([leg.primed(), leg], mat.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commutator(a: &nd::Array2<f64>, b: &nd::Array2<f64>) -> nd::Array2<f64> {
        a.dot(b) - b.dot(a)
    }

    #[test]
    fn spin_algebra() {
        // [S+, S-] = 2 Sz
        let c = commutator(&SPMAT, &SMMAT);
        assert!((c - &*SZMAT * 2.0).iter().all(|x| x.abs() < 1e-14));
        // S·S = s(s + 1) = 2
        let ss = SZMAT.dot(&*SZMAT)
            + (SPMAT.dot(&*SMMAT) + SMMAT.dot(&*SPMAT)) * 0.5;
        let expected = nd::Array2::<f64>::eye(3) * 2.0;
        assert!((ss - expected).iter().all(|x| x.abs() < 1e-14));
    }

    #[test]
    fn names() {
        let sites = SpinOne::new(4).unwrap();
        assert_eq!(sites.state("Up").unwrap(), 0);
        assert_eq!(sites.state("Dn").unwrap(), 2);
        assert!(matches!(sites.state("Left"), Err(UnknownState(_))));
        assert!(matches!(sites.op_matrix("Sy"), Err(UnknownOperator(_))));
        assert_eq!(sites.op_matrix("Sp").unwrap(), sites.op_matrix("S+").unwrap());
        let sz = sites.op("Sz", 3).unwrap();
        assert_eq!(
            sz.indices().copied().collect::<Vec<_>>(),
            vec![Leg::site(3, 3).primed(), Leg::site(3, 3)],
        );
        assert!(matches!(sites.op("Sz", 4), Err(OutOfBounds(4, 4))));
        assert!(matches!(SpinOne::new(0), Err(EmptySystem)));
    }
}
