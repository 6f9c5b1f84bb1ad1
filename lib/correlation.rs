//! Two-point functions on a translation-invariant infinite MPS.
//!
//! For a unit cell of `n` right-orthonormal tensors *B*<sub>0</sub>, ...,
//! *B*<sub>n–1</sub> entered through the singular values Λ, the correlation
//! function
//!
//! <blockquote>
//!   <i>C</i>(<i>j</i>) = ⟨ψ| <i>O</i><sub>1</sub> <i>O</i>′<sub><i>j</i></sub> |ψ⟩
//! </blockquote>
//!
//! is evaluated incrementally: an accumulator tensor carrying one ket and one
//! bra bond leg absorbs one cell site per step, so the cost of each new *j* is
//! constant and the accumulator never grows.
//!
//! ```text
//!  .--Λ--B0--B1-- ... --Bk--  (ket)
//!  |     |   |          |
//!  |     O   |          |         -> accumulator at bond k + 1
//!  |     |   |          |
//!  '--Λ--B0--B1-- ... --Bk--  (bra)
//! ```
//!
//! Site numbers `j` are 1-based, as in *C*(*j*); site `j` lives on cell
//! position `(j - 1) % n`.

use itertools::Itertools;
use ndarray as nd;
use thiserror::Error;
use crate::{
    sites::{ op_tensor, SitesError, SpinOne },
    tensor::{ Leg, Tag, Tensor, TensorError },
};

#[derive(Debug, Error)]
pub enum CorrError {
    /// Returned when the accumulator's legs do not match the left link of the
    /// next cell tensor.
    #[error("index mismatch at cell site {site}: accumulator has {found}, expected {expected}")]
    IndexMismatch { site: usize, expected: String, found: String },

    /// Returned when a scanning site is requested that the evaluator can't
    /// reach (site numbers start at 2).
    #[error("invalid correlation site {0}")]
    InvalidSite(usize),

    /// Returned when attempting to build an infinite MPS from an empty cell or
    /// a cell whose bonds don't close.
    #[error("error in infinite MPS creation: {0}")]
    BadCell(String),

    /// Returned when an operator matrix doesn't fit the site dimension.
    #[error("error in operator: incorrect shape")]
    OperatorIncompatibleShape,

    #[error(transparent)]
    Sites(#[from] SitesError),

    #[error(transparent)]
    Tensor(#[from] TensorError),
}
use CorrError::*;
pub type CorrResult<T> = Result<T, CorrError>;

/// Converged unit cell of an infinite MPS.
///
/// Cell tensors carry legs `[l_k, s_k, l_{k+1}]`, except that the last one's
/// right link is `l_0`, so the cell closes on itself. Λ is stored as a
/// diagonal tensor with legs `[l_n, l_0]`, where `l_n` is an outer leg that
/// no cell tensor carries.
#[derive(Clone, Debug, PartialEq)]
pub struct InfiniteMPS {
    lambda: Tensor<Leg>,
    svals: Vec<f64>,
    cell: Vec<Tensor<Leg>>,
}

impl InfiniteMPS {
    /// Assemble from the singular values entering the cell and the cell
    /// tensors.
    ///
    /// Fails if the cell is empty or its bonds don't line up.
    pub fn new(svals: Vec<f64>, cell: Vec<Tensor<Leg>>) -> CorrResult<Self> {
        let n = cell.len();
        if n == 0 { return Err(BadCell("empty cell".into())); }
        let chi = svals.len();
        let l0 = Leg::link(0, chi);
        for (k, t) in cell.iter().enumerate() {
            let left = Leg::link(k, if k == 0 { chi } else { t.shape()[0] });
            let ok
                = t.rank() == 3
                && t.indices().next() == Some(&left)
                && t.indices().nth(2).map(|l| l.pos) == Some((k + 1) % n);
            if !ok {
                return Err(BadCell(format!("unexpected legs at cell site {k}: {t}")));
            }
        }
        if !cell[n - 1].has_index(&l0) {
            return Err(BadCell("last cell tensor doesn't close on l0".into()));
        }
        let lambda = Tensor::diag(Leg::link(n, chi), l0, &svals)?;
        Ok(Self { lambda, svals, cell })
    }

    /// Return the number of sites in the unit cell.
    pub fn n(&self) -> usize { self.cell.len() }

    /// Return the cell tensor of cell position `k % n`.
    pub fn site(&self, k: usize) -> &Tensor<Leg> { &self.cell[k % self.n()] }

    /// Return Λ as a diagonal tensor with legs `[l_n, l_0]`.
    pub fn lambda(&self) -> &Tensor<Leg> { &self.lambda }

    /// Return the singular values entering the cell.
    pub fn svals(&self) -> &[f64] { &self.svals }

    /// Return the dimension of bond `k % n` of the cell.
    pub fn link_dim(&self, k: usize) -> usize {
        self.site(k).shape()[0]
    }

    /// Return the physical leg of cell position `k % n`.
    pub fn site_leg(&self, k: usize) -> CorrResult<Leg> {
        self.site(k).legs_with(Tag::Site).first().copied()
            .ok_or_else(|| BadCell(format!("no site leg at cell site {}", k % self.n())))
    }

    /// Compute the Von Neumann entropy across the bond entering the cell,
    /// in nats.
    pub fn entropy_vn(&self) -> f64 {
        self.svals.iter()
            .map(|s| s * s)
            .filter(|p| *p > 0.0)
            .map(|p| -p * p.ln())
            .sum()
    }

    /// Compute the expectation value of the one-site operator `op`
    /// (indexed `[s', s]`) on cell position `k % n`.
    pub fn expectation(&self, op: &nd::Array2<f64>, k: usize) -> CorrResult<f64> {
        let k = k % self.n();
        let mut acc = self.identity_accumulator()?;
        for m in 0..k {
            acc = absorb(&acc, self.site(m))?;
        }
        let op = self.op_tensor(op, k)?;
        close(&acc, self.site(k), &op)
    }

    // Λ Λ on bond 0, legs [l_0, l_0']
    fn identity_accumulator(&self) -> CorrResult<Accumulator> {
        let outer = Tensor::unique_leg(&self.lambda, &self.cell[0], Tag::Link)?;
        let ket = self.lambda.prime_leg(&outer)?;
        let bra = self.lambda.dag().prime();
        Ok(Accumulator(ket.contract(&bra)?))
    }

    fn op_tensor(&self, op: &nd::Array2<f64>, k: usize) -> CorrResult<Tensor<Leg>> {
        let leg = self.site_leg(k)?;
        if op.dim() != (leg.dim, leg.dim) { return Err(OperatorIncompatibleShape); }
        Ok(op_tensor(op, leg)?)
    }
}

/// Running left environment of a correlation scan, with legs
/// `[l_k, l_k']`.
#[derive(Clone, Debug, PartialEq)]
pub struct Accumulator(Tensor<Leg>);

impl Accumulator {
    /// Return the underlying tensor.
    pub fn tensor(&self) -> &Tensor<Leg> { &self.0 }

    /// Return the bond the accumulator sits on.
    pub fn bond(&self) -> Option<usize> {
        self.0.indices().find(|l| l.prime == 0).map(|l| l.pos)
    }

    /// Return the bond dimension carried by the accumulator.
    pub fn dim(&self) -> usize {
        self.0.indices().next().map(|l| l.dim).unwrap_or(0)
    }

    /// Return max |*L*<sub>*ab*</sub> − *L*<sub>*ba*</sub>| over the
    /// accumulator's ket and bra legs. For Hermitian operators the value
    /// stays at rounding level.
    pub fn hermiticity_defect(&self) -> CorrResult<f64> {
        let ket = self.0.indices().find(|l| l.prime == 0).copied()
            .ok_or_else(|| BadCell("accumulator has no ket leg".into()))?;
        let mat = self.0.to_array(&[ket, ket.primed()])?;
        let mat = mat.into_dimensionality::<nd::Ix2>()
            .map_err(|_| TensorError::IncompatibleShape)?;
        Ok(
            mat.indexed_iter()
                .map(|((a, b), x)| (x - mat[[b, a]]).abs())
                .fold(0.0, f64::max)
        )
    }
}

fn check_legs(acc: &Accumulator, b: &Tensor<Leg>, site: usize) -> CorrResult<Leg> {
    let left = b.indices().next().copied()
        .ok_or_else(|| BadCell(format!("scalar cell tensor at {site}")))?;
    let ok
        = acc.0.rank() == 2
        && acc.0.has_index(&left)
        && acc.0.has_index(&left.primed());
    if ok {
        Ok(left)
    } else {
        Err(IndexMismatch {
            site,
            expected: format!("{}, {}", left, left.primed()),
            found: acc.0.indices().join(", "),
        })
    }
}

// L ← L · B · dag(prime(B, Link))
fn absorb(acc: &Accumulator, b: &Tensor<Leg>) -> CorrResult<Accumulator> {
    Ok(Accumulator(acc.0.contract(b)?.contract(&b.dag().prime_tag(Tag::Link))?))
}

// dag(prime(B)) · L · prime(B, ui) · O
fn close(acc: &Accumulator, b: &Tensor<Leg>, op: &Tensor<Leg>) -> CorrResult<f64> {
    let ui = Tensor::unique_leg(b, &acc.0, Tag::Link)?;
    b.dag().prime()
        .contract(&acc.0)?
        .contract(&b.prime_leg(&ui)?)?
        .contract(op)?
        .scalar()
        .ok_or_else(|| BadCell("correlation did not contract to a scalar".into()))
}

/// Evaluates *C*(*j*) = ⟨ψ| *O*<sub>1</sub> *O*′<sub>*j*</sub> |ψ⟩ for
/// *j* = 2, 3, ...
#[derive(Clone, Debug)]
pub struct Correlator {
    psi: InfiniteMPS,
    // O on cell position 0
    first: Tensor<Leg>,
    // O' on every cell position
    scan: Vec<Tensor<Leg>>,
}

impl Correlator {
    /// Set up for operators `first` (on site 1) and `scan` (on site `j`),
    /// both indexed `[s', s]`.
    pub fn new(psi: &InfiniteMPS, first: &nd::Array2<f64>, scan: &nd::Array2<f64>)
        -> CorrResult<Self>
    {
        let first = psi.op_tensor(first, 0)?;
        let scan: Vec<Tensor<Leg>>
            = (0..psi.n())
            .map(|k| psi.op_tensor(scan, k))
            .collect::<CorrResult<_>>()?;
        Ok(Self { psi: psi.clone(), first, scan })
    }

    /// Like [`Self::new`], with operators looked up by name.
    pub fn from_names(psi: &InfiniteMPS, sites: &SpinOne, first: &str, scan: &str)
        -> CorrResult<Self>
    {
        Self::new(psi, &sites.op_matrix(first)?, &sites.op_matrix(scan)?)
    }

    /// Return the state being scanned.
    pub fn psi(&self) -> &InfiniteMPS { &self.psi }

    /// Build the accumulator after site 1:
    /// `prime(Λ B_0, outer) · O_1 · dag(prime(Λ B_0))`, with legs
    /// `[l_1, l_1']`.
    pub fn init(&self) -> CorrResult<Accumulator> {
        let b0 = self.psi.site(0);
        let wf1 = self.psi.lambda().contract(b0)?;
        let oi = Tensor::unique_leg(self.psi.lambda(), b0, Tag::Link)?;
        let acc
            = wf1.prime_leg(&oi)?
            .contract(&self.first)?
            .contract(&wf1.dag().prime())?;
        Ok(Accumulator(acc))
    }

    /// Advance the scan by one site.
    ///
    /// Given the accumulator for sites `1..j`, return the accumulator for
    /// sites `1..=j` together with *C*(*j*). `j` must be at least 2.
    pub fn step(&self, acc: &Accumulator, j: usize)
        -> CorrResult<(Accumulator, f64)>
    {
        if j < 2 { return Err(InvalidSite(j)); }
        let k = (j - 1) % self.psi.n();
        let b = self.psi.site(k);
        check_legs(acc, b, k)?;
        let val = close(acc, b, &self.scan[k])?;
        let next = absorb(acc, b)?;
        Ok((next, val))
    }

    /// Return an iterator over `(j, C(j))` for `j = 2..=jmax`, or without end
    /// if `jmax` is `None`.
    pub fn iter(&self, jmax: Option<usize>) -> Correlations<'_> {
        Correlations { corr: self, acc: None, j: 2, jmax, failed: false }
    }

    /// Return the connected correlation
    /// *C*(*j*) − ⟨*O*<sub>1</sub>⟩⟨*O*′<sub>*j*</sub>⟩ for `j = 2..=jmax`.
    pub fn connected(&self, jmax: usize) -> CorrResult<Vec<(usize, f64)>> {
        let n = self.psi.n();
        let mean_first = self.psi.expectation(&self.first_matrix()?, 0)?;
        let means: Vec<f64>
            = (0..n)
            .map(|k| self.psi.expectation(&self.scan_matrix(k)?, k))
            .collect::<CorrResult<_>>()?;
        self.iter(Some(jmax))
            .map(|res| {
                let (j, c) = res?;
                Ok((j, c - mean_first * means[(j - 1) % n]))
            })
            .collect()
    }

    fn first_legs(&self) -> Vec<Leg> { self.first.indices().copied().collect() }

    fn first_matrix(&self) -> CorrResult<nd::Array2<f64>> {
        let legs = self.first_legs();
        self.first.to_array(&legs)?
            .into_dimensionality::<nd::Ix2>()
            .map_err(|_| OperatorIncompatibleShape)
    }

    fn scan_matrix(&self, k: usize) -> CorrResult<nd::Array2<f64>> {
        let legs: Vec<Leg> = self.scan[k].indices().copied().collect();
        self.scan[k].to_array(&legs)?
            .into_dimensionality::<nd::Ix2>()
            .map_err(|_| OperatorIncompatibleShape)
    }
}

/// Lazy sequence of `(j, C(j))`, produced by [`Correlator::iter`].
///
/// An error is yielded once, after which the iterator is exhausted.
pub struct Correlations<'a> {
    corr: &'a Correlator,
    acc: Option<Accumulator>,
    j: usize,
    jmax: Option<usize>,
    failed: bool,
}

impl<'a> Correlations<'a> {
    /// Return the current accumulator, if the scan has started.
    pub fn accumulator(&self) -> Option<&Accumulator> { self.acc.as_ref() }
}

impl<'a> Iterator for Correlations<'a> {
    type Item = CorrResult<(usize, f64)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed { return None; }
        if self.jmax.is_some_and(|jmax| self.j > jmax) { return None; }
        let acc
            = match self.acc.take() {
                Some(acc) => acc,
                None => match self.corr.init() {
                    Ok(acc) => acc,
                    Err(err) => { self.failed = true; return Some(Err(err)); },
                },
            };
        match self.corr.step(&acc, self.j) {
            Ok((next, val)) => {
                let j = self.j;
                self.acc = Some(next);
                self.j += 1;
                Some(Ok((j, val)))
            },
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            },
        }
    }
}
