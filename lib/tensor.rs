//! Dense tensors whose legs are identified by labeled index values.
//!
//! A [`Tensor`] is an *N*-dimensional array of `f64` together with one index
//! value per axis. Contraction sums over all legs common to both operands,
//! which means that the tensor network structure is determined entirely by
//! the identity of leg values and never by axis positions:
//!
//! <blockquote>
//!   <p style="font-size:20px">
//!     <i>C</i><sub>
//!       <i>a</i><sub>1</sub>,...,<i>a</i><sub><i>N</i></sub>,
//!       <i>b</i><sub>1</sub>,...,<i>b</i><sub><i>M</i></sub>
//!     </sub>
//!       = Σ<sub><i>α</i><sub>1</sub>,...,<i>α</i><sub><i>D</i></sub></sub> [
//!         <i>A</i><sub>
//!           <i>a</i><sub>1</sub>,...,<i>a</i><sub><i>N</i></sub>,
//!           <i>α</i><sub>1</sub>,...,<i>α</i><sub><i>D</i></sub>
//!         </sub>
//!         × <i>B</i><sub>
//!           <i>b</i><sub>1</sub>,...,<i>b</i><sub><i>M</i></sub>,
//!           <i>α</i><sub>1</sub>,...,<i>α</i><sub><i>D</i></sub>
//!         </sub>
//!       ]
//!   </p>
//! </blockquote>
//!
//! Matrix product states need more than bare identity, though: the same bond
//! appears once on the ket side and once on the bra side of every expectation
//! value, and the physical index of a site appears on both sides of every
//! operator. [`Leg`] therefore carries a semantic [`Tag`] and a *prime level*
//! in addition to its position and dimension. Priming produces a new,
//! distinct leg, so that `dag(prime(psi))` can share no legs with `psi` until
//! an operator or an environment tensor connects them.
//!
//! ```
//! use idmrg_net::tensor::{ Leg, Tensor };
//!
//! let a = Leg::link(0, 3);
//! let s = Leg::site(0, 2);
//! let b = Leg::link(1, 4);
//! let x = Tensor::new([a, s, b], |k| (k[0] + k[1] + k[2]) as f64).unwrap();
//! let y = Tensor::new([b], |_| 1.0).unwrap();
//! let xy = x.contract(&y).unwrap(); // sums over the shared leg `b`
//! assert_eq!(xy.indices().copied().collect::<Vec<_>>(), vec![a, s]);
//! ```
//!
//! Element type is fixed to `f64`: the Hamiltonians handled by this crate are
//! real symmetric, so their ground states can be chosen real and conjugation
//! ([`Tensor::dag`]) acts only on prime levels.

use std::{ fmt, ops::Range };
use itertools::Itertools;
use ndarray::{ self as nd, Dimension };
use ndarray_linalg::SVDInto;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TensorError {
    /// Returned when a contraction is attempted between two tensors (rank > 0)
    /// with no common indices.
    #[error("error in tensor contraction: no matching indices")]
    NoMatchingIndices,

    /// Returned when attempting to create a new tensor with duplicate indices.
    #[error("error in tensor creation: duplicate indices")]
    DuplicateIndices,

    /// Returned when attempting to create a new tensor from a pre-existing
    /// array whose shape doesn't match the provided indices.
    #[error("error in tensor creation: non-matching indices and array shape")]
    IncompatibleShape,

    /// Returned when an operation refers to an index the tensor doesn't have.
    #[error("error in index lookup: missing index {0}")]
    MissingIndex(String),

    /// Returned when a leg lookup finds zero or several candidates.
    #[error("error in index lookup: {0}")]
    AmbiguousIndex(String),

    /// Returned when a singular value decomposition fails, either inside
    /// LAPACK or because the input holds non-finite values.
    #[error("error in decomposition: {0}")]
    DecompositionFailure(String),
}
use TensorError::*;
pub type TensorResult<T> = Result<T, TensorError>;

/// Describes a tensor index.
///
/// Static index types (enums with fixed dimensions) and dynamic ones (structs
/// holding a dimension) both work; [`Leg`] is the dynamic type used by the
/// matrix product machinery in this crate.
pub trait Idx: Clone + Eq + fmt::Debug {
    /// Return the number of values the index can take.
    ///
    /// This value must never be zero.
    fn dim(&self) -> usize;

    /// Return an identifying label for the index. This method is used only for
    /// printing purposes.
    fn label(&self) -> String;

    /// Return an iterator over all possible index values. The default
    /// implementation returns `0..self.dim()`.
    fn iter(&self) -> Range<usize> { 0..self.dim() }
}

/// Semantic category of a [`Leg`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tag {
    /// Physical degree of freedom of a single site.
    Site,
    /// Virtual bond between two MPS tensors.
    Link,
    /// Virtual bond between two MPO tensors.
    MpoLink,
}

/// Leg of a tensor in a matrix product network.
///
/// `pos` is the site number for [`Tag::Site`] legs and the bond number for
/// [`Tag::Link`] and [`Tag::MpoLink`] legs, where bond `k` sits to the left of
/// site `k`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Leg {
    pub tag: Tag,
    pub pos: usize,
    pub dim: usize,
    pub prime: u8,
}

impl Leg {
    /// Physical leg of site `pos`.
    pub fn site(pos: usize, dim: usize) -> Self {
        Self { tag: Tag::Site, pos, dim, prime: 0 }
    }

    /// MPS bond to the left of site `pos`.
    pub fn link(pos: usize, dim: usize) -> Self {
        Self { tag: Tag::Link, pos, dim, prime: 0 }
    }

    /// MPO bond to the left of site `pos`.
    pub fn mpo_link(pos: usize, dim: usize) -> Self {
        Self { tag: Tag::MpoLink, pos, dim, prime: 0 }
    }

    /// Return `true` if `self` carries `tag`.
    pub fn has_tag(&self, tag: Tag) -> bool { self.tag == tag }

    /// Raise the prime level by one.
    pub fn primed(self) -> Self { Self { prime: self.prime + 1, ..self } }

    /// Reset the prime level to zero.
    pub fn noprime(self) -> Self { Self { prime: 0, ..self } }

    /// Same leg at a different position.
    pub fn moved(self, pos: usize) -> Self { Self { pos, ..self } }
}

impl Idx for Leg {
    fn dim(&self) -> usize { self.dim }

    fn label(&self) -> String {
        let head
            = match self.tag {
                Tag::Site => "s",
                Tag::Link => "l",
                Tag::MpoLink => "w",
            };
        format!("{}{}{}<{}>", head, self.pos, "'".repeat(self.prime as usize), self.dim)
    }
}

impl fmt::Display for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Truncation controls for singular value decompositions.
///
/// The kept dimension is the smallest number of singular values such that the
/// discarded weight Σ<sub>*k*</sub> *s*<sub>*k*</sub><sup>2</sup> / Σ *s*<sup>2</sup>
/// stays at or below `cutoff`, clamped to the range `mindim..=maxdim` and
/// never less than 1.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Truncation {
    pub maxdim: usize,
    pub mindim: usize,
    pub cutoff: f64,
}

impl Default for Truncation {
    fn default() -> Self {
        Self { maxdim: usize::MAX, mindim: 1, cutoff: 0.0 }
    }
}

impl Truncation {
    /// Compute the kept rank and discarded weight for singular values `s`,
    /// which must be sorted in descending order.
    pub fn rank(&self, s: &[f64]) -> (usize, f64) {
        let n = s.len();
        if n == 0 { return (0, 0.0); }
        let total: f64 = s.iter().map(|sk| sk * sk).sum();
        if total <= 0.0 { return (1, 0.0); }
        let floor = self.mindim.max(1).min(n);
        let mut keep = n;
        let mut discarded = 0.0;
        while keep > floor {
            let p = s[keep - 1] * s[keep - 1] / total;
            if discarded + p > self.cutoff { break; }
            discarded += p;
            keep -= 1;
        }
        let cap = self.maxdim.max(1);
        if keep > cap {
            discarded
                += s[cap..keep].iter()
                .map(|sk| sk * sk / total)
                .sum::<f64>();
            keep = cap;
        }
        (keep, discarded)
    }
}

/// Basic implementation of a real-valued tensor.
///
/// Rank-0 tensors (scalars) are stored as zero-dimensional arrays with no
/// indices; contracting with a scalar multiplies element-wise.
#[derive(Clone, PartialEq)]
pub struct Tensor<T> {
    idxs: Vec<T>,
    data: nd::ArrayD<f64>,
}

impl<T> fmt::Debug for Tensor<T>
where T: fmt::Debug
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tensor(")?;
        self.data.fmt(f)?;
        write!(f, ", rank={}, indices={:?})", self.idxs.len(), self.idxs)
    }
}

impl<T> fmt::Display for Tensor<T>
where T: Idx
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.data.fmt(f)?;
        write!(
            f,
            " {{ {} }}",
            self.idxs.iter().map(|idx| idx.label()).join(", "),
        )
    }
}

// flatten `data` into a matrix after moving the axes listed in `row` to the
// front, in that order, followed by those in `col`
fn matricize(
    data: nd::ArrayViewD<'_, f64>,
    row: &[usize],
    col: &[usize],
) -> TensorResult<nd::Array2<f64>>
{
    let shape = data.shape();
    let m: usize = row.iter().map(|k| shape[*k]).product();
    let n: usize = col.iter().map(|k| shape[*k]).product();
    let perm: Vec<usize> = row.iter().chain(col).copied().collect();
    let elems: Vec<f64>
        = data.permuted_axes(nd::IxDyn(&perm)).iter().copied().collect();
    nd::Array2::from_shape_vec((m, n), elems).map_err(|_| IncompatibleShape)
}

fn has_duplicates<T: PartialEq>(idxs: &[T]) -> bool {
    idxs.iter().enumerate().any(|(k, idx)| idxs[..k].contains(idx))
}

fn reshape_dyn(mat: &nd::Array2<f64>, shape: &[usize])
    -> TensorResult<nd::ArrayD<f64>>
{
    let elems: Vec<f64> = mat.iter().copied().collect();
    nd::ArrayD::from_shape_vec(nd::IxDyn(shape), elems)
        .map_err(|_| IncompatibleShape)
}

impl<T> Tensor<T>
where T: Idx
{
    /// Create a new tensor using a function over given indices.
    ///
    /// Fails if any index appears more than once.
    pub fn new<I, F>(indices: I, mut elems: F) -> TensorResult<Self>
    where
        I: IntoIterator<Item = T>,
        F: FnMut(&[usize]) -> f64,
    {
        let idxs: Vec<T> = indices.into_iter().collect();
        if has_duplicates(&idxs) { return Err(DuplicateIndices); }
        let shape: Vec<usize> = idxs.iter().map(|idx| idx.dim()).collect();
        let data
            = nd::ArrayD::from_shape_fn(
                nd::IxDyn(&shape),
                |k| elems(k.slice()),
            );
        Ok(Self { idxs, data })
    }

    /// Create a new tensor of all zeros.
    pub fn zeros<I>(indices: I) -> TensorResult<Self>
    where I: IntoIterator<Item = T>
    {
        Self::new(indices, |_| 0.0)
    }

    /// Wrap an existing array, whose axes correspond to `indices` in order.
    ///
    /// Fails if the array shape doesn't match the index dimensions or an index
    /// is duplicated.
    pub fn from_array<I, D>(indices: I, data: nd::Array<f64, D>)
        -> TensorResult<Self>
    where
        I: IntoIterator<Item = T>,
        D: nd::Dimension,
    {
        let idxs: Vec<T> = indices.into_iter().collect();
        if has_duplicates(&idxs) { return Err(DuplicateIndices); }
        let data = data.into_dyn();
        let matches
            = data.ndim() == idxs.len()
            && data.shape().iter().zip(&idxs).all(|(d, idx)| *d == idx.dim());
        if !matches { return Err(IncompatibleShape); }
        Ok(Self { idxs, data })
    }

    /// Create a rank-2 tensor with `diag` on its diagonal.
    ///
    /// Fails if either index dimension differs from `diag.len()`.
    pub fn diag(a: T, b: T, diag: &[f64]) -> TensorResult<Self> {
        if a.dim() != diag.len() || b.dim() != diag.len() {
            return Err(IncompatibleShape);
        }
        Self::new([a, b], |k| if k[0] == k[1] { diag[k[0]] } else { 0.0 })
    }

    /// Return `true` if `self` has rank 0.
    pub fn is_scalar(&self) -> bool { self.idxs.is_empty() }

    /// Return the value of a rank-0 tensor.
    pub fn scalar(&self) -> Option<f64> {
        if self.is_scalar() { self.data.iter().copied().next() } else { None }
    }

    /// Return `true` if `self` has the given index.
    pub fn has_index(&self, index: &T) -> bool { self.idxs.contains(index) }

    /// Return the rank of `self`.
    pub fn rank(&self) -> usize { self.idxs.len() }

    /// Return the shape (dimensions of each index) of `self` in a vector.
    pub fn shape(&self) -> Vec<usize> { self.data.shape().to_vec() }

    /// Return an iterator over all indices.
    pub fn indices(&self) -> std::slice::Iter<'_, T> { self.idxs.iter() }

    /// Return a view of the underlying array, with axes in the order of
    /// [`Self::indices`].
    pub fn array(&self) -> nd::ArrayViewD<'_, f64> { self.data.view() }

    fn position(&self, index: &T) -> Option<usize> {
        self.idxs.iter().position(|idx| idx == index)
    }

    /// Return the Frobenius norm.
    pub fn norm(&self) -> f64 {
        self.data.iter().map(|x| x * x).sum::<f64>().sqrt()
    }

    /// Multiply every element by `a`.
    pub fn scale(&mut self, a: f64) -> &mut Self {
        self.data.mapv_inplace(|x| x * a);
        self
    }

    /// Return the largest absolute difference between the elements of `self`
    /// and `other`, after aligning the indices of `other` to those of `self`.
    ///
    /// Fails if the two tensors don't carry the same set of indices.
    pub fn max_abs_diff(&self, other: &Self) -> TensorResult<f64> {
        let other = other.to_array(&self.idxs)?;
        Ok(
            self.data.iter().zip(other.iter())
                .map(|(a, b)| (a - b).abs())
                .fold(0.0, f64::max)
        )
    }

    /// Return a copy of the data with axes arranged in the order of `order`,
    /// which must be a permutation of the indices of `self`.
    pub fn to_array(&self, order: &[T]) -> TensorResult<nd::ArrayD<f64>> {
        if order.len() != self.idxs.len() {
            return Err(IncompatibleShape);
        }
        let perm: Vec<usize>
            = order.iter()
            .map(|idx| {
                self.position(idx)
                    .ok_or_else(|| MissingIndex(idx.label()))
            })
            .collect::<TensorResult<_>>()?;
        let shape: Vec<usize> = order.iter().map(|idx| idx.dim()).collect();
        let elems: Vec<f64>
            = self.data.view().permuted_axes(nd::IxDyn(&perm))
            .iter().copied().collect();
        nd::ArrayD::from_shape_vec(nd::IxDyn(&shape), elems)
            .map_err(|_| IncompatibleShape)
    }

    /// Replace index `old` by `new`, which must have the same dimension.
    pub fn replace_index(&mut self, old: &T, new: T) -> TensorResult<&mut Self> {
        let k = self.position(old).ok_or_else(|| MissingIndex(old.label()))?;
        if new.dim() != old.dim() { return Err(IncompatibleShape); }
        self.idxs[k] = new;
        if has_duplicates(&self.idxs) { return Err(DuplicateIndices); }
        Ok(self)
    }

    /// Apply `f` to every index, keeping dimensions.
    ///
    /// Fails if the map changes a dimension or produces duplicates.
    pub fn map_indices<F>(mut self, f: F) -> TensorResult<Self>
    where F: FnMut(T) -> T
    {
        let new: Vec<T> = self.idxs.iter().cloned().map(f).collect();
        let dims_ok
            = new.iter().zip(&self.idxs)
            .all(|(a, b)| a.dim() == b.dim());
        if !dims_ok { return Err(IncompatibleShape); }
        if has_duplicates(&new) { return Err(DuplicateIndices); }
        self.idxs = new;
        Ok(self)
    }

    /// Contract `self` with `other` over all common indices.
    ///
    /// The result carries the non-common indices of `self` followed by those
    /// of `other`, each group in its original order. Internally both operands
    /// are flattened to matrices and multiplied, so the cost is that of a
    /// single matrix product.
    ///
    /// Fails if neither operand is a scalar and there are no common indices.
    pub fn contract(&self, other: &Self) -> TensorResult<Self> {
        if let Some(a) = self.scalar() {
            let data = other.data.mapv(|b| a * b);
            return Ok(Self { idxs: other.idxs.clone(), data });
        }
        if let Some(b) = other.scalar() {
            let data = self.data.mapv(|a| a * b);
            return Ok(Self { idxs: self.idxs.clone(), data });
        }
        let common_a: Vec<usize>
            = (0..self.idxs.len())
            .filter(|k| other.idxs.contains(&self.idxs[*k]))
            .collect();
        if common_a.is_empty() { return Err(NoMatchingIndices); }
        let common_b: Vec<usize>
            = common_a.iter()
            .map(|k| {
                other.position(&self.idxs[*k])
                    .ok_or(NoMatchingIndices)
            })
            .collect::<TensorResult<_>>()?;
        let free_a: Vec<usize>
            = (0..self.idxs.len())
            .filter(|k| !common_a.contains(k))
            .collect();
        let free_b: Vec<usize>
            = (0..other.idxs.len())
            .filter(|k| !common_b.contains(k))
            .collect();
        let a = matricize(self.data.view(), &free_a, &common_a)?;
        let b = matricize(other.data.view(), &common_b, &free_b)?;
        let c = a.dot(&b);
        let idxs: Vec<T>
            = free_a.iter().map(|k| self.idxs[*k].clone())
            .chain(free_b.iter().map(|k| other.idxs[*k].clone()))
            .collect();
        let shape: Vec<usize> = idxs.iter().map(|idx| idx.dim()).collect();
        let data = reshape_dyn(&c, &shape)?;
        Ok(Self { idxs, data })
    }

    /// Singular value decomposition across the bipartition (`left`, rest).
    ///
    /// Returns `U` carrying `left` plus a new leg, the kept singular values in
    /// descending order, and `V` carrying the same new leg plus the remaining
    /// indices. The new leg is built by `new_leg` from the kept dimension. The
    /// kept singular values are renormalized so that their squares sum to one.
    ///
    /// Fails if `left` names an index `self` doesn't have, if the data are not
    /// finite, or if LAPACK reports an error.
    pub fn svd<F>(&self, left: &[T], new_leg: F, trunc: &Truncation)
        -> TensorResult<Svd<T>>
    where F: FnOnce(usize) -> T
    {
        let row: Vec<usize>
            = left.iter()
            .map(|idx| self.position(idx).ok_or_else(|| MissingIndex(idx.label())))
            .collect::<TensorResult<_>>()?;
        let col: Vec<usize>
            = (0..self.idxs.len())
            .filter(|k| !row.contains(k))
            .collect();
        if self.data.iter().any(|x| !x.is_finite()) {
            return Err(DecompositionFailure("non-finite input".into()));
        }
        let mat = matricize(self.data.view(), &row, &col)?;
        let (Some(u), s, Some(vt))
            = mat.svd_into(true, true)
                .map_err(|err| DecompositionFailure(err.to_string()))?
            else { return Err(DecompositionFailure("missing singular vectors".into())); };
        let s: Vec<f64> = s.to_vec();
        let (rank, truncerr) = trunc.rank(&s);
        if rank == 0 { return Err(DecompositionFailure("empty spectrum".into())); }
        let norm = s.iter().take(rank).map(|sk| sk * sk).sum::<f64>().sqrt();
        let s: nd::Array1<f64>
            = s.iter().take(rank)
            .map(|sk| if norm > 0.0 { sk / norm } else { *sk })
            .collect();
        let link = new_leg(rank);
        if link.dim() != rank { return Err(IncompatibleShape); }

        let u_idxs: Vec<T>
            = row.iter().map(|k| self.idxs[*k].clone())
            .chain(std::iter::once(link.clone()))
            .collect();
        let u_shape: Vec<usize> = u_idxs.iter().map(|idx| idx.dim()).collect();
        let u = reshape_dyn(&u.slice(nd::s![.., ..rank]).to_owned(), &u_shape)?;

        let v_idxs: Vec<T>
            = std::iter::once(link)
            .chain(col.iter().map(|k| self.idxs[*k].clone()))
            .collect();
        let v_shape: Vec<usize> = v_idxs.iter().map(|idx| idx.dim()).collect();
        let v = reshape_dyn(&vt.slice(nd::s![..rank, ..]).to_owned(), &v_shape)?;

        Ok(Svd {
            u: Self { idxs: u_idxs, data: u },
            s,
            v: Self { idxs: v_idxs, data: v },
            truncerr,
        })
    }

    /// Multiply the slices of `self` along `index` by `weights`.
    ///
    /// This is contraction with a diagonal matrix that keeps the index.
    pub fn scale_index(&mut self, index: &T, weights: &[f64])
        -> TensorResult<&mut Self>
    {
        let k = self.position(index).ok_or_else(|| MissingIndex(index.label()))?;
        if weights.len() != index.dim() { return Err(IncompatibleShape); }
        self.data.axis_iter_mut(nd::Axis(k))
            .zip(weights)
            .for_each(|(mut slice, w)| { slice.mapv_inplace(|x| x * w); });
        Ok(self)
    }

    /// Conjugate-transpose. Elements are real, so this is a copy; the method
    /// exists so that bra tensors read as bra tensors at the call site.
    pub fn dag(&self) -> Self { self.clone() }
}

/// Output of [`Tensor::svd`].
#[derive(Clone, Debug)]
pub struct Svd<T> {
    /// Left singular vectors.
    pub u: Tensor<T>,
    /// Kept singular values, normalized.
    pub s: nd::Array1<f64>,
    /// Right singular vectors (rows).
    pub v: Tensor<T>,
    /// Discarded weight.
    pub truncerr: f64,
}

impl Tensor<Leg> {
    /// Raise the prime level of every leg.
    pub fn prime(&self) -> Self {
        Self { idxs: self.idxs.iter().map(|l| l.primed()).collect(), data: self.data.clone() }
    }

    /// Raise the prime level of every leg carrying `tag`.
    pub fn prime_tag(&self, tag: Tag) -> Self {
        let idxs
            = self.idxs.iter()
            .map(|l| if l.has_tag(tag) { l.primed() } else { *l })
            .collect();
        Self { idxs, data: self.data.clone() }
    }

    /// Raise the prime level of one leg.
    ///
    /// Fails if `leg` is not an index of `self`.
    pub fn prime_leg(&self, leg: &Leg) -> TensorResult<Self> {
        if !self.has_index(leg) { return Err(MissingIndex(leg.label())); }
        let idxs
            = self.idxs.iter()
            .map(|l| if l == leg { l.primed() } else { *l })
            .collect();
        Ok(Self { idxs, data: self.data.clone() })
    }

    /// Reset all prime levels to zero.
    pub fn noprime(&self) -> TensorResult<Self> {
        self.clone().map_indices(Leg::noprime)
    }

    /// Return all legs carrying `tag`.
    pub fn legs_with(&self, tag: Tag) -> Vec<Leg> {
        self.idxs.iter().filter(|l| l.has_tag(tag)).copied().collect()
    }

    /// Return the leg of tag `tag` shared by `a` and `b`.
    ///
    /// Fails unless there is exactly one.
    pub fn common_leg(a: &Self, b: &Self, tag: Tag) -> TensorResult<Leg> {
        let found: Vec<Leg>
            = a.idxs.iter()
            .filter(|l| l.has_tag(tag) && b.has_index(l))
            .copied()
            .collect();
        match found.as_slice() {
            [l] => Ok(*l),
            [] => Err(AmbiguousIndex(format!("no common {tag:?} leg"))),
            _ => Err(AmbiguousIndex(format!("several common {tag:?} legs"))),
        }
    }

    /// Return the leg of tag `tag` that `a` has and `b` does not.
    ///
    /// Fails unless there is exactly one.
    pub fn unique_leg(a: &Self, b: &Self, tag: Tag) -> TensorResult<Leg> {
        let found: Vec<Leg>
            = a.idxs.iter()
            .filter(|l| l.has_tag(tag) && !b.has_index(l))
            .copied()
            .collect();
        match found.as_slice() {
            [l] => Ok(*l),
            [] => Err(AmbiguousIndex(format!("no unique {tag:?} leg"))),
            _ => Err(AmbiguousIndex(format!("several unique {tag:?} legs"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rand_tensor(legs: &[Leg], seed: u64) -> Tensor<Leg> {
        let mut x = seed as f64 + 0.5;
        Tensor::new(legs.iter().copied(), |_| {
            x = (x * 7.31 + 0.17).fract();
            x - 0.5
        }).unwrap()
    }

    #[test]
    fn contract_matches_matrix_product() {
        let (i, j, k) = (Leg::link(0, 3), Leg::site(0, 2), Leg::link(1, 4));
        let a = rand_tensor(&[i, j], 1);
        let b = rand_tensor(&[k, j], 2);
        let c = a.contract(&b).unwrap();
        assert_eq!(c.indices().copied().collect::<Vec<_>>(), vec![i, k]);
        let am = a.to_array(&[i, j]).unwrap().into_dimensionality::<nd::Ix2>().unwrap();
        let bm = b.to_array(&[j, k]).unwrap().into_dimensionality::<nd::Ix2>().unwrap();
        let expected = am.dot(&bm);
        let got = c.to_array(&[i, k]).unwrap();
        for (x, y) in expected.iter().zip(got.iter()) {
            assert!((x - y).abs() < 1e-14);
        }
    }

    #[test]
    fn full_contraction_gives_scalar() {
        let (i, j) = (Leg::link(0, 3), Leg::site(0, 2));
        let a = rand_tensor(&[i, j], 3);
        let n = a.contract(&a.dag()).unwrap();
        let norm2 = n.scalar().unwrap();
        assert!((norm2 - a.norm().powi(2)).abs() < 1e-14);
    }

    #[test]
    fn no_common_legs_is_an_error() {
        let a = rand_tensor(&[Leg::link(0, 2)], 4);
        let b = rand_tensor(&[Leg::link(1, 2)], 5);
        assert!(matches!(a.contract(&b), Err(NoMatchingIndices)));
        // priming makes a distinct leg
        let c = a.prime();
        assert!(matches!(a.contract(&c), Err(NoMatchingIndices)));
    }

    #[test]
    fn svd_reconstructs_and_truncates() {
        let (l, s0, s1, r) =
            (Leg::link(0, 2), Leg::site(0, 3), Leg::site(1, 3), Leg::link(2, 2));
        let theta = rand_tensor(&[l, s0, s1, r], 6);
        let mut theta_n = theta.clone();
        theta_n.scale(1.0 / theta.norm());
        let svd
            = theta_n.svd(&[l, s0], |d| Leg::link(1, d), &Truncation::default())
            .unwrap();
        assert_eq!(svd.s.len(), 6);
        let mut u = svd.u.clone();
        u.scale_index(&Leg::link(1, 6), svd.s.as_slice().unwrap()).unwrap();
        let back = u.contract(&svd.v).unwrap();
        assert!(back.max_abs_diff(&theta_n).unwrap() < 1e-12);

        let trunc = Truncation { maxdim: 2, mindim: 1, cutoff: 0.0 };
        let svd = theta_n.svd(&[l, s0], |d| Leg::link(1, d), &trunc).unwrap();
        assert_eq!(svd.s.len(), 2);
        let kept: f64 = svd.s.iter().map(|x| x * x).sum();
        assert!((kept - 1.0).abs() < 1e-12);
        assert!(svd.truncerr > 0.0);
    }

    #[test]
    fn svd_rejects_non_finite_data() {
        let (l, s0, s1, r) =
            (Leg::link(0, 2), Leg::site(0, 3), Leg::site(1, 3), Leg::link(2, 2));
        let mut theta = rand_tensor(&[l, s0, s1, r], 9);
        theta.data[nd::IxDyn(&[1, 2, 0, 1])] = f64::NAN;
        assert!(matches!(
            theta.svd(&[l, s0], |d| Leg::link(1, d), &Truncation::default()),
            Err(DecompositionFailure(_)),
        ));
        theta.data[nd::IxDyn(&[1, 2, 0, 1])] = f64::INFINITY;
        assert!(matches!(
            theta.svd(&[l, s0], |d| Leg::link(1, d), &Truncation::default()),
            Err(DecompositionFailure(_)),
        ));
    }

    #[test]
    fn truncation_rank_rules() {
        let s = [0.9, 0.4, 1e-3, 1e-6, 0.0];
        let t = Truncation { maxdim: 10, mindim: 1, cutoff: 1e-10 };
        assert_eq!(t.rank(&s).0, 3);
        let t = Truncation { maxdim: 10, mindim: 1, cutoff: 1e-4 };
        assert_eq!(t.rank(&s).0, 2);
        let t = Truncation { maxdim: 1, mindim: 1, cutoff: 0.0 };
        assert_eq!(t.rank(&s).0, 1);
        let t = Truncation { maxdim: 10, mindim: 3, cutoff: 1.0 };
        assert_eq!(t.rank(&s).0, 3);
        // never zero, even for a vanishing spectrum
        let t = Truncation { maxdim: 10, mindim: 1, cutoff: 1.0 };
        assert_eq!(t.rank(&[0.0, 0.0]).0, 1);
        assert_eq!(t.rank(&[1.0, 0.0]).0, 1);
    }

    #[test]
    fn leg_lookups() {
        let a = rand_tensor(&[Leg::link(0, 2), Leg::site(0, 3), Leg::link(1, 2)], 7);
        let b = rand_tensor(&[Leg::link(1, 2), Leg::site(1, 3), Leg::link(2, 2)], 8);
        assert_eq!(Tensor::common_leg(&a, &b, Tag::Link).unwrap(), Leg::link(1, 2));
        assert_eq!(Tensor::unique_leg(&a, &b, Tag::Link).unwrap(), Leg::link(0, 2));
        assert!(Tensor::common_leg(&a, &b, Tag::Site).is_err());
        let c = a.prime();
        assert!(Tensor::unique_leg(&a, &c, Tag::Link).is_err());
    }
}
