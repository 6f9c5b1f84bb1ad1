//! Finite matrix product states over a window of spin-1 sites.
//!
//! Site tensors always have legs `[l_k, s_k, l_{k+1}]`, in that order. The
//! state is kept in mixed-canonical form: every tensor left of the
//! orthogonality center is left-orthonormal, every tensor right of it is
//! right-orthonormal, and the center carries the norm.
//!
//! ```text
//!  l0    l1    l2         l(n-1)      ln
//! ---A0----A1----C2-- ... ----B(n-1)----
//!     |     |     |            |
//!     s0    s1    s2           s(n-1)
//! ```

use ndarray as nd;
use thiserror::Error;
use crate::{
    sites::{ SitesError, SpinOne },
    tensor::{ Leg, Tag, Tensor, TensorError, Truncation },
};

#[derive(Debug, Error)]
pub enum MPSError {
    /// Returned when attempting to create a new MPS for a state of less than 1
    /// particle.
    #[error("error in MPS creation: cannot create for an empty system")]
    EmptySystem,

    /// Returned when the number of sites is not a whole number of two-site
    /// periods.
    #[error("error in MPS creation: site count {0} is odd")]
    OddSystem(usize),

    /// Returned when a site or bond number is out of bounds.
    #[error("error in MPS access: position {0} out of bounds")]
    OutOfBounds(usize),

    /// Returned when a two-site tensor doesn't carry the legs of the bond it
    /// is supposed to replace.
    #[error("error in MPS update: two-site tensor does not match bond {0}")]
    BondMismatch(usize),

    #[error(transparent)]
    Sites(#[from] SitesError),

    #[error(transparent)]
    Tensor(#[from] TensorError),
}
use MPSError::*;
pub type MPSResult<T> = Result<T, MPSError>;

/// Product-state initializer: one basis state label per site.
///
/// Every site starts in the first basis state (`"Up"`) until set otherwise.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InitState {
    sites: SpinOne,
    states: Vec<usize>,
}

impl InitState {
    /// Create a new initializer with all sites in the first basis state.
    pub fn new(sites: &SpinOne) -> Self {
        Self { sites: *sites, states: vec![0; sites.n()] }
    }

    /// Set site `k` to the state named `label`.
    pub fn set(&mut self, k: usize, label: &str) -> MPSResult<&mut Self> {
        let state = self.sites.state(label)?;
        let slot = self.states.get_mut(k).ok_or(OutOfBounds(k))?;
        *slot = state;
        Ok(self)
    }

    /// Put `first` on sites 0, 2, 4, ... and `second` on sites 1, 3, 5, ...
    ///
    /// With the usual 1-based site numbering this is `first` on odd and
    /// `second` on even sites.
    ///
    /// Fails if the number of sites is odd, so that the pattern repeats.
    pub fn alternating(sites: &SpinOne, first: &str, second: &str)
        -> MPSResult<Self>
    {
        if sites.n() % 2 != 0 { return Err(OddSystem(sites.n())); }
        let mut init = Self::new(sites);
        for k in 0..sites.n() {
            init.set(k, if k % 2 == 0 { first } else { second })?;
        }
        Ok(init)
    }

    /// Return the number of sites.
    pub fn n(&self) -> usize { self.states.len() }

    /// Return the basis state index of every site.
    pub fn states(&self) -> &[usize] { &self.states }
}

/// Direction in which the orthogonality center moves across a bond.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Dir {
    /// From site `b` to site `b + 1`.
    Right,
    /// From site `b + 1` to site `b`.
    Left,
}

/// Output of [`MPS::split`].
#[derive(Clone, Debug)]
pub struct Split {
    /// Kept singular values on the split bond.
    pub s: nd::Array1<f64>,
    /// Discarded weight.
    pub truncerr: f64,
}

/// A finite matrix product state in mixed-canonical form.
#[derive(Clone, Debug, PartialEq)]
pub struct MPS {
    // site tensors, legs [l_k, s_k, l_{k+1}]
    data: Vec<Tensor<Leg>>,
    // orthogonality center
    center: usize,
}

impl MPS {
    /// Materialize a product state: bond dimension 1 everywhere.
    ///
    /// Fails if the chain is empty or has an odd number of sites.
    pub fn from_init(init: &InitState) -> MPSResult<Self> {
        let n = init.n();
        if n == 0 { return Err(EmptySystem); }
        if n % 2 != 0 { return Err(OddSystem(n)); }
        let data: Vec<Tensor<Leg>>
            = init.states().iter().enumerate()
            .map(|(k, st)| -> MPSResult<Tensor<Leg>> {
                let s = init.sites.site_leg(k)?;
                let t = Tensor::new(
                    [Leg::link(k, 1), s, Leg::link(k + 1, 1)],
                    |i| if i[1] == *st { 1.0 } else { 0.0 },
                )?;
                Ok(t)
            })
            .collect::<MPSResult<_>>()?;
        Ok(Self { data, center: 0 })
    }

    /// Build from raw site tensors with a given center. Tensors must carry
    /// legs `[l_k, s_k, l_{k+1}]` in order.
    pub(crate) fn from_tensors(data: Vec<Tensor<Leg>>, center: usize)
        -> MPSResult<Self>
    {
        if data.is_empty() { return Err(EmptySystem); }
        if center >= data.len() { return Err(OutOfBounds(center)); }
        Ok(Self { data, center })
    }

    /// Return the number of sites.
    pub fn n(&self) -> usize { self.data.len() }

    /// Return the position of the orthogonality center.
    pub fn center(&self) -> usize { self.center }

    /// Return the tensor of site `k`.
    pub fn site(&self, k: usize) -> &Tensor<Leg> { &self.data[k] }

    /// Return all site tensors.
    pub fn sites(&self) -> &[Tensor<Leg>] { &self.data }

    /// Return the bond leg `l_k` to the left of site `k`; `k == n` gives the
    /// right edge.
    pub fn link(&self, k: usize) -> MPSResult<Leg> {
        let n = self.n();
        let t
            = match k.cmp(&n) {
                std::cmp::Ordering::Less => &self.data[k],
                std::cmp::Ordering::Equal => &self.data[n - 1],
                std::cmp::Ordering::Greater => { return Err(OutOfBounds(k)); },
            };
        t.indices()
            .find(|l| l.has_tag(Tag::Link) && l.pos == k && l.prime == 0)
            .copied()
            .ok_or(OutOfBounds(k))
    }

    /// Return the physical leg of site `k`.
    pub fn site_leg(&self, k: usize) -> MPSResult<Leg> {
        let t = self.data.get(k).ok_or(OutOfBounds(k))?;
        t.indices()
            .find(|l| l.has_tag(Tag::Site))
            .copied()
            .ok_or(OutOfBounds(k))
    }

    /// Return the dimension of bond `k`.
    pub fn link_dim(&self, k: usize) -> MPSResult<usize> {
        self.link(k).map(|l| l.dim)
    }

    /// Return the largest bond dimension over the interior bonds.
    pub fn max_link_dim(&self) -> usize {
        (1..self.n())
            .filter_map(|k| self.link_dim(k).ok())
            .max()
            .unwrap_or(1)
    }

    /// Return the two-site tensor of sites `b` and `b + 1`, with legs
    /// `[l_b, s_b, s_{b+1}, l_{b+2}]`.
    pub fn bond_tensor(&self, b: usize) -> MPSResult<Tensor<Leg>> {
        if b + 1 >= self.n() { return Err(OutOfBounds(b)); }
        Ok(self.data[b].contract(&self.data[b + 1])?)
    }

    /// Replace sites `b` and `b + 1` by the truncated SVD of `theta`, moving
    /// the orthogonality center one site in direction `dir`.
    ///
    /// `theta` must carry the legs `[l_b, s_b, s_{b+1}, l_{b+2}]` of the bond.
    /// Moving right leaves `U` on site `b` and `S V` on site `b + 1`; moving
    /// left leaves `U S` on site `b` and `V` on site `b + 1`.
    pub fn split(
        &mut self,
        b: usize,
        theta: &Tensor<Leg>,
        trunc: &Truncation,
        dir: Dir,
    ) -> MPSResult<Split>
    {
        if b + 1 >= self.n() { return Err(OutOfBounds(b)); }
        let lb = self.link(b)?;
        let sb = self.site_leg(b)?;
        let sb1 = self.site_leg(b + 1)?;
        let lb2 = self.link(b + 2)?;
        let matches
            = theta.rank() == 4
            && [lb, sb, sb1, lb2].iter().all(|l| theta.has_index(l));
        if !matches { return Err(BondMismatch(b)); }
        let svd = theta.svd(&[lb, sb], |d| Leg::link(b + 1, d), trunc)?;
        let link = Leg::link(b + 1, svd.s.len());
        let s = svd.s.to_vec();
        let (mut u, mut v) = (svd.u, svd.v);
        match dir {
            Dir::Right => {
                v.scale_index(&link, &s)?;
                self.center = b + 1;
            },
            Dir::Left => {
                u.scale_index(&link, &s)?;
                self.center = b;
            },
        }
        self.data[b] = u;
        self.data[b + 1] = v;
        Ok(Split { s: svd.s, truncerr: svd.truncerr })
    }

    /// Move the orthogonality center to site `k` with two-site moves,
    /// truncating according to `trunc`.
    pub fn position(&mut self, k: usize, trunc: &Truncation) -> MPSResult<()> {
        if k >= self.n() { return Err(OutOfBounds(k)); }
        while self.center < k {
            let b = self.center;
            let theta = self.bond_tensor(b)?;
            self.split(b, &theta, trunc, Dir::Right)?;
        }
        while self.center > k {
            let b = self.center - 1;
            let theta = self.bond_tensor(b)?;
            self.split(b, &theta, trunc, Dir::Left)?;
        }
        Ok(())
    }

    /// Return the norm of the state, read off the center tensor.
    pub fn norm(&self) -> f64 { self.data[self.center].norm() }

    /// Contract the whole chain into a state vector with site 0 as the most
    /// significant digit. Edge bonds are summed over.
    ///
    /// This is only feasible for small windows.
    pub fn to_vector(&self) -> MPSResult<nd::Array1<f64>> {
        let n = self.n();
        let mut acc = self.data[0].clone();
        for t in self.data.iter().skip(1) {
            acc = acc.contract(t)?;
        }
        let mut order: Vec<Leg>
            = (0..n).map(|k| self.site_leg(k)).collect::<MPSResult<_>>()?;
        order.push(self.link(0)?);
        order.push(self.link(n)?);
        let full = acc.to_array(&order)?;
        let phys: usize = full.shape()[..n].iter().product();
        let edges = full.len() / phys;
        let mat
            = nd::Array2::from_shape_vec((phys, edges), full.iter().copied().collect())
            .map_err(|_| TensorError::IncompatibleShape)?;
        Ok(mat.sum_axis(nd::Axis(1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn neel(n: usize) -> MPS {
        let sites = SpinOne::new(n).unwrap();
        let init = InitState::alternating(&sites, "Up", "Dn").unwrap();
        MPS::from_init(&init).unwrap()
    }

    #[test]
    fn product_state_from_labels() {
        let psi = neel(4);
        assert_eq!(psi.n(), 4);
        assert_eq!(psi.center(), 0);
        assert_eq!(psi.max_link_dim(), 1);
        let v = psi.to_vector().unwrap();
        // |Up Dn Up Dn> = digits (0, 2, 0, 2) in base 3
        let k = 2 * 9 + 2;
        assert_eq!(v.len(), 81);
        assert!((v[k] - 1.0).abs() < 1e-15);
        assert!((v.iter().map(|x| x * x).sum::<f64>() - 1.0).abs() < 1e-15);
    }

    #[test]
    fn init_errors() {
        let sites = SpinOne::new(3).unwrap();
        let init = InitState::new(&sites);
        assert!(matches!(MPS::from_init(&init), Err(OddSystem(3))));
        assert!(matches!(InitState::alternating(&sites, "Up", "Dn"), Err(OddSystem(3))));
        let sites = SpinOne::new(2).unwrap();
        let mut init = InitState::new(&sites);
        assert!(matches!(init.set(0, "Sideways"), Err(Sites(_))));
        assert!(matches!(init.set(2, "Up"), Err(OutOfBounds(2))));
        init.set(1, "Z0").unwrap();
        assert_eq!(init.states(), &[0, 1]);
    }

    #[test]
    fn split_and_position_preserve_state() {
        let mut psi = neel(4);
        // rotate the middle bond into an entangled state
        let theta
            = Tensor::new(
                [psi.link(1).unwrap(), psi.site_leg(1).unwrap(),
                 psi.site_leg(2).unwrap(), psi.link(3).unwrap()],
                |k| if k[1] + k[2] == 2 { 1.0 / 3.0_f64.sqrt() } else { 0.0 },
            ).unwrap();
        psi.position(1, &Truncation::default()).unwrap();
        let split = psi.split(1, &theta, &Truncation::default(), Dir::Right).unwrap();
        assert_eq!(split.s.len(), 3);
        assert_eq!(psi.center(), 2);
        assert_eq!(psi.link_dim(2).unwrap(), 3);
        let before = psi.to_vector().unwrap();
        psi.position(0, &Truncation::default()).unwrap();
        assert_eq!(psi.center(), 0);
        let after = psi.to_vector().unwrap();
        let diff = (&before - &after).iter().map(|x| x.abs()).fold(0.0, f64::max);
        assert!(diff < 1e-12, "state changed by {diff}");
        assert!((psi.norm() - 1.0).abs() < 1e-12);

        let bad = Tensor::new([psi.link(0).unwrap()], |_| 1.0).unwrap();
        assert!(matches!(
            psi.split(0, &bad, &Truncation::default(), Dir::Right),
            Err(BondMismatch(0)),
        ));
    }

    #[test]
    fn split_reports_decomposition_failure() {
        let mut psi = neel(4);
        let legs
            = [psi.link(0).unwrap(), psi.site_leg(0).unwrap(),
               psi.site_leg(1).unwrap(), psi.link(2).unwrap()];
        let theta
            = Tensor::new(legs, |k| if k[1] == 1 { f64::NAN } else { 1.0 })
            .unwrap();
        let before = psi.clone();
        assert!(matches!(
            psi.split(0, &theta, &Truncation::default(), Dir::Right),
            Err(MPSError::Tensor(TensorError::DecompositionFailure(_))),
        ));
        assert_eq!(psi, before);
    }
}
