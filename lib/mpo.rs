//! Matrix product operator for the spin-1 Heisenberg chain.
//!
//! The Hamiltonian
//! *H* = Σ<sub>*i*</sub> [
//!   *S*<sup>*z*</sup><sub>*i*</sub> *S*<sup>*z*</sup><sub>*i*+1</sub>
//!   + ½ (*S*<sup>+</sup><sub>*i*</sub> *S*<sup>–</sup><sub>*i*+1</sub>
//!   + *S*<sup>–</sup><sub>*i*</sub> *S*<sup>+</sup><sub>*i*+1</sub>)
//! ]
//! is written as a product of upper-triangular 5 × 5 operator-valued matrices
//! over the channels
//!
//! | channel | meaning |
//! |---|---|
//! | 0 | no term started |
//! | 1 | *S*<sup>+</sup> emitted, waiting for *S*<sup>–</sup> |
//! | 2 | *S*<sup>–</sup> emitted, waiting for *S*<sup>+</sup> |
//! | 3 | *S*<sup>*z*</sup> emitted, waiting for *S*<sup>*z*</sup> |
//! | 4 | term finished |
//!
//! with boundary vectors selecting channel 0 on the left and channel 4 on the
//! right.

use ndarray as nd;
use crate::{
    sites::{ SpinOne, SPIN_ONE_DIM, IDMAT, SMMAT, SPMAT, SZMAT },
    tensor::{ Leg, Tensor, TensorResult },
};

/// Bond dimension of the Heisenberg MPO.
pub const HEISENBERG_DIM: usize = 5;

/// Arguments for MPO construction.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct MPOArgs {
    /// Treat the chain as a window of two unit cells inside an infinite
    /// chain.
    pub infinite: bool,
}

/// Matrix product operator over a chain of spin-1 sites.
///
/// Each site carries one rank-4 array `W[a, b, s', s]`, where `a`/`b` are the
/// left/right MPO bonds.
#[derive(Clone, Debug, PartialEq)]
pub struct MPO {
    w: Vec<nd::Array4<f64>>,
    lbound: nd::Array1<f64>,
    rbound: nd::Array1<f64>,
    infinite: bool,
}

fn heisenberg_w() -> nd::Array4<f64> {
    let d = SPIN_ONE_DIM;
    let mut w: nd::Array4<f64> = nd::Array4::zeros((HEISENBERG_DIM, HEISENBERG_DIM, d, d));
    let mut set = |a: usize, b: usize, op: &nd::Array2<f64>, c: f64| {
        w.slice_mut(nd::s![a, b, .., ..]).assign(&(op * c));
    };
    set(0, 0, &*IDMAT, 1.0);
    set(4, 4, &*IDMAT, 1.0);
    set(0, 1, &*SPMAT, 1.0);
    set(0, 2, &*SMMAT, 1.0);
    set(0, 3, &*SZMAT, 1.0);
    set(1, 4, &*SMMAT, 0.5);
    set(2, 4, &*SPMAT, 0.5);
    set(3, 4, &*SZMAT, 1.0);
    w
}

fn unit(k: usize) -> nd::Array1<f64> {
    nd::Array1::from_shape_fn(HEISENBERG_DIM, |j| if j == k { 1.0 } else { 0.0 })
}

impl MPO {
    /// Build the Heisenberg MPO on `sites`.
    pub fn heisenberg(sites: &SpinOne, args: MPOArgs) -> Self {
        let w0 = heisenberg_w();
        Self {
            w: vec![w0; sites.n()],
            lbound: unit(0),
            rbound: unit(HEISENBERG_DIM - 1),
            infinite: args.infinite,
        }
    }

    /// Return the number of sites.
    pub fn n(&self) -> usize { self.w.len() }

    /// Return the MPO bond dimension.
    pub fn bond_dim(&self) -> usize { self.lbound.len() }

    /// Return `true` if the MPO describes a window of an infinite chain.
    pub fn is_infinite(&self) -> bool { self.infinite }

    /// Return the MPO tensor of site `k` with legs `[w_k, w_{k+1}, s_k', s_k]`.
    pub fn site_tensor(&self, k: usize) -> TensorResult<Tensor<Leg>> {
        let w = &self.w[k];
        let (dl, dr, d, _) = w.dim();
        let s = Leg::site(k, d);
        Tensor::from_array(
            [Leg::mpo_link(k, dl), Leg::mpo_link(k + 1, dr), s.primed(), s],
            w.clone(),
        )
    }

    /// Return the trivial left edge of the chain: the left boundary vector
    /// with legs `[w_0, l_0, l_0']`, where `l_0` has dimension 1.
    pub fn left_edge(&self) -> TensorResult<Tensor<Leg>> {
        let l = Leg::link(0, 1);
        Tensor::new(
            [Leg::mpo_link(0, self.bond_dim()), l, l.primed()],
            |k| self.lbound[k[0]],
        )
    }

    /// Return the trivial right edge of the chain: the right boundary vector
    /// with legs `[w_n, l_n, l_n']`, where `l_n` has dimension 1.
    pub fn right_edge(&self) -> TensorResult<Tensor<Leg>> {
        let n = self.n();
        let l = Leg::link(n, 1);
        Tensor::new(
            [Leg::mpo_link(n, self.bond_dim()), l, l.primed()],
            |k| self.rbound[k[0]],
        )
    }

    /// Exchange the left and right halves of the window.
    ///
    /// Used when an infinite window is regrown: the old right half becomes
    /// the new left half and vice versa. Tensors are addressed by site
    /// number, so legs need no relabeling.
    pub fn swap_unit_cells(&mut self) {
        let half = self.w.len() / 2;
        self.w.rotate_left(half);
    }

    /// Contract the whole operator into a dense matrix of size
    /// *d*<sup>*n*</sup> × *d*<sup>*n*</sup>, with site 0 as the most
    /// significant digit of both row and column indices.
    ///
    /// This is only feasible for small *n*.
    pub fn to_dense(&self) -> nd::Array2<f64> {
        let chi = self.bond_dim();
        // one partial product per open MPO channel
        let mut acc: Vec<nd::Array2<f64>>
            = self.lbound.iter()
            .map(|c| nd::Array2::from_elem((1, 1), *c))
            .collect();
        for w in self.w.iter() {
            let next: Vec<nd::Array2<f64>>
                = (0..chi)
                .map(|b| {
                    acc.iter().enumerate()
                        .map(|(a, m)| kron(m, &w.slice(nd::s![a, b, .., ..])))
                        .reduce(|x, y| x + y)
                        .unwrap_or_else(|| nd::Array2::zeros((1, 1)))
                })
                .collect();
            acc = next;
        }
        acc.into_iter().zip(self.rbound.iter())
            .map(|(m, c)| m * *c)
            .reduce(|x, y| x + y)
            .unwrap_or_else(|| nd::Array2::zeros((1, 1)))
    }
}

fn kron(a: &nd::Array2<f64>, b: &nd::ArrayView2<f64>) -> nd::Array2<f64> {
    let (m, n) = a.dim();
    let (p, q) = b.dim();
    nd::Array2::from_shape_fn(
        (m * p, n * q),
        |(i, j)| a[[i / p, j / q]] * b[[i % p, j % q]],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray_linalg::{ Eigh, UPLO };

    #[test]
    fn two_site_dense_matches_exchange() {
        let sites = SpinOne::new(2).unwrap();
        let h = MPO::heisenberg(&sites, MPOArgs::default()).to_dense();
        assert_eq!(h.dim(), (9, 9));
        // symmetric
        assert!((&h - &h.t()).iter().all(|x| x.abs() < 1e-14));
        // S_1·S_2 = (S_tot² − 4) / 2 has eigenvalues −2, −1, 1
        let (e, _) = h.eigh(UPLO::Lower).unwrap();
        assert!((e[0] + 2.0).abs() < 1e-12);
        assert!((e[1] + 1.0).abs() < 1e-12);
        assert!((e[8] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn edges_and_site_tensors() {
        let sites = SpinOne::new(4).unwrap();
        let h = MPO::heisenberg(&sites, MPOArgs { infinite: true });
        assert!(h.is_infinite());
        let w = h.site_tensor(2).unwrap();
        assert_eq!(w.shape(), vec![5, 5, 3, 3]);
        assert!(w.has_index(&Leg::mpo_link(3, 5)));
        let l = h.left_edge().unwrap();
        assert_eq!(l.shape(), vec![5, 1, 1]);
        let r = h.right_edge().unwrap();
        assert!(r.has_index(&Leg::mpo_link(4, 5)));
        let mut g = h.clone();
        g.swap_unit_cells();
        assert_eq!(g, h);
    }
}
