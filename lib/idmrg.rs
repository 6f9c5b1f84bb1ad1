//! Infinite density matrix renormalization group (iDMRG).
//!
//! The state is optimized on a window of two unit cells, `n = 2 nuc` sites,
//! embedded between a left and a right edge tensor that summarize the
//! (growing) environment:
//!
//! ```text
//!   .---                                   ---.
//!   |    l0    l1           l(n-1)     ln     |
//!   | HL ---A0----A1-- ... ----B(n-1)---- HR  |
//!   |  |     |     |             |        |   |
//!   |  w0 ---W0----W1-- ... ----W(n-1)--- wn  |
//!   |  |     |     |             |        |   |
//!   |    ---A0'---A1'- ... ----B(n-1)'---     |
//!   '---                                   ---'
//! ```
//!
//! Every sweep runs two-site updates left to right and back. Between sweeps
//! the window is regrown: its left half is absorbed into `HL`, its right half
//! into `HR`, the halves are exchanged, and the new window is seeded with
//! McCulloch's prediction
//! Λ · *B*<sub>nuc</sub>⋯*B*<sub>n–1</sub> · Λ<sub>prev</sub><sup>–1</sup>
//! · *A*<sub>0</sub>⋯*A*<sub>nuc–1</sub> · Λ.
//! Each growth step adds `n` sites to the represented chain.
//!
//! Energies are read off the two-site eigenvalue of the last bond update of
//! a sweep, which is the energy of the whole represented chain. Differences
//! between consecutive sweeps give the energy of one window in the bulk.

use ndarray as nd;
use thiserror::Error;
use crate::{
    correlation::{ CorrError, InfiniteMPS },
    lanczos::{ lanczos, LanczosArgs, LanczosError },
    mpo::MPO,
    mps::{ Dir, MPS, MPSError },
    sweeps::{ SweepParams, Sweeps },
    tensor::{ Leg, Tensor, TensorError, Truncation },
};

#[derive(Debug, Error)]
pub enum IDMRGError {
    /// Returned when the MPO and the MPS cover different numbers of sites.
    #[error("error in DMRG: MPO has {0} sites but MPS has {1}")]
    LengthMismatch(usize, usize),

    /// Returned when iDMRG is given an MPO not marked as infinite.
    #[error("error in iDMRG: MPO is not marked infinite")]
    FiniteMPO,

    /// Returned when iDMRG is given a window that isn't two unit cells.
    #[error("error in iDMRG: window of {0} sites is not two unit cells")]
    OddWindow(usize),

    /// Returned when an environment tensor is requested before it has been
    /// computed.
    #[error("error in DMRG: no environment at bond {0}")]
    MissingEnvironment(usize),

    /// Returned when the two ends of the window, which stand for the same
    /// bond of the infinite chain, have different dimensions.
    #[error("error in iDMRG: window edges have dimensions {0} and {1}")]
    EdgeMismatch(usize, usize),

    #[error(transparent)]
    Tensor(#[from] TensorError),

    #[error(transparent)]
    MPS(#[from] MPSError),

    #[error(transparent)]
    Lanczos(#[from] LanczosError),

    #[error(transparent)]
    Corr(#[from] CorrError),
}
use IDMRGError::*;
pub type IDMRGResult<T> = Result<T, IDMRGError>;

/// Extra controls for [`idmrg`] and [`dmrg`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct IDMRGArgs {
    /// Verbosity of observer callbacks: per-bond reports are only made at
    /// level 2 and above.
    pub output_level: usize,
    /// Stop early when the energy per site changes by less than this between
    /// two consecutive sweeps.
    pub energy_tol: Option<f64>,
    /// Relative cutoff below which singular values are treated as zero when
    /// inverting Λ<sub>prev</sub>.
    pub pinv_cutoff: f64,
    /// Residual tolerance of the local eigensolver.
    pub lanczos_tol: f64,
}

impl Default for IDMRGArgs {
    fn default() -> Self {
        Self {
            output_level: 1,
            energy_tol: None,
            pinv_cutoff: 1e-8,
            lanczos_tol: 1e-10,
        }
    }
}

/// Report on a single two-site update.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BondInfo {
    /// Sweep number, counting from 1.
    pub sweep: usize,
    /// Left site of the updated bond.
    pub bond: usize,
    pub dir: Dir,
    /// Two-site eigenvalue.
    pub energy: f64,
    /// Discarded weight of the truncation.
    pub truncerr: f64,
    /// Kept bond dimension.
    pub linkdim: usize,
    /// Residual norm of the eigensolver.
    pub residual: f64,
    /// Operator applications used by the eigensolver.
    pub iterations: usize,
}

/// Report on a finished sweep.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SweepInfo {
    /// Sweep number, counting from 1.
    pub sweep: usize,
    /// Total number of scheduled sweeps.
    pub nsweep: usize,
    pub params: SweepParams,
    /// Eigenvalue of the last bond update: the energy of the whole
    /// represented chain.
    pub chain_energy: f64,
    /// Energy of one window (`n` sites) in the bulk.
    pub energy: f64,
    /// `energy / n`.
    pub energy_per_site: f64,
    /// Largest bond dimension in the window.
    pub maxlinkdim: usize,
    /// Largest discarded weight over the sweep.
    pub truncerr: f64,
    /// Number of sites of the represented chain.
    pub chain_len: usize,
}

/// Receives progress reports from [`idmrg`] and [`dmrg`].
///
/// All methods default to doing nothing.
pub trait Observer {
    /// Called after every bond update when the output level is at least 2.
    fn bond_done(&mut self, _info: &BondInfo) { }

    /// Called when the local eigensolver runs out of its iteration budget
    /// before converging. The best available vector is used regardless.
    fn local_nonconvergence(&mut self, _info: &BondInfo) { }

    /// Called after every sweep.
    fn sweep_done(&mut self, _info: &SweepInfo) { }
}

/// An [`Observer`] that ignores everything.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoObserver;

impl Observer for NoObserver { }

/// Left and right edge tensors of a window, with legs `[w_0, l_0, l_0']` and
/// `[w_n, l_n, l_n']`.
#[derive(Clone, Debug, PartialEq)]
pub struct Edges {
    pub left: Tensor<Leg>,
    pub right: Tensor<Leg>,
}

/// Output of [`idmrg`].
#[derive(Clone, Debug)]
pub struct IDMRGOutput {
    /// Energy of one window (`n` sites) in the bulk; divide by `n` for the
    /// energy per site.
    pub energy: f64,
    /// The converged unit cell.
    pub psi: InfiniteMPS,
    /// The final window, right-canonical with the center on site 0.
    pub window: MPS,
    /// The MPO in the arrangement matching `window`.
    pub mpo: MPO,
    /// Environment of the final window.
    pub edges: Edges,
    /// Singular values on the middle bond at the last growth step.
    pub lambda: Vec<f64>,
    /// Eigenvalue of the last bond update.
    pub chain_energy: f64,
    /// Number of sweeps performed.
    pub sweeps: usize,
    /// Number of local solves that ran out of their iteration budget.
    pub local_nonconvergences: usize,
    /// Largest discarded weight over the last sweep.
    pub truncerr: f64,
}

/// Output of [`dmrg`].
#[derive(Clone, Debug)]
pub struct DMRGOutput {
    /// Ground state energy of the finite chain.
    pub energy: f64,
    /// Optimized state, right-canonical with the center on site 0.
    pub psi: MPS,
    /// Number of local solves that ran out of their iteration budget.
    pub local_nonconvergences: usize,
    /// Largest discarded weight over the last sweep.
    pub truncerr: f64,
}

/// Grow a left environment by one site: `L * A * W * dag(prime(A))`.
///
/// `l` has legs `[w_k, l_k, l_k']` and the result `[l_{k+1}, w_{k+1},
/// l_{k+1}']` (up to order).
pub fn extend_left(l: &Tensor<Leg>, a: &Tensor<Leg>, w: &Tensor<Leg>)
    -> IDMRGResult<Tensor<Leg>>
{
    Ok(l.contract(a)?.contract(w)?.contract(&a.dag().prime())?)
}

/// Grow a right environment by one site: `R * B * W * dag(prime(B))`.
pub fn extend_right(r: &Tensor<Leg>, b: &Tensor<Leg>, w: &Tensor<Leg>)
    -> IDMRGResult<Tensor<Leg>>
{
    Ok(r.contract(b)?.contract(w)?.contract(&b.dag().prime())?)
}

// Environment tensors cached per bond: `left[k]` covers sites 0..k plus the
// left edge, `right[k]` covers sites k..n plus the right edge.
#[derive(Clone, Debug)]
struct Environments {
    left: Vec<Option<Tensor<Leg>>>,
    right: Vec<Option<Tensor<Leg>>>,
}

impl Environments {
    fn new(n: usize, edges: Edges) -> Self {
        let mut left = vec![None; n + 1];
        let mut right = vec![None; n + 1];
        left[0] = Some(edges.left);
        right[n] = Some(edges.right);
        Self { left, right }
    }

    fn left(&self, k: usize) -> IDMRGResult<&Tensor<Leg>> {
        self.left.get(k).and_then(|l| l.as_ref()).ok_or(MissingEnvironment(k))
    }

    fn right(&self, k: usize) -> IDMRGResult<&Tensor<Leg>> {
        self.right.get(k).and_then(|r| r.as_ref()).ok_or(MissingEnvironment(k))
    }

    fn set_left(&mut self, k: usize, l: Tensor<Leg>) { self.left[k] = Some(l); }

    fn set_right(&mut self, k: usize, r: Tensor<Leg>) { self.right[k] = Some(r); }

    fn edges(&self) -> IDMRGResult<Edges> {
        let n = self.left.len() - 1;
        Ok(Edges { left: self.left(0)?.clone(), right: self.right(n)?.clone() })
    }
}

#[derive(Copy, Clone, Debug)]
struct SweepStats {
    energy: f64,
    truncerr: f64,
}

// 1 / x above a relative threshold, 0 below
fn pinv(x: &[f64], cutoff: f64) -> Vec<f64> {
    let max = x.iter().copied().fold(0.0, f64::max);
    x.iter()
        .map(|xk| if *xk > cutoff * max && *xk > 0.0 { 1.0 / xk } else { 0.0 })
        .collect()
}

// shift the position of every leg of `t` by `shift`, which may be negative
fn shifted(t: &Tensor<Leg>, shift: isize) -> IDMRGResult<Tensor<Leg>> {
    Ok(
        t.clone()
            .map_indices(|l| l.moved((l.pos as isize + shift) as usize))?
    )
}

struct Solver<'o, O> {
    psi: MPS,
    mpo: MPO,
    env: Environments,
    args: IDMRGArgs,
    observer: &'o mut O,
    nonconv: usize,
}

impl<'o, O> Solver<'o, O>
where O: Observer
{
    // bring `psi` to right-canonical form with the center on site 0 and
    // compute all right environments
    fn new(
        mut psi: MPS,
        mpo: MPO,
        edges: Edges,
        args: IDMRGArgs,
        observer: &'o mut O,
    ) -> IDMRGResult<Self>
    {
        let n = psi.n();
        if mpo.n() != n { return Err(LengthMismatch(mpo.n(), n)); }
        psi.position(0, &Truncation::default())?;
        let mut env = Environments::new(n, edges);
        for k in (1..n).rev() {
            let r = extend_right(env.right(k + 1)?, psi.site(k), &mpo.site_tensor(k)?)?;
            env.set_right(k, r);
        }
        Ok(Self { psi, mpo, env, args, observer, nonconv: 0 })
    }

    fn update_bond(
        &mut self,
        sweep: usize,
        b: usize,
        dir: Dir,
        params: &SweepParams,
    ) -> IDMRGResult<BondInfo>
    {
        let theta = self.psi.bond_tensor(b)?;
        let order: Vec<Leg> = theta.indices().copied().collect();
        let shape = theta.shape();
        let start: nd::Array1<f64> = theta.array().iter().copied().collect();
        let w0 = self.mpo.site_tensor(b)?;
        let w1 = self.mpo.site_tensor(b + 1)?;

        let lenv = self.env.left(b)?;
        let renv = self.env.right(b + 2)?;
        let apply = |v: &nd::Array1<f64>| -> IDMRGResult<nd::Array1<f64>> {
            let data
                = nd::ArrayD::from_shape_vec(nd::IxDyn(&shape), v.to_vec())
                .map_err(|_| TensorError::IncompatibleShape)?;
            let t = Tensor::from_array(order.iter().copied(), data)?;
            let hv
                = lenv.contract(&t)?
                .contract(&w0)?
                .contract(&w1)?
                .contract(renv)?
                .noprime()?;
            Ok(hv.to_array(&order)?.iter().copied().collect())
        };
        let lanczos_args
            = LanczosArgs { max_iter: params.niter, tol: self.args.lanczos_tol };
        let eig = lanczos(apply, &start, &lanczos_args)?;

        let data
            = nd::ArrayD::from_shape_vec(nd::IxDyn(&shape), eig.vector.to_vec())
            .map_err(|_| TensorError::IncompatibleShape)?;
        let theta = Tensor::from_array(order.iter().copied(), data)?;
        let split = self.psi.split(b, &theta, &params.truncation(), dir)?;
        match dir {
            Dir::Right => {
                let l = extend_left(self.env.left(b)?, self.psi.site(b), &w0)?;
                self.env.set_left(b + 1, l);
            },
            Dir::Left => {
                let r = extend_right(self.env.right(b + 2)?, self.psi.site(b + 1), &w1)?;
                self.env.set_right(b + 1, r);
            },
        }

        let info = BondInfo {
            sweep,
            bond: b,
            dir,
            energy: eig.value,
            truncerr: split.truncerr,
            linkdim: split.s.len(),
            residual: eig.residual,
            iterations: eig.iterations,
        };
        if !eig.converged {
            self.nonconv += 1;
            self.observer.local_nonconvergence(&info);
        }
        if self.args.output_level >= 2 { self.observer.bond_done(&info); }
        Ok(info)
    }

    // one full left-to-right and right-to-left pass, starting and ending with
    // the center on site 0
    fn sweep(&mut self, sweep: usize, params: &SweepParams)
        -> IDMRGResult<SweepStats>
    {
        let n = self.psi.n();
        let mut energy = f64::NAN;
        let mut truncerr: f64 = 0.0;
        for b in 0..n - 1 {
            let info = self.update_bond(sweep, b, Dir::Right, params)?;
            truncerr = truncerr.max(info.truncerr);
        }
        for b in (0..n - 1).rev() {
            let info = self.update_bond(sweep, b, Dir::Left, params)?;
            truncerr = truncerr.max(info.truncerr);
            energy = info.energy;
        }
        Ok(SweepStats { energy, truncerr })
    }

    // absorb the two halves of the window into the edges and seed the new
    // window; returns the singular values on the old middle bond
    fn grow(&mut self, params: &SweepParams, lambda_prev: &[f64])
        -> IDMRGResult<Vec<f64>>
    {
        let n = self.psi.n();
        let nuc = n / 2;
        let trunc = params.truncation();

        // A(0..nuc) Λ B(nuc..n)
        self.psi.position(nuc - 1, &trunc)?;
        let theta = self.psi.bond_tensor(nuc - 1)?;
        let lb = self.psi.link(nuc - 1)?;
        let sb = self.psi.site_leg(nuc - 1)?;
        let svd = theta.svd(&[lb, sb], |d| Leg::link(nuc, d), &trunc)?;
        let lambda: Vec<f64> = svd.s.to_vec();
        let mut cell: Vec<Tensor<Leg>> = self.psi.sites().to_vec();
        cell[nuc - 1] = svd.u;
        cell[nuc] = svd.v;

        let mut hl = self.env.left(0)?.clone();
        for (k, a) in cell.iter().enumerate().take(nuc) {
            hl = extend_left(&hl, a, &self.mpo.site_tensor(k)?)?;
        }
        let hr
            = extend_right(
                self.env.right(nuc + 1)?,
                &cell[nuc],
                &self.mpo.site_tensor(nuc)?,
            )?;
        let hl = hl.map_indices(|l| l.moved(0))?;
        let hr = hr.map_indices(|l| l.moved(n))?;

        let left_end = self.psi.link(0)?;
        let right_end = self.psi.link(n)?;
        if left_end.dim != right_end.dim {
            return Err(EdgeMismatch(left_end.dim, right_end.dim));
        }
        if lambda_prev.len() != left_end.dim {
            return Err(EdgeMismatch(lambda_prev.len(), left_end.dim));
        }

        // B(nuc..n) become sites 0..nuc, A(0..nuc) become sites nuc..n
        let mut window: Vec<Tensor<Leg>> = Vec::with_capacity(n);
        for t in cell[nuc..].iter() {
            window.push(shifted(t, -(nuc as isize))?);
        }
        for t in cell[..nuc].iter() {
            window.push(shifted(t, nuc as isize)?);
        }
        window[0].scale_index(&Leg::link(0, lambda.len()), &lambda)?;
        window[nuc].scale_index(
            &Leg::link(nuc, lambda_prev.len()),
            &pinv(lambda_prev, self.args.pinv_cutoff),
        )?;
        window[n - 1].scale_index(&Leg::link(n, lambda.len()), &lambda)?;
        self.mpo.swap_unit_cells();

        // back to right-canonical form, rebuilding right environments
        let last = n - 1;
        self.psi = MPS::from_tensors(window, last)?;
        self.env = Environments::new(n, Edges { left: hl, right: hr });
        for b in (0..n - 1).rev() {
            let theta = self.psi.bond_tensor(b)?;
            self.psi.split(b, &theta, &trunc, Dir::Left)?;
            let r
                = extend_right(
                    self.env.right(b + 2)?,
                    self.psi.site(b + 1),
                    &self.mpo.site_tensor(b + 1)?,
                )?;
            self.env.set_right(b + 1, r);
        }
        Ok(lambda)
    }

    // close the window into a translation-invariant unit cell; the center
    // must be on site 0
    fn unit_cell(&self) -> IDMRGResult<InfiniteMPS> {
        let n = self.psi.n();
        let l0 = self.psi.link(0)?;
        let ln = self.psi.link(n)?;
        if l0.dim != ln.dim { return Err(EdgeMismatch(l0.dim, ln.dim)); }
        // bond n + 1 never occurs in the window
        let svd
            = self.psi.site(0)
            .svd(&[l0], |d| Leg::link(n + 1, d), &Truncation::default())?;
        let r = svd.s.len();
        let tmp = Leg::link(n + 1, r);
        let new_l0 = Leg::link(0, r);
        let mut b0 = svd.v;
        b0.replace_index(&tmp, new_l0)?;
        // the same rotation on the right end, which is the same bond
        let mut u = svd.u;
        u.replace_index(&l0, ln)?;
        let mut last = self.psi.site(n - 1).contract(&u)?;
        last.replace_index(&tmp, new_l0)?;
        let mut cell: Vec<Tensor<Leg>> = self.psi.sites().to_vec();
        cell[0] = b0;
        cell[n - 1] = last;
        Ok(InfiniteMPS::new(svd.s.to_vec(), cell)?)
    }
}

// shared sweep loop; `grow` toggles window regrowth between sweeps
struct Run {
    energy: f64,
    chain_energy: f64,
    lambda: Vec<f64>,
    sweeps: usize,
    truncerr: f64,
}

fn run_sweeps<O>(
    solver: &mut Solver<'_, O>,
    sweeps: &Sweeps,
    grow: bool,
    mut lambda: Vec<f64>,
    mut prev_chain_energy: Option<f64>,
    first_len: usize,
) -> IDMRGResult<Run>
where O: Observer
{
    let n = solver.psi.n();
    let nsweep = sweeps.nsweep();
    let mut energy = f64::NAN;
    let mut chain_energy = f64::NAN;
    let mut truncerr = 0.0;
    let mut done = 0;
    // last energy that is a per-window estimate, for the early stop
    let mut last_estimate: Option<f64> = None;
    for (s, params) in sweeps.iter().enumerate() {
        if grow && (s > 0 || prev_chain_energy.is_some()) {
            lambda = solver.grow(params, &lambda)?;
        }
        let stats = solver.sweep(s + 1, params)?;
        chain_energy = stats.energy;
        let estimate
            = match prev_chain_energy {
                Some(e) if grow => Some(stats.energy - e),
                _ if grow => None,
                _ => Some(stats.energy),
            };
        energy = estimate.unwrap_or(stats.energy);
        prev_chain_energy = Some(stats.energy);
        truncerr = stats.truncerr;
        done = s + 1;
        let info = SweepInfo {
            sweep: s + 1,
            nsweep,
            params: *params,
            chain_energy: stats.energy,
            energy,
            energy_per_site: energy / n as f64,
            maxlinkdim: solver.psi.max_link_dim(),
            truncerr: stats.truncerr,
            chain_len: if grow { first_len + n * s } else { n },
        };
        solver.observer.sweep_done(&info);
        if let (Some(tol), Some(prev), Some(cur))
            = (solver.args.energy_tol, last_estimate, estimate)
        {
            if ((cur - prev) / n as f64).abs() < tol { break; }
        }
        if estimate.is_some() { last_estimate = estimate; }
    }
    Ok(Run { energy, chain_energy, lambda, sweeps: done, truncerr })
}

/// Run infinite DMRG starting from the window state `psi`.
///
/// `psi` must cover two unit cells (an even number of sites), and `mpo` must
/// be an infinite MPO over the same sites. One sweep is performed per entry
/// of `sweeps`, with a growth step before every sweep but the first, unless
/// the energy tolerance in `args` stops the run early.
pub fn idmrg<O>(
    psi: MPS,
    mpo: MPO,
    sweeps: &Sweeps,
    args: &IDMRGArgs,
    observer: &mut O,
) -> IDMRGResult<IDMRGOutput>
where O: Observer
{
    let n = psi.n();
    if !mpo.is_infinite() { return Err(FiniteMPO); }
    if n < 2 || n % 2 != 0 { return Err(OddWindow(n)); }
    let edges = Edges { left: mpo.left_edge()?, right: mpo.right_edge()? };
    let mut solver = Solver::new(psi, mpo, edges, *args, observer)?;
    let run = run_sweeps(&mut solver, sweeps, true, vec![1.0], None, n)?;
    finish(solver, run)
}

/// Continue an earlier [`idmrg`] run for more sweeps, starting with a growth
/// step from its final window and edges.
pub fn idmrg_resume<O>(
    prev: IDMRGOutput,
    sweeps: &Sweeps,
    args: &IDMRGArgs,
    observer: &mut O,
) -> IDMRGResult<IDMRGOutput>
where O: Observer
{
    let n = prev.window.n();
    let mut solver = Solver::new(prev.window, prev.mpo, prev.edges, *args, observer)?;
    let first_len = n * (prev.sweeps + 1);
    let run
        = run_sweeps(
            &mut solver,
            sweeps,
            true,
            prev.lambda,
            Some(prev.chain_energy),
            first_len,
        )?;
    let nonconv = prev.local_nonconvergences;
    let mut out = finish(solver, run)?;
    out.sweeps += prev.sweeps;
    out.local_nonconvergences += nonconv;
    Ok(out)
}

fn finish<O>(solver: Solver<'_, O>, run: Run) -> IDMRGResult<IDMRGOutput>
where O: Observer
{
    let psi = solver.unit_cell()?;
    let edges = solver.env.edges()?;
    Ok(IDMRGOutput {
        energy: run.energy,
        psi,
        window: solver.psi,
        mpo: solver.mpo,
        edges,
        lambda: run.lambda,
        chain_energy: run.chain_energy,
        sweeps: run.sweeps,
        local_nonconvergences: solver.nonconv,
        truncerr: run.truncerr,
    })
}

/// Run ordinary two-site DMRG on a finite open chain.
pub fn dmrg<O>(
    psi: MPS,
    mpo: MPO,
    sweeps: &Sweeps,
    args: &IDMRGArgs,
    observer: &mut O,
) -> IDMRGResult<DMRGOutput>
where O: Observer
{
    let n = psi.n();
    if n < 2 { return Err(OddWindow(n)); }
    let edges = Edges { left: mpo.left_edge()?, right: mpo.right_edge()? };
    let mut solver = Solver::new(psi, mpo, edges, *args, observer)?;
    let run = run_sweeps(&mut solver, sweeps, false, vec![1.0], None, n)?;
    Ok(DMRGOutput {
        energy: run.energy,
        psi: solver.psi,
        local_nonconvergences: solver.nonconv,
        truncerr: run.truncerr,
    })
}
