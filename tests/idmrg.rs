use ndarray_linalg::{ Eigh, UPLO };
use idmrg_net::{
    idmrg::{
        dmrg, idmrg, idmrg_resume,
        BondInfo, IDMRGArgs, NoObserver, Observer, SweepInfo,
    },
    mpo::{ MPO, MPOArgs },
    mps::{ InitState, MPS },
    sites::SpinOne,
    sweeps::{ Schedule, Sweeps },
};

// energy per site of the infinite spin-1 Heisenberg chain
const E0: f64 = -1.401484038971;

fn neel(n: usize) -> (SpinOne, MPS) {
    let sites = SpinOne::new(n).unwrap();
    let init = InitState::alternating(&sites, "Up", "Dn").unwrap();
    (sites, MPS::from_init(&init).unwrap())
}

#[derive(Default)]
struct Recorder {
    sweeps: Vec<SweepInfo>,
    nonconv: usize,
}

impl Observer for Recorder {
    fn local_nonconvergence(&mut self, _info: &BondInfo) {
        self.nonconv += 1;
    }

    fn sweep_done(&mut self, info: &SweepInfo) { self.sweeps.push(*info); }
}

#[test]
fn dmrg_two_sites_is_exact() {
    let (sites, psi) = neel(2);
    let mpo = MPO::heisenberg(&sites, MPOArgs::default());
    let sweeps = Sweeps::new(3).maxdim(9_usize).niter(9_usize).build().unwrap();
    let res = dmrg(psi, mpo, &sweeps, &IDMRGArgs::default(), &mut NoObserver).unwrap();
    assert!((res.energy + 2.0).abs() < 1e-10, "energy {}", res.energy);
    assert!((res.psi.norm() - 1.0).abs() < 1e-10);
}

#[test]
fn dmrg_four_sites_matches_exact_diagonalization() {
    let (sites, psi) = neel(4);
    let mpo = MPO::heisenberg(&sites, MPOArgs::default());
    let (evals, _) = mpo.to_dense().eigh(UPLO::Lower).unwrap();
    let sweeps
        = Sweeps::new(6)
        .maxdim(9_usize)
        .cutoff(0.0_f64)
        .niter(20_usize)
        .build()
        .unwrap();
    let res = dmrg(psi, mpo, &sweeps, &IDMRGArgs::default(), &mut NoObserver).unwrap();
    assert!((res.energy - evals[0]).abs() < 1e-8, "{} vs {}", res.energy, evals[0]);
}

#[test]
fn idmrg_energy_per_site() {
    let (sites, psi) = neel(4);
    let mpo = MPO::heisenberg(&sites, MPOArgs { infinite: true });
    let sweeps
        = Sweeps::new(30)
        .maxdim(vec![16_usize, 32, 64])
        .cutoff(1e-12_f64)
        .niter(6_usize)
        .build()
        .unwrap();
    let mut rec = Recorder::default();
    let res = idmrg(psi, mpo, &sweeps, &IDMRGArgs::default(), &mut rec).unwrap();
    let e = res.energy / 4.0;
    assert!((e - E0).abs() < 1e-3, "energy per site {e}");
    assert_eq!(res.sweeps, 30);
    assert_eq!(rec.sweeps.len(), 30);
    assert_eq!(rec.nonconv, res.local_nonconvergences);
    // the represented chain grows by one window per sweep
    for (s, info) in rec.sweeps.iter().enumerate() {
        assert_eq!(info.sweep, s + 1);
        assert_eq!(info.chain_len, 4 * (s + 1));
        assert!(info.maxlinkdim <= info.params.maxdim);
    }
    assert_eq!(res.psi.n(), 4);
    assert_eq!(res.edges.left.rank(), 3);
    assert_eq!(res.edges.right.rank(), 3);
    let norm: f64 = res.psi.svals().iter().map(|s| s * s).sum();
    assert!((norm - 1.0).abs() < 1e-10);
}

#[test]
fn idmrg_energy_is_monotone_in_maxdim() {
    let energies: Vec<f64>
        = [4_usize, 12, 36].iter()
        .map(|maxdim| {
            let (sites, psi) = neel(2);
            let mpo = MPO::heisenberg(&sites, MPOArgs { infinite: true });
            let sweeps
                = Sweeps::new(40)
                .maxdim(*maxdim)
                .cutoff(1e-14_f64)
                .niter(6_usize)
                .build()
                .unwrap();
            let res
                = idmrg(psi, mpo, &sweeps, &IDMRGArgs::default(), &mut NoObserver)
                .unwrap();
            res.energy / 2.0
        })
        .collect();
    for pair in energies.windows(2) {
        assert!(pair[1] <= pair[0] + 1e-6, "energies {energies:?}");
    }
    assert!(energies.iter().all(|e| *e >= E0 - 1e-3), "energies {energies:?}");
}

#[test]
fn idmrg_early_stop_and_resume() {
    let (sites, psi) = neel(4);
    let mpo = MPO::heisenberg(&sites, MPOArgs { infinite: true });
    let sweeps
        = Sweeps::new(200)
        .maxdim(24_usize)
        .cutoff(1e-12_f64)
        .niter(4_usize)
        .build()
        .unwrap();
    let args = IDMRGArgs { energy_tol: Some(1e-6), ..IDMRGArgs::default() };
    let res = idmrg(psi, mpo, &sweeps, &args, &mut NoObserver).unwrap();
    assert!(res.sweeps < 200);

    let more = Sweeps::new(4).maxdim(24_usize).niter(4_usize).build().unwrap();
    let mut rec = Recorder::default();
    let first = res.sweeps;
    let e_first = res.energy / 4.0;
    let res = idmrg_resume(res, &more, &IDMRGArgs::default(), &mut rec).unwrap();
    assert_eq!(res.sweeps, first + 4);
    assert_eq!(rec.sweeps[0].chain_len, 4 * (first + 1));
    assert!((res.energy / 4.0 - e_first).abs() < 1e-4);
}

#[test]
fn idmrg_rejects_bad_input() {
    let (sites, psi) = neel(4);
    let finite = MPO::heisenberg(&sites, MPOArgs::default());
    let sweeps = Sweeps::new(2).build().unwrap();
    assert!(idmrg(psi.clone(), finite, &sweeps, &IDMRGArgs::default(), &mut NoObserver).is_err());

    let other = SpinOne::new(6).unwrap();
    let mpo = MPO::heisenberg(&other, MPOArgs { infinite: true });
    assert!(idmrg(psi, mpo, &sweeps, &IDMRGArgs::default(), &mut NoObserver).is_err());
}

#[test]
fn schedule_from_text() {
    let maxdim: Schedule<usize> = "20,80,140,200".parse().unwrap();
    let cutoff: Schedule<f64> = "1e-10:10,1e-14".parse().unwrap();
    let niter: Schedule<usize> = "3,2".parse().unwrap();
    let sweeps
        = Sweeps::new(20)
        .maxdim(maxdim)
        .cutoff(cutoff)
        .niter(niter)
        .build()
        .unwrap();
    assert_eq!(sweeps.nsweep(), 20);
    let maxdims: Vec<usize> = sweeps.iter().map(|p| p.maxdim).collect();
    assert_eq!(&maxdims[..5], &[20, 80, 140, 200, 200]);
    assert!(maxdims[4..].iter().all(|m| *m == 200));
    let cutoffs: Vec<f64> = sweeps.iter().map(|p| p.cutoff).collect();
    assert!(cutoffs[..10].iter().all(|c| *c == 1e-10));
    assert!(cutoffs[10..].iter().all(|c| *c == 1e-14));
    assert_eq!(sweeps.get(0).unwrap().niter, 3);
    assert!(sweeps.iter().skip(1).all(|p| p.niter == 2));
    assert!(Sweeps::new(0).build().is_err());
}

#[test]
fn small_solver_budget_is_reported_not_fatal() {
    let (sites, psi) = neel(4);
    let mpo = MPO::heisenberg(&sites, MPOArgs { infinite: true });
    let sweeps
        = Sweeps::new(6)
        .maxdim(16_usize)
        .cutoff(1e-12_f64)
        .niter(1_usize)
        .build()
        .unwrap();
    let args = IDMRGArgs { lanczos_tol: 1e-14, ..IDMRGArgs::default() };
    let mut rec = Recorder::default();
    let res = idmrg(psi, mpo, &sweeps, &args, &mut rec).unwrap();
    assert!(rec.nonconv > 0);
    assert_eq!(rec.nonconv, res.local_nonconvergences);
    assert_eq!(res.sweeps, 6);
    assert!(res.energy.is_finite());
}
