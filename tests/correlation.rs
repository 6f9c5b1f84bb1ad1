use idmrg_net::{
    correlation::{ CorrError, Correlator, InfiniteMPS },
    idmrg::{ idmrg, IDMRGArgs, NoObserver },
    mpo::{ MPO, MPOArgs },
    mps::{ InitState, MPS },
    sites::SpinOne,
    sweeps::{ Schedule, Sweeps },
};

// small iDMRG run on a window of two 2-site cells
fn ground_state() -> (SpinOne, InfiniteMPS, f64) {
    let sites = SpinOne::new(4).unwrap();
    let init = InitState::alternating(&sites, "Up", "Dn").unwrap();
    let psi = MPS::from_init(&init).unwrap();
    let mpo = MPO::heisenberg(&sites, MPOArgs { infinite: true });
    let sweeps
        = Sweeps::new(24)
        .maxdim(vec![16_usize, 32])
        .cutoff(1e-12_f64)
        .niter(6_usize)
        .build()
        .unwrap();
    let res = idmrg(psi, mpo, &sweeps, &IDMRGArgs::default(), &mut NoObserver).unwrap();
    (sites, res.psi, res.energy / 4.0)
}

#[test]
fn antiferromagnetic_decay() {
    let (sites, psi, e) = ground_state();
    let corr = Correlator::from_names(&psi, &sites, "Sz", "Sz").unwrap();
    let vals: Vec<(usize, f64)>
        = corr.iter(Some(20)).collect::<Result<_, _>>().unwrap();
    assert_eq!(vals.len(), 19);
    assert_eq!(vals[0].0, 2);
    assert_eq!(vals[18].0, 20);

    // isotropy: <S_1 . S_2> = 3 <Sz_1 Sz_2> is the bond energy
    assert!((3.0 * vals[0].1 - e).abs() < 5e-3, "C(2) = {}, e = {}", vals[0].1, e);

    for (j, c) in vals.iter().take(11) {
        let sign = if (j - 1) % 2 == 1 { -1.0 } else { 1.0 };
        assert!(sign * c > 0.0, "C({j}) = {c}");
    }
    for pair in vals.windows(3).take(10) {
        assert!(pair[2].1.abs() < pair[0].1.abs(), "{pair:?}");
    }
}

#[test]
fn long_range_is_stable_and_repeatable() {
    let (sites, psi, _) = ground_state();
    let corr = Correlator::from_names(&psi, &sites, "Sz", "Sz").unwrap();
    let first: Vec<(usize, f64)>
        = corr.iter(Some(400)).collect::<Result<_, _>>().unwrap();
    let second: Vec<(usize, f64)>
        = corr.iter(Some(400)).collect::<Result<_, _>>().unwrap();
    assert_eq!(first, second);
    assert!(first.iter().all(|(_, c)| c.is_finite() && c.abs() <= 1.0 + 1e-10));
    assert!(first.last().unwrap().1.abs() < 1e-4);

    // an unbounded scan agrees with the bounded one
    let unbounded: Vec<(usize, f64)>
        = corr.iter(None).take(399).collect::<Result<_, _>>().unwrap();
    assert_eq!(first, unbounded);
}

#[test]
fn accumulator_keeps_its_size() {
    let (sites, psi, _) = ground_state();
    let corr = Correlator::from_names(&psi, &sites, "Sz", "Sz").unwrap();
    let mut scan = corr.iter(Some(50));
    assert!(scan.accumulator().is_none());
    for j in 2..=50 {
        let (jj, _) = scan.next().unwrap().unwrap();
        assert_eq!(jj, j);
        let acc = scan.accumulator().unwrap();
        assert_eq!(acc.tensor().rank(), 2);
        // the accumulator after site j sits on the bond entering site j + 1
        assert_eq!(acc.bond(), Some(j % psi.n()));
        assert_eq!(acc.dim(), psi.link_dim(j));
        assert!(acc.hermiticity_defect().unwrap() < 1e-12);
    }
    assert!(scan.next().is_none());
}

#[test]
fn mismatched_accumulator_is_an_error() {
    let (sites, psi, _) = ground_state();
    let corr = Correlator::from_names(&psi, &sites, "Sz", "Sz").unwrap();
    let acc = corr.init().unwrap();
    assert!(corr.step(&acc, 2).is_ok());
    assert!(matches!(corr.step(&acc, 3), Err(CorrError::IndexMismatch { site: 2, .. })));
    assert!(matches!(corr.step(&acc, 1), Err(CorrError::InvalidSite(1))));
    // periodic reuse of the cell: j and j + n use the same cell tensor
    let n = psi.n();
    let (acc3, _) = corr.step(&acc, 2).unwrap();
    assert!(corr.step(&acc3, 3).is_ok());
    assert!(corr.step(&acc3, 3 + n).is_ok());
}

#[test]
fn one_site_expectations_and_connected() {
    let (sites, psi, _) = ground_state();
    let sz = sites.op_matrix("Sz").unwrap();
    let id = sites.op_matrix("Id").unwrap();
    for k in 0..psi.n() {
        assert!((psi.expectation(&id, k).unwrap() - 1.0).abs() < 1e-10);
        assert!(psi.expectation(&sz, k).unwrap().abs() < 1e-2);
    }
    let corr = Correlator::from_names(&psi, &sites, "Sz", "Sz").unwrap();
    let conn = corr.connected(10).unwrap();
    let full: Vec<(usize, f64)> = corr.iter(Some(10)).collect::<Result<_, _>>().unwrap();
    assert_eq!(conn.len(), full.len());
    let m0 = psi.expectation(&sz, 0).unwrap();
    for ((j, c), (jj, f)) in conn.iter().zip(full.iter()) {
        assert_eq!(j, jj);
        let mj = psi.expectation(&sz, j - 1).unwrap();
        assert!((c - (f - m0 * mj)).abs() < 1e-12);
    }
    assert!(psi.entropy_vn() > 0.0);

    let bad = ndarray::Array2::<f64>::eye(2);
    assert!(matches!(
        Correlator::new(&psi, &bad, &sz),
        Err(CorrError::OperatorIncompatibleShape),
    ));
}

#[test]
fn reference_run() {
    let cells = 4;
    let n = 2 * cells;
    let sites = SpinOne::new(n).unwrap();
    let init = InitState::alternating(&sites, "Up", "Dn").unwrap();
    let psi = MPS::from_init(&init).unwrap();
    let mpo = MPO::heisenberg(&sites, MPOArgs { infinite: true });
    let sweeps
        = Sweeps::new(20)
        .maxdim("20,80,140,200".parse::<Schedule<usize>>().unwrap())
        .cutoff("1e-10:10,1e-14".parse::<Schedule<f64>>().unwrap())
        .niter("3,2".parse::<Schedule<usize>>().unwrap())
        .build()
        .unwrap();
    let res = idmrg(psi, mpo, &sweeps, &IDMRGArgs::default(), &mut NoObserver).unwrap();
    let e = res.energy / n as f64;
    assert!(e < 0.0, "energy per site {e}");
    assert!((e + 1.401484038971).abs() < 1e-2, "energy per site {e}");
    assert_eq!(res.psi.n(), n);

    let corr = Correlator::from_names(&res.psi, &sites, "Sz", "Sz").unwrap();
    let vals: Vec<(usize, f64)>
        = corr.iter(Some(20)).collect::<Result<_, _>>().unwrap();
    assert_eq!(vals.len(), 19);
    assert_eq!(vals.iter().map(|(j, _)| *j).collect::<Vec<_>>(), (2..=20).collect::<Vec<_>>());
    // one unit cell further along, the same cell tensor gives a weaker correlation
    for k in 0..vals.len() - n {
        assert!(vals[k + n].1.abs() < vals[k].1.abs(), "C({}) vs C({})", vals[k].0, vals[k + n].0);
    }
}
