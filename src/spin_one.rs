//! Ground state energy and ⟨Sz_1 Sz_j⟩ of the infinite spin-1 Heisenberg
//! chain by iDMRG.
//!
//! Results go to stdout; progress, per-sweep summaries and warnings go to
//! stderr.

use std::process::ExitCode;
use clap::Parser;
use indicatif::{ ProgressBar, ProgressStyle };
use idmrg_net::{
    correlation::Correlator,
    idmrg::{ idmrg, BondInfo, IDMRGArgs, Observer, SweepInfo },
    mpo::{ MPO, MPOArgs },
    mps::{ InitState, MPS },
    sites::SpinOne,
    sweeps::{ Schedule, Sweeps },
};

#[derive(Debug, Parser)]
#[command(about = "iDMRG for the infinite spin-1 Heisenberg chain")]
struct Cli {
    /// Number of sites in the unit cell; the window holds two cells.
    #[arg(long, default_value_t = 4)]
    cells: usize,

    /// Number of sweeps.
    #[arg(long, default_value_t = 20)]
    sweeps: usize,

    /// Maximum bond dimension per sweep, as `value[:repeat],...`.
    #[arg(long, default_value = "20,80,140,200")]
    maxdim: Schedule<usize>,

    /// Minimum bond dimension per sweep.
    #[arg(long, default_value = "1")]
    mindim: Schedule<usize>,

    /// Truncation cutoff per sweep.
    #[arg(long, default_value = "1e-10:10,1e-14")]
    cutoff: Schedule<f64>,

    /// Eigensolver budget per sweep.
    #[arg(long, default_value = "3,2")]
    niter: Schedule<usize>,

    /// Largest site j for which <Sz_1 Sz_j> is printed.
    #[arg(long, default_value_t = 20)]
    xrange: usize,

    /// 0: results only; 1: per-sweep summaries; 2: per-bond reports and
    /// eigensolver warnings.
    #[arg(long, default_value_t = 1)]
    output_level: usize,

    /// Stop once the energy per site changes by less than this between
    /// sweeps.
    #[arg(long)]
    energy_tol: Option<f64>,

    /// Print connected correlations <Sz_1 Sz_j> - <Sz_1><Sz_j> instead.
    #[arg(long)]
    connected: bool,
}

struct Progress {
    bar: ProgressBar,
    level: usize,
    nonconv: usize,
}

impl Progress {
    fn new(nsweep: usize, level: usize) -> Self {
        let bar = ProgressBar::new(nsweep as u64);
        if let Ok(style)
            = ProgressStyle::with_template(
                " {bar:40.cyan/blue} {pos}/{len} sweeps [{elapsed_precise}] {msg}"
            )
        {
            bar.set_style(style);
        }
        Self { bar, level, nonconv: 0 }
    }
}

impl Observer for Progress {
    fn bond_done(&mut self, info: &BondInfo) {
        if self.level >= 2 {
            self.bar.suspend(|| {
                eprintln!(
                    "  sweep {} bond ({},{}) {:?}: E = {:.14} dim = {} truncerr = {:.2e}",
                    info.sweep, info.bond, info.bond + 1, info.dir,
                    info.energy, info.linkdim, info.truncerr,
                );
            });
        }
    }

    fn local_nonconvergence(&mut self, info: &BondInfo) {
        self.nonconv += 1;
        if self.level >= 2 {
            self.bar.suspend(|| {
                eprintln!(
                    "  warning: eigensolver not converged at sweep {} bond {} \
                    (residual {:.2e} after {} iterations)",
                    info.sweep, info.bond, info.residual, info.iterations,
                );
            });
        }
    }

    fn sweep_done(&mut self, info: &SweepInfo) {
        self.bar.inc(1);
        self.bar.set_message(format!("E/site = {:.10}", info.energy_per_site));
        if self.level >= 1 {
            self.bar.suspend(|| {
                eprintln!(
                    "sweep {}/{}: maxdim = {} cutoff = {:.1e} niter = {} | \
                    linkdim = {} truncerr = {:.2e} | L = {} E/site = {:.14}",
                    info.sweep, info.nsweep,
                    info.params.maxdim, info.params.cutoff, info.params.niter,
                    info.maxlinkdim, info.truncerr,
                    info.chain_len, info.energy_per_site,
                );
            });
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let n = 2 * cli.cells;
    let sites = SpinOne::new(n)?;
    let mpo = MPO::heisenberg(&sites, MPOArgs { infinite: true });
    let sweeps
        = Sweeps::new(cli.sweeps)
        .maxdim(cli.maxdim)
        .mindim(cli.mindim)
        .cutoff(cli.cutoff)
        .niter(cli.niter)
        .build()?;
    let init = InitState::alternating(&sites, "Up", "Dn")?;
    let psi = MPS::from_init(&init)?;
    let args = IDMRGArgs {
        output_level: cli.output_level,
        energy_tol: cli.energy_tol,
        ..IDMRGArgs::default()
    };

    let mut progress = Progress::new(sweeps.nsweep(), cli.output_level);
    let res = idmrg(psi, mpo, &sweeps, &args, &mut progress);
    progress.bar.finish_and_clear();
    let res = res?;
    if progress.nonconv > 0 && cli.output_level < 2 {
        eprintln!(
            "warning: {} local eigensolves stopped at their iteration budget",
            progress.nonconv,
        );
    }

    println!("\nGround state energy / site = {:.20}", res.energy / n as f64);

    let corr = Correlator::from_names(&res.psi, &sites, "Sz", "Sz")?;
    if cli.connected {
        println!("\nj <psi|Sz_1 Sz_j|psi> - <psi|Sz_1|psi><psi|Sz_j|psi> = ");
        for (j, val) in corr.connected(cli.xrange)? {
            println!("{} {:.20}", j, val);
        }
    } else {
        println!("\nj <psi|Sz_1 Sz_j|psi> = ");
        for item in corr.iter(Some(cli.xrange)) {
            let (j, val) = item?;
            println!("{} {:.20}", j, val);
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {}", err);
            ExitCode::FAILURE
        },
    }
}
