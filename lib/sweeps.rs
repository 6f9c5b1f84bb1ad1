//! Per-sweep parameter tables.
//!
//! A schedule for a single parameter is a short list of entries, each a value
//! with an optional repeat count. Expanding it to *K* sweeps assigns the values
//! left to right, lets an entry with repeat *R* fill *R* consecutive sweeps,
//! and holds the last value once the list runs out:
//!
//! ```
//! use idmrg_net::sweeps::{ Schedule, Sweeps };
//!
//! let sweeps
//!     = Sweeps::new(6)
//!     .maxdim("20,80,140".parse::<Schedule<usize>>().unwrap())
//!     .cutoff("1e-10:4,1e-14".parse::<Schedule<f64>>().unwrap())
//!     .build()
//!     .unwrap();
//! let maxdim: Vec<usize> = sweeps.iter().map(|p| p.maxdim).collect();
//! assert_eq!(maxdim, vec![20, 80, 140, 140, 140, 140]);
//! let cutoff: Vec<f64> = sweeps.iter().map(|p| p.cutoff).collect();
//! assert_eq!(cutoff, vec![1e-10, 1e-10, 1e-10, 1e-10, 1e-14, 1e-14]);
//! ```

use std::{ fmt, str::FromStr };
use itertools::Itertools;
use thiserror::Error;
use crate::tensor::Truncation;

#[derive(Debug, Error)]
pub enum SweepsError {
    /// Returned when a schedule of zero sweeps is requested.
    #[error("error in sweep schedule: number of sweeps must be at least 1")]
    NoSweeps,

    /// Returned when a parameter is given an empty list of entries.
    #[error("error in sweep schedule: empty list for {0}")]
    EmptyList(&'static str),

    /// Returned when an entry has a repeat count of zero.
    #[error("error in sweep schedule: zero repeat count for {0}")]
    ZeroRepeat(&'static str),

    /// Returned when a parameter value is out of its allowed range.
    #[error("error in sweep schedule: invalid value {1} for {0}")]
    InvalidValue(&'static str, String),

    /// Returned when a schedule string cannot be parsed.
    #[error("error in sweep schedule: cannot parse {0:?}")]
    Parse(String),
}
use SweepsError::*;
pub type SweepsResult<T> = Result<T, SweepsError>;

/// A value held for `repeat` consecutive sweeps.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Entry<A> {
    pub value: A,
    pub repeat: usize,
}

impl<A> Entry<A> {
    /// Entry held for a single sweep.
    pub fn once(value: A) -> Self { Self { value, repeat: 1 } }
}

/// A list of schedule entries for a single parameter.
///
/// Parses from comma-separated `value[:repeat]` items, e.g.
/// `"1e-10:10,1e-14"`.
#[derive(Clone, Debug, PartialEq)]
pub struct Schedule<A>(pub Vec<Entry<A>>);

impl<A> Schedule<A>
where A: Copy
{
    /// Expand to exactly `k` per-sweep values.
    ///
    /// Fails if the list is empty or an entry has a zero repeat count.
    pub fn expand(&self, k: usize, name: &'static str) -> SweepsResult<Vec<A>> {
        let last = self.0.last().ok_or(EmptyList(name))?;
        if self.0.iter().any(|e| e.repeat == 0) { return Err(ZeroRepeat(name)); }
        let values: Vec<A>
            = self.0.iter()
            .flat_map(|e| std::iter::repeat(e.value).take(e.repeat))
            .chain(std::iter::repeat(last.value))
            .take(k)
            .collect();
        Ok(values)
    }
}

impl<A> From<A> for Schedule<A> {
    fn from(value: A) -> Self { Self(vec![Entry::once(value)]) }
}

impl<A> From<Vec<A>> for Schedule<A> {
    fn from(values: Vec<A>) -> Self {
        Self(values.into_iter().map(Entry::once).collect())
    }
}

impl<A, const N: usize> From<[A; N]> for Schedule<A> {
    fn from(values: [A; N]) -> Self {
        Self(values.into_iter().map(Entry::once).collect())
    }
}

impl<A> From<Vec<Entry<A>>> for Schedule<A> {
    fn from(entries: Vec<Entry<A>>) -> Self { Self(entries) }
}

impl<A> FromStr for Schedule<A>
where A: FromStr
{
    type Err = SweepsError;

    fn from_str(s: &str) -> SweepsResult<Self> {
        let entries: Vec<Entry<A>>
            = s.split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(|item| -> SweepsResult<Entry<A>> {
                let (value, repeat)
                    = match item.split_once(':') {
                        Some((v, r)) => {
                            let r: usize
                                = r.trim().parse()
                                .map_err(|_| Parse(item.to_string()))?;
                            (v.trim(), r)
                        },
                        None => (item, 1),
                    };
                let value: A
                    = value.parse().map_err(|_| Parse(item.to_string()))?;
                Ok(Entry { value, repeat })
            })
            .collect::<SweepsResult<_>>()?;
        Ok(Self(entries))
    }
}

impl<A> fmt::Display for Schedule<A>
where A: fmt::Display
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let items
            = self.0.iter()
            .map(|e| {
                if e.repeat == 1 {
                    e.value.to_string()
                } else {
                    format!("{}:{}", e.value, e.repeat)
                }
            })
            .join(",");
        write!(f, "{}", items)
    }
}

/// Parameters of a single sweep.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SweepParams {
    /// Maximum kept bond dimension.
    pub maxdim: usize,
    /// Minimum kept bond dimension.
    pub mindim: usize,
    /// Largest discarded weight per truncation.
    pub cutoff: f64,
    /// Krylov budget of the local eigensolver.
    pub niter: usize,
}

impl SweepParams {
    /// Return the truncation rules of this sweep.
    pub fn truncation(&self) -> Truncation {
        Truncation {
            maxdim: self.maxdim,
            mindim: self.mindim,
            cutoff: self.cutoff,
        }
    }
}

/// Immutable table of per-sweep parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct Sweeps {
    params: Vec<SweepParams>,
}

impl Sweeps {
    /// Start building a schedule of `nsweep` sweeps.
    pub fn new(nsweep: usize) -> SweepsBuilder {
        SweepsBuilder {
            nsweep,
            maxdim: Schedule::from(512_usize),
            mindim: Schedule::from(1_usize),
            cutoff: Schedule::from(0.0_f64),
            niter: Schedule::from(2_usize),
        }
    }

    /// Return the number of sweeps.
    pub fn nsweep(&self) -> usize { self.params.len() }

    /// Return the parameters of sweep `s`, counting from zero.
    pub fn get(&self, s: usize) -> Option<&SweepParams> { self.params.get(s) }

    /// Return an iterator over all sweeps in order.
    pub fn iter(&self) -> std::slice::Iter<'_, SweepParams> { self.params.iter() }
}

impl<'a> IntoIterator for &'a Sweeps {
    type Item = &'a SweepParams;
    type IntoIter = std::slice::Iter<'a, SweepParams>;

    fn into_iter(self) -> Self::IntoIter { self.params.iter() }
}

/// Builder for [`Sweeps`].
///
/// Parameters left unset default to `maxdim = 512`, `mindim = 1`,
/// `cutoff = 0` and `niter = 2` for every sweep.
#[derive(Clone, Debug)]
pub struct SweepsBuilder {
    nsweep: usize,
    maxdim: Schedule<usize>,
    mindim: Schedule<usize>,
    cutoff: Schedule<f64>,
    niter: Schedule<usize>,
}

impl SweepsBuilder {
    /// Set the maximum bond dimension schedule.
    pub fn maxdim<S>(mut self, maxdim: S) -> Self
    where S: Into<Schedule<usize>>
    {
        self.maxdim = maxdim.into();
        self
    }

    /// Set the minimum bond dimension schedule.
    pub fn mindim<S>(mut self, mindim: S) -> Self
    where S: Into<Schedule<usize>>
    {
        self.mindim = mindim.into();
        self
    }

    /// Set the truncation cutoff schedule.
    pub fn cutoff<S>(mut self, cutoff: S) -> Self
    where S: Into<Schedule<f64>>
    {
        self.cutoff = cutoff.into();
        self
    }

    /// Set the eigensolver budget schedule.
    pub fn niter<S>(mut self, niter: S) -> Self
    where S: Into<Schedule<usize>>
    {
        self.niter = niter.into();
        self
    }

    /// Expand all schedules and validate their values.
    pub fn build(self) -> SweepsResult<Sweeps> {
        let k = self.nsweep;
        if k == 0 { return Err(NoSweeps); }
        let maxdim = self.maxdim.expand(k, "maxdim")?;
        let mindim = self.mindim.expand(k, "mindim")?;
        let cutoff = self.cutoff.expand(k, "cutoff")?;
        let niter = self.niter.expand(k, "niter")?;
        if let Some(m) = maxdim.iter().find(|m| **m == 0) {
            return Err(InvalidValue("maxdim", m.to_string()));
        }
        if let Some(m) = mindim.iter().find(|m| **m == 0) {
            return Err(InvalidValue("mindim", m.to_string()));
        }
        if let Some(s) = (0..k).find(|s| mindim[*s] > maxdim[*s]) {
            return Err(InvalidValue(
                "mindim",
                format!("{} exceeds maxdim {} at sweep {}", mindim[s], maxdim[s], s + 1),
            ));
        }
        if let Some(c) = cutoff.iter().find(|c| !c.is_finite() || **c < 0.0) {
            return Err(InvalidValue("cutoff", c.to_string()));
        }
        if let Some(n) = niter.iter().find(|n| **n == 0) {
            return Err(InvalidValue("niter", n.to_string()));
        }
        let params: Vec<SweepParams>
            = (0..k)
            .map(|s| SweepParams {
                maxdim: maxdim[s],
                mindim: mindim[s],
                cutoff: cutoff[s],
                niter: niter[s],
            })
            .collect();
        Ok(Sweeps { params })
    }
}
