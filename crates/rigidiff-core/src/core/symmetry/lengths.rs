use super::SymmetryError;
use rand::Rng;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// Length of one asymmetric-unit chain: fixed, or drawn uniformly from an inclusive range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum LengthSpec {
    Fixed(usize),
    Range { min: usize, max: usize },
}

impl LengthSpec {
    pub fn bounds(&self) -> (usize, usize) {
        match *self {
            LengthSpec::Fixed(n) => (n, n),
            LengthSpec::Range { min, max } => (min, max),
        }
    }

    pub fn validate(&self) -> Result<(), SymmetryError> {
        let (min, max) = self.bounds();
        if min == 0 {
            return Err(SymmetryError::InvalidLengthSpec(format!(
                "chain length {} must be at least 1",
                self
            )));
        }
        if min > max {
            return Err(SymmetryError::InvalidLengthSpec(format!(
                "range {} has min above max",
                self
            )));
        }
        Ok(())
    }
}

impl fmt::Display for LengthSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LengthSpec::Fixed(n) => write!(f, "{}", n),
            LengthSpec::Range { min, max } => write!(f, "{}-{}", min, max),
        }
    }
}

impl FromStr for LengthSpec {
    type Err = SymmetryError;

    /// Parses `"20"` or `"10-30"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SymmetryError::InvalidLengthSpec(format!("cannot parse '{}'", s));
        let spec = match s.trim().split_once('-') {
            Some((min, max)) => LengthSpec::Range {
                min: min.trim().parse().map_err(|_| invalid())?,
                max: max.trim().parse().map_err(|_| invalid())?,
            },
            None => LengthSpec::Fixed(s.trim().parse().map_err(|_| invalid())?),
        };
        spec.validate()?;
        Ok(spec)
    }
}

fn default_symmetric() -> bool {
    true
}

/// One chain of the asymmetric unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChainSpec {
    pub length: LengthSpec,
    /// Whether the symmetry operators replicate this chain. Asymmetric chains appear once.
    #[serde(default = "default_symmetric")]
    pub symmetric: bool,
}

impl ChainSpec {
    pub fn symmetric(length: LengthSpec) -> Self {
        Self {
            length,
            symmetric: true,
        }
    }

    pub fn asymmetric(length: LengthSpec) -> Self {
        Self {
            length,
            symmetric: false,
        }
    }
}

/// Inclusive bounds on the residue count of the full, expanded assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct LengthRange {
    pub min: usize,
    pub max: usize,
}

impl LengthRange {
    pub fn new(min: usize, max: usize) -> Self {
        Self { min, max }
    }

    pub fn exactly(length: usize) -> Self {
        Self::new(length, length)
    }

    pub fn contains(&self, length: usize) -> bool {
        self.min <= length && length <= self.max
    }
}

/// Picks one length per asymmetric-unit chain.
///
/// Every chain is sampled independently of `group_order`; nothing requires a length to be
/// divisible by or otherwise compatible with the number of copies. The only group-related
/// failure is [`SymmetryError::IncompatibleSymmetry`], returned when `total` (the residue count
/// of the expanded assembly) cannot be met by any choice of lengths.
pub fn assign_lengths<R: Rng + ?Sized>(
    chain_spec: &[ChainSpec],
    group_order: usize,
    total: Option<LengthRange>,
    rng: &mut R,
) -> Result<Vec<usize>, SymmetryError> {
    if group_order == 0 {
        return Err(SymmetryError::InvalidGroup(
            "group order must be at least 1".to_string(),
        ));
    }
    if chain_spec.is_empty() {
        return Err(SymmetryError::InvalidLengthSpec(
            "at least one chain is required".to_string(),
        ));
    }
    for chain in chain_spec {
        chain.length.validate()?;
    }

    let Some(total) = total else {
        return Ok(chain_spec
            .iter()
            .map(|c| {
                let (min, max) = c.length.bounds();
                rng.gen_range(min..=max)
            })
            .collect());
    };

    let bounds_of = |symmetric: bool| -> Vec<(usize, usize)> {
        chain_spec
            .iter()
            .filter(|c| c.symmetric == symmetric)
            .map(|c| c.length.bounds())
            .collect()
    };
    let symmetric_bounds = bounds_of(true);
    let asymmetric_bounds = bounds_of(false);
    let (s_min, s_max) = sum_bounds(&symmetric_bounds);
    let (u_min, u_max) = sum_bounds(&asymmetric_bounds);

    let incompatible = || {
        SymmetryError::IncompatibleSymmetry(format!(
            "no chain lengths give a total in {}..={} with {} symmetric copies \
             (symmetric residues {}..={}, asymmetric residues {}..={})",
            total.min, total.max, group_order, s_min, s_max, u_min, u_max
        ))
    };

    // Symmetric sums S with some asymmetric sum U such that S * order + U lies in the window
    // form the contiguous range s_low..=s_high; U is then drawn from its own window.
    if total.min > total.max {
        return Err(incompatible());
    }
    let room = total.max.checked_sub(u_min).ok_or_else(incompatible)?;
    let s_low = s_min.max(total.min.saturating_sub(u_max).div_ceil(group_order));
    let s_high = s_max.min(room / group_order);
    if s_low > s_high {
        return Err(incompatible());
    }

    let s = rng.gen_range(s_low..=s_high);
    let replicated = s * group_order;
    let u_low = u_min.max(total.min.saturating_sub(replicated));
    let u_high = u_max.min(total.max - replicated);
    let u = rng.gen_range(u_low..=u_high);
    let mut symmetric_lengths = split_sum(s, &symmetric_bounds, rng).into_iter();
    let mut asymmetric_lengths = split_sum(u, &asymmetric_bounds, rng).into_iter();

    Ok(chain_spec
        .iter()
        .map(|c| {
            let next = if c.symmetric {
                symmetric_lengths.next()
            } else {
                asymmetric_lengths.next()
            };
            next.unwrap_or(0)
        })
        .collect())
}

fn sum_bounds(bounds: &[(usize, usize)]) -> (usize, usize) {
    bounds
        .iter()
        .fold((0, 0), |(lo, hi), &(min, max)| (lo + min, hi + max))
}

/// Splits `sum` into one value per bound, each inside its bound. `sum` must be feasible.
fn split_sum<R: Rng + ?Sized>(sum: usize, bounds: &[(usize, usize)], rng: &mut R) -> Vec<usize> {
    let mut remaining = sum;
    let mut rest = sum_bounds(bounds);
    let mut values = Vec::with_capacity(bounds.len());
    for &(min, max) in bounds {
        rest = (rest.0 - min, rest.1 - max);
        let low = min.max(remaining.saturating_sub(rest.1));
        let high = max.min(remaining - rest.0);
        let value = rng.gen_range(low..=high);
        values.push(value);
        remaining -= value;
    }
    values
}
