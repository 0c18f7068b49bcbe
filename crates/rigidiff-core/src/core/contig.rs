//! Contig strings: the compact description of which chains to design, how long each designed
//! segment may be, and which residues to copy from a reference structure.
//!
//! Chains are separated by whitespace and segments by `/`:
//!
//! - `N` or `N-M`: a designed segment of exactly `N`, or between `N` and `M`, residues.
//! - `A10-25` or `A10`: motif residues 10..=25 (or just 10) of reference chain `A`.
//! - `0`: chain terminator. A chain made only of motif segments and ending in `/0` is a fixed
//!   receptor chain; the last chain is treated as one when it holds only motif segments.
//!
//! Example: `"10-40/A163-181/10-40 B1-100/0"` designs one chain around a 19-residue motif and
//! keeps residues 1..=100 of reference chain B as a receptor.
//!
//! Motif residues listed in an inpaint_str (for example `["A170-175"]`) keep their place in the
//! layout but have their structure diffused instead of copied from the reference.

use crate::core::models::chain::{ChainInfo, chain_label};
use crate::core::models::reference::ReferenceStructure;
use crate::core::models::structure::CHAIN_BREAK_OFFSET;
use crate::core::symmetry::lengths::{ChainSpec, LengthRange, LengthSpec};
use rand::Rng;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

/// Resampling attempts before a length window is declared unreachable.
pub const MAX_SAMPLING_ATTEMPTS: usize = 100_000;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ContigError {
    #[error("Contig string is empty")]
    Empty,

    #[error("Cannot parse contig segment '{segment}': {reason}")]
    Parse { segment: String, reason: String },

    #[error("Invalid receptor chain '{chain}': {reason}")]
    Receptor { chain: String, reason: String },

    #[error("Symmetric chains differ: '{first}' vs '{other}'")]
    AsymmetricChains { first: String, other: String },

    #[error("No sampled contig has a designed length in {min}..={max} after {attempts} attempts")]
    IncompatibleLength {
        min: usize,
        max: usize,
        attempts: usize,
    },
}

/// One `/`-separated piece of a contig chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment {
    Designed { min: usize, max: usize },
    Motif { chain: char, start: i32, end: i32 },
    Break,
}

impl Segment {
    fn is_motif(&self) -> bool {
        matches!(self, Segment::Motif { .. })
    }

    /// Residues this segment contributes before any length is drawn; `0` for a designed range.
    fn motif_len(&self) -> usize {
        match *self {
            Segment::Motif { start, end, .. } => motif_len(start, end),
            _ => 0,
        }
    }

    /// Segment shape with motif segments replaced by their length, used to compare chains.
    fn shape(&self) -> String {
        match *self {
            Segment::Designed { min, max } => format!("{}-{}", min, max),
            Segment::Motif { .. } => format!("{}", self.motif_len()),
            Segment::Break => "0".to_string(),
        }
    }
}

impl FromStr for Segment {
    type Err = ContigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fail = |reason: &str| ContigError::Parse {
            segment: s.to_string(),
            reason: reason.to_string(),
        };
        let mut chars = s.chars();
        let first = chars.next().ok_or_else(|| fail("empty segment"))?;

        if first.is_ascii_alphabetic() {
            let rest = chars.as_str();
            let (start, end) = match rest.split_once('-') {
                Some((a, b)) => (a.parse::<i32>(), b.parse::<i32>()),
                None => (rest.parse::<i32>(), rest.parse::<i32>()),
            };
            let (start, end) = (
                start.map_err(|_| fail("motif start is not an integer"))?,
                end.map_err(|_| fail("motif end is not an integer"))?,
            );
            if start > end {
                return Err(fail("motif range is reversed"));
            }
            if end.checked_sub(start).and_then(|d| d.checked_add(1)).is_none() {
                return Err(fail("motif range is too long"));
            }
            return Ok(Segment::Motif {
                chain: first,
                start,
                end,
            });
        }

        if s == "0" {
            return Ok(Segment::Break);
        }
        let (min, max) = match s.split_once('-') {
            Some((a, b)) => (a.parse::<usize>(), b.parse::<usize>()),
            None => (s.parse::<usize>(), s.parse::<usize>()),
        };
        let (min, max) = (
            min.map_err(|_| fail("length is not a non-negative integer"))?,
            max.map_err(|_| fail("length is not a non-negative integer"))?,
        );
        if min > max {
            return Err(fail("length range is reversed"));
        }
        Ok(Segment::Designed { min, max })
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Segment::Designed { min, max } if min == max => write!(f, "{}", min),
            Segment::Designed { min, max } => write!(f, "{}-{}", min, max),
            Segment::Motif { chain, start, end } if start == end => write!(f, "{}{}", chain, start),
            Segment::Motif { chain, start, end } => write!(f, "{}{}-{}", chain, start, end),
            Segment::Break => write!(f, "0"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContigChain {
    pub segments: Vec<Segment>,
    pub receptor: bool,
}

impl ContigChain {
    fn shape(&self) -> String {
        self.segments
            .iter()
            .map(Segment::shape)
            .collect::<Vec<_>>()
            .join("/")
    }

    fn motif_fragments(&self) -> impl Iterator<Item = (char, i32, i32)> + '_ {
        self.segments.iter().filter_map(|s| match *s {
            Segment::Motif { chain, start, end } => Some((chain, start, end)),
            _ => None,
        })
    }
}

impl fmt::Display for ContigChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.segments.iter().map(Segment::to_string).collect();
        write!(f, "{}", parts.join("/"))
    }
}

/// A parsed contig string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContigMap {
    chains: Vec<ContigChain>,
    /// Motif ranges whose structure is diffused rather than copied.
    inpaint_str: Vec<(char, i32, i32)>,
}

impl ContigMap {
    pub fn parse(contig: &str) -> Result<Self, ContigError> {
        let raw: Vec<&str> = contig.split_whitespace().collect();
        if raw.is_empty() {
            return Err(ContigError::Empty);
        }
        let last = raw.len() - 1;
        let mut chains = Vec::with_capacity(raw.len());
        for (k, text) in raw.iter().enumerate() {
            let mut segments = text
                .split('/')
                .map(str::parse)
                .collect::<Result<Vec<Segment>, _>>()?;

            let all_motif_before_break = segments.len() > 1
                && segments[..segments.len() - 1].iter().all(Segment::is_motif)
                && segments.last() == Some(&Segment::Break);
            let receptor = if all_motif_before_break {
                true
            } else if k == last && segments.iter().all(Segment::is_motif) {
                segments.push(Segment::Break);
                true
            } else {
                false
            };

            let chain = ContigChain { segments, receptor };
            if receptor {
                validate_receptor(&chain)?;
            }
            chains.push(chain);
        }
        Ok(Self {
            chains,
            inpaint_str: Vec::new(),
        })
    }

    /// Marks motif residues whose structure is diffused instead of fixed.
    ///
    /// Each entry uses motif syntax (`A10-15` or `A12`) and must overlap a motif segment of
    /// this contig. Such residues stay in the layout and in the reference mapping.
    pub fn with_inpaint_str<S: AsRef<str>>(mut self, entries: &[S]) -> Result<Self, ContigError> {
        for entry in entries {
            let entry = entry.as_ref().trim();
            let fail = |reason: &str| ContigError::Parse {
                segment: entry.to_string(),
                reason: reason.to_string(),
            };
            let Segment::Motif { chain, start, end } = entry.parse::<Segment>()? else {
                return Err(fail("inpaint_str entries must name reference residues"));
            };
            let overlaps = self
                .chains
                .iter()
                .flat_map(ContigChain::motif_fragments)
                .any(|(c, first, last)| c == chain && first <= end && start <= last);
            if !overlaps {
                return Err(fail("not part of any motif segment"));
            }
            self.inpaint_str.push((chain, start, end));
        }
        Ok(self)
    }

    pub fn inpaint_str(&self) -> &[(char, i32, i32)] {
        &self.inpaint_str
    }

    pub fn chains(&self) -> &[ContigChain] {
        &self.chains
    }

    pub fn designed_chains(&self) -> impl Iterator<Item = &ContigChain> {
        self.chains.iter().filter(|c| !c.receptor)
    }

    pub fn receptor_chains(&self) -> impl Iterator<Item = &ContigChain> {
        self.chains.iter().filter(|c| c.receptor)
    }

    /// Length windows of the asymmetric-unit chains this contig produces, before any segment
    /// length is drawn. Designed chains collapse under symmetry as in [`ContigMap::sample`].
    pub fn chain_windows(&self, sym_order: Option<usize>) -> Vec<ChainSpec> {
        let designed: Vec<&ContigChain> = self.designed_chains().collect();
        let kept = match sym_order {
            Some(n) if n > 1 && designed.len() == n => 1,
            _ => designed.len(),
        };
        let designed_specs = designed.into_iter().take(kept).map(|chain| {
            let (min, max) = chain.segments.iter().fold((0, 0), |(lo, hi), s| match *s {
                Segment::Designed { min, max } => (lo + min, hi + max),
                Segment::Motif { .. } => {
                    let n = s.motif_len();
                    (lo + n, hi + n)
                }
                Segment::Break => (lo, hi),
            });
            let min = min.max(1);
            let length = if min >= max {
                LengthSpec::Fixed(min)
            } else {
                LengthSpec::Range { min, max }
            };
            ChainSpec::symmetric(length)
        });
        let receptor_specs = self.receptor_chains().map(|chain| {
            let length = chain
                .motif_fragments()
                .map(|(_, start, end)| motif_len(start, end))
                .sum();
            ChainSpec::asymmetric(LengthSpec::Fixed(length))
        });
        designed_specs.chain(receptor_specs).collect()
    }

    /// Draws a concrete length for every designed segment.
    ///
    /// `length` bounds the designed length (designed chains only, motif residues included),
    /// retried up to [`MAX_SAMPLING_ATTEMPTS`] times. With `sym_order = n` and exactly `n`
    /// designed chains, the chains must share one shape and collapse to a single
    /// asymmetric-unit chain; the designed length never has to be divisible by `n`.
    pub fn sample<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        length: Option<LengthRange>,
        sym_order: Option<usize>,
    ) -> Result<SampledContig, ContigError> {
        let designed: Vec<&ContigChain> = self.designed_chains().collect();
        let designed = match sym_order {
            Some(n) if n > 1 && designed.len() == n => {
                let first = designed[0];
                if let Some(other) = designed.iter().find(|c| c.shape() != first.shape()) {
                    return Err(ContigError::AsymmetricChains {
                        first: first.to_string(),
                        other: other.to_string(),
                    });
                }
                vec![first]
            }
            _ => designed,
        };
        let receptors: Vec<&ContigChain> = self.receptor_chains().collect();

        for attempt in 1..=MAX_SAMPLING_ATTEMPTS {
            let lengths: Vec<Vec<usize>> = designed
                .iter()
                .map(|chain| {
                    chain
                        .segments
                        .iter()
                        .map(|s| match *s {
                            Segment::Designed { min, max } => rng.gen_range(min..=max),
                            Segment::Motif { .. } => s.motif_len(),
                            Segment::Break => 0,
                        })
                        .collect()
                })
                .collect();
            let total: usize = lengths.iter().flatten().sum();
            if length.is_none_or(|range| range.contains(total)) {
                debug!(attempt, designed_length = total, "Sampled contig lengths.");
                let mut sampled = SampledContig::build(&designed, &lengths, &receptors);
                sampled.mark_diffused(&self.inpaint_str);
                return Ok(sampled);
            }
        }
        let range = length.unwrap_or(LengthRange::new(0, 0));
        Err(ContigError::IncompatibleLength {
            min: range.min,
            max: range.max,
            attempts: MAX_SAMPLING_ATTEMPTS,
        })
    }
}

impl FromStr for ContigMap {
    type Err = ContigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ContigMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.chains.iter().map(ContigChain::to_string).collect();
        write!(f, "{}", parts.join(" "))
    }
}

fn validate_receptor(chain: &ContigChain) -> Result<(), ContigError> {
    let fail = |reason: &str| ContigError::Receptor {
        chain: chain.to_string(),
        reason: reason.to_string(),
    };
    let fragments: Vec<(char, i32, i32)> = chain.motif_fragments().collect();
    let Some(&(source, _, _)) = fragments.first() else {
        return Err(fail("no motif segments"));
    };
    if fragments.iter().any(|&(c, _, _)| c != source) {
        return Err(fail("fragments must come from one reference chain"));
    }
    if fragments.windows(2).any(|w| w[0].2 >= w[1].1) {
        return Err(fail("fragments must be in ascending, non-overlapping order"));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampledChain {
    pub label: char,
    pub length: usize,
    pub receptor: bool,
}

/// A contig with every length fixed: the residue layout of one design.
///
/// Designed chains come first (labelled `A`, `B`, ...), followed by receptor chains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampledContig {
    chains: Vec<SampledChain>,
    /// Reference residue copied to each output residue; `None` for designed positions.
    mapping: Vec<Option<(char, i32)>>,
    /// Motif residues whose structure is diffused (inpaint_str); always `false` off-motif.
    diffused: Vec<bool>,
    residue_index: Vec<i64>,
    designed_length: usize,
}

impl SampledContig {
    fn build(designed: &[&ContigChain], lengths: &[Vec<usize>], receptors: &[&ContigChain]) -> Self {
        let mut chains = Vec::new();
        let mut mapping = Vec::new();
        let mut residue_index = Vec::new();
        let mut next_index = 0i64;

        for (chain, segment_lengths) in designed.iter().zip(lengths) {
            if !chains.is_empty() {
                next_index += CHAIN_BREAK_OFFSET;
            }
            let start = mapping.len();
            for (segment, &len) in chain.segments.iter().zip(segment_lengths) {
                match *segment {
                    Segment::Motif {
                        chain: source,
                        start: first,
                        end: last,
                    } => {
                        mapping.extend((first..=last).map(|number| Some((source, number))));
                    }
                    _ => mapping.extend(std::iter::repeat_n(None, len)),
                }
            }
            for _ in start..mapping.len() {
                residue_index.push(next_index);
                next_index += 1;
            }
            chains.push(SampledChain {
                label: chain_label(chains.len()),
                length: mapping.len() - start,
                receptor: false,
            });
        }
        let designed_length = mapping.len();

        for chain in receptors {
            if !chains.is_empty() {
                next_index += CHAIN_BREAK_OFFSET;
            }
            let start = mapping.len();
            let mut previous_end: Option<i32> = None;
            for (source, first, last) in chain.motif_fragments() {
                if let Some(end) = previous_end {
                    // Keep the reference numbering gap between fragments of one chain.
                    next_index += i64::from(first) - i64::from(end) - 1;
                }
                for number in first..=last {
                    mapping.push(Some((source, number)));
                    residue_index.push(next_index);
                    next_index += 1;
                }
                previous_end = Some(last);
            }
            chains.push(SampledChain {
                label: chain_label(chains.len()),
                length: mapping.len() - start,
                receptor: true,
            });
        }

        // Designed chains whose sampled length is zero do not exist in the output.
        chains.retain(|c| c.length > 0);
        for (k, chain) in chains.iter_mut().enumerate() {
            chain.label = chain_label(k);
        }

        let diffused = vec![false; mapping.len()];
        Self {
            chains,
            mapping,
            diffused,
            residue_index,
            designed_length,
        }
    }

    fn mark_diffused(&mut self, ranges: &[(char, i32, i32)]) {
        for (flag, source) in self.diffused.iter_mut().zip(&self.mapping) {
            if let Some((chain, number)) = *source {
                *flag = ranges
                    .iter()
                    .any(|&(c, first, last)| c == chain && (first..=last).contains(&number));
            }
        }
    }

    pub fn chains(&self) -> &[SampledChain] {
        &self.chains
    }

    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }

    /// Residues in designed chains (motif residues included, receptors excluded).
    pub fn designed_length(&self) -> usize {
        self.designed_length
    }

    pub fn mapping(&self) -> &[Option<(char, i32)>] {
        &self.mapping
    }

    /// `true` for residues whose structure is copied from the reference and held fixed.
    pub fn motif_mask(&self) -> Vec<bool> {
        self.mapping
            .iter()
            .zip(&self.diffused)
            .map(|(source, &diffused)| source.is_some() && !diffused)
            .collect()
    }

    /// `true` for motif residues whose structure is diffused rather than fixed.
    pub fn diffused_mask(&self) -> &[bool] {
        &self.diffused
    }

    /// Design-to-reference correspondence of every motif residue.
    ///
    /// With a reference, each entry also records the residue's position in the reference
    /// frames. Design numbering is 1-based within each asymmetric-unit chain.
    pub fn mapping_record(&self, reference: Option<&ReferenceStructure>) -> ContigMapping {
        let design_labels = self
            .chains
            .iter()
            .flat_map(|c| (1..=c.length).map(move |number| (c.label, number)));
        let residues = self
            .mapping
            .iter()
            .zip(&self.diffused)
            .zip(design_labels)
            .enumerate()
            .filter_map(|(design_index, ((source, &diffused), (design_chain, design_number)))| {
                let (reference_chain, reference_number) = (*source)?;
                Some(MappedResidue {
                    design_chain,
                    design_number,
                    design_index,
                    reference_chain,
                    reference_number,
                    reference_index: reference.and_then(|r| r.position(reference_chain, reference_number)),
                    diffused,
                })
            })
            .collect();
        ContigMapping {
            designed_length: self.designed_length,
            motif_mask: self.motif_mask(),
            residues,
        }
    }

    /// Positional index for the model, with a jump at every chain break.
    pub fn residue_index(&self) -> &[i64] {
        &self.residue_index
    }

    /// Chain layout for a structure; receptor chains are never replicated by symmetry.
    pub fn chain_infos(&self) -> Vec<ChainInfo> {
        self.chains
            .iter()
            .map(|c| ChainInfo::new(c.label, c.length, !c.receptor))
            .collect()
    }

    /// Fixed-length chain specs describing this layout.
    pub fn chain_specs(&self) -> Vec<ChainSpec> {
        self.chains
            .iter()
            .map(|c| ChainSpec {
                length: LengthSpec::Fixed(c.length),
                symmetric: !c.receptor,
            })
            .collect()
    }
}

/// One reference residue placed in a design.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappedResidue {
    pub design_chain: char,
    pub design_number: usize,
    /// 0-based position in the asymmetric unit.
    pub design_index: usize,
    pub reference_chain: char,
    pub reference_number: i32,
    /// 0-based position in the reference structure, when one was supplied and holds the residue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_index: Option<usize>,
    pub diffused: bool,
}

/// The per-design mapping written next to each output structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContigMapping {
    pub designed_length: usize,
    pub motif_mask: Vec<bool>,
    pub residues: Vec<MappedResidue>,
}

fn motif_len(start: i32, end: i32) -> usize {
    usize::try_from(i64::from(end) - i64::from(start) + 1).unwrap_or(0)
}
