use super::SymmetryError;
use super::group::SymmetryGroup;
use crate::core::models::chain::{ChainInfo, chain_label};
use crate::core::models::frame::{RigidDelta, RigidFrame};
use crate::core::models::structure::Structure;
use crate::core::utils::geometry::angular_distance;
use std::ops::Range;

/// Where a residue of the full assembly comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResidueOrigin {
    /// Index of the operator that produced this copy (0 is the identity).
    pub operator: usize,
    /// Residue index within the asymmetric unit.
    pub asym_residue: usize,
}

/// Largest disagreement between a copy and its operator applied to the asymmetric unit.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CopyDeviation {
    /// Position deviation in Å.
    pub position: f64,
    /// Orientation deviation in radians.
    pub orientation: f64,
}

/// Maps between an asymmetric unit and the full assembly generated by a [`SymmetryGroup`].
///
/// Full residue order is canonical and fixed at construction: every symmetric chain is copied
/// once per operator in operator order, then asymmetric chains follow once each. Full chains
/// are relabelled `A`, `B`, `C`, ... in that order.
#[derive(Debug, Clone)]
pub struct SymmetryManager {
    group: SymmetryGroup,
    asym_chains: Vec<ChainInfo>,
    full_chains: Vec<ChainInfo>,
    index_map: Vec<ResidueOrigin>,
    /// Full index of the identity copy of every asymmetric-unit residue.
    identity_copy: Vec<usize>,
}

impl SymmetryManager {
    pub fn new(group: SymmetryGroup, asym_chains: Vec<ChainInfo>) -> Result<Self, SymmetryError> {
        if asym_chains.is_empty() {
            return Err(SymmetryError::InvalidLengthSpec(
                "the asymmetric unit has no chains".to_string(),
            ));
        }
        if let Some(empty) = asym_chains.iter().find(|c| c.length == 0) {
            return Err(SymmetryError::InvalidLengthSpec(format!(
                "chain '{}' of the asymmetric unit is empty",
                empty.label
            )));
        }

        let ranges = chain_ranges(&asym_chains);
        let asym_len = ranges.last().map_or(0, |r| r.end);
        let mut full_chains = Vec::new();
        let mut index_map = Vec::new();
        let mut identity_copy = vec![0; asym_len];

        let mut push_chain = |operator: usize, chain: &ChainInfo, range: &Range<usize>| {
            let label = chain_label(full_chains.len());
            full_chains.push(ChainInfo::new(label, chain.length, chain.symmetric));
            for asym_residue in range.clone() {
                if operator == 0 {
                    identity_copy[asym_residue] = index_map.len();
                }
                index_map.push(ResidueOrigin {
                    operator,
                    asym_residue,
                });
            }
        };

        for operator in 0..group.order() {
            for (chain, range) in asym_chains.iter().zip(&ranges) {
                if chain.symmetric {
                    push_chain(operator, chain, range);
                }
            }
        }
        for (chain, range) in asym_chains.iter().zip(&ranges) {
            if !chain.symmetric {
                push_chain(0, chain, range);
            }
        }

        Ok(Self {
            group,
            asym_chains,
            full_chains,
            index_map,
            identity_copy,
        })
    }

    pub fn group(&self) -> &SymmetryGroup {
        &self.group
    }

    pub fn asym_chains(&self) -> &[ChainInfo] {
        &self.asym_chains
    }

    pub fn full_chains(&self) -> &[ChainInfo] {
        &self.full_chains
    }

    pub fn asym_len(&self) -> usize {
        self.identity_copy.len()
    }

    pub fn full_len(&self) -> usize {
        self.index_map.len()
    }

    pub fn origin(&self, full_residue: usize) -> Option<ResidueOrigin> {
        self.index_map.get(full_residue).copied()
    }

    pub fn index_map(&self) -> &[ResidueOrigin] {
        &self.index_map
    }

    /// Builds the full assembly by applying every operator to the asymmetric unit.
    pub fn expand(&self, asym: &Structure) -> Result<Structure, SymmetryError> {
        self.check_asym_layout(asym)?;
        let source = asym.frames();
        let operators = self.group.operators();
        let frames = self
            .index_map
            .iter()
            .map(|o| source[o.asym_residue].transformed(&operators[o.operator]))
            .collect();
        Ok(Structure::new(frames, self.full_chains.clone())?)
    }

    /// Reduces per-residue updates proposed on the full assembly to one update per
    /// asymmetric-unit residue.
    ///
    /// Each copy's delta is pulled back through its operator rotation before the copies are
    /// averaged, so composing the result and re-expanding keeps every copy exactly symmetric.
    /// Residues of asymmetric chains have a single copy and pass through unchanged.
    pub fn project_update(
        &self,
        asym: &Structure,
        full_update: &[RigidDelta],
    ) -> Result<Vec<RigidDelta>, SymmetryError> {
        self.check_asym_layout(asym)?;
        if full_update.len() != self.full_len() {
            return Err(SymmetryError::LayoutMismatch {
                expected: self.full_len(),
                found: full_update.len(),
            });
        }
        let operators = self.group.operators();
        let mut sums = vec![RigidDelta::zero(); self.asym_len()];
        let mut counts = vec![0usize; self.asym_len()];
        for (origin, delta) in self.index_map.iter().zip(full_update) {
            sums[origin.asym_residue] += delta.pulled_back(&operators[origin.operator].rotation);
            counts[origin.asym_residue] += 1;
        }
        Ok(sums
            .into_iter()
            .zip(counts)
            .map(|(sum, count)| sum * (1.0 / count.max(1) as f64))
            .collect())
    }

    /// Reads the asymmetric unit back out of a full assembly (the identity copies).
    pub fn extract_asymmetric_unit(&self, full: &Structure) -> Result<Structure, SymmetryError> {
        self.check_full_layout(full)?;
        let frames: Vec<RigidFrame> = self
            .identity_copy
            .iter()
            .map(|&i| full.frames()[i])
            .collect();
        Ok(Structure::new(frames, self.asym_chains.clone())?)
    }

    pub fn max_copy_deviation(&self, full: &Structure) -> Result<CopyDeviation, SymmetryError> {
        self.check_full_layout(full)?;
        let frames = full.frames();
        let operators = self.group.operators();
        let mut deviation = CopyDeviation::default();
        for (frame, origin) in frames.iter().zip(&self.index_map) {
            let reference = frames[self.identity_copy[origin.asym_residue]]
                .transformed(&operators[origin.operator]);
            deviation.position = deviation
                .position
                .max((frame.position - reference.position).norm());
            deviation.orientation = deviation
                .orientation
                .max(angular_distance(&frame.orientation, &reference.orientation));
        }
        Ok(deviation)
    }

    /// True when every copy matches its operator applied to the identity copy within
    /// `tolerance` (Å for positions, radians for orientations).
    pub fn is_symmetric(&self, full: &Structure, tolerance: f64) -> bool {
        self.max_copy_deviation(full)
            .is_ok_and(|d| d.position <= tolerance && d.orientation <= tolerance)
    }

    fn check_asym_layout(&self, asym: &Structure) -> Result<(), SymmetryError> {
        if asym.chains() != self.asym_chains.as_slice() {
            return Err(SymmetryError::LayoutMismatch {
                expected: self.asym_len(),
                found: asym.len(),
            });
        }
        Ok(())
    }

    fn check_full_layout(&self, full: &Structure) -> Result<(), SymmetryError> {
        if full.chains() != self.full_chains.as_slice() {
            return Err(SymmetryError::LayoutMismatch {
                expected: self.full_len(),
                found: full.len(),
            });
        }
        Ok(())
    }
}

fn chain_ranges(chains: &[ChainInfo]) -> Vec<Range<usize>> {
    let mut start = 0;
    chains
        .iter()
        .map(|c| {
            let range = start..start + c.length;
            start = range.end;
            range
        })
        .collect()
}
