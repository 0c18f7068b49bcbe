use super::chain::ChainInfo;
use super::frame::{RigidDelta, RigidFrame};
use nalgebra::{Point3, Vector3};
use std::ops::Range;
use thiserror::Error;

/// Residue-index jump inserted between consecutive chains in the model's positional index.
pub const CHAIN_BREAK_OFFSET: i64 = 200;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StructureError {
    #[error("Chain lengths sum to {expected} residues but {found} frames were provided")]
    LengthMismatch { expected: usize, found: usize },
    #[error("Chain '{label}' has zero residues")]
    EmptyChain { label: char },
    #[error("Frame at residue {index} is not a valid rigid pose")]
    InvalidFrame { index: usize },
    #[error("Structure has no chains")]
    NoChains,
}

/// An ordered, chain-labelled sequence of residue frames.
///
/// Residues of one chain are always contiguous and chains appear in the order given by
/// [`Structure::chains`]. The per-residue chain membership is derived from the chain lengths
/// at construction and cannot drift from them afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Structure {
    /// Residue frames in canonical order.
    frames: Vec<RigidFrame>,
    /// Chain index (into `chains`) of every residue.
    chain_index: Vec<usize>,
    /// Chain metadata in order.
    chains: Vec<ChainInfo>,
}

impl Structure {
    /// Builds a structure from frames and chain metadata.
    ///
    /// # Errors
    ///
    /// Returns [`StructureError`] when the chain lengths do not add up to the number of frames,
    /// a chain is empty, or a frame violates the rigid-pose invariant.
    pub fn new(frames: Vec<RigidFrame>, chains: Vec<ChainInfo>) -> Result<Self, StructureError> {
        if chains.is_empty() {
            return Err(StructureError::NoChains);
        }
        if let Some(empty) = chains.iter().find(|c| c.length == 0) {
            return Err(StructureError::EmptyChain { label: empty.label });
        }
        let expected: usize = chains.iter().map(|c| c.length).sum();
        if expected != frames.len() {
            return Err(StructureError::LengthMismatch {
                expected,
                found: frames.len(),
            });
        }
        if let Some(index) = frames.iter().position(|f| !f.is_valid()) {
            return Err(StructureError::InvalidFrame { index });
        }

        let chain_index = chains
            .iter()
            .enumerate()
            .flat_map(|(k, c)| std::iter::repeat_n(k, c.length))
            .collect();

        Ok(Self {
            frames,
            chain_index,
            chains,
        })
    }

    /// A structure with every residue at the origin with identity orientation.
    pub fn idealized(chains: Vec<ChainInfo>) -> Result<Self, StructureError> {
        let total = chains.iter().map(|c| c.length).sum();
        Self::new(vec![RigidFrame::identity(); total], chains)
    }

    /// Returns a copy of this structure carrying `frames` instead, keeping the chain layout.
    pub fn with_frames(&self, frames: Vec<RigidFrame>) -> Result<Self, StructureError> {
        if frames.len() != self.frames.len() {
            return Err(StructureError::LengthMismatch {
                expected: self.frames.len(),
                found: frames.len(),
            });
        }
        if let Some(index) = frames.iter().position(|f| !f.is_valid()) {
            return Err(StructureError::InvalidFrame { index });
        }
        Ok(Self {
            frames,
            chain_index: self.chain_index.clone(),
            chains: self.chains.clone(),
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> &[RigidFrame] {
        &self.frames
    }

    pub fn frame(&self, index: usize) -> Option<&RigidFrame> {
        self.frames.get(index)
    }

    pub fn chains(&self) -> &[ChainInfo] {
        &self.chains
    }

    /// Chain index of every residue.
    pub fn chain_indices(&self) -> &[usize] {
        &self.chain_index
    }

    pub fn chain_of(&self, residue: usize) -> Option<&ChainInfo> {
        self.chain_index.get(residue).map(|&k| &self.chains[k])
    }

    /// Residue range covered by the chain at `chain` (an index into [`Structure::chains`]).
    pub fn chain_range(&self, chain: usize) -> Option<Range<usize>> {
        if chain >= self.chains.len() {
            return None;
        }
        let start: usize = self.chains[..chain].iter().map(|c| c.length).sum();
        Some(start..start + self.chains[chain].length)
    }

    /// Residue range of the first chain carrying `label`.
    pub fn chain_range_by_label(&self, label: char) -> Option<Range<usize>> {
        let k = self.chains.iter().position(|c| c.label == label)?;
        self.chain_range(k)
    }

    /// Residue positions (the frame origins, i.e. the Cα trace).
    pub fn positions(&self) -> Vec<Point3<f64>> {
        self.frames.iter().map(|f| f.position).collect()
    }

    /// Positional index fed to the model: consecutive inside a chain, with a
    /// [`CHAIN_BREAK_OFFSET`] jump between chains.
    pub fn residue_index(&self) -> Vec<i64> {
        let mut index = Vec::with_capacity(self.len());
        let mut next = 0i64;
        for (k, chain) in self.chains.iter().enumerate() {
            if k > 0 {
                next += CHAIN_BREAK_OFFSET;
            }
            for _ in 0..chain.length {
                index.push(next);
                next += 1;
            }
        }
        index
    }

    pub fn center_of_mass(&self) -> Point3<f64> {
        let sum: Vector3<f64> = self.frames.iter().map(|f| f.position.coords).sum();
        Point3::from(sum / self.frames.len().max(1) as f64)
    }

    /// Returns a copy translated so that the center of mass sits at the origin.
    pub fn centered(&self) -> Self {
        let shift = -self.center_of_mass().coords;
        let frames = self
            .frames
            .iter()
            .map(|f| RigidFrame::new(f.orientation, f.position + shift))
            .collect();
        Self {
            frames,
            chain_index: self.chain_index.clone(),
            chains: self.chains.clone(),
        }
    }

    /// Per-residue deltas that carry this structure onto `target` (same layout assumed).
    pub fn deltas_to(&self, target: &Structure) -> Vec<RigidDelta> {
        self.frames
            .iter()
            .zip(target.frames.iter())
            .map(|(a, b)| a.delta_to(b))
            .collect()
    }

    /// True when `other` has the same chain layout (labels, lengths and symmetry flags).
    pub fn same_layout(&self, other: &Structure) -> bool {
        self.chains == other.chains
    }
}
