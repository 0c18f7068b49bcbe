use super::frame::RigidFrame;
use super::structure::{Structure, StructureError};
use std::collections::HashMap;

/// A structure whose residues carry their author numbering, so that motif residues such as
/// `A163` resolve to the residue numbered 163 in chain `A` rather than to the 163rd one.
///
/// Numbering may start anywhere and may contain gaps. When a `(chain, number)` pair occurs
/// more than once (insertion codes), the first residue carrying it is the one looked up.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceStructure {
    structure: Structure,
    numbers: Vec<i32>,
    positions: HashMap<(char, i32), usize>,
}

impl ReferenceStructure {
    /// Attaches one residue number per frame to `structure`.
    ///
    /// # Errors
    ///
    /// Returns [`StructureError::LengthMismatch`] when `numbers` and the frames differ in length.
    pub fn new(structure: Structure, numbers: Vec<i32>) -> Result<Self, StructureError> {
        if numbers.len() != structure.len() {
            return Err(StructureError::LengthMismatch {
                expected: structure.len(),
                found: numbers.len(),
            });
        }
        let mut positions = HashMap::with_capacity(numbers.len());
        for (index, (&number, &chain)) in numbers.iter().zip(structure.chain_indices()).enumerate() {
            let label = structure.chains()[chain].label;
            positions.entry((label, number)).or_insert(index);
        }
        Ok(Self {
            structure,
            numbers,
            positions,
        })
    }

    /// Numbers every chain `1..=len`.
    pub fn sequential(structure: Structure) -> Self {
        let numbers: Vec<i32> = structure
            .chains()
            .iter()
            .flat_map(|c| (1..).take(c.length))
            .collect();
        let positions = numbers
            .iter()
            .zip(structure.chain_indices())
            .enumerate()
            .map(|(index, (&number, &chain))| ((structure.chains()[chain].label, number), index))
            .collect();
        Self {
            structure,
            numbers,
            positions,
        }
    }

    pub fn structure(&self) -> &Structure {
        &self.structure
    }

    pub fn numbers(&self) -> &[i32] {
        &self.numbers
    }

    /// Index into [`Structure::frames`] of residue `number` of chain `chain`.
    pub fn position(&self, chain: char, number: i32) -> Option<usize> {
        self.positions.get(&(chain, number)).copied()
    }

    pub fn frame(&self, chain: char, number: i32) -> Option<&RigidFrame> {
        self.position(chain, number)
            .and_then(|index| self.structure.frame(index))
    }
}
