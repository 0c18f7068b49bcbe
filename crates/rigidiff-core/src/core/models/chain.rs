use std::fmt;

/// Chain labels assigned, in order, to the chains of a structure.
pub const CHAIN_LABELS: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Returns the label for the chain at `index`, cycling once the alphabet is exhausted.
pub fn chain_label(index: usize) -> char {
    let labels = CHAIN_LABELS.as_bytes();
    labels[index % labels.len()] as char
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainInfo {
    pub label: char,     // Chain identifier (e.g., 'A', 'B')
    pub length: usize,   // Number of residues in the chain
    pub symmetric: bool, // Whether symmetry operators replicate this chain
}

impl ChainInfo {
    pub fn new(label: char, length: usize, symmetric: bool) -> Self {
        Self {
            label,
            length,
            symmetric,
        }
    }
}

impl fmt::Display for ChainInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} residues{})",
            self.label,
            self.length,
            if self.symmetric { ", symmetric" } else { "" }
        )
    }
}
