use super::functions::{distance_and_direction, sigmoid_contact};
use super::{Potential, PotentialError, PotentialOutput, parse_params};
use crate::core::models::structure::Structure;
use itertools::Itertools;
use serde::Deserialize;

pub const KIND: &str = "hetero_olig";

fn default_contact_distance() -> f64 {
    8.0
}

fn default_sharpness() -> f64 {
    1.0
}

fn default_min_sequence_separation() -> usize {
    3
}

fn default_weight() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeteroOligParams {
    #[serde(default = "default_contact_distance")]
    pub contact_distance: f64,
    #[serde(default = "default_sharpness")]
    pub sharpness: f64,
    /// Minimum sequence separation for a same-chain pair to count as a contact.
    #[serde(default = "default_min_sequence_separation")]
    pub min_sequence_separation: usize,
    #[serde(default)]
    pub target_inter: Option<f64>,
    #[serde(default)]
    pub target_intra: Option<f64>,
    #[serde(default = "default_weight")]
    pub inter_weight: f64,
    #[serde(default = "default_weight")]
    pub intra_weight: f64,
    /// Restricts the count to these chain labels; all chains when absent.
    #[serde(default)]
    pub chains: Option<Vec<char>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ContactCounts {
    pub inter: f64,
    pub intra: f64,
}

/// Steers smooth inter- and intra-chain contact counts toward target values.
#[derive(Debug, Clone)]
pub struct HeteroOligomerContacts {
    name: String,
    params: HeteroOligParams,
}

impl HeteroOligomerContacts {
    pub fn new(params: HeteroOligParams) -> Result<Self, PotentialError> {
        let invalid = |message: &str| PotentialError::InvalidParams {
            kind: KIND.to_string(),
            message: message.to_string(),
        };
        if params.target_inter.is_none() && params.target_intra.is_none() {
            return Err(invalid("at least one of target_inter or target_intra is required"));
        }
        if !(params.contact_distance > 0.0 && params.contact_distance.is_finite()) {
            return Err(invalid("contact_distance must be positive"));
        }
        if !(params.sharpness > 0.0 && params.sharpness.is_finite()) {
            return Err(invalid("sharpness must be positive"));
        }
        for target in [params.target_inter, params.target_intra].into_iter().flatten() {
            if !(target >= 0.0 && target.is_finite()) {
                return Err(invalid("contact targets must be non-negative"));
            }
        }
        Ok(Self {
            name: KIND.to_string(),
            params,
        })
    }

    pub fn from_params(params: &toml::Table) -> Result<Self, PotentialError> {
        Self::new(parse_params(KIND, params)?)
    }

    /// Residue pairs that participate in the count, tagged `true` for inter-chain pairs.
    fn counted_pairs<'a>(
        &'a self,
        structure: &'a Structure,
    ) -> impl Iterator<Item = (usize, usize, bool)> + 'a {
        let chains = structure.chain_indices();
        let included = move |i: usize| match &self.params.chains {
            Some(labels) => structure
                .chain_of(i)
                .is_some_and(|c| labels.contains(&c.label)),
            None => true,
        };
        (0..structure.len())
            .tuple_combinations()
            .filter(move |&(i, j)| included(i) && included(j))
            .filter_map(move |(i, j)| {
                let inter = chains[i] != chains[j];
                if !inter && j - i < self.params.min_sequence_separation {
                    return None;
                }
                Some((i, j, inter))
            })
    }

    pub fn counts(&self, structure: &Structure) -> ContactCounts {
        let frames = structure.frames();
        let mut counts = ContactCounts::default();
        for (i, j, inter) in self.counted_pairs(structure) {
            let dist = (frames[i].position - frames[j].position).norm();
            let (s, _) = sigmoid_contact(dist, self.params.contact_distance, self.params.sharpness);
            if inter {
                counts.inter += s;
            } else {
                counts.intra += s;
            }
        }
        counts
    }
}

impl Potential for HeteroOligomerContacts {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate_one(&self, structure: &Structure) -> Result<PotentialOutput, PotentialError> {
        let p = &self.params;
        let counts = self.counts(structure);

        let mut output = PotentialOutput::zeros(structure.len());
        let mut inter_coefficient = 0.0;
        let mut intra_coefficient = 0.0;
        if let Some(target) = p.target_inter {
            let deviation = counts.inter - target;
            output.value += 0.5 * p.inter_weight * deviation * deviation;
            inter_coefficient = p.inter_weight * deviation;
        }
        if let Some(target) = p.target_intra {
            let deviation = counts.intra - target;
            output.value += 0.5 * p.intra_weight * deviation * deviation;
            intra_coefficient = p.intra_weight * deviation;
        }

        let frames = structure.frames();
        for (i, j, inter) in self.counted_pairs(structure) {
            let coefficient = if inter {
                inter_coefficient
            } else {
                intra_coefficient
            };
            if coefficient == 0.0 {
                continue;
            }
            let (dist, direction) =
                distance_and_direction(&frames[i].position, &frames[j].position);
            let (_, slope) = sigmoid_contact(dist, p.contact_distance, p.sharpness);
            let g = direction * (coefficient * slope);
            output.gradient[i] += g;
            output.gradient[j] -= g;
        }
        Ok(output)
    }
}
