use crate::core::models::frame::RigidFrame;
use crate::core::models::structure::Structure;
use crate::core::utils::geometry::{centroid, superpose};
use nalgebra::{Point3, Rotation3, UnitQuaternion, Vector3};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    #[error("Model returned {found} frames for a structure of {expected} residues")]
    ShapeMismatch { expected: usize, found: usize },
    #[error("Model inference failed: {0}")]
    Failed(String),
}

/// A residue whose frame is fixed by the caller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotifResidue {
    /// Residue index within the asymmetric unit.
    pub index: usize,
    pub frame: RigidFrame,
}

/// Everything the caller wants passed through to the model untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conditioning {
    pub motif: Vec<MotifResidue>,
    pub symmetry: Option<String>,
    pub sequence_constraints: Vec<String>,
    pub extra: toml::Table,
}

impl Conditioning {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_motif(mut self, motif: Vec<MotifResidue>) -> Self {
        self.motif = motif;
        self
    }

    pub fn with_symmetry(mut self, symmetry: impl Into<String>) -> Self {
        self.symmetry = Some(symmetry.into());
        self
    }
}

/// The model's estimate of the clean structure at `t = 0`.
///
/// Frames are returned raw; the sampler validates them, so a model may emit non-finite values
/// and the step is treated as numerically unstable instead of failing outright.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub frames: Vec<RigidFrame>,
    pub confidence: Option<f64>,
}

/// The external structure-prediction network.
///
/// Implementations are shared read-only across concurrent runs.
pub trait DenoisingModel: Send + Sync {
    fn predict(
        &self,
        structure: &Structure,
        t: usize,
        conditioning: &Conditioning,
    ) -> Result<Prediction, ModelError>;
}

/// A stand-in predictor that folds every chain into an ideal α-helix.
///
/// The helix is superposed onto the current Cα trace of each chain, so repeated predictions
/// pull a noisy structure toward helical bundles without moving chains far from where they are.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IdealHelixModel {
    pub radius: f64,
    pub rise: f64,
    /// Twist per residue in radians.
    pub twist: f64,
}

impl Default for IdealHelixModel {
    fn default() -> Self {
        Self {
            radius: 2.3,
            rise: 1.5,
            twist: 100f64.to_radians(),
        }
    }
}

impl IdealHelixModel {
    /// Frames of an ideal helix of `length` residues along z, starting on the x axis.
    pub fn helix(&self, length: usize) -> Vec<RigidFrame> {
        (0..length)
            .map(|i| {
                let angle = self.twist * i as f64;
                let (sin, cos) = angle.sin_cos();
                let position = Point3::new(self.radius * cos, self.radius * sin, self.rise * i as f64);
                let tangent = Vector3::new(
                    -self.radius * self.twist * sin,
                    self.radius * self.twist * cos,
                    self.rise,
                )
                .normalize();
                let radial = Vector3::new(cos, sin, 0.0);
                let rotation =
                    Rotation3::from_basis_unchecked(&[tangent, radial, tangent.cross(&radial)]);
                RigidFrame::new(UnitQuaternion::from_rotation_matrix(&rotation), position)
            })
            .collect()
    }

    fn fit_chain(&self, current: &[RigidFrame]) -> Vec<RigidFrame> {
        let helix = self.helix(current.len());
        let helix_points: Vec<Point3<f64>> = helix.iter().map(|f| f.position).collect();
        let current_points: Vec<Point3<f64>> = current.iter().map(|f| f.position).collect();

        let fitted = if current.len() >= 3 {
            superpose(&helix_points, &current_points)
        } else {
            None
        };
        let (rotation, translation) = fitted.unwrap_or_else(|| {
            let shift = match (centroid(&current_points), centroid(&helix_points)) {
                (Some(to), Some(from)) => to - from,
                _ => Vector3::zeros(),
            };
            (Rotation3::identity(), shift)
        });

        let orientation = UnitQuaternion::from_rotation_matrix(&rotation);
        helix
            .iter()
            .map(|f| RigidFrame::new(orientation * f.orientation, rotation * f.position + translation))
            .collect()
    }
}

impl DenoisingModel for IdealHelixModel {
    fn predict(
        &self,
        structure: &Structure,
        _t: usize,
        _conditioning: &Conditioning,
    ) -> Result<Prediction, ModelError> {
        let mut frames = Vec::with_capacity(structure.len());
        for k in 0..structure.chains().len() {
            let range = structure
                .chain_range(k)
                .ok_or_else(|| ModelError::Failed(format!("chain {} has no residue range", k)))?;
            frames.extend(self.fit_chain(&structure.frames()[range]));
        }
        Ok(Prediction {
            frames,
            confidence: None,
        })
    }
}
