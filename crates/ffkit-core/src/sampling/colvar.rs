use crate::core::models::system::System;
use crate::engine::comlist::ComList;
use crate::engine::dlist::DeltaList;
use crate::engine::error::{BuildError, ComputeError};
use crate::engine::iclist::{InternalCoordinate, InternalCoordinateList};
use nalgebra::{Matrix3, Vector3};

/// A private delta/internal-coordinate pipeline evaluating one or more
/// internal coordinates for a collective variable, optionally on top of a
/// center-of-mass layer.
#[derive(Debug, Clone)]
struct IcPipeline {
    dlist: DeltaList,
    iclist: InternalCoordinateList,
    rows: Vec<usize>,
    comlist: Option<ComList>,
}

impl IcPipeline {
    fn new(
        system: &System,
        ics: &[InternalCoordinate],
        comlist: Option<ComList>,
    ) -> Result<Self, BuildError> {
        let count = match &comlist {
            Some(comlist) => comlist.nbead(),
            None => system.natom(),
        };
        let mut dlist = DeltaList::new();
        let mut iclist = InternalCoordinateList::new();
        let mut rows = Vec::with_capacity(ics.len());
        for ic in ics {
            for index in ic.atoms() {
                if index >= count {
                    return Err(BuildError::AtomIndexOutOfBounds {
                        index,
                        natom: count,
                    });
                }
            }
            rows.push(iclist.add_ic(&mut dlist, *ic));
        }
        Ok(Self {
            dlist,
            iclist,
            rows,
            comlist,
        })
    }

    fn forward(&mut self, system: &System) {
        if let Some(comlist) = &mut self.comlist {
            comlist.forward(system);
            self.dlist.forward(comlist.positions(), system.cell());
        } else {
            self.dlist.forward(system.pos(), system.cell());
        }
        self.iclist.forward(&self.dlist);
    }

    /// Back-propagates the row gradients that were set with `add_grad`
    /// into the caller buffers, which must already be zeroed.
    fn back(&mut self, gpos: Option<&mut [Vector3<f64>]>, vtens: Option<&mut Matrix3<f64>>) {
        self.iclist.back(&mut self.dlist);
        if let Some(comlist) = &mut self.comlist {
            comlist.reset_gpos();
            self.dlist.back(Some(comlist.gpos_mut()), vtens);
            comlist.back(gpos);
        } else {
            self.dlist.back(gpos, vtens);
        }
    }
}

/// A scalar observable of the system state with the same compute
/// contract as a force part, except that caller buffers are *written*,
/// not accumulated into. Bias potentials chain-rule through these
/// derivatives by scaling the buffers in place.
#[derive(Debug, Clone)]
pub enum CollectiveVariable {
    /// The generalized volume of the periodic cell.
    Volume,
    /// A single internal coordinate.
    InternalCoordinate { pipeline: IcPipelineBox },
    /// A weighted sum of internal coordinates.
    LinCombIc {
        pipeline: IcPipelineBox,
        weights: Vec<f64>,
    },
    /// One component of the difference between two groups' centers of
    /// mass, projected on the lower-triangular cell axes. Periodic images
    /// are deliberately ignored: the centers of mass use absolute
    /// positions.
    ComProjection { weights: Vec<f64>, index: usize },
}

/// Opaque wrapper keeping the pipeline internals out of the public enum
/// surface.
#[derive(Debug, Clone)]
pub struct IcPipelineBox(IcPipeline);

impl CollectiveVariable {
    pub fn volume(system: &System) -> Result<Self, BuildError> {
        if system.cell().nvec() == 0 {
            return Err(BuildError::Aperiodic("cv_volume"));
        }
        Ok(Self::Volume)
    }

    pub fn internal_coordinate(
        system: &System,
        ic: InternalCoordinate,
        comlist: Option<ComList>,
    ) -> Result<Self, BuildError> {
        Ok(Self::InternalCoordinate {
            pipeline: IcPipelineBox(IcPipeline::new(system, &[ic], comlist)?),
        })
    }

    pub fn lin_comb_ic(
        system: &System,
        ics: &[InternalCoordinate],
        weights: Vec<f64>,
        comlist: Option<ComList>,
    ) -> Result<Self, BuildError> {
        if ics.len() != weights.len() {
            return Err(BuildError::LengthMismatch {
                field: "weights",
                expected: ics.len(),
                actual: weights.len(),
            });
        }
        Ok(Self::LinCombIc {
            pipeline: IcPipelineBox(IcPipeline::new(system, ics, comlist)?),
            weights,
        })
    }

    /// `index` selects the projection: 0 along the first cell vector, 1
    /// perpendicular to it within the first two vectors' plane, 2
    /// perpendicular to both.
    pub fn com_projection(
        system: &System,
        groups: [&[usize]; 2],
        index: usize,
    ) -> Result<Self, BuildError> {
        if system.cell().nvec() != 3 {
            return Err(BuildError::WrongPeriodicity {
                part: "cv_com_projection",
                expected: 3,
                actual: system.cell().nvec(),
            });
        }
        if index >= 3 {
            return Err(BuildError::AtomIndexOutOfBounds { index, natom: 3 });
        }
        let masses = system.masses().ok_or(BuildError::MissingAtomData {
            part: "cv_com_projection",
            field: "masses",
        })?;
        let mut weights = vec![0.0; system.natom()];
        for (igroup, group) in groups.iter().enumerate() {
            if group.is_empty() {
                return Err(BuildError::InvalidComGroup {
                    index: igroup,
                    reason: "the group contains no atoms",
                });
            }
            let mut total = 0.0;
            for &iatom in *group {
                if iatom >= system.natom() {
                    return Err(BuildError::AtomIndexOutOfBounds {
                        index: iatom,
                        natom: system.natom(),
                    });
                }
                total += masses[iatom];
            }
            let sign = if igroup == 0 { -1.0 } else { 1.0 };
            for &iatom in *group {
                weights[iatom] = sign * masses[iatom] / total;
            }
        }
        Ok(Self::ComProjection { weights, index })
    }

    /// Computes the value; when buffers are given, writes the derivative
    /// of the value into them.
    pub fn compute(
        &mut self,
        system: &System,
        mut gpos: Option<&mut [Vector3<f64>]>,
        mut vtens: Option<&mut Matrix3<f64>>,
    ) -> Result<f64, ComputeError> {
        if let Some(gpos) = gpos.as_deref_mut() {
            gpos.fill(Vector3::zeros());
        }
        if let Some(vtens) = vtens.as_deref_mut() {
            *vtens = Matrix3::zeros();
        }
        match self {
            Self::Volume => {
                let value = system.cell().volume();
                if let Some(vtens) = vtens {
                    if system.cell().nvec() != 3 {
                        return Err(ComputeError::Unsupported(
                            "the volume virial is only implemented for 3D periodic cells",
                        ));
                    }
                    *vtens = Matrix3::identity() * value;
                }
                Ok(value)
            }
            Self::InternalCoordinate {
                pipeline: IcPipelineBox(pipeline),
            } => {
                pipeline.forward(system);
                let value = pipeline.iclist.value(pipeline.rows[0]);
                if gpos.is_some() || vtens.is_some() {
                    pipeline.iclist.add_grad(pipeline.rows[0], 1.0);
                    pipeline.back(gpos, vtens);
                }
                Ok(value)
            }
            Self::LinCombIc {
                pipeline: IcPipelineBox(pipeline),
                weights,
            } => {
                pipeline.forward(system);
                let mut value = 0.0;
                for (row, weight) in pipeline.rows.iter().zip(weights.iter()) {
                    value += weight * pipeline.iclist.value(*row);
                }
                if gpos.is_some() || vtens.is_some() {
                    for (row, weight) in pipeline.rows.iter().zip(weights.iter()) {
                        pipeline.iclist.add_grad(*row, *weight);
                    }
                    pipeline.back(gpos, vtens);
                }
                Ok(value)
            }
            Self::ComProjection { weights, index } => {
                let (_, rotation) = system.cell().to_lower_triangular();
                let mut difference = Vector3::zeros();
                for (weight, pos) in weights.iter().zip(system.pos()) {
                    difference += pos.coords * *weight;
                }
                let rotated = rotation * difference;
                let value = rotated[*index];
                if let Some(gpos) = gpos {
                    let axis: Vector3<f64> = rotation.row(*index).transpose();
                    for (out, weight) in gpos.iter_mut().zip(weights.iter()) {
                        *out = axis * *weight;
                    }
                }
                if let Some(vtens) = vtens {
                    let mut local = Matrix3::zeros();
                    for j in *index..3 {
                        local[(*index, j)] = rotated[j];
                        local[(j, *index)] = rotated[j];
                    }
                    *vtens = rotation.transpose() * local * rotation;
                }
                Ok(value)
            }
        }
    }
}
