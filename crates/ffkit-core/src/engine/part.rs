use super::comlist::ComList;
use super::dlist::DeltaList;
use super::error::{BuildError, ComputeError};
use super::ewald::{compute_correction, compute_neutralizing, compute_reciprocal, gmax_for};
use super::grid::EnergyGrid;
use super::iclist::InternalCoordinateList;
use super::nlist::NeighborList;
use super::pair::PairInteraction;
use super::vlist::{ValenceTerm, ValenceTermList};
use crate::core::models::cell::Cell;
use crate::core::models::system::System;
use crate::core::scaling::Scalings;
use crate::sampling::bias::BiasPart;
use nalgebra::{Matrix3, Vector3};
use std::collections::HashMap;
use tracing::{debug, trace};

/// Whether a part's cached results reflect the current system state.
/// `clear` additionally poisons the cached numbers with NaN, so a stale
/// read that slips past this tag still surfaces as a loud numeric error
/// instead of silently wrong physics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Stale,
    Valid,
}

#[derive(Debug, Clone)]
struct PartCache {
    state: CacheState,
    energy: f64,
    gpos: Vec<Vector3<f64>>,
    vtens: Matrix3<f64>,
}

impl PartCache {
    fn new(natom: usize) -> Self {
        let mut cache = Self {
            state: CacheState::Stale,
            energy: f64::NAN,
            gpos: vec![Vector3::zeros(); natom],
            vtens: Matrix3::zeros(),
        };
        cache.clear();
        cache
    }

    fn clear(&mut self) {
        self.state = CacheState::Stale;
        self.energy = f64::NAN;
        self.gpos.fill(Vector3::repeat(f64::NAN));
        self.vtens = Matrix3::repeat(f64::NAN);
    }
}

/// The covalent part of a force field, evaluated through the three-layer
/// pipeline: relative vectors, internal coordinates, valence terms. The
/// forward path runs the layers in that order; derivatives run them in
/// reverse, each layer converting its accumulated derivatives into the
/// layer below.
#[derive(Debug, Clone)]
pub struct ValencePart {
    dlist: DeltaList,
    iclist: InternalCoordinateList,
    vlist: ValenceTermList,
    natom: usize,
}

impl ValencePart {
    pub fn new(system: &System) -> Self {
        Self {
            dlist: DeltaList::new(),
            iclist: InternalCoordinateList::new(),
            vlist: ValenceTermList::new(),
            natom: system.natom(),
        }
    }

    /// Adds a covalent energy term. Terms accumulate; there is no removal.
    pub fn add_term(&mut self, term: &ValenceTerm) -> Result<usize, BuildError> {
        for ic in term.ics() {
            for index in ic.atoms() {
                if index >= self.natom {
                    return Err(BuildError::AtomIndexOutOfBounds {
                        index,
                        natom: self.natom,
                    });
                }
            }
        }
        let row = self.vlist.add_term(&mut self.dlist, &mut self.iclist, term);
        trace!(row, kind = ?term.kind(), "added valence term");
        Ok(row)
    }

    pub fn term_energy(&self, row: usize) -> f64 {
        self.vlist.term_energy(row)
    }

    /// The current values of the internal coordinates one term reads.
    pub fn term_ic_values(&self, row: usize) -> Vec<f64> {
        self.vlist
            .term_ic_rows(row)
            .into_iter()
            .map(|ic_row| self.iclist.value(ic_row))
            .collect()
    }

    pub(crate) fn compute(
        &mut self,
        system: &System,
        gpos: Option<&mut [Vector3<f64>]>,
        vtens: Option<&mut Matrix3<f64>>,
    ) -> f64 {
        self.dlist.forward(system.pos(), system.cell());
        self.iclist.forward(&self.dlist);
        let energy = self.vlist.forward(&self.iclist);
        if gpos.is_some() || vtens.is_some() {
            self.vlist.back(&mut self.iclist);
            self.iclist.back(&mut self.dlist);
            self.dlist.back(gpos, vtens);
        }
        energy
    }
}

/// A smooth soft-minimum transform applied to the energy of a
/// coarse-grained valence part: energies far above the threshold pass
/// through unchanged, energies far below flatten out at the threshold,
/// and gradient and virial are scaled by the transform's derivative.
#[derive(Debug, Clone, Copy)]
pub struct EnergyScaling {
    pub threshold: f64,
    pub curvature: f64,
}

impl EnergyScaling {
    fn apply(
        &self,
        gpos: Option<&mut [Vector3<f64>]>,
        vtens: Option<&mut Matrix3<f64>>,
        energy: f64,
    ) -> f64 {
        let delta = energy - self.threshold;
        if self.curvature * delta >= 40.0 {
            return energy;
        }
        let a = (self.curvature * delta).exp();
        let n = a + 1.0;
        let scale = a / n;
        if let Some(gpos) = gpos {
            for g in gpos {
                *g *= scale;
            }
        }
        if let Some(vtens) = vtens {
            *vtens *= scale;
        }
        n.ln() / self.curvature + self.threshold
    }
}

/// Covalent interactions acting on centers of mass instead of atoms: the
/// same three-layer pipeline, preceded by the bead aggregation layer and
/// followed by scattering the bead gradients back onto the atoms.
#[derive(Debug, Clone)]
pub struct ValenceComPart {
    comlist: ComList,
    dlist: DeltaList,
    iclist: InternalCoordinateList,
    vlist: ValenceTermList,
    scaling: Option<EnergyScaling>,
}

impl ValenceComPart {
    pub fn new(comlist: ComList, scaling: Option<EnergyScaling>) -> Self {
        Self {
            comlist,
            dlist: DeltaList::new(),
            iclist: InternalCoordinateList::new(),
            vlist: ValenceTermList::new(),
            scaling,
        }
    }

    /// Adds a covalent term whose indices refer to beads, not atoms.
    pub fn add_term(&mut self, term: &ValenceTerm) -> Result<usize, BuildError> {
        for ic in term.ics() {
            for index in ic.atoms() {
                if index >= self.comlist.nbead() {
                    return Err(BuildError::AtomIndexOutOfBounds {
                        index,
                        natom: self.comlist.nbead(),
                    });
                }
            }
        }
        Ok(self.vlist.add_term(&mut self.dlist, &mut self.iclist, term))
    }

    fn compute(
        &mut self,
        system: &System,
        gpos: Option<&mut [Vector3<f64>]>,
        mut vtens: Option<&mut Matrix3<f64>>,
    ) -> f64 {
        self.comlist.forward(system);
        self.dlist.forward(self.comlist.positions(), system.cell());
        self.iclist.forward(&self.dlist);
        let mut energy = self.vlist.forward(&self.iclist);
        if gpos.is_some() || vtens.is_some() {
            self.vlist.back(&mut self.iclist);
            self.iclist.back(&mut self.dlist);
            self.comlist.reset_gpos();
            // The bead-level relative vectors transform linearly under
            // uniform deformations, so the virial is complete here.
            self.dlist
                .back(Some(self.comlist.gpos_mut()), vtens.as_deref_mut());
            if let Some(scaling) = &self.scaling {
                energy = scaling.apply(Some(self.comlist.gpos_mut()), vtens, energy);
            }
            self.comlist.back(gpos);
        } else if let Some(scaling) = &self.scaling {
            energy = scaling.apply(None, None, energy);
        }
        energy
    }
}

/// Parameters of the reciprocal-space Ewald sum. `gmax` tracks the cell
/// and is refreshed on every cell update.
#[derive(Debug, Clone)]
pub struct EwaldReciprocalPart {
    alpha: f64,
    gcut: f64,
    dielectric: f64,
    gmax: [i32; 3],
}

impl EwaldReciprocalPart {
    fn update_gmax(&mut self, cell: &Cell) {
        self.gmax = gmax_for(cell, self.gcut);
        debug!(gmax = ?self.gmax, "updated reciprocal lattice bounds");
    }
}

#[derive(Debug, Clone)]
pub struct EwaldCorrectionPart {
    alpha: f64,
    dielectric: f64,
    scalings: Scalings,
}

#[derive(Debug, Clone)]
pub struct EwaldNeutralizingPart {
    alpha: f64,
    dielectric: f64,
}

/// A constant external pressure contribution `P * V`.
#[derive(Debug, Clone)]
pub struct PressurePart {
    pext: f64,
}

/// Per-atom-type energies interpolated from 3D grids. Supports energies
/// only; derivative requests fail loudly.
#[derive(Debug, Clone)]
pub struct GridPart {
    grids: HashMap<String, EnergyGrid>,
}

/// Compensates for the neglect of a decaying pair potential beyond its
/// cutoff, assuming a uniform density of partners there.
#[derive(Debug, Clone)]
pub struct TailCorrectionPart {
    ecorr: f64,
    wcorr: f64,
}

/// The closed set of force-part kinds. Dispatch happens through one match
/// in `ForcePart::compute`; open extension belongs to the parameter
/// generator layer outside this crate.
#[derive(Debug, Clone)]
pub enum PartKind {
    Valence(ValencePart),
    ValenceCom(ValenceComPart),
    Pair(PairInteraction),
    EwaldReciprocal(EwaldReciprocalPart),
    EwaldCorrection(EwaldCorrectionPart),
    EwaldNeutralizing(EwaldNeutralizingPart),
    Pressure(PressurePart),
    Grid(GridPart),
    TailCorrection(TailCorrectionPart),
    Bias(BiasPart),
}

/// One contribution to the force field energy, wrapped with its stable
/// key and its cache of the last computed results.
///
/// `compute` is the only recomputation entry point: it zeroes the scratch
/// buffers, runs the kind-specific compute, rejects non-finite results,
/// and *adds* the requested derivatives into the caller's buffers so that
/// several parts can share one output buffer.
#[derive(Debug, Clone)]
pub struct ForcePart {
    key: String,
    cache: PartCache,
    kind: PartKind,
}

impl ForcePart {
    pub fn valence(system: &System, part: ValencePart) -> Self {
        Self::wrap("valence", system, PartKind::Valence(part))
    }

    pub fn valence_com(system: &System, part: ValenceComPart) -> Self {
        Self::wrap("valence_com", system, PartKind::ValenceCom(part))
    }

    pub fn bias(system: &System, part: BiasPart) -> Self {
        Self::wrap("bias", system, PartKind::Bias(part))
    }

    pub fn pair(system: &System, interaction: PairInteraction) -> Self {
        let key = format!("pair_{}", interaction.potential().name());
        Self {
            key,
            cache: PartCache::new(system.natom()),
            kind: PartKind::Pair(interaction),
        }
    }

    pub fn ewald_reciprocal(
        system: &System,
        alpha: f64,
        gcut: f64,
        dielectric: f64,
    ) -> Result<Self, BuildError> {
        require_charged_3d(system, "ewald_reci")?;
        let mut part = EwaldReciprocalPart {
            alpha,
            gcut,
            dielectric,
            gmax: [0; 3],
        };
        part.update_gmax(system.cell());
        Ok(Self::wrap("ewald_reci", system, PartKind::EwaldReciprocal(part)))
    }

    pub fn ewald_correction(
        system: &System,
        alpha: f64,
        scalings: Scalings,
        dielectric: f64,
    ) -> Result<Self, BuildError> {
        require_charged_3d(system, "ewald_cor")?;
        Ok(Self::wrap(
            "ewald_cor",
            system,
            PartKind::EwaldCorrection(EwaldCorrectionPart {
                alpha,
                dielectric,
                scalings,
            }),
        ))
    }

    pub fn ewald_neutralizing(
        system: &System,
        alpha: f64,
        dielectric: f64,
    ) -> Result<Self, BuildError> {
        require_charged_3d(system, "ewald_neut")?;
        Ok(Self::wrap(
            "ewald_neut",
            system,
            PartKind::EwaldNeutralizing(EwaldNeutralizingPart { alpha, dielectric }),
        ))
    }

    pub fn pressure(system: &System, pext: f64) -> Result<Self, BuildError> {
        if system.cell().nvec() == 0 {
            return Err(BuildError::WrongPeriodicity {
                part: "press",
                expected: 3,
                actual: 0,
            });
        }
        Ok(Self::wrap("press", system, PartKind::Pressure(PressurePart { pext })))
    }

    pub fn grid(system: &System, grids: HashMap<String, EnergyGrid>) -> Result<Self, BuildError> {
        if system.cell().nvec() != 3 {
            return Err(BuildError::WrongPeriodicity {
                part: "grid",
                expected: 3,
                actual: system.cell().nvec(),
            });
        }
        for iatom in 0..system.natom() {
            let ffatype = system.ffatype(iatom).ok_or(BuildError::MissingAtomData {
                part: "grid",
                field: "ffatypes",
            })?;
            if !grids.contains_key(ffatype) {
                return Err(BuildError::MissingGrid(ffatype.to_string()));
            }
        }
        Ok(Self::wrap("grid", system, PartKind::Grid(GridPart { grids })))
    }

    pub fn tail_correction(
        system: &System,
        interaction: &PairInteraction,
    ) -> Result<Self, BuildError> {
        if system.cell().nvec() != 3 {
            return Err(BuildError::WrongPeriodicity {
                part: "tailcorr",
                expected: 3,
                actual: system.cell().nvec(),
            });
        }
        let (ecorr, wcorr) = interaction.potential().tail_integrals()?;
        let key = format!("tailcorr_pair_{}", interaction.potential().name());
        Ok(Self {
            key,
            cache: PartCache::new(system.natom()),
            kind: PartKind::TailCorrection(TailCorrectionPart { ecorr, wcorr }),
        })
    }

    fn wrap(key: &str, system: &System, kind: PartKind) -> Self {
        Self {
            key: key.to_string(),
            cache: PartCache::new(system.natom()),
            kind,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn kind(&self) -> &PartKind {
        &self.kind
    }

    pub fn kind_mut(&mut self) -> &mut PartKind {
        &mut self.kind
    }

    /// The cutoff this part needs from the shared neighbor list, if any.
    pub fn required_rcut(&self) -> Option<f64> {
        match &self.kind {
            PartKind::Pair(interaction) => Some(interaction.potential().rcut()),
            _ => None,
        }
    }

    /// The cached energy of the last compute, `None` when stale.
    pub fn energy(&self) -> Option<f64> {
        match self.cache.state {
            CacheState::Valid => Some(self.cache.energy),
            CacheState::Stale => None,
        }
    }

    /// Marks all cached results stale and poisons them with NaN.
    pub fn clear(&mut self) {
        self.cache.clear();
    }

    /// Signals that the atomic positions changed.
    pub fn update_pos(&mut self) {
        self.clear();
    }

    /// Signals that the cell vectors changed.
    pub fn update_rvecs(&mut self, cell: &Cell) {
        self.clear();
        if let PartKind::EwaldReciprocal(part) = &mut self.kind {
            part.update_gmax(cell);
        }
    }

    /// Computes this part's energy and, when requested, adds its gradient
    /// and virial into the caller's buffers.
    pub fn compute(
        &mut self,
        system: &System,
        nlist: Option<&NeighborList>,
        gpos: Option<&mut [Vector3<f64>]>,
        vtens: Option<&mut Matrix3<f64>>,
    ) -> Result<f64, ComputeError> {
        let ForcePart { key, cache, kind } = self;
        let want_gpos = gpos.is_some();
        let want_vtens = vtens.is_some();
        if want_gpos {
            cache.gpos.fill(Vector3::zeros());
        }
        if want_vtens {
            cache.vtens = Matrix3::zeros();
        }
        let scratch_gpos = if want_gpos {
            Some(&mut cache.gpos[..])
        } else {
            None
        };
        let scratch_vtens = if want_vtens {
            Some(&mut cache.vtens)
        } else {
            None
        };
        let energy = kind.compute(system, nlist, scratch_gpos, scratch_vtens)?;
        if !energy.is_finite() {
            return Err(ComputeError::NonFiniteEnergy(key.clone()));
        }
        if want_gpos && cache.gpos.iter().any(|g| !g.iter().all(|x| x.is_finite())) {
            return Err(ComputeError::NonFiniteGradient(key.clone()));
        }
        if want_vtens && !cache.vtens.iter().all(|x| x.is_finite()) {
            return Err(ComputeError::NonFiniteVirial(key.clone()));
        }
        cache.energy = energy;
        cache.state = CacheState::Valid;
        if let Some(gpos) = gpos {
            for (out, mine) in gpos.iter_mut().zip(&cache.gpos) {
                *out += mine;
            }
        }
        if let Some(vtens) = vtens {
            *vtens += cache.vtens;
        }
        Ok(energy)
    }
}

impl PartKind {
    fn compute(
        &mut self,
        system: &System,
        nlist: Option<&NeighborList>,
        gpos: Option<&mut [Vector3<f64>]>,
        mut vtens: Option<&mut Matrix3<f64>>,
    ) -> Result<f64, ComputeError> {
        match self {
            PartKind::Valence(part) => Ok(part.compute(system, gpos, vtens)),
            PartKind::ValenceCom(part) => Ok(part.compute(system, gpos, vtens)),
            PartKind::Bias(part) => part.compute(system, gpos, vtens),
            PartKind::Pair(interaction) => {
                let nlist = nlist.ok_or(ComputeError::Unsupported(
                    "a pair part cannot compute without a neighbor list",
                ))?;
                Ok(interaction.compute(nlist, gpos, vtens))
            }
            PartKind::EwaldReciprocal(part) => Ok(compute_reciprocal(
                system.pos(),
                expect_charges(system),
                system.cell(),
                part.alpha,
                part.gmax,
                part.dielectric,
                gpos,
                vtens,
            )),
            PartKind::EwaldCorrection(part) => Ok(compute_correction(
                system.pos(),
                expect_charges(system),
                system.cell(),
                part.alpha,
                &part.scalings,
                part.dielectric,
                gpos,
                vtens,
            )),
            PartKind::EwaldNeutralizing(part) => Ok(compute_neutralizing(
                expect_charges(system),
                system.radii(),
                system.cell(),
                part.alpha,
                part.dielectric,
                vtens,
            )),
            PartKind::Pressure(part) => {
                let cell = system.cell();
                let energy = cell.volume() * part.pext;
                if let Some(vtens) = vtens.as_deref_mut() {
                    if cell.nvec() != 3 {
                        // The 1D and 2D virial formulas are intentionally
                        // not provided.
                        return Err(ComputeError::Unsupported(
                            "the pressure virial is only implemented for 3D periodic cells",
                        ));
                    }
                    *vtens += Matrix3::identity() * energy;
                }
                Ok(energy)
            }
            PartKind::Grid(part) => {
                if gpos.is_some() {
                    return Err(ComputeError::Unsupported(
                        "Cartesian gradients are not supported by the grid part",
                    ));
                }
                if vtens.is_some() {
                    return Err(ComputeError::Unsupported(
                        "cell deformations are not supported by the grid part",
                    ));
                }
                let mut energy = 0.0;
                for iatom in 0..system.natom() {
                    let ffatype = system
                        .ffatype(iatom)
                        .expect("atom types were validated at construction");
                    let grid = &part.grids[ffatype];
                    energy += grid.interpolate(system.cell(), &system.pos()[iatom]);
                }
                Ok(energy)
            }
            PartKind::TailCorrection(part) => {
                let volume = system.cell().volume();
                let energy = 2.0 * std::f64::consts::PI * part.ecorr / volume;
                if let Some(vtens) = vtens {
                    let w = 2.0 * std::f64::consts::PI * part.wcorr / volume;
                    *vtens += Matrix3::identity() * w;
                }
                Ok(energy)
            }
        }
    }
}

fn require_charged_3d(system: &System, part: &'static str) -> Result<(), BuildError> {
    if system.cell().nvec() != 3 {
        return Err(BuildError::WrongPeriodicity {
            part,
            expected: 3,
            actual: system.cell().nvec(),
        });
    }
    if system.charges().is_none() {
        return Err(BuildError::MissingAtomData {
            part,
            field: "charges",
        });
    }
    Ok(())
}

fn expect_charges(system: &System) -> &[f64] {
    system
        .charges()
        .expect("charges were validated at construction")
}
