//! The Poisson solver orchestrator
//!
//! A [`Solver`] is built from the user's physical topology, the boundary
//! conditions of every face and component, and the grid geometry. Its
//! construction selects and sorts the per-direction transform plans and dry
//! runs them to learn every intermediate size; [`Solver::setup`] then
//! materializes the stage topologies, the switches between them, the Green's
//! function and the working buffers; [`Solver::solve`] runs forward stages,
//! the spectral convolution and the backward stages in place on one shared
//! field buffer.
use crate::error::{config_err, invariant_err, Result, SolverError};
use crate::green::{build_green, GreenBuild};
use crate::memory::AlignedVec;
use crate::plan::{sort_plans, PlanKind, PlanOps, PRIORITY_EMPTY};
use crate::switch_topo::SwitchTopo;
use crate::topology::{TopoLayout, Topology};
use crate::types::{
    BoundaryKind, BoundaryTable, Cplx, ExchangeStrategy, GreenKind, Sign, SolveMode,
};
use crate::utils::pencil_nproc_hint;
use mpi::topology::SimpleCommunicator;
use mpi::traits::Communicator;
use rayon::prelude::*;

/// Default smoothing length of the regularized kernels, in grid spacings
const DEFAULT_GREEN_ALPHA: f64 = 2.0;

/// Per-stage outcome of the forward dry run
struct StageInfo {
    dim_id: usize,
    /// Logical global size after this stage, current sample units
    size: [usize; 3],
    is_complex: bool,
    fieldstart: [i64; 3],
    is_r2c: bool,
}

/// Pencil-decomposed spectral Poisson solver
pub struct Solver {
    lda: usize,
    ndim: usize,
    odiff: usize,
    hgrid: [f64; 3],
    green_kind: GreenKind,
    green_alpha: f64,
    strategy: ExchangeStrategy,
    topo_phys: Topology,
    plan_forward: Vec<PlanKind>,
    plan_backward: Vec<PlanKind>,
    plan_green: Vec<PlanKind>,
    plan_backward_diff: Option<Vec<PlanKind>>,
    stages: Vec<StageInfo>,
    dim_order: [usize; 3],
    norm_fact: f64,
    vol_fact: f64,
    // materialized by setup
    topo_hat: Vec<Topology>,
    switches: Vec<SwitchTopo>,
    green: Option<AlignedVec>,
    green_layout: Option<TopoLayout>,
    data: Option<AlignedVec>,
    send_buf: Option<AlignedVec>,
    recv_buf: Option<AlignedVec>,
}

impl Solver {
    /// Create a solver for the given physical topology and boundary table.
    ///
    /// `bc[dim][side][component]` holds the boundary condition of each face;
    /// `h` is the grid spacing and `length` the domain extent (they must
    /// agree with the topology's global sizes). `derivative_order` selects
    /// the rotational output: 0 none, 1 spectral, 2 second-order centered.
    pub fn new(
        topo: Topology,
        bc: &BoundaryTable,
        h: [f64; 3],
        length: [f64; 3],
        derivative_order: usize,
        strategy: ExchangeStrategy,
    ) -> Result<Self> {
        if topo.is_complex() {
            return config_err("the physical topology must hold real samples");
        }
        if derivative_order > 2 {
            return config_err(format!(
                "derivative order must be 0, 1 or 2, got {derivative_order}"
            ));
        }
        let lda = topo.lda();
        let nglob = topo.layout().nglob;
        for d in 0..3 {
            if h[d] <= 0.0 {
                return config_err(format!("grid spacing of direction {d} must be positive"));
            }
            let l = nglob[d] as f64 * h[d];
            if (length[d] - l).abs() > 1e-12 * l.max(1.0) {
                return config_err(format!(
                    "direction {d}: domain length {} does not match {} cells of spacing {}",
                    length[d], nglob[d], h[d]
                ));
            }
            for side in 0..2 {
                if bc[d][side].len() != lda {
                    return config_err(format!(
                        "direction {d} side {side} carries {} boundary kinds for lda = {lda}",
                        bc[d][side].len()
                    ));
                }
            }
        }

        // one plan triple per direction, selected from the boundary pair
        let pairs: Vec<Vec<(BoundaryKind, BoundaryKind)>> = (0..3)
            .map(|d| (0..lda).map(|l| (bc[d][0][l], bc[d][1][l])).collect())
            .collect();
        let mut plan_forward = Vec::with_capacity(3);
        let mut plan_backward = Vec::with_capacity(3);
        let mut plan_green = Vec::with_capacity(3);
        for d in 0..3 {
            plan_forward.push(PlanKind::from_boundary(
                d,
                lda,
                nglob[d],
                h[d],
                &pairs[d],
                Sign::Forward,
                false,
            )?);
            plan_backward.push(PlanKind::from_boundary(
                d,
                lda,
                nglob[d],
                h[d],
                &pairs[d],
                Sign::Backward,
                false,
            )?);
            plan_green.push(PlanKind::from_boundary(
                d,
                1,
                nglob[d],
                h[d],
                &pairs[d][..1],
                Sign::Forward,
                true,
            )?);
        }
        sort_plans(&mut plan_forward);
        sort_plans(&mut plan_backward);
        sort_plans(&mut plan_green);

        let ndim = 3 - plan_forward
            .iter()
            .filter(|p| p.type_priority() == PRIORITY_EMPTY)
            .count();
        if ndim == 0 {
            return config_err("every direction of the domain has extent 1");
        }

        // the backward-diff plans take the derivative duals of the boundary
        // conditions, in the exact order of the backward plans
        let plan_backward_diff = if derivative_order > 0 {
            let dual = |k: BoundaryKind| match k {
                BoundaryKind::Even => BoundaryKind::Odd,
                BoundaryKind::Odd => BoundaryKind::Even,
                other => other,
            };
            let mut plans = Vec::with_capacity(3);
            for bp in &plan_backward {
                let d = bp.meta().dim_id;
                let dual_pairs: Vec<_> =
                    pairs[d].iter().map(|&(a, b)| (dual(a), dual(b))).collect();
                plans.push(PlanKind::from_boundary(
                    d,
                    lda,
                    nglob[d],
                    h[d],
                    &dual_pairs,
                    Sign::Backward,
                    false,
                )?);
            }
            Some(plans)
        } else {
            None
        };

        let mut solver = Self {
            lda,
            ndim,
            odiff: derivative_order,
            hgrid: h,
            green_kind: GreenKind::Chat2,
            green_alpha: DEFAULT_GREEN_ALPHA,
            strategy,
            dim_order: [
                plan_forward[0].meta().dim_id,
                plan_forward[1].meta().dim_id,
                plan_forward[2].meta().dim_id,
            ],
            topo_phys: topo,
            plan_forward,
            plan_backward,
            plan_green,
            plan_backward_diff,
            stages: Vec::new(),
            norm_fact: 1.0,
            vol_fact: 1.0,
            topo_hat: Vec::new(),
            switches: Vec::new(),
            green: None,
            green_layout: None,
            data: None,
            send_buf: None,
            recv_buf: None,
        };
        solver.dry_run(nglob)?;
        Ok(solver)
    }

    /// Dry-run every plan set and record the stage shapes
    fn dry_run(&mut self, nglob: [usize; 3]) -> Result<()> {
        let ndim = self.ndim;
        let run = |plans: &mut [PlanKind]| -> Result<([usize; 3], bool, Vec<StageInfo>)> {
            let mut size = nglob;
            let mut is_complex = false;
            let mut stages = Vec::with_capacity(ndim);
            for plan in plans.iter_mut().take(ndim) {
                plan.promote_to_r2c_if_real(is_complex);
                plan.init(&mut size, &mut is_complex)?;
                let m = plan.meta();
                stages.push(StageInfo {
                    dim_id: m.dim_id,
                    size,
                    is_complex,
                    fieldstart: [
                        m.fieldstart[0] as i64,
                        m.fieldstart[1] as i64,
                        m.fieldstart[2] as i64,
                    ],
                    is_r2c: m.is_r2c,
                });
            }
            Ok((size, is_complex, stages))
        };

        let (fwd_size, fwd_complex, stages) = run(&mut self.plan_forward)?;
        let (bwd_size, bwd_complex, _) = run(&mut self.plan_backward)?;
        let (grn_size, grn_complex, _) = run(&mut self.plan_green)?;
        if let Some(diff) = self.plan_backward_diff.as_mut() {
            run(diff)?;
        }
        if fwd_size != bwd_size || fwd_complex != bwd_complex {
            return invariant_err("forward and backward pipelines disagree on the spectral shape");
        }
        if fwd_size != grn_size || fwd_complex != grn_complex {
            return invariant_err("field and Green pipelines disagree on the spectral shape");
        }
        self.stages = stages;

        self.norm_fact = 1.0;
        self.vol_fact = 1.0;
        for plan in self.plan_forward.iter().take(ndim) {
            self.norm_fact *= plan.meta().norm_fact;
            self.vol_fact *= plan.meta().vol_fact;
        }
        Ok(())
    }

    /// Select the Green's function family (before [`Self::setup`])
    pub fn set_green_kind(&mut self, kind: GreenKind) {
        self.green_kind = kind;
    }

    /// Set the smoothing length of the regularized kernels, in grid spacings
    pub fn set_green_alpha(&mut self, alpha: f64) {
        self.green_alpha = alpha;
    }

    /// Materialize the pipeline: stage topologies, switches, the Green's
    /// function and the working buffers.
    ///
    /// Passing a communicator installs it on every topology first (the
    /// caller may have reordered the ranks of the original group); pass
    /// `None` to keep the group the solver was created with.
    pub fn setup(&mut self, new_comm: Option<&SimpleCommunicator>) -> Result<()> {
        if self.data.is_some() {
            return invariant_err("setup may only run once");
        }
        if let Some(comm) = new_comm {
            self.topo_phys.change_comm(comm)?;
        }
        let comm_size = self.topo_phys.comm().size() as usize;
        let alignment = self.topo_phys.layout().alignment;

        // ------------------------------------------------------------------
        // stage topologies and switches
        // ------------------------------------------------------------------
        let mut topo_hat: Vec<Topology> = Vec::with_capacity(self.ndim);
        let mut switches: Vec<SwitchTopo> = Vec::with_capacity(self.ndim);
        for (ip, stage) in self.stages.iter().enumerate() {
            let nproc = if ip == 0 {
                let hint_axis = if self.ndim > 1 {
                    self.stages[1].dim_id
                } else {
                    (stage.dim_id + 1) % 3
                };
                pencil_nproc_hint(
                    stage.dim_id,
                    comm_size,
                    hint_axis,
                    self.topo_phys.layout().nproc,
                )
            } else {
                pencil_nproc_hint(
                    stage.dim_id,
                    comm_size,
                    self.stages[ip - 1].dim_id,
                    topo_hat[ip - 1].layout().nproc,
                )
            };
            let mut topo = Topology::new(
                stage.dim_id,
                self.lda,
                stage.size,
                nproc,
                stage.is_complex,
                Some(self.dim_order),
                alignment,
                self.topo_phys.comm(),
            )?;
            let prev = if ip == 0 {
                &self.topo_phys
            } else {
                &topo_hat[ip - 1]
            };
            // a real-to-complex stage exchanges data in its pre-transform
            // (real) shape even though the topology is complex
            let switch = if stage.is_r2c {
                topo.switch_to_real();
                let sw = SwitchTopo::new(prev, &topo, stage.fieldstart, self.strategy)?;
                topo.switch_to_complex();
                sw
            } else {
                SwitchTopo::new(prev, &topo, stage.fieldstart, self.strategy)?
            };
            switches.push(switch);
            topo_hat.push(topo);
        }
        // at rest, r2c stages sit in their pre-transform real shape
        for (ip, stage) in self.stages.iter().enumerate() {
            if stage.is_r2c {
                topo_hat[ip].switch_to_real();
            }
        }

        // ------------------------------------------------------------------
        // the Green's function
        // ------------------------------------------------------------------
        if self.green_kind.needs_isotropic_spacing() {
            let spacings: Vec<f64> = (0..self.ndim)
                .map(|ip| self.plan_forward[ip].meta().h)
                .collect();
            if spacings
                .iter()
                .any(|&h| (h - spacings[0]).abs() > 1e-14 * spacings[0])
            {
                return config_err(format!(
                    "the {:?} kernel requires dx = dy = dz, got {:?}",
                    self.green_kind, self.hgrid
                ));
            }
        }
        let last = &self.stages[self.ndim - 1];
        let build = GreenBuild {
            ndim: self.ndim,
            final_size: last.size,
            final_complex: last.is_complex,
            final_nproc: topo_hat[self.ndim - 1].layout().nproc,
            dim_order: self.dim_order,
            comm: self.topo_phys.comm(),
            alignment,
            hgrid: self.hgrid,
            kind: self.green_kind,
            eps: self.green_alpha * self.hgrid[0],
            vol_fact: self.vol_fact,
            strategy: self.strategy,
        };
        let (green, green_layout) = build_green(&mut self.plan_green, &build)?;
        self.plan_green = Vec::new();
        self.green = Some(green);
        self.green_layout = Some(green_layout);

        // ------------------------------------------------------------------
        // field plans and working buffers
        // ------------------------------------------------------------------
        for ip in 0..self.ndim {
            self.plan_forward[ip].allocate()?;
            self.plan_backward[ip].allocate()?;
            if let Some(diff) = self.plan_backward_diff.as_mut() {
                diff[ip].allocate()?;
            }
        }
        let data_len = topo_hat
            .iter()
            .map(Topology::mem_size)
            .chain([self.topo_phys.mem_size()])
            .max()
            .unwrap_or(0);
        self.data = Some(AlignedVec::new(data_len, alignment));
        let buf_len = switches
            .iter()
            .map(SwitchTopo::buf_mem_size)
            .max()
            .unwrap_or(0);
        self.send_buf = Some(AlignedVec::new(buf_len, alignment));
        self.recv_buf = Some(AlignedVec::new(buf_len, alignment));
        self.topo_hat = topo_hat;
        self.switches = switches;
        Ok(())
    }

    /// The first internal topology, in physical space
    pub fn inner_topology_physical(&self) -> Result<&Topology> {
        self.topo_hat
            .first()
            .ok_or_else(|| SolverError::Invariant("setup has not run".into()))
    }

    /// The last internal topology, in full spectral space
    pub fn inner_topology_spectral(&self) -> Result<&Topology> {
        self.topo_hat
            .last()
            .ok_or_else(|| SolverError::Invariant("setup has not run".into()))
    }

    /// The physical topology the solver exchanges data with the caller in
    pub fn topology_physical(&self) -> &Topology {
        &self.topo_phys
    }

    /// Global normalization applied once during convolution
    pub fn norm_fact(&self) -> f64 {
        self.norm_fact
    }

    /// Solve `lap(phi) = rhs`, writing `phi` (STD) or `curl(phi)` (ROT)
    /// into `field`. Both arrays live in the physical topology's padded
    /// layout, `lda` components of `mem_dim` samples each.
    pub fn solve(&mut self, field: &mut [f64], rhs: &[f64], mode: SolveMode) -> Result<()> {
        if self.data.is_none() {
            return invariant_err("solve requires setup to have run");
        }
        if mode == SolveMode::Rot {
            if self.odiff == 0 {
                return Err(SolverError::Unsupported(
                    "the rotational solve needs a solver built with derivative order 1 or 2"
                        .into(),
                ));
            }
            if self.lda != 3 {
                return Err(SolverError::Unsupported(
                    "the rotational solve needs a three-component field".into(),
                ));
            }
        }
        let need = self.topo_phys.mem_size();
        if field.len() < need || rhs.len() < need {
            return config_err(format!(
                "field and rhs must hold at least {need} samples in the physical layout"
            ));
        }

        // zero the whole working array, pad included
        self.data.as_mut().expect("checked above").fill_zero();
        copy_field(self.topo_phys.layout(), rhs, self.data.as_mut().unwrap());

        self.transform(Sign::Forward, mode)?;
        self.convolve(mode)?;
        self.transform(Sign::Backward, mode)?;

        copy_field_out(self.topo_phys.layout(), self.data.as_ref().unwrap(), field);
        Ok(())
    }

    /// Run the forward or backward half of the pipeline in place
    fn transform(&mut self, sign: Sign, mode: SolveMode) -> Result<()> {
        let Self {
            topo_hat,
            switches,
            stages,
            plan_forward,
            plan_backward,
            plan_backward_diff,
            data,
            send_buf,
            recv_buf,
            ndim,
            ..
        } = self;
        let data = data.as_mut().expect("solve checked setup");
        let send = send_buf.as_mut().expect("solve checked setup");
        let recv = recv_buf.as_mut().expect("solve checked setup");

        match sign {
            Sign::Forward => {
                for ip in 0..*ndim {
                    switches[ip].execute(data, Sign::Forward, send, recv)?;
                    let layout = *topo_hat[ip].layout();
                    plan_forward[ip].execute(&layout, data)?;
                    plan_forward[ip].apply_phase_correction(&layout, data)?;
                    if stages[ip].is_r2c {
                        topo_hat[ip].switch_to_complex();
                    }
                }
            }
            Sign::Backward => {
                let plans = match (mode, plan_backward_diff.as_mut()) {
                    (SolveMode::Rot, Some(diff)) => diff,
                    _ => plan_backward,
                };
                for ip in (0..*ndim).rev() {
                    let layout = *topo_hat[ip].layout();
                    plans[ip].apply_phase_correction(&layout, data)?;
                    plans[ip].execute(&layout, data)?;
                    if stages[ip].is_r2c {
                        topo_hat[ip].switch_to_real();
                    }
                    switches[ip].execute(data, Sign::Backward, send, recv)?;
                }
            }
        }
        Ok(())
    }

    /// Pointwise convolution with the Green's function in spectral space
    fn convolve(&mut self, mode: SolveMode) -> Result<()> {
        let layout = *self.topo_hat[self.ndim - 1].layout();
        let green_layout = self.green_layout.as_ref().expect("setup has run");
        if green_layout.nloc != layout.nloc
            || green_layout.nf != layout.nf
            || green_layout.nmem != layout.nmem
        {
            return invariant_err("the Green's function layout does not match the field");
        }
        let data = self.data.as_mut().expect("setup has run");
        let green = self.green.as_ref().expect("setup has run");
        match (mode, layout.is_complex()) {
            (SolveMode::Std, false) => {
                std_real(&layout, self.lda, self.norm_fact, data, green);
            }
            (SolveMode::Std, true) => {
                std_complex(&layout, self.lda, self.norm_fact, data, green);
            }
            (SolveMode::Rot, _) => {
                let diff = self
                    .plan_backward_diff
                    .as_ref()
                    .expect("solve checked the derivative order");
                let mut info = RotInfo::default();
                for ip in 0..self.ndim {
                    let fwd = self.plan_forward[ip].meta();
                    let bwd = diff[ip].meta();
                    let d = fwd.dim_id;
                    info.kfact[d] = fwd.k_fact;
                    info.symstart[d] = fwd.sym_start as f64;
                    for c in 0..3 {
                        info.koffset[d][c] = fwd.k_offset[c];
                        info.corrphase[d][c] =
                            i8::from(bwd.imult[c]) - i8::from(fwd.imult[c]);
                    }
                }
                let order2 = self.odiff == 2;
                if layout.is_complex() {
                    rot_complex(
                        &layout,
                        self.norm_fact,
                        self.hgrid,
                        order2,
                        &info,
                        data,
                        green,
                    );
                } else {
                    rot_real(
                        &layout,
                        self.norm_fact,
                        self.hgrid,
                        order2,
                        &info,
                        data,
                        green,
                    )?;
                }
            }
        }
        Ok(())
    }
}

/// Copy the caller's array into the working buffer, live region only
fn copy_field(layout: &TopoLayout, src: &[f64], dst: &mut [f64]) {
    let ax0 = layout.axis;
    let ax1 = (ax0 + 1) % 3;
    let ax2 = (ax0 + 2) % 3;
    let stride = layout.nmem[ax0] * layout.nf;
    let rows = layout.nloc[ax1] * layout.nloc[ax2];
    let inmax = layout.nloc[ax0] * layout.nf;
    let mem_dim = layout.mem_dim();
    for lia in 0..layout.lda {
        let s = &src[lia * mem_dim..];
        let d = &mut dst[lia * mem_dim..];
        d[..rows * stride]
            .par_chunks_exact_mut(stride)
            .enumerate()
            .for_each(|(io, row)| {
                row[..inmax].copy_from_slice(&s[io * stride..io * stride + inmax]);
            });
    }
}

/// Copy the working buffer back into the caller's array, live region only
fn copy_field_out(layout: &TopoLayout, src: &[f64], dst: &mut [f64]) {
    copy_field(layout, src, dst);
}

/// Real spectrum: every direction symmetric, plain scaling by the kernel
fn std_real(layout: &TopoLayout, lda: usize, norm: f64, data: &mut [f64], green: &[f64]) {
    let ax0 = layout.axis;
    let ax1 = (ax0 + 1) % 3;
    let ax2 = (ax0 + 2) % 3;
    let stride = layout.nmem[ax0] * layout.nf;
    let rows = layout.nloc[ax1] * layout.nloc[ax2];
    let inmax = layout.nloc[ax0] * layout.nf;
    let mem_dim = layout.mem_dim();
    for lia in 0..lda {
        data[lia * mem_dim..lia * mem_dim + rows * stride]
            .par_chunks_exact_mut(stride)
            .enumerate()
            .for_each(|(io, row)| {
                let g = &green[io * stride..io * stride + inmax];
                for (v, gv) in row[..inmax].iter_mut().zip(g) {
                    *v *= norm * gv;
                }
            });
    }
}

/// Complex spectrum: complex multiply with the kernel
fn std_complex(layout: &TopoLayout, lda: usize, norm: f64, data: &mut [f64], green: &[f64]) {
    let ax0 = layout.axis;
    let ax1 = (ax0 + 1) % 3;
    let ax2 = (ax0 + 2) % 3;
    let stride = layout.nmem[ax0] * layout.nf;
    let rows = layout.nloc[ax1] * layout.nloc[ax2];
    let n0 = layout.nloc[ax0];
    let mem_dim = layout.mem_dim();
    for lia in 0..lda {
        data[lia * mem_dim..lia * mem_dim + rows * stride]
            .par_chunks_exact_mut(stride)
            .enumerate()
            .for_each(|(io, row)| {
                let g = &green[io * stride..];
                for i in 0..n0 {
                    let a = row[2 * i];
                    let b = row[2 * i + 1];
                    let c = g[2 * i];
                    let d = g[2 * i + 1];
                    row[2 * i] = norm * (a * c - b * d);
                    row[2 * i + 1] = norm * (a * d + b * c);
                }
            });
    }
}

/// Spectral data of the rotational solve, per direction and component
#[derive(Default)]
struct RotInfo {
    kfact: [f64; 3],
    koffset: [[f64; 3]; 3],
    symstart: [f64; 3],
    corrphase: [[i8; 3]; 3],
}

fn sym_index(gid: usize, symstart: f64) -> f64 {
    let g = gid as f64;
    if symstart > 0.0 && g > symstart {
        g - 2.0 * symstart
    } else {
        g
    }
}

/// Derivative multiplier of component `c` along direction `d`: i k rotated
/// by the net sine-transform phase
fn rot_multiplier(corrphase: i8, kval: f64) -> Cplx {
    match corrphase {
        0 => Cplx::new(0.0, kval),
        1 => Cplx::new(-kval, 0.0),
        -1 => Cplx::new(kval, 0.0),
        _ => unreachable!("phases accumulate to -1, 0 or 1"),
    }
}

#[allow(clippy::too_many_arguments)]
fn rot_complex(
    layout: &TopoLayout,
    norm: f64,
    hgrid: [f64; 3],
    order2: bool,
    info: &RotInfo,
    data: &mut [f64],
    green: &[f64],
) {
    let ax0 = layout.axis;
    let ax1 = (ax0 + 1) % 3;
    let ax2 = (ax0 + 2) % 3;
    let stride = layout.nmem[ax0] * layout.nf;
    let rows = layout.nloc[ax1] * layout.nloc[ax2];
    let n0 = layout.nloc[ax0];
    let n1 = layout.nloc[ax1];
    let start = [layout.start_id(0), layout.start_id(1), layout.start_id(2)];
    let mem_dim = layout.mem_dim();

    let (c0, rest) = data.split_at_mut(mem_dim);
    let (c1, c2) = rest.split_at_mut(mem_dim);
    c0[..rows * stride]
        .par_chunks_exact_mut(stride)
        .zip(c1[..rows * stride].par_chunks_exact_mut(stride))
        .zip(c2[..rows * stride].par_chunks_exact_mut(stride))
        .enumerate()
        .for_each(|(io, ((r0, r1), r2))| {
            let g = &green[io * stride..];
            let mut gid = [0usize; 3];
            gid[ax1] = start[ax1] + io % n1;
            gid[ax2] = start[ax2] + io / n1;
            for i0 in 0..n0 {
                gid[ax0] = start[ax0] + i0;
                // per direction and component: the complex derivative factor
                let mut k = [[Cplx::new(0.0, 0.0); 3]; 3];
                for d in 0..3 {
                    let is = sym_index(gid[d], info.symstart[d]);
                    for c in 0..3 {
                        let kabs = (is + info.koffset[d][c]) * info.kfact[d];
                        let kval = if order2 {
                            (kabs * hgrid[d]).sin() / hgrid[d]
                        } else {
                            kabs
                        };
                        k[d][c] = rot_multiplier(info.corrphase[d][c], kval);
                    }
                }
                let f0 = Cplx::new(r0[2 * i0], r0[2 * i0 + 1]);
                let f1 = Cplx::new(r1[2 * i0], r1[2 * i0 + 1]);
                let f2 = Cplx::new(r2[2 * i0], r2[2 * i0 + 1]);
                let gv = Cplx::new(g[2 * i0], g[2 * i0 + 1]) * norm;
                let o0 = gv * (k[1][2] * f2 - k[2][1] * f1);
                let o1 = gv * (k[2][0] * f0 - k[0][2] * f2);
                let o2 = gv * (k[0][1] * f1 - k[1][0] * f0);
                r0[2 * i0] = o0.re;
                r0[2 * i0 + 1] = o0.im;
                r1[2 * i0] = o1.re;
                r1[2 * i0 + 1] = o1.im;
                r2[2 * i0] = o2.re;
                r2[2 * i0 + 1] = o2.im;
            }
        });
}

#[allow(clippy::too_many_arguments)]
fn rot_real(
    layout: &TopoLayout,
    norm: f64,
    hgrid: [f64; 3],
    order2: bool,
    info: &RotInfo,
    data: &mut [f64],
    green: &[f64],
) -> Result<()> {
    // on a purely real spectrum every derivative factor must be real
    for d in 0..3 {
        for c in 0..3 {
            if info.kfact[d] != 0.0 && info.corrphase[d][c] == 0 {
                return Err(SolverError::Unsupported(
                    "a real spectrum cannot hold the imaginary derivative of direction ".to_owned()
                        + &d.to_string(),
                ));
            }
        }
    }
    let ax0 = layout.axis;
    let ax1 = (ax0 + 1) % 3;
    let ax2 = (ax0 + 2) % 3;
    let stride = layout.nmem[ax0] * layout.nf;
    let rows = layout.nloc[ax1] * layout.nloc[ax2];
    let n0 = layout.nloc[ax0];
    let n1 = layout.nloc[ax1];
    let start = [layout.start_id(0), layout.start_id(1), layout.start_id(2)];
    let mem_dim = layout.mem_dim();

    let (c0, rest) = data.split_at_mut(mem_dim);
    let (c1, c2) = rest.split_at_mut(mem_dim);
    c0[..rows * stride]
        .par_chunks_exact_mut(stride)
        .zip(c1[..rows * stride].par_chunks_exact_mut(stride))
        .zip(c2[..rows * stride].par_chunks_exact_mut(stride))
        .enumerate()
        .for_each(|(io, ((r0, r1), r2))| {
            let g = &green[io * stride..];
            let mut gid = [0usize; 3];
            gid[ax1] = start[ax1] + io % n1;
            gid[ax2] = start[ax2] + io / n1;
            for i0 in 0..n0 {
                gid[ax0] = start[ax0] + i0;
                let mut k = [[0.0f64; 3]; 3];
                for d in 0..3 {
                    let is = sym_index(gid[d], info.symstart[d]);
                    for c in 0..3 {
                        let kabs = (is + info.koffset[d][c]) * info.kfact[d];
                        let kval = if order2 {
                            (kabs * hgrid[d]).sin() / hgrid[d]
                        } else {
                            kabs
                        };
                        k[d][c] = f64::from(info.corrphase[d][c]) * -kval;
                    }
                }
                let f0 = r0[i0];
                let f1 = r1[i0];
                let f2 = r2[i0];
                let gv = g[i0] * norm;
                r0[i0] = gv * (k[1][2] * f2 - k[2][1] * f1);
                r1[i0] = gv * (k[2][0] * f0 - k[0][2] * f2);
                r2[i0] = gv * (k[0][1] * f1 - k[1][0] * f0);
            }
        });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rot_multiplier_phases() {
        let k = 2.5;
        assert_eq!(rot_multiplier(0, k), Cplx::new(0.0, k));
        assert_eq!(rot_multiplier(1, k), Cplx::new(-k, 0.0));
        assert_eq!(rot_multiplier(-1, k), Cplx::new(k, 0.0));
    }

    #[test]
    fn sym_index_mirrors_beyond_start() {
        assert_eq!(sym_index(3, 4.0), 3.0);
        assert_eq!(sym_index(4, 4.0), 4.0);
        assert_eq!(sym_index(5, 4.0), -3.0);
        assert_eq!(sym_index(7, 4.0), -1.0);
        // symstart 0 disables the mirror
        assert_eq!(sym_index(7, 0.0), 7.0);
    }
}
