//! Construction of the Green's function in the field pipeline's frame
//!
//! The Green topologies parallel the field pipeline but carry the global
//! extent of the domain at every stage and a single component. They are
//! derived by walking the pipeline backwards from the field's full-spectral
//! topology: across a real-to-complex stage the fast extent doubles and the
//! samples turn real, so the first topology is the one in which the
//! closed-form kernel is evaluated. The pipeline then runs forward through
//! the same switches and transforms as the field, skipping directions that
//! are already spectral, and finally scales by the cumulative volume factor.
use crate::error::{invariant_err, Result};
use crate::kernels;
use crate::memory::AlignedVec;
use crate::plan::{PlanKind, PlanOps, PRIORITY_EMPTY};
use crate::switch_topo::SwitchTopo;
use crate::topology::{TopoLayout, Topology};
use crate::types::{ExchangeStrategy, GreenKind, Sign};
use crate::utils::{collapsed_index, pencil_nproc_hint};
use mpi::topology::SimpleCommunicator;
use mpi::traits::Communicator;

/// Inputs of the Green build, fixed by the solver's dry run
pub(crate) struct GreenBuild<'a> {
    pub ndim: usize,
    /// Field size after the last forward transform, current sample units
    pub final_size: [usize; 3],
    pub final_complex: bool,
    /// Process grid of the field's full-spectral topology
    pub final_nproc: [usize; 3],
    /// Rank splitting order, identical to the field topologies
    pub dim_order: [usize; 3],
    pub comm: &'a SimpleCommunicator,
    pub alignment: usize,
    pub hgrid: [f64; 3],
    pub kind: GreenKind,
    /// Smoothing length of the regularized kernels
    pub eps: f64,
    /// Product of the per-direction volume factors
    pub vol_fact: f64,
    pub strategy: ExchangeStrategy,
}

/// Build the Green's function: returns the aligned buffer holding it in the
/// full-spectral layout, and that layout
pub(crate) fn build_green(
    plans: &mut [PlanKind],
    p: &GreenBuild,
) -> Result<(AlignedVec, TopoLayout)> {
    let comm_size = p.comm.size() as usize;

    // ------------------------------------------------------------------
    // walk the pipeline backwards to find the stage topologies
    // ------------------------------------------------------------------
    let mut size_tmp = p.final_size;
    let mut is_complex = p.final_complex;
    let mut topos: Vec<Topology> = Vec::with_capacity(p.ndim);
    let mut switches: Vec<Option<SwitchTopo>> = (0..p.ndim).map(|_| None).collect();

    for ip in (0..p.ndim).rev() {
        let dim_id = plans[ip].meta().dim_id;
        let nproc = if ip + 1 == p.ndim {
            p.final_nproc
        } else {
            let hint = topos.last().expect("later stage built first").layout().nproc;
            pencil_nproc_hint(dim_id, comm_size, plans[ip + 1].meta().dim_id, hint)
        };
        let topo = Topology::new(
            dim_id,
            1,
            size_tmp,
            nproc,
            is_complex,
            Some(p.dim_order),
            p.alignment,
            p.comm,
        )?;
        if ip + 1 < p.ndim {
            // the switch to the next stage; Green plans carry no fieldstart
            let fs = plans[ip + 1].meta().fieldstart;
            let shift = [fs[0] as i64, fs[1] as i64, fs[2] as i64];
            let next = topos.last().expect("later stage built first");
            switches[ip + 1] = Some(SwitchTopo::new(&topo, next, shift, p.strategy)?);
        }
        let mut topo = topo;
        if plans[ip].meta().is_r2c_done_by_fft() {
            topo.switch_to_real();
            size_tmp[dim_id] *= 2;
            is_complex = false;
        }
        topos.push(topo);
    }
    topos.reverse();

    // ------------------------------------------------------------------
    // allocate the buffer and the plans
    // ------------------------------------------------------------------
    let green_len = topos.iter().map(Topology::mem_size).max().unwrap_or(0);
    let mut green = AlignedVec::new(green_len, p.alignment);
    for plan in plans.iter_mut().take(p.ndim) {
        plan.allocate()?;
    }
    let buf_len = switches
        .iter()
        .flatten()
        .map(SwitchTopo::buf_mem_size)
        .max()
        .unwrap_or(0);
    let mut send_buf = AlignedVec::new(buf_len, p.alignment);
    let mut recv_buf = AlignedVec::new(buf_len, p.alignment);

    // ------------------------------------------------------------------
    // evaluate the closed-form kernel in the first topology
    // ------------------------------------------------------------------
    let mut hfact = [0.0; 3];
    let mut kfact = [0.0; 3];
    let mut koffset = [0.0; 3];
    let mut symstart = [0.0; 3];
    let mut nbr_spectral = 0;
    for plan in plans.iter().take(p.ndim) {
        let m = plan.meta();
        let d = m.dim_id;
        symstart[d] = m.sym_start as f64;
        if plan.type_priority() == PRIORITY_EMPTY {
            continue;
        }
        if m.is_spectral {
            kfact[d] = m.k_fact;
            koffset[d] = m.k_offset[0];
            nbr_spectral += 1;
        } else {
            hfact[d] = p.hgrid[d];
        }
    }

    let n_unbounded = p.ndim - nbr_spectral;
    {
        let layout = topos[0].layout();
        match n_unbounded {
            3 => kernels::fill_green_3dir_unbounded(
                layout, hfact, symstart, &mut green, p.kind, p.eps,
            )?,
            2 => kernels::fill_green_2dir_unbounded(
                layout, hfact, kfact, koffset, symstart, &mut green, p.kind, p.eps,
            )?,
            1 => kernels::fill_green_1dir_unbounded(
                layout, hfact, kfact, koffset, symstart, &mut green, p.kind, p.eps,
            )?,
            0 => kernels::fill_green_0dir_unbounded(
                layout,
                p.hgrid[0],
                kfact,
                koffset,
                symstart,
                &mut green,
                p.kind,
                p.eps,
                None,
            )?,
            _ => {
                return invariant_err(format!(
                    "{n_unbounded} unbounded directions do not fit a {}-D problem",
                    p.ndim
                ))
            }
        }
    }

    // ------------------------------------------------------------------
    // run the pipeline forward
    // ------------------------------------------------------------------
    for ip in 0..p.ndim {
        if let Some(sw) = switches[ip].as_ref() {
            sw.execute(&mut green, Sign::Forward, &mut send_buf, &mut recv_buf)?;
        }
        if !plans[ip].meta().is_spectral {
            plans[ip].execute(topos[ip].layout(), &mut green)?;
        }
        if plans[ip].meta().is_r2c_done_by_fft() {
            topos[ip].switch_to_complex();
        }
    }

    // ------------------------------------------------------------------
    // scale by the volume factor
    // ------------------------------------------------------------------
    let final_layout = *topos[p.ndim - 1].layout();
    scale(&final_layout, &mut green, p.vol_fact);

    // the regularized kernels of a 1-spectral 2-unbounded problem are exact
    // in full spectral space; rewrite every plane except the spectral k = 0
    // plane, which kept the physically transformed 2-D kernel
    if p.ndim == 3 && nbr_spectral == 1 && p.kind.is_regularized() {
        let mut kfact_all = [0.0; 3];
        let mut koffset_all = [0.0; 3];
        let mut istart = [0usize; 3];
        for plan in plans.iter().take(p.ndim) {
            let m = plan.meta();
            kfact_all[m.dim_id] = m.k_fact;
            koffset_all[m.dim_id] = m.k_offset[0];
            if m.is_spectral {
                istart[m.dim_id] = 1;
            }
        }
        kernels::fill_green_0dir_unbounded(
            &final_layout,
            p.hgrid[0],
            kfact_all,
            koffset_all,
            symstart,
            &mut green,
            p.kind,
            p.eps,
            Some(istart),
        )?;
    }

    Ok((green, final_layout))
}

/// Multiply the live region by `factor`
fn scale(layout: &TopoLayout, green: &mut [f64], factor: f64) {
    let ax0 = layout.axis;
    let ax1 = (ax0 + 1) % 3;
    let ax2 = (ax0 + 2) % 3;
    let inmax = layout.nloc[ax0] * layout.nf;
    for io in 0..layout.nloc[ax1] * layout.nloc[ax2] {
        let base = collapsed_index(ax0, 0, io, layout.nmem, layout.nf);
        for value in &mut green[base..base + inmax] {
            *value *= factor;
        }
    }
}
