//! Per-direction 1-D transform plans
//!
//! Each spatial direction carries one plan per pipeline (forward, backward,
//! Green, and optionally backward-diff), selected from the pair of boundary
//! conditions of that direction. A plan is a tagged variant over small
//! per-kind objects sharing one capability set: a dry-run `init` that only
//! reshapes logical sizes, an `allocate` that binds the 1-D transform
//! handles once every size is final, and in-place batched execution over all
//! locally owned pencils.
//!
//! The transforms themselves come from the `rustfft` / `realfft` / `rustdct`
//! family; the plan owns their `Arc` handles and drives them per pencil,
//! parallel across pencils.
use crate::error::{config_err, invariant_err, Result, SolverError};
use crate::topology::TopoLayout;
use crate::types::{BoundaryKind, Cplx, Sign};
use num_complex::Complex;
use rayon::prelude::*;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use rustdct::{DctPlanner, TransformType2And3, TransformType4};
use rustfft::{Fft, FftPlanner};
use std::f64::consts::PI;
use std::sync::Arc;

/// Execution priorities; smaller runs earlier in the forward pipeline
pub const PRIORITY_UNBOUNDED: i32 = 4;
/// Plain periodic DFT
pub const PRIORITY_PERIODIC: i32 = 10;
/// One unbounded face against a symmetric one
pub const PRIORITY_MIXED: i32 = 20;
/// Symmetric-symmetric directions stay real the longest and run last
pub const PRIORITY_SYM: i32 = 40;
/// Unused directions sort at the very end
pub const PRIORITY_EMPTY: i32 = 84;

/// Metadata shared by every plan kind
#[derive(Debug, Clone)]
pub struct PlanMeta {
    /// Spatial direction this plan transforms
    pub dim_id: usize,
    /// Components per grid point
    pub lda: usize,
    /// Transform direction of this plan object
    pub sign: Sign,
    /// Logical input extent along `dim_id` (current sample units)
    pub n_in: usize,
    /// Logical output extent along `dim_id` (complex units when complex out)
    pub n_out: usize,
    /// Length of the 1-D transform
    pub n_transform: usize,
    /// Normalization contribution, applied once at convolution
    pub norm_fact: f64,
    /// Grid-spacing measure for unbounded directions
    pub vol_fact: f64,
    /// Wave number = (index + k_offset) * k_fact
    pub k_fact: f64,
    /// Per-component wave-number offset
    pub k_offset: Vec<f64>,
    /// Index at which Fourier indices mirror to their negatives
    pub sym_start: usize,
    /// Offset of the original data inside the (possibly expanded) topology
    pub fieldstart: [usize; 3],
    /// Per-component flag: the forward transform carries a factor -i
    pub imult: Vec<bool>,
    /// The transform changes real data to complex
    pub is_r2c: bool,
    /// The Green's function is sampled spectrally along this direction
    pub is_spectral: bool,
    /// Grid spacing along `dim_id`
    pub h: f64,
}

impl PlanMeta {
    fn new(dim_id: usize, lda: usize, sign: Sign, h: f64) -> Self {
        Self {
            dim_id,
            lda,
            sign,
            n_in: 0,
            n_out: 0,
            n_transform: 0,
            norm_fact: 1.0,
            vol_fact: 1.0,
            k_fact: 0.0,
            k_offset: vec![0.0; lda],
            sym_start: 0,
            fieldstart: [0; 3],
            imult: vec![false; lda],
            is_r2c: false,
            is_spectral: false,
            h,
        }
    }

    /// The transform really runs on the Green's function pipeline
    pub fn is_r2c_done_by_fft(&self) -> bool {
        self.is_r2c && !self.is_spectral
    }
}

/// Capability set common to every plan kind
#[enum_dispatch]
pub trait PlanOps {
    /// Plan metadata
    fn meta(&self) -> &PlanMeta;
    /// Execution priority, total over all kinds
    fn type_priority(&self) -> i32;
    /// Dry run: update the logical size triplet and the complex flag
    fn init(&mut self, size: &mut [usize; 3], is_complex: &mut bool) -> Result<()>;
    /// Bind the transform-library handles; sizes must be final
    fn allocate(&mut self) -> Result<()>;
    /// In-place batched 1-D transform over all local pencils and components
    fn execute(&self, layout: &TopoLayout, data: &mut [f64]) -> Result<()>;
    /// Rotate frequency bins so convolution sees a plain complex array.
    /// The sine-family bookkeeping is carried by `imult` and folded into the
    /// convolution multipliers, so the in-band correction is the identity.
    fn apply_phase_correction(&self, _layout: &TopoLayout, _data: &mut [f64]) -> Result<()> {
        Ok(())
    }
}

/// Flavor of a symmetric-symmetric direction, per component
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymFlavor {
    /// DCT-II / DCT-III pair
    EvenEven,
    /// DST-II / DST-III pair
    OddOdd,
    /// DCT-IV, self-inverse
    EvenOdd,
    /// DST-IV, self-inverse
    OddEven,
}

impl SymFlavor {
    fn is_sine(self) -> bool {
        matches!(self, Self::OddOdd | Self::OddEven)
    }

    fn k_offset(self) -> f64 {
        match self {
            Self::EvenEven => 0.0,
            Self::OddOdd => 1.0,
            Self::EvenOdd | Self::OddEven => 0.5,
        }
    }
}

// ---------------------------------------------------------------------------
// Empty
// ---------------------------------------------------------------------------

/// Plan of a direction that is not used (global extent 1)
#[derive(Debug, Clone)]
pub struct EmptyPlan {
    meta: PlanMeta,
}

impl EmptyPlan {
    fn new(dim_id: usize, lda: usize, sign: Sign, h: f64) -> Self {
        let mut meta = PlanMeta::new(dim_id, lda, sign, h);
        meta.is_spectral = true;
        Self { meta }
    }
}

impl PlanOps for EmptyPlan {
    fn meta(&self) -> &PlanMeta {
        &self.meta
    }

    fn type_priority(&self) -> i32 {
        PRIORITY_EMPTY
    }

    fn init(&mut self, size: &mut [usize; 3], _is_complex: &mut bool) -> Result<()> {
        self.meta.n_in = size[self.meta.dim_id];
        self.meta.n_out = self.meta.n_in;
        Ok(())
    }

    fn allocate(&mut self) -> Result<()> {
        Ok(())
    }

    fn execute(&self, _layout: &TopoLayout, _data: &mut [f64]) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Complex DFT (periodic, or unbounded on the doubled extent)
// ---------------------------------------------------------------------------

/// Complex-to-complex DFT plan
#[derive(Clone)]
pub struct DftPlan {
    meta: PlanMeta,
    unbounded: bool,
    fft: Option<Arc<dyn Fft<f64>>>,
}

impl DftPlan {
    fn new(dim_id: usize, lda: usize, sign: Sign, h: f64, n_phys: usize, unbounded: bool) -> Self {
        let mut meta = PlanMeta::new(dim_id, lda, sign, h);
        let n_t = if unbounded { 2 * n_phys } else { n_phys };
        meta.n_transform = n_t;
        meta.norm_fact = 1.0 / n_t as f64;
        meta.vol_fact = if unbounded { h } else { 1.0 };
        meta.k_fact = 2.0 * PI / (n_t as f64 * h);
        meta.sym_start = n_t / 2;
        meta.is_spectral = !unbounded;
        Self {
            meta,
            unbounded,
            fft: None,
        }
    }
}

impl PlanOps for DftPlan {
    fn meta(&self) -> &PlanMeta {
        &self.meta
    }

    fn type_priority(&self) -> i32 {
        if self.unbounded {
            PRIORITY_UNBOUNDED
        } else {
            PRIORITY_PERIODIC
        }
    }

    fn init(&mut self, size: &mut [usize; 3], is_complex: &mut bool) -> Result<()> {
        if !*is_complex {
            return invariant_err("a c2c plan reached the dry run with real data");
        }
        self.meta.n_in = size[self.meta.dim_id];
        self.meta.n_out = self.meta.n_transform;
        size[self.meta.dim_id] = self.meta.n_out;
        Ok(())
    }

    fn allocate(&mut self) -> Result<()> {
        let mut planner = FftPlanner::new();
        self.fft = Some(match self.meta.sign {
            Sign::Forward => planner.plan_fft_forward(self.meta.n_transform),
            Sign::Backward => planner.plan_fft_inverse(self.meta.n_transform),
        });
        Ok(())
    }

    fn execute(&self, layout: &TopoLayout, data: &mut [f64]) -> Result<()> {
        let fft = self
            .fft
            .as_ref()
            .ok_or_else(|| SolverError::Invariant("plan executed before allocate".into()))?;
        let n = self.meta.n_transform;
        let scratch_len = fft.get_inplace_scratch_len();
        for_each_pencil(layout, self.meta.lda, data, |row| {
            let mut buf = vec![Cplx::default(); n];
            let mut scratch = vec![Cplx::default(); scratch_len];
            for (i, b) in buf.iter_mut().enumerate() {
                *b = Complex::new(row[2 * i], row[2 * i + 1]);
            }
            fft.process_with_scratch(&mut buf, &mut scratch);
            for (i, b) in buf.iter().enumerate() {
                row[2 * i] = b.re;
                row[2 * i + 1] = b.im;
            }
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Real-to-complex DFT
// ---------------------------------------------------------------------------

/// Real-to-complex DFT plan; the single real/complex transition of a pipeline
#[derive(Clone)]
pub struct R2cPlan {
    meta: PlanMeta,
    unbounded: bool,
    r2c: Option<Arc<dyn RealToComplex<f64>>>,
    c2r: Option<Arc<dyn ComplexToReal<f64>>>,
}

impl R2cPlan {
    fn from_dft(plan: &DftPlan) -> Self {
        let mut meta = plan.meta.clone();
        meta.is_r2c = true;
        Self {
            meta,
            unbounded: plan.unbounded,
            r2c: None,
            c2r: None,
        }
    }
}

impl PlanOps for R2cPlan {
    fn meta(&self) -> &PlanMeta {
        &self.meta
    }

    fn type_priority(&self) -> i32 {
        if self.unbounded {
            PRIORITY_UNBOUNDED
        } else {
            PRIORITY_PERIODIC
        }
    }

    fn init(&mut self, size: &mut [usize; 3], is_complex: &mut bool) -> Result<()> {
        if *is_complex {
            return invariant_err("an r2c plan reached the dry run with complex data");
        }
        if self.meta.n_transform % 2 != 0 {
            return config_err(format!(
                "direction {} needs an even extent for the real-to-complex transform",
                self.meta.dim_id
            ));
        }
        self.meta.n_in = size[self.meta.dim_id];
        self.meta.n_out = self.meta.n_transform / 2 + 1;
        size[self.meta.dim_id] = self.meta.n_out;
        *is_complex = true;
        Ok(())
    }

    fn allocate(&mut self) -> Result<()> {
        let mut planner = RealFftPlanner::<f64>::new();
        match self.meta.sign {
            Sign::Forward => self.r2c = Some(planner.plan_fft_forward(self.meta.n_transform)),
            Sign::Backward => self.c2r = Some(planner.plan_fft_inverse(self.meta.n_transform)),
        }
        Ok(())
    }

    fn execute(&self, layout: &TopoLayout, data: &mut [f64]) -> Result<()> {
        let n = self.meta.n_transform;
        let n_spec = n / 2 + 1;
        match self.meta.sign {
            Sign::Forward => {
                let r2c = self.r2c.as_ref().ok_or_else(|| {
                    SolverError::Invariant("plan executed before allocate".into())
                })?;
                let scratch_len = r2c.get_scratch_len();
                for_each_pencil(layout, self.meta.lda, data, |row| {
                    let mut input = vec![0.0; n];
                    let mut output = vec![Cplx::default(); n_spec];
                    let mut scratch = vec![Cplx::default(); scratch_len];
                    input.copy_from_slice(&row[..n]);
                    r2c.process_with_scratch(&mut input, &mut output, &mut scratch)
                        .expect("transform length was planned");
                    for (i, b) in output.iter().enumerate() {
                        row[2 * i] = b.re;
                        row[2 * i + 1] = b.im;
                    }
                });
            }
            Sign::Backward => {
                let c2r = self.c2r.as_ref().ok_or_else(|| {
                    SolverError::Invariant("plan executed before allocate".into())
                })?;
                let scratch_len = c2r.get_scratch_len();
                for_each_pencil(layout, self.meta.lda, data, |row| {
                    let mut spec = vec![Cplx::default(); n_spec];
                    let mut output = vec![0.0; n];
                    let mut scratch = vec![Cplx::default(); scratch_len];
                    for (i, s) in spec.iter_mut().enumerate() {
                        *s = Complex::new(row[2 * i], row[2 * i + 1]);
                    }
                    // the DC and Nyquist bins of a real spectrum are real
                    spec[0].im = 0.0;
                    spec[n_spec - 1].im = 0.0;
                    c2r.process_with_scratch(&mut spec, &mut output, &mut scratch)
                        .expect("transform length was planned");
                    row[..n].copy_from_slice(&output);
                    row[n..].fill(0.0);
                });
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Symmetric-symmetric (cosine / sine family)
// ---------------------------------------------------------------------------

enum SymHandle {
    Type23(Arc<dyn TransformType2And3<f64>>),
    Type4(Arc<dyn TransformType4<f64>>),
}

/// Plan of a direction with a symmetry condition on both faces
pub struct SymPlan {
    meta: PlanMeta,
    flavors: Vec<SymFlavor>,
    handles: Vec<SymHandle>,
}

impl SymPlan {
    fn new(
        dim_id: usize,
        lda: usize,
        sign: Sign,
        h: f64,
        n_phys: usize,
        flavors: Vec<SymFlavor>,
    ) -> Self {
        let mut meta = PlanMeta::new(dim_id, lda, sign, h);
        meta.n_transform = n_phys;
        meta.norm_fact = 2.0 / n_phys as f64;
        meta.k_fact = PI / (n_phys as f64 * h);
        meta.is_spectral = true;
        for (lia, fl) in flavors.iter().enumerate() {
            meta.k_offset[lia] = fl.k_offset();
            meta.imult[lia] = fl.is_sine();
        }
        Self {
            meta,
            flavors,
            handles: Vec::new(),
        }
    }

    fn transform_row(&self, lia: usize, seq: &mut [f64]) {
        match (&self.handles[lia], self.flavors[lia], self.meta.sign) {
            (SymHandle::Type23(t), SymFlavor::EvenEven, Sign::Forward) => t.process_dct2(seq),
            (SymHandle::Type23(t), SymFlavor::EvenEven, Sign::Backward) => t.process_dct3(seq),
            (SymHandle::Type23(t), SymFlavor::OddOdd, Sign::Forward) => t.process_dst2(seq),
            (SymHandle::Type23(t), SymFlavor::OddOdd, Sign::Backward) => t.process_dst3(seq),
            (SymHandle::Type4(t), SymFlavor::EvenOdd, _) => t.process_dct4(seq),
            (SymHandle::Type4(t), SymFlavor::OddEven, _) => t.process_dst4(seq),
            _ => unreachable!("handle allocated for another flavor"),
        }
    }
}

impl PlanOps for SymPlan {
    fn meta(&self) -> &PlanMeta {
        &self.meta
    }

    fn type_priority(&self) -> i32 {
        PRIORITY_SYM
    }

    fn init(&mut self, size: &mut [usize; 3], _is_complex: &mut bool) -> Result<()> {
        self.meta.n_in = size[self.meta.dim_id];
        self.meta.n_out = self.meta.n_transform;
        size[self.meta.dim_id] = self.meta.n_out;
        Ok(())
    }

    fn allocate(&mut self) -> Result<()> {
        let mut planner = DctPlanner::new();
        let n = self.meta.n_transform;
        self.handles = self
            .flavors
            .iter()
            .map(|fl| match fl {
                SymFlavor::EvenEven => SymHandle::Type23(planner.plan_dct2(n)),
                SymFlavor::OddOdd => SymHandle::Type23(planner.plan_dst2(n)),
                SymFlavor::EvenOdd => SymHandle::Type4(planner.plan_dct4(n)),
                SymFlavor::OddEven => SymHandle::Type4(planner.plan_dst4(n)),
            })
            .collect();
        Ok(())
    }

    fn execute(&self, layout: &TopoLayout, data: &mut [f64]) -> Result<()> {
        if self.handles.len() != self.flavors.len() {
            return invariant_err("plan executed before allocate");
        }
        let n = self.meta.n_transform;
        for_each_pencil_indexed(layout, self.meta.lda, data, |lia, row| {
            // r2r transforms act separately on the real and imaginary parts
            for part in 0..layout.nf {
                let mut seq = vec![0.0; n];
                for (i, s) in seq.iter_mut().enumerate() {
                    *s = row[i * layout.nf + part];
                }
                self.transform_row(lia, &mut seq);
                for (i, s) in seq.iter().enumerate() {
                    row[i * layout.nf + part] = *s;
                }
            }
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Mixed unbounded / symmetric
// ---------------------------------------------------------------------------

/// Plan of a direction with one unbounded face against a symmetric one;
/// the extent is doubled and the symmetric wall drives a cosine or sine
/// transform on the expanded domain
pub struct MixedPlan {
    meta: PlanMeta,
    /// per-component: the symmetric wall is odd (sine family)
    odd_wall: Vec<bool>,
    handles: Vec<Arc<dyn TransformType2And3<f64>>>,
}

impl MixedPlan {
    fn new(
        dim_id: usize,
        lda: usize,
        sign: Sign,
        h: f64,
        n_phys: usize,
        odd_wall: Vec<bool>,
        unbounded_left: bool,
    ) -> Self {
        let mut meta = PlanMeta::new(dim_id, lda, sign, h);
        let n_t = 2 * n_phys;
        meta.n_transform = n_t;
        meta.norm_fact = 2.0 / n_t as f64;
        meta.vol_fact = h;
        meta.k_fact = PI / (n_t as f64 * h);
        meta.sym_start = n_phys;
        meta.fieldstart[dim_id] = if unbounded_left { n_phys } else { 0 };
        for (lia, odd) in odd_wall.iter().enumerate() {
            meta.k_offset[lia] = if *odd { 1.0 } else { 0.0 };
            meta.imult[lia] = *odd;
        }
        Self {
            meta,
            odd_wall,
            handles: Vec::new(),
        }
    }
}

impl PlanOps for MixedPlan {
    fn meta(&self) -> &PlanMeta {
        &self.meta
    }

    fn type_priority(&self) -> i32 {
        PRIORITY_MIXED
    }

    fn init(&mut self, size: &mut [usize; 3], _is_complex: &mut bool) -> Result<()> {
        self.meta.n_in = size[self.meta.dim_id];
        self.meta.n_out = self.meta.n_transform;
        size[self.meta.dim_id] = self.meta.n_out;
        Ok(())
    }

    fn allocate(&mut self) -> Result<()> {
        let mut planner = DctPlanner::new();
        let n = self.meta.n_transform;
        self.handles = self
            .odd_wall
            .iter()
            .map(|odd| {
                if *odd {
                    planner.plan_dst2(n)
                } else {
                    planner.plan_dct2(n)
                }
            })
            .collect();
        Ok(())
    }

    fn execute(&self, layout: &TopoLayout, data: &mut [f64]) -> Result<()> {
        if self.handles.len() != self.odd_wall.len() {
            return invariant_err("plan executed before allocate");
        }
        let n = self.meta.n_transform;
        for_each_pencil_indexed(layout, self.meta.lda, data, |lia, row| {
            for part in 0..layout.nf {
                let mut seq = vec![0.0; n];
                for (i, s) in seq.iter_mut().enumerate() {
                    *s = row[i * layout.nf + part];
                }
                match (self.odd_wall[lia], self.meta.sign) {
                    (false, Sign::Forward) => self.handles[lia].process_dct2(&mut seq),
                    (false, Sign::Backward) => self.handles[lia].process_dct3(&mut seq),
                    (true, Sign::Forward) => self.handles[lia].process_dst2(&mut seq),
                    (true, Sign::Backward) => self.handles[lia].process_dst3(&mut seq),
                }
                for (i, s) in seq.iter().enumerate() {
                    row[i * layout.nf + part] = *s;
                }
            }
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// The tagged variant
// ---------------------------------------------------------------------------

/// Per-direction transform plan, dispatching over the kind set
#[enum_dispatch(PlanOps)]
pub enum PlanKind {
    /// Unused direction of extent 1
    Empty(EmptyPlan),
    /// Complex DFT, periodic or unbounded
    Dft(DftPlan),
    /// Real-to-complex DFT, periodic or unbounded
    R2c(R2cPlan),
    /// Cosine/sine family with symmetric walls on both faces
    Sym(SymPlan),
    /// One unbounded face against a symmetric wall, on the doubled extent
    Mixed(MixedPlan),
}

impl PlanKind {
    /// Build the plan of one direction from its boundary pair per component.
    /// Green-side plans (`is_green`) carry no fieldstart and mirror through
    /// the cosine family, since the kernel is even about the symmetry wall.
    pub fn from_boundary(
        dim_id: usize,
        lda: usize,
        n_phys: usize,
        h: f64,
        bc: &[(BoundaryKind, BoundaryKind)],
        sign: Sign,
        is_green: bool,
    ) -> Result<Self> {
        use BoundaryKind::{Even, Odd, Periodic, Unbounded};
        if bc.len() != lda {
            return config_err(format!(
                "direction {dim_id} carries {} boundary pairs for lda = {lda}",
                bc.len()
            ));
        }
        if n_phys == 1 {
            return Ok(Self::Empty(EmptyPlan::new(dim_id, lda, sign, h)));
        }

        #[derive(PartialEq, Clone, Copy)]
        enum Family {
            Per,
            Unb,
            Sym,
            MixLeftUnb,
            MixRightUnb,
        }
        let family = |pair: (BoundaryKind, BoundaryKind)| -> Result<Family> {
            match pair {
                (Periodic, Periodic) => Ok(Family::Per),
                (Unbounded, Unbounded) => Ok(Family::Unb),
                (Even | Odd, Even | Odd) => Ok(Family::Sym),
                (Unbounded, Even | Odd) => Ok(Family::MixLeftUnb),
                (Even | Odd, Unbounded) => Ok(Family::MixRightUnb),
                (a, b) => config_err(format!(
                    "direction {dim_id}: the pair {a:?}/{b:?} is not a valid boundary combination"
                )),
            }
        };
        let fam0 = family(bc[0])?;
        for pair in bc.iter().skip(1) {
            if family(*pair)? != fam0 {
                return config_err(format!(
                    "direction {dim_id}: all components must share the same boundary family"
                ));
            }
        }

        let plan = match fam0 {
            Family::Per => Self::Dft(DftPlan::new(dim_id, lda, sign, h, n_phys, false)),
            Family::Unb => Self::Dft(DftPlan::new(dim_id, lda, sign, h, n_phys, true)),
            Family::Sym => {
                let flavors = bc
                    .iter()
                    .map(|pair| match pair {
                        (Even, Even) => SymFlavor::EvenEven,
                        (Odd, Odd) => SymFlavor::OddOdd,
                        (Even, Odd) => SymFlavor::EvenOdd,
                        (Odd, Even) => SymFlavor::OddEven,
                        _ => unreachable!("family checked above"),
                    })
                    .collect();
                Self::Sym(SymPlan::new(dim_id, lda, sign, h, n_phys, flavors))
            }
            Family::MixLeftUnb | Family::MixRightUnb => {
                let odd_wall = if is_green {
                    vec![false; lda]
                } else {
                    bc.iter()
                        .map(|pair| matches!(pair, (Odd, Unbounded) | (Unbounded, Odd)))
                        .collect()
                };
                let mut plan =
                    MixedPlan::new(dim_id, lda, sign, h, n_phys, odd_wall, fam0 == Family::MixLeftUnb);
                if is_green {
                    // the kernel occupies the whole expanded domain
                    plan.meta.fieldstart = [0; 3];
                }
                Self::Mixed(plan)
            }
        };
        Ok(plan)
    }

    /// Turn a DFT-family plan into the single real-to-complex transition of
    /// the pipeline; called by the dry run on the first direction whose
    /// input is still real
    pub fn promote_to_r2c_if_real(&mut self, is_complex: bool) {
        if is_complex {
            return;
        }
        if let Self::Dft(plan) = self {
            *self = Self::R2c(R2cPlan::from_dft(plan));
        }
    }
}

/// Sort plans by priority, stable on ties so axis order is preserved
pub fn sort_plans(plans: &mut [PlanKind]) {
    plans.sort_by_key(|p| (p.type_priority(), p.meta().dim_id));
}

// ---------------------------------------------------------------------------
// Pencil iteration
// ---------------------------------------------------------------------------

/// Apply `f` to every pencil of every component, in parallel over pencils.
/// A pencil is the padded fast-axis row of `nmem[axis] * nf` samples.
fn for_each_pencil<F>(layout: &TopoLayout, lda: usize, data: &mut [f64], f: F)
where
    F: Fn(&mut [f64]) + Sync,
{
    for_each_pencil_indexed(layout, lda, data, |_lia, row| f(row));
}

fn for_each_pencil_indexed<F>(layout: &TopoLayout, lda: usize, data: &mut [f64], f: F)
where
    F: Fn(usize, &mut [f64]) + Sync,
{
    let ax0 = layout.axis;
    let ax1 = (ax0 + 1) % 3;
    let ax2 = (ax0 + 2) % 3;
    let stride = layout.nmem[ax0] * layout.nf;
    let rows = layout.nloc[ax1] * layout.nloc[ax2];
    let mem_dim = layout.mem_dim();
    for lia in 0..lda {
        let comp = &mut data[lia * mem_dim..(lia + 1) * mem_dim];
        comp[..rows * stride]
            .par_chunks_exact_mut(stride)
            .for_each(|row| f(lia, row));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BoundaryKind::{Even, Odd, Periodic, Unbounded};

    fn single_rank_layout(n: usize, is_complex: bool) -> TopoLayout {
        TopoLayout::new(0, 1, [n, 2, 2], [1, 1, 1], is_complex, None, 16, 0, 1).unwrap()
    }

    #[test]
    fn selection_and_priorities() {
        let per = PlanKind::from_boundary(0, 1, 8, 0.1, &[(Periodic, Periodic)], Sign::Forward, false)
            .unwrap();
        let unb = PlanKind::from_boundary(1, 1, 8, 0.1, &[(Unbounded, Unbounded)], Sign::Forward, false)
            .unwrap();
        let sym =
            PlanKind::from_boundary(2, 1, 8, 0.1, &[(Even, Even)], Sign::Forward, false).unwrap();
        let mix =
            PlanKind::from_boundary(2, 1, 8, 0.1, &[(Unbounded, Odd)], Sign::Forward, false).unwrap();
        assert!(unb.type_priority() < per.type_priority());
        assert!(per.type_priority() < mix.type_priority());
        assert!(mix.type_priority() < sym.type_priority());
        // unbounded directions are expanded to twice the extent
        assert_eq!(unb.meta().n_transform, 16);
        assert_eq!(unb.meta().vol_fact, 0.1);
        assert_eq!(unb.meta().sym_start, 8);
        // the mixed plan records where the data lands in the expanded topo
        assert_eq!(mix.meta().fieldstart, [0, 0, 8]);
        assert!(mix.meta().imult[0]);
    }

    #[test]
    fn empty_for_unit_extent() {
        let plan =
            PlanKind::from_boundary(1, 1, 1, 0.1, &[(Periodic, Periodic)], Sign::Forward, false).unwrap();
        assert_eq!(plan.type_priority(), PRIORITY_EMPTY);
    }

    #[test]
    fn invalid_pairs_rejected() {
        assert!(PlanKind::from_boundary(0, 1, 8, 0.1, &[(Periodic, Even)], Sign::Forward, false).is_err());
        assert!(
            PlanKind::from_boundary(0, 1, 8, 0.1, &[(Unbounded, Periodic)], Sign::Forward, false)
                .is_err()
        );
        // components must agree on the family
        assert!(PlanKind::from_boundary(
            0,
            2,
            8,
            0.1,
            &[(Even, Even), (Periodic, Periodic)],
            Sign::Forward,
            false
        )
        .is_err());
    }

    #[test]
    fn sort_is_stable_and_total() {
        let h = 0.1;
        let mut plans = vec![
            PlanKind::from_boundary(0, 1, 8, h, &[(Even, Even)], Sign::Forward, false).unwrap(),
            PlanKind::from_boundary(1, 1, 8, h, &[(Periodic, Periodic)], Sign::Forward, false).unwrap(),
            PlanKind::from_boundary(2, 1, 8, h, &[(Periodic, Periodic)], Sign::Forward, false).unwrap(),
        ];
        sort_plans(&mut plans);
        let prio: Vec<i32> = plans.iter().map(|p| p.type_priority()).collect();
        assert!(prio.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(plans[0].meta().dim_id, 1);
        assert_eq!(plans[1].meta().dim_id, 2);
        assert_eq!(plans[2].meta().dim_id, 0);
    }

    #[test]
    fn r2c_promotion_and_dry_run() {
        let mut plan =
            PlanKind::from_boundary(0, 1, 8, 0.1, &[(Periodic, Periodic)], Sign::Forward, false).unwrap();
        let mut size = [8, 4, 4];
        let mut is_complex = false;
        plan.promote_to_r2c_if_real(is_complex);
        plan.init(&mut size, &mut is_complex).unwrap();
        assert!(is_complex);
        assert_eq!(size, [5, 4, 4]);
        assert!(plan.meta().is_r2c);
        // the next periodic direction stays c2c
        let mut plan2 =
            PlanKind::from_boundary(1, 1, 4, 0.1, &[(Periodic, Periodic)], Sign::Forward, false).unwrap();
        plan2.promote_to_r2c_if_real(is_complex);
        plan2.init(&mut size, &mut is_complex).unwrap();
        assert!(!plan2.meta().is_r2c);
        assert_eq!(size, [5, 4, 4]);
    }

    #[test]
    fn dct_round_trip_recovers_input() {
        let n = 16;
        let h = 1.0 / n as f64;
        let bc = [(Even, Even)];
        let mut fwd = PlanKind::from_boundary(0, 1, n, h, &bc, Sign::Forward, false).unwrap();
        let mut bwd = PlanKind::from_boundary(0, 1, n, h, &bc, Sign::Backward, false).unwrap();
        let mut size = [n, 2, 2];
        let mut cplx = false;
        fwd.init(&mut size, &mut cplx).unwrap();
        let mut size_b = [n, 2, 2];
        let mut cplx_b = false;
        bwd.init(&mut size_b, &mut cplx_b).unwrap();
        fwd.allocate().unwrap();
        bwd.allocate().unwrap();

        let layout = single_rank_layout(n, false);
        let mut data = vec![0.0; layout.mem_size()];
        for row in 0..4 {
            for i in 0..n {
                data[row * layout.nmem[0] + i] = (i * i + row) as f64 * 0.01 + 1.0;
            }
        }
        let reference = data.clone();
        fwd.execute(&layout, &mut data).unwrap();
        bwd.execute(&layout, &mut data).unwrap();
        let norm = fwd.meta().norm_fact;
        for (a, b) in data.iter().zip(reference.iter()) {
            assert!((a * norm - b).abs() < 1e-12, "{a} vs {b}");
        }
    }

    #[test]
    fn dst4_round_trip_recovers_input() {
        let n = 8;
        let bc = [(Odd, Even)];
        let mut fwd = PlanKind::from_boundary(0, 1, n, 0.5, &bc, Sign::Forward, false).unwrap();
        let mut bwd = PlanKind::from_boundary(0, 1, n, 0.5, &bc, Sign::Backward, false).unwrap();
        let (mut size, mut cplx) = ([n, 2, 2], false);
        fwd.init(&mut size, &mut cplx).unwrap();
        let (mut size, mut cplx) = ([n, 2, 2], false);
        bwd.init(&mut size, &mut cplx).unwrap();
        fwd.allocate().unwrap();
        bwd.allocate().unwrap();
        assert_eq!(fwd.meta().k_offset[0], 0.5);

        let layout = single_rank_layout(n, false);
        let mut data = vec![0.0; layout.mem_size()];
        for (i, d) in data.iter_mut().enumerate() {
            *d = (i as f64 * 0.7).sin();
        }
        let reference = data.clone();
        fwd.execute(&layout, &mut data).unwrap();
        bwd.execute(&layout, &mut data).unwrap();
        let norm = fwd.meta().norm_fact;
        for (a, b) in data.iter().zip(reference.iter()) {
            assert!((a * norm - b).abs() < 1e-12);
        }
    }

    #[test]
    fn r2c_round_trip_recovers_input() {
        let n = 16;
        let bc = [(Periodic, Periodic)];
        let mut fwd = PlanKind::from_boundary(0, 1, n, 0.1, &bc, Sign::Forward, false).unwrap();
        let mut bwd = PlanKind::from_boundary(0, 1, n, 0.1, &bc, Sign::Backward, false).unwrap();
        let (mut size, mut cplx) = ([n, 2, 2], false);
        fwd.promote_to_r2c_if_real(cplx);
        fwd.init(&mut size, &mut cplx).unwrap();
        let (mut size, mut cplx) = ([n, 2, 2], false);
        bwd.promote_to_r2c_if_real(cplx);
        bwd.init(&mut size, &mut cplx).unwrap();
        fwd.allocate().unwrap();
        bwd.allocate().unwrap();

        // the stage layout seen by the transforms: complex extent n/2+1,
        // flipped to real while the data is still physical
        let mut layout = TopoLayout::new(0, 1, [n / 2 + 1, 2, 2], [1, 1, 1], true, None, 16, 0, 1)
            .unwrap();
        layout.switch_to_real();
        let mut data = vec![0.0; layout.mem_size()];
        let stride = layout.nmem[0];
        for row in 0..4 {
            for i in 0..n {
                data[row * stride + i] = ((i + row) as f64).cos();
            }
        }
        let reference = data.clone();
        fwd.execute(&layout, &mut data).unwrap();
        bwd.execute(&layout, &mut data).unwrap();
        let norm = fwd.meta().norm_fact;
        for row in 0..4 {
            for i in 0..n {
                let a = data[row * stride + i] * norm;
                let b = reference[row * stride + i];
                assert!((a - b).abs() < 1e-12, "row {row} i {i}: {a} vs {b}");
            }
        }
    }

    #[test]
    fn derivative_dual_swaps_imult() {
        // EVEN/EVEN forward against its ODD/ODD derivative dual
        let fwd =
            PlanKind::from_boundary(0, 1, 8, 0.1, &[(Even, Even)], Sign::Forward, false).unwrap();
        let dual = PlanKind::from_boundary(0, 1, 8, 0.1, &[(Odd, Odd)], Sign::Backward, false).unwrap();
        assert!(!fwd.meta().imult[0]);
        assert!(dual.meta().imult[0]);
        assert_eq!(fwd.type_priority(), dual.type_priority());
    }
}
