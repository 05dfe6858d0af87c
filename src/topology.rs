//! Pencil topology of a distributed 3-D array
//!
//! A topology describes how a global `nglob[3]` array (of `lda` components,
//! real or complex-interleaved samples) is split over a 3-D process grid,
//! with one designated fast axis that is never split and is padded in memory
//! to a byte alignment. The layout arithmetic lives in [`TopoLayout`], which
//! is a plain value; [`Topology`] couples a layout with the owned
//! communicator of the process group.
use crate::error::{config_err, Result};
use mpi::topology::SimpleCommunicator;
use mpi::traits::Communicator;

/// Pure layout description of a pencil topology, independent of MPI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopoLayout {
    /// Fast running dimension
    pub axis: usize,
    /// Components per grid point
    pub lda: usize,
    /// Global extents, in units of the current sample kind
    pub nglob: [usize; 3],
    /// Process grid
    pub nproc: [usize; 3],
    /// Rank splitting order, fastest-varying rank dimension first
    pub axproc: [usize; 3],
    /// This process's coordinates in the process grid
    pub rankd: [usize; 3],
    /// Local extents
    pub nloc: [usize; 3],
    /// Local extents including the fast-axis padding
    pub nmem: [usize; 3],
    /// 1 for real samples, 2 for complex-interleaved
    pub nf: usize,
    /// Byte alignment target of the fast axis
    pub alignment: usize,
}

impl TopoLayout {
    /// Build the layout seen by linear rank `rank` in a group of `comm_size`
    pub fn new(
        axis: usize,
        lda: usize,
        nglob: [usize; 3],
        nproc: [usize; 3],
        is_complex: bool,
        axproc: Option<[usize; 3]>,
        alignment: usize,
        rank: usize,
        comm_size: usize,
    ) -> Result<Self> {
        if axis > 2 {
            return config_err(format!("axis must be 0, 1 or 2, got {axis}"));
        }
        if lda == 0 {
            return config_err("lda must be at least 1");
        }
        if nproc[0] * nproc[1] * nproc[2] != comm_size {
            return config_err(format!(
                "the process grid {nproc:?} does not multiply to the group size {comm_size}"
            ));
        }
        if !alignment.is_power_of_two() || alignment % 16 != 0 {
            return config_err(format!(
                "alignment must be a power of two multiple of 16 bytes, got {alignment}"
            ));
        }
        let axproc = axproc.unwrap_or([0, 1, 2]);
        {
            let mut seen = [false; 3];
            for &a in &axproc {
                if a > 2 || seen[a] {
                    return config_err(format!("axproc {axproc:?} is not a permutation"));
                }
                seen[a] = true;
            }
        }
        let mut layout = Self {
            axis,
            lda,
            nglob,
            nproc,
            axproc,
            rankd: Self::rank_split(rank, axproc, nproc),
            nloc: [0; 3],
            nmem: [0; 3],
            nf: if is_complex { 2 } else { 1 },
            alignment,
        };
        layout.compute_sizes();
        Ok(layout)
    }

    /// The same layout as seen by another linear rank of the group
    pub fn for_rank(&self, rank: usize) -> Self {
        let mut other = *self;
        other.rankd = Self::rank_split(rank, self.axproc, self.nproc);
        // sizes of a valid layout stay valid for every rank
        other.compute_sizes();
        other
    }

    /// Split a linear rank over the process grid, `axproc[0]` fastest
    fn rank_split(rank: usize, axproc: [usize; 3], nproc: [usize; 3]) -> [usize; 3] {
        let mut rankd = [0; 3];
        rankd[axproc[0]] = rank % nproc[axproc[0]];
        rankd[axproc[1]] = (rank / nproc[axproc[0]]) % nproc[axproc[1]];
        rankd[axproc[2]] = rank / (nproc[axproc[0]] * nproc[axproc[1]]);
        rankd
    }

    /// Linear rank owning the process-grid coordinates `rankd`
    pub fn rank_from_rankd(&self, rankd: [usize; 3]) -> usize {
        rankd[self.axproc[0]]
            + self.nproc[self.axproc[0]]
                * (rankd[self.axproc[1]] + self.nproc[self.axproc[1]] * rankd[self.axproc[2]])
    }

    /// Cells owned per rank along `dim` for every rank but the last
    pub fn nbyproc(&self, dim: usize) -> usize {
        self.nglob[dim].div_ceil(self.nproc[dim])
    }

    /// Global index of the first locally owned cell along `dim`
    pub fn start_id(&self, dim: usize) -> usize {
        self.rankd[dim] * self.nbyproc(dim)
    }

    /// Process-grid index owning the global index `gid` along `dim`
    pub fn rank_of_global_index(&self, dim: usize, gid: usize) -> usize {
        (gid / self.nbyproc(dim)).min(self.nproc[dim] - 1)
    }

    /// Recompute `nloc` and `nmem` from `nglob`, `nproc` and `rankd`.
    /// A split finer than the extent leaves trailing ranks with no cells.
    fn compute_sizes(&mut self) {
        for dim in 0..3 {
            let nby = self.nbyproc(dim);
            let head = nby * self.rankd[dim];
            let nloc = self.nglob[dim].saturating_sub(head).min(nby);
            self.nloc[dim] = nloc;
            self.nmem[dim] = nloc;
            if dim == self.axis {
                let sample = std::mem::size_of::<f64>();
                let modulo = (nloc * self.nf * sample) % self.alignment;
                if modulo != 0 {
                    self.nmem[dim] = nloc + (self.alignment - modulo) / sample / self.nf;
                }
            }
        }
    }

    /// True when samples are complex-interleaved
    pub fn is_complex(&self) -> bool {
        self.nf == 2
    }

    /// Flip the samples to complex, halving the fast-axis extent.
    /// No-op when already complex.
    pub fn switch_to_complex(&mut self) {
        if self.nf == 2 {
            return;
        }
        debug_assert!(self.nglob[self.axis] % 2 == 0, "odd extent cannot be complex");
        self.nf = 2;
        self.nglob[self.axis] /= 2;
        self.compute_sizes();
    }

    /// Flip the samples to real, doubling the fast-axis extent.
    /// No-op when already real.
    pub fn switch_to_real(&mut self) {
        if self.nf == 1 {
            return;
        }
        self.nf = 1;
        self.nglob[self.axis] *= 2;
        self.compute_sizes();
    }

    /// Local sample count without padding, one component
    pub fn loc_size(&self) -> usize {
        self.nloc[0] * self.nloc[1] * self.nloc[2] * self.nf
    }

    /// Padded sample count of one component
    pub fn mem_dim(&self) -> usize {
        self.nmem[0] * self.nmem[1] * self.nmem[2] * self.nf
    }

    /// Padded sample count of the whole local array, all components
    pub fn mem_size(&self) -> usize {
        self.mem_dim() * self.lda
    }

    /// Local index range (start, end) whose global coordinates, shifted by
    /// `shift`, fall inside `other`'s global extents
    pub fn intersect(&self, shift: [i64; 3], other: &TopoLayout) -> ([usize; 3], [usize; 3]) {
        let mut start = [0; 3];
        let mut end = [0; 3];
        for dim in 0..3 {
            let g0 = self.start_id(dim) as i64 + shift[dim];
            let nloc = self.nloc[dim] as i64;
            let lo = (-g0).clamp(0, nloc);
            let hi = (other.nglob[dim] as i64 - g0).clamp(0, nloc);
            start[dim] = lo as usize;
            end[dim] = hi.max(lo) as usize;
        }
        (start, end)
    }
}

/// A pencil topology bound to a process group
pub struct Topology {
    layout: TopoLayout,
    comm: SimpleCommunicator,
}

impl Topology {
    /// Create a topology over (a duplicate of) the given communicator
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        axis: usize,
        lda: usize,
        nglob: [usize; 3],
        nproc: [usize; 3],
        is_complex: bool,
        axproc: Option<[usize; 3]>,
        alignment: usize,
        comm: &SimpleCommunicator,
    ) -> Result<Self> {
        let layout = TopoLayout::new(
            axis,
            lda,
            nglob,
            nproc,
            is_complex,
            axproc,
            alignment,
            comm.rank() as usize,
            comm.size() as usize,
        )?;
        Ok(Self {
            layout,
            comm: comm.duplicate(),
        })
    }

    /// The layout seen by this process
    pub fn layout(&self) -> &TopoLayout {
        &self.layout
    }

    /// The communicator of the process group
    pub fn comm(&self) -> &SimpleCommunicator {
        &self.comm
    }

    /// Replace the communicator and re-derive the process coordinates
    pub fn change_comm(&mut self, comm: &SimpleCommunicator) -> Result<()> {
        if comm.size() != self.comm.size() {
            return config_err(format!(
                "the replacement group has {} ranks, the topology needs {}",
                comm.size(),
                self.comm.size()
            ));
        }
        self.comm = comm.duplicate();
        self.layout.rankd = TopoLayout::rank_split(
            self.comm.rank() as usize,
            self.layout.axproc,
            self.layout.nproc,
        );
        self.layout.compute_sizes();
        Ok(())
    }

    /// See [`TopoLayout::switch_to_complex`]
    pub fn switch_to_complex(&mut self) {
        self.layout.switch_to_complex();
    }

    /// See [`TopoLayout::switch_to_real`]
    pub fn switch_to_real(&mut self) {
        self.layout.switch_to_real();
    }

    /// True when samples are complex-interleaved
    pub fn is_complex(&self) -> bool {
        self.layout.is_complex()
    }

    /// Fast running dimension
    pub fn axis(&self) -> usize {
        self.layout.axis
    }

    /// Components per grid point
    pub fn lda(&self) -> usize {
        self.layout.lda
    }

    /// Padded sample count of the whole local array
    pub fn mem_size(&self) -> usize {
        self.layout.mem_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(
        axis: usize,
        nglob: [usize; 3],
        nproc: [usize; 3],
        is_complex: bool,
        rank: usize,
    ) -> TopoLayout {
        let size = nproc[0] * nproc[1] * nproc[2];
        TopoLayout::new(axis, 1, nglob, nproc, is_complex, None, 16, rank, size).unwrap()
    }

    #[test]
    fn sizes_single_rank() {
        let t = layout(0, [8, 8, 8], [1, 1, 1], false, 0);
        assert_eq!(t.nloc, [8, 8, 8]);
        assert_eq!(t.nmem, [8, 8, 8]);
        assert_eq!(t.mem_size(), 512);
    }

    #[test]
    fn fast_axis_padding() {
        // 9 real samples on the fast axis: 72 bytes, padded to 80
        let t = layout(0, [9, 4, 4], [1, 1, 1], false, 0);
        assert_eq!(t.nloc[0], 9);
        assert_eq!(t.nmem[0], 10);
        assert_eq!(t.nmem[1], 4);
        // complex samples of the same count are already aligned
        let t = layout(0, [9, 4, 4], [1, 1, 1], true, 0);
        assert_eq!(t.nmem[0], 9);
    }

    #[test]
    fn ceil_split_and_owner_map() {
        let t0 = layout(0, [8, 10, 8], [1, 4, 2], false, 0);
        assert_eq!(t0.nbyproc(1), 3);
        assert_eq!(t0.nloc[1], 3);
        // last rank along dim 1 owns the remainder
        let t_last = t0.for_rank(3);
        assert_eq!(t_last.rankd, [0, 3, 0]);
        assert_eq!(t_last.nloc[1], 10 - 3 * 3);
        // the owner map agrees with the split
        for gid in 0..10 {
            let owner = t0.rank_of_global_index(1, gid);
            let view = t0.for_rank(t0.rank_from_rankd([0, owner, 0]));
            assert!(gid >= view.start_id(1));
            assert!(gid < view.start_id(1) + view.nloc[1]);
        }
    }

    #[test]
    fn fine_split_leaves_trailing_ranks_empty() {
        // ceil(9/4) = 3: ranks own 3, 3, 3, 0 cells
        let t = layout(0, [8, 9, 8], [1, 4, 1], false, 0);
        assert_eq!(t.nloc[1], 3);
        let t_last = t.for_rank(3);
        assert_eq!(t_last.nloc[1], 0);
        assert_eq!(t_last.loc_size(), 0);
        // valid global indices never map to an empty rank
        for gid in 0..9 {
            assert!(t.rank_of_global_index(1, gid) < 3);
        }
    }

    #[test]
    fn rank_split_follows_axproc() {
        let size = 12;
        let t = TopoLayout::new(
            0,
            1,
            [8, 12, 12],
            [1, 4, 3],
            false,
            Some([1, 2, 0]),
            16,
            7,
            size,
        )
        .unwrap();
        // rank 7 = rankd[1] + 4 * rankd[2], axproc order (1, 2, 0)
        assert_eq!(t.rankd, [0, 3, 1]);
        assert_eq!(t.rank_from_rankd(t.rankd), 7);
    }

    #[test]
    fn complex_real_flips() {
        let mut t = layout(0, [8, 4, 4], [1, 1, 1], false, 0);
        t.switch_to_complex();
        assert_eq!(t.nf, 2);
        assert_eq!(t.nglob[0], 4);
        assert_eq!(t.nloc[0], 4);
        // idempotent
        t.switch_to_complex();
        assert_eq!(t.nglob[0], 4);
        t.switch_to_real();
        assert_eq!(t.nf, 1);
        assert_eq!(t.nglob[0], 8);
        t.switch_to_real();
        assert_eq!(t.nglob[0], 8);
    }

    #[test]
    fn intersect_with_shift() {
        // physical 8 cells embedded at the origin of an extended 18-cell topo
        let small = layout(0, [8, 8, 8], [1, 1, 1], false, 0);
        let big = layout(0, [18, 8, 8], [1, 1, 1], false, 0);
        let (s, e) = small.intersect([0, 0, 0], &big);
        assert_eq!((s[0], e[0]), (0, 8));
        let (s, e) = big.intersect([0, 0, 0], &small);
        assert_eq!((s[0], e[0]), (0, 8));
        // negative shift: the first two cells of the small topo fall outside
        let (s, e) = small.intersect([-2, 0, 0], &big);
        assert_eq!((s[0], e[0]), (2, 8));
        // disjoint
        let (s, e) = small.intersect([30, 0, 0], &big);
        assert_eq!(s[0], e[0]);
    }

    #[test]
    fn intersect_distributed() {
        // 16 cells over 2 ranks on dim 1, target of 10 cells on 1 rank
        let a0 = layout(0, [8, 16, 8], [1, 2, 1], false, 0);
        let a1 = a0.for_rank(1);
        let b = layout(0, [8, 10, 8], [1, 1, 1], false, 0);
        let (s0, e0) = a0.intersect([0, 0, 0], &b);
        let (s1, e1) = a1.intersect([0, 0, 0], &b);
        // rank 0 keeps its full 8 cells, rank 1 only the first 2
        assert_eq!(e0[1] - s0[1], 8);
        assert_eq!(e1[1] - s1[1], 2);
    }
}
