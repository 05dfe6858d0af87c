//! Re-partitioning of pencil data between two topologies
//!
//! A switch moves the local data of an input topology into the layout of an
//! output topology whose pencil orientation differs, optionally shifting the
//! input origin inside the output global frame. The exchange works on blocks:
//! the block extent `n_by_block` is the GCD of the per-rank intersection
//! extents over both sides, so every block has the same 3-D extent on every
//! process and only the per-process block count varies. Blocks are packed
//! into fixed-size aligned slots, exchanged inside a sub-communicator
//! restricted to the ranks that actually talk to each other, and scattered
//! into the destination layout.
//!
//! Two exchange strategies implement the communication step: a collective
//! vector all-to-all and a tagged non-blocking per-block variant.
mod all_to_all;
mod non_blocking;

use crate::error::{config_err, invariant_err, Result};
use crate::topology::{TopoLayout, Topology};
use crate::types::{ExchangeStrategy, Sign};
use crate::utils::{gcd, local_index, local_split};
use mpi::collective::SystemOperation;
use mpi::topology::{Color, SimpleCommunicator};
use mpi::traits::{Communicator, CommunicatorCollectives};
use rayon::prelude::*;

/// Everything one side (input or output) of a switch knows about its blocks
#[derive(Debug, Clone)]
pub(crate) struct SideChart {
    /// Layout of this side, in the sample kind the switch operates on
    pub layout: TopoLayout,
    /// Local intersection range
    pub start: [usize; 3],
    /// Local intersection range (exclusive end)
    pub end: [usize; 3],
    /// Local block grid extents
    pub n_block: [usize; 3],
    /// Per-axis, per-block-coordinate block extents
    pub block_size: [Vec<usize>; 3],
    /// Peer rank of each linear block (parent ranks until finalized)
    pub dest_rank: Vec<usize>,
    /// Linear block index of each block in the peer's chart
    pub dest_tag: Vec<usize>,
    /// Buffer slot offset of each linear block, in samples
    pub slot_offset: Vec<usize>,
    /// Samples exchanged with each peer rank
    pub count: Vec<usize>,
    /// Prefix sums of `count`
    pub displ: Vec<usize>,
    /// Total samples on this side
    pub total: usize,
}

impl SideChart {
    fn n_blocks(&self) -> usize {
        self.n_block[0] * self.n_block[1] * self.n_block[2]
    }

    /// Block extents of the linear block `bid`
    fn sizes(&self, bid: usize) -> [usize; 3] {
        let ib = local_split(bid, self.n_block);
        [
            self.block_size[0][ib[0]],
            self.block_size[1][ib[1]],
            self.block_size[2][ib[2]],
        ]
    }

    /// Local start coordinates of the linear block `bid`
    fn block_start(&self, bid: usize, n_by_block: [usize; 3]) -> [usize; 3] {
        let ib = local_split(bid, self.n_block);
        [
            self.start[0] + ib[0] * n_by_block[0],
            self.start[1] + ib[1] * n_by_block[1],
            self.start[2] + ib[2] * n_by_block[2],
        ]
    }
}

/// Exchanged global extent of the intersection of the two topologies
fn exchanged_extent(a: &TopoLayout, b: &TopoLayout, shift: [i64; 3]) -> [usize; 3] {
    let mut ex = [0; 3];
    for d in 0..3 {
        let lo = shift[d].max(0);
        let hi = (a.nglob[d] as i64 + shift[d]).min(b.nglob[d] as i64);
        ex[d] = (hi - lo).max(0) as usize;
    }
    ex
}

/// The +1 cell of an odd exchanged extent lands on the rank owning the
/// last exchanged cell of that axis
fn odd_extra(ex: usize) -> usize {
    usize::from(ex > 1 && ex % 2 == 1)
}

/// Start of the exchanged region in this side's global coordinates
fn region_start(shift_to_other: [i64; 3]) -> [usize; 3] {
    [
        (-shift_to_other[0]).max(0) as usize,
        (-shift_to_other[1]).max(0) as usize,
        (-shift_to_other[2]).max(0) as usize,
    ]
}

/// True when this rank owns the last exchanged cell along each axis
fn owns_region_end(layout: &TopoLayout, lo: [usize; 3], ex: [usize; 3]) -> [bool; 3] {
    let mut owns = [false; 3];
    for d in 0..3 {
        if ex[d] == 0 || layout.nloc[d] == 0 {
            continue;
        }
        let last = lo[d] + ex[d] - 1;
        let start = layout.start_id(d);
        owns[d] = last >= start && last < start + layout.nloc[d];
    }
    owns
}

/// Block grid of one rank's intersection range
fn block_grid(
    start: [usize; 3],
    end: [usize; 3],
    n_by_block: [usize; 3],
    ex: [usize; 3],
    is_end: [bool; 3],
) -> Result<([usize; 3], [Vec<usize>; 3])> {
    let mut dims = [0; 3];
    let mut sizes: [Vec<usize>; 3] = Default::default();
    for d in 0..3 {
        let extent = end[d] - start[d];
        if extent == 0 {
            continue;
        }
        let extra = if is_end[d] { odd_extra(ex[d]) } else { 0 };
        if extent < extra || (extent - extra) % n_by_block[d] != 0 {
            return invariant_err(format!(
                "an exchanged extent of {extent} cells cannot be tiled by blocks of {}",
                n_by_block[d]
            ));
        }
        dims[d] = (extent - extra) / n_by_block[d];
        if dims[d] == 0 {
            return invariant_err(
                "the odd remainder of the exchanged region has no block to attach to",
            );
        }
        sizes[d] = vec![n_by_block[d]; dims[d]];
        *sizes[d].last_mut().unwrap() += extra;
    }
    if dims.iter().any(|&n| n == 0) {
        // an empty intersection on any axis empties the whole grid
        dims = [0; 3];
        sizes = Default::default();
    }
    Ok((dims, sizes))
}

/// Common block extent: GCD over every rank of both sides' adjusted
/// intersection extents
fn compute_n_by_block(
    in_l: &TopoLayout,
    out_l: &TopoLayout,
    shift: [i64; 3],
    ex: [usize; 3],
    comm_size: usize,
) -> Result<[usize; 3]> {
    let neg = [-shift[0], -shift[1], -shift[2]];
    let in_lo = region_start(shift);
    let out_lo = region_start(neg);
    let mut nby = [0usize; 3];
    for r in 0..comm_size {
        let il = in_l.for_rank(r);
        let ol = out_l.for_rank(r);
        let (is, ie) = il.intersect(shift, out_l);
        let (os, oe) = ol.intersect(neg, in_l);
        let i_end = owns_region_end(&il, in_lo, ex);
        let o_end = owns_region_end(&ol, out_lo, ex);
        for d in 0..3 {
            let mut isend = ie[d] - is[d];
            let mut osend = oe[d] - os[d];
            if i_end[d] {
                isend = isend.saturating_sub(odd_extra(ex[d]));
            }
            if o_end[d] {
                osend = osend.saturating_sub(odd_extra(ex[d]));
            }
            nby[d] = gcd(nby[d], gcd(isend, osend));
        }
    }
    for d in 0..3 {
        if nby[d] == 0 {
            if ex[d] == 0 {
                return invariant_err(format!(
                    "the two topologies do not overlap along dimension {d}"
                ));
            }
            // every rank's adjusted extent vanished: the single exchanged
            // cell of this axis forms the block on its own
            nby[d] = ex[d];
        }
    }
    Ok(nby)
}

/// One side's chart, with peer ranks expressed in the parent group
fn chart_for_side(
    my: &TopoLayout,
    other: &TopoLayout,
    shift_to_other: [i64; 3],
    ex: [usize; 3],
    n_by_block: [usize; 3],
) -> Result<SideChart> {
    let (start, end) = my.intersect(shift_to_other, other);
    let my_lo = region_start(shift_to_other);
    let (n_block, block_size) =
        block_grid(start, end, n_by_block, ex, owns_region_end(my, my_lo, ex))?;
    let mut chart = SideChart {
        layout: *my,
        start,
        end,
        n_block,
        block_size,
        dest_rank: Vec::new(),
        dest_tag: Vec::new(),
        slot_offset: Vec::new(),
        count: Vec::new(),
        displ: Vec::new(),
        total: 0,
    };

    let neg = [-shift_to_other[0], -shift_to_other[1], -shift_to_other[2]];
    let mut peer_cache: std::collections::HashMap<usize, (TopoLayout, [usize; 3], [usize; 3])> =
        std::collections::HashMap::new();

    for bid in 0..chart.n_blocks() {
        let loc = chart.block_start(bid, n_by_block);
        // global coordinates of the block start, in the other topology frame
        let mut g_other = [0usize; 3];
        let mut rankd = [0usize; 3];
        for d in 0..3 {
            let g = my.start_id(d) as i64 + loc[d] as i64 + shift_to_other[d];
            debug_assert!(g >= 0);
            g_other[d] = g as usize;
            rankd[d] = other.rank_of_global_index(d, g_other[d]);
        }
        let peer = other.rank_from_rankd(rankd);
        let (peer_layout, peer_start, peer_dims) = match peer_cache.get(&peer) {
            Some(entry) => *entry,
            None => {
                let pl = other.for_rank(peer);
                let (ps, pe) = pl.intersect(neg, my);
                let peer_lo = region_start(neg);
                let (dims, _) =
                    block_grid(ps, pe, n_by_block, ex, owns_region_end(&pl, peer_lo, ex))?;
                peer_cache.insert(peer, (pl, ps, dims));
                (pl, ps, dims)
            }
        };
        let mut ib = [0usize; 3];
        for d in 0..3 {
            let local = g_other[d] - peer_layout.start_id(d);
            debug_assert!(local >= peer_start[d]);
            ib[d] = (local - peer_start[d]) / n_by_block[d];
        }
        let tag = ib[0] + peer_dims[0] * (ib[1] + peer_dims[1] * ib[2]);
        chart.dest_rank.push(peer);
        chart.dest_tag.push(tag);
    }
    Ok(chart)
}

/// Fill counts, displacements and slot offsets once peer ranks are final
fn finalize_chart(chart: &mut SideChart, group_size: usize, slot_total: usize) {
    chart.count = vec![0; group_size];
    for &r in &chart.dest_rank {
        chart.count[r] += slot_total;
    }
    chart.displ = vec![0; group_size];
    for r in 1..group_size {
        chart.displ[r] = chart.displ[r - 1] + chart.count[r - 1];
    }
    chart.total = chart.displ.last().copied().unwrap_or(0)
        + chart.count.last().copied().unwrap_or(0);
    // slot of a block: its peer's segment plus its rank among the blocks
    // headed to the same peer, in block order
    let mut used = vec![0usize; group_size];
    chart.slot_offset = chart
        .dest_rank
        .iter()
        .map(|&r| {
            let off = chart.displ[r] + used[r];
            used[r] += slot_total;
            off
        })
        .collect();
}

/// Re-partitions data between two topologies with differing pencil layouts
pub struct SwitchTopo {
    in_chart: SideChart,
    out_chart: SideChart,
    n_by_block: [usize; 3],
    /// padded samples of one block slot, one component
    block_mem: usize,
    /// samples of one block slot, all components
    slot_total: usize,
    lda: usize,
    nf: usize,
    subcomm: SimpleCommunicator,
    sub_rank: usize,
    is_all2all: bool,
    strategy: ExchangeStrategy,
}

impl SwitchTopo {
    /// Plan the switch from `topo_in` to `topo_out`; `shift` is the position
    /// of the input origin inside the output global frame
    pub fn new(
        topo_in: &Topology,
        topo_out: &Topology,
        shift: [i64; 3],
        strategy: ExchangeStrategy,
    ) -> Result<Self> {
        let in_l = *topo_in.layout();
        let out_l = *topo_out.layout();
        if in_l.nf != out_l.nf {
            return config_err("both topologies of a switch must be real or both complex");
        }
        if in_l.lda != out_l.lda {
            return config_err("both topologies of a switch must carry the same lda");
        }
        let comm = topo_in.comm();
        let comm_size = comm.size() as usize;

        let ex = exchanged_extent(&in_l, &out_l, shift);
        let n_by_block = compute_n_by_block(&in_l, &out_l, shift, ex, comm_size)?;
        let neg = [-shift[0], -shift[1], -shift[2]];
        let mut in_chart = chart_for_side(&in_l, &out_l, shift, ex, n_by_block)?;
        let mut out_chart = chart_for_side(&out_l, &in_l, neg, ex, n_by_block)?;

        let block_mem = block_mem_size(n_by_block, ex, in_l.nf, in_l.alignment);
        let slot_total = block_mem * in_l.lda;

        // restrict the exchange to the ranks this switch really couples
        let subcomm = split_subcomm(comm, &in_chart.dest_rank, &out_chart.dest_rank)?;
        let sub_rank = subcomm.rank() as usize;
        let sub_size = subcomm.size() as usize;
        let rank_map = gather_sub_ranks(comm, &subcomm);
        for chart in [&mut in_chart, &mut out_chart] {
            for r in &mut chart.dest_rank {
                *r = rank_map[*r];
            }
            finalize_chart(chart, sub_size, slot_total);
        }

        let is_all2all = in_chart.count[0] != 0
            && in_chart
                .count
                .iter()
                .chain(out_chart.count.iter())
                .all(|&c| c == in_chart.count[0]);

        Ok(Self {
            in_chart,
            out_chart,
            n_by_block,
            block_mem,
            slot_total,
            lda: in_l.lda,
            nf: in_l.nf,
            subcomm,
            sub_rank,
            is_all2all,
            strategy,
        })
    }

    /// Samples required of each exchange buffer bound to this switch
    pub fn buf_mem_size(&self) -> usize {
        self.in_chart.total.max(self.out_chart.total)
    }

    /// Move `v` between the two layouts; `send_buf` and `recv_buf` are the
    /// shared exchange buffers, each at least [`Self::buf_mem_size`] long
    pub fn execute(
        &self,
        v: &mut [f64],
        sign: Sign,
        send_buf: &mut [f64],
        recv_buf: &mut [f64],
    ) -> Result<()> {
        let (send, recv) = match sign {
            Sign::Forward => (&self.in_chart, &self.out_chart),
            Sign::Backward => (&self.out_chart, &self.in_chart),
        };
        debug_assert!(send_buf.len() >= send.total && recv_buf.len() >= recv.total);

        match self.strategy {
            ExchangeStrategy::AllToAll => {
                self.pack_all(v, send, send_buf);
                all_to_all::exchange(self, send, recv, send_buf, recv_buf)?;
            }
            ExchangeStrategy::NonBlocking => {
                non_blocking::exchange(self, send, recv, v, send_buf, recv_buf)?;
            }
        }

        v[..recv.layout.mem_size()].fill(0.0);
        self.unpack_all(v, send.layout.axis, recv, recv_buf);
        Ok(())
    }

    /// Pack every block of `send` into its slot of `buf`, parallel over blocks
    fn pack_all(&self, v: &[f64], send: &SideChart, buf: &mut [f64]) {
        let slots = carve_slots(
            buf,
            (0..send.n_blocks())
                .map(|bid| (send.slot_offset[bid], self.slot_total, bid))
                .collect(),
        );
        slots.into_par_iter().for_each(|(bid, slot)| {
            self.pack_block(v, send, bid, slot);
        });
    }

    /// Pack one block; the field is read unit-stride along its fast axis
    pub(crate) fn pack_block(&self, v: &[f64], send: &SideChart, bid: usize, slot: &mut [f64]) {
        let ax0 = send.layout.axis;
        let ax1 = (ax0 + 1) % 3;
        let ax2 = (ax0 + 2) % 3;
        let nf = self.nf;
        let nmem = send.layout.nmem;
        let mem_dim = send.layout.mem_dim();
        let bs = send.sizes(bid);
        let loc = send.block_start(bid, self.n_by_block);
        let base = local_index(ax0, loc[ax0], loc[ax1], loc[ax2], ax0, nmem, nf);
        let run = bs[ax0] * nf;
        for lia in 0..self.lda {
            let comp = &v[lia * mem_dim..];
            let dst = &mut slot[lia * self.block_mem..];
            for id in 0..bs[ax1] * bs[ax2] {
                let i1 = id % bs[ax1];
                let i2 = id / bs[ax1];
                let src = base + local_index(ax0, 0, i1, i2, ax0, nmem, nf);
                dst[id * run..(id + 1) * run].copy_from_slice(&comp[src..src + run]);
            }
        }
    }

    /// Scatter every received block into the destination layout; reads are
    /// unit-stride from the buffer, writes follow the destination stride
    fn unpack_all(&self, v: &mut [f64], frame_axis: usize, recv: &SideChart, buf: &[f64]) {
        for bid in 0..recv.n_blocks() {
            let slot = &buf[recv.slot_offset[bid]..recv.slot_offset[bid] + self.slot_total];
            self.unpack_block(v, frame_axis, recv, bid, slot);
        }
    }

    pub(crate) fn unpack_block(
        &self,
        v: &mut [f64],
        frame_axis: usize,
        recv: &SideChart,
        bid: usize,
        slot: &[f64],
    ) {
        let ax0 = frame_axis;
        let ax1 = (ax0 + 1) % 3;
        let ax2 = (ax0 + 2) % 3;
        let nf = self.nf;
        let out_axis = recv.layout.axis;
        let nmem = recv.layout.nmem;
        let mem_dim = recv.layout.mem_dim();
        let bs = recv.sizes(bid);
        let loc = recv.block_start(bid, self.n_by_block);
        let base = local_index(ax0, loc[ax0], loc[ax1], loc[ax2], out_axis, nmem, nf);
        let stride = local_index(ax0, 1, 0, 0, out_axis, nmem, nf);
        let run = bs[ax0];
        for lia in 0..self.lda {
            let comp = &mut v[lia * mem_dim..];
            let src_comp = &slot[lia * self.block_mem..];
            for id in 0..bs[ax1] * bs[ax2] {
                let i1 = id % bs[ax1];
                let i2 = id / bs[ax1];
                let dst = base + local_index(ax0, 0, i1, i2, out_axis, nmem, nf);
                let src = id * run * nf;
                if nf == 1 {
                    for i0 in 0..run {
                        comp[dst + i0 * stride] = src_comp[src + i0];
                    }
                } else {
                    for i0 in 0..run {
                        comp[dst + i0 * stride] = src_comp[src + 2 * i0];
                        comp[dst + i0 * stride + 1] = src_comp[src + 2 * i0 + 1];
                    }
                }
            }
        }
    }

    pub(crate) fn subcomm(&self) -> &SimpleCommunicator {
        &self.subcomm
    }

    pub(crate) fn sub_rank(&self) -> usize {
        self.sub_rank
    }

    pub(crate) fn slot_total(&self) -> usize {
        self.slot_total
    }

    pub(crate) fn is_all2all(&self) -> bool {
        self.is_all2all
    }
}

/// Padded sample count of one block slot, one component
fn block_mem_size(n_by_block: [usize; 3], ex: [usize; 3], nf: usize, alignment: usize) -> usize {
    let total: usize = (0..3).map(|d| n_by_block[d] + odd_extra(ex[d])).product::<usize>() * nf;
    let sample = std::mem::size_of::<f64>();
    let rem = (total * sample) % alignment;
    if rem == 0 {
        total
    } else {
        total + (alignment - rem) / sample
    }
}

/// Split disjoint slots out of a buffer; input is (offset, len, key)
fn carve_slots(
    buf: &mut [f64],
    mut slots: Vec<(usize, usize, usize)>,
) -> Vec<(usize, &mut [f64])> {
    slots.sort_unstable();
    let mut out = Vec::with_capacity(slots.len());
    let mut rest = buf;
    let mut consumed = 0usize;
    for (offset, len, key) in slots {
        let (_, tail) = rest.split_at_mut(offset - consumed);
        let (slot, tail) = tail.split_at_mut(len);
        out.push((key, slot));
        rest = tail;
        consumed = offset + len;
    }
    out
}

/// Transitive closure of "exchanges data with": every rank iteratively takes
/// the minimum color of its peers until no color changes anywhere, then the
/// group splits by color
fn split_subcomm(
    comm: &SimpleCommunicator,
    i2o_peers: &[usize],
    o2i_peers: &[usize],
) -> Result<SimpleCommunicator> {
    let size = comm.size() as usize;
    let rank = comm.rank();
    let mut in_group = vec![false; size];
    for &p in i2o_peers.iter().chain(o2i_peers.iter()) {
        in_group[p] = true;
    }
    let mut my_color = rank;
    loop {
        let mut colors = vec![0i32; size];
        comm.all_gather_into(&my_color, &mut colors[..]);
        let mut missing = 0i32;
        for (ir, &c) in colors.iter().enumerate() {
            if in_group[ir] && c != my_color {
                missing += 1;
                if c < my_color {
                    missing -= 1;
                    my_color = c;
                }
            }
        }
        let mut left = 0i32;
        comm.all_reduce_into(&missing, &mut left, SystemOperation::sum());
        if left == 0 {
            break;
        }
    }
    comm.split_by_color(Color::with_value(my_color))
        .ok_or_else(|| crate::error::SolverError::Invariant("communicator split failed".into()))
}

/// New rank of every parent rank inside the sub-communicator
fn gather_sub_ranks(comm: &SimpleCommunicator, subcomm: &SimpleCommunicator) -> Vec<usize> {
    let size = comm.size() as usize;
    let my_new = subcomm.rank();
    let mut new_ranks = vec![0i32; size];
    comm.all_gather_into(&my_new, &mut new_ranks[..]);
    new_ranks.into_iter().map(|r| r as usize).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(
        axis: usize,
        nglob: [usize; 3],
        nproc: [usize; 3],
        rank: usize,
    ) -> TopoLayout {
        let size = nproc[0] * nproc[1] * nproc[2];
        TopoLayout::new(axis, 1, nglob, nproc, false, None, 16, rank, size).unwrap()
    }

    /// Build both charts of every rank without any communicator
    fn charts_for_all_ranks(
        in_l: &TopoLayout,
        out_l: &TopoLayout,
        shift: [i64; 3],
    ) -> Vec<(SideChart, SideChart)> {
        let comm_size = in_l.nproc.iter().product();
        let ex = exchanged_extent(in_l, out_l, shift);
        let nby = compute_n_by_block(in_l, out_l, shift, ex, comm_size).unwrap();
        let neg = [-shift[0], -shift[1], -shift[2]];
        (0..comm_size)
            .map(|r| {
                let il = in_l.for_rank(r);
                let ol = out_l.for_rank(r);
                let mut ic = chart_for_side(&il, out_l, shift, ex, nby).unwrap();
                let mut oc = chart_for_side(&ol, in_l, neg, ex, nby).unwrap();
                let slot = block_mem_size(nby, ex, in_l.nf, in_l.alignment) * in_l.lda;
                finalize_chart(&mut ic, comm_size, slot);
                finalize_chart(&mut oc, comm_size, slot);
                (ic, oc)
            })
            .collect()
    }

    #[test]
    fn identity_switch_is_one_self_block() {
        let a = layout(0, [8, 8, 8], [1, 1, 1], 0);
        let b = layout(1, [8, 8, 8], [1, 1, 1], 0);
        let charts = charts_for_all_ranks(&a, &b, [0, 0, 0]);
        let (ic, oc) = &charts[0];
        assert_eq!(ic.n_blocks(), 1);
        assert_eq!(oc.n_blocks(), 1);
        assert_eq!(ic.dest_rank[0], 0);
        assert_eq!(ic.dest_tag[0], 0);
        assert_eq!(ic.total, oc.total);
    }

    #[test]
    fn padded_target_keeps_shift() {
        // embed 8 cells at offset 4 of an 18-cell axis
        let a = layout(0, [8, 8, 8], [1, 1, 1], 0);
        let b = layout(0, [18, 8, 8], [1, 1, 1], 0);
        let charts = charts_for_all_ranks(&a, &b, [4, 0, 0]);
        let (ic, oc) = &charts[0];
        assert_eq!(ic.start[0], 0);
        assert_eq!(ic.end[0], 8);
        assert_eq!(oc.start[0], 4);
        assert_eq!(oc.end[0], 12);
        assert_eq!(ic.total, oc.total);
    }

    #[test]
    fn block_bytes_conserved_across_ranks() {
        // x-pencils over a 2x2 grid in (y,z) into y-pencils over (x,z)
        let in_l = layout(0, [16, 8, 12], [1, 2, 2], 0);
        let out_l = layout(1, [16, 8, 12], [2, 1, 2], 0);
        let charts = charts_for_all_ranks(&in_l, &out_l, [0, 0, 0]);
        let nranks = charts.len();
        for a in 0..nranks {
            for b in 0..nranks {
                // samples a sends to b equal the samples b expects from a
                let sent: usize = charts[a].0.count[b];
                let expected: usize = charts[b].1.count[a];
                assert_eq!(sent, expected, "pair ({a},{b})");
            }
        }
        // every block points at a valid peer block of matching extent
        for (r, (ic, _)) in charts.iter().enumerate() {
            for bid in 0..ic.n_blocks() {
                let peer = ic.dest_rank[bid];
                let tag = ic.dest_tag[bid];
                let oc = &charts[peer].1;
                assert!(tag < oc.n_blocks(), "rank {r} block {bid}");
                assert_eq!(ic.sizes(bid), oc.sizes(tag));
                assert_eq!(oc.dest_rank[tag], r);
                assert_eq!(oc.dest_tag[tag], bid);
            }
        }
    }

    #[test]
    fn odd_extent_attaches_to_last_block() {
        // 9 exchanged cells along y: the last block absorbs the odd cell
        let in_l = layout(0, [8, 9, 8], [1, 1, 1], 0);
        let out_l = layout(1, [8, 9, 8], [1, 1, 1], 0);
        let charts = charts_for_all_ranks(&in_l, &out_l, [0, 0, 0]);
        let (ic, _) = &charts[0];
        let total_y: usize = ic.block_size[1].iter().sum();
        assert_eq!(total_y, 9);
        assert_eq!(*ic.block_size[1].last().unwrap() % 2, 1);
    }

    #[test]
    fn empty_trailing_ranks_still_conserve() {
        // ceil(9/4) leaves the fourth rank of dim 1 without cells, and the
        // odd exchanged extent attaches to the rank owning the last cell
        let in_l = layout(0, [8, 9, 8], [1, 4, 1], 0);
        let out_l = layout(1, [8, 9, 8], [2, 1, 2], 0);
        let charts = charts_for_all_ranks(&in_l, &out_l, [0, 0, 0]);
        for a in 0..4 {
            for b in 0..4 {
                assert_eq!(charts[a].0.count[b], charts[b].1.count[a]);
            }
        }
        for (r, (ic, _)) in charts.iter().enumerate() {
            let mut cells = 0;
            for bid in 0..ic.n_blocks() {
                let bs = ic.sizes(bid);
                cells += bs[0] * bs[1] * bs[2];
                let peer = ic.dest_rank[bid];
                let oc = &charts[peer].1;
                assert_eq!(ic.sizes(bid), oc.sizes(ic.dest_tag[bid]), "rank {r}");
            }
            let il = in_l.for_rank(r);
            assert_eq!(cells, il.nloc[0] * il.nloc[1] * il.nloc[2]);
        }
    }

    #[test]
    fn slot_offsets_are_disjoint() {
        let in_l = layout(0, [16, 8, 8], [1, 2, 2], 0);
        let out_l = layout(1, [16, 8, 8], [2, 1, 2], 0);
        for (ic, _) in charts_for_all_ranks(&in_l, &out_l, [0, 0, 0]) {
            let mut offs = ic.slot_offset.clone();
            offs.sort_unstable();
            let slot = ic.total / ic.n_blocks().max(1);
            for w in offs.windows(2) {
                assert!(w[1] - w[0] >= slot);
            }
        }
    }

    #[test]
    fn carve_returns_disjoint_slices() {
        let mut buf = vec![0.0; 32];
        let slots = carve_slots(&mut buf, vec![(16, 8, 1), (0, 8, 0)]);
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].0, 0);
        assert_eq!(slots[1].0, 1);
        assert_eq!(slots[0].1.len(), 8);
    }
}
