//! Index arithmetic and process-grid helpers
//!
//! All multidimensional data lives in flat buffers whose fastest running
//! index is the topology axis, then axis+1, then axis+2 (cyclic). The
//! helpers here translate between axis-relative triplets and flat offsets.

/// Greatest common divisor
pub fn gcd(a: usize, b: usize) -> usize {
    if a == 0 {
        b
    } else {
        gcd(b % a, a)
    }
}

/// Flat memory offset of the point `(i0, i1, i2)` expressed in the frame of
/// `axis` (`i0` runs along `axis`, `i1` along `axis+1`, `i2` along `axis+2`),
/// inside a buffer whose fastest dimension is `topo_axis` with padded extents
/// `nmem` and element multiplicity `nf`.
#[inline]
pub fn local_index(
    axis: usize,
    i0: usize,
    i1: usize,
    i2: usize,
    topo_axis: usize,
    nmem: [usize; 3],
    nf: usize,
) -> usize {
    let mut c = [0usize; 3];
    c[axis % 3] = i0;
    c[(axis + 1) % 3] = i1;
    c[(axis + 2) % 3] = i2;
    let ax0 = topo_axis % 3;
    let ax1 = (topo_axis + 1) % 3;
    let ax2 = (topo_axis + 2) % 3;
    (c[ax0] + nmem[ax0] * (c[ax1] + nmem[ax1] * c[ax2])) * nf
}

/// Flat offset of `(i0, io)` where `io` collapses the two slow dimensions of
/// a pencil layout with fast axis `axis`
#[inline]
pub fn collapsed_index(axis: usize, i0: usize, io: usize, nmem: [usize; 3], nf: usize) -> usize {
    let ax0 = axis % 3;
    (i0 + io * nmem[ax0]) * nf
}

/// Split a linear id into its triplet, `n[0]` running fastest
#[inline]
pub fn local_split(id: usize, n: [usize; 3]) -> [usize; 3] {
    [id % n[0], (id / n[0]) % n[1], id / (n[0] * n[1])]
}

/// Balanced process grid for a pencil with fast axis `axis`: the fast axis is
/// not split and the two remaining axes share `comm_size` as evenly as
/// possible.
pub fn pencil_nproc(axis: usize, comm_size: usize) -> [usize; 3] {
    let ax1 = (axis + 1) % 3;
    let ax2 = (axis + 2) % 3;
    let mut np1 = (comm_size as f64).sqrt().floor() as usize;
    while np1 > 1 && comm_size % np1 != 0 {
        np1 -= 1;
    }
    let np1 = np1.max(1);
    let mut nproc = [1; 3];
    nproc[ax1] = np1;
    nproc[ax2] = comm_size / np1;
    nproc
}

/// Process grid for a pencil with fast axis `axis`, preserving from
/// `nproc_hint` the process count of the non-fast axis that is not
/// `hint_axis`. Successive switches then reshuffle data only between the
/// previous fast axis and the new one.
pub fn pencil_nproc_hint(
    axis: usize,
    comm_size: usize,
    hint_axis: usize,
    nproc_hint: [usize; 3],
) -> [usize; 3] {
    if hint_axis == axis {
        return pencil_nproc(axis, comm_size);
    }
    // the axis whose process count survives the switch
    let keep = 3 - axis - hint_axis;
    let np_keep = nproc_hint[keep].max(1);
    if comm_size % np_keep != 0 {
        return pencil_nproc(axis, comm_size);
    }
    let mut nproc = [1; 3];
    nproc[keep] = np_keep;
    nproc[hint_axis] = comm_size / np_keep;
    nproc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gcd_basics() {
        assert_eq!(gcd(0, 5), 5);
        assert_eq!(gcd(12, 18), 6);
        assert_eq!(gcd(7, 13), 1);
        assert_eq!(gcd(32, 48), 16);
    }

    #[test]
    fn local_index_matches_layout() {
        // fast axis 1, nmem = (4, 8, 2), real data
        let nmem = [4, 8, 2];
        // point expressed in frame of axis 1: i0 along 1, i1 along 2, i2 along 0
        let id = local_index(1, 3, 1, 2, 1, nmem, 1);
        // c = [2, 3, 1]; flat = c1 + 8*(c2 + 2*c0) = 3 + 8*(1 + 2*2)
        assert_eq!(id, 3 + 8 * (1 + 2 * 2));
        // complex data doubles the offset
        assert_eq!(local_index(1, 3, 1, 2, 1, nmem, 2), 2 * id);
    }

    #[test]
    fn local_index_axis_permutation() {
        let nmem = [6, 5, 4];
        // same physical point expressed in two frames must agree
        let a = local_index(0, 2, 3, 1, 0, nmem, 1);
        let b = local_index(1, 3, 1, 2, 0, nmem, 1);
        assert_eq!(a, b);
    }

    #[test]
    fn split_roundtrip() {
        let n = [3, 4, 5];
        for id in 0..60 {
            let t = local_split(id, n);
            assert_eq!(id, t[0] + n[0] * (t[1] + n[1] * t[2]));
        }
    }

    #[test]
    fn nproc_products() {
        for size in [1, 2, 4, 6, 8, 12, 16] {
            for axis in 0..3 {
                let np = pencil_nproc(axis, size);
                assert_eq!(np[0] * np[1] * np[2], size);
                assert_eq!(np[axis], 1);
            }
        }
    }

    #[test]
    fn nproc_hint_preserves_kept_axis() {
        // previous pencil along 0 split as (1, 2, 4); new pencil along 1
        let np = pencil_nproc_hint(1, 8, 0, [1, 2, 4]);
        assert_eq!(np, [2, 1, 4]);
        // not divisible -> fall back to a balanced grid
        let np = pencil_nproc_hint(1, 8, 0, [1, 2, 3]);
        assert_eq!(np[0] * np[1] * np[2], 8);
        assert_eq!(np[1], 1);
    }
}
