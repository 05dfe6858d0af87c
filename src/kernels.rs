//! Green's function evaluators
//!
//! Each evaluator fills the local part of the Green's function array for a
//! given number of unbounded directions, from a per-direction description:
//! `hfact` (grid spacing, nonzero on physical directions), `kfact` and
//! `koffset` (wave number = (index + offset) * factor, nonzero on spectral
//! directions) and `symstart` (index beyond which indices mirror to their
//! negatives). `eps` is the smoothing length of the regularized kernels.
//!
//! The LGF kernel is pre-tabulated; its table is read once per Green build
//! from the directory named by `POISFFT_KERNEL_PATH` (default `kernel/`).
pub mod special;

use crate::error::{Result, SolverError};
use crate::topology::TopoLayout;
use crate::types::GreenKind;
use crate::utils::local_index;
use special::{bessel_k0, exp_erfc, expint_e1};
use statrs::function::erf::erf;
use std::f64::consts::PI;

const C_1O4PI: f64 = 1.0 / (4.0 * PI);
const C_1O2PI: f64 = 1.0 / (2.0 * PI);
const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Signed symmetrized index: beyond `symstart` the index mirrors negative
fn sym_index(gid: usize, symstart: f64) -> f64 {
    let g = gid as f64;
    if symstart > 0.0 && g > symstart {
        g - 2.0 * symstart
    } else {
        g
    }
}

/// Iterate the local points of `green`, writing the value returned for each
/// global index triplet; `None` leaves the point untouched
fn fill_points<F>(layout: &TopoLayout, green: &mut [f64], mut f: F)
where
    F: FnMut([usize; 3]) -> Option<f64>,
{
    let ax0 = layout.axis;
    let ax1 = (ax0 + 1) % 3;
    let ax2 = (ax0 + 2) % 3;
    let start = [
        layout.start_id(0),
        layout.start_id(1),
        layout.start_id(2),
    ];
    for i2 in 0..layout.nloc[ax2] {
        for i1 in 0..layout.nloc[ax1] {
            for i0 in 0..layout.nloc[ax0] {
                let mut gid = [0usize; 3];
                gid[ax0] = start[ax0] + i0;
                gid[ax1] = start[ax1] + i1;
                gid[ax2] = start[ax2] + i2;
                if let Some(value) = f(gid) {
                    let id = local_index(ax0, i0, i1, i2, ax0, layout.nmem, layout.nf);
                    green[id] = value;
                    if layout.nf == 2 {
                        green[id + 1] = 0.0;
                    }
                }
            }
        }
    }
}

/// Gaussian-regularized kernel shape of order 2, 4 or 6 (3-D)
fn hej_theta(kind: GreenKind, rho: f64) -> f64 {
    let g2 = erf(rho / f64::sqrt(2.0));
    let damp = (-0.5 * rho * rho).exp();
    let c = (2.0 / PI).sqrt();
    match kind {
        GreenKind::Hej2 => g2,
        GreenKind::Hej4 => g2 + c * (rho / 2.0) * damp,
        GreenKind::Hej6 => g2 + c * (rho * (7.0 - rho * rho) / 8.0) * damp,
        _ => unreachable!("regularized kernels only"),
    }
}

/// Slope of `theta` at the origin, giving the analytic self-interaction
fn hej_theta_slope(kind: GreenKind) -> f64 {
    let c = (2.0 / PI).sqrt();
    match kind {
        GreenKind::Hej2 => c,
        GreenKind::Hej4 => 1.5 * c,
        GreenKind::Hej6 => c * 15.0 / 8.0,
        _ => unreachable!("regularized kernels only"),
    }
}

/// Green's function with three unbounded directions, evaluated in physical
/// space on the expanded topology
pub fn fill_green_3dir_unbounded(
    layout: &TopoLayout,
    hfact: [f64; 3],
    symstart: [f64; 3],
    green: &mut [f64],
    kind: GreenKind,
    eps: f64,
) -> Result<()> {
    let h_eq = (hfact[0] * hfact[1] * hfact[2]).cbrt();
    // radius of the sphere with the volume of one cell
    let r_eq = h_eq * (3.0 / (4.0 * PI)).cbrt();
    let lgf = match kind {
        GreenKind::Lgf2 => Some(load_lgf_table(3)?),
        _ => None,
    };

    fill_points(layout, green, |gid| {
        let is = [
            sym_index(gid[0], symstart[0]),
            sym_index(gid[1], symstart[1]),
            sym_index(gid[2], symstart[2]),
        ];
        let r2 = (0..3).map(|d| (hfact[d] * is[d]).powi(2)).sum::<f64>();
        let r = r2.sqrt();
        let value = match kind {
            GreenKind::Chat2 => {
                if r > 0.0 {
                    -C_1O4PI / r
                } else {
                    -C_1O4PI * 1.5 / r_eq
                }
            }
            GreenKind::Hej2 | GreenKind::Hej4 | GreenKind::Hej6 => {
                if r > 0.0 {
                    -C_1O4PI * hej_theta(kind, r / eps) / r
                } else {
                    -C_1O4PI * hej_theta_slope(kind) / eps
                }
            }
            GreenKind::Lgf2 => {
                let (n, table) = lgf.as_ref().expect("table loaded above");
                let ix = [
                    is[0].abs() as usize,
                    is[1].abs() as usize,
                    is[2].abs() as usize,
                ];
                if ix.iter().all(|&i| i < *n) {
                    -table[ix[0] + n * (ix[1] + n * ix[2])] / h_eq
                } else {
                    -C_1O4PI / r
                }
            }
        };
        Some(value)
    });
    Ok(())
}

/// Green's function with two unbounded directions and up to one spectral one
pub fn fill_green_2dir_unbounded(
    layout: &TopoLayout,
    hfact: [f64; 3],
    kfact: [f64; 3],
    koffset: [f64; 3],
    symstart: [f64; 3],
    green: &mut [f64],
    kind: GreenKind,
    eps: f64,
) -> Result<()> {
    let spectral = (0..3).find(|&d| kfact[d] != 0.0);
    if kind == GreenKind::Lgf2 && spectral.is_some() {
        return Err(SolverError::Unsupported(
            "the lattice Green's function cannot mix with a spectral direction".into(),
        ));
    }
    let h_eq = (0..3)
        .filter(|&d| hfact[d] != 0.0)
        .map(|d| hfact[d])
        .product::<f64>()
        .sqrt();
    // radius of the disk with the area of one cell
    let r_eq = h_eq / PI.sqrt();
    let lgf = match kind {
        GreenKind::Lgf2 => Some(load_lgf_table(2)?),
        _ => None,
    };

    fill_points(layout, green, |gid| {
        let is = [
            sym_index(gid[0], symstart[0]),
            sym_index(gid[1], symstart[1]),
            sym_index(gid[2], symstart[2]),
        ];
        let r2 = (0..3).map(|d| (hfact[d] * is[d]).powi(2)).sum::<f64>();
        let r = r2.sqrt();
        let k = spectral.map_or(0.0, |s| ((is[s] + koffset[s]) * kfact[s]).abs());

        let value = if k > 0.0 {
            // regularized corrections of the k != 0 planes are rewritten in
            // full spectral space by the Green builder
            -C_1O2PI * bessel_k0(k * r.max(r_eq))
        } else {
            match kind {
                GreenKind::Chat2 => {
                    if r > 0.0 {
                        C_1O2PI * r.ln()
                    } else {
                        C_1O2PI * (r_eq.ln() - 0.5)
                    }
                }
                GreenKind::Hej2 | GreenKind::Hej4 | GreenKind::Hej6 => {
                    let rho = r / eps;
                    let damp = (-0.5 * rho * rho).exp();
                    let g2 = if r > 0.0 {
                        C_1O2PI * (r.ln() + 0.5 * expint_e1(0.5 * rho * rho))
                    } else {
                        C_1O4PI * ((2.0 * eps * eps).ln() - EULER_GAMMA)
                    };
                    match kind {
                        GreenKind::Hej2 => g2,
                        GreenKind::Hej4 => g2 - damp * C_1O4PI,
                        GreenKind::Hej6 => {
                            g2 - damp * C_1O4PI + (rho * rho - 2.0) * damp / (16.0 * PI)
                        }
                        _ => unreachable!(),
                    }
                }
                GreenKind::Lgf2 => {
                    let (n, table) = lgf.as_ref().expect("table loaded above");
                    let mut ix = [0usize; 2];
                    let mut j = 0;
                    for d in 0..3 {
                        if hfact[d] != 0.0 {
                            ix[j] = is[d].abs() as usize;
                            j += 1;
                        }
                    }
                    if ix[0] < *n && ix[1] < *n {
                        table[ix[0] + n * ix[1]] + C_1O2PI * h_eq.ln()
                    } else {
                        C_1O2PI * r.ln()
                    }
                }
            }
        };
        Some(value)
    });
    Ok(())
}

/// Green's function with one unbounded direction and two spectral ones
pub fn fill_green_1dir_unbounded(
    layout: &TopoLayout,
    hfact: [f64; 3],
    kfact: [f64; 3],
    koffset: [f64; 3],
    symstart: [f64; 3],
    green: &mut [f64],
    kind: GreenKind,
    eps: f64,
) -> Result<()> {
    if kind == GreenKind::Lgf2 {
        return Err(SolverError::Unsupported(
            "the lattice Green's function cannot mix with a spectral direction".into(),
        ));
    }
    fill_points(layout, green, |gid| {
        let is = [
            sym_index(gid[0], symstart[0]),
            sym_index(gid[1], symstart[1]),
            sym_index(gid[2], symstart[2]),
        ];
        let mut z = 0.0;
        let mut k2 = 0.0;
        for d in 0..3 {
            if hfact[d] != 0.0 {
                z = hfact[d] * is[d];
            } else if kfact[d] != 0.0 {
                k2 += ((is[d] + koffset[d]) * kfact[d]).powi(2);
            }
        }
        let k = k2.sqrt();
        let value = if k > 0.0 {
            match kind {
                GreenKind::Chat2 => -(-k * z.abs()).exp() / (2.0 * k),
                _ => {
                    let a = 0.5 * eps * eps * k2;
                    let s = eps * f64::sqrt(2.0);
                    -(exp_erfc(a + k * z, k * eps / f64::sqrt(2.0) + z / s)
                        + exp_erfc(a - k * z, k * eps / f64::sqrt(2.0) - z / s))
                        / (4.0 * k)
                }
            }
        } else {
            match kind {
                GreenKind::Chat2 => 0.5 * z.abs(),
                _ => {
                    0.5 * z * erf(z / (eps * f64::sqrt(2.0)))
                        + eps * (-0.5 * (z / eps).powi(2)).exp() / (2.0 * PI).sqrt()
                }
            }
        };
        Some(value)
    });
    Ok(())
}

/// Green's function with no unbounded direction, sampled directly in
/// spectral space. `istart` restricts the write to global indices at or
/// beyond the given triplet (used to rewrite the regularized kernels in
/// full spectral space while keeping the k = 0 plane).
#[allow(clippy::too_many_arguments)]
pub fn fill_green_0dir_unbounded(
    layout: &TopoLayout,
    hgrid: f64,
    kfact: [f64; 3],
    koffset: [f64; 3],
    symstart: [f64; 3],
    green: &mut [f64],
    kind: GreenKind,
    eps: f64,
    istart: Option<[usize; 3]>,
) -> Result<()> {
    fill_points(layout, green, |gid| {
        if let Some(lo) = istart {
            if (0..3).any(|d| gid[d] < lo[d]) {
                return None;
            }
        }
        let is = [
            sym_index(gid[0], symstart[0]),
            sym_index(gid[1], symstart[1]),
            sym_index(gid[2], symstart[2]),
        ];
        let k2 = (0..3)
            .map(|d| ((is[d] + koffset[d]) * kfact[d]).powi(2))
            .sum::<f64>();
        if k2 == 0.0 {
            return Some(0.0);
        }
        let value = match kind {
            GreenKind::Chat2 => -1.0 / k2,
            GreenKind::Hej2 => -(-0.5 * k2 * eps * eps).exp() / k2,
            GreenKind::Hej4 => {
                let x = 0.5 * k2 * eps * eps;
                -(1.0 + x) * (-x).exp() / k2
            }
            GreenKind::Hej6 => {
                let x = 0.5 * k2 * eps * eps;
                -(1.0 + x + 0.5 * x * x) * (-x).exp() / k2
            }
            GreenKind::Lgf2 => {
                let s2 = (0..3)
                    .map(|d| {
                        let k = (is[d] + koffset[d]) * kfact[d];
                        (0.5 * k * hgrid).sin().powi(2)
                    })
                    .sum::<f64>();
                -hgrid * hgrid / (4.0 * s2)
            }
        };
        Some(value)
    });
    Ok(())
}

/// Read the pre-tabulated lattice Green's function of the `greendim`-D
/// second-order Laplacian
fn load_lgf_table(greendim: usize) -> Result<(usize, Vec<f64>)> {
    let n: usize = if greendim == 3 { 64 } else { 32 };
    let dir = std::env::var("POISFFT_KERNEL_PATH").unwrap_or_else(|_| "kernel".into());
    let name = format!("{dir}/LGF_{greendim}d_sym_acc12_{n}.ker");
    let bytes = std::fs::read(&name).map_err(|e| {
        SolverError::Kernel(format!("cannot read the LGF kernel file {name}: {e}"))
    })?;
    let expect = n.pow(greendim as u32) * std::mem::size_of::<f64>();
    if bytes.len() != expect {
        return Err(SolverError::Kernel(format!(
            "the LGF kernel file {name} holds {} bytes, expected {expect}",
            bytes.len()
        )));
    }
    let table = bytes
        .chunks_exact(8)
        .map(|c| f64::from_le_bytes(c.try_into().unwrap()))
        .collect();
    Ok((n, table))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spectral_layout(n: [usize; 3]) -> TopoLayout {
        TopoLayout::new(0, 1, n, [1, 1, 1], true, None, 16, 0, 1).unwrap()
    }

    fn real_layout(n: [usize; 3]) -> TopoLayout {
        TopoLayout::new(0, 1, n, [1, 1, 1], false, None, 16, 0, 1).unwrap()
    }

    #[test]
    fn spectral_chat2_is_inverse_ksquared() {
        let n = 8;
        let layout = spectral_layout([n, n, n]);
        let mut green = vec![0.0; layout.mem_size()];
        let kf = 2.0 * PI;
        fill_green_0dir_unbounded(
            &layout,
            1.0 / n as f64,
            [kf; 3],
            [0.0; 3],
            [n as f64 / 2.0; 3],
            &mut green,
            GreenKind::Chat2,
            0.0,
            None,
        )
        .unwrap();
        // zero mode is zero
        assert_eq!(green[0], 0.0);
        assert_eq!(green[1], 0.0);
        // mode (1,0,0)
        let id = local_index(0, 1, 0, 0, 0, layout.nmem, 2);
        assert!((green[id] + 1.0 / (kf * kf)).abs() < 1e-15);
        // mode (n-1,0,0) mirrors to -1
        let id_m = local_index(0, n - 1, 0, 0, 0, layout.nmem, 2);
        assert!((green[id_m] - green[id]).abs() < 1e-15);
    }

    #[test]
    fn spectral_hej2_damps_chat2() {
        let n = 8;
        let layout = spectral_layout([n, n, n]);
        let kf = 2.0 * PI;
        let eps = 0.05;
        let mut chat = vec![0.0; layout.mem_size()];
        let mut hej = vec![0.0; layout.mem_size()];
        let sym = [n as f64 / 2.0; 3];
        fill_green_0dir_unbounded(
            &layout, 0.125, [kf; 3], [0.0; 3], sym, &mut chat, GreenKind::Chat2, eps, None,
        )
        .unwrap();
        fill_green_0dir_unbounded(
            &layout, 0.125, [kf; 3], [0.0; 3], sym, &mut hej, GreenKind::Hej2, eps, None,
        )
        .unwrap();
        let id = local_index(0, 2, 1, 0, 0, layout.nmem, 2);
        let k2 = (2.0 * kf).powi(2) + kf.powi(2);
        let expect = chat[id] * (-0.5 * k2 * eps * eps).exp();
        assert!((hej[id] - expect).abs() < 1e-15);
    }

    #[test]
    fn unbounded_chat2_decays_and_mirrors() {
        let n = 8;
        // expanded real topology of an unbounded problem
        let layout = real_layout([2 * n, 2 * n, 2 * n]);
        let h = 1.0 / n as f64;
        let mut green = vec![0.0; layout.mem_size()];
        fill_green_3dir_unbounded(
            &layout,
            [h; 3],
            [n as f64; 3],
            &mut green,
            GreenKind::Chat2,
            0.0,
        )
        .unwrap();
        let at = |i: usize, j: usize, k: usize| {
            green[local_index(0, i, j, k, 0, layout.nmem, 1)]
        };
        // free-space values away from the origin
        assert!((at(2, 0, 0) + C_1O4PI / (2.0 * h)).abs() < 1e-14);
        // the origin is regularized and more negative than its neighbors
        assert!(at(0, 0, 0) < at(1, 0, 0));
        // mirror symmetry about the expansion midpoint
        assert!((at(2 * n - 3, 0, 0) - at(3, 0, 0)).abs() < 1e-14);
    }

    #[test]
    fn hej_kernels_match_chat_far_away() {
        let n = 16;
        let layout = real_layout([2 * n, 2 * n, 2 * n]);
        let h = 1.0 / n as f64;
        let eps = 2.0 * h;
        for kind in [GreenKind::Hej2, GreenKind::Hej4, GreenKind::Hej6] {
            let mut green = vec![0.0; layout.mem_size()];
            fill_green_3dir_unbounded(&layout, [h; 3], [n as f64; 3], &mut green, kind, eps)
                .unwrap();
            let far = green[local_index(0, n - 1, 0, 0, 0, layout.nmem, 1)];
            let exact = -C_1O4PI / ((n - 1) as f64 * h);
            assert!((far - exact).abs() < 1e-10, "{kind:?}: {far} vs {exact}");
        }
    }

    #[test]
    fn one_unbounded_limits() {
        let n = 16;
        let layout = real_layout([2 * n, 8, 8]);
        let h = 1.0 / n as f64;
        let eps = 0.5 * h;
        let kf = 2.0 * PI / 8.0_f64;
        let mut green = vec![0.0; layout.mem_size()];
        fill_green_1dir_unbounded(
            &layout,
            [h, 0.0, 0.0],
            [0.0, kf, kf],
            [0.0; 3],
            [n as f64, 4.0, 4.0],
            &mut green,
            GreenKind::Hej2,
            eps,
        )
        .unwrap();
        // on the k = 0 line, far from the origin, the kernel approaches |z|/2
        let far = green[local_index(0, n - 1, 0, 0, 0, layout.nmem, 1)];
        let z = (n - 1) as f64 * h;
        assert!((far - 0.5 * z).abs() < 1e-12);
        // on a k != 0 line the regularized kernel matches the sharp one away
        // from the origin
        let id = local_index(0, n - 1, 1, 0, 0, layout.nmem, 1);
        let sharp = -(-kf * z).exp() / (2.0 * kf);
        assert!((green[id] - sharp).abs() < 1e-3 * sharp.abs());
    }
}
