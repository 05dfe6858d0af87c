//! Special functions for the Green's function evaluators
//!
//! Rational and Chebyshev approximations for the order-zero modified
//! Bessel function of the second kind and the exponential integral E1.
//!
//! References:
//!   - Abramowitz and Stegun, "Handbook of Mathematical Functions", 1964,
//!     §9.4 "Bessel functions"
//!   - Press et al., "Numerical Recipes", 3rd edition, 2007, §6.5.1

fn poly(coef: &[f64], x: f64) -> f64 {
    let mut ans = coef[coef.len() - 1];
    for c in coef.iter().rev().skip(1) {
        ans = ans * x + c;
    }
    ans
}

const C_K0PI: [f64; 5] = [
    1.0,
    2.346487949187396e-1,
    1.187082088663404e-2,
    2.150707366040937e-4,
    1.425433617130587e-6,
];
const C_K0QI: [f64; 3] = [9.847324170755358e-1, 1.518396076767770e-2, 8.362215678646257e-5];
const C_K0P: [f64; 5] = [
    1.159315156584126e-1,
    2.770731240515333e-1,
    2.066458134619875e-2,
    4.574734709978264e-4,
    3.454715527986737e-6,
];
const C_K0Q: [f64; 3] = [9.836249671709183e-1, 1.627693622304549e-2, 9.809660603621949e-5];
const C_K0PP: [f64; 8] = [
    1.253314137315499,
    1.475731032429900e1,
    6.123767403223466e1,
    1.121012633939949e2,
    9.285288485892228e1,
    3.198289277679660e1,
    3.595376024148513,
    6.160228690102976e-2,
];
const C_K0QQ: [f64; 8] = [
    1.0,
    1.189963006673403e1,
    5.027773590829784e1,
    9.496513373427093e1,
    8.318077493230258e1,
    3.181399777449301e1,
    4.443672926432041,
    1.408295601966600e-1,
];

/// Modified Bessel function of the second kind, order 0
pub fn bessel_k0(x: f64) -> f64 {
    if x <= 1.0 {
        let z = x * x;
        let term = poly(&C_K0PI, z) * x.ln() / poly(&C_K0QI, 1.0 - z);
        poly(&C_K0P, z) / poly(&C_K0Q, 1.0 - z) - term
    } else {
        let z = 1.0 / x;
        (-x).exp() * poly(&C_K0PP, z) / (poly(&C_K0QQ, z) * x.sqrt())
    }
}

const E1_SMALL: [f64; 23] = [
    7.8737715392882774,
    -8.0314874286705335,
    3.8797325768522250,
    -1.6042971072992259,
    0.5630905453891458,
    -0.1704423017433357,
    0.0452099390015415,
    -0.0106538986439085,
    0.0022562638123478,
    -0.0004335700473221,
    0.0000762166811878,
    -0.0000123417443064,
    0.0000018519745698,
    -0.0000002588698662,
    0.0000000338604319,
    -0.0000000041611418,
    0.0000000004821606,
    -0.0000000000528465,
    0.0000000000054945,
    -0.0000000000005433,
    0.0000000000000512,
    -0.0000000000000046,
    0.0000000000000004,
];

const E1_LARGE: [f64; 23] = [
    0.2155283776715125,
    0.1028106215227030,
    -0.0045526707131788,
    0.0003571613122851,
    -0.0000379341616932,
    0.0000049143944914,
    -0.0000007355024922,
    0.0000001230603606,
    -0.0000000225236907,
    0.0000000044412375,
    -0.0000000009328509,
    0.0000000002069297,
    -0.0000000000481502,
    0.0000000000116891,
    -0.0000000000029474,
    0.0000000000007691,
    -0.0000000000002070,
    0.0000000000000573,
    -0.0000000000000163,
    0.0000000000000047,
    -0.0000000000000014,
    0.0000000000000004,
    -0.0000000000000001,
];

/// Exponential integral E1 for positive arguments
pub fn expint_e1(x: f64) -> f64 {
    if x <= 4.0 {
        // Chebyshev expansion in x/4
        let t = 2.0 * (0.25 * x);
        let mut b2 = 0.0;
        let mut b1 = 0.0;
        let mut b0 = E1_SMALL[E1_SMALL.len() - 1];
        for c in E1_SMALL.iter().rev().skip(1) {
            b2 = b1;
            b1 = b0;
            b0 = t * b1 - b2 + c;
        }
        let value = 0.5 * (b0 - b2) + x.abs().ln();
        -value
    } else {
        // Chebyshev expansion in 4/x, scaled by exp(-x)
        let t = 2.0 * (2.0 * (4.0 / x) - 1.0);
        let mut b2 = 0.0;
        let mut b1 = 0.0;
        let mut b0 = E1_LARGE[E1_LARGE.len() - 1];
        for c in E1_LARGE.iter().rev().skip(1) {
            b2 = b1;
            b1 = b0;
            b0 = t * b1 - b2 + c;
        }
        0.5 * (b0 - b2) * (-x).exp()
    }
}

/// `exp(a) * erfc(x)`, stable when `x` is large enough that `erfc`
/// underflows before the exponentials cancel
pub fn exp_erfc(a: f64, x: f64) -> f64 {
    if x < 25.0 {
        a.exp() * statrs::function::erf::erfc(x)
    } else {
        (a - x * x).exp() / (x * std::f64::consts::PI.sqrt())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn k0_reference_values() {
        // Abramowitz & Stegun table 9.8
        assert!((bessel_k0(1.0) - 0.421_024_438_24).abs() < 1e-9);
        assert!((bessel_k0(2.0) - 0.113_893_872_75).abs() < 1e-9);
        assert!((bessel_k0(0.1) - 2.427_069_024_7).abs() < 1e-8);
    }

    #[test]
    fn e1_reference_values() {
        // E1(1) = 0.219383934..., E1(0.5) = 0.559773595...
        assert!((expint_e1(1.0) - 0.219_383_934_4).abs() < 1e-8);
        assert!((expint_e1(0.5) - 0.559_773_594_8).abs() < 1e-8);
        assert!((expint_e1(5.0) - 0.001_148_295_6).abs() < 1e-8);
    }

    #[test]
    fn e1_matches_series_near_zero() {
        // E1(x) = -gamma - ln x + x - x^2/4 ... for small x
        let gamma = 0.577_215_664_901_532_9;
        let x: f64 = 1e-3;
        let series = -gamma - x.ln() + x - x * x / 4.0;
        assert!((expint_e1(x) - series).abs() < 1e-9);
    }

    #[test]
    fn exp_erfc_continuous_at_switch() {
        let lo = exp_erfc(600.0, 24.999);
        let hi = exp_erfc(600.0, 25.001);
        assert!((lo - hi).abs() / lo.abs() < 1e-2);
    }
}
