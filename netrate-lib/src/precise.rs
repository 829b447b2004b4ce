//! Double-double arithmetic.
//!
//! A [`Real`] is the unevaluated sum `hi + lo` of two `f64`s with
//! `|lo| <= ulp(hi) / 2`, giving roughly 32 significant decimal digits.
//! Window boundaries, the reference time and the cascade's sums of powers are
//! kept in this form: at 1 MHz a run of a few hours needs more than 10^10
//! windows, far past the point where `ref + k * t` drifts in plain `f64`.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Real {
    hi: f64,
    lo: f64,
}

/// `a + b` exactly, as a rounded sum and its error.
#[inline]
fn two_sum(a: f64, b: f64) -> (f64, f64) {
    let s = a + b;
    let bb = s - a;
    let err = (a - (s - bb)) + (b - bb);
    (s, err)
}

/// Same as [`two_sum`] but requires `|a| >= |b|`.
#[inline]
fn quick_two_sum(a: f64, b: f64) -> (f64, f64) {
    let s = a + b;
    let err = b - (s - a);
    (s, err)
}

/// `a * b` exactly, as a rounded product and its error.
#[inline]
fn two_prod(a: f64, b: f64) -> (f64, f64) {
    let p = a * b;
    let err = a.mul_add(b, -p);
    (p, err)
}

impl Real {
    pub const ZERO: Real = Real { hi: 0.0, lo: 0.0 };
    pub const ONE: Real = Real { hi: 1.0, lo: 0.0 };

    pub const fn from_f64(value: f64) -> Self {
        Real { hi: value, lo: 0.0 }
    }

    /// Exact for every `u64`, including values above 2^53.
    pub fn from_u64(value: u64) -> Self {
        let hi = value as f64;
        let lo = (i128::from(value) - hi as i128) as f64;
        let (hi, lo) = quick_two_sum(hi, lo);
        Real { hi, lo }
    }

    pub fn from_i64(value: i64) -> Self {
        let hi = value as f64;
        let lo = (i128::from(value) - hi as i128) as f64;
        let (hi, lo) = quick_two_sum(hi, lo);
        Real { hi, lo }
    }

    /// Seconds plus nanoseconds, the layout capture timestamps arrive in.
    pub fn from_parts(secs: i64, nanos: u32) -> Self {
        Real::from_i64(secs) + Real::from_u64(u64::from(nanos)) / Real::from_f64(1e9)
    }

    pub fn to_f64(self) -> f64 {
        self.hi + self.lo
    }

    pub fn hi(self) -> f64 {
        self.hi
    }

    pub fn lo(self) -> f64 {
        self.lo
    }

    pub fn is_zero(self) -> bool {
        self.hi == 0.0
    }

    pub fn is_sign_negative(self) -> bool {
        self.hi < 0.0
    }

    pub fn is_finite(self) -> bool {
        self.hi.is_finite()
    }

    pub fn abs(self) -> Self {
        if self.hi < 0.0 { -self } else { self }
    }

    pub fn floor(self) -> Self {
        let hi = self.hi.floor();
        if hi == self.hi {
            let (hi, lo) = quick_two_sum(hi, self.lo.floor());
            Real { hi, lo }
        } else {
            Real { hi, lo: 0.0 }
        }
    }

    /// `self^n` by square-and-multiply.
    pub fn powi(self, n: u32) -> Self {
        let mut result = Real::ONE;
        let mut base = self;
        let mut exp = n;
        while exp > 0 {
            if exp & 1 == 1 {
                result = result * base;
            }
            base = base * base;
            exp >>= 1;
        }
        result
    }

    pub fn max(self, other: Self) -> Self {
        if other > self { other } else { self }
    }

    pub fn min(self, other: Self) -> Self {
        if other < self { other } else { self }
    }
}

impl From<f64> for Real {
    fn from(value: f64) -> Self {
        Real::from_f64(value)
    }
}

impl From<u64> for Real {
    fn from(value: u64) -> Self {
        Real::from_u64(value)
    }
}

impl From<u32> for Real {
    fn from(value: u32) -> Self {
        Real::from_f64(f64::from(value))
    }
}

impl From<i64> for Real {
    fn from(value: i64) -> Self {
        Real::from_i64(value)
    }
}

impl PartialOrd for Real {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match self.hi.partial_cmp(&other.hi)? {
            Ordering::Equal => self.lo.partial_cmp(&other.lo),
            ord => Some(ord),
        }
    }
}

impl Neg for Real {
    type Output = Real;

    fn neg(self) -> Real {
        Real { hi: -self.hi, lo: -self.lo }
    }
}

impl Add for Real {
    type Output = Real;

    fn add(self, rhs: Real) -> Real {
        let (s, e) = two_sum(self.hi, rhs.hi);
        let (t, f) = two_sum(self.lo, rhs.lo);
        let (s, e) = quick_two_sum(s, e + t);
        let (hi, lo) = quick_two_sum(s, e + f);
        Real { hi, lo }
    }
}

impl Sub for Real {
    type Output = Real;

    fn sub(self, rhs: Real) -> Real {
        self + (-rhs)
    }
}

impl Mul for Real {
    type Output = Real;

    fn mul(self, rhs: Real) -> Real {
        let (p, e) = two_prod(self.hi, rhs.hi);
        let e = e + (self.hi * rhs.lo + self.lo * rhs.hi);
        let (hi, lo) = quick_two_sum(p, e);
        Real { hi, lo }
    }
}

impl Div for Real {
    type Output = Real;

    fn div(self, rhs: Real) -> Real {
        let q1 = self.hi / rhs.hi;
        if !q1.is_finite() {
            return Real::from_f64(q1);
        }
        let r = self - rhs * Real::from_f64(q1);
        let q2 = r.hi / rhs.hi;
        let r = r - rhs * Real::from_f64(q2);
        let q3 = r.hi / rhs.hi;
        let (hi, lo) = quick_two_sum(q1, q2);
        Real { hi, lo } + Real::from_f64(q3)
    }
}

impl AddAssign for Real {
    fn add_assign(&mut self, rhs: Real) {
        *self = *self + rhs;
    }
}

impl SubAssign for Real {
    fn sub_assign(&mut self, rhs: Real) {
        *self = *self - rhs;
    }
}

impl fmt::Display for Real {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match f.precision() {
            Some(p) => write!(f, "{:.*}", p, self.to_f64()),
            None => write!(f, "{}", self.to_f64()),
        }
    }
}
