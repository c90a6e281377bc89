//! Per-unit complex arithmetic for symmetric and asymmetric calculations.
//!
//! The engine runs every algorithm twice: once on single-phase equivalents
//! (scalars) and once on three-phase quantities (3-vectors and 3×3 tensors).
//! The [`Symmetry`] trait is the seam between the two: solvers are generic
//! over it, and the two instantiations [`Sym`] and [`Asym`] supply the
//! concrete value types plus the handful of operations that cannot be
//! expressed through operator bounds (matrix products, outer products,
//! diagonal updates, phase rotations).
//!
//! Asymmetric quantities are in phase coordinates. Sequence values convert
//! to phase tensors through the symmetrical-components matrix
//! `A = [[1,1,1],[1,a²,a],[1,a,a²]]` with `a = exp(j·120°)`; a balanced
//! sequence pair `(y1, y0)` becomes the phase tensor with diagonal
//! `(2·y1 + y0)/3` and off-diagonal `(y0 − y1)/3` (see
//! [`Asym::tensor_balanced`]).

use std::fmt::Debug;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};

use num_complex::Complex64;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// 30 degrees in radians, one transformer clock step.
pub const DEG_30: f64 = std::f64::consts::FRAC_PI_6;

/// 120 degrees in radians, the phase spacing of a three-phase system.
pub const DEG_120: f64 = 2.0 * std::f64::consts::FRAC_PI_3;

/// `sqrt(3)`
pub const SQRT3: f64 = 1.732_050_807_568_877_2;

/// The rotation operator `a = exp(j·120°)`.
pub const A: Complex64 = Complex64::new(-0.5, 0.866_025_403_784_438_6);

/// `a² = exp(-j·120°)`.
pub const A2: Complex64 = Complex64::new(-0.5, -0.866_025_403_784_438_6);

/// The symmetry mode of a calculation.
///
/// Associated types carry the arithmetic each mode works in; the methods are
/// the structure-dependent operations shared by all solvers. Block sizes of
/// the sparse matrices follow `BLOCK_SIZE` (1 or 3).
pub trait Symmetry: Copy + Clone + Debug + Default + PartialEq + Send + Sync + 'static {
    const BLOCK_SIZE: usize;

    type RealValue: Copy
        + Clone
        + Debug
        + Default
        + Send
        + Sync
        + Serialize
        + DeserializeOwned
        + Add<Output = Self::RealValue>
        + Sub<Output = Self::RealValue>
        + Mul<Output = Self::RealValue>
        + Div<Output = Self::RealValue>
        + Neg<Output = Self::RealValue>
        + AddAssign
        + SubAssign
        + Mul<f64, Output = Self::RealValue>
        + Div<f64, Output = Self::RealValue>;

    type ComplexValue: Copy
        + Clone
        + Debug
        + Default
        + Send
        + Sync
        + Serialize
        + DeserializeOwned
        + Add<Output = Self::ComplexValue>
        + Sub<Output = Self::ComplexValue>
        + Mul<Output = Self::ComplexValue>
        + Div<Output = Self::ComplexValue>
        + Neg<Output = Self::ComplexValue>
        + AddAssign
        + SubAssign
        + Mul<f64, Output = Self::ComplexValue>
        + Div<f64, Output = Self::ComplexValue>
        + Mul<Complex64, Output = Self::ComplexValue>;

    type RealTensor: Copy
        + Clone
        + Debug
        + Default
        + Send
        + Sync
        + Add<Output = Self::RealTensor>
        + Sub<Output = Self::RealTensor>
        + Mul<Output = Self::RealTensor>
        + Neg<Output = Self::RealTensor>
        + AddAssign
        + SubAssign;

    type ComplexTensor: Copy
        + Clone
        + Debug
        + Default
        + Send
        + Sync
        + Serialize
        + DeserializeOwned
        + Add<Output = Self::ComplexTensor>
        + Sub<Output = Self::ComplexTensor>
        + Neg<Output = Self::ComplexTensor>
        + AddAssign
        + SubAssign
        + Mul<f64, Output = Self::ComplexTensor>
        + Div<f64, Output = Self::ComplexTensor>;

    // constructors

    /// Uniform real value across all phases.
    fn real_uniform(x: f64) -> Self::RealValue;
    /// Balanced phasor set from a single phasor: `[x, x·a², x·a]`.
    fn complex_rotated(x: Complex64) -> Self::ComplexValue;
    /// The same value repeated on every phase, without rotation.
    fn complex_uniform(x: Complex64) -> Self::ComplexValue;
    /// Diagonal tensor with `x` on the diagonal.
    fn tensor_diag(x: Complex64) -> Self::ComplexTensor;
    /// Tensor with `s` on the diagonal and `m` everywhere off-diagonal.
    ///
    /// This is the phase image of a balanced sequence pair; for the
    /// symmetric mode the off-diagonal part has nowhere to go and `m` must
    /// be irrelevant to the caller (it is ignored).
    fn tensor_balanced(s: Complex64, m: Complex64) -> Self::ComplexTensor;
    /// Phase tensor of a component described by positive- and zero-sequence
    /// admittances.
    ///
    /// Symmetric mode only sees the positive sequence; asymmetric mode gets
    /// the balanced tensor with diagonal `(2·y1 + y0)/3` and off-diagonal
    /// `(y0 − y1)/3`.
    fn tensor_from_sequence(y1: Complex64, y0: Complex64) -> Self::ComplexTensor;
    /// Phase tensor from all three sequence admittances (zero, positive,
    /// negative), for components whose negative sequence differs from the
    /// positive one (phase-shifting transformers).
    fn tensor_from_sequences012(y0: Complex64, y1: Complex64, y2: Complex64)
        -> Self::ComplexTensor;
    /// Build a real value element-wise.
    fn real_from_fn(f: impl FnMut(usize) -> f64) -> Self::RealValue;
    /// Build a complex value element-wise.
    fn complex_from_fn(f: impl FnMut(usize) -> Complex64) -> Self::ComplexValue;
    /// Build a complex tensor element-wise (row, column).
    fn tensor_from_fn(f: impl FnMut(usize, usize) -> Complex64) -> Self::ComplexTensor;

    // element access

    fn real_get(x: &Self::RealValue, i: usize) -> f64;
    fn complex_get(x: &Self::ComplexValue, i: usize) -> Complex64;
    fn real_tensor_get(x: &Self::RealTensor, i: usize, j: usize) -> f64;
    fn complex_tensor_get(x: &Self::ComplexTensor, i: usize, j: usize) -> Complex64;

    // value operations

    /// Element-wise magnitude.
    fn cabs(x: &Self::ComplexValue) -> Self::RealValue;
    /// Element-wise squared magnitude.
    fn abs2(x: &Self::ComplexValue) -> Self::RealValue;
    /// Element-wise argument.
    fn arg(x: &Self::ComplexValue) -> Self::RealValue;
    /// Element-wise complex conjugate.
    fn conj(x: &Self::ComplexValue) -> Self::ComplexValue;
    fn re(x: &Self::ComplexValue) -> Self::RealValue;
    fn im(x: &Self::ComplexValue) -> Self::RealValue;
    /// Compose a complex value from real and imaginary parts.
    fn complex(re: Self::RealValue, im: Self::RealValue) -> Self::ComplexValue;
    /// Element-wise `exp(j·theta)`.
    fn exp_j(theta: &Self::RealValue) -> Self::ComplexValue;
    /// Element-wise real scaling of a complex value.
    fn scale(x: &Self::ComplexValue, by: &Self::RealValue) -> Self::ComplexValue;
    /// Element-wise addition of a real value onto the real part.
    fn add_real(x: &Self::ComplexValue, r: &Self::RealValue) -> Self::ComplexValue;
    /// Maximum element of a real value.
    fn max_val(x: &Self::RealValue) -> f64;
    /// True if every element is NaN.
    fn all_nan(x: &Self::RealValue) -> bool;
    /// Phase-a component (the value itself in symmetric mode).
    fn phase_a(x: &Self::ComplexValue) -> Complex64;

    // tensor operations

    /// Matrix-vector product.
    fn dot(t: &Self::ComplexTensor, v: &Self::ComplexValue) -> Self::ComplexValue;
    /// Matrix-matrix product.
    fn dot_tensor(a: &Self::ComplexTensor, b: &Self::ComplexTensor) -> Self::ComplexTensor;
    /// Conjugate (hermitian) transpose.
    fn hermitian_transpose(t: &Self::ComplexTensor) -> Self::ComplexTensor;
    fn tensor_re(t: &Self::ComplexTensor) -> Self::RealTensor;
    fn tensor_im(t: &Self::ComplexTensor) -> Self::RealTensor;
    /// Outer product of two real values.
    fn vector_outer_product(x: &Self::RealValue, y: &Self::RealValue) -> Self::RealTensor;
    /// Row sums of a real tensor.
    fn sum_row(t: &Self::RealTensor) -> Self::RealValue;
    /// Add a real value onto the diagonal of a real tensor.
    fn add_diag(t: &mut Self::RealTensor, v: &Self::RealValue);
    /// Add a complex value onto the diagonal of a complex tensor.
    fn add_diag_complex(t: &mut Self::ComplexTensor, v: &Self::ComplexValue);
}

/// Symmetric calculation: scalar per-unit quantities, block size 1.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sym;

/// Asymmetric calculation: three-phase quantities, block size 3.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asym;

impl Symmetry for Sym {
    const BLOCK_SIZE: usize = 1;

    type RealValue = f64;
    type ComplexValue = Complex64;
    type RealTensor = f64;
    type ComplexTensor = Complex64;

    fn real_uniform(x: f64) -> f64 {
        x
    }
    fn complex_rotated(x: Complex64) -> Complex64 {
        x
    }
    fn complex_uniform(x: Complex64) -> Complex64 {
        x
    }
    fn tensor_diag(x: Complex64) -> Complex64 {
        x
    }
    fn tensor_balanced(s: Complex64, _m: Complex64) -> Complex64 {
        s
    }
    fn tensor_from_sequence(y1: Complex64, _y0: Complex64) -> Complex64 {
        y1
    }
    fn tensor_from_sequences012(_y0: Complex64, y1: Complex64, _y2: Complex64) -> Complex64 {
        y1
    }
    fn real_from_fn(mut f: impl FnMut(usize) -> f64) -> f64 {
        f(0)
    }
    fn complex_from_fn(mut f: impl FnMut(usize) -> Complex64) -> Complex64 {
        f(0)
    }
    fn tensor_from_fn(mut f: impl FnMut(usize, usize) -> Complex64) -> Complex64 {
        f(0, 0)
    }

    fn real_get(x: &f64, _i: usize) -> f64 {
        *x
    }
    fn complex_get(x: &Complex64, _i: usize) -> Complex64 {
        *x
    }
    fn real_tensor_get(x: &f64, _i: usize, _j: usize) -> f64 {
        *x
    }
    fn complex_tensor_get(x: &Complex64, _i: usize, _j: usize) -> Complex64 {
        *x
    }

    fn cabs(x: &Complex64) -> f64 {
        x.norm()
    }
    fn abs2(x: &Complex64) -> f64 {
        x.norm_sqr()
    }
    fn arg(x: &Complex64) -> f64 {
        x.arg()
    }
    fn conj(x: &Complex64) -> Complex64 {
        x.conj()
    }
    fn re(x: &Complex64) -> f64 {
        x.re
    }
    fn im(x: &Complex64) -> f64 {
        x.im
    }
    fn complex(re: f64, im: f64) -> Complex64 {
        Complex64::new(re, im)
    }
    fn exp_j(theta: &f64) -> Complex64 {
        Complex64::from_polar(1.0, *theta)
    }
    fn scale(x: &Complex64, by: &f64) -> Complex64 {
        *x * *by
    }
    fn add_real(x: &Complex64, r: &f64) -> Complex64 {
        Complex64::new(x.re + r, x.im)
    }
    fn max_val(x: &f64) -> f64 {
        *x
    }
    fn all_nan(x: &f64) -> bool {
        x.is_nan()
    }
    fn phase_a(x: &Complex64) -> Complex64 {
        *x
    }

    fn dot(t: &Complex64, v: &Complex64) -> Complex64 {
        *t * *v
    }
    fn dot_tensor(a: &Complex64, b: &Complex64) -> Complex64 {
        *a * *b
    }
    fn hermitian_transpose(t: &Complex64) -> Complex64 {
        t.conj()
    }
    fn tensor_re(t: &Complex64) -> f64 {
        t.re
    }
    fn tensor_im(t: &Complex64) -> f64 {
        t.im
    }
    fn vector_outer_product(x: &f64, y: &f64) -> f64 {
        *x * *y
    }
    fn sum_row(t: &f64) -> f64 {
        *t
    }
    fn add_diag(t: &mut f64, v: &f64) {
        *t += *v;
    }
    fn add_diag_complex(t: &mut Complex64, v: &Complex64) {
        *t += *v;
    }
}

impl Symmetry for Asym {
    const BLOCK_SIZE: usize = 3;

    type RealValue = RealVec3;
    type ComplexValue = ComplexVec3;
    type RealTensor = RealTensor3;
    type ComplexTensor = ComplexTensor3;

    fn real_uniform(x: f64) -> RealVec3 {
        RealVec3([x, x, x])
    }
    fn complex_rotated(x: Complex64) -> ComplexVec3 {
        ComplexVec3([x, x * A2, x * A])
    }
    fn complex_uniform(x: Complex64) -> ComplexVec3 {
        ComplexVec3([x, x, x])
    }
    fn tensor_diag(x: Complex64) -> ComplexTensor3 {
        ComplexTensor3::diag(x)
    }
    fn tensor_balanced(s: Complex64, m: Complex64) -> ComplexTensor3 {
        ComplexTensor3::balanced(s, m)
    }
    fn tensor_from_sequence(y1: Complex64, y0: Complex64) -> ComplexTensor3 {
        ComplexTensor3::balanced((2.0 * y1 + y0) / 3.0, (y0 - y1) / 3.0)
    }
    fn tensor_from_sequences012(y0: Complex64, y1: Complex64, y2: Complex64) -> ComplexTensor3 {
        // Yabc = A · diag(y0, y1, y2) · A⁻¹
        let diag = ComplexTensor3([
            [y0, Complex64::new(0.0, 0.0), Complex64::new(0.0, 0.0)],
            [Complex64::new(0.0, 0.0), y1, Complex64::new(0.0, 0.0)],
            [Complex64::new(0.0, 0.0), Complex64::new(0.0, 0.0), y2],
        ]);
        Asym::dot_tensor(&Asym::dot_tensor(&sym_matrix(), &diag), &sym_matrix_inv())
    }
    fn real_from_fn(mut f: impl FnMut(usize) -> f64) -> RealVec3 {
        RealVec3([f(0), f(1), f(2)])
    }
    fn complex_from_fn(mut f: impl FnMut(usize) -> Complex64) -> ComplexVec3 {
        ComplexVec3([f(0), f(1), f(2)])
    }
    fn tensor_from_fn(mut f: impl FnMut(usize, usize) -> Complex64) -> ComplexTensor3 {
        ComplexTensor3(std::array::from_fn(|i| std::array::from_fn(|j| f(i, j))))
    }

    fn real_get(x: &RealVec3, i: usize) -> f64 {
        x.0[i]
    }
    fn complex_get(x: &ComplexVec3, i: usize) -> Complex64 {
        x.0[i]
    }
    fn real_tensor_get(x: &RealTensor3, i: usize, j: usize) -> f64 {
        x.0[i][j]
    }
    fn complex_tensor_get(x: &ComplexTensor3, i: usize, j: usize) -> Complex64 {
        x.0[i][j]
    }

    fn cabs(x: &ComplexVec3) -> RealVec3 {
        RealVec3(x.0.map(|z| z.norm()))
    }
    fn abs2(x: &ComplexVec3) -> RealVec3 {
        RealVec3(x.0.map(|z| z.norm_sqr()))
    }
    fn arg(x: &ComplexVec3) -> RealVec3 {
        RealVec3(x.0.map(|z| z.arg()))
    }
    fn conj(x: &ComplexVec3) -> ComplexVec3 {
        ComplexVec3(x.0.map(|z| z.conj()))
    }
    fn re(x: &ComplexVec3) -> RealVec3 {
        RealVec3(x.0.map(|z| z.re))
    }
    fn im(x: &ComplexVec3) -> RealVec3 {
        RealVec3(x.0.map(|z| z.im))
    }
    fn complex(re: RealVec3, im: RealVec3) -> ComplexVec3 {
        ComplexVec3(std::array::from_fn(|i| Complex64::new(re.0[i], im.0[i])))
    }
    fn exp_j(theta: &RealVec3) -> ComplexVec3 {
        ComplexVec3(theta.0.map(|t| Complex64::from_polar(1.0, t)))
    }
    fn scale(x: &ComplexVec3, by: &RealVec3) -> ComplexVec3 {
        ComplexVec3(std::array::from_fn(|i| x.0[i] * by.0[i]))
    }
    fn add_real(x: &ComplexVec3, r: &RealVec3) -> ComplexVec3 {
        ComplexVec3(std::array::from_fn(|i| {
            Complex64::new(x.0[i].re + r.0[i], x.0[i].im)
        }))
    }
    fn max_val(x: &RealVec3) -> f64 {
        x.0.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }
    fn all_nan(x: &RealVec3) -> bool {
        x.0.iter().all(|v| v.is_nan())
    }
    fn phase_a(x: &ComplexVec3) -> Complex64 {
        x.0[0]
    }

    fn dot(t: &ComplexTensor3, v: &ComplexVec3) -> ComplexVec3 {
        ComplexVec3(std::array::from_fn(|i| {
            t.0[i][0] * v.0[0] + t.0[i][1] * v.0[1] + t.0[i][2] * v.0[2]
        }))
    }
    fn dot_tensor(a: &ComplexTensor3, b: &ComplexTensor3) -> ComplexTensor3 {
        ComplexTensor3(std::array::from_fn(|i| {
            std::array::from_fn(|j| {
                a.0[i][0] * b.0[0][j] + a.0[i][1] * b.0[1][j] + a.0[i][2] * b.0[2][j]
            })
        }))
    }
    fn hermitian_transpose(t: &ComplexTensor3) -> ComplexTensor3 {
        ComplexTensor3(std::array::from_fn(|i| {
            std::array::from_fn(|j| t.0[j][i].conj())
        }))
    }
    fn tensor_re(t: &ComplexTensor3) -> RealTensor3 {
        RealTensor3(t.0.map(|row| row.map(|z| z.re)))
    }
    fn tensor_im(t: &ComplexTensor3) -> RealTensor3 {
        RealTensor3(t.0.map(|row| row.map(|z| z.im)))
    }
    fn vector_outer_product(x: &RealVec3, y: &RealVec3) -> RealTensor3 {
        RealTensor3(std::array::from_fn(|i| std::array::from_fn(|j| x.0[i] * y.0[j])))
    }
    fn sum_row(t: &RealTensor3) -> RealVec3 {
        RealVec3(std::array::from_fn(|i| t.0[i][0] + t.0[i][1] + t.0[i][2]))
    }
    fn add_diag(t: &mut RealTensor3, v: &RealVec3) {
        for i in 0..3 {
            t.0[i][i] += v.0[i];
        }
    }
    fn add_diag_complex(t: &mut ComplexTensor3, v: &ComplexVec3) {
        for i in 0..3 {
            t.0[i][i] += v.0[i];
        }
    }
}

/// Per-phase real quantity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RealVec3(pub [f64; 3]);

/// Per-phase complex phasor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComplexVec3(pub [Complex64; 3]);

/// 3×3 real tensor, row-major.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RealTensor3(pub [[f64; 3]; 3]);

/// 3×3 complex tensor, row-major.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComplexTensor3(pub [[Complex64; 3]; 3]);

impl Default for RealVec3 {
    fn default() -> Self {
        RealVec3([0.0; 3])
    }
}

impl Default for ComplexVec3 {
    fn default() -> Self {
        ComplexVec3([Complex64::new(0.0, 0.0); 3])
    }
}

impl Default for RealTensor3 {
    fn default() -> Self {
        RealTensor3([[0.0; 3]; 3])
    }
}

impl Default for ComplexTensor3 {
    fn default() -> Self {
        ComplexTensor3([[Complex64::new(0.0, 0.0); 3]; 3])
    }
}

impl ComplexTensor3 {
    /// Diagonal tensor.
    pub fn diag(x: Complex64) -> Self {
        let zero = Complex64::new(0.0, 0.0);
        ComplexTensor3([[x, zero, zero], [zero, x, zero], [zero, zero, x]])
    }

    /// Tensor with `s` on the diagonal and `m` everywhere else.
    pub fn balanced(s: Complex64, m: Complex64) -> Self {
        ComplexTensor3([[s, m, m], [m, s, m], [m, m, s]])
    }
}

/// The symmetrical-components matrix `A = [[1,1,1],[1,a²,a],[1,a,a²]]`.
pub fn sym_matrix() -> ComplexTensor3 {
    let one = Complex64::new(1.0, 0.0);
    ComplexTensor3([[one, one, one], [one, A2, A], [one, A, A2]])
}

/// Inverse of the symmetrical-components matrix, `A⁻¹ = Aᴴ/3`.
pub fn sym_matrix_inv() -> ComplexTensor3 {
    let third = Complex64::new(1.0 / 3.0, 0.0);
    let one = Complex64::new(1.0, 0.0);
    ComplexTensor3([
        [one * third, one * third, one * third],
        [one * third, A * third, A2 * third],
        [one * third, A2 * third, A * third],
    ])
}

macro_rules! elementwise_value_ops {
    ($name:ident) => {
        impl Add for $name {
            type Output = Self;
            fn add(self, rhs: Self) -> Self {
                $name(std::array::from_fn(|i| self.0[i] + rhs.0[i]))
            }
        }
        impl Sub for $name {
            type Output = Self;
            fn sub(self, rhs: Self) -> Self {
                $name(std::array::from_fn(|i| self.0[i] - rhs.0[i]))
            }
        }
        impl Mul for $name {
            type Output = Self;
            fn mul(self, rhs: Self) -> Self {
                $name(std::array::from_fn(|i| self.0[i] * rhs.0[i]))
            }
        }
        impl Div for $name {
            type Output = Self;
            fn div(self, rhs: Self) -> Self {
                $name(std::array::from_fn(|i| self.0[i] / rhs.0[i]))
            }
        }
        impl Neg for $name {
            type Output = Self;
            fn neg(self) -> Self {
                $name(self.0.map(|v| -v))
            }
        }
        impl AddAssign for $name {
            fn add_assign(&mut self, rhs: Self) {
                for i in 0..3 {
                    self.0[i] += rhs.0[i];
                }
            }
        }
        impl SubAssign for $name {
            fn sub_assign(&mut self, rhs: Self) {
                for i in 0..3 {
                    self.0[i] -= rhs.0[i];
                }
            }
        }
        impl Mul<f64> for $name {
            type Output = Self;
            fn mul(self, rhs: f64) -> Self {
                $name(self.0.map(|v| v * rhs))
            }
        }
        impl Div<f64> for $name {
            type Output = Self;
            fn div(self, rhs: f64) -> Self {
                $name(self.0.map(|v| v / rhs))
            }
        }
    };
}

elementwise_value_ops!(RealVec3);
elementwise_value_ops!(ComplexVec3);

impl Mul<Complex64> for ComplexVec3 {
    type Output = Self;
    fn mul(self, rhs: Complex64) -> Self {
        ComplexVec3(self.0.map(|v| v * rhs))
    }
}

macro_rules! elementwise_tensor_ops {
    ($name:ident) => {
        impl Add for $name {
            type Output = Self;
            fn add(self, rhs: Self) -> Self {
                $name(std::array::from_fn(|i| {
                    std::array::from_fn(|j| self.0[i][j] + rhs.0[i][j])
                }))
            }
        }
        impl Sub for $name {
            type Output = Self;
            fn sub(self, rhs: Self) -> Self {
                $name(std::array::from_fn(|i| {
                    std::array::from_fn(|j| self.0[i][j] - rhs.0[i][j])
                }))
            }
        }
        impl Neg for $name {
            type Output = Self;
            fn neg(self) -> Self {
                $name(self.0.map(|row| row.map(|v| -v)))
            }
        }
        impl AddAssign for $name {
            fn add_assign(&mut self, rhs: Self) {
                for i in 0..3 {
                    for j in 0..3 {
                        self.0[i][j] += rhs.0[i][j];
                    }
                }
            }
        }
        impl SubAssign for $name {
            fn sub_assign(&mut self, rhs: Self) {
                for i in 0..3 {
                    for j in 0..3 {
                        self.0[i][j] -= rhs.0[i][j];
                    }
                }
            }
        }
        impl Mul<f64> for $name {
            type Output = Self;
            fn mul(self, rhs: f64) -> Self {
                $name(self.0.map(|row| row.map(|v| v * rhs)))
            }
        }
        impl Div<f64> for $name {
            type Output = Self;
            fn div(self, rhs: f64) -> Self {
                $name(self.0.map(|row| row.map(|v| v / rhs)))
            }
        }
    };
}

elementwise_tensor_ops!(RealTensor3);
elementwise_tensor_ops!(ComplexTensor3);

// element-wise product, matching the solvers' use of `G .* s_ij`
impl Mul for RealTensor3 {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        RealTensor3(std::array::from_fn(|i| {
            std::array::from_fn(|j| self.0[i][j] * rhs.0[i][j])
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Complex64, b: Complex64) -> bool {
        (a - b).norm() < 1e-12
    }

    #[test]
    fn rotation_operator_is_cubic_root_of_unity() {
        let one = Complex64::new(1.0, 0.0);
        assert!(close(A * A * A, one));
        assert!(close(A * A, A2));
        assert!(close(A + A2 + one, Complex64::new(0.0, 0.0)));
    }

    #[test]
    fn sym_matrix_inverse_is_inverse() {
        let a = sym_matrix();
        let a_inv = sym_matrix_inv();
        let product = Asym::dot_tensor(&a, &a_inv);
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!(close(product.0[i][j], Complex64::new(expected, 0.0)));
            }
        }
    }

    #[test]
    fn rotated_value_is_balanced() {
        let u = Asym::complex_rotated(Complex64::new(1.0, 0.0));
        // a balanced set sums to zero
        let sum = u.0[0] + u.0[1] + u.0[2];
        assert!(sum.norm() < 1e-12);
        // and phases are 120 degrees apart going a, c, b
        assert!(close(u.0[1], A2));
        assert!(close(u.0[2], A));
    }

    #[test]
    fn balanced_tensor_from_sequence_values() {
        // y1 = y0 gives a purely diagonal tensor
        let y = Complex64::new(2.0, -1.0);
        let t = Asym::tensor_balanced((2.0 * y + y) / 3.0, (y - y) / 3.0);
        assert!(close(t.0[0][0], y));
        assert!(close(t.0[0][1], Complex64::new(0.0, 0.0)));
    }

    #[test]
    fn hermitian_transpose_conjugates_and_flips() {
        let t = Asym::tensor_from_fn(|i, j| Complex64::new(i as f64, j as f64));
        let h = Asym::hermitian_transpose(&t);
        for i in 0..3 {
            for j in 0..3 {
                assert!(close(h.0[i][j], t.0[j][i].conj()));
            }
        }
    }

    #[test]
    fn outer_product_and_row_sum() {
        let x = RealVec3([1.0, 2.0, 3.0]);
        let y = RealVec3([4.0, 5.0, 6.0]);
        let t = Asym::vector_outer_product(&x, &y);
        assert_eq!(t.0[1][2], 12.0);
        let rows = Asym::sum_row(&t);
        assert_eq!(rows.0[0], 15.0);
        assert_eq!(rows.0[2], 45.0);
    }

    #[test]
    fn sym_mode_is_plain_complex_arithmetic() {
        let y = Complex64::new(3.0, -4.0);
        let u = Complex64::new(1.0, 0.1);
        assert!(close(Sym::dot(&y, &u), y * u));
        assert_eq!(Sym::max_val(&2.5), 2.5);
        assert_eq!(Sym::cabs(&Complex64::new(3.0, 4.0)), 5.0);
    }

    #[test]
    fn scale_multiplies_per_phase() {
        let u = Asym::complex_uniform(Complex64::new(1.0, 1.0));
        let v = RealVec3([1.0, 2.0, 3.0]);
        let scaled = Asym::scale(&u, &v);
        assert!(close(scaled.0[2], Complex64::new(3.0, 3.0)));
    }

    #[test]
    fn nan_detection_needs_all_phases() {
        let partial = RealVec3([f64::NAN, 1.0, f64::NAN]);
        assert!(!Asym::all_nan(&partial));
        let full = RealVec3([f64::NAN; 3]);
        assert!(Asym::all_nan(&full));
        assert!(Sym::all_nan(&f64::NAN));
    }
}
