//! Physical component tables and their per-unit calculation parameters.
//!
//! Components live in parallel typed arrays, one per component class, with
//! externally assigned opaque ids. Each row knows how to convert its SI
//! attributes into the per-unit admittance blocks the solvers consume.
//!
//! All conversions use the 1 MVA three-phase power base; impedance and
//! admittance bases derive from the rated voltage of the node a component
//! sits on.

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use gridflow_core::phasor::DEG_30;
use gridflow_core::{
    BranchSide, Id, IntS, MeasuredTerminalType, PowerGridError, Result, Symmetry, WindingType,
};
use gridflow_math::types::{BranchCalcParam, SensorCalcParam, SourceCalcParam};

/// Three-phase power base, 1 MVA.
pub const BASE_POWER_3P: f64 = 1e6;
/// Single-phase power base.
pub const BASE_POWER_1P: f64 = BASE_POWER_3P / 3.0;
/// Default source short-circuit power, 10 GVA.
pub const DEFAULT_SOURCE_SK: f64 = 1e10;
pub const DEFAULT_SOURCE_RX_RATIO: f64 = 0.1;
pub const DEFAULT_SOURCE_Z01_RATIO: f64 = 1.0;
/// Links are ideal connections; numerically they carry the admittance of
/// 1 MS in a 10 kV network.
pub const G_LINK: f64 = 1e6 / (BASE_POWER_3P / 10e3 / 10e3);

const SQRT3: f64 = gridflow_core::phasor::SQRT3;

fn nan_or(value: f64, fallback: f64) -> f64 {
    if value.is_nan() {
        fallback
    } else {
        value
    }
}

/// A network node with its rated line-to-line voltage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInput {
    pub id: Id,
    pub u_rated: f64,
}

/// A transmission line or cable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineInput {
    pub id: Id,
    pub from_node: Id,
    pub to_node: Id,
    pub from_status: IntS,
    pub to_status: IntS,
    pub r1: f64,
    pub x1: f64,
    pub c1: f64,
    pub tan1: f64,
    pub r0: f64,
    pub x0: f64,
    pub c0: f64,
    pub tan0: f64,
    /// Rated current, for loading output; NaN when unknown.
    pub i_n: f64,
}

/// An ideal connection between two nodes of equal rated voltage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkInput {
    pub id: Id,
    pub from_node: Id,
    pub to_node: Id,
    pub from_status: IntS,
    pub to_status: IntS,
}

/// A two-winding transformer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformerInput {
    pub id: Id,
    pub from_node: Id,
    pub to_node: Id,
    pub from_status: IntS,
    pub to_status: IntS,
    /// Rated voltages of the two windings.
    pub u1: f64,
    pub u2: f64,
    /// Rated power.
    pub sn: f64,
    /// Relative short-circuit voltage.
    pub uk: f64,
    /// Short-circuit loss.
    pub pk: f64,
    /// Relative no-load current.
    pub i0: f64,
    /// No-load loss.
    pub p0: f64,
    pub winding_from: WindingType,
    pub winding_to: WindingType,
    /// Vector-group clock number, 30 degree steps.
    pub clock: IntS,
    pub tap_side: BranchSide,
    pub tap_pos: IntS,
    pub tap_min: IntS,
    pub tap_max: IntS,
    pub tap_nom: IntS,
    /// Voltage change per tap step.
    pub tap_size: f64,
    pub uk_min: f64,
    pub uk_max: f64,
    pub pk_min: f64,
    pub pk_max: f64,
    pub r_grounding_from: f64,
    pub x_grounding_from: f64,
    pub r_grounding_to: f64,
    pub x_grounding_to: f64,
}

/// A three-winding transformer; expands into three two-winding equivalents
/// around an internal star node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreeWindingTransformerInput {
    pub id: Id,
    pub node_1: Id,
    pub node_2: Id,
    pub node_3: Id,
    pub status_1: IntS,
    pub status_2: IntS,
    pub status_3: IntS,
    pub u1: f64,
    pub u2: f64,
    pub u3: f64,
    pub sn_1: f64,
    pub sn_2: f64,
    pub sn_3: f64,
    /// Pair short-circuit voltages, each on the base of the smaller of the
    /// two rated powers involved.
    pub uk_12: f64,
    pub uk_13: f64,
    pub uk_23: f64,
    pub pk_12: f64,
    pub pk_13: f64,
    pub pk_23: f64,
    pub i0: f64,
    pub p0: f64,
    pub winding_1: WindingType,
    pub winding_2: WindingType,
    pub winding_3: WindingType,
    pub clock_12: IntS,
    pub clock_13: IntS,
    pub tap_side: IntS,
    pub tap_pos: IntS,
    pub tap_min: IntS,
    pub tap_max: IntS,
    pub tap_nom: IntS,
    pub tap_size: f64,
    pub r_grounding_1: f64,
    pub x_grounding_1: f64,
    pub r_grounding_2: f64,
    pub x_grounding_2: f64,
    pub r_grounding_3: f64,
    pub x_grounding_3: f64,
}

/// A shunt admittance to ground.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShuntInput {
    pub id: Id,
    pub node: Id,
    pub status: IntS,
    pub g1: f64,
    pub b1: f64,
    pub g0: f64,
    pub b0: f64,
}

/// A voltage source behind its short-circuit impedance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceInput {
    pub id: Id,
    pub node: Id,
    pub status: IntS,
    /// Reference voltage, per unit.
    pub u_ref: f64,
    /// Short-circuit power; NaN for the 10 GVA default.
    pub sk: f64,
    pub rx_ratio: f64,
    pub z01_ratio: f64,
}

/// Whether a load/generator row consumes or produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplianceDirection {
    Load,
    Generator,
}

/// A load or generator, symmetric or per-phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadGenInput {
    pub id: Id,
    pub node: Id,
    pub status: IntS,
    pub direction: ApplianceDirection,
    pub load_gen_type: gridflow_core::LoadGenType,
    /// Per-phase specified power; a symmetric row carries the three-phase
    /// total in phase 0 with NaN elsewhere.
    pub p_specified: [f64; 3],
    pub q_specified: [f64; 3],
    pub is_asym: bool,
}

/// A voltage magnitude (and optionally angle) measurement on a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoltageSensorInput {
    pub id: Id,
    pub measured_object: Id,
    /// Standard deviation of the measurement, in volt.
    pub u_sigma: f64,
    pub u_measured: [f64; 3],
    /// NaN when the sensor cannot measure the angle.
    pub u_angle_measured: [f64; 3],
    pub is_asym: bool,
}

/// A power measurement on an appliance or branch side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerSensorInput {
    pub id: Id,
    pub measured_object: Id,
    pub measured_terminal_type: MeasuredTerminalType,
    /// Standard deviation of the measurement, in volt-ampere.
    pub power_sigma: f64,
    pub p_measured: [f64; 3],
    pub q_measured: [f64; 3],
    pub is_asym: bool,
}

/// `yff/yft/ytf/ytt` from series admittance, shunt admittance and a complex
/// tap ratio, with one-sided connection handled.
fn calc_param_y(
    from_status: bool,
    to_status: bool,
    y_series: Complex64,
    y_shunt: Complex64,
    tap_ratio: Complex64,
) -> [Complex64; 4] {
    let zero = Complex64::new(0.0, 0.0);
    let tap2 = tap_ratio.norm_sqr();
    if from_status && to_status {
        [
            (y_series + 0.5 * y_shunt) / tap2,
            -y_series / tap_ratio.conj(),
            -y_series / tap_ratio,
            y_series + 0.5 * y_shunt,
        ]
    } else if from_status {
        [one_side_admittance(y_series, y_shunt) / tap2, zero, zero, zero]
    } else if to_status {
        [zero, zero, zero, one_side_admittance(y_series, y_shunt)]
    } else {
        [zero; 4]
    }
}

/// Admittance seen from the connected side of a dangling branch: the half
/// shunt plus the series impedance in series with the other half shunt.
fn one_side_admittance(y_series: Complex64, y_shunt: Complex64) -> Complex64 {
    if y_shunt.norm_sqr() == 0.0 {
        Complex64::new(0.0, 0.0)
    } else {
        0.5 * y_shunt + 1.0 / (1.0 / y_series + 2.0 / y_shunt)
    }
}

impl LineInput {
    pub fn connected(&self) -> [bool; 2] {
        [self.from_status != 0, self.to_status != 0]
    }

    /// Admittance blocks in per unit on the rated voltage of the from node.
    pub fn calc_param<S: Symmetry>(&self, u_rated: f64) -> BranchCalcParam<S> {
        let base_y = BASE_POWER_3P / (u_rated * u_rated);
        let sequence = |r: f64, x: f64, c: f64, tan: f64| {
            let y_series = 1.0 / Complex64::new(r, x) / base_y;
            // shunt: omega C with a dielectric loss angle
            let omega_c = 2.0 * std::f64::consts::PI * 50.0 * c;
            let y_shunt = Complex64::new(omega_c * tan, omega_c) / base_y;
            (y_series, y_shunt)
        };
        let (ys1, ysh1) = sequence(self.r1, self.x1, self.c1, self.tan1);
        let (ys0, ysh0) = sequence(
            nan_or(self.r0, self.r1),
            nan_or(self.x0, self.x1),
            nan_or(self.c0, self.c1),
            nan_or(self.tan0, self.tan1),
        );
        let [from, to] = self.connected();
        let one = Complex64::new(1.0, 0.0);
        let param1 = calc_param_y(from, to, ys1, ysh1, one);
        let param0 = calc_param_y(from, to, ys0, ysh0, one);
        let mut param = BranchCalcParam::<S>::default();
        for i in 0..4 {
            param.value[i] = S::tensor_from_sequence(param1[i], param0[i]);
        }
        param
    }
}

impl LinkInput {
    pub fn connected(&self) -> [bool; 2] {
        [self.from_status != 0, self.to_status != 0]
    }

    pub fn calc_param<S: Symmetry>(&self) -> BranchCalcParam<S> {
        let y = Complex64::new(G_LINK, G_LINK);
        let [from, to] = self.connected();
        let param =
            calc_param_y(from, to, y, Complex64::new(0.0, 0.0), Complex64::new(1.0, 0.0));
        let mut result = BranchCalcParam::<S>::default();
        for i in 0..4 {
            result.value[i] = S::tensor_from_sequence(param[i], param[i]);
        }
        result
    }
}

impl TransformerInput {
    pub fn connected(&self) -> [bool; 2] {
        [self.from_status != 0, self.to_status != 0]
    }

    /// Clock numbers must match the winding parity: even clocks pair equal
    /// wye-ness, odd clocks opposite wye-ness.
    pub fn validate_clock(&self) -> Result<()> {
        let from_wye = self.winding_from.is_wye();
        let to_wye = self.winding_to.is_wye();
        let clock = self.clock;
        if !(0..=12).contains(&clock)
            || (clock % 2 == 0 && from_wye != to_wye)
            || (clock % 2 == 1 && from_wye == to_wye)
        {
            return Err(PowerGridError::InvalidTransformerClock {
                id: self.id,
                clock,
            });
        }
        Ok(())
    }

    /// Branch phase shift, `theta_from - theta_to`.
    pub fn phase_shift(&self) -> f64 {
        f64::from(self.clock % 12) * DEG_30
    }

    fn tap_direction(&self) -> f64 {
        if self.tap_max > self.tap_min {
            1.0
        } else {
            -1.0
        }
    }

    fn tap_limited(&self) -> IntS {
        self.tap_pos
            .min(self.tap_max.max(self.tap_min))
            .max(self.tap_max.min(self.tap_min))
    }

    /// uk at the current tap position, linearly interpolated between the
    /// nominal and the extreme values.
    fn interpolated(&self, mid: f64, at_min: f64, at_max: f64) -> f64 {
        let tap_pos = self.tap_limited();
        let (tap_nom, tap_min, tap_max) = (self.tap_nom, self.tap_min, self.tap_max);
        let in_upper_range =
            tap_pos <= tap_nom.max(tap_max) && tap_pos >= tap_nom.min(tap_max);
        if in_upper_range {
            if tap_max == tap_nom {
                mid
            } else {
                let increment = (at_max - mid) / f64::from(tap_max - tap_nom);
                mid + f64::from(tap_pos - tap_nom) * increment
            }
        } else if tap_min == tap_nom {
            mid
        } else {
            let increment = (at_min - mid) / f64::from(tap_min - tap_nom);
            mid + f64::from(tap_pos - tap_nom) * increment
        }
    }

    /// Series admittance, shunt admittance (both per unit on the to side)
    /// and the off-nominal ratio.
    fn transformer_params(
        &self,
        u1_rated: f64,
        u2_rated: f64,
    ) -> (Complex64, Complex64, f64) {
        let base_i_to = BASE_POWER_3P / u2_rated / SQRT3;
        let base_y_to = base_i_to * base_i_to / BASE_POWER_1P;
        let nominal_ratio = u1_rated / u2_rated;
        let tap_adjust = self.tap_direction()
            * f64::from(self.tap_limited() - self.tap_nom)
            * self.tap_size;
        let (u1, u2) = match self.tap_side {
            BranchSide::From => (self.u1 + tap_adjust, self.u2),
            BranchSide::To => (self.u1, self.u2 + tap_adjust),
        };
        let k = (u1 / u2) / nominal_ratio;

        let uk = self.interpolated(
            self.uk,
            nan_or(self.uk_min, self.uk),
            nan_or(self.uk_max, self.uk),
        );
        let pk = self.interpolated(
            self.pk,
            nan_or(self.pk_min, self.pk),
            nan_or(self.pk_max, self.pk),
        );

        // series: |Z| = uk us^2/S, R = pk u2^2/S^2, X follows
        let z_series_abs = uk * u2 * u2 / self.sn;
        let r_series = pk * u2 * u2 / self.sn / self.sn;
        let x_series = (z_series_abs * z_series_abs - r_series * r_series).sqrt();
        let z_series = Complex64::new(r_series, x_series);
        let y_series = (1.0 / z_series) / base_y_to;

        // shunt: |Y| = i0 S/u2^2, G = p0/u2^2, B follows (inductive)
        let y_shunt_abs = self.i0 * self.sn / u2 / u2;
        let g_shunt = self.p0 / u2 / u2;
        let b_shunt = if g_shunt > y_shunt_abs {
            0.0
        } else {
            -(y_shunt_abs * y_shunt_abs - g_shunt * g_shunt).sqrt()
        };
        let y_shunt = Complex64::new(g_shunt, b_shunt) / base_y_to;

        (y_series, y_shunt, k)
    }

    fn z_grounding(r: f64, x: f64, u_rated: f64) -> Complex64 {
        let base_z = u_rated * u_rated / BASE_POWER_3P;
        Complex64::new(nan_or(r, 0.0) / base_z, nan_or(x, 0.0) / base_z)
    }

    /// Admittance blocks; the zero sequence depends on the winding types
    /// and grounding impedances.
    pub fn calc_param<S: Symmetry>(&self, u1_rated: f64, u2_rated: f64) -> BranchCalcParam<S> {
        let (y_series, y_shunt, k) = self.transformer_params(u1_rated, u2_rated);
        let [from, to] = self.connected();
        let clock_shift = self.phase_shift();

        // positive and negative sequence, conjugate phase shifts
        let param1 = calc_param_y(
            from,
            to,
            y_series,
            y_shunt,
            k * Complex64::from_polar(1.0, clock_shift),
        );
        let param2 = calc_param_y(
            from,
            to,
            y_series,
            y_shunt,
            k * Complex64::from_polar(1.0, -clock_shift),
        );

        // zero sequence by winding configuration
        let zero = Complex64::new(0.0, 0.0);
        let mut param0 = [zero; 4];
        let z_grounding_from =
            Self::z_grounding(self.r_grounding_from, self.x_grounding_from, u1_rated);
        let z_grounding_to = Self::z_grounding(self.r_grounding_to, self.x_grounding_to, u2_rated);
        let clock = self.clock % 12;
        if self.winding_from == WindingType::WyeN && self.winding_to == WindingType::WyeN {
            // reverse connected groups flip the zero-sequence sign
            let phase_shift_0 = if clock == 2 || clock == 6 || clock == 10 {
                6.0 * DEG_30
            } else {
                0.0
            };
            let z0_series =
                1.0 / y_series + 3.0 * (z_grounding_to + z_grounding_from / k / k);
            param0 = calc_param_y(
                from,
                to,
                1.0 / z0_series,
                y_shunt,
                k * Complex64::from_polar(1.0, phase_shift_0),
            );
        } else if self.winding_from == WindingType::WyeN
            && self.winding_to == WindingType::Delta
            && from
        {
            let z0_series = 1.0 / y_series + 3.0 * z_grounding_from / k / k;
            param0[0] = (1.0 / z0_series + y_shunt) / k / k;
        } else if self.winding_from == WindingType::Delta
            && self.winding_to == WindingType::WyeN
            && to
        {
            let z0_series = 1.0 / y_series + 3.0 * z_grounding_to;
            param0[3] = 1.0 / z0_series + y_shunt;
        }
        // zigzag grounded windings present a short zero-sequence path on
        // their own side
        if self.winding_from == WindingType::ZigzagN && from {
            let z0_series = (1.0 / y_series) * 0.1 + 3.0 * z_grounding_from / k / k;
            param0[0] = (1.0 / z0_series) / k / k;
        }
        if self.winding_to == WindingType::ZigzagN && to {
            let z0_series = (1.0 / y_series) * 0.1 + 3.0 * z_grounding_to;
            param0[3] = 1.0 / z0_series;
        }

        let mut param = BranchCalcParam::<S>::default();
        for i in 0..4 {
            param.value[i] = S::tensor_from_sequences012(param0[i], param1[i], param2[i]);
        }
        param
    }
}

impl ThreeWindingTransformerInput {
    pub fn connected(&self) -> [bool; 3] {
        [
            self.status_1 != 0,
            self.status_2 != 0,
            self.status_3 != 0,
        ]
    }

    pub fn validate_clocks(&self) -> Result<()> {
        let wye_1 = self.winding_1.is_wye();
        for (clock, other_wye) in [
            (self.clock_12, self.winding_2.is_wye()),
            (self.clock_13, self.winding_3.is_wye()),
        ] {
            if !(0..=12).contains(&clock)
                || (clock % 2 == 0 && wye_1 != other_wye)
                || (clock % 2 == 1 && wye_1 == other_wye)
            {
                return Err(PowerGridError::InvalidTransformerClock {
                    id: self.id,
                    clock,
                });
            }
        }
        Ok(())
    }

    /// Per-terminal phase shift towards the internal star node,
    /// `theta_terminal - theta_internal`.
    pub fn phase_shift(&self) -> [f64; 3] {
        [
            0.0,
            -f64::from(self.clock_12 % 12) * DEG_30,
            -f64::from(self.clock_13 % 12) * DEG_30,
        ]
    }

    /// Star decomposition of the pair short-circuit parameters, each pair
    /// value taken on the base of the smaller rated power involved.
    fn star_uk_pk(&self) -> ([f64; 3], [f64; 3]) {
        let (sn_1, sn_2, sn_3) = (self.sn_1, self.sn_2, self.sn_3);
        let s12 = sn_1.min(sn_2);
        let s13 = sn_1.min(sn_3);
        let s23 = sn_2.min(sn_3);
        let uk12 = self.uk_12 / s12;
        let uk13 = self.uk_13 / s13;
        let uk23 = self.uk_23 / s23;
        let uk = [
            0.5 * (uk12 + uk13 - uk23) * sn_1,
            0.5 * (uk12 - uk13 + uk23) * sn_2,
            0.5 * (-uk12 + uk13 + uk23) * sn_3,
        ];
        let pk12 = self.pk_12 / s12 / s12;
        let pk13 = self.pk_13 / s13 / s13;
        let pk23 = self.pk_23 / s23 / s23;
        let pk = [
            0.5 * (pk12 + pk13 - pk23) * sn_1 * sn_1,
            0.5 * (pk12 - pk13 + pk23) * sn_2 * sn_2,
            0.5 * (-pk12 + pk13 + pk23) * sn_3 * sn_3,
        ];
        (uk, pk)
    }

    /// The three two-winding equivalents, terminal towards the internal
    /// star node. The internal node is rated at the side-1 voltage.
    pub fn two_winding_equivalents(&self) -> [TransformerInput; 3] {
        let (uk, pk) = self.star_uk_pk();
        let tap_direction: f64 = if self.tap_max > self.tap_min { 1.0 } else { -1.0 };
        let tap_adjust =
            tap_direction * f64::from(self.tap_pos_limited() - self.tap_nom) * self.tap_size;
        let mut u = [self.u1, self.u2, self.u3];
        match self.tap_side {
            0 => u[0] += tap_adjust,
            1 => u[1] += tap_adjust,
            _ => u[2] += tap_adjust,
        }
        let u_t1 = u[0];
        let connected = self.connected();
        let make = |side: usize,
                    u1: f64,
                    sn: f64,
                    uk: f64,
                    pk: f64,
                    i0: f64,
                    p0: f64,
                    winding_from: WindingType,
                    clock: IntS,
                    r_grounding: f64,
                    x_grounding: f64| {
            TransformerInput {
                id: self.id,
                from_node: -1,
                to_node: -1,
                from_status: connected[side] as IntS,
                to_status: 1,
                u1,
                u2: u_t1,
                sn,
                uk,
                pk,
                i0,
                p0,
                winding_from,
                winding_to: WindingType::WyeN,
                clock,
                tap_side: BranchSide::From,
                tap_pos: 0,
                tap_min: 0,
                tap_max: 0,
                tap_nom: 0,
                tap_size: 0.0,
                uk_min: f64::NAN,
                uk_max: f64::NAN,
                pk_min: f64::NAN,
                pk_max: f64::NAN,
                r_grounding_from: r_grounding,
                x_grounding_from: x_grounding,
                r_grounding_to: 0.0,
                x_grounding_to: 0.0,
            }
        };
        [
            make(
                0,
                u_t1,
                self.sn_1,
                uk[0],
                pk[0],
                self.i0,
                self.p0,
                self.winding_1,
                0,
                self.r_grounding_1,
                self.x_grounding_1,
            ),
            make(
                1,
                u[1],
                self.sn_2,
                uk[1],
                pk[1],
                0.0,
                0.0,
                self.winding_2,
                (12 - self.clock_12 % 12) % 12,
                self.r_grounding_2,
                self.x_grounding_2,
            ),
            make(
                2,
                u[2],
                self.sn_3,
                uk[2],
                pk[2],
                0.0,
                0.0,
                self.winding_3,
                (12 - self.clock_13 % 12) % 12,
                self.r_grounding_3,
                self.x_grounding_3,
            ),
        ]
    }

    fn tap_pos_limited(&self) -> IntS {
        self.tap_pos
            .min(self.tap_max.max(self.tap_min))
            .max(self.tap_max.min(self.tap_min))
    }

    /// The three math branch parameter sets, in terminal order.
    pub fn calc_param<S: Symmetry>(
        &self,
        u_rated: [f64; 3],
    ) -> [BranchCalcParam<S>; 3] {
        let equivalents = self.two_winding_equivalents();
        [
            equivalents[0].calc_param::<S>(u_rated[0], u_rated[0]),
            equivalents[1].calc_param::<S>(u_rated[1], u_rated[0]),
            equivalents[2].calc_param::<S>(u_rated[2], u_rated[0]),
        ]
    }
}

impl ShuntInput {
    /// Shunt admittance tensor, per unit on the node's rated voltage.
    pub fn calc_param<S: Symmetry>(&self, u_rated: f64) -> S::ComplexTensor {
        if self.status == 0 {
            return S::ComplexTensor::default();
        }
        let base_y = BASE_POWER_3P / (u_rated * u_rated);
        let y1 = Complex64::new(self.g1, self.b1) / base_y;
        let y0 = Complex64::new(nan_or(self.g0, self.g1), nan_or(self.b0, self.b1)) / base_y;
        S::tensor_from_sequence(y1, y0)
    }
}

impl SourceInput {
    /// Source series admittance from its short-circuit power.
    pub fn calc_param(&self) -> SourceCalcParam {
        if self.status == 0 {
            return SourceCalcParam::default();
        }
        let sk = nan_or(self.sk, DEFAULT_SOURCE_SK);
        let rx_ratio = nan_or(self.rx_ratio, DEFAULT_SOURCE_RX_RATIO);
        let z01_ratio = nan_or(self.z01_ratio, DEFAULT_SOURCE_Z01_RATIO);
        // z_pu = base_s / sk
        let z_abs = BASE_POWER_3P / sk;
        let x1 = z_abs / (rx_ratio * rx_ratio + 1.0).sqrt();
        let r1 = x1 * rx_ratio;
        let y1 = 1.0 / Complex64::new(r1, x1);
        SourceCalcParam {
            y1,
            y0: y1 / z01_ratio,
        }
    }
}

impl LoadGenInput {
    fn sign(&self) -> f64 {
        match self.direction {
            ApplianceDirection::Load => -1.0,
            ApplianceDirection::Generator => 1.0,
        }
    }

    /// Specified injection power in per unit; loads inject negatively.
    pub fn s_specified<S: Symmetry>(&self) -> S::ComplexValue {
        let sign = self.sign();
        if self.is_asym {
            S::complex_from_fn(|phase| {
                sign * Complex64::new(self.p_specified[phase], self.q_specified[phase])
                    / BASE_POWER_1P
            })
        } else {
            S::complex_uniform(
                sign * Complex64::new(self.p_specified[0], self.q_specified[0]) / BASE_POWER_3P,
            )
        }
    }
}

impl VoltageSensorInput {
    /// Aggregation-ready measurement in per unit; missing angles keep the
    /// imaginary part NaN.
    ///
    /// A symmetric sensor measures line-to-line voltage, an asymmetric one
    /// phase-to-neutral per phase; per unit the two coincide for a balanced
    /// system.
    pub fn calc_param<S: Symmetry>(&self, u_rated: f64) -> SensorCalcParam<S> {
        let u_base = if self.is_asym {
            u_rated / SQRT3
        } else {
            u_rated
        };
        let variance = (self.u_sigma / u_base) * (self.u_sigma / u_base);
        let value = S::complex_from_fn(|phase| {
            let index = if self.is_asym { phase } else { 0 };
            let magnitude = self.u_measured[index] / u_base;
            let angle = self.u_angle_measured[index];
            if angle.is_nan() {
                Complex64::new(magnitude, f64::NAN)
            } else {
                // a symmetric measurement lands on phase a and rotates onto
                // the other phases
                let phase_angle = if self.is_asym {
                    angle
                } else {
                    angle - phase as f64 * 2.0 * std::f64::consts::FRAC_PI_3
                };
                Complex64::from_polar(magnitude, phase_angle)
            }
        });
        SensorCalcParam { value, variance }
    }
}

impl PowerSensorInput {
    /// A symmetric sensor carries the three-phase total, an asymmetric one
    /// per-phase values; per unit both coincide for a balanced system.
    pub fn calc_param<S: Symmetry>(&self) -> SensorCalcParam<S> {
        let base = if self.is_asym {
            BASE_POWER_1P
        } else {
            BASE_POWER_3P
        };
        let sigma = self.power_sigma / base;
        let value = S::complex_from_fn(|phase| {
            let index = if self.is_asym { phase } else { 0 };
            Complex64::new(self.p_measured[index], self.q_measured[index]) / base
        });
        SensorCalcParam {
            value,
            variance: sigma * sigma,
        }
    }
}
