//! Iterative-linear weighted-least-squares state estimation.
//!
//! Before solving, all sensors observing the same point are merged into a
//! single measurement by inverse-variance weighting ([`MeasuredValues`]);
//! power measurements of all appliances on a bus combine into one bus
//! injection measurement when every connected appliance is measured (a bus
//! with nothing connected is a zero-injection constraint). Variances are
//! normalised so the smallest positive one becomes 1.
//!
//! The unknown per bus is the complex voltage plus a dummy vector `φ`; the
//! gain matrix per Y-bus entry is
//!
//! ```text
//! [[G, Qᴴ],
//!  [Q, R ]]
//! ```
//!
//! with `G` collecting voltage, shunt and branch flow information, `Q` the
//! bus-injection rows (`Q_ij = Y_ij`) and `R` the injection variance (or an
//! identity stabiliser where no injection measurement exists). The gain
//! matrix only depends on the parameters, so it is prefactorised and reused
//! over the iterations; the right-hand side is rotated to the present
//! voltage estimate each round.

use num_complex::Complex64;
use tracing::debug;

use gridflow_core::{Idx, PowerGridError, Result, Symmetry, YBusElementType};

use crate::lu::BlockSparseLuSolver;
use crate::types::{
    ApplianceSolverOutput, SensorCalcParam, SolverOutput, StateEstimationInput,
};
use crate::y_bus::YBus;

/// Aggregated measurements of one subgrid.
///
/// Index arrays hold, per observation point: `>= 0` the position of the
/// aggregated measurement, `-1` connected but unmeasured, `-2` not
/// connected. For bus injections a negative value counts the unmeasured
/// appliances.
pub struct MeasuredValues<S: Symmetry> {
    topo: std::sync::Arc<crate::types::MathModelTopology>,
    /// branch/shunt flow, bus voltage and injection measurements
    main_value: Vec<SensorCalcParam<S>>,
    /// per-appliance measurements, kept for the result projection
    extra_value: Vec<SensorCalcParam<S>>,
    /// partial injection sums of buses with unmeasured appliances
    partial_injection: Vec<SensorCalcParam<S>>,
    idx_voltage: Vec<Idx>,
    idx_bus_injection: Vec<Idx>,
    idx_branch_from_power: Vec<Idx>,
    idx_branch_to_power: Vec<Idx>,
    idx_shunt_power: Vec<Idx>,
    idx_load_gen_power: Vec<Idx>,
    idx_source_power: Vec<Idx>,
    idx_partial_injection: Vec<Idx>,
    n_angle: usize,
    mean_angle_shift: S::RealValue,
    min_var: f64,
}

impl<S: Symmetry> MeasuredValues<S> {
    pub fn new(y_bus: &YBus<S>, input: &StateEstimationInput<S>) -> Self {
        let topo = y_bus.shared_topology();
        let mut values = MeasuredValues {
            idx_voltage: vec![-1; topo.n_bus() as usize],
            idx_bus_injection: vec![-1; topo.n_bus() as usize],
            idx_branch_from_power: vec![-1; topo.n_branch() as usize],
            idx_branch_to_power: vec![-1; topo.n_branch() as usize],
            idx_shunt_power: vec![-1; topo.n_shunt() as usize],
            idx_load_gen_power: vec![-1; topo.n_load_gen() as usize],
            idx_source_power: vec![-1; topo.n_source() as usize],
            idx_partial_injection: vec![-1; topo.n_bus() as usize],
            main_value: Vec::new(),
            extra_value: Vec::new(),
            partial_injection: Vec::new(),
            n_angle: 0,
            // zero for symmetric, the natural 120 degree spacing otherwise
            mean_angle_shift: S::arg(&S::complex_rotated(Complex64::new(1.0, 0.0))),
            min_var: 0.0,
            topo,
        };
        values.process_bus_related_measurements(input);
        values.process_branch_measurements(input);
        values.normalize_variance();
        values
    }

    pub fn has_voltage(&self, bus: Idx) -> bool {
        self.idx_voltage[bus as usize] >= 0
    }
    pub fn has_bus_injection(&self, bus: Idx) -> bool {
        self.idx_bus_injection[bus as usize] >= 0
    }
    pub fn has_branch_side(&self, side: usize, branch: Idx) -> bool {
        match side {
            0 => self.idx_branch_from_power[branch as usize] >= 0,
            _ => self.idx_branch_to_power[branch as usize] >= 0,
        }
    }
    pub fn has_shunt(&self, shunt: Idx) -> bool {
        self.idx_shunt_power[shunt as usize] >= 0
    }
    pub fn has_load_gen(&self, load_gen: Idx) -> bool {
        self.idx_load_gen_power[load_gen as usize] >= 0
    }
    pub fn has_source(&self, source: Idx) -> bool {
        self.idx_source_power[source as usize] >= 0
    }
    pub fn has_angle_measurement(&self) -> bool {
        self.n_angle > 0
    }

    pub fn voltage_var(&self, bus: Idx) -> f64 {
        self.main_value[self.idx_voltage[bus as usize] as usize].variance
    }
    pub fn bus_injection(&self, bus: Idx) -> &SensorCalcParam<S> {
        &self.main_value[self.idx_bus_injection[bus as usize] as usize]
    }
    pub fn branch_side_power(&self, side: usize, branch: Idx) -> &SensorCalcParam<S> {
        let idx = match side {
            0 => self.idx_branch_from_power[branch as usize],
            _ => self.idx_branch_to_power[branch as usize],
        };
        &self.main_value[idx as usize]
    }
    pub fn shunt_power(&self, shunt: Idx) -> &SensorCalcParam<S> {
        &self.main_value[self.idx_shunt_power[shunt as usize] as usize]
    }
    pub fn load_gen_power(&self, load_gen: Idx) -> &SensorCalcParam<S> {
        &self.extra_value[self.idx_load_gen_power[load_gen as usize] as usize]
    }
    pub fn source_power(&self, source: Idx) -> &SensorCalcParam<S> {
        &self.extra_value[self.idx_source_power[source as usize] as usize]
    }
    pub fn mean_angle_shift(&self) -> S::RealValue {
        self.mean_angle_shift
    }

    /// Measured (or estimated) voltage phasors with the angle of the
    /// current iteration where the measurement has no angle.
    pub fn voltage(&self, current_u: &[S::ComplexValue]) -> Vec<S::ComplexValue> {
        current_u
            .iter()
            .enumerate()
            .map(|(bus, &u_cur)| {
                let idx = self.idx_voltage[bus];
                if idx == -1 {
                    u_cur
                } else {
                    let measured = &self.main_value[idx as usize];
                    if S::all_nan(&S::im(&measured.value)) {
                        // magnitude only: borrow the angle of the estimate
                        S::scale(&u_cur, &(S::re(&measured.value) / S::cabs(&u_cur)))
                    } else {
                        measured.value
                    }
                }
            })
            .collect()
    }

    fn process_bus_related_measurements(&mut self, input: &StateEstimationInput<S>) {
        let topo = std::sync::Arc::clone(&self.topo);
        let mut angle_cum = S::real_uniform(0.0);
        for bus in 0..topo.n_bus() as usize {
            // voltage
            {
                let begin = topo.voltage_sensor_indptr[bus] as usize;
                let end = topo.voltage_sensor_indptr[bus + 1] as usize;
                if begin == end {
                    self.idx_voltage[bus] = -1;
                } else {
                    self.idx_voltage[bus] = self.main_value.len() as Idx;
                    let any_magnitude_only = input.measured_voltage[begin..end]
                        .iter()
                        .any(|m| S::all_nan(&S::im(&m.value)));
                    let combined =
                        combine_measurements(&input.measured_voltage, begin, end, any_magnitude_only);
                    if !any_magnitude_only {
                        self.n_angle += 1;
                        // accumulate the angle, offset by the intrinsic shift
                        angle_cum += S::arg(
                            &(combined.value
                                * Complex64::from_polar(1.0, -topo.phase_shift[bus])),
                        );
                    }
                    self.main_value.push(combined);
                }
            }
            // shunt measurements go to the main value
            for shunt in topo.shunt_bus_indptr[bus]..topo.shunt_bus_indptr[bus + 1] {
                process_one_object(
                    shunt as usize,
                    &topo.shunt_power_sensor_indptr,
                    input.shunt_status[shunt as usize] != 0,
                    &input.measured_shunt_power,
                    &mut self.main_value,
                    &mut self.idx_shunt_power,
                );
            }
            // appliance measurements go to the extra values
            for load_gen in topo.load_gen_bus_indptr[bus]..topo.load_gen_bus_indptr[bus + 1] {
                process_one_object(
                    load_gen as usize,
                    &topo.load_gen_power_sensor_indptr,
                    input.load_gen_status[load_gen as usize] != 0,
                    &input.measured_load_gen_power,
                    &mut self.extra_value,
                    &mut self.idx_load_gen_power,
                );
            }
            for source in topo.source_bus_indptr[bus]..topo.source_bus_indptr[bus + 1] {
                process_one_object(
                    source as usize,
                    &topo.source_power_sensor_indptr,
                    input.source_status[source as usize] != 0,
                    &input.measured_source_power,
                    &mut self.extra_value,
                    &mut self.idx_source_power,
                );
            }
            // combine appliances into one injection measurement; complete
            // only if every connected appliance is measured (all
            // disconnected is a zero-injection constraint)
            let mut n_unmeasured = 0;
            let mut injection = SensorCalcParam::<S>::default();
            for load_gen in topo.load_gen_bus_indptr[bus]..topo.load_gen_bus_indptr[bus + 1] {
                match self.idx_load_gen_power[load_gen as usize] {
                    -1 => n_unmeasured += 1,
                    -2 => {}
                    idx => {
                        injection.value += self.extra_value[idx as usize].value;
                        injection.variance += self.extra_value[idx as usize].variance;
                    }
                }
            }
            for source in topo.source_bus_indptr[bus]..topo.source_bus_indptr[bus + 1] {
                match self.idx_source_power[source as usize] {
                    -1 => n_unmeasured += 1,
                    -2 => {}
                    idx => {
                        injection.value += self.extra_value[idx as usize].value;
                        injection.variance += self.extra_value[idx as usize].variance;
                    }
                }
            }
            if n_unmeasured == 0 {
                self.idx_bus_injection[bus] = self.main_value.len() as Idx;
                self.main_value.push(injection);
            } else {
                self.idx_bus_injection[bus] = -n_unmeasured;
                self.idx_partial_injection[bus] = self.partial_injection.len() as Idx;
                self.partial_injection.push(injection);
            }
        }
        if self.n_angle > 0 {
            self.mean_angle_shift = angle_cum / self.n_angle as f64;
        }
    }

    fn process_branch_measurements(&mut self, input: &StateEstimationInput<S>) {
        let topo = std::sync::Arc::clone(&self.topo);
        for branch in 0..topo.n_branch() as usize {
            let [from, to] = topo.branch_bus_idx[branch];
            process_one_object(
                branch,
                &topo.branch_from_power_sensor_indptr,
                from != -1,
                &input.measured_branch_from_power,
                &mut self.main_value,
                &mut self.idx_branch_from_power,
            );
            process_one_object(
                branch,
                &topo.branch_to_power_sensor_indptr,
                to != -1,
                &input.measured_branch_to_power,
                &mut self.main_value,
                &mut self.idx_branch_to_power,
            );
        }
    }

    /// Scale all variances so the smallest positive one becomes 1; zero
    /// variance stays a hard constraint.
    fn normalize_variance(&mut self) {
        self.min_var = f64::INFINITY;
        for value in &self.main_value {
            if value.variance != 0.0 {
                self.min_var = self.min_var.min(value.variance);
            }
        }
        for value in &mut self.main_value {
            value.variance /= self.min_var;
        }
    }

    /// Split the computed bus injection over the connected appliances.
    pub fn calculate_load_gen_source(
        &self,
        u: &[S::ComplexValue],
        s: &[S::ComplexValue],
    ) -> (Vec<ApplianceSolverOutput<S>>, Vec<ApplianceSolverOutput<S>>) {
        let topo = &self.topo;
        let mut load_gen = vec![ApplianceSolverOutput::<S>::default(); topo.n_load_gen() as usize];
        let mut source = vec![ApplianceSolverOutput::<S>::default(); topo.n_source() as usize];
        for bus in 0..topo.n_bus() as usize {
            let load_gen_range =
                topo.load_gen_bus_indptr[bus]..topo.load_gen_bus_indptr[bus + 1];
            let source_range = topo.source_bus_indptr[bus]..topo.source_bus_indptr[bus + 1];

            if self.idx_bus_injection[bus] < 0 {
                // exactly- or under-determined: measured appliances keep
                // their value, the unmeasured rest splits the residual
                let n_unmeasured = -self.idx_bus_injection[bus];
                let partial =
                    &self.partial_injection[self.idx_partial_injection[bus] as usize];
                let residual = (s[bus] - partial.value) / n_unmeasured as f64;
                for appliance in load_gen_range.clone() {
                    if self.has_load_gen(appliance) {
                        load_gen[appliance as usize].s = self.load_gen_power(appliance).value;
                    } else if self.idx_load_gen_power[appliance as usize] == -1 {
                        load_gen[appliance as usize].s = residual;
                    }
                }
                for appliance in source_range.clone() {
                    if self.has_source(appliance) {
                        source[appliance as usize].s = self.source_power(appliance).value;
                    } else if self.idx_source_power[appliance as usize] == -1 {
                        source[appliance as usize].s = residual;
                    }
                }
            } else {
                // over-determined: distribute the residual weighted by each
                // appliance's variance, normalised like the main values
                let full = self.bus_injection(bus as Idx);
                let mu = (full.value - s[bus]) / full.variance;
                for appliance in load_gen_range.clone() {
                    if self.has_load_gen(appliance) {
                        let m = self.load_gen_power(appliance);
                        load_gen[appliance as usize].s =
                            m.value - mu * (m.variance / self.min_var);
                    }
                }
                for appliance in source_range.clone() {
                    if self.has_source(appliance) {
                        let m = self.source_power(appliance);
                        source[appliance as usize].s =
                            m.value - mu * (m.variance / self.min_var);
                    }
                }
            }

            for appliance in load_gen_range {
                load_gen[appliance as usize].i =
                    S::conj(&(load_gen[appliance as usize].s / u[bus]));
            }
            for appliance in source_range {
                source[appliance as usize].i = S::conj(&(source[appliance as usize].s / u[bus]));
            }
        }
        (load_gen, source)
    }
}

/// Merge all sensors of one object; `-2` not connected, `-1` no sensor.
fn process_one_object<S: Symmetry>(
    obj: usize,
    sensor_indptr: &[Idx],
    connected: bool,
    input_data: &[SensorCalcParam<S>],
    result_data: &mut Vec<SensorCalcParam<S>>,
    result_idx: &mut [Idx],
) {
    let begin = sensor_indptr[obj] as usize;
    let end = sensor_indptr[obj + 1] as usize;
    if !connected {
        result_idx[obj] = -2;
    } else if begin == end {
        result_idx[obj] = -1;
    } else {
        result_idx[obj] = result_data.len() as Idx;
        result_data.push(combine_measurements(input_data, begin, end, false));
    }
}

/// Weight of a measurement in the gain matrix and right-hand side.
///
/// Variance zero is a hard constraint; after normalisation the stiffest
/// soft measurement has weight one, so a fixed large weight enforces the
/// constraint to working precision.
const HARD_CONSTRAINT_WEIGHT: f64 = 1e12;

fn weight(variance: f64) -> f64 {
    if variance == 0.0 {
        HARD_CONSTRAINT_WEIGHT
    } else {
        1.0 / variance
    }
}

/// Inverse-variance weighted combination of several measurements.
///
/// With `only_magnitude` the magnitudes are combined and the imaginary part
/// is left NaN to mark the missing angle. A zero-variance measurement
/// overrides everything else.
fn combine_measurements<S: Symmetry>(
    data: &[SensorCalcParam<S>],
    begin: usize,
    end: usize,
    only_magnitude: bool,
) -> SensorCalcParam<S> {
    if let Some(hard) = data[begin..end].iter().find(|m| m.variance == 0.0) {
        let value = if only_magnitude {
            let magnitude = if S::all_nan(&S::im(&hard.value)) {
                S::re(&hard.value)
            } else {
                S::cabs(&hard.value)
            };
            S::add_real(&S::complex_uniform(Complex64::new(0.0, f64::NAN)), &magnitude)
        } else {
            hard.value
        };
        return SensorCalcParam {
            value,
            variance: 0.0,
        };
    }
    let mut accumulated_inverse_variance = 0.0;
    let mut accumulated_value = S::ComplexValue::default();
    if only_magnitude {
        accumulated_value = S::complex_uniform(Complex64::new(0.0, f64::NAN));
    }
    for measurement in &data[begin..end] {
        accumulated_inverse_variance += 1.0 / measurement.variance;
        if only_magnitude {
            let magnitude = if S::all_nan(&S::im(&measurement.value)) {
                S::re(&measurement.value)
            } else {
                S::cabs(&measurement.value)
            };
            accumulated_value = S::add_real(
                &accumulated_value,
                &(magnitude / measurement.variance),
            );
        } else {
            accumulated_value += measurement.value / measurement.variance;
        }
    }
    SensorCalcParam {
        value: accumulated_value / accumulated_inverse_variance,
        variance: 1.0 / accumulated_inverse_variance,
    }
}

/// Gain-matrix block `[[G, Qᴴ], [Q, R]]`.
#[derive(Debug, Clone, Copy, Default)]
struct SeGainBlock<S: Symmetry> {
    g: S::ComplexTensor,
    qh: S::ComplexTensor,
    q: S::ComplexTensor,
    r: S::ComplexTensor,
}

/// Right-hand-side block per bus.
#[derive(Debug, Clone, Copy, Default)]
struct SeRhs<S: Symmetry> {
    eta: S::ComplexValue,
    tau: S::ComplexValue,
}

pub struct IterativeLinearSeSolver<S: Symmetry> {
    n_bus: Idx,
    data_gain: Vec<SeGainBlock<S>>,
    rhs: Vec<SeRhs<S>>,
    x_u: Vec<S::ComplexValue>,
    flat_gain: Vec<Complex64>,
    flat_rhs: Vec<Complex64>,
    flat_x: Vec<Complex64>,
    solver: BlockSparseLuSolver<Complex64>,
}

impl<S: Symmetry> IterativeLinearSeSolver<S> {
    pub fn new(y_bus: &YBus<S>) -> Self {
        let n_bus = y_bus.size();
        let nnz = y_bus.nnz() as usize;
        let b2 = 2 * S::BLOCK_SIZE;
        IterativeLinearSeSolver {
            n_bus,
            data_gain: vec![SeGainBlock::default(); nnz],
            rhs: vec![SeRhs::default(); n_bus as usize],
            x_u: vec![S::ComplexValue::default(); n_bus as usize],
            flat_gain: vec![Complex64::default(); nnz * b2 * b2],
            flat_rhs: vec![Complex64::default(); n_bus as usize * b2],
            flat_x: vec![Complex64::default(); n_bus as usize * b2],
            solver: BlockSparseLuSolver::new(y_bus.structure().lu_pattern(), b2),
        }
    }

    pub fn run_state_estimation(
        &mut self,
        y_bus: &YBus<S>,
        input: &StateEstimationInput<S>,
        err_tol: f64,
        max_iter: Idx,
    ) -> Result<SolverOutput<S>> {
        let topo = y_bus.shared_topology();
        let n_bus = self.n_bus as usize;

        let measured = MeasuredValues::new(y_bus, input);
        self.prepare_matrix(y_bus, &measured)?;

        // initial voltage from the mean measured angle shift
        let mean_angle_shift = measured.mean_angle_shift();
        let mut u: Vec<S::ComplexValue> = (0..n_bus)
            .map(|bus| {
                S::exp_j(&(mean_angle_shift + S::real_uniform(topo.phase_shift[bus])))
            })
            .collect();

        let mut max_dev = f64::MAX;
        let mut num_iter: Idx = 0;
        while max_dev > err_tol {
            if num_iter == max_iter {
                return Err(PowerGridError::IterationDiverge {
                    num_iter: max_iter,
                    max_dev,
                    err_tol,
                });
            }
            num_iter += 1;
            self.prepare_rhs(y_bus, &measured, &u);
            self.flatten_rhs();
            self.solver
                .solve(&self.flat_gain, &self.flat_rhs, &mut self.flat_x, true)?;
            self.read_x();
            max_dev = self.iterate_unknown(&mut u, &measured, topo.slack_bus);
            debug!(num_iter, max_dev, "iterative linear se step");
        }

        Ok(self.calculate_result(y_bus, &measured, u))
    }

    fn prepare_matrix(&mut self, y_bus: &YBus<S>, measured: &MeasuredValues<S>) -> Result<()> {
        let structure = y_bus.structure();
        let param = y_bus.math_model_param();

        for data_idx in 0..y_bus.nnz() as usize {
            let row = structure.row_indices[data_idx];
            let col = structure.col_indices[data_idx];
            let mut block = SeGainBlock::<S>::default();

            // voltage measurement, diagonal only
            if row == col && measured.has_voltage(row) {
                block.g +=
                    S::tensor_diag(Complex64::new(weight(measured.voltage_var(row)), 0.0));
            }
            // branch and shunt flow measurements
            for element_idx in structure.y_bus_entry_indptr[data_idx]
                ..structure.y_bus_entry_indptr[data_idx + 1]
            {
                let element = structure.y_bus_element[element_idx as usize];
                match element.element_type {
                    YBusElementType::Shunt => {
                        if measured.has_shunt(element.idx) {
                            let ys = &param.shunt_param[element.idx as usize];
                            block.g += S::dot_tensor(&S::hermitian_transpose(ys), ys)
                                * weight(measured.shunt_power(element.idx).variance);
                        }
                    }
                    branch_element => {
                        // from- and to-side block index of this entry
                        let b0 = branch_element.branch_value_index() / 2;
                        let b1 = branch_element.branch_value_index() % 2;
                        for side in 0..2usize {
                            if measured.has_branch_side(side, element.idx) {
                                let branch = &param.branch_param[element.idx as usize];
                                block.g += S::dot_tensor(
                                    &S::hermitian_transpose(&branch.value[side * 2 + b0]),
                                    &branch.value[side * 2 + b1],
                                ) * weight(
                                    measured.branch_side_power(side, element.idx).variance,
                                );
                            }
                        }
                    }
                }
            }
            // bus injection rows
            if measured.has_bus_injection(row) {
                block.q = y_bus.admittance()[data_idx];
                if row == col {
                    block.r = S::tensor_diag(Complex64::new(
                        -measured.bus_injection(row).variance,
                        0.0,
                    ));
                }
            } else if row == col {
                // identity stabiliser
                block.r = S::tensor_diag(Complex64::new(-1.0, 0.0));
            }
            self.data_gain[data_idx] = block;
        }

        // Qᴴ is the hermitian transpose of Q at the transposed entry
        for data_idx in 0..y_bus.nnz() as usize {
            let transposed = structure.transpose_entry[data_idx] as usize;
            self.data_gain[data_idx].qh =
                S::hermitian_transpose(&self.data_gain[transposed].q);
        }

        self.flatten_gain();
        self.solver.prefactorize(&self.flat_gain)
    }

    fn prepare_rhs(
        &mut self,
        y_bus: &YBus<S>,
        measured: &MeasuredValues<S>,
        current_u: &[S::ComplexValue],
    ) {
        let structure = y_bus.structure();
        let param = y_bus.math_model_param();
        let branch_bus_idx = &y_bus.math_topology().branch_bus_idx;
        let u = measured.voltage(current_u);

        for bus in 0..self.n_bus as usize {
            let data_idx = y_bus.bus_entry()[bus] as usize;
            let mut rhs = SeRhs::<S>::default();

            if measured.has_voltage(bus as Idx) {
                rhs.eta += u[bus] * weight(measured.voltage_var(bus as Idx));
            }
            for element_idx in structure.y_bus_entry_indptr[data_idx]
                ..structure.y_bus_entry_indptr[data_idx + 1]
            {
                let element = structure.y_bus_element[element_idx as usize];
                match element.element_type {
                    YBusElementType::Shunt => {
                        if measured.has_shunt(element.idx) {
                            let m = measured.shunt_power(element.idx);
                            let ys = &param.shunt_param[element.idx as usize];
                            rhs.eta -= S::dot(
                                &S::hermitian_transpose(ys),
                                &S::conj(&(m.value / u[bus])),
                            ) * weight(m.variance);
                        }
                    }
                    branch_element => {
                        // a diagonal entry is either the ff or the tt block
                        let b = branch_element.branch_value_index() / 2;
                        debug_assert_eq!(b, branch_element.branch_value_index() % 2);
                        for side in 0..2usize {
                            if measured.has_branch_side(side, element.idx) {
                                let m = measured.branch_side_power(side, element.idx);
                                // the measured current is reconstructed with
                                // the voltage of the measured side
                                let measured_bus =
                                    branch_bus_idx[element.idx as usize][side] as usize;
                                let branch = &param.branch_param[element.idx as usize];
                                rhs.eta += S::dot(
                                    &S::hermitian_transpose(&branch.value[side * 2 + b]),
                                    &S::conj(&(m.value / u[measured_bus])),
                                ) * weight(m.variance);
                            }
                        }
                    }
                }
            }
            if measured.has_bus_injection(bus as Idx) {
                rhs.tau = S::conj(&(measured.bus_injection(bus as Idx).value / u[bus]));
            }
            self.rhs[bus] = rhs;
        }
    }

    fn iterate_unknown(
        &mut self,
        u: &mut [S::ComplexValue],
        measured: &MeasuredValues<S>,
        slack_bus: Idx,
    ) -> f64 {
        // rotate the solution so the slack bus (phase a) has zero phase
        // when nothing anchors the angle
        let angle_offset = if measured.has_angle_measurement() {
            Complex64::new(1.0, 0.0)
        } else {
            let slack = S::phase_a(&self.x_u[slack_bus as usize]);
            Complex64::new(slack.norm(), 0.0) / slack
        };
        let mut max_dev: f64 = 0.0;
        for bus in 0..self.n_bus as usize {
            let u_normalized = self.x_u[bus] * angle_offset;
            let dev = S::max_val(&S::cabs(&(u_normalized - u[bus])));
            max_dev = max_dev.max(dev);
            u[bus] = u_normalized;
        }
        max_dev
    }

    fn calculate_result(
        &self,
        y_bus: &YBus<S>,
        measured: &MeasuredValues<S>,
        u: Vec<S::ComplexValue>,
    ) -> SolverOutput<S> {
        let s_injection = y_bus.calculate_injection(&u);
        let (load_gen, source) = measured.calculate_load_gen_source(&u, &s_injection);
        SolverOutput {
            branch: y_bus.calculate_branch_flow(&u),
            shunt: y_bus.calculate_shunt_flow(&u),
            bus_injection: s_injection,
            source,
            load_gen,
            u,
        }
    }

    fn flatten_gain(&mut self) {
        let b = S::BLOCK_SIZE;
        let b2 = 2 * b;
        for (entry, block) in self.data_gain.iter().enumerate() {
            let base = entry * b2 * b2;
            for r in 0..b {
                for c in 0..b {
                    self.flat_gain[base + r * b2 + c] = S::complex_tensor_get(&block.g, r, c);
                    self.flat_gain[base + r * b2 + b + c] =
                        S::complex_tensor_get(&block.qh, r, c);
                    self.flat_gain[base + (b + r) * b2 + c] =
                        S::complex_tensor_get(&block.q, r, c);
                    self.flat_gain[base + (b + r) * b2 + b + c] =
                        S::complex_tensor_get(&block.r, r, c);
                }
            }
        }
    }

    fn flatten_rhs(&mut self) {
        let b = S::BLOCK_SIZE;
        let b2 = 2 * b;
        for (bus, rhs) in self.rhs.iter().enumerate() {
            for p in 0..b {
                self.flat_rhs[bus * b2 + p] = S::complex_get(&rhs.eta, p);
                self.flat_rhs[bus * b2 + b + p] = S::complex_get(&rhs.tau, p);
            }
        }
    }

    fn read_x(&mut self) {
        let b = S::BLOCK_SIZE;
        let b2 = 2 * b;
        for (bus, value) in self.x_u.iter_mut().enumerate() {
            *value = S::complex_from_fn(|p| self.flat_x[bus * b2 + p]);
        }
    }
}
