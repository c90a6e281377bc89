//! Scenario update rows and their application to the component tables.
//!
//! Update rows reference components by id; numeric NaN attributes and
//! integer sentinel attributes mean "leave unchanged", so applying an
//! all-sentinel update is a no-op. Switching-status changes dirty the
//! topology; admittance-relevant changes dirty the parameters and are
//! collected for the incremental Y-bus update.

use serde::{Deserialize, Serialize};

use gridflow_core::{is_na_int_s, Id, IntS, NA_INT_S};

/// Update of a line or link: switching status only.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BranchUpdate {
    pub id: Id,
    pub from_status: IntS,
    pub to_status: IntS,
}

impl Default for BranchUpdate {
    fn default() -> Self {
        BranchUpdate {
            id: 0,
            from_status: NA_INT_S,
            to_status: NA_INT_S,
        }
    }
}

/// Update of a transformer: switching status and tap position.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TransformerUpdate {
    pub id: Id,
    pub from_status: IntS,
    pub to_status: IntS,
    pub tap_pos: IntS,
}

impl Default for TransformerUpdate {
    fn default() -> Self {
        TransformerUpdate {
            id: 0,
            from_status: NA_INT_S,
            to_status: NA_INT_S,
            tap_pos: NA_INT_S,
        }
    }
}

/// Update of a three-winding transformer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Branch3Update {
    pub id: Id,
    pub status_1: IntS,
    pub status_2: IntS,
    pub status_3: IntS,
    pub tap_pos: IntS,
}

impl Default for Branch3Update {
    fn default() -> Self {
        Branch3Update {
            id: 0,
            status_1: NA_INT_S,
            status_2: NA_INT_S,
            status_3: NA_INT_S,
            tap_pos: NA_INT_S,
        }
    }
}

/// Update of a shunt admittance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ShuntUpdate {
    pub id: Id,
    pub status: IntS,
    pub g1: f64,
    pub b1: f64,
    pub g0: f64,
    pub b0: f64,
}

impl Default for ShuntUpdate {
    fn default() -> Self {
        ShuntUpdate {
            id: 0,
            status: NA_INT_S,
            g1: f64::NAN,
            b1: f64::NAN,
            g0: f64::NAN,
            b0: f64::NAN,
        }
    }
}

/// Update of a source: status and reference voltage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SourceUpdate {
    pub id: Id,
    pub status: IntS,
    pub u_ref: f64,
}

impl Default for SourceUpdate {
    fn default() -> Self {
        SourceUpdate {
            id: 0,
            status: NA_INT_S,
            u_ref: f64::NAN,
        }
    }
}

/// Update of a load or generator: status and specified power.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LoadGenUpdate {
    pub id: Id,
    pub status: IntS,
    pub p_specified: [f64; 3],
    pub q_specified: [f64; 3],
}

impl Default for LoadGenUpdate {
    fn default() -> Self {
        LoadGenUpdate {
            id: 0,
            status: NA_INT_S,
            p_specified: [f64::NAN; 3],
            q_specified: [f64::NAN; 3],
        }
    }
}

/// Update of a voltage sensor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VoltageSensorUpdate {
    pub id: Id,
    pub u_sigma: f64,
    pub u_measured: [f64; 3],
    pub u_angle_measured: [f64; 3],
}

impl Default for VoltageSensorUpdate {
    fn default() -> Self {
        VoltageSensorUpdate {
            id: 0,
            u_sigma: f64::NAN,
            u_measured: [f64::NAN; 3],
            u_angle_measured: [f64::NAN; 3],
        }
    }
}

/// Update of a power sensor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PowerSensorUpdate {
    pub id: Id,
    pub power_sigma: f64,
    pub p_measured: [f64; 3],
    pub q_measured: [f64; 3],
}

impl Default for PowerSensorUpdate {
    fn default() -> Self {
        PowerSensorUpdate {
            id: 0,
            power_sigma: f64::NAN,
            p_measured: [f64::NAN; 3],
            q_measured: [f64::NAN; 3],
        }
    }
}

/// Overwrite `current` with `new` unless `new` is the sentinel.
pub(crate) fn update_status(current: &mut IntS, new: IntS) -> bool {
    if is_na_int_s(new) || *current == new {
        return false;
    }
    *current = new;
    true
}

/// Overwrite `current` with `new` unless `new` is NaN.
pub(crate) fn update_double(current: &mut f64, new: f64) -> bool {
    if new.is_nan() {
        return false;
    }
    *current = new;
    true
}

/// Element-wise NaN-skipping update of a per-phase value.
pub(crate) fn update_double3(current: &mut [f64; 3], new: &[f64; 3]) -> bool {
    let mut changed = false;
    for (cur, new) in current.iter_mut().zip(new) {
        changed |= update_double(cur, *new);
    }
    changed
}

impl BranchUpdate {
    /// True when this row cannot change the topology, i.e. both status
    /// fields carry the sentinel.
    pub fn keeps_topology(&self) -> bool {
        is_na_int_s(self.from_status) && is_na_int_s(self.to_status)
    }
}

impl TransformerUpdate {
    pub fn keeps_topology(&self) -> bool {
        is_na_int_s(self.from_status) && is_na_int_s(self.to_status)
    }
}

impl Branch3Update {
    pub fn keeps_topology(&self) -> bool {
        is_na_int_s(self.status_1) && is_na_int_s(self.status_2) && is_na_int_s(self.status_3)
    }
}

impl SourceUpdate {
    pub fn keeps_topology(&self) -> bool {
        is_na_int_s(self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_updates_change_nothing() {
        let mut status: IntS = 1;
        assert!(!update_status(&mut status, NA_INT_S));
        assert_eq!(status, 1);

        let mut value = 2.5;
        assert!(!update_double(&mut value, f64::NAN));
        assert_eq!(value, 2.5);

        let mut phases = [1.0, 2.0, 3.0];
        assert!(!update_double3(&mut phases, &[f64::NAN; 3]));
        assert_eq!(phases, [1.0, 2.0, 3.0]);
    }

    #[test]
    fn partial_phase_update_touches_only_given_phases() {
        let mut phases = [1.0, 2.0, 3.0];
        assert!(update_double3(&mut phases, &[f64::NAN, 5.0, f64::NAN]));
        assert_eq!(phases, [1.0, 5.0, 3.0]);
    }

    #[test]
    fn same_status_is_not_a_change_but_still_marks_topology() {
        // writing 1 over 1 reports no change
        let mut status: IntS = 1;
        assert!(!update_status(&mut status, 1));
        // the cacheability question is decided by the sentinel, not by the
        // value: a non-sentinel status never keeps the topology cache
        let update = BranchUpdate {
            id: 1,
            from_status: 1,
            to_status: NA_INT_S,
        };
        assert!(!update.keeps_topology());
    }

    #[test]
    fn default_updates_are_all_sentinel() {
        assert!(BranchUpdate::default().keeps_topology());
        assert!(Branch3Update::default().keeps_topology());
        assert!(SourceUpdate::default().keeps_topology());
        assert!(TransformerUpdate::default().keeps_topology());
        assert!(is_na_int_s(LoadGenUpdate::default().status));
    }
}
