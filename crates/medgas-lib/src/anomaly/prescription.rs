//! Prescriptive remediation for detected anomalies
//!
//! A fixed rule table maps `(anomaly type, severity)` to an advisory action and
//! the kind of actuator it applies to. The concrete actuator is picked from a
//! catalog, scoped to the hospital and plant the anomaly came from. A missing
//! mapping or an empty scope yields no prescription; the alert is still raised.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::detector::{FLOW_SURGE, PRESSURE_DROP, TEMPERATURE_RISE};
use crate::models::{Anomaly, Prescription, Severity};

/// Kinds of actuators the actuation layer exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActuatorKind {
    Valve,
    Pump,
    Fan,
}

/// An actuator known to the plant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actuator {
    pub id: String,
    pub name: String,
    pub kind: ActuatorKind,
    pub hospital_id: String,
    pub plant_id: String,
}

impl Actuator {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        kind: ActuatorKind,
        hospital_id: impl Into<String>,
        plant_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            hospital_id: hospital_id.into(),
            plant_id: plant_id.into(),
        }
    }
}

/// Ordered list of actuators, searched in insertion order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActuatorCatalog {
    actuators: Vec<Actuator>,
}

impl ActuatorCatalog {
    pub fn new(actuators: Vec<Actuator>) -> Self {
        Self { actuators }
    }

    /// Reference plant: two oxygen valves, a circulation pump and an exhaust fan
    pub fn reference_plant(hospital_id: &str, plant_id: &str) -> Self {
        Self::new(vec![
            Actuator::new("VALV-01", "Main O2 Valve", ActuatorKind::Valve, hospital_id, plant_id),
            Actuator::new("VALV-02", "Backup O2 Valve", ActuatorKind::Valve, hospital_id, plant_id),
            Actuator::new("PUMP-01", "Circulation Pump", ActuatorKind::Pump, hospital_id, plant_id),
            Actuator::new("FAN-01", "Exhaust Fan", ActuatorKind::Fan, hospital_id, plant_id),
        ])
    }

    /// First actuator of `kind` in the given hospital and plant
    pub fn select(&self, kind: ActuatorKind, hospital_id: &str, plant_id: &str) -> Option<&Actuator> {
        self.actuators
            .iter()
            .find(|a| a.kind == kind && a.hospital_id == hospital_id && a.plant_id == plant_id)
    }
}

/// One row of the prescription table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrescriptionRule {
    pub action: String,
    pub actuator_kind: ActuatorKind,
    pub rationale: String,
}

impl PrescriptionRule {
    fn new(action: &str, actuator_kind: ActuatorKind, rationale: &str) -> Self {
        Self {
            action: action.to_string(),
            actuator_kind,
            rationale: rationale.to_string(),
        }
    }
}

/// Deterministic `(type, severity)` lookup
#[derive(Debug, Clone)]
pub struct PrescriptionMapper {
    rules: HashMap<(String, Severity), PrescriptionRule>,
    catalog: ActuatorCatalog,
}

impl PrescriptionMapper {
    /// Mapper with no rules over the given catalog
    pub fn new(catalog: ActuatorCatalog) -> Self {
        Self {
            rules: HashMap::new(),
            catalog,
        }
    }

    /// Default rule table over the given catalog
    pub fn with_default_rules(catalog: ActuatorCatalog) -> Self {
        let close_valve = PrescriptionRule::new(
            "close_valve_partial",
            ActuatorKind::Valve,
            "Sustained pressure drop with constant flow detected",
        );
        let reduce_pump = PrescriptionRule::new(
            "reduce_pump_speed",
            ActuatorKind::Pump,
            "Flow surging above the supply envelope",
        );
        let increase_fan = PrescriptionRule::new(
            "increase_exhaust_fan",
            ActuatorKind::Fan,
            "Gas temperature rising beyond the safe band",
        );

        let mut mapper = Self::new(catalog);
        for severity in [Severity::High, Severity::Critical] {
            mapper = mapper
                .with_rule(PRESSURE_DROP, severity, close_valve.clone())
                .with_rule(FLOW_SURGE, severity, reduce_pump.clone())
                .with_rule(TEMPERATURE_RISE, severity, increase_fan.clone());
        }
        mapper
    }

    pub fn with_rule(
        mut self,
        anomaly_type: &str,
        severity: Severity,
        rule: PrescriptionRule,
    ) -> Self {
        self.rules.insert((anomaly_type.to_string(), severity), rule);
        self
    }

    /// Look up the remediation for an anomaly
    pub fn prescribe(&self, anomaly: &Anomaly) -> Option<Prescription> {
        let rule = self
            .rules
            .get(&(anomaly.anomaly_type.clone(), anomaly.severity))?;

        let actuator = self.catalog.select(
            rule.actuator_kind,
            &anomaly.context.hospital_id,
            &anomaly.context.plant_id,
        )?;

        Some(Prescription {
            action: rule.action.clone(),
            target_actuator_id: actuator.id.clone(),
            rationale: rule.rationale.clone(),
        })
    }
}

impl Default for PrescriptionMapper {
    fn default() -> Self {
        Self::with_default_rules(ActuatorCatalog::reference_plant("HSP-001", "OXI-A"))
    }
}
