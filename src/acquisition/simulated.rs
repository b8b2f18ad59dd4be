//! simulated.rs
//! Stand-in smart meter used when no Wi-SUN stick is attached.
//! Produces plausible ECHONET Lite values for the low-voltage smart meter properties:
//! - E7 instantaneous power (W), E0/E3 cumulative energy forward/reverse
//! - D3 coefficient, D7 cumulative energy digit count, E1 cumulative energy unit

use log::{debug, info};
use rand::random_range;

use crate::acquisition::{
    producer::{DriverReading, MeterDriver},
    reading::PropertyCode,
};
use crate::error::DriverError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MeterProperty {
    InstantPower,
    EnergyForward,
    EnergyReverse,
    Coefficient,
    EffectiveDigits,
    EnergyUnit,
}

impl MeterProperty {
    fn from_code(code: &PropertyCode) -> Option<Self> {
        match code.as_str() {
            "E7" => Some(MeterProperty::InstantPower),
            "E0" => Some(MeterProperty::EnergyForward),
            "E3" => Some(MeterProperty::EnergyReverse),
            "D3" => Some(MeterProperty::Coefficient),
            "D7" => Some(MeterProperty::EffectiveDigits),
            "E1" => Some(MeterProperty::EnergyUnit),
            _ => None,
        }
    }

    fn base_value(&self) -> f64 {
        match self {
            MeterProperty::InstantPower => 450.0,
            MeterProperty::EnergyForward => 12_345.6,
            MeterProperty::EnergyReverse => 0.0,
            MeterProperty::Coefficient => 1.0,
            MeterProperty::EffectiveDigits => 6.0,
            MeterProperty::EnergyUnit => 1.0,
        }
    }

    fn noise_range(&self) -> (f64, f64) {
        match self {
            MeterProperty::InstantPower => (-200.0, 200.0),
            MeterProperty::EnergyForward => (0.0, 0.2),
            MeterProperty::EnergyReverse => (0.0, 0.01),
            _ => (0.0, 0.0),
        }
    }
}

/// Simulated meter driver.
pub struct SimulatedMeter {
    failure_rate: f64,
    energy_forward: f64,
    energy_reverse: f64,
}

impl SimulatedMeter {
    /// `failure_rate` is the probability in `[0, 1]` that a single property read fails.
    pub fn new(failure_rate: f64) -> Self {
        Self {
            failure_rate: failure_rate.clamp(0.0, 1.0),
            energy_forward: MeterProperty::EnergyForward.base_value(),
            energy_reverse: MeterProperty::EnergyReverse.base_value(),
        }
    }

    fn sample(&mut self, property: MeterProperty) -> String {
        let (lo, hi) = property.noise_range();
        let noise = if hi > lo { random_range(lo..hi) } else { 0.0 };
        match property {
            MeterProperty::InstantPower => {
                format!("{}", (property.base_value() + noise).round() as i64)
            }
            // Cumulative counters only move forward.
            MeterProperty::EnergyForward => {
                self.energy_forward += noise;
                format!("{:.1}", self.energy_forward)
            }
            MeterProperty::EnergyReverse => {
                self.energy_reverse += noise;
                format!("{:.1}", self.energy_reverse)
            }
            _ => format!("{}", property.base_value() as i64),
        }
    }
}

impl MeterDriver for SimulatedMeter {
    fn connect(&mut self) -> Result<(), DriverError> {
        info!("[SimulatedMeter] connected (no hardware attached)");
        Ok(())
    }

    fn acquire(&mut self, properties: &[PropertyCode], push: &mut dyn FnMut(DriverReading)) {
        for code in properties {
            if self.failure_rate > 0.0 && random_range(0.0..1.0) < self.failure_rate {
                push(DriverReading::failed(code.clone(), "no response from meter"));
                continue;
            }
            match MeterProperty::from_code(code) {
                Some(property) => {
                    let raw = self.sample(property);
                    debug!("[SimulatedMeter] {}={}", code, raw);
                    push(DriverReading::ok(code.clone(), raw));
                }
                None => push(DriverReading::failed(code.clone(), "property not supported")),
            }
        }
    }

    fn disconnect(&mut self) {
        info!("[SimulatedMeter] disconnected");
    }
}
