//! Instrument reads and the last-known-value policy
//!
//! The physical drivers live behind [`Instruments`]. [`Sampler`] turns a set
//! of possibly failing reads into a complete [`Sample`] every cycle.

use thiserror::Error;

/// Full-scale raw value of the 12-bit light ADC
pub const ADC_FULL_SCALE: u16 = 4095;
/// ADC reference voltage
pub const ADC_REF_VOLTS: f64 = 3.3;

/// Convert a raw light reading to volts
pub fn light_volts(raw: u16) -> f64 {
    f64::from(raw.min(ADC_FULL_SCALE)) / f64::from(ADC_FULL_SCALE) * ADC_REF_VOLTS
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{instrument} read failed: {reason}")]
pub struct SensorFault {
    pub instrument: &'static str,
    pub reason: String,
}

impl SensorFault {
    pub fn new(instrument: &'static str, reason: impl Into<String>) -> Self {
        Self {
            instrument,
            reason: reason.into(),
        }
    }
}

/// Temperature in °C and relative humidity in %
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClimateReading {
    pub temp_c: i32,
    pub humidity: i32,
}

/// Sensor hardware of a leaf node
pub trait Instruments: Send + Sync {
    fn read_climate(&mut self) -> Result<ClimateReading, SensorFault>;
    fn read_motion(&mut self) -> Result<bool, SensorFault>;
    /// Raw 12-bit light level
    fn read_light(&mut self) -> Result<u16, SensorFault>;
}

/// One complete set of readings
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Sample {
    pub temp_c: i32,
    pub humidity: i32,
    pub motion: bool,
    pub light_raw: u16,
}

impl Sample {
    pub fn light_volts(&self) -> f64 {
        light_volts(self.light_raw)
    }
}

/// Reads every instrument, substituting the last good value for faults
#[derive(Debug, Default)]
pub struct Sampler {
    last: Sample,
}

impl Sampler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Sample {
        self.last
    }

    /// Always yields a sample; faults are returned alongside it
    pub fn sample(&mut self, instruments: &mut dyn Instruments) -> (Sample, Vec<SensorFault>) {
        let mut faults = Vec::new();
        let mut sample = self.last;

        match instruments.read_climate() {
            Ok(reading) => {
                sample.temp_c = reading.temp_c;
                sample.humidity = reading.humidity;
            }
            Err(fault) => faults.push(fault),
        }
        match instruments.read_motion() {
            Ok(motion) => sample.motion = motion,
            Err(fault) => faults.push(fault),
        }
        match instruments.read_light() {
            Ok(raw) => sample.light_raw = raw.min(ADC_FULL_SCALE),
            Err(fault) => faults.push(fault),
        }

        self.last = sample;
        (sample, faults)
    }
}
