//! Synthetic instruments for simulated leaves

use crate::sensor::{ClimateReading, Instruments, SensorFault, ADC_FULL_SCALE};

/// Deterministic readings that drift slowly, with a periodic climate fault
///
/// The DHT-class sensors these stand in for miss a read now and then; every
/// `fault_every`-th climate read fails so the last-known-value path runs in
/// simulation too.
#[derive(Debug, Clone)]
pub struct SimInstruments {
    seed: u32,
    tick: u32,
    fault_every: u32,
}

impl SimInstruments {
    pub fn new(seed: u32) -> Self {
        Self {
            seed,
            tick: 0,
            fault_every: 11,
        }
    }

    /// 0 disables faults
    pub fn with_fault_every(mut self, fault_every: u32) -> Self {
        self.fault_every = fault_every;
        self
    }

    fn phase(&self) -> u32 {
        self.tick.wrapping_add(self.seed)
    }
}

impl Instruments for SimInstruments {
    fn read_climate(&mut self) -> Result<ClimateReading, SensorFault> {
        self.tick = self.tick.wrapping_add(1);
        if self.fault_every > 0 && self.tick % self.fault_every == 0 {
            return Err(SensorFault::new("dht11", "no response"));
        }
        let phase = self.phase();
        Ok(ClimateReading {
            temp_c: 22 + i32::try_from(phase % 6).unwrap_or(0),
            humidity: 50 + i32::try_from(phase % 11).unwrap_or(0),
        })
    }

    fn read_motion(&mut self) -> Result<bool, SensorFault> {
        Ok(self.phase() % 7 == 0)
    }

    fn read_light(&mut self) -> Result<u16, SensorFault> {
        let step = u16::try_from(self.phase() % 32).unwrap_or(0);
        Ok((300 + step * 100).min(ADC_FULL_SCALE))
    }
}
