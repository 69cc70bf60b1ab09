//! Leaf sensor pipeline: instruments, record encoding, display and the
//! periodic reporter

pub mod display;
pub mod instruments;
pub mod record;
pub mod reporter;

pub use display::{render, DisplaySink, LogDisplay, DISPLAY_COLS, DISPLAY_ROWS};
pub use instruments::{
    light_volts, ClimateReading, Instruments, Sample, Sampler, SensorFault, ADC_FULL_SCALE,
};
pub use record::{Encoded, ReportPayload, SensorRecord, ERROR_MARKER};
pub use reporter::{CycleOutcome, ReporterConfig, SensorReporter};
