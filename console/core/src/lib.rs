//! Core types shared by the Vantage console protocol crate and the daemon.
//!
//! This crate provides:
//! - Weather scalar aliases and measurement helpers (`measurement`)
//! - The closed protocol error set and `Result` alias (`errors`)
//! - Unit and period enums with compile-time name/value tables (`units`)

mod errors;
mod measurement;
pub mod units;

pub use errors::{ProtocolError, Result};
pub use measurement::{
    Evapotranspiration, Heading, Humidity, LeafWetness, Pressure, Rainfall, SoilMoisture,
    SolarRadiation, Speed, Temperature, UvIndex,
};
pub use units::NamedEnum;
