//! Weather scalar aliases.
//!
//! Every decoded scalar is carried as an `Option`: the console marks missing
//! sensors with field-specific "dashed" raw values, and a dashed field decodes
//! to `None` rather than an error. JSON rendering skips absent values, so the
//! decoder's sentinel knowledge is the single place that validity lives.

/// Degrees Fahrenheit
pub type Temperature = f64;
/// Inches of mercury
pub type Pressure = f64;
/// Percent relative humidity
pub type Humidity = f64;
/// Miles per hour
pub type Speed = f64;
/// Compass degrees, 0 = north
pub type Heading = f64;
/// UV index, unitless
pub type UvIndex = f64;
/// Watts per square meter
pub type SolarRadiation = f64;
/// Inches
pub type Rainfall = f64;
/// Inches
pub type Evapotranspiration = f64;
/// Leaf wetness scale 0..15
pub type LeafWetness = u8;
/// Soil moisture in centibars
pub type SoilMoisture = u8;
