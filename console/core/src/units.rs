//! Unit and period enums used on the wire, in EEPROM, and on the JSON surface.
//!
//! Every enum carries a compile-time name/value table so the command surface
//! can translate strings in both directions through one pair of generic
//! functions instead of per-enum switch ladders.

/// An enum with a compile-time table of `(name, value)` pairs.
pub trait NamedEnum: Copy + PartialEq + Sized + 'static {
    const TABLE: &'static [(&'static str, Self)];

    /// Look up an enum value by its surface name
    fn from_name(name: &str) -> Option<Self> {
        Self::TABLE
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| *v)
    }

    /// The surface name of an enum value
    fn name(self) -> &'static str {
        Self::TABLE
            .iter()
            .find(|(_, v)| *v == self)
            .map(|(n, _)| *n)
            .unwrap_or("unknown")
    }
}

/// Define an enum with raw wire values and a name table in one shot.
#[macro_export]
macro_rules! name_table {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $value:literal => $label:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        #[repr(u8)]
        $vis enum $name {
            $( $(#[$vmeta])* $variant = $value ),+
        }

        impl $crate::units::NamedEnum for $name {
            const TABLE: &'static [(&'static str, Self)] = &[ $( ($label, $name::$variant) ),+ ];
        }

        impl $name {
            /// Raw wire/EEPROM value
            pub fn raw(self) -> u8 {
                self as u8
            }

            /// Decode a raw wire/EEPROM value
            pub fn from_raw(raw: u8) -> Option<Self> {
                match raw {
                    $( $value => Some($name::$variant), )+
                    _ => None,
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::ProtocolError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                <$name as $crate::units::NamedEnum>::from_name(s)
                    .ok_or_else(|| $crate::ProtocolError::ArgumentInvalid(s.to_string()))
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str($crate::units::NamedEnum::name(*self))
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str($crate::units::NamedEnum::name(*self))
            }
        }
    };
}

name_table! {
    /// How often the console writes an archive record
    pub enum ArchivePeriod {
        OneMinute = 1 => "1",
        FiveMinutes = 5 => "5",
        TenMinutes = 10 => "10",
        FifteenMinutes = 15 => "15",
        ThirtyMinutes = 30 => "30",
        OneHour = 60 => "60",
        TwoHours = 120 => "120",
    }
}

impl ArchivePeriod {
    pub fn minutes(self) -> u32 {
        self.raw() as u32
    }
}

name_table! {
    pub enum BarometerUnits {
        InchesHg = 0 => "inHg",
        Millimeters = 1 => "mm",
        Hectopascals = 2 => "hPa",
        Millibars = 3 => "millibar",
    }
}

name_table! {
    pub enum TemperatureUnits {
        Fahrenheit = 0 => "F",
        FahrenheitTenths = 1 => "F10",
        Celsius = 2 => "C",
        CelsiusTenths = 3 => "C10",
    }
}

name_table! {
    pub enum ElevationUnits {
        Feet = 0 => "feet",
        Meters = 1 => "meters",
    }
}

name_table! {
    pub enum RainUnits {
        Inches = 0 => "inches",
        Millimeters = 1 => "mm",
    }
}

name_table! {
    pub enum WindUnits {
        MilesPerHour = 0 => "mph",
        MetersPerSecond = 1 => "mps",
        KilometersPerHour = 2 => "kph",
        Knots = 3 => "kts",
    }
}

name_table! {
    /// Period selector for the high/low clearing commands
    pub enum ExtremePeriod {
        Daily = 0 => "daily",
        Monthly = 1 => "monthly",
        Yearly = 2 => "yearly",
    }
}

name_table! {
    /// Cumulative values that can be cleared with CLRVAR
    pub enum CumulativeValue {
        DailyRain = 13 => "daily-rain",
        StormRain = 14 => "storm-rain",
        MonthRain = 16 => "month-rain",
        YearRain = 17 => "year-rain",
        MonthEt = 25 => "month-et",
        DayEt = 26 => "day-et",
        YearEt = 27 => "year-et",
    }
}

name_table! {
    /// Tipping-bucket size of the installed rain collector
    pub enum RainCollectorSize {
        PointZeroOneInch = 0 => "0.01-in",
        PointTwoMm = 1 => "0.2-mm",
        PointOneMm = 2 => "0.1-mm",
    }
}

impl RainCollectorSize {
    /// Inches of rain per collector click
    pub fn click_inches(self) -> f64 {
        match self {
            RainCollectorSize::PointZeroOneInch => 0.01,
            RainCollectorSize::PointTwoMm => 0.2 / 25.4,
            RainCollectorSize::PointOneMm => 0.1 / 25.4,
        }
    }
}

name_table! {
    /// Bucketing period for archive summaries
    pub enum SummaryPeriod {
        Day = 0 => "day",
        Week = 1 => "week",
        Month = 2 => "month",
        Year = 3 => "year",
    }
}

name_table! {
    pub enum LampState {
        Off = 0 => "off",
        On = 1 => "on",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_round_trips() {
        for (name, value) in ArchivePeriod::TABLE {
            assert_eq!(ArchivePeriod::from_name(name), Some(*value));
            assert_eq!(value.name(), *name);
        }
    }

    #[test]
    fn raw_round_trips() {
        assert_eq!(ArchivePeriod::from_raw(120), Some(ArchivePeriod::TwoHours));
        assert_eq!(ArchivePeriod::from_raw(7), None);
        assert_eq!(WindUnits::Knots.raw(), 3);
    }

    #[test]
    fn unknown_name_is_an_argument_error() {
        assert!("fortnight".parse::<ArchivePeriod>().is_err());
    }

    #[test]
    fn collector_click_sizes() {
        assert!((RainCollectorSize::PointTwoMm.click_inches() - 0.2 / 25.4).abs() < 1e-9);
        assert_eq!(RainCollectorSize::PointZeroOneInch.click_inches(), 0.01);
    }
}
