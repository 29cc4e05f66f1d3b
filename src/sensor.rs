//! Typed sensor values reported by a Walnut device.

use std::fmt;

/// The sensors a Walnut device exposes.
///
/// Temperature and humidity arrive in advertisements, signal strength is
/// taken from the advertisement RSSI and battery level needs a GATT read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SensorKind {
    Temperature,
    Humidity,
    SignalStrength,
    Battery,
}

/// Unit of a [`SensorReading`] value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Celsius,
    Percentage,
    DecibelMilliwatt,
}

/// Semantic class of a sensor for the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    Temperature,
    Humidity,
    SignalStrength,
    Battery,
}

/// Whether a sensor is a primary measurement or a diagnostic value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityCategory {
    Measurement,
    Diagnostic,
}

impl SensorKind {
    pub const ALL: [SensorKind; 4] = [
        SensorKind::Temperature,
        SensorKind::Humidity,
        SensorKind::SignalStrength,
        SensorKind::Battery,
    ];

    /// Stable snake_case key, used as the output field name.
    pub fn key(self) -> &'static str {
        match self {
            SensorKind::Temperature => "temperature",
            SensorKind::Humidity => "humidity",
            SensorKind::SignalStrength => "signal_strength",
            SensorKind::Battery => "battery",
        }
    }

    /// Human readable sensor name.
    pub fn name(self) -> &'static str {
        match self {
            SensorKind::Temperature => "Temperature",
            SensorKind::Humidity => "Humidity",
            SensorKind::SignalStrength => "Signal Strength",
            SensorKind::Battery => "Battery Level",
        }
    }

    pub fn unit(self) -> Unit {
        match self {
            SensorKind::Temperature => Unit::Celsius,
            SensorKind::Humidity | SensorKind::Battery => Unit::Percentage,
            SensorKind::SignalStrength => Unit::DecibelMilliwatt,
        }
    }

    pub fn device_class(self) -> DeviceClass {
        match self {
            SensorKind::Temperature => DeviceClass::Temperature,
            SensorKind::Humidity => DeviceClass::Humidity,
            SensorKind::SignalStrength => DeviceClass::SignalStrength,
            SensorKind::Battery => DeviceClass::Battery,
        }
    }

    pub fn category(self) -> EntityCategory {
        match self {
            SensorKind::Temperature | SensorKind::Humidity => EntityCategory::Measurement,
            SensorKind::SignalStrength | SensorKind::Battery => EntityCategory::Diagnostic,
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Unit::Celsius => "°C",
            Unit::Percentage => "%",
            Unit::DecibelMilliwatt => "dBm",
        })
    }
}

/// A single decoded sensor value.
///
/// Unit and device class are derived from the kind, so a reading can only be
/// built through the constructors below.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorReading {
    kind: SensorKind,
    value: f64,
}

impl SensorReading {
    fn new(kind: SensorKind, value: f64) -> Self {
        Self { kind, value }
    }

    /// Temperature in °C.
    pub fn temperature(celsius: f64) -> Self {
        Self::new(SensorKind::Temperature, celsius)
    }

    /// Relative humidity in percent.
    pub fn humidity(percent: f64) -> Self {
        Self::new(SensorKind::Humidity, percent)
    }

    /// Advertisement RSSI in dBm.
    pub fn signal_strength(rssi: i16) -> Self {
        Self::new(SensorKind::SignalStrength, f64::from(rssi))
    }

    /// Battery level in percent, taken as-is from the characteristic byte.
    pub fn battery(percent: u8) -> Self {
        Self::new(SensorKind::Battery, f64::from(percent))
    }

    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn unit(&self) -> Unit {
        self.kind.unit()
    }

    pub fn device_class(&self) -> DeviceClass {
        self.kind.device_class()
    }
}

impl fmt::Display for SensorReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}{}", self.kind, self.value, self.unit())
    }
}
