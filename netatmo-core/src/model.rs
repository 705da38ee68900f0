use std::fmt;

use chrono::{DateTime, Utc};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A sensing ability a module declares.
///
/// Declaration order is the canonical order used when a capability set is
/// built from a station response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Capability {
    Temperature,
    Humidity,
    Co2,
    Pressure,
    Noise,
    Rain,
    WindStrength,
    WindAngle,
    GustStrength,
    GustAngle,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Temperature => "temperature",
            Capability::Humidity => "humidity",
            Capability::Co2 => "co2",
            Capability::Pressure => "pressure",
            Capability::Noise => "noise",
            Capability::Rain => "rain",
            Capability::WindStrength => "windstrength",
            Capability::WindAngle => "windangle",
            Capability::GustStrength => "guststrength",
            Capability::GustAngle => "gustangle",
        }
    }

    pub const fn all() -> &'static [Capability] {
        &[
            Capability::Temperature,
            Capability::Humidity,
            Capability::Co2,
            Capability::Pressure,
            Capability::Noise,
            Capability::Rain,
            Capability::WindStrength,
            Capability::WindAngle,
            Capability::GustStrength,
            Capability::GustAngle,
        ]
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for Capability {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let lower = value.to_lowercase();

        Capability::all()
            .iter()
            .copied()
            .find(|c| c.as_str() == lower)
            .ok_or_else(|| Error::UnsupportedCapability(value.to_string()))
    }
}

/// Ordered, duplicate-free set of capabilities attached to a module.
pub type CapabilitySet = IndexSet<Capability>;

/// A requestable measurement field, named by its wire code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementType {
    Temperature,
    MinTemp,
    MaxTemp,
    DateMinTemp,
    DateMaxTemp,
    Humidity,
    MinHum,
    MaxHum,
    DateMinHum,
    DateMaxHum,
    Co2,
    MinCo2,
    MaxCo2,
    DateMinCo2,
    DateMaxCo2,
    Pressure,
    MinPressure,
    MaxPressure,
    DateMinPressure,
    DateMaxPressure,
    Noise,
    MinNoise,
    MaxNoise,
    DateMinNoise,
    DateMaxNoise,
    Rain,
    MinRain,
    MaxRain,
    SumRain,
    DateMinRain,
    DateMaxRain,
    #[serde(rename = "windstrength")]
    WindStrength,
    #[serde(rename = "windangle")]
    WindAngle,
    #[serde(rename = "guststrength")]
    GustStrength,
    #[serde(rename = "gustangle")]
    GustAngle,
    DateMinGust,
    DateMaxGust,
}

impl MeasurementType {
    pub fn as_str(&self) -> &'static str {
        use MeasurementType::*;
        match self {
            Temperature => "temperature",
            MinTemp => "min_temp",
            MaxTemp => "max_temp",
            DateMinTemp => "date_min_temp",
            DateMaxTemp => "date_max_temp",
            Humidity => "humidity",
            MinHum => "min_hum",
            MaxHum => "max_hum",
            DateMinHum => "date_min_hum",
            DateMaxHum => "date_max_hum",
            Co2 => "co2",
            MinCo2 => "min_co2",
            MaxCo2 => "max_co2",
            DateMinCo2 => "date_min_co2",
            DateMaxCo2 => "date_max_co2",
            Pressure => "pressure",
            MinPressure => "min_pressure",
            MaxPressure => "max_pressure",
            DateMinPressure => "date_min_pressure",
            DateMaxPressure => "date_max_pressure",
            Noise => "noise",
            MinNoise => "min_noise",
            MaxNoise => "max_noise",
            DateMinNoise => "date_min_noise",
            DateMaxNoise => "date_max_noise",
            Rain => "rain",
            MinRain => "min_rain",
            MaxRain => "max_rain",
            SumRain => "sum_rain",
            DateMinRain => "date_min_rain",
            DateMaxRain => "date_max_rain",
            WindStrength => "windstrength",
            WindAngle => "windangle",
            GustStrength => "guststrength",
            GustAngle => "gustangle",
            DateMinGust => "date_min_gust",
            DateMaxGust => "date_max_gust",
        }
    }

    pub const fn all() -> &'static [MeasurementType] {
        use MeasurementType::*;
        &[
            Temperature,
            MinTemp,
            MaxTemp,
            DateMinTemp,
            DateMaxTemp,
            Humidity,
            MinHum,
            MaxHum,
            DateMinHum,
            DateMaxHum,
            Co2,
            MinCo2,
            MaxCo2,
            DateMinCo2,
            DateMaxCo2,
            Pressure,
            MinPressure,
            MaxPressure,
            DateMinPressure,
            DateMaxPressure,
            Noise,
            MinNoise,
            MaxNoise,
            DateMinNoise,
            DateMaxNoise,
            Rain,
            MinRain,
            MaxRain,
            SumRain,
            DateMinRain,
            DateMaxRain,
            WindStrength,
            WindAngle,
            GustStrength,
            GustAngle,
            DateMinGust,
            DateMaxGust,
        ]
    }
}

impl fmt::Display for MeasurementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for MeasurementType {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let lower = value.to_lowercase();

        MeasurementType::all()
            .iter()
            .copied()
            .find(|t| t.as_str() == lower)
            .ok_or_else(|| Error::UnsupportedCapability(value.to_string()))
    }
}

/// Values reported for one instant. `None` means the server sent `null`.
pub type Measurement = IndexMap<MeasurementType, Option<f64>>;

/// Measurements keyed by epoch-seconds timestamp, in server order.
pub type Measurements = IndexMap<String, Measurement>;

/// Time resolution of a measure request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Scale {
    #[serde(rename = "max")]
    Max,
    #[default]
    #[serde(rename = "30min")]
    HalfHour,
    #[serde(rename = "1hour")]
    Hour,
    #[serde(rename = "3hours")]
    ThreeHours,
    #[serde(rename = "1day")]
    Day,
    #[serde(rename = "1week")]
    Week,
    #[serde(rename = "1month")]
    Month,
}

impl Scale {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scale::Max => "max",
            Scale::HalfHour => "30min",
            Scale::Hour => "1hour",
            Scale::ThreeHours => "3hours",
            Scale::Day => "1day",
            Scale::Week => "1week",
            Scale::Month => "1month",
        }
    }

    pub const fn all() -> &'static [Scale] {
        &[
            Scale::Max,
            Scale::HalfHour,
            Scale::Hour,
            Scale::ThreeHours,
            Scale::Day,
            Scale::Week,
            Scale::Month,
        ]
    }

    /// Whether min/max/date aggregates can be requested at this scale.
    pub fn is_aggregated(&self) -> bool {
        !matches!(self, Scale::Max | Scale::HalfHour)
    }
}

impl fmt::Display for Scale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for Scale {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let lower = value.to_lowercase();

        Scale::all()
            .iter()
            .copied()
            .find(|s| s.as_str() == lower)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "Unknown scale '{value}'. Supported scales: max, 30min, 1hour, 3hours, 1day, 1week, 1month."
                )
            })
    }
}

/// Parameters of a `getmeasure` call.
#[derive(Debug, Clone)]
pub struct MeasureRequest {
    pub device_id: String,
    pub module_id: String,
    pub capabilities: CapabilitySet,
    pub scale: Scale,
    pub date_begin: Option<DateTime<Utc>>,
    pub date_end: Option<DateTime<Utc>>,
    pub limit: u32,
    pub optimize: bool,
    pub real_time: bool,
}

impl MeasureRequest {
    pub fn new(
        device_id: impl Into<String>,
        module_id: impl Into<String>,
        capabilities: CapabilitySet,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            module_id: module_id.into(),
            capabilities,
            scale: Scale::default(),
            date_begin: None,
            date_end: None,
            limit: 1024,
            optimize: true,
            real_time: false,
        }
    }

    pub fn with_scale(mut self, scale: Scale) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_range(mut self, begin: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        self.date_begin = begin;
        self.date_end = end;
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_optimize(mut self, optimize: bool) -> Self {
        self.optimize = optimize;
        self
    }

    pub fn with_real_time(mut self, real_time: bool) -> Self {
        self.real_time = real_time;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    Stable,
}

/// Latest readings a module pushed to the dashboard.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dashboard {
    pub time_utc: Option<DateTime<Utc>>,
    pub readings: Measurement,
    pub absolute_pressure: Option<f64>,
    pub temp_trend: Option<Trend>,
    pub pressure_trend: Option<Trend>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub altitude: Option<f64>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub timezone: Option<String>,
    /// `[longitude, latitude]`
    pub location: Option<[f64; 2]>,
}

/// Kind of a wireless sub-module, by its wire type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModuleKind {
    #[serde(rename = "NAModule1")]
    Outdoor,
    #[serde(rename = "NAModule2")]
    Wind,
    #[serde(rename = "NAModule3")]
    Rain,
    #[serde(rename = "NAModule4")]
    Indoor,
}

impl ModuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleKind::Outdoor => "NAModule1",
            ModuleKind::Wind => "NAModule2",
            ModuleKind::Rain => "NAModule3",
            ModuleKind::Indoor => "NAModule4",
        }
    }

    pub fn from_wire(code: &str) -> Option<Self> {
        match code {
            "NAModule1" => Some(ModuleKind::Outdoor),
            "NAModule2" => Some(ModuleKind::Wind),
            "NAModule3" => Some(ModuleKind::Rain),
            "NAModule4" => Some(ModuleKind::Indoor),
            _ => None,
        }
    }

    /// Capabilities a module of this kind can report.
    pub fn capabilities(&self) -> &'static [Capability] {
        match self {
            ModuleKind::Outdoor => &[Capability::Temperature, Capability::Humidity],
            ModuleKind::Wind => &[
                Capability::WindStrength,
                Capability::WindAngle,
                Capability::GustStrength,
                Capability::GustAngle,
            ],
            ModuleKind::Rain => &[Capability::Rain],
            ModuleKind::Indoor => &[Capability::Temperature, Capability::Humidity, Capability::Co2],
        }
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capabilities of the base station itself (`NAMain`).
pub const MAIN_MODULE_CAPABILITIES: &[Capability] = &[
    Capability::Temperature,
    Capability::Humidity,
    Capability::Co2,
    Capability::Pressure,
    Capability::Noise,
];

/// A wireless module attached to a station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub id: String,
    pub kind: ModuleKind,
    pub name: Option<String>,
    pub firmware: Option<u32>,
    pub battery_percent: Option<u8>,
    pub rf_status: Option<i32>,
    pub reachable: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub capabilities: CapabilitySet,
    pub dashboard: Option<Dashboard>,
}

/// A base station and the modules linked to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MainModule {
    pub id: String,
    pub station_name: Option<String>,
    pub module_name: Option<String>,
    pub firmware: Option<u32>,
    pub reachable: bool,
    pub co2_calibrating: bool,
    pub wifi_status: Option<i32>,
    pub date_setup: Option<DateTime<Utc>>,
    pub last_setup: Option<DateTime<Utc>>,
    pub last_status_update: Option<DateTime<Utc>>,
    pub last_upgrade: Option<DateTime<Utc>>,
    pub place: Place,
    pub read_only: bool,
    pub measure_time: Option<DateTime<Utc>>,
    pub capabilities: CapabilitySet,
    pub dashboard: Option<Dashboard>,
    pub modules: Vec<Module>,
}

impl MainModule {
    /// Look up this station or one of its modules by id, returning its capabilities.
    pub fn capabilities_of(&self, module_id: &str) -> Option<&CapabilitySet> {
        if self.id == module_id {
            return Some(&self.capabilities);
        }
        self.modules
            .iter()
            .find(|m| m.id == module_id)
            .map(|m| &m.capabilities)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub mail: Option<String>,
    pub lang: Option<String>,
    pub unit: Option<u8>,
    pub wind_unit: Option<u8>,
    pub pressure_unit: Option<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StationData {
    pub devices: Vec<MainModule>,
    pub user: Option<User>,
}

impl StationData {
    /// Find the station owning `module_id` (the station itself or one of its modules).
    pub fn station_of(&self, module_id: &str) -> Option<&MainModule> {
        self.devices
            .iter()
            .find(|d| d.capabilities_of(module_id).is_some())
    }
}
