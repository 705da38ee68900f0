use serde::Deserialize;
use serde_json::Value;

use crate::{
    codec,
    error::{Error, Result},
    model::{
        Capability, CapabilitySet, Dashboard, MAIN_MODULE_CAPABILITIES, MainModule, Measurement,
        MeasurementType, Module, ModuleKind, Place, StationData, Trend, User,
    },
};

use super::{epoch_to_utc, from_tree};

/// Wire type of a base station.
const MAIN_MODULE_TYPE: &str = "NAMain";

#[derive(Debug, Deserialize)]
struct StationDataDto {
    #[serde(default)]
    devices: Vec<DeviceDto>,
    user: Option<UserDto>,
}

#[derive(Debug, Deserialize)]
struct DeviceDto {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "type")]
    kind: Option<String>,
    station_name: Option<String>,
    module_name: Option<String>,
    firmware: Option<u32>,
    #[serde(default)]
    reachable: bool,
    #[serde(default)]
    co2_calibrating: bool,
    wifi_status: Option<i32>,
    date_setup: Option<i64>,
    last_setup: Option<i64>,
    last_status_update: Option<i64>,
    last_upgrade: Option<i64>,
    #[serde(default)]
    place: PlaceDto,
    #[serde(default)]
    read_only: bool,
    dashboard_data: Option<DashboardDto>,
    #[serde(default)]
    modules: Vec<ModuleDto>,
}

#[derive(Debug, Deserialize)]
struct ModuleDto {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "type")]
    kind: String,
    main_device: Option<String>,
    module_name: Option<String>,
    firmware: Option<u32>,
    battery_percent: Option<u8>,
    rf_status: Option<i32>,
    #[serde(default)]
    reachable: bool,
    last_seen: Option<i64>,
    dashboard_data: Option<DashboardDto>,
}

#[derive(Debug, Default, Deserialize)]
struct PlaceDto {
    altitude: Option<f64>,
    city: Option<String>,
    country: Option<String>,
    timezone: Option<String>,
    location: Option<[f64; 2]>,
}

#[derive(Debug, Default, Deserialize)]
struct DashboardDto {
    time_utc: Option<i64>,
    #[serde(rename = "Temperature")]
    temperature: Option<f64>,
    #[serde(rename = "Humidity")]
    humidity: Option<f64>,
    #[serde(rename = "CO2")]
    co2: Option<f64>,
    #[serde(rename = "Pressure")]
    pressure: Option<f64>,
    #[serde(rename = "AbsolutePressure")]
    absolute_pressure: Option<f64>,
    #[serde(rename = "Noise")]
    noise: Option<f64>,
    #[serde(rename = "Rain")]
    rain: Option<f64>,
    #[serde(rename = "WindStrength")]
    wind_strength: Option<f64>,
    #[serde(rename = "WindAngle")]
    wind_angle: Option<f64>,
    #[serde(rename = "GustStrength")]
    gust_strength: Option<f64>,
    #[serde(rename = "GustAngle")]
    gust_angle: Option<f64>,
    min_temp: Option<f64>,
    max_temp: Option<f64>,
    date_min_temp: Option<f64>,
    date_max_temp: Option<f64>,
    temp_trend: Option<Trend>,
    pressure_trend: Option<Trend>,
}

impl DashboardDto {
    /// Sensor fields in canonical capability order.
    fn sensors(&self) -> [(Capability, Option<f64>); 10] {
        [
            (Capability::Temperature, self.temperature),
            (Capability::Humidity, self.humidity),
            (Capability::Co2, self.co2),
            (Capability::Pressure, self.pressure),
            (Capability::Noise, self.noise),
            (Capability::Rain, self.rain),
            (Capability::WindStrength, self.wind_strength),
            (Capability::WindAngle, self.wind_angle),
            (Capability::GustStrength, self.gust_strength),
            (Capability::GustAngle, self.gust_angle),
        ]
    }

    fn into_domain(self) -> Dashboard {
        let mut readings: Measurement = self
            .sensors()
            .into_iter()
            .filter_map(|(cap, v)| v.map(|v| (codec::current_type(cap), Some(v))))
            .collect();

        let extremes = [
            (MeasurementType::MinTemp, self.min_temp),
            (MeasurementType::MaxTemp, self.max_temp),
            (MeasurementType::DateMinTemp, self.date_min_temp),
            (MeasurementType::DateMaxTemp, self.date_max_temp),
        ];
        for (t, v) in extremes {
            if v.is_some() {
                readings.insert(t, v);
            }
        }

        Dashboard {
            time_utc: epoch_to_utc(self.time_utc),
            readings,
            absolute_pressure: self.absolute_pressure,
            temp_trend: self.temp_trend,
            pressure_trend: self.pressure_trend,
        }
    }
}

#[derive(Debug, Deserialize)]
struct UserDto {
    mail: Option<String>,
    #[serde(default)]
    administrative: AdministrativeDto,
}

#[derive(Debug, Default, Deserialize)]
struct AdministrativeDto {
    lang: Option<String>,
    unit: Option<u8>,
    windunit: Option<u8>,
    pressureunit: Option<u8>,
}

/// Decode a `getstationsdata` body into a fresh station graph.
///
/// Capabilities are inferred from which sensor fields each module reports.
/// A module that reports no dashboard (typically unreachable) is given every
/// capability its kind can have.
pub fn decode_station_data(body: &Value) -> Result<StationData> {
    let dto: StationDataDto = from_tree(body, "station data")?;

    let devices = dto
        .devices
        .into_iter()
        .map(|d| decode_device(body, d))
        .collect::<Result<Vec<_>>>()?;

    let user = dto.user.map(|u| User {
        mail: u.mail,
        lang: u.administrative.lang,
        unit: u.administrative.unit,
        wind_unit: u.administrative.windunit,
        pressure_unit: u.administrative.pressureunit,
    });

    Ok(StationData { devices, user })
}

fn decode_device(body: &Value, d: DeviceDto) -> Result<MainModule> {
    if let Some(kind) = d.kind.as_deref().filter(|k| *k != MAIN_MODULE_TYPE) {
        return Err(Error::malformed(
            format!("device {} has type {kind}, expected {MAIN_MODULE_TYPE}", d.id),
            body,
        ));
    }

    let capabilities = infer_capabilities(
        body,
        &d.id,
        d.dashboard_data.as_ref(),
        MAIN_MODULE_CAPABILITIES,
    )?;

    let modules = d
        .modules
        .into_iter()
        .map(|m| decode_module(body, &d.id, m))
        .collect::<Result<Vec<_>>>()?;

    let measure_time = d.dashboard_data.as_ref().and_then(|db| epoch_to_utc(db.time_utc));

    Ok(MainModule {
        id: d.id,
        station_name: d.station_name,
        module_name: d.module_name,
        firmware: d.firmware,
        reachable: d.reachable,
        co2_calibrating: d.co2_calibrating,
        wifi_status: d.wifi_status,
        date_setup: epoch_to_utc(d.date_setup),
        last_setup: epoch_to_utc(d.last_setup),
        last_status_update: epoch_to_utc(d.last_status_update),
        last_upgrade: epoch_to_utc(d.last_upgrade),
        place: Place {
            altitude: d.place.altitude,
            city: d.place.city,
            country: d.place.country,
            timezone: d.place.timezone,
            location: d.place.location,
        },
        read_only: d.read_only,
        measure_time,
        capabilities,
        dashboard: d.dashboard_data.map(DashboardDto::into_domain),
        modules,
    })
}

fn decode_module(body: &Value, parent_id: &str, m: ModuleDto) -> Result<Module> {
    if let Some(main) = m.main_device.as_deref().filter(|p| *p != parent_id) {
        return Err(Error::malformed(
            format!("module {} is linked to {main} but listed under {parent_id}", m.id),
            body,
        ));
    }

    let kind = ModuleKind::from_wire(&m.kind).ok_or_else(|| {
        Error::malformed(format!("module {} has unknown type {}", m.id, m.kind), body)
    })?;

    let capabilities =
        infer_capabilities(body, &m.id, m.dashboard_data.as_ref(), kind.capabilities())?;

    Ok(Module {
        id: m.id,
        kind,
        name: m.module_name,
        firmware: m.firmware,
        battery_percent: m.battery_percent,
        rf_status: m.rf_status,
        reachable: m.reachable,
        last_seen: epoch_to_utc(m.last_seen),
        capabilities,
        dashboard: m.dashboard_data.map(DashboardDto::into_domain),
    })
}

fn infer_capabilities(
    body: &Value,
    module_id: &str,
    dashboard: Option<&DashboardDto>,
    allowed: &[Capability],
) -> Result<CapabilitySet> {
    let Some(dashboard) = dashboard else {
        return Ok(allowed.iter().copied().collect());
    };

    let mut caps = CapabilitySet::new();
    for (cap, value) in dashboard.sensors() {
        if value.is_none() {
            continue;
        }
        if !allowed.contains(&cap) {
            return Err(Error::malformed(
                format!("module {module_id} reports {cap}, which its type cannot measure"),
                body,
            ));
        }
        caps.insert(cap);
    }

    Ok(caps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn sample_body() -> Value {
        json!({
            "devices": [{
                "_id": "70:ee:50:00:00:01",
                "type": "NAMain",
                "station_name": "Home",
                "module_name": "Living room",
                "firmware": 181,
                "reachable": true,
                "co2_calibrating": false,
                "wifi_status": 52,
                "date_setup": 1600000000,
                "last_status_update": 1700000000,
                "place": {
                    "altitude": 12,
                    "city": "Oslo",
                    "country": "NO",
                    "timezone": "Europe/Oslo",
                    "location": [10.75, 59.91]
                },
                "dashboard_data": {
                    "time_utc": 1700000000,
                    "Temperature": 21.4,
                    "CO2": 612,
                    "Humidity": 44,
                    "Noise": 38,
                    "Pressure": 1012.3,
                    "AbsolutePressure": 1010.9,
                    "min_temp": 20.1,
                    "max_temp": 22.0,
                    "temp_trend": "stable",
                    "pressure_trend": "up"
                },
                "modules": [
                    {
                        "_id": "02:00:00:00:00:01",
                        "type": "NAModule1",
                        "main_device": "70:ee:50:00:00:01",
                        "module_name": "Garden",
                        "battery_percent": 80,
                        "reachable": true,
                        "last_seen": 1700000000,
                        "dashboard_data": { "time_utc": 1700000000, "Temperature": 4.2, "Humidity": 91 }
                    },
                    {
                        "_id": "06:00:00:00:00:01",
                        "type": "NAModule2",
                        "reachable": false
                    },
                    {
                        "_id": "05:00:00:00:00:01",
                        "type": "NAModule3",
                        "reachable": true,
                        "dashboard_data": { "time_utc": 1700000000, "Rain": 0.0, "sum_rain_24": 1.2 }
                    }
                ]
            }],
            "user": {
                "mail": "someone@example.com",
                "administrative": { "lang": "en", "unit": 0, "windunit": 0, "pressureunit": 0 }
            }
        })
    }

    #[test]
    fn decodes_station_tree() {
        let data = decode_station_data(&sample_body()).unwrap();

        assert_eq!(data.devices.len(), 1);
        let main = &data.devices[0];
        assert_eq!(main.station_name.as_deref(), Some("Home"));
        assert_eq!(main.place.location, Some([10.75, 59.91]));
        assert_eq!(
            main.capabilities.iter().copied().collect::<Vec<_>>(),
            MAIN_MODULE_CAPABILITIES.to_vec()
        );

        let ids: Vec<_> = main.modules.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["02:00:00:00:00:01", "06:00:00:00:00:01", "05:00:00:00:00:01"]);

        let dashboard = main.dashboard.as_ref().unwrap();
        assert_eq!(dashboard.readings[&MeasurementType::Co2], Some(612.0));
        assert_eq!(dashboard.readings[&MeasurementType::MinTemp], Some(20.1));
        assert_eq!(dashboard.pressure_trend, Some(Trend::Up));

        assert_eq!(data.user.unwrap().mail.as_deref(), Some("someone@example.com"));
    }

    #[test]
    fn capabilities_follow_present_fields() {
        let data = decode_station_data(&sample_body()).unwrap();
        let modules = &data.devices[0].modules;

        assert_eq!(
            modules[0].capabilities.iter().copied().collect::<Vec<_>>(),
            vec![Capability::Temperature, Capability::Humidity]
        );
        assert_eq!(
            modules[2].capabilities.iter().copied().collect::<Vec<_>>(),
            vec![Capability::Rain]
        );
    }

    #[test]
    fn unreachable_module_gets_full_kind_capabilities() {
        let data = decode_station_data(&sample_body()).unwrap();
        let wind = &data.devices[0].modules[1];

        assert_eq!(wind.kind, ModuleKind::Wind);
        assert!(wind.dashboard.is_none());
        assert_eq!(
            wind.capabilities.iter().copied().collect::<Vec<_>>(),
            ModuleKind::Wind.capabilities().to_vec()
        );
    }

    #[test]
    fn station_lookup_by_module() {
        let data = decode_station_data(&sample_body()).unwrap();

        let station = data.station_of("05:00:00:00:00:01").unwrap();
        assert_eq!(station.id, "70:ee:50:00:00:01");
        assert!(data.station_of("ff:ff").is_none());
    }

    #[test]
    fn field_outside_module_kind_is_malformed() {
        let mut body = sample_body();
        body["devices"][0]["modules"][0]["dashboard_data"]["CO2"] = json!(500);

        let err = decode_station_data(&body).unwrap_err();
        assert!(matches!(err, Error::MalformedResponse { ref message, .. } if message.contains("co2")));
    }

    #[test]
    fn mismatched_parent_link_is_malformed() {
        let mut body = sample_body();
        body["devices"][0]["modules"][0]["main_device"] = json!("70:ee:50:99:99:99");

        let err = decode_station_data(&body).unwrap_err();
        assert!(matches!(err, Error::MalformedResponse { .. }));
    }

    #[test]
    fn unknown_module_type_is_malformed() {
        let mut body = sample_body();
        body["devices"][0]["modules"][1]["type"] = json!("NAModule9");

        let err = decode_station_data(&body).unwrap_err();
        assert!(matches!(err, Error::MalformedResponse { ref message, .. } if message.contains("NAModule9")));
    }

    #[test]
    fn empty_body_has_no_devices() {
        let data = decode_station_data(&json!({})).unwrap();
        assert!(data.devices.is_empty());
        assert!(data.user.is_none());
    }
}
