//! Mapping between module capabilities and the positional wire format of
//! `getmeasure`.
//!
//! The API answers with bare numeric arrays, one per timestamp, lined up with
//! the comma-joined `type` parameter of the request. [`types_for`] fixes that
//! order and [`decode_row`] relies on it: any drift between the two mislabels
//! every value.

use crate::{
    error::{Error, Result},
    model::{Capability, Measurement, MeasurementType, Scale},
};

/// Current-value type of each capability.
pub(crate) fn current_type(capability: Capability) -> MeasurementType {
    match capability {
        Capability::Temperature => MeasurementType::Temperature,
        Capability::Humidity => MeasurementType::Humidity,
        Capability::Co2 => MeasurementType::Co2,
        Capability::Pressure => MeasurementType::Pressure,
        Capability::Noise => MeasurementType::Noise,
        Capability::Rain => MeasurementType::Rain,
        Capability::WindStrength => MeasurementType::WindStrength,
        Capability::WindAngle => MeasurementType::WindAngle,
        Capability::GustStrength => MeasurementType::GustStrength,
        Capability::GustAngle => MeasurementType::GustAngle,
    }
}

/// Full expansion of a capability at aggregated scales.
fn aggregate_types(capability: Capability) -> &'static [MeasurementType] {
    use MeasurementType::*;
    match capability {
        Capability::Temperature => &[Temperature, MinTemp, MaxTemp, DateMinTemp, DateMaxTemp],
        Capability::Humidity => &[Humidity, MinHum, MaxHum, DateMinHum, DateMaxHum],
        Capability::Co2 => &[Co2, MinCo2, MaxCo2, DateMinCo2, DateMaxCo2],
        Capability::Pressure => &[
            Pressure,
            MinPressure,
            MaxPressure,
            DateMinPressure,
            DateMaxPressure,
        ],
        Capability::Noise => &[Noise, MinNoise, MaxNoise, DateMinNoise, DateMaxNoise],
        Capability::Rain => &[Rain, MinRain, MaxRain, SumRain, DateMinRain, DateMaxRain],
        Capability::WindStrength => &[WindStrength],
        Capability::WindAngle => &[WindAngle],
        Capability::GustStrength => &[GustStrength, DateMinGust, DateMaxGust],
        Capability::GustAngle => &[GustAngle],
    }
}

/// Ordered measurement types to request for `capabilities`.
///
/// One type per capability, in the order the capabilities are given.
pub fn types_for<'a, I>(capabilities: I) -> Vec<MeasurementType>
where
    I: IntoIterator<Item = &'a Capability>,
{
    capabilities.into_iter().copied().map(current_type).collect()
}

/// Like [`types_for`], adding min/max/date aggregates when `scale` supports them.
pub fn types_for_scale<'a, I>(capabilities: I, scale: Scale) -> Vec<MeasurementType>
where
    I: IntoIterator<Item = &'a Capability>,
{
    if !scale.is_aggregated() {
        return types_for(capabilities);
    }

    capabilities
        .into_iter()
        .flat_map(|c| aggregate_types(*c).iter().copied())
        .collect()
}

/// Parse capability names (case-insensitive wire names) into capabilities.
pub fn parse_capabilities<'a, I>(names: I) -> Result<Vec<Capability>>
where
    I: IntoIterator<Item = &'a str>,
{
    names.into_iter().map(Capability::try_from).collect()
}

/// Comma-joined `type` parameter for a `getmeasure` request.
pub fn type_param(types: &[MeasurementType]) -> String {
    types
        .iter()
        .map(MeasurementType::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

/// Label one positional row.
///
/// `types[i]` names `values[i]`. The two must have the same length; a
/// mismatch is never truncated or padded.
pub fn decode_row(
    types: &[MeasurementType],
    timestamp: &str,
    values: &[Option<f64>],
) -> Result<(String, Measurement)> {
    if types.len() != values.len() {
        return Err(Error::ShapeMismatch {
            timestamp: timestamp.to_string(),
            expected: types.len(),
            actual: values.len(),
        });
    }

    let measurement = types.iter().copied().zip(values.iter().copied()).collect();
    Ok((timestamp.to_string(), measurement))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Every subset of the capability enum, in canonical order.
    fn all_capability_sets() -> Vec<Vec<Capability>> {
        let all = Capability::all();
        (0u32..(1 << all.len()))
            .map(|mask| {
                all.iter()
                    .enumerate()
                    .filter(|(i, _)| mask & (1 << i) != 0)
                    .map(|(_, c)| *c)
                    .collect()
            })
            .collect()
    }

    #[test]
    fn every_capability_set_decodes_positionally() {
        for scale in [Scale::HalfHour, Scale::Day] {
            for caps in all_capability_sets() {
                let types = types_for_scale(&caps, scale);
                let values: Vec<Option<f64>> =
                    (0..types.len()).map(|i| Some(i as f64 * 1.5)).collect();

                let (ts, m) = decode_row(&types, "1000", &values).unwrap();

                assert_eq!(ts, "1000");
                assert_eq!(m.keys().copied().collect::<Vec<_>>(), types);
                assert_eq!(m.values().copied().collect::<Vec<_>>(), values);
            }
        }
    }

    #[test]
    fn types_follow_capability_order() {
        let caps = [Capability::Pressure, Capability::Temperature, Capability::Co2];
        assert_eq!(
            types_for(&caps),
            vec![
                MeasurementType::Pressure,
                MeasurementType::Temperature,
                MeasurementType::Co2
            ]
        );
        assert_eq!(type_param(&types_for(&caps)), "pressure,temperature,co2");
    }

    #[test]
    fn aggregated_scale_expands_families() {
        let caps = [Capability::Temperature, Capability::Rain, Capability::GustStrength];
        assert_eq!(
            type_param(&types_for_scale(&caps, Scale::Hour)),
            "temperature,min_temp,max_temp,date_min_temp,date_max_temp,\
             rain,min_rain,max_rain,sum_rain,date_min_rain,date_max_rain,\
             guststrength,date_min_gust,date_max_gust"
        );
        assert_eq!(types_for_scale(&caps, Scale::Max), types_for(&caps));
    }

    #[test]
    fn shorter_row_is_a_shape_mismatch() {
        let types = types_for(&[Capability::Temperature, Capability::Humidity]);
        let err = decode_row(&types, "42", &[Some(21.0)]).unwrap_err();

        assert!(matches!(
            err,
            Error::ShapeMismatch { expected: 2, actual: 1, ref timestamp } if timestamp == "42"
        ));
    }

    #[test]
    fn longer_row_is_a_shape_mismatch() {
        let types = types_for(&[Capability::Temperature]);
        let err = decode_row(&types, "42", &[Some(21.0), Some(50.0)]).unwrap_err();

        assert!(matches!(err, Error::ShapeMismatch { expected: 1, actual: 2, .. }));
    }

    #[test]
    fn nulls_are_kept_as_absent_values() {
        let types = types_for(&[Capability::Temperature, Capability::Humidity]);
        let (_, m) = decode_row(&types, "7", &[None, Some(40.0)]).unwrap();

        assert_eq!(m.get(&MeasurementType::Temperature), Some(&None));
        assert_eq!(m.get(&MeasurementType::Humidity), Some(&Some(40.0)));
    }

    #[test]
    fn unknown_capability_name_is_rejected() {
        let err = parse_capabilities(["temperature", "uv"]).unwrap_err();
        assert!(matches!(err, Error::UnsupportedCapability(ref s) if s == "uv"));

        let caps = parse_capabilities(["Temperature", "CO2"]).unwrap();
        assert_eq!(caps, vec![Capability::Temperature, Capability::Co2]);
    }
}
