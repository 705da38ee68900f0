use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;

use crate::{
    codec,
    error::{Error, Result},
    model::{Capability, MeasurementType, Measurements},
};

use super::from_tree;

/// One block of rows in an optimized response.
///
/// The server sends the first timestamp and the spacing, not a timestamp
/// per row.
#[derive(Debug, Deserialize)]
struct MeasureGroup {
    beg_time: Option<i64>,
    step_time: Option<i64>,
    #[serde(default)]
    value: Vec<Vec<Option<f64>>>,
}

/// Decode a `getmeasure` body for a module reporting `capabilities`.
pub fn decode_measurements(body: &Value, capabilities: &[Capability]) -> Result<Measurements> {
    decode_measurements_with_types(body, &codec::types_for(capabilities))
}

/// Decode a `getmeasure` body whose rows line up with `types`.
///
/// Accepts both the optimized shape (array of `{beg_time, step_time, value}`)
/// and the plain shape (object keyed by timestamp). A body without rows
/// decodes to an empty map.
pub fn decode_measurements_with_types(
    body: &Value,
    types: &[MeasurementType],
) -> Result<Measurements> {
    match body {
        Value::Null => Ok(Measurements::new()),
        Value::Array(_) => {
            let groups: Vec<MeasureGroup> = from_tree(body, "measure groups")?;
            decode_groups(body, &groups, types)
        }
        Value::Object(_) => {
            let rows: IndexMap<String, Vec<Option<f64>>> = from_tree(body, "measure rows")?;
            rows.iter()
                .map(|(ts, values)| codec::decode_row(types, ts, values))
                .collect()
        }
        _ => Err(Error::malformed("measure body is neither a list nor a map", body)),
    }
}

fn decode_groups(
    body: &Value,
    groups: &[MeasureGroup],
    types: &[MeasurementType],
) -> Result<Measurements> {
    let mut out = Measurements::new();

    for group in groups {
        if group.value.is_empty() {
            continue;
        }

        let base = group
            .beg_time
            .ok_or_else(|| Error::malformed("measure group without beg_time", body))?;

        let step = match group.step_time {
            Some(step) if step > 0 => step,
            _ if group.value.len() > 1 => {
                return Err(Error::malformed(
                    format!(
                        "{} rows starting at {base} without a positive step_time",
                        group.value.len()
                    ),
                    body,
                ));
            }
            _ => 0,
        };

        for (i, values) in group.value.iter().enumerate() {
            let ts = i64::try_from(i)
                .ok()
                .and_then(|i| i.checked_mul(step))
                .and_then(|offset| base.checked_add(offset))
                .ok_or_else(|| {
                    Error::malformed(
                        format!("timestamp overflow at row {i} of group starting at {base}"),
                        body,
                    )
                })?
                .to_string();
            let (ts, measurement) = codec::decode_row(types, &ts, values)?;
            out.insert(ts, measurement);
        }
    }

    Ok(out)
}
