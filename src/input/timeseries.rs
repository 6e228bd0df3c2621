//! Code for reading hourly profiles (demand, availability, inflows) from CSV files.
use super::*;
use indexmap::IndexMap;
use serde::Deserialize;
use std::borrow::Borrow;
use std::hash::Hash;

/// One value of a profile. The ID column is named after what it refers to (`node` or `plant`).
#[derive(PartialEq, Debug, Deserialize)]
struct TimeSeriesRaw {
    #[serde(alias = "node", alias = "plant")]
    id: String,
    timestep: u32,
    value: f64,
}

/// Read hourly profiles from an optional CSV file.
///
/// Every ID must be a key of `known`. Entities without rows keep their fixed values.
pub fn read_time_series<K, V>(
    file_path: &Path,
    known: &IndexMap<K, V>,
) -> Result<IndexMap<K, Profile>>
where
    K: Eq + Hash + Clone + Borrow<str>,
{
    let iter = read_csv_optional(file_path)?;
    read_time_series_from_iter(iter, known).with_context(|| input_err_msg(file_path))
}

fn read_time_series_from_iter<I, K, V>(
    iter: I,
    known: &IndexMap<K, V>,
) -> Result<IndexMap<K, Profile>>
where
    I: Iterator<Item = TimeSeriesRaw>,
    K: Eq + Hash + Clone + Borrow<str>,
{
    let mut series: IndexMap<K, IndexMap<u32, f64>> = IndexMap::new();
    for raw in iter {
        let Some((id, _)) = known.get_key_value(raw.id.as_str()) else {
            bail!("Unknown ID {}", raw.id);
        };
        ensure!(
            raw.value.is_finite(),
            "Invalid value for {} at time step {}",
            raw.id,
            raw.timestep
        );

        let values = series.entry(id.clone()).or_default();
        ensure!(
            values.insert(raw.timestep, raw.value).is_none(),
            "Duplicate entry for {} at time step {}",
            raw.id,
            raw.timestep
        );
    }

    Ok(series
        .into_iter()
        .map(|(id, values)| (id, Profile::Hourly(values)))
        .collect())
}
