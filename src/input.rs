//! Common routines for handling input data.
use crate::horizon::TimeRange;
use crate::model::{Parameters, RawParameters, Setup};
use crate::profile::Profile;
use anyhow::{Context, Result, bail, ensure};
use itertools::Itertools;
use log::info;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;

mod network;
use network::{read_dc_lines, read_lines, read_nodes, read_ntc};
mod plant;
use plant::{read_fuels, read_plants};
mod timeseries;
use timeseries::read_time_series;

const DEMAND_FILE_NAME: &str = "demand.csv";
const AVAILABILITY_FILE_NAME: &str = "availability.csv";
const INFLOWS_FILE_NAME: &str = "inflows.csv";
const PROSUMER_DEMAND_FILE_NAME: &str = "prosumer_demand.csv";

/// Read a series of type `T`s from a CSV file.
///
/// Will raise an error if the file is empty.
///
/// # Arguments
///
/// * `file_path` - Path to the CSV file
pub fn read_csv<'a, T: DeserializeOwned + 'a>(
    file_path: &'a Path,
) -> Result<impl Iterator<Item = T> + 'a> {
    let vec = read_csv_internal(file_path)?;
    if vec.is_empty() {
        bail!("CSV file {} cannot be empty", file_path.display());
    }
    Ok(vec.into_iter())
}

/// Read a series of type `T`s from a CSV file.
///
/// Missing and empty files are treated as having no rows.
///
/// # Arguments
///
/// * `file_path` - Path to the CSV file
pub fn read_csv_optional<'a, T: DeserializeOwned + 'a>(
    file_path: &'a Path,
) -> Result<impl Iterator<Item = T> + 'a> {
    if !file_path.exists() {
        return Ok(Vec::new().into_iter());
    }

    let vec = read_csv_internal(file_path)?;
    Ok(vec.into_iter())
}

fn read_csv_internal<T: DeserializeOwned>(file_path: &Path) -> Result<Vec<T>> {
    let vec = csv::Reader::from_path(file_path)
        .with_context(|| input_err_msg(file_path))?
        .into_deserialize()
        .try_collect()
        .with_context(|| input_err_msg(file_path))?;

    Ok(vec)
}

/// Parse a TOML file at the specified path.
///
/// # Arguments
///
/// * `file_path` - Path to the TOML file
///
/// # Returns
///
/// * The deserialised TOML data or an error if the file could not be read or parsed.
pub fn read_toml<T: DeserializeOwned>(file_path: &Path) -> Result<T> {
    let toml_str = fs::read_to_string(file_path).with_context(|| input_err_msg(file_path))?;
    let toml_data = toml::from_str(&toml_str).with_context(|| input_err_msg(file_path))?;
    Ok(toml_data)
}

/// Format an error message to include the file path. To be used with `anyhow::Context`.
pub fn input_err_msg<P: AsRef<Path>>(file_path: P) -> String {
    format!("Error reading {}", file_path.as_ref().display())
}

/// Read the raw model data from the CSV files in a model directory
pub fn read_raw_parameters(model_dir: &Path, setup: &Setup) -> Result<RawParameters> {
    let horizon = &setup.horizon;
    ensure!(
        horizon.stop >= horizon.start,
        "time horizon stop ({}) is before start ({})",
        horizon.stop,
        horizon.start
    );
    let time = TimeRange::new(horizon.start, horizon.stop);

    let mut nodes = read_nodes(model_dir)?;
    let lines = read_lines(model_dir)?;
    let dc_lines = read_dc_lines(model_dir)?;
    let fuels = read_fuels(model_dir)?;
    let mut plants = read_plants(model_dir)?;
    let ntc = read_ntc(model_dir)?;

    for (node_id, profile) in read_time_series(&model_dir.join(DEMAND_FILE_NAME), &nodes)? {
        nodes[&node_id].demand = profile;
    }
    let file_path = model_dir.join(AVAILABILITY_FILE_NAME);
    for (plant_id, profile) in read_time_series(&file_path, &plants)? {
        plants[&plant_id].availability = profile;
    }
    let file_path = model_dir.join(INFLOWS_FILE_NAME);
    for (plant_id, profile) in read_time_series(&file_path, &plants)? {
        let Some(storage) = plants[&plant_id].storage.as_mut() else {
            bail!(
                "{}: plant {plant_id} has an inflow but no storage",
                input_err_msg(&file_path)
            );
        };
        storage.inflow = profile;
    }
    let prosumer_demand = read_time_series(&model_dir.join(PROSUMER_DEMAND_FILE_NAME), &nodes)?;

    Ok(RawParameters {
        time: Some(time),
        nodes,
        lines,
        dc_lines,
        plants,
        fuels,
        ntc,
        co2_price: Profile::Fixed(setup.costs.co2_price.value()),
        prosumer_demand,
    })
}

/// Read a model from the specified directory.
///
/// # Arguments
///
/// * `model_dir` - Folder containing model configuration files
///
/// # Returns
///
/// The model setup and the derived parameters, or an error.
pub fn load_model<P: AsRef<Path>>(model_dir: P) -> Result<(Setup, Parameters)> {
    let model_dir = model_dir.as_ref();
    let setup = Setup::from_path(model_dir)?;
    let raw = read_raw_parameters(model_dir, &setup)?;
    let parameters = Parameters::new(raw).context("Invalid model parameters")?;
    info!(
        "Loaded {} nodes, {} lines and {} plants",
        parameters.nodes.len(),
        parameters.lines.len(),
        parameters.plants.len()
    );

    Ok((setup, parameters))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[derive(Debug, PartialEq, Deserialize)]
    struct Record {
        id: String,
        value: u32,
    }

    /// Create an example CSV file in dir_path
    fn create_csv_file(dir_path: &Path, contents: &str) -> std::path::PathBuf {
        let file_path = dir_path.join("test.csv");
        let mut file = File::create(&file_path).unwrap();
        writeln!(file, "{contents}").unwrap();
        file_path
    }

    #[test]
    fn test_read_csv() {
        let dir = tempdir().unwrap();
        let file_path = create_csv_file(dir.path(), "id,value\nhello,1\nworld,2\n");
        let records: Vec<Record> = read_csv(&file_path).unwrap().collect();
        assert_eq!(
            records,
            &[
                Record {
                    id: "hello".to_string(),
                    value: 1,
                },
                Record {
                    id: "world".to_string(),
                    value: 2,
                }
            ]
        );

        // File with no data (only column headers)
        let file_path = create_csv_file(dir.path(), "id,value\n");
        assert!(read_csv::<Record>(&file_path).is_err());
        assert!(
            read_csv_optional::<Record>(&file_path)
                .unwrap()
                .next()
                .is_none()
        );

        // Missing file
        let file_path = dir.path().join("missing.csv");
        assert!(read_csv::<Record>(&file_path).is_err());
        assert!(
            read_csv_optional::<Record>(&file_path)
                .unwrap()
                .next()
                .is_none()
        );
    }

    #[test]
    fn test_read_toml() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("test.toml");
        {
            let mut file = File::create(&file_path).unwrap();
            writeln!(file, "id = \"hello\"\nvalue = 1").unwrap();
        }

        assert_eq!(
            read_toml::<Record>(&file_path).unwrap(),
            Record {
                id: "hello".to_string(),
                value: 1,
            }
        );

        {
            let mut file = File::create(&file_path).unwrap();
            writeln!(file, "bad toml syntax").unwrap();
        }
        assert!(read_toml::<Record>(&file_path).is_err());
    }

    #[test]
    fn test_load_demo_model() {
        let model_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("demos/three_node");
        let (setup, parameters) = load_model(&model_dir).unwrap();
        assert_eq!(setup.scenario, "three_node");
        assert_eq!(parameters.nodes.len(), 3);
        assert_eq!(parameters.lines.len(), 3);
        assert_eq!(parameters.time, TimeRange::new(1, 24));
    }
}
