//! The module responsible for assembling result tables and writing them to disk.
use crate::error::DispatchError;
use crate::horizon::TimeRange;
use crate::id::{AreaID, LineID, NodeID, PlantID, ZoneID};
use crate::model::Parameters;
use crate::simulation::market::{BalanceKey, MarketOutcome};
use crate::simulation::redispatch::RedispatchOutcome;
use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub mod metadata;

/// The root folder in which model-specific output folders will be created
const OUTPUT_DIRECTORY_ROOT: &str = "gridmarket_results";

const GENERATION_FILE_NAME: &str = "generation.csv";
const STORAGE_FILE_NAME: &str = "storage.csv";
const BALANCE_FILE_NAME: &str = "balance.csv";
const EXCHANGE_FILE_NAME: &str = "exchange.csv";
const LINE_FLOW_FILE_NAME: &str = "line_flow.csv";
const PROSUMERS_FILE_NAME: &str = "prosumers.csv";
const PRICES_FILE_NAME: &str = "prices.csv";
const REDISPATCH_GENERATION_FILE_NAME: &str = "redispatch_generation.csv";
const REDISPATCH_STORAGE_FILE_NAME: &str = "redispatch_storage.csv";
const REDISPATCH_CURTAILMENT_FILE_NAME: &str = "redispatch_curtailment.csv";

/// Get the model name from the specified directory path
pub fn get_output_dir(model_dir: &Path) -> Result<PathBuf> {
    // Get the model name from the dir path. This ends up being convoluted because we need to check
    // for all possible errors. Ugh.
    let model_dir = model_dir
        .canonicalize() // canonicalise in case the user has specified "."
        .context("Could not resolve path to model")?;

    let model_name = model_dir
        .file_name()
        .context("Model cannot be in root folder")?
        .to_str()
        .context("Invalid chars in model dir name")?;

    // Construct path
    Ok([OUTPUT_DIRECTORY_ROOT, model_name].iter().collect())
}

/// Create a new output directory for the model.
///
/// A non-empty existing directory is only reused if `allow_overwrite` is set, in which case its
/// contents are deleted first.
///
/// # Returns
///
/// Whether an existing directory was overwritten
pub fn create_output_directory(output_dir: &Path, allow_overwrite: bool) -> Result<bool> {
    let overwrite = if let Ok(mut it) = fs::read_dir(output_dir) {
        if it.next().is_none() {
            // Empty folder; nothing to do
            return Ok(false);
        }

        ensure!(
            allow_overwrite,
            "Output folder already exists and is not empty. Please delete the folder or pass the \
            --overwrite command-line option."
        );

        fs::remove_dir_all(output_dir)?;
        true
    } else {
        false
    };

    // Try to create the directory, with parents
    fs::create_dir_all(output_dir)?;

    Ok(overwrite)
}

/// A row of the generation table
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GenerationRow {
    /// Time step
    pub timestep: u32,
    /// Plant
    pub plant_id: PlantID,
    /// Node of the plant
    pub node_id: NodeID,
    /// Day-ahead output
    pub generation: f64,
}

/// A row of the storage table
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StorageRow {
    /// Time step
    pub timestep: u32,
    /// Storage plant
    pub plant_id: PlantID,
    /// Day-ahead discharge
    pub discharge: f64,
    /// Day-ahead charging
    pub charge: f64,
    /// Level at the end of the time step
    pub level: f64,
}

/// A row of the nodal balance table
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BalanceRow {
    /// Time step
    pub timestep: u32,
    /// Node
    pub node_id: NodeID,
    /// Output minus charging of grid plants
    pub supply: f64,
    /// Net sales of prosumers to the grid
    pub prosumer_exchange: f64,
    /// Curtailed infeed
    pub curtailment: f64,
    /// Unserved demand
    pub lost_load: f64,
    /// Demand met by the grid
    pub demand: f64,
    /// Net injection into the network
    pub position: f64,
}

/// A row of the exchange table
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ExchangeRow {
    /// Time step
    pub timestep: u32,
    /// Exporting zone
    pub zone_from: ZoneID,
    /// Importing zone
    pub zone_to: ZoneID,
    /// Exchanged energy
    pub exchange: f64,
}

/// A row of the line flow table
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LineFlowRow {
    /// Time step
    pub timestep: u32,
    /// AC line
    pub line_id: LineID,
    /// Flow implied by the day-ahead market
    pub market_flow: f64,
    /// Flow after redispatch, if redispatch was run
    pub redispatch_flow: Option<f64>,
    /// Line capacity
    pub capacity: f64,
}

/// A row of the prosumer table
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProsumerRow {
    /// Time step
    pub timestep: u32,
    /// Node
    pub node_id: NodeID,
    /// Energy bought from the grid
    pub buy: f64,
    /// Energy sold to the grid
    pub sell: f64,
}

/// A row of the price table
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PriceRow {
    /// Time step
    pub timestep: u32,
    /// `area` or `prosumer`
    pub balance: String,
    /// The zone, node or prosumer node the price applies to
    pub area_id: AreaID,
    /// Dual of the balance row
    pub price: f64,
}

/// A row of the redispatch generation table
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RedispatchGenerationRow {
    /// Time step
    pub timestep: u32,
    /// Plant
    pub plant_id: PlantID,
    /// Extra output
    pub up: f64,
    /// Reduced output
    pub down: f64,
}

/// A row of the redispatch storage table
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RedispatchStorageRow {
    /// Time step
    pub timestep: u32,
    /// Storage plant
    pub plant_id: PlantID,
    /// Extra discharge
    pub discharge: f64,
    /// Extra charging
    pub charge: f64,
    /// Deviation of the level from the day-ahead schedule
    pub deviation: f64,
}

/// A row of the redispatch curtailment table
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RedispatchCurtailmentRow {
    /// Time step
    pub timestep: u32,
    /// Node
    pub node_id: NodeID,
    /// Curtailment after redispatch
    pub curtailment: f64,
    /// Curtailment scheduled by the market
    pub market_curtailment: f64,
}

/// The named result tables of one sub-horizon
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultTables {
    /// Day-ahead generation
    pub generation: Vec<GenerationRow>,
    /// Day-ahead storage operation
    pub storage: Vec<StorageRow>,
    /// Nodal balance
    pub balance: Vec<BalanceRow>,
    /// Exchange between zones
    pub exchange: Vec<ExchangeRow>,
    /// AC line flows
    pub line_flow: Vec<LineFlowRow>,
    /// Prosumer trade with the grid
    pub prosumers: Vec<ProsumerRow>,
    /// Balance duals
    pub prices: Vec<PriceRow>,
    /// Redispatch of plants
    pub redispatch_generation: Vec<RedispatchGenerationRow>,
    /// Redispatch of storages
    pub redispatch_storage: Vec<RedispatchStorageRow>,
    /// Redispatch curtailment
    pub redispatch_curtailment: Vec<RedispatchCurtailmentRow>,
}

impl ResultTables {
    /// Assemble the tables from the solved stages
    pub fn new(
        parameters: &Parameters,
        market: &MarketOutcome,
        redispatch: Option<&RedispatchOutcome>,
    ) -> Result<Self, DispatchError> {
        let mut tables = Self::default();

        for ((plant_id, t), &generation) in &market.generation {
            let plant = parameters
                .plants
                .get(plant_id)
                .ok_or_else(|| DispatchError::data_contract(plant_id, "unknown plant"))?;
            if plant.is_storage() {
                let key = (plant_id.clone(), *t);
                tables.storage.push(StorageRow {
                    timestep: *t,
                    plant_id: plant_id.clone(),
                    discharge: generation,
                    charge: market.charge.get(&key).copied().unwrap_or(0.0),
                    level: market.level.get(&key).copied().unwrap_or(0.0),
                });
            }
            tables.generation.push(GenerationRow {
                timestep: *t,
                plant_id: plant_id.clone(),
                node_id: plant.node.clone(),
                generation,
            });
        }

        for ((node_id, t), schedule) in &market.nodal {
            tables.balance.push(BalanceRow {
                timestep: *t,
                node_id: node_id.clone(),
                supply: schedule.supply,
                prosumer_exchange: schedule.prosumer_exchange,
                curtailment: schedule.curtailment,
                lost_load: schedule.lost_load,
                demand: schedule.demand,
                position: schedule.position(),
            });
        }

        tables.exchange = market
            .exchange
            .iter()
            .map(|((zone_from, zone_to, t), &exchange)| ExchangeRow {
                timestep: *t,
                zone_from: zone_from.clone(),
                zone_to: zone_to.clone(),
                exchange,
            })
            .collect();

        for (key, &market_flow) in &market.line_flows {
            let (line_id, t) = key;
            let capacity = parameters
                .lines
                .get(line_id)
                .ok_or_else(|| DispatchError::data_contract(line_id, "unknown line"))?
                .capacity
                .value();
            tables.line_flow.push(LineFlowRow {
                timestep: *t,
                line_id: line_id.clone(),
                market_flow,
                redispatch_flow: redispatch.and_then(|r| r.line_flows.get(key).copied()),
                capacity,
            });
        }

        tables.prosumers = market
            .buy
            .iter()
            .map(|(key, &buy)| ProsumerRow {
                timestep: key.1,
                node_id: key.0.clone(),
                buy,
                sell: market.sell.get(key).copied().unwrap_or(0.0),
            })
            .collect();

        tables.prices = market
            .prices
            .iter()
            .map(|(key, &price)| {
                let (balance, area_id, t) = match key {
                    BalanceKey::Area(area, t) => ("area", area.clone(), *t),
                    BalanceKey::Prosumer(node, t) => ("prosumer", node.into(), *t),
                };
                PriceRow {
                    timestep: t,
                    balance: balance.into(),
                    area_id,
                    price,
                }
            })
            .collect();

        if let Some(redispatch) = redispatch {
            tables.add_redispatch(market, redispatch);
        }

        Ok(tables)
    }

    fn add_redispatch(&mut self, market: &MarketOutcome, redispatch: &RedispatchOutcome) {
        self.redispatch_generation = redispatch
            .up
            .iter()
            .map(|(key, &up)| RedispatchGenerationRow {
                timestep: key.1,
                plant_id: key.0.clone(),
                up,
                down: redispatch.down.get(key).copied().unwrap_or(0.0),
            })
            .collect();

        self.redispatch_storage = redispatch
            .storage_up
            .iter()
            .map(|(key, &discharge)| RedispatchStorageRow {
                timestep: key.1,
                plant_id: key.0.clone(),
                discharge,
                charge: redispatch.storage_down.get(key).copied().unwrap_or(0.0),
                deviation: redispatch.deviation.get(key).copied().unwrap_or(0.0),
            })
            .collect();

        self.redispatch_curtailment = redispatch
            .curtailment
            .iter()
            .map(|(key, &curtailment)| RedispatchCurtailmentRow {
                timestep: key.1,
                node_id: key.0.clone(),
                curtailment,
                market_curtailment: market.nodal.get(key).map_or(0.0, |n| n.curtailment),
            })
            .collect();
    }
}

/// Receives the result tables of each sub-horizon once it has been solved
pub trait ResultSink {
    /// Store the tables of one sub-horizon
    fn persist(&mut self, scenario: &str, horizon: TimeRange, tables: &ResultTables)
    -> Result<()>;
}

/// Writes each sub-horizon's tables as CSV files to `<output>/<scenario>/<start>-<stop>/`.
///
/// Empty tables (e.g. exchange for a nodal market) are not written.
pub struct CsvResultWriter {
    output_path: PathBuf,
}

impl CsvResultWriter {
    /// Create a writer for the given output folder
    pub fn new(output_path: &Path) -> Self {
        Self {
            output_path: output_path.to_path_buf(),
        }
    }

    /// The folder the tables of a sub-horizon are written to
    pub fn horizon_dir(&self, scenario: &str, horizon: TimeRange) -> PathBuf {
        self.output_path
            .join(scenario)
            .join(format!("{}-{}", horizon.start, horizon.stop))
    }
}

/// Write rows to a CSV file, unless there are none
fn write_table<T: Serialize>(dir_path: &Path, file_name: &str, rows: &[T]) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }

    let file_path = dir_path.join(file_name);
    let mut writer = csv::Writer::from_path(&file_path)
        .with_context(|| format!("Could not create {}", file_path.display()))?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;

    Ok(())
}

impl ResultSink for CsvResultWriter {
    fn persist(
        &mut self,
        scenario: &str,
        horizon: TimeRange,
        tables: &ResultTables,
    ) -> Result<()> {
        let dir_path = self.horizon_dir(scenario, horizon);
        fs::create_dir_all(&dir_path)?;

        write_table(&dir_path, GENERATION_FILE_NAME, &tables.generation)?;
        write_table(&dir_path, STORAGE_FILE_NAME, &tables.storage)?;
        write_table(&dir_path, BALANCE_FILE_NAME, &tables.balance)?;
        write_table(&dir_path, EXCHANGE_FILE_NAME, &tables.exchange)?;
        write_table(&dir_path, LINE_FLOW_FILE_NAME, &tables.line_flow)?;
        write_table(&dir_path, PROSUMERS_FILE_NAME, &tables.prosumers)?;
        write_table(&dir_path, PRICES_FILE_NAME, &tables.prices)?;
        write_table(
            &dir_path,
            REDISPATCH_GENERATION_FILE_NAME,
            &tables.redispatch_generation,
        )?;
        write_table(
            &dir_path,
            REDISPATCH_STORAGE_FILE_NAME,
            &tables.redispatch_storage,
        )?;
        write_table(
            &dir_path,
            REDISPATCH_CURTAILMENT_FILE_NAME,
            &tables.redispatch_curtailment,
        )?;

        Ok(())
    }
}

/// Keeps result tables in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    tables: Vec<(TimeRange, ResultTables)>,
}

impl MemorySink {
    /// The tables of every persisted sub-horizon, in order
    pub fn into_tables(self) -> Vec<(TimeRange, ResultTables)> {
        self.tables
    }
}

impl ResultSink for MemorySink {
    fn persist(
        &mut self,
        _scenario: &str,
        horizon: TimeRange,
        tables: &ResultTables,
    ) -> Result<()> {
        self.tables.push((horizon, tables.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{assert_error, setup, single_node_raw, solve_market};
    use crate::model::{RawParameters, Setup};
    use itertools::{Itertools, assert_equal};
    use rstest::rstest;
    use std::iter;
    use tempfile::tempdir;

    #[rstest]
    fn test_result_tables(single_node_raw: RawParameters, setup: Setup) {
        let parameters = Parameters::new(single_node_raw).unwrap();
        let market = solve_market(&parameters, &setup, TimeRange::new(1, 1));
        let tables = ResultTables::new(&parameters, &market, None).unwrap();

        assert_eq!(tables.generation.len(), 1);
        assert_eq!(tables.balance.len(), 1);
        assert!(tables.storage.is_empty());
        assert!(tables.redispatch_generation.is_empty());
        let balance = &tables.balance[0];
        assert!(balance.position.abs() < 1e-6);
    }

    #[test]
    fn test_write_generation() {
        let dir = tempdir().unwrap();
        let horizon = TimeRange::new(1, 24);
        let row = GenerationRow {
            timestep: 3,
            plant_id: "p1".into(),
            node_id: "n1".into(),
            generation: 42.0,
        };
        let tables = ResultTables {
            generation: vec![row.clone()],
            ..Default::default()
        };

        let mut writer = CsvResultWriter::new(dir.path());
        writer.persist("base", horizon, &tables).unwrap();

        // Read back and compare
        let dir_path = writer.horizon_dir("base", horizon);
        assert!(dir_path.ends_with("base/1-24"));
        let records: Vec<GenerationRow> =
            csv::Reader::from_path(dir_path.join(GENERATION_FILE_NAME))
                .unwrap()
                .into_deserialize()
                .try_collect()
                .unwrap();
        assert_equal(records, iter::once(row));
        assert!(!dir_path.join(EXCHANGE_FILE_NAME).exists());
    }

    #[test]
    fn test_write_line_flow_without_redispatch() {
        let dir = tempdir().unwrap();
        let row = LineFlowRow {
            timestep: 1,
            line_id: "l1".into(),
            market_flow: -5.0,
            redispatch_flow: None,
            capacity: 10.0,
        };
        let tables = ResultTables {
            line_flow: vec![row.clone()],
            ..Default::default()
        };
        let mut writer = CsvResultWriter::new(dir.path());
        writer.persist("base", TimeRange::new(1, 1), &tables).unwrap();

        let records: Vec<LineFlowRow> = csv::Reader::from_path(
            writer
                .horizon_dir("base", TimeRange::new(1, 1))
                .join(LINE_FLOW_FILE_NAME),
        )
        .unwrap()
        .into_deserialize()
        .try_collect()
        .unwrap();
        assert_equal(records, iter::once(row));
    }

    #[test]
    fn test_create_output_directory() {
        let dir = tempdir().unwrap();
        let output_dir = dir.path().join("results");

        // New folder
        assert!(!create_output_directory(&output_dir, false).unwrap());
        assert!(output_dir.is_dir());

        // Empty folder can be reused
        assert!(!create_output_directory(&output_dir, false).unwrap());

        // Non-empty folder only with overwrite
        fs::write(output_dir.join("file.txt"), "").unwrap();
        assert_error!(
            create_output_directory(&output_dir, false),
            "Output folder already exists and is not empty. Please delete the folder or pass the \
            --overwrite command-line option."
        );
        assert!(create_output_directory(&output_dir, true).unwrap());
        assert!(!output_dir.join("file.txt").exists());
    }
}
