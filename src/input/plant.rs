//! Code for reading plants and fuels from CSV files.
use super::*;
use crate::id::{FuelID, PlantID, into_id_map};
use crate::model::{Fuel, Plant, PlantKind, Storage};
use crate::units::{CO2PerEnergy, Dimensionless, Energy, MoneyPerEnergy, Power};
use indexmap::IndexMap;
use serde::Deserialize;

const PLANTS_FILE_NAME: &str = "plants.csv";
const FUELS_FILE_NAME: &str = "fuels.csv";

#[derive(PartialEq, Debug, Deserialize)]
struct PlantRaw {
    id: String,
    node: String,
    kind: PlantKind,
    gmax: f64,
    efficiency: f64,
    fuel: Option<String>,
    om_cost: Option<f64>,
    availability: Option<f64>,
    storage_capacity: Option<f64>,
    prosumer: Option<bool>,
}

impl PlantRaw {
    fn into_plant(self) -> Plant {
        Plant {
            id: self.id.into(),
            node: self.node.into(),
            kind: self.kind,
            gmax: Power(self.gmax),
            efficiency: Dimensionless(self.efficiency),
            fuel: self.fuel.map(FuelID::from),
            om_cost: MoneyPerEnergy(self.om_cost.unwrap_or_default()),
            availability: self.availability.unwrap_or(1.0).into(),
            storage: self.storage_capacity.map(|capacity| Storage {
                capacity: Energy(capacity),
                inflow: 0.0.into(),
            }),
            prosumer: self.prosumer.unwrap_or_default(),
        }
    }
}

#[derive(PartialEq, Debug, Deserialize)]
struct FuelRaw {
    id: String,
    price: f64,
    #[serde(default)]
    co2_content: f64,
}

/// Read plants and storages from the plants CSV file.
///
/// # Arguments
///
/// * `model_dir` - Folder containing model configuration files
pub fn read_plants(model_dir: &Path) -> Result<IndexMap<PlantID, Plant>> {
    let file_path = model_dir.join(PLANTS_FILE_NAME);
    let plants_csv = read_csv(&file_path)?;
    read_plants_from_iter(plants_csv).with_context(|| input_err_msg(&file_path))
}

fn read_plants_from_iter<I>(iter: I) -> Result<IndexMap<PlantID, Plant>>
where
    I: Iterator<Item = PlantRaw>,
{
    let plants: Vec<_> = iter
        .map(|raw| {
            ensure!(
                raw.gmax.is_finite() && raw.gmax >= 0.0,
                "gmax of plant {} must be a non-negative number",
                raw.id
            );
            if let Some(capacity) = raw.storage_capacity {
                ensure!(
                    raw.kind == PlantKind::Dispatchable,
                    "Storage {} must be dispatchable",
                    raw.id
                );
                ensure!(
                    capacity >= 0.0,
                    "Storage capacity of plant {} cannot be negative",
                    raw.id
                );
            }

            Ok(raw.into_plant())
        })
        .try_collect()?;

    into_id_map(plants)
}

/// Read fuels from the optional fuels CSV file.
pub fn read_fuels(model_dir: &Path) -> Result<IndexMap<FuelID, Fuel>> {
    let file_path = model_dir.join(FUELS_FILE_NAME);
    let fuels = read_csv_optional::<FuelRaw>(&file_path)?.map(|fuel| Fuel {
        id: fuel.id.into(),
        price: fuel.price.into(),
        co2_content: CO2PerEnergy(fuel.co2_content),
    });

    into_id_map(fuels).with_context(|| input_err_msg(&file_path))
}
