//! Defines the [`Setup`] struct, which represents the contents of `model.toml`.
use crate::error::{DispatchError, ensure_config};
use crate::horizon::TimeHorizon;
use crate::input::{input_err_msg, read_toml};
use crate::simulation::optimisation::SolverAttributes;
use crate::units::{Dimensionless, MoneyPerCO2, MoneyPerEnergy};
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_string_enum::DeserializeLabeledStringEnum;
use std::path::Path;

const SETUP_FILE_NAME: &str = "model.toml";

macro_rules! define_unit_param_default {
    ($name:ident, $type: ty, $value: expr) => {
        fn $name() -> $type {
            <$type>::new($value)
        }
    };
}

define_unit_param_default!(default_curtailment_cost, MoneyPerEnergy, 10.0);
define_unit_param_default!(default_lost_load_cost, MoneyPerEnergy, 10_000.0);
define_unit_param_default!(default_ramp_cost, MoneyPerEnergy, 1.0);
define_unit_param_default!(default_storage_adjust_cost, MoneyPerEnergy, 1.0);
define_unit_param_default!(default_storage_start_level, Dimensionless, 0.5);

/// Represents the contents of the entire setup file.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Setup {
    /// Name of the scenario; used to name the output folder
    pub scenario: String,
    /// Which time steps to model and how to split them
    pub horizon: TimeHorizon,
    /// Market design
    pub market: MarketSetup,
    /// Whether and how prosumers are modelled
    #[serde(default)]
    pub prosumers: ProsumerSetup,
    /// Cost parameters
    #[serde(default)]
    pub costs: Costs,
    /// Storage handling
    #[serde(default)]
    pub storage: StorageSetup,
    /// Options passed to the solver
    #[serde(default)]
    pub solver: SolverSetup,
}

/// Market design options
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub struct MarketSetup {
    /// Zonal or nodal clearing
    #[serde(rename = "type")]
    pub market_type: MarketType,
    /// Whether a redispatch stage follows each market clearing
    #[serde(default)]
    pub redispatch: bool,
}

/// The spatial resolution at which the market is cleared
#[derive(Debug, Clone, Copy, PartialEq, Eq, DeserializeLabeledStringEnum)]
pub enum MarketType {
    /// One balance per zone, with exchange limited by NTCs
    #[string = "zonal"]
    Zonal,
    /// One balance per node, with DC power flow
    #[string = "nodal"]
    Nodal,
}

/// How prosumers take part in the market
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProsumerSetup {
    /// Prosumer demand is treated as ordinary demand
    #[default]
    None,
    /// Prosumers balance their own supply and demand, trading with the grid at fixed prices
    Optimized {
        /// Price paid for energy bought from the grid
        buy_price: MoneyPerEnergy,
        /// Price received for energy sold to the grid
        sell_price: MoneyPerEnergy,
    },
}

/// Cost parameters applied in the objective
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub struct Costs {
    /// Penalty per unit of curtailed energy
    #[serde(default = "default_curtailment_cost")]
    pub curtailment: MoneyPerEnergy,
    /// Penalty per unit of unserved demand
    #[serde(default = "default_lost_load_cost")]
    pub lost_load: MoneyPerEnergy,
    /// Cost per unit of energy discharged from storage
    #[serde(default)]
    pub storage_marginal: MoneyPerEnergy,
    /// Cost per unit of generation moved up or down in redispatch
    #[serde(default = "default_ramp_cost")]
    pub ramp: MoneyPerEnergy,
    /// Cost per unit of storage charge or discharge changed in redispatch
    #[serde(default = "default_storage_adjust_cost")]
    pub storage_adjust: MoneyPerEnergy,
    /// Price of emitting CO₂
    #[serde(default)]
    pub co2_price: MoneyPerCO2,
}

impl Default for Costs {
    fn default() -> Self {
        Self {
            curtailment: default_curtailment_cost(),
            lost_load: default_lost_load_cost(),
            storage_marginal: MoneyPerEnergy::default(),
            ramp: default_ramp_cost(),
            storage_adjust: default_storage_adjust_cost(),
            co2_price: MoneyPerCO2::default(),
        }
    }
}

/// How storage levels are linked across time steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, DeserializeLabeledStringEnum)]
pub enum StorageBoundary {
    /// The first time step starts from the level left by the previous sub-horizon
    #[default]
    #[string = "carried"]
    Carried,
    /// The first time step follows on from the last time step of the same sub-horizon
    #[string = "cyclic"]
    Cyclic,
}

/// Storage options
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub struct StorageSetup {
    /// Initial level of every storage, as a proportion of its capacity
    #[serde(default = "default_storage_start_level")]
    pub start_level: Dimensionless,
    /// How the first time step of each sub-horizon is linked
    #[serde(default)]
    pub boundary: StorageBoundary,
}

impl Default for StorageSetup {
    fn default() -> Self {
        Self {
            start_level: default_storage_start_level(),
            boundary: StorageBoundary::default(),
        }
    }
}

/// Solver options
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct SolverSetup {
    /// Options passed through to the solver unmodified (e.g. `time_limit`)
    #[serde(default)]
    pub attributes: SolverAttributes,
    /// Whether to report balance duals (prices)
    #[serde(default)]
    pub duals: bool,
}

impl Setup {
    /// Read a setup file from the specified directory.
    ///
    /// # Arguments
    ///
    /// * `model_dir` - Folder containing model configuration files
    pub fn from_path<P: AsRef<Path>>(model_dir: P) -> Result<Setup> {
        let file_path = model_dir.as_ref().join(SETUP_FILE_NAME);
        let setup: Setup = read_toml(&file_path)?;

        setup.validate().with_context(|| input_err_msg(&file_path))?;

        Ok(setup)
    }

    /// Check the setup is consistent
    pub fn validate(&self) -> Result<(), DispatchError> {
        ensure_config!(!self.scenario.is_empty(), "scenario name cannot be empty");

        let costs = [
            ("curtailment", self.costs.curtailment.value()),
            ("lost_load", self.costs.lost_load.value()),
            ("storage_marginal", self.costs.storage_marginal.value()),
            ("ramp", self.costs.ramp.value()),
            ("storage_adjust", self.costs.storage_adjust.value()),
            ("co2_price", self.costs.co2_price.value()),
        ];
        for (name, value) in costs {
            ensure_config!(
                value.is_finite() && value >= 0.0,
                "{name} cost must be a finite, non-negative number"
            );
        }

        let start_level = self.storage.start_level.value();
        ensure_config!(
            (0.0..=1.0).contains(&start_level),
            "storage start_level must be between 0 and 1"
        );

        if let ProsumerSetup::Optimized {
            buy_price,
            sell_price,
        } = self.prosumers
        {
            ensure_config!(
                buy_price.is_finite() && sell_price.is_finite(),
                "prosumer prices must be finite"
            );
            ensure_config!(
                buy_price >= sell_price,
                "prosumer buy_price ({}) is below sell_price ({})",
                buy_price.value(),
                sell_price.value()
            );
        }

        Ok(())
    }
}
