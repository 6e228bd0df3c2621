//! The data model: network, fleet, demand and the derived parameter indexes.
//!
//! [`Parameters`] is built once from already-validated raw input ([`RawParameters`]). Building it
//! runs every derivation step (network matrices, marginal costs, membership indexes); after that
//! it is read-only and shared by reference across all sub-horizons.
use crate::error::{DispatchError, ensure_config};
use crate::horizon::TimeRange;
use crate::id::{DcLineID, FuelID, LineID, NodeID, PlantID, ZoneID, define_id_getter};
use crate::network::NetworkMatrices;
use crate::profile::Profile;
use crate::units::{CO2PerEnergy, Dimensionless, Energy, MoneyPerEnergy, Power};
use indexmap::{IndexMap, IndexSet};
use log::debug;
use serde_string_enum::DeserializeLabeledStringEnum;

pub mod setup;
pub use setup::Setup;

/// A node (bus) of the network
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Unique identifier
    pub id: NodeID,
    /// The market zone the node belongs to (empty if none is given)
    pub zone: ZoneID,
    /// Whether the node is a slack (reference) bus
    pub slack: bool,
    /// Demand at the node, excluding prosumer demand
    pub demand: Profile,
}
define_id_getter! {Node, NodeID}

/// An AC line
#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    /// Unique identifier
    pub id: LineID,
    /// Origin node. Flows from origin to destination are positive.
    pub node_from: NodeID,
    /// Destination node
    pub node_to: NodeID,
    /// Series reactance (p.u.)
    pub reactance: f64,
    /// Series resistance (p.u.)
    pub resistance: f64,
    /// Thermal limit
    pub capacity: Power,
}
define_id_getter! {Line, LineID}

/// A controllable DC line
#[derive(Debug, Clone, PartialEq)]
pub struct DcLine {
    /// Unique identifier
    pub id: DcLineID,
    /// Origin node
    pub node_from: NodeID,
    /// Destination node
    pub node_to: NodeID,
    /// Transfer limit in either direction
    pub capacity: Power,
}
define_id_getter! {DcLine, DcLineID}

/// Whether a plant's output can be scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, DeserializeLabeledStringEnum)]
pub enum PlantKind {
    /// Output chosen by the optimisation
    #[string = "dispatchable"]
    Dispatchable,
    /// Output given by availability; can only be curtailed
    #[string = "non_dispatchable"]
    NonDispatchable,
}

/// Storage characteristics of a plant
#[derive(Debug, Clone, PartialEq)]
pub struct Storage {
    /// Energy capacity
    pub capacity: Energy,
    /// Natural inflow per time step (e.g. for hydro reservoirs)
    pub inflow: Profile,
}

/// A generating unit or storage
#[derive(Debug, Clone, PartialEq)]
pub struct Plant {
    /// Unique identifier
    pub id: PlantID,
    /// Node the plant is connected to
    pub node: NodeID,
    /// Dispatchable or not
    pub kind: PlantKind,
    /// Maximum output (and charging power for storages)
    pub gmax: Power,
    /// Conversion efficiency; for storages the one-way (charge or discharge) efficiency
    pub efficiency: Dimensionless,
    /// The fuel burnt, if any
    pub fuel: Option<FuelID>,
    /// Variable operation and maintenance cost
    pub om_cost: MoneyPerEnergy,
    /// Fraction of `gmax` available at each time step
    pub availability: Profile,
    /// Storage block, for storages
    pub storage: Option<Storage>,
    /// Whether the plant belongs to a prosumer
    pub prosumer: bool,
}
define_id_getter! {Plant, PlantID}

impl Plant {
    /// Whether the plant has a storage block
    pub fn is_storage(&self) -> bool {
        self.storage.is_some()
    }

    /// Whether the plant's output is given rather than optimised
    pub fn is_dispatchable(&self) -> bool {
        self.kind == PlantKind::Dispatchable
    }
}

/// A fuel with its price and emissions
#[derive(Debug, Clone, PartialEq)]
pub struct Fuel {
    /// Unique identifier
    pub id: FuelID,
    /// Price per unit of (thermal) energy
    pub price: Profile,
    /// CO₂ emitted per unit of (thermal) energy
    pub co2_content: CO2PerEnergy,
}
define_id_getter! {Fuel, FuelID}

/// A net transfer capacity between two zones, in one direction
#[derive(Debug, Clone, PartialEq)]
pub struct Ntc {
    /// Exporting zone
    pub zone_from: ZoneID,
    /// Importing zone
    pub zone_to: ZoneID,
    /// Maximum exchange
    pub capacity: Power,
}

/// Raw model data, as provided by the input layer.
///
/// Cross-references are expected to resolve; [`Parameters::new`] checks this anyway and reports
/// the offending entity if they don't.
#[derive(Debug, Clone, Default)]
pub struct RawParameters {
    /// The modelled time steps
    pub time: Option<TimeRange>,
    /// Network nodes
    pub nodes: IndexMap<NodeID, Node>,
    /// AC lines
    pub lines: IndexMap<LineID, Line>,
    /// DC lines
    pub dc_lines: IndexMap<DcLineID, DcLine>,
    /// Plants and storages
    pub plants: IndexMap<PlantID, Plant>,
    /// Fuels
    pub fuels: IndexMap<FuelID, Fuel>,
    /// Net transfer capacities between zones
    pub ntc: Vec<Ntc>,
    /// Price of CO₂ emissions
    pub co2_price: Profile,
    /// Demand of prosumers per node
    pub prosumer_demand: IndexMap<NodeID, Profile>,
}

/// Indexes of which entities belong to which node or zone
#[derive(Debug, Default)]
struct Membership {
    plants_in_node: IndexMap<NodeID, Vec<PlantID>>,
    plants_in_zone: IndexMap<ZoneID, Vec<PlantID>>,
    nodes_in_zone: IndexMap<ZoneID, Vec<NodeID>>,
    ntc_exports: IndexMap<ZoneID, Vec<ZoneID>>,
    ntc_imports: IndexMap<ZoneID, Vec<ZoneID>>,
}

/// The complete, validated model parameters
#[derive(Debug)]
pub struct Parameters {
    /// The modelled time steps
    pub time: TimeRange,
    /// Network nodes
    pub nodes: IndexMap<NodeID, Node>,
    /// AC lines
    pub lines: IndexMap<LineID, Line>,
    /// DC lines
    pub dc_lines: IndexMap<DcLineID, DcLine>,
    /// Plants and storages
    pub plants: IndexMap<PlantID, Plant>,
    /// Fuels
    pub fuels: IndexMap<FuelID, Fuel>,
    /// Zones, in the order they are first referenced by a node
    pub zones: IndexSet<ZoneID>,
    /// Net transfer capacities keyed by (exporting zone, importing zone)
    pub ntc: IndexMap<(ZoneID, ZoneID), Power>,
    /// Price of CO₂ emissions
    pub co2_price: Profile,
    /// Demand of prosumers per node
    pub prosumer_demand: IndexMap<NodeID, Profile>,
    network: NetworkMatrices,
    marginal_costs: IndexMap<PlantID, Profile>,
    membership: Membership,
}

impl Parameters {
    /// Validate the raw data and run the one-time derivations.
    pub fn new(raw: RawParameters) -> Result<Self, DispatchError> {
        let RawParameters {
            time,
            nodes,
            lines,
            dc_lines,
            plants,
            fuels,
            ntc,
            co2_price,
            prosumer_demand,
        } = raw;
        let time = time.ok_or_else(|| DispatchError::configuration("no time steps defined"))?;
        ensure_config!(!nodes.is_empty(), "no nodes defined");

        let zones: IndexSet<ZoneID> = nodes
            .values()
            .filter(|node| !node.zone.0.is_empty())
            .map(|node| node.zone.clone())
            .collect();

        check_nodes(&nodes, &time)?;
        check_plants(&plants, &nodes, &fuels, &time)?;
        for fuel in fuels.values() {
            fuel.price.check_covers(&time, &fuel.id)?;
        }
        co2_price.check_covers(&time, "co2_price")?;
        for (node_id, profile) in &prosumer_demand {
            if !nodes.contains_key(node_id) {
                return Err(DispatchError::data_contract(
                    node_id,
                    "prosumer demand given for unknown node",
                ));
            }
            profile.check_covers(&time, node_id)?;
        }
        let ntc = check_ntc(ntc, &zones)?;

        let network = NetworkMatrices::compute(&nodes, &lines, &dc_lines)?;
        let marginal_costs = derive_marginal_costs(&plants, &fuels, &co2_price, &time)?;
        let membership = Membership::new(&nodes, &plants, &ntc);
        debug!(
            "Derived parameters for {} nodes, {} lines, {} plants",
            nodes.len(),
            lines.len(),
            plants.len()
        );

        Ok(Self {
            time,
            nodes,
            lines,
            dc_lines,
            plants,
            fuels,
            zones,
            ntc,
            co2_price,
            prosumer_demand,
            network,
            marginal_costs,
            membership,
        })
    }

    /// The network matrices, computed once when the parameters were built
    pub fn network(&self) -> &NetworkMatrices {
        &self.network
    }

    /// The marginal cost profile of a plant
    pub fn marginal_cost(&self, plant_id: &PlantID) -> Result<&Profile, DispatchError> {
        self.marginal_costs
            .get(plant_id)
            .ok_or_else(|| DispatchError::data_contract(plant_id, "no marginal cost"))
    }

    /// The zone a node belongs to
    pub fn zone_of_node(&self, node_id: &NodeID) -> Result<&ZoneID, DispatchError> {
        self.nodes
            .get(node_id)
            .map(|node| &node.zone)
            .ok_or_else(|| DispatchError::data_contract(node_id, "unknown node"))
    }

    /// The zone a plant belongs to (via its node)
    pub fn zone_of_plant(&self, plant: &Plant) -> Result<&ZoneID, DispatchError> {
        self.zone_of_node(&plant.node)
    }

    /// Plants connected to the given node
    pub fn plants_in_node(&self, node_id: &NodeID) -> impl Iterator<Item = &Plant> {
        self.iter_members(self.membership.plants_in_node.get(node_id))
    }

    /// Plants located in the given zone
    pub fn plants_in_zone(&self, zone_id: &ZoneID) -> impl Iterator<Item = &Plant> {
        self.iter_members(self.membership.plants_in_zone.get(zone_id))
    }

    fn iter_members<'a>(
        &'a self,
        ids: Option<&'a Vec<PlantID>>,
    ) -> impl Iterator<Item = &'a Plant> {
        ids.into_iter().flatten().map(|id| &self.plants[id])
    }

    /// Nodes in the given zone
    pub fn nodes_in_zone(&self, zone_id: &ZoneID) -> &[NodeID] {
        self.membership
            .nodes_in_zone
            .get(zone_id)
            .map_or(&[], Vec::as_slice)
    }

    /// Zones the given zone can export to
    pub fn ntc_exports(&self, zone_id: &ZoneID) -> &[ZoneID] {
        self.membership
            .ntc_exports
            .get(zone_id)
            .map_or(&[], Vec::as_slice)
    }

    /// Zones the given zone can import from
    pub fn ntc_imports(&self, zone_id: &ZoneID) -> &[ZoneID] {
        self.membership
            .ntc_imports
            .get(zone_id)
            .map_or(&[], Vec::as_slice)
    }

    /// Iterate over plants with a storage block
    pub fn iter_storages(&self) -> impl Iterator<Item = (&Plant, &Storage)> {
        self.plants
            .values()
            .filter_map(|plant| plant.storage.as_ref().map(|storage| (plant, storage)))
    }

    /// Demand at a node, excluding prosumers
    pub fn demand(&self, node_id: &NodeID, t: u32) -> Result<f64, DispatchError> {
        let node = self
            .nodes
            .get(node_id)
            .ok_or_else(|| DispatchError::data_contract(node_id, "unknown node"))?;
        node.demand.at(t, node_id)
    }

    /// Prosumer demand at a node (zero if the node has no prosumers)
    pub fn prosumer_demand(&self, node_id: &NodeID, t: u32) -> Result<f64, DispatchError> {
        match self.prosumer_demand.get(node_id) {
            Some(profile) => profile.at(t, node_id),
            None => Ok(0.0),
        }
    }

    /// Available output of a plant, i.e. `availability * gmax`
    pub fn available_output(&self, plant: &Plant, t: u32) -> Result<f64, DispatchError> {
        Ok(plant.availability.at(t, &plant.id)? * plant.gmax.value())
    }

    /// Inflow into a storage at time step `t`
    pub fn inflow(&self, plant: &Plant, t: u32) -> Result<f64, DispatchError> {
        plant
            .storage
            .as_ref()
            .map_or(Ok(0.0), |storage| storage.inflow.at(t, &plant.id))
    }
}

impl Membership {
    fn new(
        nodes: &IndexMap<NodeID, Node>,
        plants: &IndexMap<PlantID, Plant>,
        ntc: &IndexMap<(ZoneID, ZoneID), Power>,
    ) -> Self {
        let mut membership = Membership::default();
        for node in nodes.values() {
            membership
                .nodes_in_zone
                .entry(node.zone.clone())
                .or_default()
                .push(node.id.clone());
        }
        for plant in plants.values() {
            membership
                .plants_in_node
                .entry(plant.node.clone())
                .or_default()
                .push(plant.id.clone());
            membership
                .plants_in_zone
                .entry(nodes[&plant.node].zone.clone())
                .or_default()
                .push(plant.id.clone());
        }
        for (zone_from, zone_to) in ntc.keys() {
            membership
                .ntc_exports
                .entry(zone_from.clone())
                .or_default()
                .push(zone_to.clone());
            membership
                .ntc_imports
                .entry(zone_to.clone())
                .or_default()
                .push(zone_from.clone());
        }

        membership
    }
}

fn check_nodes(nodes: &IndexMap<NodeID, Node>, time: &TimeRange) -> Result<(), DispatchError> {
    for node in nodes.values() {
        node.demand.check_covers(time, &node.id)?;
    }

    Ok(())
}

fn check_plants(
    plants: &IndexMap<PlantID, Plant>,
    nodes: &IndexMap<NodeID, Node>,
    fuels: &IndexMap<FuelID, Fuel>,
    time: &TimeRange,
) -> Result<(), DispatchError> {
    for plant in plants.values() {
        let invalid = |message: String| Err(DispatchError::data_contract(&plant.id, message));

        if !nodes.contains_key(&plant.node) {
            return invalid(format!("references unknown node {}", plant.node));
        }
        if let Some(fuel) = plant.fuel.as_ref().filter(|fuel| !fuels.contains_key(*fuel)) {
            return invalid(format!("references unknown fuel {fuel}"));
        }
        if !(plant.gmax.is_finite() && plant.gmax >= Power(0.0)) {
            return invalid(format!("invalid gmax {}", plant.gmax.value()));
        }
        let eta = plant.efficiency.value();
        if !(eta > 0.0 && eta <= 1.0) {
            return invalid(format!("efficiency {eta} is not in (0, 1]"));
        }
        plant.availability.check_covers(time, &plant.id)?;
        if let Some(value) = plant.availability.values().find(|v| !(0.0..=1.0).contains(v)) {
            return invalid(format!("availability {value} is not in [0, 1]"));
        }
        if let Some(storage) = &plant.storage {
            if !(storage.capacity.is_finite() && storage.capacity >= Energy(0.0)) {
                return invalid(format!(
                    "invalid storage capacity {}",
                    storage.capacity.value()
                ));
            }
            storage.inflow.check_covers(time, &plant.id)?;
        }
    }

    Ok(())
}

fn check_ntc(
    ntc: Vec<Ntc>,
    zones: &IndexSet<ZoneID>,
) -> Result<IndexMap<(ZoneID, ZoneID), Power>, DispatchError> {
    let mut map = IndexMap::new();
    for Ntc {
        zone_from,
        zone_to,
        capacity,
    } in ntc
    {
        let entity = format!("NTC {zone_from}->{zone_to}");
        for zone in [&zone_from, &zone_to] {
            if !zones.contains(zone) {
                return Err(DispatchError::data_contract(
                    &entity,
                    format!("unknown zone {zone}"),
                ));
            }
        }
        if zone_from == zone_to || !(capacity.is_finite() && capacity >= Power(0.0)) {
            return Err(DispatchError::data_contract(&entity, "invalid NTC entry"));
        }
        if map.insert((zone_from, zone_to), capacity).is_some() {
            return Err(DispatchError::data_contract(&entity, "duplicate NTC entry"));
        }
    }

    Ok(map)
}

/// Derive each plant's marginal cost from fuel price, CO₂ price and efficiency.
///
/// `mc = (fuel_price + co2_price * co2_content) / efficiency + om_cost`, or just the O&M cost
/// for plants without a fuel.
fn derive_marginal_costs(
    plants: &IndexMap<PlantID, Plant>,
    fuels: &IndexMap<FuelID, Fuel>,
    co2_price: &Profile,
    time: &TimeRange,
) -> Result<IndexMap<PlantID, Profile>, DispatchError> {
    let mut costs = IndexMap::with_capacity(plants.len());
    for plant in plants.values() {
        let om = plant.om_cost.value();
        let cost = match &plant.fuel {
            None => Profile::Fixed(om),
            Some(fuel_id) => {
                let fuel = &fuels[fuel_id];
                let co2 = fuel.co2_content.value();
                let eta = plant.efficiency.value();
                Profile::combine(&[&fuel.price, co2_price], time, &plant.id, |args| {
                    (args[0] + args[1] * co2) / eta + om
                })?
            }
        };
        costs.insert(plant.id.clone(), cost);
    }

    Ok(costs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{assert_data_contract, plant, raw_parameters, triangle_raw};
    use float_cmp::assert_approx_eq;
    use rstest::rstest;

    #[rstest]
    fn test_parameters_new(triangle_raw: RawParameters) {
        let params = Parameters::new(triangle_raw).unwrap();
        assert_eq!(params.zones.len(), 2);
        assert_eq!(params.nodes_in_zone(&"north".into()).len(), 2);
        assert_eq!(params.plants_in_node(&"n1".into()).count(), 1);
        assert_eq!(params.plants_in_zone(&"north".into()).count(), 2);
        assert_eq!(params.ntc_exports(&"north".into()), [ZoneID::new("south")]);
        assert_eq!(params.ntc_imports(&"north".into()), [ZoneID::new("south")]);
        assert_eq!(params.network().ptdf.nrows(), 3);
    }

    #[rstest]
    fn test_marginal_cost_derivation(mut raw_parameters: RawParameters) {
        raw_parameters.co2_price = Profile::Fixed(20.0);
        raw_parameters.fuels.insert(
            "gas".into(),
            Fuel {
                id: "gas".into(),
                price: Profile::Fixed(30.0),
                co2_content: CO2PerEnergy(0.2),
            },
        );
        let mut gas_plant = plant("gas_plant", "n1");
        gas_plant.fuel = Some("gas".into());
        gas_plant.efficiency = Dimensionless(0.5);
        gas_plant.om_cost = MoneyPerEnergy(3.0);
        raw_parameters.plants.insert(gas_plant.id.clone(), gas_plant);

        let params = Parameters::new(raw_parameters).unwrap();
        let mc = params.marginal_cost(&"gas_plant".into()).unwrap();
        // (30 + 20 * 0.2) / 0.5 + 3
        assert_approx_eq!(f64, mc.get(1).unwrap(), 71.0);
        assert!(matches!(mc, Profile::Fixed(_)));
    }

    #[rstest]
    fn test_plant_unknown_node(mut raw_parameters: RawParameters) {
        let bad = plant("bad", "nowhere");
        raw_parameters.plants.insert(bad.id.clone(), bad);
        assert_data_contract(Parameters::new(raw_parameters), "bad");
    }

    #[rstest]
    fn test_availability_out_of_range(mut raw_parameters: RawParameters) {
        let mut bad = plant("bad", "n1");
        bad.availability = Profile::Fixed(1.5);
        raw_parameters.plants.insert(bad.id.clone(), bad);
        assert_data_contract(Parameters::new(raw_parameters), "bad");
    }

    #[rstest]
    fn test_missing_demand_values(mut raw_parameters: RawParameters) {
        let node = raw_parameters.nodes.get_mut("n1").unwrap();
        node.demand = Profile::Hourly([(1, 10.0)].into_iter().collect());
        raw_parameters.time = Some(TimeRange::new(1, 2));
        assert_data_contract(Parameters::new(raw_parameters), "n1");
    }

    #[rstest]
    fn test_ntc_unknown_zone(mut raw_parameters: RawParameters) {
        raw_parameters.ntc.push(Ntc {
            zone_from: "z1".into(),
            zone_to: "atlantis".into(),
            capacity: Power(10.0),
        });
        assert_data_contract(Parameters::new(raw_parameters), "NTC z1->atlantis");
    }

    #[test]
    fn test_no_nodes() {
        let raw = RawParameters {
            time: Some(TimeRange::new(1, 1)),
            ..Default::default()
        };
        assert!(matches!(
            Parameters::new(raw),
            Err(DispatchError::Configuration(_))
        ));
    }
}
