//! Day-ahead market clearing.
//!
//! The market model is assembled from interchangeable strategy objects, chosen once from the
//! setup:
//!
//! * a [`MarketScope`] deciding which balance area each node belongs to and adding the transport
//!   model between areas (NTC exchange for [`ZonalScope`], DC power flow for [`NodalScope`]);
//! * a [`ProsumerPolicy`] deciding whether prosumers balance their own supply and demand
//!   ([`OptimisedProsumers`]) or are treated as part of the grid ([`ExcludedProsumers`]).
//!
//! The fleet (generation, charging and storage levels) and the per-area curtailment and lost load
//! variables are common to every combination. Balance rows are collected while the strategies
//! contribute and are only added to the problem once everything else is in place.
use super::StorageState;
use super::optimisation::{Problem, RawSolution, Var};
use crate::error::DispatchError;
use crate::horizon::{TimeRange, prev_period};
use crate::id::{AreaID, DcLineID, LineID, NodeID, PlantID, ZoneID};
use crate::model::setup::{MarketType, ProsumerSetup, StorageBoundary};
use crate::model::{Parameters, Plant, Setup, Storage};
use indexmap::{IndexMap, IndexSet};
use log::debug;
use nalgebra::DVector;
use std::hash::Hash;

pub mod nodal;
pub mod prosumer;
pub mod zonal;
pub use nodal::NodalScope;
pub use prosumer::{ExcludedProsumers, OptimisedProsumers};
pub use zonal::ZonalScope;

/// Variables of one kind, keyed by what they refer to
pub type VarMap<K> = IndexMap<K, Var>;

/// Values of one kind of variable, keyed like the corresponding [`VarMap`]
pub type ValueMap<K> = IndexMap<K, f64>;

/// The variables of a market clearing problem
#[derive(Debug, Default)]
pub struct MarketVariables {
    /// Output of each plant
    pub generation: VarMap<(PlantID, u32)>,
    /// Charging of each storage
    pub charge: VarMap<(PlantID, u32)>,
    /// End-of-step level of each storage
    pub level: VarMap<(PlantID, u32)>,
    /// Curtailed non-dispatchable infeed per balance area
    pub curtailment: VarMap<(AreaID, u32)>,
    /// Unserved demand per balance area
    pub lost_load: VarMap<(AreaID, u32)>,
    /// Directed exchange between zones (zonal only)
    pub exchange: VarMap<(ZoneID, ZoneID, u32)>,
    /// Net import of each zone (zonal only)
    pub net_import: VarMap<(ZoneID, u32)>,
    /// Net injection into the network at each node (nodal only)
    pub injection: VarMap<(NodeID, u32)>,
    /// Voltage angle at each node (nodal only)
    pub angle: VarMap<(NodeID, u32)>,
    /// Flow on each DC line (nodal only)
    pub dc_flow: VarMap<(DcLineID, u32)>,
    /// Energy bought from the grid by prosumers at each node
    pub buy: VarMap<(NodeID, u32)>,
    /// Energy sold to the grid by prosumers at each node
    pub sell: VarMap<(NodeID, u32)>,
}

/// Identifies a balance row
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BalanceKey {
    /// Supply equals demand within a balance area (zone or node)
    Area(AreaID, u32),
    /// Prosumer supply equals prosumer demand at a node
    Prosumer(NodeID, u32),
}

impl BalanceKey {
    /// The constraint family the row belongs to
    pub fn family(&self) -> &'static str {
        match self {
            Self::Area(..) => "balance",
            Self::Prosumer(..) => "prosumer_balance",
        }
    }
}

#[derive(Debug, Default)]
struct Balance {
    terms: Vec<(Var, f64)>,
    demand: f64,
}

/// Decides the balance areas and adds the transport model between them
pub trait MarketScope {
    /// The balance area a node belongs to
    fn area_of(&self, parameters: &Parameters, node: &NodeID) -> Result<AreaID, DispatchError>;

    /// Add scope-specific variables and constraints
    fn contribute(&self, ctx: &mut MarketContext) -> Result<(), DispatchError>;

    /// Flows on AC lines implied by the solution
    fn line_flows(
        &self,
        parameters: &Parameters,
        outcome: &MarketOutcome,
        t: u32,
    ) -> Result<DVector<f64>, DispatchError>;
}

/// Decides how prosumers take part in the market
pub trait ProsumerPolicy {
    /// Whether the plant's output serves its own prosumer balance rather than the grid
    fn is_self_supplied(&self, plant: &Plant) -> bool;

    /// Demand at a node which has to be met by the grid
    fn grid_demand(
        &self,
        parameters: &Parameters,
        node: &NodeID,
        t: u32,
    ) -> Result<f64, DispatchError>;

    /// Add prosumer-specific variables and constraints
    fn contribute(&self, ctx: &mut MarketContext) -> Result<(), DispatchError>;
}

/// The state of a market problem while it is being built
pub struct MarketContext<'a> {
    /// Model parameters
    pub parameters: &'a Parameters,
    /// Model setup
    pub setup: &'a Setup,
    /// The sub-horizon being built
    pub range: TimeRange,
    /// The problem being built
    pub problem: Problem,
    /// Variables added so far
    pub variables: MarketVariables,
    areas: IndexMap<AreaID, Vec<NodeID>>,
    area_of_node: IndexMap<NodeID, AreaID>,
    grid_demand: ValueMap<(NodeID, u32)>,
    infeed: ValueMap<(NodeID, u32)>,
    self_supplied: IndexSet<PlantID>,
    balances: IndexMap<BalanceKey, Balance>,
}

impl<'a> MarketContext<'a> {
    fn new(
        parameters: &'a Parameters,
        setup: &'a Setup,
        range: TimeRange,
        scope: &dyn MarketScope,
        prosumers: &dyn ProsumerPolicy,
    ) -> Result<Self, DispatchError> {
        let mut areas: IndexMap<AreaID, Vec<NodeID>> = IndexMap::new();
        let mut area_of_node = IndexMap::new();
        for node_id in parameters.nodes.keys() {
            let area = scope.area_of(parameters, node_id)?;
            areas.entry(area.clone()).or_default().push(node_id.clone());
            area_of_node.insert(node_id.clone(), area);
        }

        let self_supplied: IndexSet<PlantID> = parameters
            .plants
            .values()
            .filter(|plant| prosumers.is_self_supplied(plant))
            .map(|plant| plant.id.clone())
            .collect();

        let mut grid_demand = IndexMap::new();
        let mut infeed = IndexMap::new();
        for node_id in parameters.nodes.keys() {
            for t in range.iter() {
                let key = (node_id.clone(), t);
                grid_demand.insert(key.clone(), prosumers.grid_demand(parameters, node_id, t)?);

                let mut total = 0.0;
                for plant in parameters.plants_in_node(node_id) {
                    if is_non_dispatchable(plant) && !self_supplied.contains(&plant.id) {
                        total += parameters.available_output(plant, t)?;
                    }
                }
                infeed.insert(key, total);
            }
        }

        Ok(Self {
            parameters,
            setup,
            range,
            problem: Problem::default(),
            variables: MarketVariables::default(),
            areas,
            area_of_node,
            grid_demand,
            infeed,
            self_supplied,
            balances: IndexMap::new(),
        })
    }

    /// The balance area of a node
    pub fn area_of(&self, node: &NodeID) -> Result<&AreaID, DispatchError> {
        self.area_of_node
            .get(node)
            .ok_or_else(|| DispatchError::data_contract(node, "node has no balance area"))
    }

    /// Balance areas and the nodes in each
    pub fn areas(&self) -> impl Iterator<Item = (&AreaID, &[NodeID])> {
        self.areas.iter().map(|(area, nodes)| (area, nodes.as_slice()))
    }

    /// Whether the plant serves a prosumer balance
    pub fn is_self_supplied(&self, plant: &PlantID) -> bool {
        self.self_supplied.contains(plant)
    }

    /// Add `coeff * var` to the supply side of a balance row
    pub fn add_to_balance(&mut self, key: BalanceKey, var: Var, coeff: f64) {
        self.balances.entry(key).or_default().terms.push((var, coeff));
    }

    /// Add to the demand side of a balance row
    pub fn add_demand(&mut self, key: BalanceKey, demand: f64) {
        self.balances.entry(key).or_default().demand += demand;
    }

    /// Turn the collected balances into rows, completing the problem
    pub fn finish(mut self) -> MarketModel {
        let mut balance_rows = IndexMap::with_capacity(self.balances.len());
        for (key, balance) in self.balances {
            let family = key.family();
            let row = self.problem.add_row(
                family,
                balance.demand..=balance.demand,
                balance.terms,
            );
            balance_rows.insert(key, row);
        }
        debug!(
            "Built market problem for {} with {} columns and {} rows",
            self.range,
            self.problem.num_cols(),
            self.problem.num_rows()
        );

        MarketModel {
            range: self.range,
            problem: self.problem,
            variables: self.variables,
            balance_rows,
            areas: self.areas,
            grid_demand: self.grid_demand,
            infeed: self.infeed,
            self_supplied: self.self_supplied,
        }
    }
}

/// A fully built market problem
#[derive(Debug)]
pub struct MarketModel {
    /// The sub-horizon
    pub range: TimeRange,
    /// The LP
    pub problem: Problem,
    /// Its variables
    pub variables: MarketVariables,
    balance_rows: IndexMap<BalanceKey, usize>,
    areas: IndexMap<AreaID, Vec<NodeID>>,
    grid_demand: ValueMap<(NodeID, u32)>,
    infeed: ValueMap<(NodeID, u32)>,
    self_supplied: IndexSet<PlantID>,
}

/// Grid-side quantities at a node, after the market has cleared
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NodalSchedule {
    /// Output minus charging of grid plants at the node
    pub supply: f64,
    /// Net sales of prosumers at the node to the grid
    pub prosumer_exchange: f64,
    /// The node's share of the area's curtailment
    pub curtailment: f64,
    /// The node's share of the area's lost load
    pub lost_load: f64,
    /// Demand to be met by the grid
    pub demand: f64,
}

impl NodalSchedule {
    /// Net injection into the network
    pub fn position(&self) -> f64 {
        self.supply + self.prosumer_exchange - self.curtailment + self.lost_load - self.demand
    }
}

/// The cleared market for one sub-horizon
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarketOutcome {
    /// Objective value
    pub objective: f64,
    /// Output of each plant
    pub generation: ValueMap<(PlantID, u32)>,
    /// Charging of each storage
    pub charge: ValueMap<(PlantID, u32)>,
    /// End-of-step level of each storage
    pub level: ValueMap<(PlantID, u32)>,
    /// Curtailment per balance area
    pub curtailment: ValueMap<(AreaID, u32)>,
    /// Lost load per balance area
    pub lost_load: ValueMap<(AreaID, u32)>,
    /// Exchange between zones
    pub exchange: ValueMap<(ZoneID, ZoneID, u32)>,
    /// Net import per zone
    pub net_import: ValueMap<(ZoneID, u32)>,
    /// Net injection per node
    pub injection: ValueMap<(NodeID, u32)>,
    /// Flow on DC lines
    pub dc_flow: ValueMap<(DcLineID, u32)>,
    /// Prosumer purchases from the grid
    pub buy: ValueMap<(NodeID, u32)>,
    /// Prosumer sales to the grid
    pub sell: ValueMap<(NodeID, u32)>,
    /// Grid-side quantities per node
    pub nodal: IndexMap<(NodeID, u32), NodalSchedule>,
    /// Flows on AC lines
    pub line_flows: ValueMap<(LineID, u32)>,
    /// Duals of the balance rows, if requested
    pub prices: ValueMap<BalanceKey>,
    /// Plants serving prosumer balances rather than the grid
    pub self_supplied: IndexSet<PlantID>,
}

fn values<K: Clone + Eq + Hash>(vars: &VarMap<K>, solution: &RawSolution) -> ValueMap<K> {
    vars.iter()
        .map(|(key, var)| (key.clone(), solution.value(*var)))
        .collect()
}

/// Split `total` in proportion to `weights`, or equally if the weights are all zero
fn apportion(total: f64, weights: &[f64]) -> Vec<f64> {
    let sum: f64 = weights.iter().sum();
    if sum > 0.0 {
        weights.iter().map(|w| total * w / sum).collect()
    } else {
        vec![total / weights.len() as f64; weights.len()]
    }
}

impl MarketModel {
    /// Read the solution into a [`MarketOutcome`]
    pub fn extract(
        &self,
        parameters: &Parameters,
        scope: &dyn MarketScope,
        solution: &RawSolution,
        with_duals: bool,
    ) -> Result<MarketOutcome, DispatchError> {
        let vars = &self.variables;
        let mut outcome = MarketOutcome {
            objective: solution.objective,
            generation: values(&vars.generation, solution),
            charge: values(&vars.charge, solution),
            level: values(&vars.level, solution),
            curtailment: values(&vars.curtailment, solution),
            lost_load: values(&vars.lost_load, solution),
            exchange: values(&vars.exchange, solution),
            net_import: values(&vars.net_import, solution),
            injection: values(&vars.injection, solution),
            dc_flow: values(&vars.dc_flow, solution),
            buy: values(&vars.buy, solution),
            sell: values(&vars.sell, solution),
            self_supplied: self.self_supplied.clone(),
            ..Default::default()
        };
        if with_duals {
            outcome.prices = self
                .balance_rows
                .iter()
                .map(|(key, &row)| (key.clone(), solution.row_duals[row]))
                .collect();
        }

        self.fill_nodal_schedules(parameters, &mut outcome)?;
        for t in self.range.iter() {
            let flows = scope.line_flows(parameters, &outcome, t)?;
            for (line_id, flow) in parameters.lines.keys().zip(flows.iter()) {
                outcome.line_flows.insert((line_id.clone(), t), *flow);
            }
        }

        Ok(outcome)
    }

    fn fill_nodal_schedules(
        &self,
        parameters: &Parameters,
        outcome: &mut MarketOutcome,
    ) -> Result<(), DispatchError> {
        for t in self.range.iter() {
            for (area, nodes) in &self.areas {
                let area_key = (area.clone(), t);
                let infeed = nodes.iter().map(|n| self.infeed[&(n.clone(), t)]).collect::<Vec<_>>();
                let demand = nodes
                    .iter()
                    .map(|n| self.grid_demand[&(n.clone(), t)])
                    .collect::<Vec<_>>();
                let curtailment = apportion(outcome.curtailment[&area_key], &infeed);
                let lost_load = apportion(outcome.lost_load[&area_key], &demand);

                for (i, node_id) in nodes.iter().enumerate() {
                    let key = (node_id.clone(), t);
                    let mut supply = 0.0;
                    for plant in parameters.plants_in_node(node_id) {
                        if self.self_supplied.contains(&plant.id) {
                            continue;
                        }
                        let plant_key = (plant.id.clone(), t);
                        supply += outcome.generation[&plant_key];
                        supply -= outcome.charge.get(&plant_key).copied().unwrap_or(0.0);
                    }
                    let prosumer_exchange = outcome.sell.get(&key).copied().unwrap_or(0.0)
                        - outcome.buy.get(&key).copied().unwrap_or(0.0);

                    outcome.nodal.insert(
                        key,
                        NodalSchedule {
                            supply,
                            prosumer_exchange,
                            curtailment: curtailment[i],
                            lost_load: lost_load[i],
                            demand: demand[i],
                        },
                    );
                }
            }
        }

        Ok(())
    }
}

/// Builds market problems from the strategies chosen for the setup
pub struct MarketFormulator {
    scope: Box<dyn MarketScope>,
    prosumers: Box<dyn ProsumerPolicy>,
}

impl MarketFormulator {
    /// Choose the strategies for the given setup.
    ///
    /// Inconsistent setups (e.g. zonal clearing without zones) are rejected here, before any
    /// problem is built.
    pub fn new(setup: &Setup, parameters: &Parameters) -> Result<Self, DispatchError> {
        let scope: Box<dyn MarketScope> = match setup.market.market_type {
            MarketType::Zonal => Box::new(ZonalScope::new(parameters)?),
            MarketType::Nodal => Box::new(NodalScope),
        };
        let prosumers: Box<dyn ProsumerPolicy> = match setup.prosumers {
            ProsumerSetup::None => Box::new(ExcludedProsumers),
            ProsumerSetup::Optimized {
                buy_price,
                sell_price,
            } => Box::new(OptimisedProsumers::new(buy_price, sell_price)?),
        };

        Ok(Self { scope, prosumers })
    }

    /// The market scope in use
    pub fn scope(&self) -> &dyn MarketScope {
        self.scope.as_ref()
    }

    /// Add all variables and constraints for the sub-horizon, except the balance rows.
    ///
    /// Call [`MarketContext::finish`] on the result to complete the problem.
    pub fn contribute<'a>(
        &self,
        parameters: &'a Parameters,
        setup: &'a Setup,
        range: TimeRange,
        boundary: &StorageState,
    ) -> Result<MarketContext<'a>, DispatchError> {
        let mut ctx = MarketContext::new(
            parameters,
            setup,
            range,
            self.scope.as_ref(),
            self.prosumers.as_ref(),
        )?;
        add_fleet(&mut ctx, boundary)?;
        add_area_variables(&mut ctx);
        self.scope.contribute(&mut ctx)?;
        self.prosumers.contribute(&mut ctx)?;

        Ok(ctx)
    }

    /// Build the complete problem for the sub-horizon
    pub fn build(
        &self,
        parameters: &Parameters,
        setup: &Setup,
        range: TimeRange,
        boundary: &StorageState,
    ) -> Result<MarketModel, DispatchError> {
        Ok(self.contribute(parameters, setup, range, boundary)?.finish())
    }
}

/// Whether a plant's output is fixed by its availability
fn is_non_dispatchable(plant: &Plant) -> bool {
    !plant.is_dispatchable() && !plant.is_storage()
}

/// Add generation, charging and storage level variables for every plant
fn add_fleet(ctx: &mut MarketContext, boundary: &StorageState) -> Result<(), DispatchError> {
    let parameters = ctx.parameters;
    let storage_cost = ctx.setup.costs.storage_marginal.value();

    for plant in parameters.plants.values() {
        let marginal_cost = parameters.marginal_cost(&plant.id)?;
        let self_supplied = ctx.is_self_supplied(&plant.id);
        let area = ctx.area_of(&plant.node)?.clone();
        let gmax = plant.gmax.value();

        for t in ctx.range.iter() {
            let key = (plant.id.clone(), t);
            let balance_key = if self_supplied {
                BalanceKey::Prosumer(plant.node.clone(), t)
            } else {
                BalanceKey::Area(area.clone(), t)
            };

            let generation = if let Some(storage) = &plant.storage {
                let generation = ctx.problem.add_column(storage_cost, 0.0..=gmax);
                let charge = ctx.problem.add_column(0.0, 0.0..=gmax);
                let level = ctx
                    .problem
                    .add_column(0.0, 0.0..=storage.capacity.value());
                ctx.variables.charge.insert(key.clone(), charge);
                ctx.variables.level.insert(key.clone(), level);
                ctx.add_to_balance(balance_key.clone(), charge, -1.0);
                generation
            } else {
                let cost = marginal_cost.at(t, &plant.id)?;
                let available = parameters.available_output(plant, t)?;
                if plant.is_dispatchable() {
                    ctx.problem.add_column(cost, 0.0..=available)
                } else {
                    ctx.problem.add_fixed_column(cost, available)
                }
            };
            ctx.variables.generation.insert(key, generation);
            ctx.add_to_balance(balance_key, generation, 1.0);
        }

        if let Some(storage) = &plant.storage {
            add_storage_balance(ctx, plant, storage, boundary.level(&plant.id)?)?;
        }
    }

    Ok(())
}

/// `level[t] - level[prev] - η·charge[t] + gen[t]/η = inflow[t]`
fn add_storage_balance(
    ctx: &mut MarketContext,
    plant: &Plant,
    storage: &Storage,
    boundary_level: f64,
) -> Result<(), DispatchError> {
    let eta = plant.efficiency.value();
    let range = ctx.range;
    let var = |map: &VarMap<(PlantID, u32)>, t: u32| map[&(plant.id.clone(), t)];

    for t in range.iter() {
        let level = var(&ctx.variables.level, t);
        let mut terms = vec![
            (level, 1.0),
            (var(&ctx.variables.charge, t), -eta),
            (var(&ctx.variables.generation, t), 1.0 / eta),
        ];
        let mut rhs = storage.inflow.at(t, &plant.id)?;

        if t == range.start && ctx.setup.storage.boundary == StorageBoundary::Carried {
            rhs += boundary_level;
        } else {
            let prev = prev_period(&range, t);
            if prev == t {
                // Single-step cyclic horizon: the level terms cancel, so hold the level at the
                // boundary
                terms.remove(0);
                let column = ctx.problem.column_mut(level);
                column.lower = boundary_level;
                column.upper = boundary_level;
            } else {
                terms.push((var(&ctx.variables.level, prev), -1.0));
            }
        }

        ctx.problem.add_row("storage_balance", rhs..=rhs, terms);
    }

    Ok(())
}

/// Add curtailment and lost load for every balance area, with the area's demand
fn add_area_variables(ctx: &mut MarketContext) {
    let costs = ctx.setup.costs;
    let areas = ctx
        .areas
        .iter()
        .map(|(area, nodes)| (area.clone(), nodes.clone()))
        .collect::<Vec<_>>();

    for (area, nodes) in areas {
        for t in ctx.range.iter() {
            let infeed: f64 = nodes.iter().map(|n| ctx.infeed[&(n.clone(), t)]).sum();
            let demand: f64 = nodes.iter().map(|n| ctx.grid_demand[&(n.clone(), t)]).sum();
            let key = (area.clone(), t);
            let balance_key = BalanceKey::Area(area.clone(), t);

            let curtailment = ctx
                .problem
                .add_column(costs.curtailment.value(), 0.0..=infeed);
            let lost_load = ctx.problem.add_column(costs.lost_load.value(), 0.0..);
            ctx.variables.curtailment.insert(key.clone(), curtailment);
            ctx.variables.lost_load.insert(key, lost_load);

            ctx.add_to_balance(balance_key.clone(), curtailment, -1.0);
            ctx.add_to_balance(balance_key.clone(), lost_load, 1.0);
            ctx.add_demand(balance_key, demand);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{raw_parameters, setup, single_node_raw, solve_market, storage_raw};
    use crate::model::RawParameters;
    use crate::simulation::optimisation::{HighsSolver, Solver};
    use crate::units::Dimensionless;
    use float_cmp::assert_approx_eq;
    use rstest::rstest;

    #[test]
    fn test_apportion() {
        assert_eq!(apportion(6.0, &[1.0, 2.0]), [2.0, 4.0]);
        assert_eq!(apportion(6.0, &[0.0, 0.0]), [3.0, 3.0]);
    }

    #[rstest]
    #[case(MarketType::Zonal)]
    #[case(MarketType::Nodal)]
    fn test_single_node_sanity(
        single_node_raw: RawParameters,
        mut setup: Setup,
        #[case] market_type: MarketType,
    ) {
        setup.market.market_type = market_type;
        let parameters = Parameters::new(single_node_raw).unwrap();
        let outcome = solve_market(&parameters, &setup, TimeRange::new(1, 1));

        assert_approx_eq!(f64, outcome.generation[&("p1".into(), 1)], 60.0, epsilon = 1e-6);
        assert_approx_eq!(f64, outcome.curtailment.values().sum(), 0.0, epsilon = 1e-6);
        assert_approx_eq!(f64, outcome.lost_load.values().sum(), 0.0, epsilon = 1e-6);
    }

    #[rstest]
    fn test_lost_load_when_short(mut single_node_raw: RawParameters, setup: Setup) {
        single_node_raw.nodes.get_mut("n1").unwrap().demand = 130.0.into();
        let parameters = Parameters::new(single_node_raw).unwrap();
        let outcome = solve_market(&parameters, &setup, TimeRange::new(1, 1));

        assert_approx_eq!(f64, outcome.generation[&("p1".into(), 1)], 100.0, epsilon = 1e-6);
        assert_approx_eq!(f64, outcome.lost_load.values().sum(), 30.0, epsilon = 1e-6);
        assert_approx_eq!(f64, outcome.nodal[&("n1".into(), 1)].lost_load, 30.0, epsilon = 1e-6);
    }

    #[rstest]
    fn test_balance_rows_emitted_last(raw_parameters: RawParameters, setup: Setup) {
        let parameters = Parameters::new(raw_parameters).unwrap();
        let formulator = MarketFormulator::new(&setup, &parameters).unwrap();
        let boundary = StorageState::initial(&parameters, Dimensionless(0.5));
        let model = formulator
            .build(&parameters, &setup, TimeRange::new(1, 2), &boundary)
            .unwrap();

        let families = model.problem.families();
        assert_eq!(families.last(), Some(&"balance"));
        // One balance row per zone and time step
        assert_eq!(model.balance_rows.len(), 2 * parameters.zones.len());
    }

    #[rstest]
    fn test_prices_extracted_when_requested(single_node_raw: RawParameters, setup: Setup) {
        let parameters = Parameters::new(single_node_raw).unwrap();
        let formulator = MarketFormulator::new(&setup, &parameters).unwrap();
        let boundary = StorageState::initial(&parameters, Dimensionless(0.5));
        let model = formulator
            .build(&parameters, &setup, TimeRange::new(1, 1), &boundary)
            .unwrap();
        let solution = HighsSolver
            .solve(&model.problem, &setup.solver.attributes)
            .unwrap();
        let outcome = model
            .extract(&parameters, formulator.scope(), &solution, true)
            .unwrap();

        // The marginal plant sets the price
        let price = outcome.prices[&BalanceKey::Area("z1".into(), 1)];
        assert_approx_eq!(f64, price, 20.0, epsilon = 1e-6);
    }

    #[rstest]
    fn test_single_step_cyclic_storage_level(storage_raw: RawParameters, mut setup: Setup) {
        setup.storage.boundary = StorageBoundary::Cyclic;
        let parameters = Parameters::new(storage_raw).unwrap();
        let outcome = solve_market(&parameters, &setup, TimeRange::new(4, 4));

        // Half of the 40 capacity
        let key = ("battery".into(), 4);
        assert_approx_eq!(f64, outcome.level[&key], 20.0, epsilon = 1e-6);
        assert_approx_eq!(
            f64,
            0.9 * outcome.charge[&key],
            outcome.generation[&key] / 0.9,
            epsilon = 1e-6
        );
    }
}
