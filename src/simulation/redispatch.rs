//! Redispatch: adjust the day-ahead schedule so that it respects the network.
//!
//! The cleared market is taken as fixed. Grid plants can be moved up or down, grid storages can
//! discharge or charge more than scheduled and non-dispatchable infeed can be curtailed, all at a
//! cost, so that the resulting nodal positions satisfy the DC power flow and line limits.
use super::market::nodal::{add_angles, add_line_flow_limits, angle_terms};
use super::market::{MarketOutcome, ValueMap, VarMap};
use super::optimisation::{Problem, RawSolution, Var};
use crate::error::DispatchError;
use crate::horizon::TimeRange;
use crate::id::{DcLineID, LineID, NodeID, PlantID};
use crate::model::{Parameters, Plant, Setup};
use log::debug;
use nalgebra::DVector;
use std::hash::Hash;

/// The variables of a redispatch problem
#[derive(Debug, Default)]
pub struct RedispatchVariables {
    /// Extra output of dispatchable plants
    pub up: VarMap<(PlantID, u32)>,
    /// Reduced output of dispatchable plants
    pub down: VarMap<(PlantID, u32)>,
    /// Extra discharge of storages
    pub storage_up: VarMap<(PlantID, u32)>,
    /// Extra charging of storages
    pub storage_down: VarMap<(PlantID, u32)>,
    /// Deviation of storage levels from the day-ahead schedule
    pub deviation: VarMap<(PlantID, u32)>,
    /// Curtailed non-dispatchable infeed per node
    pub curtailment: VarMap<(NodeID, u32)>,
    /// Voltage angle per node
    pub angle: VarMap<(NodeID, u32)>,
    /// Flow on DC lines in their own direction
    pub dc_forward: VarMap<(DcLineID, u32)>,
    /// Flow on DC lines against their direction
    pub dc_backward: VarMap<(DcLineID, u32)>,
}

/// A fully built redispatch problem
#[derive(Debug)]
pub struct RedispatchModel {
    /// The sub-horizon
    pub range: TimeRange,
    /// The LP
    pub problem: Problem,
    /// Its variables
    pub variables: RedispatchVariables,
}

/// The redispatched schedule for one sub-horizon
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RedispatchOutcome {
    /// Objective value: the cost of the changes
    pub objective: f64,
    /// Extra output of dispatchable plants
    pub up: ValueMap<(PlantID, u32)>,
    /// Reduced output of dispatchable plants
    pub down: ValueMap<(PlantID, u32)>,
    /// Extra discharge of storages
    pub storage_up: ValueMap<(PlantID, u32)>,
    /// Extra charging of storages
    pub storage_down: ValueMap<(PlantID, u32)>,
    /// Deviation of storage levels from the day-ahead schedule
    pub deviation: ValueMap<(PlantID, u32)>,
    /// Curtailment per node
    pub curtailment: ValueMap<(NodeID, u32)>,
    /// Net flow on DC lines
    pub dc_flow: ValueMap<(DcLineID, u32)>,
    /// Flows on AC lines
    pub line_flows: ValueMap<(LineID, u32)>,
}

impl RedispatchOutcome {
    /// Whether any plant, storage or curtailment has been moved away from the market schedule
    pub fn is_noop(&self, market: &MarketOutcome, tolerance: f64) -> bool {
        let moved =
            |values: &ValueMap<(PlantID, u32)>| values.values().any(|v| v.abs() > tolerance);
        if [&self.up, &self.down, &self.storage_up, &self.storage_down]
            .into_iter()
            .any(moved)
        {
            return false;
        }

        self.curtailment.iter().all(|(key, value)| {
            let scheduled = market.nodal.get(key).map_or(0.0, |n| n.curtailment);
            (value - scheduled).abs() <= tolerance
        })
    }
}

/// Whether the plant takes part in redispatch
fn is_grid_plant(plant: &Plant, market: &MarketOutcome) -> bool {
    !market.self_supplied.contains(&plant.id)
}

fn scheduled(values: &ValueMap<(PlantID, u32)>, plant: &Plant, t: u32) -> f64 {
    values.get(&(plant.id.clone(), t)).copied().unwrap_or(0.0)
}

/// Build the redispatch problem for a cleared market
pub fn build_redispatch(
    parameters: &Parameters,
    setup: &Setup,
    range: TimeRange,
    market: &MarketOutcome,
) -> Result<RedispatchModel, DispatchError> {
    let costs = setup.costs;
    let mut problem = Problem::default();
    let mut variables = RedispatchVariables::default();

    // Nodal balance terms and right-hand sides, added once every variable exists
    let mut balance_terms: Vec<Vec<(Var, f64)>> = Vec::new();
    let mut balance_rhs = Vec::new();
    let node_index = |node: &NodeID| parameters.nodes.get_index_of(node);

    for t in range.iter() {
        let mut terms: Vec<Vec<(Var, f64)>> = vec![Vec::new(); parameters.nodes.len()];

        for plant in parameters.plants.values() {
            if !is_grid_plant(plant, market) {
                continue;
            }
            let n = node_index(&plant.node)
                .ok_or_else(|| DispatchError::data_contract(&plant.id, "unknown node"))?;
            let key = (plant.id.clone(), t);
            let generation = scheduled(&market.generation, plant, t);
            let gmax = plant.gmax.value();

            if plant.is_storage() {
                let charge = scheduled(&market.charge, plant, t);
                let up = problem.add_column(
                    costs.storage_adjust.value(),
                    0.0..=(gmax - generation).max(0.0),
                );
                let down = problem.add_column(
                    costs.storage_adjust.value(),
                    0.0..=(gmax - charge).max(0.0),
                );
                variables.storage_up.insert(key.clone(), up);
                variables.storage_down.insert(key, down);
                terms[n].extend([(up, 1.0), (down, -1.0)]);
            } else if plant.is_dispatchable() {
                let available = parameters.available_output(plant, t)?;
                let up = problem.add_column(
                    costs.ramp.value(),
                    0.0..=(available - generation).max(0.0),
                );
                let down = problem.add_column(costs.ramp.value(), 0.0..=generation.max(0.0));
                variables.up.insert(key.clone(), up);
                variables.down.insert(key, down);
                terms[n].extend([(up, 1.0), (down, -1.0)]);
            }
        }

        let angles = add_angles(&mut problem, parameters);
        let dc_incidence = &parameters.network().dc_incidence;
        for (d, dc_line) in parameters.dc_lines.values().enumerate() {
            let capacity = dc_line.capacity.value();
            let forward = problem.add_column(0.0, 0.0..=capacity);
            let backward = problem.add_column(0.0, 0.0..=capacity);
            let key = (dc_line.id.clone(), t);
            variables.dc_forward.insert(key.clone(), forward);
            variables.dc_backward.insert(key, backward);
            for (n, node_terms) in terms.iter_mut().enumerate() {
                let coeff = dc_incidence[(d, n)];
                if coeff != 0.0 {
                    node_terms.extend([(forward, -coeff), (backward, coeff)]);
                }
            }
        }

        for (n, node_id) in parameters.nodes.keys().enumerate() {
            let key = (node_id.clone(), t);
            let schedule = market.nodal.get(&key).copied().unwrap_or_default();

            let mut infeed = 0.0;
            for plant in parameters.plants_in_node(node_id) {
                if is_grid_plant(plant, market) && !plant.is_dispatchable() && !plant.is_storage() {
                    infeed += parameters.available_output(plant, t)?;
                }
            }
            let curtailment = problem.add_column(costs.curtailment.value(), 0.0..=infeed);
            problem.add_objective_offset(-costs.curtailment.value() * schedule.curtailment);
            variables.curtailment.insert(key.clone(), curtailment);
            variables.angle.insert(key, angles[n]);

            let node_terms = &mut terms[n];
            node_terms.push((curtailment, -1.0));
            node_terms.extend(
                angle_terms(parameters, n, &angles)
                    .into_iter()
                    .map(|(var, coeff)| (var, -coeff)),
            );

            // Day-ahead position without the market's curtailment, which is replaced here
            let fixed = schedule.position() + schedule.curtailment;
            balance_rhs.push(-fixed);
        }
        balance_terms.extend(terms);

        add_line_flow_limits(&mut problem, parameters, &angles);
    }

    add_storage_deviation(&mut problem, &mut variables, parameters, range, market)?;

    for (terms, rhs) in balance_terms.into_iter().zip(balance_rhs) {
        problem.add_row("redispatch_balance", rhs..=rhs, terms);
    }
    debug!(
        "Built redispatch problem for {range} with {} columns and {} rows",
        problem.num_cols(),
        problem.num_rows()
    );

    Ok(RedispatchModel {
        range,
        problem,
        variables,
    })
}

/// `D[t] - D[t-1] + S_UP[t]/η - η·S_DOWN[t] = 0`, starting from and returning to no deviation
fn add_storage_deviation(
    problem: &mut Problem,
    variables: &mut RedispatchVariables,
    parameters: &Parameters,
    range: TimeRange,
    market: &MarketOutcome,
) -> Result<(), DispatchError> {
    for (plant, storage) in parameters.iter_storages() {
        if !is_grid_plant(plant, market) {
            continue;
        }
        let eta = plant.efficiency.value();
        let capacity = storage.capacity.value();

        let mut previous: Option<Var> = None;
        for t in range.iter() {
            let key = (plant.id.clone(), t);
            let level = scheduled(&market.level, plant, t);
            let deviation = if t == range.stop {
                problem.add_fixed_column(0.0, 0.0)
            } else {
                problem.add_column(0.0, -level..=(capacity - level))
            };
            variables.deviation.insert(key.clone(), deviation);

            let up = variables.storage_up.get(&key).copied().ok_or_else(|| {
                DispatchError::data_contract(&plant.id, "storage has no redispatch variables")
            })?;
            let down = variables.storage_down[&key];
            let mut terms = vec![(deviation, 1.0), (up, 1.0 / eta), (down, -eta)];
            if let Some(previous) = previous {
                terms.push((previous, -1.0));
            }
            problem.add_row("storage_deviation", 0.0..=0.0, terms);
            previous = Some(deviation);
        }
    }

    Ok(())
}

fn values<K: Clone + Eq + Hash>(vars: &VarMap<K>, solution: &RawSolution) -> ValueMap<K> {
    vars.iter()
        .map(|(key, var)| (key.clone(), solution.value(*var)))
        .collect()
}

impl RedispatchModel {
    /// Read the solution into a [`RedispatchOutcome`]
    pub fn extract(&self, parameters: &Parameters, solution: &RawSolution) -> RedispatchOutcome {
        let vars = &self.variables;
        let mut outcome = RedispatchOutcome {
            objective: solution.objective,
            up: values(&vars.up, solution),
            down: values(&vars.down, solution),
            storage_up: values(&vars.storage_up, solution),
            storage_down: values(&vars.storage_down, solution),
            deviation: values(&vars.deviation, solution),
            curtailment: values(&vars.curtailment, solution),
            ..Default::default()
        };

        for (key, forward) in &vars.dc_forward {
            let net = solution.value(*forward) - solution.value(vars.dc_backward[key]);
            outcome.dc_flow.insert(key.clone(), net);
        }

        let h = &parameters.network().h;
        for t in self.range.iter() {
            let angles = DVector::from_iterator(
                parameters.nodes.len(),
                parameters
                    .nodes
                    .keys()
                    .map(|node| solution.value(vars.angle[&(node.clone(), t)])),
            );
            let flows = h * angles;
            for (line_id, flow) in parameters.lines.keys().zip(flows.iter()) {
                outcome.line_flows.insert((line_id.clone(), t), *flow);
            }
        }

        outcome
    }
}
