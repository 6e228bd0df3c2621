//! Nodal clearing: one balance per node, with DC power flow over the network.
use super::{BalanceKey, MarketContext, MarketOutcome, MarketScope};
use crate::error::DispatchError;
use crate::id::{AreaID, NodeID};
use crate::model::Parameters;
use crate::simulation::optimisation::{Problem, Var};
use nalgebra::DVector;

/// Balance areas are nodes
#[derive(Debug, Clone, Copy)]
pub struct NodalScope;

/// Add one voltage angle per node, with the slack angles fixed to zero
pub fn add_angles(problem: &mut Problem, parameters: &Parameters) -> Vec<Var> {
    let slack = &parameters.network().slack;
    (0..parameters.nodes.len())
        .map(|i| {
            if slack.contains(&i) {
                problem.add_fixed_column(0.0, 0.0)
            } else {
                problem.add_column(0.0, ..)
            }
        })
        .collect()
}

/// Terms `Σ_m b[n,m]·θ[m]` for the node with index `n`
pub fn angle_terms(parameters: &Parameters, n: usize, angles: &[Var]) -> Vec<(Var, f64)> {
    parameters
        .network()
        .b
        .row(n)
        .iter()
        .zip(angles)
        .filter(|(coeff, _)| **coeff != 0.0)
        .map(|(coeff, var)| (*var, *coeff))
        .collect()
}

/// `-capacity <= Σ_n h[l,n]·θ[n] <= capacity` for each AC line
pub fn add_line_flow_limits(problem: &mut Problem, parameters: &Parameters, angles: &[Var]) {
    let h = &parameters.network().h;
    for (l, line) in parameters.lines.values().enumerate() {
        let capacity = line.capacity.value();
        let terms = h
            .row(l)
            .iter()
            .zip(angles)
            .filter(|(coeff, _)| **coeff != 0.0)
            .map(|(coeff, var)| (*var, *coeff))
            .collect::<Vec<_>>();
        problem.add_row("line_flow_limits", -capacity..=capacity, terms);
    }
}

impl MarketScope for NodalScope {
    fn area_of(&self, _parameters: &Parameters, node: &NodeID) -> Result<AreaID, DispatchError> {
        Ok(node.into())
    }

    /// `injection[n,t] = Σ_m b[n,m]·θ[m,t] + Σ_d A_dc[d,n]·flow[d,t]`
    fn contribute(&self, ctx: &mut MarketContext) -> Result<(), DispatchError> {
        let parameters = ctx.parameters;
        let dc_incidence = &parameters.network().dc_incidence;

        for t in ctx.range.iter() {
            let angles = add_angles(&mut ctx.problem, parameters);
            let dc_flows = parameters
                .dc_lines
                .values()
                .map(|dc_line| {
                    let capacity = dc_line.capacity.value();
                    let var = ctx.problem.add_column(0.0, -capacity..=capacity);
                    ctx.variables.dc_flow.insert((dc_line.id.clone(), t), var);
                    var
                })
                .collect::<Vec<_>>();

            for (n, node_id) in parameters.nodes.keys().enumerate() {
                let injection = ctx.problem.add_column(0.0, ..);
                let mut terms = vec![(injection, 1.0)];
                terms.extend(
                    angle_terms(parameters, n, &angles)
                        .into_iter()
                        .map(|(var, coeff)| (var, -coeff)),
                );
                for (d, var) in dc_flows.iter().enumerate() {
                    let coeff = dc_incidence[(d, n)];
                    if coeff != 0.0 {
                        terms.push((*var, -coeff));
                    }
                }
                ctx.problem.add_row("nodal_injection", 0.0..=0.0, terms);

                ctx.variables
                    .angle
                    .insert((node_id.clone(), t), angles[n]);
                ctx.variables
                    .injection
                    .insert((node_id.clone(), t), injection);
                ctx.add_to_balance(BalanceKey::Area(node_id.into(), t), injection, -1.0);
            }

            add_line_flow_limits(&mut ctx.problem, parameters, &angles);
        }

        Ok(())
    }

    /// Flows from the AC part of each node's injection
    fn line_flows(
        &self,
        parameters: &Parameters,
        outcome: &MarketOutcome,
        t: u32,
    ) -> Result<DVector<f64>, DispatchError> {
        let dc_incidence = &parameters.network().dc_incidence;
        let mut positions = DVector::zeros(parameters.nodes.len());
        for (n, node_id) in parameters.nodes.keys().enumerate() {
            let mut position = outcome
                .injection
                .get(&(node_id.clone(), t))
                .copied()
                .ok_or_else(|| DispatchError::data_contract(node_id, "no injection"))?;
            for (d, dc_id) in parameters.dc_lines.keys().enumerate() {
                position -= dc_incidence[(d, n)] * outcome.dc_flow[&(dc_id.clone(), t)];
            }
            positions[n] = position;
        }

        Ok(parameters.network().line_flows(&positions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{setup, solve_market, triangle_raw};
    use crate::horizon::TimeRange;
    use crate::model::setup::MarketType;
    use crate::model::{RawParameters, Setup};
    use crate::units::Power;
    use float_cmp::assert_approx_eq;
    use rstest::rstest;

    #[rstest]
    fn test_nodal_flows_within_limits(mut triangle_raw: RawParameters, mut setup: Setup) {
        setup.market.market_type = MarketType::Nodal;
        triangle_raw.lines.get_mut("l3").unwrap().capacity = Power(5.0);
        let parameters = Parameters::new(triangle_raw).unwrap();
        let outcome = solve_market(&parameters, &setup, TimeRange::new(1, 1));

        for line in parameters.lines.values() {
            let flow = outcome.line_flows[&(line.id.clone(), 1)];
            assert!(flow.abs() <= line.capacity.value() + 1e-6);
        }

        // Injections balance across the network
        let total: f64 = outcome.injection.values().sum();
        assert_approx_eq!(f64, total, 0.0, epsilon = 1e-6);
    }

    #[rstest]
    fn test_angle_terms_skip_zeros(triangle_raw: RawParameters) {
        let parameters = Parameters::new(triangle_raw).unwrap();
        let mut problem = Problem::default();
        let angles = add_angles(&mut problem, &parameters);
        assert_eq!(angle_terms(&parameters, 0, &angles).len(), 3);
        // Slack angle is pinned
        assert_eq!(problem.columns()[angles[0].index()].upper, 0.0);
    }
}
