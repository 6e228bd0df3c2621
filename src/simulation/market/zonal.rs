//! Zonal clearing: one balance per zone, exchange between zones limited by NTCs.
use super::{BalanceKey, MarketContext, MarketOutcome, MarketScope};
use crate::error::{DispatchError, ensure_config};
use crate::id::{AreaID, NodeID};
use crate::model::Parameters;
use nalgebra::DVector;

/// Balance areas are zones
#[derive(Debug, Clone, Copy)]
pub struct ZonalScope;

impl ZonalScope {
    /// Check the network can be cleared zonally
    pub fn new(parameters: &Parameters) -> Result<Self, DispatchError> {
        ensure_config!(
            !parameters.zones.is_empty(),
            "zonal market requested but no zones are defined"
        );
        for node in parameters.nodes.values() {
            ensure_config!(
                !node.zone.0.is_empty(),
                "zonal market requested but node {} has no zone",
                node.id
            );
        }

        Ok(Self)
    }
}

impl MarketScope for ZonalScope {
    fn area_of(&self, parameters: &Parameters, node: &NodeID) -> Result<AreaID, DispatchError> {
        parameters.zone_of_node(node).map(AreaID::from)
    }

    /// `net_import[z,t] = Σ exchange[zz,z,t] - Σ exchange[z,zz,t]`
    fn contribute(&self, ctx: &mut MarketContext) -> Result<(), DispatchError> {
        let parameters = ctx.parameters;
        for t in ctx.range.iter() {
            for ((from, to), capacity) in &parameters.ntc {
                let var = ctx.problem.add_column(0.0, 0.0..=capacity.value());
                ctx.variables
                    .exchange
                    .insert((from.clone(), to.clone(), t), var);
            }

            for zone in &parameters.zones {
                let net_import = ctx.problem.add_column(0.0, ..);
                let mut terms = vec![(net_import, 1.0)];
                for from in parameters.ntc_imports(zone) {
                    terms.push((ctx.variables.exchange[&(from.clone(), zone.clone(), t)], -1.0));
                }
                for to in parameters.ntc_exports(zone) {
                    terms.push((ctx.variables.exchange[&(zone.clone(), to.clone(), t)], 1.0));
                }
                ctx.problem.add_row("exchange", 0.0..=0.0, terms);

                ctx.variables
                    .net_import
                    .insert((zone.clone(), t), net_import);
                ctx.add_to_balance(BalanceKey::Area(zone.into(), t), net_import, 1.0);
            }
        }

        Ok(())
    }

    fn line_flows(
        &self,
        parameters: &Parameters,
        outcome: &MarketOutcome,
        t: u32,
    ) -> Result<DVector<f64>, DispatchError> {
        let mut positions = DVector::zeros(parameters.nodes.len());
        for (i, node_id) in parameters.nodes.keys().enumerate() {
            let schedule = outcome
                .nodal
                .get(&(node_id.clone(), t))
                .ok_or_else(|| DispatchError::data_contract(node_id, "no nodal schedule"))?;
            positions[i] = schedule.position();
        }

        Ok(parameters.network().line_flows(&positions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{setup, solve_market, triangle_raw};
    use crate::horizon::TimeRange;
    use crate::model::{RawParameters, Setup};
    use crate::units::Power;
    use float_cmp::assert_approx_eq;
    use rstest::rstest;

    #[rstest]
    fn test_exchange_limited_by_ntc(mut triangle_raw: RawParameters, setup: Setup) {
        for ntc in &mut triangle_raw.ntc {
            ntc.capacity = Power(10.0);
        }
        let parameters = Parameters::new(triangle_raw).unwrap();
        let outcome = solve_market(&parameters, &setup, TimeRange::new(1, 1));

        let import = outcome.net_import[&("south".into(), 1)];
        assert!(import <= 10.0 + 1e-6);
        let export = outcome.net_import[&("north".into(), 1)];
        assert_approx_eq!(f64, import + export, 0.0, epsilon = 1e-6);
    }

    #[rstest]
    fn test_zonal_without_zone(mut triangle_raw: RawParameters) {
        triangle_raw.nodes.get_mut("n3").unwrap().zone = "".into();
        triangle_raw.ntc.clear();
        let parameters = Parameters::new(triangle_raw).unwrap();
        assert!(matches!(
            ZonalScope::new(&parameters),
            Err(DispatchError::Configuration(_))
        ));
    }
}
