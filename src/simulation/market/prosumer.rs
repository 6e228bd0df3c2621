//! How prosumers take part in the market.
use super::{BalanceKey, MarketContext, ProsumerPolicy};
use crate::error::{DispatchError, ensure_config};
use crate::id::NodeID;
use crate::model::{Parameters, Plant};
use crate::units::MoneyPerEnergy;
use indexmap::IndexSet;

/// Prosumers are not modelled separately: their plants feed the grid and their demand is added to
/// the demand at their node
#[derive(Debug, Clone, Copy)]
pub struct ExcludedProsumers;

impl ProsumerPolicy for ExcludedProsumers {
    fn is_self_supplied(&self, _plant: &Plant) -> bool {
        false
    }

    fn grid_demand(
        &self,
        parameters: &Parameters,
        node: &NodeID,
        t: u32,
    ) -> Result<f64, DispatchError> {
        Ok(parameters.demand(node, t)? + parameters.prosumer_demand(node, t)?)
    }

    fn contribute(&self, _ctx: &mut MarketContext) -> Result<(), DispatchError> {
        Ok(())
    }
}

/// Prosumers at each node balance their own plants against their own demand, buying shortfalls
/// from and selling surpluses to the grid at fixed prices
#[derive(Debug, Clone, Copy)]
pub struct OptimisedProsumers {
    buy_price: f64,
    sell_price: f64,
}

impl OptimisedProsumers {
    /// Create the policy. Buying must not be cheaper than selling, or prosumers could trade in a
    /// loop at a profit.
    pub fn new(
        buy_price: MoneyPerEnergy,
        sell_price: MoneyPerEnergy,
    ) -> Result<Self, DispatchError> {
        ensure_config!(
            buy_price >= sell_price,
            "prosumer buy_price ({}) is below sell_price ({})",
            buy_price.value(),
            sell_price.value()
        );

        Ok(Self {
            buy_price: buy_price.value(),
            sell_price: sell_price.value(),
        })
    }
}

impl ProsumerPolicy for OptimisedProsumers {
    fn is_self_supplied(&self, plant: &Plant) -> bool {
        plant.prosumer
    }

    fn grid_demand(
        &self,
        parameters: &Parameters,
        node: &NodeID,
        t: u32,
    ) -> Result<f64, DispatchError> {
        parameters.demand(node, t)
    }

    /// `Σ gen - Σ charge + buy - sell = prosumer demand`, with `sell - buy` fed into the grid
    fn contribute(&self, ctx: &mut MarketContext) -> Result<(), DispatchError> {
        let parameters = ctx.parameters;
        let nodes: IndexSet<NodeID> = parameters
            .nodes
            .keys()
            .filter(|node| {
                parameters.prosumer_demand.contains_key(*node)
                    || parameters.plants_in_node(node).any(|plant| plant.prosumer)
            })
            .cloned()
            .collect();

        for node in &nodes {
            let area = ctx.area_of(node)?.clone();
            for t in ctx.range.iter() {
                let key = (node.clone(), t);
                let buy = ctx.problem.add_column(self.buy_price, 0.0..);
                let sell = ctx.problem.add_column(-self.sell_price, 0.0..);
                ctx.variables.buy.insert(key.clone(), buy);
                ctx.variables.sell.insert(key, sell);

                let prosumer_key = BalanceKey::Prosumer(node.clone(), t);
                ctx.add_to_balance(prosumer_key.clone(), buy, 1.0);
                ctx.add_to_balance(prosumer_key.clone(), sell, -1.0);
                ctx.add_demand(prosumer_key, parameters.prosumer_demand(node, t)?);

                let grid_key = BalanceKey::Area(area.clone(), t);
                ctx.add_to_balance(grid_key.clone(), sell, 1.0);
                ctx.add_to_balance(grid_key, buy, -1.0);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{plant, setup, single_node_raw, solve_market};
    use crate::horizon::TimeRange;
    use crate::model::setup::ProsumerSetup;
    use crate::model::{PlantKind, RawParameters, Setup};
    use crate::profile::Profile;
    use crate::units::Power;
    use float_cmp::assert_approx_eq;
    use rstest::{fixture, rstest};

    /// A single node with a prosumer PV plant of 30 and prosumer demand of 10
    #[fixture]
    fn prosumer_raw(mut single_node_raw: RawParameters) -> RawParameters {
        let mut pv = plant("pv", "n1");
        pv.kind = PlantKind::NonDispatchable;
        pv.gmax = Power(30.0);
        pv.prosumer = true;
        single_node_raw.plants.insert(pv.id.clone(), pv);
        single_node_raw
            .prosumer_demand
            .insert("n1".into(), Profile::Fixed(10.0));
        single_node_raw
    }

    #[test]
    fn test_buy_below_sell_rejected() {
        assert!(matches!(
            OptimisedProsumers::new(MoneyPerEnergy(5.0), MoneyPerEnergy(10.0)),
            Err(DispatchError::Configuration(_))
        ));
    }

    #[rstest]
    fn test_optimised_prosumers_sell_surplus(prosumer_raw: RawParameters, mut setup: Setup) {
        setup.prosumers = ProsumerSetup::Optimized {
            buy_price: MoneyPerEnergy(40.0),
            sell_price: MoneyPerEnergy(5.0),
        };
        let parameters = Parameters::new(prosumer_raw).unwrap();
        let outcome = solve_market(&parameters, &setup, TimeRange::new(1, 1));

        let key = ("n1".into(), 1);
        assert_approx_eq!(f64, outcome.sell[&key], 20.0, epsilon = 1e-6);
        assert_approx_eq!(f64, outcome.buy[&key], 0.0, epsilon = 1e-6);
        // The grid plant covers the rest of the node's demand of 60
        assert_approx_eq!(f64, outcome.generation[&("p1".into(), 1)], 40.0, epsilon = 1e-6);
    }

    #[rstest]
    fn test_excluded_prosumers_add_demand(prosumer_raw: RawParameters, setup: Setup) {
        let parameters = Parameters::new(prosumer_raw).unwrap();
        let outcome = solve_market(&parameters, &setup, TimeRange::new(1, 1));

        // 60 + 10 demand, 30 of it met by the PV plant
        assert!(outcome.buy.is_empty());
        assert_approx_eq!(f64, outcome.generation[&("p1".into(), 1)], 40.0, epsilon = 1e-6);
    }
}
