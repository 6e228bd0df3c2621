//! Fixtures for tests

use crate::error::DispatchError;
use crate::horizon::{TimeHorizon, TimeRange};
use crate::model::setup::{MarketSetup, MarketType};
use crate::model::{
    Line, Node, Ntc, Parameters, Plant, PlantKind, RawParameters, Setup, Storage,
};
use crate::profile::Profile;
use crate::simulation::StorageState;
use crate::simulation::market::{MarketFormulator, MarketOutcome};
use crate::simulation::optimisation::{HighsSolver, Solver};
use crate::units::{Dimensionless, Energy, MoneyPerEnergy, Power};
use indexmap::IndexMap;
use rstest::fixture;
use std::fmt::Debug;

/// Assert that an error with the given message occurs
macro_rules! assert_error {
    ($result:expr, $msg:expr) => {
        assert_eq!(
            $result.unwrap_err().chain().next().unwrap().to_string(),
            $msg
        );
    };
}
pub(crate) use assert_error;

/// Assert that a data contract violation for the given entity occurs
pub fn assert_data_contract<T: Debug>(result: Result<T, DispatchError>, expected: &str) {
    match result {
        Err(DispatchError::DataContract { entity, .. }) => assert_eq!(entity, expected),
        other => panic!("Expected data contract violation for {expected}, got {other:?}"),
    }
}

pub fn node(id: &str, zone: &str, slack: bool) -> Node {
    Node {
        id: id.into(),
        zone: zone.into(),
        slack,
        demand: Profile::Fixed(0.0),
    }
}

pub fn line(id: &str, node_from: &str, node_to: &str) -> Line {
    Line {
        id: id.into(),
        node_from: node_from.into(),
        node_to: node_to.into(),
        reactance: 0.1,
        resistance: 0.0,
        capacity: Power(1000.0),
    }
}

/// A fuel-less dispatchable plant with a marginal cost of 20 and a capacity of 100
pub fn plant(id: &str, node: &str) -> Plant {
    Plant {
        id: id.into(),
        node: node.into(),
        kind: PlantKind::Dispatchable,
        gmax: Power(100.0),
        efficiency: Dimensionless(1.0),
        fuel: None,
        om_cost: MoneyPerEnergy(20.0),
        availability: Profile::Fixed(1.0),
        storage: None,
        prosumer: false,
    }
}

fn raw_from(
    time: TimeRange,
    nodes: impl IntoIterator<Item = Node>,
    lines: impl IntoIterator<Item = Line>,
    plants: impl IntoIterator<Item = Plant>,
) -> RawParameters {
    RawParameters {
        time: Some(time),
        nodes: nodes.into_iter().map(|n| (n.id.clone(), n)).collect(),
        lines: lines.into_iter().map(|l| (l.id.clone(), l)).collect(),
        plants: plants.into_iter().map(|p| (p.id.clone(), p)).collect(),
        ..Default::default()
    }
}

/// Two nodes in one zone, one plant and a demand of 50 at the second node
#[fixture]
pub fn raw_parameters() -> RawParameters {
    let mut n2 = node("n2", "z1", false);
    n2.demand = Profile::Fixed(50.0);

    raw_from(
        TimeRange::new(1, 24),
        [node("n1", "z1", true), n2],
        [line("l1", "n1", "n2")],
        [plant("p1", "n1")],
    )
}

/// One node with a demand of 60 and one plant, for a single time step
#[fixture]
pub fn single_node_raw() -> RawParameters {
    let mut n1 = node("n1", "z1", true);
    n1.demand = Profile::Fixed(60.0);

    raw_from(TimeRange::new(1, 1), [n1], [], [plant("p1", "n1")])
}

/// Three nodes in a triangle split over two zones.
///
/// Cheap generation sits in the north, wind and most of the demand in the south.
#[fixture]
pub fn triangle_raw() -> RawParameters {
    let mut nodes = [
        node("n1", "north", true),
        node("n2", "north", false),
        node("n3", "south", false),
    ];
    for (node, demand) in nodes.iter_mut().zip([20.0, 30.0, 80.0]) {
        node.demand = Profile::Fixed(demand);
    }

    let mut p1 = plant("p1", "n1");
    p1.om_cost = MoneyPerEnergy(10.0);
    p1.gmax = Power(200.0);
    let mut p2 = plant("p2", "n2");
    p2.om_cost = MoneyPerEnergy(30.0);
    let mut wind = plant("wind", "n3");
    wind.kind = PlantKind::NonDispatchable;
    wind.gmax = Power(50.0);
    wind.om_cost = MoneyPerEnergy(0.0);
    wind.availability = Profile::Fixed(0.5);

    let mut raw = raw_from(
        TimeRange::new(1, 24),
        nodes,
        [
            line("l1", "n1", "n2"),
            line("l2", "n2", "n3"),
            line("l3", "n1", "n3"),
        ],
        [p1, p2, wind],
    );
    raw.ntc = [("north", "south"), ("south", "north")]
        .into_iter()
        .map(|(from, to)| Ntc {
            zone_from: from.into(),
            zone_to: to.into(),
            capacity: Power(100.0),
        })
        .collect();
    raw
}

/// [`raw_parameters`] with a battery and a demand peak every fourth hour which the plant
/// cannot cover alone
#[fixture]
pub fn storage_raw(mut raw_parameters: RawParameters) -> RawParameters {
    let demand: IndexMap<u32, f64> = (1..=24)
        .map(|t| (t, if t % 4 == 0 { 70.0 } else { 40.0 }))
        .collect();
    raw_parameters.nodes.get_mut("n2").unwrap().demand = Profile::Hourly(demand);
    raw_parameters.plants.get_mut("p1").unwrap().gmax = Power(60.0);

    let mut battery = plant("battery", "n1");
    battery.om_cost = MoneyPerEnergy(0.0);
    battery.efficiency = Dimensionless(0.9);
    battery.storage = Some(Storage {
        capacity: Energy(40.0),
        inflow: Profile::Fixed(0.0),
    });
    raw_parameters.plants.insert(battery.id.clone(), battery);
    raw_parameters
}

/// A zonal setup over the whole day, without redispatch
#[fixture]
pub fn setup() -> Setup {
    Setup {
        scenario: "test".into(),
        horizon: TimeHorizon {
            start: 1,
            offset: 0,
            split: 24,
            stop: 24,
        },
        market: MarketSetup {
            market_type: MarketType::Zonal,
            redispatch: false,
        },
        prosumers: Default::default(),
        costs: Default::default(),
        storage: Default::default(),
        solver: Default::default(),
    }
}

/// Build, solve and extract the market for one sub-horizon, with prices
pub fn solve_market(parameters: &Parameters, setup: &Setup, range: TimeRange) -> MarketOutcome {
    let formulator = MarketFormulator::new(setup, parameters).unwrap();
    let boundary = StorageState::initial(parameters, setup.storage.start_level);
    let model = formulator
        .build(parameters, setup, range, &boundary)
        .unwrap();
    let solution = HighsSolver
        .solve(&model.problem, &setup.solver.attributes)
        .unwrap();
    model
        .extract(parameters, formulator.scope(), &solution, true)
        .unwrap()
}
