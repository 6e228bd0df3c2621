//! Integration tests which solve the demo model in memory.
use float_cmp::assert_approx_eq;
use gridmarket::input::load_model;
use gridmarket::model::setup::MarketType;
use gridmarket::output::ResultTables;
use gridmarket::simulation::optimisation::HighsSolver;
use gridmarket::simulation::run_in_memory;
use itertools::Itertools;
use std::path::PathBuf;

/// Get the path to the example model.
fn get_model_dir() -> PathBuf {
    PathBuf::from("demos/three_node")
}

fn run(market_type: MarketType, redispatch: bool) -> Vec<ResultTables> {
    let (mut setup, parameters) = load_model(get_model_dir()).unwrap();
    setup.market.market_type = market_type;
    setup.market.redispatch = redispatch;
    run_in_memory(&parameters, &setup, &HighsSolver)
        .unwrap()
        .into_iter()
        .map(|(_, tables)| tables)
        .collect()
}

#[test]
fn test_nodal_market_respects_network() {
    let results = run(MarketType::Nodal, false);
    assert_eq!(results.len(), 2);

    for tables in &results {
        for row in &tables.line_flow {
            assert!(row.market_flow.abs() <= row.capacity + 1e-6);
            assert!(row.redispatch_flow.is_none());
        }

        // Without DC lines the nodal positions cancel out
        let positions = tables
            .balance
            .iter()
            .into_group_map_by(|row| row.timestep);
        for rows in positions.values() {
            let total: f64 = rows.iter().map(|row| row.position).sum();
            assert_approx_eq!(f64, total, 0.0, epsilon = 1e-6);
        }
    }
}

#[test]
fn test_redispatch_respects_network() {
    let results = run(MarketType::Zonal, true);

    for tables in &results {
        assert!(!tables.exchange.is_empty());
        for row in &tables.line_flow {
            let flow = row.redispatch_flow.unwrap();
            assert!(flow.abs() <= row.capacity + 1e-6);
        }

        // Redispatch moves plants up and down by the same amount in each time step
        let by_step = tables
            .redispatch_generation
            .iter()
            .into_group_map_by(|row| row.timestep);
        let storage_by_step = tables
            .redispatch_storage
            .iter()
            .into_group_map_by(|row| row.timestep);
        let curtailment_by_step = tables
            .redispatch_curtailment
            .iter()
            .into_group_map_by(|row| row.timestep);
        for (t, rows) in &by_step {
            let mut net: f64 = rows.iter().map(|row| row.up - row.down).sum();
            if let Some(rows) = storage_by_step.get(t) {
                net += rows.iter().map(|row| row.discharge - row.charge).sum::<f64>();
            }
            if let Some(rows) = curtailment_by_step.get(t) {
                net -= rows
                    .iter()
                    .map(|row| row.curtailment - row.market_curtailment)
                    .sum::<f64>();
            }
            assert_approx_eq!(f64, net, 0.0, epsilon = 1e-6);
        }
    }
}
