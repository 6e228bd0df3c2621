//! Functionality for running the simulation: one market clearing (and optionally a redispatch)
//! per sub-horizon, in order, carrying storage levels from one sub-horizon to the next.
use crate::error::DispatchError;
use crate::horizon::{TimeRange, split_horizon};
use crate::id::PlantID;
use crate::model::{Parameters, Setup};
use crate::output::{ResultSink, ResultTables};
use crate::units::Dimensionless;
use anyhow::{Context, Result};
use indexmap::IndexMap;
use log::{debug, error, info};

pub mod hooks;
use hooks::{BuildContext, Hook, SolveContext, StageVariables};
pub mod market;
use market::{MarketFormulator, MarketOutcome};
pub mod optimisation;
use optimisation::{Problem, RawSolution, Solver, diagnose_infeasibility};
pub mod redispatch;
use redispatch::{RedispatchOutcome, build_redispatch};

/// The problems solved for each sub-horizon
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    /// Day-ahead market clearing
    Market,
    /// Network redispatch of the cleared market
    Redispatch,
}

/// The level of every storage at the boundary between two sub-horizons
#[derive(Debug, Clone, PartialEq)]
pub struct StorageState(IndexMap<PlantID, f64>);

impl StorageState {
    /// Every storage filled to `start_level` of its capacity
    pub fn initial(parameters: &Parameters, start_level: Dimensionless) -> Self {
        Self(
            parameters
                .iter_storages()
                .map(|(plant, storage)| {
                    (plant.id.clone(), storage.capacity.value() * start_level.value())
                })
                .collect(),
        )
    }

    /// The boundary level of a storage
    pub fn level(&self, plant_id: &PlantID) -> Result<f64, DispatchError> {
        self.0
            .get(plant_id)
            .copied()
            .ok_or_else(|| DispatchError::data_contract(plant_id, "no boundary storage level"))
    }

    /// Take the levels at the end of the solved sub-horizon as the next boundary
    pub fn update(
        &mut self,
        outcome: &MarketOutcome,
        range: TimeRange,
    ) -> Result<(), DispatchError> {
        for (plant_id, level) in &mut self.0 {
            *level = outcome
                .level
                .get(&(plant_id.clone(), range.stop))
                .copied()
                .ok_or_else(|| DispatchError::data_contract(plant_id, "no final storage level"))?;
        }

        Ok(())
    }

    /// Iterate over storages and their levels
    pub fn iter(&self) -> impl Iterator<Item = (&PlantID, f64)> {
        self.0.iter().map(|(id, level)| (id, *level))
    }
}

/// How far a sub-horizon got
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum HorizonState {
    /// Not yet started
    Created,
    /// Problems built
    Built,
    /// Problems solved to optimality
    Solved,
    /// Result tables assembled
    ResultsExtracted,
    /// Results handed to the sink
    Persisted,
    /// Formulation, solve or persistence failed
    Failed,
}

/// The final state of one sub-horizon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HorizonReport {
    /// The sub-horizon
    pub horizon: TimeRange,
    /// Its final state
    pub state: HorizonState,
}

/// Summary of a simulation run
#[derive(Debug, Default)]
pub struct RunReport {
    /// Every sub-horizon which was attempted, in order
    pub horizons: Vec<HorizonReport>,
    /// The error which stopped the run, if any
    pub error: Option<anyhow::Error>,
}

impl RunReport {
    /// Whether every sub-horizon was persisted
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
            && self
                .horizons
                .iter()
                .all(|report| report.state == HorizonState::Persisted)
    }

    /// Convert into an error if the run failed
    pub fn into_result(mut self) -> Result<Self> {
        match self.error.take() {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}

/// Runs the sub-horizons of a model in order
pub struct Simulation<'a> {
    parameters: &'a Parameters,
    setup: &'a Setup,
    solver: &'a dyn Solver,
    hooks: Vec<Box<dyn Hook + 'a>>,
    with_duals: bool,
}

impl<'a> Simulation<'a> {
    /// Create a new simulation
    pub fn new(parameters: &'a Parameters, setup: &'a Setup, solver: &'a dyn Solver) -> Self {
        Self {
            parameters,
            setup,
            solver,
            hooks: Vec::new(),
            with_duals: setup.solver.duals,
        }
    }

    /// Register hooks, to be invoked in the given order
    pub fn with_hooks(mut self, hooks: Vec<Box<dyn Hook + 'a>>) -> Self {
        self.hooks.extend(hooks);
        self
    }

    /// Extract balance duals even if the setup doesn't ask for them
    pub fn with_duals(mut self, with_duals: bool) -> Self {
        self.with_duals |= with_duals;
        self
    }

    /// Run every sub-horizon, handing the results of each to `sink`.
    ///
    /// The run stops at the first failure. Sub-horizons persisted before the failure are not
    /// rolled back.
    pub fn run(&mut self, sink: &mut dyn ResultSink) -> RunReport {
        let mut report = RunReport::default();

        let prepared = self.prepare();
        let (ranges, formulator) = match prepared {
            Ok(prepared) => prepared,
            Err(err) => {
                report.error = Some(err);
                return report;
            }
        };

        let mut storage = StorageState::initial(self.parameters, self.setup.storage.start_level);
        for range in ranges {
            info!("Sub-horizon: {range}");
            let mut state = HorizonState::Created;
            let result = self.run_horizon(range, &formulator, &mut storage, sink, &mut state);
            if let Err(err) = result {
                error!("Sub-horizon {range} failed after reaching state {state}");
                report.horizons.push(HorizonReport {
                    horizon: range,
                    state: HorizonState::Failed,
                });
                report.error = Some(err.context(format!("Failed to run sub-horizon {range}")));
                return report;
            }
            report.horizons.push(HorizonReport {
                horizon: range,
                state,
            });
        }

        report
    }

    /// Check the configuration against the parameters before anything is built
    fn prepare(&self) -> Result<(Vec<TimeRange>, MarketFormulator)> {
        self.setup.validate()?;
        let ranges = split_horizon(&self.setup.horizon)?;
        for range in &ranges {
            if !self.parameters.time.covers(range) {
                Err(DispatchError::configuration(format!(
                    "sub-horizon {range} lies outside the modelled time steps {}",
                    self.parameters.time
                )))?;
            }
        }
        let formulator = MarketFormulator::new(self.setup, self.parameters)?;
        debug!("Split horizon into {} sub-horizons", ranges.len());

        Ok((ranges, formulator))
    }

    fn run_horizon(
        &mut self,
        range: TimeRange,
        formulator: &MarketFormulator,
        storage: &mut StorageState,
        sink: &mut dyn ResultSink,
        state: &mut HorizonState,
    ) -> Result<()> {
        let parameters = self.parameters;

        // Market clearing
        let mut ctx = formulator.contribute(parameters, self.setup, range, storage)?;
        self.invoke_before_build(
            range,
            Stage::Market,
            &mut ctx.problem,
            StageVariables::Market(&ctx.variables),
        )?;
        let market_model = ctx.finish();
        *state = HorizonState::Built;
        let solution = self.solve(range, Stage::Market, &market_model.problem)?;
        let market =
            market_model.extract(parameters, formulator.scope(), &solution, self.with_duals)?;

        // Redispatch
        let redispatch = if self.setup.market.redispatch {
            let mut model = build_redispatch(parameters, self.setup, range, &market)?;
            self.invoke_before_build(
                range,
                Stage::Redispatch,
                &mut model.problem,
                StageVariables::Redispatch(&model.variables),
            )?;
            let solution = self.solve(range, Stage::Redispatch, &model.problem)?;
            Some(model.extract(parameters, &solution))
        } else {
            None
        };
        *state = HorizonState::Solved;
        log_outcome(range, &market, redispatch.as_ref());

        let tables = ResultTables::new(parameters, &market, redispatch.as_ref())?;
        *state = HorizonState::ResultsExtracted;
        let solve_ctx = SolveContext {
            horizon: range,
            parameters,
            tables: &tables,
        };
        for hook in &mut self.hooks {
            hook.after_solve(&solve_ctx)
                .with_context(|| format!("Hook {} failed after solving", hook.name()))?;
        }

        sink.persist(&self.setup.scenario, range, &tables)?;
        *state = HorizonState::Persisted;

        storage.update(&market, range)?;

        Ok(())
    }

    fn invoke_before_build(
        &mut self,
        horizon: TimeRange,
        stage: Stage,
        problem: &mut Problem,
        variables: StageVariables,
    ) -> Result<()> {
        for hook in &mut self.hooks {
            let mut ctx = BuildContext {
                horizon,
                stage,
                parameters: self.parameters,
                problem: &mut *problem,
                variables,
            };
            hook.before_build(&mut ctx)
                .with_context(|| format!("Hook {} failed before building {stage}", hook.name()))?;
        }

        Ok(())
    }

    /// Solve, naming the implicated constraint family on failure
    fn solve(
        &self,
        range: TimeRange,
        stage: Stage,
        problem: &Problem,
    ) -> Result<RawSolution, DispatchError> {
        let attributes = &self.setup.solver.attributes;
        self.solver.solve(problem, attributes).map_err(|failure| {
            let family = if failure.may_be_infeasible() {
                diagnose_infeasibility(self.solver, problem, attributes)
            } else {
                None
            };
            DispatchError::Solver {
                horizon: range.to_string(),
                stage: stage.to_string(),
                status: failure.to_string(),
                family: family.unwrap_or("unknown").to_string(),
            }
        })
    }
}

fn log_outcome(range: TimeRange, market: &MarketOutcome, redispatch: Option<&RedispatchOutcome>) {
    info!("Market cleared for {range}: objective {:.2}", market.objective);
    let lost_load: f64 = market.lost_load.values().sum();
    if lost_load > 0.0 {
        info!("Lost load in {range}: {lost_load:.2}");
    }
    if let Some(redispatch) = redispatch {
        info!("Redispatch cost for {range}: {:.2}", redispatch.objective);
    }
}

/// Solve every sub-horizon of a model without persisting anything
pub fn run_in_memory(
    parameters: &Parameters,
    setup: &Setup,
    solver: &dyn Solver,
) -> Result<Vec<(TimeRange, ResultTables)>> {
    let mut sink = crate::output::MemorySink::default();
    Simulation::new(parameters, setup, solver)
        .run(&mut sink)
        .into_result()?;

    Ok(sink.into_tables())
}
