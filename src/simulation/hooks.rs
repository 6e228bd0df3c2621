//! Caller-supplied callbacks invoked at fixed points of each sub-horizon.
//!
//! Hooks are run in the order they were registered. Everything a hook may look at or change is
//! passed in explicitly through [`BuildContext`] or [`SolveContext`].
use super::Stage;
use super::market::MarketVariables;
use super::optimisation::Problem;
use super::redispatch::RedispatchVariables;
use crate::horizon::TimeRange;
use crate::model::Parameters;
use crate::output::ResultTables;
use anyhow::Result;

/// The variables of the problem being built
#[derive(Debug, Clone, Copy)]
pub enum StageVariables<'a> {
    /// Market clearing variables
    Market(&'a MarketVariables),
    /// Redispatch variables
    Redispatch(&'a RedispatchVariables),
}

/// What a hook sees before a problem is solved
pub struct BuildContext<'a> {
    /// The sub-horizon
    pub horizon: TimeRange,
    /// Which problem is being built
    pub stage: Stage,
    /// Model parameters
    pub parameters: &'a Parameters,
    /// The problem, which hooks may extend with extra columns and rows
    pub problem: &'a mut Problem,
    /// The variables added so far
    pub variables: StageVariables<'a>,
}

/// What a hook sees once a sub-horizon has been solved
pub struct SolveContext<'a> {
    /// The sub-horizon
    pub horizon: TimeRange,
    /// Model parameters
    pub parameters: &'a Parameters,
    /// The result tables about to be persisted
    pub tables: &'a ResultTables,
}

/// A named callback object
pub trait Hook {
    /// Name used in log messages and errors
    fn name(&self) -> &str;

    /// Called for each stage after its variables have been added and before it is solved.
    ///
    /// For the market stage, this happens before the balance rows are added.
    fn before_build(&mut self, _ctx: &mut BuildContext) -> Result<()> {
        Ok(())
    }

    /// Called once all stages of a sub-horizon have been solved
    fn after_solve(&mut self, _ctx: &SolveContext) -> Result<()> {
        Ok(())
    }
}

impl<H: Hook + ?Sized> Hook for &mut H {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn before_build(&mut self, ctx: &mut BuildContext) -> Result<()> {
        (**self).before_build(ctx)
    }

    fn after_solve(&mut self, ctx: &SolveContext) -> Result<()> {
        (**self).after_solve(ctx)
    }
}
