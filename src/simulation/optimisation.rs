//! The linear programs built for each sub-horizon and the boundary to the solver.
//!
//! Formulators build a solver-independent [`Problem`]. Rows are tagged with the name of the
//! constraint family they belong to, so that a failed solve can be traced back to a family.
use highs::{HighsModelStatus, RowProblem, Sense};
use indexmap::{IndexMap, IndexSet};
use log::debug;
use serde::Deserialize;
use std::ops::{Bound, RangeBounds};

/// A decision variable in a [`Problem`].
///
/// Note that this type does **not** include the value of the variable; it just refers to a
/// particular column of the problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Var(usize);

impl Var {
    /// The index of the column in the problem
    pub fn index(self) -> usize {
        self.0
    }
}

/// A column of a [`Problem`]
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    /// Objective coefficient
    pub cost: f64,
    /// Lower bound (may be `-inf`)
    pub lower: f64,
    /// Upper bound (may be `inf`)
    pub upper: f64,
}

/// A constraint of a [`Problem`]
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// The constraint family this row belongs to
    pub family: &'static str,
    /// Lower bound (may be `-inf`)
    pub lower: f64,
    /// Upper bound (may be `inf`)
    pub upper: f64,
    /// Coefficients of the variables in the row
    pub terms: Vec<(Var, f64)>,
}

/// A minimisation LP
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Problem {
    columns: Vec<Column>,
    rows: Vec<Row>,
    objective_offset: f64,
}

fn bound_value(bound: Bound<&f64>, unbounded: f64) -> f64 {
    match bound {
        Bound::Included(value) | Bound::Excluded(value) => *value,
        Bound::Unbounded => unbounded,
    }
}

fn to_bounds(bounds: impl RangeBounds<f64>) -> (f64, f64) {
    (
        bound_value(bounds.start_bound(), f64::NEG_INFINITY),
        bound_value(bounds.end_bound(), f64::INFINITY),
    )
}

impl Problem {
    /// Add a variable with the given objective coefficient and bounds
    pub fn add_column(&mut self, cost: f64, bounds: impl RangeBounds<f64>) -> Var {
        let (lower, upper) = to_bounds(bounds);
        self.columns.push(Column { cost, lower, upper });
        Var(self.columns.len() - 1)
    }

    /// Add a variable fixed to `value`
    pub fn add_fixed_column(&mut self, cost: f64, value: f64) -> Var {
        self.add_column(cost, value..=value)
    }

    /// Add a constraint, returning its row index
    pub fn add_row<I>(
        &mut self,
        family: &'static str,
        bounds: impl RangeBounds<f64>,
        terms: I,
    ) -> usize
    where
        I: IntoIterator<Item = (Var, f64)>,
    {
        let (lower, upper) = to_bounds(bounds);
        self.rows.push(Row {
            family,
            lower,
            upper,
            terms: terms.into_iter().collect(),
        });
        self.rows.len() - 1
    }

    /// Add a constant to the objective
    pub fn add_objective_offset(&mut self, value: f64) {
        self.objective_offset += value;
    }

    /// All the columns, in order
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// All the rows, in order
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Mutable access to a column, e.g. to change its cost or bounds
    pub fn column_mut(&mut self, var: Var) -> &mut Column {
        &mut self.columns[var.0]
    }

    /// Number of columns
    pub fn num_cols(&self) -> usize {
        self.columns.len()
    }

    /// Number of rows
    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    /// The constraint families present, in the order they were first added
    pub fn families(&self) -> IndexSet<&'static str> {
        self.rows.iter().map(|row| row.family).collect()
    }

    /// A copy of the problem with all rows of the given family removed
    pub fn without_family(&self, family: &str) -> Problem {
        Problem {
            columns: self.columns.clone(),
            rows: self
                .rows
                .iter()
                .filter(|row| row.family != family)
                .cloned()
                .collect(),
            objective_offset: self.objective_offset,
        }
    }
}

/// The value of a solver option
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// A boolean option
    Bool(bool),
    /// An integer option
    Int(i32),
    /// A floating-point option
    Float(f64),
    /// A string option
    Text(String),
}

/// Solver-specific options, passed through to the solver unmodified
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SolverAttributes(IndexMap<String, AttributeValue>);

impl SolverAttributes {
    /// Create from a map of options
    pub fn new(attributes: IndexMap<String, AttributeValue>) -> Self {
        Self(attributes)
    }

    /// Iterate over the options in the order given
    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttributeValue)> {
        self.0.iter()
    }

    /// The number of options
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no options are set
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The values obtained from a successful solve
#[derive(Debug, Clone, PartialEq)]
pub struct RawSolution {
    /// Value of each column
    pub columns: Vec<f64>,
    /// Dual value of each row
    pub row_duals: Vec<f64>,
    /// Objective value, including the constant offset
    pub objective: f64,
}

impl RawSolution {
    /// The value of a variable
    pub fn value(&self, var: Var) -> f64 {
        self.columns[var.0]
    }
}

/// Why a solve did not produce an optimal solution
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum SolveFailure {
    /// No point satisfies all the constraints
    #[display("infeasible")]
    Infeasible,
    /// The objective can decrease without bound
    #[display("unbounded")]
    Unbounded,
    /// The solver could not tell infeasible from unbounded
    #[display("infeasible or unbounded")]
    InfeasibleOrUnbounded,
    /// Any other non-optimal outcome (time limit, solver error, etc.)
    #[display("{_0}")]
    Other(String),
}

impl SolveFailure {
    /// Whether removing constraints might make the problem solvable
    pub fn may_be_infeasible(&self) -> bool {
        matches!(self, Self::Infeasible | Self::InfeasibleOrUnbounded)
    }
}

/// An LP solver
pub trait Solver {
    /// Minimise the problem's objective
    fn solve(
        &self,
        problem: &Problem,
        attributes: &SolverAttributes,
    ) -> Result<RawSolution, SolveFailure>;
}

/// A [`Solver`] backed by HiGHS
#[derive(Debug, Clone, Copy, Default)]
pub struct HighsSolver;

impl Solver for HighsSolver {
    fn solve(
        &self,
        problem: &Problem,
        attributes: &SolverAttributes,
    ) -> Result<RawSolution, SolveFailure> {
        let mut highs_problem = RowProblem::default();
        let cols = problem
            .columns
            .iter()
            .map(|column| highs_problem.add_column(column.cost, column.lower..=column.upper))
            .collect::<Vec<_>>();
        for row in &problem.rows {
            highs_problem.add_row(
                row.lower..=row.upper,
                row.terms.iter().map(|&(var, coeff)| (cols[var.0], coeff)),
            );
        }

        let mut model = highs_problem.optimise(Sense::Minimise);
        enable_highs_logging(&mut model);
        for (name, value) in attributes.iter() {
            match value {
                AttributeValue::Bool(value) => model.set_option(name.as_str(), *value),
                AttributeValue::Int(value) => model.set_option(name.as_str(), *value),
                AttributeValue::Float(value) => model.set_option(name.as_str(), *value),
                AttributeValue::Text(value) => model.set_option(name.as_str(), value.as_str()),
            }
        }

        let solved = model
            .try_solve()
            .map_err(|status| SolveFailure::Other(format!("{status:?}")))?;
        match solved.status() {
            HighsModelStatus::Optimal => {
                let solution = solved.get_solution();
                let columns = solution.columns().to_vec();
                let objective = problem
                    .columns
                    .iter()
                    .zip(&columns)
                    .map(|(column, value)| column.cost * value)
                    .sum::<f64>()
                    + problem.objective_offset;
                Ok(RawSolution {
                    columns,
                    row_duals: solution.dual_rows().to_vec(),
                    objective,
                })
            }
            HighsModelStatus::Infeasible => Err(SolveFailure::Infeasible),
            HighsModelStatus::Unbounded => Err(SolveFailure::Unbounded),
            HighsModelStatus::UnboundedOrInfeasible => Err(SolveFailure::InfeasibleOrUnbounded),
            status => Err(SolveFailure::Other(format!("{status:?}"))),
        }
    }
}

/// Enable logging for the HiGHS solver
fn enable_highs_logging(model: &mut highs::Model) {
    // Skip this step if logging is disabled (e.g. when running tests)
    let quiet = std::env::var("GRIDMARKET_LOG_LEVEL")
        .is_ok_and(|log_level| log_level.eq_ignore_ascii_case("off"));
    model.set_option("log_to_console", !quiet);
    model.set_option("output_flag", !quiet);
}

/// Find the constraint family responsible for an infeasible problem.
///
/// Each family is removed in turn and the problem re-solved; the first family whose removal
/// makes the problem solvable is returned.
pub fn diagnose_infeasibility(
    solver: &dyn Solver,
    problem: &Problem,
    attributes: &SolverAttributes,
) -> Option<&'static str> {
    problem.families().into_iter().find(|family| {
        debug!("Re-solving without constraint family {family}");
        solver
            .solve(&problem.without_family(family), attributes)
            .is_ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    /// min x + y s.t. x + y >= 2, x <= 5, y in [0, 1]
    fn small_problem() -> (Problem, Var, Var) {
        let mut problem = Problem::default();
        let x = problem.add_column(1.0, 0.0..=5.0);
        let y = problem.add_column(2.0, 0.0..=1.0);
        problem.add_row("demand", 2.0.., [(x, 1.0), (y, 1.0)]);
        (problem, x, y)
    }

    #[test]
    fn test_problem_bounds() {
        let mut problem = Problem::default();
        let free = problem.add_column(0.0, ..);
        let fixed = problem.add_fixed_column(1.0, 3.0);
        assert_eq!(problem.columns()[free.index()].lower, f64::NEG_INFINITY);
        assert_eq!(problem.columns()[free.index()].upper, f64::INFINITY);
        assert_eq!(problem.columns()[fixed.index()].lower, 3.0);
        assert_eq!(problem.columns()[fixed.index()].upper, 3.0);
    }

    #[test]
    fn test_without_family() {
        let (mut problem, x, _) = small_problem();
        problem.add_row("cap", ..=1.0, [(x, 1.0)]);
        assert_eq!(problem.families().into_iter().collect::<Vec<_>>(), ["demand", "cap"]);

        let relaxed = problem.without_family("cap");
        assert_eq!(relaxed.num_rows(), 1);
        assert_eq!(relaxed.num_cols(), 2);
    }

    #[test]
    fn test_highs_solve() {
        let (mut problem, x, y) = small_problem();
        problem.add_objective_offset(10.0);
        let solution = HighsSolver
            .solve(&problem, &SolverAttributes::default())
            .unwrap();
        assert_approx_eq!(f64, solution.value(x), 2.0, epsilon = 1e-9);
        assert_approx_eq!(f64, solution.value(y), 0.0, epsilon = 1e-9);
        assert_approx_eq!(f64, solution.objective, 12.0, epsilon = 1e-9);
        // The demand row is binding, so its dual is the cost of x
        assert_approx_eq!(f64, solution.row_duals[0], 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_highs_infeasible_and_diagnosis() {
        let (mut problem, x, y) = small_problem();
        problem.add_row("cap", ..=0.5, [(x, 1.0), (y, 1.0)]);
        let attributes = SolverAttributes::default();
        let failure = HighsSolver.solve(&problem, &attributes).unwrap_err();
        assert!(failure.may_be_infeasible());
        assert_eq!(
            diagnose_infeasibility(&HighsSolver, &problem, &attributes),
            Some("demand")
        );
    }
}
