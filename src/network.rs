//! Network matrices for DC power flow.
//!
//! All matrices are indexed by the insertion order of nodes and lines in the model, which is the
//! order they appear in the input files.
use crate::error::DispatchError;
use crate::id::{DcLineID, LineID, NodeID};
use crate::model::{DcLine, Line, Node};
use indexmap::IndexMap;
use itertools::Itertools;
use log::warn;
use nalgebra::{DMatrix, DVector};
use petgraph::unionfind::UnionFind;

/// Derived susceptance, incidence and PTDF matrices for a network
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkMatrices {
    /// Line susceptances `x / (r² + x²)`, one per AC line
    pub bvector: DVector<f64>,
    /// AC line-node incidence (lines × nodes); +1 at the origin node, -1 at the destination node
    pub incidence: DMatrix<f64>,
    /// DC line-node incidence (DC lines × nodes); +1 at the origin node, -1 at the destination
    pub dc_incidence: DMatrix<f64>,
    /// Line susceptance matrix `diag(b) A` (lines × nodes)
    pub h: DMatrix<f64>,
    /// Bus susceptance matrix `Aᵀ H` (nodes × nodes)
    pub b: DMatrix<f64>,
    /// Power transfer distribution factors (lines × nodes)
    pub ptdf: DMatrix<f64>,
    /// Indexes of the slack nodes, one per synchronous area
    pub slack: Vec<usize>,
}

impl NetworkMatrices {
    /// Compute all matrices for the given network
    pub fn compute(
        nodes: &IndexMap<NodeID, Node>,
        lines: &IndexMap<LineID, Line>,
        dc_lines: &IndexMap<DcLineID, DcLine>,
    ) -> Result<Self, DispatchError> {
        let n_nodes = nodes.len();
        let endpoints = line_endpoints(nodes, lines)?;

        let mut incidence = DMatrix::zeros(lines.len(), n_nodes);
        let mut bvector = DVector::zeros(lines.len());
        for (i, (line, &(from, to))) in lines.values().zip(&endpoints).enumerate() {
            incidence[(i, from)] = 1.0;
            incidence[(i, to)] = -1.0;
            bvector[i] = line_susceptance(line)?;
        }

        let mut dc_incidence = DMatrix::zeros(dc_lines.len(), n_nodes);
        for (j, dc_line) in dc_lines.values().enumerate() {
            let (from, to) =
                endpoint_indexes(nodes, &dc_line.id, &dc_line.node_from, &dc_line.node_to)?;
            dc_incidence[(j, from)] = 1.0;
            dc_incidence[(j, to)] = -1.0;
        }

        let h = DMatrix::from_diagonal(&bvector) * &incidence;
        let b = incidence.transpose() * &h;
        let slack = select_slack_nodes(nodes, &endpoints)?;
        let ptdf = &h * reduced_inverse(&b, &slack)?;

        Ok(Self {
            bvector,
            incidence,
            dc_incidence,
            h,
            b,
            ptdf,
            slack,
        })
    }

    /// Flows on AC lines resulting from the given nodal injections
    pub fn line_flows(&self, injections: &DVector<f64>) -> DVector<f64> {
        &self.ptdf * injections
    }
}

/// Line susceptance `x / (r² + x²)`
fn line_susceptance(line: &Line) -> Result<f64, DispatchError> {
    let (r, x) = (line.resistance, line.reactance);
    let denominator = r * r + x * x;
    if !(denominator > 0.0 && denominator.is_finite()) {
        return Err(DispatchError::Network(format!(
            "line {} has zero or invalid impedance",
            line.id
        )));
    }

    Ok(x / denominator)
}

fn line_endpoints(
    nodes: &IndexMap<NodeID, Node>,
    lines: &IndexMap<LineID, Line>,
) -> Result<Vec<(usize, usize)>, DispatchError> {
    lines
        .values()
        .map(|line| endpoint_indexes(nodes, &line.id, &line.node_from, &line.node_to))
        .collect()
}

fn endpoint_indexes(
    nodes: &IndexMap<NodeID, Node>,
    entity: impl std::fmt::Display,
    node_from: &NodeID,
    node_to: &NodeID,
) -> Result<(usize, usize), DispatchError> {
    let index = |node: &NodeID| {
        nodes.get_index_of(node).ok_or_else(|| {
            DispatchError::data_contract(&entity, format!("references unknown node {node}"))
        })
    };
    let (from, to) = (index(node_from)?, index(node_to)?);
    if from == to {
        return Err(DispatchError::data_contract(
            &entity,
            "line connects a node to itself",
        ));
    }

    Ok((from, to))
}

/// Choose one slack bus per synchronous (AC-connected) area.
///
/// Every area needs at least one node flagged as slack. If an area has more than one, the first in
/// input order is used and a warning is emitted.
///
/// # Returns
///
/// The index of the slack node for each area, in order of each area's first node.
pub fn select_slack_nodes(
    nodes: &IndexMap<NodeID, Node>,
    endpoints: &[(usize, usize)],
) -> Result<Vec<usize>, DispatchError> {
    let mut areas = UnionFind::<usize>::new(nodes.len());
    for &(from, to) in endpoints {
        areas.union(from, to);
    }

    // Group nodes by area, keeping input order
    let mut members: IndexMap<usize, Vec<usize>> = IndexMap::new();
    for i in 0..nodes.len() {
        members.entry(areas.find(i)).or_default().push(i);
    }

    let mut slack = Vec::with_capacity(members.len());
    for area in members.values() {
        let flagged = area
            .iter()
            .copied()
            .filter(|&i| nodes[i].slack)
            .collect_vec();
        let Some((&first, rest)) = flagged.split_first() else {
            return Err(DispatchError::configuration(format!(
                "no slack bus defined for the network containing node {}",
                nodes[area[0]].id
            )));
        };
        if !rest.is_empty() {
            warn!(
                "Multiple slack buses defined for the network containing node {}: using {} and \
                ignoring {}",
                nodes[first].id,
                nodes[first].id,
                rest.iter().map(|&i| &nodes[i].id).join(", ")
            );
        }
        slack.push(first);
    }

    Ok(slack)
}

/// Invert `b` with the slack rows and columns removed, then re-insert zeros for them
fn reduced_inverse(b: &DMatrix<f64>, slack: &[usize]) -> Result<DMatrix<f64>, DispatchError> {
    let n = b.nrows();
    let keep = (0..n).filter(|i| !slack.contains(i)).collect_vec();
    let mut full = DMatrix::zeros(n, n);
    if keep.is_empty() {
        return Ok(full);
    }

    let reduced = b.select_rows(keep.iter()).select_columns(keep.iter());
    let inverse = reduced
        .try_inverse()
        .filter(|inv| inv.iter().all(|v| v.is_finite()))
        .ok_or_else(|| {
            DispatchError::Network("reduced bus susceptance matrix is singular".into())
        })?;
    for (ri, &i) in keep.iter().enumerate() {
        for (rj, &j) in keep.iter().enumerate() {
            full[(i, j)] = inverse[(ri, rj)];
        }
    }

    Ok(full)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{line, node};
    use crate::units::Power;
    use float_cmp::assert_approx_eq;
    use rstest::{fixture, rstest};

    fn node_map(nodes: impl IntoIterator<Item = Node>) -> IndexMap<NodeID, Node> {
        nodes.into_iter().map(|n| (n.id.clone(), n)).collect()
    }

    fn line_map(lines: impl IntoIterator<Item = Line>) -> IndexMap<LineID, Line> {
        lines.into_iter().map(|l| (l.id.clone(), l)).collect()
    }

    #[fixture]
    fn triangle() -> (IndexMap<NodeID, Node>, IndexMap<LineID, Line>) {
        let nodes = node_map([
            node("n1", "z", true),
            node("n2", "z", false),
            node("n3", "z", false),
        ]);
        let lines = line_map([
            line("l1", "n1", "n2"),
            line("l2", "n2", "n3"),
            line("l3", "n1", "n3"),
        ]);
        (nodes, lines)
    }

    #[rstest]
    fn test_triangle_flows(triangle: (IndexMap<NodeID, Node>, IndexMap<LineID, Line>)) {
        let (nodes, lines) = triangle;
        let network = NetworkMatrices::compute(&nodes, &lines, &IndexMap::new()).unwrap();
        assert_eq!(network.slack, [0]);

        let flows = network.line_flows(&DVector::from_vec(vec![0.0, 1.0, -1.0]));
        assert_approx_eq!(f64, flows[0], -1.0 / 3.0, epsilon = 1e-9);
        assert_approx_eq!(f64, flows[1], 2.0 / 3.0, epsilon = 1e-9);
        assert_approx_eq!(f64, flows[2], 1.0 / 3.0, epsilon = 1e-9);
    }

    #[rstest]
    fn test_bus_susceptance_rows_sum_to_zero(
        triangle: (IndexMap<NodeID, Node>, IndexMap<LineID, Line>),
    ) {
        let (nodes, lines) = triangle;
        let network = NetworkMatrices::compute(&nodes, &lines, &IndexMap::new()).unwrap();
        for row in network.b.row_iter() {
            assert_approx_eq!(f64, row.sum(), 0.0, epsilon = 1e-9);
        }
        assert_eq!(network.b, network.b.transpose());
        // Injections at the slack node do not affect flows
        assert!(network.ptdf.column(0).iter().all(|&v| v == 0.0));
    }

    #[rstest]
    fn test_compute_is_deterministic(triangle: (IndexMap<NodeID, Node>, IndexMap<LineID, Line>)) {
        let (nodes, lines) = triangle;
        let first = NetworkMatrices::compute(&nodes, &lines, &IndexMap::new()).unwrap();
        let second = NetworkMatrices::compute(&nodes, &lines, &IndexMap::new()).unwrap();
        assert_eq!(first, second);
    }

    #[rstest]
    fn test_no_slack(triangle: (IndexMap<NodeID, Node>, IndexMap<LineID, Line>)) {
        let (mut nodes, lines) = triangle;
        nodes.get_mut("n1").unwrap().slack = false;
        let err = NetworkMatrices::compute(&nodes, &lines, &IndexMap::new()).unwrap_err();
        assert!(matches!(err, DispatchError::Configuration(msg) if msg.contains("no slack bus")));
    }

    #[rstest]
    fn test_multiple_slack(triangle: (IndexMap<NodeID, Node>, IndexMap<LineID, Line>)) {
        let (mut nodes, lines) = triangle;
        nodes.get_mut("n3").unwrap().slack = true;
        let network = NetworkMatrices::compute(&nodes, &lines, &IndexMap::new()).unwrap();
        assert_eq!(network.slack, [0]);
        assert!(network.ptdf.column(2).iter().any(|&v| v != 0.0));
    }

    #[test]
    fn test_island_with_own_slack() {
        let nodes = node_map([
            node("a1", "z", true),
            node("a2", "z", false),
            node("b1", "z", false),
            node("b2", "z", true),
        ]);
        let lines = line_map([line("la", "a1", "a2"), line("lb", "b1", "b2")]);
        let network = NetworkMatrices::compute(&nodes, &lines, &IndexMap::new()).unwrap();
        assert_eq!(network.slack, [0, 3]);

        // Injecting at a2 (withdrawn at a1) flows back along la only
        let flows = network.line_flows(&DVector::from_vec(vec![0.0, 1.0, 0.0, 0.0]));
        assert_approx_eq!(f64, flows[0], -1.0, epsilon = 1e-9);
        assert_approx_eq!(f64, flows[1], 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_island_without_slack() {
        let nodes = node_map([
            node("a1", "z", true),
            node("a2", "z", false),
            node("b1", "z", false),
        ]);
        let lines = line_map([line("la", "a1", "a2")]);
        assert!(matches!(
            NetworkMatrices::compute(&nodes, &lines, &IndexMap::new()),
            Err(DispatchError::Configuration(_))
        ));
    }

    #[rstest]
    fn test_zero_impedance(triangle: (IndexMap<NodeID, Node>, IndexMap<LineID, Line>)) {
        let (nodes, mut lines) = triangle;
        lines.get_mut("l2").unwrap().reactance = 0.0;
        assert!(matches!(
            NetworkMatrices::compute(&nodes, &lines, &IndexMap::new()),
            Err(DispatchError::Network(_))
        ));
    }

    #[test]
    fn test_single_node() {
        let nodes = node_map([node("n1", "z", true)]);
        let network = NetworkMatrices::compute(&nodes, &IndexMap::new(), &IndexMap::new()).unwrap();
        assert_eq!(network.ptdf.shape(), (0, 1));
        assert_eq!(network.b.shape(), (1, 1));
    }

    #[rstest]
    fn test_dc_incidence(triangle: (IndexMap<NodeID, Node>, IndexMap<LineID, Line>)) {
        let (nodes, lines) = triangle;
        let dc = DcLine {
            id: "dc1".into(),
            node_from: "n2".into(),
            node_to: "n3".into(),
            capacity: Power(50.0),
        };
        let dc_lines = [(dc.id.clone(), dc)].into_iter().collect();
        let network = NetworkMatrices::compute(&nodes, &lines, &dc_lines).unwrap();
        assert!(network.dc_incidence.row(0).iter().eq(&[0.0, 1.0, -1.0]));
    }
}
