//! Code for reading the network (nodes, lines, DC lines and NTCs) from CSV files.
use super::*;
use crate::id::{DcLineID, LineID, NodeID, ZoneID, into_id_map};
use crate::model::{DcLine, Line, Node, Ntc};
use crate::units::Power;
use indexmap::IndexMap;
use serde::Deserialize;

const NODES_FILE_NAME: &str = "nodes.csv";
const LINES_FILE_NAME: &str = "lines.csv";
const DC_LINES_FILE_NAME: &str = "dclines.csv";
const NTC_FILE_NAME: &str = "ntc.csv";

#[derive(PartialEq, Debug, Deserialize)]
struct NodeRaw {
    id: String,
    zone: Option<String>,
    #[serde(default)]
    slack: bool,
    #[serde(default)]
    demand: f64,
}

#[derive(PartialEq, Debug, Deserialize)]
struct LineRaw {
    id: String,
    node_from: String,
    node_to: String,
    reactance: f64,
    resistance: Option<f64>,
    capacity: f64,
}

#[derive(PartialEq, Debug, Deserialize)]
struct DcLineRaw {
    id: String,
    node_from: String,
    node_to: String,
    capacity: f64,
}

#[derive(PartialEq, Debug, Deserialize)]
struct NtcRaw {
    zone_from: String,
    zone_to: String,
    capacity: f64,
}

/// Read nodes from the nodes CSV file.
///
/// # Arguments
///
/// * `model_dir` - Folder containing model configuration files
pub fn read_nodes(model_dir: &Path) -> Result<IndexMap<NodeID, Node>> {
    let file_path = model_dir.join(NODES_FILE_NAME);
    let nodes_csv = read_csv(&file_path)?;
    read_nodes_from_iter(nodes_csv).with_context(|| input_err_msg(&file_path))
}

fn read_nodes_from_iter<I>(iter: I) -> Result<IndexMap<NodeID, Node>>
where
    I: Iterator<Item = NodeRaw>,
{
    let nodes: Vec<_> = iter
        .map(|node| {
            ensure!(
                node.demand.is_finite() && node.demand >= 0.0,
                "Demand of node {} must be a non-negative number",
                node.id
            );

            Ok(Node {
                id: node.id.into(),
                zone: ZoneID::new(node.zone.as_deref().unwrap_or_default()),
                slack: node.slack,
                demand: node.demand.into(),
            })
        })
        .try_collect()?;

    into_id_map(nodes)
}

/// Read AC lines from the lines CSV file. A model without lines has no lines file.
pub fn read_lines(model_dir: &Path) -> Result<IndexMap<LineID, Line>> {
    let file_path = model_dir.join(LINES_FILE_NAME);
    let lines_csv = read_csv_optional(&file_path)?;
    read_lines_from_iter(lines_csv).with_context(|| input_err_msg(&file_path))
}

fn read_lines_from_iter<I>(iter: I) -> Result<IndexMap<LineID, Line>>
where
    I: Iterator<Item = LineRaw>,
{
    let lines: Vec<_> = iter
        .map(|line| {
            ensure!(
                line.capacity >= 0.0,
                "Capacity of line {} cannot be negative",
                line.id
            );

            Ok(Line {
                id: line.id.into(),
                node_from: line.node_from.into(),
                node_to: line.node_to.into(),
                reactance: line.reactance,
                resistance: line.resistance.unwrap_or_default(),
                capacity: Power(line.capacity),
            })
        })
        .try_collect()?;

    into_id_map(lines)
}

/// Read DC lines from the optional DC lines CSV file.
pub fn read_dc_lines(model_dir: &Path) -> Result<IndexMap<DcLineID, DcLine>> {
    let file_path = model_dir.join(DC_LINES_FILE_NAME);
    let dc_lines = read_csv_optional::<DcLineRaw>(&file_path)?.map(|line| DcLine {
        id: line.id.into(),
        node_from: line.node_from.into(),
        node_to: line.node_to.into(),
        capacity: Power(line.capacity),
    });

    into_id_map(dc_lines).with_context(|| input_err_msg(&file_path))
}

/// Read net transfer capacities from the optional NTC CSV file.
pub fn read_ntc(model_dir: &Path) -> Result<Vec<Ntc>> {
    let file_path = model_dir.join(NTC_FILE_NAME);
    let ntc = read_csv_optional::<NtcRaw>(&file_path)?
        .map(|raw| Ntc {
            zone_from: raw.zone_from.into(),
            zone_to: raw.zone_to.into(),
            capacity: Power(raw.capacity),
        })
        .collect();

    Ok(ntc)
}
