use std::collections::HashMap;

use indexmap::IndexMap;

use operate_protocol::{FlowNodeCount, Incident, SequenceFlow};

use super::diagram::{FlowNodeMetadata, name_or_id};

/// Keys `items` by `key`, keeping first-seen order. Later items win on
/// duplicate keys.
pub fn mapify<T, K, F>(items: impl IntoIterator<Item = T>, key: F) -> IndexMap<K, T>
where
    K: std::hash::Hash + Eq,
    F: Fn(&T) -> K,
{
    let mut map = IndexMap::new();
    for item in items {
        map.insert(key(&item), item);
    }
    map
}

/// An incident with the display name of its flow node.
#[derive(Debug, Clone, PartialEq)]
pub struct IncidentView {
    pub incident: Incident,
    pub flow_node_name: String,
}

/// Incident count of one flow node with its display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowNodeView {
    pub flow_node_id: String,
    pub count: u32,
    pub flow_node_name: String,
}

pub fn add_flow_node_name(
    incident: &Incident,
    metadata: &HashMap<String, FlowNodeMetadata>,
) -> IncidentView {
    IncidentView {
        incident: incident.clone(),
        flow_node_name: name_or_id(metadata.get(&incident.flow_node_id), &incident.flow_node_id),
    }
}

pub fn flow_node_view(
    flow_node: &FlowNodeCount,
    metadata: &HashMap<String, FlowNodeMetadata>,
) -> FlowNodeView {
    FlowNodeView {
        flow_node_id: flow_node.flow_node_id.clone(),
        count: flow_node.count,
        flow_node_name: name_or_id(metadata.get(&flow_node.flow_node_id), &flow_node.flow_node_id),
    }
}

/// Unique activity ids of the taken sequence flows, in first-seen order.
pub fn processed_sequence_flows(flows: &[SequenceFlow]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    flows
        .iter()
        .filter(|flow| seen.insert(flow.activity_id.as_str()))
        .map(|flow| flow.activity_id.clone())
        .collect()
}
