//! Protocol data contracts for the Operate web API.
//!
//! These types mirror the JSON schema served under `/api` and are shared
//! between the HTTP client and the console stores. Field names follow the
//! API's camelCase convention on the wire.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a workflow instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceState {
    Active,
    Incident,
    Completed,
    Canceled,
}

impl InstanceState {
    pub fn is_running(self) -> bool {
        matches!(self, Self::Active | Self::Incident)
    }
}

/// A single workflow instance as returned by the detail and list endpoints.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowInstance {
    pub id: String,
    pub workflow_id: String,
    #[serde(default)]
    pub workflow_name: Option<String>,
    #[serde(default)]
    pub workflow_version: Option<i32>,
    pub state: InstanceState,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub has_active_operation: bool,
}

/// Payload of `GET /api/workflow-instances/{id}/incidents`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentsResponse {
    pub count: u32,
    #[serde(default)]
    pub incidents: Vec<Incident>,
    #[serde(default)]
    pub error_types: Vec<ErrorTypeCount>,
    #[serde(default)]
    pub flow_nodes: Vec<FlowNodeCount>,
}

/// An incident raised on a flow node of an instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    pub id: String,
    pub error_type: String,
    pub error_message: String,
    pub flow_node_id: String,
    pub flow_node_instance_id: String,
    #[serde(default)]
    pub job_id: Option<String>,
    pub creation_time: String,
    #[serde(default)]
    pub has_active_operation: bool,
}

/// Number of incidents sharing one error type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorTypeCount {
    pub error_type: String,
    pub count: u32,
}

/// Number of incidents raised on one flow node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowNodeCount {
    pub flow_node_id: String,
    pub count: u32,
}

/// A taken sequence flow of an instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceFlow {
    pub id: String,
    pub workflow_instance_id: String,
    pub activity_id: String,
}

/// Body of `POST /api/workflow-instances`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstancesRequest {
    pub queries: Vec<InstancesQuery>,
    pub sorting: Sorting,
}

/// One query of a list request. Empty predicates are left off the wire.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstancesQuery {
    #[serde(skip_serializing_if = "is_false")]
    pub running: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub active: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub incidents: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub finished: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub completed: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub canceled: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date_after: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date_before: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date_after: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date_before: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub workflow_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variable: Option<VariableQuery>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_operation_id: Option<String>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Variable predicate of a list query.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableQuery {
    pub name: String,
    pub value: String,
}

/// Sort column and direction of a list request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sorting {
    pub sort_by: String,
    pub sort_order: SortOrder,
}

impl Default for Sorting {
    fn default() -> Self {
        Self {
            sort_by: "id".to_string(),
            sort_order: SortOrder::Desc,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

/// One page of list results.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstancesPage {
    #[serde(default)]
    pub workflow_instances: Vec<WorkflowInstance>,
    pub total_count: u64,
}

/// All deployed versions of one process, as served by `/api/workflows/grouped`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupedWorkflow {
    pub bpmn_process_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub workflows: Vec<WorkflowVersion>,
}

/// A single deployed version of a process.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowVersion {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub version: i32,
    pub bpmn_process_id: String,
}

/// Error envelope returned by the web API on non-success responses.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}
