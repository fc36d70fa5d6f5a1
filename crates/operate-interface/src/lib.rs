//! Service contracts between the console stores and whatever talks to the
//! Operate web API.
//!
//! The stores only see these traits, so they can be driven by the HTTP
//! client in production and by the mocks under the `test-utils` feature in
//! tests.

use thiserror::Error;

use operate_protocol::{
    GroupedWorkflow, IncidentsResponse, InstancesPage, InstancesRequest, SequenceFlow,
    WorkflowInstance,
};

#[cfg(feature = "test-utils")]
mod mock;

#[cfg(feature = "test-utils")]
pub use mock::{MockInstanceClient, MockInstancesListClient};

/// Errors surfaced by service implementations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InterfaceError {
    #[error("{0}")]
    Message(String),
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("operation not implemented")]
    Unimplemented,
}

impl From<String> for InterfaceError {
    fn from(value: String) -> Self {
        InterfaceError::Message(value)
    }
}

impl From<&str> for InterfaceError {
    fn from(value: &str) -> Self {
        InterfaceError::Message(value.to_string())
    }
}

/// Query-string pagination of list requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub first_result: u32,
    pub max_results: u32,
}

impl PageRequest {
    pub fn new(first_result: u32, max_results: u32) -> Self {
        Self {
            first_result,
            max_results,
        }
    }
}

/// Per-instance detail reads.
pub trait InstanceClient: Send + Sync {
    fn fetch_instance(&self, id: &str) -> Result<WorkflowInstance, InterfaceError>;

    fn fetch_incidents(&self, id: &str) -> Result<IncidentsResponse, InterfaceError>;

    fn fetch_sequence_flows(&self, id: &str) -> Result<Vec<SequenceFlow>, InterfaceError>;

    /// BPMN XML of the workflow definition an instance runs.
    fn fetch_workflow_xml(&self, workflow_id: &str) -> Result<String, InterfaceError>;
}

/// Instance list queries and the workflow catalogue used to build them.
pub trait InstancesListClient: Send + Sync {
    fn list_instances(
        &self,
        request: &InstancesRequest,
        page: PageRequest,
    ) -> Result<InstancesPage, InterfaceError>;

    fn grouped_workflows(&self) -> Result<Vec<GroupedWorkflow>, InterfaceError>;
}
