use std::sync::Mutex;

use operate_protocol::{
    GroupedWorkflow, IncidentsResponse, InstancesPage, InstancesRequest, SequenceFlow,
    WorkflowInstance,
};

use crate::{InstanceClient, InstancesListClient, InterfaceError, PageRequest};

fn unset<T>(what: &str) -> Result<T, InterfaceError> {
    Err(InterfaceError::Message(format!("mock {what} result not set")))
}

/// In-memory [`InstanceClient`] returning canned results and counting calls.
#[derive(Debug, Default)]
pub struct MockInstanceClient {
    instance: Mutex<Option<Result<WorkflowInstance, InterfaceError>>>,
    incidents: Mutex<Option<Result<IncidentsResponse, InterfaceError>>>,
    sequence_flows: Mutex<Option<Result<Vec<SequenceFlow>, InterfaceError>>>,
    workflow_xml: Mutex<Option<Result<String, InterfaceError>>>,
    calls: Mutex<Vec<(&'static str, String)>>,
}

impl MockInstanceClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_instance_result(&self, result: Result<WorkflowInstance, InterfaceError>) {
        *self.instance.lock().unwrap() = Some(result);
    }

    pub fn set_incidents_result(&self, result: Result<IncidentsResponse, InterfaceError>) {
        *self.incidents.lock().unwrap() = Some(result);
    }

    pub fn set_sequence_flows_result(&self, result: Result<Vec<SequenceFlow>, InterfaceError>) {
        *self.sequence_flows.lock().unwrap() = Some(result);
    }

    pub fn set_workflow_xml_result(&self, result: Result<String, InterfaceError>) {
        *self.workflow_xml.lock().unwrap() = Some(result);
    }

    /// Number of calls made to `operation` (`"instance"`, `"incidents"`,
    /// `"sequence_flows"` or `"workflow_xml"`).
    pub fn call_count(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| *name == operation)
            .count()
    }

    pub fn calls(&self) -> Vec<(&'static str, String)> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, operation: &'static str, id: &str) {
        self.calls.lock().unwrap().push((operation, id.to_string()));
    }
}

impl InstanceClient for MockInstanceClient {
    fn fetch_instance(&self, id: &str) -> Result<WorkflowInstance, InterfaceError> {
        self.record("instance", id);
        self.instance
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| unset("instance"))
    }

    fn fetch_incidents(&self, id: &str) -> Result<IncidentsResponse, InterfaceError> {
        self.record("incidents", id);
        self.incidents
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| unset("incidents"))
    }

    fn fetch_sequence_flows(&self, id: &str) -> Result<Vec<SequenceFlow>, InterfaceError> {
        self.record("sequence_flows", id);
        self.sequence_flows
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| unset("sequence flows"))
    }

    fn fetch_workflow_xml(&self, workflow_id: &str) -> Result<String, InterfaceError> {
        self.record("workflow_xml", workflow_id);
        self.workflow_xml
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| unset("workflow xml"))
    }
}

/// In-memory [`InstancesListClient`] recording every list request.
#[derive(Debug, Default)]
pub struct MockInstancesListClient {
    page: Mutex<Option<Result<InstancesPage, InterfaceError>>>,
    grouped: Mutex<Option<Result<Vec<GroupedWorkflow>, InterfaceError>>>,
    requests: Mutex<Vec<(InstancesRequest, PageRequest)>>,
}

impl MockInstancesListClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_list_result(&self, result: Result<InstancesPage, InterfaceError>) {
        *self.page.lock().unwrap() = Some(result);
    }

    pub fn set_grouped_result(&self, result: Result<Vec<GroupedWorkflow>, InterfaceError>) {
        *self.grouped.lock().unwrap() = Some(result);
    }

    pub fn requests(&self) -> Vec<(InstancesRequest, PageRequest)> {
        self.requests.lock().unwrap().clone()
    }
}

impl InstancesListClient for MockInstancesListClient {
    fn list_instances(
        &self,
        request: &InstancesRequest,
        page: PageRequest,
    ) -> Result<InstancesPage, InterfaceError> {
        self.requests.lock().unwrap().push((request.clone(), page));
        self.page
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| unset("list"))
    }

    fn grouped_workflows(&self) -> Result<Vec<GroupedWorkflow>, InterfaceError> {
        self.grouped
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| unset("grouped workflows"))
    }
}
