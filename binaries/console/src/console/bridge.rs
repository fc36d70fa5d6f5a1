use std::sync::Arc;

use operate_interface::{InstanceClient, InstancesListClient, InterfaceError};
use operate_protocol::{
    GroupedWorkflow, IncidentsResponse, InstancesPage, SequenceFlow, WorkflowInstance,
};

#[cfg(feature = "protocol")]
use operate_protocol_client::{ProtocolClientError, ProtocolClients};
#[cfg(feature = "protocol")]
use tracing::info;

use super::{
    instances_list::ListRequest,
    polling::{Fetcher, fetcher},
};

/// Service implementations the console is wired against.
pub struct ServiceBundle {
    pub instance_client: Arc<dyn InstanceClient>,
    pub list_client: Arc<dyn InstancesListClient>,
    #[cfg(feature = "protocol")]
    pub protocol_clients: Option<Arc<ProtocolClients>>,
}

impl ServiceBundle {
    pub fn new(
        instance_client: Arc<dyn InstanceClient>,
        list_client: Arc<dyn InstancesListClient>,
    ) -> Self {
        Self {
            instance_client,
            list_client,
            #[cfg(feature = "protocol")]
            protocol_clients: None,
        }
    }
}

/// Bundle backed by the HTTP client for the Operate instance at `base_url`.
#[cfg(feature = "protocol")]
pub fn default_service_bundle(base_url: &str) -> Result<ServiceBundle, ProtocolClientError> {
    let clients = Arc::new(ProtocolClients::new(base_url)?);
    info!(base_url = %clients.base_url(), "using Operate web API");

    Ok(ServiceBundle {
        instance_client: clients.instance_client(),
        list_client: clients.instances_list_client(),
        protocol_clients: Some(clients),
    })
}

/// Async fetchers for every store, each running its blocking client call
/// on the blocking pool.
#[derive(Clone)]
pub struct StoreFetchers {
    pub instance: Fetcher<String, WorkflowInstance>,
    pub incidents: Fetcher<String, IncidentsResponse>,
    pub sequence_flows: Fetcher<String, Vec<SequenceFlow>>,
    pub workflow_xml: Fetcher<String, String>,
    pub instances: Fetcher<ListRequest, InstancesPage>,
    pub grouped_workflows: Fetcher<(), Vec<GroupedWorkflow>>,
}

impl StoreFetchers {
    pub fn from_bundle(bundle: &ServiceBundle) -> Self {
        let client = Arc::clone(&bundle.instance_client);
        let instance = blocking(move |id: String| client.fetch_instance(&id));

        let client = Arc::clone(&bundle.instance_client);
        let incidents = blocking(move |id: String| client.fetch_incidents(&id));

        let client = Arc::clone(&bundle.instance_client);
        let sequence_flows = blocking(move |id: String| client.fetch_sequence_flows(&id));

        let client = Arc::clone(&bundle.instance_client);
        let workflow_xml =
            blocking(move |workflow_id: String| client.fetch_workflow_xml(&workflow_id));

        let client = Arc::clone(&bundle.list_client);
        let instances = blocking(move |list: ListRequest| {
            client.list_instances(&list.request, list.page)
        });

        let client = Arc::clone(&bundle.list_client);
        let grouped_workflows = blocking(move |()| client.grouped_workflows());

        Self {
            instance,
            incidents,
            sequence_flows,
            workflow_xml,
            instances,
            grouped_workflows,
        }
    }
}

fn blocking<Q, R, F>(call: F) -> Fetcher<Q, R>
where
    Q: Send + 'static,
    R: Send + 'static,
    F: Fn(Q) -> Result<R, InterfaceError> + Send + Sync + 'static,
{
    let call = Arc::new(call);
    fetcher(move |query: Q| {
        let call = Arc::clone(&call);
        async move {
            tokio::task::spawn_blocking(move || call(query))
                .await
                .map_err(|err| InterfaceError::Unavailable(format!("client call aborted: {err}")))?
        }
    })
}
