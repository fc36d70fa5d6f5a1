mod error;

use std::sync::Arc;

use reqwest::{
    StatusCode,
    blocking::{Client, Response},
};
use serde::{Serialize, de::DeserializeOwned};
use tracing::debug;
use url::Url;

use operate_interface::{InstanceClient, InstancesListClient, InterfaceError, PageRequest};
use operate_protocol::{
    ErrorEnvelope, GroupedWorkflow, IncidentsResponse, InstancesPage, InstancesRequest,
    SequenceFlow, WorkflowInstance,
};

#[derive(Clone)]
pub struct ProtocolClients {
    transport: Arc<Transport>,
}

impl ProtocolClients {
    pub fn new(base_url: impl AsRef<str>) -> Result<Self, error::ProtocolClientError> {
        let base = normalize_base_url(base_url.as_ref())?;
        let client = Client::builder().no_proxy().build()?;
        Ok(Self {
            transport: Arc::new(Transport { client, base }),
        })
    }

    pub fn instance_client(&self) -> Arc<dyn InstanceClient> {
        Arc::new(ProtocolInstanceClient {
            transport: Arc::clone(&self.transport),
        })
    }

    pub fn instances_list_client(&self) -> Arc<dyn InstancesListClient> {
        Arc::new(ProtocolInstancesListClient {
            transport: Arc::clone(&self.transport),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.transport.base
    }
}

struct Transport {
    client: Client,
    base: Url,
}

impl Transport {
    fn endpoint(&self, path: &str) -> Result<Url, error::ProtocolClientError> {
        let normalized = path.strip_prefix('/').unwrap_or(path);
        Ok(self.base.join(normalized)?)
    }

    fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, error::ProtocolClientError> {
        let body = self.get_text(path)?;
        Ok(serde_json::from_str(&body)?)
    }

    fn get_text(&self, path: &str) -> Result<String, error::ProtocolClientError> {
        let url = self.endpoint(path)?;
        debug!(target: "operate::http", %url, "GET");
        let response = self.client.get(url).send()?;
        successful_body(path, response)
    }

    fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        body: &B,
    ) -> Result<T, error::ProtocolClientError> {
        let mut url = self.endpoint(path)?;
        if !query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(query.iter().map(|(key, value)| (*key, value.as_str())));
        }
        debug!(target: "operate::http", %url, "POST");
        let response = self.client.post(url).json(body).send()?;
        let body = successful_body(path, response)?;
        Ok(serde_json::from_str(&body)?)
    }
}

/// Body of a 2xx response; anything else becomes an error carrying the
/// server's message.
fn successful_body(path: &str, response: Response) -> Result<String, error::ProtocolClientError> {
    let status = response.status();
    let body = response.text()?;

    if status == StatusCode::NOT_FOUND {
        return Err(error::ProtocolClientError::NotFound(path.to_string()));
    }
    if !status.is_success() {
        let message = serde_json::from_str::<ErrorEnvelope>(&body)
            .map(|envelope| envelope.message)
            .unwrap_or_else(|_| {
                if body.trim().is_empty() {
                    status.canonical_reason().unwrap_or("request failed").to_string()
                } else {
                    body.trim().to_string()
                }
            });
        return Err(error::ProtocolClientError::Api {
            status: status.as_u16(),
            message,
        });
    }

    Ok(body)
}

fn normalize_base_url(raw: &str) -> Result<Url, error::ProtocolClientError> {
    let mut parsed = Url::parse(raw)?;
    if !parsed.path().ends_with('/') {
        let mut path = parsed.path().to_owned();
        path.push('/');
        parsed.set_path(&path);
    }
    Ok(parsed)
}

#[derive(Clone)]
struct ProtocolInstanceClient {
    transport: Arc<Transport>,
}

impl InstanceClient for ProtocolInstanceClient {
    fn fetch_instance(&self, id: &str) -> Result<WorkflowInstance, InterfaceError> {
        self.transport
            .get(&format!("/api/workflow-instances/{id}"))
            .map_err(InterfaceError::from_proto_error)
    }

    fn fetch_incidents(&self, id: &str) -> Result<IncidentsResponse, InterfaceError> {
        self.transport
            .get(&format!("/api/workflow-instances/{id}/incidents"))
            .map_err(InterfaceError::from_proto_error)
    }

    fn fetch_sequence_flows(&self, id: &str) -> Result<Vec<SequenceFlow>, InterfaceError> {
        self.transport
            .get(&format!("/api/workflow-instances/{id}/sequence-flows"))
            .map_err(InterfaceError::from_proto_error)
    }

    fn fetch_workflow_xml(&self, workflow_id: &str) -> Result<String, InterfaceError> {
        self.transport
            .get_text(&format!("/api/workflows/{workflow_id}/xml"))
            .map_err(InterfaceError::from_proto_error)
    }
}

#[derive(Clone)]
struct ProtocolInstancesListClient {
    transport: Arc<Transport>,
}

impl InstancesListClient for ProtocolInstancesListClient {
    fn list_instances(
        &self,
        request: &InstancesRequest,
        page: PageRequest,
    ) -> Result<InstancesPage, InterfaceError> {
        self.transport
            .post(
                "/api/workflow-instances",
                &page_query(page),
                request,
            )
            .map_err(InterfaceError::from_proto_error)
    }

    fn grouped_workflows(&self) -> Result<Vec<GroupedWorkflow>, InterfaceError> {
        self.transport
            .get("/api/workflows/grouped")
            .map_err(InterfaceError::from_proto_error)
    }
}

fn page_query(page: PageRequest) -> [(&'static str, String); 2] {
    [
        ("firstResult", page.first_result.to_string()),
        ("maxResults", page.max_results.to_string()),
    ]
}

trait InterfaceErrorExt {
    fn from_proto_error(err: error::ProtocolClientError) -> InterfaceError;
}

impl InterfaceErrorExt for InterfaceError {
    fn from_proto_error(err: error::ProtocolClientError) -> InterfaceError {
        match err {
            error::ProtocolClientError::NotFound(path) => InterfaceError::NotFound(path),
            error::ProtocolClientError::Http(http) if http.is_connect() || http.is_timeout() => {
                InterfaceError::Unavailable(http.to_string())
            }
            other => InterfaceError::Message(other.to_string()),
        }
    }
}

pub use error::ProtocolClientError;
