//! Flow node metadata of the workflow the current instance runs.
//!
//! The definition is fetched as BPMN XML whenever the loaded instance points
//! at a different workflow, and reduced to the id, name and element type of
//! every flow node.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use quick_xml::{Reader, events::Event};
use thiserror::Error;
use tracing::{debug, warn};

use operate_interface::InterfaceError;

use super::{
    current_instance::CurrentInstanceStore,
    polling::{Fetcher, ResponseGate},
    reactive::{Edge, Observable, Reaction, lock, react_to_edges},
};

/// Display metadata of one flow node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowNodeMetadata {
    pub name: Option<String>,
    /// BPMN element, e.g. `serviceTask` or `exclusiveGateway`.
    pub flow_node_type: String,
}

pub type DiagramMetadata = HashMap<String, FlowNodeMetadata>;

#[derive(Debug, Error)]
pub enum DiagramError {
    #[error("failed to fetch workflow definition: {0}")]
    Fetch(#[from] InterfaceError),
    #[error("malformed workflow definition: {0}")]
    Xml(#[from] quick_xml::Error),
}

struct Control {
    /// Workflow the metadata is (being) loaded for.
    workflow: Option<String>,
    gate: ResponseGate,
}

struct Inner {
    fetcher: Fetcher<String, String>,
    metadata: Observable<DiagramMetadata>,
    control: Mutex<Control>,
    loader: Mutex<Option<Reaction>>,
}

#[derive(Clone)]
pub struct DiagramStore {
    inner: Arc<Inner>,
}

impl DiagramStore {
    pub fn new(fetcher: Fetcher<String, String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                fetcher,
                metadata: Observable::default(),
                control: Mutex::new(Control {
                    workflow: None,
                    gate: ResponseGate::default(),
                }),
                loader: Mutex::new(None),
            }),
        }
    }

    pub fn with_metadata<R>(&self, f: impl FnOnce(&DiagramMetadata) -> R) -> R {
        self.inner.metadata.with(f)
    }

    pub fn revision(&self) -> u64 {
        self.inner.metadata.revision()
    }

    /// Workflow whose definition is loaded or loading.
    pub fn workflow(&self) -> Option<String> {
        lock(&self.inner.control).workflow.clone()
    }

    /// Loads the definition of each workflow the current instance runs.
    /// Deselecting keeps the metadata; it only changes with the workflow.
    pub fn init(&self, current: &CurrentInstanceStore) {
        let weak = Arc::downgrade(&self.inner);
        let reaction = react_to_edges(
            current.state(),
            |state| state.response.as_ref().map(|instance| instance.workflow_id.clone()),
            move |edge| match edge {
                Edge::Rising(workflow_id) | Edge::Switched { to: workflow_id, .. } => {
                    if let Some(inner) = weak.upgrade() {
                        DiagramStore { inner }.load(workflow_id);
                    }
                }
                Edge::Falling(_) => {}
            },
        );
        *lock(&self.inner.loader) = Some(reaction);
    }

    /// Loads the definition of `workflow_id` in the background unless it is
    /// already loaded or loading. The previous names are dropped right away.
    pub fn load(&self, workflow_id: String) {
        let ticket = {
            let mut control = lock(&self.inner.control);
            if control.workflow.as_deref() == Some(workflow_id.as_str()) {
                return;
            }
            control.workflow = Some(workflow_id.clone());
            control.gate.invalidate();
            control.gate.issue()
        };
        self.inner.metadata.set_if_changed(HashMap::new());

        let store = self.clone();
        tokio::spawn(async move {
            let result = store.fetch_metadata(&workflow_id).await;
            let mut control = lock(&store.inner.control);
            match result {
                Ok(metadata) => {
                    if control.gate.admit(ticket) {
                        debug!(
                            workflow = %workflow_id,
                            flow_nodes = metadata.len(),
                            "diagram loaded"
                        );
                        store.inner.metadata.set(metadata);
                    }
                }
                Err(err) => {
                    warn!(workflow = %workflow_id, "diagram unavailable: {err}");
                    // Let the next instance of this workflow try again.
                    if control.workflow.as_deref() == Some(workflow_id.as_str()) {
                        control.workflow = None;
                    }
                }
            }
        });
    }

    /// Fetches and parses the definition of `workflow_id`.
    pub async fn fetch_metadata(&self, workflow_id: &str) -> Result<DiagramMetadata, DiagramError> {
        let xml = (self.inner.fetcher)(workflow_id.to_string()).await?;
        Ok(parse_flow_nodes(&xml)?)
    }

    pub fn reset(&self) {
        if let Some(loader) = lock(&self.inner.loader).take() {
            loader.dispose();
        }
        let mut control = lock(&self.inner.control);
        control.workflow = None;
        control.gate.invalidate();
        self.inner.metadata.set(HashMap::new());
    }
}

/// Extracts every flow node (tasks, events, gateways, sub-processes and call
/// activities) from a BPMN document, keyed by element id.
pub fn parse_flow_nodes(xml: &str) -> Result<DiagramMetadata, quick_xml::Error> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut nodes = HashMap::new();
    loop {
        match reader.read_event()? {
            Event::Start(element) | Event::Empty(element) => {
                let local_name = element.local_name();
                let kind = String::from_utf8_lossy(local_name.as_ref()).into_owned();
                if !is_flow_node(&kind) {
                    continue;
                }

                let mut id = None;
                let mut name = None;
                for attribute in element.attributes() {
                    let attribute = attribute?;
                    match attribute.key.local_name().as_ref() {
                        b"id" => id = Some(attribute.unescape_value()?.into_owned()),
                        b"name" => name = Some(attribute.unescape_value()?.into_owned()),
                        _ => {}
                    }
                }
                if let Some(id) = id {
                    nodes.insert(
                        id,
                        FlowNodeMetadata {
                            name,
                            flow_node_type: kind,
                        },
                    );
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(nodes)
}

fn is_flow_node(kind: &str) -> bool {
    kind.ends_with("Task")
        || kind.ends_with("Event")
        || kind.ends_with("Gateway")
        || matches!(kind, "task" | "subProcess" | "callActivity")
}

pub(crate) fn name_or_id(metadata: Option<&FlowNodeMetadata>, flow_node_id: &str) -> String {
    metadata
        .and_then(|meta| meta.name.clone())
        .unwrap_or_else(|| flow_node_id.to_string())
}
