//! Incidents of the current instance and the views derived from them.

use std::time::Duration;

use indexmap::IndexMap;

use operate_protocol::{ErrorTypeCount, IncidentsResponse, InstanceState, WorkflowInstance};

use super::{
    current_instance::CurrentInstanceStore,
    diagram::DiagramStore,
    mappers::{FlowNodeView, IncidentView, add_flow_node_name, flow_node_view, mapify},
    polling::{Fetcher, IdlePolicy, PollingStore, ResourceState},
    reactive::{Computed, Observable},
};

/// Revisions of the incidents response and the diagram metadata.
type ViewKey = (u64, u64);

pub struct IncidentsStore {
    store: PollingStore<IncidentsResponse>,
    diagram: DiagramStore,
    incidents: Computed<ViewKey, Vec<IncidentView>>,
    flow_nodes: Computed<ViewKey, IndexMap<String, FlowNodeView>>,
    error_types: Computed<u64, IndexMap<String, ErrorTypeCount>>,
}

impl IncidentsStore {
    pub fn new(
        interval: Duration,
        fetcher: Fetcher<String, IncidentsResponse>,
        diagram: DiagramStore,
    ) -> Self {
        Self {
            store: PollingStore::new("incidents", interval, fetcher),
            diagram,
            incidents: Computed::new(),
            flow_nodes: Computed::new(),
            error_types: Computed::new(),
        }
    }

    pub fn store(&self) -> &PollingStore<IncidentsResponse> {
        &self.store
    }

    pub fn state(&self) -> &Observable<ResourceState<IncidentsResponse>> {
        self.store.state()
    }

    /// Polls while the current instance is in the incident state. The last
    /// response stays visible after that instance's incidents are resolved,
    /// and is dropped as soon as another instance (or none) is shown.
    pub fn init(&self, current: &CurrentInstanceStore) {
        self.store.bind_guard(
            current.state(),
            |state| {
                state
                    .response
                    .as_ref()
                    .filter(|instance| instance.state == InstanceState::Incident)
                    .map(|instance| instance.id.clone())
            },
            IdlePolicy::KeepLastValue {
                scope: loaded_instance_id,
            },
        );
    }

    pub fn reset(&self) {
        self.store.reset();
    }

    pub fn is_loaded(&self) -> bool {
        self.store.state().with(|state| state.is_loaded)
    }

    pub fn incidents_count(&self) -> u32 {
        self.store
            .state()
            .with(|state| state.response.as_ref().map_or(0, |response| response.count))
    }

    /// Incidents with the display names of their flow nodes.
    pub fn incidents(&self) -> Vec<IncidentView> {
        self.incidents.get(self.view_key(), || {
            self.diagram.with_metadata(|metadata| {
                self.store.state().with(|state| {
                    state.response.as_ref().map_or_else(Vec::new, |response| {
                        response
                            .incidents
                            .iter()
                            .map(|incident| add_flow_node_name(incident, metadata))
                            .collect()
                    })
                })
            })
        })
    }

    /// Incident counts keyed by flow node id.
    pub fn flow_nodes(&self) -> IndexMap<String, FlowNodeView> {
        self.flow_nodes.get(self.view_key(), || {
            self.diagram.with_metadata(|metadata| {
                self.store.state().with(|state| {
                    let views = state
                        .response
                        .iter()
                        .flat_map(|response| response.flow_nodes.iter())
                        .map(|flow_node| flow_node_view(flow_node, metadata));
                    mapify(views, |view| view.flow_node_id.clone())
                })
            })
        })
    }

    /// Incident counts keyed by error type.
    pub fn error_types(&self) -> IndexMap<String, ErrorTypeCount> {
        self.error_types.get(self.store.state().revision(), || {
            self.store.state().with(|state| {
                let types = state
                    .response
                    .iter()
                    .flat_map(|response| response.error_types.iter().cloned());
                mapify(types, |error_type| error_type.error_type.clone())
            })
        })
    }

    fn view_key(&self) -> ViewKey {
        (self.store.state().revision(), self.diagram.revision())
    }
}

fn loaded_instance_id(state: &ResourceState<WorkflowInstance>) -> Option<String> {
    state.response.as_ref().map(|instance| instance.id.clone())
}
