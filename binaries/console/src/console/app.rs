//! Console composition root.
//!
//! [`ConsoleApp`] builds every store from one set of fetchers, wires their
//! guards on `init`, and renders a headless view of the state until shut
//! down.

use std::future::Future;

use indexmap::IndexMap;
use tokio_stream::{StreamExt, wrappers::WatchStream};
use tracing::{debug, info, warn};

use operate_interface::InterfaceError;
use operate_protocol::{ErrorTypeCount, GroupedWorkflow, InstanceState};

use super::{
    bridge::{ServiceBundle, StoreFetchers},
    config::ConsoleConfig,
    current_instance::CurrentInstanceStore,
    diagram::DiagramStore,
    filter::{FilterChange, FilterError, parse_query_string, to_query_string},
    filter_controller::{FilterController, Propagation},
    filters_store::FiltersStore,
    incidents::IncidentsStore,
    instances_list::InstancesListStore,
    mappers::FlowNodeView,
    polling::Fetcher,
    reactive::Observable,
    sequence_flows::SequenceFlowsStore,
};

/// Which part of the console state changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateUpdate {
    FiltersChanged,
    InstancesChanged,
    CurrentInstanceChanged,
    IncidentsChanged,
    SequenceFlowsChanged,
}

/// Everything the headless renderer shows.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsoleSnapshot {
    pub query: String,
    pub workflow_preview: Option<String>,
    pub instances_loaded: bool,
    pub instances_shown: usize,
    pub instances_total: u64,
    pub selected_instance: Option<String>,
    pub instance_state: Option<InstanceState>,
    pub incidents_count: u32,
    pub incident_flow_nodes: IndexMap<String, FlowNodeView>,
    pub error_types: IndexMap<String, ErrorTypeCount>,
    pub executed_activities: Vec<String>,
}

pub struct ConsoleApp {
    filters: FiltersStore,
    controller: FilterController,
    diagram: DiagramStore,
    current_instance: CurrentInstanceStore,
    incidents: IncidentsStore,
    sequence_flows: SequenceFlowsStore,
    instances: InstancesListStore,
    grouped_workflows: Fetcher<(), Vec<GroupedWorkflow>>,
    workflow_preview: Observable<Option<String>>,
}

impl ConsoleApp {
    pub fn new(config: &ConsoleConfig, fetchers: StoreFetchers) -> Self {
        let filters = FiltersStore::new(config.entries_per_page);
        let controller = FilterController::new(filters.clone(), config.debounce_delay);
        let diagram = DiagramStore::new(fetchers.workflow_xml);

        Self {
            controller,
            current_instance: CurrentInstanceStore::new(config.poll_interval, fetchers.instance),
            incidents: IncidentsStore::new(
                config.poll_interval,
                fetchers.incidents,
                diagram.clone(),
            ),
            sequence_flows: SequenceFlowsStore::new(config.poll_interval, fetchers.sequence_flows),
            instances: InstancesListStore::new(fetchers.instances),
            grouped_workflows: fetchers.grouped_workflows,
            workflow_preview: Observable::new(None),
            diagram,
            filters,
        }
    }

    pub fn from_service_bundle(config: &ConsoleConfig, bundle: &ServiceBundle) -> Self {
        Self::new(config, StoreFetchers::from_bundle(bundle))
    }

    pub fn filters(&self) -> &FiltersStore {
        &self.filters
    }

    pub fn controller(&self) -> &FilterController {
        &self.controller
    }

    pub fn diagram(&self) -> &DiagramStore {
        &self.diagram
    }

    pub fn current_instance(&self) -> &CurrentInstanceStore {
        &self.current_instance
    }

    pub fn incidents(&self) -> &IncidentsStore {
        &self.incidents
    }

    pub fn sequence_flows(&self) -> &SequenceFlowsStore {
        &self.sequence_flows
    }

    pub fn instances(&self) -> &InstancesListStore {
        &self.instances
    }

    /// Binds every store to its upstream state.
    pub fn init(&self) {
        self.current_instance.init();
        self.diagram.init(&self.current_instance);
        self.incidents.init(&self.current_instance);
        self.sequence_flows.init(&self.current_instance);
        self.instances.init(&self.filters);
        debug!("console stores initialized");
    }

    /// Tears down every guard and timer and returns to the initial state.
    pub fn reset(&self) {
        self.controller.teardown();
        self.incidents.reset();
        self.sequence_flows.reset();
        self.current_instance.reset();
        self.instances.reset();
        self.diagram.reset();
        self.filters.reset();
        self.workflow_preview.set_if_changed(None);
        debug!("console stores reset");
    }

    pub fn select_instance(&self, id: impl Into<String>) {
        self.current_instance.select(id);
    }

    pub fn clear_selection(&self) {
        self.current_instance.clear_selection();
    }

    /// Applies URL query-string state. Without a filter the list falls
    /// back to the running instances.
    pub fn apply_deep_link(&self, query: &str) -> Result<Propagation, FilterError> {
        let link = parse_query_string(query)?;

        self.workflow_preview.set_if_changed(link.name);
        if let Some(sorting) = link.sorting {
            self.filters.set_sorting(sorting);
        }
        Ok(match link.filter {
            Some(filter) => {
                self.controller.set_filter(filter);
                self.controller.propagate()
            }
            None => self.controller.reset(),
        })
    }

    pub fn apply_change(&self, change: FilterChange) -> Option<Propagation> {
        self.controller.on_field_change(change)
    }

    /// Query string reproducing the committed filter and sorting.
    pub fn deep_link(&self) -> String {
        to_query_string(&self.filters.filter(), Some(&self.filters.sorting()))
    }

    /// Loads the deployed workflows into the shared filter state.
    pub async fn load_grouped_workflows(&self) -> Result<usize, InterfaceError> {
        let workflows = (self.grouped_workflows)(()).await?;
        let count = workflows.len();
        self.filters.set_grouped_workflows(workflows);
        // The preview name is only needed until the real list arrives.
        self.workflow_preview.set_if_changed(None);
        Ok(count)
    }

    pub fn snapshot(&self) -> ConsoleSnapshot {
        let list = self.instances.snapshot();
        ConsoleSnapshot {
            query: self.deep_link(),
            workflow_preview: self.workflow_preview.get(),
            instances_loaded: list.is_loaded,
            instances_shown: list.instances.len(),
            instances_total: list.total_count,
            selected_instance: self.current_instance.selected_id(),
            instance_state: self.current_instance.instance_state(),
            incidents_count: self.incidents.incidents_count(),
            incident_flow_nodes: self.incidents.flow_nodes(),
            error_types: self.incidents.error_types(),
            executed_activities: self.sequence_flows.items(),
        }
    }

    /// Renders a snapshot on every state change until `shutdown` resolves.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let updates = WatchStream::new(self.filters.state().subscribe())
            .map(|_| StateUpdate::FiltersChanged)
            .merge(
                WatchStream::new(self.instances.state().subscribe())
                    .map(|_| StateUpdate::InstancesChanged),
            )
            .merge(
                WatchStream::new(self.current_instance.state().subscribe())
                    .map(|_| StateUpdate::CurrentInstanceChanged),
            )
            .merge(
                WatchStream::new(self.incidents.state().subscribe())
                    .map(|_| StateUpdate::IncidentsChanged),
            )
            .merge(
                WatchStream::new(self.sequence_flows.state().subscribe())
                    .map(|_| StateUpdate::SequenceFlowsChanged),
            );
        tokio::pin!(updates);
        tokio::pin!(shutdown);

        let mut last: Option<ConsoleSnapshot> = None;
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                update = updates.next() => {
                    let Some(update) = update else {
                        warn!("state streams closed");
                        break;
                    };
                    let snapshot = self.snapshot();
                    if last.as_ref() != Some(&snapshot) {
                        render(update, &snapshot);
                        last = Some(snapshot);
                    }
                }
            }
        }
        info!("console stopped");
    }
}

fn render(update: StateUpdate, snapshot: &ConsoleSnapshot) {
    info!(
        ?update,
        query = %snapshot.query,
        preview = snapshot.workflow_preview.as_deref().unwrap_or(""),
        loaded = snapshot.instances_loaded,
        shown = snapshot.instances_shown,
        total = snapshot.instances_total,
        "instances"
    );
    if let Some(id) = &snapshot.selected_instance {
        info!(
            %id,
            state = ?snapshot.instance_state,
            incidents = snapshot.incidents_count,
            flow_nodes = ?snapshot.incident_flow_nodes.keys().collect::<Vec<_>>(),
            error_types = ?snapshot.error_types.keys().collect::<Vec<_>>(),
            activities = ?snapshot.executed_activities,
            "instance"
        );
    }
}
