//! The workflow instance opened in the detail view.

use std::time::Duration;

use operate_protocol::{InstanceState, WorkflowInstance};

use super::{
    polling::{Fetcher, IdlePolicy, PollingStore, ResourceState},
    reactive::Observable,
};

/// Polls the selected instance while one is selected.
#[derive(Clone)]
pub struct CurrentInstanceStore {
    store: PollingStore<WorkflowInstance>,
    selected: Observable<Option<String>>,
}

impl CurrentInstanceStore {
    pub fn new(interval: Duration, fetcher: Fetcher<String, WorkflowInstance>) -> Self {
        Self {
            store: PollingStore::new("current-instance", interval, fetcher),
            selected: Observable::new(None),
        }
    }

    pub fn store(&self) -> &PollingStore<WorkflowInstance> {
        &self.store
    }

    pub fn state(&self) -> &Observable<ResourceState<WorkflowInstance>> {
        self.store.state()
    }

    pub fn selected(&self) -> &Observable<Option<String>> {
        &self.selected
    }

    pub fn selected_id(&self) -> Option<String> {
        self.selected.get()
    }

    pub fn instance(&self) -> Option<WorkflowInstance> {
        self.store.state().with(|state| state.response.clone())
    }

    pub fn instance_state(&self) -> Option<InstanceState> {
        self.store
            .state()
            .with(|state| state.response.as_ref().map(|instance| instance.state))
    }

    /// Selects `id`. Selecting the current id again is a no-op.
    pub fn select(&self, id: impl Into<String>) {
        self.selected.set_if_changed(Some(id.into()));
    }

    pub fn clear_selection(&self) {
        self.selected.set_if_changed(None);
    }

    /// Polls while an instance is selected; the cached instance is dropped
    /// as soon as the selection goes away.
    pub fn init(&self) {
        self.store
            .bind_guard(&self.selected, |selected| selected.clone(), IdlePolicy::Clear);
    }

    pub fn reset(&self) {
        self.store.reset();
        self.selected.set_if_changed(None);
    }
}
