use std::time::Duration;

use operate_protocol::SequenceFlow;

use super::{
    current_instance::CurrentInstanceStore,
    mappers::processed_sequence_flows,
    polling::{Fetcher, IdlePolicy, PollingStore, ResourceState},
    reactive::{Computed, Observable},
};

/// Sequence flows taken by the current instance, used to highlight the
/// executed path on the diagram.
pub struct SequenceFlowsStore {
    store: PollingStore<Vec<SequenceFlow>>,
    items: Computed<u64, Vec<String>>,
}

impl SequenceFlowsStore {
    pub fn new(interval: Duration, fetcher: Fetcher<String, Vec<SequenceFlow>>) -> Self {
        Self {
            store: PollingStore::new("sequence-flows", interval, fetcher),
            items: Computed::new(),
        }
    }

    pub fn store(&self) -> &PollingStore<Vec<SequenceFlow>> {
        &self.store
    }

    pub fn state(&self) -> &Observable<ResourceState<Vec<SequenceFlow>>> {
        self.store.state()
    }

    /// Polls while the current instance is loaded; the flows go away with
    /// the instance they belong to.
    pub fn init(&self, current: &CurrentInstanceStore) {
        self.store.bind_guard(
            current.state(),
            |state| state.response.as_ref().map(|instance| instance.id.clone()),
            IdlePolicy::Clear,
        );
    }

    pub fn reset(&self) {
        self.store.reset();
    }

    /// Unique activity ids of the taken flows, in first-seen order.
    pub fn items(&self) -> Vec<String> {
        self.items.get(self.store.state().revision(), || {
            self.store.state().with(|state| {
                state
                    .response
                    .as_deref()
                    .map(processed_sequence_flows)
                    .unwrap_or_default()
            })
        })
    }
}
