//! Instance list page backing the filters view.
//!
//! The store reacts to the shared filter state: every committed change of
//! filter, sorting or pagination that yields a different request triggers a
//! fetch. Responses overtaken by a newer request are dropped.

use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, warn};

use operate_interface::{InterfaceError, PageRequest};
use operate_protocol::{InstancesPage, InstancesRequest, WorkflowInstance};

use super::{
    filter::to_instances_query,
    filters_store::{FiltersState, FiltersStore},
    polling::{FetchOutcome, Fetcher, ResponseGate},
    reactive::{Observable, Reaction, lock, react},
};

/// One page request against the list endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct ListRequest {
    pub request: InstancesRequest,
    pub page: PageRequest,
}

impl ListRequest {
    pub fn from_filters(filters: &FiltersState) -> Self {
        Self {
            request: InstancesRequest {
                queries: vec![to_instances_query(
                    &filters.filter,
                    &filters.grouped_workflows,
                )],
                sorting: filters.sorting.clone(),
            },
            page: PageRequest::new(filters.first_result, filters.entries_per_page),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstancesListState {
    pub instances: Vec<WorkflowInstance>,
    pub total_count: u64,
    pub is_loaded: bool,
    pub is_loading: bool,
}

struct ListShared {
    fetcher: Fetcher<ListRequest, InstancesPage>,
    state: Observable<InstancesListState>,
    gate: Mutex<ResponseGate>,
    last_request: Mutex<Option<ListRequest>>,
    reaction: Mutex<Option<Reaction>>,
}

#[derive(Clone)]
pub struct InstancesListStore {
    shared: Arc<ListShared>,
}

impl InstancesListStore {
    pub fn new(fetcher: Fetcher<ListRequest, InstancesPage>) -> Self {
        Self {
            shared: Arc::new(ListShared {
                fetcher,
                state: Observable::new(InstancesListState::default()),
                gate: Mutex::new(ResponseGate::default()),
                last_request: Mutex::new(None),
                reaction: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> &Observable<InstancesListState> {
        &self.shared.state
    }

    pub fn snapshot(&self) -> InstancesListState {
        self.shared.state.get()
    }

    pub fn last_request(&self) -> Option<ListRequest> {
        lock(&self.shared.last_request).clone()
    }

    /// Fetches `request` and replaces the current page with the response
    /// unless a newer request was issued meanwhile.
    pub async fn fetch(&self, request: ListRequest) -> Result<FetchOutcome, InterfaceError> {
        let ticket = lock(&self.shared.gate).issue();
        *lock(&self.shared.last_request) = Some(request.clone());
        self.shared.state.update(|state| state.is_loading = true);

        let response = (self.shared.fetcher)(request).await;

        if !lock(&self.shared.gate).admit(ticket) {
            debug!("discarding superseded instance list response");
            return Ok(FetchOutcome::Discarded);
        }
        match response {
            Ok(page) => {
                self.shared.state.set(InstancesListState {
                    instances: page.workflow_instances,
                    total_count: page.total_count,
                    is_loaded: true,
                    is_loading: false,
                });
                Ok(FetchOutcome::Applied)
            }
            Err(err) => {
                self.shared.state.update(|state| state.is_loading = false);
                Err(err)
            }
        }
    }

    /// Repeats the last request, if there was one.
    pub async fn refresh(&self) -> Result<FetchOutcome, InterfaceError> {
        match self.last_request() {
            Some(request) => self.fetch(request).await,
            None => Ok(FetchOutcome::Discarded),
        }
    }

    /// Fetches whenever the shared filter state produces a new request.
    pub fn init(&self, filters: &FiltersStore) {
        let weak = Arc::downgrade(&self.shared);
        let mut previous: Option<ListRequest> = None;
        let reaction = react(filters.state(), move |state| {
            let request = ListRequest::from_filters(state);
            if previous.as_ref() == Some(&request) {
                return;
            }
            previous = Some(request.clone());
            spawn_fetch(&weak, request);
        });
        *lock(&self.shared.reaction) = Some(reaction);
    }

    pub fn reset(&self) {
        lock(&self.shared.reaction).take();
        lock(&self.shared.gate).invalidate();
        lock(&self.shared.last_request).take();
        self.shared.state.set(InstancesListState::default());
    }
}

fn spawn_fetch(shared: &Weak<ListShared>, request: ListRequest) {
    let Some(shared) = shared.upgrade() else {
        return;
    };
    let store = InstancesListStore { shared };
    tokio::spawn(async move {
        if let Err(err) = store.fetch(request).await {
            warn!("instance list fetch failed: {err}");
        }
    });
}
