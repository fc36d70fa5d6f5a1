//! Shared filter state observed by the instance list.

use indexmap::IndexMap;

use operate_protocol::{GroupedWorkflow, Sorting};

use super::filter::Filter;
use super::reactive::Observable;

/// Page size used until a caller sets one.
pub const DEFAULT_ENTRIES_PER_PAGE: u32 = 50;

#[derive(Debug, Clone, PartialEq)]
pub struct FiltersState {
    pub filter: Filter,
    pub sorting: Sorting,
    pub entries_per_page: u32,
    pub first_result: u32,
    /// Deployed workflows keyed by BPMN process id.
    pub grouped_workflows: IndexMap<String, GroupedWorkflow>,
    /// Number of `set_filter` writes since the last reset.
    pub filter_revision: u64,
}

impl FiltersState {
    fn with_page_size(entries_per_page: u32) -> Self {
        Self {
            filter: Filter::default(),
            sorting: Sorting::default(),
            entries_per_page,
            first_result: 0,
            grouped_workflows: IndexMap::new(),
            filter_revision: 0,
        }
    }
}

/// Last committed filter, sorting and pagination.
///
/// Writes go through the setters only; no validation happens here.
#[derive(Clone)]
pub struct FiltersStore {
    state: Observable<FiltersState>,
    default_entries_per_page: u32,
}

impl Default for FiltersStore {
    fn default() -> Self {
        Self::new(DEFAULT_ENTRIES_PER_PAGE)
    }
}

impl FiltersStore {
    pub fn new(entries_per_page: u32) -> Self {
        Self {
            state: Observable::new(FiltersState::with_page_size(entries_per_page)),
            default_entries_per_page: entries_per_page,
        }
    }

    pub fn state(&self) -> &Observable<FiltersState> {
        &self.state
    }

    pub fn snapshot(&self) -> FiltersState {
        self.state.get()
    }

    pub fn filter(&self) -> Filter {
        self.state.with(|state| state.filter.clone())
    }

    pub fn sorting(&self) -> Sorting {
        self.state.with(|state| state.sorting.clone())
    }

    pub fn entries_per_page(&self) -> u32 {
        self.state.with(|state| state.entries_per_page)
    }

    pub fn first_result(&self) -> u32 {
        self.state.with(|state| state.first_result)
    }

    pub fn filter_revision(&self) -> u64 {
        self.state.with(|state| state.filter_revision)
    }

    pub fn grouped_workflows(&self) -> IndexMap<String, GroupedWorkflow> {
        self.state.with(|state| state.grouped_workflows.clone())
    }

    pub fn grouped_workflow(&self, bpmn_process_id: &str) -> Option<GroupedWorkflow> {
        self.state
            .with(|state| state.grouped_workflows.get(bpmn_process_id).cloned())
    }

    /// Replaces the filter wholesale and returns to the first page.
    pub fn set_filter(&self, filter: Filter) {
        self.state.update(|state| {
            state.filter = filter;
            state.first_result = 0;
            state.filter_revision += 1;
        });
    }

    pub fn set_sorting(&self, sorting: Sorting) {
        self.state.update(|state| state.sorting = sorting);
    }

    pub fn set_entries_per_page(&self, entries_per_page: u32) {
        self.state
            .update(|state| state.entries_per_page = entries_per_page);
    }

    pub fn set_first_result(&self, first_result: u32) {
        self.state.update(|state| state.first_result = first_result);
    }

    pub fn set_grouped_workflows(&self, workflows: Vec<GroupedWorkflow>) {
        let grouped = workflows
            .into_iter()
            .map(|group| (group.bpmn_process_id.clone(), group))
            .collect();
        self.state.update(|state| state.grouped_workflows = grouped);
    }

    pub fn reset(&self) {
        self.state
            .set(FiltersState::with_page_size(self.default_entries_per_page));
    }
}
