//! Debounced filter controller.
//!
//! Keeps the draft filter behind the filter inputs. Text edits update the
//! draft at once and reach the shared state after a quiet period; dropdowns
//! and checkboxes propagate immediately. Propagation writes only when the
//! sanitized draft differs from what is already committed.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use tracing::{debug, info};

use super::{
    debounce::Debouncer,
    filter::{
        Filter, FilterChange, ValidatedField, decode_field, encode_field, invalid_fields,
        last_version, sanitize, to_query_string,
    },
    filters_store::FiltersStore,
    reactive::lock,
};

/// Result of a propagation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Propagation {
    Written(Filter),
    Unchanged,
}

#[derive(Clone)]
pub struct FilterController {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    draft: Mutex<Filter>,
    shared: FiltersStore,
    debouncer: Debouncer,
    reset_filter: Filter,
}

impl FilterController {
    pub fn new(shared: FiltersStore, delay: Duration) -> Self {
        Self::with_reset_filter(shared, delay, Filter::running_instances())
    }

    pub fn with_reset_filter(shared: FiltersStore, delay: Duration, reset_filter: Filter) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                draft: Mutex::new(Filter::default()),
                shared,
                debouncer: Debouncer::new(delay),
                reset_filter,
            }),
        }
    }

    pub fn draft(&self) -> Filter {
        lock(&self.inner.draft).clone()
    }

    /// The draft with encoded fields decoded, as inputs display it.
    pub fn display_draft(&self) -> Filter {
        let mut draft = self.draft();
        draft.ids = decode_field(&draft.ids);
        draft.error_message = decode_field(&draft.error_message);
        draft
    }

    pub fn is_pending(&self) -> bool {
        self.inner.debouncer.is_pending()
    }

    /// Applies one input edit. Immediate fields propagate synchronously and
    /// return the outcome; text fields schedule a debounced propagation and
    /// return `None`.
    pub fn on_field_change(&self, change: FilterChange) -> Option<Propagation> {
        let immediate = change.is_immediate();
        if !self.apply(change) {
            return None;
        }

        if immediate {
            self.inner.debouncer.cancel();
            Some(self.propagate())
        } else {
            let weak = Arc::downgrade(&self.inner);
            self.inner.debouncer.schedule(async move {
                if let Some(inner) = weak.upgrade() {
                    FilterController { inner }.propagate();
                }
            });
            None
        }
    }

    /// Commits the sanitized draft if it differs from the shared filter.
    /// Fields that are incomplete or invalid keep their committed value.
    pub fn propagate(&self) -> Propagation {
        let committed = self.inner.shared.filter();
        let (next, blocked) = committable(&self.draft(), &committed);
        if !blocked.is_empty() {
            debug!(?blocked, "holding back incomplete filter fields");
        }

        if next == committed {
            return Propagation::Unchanged;
        }
        info!(query = %to_query_string(&next, None), "filter committed");
        self.inner.shared.set_filter(next.clone());
        Propagation::Written(next)
    }

    /// Adopts a filter coming from outside the inputs (deep link, shared
    /// state). Debounced fields are sanitized on the way in.
    pub fn set_filter(&self, filter: Filter) {
        let sanitized = sanitize(&filter);
        let mut next = filter;
        next.start_date = sanitized.start_date;
        next.end_date = sanitized.end_date;
        next.variable = sanitized.variable;
        next.batch_operation_id = sanitized.batch_operation_id;
        *lock(&self.inner.draft) = next;
    }

    /// Restores the reset filter, writing it only if the shared filter
    /// differs.
    pub fn reset(&self) -> Propagation {
        self.inner.debouncer.cancel();
        let reset_filter = self.inner.reset_filter.clone();
        *lock(&self.inner.draft) = reset_filter.clone();

        if self.inner.shared.filter() == reset_filter {
            return Propagation::Unchanged;
        }
        self.inner.shared.set_filter(reset_filter.clone());
        Propagation::Written(reset_filter)
    }

    /// Cancels any pending propagation and clears the draft.
    pub fn teardown(&self) {
        self.inner.debouncer.cancel();
        *lock(&self.inner.draft) = Filter::default();
    }

    fn apply(&self, change: FilterChange) -> bool {
        // Resolved before taking the draft lock.
        let workflow_version = match &change {
            FilterChange::Workflow(workflow) if !workflow.is_empty() => self
                .inner
                .shared
                .grouped_workflow(workflow)
                .and_then(|group| last_version(&group))
                .unwrap_or_default(),
            _ => String::new(),
        };

        let mut draft = lock(&self.inner.draft);
        match change {
            FilterChange::Active(value) => draft.active = value,
            FilterChange::Incidents(value) => draft.incidents = value,
            FilterChange::Completed(value) => draft.completed = value,
            FilterChange::Canceled(value) => draft.canceled = value,
            FilterChange::Workflow(workflow) => {
                draft.workflow = workflow;
                draft.version = workflow_version;
                draft.activity_id.clear();
            }
            FilterChange::Version(version) => {
                if version.is_empty() {
                    return false;
                }
                draft.version = version;
                draft.activity_id.clear();
            }
            FilterChange::ActivityId(activity_id) => draft.activity_id = activity_id,
            FilterChange::Ids(ids) => draft.ids = encode_field(&ids),
            FilterChange::ErrorMessage(message) => draft.error_message = encode_field(&message),
            FilterChange::StartDate(date) => draft.start_date = date,
            FilterChange::EndDate(date) => draft.end_date = date,
            FilterChange::BatchOperationId(id) => draft.batch_operation_id = id,
            FilterChange::Variable(variable) => draft.variable = variable,
        }
        true
    }
}

fn committable(draft: &Filter, committed: &Filter) -> (Filter, Vec<ValidatedField>) {
    let blocked = invalid_fields(draft);
    let mut next = draft.clone();
    for field in &blocked {
        match field {
            ValidatedField::Ids => next.ids = committed.ids.clone(),
            ValidatedField::StartDate => next.start_date = committed.start_date.clone(),
            ValidatedField::EndDate => next.end_date = committed.end_date.clone(),
            ValidatedField::Variable => next.variable = committed.variable.clone(),
            ValidatedField::BatchOperationId => {
                next.batch_operation_id = committed.batch_operation_id.clone()
            }
        }
    }
    (sanitize(&next), blocked)
}
