//! Instance list filter: the record itself, sanitizing, field encoding,
//! validation, deep-link query strings and conversion into API queries.

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use indexmap::IndexMap;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::form_urlencoded;
use uuid::Uuid;

use operate_protocol::{GroupedWorkflow, InstancesQuery, SortOrder, Sorting, VariableQuery};

/// Version option selecting every version of a workflow.
pub const ALL_VERSIONS: &str = "all";

/// Characters left as-is by `encodeURIComponent`.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("unknown filter field `{0}`")]
    UnknownField(String),
    #[error("invalid value `{value}` for filter field `{field}`")]
    InvalidValue { field: String, value: String },
    #[error("malformed filter in query string: {0}")]
    MalformedQuery(String),
}

/// Variable name/value predicate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct VariableFilter {
    pub name: String,
    pub value: String,
}

impl VariableFilter {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_empty() && self.value.is_empty()
    }
}

/// Instance list filter. Every field has a defined empty value so two
/// filters can always be compared field by field.
///
/// `ids` and `error_message` hold percent-encoded text; use
/// [`decode_field`] for display.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Filter {
    #[serde(skip_serializing_if = "is_false")]
    pub active: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub incidents: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub completed: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub canceled: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ids: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error_message: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub start_date: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub end_date: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub activity_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub workflow: String,
    #[serde(skip_serializing_if = "VariableFilter::is_empty")]
    pub variable: VariableFilter,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub batch_operation_id: String,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl Filter {
    /// Running instances (active and with incidents), the filter the list
    /// falls back to on reset.
    pub fn running_instances() -> Self {
        Self {
            active: true,
            incidents: true,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// A single-field edit coming from an input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterChange {
    Active(bool),
    Incidents(bool),
    Completed(bool),
    Canceled(bool),
    Workflow(String),
    Version(String),
    ActivityId(String),
    /// Raw (unencoded) id list.
    Ids(String),
    /// Raw (unencoded) error message.
    ErrorMessage(String),
    StartDate(String),
    EndDate(String),
    BatchOperationId(String),
    Variable(VariableFilter),
}

impl FilterChange {
    /// Dropdowns and checkboxes take effect at once; text inputs are debounced.
    pub fn is_immediate(&self) -> bool {
        matches!(
            self,
            Self::Active(_)
                | Self::Incidents(_)
                | Self::Completed(_)
                | Self::Canceled(_)
                | Self::Workflow(_)
                | Self::Version(_)
                | Self::ActivityId(_)
        )
    }

    /// Parses a `field=value` edit using the wire field names. Variables are
    /// written as `variable=<name>=<value>`.
    pub fn parse(field: &str, value: &str) -> Result<Self, FilterError> {
        let flag = |value: &str| match value {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(FilterError::InvalidValue {
                field: field.to_string(),
                value: value.to_string(),
            }),
        };

        Ok(match field {
            "active" => Self::Active(flag(value)?),
            "incidents" => Self::Incidents(flag(value)?),
            "completed" => Self::Completed(flag(value)?),
            "canceled" => Self::Canceled(flag(value)?),
            "workflow" => Self::Workflow(value.to_string()),
            "version" => Self::Version(value.to_string()),
            "activityId" => Self::ActivityId(value.to_string()),
            "ids" => Self::Ids(value.to_string()),
            "errorMessage" => Self::ErrorMessage(value.to_string()),
            "startDate" => Self::StartDate(value.to_string()),
            "endDate" => Self::EndDate(value.to_string()),
            "batchOperationId" => Self::BatchOperationId(value.to_string()),
            "variable" => {
                let (name, value) = value.split_once('=').unwrap_or((value, ""));
                Self::Variable(VariableFilter::new(name, value))
            }
            other => return Err(FilterError::UnknownField(other.to_string())),
        })
    }
}

pub fn encode_field(value: &str) -> String {
    utf8_percent_encode(value, URI_COMPONENT).to_string()
}

pub fn decode_field(value: &str) -> String {
    percent_decode_str(value).decode_utf8_lossy().into_owned()
}

/// Normalizes a filter so that equal intent compares equal:
/// surrounding whitespace is trimmed from plain text fields, half-filled
/// variables are dropped, and version/activity selections that lost their
/// parent are cleared.
pub fn sanitize(filter: &Filter) -> Filter {
    let mut sanitized = filter.clone();

    sanitized.start_date = filter.start_date.trim().to_string();
    sanitized.end_date = filter.end_date.trim().to_string();
    sanitized.batch_operation_id = filter.batch_operation_id.trim().to_string();

    let name = filter.variable.name.trim();
    let value = filter.variable.value.trim();
    sanitized.variable = if name.is_empty() || value.is_empty() {
        VariableFilter::default()
    } else {
        VariableFilter::new(name, value)
    };

    if sanitized.workflow.is_empty() {
        sanitized.version.clear();
    }
    if sanitized.version.is_empty() || sanitized.version == ALL_VERSIONS {
        sanitized.activity_id.clear();
    }
    sanitized
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatePrecision {
    Day,
    Minute,
    Second,
}

impl DatePrecision {
    fn span(self) -> TimeDelta {
        match self {
            Self::Day => TimeDelta::days(1),
            Self::Minute => TimeDelta::minutes(1),
            Self::Second => TimeDelta::seconds(1),
        }
    }
}

/// Parses `yyyy-mm-dd`, `yyyy-mm-dd hh:mm` or `yyyy-mm-dd hh:mm:ss`.
pub fn parse_date(value: &str) -> Option<(NaiveDateTime, DatePrecision)> {
    let value = value.trim();
    match value.len() {
        10 => NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|date| (date, DatePrecision::Day)),
        16 => NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M")
            .ok()
            .map(|date| (date, DatePrecision::Minute)),
        19 => NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
            .ok()
            .map(|date| (date, DatePrecision::Second)),
        _ => None,
    }
}

pub fn is_date_complete(value: &str) -> bool {
    matches!(value.trim().len(), 0 | 10 | 16 | 19)
}

pub fn is_date_valid(value: &str) -> bool {
    value.trim().is_empty() || parse_date(value).is_some()
}

/// Splits an id list on whitespace and commas.
pub fn split_ids(value: &str) -> Vec<&str> {
    value
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|id| !id.is_empty())
        .collect()
}

pub fn is_id_complete(value: &str) -> bool {
    split_ids(value).iter().all(|id| id.len() >= 16)
}

pub fn is_id_valid(value: &str) -> bool {
    split_ids(value)
        .iter()
        .all(|id| id.len() <= 19 && id.chars().all(|c| c.is_ascii_digit()))
}

pub fn is_variable_name_complete(variable: &VariableFilter) -> bool {
    !(variable.name.trim().is_empty() && !variable.value.trim().is_empty())
}

pub fn is_variable_value_complete(variable: &VariableFilter) -> bool {
    !(variable.value.trim().is_empty() && !variable.name.trim().is_empty())
}

/// Variable values are matched as JSON.
pub fn is_variable_value_valid(variable: &VariableFilter) -> bool {
    variable.value.trim().is_empty()
        || serde_json::from_str::<serde_json::Value>(&variable.value).is_ok()
}

pub fn is_batch_operation_id_complete(value: &str) -> bool {
    matches!(value.trim().len(), 0 | 36)
}

pub fn is_batch_operation_id_valid(value: &str) -> bool {
    value.trim().is_empty() || Uuid::parse_str(value.trim()).is_ok()
}

/// Fields subject to completeness and validity checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidatedField {
    Ids,
    StartDate,
    EndDate,
    Variable,
    BatchOperationId,
}

/// Fields of `filter` that are incomplete or invalid.
pub fn invalid_fields(filter: &Filter) -> Vec<ValidatedField> {
    let ids = decode_field(&filter.ids);
    let mut invalid = Vec::new();
    if !(is_id_complete(&ids) && is_id_valid(&ids)) {
        invalid.push(ValidatedField::Ids);
    }
    if !(is_date_complete(&filter.start_date) && is_date_valid(&filter.start_date)) {
        invalid.push(ValidatedField::StartDate);
    }
    if !(is_date_complete(&filter.end_date) && is_date_valid(&filter.end_date)) {
        invalid.push(ValidatedField::EndDate);
    }
    let variable = &filter.variable;
    if !(is_variable_name_complete(variable)
        && is_variable_value_complete(variable)
        && is_variable_value_valid(variable))
    {
        invalid.push(ValidatedField::Variable);
    }
    if !(is_batch_operation_id_complete(&filter.batch_operation_id)
        && is_batch_operation_id_valid(&filter.batch_operation_id))
    {
        invalid.push(ValidatedField::BatchOperationId);
    }
    invalid
}

/// The latest deployed version of a workflow group, as a filter value.
pub fn last_version(group: &GroupedWorkflow) -> Option<String> {
    group
        .workflows
        .iter()
        .map(|workflow| workflow.version)
        .max()
        .map(|version| version.to_string())
}

/// State carried in the URL query string.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeepLink {
    pub filter: Option<Filter>,
    /// Workflow name shown before the workflow list is loaded.
    pub name: Option<String>,
    pub sorting: Option<Sorting>,
}

pub fn parse_query_string(query: &str) -> Result<DeepLink, FilterError> {
    let query = query.strip_prefix('?').unwrap_or(query);
    let mut link = DeepLink::default();
    let mut sort_by = None;
    let mut sort_order = None;

    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "filter" => {
                let filter = serde_json::from_str::<Filter>(&value)
                    .map_err(|err| FilterError::MalformedQuery(err.to_string()))?;
                link.filter = Some(filter);
            }
            "name" => link.name = Some(value.into_owned()),
            "sortBy" => sort_by = Some(value.into_owned()),
            "sortOrder" => {
                sort_order = Some(match value.as_ref() {
                    "asc" => SortOrder::Asc,
                    "desc" => SortOrder::Desc,
                    other => {
                        return Err(FilterError::InvalidValue {
                            field: "sortOrder".into(),
                            value: other.to_string(),
                        });
                    }
                })
            }
            _ => {}
        }
    }

    if let Some(sort_by) = sort_by {
        link.sorting = Some(Sorting {
            sort_by,
            sort_order: sort_order.unwrap_or(SortOrder::Desc),
        });
    }
    Ok(link)
}

/// Serializes the non-empty fields of `filter` (and the sorting, if given)
/// into a query string without a leading `?`.
pub fn to_query_string(filter: &Filter, sorting: Option<&Sorting>) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    if let Ok(json) = serde_json::to_string(filter) {
        serializer.append_pair("filter", &json);
    }
    if let Some(sorting) = sorting {
        serializer.append_pair("sortBy", &sorting.sort_by);
        serializer.append_pair("sortOrder", sorting.sort_order.as_str());
    }
    serializer.finish()
}

fn date_range(value: &str) -> (Option<String>, Option<String>) {
    const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f+0000";
    match parse_date(value) {
        Some((start, precision)) => {
            let end = start.checked_add_signed(precision.span());
            (
                Some(start.format(FORMAT).to_string()),
                end.map(|end| end.format(FORMAT).to_string()),
            )
        }
        None => (None, None),
    }
}

fn workflow_ids(filter: &Filter, grouped: &IndexMap<String, GroupedWorkflow>) -> Vec<String> {
    let Some(group) = grouped.get(&filter.workflow) else {
        return Vec::new();
    };
    if filter.version == ALL_VERSIONS {
        return group.workflows.iter().map(|w| w.id.clone()).collect();
    }
    group
        .workflows
        .iter()
        .filter(|w| w.version.to_string() == filter.version)
        .map(|w| w.id.clone())
        .collect()
}

/// Converts a committed filter into the query the list endpoint expects.
pub fn to_instances_query(
    filter: &Filter,
    grouped: &IndexMap<String, GroupedWorkflow>,
) -> InstancesQuery {
    let ids = decode_field(&filter.ids);
    let error_message = decode_field(&filter.error_message);
    let (start_date_after, start_date_before) = date_range(&filter.start_date);
    let (end_date_after, end_date_before) = date_range(&filter.end_date);

    InstancesQuery {
        running: filter.active || filter.incidents,
        active: filter.active,
        incidents: filter.incidents,
        finished: filter.completed || filter.canceled,
        completed: filter.completed,
        canceled: filter.canceled,
        ids: split_ids(&ids).into_iter().map(str::to_string).collect(),
        error_message: (!error_message.is_empty()).then_some(error_message),
        start_date_after,
        start_date_before,
        end_date_after,
        end_date_before,
        workflow_ids: workflow_ids(filter, grouped),
        activity_id: (!filter.activity_id.is_empty()).then(|| filter.activity_id.clone()),
        variable: (!filter.variable.is_empty()).then(|| VariableQuery {
            name: filter.variable.name.clone(),
            value: filter.variable.value.clone(),
        }),
        batch_operation_id: (!filter.batch_operation_id.is_empty())
            .then(|| filter.batch_operation_id.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use operate_protocol::WorkflowVersion;
    use proptest::prelude::*;

    fn grouped() -> IndexMap<String, GroupedWorkflow> {
        let group = GroupedWorkflow {
            bpmn_process_id: "order".into(),
            name: Some("Order process".into()),
            workflows: vec![
                WorkflowVersion {
                    id: "100".into(),
                    name: None,
                    version: 1,
                    bpmn_process_id: "order".into(),
                },
                WorkflowVersion {
                    id: "200".into(),
                    name: None,
                    version: 2,
                    bpmn_process_id: "order".into(),
                },
            ],
        };
        IndexMap::from([("order".to_string(), group)])
    }

    fn arb_filter() -> impl Strategy<Value = Filter> {
        let text = "[ a-z0-9:,-]{0,12}";
        (
            any::<[bool; 4]>(),
            (text, text, text, text),
            (text, text, text, text),
            (text, text),
        )
            .prop_map(
                |(
                    flags,
                    (ids, error_message, start_date, end_date),
                    (activity_id, version, workflow, batch),
                    (name, value),
                )| Filter {
                    active: flags[0],
                    incidents: flags[1],
                    completed: flags[2],
                    canceled: flags[3],
                    ids,
                    error_message,
                    start_date,
                    end_date,
                    activity_id,
                    version,
                    workflow,
                    variable: VariableFilter { name, value },
                    batch_operation_id: batch,
                },
            )
    }

    proptest! {
        #[test]
        fn sanitize_is_idempotent(filter in arb_filter()) {
            let once = sanitize(&filter);
            prop_assert_eq!(sanitize(&once), once);
        }

        #[test]
        fn decode_inverts_encode(value in any::<String>()) {
            prop_assert_eq!(decode_field(&encode_field(&value)), value);
        }
    }

    #[test]
    fn encoding_matches_uri_component_alphabet() {
        assert_eq!(encode_field("a b/c%"), "a%20b%2Fc%25");
        assert_eq!(encode_field("it's(ok)!*~._-"), "it's(ok)!*~._-");
        assert_eq!(decode_field("%C3%A4rger"), "ärger");
    }

    #[test]
    fn sanitize_drops_half_filled_variable_and_orphans() {
        let filter = Filter {
            version: "2".into(),
            activity_id: "taskA".into(),
            start_date: " 2023-01-01 ".into(),
            variable: VariableFilter::new("amount", ""),
            ..Filter::default()
        };
        let sanitized = sanitize(&filter);
        assert_eq!(sanitized.version, "");
        assert_eq!(sanitized.activity_id, "");
        assert_eq!(sanitized.start_date, "2023-01-01");
        assert!(sanitized.variable.is_empty());

        let all_versions = Filter {
            workflow: "order".into(),
            version: ALL_VERSIONS.into(),
            activity_id: "taskA".into(),
            ..Filter::default()
        };
        assert_eq!(sanitize(&all_versions).activity_id, "");
    }

    #[test]
    fn dates_are_checked_for_completeness_and_validity() {
        assert!(is_date_complete(""));
        assert!(!is_date_complete("2023-01"));
        assert!(is_date_complete("2023-01-01 10:00"));
        assert!(is_date_valid("2023-01-02 00:00:00"));
        assert!(!is_date_valid("2023-13-02 00:00:00"));
        assert_eq!(
            parse_date("2023-01-02").map(|(_, precision)| precision),
            Some(DatePrecision::Day)
        );
    }

    #[test]
    fn ids_accept_whitespace_and_comma_separators() {
        let ids = "2251799813685251, 2251799813685252\n2251799813685253";
        assert_eq!(split_ids(ids).len(), 3);
        assert!(is_id_complete(ids));
        assert!(is_id_valid(ids));
        assert!(!is_id_complete("22517998"));
        assert!(!is_id_valid("2251799813685251x"));
        assert!(!is_id_valid("22517998136852511234"));
    }

    #[test]
    fn variable_and_batch_operation_checks() {
        assert!(!is_variable_value_complete(&VariableFilter::new("a", "")));
        assert!(!is_variable_name_complete(&VariableFilter::new("", "1")));
        assert!(is_variable_value_valid(&VariableFilter::new("a", "{\"x\":1}")));
        assert!(!is_variable_value_valid(&VariableFilter::new("a", "{x")));

        let id = "8ba1a1f5-a3f3-4bba-9d79-5f3b8fae0c62";
        assert!(is_batch_operation_id_complete(id));
        assert!(is_batch_operation_id_valid(id));
        assert!(!is_batch_operation_id_valid("8ba1a1f5-a3f3-4bba-9d79-5f3b8fae0cZZ"));
    }

    #[test]
    fn invalid_fields_are_reported_individually() {
        let filter = Filter {
            ids: encode_field("123"),
            start_date: "2023-01-01 00:00:00".into(),
            end_date: "2023-99-01".into(),
            ..Filter::default()
        };
        assert_eq!(
            invalid_fields(&filter),
            vec![ValidatedField::Ids, ValidatedField::EndDate]
        );
    }

    #[test]
    fn change_parsing_uses_wire_names() {
        assert_eq!(
            FilterChange::parse("startDate", "2023-01-01").unwrap(),
            FilterChange::StartDate("2023-01-01".into())
        );
        assert_eq!(
            FilterChange::parse("variable", "amount=10").unwrap(),
            FilterChange::Variable(VariableFilter::new("amount", "10"))
        );
        assert!(FilterChange::parse("active", "yes").unwrap().is_immediate());
        assert!(!FilterChange::parse("ids", "1").unwrap().is_immediate());
        assert_eq!(
            FilterChange::parse("colour", "red"),
            Err(FilterError::UnknownField("colour".into()))
        );
        assert!(matches!(
            FilterChange::parse("canceled", "maybe"),
            Err(FilterError::InvalidValue { .. })
        ));
    }

    #[test]
    fn query_string_round_trips_filter_and_sorting() {
        let filter = Filter {
            active: true,
            error_message: encode_field("no retries left"),
            workflow: "order".into(),
            version: "2".into(),
            ..Filter::default()
        };
        let sorting = Sorting {
            sort_by: "startDate".into(),
            sort_order: SortOrder::Asc,
        };

        let query = to_query_string(&filter, Some(&sorting));
        let link = parse_query_string(&format!("?{query}&name=Order%20process")).unwrap();

        assert_eq!(link.filter, Some(filter));
        assert_eq!(link.sorting, Some(sorting));
        assert_eq!(link.name.as_deref(), Some("Order process"));
    }

    #[test]
    fn malformed_query_filter_is_rejected() {
        assert!(matches!(
            parse_query_string("filter=%7Bnot-json"),
            Err(FilterError::MalformedQuery(_))
        ));
        assert_eq!(parse_query_string("").unwrap(), DeepLink::default());
    }

    #[test]
    fn instances_query_resolves_workflow_ids_and_ranges() {
        let filter = Filter {
            active: true,
            completed: true,
            ids: encode_field("2251799813685251 2251799813685252"),
            error_message: encode_field("no retries"),
            start_date: "2023-01-02".into(),
            end_date: "2023-01-02 10:30".into(),
            workflow: "order".into(),
            version: "2".into(),
            ..Filter::default()
        };

        let query = to_instances_query(&filter, &grouped());
        assert!(query.running && query.active && !query.incidents);
        assert!(query.finished && query.completed && !query.canceled);
        assert_eq!(query.ids, vec!["2251799813685251", "2251799813685252"]);
        assert_eq!(query.error_message.as_deref(), Some("no retries"));
        assert_eq!(
            query.start_date_after.as_deref(),
            Some("2023-01-02T00:00:00.000+0000")
        );
        assert_eq!(
            query.start_date_before.as_deref(),
            Some("2023-01-03T00:00:00.000+0000")
        );
        assert_eq!(
            query.end_date_before.as_deref(),
            Some("2023-01-02T10:31:00.000+0000")
        );
        assert_eq!(query.workflow_ids, vec!["200"]);

        let all = Filter {
            workflow: "order".into(),
            version: ALL_VERSIONS.into(),
            ..Filter::default()
        };
        assert_eq!(to_instances_query(&all, &grouped()).workflow_ids, vec!["100", "200"]);
        assert_eq!(last_version(&grouped()["order"]).as_deref(), Some("2"));
    }
}
