//! # Monitoring Queries — Named Filters over status.dat
//!
//! Callers filter by semantic names (`problems=1`, `hostgroups=linux`,
//! `search=http`) instead of expressions. Each name resolves through the
//! [`NamedFilter`] table to an expression and its parameters; a name the
//! table does not know becomes a plain equality on the field of that name.
//! Filters are AND-ed in the order they are applied.

use std::str::FromStr;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use sq_core::datasource::pairs;
use sq_core::filter::is_truthy;
use sq_core::{Column, Record, SortDirection};

use crate::error::StatusdatResult;
use crate::expression::Params;
use crate::reader::{Reader, ReaderQuery};
use crate::summary;

// =============================================================================
// Named filters
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamedFilter {
    /// Non-OK and not in downtime (or the opposite when falsy).
    Problems,
    /// Substring of host name, service description or plugin output.
    Search,
    Hostgroups,
    Servicegroups,
    /// Acknowledgement state.
    Handled,
    Hostname,
    State,
    Hoststate,
    ServiceDescription,
}

const NAMED_FILTERS: &[(&str, NamedFilter)] = &[
    ("problems", NamedFilter::Problems),
    ("search", NamedFilter::Search),
    ("hostgroups", NamedFilter::Hostgroups),
    ("servicegroups", NamedFilter::Servicegroups),
    ("handled", NamedFilter::Handled),
    ("hostname", NamedFilter::Hostname),
    ("state", NamedFilter::State),
    ("hoststate", NamedFilter::Hoststate),
    ("service_description", NamedFilter::ServiceDescription),
];

impl FromStr for NamedFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NAMED_FILTERS
            .iter()
            .find(|(name, _)| *name == s)
            .map(|(_, filter)| *filter)
            .ok_or_else(|| s.to_string())
    }
}

impl NamedFilter {
    pub fn name(self) -> &'static str {
        NAMED_FILTERS
            .iter()
            .find(|(_, filter)| *filter == self)
            .map(|(name, _)| *name)
            .unwrap_or("")
    }

    pub fn all() -> impl Iterator<Item = NamedFilter> {
        NAMED_FILTERS.iter().map(|(_, filter)| *filter)
    }

    /// Expression and parameters selecting `value` on `target`.
    ///
    /// `None` when the value leaves nothing to filter on (an empty list).
    pub fn predicate(self, value: &Value, target: &str) -> Option<(String, Vec<Value>)> {
        let on_hosts = target == "hosts";
        let predicate = match self {
            Self::Problems if is_truthy(value) => (
                "status.current_state >= ? AND COUNT{downtime} = ?".to_string(),
                vec![Value::from(1), Value::from(0)],
            ),
            Self::Problems => (
                "status.current_state < ? OR COUNT{downtime} > ?".to_string(),
                vec![Value::from(1), Value::from(0)],
            ),
            Self::Search => {
                let text = Value::String(format!("%{}%", sq_core::record::render(value)));
                (
                    "host_name LIKE ? OR service_description LIKE ? OR status.plugin_output LIKE ?"
                        .to_string(),
                    vec![text.clone(), text.clone(), text],
                )
            }
            Self::Hostgroups => {
                let field = if on_hosts { "group" } else { "host.group" };
                (format!("{} IN ?", field), vec![as_list(value)])
            }
            Self::Servicegroups => ("group IN ?".to_string(), vec![as_list(value)]),
            Self::Handled => (
                "status.problem_has_been_acknowledged = ?".to_string(),
                vec![value.clone()],
            ),
            Self::Hostname => any_like("host_name", value)?,
            Self::ServiceDescription => any_like("service_description", value)?,
            Self::State => ("status.current_state = ?".to_string(), vec![value.clone()]),
            Self::Hoststate => {
                let field = if on_hosts {
                    "status.current_state"
                } else {
                    "host.status.current_state"
                };
                (format!("{} = ?", field), vec![value.clone()])
            }
        };
        Some(predicate)
    }
}

/// Equality on the field called `name`; a list means "any of".
pub fn generic_predicate(name: &str, value: &Value) -> (String, Vec<Value>) {
    match value {
        Value::Array(_) => (format!("{} IN ?", name), vec![value.clone()]),
        other => (format!("{} = ?", name), vec![other.clone()]),
    }
}

fn as_list(value: &Value) -> Value {
    match value {
        Value::Array(_) => value.clone(),
        other => Value::Array(vec![other.clone()]),
    }
}

/// `field LIKE ?`, OR-ed over every pattern of a list value.
fn any_like(field: &str, value: &Value) -> Option<(String, Vec<Value>)> {
    let patterns = match value {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    };
    if patterns.is_empty() {
        return None;
    }
    let expression = vec![format!("{} LIKE ?", field); patterns.len()].join(" OR ");
    Some((expression, patterns))
}

// =============================================================================
// Order columns
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderColumn {
    ServiceState,
    StateChange,
    HostState,
    HostName,
    ServiceName,
}

impl FromStr for OrderColumn {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "service_state" => Ok(Self::ServiceState),
            "state_change" => Ok(Self::StateChange),
            "host_state" => Ok(Self::HostState),
            "host_name" => Ok(Self::HostName),
            "service_name" => Ok(Self::ServiceName),
            _ => Err(s.to_string()),
        }
    }
}

impl OrderColumn {
    /// The object field this order reads on `target`.
    pub fn field(self, target: &str) -> &'static str {
        match self {
            Self::ServiceState => "status.current_state",
            Self::StateChange => "status.last_state_change",
            Self::HostState if target == "hosts" => "status.current_state",
            Self::HostState => "host.status.current_state",
            Self::HostName => "host_name",
            Self::ServiceName => "service_description",
        }
    }
}

// =============================================================================
// MonitoringQuery
// =============================================================================

pub struct MonitoringQuery<'r> {
    query: ReaderQuery<'r>,
}

impl<'r> MonitoringQuery<'r> {
    pub fn new(reader: &'r Reader, target: &str) -> StatusdatResult<Self> {
        let mut query = reader.query();
        query.from(target, Vec::<Column>::new())?;
        Ok(Self { query })
    }

    /// State counts over the matching hosts; see [`summary::status_summary`].
    pub fn status_summary(reader: &'r Reader) -> StatusdatResult<Self> {
        Ok(Self {
            query: summary::status_summary(reader)?,
        })
    }

    /// Per-group state counts for `hostgroups` or `servicegroups`.
    pub fn group_summary(reader: &'r Reader, target: &str) -> StatusdatResult<Self> {
        Ok(Self {
            query: summary::group_summary(reader, target)?,
        })
    }

    pub fn target(&self) -> &str {
        self.query.target()
    }

    /// Restrict the returned fields.
    pub fn columns<I, C>(&mut self, columns: I) -> StatusdatResult<&mut Self>
    where
        I: IntoIterator<Item = C>,
        C: Into<Column>,
    {
        let target = self.query.target().to_string();
        self.query.from(&target, columns)?;
        Ok(self)
    }

    /// Apply `(name, value)` filters in order.
    pub fn apply_filters<I, K, V>(&mut self, filters: I) -> StatusdatResult<&mut Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        for (name, value) in filters {
            self.apply_filter(name.as_ref(), &value.into())?;
        }
        Ok(self)
    }

    pub fn apply_filter(&mut self, name: &str, value: &Value) -> StatusdatResult<&mut Self> {
        let target = self.query.target().to_string();
        let predicate = match name.parse::<NamedFilter>() {
            Ok(filter) => filter.predicate(value, &target),
            Err(_) => Some(generic_predicate(name, value)),
        };
        match predicate {
            Some((expression, params)) => {
                debug!(name, %expression, "applying filter");
                self.query.where_expr(&expression, params)?;
            }
            None => debug!(name, "filter value selects nothing to filter on"),
        }
        Ok(self)
    }

    /// AND a raw expression.
    pub fn where_expr(&mut self, expression: &str, params: impl Into<Params>) -> StatusdatResult<&mut Self> {
        self.query.where_expr(expression, params)?;
        Ok(self)
    }

    /// Sort by a semantic column (`service_state`, `host_name`, ...) or a
    /// computed one (`cnt_services_critical`, ...). Unknown names are
    /// ignored.
    pub fn order(&mut self, column: &str, direction: SortDirection) -> &mut Self {
        match column.parse::<OrderColumn>() {
            Ok(order) => {
                let field = order.field(self.query.target());
                self.query.order(field, direction);
            }
            Err(_) if self.query.has_computed(column) => {
                self.query.order(column, direction);
            }
            Err(_) => warn!(column, "Tried to sort by unknown column"),
        }
        self
    }

    pub fn limit(&mut self, count: Option<usize>, offset: usize) -> &mut Self {
        self.query.limit(count, offset);
        self
    }

    pub fn reader_query(&self) -> &ReaderQuery<'r> {
        &self.query
    }

    pub fn fetch_all(&self) -> Vec<Record> {
        self.query.get_result()
    }

    pub fn fetch_row(&self) -> Option<Record> {
        self.fetch_all().into_iter().next()
    }

    pub fn fetch_one(&self) -> Option<Value> {
        self.fetch_row()?.into_iter().next().map(|(_, v)| v)
    }

    pub fn fetch_pairs(&self) -> Map<String, Value> {
        pairs(&self.fetch_all())
    }

    /// Matches ignoring `limit`.
    pub fn count(&self) -> usize {
        self.query.count()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use sq_core::record::render;

    fn reader() -> Reader {
        Reader::from_sources(
            include_str!("../tests/fixtures/objects.cache").as_bytes(),
            include_str!("../tests/fixtures/status.dat").as_bytes(),
        )
        .unwrap()
    }

    fn services(reader: &Reader, name: &str, value: Value) -> Vec<String> {
        let mut q = MonitoringQuery::new(reader, "services").unwrap();
        q.apply_filter(name, &value).unwrap();
        q.fetch_all()
            .iter()
            .map(|r| render(&r["service_description"]))
            .collect()
    }

    #[test]
    fn test_problems_excludes_ok_and_downtimes() {
        let reader = reader();
        assert_eq!(services(&reader, "problems", json!(1)), vec!["HTTP", "Disk", "SMTP"]);
        assert_eq!(services(&reader, "problems", json!("0")), vec!["SSH", "MySQL"]);
    }

    #[test]
    fn test_search_matches_any_text_field() {
        let reader = reader();
        assert_eq!(services(&reader, "search", json!("http")), vec!["HTTP"]);
        assert_eq!(services(&reader, "search", json!("mysql")), vec!["MySQL"]);
        assert_eq!(services(&reader, "search", json!("mail")), vec!["SMTP"]);
    }

    #[test]
    fn test_group_filters() {
        let reader = reader();
        assert_eq!(
            services(&reader, "hostgroups", json!("linux")),
            vec!["HTTP", "SSH", "MySQL", "Disk"]
        );
        assert_eq!(services(&reader, "servicegroups", json!(["web"])), vec!["HTTP", "SSH"]);
    }

    #[test]
    fn test_state_filters() {
        let reader = reader();
        assert_eq!(services(&reader, "handled", json!(1)), vec!["Disk"]);
        assert_eq!(services(&reader, "state", json!(2)), vec!["HTTP", "MySQL"]);
        assert_eq!(services(&reader, "hoststate", json!("1")), vec!["MySQL", "Disk"]);
    }

    #[test]
    fn test_name_filters_accept_lists() {
        let reader = reader();
        assert_eq!(services(&reader, "hostname", json!("web%")), vec!["HTTP", "SSH"]);
        assert_eq!(
            services(&reader, "hostname", json!(["web01", "mail01"])),
            vec!["HTTP", "SSH", "SMTP"]
        );
        assert_eq!(services(&reader, "service_description", json!("S%")), vec!["SSH", "SMTP"]);
        assert_eq!(services(&reader, "hostname", json!([])).len(), 5);
    }

    #[test]
    fn test_unknown_name_is_plain_equality() {
        let reader = reader();
        assert_eq!(services(&reader, "check_command", json!("check_http")), vec!["HTTP"]);
        assert_eq!(services(&reader, "host_name", json!(["db01"])), vec!["MySQL", "Disk"]);
    }

    #[test]
    fn test_host_target_adapts_fields() {
        let reader = reader();
        let mut q = MonitoringQuery::new(&reader, "hosts").unwrap();
        q.apply_filters([("hostgroups", json!("linux")), ("hoststate", json!(1))])
            .unwrap();
        q.columns(["host_name"]).unwrap();
        assert_eq!(q.fetch_one(), Some(json!("db01")));
        assert_eq!(q.count(), 1);
    }

    #[test]
    fn test_filters_are_anded_in_order() {
        let reader = reader();
        let mut q = MonitoringQuery::new(&reader, "services").unwrap();
        q.apply_filters([("problems", json!(1)), ("hostname", json!("web01"))])
            .unwrap();
        assert_eq!(q.count(), 1);
    }

    #[test]
    fn test_order_by_semantic_column() {
        let reader = reader();
        let mut q = MonitoringQuery::new(&reader, "services").unwrap();
        q.columns(["service_description", "status.current_state"]).unwrap();
        q.order("service_state", SortDirection::Desc);
        let pairs = q.fetch_pairs();
        assert_eq!(
            pairs.keys().cloned().collect::<Vec<_>>(),
            vec!["SMTP", "HTTP", "MySQL", "Disk", "SSH"]
        );
        assert_eq!(pairs["SMTP"], json!("3"));
    }

    #[test]
    fn test_unknown_order_is_ignored() {
        let reader = reader();
        let mut q = MonitoringQuery::new(&reader, "services").unwrap();
        q.order("bogus", SortDirection::Asc).limit(Some(1), 0);
        assert_eq!(q.fetch_row().unwrap()["service_description"], json!("HTTP"));
        assert_eq!(q.count(), 5);
    }

    #[test]
    fn test_group_summary_orders_by_count() {
        let reader = reader();
        let mut q = MonitoringQuery::group_summary(&reader, "hostgroups").unwrap();
        q.columns(["hostgroup_name", "cnt_services_critical"]).unwrap();
        q.order("cnt_services_critical", SortDirection::Asc);
        assert_eq!(
            q.fetch_pairs(),
            json!({ "windows": 0, "linux": 2 }).as_object().cloned().unwrap()
        );
    }

    #[test]
    fn test_status_summary_with_named_filter() {
        let reader = reader();
        let mut q = MonitoringQuery::status_summary(&reader).unwrap();
        q.apply_filter("hostgroups", &json!("windows")).unwrap();
        q.columns(["hosts_up", "services_unknown_unhandled", "services_ok"])
            .unwrap();
        assert_eq!(
            q.fetch_row(),
            json!({ "hosts_up": 1, "services_unknown_unhandled": 1, "services_ok": 0 })
                .as_object()
                .cloned()
        );
        assert_eq!(q.count(), 1);
    }

    #[test]
    fn test_unknown_target_is_error() {
        let reader = reader();
        assert!(MonitoringQuery::new(&reader, "commands").is_err());
    }

    #[test]
    fn test_named_filter_table_round_trips() {
        for filter in NamedFilter::all() {
            assert_eq!(filter.name().parse::<NamedFilter>(), Ok(filter));
        }
        assert!("nope".parse::<NamedFilter>().is_err());
    }
}
