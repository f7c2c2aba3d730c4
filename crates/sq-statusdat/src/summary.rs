//! # State Summaries — Host and Service Counts
//!
//! Two read-only views built on [`ReaderQuery`]'s grouping hooks:
//!
//! - [`status_summary`]: one row counting the states of every matching
//!   host and of those hosts' services (`hosts_up`, `services_critical_unhandled`, ...)
//! - [`group_summary`]: one row per host or service group with computed
//!   `cnt_*` columns for its members
//!
//! Hosts are `up` (0), `down` (1) or `unreachable` (2); services `ok` (0),
//! `warning` (1), `critical` (2) or `unknown` (3). Objects that were never
//! checked count as `pending`. A problem is handled when it is
//! acknowledged or in scheduled downtime; in the status summary a service
//! problem on a host that is itself down or unreachable is handled too.

use std::collections::{BTreeMap, HashSet};

use serde_json::Value;

use sq_core::filter::is_truthy;
use sq_core::record::{render, Record};

use crate::error::{StatusdatError, StatusdatResult};
use crate::parser::Snapshot;
use crate::reader::{Reader, ReaderQuery};

pub const STATUS_SUMMARY_COLUMNS: &[&str] = &[
    "hosts_up",
    "hosts_unreachable_handled",
    "hosts_unreachable_unhandled",
    "hosts_down_handled",
    "hosts_down_unhandled",
    "hosts_pending",
    "services_ok",
    "services_unknown_handled",
    "services_unknown_unhandled",
    "services_critical_handled",
    "services_critical_unhandled",
    "services_warning_handled",
    "services_warning_unhandled",
    "services_pending",
];

pub const GROUP_SUMMARY_COLUMNS: &[&str] = &[
    "cnt_hosts_up",
    "cnt_hosts_unreachable",
    "cnt_hosts_unreachable_unhandled",
    "cnt_hosts_down",
    "cnt_hosts_down_unhandled",
    "cnt_hosts_pending",
    "cnt_services_ok",
    "cnt_services_unknown",
    "cnt_services_unknown_unhandled",
    "cnt_services_critical",
    "cnt_services_critical_unhandled",
    "cnt_services_warning",
    "cnt_services_warning_unhandled",
    "cnt_services_pending",
];

// =============================================================================
// Check states
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Host,
    Service,
}

impl ObjectKind {
    fn plural(self) -> &'static str {
        match self {
            Self::Host => "hosts",
            Self::Service => "services",
        }
    }

    fn state_name(self, state: i64) -> Option<&'static str> {
        match (self, state) {
            (Self::Host, 0) => Some("up"),
            (Self::Host, 1) => Some("down"),
            (Self::Host, 2) => Some("unreachable"),
            (Self::Service, 0) => Some("ok"),
            (Self::Service, 1) => Some("warning"),
            (Self::Service, 2) => Some("critical"),
            (Self::Service, 3) => Some("unknown"),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckState {
    Pending,
    /// Up or OK.
    Good(&'static str),
    Problem { state: &'static str, handled: bool },
}

/// State of `record`'s `status` block. `None` without status or for a
/// state code outside the kind's range.
pub fn check_state(kind: ObjectKind, record: &Record) -> Option<CheckState> {
    let status = record.get("status")?;
    if !flag(status, "has_been_checked") {
        return Some(CheckState::Pending);
    }
    let code = number(status, "current_state")? as i64;
    let state = kind.state_name(code)?;
    if code == 0 {
        return Some(CheckState::Good(state));
    }
    let handled = flag(status, "problem_has_been_acknowledged")
        || number(status, "scheduled_downtime_depth").is_some_and(|depth| depth > 0.0);
    Some(CheckState::Problem { state, handled })
}

fn flag(status: &Value, field: &str) -> bool {
    status.get(field).is_some_and(is_truthy)
}

fn number(status: &Value, field: &str) -> Option<f64> {
    status.get(field).map(render)?.trim().parse().ok()
}

fn host_in_trouble(host: &Record) -> bool {
    matches!(
        check_state(ObjectKind::Host, host),
        Some(CheckState::Problem { .. })
    )
}

fn name_of(record: &Record, field: &str) -> String {
    record.get(field).map(render).unwrap_or_default()
}

// =============================================================================
// Status summary
// =============================================================================

/// One row of [`STATUS_SUMMARY_COLUMNS`] over the matching hosts. Filters
/// and columns are applied to the returned query as usual.
pub fn status_summary(reader: &Reader) -> StatusdatResult<ReaderQuery<'_>> {
    let snapshot = reader.snapshot();
    let mut query = reader.query();
    query
        .from("hosts", Vec::<String>::new())?
        .group_by_fn(move |hosts| vec![status_counts(snapshot, hosts)]);
    Ok(query)
}

fn status_counts(snapshot: &Snapshot, hosts: &[&Record]) -> Record {
    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    let mut tally = |kind: ObjectKind, state: CheckState, host_trouble: bool| {
        let column = match state {
            CheckState::Pending => format!("{}_pending", kind.plural()),
            CheckState::Good(name) => format!("{}_{}", kind.plural(), name),
            CheckState::Problem { state, handled } => {
                let handled = if handled || host_trouble {
                    "handled"
                } else {
                    "unhandled"
                };
                format!("{}_{}_{}", kind.plural(), state, handled)
            }
        };
        *counts.entry(column).or_default() += 1;
    };

    let mut names: HashSet<String> = HashSet::new();
    for host in hosts {
        if let Some(state) = check_state(ObjectKind::Host, host) {
            tally(ObjectKind::Host, state, false);
        }
        names.insert(name_of(host, "host_name"));
    }
    for service in snapshot.table("service") {
        if !names.contains(&name_of(service, "host_name")) {
            continue;
        }
        let host_trouble = service
            .get("host")
            .and_then(Value::as_object)
            .is_some_and(host_in_trouble);
        if let Some(state) = check_state(ObjectKind::Service, service) {
            tally(ObjectKind::Service, state, host_trouble);
        }
    }

    row(STATUS_SUMMARY_COLUMNS, &counts)
}

fn row(columns: &[&str], counts: &BTreeMap<String, u64>) -> Record {
    columns
        .iter()
        .map(|c| (c.to_string(), Value::from(counts.get(*c).copied().unwrap_or(0))))
        .collect()
}

// =============================================================================
// Group summary
// =============================================================================

/// One row per group of `target` (`hostgroups` or `servicegroups`): the
/// group's name plus the [`GROUP_SUMMARY_COLUMNS`] counts, which also serve
/// as sort keys.
pub fn group_summary<'r>(reader: &'r Reader, target: &str) -> StatusdatResult<ReaderQuery<'r>> {
    let group_kind = match target {
        "hostgroups" => "hostgroup",
        "servicegroups" => "servicegroup",
        other => return Err(StatusdatError::UnknownTarget(other.to_string())),
    };
    let snapshot = reader.snapshot();
    let mut query = reader.query();

    for &column in GROUP_SUMMARY_COLUMNS {
        query.computed_column(column, move |group| {
            let counts = group_counts(snapshot, group_kind, group);
            Value::from(counts.get(column).copied().unwrap_or(0))
        });
    }
    let columns = std::iter::once(format!("{}_name", group_kind))
        .chain(GROUP_SUMMARY_COLUMNS.iter().map(|c| c.to_string()));
    query.from(target, columns)?;
    Ok(query)
}

/// Member state counts of one group. Hosts of a service group and services
/// of a host group count as members.
fn group_counts(snapshot: &Snapshot, group_kind: &str, group: &Record) -> BTreeMap<String, u64> {
    let name = name_of(group, &format!("{}_name", group_kind));
    let in_group = |record: &&Record| {
        record
            .get("group")
            .and_then(Value::as_array)
            .is_some_and(|groups| groups.iter().any(|g| render(g) == name))
    };

    let (hosts, services): (Vec<&Record>, Vec<&Record>) = if group_kind == "hostgroup" {
        let hosts: Vec<&Record> = snapshot.table("host").filter(in_group).collect();
        let names: HashSet<String> = hosts.iter().map(|h| name_of(h, "host_name")).collect();
        let services = snapshot
            .table("service")
            .filter(|s| names.contains(&name_of(s, "host_name")))
            .collect();
        (hosts, services)
    } else {
        let services: Vec<&Record> = snapshot.table("service").filter(in_group).collect();
        let names: HashSet<String> = services.iter().map(|s| name_of(s, "host_name")).collect();
        let hosts = snapshot
            .table("host")
            .filter(|h| names.contains(&name_of(h, "host_name")))
            .collect();
        (hosts, services)
    };

    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    let members = hosts
        .iter()
        .map(|h| (ObjectKind::Host, *h))
        .chain(services.iter().map(|s| (ObjectKind::Service, *s)));
    for (kind, member) in members {
        let Some(state) = check_state(kind, member) else {
            continue;
        };
        let prefix = format!("cnt_{}", kind.plural());
        match state {
            CheckState::Pending => *counts.entry(format!("{}_pending", prefix)).or_default() += 1,
            CheckState::Good(name) => *counts.entry(format!("{}_{}", prefix, name)).or_default() += 1,
            CheckState::Problem { state, handled } => {
                *counts.entry(format!("{}_{}", prefix, state)).or_default() += 1;
                if !handled {
                    *counts.entry(format!("{}_{}_unhandled", prefix, state)).or_default() += 1;
                }
            }
        }
    }
    counts
}
