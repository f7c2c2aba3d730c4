//! # Snapshot Parser — objects.cache and status.dat
//!
//! Turns the two flat files into a [`Snapshot`]: per object kind, an ordered
//! table of records keyed by identifier.
//!
//! objects.cache:
//! ```text
//! define host {
//! 	host_name	web01
//! 	address	10.0.0.1
//! 	}
//! ```
//!
//! status.dat:
//! ```text
//! hoststatus {
//! 	host_name=web01
//! 	current_state=0
//! 	}
//! ```
//!
//! Group definitions are folded into their members as a `group` list, other
//! host-/service-prefixed definitions (escalations, dependencies) into a
//! list named after the prefix-less kind. Runtime blocks attach to their
//! object: `*status` as a nested `status` record, everything else
//! (`hostcomment`, `servicedowntime`, ...) as a list.

use std::collections::{BTreeMap, HashSet};
use std::io::{BufRead, Lines};

use serde_json::{Map, Value};
use tracing::{debug, warn};

use sq_core::record::{render, Record};

use crate::error::{StatusdatError, StatusdatResult};

// =============================================================================
// Snapshot
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    tables: BTreeMap<String, Map<String, Value>>,
}

impl Snapshot {
    /// Records of `kind` (`host`, `service`, `hostgroup`, `comment`, ...) in
    /// definition order. Unknown kinds yield nothing.
    pub fn table<'a>(&'a self, kind: &str) -> impl Iterator<Item = &'a Record> + 'a {
        self.tables
            .get(kind)
            .into_iter()
            .flat_map(|t| t.values())
            .filter_map(Value::as_object)
    }

    pub fn object(&self, kind: &str, name: &str) -> Option<&Record> {
        self.tables.get(kind)?.get(name)?.as_object()
    }

    pub fn len(&self, kind: &str) -> usize {
        self.tables.get(kind).map_or(0, Map::len)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    fn has_kind(&self, kind: &str) -> bool {
        self.tables.contains_key(kind)
    }

    fn object_mut(&mut self, kind: &str, name: &str) -> Option<&mut Record> {
        self.tables.get_mut(kind)?.get_mut(name)?.as_object_mut()
    }

    fn insert(&mut self, kind: &str, name: String, record: Record) {
        self.tables
            .entry(kind.to_string())
            .or_default()
            .insert(name, Value::Object(record));
    }

    /// Give every service a `host` field holding its host record.
    pub fn link_services(&mut self) {
        let Some(hosts) = self.tables.get("host").cloned() else {
            return;
        };
        let Some(services) = self.tables.get_mut("service") else {
            return;
        };
        for service in services.values_mut().filter_map(Value::as_object_mut) {
            let host = service
                .get("host_name")
                .and_then(Value::as_str)
                .and_then(|name| hosts.get(name))
                .cloned();
            if let Some(host) = host {
                service.insert("host".to_string(), host);
            }
        }
    }
}

/// Identifier an object is registered under: `host;description` for
/// services, `<kind>_name` for everything else.
pub fn identifier(kind: &str, record: &Record) -> Option<String> {
    if kind == "service" {
        let host = record.get("host_name")?.as_str()?;
        let description = record.get("service_description")?.as_str()?;
        return Some(format!("{};{}", host, description));
    }
    record
        .get(&format!("{}_name", kind))?
        .as_str()
        .map(str::to_string)
}

// =============================================================================
// Line reading
// =============================================================================

struct LineReader<R> {
    lines: Lines<R>,
    number: usize,
}

impl<R: BufRead> LineReader<R> {
    fn new(source: R) -> Self {
        Self {
            lines: source.lines(),
            number: 0,
        }
    }

    fn next_line(&mut self) -> StatusdatResult<Option<String>> {
        match self.lines.next() {
            Some(line) => {
                self.number += 1;
                Ok(Some(line?))
            }
            None => Ok(None),
        }
    }

    /// Read `key/value` lines up to the closing `}`.
    fn read_block(&mut self, kind: &str, split: fn(&str) -> (&str, &str)) -> StatusdatResult<Record> {
        let mut record = Record::new();
        while let Some(line) = self.next_line()? {
            let line = line.trim();
            if line == "}" {
                return Ok(record);
            }
            if line.is_empty() {
                continue;
            }
            let (key, value) = split(line);
            record.insert(key.trim().to_string(), Value::String(value.trim().to_string()));
        }
        Err(StatusdatError::parse(
            self.number,
            format!("unexpected end of file inside '{}' block", kind),
        ))
    }
}

fn split_object_line(line: &str) -> (&str, &str) {
    line.split_once('\t')
        .or_else(|| line.split_once(char::is_whitespace))
        .unwrap_or((line, ""))
}

fn split_status_line(line: &str) -> (&str, &str) {
    line.split_once('=').unwrap_or((line, ""))
}

fn is_skippable(line: &str) -> bool {
    line.is_empty() || line.starts_with('#')
}

// =============================================================================
// objects.cache
// =============================================================================

/// Parse an objects.cache file into a snapshot without runtime state.
pub fn parse_objects<R: BufRead>(source: R) -> StatusdatResult<Snapshot> {
    let mut lines = LineReader::new(source);
    let mut snapshot = Snapshot::default();
    let mut attachments: Vec<(String, Record)> = Vec::new();

    while let Some(line) = lines.next_line()? {
        let line = line.trim();
        if is_skippable(line) {
            continue;
        }
        let kind = line
            .strip_prefix("define")
            .and_then(|rest| rest.trim_end().strip_suffix('{'))
            .map(str::trim)
            .filter(|kind| !kind.is_empty())
            .ok_or_else(|| {
                StatusdatError::parse(lines.number, format!("expected 'define <type> {{', got '{}'", line))
            })?
            .to_string();

        let record = lines.read_block(&kind, split_object_line)?;
        if let Some(name) = identifier(&kind, &record) {
            snapshot.insert(&kind, name, record.clone());
        }
        if owner_of(&kind).is_some() {
            attachments.push((kind, record));
        }
    }

    // Definitions may precede the hosts/services they refer to, so
    // attachment waits until every object is known.
    for (kind, record) in attachments {
        attach_definition(&mut snapshot, &kind, record);
    }

    debug!(
        hosts = snapshot.len("host"),
        services = snapshot.len("service"),
        "parsed objects"
    );
    Ok(snapshot)
}

/// `hostgroup` → (`host`, `group`), `serviceescalation` → (`service`,
/// `escalation`). Plain hosts and services have no owner.
fn owner_of(kind: &str) -> Option<(&'static str, &str)> {
    let (owner, property) = if let Some(rest) = kind.strip_prefix("service") {
        ("service", rest)
    } else if let Some(rest) = kind.strip_prefix("host") {
        ("host", rest)
    } else {
        return None;
    };
    (!property.is_empty()).then_some((owner, property))
}

fn attach_definition(snapshot: &mut Snapshot, kind: &str, record: Record) {
    let Some((owner, property)) = owner_of(kind) else {
        return;
    };

    if property.contains("group") {
        let Some(group_name) = identifier(kind, &record) else {
            warn!(kind, "group definition without a name");
            return;
        };
        let members = record.get("members").and_then(Value::as_str).unwrap_or("");
        for member in group_members(owner, members) {
            match snapshot.object_mut(owner, &member) {
                Some(target) => push_to_list(target, property, Value::String(group_name.clone())),
                None => debug!(group = %group_name, member = %member, "group member not defined"),
            }
        }
        return;
    }

    let Some(target_name) = identifier(owner, &record) else {
        return;
    };
    match snapshot.object_mut(owner, &target_name) {
        Some(target) => push_to_list(target, property, Value::Object(record)),
        None => debug!(kind, target = %target_name, "definition refers to unknown object"),
    }
}

/// Host groups list host names; service groups list `host,service` pairs.
fn group_members(owner: &str, members: &str) -> Vec<String> {
    let names: Vec<&str> = members
        .split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .collect();
    if owner == "service" {
        names
            .chunks_exact(2)
            .map(|pair| format!("{};{}", pair[0], pair[1]))
            .collect()
    } else {
        names.into_iter().map(str::to_string).collect()
    }
}

fn push_to_list(record: &mut Record, property: &str, value: Value) {
    let slot = record
        .entry(property.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    match slot {
        Value::Array(items) => items.push(value),
        other => *other = Value::Array(vec![value]),
    }
}

// =============================================================================
// status.dat
// =============================================================================

/// Apply a status.dat file to `snapshot`.
///
/// Runtime lists (`comment`, `downtime`, ...) from an earlier application
/// are replaced, not extended. Comments and downtimes are also collected as
/// top-level `comment`/`downtime` tables.
pub fn apply_status<R: BufRead>(snapshot: &mut Snapshot, source: R) -> StatusdatResult<()> {
    let mut lines = LineReader::new(source);
    let mut replaced: HashSet<(&'static str, String, String)> = HashSet::new();
    let mut runtime_objects = 0usize;

    snapshot.tables.insert("comment".to_string(), Map::new());
    snapshot.tables.insert("downtime".to_string(), Map::new());

    while let Some(line) = lines.next_line()? {
        let line = line.trim();
        if is_skippable(line) {
            continue;
        }
        let kind = line
            .strip_suffix('{')
            .map(str::trim)
            .filter(|kind| !kind.is_empty())
            .ok_or_else(|| {
                StatusdatError::parse(lines.number, format!("expected '<type> {{', got '{}'", line))
            })?
            .to_string();

        let record = lines.read_block(&kind, split_status_line)?;
        let owner = if kind.contains("service") {
            "service"
        } else if kind.contains("host") {
            "host"
        } else {
            // info, programstatus, contactstatus, ...
            continue;
        };
        let property = kind.replacen(owner, "", 1);

        if !snapshot.has_kind(owner) {
            return Err(StatusdatError::parse(
                lines.number,
                format!("no {} objects registered in objects.cache", owner),
            ));
        }
        let name = identifier(owner, &record).ok_or_else(|| {
            StatusdatError::parse(lines.number, format!("'{}' block without identifying fields", kind))
        })?;
        let Some(target) = snapshot.object_mut(owner, &name) else {
            return Err(StatusdatError::parse(
                lines.number,
                format!("unknown {} '{}'", owner, name),
            ));
        };

        runtime_objects += 1;
        if property == "status" {
            target.insert("status".to_string(), Value::Object(record));
            continue;
        }

        if replaced.insert((owner, name.clone(), property.clone())) {
            target.insert(property.clone(), Value::Array(Vec::new()));
        }
        push_to_list(target, &property, Value::Object(record.clone()));

        if property == "comment" || property == "downtime" {
            let mut entry = record;
            let key = entry
                .get(&format!("{}_id", property))
                .map(render)
                .unwrap_or_else(|| format!("{}#{}", name, snapshot.len(&property)));
            entry.insert("object_type".to_string(), Value::String(owner.to_string()));
            snapshot.insert(&property, key, entry);
        }
    }

    debug!(runtime_objects, "applied status");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const OBJECTS: &str = "\
# generated
define host {
\thost_name\tweb01
\taddress\t10.0.0.1
\t}

define host {
\thost_name\tdb01
\taddress\t10.0.0.2
\t}

define service {
\thost_name\tweb01
\tservice_description\tHTTP
\t}

define hostgroup {
\thostgroup_name\tlinux
\tmembers\tweb01,db01
\t}

define servicegroup {
\tservicegroup_name\tweb
\tmembers\tweb01,HTTP
\t}

define hostescalation {
\thost_name\tdb01
\tfirst_notification\t2
\t}

define command {
\tcommand_name\tcheck_ping
\t}
";

    const STATUS: &str = "\
info {
\tversion=1.11
\t}

hoststatus {
\thost_name=web01
\tcurrent_state=0
\t}

hoststatus {
\thost_name=db01
\tcurrent_state=1
\t}

servicestatus {
\thost_name=web01
\tservice_description=HTTP
\tcurrent_state=2
\tplugin_output=connection refused
\t}

servicedowntime {
\thost_name=web01
\tservice_description=HTTP
\tdowntime_id=7
\t}
";

    fn snapshot() -> Snapshot {
        let mut s = parse_objects(OBJECTS.as_bytes()).unwrap();
        apply_status(&mut s, STATUS.as_bytes()).unwrap();
        s.link_services();
        s
    }

    #[test]
    fn test_objects_are_registered_by_identifier() {
        let s = parse_objects(OBJECTS.as_bytes()).unwrap();
        assert_eq!(s.len("host"), 2);
        assert_eq!(s.object("host", "web01").unwrap()["address"], json!("10.0.0.1"));
        assert!(s.object("service", "web01;HTTP").is_some());
        assert!(s.object("command", "check_ping").is_some());
    }

    #[test]
    fn test_groups_attach_to_members() {
        let s = parse_objects(OBJECTS.as_bytes()).unwrap();
        assert_eq!(s.object("host", "db01").unwrap()["group"], json!(["linux"]));
        assert_eq!(s.object("service", "web01;HTTP").unwrap()["group"], json!(["web"]));
        assert_eq!(s.len("hostgroup"), 1);
    }

    #[test]
    fn test_other_definitions_attach_as_list() {
        let s = parse_objects(OBJECTS.as_bytes()).unwrap();
        let escalations = &s.object("host", "db01").unwrap()["escalation"];
        assert_eq!(escalations[0]["first_notification"], json!("2"));
    }

    #[test]
    fn test_status_nests_runtime_state() {
        let s = snapshot();
        assert_eq!(
            s.object("host", "db01").unwrap()["status"]["current_state"],
            json!("1")
        );
        let http = s.object("service", "web01;HTTP").unwrap();
        assert_eq!(http["status"]["plugin_output"], json!("connection refused"));
        assert_eq!(http["downtime"][0]["downtime_id"], json!("7"));
    }

    #[test]
    fn test_downtimes_collected_top_level() {
        let s = snapshot();
        let downtime = s.object("downtime", "7").unwrap();
        assert_eq!(downtime["object_type"], json!("service"));
        assert_eq!(s.len("comment"), 0);
    }

    #[test]
    fn test_services_link_to_host() {
        let s = snapshot();
        let http = s.object("service", "web01;HTTP").unwrap();
        assert_eq!(http["host"]["status"]["current_state"], json!("0"));
        assert_eq!(http["host"]["group"], json!(["linux"]));
    }

    #[test]
    fn test_reapplying_status_replaces_lists() {
        let mut s = parse_objects(OBJECTS.as_bytes()).unwrap();
        apply_status(&mut s, STATUS.as_bytes()).unwrap();
        apply_status(&mut s, STATUS.as_bytes()).unwrap();
        let http = s.object("service", "web01;HTTP").unwrap();
        assert_eq!(http["downtime"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_unexpected_eof_reports_line() {
        let err = parse_objects("define host {\n\thost_name\tx\n".as_bytes()).unwrap_err();
        match err {
            StatusdatError::Parse { line, message } => {
                assert_eq!(line, 2);
                assert!(message.contains("end of file"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_garbage_header_is_error() {
        assert!(parse_objects("host {\n}\n".as_bytes()).is_err());
    }

    #[test]
    fn test_status_for_unknown_object_is_error() {
        let mut s = parse_objects(OBJECTS.as_bytes()).unwrap();
        let err = apply_status(&mut s, "hoststatus {\nhost_name=ghost\n}\n".as_bytes()).unwrap_err();
        assert!(matches!(err, StatusdatError::Parse { line: 3, .. }));
    }

    #[test]
    fn test_status_without_objects_is_error() {
        let mut s = Snapshot::default();
        assert!(apply_status(&mut s, "hoststatus {\nhost_name=web01\n}\n".as_bytes()).is_err());
    }

    #[test]
    fn test_group_members_pairs_for_services() {
        assert_eq!(group_members("service", "a,s1,b,s2,c"), vec!["a;s1", "b;s2"]);
        assert_eq!(group_members("host", "a, b,,c"), vec!["a", "b", "c"]);
    }
}
