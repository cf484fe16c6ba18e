//! Reply decoding.
//!
//! Monitor replies arrive as one flat stream of alternating field names
//! and values, with several records back to back. A `name` field marks
//! the start of each record. Node status replies (`INFO replication`)
//! are `key:value` lines and decode through [`parse_info`] and
//! [`probe_record`].

use std::collections::BTreeMap;

use crate::error::DecodeError;
use crate::types::{Address, LinkStatus, NodeRecord, Role};

/// Parsed `INFO` output, keyed by field name.
pub type InfoMap = BTreeMap<String, String>;

/// Decodes a flat field/value reply into records, in arrival order.
///
/// A trailing key without a value is ignored. Unknown fields are kept
/// on [`NodeRecord::extra`].
pub fn decode<S: AsRef<str>>(flat: &[S]) -> Result<Vec<NodeRecord>, DecodeError> {
    let mut records = Vec::new();
    let mut current: Vec<(&str, &str)> = Vec::new();

    for pair in flat.chunks_exact(2) {
        let key = pair[0].as_ref();
        let value = pair[1].as_ref();
        if key == "name" && !current.is_empty() {
            records.push(build_record(&current)?);
            current.clear();
        }
        current.push((key, value));
    }

    if !current.is_empty() {
        records.push(build_record(&current)?);
    }
    Ok(records)
}

/// Decodes a reply that must describe exactly one entity, such as
/// `SENTINEL master <name>`.
pub fn decode_one<S: AsRef<str>>(flat: &[S]) -> Result<NodeRecord, DecodeError> {
    let mut records = decode(flat)?;
    match records.len() {
        1 => Ok(records.remove(0)),
        n => Err(DecodeError::RecordCount(n)),
    }
}

fn build_record(fields: &[(&str, &str)]) -> Result<NodeRecord, DecodeError> {
    // later duplicates overwrite earlier ones
    let mut map: BTreeMap<&str, &str> = BTreeMap::new();
    for &(k, v) in fields {
        map.insert(k, v);
    }

    let name = map
        .get("name")
        .copied()
        .ok_or_else(|| DecodeError::MissingField {
            record: fields
                .first()
                .map(|(k, v)| format!("{k}={v}"))
                .unwrap_or_default(),
            field: "name",
        })?;
    let ip = map
        .get("ip")
        .copied()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| missing(name, "ip"))?;
    let port_str = map.get("port").copied().ok_or_else(|| missing(name, "port"))?;
    let port = parse_num::<u16>("port", port_str)?;
    let address = Address::new(ip, port).ok_or_else(|| missing(name, "ip"))?;

    let flags = map
        .get("flags")
        .map(|raw| split_flags(raw))
        .unwrap_or_default();

    let role = role_from_flags(&flags)
        .or_else(|| map.get("role-reported").and_then(|r| Role::from_token(r)))
        .ok_or_else(|| DecodeError::NoRole(name.to_string()))?;

    let mut record = NodeRecord::new(name, address, role);
    record.flags = flags;
    record.link_status = map
        .get("master-link-status")
        .or_else(|| map.get("master_link_status"))
        .map(|s| LinkStatus::from_token(s));

    record.last_io_age_secs = match map.get("last-ok-ping-reply") {
        Some(ms) => Some(parse_num::<u64>("last-ok-ping-reply", ms)? / 1000),
        None => match map.get("last-ping-reply") {
            Some(ms) => Some(parse_num::<u64>("last-ping-reply", ms)? / 1000),
            None => None,
        },
    };

    record.priority = optional_num(&map, &["slave-priority", "replica-priority"])?;
    record.quorum = optional_num(&map, &["quorum"])?;
    if record.quorum == Some(0) {
        return Err(DecodeError::OutOfRange {
            field: "quorum".into(),
            value: "0".into(),
        });
    }
    record.other_monitors = optional_num(&map, &["num-other-sentinels"])?;
    record.replica_count = optional_num(&map, &["num-slaves"])?;
    record.upstream = upstream(
        map.get("master-host").copied(),
        map.get("master-port").copied(),
        "master-port",
    )?;

    record.extra = fields
        .iter()
        .filter(|(k, _)| !INTERPRETED.contains(k))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    Ok(record)
}

const INTERPRETED: &[&str] = &[
    "name",
    "ip",
    "port",
    "flags",
    "master-link-status",
    "master_link_status",
    "last-ok-ping-reply",
    "last-ping-reply",
    "slave-priority",
    "replica-priority",
    "quorum",
    "num-other-sentinels",
    "num-slaves",
    "master-host",
    "master-port",
    "role-reported",
];

fn missing(record: &str, field: &'static str) -> DecodeError {
    DecodeError::MissingField {
        record: record.to_string(),
        field,
    }
}

fn parse_num<T: std::str::FromStr>(field: &str, value: &str) -> Result<T, DecodeError> {
    value.trim().parse::<T>().map_err(|_| DecodeError::NotNumeric {
        field: field.to_string(),
        value: value.to_string(),
    })
}

/// Reads the first present key from `keys` as a number.
fn optional_num<T: std::str::FromStr>(
    map: &BTreeMap<&str, &str>,
    keys: &[&str],
) -> Result<Option<T>, DecodeError> {
    for key in keys {
        if let Some(value) = map.get(key) {
            return parse_num(key, value).map(Some);
        }
    }
    Ok(None)
}

/// Monitors report `?` as the host when a replica has no known master.
fn upstream(
    host: Option<&str>,
    port: Option<&str>,
    port_key: &str,
) -> Result<Option<Address>, DecodeError> {
    let (Some(host), Some(port)) = (host, port) else {
        return Ok(None);
    };
    if host == "?" {
        return Ok(None);
    }
    let port = parse_num::<u16>(port_key, port)?;
    Ok(Address::new(host, port))
}

fn split_flags(raw: &str) -> std::collections::BTreeSet<String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn role_from_flags(flags: &std::collections::BTreeSet<String>) -> Option<Role> {
    if flags.contains("sentinel") {
        Some(Role::Monitor)
    } else if flags.contains("master") {
        Some(Role::Master)
    } else if flags.contains("slave") || flags.contains("replica") {
        Some(Role::Replica)
    } else {
        None
    }
}

/// Parses `INFO` text into a field map.
///
/// Section headers (`# Replication`) and blank lines are skipped. Both
/// CRLF and LF line endings are accepted. Lines without a colon are
/// ignored.
pub fn parse_info(text: &str) -> InfoMap {
    text.lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

/// Builds a record from a node's own replication status.
///
/// `name` and `address` come from configuration since a node does not
/// report them itself. A negative `master_last_io_seconds_ago` means the
/// link has never been up and maps to `None`.
pub fn probe_record(name: &str, address: Address, info: &InfoMap) -> Result<NodeRecord, DecodeError> {
    let role = info
        .get("role")
        .and_then(|r| Role::from_token(r))
        .ok_or_else(|| DecodeError::NoRole(name.to_string()))?;

    let mut record = NodeRecord::new(name, address, role);
    record.link_status = info
        .get("master_link_status")
        .map(|s| LinkStatus::from_token(s));

    record.last_io_age_secs = match info.get("master_last_io_seconds_ago") {
        Some(v) => {
            let secs = parse_num::<i64>("master_last_io_seconds_ago", v)?;
            u64::try_from(secs).ok()
        }
        None => None,
    };

    record.priority = match info
        .get("slave_priority")
        .or_else(|| info.get("replica_priority"))
    {
        Some(v) => Some(parse_num::<u64>("slave_priority", v)?),
        None => None,
    };
    record.replica_count = match info.get("connected_slaves") {
        Some(v) => Some(parse_num::<u32>("connected_slaves", v)?),
        None => None,
    };
    record.upstream = upstream(
        info.get("master_host").map(String::as_str),
        info.get("master_port").map(String::as_str),
        "master_port",
    )?;

    record.extra = info
        .iter()
        .filter(|(k, _)| {
            !matches!(
                k.as_str(),
                "role"
                    | "master_link_status"
                    | "master_last_io_seconds_ago"
                    | "slave_priority"
                    | "replica_priority"
                    | "connected_slaves"
                    | "master_host"
                    | "master_port"
            )
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    Ok(record)
}
