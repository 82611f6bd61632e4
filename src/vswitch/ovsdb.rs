//! Open vSwitch database protocol backend
//!
//! Builds `insert`/`mutate`/`delete`/`select` operations against the
//! `Open_vSwitch`, `Bridge`, `Port` and `Interface` tables and submits them
//! as single transactions over a [`Channel`].
//!
//! A transaction succeeds only if the server returns at least one reply per
//! operation and no reply carries an `error`. Partially applied rows are not
//! rolled back here; atomicity is whatever the server guarantees.

use super::rpc::Channel;
use super::{VSwitch, GLOBAL_ID_KEY};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::net::IpAddr;
use std::sync::Mutex;
use tracing::{debug, warn};

/// One database operation inside a `transact` request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Operation {
    Insert {
        table: String,
        row: Map<String, Value>,
        #[serde(rename = "uuid-name", skip_serializing_if = "Option::is_none")]
        uuid_name: Option<String>,
    },
    Mutate {
        table: String,
        #[serde(rename = "where")]
        conditions: Vec<Condition>,
        mutations: Vec<Mutation>,
    },
    Delete {
        table: String,
        #[serde(rename = "where")]
        conditions: Vec<Condition>,
    },
    Select {
        table: String,
        #[serde(rename = "where")]
        conditions: Vec<Condition>,
        columns: Vec<String>,
    },
}

impl Operation {
    pub fn table(&self) -> &str {
        match self {
            Operation::Insert { table, .. }
            | Operation::Mutate { table, .. }
            | Operation::Delete { table, .. }
            | Operation::Select { table, .. } => table,
        }
    }
}

/// `[column, function, value]` predicate on a row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Condition(pub String, pub &'static str, pub Value);

impl Condition {
    pub fn eq(column: &str, value: Value) -> Self {
        Condition(column.to_string(), "==", value)
    }

    pub fn includes(column: &str, value: Value) -> Self {
        Condition(column.to_string(), "includes", value)
    }
}

/// `[column, mutator, value]` mutation of a column
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mutation(pub String, pub &'static str, pub Value);

impl Mutation {
    pub fn insert(column: &str, value: Value) -> Self {
        Mutation(column.to_string(), "insert", value)
    }

    pub fn delete(column: &str, value: Value) -> Self {
        Mutation(column.to_string(), "delete", value)
    }
}

/// Per-operation reply
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OperationResult {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub rows: Option<Vec<Map<String, Value>>>,
}

// OVSDB value encodings

pub fn uuid(id: &str) -> Value {
    json!(["uuid", id])
}

pub fn named_uuid(name: &str) -> Value {
    json!(["named-uuid", name])
}

pub fn set(items: Vec<Value>) -> Value {
    json!(["set", items])
}

pub fn map(pairs: &[(&str, String)]) -> Value {
    let pairs: Vec<Value> = pairs.iter().map(|(k, v)| json!([k, v])).collect();
    json!(["map", pairs])
}

fn alias_map(global_id: &str) -> Value {
    map(&[(GLOBAL_ID_KEY, global_id.to_string())])
}

fn row(pairs: Vec<(&str, Value)>) -> Map<String, Value> {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

const NEW_INTERFACE: &str = "new_interface";
const NEW_PORT: &str = "new_port";
const NEW_BRIDGE: &str = "new_bridge";

/// Bridge row, its internal port and interface, and root-table membership
pub fn create_bridge_ops(name: &str, global_id: &str, datapath_type: &str) -> Vec<Operation> {
    vec![
        Operation::Insert {
            table: "Interface".into(),
            row: row(vec![("name", json!(name)), ("type", json!("internal"))]),
            uuid_name: Some(NEW_INTERFACE.into()),
        },
        Operation::Insert {
            table: "Port".into(),
            row: row(vec![
                ("name", json!(name)),
                ("interfaces", named_uuid(NEW_INTERFACE)),
            ]),
            uuid_name: Some(NEW_PORT.into()),
        },
        Operation::Insert {
            table: "Bridge".into(),
            row: row(vec![
                ("name", json!(name)),
                ("ports", named_uuid(NEW_PORT)),
                ("datapath_type", json!(datapath_type)),
                ("external_ids", alias_map(global_id)),
            ]),
            uuid_name: Some(NEW_BRIDGE.into()),
        },
        Operation::Mutate {
            table: "Open_vSwitch".into(),
            conditions: Vec::new(),
            mutations: vec![Mutation::insert("bridges", set(vec![named_uuid(NEW_BRIDGE)]))],
        },
    ]
}

/// Drop the bridge from the root table and delete its row
pub fn delete_bridge_ops(bridge_uuid: &str) -> Vec<Operation> {
    vec![
        Operation::Mutate {
            table: "Open_vSwitch".into(),
            conditions: Vec::new(),
            mutations: vec![Mutation::delete("bridges", set(vec![uuid(bridge_uuid)]))],
        },
        Operation::Delete {
            table: "Bridge".into(),
            conditions: vec![Condition::eq("_uuid", uuid(bridge_uuid))],
        },
    ]
}

/// Interface row, port row referencing it, and bridge port-set membership
fn port_ops(
    bridge: &str,
    interface: Map<String, Value>,
    mut port: Map<String, Value>,
) -> Vec<Operation> {
    port.insert("interfaces".into(), named_uuid(NEW_INTERFACE));
    let name = interface.get("name").cloned().unwrap_or(Value::Null);
    port.entry("name").or_insert(name);

    vec![
        Operation::Insert {
            table: "Interface".into(),
            row: interface,
            uuid_name: Some(NEW_INTERFACE.into()),
        },
        Operation::Insert {
            table: "Port".into(),
            row: port,
            uuid_name: Some(NEW_PORT.into()),
        },
        Operation::Mutate {
            table: "Bridge".into(),
            conditions: vec![Condition::eq("name", json!(bridge))],
            mutations: vec![Mutation::insert("ports", set(vec![named_uuid(NEW_PORT)]))],
        },
    ]
}

pub fn add_port_ops(bridge: &str, port: &str) -> Vec<Operation> {
    port_ops(bridge, row(vec![("name", json!(port))]), Map::new())
}

pub fn add_gre_port_ops(
    bridge: &str,
    port: &str,
    global_id: &str,
    remote_ip: IpAddr,
) -> Vec<Operation> {
    port_ops(
        bridge,
        row(vec![
            ("name", json!(port)),
            ("type", json!("gre")),
            ("options", map(&[("remote_ip", remote_ip.to_string())])),
        ]),
        row(vec![("external_ids", alias_map(global_id))]),
    )
}

/// Delete a port row and remove it from the bridge's port set
pub fn delete_port_ops(bridge: &str, port_uuid: &str) -> Vec<Operation> {
    vec![
        Operation::Delete {
            table: "Port".into(),
            conditions: vec![Condition::eq("_uuid", uuid(port_uuid))],
        },
        Operation::Mutate {
            table: "Bridge".into(),
            conditions: vec![Condition::eq("name", json!(bridge))],
            mutations: vec![Mutation::delete("ports", set(vec![uuid(port_uuid)]))],
        },
    ]
}

fn select(table: &str, conditions: Vec<Condition>, columns: &[&str]) -> Operation {
    Operation::Select {
        table: table.into(),
        conditions,
        columns: columns.iter().map(|c| c.to_string()).collect(),
    }
}

/// Look up `key` in an encoded `["map", [[k, v], ...]]` column
fn map_get<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    match value.as_array()?.as_slice() {
        [tag, Value::Array(pairs)] if tag == "map" => pairs.iter().find_map(|pair| {
            match pair.as_array()?.as_slice() {
                [k, v] if k == key => v.as_str(),
                _ => None,
            }
        }),
        _ => None,
    }
}

/// Check per-operation replies against the submitted operations
pub fn check_outcome(
    ops: &[Operation],
    replies: Vec<Option<OperationResult>>,
) -> Result<Vec<OperationResult>> {
    for (index, reply) in replies.iter().enumerate() {
        let Some(reply) = reply else { continue };
        let Some(error) = reply.error.as_deref().filter(|e| !e.is_empty()) else {
            continue;
        };

        let table = ops.get(index).map(Operation::table).unwrap_or("commit");
        let message = match reply.details.as_deref() {
            Some(details) => format!("{}: {}", error, details),
            None => error.to_string(),
        };
        return Err(Error::TransactionIncomplete {
            table: table.to_string(),
            index,
            message,
        });
    }

    if replies.len() < ops.len() {
        let index = replies.len();
        return Err(Error::TransactionIncomplete {
            table: ops[index].table().to_string(),
            index,
            message: format!(
                "expected at least {} replies, received {}",
                ops.len(),
                replies.len()
            ),
        });
    }

    let mut results = Vec::with_capacity(ops.len());
    for (index, reply) in replies.into_iter().take(ops.len()).enumerate() {
        match reply {
            Some(reply) => results.push(reply),
            None => {
                return Err(Error::TransactionIncomplete {
                    table: ops[index].table().to_string(),
                    index,
                    message: "operation was not executed".into(),
                });
            }
        }
    }
    Ok(results)
}

fn row_name(row: &Map<String, Value>) -> Option<String> {
    row.get("name").and_then(Value::as_str).map(str::to_string)
}

fn row_uuid(row: &Map<String, Value>) -> Option<String> {
    match row.get("_uuid")?.as_array()?.as_slice() {
        [tag, id] if tag == "uuid" => id.as_str().map(str::to_string),
        _ => None,
    }
}

/// [`VSwitch`] over an owned database session
pub struct OvsdbSwitch {
    session: Mutex<Box<dyn Channel>>,
    database: String,
    datapath_type: String,
}

impl OvsdbSwitch {
    pub fn new(
        session: Box<dyn Channel>,
        database: impl Into<String>,
        datapath_type: impl Into<String>,
    ) -> Self {
        Self {
            session: Mutex::new(session),
            database: database.into(),
            datapath_type: datapath_type.into(),
        }
    }

    /// Submit `ops` and return one checked result per operation
    pub fn transact_checked(&self, ops: &[Operation]) -> Result<Vec<OperationResult>> {
        let mut params = vec![json!(self.database)];
        for op in ops {
            params.push(serde_json::to_value(op)?);
        }

        debug!(operations = ops.len(), "ovsdb transact");
        let reply = {
            let mut session = self
                .session
                .lock()
                .map_err(|_| Error::Protocol("session lock poisoned".into()))?;
            session.call("transact", Value::Array(params))?
        };

        let replies: Vec<Option<OperationResult>> = serde_json::from_value(reply)?;
        check_outcome(ops, replies).inspect_err(|e| warn!(error = %e, "ovsdb transaction failed"))
    }

    fn select_rows(&self, table: &str, conditions: Vec<Condition>) -> Result<Vec<Map<String, Value>>> {
        self.select_columns(table, conditions, &["_uuid", "name"])
    }

    fn select_columns(
        &self,
        table: &str,
        conditions: Vec<Condition>,
        columns: &[&str],
    ) -> Result<Vec<Map<String, Value>>> {
        let results = self.transact_checked(&[select(table, conditions, columns)])?;
        Ok(results
            .into_iter()
            .next()
            .and_then(|r| r.rows)
            .unwrap_or_default())
    }

    fn names_by_alias(&self, table: &str, global_id: &str) -> Result<Vec<String>> {
        let rows = self.select_rows(table, vec![Condition::includes("external_ids", alias_map(global_id))])?;
        Ok(rows.iter().filter_map(row_name).collect())
    }

    fn uuid_by_name(&self, table: &str, name: &str) -> Result<Option<String>> {
        let rows = self.select_rows(table, vec![Condition::eq("name", json!(name))])?;
        Ok(rows.iter().find_map(row_uuid))
    }
}

impl VSwitch for OvsdbSwitch {
    fn create_bridge(&self, name: &str, global_id: &str) -> Result<()> {
        self.transact(&create_bridge_ops(name, global_id, &self.datapath_type))
    }

    fn delete_bridge(&self, name: &str) -> Result<()> {
        let id = self
            .uuid_by_name("Bridge", name)?
            .ok_or_else(|| Error::NotFound(format!("bridge row '{}'", name)))?;
        self.transact(&delete_bridge_ops(&id))
    }

    fn add_port(&self, bridge: &str, port: &str) -> Result<()> {
        self.transact(&add_port_ops(bridge, port))
    }

    fn delete_port(&self, bridge: &str, port: &str) -> Result<()> {
        let id = self
            .uuid_by_name("Port", port)?
            .ok_or_else(|| Error::NotFound(format!("port row '{}'", port)))?;
        self.transact(&delete_port_ops(bridge, &id))
    }

    fn add_gre_port(
        &self,
        bridge: &str,
        port: &str,
        global_id: &str,
        remote_ip: IpAddr,
    ) -> Result<()> {
        self.transact(&add_gre_port_ops(bridge, port, global_id, remote_ip))
    }

    fn transact(&self, ops: &[Operation]) -> Result<()> {
        self.transact_checked(ops).map(|_| ())
    }

    fn bridges_by_alias(&self, global_id: &str) -> Result<Vec<String>> {
        self.names_by_alias("Bridge", global_id)
    }

    fn ports_by_alias(&self, global_id: &str) -> Result<Vec<String>> {
        self.names_by_alias("Port", global_id)
    }

    fn port_bridge(&self, port: &str) -> Result<Option<String>> {
        let Some(id) = self.uuid_by_name("Port", port)? else {
            return Ok(None);
        };
        let rows = self.select_rows("Bridge", vec![Condition::includes("ports", set(vec![uuid(&id)]))])?;
        Ok(rows.iter().find_map(row_name))
    }

    fn gre_remote(&self, port: &str) -> Result<Option<IpAddr>> {
        let rows = self.select_columns(
            "Interface",
            vec![Condition::eq("name", json!(port))],
            &["options"],
        )?;
        Ok(rows
            .iter()
            .find_map(|row| map_get(row.get("options")?, "remote_ip"))
            .and_then(|ip| ip.parse().ok()))
    }
}
