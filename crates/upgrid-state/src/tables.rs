//! redb table definitions for the upgrid state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Service specs keyed by service name.
pub const SERVICES: TableDefinition<&str, &[u8]> = TableDefinition::new("services");

/// Instance state keyed by `{service}:{instance_id}`.
pub const INSTANCES: TableDefinition<&str, &[u8]> = TableDefinition::new("instances");

/// Host info keyed by host ID.
pub const HOSTS: TableDefinition<&str, &[u8]> = TableDefinition::new("hosts");

/// Upgrade records keyed by `{from}->{to}`.
pub const UPGRADES: TableDefinition<&str, &[u8]> = TableDefinition::new("upgrades");

/// Shape shared by every table: string keys, JSON byte values.
pub type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;
