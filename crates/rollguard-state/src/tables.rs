//! redb table definitions for the audit archive.

use redb::TableDefinition;

/// Final session snapshots keyed by `{session_id}`.
pub const SESSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");

/// Rollback events keyed by `{session_id}:{seq:06}`.
pub const ROLLBACKS: TableDefinition<&str, &[u8]> = TableDefinition::new("rollbacks");
