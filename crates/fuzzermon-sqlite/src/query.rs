use crate::{
    Arch, ArchId, Batch, BatchId, Db, Entity, Host, HostId, Opcode, OpcodeId, StoreError, TestFailure,
    TestFailureId, TestFailureState, TestFailureStateId, TestSuccess, TestSuccessId, User, UserId,
};
use anyhow::Result;
use rusqlite::types::Type;
use rusqlite::{OptionalExtension, Row};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

const USER_COLS: &str = "SELECT user_id, username FROM users";
const ARCH_COLS: &str = "SELECT arch_id, name FROM arches";
const HOST_COLS: &str = "SELECT host_id, hostname, arch_id FROM hosts";
const BATCH_COLS: &str = "SELECT batch_id, fuzzer_host, testing_host_id, user_id, submitted_at FROM batches";
const OPCODE_COLS: &str = "SELECT opcode_id, name, arch_id FROM opcodes";
const SUCCESS_COLS: &str = "SELECT success_id, batch_id, opcode_id, count FROM test_successes";
const FAILURE_COLS: &str = "SELECT failure_id, batch_id, opcode_id, pretty, arguments FROM test_failures";
const STATE_COLS: &str =
    "SELECT state_id, failure_id, location, expected_value, actual_value FROM test_failure_states";

pub(crate) fn parse_timestamp(s: &str) -> Result<OffsetDateTime> {
    Ok(OffsetDateTime::parse(s, &Rfc3339)?)
}

fn user_row(r: &Row) -> rusqlite::Result<User> {
    Ok(User { id: r.get(0)?, username: r.get(1)? })
}

fn arch_row(r: &Row) -> rusqlite::Result<Arch> {
    Ok(Arch { id: r.get(0)?, name: r.get(1)? })
}

fn host_row(r: &Row) -> rusqlite::Result<Host> {
    Ok(Host { id: r.get(0)?, hostname: r.get(1)?, arch_id: r.get(2)? })
}

fn batch_row(r: &Row) -> rusqlite::Result<Batch> {
    let raw: String = r.get(4)?;
    let submitted_at = OffsetDateTime::parse(&raw, &Rfc3339)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;
    Ok(Batch {
        id: r.get(0)?,
        fuzzer_host: r.get(1)?,
        testing_host_id: r.get(2)?,
        user_id: r.get(3)?,
        submitted_at,
    })
}

fn opcode_row(r: &Row) -> rusqlite::Result<Opcode> {
    Ok(Opcode { id: r.get(0)?, name: r.get(1)?, arch_id: r.get(2)? })
}

fn success_row(r: &Row) -> rusqlite::Result<TestSuccess> {
    Ok(TestSuccess { id: r.get(0)?, batch_id: r.get(1)?, opcode_id: r.get(2)?, count: r.get(3)? })
}

fn failure_row(r: &Row) -> rusqlite::Result<TestFailure> {
    Ok(TestFailure {
        id: r.get(0)?,
        batch_id: r.get(1)?,
        opcode_id: r.get(2)?,
        pretty: r.get(3)?,
        arguments: r.get(4)?,
    })
}

fn state_row(r: &Row) -> rusqlite::Result<TestFailureState> {
    Ok(TestFailureState {
        id: r.get(0)?,
        test_failure_id: r.get(1)?,
        location: r.get(2)?,
        expected_value: r.get(3)?,
        actual_value: r.get(4)?,
    })
}

impl Db {
    pub fn table_exists(&self, name: &str) -> Result<bool> {
        let cnt: i64 = self.conn.query_row(
            "SELECT COUNT(1) FROM sqlite_master WHERE type='table' AND name=?",
            [name],
            |r| r.get(0),
        )?;
        Ok(cnt > 0)
    }

    pub fn count_rows(&self, entity: Entity) -> Result<i64> {
        let sql = format!("SELECT COUNT(1) FROM {}", entity.table());
        Ok(self.conn.query_row(&sql, [], |r| r.get(0))?)
    }

    fn one<T>(&self, entity: Entity, cols: &str, id: i64, f: fn(&Row) -> rusqlite::Result<T>) -> Result<T> {
        let sql = format!("{cols} WHERE {}=?", entity.pk_column());
        self.conn
            .query_row(&sql, [id], f)
            .optional()?
            .ok_or_else(|| StoreError::NotFound { entity, id }.into())
    }

    fn many<T>(&self, sql: &str, key: i64, f: fn(&Row) -> rusqlite::Result<T>) -> Result<Vec<T>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map([key], f)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn get_user(&self, id: UserId) -> Result<User> {
        self.one(Entity::User, USER_COLS, id, user_row)
    }

    pub fn get_arch(&self, id: ArchId) -> Result<Arch> {
        self.one(Entity::Arch, ARCH_COLS, id, arch_row)
    }

    pub fn get_host(&self, id: HostId) -> Result<Host> {
        self.one(Entity::Host, HOST_COLS, id, host_row)
    }

    pub fn get_batch(&self, id: BatchId) -> Result<Batch> {
        self.one(Entity::Batch, BATCH_COLS, id, batch_row)
    }

    pub fn get_opcode(&self, id: OpcodeId) -> Result<Opcode> {
        self.one(Entity::Opcode, OPCODE_COLS, id, opcode_row)
    }

    pub fn get_test_success(&self, id: TestSuccessId) -> Result<TestSuccess> {
        self.one(Entity::TestSuccess, SUCCESS_COLS, id, success_row)
    }

    pub fn get_test_failure(&self, id: TestFailureId) -> Result<TestFailure> {
        self.one(Entity::TestFailure, FAILURE_COLS, id, failure_row)
    }

    pub fn get_test_failure_state(&self, id: TestFailureStateId) -> Result<TestFailureState> {
        self.one(Entity::TestFailureState, STATE_COLS, id, state_row)
    }

    pub fn find_user(&self, username: &str) -> Result<Option<User>> {
        let sql = format!("{USER_COLS} WHERE username=?");
        Ok(self.conn.query_row(&sql, [username], user_row).optional()?)
    }

    pub fn find_arch(&self, name: &str) -> Result<Option<Arch>> {
        let sql = format!("{ARCH_COLS} WHERE name=?");
        Ok(self.conn.query_row(&sql, [name], arch_row).optional()?)
    }

    pub fn find_host(&self, hostname: &str) -> Result<Option<Host>> {
        let sql = format!("{HOST_COLS} WHERE hostname=?");
        Ok(self.conn.query_row(&sql, [hostname], host_row).optional()?)
    }

    /// Newest first.
    pub fn list_batches(&self) -> Result<Vec<Batch>> {
        let sql = format!("{BATCH_COLS} ORDER BY submitted_at DESC, batch_id DESC");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], batch_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn hosts_for_arch(&self, arch_id: ArchId) -> Result<Vec<Host>> {
        self.many(&format!("{HOST_COLS} WHERE arch_id=? ORDER BY host_id"), arch_id, host_row)
    }

    pub fn opcodes_for_arch(&self, arch_id: ArchId) -> Result<Vec<Opcode>> {
        self.many(&format!("{OPCODE_COLS} WHERE arch_id=? ORDER BY opcode_id"), arch_id, opcode_row)
    }

    pub fn successes_for_batch(&self, batch_id: BatchId) -> Result<Vec<TestSuccess>> {
        self.many(&format!("{SUCCESS_COLS} WHERE batch_id=? ORDER BY success_id"), batch_id, success_row)
    }

    pub fn failures_for_batch(&self, batch_id: BatchId) -> Result<Vec<TestFailure>> {
        self.many(&format!("{FAILURE_COLS} WHERE batch_id=? ORDER BY failure_id"), batch_id, failure_row)
    }

    pub fn states_for_failure(&self, failure_id: TestFailureId) -> Result<Vec<TestFailureState>> {
        self.many(&format!("{STATE_COLS} WHERE failure_id=? ORDER BY state_id"), failure_id, state_row)
    }
}
