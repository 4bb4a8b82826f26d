use crate::error::classify;
use crate::query::parse_timestamp;
use crate::{
    Arch, ArchId, Batch, BatchId, Db, Host, NewBatch, NewTestFailure, NewTestFailureState, Opcode,
    OpcodeId, StoreError, TestFailure, TestFailureState, TestSuccess, User,
};
use anyhow::Result;
use fuzzermon_core::{check_len, limits};
use rusqlite::{params, OptionalExtension};

impl Db {
    pub fn create_user(&self, username: &str) -> Result<User> {
        check_len("username", username, limits::USERNAME)?;
        self.conn
            .execute("INSERT INTO users(username) VALUES (?)", [username])
            .map_err(classify)?;
        Ok(User { id: self.conn.last_insert_rowid(), username: username.to_string() })
    }

    pub fn create_arch(&self, name: &str) -> Result<Arch> {
        check_len("name", name, limits::ARCH_NAME)?;
        self.conn
            .execute("INSERT INTO arches(name) VALUES (?)", [name])
            .map_err(classify)?;
        Ok(Arch { id: self.conn.last_insert_rowid(), name: name.to_string() })
    }

    pub fn create_host(&self, hostname: &str, arch_id: ArchId) -> Result<Host> {
        check_len("hostname", hostname, limits::HOSTNAME)?;
        self.conn
            .execute("INSERT INTO hosts(hostname,arch_id) VALUES (?,?)", params![hostname, arch_id])
            .map_err(classify)?;
        Ok(Host { id: self.conn.last_insert_rowid(), hostname: hostname.to_string(), arch_id })
    }

    pub fn create_opcode(&self, name: &str, arch_id: ArchId) -> Result<Opcode> {
        check_len("name", name, limits::OPCODE_NAME)?;
        self.conn
            .execute("INSERT INTO opcodes(name,arch_id) VALUES (?,?)", params![name, arch_id])
            .map_err(classify)?;
        Ok(Opcode { id: self.conn.last_insert_rowid(), name: name.to_string(), arch_id })
    }

    /// Inserts a batch. `submitted_at` comes from the column default, never from the caller.
    pub fn create_batch(&self, batch: &NewBatch) -> Result<Batch> {
        check_len("fuzzer_host", &batch.fuzzer_host, limits::FUZZER_HOST)?;
        let (id, submitted_at): (BatchId, String) = self
            .conn
            .query_row(
                "INSERT INTO batches(fuzzer_host,testing_host_id,user_id) VALUES (?,?,?) RETURNING batch_id, submitted_at",
                params![batch.fuzzer_host, batch.testing_host_id, batch.user_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .map_err(classify)?;
        Ok(Batch {
            id,
            fuzzer_host: batch.fuzzer_host.clone(),
            testing_host_id: batch.testing_host_id,
            user_id: batch.user_id,
            submitted_at: parse_timestamp(&submitted_at)?,
        })
    }

    pub fn add_test_success(&self, batch_id: BatchId, opcode_id: OpcodeId, count: i32) -> Result<TestSuccess> {
        self.conn
            .execute(
                "INSERT INTO test_successes(batch_id,opcode_id,count) VALUES (?,?,?)",
                params![batch_id, opcode_id, count],
            )
            .map_err(classify)?;
        Ok(TestSuccess { id: self.conn.last_insert_rowid(), batch_id, opcode_id, count })
    }

    pub fn add_test_failure(&self, failure: &NewTestFailure) -> Result<TestFailure> {
        check_len("pretty", &failure.pretty, limits::FAILURE_PRETTY)?;
        self.conn
            .execute(
                "INSERT INTO test_failures(batch_id,opcode_id,pretty,arguments) VALUES (?,?,?,?)",
                params![failure.batch_id, failure.opcode_id, failure.pretty, failure.arguments],
            )
            .map_err(classify)?;
        Ok(TestFailure {
            id: self.conn.last_insert_rowid(),
            batch_id: failure.batch_id,
            opcode_id: failure.opcode_id,
            pretty: failure.pretty.clone(),
            arguments: failure.arguments.clone(),
        })
    }

    pub fn add_test_failure_state(&self, state: &NewTestFailureState) -> Result<TestFailureState> {
        check_len("location", &state.location, limits::STATE_LOCATION)?;
        check_len("expected_value", &state.expected_value, limits::STATE_VALUE)?;
        check_len("actual_value", &state.actual_value, limits::STATE_VALUE)?;
        self.conn
            .execute(
                "INSERT INTO test_failure_states(failure_id,location,expected_value,actual_value) VALUES (?,?,?,?)",
                params![state.test_failure_id, state.location, state.expected_value, state.actual_value],
            )
            .map_err(classify)?;
        Ok(TestFailureState {
            id: self.conn.last_insert_rowid(),
            test_failure_id: state.test_failure_id,
            location: state.location.clone(),
            expected_value: state.expected_value.clone(),
            actual_value: state.actual_value.clone(),
        })
    }

    pub fn ensure_user(&self, username: &str) -> Result<User> {
        check_len("username", username, limits::USERNAME)?;
        self.conn
            .execute("INSERT INTO users(username) VALUES (?) ON CONFLICT(username) DO NOTHING", [username])
            .map_err(classify)?;
        let id = self.conn.query_row("SELECT user_id FROM users WHERE username=?", [username], |r| r.get(0))?;
        Ok(User { id, username: username.to_string() })
    }

    pub fn ensure_arch(&self, name: &str) -> Result<Arch> {
        check_len("name", name, limits::ARCH_NAME)?;
        self.conn
            .execute("INSERT INTO arches(name) VALUES (?) ON CONFLICT(name) DO NOTHING", [name])
            .map_err(classify)?;
        let id = self.conn.query_row("SELECT arch_id FROM arches WHERE name=?", [name], |r| r.get(0))?;
        Ok(Arch { id, name: name.to_string() })
    }

    /// Returns the host with this name, creating it under `arch_id` if it is new.
    /// A known host registered for a different arch is an error, not a move.
    pub fn ensure_host(&self, hostname: &str, arch_id: ArchId) -> Result<Host> {
        match self.find_host(hostname)? {
            Some(host) if host.arch_id == arch_id => Ok(host),
            Some(host) => Err(StoreError::HostArchMismatch {
                hostname: host.hostname,
                existing: host.arch_id,
                requested: arch_id,
            }
            .into()),
            None => self.create_host(hostname, arch_id),
        }
    }

    /// Opcode names are not unique per arch; the oldest matching row wins.
    pub fn ensure_opcode(&self, name: &str, arch_id: ArchId) -> Result<Opcode> {
        let existing: Option<OpcodeId> = self
            .conn
            .query_row(
                "SELECT opcode_id FROM opcodes WHERE arch_id=? AND name=? ORDER BY opcode_id LIMIT 1",
                params![arch_id, name],
                |r| r.get(0),
            )
            .optional()?;
        match existing {
            Some(id) => Ok(Opcode { id, name: name.to_string(), arch_id }),
            None => self.create_opcode(name, arch_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fuzzermon_core::FieldError;

    fn store_err(err: &anyhow::Error) -> &StoreError {
        err.downcast_ref::<StoreError>().expect("expected a StoreError")
    }

    #[test]
    fn batch_gets_a_submission_timestamp() {
        let db = Db::open_in_memory().unwrap();
        let arm = db.create_arch("ARM").unwrap();
        let host = db.create_host("host1", arm.id).unwrap();
        let alice = db.create_user("alice").unwrap();
        let before = time::OffsetDateTime::now_utc() - time::Duration::seconds(5);
        let batch = db
            .create_batch(&NewBatch { fuzzer_host: "fuzzer1".into(), testing_host_id: host.id, user_id: alice.id })
            .unwrap();
        assert_eq!(batch.fuzzer_host, "fuzzer1");
        assert!(batch.submitted_at >= before);
        assert!(batch.submitted_at <= time::OffsetDateTime::now_utc() + time::Duration::seconds(5));
    }

    #[test]
    fn duplicate_arch_is_rejected() {
        let db = Db::open_in_memory().unwrap();
        db.create_arch("ARM").unwrap();
        let err = db.create_arch("ARM").unwrap_err();
        assert!(matches!(store_err(&err), StoreError::Duplicate { column } if column == "arches.name"));
    }

    #[test]
    fn duplicate_username_and_hostname_are_rejected() {
        let db = Db::open_in_memory().unwrap();
        let arm = db.create_arch("ARM").unwrap();
        db.create_user("alice").unwrap();
        db.create_host("host1", arm.id).unwrap();
        let err = db.create_user("alice").unwrap_err();
        assert!(matches!(store_err(&err), StoreError::Duplicate { .. }));
        let err = db.create_host("host1", arm.id).unwrap_err();
        assert!(matches!(store_err(&err), StoreError::Duplicate { column } if column == "hosts.hostname"));
    }

    #[test]
    fn opcode_names_may_repeat() {
        let db = Db::open_in_memory().unwrap();
        let arm = db.create_arch("ARM").unwrap();
        let a = db.create_opcode("ADDri", arm.id).unwrap();
        let b = db.create_opcode("ADDri", arm.id).unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn dangling_references_are_rejected() {
        let db = Db::open_in_memory().unwrap();
        let err = db.create_host("host1", 42).unwrap_err();
        assert!(matches!(store_err(&err), StoreError::MissingReference));

        let arm = db.create_arch("ARM").unwrap();
        let host = db.create_host("host1", arm.id).unwrap();
        let err = db
            .create_batch(&NewBatch { fuzzer_host: "f".into(), testing_host_id: host.id, user_id: 7 })
            .unwrap_err();
        assert!(matches!(store_err(&err), StoreError::MissingReference));
    }

    #[test]
    fn over_long_values_fail_before_sqlite() {
        let db = Db::open_in_memory().unwrap();
        let err = db.create_user(&"u".repeat(65)).unwrap_err();
        assert_eq!(
            err.downcast_ref::<FieldError>(),
            Some(&FieldError::TooLong { field: "username", max: 64, len: 65 })
        );
        assert_eq!(db.count_rows(crate::Entity::User).unwrap(), 0);
    }

    #[test]
    fn schema_checks_lengths_too() {
        let db = Db::open_in_memory().unwrap();
        let err = db
            .conn
            .execute("INSERT INTO arches(name) VALUES (?)", [&"x".repeat(65)])
            .map_err(classify)
            .unwrap_err();
        assert!(matches!(store_err(&err), StoreError::Check(_)));
    }

    #[test]
    fn arguments_are_unbounded() {
        let db = Db::open_in_memory().unwrap();
        let arm = db.create_arch("ARM").unwrap();
        let host = db.create_host("h", arm.id).unwrap();
        let user = db.create_user("u").unwrap();
        let op = db.create_opcode("LDR", arm.id).unwrap();
        let batch = db.create_batch(&NewBatch { fuzzer_host: "f".into(), testing_host_id: host.id, user_id: user.id }).unwrap();
        let failure = db
            .add_test_failure(&NewTestFailure {
                batch_id: batch.id,
                opcode_id: op.id,
                pretty: "ldr r0, [r1]".into(),
                arguments: "r".repeat(10_000),
            })
            .unwrap();
        assert_eq!(db.get_test_failure(failure.id).unwrap().arguments.len(), 10_000);
    }

    #[test]
    fn ensure_helpers_reuse_rows() {
        let db = Db::open_in_memory().unwrap();
        let a = db.ensure_user("alice").unwrap();
        let b = db.ensure_user("alice").unwrap();
        assert_eq!(a, b);
        let arm = db.ensure_arch("ARM").unwrap();
        assert_eq!(db.ensure_arch("ARM").unwrap().id, arm.id);
        let h1 = db.ensure_host("host1", arm.id).unwrap();
        assert_eq!(db.ensure_host("host1", arm.id).unwrap(), h1);
        let op = db.ensure_opcode("ADDri", arm.id).unwrap();
        assert_eq!(db.ensure_opcode("ADDri", arm.id).unwrap(), op);
        assert_eq!(db.count_rows(crate::Entity::Opcode).unwrap(), 1);
    }

    #[test]
    fn ensure_opcode_picks_lowest_id_among_duplicates() {
        let db = Db::open_in_memory().unwrap();
        let arm = db.create_arch("ARM").unwrap();
        let ppc = db.create_arch("PPC32").unwrap();
        // same name on another arch must not be picked
        db.create_opcode("ADDri", ppc.id).unwrap();
        let first = db.create_opcode("ADDri", arm.id).unwrap();
        let second = db.create_opcode("ADDri", arm.id).unwrap();
        assert!(first.id < second.id);

        assert_eq!(db.ensure_opcode("ADDri", arm.id).unwrap(), first);
        assert_eq!(db.opcodes_for_arch(arm.id).unwrap().len(), 2);
    }

    #[test]
    fn ensure_host_refuses_to_switch_arch() {
        let db = Db::open_in_memory().unwrap();
        let arm = db.create_arch("ARM").unwrap();
        let ppc = db.create_arch("PPC32").unwrap();
        db.create_host("host1", arm.id).unwrap();
        let err = db.ensure_host("host1", ppc.id).unwrap_err();
        assert!(matches!(store_err(&err), StoreError::HostArchMismatch { existing, .. } if *existing == arm.id));
    }
}
