use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

pub type UserId = i64;
pub type ArchId = i64;
pub type HostId = i64;
pub type BatchId = i64;
pub type OpcodeId = i64;
pub type TestSuccessId = i64;
pub type TestFailureId = i64;
pub type TestFailureStateId = i64;

/// A person who submits fuzzing batches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
}

/// An instruction-set architecture under test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Arch {
    pub id: ArchId,
    pub name: String,
}

/// A machine that executes test cases for one architecture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub id: HostId,
    pub hostname: String,
    pub arch_id: ArchId,
}

/// One submitted fuzzing run. `fuzzer_host` generated the inputs, `testing_host_id` ran them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub id: BatchId,
    pub fuzzer_host: String,
    pub testing_host_id: HostId,
    pub user_id: UserId,
    #[serde(with = "time::serde::rfc3339")]
    pub submitted_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Opcode {
    pub id: OpcodeId,
    pub name: String,
    pub arch_id: ArchId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSuccess {
    pub id: TestSuccessId,
    pub batch_id: BatchId,
    pub opcode_id: OpcodeId,
    pub count: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestFailure {
    pub id: TestFailureId,
    pub batch_id: BatchId,
    pub opcode_id: OpcodeId,
    pub pretty: String,
    pub arguments: String,
}

/// One location whose value diverged in a failing test case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestFailureState {
    pub id: TestFailureStateId,
    pub test_failure_id: TestFailureId,
    pub location: String,
    pub expected_value: String,
    pub actual_value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBatch {
    pub fuzzer_host: String,
    pub testing_host_id: HostId,
    pub user_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTestFailure {
    pub batch_id: BatchId,
    pub opcode_id: OpcodeId,
    pub pretty: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTestFailureState {
    pub test_failure_id: TestFailureId,
    pub location: String,
    pub expected_value: String,
    pub actual_value: String,
}

/// Names every table so deletes and counts can be written once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Entity {
    User,
    Arch,
    Host,
    Batch,
    Opcode,
    TestSuccess,
    TestFailure,
    TestFailureState,
}

impl Entity {
    pub const ALL: [Entity; 8] = [
        Entity::User,
        Entity::Arch,
        Entity::Host,
        Entity::Batch,
        Entity::Opcode,
        Entity::TestSuccess,
        Entity::TestFailure,
        Entity::TestFailureState,
    ];

    pub fn table(self) -> &'static str {
        match self {
            Entity::User => "users",
            Entity::Arch => "arches",
            Entity::Host => "hosts",
            Entity::Batch => "batches",
            Entity::Opcode => "opcodes",
            Entity::TestSuccess => "test_successes",
            Entity::TestFailure => "test_failures",
            Entity::TestFailureState => "test_failure_states",
        }
    }

    pub fn pk_column(self) -> &'static str {
        match self {
            Entity::User => "user_id",
            Entity::Arch => "arch_id",
            Entity::Host => "host_id",
            Entity::Batch => "batch_id",
            Entity::Opcode => "opcode_id",
            Entity::TestSuccess => "success_id",
            Entity::TestFailure => "failure_id",
            Entity::TestFailureState => "state_id",
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Entity::User => "user",
            Entity::Arch => "arch",
            Entity::Host => "host",
            Entity::Batch => "batch",
            Entity::Opcode => "opcode",
            Entity::TestSuccess => "test success",
            Entity::TestFailure => "test failure",
            Entity::TestFailureState => "test failure state",
        };
        f.write_str(name)
    }
}
