//! Recording a whole submitted batch in one go.
//!
//! A fuzzing client uploads one report per run: who ran it, where, for which arch, and a
//! list of per-opcode outcomes. Users, arches, hosts and opcodes are created on first sight
//! and reused afterwards.

use crate::{BatchId, Db, NewBatch, NewTestFailure, NewTestFailureState, OpcodeId};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BatchReport {
    pub fuzzing_host: String,
    pub testing_host: String,
    pub user: String,
    pub arch: String,
    #[serde(default)]
    pub entries: Vec<BatchEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum BatchEntry {
    Success {
        opcode: String,
        count: i32,
    },
    Failure {
        opcode: String,
        pretty: String,
        #[serde(rename = "raw-operands")]
        arguments: String,
        #[serde(default)]
        state: Vec<StateDiff>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDiff {
    pub location: String,
    pub expected: String,
    pub actual: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestSummary {
    pub batch_id: BatchId,
    pub successes: usize,
    pub failures: usize,
    pub states: usize,
}

impl BatchReport {
    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }
}

impl Db {
    /// Stores a report and everything in it. Either all rows land or none do.
    pub fn record_batch(&self, report: &BatchReport) -> Result<IngestSummary> {
        let tx = self.conn.unchecked_transaction()?;

        let user = self.ensure_user(&report.user).context("user")?;
        let arch = self.ensure_arch(&report.arch).context("arch")?;
        let host = self.ensure_host(&report.testing_host, arch.id).context("testing host")?;
        let batch = self.create_batch(&NewBatch {
            fuzzer_host: report.fuzzing_host.clone(),
            testing_host_id: host.id,
            user_id: user.id,
        })?;

        let mut opcodes: HashMap<&str, OpcodeId> = HashMap::new();
        let mut summary = IngestSummary { batch_id: batch.id, successes: 0, failures: 0, states: 0 };
        for (idx, entry) in report.entries.iter().enumerate() {
            let name = match entry {
                BatchEntry::Success { opcode, .. } | BatchEntry::Failure { opcode, .. } => opcode.as_str(),
            };
            let opcode_id = match opcodes.get(name) {
                Some(id) => *id,
                None => {
                    let id = self.ensure_opcode(name, arch.id).with_context(|| format!("entry {idx}"))?.id;
                    opcodes.insert(name, id);
                    id
                }
            };
            match entry {
                BatchEntry::Success { count, .. } => {
                    self.add_test_success(batch.id, opcode_id, *count)?;
                    summary.successes += 1;
                }
                BatchEntry::Failure { pretty, arguments, state, .. } => {
                    let failure = self
                        .add_test_failure(&NewTestFailure {
                            batch_id: batch.id,
                            opcode_id,
                            pretty: pretty.clone(),
                            arguments: arguments.clone(),
                        })
                        .with_context(|| format!("entry {idx}"))?;
                    for diff in state {
                        self.add_test_failure_state(&NewTestFailureState {
                            test_failure_id: failure.id,
                            location: diff.location.clone(),
                            expected_value: diff.expected.clone(),
                            actual_value: diff.actual.clone(),
                        })
                        .with_context(|| format!("entry {idx} state {}", diff.location))?;
                        summary.states += 1;
                    }
                    summary.failures += 1;
                }
            }
        }

        tx.commit()?;
        info!(
            batch_id = summary.batch_id,
            user = %report.user,
            testing_host = %report.testing_host,
            successes = summary.successes,
            failures = summary.failures,
            "recorded batch"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Entity;

    const REPORT: &str = r#"{
        "fuzzing-host": "fuzzer1",
        "testing-host": "pi3",
        "user": "alice",
        "arch": "ARM",
        "entries": [
            {"type": "success", "opcode": "ADDri", "count": 120},
            {"type": "success", "opcode": "LDRi12", "count": 7},
            {"type": "failure", "opcode": "ADDri", "pretty": "add r0, r1, #4",
             "raw-operands": "(r0, r1, 4)",
             "state": [
                {"location": "r0", "expected": "0x8", "actual": "0x4"},
                {"location": "CPSR", "expected": "0x60000010", "actual": "0x20000010"}
             ]},
            {"type": "failure", "opcode": "STRi12", "pretty": "str r2, [sp]", "raw-operands": "(r2, sp)"}
        ]
    }"#;

    #[test]
    fn parses_upload_format() {
        let report = BatchReport::from_json(REPORT).unwrap();
        assert_eq!(report.fuzzing_host, "fuzzer1");
        assert_eq!(report.entries.len(), 4);
        match &report.entries[3] {
            BatchEntry::Failure { arguments, state, .. } => {
                assert_eq!(arguments, "(r2, sp)");
                assert!(state.is_empty());
            }
            other => panic!("unexpected entry {other:?}"),
        }
    }

    #[test]
    fn records_every_row() {
        let db = Db::open_in_memory().unwrap();
        let report = BatchReport::from_json(REPORT).unwrap();
        let summary = db.record_batch(&report).unwrap();
        assert_eq!(summary.successes, 2);
        assert_eq!(summary.failures, 2);
        assert_eq!(summary.states, 2);

        let arch = db.find_arch("ARM").unwrap().unwrap();
        // ADDri appears twice in the report but is stored once
        assert_eq!(db.opcodes_for_arch(arch.id).unwrap().len(), 3);

        let failures = db.failures_for_batch(summary.batch_id).unwrap();
        assert_eq!(db.states_for_failure(failures[0].id).unwrap().len(), 2);
        assert_eq!(db.states_for_failure(failures[1].id).unwrap().len(), 0);

        let batch = db.get_batch(summary.batch_id).unwrap();
        assert_eq!(db.get_host(batch.testing_host_id).unwrap().hostname, "pi3");
        assert_eq!(db.get_user(batch.user_id).unwrap().username, "alice");
    }

    #[test]
    fn second_report_reuses_reference_rows() {
        let db = Db::open_in_memory().unwrap();
        let report = BatchReport::from_json(REPORT).unwrap();
        let first = db.record_batch(&report).unwrap();
        let second = db.record_batch(&report).unwrap();
        assert_ne!(first.batch_id, second.batch_id);
        assert_eq!(db.count_rows(Entity::User).unwrap(), 1);
        assert_eq!(db.count_rows(Entity::Host).unwrap(), 1);
        assert_eq!(db.count_rows(Entity::Opcode).unwrap(), 3);
        assert_eq!(db.count_rows(Entity::Batch).unwrap(), 2);
    }

    #[test]
    fn bad_entry_rolls_back_the_whole_batch() {
        let db = Db::open_in_memory().unwrap();
        let mut report = BatchReport::from_json(REPORT).unwrap();
        report.entries.push(BatchEntry::Failure {
            opcode: "MOVi".into(),
            pretty: "p".repeat(300),
            arguments: String::new(),
            state: Vec::new(),
        });
        assert!(db.record_batch(&report).is_err());
        for entity in Entity::ALL {
            assert_eq!(db.count_rows(entity).unwrap(), 0, "{entity}");
        }
    }
}
