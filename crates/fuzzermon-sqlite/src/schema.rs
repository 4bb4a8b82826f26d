// Each migration bumps user_version itself so a failed script leaves the version untouched.
pub const MIG_0001_INIT: &str = r#"
BEGIN;

CREATE TABLE users (
  user_id         INTEGER PRIMARY KEY AUTOINCREMENT,
  username        TEXT NOT NULL UNIQUE CHECK (length(username) <= 64)
);

CREATE TABLE arches (
  arch_id         INTEGER PRIMARY KEY AUTOINCREMENT,
  name            TEXT NOT NULL UNIQUE CHECK (length(name) <= 64)
);

CREATE TABLE hosts (
  host_id         INTEGER PRIMARY KEY AUTOINCREMENT,
  hostname        TEXT NOT NULL UNIQUE CHECK (length(hostname) <= 128),
  arch_id         INTEGER NOT NULL REFERENCES arches(arch_id) ON DELETE CASCADE
);

CREATE TABLE batches (
  batch_id        INTEGER PRIMARY KEY AUTOINCREMENT,
  fuzzer_host     TEXT NOT NULL CHECK (length(fuzzer_host) <= 128),
  testing_host_id INTEGER NOT NULL REFERENCES hosts(host_id) ON DELETE CASCADE,
  user_id         INTEGER NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
  submitted_at    TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);

CREATE TABLE opcodes (
  opcode_id       INTEGER PRIMARY KEY AUTOINCREMENT,
  name            TEXT NOT NULL CHECK (length(name) <= 128),
  arch_id         INTEGER NOT NULL REFERENCES arches(arch_id) ON DELETE CASCADE
);

CREATE TABLE test_successes (
  success_id      INTEGER PRIMARY KEY AUTOINCREMENT,
  batch_id        INTEGER NOT NULL REFERENCES batches(batch_id) ON DELETE CASCADE,
  opcode_id       INTEGER NOT NULL REFERENCES opcodes(opcode_id) ON DELETE CASCADE,
  count           INTEGER NOT NULL
);

CREATE TABLE test_failures (
  failure_id      INTEGER PRIMARY KEY AUTOINCREMENT,
  batch_id        INTEGER NOT NULL REFERENCES batches(batch_id) ON DELETE CASCADE,
  opcode_id       INTEGER NOT NULL REFERENCES opcodes(opcode_id) ON DELETE CASCADE,
  pretty          TEXT NOT NULL CHECK (length(pretty) <= 256),
  arguments       TEXT NOT NULL
);

CREATE TABLE test_failure_states (
  state_id        INTEGER PRIMARY KEY AUTOINCREMENT,
  failure_id      INTEGER NOT NULL REFERENCES test_failures(failure_id) ON DELETE CASCADE,
  location        TEXT NOT NULL CHECK (length(location) <= 128),
  expected_value  TEXT NOT NULL CHECK (length(expected_value) <= 256),
  actual_value    TEXT NOT NULL CHECK (length(actual_value) <= 256)
);

CREATE TRIGGER batches_submitted_at_immutable
BEFORE UPDATE OF submitted_at ON batches
WHEN NEW.submitted_at IS NOT OLD.submitted_at
BEGIN
  SELECT RAISE(ABORT, 'batches.submitted_at is immutable');
END;

CREATE INDEX idx_hosts_arch ON hosts(arch_id);
CREATE INDEX idx_batches_host ON batches(testing_host_id);
CREATE INDEX idx_batches_user ON batches(user_id);
CREATE INDEX idx_opcodes_arch_name ON opcodes(arch_id, name);
CREATE INDEX idx_successes_batch ON test_successes(batch_id);
CREATE INDEX idx_successes_opcode ON test_successes(opcode_id);
CREATE INDEX idx_failures_batch ON test_failures(batch_id);
CREATE INDEX idx_failures_opcode ON test_failures(opcode_id);
CREATE INDEX idx_states_failure ON test_failure_states(failure_id);

PRAGMA user_version = 1;

COMMIT;
"#
;

pub const MIGRATIONS: &[&str] = &[MIG_0001_INIT];
