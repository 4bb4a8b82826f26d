//! Max lengths of the bounded text columns. `TestFailure.arguments` has none.

pub const USERNAME: usize = 64;
pub const ARCH_NAME: usize = 64;
pub const HOSTNAME: usize = 128;
pub const FUZZER_HOST: usize = 128;
pub const OPCODE_NAME: usize = 128;
pub const FAILURE_PRETTY: usize = 256;
pub const STATE_LOCATION: usize = 128;
pub const STATE_VALUE: usize = 256;
