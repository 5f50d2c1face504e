//! A minimal command catalog. NOT the full command surface — individual
//! command constructors are an external collaborator of this crate. These
//! five exist only so the facade and its tests have something concrete to
//! send.

use crate::codec::{Command, Expectation};

/// `GET key` — expects a bulk reply (present or null).
pub fn get(key: impl Into<Vec<u8>>) -> Command {
    Command::new([b"GET".to_vec(), key.into()], Expectation::BulkExpected)
}

/// `SET key value` — expects `+OK`.
pub fn set(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Command {
    Command::new(
        [b"SET".to_vec(), key.into(), value.into()],
        Expectation::OkStatusExpected,
    )
}

/// `DEL key` — expects the count of keys removed.
pub fn del(key: impl Into<Vec<u8>>) -> Command {
    Command::new([b"DEL".to_vec(), key.into()], Expectation::IntegerExpected)
}

/// `PING` — replies `+PONG`, a status string but not the literal `OK`
/// that `OkStatusExpected` checks for, so it carries no reply constraint.
pub fn ping() -> Command {
    Command::new([b"PING".to_vec()], Expectation::Unconstrained)
}

/// `QUIT` — the connection closes after this command is answered.
pub fn quit() -> Command {
    Command::new([b"QUIT".to_vec()], Expectation::ConnectionCloseExpected)
}
