//! Asynchronous Postgres Client
//!
//! `pgfsm` speaks the postgres frontend/backend protocol directly. Each connection is
//! a state machine driven by a spawned task, operations are queued and run in order,
//! and their results are delivered to callbacks as immutable [`Resultset`]s.
//!
//! # Examples
//!
//! ```no_run
//! use pgfsm::{Connection, ConnectionCallbacks, ConnectionOptions, Params};
//!
//! # async fn app() -> pgfsm::Result<()> {
//! let conn = Connection::connect(ConnectionOptions::from_env(), ConnectionCallbacks::new())?;
//!
//! let tx = conn.begin(|| {}, |err| eprintln!("begin failed: {err}"));
//!
//! tx.execute_prepared(
//!     "insert into post(name) values($1) returning id",
//!     Params::new().bind("Foo"),
//!     |result, _| {
//!         let id = result.row(0).get::<i32>(0).unwrap();
//!         println!("inserted {id}");
//!     },
//!     |err| eprintln!("insert failed: {err}"),
//! );
//!
//! tx.commit();
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - `log` (default): log connection events, errors and notices through [`log`][1]
//! - `verbose`: trace every state transition through [`tracing`][2]
//!
//! [1]: https://docs.rs/log
//! [2]: https://docs.rs/tracing

pub mod common;
mod ext;

// Protocol
pub mod postgres;

// Encoding
pub mod value;
pub mod encode;

// Component
pub mod resultset;
pub mod statement;
mod machine;

// Connection
pub mod transport;
pub mod net;
pub mod connection;

mod error;

pub use postgres::{Oid, PgFormat, PgType, QueryError, SqlState};
pub use value::{DecodeError, EncodeError, FromValue, TypeRegistry, Value};
pub use encode::Params;
pub use resultset::{Field, FromRow, Resultset, Row};
pub use machine::{Terminated, TransactionAborted, UnsupportedAuth};
pub use connection::{
    ConfigError, Connection, ConnectionCallbacks, ConnectionOptions, Transaction,
};
pub use error::{Error, ErrorKind, Result};
