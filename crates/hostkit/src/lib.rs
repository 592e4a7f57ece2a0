//! # Hostkit
//!
//! Primitive operations against the hosts a provisioning run converges.
//!
//! A [`Transport`] offers file, command and account operations on one host.
//! Three implementations are provided:
//!
//! - [`LocalTransport`]: the machine we run on
//! - [`RemoteTransport`]: a machine reached through a [`SessionPool`],
//!   usually [`SshPool`]
//! - [`DryTransport`]: an in-memory overlay that answers reads from what the
//!   run has already done and falls through to a real transport otherwise,
//!   without ever changing it
//!
//! All three report a missing path or account as [`Error::NotFound`].
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use hostkit::{DryTransport, LocalTransport, Transport};
//!
//! let dry = DryTransport::new(Arc::new(LocalTransport::new()));
//! dry.write_file("/etc/motd", b"hello\n")?;
//! assert_eq!(dry.read_file("/etc/motd")?, b"hello\n"); // real file untouched
//! ```

pub mod accounts;
pub mod backend;
pub mod commands;
pub mod error;
pub mod shell;
pub mod stat;
pub mod types;

pub use backend::dry::DryTransport;
pub use backend::local::LocalTransport;
pub use backend::remote::{RemoteTransport, SessionPool, SshPool};
pub use backend::{Transport, parent};
pub use error::{Error, Result, is_not_found};
pub use types::{Cmd, CmdOutput, FileInfo, Group, Info, Password, User};
