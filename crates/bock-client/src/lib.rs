//! # Bock runtime client
//!
//! The runtime-facing client layer of the Bock container engine. It turns
//! engine intents (create, start, exec, pause, checkpoint, ...) into calls
//! against an external runtime service and turns that service's lifecycle
//! event stream back into ordered, per-container notifications.
//!
//! ## Components
//!
//! - **Engine interface** ([`engine`]): the runtime service as traits
//! - **Error translation** ([`errors`]): engine errors to [`BockError`]
//! - **Registry** ([`registry`]): per-container task and exec handles
//! - **Stdio attachment** ([`stdio`]): stream endpoints and their release
//! - **Events** ([`events`]): supervised, per-container ordered dispatch
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use bock_client::{AttachStdio, Backend, Client, ClientConfig, RuntimeEngine};
//! use bock_oci::Spec;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(
//! #     engine: Arc<dyn RuntimeEngine>,
//! #     backend: Arc<dyn Backend>,
//! #     attacher: &dyn AttachStdio,
//! # ) -> bock_common::BockResult<()> {
//! let client = Client::new(engine, backend, ClientConfig::from_env());
//! let cancel = CancellationToken::new();
//!
//! client.create(&cancel, "my-container", &Spec::default(), None).await?;
//! let pid = client.start(&cancel, "my-container", None, false, attacher).await?;
//! println!("started as pid {pid}");
//!
//! client.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod client;
pub mod config;
pub mod engine;
pub mod errors;
pub mod events;
pub mod registry;
pub mod stdio;

pub use bock_common::{BockError, BockResult, ErrorKind};
pub use client::{Client, Stats, Summary};
pub use config::ClientConfig;
pub use engine::{
    ContentStore, EngineContainer, EngineError, EngineProcess, EngineTask, ExitStatus,
    RuntimeEngine,
};
pub use events::{Backend, EventInfo, EventKind};
pub use registry::INIT_PROCESS;
pub use stdio::{AttachStdio, DirectIo, FifoSet, ProcessIo};
