#![doc(html_logo_url = "https://www.rust-lang.org/logos/rust-logo-128x128.png")]
#![doc(html_favicon_url = "https://www.rust-lang.org/favicon.ico")]
//! # Actor Flow
//!
//! > **Mailbox actors and demand-driven pipelines on Tokio.**
//!
//! This crate provides two cooperating layers: a small actor runtime, where
//! cloneable refs feed behaviors running on a bounded worker pool, and a
//! pull-based streaming layer, where values move only when the downstream
//! side asks for them. Both speak one closed [`Command`] protocol.
//!
//! ## 🏗️ Design Philosophy
//!
//! ### Demand before data
//!
//! No stage ever receives a value it did not ask for. Demand (`Pull`) flows
//! upstream one unit at a time, values (`Push`) flow downstream one per
//! unit, and the capacity of the whole chain is fixed by construction. Slow
//! consumers therefore throttle fast producers without any buffering knobs.
//!
//! ### One protocol, closed
//!
//! Every mailbox, dispatcher, and pipe consumes the same `Command` enum.
//! There is no reflection and no downcasting: a stage that receives a
//! signal it has no business with drops it with a trace line, and the
//! compiler knows every variant a handler must consider.
//!
//! ### Replies that cannot double-fire
//!
//! A [`Call`] owns its one-shot reply sender, and fulfilling it consumes
//! the call. Replying twice is not a bug you debug, it is code that does
//! not compile.
//!
//! ## 🗺️ Module Tour
//!
//! ### 1. The actor layer ([`actor`], [`dispatcher`], [`behavior`])
//! - **Role**: unbounded FIFO mailboxes in front of a pooled [`Behavior`].
//! - **Key items**: [`ActorRef`], [`BehaviorDispatcher`], [`DispatchConfig`].
//!
//! ### 2. The pipeline layer ([`graph`], [`source`], [`flow`], [`sink`])
//! - **Role**: assemble source, flow, and sink stages into a [`Runnable`]
//!   pipeline driven purely by demand.
//! - **Key items**: [`Graph`], [`Source`], [`Task`], [`Receiver`].
//!
//! ### 3. The fabric ([`command`], [`pipe`], [`error`])
//! - **Role**: the shared protocol, the per-link signal queues, and the
//!   error taxonomy carried through both layers.
//! - **Key items**: [`Command`], [`Inlet`], [`Outlet`], [`FlowError`].
//!
//! ### 4. Test support ([`mock`], [`telemetry`])
//! - **Role**: scripted doubles and one-line tracing setup.
//!
//! ## 🚀 Quick Start
//!
//! Pipelines read left to right; actors plug in as sources:
//!
//! ```rust
//! use actor_flow::{ActorSource, BehaviorFn, BehaviorDispatcher, DispatchConfig};
//! use actor_flow::{Graph, ToSlice};
//!
//! #[tokio::main]
//! async fn main() {
//!     // an actor that doubles whatever it is asked
//!     let behavior = BehaviorFn::new(|n: u64| Ok(n * 2));
//!     let (dispatcher, handle) =
//!         BehaviorDispatcher::new(behavior, DispatchConfig::default()).unwrap();
//!     tokio::spawn(dispatcher.run());
//!
//!     // a pipeline pulling from it, one request per unit of demand
//!     let pipeline = Graph::from_source(ActorSource::new(handle.actor_ref(), 21))
//!         .take(3)
//!         .to(ToSlice::new());
//!
//!     let run = pipeline.run().await;
//!     assert_eq!(run.result().await.unwrap(), vec![42, 42, 42]);
//!     handle.stop();
//! }
//! ```
//!
//! Logs come out through `tracing`; call [`telemetry::init_tracing`] and
//! set `RUST_LOG` to see the signal traffic:
//!
//! ```bash
//! RUST_LOG=actor_flow=trace cargo test
//! ```

pub mod actor;
pub mod behavior;
pub mod command;
pub mod dispatcher;
pub mod error;
pub mod flow;
pub mod graph;
pub mod mock;
pub mod pipe;
pub mod sink;
pub mod source;
pub mod telemetry;

pub use actor::ActorRef;
pub use behavior::{Behavior, BehaviorFn};
pub use command::{Call, CallResult, Command};
pub use dispatcher::{BehaviorDispatcher, DispatchConfig, DispatcherHandle};
pub use error::FlowError;
pub use flow::{Filter, FlowStage, Map, Take, Task, TaskFn};
pub use graph::{Graph, RunHandle, Runnable};
pub use pipe::{Inlet, Outlet};
pub use sink::{Consumer, ForEach, Ignore, Receiver, ToSlice};
pub use source::{
    channel_source, sequence, ActorSource, ChannelSource, Producer, Sequence, Source, SourceFn,
    SourceStage,
};
pub use telemetry::init_tracing;
