//! Asynchronous, non-blocking network communication substrate for a
//! distributed tabular storage system: a pool of reactor threads, each
//! polling its own set of sockets through a platform-native backend
//! (`epoll`, `kqueue`, event ports, or `poll()`), framing messages behind a
//! fixed header, and correlating requests with responses by id.
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! commio = "0.1"
//! ```
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::net::{Ipv4Addr, SocketAddrV4};
//!
//! use commio::{CommConfig, CommFacade, CommEvent};
//!
//! let facade = CommFacade::new(CommConfig::default()).unwrap();
//! let addr = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 15432);
//! facade.listen(addr, &CommConfig::default(), Arc::new(|event: CommEvent| {
//!     println!("{event:?}");
//! })).unwrap();
//! ```

#[macro_use]
mod macros;

pub mod address;
pub mod config;
pub mod error;
pub mod event;
pub mod facade;
pub mod handler;
pub mod handler_map;
pub mod header;
pub mod net;
mod awakener;
mod poll;
pub mod proxy;
mod reactor;
pub mod reactor_pool;
pub mod ready;
pub mod request_cache;
pub mod timer;
pub mod token;

pub use address::CommAddress;
pub use config::{CommConfig, PollBackendKind};
pub use error::{CommError, CommResult};
pub use event::{CommErrorCode, CommEvent, DispatchHandler};
pub use facade::CommFacade;
pub use handler_map::HandlerMap;
pub use header::{flags as header_flags, CommBuf, CommHeader, HEADER_LENGTH};
pub use proxy::{ProxyEntry, ProxyMap, ProxyMapDiff};
pub use ready::Ready;
pub use reactor_pool::ReactorPool;
pub use token::Token;
