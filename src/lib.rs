#![warn(future_incompatible, nonstandard_style, rust_2018_idioms, unused)]
#![warn(clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::wildcard_imports,
    clippy::similar_names,
    clippy::cast_possible_truncation,
    clippy::too_many_lines,
)]

pub mod client;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod frame;
pub mod huffman;
pub mod lifecycle;
pub mod message;
pub mod qpack;
pub mod registry;
pub mod response;
pub mod stream;
pub mod transport;
pub mod varint;
pub mod worker;

pub use client::{ClientEngine, IncomingResponse, OutgoingRequest};
pub use config::ServerConfig;
pub use dispatcher::Dispatcher;
pub use error::{Code, Error, ErrorLevel, FailureClass};
pub use lifecycle::{Lifecycle, LifecycleState};
pub use message::Request;
pub use response::Response;
pub use transport::{Event, SendToken, TransportHandle};
pub use worker::Handler;
