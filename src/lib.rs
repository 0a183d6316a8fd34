// #![deny(rust_2018_idioms, warnings)]
#![deny(clippy::all, clippy::pedantic)]
#![allow(
    clippy::let_and_return,
    clippy::missing_errors_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
)]

mod client;
pub use client::InfluxDbClient;

mod error;
pub use error::{Error, Result};

mod params;
pub use params::{ConnectionParams, Precision};

mod poller;
pub use poller::{ActionHandle, ActionResult, Direction, PollResult, Poller};

mod queue;
pub use queue::OutboundQueue;

mod request;
pub use request::{HttpRequest, HttpRequestBody};

mod socket;
pub use socket::TcpSocket;
