//! Asynchronous client on top of tokio, mirroring the blocking [`Connection`](crate::Connection).

pub(crate) mod connection;
pub(crate) mod resource;
pub(crate) mod transport;

pub use connection::Connection;
pub use resource::AsResource;
