mod escape_writer;
#[allow(clippy::module_inception)]
mod transport;

pub(crate) use self::transport::Transport;
