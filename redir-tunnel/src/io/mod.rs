//! I/O module: moving bytes between the client and the tunnel

mod relay;

pub use relay::{
    relay, RelayOutcome, CLIENT_TO_UPSTREAM, DEFAULT_BUFFER_SIZE, UPSTREAM_TO_CLIENT,
};
