#![deny(clippy::all)]
#![forbid(unsafe_code)]

//! A library for the Minecraft Java-Edition wire protocol: client, server and proxy building
//! blocks (§1, §2). The three roles share one connection engine (`connection`, `cipher_stream`,
//! `ticker`) and differ only in which endpoint module drives it: [`client`] dials out and performs
//! a login, [`server`] accepts connections and serves `status`/`login`, [`proxy`] pairs a
//! server-role downstream with a client-role upstream and forwards between them.

pub mod cipher_stream;
pub mod client;
pub mod config;
pub mod connection;
pub mod crypto;
pub mod error;
pub mod proxy;
pub mod server;
pub mod session;
pub mod ticker;

/// Installs a [`tracing_subscriber`] `EnvFilter` subscriber reading from `RUST_LOG` (defaulting to
/// `info`). Library consumers that already run their own subscriber don't need this; it exists
/// for examples and integration tests.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_tracing_is_idempotent() {
        init_tracing();
        init_tracing();
    }
}
