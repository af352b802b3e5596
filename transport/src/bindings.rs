use std::net::TcpListener;

use eyre::Result;

/// Find a free TCP port by asking the OS for an ephemeral one. Test helper.
pub fn get_random_tcp_port() -> Result<u16> {
    for _ in 0..50 {
        match TcpListener::bind("127.0.0.1:0") {
            Ok(listener) => return Ok(listener.local_addr()?.port()),
            Err(e) => {
                tracing::warn!(%e, "binding");
            }
        }
    }

    eyre::bail!("could not get free port");
}
