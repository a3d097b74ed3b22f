//! Seam that produces fresh `Session`s, so the Runner can reconnect per
//! check and tests can substitute a scripted endpoint.

use std::time::Duration;

use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::session::Session;
use crate::transport::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_RW_TIMEOUT};

/// Produces a connected-and-probed `Session` for a given `Endpoint`.
pub trait ConnectionFactory {
    /// Connects and runs `probe()`, returning a Session ready for
    /// `is_authentication_required` / `authenticate`.
    fn connect(&self, endpoint: Endpoint) -> Result<Session>;
}

/// The production factory: opens a real TCP (or TLS) socket per call.
pub struct DefaultFactory {
    connect_timeout: Duration,
    rw_timeout: Duration,
}

impl DefaultFactory {
    pub fn new() -> DefaultFactory {
        DefaultFactory {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            rw_timeout: DEFAULT_RW_TIMEOUT,
        }
    }

    pub fn with_timeouts(connect_timeout: Duration, rw_timeout: Duration) -> DefaultFactory {
        DefaultFactory {
            connect_timeout,
            rw_timeout,
        }
    }
}

impl Default for DefaultFactory {
    fn default() -> Self {
        DefaultFactory::new()
    }
}

impl ConnectionFactory for DefaultFactory {
    fn connect(&self, endpoint: Endpoint) -> Result<Session> {
        let mut session =
            Session::new(endpoint).with_timeouts(self.connect_timeout, self.rw_timeout);
        session.connect()?;
        session.probe()?;
        Ok(session)
    }
}
