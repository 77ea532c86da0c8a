//! Runtime errors.

use std::fmt;
use std::io;
use std::net::SocketAddr;

use super::State;
use crate::config::ConfigError;
use crate::executor::PoolError;
use crate::router::{HookError, Phase};

/// Error starting the runtime.
#[derive(Debug)]
pub enum RuntimeError {
    /// The listening socket could not be bound.
    Bind { addr: SocketAddr, source: io::Error },
    /// A thread group could not be created.
    Io(io::Error),
    /// The worker pool could not be created.
    Pool(PoolError),
    /// A lifecycle hook failed.
    Hook { phase: Phase, source: HookError },
    /// `start` called on a runtime that is not `Created`.
    InvalidState(State),
    /// Server configuration rejected.
    Config(ConfigError),
}

impl RuntimeError {
    /// True when the listen address was already taken.
    pub fn is_addr_in_use(&self) -> bool {
        matches!(self, RuntimeError::Bind { source, .. } if source.kind() == io::ErrorKind::AddrInUse)
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::Bind { addr, source } if source.kind() == io::ErrorKind::AddrInUse => {
                write!(f, "address already in use: {}", addr)
            }
            RuntimeError::Bind { addr, source } => write!(f, "failed to bind {}: {}", addr, source),
            RuntimeError::Io(e) => write!(f, "I/O error: {}", e),
            RuntimeError::Pool(e) => write!(f, "worker pool: {}", e),
            RuntimeError::Hook { phase, source } => write!(f, "{} hook failed: {}", phase, source),
            RuntimeError::InvalidState(state) => {
                write!(f, "runtime cannot start from state {}", state)
            }
            RuntimeError::Config(e) => write!(f, "configuration: {}", e),
        }
    }
}

impl std::error::Error for RuntimeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RuntimeError::Bind { source, .. } => Some(source),
            RuntimeError::Io(e) => Some(e),
            RuntimeError::Pool(e) => Some(e),
            RuntimeError::Hook { source, .. } => Some(source.as_ref()),
            RuntimeError::Config(e) => Some(e),
            RuntimeError::InvalidState(_) => None,
        }
    }
}

impl From<io::Error> for RuntimeError {
    fn from(e: io::Error) -> Self {
        RuntimeError::Io(e)
    }
}

impl From<PoolError> for RuntimeError {
    fn from(e: PoolError) -> Self {
        RuntimeError::Pool(e)
    }
}

impl From<ConfigError> for RuntimeError {
    fn from(e: ConfigError) -> Self {
        RuntimeError::Config(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_message() {
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let err = RuntimeError::Bind {
            addr,
            source: io::Error::from(io::ErrorKind::AddrInUse),
        };
        assert!(err.is_addr_in_use());
        assert_eq!(err.to_string(), "address already in use: 127.0.0.1:8080");

        let err = RuntimeError::InvalidState(State::Ready);
        assert_eq!(err.to_string(), "runtime cannot start from state Ready");
        assert!(!err.is_addr_in_use());
    }
}
