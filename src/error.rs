use std::fmt;
use std::io;
use std::path::PathBuf;

/// Connection-setup step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStage {
    Resolve,
    CreateEndpoint,
    Listen,
    Accept,
    Connect,
    Register,
}

impl fmt::Display for SetupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SetupStage::Resolve => "address resolution",
            SetupStage::CreateEndpoint => "endpoint creation",
            SetupStage::Listen => "listen",
            SetupStage::Accept => "accept",
            SetupStage::Connect => "connect",
            SetupStage::Register => "registration",
        };
        f.write_str(s)
    }
}

/// Transfer primitive that failed mid-loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOp {
    Send,
    Receive,
    Completion,
}

impl fmt::Display for TransferOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransferOp::Send => "send",
            TransferOp::Receive => "receive",
            TransferOp::Completion => "completion",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid arguments: {0}")]
    Argument(String),

    #[error("buffer allocation failed: {0}")]
    Allocation(#[source] io::Error),

    #[error("mapping device resource {path} failed: {source}")]
    DeviceMap {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("connection setup failed during {stage}: {source}")]
    Connection {
        stage: SetupStage,
        #[source]
        source: io::Error,
    },

    #[error("transfer failed in {op}: {source}")]
    Transfer {
        op: TransferOp,
        #[source]
        source: io::Error,
    },
}

impl Error {
    pub fn connection(stage: SetupStage, source: io::Error) -> Self {
        Error::Connection { stage, source }
    }

    pub fn transfer(op: TransferOp, source: io::Error) -> Self {
        Error::Transfer { op, source }
    }

    /// Process exit status for this failure class.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Argument(_) => 1,
            Error::Allocation(_) => 2,
            Error::DeviceMap { .. } => 3,
            Error::Connection { .. } => 4,
            Error::Transfer { .. } => 5,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct_per_class() {
        let errors = [
            Error::Argument("x".into()),
            Error::Allocation(io::Error::from(io::ErrorKind::OutOfMemory)),
            Error::DeviceMap {
                path: "/dev/null".into(),
                source: io::Error::from(io::ErrorKind::NotFound),
            },
            Error::connection(SetupStage::Resolve, io::Error::from(io::ErrorKind::Other)),
            Error::transfer(TransferOp::Send, io::Error::from(io::ErrorKind::Other)),
        ];
        let mut codes: Vec<i32> = errors.iter().map(Error::exit_code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
        assert!(codes.iter().all(|c| *c > 0));
    }

    #[test]
    fn connection_error_names_the_stage() {
        let e = Error::connection(
            SetupStage::Resolve,
            io::Error::new(io::ErrorKind::NotFound, "no path to peer"),
        );
        let msg = e.to_string();
        assert!(msg.contains("address resolution"), "{msg}");
    }
}
