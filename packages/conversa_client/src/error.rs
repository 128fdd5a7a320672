use tokio_tungstenite::tungstenite;

/// Why an outgoing chat message was refused before reaching the socket.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageRejected {
    #[error("message is empty")]
    Empty,

    #[error("message is {len} characters, limit is {max}")]
    TooLong { len: usize, max: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("server is unavailable")]
    Unavailable,

    /// A 401 from an authenticated call. The session has already been cleared.
    #[error("session is no longer authorized")]
    Unauthorized,

    #[error("server responded with status {0}")]
    Status(u16),

    #[error("login failed: {0}")]
    LoginRejected(String),

    #[error("no authenticated session")]
    NotAuthenticated,

    #[error(transparent)]
    Validation(#[from] MessageRejected),

    #[error("connection is not open")]
    NotConnected,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T, E = ClientError> = std::result::Result<T, E>;

impl ClientError {
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_connect() {
            Self::Unavailable
        } else if let Some(status) = err.status() {
            Self::from_status(status.as_u16())
        } else if err.is_decode() {
            Self::Protocol(err.to_string())
        } else {
            Self::Other(err.into())
        }
    }

    pub fn from_tungstenite(err: tungstenite::Error) -> Self {
        match &err {
            tungstenite::Error::Io(io_err)
                if matches!(
                    io_err.kind(),
                    std::io::ErrorKind::ConnectionRefused
                        | std::io::ErrorKind::ConnectionReset
                        | std::io::ErrorKind::ConnectionAborted
                ) =>
            {
                Self::Unavailable
            }
            // Rejected handshakes come back as a plain HTTP response.
            tungstenite::Error::Http(response) => Self::from_status(response.status().as_u16()),
            _ => Self::Other(err.into()),
        }
    }

    pub fn from_status(status: u16) -> Self {
        match status {
            401 => Self::Unauthorized,
            other => Self::Status(other),
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }
}
