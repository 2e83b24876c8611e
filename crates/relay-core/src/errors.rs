/// Why an inbound frame could not be turned into a [`crate::Request`].
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed envelope: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("unknown command: {0:?}")]
    UnknownCommand(String),

    #[error("invalid body for {cmd}: {source}")]
    InvalidBody {
        cmd: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl DecodeError {
    /// Short classification string for logging/metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed",
            Self::UnknownCommand(_) => "unknown_command",
            Self::InvalidBody { .. } => "invalid_body",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("address must not be empty")]
    Empty,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_strings() {
        let malformed = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert_eq!(DecodeError::Malformed(malformed).reason(), "malformed");
        assert_eq!(
            DecodeError::UnknownCommand("msg.delete".into()).reason(),
            "unknown_command"
        );
    }

    #[test]
    fn unknown_command_display_quotes_name() {
        let err = DecodeError::UnknownCommand("msg.delete".into());
        assert_eq!(err.to_string(), "unknown command: \"msg.delete\"");
    }
}
