//! Per-subsystem error types.
//!
//! Each error implements [`core::fmt::Display`] manually (no `thiserror`,
//! matching the teacher crate's own idiom) and, under `std`, implements
//! [`std::error::Error`].

use alloc::string::String;
use core::fmt;

use bitcoin::OutPoint;

use crate::money::Money;

/// A group or the overall build could not be funded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsufficientFundsError {
    /// Name of the group that could not be funded.
    pub group: String,
    /// The amount still missing after selection.
    pub missing: Money,
}

impl fmt::Display for InsufficientFundsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "insufficient funds in group `{}`: missing {}",
            self.group, self.missing
        )
    }
}

#[cfg(feature = "std")]
impl std::error::Error for InsufficientFundsError {}

/// A coin or key could not be located.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotFoundError {
    /// No coin is known for this outpoint, encountered while processing
    /// the input at `input_index`.
    Coin {
        /// The outpoint that could not be resolved to a coin.
        outpoint: OutPoint,
        /// Index of the input within the transaction being processed.
        input_index: usize,
    },
    /// No private key is known for the given script.
    Key,
}

impl fmt::Display for NotFoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotFoundError::Coin {
                outpoint,
                input_index,
            } => write!(
                f,
                "no coin known for outpoint {outpoint} (input #{input_index})"
            ),
            NotFoundError::Key => write!(f, "no key known for the requested script"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for NotFoundError {}

/// The session was misconfigured for the requested operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// Change is material but no change script is configured for this
    /// money kind.
    MissingChangeScript,
    /// The single OP-RETURN slot is already claimed by another subsystem.
    OpReturnOwnerConflict {
        /// The subsystem that already owns the slot.
        owner: &'static str,
        /// The subsystem that attempted to claim it.
        requested_by: &'static str,
    },
    /// A second, distinct asset id was queued for issuance.
    SecondIssuance,
    /// A non-exchange asset intent was queued after an exchange operation
    /// intent in the same group.
    ExchangeInProgress,
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationError::MissingChangeScript => {
                write!(f, "change is material but no change script is configured")
            }
            ConfigurationError::OpReturnOwnerConflict {
                owner,
                requested_by,
            } => write!(
                f,
                "the OP_RETURN output is already owned by `{owner}`, cannot also be claimed by `{requested_by}`"
            ),
            ConfigurationError::SecondIssuance => {
                write!(f, "only one asset id may be issued per transaction")
            }
            ConfigurationError::ExchangeInProgress => write!(
                f,
                "cannot queue further asset intents after an exchange operation in the same group"
            ),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ConfigurationError {}

/// The color marker payload could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The marker magic tag did not match either recognized value.
    BadTag,
    /// The version field was not 1 or 2.
    BadVersion(u16),
    /// A LEB128 varint used more than 10 bytes or overflowed `u64`.
    VarintOverflow,
    /// A decoded quantity exceeded `2^63 - 1`.
    QuantityTooLarge,
    /// The input ended before the declared payload was fully read.
    UnexpectedEof,
    /// Bytes remained after the payload was fully decoded.
    TrailingBytes,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::BadTag => write!(f, "marker tag did not match"),
            DecodeError::BadVersion(v) => write!(f, "unsupported marker version {v}"),
            DecodeError::VarintOverflow => write!(f, "varint exceeded 10 bytes or overflowed u64"),
            DecodeError::QuantityTooLarge => write!(f, "quantity exceeded 2^63 - 1"),
            DecodeError::UnexpectedEof => write!(f, "payload ended before expected"),
            DecodeError::TrailingBytes => write!(f, "trailing bytes after decoded payload"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DecodeError {}

/// Signing failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigningError {
    /// No coin or key was found; see [`NotFoundError`].
    NotFound(NotFoundError),
    /// The output script did not match any known template.
    UnknownTemplate,
    /// A multisig script could not be parsed.
    MalformedScript,
}

impl fmt::Display for SigningError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SigningError::NotFound(e) => write!(f, "{e}"),
            SigningError::UnknownTemplate => {
                write!(f, "output script did not match any known template")
            }
            SigningError::MalformedScript => write!(f, "script could not be parsed"),
        }
    }
}

impl From<NotFoundError> for SigningError {
    fn from(e: NotFoundError) -> Self {
        SigningError::NotFound(e)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for SigningError {}

/// Top-level error produced by [`crate::TransactionBuilder::build`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// See [`InsufficientFundsError`].
    InsufficientFunds(InsufficientFundsError),
    /// See [`ConfigurationError`].
    Configuration(ConfigurationError),
    /// See [`SigningError`].
    Signing(SigningError),
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildError::InsufficientFunds(e) => write!(f, "{e}"),
            BuildError::Configuration(e) => write!(f, "{e}"),
            BuildError::Signing(e) => write!(f, "{e}"),
        }
    }
}

impl From<InsufficientFundsError> for BuildError {
    fn from(e: InsufficientFundsError) -> Self {
        BuildError::InsufficientFunds(e)
    }
}

impl From<ConfigurationError> for BuildError {
    fn from(e: ConfigurationError) -> Self {
        BuildError::Configuration(e)
    }
}

impl From<SigningError> for BuildError {
    fn from(e: SigningError) -> Self {
        BuildError::Signing(e)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for BuildError {}
