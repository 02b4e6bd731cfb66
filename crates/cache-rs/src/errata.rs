//! Structured, accumulated errors.
//!
//! Loaders push entries and keep going where that is safe; callers decide what to
//! do with the collected list once a command has finished.

use std::fmt;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    /// A line of a span list, volume config or URL list is malformed.
    #[error("line {line}: {message}")]
    Config {
        line: usize,
        code: u16,
        message: String,
    },
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    /// Bad magic, unsupported version or an inconsistent header.
    #[error("{0}")]
    Format(String),
    /// A span without a valid header. It is usable as raw capacity and can be cleared.
    #[error("{0}")]
    Uninitialized(String),
    /// Directory or metadata copies disagree in a way that cannot be resolved.
    #[error("{0}")]
    Consistency(String),
    #[error("{0}")]
    Allocation(String),
    /// A required input (span file, volume file) was not provided.
    #[error("{0}")]
    Input(String),
}

impl CacheError {
    pub fn config(line: usize, code: u16, message: impl Into<String>) -> Self {
        Self::Config {
            line,
            code,
            message: message.into(),
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Numeric code of the entry, stable per category.
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            Self::Config { code, .. } => *code,
            Self::Io { source, .. } => source
                .raw_os_error()
                .and_then(|e| u16::try_from(e).ok())
                .unwrap_or(5),
            Self::Format(_) => 20,
            Self::Uninitialized(_) => 23,
            Self::Consistency(_) => 21,
            Self::Allocation(_) => 15,
            Self::Input(_) => 22,
        }
    }

    /// Whether the entry stops processing of the unit it was raised for.
    ///
    /// Config notes and an uninitialized span are informational: the line or span is
    /// still usable.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::Config { .. } | Self::Uninitialized(_))
    }
}

/// Ordered collection of [`CacheError`] entries.
#[derive(Debug, Default)]
pub struct Errata(Vec<CacheError>);

impl Errata {
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, err: CacheError) {
        self.0.push(err);
    }

    pub fn extend(&mut self, other: Self) {
        self.0.extend(other.0);
    }

    /// `true` if no entry is fatal.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        !self.0.iter().any(CacheError::is_fatal)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CacheError> {
        self.0.iter()
    }
}

impl From<CacheError> for Errata {
    fn from(err: CacheError) -> Self {
        Self(vec![err])
    }
}

impl IntoIterator for Errata {
    type Item = CacheError;
    type IntoIter = std::vec::IntoIter<CacheError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl fmt::Display for Errata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for err in &self.0 {
            writeln!(f, "[{}] {err}", err.code())?;
        }
        Ok(())
    }
}
