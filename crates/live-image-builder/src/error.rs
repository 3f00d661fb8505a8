use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A flavor, build-type or architecture document does not exist.
    ConfigNotFound,
    /// A configuration document is not valid TOML (or JSON for the version map).
    ConfigParse,
    /// A CLI value or an assembled field failed validation.
    Validation,
    /// live-build, the raw image helper or the image converter failed.
    ExternalTool,
    Io,
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    msg: String,
}

impl Error {
    pub fn new<M: Into<String>>(kind: ErrorKind, msg: M) -> Self {
        Self {
            kind,
            msg: msg.into(),
        }
    }

    pub fn msg<M: Into<String>>(msg: M) -> Self {
        Self::new(ErrorKind::Io, msg)
    }

    pub fn not_found<M: Into<String>>(msg: M) -> Self {
        Self::new(ErrorKind::ConfigNotFound, msg)
    }

    pub fn parse<M: Into<String>>(msg: M) -> Self {
        Self::new(ErrorKind::ConfigParse, msg)
    }

    pub fn validation<M: Into<String>>(msg: M) -> Self {
        Self::new(ErrorKind::Validation, msg)
    }

    pub fn external<M: Into<String>>(msg: M) -> Self {
        Self::new(ErrorKind::ExternalTool, msg)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.msg)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::msg(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::parse(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::parse(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
