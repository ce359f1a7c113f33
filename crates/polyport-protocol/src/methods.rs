//! Chat method names.

use std::fmt;
use std::str::FromStr;

use crate::error::ProtocolError;

/// Wire spelling of every chat method.
pub struct Methods;

impl Methods {
    pub const JOIN: &str = "JOIN";
    pub const LEAVE: &str = "LEAVE";
    pub const POST: &str = "POST";
    pub const GET: &str = "GET";
}

/// A parsed chat method. Parsing is case-insensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Join,
    Leave,
    Post,
    Get,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Join => Methods::JOIN,
            Self::Leave => Methods::LEAVE,
            Self::Post => Methods::POST,
            Self::Get => Methods::GET,
        }
    }
}

impl FromStr for Method {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            Methods::JOIN => Ok(Self::Join),
            Methods::LEAVE => Ok(Self::Leave),
            Methods::POST => Ok(Self::Post),
            Methods::GET => Ok(Self::Get),
            _ => Err(ProtocolError::method_not_allowed(s)),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
