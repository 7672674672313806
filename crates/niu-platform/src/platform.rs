//! Platform identity sent with every signed request.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Client platform. The numeric id travels in the `x-platform` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Web browser (8).
    #[default]
    Browser,
    /// macOS desktop shell (4).
    Mac,
    /// Windows desktop shell (6).
    Win,
    /// Linux desktop shell (7).
    Linux,
}

impl Platform {
    /// Wire id.
    pub fn id(self) -> u8 {
        match self {
            Self::Browser => 8,
            Self::Mac => 4,
            Self::Win => 6,
            Self::Linux => 7,
        }
    }

    /// Parse a wire id.
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            8 => Some(Self::Browser),
            4 => Some(Self::Mac),
            6 => Some(Self::Win),
            7 => Some(Self::Linux),
            _ => None,
        }
    }

    /// Desktop platform for the compiling OS, falling back to `Browser`.
    pub fn native() -> Self {
        match std::env::consts::OS {
            "macos" => Self::Mac,
            "windows" => Self::Win,
            "linux" => Self::Linux,
            _ => Self::Browser,
        }
    }

    /// Short name: `web`, `mac`, `win` or `linux`.
    pub fn name(self) -> &'static str {
        match self {
            Self::Browser => "web",
            Self::Mac => "mac",
            Self::Win => "win",
            Self::Linux => "linux",
        }
    }

    /// Whether requests carry a bearer token (every platform but the browser).
    pub fn is_desktop(self) -> bool {
        self != Self::Browser
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Platform {
    type Err = Error;

    /// Accepts a name (`web`, `browser`, `mac`, `win`, `windows`, `linux`) or a wire id.
    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_ascii_lowercase();
        match lower.as_str() {
            "web" | "browser" => Ok(Self::Browser),
            "mac" | "macos" => Ok(Self::Mac),
            "win" | "windows" => Ok(Self::Win),
            "linux" => Ok(Self::Linux),
            other => other
                .parse::<u8>()
                .ok()
                .and_then(Self::from_id)
                .ok_or_else(|| Error::UnknownPlatform(s.to_string())),
        }
    }
}
