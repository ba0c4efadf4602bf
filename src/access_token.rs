use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::TokenReaderError;

/// Permission level granted to an access token.
///
/// Levels are totally ordered: `Read < Write < Delete`, and a token holding a
/// level implies every lower one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    Read,
    Write,
    Delete,
}

impl AccessLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            AccessLevel::Read => "read",
            AccessLevel::Write => "write",
            AccessLevel::Delete => "delete",
        }
    }
}

impl Default for AccessLevel {
    fn default() -> Self {
        AccessLevel::Read
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessLevel {
    type Err = TokenReaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "read" => Ok(AccessLevel::Read),
            "write" => Ok(AccessLevel::Write),
            "delete" => Ok(AccessLevel::Delete),
            _ => Err(TokenReaderError::InvalidAccessLevel(s.to_string())),
        }
    }
}

/// An authorized identity: the token pair plus the level it was granted at.
///
/// Instances are never mutated; a new grant means a new `AccessToken`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    token: String,
    token_secret: String,
    access_level: AccessLevel,
    #[serde(default)]
    fullname: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    user_nsid: String,
}

impl AccessToken {
    pub fn new<TToken, TSecret>(token: TToken, token_secret: TSecret, access_level: AccessLevel) -> Self
    where
        TToken: Into<String>,
        TSecret: Into<String>,
    {
        AccessToken {
            token: token.into(),
            token_secret: token_secret.into(),
            access_level,
            fullname: String::new(),
            username: String::new(),
            user_nsid: String::new(),
        }
    }

    /// set the informational user fields
    pub fn with_user<TFull, TUser, TNsid>(self, fullname: TFull, username: TUser, user_nsid: TNsid) -> Self
    where
        TFull: Into<String>,
        TUser: Into<String>,
        TNsid: Into<String>,
    {
        AccessToken {
            fullname: fullname.into(),
            username: username.into(),
            user_nsid: user_nsid.into(),
            ..self
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn token_secret(&self) -> &str {
        &self.token_secret
    }

    pub fn access_level(&self) -> AccessLevel {
        self.access_level
    }

    pub fn fullname(&self) -> &str {
        &self.fullname
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn user_nsid(&self) -> &str {
        &self.user_nsid
    }

    /// Returns true iff this token's level implies `requested`.
    pub fn has_level(&self, requested: AccessLevel) -> bool {
        requested <= self.access_level
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &self.token)
            .field("token_secret", &"xxx")
            .field("access_level", &self.access_level)
            .field("fullname", &self.fullname)
            .field("username", &self.username)
            .field("user_nsid", &self.user_nsid)
            .finish()
    }
}
