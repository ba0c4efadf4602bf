use std::path::PathBuf;

/// Directory below the home directory where tokens are kept by default.
const TOKEN_DIR_NAME: &str = ".flickr";

/// The URLs the client talks to.
///
/// `Endpoints::default()` points at Flickr; the setters exist for test
/// servers and API-compatible services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub(crate) request_token: String,
    pub(crate) authorize: String,
    pub(crate) access_token: String,
    pub(crate) rest: String,
    pub(crate) upload: String,
    pub(crate) replace: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Endpoints {
            request_token: "https://www.flickr.com/services/oauth/request_token".to_string(),
            authorize: "https://www.flickr.com/services/oauth/authorize".to_string(),
            access_token: "https://www.flickr.com/services/oauth/access_token".to_string(),
            rest: "https://api.flickr.com/services/rest/".to_string(),
            upload: "https://up.flickr.com/services/upload/".to_string(),
            replace: "https://up.flickr.com/services/replace/".to_string(),
        }
    }
}

impl Endpoints {
    /// set the request token endpoint
    pub fn request_token<U: Into<String>>(self, url: U) -> Self {
        Endpoints {
            request_token: url.into(),
            ..self
        }
    }

    /// set the user authorization page
    pub fn authorize<U: Into<String>>(self, url: U) -> Self {
        Endpoints {
            authorize: url.into(),
            ..self
        }
    }

    /// set the access token endpoint
    pub fn access_token<U: Into<String>>(self, url: U) -> Self {
        Endpoints {
            access_token: url.into(),
            ..self
        }
    }

    /// set the REST endpoint
    pub fn rest<U: Into<String>>(self, url: U) -> Self {
        Endpoints {
            rest: url.into(),
            ..self
        }
    }

    /// set the upload endpoint
    pub fn upload<U: Into<String>>(self, url: U) -> Self {
        Endpoints {
            upload: url.into(),
            ..self
        }
    }

    /// set the replace endpoint
    pub fn replace<U: Into<String>>(self, url: U) -> Self {
        Endpoints {
            replace: url.into(),
            ..self
        }
    }
}

/// `~/.flickr`, or `.flickr` in the working directory when no home directory
/// can be determined.
pub fn default_token_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(TOKEN_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(TOKEN_DIR_NAME))
}
