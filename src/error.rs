use std::{io, path::PathBuf, time::Duration};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;
pub type SignResult<T> = std::result::Result<T, SignError>;
pub type TokenReaderResult<T> = std::result::Result<T, TokenReaderError>;
pub type ListenerResult<T> = std::result::Result<T, ListenerError>;
pub type LockResult<T> = std::result::Result<T, LockError>;
pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("token acquisition failed : {0}")]
    TokenReader(#[from] TokenReaderError),
    #[error("OAuth sign failed : {0}")]
    Signer(#[from] SignError),
    #[error("request failed : {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("{url} responded with status {status} : {body}")]
    Remote {
        url: String,
        status: u16,
        body: String,
    },
    #[error("{method} failed : error {code:?}: {message}")]
    Api {
        method: String,
        code: Option<i64>,
        message: String,
    },
    #[error("{method} answered without page information")]
    MissingPages { method: String },
    #[error("handshake out of order : {0}")]
    Sequence(#[from] SequenceError),
    #[error("callback listener failed : {0}")]
    Listener(#[from] ListenerError),
    #[error("token lock failed : {0}")]
    Lock(#[from] LockError),
    #[error("token store unusable : {0}")]
    Store(#[from] StoreError),
    #[error("invalid argument : {0}")]
    InvalidArgument(String),
    #[error("I/O error : {0}")]
    Io(#[from] io::Error),
    #[error("malformed JSON response : {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid URL : {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Error, Debug, Clone)]
pub enum SignError {
    #[error("neither a consumer secret nor a token secret is available to sign {0}")]
    MissingSecret(String),
}

#[derive(Error, Debug, Clone)]
pub enum TokenReaderError {
    #[error("response has malformed format: not found {0} in {1}")]
    TokenKeyNotFound(&'static str, String),
    #[error("response carries an unsupported access level {0}")]
    InvalidAccessLevel(String),
}

/// A handshake step was requested before the step it depends on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SequenceError {
    #[error("no request token, get_request_token must be called first")]
    NoRequestToken,
    #[error("no verifier, the user has not authorized the request token yet")]
    NoVerifier,
    #[error("requested permissions are unknown, auth_url must be called first")]
    UnknownPermissions,
    #[error("no callback listener is running, the request token was obtained with another callback")]
    NoListener,
}

#[derive(Error, Debug)]
pub enum ListenerError {
    #[error("no free port found on {0}")]
    PortsExhausted(String),
    #[error("no callback arrived within {0:?}")]
    Timeout(Duration),
    #[error("callback request lacks {0}")]
    MissingParameter(&'static str),
    #[error("callback carried oauth_token {received}, expected {expected}")]
    TokenMismatch { expected: String, received: String },
    #[error("callback request is malformed : {0}")]
    MalformedRequest(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Error, Debug)]
pub enum LockError {
    #[error("could not acquire {path} within {waited:?}")]
    Timeout { path: PathBuf, waited: Duration },
    #[error("{path} is held by {owner}, not by this process")]
    NotOwner { path: PathBuf, owner: String },
    #[error("lock I/O on {path} failed : {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{path} is corrupt : {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("{path} has schema version {found}, expected {expected}")]
    VersionMismatch {
        path: PathBuf,
        found: i64,
        expected: i64,
    },
    #[error("token store query failed : {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("token store I/O failed : {0}")]
    Io(#[from] io::Error),
}
