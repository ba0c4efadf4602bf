/*!
flickr-oauth1: a Flickr API client built on oauth1-request.

# Overview

This library signs Flickr API requests with OAuth 1.0a (HMAC-SHA1), walks the
user through the token handshake, and keeps the resulting access token in a
cache shared by every persisting `FlickrApi` in the process and stored between
runs.

The network is reached through the [`Transport`] trait, implemented for
`reqwest::blocking::Client`.

# How to use

## Basic usecase 1 - calling the API with a cached token

```ignore
use flickr_oauth1::{AccessLevel, FlickrApi};

let mut flickr = FlickrApi::builder("[API_KEY]", "[API_SECRET]").build()?;

// reuses the token from ~/.flickr when there is one, asks on stdin otherwise
let stdin = std::io::stdin();
flickr.authenticate_console(AccessLevel::Read, &mut stdin.lock(), &mut std::io::stdout())?;

let sets = flickr
    .method("photosets.getList")
    .call(&[("user_id", "73509078@N00")])?;
println!("{:#?}", sets);
```

## Basic usecase 2 - driving the handshake by hand

```ignore
use std::time::Duration;
use flickr_oauth1::{AccessLevel, Callback, Endpoints, Handshake};

let mut handshake = Handshake::new(
    "[API_KEY]",
    "[API_SECRET]",
    Endpoints::default(),
    reqwest::blocking::Client::new(),
);

// step 1: acquire request token & token secret, listening on 127.0.0.1
handshake.get_request_token(Callback::Local)?;

// step 2: send the user to the authorize page
println!("please access to: {}", handshake.auth_url(AccessLevel::Write)?);

// step 3: wait for the browser to come back with the verifier
handshake.wait_for_verifier(Some(Duration::from_secs(300)))?;

// step 4: acquire access token
let token = handshake.get_access_token()?;
println!("authorized as {} ({})", token.username(), token.user_nsid());
```

## Basic usecase 3 - walking every page of a listing

```ignore
use flickr_oauth1::{shorturl, FlickrApi, DEFAULT_PER_PAGE};

let flickr = FlickrApi::builder("[API_KEY]", "[API_SECRET]")
    .cache_responses(true)
    .build()?;

for photo in flickr.walk_set("72157594419397734", DEFAULT_PER_PAGE, &[("extras", "tags")]) {
    let photo = photo?;
    if let Some(id) = photo["id"].as_str().and_then(|id| id.parse().ok()) {
        println!("{}", shorturl::url(id));
    }
}
```

*/
mod access_token;
mod api;
mod call_builder;
mod client;
mod config;
mod error;
mod handshake;
mod listener;
mod lock;
mod request;
mod response_cache;
mod secrets;
pub mod shorturl;
mod signer;
mod sqlite_store;
mod token_cache;
mod token_reader;
mod token_store;
mod walker;
#[cfg(test)]
mod test_support;

// exposed to external program
pub use access_token::{AccessLevel, AccessToken};
pub use api::{ApiResponse, FlickrApi, FlickrApiBuilder, ResponseFormat, StoreKind};
pub use call_builder::{CallBuilder, MethodCaller};
pub use client::{Client, HttpResponse, Transport};
pub use config::{default_token_dir, Endpoints};
pub use error::{
    Error, ListenerError, ListenerResult, LockError, LockResult, Result, SequenceError, SignError,
    SignResult, StoreError, StoreResult, TokenReaderError, TokenReaderResult,
};
pub use handshake::{Callback, Handshake, HandshakeState};
pub use listener::CallbackListener;
pub use lock::FileLock;
pub use request::{Photo, RequestBody, RequestBuilder, SignedRequest};
pub use response_cache::ResponseCache;
pub use secrets::{Secrets, SecretsProvider};
pub use signer::{OAuthParameters, Signer};
pub use sqlite_store::SqliteTokenStore;
pub use token_cache::{CacheKey, MemoryTier, TokenCache};
pub use token_reader::{TokenReader, TokenResponse};
pub use token_store::{FileTokenStore, MemoryTokenStore, TokenStore};
pub use walker::{PageWalker, DEFAULT_PER_PAGE};

// exposed constant variables
/// Represents `oauth_callback`.
pub const OAUTH_CALLBACK_KEY: &str = "oauth_callback";
/// Represents `oauth_verifier`.
pub const OAUTH_VERIFIER_KEY: &str = "oauth_verifier";
/// The `oauth_callback` value asking the service to show the verifier to the
/// user instead of redirecting.
pub const OOB_CALLBACK: &str = "oob";
/// The multipart field carrying the binary of an upload.
pub const PHOTO_FIELD: &str = "photo";

// crate-private constant variables
pub(crate) const OAUTH_TOKEN_KEY: &str = "oauth_token";
pub(crate) const OAUTH_TOKEN_SECRET_KEY: &str = "oauth_token_secret";
