use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use http::Method;
use log::{debug, info, warn};
use reqwest::blocking::Client as ReqwestClient;
use serde_json::Value;

use crate::{
    default_token_dir, AccessLevel, AccessToken, CacheKey, CallBuilder, Callback, Client,
    Endpoints, Error, FileTokenStore, Handshake, MemoryTier, MemoryTokenStore, MethodCaller,
    OAuthParameters, Photo, ResponseCache, Result, SqliteTokenStore, TokenCache, Transport,
};
use crate::response_cache::cache_key;

const CHECK_TOKEN_METHOD: &str = "flickr.auth.oauth.checkToken";
const METHOD_KEY: &str = "method";
const FORMAT_KEY: &str = "format";
const API_KEY: &str = "api_key";
const JSONCALLBACK_KEY: &str = "jsoncallback";
const NOJSONCALLBACK_KEY: &str = "nojsoncallback";
const PHOTO_ID_KEY: &str = "photo_id";
const REST_FORMAT: &str = "rest";

/// How API responses are requested and handed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    /// `format=json`, parsed; `stat=fail` becomes `Error::Api`.
    ParsedJson,
    /// `format=json`, returned as text.
    Json,
    /// `format=rest`, the XML returned as text.
    Rest,
}

impl Default for ResponseFormat {
    fn default() -> Self {
        ResponseFormat::ParsedJson
    }
}

impl ResponseFormat {
    /// The `format` parameter sent to the service.
    pub fn request_value(self) -> &'static str {
        match self {
            ResponseFormat::ParsedJson | ResponseFormat::Json => "json",
            ResponseFormat::Rest => REST_FORMAT,
        }
    }

    fn parse(self, method: &str, body: String) -> Result<ApiResponse> {
        if self != ResponseFormat::ParsedJson {
            return Ok(ApiResponse::Text(body));
        }
        let parsed: Value = serde_json::from_str(&body)?;
        if parsed["stat"] == "fail" {
            return Err(Error::Api {
                method: method.to_string(),
                code: parsed["code"].as_i64(),
                message: parsed["message"].as_str().unwrap_or_default().to_string(),
            });
        }
        Ok(ApiResponse::Parsed(parsed))
    }
}

/// The answer to an API call.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiResponse {
    Parsed(Value),
    Text(String),
}

impl ApiResponse {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ApiResponse::Parsed(value) => Some(value),
            ApiResponse::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ApiResponse::Parsed(_) => None,
            ApiResponse::Text(text) => Some(text),
        }
    }
}

/// Where `FlickrApi` keeps tokens between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// `oauth-tokens.sqlite` in the token directory.
    Sqlite,
    /// One file per token below the token directory.
    File,
    /// Nowhere: tokens last as long as this `FlickrApi`.
    Memory,
}

#[derive(Debug)]
pub struct FlickrApiBuilder<T: Transport> {
    api_key: String,
    secret: String,
    transport: T,
    lookup_id: String,
    format: ResponseFormat,
    store: StoreKind,
    token_dir: Option<PathBuf>,
    token: Option<AccessToken>,
    endpoints: Endpoints,
    memory: Option<Arc<MemoryTier>>,
    parameters: OAuthParameters<'static>,
    responses: Option<ResponseCache>,
}

impl<T: Transport> FlickrApiBuilder<T> {
    pub fn new<K: Into<String>, S: Into<String>>(api_key: K, secret: S, transport: T) -> Self {
        FlickrApiBuilder {
            api_key: api_key.into(),
            secret: secret.into(),
            transport,
            lookup_id: String::new(),
            format: ResponseFormat::default(),
            store: StoreKind::Sqlite,
            token_dir: None,
            token: None,
            endpoints: Endpoints::default(),
            memory: None,
            parameters: OAuthParameters::new(),
            responses: None,
        }
    }

    /// Keeps the token of `username` apart from other users of the same API
    /// key.
    pub fn username<U: Into<String>>(self, username: U) -> Self {
        FlickrApiBuilder {
            lookup_id: username.into(),
            ..self
        }
    }

    pub fn format(self, format: ResponseFormat) -> Self {
        FlickrApiBuilder { format, ..self }
    }

    pub fn store(self, store: StoreKind) -> Self {
        FlickrApiBuilder { store, ..self }
    }

    /// `false` keeps tokens in memory only.
    pub fn store_token(self, store_token: bool) -> Self {
        if store_token {
            self
        } else {
            self.store(StoreKind::Memory)
        }
    }

    /// Directory for the durable stores, `~/.flickr` by default.
    pub fn token_dir<P: Into<PathBuf>>(self, token_dir: P) -> Self {
        FlickrApiBuilder {
            token_dir: Some(token_dir.into()),
            ..self
        }
    }

    /// Starts out authorized with `token`, which is then kept by this
    /// instance only.
    pub fn token(self, token: AccessToken) -> Self {
        FlickrApiBuilder {
            token: Some(token),
            store: StoreKind::Memory,
            ..self
        }
    }

    pub fn endpoints(self, endpoints: Endpoints) -> Self {
        FlickrApiBuilder { endpoints, ..self }
    }

    /// Uses `memory` instead of the process-wide memory tier.
    pub fn memory_tier(self, memory: Arc<MemoryTier>) -> Self {
        FlickrApiBuilder {
            memory: Some(memory),
            ..self
        }
    }

    pub fn oauth_parameters(self, parameters: OAuthParameters<'static>) -> Self {
        FlickrApiBuilder { parameters, ..self }
    }

    /// `true` answers repeated calls from a `ResponseCache` with default
    /// limits.
    pub fn cache_responses(self, cache: bool) -> Self {
        FlickrApiBuilder {
            responses: if cache { Some(ResponseCache::new()) } else { None },
            ..self
        }
    }

    pub fn response_cache(self, cache: ResponseCache) -> Self {
        FlickrApiBuilder {
            responses: Some(cache),
            ..self
        }
    }

    pub fn transport<U: Transport>(self, transport: U) -> FlickrApiBuilder<U> {
        FlickrApiBuilder {
            api_key: self.api_key,
            secret: self.secret,
            transport,
            lookup_id: self.lookup_id,
            format: self.format,
            store: self.store,
            token_dir: self.token_dir,
            token: self.token,
            endpoints: self.endpoints,
            memory: self.memory,
            parameters: self.parameters,
            responses: self.responses,
        }
    }

    /// Opens the token store and restores a cached token, if any.
    pub fn build(self) -> Result<FlickrApi<T>> {
        let key = CacheKey::with_lookup(self.api_key.as_str(), self.lookup_id);
        let dir = self.token_dir.unwrap_or_else(default_token_dir);
        let cache = match self.store {
            StoreKind::Sqlite => TokenCache::new(key, SqliteTokenStore::open(&dir)?),
            StoreKind::File => TokenCache::new(key, FileTokenStore::new(dir)),
            StoreKind::Memory => TokenCache::new(key, MemoryTokenStore),
        };
        // tokens that are never persisted must not reach other instances
        // through the process-wide tier
        let memory = match (self.memory, self.store) {
            (Some(memory), _) => memory,
            (None, StoreKind::Memory) => MemoryTier::new(),
            (None, _) => MemoryTier::global(),
        };
        let cache = cache.with_memory(memory);

        let mut handshake = Handshake::new(self.api_key, self.secret, self.endpoints, self.transport)
            .with_oauth_parameters(self.parameters);
        if let Some(token) = self.token {
            cache.set(token.clone())?;
            handshake.set_token(token);
        } else if let Some(token) = cache.get()? {
            debug!("using cached token for {:?}", cache.key());
            handshake.set_token(token);
        }

        Ok(FlickrApi {
            handshake,
            cache,
            format: self.format,
            responses: self.responses,
        })
    }
}

/// The Flickr API: signed calls, uploads and the authorization flows, with
/// the access token kept in a `TokenCache`.
#[derive(Debug)]
pub struct FlickrApi<T: Transport = ReqwestClient> {
    handshake: Handshake<T>,
    cache: TokenCache,
    format: ResponseFormat,
    responses: Option<ResponseCache>,
}

impl FlickrApi<ReqwestClient> {
    /// A builder talking to Flickr through a default reqwest client.
    pub fn builder<K: Into<String>, S: Into<String>>(api_key: K, secret: S) -> FlickrApiBuilder<ReqwestClient> {
        FlickrApiBuilder::new(api_key, secret, ReqwestClient::new())
    }
}

impl<T: Transport> FlickrApi<T> {
    pub fn handshake(&self) -> &Handshake<T> {
        &self.handshake
    }

    pub fn token_cache(&self) -> &TokenCache {
        &self.cache
    }

    pub fn format(&self) -> ResponseFormat {
        self.format
    }

    pub fn access_token(&self) -> Option<&AccessToken> {
        self.handshake.access_token()
    }

    pub fn response_cache(&self) -> Option<&ResponseCache> {
        self.responses.as_ref()
    }

    /// A `CallBuilder` for `name`, written either dotted (`photos.getInfo`)
    /// or with underscores (`photos_getInfo`).
    pub fn method(&self, name: &str) -> CallBuilder<'_, Self> {
        let name = name.replace('_', ".");
        if name.starts_with("flickr.") {
            CallBuilder::with_name(self, name)
        } else {
            CallBuilder::new(self).descend(&name)
        }
    }

    /// Calls `method` with `params`.
    ///
    /// `method`, `format`, `nojsoncallback` (unless a `jsoncallback` is
    /// given) and `api_key` are added unless `params` has them already. When
    /// the caller picks the `format`, the response comes back as text. With
    /// a response cache, a call with the same parameters is answered from it
    /// until the entry expires.
    pub fn call(&self, method: &str, params: &[(&str, &str)]) -> Result<ApiResponse> {
        self.call_as(method, params, self.format)
    }

    pub(crate) fn call_as(
        &self,
        method: &str,
        params: &[(&str, &str)],
        format: ResponseFormat,
    ) -> Result<ApiResponse> {
        let mut query: Vec<(&str, &str)> = params.to_vec();
        supply_default(&mut query, METHOD_KEY, method);
        supply_default(&mut query, FORMAT_KEY, format.request_value());
        if !has_key(params, JSONCALLBACK_KEY) {
            supply_default(&mut query, NOJSONCALLBACK_KEY, "1");
        }
        supply_default(&mut query, API_KEY, self.handshake.consumer_key());

        let key = cache_key(&query);
        let body = match self.responses.as_ref().and_then(|cache| cache.get(&key)) {
            Some(body) => {
                debug!("{} answered from the response cache", method);
                body
            }
            None => {
                info!("calling {}", method);
                let url = self.handshake.endpoints().rest.as_str();
                let secrets = self.handshake.secrets();
                let request = Client::with_params(&secrets, self.handshake.oauth_parameters().clone())
                    .request(Method::GET, url)?
                    .query(&query)?
                    .build()?;
                let body = self.handshake.transport().send(request)?.error_for_status(url)?.body;
                if let Some(cache) = &self.responses {
                    cache.set(key, body.clone());
                }
                body
            }
        };

        if has_key(params, FORMAT_KEY) {
            return Ok(ApiResponse::Text(body));
        }
        format.parse(method, body)
    }

    /// Uploads a new photo. The service answers uploads in XML, which is
    /// returned as text; the only `format` accepted in `params` is `rest`.
    pub fn upload(&self, photo: Photo, params: &[(&str, &str)]) -> Result<ApiResponse> {
        self.upload_to(&self.handshake.endpoints().upload, photo, params.to_vec())
    }

    /// Replaces the binary of photo `photo_id`.
    pub fn replace(&self, photo: Photo, photo_id: &str, params: &[(&str, &str)]) -> Result<ApiResponse> {
        if photo_id.is_empty() {
            return Err(Error::InvalidArgument("photo_id must be specified".to_string()));
        }
        let mut fields = params.to_vec();
        fields.retain(|(k, _)| *k != PHOTO_ID_KEY);
        fields.push((PHOTO_ID_KEY, photo_id));
        self.upload_to(&self.handshake.endpoints().replace, photo, fields)
    }

    fn upload_to<'a>(&'a self, url: &str, photo: Photo, mut fields: Vec<(&'a str, &'a str)>) -> Result<ApiResponse> {
        if self.handshake.access_token().is_none() {
            return Err(Error::InvalidArgument("authentication is required".to_string()));
        }
        if let Some((_, format)) = fields.iter().find(|(k, _)| *k == FORMAT_KEY) {
            if *format != REST_FORMAT {
                return Err(Error::InvalidArgument(format!(
                    "format {} is not supported for uploading photos",
                    format
                )));
            }
        }
        fields.retain(|(k, _)| *k != FORMAT_KEY);
        supply_default(&mut fields, API_KEY, self.handshake.consumer_key());

        info!("uploading {} to {}", photo.file_name(), url);
        let secrets = self.handshake.secrets();
        let request = Client::with_params(&secrets, self.handshake.oauth_parameters().clone())
            .post(url)?
            .form(&fields)?
            .upload(photo)?;
        let response = self.handshake.transport().send(request)?.error_for_status(url)?;
        Ok(ApiResponse::Text(response.body))
    }

    /// Checks the cached token with the service.
    ///
    /// A token that the service rejects, or that was granted at another
    /// level than it claims, or that lacks `perms`, is erased from the cache.
    pub fn token_valid(&mut self, perms: AccessLevel) -> Result<bool> {
        let token = match self.cache.get()? {
            Some(token) => token,
            None => return Ok(false),
        };
        self.handshake.set_token(token.clone());

        let valid = match self.call_as(CHECK_TOKEN_METHOD, &[], ResponseFormat::ParsedJson) {
            Ok(response) => {
                let granted = response
                    .as_json()
                    .and_then(|json| json["oauth"]["perms"]["_content"].as_str())
                    .map(str::to_string);
                granted.as_deref() == Some(token.access_level().as_str()) && token.has_level(perms)
            }
            Err(e @ Error::Api { .. }) | Err(e @ Error::Remote { .. }) => {
                debug!("token check failed : {}", e);
                false
            }
            Err(e) => return Err(e),
        };
        if !valid {
            warn!("cached token is not valid for {}, forgetting it", perms);
            self.forget_token()?;
        }
        Ok(valid)
    }

    /// Authorizes out of band: prints the authorize URL to `output` and reads
    /// the verifier the user copies from the browser from `input`. Does
    /// nothing when the cached token is valid for `perms`.
    pub fn authenticate_console<R: BufRead, W: Write>(
        &mut self,
        perms: AccessLevel,
        input: &mut R,
        output: &mut W,
    ) -> Result<()> {
        if self.token_valid(perms)? {
            return Ok(());
        }
        self.handshake.get_request_token(Callback::OutOfBand)?;
        let url = self.handshake.auth_url(perms)?;
        writeln!(output, "Go to the following link in your browser to authorize this application:")?;
        writeln!(output, "{}", url)?;
        write!(output, "Enter the verifier code: ")?;
        output.flush()?;

        let mut line = String::new();
        input.read_line(&mut line)?;
        let verifier = line.trim();
        if verifier.is_empty() {
            return Err(Error::InvalidArgument("no verifier was entered".to_string()));
        }
        self.get_access_token(verifier).map(|_| ())
    }

    /// Authorizes through a listener on 127.0.0.1. `open_url` receives the
    /// authorize URL, typically to open it in a browser. Does nothing when
    /// the cached token is valid for `perms`.
    pub fn authenticate_via_listener<F>(
        &mut self,
        perms: AccessLevel,
        timeout: Option<Duration>,
        open_url: F,
    ) -> Result<()>
    where
        F: FnOnce(&str) -> Result<()>,
    {
        if self.token_valid(perms)? {
            return Ok(());
        }
        self.handshake.get_request_token(Callback::Local)?;
        let url = self.handshake.auth_url(perms)?;
        open_url(&url)?;
        self.handshake.wait_for_verifier(timeout)?;
        let token = self.handshake.get_access_token()?;
        self.cache.set(token)
    }

    pub fn get_request_token(&mut self, callback: Callback) -> Result<()> {
        self.handshake.get_request_token(callback)
    }

    pub fn auth_url(&mut self, perms: AccessLevel) -> Result<String> {
        self.handshake.auth_url(perms)
    }

    /// Exchanges the authorized request token and stores the access token.
    pub fn get_access_token(&mut self, verifier: &str) -> Result<AccessToken> {
        self.handshake.set_verifier(verifier)?;
        let token = self.handshake.get_access_token()?;
        self.cache.set(token.clone())?;
        Ok(token)
    }

    /// Logs out: deletes the cached token and resets the handshake.
    pub fn forget_token(&mut self) -> Result<()> {
        self.cache.delete()?;
        self.handshake.clear();
        Ok(())
    }
}

impl<T: Transport> MethodCaller for FlickrApi<T> {
    fn call_method(&self, method: &str, params: &[(&str, &str)]) -> Result<ApiResponse> {
        self.call(method, params)
    }
}

fn has_key(params: &[(&str, &str)], key: &str) -> bool {
    params.iter().any(|(k, _)| *k == key)
}

/// Adds `key=value` unless the caller already passed `key`.
fn supply_default<'a>(params: &mut Vec<(&'a str, &'a str)>, key: &'a str, value: &'a str) {
    if !has_key(params, key) {
        params.push((key, value));
    }
}
