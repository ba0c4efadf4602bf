use std::mem;
use std::time::Duration;

use log::{debug, info};
use url::Url;

use crate::{
    AccessLevel, AccessToken, CallbackListener, Client, Endpoints, Error, OAuthParameters, Result,
    Secrets, SequenceError, TokenReader, TokenResponse, Transport, OAUTH_TOKEN_KEY, OOB_CALLBACK,
};

const PERMS_KEY: &str = "perms";
const FULLNAME_KEY: &str = "fullname";
const USERNAME_KEY: &str = "username";
const USER_NSID_KEY: &str = "user_nsid";

/// Where the service sends the user after authorizing the request token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Callback {
    /// An application-provided URL.
    Url(String),
    /// `oob`: the service shows the verifier to the user.
    OutOfBand,
    /// A listener on 127.0.0.1, started by the handshake.
    Local,
}

/// Progress of the OAuth dance. The token pair requests are signed with is
/// derived from the state, never stored separately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeState {
    Unstarted,
    RequestTokenObtained {
        token: String,
        token_secret: String,
    },
    UserAuthorized {
        token: String,
        token_secret: String,
        verifier: String,
    },
    AccessTokenObtained(AccessToken),
}

impl HandshakeState {
    fn resource_owner(&self) -> Option<(&str, &str)> {
        match self {
            HandshakeState::Unstarted => None,
            HandshakeState::RequestTokenObtained {
                token,
                token_secret,
            }
            | HandshakeState::UserAuthorized {
                token,
                token_secret,
                ..
            } => Some((token.as_str(), token_secret.as_str())),
            HandshakeState::AccessTokenObtained(access) => {
                Some((access.token(), access.token_secret()))
            }
        }
    }

    fn request_token(&self) -> Option<&str> {
        match self {
            HandshakeState::RequestTokenObtained { token, .. }
            | HandshakeState::UserAuthorized { token, .. } => Some(token.as_str()),
            _ => None,
        }
    }
}

/// Drives the request token / authorize / access token exchange.
///
/// Any failure during an exchange puts the handshake back to `Unstarted`;
/// calling a step out of order is a `SequenceError` and changes nothing.
#[derive(Debug)]
pub struct Handshake<T: Transport> {
    consumer_key: String,
    consumer_secret: String,
    endpoints: Endpoints,
    transport: T,
    parameters: OAuthParameters<'static>,
    state: HandshakeState,
    requested_level: Option<AccessLevel>,
    listener: Option<CallbackListener>,
}

impl<T: Transport> Handshake<T> {
    pub fn new<TKey, TSecret>(
        consumer_key: TKey,
        consumer_secret: TSecret,
        endpoints: Endpoints,
        transport: T,
    ) -> Self
    where
        TKey: Into<String>,
        TSecret: Into<String>,
    {
        Handshake {
            consumer_key: consumer_key.into(),
            consumer_secret: consumer_secret.into(),
            endpoints,
            transport,
            parameters: OAuthParameters::new(),
            state: HandshakeState::Unstarted,
            requested_level: None,
            listener: None,
        }
    }

    /// Uses `parameters` as the base of every signature, e.g. to pin the
    /// nonce and timestamp.
    pub fn with_oauth_parameters(self, parameters: OAuthParameters<'static>) -> Self {
        Handshake { parameters, ..self }
    }

    pub fn state(&self) -> &HandshakeState {
        &self.state
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn oauth_parameters(&self) -> &OAuthParameters<'static> {
        &self.parameters
    }

    pub fn consumer_key(&self) -> &str {
        &self.consumer_key
    }

    /// The access token, once the handshake completed or one was restored.
    pub fn access_token(&self) -> Option<&AccessToken> {
        match &self.state {
            HandshakeState::AccessTokenObtained(token) => Some(token),
            _ => None,
        }
    }

    /// The level remembered from the last `auth_url`.
    pub fn requested_level(&self) -> Option<AccessLevel> {
        self.requested_level
    }

    /// Consumer credentials plus whatever token pair the state carries.
    pub fn secrets(&self) -> Secrets<'_> {
        let secrets = Secrets::new(self.consumer_key.as_str(), self.consumer_secret.as_str());
        match self.state.resource_owner() {
            Some((token, token_secret)) => secrets.token(token, token_secret),
            None => secrets,
        }
    }

    /// Step 1: obtain a request token, signed with the consumer credentials
    /// only.
    pub fn get_request_token(&mut self, callback: Callback) -> Result<()> {
        self.reset();
        let callback = match callback {
            Callback::Url(url) => url,
            Callback::OutOfBand => OOB_CALLBACK.to_string(),
            Callback::Local => {
                let listener = CallbackListener::new()?;
                let url = listener.callback_url();
                self.listener = Some(listener);
                url
            }
        };
        debug!("requesting a request token, callback {}", callback);
        let parameters = self.parameters.clone().callback(callback);
        let url = self.endpoints.request_token.clone();
        let response = self.exchange(&url, parameters);
        let response = self.or_reset(response)?;
        self.state = HandshakeState::RequestTokenObtained {
            token: response.oauth_token,
            token_secret: response.oauth_token_secret,
        };
        debug!("request token obtained");
        Ok(())
    }

    /// Step 2: the URL where the user authorizes the request token at
    /// `perms`. The level is remembered for the access token.
    pub fn auth_url(&mut self, perms: AccessLevel) -> Result<String> {
        let token = self
            .state
            .request_token()
            .ok_or(SequenceError::NoRequestToken)?;
        let mut url = Url::parse(&self.endpoints.authorize)?;
        url.query_pairs_mut()
            .append_pair(OAUTH_TOKEN_KEY, token)
            .append_pair(PERMS_KEY, perms.as_str());
        self.requested_level = Some(perms);
        Ok(url.into())
    }

    /// Step 3, when the verifier was obtained out of band.
    pub fn set_verifier<V: Into<String>>(&mut self, verifier: V) -> Result<()> {
        let (token, token_secret) = match mem::replace(&mut self.state, HandshakeState::Unstarted) {
            HandshakeState::RequestTokenObtained {
                token,
                token_secret,
            }
            | HandshakeState::UserAuthorized {
                token,
                token_secret,
                ..
            } => (token, token_secret),
            other => {
                self.state = other;
                return Err(SequenceError::NoRequestToken.into());
            }
        };
        self.state = HandshakeState::UserAuthorized {
            token,
            token_secret,
            verifier: verifier.into(),
        };
        Ok(())
    }

    /// Step 3, through the listener started by `get_request_token` with
    /// `Callback::Local`. The listener serves one request and is dropped
    /// afterwards, whatever the outcome.
    pub fn wait_for_verifier(&mut self, timeout: Option<Duration>) -> Result<()> {
        let token = self
            .state
            .request_token()
            .ok_or(SequenceError::NoRequestToken)?
            .to_string();
        let listener = self.listener.take().ok_or(SequenceError::NoListener)?;
        let verifier = listener.wait_for_verifier(&token, timeout).map_err(Error::from);
        let verifier = self.or_reset(verifier)?;
        self.set_verifier(verifier)
    }

    /// Step 4: exchange the authorized request token for an access token.
    /// The verifier is consumed whether or not the exchange succeeds.
    pub fn get_access_token(&mut self) -> Result<AccessToken> {
        let verifier = match &self.state {
            HandshakeState::UserAuthorized { verifier, .. } => verifier.clone(),
            HandshakeState::RequestTokenObtained { .. } => return Err(SequenceError::NoVerifier.into()),
            _ => return Err(SequenceError::NoRequestToken.into()),
        };
        let level = self
            .requested_level
            .ok_or(SequenceError::UnknownPermissions)?;

        let parameters = self.parameters.clone().verifier(verifier);
        let url = self.endpoints.access_token.clone();
        let response = self
            .exchange(&url, parameters)
            .and_then(|response| read_access_token(&response, level));
        let token = self.or_reset(response)?;

        info!(
            "access token obtained for {} ({}) at level {}",
            token.username(),
            token.user_nsid(),
            level
        );
        self.state = HandshakeState::AccessTokenObtained(token.clone());
        Ok(token)
    }

    /// Restores a previously obtained access token.
    pub fn set_token(&mut self, token: AccessToken) {
        self.listener = None;
        self.state = HandshakeState::AccessTokenObtained(token);
    }

    /// Logs out: forgets every token and stops a running listener.
    pub fn clear(&mut self) {
        self.reset();
    }

    /// Back to `Unstarted`. The requested level belongs to the abandoned
    /// request token and goes with it.
    fn reset(&mut self) {
        if self.state != HandshakeState::Unstarted {
            debug!("handshake reset");
        }
        self.state = HandshakeState::Unstarted;
        self.requested_level = None;
        self.listener = None;
    }

    fn or_reset<R>(&mut self, result: Result<R>) -> Result<R> {
        if result.is_err() {
            self.reset();
        }
        result
    }

    fn exchange(&self, url: &str, parameters: OAuthParameters<'static>) -> Result<TokenResponse> {
        let secrets = self.secrets();
        let request = Client::with_params(&secrets, parameters).post(url)?.build()?;
        self.transport
            .send(request)
            .and_then(|response| response.error_for_status(url))
            .parse_oauth_token()
    }
}

fn read_access_token(response: &TokenResponse, level: AccessLevel) -> Result<AccessToken> {
    let username = response.require(USERNAME_KEY)?;
    let user_nsid = response.require(USER_NSID_KEY)?;
    Ok(AccessToken::new(
        response.oauth_token.as_str(),
        response.oauth_token_secret.as_str(),
        level,
    )
    .with_user(response.optional(FULLNAME_KEY), username, user_nsid))
}
