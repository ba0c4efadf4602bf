use std::borrow::Cow;

use http::Method;
use log::debug;
use oauth1_request::signature_method::SignatureMethod;
use oauth1_request::signer::Signer as OAuthSigner;
use oauth1_request::{HmacSha1, Options};
use url::Url;

use crate::{SecretsProvider, SignError, SignResult};

const OAUTH_IDENTIFIER: &str = "oauth_";
const REALM_IDENTIFIER: &str = "realm";

#[derive(Debug, Clone)]
pub struct Signer<'a, TSecretsProvider, TSignatureMethod = HmacSha1>
where
    TSecretsProvider: SecretsProvider,
    TSignatureMethod: SignatureMethod + Clone,
{
    secrets: &'a TSecretsProvider,
    parameters: OAuthParameters<'a, TSignatureMethod>,
}

impl<'a, TSecretsProvider, TSignatureMethod> Signer<'a, TSecretsProvider, TSignatureMethod>
where
    TSecretsProvider: SecretsProvider,
    TSignatureMethod: SignatureMethod + Clone,
{
    pub fn new(
        secrets: &'a TSecretsProvider,
        parameters: OAuthParameters<'a, TSignatureMethod>,
    ) -> Self {
        Signer {
            secrets,
            parameters,
        }
    }

    /// Computes the `Authorization` header value for a request.
    ///
    /// `payload` is the url-encoded parameter set: the query string when
    /// `is_url_query` is set, the form body otherwise. Parameters are sorted
    /// before signing, so their order in `payload` never matters.
    pub fn generate_signature(
        self,
        method: &Method,
        url: Url,
        payload: &str,
        is_url_query: bool,
    ) -> SignResult<String> {
        let (consumer_key, consumer_secret) = self.secrets.get_consumer_key_pair();
        let (token, token_secret) = self.secrets.get_token_option_pair();
        if consumer_secret.is_empty() && token_secret.map_or(true, str::is_empty) {
            return Err(SignError::MissingSecret(url.to_string()));
        }
        debug!(
            "signing {} {} (token: {}, query: {})",
            method,
            url,
            token.is_some(),
            is_url_query
        );
        let options = self.parameters.build_options(token);

        // The library wants every parameter in sorted order, with the oauth_*
        // block at its place among them. A bare `oauth_` sentinel marks that
        // place; caller-supplied oauth_* pairs are dropped since `options`
        // carries them.
        let mut pairs: Vec<(Cow<str>, Cow<str>)> =
            url::form_urlencoded::parse(payload.as_bytes()).collect();
        pairs.push((Cow::from(OAUTH_IDENTIFIER), Cow::from("")));
        pairs.sort();
        let sentinel = pairs
            .iter()
            .position(|(k, _)| k == OAUTH_IDENTIFIER)
            .unwrap_or(pairs.len());
        let (before, after) = pairs.split_at(sentinel);
        let (before, after) = (without_oauth(before), without_oauth(after));

        let signature_method = self.parameters.signature_method.clone();
        let mut signer = if is_url_query {
            OAuthSigner::with_signature_method(
                signature_method,
                method.as_str(),
                url,
                consumer_secret,
                token_secret,
            )
        } else {
            OAuthSigner::form_with_signature_method(
                signature_method,
                method.as_str(),
                url,
                consumer_secret,
                token_secret,
            )
        };
        for (key, value) in before {
            signer.parameter(key, value);
        }
        let mut signer = signer.oauth_parameters(consumer_key, &options);
        for (key, value) in after {
            signer.parameter(key, value);
        }

        let sign = signer.finish().authorization;

        if let Some(ref realm) = self.parameters.realm {
            Ok(format!("{},{}=\"{}\"", sign, REALM_IDENTIFIER, realm.as_ref()))
        } else {
            Ok(sign)
        }
    }
}

fn without_oauth<'p>(pairs: &'p [(Cow<'_, str>, Cow<'_, str>)]) -> Vec<(&'p str, &'p str)> {
    pairs
        .iter()
        .filter(|(k, _)| !k.starts_with(OAUTH_IDENTIFIER))
        .map(|(k, v)| (k.as_ref(), v.as_ref()))
        .collect()
}

#[derive(Debug, Clone)]
pub struct OAuthParameters<'a, TSignatureMethod = HmacSha1>
where
    TSignatureMethod: SignatureMethod + Clone,
{
    callback: Option<Cow<'a, str>>,
    nonce: Option<Cow<'a, str>>,
    realm: Option<Cow<'a, str>>,
    signature_method: TSignatureMethod,
    timestamp: Option<u64>,
    verifier: Option<Cow<'a, str>>,
    version: bool,
}

impl Default for OAuthParameters<'static, HmacSha1> {
    fn default() -> Self {
        OAuthParameters {
            callback: None,
            nonce: None,
            realm: None,
            signature_method: HmacSha1,
            timestamp: None,
            verifier: None,
            version: false,
        }
    }
}

impl<'a> OAuthParameters<'a, HmacSha1> {
    pub fn new() -> Self {
        Default::default()
    }
}

impl<'a, T> OAuthParameters<'a, T>
where
    T: SignatureMethod + Clone,
{
    /// set the oauth_callback value
    pub fn callback<U>(self, callback: U) -> Self
    where
        U: Into<Cow<'a, str>>,
    {
        OAuthParameters {
            callback: Some(callback.into()),
            ..self
        }
    }

    /// set the oauth_nonce value
    pub fn nonce<U>(self, nonce: U) -> Self
    where
        U: Into<Cow<'a, str>>,
    {
        OAuthParameters {
            nonce: Some(nonce.into()),
            ..self
        }
    }

    /// set the oauth_realm value
    pub fn realm<U>(self, realm: U) -> Self
    where
        U: Into<Cow<'a, str>>,
    {
        OAuthParameters {
            realm: Some(realm.into()),
            ..self
        }
    }

    /// set the oauth_timestamp value
    pub fn timestamp<U>(self, timestamp: U) -> Self
    where
        U: Into<u64>,
    {
        OAuthParameters {
            timestamp: Some(timestamp.into()),
            ..self
        }
    }

    /// set the oauth_verifier value
    pub fn verifier<U>(self, verifier: U) -> Self
    where
        U: Into<Cow<'a, str>>,
    {
        OAuthParameters {
            verifier: Some(verifier.into()),
            ..self
        }
    }

    /// Signs with `signature_method` instead, keeping every other value.
    pub fn signature_method<M>(self, signature_method: M) -> OAuthParameters<'a, M>
    where
        M: SignatureMethod + Clone,
    {
        OAuthParameters {
            callback: self.callback,
            nonce: self.nonce,
            realm: self.realm,
            signature_method,
            timestamp: self.timestamp,
            verifier: self.verifier,
            version: self.version,
        }
    }

    /// set the oauth_version value (boolean)
    ///
    /// # Note
    /// When the version has value `true`, oauth_version will be set with "1.0".
    /// Otherwise, oauth_version will not be included in your request.
    pub fn version<U>(self, version: U) -> Self
    where
        U: Into<bool>,
    {
        OAuthParameters {
            version: version.into(),
            ..self
        }
    }

    fn build_options(&'a self, token: Option<&'a str>) -> Options<'a> {
        let mut opt = Options::new();

        // NOTE: items must be added by alphabetical order

        if let Some(ref callback) = self.callback {
            opt.callback(callback.as_ref());
        }
        if let Some(ref nonce) = self.nonce {
            opt.nonce(nonce.as_ref());
        }
        if let Some(timestamp) = self.timestamp {
            opt.timestamp(timestamp);
        }
        if let Some(token) = token {
            opt.token(token);
        }
        if let Some(ref verifier) = self.verifier {
            opt.verifier(verifier.as_ref());
        }
        opt.version(self.version);

        opt
    }
}
