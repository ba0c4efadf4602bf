use std::{borrow::Cow, fmt};

use crate::AccessToken;

pub trait SecretsProvider {
    fn get_consumer_key_pair<'a>(&'a self) -> (&'a str, &'a str);

    fn get_token_pair_option<'a>(&'a self) -> Option<(&'a str, &'a str)>;

    fn get_token_option_pair<'a>(&'a self) -> (Option<&'a str>, Option<&'a str>) {
        self.get_token_pair_option()
            .map(|s| (Some(s.0), Some(s.1)))
            .unwrap_or_else(|| (None, None))
    }
}

/// Consumer credentials, optionally paired with a resource owner token.
///
/// Without a token the secrets produce consumer-only signatures, which is
/// what the request-token endpoint expects.
#[derive(Clone)]
pub struct Secrets<'a> {
    consumer_key: Cow<'a, str>,
    consumer_secret: Cow<'a, str>,
    token: Option<(Cow<'a, str>, Cow<'a, str>)>,
}

impl<'a> Secrets<'a> {
    pub fn new<TKey, TSecret>(consumer_key: TKey, consumer_secret: TSecret) -> Self
    where
        TKey: Into<Cow<'a, str>>,
        TSecret: Into<Cow<'a, str>>,
    {
        Secrets {
            consumer_key: consumer_key.into(),
            consumer_secret: consumer_secret.into(),
            token: None,
        }
    }

    pub fn token<TKey, TSecret>(self, token: TKey, token_secret: TSecret) -> Self
    where
        TKey: Into<Cow<'a, str>>,
        TSecret: Into<Cow<'a, str>>,
    {
        Secrets {
            token: Some((token.into(), token_secret.into())),
            ..self
        }
    }

    pub fn access_token(self, token: &'a AccessToken) -> Self {
        self.token(token.token(), token.token_secret())
    }

    pub fn consumer_key(&self) -> &str {
        &self.consumer_key
    }
}

impl fmt::Debug for Secrets<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secrets")
            .field("consumer_key", &self.consumer_key)
            .field("consumer_secret", &"xxx")
            .field("token", &self.token.as_ref().map(|(t, _)| t))
            .finish()
    }
}

impl SecretsProvider for Secrets<'_> {
    fn get_consumer_key_pair<'a>(&'a self) -> (&'a str, &'a str) {
        (&self.consumer_key, &self.consumer_secret)
    }

    fn get_token_pair_option<'a>(&'a self) -> Option<(&'a str, &'a str)> {
        self.token.as_ref().map(|(t, s)| (t.as_ref(), s.as_ref()))
    }
}
