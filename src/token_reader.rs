use std::collections::HashMap;

use serde::Deserialize;

use crate::{
    Error, HttpResponse, Result, TokenReaderError, TokenReaderResult, OAUTH_TOKEN_KEY,
    OAUTH_TOKEN_SECRET_KEY,
};

/// Represents response of token acquisition.
#[derive(Deserialize, Debug, Clone)]
pub struct TokenResponse {
    /// OAuth Token
    pub oauth_token: String,
    /// OAuth Token Secret
    pub oauth_token_secret: String,
    /// Other contents
    #[serde(flatten)]
    pub remain: HashMap<String, String>,
    #[serde(skip)]
    raw: String,
}

impl TokenResponse {
    /// Returns the value of a field the service must send, such as
    /// `username` in an access token response.
    pub fn require(&self, key: &'static str) -> TokenReaderResult<&str> {
        self.remain
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| TokenReaderError::TokenKeyNotFound(key, self.raw.clone()))
    }

    pub fn optional(&self, key: &str) -> &str {
        self.remain.get(key).map(String::as_str).unwrap_or_default()
    }
}

/// Add parse_oauth_token feature to a transport response.
pub trait TokenReader: private::Sealed {
    fn parse_oauth_token(self) -> Result<TokenResponse>;
}

impl TokenReader for HttpResponse {
    fn parse_oauth_token(self) -> Result<TokenResponse> {
        Ok(read_oauth_token(self.body)?)
    }
}

impl<E> TokenReader for std::result::Result<HttpResponse, E>
where
    E: Into<Error>,
{
    fn parse_oauth_token(self) -> Result<TokenResponse> {
        match self {
            Ok(resp) => resp.parse_oauth_token(),
            Err(err) => Err(err.into()),
        }
    }
}

pub(crate) fn read_oauth_token(text: String) -> TokenReaderResult<TokenResponse> {
    let mut destructured = url::form_urlencoded::parse(text.as_bytes())
        .into_owned()
        .collect::<HashMap<String, String>>();
    let oauth_token = destructured.remove(OAUTH_TOKEN_KEY);
    let oauth_token_secret = destructured.remove(OAUTH_TOKEN_SECRET_KEY);
    match (oauth_token, oauth_token_secret) {
        (Some(t), Some(s)) => Ok(TokenResponse {
            oauth_token: t,
            oauth_token_secret: s,
            remain: destructured,
            raw: text,
        }),
        (None, _) => Err(TokenReaderError::TokenKeyNotFound(OAUTH_TOKEN_KEY, text)),
        (_, _) => Err(TokenReaderError::TokenKeyNotFound(
            OAUTH_TOKEN_SECRET_KEY,
            text,
        )),
    }
}

mod private {
    use crate::{Error, HttpResponse};

    pub trait Sealed {}
    impl Sealed for HttpResponse {}
    impl<E> Sealed for std::result::Result<HttpResponse, E> where E: Into<Error> {}
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn parse_response_typical() {
        let resp_str_sample = "oauth_token=Z6eEdO8MOmk394WozF5oKyuAv855l4Mlqo7hhlSLik&oauth_token_secret=Kd75W4OQfb2oJTV0vzGzeXftVAwgMnEK9MumzYcM&oauth_callback_confirmed=true";
        for parsed in &[
            read_oauth_token(resp_str_sample.to_string()).unwrap(),
            serde_urlencoded::from_str::<TokenResponse>(resp_str_sample).unwrap(),
        ] {
            assert_eq!(
                parsed.oauth_token,
                "Z6eEdO8MOmk394WozF5oKyuAv855l4Mlqo7hhlSLik"
            );
            assert_eq!(
                parsed.oauth_token_secret,
                "Kd75W4OQfb2oJTV0vzGzeXftVAwgMnEK9MumzYcM"
            );
            assert_eq!(parsed.remain.len(), 1);
            let oauth_callback_confirmed = parsed.remain.get("oauth_callback_confirmed").unwrap();
            assert_eq!(oauth_callback_confirmed, "true");
        }
    }

    #[test]
    fn parse_response_edge() {
        let resp_str_sample = "oauth_token==&oauth_token_secret=&keyonly=&keyonly2&=&&";
        let parsed = read_oauth_token(resp_str_sample.to_string()).unwrap();
        assert_eq!(parsed.oauth_token, "=");
        assert_eq!(parsed.oauth_token_secret, "");
        assert_eq!(parsed.remain.len(), 3);
        assert_eq!(parsed.remain.get("keyonly").unwrap(), "");
        assert_eq!(parsed.remain.get("keyonly2").unwrap(), "");
        assert_eq!(parsed.remain.get("").unwrap(), "");
    }

    #[test]
    fn parse_access_token_fields() {
        let resp_str_sample = "fullname=Sybren%20St%C3%BCvel&oauth_token=72157-abc&oauth_token_secret=f00&user_nsid=73509078%40N00&username=sybren";
        let parsed = read_oauth_token(resp_str_sample.to_string()).unwrap();
        assert_eq!(parsed.optional("fullname"), "Sybren Stüvel");
        assert_eq!(parsed.require("user_nsid").unwrap(), "73509078@N00");
        assert_eq!(parsed.require("username").unwrap(), "sybren");
        assert_eq!(parsed.optional("missing"), "");
    }

    #[test]
    fn require_reports_body() {
        let resp_str_sample = "oauth_token=a&oauth_token_secret=b";
        let parsed = read_oauth_token(resp_str_sample.to_string()).unwrap();
        match parsed.require("username") {
            Err(TokenReaderError::TokenKeyNotFound(key, body)) => {
                assert_eq!(key, "username");
                assert_eq!(body, resp_str_sample);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn parse_minimal() {
        let resp_str_sample = "oauth_token&oauth_token_secret";
        let parsed = read_oauth_token(resp_str_sample.to_string()).unwrap();
        assert_eq!(parsed.oauth_token, "");
        assert_eq!(parsed.oauth_token_secret, "");
        assert_eq!(parsed.remain.len(), 0);
    }

    #[test]
    fn parse_token_notfound() {
        let resp_str_sample = "oauth_token_secret=";
        let parsed = read_oauth_token(resp_str_sample.to_string());
        if let Err(TokenReaderError::TokenKeyNotFound(key, resp_str)) = parsed {
            assert_eq!(key, OAUTH_TOKEN_KEY);
            assert_eq!(resp_str, resp_str_sample)
        } else {
            panic!("expected TokenKeyNotFound")
        }
    }

    #[test]
    fn parse_token_secret_notfound() {
        let resp_str_sample = "oauth_token=";
        let parsed = read_oauth_token(resp_str_sample.to_string());
        if let Err(TokenReaderError::TokenKeyNotFound(key, resp_str)) = parsed {
            assert_eq!(key, OAUTH_TOKEN_SECRET_KEY);
            assert_eq!(resp_str, resp_str_sample)
        } else {
            panic!("expected TokenKeyNotFound")
        }
    }

    #[test]
    fn transport_errors_pass_through() {
        let failed: std::result::Result<HttpResponse, Error> =
            Err(Error::InvalidArgument("boom".to_string()));
        assert!(matches!(failed.parse_oauth_token(), Err(Error::InvalidArgument(_))));
    }
}
