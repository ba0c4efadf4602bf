use http::header::{AUTHORIZATION, CONNECTION, CONTENT_TYPE};
use http::Method;
use log::error;
use oauth1_request::signature_method::SignatureMethod;
use oauth1_request::HmacSha1;
use reqwest::blocking::{multipart, Client as ReqwestClient};
use url::Url;

use crate::{Error, OAuthParameters, RequestBody, RequestBuilder, Result, SecretsProvider, SignedRequest, Signer, PHOTO_FIELD};

/// Issues signed requests and hands back status and body.
///
/// This is the seam between the OAuth layer and the network: the handshake
/// and the API facade only ever talk to a `Transport`.
pub trait Transport {
    fn send(&self, request: SignedRequest) -> Result<HttpResponse>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn send(&self, request: SignedRequest) -> Result<HttpResponse> {
        (**self).send(request)
    }
}

impl Transport for ReqwestClient {
    fn send(&self, request: SignedRequest) -> Result<HttpResponse> {
        let SignedRequest {
            method,
            url,
            authorization,
            body,
        } = request;
        let builder = self
            .request(method, url)
            .header(AUTHORIZATION, authorization)
            .header(CONNECTION, "close");
        let builder = match body {
            RequestBody::Empty => builder,
            RequestBody::Form(body) => builder
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(body),
            RequestBody::Multipart { fields, photo } => {
                let form = fields
                    .into_iter()
                    .fold(multipart::Form::new(), |form, (k, v)| form.text(k, v));
                let (file_name, data) = photo.into_parts();
                let part = multipart::Part::bytes(data).file_name(file_name);
                builder.multipart(form.part(PHOTO_FIELD, part))
            }
        };
        let response = builder.send()?;
        let status = response.status().as_u16();
        let body = response.text()?;
        Ok(HttpResponse { status, body })
    }
}

/// Status and body of a finished exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new<T: Into<String>>(status: u16, body: T) -> Self {
        HttpResponse {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turns a non-2xx response into `Error::Remote`, logging the body part
    /// by part since the service answers errors url-encoded.
    pub fn error_for_status(self, url: &str) -> Result<Self> {
        if self.is_success() {
            return Ok(self);
        }
        error!("{}: status code {} received, content:", url, self.status);
        for part in self.body.split('&') {
            let decoded: String = url::form_urlencoded::parse(part.as_bytes())
                .map(|(k, v)| if v.is_empty() { k.into_owned() } else { format!("{}={}", k, v) })
                .collect();
            error!("    {}", decoded);
        }
        Err(Error::Remote {
            url: url.to_string(),
            status: self.status,
            body: self.body,
        })
    }
}

/// Entry point for building signed requests with a set of secrets.
#[derive(Debug, Clone)]
pub struct Client<'a, TSecrets, TSignatureMethod = HmacSha1>
where
    TSecrets: SecretsProvider,
    TSignatureMethod: SignatureMethod + Clone,
{
    secrets: &'a TSecrets,
    parameters: OAuthParameters<'a, TSignatureMethod>,
}

impl<'a, TSecrets> Client<'a, TSecrets, HmacSha1>
where
    TSecrets: SecretsProvider,
{
    /// Constructs a new `Client` signing with HMAC-SHA1 and fresh
    /// nonce/timestamp values.
    pub fn new(secrets: &'a TSecrets) -> Self {
        Client::with_params(secrets, OAuthParameters::new())
    }
}

impl<'a, TSecrets, TSignatureMethod> Client<'a, TSecrets, TSignatureMethod>
where
    TSecrets: SecretsProvider,
    TSignatureMethod: SignatureMethod + Clone,
{
    pub fn with_params(secrets: &'a TSecrets, parameters: OAuthParameters<'a, TSignatureMethod>) -> Self {
        Client {
            secrets,
            parameters,
        }
    }

    /// Convenience method to make a `GET` request to a URL.
    ///
    /// # Errors
    ///
    /// This method fails whenever supplied `Url` cannot be parsed.
    pub fn get(&self, url: &str) -> Result<RequestBuilder<'a, TSecrets, TSignatureMethod>> {
        self.request(Method::GET, url)
    }

    /// Convenience method to make a `POST` request to a URL.
    ///
    /// # Errors
    ///
    /// This method fails whenever supplied `Url` cannot be parsed.
    pub fn post(&self, url: &str) -> Result<RequestBuilder<'a, TSecrets, TSignatureMethod>> {
        self.request(Method::POST, url)
    }

    /// Start building a request with the `Method` and `Url`.
    ///
    /// # Errors
    ///
    /// This method fails whenever supplied `Url` cannot be parsed.
    pub fn request(
        &self,
        method: Method,
        url: &str,
    ) -> Result<RequestBuilder<'a, TSecrets, TSignatureMethod>> {
        let url = Url::parse(url)?;
        Ok(RequestBuilder::new(
            method,
            url,
            Signer::new(self.secrets, self.parameters.clone()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_passes_through() {
        let response = HttpResponse::new(200, "ok");
        assert_eq!(response.clone().error_for_status("u").unwrap(), response);
    }

    #[test]
    fn failure_keeps_status_and_body() {
        let response = HttpResponse::new(401, "oauth_problem=signature_invalid&debug_sbs=GET%26x");
        match response.error_for_status("https://www.flickr.com/services/oauth/request_token") {
            Err(Error::Remote { url, status, body }) => {
                assert_eq!(url, "https://www.flickr.com/services/oauth/request_token");
                assert_eq!(status, 401);
                assert!(body.starts_with("oauth_problem=signature_invalid"));
            }
            other => panic!("expected a remote error, got {:?}", other),
        }
    }

    #[test]
    fn invalid_url_is_rejected() {
        let secrets = crate::Secrets::new("key", "secret");
        assert!(Client::new(&secrets).get("not a url").is_err());
    }
}
