use std::{fmt, fs, io, path::Path};

use http::Method;
use log::debug;
use oauth1_request::signature_method::SignatureMethod;
use serde::Serialize;
use url::Url;

use crate::{Error, Result, SecretsProvider, Signer, PHOTO_FIELD};

/// The binary payload of an upload.
///
/// It travels in the multipart body as the `photo` field but never takes part
/// in the OAuth signature.
#[derive(Clone, PartialEq, Eq)]
pub struct Photo {
    file_name: String,
    data: Vec<u8>,
}

impl Photo {
    pub fn from_bytes<T: Into<String>>(file_name: T, data: Vec<u8>) -> Self {
        Photo {
            file_name: file_name.into(),
            data,
        }
    }

    /// Reads the photo from disk, keeping only its base name for the upload.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Photo {
            file_name,
            data: fs::read(path)?,
        })
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn into_parts(self) -> (String, Vec<u8>) {
        (self.file_name, self.data)
    }
}

impl fmt::Debug for Photo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Photo")
            .field("file_name", &self.file_name)
            .field("len", &self.data.len())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    Empty,
    /// `application/x-www-form-urlencoded` body
    Form(String),
    /// `multipart/form-data` body: the signed text fields plus the photo
    Multipart {
        fields: Vec<(String, String)>,
        photo: Photo,
    },
}

/// A request ready for the wire: everything a transport needs, signature
/// included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest {
    pub method: Method,
    pub url: Url,
    pub authorization: String,
    pub body: RequestBody,
}

impl SignedRequest {
    /// Returns the request parameters, from the query string and the body
    /// alike. Mostly useful for inspecting requests in tests and logs.
    pub fn parameters(&self) -> Vec<(String, String)> {
        let mut params: Vec<(String, String)> = self.url.query_pairs().into_owned().collect();
        match &self.body {
            RequestBody::Empty => {}
            RequestBody::Form(body) => params.extend(
                url::form_urlencoded::parse(body.as_bytes()).into_owned(),
            ),
            RequestBody::Multipart { fields, .. } => params.extend(fields.iter().cloned()),
        }
        params
    }
}

pub struct RequestBuilder<'a, TSecretsProvider, TSignatureMethod>
where
    TSecretsProvider: SecretsProvider,
    TSignatureMethod: SignatureMethod + Clone,
{
    method: Method,
    url: Url,
    signer: Signer<'a, TSecretsProvider, TSignatureMethod>,
    query: Vec<(String, String)>,
    form: Vec<(String, String)>,
}

impl<'a, TSecretsProvider, TSignatureMethod> RequestBuilder<'a, TSecretsProvider, TSignatureMethod>
where
    TSecretsProvider: SecretsProvider,
    TSignatureMethod: SignatureMethod + Clone,
{
    pub(crate) fn new(
        method: Method,
        mut url: Url,
        signer: Signer<'a, TSecretsProvider, TSignatureMethod>,
    ) -> Self {
        // query parameters already on the URL are signed like any other
        let query = url.query_pairs().into_owned().collect();
        url.set_query(None);
        RequestBuilder {
            method,
            url,
            signer,
            query,
            form: Vec::new(),
        }
    }

    /// Modify the query string of the URL.
    ///
    /// Appends the parameters provided; the same key may show up twice.
    ///
    /// # Errors
    /// This method will fail if the object you provide cannot be serialized
    /// into a query string.
    pub fn query<T: Serialize + ?Sized>(mut self, query: &T) -> Result<Self> {
        self.query.extend(encode_pairs(query)?);
        Ok(self)
    }

    /// Send a form body.
    pub fn form<T: Serialize + ?Sized>(mut self, form: &T) -> Result<Self> {
        self.form.extend(encode_pairs(form)?);
        Ok(self)
    }

    /// Signs the collected parameters and returns the finished request.
    pub fn build(self) -> Result<SignedRequest> {
        let RequestBuilder {
            method,
            mut url,
            signer,
            query,
            form,
        } = self;
        let is_url_query = form.is_empty();
        let payload = serialize_pairs(query.iter().chain(form.iter()));
        let authorization = signer.generate_signature(&method, url.clone(), &payload, is_url_query)?;

        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query.iter());
        }
        let body = if form.is_empty() {
            RequestBody::Empty
        } else {
            RequestBody::Form(serialize_pairs(form.iter()))
        };
        Ok(SignedRequest {
            method,
            url,
            authorization,
            body,
        })
    }

    /// Builds a multipart upload of `photo` alongside the form fields.
    ///
    /// The signature covers the form fields only: it is computed exactly as
    /// for a plain form post of the same fields, and then reused for the
    /// multipart body that also carries the photo.
    pub fn upload(self, photo: Photo) -> Result<SignedRequest> {
        if self.form.iter().any(|(k, _)| k == PHOTO_FIELD) {
            return Err(Error::InvalidArgument(format!(
                "{} must be passed as a Photo, not as a form field",
                PHOTO_FIELD
            )));
        }
        let signed = self.build()?;
        debug!(
            "upload to {} with {} (signed without {})",
            signed.url,
            photo.file_name(),
            PHOTO_FIELD
        );
        let fields = signed.parameters();
        let mut url = signed.url;
        url.set_query(None);
        Ok(SignedRequest {
            method: signed.method,
            url,
            authorization: signed.authorization,
            body: RequestBody::Multipart { fields, photo },
        })
    }
}

fn encode_pairs<T: Serialize + ?Sized>(value: &T) -> Result<Vec<(String, String)>> {
    let encoded = serde_urlencoded::to_string(value)
        .map_err(|e| Error::InvalidArgument(format!("unserializable parameters : {}", e)))?;
    Ok(url::form_urlencoded::parse(encoded.as_bytes())
        .into_owned()
        .collect())
}

fn serialize_pairs<'p, I>(pairs: I) -> String
where
    I: Iterator<Item = &'p (String, String)>,
{
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}
