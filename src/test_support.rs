use std::cell::RefCell;
use std::collections::VecDeque;

use crate::{HttpResponse, Result, SignedRequest, Transport};

/// Replays canned responses in order and records every request it is given.
#[derive(Debug, Default)]
pub(crate) struct MockTransport {
    responses: RefCell<VecDeque<Result<HttpResponse>>>,
    requests: RefCell<Vec<SignedRequest>>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Default::default()
    }

    pub(crate) fn respond(self, status: u16, body: &str) -> Self {
        self.responses
            .borrow_mut()
            .push_back(Ok(HttpResponse::new(status, body)));
        self
    }

    pub(crate) fn fail(self, error: crate::Error) -> Self {
        self.responses.borrow_mut().push_back(Err(error));
        self
    }

    pub(crate) fn requests(&self) -> Vec<SignedRequest> {
        self.requests.borrow().clone()
    }

    pub(crate) fn last_request(&self) -> SignedRequest {
        self.requests
            .borrow()
            .last()
            .cloned()
            .expect("no request was sent")
    }

    /// Value of `key` in the request's parameters or its Authorization header.
    pub(crate) fn param(request: &SignedRequest, key: &str) -> Option<String> {
        request
            .parameters()
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
            .or_else(|| header_param(&request.authorization, key))
    }
}

impl Transport for MockTransport {
    fn send(&self, request: SignedRequest) -> Result<HttpResponse> {
        self.requests.borrow_mut().push(request);
        self.responses
            .borrow_mut()
            .pop_front()
            .expect("no canned response left")
    }
}

fn header_param(authorization: &str, key: &str) -> Option<String> {
    authorization
        .strip_prefix("OAuth ")?
        .split(',')
        .filter_map(|item| item.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| {
            percent_encoding::percent_decode_str(v.trim_matches('"'))
                .decode_utf8_lossy()
                .into_owned()
        })
}
