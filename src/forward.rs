use hyper::body::Bytes;
use log::{debug, info};
use url::Url;

use crate::{
    error::UpstreamError,
    headers::Headers,
    request::ProxyRequest,
    transport::{Transport, UpstreamRequest, UpstreamResponse},
};

/// Request headers that would misrepresent the relay as the real client or ask
/// for encodings it cannot pass through untouched.
const STRIPPED_REQUEST_HEADERS: [&str; 3] = ["Host", "Accept-Encoding", "Referer"];

const REDIRECT_STATUSES: [u16; 5] = [301, 302, 303, 307, 308];

pub struct Forwarder<T> {
    transport: T,
    max_redirects: usize,
}

impl<T: Transport> Forwarder<T> {
    pub fn new(transport: T, max_redirects: usize) -> Self {
        Forwarder {
            transport,
            max_redirects,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Sends `request` to its real destination and returns the upstream
    /// response once it answered `200` or `206`.
    ///
    /// Same-scheme redirects are followed up to the configured limit, to any
    /// host, and every forwarded header (`Authorization` and cookies included)
    /// is sent to each hop. A `303` switches to a bodiless `GET`. Any other
    /// status drops the response body unread.
    pub async fn forward(
        &self,
        request: &ProxyRequest,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let mut upstream = UpstreamRequest {
            method: request.method.clone(),
            url: Url::parse(&request.target)?,
            headers: filter_request_headers(&request.headers),
            body: request.body.clone(),
        };
        let mut redirects = 0;
        loop {
            let url = upstream.url.clone();
            let response = self.transport.execute(upstream.clone()).await?;
            match response.status {
                200 | 206 => return Ok(response),
                status if REDIRECT_STATUSES.contains(&status) => {
                    let Some(next) = redirect_target(&url, &response) else {
                        return Err(status_error(response));
                    };
                    if redirects == self.max_redirects {
                        return Err(UpstreamError::TooManyRedirects(redirects));
                    }
                    redirects += 1;
                    info!("following redirect {} -> {}", url, next);
                    if status == 303 {
                        upstream.method = "GET".to_string();
                        upstream.body = Bytes::new();
                        upstream.headers.remove("Content-Length");
                    }
                    upstream.url = next;
                }
                _ => return Err(status_error(response)),
            }
        }
    }
}

pub(crate) fn filter_request_headers(headers: &Headers) -> Headers {
    headers
        .iter()
        .filter(|(name, value)| {
            let stripped = STRIPPED_REQUEST_HEADERS
                .iter()
                .any(|h| h.eq_ignore_ascii_case(name))
                || (name.eq_ignore_ascii_case("Content-Length") && *value == b"0");
            if stripped {
                debug!("not forwarding header {}", name);
            }
            !stripped
        })
        .collect()
}

/// Resolves the `Location` of a redirect. Switching between `http` and
/// `https` is never followed.
fn redirect_target(current: &Url, response: &UpstreamResponse) -> Option<Url> {
    let location = response.headers.get_str("Location")?;
    let next = current.join(location).ok()?;
    (next.scheme() == current.scheme()).then_some(next)
}

fn status_error(response: UpstreamResponse) -> UpstreamError {
    UpstreamError::Status {
        code: response.status,
        reason: response.reason,
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, io::Cursor, sync::Mutex};

    use super::*;

    struct MockTransport {
        responses: Mutex<VecDeque<(u16, Vec<(&'static str, &'static str)>)>>,
        seen: Mutex<Vec<UpstreamRequest>>,
    }

    impl MockTransport {
        fn new(responses: Vec<(u16, Vec<(&'static str, &'static str)>)>) -> Self {
            MockTransport {
                responses: Mutex::new(responses.into()),
                seen: Mutex::new(Vec::new()),
            }
        }
        fn seen(&self) -> Vec<UpstreamRequest> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl Transport for MockTransport {
        async fn execute(
            &self,
            request: UpstreamRequest,
        ) -> Result<UpstreamResponse, UpstreamError> {
            self.seen.lock().unwrap().push(request);
            let (status, headers) = self.responses.lock().unwrap().pop_front().unwrap();
            Ok(UpstreamResponse {
                status,
                reason: "Upstream Reason".to_string(),
                headers: headers.into_iter().collect(),
                body: Box::new(Cursor::new(b"body".to_vec())),
            })
        }
    }

    fn request(target: &str, headers: Vec<(&str, &str)>) -> ProxyRequest {
        ProxyRequest {
            method: "GET".to_string(),
            target: target.to_string(),
            headers: headers.into_iter().collect(),
            range_start: 0,
            body: Bytes::new(),
        }
    }

    #[tokio::test]
    async fn strips_identity_headers() {
        let forwarder = Forwarder::new(MockTransport::new(vec![(200, vec![])]), 20);
        let req = request(
            "http://media.example.com/stream",
            vec![
                ("Host", "127.0.0.1:5000"),
                ("accept-encoding", "gzip"),
                ("Referer", "http://127.0.0.1/"),
                ("Content-Length", "0"),
                ("Authorization", "Bearer abc"),
                ("Range", "bytes=100-"),
                ("Content-Length", "12"),
            ],
        );
        forwarder.forward(&req).await.unwrap();

        let seen = forwarder.transport().seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].url.as_str(), "http://media.example.com/stream");
        let headers: Vec<_> = seen[0].headers.iter().collect();
        assert_eq!(
            headers,
            vec![
                ("Authorization", &b"Bearer abc"[..]),
                ("Range", &b"bytes=100-"[..]),
                ("Content-Length", &b"12"[..]),
            ]
        );
    }

    #[tokio::test]
    async fn partial_content_is_success() {
        let forwarder = Forwarder::new(MockTransport::new(vec![(206, vec![])]), 20);
        let res = forwarder
            .forward(&request("http://a/b", vec![]))
            .await
            .unwrap();
        assert_eq!(res.status, 206);
    }

    #[tokio::test]
    async fn other_statuses_fail_with_reason() {
        let forwarder = Forwarder::new(MockTransport::new(vec![(404, vec![])]), 20);
        match forwarder.forward(&request("http://a/b", vec![])).await {
            Err(UpstreamError::Status { code, reason }) => {
                assert_eq!(code, 404);
                assert_eq!(reason, "Upstream Reason");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn invalid_target_never_reaches_transport() {
        let forwarder = Forwarder::new(MockTransport::new(vec![]), 20);
        assert!(matches!(
            forwarder.forward(&request("not a url", vec![])).await,
            Err(UpstreamError::InvalidUrl(_))
        ));
        assert!(forwarder.transport().seen().is_empty());
    }

    #[tokio::test]
    async fn follows_same_scheme_redirects() {
        let forwarder = Forwarder::new(
            MockTransport::new(vec![
                (302, vec![("Location", "/cdn/track.mp3")]),
                (303, vec![("location", "http://b/final")]),
                (200, vec![]),
            ]),
            20,
        );
        let mut req = request(
            "http://a/rest/stream",
            vec![("X-Auth", "t"), ("Content-Length", "4")],
        );
        req.method = "POST".to_string();
        req.body = Bytes::from_static(b"data");
        forwarder.forward(&req).await.unwrap();

        let seen = forwarder.transport().seen();
        let urls: Vec<_> = seen.iter().map(|r| r.url.as_str().to_string()).collect();
        assert_eq!(
            urls,
            vec!["http://a/rest/stream", "http://a/cdn/track.mp3", "http://b/final"]
        );
        assert_eq!(seen[0].body, Bytes::from_static(b"data"));
        assert_eq!(seen[1].method, "POST");
        assert_eq!(seen[1].body, Bytes::from_static(b"data"));
        assert_eq!(seen[2].method, "GET");
        assert!(seen[2].body.is_empty());
        assert_eq!(seen[2].headers.get_str("Content-Length"), None);
        assert_eq!(seen[2].headers.get_str("X-Auth"), Some("t"));
    }

    #[tokio::test]
    async fn cross_scheme_redirect_is_a_failure() {
        let forwarder = Forwarder::new(
            MockTransport::new(vec![(301, vec![("Location", "https://a/b")])]),
            20,
        );
        assert!(matches!(
            forwarder.forward(&request("http://a/b", vec![])).await,
            Err(UpstreamError::Status { code: 301, .. })
        ));
    }

    #[tokio::test]
    async fn redirect_limit() {
        let forwarder = Forwarder::new(
            MockTransport::new(vec![
                (307, vec![("Location", "/1")]),
                (307, vec![("Location", "/2")]),
            ]),
            1,
        );
        assert!(matches!(
            forwarder.forward(&request("http://a/", vec![])).await,
            Err(UpstreamError::TooManyRedirects(1))
        ));
    }
}
