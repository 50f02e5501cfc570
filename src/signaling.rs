//! WHIP/WHEP HTTP exchanges.
//!
//! | step        | method | target       | expected            |
//! |-------------|--------|--------------|---------------------|
//! | initiate    | POST   | endpoint     | 201 + `Location`    |
//! | trickle     | PATCH  | resource     | 204/200             |
//! | renegotiate | PATCH  | resource     | 200 + SDP answer    |
//! | terminate   | DELETE | resource     | 2xx (best-effort)   |

use crate::error::{Error, Result};
use crate::peer::ice::TRICKLE_CONTENT_TYPE;
use crate::peer::types::ServerConfig;
use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::header::{HeaderMap, CONTENT_TYPE, ETAG, IF_MATCH, LINK, LOCATION};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::collections::HashMap;
use std::io::Cursor;
use std::time::Duration;
use url::Url;

pub const SDP_CONTENT_TYPE: &str = "application/sdp";

const TRICKLE_RELS: [&str; 2] = ["urn:ietf:params:whip:ext:core:trickle-ice", "trickle-ice"];

/// What the 201 to the initial POST told us.
#[derive(Debug, Clone, PartialEq)]
pub struct OfferResponse {
    pub answer_sdp: String,
    pub resource_url: Url,
    pub etag: Option<String>,
    pub ice_servers: Vec<ServerConfig>,
    pub trickle_url: Option<Url>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrickleOutcome {
    Accepted,
    /// 405/501: the server does not take trickled candidates.
    Unsupported,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnswerUpdate {
    pub answer_sdp: String,
    pub etag: Option<String>,
}

/// Network side of the negotiator.
#[async_trait]
pub trait Signaling: Send + Sync {
    async fn offer(&self, endpoint: &Url, token: Option<&str>, sdp: &str) -> Result<OfferResponse>;

    /// `body` is an `application/trickle-ice-sdpfrag` document.
    async fn trickle(
        &self,
        url: &Url,
        token: Option<&str>,
        etag: Option<&str>,
        body: &str,
    ) -> Result<TrickleOutcome>;

    async fn renegotiate(
        &self,
        url: &Url,
        token: Option<&str>,
        etag: Option<&str>,
        sdp: &str,
    ) -> Result<AnswerUpdate>;

    async fn terminate(&self, url: &Url, token: Option<&str>) -> Result<()>;
}

pub struct HttpSignaling {
    client: Client,
}

impl HttpSignaling {
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| Error::Config(format!("HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

fn authorize(req: RequestBuilder, token: Option<&str>) -> RequestBuilder {
    match token {
        Some(t) if !t.is_empty() => req.bearer_auth(t),
        _ => req,
    }
}

fn with_etag(req: RequestBuilder, etag: Option<&str>) -> RequestBuilder {
    match etag {
        Some(tag) => req.header(IF_MATCH, tag),
        None => req,
    }
}

fn describe(e: reqwest::Error) -> String {
    if e.is_timeout() {
        "request timed out".to_owned()
    } else if e.is_connect() {
        format!("cannot reach server: {e}")
    } else {
        e.to_string()
    }
}

fn header_str(headers: &HeaderMap, name: reqwest::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

async fn read_answer(resp: Response) -> Result<String> {
    let body = resp
        .text()
        .await
        .map_err(|e| Error::negotiation(format!("reading SDP answer: {}", describe(e))))?;
    validate_sdp(&body)?;
    Ok(body)
}

#[async_trait]
impl Signaling for HttpSignaling {
    async fn offer(&self, endpoint: &Url, token: Option<&str>, sdp: &str) -> Result<OfferResponse> {
        debug!("POST {endpoint} ({} bytes of SDP)", sdp.len());
        let req = self
            .client
            .post(endpoint.clone())
            .header(CONTENT_TYPE, SDP_CONTENT_TYPE)
            .body(sdp.to_owned());
        let resp = authorize(req, token)
            .send()
            .await
            .map_err(|e| Error::negotiation(describe(e)))?;

        let status = resp.status();
        if status != StatusCode::CREATED {
            return Err(Error::negotiation(format!("server answered {status}, expected 201")));
        }

        let headers = resp.headers().clone();
        let location = header_str(&headers, LOCATION)
            .ok_or_else(|| Error::negotiation("201 without Location header"))?;
        let resource_url = resolve_location(endpoint, &location)?;
        let etag = header_str(&headers, ETAG);

        let links: Vec<Link> = headers
            .get_all(LINK)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(parse_link_header)
            .collect();
        let ice_servers = links.iter().filter_map(Link::ice_server).collect();
        let trickle_url = links
            .iter()
            .find(|l| l.has_rel_in(&TRICKLE_RELS))
            .and_then(|l| endpoint.join(&l.target).ok());

        let answer_sdp = read_answer(resp).await?;
        info!("Resource created at {resource_url}");
        Ok(OfferResponse {
            answer_sdp,
            resource_url,
            etag,
            ice_servers,
            trickle_url,
        })
    }

    async fn trickle(
        &self,
        url: &Url,
        token: Option<&str>,
        etag: Option<&str>,
        body: &str,
    ) -> Result<TrickleOutcome> {
        let req = self
            .client
            .patch(url.clone())
            .header(CONTENT_TYPE, TRICKLE_CONTENT_TYPE)
            .body(body.to_owned());
        let resp = authorize(with_etag(req, etag), token)
            .send()
            .await
            .map_err(|e| Error::negotiation(format!("trickle PATCH: {}", describe(e))))?;

        match resp.status() {
            StatusCode::OK | StatusCode::NO_CONTENT => Ok(TrickleOutcome::Accepted),
            StatusCode::METHOD_NOT_ALLOWED | StatusCode::NOT_IMPLEMENTED => {
                Ok(TrickleOutcome::Unsupported)
            }
            other => Err(Error::negotiation(format!("trickle PATCH answered {other}"))),
        }
    }

    async fn renegotiate(
        &self,
        url: &Url,
        token: Option<&str>,
        etag: Option<&str>,
        sdp: &str,
    ) -> Result<AnswerUpdate> {
        let req = self
            .client
            .patch(url.clone())
            .header(CONTENT_TYPE, SDP_CONTENT_TYPE)
            .body(sdp.to_owned());
        let resp = authorize(with_etag(req, etag), token)
            .send()
            .await
            .map_err(|e| Error::negotiation(format!("renegotiation: {}", describe(e))))?;

        let status = resp.status();
        if status != StatusCode::OK {
            return Err(Error::negotiation(format!(
                "renegotiation answered {status}, expected 200"
            )));
        }
        let etag = header_str(resp.headers(), ETAG);
        let answer_sdp = read_answer(resp).await?;
        Ok(AnswerUpdate { answer_sdp, etag })
    }

    async fn terminate(&self, url: &Url, token: Option<&str>) -> Result<()> {
        debug!("DELETE {url}");
        let resp = authorize(self.client.delete(url.clone()), token)
            .send()
            .await
            .map_err(|e| Error::Teardown(describe(e)))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Teardown(format!("DELETE {url} answered {status}")));
        }
        Ok(())
    }
}

/// `Location` may be absolute or relative to the endpoint.
pub fn resolve_location(endpoint: &Url, location: &str) -> Result<Url> {
    let location = location.trim();
    if location.is_empty() {
        return Err(Error::negotiation("empty Location header"));
    }
    endpoint
        .join(location)
        .map_err(|e| Error::negotiation(format!("bad Location {location:?}: {e}")))
}

/// Rejects answers the RTC engine could not make sense of.
pub fn validate_sdp(sdp: &str) -> Result<()> {
    if sdp.trim().is_empty() {
        return Err(Error::negotiation("empty SDP answer"));
    }
    let mut reader = Cursor::new(sdp.as_bytes());
    webrtc::sdp::SessionDescription::unmarshal(&mut reader)
        .map(|_| ())
        .map_err(|e| Error::negotiation(format!("malformed SDP answer: {e}")))
}

/// One entry of a `Link` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub target: String,
    pub params: HashMap<String, String>,
}

impl Link {
    fn has_rel_in(&self, rels: &[&str]) -> bool {
        self.params
            .get("rel")
            .is_some_and(|rel| rel.split_whitespace().any(|r| rels.contains(&r)))
    }

    fn ice_server(&self) -> Option<ServerConfig> {
        if !self.has_rel_in(&["ice-server"]) {
            return None;
        }
        let kind = if self.target.starts_with("turn") {
            "turn"
        } else {
            "stun"
        };
        Some(ServerConfig {
            r#type: kind.into(),
            url: self.target.clone(),
            username: self.params.get("username").cloned(),
            credential: self.params.get("credential").cloned(),
        })
    }
}

/// Splits on `sep` outside of `<...>` and quoted strings.
fn split_outside(value: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut in_angle = false;
    let mut start = 0;
    for (i, ch) in value.char_indices() {
        match ch {
            '"' if !in_angle => in_quotes = !in_quotes,
            '<' if !in_quotes => in_angle = true,
            '>' if !in_quotes => in_angle = false,
            c if c == sep && !in_quotes && !in_angle => {
                parts.push(&value[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&value[start..]);
    parts
}

/// Parses `<url>; rel="x"; k=v, <url2>; ...` (RFC 8288).
pub fn parse_link_header(value: &str) -> Vec<Link> {
    let mut links = Vec::new();
    for entry in split_outside(value, ',') {
        let mut pieces = split_outside(entry, ';').into_iter().map(str::trim);
        let Some(target) = pieces
            .next()
            .and_then(|t| t.strip_prefix('<'))
            .and_then(|t| t.strip_suffix('>'))
        else {
            warn!("Ignoring malformed Link entry {entry:?}");
            continue;
        };
        let params = pieces
            .filter_map(|p| {
                let (k, v) = p.split_once('=')?;
                Some((
                    k.trim().to_ascii_lowercase(),
                    v.trim().trim_matches('"').to_owned(),
                ))
            })
            .collect();
        links.push(Link {
            target: target.to_owned(),
            params,
        });
    }
    links
}
