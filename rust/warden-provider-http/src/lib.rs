//! HTTP sandbox for warden host dispatch.
//!
//! `fetch` (host slot 1) performs a GET and pushes the body as an arena
//! string. The builder slots (`with_client` 11, `set_url` 12,
//! `set_method` 13, `send_request` 5, `check_status` 6) compose one
//! request and produce a `{status, body}` dict.
//!
//! Every outgoing request — `fetch` and `send_request` alike — must pass
//! the same two checks: the hostname equals or is a subdomain of an
//! allowlisted domain, and loopback/private hosts are refused unless the
//! sandbox was built with `allow_loopback`.

use reqwest::blocking::Client;
use reqwest::Url;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Duration;
use thiserror::Error;
use warden_core::Value;
use warden_vm::bytecode::{host, scopes};
use warden_vm::{Machine, VmError};

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("invalid url '{0}': {1}")]
    InvalidUrl(String, String),
    #[error("domain not allowed: '{0}'")]
    DomainNotAllowed(String),
    #[error("localhost/internal access blocked: '{0}'")]
    LoopbackBlocked(String),
    #[error("no url staged; call set_url first")]
    MissingUrl,
    #[error("request failed: {0}")]
    Request(String),
}

impl From<HttpError> for VmError {
    fn from(e: HttpError) -> Self {
        VmError::Host(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Sandbox
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct PendingRequest {
    url: Option<String>,
    method: String,
}

impl Default for PendingRequest {
    fn default() -> Self {
        Self {
            url: None,
            method: "GET".to_string(),
        }
    }
}

pub struct HttpSandbox {
    allowed_domains: Vec<String>,
    allow_loopback: bool,
    client: Client,
    pending: RefCell<PendingRequest>,
}

fn is_loopback(hostname: &str) -> bool {
    let h = hostname.to_ascii_lowercase();
    h == "localhost"
        || h == "::1"
        || h.starts_with("127.")
        || h.starts_with("192.168.")
        || h.starts_with("10.")
}

impl HttpSandbox {
    pub fn new(allowed_domains: Vec<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("default client configuration is valid");
        Self {
            allowed_domains,
            allow_loopback: false,
            client,
            pending: RefCell::new(PendingRequest::default()),
        }
    }

    pub fn allow_loopback(mut self, allow: bool) -> Self {
        self.allow_loopback = allow;
        self
    }

    fn is_allowed(&self, hostname: &str) -> bool {
        self.allowed_domains
            .iter()
            .any(|d| hostname == d || hostname.ends_with(&format!(".{}", d)))
    }

    /// Parse and screen a URL against the allowlist and the loopback ban.
    pub fn check_url(&self, raw: &str) -> Result<Url, HttpError> {
        let url = Url::parse(raw).map_err(|e| HttpError::InvalidUrl(raw.to_string(), e.to_string()))?;
        let hostname = url.host_str().unwrap_or_default().to_string();
        if !self.is_allowed(&hostname) {
            return Err(HttpError::DomainNotAllowed(hostname));
        }
        if !self.allow_loopback && is_loopback(&hostname) {
            return Err(HttpError::LoopbackBlocked(hostname));
        }
        Ok(url)
    }

    fn execute(&self, method: &str, url: Url) -> Result<(u16, String), HttpError> {
        let req = match method {
            "GET" => self.client.get(url),
            "POST" => self.client.post(url),
            "PUT" => self.client.put(url),
            "DELETE" => self.client.delete(url),
            "HEAD" => self.client.head(url),
            other => return Err(HttpError::Request(format!("unsupported method '{}'", other))),
        };
        let resp = req.send().map_err(|e| HttpError::Request(e.to_string()))?;
        let status = resp.status().as_u16();
        let body = resp.text().map_err(|e| HttpError::Request(e.to_string()))?;
        Ok((status, body))
    }

    // -- Host functions --

    /// `fetch(url)`: ( url -- body )
    pub fn fetch(&self, m: &mut Machine) -> Result<(), VmError> {
        let raw = m.pop_str()?;
        let url = self.check_url(&raw)?;
        let (_, body) = self.execute("GET", url)?;
        let r = m.arena_mut().append_str(&body);
        m.push(Value::Str(r))
    }

    /// `with_client()`: reset the staged request.
    pub fn with_client(&self, _m: &mut Machine) -> Result<(), VmError> {
        *self.pending.borrow_mut() = PendingRequest::default();
        Ok(())
    }

    /// `set_url(url)`: stage the target.
    pub fn set_url(&self, m: &mut Machine) -> Result<(), VmError> {
        let raw = m.pop_str()?;
        self.pending.borrow_mut().url = Some(raw);
        Ok(())
    }

    /// `set_method(method)`: stage the verb.
    pub fn set_method(&self, m: &mut Machine) -> Result<(), VmError> {
        let method = m.pop_str()?.to_ascii_uppercase();
        self.pending.borrow_mut().method = method;
        Ok(())
    }

    /// `send_request()`: ( -- response-dict )
    pub fn send_request(&self, m: &mut Machine) -> Result<(), VmError> {
        let staged = self.pending.borrow().clone();
        let raw = staged.url.ok_or(HttpError::MissingUrl)?;
        let url = self.check_url(&raw)?;
        let (status, body) = self.execute(&staged.method, url)?;
        let body_ref = m.arena_mut().append_str(&body);
        let mut map = BTreeMap::new();
        map.insert("status".to_string(), Value::Int(i64::from(status)));
        map.insert("body".to_string(), Value::Str(body_ref));
        m.push(Value::new_dict(map))
    }

    /// `check_status(response)`: ( response-dict -- status )
    pub fn check_status(&self, m: &mut Machine) -> Result<(), VmError> {
        let resp = m.pop()?;
        match &resp {
            Value::Dict(d) => {
                let status = d
                    .borrow()
                    .get("status")
                    .cloned()
                    .ok_or_else(|| VmError::Host("response has no status field".to_string()))?;
                m.push(status)
            }
            other => Err(VmError::Host(format!(
                "check_status: expected a response dict, got {}",
                other.type_name()
            ))),
        }
    }
}

/// Install the sandbox into its frozen host slots. `fetch` and
/// `send_request` are gated on the HTTP scope; the builder setters carry
/// no authority of their own.
pub fn install(sandbox: HttpSandbox, m: &mut Machine) {
    let sandbox = Rc::new(sandbox);
    let f = Rc::clone(&sandbox);
    m.set_host(host::FETCH, "fetch", Some(scopes::HTTP_ENV), move |m| f.fetch(m));
    let s = Rc::clone(&sandbox);
    m.set_host(host::SEND_REQUEST, "send_request", Some(scopes::HTTP_ENV), move |m| {
        s.send_request(m)
    });
    let c = Rc::clone(&sandbox);
    m.set_host(host::CHECK_STATUS, "check_status", None, move |m| {
        c.check_status(m)
    });
    let w = Rc::clone(&sandbox);
    m.set_host(host::WITH_CLIENT, "with_client", None, move |m| {
        w.with_client(m)
    });
    let u = Rc::clone(&sandbox);
    m.set_host(host::SET_URL, "set_url", None, move |m| u.set_url(m));
    m.set_host(host::SET_METHOD, "set_method", None, move |m| {
        sandbox.set_method(m)
    });
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    /// Minimal single-shot HTTP server for loopback tests.
    fn serve_once(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 4096];
                let _ = stream.read(&mut buf);
                let resp = format!(
                    "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = stream.write_all(resp.as_bytes());
            }
        });
        format!("http://{}", addr)
    }

    #[test]
    fn blocked_domain_is_rejected_before_any_request() {
        let sb = HttpSandbox::new(vec!["example.com".to_string()]);
        assert!(matches!(
            sb.check_url("http://evil.com/x"),
            Err(HttpError::DomainNotAllowed(h)) if h == "evil.com"
        ));
    }

    #[test]
    fn subdomains_of_allowlisted_domains_pass() {
        let sb = HttpSandbox::new(vec!["example.com".to_string()]);
        assert!(sb.check_url("http://allowed.example.com/x").is_ok());
        assert!(sb.check_url("http://example.com/").is_ok());
        // Suffix match requires a dot boundary.
        assert!(matches!(
            sb.check_url("http://notexample.com/"),
            Err(HttpError::DomainNotAllowed(_))
        ));
    }

    #[test]
    fn loopback_is_blocked_by_default() {
        let sb = HttpSandbox::new(vec![
            "localhost".to_string(),
            "127.0.0.1".to_string(),
            "10.0.0.8".to_string(),
        ]);
        assert!(matches!(
            sb.check_url("http://localhost:8080/"),
            Err(HttpError::LoopbackBlocked(_))
        ));
        assert!(matches!(
            sb.check_url("http://127.0.0.1/"),
            Err(HttpError::LoopbackBlocked(_))
        ));
        assert!(matches!(
            sb.check_url("http://10.0.0.8/"),
            Err(HttpError::LoopbackBlocked(_))
        ));
    }

    #[test]
    fn loopback_can_be_opted_into() {
        let sb = HttpSandbox::new(vec!["127.0.0.1".to_string()]).allow_loopback(true);
        assert!(sb.check_url("http://127.0.0.1:9999/").is_ok());
    }

    #[test]
    fn unparseable_url_is_an_error() {
        let sb = HttpSandbox::new(vec!["example.com".to_string()]);
        assert!(matches!(
            sb.check_url("not a url"),
            Err(HttpError::InvalidUrl(..))
        ));
    }

    #[test]
    fn fetch_appends_the_body_to_the_arena() {
        let url = serve_once("200 OK", "hello");
        let sb = HttpSandbox::new(vec!["127.0.0.1".to_string()]).allow_loopback(true);
        let mut m = Machine::new();
        let r = m.arena_mut().append_str(&url);
        m.push(Value::Str(r)).unwrap();
        sb.fetch(&mut m).unwrap();
        let v = m.pop().unwrap();
        assert_eq!(m.value_text(&v).unwrap(), "hello");
    }

    #[test]
    fn fetch_refuses_without_touching_the_network() {
        // The URL points nowhere routable; the allowlist must reject it
        // before any connection is attempted (no timeout burned).
        let sb = HttpSandbox::new(vec!["example.com".to_string()]);
        let mut m = Machine::new();
        let r = m.arena_mut().append_str("http://blocked.example/");
        m.push(Value::Str(r)).unwrap();
        let started = std::time::Instant::now();
        assert!(sb.fetch(&mut m).is_err());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn builder_composes_a_response_dict() {
        let url = serve_once("201 Created", "created");
        let sb = HttpSandbox::new(vec!["127.0.0.1".to_string()]).allow_loopback(true);
        let mut m = Machine::new();

        sb.with_client(&mut m).unwrap();
        let r = m.arena_mut().append_str(&url);
        m.push(Value::Str(r)).unwrap();
        sb.set_url(&mut m).unwrap();
        let r = m.arena_mut().append_str("post");
        m.push(Value::Str(r)).unwrap();
        sb.set_method(&mut m).unwrap();
        sb.send_request(&mut m).unwrap();

        let resp = m.pop().unwrap();
        assert!(matches!(resp, Value::Dict(_)));
        m.push(resp).unwrap();
        sb.check_status(&mut m).unwrap();
        assert_eq!(m.pop().unwrap().as_int(), Some(201));
    }

    #[test]
    fn send_request_enforces_the_allowlist() {
        let sb = HttpSandbox::new(vec!["example.com".to_string()]);
        let mut m = Machine::new();
        sb.with_client(&mut m).unwrap();
        let r = m.arena_mut().append_str("http://evil.com/");
        m.push(Value::Str(r)).unwrap();
        sb.set_url(&mut m).unwrap();
        assert!(sb.send_request(&mut m).is_err());
    }

    #[test]
    fn send_request_without_url_fails() {
        let sb = HttpSandbox::new(vec!["example.com".to_string()]);
        let mut m = Machine::new();
        sb.with_client(&mut m).unwrap();
        assert!(matches!(
            sb.send_request(&mut m),
            Err(VmError::Host(msg)) if msg.contains("set_url")
        ));
    }
}
