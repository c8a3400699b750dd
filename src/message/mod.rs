//! SIP message representation: parsing, canonical serialization, and
//! lazily-materialized semantic accessors (From/To/Contact/CSeq/method).

pub mod contact;
pub mod headers;

pub use contact::Contact;
pub use headers::{HeaderMap, HeaderValue};

use std::sync::Mutex;

use bytes::{BufMut, Bytes, BytesMut};
use uuid::Uuid;

use crate::{Error, Result};

const EOL: &str = "\r\n";

/// Default reason phrase for a handful of status codes this crate
/// constructs itself; anything else is passed through verbatim by the
/// caller.
pub fn default_reason(status_code: u16) -> &'static str {
    match status_code {
        100 => "Trying",
        180 => "Ringing",
        183 => "Session Progress",
        200 => "OK",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        407 => "Proxy Authentication Required",
        408 => "Request Timeout",
        480 => "Temporarily Unavailable",
        486 => "Busy Here",
        487 => "Request Terminated",
        500 => "Server Internal Error",
        503 => "Service Unavailable",
        603 => "Decline",
        _ => "Unknown",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Request,
    Response,
}

/// Parsed lazily from the header map on first access; invalidated by the
/// matching setter.
#[derive(Default)]
struct Cache {
    from: Option<Contact>,
    to: Option<Contact>,
    contact: Option<Option<Contact>>,
    cseq: Option<u32>,
    method: Option<rsip::Method>,
}

/// A SIP Request or Response. Requests carry a method and request-URI;
/// responses carry a status code and reason phrase. Both share headers
/// and payload handling.
pub struct Message {
    pub kind: Kind,
    pub method: Option<rsip::Method>,
    pub request_uri: Option<rsip::Uri>,
    pub status_code: Option<u16>,
    pub status_message: Option<String>,
    pub headers: HeaderMap,
    pub payload: Bytes,
    /// Hint for a transport-facing `Peer` to call `encode(true)`. Set by
    /// `Dialog::reply_with_headers`'s `compact` parameter.
    pub compact: bool,
    cache: Mutex<Cache>,
}

impl Clone for Message {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            method: self.method.clone(),
            request_uri: self.request_uri.clone(),
            status_code: self.status_code,
            status_message: self.status_message.clone(),
            headers: self.headers.clone(),
            payload: self.payload.clone(),
            compact: self.compact,
            cache: Mutex::new(Cache::default()),
        }
    }
}

impl Message {
    fn new(kind: Kind) -> Self {
        Self {
            kind,
            method: None,
            request_uri: None,
            status_code: None,
            status_message: None,
            headers: HeaderMap::new(),
            payload: Bytes::new(),
            compact: false,
            cache: Mutex::new(Cache::default()),
        }
    }

    /// Builds a Request, filling in Call-ID (UUID if absent) and
    /// Max-Forwards (70 if absent) per the wire invariants.
    pub fn request(method: rsip::Method, request_uri: rsip::Uri) -> Self {
        let mut msg = Self::new(Kind::Request);
        msg.method = Some(method);
        msg.request_uri = Some(request_uri);
        if !msg.headers.contains("Max-Forwards") {
            msg.headers.set("Max-Forwards", "70");
        }
        if !msg.headers.contains("Call-ID") {
            msg.headers.set("Call-ID", Uuid::new_v4().to_string());
        }
        msg
    }

    pub fn response(status_code: u16, status_message: impl Into<String>) -> Self {
        let mut msg = Self::new(Kind::Response);
        msg.status_code = Some(status_code);
        msg.status_message = Some(status_message.into());
        msg
    }

    /// Builds a response mirroring From/To/Contact/CSeq/Via of `request`.
    pub fn response_from_request(
        request: &Message,
        status_code: u16,
        status_message: Option<String>,
        payload: Option<Vec<u8>>,
    ) -> Self {
        let message = status_message.unwrap_or_else(|| default_reason(status_code).to_string());
        let mut resp = Self::response(status_code, message);
        for name in ["Via", "From", "To", "Call-ID", "CSeq"] {
            if let Some(value) = request.headers.get(name) {
                for v in value.values() {
                    resp.headers.append(name, v.to_string());
                }
            }
        }
        if let Some(payload) = payload {
            resp.set_payload(payload);
        }
        resp
    }

    pub fn is_request(&self) -> bool {
        self.kind == Kind::Request
    }

    pub fn is_response(&self) -> bool {
        self.kind == Kind::Response
    }

    pub fn is_provisional(&self) -> bool {
        matches!(self.status_code, Some(code) if (100..200).contains(&code))
    }

    pub fn is_final(&self) -> bool {
        matches!(self.status_code, Some(code) if code >= 200)
    }

    fn first_line(&self) -> String {
        match self.kind {
            Kind::Request => format!(
                "{} {} SIP/2.0",
                self.method.clone().map(|m| m.to_string()).unwrap_or_default(),
                self.request_uri.as_ref().map(|u| u.to_string()).unwrap_or_default()
            ),
            Kind::Response => format!(
                "SIP/2.0 {} {}",
                self.status_code.unwrap_or(0),
                self.status_message.as_deref().unwrap_or("")
            ),
        }
    }

    pub fn set_payload(&mut self, payload: impl Into<Bytes>) {
        let payload = payload.into();
        self.headers.set("Content-Length", payload.len().to_string());
        self.payload = payload;
    }

    /// Canonical wire-form encoding: first line, headers (Via-first then
    /// sorted), blank line, payload. `compact` requests compact header
    /// aliases for every aliasable header.
    pub fn encode(&self, compact: bool) -> Bytes {
        let mut headers = self.headers.clone();
        headers.set("Content-Length", self.payload.len().to_string());

        let mut out = String::new();
        out.push_str(&self.first_line());
        out.push_str(EOL);
        let formatted = headers.format_headers(compact);
        if !formatted.is_empty() {
            out.push_str(&formatted);
            out.push_str(EOL);
        }
        out.push_str(EOL);

        let mut buf = BytesMut::with_capacity(out.len() + self.payload.len());
        buf.put_slice(out.as_bytes());
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Parses a raw header block (and any trailing payload) into a
    /// Message. Fails with [`Error::MalformedMessage`] if the start line
    /// doesn't match the request or response grammar, or
    /// [`Error::MissingHeader`] if `CSeq` is absent.
    pub fn from_raw_headers(raw: &[u8]) -> Result<Self> {
        let text = String::from_utf8_lossy(raw);
        let mut parts = text.splitn(2, "\r\n\r\n");
        let head = parts.next().unwrap_or_default();
        let body = parts.next().unwrap_or_default().as_bytes().to_vec();

        let mut lines = head.split("\r\n");
        let first_line = lines.next().ok_or_else(|| Error::MalformedMessage("empty message".into()))?;

        let mut msg = if let Some(rest) = first_line.strip_prefix("SIP/2.0 ") {
            let mut it = rest.splitn(2, ' ');
            let code: u16 = it
                .next()
                .and_then(|c| c.parse().ok())
                .ok_or_else(|| Error::MalformedMessage(format!("bad status line: {}", first_line)))?;
            if !(100..=699).contains(&code) {
                return Err(Error::MalformedMessage(format!("status code out of range: {}", code)));
            }
            let reason = it.next().unwrap_or("").to_string();
            Self::response(code, reason)
        } else {
            let mut it = first_line.splitn(3, ' ');
            let method = it.next().ok_or_else(|| Error::MalformedMessage(format!("bad request line: {}", first_line)))?;
            let uri = it.next().ok_or_else(|| Error::MalformedMessage(format!("bad request line: {}", first_line)))?;
            let version = it.next().unwrap_or("");
            if version != "SIP/2.0" {
                return Err(Error::MalformedMessage(format!("not a SIP request/response: {}", first_line)));
            }
            let method: rsip::Method = method
                .parse()
                .map_err(|_| Error::MalformedMessage(format!("unknown method: {}", method)))?;
            let uri: rsip::Uri = uri
                .try_into()
                .map_err(|e| Error::MalformedMessage(format!("bad request uri {:?}: {}", uri, e)))?;
            Self::request(method, uri)
        };

        for line in lines {
            if line.is_empty() {
                continue;
            }
            match line.split_once(':') {
                Some((name, value)) => msg.headers.append(name.trim(), value.trim_start().to_string()),
                None => return Err(Error::MalformedMessage(format!("malformed header line: {:?}", line))),
            }
        }

        if !msg.headers.contains("CSeq") {
            return Err(Error::MissingHeader("CSeq".into()));
        }

        msg.payload = body.into();
        Ok(msg)
    }

    fn cache(&self) -> std::sync::MutexGuard<'_, Cache> {
        self.cache.lock().expect("message cache lock poisoned")
    }

    pub fn from_details(&self) -> Result<Contact> {
        let mut cache = self.cache();
        if let Some(c) = &cache.from {
            return Ok(c.clone());
        }
        let raw = self.headers.get_first("From").ok_or_else(|| Error::MissingHeader("From".into()))?;
        let contact = Contact::parse(raw)?;
        cache.from = Some(contact.clone());
        Ok(contact)
    }

    pub fn to_details(&self) -> Result<Contact> {
        let mut cache = self.cache();
        if let Some(c) = &cache.to {
            return Ok(c.clone());
        }
        let raw = self.headers.get_first("To").ok_or_else(|| Error::MissingHeader("To".into()))?;
        let contact = Contact::parse(raw)?;
        cache.to = Some(contact.clone());
        Ok(contact)
    }

    pub fn contact_details(&self) -> Result<Option<Contact>> {
        let mut cache = self.cache();
        if let Some(c) = &cache.contact {
            return Ok(c.clone());
        }
        let contact = match self.headers.get_first("Contact") {
            Some(raw) => Some(Contact::parse(raw)?),
            None => None,
        };
        cache.contact = Some(contact.clone());
        Ok(contact)
    }

    /// Sets the `From` header and invalidates the cached accessor.
    pub fn set_from(&mut self, contact: &Contact) {
        self.headers.set("From", contact.to_string());
        self.cache().from = None;
    }

    pub fn set_to(&mut self, contact: &Contact) {
        self.headers.set("To", contact.to_string());
        self.cache().to = None;
    }

    pub fn set_contact(&mut self, contact: &Contact) {
        self.headers.set("Contact", contact.to_string());
        self.cache().contact = None;
    }

    pub fn cseq(&self) -> Result<u32> {
        let mut cache = self.cache();
        if let Some(v) = cache.cseq {
            return Ok(v);
        }
        let raw = self.headers.get_first("CSeq").ok_or_else(|| Error::MissingHeader("CSeq".into()))?;
        let number = raw
            .split_whitespace()
            .next()
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| Error::MalformedMessage(format!("bad CSeq: {:?}", raw)))?;
        cache.cseq = Some(number);
        Ok(number)
    }

    pub fn cseq_method(&self) -> Result<rsip::Method> {
        if let Some(method) = self.method.clone() {
            return Ok(method);
        }
        let mut cache = self.cache();
        if let Some(m) = cache.method.clone() {
            return Ok(m);
        }
        let raw = self.headers.get_first("CSeq").ok_or_else(|| Error::MissingHeader("CSeq".into()))?;
        let method_str = raw
            .split_whitespace()
            .nth(1)
            .ok_or_else(|| Error::MalformedMessage(format!("bad CSeq: {:?}", raw)))?;
        let method: rsip::Method = method_str
            .parse()
            .map_err(|_| Error::MalformedMessage(format!("unknown CSeq method: {}", method_str)))?;
        cache.method = Some(method.clone());
        Ok(method)
    }

    pub fn set_cseq(&mut self, number: u32, method: rsip::Method) {
        self.headers.set("CSeq", format!("{} {}", number, method));
        let mut cache = self.cache();
        cache.cseq = Some(number);
        cache.method = Some(method);
    }

    pub fn call_id(&self) -> Option<&str> {
        self.headers.get_first("Call-ID")
    }
}
