//! `Contact`-shaped header value: an optional display name, a URI
//! (parsing delegated to [`rsip::Uri`]), and an ordered parameter map.
//! Used for `From`, `To`, and `Contact` header values alike.

use std::fmt;

/// A parsed `"Display Name" <uri>;param=val;param2=val2` header value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    pub display_name: Option<String>,
    pub uri: rsip::Uri,
    params: Vec<(String, Option<String>)>,
}

impl Contact {
    pub fn new(uri: rsip::Uri) -> Self {
        Self {
            display_name: None,
            uri,
            params: Vec::new(),
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn set_param(&mut self, name: impl Into<String>, value: Option<impl Into<String>>) {
        let name = name.into();
        let value = value.map(|v| v.into());
        if let Some(existing) = self.params.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(&name)) {
            existing.1 = value;
        } else {
            self.params.push((name, value));
        }
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .and_then(|(_, v)| v.as_deref())
    }

    /// The `tag` parameter: the contribution this side of the dialog
    /// makes to dialog identity.
    pub fn tag(&self) -> Option<&str> {
        self.param("tag")
    }

    pub fn set_tag(&mut self, tag: impl Into<String>) {
        self.set_param("tag", Some(tag.into()));
    }

    /// Parses a single header value of the form `"Name" <sip:...>;p=v`.
    /// The angle brackets are optional when there are no parameters.
    pub fn parse(value: &str) -> crate::Result<Self> {
        let value = value.trim();

        let (display_name, rest) = if let Some(start) = value.find('<') {
            let name = value[..start].trim().trim_matches('"').trim();
            let name = if name.is_empty() { None } else { Some(name.to_string()) };
            (name, &value[start..])
        } else {
            (None, value)
        };

        let (uri_part, params_part) = if let Some(stripped) = rest.strip_prefix('<') {
            match stripped.find('>') {
                Some(end) => (stripped[..end].to_string(), stripped[end + 1..].trim_start_matches(';').to_string()),
                None => return Err(crate::Error::MalformedMessage(format!("unterminated uri in {:?}", value))),
            }
        } else {
            match rest.find(';') {
                Some(idx) => (rest[..idx].to_string(), rest[idx + 1..].to_string()),
                None => (rest.to_string(), String::new()),
            }
        };

        let uri: rsip::Uri = uri_part
            .trim()
            .try_into()
            .map_err(|e| crate::Error::MalformedMessage(format!("invalid uri {:?}: {}", uri_part, e)))?;

        let mut contact = Contact { display_name, uri, params: Vec::new() };
        for param in params_part.split(';') {
            let param = param.trim();
            if param.is_empty() {
                continue;
            }
            match param.split_once('=') {
                Some((k, v)) => contact.set_param(k.trim(), Some(v.trim())),
                None => contact.set_param(param, None::<String>),
            }
        }
        Ok(contact)
    }
}

impl fmt::Display for Contact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.display_name {
            write!(f, "\"{}\" ", name)?;
        }
        write!(f, "<{}>", self.uri)?;
        for (name, value) in &self.params {
            match value {
                Some(v) => write!(f, ";{}={}", name, v)?,
                None => write!(f, ";{}", name)?,
            }
        }
        Ok(())
    }
}
