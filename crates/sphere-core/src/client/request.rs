//! Reproducible request descriptions.
//!
//! A request must be rebuildable after a credential refresh, so calls are
//! described as plain values and turned into `reqwest` requests on demand.

use reqwest::Method;
use std::borrow::Cow;
use reqwest::multipart::{Form, Part};
use serde::Serialize;

use crate::error::Result;
use crate::types::MediaUpload;

/// One outbound call to the REST service.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Body,
    /// Attach the session credential and recover from an expired one.
    /// Off for the auth endpoints that work without a session.
    pub authenticated: bool,
    replayed: bool,
}

#[derive(Debug, Clone, Default)]
pub enum Body {
    #[default]
    Empty,
    Json(serde_json::Value),
    Multipart(Vec<FormPart>),
}

#[derive(Debug, Clone)]
pub struct FormPart {
    pub name: String,
    pub value: PartValue,
}

#[derive(Debug, Clone)]
pub enum PartValue {
    Text(String),
    File(MediaUpload),
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: Body::Empty,
            authenticated: true,
            replayed: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    /// Send without the session credential and never refresh.
    pub fn public(mut self) -> Self {
        self.authenticated = false;
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn json<B: Serialize>(mut self, body: &B) -> Result<Self> {
        self.body = Body::Json(serde_json::to_value(body)?);
        Ok(self)
    }

    pub fn text_part(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.push_part(FormPart {
            name: name.into(),
            value: PartValue::Text(value.into()),
        });
        self
    }

    pub fn file_part(mut self, name: impl Into<String>, file: MediaUpload) -> Self {
        self.push_part(FormPart {
            name: name.into(),
            value: PartValue::File(file),
        });
        self
    }

    fn push_part(&mut self, part: FormPart) {
        match &mut self.body {
            Body::Multipart(parts) => parts.push(part),
            body => *body = Body::Multipart(vec![part]),
        }
    }

    /// Whether this call has already been replayed after a refresh.
    pub fn is_replay(&self) -> bool {
        self.replayed
    }

    pub(crate) fn mark_replayed(&mut self) {
        self.replayed = true;
    }
}

/// Percent-encode a value for use as one path segment.
pub fn segment(value: &str) -> Cow<'_, str> {
    urlencoding::encode(value)
}

impl Body {
    /// Build a multipart form from the parts. Only meaningful for `Multipart`.
    pub(crate) fn to_form(parts: &[FormPart]) -> Result<Form> {
        let mut form = Form::new();
        for part in parts {
            form = match &part.value {
                PartValue::Text(text) => form.text(part.name.clone(), text.clone()),
                PartValue::File(file) => {
                    let mut p = Part::bytes(file.bytes.clone()).file_name(file.file_name.clone());
                    if let Some(mime) = &file.mime {
                        p = p.mime_str(mime)?;
                    }
                    form.part(part.name.clone(), p)
                }
            };
        }
        Ok(form)
    }
}
