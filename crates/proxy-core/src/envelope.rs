//! Resource request envelope read by the front-end programs.
//!
//! The pipeline hands every resource program one JSON object on stdin. The
//! proxy's own settings (`url`, `token`) live in `source`; the object that is
//! forwarded to the remote program carries `source.proxied` when given, or
//! the rest of `source` otherwise.

use crate::config::ActionKind;
use crate::error::{ProxyError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::io::Read;
use url::Url;

/// Proxy connection settings plus whatever else the pipeline configured.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub url: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub proxied: Option<Value>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

/// The request a front-end program receives on stdin.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceRequest {
    pub source: SourceConfig,
    #[serde(default)]
    pub version: Option<Value>,
    #[serde(default)]
    pub params: Option<Value>,
}

/// The request the remote program receives.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForwardedRequest {
    pub source: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl ResourceRequest {
    pub fn from_reader(reader: impl Read) -> Result<Self> {
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn token(&self) -> Option<&str> {
        self.source.token.as_deref().filter(|t| !t.is_empty())
    }

    /// WebSocket endpoint serving `action`.
    pub fn endpoint(&self, action: ActionKind) -> Result<Url> {
        let mut url = Url::parse(&self.source.url).map_err(|e| ProxyError::InvalidEnvelope {
            message: format!("parse {}: {}", self.source.url, e),
        })?;

        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ProxyError::InvalidEnvelope {
                message: "uri scheme must be ws or wss".to_string(),
            });
        }

        let mut path = url.path().to_string();
        if !path.ends_with('/') {
            path.push('/');
        }
        path.push_str(action.as_str());
        url.set_path(&path);

        Ok(url)
    }

    pub fn forwarded(&self) -> ForwardedRequest {
        let source = match &self.source.proxied {
            Some(proxied) => proxied.clone(),
            None => Value::Object(self.source.rest.clone()),
        };

        ForwardedRequest {
            source,
            version: self.version.clone(),
            params: self.params.clone(),
        }
    }
}

impl ForwardedRequest {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_endpoint_appends_action() {
        let request =
            ResourceRequest::from_json(r#"{"source":{"url":"ws://proxy:8080","token":"T"}}"#)
                .unwrap();

        assert_eq!(
            request.endpoint(ActionKind::Check).unwrap().as_str(),
            "ws://proxy:8080/check"
        );
        assert_eq!(request.token(), Some("T"));
    }

    #[test]
    fn test_endpoint_keeps_existing_path() {
        let request =
            ResourceRequest::from_json(r#"{"source":{"url":"wss://h/tunnel/"}}"#).unwrap();
        assert_eq!(
            request.endpoint(ActionKind::In).unwrap().as_str(),
            "wss://h/tunnel/in"
        );

        let request = ResourceRequest::from_json(r#"{"source":{"url":"wss://h/x"}}"#).unwrap();
        assert_eq!(
            request.endpoint(ActionKind::Out).unwrap().as_str(),
            "wss://h/x/out"
        );
    }

    #[test]
    fn test_endpoint_rejects_http_scheme() {
        let request = ResourceRequest::from_json(r#"{"source":{"url":"http://h"}}"#).unwrap();
        assert!(matches!(
            request.endpoint(ActionKind::Check),
            Err(ProxyError::InvalidEnvelope { .. })
        ));
    }

    #[test]
    fn test_forwarded_strips_proxy_settings() {
        let request = ResourceRequest::from_json(
            r#"{"source":{"url":"ws://h/x","token":"T","repo":"r"},"version":{"ref":"1"}}"#,
        )
        .unwrap();

        let forwarded = request.forwarded();
        assert_eq!(forwarded.source, json!({"repo": "r"}));
        assert_eq!(
            forwarded.to_json().unwrap(),
            r#"{"source":{"repo":"r"},"version":{"ref":"1"}}"#
        );
    }

    #[test]
    fn test_forwarded_prefers_proxied_source() {
        let request = ResourceRequest::from_json(
            r#"{"source":{"url":"ws://h","proxied":{"uri":"git@x"},"other":1},"params":{"p":true}}"#,
        )
        .unwrap();

        let forwarded = request.forwarded();
        assert_eq!(forwarded.source, json!({"uri": "git@x"}));
        assert_eq!(forwarded.version, None);
        assert_eq!(forwarded.params, Some(json!({"p": true})));
    }

    #[test]
    fn test_missing_url_is_an_error() {
        assert!(ResourceRequest::from_json(r#"{"source":{}}"#).is_err());
    }

    #[test]
    fn test_empty_token_counts_as_absent() {
        let request =
            ResourceRequest::from_json(r#"{"source":{"url":"ws://h","token":""}}"#).unwrap();
        assert_eq!(request.token(), None);
    }
}
