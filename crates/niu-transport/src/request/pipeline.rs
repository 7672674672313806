//! Ordered request/response transformation stages.
//!
//! Outbound, a request passes [`EncryptBody`] then [`SignRequest`]; inbound, a 2xx
//! response passes [`VerifySignature`] then [`DecryptBody`] and is finally parsed by
//! [`parse_body`]. Stages are re-run on every attempt, so each retry carries a fresh
//! nonce and timestamp.

use crate::config::ClientConfig;
use crate::request::http::Method;
use crate::secrets::SessionSecrets;
use crate::{Error, Result};
use niu_core::canonical::{RequestSignPayload, ResponseSignPayload};
use niu_crypto::sign::{sign_to_string, verify_str};
use niu_crypto::BoxCrypter;
use niu_platform::Platform;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

/// Content type of encrypted bodies.
pub const ENCRYPTED_CONTENT_TYPE: &str = "application/x-encrypted;charset=utf-8";

/// Content type of plain JSON bodies.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Response header carrying the plaintext type of an encrypted body.
pub const RAW_TYPE_HEADER: &str = "x-raw-type";

/// Per-request inputs shared by every stage.
pub struct StageContext<'a> {
    /// Client configuration.
    pub config: &'a ClientConfig,
    /// Session secrets loaded for this request.
    pub secrets: &'a SessionSecrets,
    /// Client id sent as `x-client`.
    pub client_id: &'a str,
    /// Bearer token, sent on non-browser platforms.
    pub token: Option<&'a str>,
}

impl StageContext<'_> {
    fn crypter(&self) -> Result<BoxCrypter> {
        Ok(BoxCrypter::new(
            &self.secrets.box_key_pair,
            &self.config.server_box_key,
        )?)
    }
}

/// Request being prepared.
#[derive(Debug, Clone)]
pub struct Outbound {
    /// Method.
    pub method: Method,
    /// Path relative to the API base.
    pub path: String,
    /// Encoded query string, empty when there is none.
    pub query: String,
    /// Application body before encoding.
    pub json: Option<Value>,
    /// Body text as it goes on the wire.
    pub body: Option<String>,
    /// Header pairs, names lower-case.
    pub headers: Vec<(String, String)>,
}

impl Outbound {
    /// Request with no body and no headers.
    pub fn new(method: Method, path: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: query.into(),
            json: None,
            body: None,
            headers: Vec::new(),
        }
    }

    /// Attach an application body.
    pub fn with_json(mut self, json: Value) -> Self {
        self.json = Some(json);
        self
    }

    /// Set a header, replacing an existing one of the same name.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.headers.iter_mut().find(|(k, _)| k == name) {
            Some(slot) => slot.1 = value,
            None => self.headers.push((name.to_string(), value)),
        }
    }

    /// Header value named `name`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// 2xx response being processed.
#[derive(Debug, Clone)]
pub struct Inbound {
    /// Status code.
    pub status: u16,
    /// Headers keyed by lower-case name.
    pub headers: std::collections::HashMap<String, String>,
    /// Body text; plaintext once decrypted.
    pub body: String,
    /// Whether the body has been decrypted.
    pub decrypted: bool,
}

impl Inbound {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Transformation applied to each outbound request.
pub trait OutboundStage: Send + Sync {
    /// Stage name for logs.
    fn name(&self) -> &'static str;

    /// Rewrite the request.
    fn apply(&self, request: &mut Outbound, ctx: &StageContext<'_>) -> Result<()>;
}

/// Transformation applied to each 2xx response.
pub trait InboundStage: Send + Sync {
    /// Stage name for logs.
    fn name(&self) -> &'static str;

    /// Check or rewrite the response of `request`.
    fn apply(
        &self,
        response: &mut Inbound,
        request: &Outbound,
        ctx: &StageContext<'_>,
    ) -> Result<()>;
}

/// Serializes the application body, encrypting POST/PUT bodies when crypto is on.
#[derive(Debug, Default, Clone, Copy)]
pub struct EncryptBody;

impl OutboundStage for EncryptBody {
    fn name(&self) -> &'static str {
        "encrypt-body"
    }

    fn apply(&self, request: &mut Outbound, ctx: &StageContext<'_>) -> Result<()> {
        let Some(json) = &request.json else {
            return Ok(());
        };
        let text = serde_json::to_string(json)
            .map_err(|e| Error::Protocol(niu_core::Error::Marshal(e.to_string())))?;

        if ctx.config.enable_crypto && request.method.carries_encrypted_body() {
            request.body = Some(ctx.crypter()?.seal_to_string(text.as_bytes())?);
            request.set_header("content-type", ENCRYPTED_CONTENT_TYPE);
        } else {
            request.body = Some(text);
            request.set_header("content-type", JSON_CONTENT_TYPE);
        }
        Ok(())
    }
}

/// Signs the request and adds the session headers.
#[derive(Debug, Default, Clone, Copy)]
pub struct SignRequest;

impl OutboundStage for SignRequest {
    fn name(&self) -> &'static str {
        "sign-request"
    }

    fn apply(&self, request: &mut Outbound, ctx: &StageContext<'_>) -> Result<()> {
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let timestamp = (niu_core::packet::now_millis() / 1000).to_string();
        let platform = ctx.config.platform.id().to_string();

        let authorization = match ctx.config.platform {
            Platform::Browser => None,
            _ => ctx.token,
        };

        let payload = RequestSignPayload {
            session: &ctx.secrets.session_id,
            nonce: &nonce,
            timestamp: &timestamp,
            platform: &platform,
            method: request.method.as_str(),
            path: &request.path,
            query: &request.query,
            body: request.body.as_deref(),
            authorization,
        };
        let signature = sign_to_string(&ctx.secrets.sign_key_pair, payload.canonical()?.as_bytes());

        if let Some(token) = authorization {
            request.set_header("authorization", format!("Bearer {}", token));
        }
        request.set_header("x-signature", signature);
        request.set_header("x-session", ctx.secrets.session_id.as_str());
        request.set_header("x-nonce", nonce);
        request.set_header("x-timestamp", timestamp);
        request.set_header("x-platform", platform);
        request.set_header("x-client", ctx.client_id);
        Ok(())
    }
}

/// Rejects responses without a valid server signature.
#[derive(Debug, Default, Clone, Copy)]
pub struct VerifySignature;

impl InboundStage for VerifySignature {
    fn name(&self) -> &'static str {
        "verify-signature"
    }

    fn apply(
        &self,
        response: &mut Inbound,
        request: &Outbound,
        ctx: &StageContext<'_>,
    ) -> Result<()> {
        let (Some(timestamp), Some(nonce), Some(signature)) = (
            response.header("x-timestamp"),
            response.header("x-nonce"),
            response.header("x-signature"),
        ) else {
            warn!(path = %request.path, "response is missing signature headers");
            return Err(Error::SignatureVerificationFailed);
        };

        let platform = ctx.config.platform.id().to_string();
        let payload = ResponseSignPayload {
            session: &ctx.secrets.session_id,
            nonce,
            platform: &platform,
            timestamp,
            method: request.method.as_lower_str(),
            path: &request.path,
            query: &request.query,
            body: &response.body,
        };

        if !verify_str(
            &ctx.config.server_sign_key,
            payload.canonical()?.as_bytes(),
            signature,
        ) {
            warn!(path = %request.path, "response signature rejected");
            return Err(Error::SignatureVerificationFailed);
        }
        Ok(())
    }
}

/// Opens encrypted response bodies.
#[derive(Debug, Default, Clone, Copy)]
pub struct DecryptBody;

impl InboundStage for DecryptBody {
    fn name(&self) -> &'static str {
        "decrypt-body"
    }

    fn apply(
        &self,
        response: &mut Inbound,
        _request: &Outbound,
        ctx: &StageContext<'_>,
    ) -> Result<()> {
        let encrypted = response
            .header("content-type")
            .is_some_and(|ct| ct.starts_with("application/x-encrypted"));
        if !encrypted || response.body.is_empty() {
            return Ok(());
        }

        let plaintext = ctx
            .crypter()?
            .open_from_str(&response.body)
            .map_err(|e| Error::DecryptionFailed(e.to_string()))?;
        response.body = String::from_utf8(plaintext.to_vec())
            .map_err(|e| Error::DecryptionFailed(e.to_string()))?;
        response.decrypted = true;
        Ok(())
    }
}

/// Ordered stage lists.
pub struct Pipeline {
    outbound: Vec<Box<dyn OutboundStage>>,
    inbound: Vec<Box<dyn InboundStage>>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::secure()
    }
}

impl Pipeline {
    /// Empty pipeline.
    pub fn empty() -> Self {
        Self {
            outbound: Vec::new(),
            inbound: Vec::new(),
        }
    }

    /// Encrypt, sign, verify, decrypt.
    pub fn secure() -> Self {
        Self::empty()
            .with_outbound(EncryptBody)
            .with_outbound(SignRequest)
            .with_inbound(VerifySignature)
            .with_inbound(DecryptBody)
    }

    /// Append an outbound stage.
    pub fn with_outbound(mut self, stage: impl OutboundStage + 'static) -> Self {
        self.outbound.push(Box::new(stage));
        self
    }

    /// Append an inbound stage.
    pub fn with_inbound(mut self, stage: impl InboundStage + 'static) -> Self {
        self.inbound.push(Box::new(stage));
        self
    }

    /// Run every outbound stage in order.
    pub fn prepare(&self, request: &mut Outbound, ctx: &StageContext<'_>) -> Result<()> {
        for stage in &self.outbound {
            stage.apply(request, ctx)?;
            debug!(stage = stage.name(), path = %request.path, "outbound stage applied");
        }
        Ok(())
    }

    /// Run every inbound stage in order, then parse the body.
    pub fn receive(
        &self,
        mut response: Inbound,
        request: &Outbound,
        ctx: &StageContext<'_>,
    ) -> Result<ResponseBody> {
        for stage in &self.inbound {
            stage.apply(&mut response, request, ctx)?;
        }
        parse_body(&response)
    }
}

/// Decoded response body.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    /// JSON document.
    Json(Value),
    /// Non-JSON text.
    Text(String),
    /// No body.
    Empty,
}

impl ResponseBody {
    /// Deserialize a JSON body into `T`. An empty body deserializes from `null`.
    ///
    /// # Errors
    ///
    /// Returns `Error::ResponseParseFailed` for text bodies or shape mismatches.
    pub fn into_json<T: DeserializeOwned>(self) -> Result<T> {
        let value = match self {
            ResponseBody::Json(value) => value,
            ResponseBody::Empty => Value::Null,
            ResponseBody::Text(_) => {
                return Err(Error::ResponseParseFailed("body is not JSON".into()))
            }
        };
        serde_json::from_value(value).map_err(|e| Error::ResponseParseFailed(e.to_string()))
    }

    /// JSON value, if the body is JSON.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ResponseBody::Json(value) => Some(value),
            _ => None,
        }
    }
}

/// Parse a verified body by its declared type.
///
/// Decrypted bodies are typed by `x-raw-type`, plain ones by `content-type`.
pub fn parse_body(response: &Inbound) -> Result<ResponseBody> {
    if response.body.is_empty() {
        return Ok(ResponseBody::Empty);
    }

    let declared = if response.decrypted {
        response.header(RAW_TYPE_HEADER)
    } else {
        response.header("content-type")
    };

    if declared.is_some_and(|t| t.starts_with(JSON_CONTENT_TYPE)) {
        serde_json::from_str(&response.body)
            .map(ResponseBody::Json)
            .map_err(|e| Error::ResponseParseFailed(e.to_string()))
    } else {
        Ok(ResponseBody::Text(response.body.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::ensure_secrets;
    use niu_crypto::{generate_box_key_pair, generate_sign_key_pair, KeyPair};
    use niu_platform::mock::MemoryStore;
    use serde_json::json;
    use std::collections::HashMap;

    struct Fixture {
        config: ClientConfig,
        secrets: SessionSecrets,
        server_sign: KeyPair,
        server_box: KeyPair,
    }

    impl Fixture {
        fn new() -> Self {
            let server_sign = generate_sign_key_pair();
            let server_box = generate_box_key_pair();
            let config = ClientConfig::new(
                "https://api.test",
                *server_sign.public_key(),
                *server_box.public_key(),
            );
            let secrets = ensure_secrets(&MemoryStore::new(), &config).unwrap();
            Self {
                config,
                secrets,
                server_sign,
                server_box,
            }
        }

        fn ctx(&self) -> StageContext<'_> {
            StageContext {
                config: &self.config,
                secrets: &self.secrets,
                client_id: "0123456789abcdef0123456789abcdef",
                token: Some("tok"),
            }
        }

        fn signed_response(&self, request: &Outbound, body: &str) -> Inbound {
            let platform = self.config.platform.id().to_string();
            let payload = ResponseSignPayload {
                session: &self.secrets.session_id,
                nonce: "server-nonce",
                platform: &platform,
                timestamp: "1700000000",
                method: request.method.as_lower_str(),
                path: &request.path,
                query: &request.query,
                body,
            };
            let signature = sign_to_string(&self.server_sign, payload.canonical().unwrap().as_bytes());
            let headers = HashMap::from([
                ("x-nonce".to_string(), "server-nonce".to_string()),
                ("x-timestamp".to_string(), "1700000000".to_string()),
                ("x-signature".to_string(), signature),
                ("content-type".to_string(), "application/json".to_string()),
            ]);
            Inbound {
                status: 200,
                headers,
                body: body.to_string(),
                decrypted: false,
            }
        }
    }

    #[test]
    fn test_post_body_is_encrypted_and_signed() {
        let fx = Fixture::new();
        let mut request = Outbound::new(Method::Post, "/v1/user", "").with_json(json!({"a": 1}));
        Pipeline::secure().prepare(&mut request, &fx.ctx()).unwrap();

        assert_eq!(request.header("content-type"), Some(ENCRYPTED_CONTENT_TYPE));
        let body = request.body.clone().unwrap();
        assert_ne!(body, r#"{"a":1}"#);

        let server = BoxCrypter::new(&fx.server_box, fx.secrets.box_key_pair.public_key()).unwrap();
        assert_eq!(&server.open_from_str(&body).unwrap()[..], br#"{"a":1}"#);

        let payload = RequestSignPayload {
            session: &fx.secrets.session_id,
            nonce: request.header("x-nonce").unwrap(),
            timestamp: request.header("x-timestamp").unwrap(),
            platform: "8",
            method: "POST",
            path: "/v1/user",
            query: "",
            body: Some(&body),
            authorization: None,
        };
        assert!(verify_str(
            fx.secrets.sign_key_pair.public_key(),
            payload.canonical().unwrap().as_bytes(),
            request.header("x-signature").unwrap(),
        ));
        assert_eq!(request.header("authorization"), None, "browser sends no bearer");
        assert_eq!(request.header("x-nonce").unwrap().len(), 32);
    }

    #[test]
    fn test_get_body_is_plain_json() {
        let fx = Fixture::new();
        let mut request = Outbound::new(Method::Get, "/v1/items", "page=2").with_json(json!([1]));
        Pipeline::secure().prepare(&mut request, &fx.ctx()).unwrap();
        assert_eq!(request.body.as_deref(), Some("[1]"));
        assert_eq!(request.header("content-type"), Some(JSON_CONTENT_TYPE));
    }

    #[test]
    fn test_desktop_sends_bearer() {
        let mut fx = Fixture::new();
        fx.config.platform = Platform::Mac;
        let mut request = Outbound::new(Method::Get, "/v1/me", "");
        Pipeline::secure().prepare(&mut request, &fx.ctx()).unwrap();
        assert_eq!(request.header("authorization"), Some("Bearer tok"));
        assert_eq!(request.header("x-platform"), Some("4"));
    }

    #[test]
    fn test_signed_response_accepted_and_parsed() {
        let fx = Fixture::new();
        let request = Outbound::new(Method::Get, "/v1/me", "");
        let response = fx.signed_response(&request, r#"{"name":"n"}"#);
        let body = Pipeline::secure().receive(response, &request, &fx.ctx()).unwrap();
        assert_eq!(body, ResponseBody::Json(json!({"name": "n"})));
    }

    #[test]
    fn test_tampered_body_rejected() {
        let fx = Fixture::new();
        let request = Outbound::new(Method::Get, "/v1/me", "");
        let mut response = fx.signed_response(&request, r#"{"name":"n"}"#);
        response.body = r#"{"name":"m"}"#.into();
        assert!(matches!(
            Pipeline::secure().receive(response, &request, &fx.ctx()),
            Err(Error::SignatureVerificationFailed)
        ));
    }

    #[test]
    fn test_missing_header_rejected() {
        let fx = Fixture::new();
        let request = Outbound::new(Method::Get, "/v1/me", "");
        let mut response = fx.signed_response(&request, "ok");
        response.headers.remove("x-nonce");
        assert!(matches!(
            VerifySignature.apply(&mut response, &request, &fx.ctx()),
            Err(Error::SignatureVerificationFailed)
        ));
    }

    #[test]
    fn test_garbled_ciphertext_fails_decryption() {
        let fx = Fixture::new();
        let request = Outbound::new(Method::Get, "/v1/me", "");
        let mut response = fx.signed_response(&request, "AAAA");
        response
            .headers
            .insert("content-type".into(), ENCRYPTED_CONTENT_TYPE.into());
        assert!(matches!(
            DecryptBody.apply(&mut response, &request, &fx.ctx()),
            Err(Error::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_parse_body_by_declared_type() {
        let mut inbound = Inbound {
            status: 200,
            headers: HashMap::new(),
            body: "plain".into(),
            decrypted: false,
        };
        assert_eq!(parse_body(&inbound).unwrap(), ResponseBody::Text("plain".into()));

        inbound
            .headers
            .insert("content-type".into(), "application/json; charset=utf-8".into());
        assert!(matches!(parse_body(&inbound), Err(Error::ResponseParseFailed(_))));

        inbound.decrypted = true;
        inbound.body = "[1,2]".into();
        inbound.headers.insert(RAW_TYPE_HEADER.into(), "application/json".into());
        assert_eq!(parse_body(&inbound).unwrap(), ResponseBody::Json(json!([1, 2])));

        inbound.body.clear();
        assert_eq!(parse_body(&inbound).unwrap(), ResponseBody::Empty);
    }

    #[test]
    fn test_into_json() {
        let body = ResponseBody::Json(json!({"id": 3}));
        #[derive(serde::Deserialize)]
        struct Item {
            id: u32,
        }
        assert_eq!(body.into_json::<Item>().unwrap().id, 3);
        assert!(ResponseBody::Text("x".into()).into_json::<Item>().is_err());
        assert_eq!(ResponseBody::Empty.into_json::<Option<u8>>().unwrap(), None);
    }
}
