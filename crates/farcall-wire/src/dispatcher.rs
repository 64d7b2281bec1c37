//! Remote dispatcher: the server-side entry point for one inbound call.
//!
//! Every request walks the same linear path:
//!
//! 1. authenticate the transport (Basic credentials, POST, `Auth` token);
//!    any failure ends in an opaque 404 and the body is never parsed
//! 2. verify the envelope signature
//! 3. resolve the target through the [`TargetRegistry`]
//! 4. invoke it inside a fresh [`CaptureScope`], catching failures and panics
//! 5. marshal value or error plus captured output
//! 6. sign the response envelope
//!
//! Once authentication has passed the dispatcher always answers with a
//! signed 200 response, whatever went wrong afterwards.

use crate::capture::CaptureScope;
use crate::connection::TOKEN_HEADER;
use crate::registry::{Resolution, TargetRegistry};
use crate::signing::EnvelopeSigner;
use crate::target::Args;
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use base64::Engine;
use bytes::Bytes;
use farcall_types::config::{AuthConfig, RpcConfig};
use farcall_types::envelope::{CallEnvelope, ErrorRecord, FailureKind, ResponseEnvelope};
use farcall_types::{RpcError, RpcResult};
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{debug, error, info, info_span, warn, Span};
use zeroize::Zeroizing;

/// Why transport authentication failed. Logged, never sent to the caller.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthRejection {
    #[error("request method {0} is not POST")]
    NotPost(String),
    #[error("missing or malformed Basic credentials")]
    MissingCredentials,
    #[error("unknown user or wrong password")]
    BadCredentials,
    #[error("missing or wrong token header")]
    BadToken,
}

/// Transport-level credentials accepted by the dispatcher.
pub struct ServerAuth {
    token: Zeroizing<String>,
    users: HashMap<String, Zeroizing<String>>,
}

impl std::fmt::Debug for ServerAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerAuth")
            .field("users", &self.users.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl ServerAuth {
    /// Build from the `[auth]` section. Refuses an empty token or user table.
    pub fn from_config(config: &AuthConfig) -> RpcResult<Self> {
        if config.token.is_empty() {
            return Err(RpcError::Config(
                "dispatcher requires a shared token. Set [auth] token in config.toml".into(),
            ));
        }
        if config.users.is_empty() {
            return Err(RpcError::Config(
                "dispatcher requires at least one user. Set [auth] users in config.toml".into(),
            ));
        }
        Ok(Self {
            token: Zeroizing::new(config.token.clone()),
            users: config
                .users
                .iter()
                .map(|(user, pass)| (user.clone(), Zeroizing::new(pass.clone())))
                .collect(),
        })
    }

    /// Check method, credentials and token. Returns the authenticated user.
    pub fn authenticate(&self, method: &Method, headers: &HeaderMap) -> Result<String, AuthRejection> {
        let (user, pass) = basic_credentials(headers).ok_or(AuthRejection::MissingCredentials)?;
        let expected = self.users.get(&user).ok_or(AuthRejection::BadCredentials)?;
        if !bool::from(expected.as_bytes().ct_eq(pass.as_bytes())) {
            return Err(AuthRejection::BadCredentials);
        }

        if method != Method::POST {
            return Err(AuthRejection::NotPost(method.to_string()));
        }
        let token = headers
            .get(TOKEN_HEADER)
            .map(|v| v.as_bytes())
            .ok_or(AuthRejection::BadToken)?;
        if !bool::from(self.token.as_bytes().ct_eq(token)) {
            return Err(AuthRejection::BadToken);
        }

        Ok(user)
    }
}

fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

/// The parts of an HTTP request the dispatcher looks at.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Status plus optional JSON body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReply {
    pub status: StatusCode,
    pub body: Option<Vec<u8>>,
}

impl DispatchReply {
    /// Opaque rejection used for every authentication failure.
    pub fn not_found() -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            body: None,
        }
    }

    fn json(body: Vec<u8>) -> Self {
        Self {
            status: StatusCode::OK,
            body: Some(body),
        }
    }
}

impl IntoResponse for DispatchReply {
    fn into_response(self) -> Response {
        match self.body {
            Some(body) => (
                self.status,
                [(header::CONTENT_TYPE, "application/json")],
                body,
            )
                .into_response(),
            None => self.status.into_response(),
        }
    }
}

/// Stateless per-request dispatcher. Cheap to share behind an `Arc`.
#[derive(Debug)]
pub struct RemoteDispatcher {
    auth: ServerAuth,
    signer: Arc<EnvelopeSigner>,
    registry: TargetRegistry,
}

impl RemoteDispatcher {
    pub fn new(auth: ServerAuth, signer: Arc<EnvelopeSigner>, registry: TargetRegistry) -> Self {
        Self {
            auth,
            signer,
            registry,
        }
    }

    pub fn from_config(config: &RpcConfig, registry: TargetRegistry) -> RpcResult<Self> {
        let auth = ServerAuth::from_config(&config.auth)?;
        let signer = Arc::new(EnvelopeSigner::from_config(&config.signing)?);
        Ok(Self::new(auth, signer, registry))
    }

    pub fn registry(&self) -> &TargetRegistry {
        &self.registry
    }

    /// Handle one fully buffered request from start to signed reply.
    pub fn handle(&self, request: &InboundRequest) -> DispatchReply {
        let span = dispatch_span();
        let _guard = span.enter();

        if self.authorize(&request.method, &request.headers).is_err() {
            return DispatchReply::not_found();
        }
        self.dispatch_body(&request.body)
    }

    /// Transport authentication. The rejection reason is only logged.
    pub fn authorize(&self, method: &Method, headers: &HeaderMap) -> RpcResult<String> {
        self.auth.authenticate(method, headers).map_err(|reason| {
            debug!(reason = %reason, "Rejected unauthenticated request");
            RpcError::from(reason)
        })
    }

    /// Everything after authentication: verify, resolve, invoke, sign.
    pub fn dispatch_body(&self, body: &[u8]) -> DispatchReply {
        let response = self.process(body);
        self.respond_signed(response)
    }

    /// Signed `MalformedEnvelope` reply for an authenticated request whose
    /// body could not be read, e.g. because it exceeded the size limit.
    pub fn reject_body(&self, reason: &str) -> DispatchReply {
        warn!(reason, "Unreadable request body");
        self.respond_signed(ResponseEnvelope::failure(
            ErrorRecord::of(FailureKind::MalformedEnvelope, reason),
            String::new(),
        ))
    }

    fn process(&self, body: &[u8]) -> ResponseEnvelope {
        let call = match self.signer.open_call(body) {
            Ok(call) => call,
            Err(RpcError::SignatureMismatch(msg)) => {
                warn!("Call envelope failed signature verification");
                return ResponseEnvelope::failure(
                    ErrorRecord::of(FailureKind::SignatureMismatch, msg),
                    String::new(),
                );
            }
            Err(e) => {
                warn!(error = %e, "Unreadable call envelope");
                return ResponseEnvelope::failure(
                    ErrorRecord::of(FailureKind::MalformedEnvelope, e.to_string()),
                    String::new(),
                );
            }
        };

        let Some(resolution) = self
            .registry
            .resolve(&call.target_type, call.location_hint.as_deref())
        else {
            warn!(target_type = %call.target_type, "Target not found");
            return ResponseEnvelope::failure(
                ErrorRecord::of(
                    FailureKind::TargetNotFound,
                    format!("no target registered as {}", call.target_type),
                ),
                String::new(),
            );
        };

        self.invoke(&resolution, &call)
    }

    fn invoke(&self, resolution: &Resolution, call: &CallEnvelope) -> ResponseEnvelope {
        info!(
            target_type = %resolution.name,
            via = %resolution.via,
            method = %call.method,
            args = call.arguments.len(),
            "Invoking"
        );

        let mut capture = CaptureScope::begin();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut target = (resolution.factory)();
            target.invoke(&call.method, &Args::new(&call.arguments), &mut capture)
        }));
        let output = capture.end();

        match outcome {
            Ok(Ok(value)) => ResponseEnvelope::success(value, output),
            Ok(Err(record)) => {
                debug!(kind = %record.kind, "Invocation raised");
                ResponseEnvelope::failure(record, output)
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(method = %call.method, panic = %message, "Target panicked");
                ResponseEnvelope::failure(ErrorRecord::of(FailureKind::Panic, message), output)
            }
        }
    }

    fn respond_signed(&self, mut response: ResponseEnvelope) -> DispatchReply {
        match self.encode_signed(&mut response) {
            Ok(body) => DispatchReply::json(body),
            Err(e) => {
                error!(error = %e, "Failed to sign response, sending failure instead");
                let mut fallback = ResponseEnvelope::failure(
                    ErrorRecord::new("InternalError", "response could not be encoded"),
                    String::new(),
                );
                match self.encode_signed(&mut fallback) {
                    Ok(body) => DispatchReply::json(body),
                    Err(_) => DispatchReply {
                        status: StatusCode::INTERNAL_SERVER_ERROR,
                        body: None,
                    },
                }
            }
        }
    }

    fn encode_signed(&self, response: &mut ResponseEnvelope) -> RpcResult<Vec<u8>> {
        self.signer.sign_response(response)?;
        Ok(serde_json::to_vec(response)?)
    }
}

/// Span each dispatch runs in, carrying a fresh call id.
pub fn dispatch_span() -> Span {
    let call_id = uuid::Uuid::new_v4().to_string();
    info_span!("dispatch", call_id = %call_id)
}

impl From<AuthRejection> for RpcError {
    fn from(_: AuthRejection) -> Self {
        RpcError::AuthenticationFailure
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "target panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::{method_not_found, RemoteTarget};
    use axum::http::{HeaderName, HeaderValue};
    use farcall_types::config::DigestAlgorithm;
    use farcall_types::envelope::Value;
    use serde_json::json;

    #[derive(Default)]
    struct Calculator;

    impl RemoteTarget for Calculator {
        fn invoke(
            &mut self,
            method: &str,
            args: &Args<'_>,
            out: &mut CaptureScope,
        ) -> Result<Value, ErrorRecord> {
            match method {
                "add" => Ok(json!(args.get::<i64>(0)? + args.get::<i64>(1)?)),
                "sub" => Ok(json!(args.get::<i64>(0)? - args.get::<i64>(1)?)),
                "greet" => {
                    writeln!(out, "Hello");
                    write!(out, "Yey {} {}", args.get::<String>(0)?, args.get::<String>(1)?);
                    Ok(Value::Null)
                }
                "fail" => {
                    out.print("before failure");
                    Err(ErrorRecord::raised(args.get::<String>(0)?))
                }
                "explode" => panic!("boom"),
                other => Err(method_not_found("Calculator", other)),
            }
        }
    }

    fn signer() -> Arc<EnvelopeSigner> {
        Arc::new(EnvelopeSigner::new("super_secret_key", DigestAlgorithm::Sha256).unwrap())
    }

    fn dispatcher() -> RemoteDispatcher {
        let mut auth = AuthConfig::default();
        auth.token = "secret_token".into();
        auth.users.insert("test".into(), "testing".into());
        let registry = TargetRegistry::new();
        registry.register_at::<Calculator>("Calculator", "src/calculator.rs");
        RemoteDispatcher::new(ServerAuth::from_config(&auth).unwrap(), signer(), registry)
    }

    fn headers(user_pass: &str, token: Option<&str>) -> HeaderMap {
        let mut h = HeaderMap::new();
        let encoded = base64::engine::general_purpose::STANDARD.encode(user_pass);
        h.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {encoded}")).unwrap(),
        );
        if let Some(token) = token {
            h.insert(
                HeaderName::from_bytes(TOKEN_HEADER.as_bytes()).unwrap(),
                HeaderValue::from_str(token).unwrap(),
            );
        }
        h
    }

    fn signed_call(target: &str, method: &str, args: Vec<Value>, hint: Option<&str>) -> Bytes {
        let mut call = CallEnvelope::new(target, method, args, hint.map(String::from));
        signer().sign_call(&mut call).unwrap();
        Bytes::from(serde_json::to_vec(&call).unwrap())
    }

    fn request(body: Bytes) -> InboundRequest {
        InboundRequest {
            method: Method::POST,
            headers: headers("test:testing", Some("secret_token")),
            body,
        }
    }

    fn dispatch(req: InboundRequest) -> ResponseEnvelope {
        let reply = dispatcher().handle(&req);
        assert_eq!(reply.status, StatusCode::OK);
        signer()
            .open_response(&reply.body.expect("dispatched call has a body"))
            .expect("response must be signed")
    }

    #[test]
    fn test_add() {
        let resp = dispatch(request(signed_call("Calculator", "add", vec![json!(1), json!(2)], None)));
        assert_eq!(resp.return_value, Some(json!(3)));
        assert!(resp.error.is_none());
        assert_eq!(resp.captured_output, "");
    }

    #[test]
    fn test_argument_order_matters() {
        let a = dispatch(request(signed_call("Calculator", "sub", vec![json!(1), json!(2)], None)));
        let b = dispatch(request(signed_call("Calculator", "sub", vec![json!(2), json!(1)], None)));
        assert_eq!(a.return_value, Some(json!(-1)));
        assert_eq!(b.return_value, Some(json!(1)));
    }

    #[test]
    fn test_captured_output_and_null_return() {
        let resp = dispatch(request(signed_call(
            "Calculator",
            "greet",
            vec![json!("m"), json!("nic")],
            None,
        )));
        assert_eq!(resp.captured_output, "Hello\nYey m nic");
        assert_eq!(resp.return_value, Some(Value::Null));
    }

    #[test]
    fn test_raised_failure_keeps_output() {
        let resp = dispatch(request(signed_call("Calculator", "fail", vec![json!("Cool error")], None)));
        let err = resp.error.unwrap();
        assert_eq!(err.message, "Cool error");
        assert_eq!(err.kind, ErrorRecord::EXECUTION_KIND);
        assert!(resp.return_value.is_none());
        assert_eq!(resp.captured_output, "before failure");
    }

    #[test]
    fn test_panic_becomes_error_record() {
        let resp = dispatch(request(signed_call("Calculator", "explode", vec![], None)));
        let err = resp.error.unwrap();
        assert_eq!(err.known_kind(), FailureKind::Panic);
        assert_eq!(err.message, "boom");
    }

    #[test]
    fn test_unknown_method() {
        let resp = dispatch(request(signed_call("Calculator", "divide", vec![], None)));
        assert_eq!(resp.error.unwrap().known_kind(), FailureKind::MethodNotFound);
    }

    #[test]
    fn test_invalid_arguments() {
        let resp = dispatch(request(signed_call("Calculator", "add", vec![json!("x")], None)));
        assert_eq!(resp.error.unwrap().known_kind(), FailureKind::InvalidArguments);
    }

    #[test]
    fn test_target_not_found() {
        let resp = dispatch(request(signed_call("Nope", "add", vec![], None)));
        assert_eq!(resp.error.unwrap().known_kind(), FailureKind::TargetNotFound);
    }

    #[test]
    fn test_resolves_through_location_hint() {
        let resp = dispatch(request(signed_call(
            "App\\Calc",
            "add",
            vec![json!(2), json!(2)],
            Some("./src/calculator.rs"),
        )));
        assert_eq!(resp.return_value, Some(json!(4)));
    }

    #[test]
    fn test_bad_signature_is_in_band() {
        let body = signed_call("Calculator", "add", vec![json!(1), json!(2)], None);
        let tampered = String::from_utf8(body.to_vec()).unwrap().replace("[1,2]", "[1,3]");
        let resp = dispatch(request(Bytes::from(tampered)));
        assert_eq!(resp.error.unwrap().known_kind(), FailureKind::SignatureMismatch);
        assert!(resp.return_value.is_none());
    }

    #[test]
    fn test_malformed_body_is_in_band() {
        let resp = dispatch(request(Bytes::from_static(b"not json")));
        assert_eq!(resp.error.unwrap().known_kind(), FailureKind::MalformedEnvelope);
    }

    #[test]
    fn test_auth_gating_is_opaque() {
        let d = dispatcher();
        let body = signed_call("Calculator", "add", vec![json!(1), json!(2)], None);
        let cases = vec![
            (Method::POST, headers("test:testing", None)),
            (Method::POST, headers("test:testing", Some("wrong"))),
            (Method::POST, headers("test:wrong", Some("secret_token"))),
            (Method::POST, headers("nobody:testing", Some("secret_token"))),
            (Method::GET, headers("test:testing", Some("secret_token"))),
            (Method::POST, HeaderMap::new()),
        ];
        for (method, headers) in cases {
            let reply = d.handle(&InboundRequest {
                method,
                headers,
                body: body.clone(),
            });
            assert_eq!(reply, DispatchReply::not_found());
        }
    }

    #[test]
    fn test_authorize_maps_to_authentication_failure() {
        let d = dispatcher();
        assert_eq!(
            d.authorize(&Method::POST, &headers("test:testing", Some("secret_token")))
                .unwrap(),
            "test"
        );
        assert!(matches!(
            d.authorize(&Method::POST, &headers("test:testing", Some("wrong"))),
            Err(RpcError::AuthenticationFailure)
        ));
        assert!(matches!(
            RpcError::from(AuthRejection::MissingCredentials),
            RpcError::AuthenticationFailure
        ));
    }

    #[test]
    fn test_reject_body_is_signed_malformed_envelope() {
        let reply = dispatcher().reject_body("request body larger than 1024 bytes");
        assert_eq!(reply.status, StatusCode::OK);
        let resp = signer().open_response(&reply.body.unwrap()).unwrap();
        let err = resp.error.unwrap();
        assert_eq!(err.known_kind(), FailureKind::MalformedEnvelope);
        assert!(err.message.contains("1024"));
        assert!(resp.return_value.is_none());
    }

    #[test]
    fn test_authenticate_reasons() {
        let mut cfg = AuthConfig::default();
        cfg.token = "t".into();
        cfg.users.insert("u".into(), "p".into());
        let auth = ServerAuth::from_config(&cfg).unwrap();

        assert_eq!(
            auth.authenticate(&Method::POST, &headers("u:p", Some("t"))),
            Ok("u".to_string())
        );
        assert_eq!(
            auth.authenticate(&Method::PUT, &headers("u:p", Some("t"))),
            Err(AuthRejection::NotPost("PUT".into()))
        );
        assert_eq!(
            auth.authenticate(&Method::POST, &headers("u:p", Some("x"))),
            Err(AuthRejection::BadToken)
        );
        assert_eq!(
            auth.authenticate(&Method::POST, &headers("u:x", Some("t"))),
            Err(AuthRejection::BadCredentials)
        );
        assert_eq!(
            auth.authenticate(&Method::POST, &HeaderMap::new()),
            Err(AuthRejection::MissingCredentials)
        );
    }

    #[test]
    fn test_password_with_colon() {
        let mut cfg = AuthConfig::default();
        cfg.token = "t".into();
        cfg.users.insert("u".into(), "p:q".into());
        let auth = ServerAuth::from_config(&cfg).unwrap();
        assert!(auth
            .authenticate(&Method::POST, &headers("u:p:q", Some("t")))
            .is_ok());
    }

    #[test]
    fn test_auth_config_required() {
        let mut cfg = AuthConfig::default();
        assert!(ServerAuth::from_config(&cfg).is_err());
        cfg.token = "t".into();
        assert!(ServerAuth::from_config(&cfg).is_err());
        cfg.users.insert("u".into(), "p".into());
        assert!(ServerAuth::from_config(&cfg).is_ok());
    }

    #[test]
    fn test_reply_into_response() {
        let resp = DispatchReply::not_found().into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let resp = DispatchReply::json(b"{}".to_vec()).into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }
}
