//! Canonical form and keyed signatures for envelopes.
//!
//! An envelope is signed by removing its `h` field, writing the rest as
//! compact JSON with every object's keys sorted ascending (byte order,
//! recursively; arrays keep their order) and computing an HMAC over those
//! bytes. The hex-encoded MAC goes back into `h`.
//!
//! Verification always runs over the JSON object exactly as received, so
//! fields the local envelope type does not know about are still covered.

use farcall_types::config::{DigestAlgorithm, SigningConfig};
use farcall_types::envelope::{CallEnvelope, ResponseEnvelope, Value, SIGNATURE_FIELD};
use farcall_types::{RpcError, RpcResult};
use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Map;
use sha2::{Sha256, Sha384, Sha512};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

/// Write the canonical byte form of a value.
pub fn canonical_bytes(value: &Value) -> RpcResult<Vec<u8>> {
    let mut out = Vec::new();
    write_canonical(value, &mut out)?;
    Ok(out)
}

fn write_canonical(value: &Value, out: &mut Vec<u8>) -> RpcResult<()> {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push(b'{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                serde_json::to_writer(&mut *out, key)?;
                out.push(b':');
                write_canonical(&map[key], out)?;
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out)?;
            }
            out.push(b']');
        }
        scalar => serde_json::to_writer(&mut *out, scalar)?,
    }
    Ok(())
}

/// Signs and verifies envelopes with the shared secret.
pub struct EnvelopeSigner {
    secret: Zeroizing<String>,
    algorithm: DigestAlgorithm,
}

impl std::fmt::Debug for EnvelopeSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeSigner")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl EnvelopeSigner {
    /// Create a signer. An empty secret is rejected.
    pub fn new(secret: impl Into<String>, algorithm: DigestAlgorithm) -> RpcResult<Self> {
        let secret = Zeroizing::new(secret.into());
        if secret.is_empty() {
            return Err(RpcError::Config(
                "envelope signing requires a non-empty secret. Set [signing] secret in config.toml"
                    .into(),
            ));
        }
        Ok(Self { secret, algorithm })
    }

    /// Build a signer from the `[signing]` config section.
    ///
    /// Fails when the secret is empty.
    pub fn from_config(config: &SigningConfig) -> RpcResult<Self> {
        Self::new(config.secret.clone(), config.algorithm)
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// Signature over every field except `h`.
    pub fn sign_fields(&self, fields: &Map<String, Value>) -> RpcResult<String> {
        let mut unsigned = fields.clone();
        unsigned.remove(SIGNATURE_FIELD);
        let bytes = canonical_bytes(&Value::Object(unsigned))?;
        Ok(self.mac_hex(&bytes))
    }

    /// Check the `h` field of a received object against its other fields.
    pub fn verify_fields(&self, fields: &Map<String, Value>) -> RpcResult<()> {
        let provided = match fields.get(SIGNATURE_FIELD) {
            Some(Value::String(sig)) => sig,
            Some(_) => return Err(RpcError::SignatureMismatch("signature is not a string".into())),
            None => return Err(RpcError::SignatureMismatch("signature missing".into())),
        };
        let expected = self.sign_fields(fields)?;
        if bool::from(expected.as_bytes().ct_eq(provided.as_bytes())) {
            Ok(())
        } else {
            Err(RpcError::SignatureMismatch("could not verify signature".into()))
        }
    }

    /// Compute the signature of an envelope (its own `h` is ignored).
    pub fn seal<T: Serialize>(&self, envelope: &T) -> RpcResult<String> {
        match serde_json::to_value(envelope)? {
            Value::Object(fields) => self.sign_fields(&fields),
            _ => Err(RpcError::MalformedEnvelope(
                "envelope did not serialize to an object".into(),
            )),
        }
    }

    /// Fill in the call's `h` field.
    pub fn sign_call(&self, call: &mut CallEnvelope) -> RpcResult<()> {
        call.signature = self.seal(call)?;
        Ok(())
    }

    /// Fill in the response's `h` field.
    pub fn sign_response(&self, response: &mut ResponseEnvelope) -> RpcResult<()> {
        response.signature = self.seal(response)?;
        Ok(())
    }

    /// Parse, verify and decode a received call body.
    pub fn open_call(&self, body: &[u8]) -> RpcResult<CallEnvelope> {
        self.open(body)
    }

    /// Parse, verify and decode a received response body.
    pub fn open_response(&self, body: &[u8]) -> RpcResult<ResponseEnvelope> {
        self.open(body)
    }

    fn open<T: DeserializeOwned>(&self, body: &[u8]) -> RpcResult<T> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| RpcError::MalformedEnvelope(format!("body is not JSON: {e}")))?;
        let Value::Object(fields) = value else {
            return Err(RpcError::MalformedEnvelope("body is not a JSON object".into()));
        };
        self.verify_fields(&fields)?;
        serde_json::from_value(Value::Object(fields))
            .map_err(|e| RpcError::MalformedEnvelope(e.to_string()))
    }

    fn mac_hex(&self, data: &[u8]) -> String {
        let key = self.secret.as_bytes();
        match self.algorithm {
            DigestAlgorithm::Sha256 => {
                let mut mac =
                    Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts any key size");
                mac.update(data);
                hex::encode(mac.finalize().into_bytes())
            }
            DigestAlgorithm::Sha384 => {
                let mut mac =
                    Hmac::<Sha384>::new_from_slice(key).expect("HMAC accepts any key size");
                mac.update(data);
                hex::encode(mac.finalize().into_bytes())
            }
            DigestAlgorithm::Sha512 => {
                let mut mac =
                    Hmac::<Sha512>::new_from_slice(key).expect("HMAC accepts any key size");
                mac.update(data);
                hex::encode(mac.finalize().into_bytes())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use farcall_types::envelope::ErrorRecord;
    use serde_json::json;

    fn signer() -> EnvelopeSigner {
        EnvelopeSigner::new("super_secret_key", DigestAlgorithm::Sha256).unwrap()
    }

    fn as_map(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn test_canonical_sorts_keys_recursively() {
        let v = json!({"b": 1, "a": {"z": true, "m": [3, {"y": null, "x": "s"}]}});
        let bytes = canonical_bytes(&v).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"a":{"m":[3,{"x":"s","y":null}],"z":true},"b":1}"#
        );
    }

    #[test]
    fn test_canonical_is_byte_order() {
        let v = json!({"a": 1, "B": 2, "_": 3});
        let bytes = canonical_bytes(&v).unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), r#"{"B":2,"_":3,"a":1}"#);
    }

    #[test]
    fn test_signature_independent_of_field_order() {
        let s = signer();
        let a = as_map(json!({"c": "Calculator", "f": "add", "a": [1, 2], "p": null}));
        let b = as_map(json!({"p": null, "a": [1, 2], "f": "add", "c": "Calculator"}));
        assert_eq!(s.sign_fields(&a).unwrap(), s.sign_fields(&b).unwrap());
    }

    #[test]
    fn test_signature_ignores_existing_h() {
        let s = signer();
        let mut a = as_map(json!({"c": "X", "f": "y"}));
        let before = s.sign_fields(&a).unwrap();
        a.insert("h".into(), json!("stale"));
        assert_eq!(s.sign_fields(&a).unwrap(), before);
    }

    #[test]
    fn test_sign_and_open_call() {
        let s = signer();
        let mut call = CallEnvelope::new("Calculator", "add", vec![json!(1), json!(2)], None);
        s.sign_call(&mut call).unwrap();
        assert_eq!(call.signature.len(), 64);
        let body = serde_json::to_vec(&call).unwrap();
        let opened = s.open_call(&body).unwrap();
        assert_eq!(opened, call);
    }

    #[test]
    fn test_mutating_any_field_fails() {
        let s = signer();
        let mut call = CallEnvelope::new(
            "Calculator",
            "add",
            vec![json!(1), json!(2)],
            Some("src/calc.rs".into()),
        );
        s.sign_call(&mut call).unwrap();
        let signed = as_map(serde_json::to_value(&call).unwrap());
        assert!(s.verify_fields(&signed).is_ok());

        let mutations: Vec<(&str, Value)> = vec![
            ("c", json!("Calculator2")),
            ("f", json!("sub")),
            ("a", json!([2, 1])),
            ("p", json!(null)),
            ("h", json!("0".repeat(64))),
        ];
        for (field, replacement) in mutations {
            let mut tampered = signed.clone();
            tampered.insert(field.to_string(), replacement);
            let err = s.verify_fields(&tampered).unwrap_err();
            assert!(
                matches!(err, RpcError::SignatureMismatch(_)),
                "mutating {field} must fail verification"
            );
        }

        let mut extra = signed.clone();
        extra.insert("x".into(), json!(1));
        assert!(s.verify_fields(&extra).is_err());
    }

    #[test]
    fn test_response_roundtrip_and_tamper() {
        let s = signer();
        let mut resp = ResponseEnvelope::failure(ErrorRecord::raised("Cool error"), "out".into());
        s.sign_response(&mut resp).unwrap();
        let body = serde_json::to_vec(&resp).unwrap();
        assert_eq!(s.open_response(&body).unwrap(), resp);

        let tampered = String::from_utf8(body).unwrap().replace("Cool error", "Warm error");
        let err = s.open_response(tampered.as_bytes()).unwrap_err();
        assert!(matches!(err, RpcError::SignatureMismatch(_)));
    }

    #[test]
    fn test_wrong_secret_fails() {
        let mut call = CallEnvelope::new("A", "b", vec![], None);
        signer().sign_call(&mut call).unwrap();
        let other = EnvelopeSigner::new("another_key", DigestAlgorithm::Sha256).unwrap();
        let body = serde_json::to_vec(&call).unwrap();
        assert!(matches!(
            other.open_call(&body),
            Err(RpcError::SignatureMismatch(_))
        ));
    }

    #[test]
    fn test_algorithms_differ() {
        let fields = as_map(json!({"c": "A"}));
        let s256 = signer().sign_fields(&fields).unwrap();
        let s512 = EnvelopeSigner::new("super_secret_key", DigestAlgorithm::Sha512)
            .unwrap()
            .sign_fields(&fields)
            .unwrap();
        assert_eq!(s256.len(), 64);
        assert_eq!(s512.len(), 128);
    }

    #[test]
    fn test_missing_or_non_string_signature() {
        let s = signer();
        assert!(matches!(
            s.verify_fields(&as_map(json!({"c": "A"}))),
            Err(RpcError::SignatureMismatch(_))
        ));
        assert!(matches!(
            s.verify_fields(&as_map(json!({"c": "A", "h": 5}))),
            Err(RpcError::SignatureMismatch(_))
        ));
    }

    #[test]
    fn test_malformed_bodies() {
        let s = signer();
        assert!(matches!(
            s.open_call(b"not json"),
            Err(RpcError::MalformedEnvelope(_))
        ));
        assert!(matches!(
            s.open_call(b"[1,2]"),
            Err(RpcError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_empty_secret_rejected() {
        assert!(matches!(
            EnvelopeSigner::new("", DigestAlgorithm::Sha256),
            Err(RpcError::Config(_))
        ));
    }
}
