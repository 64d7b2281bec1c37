//! `farcall sign`: print the signature of a JSON envelope.

use farcall_types::config::RpcConfig;
use farcall_types::{RpcError, RpcResult, Value};
use farcall_wire::EnvelopeSigner;
use std::path::Path;

/// What `sign` reports for one document.
#[derive(Debug, PartialEq, Eq)]
pub struct SignReport {
    pub signature: String,
    /// Whether an existing `h` field verified, when the document had one.
    pub verified: Option<bool>,
}

pub fn sign_document(config: &RpcConfig, document: &str) -> RpcResult<SignReport> {
    let signer = EnvelopeSigner::from_config(&config.signing)?;
    let Value::Object(fields) = serde_json::from_str::<Value>(document)? else {
        return Err(RpcError::MalformedEnvelope("document is not a JSON object".into()));
    };
    let signature = signer.sign_fields(&fields)?;
    let verified = fields
        .contains_key(farcall_types::envelope::SIGNATURE_FIELD)
        .then(|| signer.verify_fields(&fields).is_ok());
    Ok(SignReport {
        signature,
        verified,
    })
}

pub fn run(config: &RpcConfig, json: Option<&str>, file: Option<&Path>) -> RpcResult<()> {
    let document = match (json, file) {
        (Some(json), _) => json.to_string(),
        (None, Some(path)) => std::fs::read_to_string(path)?,
        (None, None) => {
            return Err(RpcError::Config(
                "provide a JSON document or --file <path>".into(),
            ))
        }
    };

    let report = sign_document(config, &document)?;
    println!("{}", report.signature);
    match report.verified {
        Some(true) => eprintln!("existing signature verifies"),
        Some(false) => eprintln!("existing signature does NOT verify"),
        None => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn config() -> RpcConfig {
        let mut config = RpcConfig::default();
        config.signing.secret = "super_secret_key".into();
        config
    }

    #[test]
    fn test_sign_is_key_order_independent() {
        let a = sign_document(&config(), r#"{"c":"Calculator","f":"add","a":[1,2],"p":null}"#).unwrap();
        let b = sign_document(&config(), r#"{"p":null,"a":[1,2],"f":"add","c":"Calculator"}"#).unwrap();
        assert_eq!(a.signature, b.signature);
        assert_eq!(a.verified, None);
    }

    #[test]
    fn test_reports_existing_signature() {
        let unsigned = sign_document(&config(), r#"{"x":1}"#).unwrap();
        let doc = format!(r#"{{"x":1,"h":"{}"}}"#, unsigned.signature);
        let report = sign_document(&config(), &doc).unwrap();
        assert_eq!(report.signature, unsigned.signature);
        assert_eq!(report.verified, Some(true));

        let report = sign_document(&config(), r#"{"x":1,"h":"00"}"#).unwrap();
        assert_eq!(report.verified, Some(false));
    }

    #[test]
    fn test_rejects_non_object_and_empty_secret() {
        assert!(sign_document(&config(), "[1,2]").is_err());
        assert!(matches!(
            sign_document(&RpcConfig::default(), "{}"),
            Err(RpcError::Config(_))
        ));
    }

    #[test]
    fn test_run_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"a":[]}}"#).unwrap();
        assert!(run(&config(), None, Some(file.path())).is_ok());
        assert!(run(&config(), None, None).is_err());
    }
}
