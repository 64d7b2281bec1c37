//! `farcall call`: invoke a remote method once.

use farcall_types::config::RpcConfig;
use farcall_types::{RpcResult, Value};
use farcall_wire::{CallProxy, MemorySink};
use std::sync::Arc;

/// Parse a command-line argument as JSON, or take it as a plain string.
pub fn parse_arg(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

pub async fn run(
    config: &RpcConfig,
    target: &str,
    method: &str,
    args: &[String],
    hint: Option<&str>,
) -> RpcResult<()> {
    let sink = Arc::new(MemorySink::new());
    let mut proxy = CallProxy::from_config(target, config)?.with_output(sink.clone());
    if let Some(hint) = hint {
        proxy = proxy.with_location_hint(hint);
    }

    let result = proxy
        .call(method, args.iter().map(|a| parse_arg(a)).collect())
        .await;

    // Remote output is printed even when the call failed.
    let output = sink.contents();
    if !output.is_empty() {
        print!("{output}");
        if !output.ends_with('\n') {
            println!();
        }
    }

    let value = result?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_arg() {
        assert_eq!(parse_arg("1"), json!(1));
        assert_eq!(parse_arg("\"m\""), json!("m"));
        assert_eq!(parse_arg("nic"), json!("nic"));
        assert_eq!(parse_arg("[1,2]"), json!([1, 2]));
        assert_eq!(parse_arg("null"), Value::Null);
    }
}
