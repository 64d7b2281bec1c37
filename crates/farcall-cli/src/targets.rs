//! Built-in targets served by `farcall serve`.

use farcall_types::{ErrorRecord, Value};
use farcall_wire::{method_not_found, Args, CaptureScope, RemoteTarget, TargetRegistry};
use serde_json::json;

#[derive(Debug, Default)]
pub struct Calculator;

impl RemoteTarget for Calculator {
    fn invoke(
        &mut self,
        method: &str,
        args: &Args<'_>,
        _out: &mut CaptureScope,
    ) -> Result<Value, ErrorRecord> {
        match method {
            "add" => args
                .get::<i64>(0)?
                .checked_add(args.get::<i64>(1)?)
                .map(|v| json!(v))
                .ok_or_else(|| ErrorRecord::raised("integer overflow")),
            "subtract" => args
                .get::<i64>(0)?
                .checked_sub(args.get::<i64>(1)?)
                .map(|v| json!(v))
                .ok_or_else(|| ErrorRecord::raised("integer overflow")),
            other => Err(method_not_found("Calculator", other)),
        }
    }
}

/// Demo type exercising captured output and raised failures.
#[derive(Debug, Default)]
pub struct RemoteClass;

impl RemoteTarget for RemoteClass {
    fn invoke(
        &mut self,
        method: &str,
        args: &Args<'_>,
        out: &mut CaptureScope,
    ) -> Result<Value, ErrorRecord> {
        match method {
            "greet" => {
                let first: String = args.get(0)?;
                let second: String = args.get(1)?;
                writeln!(out, "Hello");
                write!(out, "Yey {first} {second}");
                Ok(Value::Null)
            }
            "fail" => {
                let message = args
                    .optional::<String>(0)?
                    .unwrap_or_else(|| "Cool error".to_string());
                Err(ErrorRecord::raised(message))
            }
            other => Err(method_not_found("RemoteClass", other)),
        }
    }
}

/// Registry holding every built-in target.
pub fn builtin_registry() -> TargetRegistry {
    let registry = TargetRegistry::new();
    registry.register::<Calculator>("Calculator");
    registry.register_at::<RemoteClass>("RemoteClass", "src/targets.rs");
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(target: &mut dyn RemoteTarget, method: &str, args: Vec<Value>) -> (Result<Value, ErrorRecord>, String) {
        let mut out = CaptureScope::begin();
        let result = target.invoke(method, &Args::new(&args), &mut out);
        (result, out.end())
    }

    #[test]
    fn test_calculator() {
        let (result, output) = run(&mut Calculator, "add", vec![json!(1), json!(2)]);
        assert_eq!(result.unwrap(), json!(3));
        assert_eq!(output, "");
        let (result, _) = run(&mut Calculator, "subtract", vec![json!(1), json!(2)]);
        assert_eq!(result.unwrap(), json!(-1));
    }

    #[test]
    fn test_calculator_overflow_is_raised() {
        let (result, _) = run(&mut Calculator, "add", vec![json!(i64::MAX), json!(1)]);
        assert_eq!(result.unwrap_err().message, "integer overflow");
        let (result, _) = run(&mut Calculator, "subtract", vec![json!(i64::MIN), json!(1)]);
        assert_eq!(result.unwrap_err().message, "integer overflow");
    }

    #[test]
    fn test_greet() {
        let (result, output) = run(&mut RemoteClass, "greet", vec![json!("m"), json!("nic")]);
        assert_eq!(result.unwrap(), Value::Null);
        assert_eq!(output, "Hello\nYey m nic");
    }

    #[test]
    fn test_fail() {
        let (result, _) = run(&mut RemoteClass, "fail", vec![]);
        assert_eq!(result.unwrap_err().message, "Cool error");
    }

    #[test]
    fn test_registry_contents() {
        let registry = builtin_registry();
        assert_eq!(registry.names(), vec!["Calculator", "RemoteClass"]);
        assert!(registry.resolve("Greeter", Some("./src/targets.rs")).is_some());
    }
}
