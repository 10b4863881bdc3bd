//! Built-in line transforms for the CLI. Each is `String -> anyhow::Result<String>`.

use anyhow::{Result, bail};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::pipeline::TransformFn;

/// Names accepted by [`line_transform`], with a short description.
pub const BUILTIN_TRANSFORMS: &[(&str, &str)] = &[
    ("trim", "strip leading and trailing whitespace"),
    ("upper", "uppercase"),
    ("lower", "lowercase"),
    ("reverse", "reverse characters"),
    ("hash", "blake3 hex digest of the line"),
    ("chars", "replace the line with its character count"),
    ("nonempty", "fail on blank lines"),
    ("number", "fail unless the line is an integer; normalizes it"),
    ("delay=<ms>", "sleep <ms> milliseconds, then pass the line through"),
];

/// Resolve `name` or `name=arg` to a transform.
pub fn line_transform(spec: &str) -> Result<TransformFn<String, String>> {
    let (name, arg) = match spec.split_once('=') {
        Some((name, arg)) => (name.trim(), Some(arg.trim())),
        None => (spec.trim(), None),
    };
    let f: TransformFn<String, String> = match (name, arg) {
        ("trim", None) => wrap(|s| Ok(s.trim().to_string())),
        ("upper", None) => wrap(|s| Ok(s.to_uppercase())),
        ("lower", None) => wrap(|s| Ok(s.to_lowercase())),
        ("reverse", None) => wrap(|s| Ok(s.chars().rev().collect())),
        ("hash", None) => wrap(|s| Ok(hash_line(&s))),
        ("chars", None) => wrap(|s| Ok(s.chars().count().to_string())),
        ("nonempty", None) => wrap(require_nonempty),
        ("number", None) => wrap(require_number),
        ("delay", Some(ms)) => {
            let ms: u64 = ms
                .parse()
                .map_err(|_| anyhow::anyhow!("delay expects milliseconds, got {:?}", ms))?;
            let pause = Duration::from_millis(ms);
            wrap(move |s| {
                thread::sleep(pause);
                Ok(s)
            })
        }
        ("delay", None) => bail!("delay needs an argument, e.g. delay=10"),
        (name, Some(_)) if is_builtin(name) => bail!("transform {:?} takes no argument", name),
        _ => bail!(
            "unknown transform {:?}; known: {}",
            spec,
            BUILTIN_TRANSFORMS
                .iter()
                .map(|(n, _)| *n)
                .collect::<Vec<_>>()
                .join(", ")
        ),
    };
    Ok(f)
}

fn wrap<F>(f: F) -> TransformFn<String, String>
where
    F: Fn(String) -> Result<String> + Send + Sync + 'static,
{
    Arc::new(f)
}

fn is_builtin(name: &str) -> bool {
    BUILTIN_TRANSFORMS
        .iter()
        .any(|(n, _)| n.split('=').next() == Some(name))
}

/// Blake3 digest of the line as lowercase hex.
pub fn hash_line(s: &str) -> String {
    blake3::hash(s.as_bytes()).to_hex().to_string()
}

fn require_nonempty(s: String) -> Result<String> {
    if s.trim().is_empty() {
        bail!("blank line");
    }
    Ok(s)
}

fn require_number(s: String) -> Result<String> {
    let n: i64 = s
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("not an integer: {:?}", s))?;
    Ok(n.to_string())
}
