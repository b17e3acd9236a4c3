//! Diagnostic reports for values macro code got wrong
//!
//! Every decode failure and every uncaught exception with a text payload is
//! written to a report file under the dump directory, and the returned error
//! points at it.

use super::errors::MacroError;
use super::marshal::{decode_string, DecodeMismatch, DecodeResult};
use super::value::Value;
use log::warn;
use parser::Position;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

pub const DECODE_REPORT_FILE: &str = "decoding_error.txt";
pub const EXCEPTION_REPORT_FILE: &str = "macro_exception.txt";

fn timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

fn write_report(dump_dir: &Path, file: &str, content: &str) -> Option<PathBuf> {
    let path = dump_dir.join(file);
    let result = std::fs::create_dir_all(dump_dir).and_then(|_| std::fs::write(&path, content));
    match result {
        Ok(()) => Some(path),
        Err(e) => {
            warn!("Could not write {}: {}", path.display(), e);
            None
        }
    }
}

/// Render the report text for a failed decode.
pub fn format_decode_report(value: &Value, expected: &str, errors: &[DecodeMismatch]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Macro value decoding error ({})", timestamp());
    let _ = writeln!(out, "Expected: {}", expected);
    let _ = writeln!(out);
    let _ = writeln!(out, "Mismatches:");
    for (i, error) in errors.iter().enumerate() {
        let _ = writeln!(out, "{}. {}", i + 1, error);
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "Value:");
    let json = serde_json::to_string_pretty(&value.to_json()).unwrap_or_else(|_| value.to_string());
    let _ = writeln!(out, "{}", json);
    out
}

fn summary(expected: &str, errors: &[DecodeMismatch]) -> String {
    match errors {
        [] => format!("Invalid {} value", expected),
        [only] => format!("Invalid {} value: {}", expected, only),
        [first, rest @ ..] => format!(
            "Invalid {} value: {} (and {} more)",
            expected,
            first,
            rest.len()
        ),
    }
}

/// Decode `value`, turning a mismatch into a written report and a decode error.
pub fn decode_or_report<T>(
    dump_dir: &Path,
    value: &Value,
    expected: &str,
    pos: Position,
    decode: impl FnOnce(&Value) -> DecodeResult<T>,
) -> Result<T, MacroError> {
    decode(value).map_err(|errors| {
        let report = format_decode_report(value, expected, &errors);
        MacroError::Decode {
            summary: summary(expected, &errors),
            report_path: write_report(dump_dir, DECODE_REPORT_FILE, &report),
            pos,
        }
    })
}

/// Error for an exception that escaped a macro body.
///
/// Text payloads become a runtime exception error; anything else is reported
/// as a value that failed to decode as `String`.
pub fn report_runtime_exception(
    dump_dir: &Path,
    macro_name: &str,
    payload: &Value,
    pos: Position,
) -> MacroError {
    let message = match decode_or_report(dump_dir, payload, "String", pos, decode_string) {
        Ok(message) => message,
        Err(err) => return err,
    };
    let report = format!(
        "Uncaught exception in macro {} ({})\n\n{}\n",
        macro_name,
        timestamp(),
        message
    );
    MacroError::RuntimeException {
        report_path: write_report(dump_dir, EXCEPTION_REPORT_FILE, &report),
        message,
        macro_name: macro_name.to_string(),
        pos,
    }
}
