//! Numeric argument parsing.
//!
//! Every helper returns its own `Result`; nothing here reads or leaves behind any shared error
//! state between calls.

use nix::unistd::Pid;
use std::num::ParseIntError;
use thiserror::Error;

#[derive(Debug, Error)]
pub(crate) enum ParseError {
    #[error("invalid number {input:?}: {source}")]
    Invalid {
        input: String,
        #[source]
        source: ParseIntError,
    },
    #[error("invalid number {0:?}: signs are not accepted")]
    Signed(String),
    #[error("pid {0} is out of range")]
    PidOutOfRange(u64),
}

fn radix(input: &str, digits: &str, radix: u32) -> Result<u64, ParseError> {
    // `from_str_radix` would take a leading `+`.
    if digits.starts_with(&['+', '-'][..]) {
        return Err(ParseError::Signed(input.to_owned()));
    }
    u64::from_str_radix(digits, radix).map_err(|source| ParseError::Invalid {
        input: input.to_owned(),
        source,
    })
}

/// Parse an integer with C-style radix detection: `0x` is hexadecimal, a leading `0` is octal,
/// anything else is decimal.
pub(crate) fn parse_int(input: &str) -> Result<u64, ParseError> {
    if let Some(digits) = input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
    {
        radix(input, digits, 16)
    } else if input.len() > 1 && input.starts_with('0') {
        radix(input, &input[1..], 8)
    } else {
        radix(input, input, 10)
    }
}

/// Parse a hexadecimal integer; the `0x` prefix is optional.
pub(crate) fn parse_hex(input: &str) -> Result<u64, ParseError> {
    let digits = input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
        .unwrap_or(input);
    radix(input, digits, 16)
}

pub(crate) fn parse_pid(input: &str) -> Result<Pid, ParseError> {
    let value = parse_int(input)?;
    match i32::try_from(value) {
        Ok(raw) if raw > 0 => Ok(Pid::from_raw(raw)),
        _ => Err(ParseError::PidOutOfRange(value)),
    }
}
