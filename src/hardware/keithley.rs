//! Keithley picoammeter command protocol
//!
//! Reference: Keithley 6485/6487 Reference Manual, SCPI command summary
//!
//! Protocol Overview:
//! - Format: SCPI, one command per line
//! - Terminator: CR LF (\r\n), appended by the transport
//! - Query: `READ?` triggers and returns one reading
//! - Response: comma-separated fields, the first carries the reading with a one-character
//!   unit suffix, e.g. `+1.234567E-09A,+3.210000E+02,+0.000000E+00`
//!
//! Everything in this module is pure string handling; I/O lives in
//! [`crate::hardware::transport`].

use crate::error::{AppResult, DaqError};
use std::fmt;

/// Separator between response fields.
pub const FIELD_SEPARATOR: char = ',';

/// Query returning a single reading.
pub const READ: &str = "READ";

/// Setter for the integration rate, in power line cycles.
pub const NPLC: &str = "NPLC";

/// Smallest integration rate ever sent to the instrument.
pub const MIN_INTEGRATION_RATE: f64 = 0.01;

/// Integration rate used until the user submits another one.
pub const DEFAULT_INTEGRATION_RATE: f64 = 1.0;

/// Build a query: the command name followed by `?`.
pub fn format_query(name: &str) -> String {
    format!("{}?", name)
}

/// Build a command with space-separated arguments.
///
/// ```
/// use keithley_daq::hardware::keithley::format_command;
///
/// assert_eq!(format_command("NPLC", [2.5]), "NPLC 2.5");
/// assert_eq!(format_command("*RST", Vec::<String>::new()), "*RST");
/// ```
pub fn format_command<I, A>(name: &str, args: I) -> String
where
    I: IntoIterator<Item = A>,
    A: fmt::Display,
{
    args.into_iter()
        .fold(name.to_string(), |mut cmd, arg| {
            cmd.push(' ');
            cmd.push_str(&arg.to_string());
            cmd
        })
}

/// Parse a reading out of a response line.
///
/// Takes the first comma-separated field, drops its last character (the unit,
/// `A`, `V`, ...) and parses the rest as a float. The last character is dropped
/// whatever it is, so a reading without a unit loses a digit.
pub fn parse_response(wire_text: &str) -> AppResult<f64> {
    let field = wire_text
        .split(FIELD_SEPARATOR)
        .next()
        .unwrap_or_default()
        .trim();

    if field.is_empty() {
        return Err(DaqError::parse(wire_text, "empty reading"));
    }

    let mut chars = field.chars();
    chars.next_back();
    let number = chars.as_str();
    if number.is_empty() {
        return Err(DaqError::parse(wire_text, "reading holds only a unit"));
    }

    number
        .parse::<f64>()
        .map_err(|e| DaqError::parse(wire_text, e))
}

/// Integration rate (NPLC) of the instrument's A/D converter.
///
/// Always strictly positive: anything else is clamped to [`MIN_INTEGRATION_RATE`].
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct IntegrationRate(f64);

impl IntegrationRate {
    /// Clamp `value` to a usable rate.
    pub fn new(value: f64) -> Self {
        if value.is_finite() && value > 0.0 {
            Self(value)
        } else {
            Self(MIN_INTEGRATION_RATE)
        }
    }

    /// Interpret free text typed by the user.
    ///
    /// Unparseable input yields the minimum rate rather than an error.
    pub fn from_user_input(input: &str) -> Self {
        input
            .trim()
            .parse::<f64>()
            .map(Self::new)
            .unwrap_or(Self(MIN_INTEGRATION_RATE))
    }

    /// Rate in power line cycles.
    pub fn value(&self) -> f64 {
        self.0
    }

    /// The setter command for this rate, e.g. `NPLC 2.5`.
    pub fn command(&self) -> String {
        format_command(NPLC, [self.0])
    }
}

impl Default for IntegrationRate {
    fn default() -> Self {
        Self(DEFAULT_INTEGRATION_RATE)
    }
}

impl From<f64> for IntegrationRate {
    fn from(value: f64) -> Self {
        Self::new(value)
    }
}

impl From<&str> for IntegrationRate {
    fn from(input: &str) -> Self {
        Self::from_user_input(input)
    }
}

impl fmt::Display for IntegrationRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} NPLC", self.0)
    }
}

/// The device setup sequence, in the order it must be sent.
///
/// Reset, clear status, blank the front panel, disable zero check and zero
/// correct, wait for operation complete, then set the integration rate.
pub fn initialization_sequence(rate: IntegrationRate) -> Vec<String> {
    vec![
        "*RST".to_string(),
        "*CLS".to_string(),
        format_command("DISPlay:ENABle", [0]),
        format_command("SYSTem:ZCHeck", [0]),
        format_command("SYSTem:ZCORrect", [0]),
        "*OPC".to_string(),
        rate.command(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_query_and_command() {
        assert_eq!(format_query(READ), "READ?");
        assert_eq!(format_command("SYSTem:ZCHeck", [0]), "SYSTem:ZCHeck 0");
        assert_eq!(format_command("CONF", ["CURR", "DC"]), "CONF CURR DC");
    }

    #[test]
    fn test_parse_response() {
        assert_eq!(
            parse_response("+1.234567E-09A,+3.210000E+02,+0.000000E+00").unwrap(),
            1.234567e-9
        );
        assert_eq!(parse_response("-5.000000E-12A").unwrap(), -5e-12);
        // Transport already cut the payload at the separator
        assert_eq!(parse_response("+2.5E-06A").unwrap(), 2.5e-6);
        assert_eq!(parse_response("  +7.0E-03A \r\n").unwrap(), 7e-3);
    }

    #[test]
    fn test_parse_response_strips_any_unit_character() {
        assert_eq!(parse_response("+1.0E-09%").unwrap(), 1.0e-9);
        assert_eq!(parse_response("+1.0E-09\u{03A9}").unwrap(), 1.0e-9);
        // The last character goes even when it is a digit
        assert_eq!(parse_response("12").unwrap(), 1.0);
        assert!(matches!(parse_response("5E-9"), Err(DaqError::Parse { .. })));
    }

    #[test]
    fn test_parse_response_rejects_non_numeric() {
        assert!(matches!(parse_response(""), Err(DaqError::Parse { .. })));
        assert!(matches!(parse_response("A"), Err(DaqError::Parse { .. })));
        assert!(matches!(parse_response("ERRA,1,2"), Err(DaqError::Parse { .. })));
        assert!(matches!(parse_response(",1.0A"), Err(DaqError::Parse { .. })));
    }

    #[test]
    fn test_parse_response_is_idempotent() {
        let wire = "+4.200000E-10A,+1.000000E+01,+0.000000E+00";
        let first = parse_response(wire).unwrap();
        let second = parse_response(wire).unwrap();
        assert_eq!(first.to_bits(), second.to_bits());
    }

    #[test]
    fn test_integration_rate_clamps() {
        assert_eq!(IntegrationRate::from_user_input("-5").value(), MIN_INTEGRATION_RATE);
        assert_eq!(IntegrationRate::from_user_input("abc").value(), MIN_INTEGRATION_RATE);
        assert_eq!(IntegrationRate::from_user_input("0").value(), MIN_INTEGRATION_RATE);
        assert_eq!(IntegrationRate::from_user_input("").value(), MIN_INTEGRATION_RATE);
        assert_eq!(IntegrationRate::new(f64::NAN).value(), MIN_INTEGRATION_RATE);
        assert_eq!(IntegrationRate::from_user_input(" 2.5 ").value(), 2.5);
        assert_eq!(IntegrationRate::default().value(), DEFAULT_INTEGRATION_RATE);
        assert_eq!(IntegrationRate::from_user_input("-5").command(), "NPLC 0.01");
    }

    #[test]
    fn test_initialization_sequence() {
        let sequence = initialization_sequence(IntegrationRate::new(2.5));
        assert_eq!(
            sequence,
            vec![
                "*RST",
                "*CLS",
                "DISPlay:ENABle 0",
                "SYSTem:ZCHeck 0",
                "SYSTem:ZCORrect 0",
                "*OPC",
                "NPLC 2.5",
            ]
        );
    }
}
