//! Parser for the composite line-settings token, e.g. `115200`, `9600N81`.
//!
//! The leading digits are the baud rate. An optional parity letter follows
//! (`n`, `e`, `o`, any case), then optionally the data bits (`7` or `8`) and
//! the stop bits (`1` or `2`). Anything after that is rejected.

use crate::port::{validate_baud_rate, DataBits, Parity, PortError, StopBits};
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while parsing a line-settings token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    #[error("Invalid baud rate: {0}")]
    InvalidBaud(String),

    #[error("Invalid baud rate: {requested}{}", suggestion_text(.suggestion))]
    UnsupportedBaud {
        requested: u32,
        suggestion: Option<u32>,
    },

    #[error("Invalid parity ('n','e','o'): {0}")]
    InvalidParity(char),

    #[error("Invalid data bits (7 or 8): {0}")]
    InvalidDataBits(char),

    #[error("Invalid stop bits (1 or 2): {0}")]
    InvalidStopBits(char),

    #[error("Unexpected characters after line settings: {0}")]
    TrailingCharacters(String),
}

fn suggestion_text(suggestion: &Option<u32>) -> String {
    suggestion
        .map(|rate| format!(" (Did you mean {rate})"))
        .unwrap_or_default()
}

/// Line settings decoded from a token. Omitted parts stay `None` so the
/// caller can fill them from configuration defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineSettings {
    pub baud_rate: u32,
    pub parity: Option<Parity>,
    pub data_bits: Option<DataBits>,
    pub stop_bits: Option<StopBits>,
}

impl FromStr for LineSettings {
    type Err = FramingError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        let split = token
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(token.len());
        let (digits, rest) = token.split_at(split);

        let baud_rate = match digits.parse::<u32>() {
            Ok(rate) if rate > 0 => rate,
            _ => return Err(FramingError::InvalidBaud(token.to_string())),
        };
        validate_baud_rate(baud_rate).map_err(|e| match e {
            PortError::UnsupportedBaudRate {
                requested,
                suggestion,
            } => FramingError::UnsupportedBaud {
                requested,
                suggestion,
            },
            _ => FramingError::InvalidBaud(token.to_string()),
        })?;

        let mut chars = rest.chars();
        let parity = chars
            .next()
            .map(|c| match c.to_ascii_lowercase() {
                'n' => Ok(Parity::None),
                'e' => Ok(Parity::Even),
                'o' => Ok(Parity::Odd),
                _ => Err(FramingError::InvalidParity(c)),
            })
            .transpose()?;
        let data_bits = chars
            .next()
            .map(|c| match c {
                '7' => Ok(DataBits::Seven),
                '8' => Ok(DataBits::Eight),
                _ => Err(FramingError::InvalidDataBits(c)),
            })
            .transpose()?;
        let stop_bits = chars
            .next()
            .map(|c| match c {
                '1' => Ok(StopBits::One),
                '2' => Ok(StopBits::Two),
                _ => Err(FramingError::InvalidStopBits(c)),
            })
            .transpose()?;

        let trailing = chars.as_str();
        if !trailing.is_empty() {
            return Err(FramingError::TrailingCharacters(trailing.to_string()));
        }

        Ok(LineSettings {
            baud_rate,
            parity,
            data_bits,
            stop_bits,
        })
    }
}
