use std::{fmt::Display, str::FromStr};

use rand::{thread_rng, Rng};
use serde::Serialize;

use crate::RoomError;

/// The short code a room is joined by, always [RoomCode::LENGTH] characters of `A-Z0-9`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RoomCode(String);

impl RoomCode {
    pub const LENGTH: usize = 6;
    const CHARSET: &'static [u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

    /// Generates a random code. Uniqueness among live rooms is up to the caller.
    pub fn random() -> Self {
        let mut rng = thread_rng();

        let code = std::iter::repeat(())
            .map(|_| Self::CHARSET[rng.gen_range(0..Self::CHARSET.len())] as char)
            .take(Self::LENGTH)
            .collect();

        Self(code)
    }

    /// Parses user input into a code. Lower case input is accepted and upper-cased.
    pub fn parse(input: &str) -> Result<Self, RoomError> {
        let code = input.trim().to_ascii_uppercase();

        let is_valid = code.len() == Self::LENGTH
            && code.bytes().all(|b| Self::CHARSET.contains(&b));

        if !is_valid {
            return Err(RoomError::InvalidRoomCode(input.to_string()));
        }

        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for RoomCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RoomCode {
    type Err = RoomError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_codes_are_valid() {
        for _ in 0..100 {
            let code = RoomCode::random();
            assert_eq!(RoomCode::parse(code.as_str()), Ok(code));
        }
    }

    #[test]
    fn test_parse() {
        assert_eq!(RoomCode::parse("ab12cd").unwrap().as_str(), "AB12CD");
        assert!(RoomCode::parse("AB12C").is_err());
        assert!(RoomCode::parse("AB12CDE").is_err());
        assert!(RoomCode::parse("AB-2CD").is_err());
    }
}
