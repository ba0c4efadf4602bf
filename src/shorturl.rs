//! Base58 short ids of photos, as used by `https://flic.kr/p/...` URLs.

use crate::{Error, Result};

const ALPHABET: &[u8; 58] = b"123456789abcdefghijkmnopqrstuvwxyzABCDEFGHJKLMNPQRSTUVWXYZ";
const BASE: u64 = ALPHABET.len() as u64;

/// Prefix of short photo URLs.
pub const SHORT_URL_PREFIX: &str = "https://flic.kr/p/";

/// The short id of `photo_id`.
pub fn encode(photo_id: u64) -> String {
    let mut digits = Vec::new();
    let mut rest = photo_id;
    while rest >= BASE {
        digits.push(ALPHABET[(rest % BASE) as usize]);
        rest /= BASE;
    }
    digits.push(ALPHABET[rest as usize]);
    digits.iter().rev().map(|&b| b as char).collect()
}

/// The photo id behind `short_id`.
pub fn decode(short_id: &str) -> Result<u64> {
    if short_id.is_empty() {
        return Err(Error::InvalidArgument("empty short id".to_string()));
    }
    short_id.bytes().try_fold(0u64, |decoded, byte| {
        let digit = ALPHABET
            .iter()
            .position(|&b| b == byte)
            .ok_or_else(|| Error::InvalidArgument(format!("{:?} is not a short id", short_id)))?;
        decoded
            .checked_mul(BASE)
            .and_then(|d| d.checked_add(digit as u64))
            .ok_or_else(|| Error::InvalidArgument(format!("short id {} is out of range", short_id)))
    })
}

/// The short URL of `photo_id`.
pub fn url(photo_id: u64) -> String {
    format!("{}{}", SHORT_URL_PREFIX, encode(photo_id))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn encodes_known_ids() {
        assert_eq!(encode(4325695128), "7Afjsu");
        assert_eq!(encode(2811466321), "5hruZg");
        assert_eq!(encode(0), "1");
        assert_eq!(encode(57), "Z");
        assert_eq!(encode(58), "21");
    }

    #[test]
    fn decodes_known_ids() {
        assert_eq!(decode("7Afjsu").unwrap(), 4325695128);
        assert_eq!(decode("5hruZg").unwrap(), 2811466321);
        assert_eq!(decode(&encode(u64::MAX)).unwrap(), u64::MAX);
    }

    #[test]
    fn rejects_invalid_short_ids() {
        // 0, O, I and l are not part of the alphabet
        assert!(matches!(decode("7A0jsu"), Err(Error::InvalidArgument(_))));
        assert!(matches!(decode(""), Err(Error::InvalidArgument(_))));
        assert!(matches!(decode("zzzzzzzzzzzzzzz"), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn builds_short_urls() {
        assert_eq!(url(4325695128), "https://flic.kr/p/7Afjsu");
    }
}
