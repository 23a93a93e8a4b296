//! # Berger Codes
//!
//! NVM3 protects page erase counters and object headers with a Berger code:
//! the number of zero bits among the protected bits of a word. The code is
//! stored in the otherwise unused high bits of the same word. Flash can only
//! clear bits, so any corruption that flips ones to zeros inside the
//! protected bits raises the zero count above the stored code, and a cleared
//! code bit lowers the code below it.
//!
//! ## Single Word
//!
//! ```text
//!  31      27 26                                  0
//! +----------+-------------------------------------+
//! |   code   |          protected bits (27)         |
//! +----------+-------------------------------------+
//! code = 27 - popcount(bits)
//! ```
//!
//! ## Multiple Words
//!
//! Large object headers span two words. The code covers all 32 bits of the
//! first word plus the low 26 bits of the second; it lives in the high 6 bits
//! of the second word:
//!
//! ```text
//! word 0: [            protected (32)            ]
//! word 1: [ code (6) |      protected (26)       ]
//! ```
//!
//! The bit budget is consumed word by word; the word in which the budget
//! runs out contributes only its low bits, and the code is extracted from
//! that word by mask and shift.
//!
//! Berger codes detect errors; they do not correct them.

use crate::ensure_format;
use crate::error::Result;

#[inline]
fn low_bits(word: u32, bits: u32) -> u32 {
    if bits >= 32 {
        word
    } else {
        word & ((1u32 << bits) - 1)
    }
}

/// Number of zero bits among the low `bits` bits of `word`.
#[inline]
pub fn compute(word: u32, bits: u32) -> u32 {
    debug_assert!(bits <= 32);
    bits - low_bits(word, bits).count_ones()
}

/// Fails with a format error unless `code` is the Berger code of the low
/// `bits` bits of `word`.
pub fn validate(word: u32, code: u32, bits: u32) -> Result<()> {
    let expected = compute(word, bits);
    ensure_format!(
        expected == code,
        "Berger code mismatch: expected {}, found {} (word {:#010x}, {} bits)",
        expected,
        code,
        word,
        bits
    );
    Ok(())
}

/// Validates a word that carries its own code above the low `bits` bits.
pub fn validate_embedded(word: u32, bits: u32) -> Result<()> {
    debug_assert!(bits < 32);
    validate(word, word >> bits, bits)
}

/// Berger code over the first `bits` bits of a sequence of words.
pub fn compute_multi(words: &[u32], bits: u32) -> u32 {
    let mut remaining = bits;
    let mut code = 0;
    for &word in words {
        if remaining < 32 {
            code += compute(word, remaining);
            break;
        }
        code += compute(word, 32);
        remaining -= 32;
    }
    code
}

/// Validates a multi-word header whose code sits above the last protected
/// bit, in the word where the `bits` budget runs out.
pub fn validate_multi(words: &[u32], bits: u32) -> Result<()> {
    let mut remaining = bits;
    let mut expected = 0;
    let mut actual = None;
    for &word in words {
        if remaining < 32 {
            let mask = (1u32 << (32 - remaining)) - 1;
            expected += compute(word, remaining);
            actual = Some((word >> remaining) & mask);
            break;
        }
        expected += compute(word, 32);
        remaining -= 32;
    }

    let Some(actual) = actual else {
        crate::bail_format!(
            "{} words cannot hold a {}-bit header with its Berger code",
            words.len(),
            bits
        );
    };

    ensure_format!(
        expected == actual,
        "Berger code mismatch: expected {}, found {} over {} bits",
        expected,
        actual,
        bits
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_counts_zero_bits() {
        assert_eq!(compute(0, 27), 27);
        assert_eq!(compute(0xFFFF_FFFF, 27), 0);
        assert_eq!(compute(0xFFFF_FFFF, 32), 0);
        assert_eq!(compute(0, 32), 32);
        assert_eq!(compute(0b1011, 4), 1);
    }

    #[test]
    fn compute_ignores_bits_above_width() {
        assert_eq!(compute(0xF800_0000, 27), 27);
        assert_eq!(compute(0x07FF_FFFF, 27), 0);
    }

    #[test]
    fn validate_is_self_consistent() {
        let words = [0u32, 1, 0x1234_5678, 0xDEAD_BEEF, 0x07FF_FFFF, u32::MAX, 0x8000_0001];
        for &word in &words {
            for bits in [27, 32] {
                validate(word, compute(word, bits), bits).unwrap();
            }
        }
    }

    #[test]
    fn validate_detects_cleared_bit() {
        let word = 0x0123_4567;
        let code = compute(word, 27);
        let corrupted = word & !0x4;
        let err = validate(corrupted, code, 27).unwrap_err();
        assert!(err.is_format());
    }

    #[test]
    fn validate_embedded_reads_code_from_high_bits() {
        let data = 0x0012_3456 & 0x07FF_FFFF;
        let word = data | (compute(data, 27) << 27);
        validate_embedded(word, 27).unwrap();
        assert!(validate_embedded(word ^ (1 << 27), 27).is_err());
    }

    #[test]
    fn compute_multi_splits_budget_across_words() {
        let words = [0u32, 0u32];
        assert_eq!(compute_multi(&words, 58), 58);

        let words = [u32::MAX, 0xFC00_0000];
        assert_eq!(compute_multi(&words, 58), 26);
    }

    #[test]
    fn validate_multi_round_trips() {
        let hdr1 = 0x1234_5680;
        let hdr2 = 100;
        let code = compute_multi(&[hdr1, hdr2], 58);
        let hdr2 = hdr2 | (code << 26);
        validate_multi(&[hdr1, hdr2], 58).unwrap();
    }

    #[test]
    fn validate_multi_detects_corruption_in_first_word() {
        let hdr1 = 0x1234_5680;
        let hdr2 = 100;
        let code = compute_multi(&[hdr1, hdr2], 58);
        let hdr2 = hdr2 | (code << 26);
        let err = validate_multi(&[hdr1 & !0x80, hdr2], 58).unwrap_err();
        assert!(err.is_format());
    }

    #[test]
    fn validate_multi_requires_room_for_code() {
        let err = validate_multi(&[0, 0], 64).unwrap_err();
        assert!(err.is_format());
    }
}
