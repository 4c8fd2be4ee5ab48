//! Character ↔ representation lookup, the representation hash, procedural
//! signals, and the phonetic alphabet. `spec.md` §4.1.

use lazy_static::lazy_static;
use phf::phf_map;

/// Character → dot/dash representation, grounded on the teacher's own
/// `MORSE` map (`morse.rs`), extended with the prosigns recovered from
/// `cw-qso-sim`'s `WinKeyerKeyer::morse_pattern` table (AR, BT, SK, KN, AS,
/// KA) under the punctuation slots the original design reserves for them.
pub const CW_TABLE: phf::Map<char, &'static str> = phf_map! {
    'A' => ".-",    'B' => "-...",  'C' => "-.-.",  'D' => "-..",
    'E' => ".",     'F' => "..-.",  'G' => "--.",   'H' => "....",
    'I' => "..",    'J' => ".---",  'K' => "-.-",   'L' => ".-..",
    'M' => "--",    'N' => "-.",    'O' => "---",   'P' => ".--.",
    'Q' => "--.-",  'R' => ".-.",   'S' => "...",   'T' => "-",
    'U' => "..-",   'V' => "...-",  'W' => ".--",   'X' => "-..-",
    'Y' => "-.--",  'Z' => "--..",
    '0' => "-----", '1' => ".----", '2' => "..---", '3' => "...--",
    '4' => "....-", '5' => ".....", '6' => "-....", '7' => "--...",
    '8' => "---..", '9' => "----.",
    '.' => ".-.-.-", ',' => "--..--", '?' => "..--..", '/' => "-..-.",
    '&' => ".-...", '(' => "-.--.",  ')' => "-.--.-", '+' => ".-.-.",
    '=' => "-...-", '@' => ".--.-.", ':' => "---...", '\'' => ".----.",
    '"' => ".-..-.", '!' => "-.-.--", ';' => "-.-.-.", '_' => "..--.-",
    '$' => "...-..-",
};

/// Maximum representation length the hash and the representation buffer
/// support (`spec.md` §3/§4.1: `1 ≤ L ≤ 7`).
pub const MAX_REPRESENTATION_LENGTH: usize = 7;

/// Compute the representation hash described in `spec.md` §4.1: a leading
/// sentinel `1` bit followed by one bit per symbol (`.` → 0, `-` → 1), most
/// significant symbol first. Returns 0 for an empty, too-long, or malformed
/// representation; otherwise the result is in `[2, 255]`.
pub fn representation_hash(representation: &str) -> u8 {
    let len = representation.len();
    if len == 0 || len > MAX_REPRESENTATION_LENGTH {
        return 0;
    }
    let mut hash: u32 = 1;
    for c in representation.chars() {
        hash <<= 1;
        match c {
            '.' => {}
            '-' => hash |= 1,
            _ => return 0,
        }
    }
    hash as u8
}

lazy_static! {
    /// 256-entry reverse lookup: hash → character, built once from
    /// `CW_TABLE`. `spec.md` §4.1: "A 256-entry lookup table gives O(1)
    /// reverse lookup."
    static ref HASH_TO_CHAR: [Option<char>; 256] = {
        let mut table = [None; 256];
        for (&c, &repr) in CW_TABLE.entries() {
            let h = representation_hash(repr);
            if h != 0 {
                table[h as usize] = Some(c);
            }
        }
        table
    };

    /// 256-entry direct forward lookup, indexed by the character's ASCII
    /// code point (non-ASCII characters are never valid CW characters).
    /// `spec.md` §4.1: "A 256-entry direct table gives O(1) forward lookup."
    static ref CHAR_TO_REPR: [Option<&'static str>; 256] = {
        let mut table: [Option<&'static str>; 256] = [None; 256];
        for (&c, &repr) in CW_TABLE.entries() {
            if (c as u32) < 256 {
                table[c as usize] = Some(repr);
            }
        }
        table
    };
}

/// Look up the dot/dash representation for a character. Case-insensitive
/// for ASCII letters.
pub fn char_to_representation(c: char) -> Option<&'static str> {
    let upper = c.to_ascii_uppercase();
    if (upper as u32) >= 256 {
        return None;
    }
    CHAR_TO_REPR[upper as usize]
}

/// Look up the character for a dot/dash representation via the hash table.
pub fn representation_to_char(representation: &str) -> Option<char> {
    let hash = representation_hash(representation);
    if hash == 0 {
        return None;
    }
    HASH_TO_CHAR[hash as usize]
}

pub fn is_valid_character(c: char) -> bool {
    char_to_representation(c).is_some()
}

pub fn is_valid_representation(representation: &str) -> bool {
    let hash = representation_hash(representation);
    hash >= 2 && HASH_TO_CHAR[hash as usize].is_some()
}

/// Procedural signal (prosign) expansion for a control character.
///
/// Returns the expansion's own representation-table key sequence as a
/// string of characters to send, plus a flag indicating whether the
/// elements should be sent as one unbroken prosign (`true`, no
/// inter-character gap between its constituent letters) or as ordinary
/// separately-spaced characters (`false`).
///
/// Grounded on the prosign set `cw-qso-sim`'s `WinKeyerKeyer` recognizes
/// from WinKeyer paddle echoback (`+` → AR, `=` → BT, `%` → SK, `(` → KN),
/// extended with `&` (AS, "wait") and `^` (KA, "attention") from the same
/// family of procedural signals.
pub fn procedural_expansion(c: char) -> Option<(&'static str, bool)> {
    match c {
        '+' => Some(("AR", true)),
        '=' => Some(("BT", true)),
        '%' => Some(("SK", true)),
        '(' => Some(("KN", true)),
        '&' => Some(("AS", true)),
        '^' => Some(("KA", true)),
        _ => None,
    }
}

/// NATO/ITU phonetic alphabet word for a character.
pub fn phonetic(c: char) -> Option<&'static str> {
    Some(match c.to_ascii_uppercase() {
        'A' => "Alfa", 'B' => "Bravo", 'C' => "Charlie", 'D' => "Delta",
        'E' => "Echo", 'F' => "Foxtrot", 'G' => "Golf", 'H' => "Hotel",
        'I' => "India", 'J' => "Juliett", 'K' => "Kilo", 'L' => "Lima",
        'M' => "Mike", 'N' => "November", 'O' => "Oscar", 'P' => "Papa",
        'Q' => "Quebec", 'R' => "Romeo", 'S' => "Sierra", 'T' => "Tango",
        'U' => "Uniform", 'V' => "Victor", 'W' => "Whiskey", 'X' => "X-ray",
        'Y' => "Yankee", 'Z' => "Zulu",
        '0' => "Zero", '1' => "One", '2' => "Two", '3' => "Three",
        '4' => "Four", '5' => "Five", '6' => "Six", '7' => "Seven",
        '8' => "Eight", '9' => "Nine",
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_of_dot_dash_is_five() {
        // ".-" => 1 0 1 (binary) = 5
        assert_eq!(representation_hash(".-"), 5);
    }

    #[test]
    fn hash_of_digit_zero_is_sixty_three() {
        // "-----" => 1 1 1 1 1 1 (binary) = 63
        assert_eq!(representation_hash("-----"), 63);
    }

    #[test]
    fn hash_range_covers_every_known_representation() {
        for (_, &repr) in CW_TABLE.entries() {
            let h = representation_hash(repr);
            assert!((2..=255).contains(&h), "hash {h} for {repr:?} out of range");
        }
    }

    #[test]
    fn hash_rejects_empty_and_too_long() {
        assert_eq!(representation_hash(""), 0);
        assert_eq!(representation_hash(".-.-.-.-"), 0);
    }

    #[test]
    fn hash_rejects_malformed_symbols() {
        assert_eq!(representation_hash(".x-"), 0);
    }

    #[test]
    fn round_trip_every_known_character() {
        for (&c, _) in CW_TABLE.entries() {
            let repr = char_to_representation(c).expect("known char has a representation");
            assert_eq!(representation_to_char(repr), Some(c));
        }
    }

    #[test]
    fn unknown_character_has_no_representation() {
        assert_eq!(char_to_representation('\u{1F600}'), None);
    }

    #[test]
    fn case_insensitive_lookup() {
        assert_eq!(char_to_representation('a'), char_to_representation('A'));
    }

    #[test]
    fn validity_predicates_agree_with_lookups() {
        assert!(is_valid_character('A'));
        assert!(!is_valid_character('~'));
        assert!(is_valid_representation(".-"));
        assert!(!is_valid_representation("x"));
    }

    #[test]
    fn procedural_and_phonetic_tables() {
        assert_eq!(procedural_expansion('+'), Some(("AR", true)));
        assert_eq!(procedural_expansion('q'), None);
        assert_eq!(phonetic('s'), Some("Sierra"));
        assert_eq!(phonetic('5'), Some("Five"));
    }
}
