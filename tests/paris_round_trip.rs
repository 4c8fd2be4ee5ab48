//! End-to-end scenario from `spec.md` §8: timings derived from a real
//! `Generator` at 12 wpm, fed through a `Receiver` at the same speed,
//! decode back to the original text.

use cw_core::{now, CwError, Generator, Receiver, TimeVal};

fn advance(t: TimeVal, us: i32) -> TimeVal {
    let total = t.tv_sec * 1_000_000 + t.tv_usec as i64 + us as i64;
    TimeVal::new(total.div_euclid(1_000_000), total.rem_euclid(1_000_000) as i32)
}

/// `.`/`-` element durations for each letter of "PARIS".
fn morse_elements(word: &str) -> Vec<Vec<bool>> {
    word.chars()
        .map(|c| match c {
            'P' => vec![false, true, true, false],
            'A' => vec![false, true],
            'R' => vec![false, true, false],
            'I' => vec![false, false],
            'S' => vec![false, false, false],
            _ => unreachable!(),
        })
        .collect()
}

#[test]
fn generator_timings_decode_back_to_the_same_word() -> Result<(), CwError> {
    let generator = Generator::new(&cw_core::AudioSinkSpec::Null)?;
    generator.set_speed_wpm(12)?;

    let mut receiver = Receiver::new();
    receiver.set_speed_wpm(12.0)?;
    receiver.set_tolerance(50)?;

    let dot_us = generator.dot_mark_us();
    let dash_us = generator.dash_mark_us();
    let inter_mark_us = generator.inter_mark_space_us();
    // Character gap with no extra Farnsworth spacing: three dot-lengths,
    // comfortably inside the receiver's eoc window but short of eow.
    let char_gap_us = 3 * dot_us;

    let mut t = now();
    let mut decoded = String::new();
    let letters = morse_elements("PARIS");
    for letter in &letters {
        for (i, &is_dash) in letter.iter().enumerate() {
            receiver.mark_begin(Some(t))?;
            t = advance(t, if is_dash { dash_us } else { dot_us });
            receiver.mark_end(Some(t))?;
            let trailing = if i + 1 == letter.len() { char_gap_us } else { inter_mark_us };
            t = advance(t, trailing);
        }
        let (c, end_of_word) = receiver.poll_character(Some(t))?;
        assert!(!end_of_word);
        decoded.push(c);
        receiver.clear_receive_buffer();
    }

    assert_eq!(decoded, "PARIS");
    Ok(())
}
