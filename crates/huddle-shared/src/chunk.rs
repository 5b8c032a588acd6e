//! Chunked transfer of payloads larger than one frame.
//!
//! A sequence on the wire is `[IMG_START]<N>`, then exactly `N` data frames,
//! then `[IMG_END]`. The same format is used in both directions.

use tracing::{debug, warn};

use crate::constants::{DEFAULT_MAX_PAYLOAD_SIZE, IMG_END, IMG_START};

/// Result of feeding one frame to a [`Reassembler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feed {
    /// Not part of a transfer; hand the frame on unchanged.
    Message(String),
    /// Consumed by the transfer in progress.
    Pending,
    /// End marker arrived with the expected number of slices.
    Complete(String),
    /// End marker arrived with the wrong number of slices. Nothing is emitted.
    Incomplete { expected: usize, received: usize },
    /// The reassembled payload would exceed the configured cap.
    TooLarge { max: usize },
    /// A start marker whose count is not a non-negative integer.
    MalformedStart(String),
}

#[derive(Debug)]
enum State {
    Idle,
    Receiving {
        expected: usize,
        received: usize,
        buffer: String,
        overflowed: bool,
    },
}

/// Per-connection reassembly state machine.
///
/// Only one transfer can be in flight at a time; a new start marker while
/// receiving abandons the current one.
#[derive(Debug)]
pub struct Reassembler {
    state: State,
    max_payload_size: usize,
}

impl Reassembler {
    pub fn new(max_payload_size: usize) -> Self {
        Self {
            state: State::Idle,
            max_payload_size,
        }
    }

    pub fn is_receiving(&self) -> bool {
        matches!(self.state, State::Receiving { .. })
    }

    pub fn feed(&mut self, frame: String) -> Feed {
        if let Some(count) = frame.strip_prefix(IMG_START) {
            let Ok(expected) = count.trim().parse::<usize>() else {
                return Feed::MalformedStart(frame);
            };
            if let State::Receiving { expected: old, received, .. } = self.state {
                warn!(
                    expected = old,
                    received,
                    "New chunk sequence started before the previous one ended"
                );
            }
            debug!(expected, "Chunk sequence started");
            self.state = State::Receiving {
                expected,
                received: 0,
                buffer: String::new(),
                overflowed: false,
            };
            return Feed::Pending;
        }

        if frame == IMG_END && self.is_receiving() {
            return self.finish();
        }

        match &mut self.state {
            State::Idle => Feed::Message(frame),
            State::Receiving {
                received,
                buffer,
                overflowed,
                ..
            } => {
                *received += 1;
                if !*overflowed {
                    if buffer.len() + frame.len() > self.max_payload_size {
                        *overflowed = true;
                        *buffer = String::new();
                    } else {
                        buffer.push_str(&frame);
                    }
                }
                Feed::Pending
            }
        }
    }

    fn finish(&mut self) -> Feed {
        let State::Receiving {
            expected,
            received,
            buffer,
            overflowed,
        } = std::mem::replace(&mut self.state, State::Idle)
        else {
            return Feed::Message(IMG_END.to_string());
        };

        if received != expected {
            return Feed::Incomplete { expected, received };
        }
        if overflowed {
            return Feed::TooLarge {
                max: self.max_payload_size,
            };
        }
        debug!(chunks = received, size = buffer.len(), "Chunk sequence complete");
        Feed::Complete(buffer)
    }
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD_SIZE)
    }
}

/// Split `payload` into slices of at most `chunk_size` bytes, never cutting a
/// character in half. A slice holds at least one character even when that
/// character is wider than `chunk_size`.
pub fn split_slices(payload: &str, chunk_size: usize) -> Vec<&str> {
    let chunk_size = chunk_size.max(1);
    let mut slices = Vec::with_capacity(payload.len() / chunk_size + 1);
    let mut rest = payload;

    while !rest.is_empty() {
        let mut end = chunk_size.min(rest.len());
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        if end == 0 {
            end = rest.chars().next().map_or(rest.len(), char::len_utf8);
        }
        let (head, tail) = rest.split_at(end);
        slices.push(head);
        rest = tail;
    }

    slices
}

/// Build the full frame sequence for `payload`: start marker, slices, end
/// marker. Any header belongs at the front of `payload`, so the first slice
/// carries it and the count already accounts for its size.
pub fn chunk_frames(payload: &str, chunk_size: usize) -> Vec<String> {
    let slices = split_slices(payload, chunk_size);
    let mut frames = Vec::with_capacity(slices.len() + 2);
    frames.push(format!("{IMG_START}{}", slices.len()));
    frames.extend(slices.into_iter().map(str::to_owned));
    frames.push(IMG_END.to_string());
    frames
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reassemble(frames: Vec<String>) -> Vec<Feed> {
        let mut reassembler = Reassembler::default();
        frames
            .into_iter()
            .map(|frame| reassembler.feed(frame))
            .filter(|feed| *feed != Feed::Pending)
            .collect()
    }

    #[test]
    fn test_idle_frames_pass_through() {
        let mut reassembler = Reassembler::default();
        assert_eq!(
            reassembler.feed("hello".into()),
            Feed::Message("hello".into())
        );
        assert!(!reassembler.is_receiving());
    }

    #[test]
    fn test_exact_count_completes() {
        let frames = vec![
            "[IMG_START]3".into(),
            "ab".into(),
            "cd".into(),
            "e".into(),
            "[IMG_END]".into(),
        ];
        assert_eq!(reassemble(frames), vec![Feed::Complete("abcde".into())]);
    }

    #[test]
    fn test_wrong_count_is_incomplete() {
        let short = vec!["[IMG_START]3".into(), "ab".into(), "[IMG_END]".into()];
        assert_eq!(
            reassemble(short),
            vec![Feed::Incomplete {
                expected: 3,
                received: 1
            }]
        );

        let long = vec![
            "[IMG_START]1".into(),
            "ab".into(),
            "cd".into(),
            "[IMG_END]".into(),
        ];
        assert_eq!(
            reassemble(long),
            vec![Feed::Incomplete {
                expected: 1,
                received: 2
            }]
        );
    }

    #[test]
    fn test_zero_chunk_sequence_yields_empty_payload() {
        let frames = vec!["[IMG_START]0".into(), "[IMG_END]".into()];
        assert_eq!(reassemble(frames), vec![Feed::Complete(String::new())]);
    }

    #[test]
    fn test_returns_to_idle_after_failure() {
        let mut reassembler = Reassembler::default();
        reassembler.feed("[IMG_START]2".into());
        reassembler.feed("x".into());
        assert!(matches!(
            reassembler.feed("[IMG_END]".into()),
            Feed::Incomplete { .. }
        ));
        assert_eq!(reassembler.feed("after".into()), Feed::Message("after".into()));
    }

    #[test]
    fn test_restart_discards_previous_buffer() {
        let frames = vec![
            "[IMG_START]2".into(),
            "stale".into(),
            "[IMG_START]1".into(),
            "fresh".into(),
            "[IMG_END]".into(),
        ];
        assert_eq!(reassemble(frames), vec![Feed::Complete("fresh".into())]);
    }

    #[test]
    fn test_bad_counts_are_malformed() {
        let mut reassembler = Reassembler::default();
        assert!(matches!(
            reassembler.feed("[IMG_START]abc".into()),
            Feed::MalformedStart(_)
        ));
        assert!(matches!(
            reassembler.feed("[IMG_START]-1".into()),
            Feed::MalformedStart(_)
        ));
        assert!(!reassembler.is_receiving());
    }

    #[test]
    fn test_stray_end_marker_passes_through_when_idle() {
        let mut reassembler = Reassembler::default();
        assert_eq!(
            reassembler.feed("[IMG_END]".into()),
            Feed::Message("[IMG_END]".into())
        );
    }

    #[test]
    fn test_payload_cap_is_enforced() {
        let mut reassembler = Reassembler::new(4);
        reassembler.feed("[IMG_START]2".into());
        reassembler.feed("abc".into());
        reassembler.feed("def".into());
        assert_eq!(reassembler.feed("[IMG_END]".into()), Feed::TooLarge { max: 4 });
    }

    #[test]
    fn test_split_and_reassemble_round_trip() {
        let payload: String = "[IMG]alice|".to_string() + &"QUJD".repeat(37) + "=";
        for chunk_size in [1, 2, 7, 64, payload.len(), payload.len() + 10] {
            let frames = chunk_frames(&payload, chunk_size);
            let expected_slices = payload.len().div_ceil(chunk_size);
            assert_eq!(frames.len(), expected_slices + 2);
            assert!(frames[1].starts_with("[IMG]alice|") || chunk_size < 11);
            assert_eq!(reassemble(frames), vec![Feed::Complete(payload.clone())]);
        }
    }

    #[test]
    fn test_empty_payload_round_trip() {
        let frames = chunk_frames("", 8);
        assert_eq!(frames, vec!["[IMG_START]0".to_string(), "[IMG_END]".to_string()]);
        assert_eq!(reassemble(frames), vec![Feed::Complete(String::new())]);
    }

    #[test]
    fn test_slices_respect_char_boundaries() {
        let payload = "[IMG]匿名用户42|QUJD";
        for chunk_size in 1..=payload.len() {
            let slices = split_slices(payload, chunk_size);
            assert_eq!(slices.concat(), payload);
            for slice in &slices {
                assert!(slice.len() <= chunk_size.max(3));
            }
        }
    }
}
