//! Property tests for chunker invariants.

use campus_rag::chunk::chunk_text;
use proptest::prelude::*;

/// Text mixing ASCII, CJK and every separator the chunker knows about.
fn campus_text() -> impl Strategy<Value = String> {
    prop::collection::vec(
        prop_oneof![
            "[a-z]{1,8}",
            "[图书馆食堂宿舍课程开放时间]{1,6}",
            Just("\n\n".to_string()),
            Just("\n".to_string()),
            Just("。".to_string()),
            Just("，".to_string()),
            Just(". ".to_string()),
            Just(" ".to_string()),
        ],
        0..80,
    )
    .prop_map(|parts| parts.concat())
}

fn params() -> impl Strategy<Value = (usize, usize)> {
    (1usize..60).prop_flat_map(|size| (Just(size), 0..size))
}

proptest! {
    #[test]
    fn prop_reassembles_original((size, overlap) in params(), text in campus_text()) {
        let chunks = chunk_text("p.txt", &text, size, overlap);
        let mut out = String::new();
        for (i, c) in chunks.iter().enumerate() {
            if i == 0 {
                out.push_str(&c.text);
            } else {
                out.extend(c.text.chars().skip(overlap));
            }
        }
        prop_assert_eq!(out, text);
    }

    #[test]
    fn prop_chunks_bounded_by_size((size, overlap) in params(), text in campus_text()) {
        let chunks = chunk_text("p.txt", &text, size, overlap);
        prop_assert_eq!(chunks.is_empty(), text.is_empty());
        for (i, c) in chunks.iter().enumerate() {
            prop_assert_eq!(c.index, i);
            prop_assert!(!c.text.is_empty());
            prop_assert!(c.text.chars().count() <= size);
        }
    }

    #[test]
    fn prop_consecutive_chunks_share_overlap((size, overlap) in params(), text in campus_text()) {
        let chunks = chunk_text("p.txt", &text, size, overlap);
        for pair in chunks.windows(2) {
            let prev: Vec<char> = pair[0].text.chars().collect();
            let next: Vec<char> = pair[1].text.chars().collect();
            prop_assert!(prev.len() >= overlap && next.len() > overlap);
            prop_assert_eq!(&prev[prev.len() - overlap..], &next[..overlap]);
        }
    }
}
