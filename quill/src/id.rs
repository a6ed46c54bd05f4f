use nanoid::nanoid;

/// Alphabet for generated document identifiers (no ambiguous glyphs).
const DOCUMENT_ID_ALPHABET: &[char] = &[
    'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'J', 'K', 'L', 'M', 'N', 'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W', 'X', 'Y',
    'Z', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'j', 'm', 'n', 'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z',
];
/// Default document id length.
const DOCUMENT_ID_LENGTH: usize = 20;
/// Change-event ids are only compared for equality, so they can be shorter.
const EVENT_ID_LENGTH: usize = 16;

/// Generates an id for documents the pipeline creates (comments, notifications).
pub fn generate_document_id() -> String {
    nanoid!(DOCUMENT_ID_LENGTH, DOCUMENT_ID_ALPHABET)
}

/// Generates the id stamped on every change event emitted by a store.
pub fn generate_event_id() -> String {
    nanoid!(EVENT_ID_LENGTH, DOCUMENT_ID_ALPHABET)
}
