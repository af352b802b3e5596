//! Wire-level framing for the DBGp protocol.
//!
//! Outbound messages are a single ASCII command line terminated by a null
//! byte. Inbound messages are two null-terminated segments: a decimal byte
//! length followed by the body (an XML document):
//!
//! ```text
//! client -> engine: <verb> -i <transaction-id> [-<flag> <value>]... [-- <base64(data)>]\x00
//! engine -> client: <decimal-length>\x00<xml-body>\x00
//! ```

use base64::Engine;
use bytes::{Buf, BytesMut};

#[derive(thiserror::Error, Debug)]
pub enum FramingError {
    #[error("length segment is not valid utf8")]
    InvalidUtf8(#[from] std::str::Utf8Error),
    #[error("length segment is not a decimal integer")]
    InvalidLength(#[from] std::num::ParseIntError),
    #[error("declared length {declared} does not match body length {actual}")]
    LengthMismatch { declared: usize, actual: usize },
}

/// A single DBGp command, immutable once built.
///
/// The transaction id is not part of the command: it is supplied at encode
/// time by whoever owns the transaction counter, so that the allocator stays
/// the sole source of ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    verb: String,
    flags: Vec<String>,
    options: Vec<(String, String)>,
    data: Option<Vec<u8>>,
}

impl Command {
    pub fn new(verb: impl Into<String>) -> Self {
        Self {
            verb: verb.into(),
            flags: Vec::new(),
            options: Vec::new(),
            data: None,
        }
    }

    /// Append a positional flag argument (e.g. the free-form tail of a raw
    /// user command).
    pub fn flag(mut self, arg: impl Into<String>) -> Self {
        self.flags.push(arg.into());
        self
    }

    /// Append a `-key value` option.
    pub fn option(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.options.push((key.into(), value.to_string()));
        self
    }

    /// Attach a payload, sent base64-encoded after a literal ` -- `.
    pub fn data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn verb(&self) -> &str {
        &self.verb
    }

    /// Render the outbound frame, including the trailing null byte.
    ///
    /// Empty parts are skipped and the remainder joined with single spaces.
    pub fn encode(&self, transaction_id: i64) -> Vec<u8> {
        let mut parts = vec![self.verb.clone(), format!("-i {transaction_id}")];
        parts.extend(self.flags.iter().cloned());
        for (key, value) in &self.options {
            parts.push(format!("-{key} {value}"));
        }

        let mut line = parts
            .iter()
            .map(|part| part.trim())
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        if let Some(data) = &self.data {
            line.push_str(" -- ");
            line.push_str(&base64::engine::general_purpose::STANDARD.encode(data));
        }

        let mut bytes = line.into_bytes();
        bytes.push(0);
        bytes
    }
}

/// A command line as seen by the remote peer, parsed back out of its wire
/// form. Used by tests and by anything that has to act as an engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub verb: String,
    pub transaction_id: i64,
    pub options: Vec<(String, String)>,
    pub data: Option<Vec<u8>>,
}

impl ParsedCommand {
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Parse an outbound command line (without the trailing null byte).
///
/// The inverse of [`Command::encode`] for lines produced by it.
pub fn parse_command_line(line: &str) -> Option<ParsedCommand> {
    let (line, data) = match line.split_once(" -- ") {
        Some((head, payload)) => (
            head,
            Some(
                base64::engine::general_purpose::STANDARD
                    .decode(payload.trim())
                    .ok()?,
            ),
        ),
        None => (line, None),
    };

    let mut words = line.split_whitespace();
    let verb = words.next()?.to_string();

    let mut transaction_id = None;
    let mut options = Vec::new();
    while let Some(word) = words.next() {
        let key = word.strip_prefix('-')?;
        let value = words.next()?;
        if key == "i" {
            transaction_id = Some(value.parse().ok()?);
        } else {
            options.push((key.to_string(), value.to_string()));
        }
    }

    Some(ParsedCommand {
        verb,
        transaction_id: transaction_id?,
        options,
        data,
    })
}

/// Incremental decoder for inbound `<length>\x00<body>\x00` frames.
///
/// `decode` never blocks: it either yields a complete body, reports that the
/// buffer needs more bytes, or fails on a malformed frame. Feeding the buffer
/// is the caller's job.
#[derive(Debug, Default)]
pub struct FrameCodec {}

impl FrameCodec {
    pub fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Vec<u8>>, FramingError> {
        let Some(length_end) = src.iter().position(|b| *b == 0) else {
            return Ok(None);
        };

        let Some(body_len) = src[length_end + 1..].iter().position(|b| *b == 0) else {
            return Ok(None);
        };

        let declared: usize = std::str::from_utf8(&src[..length_end])?.trim().parse()?;
        if declared != body_len {
            return Err(FramingError::LengthMismatch {
                declared,
                actual: body_len,
            });
        }

        let body = src[length_end + 1..length_end + 1 + body_len].to_vec();
        src.advance(length_end + 1 + body_len + 1);
        tracing::trace!(length = body.len(), "decoded frame");
        Ok(Some(body))
    }
}

/// Render a body the way an engine would put it on the wire. Test helper for
/// anything playing the engine side of a connection.
pub fn encode_frame(body: &[u8]) -> Vec<u8> {
    let mut out = body.len().to_string().into_bytes();
    out.push(0);
    out.extend_from_slice(body);
    out.push(0);
    out
}

#[cfg(test)]
mod tests {
    use bytes::BufMut;

    use super::*;

    macro_rules! roundtrip_test {
        ($name:ident, $command:expr, $tid:expr) => {
            #[test]
            fn $name() {
                let command = $command;
                let encoded = command.encode($tid);
                assert_eq!(*encoded.last().unwrap(), 0, "missing null terminator");

                let line = std::str::from_utf8(&encoded[..encoded.len() - 1]).unwrap();
                let parsed = parse_command_line(line).expect("parsing encoded line");

                assert_eq!(parsed.verb, command.verb);
                assert_eq!(parsed.transaction_id, $tid);
                assert_eq!(parsed.options, command.options);
                assert_eq!(parsed.data, command.data);
            }
        };
    }

    roundtrip_test!(roundtrip_bare, Command::new("run"), 1);
    roundtrip_test!(
        roundtrip_options,
        Command::new("breakpoint_set")
            .option("t", "line")
            .option("f", "file:///srv/index.php")
            .option("n", 42),
        7
    );
    roundtrip_test!(
        roundtrip_payload,
        Command::new("eval").data(b"strlen($x)".to_vec()),
        3
    );

    #[test]
    fn encode_skips_empty_parts() {
        let encoded = Command::new("run").flag("  ").encode(2);
        assert_eq!(&encoded, b"run -i 2\0");
    }

    #[test]
    fn encode_appends_base64_payload() {
        let encoded = Command::new("eval").data(b"hello".to_vec()).encode(5);
        assert_eq!(&encoded, b"eval -i 5 -- aGVsbG8=\0");
    }

    fn decode_all(input: &[u8]) -> Result<Vec<Vec<u8>>, FramingError> {
        let mut codec = FrameCodec::default();
        let mut buffer = BytesMut::new();
        buffer.put(input);

        let mut bodies = Vec::new();
        while let Some(body) = codec.decode(&mut buffer)? {
            bodies.push(body);
        }
        Ok(bodies)
    }

    #[test]
    fn decode_single_frame() {
        let bodies = decode_all(b"5\0hello\0").unwrap();
        assert_eq!(bodies, vec![b"hello".to_vec()]);
    }

    #[test]
    fn decode_multiple_frames() {
        let bodies = decode_all(b"2\0ab\03\0cde\0").unwrap();
        assert_eq!(bodies, vec![b"ab".to_vec(), b"cde".to_vec()]);
    }

    #[test]
    fn decode_incomplete_length_segment() {
        let mut codec = FrameCodec::default();
        let mut buffer = BytesMut::from(&b"12"[..]);
        assert!(codec.decode(&mut buffer).unwrap().is_none());
        assert_eq!(&buffer[..], b"12");
    }

    #[test]
    fn decode_incomplete_body() {
        let mut codec = FrameCodec::default();
        let mut buffer = BytesMut::from(&b"5\0hel"[..]);
        assert!(codec.decode(&mut buffer).unwrap().is_none());

        // the rest of the frame arrives later
        buffer.put(&b"lo\0"[..]);
        assert_eq!(codec.decode(&mut buffer).unwrap().unwrap(), b"hello");
    }

    #[test]
    fn decode_length_mismatch() {
        for declared in [0usize, 1, 4, 6, 100] {
            let input = format!("{declared}\0hello\0");
            let err = decode_all(input.as_bytes()).unwrap_err();
            match err {
                FramingError::LengthMismatch {
                    declared: d,
                    actual,
                } => {
                    assert_eq!(d, declared);
                    assert_eq!(actual, 5);
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }
    }

    #[test]
    fn decode_non_numeric_length() {
        let err = decode_all(b"abc\0hello\0").unwrap_err();
        assert!(matches!(err, FramingError::InvalidLength(_)));
    }

    #[test]
    fn engine_frame_roundtrip() {
        let frame = encode_frame(b"<init/>");
        let bodies = decode_all(&frame).unwrap();
        assert_eq!(bodies, vec![b"<init/>".to_vec()]);
    }
}
