//! Reply reconstructor (C2): buffers partial bytes and emits complete
//! replies in arrival order.
//!
//! Holds an owned `BytesMut` accumulation buffer and drives it with an
//! explicit parse stack rather than recursion, so many frames can be
//! pulled out of one byte stream without risking stack depth.

use bytes::{Buf, BytesMut};

use crate::codec::{self, DecodeError, RValue};

/// One level of the explicit parse stack. `Start` means we don't yet know
/// whether we're about to read a status line, an integer, or a
/// length/count header — the leading byte decides that.
#[derive(Debug)]
enum StackFrame {
    Start,
    AwaitBulk { len: usize },
    AwaitArray { remaining: usize, items: Vec<RValue> },
}

/// Nested arrays below this depth must decode successfully; beyond it
/// the reconstructor fails with `MalformedFrame` rather than growing the
/// stack without bound.
const MAX_DEPTH: usize = 128;

/// Stateful incremental parser. Feed it byte chunks in arrival order via
/// [`process`]; it invokes the supplied sink exactly once per completed
/// reply, in order. Any decode error poisons the reconstructor permanently.
pub struct ReplyReconstructor {
    buf: BytesMut,
    stack: Vec<StackFrame>,
    poisoned: Option<DecodeError>,
}

impl ReplyReconstructor {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
            stack: vec![StackFrame::Start],
            poisoned: None,
        }
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.is_some()
    }

    /// Appends `chunk` and drives the state machine as far as possible,
    /// calling `on_reply` once per completed top-level value, in order.
    /// Leftover bytes and partial frame state are retained for the next call.
    pub fn process(
        &mut self,
        chunk: &[u8],
        mut on_reply: impl FnMut(RValue),
    ) -> Result<(), DecodeError> {
        if let Some(e) = &self.poisoned {
            return Err(e.clone());
        }
        self.buf.extend_from_slice(chunk);

        let result = self.drive(&mut on_reply);
        if let Err(e) = &result {
            self.poisoned = Some(e.clone());
        }
        result
    }

    /// Advances the stack until no further progress is possible (need more
    /// bytes) or a hard decode error occurs.
    fn drive(&mut self, on_reply: &mut impl FnMut(RValue)) -> Result<(), DecodeError> {
        loop {
            match self.step()? {
                StepOutcome::NeedMoreBytes => return Ok(()),
                StepOutcome::Progressed => continue,
                StepOutcome::Completed(value) => on_reply(value),
            }
        }
    }

    /// Attempts one unit of progress against the top of the parse stack.
    fn step(&mut self) -> Result<StepOutcome, DecodeError> {
        match self.stack.last() {
            None => {
                // A top-level reply just completed; start parsing the next one.
                self.stack.push(StackFrame::Start);
                Ok(StepOutcome::Progressed)
            }
            Some(StackFrame::Start) => self.step_start(),
            Some(StackFrame::AwaitBulk { len }) => {
                let len = *len;
                self.step_bulk(len)
            }
            Some(StackFrame::AwaitArray { .. }) => {
                // The array frame itself never advances directly: a child
                // `Start` frame is pushed on top of it to parse the next element.
                self.stack.push(StackFrame::Start);
                Ok(StepOutcome::Progressed)
            }
        }
    }

    fn step_start(&mut self) -> Result<StepOutcome, DecodeError> {
        let Some((line, consumed)) = codec::scan_line(&self.buf) else {
            return Ok(StepOutcome::NeedMoreBytes);
        };
        if line.is_empty() {
            return Err(DecodeError::MalformedFrame("empty line".into()));
        }
        let tag = line[0];
        let body = &line[1..];

        match tag {
            b'+' => {
                let text = utf8(body, "simple string")?.to_string();
                self.buf.advance(consumed);
                self.stack.pop();
                Ok(self.complete(RValue::SimpleString(text)))
            }
            b'-' => {
                let text = utf8(body, "error")?.to_string();
                self.buf.advance(consumed);
                self.stack.pop();
                Ok(self.complete(RValue::Error(text)))
            }
            b':' => {
                let n = codec::parse_decimal(body)?;
                self.buf.advance(consumed);
                self.stack.pop();
                Ok(self.complete(RValue::Integer(n)))
            }
            b'$' => {
                let len = codec::parse_decimal(body)?;
                if len < -1 {
                    return Err(DecodeError::BadLength);
                }
                self.buf.advance(consumed);
                self.stack.pop();
                if len == -1 {
                    Ok(self.complete(RValue::BulkString(None)))
                } else {
                    self.stack.push(StackFrame::AwaitBulk { len: len as usize });
                    Ok(StepOutcome::Progressed)
                }
            }
            b'*' => {
                let count = codec::parse_decimal(body)?;
                if count < -1 {
                    return Err(DecodeError::BadLength);
                }
                self.buf.advance(consumed);
                self.stack.pop();
                if count == -1 {
                    Ok(self.complete(RValue::Array(None)))
                } else if count == 0 {
                    Ok(self.complete(RValue::Array(Some(Vec::new()))))
                } else {
                    if self.array_depth() >= MAX_DEPTH {
                        return Err(DecodeError::MalformedFrame(
                            "array nesting exceeded maximum depth".into(),
                        ));
                    }
                    self.stack.push(StackFrame::AwaitArray {
                        remaining: count as usize,
                        items: Vec::with_capacity(count as usize),
                    });
                    Ok(StepOutcome::Progressed)
                }
            }
            other => Err(DecodeError::MalformedFrame(format!(
                "unrecognized leading byte {other:#04x}"
            ))),
        }
    }

    fn step_bulk(&mut self, len: usize) -> Result<StepOutcome, DecodeError> {
        if self.buf.len() < len + 2 {
            return Ok(StepOutcome::NeedMoreBytes);
        }
        if &self.buf[len..len + 2] != b"\r\n" {
            return Err(DecodeError::UnexpectedTerminator);
        }
        let bytes = self.buf[..len].to_vec();
        self.buf.advance(len + 2);
        self.stack.pop();
        Ok(self.complete(RValue::BulkString(Some(bytes))))
    }

    fn array_depth(&self) -> usize {
        self.stack
            .iter()
            .filter(|f| matches!(f, StackFrame::AwaitArray { .. }))
            .count()
    }

    /// Feeds a completed value to whatever is now on top of the stack: if
    /// it's an enclosing array, the value is absorbed as one of its
    /// elements (recursively completing the array too, if it was the
    /// last element needed); if the stack is empty, the value is a
    /// completed top-level reply.
    fn complete(&mut self, value: RValue) -> StepOutcome {
        match self.stack.last_mut() {
            None => StepOutcome::Completed(value),
            Some(StackFrame::AwaitArray { remaining, items }) => {
                items.push(value);
                *remaining -= 1;
                if *remaining == 0 {
                    let Some(StackFrame::AwaitArray { items, .. }) = self.stack.pop() else {
                        unreachable!()
                    };
                    self.complete(RValue::Array(Some(items)))
                } else {
                    StepOutcome::Progressed
                }
            }
            Some(StackFrame::Start) | Some(StackFrame::AwaitBulk { .. }) => {
                unreachable!("only AwaitArray accumulates completed children")
            }
        }
    }
}

enum StepOutcome {
    NeedMoreBytes,
    Progressed,
    Completed(RValue),
}

fn utf8<'a>(bytes: &'a [u8], what: &str) -> Result<&'a str, DecodeError> {
    std::str::from_utf8(bytes).map_err(|_| DecodeError::MalformedFrame(format!("non-utf8 {what}")))
}

impl Default for ReplyReconstructor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(chunks: &[&[u8]]) -> Vec<RValue> {
        let mut r = ReplyReconstructor::new();
        let mut out = Vec::new();
        for chunk in chunks {
            r.process(chunk, |v| out.push(v)).unwrap();
        }
        out
    }

    #[test]
    fn single_chunk_integer() {
        assert_eq!(collect(&[b":42\r\n"]), vec![RValue::Integer(42)]);
    }

    #[test]
    fn splits_across_arbitrary_chunk_boundaries() {
        // "$5\r\nhello\r\n" split mid-header, mid-body, and mid-terminator.
        let out = collect(&[b"$5\r", b"\nhel", b"lo\r\n"]);
        assert_eq!(out, vec![RValue::BulkString(Some(b"hello".to_vec()))]);
    }

    #[test]
    fn pipelined_replies_in_one_chunk_emit_in_order() {
        let out = collect(&[b":1\r\n:2\r\n:3\r\n"]);
        assert_eq!(
            out,
            vec![RValue::Integer(1), RValue::Integer(2), RValue::Integer(3)]
        );
    }

    #[test]
    fn nested_arrays_decode_without_recursion_limits_below_128() {
        let mut value = RValue::Integer(7);
        for _ in 0..127 {
            value = RValue::Array(Some(vec![value]));
        }
        let encoded = value.encode();
        let out = collect(&[&encoded]);
        assert_eq!(out, vec![value]);
    }

    #[test]
    fn null_bulk_and_null_array() {
        assert_eq!(collect(&[b"$-1\r\n"]), vec![RValue::BulkString(None)]);
        assert_eq!(collect(&[b"*-1\r\n"]), vec![RValue::Array(None)]);
    }

    #[test]
    fn malformed_leading_byte_poisons_reconstructor() {
        let mut r = ReplyReconstructor::new();
        let err = r.process(b"!nope\r\n", |_| {}).unwrap_err();
        assert!(matches!(err, DecodeError::MalformedFrame(_)));
        assert!(r.is_poisoned());
        let err2 = r.process(b":1\r\n", |_| {}).unwrap_err();
        assert_eq!(err, err2);
    }

    #[test]
    fn depth_beyond_128_fails_with_malformed_frame() {
        let mut value = RValue::Integer(7);
        for _ in 0..129 {
            value = RValue::Array(Some(vec![value]));
        }
        let encoded = value.encode();
        let mut r = ReplyReconstructor::new();
        let err = r.process(&encoded, |_| {}).unwrap_err();
        assert!(matches!(err, DecodeError::MalformedFrame(_)));
    }
}
