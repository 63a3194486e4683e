use bytes::{Bytes, BytesMut};

use crate::error::reply_message;
use crate::frame::Frame;
use crate::Error;

/// Collects the reply to a single request.
///
/// A responder holds either reply fragments or one error, never both: whichever kind was
/// written last wins. When serialized it always produces exactly one reply, so a handler that
/// writes nothing answers with a null.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Responder {
    payload: Payload,
}

#[derive(Debug, Default, Clone, PartialEq)]
enum Payload {
    #[default]
    Empty,
    Fragments(Vec<Frame>),
    Error(String),
}

impl Responder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_frame(&mut self, frame: Frame) {
        match &mut self.payload {
            Payload::Fragments(frames) => frames.push(frame),
            payload => *payload = Payload::Fragments(vec![frame]),
        }
    }

    pub fn write_simple(&mut self, s: impl Into<String>) {
        self.write_frame(Frame::Simple(s.into()));
    }

    pub fn write_bulk(&mut self, data: impl Into<Bytes>) {
        self.write_frame(Frame::Bulk(data.into()));
    }

    pub fn write_int(&mut self, i: i64) {
        self.write_frame(Frame::Integer(i));
    }

    pub fn write_nil(&mut self) {
        self.write_frame(Frame::Null);
    }

    pub fn write_array(&mut self, frames: Vec<Frame>) {
        self.write_frame(Frame::Array(frames));
    }

    /// Replaces anything written so far with an error reply.
    pub fn write_error(&mut self, err: &Error) {
        self.payload = Payload::Error(reply_message(err));
    }

    pub fn is_error(&self) -> bool {
        matches!(self.payload, Payload::Error(_))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.payload, Payload::Empty)
    }

    /// The reply as a single frame. Several fragments are sent as one array.
    pub fn to_frame(&self) -> Frame {
        match &self.payload {
            Payload::Empty => Frame::Null,
            Payload::Fragments(frames) if frames.len() == 1 => frames[0].clone(),
            Payload::Fragments(frames) => Frame::Array(frames.clone()),
            Payload::Error(msg) => Frame::Error(msg.clone()),
        }
    }

    /// Serializes the reply into `dst`, returning the number of bytes written.
    pub fn write_to(&self, dst: &mut BytesMut) -> usize {
        let before = dst.len();
        self.to_frame().write_to(dst);
        dst.len() - before
    }
}
