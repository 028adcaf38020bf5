use std::cell::RefCell;
use std::fmt;
use std::io::{self, Cursor, Read, Write};
use std::rc::Rc;

use fxhash::FxBuildHasher;
use indexmap::IndexMap;

use crate::atom_table::*;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum StreamMode {
    Read,
    Write,
    Append,
}

impl StreamMode {
    pub fn as_atom(self) -> Atom {
        match self {
            StreamMode::Read => atom!("read"),
            StreamMode::Write => atom!("write"),
            StreamMode::Append => atom!("append"),
        }
    }

    pub fn from_atom(a: Atom) -> Option<StreamMode> {
        match a.as_str() {
            "read" => Some(StreamMode::Read),
            "write" => Some(StreamMode::Write),
            "append" => Some(StreamMode::Append),
            _ => None,
        }
    }

    pub fn is_input(self) -> bool {
        self == StreamMode::Read
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum StreamType {
    Text,
    Binary,
}

impl StreamType {
    pub fn as_atom(self) -> Atom {
        match self {
            StreamType::Text => atom!("text_stream"),
            StreamType::Binary => atom!("binary_stream"),
        }
    }

    pub fn as_property_atom(self) -> Atom {
        match self {
            StreamType::Text => atom!("text"),
            StreamType::Binary => atom!("binary"),
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum EofAction {
    Error,
    EofCode,
    Reset,
}

impl EofAction {
    pub fn as_atom(self) -> Atom {
        match self {
            EofAction::Error => atom!("error"),
            EofAction::EofCode => atom!("eof_code"),
            EofAction::Reset => atom!("reset"),
        }
    }
}

/// Why a stream operation was refused; the caller shapes the matching
/// permission or representation error.
#[derive(Debug)]
pub enum StreamError {
    NotInput,
    NotOutput,
    NotText,
    NotBinary,
    PastEndOfStream,
    Io(io::Error),
}

impl From<io::Error> for StreamError {
    fn from(e: io::Error) -> Self {
        StreamError::Io(e)
    }
}

enum Source {
    Input(Box<dyn Read>),
    Output(Box<dyn Write>),
    /// An in-memory sink whose contents the host can retrieve.
    Buffer(Vec<u8>),
}

struct StreamInner {
    id: u64,
    mode: StreamMode,
    stream_type: StreamType,
    alias: Option<Atom>,
    eof_action: EofAction,
    reposition: bool,
    source: Source,
    /// Bytes pushed back by peeking.
    pushback: Vec<u8>,
    at_past_eof: bool,
}

/// An opaque stream handle. Handles are reference counted; identity (and
/// the standard order among streams) is the creation id.
#[derive(Clone)]
pub struct Stream(Rc<RefCell<StreamInner>>);

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let inner = self.0.borrow();
        write!(
            f,
            "Stream(id: {}, mode: {:?}, type: {:?})",
            inner.id, inner.mode, inner.stream_type
        )
    }
}

impl Stream {
    fn new(id: u64, mode: StreamMode, stream_type: StreamType, source: Source) -> Stream {
        Stream(Rc::new(RefCell::new(StreamInner {
            id,
            mode,
            stream_type,
            alias: None,
            eof_action: EofAction::EofCode,
            reposition: false,
            source,
            pushback: Vec::new(),
            at_past_eof: false,
        })))
    }

    /// A text input stream over the given source text.
    pub fn from_string(id: u64, text: &str) -> Stream {
        Stream::new(
            id,
            StreamMode::Read,
            StreamType::Text,
            Source::Input(Box::new(Cursor::new(text.as_bytes().to_vec()))),
        )
    }

    pub fn from_reader(id: u64, reader: Box<dyn Read>, stream_type: StreamType) -> Stream {
        Stream::new(id, StreamMode::Read, stream_type, Source::Input(reader))
    }

    /// A text output stream into an in-memory buffer.
    pub fn memory_writer(id: u64) -> Stream {
        Stream::new(
            id,
            StreamMode::Write,
            StreamType::Text,
            Source::Buffer(Vec::new()),
        )
    }

    pub fn from_writer(id: u64, writer: Box<dyn Write>, stream_type: StreamType) -> Stream {
        Stream::new(id, StreamMode::Write, stream_type, Source::Output(writer))
    }

    pub fn id(&self) -> u64 {
        self.0.borrow().id
    }

    pub fn mode(&self) -> StreamMode {
        self.0.borrow().mode
    }

    pub fn stream_type(&self) -> StreamType {
        self.0.borrow().stream_type
    }

    pub fn alias(&self) -> Option<Atom> {
        self.0.borrow().alias
    }

    pub fn set_alias(&self, alias: Atom) {
        self.0.borrow_mut().alias = Some(alias);
    }

    pub fn eof_action(&self) -> EofAction {
        self.0.borrow().eof_action
    }

    pub fn set_eof_action(&self, action: EofAction) {
        self.0.borrow_mut().eof_action = action;
    }

    pub fn reposition(&self) -> bool {
        self.0.borrow().reposition
    }

    /// The accumulated text of an in-memory output stream.
    pub fn contents(&self) -> Option<String> {
        match &self.0.borrow().source {
            Source::Buffer(buf) => Some(String::from_utf8_lossy(buf).into_owned()),
            _ => None,
        }
    }

    fn ensure_input(&self) -> Result<(), StreamError> {
        if self.mode().is_input() {
            Ok(())
        } else {
            Err(StreamError::NotInput)
        }
    }

    fn ensure_output(&self) -> Result<(), StreamError> {
        if self.mode().is_input() {
            Err(StreamError::NotOutput)
        } else {
            Ok(())
        }
    }

    fn ensure_text(&self) -> Result<(), StreamError> {
        if self.stream_type() == StreamType::Text {
            Ok(())
        } else {
            Err(StreamError::NotText)
        }
    }

    fn ensure_binary(&self) -> Result<(), StreamError> {
        if self.stream_type() == StreamType::Binary {
            Ok(())
        } else {
            Err(StreamError::NotBinary)
        }
    }

    fn read_byte_raw(&self) -> Result<Option<u8>, StreamError> {
        let mut inner = self.0.borrow_mut();

        if let Some(b) = inner.pushback.pop() {
            return Ok(Some(b));
        }

        let reader = match &mut inner.source {
            Source::Input(r) => r,
            _ => return Err(StreamError::NotInput),
        };

        let mut buf = [0u8; 1];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(buf[0])),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn check_eof(&self) -> Result<(), StreamError> {
        let mut inner = self.0.borrow_mut();
        if inner.at_past_eof && inner.eof_action == EofAction::Error {
            return Err(StreamError::PastEndOfStream);
        }
        if inner.at_past_eof && inner.eof_action == EofAction::Reset {
            inner.at_past_eof = false;
        }
        Ok(())
    }

    fn mark_eof(&self) {
        self.0.borrow_mut().at_past_eof = true;
    }

    /// Reads one character from a text input stream; `None` at end of
    /// stream.
    pub fn get_char(&self) -> Result<Option<char>, StreamError> {
        self.ensure_input()?;
        self.ensure_text()?;
        self.check_eof()?;

        let first = match self.read_byte_raw()? {
            Some(b) => b,
            None => {
                self.mark_eof();
                return Ok(None);
            }
        };

        let width = utf8_width(first);
        let mut bytes = vec![first];
        for _ in 1..width {
            match self.read_byte_raw()? {
                Some(b) => bytes.push(b),
                None => break,
            }
        }

        match std::str::from_utf8(&bytes) {
            Ok(s) => Ok(s.chars().next()),
            Err(_) => Ok(Some(char::REPLACEMENT_CHARACTER)),
        }
    }

    /// Reads the next character without consuming it.
    pub fn peek_char(&self) -> Result<Option<char>, StreamError> {
        let c = self.get_char()?;
        if let Some(c) = c {
            let mut buf = [0u8; 4];
            let encoded = c.encode_utf8(&mut buf);
            let mut inner = self.0.borrow_mut();
            for b in encoded.bytes().rev() {
                inner.pushback.push(b);
            }
            inner.at_past_eof = false;
        }
        Ok(c)
    }

    pub fn get_byte(&self) -> Result<Option<u8>, StreamError> {
        self.ensure_input()?;
        self.ensure_binary()?;
        self.check_eof()?;

        let b = self.read_byte_raw()?;
        if b.is_none() {
            self.mark_eof();
        }
        Ok(b)
    }

    pub fn peek_byte(&self) -> Result<Option<u8>, StreamError> {
        let b = self.get_byte()?;
        if let Some(b) = b {
            let mut inner = self.0.borrow_mut();
            inner.pushback.push(b);
            inner.at_past_eof = false;
        }
        Ok(b)
    }

    pub fn put_str(&self, s: &str) -> Result<(), StreamError> {
        self.ensure_output()?;
        self.ensure_text()?;

        let mut inner = self.0.borrow_mut();
        match &mut inner.source {
            Source::Output(w) => w.write_all(s.as_bytes())?,
            Source::Buffer(buf) => buf.extend_from_slice(s.as_bytes()),
            Source::Input(_) => return Err(StreamError::NotOutput),
        }
        Ok(())
    }

    pub fn put_char(&self, c: char) -> Result<(), StreamError> {
        let mut buf = [0u8; 4];
        self.put_str(c.encode_utf8(&mut buf))
    }

    pub fn put_byte(&self, b: u8) -> Result<(), StreamError> {
        self.ensure_output()?;
        self.ensure_binary()?;

        let mut inner = self.0.borrow_mut();
        match &mut inner.source {
            Source::Output(w) => w.write_all(&[b])?,
            Source::Buffer(buf) => buf.push(b),
            Source::Input(_) => return Err(StreamError::NotOutput),
        }
        Ok(())
    }

    pub fn flush(&self) -> Result<(), StreamError> {
        self.ensure_output()?;

        let mut inner = self.0.borrow_mut();
        match &mut inner.source {
            Source::Output(w) => w.flush()?,
            Source::Buffer(_) => {}
            Source::Input(_) => return Err(StreamError::NotOutput),
        }
        Ok(())
    }
}

fn utf8_width(first: u8) -> usize {
    match first {
        0x00..=0x7f => 1,
        0xc0..=0xdf => 2,
        0xe0..=0xef => 3,
        _ => 4,
    }
}

/// The open streams, in creation order, plus the alias index. Closing a
/// stream removes every alias that refers to it.
#[derive(Default)]
pub struct StreamTable {
    streams: IndexMap<u64, Stream, FxBuildHasher>,
    aliases: IndexMap<Atom, u64, FxBuildHasher>,
}

impl StreamTable {
    pub fn new() -> StreamTable {
        StreamTable::default()
    }

    pub fn add(&mut self, stream: Stream) {
        if let Some(alias) = stream.alias() {
            self.aliases.insert(alias, stream.id());
        }
        self.streams.insert(stream.id(), stream);
    }

    pub fn alias(&mut self, alias: Atom, stream: &Stream) {
        stream.set_alias(alias);
        self.aliases.insert(alias, stream.id());
    }

    pub fn remove(&mut self, stream: &Stream) {
        let id = stream.id();
        self.streams.shift_remove(&id);
        self.aliases.retain(|_, v| *v != id);
    }

    pub fn by_alias(&self, alias: Atom) -> Option<Stream> {
        self.aliases
            .get(&alias)
            .and_then(|id| self.streams.get(id))
            .cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Stream> {
        self.streams.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_reading_and_peeking() {
        let s = Stream::from_string(1, "ab");

        assert!(matches!(s.peek_char(), Ok(Some('a'))));
        assert!(matches!(s.get_char(), Ok(Some('a'))));
        assert!(matches!(s.get_char(), Ok(Some('b'))));
        assert!(matches!(s.get_char(), Ok(None)));
    }

    #[test]
    fn eof_action_error_rejects_reads_past_the_end() {
        let s = Stream::from_string(1, "");
        s.set_eof_action(EofAction::Error);

        // the first read reaches end of stream.
        assert!(matches!(s.get_char(), Ok(None)));
        // the second is past it.
        assert!(matches!(s.get_char(), Err(StreamError::PastEndOfStream)));
    }

    #[test]
    fn mode_and_type_are_enforced() {
        let input = Stream::from_string(1, "x");
        assert!(matches!(input.put_char('y'), Err(StreamError::NotOutput)));
        assert!(matches!(input.get_byte(), Err(StreamError::NotBinary)));

        let output = Stream::memory_writer(2);
        assert!(matches!(output.get_char(), Err(StreamError::NotInput)));

        output.put_str("hello").unwrap();
        output.put_char('!').unwrap();
        assert_eq!(output.contents().unwrap(), "hello!");
    }

    #[test]
    fn closing_removes_aliases() {
        let mut table = StreamTable::new();
        let s = Stream::from_string(7, "x");

        table.add(s.clone());
        table.alias(atom!("my_input"), &s);
        assert!(table.by_alias(atom!("my_input")).is_some());

        table.remove(&s);
        assert!(table.by_alias(atom!("my_input")).is_none());
    }

    #[test]
    fn multibyte_characters_round_trip() {
        let s = Stream::from_string(1, "é☃");
        assert!(matches!(s.peek_char(), Ok(Some('é'))));
        assert!(matches!(s.get_char(), Ok(Some('é'))));
        assert!(matches!(s.get_char(), Ok(Some('☃'))));
        assert!(matches!(s.get_char(), Ok(None)));
    }
}
