use super::{Chunks, ChunksError};

#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    ChunksError(ChunksError),
    InvalidPayload,
}

/// One dispatched server-sent event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// A type for reading server-sent events from a chunk stream.
pub struct Sse {
    buf: String,
    // Trailing bytes of an UTF-8 sequence split across chunks.
    undecoded: Vec<u8>,
    chunks: Chunks,
}

impl Sse {
    #[inline]
    pub fn new(chunks: Chunks) -> Self {
        Self {
            buf: String::new(),
            undecoded: Vec::new(),
            chunks,
        }
    }

    pub async fn next_event(&mut self) -> Result<Option<SseEvent>, Error> {
        loop {
            // The buffer may already hold several complete events.
            if let Some(event) = self.try_parse_event() {
                return Ok(Some(event));
            }

            let Some(bytes) =
                self.chunks.next_chunk().await.map_err(Error::ChunksError)?
            else {
                if !self.undecoded.is_empty() {
                    return Err(Error::InvalidPayload);
                }
                // An unterminated event at the end of the stream is never
                // dispatched.
                return Ok(None);
            };
            self.push_bytes(&bytes)?;
        }
    }

    fn push_bytes(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.undecoded.extend_from_slice(bytes);
        let valid_up_to = match str::from_utf8(&self.undecoded) {
            Ok(s) => s.len(),
            // Incomplete sequence at the end, wait for the next chunk.
            Err(err) if err.error_len().is_none() => err.valid_up_to(),
            Err(_) => return Err(Error::InvalidPayload),
        };
        let decoded = str::from_utf8(&self.undecoded[..valid_up_to])
            .map_err(|_| Error::InvalidPayload)?;
        self.buf.push_str(decoded);
        self.undecoded.drain(..valid_up_to);

        // Only `cr lf` and `lf` line endings are handled.
        if self.buf.contains("\r\n") {
            self.buf = self.buf.replace("\r\n", "\n");
        }
        Ok(())
    }

    fn try_parse_event(&mut self) -> Option<SseEvent> {
        // event         = *( comment / field ) end-of-line
        // comment       = colon *any-char end-of-line
        // field         = 1*name-char [ colon [ space ] *any-char ] end-of-line
        loop {
            let eol_idx = self.buf.find("\n\n")?;
            let block: String = self.buf.drain(..eol_idx + 2).collect();
            if let Some(event) = parse_block(&block[..eol_idx]) {
                return Some(event);
            }
            // Blocks without data are not dispatched.
        }
    }
}

fn parse_block(block: &str) -> Option<SseEvent> {
    let mut event = None;
    let mut data_lines = vec![];
    for line in block.split('\n') {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => {
                (field, value.strip_prefix(' ').unwrap_or(value))
            }
            None => (line, ""),
        };
        match field {
            "data" => data_lines.push(value),
            "event" => event = Some(value.to_owned()),
            _ => trace!("ignored sse field: {field}"),
        }
    }
    if data_lines.is_empty() {
        return None;
    }
    Some(SseEvent {
        event,
        data: data_lines.join("\n"),
    })
}
