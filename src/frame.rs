use crate::error::FrameError;
use crate::noise::{NOISE_WA_PROLOGUE, NoiseState};

/// Largest body a 24-bit length prefix can carry.
const MAX_FRAME_LEN: usize = 0xFF_FF_FF;

/// Length-prefixed framer over the byte transport.
///
/// Prepends the one-time routing/prologue preamble to the first outbound
/// write and reassembles inbound frames from arbitrarily chunked reads.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    intro_header: Vec<u8>,
    sent_intro: bool,
    buffer: Vec<u8>,
}

impl FrameCodec {
    /// Creates a framer; a known routing info blob is replayed inside the
    /// preamble ahead of the prologue.
    pub fn new(routing_info: Option<&[u8]>) -> Self {
        Self {
            intro_header: build_intro_header(routing_info),
            sent_intro: false,
            buffer: Vec::new(),
        }
    }

    /// Frames one outbound payload, encrypting it once the handshake is
    /// finished. The preamble is emitted exactly once per connection.
    pub fn encode(&mut self, noise: &mut NoiseState, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
        let body = if noise.is_finished() {
            noise.encrypt_transport(payload)?
        } else {
            payload.to_vec()
        };

        if body.len() > MAX_FRAME_LEN {
            return Err(FrameError::FrameTooLarge);
        }

        let intro_len = if self.sent_intro {
            0
        } else {
            self.intro_header.len()
        };
        let mut out = Vec::with_capacity(intro_len + 3 + body.len());
        if !self.sent_intro {
            out.extend_from_slice(&self.intro_header);
            self.sent_intro = true;
        }

        let len = body.len();
        out.push(((len >> 16) & 0xFF) as u8);
        out.push(((len >> 8) & 0xFF) as u8);
        out.push((len & 0xFF) as u8);
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Buffers an inbound chunk and drains every complete frame, one
    /// payload per wire frame. A transport decrypt failure drops that frame
    /// and keeps the stream aligned on the next length prefix.
    pub fn decode(&mut self, noise: &mut NoiseState, chunk: &[u8]) -> Vec<Vec<u8>> {
        if !chunk.is_empty() {
            self.buffer.extend_from_slice(chunk);
        }

        let mut out = Vec::new();
        loop {
            if self.buffer.len() < 3 {
                break;
            }

            let frame_len = ((self.buffer[0] as usize) << 16)
                | ((self.buffer[1] as usize) << 8)
                | self.buffer[2] as usize;
            let full_len = 3 + frame_len;
            if self.buffer.len() < full_len {
                break;
            }

            let body = self.buffer[3..full_len].to_vec();
            self.buffer.drain(..full_len);

            if noise.is_finished() {
                match noise.decrypt_transport(&body) {
                    Ok(payload) => out.push(payload),
                    Err(error) => {
                        tracing::warn!(error = %error, frame_len, "dropping undecryptable frame");
                    }
                }
            } else {
                out.push(body);
            }
        }

        out
    }

    /// True once the preamble has been written.
    pub fn sent_preamble(&self) -> bool {
        self.sent_intro
    }
}

fn build_intro_header(routing_info: Option<&[u8]>) -> Vec<u8> {
    if let Some(routing_info) = routing_info {
        let mut out = Vec::with_capacity(7 + routing_info.len() + NOISE_WA_PROLOGUE.len());
        out.extend_from_slice(b"ED");
        out.push(0);
        out.push(1);
        out.push(((routing_info.len() >> 16) & 0xFF) as u8);
        out.push(((routing_info.len() >> 8) & 0xFF) as u8);
        out.push((routing_info.len() & 0xFF) as u8);
        out.extend_from_slice(routing_info);
        out.extend_from_slice(&NOISE_WA_PROLOGUE);
        return out;
    }

    NOISE_WA_PROLOGUE.to_vec()
}
