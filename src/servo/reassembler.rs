// Incremental frame reassembler
//
// Turns an unsegmented byte stream into validated frames, one byte at a time.
// Frame boundaries are recovered from the 2-byte magic header alone, so a
// dropped byte only costs the frames until the next header appears.
//
// A checksum failure discards everything consumed for the candidate frame and
// goes back to header search; a header hidden inside the discarded bytes is
// not rescanned.

use std::collections::VecDeque;

use super::protocol::{self, Direction, HEADER_LEN, MIN_FRAME_LEN};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitHeader,
    AwaitCommand,
    AwaitLength,
    AwaitPayload,
    AwaitChecksum,
}

/// Byte-at-a-time frame parser for one bus direction
#[derive(Debug)]
pub struct FrameBuffer {
    direction: Direction,
    state: State,
    window: [u8; HEADER_LEN],
    window_len: usize,
    command: u8,
    length: usize,
    payload: Vec<u8>,
    ready: VecDeque<Vec<u8>>,
}

impl FrameBuffer {
    /// Create a parser accepting frames travelling in `direction`
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            state: State::AwaitHeader,
            window: [0; HEADER_LEN],
            window_len: 0,
            command: 0,
            length: 0,
            payload: Vec::new(),
            ready: VecDeque::new(),
        }
    }

    /// Push one byte from the stream
    pub fn feed(&mut self, byte: u8) {
        match self.state {
            State::AwaitHeader => {
                // Slide the window: keep the newest HEADER_LEN bytes
                if self.window_len < HEADER_LEN {
                    self.window[self.window_len] = byte;
                    self.window_len += 1;
                } else {
                    self.window.copy_within(1.., 0);
                    self.window[HEADER_LEN - 1] = byte;
                }

                if self.window_len == HEADER_LEN && self.window == self.direction.header() {
                    self.state = State::AwaitCommand;
                }
            }
            State::AwaitCommand => {
                self.command = byte;
                self.state = State::AwaitLength;
            }
            State::AwaitLength => {
                self.length = byte as usize;
                self.payload.clear();
                self.state = if self.length == 0 {
                    State::AwaitChecksum
                } else {
                    State::AwaitPayload
                };
            }
            State::AwaitPayload => {
                self.payload.push(byte);
                if self.payload.len() == self.length {
                    self.state = State::AwaitChecksum;
                }
            }
            State::AwaitChecksum => {
                let mut frame = Vec::with_capacity(MIN_FRAME_LEN + self.payload.len());
                frame.extend_from_slice(&self.direction.header());
                frame.push(self.command);
                frame.push(self.length as u8);
                frame.extend_from_slice(&self.payload);
                frame.push(byte);

                if protocol::verify(&frame, self.direction) {
                    self.ready.push_back(frame);
                }
                self.reset();
            }
        }
    }

    /// Push a run of bytes, in order
    pub fn extend(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.feed(byte);
        }
    }

    /// Take every validated frame, oldest first
    pub fn drain(&mut self) -> Vec<Vec<u8>> {
        self.ready.drain(..).collect()
    }

    /// Number of validated frames waiting to be drained
    pub fn pending(&self) -> usize {
        self.ready.len()
    }

    /// Drop the in-progress candidate and return to header search
    ///
    /// Frames already validated stay queued.
    pub fn reset(&mut self) {
        self.state = State::AwaitHeader;
        self.window_len = 0;
        self.command = 0;
        self.length = 0;
        self.payload.clear();
    }
}
