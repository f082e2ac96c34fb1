// Fashion Star UART servo frame codec
//
// Frame format (both directions):
// [MAGIC_0, MAGIC_1, Command, Length, Params..., Checksum]
// Checksum is the low byte of the sum of every preceding byte, header included.

/// Header of a host -> servo frame
pub const REQUEST_HEADER: [u8; 2] = [0x12, 0x4C];
/// Header of a servo -> host frame
pub const RESPONSE_HEADER: [u8; 2] = [0x05, 0x1C];

pub const HEADER_LEN: usize = 2;
const COMMAND_LEN: usize = 1;
const SIZE_LEN: usize = 1;
const CHECKSUM_LEN: usize = 1;

/// Smallest well-formed frame: header + command + length + checksum
pub const MIN_FRAME_LEN: usize = HEADER_LEN + COMMAND_LEN + SIZE_LEN + CHECKSUM_LEN;

/// Largest payload a single frame can carry (length is one byte)
pub const MAX_PAYLOAD_LEN: usize = u8::MAX as usize;

/// Which way a frame travels on the shared bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
}

impl Direction {
    /// Magic bytes that open a frame travelling this way
    pub fn header(self) -> [u8; 2] {
        match self {
            Direction::Request => REQUEST_HEADER,
            Direction::Response => RESPONSE_HEADER,
        }
    }
}

/// Command codes
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Ping = 1,
    QueryInfo = 5,
    SetSpin = 7,
    SetAngle = 8,
    SetDamping = 9,
    QueryAngle = 10,
}

impl TryFrom<u8> for Command {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(Command::Ping),
            5 => Ok(Command::QueryInfo),
            7 => Ok(Command::SetSpin),
            8 => Ok(Command::SetAngle),
            9 => Ok(Command::SetDamping),
            10 => Ok(Command::QueryAngle),
            other => Err(other),
        }
    }
}

/// Checksum over header, command, length and payload
pub fn checksum(direction: Direction, command: u8, payload: &[u8]) -> u8 {
    let header = direction.header();
    let sum: u32 = header
        .iter()
        .chain([command, payload.len() as u8].iter())
        .chain(payload.iter())
        .map(|&b| b as u32)
        .sum();
    (sum & 0xFF) as u8
}

/// Build a request frame
pub fn pack(command: u8, payload: &[u8]) -> Vec<u8> {
    pack_as(Direction::Request, command, payload)
}

/// Build a frame travelling in `direction`
///
/// The payload must fit in one length byte; longer payloads are a caller bug.
pub fn pack_as(direction: Direction, command: u8, payload: &[u8]) -> Vec<u8> {
    debug_assert!(payload.len() <= MAX_PAYLOAD_LEN);

    let mut frame = Vec::with_capacity(MIN_FRAME_LEN + payload.len());
    frame.extend_from_slice(&direction.header());
    frame.push(command);
    frame.push(payload.len() as u8);
    frame.extend_from_slice(payload);
    frame.push(checksum(direction, command, payload));

    frame
}

/// Check header, declared length and checksum of a complete frame
pub fn verify(frame: &[u8], direction: Direction) -> bool {
    if frame.len() < MIN_FRAME_LEN {
        return false;
    }

    if frame[..HEADER_LEN] != direction.header() {
        return false;
    }

    let command = frame[HEADER_LEN];
    let size = frame[HEADER_LEN + COMMAND_LEN] as usize;
    let payload = &frame[MIN_FRAME_LEN - CHECKSUM_LEN..frame.len() - CHECKSUM_LEN];
    if payload.len() != size {
        return false;
    }

    frame[frame.len() - 1] == checksum(direction, command, payload)
}

/// Decode a response frame into its command code and payload
pub fn unpack(frame: &[u8]) -> Option<(u8, &[u8])> {
    unpack_as(frame, Direction::Response)
}

/// Decode a frame travelling in `direction`
pub fn unpack_as(frame: &[u8], direction: Direction) -> Option<(u8, &[u8])> {
    if !verify(frame, direction) {
        return None;
    }

    let command = frame[HEADER_LEN];
    let payload = &frame[MIN_FRAME_LEN - CHECKSUM_LEN..frame.len() - CHECKSUM_LEN];
    Some((command, payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_pack_ping() {
        let frame = pack(Command::Ping as u8, &[3]);
        // 0x12 + 0x4C + 0x01 + 0x01 + 0x03 = 0x63
        assert_eq!(frame, vec![0x12, 0x4C, 0x01, 0x01, 0x03, 0x63]);
    }

    #[test]
    fn test_checksum_wraps() {
        let payload = [0xFF; 4];
        let expected = (0x05u32 + 0x1C + 0x0A + 0x04 + 4 * 0xFF) % 256;
        assert_eq!(
            checksum(Direction::Response, 0x0A, &payload) as u32,
            expected
        );
    }

    #[test]
    fn test_verify_rejects_wrong_direction() {
        let frame = pack(Command::Ping as u8, &[0]);
        assert!(verify(&frame, Direction::Request));
        assert!(!verify(&frame, Direction::Response));
        assert_eq!(unpack(&frame), None);
    }

    #[test]
    fn test_verify_rejects_length_mismatch() {
        let mut frame = pack_as(Direction::Response, 10, &[1, 2, 3]);
        frame[3] = 2;
        assert!(!verify(&frame, Direction::Response));
    }

    #[test]
    fn test_verify_short_input() {
        assert!(!verify(&[], Direction::Response));
        assert!(!verify(&RESPONSE_HEADER, Direction::Response));
        assert!(!verify(&[0x05, 0x1C, 0x01, 0x00], Direction::Response));
    }

    #[test]
    fn test_empty_payload() {
        let frame = pack_as(Direction::Response, Command::Ping as u8, &[]);
        assert_eq!(frame.len(), MIN_FRAME_LEN);
        assert_eq!(unpack(&frame), Some((1, &[][..])));
    }

    #[test]
    fn test_command_codes() {
        assert_eq!(Command::try_from(8), Ok(Command::SetAngle));
        assert_eq!(Command::try_from(10), Ok(Command::QueryAngle));
        assert_eq!(Command::try_from(42), Err(42));
    }

    proptest! {
        #[test]
        fn response_round_trip(command in any::<u8>(), payload in prop::collection::vec(any::<u8>(), 0..=255)) {
            let frame = pack_as(Direction::Response, command, &payload);
            prop_assert_eq!(unpack(&frame), Some((command, payload.as_slice())));
        }

        #[test]
        fn single_bit_flip_is_rejected(
            command in any::<u8>(),
            payload in prop::collection::vec(any::<u8>(), 0..32),
            bit in any::<prop::sample::Index>(),
        ) {
            let mut frame = pack_as(Direction::Response, command, &payload);
            let bit = bit.index(frame.len() * 8);
            frame[bit / 8] ^= 1 << (bit % 8);
            prop_assert!(!verify(&frame, Direction::Response));
        }
    }
}
