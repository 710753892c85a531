//! Generic netlink wire decoding for the kernel module's VFS event attributes (§6).
//!
//! The byte layout itself is treated as an external contract (§1): this module only needs to
//! decode it, not own it. Attribute parsing reuses the teacher's XDR primitive-reading idiom
//! (big-endian-free here, since netlink is host-endian, but the same "read fixed-width, validate,
//! advance" shape).

pub mod socket;

use std::io::{Cursor, Read};

use byteorder::{NativeEndian, ReadBytesExt};

use crate::action::Action;
use crate::error::{Error, Result};

/// Netlink attribute type IDs (§6).
pub mod attr {
    pub const ACT: u16 = 1;
    pub const COOKIE: u16 = 2;
    pub const MAJOR: u16 = 3;
    pub const MINOR: u16 = 4;
    pub const PATH: u16 = 5;
}

/// Generic netlink family and multicast group names (§6).
pub const FAMILY_NAME: &str = "vfsmonitor";
pub const GROUP_NAME: &str = "vfsmonitor_de";

/// Maximum path length accepted on the wire (§3).
pub const MAX_PATH_LEN: usize = 4096;

/// Netlink attributes are padded to 4-byte boundaries (`NLA_ALIGNTO`).
const NLA_ALIGNTO: usize = 4;

fn align(n: usize) -> usize {
    (n + NLA_ALIGNTO - 1) & !(NLA_ALIGNTO - 1)
}

/// One decoded kernel event, before any mount resolution or action normalization (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub action: Action,
    pub cookie: u32,
    pub major: u16,
    pub minor: u8,
    pub path: String,
}

/// Decodes the attribute payload of one generic netlink message (the part after the `nlmsghdr`
/// and `genlmsghdr`) into a [`RawEvent`].
///
/// Unknown attribute types are skipped; a required attribute missing from the message, or a path
/// exceeding [`MAX_PATH_LEN`], is reported as [`Error::Netlink`] so the caller can count and drop
/// the message per §7.
pub fn decode_attrs(payload: &[u8]) -> Result<RawEvent> {
    let mut action = None;
    let mut cookie = None;
    let mut major = None;
    let mut minor = None;
    let mut path = None;

    let mut cursor = Cursor::new(payload);
    while (cursor.position() as usize) < payload.len() {
        let (attr_type, body) = read_attr(&mut cursor)?;
        match attr_type {
            attr::ACT => action = Some(body.first().copied().ok_or_else(|| too_short("ACT"))?),
            attr::COOKIE => cookie = Some(read_u32(body)?),
            attr::MAJOR => major = Some(read_u16(body)?),
            attr::MINOR => minor = Some(body.first().copied().ok_or_else(|| too_short("MINOR"))?),
            attr::PATH => path = Some(read_path(body)?),
            _ => {}
        }
    }

    let action_code = action.ok_or_else(|| missing("ACT"))?;
    let action = num_traits::FromPrimitive::from_u8(action_code)
        .ok_or_else(|| Error::Netlink(format!("unknown action code {action_code}")))?;

    Ok(RawEvent {
        action,
        cookie: cookie.ok_or_else(|| missing("COOKIE"))?,
        major: major.ok_or_else(|| missing("MAJOR"))?,
        minor: minor.ok_or_else(|| missing("MINOR"))?,
        path: path.ok_or_else(|| missing("PATH"))?,
    })
}

/// Reads one `(len: u16, type: u16, payload[len-4])` TLV, consuming its alignment padding, and
/// returns the attribute type and a borrowed slice of its payload.
fn read_attr<'a>(cursor: &mut Cursor<&'a [u8]>) -> Result<(u16, &'a [u8])> {
    let start = cursor.position() as usize;
    let total_len = cursor.read_u16::<NativeEndian>().map_err(|_| too_short("attribute header"))? as usize;
    let attr_type = cursor.read_u16::<NativeEndian>().map_err(|_| too_short("attribute header"))?;

    if total_len < 4 {
        return Err(Error::Netlink("attribute length shorter than header".to_string()));
    }

    let payload_len = total_len - 4;
    let buf = *cursor.get_ref();
    let payload_start = start + 4;
    let payload_end = payload_start
        .checked_add(payload_len)
        .filter(|&end| end <= buf.len())
        .ok_or_else(|| too_short("attribute payload"))?;

    let payload = &buf[payload_start..payload_end];
    let consumed = align(total_len);
    let next = start + consumed;
    cursor.set_position(next.min(buf.len()) as u64);

    Ok((attr_type, payload))
}

fn read_u16(body: &[u8]) -> Result<u16> {
    let mut cursor = Cursor::new(body);
    cursor.read_u16::<NativeEndian>().map_err(|_| too_short("u16 attribute"))
}

fn read_u32(body: &[u8]) -> Result<u32> {
    let mut cursor = Cursor::new(body);
    cursor.read_u32::<NativeEndian>().map_err(|_| too_short("u32 attribute"))
}

fn read_path(body: &[u8]) -> Result<String> {
    // NUL-terminated string (§6); strip the terminator if present.
    let bytes = match body.iter().position(|&b| b == 0) {
        Some(pos) => &body[..pos],
        None => body,
    };
    if bytes.len() > MAX_PATH_LEN {
        return Err(Error::Netlink(format!("path exceeds {MAX_PATH_LEN} bytes")));
    }
    let mut s = String::new();
    Cursor::new(bytes).read_to_string(&mut s).map_err(|_| Error::Netlink("path is not valid UTF-8".to_string()))?;
    if !s.starts_with('/') {
        return Err(Error::Netlink("path is not filesystem-root-relative".to_string()));
    }
    Ok(s)
}

fn too_short(what: &str) -> Error {
    Error::Netlink(format!("message too short while reading {what}"))
}

fn missing(attr_name: &str) -> Error {
    Error::Netlink(format!("missing required attribute {attr_name}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_attr(buf: &mut Vec<u8>, attr_type: u16, payload: &[u8]) {
        let total_len = (4 + payload.len()) as u16;
        buf.extend_from_slice(&total_len.to_ne_bytes());
        buf.extend_from_slice(&attr_type.to_ne_bytes());
        buf.extend_from_slice(payload);
        let padded = align(buf.len() - (buf.len() - (4 + payload.len())) + 0);
        let _ = padded;
        while buf.len() % NLA_ALIGNTO != 0 {
            buf.push(0);
        }
    }

    fn sample_message() -> Vec<u8> {
        let mut buf = Vec::new();
        push_attr(&mut buf, attr::ACT, &[0u8]); // NewFile
        push_attr(&mut buf, attr::COOKIE, &0u32.to_ne_bytes());
        push_attr(&mut buf, attr::MAJOR, &8u16.to_ne_bytes());
        push_attr(&mut buf, attr::MINOR, &[1u8]);
        push_attr(&mut buf, attr::PATH, b"/notes.txt\0");
        buf
    }

    #[test]
    fn decodes_new_file_event() {
        let event = decode_attrs(&sample_message()).unwrap();
        assert_eq!(event.action, Action::NewFile);
        assert_eq!(event.cookie, 0);
        assert_eq!(event.major, 8);
        assert_eq!(event.minor, 1);
        assert_eq!(event.path, "/notes.txt");
    }

    #[test]
    fn rejects_missing_attribute() {
        let mut buf = Vec::new();
        push_attr(&mut buf, attr::ACT, &[0u8]);
        assert!(decode_attrs(&buf).is_err());
    }

    #[test]
    fn rejects_oversized_path() {
        let mut buf = Vec::new();
        push_attr(&mut buf, attr::ACT, &[0u8]);
        push_attr(&mut buf, attr::COOKIE, &0u32.to_ne_bytes());
        push_attr(&mut buf, attr::MAJOR, &8u16.to_ne_bytes());
        push_attr(&mut buf, attr::MINOR, &[1u8]);
        let mut oversized = vec![b'/'];
        oversized.extend(std::iter::repeat(b'a').take(MAX_PATH_LEN + 1));
        push_attr(&mut buf, attr::PATH, &oversized);
        assert!(decode_attrs(&buf).is_err());
    }
}
