//! ATAPI 12-byte command packet.
//!
//! Framed by an ATA PACKET command (0xA0); the device then behaves as a
//! SCSI target. Some devices demand a 16-byte packet; those are treated
//! as malformed at parse time (this engine only emits the 12-byte form).

pub const ATAPI_PACKET_LEN: usize = 12;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AtapiPacket {
    pub bytes: [u8; ATAPI_PACKET_LEN],
}

impl AtapiPacket {
    /// Copy `cdb` verbatim into a zero-padded 12-byte packet.
    ///
    /// Returns `None` if `cdb` is longer than 12 bytes (malformed at this
    /// boundary — a 16-byte CDB cannot be framed as a 12-byte packet).
    pub fn from_cdb(cdb: &[u8]) -> Option<Self> {
        if cdb.len() > ATAPI_PACKET_LEN {
            return None;
        }
        let mut bytes = [0u8; ATAPI_PACKET_LEN];
        bytes[..cdb.len()].copy_from_slice(cdb);
        Some(AtapiPacket { bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_cdb_is_zero_padded() {
        let p = AtapiPacket::from_cdb(&[0x00, 0x01, 0x02]).unwrap();
        assert_eq!(&p.bytes[0..3], &[0x00, 0x01, 0x02]);
        assert_eq!(&p.bytes[3..], &[0u8; 9]);
    }

    #[test]
    fn sixteen_byte_cdb_is_rejected() {
        assert!(AtapiPacket::from_cdb(&[0u8; 16]).is_none());
    }

    #[test]
    fn exact_twelve_bytes_fits() {
        let cdb = [0xAAu8; 12];
        let p = AtapiPacket::from_cdb(&cdb).unwrap();
        assert_eq!(p.bytes, cdb);
    }
}
