//! Captured advertisement packets and the Exposure Notification wire record.

use crate::address::{Address, AddressType};

/// Service UUID advertised by Google/Apple Exposure Notification beacons.
pub const EN_SERVICE_UUID: u16 = 0xFD6F;

/// The four bytes that precede an `EnGa` record in a raw advertising payload:
/// a Complete List of 16-bit Service UUIDs AD structure containing 0xFD6F.
pub const EN_PREFIX: [u8; 4] = [0x03, 0x03, 0x6F, 0xFD];

/// Stable index of a [`Packet`] within a [`crate::stream::StreamStore`]'s arena.
///
/// Replaces the reference implementation's raw `older`/`newer` pointers with
/// an index into a single owning `Vec`, so chains can be spliced by integer
/// assignment instead of pointer surgery.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct PacketId(pub u32);

/// The Apple/Google Exposure-Notification service data record.
///
/// Byte-exact on the wire: `length=0x17, ad_type=0x16, service_uuid (LE),
/// rpi[16], aem[4]`, 24 bytes total, no padding.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct EnGa {
    /// Always `0x17` on the wire (23 bytes follow).
    pub length: u8,
    /// Always `0x16` (Service Data - 16-bit UUID).
    pub ad_type: u8,
    /// Service UUID, decoded to host order. Must equal [`EN_SERVICE_UUID`].
    pub service_uuid: u16,
    /// Rolling Proximity Identifier.
    pub rpi: [u8; 16],
    /// Associated Encrypted Metadata.
    pub aem: [u8; 4],
}

impl EnGa {
    /// Size of the record on the wire.
    pub const WIRE_LEN: usize = 24;

    /// Decodes a 24-byte wire record, byteswapping `service_uuid` from little-endian.
    ///
    /// Does not check the prefix bytes; callers classify first via [`EN_PREFIX`].
    pub fn decode(bytes: &[u8; Self::WIRE_LEN]) -> Self {
        Self {
            length: bytes[0],
            ad_type: bytes[1],
            service_uuid: u16::from_le_bytes([bytes[2], bytes[3]]),
            rpi: bytes[4..20].try_into().unwrap(),
            aem: bytes[20..24].try_into().unwrap(),
        }
    }

    /// Encodes back to the 24-byte wire layout.
    pub fn encode(&self) -> [u8; Self::WIRE_LEN] {
        let mut out = [0u8; Self::WIRE_LEN];
        out[0] = self.length;
        out[1] = self.ad_type;
        out[2..4].copy_from_slice(&self.service_uuid.to_le_bytes());
        out[4..20].copy_from_slice(&self.rpi);
        out[20..24].copy_from_slice(&self.aem);
        out
    }

    /// Builds a record with the canonical header bytes and operator-chosen identifiers.
    pub fn new(rpi: [u8; 16], aem: [u8; 4]) -> Self {
        Self { length: 0x17, ad_type: 0x16, service_uuid: EN_SERVICE_UUID, rpi, aem }
    }
}

/// Discriminates a [`Packet`]'s payload.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PacketKind {
    /// An Exposure Notification service-data advertisement.
    EnGa,
    /// Any other advertising report; carried verbatim.
    OtherAdv,
}

/// A packet's payload, discriminated by [`PacketKind`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Payload {
    /// Decoded EN service data.
    EnGa(EnGa),
    /// Opaque advertising-info bytes (header plus data), preserved verbatim.
    OtherAdv(Vec<u8>),
}

/// Wall-clock instant with microsecond resolution, matching `struct timeval`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Timeval {
    /// Seconds since the Unix epoch.
    pub tv_sec: i64,
    /// Microseconds, always in `0..1_000_000`.
    pub tv_usec: i64,
}

impl Timeval {
    /// Builds a Timeval, normalising an out-of-range `tv_usec`.
    pub fn new(tv_sec: i64, tv_usec: i64) -> Self {
        let extra_sec = tv_usec.div_euclid(1_000_000);
        let usec = tv_usec.rem_euclid(1_000_000);
        Self { tv_sec: tv_sec + extra_sec, tv_usec: usec }
    }

    /// Difference `self - other` in whole microseconds. May be negative.
    pub fn diff_usec(&self, other: &Timeval) -> i64 {
        (self.tv_sec - other.tv_sec) * 1_000_000 + (self.tv_usec - other.tv_usec)
    }

    /// Difference `self.tv_sec - other.tv_sec`, ignoring the microsecond component.
    pub fn diff_sec(&self, other: &Timeval) -> i64 {
        self.tv_sec - other.tv_sec
    }
}

/// One captured (or synthetically replayed) advertisement.
#[derive(Clone, Debug, PartialEq)]
pub struct Packet {
    /// Reception time.
    pub recv_time: Timeval,
    /// Sender address.
    pub bda: Address,
    /// Sender address type.
    pub bda_type: AddressType,
    /// Received signal strength, in dBm.
    pub rssi: i8,
    /// Payload, tagged by kind.
    pub payload: Payload,
    /// Earlier packet in the owning Stream's chain, if any.
    pub older: Option<PacketId>,
    /// Later packet in the owning Stream's chain, if any.
    pub newer: Option<PacketId>,
}

impl Packet {
    /// This packet's [`PacketKind`].
    pub fn kind(&self) -> PacketKind {
        match &self.payload {
            Payload::EnGa(_) => PacketKind::EnGa,
            Payload::OtherAdv(_) => PacketKind::OtherAdv,
        }
    }

    /// The decoded EN record, if this is an `EN_GA` packet.
    pub fn en_ga(&self) -> Option<&EnGa> {
        match &self.payload {
            Payload::EnGa(en) => Some(en),
            Payload::OtherAdv(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn en_ga_round_trips() {
        let en = EnGa::new([0x11; 16], [0x22; 4]);
        let bytes = en.encode();
        assert_eq!(bytes.len(), EnGa::WIRE_LEN);
        assert_eq!(EnGa::decode(&bytes), en);
    }

    #[test]
    fn timeval_normalises_overflowing_usec() {
        let t = Timeval::new(10, 1_500_000);
        assert_eq!(t, Timeval { tv_sec: 11, tv_usec: 500_000 });
    }

    #[test]
    fn timeval_diff_usec() {
        let a = Timeval::new(10, 0);
        let b = Timeval::new(10, 250_000);
        assert_eq!(b.diff_usec(&a), 250_000);
        assert_eq!(a.diff_usec(&b), -250_000);
    }
}
