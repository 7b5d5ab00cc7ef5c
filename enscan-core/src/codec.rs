//! Decodes raw LE advertising reports into [`Packet`]s and serialises them
//! to/from the CSV line format.

use crate::{
    address::{Address, AddressType},
    error::{Error, ErrorKind, Result},
    packet::{EnGa, Packet, Payload, Timeval, EN_PREFIX},
};

/// One raw LE advertising report as delivered by the HCI collaborator.
pub struct RawReport<'a> {
    /// Sender address.
    pub bda: Address,
    /// Sender address type.
    pub bda_type: AddressType,
    /// Advertising data bytes (the `length`-prefixed AD structures), without the RSSI byte.
    pub payload: &'a [u8],
    /// RSSI byte, located one byte past the payload on the wire.
    pub rssi: i8,
    /// Reception time.
    pub recv_time: Timeval,
}

/// Decodes one raw advertising report into a [`Packet`].
///
/// Classifies by the first four payload bytes: `03 03 6F FD` marks a Complete
/// List of 16-bit Service UUIDs containing 0xFD6F, so the following 24 bytes
/// are parsed as an [`EnGa`] record. Anything else is retained verbatim as an
/// `OtherAdv` blob.
pub fn decode(report: &RawReport<'_>) -> Packet {
    let payload = classify(report.payload);
    Packet {
        recv_time: report.recv_time,
        bda: report.bda,
        bda_type: report.bda_type,
        rssi: report.rssi,
        payload,
        older: None,
        newer: None,
    }
}

fn classify(payload: &[u8]) -> Payload {
    if payload.len() >= 4 + EnGa::WIRE_LEN && payload[0..4] == EN_PREFIX {
        let record: [u8; EnGa::WIRE_LEN] = payload[4..4 + EnGa::WIRE_LEN].try_into().unwrap();
        Payload::EnGa(EnGa::decode(&record))
    } else {
        Payload::OtherAdv(payload.to_vec())
    }
}

/// Builds the flat byte buffer to hand to the HCI collaborator for transmission
/// of a synthetic EN beacon: the 4-byte service-UUID list followed by the
/// 24-byte `EnGa` record.
pub fn encode_beacon(en: &EnGa) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + EnGa::WIRE_LEN);
    out.extend_from_slice(&EN_PREFIX);
    out.extend_from_slice(&en.encode());
    out
}

/// Hex prefix that marks a CSV `hex_blob` as carrying an [`EnGa`] record.
const EN_GA_HEX_PREFIX: &str = "17166ffd";

/// Serialises one packet as a CSV line (without a trailing newline).
pub fn to_csv_line(pkt: &Packet) -> String {
    let hex_blob = match &pkt.payload {
        Payload::EnGa(en) => hex::encode(en.encode()),
        Payload::OtherAdv(bytes) => hex::encode(bytes),
    };
    format!("{},{},{},{},{}", pkt.recv_time.tv_sec, pkt.recv_time.tv_usec, pkt.bda, pkt.rssi, hex_blob)
}

/// Parses one CSV line (as produced by [`to_csv_line`]) back into a [`Packet`].
///
/// The address type of a CSV-loaded packet is always [`AddressType::Random`]:
/// the wire format does not carry it, and every address of interest to this
/// tool is a randomised one.
pub fn from_csv_line(line: &str) -> Result<Packet> {
    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() != 5 {
        return Err(Error::with_message(
            ErrorKind::Csv(format!("expected 5 fields, got {}", fields.len())),
            line.to_string(),
        ));
    }

    let tv_sec: i64 = fields[0]
        .parse()
        .map_err(|_| Error::with_message(ErrorKind::Csv("bad tv_sec".into()), fields[0].to_string()))?;
    let tv_usec: i64 = fields[1]
        .parse()
        .map_err(|_| Error::with_message(ErrorKind::Csv("bad tv_usec".into()), fields[1].to_string()))?;
    let bda: Address = fields[2]
        .parse()
        .map_err(|_| Error::with_message(ErrorKind::Csv("bad BDA".into()), fields[2].to_string()))?;
    let rssi: i8 = fields[3]
        .parse()
        .map_err(|_| Error::with_message(ErrorKind::Csv("bad rssi".into()), fields[3].to_string()))?;
    let hex_blob = fields[4].trim();
    let bytes = hex::decode(hex_blob)?;

    let payload = if hex_blob.len() >= 8 && hex_blob[..8].eq_ignore_ascii_case(EN_GA_HEX_PREFIX) {
        if bytes.len() != EnGa::WIRE_LEN {
            return Err(Error::with_message(
                ErrorKind::Csv(format!("EnGa blob must be {} bytes", EnGa::WIRE_LEN)),
                hex_blob.to_string(),
            ));
        }
        let record: [u8; EnGa::WIRE_LEN] = bytes.try_into().unwrap();
        Payload::EnGa(EnGa::decode(&record))
    } else {
        Payload::OtherAdv(bytes)
    };

    Ok(Packet {
        recv_time: Timeval { tv_sec, tv_usec },
        bda,
        bda_type: AddressType::Random,
        rssi,
        payload,
        older: None,
        newer: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(payload: &[u8], rssi: i8) -> RawReport<'_> {
        RawReport {
            bda: "AA:BB:CC:DD:EE:FF".parse().unwrap(),
            bda_type: AddressType::Random,
            payload,
            rssi,
            recv_time: Timeval::new(1_000, 0),
        }
    }

    #[test]
    fn s2_en_classification() {
        let mut payload = vec![0x03, 0x03, 0x6F, 0xFD, 0x17, 0x16, 0x6F, 0xFD];
        payload.extend_from_slice(&[0xAB; 16]);
        payload.extend_from_slice(&[0xCD; 4]);
        let pkt = decode(&report(&payload, -50i8));
        let en = pkt.en_ga().expect("EN_GA packet");
        assert_eq!(en.service_uuid, 0xFD6F);
        assert_eq!(pkt.rssi, -50);
    }

    #[test]
    fn s3_non_en_classification() {
        let payload = vec![0x02, 0x01, 0x06, 0x05, 0x09, b'h', b'i'];
        let pkt = decode(&report(&payload, -70));
        match &pkt.payload {
            Payload::OtherAdv(bytes) => assert_eq!(bytes, &payload),
            _ => panic!("expected OtherAdv"),
        }
    }

    #[test]
    fn csv_round_trips_en_ga() {
        let mut payload = vec![0x03, 0x03, 0x6F, 0xFD, 0x17, 0x16, 0x6F, 0xFD];
        payload.extend_from_slice(&[0x01; 16]);
        payload.extend_from_slice(&[0x02; 4]);
        let pkt = decode(&report(&payload, -60));
        let line = to_csv_line(&pkt);
        let parsed = from_csv_line(&line).unwrap();
        assert_eq!(parsed.bda, pkt.bda);
        assert_eq!(parsed.rssi, pkt.rssi);
        assert_eq!(parsed.payload, pkt.payload);
    }

    #[test]
    fn csv_round_trips_other_adv() {
        let payload = vec![0x02, 0x01, 0x06];
        let pkt = decode(&report(&payload, -80));
        let line = to_csv_line(&pkt);
        let parsed = from_csv_line(&line).unwrap();
        assert_eq!(parsed.payload, pkt.payload);
    }

    #[test]
    fn csv_rejects_wrong_field_count() {
        assert!(from_csv_line("1,2,3").is_err());
    }
}
