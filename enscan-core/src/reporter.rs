//! Human-facing enumeration of distinct EN identities seen per Stream (C7).

use crate::{
    address::{Address, AddressType},
    packet::PacketKind,
    stream::StreamStore,
};

/// One reported sighting: a Stream changed EN identity (RPI, AEM, or BDA)
/// from the last EN_GA packet reported for that Stream.
#[derive(Clone, Debug, PartialEq)]
pub struct Sighting {
    /// Positional index of the owning Stream.
    pub stream_idx: usize,
    /// Sender address at the time of this identity.
    pub bda: Address,
    /// Sender address type.
    pub bda_type: AddressType,
    /// Rolling Proximity Identifier.
    pub rpi: [u8; 16],
    /// Associated Encrypted Metadata.
    pub aem: [u8; 4],
    /// RSSI of the packet that introduced this identity.
    pub rssi: i8,
}

/// Walks every Stream from `latest` back to `head`, considering only EN_GA
/// packets, and emits one [`Sighting`] each time the RPI, AEM, or BDA differs
/// from the last EN_GA packet seen in that Stream (mirroring the reference's
/// "print only not seen data" loop: a Stream's chain is read newest-first, so
/// sightings come out in reverse chronological order within a Stream, and
/// Streams are visited in Store order).
pub fn sightings(store: &StreamStore) -> Vec<Sighting> {
    let mut out = Vec::new();

    for (stream_idx, stream) in store.streams() {
        let mut seen: Option<(&[u8; 16], &[u8; 4], Address)> = None;

        for id in store.walk_reverse(stream) {
            let pkt = store.packet(id);
            if pkt.kind() != PacketKind::EnGa {
                continue;
            }
            let en = pkt.en_ga().expect("EnGa kind implies en_ga()");

            let changed = match seen {
                None => true,
                Some((rpi, aem, bda)) => rpi != &en.rpi || aem != &en.aem || bda != pkt.bda,
            };

            if changed {
                seen = Some((&en.rpi, &en.aem, pkt.bda));
                out.push(Sighting {
                    stream_idx,
                    bda: pkt.bda,
                    bda_type: pkt.bda_type,
                    rpi: en.rpi,
                    aem: en.aem,
                    rssi: pkt.rssi,
                });
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{EnGa, Packet, Payload, Timeval};

    fn push(store: &mut StreamStore, rpi: u8, aem: u8, sec: i64) {
        let pkt = Packet {
            recv_time: Timeval::new(sec, 0),
            bda: "AA:AA:AA:AA:AA:AA".parse().unwrap(),
            bda_type: AddressType::Random,
            rssi: -55,
            payload: Payload::EnGa(EnGa::new([rpi; 16], [aem; 4])),
            older: None,
            newer: None,
        };
        store.admit(pkt).unwrap();
    }

    #[test]
    fn repeated_identity_is_reported_once() {
        let mut store = StreamStore::new();
        push(&mut store, 1, 1, 0);
        push(&mut store, 1, 1, 1);
        push(&mut store, 1, 1, 2);
        assert_eq!(sightings(&store).len(), 1);
    }

    #[test]
    fn identity_change_adds_a_sighting() {
        let mut store = StreamStore::new();
        push(&mut store, 1, 1, 0);
        push(&mut store, 2, 2, 1);
        let s = sightings(&store);
        assert_eq!(s.len(), 2);
        assert_eq!(s[0].rpi, [2; 16]);
        assert_eq!(s[1].rpi, [1; 16]);
    }

    #[test]
    fn other_adv_packets_are_ignored() {
        let mut store = StreamStore::new();
        push(&mut store, 1, 1, 0);
        let other = Packet {
            recv_time: Timeval::new(1, 0),
            bda: "AA:AA:AA:AA:AA:AA".parse().unwrap(),
            bda_type: AddressType::Random,
            rssi: -55,
            payload: Payload::OtherAdv(vec![0x02, 0x01, 0x06]),
            older: None,
            newer: None,
        };
        store.admit(other).unwrap();
        assert_eq!(sightings(&store).len(), 1);
    }
}
