//! The per-device packet arena and Stream Store (C4: admission).

use crate::{
    error::{Error, ErrorKind, Result},
    packet::{Packet, PacketId, PacketKind, Payload, Timeval},
};

/// Default bound on the number of Streams a [`StreamStore`] will hold.
///
/// The reference caps a predecessor design's packet buffer at
/// `BLE_PKTS_BUF_MAX = 4096`; this implementation applies the same figure to
/// the number of Streams, since the Stream Store itself had no documented
/// bound (see the design notes on unbounded growth).
pub const DEFAULT_MAX_STREAMS: usize = 4096;

/// A chronological chain of packets believed to originate from one physical device.
#[derive(Clone, Debug, Default)]
pub struct Stream {
    /// Earliest packet in the chain.
    pub head: Option<PacketId>,
    /// Most recent packet in the chain (the chain's tail).
    pub latest: Option<PacketId>,
    /// Packet count, maintained by [`crate::metrics`].
    pub pkts: u64,
    /// Sum of inter-arrival gaps in microseconds, maintained by [`crate::metrics`].
    pub pkt_gap_usum: u64,
    /// Time of the most recent RPA rotation observed while RPI/AEM stayed constant.
    pub rpa_last_change: Option<Timeval>,
    /// Best estimate of the RPA rotation period, set during merges.
    pub rpa_interval_us: Option<i64>,
}

impl Stream {
    /// A Stream with no packets is a free slot that may be reused.
    pub fn is_free(&self) -> bool {
        self.pkts == 0 && self.latest.is_none()
    }

    /// Resets a Stream to the free-slot state (used when it has been merged away).
    fn clear(&mut self) {
        *self = Stream::default();
    }
}

/// Owning arena of [`Packet`]s plus the collection of [`Stream`]s that
/// reference them by [`PacketId`].
#[derive(Clone, Debug, Default)]
pub struct StreamStore {
    packets: Vec<Packet>,
    streams: Vec<Stream>,
    max_streams: usize,
}

impl StreamStore {
    /// A new, empty Store bounded at [`DEFAULT_MAX_STREAMS`] streams.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_STREAMS)
    }

    /// A new, empty Store bounded at `max_streams` streams.
    pub fn with_capacity(max_streams: usize) -> Self {
        Self { packets: Vec::new(), streams: Vec::new(), max_streams }
    }

    /// Discards all packets and streams, as done before starting a new capture.
    pub fn clear(&mut self) {
        self.packets.clear();
        self.streams.clear();
    }

    /// Number of Streams currently tracked (including free slots).
    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    /// Borrows a Stream by its positional index.
    pub fn stream(&self, idx: usize) -> &Stream {
        &self.streams[idx]
    }

    /// Iterates all Streams with their positional index, in Store order.
    pub fn streams(&self) -> impl Iterator<Item = (usize, &Stream)> {
        self.streams.iter().enumerate()
    }

    /// Borrows a packet by id.
    pub fn packet(&self, id: PacketId) -> &Packet {
        &self.packets[id.0 as usize]
    }

    pub(crate) fn packet_mut(&mut self, id: PacketId) -> &mut Packet {
        &mut self.packets[id.0 as usize]
    }

    /// Admits one decoded packet: routes it to an existing Stream by matching
    /// BDA or, for EN_GA packets, matching RPI+AEM (an RPA rotation), or
    /// starts a new Stream.
    ///
    /// See §4.C4: walks Streams remembering the first free slot, matches on
    /// `latest.bda == packet.bda` or (`EN_GA` identity match), reuses a free
    /// slot or appends a new Stream on miss, then links the packet as the new
    /// tail.
    pub fn admit(&mut self, packet: Packet) -> Result<()> {
        let mut free_slot: Option<usize> = None;
        let mut matched: Option<usize> = None;

        for (idx, stream) in self.streams.iter().enumerate() {
            let Some(latest_id) = stream.latest else {
                if free_slot.is_none() {
                    free_slot = Some(idx);
                }
                continue;
            };
            let latest = self.packet(latest_id);

            if latest.bda == packet.bda {
                matched = Some(idx);
                break;
            }

            if let (PacketKind::EnGa, Payload::EnGa(latest_en)) = (latest.kind(), &latest.payload) {
                if let Payload::EnGa(new_en) = &packet.payload {
                    if latest_en.rpi == new_en.rpi && latest_en.aem == new_en.aem {
                        matched = Some(idx);
                        break;
                    }
                }
            }
        }

        let stream_idx = match matched {
            Some(idx) => idx,
            None => match free_slot {
                Some(idx) => idx,
                None => {
                    if self.streams.len() >= self.max_streams {
                        return Err(Error::new(ErrorKind::CapacityExceeded(self.max_streams)));
                    }
                    self.streams.push(Stream::default());
                    self.streams.len() - 1
                }
            },
        };

        let rpa_rotation = matched.is_some()
            && self.streams[stream_idx].latest.is_some_and(|latest_id| self.packet(latest_id).bda != packet.bda);

        let recv_time = packet.recv_time;
        let new_id = PacketId(self.packets.len() as u32);
        let old_latest = self.streams[stream_idx].latest;

        let mut packet = packet;
        packet.older = old_latest;
        packet.newer = None;
        self.packets.push(packet);

        if let Some(old_latest) = old_latest {
            self.packet_mut(old_latest).newer = Some(new_id);
        }

        let stream = &mut self.streams[stream_idx];
        stream.latest = Some(new_id);
        if stream.head.is_none() {
            stream.head = Some(new_id);
        }
        if rpa_rotation {
            stream.rpa_last_change = Some(recv_time);
        }

        Ok(())
    }

    /// Walks a Stream's chain from `head` to `latest`, in chronological order.
    pub fn walk_chronological(&self, stream: &Stream) -> impl Iterator<Item = PacketId> + '_ {
        let mut cur = stream.head;
        std::iter::from_fn(move || {
            let id = cur?;
            cur = self.packet(id).newer;
            Some(id)
        })
    }

    /// Total number of packets physically linked into `stream`'s chain.
    ///
    /// Distinct from [`Stream::pkts`], which (per the reference) counts only
    /// qualifying inter-arrival gaps, not chain nodes.
    pub fn chain_len(&self, stream: &Stream) -> usize {
        self.walk_chronological(stream).count()
    }

    /// Walks a Stream's chain from `latest` to `head`, reverse chronological order.
    pub fn walk_reverse(&self, stream: &Stream) -> impl Iterator<Item = PacketId> + '_ {
        let mut cur = stream.latest;
        std::iter::from_fn(move || {
            let id = cur?;
            cur = self.packet(id).older;
            Some(id)
        })
    }

    /// Zeroes out the Stream at `idx` so its slot becomes a reusable free slot.
    ///
    /// Used by the tracker after splicing a Stream's content into another.
    pub(crate) fn free_stream(&mut self, idx: usize) {
        self.streams[idx].clear();
    }

    /// Mutable access to a Stream by index, for the tracker and metrics passes.
    pub(crate) fn stream_mut(&mut self, idx: usize) -> &mut Stream {
        &mut self.streams[idx]
    }
}
