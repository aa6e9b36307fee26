//! On-disk layout for split planes.
//!
//! A split image is written as a text header made of fixed-width 80-byte
//! cards in 512-byte blocks, the 8-bit base plane, then the side channels
//! in the order underflow, overflow1, overflow2.  Every side channel is
//! little-endian and zero-padded to a multiple of 16 bytes.
//!
//! The header reserves a block count up front.  When the serialized cards
//! outgrow that reservation the count is recomputed and the card that
//! mirrors it is patched in place before any pixel data is written.

use std::io::{self, Write};

use byteorder::{LittleEndian, ReadBytesExt};

use super::{OverflowError, SplitPlanes, Underflow};

pub const SIDE_CHANNEL_ALIGN: usize = 16;
pub const HEADER_BLOCK_SIZE:  usize = 512;
pub const CARD_SIZE:          usize = 80;
const KEY_WIDTH: usize = 7;

/// Zero-pad `buf` to the next multiple of 16 bytes.
pub fn pad16(buf: &mut Vec<u8>) {
    let rem = buf.len() % SIDE_CHANNEL_ALIGN;
    if rem != 0 {
        buf.resize(buf.len() + SIDE_CHANNEL_ALIGN - rem, 0);
    }
}

/// Number of values in each side channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelCounts {
    pub underflow: usize,
    pub overflow1: usize,
    pub overflow2: usize,
}

impl SplitPlanes {
    pub fn counts(&self) -> ChannelCounts {
        ChannelCounts {
            underflow: self.underflow.as_ref().map_or(0, Underflow::len),
            overflow1: self.overflow1.len(),
            overflow2: self.overflow2.len(),
        }
    }
}

/// Serialize the three side channels, each padded to 16 bytes.
pub fn pack_side_channels(planes: &SplitPlanes) -> Vec<u8> {
    let mut out = Vec::new();
    match &planes.underflow {
        Some(Underflow::I8(v))  => v.iter().for_each(|&x| out.push(x as u8)),
        Some(Underflow::I16(v)) => v.iter().for_each(|&x| out.extend_from_slice(&x.to_le_bytes())),
        Some(Underflow::I32(v)) => v.iter().for_each(|&x| out.extend_from_slice(&x.to_le_bytes())),
        None => {}
    }
    pad16(&mut out);
    for &x in &planes.overflow1 {
        out.extend_from_slice(&x.to_le_bytes());
    }
    pad16(&mut out);
    for &x in &planes.overflow2 {
        out.extend_from_slice(&x.to_le_bytes());
    }
    pad16(&mut out);
    out
}

fn padded_len(bytes: usize) -> usize {
    bytes.div_ceil(SIDE_CHANNEL_ALIGN) * SIDE_CHANNEL_ALIGN
}

/// Parse side channels written by [`pack_side_channels`].
///
/// `underflow_width` is `None` when the image carries no underflow table.
pub fn unpack_side_channels(
    data:            &[u8],
    counts:          ChannelCounts,
    underflow_width: Option<usize>,
) -> Result<(Option<Underflow>, Vec<u16>, Vec<i32>), OverflowError> {
    let uf_bytes = underflow_width.map_or(0, |w| w * counts.underflow);
    let o1_start = padded_len(uf_bytes);
    let o2_start = o1_start + padded_len(counts.overflow1 * 2);
    let needed   = o2_start + counts.overflow2 * 4;
    if data.len() < needed {
        return Err(OverflowError::Truncated { needed, available: data.len() });
    }

    let mut cur = &data[..uf_bytes];
    let underflow = match underflow_width {
        None => None,
        Some(1) => Some(Underflow::I8((0..counts.underflow).map(|_| cur.read_i8()).collect::<io::Result<_>>().map_err(truncated(needed, data.len()))?)),
        Some(2) => Some(Underflow::I16((0..counts.underflow).map(|_| cur.read_i16::<LittleEndian>()).collect::<io::Result<_>>().map_err(truncated(needed, data.len()))?)),
        Some(4) => Some(Underflow::I32((0..counts.underflow).map(|_| cur.read_i32::<LittleEndian>()).collect::<io::Result<_>>().map_err(truncated(needed, data.len()))?)),
        Some(w) => return Err(OverflowError::UnderflowWidth(w)),
    };

    let mut cur = &data[o1_start..];
    let overflow1 = (0..counts.overflow1)
        .map(|_| cur.read_u16::<LittleEndian>())
        .collect::<io::Result<Vec<_>>>()
        .map_err(truncated(needed, data.len()))?;

    let mut cur = &data[o2_start..];
    let overflow2 = (0..counts.overflow2)
        .map(|_| cur.read_i32::<LittleEndian>())
        .collect::<io::Result<Vec<_>>>()
        .map_err(truncated(needed, data.len()))?;

    Ok((underflow, overflow1, overflow2))
}

fn truncated(needed: usize, available: usize) -> impl Fn(io::Error) -> OverflowError {
    move |_| OverflowError::Truncated { needed, available }
}

// ── Header cards ─────────────────────────────────────────────────────────────

/// Format one 80-byte card: key left-justified in 7 columns, `:`, value.
/// Over-long cards are cut at the last character boundary within 80 bytes.
pub fn format_card(key: &str, value: &str) -> String {
    let mut card = format!("{:<width$}:{}", key, value, width = KEY_WIDTH);
    if card.len() > CARD_SIZE {
        let cut = (0..=CARD_SIZE).rev().find(|&i| card.is_char_boundary(i)).unwrap_or(0);
        card.truncate(cut);
    }
    let pad = CARD_SIZE - card.len();
    card.extend(std::iter::repeat(' ').take(pad));
    card
}

/// Parse cards back into `(key, value)` pairs, trimming padding.
pub fn parse_cards(text: &[u8]) -> Vec<(String, String)> {
    text.chunks(CARD_SIZE)
        .filter_map(|card| {
            let card = std::str::from_utf8(card).ok()?;
            let (key, value) = card.split_once(':')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Tracks the header block reservation of a split image.
#[derive(Debug, Clone)]
pub struct HeaderBlocks {
    pub reserved:  usize,
    /// Key of the card mirroring the block count (e.g. `HDRBLKS`).
    pub count_key: String,
}

impl HeaderBlocks {
    pub fn new(reserved: usize, count_key: impl Into<String>) -> Self {
        Self { reserved, count_key: count_key.into() }
    }

    /// Blocks needed for `cards` header cards.
    pub fn required(cards: usize) -> usize {
        (cards * CARD_SIZE).div_ceil(HEADER_BLOCK_SIZE).max(1)
    }

    /// Serialize `cards` into whole header blocks.
    ///
    /// Inserts the count card if missing.  When the header no longer fits in
    /// the reservation, `reserved` grows and the count card is rewritten in
    /// place (its position and width do not change).
    pub fn layout(&mut self, cards: &mut Vec<(String, String)>) -> Vec<u8> {
        if !cards.iter().any(|(k, _)| *k == self.count_key) {
            cards.insert(0, (self.count_key.clone(), self.reserved.to_string()));
        }
        let required = Self::required(cards.len());
        if required > self.reserved {
            tracing::debug!(
                "header needs {required} blocks, {} reserved; patching {}",
                self.reserved, self.count_key
            );
            self.reserved = required;
        }
        for (key, value) in cards.iter_mut() {
            if *key == self.count_key {
                *value = self.reserved.to_string();
            }
        }

        let mut text = Vec::with_capacity(self.reserved * HEADER_BLOCK_SIZE);
        for (key, value) in cards.iter() {
            text.extend_from_slice(format_card(key, value).as_bytes());
        }
        text.resize(self.reserved * HEADER_BLOCK_SIZE, b' ');
        text
    }
}

/// Write header blocks, base plane and padded side channels.
///
/// Returns the number of header blocks actually used.
pub fn write_split_image<W: Write>(
    mut writer: W,
    blocks:     &mut HeaderBlocks,
    cards:      &mut Vec<(String, String)>,
    planes:     &SplitPlanes,
) -> io::Result<usize> {
    let header = blocks.layout(cards);
    writer.write_all(&header)?;
    writer.write_all(&planes.base)?;
    writer.write_all(&pack_side_channels(planes))?;
    Ok(blocks.reserved)
}
