// src/cue.rs
//! Typed SCTE-35 splice_info_section.
//!
//! Length fields are stored so a decoded cue can be inspected, but they are
//! derived: `scte35::encode` rewrites them from the bytes it emits.

use serde::Serialize;

pub const TICKS_PER_SECOND: u64 = 90_000;
pub const PTS_MODULUS: u64 = 1 << 33;

/// "CUEI", the identifier every SCTE-35 descriptor carries.
pub const CUEI: u32 = 0x4355_4549;

pub const SPLICE_INSERT: u8 = 0x05;
pub const TIME_SIGNAL: u8 = 0x06;

pub const AVAIL_DESCRIPTOR_TAG: u8 = 0x00;
pub const SEGMENTATION_DESCRIPTOR_TAG: u8 = 0x02;

/// Reduces a tick count into the 33-bit PTS range.
pub fn wrap_pts(ticks: u64) -> u64 { ticks % PTS_MODULUS }

/// Seconds represented by a 33-bit PTS value (wrapped first).
pub fn pts_to_seconds(ticks: u64) -> f64 { wrap_pts(ticks) as f64 / TICKS_PER_SECOND as f64 }

/// Seconds represented by a duration tick count (no wraparound).
pub fn ticks_to_seconds(ticks: u64) -> f64 { ticks as f64 / TICKS_PER_SECOND as f64 }

pub fn seconds_to_ticks(seconds: f64) -> u64 { (seconds * TICKS_PER_SECOND as f64).round() as u64 }

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cue {
    pub info: InfoSection,
    pub command: SpliceCommand,
    pub descriptors: Vec<SpliceDescriptor>,
    pub crc32: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InfoSection {
    pub table_id: u8,
    pub section_syntax_indicator: bool,
    pub private_indicator: bool,
    pub sap_type: u8,
    pub section_length: u16,
    pub protocol_version: u8,
    pub encrypted_packet: bool,
    pub encryption_algorithm: u8,
    pub pts_adjustment: u64,
    pub cw_index: u8,
    pub tier: u16,
    pub splice_command_length: u16,
    pub splice_command_type: u8,
    pub descriptor_loop_length: u16,
}

impl Default for InfoSection {
    fn default() -> Self {
        Self {
            table_id: 0xFC,
            section_syntax_indicator: false,
            private_indicator: false,
            sap_type: 3,
            section_length: 0,
            protocol_version: 0,
            encrypted_packet: false,
            encryption_algorithm: 0,
            pts_adjustment: 0,
            cw_index: 0,
            tier: 0x0FFF,
            splice_command_length: 0,
            splice_command_type: TIME_SIGNAL,
            descriptor_loop_length: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum SpliceCommand {
    SpliceInsert(SpliceInsert),
    TimeSignal(SpliceTime),
    /// Any other command, kept as its raw bytes.
    Other { command_type: u8, data: Vec<u8> },
}

impl SpliceCommand {
    pub fn command_type(&self) -> u8 {
        match self {
            SpliceCommand::SpliceInsert(_) => SPLICE_INSERT,
            SpliceCommand::TimeSignal(_) => TIME_SIGNAL,
            SpliceCommand::Other { command_type, .. } => *command_type,
        }
    }

    pub fn name(&self) -> &'static str {
        match self.command_type() {
            0x00 => "splice_null",
            0x04 => "splice_schedule",
            SPLICE_INSERT => "splice_insert",
            TIME_SIGNAL => "time_signal",
            0x07 => "bandwidth_reservation",
            0xFF => "private_command",
            _ => "unknown",
        }
    }

    /// The time this command anchors, if any. For component splices the
    /// first component's time stands in for the program.
    pub fn splice_time(&self) -> Option<SpliceTime> {
        match self {
            SpliceCommand::TimeSignal(t) => Some(*t),
            SpliceCommand::SpliceInsert(si) if si.program_splice_flag => Some(si.splice_time),
            SpliceCommand::SpliceInsert(si) => si.components.first().map(|c| c.splice_time),
            SpliceCommand::Other { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SpliceTime {
    pub time_specified_flag: bool,
    pub pts_time: u64,
}

impl SpliceTime {
    pub fn at(pts_time: u64) -> Self { Self { time_specified_flag: true, pts_time: wrap_pts(pts_time) } }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpliceInsert {
    pub splice_event_id: u32,
    pub splice_event_cancel_indicator: bool,
    pub out_of_network_indicator: bool,
    pub program_splice_flag: bool,
    pub duration_flag: bool,
    pub splice_immediate_flag: bool,
    /// Program splice time; present on the wire only when
    /// `program_splice_flag && !splice_immediate_flag`.
    pub splice_time: SpliceTime,
    pub components: Vec<SpliceComponent>,
    pub break_auto_return: bool,
    /// Break duration in 90 kHz ticks (33 bits).
    pub break_duration: u64,
    pub unique_program_id: u16,
    pub avail_num: u8,
    pub avail_expected: u8,
}

impl Default for SpliceInsert {
    fn default() -> Self {
        Self {
            splice_event_id: 0,
            splice_event_cancel_indicator: false,
            out_of_network_indicator: false,
            program_splice_flag: true,
            duration_flag: false,
            splice_immediate_flag: false,
            splice_time: SpliceTime::default(),
            components: Vec::new(),
            break_auto_return: false,
            break_duration: 0,
            unique_program_id: 0,
            avail_num: 0,
            avail_expected: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpliceComponent {
    pub component_tag: u8,
    pub splice_time: SpliceTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SpliceDescriptor {
    Segmentation(SegmentationDescriptor),
    Avail(AvailDescriptor),
    /// Unmodelled descriptor: everything after the length byte.
    Other { tag: u8, data: Vec<u8> },
}

impl SpliceDescriptor {
    pub fn tag(&self) -> u8 {
        match self {
            SpliceDescriptor::Segmentation(d) => d.tag,
            SpliceDescriptor::Avail(_) => AVAIL_DESCRIPTOR_TAG,
            SpliceDescriptor::Other { tag, .. } => *tag,
        }
    }

    pub fn as_segmentation(&self) -> Option<&SegmentationDescriptor> {
        match self {
            SpliceDescriptor::Segmentation(d) => Some(d),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvailDescriptor {
    pub identifier: u32,
    pub provider_avail_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SegmentationDescriptor {
    pub tag: u8,
    pub descriptor_length: u8,
    pub identifier: u32,
    pub segmentation_event_id: u32,
    pub segmentation_event_cancel_indicator: bool,
    pub program_segmentation_flag: bool,
    pub segmentation_duration_flag: bool,
    pub delivery_not_restricted_flag: bool,
    pub web_delivery_allowed_flag: bool,
    pub no_regional_blackout_flag: bool,
    pub archive_allowed_flag: bool,
    pub device_restrictions: u8,
    pub components: Vec<SegmentationComponent>,
    /// Duration in 90 kHz ticks (40 bits).
    pub segmentation_duration: u64,
    pub segmentation_upid_type: u8,
    pub segmentation_upid: Vec<u8>,
    pub segmentation_type_id: u8,
    pub segment_num: u8,
    pub segments_expected: u8,
    pub sub_segment_num: Option<u8>,
    pub sub_segments_expected: Option<u8>,
}

impl SegmentationDescriptor {
    /// Type ids after which `sub_segment_num`/`sub_segments_expected` may follow.
    pub fn carries_sub_segments(type_id: u8) -> bool {
        matches!(type_id, 0x34 | 0x36 | 0x38 | 0x3A)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SegmentationComponent {
    pub component_tag: u8,
    pub pts_offset: u64,
}

impl Cue {
    pub fn segmentation_descriptors(&self) -> impl Iterator<Item = &SegmentationDescriptor> {
        self.descriptors.iter().filter_map(SpliceDescriptor::as_segmentation)
    }

    /// Ticks of the break announced by this cue: the splice_insert break
    /// duration, else the first segmentation duration.
    pub fn announced_break(&self) -> Option<u64> {
        if let SpliceCommand::SpliceInsert(si) = &self.command {
            if si.duration_flag {
                return Some(si.break_duration);
            }
        }
        self.segmentation_descriptors()
            .next()
            .and_then(|d| d.segmentation_duration_flag.then_some(d.segmentation_duration))
    }

    /// Seconds the announced break lasts, else `fallback`.
    pub fn break_duration_seconds(&self, fallback: f64) -> f64 {
        self.announced_break().map_or(fallback, ticks_to_seconds)
    }

    /// `pts_adjustment` in seconds, reduced modulo 2^33.
    pub fn pts_adjustment_seconds(&self) -> f64 { pts_to_seconds(self.info.pts_adjustment) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pts_wraps_modulo_33_bits() {
        let adjusted = (PTS_MODULUS - 1) + 2;
        assert_eq!(wrap_pts(adjusted), 1);
        assert_eq!(pts_to_seconds(adjusted), 1.0 / 90_000.0);
        assert_eq!(SpliceTime::at(PTS_MODULUS + 90_000).pts_time, 90_000);
    }

    #[test]
    fn seconds_and_ticks_convert_exactly_for_whole_seconds() {
        assert_eq!(seconds_to_ticks(30.0), 2_700_000);
        assert_eq!(ticks_to_seconds(2_700_000), 30.0);
        assert_eq!(seconds_to_ticks(0.5), 45_000);
    }

    #[test]
    fn break_duration_prefers_splice_insert_then_descriptor() {
        let mut cue = Cue {
            info: InfoSection::default(),
            command: SpliceCommand::TimeSignal(SpliceTime::at(900_000)),
            descriptors: vec![],
            crc32: 0,
        };
        assert_eq!(cue.break_duration_seconds(30.0), 30.0);
        assert_eq!(cue.announced_break(), None);

        cue.descriptors.push(SpliceDescriptor::Segmentation(SegmentationDescriptor {
            tag: SEGMENTATION_DESCRIPTOR_TAG,
            descriptor_length: 0,
            identifier: CUEI,
            segmentation_event_id: 1,
            segmentation_event_cancel_indicator: false,
            program_segmentation_flag: true,
            segmentation_duration_flag: true,
            delivery_not_restricted_flag: true,
            web_delivery_allowed_flag: false,
            no_regional_blackout_flag: false,
            archive_allowed_flag: false,
            device_restrictions: 0,
            components: vec![],
            segmentation_duration: 45 * TICKS_PER_SECOND,
            segmentation_upid_type: 0,
            segmentation_upid: vec![],
            segmentation_type_id: 0x34,
            segment_num: 0,
            segments_expected: 0,
            sub_segment_num: None,
            sub_segments_expected: None,
        }));
        assert_eq!(cue.break_duration_seconds(30.0), 45.0);

        cue.command = SpliceCommand::SpliceInsert(SpliceInsert {
            duration_flag: true,
            break_duration: 60 * TICKS_PER_SECOND,
            ..SpliceInsert::default()
        });
        assert_eq!(cue.break_duration_seconds(30.0), 60.0);
        assert_eq!(cue.announced_break(), Some(60 * TICKS_PER_SECOND));
    }
}
