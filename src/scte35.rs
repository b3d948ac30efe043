// src/scte35.rs
//! SCTE-35 splice_info_section codec.
//!
//! `decode` turns section bytes into a [`Cue`]; `encode` writes a cue back
//! out, recomputing section_length, splice_command_length,
//! descriptor_loop_length, every descriptor_length and the CRC-32/MPEG-2.
//!
//! Not retained across a decode/encode cycle: reserved bits (written as
//! ones), segmentation_event_id_compliance_indicator (written as one),
//! alignment stuffing, and bytes trailing the parsed fields of a
//! segmentation descriptor.

use crc::{Crc, CRC_32_MPEG_2};
use tracing::{debug, warn};

use crate::bitstream::{BitReader, BitWriter};
use crate::cue::*;
use crate::error::CodecError;

/// ISO/IEC 13818-1 CRC32 (poly 0x04C11DB7, init 0xFFFFFFFF, no final xor).
pub const MPEG_2: Crc<u32> = Crc::<u32>::new(&CRC_32_MPEG_2);

const MAX_SECTION_LENGTH: usize = 4093;
const UNSPECIFIED_COMMAND_LENGTH: u16 = 0xFFF;
/// protocol_version through splice_command_type.
const FIXED_HEADER_BYTES: usize = 11;
const CRC_BYTES: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub cue: Cue,
    /// False when the trailing CRC disagrees with the section bytes.
    pub crc_valid: bool,
}

pub fn crc32(data: &[u8]) -> u32 { MPEG_2.checksum(data) }

pub fn decode(bytes: &[u8]) -> Result<Decoded, CodecError> {
    if bytes.len() < 3 {
        return Err(CodecError::malformed(format!("{} bytes is shorter than the section header", bytes.len())));
    }
    let mut br = BitReader::new(bytes);
    let table_id = br.read_u8(8)?;
    if table_id != 0xFC {
        return Err(CodecError::malformed(format!("table_id 0x{table_id:02X}, expected 0xFC")));
    }
    let section_syntax_indicator = br.read_flag()?;
    let private_indicator = br.read_flag()?;
    let sap_type = br.read_u8(2)?;
    let section_length = br.read_u16(12)?;

    let total = 3 + section_length as usize;
    if total > bytes.len() {
        return Err(CodecError::malformed(format!(
            "section_length {section_length} exceeds the {} bytes available", bytes.len() - 3
        )));
    }
    if (section_length as usize) < FIXED_HEADER_BYTES + 2 + CRC_BYTES {
        return Err(CodecError::malformed(format!("section_length {section_length} is too short")));
    }
    if total < bytes.len() {
        debug!("decode: ignoring {} bytes after the section", bytes.len() - total);
    }

    let body = &bytes[..total - CRC_BYTES];
    let stored_crc = u32::from_be_bytes([bytes[total - 4], bytes[total - 3], bytes[total - 2], bytes[total - 1]]);
    let computed_crc = crc32(body);
    let crc_valid = stored_crc == computed_crc;
    if !crc_valid {
        warn!("decode: CRC mismatch (stored 0x{stored_crc:08X}, computed 0x{computed_crc:08X})");
    }

    let mut br = BitReader::new(body);
    br.skip_bits(24)?;
    let protocol_version = br.read_u8(8)?;
    let encrypted_packet = br.read_flag()?;
    let encryption_algorithm = br.read_u8(6)?;
    if encrypted_packet {
        return Err(CodecError::malformed("encrypted cues are not supported"));
    }
    let pts_adjustment = br.read_bits(33)?;
    let cw_index = br.read_u8(8)?;
    let tier = br.read_u16(12)?;
    let splice_command_length = br.read_u16(12)?;
    let splice_command_type = br.read_u8(8)?;

    debug!(
        "decode: section_length={section_length}, splice_command_length={splice_command_length}, splice_command_type=0x{splice_command_type:02X}"
    );

    let command_start = br.position();
    let command = match splice_command_type {
        SPLICE_INSERT => SpliceCommand::SpliceInsert(read_splice_insert(&mut br)?),
        TIME_SIGNAL => SpliceCommand::TimeSignal(read_splice_time(&mut br)?),
        other => {
            if splice_command_length == UNSPECIFIED_COMMAND_LENGTH {
                return Err(CodecError::malformed(format!(
                    "command 0x{other:02X} has an unspecified length"
                )));
            }
            SpliceCommand::Other { command_type: other, data: br.read_bytes(splice_command_length as usize)? }
        }
    };
    let parsed_command_bytes = (br.position() - command_start) / 8;
    if splice_command_length != UNSPECIFIED_COMMAND_LENGTH && parsed_command_bytes != splice_command_length as usize {
        return Err(CodecError::malformed(format!(
            "splice_command_length {splice_command_length} but {} parsed bytes", parsed_command_bytes
        )));
    }

    let descriptor_loop_length = br.read_u16(16)?;
    if descriptor_loop_length as usize * 8 > br.remaining() {
        return Err(CodecError::malformed(format!(
            "descriptor_loop_length {descriptor_loop_length} exceeds the section"
        )));
    }
    let loop_bytes = br.read_bytes(descriptor_loop_length as usize)?;
    let descriptors = read_descriptors(&loop_bytes)?;

    if br.remaining() > 0 {
        debug!("decode: skipping {} bits of alignment stuffing", br.remaining());
    }

    let info = InfoSection {
        table_id,
        section_syntax_indicator,
        private_indicator,
        sap_type,
        section_length,
        protocol_version,
        encrypted_packet,
        encryption_algorithm,
        pts_adjustment,
        cw_index,
        tier,
        splice_command_length,
        splice_command_type,
        descriptor_loop_length,
    };
    Ok(Decoded { cue: Cue { info, command, descriptors, crc32: stored_crc }, crc_valid })
}

fn read_splice_time(br: &mut BitReader) -> Result<SpliceTime, CodecError> {
    let time_specified_flag = br.read_flag()?;
    if time_specified_flag {
        br.skip_bits(6)?;
        Ok(SpliceTime { time_specified_flag, pts_time: br.read_bits(33)? })
    } else {
        br.skip_bits(7)?;
        Ok(SpliceTime::default())
    }
}

fn read_splice_insert(br: &mut BitReader) -> Result<SpliceInsert, CodecError> {
    let splice_event_id = br.read_u32(32)?;
    let splice_event_cancel_indicator = br.read_flag()?;
    br.skip_bits(7)?;
    if splice_event_cancel_indicator {
        return Ok(SpliceInsert { splice_event_id, splice_event_cancel_indicator, ..SpliceInsert::default() });
    }

    let out_of_network_indicator = br.read_flag()?;
    let program_splice_flag = br.read_flag()?;
    let duration_flag = br.read_flag()?;
    let splice_immediate_flag = br.read_flag()?;
    br.skip_bits(4)?;

    let mut splice_time = SpliceTime::default();
    let mut components = Vec::new();
    if program_splice_flag && !splice_immediate_flag {
        splice_time = read_splice_time(br)?;
    } else if !program_splice_flag {
        let count = br.read_u8(8)?;
        for _ in 0..count {
            let component_tag = br.read_u8(8)?;
            let splice_time = if splice_immediate_flag { SpliceTime::default() } else { read_splice_time(br)? };
            components.push(SpliceComponent { component_tag, splice_time });
        }
    }

    let (mut break_auto_return, mut break_duration) = (false, 0);
    if duration_flag {
        break_auto_return = br.read_flag()?;
        br.skip_bits(6)?;
        break_duration = br.read_bits(33)?;
    }

    Ok(SpliceInsert {
        splice_event_id,
        splice_event_cancel_indicator,
        out_of_network_indicator,
        program_splice_flag,
        duration_flag,
        splice_immediate_flag,
        splice_time,
        components,
        break_auto_return,
        break_duration,
        unique_program_id: br.read_u16(16)?,
        avail_num: br.read_u8(8)?,
        avail_expected: br.read_u8(8)?,
    })
}

fn read_descriptors(data: &[u8]) -> Result<Vec<SpliceDescriptor>, CodecError> {
    let mut out = Vec::new();
    let mut pos = 0;
    while pos < data.len() {
        if data.len() - pos < 2 {
            return Err(CodecError::malformed("descriptor loop ends inside a descriptor header"));
        }
        let tag = data[pos];
        let len = data[pos + 1] as usize;
        let body_start = pos + 2;
        if body_start + len > data.len() {
            return Err(CodecError::malformed(format!(
                "descriptor 0x{tag:02X} length {len} overruns the descriptor loop"
            )));
        }
        let body = &data[body_start..body_start + len];
        let identifier = (body.len() >= 4).then(|| u32::from_be_bytes([body[0], body[1], body[2], body[3]]));

        let descriptor = match (tag, identifier) {
            (SEGMENTATION_DESCRIPTOR_TAG, Some(CUEI)) => SpliceDescriptor::Segmentation(read_segmentation(tag, body)?),
            (AVAIL_DESCRIPTOR_TAG, Some(identifier)) if body.len() >= 8 => SpliceDescriptor::Avail(AvailDescriptor {
                identifier,
                provider_avail_id: u32::from_be_bytes([body[4], body[5], body[6], body[7]]),
            }),
            _ => {
                debug!("decode: keeping descriptor tag=0x{tag:02X} length={len} opaque");
                SpliceDescriptor::Other { tag, data: body.to_vec() }
            }
        };
        out.push(descriptor);
        pos = body_start + len;
    }
    Ok(out)
}

fn read_segmentation(tag: u8, body: &[u8]) -> Result<SegmentationDescriptor, CodecError> {
    let mut br = BitReader::new(body);
    let mut d = SegmentationDescriptor {
        tag,
        descriptor_length: body.len() as u8,
        identifier: br.read_u32(32)?,
        segmentation_event_id: br.read_u32(32)?,
        segmentation_event_cancel_indicator: br.read_flag()?,
        program_segmentation_flag: false,
        segmentation_duration_flag: false,
        delivery_not_restricted_flag: false,
        web_delivery_allowed_flag: false,
        no_regional_blackout_flag: false,
        archive_allowed_flag: false,
        device_restrictions: 0,
        components: Vec::new(),
        segmentation_duration: 0,
        segmentation_upid_type: 0,
        segmentation_upid: Vec::new(),
        segmentation_type_id: 0,
        segment_num: 0,
        segments_expected: 0,
        sub_segment_num: None,
        sub_segments_expected: None,
    };
    br.skip_bits(7)?;
    if d.segmentation_event_cancel_indicator {
        return Ok(d);
    }

    d.program_segmentation_flag = br.read_flag()?;
    d.segmentation_duration_flag = br.read_flag()?;
    d.delivery_not_restricted_flag = br.read_flag()?;
    if d.delivery_not_restricted_flag {
        br.skip_bits(5)?;
    } else {
        d.web_delivery_allowed_flag = br.read_flag()?;
        d.no_regional_blackout_flag = br.read_flag()?;
        d.archive_allowed_flag = br.read_flag()?;
        d.device_restrictions = br.read_u8(2)?;
    }
    if !d.program_segmentation_flag {
        let count = br.read_u8(8)?;
        for _ in 0..count {
            let component_tag = br.read_u8(8)?;
            br.skip_bits(7)?;
            d.components.push(SegmentationComponent { component_tag, pts_offset: br.read_bits(33)? });
        }
    }
    if d.segmentation_duration_flag {
        d.segmentation_duration = br.read_bits(40)?;
    }
    d.segmentation_upid_type = br.read_u8(8)?;
    let upid_len = br.read_u8(8)? as usize;
    d.segmentation_upid = br.read_bytes(upid_len)?;
    d.segmentation_type_id = br.read_u8(8)?;
    d.segment_num = br.read_u8(8)?;
    d.segments_expected = br.read_u8(8)?;
    if SegmentationDescriptor::carries_sub_segments(d.segmentation_type_id) && br.remaining() >= 16 {
        d.sub_segment_num = Some(br.read_u8(8)?);
        d.sub_segments_expected = Some(br.read_u8(8)?);
    }
    if br.remaining() > 0 {
        debug!("decode: segmentation descriptor has {} unparsed bits", br.remaining());
    }
    Ok(d)
}

/// Serializes `cue`, writing every derived length and the CRC back into it.
pub fn encode(cue: &mut Cue) -> Result<Vec<u8>, CodecError> {
    if cue.info.encrypted_packet {
        return Err(CodecError::encode("encrypted cues are not supported"));
    }

    let command = write_command(&cue.command)?;

    let mut loop_bytes = Vec::new();
    for d in cue.descriptors.iter_mut() {
        let tag = d.tag();
        let body = write_descriptor_body(d)?;
        if body.len() > u8::MAX as usize {
            return Err(CodecError::encode(format!("descriptor 0x{tag:02X} body is {} bytes", body.len())));
        }
        if let SpliceDescriptor::Segmentation(seg) = &mut *d {
            seg.descriptor_length = body.len() as u8;
        }
        loop_bytes.push(tag);
        loop_bytes.push(body.len() as u8);
        loop_bytes.extend_from_slice(&body);
    }

    let section_length = FIXED_HEADER_BYTES + command.len() + 2 + loop_bytes.len() + CRC_BYTES;
    if section_length > MAX_SECTION_LENGTH {
        return Err(CodecError::encode(format!("section_length {section_length} exceeds {MAX_SECTION_LENGTH}")));
    }

    let info = &cue.info;
    let command_type = cue.command.command_type();
    let mut w = BitWriter::new();
    put(&mut w, info.table_id as u64, 8, "table_id")?;
    w.write_flag(info.section_syntax_indicator);
    w.write_flag(info.private_indicator);
    put(&mut w, info.sap_type as u64, 2, "sap_type")?;
    put(&mut w, section_length as u64, 12, "section_length")?;
    put(&mut w, info.protocol_version as u64, 8, "protocol_version")?;
    w.write_flag(false);
    put(&mut w, info.encryption_algorithm as u64, 6, "encryption_algorithm")?;
    put(&mut w, info.pts_adjustment, 33, "pts_adjustment")?;
    put(&mut w, info.cw_index as u64, 8, "cw_index")?;
    put(&mut w, info.tier as u64, 12, "tier")?;
    put(&mut w, command.len() as u64, 12, "splice_command_length")?;
    put(&mut w, command_type as u64, 8, "splice_command_type")?;
    w.write_bytes(&command);
    put(&mut w, loop_bytes.len() as u64, 16, "descriptor_loop_length")?;
    w.write_bytes(&loop_bytes);

    let mut out = w.finish();
    let crc = crc32(&out);
    out.extend_from_slice(&crc.to_be_bytes());

    cue.info.section_length = section_length as u16;
    cue.info.splice_command_length = command.len() as u16;
    cue.info.splice_command_type = command_type;
    cue.info.descriptor_loop_length = loop_bytes.len() as u16;
    cue.crc32 = crc;
    debug!("encode: {} bytes, crc=0x{crc:08X}", out.len());
    Ok(out)
}

fn put(w: &mut BitWriter, value: u64, bits: u32, field: &str) -> Result<(), CodecError> {
    w.write_bits(value, bits).map_err(|e| CodecError::encode(format!("{field}: {e}")))
}

fn write_splice_time(w: &mut BitWriter, t: &SpliceTime) -> Result<(), CodecError> {
    w.write_flag(t.time_specified_flag);
    if t.time_specified_flag {
        w.reserved(6);
        put(w, t.pts_time, 33, "pts_time")
    } else {
        w.reserved(7);
        Ok(())
    }
}

fn write_command(command: &SpliceCommand) -> Result<Vec<u8>, CodecError> {
    let mut w = BitWriter::new();
    match command {
        SpliceCommand::TimeSignal(t) => write_splice_time(&mut w, t)?,
        SpliceCommand::SpliceInsert(si) => {
            put(&mut w, si.splice_event_id as u64, 32, "splice_event_id")?;
            w.write_flag(si.splice_event_cancel_indicator);
            w.reserved(7);
            if !si.splice_event_cancel_indicator {
                w.write_flag(si.out_of_network_indicator);
                w.write_flag(si.program_splice_flag);
                w.write_flag(si.duration_flag);
                w.write_flag(si.splice_immediate_flag);
                w.reserved(4);
                if si.program_splice_flag && !si.splice_immediate_flag {
                    write_splice_time(&mut w, &si.splice_time)?;
                } else if !si.program_splice_flag {
                    put(&mut w, si.components.len() as u64, 8, "component_count")?;
                    for c in &si.components {
                        put(&mut w, c.component_tag as u64, 8, "component_tag")?;
                        if !si.splice_immediate_flag {
                            write_splice_time(&mut w, &c.splice_time)?;
                        }
                    }
                }
                if si.duration_flag {
                    w.write_flag(si.break_auto_return);
                    w.reserved(6);
                    put(&mut w, si.break_duration, 33, "break_duration")?;
                }
                put(&mut w, si.unique_program_id as u64, 16, "unique_program_id")?;
                put(&mut w, si.avail_num as u64, 8, "avail_num")?;
                put(&mut w, si.avail_expected as u64, 8, "avail_expected")?;
            }
        }
        SpliceCommand::Other { data, .. } => w.write_bytes(data),
    }
    Ok(w.finish())
}

fn write_descriptor_body(d: &mut SpliceDescriptor) -> Result<Vec<u8>, CodecError> {
    let mut w = BitWriter::new();
    match d {
        SpliceDescriptor::Avail(a) => {
            put(&mut w, a.identifier as u64, 32, "identifier")?;
            put(&mut w, a.provider_avail_id as u64, 32, "provider_avail_id")?;
        }
        SpliceDescriptor::Other { data, .. } => w.write_bytes(data),
        SpliceDescriptor::Segmentation(s) => {
            put(&mut w, s.identifier as u64, 32, "identifier")?;
            put(&mut w, s.segmentation_event_id as u64, 32, "segmentation_event_id")?;
            w.write_flag(s.segmentation_event_cancel_indicator);
            w.reserved(7);
            if !s.segmentation_event_cancel_indicator {
                w.write_flag(s.program_segmentation_flag);
                w.write_flag(s.segmentation_duration_flag);
                w.write_flag(s.delivery_not_restricted_flag);
                if s.delivery_not_restricted_flag {
                    w.reserved(5);
                } else {
                    w.write_flag(s.web_delivery_allowed_flag);
                    w.write_flag(s.no_regional_blackout_flag);
                    w.write_flag(s.archive_allowed_flag);
                    put(&mut w, s.device_restrictions as u64, 2, "device_restrictions")?;
                }
                if !s.program_segmentation_flag {
                    put(&mut w, s.components.len() as u64, 8, "component_count")?;
                    for c in &s.components {
                        put(&mut w, c.component_tag as u64, 8, "component_tag")?;
                        w.reserved(7);
                        put(&mut w, c.pts_offset, 33, "pts_offset")?;
                    }
                }
                if s.segmentation_duration_flag {
                    put(&mut w, s.segmentation_duration, 40, "segmentation_duration")?;
                }
                put(&mut w, s.segmentation_upid_type as u64, 8, "segmentation_upid_type")?;
                put(&mut w, s.segmentation_upid.len() as u64, 8, "segmentation_upid_length")?;
                w.write_bytes(&s.segmentation_upid);
                put(&mut w, s.segmentation_type_id as u64, 8, "segmentation_type_id")?;
                put(&mut w, s.segment_num as u64, 8, "segment_num")?;
                put(&mut w, s.segments_expected as u64, 8, "segments_expected")?;
                if SegmentationDescriptor::carries_sub_segments(s.segmentation_type_id)
                    && (s.sub_segment_num.is_some() || s.sub_segments_expected.is_some())
                {
                    let num = *s.sub_segment_num.get_or_insert(0);
                    let expected = *s.sub_segments_expected.get_or_insert(0);
                    put(&mut w, num as u64, 8, "sub_segment_num")?;
                    put(&mut w, expected as u64, 8, "sub_segments_expected")?;
                } else {
                    s.sub_segment_num = None;
                    s.sub_segments_expected = None;
                }
            }
        }
    }
    Ok(w.finish())
}

/// Human-readable name of a segmentation_type_id.
pub fn segmentation_type_name(type_id: u8) -> String {
    let name = match type_id {
        0x00 => "Not Indicated",
        0x01 => "Content Identification",
        0x10 => "Program Start",
        0x11 => "Program End",
        0x12 => "Program Early Termination",
        0x13 => "Program Breakaway",
        0x14 => "Program Resumption",
        0x15 => "Program Runover Planned",
        0x16 => "Program Runover Unplanned",
        0x17 => "Program Overlap Start",
        0x18 => "Program Blackout Override",
        0x19 => "Program Start - In Progress",
        0x20 => "Chapter Start",
        0x21 => "Chapter End",
        0x22 => "Break Start",
        0x23 => "Break End",
        0x24 => "Opening Credit Start",
        0x25 => "Opening Credit End",
        0x26 => "Closing Credit Start",
        0x27 => "Closing Credit End",
        0x30 => "Provider Advertisement Start",
        0x31 => "Provider Advertisement End",
        0x32 => "Distributor Advertisement Start",
        0x33 => "Distributor Advertisement End",
        0x34 => "Provider Placement Opportunity Start",
        0x35 => "Provider Placement Opportunity End",
        0x36 => "Distributor Placement Opportunity Start",
        0x37 => "Distributor Placement Opportunity End",
        0x38 => "Provider Overlay Placement Opportunity Start",
        0x39 => "Provider Overlay Placement Opportunity End",
        0x3A => "Distributor Overlay Placement Opportunity Start",
        0x3B => "Distributor Overlay Placement Opportunity End",
        0x40 => "Unscheduled Event Start",
        0x41 => "Unscheduled Event End",
        0x50 => "Network Start",
        0x51 => "Network End",
        _ if type_id >= 0x80 => return format!("Custom/Vendor Specific (0x{type_id:02X})"),
        _ => return format!("Reserved (0x{type_id:02X})"),
    };
    name.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD as B64;
    use base64::Engine;

    const TIME_SIGNAL_B64: &str = "/DAWAAAAAAAAAP/wBQb+Qjo1vQAAuwxz9A==";
    const SPLICE_INSERT_B64: &str = "/DAvAAAAAAAA///wFAVIAACPf+/+c2nALv4AUsz1AAAAAAAKAAhDVUVJAAABNWLbowo=";
    const PPO_END_B64: &str = "/DAvAAAAAAAA///wBQb+dGKQoAAZAhdDVUVJSAAAjn+fCAgAAAAALKChijUCAKnMZ1g=";
    const THREE_DESCRIPTORS_B64: &str = "/DBhAAAAAAAA///wBQb+qM1E7QBLAhdDVUVJSAAArX+fCAgAAAAALLLXnTUCAAIXQ1VFSUgAACZ/nwgIAAAAACyy150RAAACF0NVRUlIAAAnf58ICAAAAAAsstezEAAAihiGnw==";
    const BAD_CRC_B64: &str = "/DA4AAAAAAAA///wBQb+AKpFLgAiAiBDVUVJAAAAA3//AAApPWwDDEFCQ0QwMTIzNDU2SHAAAFkTm+A=";

    fn bytes(b64: &str) -> Vec<u8> { B64.decode(b64).unwrap() }

    #[test]
    fn decodes_time_signal() {
        let d = decode(&bytes(TIME_SIGNAL_B64)).unwrap();
        assert!(d.crc_valid);
        let cue = d.cue;
        assert_eq!(cue.info.section_length, 22);
        assert_eq!(cue.info.sap_type, 3);
        assert_eq!(cue.info.tier, 0x0FFF);
        assert_eq!(cue.info.splice_command_length, 5);
        assert_eq!(cue.command, SpliceCommand::TimeSignal(SpliceTime { time_specified_flag: true, pts_time: 1_111_111_101 }));
        assert!(cue.descriptors.is_empty());
        assert_eq!(cue.crc32, 0xBB0C_73F4);
    }

    #[test]
    fn decodes_splice_insert_with_avail_descriptor() {
        let cue = decode(&bytes(SPLICE_INSERT_B64)).unwrap().cue;
        let SpliceCommand::SpliceInsert(si) = &cue.command else { panic!("expected splice_insert") };
        assert_eq!(si.splice_event_id, 0x4800_008F);
        assert!(si.out_of_network_indicator);
        assert!(si.program_splice_flag);
        assert!(si.duration_flag);
        assert!(!si.splice_immediate_flag);
        assert_eq!(si.splice_time.pts_time, 0x0_7369_C02E);
        assert!(si.break_auto_return);
        assert_eq!(si.break_duration, 0x52_CCF5);
        assert_eq!(cue.info.splice_command_length, 0x14);
        assert_eq!(
            cue.descriptors,
            vec![SpliceDescriptor::Avail(AvailDescriptor { identifier: CUEI, provider_avail_id: 0x135 })]
        );
    }

    #[test]
    fn decodes_segmentation_descriptor_fields() {
        let cue = decode(&bytes(PPO_END_B64)).unwrap().cue;
        let seg = cue.segmentation_descriptors().next().unwrap();
        assert_eq!(seg.descriptor_length, 23);
        assert_eq!(seg.segmentation_event_id, 1_207_959_694);
        assert!(seg.program_segmentation_flag);
        assert!(!seg.segmentation_duration_flag);
        assert!(!seg.delivery_not_restricted_flag);
        assert!(seg.web_delivery_allowed_flag && seg.no_regional_blackout_flag && seg.archive_allowed_flag);
        assert_eq!(seg.device_restrictions, 3);
        assert_eq!(seg.segmentation_upid_type, 0x08);
        assert_eq!(seg.segmentation_upid, vec![0, 0, 0, 0, 0x2C, 0xA0, 0xA1, 0x8A]);
        assert_eq!(seg.segmentation_type_id, 0x35);
        assert_eq!(seg.segment_num, 2);
        assert_eq!(seg.segments_expected, 0);
    }

    #[test]
    fn crc_mismatch_is_reported_not_fatal() {
        let d = decode(&bytes(BAD_CRC_B64)).unwrap();
        assert!(!d.crc_valid);
        let seg = d.cue.segmentation_descriptors().next().unwrap();
        assert!(seg.delivery_not_restricted_flag);
        assert_eq!(seg.segmentation_duration, 2_702_700);
        assert_eq!(seg.segmentation_upid, b"ABCD0123456H".to_vec());
        assert_eq!(seg.segmentation_type_id, 0x70);
    }

    #[test]
    fn reencodes_decoded_cues_byte_for_byte() {
        for b64 in [TIME_SIGNAL_B64, SPLICE_INSERT_B64, PPO_END_B64, THREE_DESCRIPTORS_B64] {
            let original = bytes(b64);
            let mut cue = decode(&original).unwrap().cue;
            assert_eq!(encode(&mut cue).unwrap(), original, "{b64}");
        }
    }

    #[test]
    fn encode_recomputes_lengths_and_crc_after_mutation() {
        let mut cue = decode(&bytes(PPO_END_B64)).unwrap().cue;
        if let SpliceDescriptor::Segmentation(seg) = &mut cue.descriptors[0] {
            seg.segmentation_upid = b"A-LONGER-CONTENT-ID".to_vec();
            seg.segmentation_duration_flag = true;
            seg.segmentation_duration = 30 * TICKS_PER_SECOND;
        }
        let out = encode(&mut cue).unwrap();
        let again = decode(&out).unwrap();
        assert!(again.crc_valid);
        assert_eq!(again.cue, cue);
        // 8 byte upid grew to 19, plus 5 bytes of duration.
        assert_eq!(cue.descriptors[0].as_segmentation().unwrap().descriptor_length, 23 + 11 + 5);
        assert_eq!(cue.info.descriptor_loop_length, 2 + 39);
        assert_eq!(cue.info.section_length as usize, out.len() - 3);
    }

    #[test]
    fn round_trips_component_splices_and_cancellations() {
        let mut cue = Cue {
            info: InfoSection { pts_adjustment: PTS_MODULUS - 1, ..InfoSection::default() },
            command: SpliceCommand::SpliceInsert(SpliceInsert {
                splice_event_id: 7,
                out_of_network_indicator: true,
                program_splice_flag: false,
                components: vec![
                    SpliceComponent { component_tag: 1, splice_time: SpliceTime::at(1000) },
                    SpliceComponent { component_tag: 2, splice_time: SpliceTime::default() },
                ],
                ..SpliceInsert::default()
            }),
            descriptors: vec![
                SpliceDescriptor::Segmentation(SegmentationDescriptor {
                    tag: SEGMENTATION_DESCRIPTOR_TAG,
                    descriptor_length: 0,
                    identifier: CUEI,
                    segmentation_event_id: 9,
                    segmentation_event_cancel_indicator: true,
                    program_segmentation_flag: false,
                    segmentation_duration_flag: false,
                    delivery_not_restricted_flag: false,
                    web_delivery_allowed_flag: false,
                    no_regional_blackout_flag: false,
                    archive_allowed_flag: false,
                    device_restrictions: 0,
                    components: vec![],
                    segmentation_duration: 0,
                    segmentation_upid_type: 0,
                    segmentation_upid: vec![],
                    segmentation_type_id: 0,
                    segment_num: 0,
                    segments_expected: 0,
                    sub_segment_num: None,
                    sub_segments_expected: None,
                }),
                SpliceDescriptor::Other { tag: 0x01, data: vec![0x43, 0x55, 0x45, 0x49, 0xAA] },
            ],
            crc32: 0,
        };
        let out = encode(&mut cue).unwrap();
        assert_eq!(decode(&out).unwrap().cue, cue);
    }

    #[test]
    fn sub_segments_round_trip_only_for_types_that_carry_them() {
        let mut cue = decode(&bytes(PPO_END_B64)).unwrap().cue;
        if let SpliceDescriptor::Segmentation(seg) = &mut cue.descriptors[0] {
            seg.segmentation_type_id = 0x34;
            seg.sub_segment_num = Some(1);
            seg.sub_segments_expected = Some(4);
        }
        let out = encode(&mut cue).unwrap();
        let seg = decode(&out).unwrap().cue.descriptors[0].as_segmentation().cloned().unwrap();
        assert_eq!((seg.sub_segment_num, seg.sub_segments_expected), (Some(1), Some(4)));

        if let SpliceDescriptor::Segmentation(seg) = &mut cue.descriptors[0] {
            seg.segmentation_type_id = 0x35;
        }
        let out = encode(&mut cue).unwrap();
        assert_eq!(cue.descriptors[0].as_segmentation().unwrap().sub_segment_num, None);
        assert_eq!(decode(&out).unwrap().cue, cue);
    }

    #[test]
    fn opaque_commands_survive_a_round_trip() {
        // splice_null
        let mut cue = Cue {
            info: InfoSection::default(),
            command: SpliceCommand::Other { command_type: 0x00, data: vec![] },
            descriptors: vec![],
            crc32: 0,
        };
        let out = encode(&mut cue).unwrap();
        assert_eq!(cue.info.splice_command_type, 0x00);
        assert_eq!(decode(&out).unwrap().cue, cue);
    }

    fn with_unspecified_command_length(mut raw: Vec<u8>) -> Vec<u8> {
        raw[11] |= 0x0F;
        raw[12] = 0xFF;
        let body = raw.len() - CRC_BYTES;
        let crc = crc32(&raw[..body]);
        raw[body..].copy_from_slice(&crc.to_be_bytes());
        raw
    }

    #[test]
    fn parses_known_commands_with_unspecified_length() {
        for b64 in [TIME_SIGNAL_B64, SPLICE_INSERT_B64] {
            let original = decode(&bytes(b64)).unwrap().cue;
            let d = decode(&with_unspecified_command_length(bytes(b64))).unwrap();
            assert!(d.crc_valid);
            assert_eq!(d.cue.info.splice_command_length, UNSPECIFIED_COMMAND_LENGTH);
            assert_eq!(d.cue.command, original.command);
            assert_eq!(d.cue.descriptors, original.descriptors);

            let mut cue = d.cue;
            assert_eq!(encode(&mut cue).unwrap(), bytes(b64), "{b64}");
        }
    }

    #[test]
    fn opaque_command_needs_a_length() {
        let mut cue = Cue {
            info: InfoSection::default(),
            command: SpliceCommand::Other { command_type: 0x00, data: vec![] },
            descriptors: vec![],
            crc32: 0,
        };
        let raw = with_unspecified_command_length(encode(&mut cue).unwrap());
        assert!(matches!(decode(&raw), Err(CodecError::MalformedCue(_))));
    }

    #[test]
    fn rejects_truncated_and_inconsistent_sections() {
        let good = bytes(TIME_SIGNAL_B64);
        assert!(matches!(decode(&good[..2]), Err(CodecError::MalformedCue(_))));
        assert!(matches!(decode(&good[..20]), Err(CodecError::MalformedCue(_))));

        let mut wrong_table = good.clone();
        wrong_table[0] = 0xFD;
        assert!(decode(&wrong_table).is_err());

        // splice_command_length claims 6 bytes for a 5 byte time_signal
        let mut wrong_len = good.clone();
        wrong_len[12] = 0x06;
        assert!(matches!(decode(&wrong_len), Err(CodecError::MalformedCue(_))));

        // descriptor_loop_length longer than the section
        let mut wrong_loop = good;
        wrong_loop[19] = 0x09;
        assert!(matches!(decode(&wrong_loop), Err(CodecError::MalformedCue(_))));
    }

    #[test]
    fn encode_rejects_values_wider_than_their_fields() {
        let mut cue = decode(&bytes(TIME_SIGNAL_B64)).unwrap().cue;
        cue.info.pts_adjustment = PTS_MODULUS;
        assert!(matches!(encode(&mut cue), Err(CodecError::EncodeFailure(_))));

        let mut cue = decode(&bytes(PPO_END_B64)).unwrap().cue;
        if let SpliceDescriptor::Segmentation(seg) = &mut cue.descriptors[0] {
            seg.segmentation_upid = vec![b'x'; 300];
        }
        assert!(matches!(encode(&mut cue), Err(CodecError::EncodeFailure(_))));
    }

    #[test]
    fn names_segmentation_types() {
        assert_eq!(segmentation_type_name(0x34), "Provider Placement Opportunity Start");
        assert_eq!(segmentation_type_name(0x90), "Custom/Vendor Specific (0x90)");
        assert_eq!(segmentation_type_name(0x02), "Reserved (0x02)");
    }
}
