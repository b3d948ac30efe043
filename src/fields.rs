// src/fields.rs
//! Property vocabulary rules may reference.
//!
//! Every legal `condition.property` / `replace_params` key maps to a
//! [`Field`] with a declared [`Kind`] and a [`Scope`]. Time fields are
//! exposed in seconds; the cue stores ticks.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use crate::cue::*;
use crate::error::RuleError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    // splice_info_section
    TableId,
    SectionSyntaxIndicator,
    Private,
    SapType,
    ProtocolVersion,
    PtsAdjustment,
    SpliceCommandType,
    // command
    CommandType,
    TimeSpecifiedFlag,
    PtsTime,
    BreakAutoReturn,
    BreakDuration,
    SpliceEventId,
    OutOfNetworkIndicator,
    ProgramSpliceFlag,
    DurationFlag,
    SpliceImmediateFlag,
    UniqueProgramId,
    AvailNum,
    AvailExpected,
    // descriptors
    Tag,
    SegmentationEventId,
    SegmentationEventCancelIndicator,
    ProgramSegmentationFlag,
    SegmentationDurationFlag,
    SegmentationDuration,
    DeliveryNotRestrictedFlag,
    WebDeliveryAllowedFlag,
    NoRegionalBlackoutFlag,
    ArchiveAllowedFlag,
    DeviceRestrictions,
    SegmentationUpidType,
    SegmentationUpid,
    SegmentationTypeId,
    SegmentNum,
    SegmentsExpected,
    ProviderAvailId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope { Info, Command, Descriptor }

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind { Int, Float, Bool, Str }

impl Kind {
    fn describe(self) -> &'static str {
        match self {
            Kind::Int => "an integer",
            Kind::Float => "a number",
            Kind::Bool => "true or false",
            Kind::Str => "a string",
        }
    }
}

use Field::*;

const VOCABULARY: &[(&str, Field, Scope, Kind)] = &[
    ("table_id", TableId, Scope::Info, Kind::Int),
    ("section_syntax_indicator", SectionSyntaxIndicator, Scope::Info, Kind::Bool),
    ("private", Private, Scope::Info, Kind::Bool),
    ("sap_type", SapType, Scope::Info, Kind::Int),
    ("protocol_version", ProtocolVersion, Scope::Info, Kind::Int),
    ("pts_adjustment", PtsAdjustment, Scope::Info, Kind::Float),
    ("splice_command_type", SpliceCommandType, Scope::Info, Kind::Int),
    ("command_type", CommandType, Scope::Command, Kind::Int),
    ("time_specified_flag", TimeSpecifiedFlag, Scope::Command, Kind::Bool),
    ("pts_time", PtsTime, Scope::Command, Kind::Float),
    ("break_auto_return", BreakAutoReturn, Scope::Command, Kind::Bool),
    ("break_duration", BreakDuration, Scope::Command, Kind::Float),
    ("splice_event_id", SpliceEventId, Scope::Command, Kind::Int),
    ("out_of_network_indicator", OutOfNetworkIndicator, Scope::Command, Kind::Bool),
    ("program_splice_flag", ProgramSpliceFlag, Scope::Command, Kind::Bool),
    ("duration_flag", DurationFlag, Scope::Command, Kind::Bool),
    ("splice_immediate_flag", SpliceImmediateFlag, Scope::Command, Kind::Bool),
    ("unique_program_id", UniqueProgramId, Scope::Command, Kind::Int),
    ("avail_num", AvailNum, Scope::Command, Kind::Int),
    ("avail_expected", AvailExpected, Scope::Command, Kind::Int),
    ("tag", Tag, Scope::Descriptor, Kind::Int),
    ("segmentation_event_id", SegmentationEventId, Scope::Descriptor, Kind::Int),
    ("segmentation_event_cancel_indicator", SegmentationEventCancelIndicator, Scope::Descriptor, Kind::Bool),
    ("program_segmentation_flag", ProgramSegmentationFlag, Scope::Descriptor, Kind::Bool),
    ("segmentation_duration_flag", SegmentationDurationFlag, Scope::Descriptor, Kind::Bool),
    ("segmentation_duration", SegmentationDuration, Scope::Descriptor, Kind::Float),
    ("delivery_not_restricted_flag", DeliveryNotRestrictedFlag, Scope::Descriptor, Kind::Bool),
    ("web_delivery_allowed_flag", WebDeliveryAllowedFlag, Scope::Descriptor, Kind::Bool),
    ("no_regional_blackout_flag", NoRegionalBlackoutFlag, Scope::Descriptor, Kind::Bool),
    ("archive_allowed_flag", ArchiveAllowedFlag, Scope::Descriptor, Kind::Bool),
    ("device_restrictions", DeviceRestrictions, Scope::Descriptor, Kind::Int),
    ("segmentation_upid_type", SegmentationUpidType, Scope::Descriptor, Kind::Int),
    ("segmentation_upid", SegmentationUpid, Scope::Descriptor, Kind::Str),
    ("segmentation_type_id", SegmentationTypeId, Scope::Descriptor, Kind::Int),
    ("segment_num", SegmentNum, Scope::Descriptor, Kind::Int),
    ("segments_expected", SegmentsExpected, Scope::Descriptor, Kind::Int),
    ("provider_avail_id", ProviderAvailId, Scope::Descriptor, Kind::Int),
];

fn by_name() -> &'static HashMap<&'static str, usize> {
    static INDEX: OnceLock<HashMap<&'static str, usize>> = OnceLock::new();
    INDEX.get_or_init(|| VOCABULARY.iter().enumerate().map(|(i, (name, ..))| (*name, i)).collect())
}

impl Field {
    pub fn from_name(name: &str) -> Result<Field, RuleError> {
        by_name()
            .get(name.trim())
            .map(|&i| VOCABULARY[i].1)
            .ok_or_else(|| RuleError::UnknownProperty(name.to_string()))
    }

    fn entry(self) -> &'static (&'static str, Field, Scope, Kind) {
        // VOCABULARY lists every variant exactly once.
        VOCABULARY.iter().find(|e| e.1 == self).unwrap_or(&VOCABULARY[0])
    }

    pub fn name(self) -> &'static str { self.entry().0 }
    pub fn scope(self) -> Scope { self.entry().2 }
    pub fn kind(self) -> Kind { self.entry().3 }

    /// Derived from the cue's shape; rules may test but not replace them.
    pub fn read_only(self) -> bool { matches!(self, SpliceCommandType | CommandType | Tag) }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.name()) }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

impl Value {
    /// Stand-in for a field the cue does not carry.
    pub fn zero(kind: Kind) -> Value {
        match kind {
            Kind::Int => Value::Int(0),
            Kind::Float => Value::Float(0.0),
            Kind::Bool => Value::Bool(false),
            Kind::Str => Value::Str(String::new()),
        }
    }

    /// Parses `raw` as `field`'s declared kind.
    pub fn coerce(field: Field, raw: &str) -> Result<Value, RuleError> {
        let text = raw.trim();
        let fail = || RuleError::Coercion {
            property: field.name().to_string(),
            value: raw.to_string(),
            expected: field.kind().describe(),
        };
        match field.kind() {
            Kind::Int => parse_int(text).map(Value::Int).ok_or_else(fail),
            Kind::Float => text.parse::<f64>().ok().filter(|v| v.is_finite()).map(Value::Float).ok_or_else(fail),
            Kind::Bool => match text.to_ascii_lowercase().as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(fail()),
            },
            Kind::Str => Ok(Value::Str(text.to_string())),
        }
    }

    /// Same-kind ordering; strings order lexicographically.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Str(v) => write!(f, "{v}"),
        }
    }
}

/// Text form of a JSON scalar, as it would appear in a comma list.
pub fn scalar_text(v: &serde_json::Value) -> Option<String> {
    match v {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn parse_int(text: &str) -> Option<i64> {
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => i64::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

/// Printable ASCII verbatim, anything else as `0x` + hex.
pub fn upid_text(upid: &[u8]) -> String {
    if !upid.is_empty() && upid.iter().all(|b| (0x20..=0x7E).contains(b)) {
        return String::from_utf8_lossy(upid).into_owned();
    }
    let mut s = String::with_capacity(2 + upid.len() * 2);
    if !upid.is_empty() {
        s.push_str("0x");
    }
    for b in upid {
        s.push_str(&format!("{b:02X}"));
    }
    s
}

fn upid_bytes(text: &str) -> Vec<u8> {
    if let Some(hex) = text.strip_prefix("0x") {
        if hex.len() % 2 == 0 && !hex.is_empty() && hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return (0..hex.len())
                .step_by(2)
                .filter_map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
                .collect();
        }
    }
    text.as_bytes().to_vec()
}

/// Values of `field` in `cue`: one per carrier, or a single zero stand-in
/// when nothing carries it.
pub fn read(cue: &Cue, field: Field) -> Vec<Value> {
    let found: Vec<Value> = match field.scope() {
        Scope::Info => vec![read_info(&cue.info, field)],
        Scope::Command => read_command(&cue.command, field).into_iter().collect(),
        Scope::Descriptor => cue.descriptors.iter().filter_map(|d| read_descriptor(d, field)).collect(),
    };
    if found.is_empty() { vec![Value::zero(field.kind())] } else { found }
}

fn read_info(info: &InfoSection, field: Field) -> Value {
    match field {
        TableId => Value::Int(info.table_id as i64),
        SectionSyntaxIndicator => Value::Bool(info.section_syntax_indicator),
        Private => Value::Bool(info.private_indicator),
        SapType => Value::Int(info.sap_type as i64),
        ProtocolVersion => Value::Int(info.protocol_version as i64),
        PtsAdjustment => Value::Float(pts_to_seconds(info.pts_adjustment)),
        _ => Value::Int(info.splice_command_type as i64),
    }
}

fn read_command(command: &SpliceCommand, field: Field) -> Option<Value> {
    match field {
        CommandType => return Some(Value::Int(command.command_type() as i64)),
        TimeSpecifiedFlag => return command.splice_time().map(|t| Value::Bool(t.time_specified_flag)),
        PtsTime => {
            return command
                .splice_time()
                .filter(|t| t.time_specified_flag)
                .map(|t| Value::Float(pts_to_seconds(t.pts_time)))
        }
        _ => {}
    }
    let SpliceCommand::SpliceInsert(si) = command else { return None };
    Some(match field {
        BreakAutoReturn => Value::Bool(si.break_auto_return),
        BreakDuration => Value::Float(ticks_to_seconds(si.break_duration)),
        SpliceEventId => Value::Int(si.splice_event_id as i64),
        OutOfNetworkIndicator => Value::Bool(si.out_of_network_indicator),
        ProgramSpliceFlag => Value::Bool(si.program_splice_flag),
        DurationFlag => Value::Bool(si.duration_flag),
        SpliceImmediateFlag => Value::Bool(si.splice_immediate_flag),
        UniqueProgramId => Value::Int(si.unique_program_id as i64),
        AvailNum => Value::Int(si.avail_num as i64),
        AvailExpected => Value::Int(si.avail_expected as i64),
        _ => return None,
    })
}

fn read_descriptor(d: &SpliceDescriptor, field: Field) -> Option<Value> {
    if field == Tag {
        return Some(Value::Int(d.tag() as i64));
    }
    match d {
        SpliceDescriptor::Avail(a) if field == ProviderAvailId => Some(Value::Int(a.provider_avail_id as i64)),
        SpliceDescriptor::Segmentation(s) => read_segmentation(s, field),
        _ => None,
    }
}

fn read_segmentation(s: &SegmentationDescriptor, field: Field) -> Option<Value> {
    Some(match field {
        SegmentationEventId => Value::Int(s.segmentation_event_id as i64),
        SegmentationEventCancelIndicator => Value::Bool(s.segmentation_event_cancel_indicator),
        ProgramSegmentationFlag => Value::Bool(s.program_segmentation_flag),
        SegmentationDurationFlag => Value::Bool(s.segmentation_duration_flag),
        SegmentationDuration => Value::Float(ticks_to_seconds(s.segmentation_duration)),
        DeliveryNotRestrictedFlag => Value::Bool(s.delivery_not_restricted_flag),
        WebDeliveryAllowedFlag => Value::Bool(s.web_delivery_allowed_flag),
        NoRegionalBlackoutFlag => Value::Bool(s.no_regional_blackout_flag),
        ArchiveAllowedFlag => Value::Bool(s.archive_allowed_flag),
        DeviceRestrictions => Value::Int(s.device_restrictions as i64),
        SegmentationUpidType => Value::Int(s.segmentation_upid_type as i64),
        SegmentationUpid => Value::Str(upid_text(&s.segmentation_upid)),
        SegmentationTypeId => Value::Int(s.segmentation_type_id as i64),
        SegmentNum => Value::Int(s.segment_num as i64),
        SegmentsExpected => Value::Int(s.segments_expected as i64),
        _ => return None,
    })
}

fn out_of_range(field: Field, value: &Value) -> RuleError {
    RuleError::OutOfRange { property: field.name().to_string(), value: value.to_string() }
}

fn uint(field: Field, value: &Value, bits: u32) -> Result<u64, RuleError> {
    match value {
        Value::Int(v) if *v >= 0 && (bits >= 63 || (*v as u64) >> bits == 0) => Ok(*v as u64),
        _ => Err(out_of_range(field, value)),
    }
}

fn flag(field: Field, value: &Value) -> Result<bool, RuleError> {
    match value {
        Value::Bool(b) => Ok(*b),
        _ => Err(out_of_range(field, value)),
    }
}

/// Non-negative seconds converted to ticks that fit `bits`.
fn ticks(field: Field, value: &Value, bits: u32) -> Result<u64, RuleError> {
    let seconds = match value {
        Value::Float(v) => *v,
        Value::Int(v) => *v as f64,
        _ => return Err(out_of_range(field, value)),
    };
    let t = seconds_to_ticks(seconds);
    if seconds < 0.0 || t >> bits != 0 {
        return Err(out_of_range(field, value));
    }
    Ok(t)
}

/// Non-negative seconds as a PTS value, wrapped modulo 2^33.
fn pts(field: Field, value: &Value) -> Result<u64, RuleError> {
    let seconds = match value {
        Value::Float(v) => *v,
        Value::Int(v) => *v as f64,
        _ => return Err(out_of_range(field, value)),
    };
    if seconds < 0.0 {
        return Err(out_of_range(field, value));
    }
    Ok(wrap_pts(seconds_to_ticks(seconds)))
}

fn read_only(field: Field) -> RuleError { RuleError::ReadOnly { property: field.name().to_string() } }

/// Sets an info or command field in place.
pub fn write(cue: &mut Cue, field: Field, value: &Value) -> Result<(), RuleError> {
    if field.read_only() {
        return Err(read_only(field));
    }
    let info = &mut cue.info;
    match field {
        TableId => info.table_id = uint(field, value, 8)? as u8,
        SectionSyntaxIndicator => info.section_syntax_indicator = flag(field, value)?,
        Private => info.private_indicator = flag(field, value)?,
        SapType => info.sap_type = uint(field, value, 2)? as u8,
        ProtocolVersion => info.protocol_version = uint(field, value, 8)? as u8,
        PtsAdjustment => info.pts_adjustment = pts(field, value)?,
        _ => return write_command(&mut cue.command, field, value),
    }
    Ok(())
}

fn write_command(command: &mut SpliceCommand, field: Field, value: &Value) -> Result<(), RuleError> {
    let carrier = command.name();
    let not_carried = || RuleError::NotCarried { property: field.name().to_string(), carrier };
    match (field, &mut *command) {
        (TimeSpecifiedFlag, SpliceCommand::TimeSignal(t)) => t.time_specified_flag = flag(field, value)?,
        (PtsTime, SpliceCommand::TimeSignal(t)) => *t = SpliceTime::at(pts(field, value)?),
        (TimeSpecifiedFlag | PtsTime, SpliceCommand::SpliceInsert(si)) => {
            let time = if field == PtsTime {
                SpliceTime::at(pts(field, value)?)
            } else {
                SpliceTime { time_specified_flag: flag(field, value)?, ..si.splice_time }
            };
            if si.program_splice_flag {
                si.splice_time = time;
            } else {
                for c in si.components.iter_mut() {
                    c.splice_time = time;
                }
            }
        }
        (_, SpliceCommand::SpliceInsert(si)) => match field {
            BreakAutoReturn => si.break_auto_return = flag(field, value)?,
            BreakDuration => {
                si.break_duration = ticks(field, value, 33)?;
                si.duration_flag = true;
            }
            SpliceEventId => si.splice_event_id = uint(field, value, 32)? as u32,
            OutOfNetworkIndicator => si.out_of_network_indicator = flag(field, value)?,
            ProgramSpliceFlag => si.program_splice_flag = flag(field, value)?,
            DurationFlag => si.duration_flag = flag(field, value)?,
            SpliceImmediateFlag => si.splice_immediate_flag = flag(field, value)?,
            UniqueProgramId => si.unique_program_id = uint(field, value, 16)? as u16,
            AvailNum => si.avail_num = uint(field, value, 8)? as u8,
            AvailExpected => si.avail_expected = uint(field, value, 8)? as u8,
            _ => return Err(not_carried()),
        },
        _ => return Err(not_carried()),
    }
    Ok(())
}

/// Whether `d` carries `field` and so receives a replace of it.
pub fn carried_by(d: &SpliceDescriptor, field: Field) -> bool {
    match d {
        SpliceDescriptor::Avail(_) => field == ProviderAvailId,
        SpliceDescriptor::Segmentation(_) => field != ProviderAvailId && field.scope() == Scope::Descriptor,
        SpliceDescriptor::Other { .. } => false,
    }
}

pub fn write_descriptor(d: &mut SpliceDescriptor, field: Field, value: &Value) -> Result<(), RuleError> {
    if field.read_only() {
        return Err(read_only(field));
    }
    match d {
        SpliceDescriptor::Avail(a) if field == ProviderAvailId => {
            a.provider_avail_id = uint(field, value, 32)? as u32;
            Ok(())
        }
        SpliceDescriptor::Segmentation(s) => write_segmentation(s, field, value),
        _ => Err(RuleError::NotCarried { property: field.name().to_string(), carrier: "this descriptor" }),
    }
}

pub fn write_segmentation(s: &mut SegmentationDescriptor, field: Field, value: &Value) -> Result<(), RuleError> {
    match field {
        SegmentationEventId => s.segmentation_event_id = uint(field, value, 32)? as u32,
        SegmentationEventCancelIndicator => s.segmentation_event_cancel_indicator = flag(field, value)?,
        ProgramSegmentationFlag => s.program_segmentation_flag = flag(field, value)?,
        SegmentationDurationFlag => s.segmentation_duration_flag = flag(field, value)?,
        SegmentationDuration => {
            s.segmentation_duration = ticks(field, value, 40)?;
            s.segmentation_duration_flag = true;
        }
        DeliveryNotRestrictedFlag => s.delivery_not_restricted_flag = flag(field, value)?,
        WebDeliveryAllowedFlag => s.web_delivery_allowed_flag = flag(field, value)?,
        NoRegionalBlackoutFlag => s.no_regional_blackout_flag = flag(field, value)?,
        ArchiveAllowedFlag => s.archive_allowed_flag = flag(field, value)?,
        DeviceRestrictions => s.device_restrictions = uint(field, value, 2)? as u8,
        SegmentationUpidType => s.segmentation_upid_type = uint(field, value, 8)? as u8,
        SegmentationUpid => {
            let Value::Str(text) = value else { return Err(out_of_range(field, value)) };
            let upid = upid_bytes(text);
            if upid.len() > u8::MAX as usize {
                return Err(out_of_range(field, value));
            }
            s.segmentation_upid = upid;
        }
        SegmentationTypeId => s.segmentation_type_id = uint(field, value, 8)? as u8,
        SegmentNum => s.segment_num = uint(field, value, 8)? as u8,
        SegmentsExpected => s.segments_expected = uint(field, value, 8)? as u8,
        Tag => return Err(read_only(field)),
        _ => {
            return Err(RuleError::NotCarried {
                property: field.name().to_string(),
                carrier: "segmentation_descriptor",
            })
        }
    }
    Ok(())
}
