// src/models.rs
use serde::{Deserialize, Serialize};

use crate::cue::{seconds_to_ticks, SegmentationDescriptor, CUEI, SEGMENTATION_DESCRIPTOR_TAG};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefaultBehavior { Noop, Delete }

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Stateless,
    Stateful,
}

/// Per-channel conditioning rules, stored as JSON and read whole per request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub default_behavior: DefaultBehavior,

    #[serde(default)]
    pub mode: Mode,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub esam_version: Option<String>,

    #[serde(default)]
    pub rules: Vec<Rule>,

    /// Comma separated segmentation_type_id values, highest priority first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptor_priority: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rebuild_defaults: Option<RebuildDefaults>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleType { Delete, Replace }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    #[serde(rename = "type")]
    pub kind: RuleType,
    pub condition: Condition,

    /// Single-key `{property: value}` objects applied in order.
    #[serde(default)]
    pub replace_params: Vec<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub property: String,
    pub operator: String,
    pub value: serde_json::Value, // scalar, or "a,b,c" / "min-max"
}

/// Template for segmentation descriptors built during a rebuild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RebuildDefaults {
    pub segmentation_type_id: u8,
    pub segments_expected: u8,
    pub segment_num: u8,
    pub archive_allowed_flag: bool,
    pub delivery_not_restricted_flag: bool,
    pub web_delivery_allowed_flag: bool,
    pub no_regional_blackout_flag: bool,
    pub device_restrictions: u8,
    pub program_segmentation_flag: bool,
    pub segmentation_duration_flag: bool,
    /// Seconds.
    pub segmentation_duration: f64,
    pub segmentation_upid_type: u8,
}

impl Default for RebuildDefaults {
    fn default() -> Self {
        Self {
            segmentation_type_id: 0x34,
            segments_expected: 1,
            segment_num: 0,
            archive_allowed_flag: true,
            delivery_not_restricted_flag: false,
            web_delivery_allowed_flag: false,
            no_regional_blackout_flag: false,
            device_restrictions: 3,
            program_segmentation_flag: true,
            segmentation_duration_flag: true,
            segmentation_duration: 30.0,
            segmentation_upid_type: 0,
        }
    }
}

impl RebuildDefaults {
    pub fn descriptor(&self) -> SegmentationDescriptor {
        SegmentationDescriptor {
            tag: SEGMENTATION_DESCRIPTOR_TAG,
            descriptor_length: 0,
            identifier: CUEI,
            segmentation_event_id: 0,
            segmentation_event_cancel_indicator: false,
            program_segmentation_flag: self.program_segmentation_flag,
            segmentation_duration_flag: self.segmentation_duration_flag,
            delivery_not_restricted_flag: self.delivery_not_restricted_flag,
            web_delivery_allowed_flag: self.web_delivery_allowed_flag,
            no_regional_blackout_flag: self.no_regional_blackout_flag,
            archive_allowed_flag: self.archive_allowed_flag,
            device_restrictions: self.device_restrictions & 0x03,
            components: Vec::new(),
            segmentation_duration: seconds_to_ticks(self.segmentation_duration.max(0.0)),
            segmentation_upid_type: self.segmentation_upid_type,
            segmentation_upid: Vec::new(),
            segmentation_type_id: self.segmentation_type_id,
            segment_num: self.segment_num,
            segments_expected: self.segments_expected,
            sub_segment_num: None,
            sub_segments_expected: None,
        }
    }
}

impl ChannelConfig {
    pub fn rebuild_defaults(&self) -> RebuildDefaults {
        self.rebuild_defaults.clone().unwrap_or_default()
    }
}

/// Row of the `channels` table.
#[derive(Debug, Serialize, sqlx::FromRow, Clone)]
pub struct ChannelRow {
    pub name: String,
    pub config_json: String,
    pub updated_at: String,
}
