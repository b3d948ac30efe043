// src/esam.rs
//! ESAM SignalProcessingEvent parsing and SignalProcessingNotification
//! rendering for the HTTP edge.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::{debug, warn};

use crate::disposition::{Action, Disposition};
use crate::error::EsamError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamTime {
    pub time_type: String,
    pub time_value: String,
}

/// The AcquiredSignal of a SignalProcessingEvent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignalEvent {
    pub acquisition_point_identity: String,
    pub acquisition_signal_id: String,
    pub acquisition_time: Option<String>,
    pub zone_identity: Option<String>,
    pub utc_point: Option<String>,
    pub signal_type: Option<String>,
    /// Base64 SCTE-35 payload as sent.
    pub binary_data: Option<String>,
    pub stream_times: Vec<StreamTime>,
}

impl SignalEvent {
    /// Decoded SCTE-35 bytes. A missing or undecodable payload yields no
    /// bytes, which the codec then reports as malformed.
    pub fn cue_bytes(&self) -> Vec<u8> {
        let Some(b64) = self.binary_data.as_deref() else {
            warn!("signal {} carries no BinaryData", self.acquisition_signal_id);
            return Vec::new();
        };
        let compact: String = b64.split_whitespace().collect();
        B64.decode(compact.as_bytes()).unwrap_or_else(|e| {
            warn!("signal {}: base64 decode error: {}", self.acquisition_signal_id, e);
            Vec::new()
        })
    }
}

fn attrs(e: &BytesStart) -> Result<Vec<(String, String)>, EsamError> {
    let mut out = Vec::new();
    for a in e.attributes().flatten() {
        let k = String::from_utf8_lossy(a.key.local_name().as_ref()).to_string();
        let v = a.unescape_value().map_err(|e| EsamError::Xml(e.to_string()))?.to_string();
        out.push((k, v));
    }
    Ok(out)
}

pub fn parse_signal_event(esam_xml: &str) -> Result<SignalEvent, EsamError> {
    let mut reader = Reader::from_str(esam_xml);
    reader.trim_text(true);
    let mut buf = Vec::new();

    let mut ev = SignalEvent::default();
    let mut in_binary = false;
    let mut saw_root = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                saw_root = true;
                let local = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                match local.as_str() {
                    "AcquiredSignal" => {
                        for (k, v) in attrs(&e)? {
                            match k.as_str() {
                                "acquisitionPointIdentity" => ev.acquisition_point_identity = v,
                                "acquisitionSignalID" => ev.acquisition_signal_id = v,
                                "acquisitionTime" => ev.acquisition_time = Some(v),
                                "zoneIdentity" => ev.zone_identity = Some(v),
                                _ => {}
                            }
                        }
                    }
                    "UTCPoint" => {
                        ev.utc_point = attrs(&e)?.into_iter().find(|(k, _)| k == "utcPoint").map(|(_, v)| v);
                    }
                    "BinaryData" => {
                        ev.signal_type = attrs(&e)?.into_iter().find(|(k, _)| k == "signalType").map(|(_, v)| v);
                        in_binary = true;
                    }
                    "StreamTime" => {
                        let mut st = StreamTime { time_type: String::new(), time_value: String::new() };
                        for (k, v) in attrs(&e)? {
                            match k.as_str() {
                                "timeType" => st.time_type = v,
                                "timeValue" => st.time_value = v,
                                _ => {}
                            }
                        }
                        ev.stream_times.push(st);
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(t)) if in_binary => {
                let text = t.unescape().map_err(|e| EsamError::Xml(e.to_string()))?.to_string();
                debug!("BinaryData text length={}", text.len());
                ev.binary_data = Some(text);
            }
            Ok(Event::End(_)) => in_binary = false,
            Ok(Event::Eof) => break,
            Err(e) => return Err(EsamError::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    if !saw_root {
        return Err(EsamError::Xml("document has no elements".into()));
    }
    if ev.acquisition_signal_id.is_empty() {
        return Err(EsamError::MissingSignalId);
    }
    Ok(ev)
}

/// Builds the SignalProcessingNotification answering `event`.
pub fn build_notification(event: &SignalEvent, disposition: &Disposition) -> String {
    let signal_type = event.signal_type.as_deref().unwrap_or("SCTE35");
    let binary = match disposition.action {
        Action::Delete => None,
        // Noop echoes the payload exactly as it arrived.
        Action::Noop => event.binary_data.clone(),
        Action::Replace => disposition.cue_bytes.as_ref().map(|b| B64.encode(b)),
    };
    let binary = binary
        .map(|b64| format!(r#"<sig:BinaryData signalType="{}">{}</sig:BinaryData>"#, xml_escape(signal_type), xml_escape(&b64)))
        .unwrap_or_default();

    let optional = |name: &str, v: &Option<String>| {
        v.as_deref().map(|v| format!(r#" {name}="{}""#, xml_escape(v))).unwrap_or_default()
    };
    let utc = event
        .utc_point
        .as_deref()
        .map(|u| format!(r#"<sig:UTCPoint utcPoint="{}"/>"#, xml_escape(u)))
        .unwrap_or_default();
    let stream_times = if event.stream_times.is_empty() {
        String::new()
    } else {
        let times: String = event
            .stream_times
            .iter()
            .map(|st| {
                format!(
                    r#"<sig:StreamTime timeType="{}" timeValue="{}"/>"#,
                    xml_escape(&st.time_type),
                    xml_escape(&st.time_value)
                )
            })
            .collect();
        format!("<sig:StreamTimes>{times}</sig:StreamTimes>")
    };

    format!(r#"
<SignalProcessingNotification
  xmlns="urn:cablelabs:iptvservices:esam:xsd:signal:1"
  xmlns:sig="urn:cablelabs:md:xsd:signaling:3.0"
  xmlns:core="urn:cablelabs:md:xsd:core:3.0"
  xmlns:common="urn:cablelabs:iptvservices:esam:xsd:common:1">
  <common:StatusCode classCode="{code}">
    <core:Note>{note}</core:Note>
  </common:StatusCode>
  <ResponseSignal action="{action}" acquisitionPointIdentity="{point}" acquisitionSignalID="{signal}"{time}{zone}>
    {utc}
    {binary}
    {stream_times}
  </ResponseSignal>
</SignalProcessingNotification>
"#,
        code = disposition.status_code,
        note = xml_escape(&disposition.status_note),
        action = disposition.action.as_str(),
        point = xml_escape(&event.acquisition_point_identity),
        signal = xml_escape(&event.acquisition_signal_id),
        time = optional("acquisitionTime", &event.acquisition_time),
        zone = optional("zoneIdentity", &event.zone_identity),
    ).trim().to_string()
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<SignalProcessingEvent xmlns="urn:cablelabs:iptvservices:esam:xsd:signal:1"
    xmlns:sig="urn:cablelabs:md:xsd:signaling:3.0">
  <AcquiredSignal acquisitionPointIdentity="ESAM_POINT_1" acquisitionSignalID="sig-0001"
      acquisitionTime="2024-06-01T12:00:00Z" zoneIdentity="zone-a">
    <sig:UTCPoint utcPoint="2024-06-01T12:00:00Z"/>
    <sig:BinaryData signalType="SCTE35">/DAWAAAAAAAAAP/wBQb+Qjo1vQAAuwxz9A==</sig:BinaryData>
    <sig:StreamTimes>
      <sig:StreamTime timeType="HSS" timeValue="1111111101"/>
    </sig:StreamTimes>
  </AcquiredSignal>
</SignalProcessingEvent>"#;

    fn disposition(action: Action, cue_bytes: Option<Vec<u8>>) -> Disposition {
        Disposition { action, cue_bytes, status_code: 0, status_note: "rule matched & applied".into() }
    }

    #[test]
    fn parses_acquired_signal() {
        let ev = parse_signal_event(SPE).unwrap();
        assert_eq!(ev.acquisition_point_identity, "ESAM_POINT_1");
        assert_eq!(ev.acquisition_signal_id, "sig-0001");
        assert_eq!(ev.zone_identity.as_deref(), Some("zone-a"));
        assert_eq!(ev.utc_point.as_deref(), Some("2024-06-01T12:00:00Z"));
        assert_eq!(ev.signal_type.as_deref(), Some("SCTE35"));
        assert_eq!(ev.stream_times, vec![StreamTime { time_type: "HSS".into(), time_value: "1111111101".into() }]);
        assert_eq!(ev.cue_bytes().len(), 25);
    }

    #[test]
    fn bad_base64_yields_no_bytes() {
        let ev = SignalEvent { binary_data: Some("!!not base64!!".into()), ..SignalEvent::default() };
        assert!(ev.cue_bytes().is_empty());
        assert!(SignalEvent::default().cue_bytes().is_empty());
    }

    #[test]
    fn rejects_missing_id_and_broken_xml() {
        let no_id = r#"<SignalProcessingEvent><AcquiredSignal acquisitionPointIdentity="p"/></SignalProcessingEvent>"#;
        assert_eq!(parse_signal_event(no_id), Err(EsamError::MissingSignalId));
        assert!(matches!(parse_signal_event("<a><b></a>"), Err(EsamError::Xml(_))));
        assert!(matches!(parse_signal_event("plain text"), Err(EsamError::Xml(_))));
    }

    #[test]
    fn replace_carries_new_cue_and_echoes_identity() {
        let ev = parse_signal_event(SPE).unwrap();
        let xml = build_notification(&ev, &disposition(Action::Replace, Some(vec![0xFC, 0x30, 0x00])));
        assert!(xml.contains(r#"<common:StatusCode classCode="0">"#));
        assert!(xml.contains("<core:Note>rule matched &amp; applied</core:Note>"));
        assert!(xml.contains(r#"action="replace" acquisitionPointIdentity="ESAM_POINT_1" acquisitionSignalID="sig-0001" acquisitionTime="2024-06-01T12:00:00Z" zoneIdentity="zone-a""#));
        assert!(xml.contains(r#"<sig:BinaryData signalType="SCTE35">/DAA</sig:BinaryData>"#));
        assert!(xml.contains(r#"<sig:StreamTime timeType="HSS" timeValue="1111111101"/>"#));
        assert!(xml.contains(r#"<sig:UTCPoint utcPoint="2024-06-01T12:00:00Z"/>"#));

        // The response parses back with the same identity.
        let back = parse_signal_event(&xml.replace("ResponseSignal", "AcquiredSignal")).unwrap();
        assert_eq!(back.acquisition_signal_id, "sig-0001");
    }

    #[test]
    fn noop_echoes_original_and_delete_carries_none() {
        let ev = parse_signal_event(SPE).unwrap();
        let noop = build_notification(&ev, &disposition(Action::Noop, None));
        assert!(noop.contains("/DAWAAAAAAAAAP/wBQb+Qjo1vQAAuwxz9A=="));
        let delete = build_notification(&ev, &Disposition { status_code: 2, ..disposition(Action::Delete, None) });
        assert!(!delete.contains("BinaryData"));
        assert!(delete.contains(r#"classCode="2""#));
    }
}
