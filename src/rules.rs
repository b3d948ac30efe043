// src/rules.rs
//! Rule evaluation for one channel and one cue.
//!
//! Only the first configured rule is tested. A miss falls through to the
//! channel's descriptor priority list, then to its default behaviour.

use tracing::{debug, warn};

use crate::cue::*;
use crate::error::{ConditionError, RuleError};
use crate::fields::{self, scalar_text, Field, Scope, Value};
use crate::models::{ChannelConfig, Condition, RebuildDefaults, Rule, RuleType};
use crate::scte35;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Deleted,
    Replaced {
        cue: Cue,
        bytes: Vec<u8>,
        /// Break ticks announced by the cue. A converted splice_insert keeps
        /// its own break duration here.
        announced_break: Option<u64>,
    },
    DefaultBehavior,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub outcome: Outcome,
    pub note: String,
    /// Failures that degraded this evaluation, in the order they occurred.
    pub errors: Vec<ConditionError>,
}

impl Evaluation {
    fn new(outcome: Outcome, note: impl Into<String>) -> Self {
        Self { outcome, note: note.into(), errors: Vec::new() }
    }

    fn degraded(outcome: Outcome, error: ConditionError) -> Self {
        Self { outcome, note: error.to_string(), errors: vec![error] }
    }

    pub fn is_degraded(&self) -> bool { !self.errors.is_empty() }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator { Eq, Ne, Gt, Lt, Range }

impl Operator {
    pub fn parse(op: &str) -> Result<Self, RuleError> {
        Ok(match op.trim() {
            "=" | "==" => Operator::Eq,
            "!=" => Operator::Ne,
            ">" => Operator::Gt,
            "<" => Operator::Lt,
            "-" => Operator::Range,
            other => return Err(RuleError::UnknownOperator(other.to_string())),
        })
    }
}

/// One member of a condition's OR set.
enum Target {
    Scalar(Value),
    /// Exclusive bounds.
    Between(Value, Value),
}

pub fn evaluate(config: &ChannelConfig, raw: &[u8]) -> Evaluation {
    let Some(rule) = config.rules.first() else {
        return Evaluation::new(Outcome::DefaultBehavior, "no rules configured");
    };

    let decoded = match scte35::decode(raw) {
        Ok(d) => d,
        Err(e) => {
            warn!("decode failed: {}", e);
            return Evaluation::degraded(Outcome::DefaultBehavior, ConditionError::MalformedCue(e));
        }
    };
    let mut cue = decoded.cue;
    let template = config.rebuild_defaults();

    let matched = match condition_holds(&rule.condition, &cue) {
        Ok(m) => m,
        Err(e) => {
            warn!("rule condition on '{}' rejected: {}", rule.condition.property, e);
            return Evaluation::degraded(Outcome::DefaultBehavior, ConditionError::InvalidRuleReference(e));
        }
    };
    debug!(
        "condition {} {} {} => {}",
        rule.condition.property, rule.condition.operator, rule.condition.value, matched
    );

    if matched {
        return match rule.kind {
            RuleType::Delete => Evaluation::new(Outcome::Deleted, "rule matched: delete"),
            RuleType::Replace => replace(rule, cue, &template),
        };
    }

    let Some(priority) = config.descriptor_priority.as_deref() else {
        return Evaluation::new(Outcome::DefaultBehavior, "no rule matched");
    };
    match select_by_priority(&cue, priority) {
        Err(e) => {
            warn!("descriptor_priority '{}' rejected: {}", priority, e);
            Evaluation::degraded(Outcome::DefaultBehavior, ConditionError::InvalidRuleReference(e))
        }
        Ok(None) => Evaluation::new(Outcome::DefaultBehavior, "no rule matched"),
        Ok(Some(idx)) => {
            let kept = cue.descriptors.swap_remove(idx);
            let type_id = kept.as_segmentation().map_or(0, |s| s.segmentation_type_id);
            cue.descriptors = vec![kept];
            let break_ticks = insert_break(&cue);
            rebuild(&mut cue, &template, &[]);
            let note = format!(
                "descriptor priority selected 0x{type_id:02X} ({})",
                scte35::segmentation_type_name(type_id)
            );
            finish(cue, Evaluation::new(Outcome::DefaultBehavior, note), break_ticks)
        }
    }
}

/// True if any OR member of the condition matches any value the cue holds
/// for the property.
pub fn condition_holds(cond: &Condition, cue: &Cue) -> Result<bool, RuleError> {
    let field = Field::from_name(&cond.property)?;
    let op = Operator::parse(&cond.operator)?;
    let text = scalar_text(&cond.value).ok_or_else(|| coercion(field, &cond.value.to_string()))?;

    let targets = text
        .split(',')
        .map(|member| parse_target(field, op, member))
        .collect::<Result<Vec<_>, _>>()?;
    let actual = fields::read(cue, field);
    debug!("{} reads {:?}", field, actual);

    Ok(targets.iter().any(|t| actual.iter().any(|v| target_matches(op, v, t))))
}

fn coercion(field: Field, raw: &str) -> RuleError {
    RuleError::Coercion { property: field.name().to_string(), value: raw.to_string(), expected: "a scalar" }
}

fn parse_target(field: Field, op: Operator, member: &str) -> Result<Target, RuleError> {
    if op != Operator::Range {
        return Ok(Target::Scalar(Value::coerce(field, member)?));
    }
    let (lo, hi) = member.trim().split_once('-').ok_or_else(|| RuleError::Coercion {
        property: field.name().to_string(),
        value: member.to_string(),
        expected: "a min-max range",
    })?;
    Ok(Target::Between(Value::coerce(field, lo)?, Value::coerce(field, hi)?))
}

fn target_matches(op: Operator, actual: &Value, target: &Target) -> bool {
    use std::cmp::Ordering::*;
    match (op, target) {
        (Operator::Range, Target::Between(lo, hi)) => {
            actual.compare(lo) == Some(Greater) && actual.compare(hi) == Some(Less)
        }
        (_, Target::Scalar(want)) => match (op, actual.compare(want)) {
            (Operator::Eq, Some(o)) => o == Equal,
            (Operator::Ne, Some(o)) => o != Equal,
            (Operator::Gt, Some(o)) => o == Greater,
            (Operator::Lt, Some(o)) => o == Less,
            _ => false,
        },
        _ => false,
    }
}

fn replace(rule: &Rule, mut cue: Cue, template: &RebuildDefaults) -> Evaluation {
    if rule.replace_params.is_empty() {
        return Evaluation::degraded(
            Outcome::DefaultBehavior,
            ConditionError::InvalidRuleReference(RuleError::MissingReplaceParams),
        );
    }

    let mut eval = Evaluation::new(Outcome::DefaultBehavior, "rule matched: replace");
    let mut collected: Vec<(Field, Value)> = Vec::new();
    let mut skipped: Vec<String> = Vec::new();
    for (i, param) in rule.replace_params.iter().enumerate() {
        if let Err(e) = apply_param(&mut cue, param, template, &mut collected) {
            warn!("replace_params[{}] skipped: {}", i, e);
            skipped.push(format!("replace_params[{i}] skipped: {e}"));
            eval.errors.push(ConditionError::InvalidRuleReference(e));
        }
    }
    if !skipped.is_empty() {
        eval.note = format!("{}; {}", eval.note, skipped.join("; "));
    }

    let break_ticks = insert_break(&cue);
    rebuild(&mut cue, template, &collected);
    finish(cue, eval, break_ticks)
}

fn apply_param(
    cue: &mut Cue,
    param: &serde_json::Map<String, serde_json::Value>,
    template: &RebuildDefaults,
    collected: &mut Vec<(Field, Value)>,
) -> Result<(), RuleError> {
    let mut entries = param.iter();
    let (Some((name, raw)), None) = (entries.next(), entries.next()) else {
        return Err(RuleError::MalformedParam(param.len()));
    };
    let field = Field::from_name(name)?;
    if field.read_only() {
        return Err(RuleError::ReadOnly { property: field.name().to_string() });
    }
    let text = scalar_text(raw).ok_or_else(|| coercion(field, &raw.to_string()))?;
    let value = Value::coerce(field, &text)?;

    if field.scope() != Scope::Descriptor {
        return fields::write(cue, field, &value);
    }

    let mut carried = false;
    for d in cue.descriptors.iter_mut().filter(|d| fields::carried_by(d, field)) {
        fields::write_descriptor(d, field, &value)?;
        carried = true;
    }
    if !carried {
        if field == Field::ProviderAvailId {
            return Err(RuleError::NotCarried { property: field.name().to_string(), carrier: "any avail_descriptor" });
        }
        // Check against the template now so a bad value is reported here.
        fields::write_segmentation(&mut template.descriptor(), field, &value)?;
        collected.push((field, value));
    }
    Ok(())
}

/// Reshapes a matched cue for re-emission: converts a scheduled
/// splice_insert into a time_signal and appends a template descriptor
/// carrying any collected fields after the descriptors already present.
///
/// A converted insert's break duration moves onto every segmentation
/// descriptor that has no duration of its own.
fn rebuild(cue: &mut Cue, template: &RebuildDefaults, collected: &[(Field, Value)]) {
    let has_segmentation = cue.segmentation_descriptors().next().is_some();
    let mut fresh = (!collected.is_empty()).then(|| template.descriptor());

    if let SpliceCommand::SpliceInsert(si) = &cue.command {
        if !si.splice_immediate_flag {
            let break_duration = si.duration_flag.then_some(si.break_duration);
            if !has_segmentation {
                fresh = Some(descriptor_for_insert(si, template));
            }
            let time = cue.command.splice_time().unwrap_or_default();
            debug!("converting splice_insert {} to time_signal", si.splice_event_id);
            cue.command = SpliceCommand::TimeSignal(time);
            if let Some(ticks) = break_duration {
                carry_break(cue, ticks);
            }
        }
    }

    if let Some(mut d) = fresh {
        for (field, value) in collected {
            if let Err(e) = fields::write_segmentation(&mut d, *field, value) {
                warn!("{} not applied to rebuilt descriptor: {}", field, e);
            }
        }
        cue.descriptors.push(SpliceDescriptor::Segmentation(d));
    }
}

fn insert_break(cue: &Cue) -> Option<u64> {
    match &cue.command {
        SpliceCommand::SpliceInsert(si) if si.duration_flag => Some(si.break_duration),
        _ => None,
    }
}

fn carry_break(cue: &mut Cue, ticks: u64) {
    for d in cue.descriptors.iter_mut() {
        if let SpliceDescriptor::Segmentation(s) = d {
            if !s.segmentation_duration_flag {
                s.segmentation_duration_flag = true;
                s.segmentation_duration = ticks;
            }
        }
    }
}

fn descriptor_for_insert(si: &SpliceInsert, template: &RebuildDefaults) -> SegmentationDescriptor {
    let mut d = template.descriptor();
    d.segmentation_event_id = si.splice_event_id;
    d.segmentation_event_cancel_indicator = si.splice_event_cancel_indicator;
    if si.out_of_network_indicator {
        d.segmentation_type_id = 0x34;
        if si.duration_flag {
            d.segmentation_duration_flag = true;
            d.segmentation_duration = si.break_duration;
        }
    } else {
        d.segmentation_type_id = 0x35;
        d.segmentation_duration_flag = false;
        d.segmentation_duration = 0;
    }
    d
}

fn finish(mut cue: Cue, mut eval: Evaluation, insert_break: Option<u64>) -> Evaluation {
    match scte35::encode(&mut cue) {
        Ok(bytes) => {
            let announced_break = insert_break.or_else(|| cue.announced_break());
            eval.outcome = Outcome::Replaced { cue, bytes, announced_break };
            eval
        }
        Err(e) => {
            warn!("encode failed: {}", e);
            let mut failed = Evaluation::degraded(Outcome::DefaultBehavior, ConditionError::EncodeFailure(e));
            eval.errors.append(&mut failed.errors);
            failed.errors = eval.errors;
            failed
        }
    }
}

/// Index of the descriptor chosen by `list`, scanned in configured order.
pub fn select_by_priority(cue: &Cue, list: &str) -> Result<Option<usize>, RuleError> {
    for member in list.split(',').filter(|m| !m.trim().is_empty()) {
        let Value::Int(want) = Value::coerce(Field::SegmentationTypeId, member)? else { continue };
        let found = cue.descriptors.iter().position(|d| {
            d.as_segmentation().is_some_and(|s| s.segmentation_type_id as i64 == want)
        });
        if found.is_some() {
            return Ok(found);
        }
    }
    Ok(None)
}
