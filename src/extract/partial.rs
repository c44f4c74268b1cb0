//! Best-effort extraction of complete inner items from an envelope that is
//! still arriving. The outer object is not yet closed, so whole-document
//! parsing is impossible; instead each shape has a pattern that only matches
//! a fully formed item. Items still being typed fail the pattern and are
//! omitted until complete, which makes repeated calls on a growing buffer
//! monotonic: reported items never disappear or change.

use std::sync::OnceLock;

use regex::Regex;

use crate::types::{Question, RepairData, RepairPlan, Task};

fn task_item_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\{"id":"(\d+)","name":"([^"]+)","desc":"([^"]+)"\}"#)
            .expect("static pattern")
    })
}

fn question_item_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\{"id":"(\d+)","question":"([^"]+)","options":\[([^\]]+)\]\}"#)
            .expect("static pattern")
    })
}

fn quoted_string_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""([^"]+)""#).expect("static pattern"))
}

fn repair_item_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"\{"fault":"([^"]+)","solution":"([^"]+)"(?:,"steps":\[([^\]]*)\])?(?:,"time":"([^"]*)")?(?:,"difficulty":"([^"]*)")?\}"#,
        )
        .expect("static pattern")
    })
}

/// Tasks whose `id`, `name` and `desc` have all fully arrived.
pub fn parse_streaming_tasks(content: &str) -> Vec<Task> {
    task_item_re()
        .captures_iter(content)
        .map(|cap| Task {
            id: cap[1].to_string(),
            name: cap[2].to_string(),
            desc: cap[3].to_string(),
            related_cases: None,
        })
        .collect()
}

/// Questions whose options array has fully arrived.
pub fn parse_streaming_questions(content: &str) -> Vec<Question> {
    question_item_re()
        .captures_iter(content)
        .map(|cap| Question {
            id: cap[1].to_string(),
            question: cap[2].to_string(),
            options: quoted_strings(&cap[3]),
        })
        .collect()
}

fn quoted_strings(raw: &str) -> Vec<String> {
    quoted_string_re()
        .captures_iter(raw)
        .map(|cap| cap[1].to_string())
        .collect()
}

/// Extract whatever parts of a repair envelope have arrived. The envelope
/// comes in two shapes; `"data":[` distinguishes the array form (one object
/// per fault, matched whole) from the single-object form (each field
/// independently optional so the card renders field by field).
pub fn parse_streaming_repair(content: &str) -> Option<RepairData> {
    if content.contains(r#""data":["#) {
        let plans: Vec<RepairPlan> = repair_item_re()
            .captures_iter(content)
            .map(|cap| RepairPlan {
                fault: Some(cap[1].to_string()),
                solution: Some(cap[2].to_string()),
                steps: cap.get(3).map(|m| quoted_strings(m.as_str())).filter(|s| !s.is_empty()),
                time: cap.get(4).map(|m| m.as_str().to_string()).filter(|s| !s.is_empty()),
                difficulty: cap.get(5).map(|m| m.as_str().to_string()).filter(|s| !s.is_empty()),
                ..Default::default()
            })
            .collect();
        if plans.is_empty() {
            None
        } else {
            Some(RepairData::Many(plans))
        }
    } else {
        let plan = RepairPlan {
            fault: field_value(content, "fault"),
            solution: field_value(content, "solution"),
            steps: partial_steps(content),
            time: field_value(content, "time"),
            difficulty: field_value(content, "difficulty"),
            ..Default::default()
        };
        if plan == RepairPlan::default() {
            None
        } else {
            Some(RepairData::One(plan))
        }
    }
}

const PLAN_FIELDS: [&str; 4] = ["fault", "solution", "time", "difficulty"];

fn plan_field_res() -> &'static [(&'static str, Regex)] {
    static RES: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    RES.get_or_init(|| {
        PLAN_FIELDS
            .into_iter()
            .map(|field| {
                let re = Regex::new(&format!(r#""{field}"\s*:\s*"([^"]+)""#))
                    .expect("static pattern");
                (field, re)
            })
            .collect()
    })
}

fn field_value(content: &str, field: &str) -> Option<String> {
    let (_, re) = plan_field_res().iter().find(|(name, _)| *name == field)?;
    re.captures(content).map(|cap| cap[1].to_string())
}

/// The steps array may itself be mid-transmission; complete items inside it
/// are extracted one by one.
fn partial_steps(content: &str) -> Option<Vec<String>> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r#""steps"\s*:\s*\[([\s\S]*?)(?:\]|$)"#).expect("static pattern")
    });
    let inner = re.captures(content)?;
    let steps = quoted_strings(&inner[1]);
    if steps.is_empty() {
        None
    } else {
        Some(steps)
    }
}
