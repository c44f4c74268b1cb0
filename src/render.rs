//! Server-side mirror of the client's incremental renderer. Classifies an
//! in-flight buffer into prose plus at most one structured fragment, so the
//! same view logic can be tested without a browser.

use crate::extract::{
    extract_envelope, parse_streaming_questions, parse_streaming_repair, parse_streaming_tasks,
    Envelope, EnvelopeKind,
};
use crate::types::{Question, RepairData, Task};

/// The structured part of an in-flight message. At most one fragment is
/// active at a time; `VehicleLoading` replaces the prose entirely because a
/// half-typed vehicle record is never worth showing.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFragment {
    None,
    VehicleLoading,
    PartialQuestions(Vec<Question>),
    PartialTasks(Vec<Task>),
    PartialRepair(RepairData),
    Complete(Envelope),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamView {
    pub prose: String,
    pub fragment: StreamFragment,
}

/// Classify a growing buffer. Growth is monotonic: prose only extends and a
/// fragment's item count never shrinks as more bytes arrive, until the
/// envelope completes and the fragment flips to `Complete`.
pub fn render_streaming(content: &str) -> StreamView {
    let extracted = extract_envelope(content);

    if let Some(envelope) = extracted.envelope {
        let mut prose = extracted.before_text;
        if !extracted.after_text.is_empty() {
            if !prose.is_empty() {
                prose.push('\n');
            }
            prose.push_str(&extracted.after_text);
        }
        return StreamView {
            prose,
            fragment: StreamFragment::Complete(envelope),
        };
    }

    let typing_json = content.contains("{\"type\":");
    if !typing_json {
        return StreamView {
            prose: extracted.before_text,
            fragment: StreamFragment::None,
        };
    }

    if content.contains(EnvelopeKind::Vehicle.prefix()) {
        return StreamView {
            prose: String::new(),
            fragment: StreamFragment::VehicleLoading,
        };
    }

    if content.contains("\"question\"") {
        let questions = parse_streaming_questions(content);
        if !questions.is_empty() {
            return StreamView {
                prose: extracted.before_text,
                fragment: StreamFragment::PartialQuestions(questions),
            };
        }
    }

    if content.contains("\"name\"") {
        let tasks = parse_streaming_tasks(content);
        if !tasks.is_empty() {
            return StreamView {
                prose: extracted.before_text,
                fragment: StreamFragment::PartialTasks(tasks),
            };
        }
    }

    if content.contains(EnvelopeKind::Repair.prefix()) {
        if let Some(repair) = parse_streaming_repair(content) {
            return StreamView {
                prose: extracted.before_text,
                fragment: StreamFragment::PartialRepair(repair),
            };
        }
    }

    StreamView {
        prose: extracted.before_text,
        fragment: StreamFragment::None,
    }
}

/// View of a settled message: surrounding prose plus the parsed envelope
/// with any sideband fields the client wrote back.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageView {
    pub before_text: String,
    pub after_text: String,
    pub envelope: Option<Envelope>,
}

pub fn render_final(content: &str) -> MessageView {
    let extracted = extract_envelope(content);
    MessageView {
        before_text: extracted.before_text,
        after_text: extracted.after_text,
        envelope: extracted.envelope,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TASKS_REPLY: &str = "先做这些检查：{\"type\":\"tasks\",\"data\":[{\"id\":\"1\",\"name\":\"读取故障码\",\"desc\":\"用诊断仪读取\"},{\"id\":\"2\",\"name\":\"检查火花塞\",\"desc\":\"拆下检查电极\"}]}完成后反馈。";

    #[test]
    fn plain_prose_stays_text() {
        let view = render_streaming("机油灯亮通常说明油压偏低。");
        assert_eq!(view.prose, "机油灯亮通常说明油压偏低。");
        assert_eq!(view.fragment, StreamFragment::None);
    }

    #[test]
    fn half_typed_vehicle_json_becomes_a_loading_state() {
        let view = render_streaming("{\"type\":\"vehicle\",\"data\":{\"vin\":\"LSV");
        assert_eq!(view.fragment, StreamFragment::VehicleLoading);
        assert!(view.prose.is_empty());
    }

    #[test]
    fn partial_tasks_surface_as_they_complete() {
        // Buffer cut inside the second task: only the first is shown.
        let cut = "排查：{\"type\":\"tasks\",\"data\":[{\"id\":\"1\",\"name\":\"读取故障码\",\"desc\":\"用诊断仪读取\"},{\"id\":\"2\",\"na";
        let view = render_streaming(cut);
        assert_eq!(view.prose, "排查：");
        match view.fragment {
            StreamFragment::PartialTasks(tasks) => {
                assert_eq!(tasks.len(), 1);
                assert_eq!(tasks[0].name, "读取故障码");
            }
            other => panic!("unexpected fragment: {other:?}"),
        }
    }

    #[test]
    fn completed_envelope_flips_to_complete() {
        let view = render_streaming(TASKS_REPLY);
        assert!(matches!(view.fragment, StreamFragment::Complete(Envelope::Tasks { .. })));
        assert!(view.prose.contains("先做这些检查："));
        assert!(view.prose.contains("完成后反馈。"));
    }

    #[test]
    fn growth_is_monotonic_char_by_char() {
        let mut max_tasks = 0;
        for (idx, _) in TASKS_REPLY.char_indices().skip(1) {
            let view = render_streaming(&TASKS_REPLY[..idx]);
            let count = match view.fragment {
                StreamFragment::PartialTasks(ref tasks) => tasks.len(),
                StreamFragment::Complete(Envelope::Tasks { ref data, .. }) => data.len(),
                _ => continue,
            };
            assert!(count >= max_tasks, "task count shrank at byte {idx}");
            max_tasks = count;
        }
        assert_eq!(max_tasks, 2);
    }

    #[test]
    fn final_view_exposes_sideband_fields() {
        let content = "{\"type\":\"questions\",\"data\":[{\"id\":\"1\",\"question\":\"机油状态？\",\"options\":[\"正常\",\"缺少\"]}],\"answers\":[{\"questionId\":\"1\",\"answer\":\"正常\"}]}";
        let view = render_final(content);
        match view.envelope {
            Some(Envelope::Questions { answers, .. }) => {
                assert_eq!(answers.unwrap()[0].answer, "正常");
            }
            other => panic!("unexpected envelope: {other:?}"),
        }
    }
}
