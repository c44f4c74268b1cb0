//! Attaches historical repair cases to task envelopes before they reach the
//! client. The case store is an in-process fixture keyed by fault category.

use tracing::{debug, warn};

use crate::extract::{find_first, splice, Envelope, EnvelopeKind};
use crate::types::{HistoricalCase, Task};

fn case(
    id: &str,
    date: &str,
    vehicle_model: &str,
    plate_number: &str,
    fault_description: &str,
    solution: &str,
    repair_time: &str,
    cost: &str,
    technician: &str,
) -> HistoricalCase {
    HistoricalCase {
        id: id.to_string(),
        date: date.to_string(),
        vehicle_model: vehicle_model.to_string(),
        plate_number: plate_number.to_string(),
        fault_description: fault_description.to_string(),
        solution: solution.to_string(),
        repair_time: repair_time.to_string(),
        cost: cost.to_string(),
        technician: technician.to_string(),
    }
}

fn vvt_cases() -> Vec<HistoricalCase> {
    vec![
        case(
            "case-001",
            "2024-01-15",
            "传祺GS4 2020款",
            "粤B88888",
            "VVT执行器卡滞，冷车启动时有异响，热车后消失",
            "更换VVT执行器，清洗机油道，更换机油和机滤",
            "2.5小时",
            "¥1,200",
            "张师傅",
        ),
        case(
            "case-002",
            "2024-02-20",
            "传祺GS8 2021款",
            "粤A66666",
            "VVT执行器故障，发动机故障灯亮，怠速不稳",
            "更换VVT执行器总成，重置故障码",
            "3小时",
            "¥1,500",
            "李师傅",
        ),
        case(
            "case-003",
            "2024-03-10",
            "传祺GA6 2019款",
            "粤C12345",
            "VVT系统异常，加速无力，油耗增加",
            "清洗VVT执行器，更换机油，调整正时",
            "2小时",
            "¥800",
            "王师傅",
        ),
    ]
}

fn oil_pressure_cases() -> Vec<HistoricalCase> {
    vec![
        case(
            "case-004",
            "2024-01-25",
            "传祺GS4 2019款",
            "粤D99999",
            "机油压力低，仪表盘机油灯亮",
            "更换机油泵，检查机油管路，更换机油",
            "4小时",
            "¥2,000",
            "赵师傅",
        ),
        case(
            "case-005",
            "2024-02-15",
            "传祺GS8 2020款",
            "粤E55555",
            "机油压力传感器故障，机油压力显示异常",
            "更换机油压力传感器，清洗传感器接口",
            "1小时",
            "¥500",
            "孙师傅",
        ),
    ]
}

fn timing_chain_cases() -> Vec<HistoricalCase> {
    vec![case(
        "case-006",
        "2024-03-05",
        "传祺GS4 2018款",
        "粤F77777",
        "正时链条松弛，发动机异响，加速无力",
        "更换正时链条套件，调整正时，更换张紧器",
        "6小时",
        "¥3,500",
        "周师傅",
    )]
}

fn ignition_cases() -> Vec<HistoricalCase> {
    vec![
        case(
            "case-007",
            "2024-02-28",
            "传祺GA6 2020款",
            "粤G33333",
            "点火线圈故障，发动机抖动，加速不畅",
            "更换点火线圈，检查火花塞，清洗节气门",
            "2小时",
            "¥900",
            "吴师傅",
        ),
        case(
            "case-008",
            "2024-03-12",
            "传祺GS8 2019款",
            "粤H44444",
            "火花塞老化，冷车启动困难，怠速抖动",
            "更换全套火花塞，清洗喷油嘴",
            "1.5小时",
            "¥600",
            "郑师傅",
        ),
    ]
}

/// Match a task name against the fault categories. Checks run in a fixed
/// order and the first hit wins, so a name mentioning both VVT and oil
/// pressure gets the VVT cases.
pub fn related_cases(task_name: &str) -> Vec<HistoricalCase> {
    let name = task_name.to_lowercase();

    if name.contains("vvt") || name.contains("可变气门") {
        return vvt_cases();
    }
    if name.contains("机油压力") || name.contains("油压") {
        return oil_pressure_cases();
    }
    if name.contains("正时") || name.contains("链条") {
        return timing_chain_cases();
    }
    if name.contains("点火") || name.contains("火花塞") || name.contains("线圈") {
        return ignition_cases();
    }

    Vec::new()
}

/// Attach cases to every task (an empty list is still attached, so the
/// field always serializes) and order tasks by case count, most first.
/// Equal counts keep the model's original order.
pub fn enrich_tasks(tasks: &mut [Task]) {
    for task in tasks.iter_mut() {
        task.related_cases = Some(related_cases(&task.name));
    }
    tasks.sort_by(|a, b| {
        let count = |t: &Task| t.related_cases.as_ref().map_or(0, Vec::len);
        count(b).cmp(&count(a))
    });
}

/// The enriched text plus the standalone envelope JSON that goes out as the
/// dedicated `enriched` stream event.
pub struct EnrichedResponse {
    pub content: String,
    pub envelope_json: String,
}

/// Find the first tasks envelope in `content`, enrich its tasks, and splice
/// the reserialized envelope back over the exact byte span of the original.
/// Text outside the span is untouched. Any failure leaves the response as
/// delivered by the model.
pub fn enrich_response(content: &str) -> Option<EnrichedResponse> {
    if !content.contains(EnvelopeKind::Tasks.prefix()) {
        return None;
    }

    let (envelope, span) = find_first(content, EnvelopeKind::Tasks)?;
    let (mut data, feedbacks) = match envelope {
        Envelope::Tasks { data, feedbacks } => (data, feedbacks),
        _ => return None,
    };

    enrich_tasks(&mut data);
    debug!(
        tasks = data.len(),
        "attached historical cases to task envelope"
    );

    let envelope_json = match serde_json::to_string(&Envelope::Tasks { data, feedbacks }) {
        Ok(json) => json,
        Err(error) => {
            warn!("failed to reserialize enriched tasks: {error}");
            return None;
        }
    };
    let enriched = splice(content, &span, &envelope_json);

    Some(EnrichedResponse {
        content: enriched,
        envelope_json,
    })
}
