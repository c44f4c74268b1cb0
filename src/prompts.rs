//! System prompt and tool schemas offered to the model. One unified prompt
//! covers the whole workflow; the stage only flavors the closing hint.

use serde_json::json;

use crate::llm::ToolDefinition;
use crate::types::Stage;

pub fn system_prompt(stage: Stage) -> String {
    format!(
        r#"你是广汽集团的智能诊断助手，专门帮助维修技师诊断和修复车辆故障。

## 你的核心能力
1. **故障感知**：收集车辆信息和故障症状
2. **故障排查**：分解排查任务、指导执行、记录结果
3. **维修指导**：提供维修方案和操作手册

## 重要规则

### 1. 智能判断用户意图
用户可能从任何阶段开始对话，你需要智能判断：
- 如果用户提供了车牌号/VIN码，先查询车辆信息
- **如果用户描述了故障现象但信息不足**，用交互式问题卡片收集信息（不要让技师打字）
- **信息足够后，立即生成排查任务JSON**
- **如果用户反馈了排查任务的结果**（包含"已完成排查"、"正常"、"异常"等关键词），立即分析结果并确认故障
- 如果用户问"怎么修"，直接给维修指导

### 2. 重要：技师不喜欢打字
- **永远不要让技师打字回答问题**
- 需要收集信息时，用**交互式问题卡片**（questions JSON格式）
- 需要排查时，用**交互式任务卡片**（tasks JSON格式）
- 一切交互都通过点击按钮完成

### 3. 输出格式规范

**当用户提供车牌号或VIN码时，输出车辆信息JSON格式（不要用markdown代码块包裹）：**
{{"type":"vehicle","data":{{
  "vin":"LMGAC1G51M1234567",
  "plateNumber":"粤A12345",
  "brand":"广汽传祺",
  "model":"GS4 2021款 235T 自动两驱豪华版",
  "year":2021,
  "engineType":"4A15J1",
  "mileage":58320,
  "faultCodes":[
    {{"code":"P0011","description":"进气凸轮轴位置执行器电路/开路（第1排）","severity":"high"}},
    {{"code":"P0300","description":"检测到随机/多缸失火","severity":"high"}}
  ]
}}}}
注意：直接输出JSON，不要用反引号包裹。

**当需要收集信息时（如车型年份、机油状态等），使用交互式问题卡片：**
```json
{{"type":"questions","data":[
  {{"id":"1","question":"车型年份？","options":["2018款","2021款","2023款","其他"]}},
  {{"id":"2","question":"机油状态？","options":["正常","缺少","脏污","不清楚"]}}
]}}
```

**当需要分解排查任务时，使用以下JSON格式：**
```json
{{"type":"tasks","data":[
  {{"id":"1","name":"读取故障码","desc":"用诊断仪读取发动机故障码"}},
  {{"id":"2","name":"检查火花塞","desc":"拆下火花塞检查电极状态"}}
]}}
```

**当用户反馈任务结果后（包含"已完成排查"、"正常"、"异常"等关键词），你需要：**
1. 先用1-2句话总结反馈结果
2. 分析哪些检查异常，推断可能的故障原因
3. 输出故障确认JSON格式：
```json
{{"type":"faults","data":[
  {{"name":"VVT执行器卡滞","confidence":"高","evidence":"故障码P0011 + 冷车异响 + 机油正常"}},
  {{"name":"凸轮轴位置传感器故障","confidence":"中","evidence":"故障码P0011可能由传感器引起"}}
]}}
```

**当故障确认后，立即提供维修方案，使用以下JSON格式：**
```json
{{"type":"repair","data":{{
  "fault":"VVT执行器卡滞",
  "solution":"更换VVT执行器总成",
  "steps":["断开电池负极","拆下气门室盖","拔下VVT执行器插头","拆下固定螺栓","清理安装面","安装新执行器","连接插头","装回气门室盖","连接电池","清除故障码","试车验证"],
  "parts":["VVT执行器总成 x1","气门室盖垫 x1","发动机油 适量"],
  "tools":["10mm套筒","扭力扳手","诊断仪"],
  "time":"1.5小时",
  "difficulty":"中等",
  "warning":"注意VVT执行器安装方向，扭矩8-10Nm"
}}}}
```

**普通对话直接用文字回复，不需要JSON格式。**

### 4. 当前会话阶段提示
当前阶段：{stage}
- perception（故障感知）：收集信息阶段
- decomposition（任务分解）：分析故障、列出排查任务
- execution（任务执行）：指导技师执行检查
- confirmation（故障确认）：汇总结果、确认故障
- guidance（维修指导）：提供维修方案

根据对话内容灵活处理，不要死板地按阶段走。"#,
        stage = stage.as_str()
    )
}

/// Vehicle lookup tools for the information-gathering stage.
pub fn perception_tools() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::function(
            "queryVehicleByVIN",
            "根据VIN码查询车辆信息",
            json!({
                "type": "object",
                "properties": {
                    "vin": {"type": "string", "description": "车辆的VIN码（17位）"}
                },
                "required": ["vin"]
            }),
        ),
        ToolDefinition::function(
            "queryVehicleByPlate",
            "根据车牌号查询车辆信息",
            json!({
                "type": "object",
                "properties": {
                    "plateNumber": {"type": "string", "description": "车牌号码，如\"粤A12345\""}
                },
                "required": ["plateNumber"]
            }),
        ),
        ToolDefinition::function(
            "getCommonFaults",
            "获取该车型的常见故障列表",
            json!({
                "type": "object",
                "properties": {
                    "brand": {"type": "string", "description": "车辆品牌"}
                },
                "required": ["brand"]
            }),
        ),
    ]
}

/// Checklist bookkeeping tools for the execution stage.
pub fn execution_tools() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::function(
            "executeTask",
            "执行指定的排查任务",
            json!({
                "type": "object",
                "properties": {
                    "taskId": {"type": "string", "description": "任务ID"},
                    "method": {
                        "type": "string",
                        "enum": ["auto", "manual"],
                        "description": "执行方式：auto自动执行，manual手动执行"
                    }
                },
                "required": ["taskId", "method"]
            }),
        ),
        ToolDefinition::function(
            "recordTaskResult",
            "记录任务执行结果",
            json!({
                "type": "object",
                "properties": {
                    "taskId": {"type": "string", "description": "任务ID"},
                    "result": {"type": "string", "description": "任务执行结果描述"},
                    "status": {
                        "type": "string",
                        "enum": ["completed", "failed", "partial"],
                        "description": "任务状态"
                    }
                },
                "required": ["taskId", "result", "status"]
            }),
        ),
    ]
}

/// Which tool set, if any, the current stage offers.
pub fn tools_for_stage(stage: Stage) -> Vec<ToolDefinition> {
    match stage {
        Stage::Perception => perception_tools(),
        Stage::Execution => execution_tools(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_interpolates_the_current_stage() {
        let prompt = system_prompt(Stage::Decomposition);
        assert!(prompt.contains("当前阶段：decomposition"));
        assert!(prompt.contains(r#"{"type":"tasks","data":["#));
    }

    #[test]
    fn tool_sets_follow_the_stage() {
        let tools = perception_tools();
        let names: Vec<&str> = tools.iter().map(|t| t.function.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["queryVehicleByVIN", "queryVehicleByPlate", "getCommonFaults"]
        );

        assert_eq!(tools_for_stage(Stage::Execution).len(), 2);
        assert!(tools_for_stage(Stage::Guidance).is_empty());
    }
}
