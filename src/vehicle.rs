//! Mock vehicle registry. Three fixed records back the demo VINs; every
//! other lookup fabricates a plausible vehicle so the workflow never stalls
//! on an unknown identifier.

use chrono::{Duration, Utc};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::types::{FaultCode, Severity, VehicleInfo};

fn fault_code(code: &str, description: &str, severity: Severity) -> FaultCode {
    FaultCode {
        code: code.to_string(),
        description: description.to_string(),
        severity,
    }
}

fn known_vehicles() -> Vec<VehicleInfo> {
    vec![
        VehicleInfo {
            vin: "LSVAG2180E2100001".to_string(),
            plate_number: Some("粤A12345".to_string()),
            brand: "大众".to_string(),
            model: "帕萨特 1.8T".to_string(),
            year: 2014,
            engine_type: "EA888 1.8T".to_string(),
            mileage: Some(85000),
            last_maintenance: Some("2024-08-15".to_string()),
            fault_codes: Some(vec![
                fault_code("P0011", "进气凸轮轴位置执行器电路/开路（第1排）", Severity::High),
                fault_code("P0300", "检测到随机/多缸失火", Severity::High),
                fault_code("P0171", "系统过稀（第1排）", Severity::Medium),
            ]),
        },
        VehicleInfo {
            vin: "LHGCR1640H8000002".to_string(),
            plate_number: Some("粤B67890".to_string()),
            brand: "本田".to_string(),
            model: "雅阁 2.4L".to_string(),
            year: 2017,
            engine_type: "K24W5 2.4L".to_string(),
            mileage: Some(62000),
            last_maintenance: Some("2024-10-20".to_string()),
            fault_codes: Some(vec![
                fault_code("P2646", "VTC执行器电路性能故障", Severity::Medium),
                fault_code("P0420", "催化转换器效率低于阈值（第1排）", Severity::Low),
            ]),
        },
        VehicleInfo {
            vin: "LFV3A28K4J3300003".to_string(),
            plate_number: Some("粤C11111".to_string()),
            brand: "奥迪".to_string(),
            model: "A4L 2.0T".to_string(),
            year: 2018,
            engine_type: "EA888 Gen3 2.0T".to_string(),
            mileage: Some(45000),
            last_maintenance: Some("2024-11-05".to_string()),
            fault_codes: Some(vec![fault_code("P0087", "燃油轨/系统压力过低", Severity::High)]),
        },
    ]
}

fn fault_code_pool() -> Vec<FaultCode> {
    vec![
        fault_code("P0011", "进气凸轮轴位置执行器电路/开路（第1排）", Severity::High),
        fault_code("P0300", "检测到随机/多缸失火", Severity::High),
        fault_code("P0171", "系统过稀（第1排）", Severity::Medium),
        fault_code("P0420", "催化转换器效率低于阈值（第1排）", Severity::Low),
        fault_code("P2646", "VTC执行器电路性能故障", Severity::Medium),
        fault_code("P0087", "燃油轨/系统压力过低", Severity::High),
        fault_code("P0128", "冷却液温度低于节温器调节温度", Severity::Low),
        fault_code("P0455", "EVAP系统泄漏检测（大泄漏）", Severity::Medium),
        fault_code("P0562", "系统电压低", Severity::Medium),
        fault_code("P0601", "内部控制模块存储器校验和错误", Severity::High),
    ]
}

/// Lookup by VIN. Unknown VINs get a generated record carrying the queried
/// VIN, so the answer always matches the question.
pub fn by_vin(vin: &str) -> VehicleInfo {
    let vin = vin.to_uppercase();
    known_vehicles()
        .into_iter()
        .find(|vehicle| vehicle.vin == vin)
        .unwrap_or_else(|| generate_vehicle(vin))
}

/// Lookup by plate number. Unknown plates get a generated record with a
/// fabricated VIN.
pub fn by_plate(plate_number: &str) -> VehicleInfo {
    let plate = plate_number.to_uppercase();
    known_vehicles()
        .into_iter()
        .find(|vehicle| vehicle.plate_number.as_deref() == Some(plate.as_str()))
        .unwrap_or_else(|| {
            let mut vehicle = generate_vehicle(generate_vin());
            vehicle.plate_number = Some(plate);
            vehicle
        })
}

fn generate_vehicle(vin: String) -> VehicleInfo {
    const BRANDS: [&str; 6] = ["大众", "本田", "丰田", "奥迪", "宝马", "奔驰"];
    const MODELS: [&str; 6] = ["帕萨特", "雅阁", "凯美瑞", "A4L", "3系", "C级"];
    const ENGINES: [&str; 6] = ["1.8T", "2.0L", "2.4L", "2.0T", "1.5T", "2.5L"];

    let mut rng = rand::thread_rng();
    let brand = BRANDS[rng.gen_range(0..BRANDS.len())];
    let model = MODELS[rng.gen_range(0..MODELS.len())];
    let engine = ENGINES[rng.gen_range(0..ENGINES.len())];

    let maintenance = Utc::now() - Duration::days(rng.gen_range(0..180));

    VehicleInfo {
        vin,
        plate_number: None,
        brand: brand.to_string(),
        model: format!("{model} {engine}"),
        year: rng.gen_range(2015..2023),
        engine_type: format!("{engine} 发动机"),
        mileage: Some(rng.gen_range(30_000..100_000)),
        last_maintenance: Some(maintenance.format("%Y-%m-%d").to_string()),
        fault_codes: Some(random_fault_codes(&mut rng)),
    }
}

fn generate_vin() -> String {
    // VINs never carry I, O, or Q.
    const CHARS: &[u8] = b"ABCDEFGHJKLMNPRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();
    let mut vin = String::from("LSV");
    for _ in 0..14 {
        vin.push(CHARS[rng.gen_range(0..CHARS.len())] as char);
    }
    vin
}

fn random_fault_codes(rng: &mut impl Rng) -> Vec<FaultCode> {
    let mut pool = fault_code_pool();
    pool.shuffle(rng);
    let count = rng.gen_range(1..=3);
    pool.truncate(count);
    pool
}

/// Known trouble spots per brand, offered as a tool result during the
/// perception stage.
pub fn common_faults(brand: &str) -> Vec<String> {
    let faults: &[&str] = match brand {
        "大众" => &["发动机烧机油", "双离合变速箱顿挫", "正时链条异响", "涡轮增压器故障"],
        "本田" => &["VTC执行器异响", "CVT变速箱打滑", "节气门积碳", "氧传感器故障"],
        "丰田" => &["机油乳化", "转向机异响", "刹车抖动", "空调制冷不足"],
        "奥迪" => &["发动机烧机油", "水泵漏水", "空调压缩机故障", "悬挂异响"],
        "宝马" => &["气门室盖漏油", "冷却液缺失", "电子水泵故障", "发动机抖动"],
        "奔驰" => &["正时链轮故障", "凸轮轴调节器故障", "变速箱闯挡", "悬挂气包漏气"],
        _ => &["发动机故障灯亮", "油耗异常", "异响", "动力下降"],
    };
    faults.iter().map(|f| f.to_string()).collect()
}
