/// 读数标量值：整数、浮点、布尔或字符串。
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    String(String),
}

impl ScalarValue {
    /// 文本形式（用于存储与日志）。
    pub fn as_text(&self) -> String {
        match self {
            ScalarValue::Int(v) => v.to_string(),
            ScalarValue::Float(v) => v.to_string(),
            ScalarValue::Bool(v) => v.to_string(),
            ScalarValue::String(v) => v.clone(),
        }
    }
}

/// 一条归一化后的遥测读数，入队后不再修改。
///
/// `iot` 为上报网关的设备标识，`device` 为其下属子设备，
/// `ts` 为 epoch 秒（允许小数）。
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub name: String,
    pub property: String,
    pub device: String,
    pub iot: String,
    pub ts: f64,
    pub value: ScalarValue,
    pub quality: i32,
}
