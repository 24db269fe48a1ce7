//! 标量类型规范化。
//!
//! 读数值在线上是弱类型的：数值型属性若在设备描述中声明了枚举/整型编码
//! （`vt`），应以整数落库；未声明的数值一律按浮点处理，避免截断真实小数。
//! 这里是全链路唯一的类型转换边界。

use domain::ScalarValue;
use std::collections::HashMap;
use std::sync::RwLock;

/// 类型提示表：`iot/device/input` → 声明类型。
///
/// 由 `devices` 描述文档填充；条目写入后不变，读多写少。
pub struct TypeHintTable {
    hints: RwLock<HashMap<String, String>>,
}

impl TypeHintTable {
    pub fn new() -> Self {
        Self {
            hints: RwLock::new(HashMap::new()),
        }
    }

    /// 查询某输入声明的类型。
    pub fn hint(&self, iot: &str, device: &str, input: &str) -> Option<String> {
        let hints = self.hints.read().ok()?;
        hints.get(&hint_key(iot, device, input)).cloned()
    }

    /// 从设备描述文档重建该设备贡献的提示条目。
    ///
    /// 文档形如 `{<device>: {"inputs": [{"name", "vt"?}, ...]}, ...}`；
    /// 某个子设备缺少 inputs 列表时终止整个文档的学习。
    pub fn learn(&self, iot: &str, cfg: &serde_json::Value) {
        let Some(devices) = cfg.as_object() else {
            return;
        };
        let Ok(mut hints) = self.hints.write() else {
            return;
        };
        for (device, entry) in devices {
            let inputs = entry.get("inputs").and_then(|value| value.as_array());
            let Some(inputs) = inputs.filter(|list| !list.is_empty()) else {
                return;
            };
            for input in inputs {
                let Some(vt) = input.get("vt").and_then(|value| value.as_str()) else {
                    continue;
                };
                let Some(name) = input.get("name").and_then(|value| value.as_str()) else {
                    continue;
                };
                hints.insert(hint_key(iot, device, name), vt.to_string());
            }
        }
    }

    /// 将原始 JSON 标量强制转换为稳定类型。
    ///
    /// - 非数值字面量 → `("string", 原文)`，提示不参与；
    /// - 数值且有提示 → `(声明类型, 整数截断)`；
    /// - 数值无提示 → `(None, 浮点)`。
    ///
    /// 数值字面量包括 JSON 数字、布尔（0/1）以及可按数字解析的字符串。
    pub fn coerce(
        &self,
        iot: &str,
        device: &str,
        input: &str,
        raw: &serde_json::Value,
    ) -> (Option<String>, ScalarValue) {
        let numeric = match raw {
            serde_json::Value::Number(number) => number.as_f64(),
            serde_json::Value::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
            serde_json::Value::String(text) => text.trim().parse::<f64>().ok(),
            _ => None,
        };
        let Some(number) = numeric else {
            return (
                Some("string".to_string()),
                ScalarValue::String(stringify(raw)),
            );
        };
        if let Some(vt) = self.hint(iot, device, input) {
            return (Some(vt), ScalarValue::Int(number as i64));
        }
        (None, ScalarValue::Float(number))
    }
}

impl Default for TypeHintTable {
    fn default() -> Self {
        Self::new()
    }
}

fn hint_key(iot: &str, device: &str, input: &str) -> String {
    format!("{}/{}/{}", iot, device, input)
}

/// 非数值原始值的文本形式：字符串取原文，其余紧凑序列化。
pub fn stringify(raw: &serde_json::Value) -> String {
    match raw {
        serde_json::Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hinted_numeric_string_casts_to_int() {
        let hints = TypeHintTable::new();
        hints.learn(
            "dev1",
            &json!({"sensorA": {"inputs": [{"name": "mode", "vt": "int"}]}}),
        );

        let (tag, value) = hints.coerce("dev1", "sensorA", "mode", &json!("3"));
        assert_eq!(tag.as_deref(), Some("int"));
        assert_eq!(value, ScalarValue::Int(3));
    }

    #[test]
    fn unhinted_numeric_defaults_to_float() {
        let hints = TypeHintTable::new();
        let (tag, value) = hints.coerce("dev1", "sensorA", "temp", &json!(2.5));
        assert_eq!(tag, None);
        assert_eq!(value, ScalarValue::Float(2.5));
    }

    #[test]
    fn non_numeric_string_stays_string_despite_hint() {
        let hints = TypeHintTable::new();
        hints.learn(
            "dev1",
            &json!({"sensorA": {"inputs": [{"name": "state", "vt": "int"}]}}),
        );

        let (tag, value) = hints.coerce("dev1", "sensorA", "state", &json!("on"));
        assert_eq!(tag.as_deref(), Some("string"));
        assert_eq!(value, ScalarValue::String("on".to_string()));
    }

    #[test]
    fn hint_is_scoped_to_its_key() {
        let hints = TypeHintTable::new();
        hints.learn(
            "dev1",
            &json!({"sensorA": {"inputs": [{"name": "mode", "vt": "int"}]}}),
        );

        let (tag, value) = hints.coerce("dev2", "sensorA", "mode", &json!(7));
        assert_eq!(tag, None);
        assert_eq!(value, ScalarValue::Float(7.0));
    }

    #[test]
    fn learn_stops_at_device_without_inputs() {
        let hints = TypeHintTable::new();
        hints.learn(
            "dev1",
            &json!({
                "a": {"desc": "no inputs here"},
                "z": {"inputs": [{"name": "mode", "vt": "int"}]}
            }),
        );

        assert_eq!(hints.hint("dev1", "a", "mode"), None);
        assert_eq!(hints.hint("dev1", "z", "mode"), None);
    }

    #[test]
    fn hinted_bool_is_integer_coded() {
        let hints = TypeHintTable::new();
        hints.learn(
            "dev1",
            &json!({"sensorA": {"inputs": [{"name": "alarm", "vt": "int"}]}}),
        );

        let (tag, value) = hints.coerce("dev1", "sensorA", "alarm", &json!(true));
        assert_eq!(tag.as_deref(), Some("int"));
        assert_eq!(value, ScalarValue::Int(1));
    }
}
