//! 工具参数 Schema
//!
//! 每个工具以 [`ToolSchema`] 声明参数（类型 / 是否必需 / 枚举 / 默认值）。
//! 注册表据此校验 Oracle 给出的 inputs，`to_json` 生成 JSON Schema 片段拼入 prompt。

use serde_json::{json, Map, Value};

/// 参数的基础类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }

    /// value 是否满足该类型
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }
}

/// 单个参数声明
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    pub ty: ParamType,
    pub description: String,
    pub required: bool,
    pub enum_values: Vec<String>,
    pub default: Option<Value>,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, ty: ParamType, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty,
            description: description.into(),
            required: false,
            enum_values: Vec::new(),
            default: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn one_of(mut self, values: &[&str]) -> Self {
        self.enum_values = values.iter().map(|v| v.to_string()).collect();
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }
}

/// 工具的参数集合（保持声明顺序）
#[derive(Debug, Clone, Default)]
pub struct ToolSchema {
    params: Vec<ParamSpec>,
}

impl ToolSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.params.push(spec);
        self
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    pub fn required_names(&self) -> Vec<&str> {
        self.params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect()
    }

    /// JSON Schema 形式：`{"type": "object", "properties": {...}, "required": [...]}`
    pub fn to_json(&self) -> Value {
        let mut properties = Map::new();
        for p in &self.params {
            let mut prop = Map::new();
            prop.insert("type".into(), json!(p.ty.as_str()));
            prop.insert("description".into(), json!(p.description));
            if !p.enum_values.is_empty() {
                prop.insert("enum".into(), json!(p.enum_values));
            }
            if let Some(default) = &p.default {
                prop.insert("default".into(), default.clone());
            }
            properties.insert(p.name.clone(), Value::Object(prop));
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": self.required_names(),
        })
    }
}
