//! 能力注册表
//!
//! 每个步骤以"能力"的形式注册：名称、描述、严格的输入 schema、处理器。
//! 工作流只通过名称调用能力，调用前先按 schema 校验参数。

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::clients::OcrService;
use crate::config::Config;
use crate::error::{PipelineError, PipelineResult};
use crate::infrastructure::BlobStore;
use crate::services::{ArchiveStep, ExportStep, Inspector, OcrStep, ParseStep, Validator};

pub const PERFORM_OCR: &str = "perform_ocr";
pub const PARSE_OCR: &str = "parse_ocr";
pub const VALIDATE: &str = "validate_ocr_and_parse";
pub const CREATE_EXCEL: &str = "create_excel";
pub const CLEAN_UP: &str = "clean_up";
pub const GET_OCR_RESULT_CONTENT: &str = "get_ocr_result_content";
pub const GET_PARSED_SUMMARY_CONTENT: &str = "get_parsed_summary_content";

/// 参数类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Boolean,
}

impl ParamKind {
    fn json_type(self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Boolean => "boolean",
        }
    }

    fn matches(self, value: &JsonValue) -> bool {
        match self {
            ParamKind::String => value.as_str().is_some_and(|s| !s.trim().is_empty()),
            ParamKind::Boolean => value.is_boolean(),
        }
    }
}

/// 单个参数
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    pub description: &'static str,
}

/// 严格输入 schema：对象类型、不允许额外字段
#[derive(Debug, Clone, Default)]
pub struct InputSchema {
    params: Vec<ParamSpec>,
}

impl InputSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(mut self, name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        self.params.push(ParamSpec {
            name,
            kind,
            required: true,
            description,
        });
        self
    }

    pub fn optional(mut self, name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        self.params.push(ParamSpec {
            name,
            kind,
            required: false,
            description,
        });
        self
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    /// 渲染为 JSON Schema
    pub fn to_json_schema(&self) -> JsonValue {
        let mut properties = Map::new();
        for param in &self.params {
            properties.insert(
                param.name.to_string(),
                json!({
                    "type": param.kind.json_type(),
                    "description": param.description,
                }),
            );
        }
        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name)
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }

    /// 校验输入
    pub fn validate(&self, input: &JsonValue) -> Result<(), String> {
        let object = input.as_object().ok_or_else(|| "参数必须是 JSON 对象".to_string())?;

        for key in object.keys() {
            if !self.params.iter().any(|p| p.name == key) {
                return Err(format!("不允许的参数: {}", key));
            }
        }

        for param in &self.params {
            match object.get(param.name) {
                None | Some(JsonValue::Null) if param.required => {
                    return Err(format!("缺少必填参数: {}", param.name));
                }
                None | Some(JsonValue::Null) => {}
                Some(value) if !param.kind.matches(value) => {
                    return Err(format!(
                        "参数 {} 应为非空 {}",
                        param.name,
                        param.kind.json_type()
                    ));
                }
                Some(_) => {}
            }
        }

        Ok(())
    }
}

/// 能力处理器
#[async_trait]
pub trait CapabilityHandler: Send + Sync {
    async fn call(&self, input: JsonValue) -> PipelineResult<JsonValue>;
}

/// 已注册的能力
#[derive(Clone)]
pub struct Capability {
    pub name: String,
    pub description: String,
    pub schema: InputSchema,
    handler: Arc<dyn CapabilityHandler>,
}

impl Capability {
    /// 渲染为函数调用工具定义
    pub fn tool_definition(&self) -> JsonValue {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.schema.to_json_schema(),
            }
        })
    }
}

/// 能力注册表
#[derive(Clone, Default)]
pub struct CapabilityRegistry {
    capabilities: BTreeMap<String, Capability>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册能力；同名能力会被替换
    pub fn register(
        &mut self,
        name: &str,
        description: &str,
        schema: InputSchema,
        handler: Arc<dyn CapabilityHandler>,
    ) -> &mut Self {
        self.capabilities.insert(
            name.to_string(),
            Capability {
                name: name.to_string(),
                description: description.to_string(),
                schema,
                handler,
            },
        );
        self
    }

    /// 替换已注册能力的处理器，保留描述与 schema
    pub fn replace_handler(&mut self, name: &str, handler: Arc<dyn CapabilityHandler>) -> PipelineResult<()> {
        let capability = self
            .capabilities
            .get_mut(name)
            .ok_or_else(|| PipelineError::UnknownCapability(name.to_string()))?;
        capability.handler = handler;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Capability> {
        self.capabilities.get(name)
    }

    /// 已注册的能力名称（字典序）
    pub fn names(&self) -> Vec<&str> {
        self.capabilities.keys().map(String::as_str).collect()
    }

    /// 所有能力的工具定义
    pub fn tool_definitions(&self) -> Vec<JsonValue> {
        self.capabilities.values().map(Capability::tool_definition).collect()
    }

    /// 按名称调用能力
    pub async fn invoke(&self, name: &str, input: JsonValue) -> PipelineResult<JsonValue> {
        let capability = self
            .capabilities
            .get(name)
            .ok_or_else(|| PipelineError::UnknownCapability(name.to_string()))?;

        capability
            .schema
            .validate(&input)
            .map_err(|message| PipelineError::InvalidInput {
                capability: name.to_string(),
                message,
            })?;

        debug!("调用能力 {}: {}", name, input);
        capability.handler.call(input).await
    }
}

/// 把 JSON 参数反序列化为步骤的输入类型
pub fn parse_input<T: DeserializeOwned>(capability: &str, input: JsonValue) -> PipelineResult<T> {
    serde_json::from_value(input).map_err(|e| PipelineError::InvalidInput {
        capability: capability.to_string(),
        message: e.to_string(),
    })
}

/// 把步骤输出序列化为 JSON
pub fn to_output<T: Serialize>(capability: &str, output: &T) -> PipelineResult<JsonValue> {
    serde_json::to_value(output).map_err(|e| PipelineError::InvalidInput {
        capability: capability.to_string(),
        message: format!("输出序列化失败: {}", e),
    })
}

/// 构建标准能力注册表
pub fn standard_registry(
    store: Arc<dyn BlobStore>,
    ocr: Arc<dyn OcrService>,
    config: &Config,
) -> CapabilityRegistry {
    let mut registry = CapabilityRegistry::new();

    registry
        .register(
            PERFORM_OCR,
            "对 incoming 桶中的文档执行 OCR，结果写入 enhanced 桶，返回结果对象名",
            InputSchema::new()
                .required("blob_name", ParamKind::String, "incoming 桶中的文档名，如 claims_sample3.jpg")
                .optional("analyzer_id", ParamKind::String, "分析器 ID，默认 prebuilt-layout"),
            Arc::new(OcrStep::new(store.clone(), ocr, config)),
        )
        .register(
            PARSE_OCR,
            "由 OCR 结果生成文本摘要，写入 summary 桶",
            InputSchema::new().required("ocr_result_blob_name", ParamKind::String, "enhanced 桶中的 OCR 结果对象名"),
            Arc::new(ParseStep::new(store.clone(), config)),
        )
        .register(
            VALIDATE,
            "比较 OCR 结果与摘要（表格数量、正文覆盖率、低置信度标记），返回校验报告",
            InputSchema::new()
                .required("ocr_result_blob_name", ParamKind::String, "enhanced 桶中的 OCR 结果对象名")
                .required("summary_blob_name", ParamKind::String, "summary 桶中的摘要对象名"),
            Arc::new(Validator::new(store.clone(), config)),
        )
        .register(
            CREATE_EXCEL,
            "由 OCR 结果生成多工作表 Excel（表格 → 键值对 → 原始文本），写入 export 桶",
            InputSchema::new().required("ocr_result_blob_name", ParamKind::String, "enhanced 桶中的 OCR 结果对象名"),
            Arc::new(ExportStep::new(store.clone())),
        )
        .register(
            CLEAN_UP,
            "把原始文档从 incoming 桶移动到归档桶（先复制，确认后再删除）",
            InputSchema::new().required("incoming_docs_blob_name", ParamKind::String, "incoming 桶中的文档名"),
            Arc::new(ArchiveStep::new(store.clone())),
        )
        .register(
            GET_OCR_RESULT_CONTENT,
            "读取 OCR 结果内容及页数、表格数等概要",
            InputSchema::new().required("ocr_result_blob_name", ParamKind::String, "enhanced 桶中的 OCR 结果对象名"),
            Arc::new(Inspector::ocr_results(store.clone())),
        )
        .register(
            GET_PARSED_SUMMARY_CONTENT,
            "读取摘要文本及行数、字符数",
            InputSchema::new().required("summary_blob_name", ParamKind::String, "summary 桶中的摘要对象名"),
            Arc::new(Inspector::summaries(store)),
        );

    registry
}
