use crate::error::{Result, ToolError};
use crate::retrieval::{Retriever, serialize_chunks};
use crate::tools::{Tool, ToolParameters, ToolResult};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;

pub const RETRIEVAL_TOOL_NAME: &str = "search_documents";

/// 检索工具：供检索阶段的模型在回合中调用
///
/// 每轮执行时按会话的 `scope_id` 新建，模型无法越过作用域去检索其他文档。
pub struct RetrievalTool {
    retriever: Arc<dyn Retriever>,
    scope_id: Option<String>,
    limit: usize,
}

impl RetrievalTool {
    pub fn new(retriever: Arc<dyn Retriever>, scope_id: Option<String>, limit: usize) -> Self {
        Self {
            retriever,
            scope_id,
            limit,
        }
    }
}

#[async_trait]
impl Tool for RetrievalTool {
    fn name(&self) -> &str {
        RETRIEVAL_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Search the indexed documents for chunks relevant to the query. \
         Returns the chunks with page numbers."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query used to find relevant document chunks"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, parameters: ToolParameters) -> Result<ToolResult> {
        let query = parameters
            .get("query")
            .ok_or_else(|| ToolError::MissingParameter("query".to_string()))?
            .as_str()
            .ok_or_else(|| ToolError::InvalidParameter {
                name: "query".to_string(),
                message: "must be a string".to_string(),
            })?;

        // 检索失败直接向上传播，由流水线标记为检索阶段失败
        let chunks = self
            .retriever
            .search(query, self.limit, self.scope_id.as_deref())
            .await?;
        Ok(ToolResult::success(serialize_chunks(&chunks)))
    }
}
