//! 关键词工具路由
//!
//! 把任务文本切成小写词，按每个工具声明的关键词计数命中，命中数换算为置信度；
//! 文本中形如 `src/main.rs` 的路径作为 path 参数一并给出。

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::json;

use crate::executor::{ToolRecommendation, ToolRouter};
use crate::tools::{ToolInfo, ToolRegistry};

/// 每个命中关键词贡献的置信度
const CONFIDENCE_PER_HIT: f32 = 0.35;
const MAX_CONFIDENCE: f32 = 0.95;

fn word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\p{L}\p{N}_]+").expect("word regex"))
}

fn path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:\./)?[\w\-]+(?:/[\w\-.]+)*\.[A-Za-z0-9]{1,8}\b")
            .expect("path regex")
    })
}

/// 基于工具关键词的路由器
#[derive(Debug, Clone)]
pub struct KeywordToolRouter {
    tools: Vec<ToolInfo>,
}

impl KeywordToolRouter {
    pub fn new(tools: Vec<ToolInfo>) -> Self {
        Self { tools }
    }

    pub fn from_registry(registry: &ToolRegistry) -> Self {
        Self::new(registry.infos())
    }

    /// 文本中的第一个路径
    pub fn extract_path(message: &str) -> Option<String> {
        path_re().find(message).map(|m| m.as_str().to_string())
    }
}

/// 小写分词
pub fn tokenize(message: &str) -> BTreeSet<String> {
    word_re()
        .find_iter(&message.to_lowercase())
        .map(|m| m.as_str().to_string())
        .collect()
}

impl ToolRouter for KeywordToolRouter {
    fn analyze_message(&self, message: &str) -> Vec<ToolRecommendation> {
        let words = tokenize(message);
        let path = Self::extract_path(message);

        let mut recs: Vec<ToolRecommendation> = self
            .tools
            .iter()
            .filter_map(|tool| {
                let hits = tool
                    .keywords
                    .iter()
                    .filter(|k| words.contains(k.as_str()))
                    .count();
                if hits == 0 {
                    return None;
                }
                let confidence = (hits as f32 * CONFIDENCE_PER_HIT).min(MAX_CONFIDENCE);
                let mut args = json!({ "focus": message.trim() });
                if let Some(p) = &path {
                    args["path"] = json!(p);
                }
                Some(ToolRecommendation {
                    tool: tool.name.clone(),
                    confidence,
                    args,
                })
            })
            .collect();

        recs.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a.tool.cmp(&b.tool))
        });
        tracing::debug!(recommendations = recs.len(), "tool intent analyzed");
        recs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{AnalyzeProjectTool, ReadFileTool};

    fn router() -> KeywordToolRouter {
        let mut registry = ToolRegistry::new();
        registry.register(ReadFileTool::new("."));
        registry.register(AnalyzeProjectTool::new("."));
        KeywordToolRouter::from_registry(&registry)
    }

    #[test]
    fn test_ranked_by_hits() {
        let recs = router().analyze_message("Read the file src/parser.rs and show content");
        assert_eq!(recs[0].tool, "read_file");
        assert!(recs[0].confidence >= 0.7);
        assert_eq!(recs[0].args["path"], "src/parser.rs");
    }

    #[test]
    fn test_single_hit_is_low_confidence() {
        let recs = router().analyze_message("give me an overview");
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].tool, "analyze_project");
        assert!(recs[0].confidence < 0.7);
    }

    #[test]
    fn test_no_intent() {
        assert!(router().analyze_message("refactor the scheduler").is_empty());
    }
}
