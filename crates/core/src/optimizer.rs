use std::collections::HashMap;

use thiserror::Error;
use tracing::{debug, info};

use crate::analysis::{AnalysisError, PromptAnalysis};
use crate::llm::{ModelClient, ModelError, Progress};

const REWRITE_INSTRUCTION: &str =
    "请帮我优化以下提示词，使其更加清晰、完整和结构化。直接返回优化后的提示词，不要包含任何解释：";

const ANALYSIS_INSTRUCTION: &str = r#"
请分析以下提示词的质量，并返回一个JSON对象。注意：
1. 必须返回有效的JSON格式
2. 所有分数必须是1-100的整数
3. 所有文本必须使用双引号
4. 不要包含任何额外的解释文本

{
    "structure_score": <结构完整性评分>,
    "clarity_score": <表达清晰度评分>,
    "completeness_score": <信息完整度评分>,
    "suggestions": ["改进建议1", "改进建议2"],
    "strengths": ["优点1", "优点2"],
    "weaknesses": ["不足1", "不足2"]
}

提示词内容：
"#;

const ANALYSIS_TRAILER: &str = "\n请注意：只返回JSON对象，不要包含任何其他文本。";

const BUILTIN_TEMPLATES: &[(&str, &str)] = &[
    (
        "general",
        "请详细描述您的需求：\n1. 具体目标是什么？\n2. 有哪些具体要求或限制？\n3. 期望的输出格式是什么？",
    ),
    (
        "code",
        "请描述您的编程需求：\n1. 使用什么编程语言？\n2. 需要实现什么功能？\n3. 有哪些输入参数？\n4. 期望的输出是什么？\n5. 是否有性能要求？",
    ),
    (
        "analysis",
        "请描述您的分析需求：\n1. 数据的来源和格式是什么？\n2. 需要分析哪些维度？\n3. 期望得到什么样的结论？\n4. 是否需要可视化展示？",
    ),
];

#[derive(Error, Debug)]
pub enum OptimizeError {
    #[error("unknown template: {0}")]
    UnknownTemplate(String),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
}

/// Turns a raw user prompt into a templated, an optimized, or an analyzed
/// result. Generic over the client so the template and extraction paths are
/// testable without a network.
pub struct PromptOptimizer<C> {
    client: C,
    templates: HashMap<&'static str, &'static str>,
}

impl<C: ModelClient> PromptOptimizer<C> {
    pub fn new(client: C) -> Self {
        PromptOptimizer {
            client,
            templates: BUILTIN_TEMPLATES.iter().copied().collect(),
        }
    }

    /// With a known `template_id` this is pure string composition and never
    /// touches the client; without one, the prompt is rewritten by the model
    /// and only whitespace-trimmed. Callers must tolerate a model that
    /// ignores the no-explanation instruction.
    pub async fn optimize(
        &self,
        prompt: &str,
        template_id: Option<&str>,
        progress: &mut dyn Progress,
    ) -> Result<String, OptimizeError> {
        if let Some(id) = template_id {
            let template = self
                .templates
                .get(id)
                .ok_or_else(|| OptimizeError::UnknownTemplate(id.to_string()))?;
            debug!(target: "optimizer", template = id, "applying template");
            return Ok(format!("{template}\n\n原始需求：{prompt}"));
        }

        info!(target: "optimizer", "rewriting prompt via model");
        let wrapped = format!("{REWRITE_INSTRUCTION}\n{prompt}");
        let rewritten = self.client.generate(&wrapped, progress).await?;
        Ok(rewritten.trim().to_string())
    }

    /// Quality analysis of a prompt, parsed out of the model's unreliable
    /// JSON output via tolerant extraction.
    pub async fn analyze(
        &self,
        prompt: &str,
        progress: &mut dyn Progress,
    ) -> Result<PromptAnalysis, OptimizeError> {
        info!(target: "optimizer", "analyzing prompt");
        let wrapped = format!("{ANALYSIS_INSTRUCTION}{prompt}{ANALYSIS_TRAILER}");
        let raw = self.client.generate(&wrapped, progress).await?;
        Ok(PromptAnalysis::from_response(&raw)?)
    }

    /// Known template ids, in stable order.
    pub fn templates(&self) -> Vec<&'static str> {
        let mut ids: Vec<_> = self.templates.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn list_models(&self) -> Vec<String> {
        self.client.list_models()
    }

    pub fn set_model(&mut self, name: &str) -> Result<(), ModelError> {
        self.client.set_model(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct FakeClient {
        reply: &'static str,
        calls: Cell<u32>,
    }

    impl FakeClient {
        fn replying(reply: &'static str) -> Self {
            FakeClient {
                reply,
                calls: Cell::new(0),
            }
        }
    }

    impl ModelClient for FakeClient {
        async fn generate(
            &self,
            _prompt: &str,
            progress: &mut dyn Progress,
        ) -> Result<String, ModelError> {
            self.calls.set(self.calls.get() + 1);
            progress.on_fragment(self.reply);
            Ok(self.reply.to_string())
        }

        fn list_models(&self) -> Vec<String> {
            vec!["fake".to_string()]
        }

        fn set_model(&mut self, name: &str) -> Result<(), ModelError> {
            if name == "fake" {
                Ok(())
            } else {
                Err(ModelError::UnknownModel(name.to_string()))
            }
        }
    }

    #[tokio::test]
    async fn template_path_is_pure_and_deterministic() {
        let opt = PromptOptimizer::new(FakeClient::replying("unused"));
        let mut sink = |_: &str| {};
        let a = opt.optimize("写一个排序函数", Some("code"), &mut sink).await.unwrap();
        let b = opt.optimize("写一个排序函数", Some("code"), &mut sink).await.unwrap();
        assert_eq!(a, b);
        assert!(a.contains("原始需求：写一个排序函数"));
        assert!(a.starts_with("请描述您的编程需求"));
        assert_eq!(opt.client.calls.get(), 0);
    }

    #[tokio::test]
    async fn unknown_template_never_touches_the_client() {
        let opt = PromptOptimizer::new(FakeClient::replying("unused"));
        let err = opt
            .optimize("hi", Some("nonexistent"), &mut |_: &str| {})
            .await
            .unwrap_err();
        assert!(matches!(err, OptimizeError::UnknownTemplate(id) if id == "nonexistent"));
        assert_eq!(opt.client.calls.get(), 0);
    }

    #[tokio::test]
    async fn freeform_optimize_trims_model_output() {
        let opt = PromptOptimizer::new(FakeClient::replying("  rewritten prompt \n"));
        let out = opt.optimize("messy", None, &mut |_: &str| {}).await.unwrap();
        assert_eq!(out, "rewritten prompt");
        assert_eq!(opt.client.calls.get(), 1);
    }

    #[tokio::test]
    async fn analyze_parses_fenced_json_reply() {
        let reply = "Sure!\n```json\n{\"structure_score\":70,\"clarity_score\":60,\
                     \"completeness_score\":50,\"suggestions\":[\"s\"],\"strengths\":[\"a\"],\
                     \"weaknesses\":[\"w\"]}\n```";
        let opt = PromptOptimizer::new(FakeClient::replying(reply));
        let analysis = opt.analyze("prompt", &mut |_: &str| {}).await.unwrap();
        assert_eq!(analysis.structure_score, 70);
        assert_eq!(analysis.weaknesses, vec!["w"]);
        assert_eq!(opt.client.calls.get(), 1);
    }

    #[tokio::test]
    async fn analyze_without_json_reports_no_json_found() {
        let opt = PromptOptimizer::new(FakeClient::replying("I refuse to answer."));
        let err = opt.analyze("prompt", &mut |_: &str| {}).await.unwrap_err();
        assert!(matches!(
            err,
            OptimizeError::Analysis(AnalysisError::NoJsonFound)
        ));
    }

    #[test]
    fn builtin_templates_are_listed_sorted() {
        let opt = PromptOptimizer::new(FakeClient::replying("unused"));
        assert_eq!(opt.templates(), vec!["analysis", "code", "general"]);
    }
}
