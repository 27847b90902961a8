//! OpenRouter-backed implementation of the oracle ports, with automatic
//! retry for transient errors and bounded parse retries for structured
//! outputs.

use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::curriculum::TaskDraft;

use super::{
    AnswerOracle, CodeGenerator, Critic, Critique, CurriculumOracle, Embedder, GenerationContext,
    SkillDescriber,
};

const OPENROUTER_CHAT_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const OPENROUTER_EMBEDDINGS_URL: &str = "https://openrouter.ai/api/v1/embeddings";

/// Transient-error retries per chat call.
const MAX_HTTP_RETRIES: usize = 3;

const CODING_SYS_PROMPT: &str = "\
You are a helpful assistant that writes Python functions to complete programming tasks.

Rules:
1) Respond with exactly one fenced Python code block.
2) Declare helper functions first; the main function must come last and be at module level.
3) You may reuse the previously learned functions listed below by calling them; do not redefine them.
4) Import only standard-library modules.";

const BRAINSTORM_SYS_PROMPT: &str = "\
You brainstorm what to learn next, given a history of completed and failed Python tasks.
Propose questions whose answers would help pick the next immediate task.

Respond with a JSON object: {\"reasoning\": \"...\", \"questions\": [\"...\", \"...\"]}";

const SYNTHESIS_SYS_PROMPT: &str = "\
You design the next Python programming task. It must ask for ONE function, be a little harder
than the completed tasks, and avoid the failed tasks.

Respond with a JSON object:
{
  \"task\": \"description of the task, including expected input and output data structures\",
  \"fn_name\": \"expected_function_name\",
  \"setup_code\": \"code run just before the test cases, empty string if none\",
  \"test_cases\": [\"three single-line test cases, each starting with assert\"]
}";

const CRITIC_SYS_PROMPT: &str = "\
You judge whether generated Python code met the task requirements, given the unit test results.

Respond with a JSON object: {\"reasoning\": \"...\", \"success\": true|false, \"critique\": \"...\"}";

const ANSWER_SYS_PROMPT: &str = "\
You are a helpful assistant that answers questions about Python programming concisely.";

const DESCRIBE_SYS_PROMPT: &str = "\
Describe what the given Python function does in a few sentences, focusing on inputs, outputs
and behavior, so the description can be used to find the function again later.";

/// OpenRouter chat client implementing the generation, answering, critique
/// and description ports.
pub struct OpenRouterOracle {
    client: Client,
    api_key: String,
    model: String,
    qa_model: String,
    /// Bounded retries when a structured response fails to parse.
    parse_retries: usize,
}

impl OpenRouterOracle {
    pub fn new(api_key: String, model: String, qa_model: String, parse_retries: usize) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
            qa_model,
            parse_retries,
        }
    }

    async fn chat(&self, model: &str, messages: &[serde_json::Value]) -> anyhow::Result<String> {
        let request = json!({
            "model": model,
            "messages": messages,
            "temperature": 0.0,
        });

        let mut last_error = None;
        for attempt in 0..MAX_HTTP_RETRIES {
            let response = self
                .client
                .post(OPENROUTER_CHAT_URL)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&request)
                .send()
                .await;

            let response = match response {
                Ok(r) => r,
                Err(err) => {
                    tracing::warn!("chat request failed: {err}");
                    last_error = Some(anyhow::anyhow!("request failed: {err}"));
                    tokio::time::sleep(backoff(attempt)).await;
                    continue;
                }
            };

            let status = response.status();
            let body = response.text().await.unwrap_or_default();

            if status.as_u16() == 429 || status.is_server_error() {
                tracing::warn!("chat transient error {}: {}", status, truncate(&body, 200));
                last_error = Some(anyhow::anyhow!("API error {status}: {body}"));
                tokio::time::sleep(backoff(attempt)).await;
                continue;
            }
            if !status.is_success() {
                anyhow::bail!("API error {status}: {body}");
            }

            let parsed: ChatResponse = serde_json::from_str(&body)
                .map_err(|err| anyhow::anyhow!("failed to parse chat response: {err}"))?;
            let content = parsed
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .ok_or_else(|| anyhow::anyhow!("no choices in chat response"))?;
            return Ok(content);
        }
        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("chat retries exhausted")))
    }

    fn messages(system: &str, user: &str) -> Vec<serde_json::Value> {
        vec![
            json!({"role": "system", "content": system}),
            json!({"role": "user", "content": user}),
        ]
    }
}

fn backoff(attempt: usize) -> Duration {
    Duration::from_secs(2u64.saturating_pow(attempt as u32))
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Extract the first fenced Python code block from a chat response.
fn extract_code_block(text: &str) -> Option<String> {
    let re = Regex::new(r"(?s)```(?:python|py)?\s*\n(.*?)```").ok()?;
    re.captures(text)
        .map(|caps| caps[1].trim_end().to_string())
        .filter(|code| !code.trim().is_empty())
}

/// Extract a JSON object from a chat response: a fenced json block if
/// present, otherwise the outermost braces.
fn extract_json(text: &str) -> Option<String> {
    let re = Regex::new(r"(?s)```(?:json)?\s*\n(.*?)```").ok()?;
    if let Some(caps) = re.captures(text) {
        return Some(caps[1].trim().to_string());
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| text[start..=end].to_string())
}

fn render_generation_message(ctx: &GenerationContext<'_>) -> String {
    let mut observation = String::new();
    observation.push_str(&format!(
        "[Environment feedback]\n{}\n\n",
        if ctx.env_feedback.is_empty() { "None" } else { ctx.env_feedback }
    ));
    observation.push_str(&format!(
        "[Code from the last round]\n{}\n\n",
        if ctx.prev_code.is_empty() { "No code in the first round" } else { ctx.prev_code }
    ));
    observation.push_str(&format!("[Task]\n{}\n\n", ctx.task_prompt));
    observation.push_str(&format!(
        "[Context]\n{}\n\n",
        if ctx.context.is_empty() { "None" } else { ctx.context }
    ));
    observation.push_str(&format!(
        "[Critique]\n{}\n\n",
        if ctx.critique.is_empty() { "None" } else { ctx.critique }
    ));
    observation
}

fn render_skills(skills: &[(String, crate::library::Skill)]) -> String {
    if skills.is_empty() {
        return "None".to_string();
    }
    skills
        .iter()
        .map(|(name, skill)| format!("# {name}\n{}", skill.code))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[async_trait]
impl CodeGenerator for OpenRouterOracle {
    async fn generate(&self, ctx: &GenerationContext<'_>) -> anyhow::Result<Option<String>> {
        let system = format!(
            "{CODING_SYS_PROMPT}\n\nPreviously learned functions:\n{}",
            render_skills(ctx.skills)
        );
        let mut user = render_generation_message(ctx);

        for _ in 0..self.parse_retries {
            let reply = self.chat(&self.model, &Self::messages(&system, &user)).await?;
            if let Some(code) = extract_code_block(&reply) {
                return Ok(Some(code));
            }
            tracing::warn!("no fenced code block in generation output, retrying");
            user.push_str(
                "\n\nYour previous response contained no fenced Python code block. \
                 Respond with exactly one ```python code block.",
            );
        }
        Ok(None)
    }
}

#[async_trait]
impl AnswerOracle for OpenRouterOracle {
    async fn ask(&self, question: &str) -> anyhow::Result<String> {
        self.chat(
            &self.qa_model,
            &Self::messages(ANSWER_SYS_PROMPT, &format!("Question: {question}")),
        )
        .await
    }
}

#[async_trait]
impl CurriculumOracle for OpenRouterOracle {
    async fn brainstorm(&self, observation: &str) -> anyhow::Result<Vec<String>> {
        #[derive(Deserialize)]
        struct Brainstorm {
            #[serde(default)]
            questions: Vec<String>,
        }

        for _ in 0..self.parse_retries {
            let reply = self
                .chat(&self.qa_model, &Self::messages(BRAINSTORM_SYS_PROMPT, observation))
                .await?;
            if let Some(payload) = extract_json(&reply) {
                if let Ok(parsed) = serde_json::from_str::<Brainstorm>(&payload) {
                    return Ok(parsed.questions);
                }
            }
            tracing::warn!("brainstorm output failed to parse, retrying");
        }
        // Brainstorming is advisory; an unparseable round yields no questions.
        Ok(Vec::new())
    }

    async fn synthesize_task(
        &self,
        observation: &str,
        feedback: Option<&str>,
    ) -> anyhow::Result<TaskDraft> {
        let mut messages = Self::messages(SYNTHESIS_SYS_PROMPT, observation);
        if let Some(feedback) = feedback {
            messages.push(json!({"role": "system", "content": feedback}));
        }

        for _ in 0..self.parse_retries {
            let reply = self.chat(&self.model, &messages).await?;
            if let Some(payload) = extract_json(&reply) {
                match serde_json::from_str::<TaskDraft>(&payload) {
                    Ok(draft) => return Ok(draft),
                    Err(err) => tracing::warn!("task synthesis output failed to parse: {err}"),
                }
            }
            messages.push(json!({
                "role": "system",
                "content": "Your previous response was not the required JSON object. \
                            Respond with exactly the JSON object described above.",
            }));
        }
        anyhow::bail!("task synthesis output failed to parse after retries")
    }
}

#[async_trait]
impl Critic for OpenRouterOracle {
    async fn critique(
        &self,
        feedback: &str,
        reward: bool,
        code: &str,
        context: &str,
    ) -> anyhow::Result<Critique> {
        #[derive(Deserialize)]
        struct CritiqueOut {
            #[serde(default)]
            reasoning: String,
            success: bool,
            #[serde(default)]
            critique: String,
        }

        let user = format!(
            "[Context]\n{}\n\n[function impl]\n{code}\n\n[unit test results]\n{feedback}\n\n\
             [reward]\n{reward}",
            if context.is_empty() { "None" } else { context }
        );

        for _ in 0..self.parse_retries {
            let reply = self
                .chat(&self.model, &Self::messages(CRITIC_SYS_PROMPT, &user))
                .await?;
            if let Some(payload) = extract_json(&reply) {
                if let Ok(parsed) = serde_json::from_str::<CritiqueOut>(&payload) {
                    return Ok(Critique {
                        success: parsed.success,
                        critique: parsed.critique,
                        reasoning: parsed.reasoning,
                    });
                }
            }
            tracing::warn!("critic output failed to parse, retrying");
        }
        // Fall back to an unsuccessful verdict rather than failing the attempt.
        Ok(Critique::default())
    }
}

#[async_trait]
impl SkillDescriber for OpenRouterOracle {
    async fn describe(&self, code: &str, name: &str, task: &str) -> anyhow::Result<String> {
        let mut notes = String::new();
        if !name.is_empty() {
            notes.push_str(&format!("\n\nThe main function is `{name}`."));
        }
        if !task.is_empty() {
            notes.push_str(&format!("\n\nIt was written for this task: {task}"));
        }
        let description = self
            .chat(
                &self.model,
                &Self::messages(DESCRIBE_SYS_PROMPT, &format!("{code}{notes}")),
            )
            .await?;
        let name_str = if name.is_empty() {
            String::new()
        } else {
            format!(" for function: {name}")
        };
        Ok(format!("Code description{name_str}:\n{description}"))
    }
}

/// Embedding client for the similarity indexes.
pub struct OpenRouterEmbedder {
    client: Client,
    api_key: String,
    model: String,
    dimension: usize,
}

impl OpenRouterEmbedder {
    pub fn new(api_key: String, model: String, dimension: usize) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
            dimension,
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

#[async_trait]
impl Embedder for OpenRouterEmbedder {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let request = json!({
            "model": self.model,
            "input": [text],
        });

        let response = self
            .client
            .post(OPENROUTER_EMBEDDINGS_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            tracing::error!("embedding API error: {} - {}", status, truncate(&body, 200));
            anyhow::bail!("embedding API error: {status}");
        }

        let parsed: EmbeddingResponse = serde_json::from_str(&body)
            .map_err(|err| anyhow::anyhow!("failed to parse embedding response: {err}"))?;
        let embedding = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| anyhow::anyhow!("no embedding returned"))?;

        if embedding.len() != self.dimension {
            tracing::warn!(
                "embedding has dimension {} but expected {}",
                embedding.len(),
                self.dimension
            );
        }
        Ok(embedding)
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}
