//! Tool-calling agent turn loop.
//!
//! One user turn walks an explicit state machine: the conversation plus the
//! retrieval tool schema goes to the model; the model either answers or
//! requests tool calls. Tool results (including argument errors, which the
//! model gets to read and correct) are appended as tool messages and the
//! model is consulted again, up to a bounded number of rounds.
//!
//! The turn works on a clone of the history and commits it only on
//! completion, so cancelling mid-turn (dropping the future at any await
//! point) leaves the conversation exactly as it was.

use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::llm::{ChatMessage, ChatModel, ModelReply, ToolCallRequest, ToolSpec};
use crate::retrieval::{RetrievalTool, TOOL_NAME};

pub const SYSTEM_PROMPT: &str = "You answer questions about the user's utility bills. \
Use the search_pdfs tool to look up evidence before answering, and cite every claim with \
the citation_tag values returned by the tool, e.g. [acme-2024-03.pdf#2]. If the tool \
returns nothing relevant, say you could not find the answer in the documents.";

/// Fixed terminal response when the model keeps requesting tools past the
/// round limit.
pub const UNABLE_TO_ANSWER: &str =
    "I was unable to answer that question from the ingested documents.";

/// Result of one completed user turn.
#[derive(Debug, Clone)]
pub struct AgentTurn {
    pub answer: String,
    /// Citation tags the answer references that were actually returned by
    /// a tool call this turn, in order of appearance.
    pub citations: Vec<String>,
    /// False when the answer cites a tag no tool call returned this turn.
    pub grounded: bool,
}

enum TurnState {
    Thinking,
    ToolRequested(Vec<ToolCallRequest>),
    Done(String),
}

pub struct Agent {
    model: Arc<dyn ChatModel>,
    tool: RetrievalTool,
    max_tool_rounds: usize,
}

impl Agent {
    pub fn new(model: Arc<dyn ChatModel>, tool: RetrievalTool, max_tool_rounds: usize) -> Self {
        Self {
            model,
            tool,
            max_tool_rounds,
        }
    }

    fn tool_specs(&self) -> Vec<ToolSpec> {
        vec![ToolSpec {
            name: TOOL_NAME.to_string(),
            description: RetrievalTool::description().to_string(),
            parameters: RetrievalTool::schema(),
        }]
    }

    /// Run one user turn. `history` is modified only when the turn
    /// completes.
    pub async fn run_turn(
        &self,
        history: &mut Vec<ChatMessage>,
        user_input: &str,
    ) -> Result<AgentTurn> {
        let mut working = history.clone();
        if working.is_empty() {
            working.push(ChatMessage::system(SYSTEM_PROMPT));
        }
        working.push(ChatMessage::user(user_input));

        let specs = self.tool_specs();
        let mut offered: BTreeSet<String> = BTreeSet::new();
        let mut rounds = 0usize;
        let mut state = TurnState::Thinking;

        let answer = loop {
            state = match state {
                TurnState::Thinking => match self.model.complete(&working, &specs).await? {
                    ModelReply::Answer(text) => TurnState::Done(text),
                    ModelReply::ToolCalls(calls) => TurnState::ToolRequested(calls),
                },
                TurnState::ToolRequested(calls) => {
                    rounds += 1;
                    if rounds > self.max_tool_rounds {
                        break UNABLE_TO_ANSWER.to_string();
                    }
                    working.push(ChatMessage::assistant_tool_calls(calls.clone()));
                    for call in &calls {
                        let result = self.execute_tool(call, &mut offered).await?;
                        working.push(ChatMessage::tool_result(call.id.clone(), result));
                    }
                    TurnState::Thinking
                }
                TurnState::Done(text) => break text,
            };
        };

        let cited = extract_citation_tags(&answer);
        let grounded = cited.iter().all(|tag| offered.contains(tag));
        let citations: Vec<String> = cited
            .into_iter()
            .filter(|tag| offered.contains(tag))
            .collect();

        working.push(ChatMessage::assistant(answer.clone()));
        *history = working;

        Ok(AgentTurn {
            answer,
            citations,
            grounded,
        })
    }

    /// Execute one requested call. Argument problems become tool-result
    /// text the model can recover from; only infrastructure failures
    /// propagate.
    async fn execute_tool(
        &self,
        call: &ToolCallRequest,
        offered: &mut BTreeSet<String>,
    ) -> Result<String> {
        match self.try_tool(call).await {
            Ok(hits) => {
                for hit in &hits {
                    offered.insert(hit.citation_tag.clone());
                }
                Ok(serde_json::to_string(&hits).unwrap_or_else(|_| "[]".to_string()))
            }
            Err(Error::ToolArgument(reason)) => Ok(format!("error: {}", reason)),
            Err(other) => Err(other),
        }
    }

    async fn try_tool(&self, call: &ToolCallRequest) -> Result<Vec<crate::models::RetrievalHit>> {
        if call.name != TOOL_NAME {
            return Err(Error::ToolArgument(format!("unknown tool '{}'", call.name)));
        }

        let args: Value = serde_json::from_str(&call.arguments)
            .map_err(|e| Error::ToolArgument(format!("arguments are not valid JSON: {}", e)))?;

        let query = args
            .get("query")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::ToolArgument("missing required string argument 'query'".into()))?;

        let top_k = match args.get("top_k") {
            None | Some(Value::Null) => None,
            Some(v) => Some(
                v.as_u64()
                    .ok_or_else(|| Error::ToolArgument("'top_k' must be an integer".into()))?
                    as usize,
            ),
        };

        self.tool.search_pdfs(query, top_k).await
    }
}

/// Scan answer text for `[document#index]` citation tags. Order of first
/// appearance, deduplicated.
pub fn extract_citation_tags(text: &str) -> Vec<String> {
    let mut tags = Vec::new();
    let mut rest = text;

    while let Some(open) = rest.find('[') {
        let after = &rest[open + 1..];
        let Some(close) = after.find(']') else {
            break;
        };
        let inner = &after[..close];
        if !inner.is_empty() && inner.contains('#') && !inner.contains('[') && !inner.contains('\n')
        {
            let tag = format!("[{}]", inner);
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        }
        rest = &after[close + 1..];
    }

    tags
}
