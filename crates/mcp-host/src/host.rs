use futures::future::join_all;
use futures::StreamExt;
use mcp_core::protocol::CallToolResult;
use tracing::{debug, info, warn};

use crate::config::{HostConfig, ServerTarget};
use crate::connection::{Connection, Connector};
use crate::conversation::Conversation;
use crate::errors::{HostError, HostResult, ToolError};
use crate::extractor::{extract_tool_calls, ToolInvocation};
use crate::message::Message;
use crate::prompt_template::render_system_prompt;
use crate::providers::base::{Provider, SamplingParams};
use crate::providers::openai::OpenAiProvider;
use crate::registry::{aggregate_tools, resolve_owner, ToolDescriptor};

/// How a model reply reaches the caller.
enum Reply<'a> {
    Buffered,
    Streaming(&'a mut (dyn FnMut(&str) + Send)),
}

impl Reply<'_> {
    fn is_streaming(&self) -> bool {
        matches!(self, Reply::Streaming(_))
    }

    fn emit(&mut self, text: &str) {
        if let Reply::Streaming(on_fragment) = self {
            (**on_fragment)(text);
        }
    }
}

/// Drives conversations between a completion service and the tools of several MCP servers.
///
/// Each query runs rounds of: ask the model, pull tool calls out of its reply, run them on
/// the server that provides them, and feed the results back. A reply without tool calls
/// ends the query.
pub struct McpHost {
    connections: Vec<Connection>,
    connector: Box<dyn Connector>,
    provider: Option<Box<dyn Provider>>,
    conversation: Conversation,
    system_prompt: String,
    max_rounds: usize,
}

impl McpHost {
    /// Builds a host with one unconnected [`Connection`] per configured server.
    ///
    /// The completion provider exists only when `config.completion` is set; without it
    /// every query fails with [`HostError::Configuration`].
    pub fn new(config: HostConfig, connector: Box<dyn Connector>) -> HostResult<Self> {
        let provider = match config.completion {
            Some(completion) => {
                Some(Box::new(OpenAiProvider::new(completion)?) as Box<dyn Provider>)
            }
            None => {
                warn!("No completion service configured, queries will fail");
                None
            }
        };

        Ok(Self {
            connections: config.servers.into_iter().map(Connection::new).collect(),
            connector,
            provider,
            conversation: Conversation::new(config.history),
            system_prompt: config.system_prompt,
            max_rounds: config.max_rounds.max(1),
        })
    }

    /// Replaces the completion provider.
    pub fn with_provider(mut self, provider: Box<dyn Provider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn servers(&self) -> impl Iterator<Item = &ServerTarget> {
        self.connections.iter().map(Connection::target)
    }

    /// Connects to every server concurrently.
    ///
    /// Returns one success flag per server in configuration order. Fails only when no
    /// server could be reached.
    pub async fn connect(&mut self) -> HostResult<Vec<bool>> {
        if self.connections.is_empty() {
            return Err(HostError::NoConnections);
        }

        let connector = self.connector.as_ref();
        let results = join_all(
            self.connections
                .iter_mut()
                .map(|connection| connection.connect(connector)),
        )
        .await;

        let connected = results.iter().filter(|ok| **ok).count();
        if connected == 0 {
            return Err(HostError::AllConnectionsFailed {
                attempted: results.len(),
            });
        }
        info!("Connected to {} of {} servers", connected, results.len());
        Ok(results)
    }

    /// The current merged tool catalog.
    pub async fn list_tools(&self) -> Vec<ToolDescriptor> {
        aggregate_tools(&self.connections).await
    }

    /// Answers `query`, running tool calls until the model gives a final reply.
    pub async fn process_query(
        &mut self,
        query: &str,
        params: &SamplingParams,
    ) -> HostResult<String> {
        self.run(query, params, Reply::Buffered).await
    }

    /// Like [`process_query`](Self::process_query), but streams the model's text to
    /// `on_fragment` as it arrives, along with a short note for every tool call.
    ///
    /// The returned string is the final reply only.
    pub async fn process_query_stream<F>(
        &mut self,
        query: &str,
        params: &SamplingParams,
        mut on_fragment: F,
    ) -> HostResult<String>
    where
        F: FnMut(&str) + Send,
    {
        self.run(query, params, Reply::Streaming(&mut on_fragment))
            .await
    }

    pub fn chat_history(&self) -> Vec<Message> {
        self.conversation.history()
    }

    pub fn clear_chat_history(&mut self) {
        self.conversation.clear();
    }

    /// Closes every open connection.
    pub async fn cleanup(&mut self) {
        join_all(self.connections.iter_mut().map(Connection::close)).await;
        info!("Closed all connections");
    }

    async fn run(
        &mut self,
        query: &str,
        params: &SamplingParams,
        mut reply: Reply<'_>,
    ) -> HostResult<String> {
        let provider = self.provider.as_deref().ok_or(HostError::Configuration)?;

        let tools = aggregate_tools(&self.connections).await;
        let system_prompt = render_system_prompt(&self.system_prompt, &tools)?;
        let mut messages = self.conversation.compose(&system_prompt, query);
        info!(tools = tools.len(), "Processing query");

        for round in 1..=self.max_rounds {
            debug!(round, messages = messages.len(), "Requesting completion");
            let response = if reply.is_streaming() {
                let mut fragments = provider.stream(&messages, params).await?;
                let mut text = String::new();
                while let Some(fragment) = fragments.next().await {
                    let fragment = fragment?;
                    reply.emit(&fragment);
                    text.push_str(&fragment);
                }
                text
            } else {
                provider.complete(&messages, params).await?
            };

            let calls = extract_tool_calls(&response);
            messages.push(Message::assistant(response.as_str()));
            if calls.is_empty() {
                self.conversation.commit(messages);
                return Ok(response);
            }

            for call in calls {
                if call.name.is_empty() {
                    warn!("Skipping tool call without a name");
                    continue;
                }
                match dispatch(&self.connections, &call).await {
                    Ok(result) => {
                        let text = serialize_result(&result);
                        reply.emit(&format!("\n[Tool {} returned: {}]\n", call.name, text));
                        messages.push(Message::tool_result(&call.name, &text));
                    }
                    Err(e) => {
                        warn!("Tool call {} failed: {}", call.name, e);
                        reply.emit(&format!("\n[Tool {} failed: {}]\n", call.name, e));
                        messages.push(Message::tool_failure(&call.name, &e.to_string()));
                    }
                }
            }
        }

        Err(HostError::MaxRoundsExceeded(self.max_rounds))
    }
}

async fn dispatch(
    connections: &[Connection],
    call: &ToolInvocation,
) -> Result<CallToolResult, ToolError> {
    let owner = resolve_owner(connections, &call.name)
        .await
        .ok_or_else(|| ToolError::NotFound(call.name.clone()))?;
    let connection = &connections[owner];
    info!("Calling tool {} on {}", call.name, connection.display_name());
    Ok(connection
        .call_tool(&call.name, call.arguments.clone())
        .await?)
}

/// Text sent back to the model for a tool result: the first content element when it is
/// text, else the whole result as JSON.
fn serialize_result(result: &CallToolResult) -> String {
    match result.first_text() {
        Some(text) => text.to_string(),
        None => serde_json::to_string(result).unwrap_or_else(|e| {
            warn!("Failed to serialize tool result: {}", e);
            format!("{:?}", result)
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageContent;
    use crate::providers::base::FragmentStream;
    use crate::providers::errors::ProviderError;
    use crate::providers::mock::MockProvider;
    use async_trait::async_trait;
    use mcp_core::content::Content;
    use crate::test_helpers::{MockConnector, MockServer};
    use mcp_core::role::Role;
    use serde_json::json;

    fn tool_call(name: &str, arguments: &str) -> String {
        format!(
            "<tool_call>\n<name>{}</name>\n<arguments>{}</arguments>\n</tool_call>",
            name, arguments
        )
    }

    fn connector() -> MockConnector {
        MockConnector::new()
            .with_server("http://a/sse", MockServer::new(["echo", "explode", "picture"]))
            .with_server("http://b/sse", MockServer::new(["echo", "search"]))
    }

    async fn connected_host(
        connector: &MockConnector,
        provider: &MockProvider,
        config: HostConfig,
    ) -> anyhow::Result<McpHost> {
        let mut host = McpHost::new(config, Box::new(connector.clone()))?
            .with_provider(Box::new(provider.clone()));
        host.connect().await?;
        Ok(host)
    }

    /// Fails every completion. Streams deliver two fragments before the failure.
    struct FailingProvider;

    #[async_trait]
    impl Provider for FailingProvider {
        fn model(&self) -> &str {
            "failing"
        }

        async fn complete(
            &self,
            _messages: &[Message],
            _params: &SamplingParams,
        ) -> Result<String, ProviderError> {
            Err(ProviderError::ServerError("overloaded".to_string()))
        }

        async fn stream(
            &self,
            _messages: &[Message],
            _params: &SamplingParams,
        ) -> Result<FragmentStream, ProviderError> {
            Ok(Box::pin(futures::stream::iter(vec![
                Ok("par".to_string()),
                Ok("tial".to_string()),
                Err(ProviderError::RateLimitExceeded("slow down".to_string())),
            ])))
        }
    }

    fn two_servers() -> HostConfig {
        HostConfig::new(vec![
            ServerTarget::new("http://a/sse").with_name("a"),
            ServerTarget::new("http://b/sse").with_name("b"),
        ])
    }

    #[tokio::test]
    async fn test_partial_connect() -> anyhow::Result<()> {
        let config = HostConfig::new(vec![
            ServerTarget::new("http://a/sse"),
            ServerTarget::new("http://down/sse"),
            ServerTarget::new("http://b/sse"),
        ]);
        let mut host = McpHost::new(config, Box::new(connector()))?;

        assert_eq!(host.connect().await?, vec![true, false, true]);

        let servers: Vec<_> = host
            .list_tools()
            .await
            .into_iter()
            .map(|tool| tool.server)
            .collect();
        assert!(!servers.is_empty());
        assert!(servers.iter().all(|s| s != "http://down/sse"));
        Ok(())
    }

    #[tokio::test]
    async fn test_total_connect_failure() -> anyhow::Result<()> {
        let config = HostConfig::new(vec![
            ServerTarget::new("http://down/sse"),
            ServerTarget::new("http://gone/sse"),
        ]);
        let mut host = McpHost::new(config, Box::new(connector()))?;
        assert!(matches!(
            host.connect().await,
            Err(HostError::AllConnectionsFailed { attempted: 2 })
        ));

        let mut empty = McpHost::new(HostConfig::default(), Box::new(connector()))?;
        assert!(matches!(
            empty.connect().await,
            Err(HostError::NoConnections)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_query_without_provider() -> anyhow::Result<()> {
        let mut host = McpHost::new(two_servers(), Box::new(connector()))?;
        host.connect().await?;
        let result = host
            .process_query("hello", &SamplingParams::default())
            .await;
        assert!(matches!(result, Err(HostError::Configuration)));
        assert!(host.chat_history().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_plain_reply_single_round() -> anyhow::Result<()> {
        let connector = connector();
        let provider = MockProvider::new(["first answer", "second answer"]);
        let mut host = connected_host(&connector, &provider, two_servers()).await?;

        let params = SamplingParams::default();
        assert_eq!(host.process_query("q1", &params).await?, "first answer");
        assert_eq!(provider.call_count(), 1);
        assert_eq!(host.chat_history().len(), 3);

        assert_eq!(host.process_query("q2", &params).await?, "second answer");
        assert_eq!(provider.call_count(), 2);
        assert_eq!(host.chat_history().len(), 5);
        assert!(connector.calls().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_second_query_builds_on_history() -> anyhow::Result<()> {
        let connector = connector();
        let provider = MockProvider::new(["a1", "a2"]);
        let config = two_servers().with_system_prompt("Be brief.");
        let mut host = connected_host(&connector, &provider, config).await?;

        let params = SamplingParams::default();
        host.process_query("q1", &params).await?;
        host.process_query("q2", &params).await?;

        let second = &provider.calls()[1];
        assert_eq!(second.len(), 4);
        assert_eq!(second[0].role, Role::System);
        assert!(second[0].as_concat_text().starts_with("Be brief."));
        assert!(second[0].as_concat_text().contains("## search [b]"));
        assert_eq!(second[1], Message::user("q1"));
        assert_eq!(second[2], Message::assistant("a1"));
        assert_eq!(second[3], Message::user("q2"));
        assert_eq!(
            host.chat_history().iter().filter(|m| m.is_system()).count(),
            1
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_tool_result_fed_back() -> anyhow::Result<()> {
        let connector = connector();
        let request = format!("Checking.\n{}", tool_call("search", r#"{"q": "rust"}"#));
        let provider = MockProvider::new([request.as_str(), "Found it."]);
        let mut host = connected_host(&connector, &provider, two_servers()).await?;

        let answer = host
            .process_query("find rust", &SamplingParams::default())
            .await?;
        assert_eq!(answer, "Found it.");
        assert_eq!(
            connector.calls(),
            vec![("b".to_string(), "search".to_string(), json!({"q": "rust"}))]
        );

        let second = &provider.calls()[1];
        assert_eq!(second[second.len() - 2], Message::assistant(request.as_str()));
        assert_eq!(
            second[second.len() - 1],
            Message::tool_result("search", r#"b:{"q":"rust"}"#)
        );
        assert_eq!(host.chat_history().len(), 5);
        Ok(())
    }

    #[tokio::test]
    async fn test_duplicate_tool_goes_to_first_server() -> anyhow::Result<()> {
        let connector = connector();
        let provider = MockProvider::new([tool_call("echo", "{}"), "ok".to_string()]);
        let mut host = connected_host(&connector, &provider, two_servers()).await?;

        host.process_query("echo", &SamplingParams::default())
            .await?;
        assert_eq!(
            connector.calls(),
            vec![("a".to_string(), "echo".to_string(), json!({}))]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_tool_failures_continue_the_loop() -> anyhow::Result<()> {
        let connector = connector();
        let request = format!(
            "{}\n{}",
            tool_call("explode", "{}"),
            tool_call("missing", "{}")
        );
        let provider = MockProvider::new([request.as_str(), "Sorry."]);
        let mut host = connected_host(&connector, &provider, two_servers()).await?;

        let answer = host
            .process_query("try it", &SamplingParams::default())
            .await?;
        assert_eq!(answer, "Sorry.");
        assert_eq!(provider.call_count(), 2);

        let second = &provider.calls()[1];
        let n = second.len();
        assert_eq!(
            second[n - 2],
            Message::user("The tool call to explode failed with error: Request failed: boom")
        );
        assert_eq!(
            second[n - 1],
            Message::user("The tool call to missing failed with error: Tool not found: missing")
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_non_text_result_serialized_as_json() -> anyhow::Result<()> {
        let connector = connector();
        let provider = MockProvider::new([tool_call("picture", "{}"), "A cat.".to_string()]);
        let mut host = connected_host(&connector, &provider, two_servers()).await?;

        host.process_query("draw", &SamplingParams::default())
            .await?;

        let second = &provider.calls()[1];
        let MessageContent::Blocks(blocks) = &second[second.len() - 1].content else {
            panic!("expected a block message");
        };
        assert_eq!(blocks[0].as_text(), "Tool picture returned:");
        let result: CallToolResult = serde_json::from_str(blocks[1].as_text())?;
        assert_eq!(result.content.len(), 2);
        assert_eq!(result.content[1].as_text(), Some("caption"));
        Ok(())
    }

    #[test]
    fn test_serialize_result_prefers_first_text() -> anyhow::Result<()> {
        let result = CallToolResult {
            content: vec![Content::text("first"), Content::text("second")],
            is_error: false,
        };
        assert_eq!(serialize_result(&result), "first");

        let result = CallToolResult {
            content: vec![Content::image("aGk=", "image/png"), Content::text("caption")],
            is_error: false,
        };
        let parsed: CallToolResult = serde_json::from_str(&serialize_result(&result))?;
        assert_eq!(parsed, result);
        Ok(())
    }

    #[tokio::test]
    async fn test_unnamed_tool_call_skipped() -> anyhow::Result<()> {
        let connector = connector();
        let provider = MockProvider::new([tool_call(" ", "{}"), "done".to_string()]);
        let mut host = connected_host(&connector, &provider, two_servers()).await?;

        let answer = host
            .process_query("go", &SamplingParams::default())
            .await?;
        assert_eq!(answer, "done");
        assert_eq!(provider.call_count(), 2);
        assert!(connector.calls().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_round_limit() -> anyhow::Result<()> {
        let connector = connector();
        let call = tool_call("echo", "{}");
        let provider = MockProvider::new([call.as_str(), call.as_str(), call.as_str()]);
        let config = two_servers().with_max_rounds(2);
        let mut host = connected_host(&connector, &provider, config).await?;

        let result = host
            .process_query("loop", &SamplingParams::default())
            .await;
        assert!(matches!(result, Err(HostError::MaxRoundsExceeded(2))));
        assert_eq!(provider.call_count(), 2);
        assert!(host.chat_history().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_history_disabled() -> anyhow::Result<()> {
        let connector = connector();
        let provider = MockProvider::new(["a1", "a2"]);
        let config = two_servers().with_history(false);
        let mut host = connected_host(&connector, &provider, config).await?;

        let params = SamplingParams::default();
        host.process_query("q1", &params).await?;
        host.process_query("q2", &params).await?;

        assert!(host.chat_history().is_empty());
        assert_eq!(provider.calls()[1].len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_clear_chat_history() -> anyhow::Result<()> {
        let connector = connector();
        let provider = MockProvider::new(["a1"]);
        let mut host = connected_host(&connector, &provider, two_servers()).await?;

        host.process_query("q1", &SamplingParams::default())
            .await?;
        assert!(!host.chat_history().is_empty());
        host.clear_chat_history();
        assert!(host.chat_history().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_streaming_reports_fragments_and_tools() -> anyhow::Result<()> {
        let connector = connector();
        let request = tool_call("echo", r#"{"x": 1}"#);
        let provider =
            MockProvider::new([request.as_str(), "All done."]).with_chunk_size(5);
        let mut host = connected_host(&connector, &provider, two_servers()).await?;

        let mut fragments = Vec::new();
        let answer = host
            .process_query_stream("go", &SamplingParams::default(), |fragment| {
                fragments.push(fragment.to_string())
            })
            .await?;

        assert_eq!(answer, "All done.");
        assert!(fragments.len() > 3);
        assert_eq!(
            fragments.concat(),
            format!(
                "{}\n[Tool echo returned: a:{{\"x\":1}}]\nAll done.",
                request
            )
        );
        assert_eq!(host.chat_history().len(), 5);
        Ok(())
    }

    #[tokio::test]
    async fn test_streaming_reports_failures() -> anyhow::Result<()> {
        let connector = connector();
        let provider = MockProvider::new([tool_call("explode", "{}"), "Oops.".to_string()]);
        let mut host = connected_host(&connector, &provider, two_servers()).await?;

        let mut output = String::new();
        let answer = host
            .process_query_stream("go", &SamplingParams::default(), |fragment| {
                output.push_str(fragment)
            })
            .await?;

        assert_eq!(answer, "Oops.");
        assert!(output.contains("\n[Tool explode failed: Request failed: boom]\n"));
        Ok(())
    }

    #[tokio::test]
    async fn test_completion_failure_keeps_history() -> anyhow::Result<()> {
        let connector = connector();
        let provider = MockProvider::new(["a1"]);
        let mut host = connected_host(&connector, &provider, two_servers()).await?;
        host.process_query("q1", &SamplingParams::default())
            .await?;
        let before = host.chat_history();
        let mut host = host.with_provider(Box::new(FailingProvider));

        let result = host
            .process_query("q2", &SamplingParams::default())
            .await;
        assert!(matches!(
            result,
            Err(HostError::Provider(ProviderError::ServerError(_)))
        ));
        assert_eq!(host.chat_history(), before);
        assert_eq!(before.len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_stream_failure_keeps_history() -> anyhow::Result<()> {
        let connector = connector();
        let provider = MockProvider::new(["a1"]);
        let mut host = connected_host(&connector, &provider, two_servers()).await?;
        host.process_query("q1", &SamplingParams::default())
            .await?;
        let before = host.chat_history();
        let mut host = host.with_provider(Box::new(FailingProvider));

        let mut fragments = Vec::new();
        let result = host
            .process_query_stream("q2", &SamplingParams::default(), |fragment| {
                fragments.push(fragment.to_string())
            })
            .await;

        assert!(matches!(
            result,
            Err(HostError::Provider(ProviderError::RateLimitExceeded(_)))
        ));
        assert_eq!(fragments, vec!["par".to_string(), "tial".to_string()]);
        assert_eq!(host.chat_history(), before);
        assert_eq!(before.len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_cleanup_closes_connections() -> anyhow::Result<()> {
        let connector = connector();
        let provider = MockProvider::new(Vec::<String>::new());
        let mut host = connected_host(&connector, &provider, two_servers()).await?;

        host.cleanup().await;
        let mut closed = connector.closed();
        closed.sort();
        assert_eq!(closed, vec!["http://a/sse", "http://b/sse"]);
        assert!(host.list_tools().await.is_empty());
        Ok(())
    }
}
