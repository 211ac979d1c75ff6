use anyhow::Result;
use console::style;
use mcp_host::message::Message;
use mcp_host::{McpHost, SamplingParams};
use rustyline::error::ReadlineError;
use std::io::{self, Write};

const PROMPT: &str = "\x1b[1m\x1b[38;5;30m>> \x1b[0m";

#[derive(Debug, PartialEq)]
enum Input {
    Exit,
    Help,
    Clear,
    History,
    Skip,
    Query(String),
}

fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Skip;
    }
    match line.to_ascii_lowercase().as_str() {
        "/exit" | "/quit" => Input::Exit,
        "/?" | "/help" => Input::Help,
        "/clear" => Input::Clear,
        "/history" => Input::History,
        _ => Input::Query(line.to_string()),
    }
}

fn print_help() {
    println!("Commands:");
    println!("/exit | /quit - Exit the session");
    println!("/clear - Forget the conversation so far");
    println!("/history - Show the conversation so far");
    println!("/? | /help - Display this help message");
}

fn print_history(history: &[Message]) {
    if history.is_empty() {
        println!("{}", style("(no history)").dim());
        return;
    }
    for message in history {
        let role = format!("{:?}", message.role).to_lowercase();
        let text = message.as_concat_text();
        let text = match text.char_indices().nth(200) {
            Some((index, _)) => format!("{}...", &text[..index]),
            None => text,
        };
        println!("{} {}", style(format!("[{}]", role)).cyan().bold(), text);
    }
}

/// Answers one query, printing the reply to stdout.
pub async fn answer(
    host: &mut McpHost,
    query: &str,
    params: &SamplingParams,
    stream: bool,
) -> Result<()> {
    if stream {
        host.process_query_stream(query, params, |fragment| {
            print!("{}", fragment);
            let _ = io::stdout().flush();
        })
        .await?;
        println!();
    } else {
        let reply = host.process_query(query, params).await?;
        println!("{}", reply);
    }
    Ok(())
}

/// Reads queries until the user exits. Failed queries are reported and the session goes on.
pub async fn run(host: &mut McpHost, params: &SamplingParams, stream: bool) -> Result<()> {
    let mut editor = rustyline::DefaultEditor::new()?;
    println!(
        "{}",
        style("Interactive session started. Type /help for commands.").dim()
    );

    loop {
        let line = match editor.readline(PROMPT) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Input error: {}", e);
                break;
            }
        };

        match parse_input(&line) {
            Input::Exit => break,
            Input::Skip => {}
            Input::Help => print_help(),
            Input::Clear => {
                host.clear_chat_history();
                println!("{}", style("History cleared").dim());
            }
            Input::History => print_history(&host.chat_history()),
            Input::Query(query) => {
                let _ = editor.add_history_entry(query.as_str());
                if let Err(e) = answer(host, &query, params, stream).await {
                    eprintln!("{} {:#}", style("Error:").red().bold(), e);
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_input() {
        assert_eq!(parse_input("  "), Input::Skip);
        assert_eq!(parse_input("/EXIT"), Input::Exit);
        assert_eq!(parse_input("/quit"), Input::Exit);
        assert_eq!(parse_input("/clear"), Input::Clear);
        assert_eq!(parse_input("/history"), Input::History);
        assert_eq!(parse_input("/?"), Input::Help);
        assert_eq!(
            parse_input(" what is /clear? "),
            Input::Query("what is /clear?".to_string())
        );
    }
}
