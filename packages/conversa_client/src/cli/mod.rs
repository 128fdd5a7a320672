pub mod chat;

use anyhow::{Context, Result};
use std::io::Write;

use conversa_client::{ChatClient, ClientConfig, ClientError, ConnectionState};

pub use chat::chat_command;

pub async fn login_command(
    config: ClientConfig,
    username: &str,
    password: Option<String>,
) -> Result<()> {
    let password = match password {
        Some(p) => p,
        None => read_password()?,
    };

    let mut client = ChatClient::new(config)?;
    match client.login(username, &password).await {
        Ok(identity) => {
            let shown = identity.name.as_deref().unwrap_or(&identity.username);
            println!("Logged in as {}", shown);
            Ok(())
        }
        Err(ClientError::LoginRejected(detail)) => anyhow::bail!("{}", detail),
        Err(ClientError::Unavailable) => {
            anyhow::bail!("Server unavailable at {}", client.config().server.http_url)
        }
        Err(e) => Err(e.into()),
    }
}

fn read_password() -> Result<String> {
    eprint!("Password: ");
    std::io::stderr().flush()?;
    let mut input = String::new();
    std::io::stdin()
        .read_line(&mut input)
        .context("Failed to read password")?;
    Ok(input.trim_end_matches(['\r', '\n']).to_string())
}

pub async fn logout_command(config: ClientConfig) -> Result<()> {
    let mut client = ChatClient::new(config)?;
    match client.identity() {
        Some(identity) => {
            client.logout().await;
            println!("Logged out {}", identity.username);
        }
        None => println!("Not logged in."),
    }
    Ok(())
}

pub async fn users_command(config: ClientConfig, json: bool) -> Result<()> {
    let client = ChatClient::new(config)?;
    let users = client.api().list_users().await.map_err(explain)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&users)?);
    } else if users.is_empty() {
        println!("No other users.");
    } else {
        println!("{:<24} {}", "USERNAME", "NAME");
        println!("{}", "-".repeat(60));
        for user in &users {
            println!("{:<24} {}", user.username, user.name.as_deref().unwrap_or(""));
        }
        println!("\n{} user(s)", users.len());
    }
    Ok(())
}

pub async fn conversations_command(config: ClientConfig, json: bool) -> Result<()> {
    let client = ChatClient::new(config)?;
    let conversations = client.api().list_conversations().await.map_err(explain)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&conversations)?);
    } else if conversations.is_empty() {
        println!("No conversations yet.");
    } else {
        println!("{:<32} {:<16} {}", "ID", "WITH", "LAST MESSAGE");
        println!("{}", "-".repeat(100));
        for convo in &conversations {
            let last = convo
                .last_message
                .as_ref()
                .map(|m| preview(&m.content, 48))
                .unwrap_or_default();
            println!(
                "{:<32} {:<16} {}",
                convo.name, convo.other_user.username, last
            );
        }
        println!("\n{} conversation(s)", conversations.len());
    }
    Ok(())
}

/// Follow the unread counter until interrupted or the channel closes.
pub async fn notifications_command(config: ClientConfig) -> Result<()> {
    let mut client = ChatClient::new(config)?;
    let notifications = client.ensure_notifications().map_err(explain)?;
    let mut rx = notifications.subscribe();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let snap = *rx.borrow_and_update();
                match snap.connection_state {
                    ConnectionState::Open => println!("Unread: {}", snap.unread_count),
                    ConnectionState::Closed => {
                        eprintln!("[conversa: notification channel closed]");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    client.shutdown().await;
    Ok(())
}

fn explain(err: ClientError) -> anyhow::Error {
    match err {
        ClientError::NotAuthenticated => {
            anyhow::anyhow!("Not logged in, run `conversa login <username>` first")
        }
        ClientError::Unauthorized => {
            anyhow::anyhow!("Session expired, run `conversa login <username>` again")
        }
        other => other.into(),
    }
}

fn preview(text: &str, max: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_truncates_on_characters() {
        assert_eq!(preview("hello", 10), "hello");
        assert_eq!(preview("hello world", 5), "hello...");
        assert_eq!(preview("ééééé", 2), "éé...");
    }

    #[test]
    fn test_explain_not_authenticated() {
        let err = explain(ClientError::NotAuthenticated);
        assert!(err.to_string().contains("conversa login"));
    }
}
