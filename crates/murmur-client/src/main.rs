//! `murmur`: line-oriented terminal client.

use std::path::PathBuf;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use murmur_client::client::{self, Command};
use murmur_client::config::ClientConfig;
use murmur_client::events::ConsolePresenter;
use murmur_client::settings::Settings;
use murmur_store::Database;

#[derive(Debug, PartialEq, Eq)]
enum Input {
    Nothing,
    Quit,
    Help,
    Message(String),
    Upload(PathBuf),
    Set { key: String, value: String },
    Command(Command),
}

fn parse_input(line: &str) -> Result<Input, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Input::Nothing);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Input::Message(line.to_string()));
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };

    match (name, arg) {
        ("quit", _) => Ok(Input::Quit),
        ("help", _) => Ok(Input::Help),
        ("retry", _) => Ok(Input::Command(Command::Reconnect)),
        ("share", "") => Ok(Input::Command(Command::RequestChannelKey)),
        ("share", user) => Ok(Input::Command(Command::ShareChannelKey(user.to_string()))),
        ("newkey", _) => Ok(Input::Command(Command::CreateChannelKey)),
        ("rotate", _) => Ok(Input::Command(Command::RotateIdentity)),
        ("typing", "") | ("typing", "on") => Ok(Input::Command(Command::SetTyping(true))),
        ("typing", "off") => Ok(Input::Command(Command::SetTyping(false))),
        ("typing", _) => Err("usage: /typing [on|off]".to_string()),
        ("upload", "") => Err("usage: /upload <path>".to_string()),
        ("upload", path) => Ok(Input::Upload(PathBuf::from(path))),
        ("set", arg) => match arg.split_once(char::is_whitespace) {
            Some((key, value)) => Ok(Input::Set {
                key: key.to_string(),
                value: value.trim().to_string(),
            }),
            None => Err("usage: /set <key> <value>".to_string()),
        },
        // "//text" sends "/text"
        _ if rest.starts_with('/') => Ok(Input::Message(rest.to_string())),
        (other, _) => Err(format!("unknown command /{other}, try /help")),
    }
}

const HELP: &str = "\
/retry            reconnect now
/share            ask members for the channel key
/share <user>     send the channel key to <user>
/newkey           create a channel key
/rotate           replace your identity key
/typing [on|off]  show others you are composing
/upload <path>    send a file
/set <key> <val>  change a setting (next start)
/quit             exit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    murmur_client::init_tracing();

    let config = ClientConfig::from_env();
    info!(
        user = %config.username,
        server = %config.server_url,
        channel = %config.channel,
        encrypt = config.encrypt,
        "Starting Murmur client v{}",
        env!("CARGO_PKG_VERSION")
    );

    let device = config.device.clone();
    let data_dir = config.resolve_data_dir()?;
    let (client, event_loop) = client::start(config, Box::new(ConsolePresenter::new())).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let input = match parse_input(&line) {
            Ok(input) => input,
            Err(usage) => {
                eprintln!("!! {usage}");
                continue;
            }
        };

        match input {
            Input::Nothing => {}
            Input::Quit => break,
            Input::Help => println!("{HELP}"),
            Input::Message(text) => client.send(Command::SendMessage(text))?,
            Input::Upload(path) => match tokio::fs::read(&path).await {
                Ok(data) => {
                    let name = path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| "attachment".to_string());
                    client.send(Command::SendAttachment { name, data })?;
                }
                Err(e) => eprintln!("!! cannot read {}: {e}", path.display()),
            },
            Input::Set { key, value } => {
                let db = Database::new(&data_dir)?;
                Settings::persist(&db, &device, &key, &value)?;
                println!("-- {key} = {value} (applies on next start)");
            }
            Input::Command(command) => client.send(command)?,
        }
    }

    // The loop may already be gone if it failed; nothing left to stop then.
    let _ = client.send(Command::Shutdown);
    event_loop.await?;
    Ok(())
}
