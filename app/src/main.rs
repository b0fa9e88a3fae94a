use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use rapport::render::{self, Output};
use rapport::repl::{ReplCommand, HELP};
use rapport::{load_preferences, preferences_path, save_preferences, CliPreferences};
use rapport_core::{
    telemetry, ChatError, Client, ClientSettings, LoginCredentials, RegisterData,
    SessionController, SessionUpdate,
};
use std::io::Write;
use std::path::Path;
use std::process::ExitCode;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::runtime::Runtime;
use tokio::sync::mpsc::UnboundedReceiver;

#[derive(Parser, Debug)]
#[command(name = "rapport", version, about = "Chat with the Rapport assistant from a terminal")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in and remember the session.
    Login {
        email: String,
        #[arg(long, env = "RAPPORT_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Create an account and sign in.
    Register {
        email: String,
        #[arg(long)]
        name: String,
        #[arg(long, env = "RAPPORT_PASSWORD", hide_env_values = true)]
        password: String,
    },
    Logout,
    Whoami,
    /// Send one message and stream the reply.
    Send {
        #[arg(required = true, num_args = 1..)]
        message: Vec<String>,
    },
    /// Interactive chat (the default).
    Chat,
    History,
    /// Delete the chat history on the server.
    Clear,
    Conversations,
    Open {
        id: String,
    },
}

fn main() -> Result<ExitCode> {
    telemetry::init_tracing(telemetry::default_filter())?;

    let cli = Cli::parse();
    let settings = ClientSettings::load().map_err(|err| anyhow!(err.user_message()))?;

    let runtime = Runtime::new()?;
    runtime.block_on(run(cli.command.unwrap_or(Command::Chat), settings))
}

async fn run(command: Command, settings: ClientSettings) -> Result<ExitCode> {
    let (client, mut updates) = Client::from_settings(&settings)?;
    let preferences_path = preferences_path();
    let mut preferences = load_preferences(&preferences_path).await?;

    match command {
        Command::Login { email, password } => {
            let identity = client
                .auth
                .login(&LoginCredentials::new(email, password))
                .await
                .map_err(user_error)?;
            println!("Signed in as {}", render::render_identity(&identity));
        }
        Command::Register {
            email,
            name,
            password,
        } => {
            let identity = client
                .auth
                .register(&RegisterData {
                    email,
                    password,
                    name,
                })
                .await
                .map_err(user_error)?;
            println!("Welcome, {}", render::render_identity(&identity));
        }
        Command::Logout => {
            client.auth.logout().await;
            println!("Signed out.");
        }
        Command::Whoami => {
            if client.auth.identity().is_none() {
                println!("Not signed in.");
                return Ok(ExitCode::FAILURE);
            }
            let identity = client.auth.current_user().await.map_err(user_error)?;
            println!("{}", render::render_identity(&identity));
        }
        Command::Send { message } => {
            let sent = send_with_echo(&client.session, &mut updates, message.join(" ")).await;
            if sent.is_err() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Chat => {
            chat(&client, &mut updates, &mut preferences, &preferences_path).await?;
        }
        Command::History => {
            client.session.load_history().await.map_err(user_error)?;
            print!(
                "{}",
                render::render_timeline(&client.session.timeline(), preferences.show_timestamps)
            );
        }
        Command::Clear => {
            client.session.clear_history().await.map_err(user_error)?;
            println!("History cleared.");
        }
        Command::Conversations => {
            let conversations = client
                .session
                .conversations()
                .list()
                .await
                .map_err(user_error)?;
            print!("{}", render::render_conversations(&conversations));
        }
        Command::Open { id } => {
            open_conversation(&client.session, &id, &mut preferences, &preferences_path).await?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn chat(
    client: &Client,
    updates: &mut UnboundedReceiver<SessionUpdate>,
    preferences: &mut CliPreferences,
    preferences_path: &Path,
) -> Result<()> {
    let Some(identity) = client.auth.identity() else {
        bail!("Not signed in. Run `rapport login <email>` first.");
    };
    println!("Signed in as {}. /help lists commands.", render::render_identity(&identity));

    let session = &client.session;
    let initial = match preferences.last_conversation.clone() {
        Some(id) => session.open_conversation(&id).await.map(|_| ()),
        None if preferences.load_history_on_start => session.load_history().await.map(|_| ()),
        None => Ok(()),
    };
    match initial {
        Ok(()) => print!(
            "{}",
            render::render_timeline(&session.timeline(), preferences.show_timestamps)
        ),
        Err(err) if err.is_session_expired() => return Err(user_error(err)),
        Err(err) => eprintln!("error: {}", err.user_message()),
    }
    drain_updates(updates);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt();
    while let Some(line) = lines.next_line().await? {
        let outcome = match ReplCommand::parse(&line) {
            ReplCommand::Empty => Ok(()),
            ReplCommand::Quit => break,
            ReplCommand::Help => {
                println!("{HELP}");
                Ok(())
            }
            ReplCommand::History => session.load_history().await.map(|_| {
                print!(
                    "{}",
                    render::render_timeline(&session.timeline(), preferences.show_timestamps)
                );
            }),
            ReplCommand::Clear => session.clear_history().await,
            ReplCommand::Conversations => session
                .conversations()
                .list()
                .await
                .map(|list| print!("{}", render::render_conversations(&list))),
            ReplCommand::Open(id) => {
                if let Err(err) = open_conversation(session, &id, preferences, preferences_path).await {
                    eprintln!("error: {err}");
                }
                Ok(())
            }
            ReplCommand::Unknown(command) => {
                eprintln!("unknown command {command}");
                println!("{HELP}");
                Ok(())
            }
            // Send failures are already rendered from the update stream.
            ReplCommand::Message(text) => match send_with_echo(session, updates, text).await {
                Err(err) if err.is_session_expired() => Err(err),
                _ => Ok(()),
            },
        };
        drain_updates(updates);
        if let Err(err) = outcome {
            if err.is_session_expired() {
                return Err(user_error(err));
            }
            eprintln!("error: {}", err.user_message());
        }
        prompt();
    }
    Ok(())
}

async fn open_conversation(
    session: &SessionController,
    id: &str,
    preferences: &mut CliPreferences,
    preferences_path: &Path,
) -> Result<()> {
    session.open_conversation(id).await.map_err(user_error)?;
    print!(
        "{}",
        render::render_timeline(&session.timeline(), preferences.show_timestamps)
    );
    preferences.last_conversation = Some(id.to_string());
    save_preferences(preferences_path, preferences).await
}

/// Sends one message, echoing the reply as it streams in.
async fn send_with_echo(
    session: &SessionController,
    updates: &mut UnboundedReceiver<SessionUpdate>,
    content: String,
) -> Result<(), ChatError> {
    let send = session.send(content);
    tokio::pin!(send);
    print!("Rapport: ");
    flush();
    let result = loop {
        tokio::select! {
            result = &mut send => break result,
            Some(update) = updates.recv() => emit(&update),
        }
    };
    drain_updates(updates);
    result.map(|_| ())
}

fn drain_updates(updates: &mut UnboundedReceiver<SessionUpdate>) {
    while let Ok(update) = updates.try_recv() {
        emit(&update);
    }
}

fn emit(update: &SessionUpdate) {
    match render::render_update(update) {
        Some(Output::Inline(text)) => {
            print!("{text}");
            flush();
        }
        Some(Output::Line(text)) => println!("{text}"),
        Some(Output::Error(text)) => eprintln!("\n{text}"),
        None => {}
    }
}

fn prompt() {
    print!("> ");
    flush();
}

fn flush() {
    std::io::stdout().flush().ok();
}

fn user_error(err: ChatError) -> anyhow::Error {
    anyhow!(err.user_message())
}
