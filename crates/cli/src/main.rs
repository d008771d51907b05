use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tanya::llm::{OllamaClient, OllamaCompletion, DEFAULT_MODEL};
use tanya::{ChatSession, KeyValueStore, Message, ReplyOutcome, Role};

#[derive(Parser)]
#[command(name = "tanya")]
#[command(about = "Tanya CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory, default config, and history storage.
    Init {
        /// Config file path (default: TANYA_CONFIG_PATH or ~/.tanya/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Chat with the assistant (interactive). History is kept between runs.
    Chat {
        /// Config file path (default: TANYA_CONFIG_PATH or ~/.tanya/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Print the saved conversation.
    History {
        /// Config file path (default: TANYA_CONFIG_PATH or ~/.tanya/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Erase the saved conversation.
    Clear {
        /// Config file path (default: TANYA_CONFIG_PATH or ~/.tanya/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Version) => {
            println!("tanya {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(Commands::Init { config }) => run_init(config),
        Some(Commands::Chat { config }) => run_chat(config).await,
        Some(Commands::History { config }) => run_history(config),
        Some(Commands::Clear { config }) => run_clear(config),
        None => {
            println!("Run with --help for usage");
            Ok(())
        }
    };
    if let Err(e) = result {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(tanya::config::default_config_path);
    let dir = tanya::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

fn print_message(m: &Message) {
    let prefix = match m.role {
        Role::User => ">",
        Role::Assistant => "<",
    };
    println!(
        "{} [{}] {}",
        prefix,
        m.timestamp.format("%Y-%m-%d %H:%M"),
        m.content.trim()
    );
}

fn run_history(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let (config, path) = tanya::config::load_config(config_path)?;
    let history = tanya::init::open_history(&config, &path);
    let messages = history.load();
    if messages.is_empty() {
        println!("(no saved conversation)");
    }
    for m in &messages {
        print_message(m);
    }
    Ok(())
}

fn run_clear(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let (config, path) = tanya::config::load_config(config_path)?;
    let history = tanya::init::open_history(&config, &path);
    history.backend().remove(history.key())?;
    println!("conversation cleared");
    Ok(())
}

async fn run_chat(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    use std::io::{self, Write};

    let (config, path) = tanya::config::load_config(config_path)?;
    let model = tanya::config::resolve_model(&config).unwrap_or_else(|| DEFAULT_MODEL.to_string());
    let client = OllamaClient::new(tanya::config::resolve_base_url(&config), config.llm.timeout());
    let completion = OllamaCompletion::new(client, model, config.llm.system_prompt.clone());
    log::info!("chat: using model {}", completion.model());

    let session = ChatSession::mount(
        completion,
        tanya::init::open_history(&config, &path),
        config.chat.session_options(),
    );
    session.toggle_chat();
    for m in &session.view().messages {
        print_message(m);
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("/exit") || input.eq_ignore_ascii_case("/quit") {
            break;
        }
        if input.eq_ignore_ascii_case("/clear") {
            session.clear_chat();
            println!("conversation cleared");
            continue;
        }
        if input.eq_ignore_ascii_case("/history") {
            for m in &session.view().messages {
                print_message(m);
            }
            continue;
        }

        let Some(pending) = session.send_message(input) else {
            println!("(still waiting for the previous reply)");
            continue;
        };
        match pending.outcome().await {
            ReplyOutcome::Answered => {
                if let Some(reply) = session.view().messages.last() {
                    println!("< {}", reply.content.trim());
                }
            }
            ReplyOutcome::Failed(e) => {
                eprintln!("chat error: {}", e);
                session.clear_error();
            }
            ReplyOutcome::Discarded => {}
        }
    }

    session.close_chat();
    session.teardown();
    Ok(())
}
