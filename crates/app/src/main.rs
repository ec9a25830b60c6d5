use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use learn_core::model::sort_newest_first;
use services::{ApiConfig, HttpQuizApi, QuizApi, QuizController};
use storage::{BearerToken, CredentialProvider, FileCredentials, InMemoryCredentials};
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt as log_fmt, prelude::*};

mod take;

const DEFAULT_TOKEN_FILE: &str = ".learn-token";

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    MissingToken,
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::MissingToken => write!(f, "save-token requires a token"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p app -- take       [--api <url>] [--token-file <path>]");
    eprintln!("  cargo run -p app -- history    [--api <url>] [--token-file <path>]");
    eprintln!("  cargo run -p app -- save-token <token> [--token-file <path>]");
    eprintln!();
    eprintln!("Defaults:");
    eprintln!("  --api http://127.0.0.1:8000/");
    eprintln!("  --token-file {DEFAULT_TOKEN_FILE}");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  LEARN_API_BASE_URL, LEARN_API_TIMEOUT_SECS, LEARN_API_TOKEN, LEARN_API_TOKEN_FILE, RUST_LOG");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Take,
    History,
    SaveToken,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "take" => Some(Self::Take),
            "history" => Some(Self::History),
            "save-token" => Some(Self::SaveToken),
            _ => None,
        }
    }
}

struct Args {
    api_url: Option<String>,
    token_file: Option<PathBuf>,
    token: Option<String>,
}

impl Args {
    fn parse(
        cmd: Command,
        args: &mut impl Iterator<Item = String>,
    ) -> Result<Self, ArgsError> {
        let mut parsed = Self {
            api_url: None,
            token_file: std::env::var("LEARN_API_TOKEN_FILE").ok().map(PathBuf::from),
            token: None,
        };

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--api" => parsed.api_url = Some(require_value(args, "--api")?),
                "--token-file" => {
                    parsed.token_file = Some(PathBuf::from(require_value(args, "--token-file")?));
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ if cmd == Command::SaveToken && parsed.token.is_none() && !arg.starts_with("--") => {
                    parsed.token = Some(arg);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        if cmd == Command::SaveToken && parsed.token.is_none() {
            return Err(ArgsError::MissingToken);
        }
        Ok(parsed)
    }

    fn token_file(&self) -> FileCredentials {
        FileCredentials::new(
            self.token_file
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_TOKEN_FILE)),
        )
    }

    /// An explicit token file wins over `LEARN_API_TOKEN`.
    fn credentials(&self) -> Arc<dyn CredentialProvider> {
        if self.token_file.is_none() {
            if let Some(token) = std::env::var("LEARN_API_TOKEN")
                .ok()
                .and_then(BearerToken::new)
            {
                return Arc::new(InMemoryCredentials::with_token(token));
            }
        }
        Arc::new(self.token_file())
    }

    fn api_config(&self) -> Result<ApiConfig, services::ConfigError> {
        let config = ApiConfig::from_env()?;
        match &self.api_url {
            Some(url) => Ok(ApiConfig::new(url)?.with_timeout(config.timeout())),
            None => Ok(config),
        }
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(log_fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv = std::env::args().skip(1);

    let cmd = match argv.next() {
        None => {
            print_usage();
            return Ok(());
        }
        Some(first) if first == "--help" || first == "-h" => {
            print_usage();
            return Ok(());
        }
        Some(first) => Command::from_arg(&first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "unknown subcommand")
        })?,
    };

    let parsed = Args::parse(cmd, &mut argv).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    if cmd == Command::SaveToken {
        let store = parsed.token_file();
        store.store(parsed.token.as_deref().unwrap_or_default())?;
        println!("Token saved to {}", store.path().display());
        return Ok(());
    }

    let config = parsed.api_config()?;
    debug!(base_url = %config.base_url(), timeout = ?config.timeout(), "using API");
    let api = Arc::new(HttpQuizApi::new(config)?);
    let credentials = parsed.credentials();

    match cmd {
        Command::Take => {
            let controller = QuizController::new(api, credentials);
            take::run(&controller).await
        }
        Command::History => {
            let Some(token) = credentials.get() else {
                println!("Not signed in: save a token with `save-token` first.");
                return Ok(());
            };
            let mut results = api.quiz_history(&token).await?;
            if results.is_empty() {
                println!("No quizzes taken yet.");
                return Ok(());
            }
            sort_newest_first(&mut results);
            for result in &results {
                let when = result
                    .taken_at
                    .map_or_else(|| "unknown date".to_string(), |at| at.format("%Y-%m-%d %H:%M").to_string());
                match (result.correct_count, result.total_questions) {
                    (Some(correct), Some(total)) => {
                        println!("{when}  {:>4}  ({correct}/{total})", result.score.to_string());
                    }
                    _ => println!("{when}  {:>4}", result.score.to_string()),
                }
            }
            Ok(())
        }
        Command::SaveToken => Ok(()),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
