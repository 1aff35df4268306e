use anyhow::{bail, Context, Result};
use arena_common::config::{
    JudgeConfig, DEFAULT_CONFIG_PATH, DEFAULT_RECURSION_LIMIT, DEFAULT_STACK_SIZE_LIMIT,
};
use arena_worker::config::DEFAULT_CATALOG_PATH;
use arena_worker::interpreter::{self, ScriptLimits};
use arena_worker::{commands, Judge};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Native stack for the interpreter thread of a sandbox process
const SANDBOX_STACK_BYTES: usize = 64 * 1024 * 1024;

#[derive(Parser)]
#[command(name = "arena-worker")]
#[command(about = "Arena worker - Grade JavaScript submissions in isolated sandboxes", long_about = None)]
struct Cli {
    /// Judge configuration file (optional)
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Problem catalog file
    #[arg(long, global = true, default_value = DEFAULT_CATALOG_PATH)]
    catalog: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Grade a submission and print the verdict as JSON
    Grade {
        /// Request JSON file, or - for stdin
        #[arg(short, long, conflicts_with_all = ["problem", "code"])]
        request: Option<String>,

        /// Catalog problem to grade against
        #[arg(short, long, requires = "code")]
        problem: Option<String>,

        /// Source file graded against --problem
        #[arg(short, long, requires = "problem")]
        code: Option<PathBuf>,
    },

    /// Print the declaration the judge would install for a function
    Extract {
        /// Source file
        #[arg(short, long)]
        code: PathBuf,

        /// Entry point name
        #[arg(short, long)]
        function: String,
    },

    /// List catalog problems
    Problems,

    /// Serve the sandbox protocol on stdin/stdout
    #[command(hide = true)]
    Sandbox {
        #[arg(long, default_value_t = DEFAULT_RECURSION_LIMIT)]
        recursion_limit: usize,

        #[arg(long, default_value_t = DEFAULT_STACK_SIZE_LIMIT)]
        stack_size_limit: usize,
    },
}

fn main() -> Result<()> {
    let Cli {
        config,
        catalog,
        command,
    } = Cli::parse();

    // Sandbox processes stay synchronous and silent: stdout belongs to the protocol
    if let Commands::Sandbox {
        recursion_limit,
        stack_size_limit,
    } = command
    {
        return run_sandbox(ScriptLimits {
            recursion: recursion_limit,
            stack_size: stack_size_limit,
        });
    }

    init_tracing();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    runtime.block_on(run(command, config, catalog))
}

fn run_sandbox(limits: ScriptLimits) -> Result<()> {
    let interpreter = std::thread::Builder::new()
        .name("sandbox".to_string())
        .stack_size(SANDBOX_STACK_BYTES)
        .spawn(move || {
            interpreter::serve(std::io::stdin().lock(), std::io::stdout().lock(), limits)
        })
        .context("Failed to start the interpreter thread")?;

    match interpreter.join() {
        Ok(result) => result,
        Err(_) => bail!("Interpreter thread panicked"),
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    // stdout carries verdicts, so logs go to stderr
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true);

    let json = std::env::var("ARENA_LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(command: Commands, config_path: PathBuf, catalog_path: PathBuf) -> Result<()> {
    match command {
        Commands::Grade {
            request,
            problem,
            code,
        } => {
            let config = JudgeConfig::load_or_default(&config_path)?.with_env_overrides()?;
            let submission = match (request, problem, code) {
                (Some(source), _, _) => commands::read_request(&source)?,
                (None, Some(problem), Some(code)) => {
                    commands::problem_submission(&catalog_path, &problem, &code)?
                }
                _ => bail!("grade needs --request, or --problem together with --code"),
            };

            let judge = Judge::from_config(&config)?;
            info!(
                function = %submission.function_name,
                test_cases = submission.test_cases.len(),
                source_size = submission.code.len(),
                "Received submission"
            );

            let cancel = CancellationToken::new();
            let interrupt = cancel.clone();
            tokio::spawn(async move {
                if signal::ctrl_c().await.is_ok() {
                    warn!("Received interrupt, cancelling grading...");
                    interrupt.cancel();
                }
            });

            let verdict = judge.grade_with_cancel(&submission, cancel).await;
            println!(
                "{}",
                serde_json::to_string_pretty(&verdict).context("Failed to encode verdict")?
            );
        }
        Commands::Extract { code, function } => {
            let config = JudgeConfig::load_or_default(&config_path)?.with_env_overrides()?;
            let extracted = commands::extract(&code, &function, config.max_source_bytes)?;
            info!(form = ?extracted.form, "Function extracted");
            println!("{}", extracted.source);
        }
        Commands::Problems => {
            for line in commands::list_problems(&catalog_path)? {
                println!("{}", line);
            }
        }
        Commands::Sandbox { .. } => bail!("sandbox mode runs outside the async runtime"),
    }

    Ok(())
}
