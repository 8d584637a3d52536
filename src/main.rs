//! Dasi CLI binary entry point.

use std::io::Write;
use std::sync::Arc;

use dasi::cli::{self, AskArgs, Cli, Commands, HistoryCommands};
use dasi::config::DasiConfig;
use dasi::conversation::{
    Mode, OutcomeStatus, ToolCallGateway, TurnEvent, TurnEventPayload, TurnEventSink, TurnInput,
    TurnLoop,
};
use dasi::history::{FileHistoryStore, HistoryStore};
use dasi::sidechannel::WebSearchResolver;
use dasi::tools::{builtin, ToolExecutor};
use futures::StreamExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("DASI_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse_args();
    let config = match DasiConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Ask(args) => handle_ask(config, args).await,
        Commands::History(history) => handle_history(&config, history.command).await,
        Commands::Tools => handle_tools(&config),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn handle_ask(config: DasiConfig, args: AskArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = match args.model.clone() {
        Some(model) => config.with_model(model),
        None => config,
    };
    let provider = dasi::provider::create_provider(&config)?;
    let history = Arc::new(FileHistoryStore::new(config.history_dir()));
    let web = WebSearchResolver::unconfigured();
    let registry = builtin::default_registry(&config, web.clone())?;
    let executor = ToolExecutor::new(Arc::new(registry));
    let gateway = ToolCallGateway::new();

    let approvals = spawn_approval_actor(gateway.clone(), args.auto_approve);

    let turn_loop = TurnLoop::new(provider, history, gateway, executor)
        .with_config(&config)
        .with_web_search(web);

    let mut input = TurnInput::builder()
        .query(args.query)
        .session_id(args.session)
        .mode(args.mode)
        .web_search(args.web)
        .build();
    input.selected_text = args.selected_text;
    if let Some(path) = &args.image {
        input.image = Some(cli::load_image(path)?);
    }

    let stream_text = args.mode == Mode::Chat;
    let sink: TurnEventSink = Arc::new(move |event: TurnEvent| print_event(&event, stream_text));
    let result = turn_loop.run(input, Some(sink)).await;
    approvals.abort();

    match result {
        Ok(response) => {
            if stream_text {
                println!();
            } else {
                println!("{}", response.text);
            }
            if args.suggest_filename {
                let name = turn_loop
                    .suggest_filename(
                        &response.text,
                        &response.session_id,
                        response.language.as_deref(),
                    )
                    .await;
                eprintln!("💾 {name}");
            }
            Ok(())
        }
        Err(e) => {
            println!();
            eprintln!("{}", e.user_message());
            std::process::exit(1);
        }
    }
}

fn print_event(event: &TurnEvent, stream_text: bool) {
    match &event.payload {
        TurnEventPayload::TextDelta { text } if stream_text => {
            print!("{text}");
            let _ = std::io::stdout().flush();
        }
        TurnEventPayload::SideChannelNote { note } => {
            eprintln!("\nℹ️  {note}");
        }
        TurnEventPayload::ToolCallResolved { outcome } => {
            let mark = match outcome.status {
                OutcomeStatus::Approved => "✅",
                OutcomeStatus::Rejected => "🚫",
                OutcomeStatus::Timeout => "⏱️",
                OutcomeStatus::Error => "❌",
            };
            eprintln!("  {mark} {} ({:?})", outcome.tool_name, outcome.status);
        }
        _ => {}
    }
}

/// Answers approval requests from the terminal. The blocking stdin read runs
/// on the blocking pool so the turn keeps streaming.
fn spawn_approval_actor(
    gateway: ToolCallGateway,
    auto_approve: bool,
) -> tokio::task::JoinHandle<()> {
    let mut requests = gateway.subscribe();
    tokio::spawn(async move {
        while let Some(request) = requests.next().await {
            let Ok(request) = request else { continue };
            if auto_approve {
                eprintln!("\n⚡ {} {} (auto-approved)", request.name, request.arguments);
                gateway.approve(&request.call_id);
                continue;
            }

            let prompt = format!(
                "\nAllow tool {} with {}? [y/N] ",
                request.name, request.arguments
            );
            let answer = tokio::task::spawn_blocking(move || {
                eprint!("{prompt}");
                let _ = std::io::stderr().flush();
                let mut line = String::new();
                std::io::stdin().read_line(&mut line).map(|_| line)
            })
            .await;

            let approved = matches!(answer, Ok(Ok(ref line)) if cli::parse_confirmation(line));
            if approved {
                gateway.approve(&request.call_id);
            } else {
                gateway.reject(&request.call_id);
            }
        }
    })
}

async fn handle_history(
    config: &DasiConfig,
    command: HistoryCommands,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = FileHistoryStore::new(config.history_dir());
    match command {
        HistoryCommands::Show { session, limit } => {
            for entry in store.read(&session, limit).await? {
                println!(
                    "[{}] {:?}: {}",
                    entry.recorded_at.format("%Y-%m-%d %H:%M:%S"),
                    entry.message.role,
                    entry.message.text()
                );
            }
        }
        HistoryCommands::Clear { session } => {
            store.clear(&session).await?;
            eprintln!("Cleared history for session '{session}'");
        }
    }
    Ok(())
}

fn handle_tools(config: &DasiConfig) -> Result<(), Box<dyn std::error::Error>> {
    let registry = builtin::default_registry(config, WebSearchResolver::unconfigured())?;
    for definition in registry.definitions() {
        println!("{}: {}", definition.name, definition.description);
        println!("{}\n", serde_json::to_string_pretty(&definition.parameters)?);
    }
    Ok(())
}
