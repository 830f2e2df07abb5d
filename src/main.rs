use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use handson_sync::config::{ConfigError, StoreConfig, SyncConfig};
use handson_sync::db;
use handson_sync::error::{ErrorCode, SyncError};
use handson_sync::identity::{FileIdentityStore, IdentityError};
use handson_sync::model::{ResourceKind, Session, Task, now};
use handson_sync::services::{progress, session, task};
use handson_sync::store::RemoteStore;
use handson_sync::store::postgres::PgStore;
use handson_sync::sync::{Role, Snapshot, SyncClient};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("database init failed: {0}")]
    Database(#[from] sqlx::Error),
    #[error("identity file unavailable: {0}")]
    Identity(#[from] IdentityError),
    #[error("[{}] {}", .0.error_code(), .0)]
    Sync(#[from] SyncError),
    #[error("no session with code {0}")]
    UnknownSession(String),
    #[error("task {0} does not exist in this session")]
    NoSuchTask(usize),
}

#[derive(Parser, Debug)]
#[command(name = "handson", about = "Hands-on session coordinator and participant CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Session(SessionCommand),
    Task(TaskCommand),
    Progress(ProgressCommand),
    /// Attach to a session and print the live progress matrix until Ctrl-C.
    Watch {
        #[arg(long)]
        code: String,
        #[arg(long, conflicts_with = "coordinator")]
        name: Option<String>,
        #[arg(long, default_value_t = false)]
        coordinator: bool,
    },
    /// Flip one task (1-based) for the remembered participant.
    Toggle {
        #[arg(long)]
        code: String,
        #[arg(long)]
        task: usize,
        #[arg(long)]
        name: Option<String>,
    },
}

#[derive(Args, Debug)]
struct SessionCommand {
    #[command(subcommand)]
    command: SessionSubcommand,
}

#[derive(Subcommand, Debug)]
enum SessionSubcommand {
    List,
    Create {
        #[arg(long)]
        title: String,
    },
    Close {
        code: String,
    },
    Delete {
        code: String,
    },
}

#[derive(Args, Debug)]
struct TaskCommand {
    #[command(subcommand)]
    command: TaskSubcommand,
}

#[derive(Subcommand, Debug)]
enum TaskSubcommand {
    List {
        code: String,
    },
    Add {
        code: String,
        #[arg(long)]
        title: String,
    },
    Rename {
        code: String,
        number: usize,
        #[arg(long)]
        title: String,
    },
    Delete {
        code: String,
        number: usize,
    },
}

#[derive(Args, Debug)]
struct ProgressCommand {
    #[command(subcommand)]
    command: ProgressSubcommand,
}

#[derive(Subcommand, Debug)]
enum ProgressSubcommand {
    /// Delete every progress record of the session.
    Reset { code: String },
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let store_config = StoreConfig::from_env()?;
    let pool = db::init_pool(&store_config).await?;
    let sync_config = SyncConfig::from_env();
    let store: Arc<dyn RemoteStore> = Arc::new(PgStore::new(pool, sync_config.subscribe_timeout));

    match cli.command {
        Command::Session(cmd) => run_session(store.as_ref(), cmd).await,
        Command::Task(cmd) => run_task(store.as_ref(), cmd).await,
        Command::Progress(cmd) => run_progress(store.as_ref(), cmd).await,
        Command::Watch { code, name, coordinator } => {
            let role = if coordinator { Role::Coordinator } else { Role::Participant { name } };
            let client = sync_client(store, &store_config, sync_config)?;
            run_watch(&client, &code, role).await
        }
        Command::Toggle { code, task, name } => {
            let client = sync_client(store, &store_config, sync_config)?;
            run_toggle(&client, &code, task, name).await
        }
    }
}

fn sync_client(store: Arc<dyn RemoteStore>, config: &StoreConfig, sync: SyncConfig) -> Result<SyncClient, CliError> {
    let identity = Arc::new(FileIdentityStore::open(&config.identity_path)?);
    Ok(SyncClient::new(store, identity, sync))
}

async fn run_session(store: &dyn RemoteStore, cmd: SessionCommand) -> Result<(), CliError> {
    match cmd.command {
        SessionSubcommand::List => {
            for s in session::list_sessions(store).await? {
                let state = if s.active { "active" } else { "closed" };
                println!("{}  {:<6}  {}", s.code, state, s.title);
            }
        }
        SessionSubcommand::Create { title } => {
            let created = session::create_session(store, &title).await?;
            println!("{}", created.code);
        }
        SessionSubcommand::Close { code } => {
            let found = session_by_code(store, &code).await?;
            session::close_session(store, found.id).await?;
        }
        SessionSubcommand::Delete { code } => {
            let found = session_by_code(store, &code).await?;
            session::delete_session(store, found.id).await?;
        }
    }
    Ok(())
}

async fn run_task(store: &dyn RemoteStore, cmd: TaskCommand) -> Result<(), CliError> {
    match cmd.command {
        TaskSubcommand::List { code } => {
            let found = session_by_code(store, &code).await?;
            for (n, t) in task::list_tasks(store, found.id).await?.iter().enumerate() {
                println!("{:>3}. {}", n + 1, t.title);
            }
        }
        TaskSubcommand::Add { code, title } => {
            let found = session_by_code(store, &code).await?;
            task::add_task(store, found.id, &title).await?;
        }
        TaskSubcommand::Rename { code, number, title } => {
            let found = session_by_code(store, &code).await?;
            let target = task_by_number(store, &found, number).await?;
            task::rename_task(store, target.id, &title).await?;
        }
        TaskSubcommand::Delete { code, number } => {
            let found = session_by_code(store, &code).await?;
            let target = task_by_number(store, &found, number).await?;
            task::delete_task(store, target.id).await?;
        }
    }
    Ok(())
}

async fn run_progress(store: &dyn RemoteStore, cmd: ProgressCommand) -> Result<(), CliError> {
    match cmd.command {
        ProgressSubcommand::Reset { code } => {
            let found = session_by_code(store, &code).await?;
            let removed = progress::reset_session_progress(store, found.id).await?;
            println!("removed {removed} progress records");
        }
    }
    Ok(())
}

async fn run_watch(client: &SyncClient, code: &str, role: Role) -> Result<(), CliError> {
    let info = client.attach_to_session(code, role).await?;
    if let Some(p) = &info.participant {
        let verb = if info.restored { "rejoined" } else { "joined" };
        println!("{verb} {} as {}", info.session.code, p.name);
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let listeners: Vec<_> = [ResourceKind::Tasks, ResourceKind::Participants, ResourceKind::Progress]
        .into_iter()
        .map(|kind| {
            let tx = tx.clone();
            client.on_snapshot_changed(kind, move |_| {
                let _ = tx.send(());
            })
        })
        .collect();

    print_matrix(client, &info.session);
    let mut degraded = client.is_connection_degraded();
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            Some(()) = rx.recv() => print_matrix(client, &info.session),
            _ = ticker.tick() => {
                if client.is_connection_degraded() != degraded {
                    degraded = !degraded;
                    print_matrix(client, &info.session);
                }
            }
        }
    }

    for id in listeners {
        client.remove_listener(id);
    }
    client.detach_from_session().await;
    Ok(())
}

async fn run_toggle(client: &SyncClient, code: &str, number: usize, name: Option<String>) -> Result<(), CliError> {
    let info = client.attach_to_session(code, Role::Participant { name }).await?;
    let tasks = match client.get_snapshot(ResourceKind::Tasks) {
        Snapshot::Tasks(tasks) => tasks,
        _ => Vec::new(),
    };
    let result = match number.checked_sub(1).and_then(|i| tasks.get(i)) {
        Some(target) => client.toggle_progress(target.id).await.map_err(CliError::from),
        None => Err(CliError::NoSuchTask(number)),
    };
    client.detach_keeping_presence().await;
    let record = result?;
    let mark = if record.completed { "done" } else { "not done" };
    println!("{}: task {number} {mark}", info.session.code);
    Ok(())
}

fn print_matrix(client: &SyncClient, session: &Session) {
    let summary = client.progress_summary();
    let tasks = match client.get_snapshot(ResourceKind::Tasks) {
        Snapshot::Tasks(tasks) => tasks,
        _ => Vec::new(),
    };
    let participants = match client.get_snapshot(ResourceKind::Participants) {
        Snapshot::Participants(rows) => rows,
        _ => Vec::new(),
    };
    let stale_after = client.config().presence_stale_after();
    let at = now();

    let link = if client.is_connection_degraded() { "DEGRADED (polling)" } else { "live" };
    println!("\n== {} [{}] {link}", session.title, session.code);
    for (n, t) in tasks.iter().enumerate() {
        let done = summary.tasks.get(n).map_or(0, |c| c.completed);
        println!("  {:>3}. {:<40} {done}", n + 1, t.title);
    }
    for p in &participants {
        let Some(row) = summary.participants.iter().find(|r| r.participant_id == p.id) else { continue };
        let presence = if p.appears_online(at, stale_after) { "*" } else { " " };
        let cells: String =
            tasks.iter().map(|t: &Task| if summary.is_done(p.id, t.id) { 'x' } else { '.' }).collect();
        println!("  {presence} {:<20} {:>7}  {cells}", row.name, row.ratio());
    }
}

async fn session_by_code(store: &dyn RemoteStore, code: &str) -> Result<Session, CliError> {
    let code = session::normalize_code(code)?;
    session::list_sessions(store)
        .await?
        .into_iter()
        .find(|s| s.code == code)
        .ok_or(CliError::UnknownSession(code))
}

async fn task_by_number(store: &dyn RemoteStore, found: &Session, number: usize) -> Result<Task, CliError> {
    let tasks = task::list_tasks(store, found.id).await?;
    number.checked_sub(1).and_then(|i| tasks.into_iter().nth(i)).ok_or(CliError::NoSuchTask(number))
}
