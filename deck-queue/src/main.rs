//! deck-queue - Manage publications and their per-account schedules
//!
//! Unix-style front end to the Postdeck scheduling service.

use std::collections::HashSet;

use chrono::DateTime;
use clap::{Args, Parser, Subcommand};
use libpostdeck::scheduling::parse::{parse_override, parse_schedule};
use libpostdeck::service::PostdeckService;
use libpostdeck::{
    Actor, Database, PostdeckError, Publication, Result, ScheduleRequest, ScheduleStatus,
    ScheduledPost, SocialAccount,
};
use serde_json::json;
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "deck-queue")]
#[command(version)]
#[command(about = "Manage publications and their per-account schedules")]
#[command(long_about = "\
deck-queue - Manage publications and their per-account schedules

DESCRIPTION:
    deck-queue creates publications and social accounts and decides which
    accounts a publication goes out on, and when. Every schedule change
    reconciles the publication's pending rows with the selection you pass
    and moves the publication between draft and scheduled.

COMMANDS:
    publication  Create, list, show or re-time publications
    account      Register and list social accounts
    schedule     Set the accounts (and per-account times) of a publication
    list         List the schedule rows of a publication

USAGE EXAMPLES:
    # Register accounts
    deck-queue account add --name \"Acme Page\" --platform facebook

    # Create a publication going out tomorrow at 9
    deck-queue publication create --title \"Launch\" --at \"tomorrow 9am\"

    # Publish on two accounts, one of them two hours later
    deck-queue schedule <PUB_ID> --account <ACC1> --account <ACC2> --at <ACC2>=+26h

    # Remove every account
    deck-queue schedule <PUB_ID>

    # Inspect the rows
    deck-queue list <PUB_ID> --format json

CONFIGURATION:
    Configuration file: ~/.config/postdeck/config.toml
    Database location: ~/.local/share/postdeck/postdeck.db

    Override with environment variables:
        POSTDECK_CONFIG     - Path to config file
        POSTDECK_DB_PATH    - Path to database file
        POSTDECK_WORKSPACE  - Workspace to act in
        POSTDECK_USER       - User recorded on new rows

EXIT CODES:
    0 - Success
    1 - Operation failed
    3 - Invalid input or unknown publication
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Workspace to act in
    #[arg(long, global = true, env = "POSTDECK_WORKSPACE", default_value = "default")]
    workspace: String,

    /// User recorded as the author of schedule changes
    #[arg(long, global = true, env = "POSTDECK_USER", default_value = "cli")]
    user: String,

    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage publications
    #[command(subcommand)]
    Publication(PublicationCommand),

    /// Manage social accounts
    #[command(subcommand)]
    Account(AccountCommand),

    /// Replace the account selection of a publication
    Schedule {
        /// Publication ID
        publication_id: String,

        /// Account to publish on (repeatable); none clears the selection
        #[arg(short, long = "account", value_name = "ACCOUNT_ID")]
        accounts: Vec<String>,

        /// Per-account time overriding the publication time (repeatable)
        #[arg(long = "at", value_name = "ACCOUNT_ID=TIME")]
        overrides: Vec<String>,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// List the schedule rows of a publication
    List {
        /// Publication ID
        publication_id: String,

        /// Only rows in this status (pending, publishing, posted, failed)
        #[arg(short, long)]
        status: Option<String>,

        #[command(flatten)]
        output: OutputArgs,
    },
}

#[derive(Subcommand, Debug)]
enum PublicationCommand {
    /// Create a draft publication
    Create {
        #[arg(short, long)]
        title: String,

        #[arg(short, long, default_value = "")]
        content: String,

        /// Global schedule time (e.g. "tomorrow 3pm", "+2h", 1767225600)
        #[arg(long, value_name = "TIME")]
        at: Option<String>,
    },

    /// List publications of the workspace
    List {
        #[command(flatten)]
        output: OutputArgs,
    },

    /// Show a publication with its schedule rows and activity
    Show {
        publication_id: String,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Change the global schedule time, keeping the current account selection
    ///
    /// The selection is rebuilt from the pending rows. Accounts that were
    /// selected without a time, and so have no row, are not picked up again.
    /// A per-account time equal to the old global time is treated as
    /// following the global time and moves with it. Run `schedule` again to
    /// change accounts or overrides.
    SetTime {
        publication_id: String,

        /// New time, or "none" to clear it
        time: String,

        #[command(flatten)]
        output: OutputArgs,
    },
}

#[derive(Subcommand, Debug)]
enum AccountCommand {
    /// Register a social account
    Add {
        #[arg(short, long)]
        name: String,

        /// Platform identifier (e.g. facebook, youtube)
        #[arg(short, long)]
        platform: String,
    },

    /// List accounts of the workspace
    List {
        #[command(flatten)]
        output: OutputArgs,
    },
}

#[derive(Args, Debug)]
struct OutputArgs {
    /// Output format: text or json
    #[arg(short, long, default_value = "text")]
    format: String,
}

impl OutputArgs {
    fn json(&self) -> Result<bool> {
        match self.format.as_str() {
            "text" => Ok(false),
            "json" => Ok(true),
            other => Err(PostdeckError::InvalidInput(format!(
                "Invalid format '{}'. Must be 'text' or 'json'",
                other
            ))),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    libpostdeck::logging::init_from_env("warn", cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let service = PostdeckService::new().await?;
    let actor = Actor::new(cli.user, cli.workspace);

    match cli.command {
        Commands::Publication(command) => cmd_publication(&service, &actor, command).await,
        Commands::Account(command) => cmd_account(service.database(), &actor, command).await,
        Commands::Schedule {
            publication_id,
            accounts,
            overrides,
            output,
        } => cmd_schedule(&service, &actor, &publication_id, accounts, &overrides, &output).await,
        Commands::List {
            publication_id,
            status,
            output,
        } => {
            cmd_list(
                service.database(),
                &actor,
                &publication_id,
                status.as_deref(),
                &output,
            )
            .await
        }
    }
}

async fn cmd_publication(
    service: &PostdeckService,
    actor: &Actor,
    command: PublicationCommand,
) -> Result<()> {
    let db = service.database();

    match command {
        PublicationCommand::Create { title, content, at } => {
            if title.trim().is_empty() {
                return Err(PostdeckError::InvalidInput(
                    "Title cannot be empty".to_string(),
                ));
            }

            let mut publication = Publication::new(actor.workspace_id.clone(), title, content);
            publication.scheduled_at = at
                .as_deref()
                .map(parse_schedule)
                .transpose()?
                .map(|dt| dt.timestamp());
            db.create_publication(&publication).await?;

            // A global time alone is enough to leave draft
            service.scheduling().project(&publication.id, actor).await?;

            println!("{}", publication.id);
            Ok(())
        }

        PublicationCommand::List { output } => {
            let json = output.json()?;
            let publications = db.list_publications(&actor.workspace_id).await?;

            if json {
                print_json(&json!(publications));
            } else {
                for p in &publications {
                    println!(
                        "{} | {} | {} | {}",
                        p.id,
                        p.status,
                        format_time(p.scheduled_at),
                        truncate(&p.title, 40)
                    );
                }
            }
            Ok(())
        }

        PublicationCommand::Show {
            publication_id,
            output,
        } => {
            let json = output.json()?;
            let publication = load_publication(db, actor, &publication_id).await?;
            let rows = db.list_scheduled_posts(&publication.id).await?;
            let activities = db.get_activities(&publication.id).await?;

            if json {
                print_json(&json!({
                    "publication": publication,
                    "schedule": rows,
                    "activity": activities,
                }));
            } else {
                println!("ID:        {}", publication.id);
                println!("Title:     {}", publication.title);
                println!("Status:    {}", publication.status);
                println!("Scheduled: {}", format_time(publication.scheduled_at));
                println!("Rows:      {}", rows.len());
                for row in &rows {
                    println!("  {}", format_row(row));
                }
                for entry in &activities {
                    println!(
                        "  {} {} -> {} by {}",
                        format_time(Some(entry.created_at)),
                        entry.from_status.as_deref().unwrap_or("-"),
                        entry.to_status.as_deref().unwrap_or("-"),
                        entry.user_id.as_deref().unwrap_or("system")
                    );
                }
            }
            Ok(())
        }

        PublicationCommand::SetTime {
            publication_id,
            time,
            output,
        } => {
            let json = output.json()?;
            let publication = load_publication(db, actor, &publication_id).await?;
            let scheduled_at = if time.eq_ignore_ascii_case("none") {
                None
            } else {
                Some(parse_schedule(&time)?.timestamp())
            };

            let request = current_selection(db, &publication).await?;
            let outcome = service
                .scheduling()
                .set_publication_time(&publication.id, scheduled_at, &request, actor)
                .await?;

            if json {
                print_json(&json!({
                    "publication_id": publication.id,
                    "scheduled_at": scheduled_at,
                    "status": outcome.status,
                    "report": outcome.report,
                }));
            } else {
                println!(
                    "{} | {} | {}",
                    publication.id,
                    outcome.status,
                    format_time(scheduled_at)
                );
            }
            Ok(())
        }
    }
}

async fn cmd_account(db: &Database, actor: &Actor, command: AccountCommand) -> Result<()> {
    match command {
        AccountCommand::Add { name, platform } => {
            let platform = platform.trim().to_lowercase();
            if name.trim().is_empty() || platform.is_empty() {
                return Err(PostdeckError::InvalidInput(
                    "Account name and platform are required".to_string(),
                ));
            }

            let account = SocialAccount::new(actor.workspace_id.clone(), name, platform);
            db.create_social_account(&account).await?;
            println!("{}", account.id);
            Ok(())
        }

        AccountCommand::List { output } => {
            let json = output.json()?;
            let accounts = db.list_social_accounts(&actor.workspace_id).await?;

            if json {
                print_json(&json!(accounts));
            } else {
                for a in &accounts {
                    println!("{} | {} | {}", a.id, a.platform, a.name);
                }
            }
            Ok(())
        }
    }
}

async fn cmd_schedule(
    service: &PostdeckService,
    actor: &Actor,
    publication_id: &str,
    accounts: Vec<String>,
    overrides: &[String],
    output: &OutputArgs,
) -> Result<()> {
    let json = output.json()?;

    let mut request = ScheduleRequest::new(accounts);
    for raw in overrides {
        let (account_id, at) = parse_override(raw)?;
        if !request.account_ids.contains(&account_id) {
            return Err(PostdeckError::InvalidInput(format!(
                "--at given for '{}' which is not among --account",
                account_id
            )));
        }
        request = request.with_override(account_id, at);
    }

    let outcome = service
        .scheduling()
        .schedule(publication_id, &request, actor)
        .await?;
    let report = &outcome.report;

    if json {
        print_json(&json!({
            "publication_id": publication_id,
            "status": outcome.status,
            "status_changed": outcome.status_changed,
            "report": report,
        }));
    } else {
        println!(
            "{} | {} | created {} updated {} deleted {} skipped {}",
            publication_id,
            outcome.status,
            report.created.len(),
            report.updated.len(),
            report.deleted.len(),
            report.skipped.len()
        );
        for account_id in &report.skipped {
            eprintln!("Warning: no schedule time for account {}, skipped", account_id);
        }
        for account_id in &report.unknown_accounts {
            eprintln!("Warning: account {} is not registered", account_id);
        }
    }
    Ok(())
}

async fn cmd_list(
    db: &Database,
    actor: &Actor,
    publication_id: &str,
    status: Option<&str>,
    output: &OutputArgs,
) -> Result<()> {
    let json = output.json()?;
    let status: Option<ScheduleStatus> = status.map(str::parse).transpose()?;

    let publication = load_publication(db, actor, publication_id).await?;
    let mut rows = db.list_scheduled_posts(&publication.id).await?;
    if let Some(status) = status {
        rows.retain(|r| r.status == status);
    }

    if json {
        print_json(&json!(rows));
    } else {
        for row in &rows {
            println!("{}", format_row(row));
        }
    }
    Ok(())
}

async fn load_publication(db: &Database, actor: &Actor, publication_id: &str) -> Result<Publication> {
    db.get_publication(publication_id)
        .await?
        .filter(|p| p.workspace_id == actor.workspace_id)
        .ok_or_else(|| PostdeckError::NotFound(format!("publication {}", publication_id)))
}

/// Rebuild the request that produced the current pending rows
///
/// Rows whose time differs from the publication time carry an override.
async fn current_selection(db: &Database, publication: &Publication) -> Result<ScheduleRequest> {
    let pending: Vec<ScheduledPost> = db
        .list_scheduled_posts(&publication.id)
        .await?
        .into_iter()
        .filter(|r| r.status == ScheduleStatus::Pending)
        .collect();

    let accounts: HashSet<&str> = pending.iter().map(|r| r.social_account_id.as_str()).collect();
    let mut request = ScheduleRequest::new(accounts);
    for row in &pending {
        if Some(row.scheduled_at) != publication.scheduled_at {
            request = request.with_override(row.social_account_id.clone(), row.scheduled_at);
        }
    }

    debug!(
        publication_id = %publication.id,
        accounts = request.account_ids.len(),
        overrides = request.overrides.len(),
        "Keeping current account selection"
    );
    Ok(request)
}

fn print_json(value: &serde_json::Value) {
    println!("{:#}", value);
}

fn format_row(row: &ScheduledPost) -> String {
    let mut line = format!(
        "{} | {} | {} | {} | {}",
        row.id,
        row.status,
        row.platform,
        row.account_name,
        format_time(Some(row.scheduled_at))
    );
    if let Some(error) = &row.error_message {
        line.push_str(&format!(" | {}", error));
    }
    line
}

fn format_time(timestamp: Option<i64>) -> String {
    timestamp
        .and_then(|ts| DateTime::from_timestamp(ts, 0))
        .map(|dt| dt.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Truncate to `max_chars` characters with an ellipsis
fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}
